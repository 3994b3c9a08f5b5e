//! Script text for compiled programs.
//!
//! The script is line oriented, one statement per line, with two-space
//! indentation inside `repeat` bodies:
//!
//! ```text
//! # blocklink program model=alpha serial=S1
//! begin
//! repeat 2 {
//!   command serial="S1" kind=action code="wave" duration=3 interrupt=true wait=true
//!   wait 0.5
//! }
//! log "done"
//! fail "battery low"
//! ```
//!
//! Lines starting with `#` are comments. [`render`] and [`parse`] are
//! inverse to each other for every statement list the compiler produces.

use super::program::{DeviceCommand, Statement};
use crate::error::SandboxError;
use crate::model::{CatalogKind, DeviceModelId};

/// Render statements as script text, header comment first.
pub fn render(model: &DeviceModelId, serial: &str, statements: &[Statement]) -> String {
    let mut out = String::with_capacity(64 + statements.len() * 48);
    out.push_str(&format!(
        "# blocklink program model={} serial={}\n",
        sanitize_comment(model.as_str()),
        sanitize_comment(serial)
    ));
    write_statements(&mut out, statements, 0);
    out
}

fn sanitize_comment(s: &str) -> String {
    s.replace(['\n', '\r'], " ")
}

fn indent(out: &mut String, level: usize) {
    for _ in 0..level {
        out.push_str("  ");
    }
}

fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for ch in s.chars() {
        match ch {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            _ => out.push(ch),
        }
    }
    out.push('"');
    out
}

fn write_statements(out: &mut String, statements: &[Statement], level: usize) {
    for stmt in statements {
        indent(out, level);
        match stmt {
            Statement::Begin => out.push_str("begin\n"),
            Statement::Command(cmd) => {
                out.push_str(&format!(
                    "command serial={} kind={} code={} duration={} interrupt={} wait={}\n",
                    quote(&cmd.serial),
                    cmd.kind.as_str(),
                    quote(&cmd.code),
                    cmd.duration_seconds,
                    cmd.can_interrupt,
                    cmd.wait
                ));
            }
            Statement::Wait { seconds } => out.push_str(&format!("wait {}\n", seconds)),
            Statement::Repeat { times, body } => {
                out.push_str(&format!("repeat {} {{\n", times));
                write_statements(out, body, level + 1);
                indent(out, level);
                out.push_str("}\n");
            }
            Statement::Log { message } => out.push_str(&format!("log {}\n", quote(message))),
            Statement::Fail { message } => out.push_str(&format!("fail {}\n", quote(message))),
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Parsing
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Word(String),
    Str(String),
    Eq,
    Open,
    Close,
}

fn compile_error(line: usize, message: impl Into<String>) -> SandboxError {
    SandboxError::Compile {
        line,
        message: message.into(),
    }
}

fn tokenize(text: &str, line: usize) -> Result<Vec<Token>, SandboxError> {
    let mut tokens = Vec::new();
    let mut chars = text.chars().peekable();
    while let Some(&c) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '=' => {
                chars.next();
                tokens.push(Token::Eq);
            }
            '{' => {
                chars.next();
                tokens.push(Token::Open);
            }
            '}' => {
                chars.next();
                tokens.push(Token::Close);
            }
            '"' => {
                chars.next();
                let mut s = String::new();
                let mut closed = false;
                while let Some(ch) = chars.next() {
                    match ch {
                        '"' => {
                            closed = true;
                            break;
                        }
                        '\\' => match chars.next() {
                            Some('"') => s.push('"'),
                            Some('\\') => s.push('\\'),
                            Some('n') => s.push('\n'),
                            Some('r') => s.push('\r'),
                            Some('t') => s.push('\t'),
                            Some(other) => {
                                return Err(compile_error(line, format!("unknown escape \\{}", other)));
                            }
                            None => return Err(compile_error(line, "unterminated escape")),
                        },
                        _ => s.push(ch),
                    }
                }
                if !closed {
                    return Err(compile_error(line, "unterminated string"));
                }
                tokens.push(Token::Str(s));
            }
            _ => {
                let mut word = String::new();
                while let Some(&ch) = chars.peek() {
                    if ch.is_whitespace() || matches!(ch, '=' | '{' | '}' | '"') {
                        break;
                    }
                    word.push(ch);
                    chars.next();
                }
                tokens.push(Token::Word(word));
            }
        }
    }
    Ok(tokens)
}

/// Default limit on nested `repeat` bodies.
pub const DEFAULT_MAX_DEPTH: usize = 32;

/// Hard ceiling on nesting, whatever limit the caller asks for. Execution
/// and teardown of the statement tree recurse once per level.
pub const NESTING_CEILING: usize = 256;

/// Parse script text into statements, allowing [`DEFAULT_MAX_DEPTH`] levels
/// of nested `repeat`.
pub fn parse(code: &str) -> Result<Vec<Statement>, SandboxError> {
    parse_with_depth(code, DEFAULT_MAX_DEPTH)
}

/// Parse script text into statements.
///
/// Fails with [`SandboxError::Compile`] carrying the 1-based line number of
/// the first problem, including a `repeat` nested deeper than `max_depth`
/// (capped at [`NESTING_CEILING`]).
pub fn parse_with_depth(code: &str, max_depth: usize) -> Result<Vec<Statement>, SandboxError> {
    let max_depth = max_depth.min(NESTING_CEILING);
    // Stack of open bodies; the bottom entry is the top-level program.
    let mut stack: Vec<(usize, u32, Vec<Statement>)> = vec![(0, 0, Vec::new())];
    let mut last_line = 0;

    for (idx, raw) in code.lines().enumerate() {
        let line = idx + 1;
        last_line = line;
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let tokens = tokenize(trimmed, line)?;
        let Some(Token::Word(head)) = tokens.first() else {
            if tokens.as_slice() == [Token::Close] {
                if stack.len() == 1 {
                    return Err(compile_error(line, "unexpected `}`"));
                }
                if let Some((_, times, body)) = stack.pop() {
                    if let Some((_, _, parent)) = stack.last_mut() {
                        parent.push(Statement::Repeat { times, body });
                    }
                }
                continue;
            }
            return Err(compile_error(line, "expected a statement"));
        };
        let args = &tokens[1..];
        let stmt = match head.as_str() {
            "begin" => {
                expect_end(args, line)?;
                Statement::Begin
            }
            "wait" => {
                let seconds = match args {
                    [Token::Word(w)] => parse_seconds(w, line)?,
                    _ => return Err(compile_error(line, "usage: wait <seconds>")),
                };
                Statement::Wait { seconds }
            }
            "log" => Statement::Log {
                message: single_string(args, line, "log")?,
            },
            "fail" => Statement::Fail {
                message: single_string(args, line, "fail")?,
            },
            "command" => Statement::Command(parse_command(args, line)?),
            "repeat" => {
                let times = match args {
                    [Token::Word(w), Token::Open] => w
                        .parse::<u32>()
                        .map_err(|_| compile_error(line, format!("invalid repeat count {:?}", w)))?,
                    _ => return Err(compile_error(line, "usage: repeat <count> {")),
                };
                // The bottom entry is the program itself, so the new body's depth is `stack.len()`.
                if stack.len() > max_depth {
                    return Err(compile_error(
                        line,
                        format!("`repeat` nested deeper than {} levels", max_depth),
                    ));
                }
                stack.push((line, times, Vec::new()));
                continue;
            }
            other => return Err(compile_error(line, format!("unknown statement `{}`", other))),
        };
        if let Some((_, _, body)) = stack.last_mut() {
            body.push(stmt);
        }
    }

    if stack.len() > 1 {
        let (opened, _, _) = &stack[stack.len() - 1];
        return Err(compile_error(
            last_line.max(*opened),
            format!("`repeat` opened on line {} is never closed", opened),
        ));
    }
    Ok(stack.pop().map(|(_, _, body)| body).unwrap_or_default())
}

fn expect_end(args: &[Token], line: usize) -> Result<(), SandboxError> {
    if args.is_empty() {
        Ok(())
    } else {
        Err(compile_error(line, "unexpected arguments"))
    }
}

fn single_string(args: &[Token], line: usize, stmt: &str) -> Result<String, SandboxError> {
    match args {
        [Token::Str(s)] => Ok(s.clone()),
        _ => Err(compile_error(line, format!("usage: {} \"<message>\"", stmt))),
    }
}

fn parse_seconds(word: &str, line: usize) -> Result<f64, SandboxError> {
    match word.parse::<f64>() {
        Ok(v) if v.is_finite() && v >= 0.0 => Ok(v),
        _ => Err(compile_error(line, format!("invalid duration {:?}", word))),
    }
}

fn parse_bool(word: &str, line: usize, key: &str) -> Result<bool, SandboxError> {
    match word {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => Err(compile_error(line, format!("`{}` must be true or false", key))),
    }
}

fn parse_command(args: &[Token], line: usize) -> Result<DeviceCommand, SandboxError> {
    let mut serial = None;
    let mut kind = None;
    let mut code = None;
    let mut duration = None;
    let mut interrupt = None;
    let mut wait = None;

    let mut rest = args;
    while !rest.is_empty() {
        let (key, value) = match rest {
            [Token::Word(k), Token::Eq, v, tail @ ..] => {
                rest = tail;
                (k.as_str(), v)
            }
            _ => return Err(compile_error(line, "expected key=value")),
        };
        match (key, value) {
            ("serial", Token::Str(s)) => serial = Some(s.clone()),
            ("code", Token::Str(s)) => code = Some(s.clone()),
            ("kind", Token::Word(w)) => {
                kind = Some(
                    CatalogKind::parse(w)
                        .ok_or_else(|| compile_error(line, format!("unknown kind `{}`", w)))?,
                )
            }
            ("duration", Token::Word(w)) => {
                duration = Some(
                    w.parse::<u32>()
                        .map_err(|_| compile_error(line, format!("invalid duration {:?}", w)))?,
                )
            }
            ("interrupt", Token::Word(w)) => interrupt = Some(parse_bool(w, line, key)?),
            ("wait", Token::Word(w)) => wait = Some(parse_bool(w, line, key)?),
            _ => return Err(compile_error(line, format!("unexpected argument `{}`", key))),
        }
    }

    let missing = |name: &str| compile_error(line, format!("command is missing `{}`", name));
    Ok(DeviceCommand {
        serial: serial.ok_or_else(|| missing("serial"))?,
        kind: kind.ok_or_else(|| missing("kind"))?,
        code: code.ok_or_else(|| missing("code"))?,
        duration_seconds: duration.ok_or_else(|| missing("duration"))?,
        can_interrupt: interrupt.ok_or_else(|| missing("interrupt"))?,
        wait: wait.ok_or_else(|| missing("wait"))?,
    })
}

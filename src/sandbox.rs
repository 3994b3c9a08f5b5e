//! Isolated execution of compiled scripts.
//!
//! Scripts are parsed back into statements and walked by a small
//! interpreter instead of being evaluated by an embedded engine. The only
//! capability a script has is the injected [`CommandHook`]; it cannot reach
//! any other application state.
//!
//! Outcomes are classified as:
//!  - [`SandboxError::Compile`]: the script did not parse, nothing ran.
//!  - [`SandboxError::Runtime`]: execution aborted (hook failure, limits).
//!  - [`SandboxError::ExplicitFailure`]: a `fail` statement finished the run.
//!  - [`SandboxError::Busy`]: another run is in flight on this sandbox.

use crate::config::SandboxConfig;
use crate::error::SandboxError;
use crate::generator::script;
use crate::generator::{CompiledProgram, DeviceCommand, Statement};
use crate::notice::Notice;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, Ordering};

/// Issues one device command on behalf of a running script.
pub trait CommandHook {
    fn issue(&self, command: &DeviceCommand) -> Result<(), String>;
}

impl<F> CommandHook for F
where
    F: Fn(&DeviceCommand) -> Result<(), String>,
{
    fn issue(&self, command: &DeviceCommand) -> Result<(), String> {
        self(command)
    }
}

/// What a completed run did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunReport {
    pub commands_issued: usize,
    /// Sum of waits and awaited command durations.
    pub estimated_seconds: f64,
    /// Messages from `log` statements, in execution order.
    pub log: Vec<String>,
}

pub struct Sandbox<H: CommandHook> {
    hook: H,
    limits: SandboxConfig,
    busy: AtomicBool,
}

/// Clears the in-flight flag when a run ends, however it ends.
struct BusyGuard<'a>(&'a AtomicBool);

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl<H: CommandHook> Sandbox<H> {
    pub fn new(hook: H, limits: SandboxConfig) -> Self {
        Self {
            hook,
            limits,
            busy: AtomicBool::new(false),
        }
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Parse and execute a script.
    ///
    /// A call made while another run is executing on this sandbox is
    /// rejected with [`SandboxError::Busy`]; requests are never queued.
    pub fn run(&self, code: &str) -> Result<RunReport, SandboxError> {
        if self
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!("sandbox busy, run rejected");
            return Err(SandboxError::Busy);
        }
        let _guard = BusyGuard(&self.busy);

        let statements = script::parse_with_depth(code, self.limits.max_depth)?;
        let mut interp = Interpreter {
            hook: &self.hook,
            limits: &self.limits,
            steps: 0,
            report: RunReport::default(),
        };
        match interp.exec(&statements)? {
            Flow::Continue => {
                tracing::info!(
                    commands = interp.report.commands_issued,
                    seconds = interp.report.estimated_seconds,
                    "program finished"
                );
                Ok(interp.report)
            }
            Flow::Failed(message) => Err(SandboxError::ExplicitFailure(message)),
        }
    }

    pub fn run_program(&self, program: &CompiledProgram) -> Result<RunReport, SandboxError> {
        self.run(&program.code)
    }
}

enum Flow {
    Continue,
    Failed(String),
}

struct Interpreter<'a, H: CommandHook> {
    hook: &'a H,
    limits: &'a SandboxConfig,
    steps: usize,
    report: RunReport,
}

impl<H: CommandHook> Interpreter<'_, H> {
    fn step(&mut self) -> Result<(), SandboxError> {
        self.steps += 1;
        if self.steps > self.limits.max_steps {
            return Err(SandboxError::Runtime(format!(
                "step limit of {} exceeded",
                self.limits.max_steps
            )));
        }
        Ok(())
    }

    fn exec(&mut self, statements: &[Statement]) -> Result<Flow, SandboxError> {
        for stmt in statements {
            self.step()?;
            match stmt {
                Statement::Begin => {}
                Statement::Command(cmd) => self.issue(cmd)?,
                Statement::Wait { seconds } => self.report.estimated_seconds += seconds,
                Statement::Log { message } => self.report.log.push(message.clone()),
                Statement::Fail { message } => return Ok(Flow::Failed(message.clone())),
                Statement::Repeat { times, body } => {
                    if *times > self.limits.max_repeat {
                        return Err(SandboxError::Runtime(format!(
                            "repeat count {} exceeds the limit of {}",
                            times, self.limits.max_repeat
                        )));
                    }
                    for _ in 0..*times {
                        if let Flow::Failed(message) = self.exec(body)? {
                            return Ok(Flow::Failed(message));
                        }
                    }
                }
            }
        }
        Ok(Flow::Continue)
    }

    fn issue(&mut self, cmd: &DeviceCommand) -> Result<(), SandboxError> {
        let hook = self.hook;
        let result = catch_unwind(AssertUnwindSafe(|| hook.issue(cmd)))
            .unwrap_or_else(|_| Err("command hook panicked".to_string()));
        if let Err(e) = result {
            return Err(SandboxError::Runtime(format!(
                "{} `{}` on {} failed: {}",
                cmd.kind, cmd.code, cmd.serial, e
            )));
        }
        self.report.commands_issued += 1;
        if cmd.wait {
            self.report.estimated_seconds += f64::from(cmd.duration_seconds);
        }
        Ok(())
    }
}

/// The single notice shown for a run.
pub fn outcome_notice(result: &Result<RunReport, SandboxError>) -> Notice {
    match result {
        Ok(report) => Notice::info(format!(
            "Program finished: {} command(s) sent",
            report.commands_issued
        )),
        Err(SandboxError::Busy) => Notice::warning("A program is already running"),
        Err(e @ SandboxError::Compile { .. }) => {
            Notice::error(format!("Program could not be built, nothing was sent ({})", e))
        }
        Err(e) => Notice::error(e.to_string()),
    }
}

//! Compiled program representation.

use crate::model::{CatalogKind, DeviceModelId};

/// One device command, fully resolved for the target session.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceCommand {
    pub serial: String,
    pub kind: CatalogKind,
    pub code: String,
    pub duration_seconds: u32,
    pub can_interrupt: bool,
    /// Whether the program waits for `duration_seconds` before continuing.
    pub wait: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    Begin,
    Command(DeviceCommand),
    Wait { seconds: f64 },
    Repeat { times: u32, body: Vec<Statement> },
    Log { message: String },
    Fail { message: String },
}

impl Statement {
    /// Count of statements including nested bodies.
    pub fn count(statements: &[Statement]) -> usize {
        statements
            .iter()
            .map(|s| match s {
                Statement::Repeat { body, .. } => 1 + Statement::count(body),
                _ => 1,
            })
            .sum()
    }
}

/// Output of one compilation. Rebuilt whenever the diagram, the model or
/// the session serial changes; never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledProgram {
    pub device_model_id: DeviceModelId,
    pub session_serial: String,
    /// Script text, as consumed by the sandbox.
    pub code: String,
    pub statements: Vec<Statement>,
}

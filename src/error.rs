//! Error taxonomy for the compiler, sandbox, selection and dispatch layers.
//!
//! Each component recovers its own errors at its boundary; callers turn them
//! into a single [`Notice`](crate::notice::Notice) for the user. Storage and
//! configuration use `anyhow` instead, since their failures are plain I/O.

use crate::model::DeviceModelId;
use thiserror::Error;

/// Errors raised while interpreting catalog feeds.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CatalogError {
    #[error("catalog entry has no code")]
    MissingCode,

    #[error("catalog entry `{code}`: {message}")]
    InvalidEntry { code: String, message: String },
}

/// Errors raised while building a generator or compiling a diagram.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GenerateError {
    #[error("no device model selected")]
    NoModelSelected,

    #[error("device model `{0}` has no registered blocks")]
    ModelNotRegistered(DeviceModelId),

    #[error("block `{block_id}` uses type `{block_type}`, which model `{model}` does not provide")]
    UnknownBlock {
        block_id: String,
        block_type: String,
        model: DeviceModelId,
    },

    #[error("block `{block_id}` field `{field}`: {message}")]
    InvalidField {
        block_id: String,
        field: String,
        message: String,
    },
}

/// Classified outcome of a sandbox run that did not complete cleanly.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SandboxError {
    /// Another run is in flight on the same sandbox.
    #[error("a program is already running")]
    Busy,

    /// The script could not be parsed; no command was issued.
    #[error("compile error on line {line}: {message}")]
    Compile { line: usize, message: String },

    /// Execution aborted part way through.
    #[error("runtime error: {0}")]
    Runtime(String),

    /// The program finished but reported failure in its result.
    #[error("program reported failure: {0}")]
    ExplicitFailure(String),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SelectionError {
    #[error("multi-select is not available: {reason}")]
    MultiModeAuthorizationDenied { reason: String },
}

/// Pre-flight and surface errors of a dispatch call. Per-target failures are
/// never errors at this level; they are counted in the summary.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DispatchError {
    #[error("no robots selected")]
    NoTargetsSelected,

    #[error("all selected robots are offline: {}", offline.join(", "))]
    AllTargetsOffline { offline: Vec<String> },

    #[error("a command is already being sent")]
    Busy,
}

/// Why a preview run did not complete.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PreviewError {
    #[error(transparent)]
    Generate(#[from] GenerateError),

    #[error(transparent)]
    Sandbox(#[from] SandboxError),
}

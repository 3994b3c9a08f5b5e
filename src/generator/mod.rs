//! Block diagram compiler.
//!
//! This module provides:
//! - [`program`] – The statement IR and the [`CompiledProgram`] it lives in.
//! - [`compile`] – [`Generator`] construction and diagram traversal.
//! - [`script`] – Rendering statements to script text and parsing it back.
//! - [`session`] – Per-session generator caching across model switches.

pub mod compile;
pub mod program;
pub mod script;
pub mod session;

pub use compile::{Generator, build_generator, compile};
pub use program::{CompiledProgram, DeviceCommand, Statement};
pub use session::CompileSession;

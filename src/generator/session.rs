//! Generator lifecycle for one editing session.

use super::compile::{Generator, build_generator, compile};
use super::program::CompiledProgram;
use crate::catalog::CatalogRegistry;
use crate::error::GenerateError;
use crate::model::{DeviceModelId, ProgramDiagram};

/// Tracks the device model and serial of an editing session and caches the
/// generator built for them.
///
/// Changing either value drops the cached generator, so code compiled after
/// a model switch only ever uses the new model's action codes.
#[derive(Debug, Default)]
pub struct CompileSession {
    model: Option<DeviceModelId>,
    serial: String,
    generator: Option<Generator>,
}

impl CompileSession {
    pub fn new(model: Option<DeviceModelId>, serial: impl Into<String>) -> Self {
        Self {
            model,
            serial: serial.into(),
            generator: None,
        }
    }

    pub fn model(&self) -> Option<&DeviceModelId> {
        self.model.as_ref()
    }

    pub fn serial(&self) -> &str {
        &self.serial
    }

    /// Returns true if the model changed (and the generator was dropped).
    pub fn set_model(&mut self, model: DeviceModelId) -> bool {
        if self.model.as_ref() == Some(&model) {
            return false;
        }
        tracing::debug!(from = ?self.model, to = %model, "device model switched");
        self.model = Some(model);
        self.generator = None;
        true
    }

    /// Returns true if the serial changed (and the generator was dropped).
    pub fn set_serial(&mut self, serial: impl Into<String>) -> bool {
        let serial = serial.into();
        if self.serial == serial {
            return false;
        }
        self.serial = serial;
        self.generator = None;
        true
    }

    pub fn has_generator(&self) -> bool {
        self.generator.is_some()
    }

    /// The generator for the current model and serial, built on demand.
    pub fn generator(&mut self, registry: &CatalogRegistry) -> Result<&Generator, GenerateError> {
        let model = self.model.as_ref().ok_or(GenerateError::NoModelSelected)?;
        let stale = match &self.generator {
            Some(g) => g.model() != model || g.session_serial() != self.serial,
            None => true,
        };
        if stale {
            self.generator = Some(build_generator(registry, model, &self.serial)?);
        }
        self.generator.as_ref().ok_or(GenerateError::NoModelSelected)
    }

    pub fn compile(
        &mut self,
        registry: &CatalogRegistry,
        diagram: &ProgramDiagram,
    ) -> Result<CompiledProgram, GenerateError> {
        let generator = self.generator(registry)?;
        compile(diagram, generator)
    }
}

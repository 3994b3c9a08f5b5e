//! Diagram traversal and per-block emission.

use super::program::{CompiledProgram, DeviceCommand, Statement};
use super::script;
use crate::catalog::{CatalogRegistry, CatalogSnapshot};
use crate::error::GenerateError;
use crate::model::{BlockDefinition, BlockInstance, DeviceModelId, EmitRule, FieldValue, ProgramDiagram};

/// Emission rules for one (device model, session serial) pair.
///
/// A generator is tied to the model it was built for; action codes are
/// model-specific, so a new generator must be built after a model switch.
#[derive(Debug, Clone)]
pub struct Generator {
    model: DeviceModelId,
    session_serial: String,
    table: CatalogSnapshot,
}

impl Generator {
    pub fn model(&self) -> &DeviceModelId {
        &self.model
    }

    pub fn session_serial(&self) -> &str {
        &self.session_serial
    }

    pub fn rule(&self, block_type: &str) -> Option<&EmitRule> {
        self.table.get(block_type).map(|d| &d.emit)
    }

    fn definition(&self, block: &BlockInstance) -> Result<&BlockDefinition, GenerateError> {
        self.table
            .get(&block.block_type)
            .ok_or_else(|| GenerateError::UnknownBlock {
                block_id: block.id.clone(),
                block_type: block.block_type.clone(),
                model: self.model.clone(),
            })
    }

    /// Emit the statements for a sequence of sibling blocks, appending to `out`.
    fn emit_all(&self, blocks: &[BlockInstance], out: &mut Vec<Statement>) -> Result<(), GenerateError> {
        for block in blocks {
            self.emit(block, out)?;
        }
        Ok(())
    }

    fn emit(&self, block: &BlockInstance, out: &mut Vec<Statement>) -> Result<(), GenerateError> {
        let def = self.definition(block)?;
        let fields = Fields::resolve(def, block)?;
        match &def.emit {
            EmitRule::Repeat => {
                let times = fields.count("times")?;
                let mut body = Vec::new();
                self.emit_all(&block.children, &mut body)?;
                out.push(Statement::Repeat { times, body });
                // Children of a container are its body, not its continuation.
                return Ok(());
            }
            EmitRule::Begin => out.push(Statement::Begin),
            EmitRule::Wait => out.push(Statement::Wait {
                seconds: fields.seconds("seconds")?,
            }),
            EmitRule::Log => out.push(Statement::Log {
                message: fields.text("message")?,
            }),
            EmitRule::Fail => out.push(Statement::Fail {
                message: fields.text("message")?,
            }),
            EmitRule::Command {
                kind,
                code,
                duration_seconds,
                can_interrupt,
            } => out.push(Statement::Command(DeviceCommand {
                serial: self.session_serial.clone(),
                kind: *kind,
                code: code.clone(),
                duration_seconds: *duration_seconds,
                can_interrupt: *can_interrupt,
                wait: fields.flag("wait")?,
            })),
        }
        self.emit_all(&block.children, out)
    }
}

/// Field values of one instance, with definition defaults filled in.
struct Fields<'a> {
    block_id: &'a str,
    values: Vec<(&'a str, &'a FieldValue)>,
}

impl<'a> Fields<'a> {
    fn resolve(def: &'a BlockDefinition, block: &'a BlockInstance) -> Result<Self, GenerateError> {
        for name in block.fields.keys() {
            if def.field(name).is_none() {
                return Err(GenerateError::InvalidField {
                    block_id: block.id.clone(),
                    field: name.clone(),
                    message: format!("`{}` has no such field", def.block_type),
                });
            }
        }
        let mut values = Vec::with_capacity(def.fields.len());
        for spec in &def.fields {
            let value = block.fields.get(&spec.name).unwrap_or(&spec.default);
            if value.kind() != spec.kind {
                return Err(GenerateError::InvalidField {
                    block_id: block.id.clone(),
                    field: spec.name.clone(),
                    message: format!("expected {:?}, got {:?}", spec.kind, value.kind()),
                });
            }
            values.push((spec.name.as_str(), value));
        }
        Ok(Self {
            block_id: &block.id,
            values,
        })
    }

    fn get(&self, name: &str) -> Result<&'a FieldValue, GenerateError> {
        self.values
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, v)| *v)
            .ok_or_else(|| self.invalid(name, "missing"))
    }

    fn invalid(&self, field: &str, message: &str) -> GenerateError {
        GenerateError::InvalidField {
            block_id: self.block_id.to_string(),
            field: field.to_string(),
            message: message.to_string(),
        }
    }

    fn flag(&self, name: &str) -> Result<bool, GenerateError> {
        match self.get(name)? {
            FieldValue::Bool(b) => Ok(*b),
            _ => Err(self.invalid(name, "expected a flag")),
        }
    }

    fn text(&self, name: &str) -> Result<String, GenerateError> {
        match self.get(name)? {
            FieldValue::Text(s) => Ok(s.clone()),
            _ => Err(self.invalid(name, "expected text")),
        }
    }

    fn seconds(&self, name: &str) -> Result<f64, GenerateError> {
        match self.get(name)? {
            FieldValue::Number(v) if v.is_finite() && *v >= 0.0 => Ok(*v),
            FieldValue::Number(_) => Err(self.invalid(name, "must be a non-negative number")),
            _ => Err(self.invalid(name, "expected a number")),
        }
    }

    fn count(&self, name: &str) -> Result<u32, GenerateError> {
        match self.get(name)? {
            FieldValue::Number(v)
                if v.is_finite() && *v >= 0.0 && v.fract() == 0.0 && *v <= u32::MAX as f64 =>
            {
                Ok(*v as u32)
            }
            FieldValue::Number(_) => Err(self.invalid(name, "must be a whole non-negative number")),
            _ => Err(self.invalid(name, "expected a number")),
        }
    }
}

/// Build the generator for a registered model and a session serial.
pub fn build_generator(
    registry: &CatalogRegistry,
    model: &DeviceModelId,
    session_serial: &str,
) -> Result<Generator, GenerateError> {
    let table = registry
        .snapshot(model)
        .ok_or_else(|| GenerateError::ModelNotRegistered(model.clone()))?;
    Ok(Generator {
        model: model.clone(),
        session_serial: session_serial.to_string(),
        table,
    })
}

/// Compile a diagram with a generator.
///
/// Blocks are visited depth first in diagram order: a block's statement,
/// then its children, then its next sibling. The result depends only on the
/// diagram, the generator's catalog snapshot and its session serial.
pub fn compile(diagram: &ProgramDiagram, generator: &Generator) -> Result<CompiledProgram, GenerateError> {
    let mut statements = Vec::new();
    generator.emit_all(&diagram.blocks, &mut statements)?;
    let code = script::render(&generator.model, &generator.session_serial, &statements);
    tracing::debug!(
        model = %generator.model,
        statements = Statement::count(&statements),
        "compiled diagram"
    );
    Ok(CompiledProgram {
        device_model_id: generator.model.clone(),
        session_serial: generator.session_serial.clone(),
        code,
        statements,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::CatalogEntries;
    use crate::model::CatalogItem;

    fn registry() -> CatalogRegistry {
        let mut r = CatalogRegistry::new();
        r.register(
            "m".into(),
            &CatalogEntries {
                actions: vec![CatalogItem::new("wave", "Wave", 3)],
                ..Default::default()
            },
        );
        r
    }

    #[test]
    fn unknown_model_is_rejected() {
        let err = build_generator(&registry(), &"other".into(), "S1").unwrap_err();
        assert_eq!(err, GenerateError::ModelNotRegistered("other".into()));
    }

    #[test]
    fn unknown_field_is_rejected() {
        let generator = build_generator(&registry(), &"m".into(), "S1").unwrap();
        let diagram = ProgramDiagram::new(vec![
            BlockInstance::new("b1", "wait").with_field("speed", FieldValue::Number(1.0)),
        ]);
        assert!(matches!(
            compile(&diagram, &generator),
            Err(GenerateError::InvalidField { field, .. }) if field == "speed"
        ));
    }

    #[test]
    fn fractional_repeat_is_rejected() {
        let generator = build_generator(&registry(), &"m".into(), "S1").unwrap();
        let diagram = ProgramDiagram::new(vec![
            BlockInstance::new("r", "repeat").with_field("times", FieldValue::Number(1.5)),
        ]);
        assert!(compile(&diagram, &generator).is_err());
    }

    #[test]
    fn defaults_fill_missing_fields() {
        let generator = build_generator(&registry(), &"m".into(), "S1").unwrap();
        let diagram = ProgramDiagram::new(vec![BlockInstance::new("w", "wait")]);
        let program = compile(&diagram, &generator).unwrap();
        assert_eq!(program.statements, vec![Statement::Wait { seconds: 1.0 }]);
    }

    #[test]
    fn command_carries_session_serial() {
        let generator = build_generator(&registry(), &"m".into(), "S42").unwrap();
        let diagram = ProgramDiagram::new(vec![BlockInstance::new("a", "action:wave")]);
        let program = compile(&diagram, &generator).unwrap();
        match &program.statements[0] {
            Statement::Command(cmd) => {
                assert_eq!(cmd.serial, "S42");
                assert_eq!(cmd.duration_seconds, 3);
                assert!(cmd.wait);
            }
            other => panic!("unexpected statement {:?}", other),
        }
    }
}

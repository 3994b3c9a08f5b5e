//! Per-device-model block registry.
//!
//! Each device model ships catalogs of actions, extended actions,
//! expressions, dances and skills. [`CatalogRegistry::register`] turns those
//! catalogs into one [`BlockDefinition`] per entry, merges them with the
//! built-in control blocks, and keeps the result keyed by model. The
//! registry also tracks which model the editor palette currently shows.
//!
//! # Usage
//!
//! ```rust,ignore
//! use blocklink::catalog::{CatalogEntries, CatalogRegistry};
//!
//! let mut registry = CatalogRegistry::new();
//! let entries = CatalogEntries::from_json_str(&fetched_json)?;
//! registry.register("alpha-mini".into(), &entries);
//! let waves: Vec<_> = registry.search("wave");
//! ```

use crate::error::CatalogError;
use crate::model::{
    BlockDefinition, BlockShape, CatalogItem, CatalogKind, DeviceModelId, EmitRule, FieldKind,
    FieldSpec, FieldValue,
};
use anyhow::{Context, Result};
use indexmap::IndexMap;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

// ────────────────────────────────────────────────────────────────────────────
// Catalog feeds
// ────────────────────────────────────────────────────────────────────────────

/// Wire form of a catalog entry: a positional tuple or a record.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum RawCatalogItem {
    Tuple(Vec<serde_json::Value>),
    Record {
        code: String,
        name: String,
        #[serde(default)]
        duration_seconds: u32,
        #[serde(default = "default_true")]
        can_interrupt: bool,
        #[serde(default)]
        icon: Option<String>,
    },
}

fn default_true() -> bool {
    true
}

impl TryFrom<RawCatalogItem> for CatalogItem {
    type Error = CatalogError;

    fn try_from(raw: RawCatalogItem) -> Result<Self, Self::Error> {
        match raw {
            RawCatalogItem::Record {
                code,
                name,
                duration_seconds,
                can_interrupt,
                icon,
            } => {
                if code.trim().is_empty() {
                    return Err(CatalogError::MissingCode);
                }
                Ok(CatalogItem {
                    code,
                    name,
                    duration_seconds,
                    can_interrupt,
                    icon,
                })
            }
            RawCatalogItem::Tuple(values) => item_from_tuple(&values),
        }
    }
}

fn item_from_tuple(values: &[serde_json::Value]) -> Result<CatalogItem, CatalogError> {
    use serde_json::Value;

    let code = match values.first() {
        Some(Value::String(s)) if !s.trim().is_empty() => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => return Err(CatalogError::MissingCode),
    };
    let invalid = |message: String| CatalogError::InvalidEntry {
        code: code.clone(),
        message,
    };

    let name = match values.get(1) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => code.clone(),
        Some(other) => return Err(invalid(format!("name must be a string, got {}", other))),
    };

    let duration_seconds = match values.get(2) {
        None | Some(Value::Null) => 0,
        Some(Value::Number(n)) => match n.as_f64() {
            Some(v) if v >= 0.0 && v <= u32::MAX as f64 => v.round() as u32,
            _ => return Err(invalid(format!("duration out of range: {}", n))),
        },
        Some(Value::String(s)) => s
            .trim()
            .parse::<u32>()
            .map_err(|_| invalid(format!("duration is not a number: {:?}", s)))?,
        Some(other) => return Err(invalid(format!("duration must be a number, got {}", other))),
    };

    let can_interrupt = match values.get(3) {
        None | Some(Value::Null) => true,
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().is_some_and(|v| v != 0.0),
        Some(Value::String(s)) => match s.trim() {
            "1" | "true" => true,
            "0" | "false" => false,
            _ => return Err(invalid(format!("interrupt flag not understood: {:?}", s))),
        },
        Some(other) => return Err(invalid(format!("interrupt flag must be a bool, got {}", other))),
    };

    let icon = match values.get(4) {
        Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
        _ => None,
    };

    Ok(CatalogItem {
        code,
        name,
        duration_seconds,
        can_interrupt,
        icon,
    })
}

/// The complete set of catalogs fetched for one device model.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntries {
    #[serde(default)]
    pub actions: Vec<CatalogItem>,
    #[serde(default)]
    pub extended_actions: Vec<CatalogItem>,
    #[serde(default)]
    pub expressions: Vec<CatalogItem>,
    #[serde(default)]
    pub dances: Vec<CatalogItem>,
    #[serde(default)]
    pub skills: Vec<CatalogItem>,
}

impl CatalogEntries {
    pub fn from_json_str(text: &str) -> Result<Self> {
        serde_json::from_str(text).context("Failed to parse catalog JSON")
    }

    pub fn items(&self, kind: CatalogKind) -> &[CatalogItem] {
        match kind {
            CatalogKind::Action => &self.actions,
            CatalogKind::ExtendedAction => &self.extended_actions,
            CatalogKind::Expression => &self.expressions,
            CatalogKind::Dance => &self.dances,
            CatalogKind::Skill => &self.skills,
        }
    }

    pub fn items_mut(&mut self, kind: CatalogKind) -> &mut Vec<CatalogItem> {
        match kind {
            CatalogKind::Action => &mut self.actions,
            CatalogKind::ExtendedAction => &mut self.extended_actions,
            CatalogKind::Expression => &mut self.expressions,
            CatalogKind::Dance => &mut self.dances,
            CatalogKind::Skill => &mut self.skills,
        }
    }

    /// Total number of entries over all kinds.
    pub fn len(&self) -> usize {
        CatalogKind::ALL.iter().map(|k| self.items(*k).len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Built-in blocks
// ────────────────────────────────────────────────────────────────────────────

pub const CONTROL_CATEGORY: &str = "Control";

fn builtin(
    block_type: &str,
    display_name: &str,
    shape: BlockShape,
    fields: Vec<FieldSpec>,
    emit: EmitRule,
) -> BlockDefinition {
    BlockDefinition {
        block_type: block_type.to_string(),
        display_name: display_name.to_string(),
        category: CONTROL_CATEGORY.to_string(),
        shape,
        fields,
        icon: None,
        emit,
    }
}

fn build_builtins() -> Vec<BlockDefinition> {
    vec![
        builtin("start", "When program starts", BlockShape::Hat, vec![], EmitRule::Begin),
        builtin(
            "repeat",
            "Repeat",
            BlockShape::Container,
            vec![FieldSpec::new("times", FieldKind::Number, FieldValue::Number(2.0))],
            EmitRule::Repeat,
        ),
        builtin(
            "wait",
            "Wait",
            BlockShape::Statement,
            vec![FieldSpec::new("seconds", FieldKind::Number, FieldValue::Number(1.0))],
            EmitRule::Wait,
        ),
        builtin(
            "log",
            "Log message",
            BlockShape::Statement,
            vec![FieldSpec::new("message", FieldKind::Text, FieldValue::Text(String::new()))],
            EmitRule::Log,
        ),
        builtin(
            "fail",
            "Stop with error",
            BlockShape::Terminal,
            vec![FieldSpec::new(
                "message",
                FieldKind::Text,
                FieldValue::Text("stopped".to_string()),
            )],
            EmitRule::Fail,
        ),
    ]
}

/// Control blocks available for every model.
///
/// Built once on first access and shared for the lifetime of the process.
pub fn builtin_definitions() -> &'static [BlockDefinition] {
    static BUILTINS: Lazy<Vec<BlockDefinition>> = Lazy::new(build_builtins);
    &BUILTINS
}

// ────────────────────────────────────────────────────────────────────────────
// Registry
// ────────────────────────────────────────────────────────────────────────────

/// Every block definition available for one device model, keyed by block
/// type in palette order.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockTable {
    pub model: DeviceModelId,
    pub definitions: IndexMap<String, BlockDefinition>,
}

impl BlockTable {
    fn build(model: DeviceModelId, entries: &CatalogEntries) -> Self {
        let mut definitions: IndexMap<String, BlockDefinition> = IndexMap::new();
        for def in builtin_definitions() {
            definitions.insert(def.block_type.clone(), def.clone());
        }
        for kind in CatalogKind::ALL {
            for item in entries.items(kind) {
                let def = BlockDefinition::from_catalog(kind, item);
                if definitions.contains_key(&def.block_type) {
                    tracing::warn!(
                        model = %model,
                        block_type = %def.block_type,
                        "duplicate catalog code, keeping the first entry"
                    );
                    continue;
                }
                definitions.insert(def.block_type.clone(), def);
            }
        }
        Self { model, definitions }
    }

    pub fn get(&self, block_type: &str) -> Option<&BlockDefinition> {
        self.definitions.get(block_type)
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}

/// Shared, immutable view of one model's blocks.
pub type CatalogSnapshot = Arc<BlockTable>;

/// A palette category with its block definitions.
#[derive(Debug, Clone)]
pub struct PaletteCategory {
    pub name: String,
    pub entries: Vec<BlockDefinition>,
}

/// Block definitions for every registered device model.
#[derive(Debug, Default)]
pub struct CatalogRegistry {
    tables: BTreeMap<DeviceModelId, CatalogSnapshot>,
    active_model: Option<DeviceModelId>,
}

impl CatalogRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the blocks derived from a model's complete catalog.
    ///
    /// Returns `false` without touching anything if the model is already
    /// registered. On first registration the model also becomes the active
    /// palette model. The catalog must be fully loaded; a partial catalog
    /// would be registered as-is and never refreshed.
    pub fn register(&mut self, model: DeviceModelId, entries: &CatalogEntries) -> bool {
        if self.tables.contains_key(&model) {
            tracing::debug!(model = %model, "model already registered");
            return false;
        }
        let table = BlockTable::build(model.clone(), entries);
        tracing::debug!(model = %model, blocks = table.len(), "registered block definitions");
        self.tables.insert(model.clone(), Arc::new(table));
        self.active_model = Some(model);
        true
    }

    pub fn is_registered(&self, model: &DeviceModelId) -> bool {
        self.tables.contains_key(model)
    }

    /// Registered models in sorted order.
    pub fn models(&self) -> impl Iterator<Item = &DeviceModelId> {
        self.tables.keys()
    }

    pub fn snapshot(&self, model: &DeviceModelId) -> Option<CatalogSnapshot> {
        self.tables.get(model).cloned()
    }

    pub fn definition(&self, model: &DeviceModelId, block_type: &str) -> Option<&BlockDefinition> {
        self.tables.get(model).and_then(|t| t.get(block_type))
    }

    /// Switch the palette to another registered model. Returns `false` if
    /// the model is unknown.
    pub fn set_active_model(&mut self, model: &DeviceModelId) -> bool {
        if !self.tables.contains_key(model) {
            return false;
        }
        self.active_model = Some(model.clone());
        true
    }

    pub fn active_model(&self) -> Option<&DeviceModelId> {
        self.active_model.as_ref()
    }

    /// Blocks of the active model grouped by category, in registration order.
    pub fn palette(&self) -> Vec<PaletteCategory> {
        let Some(table) = self.active_table() else {
            return Vec::new();
        };
        let mut cat_map: IndexMap<String, Vec<BlockDefinition>> = IndexMap::new();
        for def in table.definitions.values() {
            cat_map
                .entry(def.category.clone())
                .or_default()
                .push(def.clone());
        }
        cat_map
            .into_iter()
            .map(|(name, entries)| PaletteCategory { name, entries })
            .collect()
    }

    /// Blocks of the active model matching a search query.
    pub fn search(&self, query: &str) -> Vec<&BlockDefinition> {
        match self.active_table() {
            Some(table) => table
                .definitions
                .values()
                .filter(|d| d.matches_query(query))
                .collect(),
            None => Vec::new(),
        }
    }

    fn active_table(&self) -> Option<&CatalogSnapshot> {
        self.active_model.as_ref().and_then(|m| self.tables.get(m))
    }
}

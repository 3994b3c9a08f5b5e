use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

// ────────────────────────────────────────────────────────────────────────────
// Device models
// ────────────────────────────────────────────────────────────────────────────

/// Identifies a robot device model. Catalogs, block definitions and saved
/// diagrams are all keyed by it.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceModelId(pub String);

impl DeviceModelId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceModelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceModelId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for DeviceModelId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Catalog items
// ────────────────────────────────────────────────────────────────────────────

/// The catalog a device command comes from. Also used as the dispatch type
/// handed to the transport, since the device interprets a code relative to
/// its catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CatalogKind {
    Action,
    ExtendedAction,
    Expression,
    Dance,
    Skill,
}

impl CatalogKind {
    /// Every kind, in palette order.
    pub const ALL: [CatalogKind; 5] = [
        CatalogKind::Action,
        CatalogKind::ExtendedAction,
        CatalogKind::Expression,
        CatalogKind::Dance,
        CatalogKind::Skill,
    ];

    /// Stable identifier used in block types and scripts.
    pub fn as_str(self) -> &'static str {
        match self {
            CatalogKind::Action => "action",
            CatalogKind::ExtendedAction => "extended_action",
            CatalogKind::Expression => "expression",
            CatalogKind::Dance => "dance",
            CatalogKind::Skill => "skill",
        }
    }

    /// Palette category label.
    pub fn category(self) -> &'static str {
        match self {
            CatalogKind::Action => "Actions",
            CatalogKind::ExtendedAction => "Extended Actions",
            CatalogKind::Expression => "Expressions",
            CatalogKind::Dance => "Dances",
            CatalogKind::Skill => "Skills",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == s)
    }
}

impl fmt::Display for CatalogKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One named, timed entry of a device model's catalog.
///
/// Deserializes either from a record or from the positional tuple form
/// `[code, name, duration, can_interrupt, icon]` delivered by catalog feeds;
/// trailing tuple elements are optional.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "crate::catalog::RawCatalogItem")]
pub struct CatalogItem {
    pub code: String,
    pub name: String,
    pub duration_seconds: u32,
    pub can_interrupt: bool,
    pub icon: Option<String>,
}

impl CatalogItem {
    pub fn new(code: impl Into<String>, name: impl Into<String>, duration_seconds: u32) -> Self {
        Self {
            code: code.into(),
            name: name.into(),
            duration_seconds,
            can_interrupt: true,
            icon: None,
        }
    }

    pub fn uninterruptible(mut self) -> Self {
        self.can_interrupt = false;
        self
    }

    pub fn with_icon(mut self, icon: impl Into<String>) -> Self {
        self.icon = Some(icon.into());
        self
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Block definitions
// ────────────────────────────────────────────────────────────────────────────

/// Visual shape of a block in the editor palette.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlockShape {
    /// Starts a stack; nothing attaches above it.
    Hat,
    /// Ordinary stackable statement.
    Statement,
    /// Holds a nested body of child blocks.
    Container,
    /// Ends a stack; nothing attaches below it.
    Terminal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldKind {
    Bool,
    Number,
    Text,
}

/// An input field on a block, with the value used when the instance leaves
/// it unset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    pub kind: FieldKind,
    pub default: FieldValue,
}

impl FieldSpec {
    pub fn new(name: &str, kind: FieldKind, default: FieldValue) -> Self {
        Self {
            name: name.to_string(),
            kind,
            default,
        }
    }
}

/// How a block turns into a statement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EmitRule {
    Begin,
    Repeat,
    Wait,
    Log,
    Fail,
    /// Invoke one device command with the embedded catalog data.
    Command {
        kind: CatalogKind,
        code: String,
        duration_seconds: u32,
        can_interrupt: bool,
    },
}

/// A block type available in the palette for some device model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockDefinition {
    /// Unique key within a model (`"start"`, `"action:wave"`, ...).
    pub block_type: String,
    pub display_name: String,
    pub category: String,
    pub shape: BlockShape,
    pub fields: Vec<FieldSpec>,
    pub icon: Option<String>,
    pub emit: EmitRule,
}

impl BlockDefinition {
    /// Block type key for a catalog entry.
    pub fn catalog_block_type(kind: CatalogKind, code: &str) -> String {
        format!("{}:{}", kind.as_str(), code)
    }

    /// Derive the definition for a catalog entry.
    pub fn from_catalog(kind: CatalogKind, item: &CatalogItem) -> Self {
        Self {
            block_type: Self::catalog_block_type(kind, &item.code),
            display_name: item.name.clone(),
            category: kind.category().to_string(),
            shape: BlockShape::Statement,
            fields: vec![FieldSpec::new("wait", FieldKind::Bool, FieldValue::Bool(true))],
            icon: item.icon.clone(),
            emit: EmitRule::Command {
                kind,
                code: item.code.clone(),
                duration_seconds: item.duration_seconds,
                can_interrupt: item.can_interrupt,
            },
        }
    }

    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Case-insensitive substring match on type, display name or category.
    pub fn matches_query(&self, query: &str) -> bool {
        if query.is_empty() {
            return true;
        }
        let q = query.to_lowercase();
        self.block_type.to_lowercase().contains(&q)
            || self.display_name.to_lowercase().contains(&q)
            || self.category.to_lowercase().contains(&q)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Diagrams
// ────────────────────────────────────────────────────────────────────────────

/// Value of a block instance field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldValue {
    Bool(bool),
    Number(f64),
    Text(String),
}

impl FieldValue {
    pub fn kind(&self) -> FieldKind {
        match self {
            FieldValue::Bool(_) => FieldKind::Bool,
            FieldValue::Number(_) => FieldKind::Number,
            FieldValue::Text(_) => FieldKind::Text,
        }
    }
}

/// One placed block in a diagram.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockInstance {
    /// Editor-assigned identifier, unique within the diagram.
    pub id: String,
    #[serde(rename = "type")]
    pub block_type: String,
    #[serde(default)]
    pub fields: IndexMap<String, FieldValue>,
    /// Nested body (only meaningful for container blocks).
    #[serde(default)]
    pub children: Vec<BlockInstance>,
}

impl BlockInstance {
    pub fn new(id: impl Into<String>, block_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            block_type: block_type.into(),
            fields: IndexMap::new(),
            children: Vec::new(),
        }
    }

    pub fn with_field(mut self, name: &str, value: FieldValue) -> Self {
        self.fields.insert(name.to_string(), value);
        self
    }

    pub fn with_children(mut self, children: Vec<BlockInstance>) -> Self {
        self.children = children;
        self
    }
}

/// The user's program: an ordered forest of block stacks, top to bottom.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProgramDiagram {
    #[serde(default)]
    pub blocks: Vec<BlockInstance>,
}

impl ProgramDiagram {
    pub fn new(blocks: Vec<BlockInstance>) -> Self {
        Self { blocks }
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Number of block instances at every depth.
    pub fn block_count(&self) -> usize {
        fn count(blocks: &[BlockInstance]) -> usize {
            blocks.iter().map(|b| 1 + count(&b.children)).sum()
        }
        count(&self.blocks)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// DiagramDoc – binary serialization wrapper
// ────────────────────────────────────────────────────────────────────────────

const MAGIC: &[u8; 9] = b"BLOCKLINK";
const VERSION: u32 = 1;

/// A saved diagram together with the slot it was saved under.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagramDoc {
    pub namespace: String,
    pub device_model_id: DeviceModelId,
    pub diagram: ProgramDiagram,
}

impl DiagramDoc {
    /// Encode with magic bytes and a format version in front of the bincode body.
    pub fn encode_binary(&self) -> anyhow::Result<Vec<u8>> {
        let mut out = Vec::with_capacity(256);
        out.extend_from_slice(MAGIC);
        out.extend_from_slice(&VERSION.to_le_bytes());
        bincode::serde::encode_into_std_write(self, &mut out, bincode::config::standard())?;
        Ok(out)
    }

    /// Decode bytes written by [`DiagramDoc::encode_binary`], checking magic and version.
    pub fn decode_binary(bytes: &[u8]) -> anyhow::Result<Self> {
        let mut reader = bytes;
        let mut magic = [0u8; 9];
        std::io::Read::read_exact(&mut reader, &mut magic)?;
        if &magic != MAGIC {
            anyhow::bail!("Invalid magic bytes: expected 'BLOCKLINK'");
        }
        let mut version_bytes = [0u8; 4];
        std::io::Read::read_exact(&mut reader, &mut version_bytes)?;
        let version = u32::from_le_bytes(version_bytes);
        if version != VERSION {
            anyhow::bail!("Unsupported version: {}", version);
        }
        let doc: DiagramDoc =
            bincode::serde::decode_from_std_read(&mut reader, bincode::config::standard())?;
        Ok(doc)
    }
}

//! Persistence of diagrams, one slot per namespace and device model.
//!
//! Slots live behind a [`StorageBackend`]. [`FsBackend`] keeps one file per
//! slot under `<root>/<namespace>/`; [`MemoryBackend`] is for tests and
//! embedding. Loading a slot that was never saved yields an empty diagram.

use crate::config::{StoreConfig, StoreFormat};
use crate::model::{DeviceModelId, DiagramDoc, ProgramDiagram};
use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use std::collections::BTreeMap;
use std::sync::Mutex;

/// Address of one stored slot. Both parts are already file-safe.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SlotKey {
    pub namespace: String,
    pub name: String,
}

impl SlotKey {
    /// Key for raw namespace and slot names; both are encoded.
    pub fn new(namespace: &str, name: &str) -> Self {
        Self {
            namespace: encode_component(namespace),
            name: encode_component(name),
        }
    }
}

/// Encode arbitrary text as a single path component.
///
/// ASCII letters, digits, `-`, `_` and non-leading `.` pass through; every
/// other byte becomes `%XX`. The empty string becomes a lone `%`. Distinct
/// inputs always give distinct outputs.
pub fn encode_component(raw: &str) -> String {
    if raw.is_empty() {
        return "%".to_string();
    }
    let mut out = String::with_capacity(raw.len());
    for (i, b) in raw.bytes().enumerate() {
        let keep = b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_') || (b == b'.' && i > 0);
        if keep {
            out.push(b as char);
        } else {
            out.push_str(&format!("%{:02X}", b));
        }
    }
    out
}

/// Byte storage for slots.
pub trait StorageBackend: Send + Sync {
    /// `None` when the slot does not exist.
    fn read(&self, key: &SlotKey) -> Result<Option<Vec<u8>>>;
    fn write(&self, key: &SlotKey, bytes: &[u8]) -> Result<()>;
    /// Returns whether anything was removed.
    fn delete(&self, key: &SlotKey) -> Result<bool>;
    fn keys(&self, namespace: &str) -> Result<Vec<SlotKey>>;
}

/// Stores each slot as `<root>/<namespace>/<name>`.
pub struct FsBackend {
    root: Utf8PathBuf,
}

impl FsBackend {
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    fn path(&self, key: &SlotKey) -> Utf8PathBuf {
        self.root.join(&key.namespace).join(&key.name)
    }
}

impl StorageBackend for FsBackend {
    fn read(&self, key: &SlotKey) -> Result<Option<Vec<u8>>> {
        let path = self.path(key);
        match std::fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("Failed to read {}", path)),
        }
    }

    fn write(&self, key: &SlotKey, bytes: &[u8]) -> Result<()> {
        let path = self.path(key);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_context(|| format!("Create {}", parent))?;
        }
        std::fs::write(&path, bytes).with_context(|| format!("Failed to write {}", path))
    }

    fn delete(&self, key: &SlotKey) -> Result<bool> {
        let path = self.path(key);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e).with_context(|| format!("Failed to remove {}", path)),
        }
    }

    fn keys(&self, namespace: &str) -> Result<Vec<SlotKey>> {
        let namespace = encode_component(namespace);
        let dir = self.root.join(&namespace);
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut keys = Vec::new();
        for entry in walkdir::WalkDir::new(&dir)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name()
        {
            let entry = entry.with_context(|| format!("Walk {}", dir))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let Some(name) = entry.file_name().to_str() else {
                tracing::warn!(path = %entry.path().display(), "skipping non-UTF8 slot file");
                continue;
            };
            keys.push(SlotKey {
                namespace: namespace.clone(),
                name: name.to_string(),
            });
        }
        Ok(keys)
    }
}

/// Slots held in process memory.
#[derive(Default)]
pub struct MemoryBackend {
    slots: Mutex<BTreeMap<SlotKey, Vec<u8>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, BTreeMap<SlotKey, Vec<u8>>>> {
        self.slots
            .lock()
            .map_err(|_| anyhow::anyhow!("memory store lock poisoned"))
    }
}

impl StorageBackend for MemoryBackend {
    fn read(&self, key: &SlotKey) -> Result<Option<Vec<u8>>> {
        Ok(self.lock()?.get(key).cloned())
    }

    fn write(&self, key: &SlotKey, bytes: &[u8]) -> Result<()> {
        self.lock()?.insert(key.clone(), bytes.to_vec());
        Ok(())
    }

    fn delete(&self, key: &SlotKey) -> Result<bool> {
        Ok(self.lock()?.remove(key).is_some())
    }

    fn keys(&self, namespace: &str) -> Result<Vec<SlotKey>> {
        let namespace = encode_component(namespace);
        Ok(self
            .lock()?
            .keys()
            .filter(|k| k.namespace == namespace)
            .cloned()
            .collect())
    }
}

impl StoreFormat {
    fn extension(self) -> &'static str {
        match self {
            StoreFormat::Json => "json",
            StoreFormat::Binary => "bin",
        }
    }

    fn encode(self, doc: &DiagramDoc) -> Result<Vec<u8>> {
        match self {
            StoreFormat::Json => Ok(serde_json::to_vec_pretty(doc)?),
            StoreFormat::Binary => doc.encode_binary(),
        }
    }

    fn decode(self, bytes: &[u8]) -> Result<DiagramDoc> {
        match self {
            StoreFormat::Json => Ok(serde_json::from_slice(bytes)?),
            StoreFormat::Binary => DiagramDoc::decode_binary(bytes),
        }
    }
}

/// Saves and loads diagrams keyed by `(namespace, device model)`.
pub struct DiagramStore {
    backend: Box<dyn StorageBackend>,
    format: StoreFormat,
}

impl DiagramStore {
    pub fn new(backend: Box<dyn StorageBackend>, format: StoreFormat) -> Self {
        Self { backend, format }
    }

    /// Filesystem store as described by the `[store]` config section.
    pub fn from_config(config: &StoreConfig) -> Self {
        Self::new(Box::new(FsBackend::new(config.root.clone())), config.format)
    }

    pub fn in_memory(format: StoreFormat) -> Self {
        Self::new(Box::new(MemoryBackend::new()), format)
    }

    pub fn format(&self) -> StoreFormat {
        self.format
    }

    fn key(&self, namespace: &str, model: &DeviceModelId) -> SlotKey {
        SlotKey {
            namespace: encode_component(namespace),
            name: format!("{}.{}", encode_component(model.as_str()), self.format.extension()),
        }
    }

    pub fn save(&self, namespace: &str, model: &DeviceModelId, diagram: &ProgramDiagram) -> Result<()> {
        let doc = DiagramDoc {
            namespace: namespace.to_string(),
            device_model_id: model.clone(),
            diagram: diagram.clone(),
        };
        let bytes = self.format.encode(&doc)?;
        self.backend
            .write(&self.key(namespace, model), &bytes)
            .with_context(|| format!("Failed to save diagram {}/{}", namespace, model))?;
        tracing::debug!(namespace, %model, blocks = diagram.block_count(), "diagram saved");
        Ok(())
    }

    /// Load a slot; a slot that was never saved gives an empty diagram.
    pub fn load(&self, namespace: &str, model: &DeviceModelId) -> Result<ProgramDiagram> {
        let Some(bytes) = self.backend.read(&self.key(namespace, model))? else {
            return Ok(ProgramDiagram::default());
        };
        let doc = self
            .format
            .decode(&bytes)
            .with_context(|| format!("Corrupt diagram slot {}/{}", namespace, model))?;
        if doc.namespace != namespace || doc.device_model_id != *model {
            anyhow::bail!(
                "Slot for {}/{} holds the diagram of {}/{}",
                namespace,
                model,
                doc.namespace,
                doc.device_model_id
            );
        }
        Ok(doc.diagram)
    }

    pub fn remove(&self, namespace: &str, model: &DeviceModelId) -> Result<bool> {
        self.backend.delete(&self.key(namespace, model))
    }

    /// Device models with a saved diagram in `namespace`.
    pub fn list(&self, namespace: &str) -> Result<Vec<DeviceModelId>> {
        let suffix = format!(".{}", self.format.extension());
        let mut models = Vec::new();
        for key in self.backend.keys(namespace)? {
            if !key.name.ends_with(&suffix) {
                continue;
            }
            let Some(bytes) = self.backend.read(&key)? else {
                continue;
            };
            match self.format.decode(&bytes) {
                Ok(doc) if doc.namespace == namespace && key == self.key(namespace, &doc.device_model_id) => {
                    models.push(doc.device_model_id)
                }
                Ok(doc) => tracing::warn!(slot = %key.name, owner = %doc.device_model_id, "skipping misplaced slot"),
                Err(e) => tracing::warn!(slot = %key.name, error = %e, "skipping unreadable slot"),
            }
        }
        Ok(models)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encoding_keeps_safe_chars() {
        assert_eq!(encode_component("robot-v2_beta.1"), "robot-v2_beta.1");
        assert_eq!(encode_component("a/b\\c d"), "a%2Fb%5Cc%20d");
        assert_eq!(encode_component("../etc"), "%2E.%2Fetc");
        assert_eq!(encode_component(""), "%");
    }

    #[test]
    fn encoding_is_injective_for_lookalikes() {
        let raw = ["alpha/mini", "alpha_mini", "alpha%2Fmini", "alpha mini", "", "%", ".x", "%2Ex"];
        let encoded: std::collections::HashSet<String> = raw.iter().map(|r| encode_component(r)).collect();
        assert_eq!(encoded.len(), raw.len());
    }

    #[test]
    fn memory_keys_are_scoped_by_namespace() {
        let backend = MemoryBackend::new();
        backend.write(&SlotKey::new("a", "x.json"), b"1").unwrap();
        backend.write(&SlotKey::new("b", "y.json"), b"2").unwrap();
        let keys = backend.keys("a").unwrap();
        assert_eq!(keys, vec![SlotKey::new("a", "x.json")]);
        assert!(backend.delete(&keys[0]).unwrap());
        assert!(!backend.delete(&keys[0]).unwrap());
    }
}

//! Runtime configuration loaded from a TOML file.
//!
//! ```toml
//! [dispatch]
//! max_concurrency = 8
//!
//! [sandbox]
//! max_steps = 10000
//! max_repeat = 1000
//! max_depth = 32
//!
//! [store]
//! root = "diagrams"
//! format = "json"   # or "binary"
//! ```
//!
//! Every key is optional; a missing file yields [`Config::default`].

use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub dispatch: DispatchConfig,
    pub sandbox: SandboxConfig,
    pub store: StoreConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Upper bound on sends in flight at once for one dispatch call.
    pub max_concurrency: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self { max_concurrency: 8 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    /// Statements a single run may execute, counting every loop iteration.
    pub max_steps: usize,
    /// Largest accepted `repeat` count.
    pub max_repeat: u32,
    /// Deepest accepted `repeat` nesting. Values above
    /// [`NESTING_CEILING`](crate::generator::script::NESTING_CEILING) are capped.
    pub max_depth: usize,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            max_steps: 10_000,
            max_repeat: 1_000,
            max_depth: crate::generator::script::DEFAULT_MAX_DEPTH,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreFormat {
    #[default]
    Json,
    Binary,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub root: Utf8PathBuf,
    pub format: StoreFormat,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            root: Utf8PathBuf::from("diagrams"),
            format: StoreFormat::Json,
        }
    }
}

impl Config {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Config = toml::from_str(text).context("Failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from `path`, falling back to defaults if the file
    /// does not exist.
    pub fn load(path: impl AsRef<Utf8Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::debug!(%path, "no configuration file, using defaults");
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path))?;
        Self::from_toml_str(&text).with_context(|| format!("Invalid configuration in {}", path))
    }

    pub fn save(&self, path: impl AsRef<Utf8Path>) -> Result<()> {
        let path = path.as_ref();
        let text = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            if !parent.as_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| format!("Create {}", parent))?;
            }
        }
        std::fs::write(path, text).with_context(|| format!("Failed to write {}", path))?;
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.dispatch.max_concurrency == 0 {
            anyhow::bail!("dispatch.max_concurrency must be at least 1");
        }
        if self.sandbox.max_steps == 0 {
            anyhow::bail!("sandbox.max_steps must be at least 1");
        }
        Ok(())
    }
}

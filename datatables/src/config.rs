// Settings - read from .datatables.yaml at the vault root

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const SETTINGS_FILE: &str = ".datatables.yaml";

/// Hard upper bound on parse workers, regardless of host parallelism.
pub const MAX_WORKERS: usize = 4;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub schema: SchemaSettings,
    pub loader: LoaderSettings,
    pub persist: PersistSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchemaSettings {
    /// Vault folder holding the schema file. Must exist before the file can be created.
    pub folder: String,
    pub file: String,
    pub template_dir: String,
    pub items_dir: String,
}

impl Default for SchemaSettings {
    fn default() -> Self {
        SchemaSettings {
            folder: "Schemas".into(),
            file: "datatables.json".into(),
            template_dir: "Templates".into(),
            items_dir: "Items".into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderSettings {
    pub max_workers: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistSettings {
    pub debounce_ms: u64,
    pub on_corruption: CorruptionPolicy,
}

impl Default for PersistSettings {
    fn default() -> Self {
        PersistSettings {
            debounce_ms: 100,
            on_corruption: CorruptionPolicy::Abort,
        }
    }
}

/// What to do when the in-memory schema no longer survives a serialize/parse round trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorruptionPolicy {
    /// Terminate the process. Nothing is written.
    Abort,
    /// Fail the pending persist call. Nothing is written.
    Reject,
}

impl Settings {
    /// Load settings from `<root>/.datatables.yaml`, falling back to defaults when absent.
    pub fn load(root: &Path) -> Result<Self> {
        let path = root.join(SETTINGS_FILE);
        if !path.is_file() {
            return Ok(Settings::default());
        }

        let content = std::fs::read_to_string(&path)?;
        Self::from_yaml_str(&content)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self> {
        if content.trim().is_empty() {
            return Ok(Settings::default());
        }
        Ok(serde_yaml::from_str(content)?)
    }

    /// Vault-relative path of the schema file.
    pub fn schema_path(&self) -> String {
        let folder = self.schema.folder.trim_end_matches('/');
        if folder.is_empty() {
            self.schema.file.clone()
        } else {
            format!("{folder}/{}", self.schema.file)
        }
    }

    /// Number of parse workers: `min(max_workers, 4, available parallelism)`, at least one.
    pub fn worker_count(&self) -> usize {
        let parallelism = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        let cap = MAX_WORKERS.min(parallelism);

        self.loader.max_workers.unwrap_or(cap).clamp(1, cap)
    }
}

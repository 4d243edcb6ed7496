use crate::config::Settings;
use crate::document::ParserRegistry;
use crate::error::{DatatablesError, Result};
use crate::index::Index;
use crate::schema::SchemaLoader;
use crate::vault::{BroadcastSink, ChangeEvent, LocalVault, Vault, VaultEvent};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::broadcast;

const EVENT_CAPACITY: usize = 256;

/// The main entry point.
/// Opens a vault, loads (or creates) the schema and indexes every document.
pub struct Store {
    root: Option<PathBuf>,
    settings: Settings,
    vault: Arc<dyn Vault>,
    schema: SchemaLoader,
    index: Index,
    events: Option<BroadcastSink>,
}

impl Store {
    /// Open the vault rooted at `path`, reading `.datatables.yaml` if present.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let root = path.as_ref().to_path_buf();
        if !root.is_dir() {
            return Err(DatatablesError::Other(format!(
                "Vault directory does not exist: {}",
                root.display()
            )));
        }

        let settings = Settings::load(&root)?;
        let events = BroadcastSink::new(EVENT_CAPACITY);
        let vault = Arc::new(LocalVault::new(&root, Arc::new(events.clone())));

        let mut store = Self::with_vault(vault, settings).await?;
        store.root = Some(root);
        store.events = Some(events);
        Ok(store)
    }

    /// Build a store over any vault with the default parsers.
    pub async fn with_vault(vault: Arc<dyn Vault>, settings: Settings) -> Result<Self> {
        Self::with_registry(vault, settings, ParserRegistry::default()).await
    }

    pub async fn with_registry(
        vault: Arc<dyn Vault>,
        settings: Settings,
        registry: ParserRegistry,
    ) -> Result<Self> {
        let schema = SchemaLoader::create(vault.clone(), &settings).await?;
        let index = Index::create(
            vault.clone(),
            schema.schema(),
            Arc::new(registry),
            &settings,
        )
        .await?;

        Ok(Store {
            root: None,
            settings,
            vault,
            schema,
            index,
            events: None,
        })
    }

    /// Filesystem root, for stores opened with `open`.
    pub fn root(&self) -> Option<&Path> {
        self.root.as_deref()
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn vault(&self) -> &Arc<dyn Vault> {
        &self.vault
    }

    pub fn schema(&self) -> &SchemaLoader {
        &self.schema
    }

    pub fn index(&self) -> &Index {
        &self.index
    }

    /// Change notifications, for stores opened with `open`.
    pub fn subscribe(&self) -> Option<broadcast::Receiver<ChangeEvent>> {
        self.events.as_ref().map(BroadcastSink::subscribe)
    }

    /// Forward a host change notification to the index.
    pub async fn handle_event(&self, event: VaultEvent) -> Result<()> {
        self.index.handle_event(event).await
    }

    /// Summary of the store as JSON.
    pub fn status(&self) -> serde_json::Value {
        let summary = self.index.summary();
        let schema = self.schema.snapshot();
        let tags = self.index.with_tags(|tags| tags.all_tags().len());

        json!({
            "schema": {
                "path": self.schema.file().path,
                "version": schema.version,
                "tables": schema.tables.keys().collect::<Vec<_>>(),
                "revision": self.schema.revision(),
            },
            "index": {
                "documents": self.index.documents().len(),
                "tags": tags,
                "revision": self.index.revision(),
                "workers": self.index.loader().pool_size(),
                "last_initialise": summary,
            },
        })
    }

    /// Tear down background workers and any other registered cleanups.
    pub fn close(&self) {
        self.vault.bus().teardown();
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("root", &self.root)
            .field("schema", &self.schema)
            .field("index", &self.index)
            .finish()
    }
}

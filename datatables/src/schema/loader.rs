// Schema loader - load, validate and persist the schema file

use super::parser::{parse_schema_str, schema_to_string};
use super::table::Table;
use super::types::{
    PropertyConfig, PropertyKind, PropertySchema, Schema, TableSchema, ViewConfig, ViewKind,
    ViewProperty, ViewSchema,
};
use crate::config::{CorruptionPolicy, Settings};
use crate::document::normalize_tag;
use crate::error::{DatatablesError, PersistError, Result};
use crate::vault::{Vault, VaultFile};
use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use serde_json::json;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// The in-memory schema, shared with the document loader.
pub type SharedSchema = Arc<RwLock<Schema>>;

pub const SCHEMA_CHANGED_EVENT: &str = "datatables:schema:changed";

type PersistResult = std::result::Result<(), PersistError>;
type PersistFuture = Shared<BoxFuture<'static, PersistResult>>;

/// One debounce cycle: every `persist` call made while it is pending shares `result`.
struct Cycle {
    generation: u64,
    reply: oneshot::Sender<PersistResult>,
    result: PersistFuture,
    timer: JoinHandle<()>,
}

struct Inner {
    vault: Arc<dyn Vault>,
    schema: SharedSchema,
    file: VaultFile,
    settings: Settings,
    revision: AtomicU64,
    generation: AtomicU64,
    pending: Mutex<Option<Cycle>>,
    /// Held for the whole commit so writes never overlap.
    write_lock: tokio::sync::Mutex<()>,
}

/// Owns the schema file.
///
/// `persist` is debounced: calls within `persist.debounce_ms` of each other
/// collapse into one write, and every caller gets that write's outcome. The
/// schema is serialized, re-parsed and compared before anything is written;
/// content that does not survive the round trip never reaches the vault.
#[derive(Clone)]
pub struct SchemaLoader {
    inner: Arc<Inner>,
}

impl SchemaLoader {
    /// Read the schema file, creating it with an empty schema if absent.
    pub async fn create(vault: Arc<dyn Vault>, settings: &Settings) -> Result<Self> {
        let path = settings.schema_path();
        let file = Self::schema_file(&vault, settings, &path).await?;

        let content = vault.read(&file).await?;
        let schema = parse_schema_str(&content)?;
        log::debug!(
            "Loaded schema {} with {} tables",
            file.path,
            schema.tables.len()
        );

        Ok(SchemaLoader {
            inner: Arc::new(Inner {
                vault,
                schema: Arc::new(RwLock::new(schema)),
                file,
                settings: settings.clone(),
                revision: AtomicU64::new(0),
                generation: AtomicU64::new(0),
                pending: Mutex::new(None),
                write_lock: tokio::sync::Mutex::new(()),
            }),
        })
    }

    async fn schema_file(
        vault: &Arc<dyn Vault>,
        settings: &Settings,
        path: &str,
    ) -> Result<VaultFile> {
        match vault.get_file(path).await? {
            Some(file) if file.is_directory() => {
                Err(DatatablesError::SchemaPathIsDirectory(path.to_string()))
            }
            Some(file) => Ok(file),
            None => {
                log::info!("No schema found at {path}, creating an empty one");
                let content = schema_to_string(&Schema::default())?;
                vault.create(path, &content).await.map_err(|e| match e {
                    DatatablesError::MissingParent { .. } => {
                        DatatablesError::SchemaFolderMissing(settings.schema.folder.clone())
                    }
                    other => other,
                })
            }
        }
    }

    /// Handle shared with anything that reads the schema, such as the index.
    pub fn schema(&self) -> SharedSchema {
        self.inner.schema.clone()
    }

    pub fn snapshot(&self) -> Schema {
        self.inner.schema.read().clone()
    }

    /// Mutate the in-memory schema. Nothing is written until `persist`.
    ///
    /// No validation happens here; a schema left invalid fails the next
    /// `persist` as corruption. `Table` checks its changes before applying them.
    pub fn update<R>(&self, f: impl FnOnce(&mut Schema) -> R) -> R {
        f(&mut self.inner.schema.write())
    }

    pub fn revision(&self) -> u64 {
        self.inner.revision.load(Ordering::SeqCst)
    }

    pub fn vault(&self) -> &Arc<dyn Vault> {
        &self.inner.vault
    }

    pub fn settings(&self) -> &Settings {
        &self.inner.settings
    }

    pub fn file(&self) -> &VaultFile {
        &self.inner.file
    }

    /// Handle to an existing table. `name` must be a `#` tag; case is ignored.
    pub fn table(&self, name: &str) -> Result<Table> {
        if !name.starts_with('#') {
            return Err(DatatablesError::InvalidTableName(name.to_string()));
        }
        let name = name.to_lowercase();
        if !self.inner.schema.read().tables.contains_key(&name) {
            return Err(DatatablesError::TableNotFound(name));
        }
        Ok(Table::new(name, self.clone()))
    }

    /// Add a table with a title property and a table view, then persist.
    pub async fn create_table(&self, name: &str) -> Result<Table> {
        let name = normalize_tag(name);
        if name.len() < 2 {
            return Err(DatatablesError::InvalidTableName(name));
        }

        self.update(|schema| {
            if schema.tables.contains_key(&name) {
                return Err(DatatablesError::TableExists(name.clone()));
            }

            let title = PropertySchema {
                uuid: uuid::Uuid::new_v4().to_string(),
                name: "Name".into(),
                config: PropertyConfig::default_for(PropertyKind::Title),
            };
            let view = ViewSchema {
                uuid: uuid::Uuid::new_v4().to_string(),
                name: "Table".into(),
                kind: ViewKind::Table,
                config: ViewConfig {
                    properties: vec![ViewProperty {
                        uuid: uuid::Uuid::new_v4().to_string(),
                        field: title.uuid.clone(),
                    }],
                    filters: Vec::new(),
                },
            };

            schema.tables.insert(
                name.clone(),
                TableSchema {
                    properties: vec![title],
                    views: vec![view],
                    templates: None,
                },
            );
            Ok(())
        })?;

        self.persist().await?;
        Ok(Table::new(name, self.clone()))
    }

    /// Schedule a write of the in-memory schema.
    ///
    /// The debounce window starts (or restarts) when this is called, not when
    /// the returned future is first polled. All calls in one window resolve
    /// together with the same outcome.
    pub fn persist(&self) -> impl Future<Output = Result<()>> + Send + 'static {
        let result = self.schedule();
        async move { result.await.map_err(DatatablesError::Persist) }
    }

    fn schedule(&self) -> PersistFuture {
        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let mut pending = self.inner.pending.lock();

        let inner = self.inner.clone();
        let debounce = Duration::from_millis(self.inner.settings.persist.debounce_ms);
        let timer = tokio::spawn(async move {
            tokio::time::sleep(debounce).await;
            inner.commit(generation).await;
        });

        match pending.as_mut() {
            Some(cycle) => {
                cycle.timer.abort();
                cycle.timer = timer;
                cycle.generation = generation;
                cycle.result.clone()
            }
            None => {
                let (reply, receiver) = oneshot::channel();
                let result = receiver
                    .map(|outcome| outcome.unwrap_or(Err(PersistError::Cancelled)))
                    .boxed()
                    .shared();
                *pending = Some(Cycle {
                    generation,
                    reply,
                    result: result.clone(),
                    timer,
                });
                result
            }
        }
    }
}

impl Inner {
    async fn commit(self: Arc<Self>, generation: u64) {
        // Only the timer of the latest call in the cycle may commit it
        let cycle = {
            let mut pending = self.pending.lock();
            match pending.as_ref() {
                Some(cycle) if cycle.generation == generation => pending.take(),
                _ => None,
            }
        };
        let Some(cycle) = cycle else {
            return;
        };

        let _write = self.write_lock.lock().await;
        let outcome = self.write().await;
        let _ = cycle.reply.send(outcome);
    }

    async fn write(&self) -> PersistResult {
        let snapshot = self.schema.read().clone();

        let serialized =
            schema_to_string(&snapshot).map_err(|e| self.corrupted(e.to_string()))?;
        match parse_schema_str(&serialized) {
            Ok(reparsed) if reparsed == snapshot => {}
            Ok(_) => {
                return Err(self.corrupted(
                    "the re-parsed schema differs from the in-memory schema".into(),
                ))
            }
            Err(e) => return Err(self.corrupted(e.to_string())),
        }

        self.vault
            .modify_content(&self.file, &serialized)
            .await
            .map_err(|e| PersistError::Write(e.to_string()))?;
        log::debug!("Wrote schema to {}", self.file.path);

        let revision = self.revision.fetch_add(1, Ordering::SeqCst) + 1;
        self.vault
            .bus()
            .emit(SCHEMA_CHANGED_EVENT, json!({ "revision": revision }));
        Ok(())
    }

    fn corrupted(&self, reason: String) -> PersistError {
        let error = PersistError::Corruption(reason);
        log::error!("{error}");
        if self.settings.persist.on_corruption == CorruptionPolicy::Abort {
            // The in-memory schema can no longer be stored faithfully
            std::process::abort();
        }
        error
    }
}

impl std::fmt::Debug for SchemaLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchemaLoader")
            .field("file", &self.inner.file.path)
            .field("revision", &self.revision())
            .finish()
    }
}

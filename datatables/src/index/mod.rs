// Index - the authoritative document corpus and its tag index

pub mod loader;
pub mod tag;

use crate::config::Settings;
use crate::document::{Document, DocumentKind, DocumentMetadata, ParserRegistry};
use crate::error::Result;
use crate::schema::SharedSchema;
use crate::vault::{Vault, VaultEvent, VaultFile};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

pub use loader::Loader;
pub use tag::TagIndex;

pub const INDEX_CHANGED_EVENT: &str = "datatables:index:changed";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadOutcome {
    pub skipped: bool,
    /// The path was deleted or renamed while parsing; the result was dropped.
    pub stale: bool,
}

impl LoadOutcome {
    const SKIPPED: LoadOutcome = LoadOutcome {
        skipped: true,
        stale: false,
    };
    const STORED: LoadOutcome = LoadOutcome {
        skipped: false,
        stale: false,
    };
    const STALE: LoadOutcome = LoadOutcome {
        skipped: false,
        stale: true,
    };
}

/// Totals from the last `initialise` run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IndexSummary {
    pub files: usize,
    pub skipped: usize,
    pub failed: usize,
    pub seconds: f64,
}

#[derive(Default)]
struct IndexState {
    documents: HashMap<String, Arc<Document>>,
    tags: TagIndex,
    /// Bumped whenever a path is deleted or renamed away. Survives `initialise`.
    epochs: HashMap<String, u64>,
}

impl IndexState {
    fn epoch(&self, path: &str) -> u64 {
        self.epochs.get(path).copied().unwrap_or(0)
    }

    fn invalidate(&mut self, path: &str) {
        *self.epochs.entry(path.to_string()).or_insert(0) += 1;
    }
}

/// Loads every document in the vault and keeps it queryable by path and tag.
///
/// Callers only ever see `Arc<Document>` snapshots; the maps themselves stay
/// behind the index.
pub struct Index {
    vault: Arc<dyn Vault>,
    loader: Loader,
    state: RwLock<IndexState>,
    revision: AtomicU64,
    summary: Mutex<IndexSummary>,
}

impl Index {
    /// Build the index and load every document in the vault.
    pub async fn create(
        vault: Arc<dyn Vault>,
        schema: SharedSchema,
        registry: Arc<ParserRegistry>,
        settings: &Settings,
    ) -> Result<Self> {
        let loader = Loader::new(vault.clone(), schema, registry, settings.worker_count());
        let index = Index {
            vault,
            loader,
            state: RwLock::new(IndexState::default()),
            revision: AtomicU64::new(0),
            summary: Mutex::new(IndexSummary::default()),
        };

        index.initialise().await?;
        Ok(index)
    }

    /// Reset and reload every markdown file.
    ///
    /// Documents that fail to parse are logged and left out; they do not stop
    /// the rest of the vault from loading. Change notifications raised while
    /// loading are coalesced into one.
    pub async fn initialise(&self) -> Result<IndexSummary> {
        {
            let mut state = self.state.write();
            state.documents.clear();
            state.tags.clear();
        }

        let start = Instant::now();
        let files = self.vault.markdown_files().await?;

        let results = self
            .vault
            .bus()
            .with_lock(futures::future::join_all(files.iter().map(|file| self.load(file))))
            .await;

        let mut summary = IndexSummary {
            files: results.len(),
            ..IndexSummary::default()
        };
        for (file, result) in files.iter().zip(&results) {
            match result {
                Ok(outcome) if outcome.skipped => summary.skipped += 1,
                Ok(_) => {}
                Err(e) => {
                    log::warn!("Unable to index {}: {e}", file.path);
                    summary.failed += 1;
                }
            }
        }
        summary.seconds = start.elapsed().as_secs_f64();

        log::info!(
            "Indexed {} files in {:.3} seconds ({} skipped, {} failed).",
            summary.files,
            summary.seconds,
            summary.skipped,
            summary.failed
        );

        *self.summary.lock() = summary.clone();
        Ok(summary)
    }

    /// Parse `file` and store it. Unsupported kinds are skipped untouched.
    ///
    /// A parse that finishes after its path was deleted or renamed away is
    /// dropped and reported as `stale`.
    pub async fn load(&self, file: &VaultFile) -> Result<LoadOutcome> {
        let Some(metadata) = DocumentMetadata::for_file(file) else {
            return Ok(LoadOutcome::SKIPPED);
        };

        let epoch = self.state.read().epoch(&metadata.path);
        let document = self.loader.load(metadata).await?;
        {
            let mut state = self.state.write();
            if state.epoch(&document.path) != epoch {
                log::debug!("Dropping stale parse of {}", document.path);
                return Ok(LoadOutcome::STALE);
            }
            state.tags.set(&document.path, &document.data.tags);
            state.documents.insert(document.path.clone(), document);
        }

        self.mark_dirty();
        Ok(LoadOutcome::STORED)
    }

    /// Resolve `path` as a link from `source_path` and return the indexed document.
    pub async fn page(&self, path: &str, source_path: &str) -> Result<Option<Arc<Document>>> {
        let Some(resolved) = self.vault.resolve_link(path, source_path).await? else {
            return Ok(None);
        };
        Ok(self.document(&resolved))
    }

    /// Documents tagged with `tag`, sorted by path.
    pub fn get_documents(&self, tag: &str) -> Vec<Arc<Document>> {
        let state = self.state.read();
        state
            .tags
            .get_pages(tag)
            .iter()
            .filter_map(|page| state.documents.get(page).cloned())
            .collect()
    }

    pub fn document(&self, path: &str) -> Option<Arc<Document>> {
        self.state.read().documents.get(path).cloned()
    }

    /// Every indexed document, sorted by path.
    pub fn documents(&self) -> Vec<Arc<Document>> {
        let mut documents: Vec<_> = self.state.read().documents.values().cloned().collect();
        documents.sort_by(|a, b| a.path.cmp(&b.path));
        documents
    }

    /// Read access to the tag index.
    pub fn with_tags<R>(&self, f: impl FnOnce(&TagIndex) -> R) -> R {
        f(&self.state.read().tags)
    }

    pub fn revision(&self) -> u64 {
        self.revision.load(Ordering::SeqCst)
    }

    pub fn summary(&self) -> IndexSummary {
        self.summary.lock().clone()
    }

    pub fn loader(&self) -> &Loader {
        &self.loader
    }

    /// Move the document at `old_path` to `file.path`.
    ///
    /// A rename to an unsupported kind drops the document; a rename of a
    /// document that was never indexed loads it fresh.
    pub async fn rename(&self, file: &VaultFile, old_path: &str) -> Result<()> {
        let Some(kind) = DocumentKind::from_path(&file.path) else {
            return self.remove(old_path);
        };

        let moved = {
            let mut state = self.state.write();
            state.invalidate(old_path);
            match state.documents.remove(old_path) {
                Some(document) => {
                    let mut renamed = Document::clone(&document);
                    renamed.kind = kind;
                    renamed.path = file.path.clone();
                    state.documents.insert(file.path.clone(), Arc::new(renamed));
                    state.tags.rename(old_path, &file.path);
                    true
                }
                None => false,
            }
        };

        if moved {
            self.mark_dirty();
            Ok(())
        } else {
            self.load(file).await.map(|_| ())
        }
    }

    /// Drop `file` from the index. Unknown paths are ignored.
    pub async fn delete(&self, file: &VaultFile) -> Result<()> {
        self.remove(&file.path)
    }

    fn remove(&self, path: &str) -> Result<()> {
        let removed = {
            let mut state = self.state.write();
            state.invalidate(path);
            let removed = state.documents.remove(path).is_some();
            state.tags.delete(path);
            removed
        };

        if removed {
            self.mark_dirty();
        }
        Ok(())
    }

    /// Apply a host change notification.
    pub async fn handle_event(&self, event: VaultEvent) -> Result<()> {
        match event {
            VaultEvent::Created(file) | VaultEvent::Modified(file) if file.is_file() => {
                self.load(&file).await.map(|_| ())
            }
            VaultEvent::Renamed { file, old_path } if file.is_file() => {
                self.rename(&file, &old_path).await
            }
            VaultEvent::Deleted(file) => self.delete(&file).await,
            other => {
                log::debug!("Ignoring vault event {other:?}");
                Ok(())
            }
        }
    }

    fn mark_dirty(&self) {
        let revision = self.revision.fetch_add(1, Ordering::SeqCst) + 1;
        self.vault
            .bus()
            .emit(INDEX_CHANGED_EVENT, json!({ "revision": revision }));
    }
}

impl std::fmt::Debug for Index {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Index")
            .field("documents", &self.state.read().documents.len())
            .field("revision", &self.revision())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DatatablesError;
    use crate::schema::Schema;
    use crate::test_support::{memory_vault, RecordingSink};
    use crate::vault::MemoryVault;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::AtomicBool;
    use std::time::Duration;

    async fn index_over(vault: Arc<MemoryVault>) -> Index {
        let schema = Arc::new(RwLock::new(Schema::default()));
        Index::create(vault, schema, Arc::new(ParserRegistry::default()), &Settings::default())
            .await
            .unwrap()
    }

    fn paths(documents: &[Arc<Document>]) -> Vec<String> {
        documents.iter().map(|d| d.path.clone()).collect()
    }

    fn seeded() -> (Arc<MemoryVault>, Arc<RecordingSink>) {
        let (vault, sink) = memory_vault();
        vault.add_file("projects/launch.md", "---\ntags: [project]\n---\nShip it #Urgent\n");
        vault.add_file("projects/retro.md", "---\ntags: project\n---\n");
        vault.add_file("notes/todo.md", "Remember #urgent things\n");
        vault.add_file("notes/broken.md", "---\ntags: [unterminated\n---\n#fine\n");
        (vault, sink)
    }

    #[tokio::test]
    async fn test_initialise_loads_vault() {
        let (vault, sink) = seeded();
        let index = index_over(vault).await;

        assert_eq!(index.documents().len(), 4);
        assert_eq!(
            paths(&index.get_documents("#project")),
            vec!["projects/launch.md", "projects/retro.md"]
        );
        assert_eq!(
            paths(&index.get_documents("#URGENT")),
            vec!["notes/todo.md", "projects/launch.md"]
        );

        let summary = index.summary();
        assert_eq!(summary.files, 4);
        assert_eq!(summary.failed, 0);
        assert_eq!(index.revision(), 4);

        // Loading under the bus lock surfaces a single notification
        assert_eq!(sink.count(INDEX_CHANGED_EVENT), 1);
        assert_eq!(sink.last(INDEX_CHANGED_EVENT).unwrap()["revision"], 4);
    }

    #[tokio::test]
    async fn test_load_bumps_revision_once_per_call() {
        let (vault, sink) = memory_vault();
        vault.add_file("a.md", "#one");
        let index = index_over(vault.clone()).await;
        let before = index.revision();

        vault.add_file("b.md", "#two");
        vault.add_file("c.md", "#three");
        for path in ["a.md", "b.md", "c.md"] {
            index.load(&VaultFile::file(path)).await.unwrap();
        }

        assert_eq!(index.revision(), before + 3);
        assert_eq!(sink.last(INDEX_CHANGED_EVENT).unwrap()["revision"], before + 3);
    }

    #[tokio::test]
    async fn test_load_skips_unsupported_files() {
        let (vault, _sink) = memory_vault();
        vault.add_file("image.png", "");
        let index = index_over(vault).await;
        let before = index.revision();

        let outcome = index.load(&VaultFile::file("image.png")).await.unwrap();
        assert!(outcome.skipped);
        assert_eq!(index.revision(), before);
        assert!(index.document("image.png").is_none());
    }

    #[tokio::test]
    async fn test_reload_replaces_tags() {
        let (vault, _sink) = memory_vault();
        vault.add_file("a.md", "#old");
        let index = index_over(vault.clone()).await;
        assert_eq!(index.get_documents("#old").len(), 1);

        vault.add_file("a.md", "#new");
        index.load(&VaultFile::file("a.md")).await.unwrap();

        assert!(index.get_documents("#old").is_empty());
        assert_eq!(index.get_documents("#new").len(), 1);
        // Known gap kept from the tag index: old tags stay listed
        assert!(index.with_tags(|tags| tags.has("#old")));
    }

    #[tokio::test]
    async fn test_page_resolves_links() {
        let (vault, _sink) = seeded();
        let index = index_over(vault).await;

        let page = index.page("[[launch]]", "notes/todo.md").await.unwrap();
        assert_eq!(page.unwrap().path, "projects/launch.md");
        assert!(index.page("nowhere", "notes/todo.md").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_rename_moves_document_and_tags() {
        let (vault, _sink) = seeded();
        let index = index_over(vault).await;
        let before = index.revision();

        index
            .rename(&VaultFile::file("archive/launch.md"), "projects/launch.md")
            .await
            .unwrap();

        assert!(index.document("projects/launch.md").is_none());
        let moved = index.document("archive/launch.md").unwrap();
        assert_eq!(moved.path, "archive/launch.md");
        assert_eq!(
            paths(&index.get_documents("#project")),
            vec!["archive/launch.md", "projects/retro.md"]
        );
        assert_eq!(index.revision(), before + 1);
    }

    #[tokio::test]
    async fn test_rename_to_unsupported_kind_removes() {
        let (vault, _sink) = seeded();
        let index = index_over(vault).await;

        index
            .rename(&VaultFile::file("notes/todo.txt"), "notes/todo.md")
            .await
            .unwrap();

        assert!(index.document("notes/todo.md").is_none());
        assert_eq!(paths(&index.get_documents("#urgent")), vec!["projects/launch.md"]);
    }

    #[tokio::test]
    async fn test_delete_and_events() {
        let (vault, _sink) = seeded();
        let index = index_over(vault.clone()).await;
        let before = index.revision();

        index
            .handle_event(VaultEvent::Deleted(VaultFile::file("projects/retro.md")))
            .await
            .unwrap();
        assert!(index.document("projects/retro.md").is_none());
        assert_eq!(index.revision(), before + 1);

        // Deleting something never indexed does not bump the revision
        index.delete(&VaultFile::file("ghost.md")).await.unwrap();
        assert_eq!(index.revision(), before + 1);

        vault.add_file("new.md", "#fresh");
        index
            .handle_event(VaultEvent::Created(VaultFile::file("new.md")))
            .await
            .unwrap();
        assert_eq!(paths(&index.get_documents("#fresh")), vec!["new.md"]);

        index
            .handle_event(VaultEvent::Created(VaultFile::directory("folder")))
            .await
            .unwrap();
        assert_eq!(index.revision(), before + 2);
    }

    #[tokio::test]
    async fn test_get_documents_drops_dangling_pages() {
        let (vault, _sink) = seeded();
        let index = index_over(vault).await;

        // A tag entry whose document has gone is silently skipped
        index.state.write().documents.remove("notes/todo.md");
        assert_eq!(paths(&index.get_documents("#urgent")), vec!["projects/launch.md"]);
    }

    #[tokio::test]
    async fn test_parse_failures_do_not_stop_initialise() {
        let (vault, _sink) = memory_vault();
        vault.add_file("good.md", "#ok");
        vault.add_file("bad.md", "#ok");

        let mut registry = ParserRegistry::default();
        registry.register(DocumentKind::Markdown, |path, read, schema| {
            if path == "bad.md" {
                return Err(DatatablesError::Other("cannot parse".into()));
            }
            crate::document::parse_markdown(path, read, schema)
        });

        let schema = Arc::new(RwLock::new(Schema::default()));
        let index = Index::create(vault, schema, Arc::new(registry), &Settings::default())
            .await
            .unwrap();

        let summary = index.summary();
        assert_eq!(summary.files, 2);
        assert_eq!(summary.failed, 1);
        assert_eq!(paths(&index.documents()), vec!["good.md"]);
    }

    #[tokio::test]
    async fn test_delete_wins_over_in_flight_load() {
        let gate = Arc::new(Mutex::new(()));
        let started = Arc::new(AtomicBool::new(false));

        let mut registry = ParserRegistry::default();
        {
            let gate = gate.clone();
            let started = started.clone();
            registry.register(DocumentKind::Markdown, move |path, read, schema| {
                if path == "late.md" {
                    started.store(true, Ordering::SeqCst);
                    drop(gate.lock());
                }
                crate::document::parse_markdown(path, read, schema)
            });
        }

        let (vault, _sink) = memory_vault();
        let schema = Arc::new(RwLock::new(Schema::default()));
        let index = Arc::new(
            Index::create(vault.clone(), schema, Arc::new(registry), &Settings::default())
                .await
                .unwrap(),
        );

        vault.add_file("late.md", "#late");
        let held = gate.lock();
        let modified = tokio::spawn({
            let index = index.clone();
            async move {
                index
                    .handle_event(VaultEvent::Modified(VaultFile::file("late.md")))
                    .await
            }
        });
        while !started.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let before = index.revision();

        vault.remove("late.md");
        index
            .handle_event(VaultEvent::Deleted(VaultFile::file("late.md")))
            .await
            .unwrap();
        drop(held);
        modified.await.unwrap().unwrap();

        assert!(index.document("late.md").is_none());
        assert!(index.get_documents("#late").is_empty());
        assert_eq!(index.revision(), before);

        // A load issued after the delete is stored normally
        vault.add_file("late.md", "#late");
        let outcome = index.load(&VaultFile::file("late.md")).await.unwrap();
        assert!(!outcome.stale);
        assert_eq!(index.get_documents("#late").len(), 1);
    }
}

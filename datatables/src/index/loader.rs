// Loader - bounded pool of parse workers with per-path de-duplication

use crate::document::{Document, DocumentMetadata, ParserRegistry};
use crate::error::{DatatablesError, ParseFailure, Result};
use crate::schema::SharedSchema;
use crate::vault::{CleanupId, Vault};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::AbortHandle;

type LoadResult = std::result::Result<Arc<Document>, ParseFailure>;

enum LoaderCommand {
    Load {
        metadata: DocumentMetadata,
        reply: oneshot::Sender<LoadResult>,
    },
}

/// What a worker reports back for one request.
#[derive(Debug)]
enum WorkerResponse {
    Success { path: String, result: Arc<Document> },
    Error { path: String, result: String },
}

impl WorkerResponse {
    fn path(&self) -> &str {
        match self {
            WorkerResponse::Success { path, .. } | WorkerResponse::Error { path, .. } => path,
        }
    }
}

#[derive(Debug)]
struct WorkerMessage {
    worker: usize,
    response: WorkerResponse,
}

/// Converts `DocumentMetadata` into `Document`s on a fixed pool of workers.
///
/// At most one parse per path is in flight; later requests for the same path
/// wait on the first one. When every worker is busy, requests queue FIFO.
/// Must be created inside a tokio runtime.
pub struct Loader {
    commands: mpsc::UnboundedSender<LoaderCommand>,
    pool_size: usize,
    dispatched: Arc<AtomicUsize>,
    tasks: Vec<AbortHandle>,
    vault: Arc<dyn Vault>,
    cleanup: CleanupId,
}

impl Loader {
    pub fn new(
        vault: Arc<dyn Vault>,
        schema: SharedSchema,
        registry: Arc<ParserRegistry>,
        pool_size: usize,
    ) -> Self {
        let pool_size = pool_size.max(1);
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (message_tx, message_rx) = mpsc::unbounded_channel();
        let dispatched = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::with_capacity(pool_size + 1);
        let mut workers = Vec::with_capacity(pool_size);
        for id in 0..pool_size {
            let (request_tx, request_rx) = mpsc::unbounded_channel();
            let handle = tokio::spawn(run_worker(
                id,
                vault.clone(),
                schema.clone(),
                registry.clone(),
                request_rx,
                message_tx.clone(),
            ));
            tasks.push(handle.abort_handle());
            workers.push(request_tx);
        }

        let coordinator = Coordinator {
            // Popped from the back, so worker 0 is handed out first
            free: (0..pool_size).rev().collect(),
            workers,
            waiting: HashMap::new(),
            queue: VecDeque::new(),
            dispatched: dispatched.clone(),
        };
        let handle = tokio::spawn(coordinator.run(command_rx, message_rx));
        tasks.push(handle.abort_handle());

        log::debug!("Started document loader with {pool_size} workers");

        // Workers go down with the vault
        let handles = tasks.clone();
        let cleanup = vault.bus().register(move || {
            for task in handles {
                task.abort();
            }
        });

        Loader {
            commands: command_tx,
            pool_size,
            dispatched,
            tasks,
            vault,
            cleanup,
        }
    }

    /// Parse the document described by `metadata`.
    ///
    /// Every caller waiting on the same path receives the same document or the
    /// same `ParseFailure`.
    pub async fn load(&self, metadata: DocumentMetadata) -> Result<Arc<Document>> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(LoaderCommand::Load { metadata, reply })
            .map_err(|_| DatatablesError::LoaderTerminated)?;

        match response.await {
            Ok(Ok(document)) => Ok(document),
            Ok(Err(failure)) => Err(failure.into()),
            Err(_) => Err(DatatablesError::LoaderTerminated),
        }
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Number of requests handed to a worker so far.
    pub fn dispatched(&self) -> usize {
        self.dispatched.load(Ordering::SeqCst)
    }

    /// Stop every worker. Outstanding requests fail with `LoaderTerminated`.
    pub fn terminate(&self) {
        log::debug!("Terminating document loader");
        for task in &self.tasks {
            task.abort();
        }
    }
}

impl Drop for Loader {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
        self.vault.bus().unregister(self.cleanup);
    }
}

impl std::fmt::Debug for Loader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Loader")
            .field("pool_size", &self.pool_size)
            .field("dispatched", &self.dispatched())
            .finish()
    }
}

// ── Coordinator ─────────────────────────────────────────────────────

struct Coordinator {
    workers: Vec<mpsc::UnboundedSender<DocumentMetadata>>,
    free: Vec<usize>,
    waiting: HashMap<String, Vec<oneshot::Sender<LoadResult>>>,
    queue: VecDeque<DocumentMetadata>,
    dispatched: Arc<AtomicUsize>,
}

impl Coordinator {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<LoaderCommand>,
        mut messages: mpsc::UnboundedReceiver<WorkerMessage>,
    ) {
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(LoaderCommand::Load { metadata, reply }) => self.request(metadata, reply),
                    None => break,
                },
                Some(message) = messages.recv() => self.complete(message),
            }
        }
    }

    fn request(&mut self, metadata: DocumentMetadata, reply: oneshot::Sender<LoadResult>) {
        if let Some(waiters) = self.waiting.get_mut(&metadata.path) {
            log::debug!("Joining in-flight load of {}", metadata.path);
            waiters.push(reply);
            return;
        }

        self.waiting.insert(metadata.path.clone(), vec![reply]);
        self.dispatch(metadata);
    }

    fn dispatch(&mut self, metadata: DocumentMetadata) {
        let Some(worker) = self.free.pop() else {
            log::debug!("All workers busy, queueing {}", metadata.path);
            self.queue.push_back(metadata);
            return;
        };

        log::debug!("Dispatching {} to worker {worker}", metadata.path);
        self.dispatched.fetch_add(1, Ordering::SeqCst);
        if let Err(mpsc::error::SendError(metadata)) = self.workers[worker].send(metadata) {
            // Dropping the waiters fails them with LoaderTerminated
            log::error!("Worker {worker} is gone, dropping load of {}", metadata.path);
            self.waiting.remove(&metadata.path);
        }
    }

    fn complete(&mut self, message: WorkerMessage) {
        self.free.push(message.worker);

        let Some(waiters) = self.waiting.remove(message.response.path()) else {
            let error = DatatablesError::Protocol(format!(
                "worker {} answered for '{}', which has no pending request",
                message.worker,
                message.response.path()
            ));
            log::error!("{error}");
            panic!("{error}");
        };

        match message.response {
            WorkerResponse::Success { result, .. } => {
                for waiter in waiters {
                    let _ = waiter.send(Ok(result.clone()));
                }
            }
            WorkerResponse::Error { path, result } => {
                let failure = ParseFailure {
                    path,
                    message: result,
                };
                for waiter in waiters {
                    let _ = waiter.send(Err(failure.clone()));
                }
            }
        }

        if let Some(next) = self.queue.pop_front() {
            self.dispatch(next);
        }
    }
}

// ── Workers ─────────────────────────────────────────────────────────

async fn run_worker(
    id: usize,
    vault: Arc<dyn Vault>,
    schema: SharedSchema,
    registry: Arc<ParserRegistry>,
    mut requests: mpsc::UnboundedReceiver<DocumentMetadata>,
    messages: mpsc::UnboundedSender<WorkerMessage>,
) {
    while let Some(metadata) = requests.recv().await {
        let path = metadata.path.clone();
        let response = match parse(&vault, &schema, &registry, metadata).await {
            Ok(document) => WorkerResponse::Success {
                path,
                result: Arc::new(document),
            },
            Err(e) => WorkerResponse::Error {
                path,
                result: e.to_string(),
            },
        };

        if messages.send(WorkerMessage { worker: id, response }).is_err() {
            break;
        }
    }
}

async fn parse(
    vault: &Arc<dyn Vault>,
    schema: &SharedSchema,
    registry: &Arc<ParserRegistry>,
    metadata: DocumentMetadata,
) -> Result<Document> {
    let read = vault.read_document(&metadata.file).await?;

    let schema = schema.clone();
    let registry = registry.clone();
    tokio::task::spawn_blocking(move || {
        let schema = schema.read();
        registry.parse(&metadata.path, &read, &schema)
    })
    .await
    .map_err(|e| DatatablesError::Other(format!("Parser task failed: {e}")))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{DocumentData, DocumentKind, ReadDocument};
    use crate::schema::Schema;
    use crate::vault::{MemoryVault, Vault, VaultFile};
    use parking_lot::{Mutex, RwLock};
    use std::time::Duration;

    fn shared_schema() -> SharedSchema {
        Arc::new(RwLock::new(Schema::default()))
    }

    fn metadata(path: &str) -> DocumentMetadata {
        DocumentMetadata::for_file(&VaultFile::file(path)).unwrap()
    }

    fn empty_document(path: &str) -> Document {
        Document {
            kind: DocumentKind::Markdown,
            path: path.to_string(),
            data: DocumentData::default(),
        }
    }

    /// A registry whose markdown parser sleeps, then records the path.
    fn slow_registry(delay: Duration, seen: Arc<Mutex<Vec<String>>>) -> ParserRegistry {
        let mut registry = ParserRegistry::empty();
        registry.register(DocumentKind::Markdown, move |path, _read: &ReadDocument, _schema| {
            std::thread::sleep(delay);
            seen.lock().push(path.to_string());
            Ok(empty_document(path))
        });
        registry
    }

    fn vault_with(paths: &[&str]) -> Arc<MemoryVault> {
        let vault = Arc::new(MemoryVault::new());
        for path in paths {
            vault.add_file(path, "content");
        }
        vault
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_never_exceeds_pool_size() {
        let paths: Vec<String> = (0..12).map(|i| format!("doc{i}.md")).collect();
        let refs: Vec<&str> = paths.iter().map(String::as_str).collect();
        let vault = vault_with(&refs);

        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let first = Arc::new(std::sync::atomic::AtomicBool::new(true));
        let mut registry = ParserRegistry::empty();
        {
            let in_flight = in_flight.clone();
            let peak = peak.clone();
            registry.register(DocumentKind::Markdown, move |path, _read, _schema| {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                // Hold the first parse until a second one runs alongside it
                if first.swap(false, Ordering::SeqCst) {
                    let deadline = std::time::Instant::now() + Duration::from_secs(2);
                    while in_flight.load(Ordering::SeqCst) < 2
                        && std::time::Instant::now() < deadline
                    {
                        std::thread::sleep(Duration::from_millis(1));
                    }
                }
                std::thread::sleep(Duration::from_millis(15));
                in_flight.fetch_sub(1, Ordering::SeqCst);
                Ok(empty_document(path))
            });
        }

        let loader = Loader::new(vault, shared_schema(), Arc::new(registry), 2);
        let results =
            futures::future::join_all(paths.iter().map(|p| loader.load(metadata(p)))).await;

        assert_eq!(results.len(), 12);
        assert!(results.iter().all(|r| r.is_ok()));
        assert_eq!(peak.load(Ordering::SeqCst), 2);
        assert_eq!(loader.dispatched(), 12);
    }

    #[tokio::test]
    async fn test_concurrent_loads_share_one_parse() {
        let vault = vault_with(&["same.md"]);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let registry = slow_registry(Duration::from_millis(30), seen.clone());
        let loader = Loader::new(vault, shared_schema(), Arc::new(registry), 2);

        let (first, second) =
            tokio::join!(loader.load(metadata("same.md")), loader.load(metadata("same.md")));

        let (first, second) = (first.unwrap(), second.unwrap());
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(loader.dispatched(), 1);
        assert_eq!(seen.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_overflow_is_served_fifo() {
        let vault = vault_with(&["a.md", "b.md", "c.md", "d.md"]);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let registry = slow_registry(Duration::from_millis(5), seen.clone());
        let loader = Loader::new(vault, shared_schema(), Arc::new(registry), 1);

        let paths = ["a.md", "b.md", "c.md", "d.md"];
        let results = futures::future::join_all(paths.iter().map(|p| loader.load(metadata(p)))).await;

        assert!(results.iter().all(|r| r.is_ok()));
        assert_eq!(*seen.lock(), vec!["a.md", "b.md", "c.md", "d.md"]);
    }

    #[tokio::test]
    async fn test_failure_reaches_every_waiter() {
        let vault = vault_with(&["bad.md"]);
        let mut registry = ParserRegistry::empty();
        registry.register(DocumentKind::Markdown, |_path, _read, _schema| {
            std::thread::sleep(Duration::from_millis(20));
            Err(DatatablesError::Other("broken frontmatter".into()))
        });
        let loader = Loader::new(vault, shared_schema(), Arc::new(registry), 2);

        let (first, second) =
            tokio::join!(loader.load(metadata("bad.md")), loader.load(metadata("bad.md")));

        for result in [first, second] {
            match result {
                Err(DatatablesError::Parse(failure)) => {
                    assert_eq!(failure.path, "bad.md");
                    assert_eq!(failure.message, "broken frontmatter");
                }
                other => panic!("expected parse failure, got {other:?}"),
            }
        }

        // The worker is free again after a failure
        assert_eq!(loader.dispatched(), 1);
    }

    #[tokio::test]
    async fn test_missing_file_is_a_parse_failure() {
        let vault = vault_with(&[]);
        let loader = Loader::new(vault, shared_schema(), Arc::new(ParserRegistry::default()), 1);

        let err = loader.load(metadata("ghost.md")).await.unwrap_err();
        assert!(matches!(err, DatatablesError::Parse(_)));
        assert!(err.to_string().contains("File not found"));
    }

    #[tokio::test]
    async fn test_terminated_loader_rejects() {
        let vault = vault_with(&["a.md"]);
        let loader = Loader::new(
            vault.clone(),
            shared_schema(),
            Arc::new(ParserRegistry::default()),
            1,
        );

        vault.bus().teardown();
        let err = loader.load(metadata("a.md")).await.unwrap_err();
        assert!(matches!(err, DatatablesError::LoaderTerminated));
    }

    #[tokio::test]
    async fn test_drop_withdraws_bus_cleanup() {
        let vault = vault_with(&[]);
        for _ in 0..3 {
            let loader = Loader::new(
                vault.clone(),
                shared_schema(),
                Arc::new(ParserRegistry::default()),
                1,
            );
            assert_eq!(vault.bus().cleanup_count(), 1);
            drop(loader);
        }
        assert_eq!(vault.bus().cleanup_count(), 0);
    }
}

// Vault - the document store, text storage and change bus the engine runs against

pub mod bus;
pub mod local;
pub mod memory;

use crate::document::ReadDocument;
use crate::error::{DatatablesError, Result};
use async_trait::async_trait;

pub use bus::{BroadcastSink, BusLock, ChangeBus, ChangeEvent, CleanupId, EventSink};
pub use local::LocalVault;
pub use memory::MemoryVault;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileKind {
    File,
    Directory,
}

/// Handle to an entry in the vault. Paths are vault-relative and `/`-separated.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VaultFile {
    pub path: String,
    pub kind: FileKind,
}

impl VaultFile {
    pub fn file(path: impl Into<String>) -> Self {
        VaultFile {
            path: path.into(),
            kind: FileKind::File,
        }
    }

    pub fn directory(path: impl Into<String>) -> Self {
        VaultFile {
            path: path.into(),
            kind: FileKind::Directory,
        }
    }

    pub fn is_file(&self) -> bool {
        self.kind == FileKind::File
    }

    pub fn is_directory(&self) -> bool {
        self.kind == FileKind::Directory
    }

    /// Final path component.
    pub fn name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }
}

/// A change reported by the host for a vault entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VaultEvent {
    Created(VaultFile),
    Modified(VaultFile),
    Renamed { file: VaultFile, old_path: String },
    Deleted(VaultFile),
}

#[async_trait]
pub trait Vault: Send + Sync {
    /// The lock-aware emitter every component raises change events through.
    fn bus(&self) -> &ChangeBus;

    /// Every markdown file in the vault, sorted by path.
    async fn markdown_files(&self) -> Result<Vec<VaultFile>>;

    async fn get_file(&self, path: &str) -> Result<Option<VaultFile>>;

    /// Create a file. Fails with `AlreadyExists` or `MissingParent`.
    async fn create(&self, path: &str, content: &str) -> Result<VaultFile>;

    /// Create an empty `<name>.md` inside `folder`.
    async fn create_empty_markdown_file(&self, folder: &VaultFile, name: &str)
        -> Result<VaultFile>;

    async fn read(&self, file: &VaultFile) -> Result<String>;

    /// Content plus whatever metadata the host extracted from it.
    async fn read_document(&self, file: &VaultFile) -> Result<ReadDocument>;

    async fn modify_content(&self, file: &VaultFile, content: &str) -> Result<()>;

    /// Resolve a link relative to `source_path` to a canonical vault path.
    async fn resolve_link(&self, link: &str, source_path: &str) -> Result<Option<String>>;

    /// Return the file at `path`, creating it with `default_content` if absent.
    async fn get_or_create(&self, path: &str, default_content: &str) -> Result<VaultFile> {
        match self.get_file(path).await? {
            Some(file) if file.is_directory() => Err(DatatablesError::IsDirectory {
                path: path.to_string(),
            }),
            Some(file) => Ok(file),
            None => self.create(path, default_content).await,
        }
    }
}

/// Parent directory of a vault path, `""` for the root.
pub(crate) fn parent_path(path: &str) -> &str {
    path.rsplit_once('/').map(|(parent, _)| parent).unwrap_or("")
}

/// Join vault path segments, skipping empty ones.
pub(crate) fn join_path(parent: &str, name: &str) -> String {
    match (parent.trim_matches('/'), name.trim_matches('/')) {
        ("", name) => name.to_string(),
        (parent, "") => parent.to_string(),
        (parent, name) => format!("{parent}/{name}"),
    }
}

/// Strip wiki-link brackets, alias and heading from a link.
pub(crate) fn link_target(link: &str) -> &str {
    let link = link.trim();
    let link = link
        .strip_prefix("[[")
        .and_then(|l| l.strip_suffix("]]"))
        .unwrap_or(link);
    let link = link.split('|').next().unwrap_or(link);
    link.split('#').next().unwrap_or(link).trim()
}

/// Paths a link may refer to, most specific first: relative to the source's
/// folder, then relative to the vault root. Extensionless links also try `.md`.
pub(crate) fn link_candidates(link: &str, source_path: &str) -> Vec<String> {
    let target = link_target(link);
    if target.is_empty() {
        return Vec::new();
    }

    let mut bases = vec![join_path(parent_path(source_path), target)];
    if !bases.contains(&target.to_string()) {
        bases.push(target.trim_matches('/').to_string());
    }

    let has_extension = target.rsplit('/').next().is_some_and(|name| name.contains('.'));
    let mut candidates = Vec::new();
    for base in bases {
        if !has_extension {
            candidates.push(format!("{base}.md"));
        }
        candidates.push(base);
    }
    candidates
}

use super::{
    join_path, link_candidates, parent_path, BroadcastSink, ChangeBus, EventSink, FileKind,
    Vault, VaultFile,
};
use crate::document::markdown::extract_metadata;
use crate::document::{DocumentKind, ReadDocument};
use crate::error::{DatatablesError, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone)]
enum Entry {
    File(String),
    Directory,
}

/// An in-memory vault. Counts content writes and can be told to fail them.
pub struct MemoryVault {
    entries: Mutex<BTreeMap<String, Entry>>,
    bus: ChangeBus,
    writes: AtomicUsize,
    fail_writes: AtomicBool,
}

impl MemoryVault {
    pub fn new() -> Self {
        Self::with_sink(Arc::new(BroadcastSink::new(64)))
    }

    pub fn with_sink(sink: Arc<dyn EventSink>) -> Self {
        MemoryVault {
            entries: Mutex::new(BTreeMap::new()),
            bus: ChangeBus::new(sink),
            writes: AtomicUsize::new(0),
            fail_writes: AtomicBool::new(false),
        }
    }

    /// Add a file, creating its parent folders.
    pub fn add_file(&self, path: &str, content: &str) {
        let mut entries = self.entries.lock();
        let mut parent = parent_path(path);
        while !parent.is_empty() {
            entries.insert(parent.to_string(), Entry::Directory);
            parent = parent_path(parent);
        }
        entries.insert(path.to_string(), Entry::File(content.to_string()));
    }

    /// Add a folder, creating its parents.
    pub fn add_directory(&self, path: &str) {
        let mut entries = self.entries.lock();
        let mut current = path.trim_matches('/');
        while !current.is_empty() {
            entries.insert(current.to_string(), Entry::Directory);
            current = parent_path(current);
        }
    }

    pub fn remove(&self, path: &str) {
        self.entries.lock().remove(path);
    }

    pub fn content(&self, path: &str) -> Option<String> {
        match self.entries.lock().get(path) {
            Some(Entry::File(content)) => Some(content.clone()),
            _ => None,
        }
    }

    /// Number of `modify_content` calls that reached storage.
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn kind_of(&self, path: &str) -> Option<FileKind> {
        if path.is_empty() {
            return Some(FileKind::Directory);
        }
        self.entries.lock().get(path).map(|entry| match entry {
            Entry::File(_) => FileKind::File,
            Entry::Directory => FileKind::Directory,
        })
    }

    fn file_content(&self, file: &VaultFile) -> Result<String> {
        match self.entries.lock().get(&file.path) {
            Some(Entry::File(content)) => Ok(content.clone()),
            Some(Entry::Directory) => Err(DatatablesError::NotAFile {
                path: file.path.clone(),
            }),
            None => Err(DatatablesError::NotFound {
                path: file.path.clone(),
            }),
        }
    }

    fn markdown_paths(&self) -> Vec<String> {
        self.entries
            .lock()
            .iter()
            .filter(|(path, entry)| {
                matches!(entry, Entry::File(_)) && DocumentKind::from_path(path).is_some()
            })
            .map(|(path, _)| path.clone())
            .collect()
    }
}

impl Default for MemoryVault {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Vault for MemoryVault {
    fn bus(&self) -> &ChangeBus {
        &self.bus
    }

    async fn markdown_files(&self) -> Result<Vec<VaultFile>> {
        Ok(self.markdown_paths().into_iter().map(VaultFile::file).collect())
    }

    async fn get_file(&self, path: &str) -> Result<Option<VaultFile>> {
        let path = path.trim_matches('/');
        Ok(self.kind_of(path).map(|kind| VaultFile {
            path: path.to_string(),
            kind,
        }))
    }

    async fn create(&self, path: &str, content: &str) -> Result<VaultFile> {
        let path = path.trim_matches('/');
        let mut entries = self.entries.lock();
        if entries.contains_key(path) {
            return Err(DatatablesError::AlreadyExists {
                path: path.to_string(),
            });
        }
        let parent = parent_path(path);
        if !parent.is_empty() && !matches!(entries.get(parent), Some(Entry::Directory)) {
            return Err(DatatablesError::MissingParent {
                path: path.to_string(),
            });
        }
        entries.insert(path.to_string(), Entry::File(content.to_string()));
        Ok(VaultFile::file(path))
    }

    async fn create_empty_markdown_file(
        &self,
        folder: &VaultFile,
        name: &str,
    ) -> Result<VaultFile> {
        self.create(&join_path(&folder.path, &format!("{name}.md")), "")
            .await
    }

    async fn read(&self, file: &VaultFile) -> Result<String> {
        self.file_content(file)
    }

    async fn read_document(&self, file: &VaultFile) -> Result<ReadDocument> {
        let kind = DocumentKind::from_path(&file.path).ok_or_else(|| {
            DatatablesError::Other(format!("Unsupported document: {}", file.path))
        })?;
        let content = self.file_content(file)?;
        let metadata = extract_metadata(&content);
        Ok(ReadDocument {
            kind,
            content,
            metadata: Some(metadata),
        })
    }

    async fn modify_content(&self, file: &VaultFile, content: &str) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(DatatablesError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                format!("write refused: {}", file.path),
            )));
        }
        let mut entries = self.entries.lock();
        match entries.get_mut(&file.path) {
            Some(Entry::File(existing)) => {
                *existing = content.to_string();
                self.writes.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
            Some(Entry::Directory) => Err(DatatablesError::NotAFile {
                path: file.path.clone(),
            }),
            None => Err(DatatablesError::NotFound {
                path: file.path.clone(),
            }),
        }
    }

    async fn resolve_link(&self, link: &str, source_path: &str) -> Result<Option<String>> {
        for candidate in link_candidates(link, source_path) {
            if self.kind_of(&candidate) == Some(FileKind::File) {
                return Ok(Some(candidate));
            }
        }

        let Some(wanted) = link_candidates(link, "").into_iter().next() else {
            return Ok(None);
        };
        let wanted_name = wanted.rsplit('/').next().unwrap_or(&wanted).to_string();
        Ok(self
            .markdown_paths()
            .into_iter()
            .find(|path| path.rsplit('/').next() == Some(wanted_name.as_str())))
    }
}

impl std::fmt::Debug for MemoryVault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryVault")
            .field("entries", &self.entries.lock().len())
            .field("writes", &self.writes())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_create_requires_parent() {
        let vault = MemoryVault::new();
        assert!(vault.create("top.md", "").await.is_ok());

        let err = vault.create("a/b.md", "").await.unwrap_err();
        assert!(matches!(err, DatatablesError::MissingParent { .. }));

        vault.add_directory("a");
        let file = vault
            .create_empty_markdown_file(&VaultFile::directory("a"), "b")
            .await
            .unwrap();
        assert_eq!(file.path, "a/b.md");
        assert_eq!(vault.content("a/b.md").as_deref(), Some(""));
    }

    #[tokio::test]
    async fn test_write_counter_and_failures() {
        let vault = MemoryVault::new();
        vault.add_file("s.json", "{}");
        let file = VaultFile::file("s.json");

        vault.modify_content(&file, "1").await.unwrap();
        vault.modify_content(&file, "2").await.unwrap();
        assert_eq!(vault.writes(), 2);

        vault.set_fail_writes(true);
        assert!(vault.modify_content(&file, "3").await.is_err());
        assert_eq!(vault.writes(), 2);
        assert_eq!(vault.content("s.json").as_deref(), Some("2"));
    }

    #[tokio::test]
    async fn test_markdown_files_only() {
        let vault = MemoryVault::new();
        vault.add_file("b/two.md", "");
        vault.add_file("one.md", "");
        vault.add_file("data.json", "");

        let paths: Vec<_> = vault
            .markdown_files()
            .await
            .unwrap()
            .into_iter()
            .map(|f| f.path)
            .collect();
        assert_eq!(paths, vec!["b/two.md", "one.md"]);
    }

    #[tokio::test]
    async fn test_resolve_link_by_name() {
        let vault = MemoryVault::new();
        vault.add_file("projects/Launch.md", "");

        let resolved = vault.resolve_link("[[Launch]]", "daily/today.md").await.unwrap();
        assert_eq!(resolved.as_deref(), Some("projects/Launch.md"));
        assert_eq!(vault.resolve_link("Nope", "a.md").await.unwrap(), None);
    }
}

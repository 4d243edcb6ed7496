use super::{join_path, link_candidates, ChangeBus, EventSink, FileKind, Vault, VaultFile};
use crate::document::markdown::extract_metadata;
use crate::document::{DocumentKind, ReadDocument};
use crate::error::{DatatablesError, Result};
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// A vault backed by a directory on the local filesystem.
pub struct LocalVault {
    root: PathBuf,
    bus: ChangeBus,
}

impl LocalVault {
    pub fn new(root: impl Into<PathBuf>, sink: Arc<dyn EventSink>) -> Self {
        LocalVault {
            root: root.into(),
            bus: ChangeBus::new(sink),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn absolute(&self, path: &str) -> PathBuf {
        self.root.join(path.trim_start_matches('/'))
    }

    async fn kind_of(&self, path: &str) -> Result<Option<FileKind>> {
        match tokio::fs::metadata(self.absolute(path)).await {
            Ok(meta) if meta.is_dir() => Ok(Some(FileKind::Directory)),
            Ok(_) => Ok(Some(FileKind::File)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn require_file(&self, file: &VaultFile) -> Result<PathBuf> {
        match self.kind_of(&file.path).await? {
            Some(FileKind::File) => Ok(self.absolute(&file.path)),
            Some(FileKind::Directory) => Err(DatatablesError::NotAFile {
                path: file.path.clone(),
            }),
            None => Err(DatatablesError::NotFound {
                path: file.path.clone(),
            }),
        }
    }

    /// Walk the vault for markdown files on the blocking pool.
    async fn scan_markdown(&self) -> Result<Vec<VaultFile>> {
        let root = self.root.clone();
        tokio::task::spawn_blocking(move || scan_markdown(&root))
            .await
            .map_err(|e| DatatablesError::Other(format!("Markdown scan failed: {e}")))?
    }
}

fn relative(root: &Path, absolute: &Path) -> Option<String> {
    let rel = absolute.strip_prefix(root).ok()?;
    let parts: Vec<String> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    Some(parts.join("/"))
}

fn scan_markdown(root: &Path) -> Result<Vec<VaultFile>> {
    let pattern = format!("{}/**/*.md", glob::Pattern::escape(&root.to_string_lossy()));
    let entries = glob::glob(&pattern)
        .map_err(|e| DatatablesError::Other(format!("Invalid glob pattern: {e}")))?;

    let mut files = Vec::new();
    for entry in entries {
        let path = entry.map_err(|e| DatatablesError::Io(e.into()))?;
        if !path.is_file() {
            continue;
        }
        let Some(rel) = relative(root, &path) else {
            continue;
        };
        // Host configuration folders such as .obsidian or .git
        if rel.split('/').any(|part| part.starts_with('.')) {
            continue;
        }
        files.push(VaultFile::file(rel));
    }
    files.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(files)
}

#[async_trait]
impl Vault for LocalVault {
    fn bus(&self) -> &ChangeBus {
        &self.bus
    }

    async fn markdown_files(&self) -> Result<Vec<VaultFile>> {
        self.scan_markdown().await
    }

    async fn get_file(&self, path: &str) -> Result<Option<VaultFile>> {
        Ok(self.kind_of(path).await?.map(|kind| VaultFile {
            path: path.trim_matches('/').to_string(),
            kind,
        }))
    }

    async fn create(&self, path: &str, content: &str) -> Result<VaultFile> {
        if self.kind_of(path).await?.is_some() {
            return Err(DatatablesError::AlreadyExists {
                path: path.to_string(),
            });
        }

        let absolute = self.absolute(path);
        let parent_is_dir = match absolute.parent() {
            Some(parent) => tokio::fs::metadata(parent)
                .await
                .map(|meta| meta.is_dir())
                .unwrap_or(false),
            None => false,
        };
        if !parent_is_dir {
            return Err(DatatablesError::MissingParent {
                path: path.to_string(),
            });
        }

        tokio::fs::write(&absolute, content).await?;
        Ok(VaultFile::file(path.trim_matches('/')))
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
        let absolute = self.require_file(file).await?;
        Ok(tokio::fs::read_to_string(absolute).await?)
    }

    async fn read_document(&self, file: &VaultFile) -> Result<ReadDocument> {
        let kind = DocumentKind::from_path(&file.path).ok_or_else(|| {
            DatatablesError::Other(format!("Unsupported document: {}", file.path))
        })?;
        let content = self.read(file).await?;
        let metadata = extract_metadata(&content);
        Ok(ReadDocument {
            kind,
            content,
            metadata: Some(metadata),
        })
    }

    async fn modify_content(&self, file: &VaultFile, content: &str) -> Result<()> {
        let absolute = self.require_file(file).await?;
        tokio::fs::write(absolute, content).await?;
        Ok(())
    }

    async fn resolve_link(&self, link: &str, source_path: &str) -> Result<Option<String>> {
        for candidate in link_candidates(link, source_path) {
            if self.kind_of(&candidate).await? == Some(FileKind::File) {
                return Ok(Some(candidate));
            }
        }

        // Fall back to a vault-wide match on the file name
        let Some(wanted) = link_candidates(link, "").into_iter().next() else {
            return Ok(None);
        };
        let wanted_name = wanted.rsplit('/').next().unwrap_or(&wanted).to_string();
        Ok(self
            .scan_markdown()
            .await?
            .into_iter()
            .find(|file| file.name() == wanted_name)
            .map(|file| file.path))
    }
}

impl std::fmt::Debug for LocalVault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalVault").field("root", &self.root).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::RecordingSink;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn setup() -> (TempDir, LocalVault) {
        let tmp = TempDir::new().unwrap();
        let vault = LocalVault::new(tmp.path(), Arc::new(RecordingSink::default()));
        (tmp, vault)
    }

    #[tokio::test]
    async fn test_markdown_files_sorted_and_filtered() {
        let (tmp, vault) = setup();
        std::fs::create_dir_all(tmp.path().join("notes")).unwrap();
        std::fs::create_dir_all(tmp.path().join(".obsidian")).unwrap();
        std::fs::write(tmp.path().join("notes/b.md"), "b").unwrap();
        std::fs::write(tmp.path().join("a.md"), "a").unwrap();
        std::fs::write(tmp.path().join("image.png"), "").unwrap();
        std::fs::write(tmp.path().join(".obsidian/hidden.md"), "").unwrap();

        let paths: Vec<_> = vault
            .markdown_files()
            .await
            .unwrap()
            .into_iter()
            .map(|f| f.path)
            .collect();
        assert_eq!(paths, vec!["a.md", "notes/b.md"]);
    }

    #[tokio::test]
    async fn test_create_errors() {
        let (_tmp, vault) = setup();
        vault.create("a.md", "x").await.unwrap();

        let err = vault.create("a.md", "y").await.unwrap_err();
        assert!(matches!(err, DatatablesError::AlreadyExists { .. }));

        let err = vault.create("missing/b.md", "y").await.unwrap_err();
        assert!(matches!(err, DatatablesError::MissingParent { .. }));
    }

    #[tokio::test]
    async fn test_read_and_modify() {
        let (tmp, vault) = setup();
        std::fs::create_dir(tmp.path().join("dir")).unwrap();
        let file = vault.create("a.md", "---\ntags: x\n---\nhi #there").await.unwrap();

        let doc = vault.read_document(&file).await.unwrap();
        let metadata = doc.metadata.unwrap();
        assert_eq!(metadata.tags, vec!["#there"]);
        assert!(metadata.frontmatter.unwrap().contains_key("tags"));

        vault.modify_content(&file, "new").await.unwrap();
        assert_eq!(vault.read(&file).await.unwrap(), "new");

        let err = vault.read(&VaultFile::file("dir")).await.unwrap_err();
        assert!(matches!(err, DatatablesError::NotAFile { .. }));
        let err = vault.read(&VaultFile::file("nope.md")).await.unwrap_err();
        assert!(matches!(err, DatatablesError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_get_file_reports_directories() {
        let (tmp, vault) = setup();
        std::fs::create_dir(tmp.path().join("Schemas")).unwrap();

        let dir = vault.get_file("Schemas").await.unwrap().unwrap();
        assert!(dir.is_directory());
        assert!(vault.get_file("Schemas/x.json").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_resolve_link() {
        let (tmp, vault) = setup();
        std::fs::create_dir_all(tmp.path().join("daily")).unwrap();
        std::fs::create_dir_all(tmp.path().join("deep/er")).unwrap();
        std::fs::write(tmp.path().join("daily/Note.md"), "").unwrap();
        std::fs::write(tmp.path().join("Note.md"), "").unwrap();
        std::fs::write(tmp.path().join("deep/er/Other.md"), "").unwrap();

        let from_daily = vault.resolve_link("[[Note]]", "daily/x.md").await.unwrap();
        assert_eq!(from_daily.as_deref(), Some("daily/Note.md"));

        let from_top = vault.resolve_link("Note", "top.md").await.unwrap();
        assert_eq!(from_top.as_deref(), Some("Note.md"));

        let by_name = vault.resolve_link("Other", "top.md").await.unwrap();
        assert_eq!(by_name.as_deref(), Some("deep/er/Other.md"));

        assert_eq!(vault.resolve_link("Missing", "top.md").await.unwrap(), None);
    }
}

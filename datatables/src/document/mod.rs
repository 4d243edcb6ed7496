// Documents - normalized parse results and the descriptors used to request them

pub mod markdown;
pub mod registry;

use crate::vault::VaultFile;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

pub use markdown::parse_markdown;
pub use registry::{ParserFn, ParserRegistry};

/// Kinds of source documents the index knows how to parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    Markdown,
}

impl DocumentKind {
    /// Infer the document kind from a vault path. Unsupported paths return `None`.
    pub fn from_path(path: &str) -> Option<Self> {
        let extension = path.rsplit_once('.').map(|(_, ext)| ext)?;
        if extension.eq_ignore_ascii_case("md") {
            Some(DocumentKind::Markdown)
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentKind::Markdown => "markdown",
        }
    }
}

/// A parsed document. `path` is its key in the index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub kind: DocumentKind,
    pub path: String,
    pub data: DocumentData,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentData {
    /// Lowercase, `#`-prefixed.
    pub tags: BTreeSet<String>,
    /// Lowercased frontmatter key to raw value, reserved keys excluded.
    pub fields: BTreeMap<String, serde_json::Value>,
    /// Table name to property uuid to a value accepted by that property's validator.
    pub rendered_fields: BTreeMap<String, BTreeMap<String, serde_json::Value>>,
}

/// Request descriptor handed to the loader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentMetadata {
    pub kind: DocumentKind,
    pub path: String,
    pub file: VaultFile,
}

impl DocumentMetadata {
    /// Build a descriptor for a vault file, or `None` if its kind is unsupported.
    pub fn for_file(file: &VaultFile) -> Option<Self> {
        let kind = DocumentKind::from_path(&file.path)?;
        Some(DocumentMetadata {
            kind,
            path: file.path.clone(),
            file: file.clone(),
        })
    }
}

/// Raw input to a parser, produced by the vault.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadDocument {
    pub kind: DocumentKind,
    pub content: String,
    pub metadata: Option<HostMetadata>,
}

/// What the host already extracted from a document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HostMetadata {
    pub frontmatter: Option<serde_json::Map<String, serde_json::Value>>,
    /// Inline tags as found in the body, not yet normalized.
    pub tags: Vec<String>,
}

/// Canonical form of a tag: lowercase with a single leading `#`.
pub fn normalize_tag(tag: &str) -> String {
    let tag = tag.trim().to_lowercase();
    if tag.starts_with('#') {
        tag
    } else {
        format!("#{tag}")
    }
}

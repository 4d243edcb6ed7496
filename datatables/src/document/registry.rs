use super::{parse_markdown, Document, DocumentKind, ReadDocument};
use crate::error::{DatatablesError, Result};
use crate::schema::Schema;
use std::collections::HashMap;
use std::sync::Arc;

/// A pure parse function. Runs on a worker thread and must not touch shared state.
pub type ParserFn = Arc<dyn Fn(&str, &ReadDocument, &Schema) -> Result<Document> + Send + Sync>;

/// Maps each document kind to the parser that handles it.
#[derive(Clone)]
pub struct ParserRegistry {
    parsers: HashMap<DocumentKind, ParserFn>,
}

impl ParserRegistry {
    /// A registry with no parsers. Every parse fails until one is registered.
    pub fn empty() -> Self {
        ParserRegistry {
            parsers: HashMap::new(),
        }
    }

    /// Register (or replace) the parser for `kind`.
    pub fn register<F>(&mut self, kind: DocumentKind, parser: F) -> &mut Self
    where
        F: Fn(&str, &ReadDocument, &Schema) -> Result<Document> + Send + Sync + 'static,
    {
        self.parsers.insert(kind, Arc::new(parser));
        self
    }

    pub fn get(&self, kind: DocumentKind) -> Option<&ParserFn> {
        self.parsers.get(&kind)
    }

    /// Dispatch on `read.kind`.
    pub fn parse(&self, path: &str, read: &ReadDocument, schema: &Schema) -> Result<Document> {
        let parser = self.get(read.kind).ok_or_else(|| {
            DatatablesError::Other(format!(
                "No parser registered for document kind '{}'",
                read.kind.as_str()
            ))
        })?;
        parser(path, read, schema)
    }
}

impl Default for ParserRegistry {
    fn default() -> Self {
        let mut registry = ParserRegistry::empty();
        registry.register(DocumentKind::Markdown, parse_markdown);
        registry
    }
}

impl std::fmt::Debug for ParserRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParserRegistry")
            .field("kinds", &self.parsers.keys().collect::<Vec<_>>())
            .finish()
    }
}

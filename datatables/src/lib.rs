pub mod config;
pub mod document;
pub mod error;
pub mod index;
pub mod schema;
pub mod store;
pub mod validation;
pub mod vault;

#[cfg(test)]
pub(crate) mod test_support;

pub use config::Settings;
pub use document::{Document, DocumentKind, ParserRegistry};
pub use error::{DatatablesError, ParseFailure, PersistError, Result};
pub use index::{Index, TagIndex, INDEX_CHANGED_EVENT};
pub use schema::{Schema, SchemaLoader, Table, SCHEMA_CHANGED_EVENT};
pub use store::Store;
pub use vault::{ChangeBus, LocalVault, MemoryVault, Vault, VaultEvent, VaultFile};

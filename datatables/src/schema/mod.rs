pub mod loader;
pub mod parser;
pub mod table;
pub mod types;

pub use loader::{SchemaLoader, SharedSchema, SCHEMA_CHANGED_EVENT};
pub use parser::{parse_schema_str, schema_to_string};
pub use table::{Table, ViewPosition};
pub use types::*;

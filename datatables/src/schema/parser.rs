use super::types::Schema;
use crate::error::{DatatablesError, Result};
use crate::validation;

/// Parse schema text.
///
/// Malformed JSON is a `SchemaSyntax` error; JSON that does not describe a
/// valid schema (wrong shapes, broken cross references) is `SchemaValidation`.
pub fn parse_schema_str(content: &str) -> Result<Schema> {
    let json: serde_json::Value = serde_json::from_str(content)
        .map_err(|e| DatatablesError::SchemaSyntax(e.to_string()))?;

    if json.is_null() {
        return Err(DatatablesError::SchemaValidation("Data is null".into()));
    }

    let schema: Schema = serde_json::from_value(json)
        .map_err(|e| DatatablesError::SchemaValidation(e.to_string()))?;

    let problems = validation::validate_schema(&schema);
    if !problems.is_empty() {
        return Err(DatatablesError::SchemaValidation(problems.join("; ")));
    }

    Ok(schema)
}

/// Serialize a schema the way it is stored on disk.
pub fn schema_to_string(schema: &Schema) -> Result<String> {
    Ok(serde_json::to_string_pretty(schema)?)
}

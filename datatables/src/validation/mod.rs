use crate::schema::{PropertyConfig, Schema, TableSchema};
use serde_json::Value;
use std::collections::HashSet;

/// Check the cross-field rules serde cannot express.
/// Returns every problem found; an empty list means the schema is valid.
pub fn validate_schema(schema: &Schema) -> Vec<String> {
    let mut problems = Vec::new();

    if schema.version < 1 {
        problems.push(format!(
            "Schema version must be at least 1, got {}",
            schema.version
        ));
    }

    for (table_name, table) in &schema.tables {
        if !table_name.starts_with('#') || table_name.len() < 2 {
            problems.push(format!("Table '{table_name}' must be a tag starting with '#'"));
        }
        if *table_name != table_name.to_lowercase() {
            problems.push(format!("Table '{table_name}' must be lowercase"));
        }
        check_table(table_name, table, &mut problems);
    }

    problems
}

/// The per-table subset of `validate_schema`.
pub fn validate_table(table_name: &str, table: &TableSchema) -> Vec<String> {
    let mut problems = Vec::new();
    check_table(table_name, table, &mut problems);
    problems
}

fn check_table(table_name: &str, table: &TableSchema, problems: &mut Vec<String>) {
    let mut property_uuids = HashSet::new();
    let mut property_names = HashSet::new();

    for property in &table.properties {
        if property.uuid.is_empty() {
            problems.push(format!("Property '{}' in {table_name} has an empty uuid", property.name));
        } else if !property_uuids.insert(property.uuid.as_str()) {
            problems.push(format!("Duplicate property uuid '{}' in {table_name}", property.uuid));
        }

        if property.name.trim().is_empty() {
            problems.push(format!("Property '{}' in {table_name} has an empty name", property.uuid));
        } else if !property_names.insert(property.name.as_str()) {
            problems.push(format!("Duplicate property name '{}' in {table_name}", property.name));
        }

        match &property.config {
            PropertyConfig::Select(select) => {
                let mut option_ids = HashSet::new();
                for option in &select.options {
                    if !option_ids.insert(option.id.as_str()) {
                        problems.push(format!(
                            "Duplicate select option id '{}' in {table_name}.{}",
                            option.id, property.name
                        ));
                    }
                }
            }
            PropertyConfig::Reference(reference) => {
                if !reference.target.is_empty() && !reference.target.starts_with('#') {
                    problems.push(format!(
                        "Reference '{}' in {table_name} targets '{}', which is not a table tag",
                        property.name, reference.target
                    ));
                }
            }
            _ => {}
        }
    }

    let mut view_uuids = HashSet::new();
    for view in &table.views {
        if !view_uuids.insert(view.uuid.as_str()) {
            problems.push(format!("Duplicate view uuid '{}' in {table_name}", view.uuid));
        }
        for column in &view.config.properties {
            if !property_uuids.contains(column.field.as_str()) {
                problems.push(format!(
                    "View '{}' in {table_name} shows unknown property '{}'",
                    view.name, column.field
                ));
            }
        }
        let mut filter_uuids = HashSet::new();
        for filter in &view.config.filters {
            if !filter_uuids.insert(filter.uuid.as_str()) {
                problems.push(format!(
                    "Duplicate filter uuid '{}' in view '{}' of {table_name}",
                    filter.uuid, view.name
                ));
            }
            if !property_uuids.contains(filter.field.as_str()) {
                problems.push(format!(
                    "View '{}' in {table_name} filters on unknown property '{}'",
                    view.name, filter.field
                ));
            }
        }
    }

    if let Some(templates) = &table.templates {
        let mut template_uuids = HashSet::new();
        for template in &templates.options {
            if !template_uuids.insert(template.uuid.as_str()) {
                problems.push(format!("Duplicate template uuid '{}' in {table_name}", template.uuid));
            }
            if template.path.is_empty() {
                problems.push(format!("Template '{}' in {table_name} has no path", template.uuid));
            }
        }
    }
}

/// Validate a raw frontmatter value against a property's kind.
pub fn validate_field(config: &PropertyConfig, value: &Value) -> Result<(), String> {
    let ok = match config {
        PropertyConfig::Text(_) | PropertyConfig::Title(_) => value.is_string(),
        PropertyConfig::Number(_) => value.is_number(),
        PropertyConfig::Checkbox(_) => value.is_boolean(),
        PropertyConfig::Select(_) => value.is_string() || value.is_null(),
        PropertyConfig::Date(_) => {
            return match value.as_str() {
                Some(s) if is_date(s) => Ok(()),
                Some(s) => Err(format!("'{s}' is not a date")),
                None => Err(format!("expected date string, got {}", type_name(value))),
            };
        }
        PropertyConfig::Reference(_) => match value {
            Value::String(_) => true,
            Value::Array(items) => items.iter().all(Value::is_string),
            _ => false,
        },
    };

    if ok {
        Ok(())
    } else {
        Err(format!(
            "expected {}, got {}",
            expected_name(config),
            type_name(value)
        ))
    }
}

fn is_date(s: &str) -> bool {
    chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok()
        || chrono::DateTime::parse_from_rfc3339(s).is_ok()
        || chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S").is_ok()
        || chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M").is_ok()
}

fn expected_name(config: &PropertyConfig) -> &'static str {
    match config {
        PropertyConfig::Text(_) | PropertyConfig::Title(_) => "string",
        PropertyConfig::Number(_) => "number",
        PropertyConfig::Checkbox(_) => "boolean",
        PropertyConfig::Select(_) => "string or null",
        PropertyConfig::Date(_) => "date string",
        PropertyConfig::Reference(_) => "string or list of strings",
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "object",
    }
}

// Markdown - frontmatter/tag extraction for vaults and the markdown parser

use super::{normalize_tag, Document, DocumentData, DocumentKind, HostMetadata, ReadDocument};
use crate::error::{DatatablesError, Result};
use crate::schema::Schema;
use crate::validation;
use regex::Regex;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::OnceLock;

/// Frontmatter keys that never become document fields.
const FRONTMATTER_EXCLUDE_FIELDS: &[&str] = &[
    "tags", "tag", "aliases", "alias", "banner", "banner_y", "position",
];

// ── Host metadata ───────────────────────────────────────────────────

/// Extract what a host would have cached for a markdown file: frontmatter and inline tags.
pub fn extract_metadata(content: &str) -> HostMetadata {
    let (frontmatter, body) = split_frontmatter(content);
    let frontmatter = frontmatter.and_then(|yaml| {
        match serde_yaml::from_str::<Value>(yaml) {
            Ok(Value::Object(map)) => Some(map),
            Ok(Value::Null) => Some(serde_json::Map::new()),
            Ok(_) => None,
            Err(e) => {
                log::debug!("Ignoring malformed frontmatter: {e}");
                None
            }
        }
    });

    HostMetadata {
        frontmatter,
        tags: extract_inline_tags(body),
    }
}

/// Split content into the raw frontmatter block (if any) and the body.
pub fn split_frontmatter(content: &str) -> (Option<&str>, &str) {
    let rest = if let Some(rest) = content.strip_prefix("---\n") {
        rest
    } else if let Some(rest) = content.strip_prefix("---\r\n") {
        rest
    } else {
        return (None, content);
    };

    // An empty block closes immediately.
    if let Some(body) = rest.strip_prefix("---\n").or_else(|| rest.strip_prefix("---\r\n")) {
        return (Some(""), body);
    }
    if rest == "---" {
        return (Some(""), "");
    }

    let closing = rest
        .find("\n---\n")
        .map(|i| (i, i + 5))
        .or_else(|| rest.find("\n---\r\n").map(|i| (i, i + 6)))
        .or_else(|| rest.ends_with("\n---").then(|| (rest.len() - 4, rest.len())));

    match closing {
        Some((yaml_end, body_start)) => (Some(&rest[..yaml_end]), &rest[body_start..]),
        None => (None, content),
    }
}

/// Inline `#tags` in body text, skipping fenced code blocks. Returned as written.
pub fn extract_inline_tags(body: &str) -> Vec<String> {
    static TAG_RE: OnceLock<Regex> = OnceLock::new();
    let tag_re = TAG_RE.get_or_init(|| {
        Regex::new(r"(?:^|[\s(])(#[\p{L}_][\p{L}\p{N}_/-]*)").expect("static tag regex")
    });

    let mut tags = Vec::new();
    let mut in_code_block = false;
    for line in body.lines() {
        if line.trim_start().starts_with("```") {
            in_code_block = !in_code_block;
            continue;
        }
        if in_code_block {
            continue;
        }
        for cap in tag_re.captures_iter(line) {
            let tag = cap[1].to_string();
            if !tags.contains(&tag) {
                tags.push(tag);
            }
        }
    }
    tags
}

// ── Parser ──────────────────────────────────────────────────────────

/// Parse a markdown document into its normalized form.
///
/// Tags come from the host's inline tags plus the `tag`/`tags` frontmatter keys.
/// Frontmatter keys that name a schema table have their properties run through
/// the matching field validators; accepted values land in `rendered_fields`.
pub fn parse_markdown(path: &str, read: &ReadDocument, schema: &Schema) -> Result<Document> {
    let metadata = read.metadata.as_ref().ok_or_else(|| {
        DatatablesError::Other(format!(
            "Missing metadata when parsing markdown file: {path}"
        ))
    })?;

    let tags = parse_tags(metadata);
    let (fields, rendered_fields) = parse_fields(metadata, schema);

    Ok(Document {
        kind: DocumentKind::Markdown,
        path: path.to_string(),
        data: DocumentData {
            tags,
            fields,
            rendered_fields,
        },
    })
}

fn parse_tags(metadata: &HostMetadata) -> BTreeSet<String> {
    let mut tags: BTreeSet<String> = metadata.tags.iter().map(|t| normalize_tag(t)).collect();

    if let Some(frontmatter) = &metadata.frontmatter {
        for (key, value) in frontmatter {
            if matches!(key.to_lowercase().as_str(), "tag" | "tags") {
                tags.extend(list_or_string(value).iter().map(|t| normalize_tag(t)));
            }
        }
    }

    tags
}

type Fields = BTreeMap<String, Value>;
type RenderedFields = BTreeMap<String, BTreeMap<String, Value>>;

fn parse_fields(metadata: &HostMetadata, schema: &Schema) -> (Fields, RenderedFields) {
    let mut fields = BTreeMap::new();
    let mut rendered_fields = BTreeMap::new();

    let Some(frontmatter) = &metadata.frontmatter else {
        return (fields, rendered_fields);
    };

    for (key, value) in frontmatter {
        let lower = key.to_lowercase();
        if FRONTMATTER_EXCLUDE_FIELDS.contains(&lower.as_str()) {
            continue;
        }

        let table_name = normalize_tag(key);
        if let (Some(table), Some(values)) = (schema.tables.get(&table_name), value.as_object()) {
            let mut rendered = BTreeMap::new();

            for property in &table.properties {
                let Some(raw) = values.get(&property.name) else {
                    continue;
                };
                match validation::validate_field(&property.config, raw) {
                    Ok(()) => {
                        rendered.insert(property.uuid.clone(), raw.clone());
                    }
                    Err(problem) => {
                        log::debug!(
                            "Dropping value for '{}' in {table_name}: {problem}",
                            property.name
                        );
                    }
                }
            }

            rendered_fields.insert(table_name, rendered);
        }

        fields.insert(lower, value.clone());
    }

    (fields, rendered_fields)
}

/// Flatten a frontmatter value into a list of strings. Strings split on commas and whitespace.
fn list_or_string(value: &Value) -> Vec<String> {
    match value {
        Value::Null => Vec::new(),
        Value::Array(items) => items.iter().flat_map(list_or_string).collect(),
        Value::String(s) => s
            .split(|c: char| c == ',' || c.is_whitespace())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect(),
        Value::Bool(_) | Value::Number(_) => vec![value.to_string()],
        Value::Object(_) => Vec::new(),
    }
}

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Top-level schema document persisted as JSON in the vault.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    pub version: u32,
    #[serde(default)]
    pub tables: BTreeMap<String, TableSchema>,
}

impl Default for Schema {
    fn default() -> Self {
        Schema {
            version: 1,
            tables: BTreeMap::new(),
        }
    }
}

/// Definition of a single table, keyed in `Schema::tables` by its tag.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TableSchema {
    #[serde(default)]
    pub properties: Vec<PropertySchema>,
    #[serde(default)]
    pub views: Vec<ViewSchema>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub templates: Option<TemplateSchema>,
}

/// A single column of a table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertySchema {
    pub uuid: String,
    pub name: String,
    #[serde(flatten)]
    pub config: PropertyConfig,
}

/// Property kind plus its kind-specific configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "config", rename_all = "snake_case")]
pub enum PropertyConfig {
    Text(EmptyConfig),
    Number(EmptyConfig),
    Select(SelectConfig),
    Date(DateConfig),
    Checkbox(EmptyConfig),
    Reference(ReferenceConfig),
    Title(EmptyConfig),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropertyKind {
    Text,
    Number,
    Select,
    Date,
    Checkbox,
    Reference,
    Title,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmptyConfig {}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectConfig {
    #[serde(default)]
    pub sort: SelectSort,
    #[serde(default)]
    pub options: Vec<SelectOption>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectSort {
    #[default]
    Manual,
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectOption {
    pub id: String,
    pub name: String,
    pub color: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateConfig {
    #[serde(default = "default_date_format")]
    pub date_format: String,
    #[serde(default = "default_time_format")]
    pub time_format: String,
}

fn default_date_format() -> String {
    "Full Date".into()
}

fn default_time_format() -> String {
    "12 hour".into()
}

impl Default for DateConfig {
    fn default() -> Self {
        DateConfig {
            date_format: default_date_format(),
            time_format: default_time_format(),
        }
    }
}

/// Reference to rows of another table. An empty target means "not yet set".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceConfig {
    #[serde(default)]
    pub target: String,
}

/// View definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewSchema {
    pub uuid: String,
    pub name: String,
    pub kind: ViewKind,
    #[serde(default)]
    pub config: ViewConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViewKind {
    Table,
    Board,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ViewConfig {
    #[serde(default)]
    pub properties: Vec<ViewProperty>,
    #[serde(default)]
    pub filters: Vec<ViewFilter>,
}

/// A visible column: `field` is the uuid of the property it shows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewProperty {
    pub uuid: String,
    pub field: String,
}

/// A row filter on the property `field`. `kind` names the comparison.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewFilter {
    pub uuid: String,
    pub field: String,
    pub kind: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TemplateSchema {
    #[serde(default)]
    pub options: Vec<TemplateOption>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateOption {
    pub uuid: String,
    pub name: String,
    pub path: String,
}

impl PropertyConfig {
    pub fn kind(&self) -> PropertyKind {
        match self {
            PropertyConfig::Text(_) => PropertyKind::Text,
            PropertyConfig::Number(_) => PropertyKind::Number,
            PropertyConfig::Select(_) => PropertyKind::Select,
            PropertyConfig::Date(_) => PropertyKind::Date,
            PropertyConfig::Checkbox(_) => PropertyKind::Checkbox,
            PropertyConfig::Reference(_) => PropertyKind::Reference,
            PropertyConfig::Title(_) => PropertyKind::Title,
        }
    }

    /// Default configuration for a freshly created property of `kind`.
    pub fn default_for(kind: PropertyKind) -> Self {
        match kind {
            PropertyKind::Text => PropertyConfig::Text(EmptyConfig {}),
            PropertyKind::Number => PropertyConfig::Number(EmptyConfig {}),
            PropertyKind::Select => PropertyConfig::Select(SelectConfig::default()),
            PropertyKind::Date => PropertyConfig::Date(DateConfig::default()),
            PropertyKind::Checkbox => PropertyConfig::Checkbox(EmptyConfig {}),
            PropertyKind::Reference => PropertyConfig::Reference(ReferenceConfig::default()),
            PropertyKind::Title => PropertyConfig::Title(EmptyConfig {}),
        }
    }
}

impl PropertyKind {
    /// Display name, used to generate property names.
    pub fn display_name(&self) -> &'static str {
        match self {
            PropertyKind::Text => "Text",
            PropertyKind::Number => "Number",
            PropertyKind::Select => "Select",
            PropertyKind::Date => "Date",
            PropertyKind::Checkbox => "Checkbox",
            PropertyKind::Reference => "Reference",
            PropertyKind::Title => "Title",
        }
    }
}

impl PropertyKind {
    /// Comparison and operand a new filter on this kind starts with.
    /// `None` for kinds that cannot be filtered.
    pub fn default_filter(&self) -> Option<(&'static str, serde_json::Value)> {
        match self {
            PropertyKind::Text | PropertyKind::Title => Some(("CONTAINS", "".into())),
            PropertyKind::Date => Some(("IS", "today".into())),
            _ => None,
        }
    }
}

impl ViewKind {
    pub fn display_name(&self) -> &'static str {
        match self {
            ViewKind::Table => "Table",
            ViewKind::Board => "Board",
        }
    }
}

impl std::str::FromStr for PropertyKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        serde_json::from_value(serde_json::Value::String(s.to_lowercase()))
            .map_err(|_| format!("Unknown property kind: {s}"))
    }
}

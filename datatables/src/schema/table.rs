use super::loader::SchemaLoader;
use super::types::{
    PropertyConfig, PropertyKind, PropertySchema, TableSchema, TemplateOption, TemplateSchema,
    ViewConfig, ViewFilter, ViewKind, ViewProperty, ViewSchema,
};
use crate::error::{DatatablesError, Result};
use crate::validation::validate_table;
use crate::vault::VaultFile;
use uuid::Uuid;

/// Handle to one table of the schema, obtained from `SchemaLoader::table`.
///
/// Every mutating operation persists the schema before returning.
#[derive(Debug, Clone)]
pub struct Table {
    name: String,
    loader: SchemaLoader,
}

impl Table {
    pub(crate) fn new(name: String, loader: SchemaLoader) -> Self {
        Table { name, loader }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn read<R>(&self, f: impl FnOnce(&TableSchema) -> R) -> Result<R> {
        let schema = self.loader.schema();
        let schema = schema.read();
        let table = schema
            .tables
            .get(&self.name)
            .ok_or_else(|| DatatablesError::TableNotFound(self.name.clone()))?;
        Ok(f(table))
    }

    /// Apply `f` to a copy of the table and keep the copy only if it still
    /// validates. The shared schema is left untouched on error.
    fn write<R>(&self, f: impl FnOnce(&mut TableSchema) -> R) -> Result<R> {
        self.loader.update(|schema| {
            let table = schema
                .tables
                .get_mut(&self.name)
                .ok_or_else(|| DatatablesError::TableNotFound(self.name.clone()))?;

            let mut draft = table.clone();
            let result = f(&mut draft);

            let problems = validate_table(&self.name, &draft);
            if !problems.is_empty() {
                return Err(DatatablesError::InvalidSchemaChange {
                    table: self.name.clone(),
                    reason: problems.join("; "),
                });
            }

            *table = draft;
            Ok(result)
        })
    }

    /// Apply `f` and persist if it reports a change.
    async fn change(&self, f: impl FnOnce(&mut TableSchema) -> bool) -> Result<()> {
        if !self.write(f)? {
            return Ok(());
        }

        let bus = self.loader.vault().bus();
        bus.with_lock(self.loader.persist()).await
    }

    // ── Properties ──────────────────────────────────────────────────

    pub fn properties(&self) -> Result<Vec<PropertySchema>> {
        self.read(|table| table.properties.clone())
    }

    pub fn find_property(&self, uuid: &str) -> Result<Option<PropertySchema>> {
        self.read(|table| table.properties.iter().find(|p| p.uuid == uuid).cloned())
    }

    /// `"{Kind} 1"` through `"{Kind} 19"`, whichever is free first, else a random UUID.
    pub fn next_available_property_name(&self, kind: PropertyKind) -> Result<String> {
        self.read(|table| next_property_name(table, kind))
    }

    /// Add a property of `kind` with its default config and show it in every view.
    pub async fn create_property(&self, kind: PropertyKind) -> Result<PropertySchema> {
        let bus = self.loader.vault().bus();
        bus.with_lock(async {
            let property = self.write(|table| {
                let property = PropertySchema {
                    uuid: Uuid::new_v4().to_string(),
                    name: next_property_name(table, kind),
                    config: PropertyConfig::default_for(kind),
                };
                table.properties.push(property.clone());
                for view in &mut table.views {
                    view.config.properties.push(ViewProperty {
                        uuid: Uuid::new_v4().to_string(),
                        field: property.uuid.clone(),
                    });
                }
                property
            })?;

            self.loader.persist().await?;
            Ok::<_, DatatablesError>(property)
        })
        .await
    }

    /// Rename a property. Unknown uuids are ignored.
    ///
    /// Names must be non-empty and unique within the table.
    pub async fn rename_property(&self, uuid: &str, name: &str) -> Result<()> {
        self.change(|table| match table.properties.iter_mut().find(|p| p.uuid == uuid) {
            Some(property) => {
                property.name = name.to_string();
                true
            }
            None => false,
        })
        .await
    }

    /// Edit a property's config and persist. Unknown uuids are ignored.
    pub async fn update_property_config(
        &self,
        uuid: &str,
        update: impl FnOnce(&mut PropertyConfig),
    ) -> Result<()> {
        self.change(|table| match table.properties.iter_mut().find(|p| p.uuid == uuid) {
            Some(property) => {
                update(&mut property.config);
                true
            }
            None => false,
        })
        .await
    }

    /// Move the property at `from` to position `to`.
    /// Out of range positions are ignored.
    pub async fn move_property(&self, from: usize, to: usize) -> Result<()> {
        self.change(|table| {
            let len = table.properties.len();
            if from == to || from >= len || to >= len {
                return false;
            }
            let property = table.properties.remove(from);
            table.properties.insert(to, property);
            true
        })
        .await
    }

    // ── Views ───────────────────────────────────────────────────────

    pub fn views(&self) -> Result<Vec<ViewSchema>> {
        self.read(|table| table.views.clone())
    }

    pub fn view(&self, uuid: &str) -> Result<Option<ViewSchema>> {
        self.read(|table| table.views.iter().find(|v| v.uuid == uuid).cloned())
    }

    pub fn next_available_view_name(&self, kind: ViewKind) -> Result<String> {
        self.read(|table| next_view_name(table, kind))
    }

    /// Add a view of `kind` showing every property.
    pub async fn create_view(&self, kind: ViewKind) -> Result<ViewSchema> {
        let bus = self.loader.vault().bus();
        bus.with_lock(async {
            let view = self.write(|table| {
                let view = ViewSchema {
                    uuid: Uuid::new_v4().to_string(),
                    name: next_view_name(table, kind),
                    kind,
                    config: ViewConfig {
                        properties: table
                            .properties
                            .iter()
                            .map(|p| ViewProperty {
                                uuid: Uuid::new_v4().to_string(),
                                field: p.uuid.clone(),
                            })
                            .collect(),
                        filters: Vec::new(),
                    },
                };
                table.views.push(view.clone());
                view
            })?;

            self.loader.persist().await?;
            Ok::<_, DatatablesError>(view)
        })
        .await
    }

    /// Rename a view. Unknown uuids are ignored.
    pub async fn rename_view(&self, uuid: &str, name: &str) -> Result<()> {
        self.change(|table| match table.views.iter_mut().find(|v| v.uuid == uuid) {
            Some(view) => {
                view.name = name.to_string();
                true
            }
            None => false,
        })
        .await
    }

    /// Place view `moved` directly before or after view `anchor`.
    pub async fn reorder_views(
        &self,
        moved: &str,
        position: ViewPosition,
        anchor: &str,
    ) -> Result<()> {
        self.change(|table| {
            let Some(from) = table.views.iter().position(|v| v.uuid == moved) else {
                log::warn!("Cannot reorder unknown view {moved} in {}", self.name);
                return false;
            };
            if moved == anchor || !table.views.iter().any(|v| v.uuid == anchor) {
                log::warn!("Cannot reorder {moved} around view {anchor} in {}", self.name);
                return false;
            }

            let view = table.views.remove(from);
            let mut to = table
                .views
                .iter()
                .position(|v| v.uuid == anchor)
                .unwrap_or(table.views.len());
            if position == ViewPosition::After {
                to += 1;
            }
            table.views.insert(to, view);
            true
        })
        .await
    }

    /// Show `property_uuid` in the view if hidden, hide it if shown.
    /// Unknown views and properties are ignored.
    pub async fn toggle_view_property(&self, view_uuid: &str, property_uuid: &str) -> Result<()> {
        self.change(|table| {
            if !table.properties.iter().any(|p| p.uuid == property_uuid) {
                return false;
            }
            let Some(view) = table.views.iter_mut().find(|v| v.uuid == view_uuid) else {
                return false;
            };

            let columns = &mut view.config.properties;
            match columns.iter().position(|c| c.field == property_uuid) {
                Some(index) => {
                    columns.remove(index);
                }
                None => columns.push(ViewProperty {
                    uuid: Uuid::new_v4().to_string(),
                    field: property_uuid.to_string(),
                }),
            }
            true
        })
        .await
    }

    // ── Filters ─────────────────────────────────────────────────────

    /// Add a filter on `property_uuid` to the view, starting from the
    /// property kind's default comparison.
    ///
    /// Returns `None` when the view or property is unknown, or when the
    /// property's kind cannot be filtered.
    pub async fn add_filter(
        &self,
        view_uuid: &str,
        property_uuid: &str,
    ) -> Result<Option<ViewFilter>> {
        let bus = self.loader.vault().bus();
        bus.with_lock(async {
            let filter = self.write(|table| {
                let kind = table
                    .properties
                    .iter()
                    .find(|p| p.uuid == property_uuid)?
                    .config
                    .kind();
                let (comparison, data) = kind.default_filter()?;
                let view = table.views.iter_mut().find(|v| v.uuid == view_uuid)?;

                let filter = ViewFilter {
                    uuid: Uuid::new_v4().to_string(),
                    field: property_uuid.to_string(),
                    kind: comparison.to_string(),
                    data,
                };
                view.config.filters.push(filter.clone());
                Some(filter)
            })?;

            if filter.is_some() {
                self.loader.persist().await?;
            }
            Ok::<_, DatatablesError>(filter)
        })
        .await
    }

    /// Replace a filter's operand. Unknown views and filters are ignored.
    pub async fn update_filter(
        &self,
        view_uuid: &str,
        filter_uuid: &str,
        data: serde_json::Value,
    ) -> Result<()> {
        self.change(|table| match find_filter(table, view_uuid, filter_uuid) {
            Some(filter) => {
                filter.data = data;
                true
            }
            None => false,
        })
        .await
    }

    /// Change a filter's comparison. Unknown views and filters are ignored.
    pub async fn update_filter_kind(
        &self,
        view_uuid: &str,
        filter_uuid: &str,
        kind: &str,
    ) -> Result<()> {
        self.change(|table| match find_filter(table, view_uuid, filter_uuid) {
            Some(filter) => {
                filter.kind = kind.to_string();
                true
            }
            None => false,
        })
        .await
    }

    pub async fn delete_filter(&self, view_uuid: &str, filter_uuid: &str) -> Result<()> {
        self.change(|table| {
            let Some(view) = table.views.iter_mut().find(|v| v.uuid == view_uuid) else {
                return false;
            };
            let before = view.config.filters.len();
            view.config.filters.retain(|f| f.uuid != filter_uuid);
            view.config.filters.len() != before
        })
        .await
    }

    // ── Templates ───────────────────────────────────────────────────

    /// The table's templates, empty when none were ever created.
    pub fn templates(&self) -> Result<TemplateSchema> {
        self.read(|table| table.templates.clone().unwrap_or_default())
    }

    /// Create an empty `<uuid>.md` in the template folder and record it.
    pub async fn create_template(&self) -> Result<TemplateOption> {
        let vault = self.loader.vault();
        let template_dir = &self.loader.settings().schema.template_dir;

        let folder = match vault.get_file(template_dir).await? {
            Some(folder) if folder.is_directory() => folder,
            _ => return Err(DatatablesError::TemplateDirMissing(template_dir.clone())),
        };

        vault
            .bus()
            .with_lock(async {
                let uuid = Uuid::new_v4().to_string();
                let file = vault.create_empty_markdown_file(&folder, &uuid).await?;

                let option = TemplateOption {
                    name: uuid.split('-').next().unwrap_or(&uuid).to_string(),
                    uuid,
                    path: file.path,
                };
                self.write(|table| {
                    table
                        .templates
                        .get_or_insert_with(TemplateSchema::default)
                        .options
                        .push(option.clone());
                })?;

                self.loader.persist().await?;
                Ok::<_, DatatablesError>(option)
            })
            .await
    }

    /// Copy a template into a new `<uuid>.md` in the items folder.
    ///
    /// Returns `None` when no template has `template_uuid`.
    pub async fn instantiate_template(&self, template_uuid: &str) -> Result<Option<VaultFile>> {
        let Some(template) = self
            .templates()?
            .options
            .into_iter()
            .find(|t| t.uuid == template_uuid)
        else {
            log::warn!("No template {template_uuid} in {}", self.name);
            return Ok(None);
        };

        let vault = self.loader.vault();
        let items_dir = &self.loader.settings().schema.items_dir;

        let folder = match vault.get_file(items_dir).await? {
            Some(folder) if folder.is_directory() => folder,
            _ => return Err(DatatablesError::ItemsDirMissing(items_dir.clone())),
        };
        let template_file = match vault.get_file(&template.path).await? {
            Some(file) if file.is_file() => file,
            _ => return Err(DatatablesError::TemplateNotFound(template.path)),
        };

        let content = vault.read(&template_file).await?;

        let file = vault
            .bus()
            .with_lock(async {
                let file = vault
                    .create_empty_markdown_file(&folder, &Uuid::new_v4().to_string())
                    .await?;
                vault.modify_content(&file, &content).await?;
                Ok::<_, DatatablesError>(file)
            })
            .await?;

        Ok(Some(file))
    }
}

/// Where `reorder_views` places a view relative to its anchor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewPosition {
    Before,
    After,
}

fn find_filter<'a>(
    table: &'a mut TableSchema,
    view_uuid: &str,
    filter_uuid: &str,
) -> Option<&'a mut ViewFilter> {
    table
        .views
        .iter_mut()
        .find(|v| v.uuid == view_uuid)?
        .config
        .filters
        .iter_mut()
        .find(|f| f.uuid == filter_uuid)
}

fn next_view_name(table: &TableSchema, kind: ViewKind) -> String {
    for i in 1..20 {
        let name = format!("{} {i}", kind.display_name());
        if !table.views.iter().any(|v| v.name == name) {
            return name;
        }
    }
    Uuid::new_v4().to_string()
}

fn next_property_name(table: &TableSchema, kind: PropertyKind) -> String {
    for i in 1..20 {
        let name = format!("{} {i}", kind.display_name());
        if !table.properties.iter().any(|p| p.name == name) {
            return name;
        }
    }
    Uuid::new_v4().to_string()
}

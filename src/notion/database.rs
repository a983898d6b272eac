//! A handle over one remote database: cached schema, the merge row
//! index, and the schema mutations reconciliation may perform.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use indexmap::IndexMap;
use rand::seq::SliceRandom;
use tokio::sync::{Mutex, OnceCell, RwLock};
use tracing::{debug, info, warn};

use super::api::{self, ApiError, NotionApi};
use super::types::{DatabaseObject, PropertyDescriptor, SelectOption, UpdatePageRequest, UserRef, WorkspaceUser};
use crate::typing::ColumnType;

/// Colors the remote accepts for select options.
const SELECT_COLORS: &[&str] = &[
    "blue", "brown", "default", "gray", "green", "orange", "pink", "purple", "red", "yellow",
];

/// One property of the remote schema, normalized for local use.
#[derive(Debug, Clone)]
pub struct PropertySchema {
    pub id: String,
    pub name: String,
    /// `None` for property types outside the catalogue; those behave
    /// like unsettable columns.
    pub column_type: Option<ColumnType>,
    pub type_code: String,
    pub options: Vec<SelectOption>,
    pub default_status: Option<String>,
    pub relation_database_id: Option<String>,
}

impl PropertySchema {
    fn from_descriptor(descriptor: &PropertyDescriptor) -> Self {
        let column_type = ColumnType::from_api_code(&descriptor.type_code).ok();
        let options = descriptor
            .select
            .as_ref()
            .or(descriptor.multi_select.as_ref())
            .map(|list| list.options.clone())
            .or_else(|| descriptor.status.as_ref().map(|s| s.options.clone()))
            .unwrap_or_default();
        Self {
            id: descriptor.id.clone(),
            name: descriptor.name.clone(),
            column_type,
            type_code: descriptor.type_code.clone(),
            options,
            default_status: descriptor
                .status
                .as_ref()
                .and_then(|s| s.default_option.clone()),
            relation_database_id: descriptor.relation.as_ref().map(|r| r.database_id.clone()),
        }
    }

    pub fn has_option(&self, name: &str) -> bool {
        self.options.iter().any(|o| o.name == name)
    }
}

/// One known remote row, addressed by its key-column value.
#[derive(Debug, Clone)]
pub struct RemoteRow {
    pub page_id: String,
}

pub struct NotionDatabase {
    api: Arc<dyn NotionApi>,
    pub database_id: String,
    name: String,
    schema: RwLock<IndexMap<String, PropertySchema>>,
    rows: RwLock<HashMap<String, RemoteRow>>,
    duplicate_keys: RwLock<HashSet<String>>,
    rows_loaded: OnceCell<()>,
    users: OnceCell<Vec<WorkspaceUser>>,
    // serializes option creation so two workers cannot race the same name
    option_lock: Mutex<()>,
}

impl NotionDatabase {
    pub async fn load(api: Arc<dyn NotionApi>, database_id: &str) -> Result<Self, ApiError> {
        let object = api.retrieve_database(database_id).await?;
        debug!(database_id, name = object.name(), "loaded database schema");
        let db = Self {
            api,
            database_id: object.id.clone(),
            name: object.name(),
            schema: RwLock::new(IndexMap::new()),
            rows: RwLock::new(HashMap::new()),
            duplicate_keys: RwLock::new(HashSet::new()),
            rows_loaded: OnceCell::new(),
            users: OnceCell::new(),
            option_lock: Mutex::new(()),
        };
        db.replace_schema(&object).await;
        Ok(db)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    async fn replace_schema(&self, object: &DatabaseObject) {
        let mut schema = self.schema.write().await;
        *schema = object
            .properties
            .values()
            .map(|descriptor| {
                (
                    descriptor.name.clone(),
                    PropertySchema::from_descriptor(descriptor),
                )
            })
            .collect();
    }

    pub async fn property(&self, name: &str) -> Option<PropertySchema> {
        self.schema.read().await.get(name).cloned()
    }

    pub async fn property_names(&self) -> Vec<String> {
        self.schema.read().await.keys().cloned().collect()
    }

    /// The name of the title property. Every database has exactly one.
    pub async fn title_property(&self) -> Option<String> {
        self.schema
            .read()
            .await
            .values()
            .find(|p| p.column_type == Some(ColumnType::Title))
            .map(|p| p.name.clone())
    }

    /// Relation-typed properties and the databases they point to.
    pub async fn relations(&self) -> Vec<(String, String)> {
        self.schema
            .read()
            .await
            .values()
            .filter_map(|p| {
                p.relation_database_id
                    .as_ref()
                    .map(|db| (p.name.clone(), db.clone()))
            })
            .collect()
    }

    /// Build the key → row index from every page of the database. Runs
    /// at most once; later callers share the result.
    pub async fn ensure_rows_loaded(&self) -> Result<(), ApiError> {
        self.rows_loaded
            .get_or_try_init(|| async {
                let pages = api::query_all_pages(self.api.as_ref(), &self.database_id).await?;
                let mut rows = self.rows.write().await;
                let mut duplicates = self.duplicate_keys.write().await;
                for page in &pages {
                    let Some(title) = page.title_text() else {
                        continue;
                    };
                    if title.is_empty() {
                        continue;
                    }
                    // First occurrence wins; repeats are recorded for the
                    // duplicate checks.
                    if rows.contains_key(&title) {
                        duplicates.insert(title);
                    } else {
                        rows.insert(
                            title,
                            RemoteRow {
                                page_id: page.id.clone(),
                            },
                        );
                    }
                }
                debug!(
                    database_id = self.database_id,
                    rows = rows.len(),
                    "built row index"
                );
                Ok(())
            })
            .await
            .map(|_| ())
    }

    pub async fn row_for_key(&self, key: &str) -> Option<RemoteRow> {
        self.rows.read().await.get(key).cloned()
    }

    pub async fn row_count(&self) -> usize {
        self.rows.read().await.len()
    }

    /// Publish a freshly inserted row so later same-key rows in this run
    /// update it instead of inserting again.
    pub async fn publish_row(&self, key: &str, page_id: &str) {
        self.rows.write().await.insert(
            key.to_owned(),
            RemoteRow {
                page_id: page_id.to_owned(),
            },
        );
    }

    pub async fn has_duplicate_keys(&self) -> bool {
        !self.duplicate_keys.read().await.is_empty()
    }

    /// Add a property with the given type. Select and multi-select start
    /// with no options; status columns get the stock option set.
    pub async fn add_column(
        &self,
        name: &str,
        column_type: ColumnType,
    ) -> Result<(), ApiError> {
        info!(column = name, r#type = %column_type, "adding column to database");
        let payload = serde_json::json!({ (name): schema_payload(column_type) });
        let object = self.api.update_database(&self.database_id, payload).await?;
        self.replace_schema(&object).await;
        Ok(())
    }

    /// Rename the title property.
    pub async fn rename_property(&self, from: &str, to: &str) -> Result<(), ApiError> {
        info!(from, to, "renaming database property");
        let payload = serde_json::json!({ (from): { "name": to } });
        let object = self.api.update_database(&self.database_id, payload).await?;
        self.replace_schema(&object).await;
        Ok(())
    }

    /// Create a select/multi-select/status option if it is missing.
    /// Returns whether a new option was created.
    pub async fn ensure_select_option(
        &self,
        property: &str,
        option_name: &str,
        randomize_colors: bool,
    ) -> Result<bool, ApiError> {
        let _guard = self.option_lock.lock().await;

        let (type_code, mut options) = {
            let schema = self.schema.read().await;
            let Some(prop) = schema.get(property) else {
                return Ok(false);
            };
            if prop.has_option(option_name) {
                return Ok(false);
            }
            (prop.type_code.clone(), prop.options.clone())
        };

        let color = if randomize_colors {
            SELECT_COLORS
                .choose(&mut rand::thread_rng())
                .copied()
                .unwrap_or("default")
        } else {
            "default"
        };
        options.push(SelectOption {
            name: option_name.to_owned(),
            id: None,
            color: Some(color.to_owned()),
        });

        debug!(property, option = option_name, color, "creating select option");
        let payload = serde_json::json!({
            (property): { (type_code.as_str()): { "options": options } }
        });
        let object = self.api.update_database(&self.database_id, payload).await?;
        self.replace_schema(&object).await;
        Ok(true)
    }

    /// Workspace members, loaded once on first use.
    pub async fn users(&self) -> Result<&[WorkspaceUser], ApiError> {
        self.users
            .get_or_try_init(|| async { api::list_all_users(self.api.as_ref()).await })
            .await
            .map(Vec::as_slice)
    }

    /// Resolve a person fragment: by member email first, then by exact
    /// display name.
    pub async fn resolve_person(&self, fragment: &str) -> Result<Option<UserRef>, ApiError> {
        let users = self.users().await?;
        let by_email = users
            .iter()
            .find(|u| u.email().is_some_and(|e| e.eq_ignore_ascii_case(fragment)));
        let found = by_email.or_else(|| {
            users
                .iter()
                .find(|u| u.name.as_deref() == Some(fragment))
        });
        Ok(found.map(|u| UserRef { id: u.id.clone() }))
    }

    /// Archive every row, reporting the total up front and one
    /// increment per processed page. Returns `(archived, failed)`.
    pub async fn archive_all(
        &self,
        on_total: impl FnOnce(usize),
        mut on_progress: impl FnMut(&str, Result<(), &ApiError>),
    ) -> Result<(usize, usize), ApiError> {
        let pages = api::query_all_pages(self.api.as_ref(), &self.database_id).await?;
        on_total(pages.len());
        if pages.is_empty() {
            info!("database is empty, nothing to archive");
            return Ok((0, 0));
        }

        let request = UpdatePageRequest {
            archived: Some(true),
            ..Default::default()
        };
        let mut archived = 0;
        let mut failed = 0;
        for page in &pages {
            match self.api.update_page(&page.id, &request).await {
                Ok(_) => {
                    archived += 1;
                    on_progress(&page.id, Ok(()));
                }
                Err(err) if err.is_fatal() => return Err(err),
                Err(err) => {
                    warn!(page_id = page.id, error = %err, "failed to archive page");
                    failed += 1;
                    on_progress(&page.id, Err(&err));
                }
            }
        }
        Ok((archived, failed))
    }

    pub fn api(&self) -> Arc<dyn NotionApi> {
        Arc::clone(&self.api)
    }
}

/// The schema payload used when creating a property of the given type.
pub fn schema_payload(column_type: ColumnType) -> serde_json::Value {
    match column_type {
        ColumnType::Status => serde_json::json!({
            "status": {
                "options": [
                    { "name": "Not started", "color": "default" },
                    { "name": "In progress", "color": "blue" },
                    { "name": "Done", "color": "green" },
                ],
            }
        }),
        ColumnType::Select | ColumnType::MultiSelect => {
            serde_json::json!({ (column_type.api_code()): { "options": [] } })
        }
        other => serde_json::json!({ (other.api_code()): {} }),
    }
}

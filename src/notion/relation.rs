//! Linked databases referenced by relation columns.
//!
//! The converter depends on the `RelationResolver` trait; this module
//! implements it over a lazily loaded title index of the linked
//! database, with a lookup-then-insert critical section for
//! `--add-missing-relations`.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use super::api::{ApiError, NotionApi};
use super::client;
use super::database::NotionDatabase;
use super::types::{CreatePageRequest, PageRef, Parent, Properties, PropertyValue};

/// Resolution of relation fragments against a linked database.
#[async_trait]
pub trait RelationResolver: Send + Sync {
    /// Look up a linked-DB row by its title. The index loads on first
    /// use.
    async fn resolve(&self, title: &str) -> Result<Option<PageRef>, ApiError>;

    /// Create a linked-DB row with the given title and return it. Safe
    /// under concurrency: a second caller with the same title gets the
    /// first caller's row.
    async fn insert(&self, title: &str) -> Result<PageRef, ApiError>;

    /// Whether the linked database holds rows sharing a title.
    async fn has_duplicates(&self) -> Result<bool, ApiError>;

    fn database_name(&self) -> &str;
}

pub struct LinkedDatabase {
    db: NotionDatabase,
    insert_lock: Mutex<()>,
}

impl LinkedDatabase {
    /// Open the linked database. An error here means the database is
    /// inaccessible to the integration.
    pub async fn open(api: Arc<dyn NotionApi>, database_id: &str) -> Result<Self, ApiError> {
        let db = NotionDatabase::load(api, database_id).await?;
        Ok(Self {
            db,
            insert_lock: Mutex::new(()),
        })
    }
}

#[async_trait]
impl RelationResolver for LinkedDatabase {
    async fn resolve(&self, title: &str) -> Result<Option<PageRef>, ApiError> {
        self.db.ensure_rows_loaded().await?;
        Ok(self
            .db
            .row_for_key(title)
            .await
            .map(|row| PageRef { id: row.page_id }))
    }

    async fn insert(&self, title: &str) -> Result<PageRef, ApiError> {
        let _guard = self.insert_lock.lock().await;
        // A concurrent worker may have inserted the same title while we
        // waited on the lock.
        if let Some(existing) = self.resolve(title).await? {
            return Ok(existing);
        }

        let title_property =
            self.db
                .title_property()
                .await
                .ok_or_else(|| ApiError::Request {
                    status: 400,
                    code: "missing_title".to_owned(),
                    message: format!("linked database '{}' has no title property", self.db.name()),
                })?;
        let mut properties = Properties::new();
        properties.insert(title_property, PropertyValue::title(title));

        debug!(database = self.db.name(), title, "inserting missing relation row");
        let page = self
            .db
            .api()
            .create_page(&CreatePageRequest {
                parent: Parent {
                    database_id: self.db.database_id.clone(),
                },
                properties,
                icon: None,
                cover: None,
            })
            .await?;
        self.db.publish_row(title, &page.id).await;
        Ok(PageRef { id: page.id })
    }

    async fn has_duplicates(&self) -> Result<bool, ApiError> {
        self.db.ensure_rows_loaded().await?;
        Ok(self.db.has_duplicate_keys().await)
    }

    fn database_name(&self) -> &str {
        self.db.name()
    }
}

/// A relation fragment that is a notion.so URL resolves straight to the
/// page id it names.
pub fn page_ref_from_url(fragment: &str) -> Option<PageRef> {
    client::parse_database_url(fragment)
        .ok()
        .map(|id| PageRef { id })
}

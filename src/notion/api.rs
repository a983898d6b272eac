//! The remote API surface as a trait.
//!
//! The uploader, converter and reconciler talk to this trait rather than
//! the HTTP client, which keeps the converter ↔ linked-database cycle
//! broken at an interface and lets tests run against an in-memory
//! implementation.

use std::time::Duration;

use async_trait::async_trait;

use super::types::{
    CreatePageRequest, DatabaseObject, FileUploadSlot, ImageBlock, PageObject, QueryPage,
    UpdatePageRequest, UserList, WorkspaceUser,
};

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("transport error: {0}")]
    Transport(reqwest::Error),
    #[error("request timed out")]
    Timeout,
    #[error("rate limited")]
    RateLimited { retry_after: Option<Duration> },
    #[error("unauthorized: {message}")]
    Unauthorized { message: String },
    #[error("not found: {message}")]
    NotFound { message: String },
    #[error("server error ({status}): {message}")]
    Server { status: u16, message: String },
    #[error("request failed ({status}, {code}): {message}")]
    Request {
        status: u16,
        code: String,
        message: String,
    },
    #[error("malformed response: {0}")]
    Decode(serde_json::Error),
    #[error("gave up after {attempts} attempts: {source}")]
    RetriesExhausted {
        attempts: u32,
        source: Box<ApiError>,
    },
}

impl ApiError {
    /// Errors worth retrying on the backoff schedule.
    pub fn is_transient(&self) -> bool {
        match self {
            ApiError::RateLimited { .. } | ApiError::Timeout | ApiError::Server { .. } => true,
            ApiError::Transport(err) => err.is_timeout() || err.is_connect(),
            _ => false,
        }
    }

    /// Errors that invalidate the whole run, not just the current row.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ApiError::Unauthorized { .. })
    }
}

/// Capability set required of the remote database service.
#[async_trait]
pub trait NotionApi: Send + Sync {
    async fn retrieve_database(&self, database_id: &str) -> Result<DatabaseObject, ApiError>;

    /// Patch database properties: add a property, extend an option list,
    /// or rename a property. `properties` maps property name (or id) to
    /// its new schema payload.
    async fn update_database(
        &self,
        database_id: &str,
        properties: serde_json::Value,
    ) -> Result<DatabaseObject, ApiError>;

    async fn query_database(
        &self,
        database_id: &str,
        cursor: Option<&str>,
    ) -> Result<QueryPage, ApiError>;

    async fn create_page(&self, request: &CreatePageRequest) -> Result<PageObject, ApiError>;

    async fn update_page(
        &self,
        page_id: &str,
        request: &UpdatePageRequest,
    ) -> Result<PageObject, ApiError>;

    async fn append_blocks(&self, page_id: &str, blocks: &[ImageBlock]) -> Result<(), ApiError>;

    async fn list_users(&self, cursor: Option<&str>) -> Result<UserList, ApiError>;

    async fn create_file_upload(
        &self,
        filename: &str,
        content_type: &str,
    ) -> Result<FileUploadSlot, ApiError>;

    async fn send_file_upload(
        &self,
        slot: &FileUploadSlot,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<(), ApiError>;

    async fn complete_file_upload(&self, upload_id: &str) -> Result<(), ApiError>;
}

/// Drain every page of a database query. The cursor chain is followed to
/// the end so no row is omitted.
pub async fn query_all_pages(
    api: &dyn NotionApi,
    database_id: &str,
) -> Result<Vec<PageObject>, ApiError> {
    let mut pages = Vec::new();
    let mut cursor: Option<String> = None;
    loop {
        let batch = api.query_database(database_id, cursor.as_deref()).await?;
        pages.extend(batch.results);
        if !batch.has_more {
            return Ok(pages);
        }
        cursor = batch.next_cursor;
        if cursor.is_none() {
            return Ok(pages);
        }
    }
}

/// Drain every page of the workspace member list.
pub async fn list_all_users(api: &dyn NotionApi) -> Result<Vec<WorkspaceUser>, ApiError> {
    let mut users = Vec::new();
    let mut cursor: Option<String> = None;
    loop {
        let batch = api.list_users(cursor.as_deref()).await?;
        users.extend(batch.results);
        if !batch.has_more {
            return Ok(users);
        }
        cursor = batch.next_cursor;
        if cursor.is_none() {
            return Ok(users);
        }
    }
}

//! HTTP implementation of the remote API.
//!
//! One `reqwest::Client` with a per-request deadline, bearer auth on
//! every call, a token bucket over write endpoints, and retry with
//! exponential backoff (or the server-advised interval) on transient
//! failures.

use std::future::Future;
use std::num::NonZeroU32;
use std::time::Duration;

use async_trait::async_trait;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use serde::Deserialize;
use tracing::{debug, warn};
use url::Url;

use super::api::{ApiError, NotionApi};
use super::types::{
    CreatePageRequest, DatabaseObject, FileUploadSlot, ImageBlock, PageObject, QueryPage,
    UpdatePageRequest, UserList,
};

const API_BASE: &str = "https://api.notion.com/v1";
const API_VERSION: &str = "2022-06-28";
const REQUEST_DEADLINE: Duration = Duration::from_secs(60);
const MAX_BACKOFF: Duration = Duration::from_secs(60);
const QUERY_PAGE_SIZE: u32 = 100;

pub const DEFAULT_WRITES_PER_SECOND: u32 = 3;
pub const DEFAULT_MAX_RETRIES: u32 = 5;

#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error(
        "invalid integration token: tokens start with 'ntn_' or 'secret_';\n\
         create one at https://www.notion.so/my-integrations"
    )]
    BadTokenPrefix,
    #[error("integration token looks truncated, copy the full token from the integration settings")]
    TokenTooShort,
    #[error("invalid URL '{0}': {1}")]
    BadUrl(String, url::ParseError),
    #[error("unsupported URL scheme '{0}', only http(s) notion.so URLs are accepted")]
    BadScheme(String),
    #[error("'{0}' is not a notion.so URL")]
    WrongDomain(String),
    #[error("could not find a database id in URL '{0}'")]
    NoDatabaseId(String),
}

/// Check that the caller's token has the shape of an integration token.
pub fn validate_token(token: &str) -> Result<(), ValidationError> {
    if !(token.starts_with("ntn_") || token.starts_with("secret_")) {
        return Err(ValidationError::BadTokenPrefix);
    }
    if token.len() < 20 {
        return Err(ValidationError::TokenTooShort);
    }
    Ok(())
}

/// Extract the database id from a notion.so database URL.
///
/// Accepts the bare 32-hex and hyphenated UUID forms, either as the whole
/// path segment or as the `Title-<id>` suffix the web app produces.
pub fn parse_database_url(raw: &str) -> Result<String, ValidationError> {
    let url = Url::parse(raw).map_err(|e| ValidationError::BadUrl(raw.to_owned(), e))?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(ValidationError::BadScheme(url.scheme().to_owned()));
    }
    let host = url.host_str().unwrap_or_default();
    if host != "notion.so" && !host.ends_with(".notion.so") {
        return Err(ValidationError::WrongDomain(raw.to_owned()));
    }

    url.path_segments()
        .into_iter()
        .flatten()
        .rev()
        .find_map(extract_id)
        .ok_or_else(|| ValidationError::NoDatabaseId(raw.to_owned()))
}

fn extract_id(segment: &str) -> Option<String> {
    let is_hex = |s: &str| s.bytes().all(|b| b.is_ascii_hexdigit());

    if segment.len() == 32 && is_hex(segment) {
        return Some(segment.to_owned());
    }
    if segment.len() == 36 && segment.chars().filter(|c| *c == '-').count() == 4 {
        let compact: String = segment.chars().filter(|c| *c != '-').collect();
        if compact.len() == 32 && is_hex(&compact) {
            return Some(compact);
        }
    }
    // Title-8511b9fc522249f79b90768b832599cc
    let tail = segment.rsplit('-').next()?;
    if tail.len() == 32 && is_hex(tail) && tail.len() < segment.len() {
        return Some(tail.to_owned());
    }
    None
}

/// Retry `operation` on transient errors with exponential backoff,
/// honoring a server-advised interval when one is present. Up to
/// `max_retries` retries follow the first attempt; non-transient errors
/// return immediately.
pub async fn with_backoff<T, F, Fut>(max_retries: u32, operation: F) -> Result<T, ApiError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, ApiError>>,
{
    let mut delay = Duration::from_secs(1);
    let mut retries: u32 = 0;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && retries < max_retries => {
                let sleep_for = match &err {
                    ApiError::RateLimited {
                        retry_after: Some(advised),
                    } => (*advised).min(MAX_BACKOFF),
                    _ => delay,
                };
                warn!(
                    error = %err,
                    retries,
                    sleep_s = sleep_for.as_secs_f64(),
                    "transient API error, backing off"
                );
                tokio::time::sleep(sleep_for).await;
                delay = (delay * 2).min(MAX_BACKOFF);
                retries += 1;
            }
            Err(err) if err.is_transient() => {
                return Err(ApiError::RetriesExhausted {
                    attempts: retries + 1,
                    source: Box::new(err),
                });
            }
            Err(err) => return Err(err),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

pub struct HttpNotionClient {
    http: reqwest::Client,
    token: String,
    write_limiter: DefaultDirectRateLimiter,
    max_retries: u32,
}

impl HttpNotionClient {
    pub fn new(token: String, writes_per_second: u32, max_retries: u32) -> Self {
        let quota = Quota::per_second(
            NonZeroU32::new(writes_per_second.max(1)).expect("clamped to at least 1"),
        );
        Self {
            http: reqwest::Client::builder()
                .timeout(REQUEST_DEADLINE)
                .build()
                .expect("reqwest client construction cannot fail with these options"),
            token,
            write_limiter: RateLimiter::direct(quota),
            max_retries,
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{API_BASE}/{path}")
    }

    async fn execute<T: serde::de::DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<T, ApiError> {
        let response = request
            .bearer_auth(&self.token)
            .header("Notion-Version", API_VERSION)
            .send()
            .await
            .map_err(map_transport)?;

        let status = response.status();
        if status.is_success() {
            let body = response.bytes().await.map_err(map_transport)?;
            return serde_json::from_slice(&body).map_err(ApiError::Decode);
        }

        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_secs);
        let body: ErrorBody = response.json().await.unwrap_or(ErrorBody {
            code: String::new(),
            message: String::new(),
        });

        Err(match status.as_u16() {
            401 | 403 => ApiError::Unauthorized {
                message: body.message,
            },
            404 => ApiError::NotFound {
                message: body.message,
            },
            429 => ApiError::RateLimited { retry_after },
            status if status >= 500 => ApiError::Server {
                status,
                message: body.message,
            },
            status => ApiError::Request {
                status,
                code: body.code,
                message: body.message,
            },
        })
    }
}

fn map_transport(err: reqwest::Error) -> ApiError {
    if err.is_timeout() {
        ApiError::Timeout
    } else {
        ApiError::Transport(err)
    }
}

#[async_trait]
impl NotionApi for HttpNotionClient {
    async fn retrieve_database(&self, database_id: &str) -> Result<DatabaseObject, ApiError> {
        with_backoff(self.max_retries, || async {
            debug!(database_id, "retrieve database");
            self.execute(self.http.get(self.endpoint(&format!("databases/{database_id}"))))
                .await
        })
        .await
    }

    async fn update_database(
        &self,
        database_id: &str,
        properties: serde_json::Value,
    ) -> Result<DatabaseObject, ApiError> {
        let payload = serde_json::json!({ "properties": properties });
        with_backoff(self.max_retries, || async {
            self.write_limiter.until_ready().await;
            debug!(database_id, "update database schema");
            self.execute(
                self.http
                    .patch(self.endpoint(&format!("databases/{database_id}")))
                    .json(&payload),
            )
            .await
        })
        .await
    }

    async fn query_database(
        &self,
        database_id: &str,
        cursor: Option<&str>,
    ) -> Result<QueryPage, ApiError> {
        let mut payload = serde_json::json!({ "page_size": QUERY_PAGE_SIZE });
        if let Some(cursor) = cursor {
            payload["start_cursor"] = serde_json::Value::String(cursor.to_owned());
        }
        with_backoff(self.max_retries, || async {
            debug!(database_id, ?cursor, "query database");
            self.execute(
                self.http
                    .post(self.endpoint(&format!("databases/{database_id}/query")))
                    .json(&payload),
            )
            .await
        })
        .await
    }

    async fn create_page(&self, request: &CreatePageRequest) -> Result<PageObject, ApiError> {
        with_backoff(self.max_retries, || async {
            self.write_limiter.until_ready().await;
            debug!(database_id = request.parent.database_id, "create page");
            self.execute(self.http.post(self.endpoint("pages")).json(request))
                .await
        })
        .await
    }

    async fn update_page(
        &self,
        page_id: &str,
        request: &UpdatePageRequest,
    ) -> Result<PageObject, ApiError> {
        with_backoff(self.max_retries, || async {
            self.write_limiter.until_ready().await;
            debug!(page_id, "update page");
            self.execute(
                self.http
                    .patch(self.endpoint(&format!("pages/{page_id}")))
                    .json(request),
            )
            .await
        })
        .await
    }

    async fn append_blocks(&self, page_id: &str, blocks: &[ImageBlock]) -> Result<(), ApiError> {
        let payload = serde_json::json!({ "children": blocks });
        with_backoff(self.max_retries, || async {
            self.write_limiter.until_ready().await;
            debug!(page_id, count = blocks.len(), "append blocks");
            self.execute::<serde_json::Value>(
                self.http
                    .patch(self.endpoint(&format!("blocks/{page_id}/children")))
                    .json(&payload),
            )
            .await
            .map(|_| ())
        })
        .await
    }

    async fn list_users(&self, cursor: Option<&str>) -> Result<UserList, ApiError> {
        with_backoff(self.max_retries, || async {
            let mut request = self.http.get(self.endpoint("users"));
            if let Some(cursor) = cursor {
                request = request.query(&[("start_cursor", cursor)]);
            }
            self.execute(request).await
        })
        .await
    }

    async fn create_file_upload(
        &self,
        filename: &str,
        content_type: &str,
    ) -> Result<FileUploadSlot, ApiError> {
        let payload = serde_json::json!({
            "mode": "single_part",
            "filename": filename,
            "content_type": content_type,
        });
        with_backoff(self.max_retries, || async {
            self.write_limiter.until_ready().await;
            debug!(filename, "create file upload slot");
            self.execute(self.http.post(self.endpoint("file_uploads")).json(&payload))
                .await
        })
        .await
    }

    async fn send_file_upload(
        &self,
        slot: &FileUploadSlot,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<(), ApiError> {
        // The signed URL is absolute and pre-authorized; the bytes go
        // straight to it.
        with_backoff(self.max_retries, || {
            let bytes = bytes.clone();
            async move {
                debug!(upload_id = slot.id, size = bytes.len(), "send file bytes");
                let response = self
                    .http
                    .put(&slot.upload_url)
                    .header(reqwest::header::CONTENT_TYPE, content_type)
                    .body(bytes)
                    .send()
                    .await
                    .map_err(map_transport)?;
                let status = response.status();
                if status.is_success() {
                    Ok(())
                } else if status.as_u16() >= 500 {
                    Err(ApiError::Server {
                        status: status.as_u16(),
                        message: "file upload PUT failed".to_owned(),
                    })
                } else {
                    Err(ApiError::Request {
                        status: status.as_u16(),
                        code: "file_upload_failed".to_owned(),
                        message: "file upload PUT failed".to_owned(),
                    })
                }
            }
        })
        .await
    }

    async fn complete_file_upload(&self, upload_id: &str) -> Result<(), ApiError> {
        with_backoff(self.max_retries, || async {
            self.write_limiter.until_ready().await;
            debug!(upload_id, "complete file upload");
            self.execute::<serde_json::Value>(
                self.http
                    .post(self.endpoint(&format!("file_uploads/{upload_id}/complete")))
                    .json(&serde_json::json!({})),
            )
            .await
            .map(|_| ())
        })
        .await
    }
}

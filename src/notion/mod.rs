//! Remote database client stack: wire types, the API trait, the HTTP
//! implementation, and the higher-level database/relation/upload
//! handles built on top of it.

pub mod api;
pub mod client;
pub mod database;
pub mod relation;
pub mod types;
pub mod upload;

pub use api::{ApiError, NotionApi};
pub use client::{parse_database_url, validate_token, HttpNotionClient};
pub use database::{NotionDatabase, PropertySchema, RemoteRow};
pub use relation::{LinkedDatabase, RelationResolver};
pub use upload::{FileUploader, UploadError};

//! Wire types for the remote database API.
//!
//! Request payloads are fully typed; response property bags that we only
//! inspect (page property values) stay as `serde_json::Value`.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextContent {
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RichText {
    pub text: TextContent,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plain_text: Option<String>,
}

impl RichText {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            text: TextContent {
                content: content.into(),
            },
            plain_text: None,
        }
    }

    pub fn plain(&self) -> &str {
        self.plain_text.as_deref().unwrap_or(&self.text.content)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectOption {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SelectRef {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserRef {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PageRef {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DateValue {
    pub start: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExternalFile {
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileUploadRef {
    pub id: String,
}

/// A file reference in the shape the API accepts for covers, icons and
/// `files` property items.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FileValue {
    External {
        external: ExternalFile,
        #[serde(skip_serializing_if = "Option::is_none")]
        name: Option<String>,
    },
    FileUpload {
        file_upload: FileUploadRef,
        #[serde(skip_serializing_if = "Option::is_none")]
        name: Option<String>,
    },
}

impl FileValue {
    pub fn external(url: impl Into<String>) -> Self {
        FileValue::External {
            external: ExternalFile { url: url.into() },
            name: None,
        }
    }

    pub fn uploaded(id: impl Into<String>, name: Option<String>) -> Self {
        FileValue::FileUpload {
            file_upload: FileUploadRef { id: id.into() },
            name,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IconValue {
    Emoji { emoji: String },
    External { external: ExternalFile },
    FileUpload { file_upload: FileUploadRef },
}

/// A typed property value, serialized exactly as the write API expects:
/// one key naming the type, with the type-specific payload beneath it.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum PropertyValue {
    Title { title: Vec<RichText> },
    Text { rich_text: Vec<RichText> },
    Number { number: Option<f64> },
    Select { select: Option<SelectRef> },
    MultiSelect { multi_select: Vec<SelectRef> },
    Status { status: Option<SelectRef> },
    Date { date: Option<DateValue> },
    People { people: Vec<UserRef> },
    Files { files: Vec<FileValue> },
    Checkbox { checkbox: bool },
    Url { url: Option<String> },
    Email { email: Option<String> },
    PhoneNumber { phone_number: Option<String> },
    Relation { relation: Vec<PageRef> },
    CreatedTime { created_time: String },
    LastEditedTime { last_edited_time: String },
}

impl PropertyValue {
    pub fn title(content: impl Into<String>) -> Self {
        PropertyValue::Title {
            title: vec![RichText::new(content)],
        }
    }

    pub fn text(content: impl Into<String>) -> Self {
        let content = content.into();
        PropertyValue::Text {
            rich_text: if content.is_empty() {
                vec![]
            } else {
                vec![RichText::new(content)]
            },
        }
    }

    /// Whether the payload carries no value. An unticked checkbox
    /// counts as empty, matching the mandatory-column semantics.
    pub fn is_empty(&self) -> bool {
        match self {
            PropertyValue::Title { title } => {
                title.iter().all(|t| t.plain().trim().is_empty())
            }
            PropertyValue::Text { rich_text } => {
                rich_text.iter().all(|t| t.plain().trim().is_empty())
            }
            PropertyValue::Number { number } => number.is_none(),
            PropertyValue::Select { select } => select.is_none(),
            PropertyValue::MultiSelect { multi_select } => multi_select.is_empty(),
            PropertyValue::Status { status } => status.is_none(),
            PropertyValue::Date { date } => date.is_none(),
            PropertyValue::People { people } => people.is_empty(),
            PropertyValue::Files { files } => files.is_empty(),
            PropertyValue::Checkbox { checkbox } => !checkbox,
            PropertyValue::Url { url } => url.is_none(),
            PropertyValue::Email { email } => email.is_none(),
            PropertyValue::PhoneNumber { phone_number } => phone_number.is_none(),
            PropertyValue::Relation { relation } => relation.is_empty(),
            PropertyValue::CreatedTime { .. } | PropertyValue::LastEditedTime { .. } => false,
        }
    }
}

pub type Properties = IndexMap<String, PropertyValue>;

// --- responses ---

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseObject {
    pub id: String,
    #[serde(default)]
    pub title: Vec<RichText>,
    pub properties: IndexMap<String, PropertyDescriptor>,
}

impl DatabaseObject {
    pub fn name(&self) -> String {
        self.title
            .iter()
            .map(RichText::plain)
            .collect::<Vec<_>>()
            .join("")
    }
}

/// One property as described by the database schema endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct PropertyDescriptor {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub type_code: String,
    #[serde(default)]
    pub select: Option<OptionList>,
    #[serde(default)]
    pub multi_select: Option<OptionList>,
    #[serde(default)]
    pub status: Option<StatusConfig>,
    #[serde(default)]
    pub relation: Option<RelationConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OptionList {
    #[serde(default)]
    pub options: Vec<SelectOption>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StatusConfig {
    #[serde(default)]
    pub options: Vec<SelectOption>,
    #[serde(default)]
    pub default_option: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RelationConfig {
    pub database_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PageObject {
    pub id: String,
    #[serde(default)]
    pub properties: IndexMap<String, serde_json::Value>,
    #[serde(default)]
    pub archived: bool,
}

impl PageObject {
    /// The concatenated text of the page's title property, if any.
    pub fn title_text(&self) -> Option<String> {
        for value in self.properties.values() {
            let Some(parts) = value.get("title").and_then(|t| t.as_array()) else {
                continue;
            };
            let text = parts
                .iter()
                .map(|part| {
                    part.get("plain_text")
                        .and_then(|t| t.as_str())
                        .or_else(|| {
                            part.get("text")
                                .and_then(|t| t.get("content"))
                                .and_then(|c| c.as_str())
                        })
                        .unwrap_or_default()
                })
                .collect::<Vec<_>>()
                .join("");
            return Some(text);
        }
        None
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueryPage {
    pub results: Vec<PageObject>,
    #[serde(default)]
    pub has_more: bool,
    #[serde(default)]
    pub next_cursor: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UserList {
    pub results: Vec<WorkspaceUser>,
    #[serde(default)]
    pub has_more: bool,
    #[serde(default)]
    pub next_cursor: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WorkspaceUser {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub person: Option<PersonInfo>,
}

impl WorkspaceUser {
    pub fn email(&self) -> Option<&str> {
        self.person.as_ref().and_then(|p| p.email.as_deref())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PersonInfo {
    #[serde(default)]
    pub email: Option<String>,
}

/// An open upload slot: the id to finalize with and the signed URL the
/// bytes go to.
#[derive(Debug, Clone, Deserialize)]
pub struct FileUploadSlot {
    pub id: String,
    pub upload_url: String,
}

/// A finished upload, referenced by id in page payloads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHandle {
    pub id: String,
    pub filename: String,
    pub sha256: String,
}

// --- requests ---

#[derive(Debug, Clone, Serialize)]
pub struct Parent {
    pub database_id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreatePageRequest {
    pub parent: Parent,
    pub properties: Properties,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<IconValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cover: Option<FileValue>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct UpdatePageRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub properties: Option<Properties>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<IconValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cover: Option<FileValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archived: Option<bool>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ImageBlock {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub image: ImageBlockContent,
}

#[derive(Debug, Clone, Serialize)]
pub struct ImageBlockContent {
    #[serde(flatten)]
    pub file: FileValue,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub caption: Vec<RichText>,
}

impl ImageBlock {
    pub fn new(file: FileValue, caption: Option<String>) -> Self {
        Self {
            kind: "image",
            image: ImageBlockContent {
                file,
                caption: caption
                    .filter(|c| !c.is_empty())
                    .map(|c| vec![RichText::new(c)])
                    .unwrap_or_default(),
            },
        }
    }
}

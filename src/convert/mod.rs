//! Row conversion.
//!
//! Turns one raw input row into the typed property payload and the
//! decoration descriptors (cover, icon, image blocks) for its remote
//! page. Every cell conversion is total: it yields a typed value, an
//! empty value, or a structured error that per-row policy maps to an
//! empty value unless `--fail-on-conversion-error` is set.

pub mod date;

use std::path::PathBuf;
use std::sync::Arc;

use tracing::warn;

use crate::caption::{CaptionInput, CaptionProvider};
use crate::config::{ConversionRules, IconSource, ImageMode};
use crate::input::{Cell, Row};
use crate::notion::api::ApiError;
use crate::notion::database::NotionDatabase;
use crate::notion::relation::{self, RelationResolver};
use crate::notion::types::{
    DateValue, FileValue, IconValue, ImageBlock, PageRef, Properties, PropertyValue, SelectRef,
};
use crate::notion::upload::{FileUploader, UploadError};
use crate::schema::{ColumnMapping, WriteSchema};
use crate::typing::{self, ColumnType};
use crate::warn_row;

#[derive(Debug, thiserror::Error)]
pub enum ConversionError {
    #[error("key column is empty")]
    EmptyKey,
    #[error("mandatory column '{0}' is empty")]
    MandatoryEmpty(String),
    #[error("column '{column}': {reason}")]
    Cell { column: String, reason: String },
    #[error("column '{column}': file '{}' does not exist", path.display())]
    FileNotFound { column: String, path: PathBuf },
    #[error("column '{column}': {source}")]
    Upload {
        column: String,
        source: UploadError,
    },
    #[error(transparent)]
    Api(#[from] ApiError),
}

/// A soft per-cell failure; policy decides whether it becomes an empty
/// value or a row error.
struct CellFailure {
    reason: String,
}

impl CellFailure {
    fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// One fully converted row, ready for upload.
#[derive(Debug)]
pub struct ConvertedRow {
    pub key: String,
    pub properties: Properties,
    pub icon: Option<IconValue>,
    pub cover: Option<FileValue>,
    pub image_blocks: Vec<ImageBlock>,
}

pub struct RowConverter {
    db: Arc<NotionDatabase>,
    schema: Arc<WriteSchema>,
    rules: Arc<ConversionRules>,
    uploader: Arc<FileUploader>,
    caption_provider: Option<Arc<dyn CaptionProvider>>,
}

impl RowConverter {
    pub fn new(
        db: Arc<NotionDatabase>,
        schema: Arc<WriteSchema>,
        rules: Arc<ConversionRules>,
        uploader: Arc<FileUploader>,
        caption_provider: Option<Arc<dyn CaptionProvider>>,
    ) -> Self {
        Self {
            db,
            schema,
            rules,
            uploader,
            caption_provider,
        }
    }

    pub async fn convert(&self, row: &Row) -> Result<ConvertedRow, ConversionError> {
        let key = self.key_value(row)?;
        self.check_mandatory_cells(row)?;

        let mut properties = Properties::new();
        properties.insert(
            self.schema.key.property.clone(),
            PropertyValue::title(key.clone()),
        );

        for mapping in &self.schema.content {
            let cell = row.get(&mapping.input_column).cloned().unwrap_or_else(Cell::empty);
            let value = self.convert_cell(mapping, &cell).await?;
            // a mandatory column must still hold a value after conversion
            if self.rules.is_mandatory(&mapping.input_column)
                && value.as_ref().map(PropertyValue::is_empty).unwrap_or(true)
            {
                return Err(ConversionError::MandatoryEmpty(
                    mapping.input_column.clone(),
                ));
            }
            if let Some(value) = value {
                properties.insert(mapping.property.clone(), value);
            }
        }

        let images = self.resolve_images(row).await?;
        let (cover, image_blocks) = self.decorate_images(row, images);
        let icon = self.resolve_icon(row).await?;

        if let Some(caption) = self.generate_caption(row).await {
            let target = self.rules.caption.as_ref().map(|c| c.target_column.as_str());
            // the target column may have been dropped during reconciliation
            let mapping = target.and_then(|t| {
                self.schema.content.iter().find(|m| m.input_column == t)
            });
            if let Some(mapping) = mapping {
                properties.insert(mapping.property.clone(), PropertyValue::text(caption));
            }
        }

        Ok(ConvertedRow {
            key,
            properties,
            icon,
            cover,
            image_blocks,
        })
    }

    fn key_value(&self, row: &Row) -> Result<String, ConversionError> {
        let key = row
            .get(&self.schema.key.input_column)
            .map(Cell::as_text)
            .unwrap_or_default();
        let key = key.trim().to_owned();
        if key.is_empty() {
            return Err(ConversionError::EmptyKey);
        }
        Ok(key)
    }

    fn check_mandatory_cells(&self, row: &Row) -> Result<(), ConversionError> {
        for column in &self.rules.mandatory_columns {
            let blank = row.get(column).map(Cell::is_blank).unwrap_or(true);
            if blank {
                return Err(ConversionError::MandatoryEmpty(column.clone()));
            }
        }
        Ok(())
    }

    /// Convert one cell, applying the empty-on-failure policy.
    async fn convert_cell(
        &self,
        mapping: &ColumnMapping,
        cell: &Cell,
    ) -> Result<Option<PropertyValue>, ConversionError> {
        match self.convert_typed(mapping, cell).await? {
            Ok(value) => Ok(value),
            Err(failure) => {
                if self.rules.fail.on_conversion_error && !cell.is_blank() {
                    return Err(ConversionError::Cell {
                        column: mapping.input_column.clone(),
                        reason: failure.reason,
                    });
                }
                if !cell.is_blank() {
                    warn_row!(
                        "column '{}': {}; using empty value",
                        mapping.input_column,
                        failure.reason
                    );
                }
                Ok(empty_value(mapping.column_type))
            }
        }
    }

    /// The inner conversion: hard errors propagate, soft failures come
    /// back as `CellFailure`.
    async fn convert_typed(
        &self,
        mapping: &ColumnMapping,
        cell: &Cell,
    ) -> Result<Result<Option<PropertyValue>, CellFailure>, ConversionError> {
        let text = cell.as_text();
        let trimmed = text.trim();

        let value = match mapping.column_type {
            ColumnType::Title => Ok(None),
            ColumnType::Text => Ok(Some(PropertyValue::text(trimmed))),
            ColumnType::Number => {
                if trimmed.is_empty() {
                    Ok(Some(PropertyValue::Number { number: None }))
                } else {
                    match trimmed.parse::<f64>() {
                        Ok(n) if !n.is_nan() => {
                            Ok(Some(PropertyValue::Number { number: Some(n) }))
                        }
                        _ => Err(CellFailure::new(format!("'{trimmed}' is not a number"))),
                    }
                }
            }
            ColumnType::Checkbox => {
                if trimmed.is_empty() {
                    Ok(Some(PropertyValue::Checkbox { checkbox: false }))
                } else if trimmed.eq_ignore_ascii_case("true") {
                    Ok(Some(PropertyValue::Checkbox { checkbox: true }))
                } else if trimmed.eq_ignore_ascii_case("false") {
                    Ok(Some(PropertyValue::Checkbox { checkbox: false }))
                } else {
                    Err(CellFailure::new(format!(
                        "'{trimmed}' is not a checkbox value"
                    )))
                }
            }
            ColumnType::Url => Ok(Some(PropertyValue::Url {
                url: non_empty(trimmed),
            })),
            ColumnType::Email => Ok(Some(PropertyValue::Email {
                email: non_empty(trimmed),
            })),
            ColumnType::PhoneNumber => Ok(Some(PropertyValue::PhoneNumber {
                phone_number: non_empty(trimmed),
            })),
            ColumnType::Select => {
                if trimmed.is_empty() {
                    Ok(Some(PropertyValue::Select { select: None }))
                } else {
                    self.ensure_option(&mapping.property, trimmed).await?;
                    Ok(Some(PropertyValue::Select {
                        select: Some(SelectRef {
                            name: trimmed.to_owned(),
                        }),
                    }))
                }
            }
            ColumnType::MultiSelect => {
                let mut refs = Vec::new();
                for fragment in cell.fragments() {
                    self.ensure_option(&mapping.property, &fragment).await?;
                    refs.push(SelectRef { name: fragment });
                }
                Ok(Some(PropertyValue::MultiSelect { multi_select: refs }))
            }
            ColumnType::Status => self.convert_status(mapping, trimmed).await?,
            ColumnType::Date => {
                if trimmed.is_empty() {
                    Ok(Some(PropertyValue::Date { date: None }))
                } else {
                    match date::parse_date_span(trimmed) {
                        Ok(span) => Ok(Some(PropertyValue::Date {
                            date: Some(DateValue {
                                start: span.start.to_iso(),
                                end: span.end.map(|e| e.to_iso()),
                            }),
                        })),
                        Err(err) => Err(CellFailure::new(err.to_string())),
                    }
                }
            }
            ColumnType::CreatedTime | ColumnType::LastEditedTime => {
                if trimmed.is_empty() {
                    Ok(None)
                } else {
                    match date::parse_date_cell(trimmed) {
                        Ok(stamp) => Ok(Some(match mapping.column_type {
                            ColumnType::CreatedTime => PropertyValue::CreatedTime {
                                created_time: stamp.to_iso(),
                            },
                            _ => PropertyValue::LastEditedTime {
                                last_edited_time: stamp.to_iso(),
                            },
                        })),
                        Err(err) => Err(CellFailure::new(err.to_string())),
                    }
                }
            }
            ColumnType::Person => {
                let mut people = Vec::new();
                for fragment in cell.fragments() {
                    match self.db.resolve_person(&fragment).await? {
                        Some(user) => people.push(user),
                        None => {
                            warn_row!(
                                "column '{}': no workspace member matches '{}'",
                                mapping.input_column,
                                fragment
                            );
                        }
                    }
                }
                Ok(Some(PropertyValue::People { people }))
            }
            ColumnType::File => {
                let mut files = Vec::new();
                for fragment in cell.fragments() {
                    files.push(
                        self.resolve_file_fragment(&mapping.input_column, &fragment)
                            .await?,
                    );
                }
                Ok(Some(PropertyValue::Files { files }))
            }
            ColumnType::Relation => {
                match self.convert_relation(mapping, cell).await? {
                    Ok(refs) => Ok(Some(PropertyValue::Relation { relation: refs })),
                    Err(failure) => Err(failure),
                }
            }
            // unsettable types never reach the write schema
            ColumnType::Formula
            | ColumnType::Rollup
            | ColumnType::CreatedBy
            | ColumnType::LastEditedBy => Ok(None),
        };
        Ok(value)
    }

    async fn convert_status(
        &self,
        mapping: &ColumnMapping,
        trimmed: &str,
    ) -> Result<Result<Option<PropertyValue>, CellFailure>, ConversionError> {
        if trimmed.is_empty() {
            return Ok(Ok(Some(PropertyValue::Status { status: None })));
        }
        let Some(property) = self.db.property(&mapping.property).await else {
            return Ok(Err(CellFailure::new("status property disappeared")));
        };
        if property.has_option(trimmed) {
            return Ok(Ok(Some(PropertyValue::Status {
                status: Some(SelectRef {
                    name: trimmed.to_owned(),
                }),
            })));
        }
        // Unknown status values fall back to the database default; with
        // no default the cell is left empty.
        match property.default_status {
            Some(default) => {
                warn_row!(
                    "column '{}': '{}' is not a status option, using default '{}'",
                    mapping.input_column,
                    trimmed,
                    default
                );
                Ok(Ok(Some(PropertyValue::Status {
                    status: Some(SelectRef { name: default }),
                })))
            }
            None => {
                warn_row!(
                    "column '{}': '{}' is not a status option and the database has no default, leaving empty",
                    mapping.input_column,
                    trimmed
                );
                Ok(Ok(Some(PropertyValue::Status { status: None })))
            }
        }
    }

    async fn convert_relation(
        &self,
        mapping: &ColumnMapping,
        cell: &Cell,
    ) -> Result<Result<Vec<PageRef>, CellFailure>, ConversionError> {
        let Some(resolver) = self.schema.resolvers.get(&mapping.input_column) else {
            return Ok(Ok(Vec::new()));
        };

        let mut refs = Vec::new();
        for fragment in cell.fragments() {
            if let Some(page) = relation::page_ref_from_url(&fragment) {
                refs.push(page);
                continue;
            }
            match resolver.resolve(&fragment).await? {
                Some(page) => refs.push(page),
                None if self.rules.add_missing_relations => {
                    refs.push(resolver.insert(&fragment).await?);
                }
                None => {
                    let reason = format!(
                        "'{}' does not match any row in linked database '{}'",
                        fragment,
                        resolver.database_name()
                    );
                    if self.rules.fail.on_conversion_error {
                        return Ok(Err(CellFailure::new(reason)));
                    }
                    warn_row!("column '{}': {}, dropped", mapping.input_column, reason);
                }
            }
        }
        Ok(Ok(refs))
    }

    async fn ensure_option(&self, property: &str, option: &str) -> Result<(), ApiError> {
        self.db
            .ensure_select_option(property, option, self.rules.randomize_select_colors)
            .await
            .map(|_| ())
    }

    async fn resolve_file_fragment(
        &self,
        column: &str,
        fragment: &str,
    ) -> Result<FileValue, ConversionError> {
        if typing::is_url(fragment) {
            return Ok(FileValue::external(fragment));
        }
        let path = self.resolve_path(fragment);
        if !path.exists() {
            return Err(ConversionError::FileNotFound {
                column: column.to_owned(),
                path,
            });
        }
        let handle = self
            .uploader
            .upload_path(&path)
            .await
            .map_err(|source| ConversionError::Upload {
                column: column.to_owned(),
                source,
            })?;
        Ok(FileValue::uploaded(handle.id, Some(handle.filename)))
    }

    fn resolve_path(&self, fragment: &str) -> PathBuf {
        let path = PathBuf::from(fragment);
        if path.is_absolute() {
            path
        } else {
            self.rules.files_search_path().join(path)
        }
    }

    /// Resolve every image column's cell to a file reference.
    async fn resolve_images(&self, row: &Row) -> Result<Vec<FileValue>, ConversionError> {
        let mut images = Vec::new();
        for column in &self.rules.image_columns {
            let value = row.get(column).map(Cell::as_text).unwrap_or_default();
            let value = value.trim().to_owned();
            if value.is_empty() {
                continue;
            }
            images.push(self.resolve_file_fragment(column, &value).await?);
        }
        Ok(images)
    }

    fn decorate_images(
        &self,
        row: &Row,
        images: Vec<FileValue>,
    ) -> (Option<FileValue>, Vec<ImageBlock>) {
        if images.is_empty() {
            return (None, Vec::new());
        }
        match self.rules.image_mode {
            ImageMode::Cover => (images.into_iter().next(), Vec::new()),
            ImageMode::Block => {
                let caption = self
                    .rules
                    .image_caption_column
                    .as_ref()
                    .and_then(|column| row.get(column))
                    .map(Cell::as_text)
                    .map(|c| c.trim().to_owned())
                    .filter(|c| !c.is_empty());
                let mut blocks = Vec::new();
                for (i, image) in images.into_iter().enumerate() {
                    // the caption goes on the first block
                    let caption = if i == 0 { caption.clone() } else { None };
                    blocks.push(ImageBlock::new(image, caption));
                }
                (None, blocks)
            }
        }
    }

    async fn resolve_icon(&self, row: &Row) -> Result<Option<IconValue>, ConversionError> {
        let cell_value = self
            .rules
            .icon_column
            .as_ref()
            .and_then(|column| row.get(column))
            .map(Cell::as_text)
            .map(|v| v.trim().to_owned())
            .filter(|v| !v.is_empty());

        let source = match cell_value {
            Some(value) => IconSource::parse(&value),
            None => match &self.rules.default_icon {
                Some(default) => default.clone(),
                None => return Ok(None),
            },
        };

        let column = self.rules.icon_column.as_deref().unwrap_or("--default-icon");
        let icon = match source {
            IconSource::Emoji(emoji) => IconValue::Emoji { emoji },
            IconSource::Url(url) => IconValue::External {
                external: crate::notion::types::ExternalFile { url },
            },
            IconSource::Path(path) => {
                let path = if path.is_absolute() {
                    path
                } else {
                    self.rules.files_search_path().join(path)
                };
                if !path.exists() {
                    return Err(ConversionError::FileNotFound {
                        column: column.to_owned(),
                        path,
                    });
                }
                let handle = self.uploader.upload_path(&path).await.map_err(|source| {
                    ConversionError::Upload {
                        column: column.to_owned(),
                        source,
                    }
                })?;
                IconValue::FileUpload {
                    file_upload: crate::notion::types::FileUploadRef { id: handle.id },
                }
            }
        };
        Ok(Some(icon))
    }

    /// Ask the caption provider for a caption of this row's image.
    /// Failures are logged and leave the target column empty.
    async fn generate_caption(&self, row: &Row) -> Option<String> {
        let rules = self.rules.caption.as_ref()?;
        let provider = self.caption_provider.as_ref()?;

        let value = row.get(&rules.image_column).map(Cell::as_text)?;
        let value = value.trim();
        if value.is_empty() {
            return None;
        }

        let input = if typing::is_url(value) {
            CaptionInput::Url(value.to_owned())
        } else {
            let path = self.resolve_path(value);
            match tokio::fs::read(&path).await {
                Ok(bytes) => {
                    let mime = mime_guess::from_path(&path).first_or_octet_stream();
                    CaptionInput::Bytes {
                        bytes,
                        content_type: mime.essence_str().to_owned(),
                    }
                }
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "cannot read image for captioning");
                    return None;
                }
            }
        };

        match provider.caption(&rules.model, input).await {
            Ok(caption) => Some(caption),
            Err(err) => {
                warn_row!("caption generation failed: {}", err);
                None
            }
        }
    }
}

fn non_empty(value: &str) -> Option<String> {
    (!value.is_empty()).then(|| value.to_owned())
}

/// The empty payload for a type, used when a conversion fails softly.
fn empty_value(column_type: ColumnType) -> Option<PropertyValue> {
    match column_type {
        ColumnType::Title => None,
        ColumnType::Text => Some(PropertyValue::text("")),
        ColumnType::Number => Some(PropertyValue::Number { number: None }),
        ColumnType::Select => Some(PropertyValue::Select { select: None }),
        ColumnType::MultiSelect => Some(PropertyValue::MultiSelect {
            multi_select: vec![],
        }),
        ColumnType::Status => Some(PropertyValue::Status { status: None }),
        ColumnType::Date => Some(PropertyValue::Date { date: None }),
        ColumnType::Person => Some(PropertyValue::People { people: vec![] }),
        ColumnType::File => Some(PropertyValue::Files { files: vec![] }),
        ColumnType::Checkbox => Some(PropertyValue::Checkbox { checkbox: false }),
        ColumnType::Url => Some(PropertyValue::Url { url: None }),
        ColumnType::Email => Some(PropertyValue::Email { email: None }),
        ColumnType::PhoneNumber => Some(PropertyValue::PhoneNumber { phone_number: None }),
        ColumnType::Relation => Some(PropertyValue::Relation { relation: vec![] }),
        ColumnType::CreatedTime
        | ColumnType::LastEditedTime
        | ColumnType::Formula
        | ColumnType::Rollup
        | ColumnType::CreatedBy
        | ColumnType::LastEditedBy => None,
    }
}

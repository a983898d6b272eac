//! Input file reading.
//!
//! Parses a CSV or JSON file into an ordered header plus rows of raw
//! cells. No type coercion happens here; cells stay as the strings (or
//! string lists, for JSON arrays) they were written as.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use tracing::warn;

use crate::typing::{self, ColumnType};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("file {0} not found")]
    NotFound(PathBuf),
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("'{0}' file extension not supported")]
    UnsupportedExtension(String),
    #[error("failed to parse CSV: {0}")]
    Csv(#[from] csv::Error),
    #[error("failed to parse JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("JSON file must contain an array of objects")]
    JsonNotAnArray,
    #[error("file has no columns")]
    NoColumns,
    #[error("file has no data rows")]
    NoRows,
    #[error("duplicate columns found: {}", .0.join(", "))]
    DuplicateColumns(Vec<String>),
    #[error("payload key column '{0}' not found in JSON data")]
    PayloadKeyMissing(String),
    #[error("JSON input requires --payload-key-column")]
    PayloadKeyRequired,
    #[error("each column (except key) type must be defined in custom types list: expected {expected}, got {got}")]
    TypeCountMismatch { expected: usize, got: usize },
}

/// One raw cell. CSV cells are always text; JSON cells may carry an
/// array of scalars as a multi-value list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cell {
    Text(String),
    List(Vec<String>),
}

impl Cell {
    pub fn empty() -> Self {
        Cell::Text(String::new())
    }

    pub fn is_blank(&self) -> bool {
        match self {
            Cell::Text(s) => s.trim().is_empty(),
            Cell::List(items) => items.iter().all(|s| s.trim().is_empty()),
        }
    }

    /// The cell as a single piece of text.
    pub fn as_text(&self) -> String {
        match self {
            Cell::Text(s) => s.clone(),
            Cell::List(items) => items.join(", "),
        }
    }

    /// Comma-split fragments, trimmed, with empties dropped. No escaping.
    pub fn fragments(&self) -> Vec<String> {
        match self {
            Cell::Text(s) => s
                .split(',')
                .map(str::trim)
                .filter(|f| !f.is_empty())
                .map(str::to_owned)
                .collect(),
            Cell::List(items) => items
                .iter()
                .map(|s| s.trim())
                .filter(|f| !f.is_empty())
                .map(str::to_owned)
                .collect(),
        }
    }
}

pub type Row = IndexMap<String, Cell>;

#[derive(Debug, Clone, Copy)]
pub struct ReadOptions<'a> {
    pub delimiter: u8,
    pub fail_on_duplicate_columns: bool,
    pub payload_key_column: Option<&'a str>,
}

impl Default for ReadOptions<'_> {
    fn default() -> Self {
        Self {
            delimiter: b',',
            fail_on_duplicate_columns: false,
            payload_key_column: None,
        }
    }
}

/// The parsed input file: ordered columns, their (declared or guessed)
/// types, and the rows.
#[derive(Debug)]
pub struct LocalData {
    columns: Vec<String>,
    types: IndexMap<String, ColumnType>,
    rows: Vec<Row>,
}

impl LocalData {
    /// Read a file, dispatching on its extension, and assign column
    /// types from the declared list or by value inspection.
    pub fn load(
        path: &Path,
        options: &ReadOptions<'_>,
        column_types: Option<&[ColumnType]>,
    ) -> Result<Self, Error> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();

        let (columns, rows) = match extension.as_str() {
            "csv" => read_csv(path, options)?,
            "json" => read_json(path, options)?,
            other => return Err(Error::UnsupportedExtension(format!(".{other}"))),
        };

        if columns.is_empty() {
            return Err(Error::NoColumns);
        }
        if rows.is_empty() {
            return Err(Error::NoRows);
        }

        let mut data = Self {
            columns,
            types: IndexMap::new(),
            rows,
        };
        data.assign_types(column_types)?;
        Ok(data)
    }

    fn assign_types(&mut self, declared: Option<&[ColumnType]>) -> Result<(), Error> {
        let content: Vec<String> = self.content_columns().map(str::to_owned).collect();

        match declared {
            Some(declared) => {
                if declared.len() != content.len() {
                    return Err(Error::TypeCountMismatch {
                        expected: content.len(),
                        got: declared.len(),
                    });
                }
                self.types = content.into_iter().zip(declared.iter().copied()).collect();
            }
            None => {
                self.types = content
                    .into_iter()
                    .map(|name| {
                        let guessed = typing::guess_type(&self.col_values(&name));
                        (name, guessed)
                    })
                    .collect();
            }
        }
        Ok(())
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// The first column; it maps to the remote title property.
    pub fn key_column(&self) -> &str {
        &self.columns[0]
    }

    pub fn content_columns(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().skip(1).map(String::as_str)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c == name)
    }

    pub fn col_type(&self, name: &str) -> ColumnType {
        if name == self.key_column() {
            ColumnType::Title
        } else {
            self.types.get(name).copied().unwrap_or(ColumnType::Text)
        }
    }

    pub fn col_values(&self, name: &str) -> Vec<&Cell> {
        self.rows.iter().filter_map(|row| row.get(name)).collect()
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn drop_columns(&mut self, names: &[String]) {
        if names.is_empty() {
            return;
        }
        let drop: HashSet<&str> = names.iter().map(String::as_str).collect();
        self.columns.retain(|c| !drop.contains(c.as_str()));
        self.types.retain(|c, _| !drop.contains(c.as_str()));
        for row in &mut self.rows {
            row.retain(|c, _| !drop.contains(c.as_str()));
        }
    }

    pub fn drop_rows_by_key(&mut self, keys: &HashSet<String>) {
        let key_column = self.key_column().to_owned();
        self.rows.retain(|row| {
            row.get(&key_column)
                .map(|cell| !keys.contains(cell.as_text().trim()))
                .unwrap_or(true)
        });
    }

    /// Add an empty text column (used as the target of AI captions).
    pub fn add_text_column(&mut self, name: &str) {
        if self.has_column(name) {
            return;
        }
        self.columns.push(name.to_owned());
        self.types.insert(name.to_owned(), ColumnType::Text);
        for row in &mut self.rows {
            row.insert(name.to_owned(), Cell::empty());
        }
    }
}

fn read_to_string(path: &Path) -> Result<String, Error> {
    let raw = std::fs::read_to_string(path).map_err(|source| {
        if source.kind() == std::io::ErrorKind::NotFound {
            Error::NotFound(path.to_owned())
        } else {
            Error::Read {
                path: path.to_owned(),
                source,
            }
        }
    })?;
    // Tolerate a UTF-8 BOM.
    Ok(raw.strip_prefix('\u{feff}').map(str::to_owned).unwrap_or(raw))
}

fn read_csv(path: &Path, options: &ReadOptions<'_>) -> Result<(Vec<String>, Vec<Row>), Error> {
    let content = read_to_string(path)?;
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(options.delimiter)
        .flexible(true)
        .from_reader(content.as_bytes());

    let raw_header: Vec<String> = reader
        .headers()?
        .iter()
        .map(str::to_owned)
        .collect();
    if raw_header.is_empty() {
        return Err(Error::NoColumns);
    }

    let duplicates = list_duplicates(&raw_header);
    if !duplicates.is_empty() {
        if options.fail_on_duplicate_columns {
            return Err(Error::DuplicateColumns(duplicates));
        }
        warn!(
            columns = duplicates.join(", "),
            "duplicate columns found, last occurrence wins"
        );
    }

    // Duplicate headers keep their first-occurrence position but take
    // the value of the last occurrence.
    let mut columns: Vec<String> = Vec::new();
    for name in &raw_header {
        if !columns.contains(name) {
            columns.push(name.clone());
        }
    }

    let mut truncated = false;
    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        let mut row: Row = columns
            .iter()
            .map(|c| (c.clone(), Cell::empty()))
            .collect();
        for (i, value) in record.iter().enumerate() {
            match raw_header.get(i) {
                Some(name) => {
                    row.insert(name.clone(), Cell::Text(value.to_owned()));
                }
                None => truncated = true,
            }
        }
        rows.push(row);
    }

    if truncated {
        warn!("inconsistent number of columns detected, excess columns will be truncated");
    }

    Ok((columns, rows))
}

fn read_json(path: &Path, options: &ReadOptions<'_>) -> Result<(Vec<String>, Vec<Row>), Error> {
    let key_column = options
        .payload_key_column
        .ok_or(Error::PayloadKeyRequired)?;

    let content = read_to_string(path)?;
    let parsed: serde_json::Value = serde_json::from_str(&content)?;
    let objects = parsed.as_array().ok_or(Error::JsonNotAnArray)?;

    // Header is the union of keys: the payload key column first, then
    // first-occurrence order.
    let mut columns: Vec<String> = vec![key_column.to_owned()];
    let mut seen_key_column = false;
    for object in objects {
        let object = object.as_object().ok_or(Error::JsonNotAnArray)?;
        for key in object.keys() {
            if key == key_column {
                seen_key_column = true;
            } else if !columns.contains(key) {
                columns.push(key.clone());
            }
        }
    }
    if !seen_key_column {
        return Err(Error::PayloadKeyMissing(key_column.to_owned()));
    }

    let rows = objects
        .iter()
        .map(|object| {
            let object = object.as_object().expect("checked above");
            columns
                .iter()
                .map(|name| {
                    let cell = object.get(name).map(json_cell).unwrap_or_else(Cell::empty);
                    (name.clone(), cell)
                })
                .collect()
        })
        .collect();

    Ok((columns, rows))
}

fn json_cell(value: &serde_json::Value) -> Cell {
    match value {
        serde_json::Value::Null => Cell::empty(),
        serde_json::Value::String(s) => Cell::Text(s.clone()),
        serde_json::Value::Array(items) => {
            Cell::List(items.iter().map(json_scalar_text).collect())
        }
        other => Cell::Text(json_scalar_text(other)),
    }
}

fn json_scalar_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn list_duplicates(names: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut duplicates = Vec::new();
    for name in names {
        if !seen.insert(name.as_str()) && !duplicates.contains(name) {
            duplicates.push(name.clone());
        }
    }
    duplicates
}

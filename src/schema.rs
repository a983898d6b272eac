//! Schema reconciliation.
//!
//! Aligns the input header against the remote schema through an ordered
//! list of validation steps, mutating the input data (dropping columns
//! and rows) and the remote schema (adding columns, renaming the title)
//! until only writable columns remain. The result is the effective
//! write schema the converter works from.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::{info, warn};

use crate::config::ConversionRules;
use crate::input::LocalData;
use crate::notion::api::ApiError;
use crate::notion::database::NotionDatabase;
use crate::notion::relation::{LinkedDatabase, RelationResolver};
use crate::typing::ColumnType;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{role} column '{column}' not found in the input file")]
    ColumnNotFound { role: &'static str, column: String },
    #[error("--rename-notion-key-column expects the input key column '{expected}', got '{got}'")]
    RenameSourceMismatch { expected: String, got: String },
    #[error("remote database has no title property")]
    NoTitleProperty,
    #[error("input columns missing from the remote database: {}", .0.join(", "))]
    MissingColumns(Vec<String>),
    #[error("columns with unsettable types found: {}", .0.join(", "))]
    UnsettableColumns(Vec<String>),
    #[error("columns with inaccessible linked databases: {}", .0.join(", "))]
    InaccessibleRelations(Vec<String>),
    #[error("column '{column}' has values missing from the available status options: {}", values.join(", "))]
    WrongStatusValues { column: String, values: Vec<String> },
    #[error("duplicate values found in the input key column")]
    InputKeyDuplicates,
    #[error("duplicate values found in the remote key column")]
    RemoteKeyDuplicates,
    #[error("linked database '{database}' used by relation column '{column}' has duplicate titles")]
    RelationDuplicates { column: String, database: String },
    #[error("no writable columns left after validation, nothing to upload")]
    NoWritableColumns,
    #[error(transparent)]
    Api(#[from] ApiError),
}

/// One writable column: where it comes from and where it goes.
#[derive(Debug, Clone)]
pub struct ColumnMapping {
    pub input_column: String,
    pub property: String,
    pub property_id: String,
    pub column_type: ColumnType,
}

/// The effective write schema plus the relation resolvers the converter
/// needs.
pub struct WriteSchema {
    pub key: ColumnMapping,
    pub content: Vec<ColumnMapping>,
    pub resolvers: HashMap<String, Arc<LinkedDatabase>>,
}

impl std::fmt::Debug for WriteSchema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteSchema")
            .field("key", &self.key)
            .field("content", &self.content)
            .field("resolvers", &self.resolvers.keys().collect::<Vec<_>>())
            .finish()
    }
}

pub async fn reconcile(
    data: &mut LocalData,
    db: &NotionDatabase,
    rules: &ConversionRules,
) -> Result<WriteSchema, Error> {
    validate_named_columns(data, rules)?;
    let title_property = apply_key_rename(data, db, rules).await?;
    prepare_merge(data, db, rules).await?;
    // Remember whether the input brought any content columns at this
    // point, so losing all of them to the steps below is distinguishable
    // from a title-only input.
    let had_content = data.columns().len() > 1;
    handle_missing_columns(data, db, rules).await?;
    handle_unsettable_columns(data, db, rules).await?;
    let resolvers = handle_relations(data, db, rules).await?;
    handle_status_values(data, db, rules).await?;
    validate_duplicates(data, db, rules).await?;
    build_write_schema(data, db, rules, title_property, resolvers, had_content).await
}

/// Columns named on the command line must exist in the input file.
fn validate_named_columns(data: &LocalData, rules: &ConversionRules) -> Result<(), Error> {
    let named: [(&'static str, Vec<&String>); 4] = [
        ("image", rules.image_columns.iter().collect()),
        (
            "image caption",
            rules.image_caption_column.iter().collect(),
        ),
        ("icon", rules.icon_column.iter().collect()),
        ("mandatory", rules.mandatory_columns.iter().collect()),
    ];
    for (role, columns) in named {
        for column in columns {
            if !data.has_column(column) {
                return Err(Error::ColumnNotFound {
                    role,
                    column: column.clone(),
                });
            }
        }
    }
    if let Some(caption) = &rules.caption {
        if !data.has_column(&caption.image_column) {
            return Err(Error::ColumnNotFound {
                role: "caption image",
                column: caption.image_column.clone(),
            });
        }
    }
    Ok(())
}

/// The first input column always maps to the remote title property; a
/// key-column rename renames that property first.
async fn apply_key_rename(
    data: &LocalData,
    db: &NotionDatabase,
    rules: &ConversionRules,
) -> Result<String, Error> {
    let title = db.title_property().await.ok_or(Error::NoTitleProperty)?;

    if let Some((from, to)) = &rules.rename_key_column {
        if from != data.key_column() {
            return Err(Error::RenameSourceMismatch {
                expected: data.key_column().to_owned(),
                got: from.clone(),
            });
        }
        db.rename_property(&title, to).await?;
        return Ok(to.clone());
    }
    Ok(title)
}

async fn prepare_merge(
    data: &mut LocalData,
    db: &NotionDatabase,
    rules: &ConversionRules,
) -> Result<(), Error> {
    if !rules.merge {
        return Ok(());
    }

    db.ensure_rows_loaded().await?;

    if !rules.merge_only_columns.is_empty() {
        for column in &rules.merge_only_columns {
            if !data.has_column(column) {
                return Err(Error::ColumnNotFound {
                    role: "merge only",
                    column: column.clone(),
                });
            }
        }
        let keep: HashSet<&str> = rules
            .merge_only_columns
            .iter()
            .map(String::as_str)
            .chain(decoration_columns(rules))
            .collect();
        let ignored: Vec<String> = data
            .content_columns()
            .filter(|c| !keep.contains(c))
            .map(str::to_owned)
            .collect();
        if !ignored.is_empty() {
            info!(columns = ignored.join(", "), "ignoring columns not in --merge-only-column");
            data.drop_columns(&ignored);
        }
    }

    if rules.merge_skip_new {
        let mut new_keys = HashSet::new();
        for row in data.rows() {
            if let Some(cell) = row.get(data.key_column()) {
                let key = cell.as_text().trim().to_owned();
                if db.row_for_key(&key).await.is_none() {
                    new_keys.insert(key);
                }
            }
        }
        if !new_keys.is_empty() {
            info!(count = new_keys.len(), "skipping rows not present in the remote database");
            data.drop_rows_by_key(&new_keys);
        }
    }
    Ok(())
}

fn decoration_columns(rules: &ConversionRules) -> impl Iterator<Item = &str> {
    rules
        .image_columns
        .iter()
        .map(String::as_str)
        .chain(rules.image_caption_column.as_deref())
        .chain(rules.icon_column.as_deref())
}

/// Decoration columns stay in the data for resolution but leave the
/// write set unless their keep flag is on.
fn written_columns(data: &LocalData, rules: &ConversionRules) -> Vec<String> {
    let mut hidden: HashSet<&str> = HashSet::new();
    if !rules.image_column_keep {
        hidden.extend(rules.image_columns.iter().map(String::as_str));
    }
    if !rules.image_caption_column_keep {
        hidden.extend(rules.image_caption_column.as_deref());
    }
    if !rules.icon_column_keep {
        hidden.extend(rules.icon_column.as_deref());
    }
    data.content_columns()
        .filter(|c| !hidden.contains(c))
        .map(str::to_owned)
        .collect()
}

async fn handle_missing_columns(
    data: &mut LocalData,
    db: &NotionDatabase,
    rules: &ConversionRules,
) -> Result<(), Error> {
    let mut missing = Vec::new();
    for column in written_columns(data, rules) {
        if db.property(&column).await.is_none() {
            missing.push(column);
        }
    }
    if missing.is_empty() {
        return Ok(());
    }

    if rules.add_missing_columns {
        info!(columns = missing.join(", "), "adding missing columns to the database");
        let mut unaddable = Vec::new();
        for column in &missing {
            let column_type = data.col_type(column);
            if column_type == ColumnType::Relation {
                // A relation property needs a target database we don't
                // know; it cannot be created from input data alone.
                warn!(%column, "cannot add relation column without a linked database, skipping");
                unaddable.push(column.clone());
                continue;
            }
            db.add_column(column, column_type).await?;
        }
        data.drop_columns(&unaddable);
        return Ok(());
    }

    if rules.fail.on_missing_columns {
        return Err(Error::MissingColumns(missing));
    }

    warn!(columns = missing.join(", "), "input columns missing from the remote database, they will be skipped");
    data.drop_columns(&missing);
    Ok(())
}

async fn handle_unsettable_columns(
    data: &mut LocalData,
    db: &NotionDatabase,
    rules: &ConversionRules,
) -> Result<(), Error> {
    let mut unsettable = Vec::new();
    for column in written_columns(data, rules) {
        let Some(property) = db.property(&column).await else {
            continue;
        };
        let settable = property
            .column_type
            .map(|t| !t.is_unsettable() && t != ColumnType::Title)
            .unwrap_or(false);
        if !settable {
            warn!(
                %column,
                r#type = property.type_code,
                "column has an unsettable type, it will be skipped"
            );
            unsettable.push(column);
        }
    }
    if unsettable.is_empty() {
        return Ok(());
    }
    if rules.fail.on_unsettable_columns {
        return Err(Error::UnsettableColumns(unsettable));
    }
    data.drop_columns(&unsettable);
    Ok(())
}

async fn handle_relations(
    data: &mut LocalData,
    db: &NotionDatabase,
    rules: &ConversionRules,
) -> Result<HashMap<String, Arc<LinkedDatabase>>, Error> {
    let mut resolvers = HashMap::new();
    let mut inaccessible = Vec::new();

    let present: HashSet<String> = written_columns(data, rules).into_iter().collect();
    for (column, linked_id) in db.relations().await {
        if !present.contains(&column) {
            continue;
        }
        match LinkedDatabase::open(db.api(), &linked_id).await {
            Ok(linked) => {
                resolvers.insert(column, Arc::new(linked));
            }
            Err(err) => {
                warn!(%column, error = %err, "linked database is not accessible");
                inaccessible.push(column);
            }
        }
    }

    if !inaccessible.is_empty() {
        if rules.fail.on_inaccessible_relations {
            return Err(Error::InaccessibleRelations(inaccessible));
        }
        warn!(
            columns = inaccessible.join(", "),
            "columns with inaccessible linked databases will be skipped"
        );
        data.drop_columns(&inaccessible);
    }

    if rules.fail.on_relation_duplicates {
        for (column, resolver) in &resolvers {
            if resolver.has_duplicates().await? {
                return Err(Error::RelationDuplicates {
                    column: column.clone(),
                    database: resolver.database_name().to_owned(),
                });
            }
        }
    }

    Ok(resolvers)
}

async fn handle_status_values(
    data: &LocalData,
    db: &NotionDatabase,
    rules: &ConversionRules,
) -> Result<(), Error> {
    for column in written_columns(data, rules) {
        let Some(property) = db.property(&column).await else {
            continue;
        };
        if property.column_type != Some(ColumnType::Status) {
            continue;
        }
        let mut wrong: Vec<String> = Vec::new();
        for cell in data.col_values(&column) {
            let value = cell.as_text().trim().to_owned();
            if !value.is_empty() && !property.has_option(&value) && !wrong.contains(&value) {
                wrong.push(value);
            }
        }
        if wrong.is_empty() {
            continue;
        }
        if rules.fail.on_wrong_status_values {
            return Err(Error::WrongStatusValues {
                column,
                values: wrong,
            });
        }
        match &property.default_status {
            Some(default) => warn!(
                %column,
                values = wrong.join(", "),
                %default,
                "status values missing from the database, the default status will be used"
            ),
            None => warn!(
                %column,
                values = wrong.join(", "),
                "status values missing from the database and no default status; those cells will be left empty"
            ),
        }
    }
    Ok(())
}

async fn validate_duplicates(
    data: &LocalData,
    db: &NotionDatabase,
    rules: &ConversionRules,
) -> Result<(), Error> {
    if !rules.fail.on_duplicates {
        return Ok(());
    }

    let mut seen = HashSet::new();
    for row in data.rows() {
        let key = row
            .get(data.key_column())
            .map(|c| c.as_text().trim().to_owned())
            .unwrap_or_default();
        if !seen.insert(key) {
            return Err(Error::InputKeyDuplicates);
        }
    }

    db.ensure_rows_loaded().await?;
    if db.has_duplicate_keys().await {
        return Err(Error::RemoteKeyDuplicates);
    }
    Ok(())
}

async fn build_write_schema(
    data: &LocalData,
    db: &NotionDatabase,
    rules: &ConversionRules,
    title_property: String,
    resolvers: HashMap<String, Arc<LinkedDatabase>>,
    had_content: bool,
) -> Result<WriteSchema, Error> {
    let title = db
        .property(&title_property)
        .await
        .ok_or(Error::NoTitleProperty)?;
    let key = ColumnMapping {
        input_column: data.key_column().to_owned(),
        property: title.name.clone(),
        property_id: title.id.clone(),
        column_type: ColumnType::Title,
    };

    let mut content = Vec::new();
    for column in written_columns(data, rules) {
        let Some(property) = db.property(&column).await else {
            continue;
        };
        let Some(column_type) = property.column_type else {
            continue;
        };
        content.push(ColumnMapping {
            input_column: column,
            property: property.name,
            property_id: property.id,
            column_type,
        });
    }

    // Validation may drop every content column. If no decoration keeps
    // the rows meaningful either, there is nothing left to upload.
    // Title-only inputs never had content columns and still proceed.
    let decorates = !rules.image_columns.is_empty()
        || rules.icon_column.is_some()
        || rules.default_icon.is_some();
    if had_content && content.is_empty() && !decorates {
        return Err(Error::NoWritableColumns);
    }

    Ok(WriteSchema {
        key,
        content,
        resolvers,
    })
}

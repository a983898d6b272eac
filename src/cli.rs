//! Command line surface and its validation into `ConversionRules`.

use std::path::PathBuf;

use clap::Parser;

use crate::config::{CaptionRules, ConversionRules, FailFlags, IconSource, ImageMode};
use crate::notion::client::{self, ValidationError};
use crate::typing::{ColumnType, UnknownType};

#[derive(Debug, Parser)]
#[command(
    name = "csvnotion",
    version,
    about = "Upload & merge CSV or JSON data, with images, into a Notion database"
)]
pub struct Opts {
    /// CSV or JSON file to upload
    #[arg(value_name = "FILE")]
    pub file: Option<PathBuf>,

    /// Notion integration token (create at https://www.notion.so/my-integrations)
    #[arg(long, value_name = "TOKEN", help_heading = "general options")]
    pub token: String,

    /// Notion database URL
    #[arg(long, value_name = "URL", help_heading = "general options")]
    pub url: String,

    /// Active Notion workspace name
    #[arg(long, value_name = "WORKSPACE", help_heading = "general options")]
    pub workspace: Option<String>,

    /// Upload workers (default: 5; 1 processes rows in order)
    #[arg(long, default_value_t = 5, value_name = "NUMBER", help_heading = "general options")]
    pub max_threads: usize,

    /// File to store the program log
    #[arg(long, value_name = "FILE", help_heading = "general options")]
    pub log: Option<PathBuf>,

    /// Output debug information
    #[arg(long, help_heading = "general options")]
    pub verbose: bool,

    /// Comma-separated list of column types for non-key columns;
    /// guessed from the values when not provided
    #[arg(long, value_name = "TYPES", help_heading = "column options")]
    pub column_types: Option<String>,

    /// CSV column delimiter
    #[arg(long, default_value = ",", value_name = "CHAR", help_heading = "column options")]
    pub delimiter: String,

    /// Add columns present in the file but not in the database
    #[arg(long, help_heading = "column options")]
    pub add_missing_columns: bool,

    /// Rename the key column FROM in the file to TO in the database
    #[arg(
        long,
        num_args = 2,
        value_names = ["FROM", "TO"],
        help_heading = "column options"
    )]
    pub rename_notion_key_column: Option<Vec<String>>,

    /// Randomize colors for options added to select columns
    #[arg(long, help_heading = "column options")]
    pub randomize_select_colors: bool,

    /// Merge with existing rows, keyed on the first column
    #[arg(long, help_heading = "merge options")]
    pub merge: bool,

    /// Column to update on merge; others are ignored (repeatable)
    #[arg(long = "merge-only-column", value_name = "COLUMN", help_heading = "merge options")]
    pub merge_only_column: Vec<String>,

    /// Skip rows that are not already in the database
    #[arg(long, help_heading = "merge options")]
    pub merge_skip_new: bool,

    /// Add missing entries to linked databases
    #[arg(long, help_heading = "relation options")]
    pub add_missing_relations: bool,

    /// Archive every entry in the database, then exit
    #[arg(long, help_heading = "database management options")]
    pub delete_all_database_entries: bool,

    /// Column holding a URL or image file for the row (repeatable)
    #[arg(long = "image-column", value_name = "COLUMN", help_heading = "page cover options")]
    pub image_column: Vec<String>,

    /// Keep the image column as a database column too
    #[arg(long, help_heading = "page cover options")]
    pub image_column_keep: bool,

    /// Upload the image as a page cover or a body block
    #[arg(
        long,
        value_enum,
        default_value_t = ImageMode::Block,
        help_heading = "page cover options"
    )]
    pub image_column_mode: ImageMode,

    /// Column with the caption for the image block
    #[arg(long, value_name = "COLUMN", help_heading = "page cover options")]
    pub image_caption_column: Option<String>,

    /// Keep the caption column as a database column too
    #[arg(long, help_heading = "page cover options")]
    pub image_caption_column_keep: bool,

    /// Column holding an emoji, URL or image file used as the page icon
    #[arg(long, value_name = "COLUMN", help_heading = "page icon options")]
    pub icon_column: Option<String>,

    /// Keep the icon column as a database column too
    #[arg(long, help_heading = "page icon options")]
    pub icon_column_keep: bool,

    /// Emoji, URL or image file used as the icon for rows without one
    #[arg(long, value_name = "ICON", help_heading = "page icon options")]
    pub default_icon: Option<String>,

    /// Token for the hosted image captioning service
    #[arg(long, value_name = "TOKEN", help_heading = "machine learning options")]
    pub caption_token: Option<String>,

    /// Captioning model identifier
    #[arg(
        long,
        default_value = "vit-gpt2",
        value_name = "MODEL",
        help_heading = "machine learning options"
    )]
    pub caption_model: String,

    /// Image column to caption and the column the caption is written to
    #[arg(
        long,
        num_args = 2,
        value_names = ["IMAGE_COLUMN", "TARGET_COLUMN"],
        help_heading = "machine learning options"
    )]
    pub caption_column: Option<Vec<String>>,

    /// Column that cannot be empty (repeatable)
    #[arg(long = "mandatory-column", value_name = "COLUMN", help_heading = "validation options")]
    pub mandatory_column: Vec<String>,

    /// JSON key used as the key column (required for JSON input)
    #[arg(long, value_name = "COLUMN", help_heading = "validation options")]
    pub payload_key_column: Option<String>,

    /// Fail if linked databases in relation columns have duplicate titles
    #[arg(long, help_heading = "validation options")]
    pub fail_on_relation_duplicates: bool,

    /// Fail if the database or the input has duplicates in the key column
    #[arg(long, help_heading = "validation options")]
    pub fail_on_duplicates: bool,

    /// Fail if the input has duplicate columns
    #[arg(long, help_heading = "validation options")]
    pub fail_on_duplicate_csv_columns: bool,

    /// Fail on any column type conversion error
    #[arg(long, help_heading = "validation options")]
    pub fail_on_conversion_error: bool,

    /// Fail if a relation column points to an inaccessible database
    #[arg(long, help_heading = "validation options")]
    pub fail_on_inaccessible_relations: bool,

    /// Fail if columns are present in the file but not in the database
    #[arg(long, help_heading = "validation options")]
    pub fail_on_missing_columns: bool,

    /// Fail if the database has columns that cannot be assigned
    #[arg(long, help_heading = "validation options")]
    pub fail_on_unsettable_columns: bool,

    /// Fail if status values have no matching option in the database
    #[arg(long, help_heading = "validation options")]
    pub fail_on_wrong_status_values: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    UnknownType(#[from] UnknownType),
    #[error("CSV or JSON file is required for upload operations")]
    FileRequired,
    #[error("--delimiter must be a single character")]
    BadDelimiter,
    #[error("default icon file not found: {0}")]
    DefaultIconMissing(PathBuf),
    #[error("--caption-column requires --caption-token")]
    CaptionTokenRequired,
}

/// What the process was asked to do.
pub enum Command {
    Upload(Box<ConversionRules>),
    DeleteAll,
}

pub struct Invocation {
    pub token: String,
    pub database_id: String,
    pub command: Command,
}

/// Validate the raw options into an invocation. Every failure here is
/// fatal and pre-dispatch.
pub fn build_invocation(opts: Opts) -> Result<Invocation, CliError> {
    client::validate_token(&opts.token)?;
    let database_id = client::parse_database_url(&opts.url)?;

    if opts.delete_all_database_entries {
        return Ok(Invocation {
            token: opts.token,
            database_id,
            command: Command::DeleteAll,
        });
    }

    let input_file = opts.file.ok_or(CliError::FileRequired)?;

    let delimiter = match opts.delimiter.as_bytes() {
        [b] => *b,
        _ => return Err(CliError::BadDelimiter),
    };

    let column_types = opts
        .column_types
        .as_deref()
        .map(parse_column_types)
        .transpose()?;

    let default_icon = match opts.default_icon.as_deref() {
        Some(value) => {
            let icon = IconSource::parse(value);
            if let IconSource::Path(path) = &icon {
                if !path.exists() {
                    return Err(CliError::DefaultIconMissing(path.clone()));
                }
            }
            Some(icon)
        }
        None => None,
    };

    let caption = match opts.caption_column {
        Some(pair) => {
            let token = opts
                .caption_token
                .clone()
                .ok_or(CliError::CaptionTokenRequired)?;
            // clap guarantees exactly two values
            let mut pair = pair.into_iter();
            let image_column = pair.next().unwrap_or_default();
            let target_column = pair.next().unwrap_or_default();
            Some(CaptionRules {
                image_column,
                target_column,
                token,
                model: opts.caption_model.clone(),
            })
        }
        None => None,
    };

    let rename_key_column = opts.rename_notion_key_column.map(|pair| {
        let mut pair = pair.into_iter();
        (
            pair.next().unwrap_or_default(),
            pair.next().unwrap_or_default(),
        )
    });

    let rules = ConversionRules {
        input_file,
        delimiter,
        column_types,
        payload_key_column: opts.payload_key_column,
        max_threads: opts.max_threads.max(1),
        randomize_select_colors: opts.randomize_select_colors,
        merge: opts.merge,
        merge_only_columns: opts.merge_only_column,
        merge_skip_new: opts.merge_skip_new,
        add_missing_columns: opts.add_missing_columns,
        add_missing_relations: opts.add_missing_relations,
        rename_key_column,
        image_columns: opts.image_column,
        image_column_keep: opts.image_column_keep,
        image_mode: opts.image_column_mode,
        image_caption_column: opts.image_caption_column,
        image_caption_column_keep: opts.image_caption_column_keep,
        icon_column: opts.icon_column,
        icon_column_keep: opts.icon_column_keep,
        default_icon,
        mandatory_columns: opts.mandatory_column,
        caption,
        fail: FailFlags {
            on_duplicates: opts.fail_on_duplicates,
            on_duplicate_csv_columns: opts.fail_on_duplicate_csv_columns,
            on_conversion_error: opts.fail_on_conversion_error,
            on_inaccessible_relations: opts.fail_on_inaccessible_relations,
            on_missing_columns: opts.fail_on_missing_columns,
            on_unsettable_columns: opts.fail_on_unsettable_columns,
            on_wrong_status_values: opts.fail_on_wrong_status_values,
            on_relation_duplicates: opts.fail_on_relation_duplicates,
        },
    };

    Ok(Invocation {
        token: opts.token,
        database_id,
        command: Command::Upload(Box::new(rules)),
    })
}

fn parse_column_types(list: &str) -> Result<Vec<ColumnType>, UnknownType> {
    list.split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::parse)
        .collect()
}

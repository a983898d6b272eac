//! Resolved runtime configuration, threaded explicitly through the
//! pipeline.

use std::path::{Path, PathBuf};

use unicode_segmentation::UnicodeSegmentation;

use crate::typing::ColumnType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum ImageMode {
    /// Set the image as the page cover.
    Cover,
    /// Append the image as a body block.
    #[default]
    Block,
}

/// An icon cell or `--default-icon` value: a single emoji, a URL, or a
/// local file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IconSource {
    Emoji(String),
    Url(String),
    Path(PathBuf),
}

impl IconSource {
    pub fn parse(value: &str) -> Self {
        let value = value.trim();
        if let Some(emoji) = icon_emoji(value) {
            IconSource::Emoji(emoji)
        } else if crate::typing::is_url(value) {
            IconSource::Url(value.to_owned())
        } else {
            IconSource::Path(PathBuf::from(value))
        }
    }
}

/// Accept exactly one grapheme cluster made of emoji scalars.
fn icon_emoji(value: &str) -> Option<String> {
    let mut graphemes = value.graphemes(true);
    let first = graphemes.next()?;
    if graphemes.next().is_some() {
        return None;
    }
    let mut pictographic = false;
    for c in first.chars() {
        match c as u32 {
            0x1F000..=0x1FAFF | 0x2600..=0x27BF | 0x2B00..=0x2BFF => pictographic = true,
            // joiners, variation selectors, keycap combiner
            0x200D | 0xFE00..=0xFE0F | 0x20E3 => {}
            _ => return None,
        }
    }
    pictographic.then(|| first.to_owned())
}

/// Strict-mode switches; each upgrades one class of warning to a fatal
/// or per-row error.
#[derive(Debug, Clone, Copy, Default)]
pub struct FailFlags {
    pub on_duplicates: bool,
    pub on_duplicate_csv_columns: bool,
    pub on_conversion_error: bool,
    pub on_inaccessible_relations: bool,
    pub on_missing_columns: bool,
    pub on_unsettable_columns: bool,
    pub on_wrong_status_values: bool,
    pub on_relation_duplicates: bool,
}

/// AI captioning: resolve the image column, ask the provider, write the
/// caption into the target column.
#[derive(Debug, Clone)]
pub struct CaptionRules {
    pub image_column: String,
    pub target_column: String,
    pub token: String,
    pub model: String,
}

#[derive(Debug, Clone)]
pub struct ConversionRules {
    pub input_file: PathBuf,
    pub delimiter: u8,
    pub column_types: Option<Vec<ColumnType>>,
    pub payload_key_column: Option<String>,
    pub max_threads: usize,
    pub randomize_select_colors: bool,

    pub merge: bool,
    pub merge_only_columns: Vec<String>,
    pub merge_skip_new: bool,

    pub add_missing_columns: bool,
    pub add_missing_relations: bool,
    pub rename_key_column: Option<(String, String)>,

    pub image_columns: Vec<String>,
    pub image_column_keep: bool,
    pub image_mode: ImageMode,
    pub image_caption_column: Option<String>,
    pub image_caption_column_keep: bool,

    pub icon_column: Option<String>,
    pub icon_column_keep: bool,
    pub default_icon: Option<IconSource>,

    pub mandatory_columns: Vec<String>,
    pub caption: Option<CaptionRules>,
    pub fail: FailFlags,
}

impl ConversionRules {
    /// Relative file and icon paths resolve against the input file's
    /// directory.
    pub fn files_search_path(&self) -> &Path {
        self.input_file.parent().unwrap_or(Path::new("."))
    }

    pub fn is_mandatory(&self, column: &str) -> bool {
        self.mandatory_columns.iter().any(|c| c == column)
    }
}

//! Column type catalogue and value-based type detection.

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use crate::convert::date;
use crate::input::Cell;

/// The closed set of column types a remote property can take.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnType {
    Title,
    Text,
    Number,
    Select,
    MultiSelect,
    Status,
    Date,
    Person,
    File,
    Checkbox,
    Url,
    Email,
    PhoneNumber,
    CreatedTime,
    LastEditedTime,
    Relation,
    Formula,
    Rollup,
    CreatedBy,
    LastEditedBy,
}

#[derive(Debug, thiserror::Error)]
#[error("unknown column type '{0}'")]
pub struct UnknownType(pub String);

impl ColumnType {
    /// The code used on the command line and in log output.
    pub fn code(self) -> &'static str {
        match self {
            ColumnType::Title | ColumnType::Text => "text",
            ColumnType::Number => "number",
            ColumnType::Select => "select",
            ColumnType::MultiSelect => "multi_select",
            ColumnType::Status => "status",
            ColumnType::Date => "date",
            ColumnType::Person => "person",
            ColumnType::File => "file",
            ColumnType::Checkbox => "checkbox",
            ColumnType::Url => "url",
            ColumnType::Email => "email",
            ColumnType::PhoneNumber => "phone_number",
            ColumnType::CreatedTime => "created_time",
            ColumnType::LastEditedTime => "last_edited_time",
            ColumnType::Relation => "relation",
            ColumnType::Formula => "formula",
            ColumnType::Rollup => "rollup",
            ColumnType::CreatedBy => "created_by",
            ColumnType::LastEditedBy => "last_edited_by",
        }
    }

    /// The property type code used on the wire by the remote API.
    pub fn api_code(self) -> &'static str {
        match self {
            ColumnType::Title => "title",
            ColumnType::Text => "rich_text",
            ColumnType::Person => "people",
            ColumnType::File => "files",
            other => other.code(),
        }
    }

    pub fn from_api_code(code: &str) -> Result<Self, UnknownType> {
        match code {
            "title" => Ok(ColumnType::Title),
            "rich_text" => Ok(ColumnType::Text),
            "people" => Ok(ColumnType::Person),
            "files" => Ok(ColumnType::File),
            other => other.parse(),
        }
    }

    /// Types the remote computes itself and rejects in write payloads.
    pub fn is_unsettable(self) -> bool {
        matches!(
            self,
            ColumnType::Formula
                | ColumnType::Rollup
                | ColumnType::CreatedBy
                | ColumnType::LastEditedBy
        )
    }

    /// Types carrying an option list in their schema metadata.
    pub fn has_options(self) -> bool {
        matches!(
            self,
            ColumnType::Select | ColumnType::MultiSelect | ColumnType::Status
        )
    }
}

impl FromStr for ColumnType {
    type Err = UnknownType;

    fn from_str(code: &str) -> Result<Self, Self::Err> {
        match code {
            "text" => Ok(ColumnType::Text),
            "number" => Ok(ColumnType::Number),
            "select" => Ok(ColumnType::Select),
            "multi_select" => Ok(ColumnType::MultiSelect),
            "status" => Ok(ColumnType::Status),
            "date" => Ok(ColumnType::Date),
            "person" => Ok(ColumnType::Person),
            "file" => Ok(ColumnType::File),
            "checkbox" => Ok(ColumnType::Checkbox),
            "url" => Ok(ColumnType::Url),
            "email" => Ok(ColumnType::Email),
            "phone_number" => Ok(ColumnType::PhoneNumber),
            "created_time" => Ok(ColumnType::CreatedTime),
            "last_edited_time" => Ok(ColumnType::LastEditedTime),
            "relation" => Ok(ColumnType::Relation),
            "formula" => Ok(ColumnType::Formula),
            "rollup" => Ok(ColumnType::Rollup),
            "created_by" => Ok(ColumnType::CreatedBy),
            "last_edited_by" => Ok(ColumnType::LastEditedBy),
            other => Err(UnknownType(other.to_owned())),
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

static EMAIL_RE: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(r"^[a-zA-Z0-9_.+-]+@[a-zA-Z0-9-]+\.[a-zA-Z0-9-.]+$").unwrap()
});

pub fn is_checkbox(value: &str) -> bool {
    value.eq_ignore_ascii_case("true") || value.eq_ignore_ascii_case("false")
}

pub fn is_number(value: &str) -> bool {
    value.parse::<f64>().map(|n| !n.is_nan()).unwrap_or(false)
}

pub fn is_url(value: &str) -> bool {
    url::Url::parse(value)
        .map(|u| matches!(u.scheme(), "http" | "https"))
        .unwrap_or(false)
}

pub fn is_email(value: &str) -> bool {
    EMAIL_RE.is_match(value)
}

pub fn is_date(value: &str) -> bool {
    date::parse_date_cell(value).is_ok()
}

/// Guess a column's type from its non-empty values.
///
/// Predicates are tried in a fixed order; the first one every value
/// satisfies wins, and anything unclassified is plain text. Detection
/// deliberately never proposes select, multi_select, relation or file.
pub fn guess_type(values: &[&Cell]) -> ColumnType {
    let scalars: Vec<&str> = values
        .iter()
        .filter_map(|cell| match cell {
            Cell::Text(s) if !s.trim().is_empty() => Some(s.as_str()),
            _ => None,
        })
        .collect();

    let all_lists = values.iter().all(|cell| matches!(cell, Cell::List(_)));
    if scalars.is_empty() && !all_lists {
        return ColumnType::Text;
    }
    if all_lists && !values.is_empty() {
        // Multi-value JSON cells have no scalar representation to test.
        return ColumnType::Text;
    }

    let checks: [(fn(&str) -> bool, ColumnType); 5] = [
        (is_checkbox, ColumnType::Checkbox),
        (is_number, ColumnType::Number),
        (is_url, ColumnType::Url),
        (is_email, ColumnType::Email),
        (is_date, ColumnType::Date),
    ];

    for (check, column_type) in checks {
        if scalars.iter().all(|v| check(v)) {
            return column_type;
        }
    }

    ColumnType::Text
}

//! Date cell parsing.
//!
//! Cells accept a single date or date-time in any of the supported
//! formats, or a range written as `start .. end` (a two-element
//! comma-separated list is also taken as a range).

use chrono::{DateTime, NaiveDate, NaiveDateTime};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DateParseError {
    #[error("'{0}' is not a recognized date or date-time")]
    Unrecognized(String),
    #[error("date field is empty")]
    Empty,
    #[error("date field doesn't support more than 2 values")]
    TooManyValues,
}

/// A parsed timestamp, keeping track of whether the input carried a
/// time-of-day so serialization can preserve the distinction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateStamp {
    Day(NaiveDate),
    Moment(NaiveDateTime),
}

impl DateStamp {
    pub fn to_iso(self) -> String {
        match self {
            DateStamp::Day(d) => d.format("%Y-%m-%d").to_string(),
            DateStamp::Moment(dt) => dt.format("%Y-%m-%dT%H:%M:%S").to_string(),
        }
    }
}

/// A date or date range as written in one cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateSpan {
    pub start: DateStamp,
    pub end: Option<DateStamp>,
}

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
];

const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%Y/%m/%d",
    "%d %B %Y",
    "%d %b %Y",
    "%B %d, %Y",
    "%m/%d/%Y",
];

/// Parse a single date or date-time value.
pub fn parse_date_cell(value: &str) -> Result<DateStamp, DateParseError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(DateParseError::Empty);
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Ok(DateStamp::Moment(dt.naive_local()));
    }
    for format in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(value, format) {
            return Ok(DateStamp::Moment(dt));
        }
    }
    for format in DATE_FORMATS {
        if let Ok(d) = NaiveDate::parse_from_str(value, format) {
            return Ok(DateStamp::Day(d));
        }
    }

    Err(DateParseError::Unrecognized(value.to_owned()))
}

/// Parse a cell into a date span. `A .. B` denotes a range; so does a
/// two-element comma list.
pub fn parse_date_span(value: &str) -> Result<DateSpan, DateParseError> {
    // Formats like "January 15, 2023" contain a comma; try the whole
    // string as a single value before splitting.
    if let Ok(start) = parse_date_cell(value) {
        return Ok(DateSpan { start, end: None });
    }

    let parts: Vec<&str> = if value.contains("..") {
        value.splitn(2, "..").map(str::trim).collect()
    } else {
        value
            .split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .collect()
    };

    match parts.as_slice() {
        [] => Err(DateParseError::Empty),
        [single] => Ok(DateSpan {
            start: parse_date_cell(single)?,
            end: None,
        }),
        [start, end] => Ok(DateSpan {
            start: parse_date_cell(start)?,
            end: Some(parse_date_cell(end)?),
        }),
        _ => Err(DateParseError::TooManyValues),
    }
}

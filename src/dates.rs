// 📅 Best-effort timestamp normalization
//
// Spreadsheet dates arrive either as real date cells or as free text typed
// day-first ("12/03/2021", "(05-11-2020)"). Everything is rendered in the
// SQL DATETIME layout. Unparseable text is an explicit error that callers
// turn into an absent value.

use chrono::{NaiveDate, NaiveDateTime};
use thiserror::Error;

/// Layout used for DATETIME columns
pub const SQL_DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const DATETIME_FORMATS: [&str; 7] = [
    "%d/%m/%Y %H:%M:%S",
    "%d/%m/%Y %H:%M",
    "%d-%m-%Y %H:%M:%S",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
];

// Day-first before ISO: "03/04/2021" is 3 April
const DATE_FORMATS: [&str; 10] = [
    "%d/%m/%Y",
    "%d-%m-%Y",
    "%d.%m.%Y",
    "%d/%m/%y",
    "%Y-%m-%d",
    "%Y/%m/%d",
    "%d %B %Y",
    "%d %b %Y",
    "%B %d, %Y",
    "%b %d, %Y",
];

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DateParseError {
    #[error("empty date value")]
    Empty,

    #[error("unrecognized date '{0}'")]
    Unrecognized(String),
}

/// Parse a textual date, day-first, ignoring surrounding parentheses
pub fn parse_timestamp(text: &str) -> Result<NaiveDateTime, DateParseError> {
    let cleaned: String = text
        .trim()
        .chars()
        .filter(|c| *c != '(' && *c != ')')
        .collect();
    let cleaned = cleaned.trim();

    if cleaned.is_empty() {
        return Err(DateParseError::Empty);
    }

    for format in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(cleaned, format) {
            return Ok(dt);
        }
    }

    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(cleaned, format) {
            if let Some(dt) = date.and_hms_opt(0, 0, 0) {
                return Ok(dt);
            }
        }
    }

    Err(DateParseError::Unrecognized(cleaned.to_string()))
}

pub fn format_sql_datetime(dt: &NaiveDateTime) -> String {
    dt.format(SQL_DATETIME_FORMAT).to_string()
}

/// Normalize a textual date to SQL DATETIME, or `None` when it can't be read
pub fn to_sql_datetime(text: Option<&str>) -> Option<String> {
    let text = text?;

    match parse_timestamp(text) {
        Ok(dt) => Some(format_sql_datetime(&dt)),
        Err(e) => {
            log::debug!("Date normalization failed: {}", e);
            None
        }
    }
}

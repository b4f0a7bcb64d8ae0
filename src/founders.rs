// 👥 Founder-Field Parser - primary contact from a multi-name cell
//
// The contact column holds free text such as "Alice & Bob, Carol" or
// "Jane Doe and John Roe; Mary Lee". We keep the first name and the count.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Separators between names, matched literally
const DELIMITERS: [&str; 4] = ["&", ",", " and ", ";"];

static DELIMITER_RE: Lazy<Regex> = Lazy::new(|| {
    let pattern = DELIMITERS
        .iter()
        .map(|d| regex::escape(d))
        .collect::<Vec<_>>()
        .join("|");
    Regex::new(&pattern).expect("delimiter pattern is a literal alternation")
});

/// Result of parsing a founder cell
///
/// `count == 0` exactly when `primary_name` is `None`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FounderParse {
    pub primary_name: Option<String>,
    pub count: usize,
}

/// Split a raw founder cell into names.
///
/// Newlines become spaces first, so "Jane\nand John" still splits on " and ".
pub fn parse_founders(raw: Option<&str>) -> FounderParse {
    let names = founder_names(raw);

    FounderParse {
        count: names.len(),
        primary_name: names.into_iter().next(),
    }
}

/// Every non-empty, trimmed name in original order
pub fn founder_names(raw: Option<&str>) -> Vec<String> {
    let raw = match raw {
        Some(text) if !text.is_empty() => text,
        _ => return Vec::new(),
    };

    let single_line = raw.replace('\n', " ");

    DELIMITER_RE
        .split(&single_line)
        .map(str::trim)
        .filter(|segment| !segment.is_empty())
        .map(str::to_string)
        .collect()
}

// 📂 Tabular Source - spreadsheet/CSV rows handed to the sync engine
//
// Header names are cleaned to single-line, trimmed text. Missing cells are
// absent (`None`), never an empty string or a sentinel like "nan".

use anyhow::{Context, Result};
use calamine::{open_workbook_auto, Data, Reader};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::dates::{format_sql_datetime, to_sql_datetime};

// ============================================================================
// INPUT ROW
// ============================================================================

/// One record from the source: column name → optional text
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InputRow {
    /// 1-based data row number (header excluded)
    pub line_number: usize,
    values: HashMap<String, Option<String>>,
}

impl InputRow {
    pub fn new(line_number: usize) -> Self {
        InputRow {
            line_number,
            values: HashMap::new(),
        }
    }

    /// Builder used by readers and tests
    pub fn with(mut self, column: &str, value: Option<&str>) -> Self {
        self.insert(column, value.map(str::to_string));
        self
    }

    pub fn insert(&mut self, column: &str, value: Option<String>) {
        let column = clean_header(column);
        if self.values.contains_key(&column) {
            log::warn!(
                "Row {}: column '{}' appears twice, keeping the later value",
                self.line_number,
                column
            );
        }
        self.values.insert(column, value);
    }

    /// Cell text, `None` when the column is missing or the cell is empty
    pub fn get(&self, column: &str) -> Option<&str> {
        self.values.get(column).and_then(|v| v.as_deref())
    }
}

/// Single-line, trimmed column name
pub fn clean_header(raw: &str) -> String {
    raw.replace("\r\n", " ").replace('\n', " ").trim().to_string()
}

/// Clean every header and suffix repeats (".1", ".2", ...) so no column
/// shadows another once rows are keyed by name
pub fn unique_headers<'a, I>(raw: I) -> Vec<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut seen: HashMap<String, usize> = HashMap::new();

    raw.into_iter()
        .map(|header| {
            let header = clean_header(header);
            if header.is_empty() {
                return header;
            }
            let repeats = seen.entry(header.clone()).or_insert(0);
            let unique = if *repeats == 0 {
                header
            } else {
                log::warn!("Duplicate column '{}' renamed to '{}.{}'", header, header, repeats);
                format!("{}.{}", header, repeats)
            };
            *repeats += 1;
            unique
        })
        .collect()
}

/// Empty or whitespace-only text is treated as a missing value
fn present(text: &str) -> Option<String> {
    if text.trim().is_empty() {
        None
    } else {
        Some(text.to_string())
    }
}

// ============================================================================
// SOURCES
// ============================================================================

/// Anything that can produce the ordered rows of one batch
pub trait RowSource {
    fn read_rows(&self) -> Result<Vec<InputRow>>;

    /// Where the rows come from (for provenance)
    fn path(&self) -> &Path;
}

/// Pick a reader from the file extension
pub fn open_source(path: &Path, sheet: Option<&str>) -> Box<dyn RowSource> {
    let is_csv = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("csv"))
        .unwrap_or(false);

    if is_csv {
        Box::new(CsvSource::new(path))
    } else {
        Box::new(WorkbookSource::new(path, sheet))
    }
}

/// Excel / OpenDocument workbook read through calamine
pub struct WorkbookSource {
    path: PathBuf,
    sheet: Option<String>,
}

impl WorkbookSource {
    pub fn new(path: &Path, sheet: Option<&str>) -> Self {
        WorkbookSource {
            path: path.to_path_buf(),
            sheet: sheet.map(str::to_string),
        }
    }
}

impl RowSource for WorkbookSource {
    fn read_rows(&self) -> Result<Vec<InputRow>> {
        let mut workbook = open_workbook_auto(&self.path)
            .with_context(|| format!("Failed to open workbook: {}", self.path.display()))?;

        let sheet_name = match &self.sheet {
            Some(name) => name.clone(),
            None => workbook
                .sheet_names()
                .first()
                .cloned()
                .context("Workbook has no sheets")?,
        };

        let range = workbook
            .worksheet_range(&sheet_name)
            .with_context(|| format!("Failed to read sheet: {}", sheet_name))?;

        let mut rows = range.rows();
        let headers: Vec<String> = match rows.next() {
            Some(header_row) => {
                let names: Vec<String> = header_row
                    .iter()
                    .map(|cell| cell_to_text(cell).unwrap_or_default())
                    .collect();
                unique_headers(names.iter().map(String::as_str))
            }
            None => return Ok(Vec::new()),
        };

        let mut out = Vec::new();
        for (idx, cells) in rows.enumerate() {
            let mut row = InputRow::new(idx + 1);
            for (header, cell) in headers.iter().zip(cells) {
                if header.is_empty() {
                    continue;
                }
                row.insert(header, cell_to_text(cell));
            }
            out.push(row);
        }

        log::debug!("Read {} rows from sheet '{}'", out.len(), sheet_name);
        Ok(out)
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

/// Render a cell as text; empty and error cells are absent
fn cell_to_text(cell: &Data) -> Option<String> {
    match cell {
        Data::Empty | Data::Error(_) => None,
        Data::String(s) => present(s),
        Data::Int(i) => Some(i.to_string()),
        Data::Float(f) => {
            // Whole numbers (phone numbers, years) without a trailing ".0"
            if f.fract() == 0.0 && f.abs() < i64::MAX as f64 {
                Some((*f as i64).to_string())
            } else {
                Some(f.to_string())
            }
        }
        Data::Bool(b) => Some(b.to_string()),
        Data::DateTime(dt) => match dt.as_datetime() {
            Some(naive) => Some(format_sql_datetime(&naive)),
            None => {
                log::debug!("Unreadable date cell {}", dt);
                None
            }
        },
        // Textual timestamps go through the same day-first parser as typed dates
        Data::DateTimeIso(s) => to_sql_datetime(Some(s)),
        Data::DurationIso(s) => present(s),
    }
}

/// Comma-separated file with a header row
pub struct CsvSource {
    path: PathBuf,
}

impl CsvSource {
    pub fn new(path: &Path) -> Self {
        CsvSource {
            path: path.to_path_buf(),
        }
    }
}

impl RowSource for CsvSource {
    fn read_rows(&self) -> Result<Vec<InputRow>> {
        let mut rdr = csv::ReaderBuilder::new()
            .flexible(true)
            .from_path(&self.path)
            .with_context(|| format!("Failed to open CSV file: {}", self.path.display()))?;

        let headers = unique_headers(rdr.headers().context("Failed to read CSV header")?.iter());

        let mut out = Vec::new();
        for (idx, record) in rdr.records().enumerate() {
            let record = record.with_context(|| format!("Failed to read CSV row {}", idx + 1))?;
            let mut row = InputRow::new(idx + 1);
            for (header, value) in headers.iter().zip(record.iter()) {
                if header.is_empty() {
                    continue;
                }
                row.insert(header, present(value));
            }
            out.push(row);
        }

        Ok(out)
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

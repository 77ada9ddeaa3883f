//! Append-only price history, persisted as a local CSV table with a fixed
//! header row.

use crate::models::ProductRecord;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::mem::take;
use std::path::PathBuf;
use thiserror::Error;
use tracing::debug;

pub const HEADER: [&str; 5] = ["Timestamp", "Name", "ModelNumber", "Url", "Price"];

const PRICE_COLUMN: usize = 4;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("history file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("history row {row} is malformed: {reason}")]
    Malformed { row: usize, reason: String },
}

/// The two most recent observations, oldest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PricePair {
    pub previous: u64,
    pub current: u64,
}

pub trait HistoryStore {
    fn append(&mut self, record: &ProductRecord) -> Result<(), StoreError>;
    /// `None` while fewer than two observations exist.
    fn last_two_prices(&self) -> Result<Option<PricePair>, StoreError>;
}

/// CSV-backed history log. Row schema is [`HEADER`]; the first row is
/// reserved for it and every run appends exactly one row below. Rows are
/// never rewritten or deleted.
///
/// Concurrent runs are unsupported: an overlapping append can race the
/// last-two-rows read, so callers must serialize invocations.
pub struct CsvHistory {
    path: PathBuf,
}

impl CsvHistory {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn io_err(&self, source: io::Error) -> StoreError {
        StoreError::Io {
            path: self.path.display().to_string(),
            source,
        }
    }
}

impl HistoryStore for CsvHistory {
    fn append(&mut self, record: &ProductRecord) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| self.io_err(e))?;
            }
        }

        let fresh = !self.path.exists();
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| self.io_err(e))?;

        if fresh {
            file.write_all(encode_row(&HEADER).as_bytes())
                .map_err(|e| self.io_err(e))?;
        }

        let timestamp = record.observed_at.to_rfc3339();
        let price = record.price.to_string();
        let row = [
            timestamp.as_str(),
            record.name.as_str(),
            record.model_number.as_str(),
            record.url.as_str(),
            price.as_str(),
        ];
        file.write_all(encode_row(&row).as_bytes())
            .map_err(|e| self.io_err(e))?;

        debug!(path = %self.path.display(), "appended observation row");
        Ok(())
    }

    fn last_two_prices(&self) -> Result<Option<PricePair>, StoreError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let text = fs::read_to_string(&self.path).map_err(|e| self.io_err(e))?;
        let rows = parse_rows(&text);

        // First row is the header.
        let data: &[Vec<String>] = if rows.len() > 1 { &rows[1..] } else { &[] };
        if data.len() < 2 {
            return Ok(None);
        }

        let previous = price_cell(&data[data.len() - 2], data.len() - 2)?;
        let current = price_cell(&data[data.len() - 1], data.len() - 1)?;
        Ok(Some(PricePair { previous, current }))
    }
}

fn price_cell(row: &[String], index: usize) -> Result<u64, StoreError> {
    // Row numbers in errors are 1-based and count the header.
    let row_number = index + 2;
    let cell = row.get(PRICE_COLUMN).ok_or_else(|| StoreError::Malformed {
        row: row_number,
        reason: format!("expected {} columns, found {}", HEADER.len(), row.len()),
    })?;
    cell.parse().map_err(|_| StoreError::Malformed {
        row: row_number,
        reason: format!("price {cell:?} is not an integer"),
    })
}

fn encode_row(fields: &[&str]) -> String {
    let mut line = String::new();
    for (i, field) in fields.iter().enumerate() {
        if i > 0 {
            line.push(',');
        }
        if field.contains([',', '"', '\n', '\r']) {
            line.push('"');
            line.push_str(&field.replace('"', "\"\""));
            line.push('"');
        } else {
            line.push_str(field);
        }
    }
    line.push('\n');
    line
}

/// Quote-aware CSV row parser. Tolerates CRLF and a trailing newline.
fn parse_rows(text: &str) -> Vec<Vec<String>> {
    let mut rows = Vec::new();
    let mut row = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' => {
                if in_quotes && chars.peek() == Some(&'"') {
                    chars.next();
                    field.push('"');
                } else {
                    in_quotes = !in_quotes;
                }
            }
            ',' if !in_quotes => row.push(take(&mut field)),
            '\n' | '\r' if !in_quotes => {
                if c == '\r' && chars.peek() == Some(&'\n') {
                    chars.next();
                }
                row.push(take(&mut field));
                if row.len() > 1 || !row[0].is_empty() {
                    rows.push(take(&mut row));
                } else {
                    row.clear();
                }
            }
            _ => field.push(c),
        }
    }

    if !field.is_empty() || !row.is_empty() {
        row.push(field);
        rows.push(row);
    }
    rows
}

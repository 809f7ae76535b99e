//! Merging per-tile rows into one table and writing it as CSV

use serde_json::Value;
use std::collections::HashSet;
use std::io::Write;

use crate::core::error::{Error, Result};
use crate::core::model::{ResultRow, LAT_FIELD, LON_FIELD, NEAREST_FIELD};

/// Header written instead of an empty table
pub const EMPTY_MARKER_HEADER: &str = "error";

/// Single row written instead of an empty table
pub const EMPTY_MARKER_MESSAGE: &str = "no settlements in region";

/// All result rows of a run with their column layout
#[derive(Debug, Clone, PartialEq)]
pub struct ResultTable {
    columns: Vec<String>,
    rows: Vec<ResultRow>,
}

impl ResultTable {
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[ResultRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Write the table as CSV. Unknown values become empty cells; an empty
    /// table becomes the one-column error marker.
    pub fn write_csv<W: Write>(&self, writer: W) -> Result<()> {
        let mut csv = csv::Writer::from_writer(writer);

        if self.rows.is_empty() {
            csv.write_record([EMPTY_MARKER_HEADER])?;
            csv.write_record([EMPTY_MARKER_MESSAGE])?;
        } else {
            csv.write_record(&self.columns)?;
            for row in &self.rows {
                csv.write_record(self.columns.iter().map(|c| cell(row.properties.get(c))))?;
            }
        }

        csv.flush()?;
        Ok(())
    }

    pub fn to_csv_string(&self) -> Result<String> {
        let mut buffer = Vec::new();
        self.write_csv(&mut buffer)?;
        String::from_utf8(buffer).map_err(|e| Error::InvalidInput(format!("Non UTF-8 output: {e}")))
    }
}

fn cell(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

/// Flatten per-tile rows (already in tile order) into one table.
///
/// Columns are the settlement properties in first-seen order, then `lat`,
/// `lon`, one column per category in `categories` order, then `nearest`.
pub fn aggregate(tiles: Vec<Vec<ResultRow>>, categories: &[String]) -> ResultTable {
    let computed: HashSet<&str> = [LAT_FIELD, LON_FIELD, NEAREST_FIELD]
        .into_iter()
        .chain(categories.iter().map(String::as_str))
        .collect();

    let rows: Vec<ResultRow> = tiles.into_iter().flatten().collect();

    let mut seen = HashSet::new();
    let mut columns: Vec<String> = Vec::new();
    for key in rows.iter().flat_map(|r| r.properties.keys()) {
        if !computed.contains(key.as_str()) && seen.insert(key.as_str()) {
            columns.push(key.clone());
        }
    }
    columns.push(LAT_FIELD.to_string());
    columns.push(LON_FIELD.to_string());
    columns.extend(categories.iter().cloned());
    columns.push(NEAREST_FIELD.to_string());

    ResultTable { columns, rows }
}

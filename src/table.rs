use std::fmt;
use std::io::Write;

use thiserror::Error;

/// Column name of the mandatory source-path column, always at index 0.
pub const FILENAME_COLUMN: &str = "Filename";

/// Prefix used for surrogate columns added by the identifier mapper.
pub const SURROGATE_PREFIX: &str = "fake_";

/// Fixed display form of the not-found sentinel, relied on by audit tooling
/// reading the exported table.
const NOT_FOUND: &str = "Not found";

#[derive(Error, Debug, PartialEq)]
pub enum TableError {
    #[error("column {0} does not exist in the table")]
    MissingColumn(String),

    #[error("column {name} has {actual} values but the table has {expected} rows")]
    LengthMismatch {
        name: String,
        expected: usize,
        actual: usize,
    },

    #[error("row has {actual} cells but the table has {expected} columns")]
    RowWidthMismatch { expected: usize, actual: usize },
}

/// A single cell of the tag table.
///
/// A tag that is absent from a record yields [`CellValue::NotFound`], which is
/// a valid value in its own right and deliberately distinguishable from a tag
/// that is present with an empty string value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CellValue {
    Found(String),
    NotFound,
}

impl CellValue {
    pub fn is_found(&self) -> bool {
        matches!(self, CellValue::Found(_))
    }

    /// The cell value if the tag was present, `None` for the sentinel.
    pub fn found(&self) -> Option<&str> {
        match self {
            CellValue::Found(v) => Some(v),
            CellValue::NotFound => None,
        }
    }

    /// The cell value if present and non-empty, otherwise `default`.
    pub fn found_or<'a>(&'a self, default: &'a str) -> &'a str {
        match self {
            CellValue::Found(v) if !v.is_empty() => v,
            _ => default,
        }
    }

    /// The string this cell sorts and maps under. The sentinel maps like any
    /// other distinct value so that rows missing an identifier still group
    /// together consistently.
    pub fn key(&self) -> &str {
        match self {
            CellValue::Found(v) => v,
            CellValue::NotFound => NOT_FOUND,
        }
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl From<String> for CellValue {
    fn from(value: String) -> Self {
        CellValue::Found(value)
    }
}

impl From<&str> for CellValue {
    fn from(value: &str) -> Self {
        CellValue::Found(value.to_string())
    }
}

/// One view over a single table row, with cells addressable by column name.
#[derive(Debug, Clone, Copy)]
pub struct RowView<'a> {
    table: &'a TagTable,
    index: usize,
}

impl<'a> RowView<'a> {
    pub fn get(&self, column: &str) -> Option<&'a CellValue> {
        let idx = self.table.column_index(column)?;
        self.table.rows[self.index].get(idx)
    }

    pub fn filename(&self) -> &'a str {
        // Column 0 always exists and extraction always fills it in.
        self.table.rows[self.index][0].key()
    }
}

/// The tabular artifact produced by extraction and enriched by mapping.
///
/// One row per successfully-read record, one column per requested tag, plus
/// the mandatory [`FILENAME_COLUMN`] at index 0. Column order is request
/// order; row order is made stable by sorting on the source path.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TagTable {
    columns: Vec<String>,
    rows: Vec<Vec<CellValue>>,
}

impl TagTable {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn push_row(&mut self, row: Vec<CellValue>) -> Result<(), TableError> {
        if row.len() != self.columns.len() {
            return Err(TableError::RowWidthMismatch {
                expected: self.columns.len(),
                actual: row.len(),
            });
        }
        self.rows.push(row);
        Ok(())
    }

    pub fn row(&self, index: usize) -> RowView<'_> {
        RowView { table: self, index }
    }

    pub fn rows(&self) -> impl Iterator<Item = RowView<'_>> {
        (0..self.rows.len()).map(move |index| RowView { table: self, index })
    }

    /// All cells of a named column, in row order.
    pub fn column(&self, name: &str) -> Result<impl Iterator<Item = &CellValue>, TableError> {
        let idx = self
            .column_index(name)
            .ok_or_else(|| TableError::MissingColumn(name.to_string()))?;
        Ok(self.rows.iter().map(move |row| &row[idx]))
    }

    /// Distinct values of a column in order of first appearance. This is the
    /// ordering the sequential counters are assigned in, so it must stay
    /// stable for a given row order.
    pub fn unique_in_order(&self, name: &str) -> Result<Vec<String>, TableError> {
        let mut seen = std::collections::HashSet::new();
        let mut out = Vec::new();
        for cell in self.column(name)? {
            let key = cell.key();
            if seen.insert(key) {
                out.push(key.to_string());
            }
        }
        Ok(out)
    }

    /// Append a derived column. The number of values must match the number of
    /// rows; anything else is a caller bug surfaced as an error.
    pub fn add_column(
        &mut self,
        name: impl Into<String>,
        values: Vec<CellValue>,
    ) -> Result<(), TableError> {
        let name = name.into();
        if values.len() != self.rows.len() {
            return Err(TableError::LengthMismatch {
                name,
                expected: self.rows.len(),
                actual: values.len(),
            });
        }
        self.columns.push(name);
        for (row, value) in self.rows.iter_mut().zip(values) {
            row.push(value);
        }
        Ok(())
    }

    /// Sort rows by the source path column so downstream diffing does not
    /// depend on the order parallel workers happened to finish in.
    pub fn sort_by_filename(&mut self) {
        self.rows.sort_by(|a, b| a[0].key().cmp(b[0].key()));
    }

    /// Write the table as CSV for the audit artifact. Values containing
    /// separators, quotes or newlines are quoted; the not-found sentinel is
    /// written in its display form.
    pub fn write_csv<W: Write>(&self, mut writer: W) -> std::io::Result<()> {
        let header: Vec<String> = self.columns.iter().map(|c| csv_escape(c)).collect();
        writeln!(writer, "{}", header.join(","))?;
        for row in &self.rows {
            let line: Vec<String> = row.iter().map(|c| csv_escape(c.key())).collect();
            writeln!(writer, "{}", line.join(","))?;
        }
        Ok(())
    }
}

pub(crate) fn csv_escape(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

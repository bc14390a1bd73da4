//! Result table
//!
//! Collected records in insertion order, plus the accumulator of every column
//! seen so far. The CSV header is the union of the accumulated columns, in
//! first-seen order, so the column set only ever grows within a run.

use crate::store::snapshot::{open_csv, write_csv_atomic, SnapshotError, SnapshotResult};
use crate::store::ItemKey;
use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::Path;

/// Column carrying the item key of each row in a keyed snapshot
pub const KEY_COLUMN: &str = "__key";

/// A scalar field value in a result record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
}

impl FieldValue {
    /// Converts a JSON value into a field value
    ///
    /// `null` maps to `None`. Arrays and objects are kept as their JSON text.
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        use serde_json::Value;

        match value {
            Value::Null => None,
            Value::Bool(b) => Some(Self::Bool(*b)),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Some(Self::Integer(i)),
                None => n.as_f64().map(Self::Float),
            },
            Value::String(s) => Some(Self::Text(s.clone())),
            Value::Array(_) | Value::Object(_) => Some(Self::Text(value.to_string())),
        }
    }

    /// Renders the value as a CSV cell
    pub fn to_cell(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{}", b),
            Self::Integer(i) => write!(f, "{}", i),
            Self::Float(x) => write!(f, "{}", x),
            Self::Text(s) => f.write_str(s),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

/// One extracted item: field name to value, in extraction order
pub type Record = IndexMap<String, FieldValue>;

/// Ordered collection of records with a growing column set
///
/// Each row may remember the item key it was extracted from. Keys are only
/// written by [`ResultTable::write_keyed_csv`], never to the final results.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultTable {
    columns: IndexSet<String>,
    rows: Vec<Record>,
    keys: Vec<Option<ItemKey>>,
}

impl ResultTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a record and registers any columns not seen before
    pub fn push(&mut self, record: Record) {
        self.insert_row(None, record);
    }

    /// Appends a record extracted from `key`
    pub fn push_keyed(&mut self, key: ItemKey, record: Record) {
        self.insert_row(Some(key), record);
    }

    fn insert_row(&mut self, key: Option<ItemKey>, record: Record) {
        for name in record.keys() {
            if !self.columns.contains(name) {
                self.columns.insert(name.clone());
            }
        }
        self.rows.push(record);
        self.keys.push(key);
    }

    /// Keys of the rows that remember one, in row order
    pub fn keys(&self) -> impl Iterator<Item = &ItemKey> {
        self.keys.iter().flatten()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn rows(&self) -> &[Record] {
        &self.rows
    }

    /// Every column seen so far, in first-seen order
    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(String::as_str)
    }

    /// Writes the table to `path`; cells missing from a row are left empty
    pub fn write_csv(&self, path: &Path) -> SnapshotResult<()> {
        self.write(path, false)
    }

    /// Writes the table with a leading [`KEY_COLUMN`] holding each row's key
    ///
    /// Used for crash snapshots, so a resumed run can tell which items are
    /// already in the table.
    pub fn write_keyed_csv(&self, path: &Path) -> SnapshotResult<()> {
        self.write(path, true)
    }

    fn write(&self, path: &Path, keyed: bool) -> SnapshotResult<()> {
        write_csv_atomic(path, |writer| {
            if self.columns.is_empty() {
                return Ok(());
            }
            let key_header = keyed.then_some(KEY_COLUMN);
            let header = key_header
                .into_iter()
                .chain(self.columns.iter().map(String::as_str));
            writer.write_record(header)?;

            for (row, key) in self.rows.iter().zip(&self.keys) {
                let key_cell =
                    keyed.then(|| key.as_ref().map(ItemKey::to_string).unwrap_or_default());
                let cells = self
                    .columns
                    .iter()
                    .map(|column| row.get(column).map(FieldValue::to_cell).unwrap_or_default());
                writer.write_record(key_cell.into_iter().chain(cells))?;
            }
            Ok(())
        })?;
        tracing::debug!(
            "Wrote {} rows x {} columns to {}",
            self.rows.len(),
            self.columns.len(),
            path.display()
        );
        Ok(())
    }

    /// Reads a table written by [`ResultTable::write_csv`] or
    /// [`ResultTable::write_keyed_csv`]
    ///
    /// The header seeds the column accumulator. Cells come back as text and
    /// empty cells are omitted from their row. When the file carries a
    /// [`KEY_COLUMN`], a row whose key was already seen is dropped.
    pub fn load(path: &Path) -> SnapshotResult<Self> {
        let mut reader = open_csv(path)?;
        let headers = reader
            .headers()
            .map_err(|e| SnapshotError::csv(path, e))?
            .clone();

        let mut table = Self::new();
        for name in headers.iter().filter(|name| *name != KEY_COLUMN) {
            table.columns.insert(name.to_string());
        }

        let mut seen = HashSet::new();
        let mut duplicates = 0;
        for row in reader.records() {
            let row = row.map_err(|e| SnapshotError::csv(path, e))?;
            let mut key = None;
            let mut record = Record::new();
            for (name, cell) in headers.iter().zip(row.iter()) {
                if cell.is_empty() {
                    continue;
                }
                if name == KEY_COLUMN {
                    key = Some(ItemKey::from(cell));
                } else {
                    record.insert(name.to_string(), FieldValue::from(cell));
                }
            }

            if let Some(key) = &key {
                if !seen.insert(key.clone()) {
                    duplicates += 1;
                    continue;
                }
            }
            table.rows.push(record);
            table.keys.push(key);
        }

        if duplicates > 0 {
            tracing::debug!(
                "Dropped {} duplicate rows while loading {}",
                duplicates,
                path.display()
            );
        }

        Ok(table)
    }

    /// Loads a table if the file exists, otherwise returns an empty one
    pub fn load_or_default(path: &Path) -> SnapshotResult<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::new())
        }
    }
}

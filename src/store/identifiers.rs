//! Identifier store
//!
//! An ordered, deduplicated table of discovered item keys, each carrying a
//! processed flag. The table is the unit of crash recovery for both discovery
//! and collection: it is snapshotted to CSV (`key,processed`) and reloaded on
//! the next run.

use crate::store::snapshot::{open_csv, write_csv_atomic, SnapshotError, SnapshotResult};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;

/// Identifier of a listing item: a URL or a numeric id rendered as text
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemKey(String);

impl ItemKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ItemKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ItemKey {
    fn from(key: &str) -> Self {
        Self(key.to_string())
    }
}

impl From<String> for ItemKey {
    fn from(key: String) -> Self {
        Self(key)
    }
}

impl From<u64> for ItemKey {
    fn from(key: u64) -> Self {
        Self(key.to_string())
    }
}

impl From<i64> for ItemKey {
    fn from(key: i64) -> Self {
        Self(key.to_string())
    }
}

/// One row of the identifier table
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct IdentifierRecord {
    pub key: ItemKey,
    #[serde(default, deserialize_with = "deserialize_flag")]
    pub processed: bool,
}

/// Accepts `true`/`false` in any case, `1`/`0`, and an empty cell as `false`
fn deserialize_flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" => Ok(true),
        "false" | "0" | "" => Ok(false),
        other => Err(serde::de::Error::custom(format!(
            "invalid processed flag '{}'",
            other
        ))),
    }
}

/// Ordered, deduplicated identifier table
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdentifierStore {
    records: Vec<IdentifierRecord>,
    index: HashMap<ItemKey, usize>,
}

impl IdentifierStore {
    /// Creates an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Merges newly discovered keys into the table
    ///
    /// New keys are appended unprocessed, in iteration order. Keys already
    /// present keep their position and their processed flag.
    ///
    /// # Returns
    ///
    /// The number of keys that were not already present
    pub fn append<I>(&mut self, keys: I) -> usize
    where
        I: IntoIterator<Item = ItemKey>,
    {
        let mut added = 0;
        for key in keys {
            if self.index.contains_key(&key) {
                continue;
            }
            self.push(IdentifierRecord {
                key,
                processed: false,
            });
            added += 1;
        }
        added
    }

    /// Unions another store into this one
    ///
    /// Missing keys are appended with their flag; a key processed in either
    /// store ends up processed. A flag is never reset.
    pub fn merge(&mut self, other: &IdentifierStore) {
        for record in &other.records {
            match self.index.get(&record.key) {
                Some(&position) => {
                    if record.processed {
                        self.records[position].processed = true;
                    }
                }
                None => self.push(record.clone()),
            }
        }
    }

    /// Marks a key as processed
    ///
    /// Idempotent. Returns `false` if the key is not in the table.
    pub fn mark_processed(&mut self, key: &ItemKey) -> bool {
        match self.index.get(key) {
            Some(&position) => {
                self.records[position].processed = true;
                true
            }
            None => false,
        }
    }

    /// Keys still waiting for a successful extraction, in table order
    pub fn unprocessed(&self) -> Vec<ItemKey> {
        self.records
            .iter()
            .filter(|r| !r.processed)
            .map(|r| r.key.clone())
            .collect()
    }

    /// Returns the processed flag of a key, if present
    pub fn is_processed(&self, key: &ItemKey) -> Option<bool> {
        self.index.get(key).map(|&i| self.records[i].processed)
    }

    pub fn contains(&self, key: &ItemKey) -> bool {
        self.index.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn processed_count(&self) -> usize {
        self.records.iter().filter(|r| r.processed).count()
    }

    pub fn records(&self) -> &[IdentifierRecord] {
        &self.records
    }

    pub fn keys(&self) -> impl Iterator<Item = &ItemKey> {
        self.records.iter().map(|r| &r.key)
    }

    /// Writes the full table to `path`, replacing any previous snapshot
    pub fn snapshot(&self, path: &Path) -> SnapshotResult<()> {
        write_csv_atomic(path, |writer| {
            writer.write_record(["key", "processed"])?;
            for record in &self.records {
                let flag = if record.processed { "true" } else { "false" };
                writer.write_record([record.key.as_str(), flag])?;
            }
            Ok(())
        })?;
        tracing::debug!(
            "Snapshot of {} identifiers written to {}",
            self.records.len(),
            path.display()
        );
        Ok(())
    }

    /// Reconstructs a table from a snapshot
    ///
    /// Duplicate keys collapse onto their first occurrence.
    pub fn load(path: &Path) -> SnapshotResult<Self> {
        let mut reader = open_csv(path)?;

        let headers = reader
            .headers()
            .map_err(|e| SnapshotError::csv(path, e))?
            .clone();
        if !headers.iter().any(|h| h == "key") {
            return Err(SnapshotError::Malformed {
                path: path.to_path_buf(),
                message: "missing 'key' column".to_string(),
            });
        }

        let mut store = Self::new();
        let mut duplicates = 0;
        for row in reader.deserialize::<IdentifierRecord>() {
            let record = row.map_err(|e| SnapshotError::csv(path, e))?;
            if store.index.contains_key(&record.key) {
                duplicates += 1;
                continue;
            }
            store.push(record);
        }

        if duplicates > 0 {
            tracing::debug!(
                "Dropped {} duplicate identifiers while loading {}",
                duplicates,
                path.display()
            );
        }

        Ok(store)
    }

    /// Loads a snapshot if the file exists, otherwise returns an empty store
    pub fn load_or_default(path: &Path) -> SnapshotResult<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::new())
        }
    }

    fn push(&mut self, record: IdentifierRecord) {
        self.index.insert(record.key.clone(), self.records.len());
        self.records.push(record);
    }
}

impl FromIterator<ItemKey> for IdentifierStore {
    fn from_iter<I: IntoIterator<Item = ItemKey>>(iter: I) -> Self {
        let mut store = Self::new();
        store.append(iter);
        store
    }
}

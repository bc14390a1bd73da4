//! On-disk layout of a run
//!
//! ```text
//! <root>/ids/<source>/<ids-prefix>_<partition>_ids.csv      canonical identifiers
//! <root>/temp/temp_<partition>_<ids-prefix>.csv             discovery snapshot
//! <root>/temp/temp_<result-prefix>_<partition>_ids.csv      collector identifiers
//! <root>/temp/temp_<result-prefix>_<partition>.csv          collector results
//! <root>/results/<YYYY-MM-DD>/<result-prefix>_<partition>.csv
//! ```

use crate::config::SourceConfig;
use crate::source::Partition;
use chrono::NaiveDate;
use std::path::{Path, PathBuf};

/// Output root plus the date used for the results directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLayout {
    root: PathBuf,
    date: NaiveDate,
}

impl OutputLayout {
    pub fn new(root: impl Into<PathBuf>, date: NaiveDate) -> Self {
        Self {
            root: root.into(),
            date,
        }
    }

    /// Layout dated with the local calendar day
    pub fn today(root: impl Into<PathBuf>) -> Self {
        Self::new(root, chrono::Local::now().date_naive())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }

    /// Every snapshot path of one partition
    pub fn partition_paths(&self, source: &SourceConfig, partition: &Partition) -> PartitionPaths {
        let label = partition.label();
        let temp = self.root.join("temp");

        PartitionPaths {
            ids: self
                .root
                .join("ids")
                .join(&source.name)
                .join(format!("{}_{}_ids.csv", source.ids_filename, label)),
            discovery_temp: temp.join(format!("temp_{}_{}.csv", label, source.ids_filename)),
            temp_ids: temp.join(format!("temp_{}_{}_ids.csv", source.result_filename, label)),
            temp_results: temp.join(format!("temp_{}_{}.csv", source.result_filename, label)),
            results: self
                .root
                .join("results")
                .join(self.date.format("%Y-%m-%d").to_string())
                .join(format!("{}_{}.csv", source.result_filename, label)),
        }
    }
}

/// Snapshot paths of one partition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionPaths {
    /// Canonical identifier store
    pub ids: PathBuf,
    /// Identifier store during discovery
    pub discovery_temp: PathBuf,
    /// Identifier store during collection
    pub temp_ids: PathBuf,
    /// Partial results during collection
    pub temp_results: PathBuf,
    /// Final dated results
    pub results: PathBuf,
}

impl PartitionPaths {
    /// All paths under `dir`, for tests and ad-hoc runs
    pub fn in_dir(dir: &Path, name: &str) -> Self {
        Self {
            ids: dir.join(format!("{}_ids.csv", name)),
            discovery_temp: dir.join(format!("temp_{}_discovery.csv", name)),
            temp_ids: dir.join(format!("temp_{}_ids.csv", name)),
            temp_results: dir.join(format!("temp_{}.csv", name)),
            results: dir.join(format!("{}.csv", name)),
        }
    }
}

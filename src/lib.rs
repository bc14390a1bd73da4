//! Listing Harvester: a resumable listing crawler
//!
//! This crate discovers listing identifiers from paginated search pages, fetches
//! per-item detail through a retrying, proxy-rotating HTTP layer, and checkpoints
//! both the identifier set and the collected records to CSV so an interrupted run
//! can pick up where it stopped.

pub mod config;
pub mod fetch;
pub mod output;
pub mod pipeline;
pub mod source;
pub mod store;

use thiserror::Error;

/// Main error type for harvester operations
///
/// Only failures that break the crash-recovery contract end up here. Request,
/// page and item failures are contained by the component that sees them.
#[derive(Debug, Error)]
pub enum HarvestError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Snapshot error: {0}")]
    Snapshot(#[from] store::SnapshotError),

    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("Unknown source: {0}")]
    UnknownSource(String),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL template in config: {0}")]
    InvalidUrl(String),

    #[error("Invalid selector in config: {0}")]
    InvalidSelector(String),
}

/// Result type alias for harvester operations
pub type Result<T> = std::result::Result<T, HarvestError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

// Re-export commonly used types
pub use config::Config;
pub use fetch::{FetchFailure, FetchRequest, FetchResponse, Fetcher};
pub use pipeline::{Collector, DiscoveryDriver, Harvester, RunMode};
pub use source::{Extractor, ListingSource, Partition, Source};
pub use store::{FieldValue, IdentifierStore, ItemKey, Record, ResultTable};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_errors_surface_through_harvest_error() {
        let error: HarvestError = ConfigError::Validation("pages must be > 0".into()).into();
        assert!(matches!(error, HarvestError::Config(ConfigError::Validation(_))));
        assert_eq!(
            error.to_string(),
            "Configuration error: Validation error: pages must be > 0"
        );
    }
}

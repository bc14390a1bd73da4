//! Configuration module for the harvester
//!
//! This module handles loading, parsing, and validating the TOML run
//! configuration: request/proxy behaviour, output layout, and the list of
//! sources with their partition dimensions.
//!
//! # Example
//!
//! ```no_run
//! use listing_harvester::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("harvester.toml")).unwrap();
//! println!("Proxy enabled: {}", config.requests.use_proxy);
//! ```

mod parser;
mod types;
mod validation;

// Re-export types
pub use types::{
    Config, DetailMethod, DimensionConfig, JsonFieldConfig, OutputConfig, RequestConfig,
    SourceConfig, SourceKind, DEFAULT_PROXY_LIST_URL, DEFAULT_USER_AGENT,
};

// Re-export parser functions
pub use parser::{compute_config_hash, load_config, load_config_with_hash, parse_config};

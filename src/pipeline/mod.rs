//! The resumable crawl pipeline
//!
//! - [`DiscoveryDriver`]: listing pages to identifier store
//! - [`Collector`]: identifier store to result table, with checkpoints
//! - [`Harvester`]: runs both over every partition of a source
//! - [`OutputLayout`]: where every snapshot lives

mod collector;
mod discovery;
mod layout;
mod runner;

pub use collector::{CollectReport, Collector, ResumeState};
pub use discovery::{DiscoveryDriver, DiscoveryReport};
pub use layout::{OutputLayout, PartitionPaths};
pub use runner::{Harvester, RunMode};

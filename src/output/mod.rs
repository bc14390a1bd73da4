//! Output module for run reports
//!
//! Snapshots and result files are written by the store; this module only
//! aggregates and prints what a run did.

pub mod stats;

pub use stats::{print_report, PartitionReport, RunReport, SourceReport};

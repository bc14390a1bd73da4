//! Run statistics
//!
//! Reports collected while a run progresses, and their console rendering.

use crate::fetch::FetchStats;
use crate::pipeline::{CollectReport, DiscoveryReport};
use chrono::{DateTime, Local};

/// Results of one partition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionReport {
    /// Partition label as used in file names
    pub label: String,

    /// Present when discovery ran
    pub discovery: Option<DiscoveryReport>,

    /// Present when collection ran
    pub collection: Option<CollectReport>,
}

impl PartitionReport {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            discovery: None,
            collection: None,
        }
    }
}

/// Results of one source across its partitions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceReport {
    pub source: String,
    pub partitions: Vec<PartitionReport>,
}

impl SourceReport {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            partitions: Vec::new(),
        }
    }

    pub fn keys_added(&self) -> usize {
        self.partitions
            .iter()
            .filter_map(|p| p.discovery.as_ref())
            .map(|d| d.keys_added)
            .sum()
    }

    pub fn collected(&self) -> usize {
        self.partitions
            .iter()
            .filter_map(|p| p.collection.as_ref())
            .map(|c| c.collected)
            .sum()
    }

    pub fn remaining(&self) -> usize {
        self.partitions
            .iter()
            .filter_map(|p| p.collection.as_ref())
            .map(|c| c.remaining)
            .sum()
    }
}

/// Summary of a whole invocation
#[derive(Debug, Clone)]
pub struct RunReport {
    pub started_at: DateTime<Local>,
    pub finished_at: DateTime<Local>,
    pub sources: Vec<SourceReport>,
    pub fetch: FetchStats,
}

impl RunReport {
    pub fn duration_seconds(&self) -> i64 {
        (self.finished_at - self.started_at).num_seconds()
    }
}

/// Prints a run report to stdout in a formatted manner
///
/// # Arguments
///
/// * `report` - The report to display
pub fn print_report(report: &RunReport) {
    println!("=== Harvest Statistics ===\n");

    println!("Overview:");
    println!("  Started: {}", report.started_at.format("%Y-%m-%d %H:%M:%S"));
    println!("  Duration: {}s", report.duration_seconds());
    println!("  Sources: {}", report.sources.len());
    println!();

    for source in &report.sources {
        println!("Source {}:", source.source);
        for partition in &source.partitions {
            println!("  [{}]", partition.label);
            if let Some(d) = &partition.discovery {
                println!(
                    "    Discovery: {} pages visited, {} skipped, {} keys found, {} new",
                    d.pages_visited, d.pages_skipped, d.keys_found, d.keys_added
                );
            }
            if let Some(c) = &partition.collection {
                let success_rate = if c.attempted > 0 {
                    (c.collected as f64 / c.attempted as f64) * 100.0
                } else {
                    0.0
                };
                println!(
                    "    Collection: {}/{} collected ({:.1}%), {} remaining{}",
                    c.collected,
                    c.attempted,
                    success_rate,
                    c.remaining,
                    if c.resumed { ", resumed" } else { "" }
                );
            }
        }
        println!(
            "  Total: {} new identifiers, {} records, {} remaining",
            source.keys_added(),
            source.collected(),
            source.remaining()
        );
        println!();
    }

    println!("Requests:");
    println!("  Calls: {}", report.fetch.calls);
    println!("  Direct requests: {}", report.fetch.direct_requests);
    println!("  Proxied attempts: {}", report.fetch.proxied_attempts);
    println!("  Proxy failures: {}", report.fetch.proxy_failures);
    println!("  Direct fallbacks: {}", report.fetch.fallbacks);
}

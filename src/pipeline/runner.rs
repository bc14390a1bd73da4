//! Partition runner
//!
//! Drives one source through its partitions, one after the other. For each
//! partition it resolves the snapshot paths, then runs discovery, collection,
//! or both.

use crate::config::{OutputConfig, SourceConfig};
use crate::fetch::Fetcher;
use crate::output::{PartitionReport, SourceReport};
use crate::pipeline::{Collector, DiscoveryDriver, OutputLayout, PartitionPaths};
use crate::source::{build_source, Partition, Source};
use crate::store::{remove_snapshot, IdentifierStore};
use crate::Result;
use std::sync::Arc;
use tracing::Instrument;

/// Which stages of the pipeline to run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunMode {
    /// Discovery followed by collection
    #[default]
    Full,
    /// Discovery only
    Discover,
    /// Collection of already discovered identifiers only
    Collect,
}

impl RunMode {
    pub fn discovers(self) -> bool {
        matches!(self, RunMode::Full | RunMode::Discover)
    }

    pub fn collects(self) -> bool {
        matches!(self, RunMode::Full | RunMode::Collect)
    }
}

/// Runs sources against a shared fetch layer and output layout
pub struct Harvester {
    fetcher: Arc<Fetcher>,
    layout: OutputLayout,
    output: OutputConfig,
    fresh: bool,
}

impl Harvester {
    pub fn new(fetcher: Arc<Fetcher>, layout: OutputLayout, output: OutputConfig) -> Self {
        Self {
            fetcher,
            layout,
            output,
            fresh: false,
        }
    }

    /// Ignore previous identifier stores and crash snapshots
    pub fn fresh(mut self, fresh: bool) -> Self {
        self.fresh = fresh;
        self
    }

    pub fn layout(&self) -> &OutputLayout {
        &self.layout
    }

    /// Builds the configured adapter for `config` and runs it
    pub async fn run(&self, config: &SourceConfig, mode: RunMode) -> Result<SourceReport> {
        let source = build_source(config, Arc::clone(&self.fetcher))?;
        self.run_partitions(config, source.as_ref(), mode).await
    }

    /// Runs every partition of `config` with the given source plug-in
    ///
    /// # Returns
    ///
    /// * `Ok(SourceReport)` - Per-partition discovery and collection reports
    /// * `Err(HarvestError)` - A snapshot failed; later partitions are not run
    pub async fn run_partitions<S>(
        &self,
        config: &SourceConfig,
        source: &S,
        mode: RunMode,
    ) -> Result<SourceReport>
    where
        S: Source + ?Sized,
    {
        let partitions = Partition::expand(&config.dimensions);
        tracing::info!(
            "Source {}: {} partition(s), mode {:?}",
            config.name,
            partitions.len(),
            mode
        );

        let mut report = SourceReport::new(&config.name);
        for partition in partitions {
            let span = tracing::info_span!(
                "partition",
                source = %config.name,
                partition = %partition.label()
            );
            let paths = self.layout.partition_paths(config, &partition);

            let partition_report = self
                .run_partition(config, source, &partition, &paths, mode, span.clone())
                .instrument(span)
                .await?;
            report.partitions.push(partition_report);
        }

        Ok(report)
    }

    async fn run_partition<S>(
        &self,
        config: &SourceConfig,
        source: &S,
        partition: &Partition,
        paths: &PartitionPaths,
        mode: RunMode,
        span: tracing::Span,
    ) -> Result<PartitionReport>
    where
        S: Source + ?Sized,
    {
        let mut report = PartitionReport::new(partition.label());

        if self.fresh {
            tracing::info!("Fresh run: discarding crash snapshots");
            remove_snapshot(&paths.discovery_temp)?;
            remove_snapshot(&paths.temp_ids)?;
            remove_snapshot(&paths.temp_results)?;
        }

        if mode.discovers() {
            let mut store = if self.fresh {
                IdentifierStore::new()
            } else {
                DiscoveryDriver::resume(paths)?
            };

            let driver = DiscoveryDriver::new(
                Arc::clone(&self.fetcher),
                config.from_page,
                config.pages,
            )
            .with_span(span.clone());
            report.discovery = Some(driver.discover(&mut store, source, partition, paths).await?);
        }

        if mode.collects() {
            let collector = Collector::new(self.output.snapshot_interval, self.output.batch_size)
                .with_span(span);
            let mut state = collector.resume(paths)?;
            let mut collected = collector
                .collect(&mut state.store, &mut state.table, source, paths)
                .await?;
            collected.resumed = state.resumed;
            report.collection = Some(collected);
        }

        Ok(report)
    }
}

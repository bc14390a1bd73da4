//! Checkpointed detail collector
//!
//! Iterates the unprocessed identifiers of a partition, extracts each one,
//! and appends non-empty records to the result table. Progress is
//! checkpointed to the temporary snapshots every `snapshot_interval`
//! iterations; the final table and store are written once the loop ends.
//!
//! The iteration counter counts attempted items, successful or not, but a
//! snapshot is only taken right after a success.
//!
//! A checkpoint writes the partial results (each row tagged with its item
//! key) before the partial store. A crash between the two writes leaves rows
//! whose keys the store still lists as unprocessed; [`Collector::resume`]
//! marks those keys processed so no row is collected twice. The final flush
//! removes the partial store first, since its presence is what triggers a
//! resume.

use crate::pipeline::PartitionPaths;
use crate::source::Extractor;
use crate::store::{remove_snapshot, IdentifierStore, ResultTable};
use crate::Result;
use tracing::{Instrument, Span};

/// Outcome of collecting one partition
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CollectReport {
    /// Items handed to the extractor
    pub attempted: usize,
    /// Items that produced a record
    pub collected: usize,
    /// Items left unprocessed (error or empty extraction)
    pub skipped: usize,
    /// Temporary snapshots written before the final flush
    pub snapshots: usize,
    /// Items still unprocessed after this run
    pub remaining: usize,
    /// Whether the run continued from a crash snapshot
    pub resumed: bool,
}

/// Store and table a collection run starts from
#[derive(Debug, Clone, Default)]
pub struct ResumeState {
    pub store: IdentifierStore,
    pub table: ResultTable,
    /// Loaded from temporary snapshots left by an interrupted run
    pub resumed: bool,
}

#[derive(Debug, Clone)]
pub struct Collector {
    snapshot_interval: usize,
    batch_size: Option<usize>,
    span: Span,
}

impl Collector {
    /// Creates a collector
    ///
    /// `snapshot_interval` is clamped to at least 1. `batch_size` caps the
    /// number of items attempted in one run.
    pub fn new(snapshot_interval: usize, batch_size: Option<usize>) -> Self {
        Self {
            snapshot_interval: snapshot_interval.max(1),
            batch_size,
            span: Span::none(),
        }
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Loads the state a collection run should start from
    ///
    /// Temporary snapshots win when both are present: they hold the progress
    /// of an interrupted run. The canonical store is merged in so identifiers
    /// discovered since then are not lost, and every key already in the
    /// partial table is marked processed. Otherwise the canonical store is
    /// used, and today's results file (if any) seeds the table so a second
    /// run on the same day extends it.
    pub fn resume(&self, paths: &PartitionPaths) -> Result<ResumeState> {
        let _entered = self.span.enter();

        if paths.temp_ids.exists() && paths.temp_results.exists() {
            let mut store = IdentifierStore::load(&paths.temp_ids)?;
            store.merge(&IdentifierStore::load_or_default(&paths.ids)?);
            let table = ResultTable::load(&paths.temp_results)?;
            for key in table.keys() {
                store.mark_processed(key);
            }

            tracing::info!(
                "Resuming from {}: {} of {} items already processed, {} rows",
                paths.temp_ids.display(),
                store.processed_count(),
                store.len(),
                table.len()
            );

            return Ok(ResumeState {
                store,
                table,
                resumed: true,
            });
        }

        if paths.temp_ids.exists() || paths.temp_results.exists() {
            tracing::warn!("Ignoring incomplete crash snapshot for {}", paths.ids.display());
        }

        let store = IdentifierStore::load_or_default(&paths.ids)?;
        let table = ResultTable::load_or_default(&paths.results)?;
        tracing::debug!(
            "Starting from {} identifiers and {} existing rows",
            store.len(),
            table.len()
        );

        Ok(ResumeState {
            store,
            table,
            resumed: false,
        })
    }

    /// Collects every unprocessed item of `store`
    ///
    /// # Arguments
    ///
    /// * `store` - Identifier store; successful keys are marked processed
    /// * `table` - Result table the records are appended to
    /// * `extractor` - Produces one record per key
    /// * `paths` - Temporary and final snapshot locations
    ///
    /// # Returns
    ///
    /// * `Ok(CollectReport)` - All selected items were attempted and flushed
    /// * `Err(HarvestError)` - A snapshot could not be written
    pub async fn collect<E>(
        &self,
        store: &mut IdentifierStore,
        table: &mut ResultTable,
        extractor: &E,
        paths: &PartitionPaths,
    ) -> Result<CollectReport>
    where
        E: Extractor + ?Sized,
    {
        self.run(store, table, extractor, paths)
            .instrument(self.span.clone())
            .await
    }

    async fn run<E>(
        &self,
        store: &mut IdentifierStore,
        table: &mut ResultTable,
        extractor: &E,
        paths: &PartitionPaths,
    ) -> Result<CollectReport>
    where
        E: Extractor + ?Sized,
    {
        let pending = store.unprocessed();
        let total = match self.batch_size {
            Some(limit) => pending.len().min(limit),
            None => pending.len(),
        };
        let mut report = CollectReport::default();

        tracing::info!(
            "Collecting {} of {} unprocessed items ({} identifiers total)",
            total,
            pending.len(),
            store.len()
        );

        for (index, key) in pending.iter().take(total).enumerate() {
            let iteration = index + 1;
            report.attempted += 1;

            match extractor.extract(key).await {
                Ok(Some(record)) if !record.is_empty() => {
                    table.push_keyed(key.clone(), record);
                    store.mark_processed(key);
                    report.collected += 1;
                    tracing::info!("[{}/{}] collected {}", iteration, total, key);

                    if iteration % self.snapshot_interval == 0 {
                        self.checkpoint(store, table, paths)?;
                        report.snapshots += 1;
                    }
                }
                Ok(_) => {
                    report.skipped += 1;
                    tracing::info!("[{}/{}] nothing extracted for {}", iteration, total, key);
                }
                Err(e) => {
                    report.skipped += 1;
                    tracing::warn!("[{}/{}] extraction failed for {}: {}", iteration, total, key, e);
                }
            }
        }

        table.write_csv(&paths.results)?;
        store.snapshot(&paths.ids)?;
        remove_snapshot(&paths.temp_ids)?;
        remove_snapshot(&paths.temp_results)?;

        report.remaining = store.len() - store.processed_count();
        tracing::info!(
            "Collection finished: {} collected, {} skipped, {} remaining; results in {}",
            report.collected,
            report.skipped,
            report.remaining,
            paths.results.display()
        );

        Ok(report)
    }

    fn checkpoint(
        &self,
        store: &IdentifierStore,
        table: &ResultTable,
        paths: &PartitionPaths,
    ) -> Result<()> {
        table.write_keyed_csv(&paths.temp_results)?;
        store.snapshot(&paths.temp_ids)?;
        tracing::debug!("Checkpoint: {} rows, {} processed", table.len(), store.processed_count());
        Ok(())
    }
}

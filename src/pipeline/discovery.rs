//! Discovery driver
//!
//! Walks the listing pages of one partition and merges the keys found into
//! the identifier store. A page that cannot be fetched or parsed is logged
//! and skipped; the store is snapshotted after every page so a crash loses
//! at most the page in flight. The next run picks that snapshot up through
//! [`DiscoveryDriver::resume`].

use crate::fetch::{FetchFailure, Fetcher};
use crate::pipeline::PartitionPaths;
use crate::source::{ListingError, ListingSource, Partition};
use crate::store::{remove_snapshot, IdentifierStore, ItemKey};
use crate::Result;
use indexmap::IndexSet;
use std::sync::Arc;
use thiserror::Error;
use tracing::{Instrument, Span};

/// Why a listing page contributed no keys
#[derive(Debug, Error)]
enum PageError {
    #[error(transparent)]
    Fetch(#[from] FetchFailure),

    #[error("HTTP {0}")]
    Status(u16),

    #[error(transparent)]
    Listing(#[from] ListingError),

    #[error("no keys on page")]
    Empty,
}

/// Outcome of discovering one partition
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiscoveryReport {
    pub pages_visited: u32,
    pub pages_skipped: u32,
    /// Distinct keys seen across all pages
    pub keys_found: usize,
    /// Keys that were not already in the store
    pub keys_added: usize,
}

/// Visits pages `[from_page, from_page + pages)` of a listing source
pub struct DiscoveryDriver {
    fetcher: Arc<Fetcher>,
    from_page: u32,
    pages: u32,
    span: Span,
}

impl DiscoveryDriver {
    pub fn new(fetcher: Arc<Fetcher>, from_page: u32, pages: u32) -> Self {
        Self {
            fetcher,
            from_page,
            pages,
            span: Span::none(),
        }
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Loads the store a discovery run starts from
    ///
    /// The canonical store, plus the keys of a discovery snapshot left by an
    /// interrupted run.
    pub fn resume(paths: &PartitionPaths) -> Result<IdentifierStore> {
        let mut store = IdentifierStore::load_or_default(&paths.ids)?;
        if paths.discovery_temp.exists() {
            let interrupted = IdentifierStore::load(&paths.discovery_temp)?;
            tracing::info!(
                "Recovering {} identifiers from {}",
                interrupted.len(),
                paths.discovery_temp.display()
            );
            store.merge(&interrupted);
        }
        Ok(store)
    }

    /// Discovers the keys of one partition into `store`
    ///
    /// # Arguments
    ///
    /// * `store` - Identifier store to extend; existing flags are kept
    /// * `source` - Builds listing requests and parses listing pages
    /// * `partition` - Dimension values substituted into the listing URL
    /// * `paths` - Temporary and canonical snapshot locations
    ///
    /// # Returns
    ///
    /// * `Ok(DiscoveryReport)` - Every page was visited or skipped
    /// * `Err(HarvestError)` - A snapshot could not be written
    pub async fn discover<L>(
        &self,
        store: &mut IdentifierStore,
        source: &L,
        partition: &Partition,
        paths: &PartitionPaths,
    ) -> Result<DiscoveryReport>
    where
        L: ListingSource + ?Sized,
    {
        self.run(store, source, partition, paths)
            .instrument(self.span.clone())
            .await
    }

    async fn run<L>(
        &self,
        store: &mut IdentifierStore,
        source: &L,
        partition: &Partition,
        paths: &PartitionPaths,
    ) -> Result<DiscoveryReport>
    where
        L: ListingSource + ?Sized,
    {
        let mut report = DiscoveryReport::default();
        let mut seen = IndexSet::new();
        let last_page = self
            .from_page
            .saturating_add(self.pages.saturating_sub(1));

        tracing::info!(
            "Discovering pages {}..={} for partition {}",
            self.from_page,
            last_page,
            partition
        );

        for page in (self.from_page..=last_page).take(self.pages as usize) {
            match self.discover_page(source, page, partition).await {
                Ok(keys) => {
                    report.pages_visited += 1;
                    let on_page = keys.len();
                    seen.extend(keys.iter().cloned());
                    let added = store.append(keys);
                    report.keys_added += added;
                    tracing::info!(
                        "[page {}/{}] {} keys, {} new",
                        page,
                        last_page,
                        on_page,
                        added
                    );
                }
                Err(e) => {
                    report.pages_skipped += 1;
                    tracing::warn!("[page {}/{}] skipped: {}", page, last_page, e);
                }
            }

            store.snapshot(&paths.discovery_temp)?;
        }

        report.keys_found = seen.len();
        store.snapshot(&paths.ids)?;
        remove_snapshot(&paths.discovery_temp)?;

        tracing::info!(
            "Discovery finished: {} pages visited, {} skipped, {} identifiers stored",
            report.pages_visited,
            report.pages_skipped,
            store.len()
        );

        Ok(report)
    }

    /// Fetches and parses one page, deduplicating its keys
    async fn discover_page<L>(
        &self,
        source: &L,
        page: u32,
        partition: &Partition,
    ) -> std::result::Result<Vec<ItemKey>, PageError>
    where
        L: ListingSource + ?Sized,
    {
        let request = source.listing_request(page, partition);
        let response = self.fetcher.fetch(request).await?;
        if !response.is_success() {
            return Err(PageError::Status(response.status));
        }

        let keys: IndexSet<ItemKey> = source
            .parse_listing(&response.url, &response.body)?
            .into_iter()
            .collect();
        if keys.is_empty() {
            return Err(PageError::Empty);
        }

        Ok(keys.into_iter().collect())
    }
}

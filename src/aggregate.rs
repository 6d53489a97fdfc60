//! The aggregation cycle: fan out, merge, dedup, sort.
//!
//! One cycle launches every configured source concurrently, waits for all of
//! them to settle, and merges whatever succeeded into a single [`Snapshot`].
//! A failing source contributes nothing and aborts nothing; the snapshot
//! carries ok/failed counts so consumers can show a "N of M sources
//! unavailable" notice without blocking on it.

use chrono::Utc;
use futures::stream::{self, StreamExt};
use itertools::Itertools;
use tracing::{info, instrument, warn};

use crate::fetcher::SourceFetcher;
use crate::live::FetchCycle;
use crate::models::{NewsItem, Snapshot, Source};
use crate::recency;
use crate::relay::RelayTransport;

/// How many sources are fetched at once.
const PARALLEL_SOURCES: usize = 8;

/// Runs aggregation cycles over a fixed source list.
pub struct Aggregator<T> {
    fetcher: SourceFetcher<T>,
    sources: Vec<Source>,
    window_days: i64,
}

impl<T: RelayTransport> Aggregator<T> {
    pub fn new(fetcher: SourceFetcher<T>, sources: Vec<Source>, window_days: i64) -> Self {
        Self {
            fetcher,
            sources,
            window_days,
        }
    }

    /// Fetch every source concurrently and merge the results, newest first.
    ///
    /// Failures are already absorbed per source by the fetcher; this method
    /// cannot fail, only shrink.
    /// Fetch one source, tagging the result with its name.
    async fn fetch_one(&self, source: &Source) -> (String, Vec<NewsItem>) {
        (source.name.clone(), self.fetcher.fetch(source).await)
    }

    #[instrument(level = "info", skip_all, fields(sources = self.sources.len()))]
    pub async fn fetch_all(&self) -> Snapshot {
        let mut pending = Vec::with_capacity(self.sources.len());
        for source in &self.sources {
            pending.push(self.fetch_one(source));
        }
        let per_source: Vec<(String, Vec<NewsItem>)> = stream::iter(pending)
            .buffer_unordered(PARALLEL_SOURCES)
            .collect()
            .await;

        let sources_ok = per_source.iter().filter(|(_, items)| !items.is_empty()).count();
        let sources_failed = per_source.len() - sources_ok;
        if sources_failed > 0 {
            warn!(
                ok = sources_ok,
                failed = sources_failed,
                "some sources contributed nothing this cycle"
            );
        }

        let items = merge(per_source.into_iter().flat_map(|(_, items)| items).collect());
        info!(count = items.len(), ok = sources_ok, failed = sources_failed, "cycle merged");

        Snapshot {
            items,
            fetched_at: Utc::now(),
            sources_ok,
            sources_failed,
            stale_fallback: false,
        }
    }
}

/// Sort newest-first and drop cross-source duplicates.
///
/// Ties on the timestamp are broken by title so repeated cycles over the
/// same data order identically. Dedup keeps the first occurrence, which
/// after sorting is the newest copy of a reused link.
fn merge(mut items: Vec<NewsItem>) -> Vec<NewsItem> {
    items.sort_by(|a, b| {
        b.published
            .cmp(&a.published)
            .then_with(|| a.title.cmp(&b.title))
    });
    items.into_iter().unique_by(NewsItem::dedup_key).collect()
}

impl<T: RelayTransport + Send + Sync + 'static> FetchCycle for Aggregator<T> {
    /// One full cycle: fan-out fetch, merge, recency window.
    ///
    /// The only cycle-level failure is every source coming back empty; that
    /// drives the update loop's backoff rather than being hidden inside an
    /// empty-but-"successful" snapshot.
    async fn run_cycle(&self) -> Result<Snapshot, Box<dyn std::error::Error + Send + Sync>> {
        let mut snapshot = self.fetch_all().await;
        if !self.sources.is_empty() && snapshot.sources_ok == 0 {
            return Err(format!("all {} sources unavailable", self.sources.len()).into());
        }
        let (items, stale_fallback) =
            recency::apply_window(snapshot.items, self.window_days, Utc::now());
        snapshot.items = items;
        snapshot.stale_fallback = stale_fallback;
        Ok(snapshot)
    }
}

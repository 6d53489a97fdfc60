//! Per-source fetching: TTL cache, relay fallback chain, provider routing.
//!
//! [`SourceFetcher::fetch`] is the one entry point the aggregation cycle
//! uses per source. It never fails: every relay, network, and parse error is
//! caught here and degrades to an empty result for that source only, so one
//! bad provider can never block the others. An empty result means "source
//! unavailable this cycle", not "source has no news".
//!
//! The cache is keyed by source URL and expires purely by age. It lives
//! inside the fetcher rather than in any ambient global so tests and
//! parallel pipelines get isolated instances. Two concurrent fetches of the
//! same source may race to populate an entry; last write wins, which is
//! harmless since entries are immutable once stored.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument, warn};

use crate::arxiv;
use crate::feed::parse_feed;
use crate::models::{NewsItem, Source};
use crate::relay::{ATTEMPT_TIMEOUT, Relay, RelayTransport, fetch_through_relay};

/// Cached result of one successful source fetch.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub items: Vec<NewsItem>,
    pub stored_at: DateTime<Utc>,
}

impl CacheEntry {
    /// An entry is served only while younger than the TTL.
    pub fn is_fresh(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        let age = now.signed_duration_since(self.stored_at);
        age.to_std().map(|age| age < ttl).unwrap_or(true)
    }
}

/// Default cache TTL.
pub const CACHE_TTL: Duration = Duration::from_secs(5 * 60);

/// Fetches one source through the relay chain (or the paper-search client),
/// with a TTL cache in front of the network.
pub struct SourceFetcher<T> {
    transport: T,
    relays: Vec<Relay>,
    ttl: Duration,
    attempt_timeout: Duration,
    cache: Mutex<HashMap<String, CacheEntry>>,
}

impl<T: RelayTransport> SourceFetcher<T> {
    pub fn new(transport: T, relays: Vec<Relay>) -> Self {
        Self {
            transport,
            relays,
            ttl: CACHE_TTL,
            attempt_timeout: ATTEMPT_TIMEOUT,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Override the cache TTL.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Fetch one source. Returns `[]` on total failure; never errors.
    #[instrument(level = "info", skip_all, fields(source = %source.name))]
    pub async fn fetch(&self, source: &Source) -> Vec<NewsItem> {
        let now = Utc::now();
        if let Some(hit) = self.cache_lookup(&source.url, now) {
            debug!(source = %source.name, count = hit.len(), "cache hit");
            return hit;
        }

        let items = if source.is_paper_search() {
            match arxiv::fetch_papers(&self.transport, source).await {
                Ok(items) => items,
                Err(e) => {
                    warn!(source = %source.name, error = %e, "paper-search fetch failed");
                    Vec::new()
                }
            }
        } else {
            self.fetch_via_relays(source).await
        };

        if items.is_empty() {
            // Not cached: a later cycle should try again immediately.
            warn!(source = %source.name, "source unavailable this cycle");
        } else {
            self.cache_store(&source.url, items.clone(), now);
        }
        items
    }

    /// Walk the relay chain in configured order; first relay yielding at
    /// least one parsed item wins.
    async fn fetch_via_relays(&self, source: &Source) -> Vec<NewsItem> {
        for relay in &self.relays {
            match fetch_through_relay(&self.transport, relay, &source.url, self.attempt_timeout)
                .await
            {
                Ok(body) => {
                    let items = parse_feed(&body, source);
                    if items.is_empty() {
                        // A 200 with nothing parseable is a failure in
                        // disguise; the next relay may serve a clean copy.
                        warn!(source = %source.name, relay = relay.name, "relay returned an empty document");
                        continue;
                    }
                    info!(source = %source.name, relay = relay.name, count = items.len(), "source fetched");
                    return items;
                }
                Err(e) if e.is_rate_limited() => {
                    debug!(source = %source.name, relay = relay.name, "rate limited, next relay");
                    continue;
                }
                Err(e) => {
                    warn!(source = %source.name, relay = relay.name, error = %e, "relay attempt failed");
                    continue;
                }
            }
        }
        Vec::new()
    }

    fn cache_lookup(&self, url: &str, now: DateTime<Utc>) -> Option<Vec<NewsItem>> {
        let cache = self.cache.lock().expect("cache lock poisoned");
        cache
            .get(url)
            .filter(|entry| entry.is_fresh(now, self.ttl))
            .map(|entry| entry.items.clone())
    }

    fn cache_store(&self, url: &str, items: Vec<NewsItem>, now: DateTime<Utc>) {
        let mut cache = self.cache.lock().expect("cache lock poisoned");
        cache.insert(
            url.to_string(),
            CacheEntry {
                items,
                stored_at: now,
            },
        );
    }
}

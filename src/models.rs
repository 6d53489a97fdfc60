//! Data models for feed sources, normalized news items, and snapshots.
//!
//! This module defines the core data structures used throughout the application:
//! - [`Source`]: Static configuration for one feed provider
//! - [`NewsItem`]: A normalized news record from any provider
//! - [`Snapshot`]: The merged, sorted result of one aggregation cycle
//! - [`ConnectionStatus`]: Health of the realtime update loop, read by consumers
//!
//! A `NewsItem` keeps its publish timestamp twice: as a raw [`DateTime<Utc>`]
//! used for sorting and recency filtering, and as a pre-rendered display
//! string. Sorting never touches the display string.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// URL sentinel marking a source that is served by the paper-search provider
/// instead of the generic RSS relay chain.
pub const PAPER_SEARCH_SENTINEL: &str = "paper-search";

/// Static configuration for one feed provider.
///
/// Sources are loaded once at startup, either from the compiled-in defaults
/// or from a YAML file, and are immutable afterwards.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Source {
    /// Human-readable provider name, shown next to each item.
    pub name: String,
    /// Fetchable feed endpoint, or [`PAPER_SEARCH_SENTINEL`] for the
    /// paper-search provider.
    pub url: String,
    /// Category assigned to every item from this source.
    pub category: String,
}

impl Source {
    pub fn new(name: &str, url: &str, category: &str) -> Self {
        Self {
            name: name.to_string(),
            url: url.to_string(),
            category: category.to_string(),
        }
    }

    /// Whether this source routes to the paper-search provider.
    pub fn is_paper_search(&self) -> bool {
        self.url == PAPER_SEARCH_SENTINEL
    }
}

/// A single normalized news record.
///
/// Created by the feed normalizer from one relay response and immutable
/// afterwards, except that a translation step may overlay `title` while
/// preserving `original_title`. Items are discarded wholesale on every
/// refresh cycle; there is no persistent identity across cycles.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NewsItem {
    /// Headline, markup stripped.
    pub title: String,
    /// Summary text, markup stripped.
    pub description: String,
    /// URL to the full content. May be empty when the provider omits it.
    pub link: String,
    /// Raw publish timestamp used for sorting and recency filtering.
    /// `None` means the provider gave no parseable date.
    pub published: Option<DateTime<Utc>>,
    /// Pre-rendered timestamp for display. Never used for ordering.
    pub published_display: String,
    /// Name of the source this item came from.
    pub source: String,
    /// Category inherited from the source, or mapped from provider topic
    /// tags for the paper-search provider.
    pub category: Option<String>,
    /// Original headline, kept when a translation overlays `title`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_title: Option<String>,
    /// Original summary, kept when a translation overlays `description`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_description: Option<String>,
}

impl NewsItem {
    /// Key used for cross-source deduplication at merge time: the link when
    /// present, the title otherwise (some providers reuse links).
    pub fn dedup_key(&self) -> String {
        if self.link.is_empty() {
            self.title.clone()
        } else {
            self.link.clone()
        }
    }
}

/// The complete result of one aggregation cycle across all sources.
///
/// Items are sorted non-increasing by `published`; ties are broken by title
/// so repeated cycles over the same data produce identical ordering. The
/// per-cycle source counts are informational and never block consumption.
#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    pub items: Vec<NewsItem>,
    /// When this cycle completed.
    pub fetched_at: DateTime<Utc>,
    /// Sources that contributed at least one item this cycle.
    pub sources_ok: usize,
    /// Sources that contributed nothing this cycle (unavailable, not empty).
    pub sources_failed: usize,
    /// True when recency filtering emptied the result and the most-recent
    /// unfiltered items are being shown instead.
    pub stale_fallback: bool,
}

impl Snapshot {
    /// Timestamp of the freshest item, used to detect "no new items".
    pub fn freshest(&self) -> Option<DateTime<Utc>> {
        self.items.iter().filter_map(|i| i.published).max()
    }
}

/// Health of the realtime update loop.
///
/// Mutated only by the loop itself; consumers read a clone.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ConnectionStatus {
    pub connected: bool,
    /// Completion time of the last successful cycle.
    pub last_update: Option<DateTime<Utc>>,
    /// Consecutive failed cycles since the last success.
    pub retry_count: u32,
    /// Description of the most recent failure, cleared on success.
    pub error: Option<String>,
}

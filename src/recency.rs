//! Recency windowing over merged snapshots.
//!
//! Items older than the configured window are dropped; items without a
//! parseable date are dropped too (fail-closed). When filtering would empty
//! a non-empty result set, the caller-level policy falls back to the
//! most-recent unfiltered items with a visible staleness flag instead of
//! silently losing the whole snapshot.

use chrono::{DateTime, Duration, Utc};
use tracing::warn;

use crate::models::NewsItem;

/// Default window in days.
pub const DEFAULT_WINDOW_DAYS: i64 = 14;

/// How many unfiltered items the stale fallback keeps.
pub const FALLBACK_LIMIT: usize = 20;

/// Keep items published strictly after `now - window_days`.
///
/// The boundary is exclusive: an item exactly `window_days` old is dropped.
/// Undated items are dropped. Applying the filter twice is the same as
/// applying it once.
pub fn filter_recent(items: &[NewsItem], window_days: i64, now: DateTime<Utc>) -> Vec<NewsItem> {
    let cutoff = now - Duration::days(window_days);
    items
        .iter()
        .filter(|item| item.published.is_some_and(|p| p > cutoff))
        .cloned()
        .collect()
}

/// Apply the window with the stale-fallback policy.
///
/// Returns the kept items plus a flag that is true when the fallback fired
/// (filtering emptied a non-empty input and the most-recent [`FALLBACK_LIMIT`]
/// unfiltered items are shown instead).
pub fn apply_window(
    items: Vec<NewsItem>,
    window_days: i64,
    now: DateTime<Utc>,
) -> (Vec<NewsItem>, bool) {
    let filtered = filter_recent(&items, window_days, now);
    if filtered.is_empty() && !items.is_empty() {
        warn!(
            window_days,
            total = items.len(),
            "recency window emptied the snapshot; showing most-recent items unfiltered"
        );
        let mut fallback = items;
        fallback.truncate(FALLBACK_LIMIT);
        return (fallback, true);
    }
    (filtered, false)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item_aged(seconds_old: i64, now: DateTime<Utc>) -> NewsItem {
        NewsItem {
            title: format!("aged {seconds_old}s"),
            description: String::new(),
            link: String::new(),
            published: Some(now - Duration::seconds(seconds_old)),
            published_display: String::new(),
            source: "test".to_string(),
            category: None,
            original_title: None,
            original_description: None,
        }
    }

    fn undated(now: DateTime<Utc>) -> NewsItem {
        let mut item = item_aged(0, now);
        item.published = None;
        item
    }

    #[test]
    fn test_window_boundary_is_exclusive() {
        let now = Utc::now();
        let window_secs = 14 * 24 * 60 * 60;
        let inside = item_aged(window_secs - 1, now);
        let exact = item_aged(window_secs, now);
        let outside = item_aged(window_secs + 1, now);

        let kept = filter_recent(&[inside, exact, outside], 14, now);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].title, format!("aged {}s", window_secs - 1));
    }

    #[test]
    fn test_undated_items_are_dropped() {
        let now = Utc::now();
        let kept = filter_recent(&[undated(now), item_aged(60, now)], 14, now);
        assert_eq!(kept.len(), 1);
    }

    #[test]
    fn test_filter_is_idempotent() {
        let now = Utc::now();
        let items = vec![
            item_aged(100, now),
            item_aged(15 * 24 * 60 * 60, now),
            undated(now),
            item_aged(5, now),
        ];
        let once = filter_recent(&items, 14, now);
        let twice = filter_recent(&once, 14, now);
        assert_eq!(once.len(), twice.len());
        for (a, b) in once.iter().zip(twice.iter()) {
            assert_eq!(a.title, b.title);
        }
    }

    #[test]
    fn test_fallback_fires_when_everything_is_stale() {
        let now = Utc::now();
        let stale: Vec<NewsItem> = (0..30)
            .map(|i| item_aged(20 * 24 * 60 * 60 + i, now))
            .collect();
        let (kept, fallback) = apply_window(stale, 14, now);
        assert!(fallback);
        assert_eq!(kept.len(), FALLBACK_LIMIT);
    }

    #[test]
    fn test_fallback_silent_on_normal_input() {
        let now = Utc::now();
        let (kept, fallback) = apply_window(vec![item_aged(60, now)], 14, now);
        assert!(!fallback);
        assert_eq!(kept.len(), 1);
    }

    #[test]
    fn test_empty_input_is_not_a_fallback() {
        let now = Utc::now();
        let (kept, fallback) = apply_window(vec![], 14, now);
        assert!(kept.is_empty());
        assert!(!fallback, "an empty cycle is a failure, not staleness");
    }
}

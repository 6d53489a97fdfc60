//! Windowing for large lists of variable-height records.
//!
//! Given a scroll offset and a viewport height, compute which items are in
//! view (plus an overscan margin) and where each one sits in absolute
//! pixels. Per-item sizes come from three tiers: a measured size reported
//! back by the consumer, a per-index estimator, or the flat default.
//!
//! The measured-size map is the only hidden mutable state; everything else
//! is recomputed from `(item_count, scroll_offset, viewport, sizes)` on
//! every call, so two calls with the same inputs always agree.

use std::collections::HashMap;
use std::time::{Duration, Instant};

/// One positioned entry of the visible window.
#[derive(Debug, Clone, PartialEq)]
pub struct VirtualItem {
    /// Index into the backing list.
    pub index: usize,
    /// Absolute offset of the item's top edge, in pixels.
    pub start: f32,
    /// Item height in pixels.
    pub size: f32,
}

type SizeEstimator = Box<dyn Fn(usize) -> f32 + Send + Sync>;

/// Visible-window calculator over an abstract list of `item_count` rows.
pub struct VirtualList {
    item_count: usize,
    default_size: f32,
    estimator: Option<SizeEstimator>,
    measured: HashMap<usize, f32>,
}

impl VirtualList {
    pub fn new(item_count: usize, default_size: f32) -> Self {
        Self {
            item_count,
            default_size,
            estimator: None,
            measured: HashMap::new(),
        }
    }

    /// Attach a per-index size estimator, consulted when no measured size
    /// exists for an index.
    pub fn with_estimator(
        mut self,
        estimator: impl Fn(usize) -> f32 + Send + Sync + 'static,
    ) -> Self {
        self.estimator = Some(Box::new(estimator));
        self
    }

    pub fn item_count(&self) -> usize {
        self.item_count
    }

    /// Swap in a new backing list. Measured sizes describe the old list's
    /// rows, so they are discarded.
    pub fn set_item_count(&mut self, item_count: usize) {
        self.item_count = item_count;
        self.measured.clear();
    }

    /// Record an observed size for one row (from a resize callback).
    /// Out-of-range indices are ignored.
    pub fn record_measured(&mut self, index: usize, size: f32) {
        if index < self.item_count {
            self.measured.insert(index, size);
        }
    }

    fn size_of(&self, index: usize) -> f32 {
        if let Some(&measured) = self.measured.get(&index) {
            return measured;
        }
        if let Some(estimator) = &self.estimator {
            return estimator(index);
        }
        self.default_size
    }

    /// Prefix-sum offset table; entry `i` is the top edge of item `i`, the
    /// final entry is the total content height.
    fn offsets(&self) -> Vec<f32> {
        let mut offsets = Vec::with_capacity(self.item_count + 1);
        let mut acc = 0.0;
        offsets.push(acc);
        for index in 0..self.item_count {
            acc += self.size_of(index);
            offsets.push(acc);
        }
        offsets
    }

    /// Total content height in pixels.
    pub fn total_size(&self) -> f32 {
        (0..self.item_count).map(|i| self.size_of(i)).sum()
    }

    /// Compute the visible window at `scroll_offset` for a viewport of
    /// `viewport` pixels, expanded by `overscan` items on each side.
    ///
    /// The first index is found by binary search for the first item whose
    /// extent reaches past the top edge; the last is the item whose top edge
    /// is still at or above the bottom edge.
    pub fn window(&self, scroll_offset: f32, viewport: f32, overscan: usize) -> Vec<VirtualItem> {
        if self.item_count == 0 {
            return Vec::new();
        }
        let scroll = scroll_offset.max(0.0);
        let offsets = self.offsets();

        // offsets[1..] are item bottom edges; skip rows fully above the top.
        let first = offsets[1..].partition_point(|&end| end <= scroll);
        // offsets[..count] are item top edges; keep rows starting at or
        // before the bottom edge.
        let last = offsets[..self.item_count]
            .partition_point(|&start| start <= scroll + viewport)
            .saturating_sub(1);

        let first = first.saturating_sub(overscan);
        let last = (last + overscan).min(self.item_count - 1);

        (first..=last)
            .map(|index| VirtualItem {
                index,
                start: offsets[index],
                size: offsets[index + 1] - offsets[index],
            })
            .collect()
    }
}

/// Debounce window after which scrolling is considered settled.
pub const SCROLL_DEBOUNCE: Duration = Duration::from_millis(150);

/// Classifies whether the consumer is currently scrolling.
///
/// The window does not own scrolling; it only watches event timestamps so
/// consumers can cheapen rendering while in motion.
#[derive(Debug, Default)]
pub struct ScrollActivity {
    last_event: Option<Instant>,
}

impl ScrollActivity {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_scroll(&mut self, now: Instant) {
        self.last_event = Some(now);
    }

    pub fn is_scrolling(&self, now: Instant) -> bool {
        self.last_event
            .is_some_and(|last| now.duration_since(last) < SCROLL_DEBOUNCE)
    }
}

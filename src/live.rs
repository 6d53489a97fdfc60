//! Realtime update loop: scheduling, retry/backoff, event fan-out.
//!
//! The loop owns a recurring timer that re-runs the aggregation cycle,
//! adapts its frequency to page visibility, suppresses notifications when a
//! cycle produced nothing new, and retries failed cycles with exponential
//! backoff up to a fixed ceiling. It is the sole interface boundary between
//! the acquisition pipeline and every consumer: all output flows through
//! typed [`FeedEvent`]s delivered to named subscribers.
//!
//! # Architecture
//!
//! The loop is an actor: [`LoopHandle`] sends [`Command`]s over a channel,
//! and [`UpdateLoop::run`] processes them in one task alongside the timer.
//! Running cycles inside the actor gives mutual exclusion: a tick that
//! becomes due while a cycle is still in flight is coalesced into the next
//! schedule instead of overlapping it.
//!
//! # Retry Strategy
//!
//! - Maximum 5 retry attempts per outage
//! - Exponential backoff starting at 1 second
//! - Maximum delay capped at 30 seconds
//! - Random jitter (0-250ms) added to prevent thundering herd
//!
//! Exceeding the ceiling stops the loop and emits a terminal error event;
//! consumers recover via [`LoopHandle::trigger_manual_update`] or a restart.

use std::collections::HashMap;
use std::error::Error;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::{Rng, rng};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};

use crate::models::{ConnectionStatus, Snapshot};

/// Maximum consecutive failed cycles before the loop stops itself.
pub const MAX_RETRIES: u32 = 5;

/// Initial retry delay; doubles with each consecutive failure.
pub const BASE_DELAY: Duration = Duration::from_secs(1);

/// Cap on the retry delay.
pub const MAX_DELAY: Duration = Duration::from_secs(30);

/// Trait for running one aggregation cycle.
///
/// The production implementation is the aggregator; tests substitute
/// scripted cycles to drive the state machine deterministically.
pub trait FetchCycle: Send + Sync + 'static {
    fn run_cycle(
        &self,
    ) -> impl std::future::Future<Output = Result<Snapshot, Box<dyn Error + Send + Sync>>> + Send;
}

/// Scheduling frequency tiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshRate {
    /// Every 2 minutes.
    High,
    /// Every 5 minutes.
    Normal,
    /// Every 10 minutes, used while the page is hidden.
    Low,
}

impl RefreshRate {
    pub fn period(self) -> Duration {
        match self {
            Self::High => Duration::from_secs(2 * 60),
            Self::Normal => Duration::from_secs(5 * 60),
            Self::Low => Duration::from_secs(10 * 60),
        }
    }
}

/// Page visibility as reported by the embedding UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Visible,
    Hidden,
}

/// Events published to subscribers.
#[derive(Debug, Clone)]
pub enum FeedEvent {
    /// A cycle produced fresher items than the last published snapshot.
    NewsUpdate {
        snapshot: Arc<Snapshot>,
        at: DateTime<Utc>,
    },
    /// The loop's health changed (or a new subscriber joined).
    ConnectionStatus {
        status: ConnectionStatus,
        at: DateTime<Utc>,
    },
    /// A cycle failed. `terminal` marks the retry ceiling being exceeded.
    Error {
        message: String,
        terminal: bool,
        at: DateTime<Utc>,
    },
}

/// Compute the backoff delay before retry number `retry_count` (1-based),
/// before jitter: `base * 2^(retry_count-1)`, capped at [`MAX_DELAY`].
pub fn backoff_delay(retry_count: u32) -> Duration {
    let doubled = BASE_DELAY.saturating_mul(1u32 << (retry_count.saturating_sub(1)).min(16));
    doubled.min(MAX_DELAY)
}

enum Command {
    Start { rate: RefreshRate },
    Stop,
    SetVisibility(Visibility),
    ManualUpdate,
    Subscribe { id: String, tx: UnboundedSender<FeedEvent> },
    Unsubscribe { id: String },
}

/// Cloneable handle for driving the loop and reading its status.
#[derive(Clone)]
pub struct LoopHandle {
    tx: UnboundedSender<Command>,
    status: Arc<Mutex<ConnectionStatus>>,
}

impl LoopHandle {
    /// Start (or restart) scheduled cycles at `rate`. Cancels any existing
    /// timer, resets the retry counter, and triggers one cycle immediately.
    pub fn start(&self, rate: RefreshRate) {
        let _ = self.tx.send(Command::Start { rate });
    }

    /// Stop scheduled cycles. In-flight work is not aborted.
    pub fn stop(&self) {
        let _ = self.tx.send(Command::Stop);
    }

    /// Report a visibility change. Hidden throttles to [`RefreshRate::Low`];
    /// visible returns to [`RefreshRate::Normal`] and refetches immediately.
    pub fn set_visibility(&self, visibility: Visibility) {
        let _ = self.tx.send(Command::SetVisibility(visibility));
    }

    /// Run one cycle outside the schedule. Works even while stopped.
    pub fn trigger_manual_update(&self) {
        let _ = self.tx.send(Command::ManualUpdate);
    }

    /// Register a named subscriber. The current status is delivered to it
    /// immediately. Unsubscribing the last subscriber stops the loop.
    pub fn subscribe(&self, id: &str) -> UnboundedReceiver<FeedEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        let _ = self.tx.send(Command::Subscribe {
            id: id.to_string(),
            tx,
        });
        rx
    }

    pub fn unsubscribe(&self, id: &str) {
        let _ = self.tx.send(Command::Unsubscribe { id: id.to_string() });
    }

    /// Current health, as of the last processed transition.
    pub fn status(&self) -> ConnectionStatus {
        self.status.lock().expect("status lock poisoned").clone()
    }
}

/// Whether the loop currently has scheduled cycles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Stopped,
    Scheduled { rate: RefreshRate },
}

/// The loop actor. Construct with [`UpdateLoop::new`], then spawn
/// [`UpdateLoop::run`].
pub struct UpdateLoop<F> {
    fetcher: Arc<F>,
    rx: UnboundedReceiver<Command>,
    status: Arc<Mutex<ConnectionStatus>>,
    subscribers: HashMap<String, UnboundedSender<FeedEvent>>,
    phase: Phase,
    retry_count: u32,
    last_freshest: Option<DateTime<Utc>>,
    published_once: bool,
    next_tick: Option<Instant>,
}

impl<F: FetchCycle> UpdateLoop<F> {
    pub fn new(fetcher: F) -> (Self, LoopHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let status = Arc::new(Mutex::new(ConnectionStatus::default()));
        let handle = LoopHandle {
            tx,
            status: Arc::clone(&status),
        };
        let update_loop = Self {
            fetcher: Arc::new(fetcher),
            rx,
            status,
            subscribers: HashMap::new(),
            phase: Phase::Stopped,
            retry_count: 0,
            last_freshest: None,
            published_once: false,
            next_tick: None,
        };
        (update_loop, handle)
    }

    /// Process commands and timer ticks until every handle is dropped.
    #[instrument(level = "info", skip_all)]
    pub async fn run(mut self) {
        loop {
            let deadline = self.next_tick;
            tokio::select! {
                cmd = self.rx.recv() => match cmd {
                    Some(cmd) => self.handle(cmd).await,
                    None => break,
                },
                () = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)),
                    if deadline.is_some() =>
                {
                    self.next_tick = None;
                    if self.phase != Phase::Stopped {
                        self.execute_cycle().await;
                    }
                }
            }
        }
        debug!("update loop exiting");
    }

    async fn handle(&mut self, cmd: Command) {
        match cmd {
            Command::Start { rate } => {
                info!(?rate, "update loop starting");
                self.phase = Phase::Scheduled { rate };
                self.retry_count = 0;
                self.next_tick = None;
                let status = self.update_status(|s| {
                    s.connected = true;
                    s.retry_count = 0;
                    s.error = None;
                });
                self.publish(FeedEvent::ConnectionStatus {
                    status,
                    at: Utc::now(),
                });
                self.execute_cycle().await;
            }
            Command::Stop => self.stop_loop("stopped"),
            Command::SetVisibility(visibility) => {
                if let Phase::Scheduled { .. } = self.phase {
                    match visibility {
                        Visibility::Hidden => {
                            info!("page hidden; throttling refresh");
                            self.phase = Phase::Scheduled {
                                rate: RefreshRate::Low,
                            };
                            self.next_tick = Some(Instant::now() + RefreshRate::Low.period());
                        }
                        Visibility::Visible => {
                            info!("page visible; resuming normal refresh");
                            self.phase = Phase::Scheduled {
                                rate: RefreshRate::Normal,
                            };
                            self.execute_cycle().await;
                        }
                    }
                }
            }
            Command::ManualUpdate => {
                debug!("manual update requested");
                self.execute_cycle().await;
            }
            Command::Subscribe { id, tx } => {
                // New subscribers learn the current health right away.
                let status = self.status.lock().expect("status lock poisoned").clone();
                let _ = tx.send(FeedEvent::ConnectionStatus {
                    status,
                    at: Utc::now(),
                });
                debug!(%id, "subscriber registered");
                self.subscribers.insert(id, tx);
            }
            Command::Unsubscribe { id } => {
                self.subscribers.remove(&id);
                debug!(%id, remaining = self.subscribers.len(), "subscriber removed");
                if self.subscribers.is_empty() && self.phase != Phase::Stopped {
                    self.stop_loop("last subscriber left");
                }
            }
        }
    }

    /// Run one cycle and apply the success/failure state transitions.
    async fn execute_cycle(&mut self) {
        match self.fetcher.run_cycle().await {
            Ok(snapshot) => self.on_cycle_success(snapshot),
            Err(e) => self.on_cycle_failure(e.to_string()),
        }
    }

    fn on_cycle_success(&mut self, snapshot: Snapshot) {
        self.retry_count = 0;
        let scheduled = matches!(self.phase, Phase::Scheduled { .. });
        let status = self.update_status(|s| {
            s.connected = scheduled;
            s.last_update = Some(snapshot.fetched_at);
            s.retry_count = 0;
            s.error = None;
        });
        self.publish(FeedEvent::ConnectionStatus {
            status,
            at: Utc::now(),
        });

        // Skip the re-render churn when nothing moved.
        let freshest = snapshot.freshest();
        let advanced = !self.published_once
            || freshest.is_some_and(|f| self.last_freshest.is_none_or(|prev| f > prev));
        if advanced {
            self.published_once = true;
            self.last_freshest = freshest.max(self.last_freshest);
            info!(
                items = snapshot.items.len(),
                ok = snapshot.sources_ok,
                failed = snapshot.sources_failed,
                "publishing news update"
            );
            self.publish(FeedEvent::NewsUpdate {
                snapshot: Arc::new(snapshot),
                at: Utc::now(),
            });
        } else {
            debug!("no new items; subscribers not notified");
        }

        if let Phase::Scheduled { rate } = self.phase {
            self.next_tick = Some(Instant::now() + rate.period());
        }
    }

    fn on_cycle_failure(&mut self, message: String) {
        let scheduled = matches!(self.phase, Phase::Scheduled { .. });
        if !scheduled {
            // Manual update while stopped: record, report, nothing to retry.
            warn!(error = %message, "manual cycle failed");
            let status = self.update_status(|s| {
                s.error = Some(message.clone());
            });
            self.publish(FeedEvent::ConnectionStatus {
                status,
                at: Utc::now(),
            });
            self.publish(FeedEvent::Error {
                message,
                terminal: false,
                at: Utc::now(),
            });
            return;
        }

        self.retry_count += 1;
        if self.retry_count > MAX_RETRIES {
            error!(
                retries = MAX_RETRIES,
                error = %message,
                "retry ceiling exceeded; stopping updates"
            );
            let status = self.update_status(|s| {
                s.connected = false;
                s.retry_count = self.retry_count - 1;
                s.error = Some(message.clone());
            });
            self.phase = Phase::Stopped;
            self.next_tick = None;
            self.publish(FeedEvent::ConnectionStatus {
                status,
                at: Utc::now(),
            });
            self.publish(FeedEvent::Error {
                message,
                terminal: true,
                at: Utc::now(),
            });
            return;
        }

        let jitter = Duration::from_millis(rng().random_range(0..=250));
        let delay = backoff_delay(self.retry_count) + jitter;
        warn!(
            attempt = self.retry_count,
            max = MAX_RETRIES,
            ?delay,
            error = %message,
            "cycle failed; backing off"
        );
        let status = self.update_status(|s| {
            s.connected = false;
            s.retry_count = self.retry_count;
            s.error = Some(message.clone());
        });
        self.next_tick = Some(Instant::now() + delay);
        self.publish(FeedEvent::ConnectionStatus {
            status,
            at: Utc::now(),
        });
        self.publish(FeedEvent::Error {
            message,
            terminal: false,
            at: Utc::now(),
        });
    }

    fn stop_loop(&mut self, reason: &str) {
        info!(reason, "update loop stopping");
        self.phase = Phase::Stopped;
        self.next_tick = None;
        let status = self.update_status(|s| {
            s.connected = false;
        });
        self.publish(FeedEvent::ConnectionStatus {
            status,
            at: Utc::now(),
        });
    }

    fn update_status(&self, f: impl FnOnce(&mut ConnectionStatus)) -> ConnectionStatus {
        let mut status = self.status.lock().expect("status lock poisoned");
        f(&mut status);
        status.clone()
    }

    /// Deliver an event to every subscriber. A dead subscriber is dropped
    /// and logged; its failure never propagates into the publisher.
    fn publish(&mut self, event: FeedEvent) {
        let mut dead = Vec::new();
        for (id, tx) in &self.subscribers {
            if tx.send(event.clone()).is_err() {
                warn!(subscriber = %id, "subscriber channel closed; dropping it");
                dead.push(id.clone());
            }
        }
        for id in dead {
            self.subscribers.remove(&id);
        }
        if self.subscribers.is_empty() && self.phase != Phase::Stopped && !matches!(event, FeedEvent::ConnectionStatus { .. }) {
            // Every remaining subscriber vanished mid-publish.
            self.stop_loop("all subscribers gone");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn snapshot_with_freshest(ts: Option<DateTime<Utc>>) -> Snapshot {
        let items = ts
            .map(|t| {
                vec![crate::models::NewsItem {
                    title: "headline".to_string(),
                    description: String::new(),
                    link: "https://example.com/x".to_string(),
                    published: Some(t),
                    published_display: String::new(),
                    source: "test".to_string(),
                    category: None,
                    original_title: None,
                    original_description: None,
                }]
            })
            .unwrap_or_default();
        Snapshot {
            items,
            fetched_at: Utc::now(),
            sources_ok: 1,
            sources_failed: 0,
            stale_fallback: false,
        }
    }

    struct FailingCycle {
        calls: Arc<AtomicUsize>,
    }

    impl FetchCycle for FailingCycle {
        async fn run_cycle(&self) -> Result<Snapshot, Box<dyn Error + Send + Sync>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err("relay farm on fire".into())
        }
    }

    struct SequenceCycle {
        results: Mutex<VecDeque<Snapshot>>,
        calls: Arc<AtomicUsize>,
    }

    impl SequenceCycle {
        fn new(results: Vec<Snapshot>, calls: Arc<AtomicUsize>) -> Self {
            Self {
                results: Mutex::new(results.into()),
                calls,
            }
        }
    }

    impl FetchCycle for SequenceCycle {
        async fn run_cycle(&self) -> Result<Snapshot, Box<dyn Error + Send + Sync>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut results = self.results.lock().unwrap();
            let next = results.pop_front().expect("cycle script exhausted");
            if results.is_empty() {
                results.push_back(next.clone());
            }
            Ok(next)
        }
    }

    #[test]
    fn test_backoff_delay_doubles_and_caps() {
        assert_eq!(backoff_delay(1), Duration::from_secs(1));
        assert_eq!(backoff_delay(2), Duration::from_secs(2));
        assert_eq!(backoff_delay(3), Duration::from_secs(4));
        assert_eq!(backoff_delay(4), Duration::from_secs(8));
        assert_eq!(backoff_delay(5), Duration::from_secs(16));
        assert_eq!(backoff_delay(6), Duration::from_secs(30), "capped");
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_ceiling_stops_after_five_retries() {
        let calls = Arc::new(AtomicUsize::new(0));
        let (update_loop, handle) = UpdateLoop::new(FailingCycle {
            calls: Arc::clone(&calls),
        });
        tokio::spawn(update_loop.run());

        let mut rx = handle.subscribe("ceiling-test");
        handle.start(RefreshRate::Normal);

        let mut retries = 0;
        loop {
            match rx.recv().await.expect("loop closed early") {
                FeedEvent::Error { terminal: false, .. } => retries += 1,
                FeedEvent::Error { terminal: true, .. } => break,
                _ => {}
            }
        }

        assert_eq!(retries, 5, "exactly five backoff retries");
        assert_eq!(calls.load(Ordering::SeqCst), 6, "initial attempt plus five retries");
        let status = handle.status();
        assert!(!status.connected);
        assert!(status.error.is_some());
    }

    #[tokio::test]
    async fn test_no_new_items_suppresses_duplicate_updates() {
        let ts = Utc.with_ymd_and_hms(2026, 8, 1, 12, 0, 0).unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let cycle = SequenceCycle::new(
            vec![snapshot_with_freshest(Some(ts)), snapshot_with_freshest(Some(ts))],
            Arc::clone(&calls),
        );
        let (update_loop, handle) = UpdateLoop::new(cycle);
        tokio::spawn(update_loop.run());

        let mut rx = handle.subscribe("dedupe-test");
        handle.trigger_manual_update();
        handle.trigger_manual_update();
        handle.unsubscribe("dedupe-test");

        let mut updates = 0;
        while let Some(event) = rx.recv().await {
            if matches!(event, FeedEvent::NewsUpdate { .. }) {
                updates += 1;
            }
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2, "both cycles ran");
        assert_eq!(updates, 1, "identical freshest timestamp published once");
    }

    #[tokio::test]
    async fn test_fresher_snapshot_is_published() {
        let t1 = Utc.with_ymd_and_hms(2026, 8, 1, 12, 0, 0).unwrap();
        let t2 = Utc.with_ymd_and_hms(2026, 8, 1, 13, 0, 0).unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let cycle = SequenceCycle::new(
            vec![snapshot_with_freshest(Some(t1)), snapshot_with_freshest(Some(t2))],
            Arc::clone(&calls),
        );
        let (update_loop, handle) = UpdateLoop::new(cycle);
        tokio::spawn(update_loop.run());

        let mut rx = handle.subscribe("advance-test");
        handle.trigger_manual_update();
        handle.trigger_manual_update();
        handle.unsubscribe("advance-test");

        let mut updates = 0;
        while let Some(event) = rx.recv().await {
            if matches!(event, FeedEvent::NewsUpdate { .. }) {
                updates += 1;
            }
        }
        assert_eq!(updates, 2);
    }

    #[tokio::test]
    async fn test_manual_update_works_while_stopped() {
        let ts = Utc.with_ymd_and_hms(2026, 8, 1, 12, 0, 0).unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let cycle = SequenceCycle::new(vec![snapshot_with_freshest(Some(ts))], Arc::clone(&calls));
        let (update_loop, handle) = UpdateLoop::new(cycle);
        tokio::spawn(update_loop.run());

        let mut rx = handle.subscribe("manual-test");
        handle.trigger_manual_update();
        handle.unsubscribe("manual-test");

        let mut saw_update = false;
        while let Some(event) = rx.recv().await {
            if matches!(event, FeedEvent::NewsUpdate { .. }) {
                saw_update = true;
            }
        }
        assert!(saw_update);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        // No schedule was ever started, so the loop reports disconnected.
        assert!(!handle.status().connected);
    }

    #[tokio::test]
    async fn test_last_unsubscribe_stops_the_loop() {
        let ts = Utc.with_ymd_and_hms(2026, 8, 1, 12, 0, 0).unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let cycle = SequenceCycle::new(vec![snapshot_with_freshest(Some(ts))], Arc::clone(&calls));
        let (update_loop, handle) = UpdateLoop::new(cycle);
        tokio::spawn(update_loop.run());

        let mut rx_a = handle.subscribe("a");
        let rx_b = handle.subscribe("b");
        handle.start(RefreshRate::Normal);

        // Wait for the first cycle to land before unsubscribing.
        loop {
            match rx_a.recv().await.expect("loop closed early") {
                FeedEvent::NewsUpdate { .. } => break,
                _ => {}
            }
        }
        assert!(handle.status().connected);

        drop(rx_b);
        handle.unsubscribe("b");
        handle.unsubscribe("a");
        while rx_a.recv().await.is_some() {}

        assert!(!handle.status().connected, "removing the last subscriber stopped the loop");
    }

    #[tokio::test]
    async fn test_visibility_change_refetches_when_visible() {
        let t1 = Utc.with_ymd_and_hms(2026, 8, 1, 12, 0, 0).unwrap();
        let t2 = Utc.with_ymd_and_hms(2026, 8, 1, 13, 0, 0).unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let cycle = SequenceCycle::new(
            vec![snapshot_with_freshest(Some(t1)), snapshot_with_freshest(Some(t2))],
            Arc::clone(&calls),
        );
        let (update_loop, handle) = UpdateLoop::new(cycle);
        tokio::spawn(update_loop.run());

        let mut rx = handle.subscribe("visibility-test");
        handle.start(RefreshRate::Normal);
        handle.set_visibility(Visibility::Hidden);
        handle.set_visibility(Visibility::Visible);
        handle.unsubscribe("visibility-test");

        let mut updates = 0;
        while let Some(event) = rx.recv().await {
            if matches!(event, FeedEvent::NewsUpdate { .. }) {
                updates += 1;
            }
        }
        assert_eq!(
            calls.load(Ordering::SeqCst),
            2,
            "start and the visible transition each ran a cycle; hidden did not"
        );
        assert_eq!(updates, 2);
    }
}

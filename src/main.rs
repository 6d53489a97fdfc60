//! # Newsriver
//!
//! A news aggregation pipeline that polls RSS/Atom feeds and a paper-search
//! API through public relay endpoints, normalizes heterogeneous items into a
//! common record, deduplicates and time-windows them, and publishes live
//! snapshots to subscribers.
//!
//! ## Features
//!
//! - Concurrent multi-source fetching with per-source failure isolation
//! - Ordered relay fallback chains with distinct rate-limit handling
//! - TTL response caching keyed by source URL
//! - Recency windowing with a stale-fallback affordance
//! - A realtime update loop with visibility-aware throttling and
//!   exponential-backoff retry
//! - A virtualized preview renderer for large result sets
//!
//! ## Usage
//!
//! ```sh
//! newsriver --once -j ./snapshots
//! ```
//!
//! ## Architecture
//!
//! The application follows a pipeline architecture:
//! 1. **Scheduling**: the update loop (or `--once`) triggers a cycle
//! 2. **Fetching**: every source is fetched concurrently through its relay chain
//! 3. **Normalization**: feed documents become uniform news items
//! 4. **Merging**: results are deduplicated, sorted, and recency-windowed
//! 5. **Output**: subscribers receive events; JSON snapshots land on disk

use std::error::Error;

use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt as tfmt};

mod aggregate;
mod arxiv;
mod cli;
mod config;
mod feed;
mod fetcher;
mod live;
mod models;
mod outputs;
mod recency;
mod relay;
mod utils;
mod virtual_list;

use aggregate::Aggregator;
use cli::Cli;
use fetcher::SourceFetcher;
use live::{FeedEvent, FetchCycle, UpdateLoop};
use models::Snapshot;
use relay::HttpTransport;
use utils::{ensure_writable_dir, truncate_chars};
use virtual_list::VirtualList;

/// Items rendered beyond the preview viewport on each side.
const PREVIEW_OVERSCAN: usize = 3;

/// Base row height for the preview before the description adds lines.
const PREVIEW_ROW_PX: f32 = 48.0;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    // --- Tracing init ---
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tfmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();

    info!("newsriver starting up");

    let args = Cli::parse();
    let sources = config::load_sources(args.sources.as_deref())?;
    info!(count = sources.len(), "source list loaded");

    // Early check: ensure the snapshot dir is writable before any fetching.
    if let Err(e) = ensure_writable_dir(&args.json_output_dir).await {
        error!(
            path = %args.json_output_dir,
            error = %e,
            "snapshot directory is not writable (fix perms or choose a different path)"
        );
        return Err(e);
    }

    let client = reqwest::Client::builder()
        .user_agent(concat!("newsriver/", env!("CARGO_PKG_VERSION")))
        .build()?;
    let transport = HttpTransport::new(client);
    let fetcher = SourceFetcher::new(transport, relay::default_relays());
    let aggregator = Aggregator::new(fetcher, sources, args.window_days);

    if args.once {
        let snapshot = aggregator.run_cycle().await?;
        render_preview(&snapshot, args.preview_height, args.preview_offset);
        outputs::json::write_snapshot(&snapshot, &args.json_output_dir).await?;
        return Ok(());
    }

    // --- Watch mode ---
    let (update_loop, handle) = UpdateLoop::new(aggregator);
    tokio::spawn(update_loop.run());
    let mut events = handle.subscribe("cli");
    handle.start(args.refresh.into());

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("shutting down");
                handle.stop();
                handle.unsubscribe("cli");
                break;
            }
            event = events.recv() => match event {
                None => break,
                Some(FeedEvent::NewsUpdate { snapshot, .. }) => {
                    render_preview(&snapshot, args.preview_height, args.preview_offset);
                    if let Err(e) =
                        outputs::json::write_snapshot(&snapshot, &args.json_output_dir).await
                    {
                        error!(error = %e, "failed to write snapshot");
                    }
                }
                Some(FeedEvent::ConnectionStatus { status, .. }) => {
                    info!(
                        connected = status.connected,
                        retry_count = status.retry_count,
                        error = status.error.as_deref().unwrap_or(""),
                        "connection status"
                    );
                }
                Some(FeedEvent::Error { message, terminal, .. }) => {
                    if terminal {
                        error!(%message, "updates stopped; restart or rerun with --once");
                    } else {
                        warn!(%message, "cycle failed; retrying");
                    }
                }
            }
        }
    }

    Ok(())
}

/// Render the visible slice of the snapshot through the virtualized window.
///
/// Row heights are estimated from the description length, so the window
/// exercises the same variable-height path a graphical consumer would.
fn render_preview(snapshot: &Snapshot, viewport: f32, scroll_offset: f32) {
    if snapshot.items.is_empty() {
        warn!("snapshot is empty; nothing to preview");
        return;
    }
    if snapshot.sources_failed > 0 {
        println!(
            "-- {} of {} sources unavailable this cycle --",
            snapshot.sources_failed,
            snapshot.sources_ok + snapshot.sources_failed
        );
    }
    if snapshot.stale_fallback {
        println!("-- no items inside the recency window; showing most recent unfiltered --");
    }

    let heights: Vec<f32> = snapshot.items.iter().map(estimate_row_height).collect();
    let list = VirtualList::new(snapshot.items.len(), PREVIEW_ROW_PX)
        .with_estimator(move |i| heights.get(i).copied().unwrap_or(PREVIEW_ROW_PX));

    let window = list.window(scroll_offset, viewport, PREVIEW_OVERSCAN);
    println!(
        "== {} items, showing {}..{} of 0..{} ==",
        snapshot.items.len(),
        window.first().map(|v| v.index).unwrap_or(0),
        window.last().map(|v| v.index).unwrap_or(0),
        snapshot.items.len().saturating_sub(1)
    );
    for entry in window {
        let item = &snapshot.items[entry.index];
        println!(
            "{:>7.0}px  {:<17} {}  [{}]",
            entry.start,
            item.published_display,
            truncate_chars(&item.title, 80),
            item.source
        );
        if !item.description.is_empty() {
            println!("           {}", truncate_chars(&item.description, 120));
        }
    }
}

/// Estimate a preview row's height from its text, one extra line per 80
/// description characters.
fn estimate_row_height(item: &models::NewsItem) -> f32 {
    let description_lines = (item.description.chars().count() as f32 / 80.0).ceil();
    PREVIEW_ROW_PX + description_lines.min(3.0) * 16.0
}

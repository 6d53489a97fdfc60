//! JSON snapshot output.
//!
//! Serializes the current [`Snapshot`] for consumption by external clients.
//! Each day gets its own directory; `latest.json` inside it is rewritten on
//! every published update, so consumers can poll one stable path.

use std::error::Error;

use tokio::fs;
use tracing::{error, info, instrument};

use crate::models::Snapshot;

/// Write `snapshot` under `json_output_dir`, partitioned by fetch date.
///
/// # Errors
///
/// Fails when the directory cannot be created or the file cannot be
/// written; serialization of a well-formed snapshot does not fail.
#[instrument(level = "info", skip_all, fields(json_output_dir = %json_output_dir))]
pub async fn write_snapshot(
    snapshot: &Snapshot,
    json_output_dir: &str,
) -> Result<(), Box<dyn Error + Send + Sync>> {
    let json = serde_json::to_string_pretty(snapshot)?;

    let day_dir = format!(
        "{}/{}",
        json_output_dir.trim_end_matches('/'),
        snapshot.fetched_at.format("%Y-%m-%d")
    );
    if let Err(e) = fs::create_dir_all(&day_dir).await {
        error!(%day_dir, error = %e, "failed to create snapshot dir");
        return Err(e.into());
    }

    let path = format!("{day_dir}/latest.json");
    fs::write(&path, json).await?;
    info!(%path, items = snapshot.items.len(), "wrote snapshot");
    Ok(())
}

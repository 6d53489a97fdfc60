//! Command-line interface definitions.
//!
//! All options can be provided via command-line flags; the source-list path
//! also falls back to an environment variable.

use clap::{Parser, ValueEnum};

use crate::live::RefreshRate;

/// Refresh tier for watch mode.
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum RefreshArg {
    High,
    Normal,
    Low,
}

impl From<RefreshArg> for RefreshRate {
    fn from(arg: RefreshArg) -> Self {
        match arg {
            RefreshArg::High => Self::High,
            RefreshArg::Normal => Self::Normal,
            RefreshArg::Low => Self::Low,
        }
    }
}

/// Command-line arguments.
///
/// # Examples
///
/// ```sh
/// # Watch mode with the built-in source list
/// newsriver -j ./snapshots
///
/// # One cycle against a custom source list, then exit
/// newsriver --once --sources ./sources.yaml -j ./snapshots
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Output directory for JSON snapshot files
    #[arg(short, long, default_value = "./snapshots")]
    pub json_output_dir: String,

    /// Optional YAML file with the source list (built-in defaults otherwise)
    #[arg(short, long, env = "NEWSRIVER_SOURCES")]
    pub sources: Option<String>,

    /// Recency window in days; older items are dropped
    #[arg(long, default_value_t = 14)]
    pub window_days: i64,

    /// Run one aggregation cycle and exit instead of watching
    #[arg(long)]
    pub once: bool,

    /// Refresh tier for watch mode
    #[arg(long, value_enum, default_value = "normal")]
    pub refresh: RefreshArg,

    /// Preview viewport height in pixels
    #[arg(long, default_value_t = 600.0)]
    pub preview_height: f32,

    /// Preview scroll offset in pixels
    #[arg(long, default_value_t = 0.0)]
    pub preview_offset: f32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::parse_from(["newsriver"]);
        assert_eq!(cli.json_output_dir, "./snapshots");
        assert!(cli.sources.is_none());
        assert_eq!(cli.window_days, 14);
        assert!(!cli.once);
        assert!(matches!(cli.refresh, RefreshArg::Normal));
    }

    #[test]
    fn test_cli_short_flags() {
        let cli = Cli::parse_from(["newsriver", "-j", "/tmp/out", "-s", "/tmp/sources.yaml"]);
        assert_eq!(cli.json_output_dir, "/tmp/out");
        assert_eq!(cli.sources.as_deref(), Some("/tmp/sources.yaml"));
    }

    #[test]
    fn test_cli_refresh_tiers() {
        let cli = Cli::parse_from(["newsriver", "--refresh", "high", "--once"]);
        assert!(matches!(cli.refresh, RefreshArg::High));
        assert!(cli.once);
        assert_eq!(RefreshRate::from(cli.refresh), RefreshRate::High);
    }
}

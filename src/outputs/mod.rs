//! Output generation for downstream consumers.
//!
//! # Submodules
//!
//! - [`json`]: Writes the current [`crate::models::Snapshot`] to
//!   date-partitioned JSON files
//!
//! # Output Structure
//!
//! ```text
//! json_output_dir/
//! └── 2026-08-06/
//!     └── latest.json
//! ```

pub mod json;

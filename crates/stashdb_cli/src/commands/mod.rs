//! CLI command implementations.

pub mod check;
pub mod estimate;
pub mod inspect;

use stashdb_core::{Config, Factory};
use std::path::Path;

/// Opens an existing factory directory without creating anything.
pub fn open_existing(path: &Path) -> Result<Factory, Box<dyn std::error::Error>> {
    if !path.is_dir() {
        return Err(format!("No factory found at {}", path.display()).into());
    }
    Ok(Factory::open_dir(path, Config::default().create_if_missing(false))?)
}

/// Formats a byte count for humans.
pub fn format_size(bytes: u64) -> String {
    #[allow(clippy::cast_precision_loss)]
    let value = bytes as f64;
    if bytes < 1024 {
        format!("{bytes} B")
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", value / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", value / (1024.0 * 1024.0))
    } else {
        format!("{:.1} GB", value / (1024.0 * 1024.0 * 1024.0))
    }
}

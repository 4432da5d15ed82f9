//! Estimate command implementation.

use super::{format_size, open_existing};
use stashdb_core::{StorageEstimate, StorageManager};
use std::path::Path;

/// Prints the storage estimate of the factory at `path`.
pub fn run(path: &Path, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let factory = open_existing(path)?;
    let estimate = StorageManager::for_factory(&factory).estimate()?;

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&estimate)?),
        _ => print_text_output(path, &estimate),
    }
    Ok(())
}

fn print_text_output(path: &Path, estimate: &StorageEstimate) {
    println!("StashDB Storage Estimate");
    println!("========================");
    println!();
    println!("Path:  {}", path.display());
    println!("Usage: {}", format_size(estimate.usage));
    println!("Quota: {}", format_size(estimate.quota));
    println!();
    println!("Breakdown:");
    for (source, bytes) in &estimate.breakdown {
        println!("  {source:<12} {}", format_size(*bytes));
    }
}

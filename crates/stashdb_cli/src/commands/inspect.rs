//! Inspect command implementation.

use super::{format_size, open_existing};
use serde::Serialize;
use stashdb_core::{DatabaseReport, StatsSnapshot};
use std::path::Path;

/// Factory inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Factory path.
    pub path: String,
    /// Total journal bytes.
    pub total_size: u64,
    /// Loaded databases.
    pub databases: Vec<DatabaseReport>,
    /// Counters after loading.
    pub stats: StatsSnapshot,
}

/// Runs the inspect command.
pub fn run(path: &Path, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let factory = open_existing(path)?;
    let databases = factory.inspect()?;
    let result = InspectResult {
        path: path.display().to_string(),
        total_size: databases.iter().map(|db| db.journal_bytes).sum(),
        databases,
        stats: factory.stats(),
    };

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&result)?),
        _ => print_text_output(&result),
    }
    Ok(())
}

fn print_text_output(result: &InspectResult) {
    println!("StashDB Factory Inspection");
    println!("==========================");
    println!();
    println!("Path:       {}", result.path);
    println!("Total size: {}", format_size(result.total_size));
    println!("Databases:  {}", result.databases.len());

    for db in &result.databases {
        println!();
        println!("{} (version {})", db.name, db.version);
        println!(
            "  journal: {}, last sequence {}",
            format_size(db.journal_bytes),
            db.last_sequence
        );
        for store in &db.stores {
            let key_path = store.key_path.as_deref().unwrap_or("-");
            println!(
                "  [{}] {} records, key path {key_path}, auto increment {}",
                store.name, store.records, store.auto_increment
            );
        }
    }
}

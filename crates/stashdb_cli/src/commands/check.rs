//! Check command implementation.

use stashdb_core::{Config, Factory};
use stashdb_testkit::{run_scenarios, scenarios, suite_names, ScenarioOutcome};
use std::path::Path;
use tracing::info;

/// Runs the conformance scenarios of `suite` (or all suites) and prints
/// the outcomes. Fails if any scenario failed.
pub fn run(
    suite: Option<&str>,
    path: Option<&Path>,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(suite) = suite {
        if !suite_names().iter().any(|name| *name == suite) {
            return Err(format!(
                "Unknown suite {suite:?}; expected one of: {}",
                suite_names().join(", ")
            )
            .into());
        }
    }

    let factory = match path {
        Some(path) => {
            info!(path = %path.display(), "running scenarios on a persistent factory");
            Factory::open_dir(path, Config::default())?
        }
        None => Factory::in_memory(Config::default()),
    };
    let outcomes = run_scenarios(&factory, &scenarios(suite));

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&outcomes)?),
        _ => print_text_output(&outcomes),
    }

    let failed = outcomes.iter().filter(|o| !o.passed).count();
    if failed == 0 {
        Ok(())
    } else {
        Err(format!("{failed} of {} scenarios failed", outcomes.len()).into())
    }
}

fn print_text_output(outcomes: &[ScenarioOutcome]) {
    let mut current = "";
    for outcome in outcomes {
        if outcome.suite != current {
            if !current.is_empty() {
                println!();
            }
            println!("{}", outcome.suite);
            current = outcome.suite;
        }
        let mark = if outcome.passed { "PASS" } else { "FAIL" };
        println!("  {mark}  {}", outcome.name);
        if let Some(error) = &outcome.error {
            println!("        {error}");
        }
    }
    let passed = outcomes.iter().filter(|o| o.passed).count();
    println!();
    println!("{passed}/{} passed", outcomes.len());
}

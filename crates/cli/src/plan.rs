//! `hrake plan`: enumerate the configured runs and their output status.

use std::path::PathBuf;

use hrake_engine::model::RunKey;
use hrake_engine::{Plan, RakeConfig};
use serde::Serialize;

use crate::CliError;

#[derive(clap::Args, Debug)]
pub struct PlanArgs {
    /// Only runs of this cause
    #[arg(long)]
    pub cause: Option<String>,

    /// Only runs of this scenario
    #[arg(long, allow_negative_numbers = true)]
    pub scenario: Option<i64>,

    /// Only runs of this measure
    #[arg(long)]
    pub measure: Option<String>,

    /// Include runs whose output already exists
    #[arg(long)]
    pub all: bool,

    /// Print entries as JSON to stdout
    #[arg(long)]
    pub json: bool,

    /// Print the raking stages instead of the run list
    #[arg(long, conflicts_with_all = ["json", "all"])]
    pub stages: bool,
}

#[derive(Debug, Serialize)]
pub struct PlanEntry {
    pub run: RunKey,
    pub status: &'static str,
    pub output: PathBuf,
}

/// Every configured run matching the filters, with `done` when its output exists.
pub fn plan_entries(config: &RakeConfig, args: &PlanArgs) -> Result<Vec<PlanEntry>, CliError> {
    // Unknown filter values are errors, not empty plans
    if let Some(cause) = &args.cause {
        config.cause(cause)?;
    }
    if let Some(measure) = &args.measure {
        config.measure(measure)?;
    }
    if let Some(scenario) = args.scenario {
        config.ssp(scenario)?;
    }

    let mut entries = Vec::new();
    for run in config.run_keys() {
        if args.cause.as_ref().is_some_and(|c| *c != run.cause)
            || args.scenario.is_some_and(|s| s != run.scenario)
            || args.measure.as_ref().is_some_and(|m| *m != run.measure)
        {
            continue;
        }
        let output = config.resolve(&run)?.output;
        let status = if output.exists() { "done" } else { "pending" };
        entries.push(PlanEntry { run, status, output });
    }
    Ok(entries)
}

pub fn cmd_plan(config: &RakeConfig, args: PlanArgs) -> Result<(), CliError> {
    if args.stages {
        for line in Plan::standard().describe() {
            println!("{line}");
        }
        return Ok(());
    }

    let entries = plan_entries(config, &args)?;
    let done = entries.iter().filter(|e| e.status == "done").count();
    let pending = entries.len() - done;

    let shown: Vec<&PlanEntry> = entries.iter().filter(|e| args.all || e.status == "pending").collect();

    if args.json {
        let json_str = serde_json::to_string_pretty(&shown)
            .map_err(|e| CliError::internal(format!("JSON serialization error: {e}")))?;
        println!("{json_str}");
    } else if args.all {
        for e in &shown {
            println!("{}\t{}\t{}", e.status, e.run, e.output.display());
        }
    } else {
        for e in &shown {
            println!(
                "hrake run --cause {} --scenario {} --measure {} --draw {}",
                e.run.cause, e.run.scenario, e.run.measure, e.run.draw
            );
        }
    }

    eprintln!("{} runs: {} pending, {} done", entries.len(), pending, done);
    Ok(())
}

//! `hrake run`: rake one (cause, scenario, measure, draw).

use std::path::Path;

use hrake_engine::model::{RakeMeta, RakeSummary, RunKey};
use hrake_engine::RakeConfig;
use hrake_io::{load_run_inputs, persist_table, Manifest, WriteOptions};
use serde::Serialize;
use tracing::info;

use crate::CliError;

#[derive(clap::Args, Debug)]
pub struct RunArgs {
    /// Cause name (a key of [causes])
    #[arg(long)]
    pub cause: String,

    /// Scenario id
    #[arg(long, allow_negative_numbers = true)]
    pub scenario: i64,

    /// Measure name (a key of [measures])
    #[arg(long)]
    pub measure: String,

    /// Draw index
    #[arg(long)]
    pub draw: i64,

    /// Rake and write even when the output already exists
    #[arg(long)]
    pub force: bool,

    /// Rake but do not write the output
    #[arg(long)]
    pub dry_run: bool,

    /// Print the run report as JSON to stdout
    #[arg(long)]
    pub json: bool,
}

#[derive(Serialize)]
struct RunReport<'a> {
    status: &'static str,
    run: &'a RunKey,
    output: &'a Path,
    #[serde(skip_serializing_if = "Option::is_none")]
    meta: Option<&'a RakeMeta>,
    #[serde(skip_serializing_if = "Option::is_none")]
    summary: Option<&'a RakeSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    manifest: Option<&'a Manifest>,
}

fn print_report(report: &RunReport<'_>) -> Result<(), CliError> {
    let json_str = serde_json::to_string_pretty(report)
        .map_err(|e| CliError::internal(format!("JSON serialization error: {e}")))?;
    println!("{json_str}");
    Ok(())
}

pub fn cmd_run(config: &RakeConfig, args: RunArgs) -> Result<(), CliError> {
    if args.draw < 0 {
        return Err(CliError::args(format!("--draw must be non-negative, got {}", args.draw)));
    }
    let run = RunKey::new(args.cause, args.scenario, args.measure, args.draw);
    let paths = config.resolve(&run)?;

    // Finished outputs are never recomputed unless forced
    if paths.output.exists() && !args.force && !args.dry_run {
        info!(run = %run, output = %paths.output.display(), "output exists, skipping");
        if args.json {
            print_report(&RunReport {
                status: "skipped",
                run: &run,
                output: &paths.output,
                meta: None,
                summary: None,
                manifest: None,
            })?;
        }
        eprintln!("{run}: skipped, {} exists (use --force to overwrite)", paths.output.display());
        return Ok(());
    }

    let loaded = load_run_inputs(config, &run)?;
    let result = hrake_engine::run(loaded.input)?;

    let manifest = if args.dry_run {
        None
    } else {
        let opts = WriteOptions {
            chunk_rows: config.output.chunk_rows,
            compression_level: config.output.compression_level,
        };
        Some(persist_table(&paths.output, &result.table, &run, opts)?)
    };

    if args.json {
        print_report(&RunReport {
            status: if args.dry_run { "dry-run" } else { "raked" },
            run: &run,
            output: &paths.output,
            meta: Some(&result.meta),
            summary: Some(&result.summary),
            manifest: manifest.as_ref(),
        })?;
    }

    // Human summary to stderr
    let s = &result.summary;
    eprintln!(
        "{run}: {} fine entities ({} raked, {} passed through), {} factors ({} degenerate)",
        s.fine_entities_out,
        s.with_parent_entities,
        s.without_parent_entities,
        s.factors,
        s.degenerate_factors,
    );
    if s.retired_ids_folded > 0 {
        eprintln!("  folded {} retired location ids", s.retired_ids_folded);
    }
    if s.unmatched_fine_rows > 0 {
        eprintln!("  {} fine rows had no coarse total and were left unchanged", s.unmatched_fine_rows);
    }
    eprintln!("  max conservation residual: {:.3e}", s.max_conservation_residual);

    match manifest {
        Some(m) => eprintln!("wrote {} ({} rows, {} chunks)", paths.output.display(), m.row_count, m.chunks.len()),
        None => eprintln!("dry run: {} not written", paths.output.display()),
    }
    Ok(())
}

//! `hrake inspect`: verify an output archive and summarize it.

use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;

use hrake_engine::RakeError;
use hrake_io::{read_columnar, write_table_csv};
use serde_json::json;

use crate::CliError;

pub fn cmd_inspect(file: PathBuf, json: bool, csv: bool) -> Result<(), CliError> {
    if !file.exists() {
        return Err(CliError::rake(RakeError::MissingInput { path: file }));
    }
    let reader = File::open(&file).map_err(|e| CliError::rake(RakeError::Io(format!("{}: {e}", file.display()))))?;
    let (manifest, table) = read_columnar(BufReader::new(reader))?;

    if csv {
        let stdout = std::io::stdout();
        write_table_csv(&table, stdout.lock())?;
        return Ok(());
    }

    let locations = table.location_ids().len();
    let total = table.total();

    if json {
        let out = json!({
            "file": file,
            "manifest": manifest,
            "locations": locations,
            "total": total,
            "rows": table.rows().iter().map(|r| json!({
                "location_id": r.location_id,
                "strata": r.strata.0,
                "value": r.value,
            })).collect::<Vec<_>>(),
        });
        let json_str = serde_json::to_string_pretty(&out)
            .map_err(|e| CliError::internal(format!("JSON serialization error: {e}")))?;
        println!("{json_str}");
        return Ok(());
    }

    println!("file:      {}", file.display());
    if let Some(run) = &manifest.run {
        println!("run:       {run}");
    }
    println!("format:    v{}", manifest.format_version);
    println!("dims:      location_id, {}", manifest.dims.join(", "));
    println!("rows:      {} in {} chunks of {}", manifest.row_count, manifest.chunks.len(), manifest.chunk_rows);
    println!("locations: {locations}");
    println!("total:     {total}");
    println!("written:   {} (hrake-engine {})", manifest.written_at, manifest.engine_version);
    Ok(())
}

// hrake CLI - rake fine-level predictions to authoritative coarse totals
// One `run` per (cause, scenario, measure, draw); `plan` enumerates them.

mod exit_codes;
mod inspect;
mod logging;
mod plan;
mod run;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use hrake_engine::{RakeConfig, RakeError};

use exit_codes::{rake_exit_code, EXIT_ERROR, EXIT_SUCCESS, EXIT_USAGE};

#[derive(Parser)]
#[command(name = "hrake")]
#[command(about = "Hierarchical proportional raking of admin2 predictions to admin1 totals")]
#[command(long_version = long_version())]
#[command(version)]
#[command(subcommand_required = false)]
struct Cli {
    /// Run configuration (TOML). Built-in defaults apply when omitted.
    #[arg(long, global = true, env = "HRAKE_CONFIG")]
    config: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace). RUST_LOG overrides.
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(flatten)]
    roots: RootOverrides,

    #[command(subcommand)]
    command: Option<Commands>,
}

/// Per-invocation overrides of the configured root directories.
#[derive(clap::Args, Debug, Clone, Default)]
pub struct RootOverrides {
    /// Override paths.forecast_root
    #[arg(long, global = true, value_name = "DIR")]
    forecast_root: Option<PathBuf>,

    /// Override paths.predicted_root
    #[arg(long, global = true, value_name = "DIR")]
    predicted_root: Option<PathBuf>,

    /// Override paths.hierarchy_file
    #[arg(long, global = true, value_name = "FILE")]
    hierarchy_file: Option<PathBuf>,

    /// Override paths.output_root
    #[arg(long, global = true, value_name = "DIR")]
    output_root: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Rake one (cause, scenario, measure, draw) and write its output archive
    #[command(after_help = "\
Examples:
  hrake run --cause malaria --scenario 0 --measure death --draw 0
  hrake run --cause dengue --scenario 75 --measure yll --draw 12 --json
  hrake run --cause dengue --scenario 76 --measure yld --draw 3 --dry-run
  hrake --config rake.toml run --cause malaria --scenario 76 --measure incidence --draw 99 --force")]
    Run {
        #[command(flatten)]
        args: run::RunArgs,
    },

    /// List every configured combination and which outputs are still missing
    #[command(after_help = "\
Examples:
  hrake plan
  hrake plan --cause malaria --measure death
  hrake plan --all --json
  hrake plan --stages")]
    Plan {
        #[command(flatten)]
        args: plan::PlanArgs,
    },

    /// Verify and summarize an output archive
    #[command(after_help = "\
Examples:
  hrake inspect draw_0.cols.zip
  hrake inspect draw_0.cols.zip --json
  hrake inspect draw_0.cols.zip --csv > draw_0.csv")]
    Inspect {
        /// Path to a .cols.zip archive
        file: PathBuf,

        /// Print manifest and totals as JSON to stdout
        #[arg(long, conflicts_with = "csv")]
        json: bool,

        /// Write the table as CSV to stdout
        #[arg(long)]
        csv: bool,
    },

    /// Validate the configuration without running
    #[command(after_help = "\
Examples:
  hrake validate
  hrake --config rake.toml validate
  hrake validate --print > rake.toml")]
    Validate {
        /// Print the effective configuration as TOML to stdout
        #[arg(long)]
        print: bool,
    },
}

fn long_version() -> &'static str {
    concat!(
        env!("CARGO_PKG_VERSION"),
        " (", env!("GIT_COMMIT_HASH"), ")",
        "\nengine:  hrake-engine ", env!("CARGO_PKG_VERSION"),
        "\ntarget:  ", env!("TARGET"),
        "\narchive: cols.zip v1",
    )
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init_logging(cli.verbose);

    let result = match cli.command {
        None => {
            // No subcommand = show help
            eprintln!("Usage: hrake <command> [options]");
            eprintln!("       hrake --help for more information");
            Ok(())
        }
        Some(Commands::Run { args }) => {
            load_config(cli.config.as_deref(), &cli.roots).and_then(|config| run::cmd_run(&config, args))
        }
        Some(Commands::Plan { args }) => {
            load_config(cli.config.as_deref(), &cli.roots).and_then(|config| plan::cmd_plan(&config, args))
        }
        Some(Commands::Inspect { file, json, csv }) => inspect::cmd_inspect(file, json, csv),
        Some(Commands::Validate { print }) => {
            load_config(cli.config.as_deref(), &cli.roots).and_then(|config| cmd_validate(&config, print))
        }
    };

    match result {
        Ok(()) => ExitCode::from(EXIT_SUCCESS),
        Err(CliError { code, message, hint }) => {
            if !message.is_empty() {
                eprintln!("error: {}", message);
            }
            if let Some(hint) = hint {
                eprintln!("hint:  {}", hint);
            }
            ExitCode::from(code)
        }
    }
}

#[derive(Debug)]
pub struct CliError {
    pub code: u8,
    pub message: String,
    pub hint: Option<String>,
}

impl CliError {
    pub fn args(msg: impl Into<String>) -> Self {
        Self { code: EXIT_USAGE, message: msg.into(), hint: None }
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self { code: EXIT_ERROR, message: msg.into(), hint: None }
    }

    /// Create error from a raking error with its class's exit code.
    pub fn rake(err: RakeError) -> Self {
        let code = rake_exit_code(&err);
        let hint = match &err {
            RakeError::InvalidCombination { .. } => {
                Some("`hrake validate --print` lists the configured datasets".to_string())
            }
            RakeError::UnknownCause(_) | RakeError::UnknownScenario(_) | RakeError::UnknownMeasure(_) => {
                Some("check [causes], [[scenarios]] and [measures] in the config".to_string())
            }
            RakeError::MissingInput { .. } => {
                Some("check the [paths] section or the --*-root overrides".to_string())
            }
            RakeError::DimensionMismatch { .. } => {
                Some("fine and coarse tables must share their stratifying columns".to_string())
            }
            _ => None,
        };
        Self { code, message: err.to_string(), hint }
    }

    /// Add a hint to an existing error.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}

impl From<RakeError> for CliError {
    fn from(err: RakeError) -> Self {
        Self::rake(err)
    }
}

// ============================================================================
// config
// ============================================================================

/// Load the config file (or the built-in defaults), then apply root overrides.
fn load_config(path: Option<&std::path::Path>, roots: &RootOverrides) -> Result<RakeConfig, CliError> {
    let mut config = match path {
        None => RakeConfig::default(),
        Some(path) => {
            if !path.exists() {
                return Err(CliError::rake(RakeError::MissingInput {
                    path: path.to_path_buf(),
                })
                .with_hint("pass an existing file to --config or unset HRAKE_CONFIG"));
            }
            let text = std::fs::read_to_string(path)
                .map_err(|e| CliError::rake(RakeError::Io(format!("{}: {e}", path.display()))))?;
            let mut config = RakeConfig::from_toml(&text)?;
            let base = path.parent().unwrap_or_else(|| std::path::Path::new("."));
            config.paths.rebase(base);
            config
        }
    };

    if let Some(p) = &roots.forecast_root {
        config.paths.forecast_root = p.clone();
    }
    if let Some(p) = &roots.predicted_root {
        config.paths.predicted_root = p.clone();
    }
    if let Some(p) = &roots.hierarchy_file {
        config.paths.hierarchy_file = p.clone();
    }
    if let Some(p) = &roots.output_root {
        config.paths.output_root = p.clone();
    }
    Ok(config)
}

// ============================================================================
// validate
// ============================================================================

fn cmd_validate(config: &RakeConfig, print: bool) -> Result<(), CliError> {
    config.validate()?;

    if print {
        print!("{}", config.to_toml()?);
    }

    eprintln!(
        "config ok: {} causes, {} scenarios, {} measures, {} datasets, {} runs",
        config.causes.len(),
        config.scenarios.len(),
        config.measures.len(),
        config.datasets.len(),
        config.run_keys().len(),
    );
    Ok(())
}

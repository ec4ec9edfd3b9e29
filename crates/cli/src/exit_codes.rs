//! CLI Exit Code Registry
//!
//! This is the single source of truth for all CLI exit codes.
//! Exit codes are part of the shell contract. Schedulers and retry wrappers
//! rely on them.
//!
//! # Exit Codes
//!
//! | Code | Class          | Description                                     |
//! |------|----------------|-------------------------------------------------|
//! | 0    | Universal      | Success (including "output exists, skipped")    |
//! | 1    | Universal      | General error (unspecified)                     |
//! | 2    | Universal      | CLI usage error (bad args)                      |
//! | 3    | Configuration  | Bad config, unknown cause/scenario/measure      |
//! | 4    | Missing input  | A required input file or directory is absent    |
//! | 5    | Parse          | Malformed input table                           |
//! | 6    | Data           | Dimension mismatch, merge or plan failure       |
//! | 7    | IO             | Output could not be written or read             |
//!
//! # Adding New Exit Codes
//!
//! 1. Add the constant
//! 2. Document what triggers it
//! 3. Update the table above
//! 4. Wire it into `rake_exit_code` or the relevant command

use hrake_engine::{ErrorKind, RakeError};

// =============================================================================
// Universal (0-2)
// =============================================================================

/// Success - command completed without errors.
pub const EXIT_SUCCESS: u8 = 0;

/// General error - unspecified failure.
/// Avoid using this; prefer a specific error code.
pub const EXIT_ERROR: u8 = 1;

/// Usage error - bad arguments, missing required options.
pub const EXIT_USAGE: u8 = 2;

// =============================================================================
// Raking (3-7)
// =============================================================================

/// Configuration error: invalid TOML, recursive impute map, unknown cause,
/// scenario or measure, undocumented (scenario, measure) combination.
/// Raised before any input is read.
pub const EXIT_CONFIG: u8 = 3;

/// A required input file or directory does not exist.
pub const EXIT_MISSING_INPUT: u8 = 4;

/// Input table could not be parsed (missing column, bad value, duplicate key).
pub const EXIT_PARSE: u8 = 5;

/// Tables are inconsistent (dimension mismatch, overlapping partitions).
pub const EXIT_DATA: u8 = 6;

/// Output could not be written, or an archive could not be read.
pub const EXIT_IO: u8 = 7;

/// Map a RakeError to its exit code.
pub fn rake_exit_code(err: &RakeError) -> u8 {
    match err.kind() {
        ErrorKind::Config => EXIT_CONFIG,
        ErrorKind::MissingInput => EXIT_MISSING_INPUT,
        ErrorKind::Parse => EXIT_PARSE,
        ErrorKind::Data => EXIT_DATA,
        ErrorKind::Io => EXIT_IO,
    }
}

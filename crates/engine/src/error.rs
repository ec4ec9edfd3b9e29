use std::path::PathBuf;

/// Broad failure class. The CLI maps each class to its own exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Config,
    MissingInput,
    Parse,
    Data,
    Io,
}

#[derive(Debug, thiserror::Error)]
pub enum RakeError {
    /// TOML parse / deserialization error.
    #[error("config parse error: {0}")]
    ConfigParse(String),
    /// Config validation error (recursive impute map, dangling dataset, etc.).
    #[error("config validation error: {0}")]
    ConfigValidation(String),
    #[error("unknown cause: '{0}'")]
    UnknownCause(String),
    #[error("unknown scenario: {0}")]
    UnknownScenario(i64),
    #[error("unknown measure: '{0}'")]
    UnknownMeasure(String),
    /// No dataset is registered for this (scenario, measure) pair.
    #[error("invalid scenario and measure combination: ({scenario}, {measure})")]
    InvalidCombination { scenario: i64, measure: String },
    /// A required input file or directory does not exist.
    #[error("missing input: {} does not exist", path.display())]
    MissingInput { path: PathBuf },
    /// Missing required column in an input table.
    #[error("{input}: missing column '{column}'")]
    MissingColumn { input: String, column: String },
    /// Cell that cannot be coerced to the column's type.
    #[error("{input}, line {line}: cannot parse {column} value '{value}'")]
    ValueParse {
        input: String,
        line: u64,
        column: String,
        value: String,
    },
    /// The same key combination appears twice in one table.
    #[error("{input}: duplicate key {key}")]
    DuplicateKey { input: String, key: String },
    /// Row arity does not match the table's dimension list.
    #[error("row has {found} coordinates, table has {expected} dimensions")]
    Arity { expected: usize, found: usize },
    /// Fine and coarse tables disagree on their stratifying dimensions.
    #[error("dimension mismatch: fine {fine:?} vs coarse {coarse:?}")]
    DimensionMismatch {
        fine: Vec<String>,
        coarse: Vec<String>,
    },
    #[error("merge error: {0}")]
    Merge(String),
    #[error("plan error: {0}")]
    Plan(String),
    /// IO error (file read/write, archive encoding, etc.).
    #[error("IO error: {0}")]
    Io(String),
}

impl RakeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ConfigParse(_)
            | Self::ConfigValidation(_)
            | Self::UnknownCause(_)
            | Self::UnknownScenario(_)
            | Self::UnknownMeasure(_)
            | Self::InvalidCombination { .. } => ErrorKind::Config,
            Self::MissingInput { .. } => ErrorKind::MissingInput,
            Self::MissingColumn { .. } | Self::ValueParse { .. } | Self::DuplicateKey { .. } => {
                ErrorKind::Parse
            }
            Self::Arity { .. }
            | Self::DimensionMismatch { .. }
            | Self::Merge(_)
            | Self::Plan(_) => ErrorKind::Data,
            Self::Io(_) => ErrorKind::Io,
        }
    }
}

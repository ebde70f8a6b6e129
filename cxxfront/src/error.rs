use std::path::PathBuf;

use thiserror::Error;

/// Errors surfaced to callers of the preprocessor
#[derive(Debug, Error)]
pub enum PreprocessError {
    /// The file to preprocess could not be read
    #[error("cannot read {path}: {source}")]
    Unreadable {
        /// File that failed
        path: PathBuf,
        /// Underlying I/O error
        source: std::io::Error,
    },
}

/// Errors detected while compiling a grammar
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GrammarError {
    /// A rule is referenced but never defined
    #[error("rule {0} is referenced but not defined")]
    UndefinedRule(String),
    /// A rule is defined twice
    #[error("rule {0} is defined more than once")]
    DuplicateRule(String),
    /// No root rule was set
    #[error("grammar has no root rule")]
    MissingRoot,
    /// A repetition whose body can match without consuming input
    #[error("rule {0} repeats an expression that can match empty input")]
    EmptyLoop(String),
}

/// Faults of the parsing machine. A grammar mismatch is not a fault: it is
/// reported through diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// A rule re-entered itself at the same token
    #[error("left recursion in rule {rule} at token {index}")]
    LeftRecursion {
        /// Rule name
        rule: String,
        /// Token index
        index: usize,
    },
    /// A repetition made no progress at run time
    #[error("repetition made no progress at token {0}")]
    EmptyLoop(usize),
}

/// Errors in configuration input
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A define entry without a name, such as `=1`
    #[error("malformed define '{0}'")]
    MalformedDefine(String),
    /// A configuration file could not be read
    #[error("cannot read configuration {path}: {source}")]
    Unreadable {
        /// File that failed
        path: PathBuf,
        /// Underlying I/O error
        source: std::io::Error,
    },
    /// A per-file setting was given without the file it belongs to
    #[error("unit-level '{0}' needs a file; use add_for_file")]
    UnitWithoutFile(String),
    /// Other malformed configuration content
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Failure of one file in an analysis run
#[derive(Debug, Error)]
pub enum AnalysisError {
    /// Preprocessing failed
    #[error("{0}")]
    Preprocess(#[from] PreprocessError),
    /// The parsing machine faulted
    #[error("{file}: {source}")]
    Parse {
        /// File being parsed
        file: PathBuf,
        /// Machine fault
        source: ParseError,
    },
    /// The grammar could not be compiled
    #[error("{0}")]
    Grammar(#[from] GrammarError),
    /// Configuration could not be applied
    #[error("{0}")]
    Config(#[from] ConfigError),
    /// Strict mode rejected the file
    #[error("{file}: {message}")]
    Rejected {
        /// File being parsed
        file: PathBuf,
        /// First error diagnostic
        message: String,
    },
}

#![warn(missing_docs)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

//! # C/C++ Analysis Front End
//!
//! This library turns C and C++ source files into syntax trees that static
//! analysis passes can walk. It lexes the source, runs a preprocessor with
//! layered configuration, and parses the result with a memoizing
//! backtracking machine driven by a compiled grammar.
//!
//! ## Features
//!
//! - Lexing with digraphs, raw strings and line continuations
//! - Macro expansion (object-like, function-like, variadic, `__VA_OPT__`)
//! - Conditional compilation with fail-open `#if` evaluation
//! - Include search with user, system and `#include_next` policies
//! - Target and compiler specific predefined macros
//! - A grammar combinator API compiled into flat programs
//! - Error recovery at declaration and statement boundaries
//! - Parallel batch analysis
//!
//! ## Example
//!
//! ```rust
//! use std::path::Path;
//! use cxxfront::{AnalysisOptions, CxxRule, Driver, LayeredConfig, NodeKind};
//!
//! let driver = Driver::new(LayeredConfig::new(), AnalysisOptions::default()).unwrap();
//! let unit = driver
//!     .analyze_source(Path::new("demo.c"), "#define N 4\nint f(void) { return N; }\n")
//!     .unwrap();
//! let ast = unit.ast.unwrap();
//! assert_eq!(ast.collect(NodeKind::Rule(CxxRule::FunctionDefinition)).len(), 1);
//! ```

pub mod ast;
pub mod config;
mod context;
pub mod cxx;
mod date_time;
pub mod diagnostic;
pub mod driver;
mod engine;
pub mod error;
pub mod grammar;
mod include;
pub mod lexer;
pub mod machine;
pub mod macro_def;
pub mod preprocessor;
pub mod token;

pub use ast::{Ast, AstVisitor, Node, NodeId, NodeKind, SideTable};
pub use config::{
    CompilationEntry, Compiler, ConfigLevel, LayeredConfig, PreprocessorConfig, SourceReader,
    Target, WarningHandler,
};
pub use cxx::CxxRule;
pub use date_time::BuildStamp;
pub use diagnostic::{Diagnostic, Severity};
pub use driver::{AnalysisOptions, Driver, TranslationUnit};
pub use error::{AnalysisError, ConfigError, GrammarError, ParseError, PreprocessError};
pub use lexer::Lexer;
pub use machine::{Machine, ParseOptions, ParseOutcome, ParseStats};
pub use macro_def::{Macro, MacroTable};
pub use preprocessor::{PreprocessOutput, Preprocessor};
pub use token::{Token, TokenKind};

use std::path::Path;

/// Preprocess source text with the given configuration
#[must_use]
pub fn preprocess_source<S: AsRef<str>>(
    input: S,
    config: &PreprocessorConfig,
) -> PreprocessOutput {
    let mut preprocessor = Preprocessor::new(config.clone());
    preprocessor.process_str(input.as_ref())
}

/// Read and preprocess a file
///
/// # Errors
/// Returns `PreprocessError` if the file cannot be read.
pub fn preprocess_file<P: AsRef<Path>>(
    path: P,
    config: &PreprocessorConfig,
) -> Result<PreprocessOutput, PreprocessError> {
    let mut preprocessor = Preprocessor::new(config.clone());
    preprocessor.process_path(path.as_ref())
}

/// Preprocess and parse one source text with an empty configuration
///
/// # Errors
/// Returns `AnalysisError` if the grammar fails to compile or the parsing
/// machine faults.
pub fn analyze_source<S: AsRef<str>>(
    path: &Path,
    input: S,
    options: AnalysisOptions,
) -> Result<TranslationUnit, AnalysisError> {
    Driver::new(LayeredConfig::new(), options)?.analyze_source(path, input.as_ref())
}

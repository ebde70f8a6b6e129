#![warn(missing_docs)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

//! # cxxfront CLI
//!
//! A command-line interface for the cxxfront analysis front end.

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use colored::{ColoredString, Colorize};
use cxxfront::config::{ConfigLevel, keys, predefined_macros};
use cxxfront::{
    AnalysisError, AnalysisOptions, Compiler, ConfigError, Diagnostic, Driver, LayeredConfig,
    ParseOptions, Severity, Target, TranslationUnit, WarningHandler,
};
use log::{LevelFilter, debug};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Exit codes for different error conditions
mod exit_code {
    pub const SUCCESS: i32 = 0;
    pub const GENERAL_ERROR: i32 = 1;
    pub const IO_ERROR: i32 = 2;
    pub const ANALYSIS_ERROR: i32 = 3;
    pub const ARGUMENT_ERROR: i32 = 4;
}

/// Command-line interface for the cxxfront analysis front end
#[derive(Parser)]
#[command(
    name = "cxxfront",
    version,
    author,
    about = "Preprocess and parse C/C++ sources into syntax trees",
    long_about = "cxxfront lexes, preprocesses and parses C and C++ translation units, \
                  reporting diagnostics and optionally printing token streams and syntax trees.",
    after_help = "EXAMPLES:
  # Check a few files with recovery
  $ cxxfront src/a.c src/b.cpp

  # Print the syntax tree of one file
  $ cxxfront main.cpp --ast

  # Use a JSON configuration and Windows/MSVC predefined macros
  $ cxxfront --config project.json --target windows --compiler msvc src/*.cpp

  # Read from stdin and print the preprocessed tokens
  $ cat input.c | cxxfront - --tokens

  # Fail on the first rejected file
  $ cxxfront --strict --stop-on-error src/*.c"
)]
#[command(arg_required_else_help = true)]
struct Cli {
    /// Input files (use '-' for stdin)
    #[arg(required = true, help = "Input C/C++ files to analyze (use '-' for stdin)")]
    inputs: Vec<PathBuf>,

    /// Add include directory
    #[arg(
        short = 'I',
        long = "include",
        value_name = "DIR",
        help = "Add directory to include search path"
    )]
    include_dirs: Vec<PathBuf>,

    /// Define a macro
    #[arg(
        short = 'D',
        long = "define",
        value_name = "NAME[=VALUE]",
        help = "Define a macro for every input"
    )]
    defines: Vec<String>,

    /// Layered configuration file
    #[arg(long, value_name = "FILE", help = "Load a JSON layered configuration")]
    config: Option<PathBuf>,

    /// Target operating system
    #[arg(
        short = 't',
        long,
        value_enum,
        default_value = "linux",
        help = "Target operating system"
    )]
    target: TargetValue,

    /// Compiler dialect
    #[arg(
        short = 'c',
        long,
        value_enum,
        default_value = "gcc",
        help = "Compiler dialect for predefined macros"
    )]
    compiler: CompilerValue,

    /// Maximum recursion depth for macro expansion
    #[arg(
        long,
        default_value = "128",
        help = "Maximum recursion depth for macro expansion"
    )]
    recursion_limit: usize,

    /// Print the preprocessed token stream
    #[arg(long, help = "Print the preprocessed token stream")]
    tokens: bool,

    /// Print the syntax tree
    #[arg(long, help = "Print the syntax tree")]
    ast: bool,

    /// Output in JSON format
    #[arg(long, help = "Output results in JSON format")]
    #[cfg(feature = "json")]
    json: bool,

    /// Reject files on the first parse error
    #[arg(long, help = "Disable error recovery; a parse error rejects the file")]
    strict: bool,

    /// Stop at the first failing file
    #[arg(long, help = "Abort the batch at the first failing file")]
    stop_on_error: bool,

    /// Keep tokens from included files
    #[arg(long, help = "Keep tokens coming from included files in the output")]
    emit_included: bool,

    /// Enable verbose output
    #[arg(
        short = 'v',
        long,
        help = "Enable verbose output with diagnostic information"
    )]
    verbose: bool,

    /// Suppress non-error output
    #[arg(short = 'q', long, help = "Suppress non-error output (quiet mode)")]
    quiet: bool,

    /// Disable colored output
    #[arg(long, help = "Disable colored output")]
    no_color: bool,
}

/// Target operating system values for CLI
#[derive(Clone, Debug, ValueEnum)]
enum TargetValue {
    Linux,
    Windows,
    #[clap(name = "mac-os")]
    MacOS,
}

impl From<TargetValue> for Target {
    fn from(value: TargetValue) -> Self {
        match value {
            TargetValue::Linux => Target::Linux,
            TargetValue::Windows => Target::Windows,
            TargetValue::MacOS => Target::MacOS,
        }
    }
}

/// Compiler dialect values for CLI
#[derive(Clone, Debug, ValueEnum)]
#[allow(clippy::upper_case_acronyms)]
enum CompilerValue {
    #[clap(name = "gcc")]
    GCC,
    Clang,
    #[clap(name = "msvc")]
    MSVC,
}

impl From<CompilerValue> for Compiler {
    fn from(value: CompilerValue) -> Self {
        match value {
            CompilerValue::GCC => Compiler::GCC,
            CompilerValue::Clang => Compiler::Clang,
            CompilerValue::MSVC => Compiler::MSVC,
        }
    }
}

/// Set when any file reported an error diagnostic or failed
static ERRORS_OCCURRED: AtomicBool = AtomicBool::new(false);

/// Main application entry point
fn main() {
    std::process::exit(match run() {
        Ok(()) => {
            if ERRORS_OCCURRED.load(Ordering::Relaxed) {
                exit_code::GENERAL_ERROR
            } else {
                exit_code::SUCCESS
            }
        }
        Err(e) => {
            eprintln!("{} {e:#}", "Error:".red().bold());
            determine_exit_code(&e)
        }
    });
}

/// Determine the appropriate exit code based on the error
fn determine_exit_code(error: &anyhow::Error) -> i32 {
    if error.downcast_ref::<std::io::Error>().is_some() {
        return exit_code::IO_ERROR;
    }
    if error.downcast_ref::<ConfigError>().is_some() {
        return exit_code::ARGUMENT_ERROR;
    }
    match error.downcast_ref::<AnalysisError>() {
        Some(AnalysisError::Config(_)) => exit_code::ARGUMENT_ERROR,
        Some(AnalysisError::Preprocess(_)) => exit_code::IO_ERROR,
        Some(_) => exit_code::ANALYSIS_ERROR,
        None => exit_code::GENERAL_ERROR,
    }
}

/// Run the main application logic
fn run() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli);
    setup_colors(&cli);
    validate_args(&cli)?;

    let config = create_config(&cli)?;
    let driver = Driver::new(config, analysis_options(&cli))?
        .with_warning_handler(create_warning_handler(&cli));

    let start_time = std::time::Instant::now();
    let results = if is_stdin(&cli.inputs) {
        let text = read_stdin()?;
        vec![driver.analyze_source(Path::new("<stdin>"), &text)]
    } else {
        driver.analyze_batch(&cli.inputs)?
    };
    debug!("analyzed {} files in {:?}", results.len(), start_time.elapsed());

    #[cfg(feature = "json")]
    if cli.json {
        return write_json_output(&cli, &results);
    }

    for result in &results {
        match result {
            Ok(unit) => report_unit(&cli, unit),
            Err(e) => {
                ERRORS_OCCURRED.store(true, Ordering::Relaxed);
                eprintln!("{} {e}", "error:".red().bold());
            }
        }
    }

    if cli.verbose && !cli.quiet {
        let parsed = results
            .iter()
            .filter(|r| r.as_ref().is_ok_and(TranslationUnit::is_parsed))
            .count();
        eprintln!(
            "{} {parsed}/{} files parsed in {:?}",
            "✓".green(),
            results.len(),
            start_time.elapsed()
        );
    }

    Ok(())
}

/// Initialise `env_logger`, letting `RUST_LOG` override the flags
fn init_logging(cli: &Cli) {
    let level = if cli.quiet {
        LevelFilter::Error
    } else if cli.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Warn
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .init();
}

/// Turn colors off when asked to or when stderr is not a terminal
fn setup_colors(cli: &Cli) {
    if cli.no_color || !atty::is(atty::Stream::Stderr) {
        colored::control::set_override(false);
    }
}

/// Validate command-line arguments
fn validate_args(cli: &Cli) -> Result<()> {
    if cli.recursion_limit == 0 {
        return Err(anyhow::anyhow!("Recursion limit must be greater than 0"));
    }
    if cli.inputs.len() > 1 && is_stdin(&cli.inputs) {
        return Err(anyhow::anyhow!("'-' cannot be combined with other inputs"));
    }
    Ok(())
}

/// Build the layered configuration from the config file and flags
fn create_config(cli: &Cli) -> Result<LayeredConfig> {
    let target: Target = cli.target.clone().into();
    let compiler: Compiler = cli.compiler.clone().into();

    let mut config = match &cli.config {
        Some(path) => LayeredConfig::load(path)
            .with_context(|| format!("Failed to load configuration: {}", path.display()))?,
        None => LayeredConfig::new(),
    };
    if config.get_values(ConfigLevel::PredefinedMacros, keys::DEFINES).is_empty() {
        config.set(
            ConfigLevel::PredefinedMacros,
            keys::DEFINES,
            predefined_macros(target, compiler),
        )?;
    }

    for define in &cli.defines {
        config.add(ConfigLevel::Global, keys::DEFINES, define.as_str())?;
    }
    for dir in &cli.include_dirs {
        config.add(
            ConfigLevel::Global,
            keys::INCLUDE_DIRECTORIES,
            dir.to_string_lossy().into_owned(),
        )?;
    }

    Ok(config)
}

fn analysis_options(cli: &Cli) -> AnalysisOptions {
    AnalysisOptions {
        parse: if cli.strict {
            ParseOptions::strict()
        } else {
            ParseOptions::recovering()
        },
        stop_on_error: cli.stop_on_error,
        emit_included_tokens: cli.emit_included,
        recursion_limit: cli.recursion_limit,
    }
}

/// Create a handler printing `#warning` text
fn create_warning_handler(cli: &Cli) -> WarningHandler {
    let quiet = cli.quiet;
    Arc::new(move |message: &str| {
        if !quiet {
            eprintln!("{} {message}", "#warning:".yellow());
        }
    })
}

fn is_stdin(inputs: &[PathBuf]) -> bool {
    inputs.iter().any(|p| p == Path::new("-"))
}

/// Read a single input from stdin
fn read_stdin() -> Result<String> {
    use std::io::Read;
    let mut buffer = String::new();
    std::io::stdin()
        .read_to_string(&mut buffer)
        .context("Failed to read from stdin")?;
    Ok(buffer)
}

/// Print diagnostics and the requested dumps of one unit
fn report_unit(cli: &Cli, unit: &TranslationUnit) {
    for diagnostic in &unit.diagnostics {
        if diagnostic.is_error() {
            ERRORS_OCCURRED.store(true, Ordering::Relaxed);
        } else if cli.quiet {
            continue;
        }
        eprintln!("{}", format_diagnostic(diagnostic));
    }

    if cli.quiet {
        return;
    }
    if cli.tokens {
        println!("{}", format_header("tokens", &unit.path));
        for token in &unit.tokens {
            println!("{}:{}\t{:?}\t{}", token.line, token.column, token.kind, token.value);
        }
    }
    if cli.ast {
        println!("{}", format_header("ast", &unit.path));
        match &unit.ast {
            Some(ast) => print!("{}", ast.dump()),
            None => println!("(rejected)"),
        }
    }
    if cli.verbose {
        eprintln!(
            "{}: {} tokens, {} rule invocations, {} memo hits, {} backtracks",
            unit.path.display(),
            unit.tokens.len(),
            unit.stats.rule_invocations,
            unit.stats.memo_hits,
            unit.stats.backtracks
        );
    }
}

/// Write JSON output
#[cfg(feature = "json")]
fn write_json_output(cli: &Cli, results: &[Result<TranslationUnit, AnalysisError>]) -> Result<()> {
    use serde_json::json;

    let files: Vec<serde_json::Value> = results
        .iter()
        .map(|result| match result {
            Ok(unit) => {
                if unit.has_errors() {
                    ERRORS_OCCURRED.store(true, Ordering::Relaxed);
                }
                let ast = unit.ast.as_ref().filter(|_| cli.ast).map(cxxfront::Ast::dump);
                json!({
                    "file": unit.path,
                    "parsed": unit.is_parsed(),
                    "diagnostics": unit.diagnostics,
                    "included_files": unit.included_files,
                    "stats": unit.stats,
                    "tokens": cli.tokens.then_some(&unit.tokens),
                    "ast": ast,
                })
            }
            Err(e) => {
                ERRORS_OCCURRED.store(true, Ordering::Relaxed);
                json!({ "error": e.to_string() })
            }
        })
        .collect();

    let result = json!({
        "success": !ERRORS_OCCURRED.load(Ordering::Relaxed),
        "target": format_target(&cli.target),
        "compiler": format_compiler(&cli.compiler),
        "files": files,
    });
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

/// Format a diagnostic with its severity colored
fn format_diagnostic(diagnostic: &Diagnostic) -> String {
    let location = match (&diagnostic.file, diagnostic.line) {
        (Some(file), Some(line)) => format!("{}:{line}: ", file.display()),
        (Some(file), None) => format!("{}: ", file.display()),
        _ => String::new(),
    };
    format!(
        "{}{}: {}",
        location.bold(),
        format_severity(diagnostic.severity),
        diagnostic.message
    )
}

fn format_severity(severity: Severity) -> ColoredString {
    match severity {
        Severity::Note => "note".cyan(),
        Severity::Warning => "warning".yellow(),
        Severity::Error => "error".red().bold(),
    }
}

fn format_header(what: &str, path: &Path) -> String {
    format!("== {what}: {} ==", path.display())
}

/// Format target for display
#[cfg(feature = "json")]
fn format_target(target: &TargetValue) -> String {
    match target {
        TargetValue::Linux => "Linux".to_string(),
        TargetValue::Windows => "Windows".to_string(),
        TargetValue::MacOS => "macOS".to_string(),
    }
}

/// Format compiler for display
#[cfg(feature = "json")]
fn format_compiler(compiler: &CompilerValue) -> String {
    match compiler {
        CompilerValue::GCC => "GCC".to_string(),
        CompilerValue::Clang => "Clang".to_string(),
        CompilerValue::MSVC => "MSVC".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defines_and_includes_land_in_the_global_layer() {
        let cli = Cli::parse_from([
            "cxxfront", "a.c", "-D", "X=1", "-I", "inc", "--target", "windows",
        ]);
        let config = create_config(&cli).unwrap();
        let defines = config.get_values(ConfigLevel::Global, keys::DEFINES);
        assert_eq!(defines[0], "X=1");
        assert!(defines.iter().any(|d| d == "_WIN32=1"));
        assert_eq!(
            config.get_values(ConfigLevel::Global, keys::INCLUDE_DIRECTORIES),
            vec!["inc".to_string()]
        );
    }

    #[test]
    fn strict_flag_disables_recovery() {
        let cli = Cli::parse_from(["cxxfront", "a.c", "--strict", "--stop-on-error"]);
        let options = analysis_options(&cli);
        assert!(!options.parse.recovery);
        assert!(options.stop_on_error);
    }

    #[test]
    fn stdin_cannot_mix_with_files() {
        let cli = Cli::parse_from(["cxxfront", "-", "a.c"]);
        assert!(validate_args(&cli).is_err());
    }

    #[test]
    fn config_errors_map_to_argument_exit_code() {
        let error =
            anyhow::Error::new(AnalysisError::Config(ConfigError::MalformedDefine("=1".into())));
        assert_eq!(determine_exit_code(&error), exit_code::ARGUMENT_ERROR);
    }
}

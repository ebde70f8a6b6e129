use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{debug, warn};
use rayon::prelude::*;

use crate::ast::Ast;
use crate::config::{
    ConfigLevel, LayeredConfig, PreprocessorConfig, SourceReader, WarningHandler, keys,
};
use crate::cxx::{self, CxxRule};
use crate::date_time::BuildStamp;
use crate::diagnostic::Diagnostic;
use crate::error::{AnalysisError, PreprocessError};
use crate::grammar::Program;
use crate::lexer::join_string_literals;
use crate::machine::{Machine, ParseOptions, ParseStats};
use crate::macro_def::MacroTable;
use crate::preprocessor::{Preprocessor, baseline_macros};
use crate::token::Token;

/// Knobs of one analysis run
#[derive(Clone, Copy, Debug)]
pub struct AnalysisOptions {
    /// Options passed to the parsing machine
    pub parse: ParseOptions,
    /// Abort a batch at the first failing file
    pub stop_on_error: bool,
    /// Keep tokens that come from included files
    pub emit_included_tokens: bool,
    /// Maximum nesting of macro expansion
    pub recursion_limit: usize,
}

impl Default for AnalysisOptions {
    fn default() -> Self {
        Self {
            parse: ParseOptions::recovering(),
            stop_on_error: false,
            emit_included_tokens: false,
            recursion_limit: 128,
        }
    }
}

/// Result of analyzing one source file
#[derive(Clone, Debug)]
pub struct TranslationUnit {
    /// File the unit was read from
    pub path: PathBuf,
    /// Preprocessed tokens handed to the parser
    pub tokens: Vec<Token>,
    /// Syntax tree, absent when strict parsing rejected the file
    pub ast: Option<Ast<CxxRule>>,
    /// Preprocessor and parser diagnostics in order
    pub diagnostics: Vec<Diagnostic>,
    /// Files pulled in by `#include`
    pub included_files: Vec<PathBuf>,
    /// Counters from the parsing machine
    pub stats: ParseStats,
}

impl TranslationUnit {
    /// True when a syntax tree was produced
    #[must_use]
    pub fn is_parsed(&self) -> bool {
        self.ast.is_some()
    }

    /// True when any diagnostic is an error
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.diagnostics.iter().any(Diagnostic::is_error)
    }

    /// First error diagnostic, if any
    #[must_use]
    pub fn first_error(&self) -> Option<&Diagnostic> {
        self.diagnostics.iter().find(|d| d.is_error())
    }
}

/// Runs the preprocess and parse pipeline over source files
///
/// The configuration, compiled grammar and baseline macro table are shared
/// read-only between files; every file gets its own preprocessor and machine,
/// so a batch can run on the rayon pool.
pub struct Driver {
    config: LayeredConfig,
    program: Arc<Program<CxxRule>>,
    baseline: MacroTable,
    options: AnalysisOptions,
    reader: Option<SourceReader>,
    warning_handler: Option<WarningHandler>,
    stamp: Option<BuildStamp>,
}

impl Driver {
    /// Compile the C/C++ grammar and resolve the global macro baseline
    ///
    /// # Errors
    /// Returns `AnalysisError::Grammar` if the grammar does not compile and
    /// `AnalysisError::Config` for a malformed global define.
    pub fn new(config: LayeredConfig, options: AnalysisOptions) -> Result<Self, AnalysisError> {
        let program = cxx::compile_grammar()?;
        Self::with_program(config, options, Arc::new(program))
    }

    /// Build a driver around an already compiled grammar
    ///
    /// # Errors
    /// Returns `AnalysisError::Config` for a malformed global define.
    pub fn with_program(
        config: LayeredConfig,
        options: AnalysisOptions,
        program: Arc<Program<CxxRule>>,
    ) -> Result<Self, AnalysisError> {
        let baseline = baseline_macros(&config.get_values(ConfigLevel::Global, keys::DEFINES))?;
        debug!("driver ready with {} baseline macros", baseline.len());
        Ok(Self {
            config,
            program,
            baseline,
            options,
            reader: None,
            warning_handler: None,
            stamp: None,
        })
    }

    /// Read sources and headers through `reader` instead of the file system
    #[must_use]
    pub fn with_reader(mut self, reader: SourceReader) -> Self {
        self.reader = Some(reader);
        self
    }

    /// Forward `#warning` text to `handler`
    #[must_use]
    pub fn with_warning_handler(mut self, handler: WarningHandler) -> Self {
        self.warning_handler = Some(handler);
        self
    }

    /// Fix `__DATE__` and `__TIME__` for every file
    #[must_use]
    pub fn with_build_stamp(mut self, stamp: BuildStamp) -> Self {
        self.stamp = Some(stamp);
        self
    }

    /// Configuration the driver was built with
    #[must_use]
    pub fn config(&self) -> &LayeredConfig {
        &self.config
    }

    /// Compiled grammar shared by every file
    #[must_use]
    pub fn program(&self) -> &Program<CxxRule> {
        &self.program
    }

    /// Options of this run
    #[must_use]
    pub fn options(&self) -> &AnalysisOptions {
        &self.options
    }

    /// Preprocess and parse `text` as the contents of `path`
    ///
    /// Grammar mismatches end up in the unit's diagnostics. In strict mode a
    /// rejected file yields a unit without a tree.
    ///
    /// # Errors
    /// Returns `AnalysisError::Config` for a malformed unit define and
    /// `AnalysisError::Parse` when the machine faults.
    pub fn analyze_source(
        &self,
        path: &Path,
        text: &str,
    ) -> Result<TranslationUnit, AnalysisError> {
        let config = self.preprocessor_config(path);
        let mut preprocessor = Preprocessor::for_unit(config, &self.baseline)?;
        if let Some(stamp) = self.stamp {
            preprocessor.set_build_stamp(stamp);
        }
        let output = preprocessor.process_file(path, text);
        let tokens = join_string_literals(output.tokens);
        debug!("{}: {} tokens after preprocessing", path.display(), tokens.len());

        let outcome = Machine::parse(&self.program, &tokens, &self.options.parse).map_err(
            |source| AnalysisError::Parse {
                file: path.to_path_buf(),
                source,
            },
        )?;
        if outcome.ast.is_none() {
            warn!("{}: rejected by the parser", path.display());
        }

        let diagnostics = output
            .diagnostics
            .into_iter()
            .chain(outcome.diagnostics)
            .map(|d| if d.file.is_some() { d } else { d.in_file(path) })
            .collect();
        Ok(TranslationUnit {
            path: path.to_path_buf(),
            tokens,
            ast: outcome.ast,
            diagnostics,
            included_files: output.included_files,
            stats: outcome.stats,
        })
    }

    /// Read and analyze one file
    ///
    /// # Errors
    /// Returns `AnalysisError::Preprocess` if the file cannot be read, plus
    /// everything `analyze_source` returns.
    pub fn analyze_file(&self, path: &Path) -> Result<TranslationUnit, AnalysisError> {
        let text = self.read_source(path)?;
        self.analyze_source(path, &text)
    }

    /// Analyze files in parallel, one result per path in input order
    ///
    /// With `stop_on_error` the batch fails with the first error instead, and
    /// a file the strict parser rejected counts as an error.
    ///
    /// # Errors
    /// Only with `stop_on_error`: the first file failure.
    pub fn analyze_batch(
        &self,
        paths: &[PathBuf],
    ) -> Result<Vec<Result<TranslationUnit, AnalysisError>>, AnalysisError> {
        if !self.options.stop_on_error {
            return Ok(paths.par_iter().map(|path| self.analyze_file(path)).collect());
        }
        let units: Vec<TranslationUnit> = paths
            .par_iter()
            .map(|path| self.analyze_file(path).and_then(reject_unparsed))
            .collect::<Result<_, _>>()?;
        Ok(units.into_iter().map(Ok).collect())
    }

    fn preprocessor_config(&self, path: &Path) -> PreprocessorConfig {
        let mut config = PreprocessorConfig::for_file(&self.config, path);
        config.recursion_limit = self.options.recursion_limit;
        config.emit_included_tokens = self.options.emit_included_tokens;
        if let Some(reader) = &self.reader {
            config.reader = Arc::clone(reader);
        }
        config.warning_handler.clone_from(&self.warning_handler);
        config
    }

    fn read_source(&self, path: &Path) -> Result<String, PreprocessError> {
        match &self.reader {
            Some(reader) => reader(path).ok_or_else(|| PreprocessError::Unreadable {
                path: path.to_path_buf(),
                source: io::Error::new(io::ErrorKind::NotFound, "no such source"),
            }),
            None => std::fs::read_to_string(path).map_err(|source| PreprocessError::Unreadable {
                path: path.to_path_buf(),
                source,
            }),
        }
    }
}

fn reject_unparsed(unit: TranslationUnit) -> Result<TranslationUnit, AnalysisError> {
    if unit.is_parsed() {
        return Ok(unit);
    }
    let message = unit
        .first_error()
        .map_or_else(|| "rejected by the parser".to_string(), |d| d.message.clone());
    Err(AnalysisError::Rejected { file: unit.path, message })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::NodeKind;
    use rustc_hash::FxHashMap;

    fn memory_reader(files: &[(&str, &str)]) -> SourceReader {
        let files: FxHashMap<PathBuf, String> = files
            .iter()
            .map(|(path, text)| (PathBuf::from(path), (*text).to_string()))
            .collect();
        Arc::new(move |path: &Path| files.get(path).cloned())
    }

    fn driver(options: AnalysisOptions) -> Driver {
        Driver::new(LayeredConfig::new(), options).unwrap()
    }

    #[test]
    fn pipeline_preprocesses_then_parses() {
        let _ = env_logger::builder().is_test(true).try_init();
        let driver = driver(AnalysisOptions::default());
        let unit = driver
            .analyze_source(Path::new("a.c"), "#define N 3\nint v[N];\nint f(void) { return N; }\n")
            .unwrap();
        let ast = unit.ast.as_ref().unwrap();
        assert_eq!(ast.collect(NodeKind::Rule(CxxRule::FunctionDefinition)).len(), 1);
        assert!(unit.tokens.iter().any(|t| t.value == "3" && t.generated));
        assert!(unit.diagnostics.is_empty());
    }

    #[test]
    fn diagnostics_carry_the_file_name() {
        let driver = driver(AnalysisOptions::default());
        let unit = driver.analyze_source(Path::new("b.c"), "int a;\nint b = ;\n").unwrap();
        assert!(unit.is_parsed());
        assert_eq!(unit.diagnostics.len(), 1);
        assert_eq!(unit.diagnostics[0].file.as_deref(), Some(Path::new("b.c")));
        assert_eq!(unit.diagnostics[0].line, Some(2));
    }

    #[test]
    fn strict_mode_rejects_without_tree() {
        let options = AnalysisOptions {
            parse: ParseOptions::strict(),
            ..AnalysisOptions::default()
        };
        let unit = driver(options).analyze_source(Path::new("c.c"), "int x = ;\n").unwrap();
        assert!(!unit.is_parsed());
        assert!(unit.has_errors());
        assert_eq!(
            unit.first_error().map(|d| d.message.as_str()),
            Some("Parse error at line 1: unexpected ';'")
        );
    }

    #[test]
    fn unit_defines_come_from_the_config() {
        let mut config = LayeredConfig::new();
        config.add_for_file("u.c", keys::DEFINES, "WIDTH=8");
        config.add(ConfigLevel::Global, keys::DEFINES, "GLOBAL").unwrap();
        let driver = Driver::new(config, AnalysisOptions::default()).unwrap();
        let unit = driver
            .analyze_source(Path::new("u.c"), "#ifdef GLOBAL\nint w = WIDTH;\n#endif\n")
            .unwrap();
        assert!(unit.tokens.iter().any(|t| t.value == "8"));
    }

    #[test]
    fn unit_define_beats_every_shared_level() {
        let mut config = LayeredConfig::new();
        config.add(ConfigLevel::PredefinedMacros, keys::DEFINES, "X=3").unwrap();
        config.add(ConfigLevel::ProjectProperties, keys::DEFINES, "X=2").unwrap();
        config.add(ConfigLevel::Global, keys::DEFINES, "X=1").unwrap();
        config.add_for_file("u.c", keys::DEFINES, "X=0");
        let driver = Driver::new(config, AnalysisOptions::default()).unwrap();

        let value = |path: &str| {
            let unit = driver.analyze_source(Path::new(path), "int v = X;\n").unwrap();
            assert!(unit.diagnostics.is_empty(), "{:?}", unit.diagnostics);
            unit.tokens[3].value.clone()
        };
        assert_eq!(value("u.c"), "0");
        assert_eq!(value("other.c"), "1");
    }

    #[test]
    fn malformed_global_define_is_a_config_error() {
        let mut config = LayeredConfig::new();
        config.add(ConfigLevel::Global, keys::DEFINES, "=1").unwrap();
        assert!(matches!(
            Driver::new(config, AnalysisOptions::default()),
            Err(AnalysisError::Config(_))
        ));
    }

    #[test]
    fn batch_isolates_failing_files() {
        let reader = memory_reader(&[("good.c", "int g;\n"), ("other.c", "void h(void) {}\n")]);
        let driver = driver(AnalysisOptions::default()).with_reader(reader);
        let paths = vec![
            PathBuf::from("good.c"),
            PathBuf::from("missing.c"),
            PathBuf::from("other.c"),
        ];
        let results = driver.analyze_batch(&paths).unwrap();
        assert_eq!(results.len(), 3);
        assert!(results[0].as_ref().is_ok_and(TranslationUnit::is_parsed));
        assert!(matches!(results[1], Err(AnalysisError::Preprocess(_))));
        assert!(results[2].as_ref().is_ok_and(TranslationUnit::is_parsed));
    }

    #[test]
    fn stop_on_error_fails_the_batch() {
        let reader = memory_reader(&[("good.c", "int g;\n"), ("bad.c", "int = ;\n")]);
        let options = AnalysisOptions {
            parse: ParseOptions::strict(),
            stop_on_error: true,
            ..AnalysisOptions::default()
        };
        let driver = driver(options).with_reader(reader);
        let paths = vec![PathBuf::from("good.c"), PathBuf::from("bad.c")];
        match driver.analyze_batch(&paths) {
            Err(AnalysisError::Rejected { file, message }) => {
                assert_eq!(file, PathBuf::from("bad.c"));
                assert!(message.starts_with("Parse error at line 1"));
            }
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[test]
    fn includes_resolve_through_the_reader() {
        let reader = memory_reader(&[
            ("main.c", "#include \"defs.h\"\nint x = LIMIT;\n"),
            ("defs.h", "#define LIMIT 10\n"),
        ]);
        let driver = driver(AnalysisOptions::default()).with_reader(reader);
        let unit = driver.analyze_file(Path::new("main.c")).unwrap();
        assert!(unit.is_parsed());
        assert!(unit.tokens.iter().any(|t| t.value == "10"));
        assert_eq!(unit.included_files, vec![PathBuf::from("defs.h")]);
    }
}

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::token::{is_identifier_continue, is_identifier_start};

/// Reads the content of a candidate file during include search
pub type SourceReader = Arc<dyn Fn(&Path) -> Option<String> + Send + Sync>;

/// Type alias for warning handler function
pub type WarningHandler = Arc<dyn Fn(&str) + Send + Sync>;

/// Reader backed by the file system
#[must_use]
pub fn fs_reader() -> SourceReader {
    Arc::new(|path: &Path| {
        if path.is_file() {
            std::fs::read_to_string(path).ok()
        } else {
            None
        }
    })
}

/// Configuration keys understood by the front end
pub mod keys {
    /// Macro definitions, `NAME`, `NAME=VALUE`, `NAME VALUE` or `NAME(a)=body`
    pub const DEFINES: &str = "defines";
    /// Include search directories
    pub const INCLUDE_DIRECTORIES: &str = "include_directories";
    /// Files included before the unit itself
    pub const FORCE_INCLUDES: &str = "force_includes";
}

/// Scope of a configuration entry, from least to most specific
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ConfigLevel {
    /// Built-in baseline macros
    PredefinedMacros,
    /// Project properties
    ProjectProperties,
    /// Settings shared by all units
    Global,
    /// Per-file settings
    Units,
}

impl ConfigLevel {
    /// This level followed by every less specific one
    pub fn outward(self) -> impl Iterator<Item = ConfigLevel> {
        [
            ConfigLevel::Units,
            ConfigLevel::Global,
            ConfigLevel::ProjectProperties,
            ConfigLevel::PredefinedMacros,
        ]
        .into_iter()
        .filter(move |level| *level <= self)
    }
}

type Layer = BTreeMap<String, Vec<String>>;

/// One entry of a compilation database, already parsed by its producer
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompilationEntry {
    /// Source file the entry describes
    pub file: PathBuf,
    /// Macro definitions
    #[serde(default)]
    pub defines: Vec<String>,
    /// Include directories, relative ones resolved against `working_directory`
    #[serde(default)]
    pub includes: Vec<PathBuf>,
    /// Directory the compiler ran in
    #[serde(default)]
    pub working_directory: Option<PathBuf>,
}

/// Settings organised in levels of increasing precedence:
/// `Units > Global > ProjectProperties > PredefinedMacros`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayeredConfig {
    #[serde(default)]
    predefined_macros: Layer,
    #[serde(default)]
    project_properties: Layer,
    #[serde(default)]
    global: Layer,
    #[serde(default)]
    units: BTreeMap<PathBuf, Layer>,
}

impl LayeredConfig {
    /// Empty configuration
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Configuration seeded with the predefined macros of a target and compiler
    #[must_use]
    pub fn with_predefined(target: Target, compiler: Compiler) -> Self {
        let mut config = Self::new();
        config
            .predefined_macros
            .insert(keys::DEFINES.to_string(), predefined_macros(target, compiler));
        config
    }

    /// Parse a JSON configuration
    ///
    /// # Errors
    /// Returns `ConfigError::Invalid` if the text is not a valid configuration.
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(text).map_err(|e| ConfigError::Invalid(e.to_string()))
    }

    /// Read a JSON configuration file
    ///
    /// # Errors
    /// Returns `ConfigError` if the file is unreadable or not valid JSON.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Unreadable {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&text)
    }

    fn layer(&self, level: ConfigLevel) -> Option<&Layer> {
        match level {
            ConfigLevel::PredefinedMacros => Some(&self.predefined_macros),
            ConfigLevel::ProjectProperties => Some(&self.project_properties),
            ConfigLevel::Global => Some(&self.global),
            ConfigLevel::Units => None,
        }
    }

    fn layer_mut(&mut self, level: ConfigLevel, key: &str) -> Result<&mut Layer, ConfigError> {
        match level {
            ConfigLevel::PredefinedMacros => Ok(&mut self.predefined_macros),
            ConfigLevel::ProjectProperties => Ok(&mut self.project_properties),
            ConfigLevel::Global => Ok(&mut self.global),
            ConfigLevel::Units => Err(ConfigError::UnitWithoutFile(key.to_string())),
        }
    }

    /// Append a value at a shared level. Unit-level values need a file; use
    /// [`LayeredConfig::add_for_file`].
    ///
    /// # Errors
    /// Returns `ConfigError::UnitWithoutFile` for `ConfigLevel::Units`.
    pub fn add(
        &mut self,
        level: ConfigLevel,
        key: &str,
        value: impl Into<String>,
    ) -> Result<(), ConfigError> {
        self.layer_mut(level, key)?
            .entry(key.to_string())
            .or_default()
            .push(value.into());
        Ok(())
    }

    /// Replace all values of a key at a shared level
    ///
    /// # Errors
    /// Returns `ConfigError::UnitWithoutFile` for `ConfigLevel::Units`.
    pub fn set(
        &mut self,
        level: ConfigLevel,
        key: &str,
        values: Vec<String>,
    ) -> Result<(), ConfigError> {
        self.layer_mut(level, key)?.insert(key.to_string(), values);
        Ok(())
    }

    /// Append a value for one file
    pub fn add_for_file(&mut self, file: impl Into<PathBuf>, key: &str, value: impl Into<String>) {
        self.units
            .entry(file.into())
            .or_default()
            .entry(key.to_string())
            .or_default()
            .push(value.into());
    }

    /// Register a compilation-database entry at the `Units` level
    pub fn add_unit(&mut self, entry: CompilationEntry) {
        let file = entry.file.clone();
        for define in entry.defines {
            self.add_for_file(file.clone(), keys::DEFINES, define);
        }
        for include in entry.includes {
            let dir = match &entry.working_directory {
                Some(cwd) if include.is_relative() => cwd.join(include),
                _ => include,
            };
            self.add_for_file(file.clone(), keys::INCLUDE_DIRECTORIES, dir.to_string_lossy());
        }
    }

    /// First value of `key`, searching `level` and then the less specific levels
    #[must_use]
    pub fn get(&self, level: ConfigLevel, key: &str) -> Option<&str> {
        level
            .outward()
            .filter_map(|l| self.layer(l))
            .find_map(|layer| layer.get(key).and_then(|v| v.first()))
            .map(String::as_str)
    }

    /// All values of `key` at `level` and every less specific level, most
    /// specific first
    #[must_use]
    pub fn get_values(&self, level: ConfigLevel, key: &str) -> Vec<String> {
        level
            .outward()
            .filter_map(|l| self.layer(l))
            .filter_map(|layer| layer.get(key))
            .flatten()
            .cloned()
            .collect()
    }

    /// Like [`LayeredConfig::get`], starting at the file's unit entry
    #[must_use]
    pub fn get_for_file(&self, file: &Path, key: &str) -> Option<&str> {
        self.unit_values(file, key)
            .and_then(|v| v.first())
            .map(String::as_str)
            .or_else(|| self.get(ConfigLevel::Global, key))
    }

    /// Like [`LayeredConfig::get_values`], starting at the file's unit entry
    #[must_use]
    pub fn values_for_file(&self, file: &Path, key: &str) -> Vec<String> {
        let mut values: Vec<String> = self
            .unit_values(file, key)
            .map(|v| v.to_vec())
            .unwrap_or_default();
        values.extend(self.get_values(ConfigLevel::Global, key));
        values
    }

    /// Values stored for exactly this file
    #[must_use]
    pub fn unit_values(&self, file: &Path, key: &str) -> Option<&[String]> {
        self.units
            .get(file)
            .and_then(|layer| layer.get(key))
            .map(Vec::as_slice)
    }
}

/// Turn a define entry into the text of a `#define` directive body.
///
/// # Errors
/// Returns `ConfigError::MalformedDefine` when the entry does not start with
/// a macro name.
pub fn define_directive_body(entry: &str) -> Result<String, ConfigError> {
    let entry = entry.trim();
    let name_len = entry
        .char_indices()
        .take_while(|&(i, c)| {
            if i == 0 {
                is_identifier_start(c)
            } else {
                is_identifier_continue(c)
            }
        })
        .count();
    if name_len == 0 {
        return Err(ConfigError::MalformedDefine(entry.to_string()));
    }

    let rest = &entry[name_len..];
    let head_len = if rest.starts_with('(') {
        match rest.find(')') {
            Some(close) => name_len + close + 1,
            None => return Err(ConfigError::MalformedDefine(entry.to_string())),
        }
    } else {
        name_len
    };

    let (head, tail) = entry.split_at(head_len);
    if let Some(value) = tail.strip_prefix('=') {
        Ok(format!("{head} {value}"))
    } else if tail.is_empty() {
        Ok(format!("{head} 1"))
    } else if tail.starts_with(char::is_whitespace) {
        Ok(entry.to_string())
    } else {
        Err(ConfigError::MalformedDefine(entry.to_string()))
    }
}

/// Target operating system for predefined macros
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Target {
    /// Linux operating system
    Linux,
    /// Windows operating system
    Windows,
    /// macOS operating system
    MacOS,
}

/// Compiler dialect for predefined macros
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Compiler {
    /// GNU Compiler Collection
    GCC,
    /// LLVM Clang compiler
    Clang,
    /// Microsoft Visual C++ compiler
    MSVC,
}

/// Baseline definitions for a target and compiler, as define entries
#[must_use]
pub fn predefined_macros(target: Target, compiler: Compiler) -> Vec<String> {
    let mut defines: Vec<&str> = vec![
        "__cplusplus=201703L",
        "__STDC__=1",
        "__STDC_VERSION__=201112L",
        "__STDC_HOSTED__=1",
        "__SIZEOF_INT__=4",
        "__SIZEOF_LONG_LONG__=8",
        "__SIZEOF_POINTER__=8",
    ];

    match target {
        Target::Linux => defines.extend([
            "__linux__=1",
            "__unix__=1",
            "__LP64__=1",
            "__SIZEOF_LONG__=8",
        ]),
        Target::Windows => defines.extend([
            "_WIN32=1",
            "WIN32=1",
            "_WINDOWS=1",
            "__SIZEOF_LONG__=4",
        ]),
        Target::MacOS => defines.extend([
            "__APPLE__=1",
            "__MACH__=1",
            "TARGET_OS_MAC=1",
            "__LP64__=1",
            "__SIZEOF_LONG__=8",
        ]),
    }

    match compiler {
        // GCC 11.2.0
        Compiler::GCC => defines.extend([
            "__GNUC__=11",
            "__GNUC_MINOR__=2",
            "__GNUC_PATCHLEVEL__=0",
        ]),
        // Clang 14.0.0
        Compiler::Clang => defines.extend([
            "__clang__=1",
            "__clang_major__=14",
            "__clang_minor__=0",
            "__clang_patchlevel__=0",
        ]),
        // MSVC 19.20 (Visual Studio 2019)
        Compiler::MSVC => defines.extend(["_MSC_VER=1920", "_MSC_FULL_VER=192027508"]),
    }

    defines.into_iter().map(str::to_string).collect()
}

/// Preprocessor settings resolved for one file
#[derive(Clone)]
pub struct PreprocessorConfig {
    /// Unit-level defines, applied on top of the baseline table
    pub unit_defines: Vec<String>,
    /// Include directories in search order
    pub include_dirs: Vec<PathBuf>,
    /// Files processed before the unit
    pub force_includes: Vec<PathBuf>,
    /// Maximum recursion depth for macro expansion
    pub recursion_limit: usize,
    /// Maximum nesting of `#include`
    pub include_depth_limit: usize,
    /// Emit tokens of included files (flagged as generated)
    pub emit_included_tokens: bool,
    /// File access used by include search
    pub reader: SourceReader,
    /// Optional warning handler for #warning directives
    pub warning_handler: Option<WarningHandler>,
}

impl Default for PreprocessorConfig {
    fn default() -> Self {
        Self {
            unit_defines: Vec::new(),
            include_dirs: Vec::new(),
            force_includes: Vec::new(),
            recursion_limit: 128,
            include_depth_limit: 200,
            emit_included_tokens: false,
            reader: fs_reader(),
            warning_handler: None,
        }
    }
}

impl PreprocessorConfig {
    /// Resolve the settings that apply to `file`
    #[must_use]
    pub fn for_file(config: &LayeredConfig, file: &Path) -> Self {
        let unit_defines = config
            .unit_values(file, keys::DEFINES)
            .map(|v| v.to_vec())
            .unwrap_or_default();
        let include_dirs = config
            .values_for_file(file, keys::INCLUDE_DIRECTORIES)
            .into_iter()
            .map(PathBuf::from)
            .collect();
        let force_includes = config
            .values_for_file(file, keys::FORCE_INCLUDES)
            .into_iter()
            .map(PathBuf::from)
            .collect();
        Self {
            unit_defines,
            include_dirs,
            force_includes,
            ..Self::default()
        }
    }

    /// Replace the file reader
    #[must_use]
    pub fn with_reader(mut self, reader: SourceReader) -> Self {
        self.reader = reader;
        self
    }

    /// Set a warning handler for #warning directives
    #[must_use]
    pub fn with_warning_handler(mut self, handler: WarningHandler) -> Self {
        self.warning_handler = Some(handler);
        self
    }

    /// Add an include directory at the end of the search order
    #[must_use]
    pub fn with_include_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.include_dirs.push(dir.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layered() -> LayeredConfig {
        let mut config = LayeredConfig::new();
        config.add(ConfigLevel::PredefinedMacros, keys::DEFINES, "X=3").unwrap();
        config.add(ConfigLevel::ProjectProperties, keys::DEFINES, "X=2").unwrap();
        config.add(ConfigLevel::Global, keys::DEFINES, "X=1").unwrap();
        config.add_for_file("u.c", keys::DEFINES, "X=0");
        config
    }

    #[test]
    fn get_starts_at_the_requested_level() {
        let config = layered();
        assert_eq!(config.get(ConfigLevel::Units, keys::DEFINES), Some("X=1"));
        assert_eq!(config.get(ConfigLevel::Global, keys::DEFINES), Some("X=1"));
        assert_eq!(config.get(ConfigLevel::ProjectProperties, keys::DEFINES), Some("X=2"));
        assert_eq!(config.get(ConfigLevel::PredefinedMacros, keys::DEFINES), Some("X=3"));
        assert_eq!(config.get(ConfigLevel::Global, keys::FORCE_INCLUDES), None);
    }

    #[test]
    fn values_are_most_specific_first() {
        let config = layered();
        assert_eq!(
            config.get_values(ConfigLevel::Global, keys::DEFINES),
            ["X=1", "X=2", "X=3"]
        );
        assert_eq!(
            config.get_values(ConfigLevel::ProjectProperties, keys::DEFINES),
            ["X=2", "X=3"]
        );
        assert_eq!(
            config.values_for_file(Path::new("u.c"), keys::DEFINES),
            ["X=0", "X=1", "X=2", "X=3"]
        );
        assert_eq!(config.get_for_file(Path::new("u.c"), keys::DEFINES), Some("X=0"));
        assert_eq!(config.get_for_file(Path::new("other.c"), keys::DEFINES), Some("X=1"));
        assert_eq!(config.unit_values(Path::new("other.c"), keys::DEFINES), None);
    }

    #[test]
    fn unit_level_needs_a_file() {
        let mut config = layered();
        assert!(matches!(
            config.add(ConfigLevel::Units, keys::DEFINES, "ONLY_UNIT"),
            Err(ConfigError::UnitWithoutFile(_))
        ));
        assert!(matches!(
            config.set(ConfigLevel::Units, keys::DEFINES, Vec::new()),
            Err(ConfigError::UnitWithoutFile(_))
        ));
        assert_eq!(
            config.get_values(ConfigLevel::Global, keys::DEFINES),
            ["X=1", "X=2", "X=3"]
        );
    }

    #[test]
    fn set_replaces_one_level_only() {
        let mut config = layered();
        config
            .set(ConfigLevel::Global, keys::DEFINES, vec!["Y".to_string()])
            .unwrap();
        assert_eq!(
            config.get_values(ConfigLevel::Global, keys::DEFINES),
            ["Y", "X=2", "X=3"]
        );
    }

    #[test]
    fn unit_includes_resolve_against_working_directory() {
        let mut config = LayeredConfig::new();
        config.add_unit(CompilationEntry {
            file: PathBuf::from("src/a.c"),
            defines: vec!["DEBUG".to_string()],
            includes: vec![PathBuf::from("inc"), PathBuf::from("/opt/include")],
            working_directory: Some(PathBuf::from("/build")),
        });
        let file = Path::new("src/a.c");
        assert_eq!(config.unit_values(file, keys::DEFINES), Some(&["DEBUG".to_string()][..]));
        assert_eq!(
            config.values_for_file(file, keys::INCLUDE_DIRECTORIES),
            ["/build/inc", "/opt/include"]
        );

        let resolved = PreprocessorConfig::for_file(&config, file);
        assert_eq!(resolved.unit_defines, ["DEBUG"]);
        assert_eq!(
            resolved.include_dirs,
            [PathBuf::from("/build/inc"), PathBuf::from("/opt/include")]
        );
    }

    #[test]
    fn json_layers_and_errors() {
        let config = LayeredConfig::from_json(
            r#"{
                "project_properties": { "defines": ["P"] },
                "units": { "a.c": { "defines": ["U"] } }
            }"#,
        )
        .unwrap();
        assert_eq!(config.get(ConfigLevel::Global, keys::DEFINES), Some("P"));
        assert_eq!(config.get_for_file(Path::new("a.c"), keys::DEFINES), Some("U"));

        assert!(matches!(LayeredConfig::from_json("{ not json"), Err(ConfigError::Invalid(_))));
        assert!(matches!(
            LayeredConfig::from_json(r#"{ "global": { "defines": "X" } }"#),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            LayeredConfig::load(Path::new("no/such/config.json")),
            Err(ConfigError::Unreadable { .. })
        ));
    }

    #[test]
    fn presets_seed_the_predefined_level() {
        let config = LayeredConfig::with_predefined(Target::Windows, Compiler::MSVC);
        let defines = config.get_values(ConfigLevel::PredefinedMacros, keys::DEFINES);
        assert!(defines.iter().any(|d| d == "_WIN32=1"));
        assert!(!defines.iter().any(|d| d == "__linux__=1"));
        assert!(config.get_values(ConfigLevel::Global, keys::INCLUDE_DIRECTORIES).is_empty());
    }
}

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// How serious a diagnostic is
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Severity {
    /// Informational, e.g. `#warning`
    Note,
    /// Recovered locally
    Warning,
    /// Parse or directive error
    Error,
}

/// A message about a file, with an optional line
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    /// Severity
    pub severity: Severity,
    /// File the diagnostic is about
    pub file: Option<PathBuf>,
    /// 1-based line
    pub line: Option<usize>,
    /// Human readable text
    pub message: String,
}

impl Diagnostic {
    /// Create an error
    #[must_use]
    pub fn error(line: Option<usize>, message: impl Into<String>) -> Self {
        Self::new(Severity::Error, line, message)
    }

    /// Create a warning
    #[must_use]
    pub fn warning(line: Option<usize>, message: impl Into<String>) -> Self {
        Self::new(Severity::Warning, line, message)
    }

    /// Create a note
    #[must_use]
    pub fn note(line: Option<usize>, message: impl Into<String>) -> Self {
        Self::new(Severity::Note, line, message)
    }

    fn new(severity: Severity, line: Option<usize>, message: impl Into<String>) -> Self {
        Self {
            severity,
            file: None,
            line,
            message: message.into(),
        }
    }

    /// Attach the file
    #[must_use]
    pub fn in_file(mut self, file: impl Into<PathBuf>) -> Self {
        self.file = Some(file.into());
        self
    }

    /// Check for error severity
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(file) = &self.file {
            write!(f, "{}:", file.display())?;
            if let Some(line) = self.line {
                write!(f, "{line}:")?;
            }
            f.write_str(" ")?;
        }
        let severity = match self.severity {
            Severity::Note => "note",
            Severity::Warning => "warning",
            Severity::Error => "error",
        };
        write!(f, "{severity}: {}", self.message)
    }
}

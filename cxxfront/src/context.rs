use std::path::{Path, PathBuf};

use rustc_hash::FxHashSet;

use crate::date_time::BuildStamp;
use crate::diagnostic::Diagnostic;
use crate::macro_def::MacroTable;

/// State of one `#if` ... `#endif` chain
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConditionalFrame {
    /// Whether the current branch is taken
    pub taken: bool,
    /// Whether some branch of the chain has been taken already
    pub any_taken: bool,
    /// Whether every enclosing frame is active
    pub parent_active: bool,
    /// `#else` was seen
    pub seen_else: bool,
    /// Line of the opening directive
    pub line: usize,
}

impl ConditionalFrame {
    /// Frame for an `#if`/`#ifdef`/`#ifndef` whose condition is `taken`
    #[must_use]
    pub fn new(parent_active: bool, taken: bool, line: usize) -> Self {
        let taken = parent_active && taken;
        Self {
            taken,
            // an inactive parent blocks every branch of the chain
            any_taken: taken || !parent_active,
            parent_active,
            seen_else: false,
            line,
        }
    }

    /// Whether tokens under this frame are kept
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.parent_active && self.taken
    }

    /// Whether an `#elif` condition still has to be evaluated
    #[must_use]
    pub fn wants_elif(&self) -> bool {
        self.parent_active && !self.any_taken && !self.seen_else
    }

    /// Record the outcome of an `#elif`
    pub fn take_elif(&mut self, taken: bool) {
        self.taken = taken;
        self.any_taken |= taken;
    }

    /// Switch to the `#else` branch
    pub fn take_else(&mut self) {
        self.taken = self.parent_active && !self.any_taken;
        self.any_taken = true;
        self.seen_else = true;
    }
}

/// A file currently open on the include stack
#[derive(Clone, Debug)]
pub struct IncludeFrame {
    /// Path the file was read from
    pub path: PathBuf,
    /// Index of the include directory the file was found in
    pub found_in: Option<usize>,
    /// Conditional stack depth when the file was entered
    pub conditional_depth: usize,
    /// Name reported by `__FILE__`, changed by `#line`
    pub presumed_name: String,
    /// Offset added to physical lines, changed by `#line`
    pub line_delta: i64,
}

impl IncludeFrame {
    /// Frame for a file entered at the given conditional depth
    #[must_use]
    pub fn new(path: PathBuf, found_in: Option<usize>, conditional_depth: usize) -> Self {
        let presumed_name = path.to_string_lossy().into_owned();
        Self {
            path,
            found_in,
            conditional_depth,
            presumed_name,
            line_delta: 0,
        }
    }

    /// Directory containing the file
    #[must_use]
    pub fn directory(&self) -> &Path {
        self.path.parent().unwrap_or_else(|| Path::new(""))
    }
}

/// All mutable state of one translation unit
///
/// Each unit gets its own context, so several units can be preprocessed on
/// different threads without sharing anything but read-only configuration.
#[derive(Debug)]
pub struct PreprocessingContext {
    /// Macro definitions, seeded from the baseline table
    pub macros: MacroTable,
    /// Open conditional chains
    pub conditionals: Vec<ConditionalFrame>,
    /// Files being processed, the unit itself first
    pub include_stack: Vec<IncludeFrame>,
    /// Files that declared `#pragma once`
    pub once: FxHashSet<PathBuf>,
    /// Next value of `__COUNTER__`
    pub counter: u64,
    /// Findings so far
    pub diagnostics: Vec<Diagnostic>,
    /// Value of `__DATE__` and `__TIME__`
    pub stamp: BuildStamp,
}

impl PreprocessingContext {
    /// Context over an initial macro table
    #[must_use]
    pub fn new(macros: MacroTable) -> Self {
        Self {
            macros,
            conditionals: Vec::new(),
            include_stack: Vec::new(),
            once: FxHashSet::default(),
            counter: 0,
            diagnostics: Vec::new(),
            stamp: BuildStamp::now(),
        }
    }

    /// Whether tokens at the current position are kept
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.conditionals
            .last()
            .is_none_or(ConditionalFrame::is_active)
    }

    /// Nesting level of the current file, 0 for the unit itself
    #[must_use]
    pub fn include_level(&self) -> usize {
        self.include_stack.len().saturating_sub(1)
    }

    /// Whether the current file is the unit itself
    #[must_use]
    pub fn in_main_file(&self) -> bool {
        self.include_stack.len() <= 1
    }

    /// File being processed
    #[must_use]
    pub fn current_file(&self) -> Option<&IncludeFrame> {
        self.include_stack.last()
    }

    /// Line as reported by `__LINE__` for a physical line
    #[must_use]
    pub fn presumed_line(&self, line: usize) -> i64 {
        let delta = self.current_file().map_or(0, |f| f.line_delta);
        i64::try_from(line).unwrap_or(i64::MAX).saturating_add(delta)
    }

    /// Record a diagnostic, tagging it with the file when inside an include
    pub fn report(&mut self, diagnostic: Diagnostic) {
        let diagnostic = match self.include_stack.last() {
            Some(frame) if self.include_stack.len() > 1 => diagnostic.in_file(frame.path.clone()),
            _ => diagnostic,
        };
        self.diagnostics.push(diagnostic);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn elif_chain_takes_one_branch() {
        let mut frame = ConditionalFrame::new(true, false, 1);
        assert!(!frame.is_active());
        assert!(frame.wants_elif());
        frame.take_elif(true);
        assert!(frame.is_active());
        assert!(!frame.wants_elif());
        frame.take_else();
        assert!(!frame.is_active());
    }

    #[test]
    fn inactive_parent_blocks_all_branches() {
        let mut frame = ConditionalFrame::new(false, true, 3);
        assert!(!frame.is_active());
        assert!(!frame.wants_elif());
        frame.take_else();
        assert!(!frame.is_active());
    }

    #[test]
    fn empty_stack_is_active() {
        let ctx = PreprocessingContext::new(MacroTable::new());
        assert!(ctx.is_active());
        assert_eq!(ctx.include_level(), 0);
    }
}

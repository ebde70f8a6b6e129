use std::collections::VecDeque;
use std::mem;
use std::path::{Path, PathBuf};

use log::{debug, trace, warn};

use crate::config::{PreprocessorConfig, define_directive_body};
use crate::context::{ConditionalFrame, IncludeFrame, PreprocessingContext};
use crate::date_time::BuildStamp;
use crate::diagnostic::Diagnostic;
use crate::engine;
use crate::error::{ConfigError, PreprocessError};
use crate::include::{self, IncludeForm, ResolvedInclude};
use crate::lexer::Lexer;
use crate::macro_def::{Macro, MacroTable, VA_ARGS};
use crate::token::{Token, TokenKind, Trivia, TriviaKind};

type MacroArguments = Vec<Vec<Token>>;

const BUILTINS: &[&str] = &[
    "__LINE__",
    "__FILE__",
    "__DATE__",
    "__TIME__",
    "__COUNTER__",
    "__INCLUDE_LEVEL__",
];

const ZERO_QUERIES: &[&str] = &[
    "__has_cpp_attribute",
    "__has_c_attribute",
    "__has_attribute",
    "__has_declspec_attribute",
    "__has_builtin",
    "__has_feature",
    "__has_extension",
];

/// Result of preprocessing one translation unit
#[derive(Clone, Debug, Default)]
pub struct PreprocessOutput {
    /// Expanded tokens, ending with `Eof` when the input had one
    pub tokens: Vec<Token>,
    /// Directive errors, unresolved includes, fail-open decisions
    pub diagnostics: Vec<Diagnostic>,
    /// Files entered through `#include`, in order
    pub included_files: Vec<PathBuf>,
}

/// Element of a replacement list while `##` is pending
enum Piece {
    /// A token, flagged when it comes from the variadic argument
    Token(Token, bool),
    /// The `##` operator
    Paste,
    /// An empty argument next to `##`, flagged when variadic
    Placemarker(bool),
}

/// Tokens of a function-like macro invocation, kept so the input can be
/// restored when the invocation is rejected
struct Invocation {
    open: Token,
    args: MacroArguments,
    commas: Vec<Token>,
    close: Option<Token>,
}

impl Invocation {
    fn restore(self, input: &mut VecDeque<Token>) {
        let mut tokens = vec![self.open];
        let mut commas = self.commas.into_iter();
        for (i, arg) in self.args.into_iter().enumerate() {
            if i > 0
                && let Some(comma) = commas.next()
            {
                tokens.push(comma);
            }
            tokens.extend(arg);
        }
        tokens.extend(self.close);
        for token in tokens.into_iter().rev() {
            input.push_front(token);
        }
    }
}

/// The C preprocessor of one translation unit
pub struct Preprocessor {
    config: PreprocessorConfig,
    ctx: PreprocessingContext,
    lexer: Lexer,
    sources: Vec<VecDeque<Token>>,
    pending_trivia: Vec<Trivia>,
    skipped_line: usize,
    included_files: Vec<PathBuf>,
}

impl Preprocessor {
    /// Create a preprocessor with no macros defined
    #[must_use]
    pub fn new(config: PreprocessorConfig) -> Self {
        Self::with_macros(config, MacroTable::new())
    }

    /// Create a preprocessor starting from a macro table
    #[must_use]
    pub fn with_macros(config: PreprocessorConfig, macros: MacroTable) -> Self {
        Preprocessor {
            config,
            ctx: PreprocessingContext::new(macros),
            lexer: Lexer::raw(),
            sources: Vec::new(),
            pending_trivia: Vec::new(),
            skipped_line: 0,
            included_files: Vec::new(),
        }
    }

    /// Create a preprocessor for a unit: a copy of the baseline table with
    /// the unit's own defines applied on top
    ///
    /// # Errors
    /// Returns `ConfigError::MalformedDefine` for an unusable define entry.
    pub fn for_unit(
        config: PreprocessorConfig,
        baseline: &MacroTable,
    ) -> Result<Self, ConfigError> {
        let defines = config.unit_defines.clone();
        let mut pp = Self::with_macros(config, baseline.clone());
        for entry in &defines {
            pp.define(entry)?;
        }
        Ok(pp)
    }

    /// Define a macro from a `NAME`, `NAME=VALUE` or `NAME(a)=body` entry
    ///
    /// # Errors
    /// Returns `ConfigError::MalformedDefine` if the entry has no macro name.
    pub fn define(&mut self, entry: &str) -> Result<(), ConfigError> {
        let mac = parse_define_entry(entry)?;
        self.ctx.macros.define(mac);
        Ok(())
    }

    /// Remove a macro definition
    pub fn undef(&mut self, name: &str) {
        self.ctx.macros.undef(name);
    }

    /// Macros currently defined
    #[must_use]
    pub fn macros(&self) -> &MacroTable {
        &self.ctx.macros
    }

    /// Check if a macro is defined
    #[must_use]
    pub fn is_defined(&self, name: &str) -> bool {
        self.ctx.macros.is_defined(name) || BUILTINS.contains(&name) || name == "__has_include"
    }

    /// Fix the value of `__DATE__` and `__TIME__`
    pub fn set_build_stamp(&mut self, stamp: BuildStamp) {
        self.ctx.stamp = stamp;
    }

    /// Preprocess source text that has no file name
    pub fn process_str(&mut self, text: &str) -> PreprocessOutput {
        self.process_file(Path::new("<stdin>"), text)
    }

    /// Preprocess already lexed tokens that have no file name
    pub fn process(&mut self, tokens: Vec<Token>) -> PreprocessOutput {
        self.process_tokens(PathBuf::from("<stdin>"), tokens)
    }

    /// Preprocess the text of `path`
    pub fn process_file(&mut self, path: &Path, text: &str) -> PreprocessOutput {
        let tokens = self.lexer.lex(text);
        self.process_tokens(include::normalize(path), tokens)
    }

    /// Read and preprocess a file from disk
    ///
    /// # Errors
    /// Returns `PreprocessError::Unreadable` if the file cannot be read.
    pub fn process_path(&mut self, path: &Path) -> Result<PreprocessOutput, PreprocessError> {
        let text = std::fs::read_to_string(path).map_err(|source| PreprocessError::Unreadable {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(self.process_file(path, &text))
    }

    fn process_tokens(&mut self, path: PathBuf, tokens: Vec<Token>) -> PreprocessOutput {
        debug!("preprocessing {}", path.display());
        self.ctx.include_stack.push(IncludeFrame::new(path, None, 0));
        self.sources.push(tokens.into());

        let forced = self.config.force_includes.clone();
        for name in forced.iter().rev() {
            self.force_include(name);
        }

        let tokens = self.run();
        debug_assert!(self.ctx.macros.all_enabled());
        PreprocessOutput {
            tokens,
            diagnostics: mem::take(&mut self.ctx.diagnostics),
            included_files: mem::take(&mut self.included_files),
        }
    }

    fn run(&mut self) -> Vec<Token> {
        let mut out = Vec::new();
        while let Some(source) = self.sources.last_mut() {
            let Some(token) = source.pop_front() else {
                self.leave_file();
                continue;
            };
            match token.kind {
                TokenKind::Eof => {
                    let is_root = self.sources.len() == 1;
                    self.leave_file();
                    if is_root {
                        let mut eof = token;
                        self.attach_pending(&mut eof);
                        out.push(eof);
                    }
                }
                TokenKind::Preprocessor => self.handle_directive(token),
                _ if !self.ctx.is_active() => self.skip_text(&token),
                _ if !self.emitting() => {}
                _ => self.expand_top_level(token, &mut out),
            }
        }
        out
    }

    fn emitting(&self) -> bool {
        self.ctx.in_main_file() || self.config.emit_included_tokens
    }

    fn emit(&mut self, mut token: Token, out: &mut Vec<Token>) {
        self.attach_pending(&mut token);
        if !self.ctx.in_main_file() {
            token.generated = true;
        }
        out.push(token);
    }

    fn attach_pending(&mut self, token: &mut Token) {
        if !self.pending_trivia.is_empty() {
            let mut trivia = mem::take(&mut self.pending_trivia);
            trivia.append(&mut token.trivia);
            token.trivia = trivia;
        }
    }

    /// Record a dropped token as skipped text for the next emitted token
    fn skip_text(&mut self, token: &Token) {
        if !self.ctx.in_main_file() {
            return;
        }
        self.pending_trivia.extend(token.trivia.iter().cloned());
        match self.pending_trivia.last_mut() {
            Some(last) if last.kind == TriviaKind::SkippedText => {
                last.text
                    .push(if token.line == self.skipped_line { ' ' } else { '\n' });
                last.text.push_str(&token.original);
            }
            _ => self.pending_trivia.push(Trivia::skipped(
                token.original.clone(),
                token.line,
                token.column,
            )),
        }
        self.skipped_line = token.line;
    }

    fn enter_file(&mut self, found: ResolvedInclude) {
        debug!("entering {}", found.path.display());
        let tokens = self.lexer.lex(&found.content);
        self.included_files.push(found.path.clone());
        let depth = self.ctx.conditionals.len();
        self.ctx
            .include_stack
            .push(IncludeFrame::new(found.path, found.dir_index, depth));
        self.sources.push(tokens.into());
    }

    fn leave_file(&mut self) {
        self.sources.pop();
        let depth = self
            .ctx
            .current_file()
            .map_or(0, |frame| frame.conditional_depth);
        while self.ctx.conditionals.len() > depth {
            if let Some(open) = self.ctx.conditionals.pop() {
                self.ctx.report(Diagnostic::error(
                    Some(open.line),
                    "unterminated conditional directive",
                ));
            }
        }
        if let Some(frame) = self.ctx.include_stack.pop() {
            trace!("leaving {}", frame.path.display());
        }
    }

    fn force_include(&mut self, path: &Path) {
        let name = path.to_string_lossy();
        let root = &self.ctx.include_stack[..self.ctx.include_stack.len().min(1)];
        match include::resolve(
            &name,
            IncludeForm::Quoted,
            false,
            root,
            &self.config.include_dirs,
            &self.config.reader,
        ) {
            Some(found) => self.enter_file(found),
            None => {
                warn!("cannot find forced include {name}");
                self.ctx.report(Diagnostic::warning(
                    None,
                    format!("cannot find forced include '{name}'"),
                ));
            }
        }
    }

    // ----- directives -----

    fn handle_directive(&mut self, directive: Token) {
        let line = directive.line;
        let mut tokens = self
            .lexer
            .tokenize_fragment(&directive.value, line, directive.column);
        if tokens.first().is_some_and(|t| t.is_punct("#")) {
            tokens.remove(0);
        }
        let name = match tokens.first() {
            Some(t) if t.is_word() => tokens.remove(0).value,
            // GNU line marker `# 33 "file"`
            Some(t) if t.kind == TokenKind::Number => "line".to_string(),
            _ => String::new(),
        };
        let args = tokens;

        let was_active = self.ctx.is_active();
        if was_active {
            if self.ctx.in_main_file() {
                self.pending_trivia.extend(directive.trivia.iter().cloned());
            }
        } else {
            self.skip_text(&directive);
        }
        trace!("#{name} at line {line}");

        match name.as_str() {
            "if" => self.handle_if(args, line),
            "ifdef" => self.handle_ifdef(&args, line, "ifdef", true),
            "ifndef" => self.handle_ifdef(&args, line, "ifndef", false),
            "elif" => self.handle_elif(Some(args), line, "elif", true),
            "elifdef" => self.handle_elif(Some(args), line, "elifdef", true),
            "elifndef" => self.handle_elif(Some(args), line, "elifndef", false),
            "else" => self.handle_else(line),
            "endif" => self.handle_endif(line),
            _ if !was_active => {}
            "define" => self.handle_define(&args, line),
            "undef" => self.handle_undef(&args, line),
            "include" | "import" => self.handle_include(args, line, false),
            "include_next" => self.handle_include(args, line, true),
            "error" => self.handle_error(&args, line),
            "warning" => self.handle_warning(&args, line),
            "line" => self.handle_line(args, line),
            "pragma" => self.handle_pragma(&args),
            "" => {}
            other => debug!("ignoring unknown directive #{other} at line {line}"),
        }
    }

    fn handle_define(&mut self, args: &[Token], line: usize) {
        match parse_define(args) {
            Ok(mut mac) => {
                mac.definition_location = self
                    .ctx
                    .current_file()
                    .map(|f| (f.presumed_name.clone(), line));
                if let Some(old) = self.ctx.macros.get(&mac.name)
                    && !same_definition(old, &mac)
                {
                    self.ctx.report(Diagnostic::warning(
                        Some(line),
                        format!("'{}' macro redefined", mac.name),
                    ));
                }
                trace!("define {} = {}", mac.name, mac.body_text());
                self.ctx.macros.define(mac);
            }
            Err(message) => self.ctx.report(Diagnostic::error(Some(line), message)),
        }
    }

    fn handle_undef(&mut self, args: &[Token], line: usize) {
        match args.first() {
            Some(name) if name.is_word() => {
                self.ctx.macros.undef(&name.value);
            }
            _ => self
                .ctx
                .report(Diagnostic::error(Some(line), "#undef expects a macro name")),
        }
    }

    fn handle_include(&mut self, args: Vec<Token>, line: usize, is_next: bool) {
        let operand = match include::parse_operand(&args) {
            Some(operand) => Some(operand),
            None => {
                let expanded = self.expand_list(args, 0);
                include::parse_operand(&expanded)
            }
        };
        let Some((name, form)) = operand else {
            self.ctx.report(Diagnostic::error(
                Some(line),
                "#include expects \"FILENAME\" or <FILENAME>",
            ));
            return;
        };

        if self.ctx.include_stack.len() > self.config.include_depth_limit {
            self.ctx
                .report(Diagnostic::error(Some(line), "#include nested too deeply"));
            return;
        }

        let Some(found) = include::resolve(
            &name,
            form,
            is_next,
            &self.ctx.include_stack,
            &self.config.include_dirs,
            &self.config.reader,
        ) else {
            warn!("line {line}: cannot find include file '{name}'");
            self.ctx.report(Diagnostic::warning(
                Some(line),
                format!("cannot find include file '{name}'"),
            ));
            return;
        };

        if self.ctx.once.contains(&found.path) {
            trace!("skipping {} (#pragma once)", found.path.display());
            return;
        }
        if self.ctx.include_stack.iter().any(|f| f.path == found.path) {
            self.ctx.report(Diagnostic::warning(
                Some(line),
                format!("recursive inclusion of '{}' skipped", found.path.display()),
            ));
            return;
        }
        self.enter_file(found);
    }

    fn handle_if(&mut self, args: Vec<Token>, line: usize) {
        let parent_active = self.ctx.is_active();
        let taken = parent_active && self.evaluate_condition(args, line);
        self.ctx
            .conditionals
            .push(ConditionalFrame::new(parent_active, taken, line));
    }

    fn handle_ifdef(&mut self, args: &[Token], line: usize, directive: &str, expect: bool) {
        let parent_active = self.ctx.is_active();
        let taken = parent_active && self.test_defined(args, line, directive, expect);
        self.ctx
            .conditionals
            .push(ConditionalFrame::new(parent_active, taken, line));
    }

    fn test_defined(&mut self, args: &[Token], line: usize, directive: &str, expect: bool) -> bool {
        match args.first() {
            Some(name) if name.is_word() => self.is_defined(&name.value) == expect,
            _ => {
                self.ctx.report(Diagnostic::error(
                    Some(line),
                    format!("#{directive} expects a macro name"),
                ));
                false
            }
        }
    }

    /// Frames opened by the current file
    fn local_conditionals(&self) -> usize {
        let depth = self
            .ctx
            .current_file()
            .map_or(0, |frame| frame.conditional_depth);
        self.ctx.conditionals.len().saturating_sub(depth)
    }

    fn handle_elif(
        &mut self,
        args: Option<Vec<Token>>,
        line: usize,
        directive: &str,
        expect: bool,
    ) {
        if self.local_conditionals() == 0 {
            self.ctx.report(Diagnostic::error(
                Some(line),
                format!("#{directive} without #if"),
            ));
            return;
        }
        let Some(frame) = self.ctx.conditionals.last() else {
            return;
        };
        if frame.seen_else {
            self.ctx.report(Diagnostic::error(
                Some(line),
                format!("#{directive} after #else"),
            ));
            if let Some(frame) = self.ctx.conditionals.last_mut() {
                frame.taken = false;
            }
            return;
        }

        let taken = if frame.wants_elif() {
            let args = args.unwrap_or_default();
            if directive == "elif" {
                self.evaluate_condition(args, line)
            } else {
                self.test_defined(&args, line, directive, expect)
            }
        } else {
            false
        };
        if let Some(frame) = self.ctx.conditionals.last_mut() {
            frame.take_elif(taken);
        }
    }

    fn handle_else(&mut self, line: usize) {
        if self.local_conditionals() == 0 {
            self.ctx
                .report(Diagnostic::error(Some(line), "#else without #if"));
            return;
        }
        let duplicate = self.ctx.conditionals.last().is_some_and(|f| f.seen_else);
        if duplicate {
            self.ctx
                .report(Diagnostic::error(Some(line), "#else after #else"));
        }
        if let Some(frame) = self.ctx.conditionals.last_mut() {
            if duplicate {
                frame.taken = false;
            } else {
                frame.take_else();
            }
        }
    }

    fn handle_endif(&mut self, line: usize) {
        if self.local_conditionals() == 0 {
            self.ctx
                .report(Diagnostic::error(Some(line), "#endif without #if"));
            return;
        }
        self.ctx.conditionals.pop();
    }

    fn handle_error(&mut self, args: &[Token], line: usize) {
        let message = spell(args);
        debug!("#error at line {line}: {message}");
        self.ctx
            .report(Diagnostic::error(Some(line), format!("#error {message}")));
    }

    fn handle_warning(&mut self, args: &[Token], line: usize) {
        let message = spell(args);
        if let Some(handler) = &self.config.warning_handler {
            handler(&message);
        }
        self.ctx
            .report(Diagnostic::warning(Some(line), format!("#warning {message}")));
    }

    fn handle_line(&mut self, args: Vec<Token>, line: usize) {
        let tokens = if args.first().is_some_and(|t| t.kind == TokenKind::Number) {
            args
        } else {
            self.expand_list(args, 0)
        };
        let number = tokens
            .first()
            .filter(|t| t.kind == TokenKind::Number)
            .and_then(|t| t.value.parse::<i64>().ok());
        let Some(number) = number else {
            self.ctx
                .report(Diagnostic::error(Some(line), "#line expects a line number"));
            return;
        };
        let file = tokens
            .get(1)
            .filter(|t| t.kind == TokenKind::String)
            .and_then(|t| t.value.strip_prefix('"'))
            .and_then(|v| v.strip_suffix('"'))
            .map(str::to_string);
        if let Some(frame) = self.ctx.include_stack.last_mut() {
            let next_line = i64::try_from(line).unwrap_or(i64::MAX).saturating_add(1);
            frame.line_delta = number - next_line;
            if let Some(file) = file {
                frame.presumed_name = file;
            }
        }
    }

    fn handle_pragma(&mut self, args: &[Token]) {
        match args.first().map(|t| t.value.as_str()) {
            Some("once") => {
                if let Some(frame) = self.ctx.current_file() {
                    let path = frame.path.clone();
                    self.ctx.once.insert(path);
                }
            }
            other => debug!("ignoring #pragma {}", other.unwrap_or_default()),
        }
    }

    /// `_Pragma("...")`, removed from the output
    fn handle_pragma_operator(&mut self, token: &Token, input: &mut VecDeque<Token>) -> bool {
        let is_operator = input.front().is_some_and(|t| t.is_punct("("))
            && input.get(1).is_some_and(|t| t.kind == TokenKind::String)
            && input.get(2).is_some_and(|t| t.is_punct(")"));
        if !is_operator {
            return false;
        }
        input.pop_front();
        let literal = input.pop_front();
        input.pop_front();
        if let Some(literal) = literal {
            let start = literal.value.find('"').map_or(0, |i| i + 1);
            let end = literal.value.rfind('"').unwrap_or(literal.value.len()).max(start);
            let text = literal.value[start..end]
                .replace("\\\"", "\"")
                .replace("\\\\", "\\");
            let tokens = self.lexer.tokenize_fragment(&text, token.line, token.column);
            self.handle_pragma(&tokens);
        }
        true
    }

    // ----- #if expressions -----

    fn evaluate_condition(&mut self, args: Vec<Token>, line: usize) -> bool {
        match self.condition_value(args) {
            Ok(value) => value != 0,
            Err(message) => {
                warn!("line {line}: cannot evaluate condition ({message}), assuming true");
                self.ctx.report(Diagnostic::warning(
                    Some(line),
                    format!("cannot evaluate preprocessor condition: {message}; assuming true"),
                ));
                true
            }
        }
    }

    fn condition_value(&mut self, args: Vec<Token>) -> Result<i64, String> {
        let resolved = self.resolve_condition_operators(args)?;
        let expanded = self.expand_list(resolved, 0);
        let resolved = self.resolve_condition_operators(expanded)?;
        let tokens = engine::to_expr_tokens(&resolved)?;
        engine::evaluate(&tokens)
    }

    /// Replace `defined`, `__has_include` and feature queries by numbers
    fn resolve_condition_operators(&mut self, tokens: Vec<Token>) -> Result<Vec<Token>, String> {
        let mut out = Vec::with_capacity(tokens.len());
        let mut iter = tokens.into_iter().peekable();
        while let Some(token) = iter.next() {
            if !token.is_word() {
                out.push(token);
                continue;
            }
            let value = match token.value.as_str() {
                "defined" => {
                    let paren = iter.next_if(|t| t.is_punct("(")).is_some();
                    let name = iter
                        .next_if(Token::is_word)
                        .ok_or("'defined' without a macro name")?;
                    if paren && iter.next_if(|t| t.is_punct(")")).is_none() {
                        return Err("missing ')' after 'defined'".to_string());
                    }
                    i64::from(self.is_defined(&name.value))
                }
                "__has_include" | "__has_include_next" => {
                    let is_next = token.value == "__has_include_next";
                    let operand = take_parenthesized(&mut iter)
                        .ok_or_else(|| format!("missing parentheses after {}", token.value))?;
                    let operand = match include::parse_operand(&operand) {
                        Some(operand) => Some(operand),
                        None => {
                            let expanded = self.expand_list(operand, 0);
                            include::parse_operand(&expanded)
                        }
                    };
                    let (name, form) = operand.ok_or("malformed __has_include operand")?;
                    let found = include::resolve(
                        &name,
                        form,
                        is_next,
                        &self.ctx.include_stack,
                        &self.config.include_dirs,
                        &self.config.reader,
                    );
                    i64::from(found.is_some())
                }
                query if ZERO_QUERIES.contains(&query) => {
                    take_parenthesized(&mut iter)
                        .ok_or_else(|| format!("missing parentheses after {query}"))?;
                    0
                }
                _ => {
                    out.push(token);
                    continue;
                }
            };
            let mut number =
                Token::new(TokenKind::Number, value.to_string(), token.line, token.column);
            number.trivia = token.trivia;
            out.push(number);
        }
        Ok(out)
    }

    // ----- macro expansion -----

    fn expand_top_level(&mut self, token: Token, out: &mut Vec<Token>) {
        let may_expand = token.is_word()
            && !token.painted
            && (self.ctx.macros.is_defined(&token.value)
                || BUILTINS.contains(&token.value.as_str())
                || token.value == "_Pragma");
        if !may_expand {
            self.emit(token, out);
            return;
        }

        let trivia = token.trivia.clone();
        let mut input = self.sources.last_mut().map(mem::take).unwrap_or_default();
        let mut expanded = Vec::new();
        let kept = self.expand_word(token, &mut input, &mut expanded, 0);
        if let Some(source) = self.sources.last_mut() {
            *source = input;
        }
        if !kept && self.ctx.in_main_file() {
            self.pending_trivia.extend(trivia);
        }
        for token in expanded {
            self.emit(token, out);
        }
    }

    /// Fully expand a finite token list
    fn expand_list(&mut self, tokens: Vec<Token>, depth: usize) -> Vec<Token> {
        let mut input: VecDeque<Token> = tokens.into();
        let mut out = Vec::with_capacity(input.len());
        while let Some(token) = input.pop_front() {
            self.expand_word(token, &mut input, &mut out, depth);
        }
        out
    }

    /// Expand one token read from `input`. Returns false when a macro
    /// expanded to nothing, so the token's trivia has no carrier.
    fn expand_word(
        &mut self,
        mut token: Token,
        input: &mut VecDeque<Token>,
        out: &mut Vec<Token>,
        depth: usize,
    ) -> bool {
        if !token.is_word() || token.painted {
            out.push(token);
            return true;
        }
        if let Some(builtin) = self.expand_predefined_macro(&token) {
            out.push(builtin);
            return true;
        }
        if token.value == "_Pragma" && self.handle_pragma_operator(&token, input) {
            return false;
        }
        let Some(mac) = self.ctx.macros.get(&token.value).cloned() else {
            out.push(token);
            return true;
        };
        if mac.is_disabled() {
            token.painted = true;
            out.push(token);
            return true;
        }
        if mac.is_function_like && !input.front().is_some_and(|t| t.is_punct("(")) {
            out.push(token);
            return true;
        }
        if depth >= self.config.recursion_limit {
            self.ctx.report(Diagnostic::error(
                Some(token.line),
                format!("expansion of macro '{}' exceeds the recursion limit", mac.name),
            ));
            token.painted = true;
            out.push(token);
            return true;
        }

        let Some(mut expansion) = self.handle_macro_invocation(&mac, &token, input, depth) else {
            token.painted = true;
            out.push(token);
            return true;
        };

        let mut kept = !expansion.is_empty();
        if let Some(last) = expansion.last()
            && self.is_pending_invocation(last, input)
            && let Some(name) = expansion.pop()
        {
            trace!("'{}' continues with the following input", name.value);
            input.push_front(name);
            kept = true;
        }
        out.extend(expansion);
        kept
    }

    /// A trailing function-like macro name whose arguments follow the expansion
    fn is_pending_invocation(&self, last: &Token, input: &VecDeque<Token>) -> bool {
        last.is_word()
            && !last.painted
            && input.front().is_some_and(|t| t.is_punct("("))
            && self
                .ctx
                .macros
                .expandable(&last.value)
                .is_some_and(|m| m.is_function_like)
    }

    fn expand_predefined_macro(&mut self, token: &Token) -> Option<Token> {
        let (kind, value) = match token.value.as_str() {
            "__LINE__" => (
                TokenKind::Number,
                self.ctx.presumed_line(token.line).to_string(),
            ),
            "__FILE__" => {
                let name = self
                    .ctx
                    .current_file()
                    .map(|f| f.presumed_name.clone())
                    .unwrap_or_default();
                (
                    TokenKind::String,
                    format!("\"{}\"", name.replace('\\', "\\\\").replace('"', "\\\"")),
                )
            }
            "__DATE__" => (TokenKind::String, format!("\"{}\"", self.ctx.stamp.date())),
            "__TIME__" => (TokenKind::String, format!("\"{}\"", self.ctx.stamp.time())),
            "__COUNTER__" => {
                let value = self.ctx.counter;
                self.ctx.counter += 1;
                (TokenKind::Number, value.to_string())
            }
            "__INCLUDE_LEVEL__" => (TokenKind::Number, self.ctx.include_level().to_string()),
            _ => return None,
        };
        let mut builtin = Token::new(kind, value, token.line, token.column);
        builtin.original = token.original.clone();
        builtin.trivia = token.trivia.clone();
        builtin.generated = true;
        Some(builtin)
    }

    /// Substitute and rescan one invocation. `None` leaves the input as it
    /// was and the name unexpanded.
    fn handle_macro_invocation(
        &mut self,
        mac: &Macro,
        token: &Token,
        input: &mut VecDeque<Token>,
        depth: usize,
    ) -> Option<Vec<Token>> {
        let mut substituted = if mac.is_function_like {
            let Some(invocation) = parse_macro_arguments(input) else {
                self.ctx.report(Diagnostic::error(
                    Some(token.line),
                    format!("unterminated argument list invoking macro '{}'", mac.name),
                ));
                return None;
            };
            let args = match validate_macro_arguments(mac, invocation) {
                Ok(args) => args,
                Err(invocation) => {
                    self.ctx.report(Diagnostic::error(
                        Some(token.line),
                        format!(
                            "macro '{}' expects {} argument(s), {} given",
                            mac.name,
                            mac.params.len(),
                            invocation.args.len()
                        ),
                    ));
                    invocation.restore(input);
                    return None;
                }
            };
            self.replace_macro_parameters(mac, &args, token.line, depth)
        } else {
            let pieces = mac
                .body
                .iter()
                .map(|t| {
                    if t.is_punct("##") {
                        Piece::Paste
                    } else {
                        Piece::Token(t.clone(), false)
                    }
                })
                .collect();
            self.apply_token_pasting(pieces, token.line)
        };

        engine::relocate(&mut substituted, token);
        trace!("rescanning expansion of {}", mac.name);
        self.ctx.macros.disable(&mac.name);
        let expanded = self.expand_list(substituted, depth + 1);
        self.ctx.macros.enable(&mac.name);
        Some(expanded)
    }

    fn replace_macro_parameters(
        &mut self,
        mac: &Macro,
        args: &[Vec<Token>],
        line: usize,
        depth: usize,
    ) -> Vec<Token> {
        let mut expanded: Vec<Option<Vec<Token>>> = vec![None; args.len()];
        let mut pieces = Vec::with_capacity(mac.body.len());
        self.substitute_range(mac, &mac.body, args, &mut expanded, depth, &mut pieces);
        self.apply_token_pasting(pieces, line)
    }

    fn substitute_range(
        &mut self,
        mac: &Macro,
        body: &[Token],
        args: &[Vec<Token>],
        expanded: &mut [Option<Vec<Token>>],
        depth: usize,
        pieces: &mut Vec<Piece>,
    ) {
        let variadic = mac.variadic_index();
        let mut i = 0;
        while i < body.len() {
            let token = &body[i];
            if token.is_punct("##") {
                pieces.push(Piece::Paste);
                i += 1;
                continue;
            }
            if token.is_punct("#")
                && let Some(p) = body.get(i + 1).and_then(|next| mac.param_index(&next.value))
            {
                let literal = engine::stringize(&args[p]);
                pieces.push(Piece::Token(
                    Token::new(TokenKind::String, literal, token.line, token.column),
                    false,
                ));
                i += 2;
                continue;
            }
            if token.value == "__VA_OPT__"
                && let Some(va) = variadic
                && body.get(i + 1).is_some_and(|t| t.is_punct("("))
            {
                let close = matching_paren(body, i + 1);
                if !args[va].is_empty() {
                    self.substitute_range(mac, &body[i + 2..close], args, expanded, depth, pieces);
                } else {
                    pieces.push(Piece::Placemarker(false));
                }
                i = close + 1;
                continue;
            }
            let Some(p) = token.is_word().then(|| mac.param_index(&token.value)).flatten() else {
                pieces.push(Piece::Token(token.clone(), false));
                i += 1;
                continue;
            };

            let from_variadic = Some(p) == variadic;
            let pasted = (i > 0 && body[i - 1].is_punct("##"))
                || body.get(i + 1).is_some_and(|t| t.is_punct("##"));
            if pasted {
                if args[p].is_empty() {
                    pieces.push(Piece::Placemarker(from_variadic));
                } else {
                    pieces.extend(
                        args[p]
                            .iter()
                            .cloned()
                            .map(|t| Piece::Token(t, from_variadic)),
                    );
                }
            } else {
                let tokens = match &expanded[p] {
                    Some(tokens) => tokens.clone(),
                    None => {
                        let tokens = self.expand_list(args[p].clone(), depth + 1);
                        expanded[p] = Some(tokens.clone());
                        tokens
                    }
                };
                pieces.extend(tokens.into_iter().map(|t| Piece::Token(t, from_variadic)));
            }
            i += 1;
        }
    }

    /// Apply token pasting (##) to a replacement list
    fn apply_token_pasting(&mut self, pieces: Vec<Piece>, line: usize) -> Vec<Token> {
        let mut out: Vec<Piece> = Vec::with_capacity(pieces.len());
        let mut iter = pieces.into_iter();
        while let Some(piece) = iter.next() {
            if !matches!(piece, Piece::Paste) {
                out.push(piece);
                continue;
            }
            match (out.pop(), iter.next()) {
                // GNU `, ## __VA_ARGS__` with no variadic arguments
                (Some(Piece::Token(comma, _)), Some(Piece::Placemarker(true)))
                    if comma.is_punct(",") => {}
                (Some(Piece::Token(comma, lv)), Some(Piece::Token(arg, true)))
                    if comma.is_punct(",") =>
                {
                    out.push(Piece::Token(comma, lv));
                    out.push(Piece::Token(arg, true));
                }
                (Some(Piece::Token(left, lv)), Some(Piece::Token(right, rv))) => {
                    match engine::paste(&left, &right) {
                        Some(tokens) => {
                            out.extend(tokens.into_iter().map(|t| Piece::Token(t, lv || rv)));
                        }
                        None => {
                            self.ctx.report(Diagnostic::warning(
                                Some(line),
                                format!(
                                    "pasting \"{}\" and \"{}\" does not give a valid \
                                     preprocessing token",
                                    left.value, right.value
                                ),
                            ));
                            out.push(Piece::Token(left, lv));
                            out.push(Piece::Token(right, rv));
                        }
                    }
                }
                (Some(Piece::Placemarker(_)) | None, Some(right)) => out.push(right),
                (Some(left), _) => out.push(left),
                (None, None) => {}
            }
        }
        out.into_iter()
            .filter_map(|piece| match piece {
                Piece::Token(token, _) => Some(token),
                Piece::Paste | Piece::Placemarker(_) => None,
            })
            .collect()
    }
}

/// Collect the arguments of an invocation whose `(` is at the front of
/// `input`. Stops at directives and end of input; the input is then left
/// untouched and `None` returned.
fn parse_macro_arguments(input: &mut VecDeque<Token>) -> Option<Invocation> {
    let open = input.pop_front()?;
    let mut invocation = Invocation {
        open,
        args: vec![Vec::new()],
        commas: Vec::new(),
        close: None,
    };
    let mut nesting = 0usize;
    while input
        .front()
        .is_some_and(|t| !matches!(t.kind, TokenKind::Preprocessor | TokenKind::Eof))
    {
        let Some(token) = input.pop_front() else {
            break;
        };
        if token.is_punct("(") {
            nesting += 1;
        } else if token.is_punct(")") {
            if nesting == 0 {
                invocation.close = Some(token);
                return Some(invocation);
            }
            nesting -= 1;
        } else if token.is_punct(",") && nesting == 0 {
            invocation.commas.push(token);
            invocation.args.push(Vec::new());
            continue;
        }
        if let Some(arg) = invocation.args.last_mut() {
            arg.push(token);
        }
    }
    invocation.restore(input);
    None
}

/// Match arguments to parameters; the variadic parameter collects the
/// trailing arguments joined by their commas
fn validate_macro_arguments(
    mac: &Macro,
    invocation: Invocation,
) -> Result<MacroArguments, Invocation> {
    let params = mac.params.len();
    let given = invocation.args.len();

    if params == 0 {
        return if given == 1 && invocation.args[0].is_empty() {
            Ok(Vec::new())
        } else {
            Err(invocation)
        };
    }

    if !mac.is_variadic {
        return if given == params {
            Ok(invocation.args)
        } else {
            Err(invocation)
        };
    }

    let named = params - 1;
    if given < named {
        return Err(invocation);
    }
    let Invocation { args, commas, .. } = invocation;
    let mut result = Vec::with_capacity(params);
    let mut variadic = Vec::new();
    for (i, arg) in args.into_iter().enumerate() {
        if i < named {
            result.push(arg);
            continue;
        }
        if i > named
            && let Some(comma) = commas.get(i - 1)
        {
            variadic.push(comma.clone());
        }
        variadic.extend(arg);
    }
    result.push(variadic);
    Ok(result)
}

fn take_parenthesized(
    iter: &mut std::iter::Peekable<std::vec::IntoIter<Token>>,
) -> Option<Vec<Token>> {
    iter.next_if(|t| t.is_punct("("))?;
    let mut inner = Vec::new();
    let mut nesting = 0usize;
    for token in iter.by_ref() {
        if token.is_punct("(") {
            nesting += 1;
        } else if token.is_punct(")") {
            if nesting == 0 {
                return Some(inner);
            }
            nesting -= 1;
        }
        inner.push(token);
    }
    None
}

/// Index of the `)` matching the `(` at `open`, or the end of the slice
fn matching_paren(tokens: &[Token], open: usize) -> usize {
    let mut nesting = 0usize;
    for (i, token) in tokens.iter().enumerate().skip(open) {
        if token.is_punct("(") {
            nesting += 1;
        } else if token.is_punct(")") {
            nesting -= 1;
            if nesting == 0 {
                return i;
            }
        }
    }
    tokens.len()
}

/// Spell tokens back with single spaces where the source had whitespace
fn spell(tokens: &[Token]) -> String {
    let mut out = String::new();
    for (i, token) in tokens.iter().enumerate() {
        if i > 0 && !tokens[i - 1].is_adjacent_to(token) {
            out.push(' ');
        }
        out.push_str(&token.original);
    }
    out
}

fn same_definition(a: &Macro, b: &Macro) -> bool {
    a.is_function_like == b.is_function_like
        && a.is_variadic == b.is_variadic
        && a.params == b.params
        && a.body_text() == b.body_text()
}

/// Parse the tokens following `#define`
///
/// # Errors
/// Returns a message describing a malformed definition.
pub fn parse_define(tokens: &[Token]) -> Result<Macro, String> {
    let Some(name) = tokens.first().filter(|t| t.is_word()) else {
        return Err("macro name missing".to_string());
    };
    if name.value == "defined" {
        return Err("'defined' cannot be used as a macro name".to_string());
    }
    let rest = &tokens[1..];

    let function_like = rest
        .first()
        .is_some_and(|open| open.is_punct("(") && name.is_adjacent_to(open));
    if !function_like {
        let body = body_tokens(rest);
        check_paste_ends(&body)?;
        return Ok(Macro::object(name.value.clone(), body));
    }

    let mut params: Vec<String> = Vec::new();
    let mut is_variadic = false;
    let mut i = 1;
    loop {
        let token = rest
            .get(i)
            .ok_or("missing ')' in macro parameter list")?;
        i += 1;
        if token.is_punct(")") && params.is_empty() {
            break;
        }
        if token.is_punct("...") {
            params.push(VA_ARGS.to_string());
            is_variadic = true;
        } else if token.is_word() {
            if params.contains(&token.value) {
                return Err(format!("duplicate macro parameter '{}'", token.value));
            }
            params.push(token.value.clone());
            if rest.get(i).is_some_and(|t| t.is_punct("...")) {
                i += 1;
                is_variadic = true;
            }
        } else {
            return Err(format!("unexpected '{}' in macro parameter list", token.value));
        }

        let separator = rest
            .get(i)
            .ok_or("missing ')' in macro parameter list")?;
        i += 1;
        if separator.is_punct(")") {
            break;
        }
        if !separator.is_punct(",") || is_variadic {
            return Err("expected ',' or ')' in macro parameter list".to_string());
        }
    }

    let body = body_tokens(&rest[i..]);
    check_paste_ends(&body)?;
    for (j, token) in body.iter().enumerate() {
        let names_param = body
            .get(j + 1)
            .is_some_and(|next| params.contains(&next.value));
        if token.is_punct("#") && !names_param {
            return Err("'#' is not followed by a macro parameter".to_string());
        }
    }
    Ok(Macro::function(name.value.clone(), params, is_variadic, body))
}

fn body_tokens(tokens: &[Token]) -> Vec<Token> {
    tokens
        .iter()
        .cloned()
        .map(|mut t| {
            t.trivia.clear();
            t
        })
        .collect()
}

fn check_paste_ends(body: &[Token]) -> Result<(), String> {
    let at_end = body.first().is_some_and(|t| t.is_punct("##"))
        || body.last().is_some_and(|t| t.is_punct("##"));
    if at_end {
        Err("'##' cannot appear at either end of a macro expansion".to_string())
    } else {
        Ok(())
    }
}

/// Build a macro from a configuration define entry
///
/// # Errors
/// Returns `ConfigError::MalformedDefine` when the entry is unusable.
pub fn parse_define_entry(entry: &str) -> Result<Macro, ConfigError> {
    let text = define_directive_body(entry)?;
    let tokens = Lexer::raw().tokenize_fragment(&text, 1, 0);
    let mut mac =
        parse_define(&tokens).map_err(|_| ConfigError::MalformedDefine(entry.to_string()))?;
    mac.is_builtin = true;
    Ok(mac)
}

/// Build the shared baseline table from define entries ordered most
/// specific first, as returned by `LayeredConfig::get_values`
///
/// # Errors
/// Returns `ConfigError::MalformedDefine` for the first unusable entry.
pub fn baseline_macros(defines: &[String]) -> Result<MacroTable, ConfigError> {
    let mut table = MacroTable::new();
    for entry in defines.iter().rev() {
        table.define(parse_define_entry(entry)?);
    }
    Ok(table)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::config::SourceReader;
    use crate::diagnostic::Severity;

    fn no_files() -> SourceReader {
        Arc::new(|_: &Path| None)
    }

    fn files(entries: &[(&str, &str)]) -> SourceReader {
        let map: HashMap<PathBuf, String> = entries
            .iter()
            .map(|(path, text)| (PathBuf::from(path), text.to_string()))
            .collect();
        Arc::new(move |p: &Path| map.get(p).cloned())
    }

    fn preprocessor() -> Preprocessor {
        Preprocessor::new(PreprocessorConfig::default().with_reader(no_files()))
    }

    fn values(output: &PreprocessOutput) -> Vec<&str> {
        output
            .tokens
            .iter()
            .filter(|t| t.kind != TokenKind::Eof)
            .map(|t| t.value.as_str())
            .collect()
    }

    fn expand(src: &str) -> Vec<String> {
        let output = preprocessor().process_str(src);
        values(&output).into_iter().map(str::to_string).collect()
    }

    #[test]
    fn variadic_wrapper() {
        assert_eq!(
            expand("#define wrapper(...) __VA_ARGS__\nwrapper(1, 2)\n"),
            ["1", ",", "2"]
        );
    }

    #[test]
    fn stringize_argument() {
        let output = preprocessor().process_str("#define str(a) # a\nstr(x)\n");
        assert_eq!(values(&output), ["\"x\""]);
        assert_eq!(output.tokens[0].kind, TokenKind::String);
    }

    #[test]
    fn concatenate_arguments() {
        let output = preprocessor().process_str("#define concat(a,b) a##b\nconcat(x,y)\n");
        assert_eq!(values(&output), ["xy"]);
        assert_eq!(output.tokens[0].kind, TokenKind::Identifier);
    }

    #[test]
    fn zero_argument_function_macro() {
        assert_eq!(expand("#define M() 0\nM()\n"), ["0"]);
    }

    #[test]
    fn space_before_parenthesis_makes_object_macro() {
        assert_eq!(expand("#define m ()\nm\n"), ["(", ")"]);
        assert_eq!(expand("#define m() 1\nm ( )\n"), ["1"]);
    }

    #[test]
    fn function_macro_without_arguments_is_plain_name() {
        assert_eq!(expand("#define f(x) x\nf + 1\n"), ["f", "+", "1"]);
    }

    #[test]
    fn arguments_may_span_lines() {
        assert_eq!(expand("#define f(x) [x]\nf\n(\n1\n)\n"), ["[", "1", "]"]);
    }

    #[test]
    fn conditional_else_branch() {
        assert_eq!(expand("#if 0\n a\n#else\n nota\n#endif\n"), ["nota"]);
    }

    #[test]
    fn elif_chain_keeps_exactly_one_branch() {
        let src = "#define V 2\n#if V == 1\none\n#elif V == 2\ntwo\n\
                   #elif V == 2\nthree\n#else\nfour\n#endif\n";
        assert_eq!(expand(src), ["two"]);
        let src = "#if 0\none\n#elif 0\ntwo\n#else\nthree\n#endif\n";
        assert_eq!(expand(src), ["three"]);
    }

    #[test]
    fn nested_inactive_regions() {
        let src = "#if 0\n#if 1\na\n#else\nb\n#endif\n#else\nc\n#endif\n";
        assert_eq!(expand(src), ["c"]);
    }

    #[test]
    fn elifdef_and_elifndef() {
        let src = "#define B\n#ifdef A\na\n#elifdef B\nb\n#endif\n\
                   #ifndef B\nx\n#elifndef A\ny\n#endif\n";
        assert_eq!(expand(src), ["b", "y"]);
    }

    #[test]
    fn unbalanced_directives_are_reported() {
        let output = preprocessor().process_str("#if 1\na\n");
        assert_eq!(values(&output), ["a"]);
        assert_eq!(output.diagnostics.len(), 1);
        assert!(output.diagnostics[0].message.contains("unterminated"));
        assert_eq!(output.diagnostics[0].line, Some(1));

        for src in ["#endif\n", "#else\n", "#elif 1\n"] {
            let output = preprocessor().process_str(src);
            assert_eq!(output.diagnostics.len(), 1, "{src}");
            assert!(output.diagnostics[0].is_error());
        }

        let output = preprocessor().process_str("#if 1\n#else\n#else\n#endif\n");
        assert_eq!(output.diagnostics.len(), 1);
    }

    #[test]
    fn unevaluable_condition_fails_open() {
        let output = preprocessor().process_str("#if 1 / 0\nyes\n#else\nno\n#endif\n");
        assert_eq!(values(&output), ["yes"]);
        assert_eq!(output.diagnostics.len(), 1);
        assert_eq!(output.diagnostics[0].severity, Severity::Warning);

        assert_eq!(expand("#if foo(\nyes\n#endif\n"), ["yes"]);
    }

    #[test]
    fn defined_is_resolved_before_expansion() {
        let src = "#define X Y\n#if defined(X) && defined X && !defined Y\nok\n#endif\n";
        assert_eq!(expand(src), ["ok"]);
        assert_eq!(expand("#if defined __LINE__\nbuiltin\n#endif\n"), ["builtin"]);
    }

    #[test]
    fn self_reference_is_not_expanded_again() {
        assert_eq!(expand("#define foo foo + 1\nfoo\n"), ["foo", "+", "1"]);
        let src = "#define x (4 + y)\n#define y (2 * x)\nx y\n";
        assert_eq!(
            expand(src).join(" "),
            "( 4 + ( 2 * x ) ) ( 2 * ( 4 + y ) )"
        );
    }

    #[test]
    fn hash_hash_is_pasted_then_stringized() {
        let src = "#define hash_hash # ## #\n\
                   #define mkstr(a) # a\n\
                   #define in_between(a) mkstr(a)\n\
                   #define join(c, d) in_between(c hash_hash d)\n\
                   join(x, y);\n";
        assert_eq!(expand(src), ["\"x ## y\"", ";"]);
    }

    #[test]
    fn chained_macros_resolve() {
        assert_eq!(expand("#define A B\n#define B C\n#define C 42\nA\n"), ["42"]);
    }

    #[test]
    fn trailing_function_name_takes_following_arguments() {
        assert_eq!(expand("#define f(x) x + 1\n#define g f\ng(2)\n"), ["2", "+", "1"]);
        assert_eq!(expand("#define f(x) x f\nf(1)(2)\n"), ["1", "f", "(", "2", ")"]);
    }

    #[test]
    fn empty_macro_vanishes_and_keeps_comments() {
        let output = preprocessor().process_str("#define E\n/* c */ E x E\n");
        assert_eq!(values(&output), ["x"]);
        assert!(output.tokens[0].has_comments());
    }

    #[test]
    fn gnu_comma_swallowing() {
        let src = "#define F(fmt, ...) f(fmt, ## __VA_ARGS__)\nF(a) F(a, b)\n";
        assert_eq!(expand(src).join(" "), "f ( a ) f ( a , b )");
    }

    #[test]
    fn va_opt() {
        let src = "#define G(x, ...) g(x __VA_OPT__(,) __VA_ARGS__)\nG(1) G(1, 2)\n";
        assert_eq!(expand(src).join(" "), "g ( 1 ) g ( 1 , 2 )");
    }

    #[test]
    fn named_variadic_parameter() {
        let src = "#define P(fmt, args...) p(fmt, args)\nP(s, 1, 2)\n";
        assert_eq!(expand(src).join(" "), "p ( s , 1 , 2 )");
    }

    #[test]
    fn nested_parentheses_in_arguments() {
        assert_eq!(
            expand("#define first(a, b) a\nfirst((1, 2), 3)\n"),
            ["(", "1", ",", "2", ")"]
        );
    }

    #[test]
    fn wrong_argument_count_leaves_invocation() {
        let output = preprocessor().process_str("#define two(a, b) a b\ntwo(1)\n");
        assert_eq!(values(&output), ["two", "(", "1", ")"]);
        assert_eq!(output.diagnostics.len(), 1);
    }

    #[test]
    fn invalid_paste_keeps_tokens() {
        let output = preprocessor().process_str("#define P(a, b) a ## b\nP(+, -)\n");
        assert_eq!(values(&output), ["+", "-"]);
        assert_eq!(output.diagnostics.len(), 1);
    }

    #[test]
    fn recursion_limit_is_reported() {
        let mut config = PreprocessorConfig::default().with_reader(no_files());
        config.recursion_limit = 2;
        let mut pp = Preprocessor::new(config);
        let output = pp.process_str("#define A B\n#define B C\n#define C D\n#define D 1\nA\n");
        assert_eq!(values(&output), ["C"]);
        assert_eq!(output.diagnostics.len(), 1);
        assert!(pp.macros().all_enabled());
    }

    #[test]
    fn expanded_tokens_are_generated_at_invocation() {
        let output = preprocessor().process_str("#define A 1 + 2\nint x = A;\n");
        let tokens = &output.tokens;
        assert!(!tokens[0].generated);
        let one = &tokens[3];
        assert_eq!(one.value, "1");
        assert!(one.generated);
        assert_eq!((one.line, one.column), (2, 8));
        assert!(tokens[4].generated && tokens[5].generated);
        assert!(!tokens[6].generated);
    }

    #[test]
    fn builtin_macros() {
        let mut pp = preprocessor();
        pp.set_build_stamp(BuildStamp::from_unix(0));
        let output = pp.process_str(
            "__LINE__\n__LINE__ __FILE__\n__COUNTER__ __COUNTER__\n__DATE__ __INCLUDE_LEVEL__\n",
        );
        assert_eq!(
            values(&output),
            ["1", "2", "\"<stdin>\"", "0", "1", "\"Jan  1 1970\"", "0"]
        );
    }

    #[test]
    fn line_directive_moves_line_and_file() {
        assert_eq!(
            expand("#line 100 \"renamed.c\"\n__LINE__ __FILE__\n"),
            ["100", "\"renamed.c\""]
        );
        assert_eq!(expand("# 7 \"gen.c\"\n__LINE__\n"), ["7"]);
    }

    #[test]
    fn skipped_text_becomes_trivia() {
        let output = preprocessor().process_str("#if 0\nhidden one\n#endif\nshown\n");
        assert_eq!(values(&output), ["shown"]);
        let skipped: Vec<&Trivia> = output.tokens[0]
            .trivia
            .iter()
            .filter(|t| t.kind == TriviaKind::SkippedText)
            .collect();
        assert_eq!(skipped.len(), 1);
        assert!(skipped[0].text.contains("hidden one"));
    }

    #[test]
    fn error_directive_does_not_stop_processing() {
        let output = preprocessor().process_str("#error stop here\nafter\n");
        assert_eq!(values(&output), ["after"]);
        assert_eq!(output.diagnostics[0].message, "#error stop here");
        assert!(output.diagnostics[0].is_error());
    }

    #[test]
    fn warning_directive_calls_handler() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let config = PreprocessorConfig::default()
            .with_reader(no_files())
            .with_warning_handler(Arc::new(move |msg: &str| {
                if let Ok(mut seen) = sink.lock() {
                    seen.push(msg.to_string());
                }
            }));
        let output = Preprocessor::new(config).process_str("#warning careful\n");
        assert_eq!(output.diagnostics[0].severity, Severity::Warning);
        assert_eq!(*seen.lock().unwrap(), ["careful"]);
    }

    #[test]
    fn pragma_operator_is_removed() {
        assert_eq!(expand("_Pragma(\"pack(1)\") x\n"), ["x"]);
    }

    #[test]
    fn digraph_directive() {
        assert_eq!(expand("%:define D 5\nD\n"), ["5"]);
    }

    #[test]
    fn shift_survives_macro_expansion() {
        let output = preprocessor().process_str("#define SHR(a) a >> 1\nSHR(x)\n");
        let tokens = &output.tokens;
        assert_eq!(tokens[1].value, ">");
        assert!(tokens[1].is_adjacent_to(&tokens[2]));
    }

    #[test]
    fn includes_define_macros_and_drop_tokens() {
        let reader = files(&[
            ("src/main.c", ""),
            ("src/config.h", "#pragma once\n#define LIMIT 10\nint hidden;\n"),
        ]);
        let config = PreprocessorConfig::default().with_reader(reader);
        let mut pp = Preprocessor::new(config);
        let output = pp.process_file(
            Path::new("src/main.c"),
            "#include \"config.h\"\n#include \"config.h\"\nint a[LIMIT];\n",
        );
        assert_eq!(values(&output), ["int", "a", "[", "10", "]", ";"]);
        assert_eq!(output.included_files, [PathBuf::from("src/config.h")]);
        assert!(output.diagnostics.is_empty());
    }

    #[test]
    fn angle_include_needs_include_directories() {
        let reader = files(&[("src/a.h", "#define FOUND 1\n")]);
        let mut pp = Preprocessor::new(PreprocessorConfig::default().with_reader(reader.clone()));
        let output = pp.process_file(Path::new("src/main.c"), "#include <a.h>\nFOUND\n");
        assert_eq!(values(&output), ["FOUND"]);
        assert_eq!(output.diagnostics.len(), 1);

        let config = PreprocessorConfig::default()
            .with_reader(reader)
            .with_include_dir("src");
        let mut pp = Preprocessor::new(config);
        let output = pp.process_file(Path::new("main.c"), "#include <a.h>\nFOUND\n");
        assert_eq!(values(&output), ["1"]);
    }

    #[test]
    fn included_tokens_can_be_emitted() {
        let reader = files(&[("inc.h", "int from_header;\n")]);
        let mut config = PreprocessorConfig::default().with_reader(reader);
        config.emit_included_tokens = true;
        let output = Preprocessor::new(config).process_str("#include \"inc.h\"\nint x;\n");
        assert_eq!(values(&output), ["int", "from_header", ";", "int", "x", ";"]);
        assert!(output.tokens[1].generated);
        assert!(!output.tokens[4].generated);
    }

    #[test]
    fn recursive_include_is_skipped() {
        let reader = files(&[("a.h", "#include \"b.h\"\n"), ("b.h", "#include \"a.h\"\n")]);
        let output = Preprocessor::new(PreprocessorConfig::default().with_reader(reader))
            .process_str("#include \"a.h\"\n");
        assert_eq!(output.diagnostics.len(), 1);
        assert!(output.diagnostics[0].message.contains("recursive"));
        assert_eq!(output.diagnostics[0].file, Some(PathBuf::from("b.h")));
    }

    #[test]
    fn has_include() {
        let reader = files(&[("present.h", "")]);
        let output = Preprocessor::new(PreprocessorConfig::default().with_reader(reader))
            .process_str(
                "#if __has_include(\"present.h\") && !__has_include(<absent.h>)\nyes\n#endif\n",
            );
        assert_eq!(values(&output), ["yes"]);
    }

    #[test]
    fn force_includes_run_first() {
        let reader = files(&[("prelude.h", "#define PRELUDE 7\n")]);
        let mut config = PreprocessorConfig::default().with_reader(reader);
        config.force_includes.push(PathBuf::from("prelude.h"));
        let output = Preprocessor::new(config).process_str("PRELUDE\n");
        assert_eq!(values(&output), ["7"]);
    }

    #[test]
    fn define_entries() {
        let defines = ["X=2".to_string(), "X=1".to_string(), "Y".to_string()];
        let table = baseline_macros(&defines).unwrap();
        assert_eq!(table.get("X").map(Macro::body_text), Some("2".to_string()));
        assert_eq!(table.get("Y").map(Macro::body_text), Some("1".to_string()));
        assert!(table.get("X").is_some_and(|m| m.is_builtin));

        let sq = parse_define_entry("SQ(x)=((x)*(x))").unwrap();
        assert!(sq.is_function_like);
        assert!(parse_define_entry("=1").is_err());
    }

    #[test]
    fn malformed_definitions_are_reported() {
        for src in [
            "#define\n",
            "#define f(a, a) a\n",
            "#define g(x) #y\n",
            "#define h ## x\n",
        ] {
            let output = preprocessor().process_str(src);
            assert_eq!(output.diagnostics.len(), 1, "{src}");
        }
    }

    #[test]
    fn redefinition_warns_only_when_different() {
        let output = preprocessor().process_str("#define A 1\n#define A 1\n#define A 2\n");
        assert_eq!(output.diagnostics.len(), 1);
    }

    #[test]
    fn macros_are_enabled_after_processing() {
        let mut pp = preprocessor();
        pp.process_str("#define f(x) f(x) g(x)\n#define g(x) f(x)\nf(g(1))\n");
        assert!(pp.macros().all_enabled());
    }
}

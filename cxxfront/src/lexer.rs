//! Hand-written C/C++ lexer.
//!
//! The lexer works on a "spliced" view of the source where every backslash
//! followed by a line break has been removed, while each remaining character
//! keeps the physical line, column and byte range it was read from. Literal
//! values are built from the spliced characters, original text is sliced from
//! the source.

use std::mem;

use crate::token::{
    PUNCTUATORS, Token, TokenKind, Trivia, is_identifier_continue, is_identifier_start,
    is_keyword, normalize_digraph,
};

const MAX_RAW_DELIMITER: usize = 16;

#[derive(Clone, Copy, Debug)]
struct SourceChar {
    ch: char,
    line: usize,
    column: usize,
    start: usize,
    end: usize,
}

/// Converts source text into tokens
#[derive(Clone, Debug, Default)]
pub struct Lexer {
    join_strings: bool,
}

impl Lexer {
    /// Create a lexer that joins adjacent string literals
    #[must_use]
    pub fn new() -> Self {
        Self { join_strings: true }
    }

    /// Create a lexer that leaves adjacent string literals separate.
    /// The preprocessor works on this raw form.
    #[must_use]
    pub fn raw() -> Self {
        Self {
            join_strings: false,
        }
    }

    /// Lex a whole file. The result always ends with an `Eof` token.
    #[must_use]
    pub fn lex(&self, text: &str) -> Vec<Token> {
        let tokens = Scanner::new(text, 1, 0, true).run(true);
        if self.join_strings {
            join_string_literals(tokens)
        } else {
            tokens
        }
    }

    /// Lex a fragment such as a directive body or a pasted spelling.
    /// Positions start at `line`/`column`; no `Eof` token is produced and
    /// `#` is never treated as the start of a directive.
    #[must_use]
    pub fn tokenize_fragment(&self, text: &str, line: usize, column: usize) -> Vec<Token> {
        Scanner::new(text, line, column, false).run(false)
    }
}

/// Lex `text` with the default lexer
#[must_use]
pub fn lex(text: &str) -> Vec<Token> {
    Lexer::new().lex(text)
}

fn splice(text: &str, first_line: usize, first_column: usize) -> Vec<SourceChar> {
    let mut out = Vec::with_capacity(text.len());
    let mut line = first_line;
    let mut column = first_column;
    let mut it = text.char_indices().peekable();

    while let Some((start, ch)) = it.next() {
        match ch {
            '\\' => {
                let mut look = it.clone();
                match look.next() {
                    Some((_, '\n')) => {
                        it.next();
                        line += 1;
                        column = 0;
                        continue;
                    }
                    Some((_, '\r')) => {
                        it.next();
                        if let Some(&(_, '\n')) = it.peek() {
                            it.next();
                        }
                        line += 1;
                        column = 0;
                        continue;
                    }
                    _ => {
                        out.push(SourceChar {
                            ch,
                            line,
                            column,
                            start,
                            end: start + 1,
                        });
                        column += 1;
                    }
                }
            }
            '\r' => {
                let mut end = start + 1;
                if let Some(&(_, '\n')) = it.peek() {
                    it.next();
                    end += 1;
                }
                out.push(SourceChar {
                    ch: '\n',
                    line,
                    column,
                    start,
                    end,
                });
                line += 1;
                column = 0;
            }
            '\n' => {
                out.push(SourceChar {
                    ch,
                    line,
                    column,
                    start,
                    end: start + 1,
                });
                line += 1;
                column = 0;
            }
            _ => {
                out.push(SourceChar {
                    ch,
                    line,
                    column,
                    start,
                    end: start + ch.len_utf8(),
                });
                column += 1;
            }
        }
    }
    out
}

struct Scanner<'a> {
    text: &'a str,
    chars: Vec<SourceChar>,
    pos: usize,
    directives: bool,
    at_line_start: bool,
    trivia: Vec<Trivia>,
    tokens: Vec<Token>,
    end_line: usize,
    end_column: usize,
}

impl<'a> Scanner<'a> {
    fn new(text: &'a str, line: usize, column: usize, directives: bool) -> Self {
        let chars = splice(text, line, column);
        let (end_line, end_column) = chars
            .last()
            .map_or((line, column), |c| {
                if c.ch == '\n' {
                    (c.line + 1, 0)
                } else {
                    (c.line, c.column + 1)
                }
            });
        Self {
            text,
            chars,
            pos: 0,
            directives,
            at_line_start: true,
            trivia: Vec::new(),
            tokens: Vec::new(),
            end_line,
            end_column,
        }
    }

    fn peek(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).map(|c| c.ch)
    }

    fn run(mut self, with_eof: bool) -> Vec<Token> {
        while let Some(ch) = self.peek(0) {
            if ch == '\n' {
                self.at_line_start = true;
                self.pos += 1;
            } else if ch.is_whitespace() {
                self.pos += 1;
            } else if ch == '/' && self.peek(1) == Some('/') {
                self.line_comment();
            } else if ch == '/' && self.peek(1) == Some('*') {
                self.block_comment();
            } else if self.directives
                && self.at_line_start
                && (ch == '#' || (ch == '%' && self.peek(1) == Some(':')))
            {
                self.directive();
            } else {
                self.at_line_start = false;
                self.token();
            }
        }

        if with_eof {
            let mut eof = Token::eof(self.end_line, self.end_column);
            eof.trivia = mem::take(&mut self.trivia);
            self.tokens.push(eof);
        }
        self.tokens
    }

    fn original(&self, from: usize, to: usize) -> &'a str {
        if from >= to {
            return "";
        }
        &self.text[self.chars[from].start..self.chars[to - 1].end]
    }

    fn value(&self, from: usize, to: usize) -> String {
        self.chars[from..to].iter().map(|c| c.ch).collect()
    }

    fn emit(&mut self, kind: TokenKind, from: usize, to: usize, value: String) {
        let first = self.chars[from];
        let token = Token {
            kind,
            value,
            original: self.original(from, to).to_string(),
            line: first.line,
            column: first.column,
            trivia: mem::take(&mut self.trivia),
            generated: false,
            painted: false,
        };
        self.tokens.push(token);
        self.pos = to;
    }

    fn line_comment(&mut self) {
        let from = self.pos;
        let mut to = from;
        while to < self.chars.len() && self.chars[to].ch != '\n' {
            to += 1;
        }
        self.push_comment(from, to);
    }

    fn block_comment(&mut self) {
        let from = self.pos;
        let mut to = from + 2;
        loop {
            if to >= self.chars.len() {
                log::debug!(
                    "unterminated block comment at line {}",
                    self.chars[from].line
                );
                break;
            }
            if self.chars[to].ch == '*' && self.chars.get(to + 1).is_some_and(|c| c.ch == '/') {
                to += 2;
                break;
            }
            to += 1;
        }
        self.push_comment(from, to);
    }

    fn push_comment(&mut self, from: usize, to: usize) {
        let first = self.chars[from];
        let text = self.original(from, to).to_string();
        self.trivia.push(Trivia::comment(text, first.line, first.column));
        self.pos = to;
    }

    /// A directive runs to the end of the logical line. Block comments may
    /// carry it over physical lines; quotes hide comment openers.
    fn directive(&mut self) {
        let from = self.pos;
        let mut to = from;
        let mut quote: Option<char> = None;
        while to < self.chars.len() {
            let ch = self.chars[to].ch;
            if let Some(q) = quote {
                if ch == '\\' {
                    to += 2;
                    continue;
                }
                if ch == q || ch == '\n' {
                    quote = None;
                    if ch == '\n' {
                        break;
                    }
                }
                to += 1;
                continue;
            }
            match ch {
                '\n' => break,
                '"' | '\'' => {
                    quote = Some(ch);
                    to += 1;
                }
                '/' if self.chars.get(to + 1).is_some_and(|c| c.ch == '/') => {
                    while to < self.chars.len() && self.chars[to].ch != '\n' {
                        to += 1;
                    }
                }
                '/' if self.chars.get(to + 1).is_some_and(|c| c.ch == '*') => {
                    to += 2;
                    while to < self.chars.len()
                        && !(self.chars[to].ch == '*'
                            && self.chars.get(to + 1).is_some_and(|c| c.ch == '/'))
                    {
                        to += 1;
                    }
                    to = (to + 2).min(self.chars.len());
                }
                _ => to += 1,
            }
        }
        let to = to.min(self.chars.len());
        let value = self.value(from, to);
        self.emit(TokenKind::Preprocessor, from, to, value);
        self.at_line_start = false;
    }

    fn token(&mut self) {
        let ch = self.chars[self.pos].ch;

        if ch.is_ascii_digit() || (ch == '.' && self.peek(1).is_some_and(|c| c.is_ascii_digit())) {
            self.number();
            return;
        }

        if is_identifier_start(ch) {
            if let Some((prefix_len, raw)) = self.literal_prefix() {
                let ok = if raw {
                    self.raw_string(prefix_len)
                } else {
                    let quote = self.chars[self.pos + prefix_len].ch;
                    self.quoted(prefix_len, quote)
                };
                if ok {
                    return;
                }
            }
            self.identifier();
            return;
        }

        if ch == '"' || ch == '\'' {
            if !self.quoted(0, ch) {
                self.unknown();
            }
            return;
        }

        self.punctuator();
    }

    fn number(&mut self) {
        let from = self.pos;
        let mut to = from;
        while let Some(c) = self.chars.get(to).map(|c| c.ch) {
            let next = self.chars.get(to + 1).map(|c| c.ch);
            if matches!(c, 'e' | 'E' | 'p' | 'P') && matches!(next, Some('+' | '-')) {
                to += 2;
            } else if c.is_ascii_alphanumeric() || c == '_' || c == '.' {
                to += 1;
            } else if c == '\'' && next.is_some_and(|n| n.is_ascii_alphanumeric()) {
                to += 2;
            } else {
                break;
            }
        }
        let value = self.value(from, to);
        self.emit(TokenKind::Number, from, to, value);
    }

    fn identifier(&mut self) {
        let from = self.pos;
        let mut to = from;
        while self.chars.get(to).is_some_and(|c| is_identifier_continue(c.ch)) {
            to += 1;
        }
        let value = self.value(from, to);
        let kind = if is_keyword(&value) {
            TokenKind::Keyword
        } else {
            TokenKind::Identifier
        };
        self.emit(kind, from, to, value);
    }

    /// Detect `u8`, `u`, `U`, `L` and raw `R` prefixes directly followed by a quote.
    /// Returns the prefix length and whether the literal is raw.
    fn literal_prefix(&self) -> Option<(usize, bool)> {
        let mut word = String::new();
        let mut len = 0;
        while let Some(c) = self.peek(len) {
            if !is_identifier_continue(c) || len > 3 {
                break;
            }
            word.push(c);
            len += 1;
        }
        let quote = self.peek(len)?;
        match (word.as_str(), quote) {
            ("u8" | "u" | "U" | "L", '"' | '\'') => Some((len, false)),
            ("R" | "u8R" | "uR" | "UR" | "LR", '"') => Some((len, true)),
            _ => None,
        }
    }

    fn ud_suffix_end(&self, mut to: usize) -> usize {
        if self.chars.get(to).is_some_and(|c| is_identifier_start(c.ch)) {
            while self.chars.get(to).is_some_and(|c| is_identifier_continue(c.ch)) {
                to += 1;
            }
        }
        to
    }

    fn quoted(&mut self, prefix_len: usize, quote: char) -> bool {
        let from = self.pos;
        let mut to = from + prefix_len + 1;
        loop {
            let Some(c) = self.chars.get(to).map(|c| c.ch) else {
                return false;
            };
            match c {
                '\n' => return false,
                '\\' => to += 2,
                c if c == quote => {
                    to += 1;
                    break;
                }
                _ => to += 1,
            }
        }
        let to = self.ud_suffix_end(to.min(self.chars.len()));
        let kind = if quote == '"' {
            TokenKind::String
        } else {
            TokenKind::Character
        };
        let value = self.value(from, to);
        self.emit(kind, from, to, value);
        true
    }

    fn raw_string(&mut self, prefix_len: usize) -> bool {
        let from = self.pos;
        let mut to = from + prefix_len + 1;
        let mut delimiter = String::new();
        loop {
            let Some(c) = self.chars.get(to).map(|c| c.ch) else {
                return false;
            };
            if c == '(' {
                to += 1;
                break;
            }
            if c.is_whitespace()
                || matches!(c, ')' | '\\' | '"')
                || delimiter.len() >= MAX_RAW_DELIMITER
            {
                return false;
            }
            delimiter.push(c);
            to += 1;
        }

        let closing: Vec<char> = std::iter::once(')')
            .chain(delimiter.chars())
            .chain(std::iter::once('"'))
            .collect();
        while to + closing.len() <= self.chars.len() {
            if self.chars[to..to + closing.len()]
                .iter()
                .map(|c| c.ch)
                .eq(closing.iter().copied())
            {
                let end = self.ud_suffix_end(to + closing.len());
                let value = self.value(from, end);
                self.emit(TokenKind::String, from, end, value);
                return true;
            }
            to += 1;
        }
        false
    }

    fn punctuator(&mut self) {
        let from = self.pos;
        for punct in PUNCTUATORS {
            let len = punct.chars().count();
            let matches = punct
                .chars()
                .enumerate()
                .all(|(k, p)| self.peek(k) == Some(p));
            if !matches {
                continue;
            }
            // `<::` not followed by `:` or `>` is `<` `::`
            if *punct == "<:"
                && self.peek(2) == Some(':')
                && !matches!(self.peek(3), Some(':' | '>'))
            {
                continue;
            }
            let value = normalize_digraph(punct).to_string();
            self.emit(TokenKind::Punctuator, from, from + len, value);
            return;
        }
        self.unknown();
    }

    fn unknown(&mut self) {
        let from = self.pos;
        let value = self.value(from, from + 1);
        log::trace!(
            "unknown character {:?} at {}:{}",
            value,
            self.chars[from].line,
            self.chars[from].column
        );
        self.emit(TokenKind::UnknownChar, from, from + 1, value);
    }
}

/// Numeric base of an integer or floating literal
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Radix {
    /// `0b` prefix
    Binary,
    /// Leading `0`
    Octal,
    /// No prefix
    Decimal,
    /// `0x` prefix
    Hexadecimal,
}

impl Radix {
    const fn value(self) -> u32 {
        match self {
            Radix::Binary => 2,
            Radix::Octal => 8,
            Radix::Decimal => 10,
            Radix::Hexadecimal => 16,
        }
    }
}

/// A classified numeric literal
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NumberLiteral {
    /// Numeric base
    pub radix: Radix,
    /// Floating literal
    pub is_float: bool,
    /// Digits without base prefix, separators and suffix
    pub digits: String,
    /// Suffix as written
    pub suffix: String,
}

impl NumberLiteral {
    /// Integer value, `None` for floats or overflow
    #[must_use]
    pub fn integer_value(&self) -> Option<u64> {
        if self.is_float {
            return None;
        }
        if self.digits.is_empty() {
            return Some(0);
        }
        u64::from_str_radix(&self.digits, self.radix.value()).ok()
    }
}

fn is_integer_suffix(suffix: &str) -> bool {
    let mut rest = suffix;
    let mut unsigned = false;
    if let Some(r) = rest.strip_prefix(['u', 'U']) {
        unsigned = true;
        rest = r;
    }
    for size in ["ll", "LL", "l", "L", "z", "Z"] {
        if let Some(r) = rest.strip_prefix(size) {
            rest = r;
            break;
        }
    }
    if !unsigned && let Some(r) = rest.strip_prefix(['u', 'U']) {
        rest = r;
    }
    rest.is_empty()
}

fn is_float_suffix(suffix: &str) -> bool {
    matches!(
        suffix.to_ascii_lowercase().as_str(),
        "" | "f" | "l" | "f16" | "f32" | "f64" | "f128" | "bf16"
    )
}

/// Classify a pp-number. Returns `None` when the spelling is not a valid
/// C/C++ numeric literal.
#[must_use]
pub fn classify_number(text: &str) -> Option<NumberLiteral> {
    let clean: String = text.chars().filter(|&c| c != '\'').collect();
    let lower = clean.to_ascii_lowercase();

    let (radix, body) = if lower.starts_with("0x") {
        (Radix::Hexadecimal, &clean[2..])
    } else if lower.starts_with("0b") {
        (Radix::Binary, &clean[2..])
    } else {
        (Radix::Decimal, clean.as_str())
    };

    let chars: Vec<char> = body.chars().collect();
    let mut i = 0;
    let mut is_float = false;
    let digit_ok = |c: char| match radix {
        Radix::Hexadecimal => c.is_ascii_hexdigit(),
        Radix::Binary => c == '0' || c == '1',
        _ => c.is_ascii_digit(),
    };

    while i < chars.len() && digit_ok(chars[i]) {
        i += 1;
    }
    if radix != Radix::Binary && i < chars.len() && chars[i] == '.' {
        is_float = true;
        i += 1;
        while i < chars.len() && digit_ok(chars[i]) {
            i += 1;
        }
    }
    let exponent = match radix {
        Radix::Hexadecimal => ['p', 'P'],
        _ => ['e', 'E'],
    };
    if radix != Radix::Binary && i < chars.len() && exponent.contains(&chars[i]) {
        let mut j = i + 1;
        if j < chars.len() && (chars[j] == '+' || chars[j] == '-') {
            j += 1;
        }
        let start = j;
        while j < chars.len() && chars[j].is_ascii_digit() {
            j += 1;
        }
        if j > start {
            is_float = true;
            i = j;
        } else if radix == Radix::Decimal {
            return None;
        }
    }

    let digits: String = chars[..i].iter().collect();
    let suffix: String = chars[i..].iter().collect();
    if digits.is_empty() || digits == "." {
        return None;
    }

    let radix = if radix == Radix::Decimal
        && !is_float
        && digits.len() > 1
        && digits.starts_with('0')
    {
        if !digits.chars().all(|c| ('0'..='7').contains(&c)) {
            return None;
        }
        Radix::Octal
    } else {
        radix
    };

    let valid_suffix = suffix.starts_with('_')
        || if is_float {
            is_float_suffix(&suffix)
        } else {
            is_integer_suffix(&suffix)
        };
    if !valid_suffix {
        return None;
    }

    let digits = if radix == Radix::Octal {
        digits.trim_start_matches('0').to_string()
    } else {
        digits
    };

    Some(NumberLiteral {
        radix,
        is_float,
        digits,
        suffix,
    })
}

/// Split a string literal spelling into (prefix, content, ud-suffix).
/// Raw string contents are escaped so they can be joined with ordinary ones.
fn split_string_literal(value: &str) -> Option<(&str, String, &str)> {
    let quote = value.find('"')?;
    let prefix = &value[..quote];
    let last = value.rfind('"')?;
    let suffix = &value[last + 1..];
    if prefix.ends_with('R') {
        let open = value[quote..].find('(')? + quote;
        let delimiter = &value[quote + 1..open];
        let close = last.checked_sub(delimiter.len() + 1)?;
        let raw = value.get(open + 1..close)?;
        let escaped = raw
            .replace('\\', "\\\\")
            .replace('"', "\\\"")
            .replace('\n', "\\n");
        return Some((&prefix[..prefix.len() - 1], escaped, suffix));
    }
    if last <= quote {
        return None;
    }
    Some((prefix, value[quote + 1..last].to_string(), suffix))
}

/// Merge runs of adjacent string literals into single tokens.
///
/// The joined token keeps the position of the first literal, the first
/// non-empty encoding prefix and the last ud-suffix. Comments between the
/// pieces are appended to the joined token's trivia.
#[must_use]
pub fn join_string_literals(tokens: Vec<Token>) -> Vec<Token> {
    let mut out: Vec<Token> = Vec::with_capacity(tokens.len());
    let mut run: Vec<Token> = Vec::new();

    for token in tokens {
        if token.kind == TokenKind::String {
            run.push(token);
        } else {
            merge_run(mem::take(&mut run), &mut out);
            out.push(token);
        }
    }
    merge_run(run, &mut out);
    out
}

fn merge_run(run: Vec<Token>, out: &mut Vec<Token>) {
    if run.len() <= 1 {
        out.extend(run);
        return;
    }
    let pieces: Option<Vec<(String, String, String)>> = run
        .iter()
        .map(|t| {
            split_string_literal(&t.value).map(|(p, c, s)| (p.to_string(), c, s.to_string()))
        })
        .collect();
    let Some(pieces) = pieces else {
        out.extend(run);
        return;
    };

    let prefix = pieces
        .iter()
        .map(|(p, _, _)| p.as_str())
        .find(|p| !p.is_empty())
        .unwrap_or("");
    let suffix = pieces
        .iter()
        .rev()
        .map(|(_, _, s)| s.as_str())
        .find(|s| !s.is_empty())
        .unwrap_or("");
    let content: String = pieces.iter().map(|(_, c, _)| c.as_str()).collect();
    let value = format!("{prefix}\"{content}\"{suffix}");
    let original = run
        .iter()
        .map(|t| t.original.as_str())
        .collect::<Vec<_>>()
        .join(" ");
    let generated = run.iter().any(|t| t.generated);

    let mut tokens = run.into_iter();
    if let Some(mut first) = tokens.next() {
        for rest in tokens {
            first.trivia.extend(rest.trivia);
        }
        first.value = value;
        first.original = original;
        first.generated = generated;
        out.push(first);
    }
}

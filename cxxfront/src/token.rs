use serde::{Deserialize, Serialize};

/// Check if a character can start an identifier (letter, underscore or dollar)
pub const fn is_identifier_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_' || c == '$'
}

/// Check if a character can continue an identifier (letter, digit, underscore or dollar)
pub const fn is_identifier_continue(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '$'
}

/// C and C++ keywords recognised by the lexer.
pub const KEYWORDS: &[&str] = &[
    "alignas",
    "alignof",
    "asm",
    "auto",
    "bool",
    "break",
    "case",
    "catch",
    "char",
    "char8_t",
    "char16_t",
    "char32_t",
    "class",
    "co_await",
    "co_return",
    "co_yield",
    "concept",
    "const",
    "const_cast",
    "consteval",
    "constexpr",
    "constinit",
    "continue",
    "decltype",
    "default",
    "delete",
    "do",
    "double",
    "dynamic_cast",
    "else",
    "enum",
    "explicit",
    "export",
    "extern",
    "false",
    "float",
    "for",
    "friend",
    "goto",
    "if",
    "inline",
    "int",
    "long",
    "mutable",
    "namespace",
    "new",
    "noexcept",
    "nullptr",
    "operator",
    "private",
    "protected",
    "public",
    "register",
    "reinterpret_cast",
    "requires",
    "return",
    "short",
    "signed",
    "sizeof",
    "static",
    "static_assert",
    "static_cast",
    "struct",
    "switch",
    "template",
    "this",
    "thread_local",
    "throw",
    "true",
    "try",
    "typedef",
    "typeid",
    "typename",
    "union",
    "unsigned",
    "using",
    "virtual",
    "void",
    "volatile",
    "wchar_t",
    "while",
    "_Alignas",
    "_Alignof",
    "_Atomic",
    "_Bool",
    "_Complex",
    "_Generic",
    "_Imaginary",
    "_Noreturn",
    "_Static_assert",
    "_Thread_local",
];

/// Punctuators ordered so that a first-match scan yields the longest match.
///
/// `>>` and `>>=` are deliberately absent: the lexer always splits them so that
/// nested template argument lists close, and the grammar glues them back with
/// the adjacency matcher.
pub const PUNCTUATORS: &[&str] = &[
    "%:%:", "...", "<<=", "->*", "<=>", "::", "->", "++", "--", "<<", "<=", ">=", "==", "!=",
    "&&", "||", "+=", "-=", "*=", "/=", "%=", "&=", "|=", "^=", "##", ".*", "<:", ":>", "<%",
    "%>", "%:", "{", "}", "[", "]", "(", ")", ";", ":", ",", ".", "?", "~", "!", "+", "-", "*",
    "/", "%", "^", "&", "|", "=", "<", ">", "#",
];

/// Check if a word is a C or C++ keyword
pub fn is_keyword(word: &str) -> bool {
    KEYWORDS.contains(&word)
}

/// Map a digraph to the punctuator it stands for
pub fn normalize_digraph(punct: &str) -> &str {
    match punct {
        "<:" => "[",
        ":>" => "]",
        "<%" => "{",
        "%>" => "}",
        "%:" => "#",
        "%:%:" => "##",
        other => other,
    }
}

/// Kind of a lexical token
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TokenKind {
    /// Identifier that is not a keyword
    Identifier,
    /// Reserved word
    Keyword,
    /// Integer or floating literal (a pp-number)
    Number,
    /// String literal, possibly prefixed or raw
    String,
    /// Character literal, possibly prefixed
    Character,
    /// Operator or punctuator
    Punctuator,
    /// A whole preprocessor directive line
    Preprocessor,
    /// Character (or unterminated literal start) the lexer could not classify
    UnknownChar,
    /// End of input
    Eof,
}

/// Coarse token classes used by grammar class matchers
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TokenClass {
    /// Any keyword
    Keyword,
    /// Number, string or character literal
    Literal,
    /// Any punctuator
    Punctuator,
    /// Identifier or keyword
    Word,
}

impl TokenClass {
    /// Check whether a token kind belongs to this class
    #[must_use]
    pub const fn contains(self, kind: TokenKind) -> bool {
        match self {
            TokenClass::Keyword => matches!(kind, TokenKind::Keyword),
            TokenClass::Literal => matches!(
                kind,
                TokenKind::Number | TokenKind::String | TokenKind::Character
            ),
            TokenClass::Punctuator => matches!(kind, TokenKind::Punctuator),
            TokenClass::Word => matches!(kind, TokenKind::Identifier | TokenKind::Keyword),
        }
    }
}

/// Kind of non-significant text attached to a token
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TriviaKind {
    /// `//` or `/* */` comment
    Comment,
    /// Text removed by conditional compilation
    SkippedText,
}

/// Non-significant text preceding a token
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trivia {
    /// What the text is
    pub kind: TriviaKind,
    /// The raw text
    pub text: String,
    /// 1-based line where the text starts
    pub line: usize,
    /// 0-based column where the text starts
    pub column: usize,
}

impl Trivia {
    /// Create a comment trivia
    #[must_use]
    pub fn comment(text: impl Into<String>, line: usize, column: usize) -> Self {
        Self {
            kind: TriviaKind::Comment,
            text: text.into(),
            line,
            column,
        }
    }

    /// Create a skipped-text trivia
    #[must_use]
    pub fn skipped(text: impl Into<String>, line: usize, column: usize) -> Self {
        Self {
            kind: TriviaKind::SkippedText,
            text: text.into(),
            line,
            column,
        }
    }
}

/// A classified token
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    /// Token kind
    pub kind: TokenKind,
    /// Literal value (digraphs normalized, line continuations removed)
    pub value: String,
    /// Source text the token was read from, before expansion
    pub original: String,
    /// 1-based line
    pub line: usize,
    /// 0-based column
    pub column: usize,
    /// Comments and skipped text preceding the token
    pub trivia: Vec<Trivia>,
    /// True when the token does not come verbatim from the analysed file
    pub generated: bool,
    /// Painted blue: names a macro that must never expand again
    #[serde(skip)]
    pub(crate) painted: bool,
}

impl Token {
    /// Create a token whose original text equals its value
    #[must_use]
    pub fn new(kind: TokenKind, value: impl Into<String>, line: usize, column: usize) -> Self {
        let value = value.into();
        Self {
            kind,
            original: value.clone(),
            value,
            line,
            column,
            trivia: Vec::new(),
            generated: false,
            painted: false,
        }
    }

    /// End of input marker
    #[must_use]
    pub fn eof(line: usize, column: usize) -> Self {
        Self::new(TokenKind::Eof, "", line, column)
    }

    /// Check whether the token is the given punctuator
    #[must_use]
    pub fn is_punct(&self, punct: &str) -> bool {
        self.kind == TokenKind::Punctuator && self.value == punct
    }

    /// Identifiers and keywords are both candidates for macro names
    #[must_use]
    pub fn is_word(&self) -> bool {
        TokenClass::Word.contains(self.kind)
    }

    /// Column right after the token's value on its line
    #[must_use]
    pub fn end_column(&self) -> usize {
        self.column + self.value.chars().count()
    }

    /// Check whether `next` starts exactly where this token ends
    #[must_use]
    pub fn is_adjacent_to(&self, next: &Token) -> bool {
        self.line == next.line && self.end_column() == next.column
    }

    /// Check whether the token carries comment trivia
    #[must_use]
    pub fn has_comments(&self) -> bool {
        self.trivia.iter().any(|t| t.kind == TriviaKind::Comment)
    }
}

/// Tokens of a preprocessor `#if` expression
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum ExprToken {
    Number(i64),
    LParen,
    RParen,
    Not,
    Plus,
    Minus,
    Multiply,
    Divide,
    Modulo,
    Equal,
    NotEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    And,
    Or,
    BitAnd,
    BitOr,
    BitXor,
    BitNot,
    ShiftLeft,
    ShiftRight,
    Question,
    Colon,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adjacency_requires_same_line_and_contiguous_columns() {
        let a = Token::new(TokenKind::Punctuator, ">", 1, 4);
        let b = Token::new(TokenKind::Punctuator, ">", 1, 5);
        let spaced = Token::new(TokenKind::Punctuator, ">", 1, 6);
        let next_line = Token::new(TokenKind::Punctuator, ">", 2, 5);
        assert!(a.is_adjacent_to(&b));
        assert!(!a.is_adjacent_to(&spaced));
        assert!(!a.is_adjacent_to(&next_line));
    }

    #[test]
    fn punctuator_table_prefers_longest_match() {
        for (i, p) in PUNCTUATORS.iter().enumerate() {
            for longer in &PUNCTUATORS[i + 1..] {
                assert!(
                    !(longer.len() > p.len() && longer.starts_with(p)),
                    "{longer} is shadowed by {p}"
                );
            }
        }
    }

    #[test]
    fn token_classes() {
        assert!(TokenClass::Literal.contains(TokenKind::Character));
        assert!(TokenClass::Word.contains(TokenKind::Keyword));
        assert!(!TokenClass::Keyword.contains(TokenKind::Identifier));
    }
}

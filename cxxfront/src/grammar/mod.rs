//! Grammar definitions for the parsing machine.
//!
//! A grammar is a set of rules, each defined by an [`Expr`] over token
//! matchers, plus a root rule. Grammars are compiled into a flat
//! [`Program`] by [`compile`] and run by [`crate::machine::Machine`].
//!
//! ```
//! use cxxfront::grammar::{GrammarBuilder, compile, kind, rule, value};
//! use cxxfront::seq;
//! use cxxfront::TokenKind;
//!
//! #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
//! enum Rule { Call, Args }
//!
//! let mut b = GrammarBuilder::new();
//! b.rule(Rule::Call).is(seq![kind(TokenKind::Identifier), "(", rule(Rule::Args), ")"]);
//! b.rule(Rule::Args).is(value("x").zero_or_more()).skip();
//! b.set_root(Rule::Call);
//! let program = compile(&b.build()).unwrap();
//! assert!(program.len() > 4);
//! ```

pub mod compiler;

use std::fmt::Debug;
use std::hash::Hash;

pub use compiler::{Instruction, Matcher, Program, RuleInfo, compile};

use crate::token::{TokenClass, TokenKind};

/// Identifier of a grammar rule, usually a fieldless enum
pub trait RuleId: Copy + Eq + Hash + Debug + Send + Sync + 'static {}

impl<T: Copy + Eq + Hash + Debug + Send + Sync + 'static> RuleId for T {}

/// Parsing expression over tokens
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Expr<R> {
    /// All in order
    Sequence(Vec<Expr<R>>),
    /// First alternative that matches
    FirstOf(Vec<Expr<R>>),
    /// Zero or one
    Optional(Box<Expr<R>>),
    /// Any number of repetitions
    ZeroOrMore(Box<Expr<R>>),
    /// At least one repetition
    OneOrMore(Box<Expr<R>>),
    /// Succeeds if the expression matches, consuming nothing
    Next(Box<Expr<R>>),
    /// Succeeds if the expression does not match, consuming nothing
    NextNot(Box<Expr<R>>),
    /// Another rule
    Rule(R),
    /// Token of a kind
    Kind(TokenKind),
    /// Token with a value
    Value(String),
    /// Token of a class
    Class(TokenClass),
    /// A balanced run from an `open` value to its matching `close` value
    Bridge(String, String),
    /// Zero width: the previous token ends where the current one starts
    Adjacent,
    /// The rest of the current line
    TillNewLine,
    /// Any token except end of input
    AnyToken,
    /// End of input, not consumed
    EndOfInput,
    /// Never matches
    Nothing,
    /// With recovery enabled: skip to the `sync` value, inclusive
    Recover(String),
}

impl<R> Expr<R> {
    /// This expression, optionally
    #[must_use]
    pub fn optional(self) -> Self {
        Expr::Optional(Box::new(self))
    }

    /// This expression, repeated any number of times
    #[must_use]
    pub fn zero_or_more(self) -> Self {
        Expr::ZeroOrMore(Box::new(self))
    }

    /// This expression, repeated at least once
    #[must_use]
    pub fn one_or_more(self) -> Self {
        Expr::OneOrMore(Box::new(self))
    }
}

impl<R> From<&str> for Expr<R> {
    fn from(text: &str) -> Self {
        Expr::Value(text.to_string())
    }
}

impl<R> From<TokenKind> for Expr<R> {
    fn from(kind: TokenKind) -> Self {
        Expr::Kind(kind)
    }
}

impl<R> From<TokenClass> for Expr<R> {
    fn from(class: TokenClass) -> Self {
        Expr::Class(class)
    }
}

/// Sequence of expressions; `&str` items match token values
#[macro_export]
macro_rules! seq {
    ($($e:expr),* $(,)?) => {
        $crate::grammar::Expr::Sequence(vec![$($crate::grammar::Expr::from($e)),*])
    };
}

/// Ordered choice of expressions; `&str` items match token values
#[macro_export]
macro_rules! first_of {
    ($($e:expr),* $(,)?) => {
        $crate::grammar::Expr::FirstOf(vec![$($crate::grammar::Expr::from($e)),*])
    };
}

/// Sequence of expressions
#[must_use]
pub fn sequence<R>(items: Vec<Expr<R>>) -> Expr<R> {
    Expr::Sequence(items)
}

/// Ordered choice
#[must_use]
pub fn first_of<R>(items: Vec<Expr<R>>) -> Expr<R> {
    Expr::FirstOf(items)
}

/// Zero or one
#[must_use]
pub fn optional<R>(expr: impl Into<Expr<R>>) -> Expr<R> {
    expr.into().optional()
}

/// Any number of repetitions
#[must_use]
pub fn zero_or_more<R>(expr: impl Into<Expr<R>>) -> Expr<R> {
    expr.into().zero_or_more()
}

/// At least one repetition
#[must_use]
pub fn one_or_more<R>(expr: impl Into<Expr<R>>) -> Expr<R> {
    expr.into().one_or_more()
}

/// Positive lookahead
#[must_use]
pub fn next<R>(expr: impl Into<Expr<R>>) -> Expr<R> {
    Expr::Next(Box::new(expr.into()))
}

/// Negative lookahead
#[must_use]
pub fn next_not<R>(expr: impl Into<Expr<R>>) -> Expr<R> {
    Expr::NextNot(Box::new(expr.into()))
}

/// Reference to a rule
#[must_use]
pub fn rule<R>(rule: R) -> Expr<R> {
    Expr::Rule(rule)
}

/// Token of a kind
#[must_use]
pub fn kind<R>(kind: TokenKind) -> Expr<R> {
    Expr::Kind(kind)
}

/// Token with the given value
#[must_use]
pub fn value<R>(text: &str) -> Expr<R> {
    Expr::Value(text.to_string())
}

/// Token of a class
#[must_use]
pub fn class<R>(class: TokenClass) -> Expr<R> {
    Expr::Class(class)
}

/// Balanced run between `open` and `close`
#[must_use]
pub fn bridge<R>(open: &str, close: &str) -> Expr<R> {
    Expr::Bridge(open.to_string(), close.to_string())
}

/// Zero-width adjacency assertion
#[must_use]
pub fn adjacent<R>() -> Expr<R> {
    Expr::Adjacent
}

/// Rest of the current line
#[must_use]
pub fn till_new_line<R>() -> Expr<R> {
    Expr::TillNewLine
}

/// Any token but end of input
#[must_use]
pub fn any_token<R>() -> Expr<R> {
    Expr::AnyToken
}

/// End of input
#[must_use]
pub fn end_of_input<R>() -> Expr<R> {
    Expr::EndOfInput
}

/// Never matches
#[must_use]
pub fn nothing<R>() -> Expr<R> {
    Expr::Nothing
}

/// Recovery region ending at `sync`
#[must_use]
pub fn recover<R>(sync: &str) -> Expr<R> {
    Expr::Recover(sync.to_string())
}

/// How a matched rule appears in the tree
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RuleKind {
    /// A node of its own
    #[default]
    Normal,
    /// Children are spliced into the parent
    Skip,
    /// Spliced when it has exactly one child
    SkipIfOneChild,
}

/// A rule and its expression
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RuleDef<R> {
    /// Rule identifier
    pub rule: R,
    /// Body
    pub expr: Expr<R>,
    /// Tree shaping option
    pub kind: RuleKind,
}

/// A set of rules with a root
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Grammar<R> {
    /// Definitions in the order they were given
    pub rules: Vec<RuleDef<R>>,
    /// Entry rule
    pub root: Option<R>,
}

/// Incrementally defines a [`Grammar`]
#[derive(Debug)]
pub struct GrammarBuilder<R> {
    grammar: Grammar<R>,
}

impl<R: RuleId> Default for GrammarBuilder<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: RuleId> GrammarBuilder<R> {
    /// Create an empty builder
    #[must_use]
    pub fn new() -> Self {
        Self {
            grammar: Grammar {
                rules: Vec::new(),
                root: None,
            },
        }
    }

    /// Start defining `rule`
    pub fn rule(&mut self, rule: R) -> RuleBuilder<'_, R> {
        RuleBuilder {
            builder: self,
            rule,
        }
    }

    /// Set the entry rule
    pub fn set_root(&mut self, rule: R) {
        self.grammar.root = Some(rule);
    }

    /// Finish the grammar
    #[must_use]
    pub fn build(self) -> Grammar<R> {
        self.grammar
    }
}

/// Pending definition of one rule
pub struct RuleBuilder<'a, R> {
    builder: &'a mut GrammarBuilder<R>,
    rule: R,
}

impl<'a, R> RuleBuilder<'a, R> {
    /// Define the rule's body
    pub fn is(self, expr: impl Into<Expr<R>>) -> RuleOptions<'a, R> {
        let RuleBuilder { builder, rule } = self;
        let rules = &mut builder.grammar.rules;
        rules.push(RuleDef {
            rule,
            expr: expr.into(),
            kind: RuleKind::Normal,
        });
        let index = rules.len() - 1;
        RuleOptions {
            def: &mut rules[index],
        }
    }
}

/// Options of a rule just defined
pub struct RuleOptions<'a, R> {
    def: &'a mut RuleDef<R>,
}

impl<R> RuleOptions<'_, R> {
    /// Splice the rule's children into its parent
    pub fn skip(self) {
        self.def.kind = RuleKind::Skip;
    }

    /// Splice the rule's child into its parent when it has only one
    pub fn skip_if_one_child(self) {
        self.def.kind = RuleKind::SkipIfOneChild;
    }
}

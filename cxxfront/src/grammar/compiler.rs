use std::fmt::Debug;

use log::debug;
use rustc_hash::FxHashMap;

use super::{Expr, Grammar, RuleId, RuleKind};
use crate::error::GrammarError;
use crate::token::{TokenClass, TokenKind};

/// Terminal test run by an [`Instruction::Match`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Matcher {
    /// Token of a kind
    Kind(TokenKind),
    /// Token with a value
    Value(String),
    /// Token of a class
    Class(TokenClass),
    /// Balanced run from `open` to the matching `close`
    Bridge {
        /// Opening value
        open: String,
        /// Closing value
        close: String,
    },
    /// Zero width adjacency test
    Adjacent,
    /// Rest of the current line
    TillNewLine,
    /// Any token but end of input
    AnyToken,
    /// End of input
    EndOfInput,
    /// Skip to the sync value
    Recover(String),
}

/// One machine instruction. Offsets are relative to the instruction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Instruction {
    /// Run a rule body, by index into [`Program::rules`]
    Call {
        /// Rule index
        rule: usize,
    },
    /// Return from a rule body and build its node
    Ret,
    /// Continue elsewhere
    Jump(isize),
    /// Push a backtrack point resuming at the offset
    Choice(isize),
    /// Push a backtrack point for a lookahead
    PredicateChoice(isize),
    /// Drop the top backtrack point and jump
    Commit(isize),
    /// Like `Commit`, failing if no token was consumed since the point
    CommitVerify(isize),
    /// Drop the top backtrack point, restore its position and jump
    BackCommit(isize),
    /// Drop the top backtrack point, then fail
    FailTwice,
    /// Fail
    Fail,
    /// Test a terminal
    Match(Matcher),
    /// Fail unless recovery is enabled
    RecoveryGate,
    /// Successful end of the parse
    End,
}

/// Compiled rule metadata
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RuleInfo<R> {
    /// Rule identifier
    pub rule: R,
    /// Printable name
    pub name: String,
    /// Tree shaping option
    pub kind: RuleKind,
    /// Address of the first instruction of the body
    pub entry: usize,
}

/// A compiled grammar
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Program<R> {
    instructions: Vec<Instruction>,
    rules: Vec<RuleInfo<R>>,
    root: usize,
}

impl<R> Program<R> {
    /// All instructions
    #[must_use]
    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    /// Instruction at an address
    #[must_use]
    pub fn instruction(&self, address: usize) -> Option<&Instruction> {
        self.instructions.get(address)
    }

    /// Rules in definition order
    #[must_use]
    pub fn rules(&self) -> &[RuleInfo<R>] {
        &self.rules
    }

    /// Index of the root rule
    #[must_use]
    pub fn root(&self) -> usize {
        self.root
    }

    /// Number of instructions
    #[must_use]
    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    /// Check whether the program has no instructions
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }
}

/// Compile a grammar into a program.
///
/// The program starts with `Call(root)` and `End`, followed by each rule
/// body terminated by `Ret`, in definition order.
///
/// # Errors
/// Returns a `GrammarError` for duplicate or undefined rules, a missing
/// root, or a repetition over an expression that can match empty input.
pub fn compile<R: RuleId>(grammar: &Grammar<R>) -> Result<Program<R>, GrammarError> {
    let mut index: FxHashMap<R, usize> = FxHashMap::default();
    for (i, def) in grammar.rules.iter().enumerate() {
        if index.insert(def.rule, i).is_some() {
            return Err(GrammarError::DuplicateRule(rule_name(def.rule)));
        }
    }
    let root = grammar.root.ok_or(GrammarError::MissingRoot)?;
    let root = *index
        .get(&root)
        .ok_or_else(|| GrammarError::UndefinedRule(rule_name(root)))?;

    let mut code = vec![Instruction::Call { rule: root }, Instruction::End];
    let mut rules = Vec::with_capacity(grammar.rules.len());
    for def in &grammar.rules {
        let entry = code.len();
        emit(&def.expr, &index, &mut code)?;
        code.push(Instruction::Ret);
        rules.push(RuleInfo {
            rule: def.rule,
            name: rule_name(def.rule),
            kind: def.kind,
            entry,
        });
    }

    let nullable = nullable_rules(grammar, &index);
    for def in &grammar.rules {
        check_loops(&def.expr, &index, &nullable, def.rule)?;
    }

    debug!(
        "compiled {} rules into {} instructions",
        rules.len(),
        code.len()
    );
    Ok(Program {
        instructions: code,
        rules,
        root,
    })
}

fn rule_name<R: Debug>(rule: R) -> String {
    format!("{rule:?}")
}

fn offset(from: usize, to: usize) -> isize {
    to as isize - from as isize
}

/// Point the instruction at `at` to `target`
fn patch(code: &mut [Instruction], at: usize, target: usize) {
    let delta = offset(at, target);
    match &mut code[at] {
        Instruction::Jump(off)
        | Instruction::Choice(off)
        | Instruction::PredicateChoice(off)
        | Instruction::Commit(off)
        | Instruction::CommitVerify(off)
        | Instruction::BackCommit(off) => *off = delta,
        _ => {}
    }
}

fn emit<R: RuleId>(
    expr: &Expr<R>,
    index: &FxHashMap<R, usize>,
    code: &mut Vec<Instruction>,
) -> Result<(), GrammarError> {
    match expr {
        Expr::Sequence(items) => {
            for item in items {
                emit(item, index, code)?;
            }
        }
        Expr::FirstOf(items) => {
            let Some((last, rest)) = items.split_last() else {
                code.push(Instruction::Fail);
                return Ok(());
            };
            let mut commits = Vec::with_capacity(rest.len());
            for item in rest {
                let choice = code.len();
                code.push(Instruction::Choice(0));
                emit(item, index, code)?;
                commits.push(code.len());
                code.push(Instruction::Commit(0));
                let here = code.len();
                patch(code, choice, here);
            }
            emit(last, index, code)?;
            let end = code.len();
            for commit in commits {
                patch(code, commit, end);
            }
        }
        Expr::Optional(inner) => {
            let choice = code.len();
            code.push(Instruction::Choice(0));
            emit(inner, index, code)?;
            let commit = code.len();
            code.push(Instruction::Commit(0));
            let end = code.len();
            patch(code, choice, end);
            patch(code, commit, end);
        }
        Expr::ZeroOrMore(inner) => emit_loop(inner, index, code)?,
        Expr::OneOrMore(inner) => {
            emit(inner, index, code)?;
            emit_loop(inner, index, code)?;
        }
        Expr::Next(inner) => {
            let choice = code.len();
            code.push(Instruction::PredicateChoice(0));
            emit(inner, index, code)?;
            let back = code.len();
            code.push(Instruction::BackCommit(0));
            let here = code.len();
            patch(code, choice, here);
            code.push(Instruction::Fail);
            let here = code.len();
            patch(code, back, here);
        }
        Expr::NextNot(inner) => {
            let choice = code.len();
            code.push(Instruction::PredicateChoice(0));
            emit(inner, index, code)?;
            code.push(Instruction::FailTwice);
            let here = code.len();
            patch(code, choice, here);
        }
        Expr::Rule(rule) => {
            let rule = *index
                .get(rule)
                .ok_or_else(|| GrammarError::UndefinedRule(rule_name(*rule)))?;
            code.push(Instruction::Call { rule });
        }
        Expr::Kind(kind) => code.push(Instruction::Match(Matcher::Kind(*kind))),
        Expr::Value(text) => code.push(Instruction::Match(Matcher::Value(text.clone()))),
        Expr::Class(class) => code.push(Instruction::Match(Matcher::Class(*class))),
        Expr::Bridge(open, close) => code.push(Instruction::Match(Matcher::Bridge {
            open: open.clone(),
            close: close.clone(),
        })),
        Expr::Adjacent => code.push(Instruction::Match(Matcher::Adjacent)),
        Expr::TillNewLine => code.push(Instruction::Match(Matcher::TillNewLine)),
        Expr::AnyToken => code.push(Instruction::Match(Matcher::AnyToken)),
        Expr::EndOfInput => code.push(Instruction::Match(Matcher::EndOfInput)),
        Expr::Nothing => code.push(Instruction::Fail),
        Expr::Recover(sync) => {
            code.push(Instruction::RecoveryGate);
            code.push(Instruction::Match(Matcher::Recover(sync.clone())));
        }
    }
    Ok(())
}

fn emit_loop<R: RuleId>(
    inner: &Expr<R>,
    index: &FxHashMap<R, usize>,
    code: &mut Vec<Instruction>,
) -> Result<(), GrammarError> {
    let choice = code.len();
    code.push(Instruction::Choice(0));
    emit(inner, index, code)?;
    let commit = code.len();
    code.push(Instruction::CommitVerify(offset(commit, choice)));
    let here = code.len();
    patch(code, choice, here);
    Ok(())
}

/// Which rules can match without consuming a token, by fixpoint
fn nullable_rules<R: RuleId>(grammar: &Grammar<R>, index: &FxHashMap<R, usize>) -> Vec<bool> {
    let mut nullable = vec![false; grammar.rules.len()];
    loop {
        let mut changed = false;
        for (i, def) in grammar.rules.iter().enumerate() {
            if !nullable[i] && is_nullable(&def.expr, index, &nullable) {
                nullable[i] = true;
                changed = true;
            }
        }
        if !changed {
            return nullable;
        }
    }
}

fn is_nullable<R: RuleId>(expr: &Expr<R>, index: &FxHashMap<R, usize>, nullable: &[bool]) -> bool {
    match expr {
        Expr::Sequence(items) => items.iter().all(|e| is_nullable(e, index, nullable)),
        Expr::FirstOf(items) => items.iter().any(|e| is_nullable(e, index, nullable)),
        Expr::Optional(_)
        | Expr::ZeroOrMore(_)
        | Expr::Next(_)
        | Expr::NextNot(_)
        | Expr::Adjacent
        | Expr::TillNewLine
        | Expr::EndOfInput => true,
        Expr::OneOrMore(inner) => is_nullable(inner, index, nullable),
        Expr::Rule(rule) => index.get(rule).is_some_and(|&i| nullable[i]),
        Expr::Kind(_)
        | Expr::Value(_)
        | Expr::Class(_)
        | Expr::Bridge(..)
        | Expr::AnyToken
        | Expr::Nothing
        | Expr::Recover(_) => false,
    }
}

fn check_loops<R: RuleId>(
    expr: &Expr<R>,
    index: &FxHashMap<R, usize>,
    nullable: &[bool],
    owner: R,
) -> Result<(), GrammarError> {
    match expr {
        Expr::Sequence(items) | Expr::FirstOf(items) => {
            for item in items {
                check_loops(item, index, nullable, owner)?;
            }
        }
        Expr::ZeroOrMore(inner) | Expr::OneOrMore(inner) => {
            if is_nullable(inner, index, nullable) {
                return Err(GrammarError::EmptyLoop(rule_name(owner)));
            }
            check_loops(inner, index, nullable, owner)?;
        }
        Expr::Optional(inner) | Expr::Next(inner) | Expr::NextNot(inner) => {
            check_loops(inner, index, nullable, owner)?;
        }
        _ => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grammar::{GrammarBuilder, kind, next_not, optional, rule, value};
    use crate::seq;

    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    enum Rule {
        List,
        Item,
        Missing,
    }

    fn list_grammar() -> Grammar<Rule> {
        let mut b = GrammarBuilder::new();
        b.rule(Rule::List)
            .is(seq!["(", rule(Rule::Item).zero_or_more(), ")"]);
        b.rule(Rule::Item)
            .is(crate::first_of![kind(TokenKind::Number), kind(TokenKind::Identifier)])
            .skip_if_one_child();
        b.set_root(Rule::List);
        b.build()
    }

    #[test]
    fn layout_starts_with_root_call() {
        let program = compile(&list_grammar()).unwrap();
        assert_eq!(program.instructions()[0], Instruction::Call { rule: 0 });
        assert_eq!(program.instructions()[1], Instruction::End);
        assert_eq!(program.rules()[0].entry, 2);
        let item = &program.rules()[1];
        assert_eq!(item.name, "Item");
        assert_eq!(program.instructions()[item.entry - 1], Instruction::Ret);
        assert_eq!(program.instructions().last(), Some(&Instruction::Ret));
    }

    #[test]
    fn compiling_twice_gives_equal_programs() {
        let grammar = list_grammar();
        assert_eq!(compile(&grammar).unwrap(), compile(&grammar).unwrap());
    }

    #[test]
    fn choice_offsets_point_past_alternatives() {
        let program = compile(&list_grammar()).unwrap();
        let entry = program.rules()[1].entry;
        let code = program.instructions();
        // Choice, Match, Commit, Match, Ret
        assert_eq!(code[entry], Instruction::Choice(3));
        assert_eq!(code[entry + 2], Instruction::Commit(2));
        assert_eq!(code[entry + 4], Instruction::Ret);
    }

    #[test]
    fn loops_jump_back_to_their_choice() {
        let program = compile(&list_grammar()).unwrap();
        let code = program.instructions();
        let entry = program.rules()[0].entry;
        // Match "(", Choice, Call Item, CommitVerify, Match ")"
        assert_eq!(code[entry + 1], Instruction::Choice(3));
        assert_eq!(code[entry + 3], Instruction::CommitVerify(-2));
    }

    #[test]
    fn empty_loops_are_rejected() {
        let mut b = GrammarBuilder::new();
        b.rule(Rule::List).is(optional("x").zero_or_more());
        b.set_root(Rule::List);
        assert_eq!(
            compile(&b.build()),
            Err(GrammarError::EmptyLoop("List".into()))
        );

        let mut b = GrammarBuilder::new();
        b.rule(Rule::List).is(rule(Rule::Item).one_or_more());
        b.rule(Rule::Item).is(next_not(value("x")));
        b.set_root(Rule::List);
        assert_eq!(
            compile(&b.build()),
            Err(GrammarError::EmptyLoop("List".into()))
        );
    }

    #[test]
    fn reference_errors() {
        let mut b = GrammarBuilder::new();
        b.rule(Rule::List).is(rule(Rule::Missing));
        b.set_root(Rule::List);
        assert_eq!(
            compile(&b.build()),
            Err(GrammarError::UndefinedRule("Missing".into()))
        );

        let mut b = GrammarBuilder::new();
        b.rule(Rule::List).is(value("a"));
        b.rule(Rule::List).is(value("b"));
        b.set_root(Rule::List);
        assert_eq!(
            compile(&b.build()),
            Err(GrammarError::DuplicateRule("List".into()))
        );

        let mut b: GrammarBuilder<Rule> = GrammarBuilder::new();
        b.rule(Rule::List).is(value("a"));
        assert_eq!(compile(&b.build()), Err(GrammarError::MissingRoot));

        let mut b: GrammarBuilder<Rule> = GrammarBuilder::new();
        b.rule(Rule::List).is(value("a"));
        b.set_root(Rule::Item);
        assert_eq!(
            compile(&b.build()),
            Err(GrammarError::UndefinedRule("Item".into()))
        );
    }
}

//! Backtracking, memoizing interpreter for compiled grammars.
//!
//! The machine keeps its own frame stack, so nesting depth in the input is
//! bounded by memory rather than by the native call stack. Every rule
//! invocation is memoized by (rule, token index).

use log::{debug, trace};
use rustc_hash::FxHashMap;
use serde::Serialize;

use crate::ast::{Ast, NodeKind, RawNode};
use crate::diagnostic::Diagnostic;
use crate::error::ParseError;
use crate::grammar::{Instruction, Matcher, Program, RuleId, RuleKind};
use crate::token::{Token, TokenKind};

/// Parse settings
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ParseOptions {
    /// Enable `recover` expressions
    pub recovery: bool,
}

impl ParseOptions {
    /// Fail on the first mismatch
    #[must_use]
    pub fn strict() -> Self {
        Self { recovery: false }
    }

    /// Skip unparsable regions where the grammar allows it
    #[must_use]
    pub fn recovering() -> Self {
        Self { recovery: true }
    }
}

/// Counters collected during one parse
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ParseStats {
    /// Rule bodies entered
    pub rule_invocations: usize,
    /// Rule bodies entered, by rule name
    pub rule_counts: FxHashMap<String, usize>,
    /// Calls answered from the memo table
    pub memo_hits: usize,
    /// Terminal tests run
    pub matcher_invocations: usize,
    /// Times the machine backtracked
    pub backtracks: usize,
}

impl ParseStats {
    /// How often the body of the named rule ran
    #[must_use]
    pub fn invocations_of(&self, rule: &str) -> usize {
        self.rule_counts.get(rule).copied().unwrap_or(0)
    }
}

/// Result of a parse
#[derive(Clone, Debug)]
pub struct ParseOutcome<R> {
    /// The tree, `None` when the input did not match
    pub ast: Option<Ast<R>>,
    /// Parse errors and recovered regions
    pub diagnostics: Vec<Diagnostic>,
    /// Counters
    pub stats: ParseStats,
}

impl<R> ParseOutcome<R> {
    /// Check whether the parse produced a tree without recovering
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.ast.is_some() && !self.diagnostics.iter().any(Diagnostic::is_error)
    }
}

#[derive(Clone, Copy, Debug)]
enum Frame {
    Call {
        rule: usize,
        ret: usize,
        start: usize,
        mark: usize,
        outer_reach: usize,
        outer_depth: usize,
    },
    Choice {
        alt: usize,
        index: usize,
        mark: usize,
        predicate: bool,
    },
}

/// Memoized rule outcome. `reach` is the furthest mismatch inside the
/// attempt, counted outside of the rule's own predicates.
#[derive(Clone, Debug)]
enum Memo {
    InProgress,
    Failure { reach: usize },
    Success { end: usize, nodes: Vec<u32>, reach: usize },
}

/// Runs a [`Program`] over a token array
pub struct Machine<'a, R> {
    program: &'a Program<R>,
    tokens: &'a [Token],
    options: ParseOptions,
    eof: Token,
    pc: usize,
    index: usize,
    frames: Vec<Frame>,
    pending: Vec<u32>,
    arena: Vec<RawNode<R>>,
    memo: FxHashMap<(usize, usize), Memo>,
    predicates: usize,
    furthest: usize,
    reach: usize,
    call_depth: usize,
    rule_counts: Vec<usize>,
    stats: ParseStats,
}

impl<'a, R: RuleId> Machine<'a, R> {
    /// Parse `tokens` with `program`.
    ///
    /// A mismatch is reported through the outcome's diagnostics.
    ///
    /// # Errors
    /// Returns a `ParseError` when the grammar is left recursive or a
    /// repetition stops making progress.
    pub fn parse(
        program: &'a Program<R>,
        tokens: &'a [Token],
        options: &ParseOptions,
    ) -> Result<ParseOutcome<R>, ParseError> {
        let eof = match tokens.last() {
            Some(last) if last.kind == TokenKind::Eof => last.clone(),
            Some(last) => Token::eof(last.line, last.end_column()),
            None => Token::eof(1, 0),
        };
        let mut machine = Self {
            program,
            tokens,
            options: *options,
            eof,
            pc: 0,
            index: 0,
            frames: Vec::new(),
            pending: Vec::new(),
            arena: Vec::new(),
            memo: FxHashMap::default(),
            predicates: 0,
            furthest: 0,
            reach: 0,
            call_depth: 0,
            rule_counts: vec![0; program.rules().len()],
            stats: ParseStats::default(),
        };
        let matched = machine.run()?;
        Ok(machine.finish(matched))
    }

    fn token_at(&self, index: usize) -> &Token {
        match self.tokens.get(index) {
            Some(token) if token.kind != TokenKind::Eof => token,
            _ => &self.eof,
        }
    }

    fn at_end(&self, index: usize) -> bool {
        self.token_at(index).kind == TokenKind::Eof
    }

    fn run(&mut self) -> Result<bool, ParseError> {
        let program = self.program;
        loop {
            let Some(instruction) = program.instruction(self.pc) else {
                debug!("instruction address {} out of range", self.pc);
                return Ok(false);
            };
            let running = match instruction {
                Instruction::Call { rule } => self.call(*rule)?,
                Instruction::Ret => self.ret(),
                Instruction::Jump(off) => {
                    self.pc = target(self.pc, *off);
                    true
                }
                Instruction::Choice(off) => {
                    self.push_choice(*off, false);
                    true
                }
                Instruction::PredicateChoice(off) => {
                    self.push_choice(*off, true);
                    true
                }
                Instruction::Commit(off) => {
                    self.pop_choice();
                    self.pc = target(self.pc, *off);
                    true
                }
                Instruction::CommitVerify(off) => {
                    if let Some(Frame::Choice { index, .. }) = self.pop_choice()
                        && index == self.index
                    {
                        return Err(ParseError::EmptyLoop(index));
                    }
                    self.pc = target(self.pc, *off);
                    true
                }
                Instruction::BackCommit(off) => {
                    if let Some(Frame::Choice { index, mark, .. }) = self.pop_choice() {
                        self.index = index;
                        self.pending.truncate(mark);
                    }
                    self.pc = target(self.pc, *off);
                    true
                }
                Instruction::FailTwice => {
                    self.pop_choice();
                    self.backtrack()
                }
                Instruction::Fail => self.backtrack(),
                Instruction::Match(matcher) => {
                    if self.match_terminal(matcher) {
                        self.pc += 1;
                        true
                    } else {
                        self.backtrack()
                    }
                }
                Instruction::RecoveryGate => {
                    if self.options.recovery {
                        self.pc += 1;
                        true
                    } else {
                        self.backtrack()
                    }
                }
                Instruction::End => return Ok(true),
            };
            if !running {
                return Ok(false);
            }
        }
    }

    fn call(&mut self, rule: usize) -> Result<bool, ParseError> {
        let key = (rule, self.index);
        match self.memo.get(&key) {
            Some(Memo::InProgress) => {
                return Err(ParseError::LeftRecursion {
                    rule: self.rule_name(rule),
                    index: self.index,
                });
            }
            Some(Memo::Failure { reach }) => {
                let reach = *reach;
                self.stats.memo_hits += 1;
                self.note_mismatch(reach);
                return Ok(self.backtrack());
            }
            Some(Memo::Success { end, nodes, reach }) => {
                let (end, reach) = (*end, *reach);
                self.stats.memo_hits += 1;
                self.pending.extend_from_slice(nodes);
                self.note_mismatch(reach);
                self.index = end;
                self.pc += 1;
                return Ok(true);
            }
            None => {}
        }

        let Some(info) = self.program.rules().get(rule) else {
            return Ok(false);
        };
        trace!("enter {} at token {}", info.name, self.index);
        self.memo.insert(key, Memo::InProgress);
        self.stats.rule_invocations += 1;
        self.rule_counts[rule] += 1;
        self.frames.push(Frame::Call {
            rule,
            ret: self.pc + 1,
            start: self.index,
            mark: self.pending.len(),
            outer_reach: self.reach,
            outer_depth: self.call_depth,
        });
        self.reach = self.index;
        self.call_depth = self.predicates;
        self.pc = info.entry;
        Ok(true)
    }

    fn ret(&mut self) -> bool {
        let Some(Frame::Call {
            rule,
            ret,
            start,
            mark,
            outer_reach,
            outer_depth,
        }) = self.frames.pop()
        else {
            debug!("return without a call frame at {}", self.pc);
            return false;
        };
        let Some(info) = self.program.rules().get(rule) else {
            return false;
        };
        let children = self.pending.split_off(mark);
        let produced = match info.kind {
            RuleKind::Skip => children,
            RuleKind::SkipIfOneChild if children.len() == 1 => children,
            RuleKind::Normal | RuleKind::SkipIfOneChild => {
                vec![self.push_node(NodeKind::Rule(info.rule), children, start, self.index)]
            }
        };
        trace!("leave {} at token {}", info.name, self.index);
        self.pending.extend_from_slice(&produced);
        let reach = self.leave_rule(outer_reach, outer_depth);
        self.memo.insert(
            (rule, start),
            Memo::Success {
                end: self.index,
                nodes: produced,
                reach,
            },
        );
        self.pc = ret;
        true
    }

    fn push_choice(&mut self, off: isize, predicate: bool) {
        if predicate {
            self.predicates += 1;
        }
        self.frames.push(Frame::Choice {
            alt: target(self.pc, off),
            index: self.index,
            mark: self.pending.len(),
            predicate,
        });
        self.pc += 1;
    }

    fn pop_choice(&mut self) -> Option<Frame> {
        let frame = self.frames.pop();
        if let Some(Frame::Choice {
            predicate: true, ..
        }) = frame
        {
            self.predicates -= 1;
        }
        frame
    }

    /// Resume at the most recent choice point. Rules abandoned on the way
    /// are remembered as failing at their start.
    fn backtrack(&mut self) -> bool {
        self.stats.backtracks += 1;
        while let Some(frame) = self.frames.pop() {
            match frame {
                Frame::Call {
                    rule,
                    start,
                    outer_reach,
                    outer_depth,
                    ..
                } => {
                    let reach = self.leave_rule(outer_reach, outer_depth);
                    self.memo.insert((rule, start), Memo::Failure { reach });
                }
                Frame::Choice {
                    alt,
                    index,
                    mark,
                    predicate,
                } => {
                    if predicate {
                        self.predicates -= 1;
                    }
                    self.index = index;
                    self.pending.truncate(mark);
                    self.pc = alt;
                    return true;
                }
            }
        }
        false
    }

    /// Record a mismatch at `index` for the error position and for the
    /// innermost rule when no predicate of that rule is open.
    fn note_mismatch(&mut self, index: usize) {
        if self.predicates == 0 {
            self.furthest = self.furthest.max(index);
        }
        if self.predicates == self.call_depth {
            self.reach = self.reach.max(index);
        }
    }

    /// Close the innermost rule and hand its reach back to the caller.
    /// Returns the closed rule's reach.
    fn leave_rule(&mut self, outer_reach: usize, outer_depth: usize) -> usize {
        let reach = self.reach;
        let depth = self.call_depth;
        self.reach = outer_reach;
        self.call_depth = outer_depth;
        if depth == outer_depth {
            self.reach = self.reach.max(reach);
        }
        reach
    }

    fn match_terminal(&mut self, matcher: &Matcher) -> bool {
        self.stats.matcher_invocations += 1;
        let Some(consumed) = self.test(matcher) else {
            self.note_mismatch(self.index);
            return false;
        };
        let start = self.index;
        let leaves: Vec<u32> = (start..start + consumed)
            .map(|i| {
                let kind = self.token_at(i).kind;
                self.push_node(NodeKind::Token(kind), Vec::new(), i, i + 1)
            })
            .collect();
        self.index += consumed;
        if matches!(matcher, Matcher::Recover(_)) {
            trace!("recovered tokens {start}..{}", self.index);
            let node = self.push_node(NodeKind::Recovered, leaves, start, self.index);
            self.pending.push(node);
        } else {
            self.pending.extend(leaves);
        }
        true
    }

    /// Number of tokens the matcher consumes at the current index
    fn test(&self, matcher: &Matcher) -> Option<usize> {
        let index = self.index;
        let current = self.token_at(index);
        let not_end = current.kind != TokenKind::Eof;
        match matcher {
            Matcher::Kind(kind) => (not_end && current.kind == *kind).then_some(1),
            Matcher::Value(value) => (not_end && current.value == *value).then_some(1),
            Matcher::Class(class) => class.contains(current.kind).then_some(1),
            Matcher::AnyToken => not_end.then_some(1),
            Matcher::EndOfInput => (!not_end).then_some(0),
            Matcher::Adjacent => (index > 0 && self.token_at(index - 1).is_adjacent_to(current))
                .then_some(0),
            Matcher::TillNewLine => {
                let line = if index == 0 {
                    1
                } else {
                    self.token_at(index - 1).line
                };
                let mut end = index;
                while !self.at_end(end) && self.token_at(end).line == line {
                    end += 1;
                }
                Some(end - index)
            }
            Matcher::Bridge { open, close } => {
                if !not_end || current.value != *open {
                    return None;
                }
                let mut depth = 1usize;
                let mut end = index + 1;
                loop {
                    let token = self.token_at(end);
                    if token.kind == TokenKind::Eof {
                        return None;
                    }
                    if token.value == *close {
                        depth -= 1;
                        if depth == 0 {
                            return Some(end + 1 - index);
                        }
                    } else if token.value == *open {
                        depth += 1;
                    }
                    end += 1;
                }
            }
            Matcher::Recover(sync) => {
                let mut depth = 0usize;
                let mut end = index;
                while !self.at_end(end) {
                    let token = self.token_at(end);
                    if depth == 0 && token.value == *sync {
                        end += 1;
                        break;
                    }
                    if is_opener(token) {
                        depth += 1;
                    } else if is_closer(token) {
                        if depth == 0 {
                            break;
                        }
                        depth -= 1;
                    }
                    end += 1;
                }
                (end > index).then_some(end - index)
            }
        }
    }

    fn push_node(
        &mut self,
        kind: NodeKind<R>,
        children: Vec<u32>,
        start: usize,
        end: usize,
    ) -> u32 {
        let id = self.arena.len() as u32;
        self.arena.push(RawNode {
            kind,
            children,
            start,
            end,
        });
        id
    }

    fn rule_name(&self, rule: usize) -> String {
        self.program
            .rules()
            .get(rule)
            .map_or_else(|| rule.to_string(), |info| info.name.clone())
    }

    fn finish(mut self, matched: bool) -> ParseOutcome<R> {
        let program = self.program;
        let mut stats = std::mem::take(&mut self.stats);
        stats.rule_counts = program
            .rules()
            .iter()
            .zip(&self.rule_counts)
            .filter(|(_, count)| **count > 0)
            .map(|(info, count)| (info.name.clone(), *count))
            .collect();

        if !matched {
            let token = self.token_at(self.furthest);
            let found = if token.kind == TokenKind::Eof {
                "EOF".to_string()
            } else {
                format!("'{}'", token.value)
            };
            let line = token.line;
            debug!("parse failed at token {}", self.furthest);
            return ParseOutcome {
                ast: None,
                diagnostics: vec![Diagnostic::error(
                    Some(line),
                    format!("Parse error at line {line}: unexpected {found}"),
                )],
                stats,
            };
        }

        let root = match self.pending.as_slice() {
            [single] => *single,
            _ => {
                let root_rule = program.rules().get(program.root()).map(|info| info.rule);
                let children = std::mem::take(&mut self.pending);
                match root_rule {
                    Some(rule) => self.push_node(NodeKind::Rule(rule), children, 0, self.index),
                    None => self.push_node(NodeKind::Recovered, children, 0, self.index),
                }
            }
        };
        let ast = Ast::from_arena(&self.arena, root, self.tokens.to_vec());
        let diagnostics = ast
            .collect(NodeKind::Recovered)
            .into_iter()
            .map(|id| {
                let line = ast.line(id);
                Diagnostic::error(
                    Some(line),
                    format!("Syntax error, recovered region at line {line}"),
                )
            })
            .collect();
        debug!(
            "parsed {} tokens into {} nodes, {} rule invocations, {} memo hits",
            self.index,
            ast.len(),
            stats.rule_invocations,
            stats.memo_hits
        );
        ParseOutcome {
            ast: Some(ast),
            diagnostics,
            stats,
        }
    }
}

fn target(pc: usize, off: isize) -> usize {
    pc.wrapping_add_signed(off)
}

fn is_opener(token: &Token) -> bool {
    token.kind == TokenKind::Punctuator && matches!(token.value.as_str(), "(" | "[" | "{")
}

fn is_closer(token: &Token) -> bool {
    token.kind == TokenKind::Punctuator && matches!(token.value.as_str(), ")" | "]" | "}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grammar::{
        Grammar, GrammarBuilder, adjacent, any_token, bridge, compile, end_of_input, kind, next,
        next_not, recover, rule, till_new_line, value,
    };
    use crate::lexer::lex;
    use crate::{first_of, seq};

    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    enum Rule {
        Root,
        Item,
        Block,
        Expr,
    }

    fn parse(grammar: &Grammar<Rule>, text: &str, options: ParseOptions) -> ParseOutcome<Rule> {
        let _ = env_logger::builder().is_test(true).try_init();
        let program = compile(grammar).unwrap();
        let tokens = lex(text);
        Machine::parse(&program, &tokens, &options).unwrap()
    }

    fn single(root: crate::grammar::Expr<Rule>) -> Grammar<Rule> {
        let mut b = GrammarBuilder::new();
        b.rule(Rule::Root).is(root);
        b.set_root(Rule::Root);
        b.build()
    }

    fn list_grammar() -> Grammar<Rule> {
        let mut b = GrammarBuilder::new();
        b.rule(Rule::Root)
            .is(seq!["(", rule(Rule::Item).zero_or_more(), ")", end_of_input()]);
        b.rule(Rule::Item)
            .is(first_of![kind(TokenKind::Number), kind(TokenKind::Identifier)])
            .skip_if_one_child();
        b.set_root(Rule::Root);
        b.build()
    }

    fn statements() -> Grammar<Rule> {
        let mut b = GrammarBuilder::new();
        b.rule(Rule::Root)
            .is(seq![rule(Rule::Item).zero_or_more(), end_of_input()]);
        b.rule(Rule::Item)
            .is(first_of![
                rule(Rule::Block),
                seq![kind(TokenKind::Identifier), ";"],
                recover(";"),
            ])
            .skip_if_one_child();
        b.rule(Rule::Block)
            .is(seq!["{", rule(Rule::Item).zero_or_more(), "}"]);
        b.set_root(Rule::Root);
        b.build()
    }

    #[test]
    fn builds_tree_with_spliced_rules() {
        let outcome = parse(&list_grammar(), "(1 a)", ParseOptions::strict());
        assert!(outcome.is_clean());
        let ast = outcome.ast.unwrap();
        let root = ast.root();
        assert_eq!(ast.kind(root), Some(NodeKind::Rule(Rule::Root)));
        assert_eq!(ast.children(root).len(), 4);
        assert_eq!(ast.node(root).start, 0);
        assert_eq!(ast.node(root).end, 4);
        assert!(ast.collect(NodeKind::Rule(Rule::Item)).is_empty());
        assert_eq!(ast.text(root), "(1 a)");
    }

    #[test]
    fn strict_failure_reports_furthest_token() {
        let outcome = parse(&list_grammar(), "(1 ;", ParseOptions::strict());
        assert!(outcome.ast.is_none());
        assert_eq!(outcome.diagnostics.len(), 1);
        assert_eq!(
            outcome.diagnostics[0].message,
            "Parse error at line 1: unexpected ';'"
        );

        let outcome = parse(&list_grammar(), "(1\n a", ParseOptions::strict());
        assert_eq!(
            outcome.diagnostics[0].message,
            "Parse error at line 2: unexpected EOF"
        );
    }

    #[test]
    fn memoized_failure_keeps_its_error_position() {
        let mut b = GrammarBuilder::new();
        b.rule(Rule::Root).is(first_of![
            seq![next_not(rule(Rule::Item)), "x"],
            seq![rule(Rule::Item), end_of_input()],
        ]);
        b.rule(Rule::Item).is(seq!["a", "b", "c"]);
        b.set_root(Rule::Root);
        let outcome = parse(&b.build(), "a b d", ParseOptions::strict());
        assert!(outcome.ast.is_none());
        assert_eq!(outcome.stats.invocations_of("Item"), 1);
        assert_eq!(
            outcome.diagnostics[0].message,
            "Parse error at line 1: unexpected 'd'"
        );
    }

    #[test]
    fn memoized_rule_runs_once_per_position() {
        let mut b = GrammarBuilder::new();
        b.rule(Rule::Root).is(first_of![
            seq![rule(Rule::Item), "x"],
            seq![rule(Rule::Item), "y"],
        ]);
        b.rule(Rule::Item).is(kind(TokenKind::Identifier));
        b.set_root(Rule::Root);
        let outcome = parse(&b.build(), "a y", ParseOptions::strict());
        assert!(outcome.ast.is_some());
        assert_eq!(outcome.stats.invocations_of("Item"), 1);
        assert_eq!(outcome.stats.memo_hits, 1);
        assert_eq!(outcome.stats.rule_invocations, 2);
        let ast = outcome.ast.unwrap();
        assert_eq!(ast.collect(NodeKind::Rule(Rule::Item)).len(), 1);
    }

    #[test]
    fn left_recursion_is_a_fault() {
        let mut b = GrammarBuilder::new();
        b.rule(Rule::Expr).is(first_of![
            seq![rule(Rule::Expr), "+", kind(TokenKind::Number)],
            kind(TokenKind::Number),
        ]);
        b.set_root(Rule::Expr);
        let program = compile(&b.build()).unwrap();
        let tokens = lex("1 + 2");
        let result = Machine::parse(&program, &tokens, &ParseOptions::strict());
        assert_eq!(
            result.err(),
            Some(ParseError::LeftRecursion {
                rule: "Expr".into(),
                index: 0,
            })
        );
    }

    #[test]
    fn adjacency_separates_shift_from_nested_closers() {
        let grammar = single(seq![">", adjacent(), ">", end_of_input()]);
        assert!(parse(&grammar, ">>", ParseOptions::strict()).ast.is_some());
        assert!(parse(&grammar, "> >", ParseOptions::strict()).ast.is_none());
        assert!(parse(&grammar, ">\n>", ParseOptions::strict()).ast.is_none());
    }

    #[test]
    fn bridge_matches_balanced_run() {
        let grammar = single(seq![bridge("(", ")"), end_of_input()]);
        let outcome = parse(&grammar, "((a)(b))", ParseOptions::strict());
        assert_eq!(outcome.ast.map(|ast| ast.len()), Some(9));
        assert!(parse(&grammar, "((a)", ParseOptions::strict()).ast.is_none());
        assert!(parse(&grammar, "a", ParseOptions::strict()).ast.is_none());
    }

    #[test]
    fn till_new_line_stops_at_line_change() {
        let grammar = single(seq![
            "asm",
            till_new_line(),
            kind(TokenKind::Identifier),
            end_of_input()
        ]);
        let outcome = parse(&grammar, "asm mov eax, 1\nnext", ParseOptions::strict());
        let ast = outcome.ast.unwrap();
        assert_eq!(ast.children(ast.root()).len(), 6);

        let outcome = parse(&grammar, "asm\nnext", ParseOptions::strict());
        let ast = outcome.ast.unwrap();
        assert_eq!(ast.children(ast.root()).len(), 2);
    }

    #[test]
    fn predicates_consume_nothing() {
        let grammar = single(seq![
            next("a"),
            kind(TokenKind::Identifier),
            next_not(value("b")),
            any_token(),
            end_of_input()
        ]);
        let outcome = parse(&grammar, "a c", ParseOptions::strict());
        assert_eq!(outcome.ast.map(|ast| ast.len()), Some(3));
        assert!(parse(&grammar, "a b", ParseOptions::strict()).ast.is_none());
    }

    #[test]
    fn recovery_reports_each_region() {
        let text = "a;\n1 2;\nb;\n3;";
        let strict = parse(&statements(), text, ParseOptions::strict());
        assert!(strict.ast.is_none());
        assert_eq!(
            strict.diagnostics[0].message,
            "Parse error at line 2: unexpected '1'"
        );

        let outcome = parse(&statements(), text, ParseOptions::recovering());
        let ast = outcome.ast.unwrap();
        assert_eq!(ast.collect(NodeKind::Recovered).len(), 2);
        let messages: Vec<&str> = outcome
            .diagnostics
            .iter()
            .map(|d| d.message.as_str())
            .collect();
        assert_eq!(
            messages,
            [
                "Syntax error, recovered region at line 2",
                "Syntax error, recovered region at line 4",
            ]
        );
    }

    #[test]
    fn recovery_respects_nesting() {
        let outcome = parse(&statements(), "f(a;b); c;", ParseOptions::recovering());
        let ast = outcome.ast.unwrap();
        let recovered = ast.collect(NodeKind::Recovered);
        assert_eq!(recovered.len(), 1);
        assert_eq!(ast.text(recovered[0]), "f(a;b);");

        let outcome = parse(&statements(), "{ a; 1 2 } b;", ParseOptions::recovering());
        let ast = outcome.ast.unwrap();
        let recovered = ast.collect(NodeKind::Recovered);
        assert_eq!(recovered.len(), 1);
        assert_eq!(ast.text(recovered[0]), "1 2");
        assert_eq!(ast.collect(NodeKind::Rule(Rule::Block)).len(), 1);
    }

    #[test]
    fn deep_nesting_does_not_use_the_call_stack() {
        let mut b = GrammarBuilder::new();
        b.rule(Rule::Expr).is(first_of![
            seq!["(", rule(Rule::Expr), ")"],
            kind(TokenKind::Number),
        ]);
        b.set_root(Rule::Expr);
        let depth = 5000;
        let text = format!("{}1{}", "(".repeat(depth), ")".repeat(depth));
        let outcome = parse(&b.build(), &text, ParseOptions::strict());
        let ast = outcome.ast.unwrap();
        assert_eq!(ast.collect(NodeKind::Rule(Rule::Expr)).len(), depth + 1);
        assert_eq!(ast.descendants(ast.root()).count(), ast.len());
    }
}

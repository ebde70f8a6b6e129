//! Syntax trees built by the parsing machine.
//!
//! Nodes live in one arena in pre-order and refer to each other by
//! [`NodeId`]. All traversals use an explicit stack.

use std::fmt::Write as _;

use rustc_hash::FxHashMap;
use serde::Serialize;

use crate::grammar::RuleId;
use crate::token::{Token, TokenKind};

/// Index of a node in its [`Ast`]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct NodeId(u32);

impl NodeId {
    /// Position in the arena
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// What a node stands for
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NodeKind<R> {
    /// A grammar rule match
    Rule(R),
    /// A single token
    Token(TokenKind),
    /// Tokens skipped by error recovery
    Recovered,
}

/// A node of the tree
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Node<R> {
    /// Identity within the tree
    pub id: NodeId,
    /// Rule, token or recovery region
    pub kind: NodeKind<R>,
    /// Children in source order
    pub children: Vec<NodeId>,
    /// First token index
    pub start: usize,
    /// One past the last token index
    pub end: usize,
    /// Enclosing node, `None` for the root
    pub parent: Option<NodeId>,
}

/// Node as produced while parsing, before compaction
#[derive(Clone, Debug)]
pub(crate) struct RawNode<R> {
    pub kind: NodeKind<R>,
    pub children: Vec<u32>,
    pub start: usize,
    pub end: usize,
}

/// Immutable syntax tree over a token array
#[derive(Clone, Debug)]
pub struct Ast<R> {
    nodes: Vec<Node<R>>,
    tokens: Vec<Token>,
}

impl<R: RuleId> Ast<R> {
    /// Copy the subtree of `root` out of a parse arena, in pre-order.
    /// Nodes shared through memoization are copied at each use.
    pub(crate) fn from_arena(arena: &[RawNode<R>], root: u32, tokens: Vec<Token>) -> Self {
        let mut nodes: Vec<Node<R>> = Vec::new();
        let mut stack: Vec<(u32, Option<NodeId>)> = vec![(root, None)];
        while let Some((raw_id, parent)) = stack.pop() {
            let Some(raw) = arena.get(raw_id as usize) else {
                continue;
            };
            let id = NodeId(nodes.len() as u32);
            nodes.push(Node {
                id,
                kind: raw.kind,
                children: Vec::with_capacity(raw.children.len()),
                start: raw.start,
                end: raw.end,
                parent,
            });
            if let Some(parent) = parent {
                nodes[parent.index()].children.push(id);
            }
            for &child in raw.children.iter().rev() {
                stack.push((child, Some(id)));
            }
        }
        Self { nodes, tokens }
    }

    /// Root node
    #[must_use]
    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    /// Node by id.
    ///
    /// # Panics
    /// Panics if `id` does not belong to this tree.
    #[must_use]
    pub fn node(&self, id: NodeId) -> &Node<R> {
        &self.nodes[id.index()]
    }

    /// Node by id, `None` for a foreign id
    #[must_use]
    pub fn get(&self, id: NodeId) -> Option<&Node<R>> {
        self.nodes.get(id.index())
    }

    /// Number of nodes
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Check whether the tree has no nodes
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// All nodes in pre-order
    pub fn nodes(&self) -> impl Iterator<Item = &Node<R>> {
        self.nodes.iter()
    }

    /// Token array the tree spans
    #[must_use]
    pub fn tokens(&self) -> &[Token] {
        &self.tokens
    }

    /// Children of a node
    #[must_use]
    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.get(id).map_or(&[], |n| n.children.as_slice())
    }

    /// Parent of a node
    #[must_use]
    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.get(id).and_then(|n| n.parent)
    }

    /// Kind of a node
    #[must_use]
    pub fn kind(&self, id: NodeId) -> Option<NodeKind<R>> {
        self.get(id).map(|n| n.kind)
    }

    /// `id` and everything below it, in pre-order
    #[must_use]
    pub fn descendants(&self, id: NodeId) -> Descendants<'_, R> {
        Descendants {
            ast: self,
            stack: vec![id],
        }
    }

    /// All nodes of a kind, in pre-order
    #[must_use]
    pub fn collect(&self, kind: NodeKind<R>) -> Vec<NodeId> {
        self.nodes
            .iter()
            .filter(|n| n.kind == kind)
            .map(|n| n.id)
            .collect()
    }

    /// Check whether a node strictly below `id` has the kind
    #[must_use]
    pub fn has_descendant(&self, id: NodeId, kind: NodeKind<R>) -> bool {
        self.descendants(id)
            .skip(1)
            .any(|d| self.kind(d) == Some(kind))
    }

    /// First direct child of a kind
    #[must_use]
    pub fn first_child(&self, id: NodeId, kind: NodeKind<R>) -> Option<NodeId> {
        self.children(id)
            .iter()
            .copied()
            .find(|&c| self.kind(c) == Some(kind))
    }

    /// Tokens spanned by a node
    #[must_use]
    pub fn span_tokens(&self, id: NodeId) -> &[Token] {
        self.get(id)
            .and_then(|n| self.tokens.get(n.start..n.end))
            .unwrap_or(&[])
    }

    /// First token of a node
    #[must_use]
    pub fn token(&self, id: NodeId) -> Option<&Token> {
        self.span_tokens(id).first()
    }

    /// Source text of a node, tokens separated by a space where the source
    /// had one
    #[must_use]
    pub fn text(&self, id: NodeId) -> String {
        let tokens = self.span_tokens(id);
        let mut out = String::new();
        for (i, token) in tokens.iter().enumerate() {
            if i > 0 && !tokens[i - 1].is_adjacent_to(token) {
                out.push(' ');
            }
            out.push_str(&token.value);
        }
        out
    }

    /// Line of a node's first token; empty nodes use the token they sit at
    #[must_use]
    pub fn line(&self, id: NodeId) -> usize {
        self.get(id)
            .and_then(|n| self.tokens.get(n.start))
            .or_else(|| self.tokens.last())
            .map_or(0, |t| t.line)
    }

    /// Walk the tree from the root, calling `visitor` around each node it
    /// subscribes to
    pub fn visit(&self, visitor: &mut impl AstVisitor<R>) {
        let mut stack = vec![(self.root(), false)];
        while let Some((id, leaving)) = stack.pop() {
            let Some(node) = self.get(id) else {
                continue;
            };
            let subscribed = visitor.subscribed_to(&node.kind);
            if leaving {
                if subscribed {
                    visitor.leave_node(self, id);
                }
                continue;
            }
            if subscribed {
                visitor.visit_node(self, id);
            }
            stack.push((id, true));
            for &child in node.children.iter().rev() {
                stack.push((child, false));
            }
        }
    }

    /// Indented outline of the tree, one node per line
    #[must_use]
    pub fn dump(&self) -> String {
        let mut out = String::new();
        let mut stack = vec![(self.root(), 0usize)];
        while let Some((id, depth)) = stack.pop() {
            let Some(node) = self.get(id) else {
                continue;
            };
            let _ = write!(out, "{:indent$}", "", indent = depth * 2);
            let _ = match node.kind {
                NodeKind::Rule(rule) => writeln!(out, "{rule:?}"),
                NodeKind::Token(_) => writeln!(out, "{:?}", self.text(id)),
                NodeKind::Recovered => writeln!(out, "<recovered> {:?}", self.text(id)),
            };
            for &child in node.children.iter().rev() {
                stack.push((child, depth + 1));
            }
        }
        out
    }
}

/// Pre-order iterator returned by [`Ast::descendants`]
pub struct Descendants<'a, R> {
    ast: &'a Ast<R>,
    stack: Vec<NodeId>,
}

impl<R: RuleId> Iterator for Descendants<'_, R> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        let id = self.stack.pop()?;
        self.stack
            .extend(self.ast.children(id).iter().rev().copied());
        Some(id)
    }
}

/// Callbacks for [`Ast::visit`]
pub trait AstVisitor<R> {
    /// Whether the visitor wants callbacks for nodes of this kind
    fn subscribed_to(&self, _kind: &NodeKind<R>) -> bool {
        true
    }

    /// Called before the node's children
    fn visit_node(&mut self, _ast: &Ast<R>, _id: NodeId) {}

    /// Called after the node's children
    fn leave_node(&mut self, _ast: &Ast<R>, _id: NodeId) {}
}

/// Per-node metadata kept beside a tree
#[derive(Clone, Debug)]
pub struct SideTable<T> {
    values: FxHashMap<NodeId, T>,
}

impl<T> Default for SideTable<T> {
    fn default() -> Self {
        Self {
            values: FxHashMap::default(),
        }
    }
}

impl<T> SideTable<T> {
    /// Create an empty table
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a value to a node, returning the previous one
    pub fn insert(&mut self, id: NodeId, value: T) -> Option<T> {
        self.values.insert(id, value)
    }

    /// Value attached to a node
    #[must_use]
    pub fn get(&self, id: NodeId) -> Option<&T> {
        self.values.get(&id)
    }

    /// Mutable value attached to a node
    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut T> {
        self.values.get_mut(&id)
    }

    /// Detach a value
    pub fn remove(&mut self, id: NodeId) -> Option<T> {
        self.values.remove(&id)
    }

    /// Check whether a node has a value
    #[must_use]
    pub fn contains(&self, id: NodeId) -> bool {
        self.values.contains_key(&id)
    }

    /// Number of entries
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Check whether the table is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

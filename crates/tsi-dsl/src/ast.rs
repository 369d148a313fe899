//! The instruction AST and the visitor machinery that walks it.
//!
//! Ported from the `RootNode`/`IntermediaryNode`/`TerminalNode`/`VisitorContext`
//! family: a polymorphic node tree plus a depth-first visitor whose context
//! carries a stack of the currently-open rule names. Unlike the original's
//! `void* user_data`, the user-data slot here is a typed `&mut U` threaded
//! through every call, so there is no downcasting at the leaves.

use tsi_grammar::ProductionUnit;

/// One frame of the open-node stack: the rule name plus a cheap hash of it,
/// so repeated path comparisons during a deep walk don't re-hash strings.
#[derive(Debug, Clone)]
pub struct StackFrame {
    pub lhs: String,
    pub hash: u64,
}

impl StackFrame {
    pub fn new(lhs: impl Into<String>) -> Self {
        let lhs = lhs.into();
        let hash = fnv1a(&lhs);
        Self { lhs, hash }
    }
}

fn fnv1a(s: &str) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for byte in s.as_bytes() {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

/// The root of a parsed instruction: carries the start rule's LHS name.
#[derive(Debug, Clone)]
pub struct RootNode {
    pub lhs: String,
    pub children: Vec<AstNode>,
}

/// An interior node: the rule it matched and which alternative was chosen
/// (visitors pattern-match on `alt_index` when a rule's alternatives carry
/// distinct meaning, e.g. `true`/`false` for a boolean terminal rule).
#[derive(Debug, Clone)]
pub struct IntermediaryNode {
    pub lhs: String,
    pub alt_index: usize,
    pub children: Vec<AstNode>,
}

/// A leaf: exactly one lexed production unit.
#[derive(Debug, Clone)]
pub struct TerminalNode {
    pub unit: ProductionUnit,
}

#[derive(Debug, Clone)]
pub enum AstNode {
    Root(RootNode),
    Intermediary(IntermediaryNode),
    Terminal(TerminalNode),
}

impl AstNode {
    pub fn lhs(&self) -> Option<&str> {
        match self {
            Self::Root(n) => Some(&n.lhs),
            Self::Intermediary(n) => Some(&n.lhs),
            Self::Terminal(_) => None,
        }
    }

    /// Walks this node and its subtree, invoking `visitor` depth-first and
    /// maintaining `ctx.stack` so that the stack's length always equals the
    /// current node's depth in the tree (Root/Intermediary push a frame for
    /// the duration of their subtree; Terminal pushes nothing).
    pub fn accept<U, V: Visitor<U>>(&self, visitor: &mut V, ctx: &mut VisitorContext<'_, U>) {
        match self {
            Self::Root(n) => {
                visitor.visit_root(n, ctx);
                ctx.stack.push(StackFrame::new(n.lhs.clone()));
                for child in &n.children {
                    child.accept(visitor, ctx);
                }
                ctx.stack.pop();
            }
            Self::Intermediary(n) => {
                visitor.visit_intermediary(n, ctx);
                ctx.stack.push(StackFrame::new(n.lhs.clone()));
                for child in &n.children {
                    child.accept(visitor, ctx);
                }
                ctx.stack.pop();
            }
            Self::Terminal(n) => {
                visitor.visit_terminal(n, ctx);
            }
        }
    }
}

/// Carries the open-node stack and a typed reference to whatever record a
/// visitor is folding the AST into.
pub struct VisitorContext<'a, U> {
    pub stack: Vec<StackFrame>,
    pub user_data: &'a mut U,
}

impl<'a, U> VisitorContext<'a, U> {
    pub fn new(user_data: &'a mut U) -> Self {
        Self {
            stack: Vec::new(),
            user_data,
        }
    }

    /// True when the open-node stack's LHS names equal `path` exactly, in
    /// order. This is the sole mechanism visitors use to locate "where they
    /// are" in the tree (spec §4.3: rule-specific logic is "when the
    /// top-of-stack path equals [A, B, C], do X").
    pub fn path_is(&self, path: &[&str]) -> bool {
        self.stack.len() == path.len() && self.stack.iter().zip(path).all(|(frame, want)| frame.lhs == *want)
    }

    /// True when the stack's first `path.len()` frames equal `path`, allowing
    /// deeper nesting below it (used when a visitor only cares about a
    /// prefix, e.g. "somewhere under instrument_form").
    pub fn path_starts_with(&self, path: &[&str]) -> bool {
        self.stack.len() >= path.len() && self.stack.iter().zip(path).all(|(frame, want)| frame.lhs == *want)
    }
}

/// Visits a node at each of the three AST shapes. `U` is the caller's typed
/// accumulator (an observation instruction, a board instruction, ...).
pub trait Visitor<U> {
    fn visit_root(&mut self, node: &RootNode, ctx: &mut VisitorContext<'_, U>);
    fn visit_intermediary(&mut self, node: &IntermediaryNode, ctx: &mut VisitorContext<'_, U>);
    fn visit_terminal(&mut self, node: &TerminalNode, ctx: &mut VisitorContext<'_, U>);
}

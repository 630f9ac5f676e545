//! Parse-tree node types.
//!
//! A node has a tag drawn from a closed set, an optional lexeme (the literal
//! or identifier text attached to it), and an ordered sequence of children.
//! The compiler core treats parse trees as read-only.

use strum_macros::{Display, EnumIter, FromRepr};

/// Every kind of parse-tree node.
///
/// The child shapes are fixed per kind:
/// - `Top`: list of `FunDecl` / `VarDecl` / `GlobalCall`
/// - `GlobalCall`: id, no children
/// - `FunDecl`: id, `[Params, VarDecls, Statements]`
/// - `VarDecls` / `Params` / `Statements` / `Args`: lists
/// - `If`: `[expr, Statements, else-Statements?]` (third child may be absent)
/// - `While`: `[expr, Statements]`
/// - `Return` / `Not` / `Typeof`: `[expr]`
/// - `Assign` and the binary operators: `[left, right]`
/// - `Call`: `[callee, Args]`, `Index`: `[expr, expr]`, `Member`: id, `[expr]`
/// - `IntrinsicCall`: intrinsic name, `[Args]`
/// - `VarRef` / `Num` / `Str`: lexeme, no children
/// - `False` / `True` / `Obj`: no lexeme, no children
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter, FromRepr)]
pub enum NodeKind {
    Top,
    GlobalCall,
    FunDecl,
    VarDecls,
    VarDecl,
    Params,
    Param,
    Statements,
    If,
    While,
    Return,
    Assign,
    Or,
    And,
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
    Add,
    Sub,
    Mul,
    Mod,
    Div,
    Not,
    Typeof,
    Call,
    Index,
    Member,
    IntrinsicCall,
    Args,
    VarRef,
    Num,
    Str,
    False,
    True,
    Obj,
}

/// One parse-tree node.
#[derive(Debug, Clone)]
pub struct Node {
    pub kind: NodeKind,
    /// Resolved lexeme text for literals and identifiers, if any.
    /// For `Str` nodes this includes the outer quotes and raw escapes.
    pub lexeme: Option<Box<str>>,
    pub children: Vec<Node>,
}

impl Node {
    pub fn new(kind: NodeKind, lexeme: Option<Box<str>>, children: Vec<Node>) -> Self {
        Self { kind, lexeme, children }
    }

    /// Leaf constructor.
    pub fn leaf(kind: NodeKind, lexeme: Option<Box<str>>) -> Self {
        Self::new(kind, lexeme, Vec::new())
    }

    pub fn child(&self, index: usize) -> Option<&Node> {
        self.children.get(index)
    }

    /// The lexeme text, or "" when none is attached.
    pub fn text(&self) -> &str {
        self.lexeme.as_deref().unwrap_or("")
    }
}

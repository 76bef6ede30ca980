//! Abstract Syntax Tree for kernel sources
//!
//! ```text
//! <program>  ::= { <kernel> }
//! <kernel>   ::= ("__kernel" | "kernel") "void" <ident> "(" <params> ")" "{" { <stmt> } "}"
//! <param>    ::= { <qualifier> } <type> [ "*" ] <ident>
//! <stmt>     ::= <decl> | <assign> | <store> | "barrier" "(" <fence> { "|" <fence> } ")" ";" | "return" ";"
//! <expr>     ::= <term> { ("+" | "-") <term> }
//! <term>     ::= <unary> { ("*" | "/" | "%") <unary> }
//! <unary>    ::= "-" <unary> | "(" <type> ")" <unary> | <primary>
//! <primary>  ::= <int> | <ident> | <ident> "[" <expr> "]" | <ident> "(" <args> ")" | "(" <expr> ")"
//! ```

use super::lexer::Span;
use crate::isa::{MemoryFence, ParamKind, Type};

/// A parsed `__kernel` function
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelDef {
    pub name: String,
    pub span: Span,
    pub params: Vec<ParamDecl>,
    pub body: Vec<Stmt>,
}

/// A kernel parameter declaration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamDecl {
    pub name: String,
    pub span: Span,
    pub kind: ParamKind,
}

/// Assignment operator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignOp {
    Set,
    Add,
    Sub,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stmt {
    pub kind: StmtKind,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StmtKind {
    /// `[const] type name [= init];`
    Decl {
        ty: Type,
        is_const: bool,
        name: String,
        init: Option<Expr>,
    },
    /// `name op value;`
    Assign { name: String, op: AssignOp, value: Expr },
    /// `target[index] op value;`
    Store {
        target: String,
        index: Expr,
        op: AssignOp,
        value: Expr,
    },
    /// `barrier(flags);`
    Barrier { fence: MemoryFence },
    /// `return;`
    Return,
}

/// Binary arithmetic operator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expr {
    pub kind: ExprKind,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExprKind {
    /// Integer literal already typed by its value and suffix
    Int { value: i64, ty: Type },
    Var(String),
    Index { base: String, index: Box<Expr> },
    Call { name: String, args: Vec<Expr> },
    Neg(Box<Expr>),
    Cast { ty: Type, operand: Box<Expr> },
    Binary { op: BinOp, lhs: Box<Expr>, rhs: Box<Expr> },
}

impl Expr {
    pub fn new(kind: ExprKind, span: Span) -> Self {
        Self { kind, span }
    }

    /// Value of a literal, used for builtin dimension arguments
    pub fn as_constant(&self) -> Option<i64> {
        match &self.kind {
            ExprKind::Int { value, .. } => Some(*value),
            _ => None,
        }
    }
}

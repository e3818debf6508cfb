//! Statement AST nodes.

use crate::ast::expr::Expr;
use crate::span::Span;

/// A statement in the AST.
#[derive(Debug, Clone, PartialEq)]
pub struct Stmt {
    pub kind: StmtKind,
    pub span: Span,
}

impl Stmt {
    pub fn new(kind: StmtKind, span: Span) -> Self {
        Self { kind, span }
    }
}

/// Statement variants.
#[derive(Debug, Clone, PartialEq)]
pub enum StmtKind {
    /// Expression statement. Calls compiled here discard their result;
    /// anything else leaves a value behind, which is why the sink name `_`
    /// exists.
    Expression(Expr),

    /// Block: { statements }
    Block(Block),

    /// Conditional: if cond { ... } else { ... }
    /// `otherwise` holds a nested If for else-if chains.
    If {
        condition: Expr,
        then: Block,
        otherwise: Option<Box<Stmt>>,
    },

    /// Loop: while cond { ... }
    While { condition: Expr, body: Block },

    /// Assignment: `name := expr` declares, `name = expr` re-assigns.
    Assign {
        name: String,
        value: Expr,
        declare: bool,
    },

    /// Return statement: return expr
    Return(Expr),

    /// Breakpoint marker
    Breakpoint,
}

/// A sequence of statements delimited by braces.
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub statements: Vec<Stmt>,
    pub span: Span,
}

impl Block {
    pub fn new(statements: Vec<Stmt>, span: Span) -> Self {
        Self { statements, span }
    }
}

/// A parsed program: top-level statements plus the list of import paths and
/// the path the program was read from.
#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    pub imports: Vec<String>,
    pub statements: Vec<Stmt>,
    pub path: String,
}

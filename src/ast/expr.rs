//! Expression AST nodes.

use crate::ast::stmt::Block;
use crate::span::Span;
use crate::types::TypeSignature;

/// An expression in the AST.
#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub kind: ExprKind,
    pub span: Span,
}

impl Expr {
    pub fn new(kind: ExprKind, span: Span) -> Self {
        Self { kind, span }
    }
}

/// All expression variants.
#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    /// Number literal: 42, 3.14, 0xff
    Number(f64),
    /// String literal: "hello"
    String(String),
    /// Boolean literal: true, false
    Bool(bool),
    /// Nil literal
    Nil,

    /// List literal: [1, 2, 3]. `content` is the element type the parser
    /// annotated; empty literals carry `any` so their type stays deducible.
    List {
        items: Vec<Expr>,
        content: Option<TypeSignature>,
    },

    /// Variable reference: foo
    Reference(String),

    /// Binary operation: a + b
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },

    /// Unary operation: -x, !x
    Unary { op: UnaryOp, operand: Box<Expr> },

    /// Property access: source.name
    Access { source: Box<Expr>, property: String },

    /// Function call. `keep` is false when the call is a statement whose
    /// result should be discarded.
    Call {
        source: Box<Expr>,
        args: Vec<Expr>,
        keep: bool,
    },

    /// Function literal: func (p: type, ...) type { ... }
    Function(FunctionLiteral),
}

/// A function literal. Statement-level declarations carry their own name so
/// the body may refer to itself; anonymous literals are named `*`.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionLiteral {
    pub name: String,
    pub parameters: Vec<Parameter>,
    pub yield_signature: TypeSignature,
    pub body: Block,
}

/// A declared function parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    pub name: String,
    pub signature: TypeSignature,
}

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    And,
    Or,
    Equal,
    NotEqual,
    Less,
    Greater,
    LessEqual,
    GreaterEqual,
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Subtract => "-",
            BinaryOp::Multiply => "*",
            BinaryOp::Divide => "/",
            BinaryOp::And => "&&",
            BinaryOp::Or => "||",
            BinaryOp::Equal => "==",
            BinaryOp::NotEqual => "!=",
            BinaryOp::Less => "<",
            BinaryOp::Greater => ">",
            BinaryOp::LessEqual => "<=",
            BinaryOp::GreaterEqual => ">=",
        }
    }
}

impl std::fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            BinaryOp::Add => "add",
            BinaryOp::Subtract => "subtract",
            BinaryOp::Multiply => "multiply",
            BinaryOp::Divide => "divide",
            BinaryOp::And => "and",
            BinaryOp::Or => "or",
            BinaryOp::Equal => "equality",
            BinaryOp::NotEqual => "inequality",
            BinaryOp::Less => "less",
            BinaryOp::Greater => "greater",
            BinaryOp::LessEqual => "less or equal",
            BinaryOp::GreaterEqual => "greater or equal",
        };
        write!(f, "{}", name)
    }
}

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Negate,
    Not,
}

impl std::fmt::Display for UnaryOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UnaryOp::Negate => write!(f, "negate"),
            UnaryOp::Not => write!(f, "not"),
        }
    }
}

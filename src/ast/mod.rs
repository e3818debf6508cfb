//! Abstract Syntax Tree for Lume.

pub mod expr;
pub mod stmt;

pub use expr::{BinaryOp, Expr, ExprKind, FunctionLiteral, Parameter, UnaryOp};
pub use stmt::{Block, Program, Stmt, StmtKind};

//! Statement parsing: if, while, assignment, functions, return, blocks.

use crate::ast::{Block, Expr, ExprKind, Stmt, StmtKind};
use crate::error::ParseError;
use crate::lexer::TokenKind;

use super::core::{ParseResult, Parser};

impl Parser {
    pub(crate) fn statement(&mut self) -> ParseResult<Stmt> {
        match self.peek().kind.clone() {
            TokenKind::If => self.if_statement(),
            TokenKind::While => self.while_statement(),
            TokenKind::Func => self.func_statement(),
            TokenKind::Return => self.return_statement(),
            TokenKind::Breakpoint => {
                let span = self.advance().span;
                Ok(Stmt::new(StmtKind::Breakpoint, span))
            }
            TokenKind::Identifier(name) => self.identifier_statement(name),
            _ => Err(ParseError::InvalidStatement(self.peek().span)),
        }
    }

    fn if_statement(&mut self) -> ParseResult<Stmt> {
        let start = self.expect(&TokenKind::If)?.span;

        let condition = self.condition()?;
        let then = self.block()?;

        let otherwise = if self.match_token(&TokenKind::Else) {
            // allow else-if chains
            if self.check(&TokenKind::If) {
                Some(Box::new(self.statement()?))
            } else {
                let block = self.block()?;
                let span = block.span;
                Some(Box::new(Stmt::new(StmtKind::Block(block), span)))
            }
        } else {
            None
        };

        Ok(Stmt::new(
            StmtKind::If {
                condition,
                then,
                otherwise,
            },
            self.span_from(start),
        ))
    }

    fn while_statement(&mut self) -> ParseResult<Stmt> {
        let start = self.expect(&TokenKind::While)?.span;

        let condition = self.condition()?;
        let body = self.block()?;

        Ok(Stmt::new(
            StmtKind::While { condition, body },
            self.span_from(start),
        ))
    }

    /// `func name(...)` declares a function under its own name.
    fn func_statement(&mut self) -> ParseResult<Stmt> {
        let start = self.expect(&TokenKind::Func)?.span;

        let name = self.expect_identifier()?;
        let literal = self.function_literal(&name)?;
        let span = self.span_from(start);

        Ok(Stmt::new(
            StmtKind::Assign {
                name,
                value: Expr::new(ExprKind::Function(literal), span),
                declare: true,
            },
            span,
        ))
    }

    fn return_statement(&mut self) -> ParseResult<Stmt> {
        let start = self.expect(&TokenKind::Return)?.span;
        let value = self.condition()?;

        Ok(Stmt::new(StmtKind::Return(value), self.span_from(start)))
    }

    /// A statement opening with a name: assignment, declaration, a call, a
    /// property chain, or a bare expression.
    fn identifier_statement(&mut self, name: String) -> ParseResult<Stmt> {
        let start = self.peek().span;
        let checkpoint = self.current;
        self.advance();

        match self.peek().kind.clone() {
            TokenKind::Assign | TokenKind::Declare => {
                let declare = self.peek().kind == TokenKind::Declare;
                self.advance();

                let value = self.condition()?;

                Ok(Stmt::new(
                    StmtKind::Assign {
                        name,
                        value,
                        declare,
                    },
                    self.span_from(start),
                ))
            }

            TokenKind::LeftParen => {
                let args = self.parse_args()?;
                let call = Expr::new(
                    ExprKind::Call {
                        source: Box::new(Expr::new(ExprKind::Reference(name), start)),
                        args,
                        // a statement-level call discards its result
                        keep: false,
                    },
                    self.span_from(start),
                );

                Ok(Stmt::new(StmtKind::Expression(call), self.span_from(start)))
            }

            TokenKind::Dot => {
                let mut value = Expr::new(ExprKind::Reference(name), start);

                while self.match_token(&TokenKind::Dot) {
                    let property = self.expect_identifier()?;

                    value = Expr::new(
                        ExprKind::Access {
                            source: Box::new(value),
                            property,
                        },
                        self.span_from(start),
                    );

                    if self.check(&TokenKind::LeftParen) {
                        let args = self.parse_args()?;
                        // keep the value only when the chain continues
                        let keep = self.check(&TokenKind::Dot);
                        value = Expr::new(
                            ExprKind::Call {
                                source: Box::new(value),
                                args,
                                keep,
                            },
                            self.span_from(start),
                        );
                    }
                }

                Ok(Stmt::new(
                    StmtKind::Expression(value),
                    self.span_from(start),
                ))
            }

            _ => {
                // a bare expression statement; rewind and parse it whole
                self.current = checkpoint;
                let value = self.condition()?;

                Ok(Stmt::new(
                    StmtKind::Expression(value),
                    self.span_from(start),
                ))
            }
        }
    }

    /// A brace-delimited block of statements.
    pub(crate) fn block(&mut self) -> ParseResult<Block> {
        let start = self.expect(&TokenKind::LeftBrace)?.span;

        let mut statements = Vec::new();
        while !self.match_token(&TokenKind::RightBrace) {
            if self.is_at_end() {
                return Err(ParseError::unexpected_token(
                    "}",
                    "EOF",
                    self.peek().span,
                ));
            }

            if self.check(&TokenKind::LeftBrace) {
                let block = self.block()?;
                let span = block.span;
                statements.push(Stmt::new(StmtKind::Block(block), span));
            } else {
                statements.push(self.statement()?);
            }
        }

        Ok(Block::new(statements, self.span_from(start)))
    }
}

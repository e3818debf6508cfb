//! Expression parsing: a small cascade of precedence levels.

use crate::ast::{BinaryOp, Expr, ExprKind, FunctionLiteral, UnaryOp};
use crate::error::ParseError;
use crate::lexer::TokenKind;
use crate::types::TypeSignature;

use super::core::{ParseResult, Parser};

impl Parser {
    /// Top expression level: a comparison optionally joined by `&&`/`||`.
    pub(crate) fn condition(&mut self) -> ParseResult<Expr> {
        let start = self.peek().span;
        let left = self.comparison()?;

        let op = match self.peek().kind {
            TokenKind::And => BinaryOp::And,
            TokenKind::Or => BinaryOp::Or,
            _ => return Ok(left),
        };
        self.advance();

        let right = self.comparison()?;

        Ok(Expr::new(
            ExprKind::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            },
            self.span_from(start),
        ))
    }

    fn comparison(&mut self) -> ParseResult<Expr> {
        let start = self.peek().span;
        let left = self.term()?;

        let op = match self.peek().kind {
            TokenKind::EqualEqual => BinaryOp::Equal,
            TokenKind::BangEqual => BinaryOp::NotEqual,
            TokenKind::Greater => BinaryOp::Greater,
            TokenKind::Less => BinaryOp::Less,
            TokenKind::LessEqual => BinaryOp::LessEqual,
            TokenKind::GreaterEqual => BinaryOp::GreaterEqual,
            _ => return Ok(left),
        };
        self.advance();

        let right = self.term()?;

        Ok(Expr::new(
            ExprKind::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            },
            self.span_from(start),
        ))
    }

    fn term(&mut self) -> ParseResult<Expr> {
        let start = self.peek().span;
        let mut left = self.product()?;

        loop {
            let op = match self.peek().kind {
                TokenKind::Plus => BinaryOp::Add,
                TokenKind::Minus => BinaryOp::Subtract,
                _ => break,
            };
            self.advance();

            let right = self.product()?;
            left = Expr::new(
                ExprKind::Binary {
                    op,
                    left: Box::new(left),
                    right: Box::new(right),
                },
                self.span_from(start),
            );
        }

        Ok(left)
    }

    fn product(&mut self) -> ParseResult<Expr> {
        let start = self.peek().span;
        let mut left = self.prop()?;

        loop {
            let op = match self.peek().kind {
                TokenKind::Star => BinaryOp::Multiply,
                TokenKind::Slash => BinaryOp::Divide,
                _ => break,
            };
            self.advance();

            let right = self.prop()?;
            left = Expr::new(
                ExprKind::Binary {
                    op,
                    left: Box::new(left),
                    right: Box::new(right),
                },
                self.span_from(start),
            );
        }

        Ok(left)
    }

    /// Chains of property access and method calls:
    /// `"a,b".split(",").length()`
    pub(crate) fn prop(&mut self) -> ParseResult<Expr> {
        let start = self.peek().span;
        let mut value = self.factor()?;

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
                value = Expr::new(
                    ExprKind::Call {
                        source: Box::new(value),
                        args,
                        keep: true,
                    },
                    self.span_from(start),
                );
            }
        }

        Ok(value)
    }

    fn factor(&mut self) -> ParseResult<Expr> {
        let start = self.peek().span;

        match self.peek().kind.clone() {
            TokenKind::StringLiteral(value) => {
                self.advance();
                Ok(Expr::new(ExprKind::String(value), start))
            }

            TokenKind::NumberLiteral(value) => {
                self.advance();
                Ok(Expr::new(ExprKind::Number(value), start))
            }

            TokenKind::BoolLiteral(value) => {
                self.advance();
                Ok(Expr::new(ExprKind::Bool(value), start))
            }

            TokenKind::Nil => {
                self.advance();
                Ok(Expr::new(ExprKind::Nil, start))
            }

            TokenKind::LeftBracket => {
                self.advance();

                let mut items = Vec::new();
                while !self.match_token(&TokenKind::RightBracket) {
                    if !items.is_empty() {
                        self.expect(&TokenKind::Comma)?;
                    }
                    items.push(self.condition()?);
                }

                // an empty literal carries an `any` element annotation so
                // its type stays deducible
                let content = if items.is_empty() {
                    Some(TypeSignature::Any)
                } else {
                    None
                };

                Ok(Expr::new(
                    ExprKind::List { items, content },
                    self.span_from(start),
                ))
            }

            TokenKind::Minus => {
                self.advance();
                let operand = self.factor()?;
                Ok(Expr::new(
                    ExprKind::Unary {
                        op: UnaryOp::Negate,
                        operand: Box::new(operand),
                    },
                    self.span_from(start),
                ))
            }

            TokenKind::Bang => {
                self.advance();
                let operand = self.factor()?;
                Ok(Expr::new(
                    ExprKind::Unary {
                        op: UnaryOp::Not,
                        operand: Box::new(operand),
                    },
                    self.span_from(start),
                ))
            }

            TokenKind::Identifier(name) => {
                self.advance();
                let reference = Expr::new(ExprKind::Reference(name), start);

                if self.check(&TokenKind::LeftParen) {
                    let args = self.parse_args()?;
                    return Ok(Expr::new(
                        ExprKind::Call {
                            source: Box::new(reference),
                            args,
                            keep: true,
                        },
                        self.span_from(start),
                    ));
                }

                Ok(reference)
            }

            TokenKind::Func => {
                self.advance();
                let literal = self.function_literal("*")?;
                Ok(Expr::new(ExprKind::Function(literal), self.span_from(start)))
            }

            TokenKind::LeftParen => {
                self.advance();
                let value = self.condition()?;
                self.expect(&TokenKind::RightParen)?;
                Ok(value)
            }

            _ => Err(ParseError::InvalidFactor(start)),
        }
    }

    /// Parameters, optional yield type and body of a function literal. The
    /// yield type defaults to nil when the body follows directly.
    pub(crate) fn function_literal(&mut self, name: &str) -> ParseResult<FunctionLiteral> {
        let parameters = self.parse_params()?;

        let yield_signature = if self.check(&TokenKind::LeftBrace) {
            TypeSignature::Nil
        } else {
            self.parse_signature()?
        };

        let body = self.block()?;

        Ok(FunctionLiteral {
            name: name.to_string(),
            parameters,
            yield_signature,
            body,
        })
    }

    pub(crate) fn parse_args(&mut self) -> ParseResult<Vec<Expr>> {
        self.expect(&TokenKind::LeftParen)?;

        let mut args = Vec::new();
        while !self.match_token(&TokenKind::RightParen) {
            if !args.is_empty() {
                self.expect(&TokenKind::Comma)?;
            }
            args.push(self.condition()?);
        }

        Ok(args)
    }
}

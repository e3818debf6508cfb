//! Core parser struct and helper methods.

use crate::ast::{Program, Stmt, StmtKind};
use crate::error::ParseError;
use crate::lexer::{Token, TokenKind};
use crate::span::Span;

pub type ParseResult<T> = Result<T, ParseError>;

/// Recursive-descent parser producing the AST the compiler walks.
pub struct Parser {
    pub(crate) tokens: Vec<Token>,
    pub(crate) current: usize,
}

impl Parser {
    pub fn new(tokens: Vec<Token>) -> Self {
        Self { tokens, current: 0 }
    }

    /// Parse a complete program. `path` is recorded for import-cycle
    /// detection and diagnostics.
    pub fn parse(&mut self, path: &str) -> ParseResult<Program> {
        let mut imports = Vec::new();
        let mut statements = Vec::new();

        while !self.is_at_end() {
            if self.match_token(&TokenKind::Import) {
                let token = self.expect(&TokenKind::StringLiteral(String::new()))?;
                let TokenKind::StringLiteral(import) = token.kind else {
                    unreachable!();
                };
                imports.push(import);
                continue;
            }

            // a top-level brace opens an explicit block
            if self.check(&TokenKind::LeftBrace) {
                let block = self.block()?;
                let span = block.span;
                statements.push(Stmt::new(StmtKind::Block(block), span));
            } else {
                statements.push(self.statement()?);
            }
        }

        Ok(Program {
            imports,
            statements,
            path: path.to_string(),
        })
    }

    // ===== Token manipulation =====

    pub(crate) fn advance(&mut self) -> Token {
        if !self.is_at_end() {
            self.current += 1;
        }
        self.tokens[self.current - 1].clone()
    }

    pub(crate) fn peek(&self) -> &Token {
        &self.tokens[self.current]
    }

    pub(crate) fn previous(&self) -> &Token {
        &self.tokens[self.current - 1]
    }

    pub(crate) fn is_at_end(&self) -> bool {
        self.peek().kind == TokenKind::Eof
    }

    pub(crate) fn check(&self, kind: &TokenKind) -> bool {
        std::mem::discriminant(&self.peek().kind) == std::mem::discriminant(kind)
    }

    pub(crate) fn match_token(&mut self, kind: &TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    pub(crate) fn expect(&mut self, kind: &TokenKind) -> ParseResult<Token> {
        if self.check(kind) {
            Ok(self.advance())
        } else {
            Err(ParseError::unexpected_token(
                format!("{}", kind),
                format!("{}", self.peek().kind),
                self.peek().span,
            ))
        }
    }

    pub(crate) fn expect_identifier(&mut self) -> ParseResult<String> {
        match &self.peek().kind {
            TokenKind::Identifier(name) => {
                let name = name.clone();
                self.advance();
                Ok(name)
            }
            other => Err(ParseError::unexpected_token(
                "identifier",
                format!("{}", other),
                self.peek().span,
            )),
        }
    }

    /// Span from `start` to the end of the previous token.
    pub(crate) fn span_from(&self, start: Span) -> Span {
        start.merge(self.previous().span)
    }
}

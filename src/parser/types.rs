//! Type annotation parsing.

use crate::ast::Parameter;
use crate::error::ParseError;
use crate::lexer::TokenKind;
use crate::types::{FunctionSignature, TypeSignature};

use super::core::{ParseResult, Parser};

impl Parser {
    /// Parse a type annotation: `string`, `number`, `boolean`, `nil`,
    /// `any`, `list[T]`, `func(T, ...) R`, or composites `A|B`.
    pub(crate) fn parse_signature(&mut self) -> ParseResult<TypeSignature> {
        let signature = if self.match_token(&TokenKind::Func) {
            self.expect(&TokenKind::LeftParen)?;

            let mut params = Vec::new();
            while !self.match_token(&TokenKind::RightParen) {
                if !params.is_empty() {
                    self.expect(&TokenKind::Comma)?;
                }
                params.push(self.parse_signature()?);
            }

            let yields = self.parse_signature()?;

            TypeSignature::Function(FunctionSignature::new(params, yields))
        } else if self.match_token(&TokenKind::Nil) {
            TypeSignature::Nil
        } else {
            let span = self.peek().span;
            let name = self.expect_identifier()?;

            match name.as_str() {
                "string" => TypeSignature::String,
                "number" => TypeSignature::Number,
                "boolean" => TypeSignature::Boolean,
                "any" => TypeSignature::Any,
                "list" => {
                    self.expect(&TokenKind::LeftBracket)?;
                    let contents = self.parse_signature()?;
                    self.expect(&TokenKind::RightBracket)?;

                    TypeSignature::List(Box::new(contents))
                }
                _ => return Err(ParseError::UnsupportedType(name, span)),
            }
        };

        // `A|B` composites associate to the right
        if self.match_token(&TokenKind::Pipe) {
            let other = self.parse_signature()?;
            return Ok(TypeSignature::Composite(
                Box::new(signature),
                Box::new(other),
            ));
        }

        Ok(signature)
    }

    /// Parse a parenthesised, comma-separated parameter list with
    /// mandatory type annotations.
    pub(crate) fn parse_params(&mut self) -> ParseResult<Vec<Parameter>> {
        self.expect(&TokenKind::LeftParen)?;

        let mut params = Vec::new();
        while !self.match_token(&TokenKind::RightParen) {
            if !params.is_empty() {
                self.expect(&TokenKind::Comma)?;
            }

            let name = self.expect_identifier()?;
            self.expect(&TokenKind::Colon)?;
            let signature = self.parse_signature()?;

            params.push(Parameter { name, signature });
        }

        Ok(params)
    }
}

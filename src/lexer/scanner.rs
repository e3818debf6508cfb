//! Lexer/Scanner for Lume source code.

use crate::error::LexError;
use crate::lexer::token::{Token, TokenKind};
use crate::span::Span;

/// The lexer transforms source code into a stream of tokens.
pub struct Scanner<'a> {
    source: &'a str,
    chars: std::iter::Peekable<std::str::CharIndices<'a>>,
    current_pos: usize,
    line: usize,
    column: usize,
    start_pos: usize,
    start_line: usize,
    start_column: usize,
}

impl<'a> Scanner<'a> {
    pub fn new(source: &'a str) -> Self {
        Self {
            source,
            chars: source.char_indices().peekable(),
            current_pos: 0,
            line: 1,
            column: 1,
            start_pos: 0,
            start_line: 1,
            start_column: 1,
        }
    }

    /// Scan all tokens from the source. The stream always ends with `Eof`.
    pub fn scan_tokens(&mut self) -> Result<Vec<Token>, LexError> {
        let mut tokens = Vec::new();

        loop {
            let token = self.scan_token()?;
            let is_eof = token.kind == TokenKind::Eof;
            tokens.push(token);
            if is_eof {
                break;
            }
        }

        Ok(tokens)
    }

    /// Scan the next token.
    pub fn scan_token(&mut self) -> Result<Token, LexError> {
        self.skip_whitespace_and_comments();
        self.mark_start();

        let Some(c) = self.advance() else {
            return Ok(Token::eof(self.current_pos, self.line, self.column));
        };

        match c {
            '(' => Ok(self.make_token(TokenKind::LeftParen)),
            ')' => Ok(self.make_token(TokenKind::RightParen)),
            '{' => Ok(self.make_token(TokenKind::LeftBrace)),
            '}' => Ok(self.make_token(TokenKind::RightBrace)),
            '[' => Ok(self.make_token(TokenKind::LeftBracket)),
            ']' => Ok(self.make_token(TokenKind::RightBracket)),
            ',' => Ok(self.make_token(TokenKind::Comma)),
            '.' => Ok(self.make_token(TokenKind::Dot)),
            '+' => Ok(self.make_token(TokenKind::Plus)),
            '-' => Ok(self.make_token(TokenKind::Minus)),
            '*' => Ok(self.make_token(TokenKind::Star)),
            '/' => Ok(self.make_token(TokenKind::Slash)),

            ':' => {
                if self.match_char('=') {
                    Ok(self.make_token(TokenKind::Declare))
                } else {
                    Ok(self.make_token(TokenKind::Colon))
                }
            }
            '=' => {
                if self.match_char('=') {
                    Ok(self.make_token(TokenKind::EqualEqual))
                } else {
                    Ok(self.make_token(TokenKind::Assign))
                }
            }
            '!' => {
                if self.match_char('=') {
                    Ok(self.make_token(TokenKind::BangEqual))
                } else {
                    Ok(self.make_token(TokenKind::Bang))
                }
            }
            '<' => {
                if self.match_char('=') {
                    Ok(self.make_token(TokenKind::LessEqual))
                } else {
                    Ok(self.make_token(TokenKind::Less))
                }
            }
            '>' => {
                if self.match_char('=') {
                    Ok(self.make_token(TokenKind::GreaterEqual))
                } else {
                    Ok(self.make_token(TokenKind::Greater))
                }
            }
            '&' => {
                if self.match_char('&') {
                    Ok(self.make_token(TokenKind::And))
                } else {
                    Err(LexError::MalformedToken {
                        message: "got '&', expected '&' to follow".to_string(),
                        span: self.current_span(),
                    })
                }
            }
            '|' => {
                if self.match_char('|') {
                    Ok(self.make_token(TokenKind::Or))
                } else {
                    Ok(self.make_token(TokenKind::Pipe))
                }
            }

            '"' => self.scan_string(),

            c if c.is_ascii_digit() => self.scan_number(c),
            c if c.is_alphabetic() || c == '_' => Ok(self.scan_identifier()),

            c => Err(LexError::UnexpectedChar(c, self.current_span())),
        }
    }

    fn scan_string(&mut self) -> Result<Token, LexError> {
        let mut value = String::new();

        loop {
            match self.peek() {
                Some('"') => {
                    self.advance();
                    break;
                }
                Some('\n') => {
                    return Err(LexError::MultilineString(self.current_span()));
                }
                Some(c) => {
                    value.push(c);
                    self.advance();
                }
                None => {
                    return Err(LexError::UnterminatedString(self.current_span()));
                }
            }
        }

        Ok(self.make_token(TokenKind::StringLiteral(value)))
    }

    fn scan_number(&mut self, first: char) -> Result<Token, LexError> {
        // hexadecimal literal
        if first == '0' && self.peek() == Some('x') {
            self.advance();
            while matches!(self.peek(), Some(c) if c.is_ascii_hexdigit()) {
                self.advance();
            }
            let lexeme = &self.source[self.start_pos + 2..self.current_pos];
            let value = u64::from_str_radix(lexeme, 16)
                .map_err(|_| LexError::InvalidNumber(lexeme.to_string(), self.current_span()))?;
            return Ok(self.make_token(TokenKind::NumberLiteral(value as f64)));
        }

        while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
            self.advance();
        }

        // fraction, only when a digit follows the dot
        if self.peek() == Some('.') && matches!(self.peek_next(), Some(c) if c.is_ascii_digit()) {
            self.advance();
            while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
                self.advance();
            }
        }

        let lexeme = &self.source[self.start_pos..self.current_pos];
        let value = lexeme
            .parse::<f64>()
            .map_err(|_| LexError::InvalidNumber(lexeme.to_string(), self.current_span()))?;

        Ok(self.make_token(TokenKind::NumberLiteral(value)))
    }

    fn scan_identifier(&mut self) -> Token {
        while matches!(self.peek(), Some(c) if c.is_alphanumeric() || c == '_') {
            self.advance();
        }

        let lexeme = &self.source[self.start_pos..self.current_pos];
        match TokenKind::keyword(lexeme) {
            Some(kind) => self.make_token(kind),
            None => self.make_token(TokenKind::Identifier(lexeme.to_string())),
        }
    }

    fn skip_whitespace_and_comments(&mut self) {
        loop {
            match self.peek() {
                Some(c) if c.is_whitespace() => {
                    self.advance();
                }
                Some('#') => {
                    while !matches!(self.peek(), Some('\n') | None) {
                        self.advance();
                    }
                }
                _ => break,
            }
        }
    }

    fn mark_start(&mut self) {
        self.start_pos = self.current_pos;
        self.start_line = self.line;
        self.start_column = self.column;
    }

    fn advance(&mut self) -> Option<char> {
        let (_, c) = self.chars.next()?;
        self.current_pos += c.len_utf8();
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn peek(&mut self) -> Option<char> {
        self.chars.peek().map(|&(_, c)| c)
    }

    fn peek_next(&mut self) -> Option<char> {
        self.source[self.current_pos..].chars().nth(1)
    }

    fn match_char(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn make_token(&self, kind: TokenKind) -> Token {
        Token::new(
            kind,
            Span::new(
                self.start_pos,
                self.current_pos,
                self.start_line,
                self.start_column,
            ),
        )
    }

    fn current_span(&self) -> Span {
        Span::new(
            self.start_pos,
            self.current_pos,
            self.start_line,
            self.start_column,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        Scanner::new(source)
            .scan_tokens()
            .expect("scan should succeed")
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn test_scan_operators() {
        assert_eq!(
            kinds("1 + 2 / 3 * 4"),
            vec![
                TokenKind::NumberLiteral(1.0),
                TokenKind::Plus,
                TokenKind::NumberLiteral(2.0),
                TokenKind::Slash,
                TokenKind::NumberLiteral(3.0),
                TokenKind::Star,
                TokenKind::NumberLiteral(4.0),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_scan_declare_vs_colon() {
        assert_eq!(
            kinds("a := 1"),
            vec![
                TokenKind::Identifier("a".to_string()),
                TokenKind::Declare,
                TokenKind::NumberLiteral(1.0),
                TokenKind::Eof,
            ]
        );
        assert_eq!(
            kinds("a: number"),
            vec![
                TokenKind::Identifier("a".to_string()),
                TokenKind::Colon,
                TokenKind::Identifier("number".to_string()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_scan_comparisons() {
        assert_eq!(
            kinds("a <= 1 == b != c >= 2"),
            vec![
                TokenKind::Identifier("a".to_string()),
                TokenKind::LessEqual,
                TokenKind::NumberLiteral(1.0),
                TokenKind::EqualEqual,
                TokenKind::Identifier("b".to_string()),
                TokenKind::BangEqual,
                TokenKind::Identifier("c".to_string()),
                TokenKind::GreaterEqual,
                TokenKind::NumberLiteral(2.0),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_scan_keywords() {
        assert_eq!(
            kinds("func f() { return nil }"),
            vec![
                TokenKind::Func,
                TokenKind::Identifier("f".to_string()),
                TokenKind::LeftParen,
                TokenKind::RightParen,
                TokenKind::LeftBrace,
                TokenKind::Return,
                TokenKind::Nil,
                TokenKind::RightBrace,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_scan_string_and_comment() {
        assert_eq!(
            kinds("\"hi there\" # a comment\ntrue"),
            vec![
                TokenKind::StringLiteral("hi there".to_string()),
                TokenKind::BoolLiteral(true),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_scan_hex_and_fraction() {
        assert_eq!(
            kinds("0xff 1.25"),
            vec![
                TokenKind::NumberLiteral(255.0),
                TokenKind::NumberLiteral(1.25),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_dot_call_is_not_fraction() {
        assert_eq!(
            kinds("xs.at(0)"),
            vec![
                TokenKind::Identifier("xs".to_string()),
                TokenKind::Dot,
                TokenKind::Identifier("at".to_string()),
                TokenKind::LeftParen,
                TokenKind::NumberLiteral(0.0),
                TokenKind::RightParen,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_unterminated_string_errors() {
        let err = Scanner::new("\"oops").scan_tokens().unwrap_err();
        assert!(matches!(err, LexError::UnterminatedString(_)));
    }

    #[test]
    fn test_multiline_string_errors() {
        let err = Scanner::new("\"a\nb\"").scan_tokens().unwrap_err();
        assert!(matches!(err, LexError::MultilineString(_)));
    }

    #[test]
    fn test_empty_source_is_just_eof() {
        assert_eq!(kinds(""), vec![TokenKind::Eof]);
    }

    #[test]
    fn test_spans_track_lines() {
        let tokens = Scanner::new("a\nbb").scan_tokens().unwrap();
        assert_eq!(tokens[0].span.line, 1);
        assert_eq!(tokens[1].span.line, 2);
        assert_eq!(tokens[1].span.start, 2);
        assert_eq!(tokens[1].span.end, 4);
    }
}

//! Error types for all pipeline phases.

use crate::span::Span;
use thiserror::Error;

/// Lexer errors.
#[derive(Debug, Error)]
pub enum LexError {
    #[error("Unexpected character '{0}' at {1}")]
    UnexpectedChar(char, Span),

    #[error("Unterminated string at {0}")]
    UnterminatedString(Span),

    #[error("String did not end in current line at {0}")]
    MultilineString(Span),

    #[error("Malformed token at {span}: {message}")]
    MalformedToken { message: String, span: Span },

    #[error("Invalid number '{0}' at {1}")]
    InvalidNumber(String, Span),
}

impl LexError {
    pub fn span(&self) -> Span {
        match self {
            Self::UnexpectedChar(_, span) => *span,
            Self::UnterminatedString(span) => *span,
            Self::MultilineString(span) => *span,
            Self::MalformedToken { span, .. } => *span,
            Self::InvalidNumber(_, span) => *span,
        }
    }
}

/// Parser errors.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("Expected {expected}, got {found} at {span}")]
    UnexpectedToken {
        expected: String,
        found: String,
        span: Span,
    },

    #[error("Invalid factor at {0}")]
    InvalidFactor(Span),

    #[error("Invalid statement at {0}")]
    InvalidStatement(Span),

    #[error("Unsupported type '{0}' at {1}")]
    UnsupportedType(String, Span),

    #[error("{message} at {span}")]
    General { message: String, span: Span },
}

impl ParseError {
    pub fn unexpected_token(
        expected: impl Into<String>,
        found: impl Into<String>,
        span: Span,
    ) -> Self {
        Self::UnexpectedToken {
            expected: expected.into(),
            found: found.into(),
            span,
        }
    }

    pub fn general(message: impl Into<String>, span: Span) -> Self {
        Self::General {
            message: message.into(),
            span,
        }
    }

    pub fn span(&self) -> Span {
        match self {
            Self::UnexpectedToken { span, .. } => *span,
            Self::InvalidFactor(span) => *span,
            Self::InvalidStatement(span) => *span,
            Self::UnsupportedType(_, span) => *span,
            Self::General { span, .. } => *span,
        }
    }

    /// Render the error with a snippet of the offending source.
    pub fn render(&self, source: &str) -> String {
        format!("{}\n{}", self, render_snippet(source, self.span()))
    }
}

impl From<LexError> for ParseError {
    fn from(err: LexError) -> Self {
        let span = err.span();
        Self::General {
            message: err.to_string(),
            span,
        }
    }
}

/// Compilation errors: type mismatches, undefined references, bad arity.
///
/// Carries the full source of the file being compiled and a snapshot of the
/// import stack, so a rich rendering is possible long after compilation
/// stopped. Warnings use the same shape.
#[derive(Debug, Clone)]
pub struct CompileError {
    pub description: String,
    pub span: Span,
    pub source: String,
    pub trace: Vec<String>,
}

impl std::fmt::Display for CompileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} at {}", self.description, self.span)
    }
}

impl std::error::Error for CompileError {}

impl CompileError {
    pub fn new(description: impl Into<String>, span: Span) -> Self {
        Self {
            description: description.into(),
            span,
            source: String::new(),
            trace: Vec::new(),
        }
    }

    /// Render the description, the offending source lines with the span
    /// underlined, and the numbered import trace.
    pub fn render(&self) -> String {
        let mut out = self.description.clone();
        out.push('\n');
        out.push_str(&render_snippet(&self.source, self.span));

        if !self.trace.is_empty() {
            out.push_str("\nsource trace:");
            for (i, path) in self.trace.iter().enumerate().rev() {
                out.push_str(&format!("\n[{}] {}", i + 1, path));
            }
        }

        out
    }
}

/// Reformat the source around `span`, prefixing each affected line with
/// `line:startCol~endCol |` and underlining the span with `^` markers.
pub fn render_snippet(source: &str, span: Span) -> String {
    let mut out = String::new();
    let start = span.start.min(source.len());
    let end = span.end.clamp(start, source.len());

    let mut line_number = 1;

    for (line_start, line) in split_lines(source) {
        let line_end = line_start + line.len();

        if line_end < start {
            line_number += 1;
            continue;
        }
        if line_start > end || (line_start == end && line_start > start) {
            break;
        }

        let begin = start.saturating_sub(line_start);
        let stop = end.min(line_end).saturating_sub(line_start).max(begin);

        let descriptor = format!("{}:{}~{}", line_number, begin, stop);
        out.push_str(&descriptor);
        out.push_str(" | ");
        out.push_str(line);
        out.push('\n');

        out.push_str(&" ".repeat(descriptor.len() + 3 + begin));
        out.push_str(&"^".repeat((stop - begin).max(1)));
        out.push('\n');

        line_number += 1;
    }

    out
}

/// Split source into `(byte offset, line)` pairs without the newlines.
fn split_lines(source: &str) -> impl Iterator<Item = (usize, &str)> {
    source.split_inclusive('\n').scan(0, |offset, raw| {
        let start = *offset;
        *offset += raw.len();
        Some((start, raw.trim_end_matches('\n')))
    })
}

/// Runtime errors raised while the VM executes a chunk.
///
/// The chunk carries no source mapping, so these are message-only. Failures
/// of compiler-guaranteed invariants (wrong operand types, stack imbalance)
/// are panics, not `RuntimeError`s.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("cannot get local: undefined variable {0}")]
    UndefinedLocal(String),

    #[error("cannot set local: undefined variable {0}")]
    UnassignableLocal(String),

    #[error("undefined global {0}")]
    UndefinedGlobal(String),

    #[error("value called is not a function ({0})")]
    NotCallable(String),

    #[error("{0}")]
    Native(String),
}

impl RuntimeError {
    pub fn native(message: impl Into<String>) -> Self {
        Self::Native(message.into())
    }
}

/// Errors from decoding a serialized chunk.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("not a lume bytecode file")]
    BadMagic,

    #[error("unsupported bytecode version {0}")]
    UnsupportedVersion(u8),

    #[error("unexpected end of bytecode file")]
    UnexpectedEof,

    #[error("invalid {what} tag {tag}")]
    InvalidTag { what: &'static str, tag: u8 },

    #[error("invalid utf-8 in string constant")]
    InvalidString,
}

/// A unified error type for all phases.
#[derive(Debug, Error)]
pub enum LumeError {
    #[error("Lex error: {0}")]
    Lex(#[from] LexError),

    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("Compile error: {0}")]
    Compile(#[from] CompileError),

    #[error("Runtime error: {0}")]
    Runtime(#[from] RuntimeError),

    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snippet_underlines_span() {
        let source = "a := 1\nb := nope\n";
        // span of "nope"
        let span = Span::new(12, 16, 2, 6);
        let snippet = render_snippet(source, span);
        assert!(snippet.contains("2:5~9 | b := nope"), "{}", snippet);
        assert!(snippet.contains("^^^^"), "{}", snippet);
    }

    #[test]
    fn test_snippet_spans_multiple_lines() {
        let source = "first\nsecond\nthird\n";
        // "second\nthird"
        let span = Span::new(6, 18, 2, 1);
        let snippet = render_snippet(source, span);
        assert!(snippet.contains("second"), "{}", snippet);
        assert!(snippet.contains("third"), "{}", snippet);
    }

    #[test]
    fn test_render_includes_trace() {
        let mut err = CompileError::new("boom", Span::new(0, 1, 1, 1));
        err.source = "x".to_string();
        err.trace = vec!["main.lume".to_string(), "util.lume".to_string()];
        let rendered = err.render();
        assert!(rendered.starts_with("boom"));
        assert!(rendered.contains("[2] util.lume"));
        assert!(rendered.contains("[1] main.lume"));
    }

    #[test]
    fn test_snippet_clamps_out_of_range_span() {
        // degenerate spans must not panic
        let _ = render_snippet("ab", Span::new(10, 20, 1, 1));
    }
}

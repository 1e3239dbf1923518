//! Expression language for map, reduce and transformer definitions.
//!
//! Definitions are written as `from x in <source> ... select <expr>` queries.
//! They are tokenized by [`lexer`], parsed into a [`QueryPlan`] by
//! [`QueryParser`] and run by [`evaluate::execute`].

pub mod ast;
pub mod evaluate;
pub mod lexer;
mod parser;

pub use ast::{Expr, QueryPlan, Source};
pub use evaluate::execute;
pub use parser::QueryParser;

/// A lexing or parsing failure, positioned by byte offset into the source text.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message} near byte {position}")]
pub struct ExpressionError {
    pub message: String,
    pub position: usize,
}

impl ExpressionError {
    pub fn new(message: impl Into<String>, position: usize) -> Self {
        Self {
            message: message.into(),
            position,
        }
    }
}

/// True when both texts lex to the same token stream.
///
/// Whitespace, comments and quote style are not significant. Text that fails
/// to lex only matches itself byte for byte.
pub fn same_tokens(left: &str, right: &str) -> bool {
    if left == right {
        return true;
    }
    match (lexer::tokenize(left), lexer::tokenize(right)) {
        (Ok(left), Ok(right)) => {
            left.len() == right.len()
                && left
                    .iter()
                    .zip(right.iter())
                    .all(|(a, b)| a.token == b.token)
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formatting_differences_are_not_significant() {
        assert!(same_tokens(
            "from doc in docs select new { doc.Name }",
            "from doc in docs\n  // users only\n  select new {doc.Name}",
        ));
        assert!(same_tokens("doc.Tag == 'a'", "doc.Tag == \"a\""));
    }

    #[test]
    fn token_differences_are_significant() {
        assert!(!same_tokens(
            "from doc in docs select new { doc.Name }",
            "from doc in docs select new { doc.Title }",
        ));
    }

    #[test]
    fn unlexable_text_only_matches_itself() {
        assert!(same_tokens("doc # x", "doc # x"));
        assert!(!same_tokens("doc # x", "doc  # x"));
    }

    #[test]
    fn error_display_includes_position() {
        let err = ExpressionError::new("unexpected input", 7);
        assert_eq!(err.to_string(), "unexpected input near byte 7");
    }
}

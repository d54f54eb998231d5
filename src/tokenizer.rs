//! # Tokenizer/ Lexer
//!
//! Turns the bytes of a JSON document, in memory or streamed, into a token
//! stream of zero-copy spans.
pub mod lexer;
pub mod token;

// Re-exports
pub use lexer::{Tokenizer, tokenize};
pub use token::{OwnedToken, Position, Token, TokenKind};

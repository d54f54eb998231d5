/*!
# Errors

Every failure in this crate aborts the deserialization call that hit it.
There are two families:

- *document* errors ([`Error::Syntax`], [`Error::Document`]): the input is
  malformed, either lexically or in its `$id`/`$ref`/`$type` metadata. They
  carry the offending token text and its [`Position`].
- *configuration* errors ([`Error::Capacity`], [`Error::Config`]): the input
  may be fine but the reader was set up wrong, e.g. a ring buffer too small to
  hold one token.

I/O failures of a streamed source are reported as [`Error::Io`].
*/
use std::error;
use std::fmt;
use std::io;

use crate::tokenizer::Position;

/// Result alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Classifies a lexical error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyntaxErrorKind {
    /// A number that does not follow the JSON number grammar.
    MalformedNumber,
    /// A string with an invalid escape sequence or invalid UTF-8.
    MalformedString,
    /// A string that is missing its closing quote.
    UnterminatedString,
    /// Something that started like `true`, `false` or `null` but is not.
    MisspelledLiteral,
    /// A character that cannot start any token.
    UnrecognizedCharacter,
}

impl fmt::Display for SyntaxErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::MalformedNumber => "malformed number",
            Self::MalformedString => "malformed string",
            Self::UnterminatedString => "unterminated string",
            Self::MisspelledLiteral => "misspelled literal",
            Self::UnrecognizedCharacter => "unrecognized character sequence",
        };
        f.write_str(text)
    }
}

/// Errors produced while reading a character source.
#[derive(Debug)]
pub enum SourceError {
    /// A single pinned token does not fit in the ring buffer.
    Capacity {
        /// Size of the ring buffer in bytes.
        buffer_size: usize,
        /// Absolute document offset where the oversized token starts.
        token_start: u64,
    },
    /// The underlying stream failed.
    Io(io::Error),
}

impl fmt::Display for SourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Capacity {
                buffer_size,
                token_start,
            } => write!(
                f,
                "token starting at offset {token_start} does not fit in a \
                 {buffer_size}-byte read buffer"
            ),
            Self::Io(err) => write!(f, "read failed: {err}"),
        }
    }
}

impl error::Error for SourceError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            Self::Capacity { .. } => None,
        }
    }
}

impl From<io::Error> for SourceError {
    fn from(err: io::Error) -> Self {
        Self::Io(err)
    }
}

/// Represents every error that can surface from a deserialization call.
#[derive(Debug)]
pub enum Error {
    /// The tokenizer rejected the input.
    Syntax {
        /// What was wrong with the token.
        kind: SyntaxErrorKind,
        /// Materialized text of the offending token.
        token: String,
        /// Where the token starts.
        position: Position,
    },
    /// The token stream is lexically valid but the document is not, e.g. a
    /// misplaced `$ref`, a duplicate `$id` or an unexpected token.
    Document {
        /// Human readable description.
        message: String,
        /// Materialized text of the offending token.
        token: String,
        /// Where the token starts.
        position: Position,
    },
    /// The read buffer is too small for a single token.
    Capacity {
        /// Size of the ring buffer in bytes.
        buffer_size: usize,
        /// Absolute document offset where the oversized token starts.
        token_start: u64,
    },
    /// Invalid reader or deserializer configuration.
    Config(String),
    /// The underlying stream failed.
    Io(io::Error),
}

impl Error {
    /// Builds a [`Error::Document`] error.
    pub fn document(
        message: impl Into<String>,
        token: impl Into<String>,
        position: Position,
    ) -> Self {
        Self::Document {
            message: message.into(),
            token: token.into(),
            position,
        }
    }

    /// Returns `true` for errors caused by the document rather than by
    /// configuration or I/O.
    #[must_use]
    pub const fn is_document_error(&self) -> bool {
        matches!(self, Self::Syntax { .. } | Self::Document { .. })
    }

    /// Returns the location of the offending token, if the error has one.
    #[must_use]
    pub const fn position(&self) -> Option<Position> {
        match self {
            Self::Syntax { position, .. } | Self::Document { position, .. } => {
                Some(*position)
            }
            _ => None,
        }
    }

    /// Returns the materialized text of the offending token, if any.
    #[must_use]
    pub fn token(&self) -> Option<&str> {
        match self {
            Self::Syntax { token, .. } | Self::Document { token, .. } => {
                Some(token)
            }
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Syntax {
                kind,
                token,
                position,
            } => write!(f, "{kind} `{token}` at {position}"),
            Self::Document {
                message,
                token,
                position,
            } => write!(f, "{message}: `{token}` at {position}"),
            Self::Capacity {
                buffer_size,
                token_start,
            } => write!(
                f,
                "read buffer of {buffer_size} bytes is too small for the \
                 token starting at offset {token_start}"
            ),
            Self::Config(message) => {
                write!(f, "invalid configuration: {message}")
            }
            Self::Io(err) => write!(f, "read failed: {err}"),
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<SourceError> for Error {
    fn from(err: SourceError) -> Self {
        match err {
            SourceError::Capacity {
                buffer_size,
                token_start,
            } => Self::Capacity {
                buffer_size,
                token_start,
            },
            SourceError::Io(err) => Self::Io(err),
        }
    }
}

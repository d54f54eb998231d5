//! # JSON Token
//!
//! Defines the tokens produced from a JSON document byte sequence.
//!
//! A [`Token`] is a zero-copy view into the character source's buffer. It
//! borrows the tokenizer, so the borrow checker guarantees it is dropped (or
//! copied with [`Token::to_owned_token`]) before the tokenizer moves on and
//! the cells it points at can be reused.
use std::borrow::Cow;
use std::fmt::{self, Display};

use crate::error::{Error, SyntaxErrorKind};

/// Classifies a token.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash)]
pub enum TokenKind {
    /* Values */
    /// Quoted string, span includes both quotes
    String,
    /// Number without fraction or exponent
    IntegerNumber,
    /// Number with a fraction and/or an exponent
    FloatingPointNumber,
    /// `true`
    True,
    /// `false`
    False,
    /// `null`
    Null,

    /* Delimiters */
    /// Opening curly brace
    BeginObject,
    /// Closing curly brace
    EndObject,
    /// Opening square bracket
    BeginArray,
    /// Closing square bracket
    EndArray,
    /// Comma character
    ValueDelimiter,
    /// Colon character
    PairDelimiter,

    /* Reserved */
    /// End of the document
    EndOfDocument,
    /// The token the tokenizer rejected
    Error,
}

impl Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::String => "string",
            Self::IntegerNumber => "integer",
            Self::FloatingPointNumber => "floating-point number",
            Self::True => "true",
            Self::False => "false",
            Self::Null => "null",
            Self::BeginObject => "{",
            Self::EndObject => "}",
            Self::BeginArray => "[",
            Self::EndArray => "]",
            Self::ValueDelimiter => ",",
            Self::PairDelimiter => ":",
            Self::EndOfDocument => "end of document",
            Self::Error => "invalid token",
        };
        f.write_str(name)
    }
}

/// Location of a byte in the document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Position {
    /// Absolute byte offset from the start of the document.
    pub offset: u64,
    /// 1-based line number.
    pub line: usize,
    /// 1-based column, counted in characters.
    pub column: usize,
}

impl Position {
    /// Position of the first byte of a document.
    pub const START: Self = Self {
        offset: 0,
        line: 1,
        column: 1,
    };
}

impl Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}, column {}", self.line, self.column)
    }
}

/// A token borrowed from the tokenizer's buffer.
#[derive(Debug, Clone, Copy)]
pub struct Token<'a> {
    kind: TokenKind,
    buffer: &'a [u8],
    start: usize,
    len: usize,
    position: Position,
}

impl<'a> Token<'a> {
    pub(crate) const fn new(
        kind: TokenKind,
        buffer: &'a [u8],
        start: usize,
        len: usize,
        position: Position,
    ) -> Self {
        Self {
            kind,
            buffer,
            start,
            len,
            position,
        }
    }

    /// The kind of this token.
    #[must_use]
    pub const fn kind(&self) -> TokenKind {
        self.kind
    }

    /// Length of the token in bytes.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` for zero-length tokens (only end of document).
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Buffer index of the first byte. `start + len` may exceed the buffer
    /// length when the token wraps around a ring buffer.
    #[must_use]
    pub const fn start(&self) -> usize {
        self.start
    }

    /// Where the token starts in the document.
    #[must_use]
    pub const fn position(&self) -> Position {
        self.position
    }

    /// Returns the `index`-th byte of the token.
    ///
    /// # Panics
    ///
    /// Panics if `index >= self.len()`.
    #[must_use]
    pub fn byte(&self, index: usize) -> u8 {
        assert!(
            index < self.len,
            "byte {index} out of token of length {}",
            self.len
        );
        self.buffer[(self.start + index) % self.buffer.len()]
    }

    /// Iterates over the bytes of the token.
    pub fn bytes(&self) -> impl Iterator<Item = u8> + '_ {
        (0..self.len).map(|i| self.byte(i))
    }

    /// The token's bytes, borrowed when the span is contiguous.
    #[must_use]
    pub fn raw(&self) -> Cow<'a, [u8]> {
        if self.len == 0 {
            return Cow::Borrowed(&[]);
        }
        let end = self.start + self.len;
        if end <= self.buffer.len() {
            Cow::Borrowed(&self.buffer[self.start..end])
        } else {
            let wrapped = end - self.buffer.len();
            let mut bytes = Vec::with_capacity(self.len);
            bytes.extend_from_slice(&self.buffer[self.start..]);
            bytes.extend_from_slice(&self.buffer[..wrapped]);
            Cow::Owned(bytes)
        }
    }

    /// Materializes the token text exactly as it appears in the document,
    /// quotes and escapes included. Invalid UTF-8 is replaced.
    #[must_use]
    pub fn text(&self) -> Cow<'a, str> {
        match self.raw() {
            Cow::Borrowed(bytes) => String::from_utf8_lossy(bytes),
            Cow::Owned(bytes) => match String::from_utf8(bytes) {
                Ok(text) => Cow::Owned(text),
                Err(err) => Cow::Owned(
                    String::from_utf8_lossy(err.as_bytes()).into_owned(),
                ),
            },
        }
    }

    /// Copies the token out of the buffer so it survives the next read.
    #[must_use]
    pub fn to_owned_token(&self) -> OwnedToken {
        OwnedToken {
            kind: self.kind,
            text: self.text().into_owned(),
            position: self.position,
        }
    }

    /// Compares the body of a string token (between the quotes, escapes left
    /// as written) against `expected` without allocating.
    #[must_use]
    pub fn raw_eq(&self, expected: &str) -> bool {
        self.kind == TokenKind::String
            && self.len == expected.len() + 2
            && expected
                .bytes()
                .enumerate()
                .all(|(i, byte)| self.byte(i + 1) == byte)
    }

    /// Strips the quotes of a string token and decodes its escape sequences.
    ///
    /// # Errors
    ///
    /// Returns a [`Error::Syntax`] if the token is not a string or the body is
    /// not valid.
    pub fn unquoted(&self) -> Result<String, Error> {
        if self.kind != TokenKind::String || self.len < 2 {
            return Err(self.syntax_error(SyntaxErrorKind::MalformedString));
        }
        let raw = self.raw();
        decode_string_body(&raw[1..raw.len() - 1])
            .ok_or_else(|| self.syntax_error(SyntaxErrorKind::MalformedString))
    }

    /// Parses an integer token.
    ///
    /// Returns `None` for other kinds and for values outside `i64`.
    #[must_use]
    pub fn to_i64(&self) -> Option<i64> {
        if self.kind != TokenKind::IntegerNumber {
            return None;
        }
        self.text().parse().ok()
    }

    /// Parses a numeric token as `f64`.
    #[must_use]
    pub fn to_f64(&self) -> Option<f64> {
        match self.kind {
            TokenKind::IntegerNumber | TokenKind::FloatingPointNumber => {
                self.text().parse().ok()
            }
            _ => None,
        }
    }

    fn syntax_error(&self, kind: SyntaxErrorKind) -> Error {
        Error::Syntax {
            kind,
            token: self.text().into_owned(),
            position: self.position,
        }
    }
}

impl Display for Token<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            TokenKind::EndOfDocument => write!(f, "<end of document>"),
            _ => write!(f, "{}", self.text()),
        }
    }
}

/// A token copied out of the buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnedToken {
    /// The kind of the token.
    pub kind: TokenKind,
    /// The token text exactly as written in the document.
    pub text: String,
    /// Where the token starts.
    pub position: Position,
}

/// Decodes the body of a JSON string (quotes already stripped).
///
/// Returns `None` on an invalid escape, a lone surrogate or invalid UTF-8.
pub(crate) fn decode_string_body(body: &[u8]) -> Option<String> {
    let mut out: Vec<u8> = Vec::with_capacity(body.len());
    let mut i = 0;
    while i < body.len() {
        let byte = body[i];
        if byte != b'\\' {
            out.push(byte);
            i += 1;
            continue;
        }
        let escaped = *body.get(i + 1)?;
        i += 2;
        let decoded = match escaped {
            b'"' => '"',
            b'\\' => '\\',
            b'/' => '/',
            b'b' => '\u{0008}',
            b'f' => '\u{000C}',
            b'n' => '\n',
            b'r' => '\r',
            b't' => '\t',
            b'u' => {
                let high = hex4(body.get(i..i + 4)?)?;
                i += 4;
                if (0xD800..0xDC00).contains(&high) {
                    // a high surrogate must be followed by `\u` + low surrogate
                    if body.get(i..i + 2)? != b"\\u" {
                        return None;
                    }
                    let low = hex4(body.get(i + 2..i + 6)?)?;
                    if !(0xDC00..0xE000).contains(&low) {
                        return None;
                    }
                    i += 6;
                    let scalar =
                        0x10000 + ((high - 0xD800) << 10) + (low - 0xDC00);
                    char::from_u32(scalar)?
                } else {
                    char::from_u32(high)?
                }
            }
            _ => return None,
        };
        let mut utf8 = [0u8; 4];
        out.extend_from_slice(decoded.encode_utf8(&mut utf8).as_bytes());
    }
    String::from_utf8(out).ok()
}

fn hex4(digits: &[u8]) -> Option<u32> {
    digits.iter().try_fold(0u32, |acc, &digit| {
        let value = char::from(digit).to_digit(16)?;
        Some(acc * 16 + value)
    })
}

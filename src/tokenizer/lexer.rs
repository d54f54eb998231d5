//! # JSON Lexer
//!
//! Reads a [`CharacterSource`] one token at a time. The tokenizer is forward
//! only and keeps a single live token: [`Tokenizer::token`] borrows it, and the
//! next call to [`Tokenizer::read_next_token`] (which needs `&mut self`)
//! invalidates it.
//!
//! Each token's first byte is pinned in the source while the token is being
//! scanned and until the next token is requested, so its span stays valid even
//! when a ring buffer refills underneath it.
use crate::error::{Error, SyntaxErrorKind};
use crate::source::{CharacterSource, RingSource, SliceSource};
use crate::tokenizer::{OwnedToken, Position, Token, TokenKind};

/// Outcome of scanning one token.
enum Scan {
    Token(TokenKind),
    Invalid(SyntaxErrorKind),
}

/// A lexer that turns a [`CharacterSource`] into a stream of tokens.
pub struct Tokenizer<S> {
    /// Where the bytes come from
    source: S,
    /// Kind of the current token
    kind: TokenKind,
    /// Buffer index of the current token's first byte
    start: usize,
    /// Length of the current token in bytes
    len: usize,
    /// Where the current token starts
    position: Position,
    /// Line of the byte under the read point
    line: usize,
    /// Column of the byte under the read point
    column: usize,
}

impl<'a> Tokenizer<SliceSource<'a>> {
    /// Creates a tokenizer over an in-memory document.
    #[must_use]
    pub const fn from_slice(input: &'a [u8]) -> Self {
        Self::new(SliceSource::new(input))
    }
}

impl<R: std::io::Read> Tokenizer<RingSource<R>> {
    /// Creates a tokenizer streaming from `reader` through a ring buffer of
    /// `buffer_size` bytes.
    ///
    /// # Errors
    ///
    /// Fails if the buffer size is invalid or the first read fails.
    pub fn from_reader(reader: R, buffer_size: usize) -> Result<Self, Error> {
        Ok(Self::new(RingSource::new(reader, buffer_size)?))
    }
}

impl<S: CharacterSource> Tokenizer<S> {
    /// Creates a tokenizer positioned before the first token of `source`.
    pub const fn new(source: S) -> Self {
        Self {
            source,
            kind: TokenKind::EndOfDocument,
            start: 0,
            len: 0,
            position: Position::START,
            line: 1,
            column: 1,
        }
    }

    /// The current token, borrowed from the source buffer.
    pub fn token(&self) -> Token<'_> {
        Token::new(
            self.kind,
            self.source.buffer(),
            self.start,
            self.len,
            self.position,
        )
    }

    /// Kind of the current token.
    pub const fn kind(&self) -> TokenKind {
        self.kind
    }

    /// Where the current token starts.
    pub const fn position(&self) -> Position {
        self.position
    }

    /// Gives back the underlying source.
    pub fn into_source(self) -> S {
        self.source
    }

    /// Builds a [`Error::Document`] pointing at the current token.
    pub fn document_error(&self, message: impl Into<String>) -> Error {
        Error::document(message, self.token().text(), self.position)
    }

    /// Byte under the read point.
    fn byte(&self) -> Option<u8> {
        self.source.current()
    }

    /// Consumes the current byte, keeping line and column up to date.
    fn read_byte(&mut self) -> Result<(), Error> {
        match self.source.current() {
            Some(b'\n') => {
                self.line += 1;
                self.column = 1;
            }
            // continuation bytes belong to the previous character
            Some(b) if b & 0xC0 == 0x80 => {}
            Some(_) => self.column += 1,
            None => return Ok(()),
        }
        self.source.advance()?;
        Ok(())
    }

    /// Consume whitespace byte(s) starting from the current position.
    fn skip_whitespace(&mut self) -> Result<(), Error> {
        while matches!(self.byte(), Some(b' ' | b'\t' | b'\n' | b'\r')) {
            self.read_byte()?;
        }
        Ok(())
    }

    /// Reads the next token from the source and makes it the current token.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Syntax`] for lexically invalid input (the current
    /// token then has kind [`TokenKind::Error`] and spans the offending text),
    /// [`Error::Capacity`] when a token does not fit in the ring buffer, and
    /// [`Error::Io`] when the stream fails.
    pub fn read_next_token(&mut self) -> Result<TokenKind, Error> {
        // the previous token is gone, its cells may be reused
        self.source.release();
        self.skip_whitespace()?;

        self.position = Position {
            offset: self.source.offset(),
            line: self.line,
            column: self.column,
        };
        self.start = self.source.pin();

        let scan = match self.byte() {
            None => Scan::Token(TokenKind::EndOfDocument),
            Some(b'{') => self.single(TokenKind::BeginObject)?,
            Some(b'}') => self.single(TokenKind::EndObject)?,
            Some(b'[') => self.single(TokenKind::BeginArray)?,
            Some(b']') => self.single(TokenKind::EndArray)?,
            Some(b',') => self.single(TokenKind::ValueDelimiter)?,
            Some(b':') => self.single(TokenKind::PairDelimiter)?,
            Some(b'"') => self.scan_string()?,
            Some(b'-') => self.scan_negative_number()?,
            Some(b'0'..=b'9') => self.scan_number()?,
            Some(b't') => self.scan_literal(b"true", TokenKind::True)?,
            Some(b'f') => self.scan_literal(b"false", TokenKind::False)?,
            Some(b'n') => self.scan_literal(b"null", TokenKind::Null)?,
            Some(_) => self.invalid(SyntaxErrorKind::UnrecognizedCharacter)?,
        };

        self.len = usize::try_from(self.source.offset() - self.position.offset)
            .unwrap_or(usize::MAX);

        match scan {
            Scan::Token(kind) => {
                self.kind = kind;
                Ok(kind)
            }
            Scan::Invalid(kind) => {
                self.kind = TokenKind::Error;
                Err(Error::Syntax {
                    kind,
                    token: self.token().text().into_owned(),
                    position: self.position,
                })
            }
        }
    }

    /// Reads tokens until the end of the document, copying each one out.
    ///
    /// # Errors
    ///
    /// Stops at the first error from [`Tokenizer::read_next_token`].
    pub fn read_all(&mut self) -> Result<Vec<OwnedToken>, Error> {
        let mut tokens = vec![];
        loop {
            let kind = self.read_next_token()?;
            tokens.push(self.token().to_owned_token());
            if kind == TokenKind::EndOfDocument {
                return Ok(tokens);
            }
        }
    }

    fn single(&mut self, kind: TokenKind) -> Result<Scan, Error> {
        self.read_byte()?;
        Ok(Scan::Token(kind))
    }

    /// Consumes up to the end of the token and reports it as invalid.
    fn invalid(&mut self, kind: SyntaxErrorKind) -> Result<Scan, Error> {
        while !is_token_end(self.byte()) {
            self.read_byte()?;
        }
        Ok(Scan::Invalid(kind))
    }

    fn skip_digits(&mut self) -> Result<(), Error> {
        while self.byte().is_some_and(|b| b.is_ascii_digit()) {
            self.read_byte()?;
        }
        Ok(())
    }

    fn scan_negative_number(&mut self) -> Result<Scan, Error> {
        self.read_byte()?;
        if self.byte().is_some_and(|b| b.is_ascii_digit()) {
            self.scan_number()
        } else {
            self.invalid(SyntaxErrorKind::MalformedNumber)
        }
    }

    /// Reads a JSON number (int, frac, exp) starting at a digit.
    fn scan_number(&mut self) -> Result<Scan, Error> {
        let mut floating = false;

        // integer part, a leading zero stands alone
        if self.byte() == Some(b'0') {
            self.read_byte()?;
        } else {
            self.skip_digits()?;
        }

        // fractional part
        if self.byte() == Some(b'.') {
            self.read_byte()?;
            if !self.byte().is_some_and(|b| b.is_ascii_digit()) {
                return self.invalid(SyntaxErrorKind::MalformedNumber);
            }
            self.skip_digits()?;
            floating = true;
        }

        // exponent part
        if matches!(self.byte(), Some(b'e' | b'E')) {
            self.read_byte()?;
            if matches!(self.byte(), Some(b'+' | b'-')) {
                self.read_byte()?;
            }
            if !self.byte().is_some_and(|b| b.is_ascii_digit()) {
                return self.invalid(SyntaxErrorKind::MalformedNumber);
            }
            self.skip_digits()?;
            floating = true;
        }

        if !is_token_end(self.byte()) {
            return self.invalid(SyntaxErrorKind::MalformedNumber);
        }

        Ok(Scan::Token(if floating {
            TokenKind::FloatingPointNumber
        } else {
            TokenKind::IntegerNumber
        }))
    }

    /// Reads a string up to its unescaped closing quote. A malformed escape
    /// does not stop the scan, so the error covers the whole string.
    fn scan_string(&mut self) -> Result<Scan, Error> {
        // Skip opening quote
        self.read_byte()?;
        let mut malformed = false;

        loop {
            match self.byte() {
                None => {
                    return Ok(Scan::Invalid(
                        SyntaxErrorKind::UnterminatedString,
                    ));
                }
                Some(b'"') => {
                    self.read_byte()?;
                    break;
                }
                Some(b'\\') => {
                    self.read_byte()?;
                    match self.byte() {
                        Some(
                            b'"' | b'\\' | b'/' | b'b' | b'f' | b'n' | b'r'
                            | b't',
                        ) => {
                            self.read_byte()?;
                        }
                        Some(b'u') => {
                            self.read_byte()?;
                            for _ in 0..4 {
                                let hex = self
                                    .byte()
                                    .is_some_and(|b| b.is_ascii_hexdigit());
                                if !hex {
                                    malformed = true;
                                    break;
                                }
                                self.read_byte()?;
                            }
                        }
                        Some(_) => malformed = true,
                        None => {
                            return Ok(Scan::Invalid(
                                SyntaxErrorKind::UnterminatedString,
                            ));
                        }
                    }
                }
                Some(_) => self.read_byte()?,
            }
        }

        Ok(if malformed {
            Scan::Invalid(SyntaxErrorKind::MalformedString)
        } else {
            Scan::Token(TokenKind::String)
        })
    }

    /// Matches `expected` exactly and requires a token boundary after it.
    fn scan_literal(
        &mut self,
        expected: &[u8],
        kind: TokenKind,
    ) -> Result<Scan, Error> {
        for &expected_byte in expected {
            if self.byte() != Some(expected_byte) {
                return self.invalid(SyntaxErrorKind::MisspelledLiteral);
            }
            self.read_byte()?;
        }
        if !is_token_end(self.byte()) {
            return self.invalid(SyntaxErrorKind::MisspelledLiteral);
        }
        Ok(Scan::Token(kind))
    }
}

/// End of content, whitespace, or one of `, ] } :` ends a token.
const fn is_token_end(byte: Option<u8>) -> bool {
    matches!(
        byte,
        None | Some(b' ' | b'\t' | b'\n' | b'\r' | b',' | b']' | b'}' | b':')
    )
}

/// Tokenize a JSON document from bytes into owned tokens, returning both the
/// token sequence and the number of bytes of the input read.
///
/// # Errors
///
/// Returns the first lexical error in the document.
pub fn tokenize(text: &[u8]) -> Result<(Vec<OwnedToken>, usize), Error> {
    let mut tokenizer = Tokenizer::from_slice(text);
    let tokens = tokenizer.read_all()?;
    let bytes_read = usize::try_from(tokenizer.into_source().offset())
        .unwrap_or(text.len());
    Ok((tokens, bytes_read))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MIN_BUFFER_SIZE;

    fn kinds(input: &str) -> Vec<TokenKind> {
        let (tokens, _) = tokenize(input.as_bytes()).unwrap();
        tokens.into_iter().map(|t| t.kind).collect()
    }

    fn texts(input: &str) -> Vec<String> {
        let (tokens, _) = tokenize(input.as_bytes()).unwrap();
        tokens.into_iter().map(|t| t.text).collect()
    }

    fn syntax_error(input: &str) -> (SyntaxErrorKind, String, Position) {
        match tokenize(input.as_bytes()) {
            Err(Error::Syntax {
                kind,
                token,
                position,
            }) => (kind, token, position),
            other => {
                panic!("expected a syntax error for {input:?}, got {other:?}")
            }
        }
    }

    #[test]
    fn test_empty() {
        let (tokens, bytes_read) = tokenize(b"").unwrap();
        assert_eq!(bytes_read, 0);
        assert_eq!(tokens.len(), 1); // Including end of document
        assert_eq!(tokens[0].kind, TokenKind::EndOfDocument);
        assert_eq!(tokens[0].text, "");
    }

    #[test]
    fn test_simple_array() {
        use TokenKind::*;
        assert_eq!(
            kinds("[1,2,3]"),
            vec![
                BeginArray,
                IntegerNumber,
                ValueDelimiter,
                IntegerNumber,
                ValueDelimiter,
                IntegerNumber,
                EndArray,
                EndOfDocument
            ]
        );
        assert_eq!(
            texts("[1,2,3]"),
            vec!["[", "1", ",", "2", ",", "3", "]", ""]
        );
    }

    #[test]
    fn test_literals() {
        use TokenKind::*;
        assert_eq!(
            kinds("null true false"),
            vec![Null, True, False, EndOfDocument]
        );
    }

    #[test]
    fn test_object_punctuation() {
        use TokenKind::*;
        assert_eq!(
            kinds(" {\"a\" : [ ] }\n"),
            vec![
                BeginObject,
                String,
                PairDelimiter,
                BeginArray,
                EndArray,
                EndObject,
                EndOfDocument
            ]
        );
    }

    #[test]
    fn test_number_variants() {
        let cases = [
            ("0", TokenKind::IntegerNumber),
            ("-0", TokenKind::IntegerNumber),
            ("123", TokenKind::IntegerNumber),
            ("-123", TokenKind::IntegerNumber),
            ("3.14", TokenKind::FloatingPointNumber),
            ("0.001e-10", TokenKind::FloatingPointNumber),
            ("1E+2", TokenKind::FloatingPointNumber),
            ("-0.5", TokenKind::FloatingPointNumber),
        ];
        for (text, expected) in cases {
            let (tokens, _) = tokenize(text.as_bytes()).unwrap();
            assert_eq!(tokens[0].kind, expected, "{text}");
            assert_eq!(tokens[0].text, text);
            assert_eq!(tokens[1].kind, TokenKind::EndOfDocument);
        }
    }

    #[test]
    fn test_malformed_numbers() {
        for text in
            ["3.14.1", "01", "-", "-x", "1.", "1.e5", "1e", "1e+", "12ab"]
        {
            let (kind, token, _) = syntax_error(text);
            assert_eq!(kind, SyntaxErrorKind::MalformedNumber, "{text}");
            assert_eq!(token, text);
        }
    }

    #[test]
    fn malformed_number_stops_at_token_boundary() {
        let (_, token, position) = syntax_error("[1, 3.14.1, 2]");
        assert_eq!(token, "3.14.1");
        assert_eq!(position.offset, 4);
        assert_eq!(position.column, 5);
    }

    #[test]
    fn test_string_with_escape() {
        let input = r#""hello\nworld\"!""#;
        let (tokens, _) = tokenize(input.as_bytes()).unwrap();
        assert_eq!(tokens[0].kind, TokenKind::String);
        assert_eq!(tokens[0].text, input);
    }

    #[test]
    fn test_escape_sequences() {
        let cases = [
            r#""Test \"quoted\" text""#,        // Double quote
            r#""Backslash: \\""#,               // Backslash
            r#""Forward slash: \/""#,           // Forward slash
            r#""Backspace: \b""#,               // Backspace
            r#""Form feed: \f""#,               // Form feed
            r#""Newline: \n""#,                 // Newline
            r#""Carriage return: \r""#,         // Carriage return
            r#""Tab: \t""#,                     // Tab
            r#""Unicode: \u0041\u0042\u0043""#, // Unicode escape
            r#""Mixed: \"\\\n\t\u0020""#,       // Mixed escapes
        ];

        for input in &cases {
            let (tokens, _) = tokenize(input.as_bytes()).unwrap();
            assert_eq!(tokens.len(), 2); // String token + end of document
            assert_eq!(tokens[0].kind, TokenKind::String);
            assert_eq!(tokens[1].kind, TokenKind::EndOfDocument);
        }
    }

    #[test]
    fn malformed_escape_scans_to_closing_quote() {
        let (kind, token, _) = syntax_error(r#"["a\qb", 1]"#);
        assert_eq!(kind, SyntaxErrorKind::MalformedString);
        assert_eq!(token, r#""a\qb""#);

        let (kind, token, _) = syntax_error(r#""\u12G4""#);
        assert_eq!(kind, SyntaxErrorKind::MalformedString);
        assert_eq!(token, r#""\u12G4""#);
    }

    #[test]
    fn unterminated_string() {
        let (kind, token, _) = syntax_error(r#"{"key": "value"#);
        assert_eq!(kind, SyntaxErrorKind::UnterminatedString);
        assert_eq!(token, "\"value");
    }

    #[test]
    fn misspelled_literals_show_partial_read() {
        for (text, shown) in [
            ("tru", "tru"),
            ("nul]", "nul"),
            ("falsey", "falsey"),
            ("trUe", "trUe"),
        ] {
            let (kind, token, _) = syntax_error(text);
            assert_eq!(kind, SyntaxErrorKind::MisspelledLiteral, "{text}");
            assert_eq!(token, shown);
        }
    }

    #[test]
    fn unrecognized_sequence() {
        let (kind, token, _) = syntax_error("[@foo]");
        assert_eq!(kind, SyntaxErrorKind::UnrecognizedCharacter);
        assert_eq!(token, "@foo");
    }

    #[test]
    fn error_token_kind_is_error() {
        let mut tokenizer = Tokenizer::from_slice(b"  nope");
        assert!(tokenizer.read_next_token().is_err());
        assert_eq!(tokenizer.kind(), TokenKind::Error);
        assert_eq!(tokenizer.token().text(), "nope");
    }

    #[test]
    fn positions_track_lines_and_columns() {
        let err = tokenize(b"{\n  \"a\": 1,\r\n\t\"b\": x}").unwrap_err();
        let position = err.position().unwrap();
        assert_eq!((position.line, position.column), (3, 7));
        assert_eq!(err.token(), Some("x"));

        let (tokens, _) = tokenize(b"[\n  1,\n  22\n]").unwrap();
        let located: Vec<(usize, usize)> = tokens
            .iter()
            .map(|t| (t.position.line, t.position.column))
            .collect();
        assert_eq!(
            located,
            vec![(1, 1), (2, 3), (2, 4), (3, 3), (4, 1), (4, 2)]
        );
    }

    #[test]
    fn columns_count_characters() {
        let (tokens, _) = tokenize("[\"é€\", 1]".as_bytes()).unwrap();
        let columns: Vec<usize> =
            tokens.iter().map(|t| t.position.column).collect();
        assert_eq!(columns, vec![1, 2, 6, 8, 9, 10]);
        // offsets stay in bytes
        assert_eq!(tokens[3].position.offset, 10);
    }

    #[test]
    fn retokenizing_is_idempotent() {
        let doc = br#"{"$id":0,"items":["$id",1,1,2.5e3],
            "child":{"ok":true,"no":null}}"#;
        let first = tokenize(doc).unwrap();
        let second = tokenize(doc).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn ring_buffer_tokens_match_slice_tokens() {
        // long scalars force several wraps of a 32 byte ring
        let doc = br#"["abcdefghijklmnopqrstuvwxyz", 12345678901234567,
            -1.5e-300, "\u00e9t\u00e9 \"quoted\"", true, false, null,
            "0123456789012345678901234"]"#;
        let (expected, _) = tokenize(doc).unwrap();
        let mut streamed =
            Tokenizer::from_reader(&doc[..], MIN_BUFFER_SIZE).unwrap();
        let actual = streamed.read_all().unwrap();
        assert_eq!(actual, expected);
    }

    #[test]
    fn token_exactly_filling_the_ring_is_accepted() {
        let body = "x".repeat(MIN_BUFFER_SIZE - 2);
        let doc = format!("[\"{body}\" , 1]");
        let mut tokenizer =
            Tokenizer::from_reader(doc.as_bytes(), MIN_BUFFER_SIZE).unwrap();
        tokenizer.read_next_token().unwrap();
        assert_eq!(tokenizer.read_next_token().unwrap(), TokenKind::String);
        assert_eq!(tokenizer.token().len(), MIN_BUFFER_SIZE);
        assert_eq!(tokenizer.token().unquoted().unwrap(), body);
        assert_eq!(
            tokenizer.read_next_token().unwrap(),
            TokenKind::ValueDelimiter
        );

        let digits = "9".repeat(MIN_BUFFER_SIZE);
        let mut tokenizer =
            Tokenizer::from_reader(digits.as_bytes(), MIN_BUFFER_SIZE).unwrap();
        assert_eq!(
            tokenizer.read_next_token().unwrap(),
            TokenKind::IntegerNumber
        );
        assert_eq!(tokenizer.token().text(), digits);
    }

    #[test]
    fn token_longer_than_the_ring_is_a_capacity_error() {
        let body = "x".repeat(MIN_BUFFER_SIZE - 1);
        let doc = format!("[\"{body}\"]");
        let mut tokenizer =
            Tokenizer::from_reader(doc.as_bytes(), MIN_BUFFER_SIZE).unwrap();
        tokenizer.read_next_token().unwrap();
        let err = tokenizer.read_next_token().unwrap_err();
        assert!(matches!(
            err,
            Error::Capacity {
                buffer_size: 32,
                token_start: 1
            }
        ));
        assert!(!err.is_document_error());

        let digits = "1".repeat(MIN_BUFFER_SIZE + 5);
        let mut tokenizer =
            Tokenizer::from_reader(digits.as_bytes(), MIN_BUFFER_SIZE).unwrap();
        assert!(matches!(
            tokenizer.read_next_token(),
            Err(Error::Capacity { .. })
        ));
    }

    #[test]
    fn error_offsets_are_absolute_across_wraps() {
        let mut doc = String::from("[");
        for _ in 0..20 {
            doc.push_str("\"abcdef\",");
        }
        doc.push_str("tru]");
        let mut tokenizer =
            Tokenizer::from_reader(doc.as_bytes(), MIN_BUFFER_SIZE).unwrap();
        let err = loop {
            match tokenizer.read_next_token() {
                Ok(_) => {}
                Err(err) => break err,
            }
        };
        assert_eq!(err.token(), Some("tru"));
        assert_eq!(err.position().unwrap().offset, 181);
        assert_eq!(err.position().unwrap().column, 182);
    }
}

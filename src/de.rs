/*!
# Deserializer

Drives a [`Tokenizer`] through a document and builds the [`Value`] graph for
a requested [`Type`].

For every value the deserializer looks at the current token. Scalars go
straight to the first [`ValueParser`] that accepts the (token kind, type)
pair. Objects and arrays first have their metadata prefix consumed by the
[`MetadataParser`]; a `$ref` short-circuits to the referenced value (or to a
[`ParseResult::Deferred`] placeholder), a `$type` replaces the type to build,
and `$id` registers the new aggregate with the call's
[`ObjectReferencePreserver`] as soon as it is allocated.

```rust
use jsonrefs::{Settings, Type, TypeRegistry, Value};

let registry = TypeRegistry::new();
let settings = Settings::default();
let root = jsonrefs::from_str(
    r#"{"$id": 0, "items": ["$id", 1, 1, 2], "copy": ["$ref", 1]}"#,
    &Type::Any,
    &registry,
    &settings,
)
.unwrap();
let items = root.get("items").unwrap();
let copy = root.get("copy").unwrap();
assert!(Value::ptr_eq(&items, &copy));
```
*/
pub mod dispatch;
pub mod parsers;

use std::collections::HashMap;
use std::io::Read;
use std::rc::Rc;

use log::debug;

use crate::config::Settings;
use crate::error::{Error, Result};
use crate::metadata::{MetadataParser, ReferencePreservationInfo, Shape};
use crate::preserver::{
    DeferredReference, DuplicateId, ObjectReferencePreserver, ReferenceId, Slot,
};
use crate::source::{CharacterSource, RingSource, SliceSource};
use crate::tokenizer::{Position, Token, TokenKind, Tokenizer};
use crate::types::{Type, TypeRegistry};
use crate::value::Value;

// Re-exports
pub use dispatch::{ParserDispatch, ValueParser};

/// Outcome of deserializing one value.
#[derive(Debug, Clone)]
pub enum ParseResult {
    /// A value, possibly an aggregate shared with other places in the graph.
    Value(Value),
    /// A `$ref` to an id that is not materialized yet. The caller must hand
    /// the slot the value belongs in to [`Deserializer::store`].
    Deferred(ReferenceId),
    /// `null`
    Null,
}

/// What the metadata prefix of an object or array established, handed to
/// the parser that builds it.
#[derive(Debug, Clone)]
pub struct StructureHeader {
    /// Where the structure starts.
    pub position: Position,
    /// Object or array.
    pub shape: Shape,
    /// `$id` of the structure.
    pub id: Option<ReferenceId>,
    /// `false` if the structure closed right after its metadata; the current
    /// token is then the closing token. Otherwise it is the first data token.
    pub data_follows: bool,
    /// Dimension lengths declared by an array `$type`.
    pub lengths: Option<Vec<usize>>,
}

/// Deserializes one document.
///
/// A deserializer is used for exactly one call: it owns the tokenizer and
/// the reference preserver of that call.
pub struct Deserializer<'r, S> {
    tokenizer: Tokenizer<S>,
    registry: &'r TypeRegistry,
    settings: &'r Settings,
    preserver: ObjectReferencePreserver,
    dispatch: ParserDispatch<S>,
    /// Where each still unresolved id was first referenced
    references: HashMap<ReferenceId, Position>,
    depth: usize,
}

impl<'r, S: CharacterSource> Deserializer<'r, S> {
    /// Creates a deserializer reading from `tokenizer`, with the built-in
    /// value parsers.
    pub fn new(
        tokenizer: Tokenizer<S>,
        registry: &'r TypeRegistry,
        settings: &'r Settings,
    ) -> Self {
        Self {
            tokenizer,
            registry,
            settings,
            preserver: ObjectReferencePreserver::new(),
            dispatch: ParserDispatch::new(settings.cache_parsers),
            references: HashMap::new(),
            depth: 0,
        }
    }

    /// Adds a value parser that is consulted before all others.
    #[must_use]
    pub fn with_parser(mut self, parser: Rc<dyn ValueParser<S>>) -> Self {
        self.dispatch.register_front(parser);
        self
    }

    /// Reads the whole document as a value of type `ty`.
    ///
    /// # Errors
    ///
    /// Fails on the first lexical or document error, when content follows
    /// the root value, and when a `$ref` names an id the document never
    /// declares.
    pub fn deserialize(mut self, ty: &Type) -> Result<Value> {
        if self.read_next()? == TokenKind::EndOfDocument {
            return Err(self.document_error("empty document"));
        }
        let root = self.deserialize_current(ty)?;
        if self.read_next()? != TokenKind::EndOfDocument {
            return Err(
                self.document_error("unexpected content after the root value")
            );
        }

        let root = match root {
            ParseResult::Value(value) => value,
            ParseResult::Null => Value::Null,
            ParseResult::Deferred(id) => return Err(self.unresolved(id)),
        };
        if let Some(&id) = self.preserver.finish().first() {
            return Err(self.unresolved(id));
        }
        Ok(root)
    }

    /// Deserializes the value starting at the current token. On return the
    /// current token is the value's last token.
    ///
    /// # Errors
    ///
    /// Fails if the value is malformed or cannot be read as `requested`.
    pub fn deserialize_current(
        &mut self,
        requested: &Type,
    ) -> Result<ParseResult> {
        let requested = self
            .registry
            .resolve_deep(requested)
            .map_err(|err| Error::Config(err.to_string()))?;

        let kind = self.tokenizer.kind();
        match kind {
            TokenKind::BeginObject => {
                self.deserialize_structure(Shape::Object, &requested)
            }
            TokenKind::BeginArray => {
                self.deserialize_structure(Shape::Array, &requested)
            }
            _ => {
                let parser = self
                    .dispatch
                    .select(kind, &requested, false)
                    .ok_or_else(|| {
                        self.document_error(format!(
                            "cannot read {kind} as `{requested}`"
                        ))
                    })?;
                parser.parse(self, &requested, None)
            }
        }
    }

    fn deserialize_structure(
        &mut self,
        shape: Shape,
        requested: &Type,
    ) -> Result<ParseResult> {
        let position = self.tokenizer.position();
        let open = self.tokenizer.kind();
        self.enter()?;
        self.read_next()?;

        let parser = MetadataParser::new(&self.settings.metadata);
        let metadata = parser.parse_prefix(
            &mut self.tokenizer,
            self.registry,
            &self.preserver,
            requested,
            shape,
        )?;

        let id = match metadata.reference {
            ReferencePreservationInfo::RetrievedObject(_, value) => {
                self.leave();
                return Ok(ParseResult::Value(value));
            }
            ReferencePreservationInfo::DeferredReference(id) => {
                self.references.entry(id).or_insert(position);
                self.leave();
                return Ok(ParseResult::Deferred(id));
            }
            ReferencePreservationInfo::NewObject(id) => Some(id),
            ReferencePreservationInfo::Empty => None,
        };

        let ty = match (metadata.type_to_construct, shape) {
            (Type::Any, Shape::Object) => {
                Type::dictionary(Type::String, Type::Any)
            }
            (Type::Any, Shape::Array) => Type::list(Type::Any),
            (ty, _) => ty,
        };
        let header = StructureHeader {
            position,
            shape,
            id,
            data_follows: metadata.data_follows,
            lengths: metadata.array_lengths,
        };

        let parser = self
            .dispatch
            .select(open, &ty, metadata.type_overridden)
            .ok_or_else(|| {
                Error::document(
                    format!("cannot read {open} as `{ty}`"),
                    if shape == Shape::Object { "{" } else { "[" },
                    position,
                )
            })?;
        let result = parser.parse(self, &ty, Some(&header))?;
        self.leave();
        Ok(result)
    }

    fn enter(&mut self) -> Result<()> {
        self.depth += 1;
        if self.depth > self.settings.max_depth {
            return Err(self.document_error(format!(
                "nesting deeper than {} levels",
                self.settings.max_depth
            )));
        }
        Ok(())
    }

    const fn leave(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }

    /// Advances to the next token and returns its kind.
    ///
    /// # Errors
    ///
    /// Propagates tokenizer errors.
    pub fn read_next(&mut self) -> Result<TokenKind> {
        self.tokenizer.read_next_token()
    }

    /// Kind of the current token.
    pub const fn kind(&self) -> TokenKind {
        self.tokenizer.kind()
    }

    /// The current token.
    pub fn token(&self) -> Token<'_> {
        self.tokenizer.token()
    }

    /// Settings of this call.
    pub const fn settings(&self) -> &Settings {
        self.settings
    }

    /// Builds a document error pointing at the current token.
    pub fn document_error(&self, message: impl Into<String>) -> Error {
        self.tokenizer.document_error(message)
    }

    /// Whether the current token is a reserved metadata key.
    pub fn at_metadata_key(&self) -> bool {
        self.tokenizer.kind() == TokenKind::String
            && MetadataParser::new(&self.settings.metadata)
                .is_reserved(&self.tokenizer.token())
    }

    /// Fails unless the current token has kind `expected`.
    ///
    /// # Errors
    ///
    /// Returns a document error naming `what` was expected.
    pub fn expect(&self, expected: TokenKind, what: &str) -> Result<()> {
        if self.tokenizer.kind() == expected {
            Ok(())
        } else {
            Err(self.document_error(format!("expected {what}")))
        }
    }

    /// After an element or property: reads the next token, and if it is `,`
    /// steps onto the following element and returns `true`. Returns `false`
    /// on the `close` token.
    ///
    /// # Errors
    ///
    /// Fails on a trailing comma or any other token.
    pub fn next_element(&mut self, close: TokenKind) -> Result<bool> {
        let closing = if close == TokenKind::EndObject { '}' } else { ']' };
        match self.read_next()? {
            TokenKind::ValueDelimiter => {
                if self.read_next()? == close {
                    return Err(self.document_error("trailing comma"));
                }
                Ok(true)
            }
            kind if kind == close => Ok(false),
            _ => {
                Err(self.document_error(format!("expected `,` or `{closing}`")))
            }
        }
    }

    /// Records that `value` is the aggregate declared by `header`'s `$id`.
    ///
    /// Parsers call this right after allocating the aggregate, before reading
    /// its contents, so references from inside it resolve immediately.
    ///
    /// # Errors
    ///
    /// Fails if the id was declared before.
    pub fn register(
        &mut self,
        header: &StructureHeader,
        value: &Value,
    ) -> Result<()> {
        let Some(id) = header.id else {
            return Ok(());
        };
        self.preserver
            .register_materialized(id, value.clone())
            .map_err(|DuplicateId(id)| {
                Error::document("duplicate id", id.to_string(), header.position)
            })
    }

    /// Installs every deferred reference waiting for the aggregate declared
    /// by `header`. Parsers call this once the aggregate is complete.
    pub fn complete(&mut self, header: &StructureHeader) -> usize {
        header.id.map_or(0, |id| {
            self.references.remove(&id);
            self.preserver.resolve(id)
        })
    }

    /// Puts a parse result into `slot`: values and nulls right away, deferred
    /// references once their target completes.
    pub fn store(&mut self, result: ParseResult, slot: Slot) {
        match result {
            ParseResult::Value(value) => slot.install(value),
            ParseResult::Null => slot.install(Value::Null),
            ParseResult::Deferred(id) => {
                self.preserver
                    .register_deferred(DeferredReference::new(id, slot));
            }
        }
    }

    /// Skips the value starting at the current token. On return the current
    /// token is the value's last token.
    ///
    /// # Errors
    ///
    /// Fails on unbalanced brackets or a token that cannot start a value.
    pub fn skip_value(&mut self) -> Result<()> {
        let mut open: Vec<TokenKind> = vec![];
        loop {
            match self.kind() {
                TokenKind::BeginObject => open.push(TokenKind::EndObject),
                TokenKind::BeginArray => open.push(TokenKind::EndArray),
                kind @ (TokenKind::EndObject | TokenKind::EndArray) => {
                    if open.pop() != Some(kind) {
                        return Err(self.document_error("unbalanced brackets"));
                    }
                }
                TokenKind::EndOfDocument => {
                    return Err(
                        self.document_error("unexpected end of document")
                    );
                }
                TokenKind::PairDelimiter | TokenKind::ValueDelimiter
                    if open.is_empty() =>
                {
                    return Err(self.document_error("expected a value"));
                }
                _ => {}
            }
            if open.is_empty() {
                return Ok(());
            }
            self.read_next()?;
        }
    }

    fn unresolved(&self, id: ReferenceId) -> Error {
        let position = self
            .references
            .get(&id)
            .copied()
            .unwrap_or_else(|| self.tokenizer.position());
        debug!("reference to ${id} never resolved");
        Error::document("unresolved reference", id.to_string(), position)
    }
}

impl<'a, 'r> Deserializer<'r, SliceSource<'a>> {
    /// Creates a deserializer over an in-memory document.
    pub fn from_slice(
        input: &'a [u8],
        registry: &'r TypeRegistry,
        settings: &'r Settings,
    ) -> Self {
        Self::new(Tokenizer::from_slice(input), registry, settings)
    }
}

impl<'r, R: Read> Deserializer<'r, RingSource<R>> {
    /// Creates a deserializer streaming from `reader` through a ring buffer
    /// of `settings.buffer_size` bytes.
    ///
    /// # Errors
    ///
    /// Fails if the buffer size is invalid or the first read fails.
    pub fn from_reader(
        reader: R,
        registry: &'r TypeRegistry,
        settings: &'r Settings,
    ) -> Result<Self> {
        let tokenizer = Tokenizer::from_reader(reader, settings.buffer_size)?;
        Ok(Self::new(tokenizer, registry, settings))
    }
}

/// Deserializes a document held in a string.
///
/// # Errors
///
/// See [`Deserializer::deserialize`]. Invalid settings are reported as
/// [`Error::Config`].
pub fn from_str(
    text: &str,
    ty: &Type,
    registry: &TypeRegistry,
    settings: &Settings,
) -> Result<Value> {
    from_slice(text.as_bytes(), ty, registry, settings)
}

/// Deserializes a document held in memory.
///
/// # Errors
///
/// See [`from_str`].
pub fn from_slice(
    bytes: &[u8],
    ty: &Type,
    registry: &TypeRegistry,
    settings: &Settings,
) -> Result<Value> {
    settings.validate()?;
    Deserializer::from_slice(bytes, registry, settings).deserialize(ty)
}

/// Deserializes a document read from a stream through a ring buffer of
/// `settings.buffer_size` bytes.
///
/// # Errors
///
/// See [`from_str`]. A single token longer than the buffer is reported as
/// [`Error::Capacity`], stream failures as [`Error::Io`].
pub fn from_reader<R: Read>(
    reader: R,
    ty: &Type,
    registry: &TypeRegistry,
    settings: &Settings,
) -> Result<Value> {
    settings.validate()?;
    Deserializer::from_reader(reader, registry, settings)?.deserialize(ty)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ObjectType;

    fn parse(input: &str, ty: &Type) -> Result<Value> {
        from_str(input, ty, &TypeRegistry::new(), &Settings::default())
    }

    #[test]
    fn scalars_and_any() {
        let value =
            parse(r#"{"a": [1, 2.5, "x", true, null]}"#, &Type::Any).unwrap();
        let list = value.get("a").unwrap();
        assert_eq!(list.len(), Some(5));
        assert_eq!(list.at(0).and_then(|v| v.as_i64()), Some(1));
        assert_eq!(list.at(1).and_then(|v| v.as_f64()), Some(2.5));
        assert_eq!(list.at(2).as_ref().and_then(Value::as_str), Some("x"));
        assert_eq!(list.at(3).and_then(|v| v.as_bool()), Some(true));
        assert!(list.at(4).unwrap().is_null());
    }

    #[test]
    fn shared_items_keep_identity() {
        let root = parse(
            r#"{"$id":0,"items":["$id",1,1,2],
                "child":{"$id":2,"child":null,"items":["$ref",1]}}"#,
            &Type::Any,
        )
        .unwrap();
        let items = root.get("items").unwrap();
        let child_items = root.get("child").unwrap().get("items").unwrap();
        assert!(Value::ptr_eq(&items, &child_items));
        assert_eq!(items.len(), Some(2));
    }

    #[test]
    fn document_level_errors() {
        let cases = [
            ("", "empty document"),
            ("1 2", "after the root value"),
            (r#"{"$ref": 4}"#, "unresolved reference"),
            (r#"[{"$ref": 4}]"#, "unresolved reference"),
            (r#"[1,]"#, "trailing comma"),
            (r#"{"a" 1}"#, "expected `:`"),
            (r#"{"a": 1 "b": 2}"#, "expected `,` or `}`"),
            (r#"[{"$id": 1}, {"$id": 1}]"#, "duplicate id"),
            (r#"{"a": 1, "$id": 3}"#, "metadata key after data"),
            (r#"{"a": 1, "a": 2}"#, "duplicate property"),
        ];
        for (input, expected) in cases {
            let err = parse(input, &Type::Any).unwrap_err();
            assert!(err.is_document_error(), "{input}: {err}");
            assert!(err.to_string().contains(expected), "{input}: {err}");
        }
    }

    #[test]
    fn type_mismatches_are_document_errors() {
        let err = parse("1.5", &Type::Integer).unwrap_err();
        assert_eq!(
            err.to_string(),
            "cannot read floating-point number as `int`: \
             `1.5` at line 1, column 1"
        );
        let dictionary = Type::dictionary(Type::String, Type::Any);
        assert!(parse("[1]", &dictionary).is_err());
        assert!(parse("99999999999999999999", &Type::Integer).is_err());
        assert!(parse("1e999", &Type::Float).is_err());
        assert!(parse("null", &Type::Integer).unwrap().is_null());
        assert_eq!(parse("3", &Type::Float).unwrap().as_f64(), Some(3.0));
    }

    #[test]
    fn depth_limit() {
        let settings = Settings {
            max_depth: 3,
            ..Settings::default()
        };
        let registry = TypeRegistry::new();
        assert!(from_str("[[[1]]]", &Type::Any, &registry, &settings).is_ok());
        let err = from_str("[[[[1]]]]", &Type::Any, &registry, &settings)
            .unwrap_err();
        assert!(err.to_string().contains("nesting deeper than 3"));
    }

    #[test]
    fn default_depth_fits_a_small_thread_stack() {
        let limit = Settings::default().max_depth;
        let nested = |open: &str, close: &str, depth: usize| {
            format!("{}1{}", open.repeat(depth), close.repeat(depth))
        };
        let worker = std::thread::Builder::new()
            .stack_size(2 * 1024 * 1024)
            .spawn(move || {
                let registry = TypeRegistry::new();
                let settings = Settings::default();
                let parse = |input: &str| {
                    from_str(input, &Type::Any, &registry, &settings)
                };
                assert!(parse(&nested("[", "]", limit)).is_ok());
                assert!(parse(&nested("{\"a\":", "}", limit)).is_ok());
                let err = parse(&nested("[", "]", limit + 1)).unwrap_err();
                assert!(err.is_document_error());
                let err =
                    parse(&nested("{\"a\":", "}", limit + 1)).unwrap_err();
                assert!(err.is_document_error());
            })
            .unwrap();
        worker.join().unwrap();
    }

    #[test]
    fn unknown_fields_are_skipped_or_denied() {
        let registry = TypeRegistry::new();
        let point = ObjectType::builder("Point")
            .field("x", Type::Integer)
            .field("y", Type::Integer)
            .build();
        registry.register_object(point);
        let ty = Type::named("Point");
        let input = r#"{"x": 1, "extra": {"deep": [1, {"z": []}]}, "y": 2}"#;

        let value =
            from_str(input, &ty, &registry, &Settings::default()).unwrap();
        assert_eq!(value.get("y").and_then(|v| v.as_i64()), Some(2));

        let strict = Settings {
            deny_unknown_fields: true,
            ..Settings::default()
        };
        let err = from_str(input, &ty, &registry, &strict).unwrap_err();
        assert!(err.to_string().contains("unknown field"));
        assert_eq!(err.token(), Some("\"extra\""));
    }

    #[test]
    fn unknown_requested_names_are_configuration_errors() {
        let err = parse("{}", &Type::named("Missing")).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn invalid_settings_are_rejected_up_front() {
        let settings = Settings {
            buffer_size: 8,
            ..Settings::default()
        };
        let registry = TypeRegistry::new();
        let err = from_reader(&b"1"[..], &Type::Any, &registry, &settings)
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}

/*!
# Metadata Parser

Reads the leading `$id` / `$type` / `$ref` entries of a freshly opened object
or array. Objects carry them as ordinary pairs, arrays as positional items:

```json
{"$id": 1, "$type": "Circle", "radius": 2.0}
["$id", 2, 10, 20, 30]
{"$ref": 1}
["$ref", 2]
```

Rules:

- `$id` comes before `$type`, and both come before any data.
- `$ref` is the only entry of its structure. Combining it with anything else,
  in any order, is a document error.
- Each key appears at most once.

The spellings of the keys, and of the members of object type descriptors,
come from [`MetadataKeys`].
*/
use crate::config::MetadataKeys;
use crate::error::{Error, Result};
use crate::preserver::{ObjectReferencePreserver, ReferenceId};
use crate::source::CharacterSource;
use crate::tokenizer::{Token, TokenKind, Tokenizer};
use crate::types::{Type, TypeDescriptor, TypeRegistry};
use crate::value::Value;

/// Which kind of structure a metadata prefix belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    /// `{...}`, metadata as key/value pairs
    Object,
    /// `[...]`, metadata as positional items
    Array,
}

impl Shape {
    /// Token that closes the structure.
    #[must_use]
    pub const fn close(self) -> TokenKind {
        match self {
            Self::Object => TokenKind::EndObject,
            Self::Array => TokenKind::EndArray,
        }
    }

    /// Token between a metadata key and its value.
    const fn separator(self) -> TokenKind {
        match self {
            Self::Object => TokenKind::PairDelimiter,
            Self::Array => TokenKind::ValueDelimiter,
        }
    }

    const fn noun(self) -> &'static str {
        match self {
            Self::Object => "property",
            Self::Array => "element",
        }
    }
}

/// What the prefix says about the identity of the value.
#[derive(Debug, Clone, Default)]
pub enum ReferencePreservationInfo {
    /// No `$id` or `$ref`.
    #[default]
    Empty,
    /// `$id`: the value about to be built is known by this id.
    NewObject(ReferenceId),
    /// `$ref` to a value that already exists.
    RetrievedObject(ReferenceId, Value),
    /// `$ref` to a value that does not exist yet.
    DeferredReference(ReferenceId),
}

/// Outcome of [`MetadataParser::parse_prefix`].
#[derive(Debug, Clone)]
pub struct MetadataParseResult {
    /// The requested type, or the one named by `$type`.
    pub type_to_construct: Type,
    /// Identity information from `$id` / `$ref`.
    pub reference: ReferencePreservationInfo,
    /// Dimension lengths declared by an array `$type`.
    pub array_lengths: Option<Vec<usize>>,
    /// `false` when the structure closed right after its metadata. The
    /// current token is then the closing token.
    pub data_follows: bool,
    /// Whether `$type` chose the type.
    pub type_overridden: bool,
}

#[derive(Clone, Copy)]
enum Reserved {
    Id,
    Reference,
    Type,
}

/// Parses metadata prefixes with a given set of key spellings.
#[derive(Debug, Clone, Copy)]
pub struct MetadataParser<'k> {
    keys: &'k MetadataKeys,
}

impl<'k> MetadataParser<'k> {
    /// Creates a parser for `keys`.
    #[must_use]
    pub const fn new(keys: &'k MetadataKeys) -> Self {
        Self { keys }
    }

    fn classify(&self, token: &Token<'_>) -> Option<Reserved> {
        if token.raw_eq(&self.keys.id) {
            Some(Reserved::Id)
        } else if token.raw_eq(&self.keys.reference) {
            Some(Reserved::Reference)
        } else if token.raw_eq(&self.keys.type_) {
            Some(Reserved::Type)
        } else {
            None
        }
    }

    /// Whether `token` is one of the reserved metadata keys.
    #[must_use]
    pub fn is_reserved(&self, token: &Token<'_>) -> bool {
        self.classify(token).is_some()
    }

    /// Consumes the metadata prefix of the structure whose first inner token
    /// is the tokenizer's current token.
    ///
    /// On return the current token is the first data token (a property name
    /// or the first element), or the closing token if no data follows.
    /// `preserver` is only read: registering a new id is left to whoever
    /// builds the value.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Document`] for misplaced, repeated or malformed
    /// metadata, unknown type names and types that cannot be used where
    /// `requested` is expected.
    pub fn parse_prefix<S: CharacterSource>(
        &self,
        tokenizer: &mut Tokenizer<S>,
        registry: &TypeRegistry,
        preserver: &ObjectReferencePreserver,
        requested: &Type,
        shape: Shape,
    ) -> Result<MetadataParseResult> {
        let mut result = MetadataParseResult {
            type_to_construct: requested.clone(),
            reference: ReferencePreservationInfo::Empty,
            array_lengths: None,
            data_follows: true,
            type_overridden: false,
        };
        let mut seen_id = false;

        loop {
            if tokenizer.kind() == shape.close() {
                result.data_follows = false;
                return Ok(result);
            }
            let reserved = match tokenizer.kind() {
                TokenKind::String => self.classify(&tokenizer.token()),
                _ => None,
            };
            let Some(reserved) = reserved else {
                return Ok(result);
            };

            match reserved {
                Reserved::Reference => {
                    if seen_id || result.type_overridden {
                        return Err(tokenizer.document_error(format!(
                            "`{}` cannot be combined with other metadata",
                            self.keys.reference
                        )));
                    }
                    self.read_value(tokenizer, shape)?;
                    let id = read_id(tokenizer)?;
                    tokenizer.read_next_token()?;
                    if tokenizer.kind() != shape.close() {
                        let container = match shape {
                            Shape::Object => "object",
                            Shape::Array => "array",
                        };
                        return Err(tokenizer.document_error(format!(
                            "`{}` must be the only {} of its {container}",
                            self.keys.reference,
                            shape.noun(),
                        )));
                    }
                    result.reference =
                        match preserver.try_get_materialized(id) {
                            Some(value) => {
                                ReferencePreservationInfo::RetrievedObject(
                                    id,
                                    value.clone(),
                                )
                            }
                            None => {
                                ReferencePreservationInfo::DeferredReference(id)
                            }
                        };
                    result.data_follows = false;
                    return Ok(result);
                }
                Reserved::Id => {
                    if seen_id {
                        return Err(tokenizer.document_error(format!(
                            "duplicate `{}`",
                            self.keys.id
                        )));
                    }
                    if result.type_overridden {
                        return Err(tokenizer.document_error(format!(
                            "`{}` must come before `{}`",
                            self.keys.id, self.keys.type_
                        )));
                    }
                    self.read_value(tokenizer, shape)?;
                    let id = read_id(tokenizer)?;
                    if preserver.try_get_materialized(id).is_some() {
                        return Err(tokenizer.document_error("duplicate id"));
                    }
                    result.reference = ReferencePreservationInfo::NewObject(id);
                    seen_id = true;
                }
                Reserved::Type => {
                    if result.type_overridden {
                        return Err(tokenizer.document_error(format!(
                            "duplicate `{}`",
                            self.keys.type_
                        )));
                    }
                    self.read_value(tokenizer, shape)?;
                    let start = tokenizer.position();
                    let descriptor = self.parse_descriptor(tokenizer)?;
                    let ty = registry.resolve(&descriptor).map_err(|err| {
                        Error::document(
                            err.to_string(),
                            descriptor.to_string(),
                            start,
                        )
                    })?;
                    if !ty.is_assignable_to(requested) {
                        return Err(Error::document(
                            format!(
                                "`{ty}` cannot be used where `{requested}` \
                                 is expected"
                            ),
                            descriptor.to_string(),
                            start,
                        ));
                    }
                    if let TypeDescriptor::Array { lengths, .. } = descriptor {
                        result.array_lengths = lengths;
                    }
                    result.type_to_construct = ty;
                    result.type_overridden = true;
                }
            }

            tokenizer.read_next_token()?;
            match tokenizer.kind() {
                TokenKind::ValueDelimiter => {
                    tokenizer.read_next_token()?;
                    if tokenizer.kind() == shape.close() {
                        return Err(tokenizer.document_error("trailing comma"));
                    }
                }
                kind if kind == shape.close() => {}
                _ => {
                    return Err(tokenizer.document_error(format!(
                        "expected `,` or `{}`",
                        if shape == Shape::Object { '}' } else { ']' }
                    )));
                }
            }
        }
    }

    /// Steps from a metadata key over its separator onto its value.
    fn read_value<S: CharacterSource>(
        &self,
        tokenizer: &mut Tokenizer<S>,
        shape: Shape,
    ) -> Result<()> {
        tokenizer.read_next_token()?;
        if tokenizer.kind() != shape.separator() {
            return Err(tokenizer.document_error(match shape {
                Shape::Object => "expected `:`",
                Shape::Array => "expected `,` after metadata key",
            }));
        }
        tokenizer.read_next_token()?;
        Ok(())
    }

    /// Parses a type descriptor starting at the current token. On return the
    /// current token is the descriptor's last token.
    fn parse_descriptor<S: CharacterSource>(
        &self,
        tokenizer: &mut Tokenizer<S>,
    ) -> Result<TypeDescriptor> {
        match tokenizer.kind() {
            TokenKind::String => {
                Ok(TypeDescriptor::Named(tokenizer.token().unquoted()?))
            }
            TokenKind::BeginObject => self.parse_descriptor_object(tokenizer),
            _ => Err(tokenizer
                .document_error("expected a type name or type descriptor")),
        }
    }

    fn parse_descriptor_object<S: CharacterSource>(
        &self,
        tokenizer: &mut Tokenizer<S>,
    ) -> Result<TypeDescriptor> {
        let start = tokenizer.position();
        let mut name: Option<String> = None;
        let mut arguments: Option<Vec<TypeDescriptor>> = None;
        let mut element: Option<TypeDescriptor> = None;
        let mut rank: Option<usize> = None;
        let mut lengths: Option<Vec<usize>> = None;

        tokenizer.read_next_token()?;
        if tokenizer.kind() == TokenKind::EndObject {
            return Err(tokenizer.document_error("empty type descriptor"));
        }
        loop {
            if tokenizer.kind() != TokenKind::String {
                return Err(tokenizer.document_error(
                    "expected a type descriptor member",
                ));
            }
            let member = tokenizer.token().unquoted()?;
            let keys = self.keys;
            let duplicate = if member == keys.name {
                name.is_some()
            } else if member == keys.type_arguments {
                arguments.is_some()
            } else if member == keys.array_type {
                element.is_some()
            } else if member == keys.array_rank {
                rank.is_some()
            } else if member == keys.array_length {
                lengths.is_some()
            } else {
                return Err(tokenizer.document_error(
                    "unknown type descriptor member",
                ));
            };
            if duplicate {
                return Err(tokenizer.document_error(
                    "duplicate type descriptor member",
                ));
            }

            tokenizer.read_next_token()?;
            if tokenizer.kind() != TokenKind::PairDelimiter {
                return Err(tokenizer.document_error("expected `:`"));
            }
            tokenizer.read_next_token()?;

            if member == keys.name {
                if tokenizer.kind() != TokenKind::String {
                    return Err(tokenizer.document_error(
                        "type name must be a string",
                    ));
                }
                name = Some(tokenizer.token().unquoted()?);
            } else if member == keys.type_arguments {
                arguments = Some(self.parse_arguments(tokenizer)?);
            } else if member == keys.array_type {
                element = Some(self.parse_descriptor(tokenizer)?);
            } else if member == keys.array_rank {
                let value = read_count(tokenizer)?;
                if value == 0 {
                    return Err(tokenizer.document_error(
                        "array rank must be positive",
                    ));
                }
                rank = Some(value);
            } else {
                lengths = Some(match tokenizer.kind() {
                    TokenKind::BeginArray => read_counts(tokenizer)?,
                    _ => vec![read_count(tokenizer)?],
                });
            }

            tokenizer.read_next_token()?;
            match tokenizer.kind() {
                TokenKind::ValueDelimiter => tokenizer.read_next_token()?,
                TokenKind::EndObject => break,
                _ => return Err(tokenizer.document_error(
                    "expected `,` or `}`",
                )),
            };
        }

        let is_array = element.is_some()
            || name.as_deref() == Some(self.keys.array_name.as_str());
        if is_array {
            let Some(element) = element else {
                return Err(Error::document(
                    format!(
                        "array type descriptor without `{}`",
                        self.keys.array_type
                    ),
                    "{",
                    start,
                ));
            };
            let rank = rank
                .or_else(|| lengths.as_ref().map(Vec::len))
                .unwrap_or(1);
            return Ok(TypeDescriptor::Array {
                element: Box::new(element),
                rank,
                lengths,
            });
        }

        let Some(name) = name else {
            return Err(Error::document(
                format!("type descriptor without `{}`", self.keys.name),
                "{",
                start,
            ));
        };
        Ok(match arguments {
            Some(arguments) => TypeDescriptor::Generic { name, arguments },
            None => TypeDescriptor::Named(name),
        })
    }

    fn parse_arguments<S: CharacterSource>(
        &self,
        tokenizer: &mut Tokenizer<S>,
    ) -> Result<Vec<TypeDescriptor>> {
        if tokenizer.kind() != TokenKind::BeginArray {
            return Err(tokenizer.document_error(
                "type arguments must be an array",
            ));
        }
        let mut arguments = vec![];
        tokenizer.read_next_token()?;
        if tokenizer.kind() == TokenKind::EndArray {
            return Ok(arguments);
        }
        loop {
            arguments.push(self.parse_descriptor(tokenizer)?);
            if !next_item(tokenizer)? {
                return Ok(arguments);
            }
        }
    }
}

/// Reads the integer id at the current token.
fn read_id<S: CharacterSource>(
    tokenizer: &Tokenizer<S>,
) -> Result<ReferenceId> {
    tokenizer
        .token()
        .to_i64()
        .ok_or_else(|| tokenizer.document_error("expected an integer id"))
}

fn read_count<S: CharacterSource>(tokenizer: &Tokenizer<S>) -> Result<usize> {
    tokenizer
        .token()
        .to_i64()
        .and_then(|value| usize::try_from(value).ok())
        .ok_or_else(|| {
            tokenizer.document_error("expected a non-negative integer")
        })
}

fn read_counts<S: CharacterSource>(
    tokenizer: &mut Tokenizer<S>,
) -> Result<Vec<usize>> {
    let mut counts = vec![];
    tokenizer.read_next_token()?;
    if tokenizer.kind() == TokenKind::EndArray {
        return Ok(counts);
    }
    loop {
        counts.push(read_count(tokenizer)?);
        if !next_item(tokenizer)? {
            return Ok(counts);
        }
    }
}

/// After an array item: `,` moves onto the next item (`true`), `]` ends the
/// array (`false`).
fn next_item<S: CharacterSource>(tokenizer: &mut Tokenizer<S>) -> Result<bool> {
    tokenizer.read_next_token()?;
    match tokenizer.kind() {
        TokenKind::ValueDelimiter => {
            tokenizer.read_next_token()?;
            if tokenizer.kind() == TokenKind::EndArray {
                return Err(tokenizer.document_error("trailing comma"));
            }
            Ok(true)
        }
        TokenKind::EndArray => Ok(false),
        _ => Err(tokenizer.document_error("expected `,` or `]`")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::SliceSource;
    use crate::types::ObjectType;

    struct Fixture {
        keys: MetadataKeys,
        registry: TypeRegistry,
        preserver: ObjectReferencePreserver,
    }

    impl Fixture {
        fn new() -> Self {
            let registry = TypeRegistry::new();
            let shape = ObjectType::builder("Shape")
                .field("name", Type::String)
                .build();
            let circle = ObjectType::builder("Circle")
                .field("radius", Type::Float)
                .extends(shape.clone())
                .build();
            registry.register_object(shape);
            registry.register_object(circle);
            Self {
                keys: MetadataKeys::default(),
                registry,
                preserver: ObjectReferencePreserver::new(),
            }
        }

        /// Opens the root structure of `input` and parses its prefix,
        /// returning the result and the current token's text.
        fn parse(
            &self,
            input: &str,
            requested: &Type,
        ) -> Result<(MetadataParseResult, String)> {
            let mut tokenizer =
                Tokenizer::new(SliceSource::new(input.as_bytes()));
            let shape = match tokenizer.read_next_token()? {
                TokenKind::BeginObject => Shape::Object,
                _ => Shape::Array,
            };
            tokenizer.read_next_token()?;
            let result = MetadataParser::new(&self.keys).parse_prefix(
                &mut tokenizer,
                &self.registry,
                &self.preserver,
                requested,
                shape,
            )?;
            Ok((result, tokenizer.token().text().into_owned()))
        }

        fn error(&self, input: &str) -> String {
            match self.parse(input, &Type::Any) {
                Err(err) => {
                    assert!(err.is_document_error(), "{err}");
                    err.to_string()
                }
                Ok((result, _)) => {
                    panic!("expected an error for {input}, got {result:?}")
                }
            }
        }
    }

    #[test]
    fn stops_at_first_data_key() {
        let fixture = Fixture::new();
        let (result, current) = fixture
            .parse(
                r#"{"$id": 3, "$type": "Circle", "radius": 1.5}"#,
                &Type::Any,
            )
            .unwrap();
        assert!(matches!(
            result.reference,
            ReferencePreservationInfo::NewObject(3)
        ));
        assert_eq!(result.type_to_construct.to_string(), "Circle");
        assert!(result.type_overridden);
        assert!(result.data_follows);
        assert_eq!(current, r#""radius""#);
    }

    #[test]
    fn plain_structures_have_no_metadata() {
        let fixture = Fixture::new();
        let (result, current) =
            fixture.parse(r#"{"a": 1}"#, &Type::Any).unwrap();
        assert!(matches!(result.reference, ReferencePreservationInfo::Empty));
        assert!(!result.type_overridden);
        assert_eq!(result.type_to_construct, Type::Any);
        assert_eq!(current, r#""a""#);

        let (result, current) = fixture.parse("[]", &Type::Any).unwrap();
        assert!(!result.data_follows);
        assert_eq!(current, "]");
    }

    #[test]
    fn array_metadata_is_positional() {
        let fixture = Fixture::new();
        let (result, current) =
            fixture.parse(r#"["$id", 1, 1, 2]"#, &Type::Any).unwrap();
        assert!(matches!(
            result.reference,
            ReferencePreservationInfo::NewObject(1)
        ));
        assert_eq!(current, "1");

        let (result, current) =
            fixture.parse(r#"["$id", 1]"#, &Type::Any).unwrap();
        assert!(!result.data_follows);
        assert_eq!(current, "]");
    }

    #[test]
    fn references_are_retrieved_or_deferred() {
        let mut fixture = Fixture::new();
        let (result, _) = fixture.parse(r#"{"$ref": 5}"#, &Type::Any).unwrap();
        assert!(matches!(
            result.reference,
            ReferencePreservationInfo::DeferredReference(5)
        ));
        assert!(!result.data_follows);

        let target = Value::new_list(vec![]);
        fixture.preserver.register_materialized(5, target.clone()).unwrap();
        let (result, current) =
            fixture.parse(r#"["$ref", 5]"#, &Type::Any).unwrap();
        let ReferencePreservationInfo::RetrievedObject(5, value) =
            result.reference
        else {
            panic!("expected a retrieved object");
        };
        assert!(Value::ptr_eq(&value, &target));
        assert_eq!(current, "]");
    }

    #[test]
    fn reference_must_be_exclusive_in_any_order() {
        let fixture = Fixture::new();
        for input in [
            r#"{"$ref": 1, "$id": 2}"#,
            r#"{"$id": 2, "$ref": 1}"#,
            r#"{"$type": "Circle", "$ref": 1}"#,
            r#"{"$ref": 1, "$type": "Circle"}"#,
            r#"{"$ref": 1, "data": 0}"#,
            r#"["$ref", 1, 2]"#,
            r#"["$id", 2, "$ref", 1]"#,
        ] {
            let message = fixture.error(input);
            assert!(message.contains("$ref"), "{input}: {message}");
        }
    }

    #[test]
    fn order_and_duplicates_are_enforced() {
        let fixture = Fixture::new();
        assert!(fixture
            .error(r#"{"$type": "Circle", "$id": 1}"#)
            .contains("must come before"));
        assert!(fixture.error(r#"{"$id": 1, "$id": 2}"#).contains("duplicate"));
        assert!(fixture
            .error(r#"{"$type": "Circle", "$type": "Shape"}"#)
            .contains("duplicate"));
        assert!(fixture.error(r#"{"$id": "one"}"#).contains("integer id"));
        assert!(fixture.error(r#"{"$id": 1,}"#).contains("trailing comma"));
    }

    #[test]
    fn ids_already_materialized_are_duplicates() {
        let mut fixture = Fixture::new();
        fixture
            .preserver
            .register_materialized(4, Value::new_dictionary())
            .unwrap();
        let err = fixture.parse(r#"{"$id": 4}"#, &Type::Any).unwrap_err();
        assert_eq!(err.token(), Some("4"));
        assert_eq!(err.position().map(|p| p.column), Some(9));
    }

    #[test]
    fn type_must_be_assignable() {
        let fixture = Fixture::new();
        let shape = fixture.registry.lookup("Shape").unwrap();
        let circle = fixture.registry.lookup("Circle").unwrap();
        let (result, _) =
            fixture.parse(r#"{"$type": "Circle"}"#, &shape).unwrap();
        assert_eq!(result.type_to_construct, circle);

        let err = fixture.parse(r#"{"$type": "Shape"}"#, &circle).unwrap_err();
        assert!(err.to_string().contains("cannot be used where `Circle`"));
        assert_eq!(err.token(), Some("Shape"));
    }

    #[test]
    fn generic_and_array_descriptors() {
        let fixture = Fixture::new();
        let input = r#"{"$type": {
            "name": "Dictionary",
            "typeArguments": [
                "string",
                {"name": "List", "typeArguments": ["int"]}
            ]
        }}"#;
        let (result, _) = fixture.parse(input, &Type::Any).unwrap();
        assert_eq!(
            result.type_to_construct,
            Type::dictionary(Type::String, Type::list(Type::Integer))
        );

        let input = r#"["$type",
            {"name": "array", "arrayType": "float", "arrayLength": [2, 3]},
            [1, 2, 3], [4, 5, 6]]"#;
        let (result, _) = fixture.parse(input, &Type::Any).unwrap();
        assert_eq!(result.type_to_construct, Type::array(Type::Float, 2));
        assert_eq!(result.array_lengths, Some(vec![2, 3]));

        let input = r#"["$type", {"arrayType": "int", "arrayRank": 3}]"#;
        let (result, _) = fixture.parse(input, &Type::Any).unwrap();
        assert_eq!(result.type_to_construct, Type::array(Type::Integer, 3));
        assert_eq!(result.array_lengths, None);
    }

    #[test]
    fn bad_descriptors() {
        let fixture = Fixture::new();
        for (input, expected) in [
            (
                r#"{"$type": {"name": "List",
                    "typeArguments": ["int", "int"]}}"#,
                "takes 1 type argument(s) but 2 were given",
            ),
            (r#"{"$type": "Nope"}"#, "unknown type"),
            (r#"{"$type": {"name": "array"}}"#, "arrayType"),
            (r#"{"$type": {"typeArguments": []}}"#, "`name`"),
            (r#"{"$type": {"nom": "x"}}"#, "unknown"),
            (r#"{"$type": 3}"#, "type name"),
            (
                r#"{"$type": {"arrayType": "int", "arrayRank": 2,
                    "arrayLength": 4}}"#,
                "rank 2",
            ),
        ] {
            let message = fixture.error(input);
            assert!(message.contains(expected), "{input}: {message}");
        }
    }

    #[test]
    fn custom_key_spellings() {
        let mut fixture = Fixture::new();
        fixture.keys.id = "@id".into();
        fixture.keys.type_ = "@type".into();
        let (result, current) = fixture
            .parse(r#"{"@id": 1, "@type": "Shape", "$id": 2}"#, &Type::Any)
            .unwrap();
        assert!(matches!(
            result.reference,
            ReferencePreservationInfo::NewObject(1)
        ));
        assert!(result.type_overridden);
        // default spellings are plain data now
        assert_eq!(current, r#""$id""#);
    }
}

//! Chooses the [`ValueParser`] for a (token kind, type) pair.
//!
//! Candidates are tried in order and the first whose
//! [`ValueParser::can_parse`] accepts the pair wins. Successful lookups are
//! memoized per exact pair, unless the parser opts out or the type came from
//! a `$type` override.
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use log::debug;

use crate::de::parsers::{
    ArrayParser, BooleanParser, DictionaryParser, FloatParser, IntegerParser,
    ListParser, NullParser, ObjectParser, StringParser,
};
use crate::de::{Deserializer, ParseResult, StructureHeader};
use crate::error::Result;
use crate::source::CharacterSource;
use crate::tokenizer::TokenKind;
use crate::types::Type;

/// Builds values of some types from some tokens.
pub trait ValueParser<S> {
    /// Name used in logs.
    fn name(&self) -> &'static str;

    /// Whether this parser can build a `ty` starting at a `kind` token.
    fn can_parse(&self, kind: TokenKind, ty: &Type) -> bool;

    /// Whether [`ValueParser::can_parse`] depends on nothing but its
    /// arguments, so the answer may be memoized.
    fn is_cacheable(&self) -> bool {
        true
    }

    /// Parses the value at the current token, leaving the current token on
    /// the value's last token.
    ///
    /// `header` is present for objects and arrays, whose opening token and
    /// metadata prefix have already been consumed.
    ///
    /// # Errors
    ///
    /// Fails if the value is malformed.
    fn parse(
        &self,
        de: &mut Deserializer<'_, S>,
        ty: &Type,
        header: Option<&StructureHeader>,
    ) -> Result<ParseResult>;
}

/// Ordered value parsers plus the memo of past choices.
pub struct ParserDispatch<S> {
    parsers: Vec<Rc<dyn ValueParser<S>>>,
    cache: HashMap<(TokenKind, Type), usize>,
    caching: bool,
}

impl<S: CharacterSource> ParserDispatch<S> {
    /// Creates a dispatcher with the built-in parsers. `caching` enables the
    /// memo.
    #[must_use]
    pub fn new(caching: bool) -> Self {
        let parsers: [Rc<dyn ValueParser<S>>; 9] = [
            Rc::new(NullParser),
            Rc::new(BooleanParser),
            Rc::new(IntegerParser),
            Rc::new(FloatParser),
            Rc::new(StringParser),
            Rc::new(ListParser),
            Rc::new(ArrayParser),
            Rc::new(DictionaryParser),
            Rc::new(ObjectParser),
        ];
        Self {
            parsers: parsers.into(),
            cache: HashMap::new(),
            caching,
        }
    }

    /// Adds a parser ahead of all others.
    pub fn register_front(&mut self, parser: Rc<dyn ValueParser<S>>) {
        self.parsers.insert(0, parser);
        // indices shifted
        self.cache.clear();
    }

    /// Number of memoized pairs.
    #[must_use]
    pub fn cached(&self) -> usize {
        self.cache.len()
    }

    /// Finds the parser for a `kind` token and type `ty`. A `polymorphic`
    /// lookup (the type came from `$type`) neither reads nor fills the memo.
    pub fn select(
        &mut self,
        kind: TokenKind,
        ty: &Type,
        polymorphic: bool,
    ) -> Option<Rc<dyn ValueParser<S>>> {
        let use_cache = self.caching && !polymorphic;
        if use_cache && let Some(&index) = self.cache.get(&(kind, ty.clone())) {
            return self.parsers.get(index).cloned();
        }

        let index = self
            .parsers
            .iter()
            .position(|parser| parser.can_parse(kind, ty))?;
        let parser = &self.parsers[index];
        if use_cache && parser.is_cacheable() {
            debug!("dispatch {kind} as `{ty}` to {}", parser.name());
            self.cache.insert((kind, ty.clone()), index);
        }
        Some(parser.clone())
    }
}

impl<S> fmt::Debug for ParserDispatch<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParserDispatch")
            .field("parsers", &self.parsers.len())
            .field("cached", &self.cache.len())
            .field("caching", &self.caching)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;
    use crate::config::Settings;
    use crate::source::SliceSource;
    use crate::types::TypeRegistry;
    use crate::value::Value;

    type Dispatch = ParserDispatch<SliceSource<'static>>;

    fn name_of(
        dispatch: &mut Dispatch,
        kind: TokenKind,
        ty: &Type,
    ) -> Option<&'static str> {
        dispatch.select(kind, ty, false).map(|parser| parser.name())
    }

    #[test]
    fn built_in_order() {
        let mut dispatch = Dispatch::new(true);
        assert_eq!(
            name_of(&mut dispatch, TokenKind::Null, &Type::Integer),
            Some("null")
        );
        assert_eq!(
            name_of(&mut dispatch, TokenKind::IntegerNumber, &Type::Integer),
            Some("integer")
        );
        assert_eq!(
            name_of(&mut dispatch, TokenKind::IntegerNumber, &Type::Float),
            Some("float")
        );
        assert_eq!(
            name_of(
                &mut dispatch,
                TokenKind::BeginArray,
                &Type::array(Type::Integer, 2)
            ),
            Some("array")
        );
        assert_eq!(
            name_of(
                &mut dispatch,
                TokenKind::BeginObject,
                &Type::list(Type::Any)
            ),
            None
        );
    }

    #[test]
    fn memoizes_monomorphic_pairs_only() {
        let mut dispatch = Dispatch::new(true);
        dispatch.select(TokenKind::String, &Type::String, false);
        dispatch.select(TokenKind::String, &Type::String, false);
        assert_eq!(dispatch.cached(), 1);
        dispatch.select(TokenKind::BeginObject, &Type::Any, true);
        assert_eq!(dispatch.cached(), 1);
        // misses are not memoized
        dispatch.select(TokenKind::String, &Type::Integer, false);
        assert_eq!(dispatch.cached(), 1);

        let mut uncached = Dispatch::new(false);
        uncached.select(TokenKind::String, &Type::String, false);
        assert_eq!(uncached.cached(), 0);
    }

    /// Reads every integer as its double, but only while enabled.
    struct Doubler {
        enabled: Rc<Cell<bool>>,
    }

    impl<S: CharacterSource> ValueParser<S> for Doubler {
        fn name(&self) -> &'static str {
            "doubler"
        }

        fn can_parse(&self, kind: TokenKind, ty: &Type) -> bool {
            self.enabled.get()
                && kind == TokenKind::IntegerNumber
                && *ty == Type::Integer
        }

        fn is_cacheable(&self) -> bool {
            false
        }

        fn parse(
            &self,
            de: &mut Deserializer<'_, S>,
            _ty: &Type,
            _header: Option<&StructureHeader>,
        ) -> Result<ParseResult> {
            let value = de
                .token()
                .to_i64()
                .ok_or_else(|| de.document_error("integer out of range"))?;
            Ok(ParseResult::Value(Value::Integer(value * 2)))
        }
    }

    #[test]
    fn custom_parsers_take_precedence_and_may_opt_out_of_caching() {
        let registry = TypeRegistry::new();
        let settings = Settings::default();
        let enabled = Rc::new(Cell::new(true));
        let ty = Type::list(Type::Integer);
        let mut de =
            Deserializer::from_slice(b"[1, 2, 3]", &registry, &settings)
                .with_parser(Rc::new(Doubler {
                    enabled: enabled.clone(),
                }));
        de.read_next().unwrap();
        let ParseResult::Value(list) = de.deserialize_current(&ty).unwrap()
        else {
            panic!("expected a value");
        };
        let items: Vec<i64> =
            (0..3).filter_map(|i| list.at(i)?.as_i64()).collect();
        assert_eq!(items, vec![2, 4, 6]);

        let mut dispatch = Dispatch::new(true);
        dispatch.register_front(Rc::new(Doubler {
            enabled: enabled.clone(),
        }));
        assert_eq!(
            name_of(&mut dispatch, TokenKind::IntegerNumber, &Type::Integer),
            Some("doubler")
        );
        enabled.set(false);
        assert_eq!(
            name_of(&mut dispatch, TokenKind::IntegerNumber, &Type::Integer),
            Some("integer")
        );
    }
}

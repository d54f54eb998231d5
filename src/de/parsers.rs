//! Built-in value parsers.
//!
//! Aggregate parsers allocate their aggregate first, register it under its
//! `$id`, then fill it element by element. An element that turns out to be a
//! forward reference gets a `null` placeholder, and a deferred installer
//! overwrites the placeholder once the target completes.
use std::cell::RefCell;
use std::collections::HashSet;
use std::rc::Rc;

use indexmap::IndexMap;
use log::trace;

use crate::de::{Deserializer, ParseResult, StructureHeader, ValueParser};
use crate::error::{Error, Result};
use crate::preserver::Slot;
use crate::source::CharacterSource;
use crate::tokenizer::TokenKind;
use crate::types::Type;
use crate::value::{DictKey, MultiArray, Object, Shared, Value};

/// `null`, for any type.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullParser;

/// `true` / `false`
#[derive(Debug, Clone, Copy, Default)]
pub struct BooleanParser;

/// Integers that fit in `i64`.
#[derive(Debug, Clone, Copy, Default)]
pub struct IntegerParser;

/// Finite floats, and integers where a float is requested.
#[derive(Debug, Clone, Copy, Default)]
pub struct FloatParser;

/// Strings, with escapes decoded.
#[derive(Debug, Clone, Copy, Default)]
pub struct StringParser;

/// `List<T>` from a JSON array.
#[derive(Debug, Clone, Copy, Default)]
pub struct ListParser;

/// `T[]`, `T[,]`, ... from (nested) JSON arrays.
#[derive(Debug, Clone, Copy, Default)]
pub struct ArrayParser;

/// `Dictionary<string, T>` and `Dictionary<int, T>` from a JSON object.
#[derive(Debug, Clone, Copy, Default)]
pub struct DictionaryParser;

/// Registered object types from a JSON object.
#[derive(Debug, Clone, Copy, Default)]
pub struct ObjectParser;

impl<S: CharacterSource> ValueParser<S> for NullParser {
    fn name(&self) -> &'static str {
        "null"
    }

    fn can_parse(&self, kind: TokenKind, _ty: &Type) -> bool {
        kind == TokenKind::Null
    }

    fn parse(
        &self,
        _de: &mut Deserializer<'_, S>,
        _ty: &Type,
        _header: Option<&StructureHeader>,
    ) -> Result<ParseResult> {
        Ok(ParseResult::Null)
    }
}

impl<S: CharacterSource> ValueParser<S> for BooleanParser {
    fn name(&self) -> &'static str {
        "boolean"
    }

    fn can_parse(&self, kind: TokenKind, ty: &Type) -> bool {
        matches!(kind, TokenKind::True | TokenKind::False)
            && matches!(ty, Type::Bool | Type::Any)
    }

    fn parse(
        &self,
        de: &mut Deserializer<'_, S>,
        _ty: &Type,
        _header: Option<&StructureHeader>,
    ) -> Result<ParseResult> {
        Ok(ParseResult::Value(Value::Bool(de.kind() == TokenKind::True)))
    }
}

impl<S: CharacterSource> ValueParser<S> for IntegerParser {
    fn name(&self) -> &'static str {
        "integer"
    }

    fn can_parse(&self, kind: TokenKind, ty: &Type) -> bool {
        kind == TokenKind::IntegerNumber
            && matches!(ty, Type::Integer | Type::Any)
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
        Ok(ParseResult::Value(Value::Integer(value)))
    }
}

impl<S: CharacterSource> ValueParser<S> for FloatParser {
    fn name(&self) -> &'static str {
        "float"
    }

    fn can_parse(&self, kind: TokenKind, ty: &Type) -> bool {
        match kind {
            TokenKind::FloatingPointNumber => {
                matches!(ty, Type::Float | Type::Any)
            }
            TokenKind::IntegerNumber => *ty == Type::Float,
            _ => false,
        }
    }

    fn parse(
        &self,
        de: &mut Deserializer<'_, S>,
        _ty: &Type,
        _header: Option<&StructureHeader>,
    ) -> Result<ParseResult> {
        let value = de
            .token()
            .to_f64()
            .filter(|value| value.is_finite())
            .ok_or_else(|| de.document_error("number out of range"))?;
        Ok(ParseResult::Value(Value::Float(value)))
    }
}

impl<S: CharacterSource> ValueParser<S> for StringParser {
    fn name(&self) -> &'static str {
        "string"
    }

    fn can_parse(&self, kind: TokenKind, ty: &Type) -> bool {
        kind == TokenKind::String && matches!(ty, Type::String | Type::Any)
    }

    fn parse(
        &self,
        de: &mut Deserializer<'_, S>,
        _ty: &Type,
        _header: Option<&StructureHeader>,
    ) -> Result<ParseResult> {
        Ok(ParseResult::Value(Value::String(de.token().unquoted()?)))
    }
}

impl<S: CharacterSource> ValueParser<S> for ListParser {
    fn name(&self) -> &'static str {
        "list"
    }

    fn can_parse(&self, kind: TokenKind, ty: &Type) -> bool {
        kind == TokenKind::BeginArray && matches!(ty, Type::List(_))
    }

    fn parse(
        &self,
        de: &mut Deserializer<'_, S>,
        ty: &Type,
        header: Option<&StructureHeader>,
    ) -> Result<ParseResult> {
        let header = structure(de, header)?;
        let Type::List(element) = ty else {
            return Err(mismatch(ty, header));
        };

        let list: Shared<Vec<Value>> = Rc::new(RefCell::new(vec![]));
        let value = Value::List(list.clone());
        de.register(header, &value)?;

        if header.data_follows {
            loop {
                let result = de.deserialize_current(element)?;
                let index = {
                    let mut items = list.borrow_mut();
                    items.push(Value::Null);
                    items.len() - 1
                };
                de.store(
                    result,
                    Slot::ListIndex {
                        list: list.clone(),
                        index,
                    },
                );
                if !de.next_element(TokenKind::EndArray)? {
                    break;
                }
            }
        }

        de.complete(header);
        Ok(ParseResult::Value(value))
    }
}

impl<S: CharacterSource> ValueParser<S> for ArrayParser {
    fn name(&self) -> &'static str {
        "array"
    }

    fn can_parse(&self, kind: TokenKind, ty: &Type) -> bool {
        kind == TokenKind::BeginArray && matches!(ty, Type::Array { .. })
    }

    fn parse(
        &self,
        de: &mut Deserializer<'_, S>,
        ty: &Type,
        header: Option<&StructureHeader>,
    ) -> Result<ParseResult> {
        let header = structure(de, header)?;
        let Type::Array { element, rank } = ty else {
            return Err(mismatch(ty, header));
        };
        if *rank == 0 {
            return Err(Error::Config(format!("`{ty}` has no dimensions")));
        }

        let array = Rc::new(RefCell::new(MultiArray::new(*rank)));
        let value = Value::Array(array.clone());
        de.register(header, &value)?;

        if header.data_follows {
            let mut indices = vec![0; *rank];
            read_dimension(de, &array, element, 0, &mut indices)?;
        }

        if let Some(declared) = &header.lengths {
            let actual = array.borrow().lengths.clone();
            if *declared != actual {
                return Err(Error::document(
                    format!(
                        "array has lengths {actual:?} but its type declares \
                         {declared:?}"
                    ),
                    "[",
                    header.position,
                ));
            }
        }

        de.complete(header);
        Ok(ParseResult::Value(value))
    }
}

/// Reads the elements of dimension `dim`, the current token being the first
/// token inside its `[`. Leaves the current token on the closing `]`.
///
/// A dimension's length is fixed by its first row; later rows must match.
fn read_dimension<S: CharacterSource>(
    de: &mut Deserializer<'_, S>,
    array: &Shared<MultiArray>,
    element: &Type,
    dim: usize,
    indices: &mut [usize],
) -> Result<()> {
    let rank = indices.len();
    let mut count = 0;

    if de.kind() != TokenKind::EndArray {
        loop {
            indices[dim] = count;
            if dim + 1 < rank {
                de.expect(TokenKind::BeginArray, "a nested array row")?;
                de.enter()?;
                de.read_next()?;
                read_dimension(de, array, element, dim + 1, indices)?;
                de.leave();
            } else {
                let result = de.deserialize_current(element)?;
                array.borrow_mut().items.push(Value::Null);
                let slot = if rank == 1 {
                    Slot::ArrayIndex {
                        array: array.clone(),
                        index: count,
                    }
                } else {
                    Slot::MultiIndex {
                        array: array.clone(),
                        indices: indices.to_vec(),
                    }
                };
                de.store(result, slot);
            }
            count += 1;
            if !de.next_element(TokenKind::EndArray)? {
                break;
            }
        }
    }

    let first_row = indices[..dim].iter().all(|&index| index == 0);
    let mut shape = array.borrow_mut();
    if first_row {
        shape.lengths[dim] = count;
    } else if shape.lengths[dim] != count {
        return Err(de.document_error(format!(
            "array rows must all have {} elements, found {count}",
            shape.lengths[dim]
        )));
    }
    Ok(())
}

impl<S: CharacterSource> ValueParser<S> for DictionaryParser {
    fn name(&self) -> &'static str {
        "dictionary"
    }

    fn can_parse(&self, kind: TokenKind, ty: &Type) -> bool {
        let Type::Dictionary { key, .. } = ty else {
            return false;
        };
        kind == TokenKind::BeginObject
            && matches!(**key, Type::String | Type::Integer)
    }

    fn parse(
        &self,
        de: &mut Deserializer<'_, S>,
        ty: &Type,
        header: Option<&StructureHeader>,
    ) -> Result<ParseResult> {
        let header = structure(de, header)?;
        let Type::Dictionary {
            key: key_type,
            value: value_type,
        } = ty
        else {
            return Err(mismatch(ty, header));
        };

        let dictionary = Rc::new(RefCell::new(IndexMap::new()));
        let value = Value::Dictionary(dictionary.clone());
        de.register(header, &value)?;

        if header.data_follows {
            loop {
                let name = property_name(de)?;
                let key = if **key_type == Type::Integer {
                    DictKey::Integer(name.parse().map_err(|_| {
                        de.document_error("dictionary key is not an integer")
                    })?)
                } else {
                    DictKey::String(name)
                };
                if dictionary.borrow().contains_key(&key) {
                    return Err(de.document_error("duplicate property"));
                }

                enter_property_value(de)?;
                let result = de.deserialize_current(value_type)?;
                dictionary.borrow_mut().insert(key.clone(), Value::Null);
                de.store(
                    result,
                    Slot::DictionaryKey {
                        dictionary: dictionary.clone(),
                        key,
                    },
                );
                if !de.next_element(TokenKind::EndObject)? {
                    break;
                }
            }
        }

        de.complete(header);
        Ok(ParseResult::Value(value))
    }
}

impl<S: CharacterSource> ValueParser<S> for ObjectParser {
    fn name(&self) -> &'static str {
        "object"
    }

    fn can_parse(&self, kind: TokenKind, ty: &Type) -> bool {
        kind == TokenKind::BeginObject && matches!(ty, Type::Object(_))
    }

    fn parse(
        &self,
        de: &mut Deserializer<'_, S>,
        ty: &Type,
        header: Option<&StructureHeader>,
    ) -> Result<ParseResult> {
        let header = structure(de, header)?;
        let Type::Object(object_type) = ty else {
            return Err(mismatch(ty, header));
        };

        let object = Rc::new(RefCell::new(Object::new(object_type.clone())));
        let value = Value::Object(object.clone());
        de.register(header, &value)?;

        let mut seen = HashSet::new();
        if header.data_follows {
            loop {
                let name = property_name(de)?;
                if !seen.insert(name.clone()) {
                    return Err(de.document_error("duplicate property"));
                }

                match object_type.field(&name).cloned() {
                    Some(field_type) => {
                        enter_property_value(de)?;
                        let result = de.deserialize_current(&field_type)?;
                        de.store(result, Slot::ObjectField {
                            object: object.clone(),
                            field: name,
                        });
                    }
                    None if de.settings().deny_unknown_fields => {
                        return Err(de.document_error(format!(
                            "unknown field of `{}`",
                            object_type.name()
                        )));
                    }
                    None => {
                        trace!(
                            "skipping unknown field {name} of {}",
                            object_type.name()
                        );
                        enter_property_value(de)?;
                        de.skip_value()?;
                    }
                }

                if !de.next_element(TokenKind::EndObject)? {
                    break;
                }
            }
        }

        de.complete(header);
        Ok(ParseResult::Value(value))
    }
}

fn structure<'h, S: CharacterSource>(
    de: &Deserializer<'_, S>,
    header: Option<&'h StructureHeader>,
) -> Result<&'h StructureHeader> {
    header.ok_or_else(|| de.document_error("expected an object or array"))
}

fn mismatch(ty: &Type, header: &StructureHeader) -> Error {
    Error::Config(format!(
        "parser selected for `{ty}` cannot build it (structure at {})",
        header.position
    ))
}

/// Decodes the property name at the current token.
fn property_name<S: CharacterSource>(
    de: &Deserializer<'_, S>,
) -> Result<String> {
    if de.kind() != TokenKind::String {
        return Err(de.document_error("expected a property name"));
    }
    if de.at_metadata_key() {
        return Err(de.document_error("metadata key after data"));
    }
    de.token().unquoted()
}

/// Steps from a property name over `:` onto the property's value.
fn enter_property_value<S: CharacterSource>(
    de: &mut Deserializer<'_, S>,
) -> Result<()> {
    de.read_next()?;
    de.expect(TokenKind::PairDelimiter, "`:`")?;
    de.read_next()?;
    Ok(())
}

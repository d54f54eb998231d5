/*!
# Types

The host-side type model that `$type` metadata and requested types are
expressed in.

[`Type`] is a closed set of shapes: scalars, lists, multi-dimensional arrays,
dictionaries and named object types. Object types are described by an
[`ObjectType`] that lists its fields and, optionally, the type it extends;
a value of a derived type may be constructed wherever its base is requested.

Documents refer to types by name through `$type`. Those references are
parsed into a [`TypeDescriptor`] and turned into a [`Type`] by a
[`TypeRegistry`].
*/
pub mod registry;

use std::fmt::{self, Display};
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use indexmap::IndexMap;

// Re-exports
pub use registry::{ResolveError, TypeRegistry};

/// A type that a JSON value can be deserialized into.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Type {
    /// Whatever the document contains: objects become string-keyed
    /// dictionaries, arrays become lists.
    Any,
    /// `true` or `false`
    Bool,
    /// 64-bit signed integer
    Integer,
    /// 64-bit float
    Float,
    /// UTF-8 string
    String,
    /// Growable list
    List(Box<Type>),
    /// Fixed-shape array of the given rank, nested JSON arrays per dimension
    Array {
        /// Element type
        element: Box<Type>,
        /// Number of dimensions, at least one
        rank: usize,
    },
    /// Map from keys (JSON property names) to values
    Dictionary {
        /// Key type, either [`Type::String`] or [`Type::Integer`]
        key: Box<Type>,
        /// Value type
        value: Box<Type>,
    },
    /// A named record type
    Object(Arc<ObjectType>),
    /// A type referred to by its registry name, looked up when used. Lets
    /// object types refer to themselves.
    Named(String),
}

impl Type {
    /// `List<element>`
    #[must_use]
    pub fn list(element: Self) -> Self {
        Self::List(Box::new(element))
    }

    /// `element[]` with `rank` dimensions
    #[must_use]
    pub fn array(element: Self, rank: usize) -> Self {
        Self::Array {
            element: Box::new(element),
            rank,
        }
    }

    /// `Dictionary<key, value>`
    #[must_use]
    pub fn dictionary(key: Self, value: Self) -> Self {
        Self::Dictionary {
            key: Box::new(key),
            value: Box::new(value),
        }
    }

    /// A lazily resolved reference to a registered type.
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self::Named(name.into())
    }

    /// Whether a value of this type may be used where `target` is requested.
    #[must_use]
    pub fn is_assignable_to(&self, target: &Self) -> bool {
        match (self, target) {
            (_, Self::Any) => true,
            (Self::Object(derived), Self::Object(base)) => {
                derived.extends(base)
            }
            (a, b) => a == b,
        }
    }
}

impl Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => write!(f, "any"),
            Self::Bool => write!(f, "bool"),
            Self::Integer => write!(f, "int"),
            Self::Float => write!(f, "float"),
            Self::String => write!(f, "string"),
            Self::List(element) => write!(f, "List<{element}>"),
            Self::Array { element, rank } => {
                write!(f, "{element}[{}]", ",".repeat(rank.saturating_sub(1)))
            }
            Self::Dictionary { key, value } => {
                write!(f, "Dictionary<{key}, {value}>")
            }
            Self::Object(object) => write!(f, "{}", object.name()),
            Self::Named(name) => write!(f, "{name}"),
        }
    }
}

/// Describes a named record type: its fields and the type it extends.
///
/// Two object types are equal when their names are equal; names are unique
/// within a [`TypeRegistry`].
#[derive(Debug)]
pub struct ObjectType {
    name: String,
    fields: IndexMap<String, Type>,
    base: Option<Arc<ObjectType>>,
}

impl ObjectType {
    /// Starts describing an object type called `name`.
    #[must_use]
    pub fn builder(name: impl Into<String>) -> ObjectTypeBuilder {
        ObjectTypeBuilder {
            name: name.into(),
            fields: IndexMap::new(),
            base: None,
        }
    }

    /// The type's name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The type this one extends, if any.
    #[must_use]
    pub const fn base(&self) -> Option<&Arc<Self>> {
        self.base.as_ref()
    }

    /// Looks up a field declared on this type or any of its bases.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&Type> {
        self.fields
            .get(name)
            .or_else(|| self.base.as_ref().and_then(|base| base.field(name)))
    }

    /// All fields, base fields first.
    #[must_use]
    pub fn fields(&self) -> Vec<(&str, &Type)> {
        let mut all = self
            .base
            .as_ref()
            .map(|base| base.fields())
            .unwrap_or_default();
        all.extend(self.fields.iter().map(|(name, ty)| (name.as_str(), ty)));
        all
    }

    /// Whether this type is `other` or derives from it.
    #[must_use]
    pub fn extends(&self, other: &Self) -> bool {
        self == other
            || self.base.as_ref().is_some_and(|base| base.extends(other))
    }
}

impl PartialEq for ObjectType {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for ObjectType {}

impl Hash for ObjectType {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

/// Builder for [`ObjectType`].
#[derive(Debug)]
pub struct ObjectTypeBuilder {
    name: String,
    fields: IndexMap<String, Type>,
    base: Option<Arc<ObjectType>>,
}

impl ObjectTypeBuilder {
    /// Declares a field.
    #[must_use]
    pub fn field(mut self, name: impl Into<String>, ty: Type) -> Self {
        self.fields.insert(name.into(), ty);
        self
    }

    /// Makes the type extend `base`.
    #[must_use]
    pub fn extends(mut self, base: Arc<ObjectType>) -> Self {
        self.base = Some(base);
        self
    }

    /// Finishes the description.
    #[must_use]
    pub fn build(self) -> Arc<ObjectType> {
        Arc::new(ObjectType {
            name: self.name,
            fields: self.fields,
            base: self.base,
        })
    }
}

/// A `$type` value as written in the document, before name resolution.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeDescriptor {
    /// `"Person"`
    Named(String),
    /// `{"name": "List", "typeArguments": ["int"]}`
    Generic {
        /// Name of the generic definition
        name: String,
        /// Type arguments, in order
        arguments: Vec<TypeDescriptor>,
    },
    /// `{"arrayType": "int", "arrayRank": 2, "arrayLength": [2, 3]}`
    Array {
        /// Element type
        element: Box<TypeDescriptor>,
        /// Number of dimensions
        rank: usize,
        /// Declared length of each dimension, when given
        lengths: Option<Vec<usize>>,
    },
}

impl Display for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Named(name) => write!(f, "{name}"),
            Self::Generic { name, arguments } => {
                write!(f, "{name}<")?;
                for (i, argument) in arguments.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{argument}")?;
                }
                write!(f, ">")
            }
            Self::Array { element, rank, .. } => {
                write!(f, "{element}[{}]", ",".repeat(rank.saturating_sub(1)))
            }
        }
    }
}

/*!
# Values

The object graph a document deserializes into.

Scalars are plain values. Aggregates (lists, arrays, dictionaries, objects)
live behind [`Shared`] pointers, so the same aggregate can be reachable from
several places and [`Value::ptr_eq`] tells whether two values are the same
object. That is what `$id`/`$ref` preserve.

Graphs with cycles are `Rc` cycles: they are not freed when the last outside
handle is dropped.
*/
use std::cell::RefCell;
use std::collections::HashSet;
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

use indexmap::IndexMap;

use crate::types::ObjectType;

/// Shared, mutable aggregate storage.
pub type Shared<T> = Rc<RefCell<T>>;

fn address<T>(shared: &Shared<T>) -> usize {
    Rc::as_ptr(shared).cast::<()>() as usize
}

/// Key of a dictionary entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DictKey {
    /// Property name used as-is
    String(String),
    /// Property name parsed as an integer
    Integer(i64),
}

impl fmt::Display for DictKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(key) => write!(f, "{key}"),
            Self::Integer(key) => write!(f, "{key}"),
        }
    }
}

impl From<&str> for DictKey {
    fn from(key: &str) -> Self {
        Self::String(key.to_owned())
    }
}

impl From<i64> for DictKey {
    fn from(key: i64) -> Self {
        Self::Integer(key)
    }
}

/// Dictionary storage, in document order.
pub type Dictionary = IndexMap<DictKey, Value>;

/// A rectangular array of one or more dimensions, stored row-major.
#[derive(Clone, Default)]
pub struct MultiArray {
    /// Length of each dimension.
    pub lengths: Vec<usize>,
    /// Elements in row-major order.
    pub items: Vec<Value>,
}

impl MultiArray {
    /// Creates an empty array with `rank` dimensions of length zero.
    #[must_use]
    pub fn new(rank: usize) -> Self {
        Self {
            lengths: vec![0; rank],
            items: Vec::new(),
        }
    }

    /// Number of dimensions.
    #[must_use]
    pub fn rank(&self) -> usize {
        self.lengths.len()
    }

    /// Row-major position of `indices`.
    ///
    /// Only the lengths of dimensions after a non-zero index take part, so
    /// this is already correct while later rows are still being read.
    #[must_use]
    pub fn flat_index(&self, indices: &[usize]) -> usize {
        indices
            .iter()
            .enumerate()
            .map(|(dim, &index)| {
                if index == 0 {
                    0
                } else {
                    index * self.lengths[dim + 1..].iter().product::<usize>()
                }
            })
            .sum()
    }

    /// Element at `indices`, if in bounds.
    #[must_use]
    pub fn get(&self, indices: &[usize]) -> Option<&Value> {
        if indices.len() != self.rank()
            || indices
                .iter()
                .zip(&self.lengths)
                .any(|(index, len)| index >= len)
        {
            return None;
        }
        self.items.get(self.flat_index(indices))
    }
}

/// An instance of an [`ObjectType`].
#[derive(Clone)]
pub struct Object {
    ty: Arc<ObjectType>,
    fields: IndexMap<String, Value>,
}

impl Object {
    /// Creates an instance with every declared field set to [`Value::Null`].
    #[must_use]
    pub fn new(ty: Arc<ObjectType>) -> Self {
        let fields = ty
            .fields()
            .into_iter()
            .map(|(name, _)| (name.to_owned(), Value::Null))
            .collect();
        Self { ty, fields }
    }

    /// The object's runtime type.
    #[must_use]
    pub const fn object_type(&self) -> &Arc<ObjectType> {
        &self.ty
    }

    /// Value of a field.
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Sets a field, returning `false` if the type does not declare it.
    pub fn set(&mut self, field: &str, value: Value) -> bool {
        match self.fields.get_mut(field) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }

    /// Fields in declaration order, base fields first.
    pub fn fields(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(name, value)| (name.as_str(), value))
    }
}

/// A deserialized value.
#[derive(Clone, Default)]
pub enum Value {
    /// `null`
    #[default]
    Null,
    /// `true` / `false`
    Bool(bool),
    /// An integer
    Integer(i64),
    /// A floating-point number
    Float(f64),
    /// A string
    String(String),
    /// A growable list
    List(Shared<Vec<Value>>),
    /// A fixed-shape array
    Array(Shared<MultiArray>),
    /// A dictionary
    Dictionary(Shared<Dictionary>),
    /// An object of a registered type
    Object(Shared<Object>),
}

impl Value {
    /// Wraps a vector in a new list.
    #[must_use]
    pub fn new_list(items: Vec<Self>) -> Self {
        Self::List(Rc::new(RefCell::new(items)))
    }

    /// Creates a new, empty dictionary.
    #[must_use]
    pub fn new_dictionary() -> Self {
        Self::Dictionary(Rc::new(RefCell::new(IndexMap::new())))
    }

    /// Whether both values are the same aggregate. Scalars never are.
    #[must_use]
    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        match (a.identity(), b.identity()) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    }

    /// Address of the aggregate behind this value, `None` for scalars.
    #[must_use]
    pub fn identity(&self) -> Option<usize> {
        match self {
            Self::List(list) => Some(address(list)),
            Self::Array(array) => Some(address(array)),
            Self::Dictionary(dict) => Some(address(dict)),
            Self::Object(object) => Some(address(object)),
            _ => None,
        }
    }

    /// Returns `true` for [`Value::Null`].
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// The integer, if this is one.
    #[must_use]
    pub const fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(value) => Some(*value),
            _ => None,
        }
    }

    /// The number, if this is an integer or float.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Integer(value) => Some(*value as f64),
            Self::Float(value) => Some(*value),
            _ => None,
        }
    }

    /// The string, if this is one.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(value) => Some(value),
            _ => None,
        }
    }

    /// The boolean, if this is one.
    #[must_use]
    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(value) => Some(*value),
            _ => None,
        }
    }

    /// Field of an object or string-keyed entry of a dictionary.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Self> {
        match self {
            Self::Object(object) => object.borrow().get(key).cloned(),
            Self::Dictionary(dict) => {
                dict.borrow().get(&DictKey::from(key)).cloned()
            }
            _ => None,
        }
    }

    /// Element of a list, or of a one-dimensional array.
    #[must_use]
    pub fn at(&self, index: usize) -> Option<Self> {
        match self {
            Self::List(list) => list.borrow().get(index).cloned(),
            Self::Array(array) => array.borrow().get(&[index]).cloned(),
            _ => None,
        }
    }

    /// Number of elements or entries of an aggregate.
    #[must_use]
    pub fn len(&self) -> Option<usize> {
        match self {
            Self::List(list) => Some(list.borrow().len()),
            Self::Array(array) => Some(array.borrow().items.len()),
            Self::Dictionary(dict) => Some(dict.borrow().len()),
            Self::Object(object) => Some(object.borrow().fields.len()),
            _ => None,
        }
    }

    /// Short name of the value's kind.
    #[must_use]
    pub fn kind_name(&self) -> String {
        match self {
            Self::Null => "null".into(),
            Self::Bool(_) => "bool".into(),
            Self::Integer(_) => "int".into(),
            Self::Float(_) => "float".into(),
            Self::String(_) => "string".into(),
            Self::List(_) => "List".into(),
            Self::Array(array) => {
                let commas = array.borrow().rank().saturating_sub(1);
                format!("array[{}]", ",".repeat(commas))
            }
            Self::Dictionary(_) => "Dictionary".into(),
            Self::Object(object) => {
                object.borrow().object_type().name().to_owned()
            }
        }
    }

    fn fmt_graph(
        &self,
        f: &mut fmt::Formatter<'_>,
        open: &mut HashSet<usize>,
    ) -> fmt::Result {
        if let Some(identity) = self.identity()
            && !open.insert(identity)
        {
            return write!(f, "<cycle {}>", self.kind_name());
        }
        match self {
            Self::Null => write!(f, "Null")?,
            Self::Bool(value) => write!(f, "{value}")?,
            Self::Integer(value) => write!(f, "{value}")?,
            Self::Float(value) => write!(f, "{value:?}")?,
            Self::String(value) => write!(f, "{value:?}")?,
            Self::List(list) => {
                write!(f, "[")?;
                for (i, item) in list.borrow().iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    item.fmt_graph(f, open)?;
                }
                write!(f, "]")?;
            }
            Self::Array(array) => {
                let array = array.borrow();
                write!(f, "{:?}[", array.lengths)?;
                for (i, item) in array.items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    item.fmt_graph(f, open)?;
                }
                write!(f, "]")?;
            }
            Self::Dictionary(dict) => {
                write!(f, "{{")?;
                for (i, (key, value)) in dict.borrow().iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{key:?}: ")?;
                    value.fmt_graph(f, open)?;
                }
                write!(f, "}}")?;
            }
            Self::Object(object) => {
                let object = object.borrow();
                write!(f, "{} {{", object.object_type().name())?;
                for (i, (name, value)) in object.fields().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, " {name}: ")?;
                    value.fmt_graph(f, open)?;
                }
                write!(f, " }}")?;
            }
        }
        if let Some(identity) = self.identity() {
            open.remove(&identity);
        }
        Ok(())
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fmt_graph(f, &mut HashSet::new())
    }
}

impl fmt::Debug for MultiArray {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MultiArray")
            .field("lengths", &self.lengths)
            .field("len", &self.items.len())
            .finish()
    }
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Object")
            .field("type", &self.ty.name())
            .field("fields", &self.fields.keys().collect::<Vec<_>>())
            .finish()
    }
}

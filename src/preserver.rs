/*!
# Object Reference Preserver

Per-call registry behind `$id`/`$ref`.

It maps document ids to the aggregates already materialized for them, and
keeps the [`DeferredReference`]s waiting for ids that are not materialized
yet: forward references and cycles. Resolution is explicit: whoever finishes
materializing the aggregate with id `X` calls
[`ObjectReferencePreserver::resolve`], which runs every installer waiting
for `X`, in registration order, and drops them.

A preserver lives for exactly one deserialization call and is not shared
between threads.
*/
use std::collections::HashMap;
use std::fmt;
use std::mem;

use log::debug;

use crate::value::{DictKey, Dictionary, MultiArray, Object, Shared, Value};

/// Document-scoped identity declared by `$id`.
pub type ReferenceId = i64;

/// Where a deferred value must be installed once it exists.
pub enum Slot {
    /// Element of a one-dimensional array
    ArrayIndex {
        /// Target array
        array: Shared<MultiArray>,
        /// Element index
        index: usize,
    },
    /// Element of a multi-dimensional array
    MultiIndex {
        /// Target array
        array: Shared<MultiArray>,
        /// Index along each dimension
        indices: Vec<usize>,
    },
    /// Element of a list, at the position it was appended
    ListIndex {
        /// Target list
        list: Shared<Vec<Value>>,
        /// Element index
        index: usize,
    },
    /// Entry of a dictionary
    DictionaryKey {
        /// Target dictionary
        dictionary: Shared<Dictionary>,
        /// Entry key
        key: DictKey,
    },
    /// Field of an object
    ObjectField {
        /// Target object
        object: Shared<Object>,
        /// Field name
        field: String,
    },
    /// Anything else, e.g. a slot owned by a custom value parser
    Custom(Box<dyn FnOnce(Value)>),
}

impl Slot {
    /// Stores `value` in the slot.
    pub fn install(self, value: Value) {
        match self {
            Self::ArrayIndex { array, index } => {
                if let Some(item) = array.borrow_mut().items.get_mut(index) {
                    *item = value;
                }
            }
            Self::MultiIndex { array, indices } => {
                let mut array = array.borrow_mut();
                let flat = array.flat_index(&indices);
                if let Some(item) = array.items.get_mut(flat) {
                    *item = value;
                }
            }
            Self::ListIndex { list, index } => {
                if let Some(item) = list.borrow_mut().get_mut(index) {
                    *item = value;
                }
            }
            Self::DictionaryKey { dictionary, key } => {
                dictionary.borrow_mut().insert(key, value);
            }
            Self::ObjectField { object, field } => {
                object.borrow_mut().set(&field, value);
            }
            Self::Custom(install) => install(value),
        }
    }
}

impl fmt::Debug for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ArrayIndex { index, .. } => write!(f, "ArrayIndex({index})"),
            Self::MultiIndex { indices, .. } => {
                write!(f, "MultiIndex({indices:?})")
            }
            Self::ListIndex { index, .. } => write!(f, "ListIndex({index})"),
            Self::DictionaryKey { key, .. } => {
                write!(f, "DictionaryKey({key:?})")
            }
            Self::ObjectField { field, .. } => {
                write!(f, "ObjectField({field:?})")
            }
            Self::Custom(_) => write!(f, "Custom"),
        }
    }
}

/// A pending installation of the aggregate with id `target` into a slot.
#[derive(Debug)]
pub struct DeferredReference {
    target: ReferenceId,
    slot: Slot,
}

impl DeferredReference {
    /// Creates a deferred reference to `target`.
    #[must_use]
    pub const fn new(target: ReferenceId, slot: Slot) -> Self {
        Self { target, slot }
    }

    /// The id this reference waits for.
    #[must_use]
    pub const fn target(&self) -> ReferenceId {
        self.target
    }

    /// Installs `value` and consumes the reference.
    pub fn apply(self, value: Value) {
        self.slot.install(value);
    }
}

/// `$id` was declared twice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DuplicateId(pub ReferenceId);

impl fmt::Display for DuplicateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "duplicate id {}", self.0)
    }
}

impl std::error::Error for DuplicateId {}

/// Registry of materialized aggregates and pending deferred references for
/// one deserialization call.
#[derive(Debug, Default)]
pub struct ObjectReferencePreserver {
    materialized: HashMap<ReferenceId, Value>,
    pending: HashMap<ReferenceId, Vec<DeferredReference>>,
}

impl ObjectReferencePreserver {
    /// Creates an empty preserver.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that `id` names `value`.
    ///
    /// # Errors
    ///
    /// Fails if `id` is already registered.
    pub fn register_materialized(
        &mut self,
        id: ReferenceId,
        value: Value,
    ) -> Result<(), DuplicateId> {
        if self.materialized.contains_key(&id) {
            return Err(DuplicateId(id));
        }
        debug!("materialized ${id} as {}", value.kind_name());
        self.materialized.insert(id, value);
        Ok(())
    }

    /// The aggregate registered under `id`, if any.
    #[must_use]
    pub fn try_get_materialized(&self, id: ReferenceId) -> Option<&Value> {
        self.materialized.get(&id)
    }

    /// Queues an installer until its target is resolved.
    pub fn register_deferred(&mut self, deferred: DeferredReference) {
        debug!(
            "deferring {:?} until ${} is materialized",
            deferred.slot, deferred.target
        );
        self.pending.entry(deferred.target).or_default().push(deferred);
    }

    /// Runs and discards every installer waiting for `id`, returning how many
    /// ran. Does nothing while `id` is not materialized.
    pub fn resolve(&mut self, id: ReferenceId) -> usize {
        let Some(value) = self.materialized.get(&id).cloned() else {
            return 0;
        };
        let Some(waiting) = self.pending.remove(&id) else {
            return 0;
        };
        let count = waiting.len();
        for deferred in waiting {
            deferred.apply(value.clone());
        }
        debug!("resolved {count} deferred reference(s) to ${id}");
        count
    }

    /// Number of installers still waiting.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.values().map(Vec::len).sum()
    }

    /// Ids that installers are still waiting for, sorted.
    #[must_use]
    pub fn unresolved_ids(&self) -> Vec<ReferenceId> {
        let mut ids: Vec<ReferenceId> = self.pending.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Drops all state, returning the ids that were never resolved.
    pub fn finish(&mut self) -> Vec<ReferenceId> {
        let unresolved = self.unresolved_ids();
        self.materialized.clear();
        // installers hold the aggregates they write into
        drop(mem::take(&mut self.pending));
        unresolved
    }
}

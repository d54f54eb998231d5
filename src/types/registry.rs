//! Name → type registry.
//!
//! Maps the domain-friendly names used in `$type` to [`Type`]s, and generic
//! definition names (`List`, `Dictionary`, ...) to factories that build a
//! concrete type from its type arguments. Resolved generic instantiations are
//! cached.
//!
//! A registry is meant to be built once and shared, possibly across threads,
//! by many deserialization calls; every method takes `&self` and the maps are
//! guarded by read-write locks.
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use log::debug;
use parking_lot::RwLock;

use crate::types::{ObjectType, Type, TypeDescriptor};

/// Longest chain of aliases followed before giving up.
const MAX_ALIAS_HOPS: usize = 32;

/// Builds a concrete type from type arguments.
pub type GenericFactory = Arc<dyn Fn(&[Type]) -> Type + Send + Sync>;

struct GenericDefinition {
    arity: usize,
    build: GenericFactory,
}

/// Why a [`TypeDescriptor`] could not be resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    /// No type or generic definition is registered under this name.
    UnknownType(String),
    /// A generic definition was given the wrong number of type arguments.
    ArityMismatch {
        /// Generic definition name
        name: String,
        /// Number of parameters it declares
        expected: usize,
        /// Number of arguments supplied
        found: usize,
    },
    /// A generic definition was used without type arguments.
    MissingTypeArguments(String),
    /// An array's declared lengths do not match its rank.
    RankMismatch {
        /// Declared rank
        rank: usize,
        /// Number of lengths supplied
        lengths: usize,
    },
}

impl fmt::Display for ResolveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownType(name) => write!(f, "unknown type `{name}`"),
            Self::ArityMismatch {
                name,
                expected,
                found,
            } => write!(
                f,
                "`{name}` takes {expected} type argument(s) \
                 but {found} were given"
            ),
            Self::MissingTypeArguments(name) => {
                write!(f, "generic type `{name}` used without type arguments")
            }
            Self::RankMismatch { rank, lengths } => write!(
                f,
                "array of rank {rank} declares {lengths} dimension length(s)"
            ),
        }
    }
}

impl std::error::Error for ResolveError {}

/// Thread-safe registry of named and generic types.
pub struct TypeRegistry {
    named: RwLock<HashMap<String, Type>>,
    generics: RwLock<HashMap<String, GenericDefinition>>,
    instantiations: RwLock<HashMap<(String, Vec<Type>), Type>>,
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TypeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<String> =
            self.named.read().keys().cloned().collect();
        names.sort();
        let mut generics: Vec<String> =
            self.generics.read().keys().cloned().collect();
        generics.sort();
        f.debug_struct("TypeRegistry")
            .field("named", &names)
            .field("generics", &generics)
            .finish_non_exhaustive()
    }
}

impl TypeRegistry {
    /// Creates a registry knowing the built-in names: `bool`, `int`, `float`,
    /// `string`, `object`, and the generics `List<T>` and
    /// `Dictionary<K, V>`.
    #[must_use]
    pub fn new() -> Self {
        let registry = Self::empty();
        registry.register("bool", Type::Bool);
        registry.register("int", Type::Integer);
        registry.register("float", Type::Float);
        registry.register("string", Type::String);
        registry.register("object", Type::Any);
        registry
            .register_generic("List", 1, |args| Type::list(args[0].clone()));
        registry.register_generic("Dictionary", 2, |args| {
            Type::dictionary(args[0].clone(), args[1].clone())
        });
        registry
    }

    /// Creates a registry with no names at all.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            named: RwLock::new(HashMap::new()),
            generics: RwLock::new(HashMap::new()),
            instantiations: RwLock::new(HashMap::new()),
        }
    }

    /// Registers `ty` under `name`, replacing any previous registration.
    pub fn register(&self, name: impl Into<String>, ty: Type) {
        self.named.write().insert(name.into(), ty);
    }

    /// Registers an object type under its own name.
    pub fn register_object(&self, object: Arc<ObjectType>) {
        self.register(object.name().to_owned(), Type::Object(object));
    }

    /// Registers a generic definition taking `arity` type arguments.
    pub fn register_generic<F>(
        &self,
        name: impl Into<String>,
        arity: usize,
        build: F,
    ) where
        F: Fn(&[Type]) -> Type + Send + Sync + 'static,
    {
        let name = name.into();
        self.instantiations.write().retain(|(generic, _), _| *generic != name);
        self.generics.write().insert(
            name,
            GenericDefinition {
                arity,
                build: Arc::new(build),
            },
        );
    }

    /// Looks up a non-generic name.
    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<Type> {
        self.named.read().get(name).cloned()
    }

    /// Replaces [`Type::Named`] by the type registered under that name. Other
    /// types are returned unchanged.
    ///
    /// # Errors
    ///
    /// Fails with [`ResolveError::UnknownType`] for unregistered names.
    pub fn resolve_type(&self, ty: &Type) -> Result<Type, ResolveError> {
        let mut current = ty.clone();
        // a name may be an alias of another name
        for _ in 0..MAX_ALIAS_HOPS {
            let Type::Named(name) = &current else {
                return Ok(current);
            };
            current = self
                .lookup(name)
                .ok_or_else(|| ResolveError::UnknownType(name.clone()))?;
        }
        Err(ResolveError::UnknownType(ty.to_string()))
    }

    /// Like [`TypeRegistry::resolve_type`], but also replaces the names
    /// nested in list, array and dictionary types. Object field types stay
    /// lazy.
    ///
    /// # Errors
    ///
    /// Fails with [`ResolveError::UnknownType`] for unregistered names.
    pub fn resolve_deep(&self, ty: &Type) -> Result<Type, ResolveError> {
        Ok(match self.resolve_type(ty)? {
            Type::List(element) => Type::list(self.resolve_deep(&element)?),
            Type::Array { element, rank } => {
                Type::array(self.resolve_deep(&element)?, rank)
            }
            Type::Dictionary { key, value } => Type::dictionary(
                self.resolve_deep(&key)?,
                self.resolve_deep(&value)?,
            ),
            other => other,
        })
    }

    /// Turns a `$type` descriptor into a type, resolving nested arguments
    /// first.
    ///
    /// # Errors
    ///
    /// Fails for unknown names, generic arity mismatches and arrays whose
    /// declared lengths do not match their rank.
    pub fn resolve(
        &self,
        descriptor: &TypeDescriptor,
    ) -> Result<Type, ResolveError> {
        match descriptor {
            TypeDescriptor::Named(name) => {
                if let Some(ty) = self.lookup(name) {
                    return self.resolve_deep(&ty);
                }
                if self.generics.read().contains_key(name) {
                    return Err(ResolveError::MissingTypeArguments(
                        name.clone(),
                    ));
                }
                Err(ResolveError::UnknownType(name.clone()))
            }
            TypeDescriptor::Generic { name, arguments } => {
                let arguments = arguments
                    .iter()
                    .map(|argument| self.resolve(argument))
                    .collect::<Result<Vec<_>, _>>()?;
                self.instantiate(name, arguments)
            }
            TypeDescriptor::Array {
                element,
                rank,
                lengths,
            } => {
                if let Some(lengths) = lengths
                    && lengths.len() != *rank
                {
                    return Err(ResolveError::RankMismatch {
                        rank: *rank,
                        lengths: lengths.len(),
                    });
                }
                Ok(Type::array(self.resolve(element)?, *rank))
            }
        }
    }

    /// Builds `name<arguments>` through its factory, memoized.
    ///
    /// # Errors
    ///
    /// Fails for unknown generic names and arity mismatches.
    pub fn instantiate(
        &self,
        name: &str,
        arguments: Vec<Type>,
    ) -> Result<Type, ResolveError> {
        let key = (name.to_owned(), arguments);
        if let Some(ty) = self.instantiations.read().get(&key) {
            return Ok(ty.clone());
        }

        let build = {
            let generics = self.generics.read();
            let definition = generics
                .get(name)
                .ok_or_else(|| ResolveError::UnknownType(name.to_owned()))?;
            if definition.arity != key.1.len() {
                return Err(ResolveError::ArityMismatch {
                    name: name.to_owned(),
                    expected: definition.arity,
                    found: key.1.len(),
                });
            }
            definition.build.clone()
        };

        let ty = (*build)(&key.1);
        debug!("instantiated generic type {name} as {ty}");
        self.instantiations.write().insert(key, ty.clone());
        Ok(ty)
    }
}

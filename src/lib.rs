/*!
# `jsonrefs` Library

Streaming JSON deserialization into object graphs that keep their shape.

Documents may carry `$id`, `$ref` and `$type` metadata. Aggregates declared
with an `$id` and pointed at by a `$ref` come out as *one* shared aggregate,
cycles included, and `$type` picks the concrete (possibly derived or generic)
type to build.

The pieces, bottom-up:

- [`source`]: where bytes come from, either a slice or a pinned ring buffer
  over any [`std::io::Read`].
- [`tokenizer`]: zero-copy JSON tokens over a source.
- [`types`]: the types values are built as, and the registry that resolves
  `$type` names.
- [`metadata`] and [`preserver`]: `$id`/`$ref`/`$type` handling.
- [`de`]: the deserializer and its pluggable value parsers.
*/

pub mod config;
pub mod de;
pub mod error;
pub mod metadata;
pub mod preserver;
pub mod render;
pub mod source;
pub mod tokenizer;
pub mod types;
pub mod value;

// Re-exports
pub use config::Settings;
pub use de::{from_reader, from_slice, from_str};
pub use error::{Error, Result};
pub use types::{ObjectType, Type, TypeRegistry};
pub use value::Value;

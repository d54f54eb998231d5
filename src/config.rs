/*!
# Configuration

Knobs of a deserialization call. Both structs (de)serialize with `serde`, so
they can be loaded from a JSON settings file; missing entries take their
defaults.

```rust
use jsonrefs::config::Settings;

let settings =
    Settings::from_json(r#"{"metadata": {"id": "@id"}, "buffer_size": 64}"#)
        .expect("valid settings");
assert_eq!(settings.metadata.id, "@id");
assert_eq!(settings.metadata.reference, "$ref");
```
*/
use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::source::{DEFAULT_BUFFER_SIZE, MIN_BUFFER_SIZE};

/// Spellings of the reserved metadata keys and type-descriptor members.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetadataKeys {
    /// Declares a value's identity (`$id`).
    pub id: String,
    /// Points at a value declared elsewhere (`$ref`).
    #[serde(rename = "ref")]
    pub reference: String,
    /// Names the runtime type (`$type`).
    #[serde(rename = "type")]
    pub type_: String,
    /// Name member of an object type descriptor.
    pub name: String,
    /// Type arguments member of a generic type descriptor.
    pub type_arguments: String,
    /// Element type member of an array type descriptor.
    pub array_type: String,
    /// Rank member of an array type descriptor.
    pub array_rank: String,
    /// Length(s) member of an array type descriptor.
    pub array_length: String,
    /// Value of `name` that marks an array type descriptor.
    pub array_name: String,
}

impl Default for MetadataKeys {
    fn default() -> Self {
        Self {
            id: "$id".into(),
            reference: "$ref".into(),
            type_: "$type".into(),
            name: "name".into(),
            type_arguments: "typeArguments".into(),
            array_type: "arrayType".into(),
            array_rank: "arrayRank".into(),
            array_length: "arrayLength".into(),
            array_name: "array".into(),
        }
    }
}

impl MetadataKeys {
    fn validate(&self) -> Result<(), Error> {
        let reserved = [&self.id, &self.reference, &self.type_];
        for key in reserved {
            // keys are compared against the raw, still escaped, string body
            if key.is_empty() || key.contains(['"', '\\']) {
                return Err(Error::Config(format!(
                    "metadata key {key:?} must be non-empty and contain \
                     no quotes or backslashes"
                )));
            }
        }
        if self.id == self.reference
            || self.id == self.type_
            || self.reference == self.type_
        {
            return Err(Error::Config(
                "metadata keys for id, ref and type must be distinct".into(),
            ));
        }
        Ok(())
    }
}

/// Settings of a deserialization call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Reserved key spellings.
    pub metadata: MetadataKeys,
    /// Ring buffer size used when reading from a stream.
    pub buffer_size: usize,
    /// Deepest allowed nesting of objects and arrays. Each level recurses,
    /// so the default of 128 stays within a 2 MiB thread stack.
    pub max_depth: usize,
    /// Reject object properties that the object type does not declare,
    /// instead of skipping them.
    pub deny_unknown_fields: bool,
    /// Memoize which value parser handles a (token kind, type) pair.
    pub cache_parsers: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            metadata: MetadataKeys::default(),
            buffer_size: DEFAULT_BUFFER_SIZE,
            max_depth: 128,
            deny_unknown_fields: false,
            cache_parsers: true,
        }
    }
}

impl Settings {
    /// Parses settings from JSON text and validates them.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the text is not valid settings JSON or the
    /// settings are inconsistent.
    pub fn from_json(text: &str) -> Result<Self, Error> {
        let settings: Self = serde_json::from_str(text)
            .map_err(|err| Error::Config(format!("invalid settings: {err}")))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Checks that the settings can be used.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] describing the first problem found.
    pub fn validate(&self) -> Result<(), Error> {
        if self.buffer_size < MIN_BUFFER_SIZE {
            return Err(Error::Config(format!(
                "buffer_size must be at least {MIN_BUFFER_SIZE}, got {}",
                self.buffer_size
            )));
        }
        if self.max_depth == 0 {
            return Err(Error::Config("max_depth must be positive".into()));
        }
        self.metadata.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_round_trip_through_json() {
        let settings = Settings::default();
        let text = serde_json::to_string(&settings).unwrap();
        assert!(text.contains(r#""ref":"$ref""#));
        assert_eq!(Settings::from_json(&text).unwrap(), settings);
    }

    #[test]
    fn missing_entries_take_defaults() {
        let settings = Settings::from_json(r#"{"max_depth": 8}"#).unwrap();
        assert_eq!(settings.max_depth, 8);
        assert_eq!(settings.buffer_size, DEFAULT_BUFFER_SIZE);
        assert_eq!(settings.metadata.type_, "$type");
    }

    #[test]
    fn rejects_bad_settings() {
        for text in [
            r#"{"buffer_size": 4}"#,
            r#"{"max_depth": 0}"#,
            r#"{"metadata": {"id": ""}}"#,
            r#"{"metadata": {"ref": "$id"}}"#,
            r#"{"metadata": {"type": "a\"b"}}"#,
            r#"{"buffer_size": "big"}"#,
        ] {
            assert!(
                matches!(Settings::from_json(text), Err(Error::Config(_))),
                "{text}"
            );
        }
    }
}

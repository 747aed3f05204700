//! Payload schema registry.
//!
//! Each `(event_type, schema_version)` pair maps to a validator. Typed
//! payloads register a Rust type that deserializes with
//! `#[serde(deny_unknown_fields)]`; event types defined at runtime register a
//! [`JsonObjectSchema`] instead. Both reject fields they do not declare.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::BusError;
use crate::stream::validate_event_type;

/// Validates an event payload.
pub trait PayloadValidator: Send + Sync {
    /// Returns `Err(reason)` if `payload` does not conform.
    ///
    /// # Errors
    ///
    /// Returns a human-readable reason on mismatch.
    fn validate(&self, payload: &Value) -> Result<(), String>;
}

/// Validator backed by a Rust type.
pub struct TypedValidator<T>(PhantomData<fn() -> T>);

impl<T> TypedValidator<T> {
    /// Creates the validator.
    #[must_use]
    pub fn new() -> Self {
        Self(PhantomData)
    }
}

impl<T> Default for TypedValidator<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: DeserializeOwned> PayloadValidator for TypedValidator<T> {
    fn validate(&self, payload: &Value) -> Result<(), String> {
        T::deserialize(payload)
            .map(|_| ())
            .map_err(|e| e.to_string())
    }
}

/// Primitive kinds a [`JsonObjectSchema`] field may take.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    /// JSON string.
    String,
    /// JSON number without a fractional part.
    Integer,
    /// Any JSON number.
    Number,
    /// JSON boolean.
    Boolean,
    /// JSON object (contents unchecked).
    Object,
    /// JSON array (contents unchecked).
    Array,
    /// String holding a UUID.
    Uuid,
    /// String holding an RFC 3339 timestamp.
    Timestamp,
}

impl FieldKind {
    fn accepts(self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Number => value.is_number(),
            Self::Boolean => value.is_boolean(),
            Self::Object => value.is_object(),
            Self::Array => value.is_array(),
            Self::Uuid => value.as_str().is_some_and(|s| Uuid::parse_str(s).is_ok()),
            Self::Timestamp => value
                .as_str()
                .is_some_and(|s| s.parse::<DateTime<Utc>>().is_ok()),
        }
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Object => "object",
            Self::Array => "array",
            Self::Uuid => "uuid",
            Self::Timestamp => "timestamp",
        };
        f.write_str(s)
    }
}

/// One declared field of a [`JsonObjectSchema`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    /// Expected kind.
    pub kind: FieldKind,
    /// Whether the field must be present (and non-null).
    #[serde(default = "default_required")]
    pub required: bool,
}

fn default_required() -> bool {
    true
}

/// Runtime object schema with `additionalProperties: false` semantics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JsonObjectSchema {
    /// Declared fields by name.
    pub fields: BTreeMap<String, FieldSpec>,
}

impl PayloadValidator for JsonObjectSchema {
    fn validate(&self, payload: &Value) -> Result<(), String> {
        let Some(object) = payload.as_object() else {
            return Err("payload must be a JSON object".to_owned());
        };

        if let Some(unknown) = object.keys().find(|k| !self.fields.contains_key(*k)) {
            return Err(format!("unknown field `{unknown}`"));
        }

        for (name, spec) in &self.fields {
            match object.get(name) {
                None | Some(Value::Null) if spec.required => {
                    return Err(format!("missing field `{name}`"));
                }
                None | Some(Value::Null) => {}
                Some(value) if !spec.kind.accepts(value) => {
                    return Err(format!("field `{name}` must be {}", spec.kind));
                }
                Some(_) => {}
            }
        }
        Ok(())
    }
}

/// Registry of payload validators keyed by event type and schema version.
#[derive(Default, Clone)]
pub struct SchemaRegistry {
    validators: HashMap<(String, u32), Arc<dyn PayloadValidator>>,
}

impl fmt::Debug for SchemaRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<_> = self.validators.keys().collect();
        keys.sort();
        f.debug_struct("SchemaRegistry")
            .field("schemas", &keys)
            .finish()
    }
}

impl SchemaRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a validator, replacing any existing one for the same key.
    ///
    /// # Errors
    ///
    /// Returns `BusError::Validation` if `event_type` is not PascalCase-like.
    pub fn register(
        &mut self,
        event_type: &str,
        schema_version: u32,
        validator: Arc<dyn PayloadValidator>,
    ) -> Result<(), BusError> {
        validate_event_type(event_type)?;
        self.validators
            .insert((event_type.to_owned(), schema_version), validator);
        Ok(())
    }

    /// Registers a Rust payload type.
    ///
    /// # Errors
    ///
    /// Returns `BusError::Validation` if `event_type` is not PascalCase-like.
    pub fn register_type<T: DeserializeOwned + 'static>(
        &mut self,
        event_type: &str,
        schema_version: u32,
    ) -> Result<(), BusError> {
        self.register(
            event_type,
            schema_version,
            Arc::new(TypedValidator::<T>::new()),
        )
    }

    /// Returns `true` if a schema is registered for the key.
    #[must_use]
    pub fn contains(&self, event_type: &str, schema_version: u32) -> bool {
        self.validators
            .contains_key(&(event_type.to_owned(), schema_version))
    }

    /// Lists registered `(event_type, schema_version)` keys, sorted.
    #[must_use]
    pub fn registered(&self) -> Vec<(String, u32)> {
        let mut keys: Vec<_> = self.validators.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Validates a payload against the registered schema.
    ///
    /// # Errors
    ///
    /// Returns `BusError::SchemaValidation` if no schema is registered for
    /// the key or the payload does not conform.
    pub fn validate(
        &self,
        event_type: &str,
        schema_version: u32,
        payload: &Value,
    ) -> Result<(), BusError> {
        let validator = self
            .validators
            .get(&(event_type.to_owned(), schema_version))
            .ok_or_else(|| {
                BusError::schema(
                    event_type,
                    format!("no schema registered for version {schema_version}"),
                )
            })?;
        validator
            .validate(payload)
            .map_err(|reason| BusError::schema(event_type, reason))
    }
}

//! Component schemas, type definitions and the process-wide type registry.
//!
//! A component payload is a JSON object. Each registered component type
//! declares the fields it accepts; the store validates every add and update
//! against that declaration before anything is written.

mod registry;

pub use registry::*;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

use crate::entities::EntityId;
use crate::error::{StoreError, StoreResult};

/// The value type a payload field must hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    String,
    Integer,
    Number,
    Boolean,
    Array,
    Object,
    /// A string holding an entity id.
    EntityRef,
    Any,
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FieldType::String => "string",
            FieldType::Integer => "integer",
            FieldType::Number => "number",
            FieldType::Boolean => "boolean",
            FieldType::Array => "array",
            FieldType::Object => "object",
            FieldType::EntityRef => "entity id",
            FieldType::Any => "any",
        };
        f.write_str(name)
    }
}

/// One named field of a component schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSchema {
    pub name: String,
    pub field_type: FieldType,
    pub required: bool,
    #[serde(default)]
    pub nullable: bool,
    /// Filled in when the field is missing from a payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    /// For string fields: the closed set of accepted values.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_values: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minimum: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maximum: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl FieldSchema {
    fn optional(name: &str, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            required: false,
            nullable: false,
            default: None,
            allowed_values: None,
            minimum: None,
            maximum: None,
            description: None,
        }
    }

    /// Shorthand for an optional string field.
    pub fn string(name: &str) -> Self {
        Self::optional(name, FieldType::String)
    }

    /// Shorthand for an optional integer field.
    pub fn integer(name: &str) -> Self {
        Self::optional(name, FieldType::Integer)
    }

    /// Shorthand for an optional numeric field.
    pub fn number(name: &str) -> Self {
        Self::optional(name, FieldType::Number)
    }

    /// Shorthand for an optional boolean field.
    pub fn boolean(name: &str) -> Self {
        Self::optional(name, FieldType::Boolean)
    }

    /// Shorthand for an optional array field.
    pub fn array(name: &str) -> Self {
        Self::optional(name, FieldType::Array)
    }

    /// Shorthand for an optional nested object field.
    pub fn object(name: &str) -> Self {
        Self::optional(name, FieldType::Object)
    }

    /// Shorthand for an optional entity reference field.
    pub fn entity_ref(name: &str) -> Self {
        Self::optional(name, FieldType::EntityRef)
    }

    /// Shorthand for a field accepting any JSON value.
    pub fn any(name: &str) -> Self {
        Self::optional(name, FieldType::Any)
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub fn with_default(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    pub fn one_of<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_values = Some(values.into_iter().map(Into::into).collect());
        self
    }

    pub fn range(mut self, minimum: f64, maximum: f64) -> Self {
        self.minimum = Some(minimum);
        self.maximum = Some(maximum);
        self
    }

    pub fn at_least(mut self, minimum: f64) -> Self {
        self.minimum = Some(minimum);
        self
    }

    pub fn describe(mut self, description: &str) -> Self {
        self.description = Some(description.into());
        self
    }

    fn check(&self, value: &Value) -> Result<(), String> {
        if value.is_null() {
            return if self.nullable {
                Ok(())
            } else {
                Err("must not be null".into())
            };
        }

        let type_ok = match self.field_type {
            FieldType::String => value.is_string(),
            FieldType::Integer => value.is_i64() || value.is_u64(),
            FieldType::Number => value.is_number(),
            FieldType::Boolean => value.is_boolean(),
            FieldType::Array => value.is_array(),
            FieldType::Object => value.is_object(),
            FieldType::EntityRef => value
                .as_str()
                .is_some_and(|s| s.parse::<EntityId>().is_ok()),
            FieldType::Any => true,
        };
        if !type_ok {
            return Err(format!("expected {}", self.field_type));
        }

        if let (Some(allowed), Some(s)) = (&self.allowed_values, value.as_str()) {
            if !allowed.iter().any(|a| a == s) {
                return Err(format!("'{s}' is not one of {allowed:?}"));
            }
        }

        if let Some(n) = value.as_f64() {
            if let Some(min) = self.minimum {
                if n < min {
                    return Err(format!("{n} is below the minimum {min}"));
                }
            }
            if let Some(max) = self.maximum {
                if n > max {
                    return Err(format!("{n} is above the maximum {max}"));
                }
            }
        }

        Ok(())
    }
}

/// A payload rule violation, before it is attributed to a component type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaViolation {
    pub field: String,
    pub reason: String,
}

/// Structural schema for one component type.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ComponentSchema {
    pub fields: Vec<FieldSchema>,
    /// Accept keys that no field declares.
    #[serde(default)]
    pub additional_fields: bool,
}

impl ComponentSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, field: FieldSchema) -> Self {
        self.fields.push(field);
        self
    }

    pub fn allow_additional_fields(mut self) -> Self {
        self.additional_fields = true;
        self
    }

    /// Look up a declared field.
    pub fn get_field(&self, name: &str) -> Option<&FieldSchema> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// A payload holding every declared default.
    pub fn default_payload(&self) -> Value {
        let map: Map<String, Value> = self
            .fields
            .iter()
            .filter_map(|f| f.default.clone().map(|d| (f.name.clone(), d)))
            .collect();
        Value::Object(map)
    }

    /// Fill defaults into `payload`, then validate it.
    ///
    /// Returns the normalized payload that should be persisted.
    pub fn prepare(&self, payload: Value) -> Result<Value, SchemaViolation> {
        let mut map = match payload {
            Value::Object(map) => map,
            other => {
                return Err(SchemaViolation {
                    field: "$".into(),
                    reason: format!("payload must be an object, got {}", json_kind(&other)),
                })
            }
        };

        for field in &self.fields {
            if !map.contains_key(&field.name) {
                if let Some(default) = &field.default {
                    map.insert(field.name.clone(), default.clone());
                }
            }
        }

        for field in &self.fields {
            match map.get(&field.name) {
                Some(value) => field.check(value).map_err(|reason| SchemaViolation {
                    field: field.name.clone(),
                    reason,
                })?,
                None if field.required => {
                    return Err(SchemaViolation {
                        field: field.name.clone(),
                        reason: "required field is missing".into(),
                    })
                }
                None => {}
            }
        }

        if !self.additional_fields {
            if let Some(unknown) = map.keys().find(|k| self.get_field(k).is_none()) {
                return Err(SchemaViolation {
                    field: unknown.clone(),
                    reason: "field is not declared by the schema".into(),
                });
            }
        }

        Ok(Value::Object(map))
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// How `update_component` combines the new payload with the stored one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadMerge {
    /// The new payload replaces the stored document.
    #[default]
    Replace,
    /// Top-level keys of the new payload overlay the stored document.
    /// A `null` value removes the key.
    Shallow,
}

impl PayloadMerge {
    pub fn apply(&self, current: &Value, incoming: Value) -> Value {
        match (self, current, incoming) {
            (PayloadMerge::Shallow, Value::Object(base), Value::Object(patch)) => {
                let mut merged = base.clone();
                for (key, value) in patch {
                    if value.is_null() {
                        merged.remove(&key);
                    } else {
                        merged.insert(key, value);
                    }
                }
                Value::Object(merged)
            }
            (_, _, incoming) => incoming,
        }
    }
}

/// A registered component type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentTypeDefinition {
    /// Globally unique type name, e.g. "Location".
    pub name: String,
    pub description: String,
    pub schema_version: String,
    /// Name of the declaring module.
    pub module: String,
    pub schema: ComponentSchema,
    #[serde(default)]
    pub merge: PayloadMerge,
}

impl ComponentTypeDefinition {
    pub fn new(name: impl Into<String>, module: impl Into<String>, schema: ComponentSchema) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            schema_version: "1.0.0".into(),
            module: module.into(),
            schema,
            merge: PayloadMerge::Replace,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_schema_version(mut self, version: impl Into<String>) -> Self {
        self.schema_version = version.into();
        self
    }

    pub fn with_merge(mut self, merge: PayloadMerge) -> Self {
        self.merge = merge;
        self
    }

    pub fn default_payload(&self) -> Value {
        self.schema.default_payload()
    }

    /// Apply defaults and validate, attributing violations to this type.
    pub fn prepare_payload(&self, payload: Value) -> StoreResult<Value> {
        self.schema
            .prepare(payload)
            .map_err(|v| StoreError::SchemaValidation {
                component_type: self.name.clone(),
                field: v.field,
                reason: v.reason,
            })
    }
}

/// A registered relationship type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationshipTypeDefinition {
    pub name: String,
    pub description: String,
    pub module: String,
}

impl RelationshipTypeDefinition {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        module: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            module: module.into(),
        }
    }
}

/// A component payload with a Rust type behind it.
///
/// Implementors get checked accessors (`WorldStore::get_typed`,
/// `add_typed`, `update_typed`) instead of poking at raw JSON.
pub trait TypedComponent: Serialize + DeserializeOwned {
    /// Registered component type name.
    const TYPE_NAME: &'static str;

    /// The schema payloads of this type are validated against.
    fn schema() -> ComponentSchema;

    /// Build the definition a module registers for this type.
    fn definition(module: &str) -> ComponentTypeDefinition {
        ComponentTypeDefinition::new(Self::TYPE_NAME, module, Self::schema())
    }
}

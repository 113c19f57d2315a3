//! Structured output shapes.
//!
//! A [`Schema`] names the JSON object a model should answer with. Adapters
//! that support structured output render it into their own tool-call or
//! response-format construct, starting from [`Schema::to_json_schema`].
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::str::FromStr;
use strum::IntoEnumIterator;
use strum_macros::{Display, EnumIter, EnumString};

use crate::errors::{AgentError, AgentResult};

/// The primitive types a property may declare
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, EnumIter,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum PropertyType {
    String,
    Array,
    Boolean,
    Integer,
    Number,
    Object,
    Null,
}

/// A single property descriptor
///
/// Keys other than `type` and `description` (`enum`, `items`, ...) are kept
/// verbatim in `extra` and rendered alongside.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Property {
    #[serde(rename = "type")]
    pub kind: PropertyType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Property {
    pub fn new<S: Into<String>>(kind: PropertyType, description: S) -> Self {
        Property {
            kind,
            description: Some(description.into()),
            extra: Map::new(),
        }
    }

    /// Attach a vendor-specific key such as `enum` or `items`
    pub fn with<K: Into<String>>(mut self, key: K, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }

    pub fn to_value(&self) -> Value {
        let mut map = Map::new();
        map.insert("type".to_string(), json!(self.kind.to_string()));
        if let Some(description) = &self.description {
            map.insert("description".to_string(), json!(description));
        }
        for (key, value) in &self.extra {
            map.insert(key.clone(), value.clone());
        }
        Value::Object(map)
    }
}

/// Ordered property bag of a JSON object schema
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SchemaObject {
    properties: IndexMap<String, Property>,
}

impl SchemaObject {
    pub fn new() -> Self {
        Self::default()
    }

    /// The seven types accepted by [`SchemaObject::add_property`]
    pub fn valid_types() -> Vec<PropertyType> {
        PropertyType::iter().collect()
    }

    /// Add a property from a raw JSON descriptor.
    ///
    /// The descriptor's `type` must be one of [`SchemaObject::valid_types`];
    /// otherwise nothing is inserted.
    pub fn add_property<S: Into<String>>(
        &mut self,
        name: S,
        descriptor: Value,
    ) -> AgentResult<&mut Self> {
        let name = name.into();
        let kind = descriptor.get("type").cloned().unwrap_or(Value::Null);
        let valid = kind
            .as_str()
            .map(|k| PropertyType::from_str(k).is_ok())
            .unwrap_or(false);
        if !valid {
            return Err(AgentError::InvalidPropertyType {
                name,
                kind: kind.to_string(),
            });
        }

        let property: Property =
            serde_json::from_value(descriptor).map_err(|e| AgentError::InvalidPropertyType {
                name: name.clone(),
                kind: e.to_string(),
            })?;
        self.properties.insert(name, property);
        Ok(self)
    }

    /// Add an already typed property
    pub fn insert<S: Into<String>>(&mut self, name: S, property: Property) -> &mut Self {
        self.properties.insert(name.into(), property);
        self
    }

    pub fn with_property<S: Into<String>>(mut self, name: S, property: Property) -> Self {
        self.insert(name, property);
        self
    }

    pub fn remove_property(&mut self, name: &str) -> &mut Self {
        self.properties.shift_remove(name);
        self
    }

    pub fn property(&self, name: &str) -> Option<&Property> {
        self.properties.get(name)
    }

    pub fn properties(&self) -> &IndexMap<String, Property> {
        &self.properties
    }

    /// Property names in insertion order
    pub fn names(&self) -> Vec<&str> {
        self.properties.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.properties.len()
    }

    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }

    pub fn to_value(&self) -> Value {
        let map: Map<String, Value> = self
            .properties
            .iter()
            .map(|(name, property)| (name.clone(), property.to_value()))
            .collect();
        Value::Object(map)
    }
}

/// A named object shape requested from a model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    name: String,
    description: String,
    object: SchemaObject,
    required: Vec<String>,
}

impl Schema {
    /// `required` is expected to name properties of `object`; vendors reject
    /// unknown names, so it is not checked here.
    pub fn new<N, D, I, R>(name: N, description: D, object: SchemaObject, required: I) -> Self
    where
        N: Into<String>,
        D: Into<String>,
        I: IntoIterator<Item = R>,
        R: Into<String>,
    {
        Schema {
            name: name.into(),
            description: description.into(),
            object,
            required: required.into_iter().map(Into::into).collect(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn object(&self) -> &SchemaObject {
        &self.object
    }

    pub fn required(&self) -> &[String] {
        &self.required
    }

    /// Compact `{ property: "description (type)" }` rendering for use in prompts
    pub fn to_json(&self) -> String {
        let map: Map<String, Value> = self
            .object
            .properties()
            .iter()
            .map(|(name, property)| {
                let text = match &property.description {
                    Some(description) if !description.is_empty() => {
                        format!("{} ({})", description, property.kind)
                    }
                    _ => format!("({})", property.kind),
                };
                (name.clone(), Value::String(text))
            })
            .collect();
        Value::Object(map).to_string()
    }

    /// Generic JSON Schema document for the object
    pub fn to_json_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": self.object.to_value(),
            "required": self.required,
        })
    }
}

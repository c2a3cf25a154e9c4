//! Property, event and action schemas
//!
//! Schemas are closed, tagged descriptions checked when a property is
//! constructed rather than free-form dictionaries.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::{ThingError, ThingResult};

// ─────────────────────────────────────────────────────────────────────────────
// Property Type
// ─────────────────────────────────────────────────────────────────────────────

/// JSON-Schema primitive type of a property or event payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PropertyType {
    Number,
    Integer,
    Boolean,
    String,
}

impl PropertyType {
    /// Whether `minimum` / `maximum` make sense for this type
    pub fn is_numeric(&self) -> bool {
        matches!(self, PropertyType::Number | PropertyType::Integer)
    }
}

impl std::fmt::Display for PropertyType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PropertyType::Number => write!(f, "number"),
            PropertyType::Integer => write!(f, "integer"),
            PropertyType::Boolean => write!(f, "boolean"),
            PropertyType::String => write!(f, "string"),
        }
    }
}

/// Rust types that can back a property value
pub trait SchemaValue: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {
    const TYPE: PropertyType;

    /// Numeric view used for bounds checks
    fn as_f64(&self) -> Option<f64> {
        None
    }
}

impl SchemaValue for f64 {
    const TYPE: PropertyType = PropertyType::Number;

    fn as_f64(&self) -> Option<f64> {
        Some(*self)
    }
}

impl SchemaValue for i64 {
    const TYPE: PropertyType = PropertyType::Integer;

    fn as_f64(&self) -> Option<f64> {
        Some(*self as f64)
    }
}

impl SchemaValue for bool {
    const TYPE: PropertyType = PropertyType::Boolean;
}

impl SchemaValue for String {
    const TYPE: PropertyType = PropertyType::String;
}

// ─────────────────────────────────────────────────────────────────────────────
// Property Schema
// ─────────────────────────────────────────────────────────────────────────────

/// Descriptive metadata of a property
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertySchema {
    /// Semantic type tag (e.g., "LevelProperty", "FrequencyProperty")
    #[serde(rename = "@type")]
    pub semantic_type: String,

    pub title: String,

    #[serde(rename = "type")]
    pub value_type: PropertyType,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minimum: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maximum: Option<f64>,

    #[serde(default)]
    pub read_only: bool,
}

impl PropertySchema {
    pub fn new(
        semantic_type: impl Into<String>,
        title: impl Into<String>,
        value_type: PropertyType,
    ) -> Self {
        Self {
            semantic_type: semantic_type.into(),
            title: title.into(),
            value_type,
            description: None,
            unit: None,
            minimum: None,
            maximum: None,
            read_only: false,
        }
    }

    /// Shorthand for a `number` property
    pub fn number(semantic_type: impl Into<String>, title: impl Into<String>) -> Self {
        Self::new(semantic_type, title, PropertyType::Number)
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    pub fn with_bounds(mut self, minimum: f64, maximum: f64) -> Self {
        self.minimum = Some(minimum);
        self.maximum = Some(maximum);
        self
    }

    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    /// Check the schema is internally consistent and matches `value_type`
    pub fn validate_for(&self, property: &str, value_type: PropertyType) -> ThingResult<()> {
        if self.value_type != value_type {
            return Err(ThingError::TypeMismatch {
                property: property.to_string(),
                expected: self.value_type,
                found: value_type.to_string(),
            });
        }

        let invalid = |reason: &str| ThingError::InvalidSchema {
            property: property.to_string(),
            reason: reason.to_string(),
        };

        if self.semantic_type.trim().is_empty() {
            return Err(invalid("semantic type tag is empty"));
        }
        if self.unit.as_deref().is_some_and(|u| u.trim().is_empty()) {
            return Err(invalid("unit is empty"));
        }
        if !self.value_type.is_numeric() && (self.minimum.is_some() || self.maximum.is_some()) {
            return Err(invalid("bounds are only allowed on numeric properties"));
        }
        if let (Some(min), Some(max)) = (self.minimum, self.maximum) {
            if min > max {
                return Err(invalid("minimum is greater than maximum"));
            }
        }
        Ok(())
    }

    /// Check a numeric value against the declared bounds
    pub fn check_bounds(&self, value: f64) -> Result<(), String> {
        if let Some(min) = self.minimum {
            if value < min {
                return Err(format!("{} is below minimum {}", value, min));
            }
        }
        if let Some(max) = self.maximum {
            if value > max {
                return Err(format!("{} is above maximum {}", value, max));
            }
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Event / Action Schema
// ─────────────────────────────────────────────────────────────────────────────

/// Declared shape of an event a thing may emit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventSchema {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(rename = "type")]
    pub value_type: PropertyType,
}

impl EventSchema {
    pub fn new(value_type: PropertyType) -> Self {
        Self {
            description: None,
            value_type,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Declared action; no device in this system exposes one yet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionSchema {
    pub title: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<PropertyType>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_builder_serializes_webthing_keys() {
        let schema = PropertySchema::number("LevelProperty", "CO2")
            .with_description("The current CO2 in %")
            .with_unit("percent")
            .with_bounds(0.0, 100.0)
            .read_only();

        let json = serde_json::to_value(&schema).unwrap();
        assert_eq!(json["@type"], "LevelProperty");
        assert_eq!(json["type"], "number");
        assert_eq!(json["unit"], "percent");
        assert_eq!(json["minimum"], 0.0);
        assert_eq!(json["maximum"], 100.0);
        assert_eq!(json["readOnly"], true);
    }

    #[test]
    fn test_validate_rejects_inverted_bounds() {
        let schema = PropertySchema::number("LevelProperty", "pH").with_bounds(14.0, 0.0);
        let err = schema.validate_for("pH", PropertyType::Number).unwrap_err();
        assert!(matches!(err, ThingError::InvalidSchema { .. }));
    }

    #[test]
    fn test_validate_rejects_bounds_on_boolean() {
        let schema = PropertySchema::new("OnOffProperty", "On", PropertyType::Boolean)
            .with_bounds(0.0, 1.0);
        let err = schema.validate_for("on", PropertyType::Boolean).unwrap_err();
        assert!(matches!(err, ThingError::InvalidSchema { .. }));
    }

    #[test]
    fn test_validate_rejects_type_mismatch() {
        let schema = PropertySchema::number("LevelProperty", "Salinity");
        let err = schema.validate_for("Salinity", PropertyType::Boolean).unwrap_err();
        assert!(matches!(
            err,
            ThingError::TypeMismatch { expected: PropertyType::Number, .. }
        ));
    }

    #[test]
    fn test_check_bounds() {
        let schema = PropertySchema::number("LevelProperty", "CO2").with_bounds(0.0, 100.0);
        assert!(schema.check_bounds(50.0).is_ok());
        assert!(schema.check_bounds(-0.1).is_err());
        assert!(schema.check_bounds(100.1).is_err());

        let open = PropertySchema::number("LevelProperty", "Gravity");
        assert!(open.check_bounds(1e9).is_ok());
    }
}

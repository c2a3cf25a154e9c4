//! Property - a named, schema-described wrapper around a `Value`

use std::any::Any;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::{PropertySchema, SchemaValue, Thing, ThingError, ThingResult, Value, WriteError};

/// Description of one property as handed to the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyDescription {
    pub name: String,

    #[serde(flatten)]
    pub schema: PropertySchema,

    /// Current reading at the time the description was taken
    pub value: serde_json::Value,
}

/// A typed property attached to one thing
pub struct Property<T: SchemaValue> {
    name: String,
    /// Id of the owning thing (non-owning back-reference)
    thing_id: String,
    schema: PropertySchema,
    value: Arc<Value<T>>,
    /// Reject external writes outside the declared bounds
    enforce_bounds: bool,
}

impl<T: SchemaValue> Property<T> {
    /// Create a property for `thing`, validating the schema against `T`
    pub fn new(
        thing: &Thing,
        name: impl Into<String>,
        value: Arc<Value<T>>,
        schema: PropertySchema,
    ) -> ThingResult<Self> {
        let name = name.into();
        schema.validate_for(&name, T::TYPE)?;

        Ok(Self {
            name,
            thing_id: thing.id().to_string(),
            schema,
            value,
            enforce_bounds: false,
        })
    }

    /// Opt in to checking declared bounds on external writes. Bounds are
    /// descriptive otherwise.
    pub fn with_bounds_enforced(mut self) -> Self {
        self.enforce_bounds = true;
        self
    }

    pub fn enforces_bounds(&self) -> bool {
        self.enforce_bounds
    }

    pub fn value(&self) -> &Arc<Value<T>> {
        &self.value
    }

    pub fn get(&self) -> T {
        self.value.get()
    }

    /// Write through to the value.
    ///
    /// Read-only properties always fail with `WriteRejected` and leave the
    /// value unchanged. Declared bounds are checked only when the property
    /// was built `with_bounds_enforced`.
    pub fn write(&self, value: T) -> ThingResult<()> {
        if self.schema.read_only {
            return Err(self.rejected("property is read-only"));
        }

        if let Some(v) = value.as_f64().filter(|_| self.enforce_bounds) {
            self.schema
                .check_bounds(v)
                .map_err(|reason| ThingError::PropertyValidation {
                    property: self.name.clone(),
                    reason,
                })?;
        }

        self.value.attempt_set(value).map_err(|e| match e {
            WriteError::ReadOnly => self.rejected("value is read-only"),
            WriteError::Rejected(reason) => self.rejected(&reason),
        })
    }

    fn rejected(&self, reason: &str) -> ThingError {
        ThingError::WriteRejected {
            property: self.name.clone(),
            reason: reason.to_string(),
        }
    }
}

/// Type-erased view of a property, used by `Thing` to hold properties of
/// different value types side by side.
pub trait ThingProperty: Send + Sync {
    fn name(&self) -> &str;

    fn thing_id(&self) -> &str;

    fn schema(&self) -> &PropertySchema;

    /// Current value as JSON
    fn current(&self) -> serde_json::Value;

    /// Write a JSON value, decoding it to the property's type first
    fn write_json(&self, value: serde_json::Value) -> ThingResult<()>;

    /// Downcast support for recovering the typed `Property<T>`
    fn as_any(&self) -> &dyn Any;

    fn describe(&self) -> PropertyDescription {
        PropertyDescription {
            name: self.name().to_string(),
            schema: self.schema().clone(),
            value: self.current(),
        }
    }
}

impl<T: SchemaValue> ThingProperty for Property<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn thing_id(&self) -> &str {
        &self.thing_id
    }

    fn schema(&self) -> &PropertySchema {
        &self.schema
    }

    fn current(&self) -> serde_json::Value {
        serde_json::to_value(self.value.get()).unwrap_or(serde_json::Value::Null)
    }

    fn write_json(&self, value: serde_json::Value) -> ThingResult<()> {
        // Read-only wins over a malformed payload
        if self.schema.read_only {
            return Err(self.rejected("property is read-only"));
        }

        let decoded: T = serde_json::from_value(value.clone()).map_err(|_| {
            ThingError::TypeMismatch {
                property: self.name.clone(),
                expected: T::TYPE,
                found: value.to_string(),
            }
        })?;
        self.write(decoded)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl<T: SchemaValue + std::fmt::Debug> std::fmt::Debug for Property<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Property")
            .field("name", &self.name)
            .field("thing_id", &self.thing_id)
            .field("value", &self.value.get())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::assert_err;

    fn resonance(thing: &Thing) -> Property<f64> {
        Property::new(
            thing,
            "Acoustic Resonance",
            Value::shared(0.0),
            PropertySchema::number("FrequencyProperty", "Acoustic Resonance")
                .with_unit("hertz")
                .read_only(),
        )
        .unwrap()
    }

    #[test]
    fn test_read_only_write_rejected_value_unchanged() {
        let thing = Thing::new("PD3", "PD3", vec!["MultiLevelSensor".into()], "");
        let property = resonance(&thing);
        property.value().notify_of_external_update(12.5);

        let err = assert_err!(property.write(30.0));
        assert!(err.is_write_rejected());
        assert_eq!(property.get(), 12.5);

        let err = assert_err!(property.write_json(serde_json::json!(1.0)));
        assert!(err.is_write_rejected());
        let err = assert_err!(property.write_json(serde_json::json!("not a number")));
        assert!(err.is_write_rejected());
        assert_eq!(property.get(), 12.5);
    }

    fn setpoint(thing: &Thing) -> Property<f64> {
        Property::new(
            thing,
            "setpoint",
            Arc::new(Value::writable(50.0_f64, |_| Ok(()))),
            PropertySchema::number("LevelProperty", "Setpoint").with_bounds(0.0, 100.0),
        )
        .unwrap()
    }

    #[test]
    fn test_bounds_are_descriptive_by_default() {
        let thing = Thing::new("lab", "Lab", vec![], "");
        let property = setpoint(&thing);
        assert!(!property.enforces_bounds());

        assert!(property.write(150.0).is_ok());
        assert_eq!(property.get(), 150.0);
        assert!(property.write_json(serde_json::json!(-3.0)).is_ok());
        assert_eq!(property.get(), -3.0);

        let err = assert_err!(property.write_json(serde_json::json!(true)));
        assert!(matches!(err, ThingError::TypeMismatch { .. }));
    }

    #[test]
    fn test_enforced_bounds_reject_out_of_range_writes() {
        let thing = Thing::new("lab", "Lab", vec![], "");
        let property = setpoint(&thing).with_bounds_enforced();

        assert!(property.write(75.0).is_ok());
        assert_eq!(property.get(), 75.0);

        let err = assert_err!(property.write(150.0));
        assert!(matches!(err, ThingError::PropertyValidation { .. }));
        let err = assert_err!(property.write_json(serde_json::json!(-0.5)));
        assert!(matches!(err, ThingError::PropertyValidation { .. }));
        assert_eq!(property.get(), 75.0);
    }

    #[test]
    fn test_downcast_recovers_typed_property() {
        let thing = Thing::new("PD3", "PD3", vec![], "");
        let property = resonance(&thing);
        let value = Arc::clone(property.value());

        let erased: &dyn ThingProperty = &property;
        let typed = erased.as_any().downcast_ref::<Property<f64>>().unwrap();
        assert!(Arc::ptr_eq(typed.value(), &value));
        assert!(erased.as_any().downcast_ref::<Property<bool>>().is_none());
    }

    #[test]
    fn test_writable_schema_over_read_only_value() {
        let thing = Thing::new("lab", "Lab", vec![], "");
        let property = Property::new(
            &thing,
            "level",
            Value::shared(1.0_f64),
            PropertySchema::number("LevelProperty", "Level"),
        )
        .unwrap();

        let err = assert_err!(property.write(2.0));
        assert!(err.is_write_rejected());
    }

    #[test]
    fn test_schema_type_checked_at_construction() {
        let thing = Thing::new("lab", "Lab", vec![], "");
        let result = Property::new(
            &thing,
            "alarm",
            Value::shared(false),
            PropertySchema::number("LevelProperty", "Alarm"),
        );
        assert!(matches!(result, Err(ThingError::TypeMismatch { .. })));
    }

    #[test]
    fn test_describe_includes_current_value() {
        let thing = Thing::new("PD3", "PD3", vec![], "");
        let property = resonance(&thing);
        property.value().notify_of_external_update(21.0);

        let description = property.describe();
        assert_eq!(description.name, "Acoustic Resonance");
        assert_eq!(description.value, serde_json::json!(21.0));
        assert_eq!(description.schema.unit.as_deref(), Some("hertz"));
        assert_eq!(property.thing_id(), "PD3");
    }
}

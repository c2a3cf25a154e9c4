//! Thing Events
//!
//! Immutable, timestamped occurrences appended to a thing's event log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An event emitted by a thing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Event name, e.g. "GasLeakage"
    pub name: String,

    /// Event payload
    pub data: serde_json::Value,

    /// Creation timestamp
    pub time: DateTime<Utc>,

    /// Id of the emitting thing (non-owning back-reference)
    pub thing_id: String,
}

impl Event {
    /// Create a new event stamped with the current time
    pub fn new(
        thing_id: impl Into<String>,
        name: impl Into<String>,
        data: serde_json::Value,
    ) -> Self {
        Self {
            name: name.into(),
            data,
            time: Utc::now(),
            thing_id: thing_id.into(),
        }
    }

    /// Create an event from any serializable payload
    pub fn with_data<T: Serialize>(
        thing_id: impl Into<String>,
        name: impl Into<String>,
        data: &T,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self::new(thing_id, name, serde_json::to_value(data)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_creation() {
        let before = Utc::now();
        let event = Event::with_data("PD1", "GasLeakage", &true).unwrap();

        assert_eq!(event.name, "GasLeakage");
        assert_eq!(event.thing_id, "PD1");
        assert_eq!(event.data, serde_json::Value::Bool(true));
        assert!(event.time >= before);
    }
}

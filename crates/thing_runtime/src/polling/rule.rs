//! Threshold rules - turn current readings into thing events

use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};

/// Condition evaluated against a numeric reading
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Condition {
    /// Reading exceeds threshold
    HighLimit { value: f64 },
    /// Reading falls below threshold
    LowLimit { value: f64 },
    /// Reading is outside range
    OutOfRange { low: f64, high: f64 },
}

impl Condition {
    pub fn evaluate(&self, reading: f64) -> bool {
        match self {
            Condition::HighLimit { value } => reading > *value,
            Condition::LowLimit { value } => reading < *value,
            Condition::OutOfRange { low, high } => reading < *low || reading > *high,
        }
    }

    /// Short description for log messages
    pub fn description(&self) -> String {
        match self {
            Condition::HighLimit { value } => format!("above {}", value),
            Condition::LowLimit { value } => format!("below {}", value),
            Condition::OutOfRange { low, high } => format!("outside {} to {}", low, high),
        }
    }
}

/// When a satisfied rule emits
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FireMode {
    /// Emit on every tick the condition holds
    #[default]
    EveryTick,
    /// Emit only when the condition goes from false to true
    OnCrossing,
}

/// A device-specific predicate over one property that emits an event
#[derive(Debug)]
pub struct ThresholdRule {
    /// Property whose reading is checked
    pub property: String,
    pub condition: Condition,
    /// Name of the emitted event
    pub event: String,
    /// Payload of the emitted event
    pub payload: serde_json::Value,
    pub mode: FireMode,
    /// Whether the condition held on the previous evaluation
    active: AtomicBool,
}

impl ThresholdRule {
    pub fn new(
        property: impl Into<String>,
        condition: Condition,
        event: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            property: property.into(),
            condition,
            event: event.into(),
            payload,
            mode: FireMode::default(),
            active: AtomicBool::new(false),
        }
    }

    pub fn with_mode(mut self, mode: FireMode) -> Self {
        self.mode = mode;
        self
    }

    /// Evaluate against the current reading. Returns true if the rule fires.
    pub fn check(&self, reading: f64) -> bool {
        let holds = self.condition.evaluate(reading);
        let was_active = self.active.swap(holds, Ordering::SeqCst);

        match self.mode {
            FireMode::EveryTick => holds,
            FireMode::OnCrossing => holds && !was_active,
        }
    }
}

//! Restart policy and backoff for faulted ticks

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How a service recovers from tick faults
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RestartPolicy {
    /// Delay after the first fault
    pub initial_backoff: Duration,

    /// Upper bound for the doubling delay
    pub max_backoff: Duration,

    /// Faults tolerated before the service is marked failed (None = unlimited)
    #[serde(default)]
    pub max_restarts: Option<u32>,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
            max_restarts: None,
        }
    }
}

impl RestartPolicy {
    pub fn new(initial_backoff: Duration, max_backoff: Duration) -> Self {
        Self {
            initial_backoff,
            max_backoff,
            max_restarts: None,
        }
    }

    pub fn with_max_restarts(mut self, max_restarts: u32) -> Self {
        self.max_restarts = Some(max_restarts);
        self
    }

    /// Whether another restart is allowed after `restarts` faults
    pub fn allows(&self, restarts: u32) -> bool {
        self.max_restarts.map_or(true, |max| restarts <= max)
    }
}

/// Exponential backoff state, reset after every successful tick
#[derive(Debug)]
pub(crate) struct Backoff {
    initial: Duration,
    max: Duration,
    current: Option<Duration>,
}

impl Backoff {
    pub(crate) fn new(policy: &RestartPolicy) -> Self {
        Self {
            initial: policy.initial_backoff,
            max: policy.max_backoff.max(policy.initial_backoff),
            current: None,
        }
    }

    pub(crate) fn next_delay(&mut self) -> Duration {
        let next = match self.current {
            None => self.initial,
            Some(d) => d.saturating_mul(2).min(self.max),
        };
        self.current = Some(next);
        next
    }

    pub(crate) fn reset(&mut self) {
        self.current = None;
    }
}

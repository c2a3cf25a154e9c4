//! Supervised services
//!
//! A service is a long-lived task owned by the [`ServiceManager`]. Periodic
//! services declare a period in their [`ServiceSpec`]: the manager waits one
//! full period, calls `on_tick`, and repeats until it is told to stop.
//!
//! A tick that returns an error or panics is a fault. Faults are logged and
//! retried after a backoff taken from the service's [`RestartPolicy`]; a
//! service that runs out of restarts ends in [`ServiceState::Failed`].

mod handle;
mod manager;
mod restart;

pub use handle::{ServiceHandle, ServiceState};
pub use manager::ServiceManager;
pub use restart::RestartPolicy;

use std::time::Duration;

use async_trait::async_trait;

/// Default bound on a service's `on_stop` hook
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, thiserror::Error)]
pub enum ServiceError {
    #[error("Service {0} failed to initialize")]
    InitializationFailed(String),

    #[error("Service {0} is already registered")]
    AlreadyRunning(String),

    #[error("Service {0} is not running")]
    NotRunning(String),

    /// A tick returned an error or panicked
    #[error("Tick fault: {0}")]
    TickFault(String),

    #[error("Timed out waiting for service to stop")]
    ShutdownTimeout,

    #[error("Service control channel closed")]
    ChannelClosed,

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type ServiceResult<T> = Result<T, ServiceError>;

// ─────────────────────────────────────────────────────────────────────────────
// Spec & Context
// ─────────────────────────────────────────────────────────────────────────────

/// Static description of a service, read once when it is spawned
#[derive(Debug, Clone)]
pub struct ServiceSpec {
    /// Unique within a manager
    pub id: String,
    pub name: String,
    /// Wait between ticks; `None` means `on_tick` is never called
    pub period: Option<Duration>,
    pub restart: RestartPolicy,
    /// Bound on `on_stop` and on joining the task in `ServiceManager::stop`
    pub stop_timeout: Duration,
}

impl ServiceSpec {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            period: None,
            restart: RestartPolicy::default(),
            stop_timeout: DEFAULT_STOP_TIMEOUT,
        }
    }

    /// Tick every `period`, starting one period after start
    pub fn every(mut self, period: Duration) -> Self {
        self.period = Some(period);
        self
    }

    pub fn restart_with(mut self, restart: RestartPolicy) -> Self {
        self.restart = restart;
        self
    }

    pub fn stop_within(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }
}

/// Passed to every lifecycle hook
#[derive(Debug, Clone)]
pub struct ServiceContext {
    pub service_id: String,
    pub name: String,
}

impl ServiceContext {
    pub(crate) fn for_spec(spec: &ServiceSpec) -> Self {
        Self {
            service_id: spec.id.clone(),
            name: spec.name.clone(),
        }
    }
}

/// A unit of background work driven by the [`ServiceManager`]
#[async_trait]
pub trait Service: Send + Sync + 'static {
    fn spec(&self) -> ServiceSpec;

    /// An error here ends the service in `Failed` without ticking.
    async fn on_start(&mut self, _ctx: &ServiceContext) -> ServiceResult<()> {
        Ok(())
    }

    /// Runs once on the way out, even after a fault limit was reached.
    async fn on_stop(&mut self, _ctx: &ServiceContext) -> ServiceResult<()> {
        Ok(())
    }

    /// One periodic step. An error or panic counts as a tick fault.
    async fn on_tick(&mut self, ctx: &ServiceContext) -> ServiceResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spec_builder() {
        let spec = ServiceSpec::new("poller/PD1", "PD1 poller")
            .every(Duration::from_secs(3))
            .restart_with(RestartPolicy::default().with_max_restarts(5))
            .stop_within(Duration::from_secs(1));

        assert_eq!(spec.period, Some(Duration::from_secs(3)));
        assert_eq!(spec.restart.max_restarts, Some(5));
        assert_eq!(spec.stop_timeout, Duration::from_secs(1));

        let ctx = ServiceContext::for_spec(&spec);
        assert_eq!(ctx.service_id, "poller/PD1");
        assert_eq!(ctx.name, "PD1 poller");
    }

    #[test]
    fn test_spec_defaults_to_no_ticks() {
        let spec = ServiceSpec::new("idle", "Idle");
        assert_eq!(spec.period, None);
        assert_eq!(spec.stop_timeout, DEFAULT_STOP_TIMEOUT);
        assert_eq!(spec.restart, RestartPolicy::default());
    }
}

//! Polling service - drives a `DevicePoller` from the service manager

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::service::{
    DEFAULT_STOP_TIMEOUT, RestartPolicy, Service, ServiceContext, ServiceError, ServiceResult,
    ServiceSpec,
};

use super::DevicePoller;

/// Default wait between ticks
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(3);

/// Periodic polling task for one thing
pub struct PollingService {
    poller: Arc<DevicePoller>,
    interval: Duration,
    restart: RestartPolicy,
    shutdown_timeout: Duration,
}

impl PollingService {
    pub fn new(poller: DevicePoller) -> Self {
        Self {
            poller: Arc::new(poller),
            interval: DEFAULT_POLL_INTERVAL,
            restart: RestartPolicy::default(),
            shutdown_timeout: DEFAULT_STOP_TIMEOUT,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_restart_policy(mut self, restart: RestartPolicy) -> Self {
        self.restart = restart;
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Service id used for a thing's poller
    pub fn service_id(thing_id: &str) -> String {
        format!("poller/{}", thing_id)
    }

    pub fn poller(&self) -> &Arc<DevicePoller> {
        &self.poller
    }
}

#[async_trait]
impl Service for PollingService {
    fn spec(&self) -> ServiceSpec {
        let thing = self.poller.thing();
        ServiceSpec::new(Self::service_id(thing.id()), format!("{} poller", thing.title()))
            .every(self.interval)
            .restart_with(self.restart.clone())
            .stop_within(self.shutdown_timeout)
    }

    async fn on_start(&mut self, ctx: &ServiceContext) -> ServiceResult<()> {
        tracing::info!(
            service_id = %ctx.service_id,
            thing_id = %self.poller.thing().id(),
            channels = self.poller.channels().len(),
            rules = self.poller.rules().len(),
            interval_ms = self.interval.as_millis() as u64,
            "Polling started"
        );
        Ok(())
    }

    async fn on_stop(&mut self, ctx: &ServiceContext) -> ServiceResult<()> {
        tracing::info!(
            service_id = %ctx.service_id,
            ticks = self.poller.tick_count(),
            "Polling stopped"
        );
        Ok(())
    }

    async fn on_tick(&mut self, ctx: &ServiceContext) -> ServiceResult<()> {
        // Observers are synchronous and may be slow; keep them off the
        // async workers so other things keep ticking.
        let poller = Arc::clone(&self.poller);
        let report = tokio::task::spawn_blocking(move || poller.tick())
            .await
            .map_err(|e| ServiceError::TickFault(format!("polling tick failed: {}", e)))?;

        tracing::trace!(
            service_id = %ctx.service_id,
            tick = report.tick,
            readings = report.readings.len(),
            events = report.events.len(),
            "Tick complete"
        );
        Ok(())
    }
}

//! Fleet startup
//!
//! Builds the device catalog, registers every thing and spawns one polling
//! service per thing on the shared service manager.

use std::sync::Arc;

use thing_runtime::{PollingService, ServiceError, ServiceHandle, ServiceManager};
use thing_types::{Registry, ThingError};
use tracing::info;

use crate::config::Config;
use crate::devices::{self, SourceFactory};

#[derive(Debug, thiserror::Error)]
pub enum FleetError {
    #[error("Failed to build things: {0}")]
    Thing(#[from] ThingError),

    #[error("Failed to start poller: {0}")]
    Service(#[from] ServiceError),
}

/// The running set of things and their poller handles
#[derive(Debug)]
pub struct Fleet {
    registry: Arc<Registry>,
    pollers: Vec<ServiceHandle>,
}

impl Fleet {
    /// Build every device and start its poller.
    ///
    /// Pollers already spawned are left to the manager if a later one fails;
    /// the caller's `shutdown_all` stops them.
    pub async fn start(
        config: &Config,
        manager: &ServiceManager,
        sources: &SourceFactory,
    ) -> Result<Self, FleetError> {
        let devices = devices::catalog(&config.alerts, sources)?;
        let things = devices.iter().map(|d| Arc::clone(&d.thing)).collect();
        let registry = Arc::new(Registry::new(config.group_name.clone(), things)?);

        let mut pollers = Vec::with_capacity(devices.len());
        for device in devices {
            let service = PollingService::new(device.poller)
                .with_interval(config.poll_interval())
                .with_restart_policy(config.restart_policy())
                .with_shutdown_timeout(config.shutdown_timeout());
            pollers.push(manager.spawn(service).await?);
        }

        info!(
            group = %registry.name(),
            things = registry.len(),
            interval_ms = config.polling.interval_ms,
            "Fleet started"
        );

        Ok(Self { registry, pollers })
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Poller handles in registry order
    pub fn pollers(&self) -> &[ServiceHandle] {
        &self.pollers
    }

    pub fn poller(&self, thing_id: &str) -> Option<&ServiceHandle> {
        let service_id = PollingService::service_id(thing_id);
        self.pollers.iter().find(|h| h.service_id == service_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use thing_runtime::{ScriptedSource, SensorSource, ServiceState};

    fn fast_config() -> Config {
        let mut config = Config::default();
        config.polling.interval_ms = 20;
        config.polling.shutdown_timeout_ms = 1000;
        config
    }

    #[tokio::test]
    async fn test_fleet_starts_one_poller_per_thing() {
        let manager = ServiceManager::new();
        let fleet = Fleet::start(&fast_config(), &manager, &devices::random_sources)
            .await
            .unwrap();

        assert_eq!(fleet.registry().name(), "PD1AndPD2Device");
        assert_eq!(fleet.registry().len(), 4);
        assert_eq!(manager.len(), 4);
        assert!(fleet.poller("PD3").is_some());
        assert!(fleet.poller("PD9").is_none());

        tokio::time::sleep(Duration::from_millis(120)).await;
        for handle in fleet.pollers() {
            assert!(handle.ticks() >= 1, "{} never ticked", handle.service_id);
        }

        manager.shutdown_all().await.unwrap();
        assert!(fleet.pollers().iter().all(|h| h.state() == ServiceState::Stopped));
    }

    #[tokio::test]
    async fn test_fleet_raises_gas_leakage_from_low_co2() {
        let sources = |thing_id: &str, property: &str| -> Box<dyn SensorSource> {
            match (thing_id, property) {
                ("PD1", "CO2") => Box::new(ScriptedSource::new([3.0])),
                _ => Box::new(ScriptedSource::new([30.0])),
            }
        };

        let manager = ServiceManager::new();
        let fleet = Fleet::start(&fast_config(), &manager, &sources).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        manager.shutdown_all().await.unwrap();

        let pd1 = fleet.registry().find("PD1").unwrap();
        let ticks = fleet.poller("PD1").unwrap().ticks() as usize;
        assert!(ticks >= 1);
        assert_eq!(pd1.events_named(devices::GAS_LEAKAGE).len(), ticks);

        for id in ["PD2", "PD3", "PD4"] {
            assert_eq!(fleet.registry().find(id).unwrap().event_count(), 0);
        }
    }
}

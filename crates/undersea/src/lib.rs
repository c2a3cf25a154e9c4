//! Undersea - simulated underwater sensor things
//!
//! Wires the device catalog into the polling runtime and exposes the
//! registry through [`ThingGateway`] for a protocol server to drive.

pub mod config;
pub mod devices;
pub mod fleet;
pub mod gateway;

pub use config::{Config, ConfigError};
pub use devices::{Device, SourceFactory};
pub use fleet::{Fleet, FleetError};
pub use gateway::{GatewayError, GatewayResult, SubscriptionId, ThingGateway};

//! Thing Runtime - supervised background services and sensor polling
//!
//! This crate contains the service lifecycle manager and the per-thing
//! polling engine that feeds simulated readings into `thing_types` values.

pub use thing_types;

pub mod polling;
pub mod service;

pub use polling::*;
pub use service::{
    RestartPolicy, Service, ServiceContext, ServiceError, ServiceHandle, ServiceManager,
    ServiceResult, ServiceSpec, ServiceState,
};

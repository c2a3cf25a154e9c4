//! Thing Types - device, property and value model for simulated sensors
//!
//! This crate contains the observable `Value` primitive and the
//! `Property` / `Event` / `Thing` / `Registry` aggregation model that the
//! polling runtime writes into and the network server reads from.

mod error;
mod event;
mod property;
mod registry;
mod schema;
mod thing;
mod value;

pub use error::*;
pub use event::*;
pub use property::*;
pub use registry::*;
pub use schema::*;
pub use thing::*;
pub use value::*;

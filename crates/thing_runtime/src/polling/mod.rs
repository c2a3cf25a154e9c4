//! Sensor Polling
//!
//! One `PollingService` per thing. Every tick it samples each sensor
//! channel, pushes the readings into the thing's values, then evaluates the
//! thing's threshold rules and appends any triggered events.
//!
//! Pollers of different things share no state; the only synchronization is
//! inside each `Value`.

mod poller;
mod rule;
mod service;
mod source;

pub use poller::*;
pub use rule::*;
pub use service::*;
pub use source::*;

//! EventBus - broadcast-based ingress for named events.
//!
//! External code publishes named events here; a running scheduler subscribes
//! at `start` and forwards every event to its event-triggered tasks.

/// Core event bus implementation (broadcast channel).
pub mod bus;
/// Event type definitions.
pub mod types;

pub use bus::EventBus;
pub use types::BusEvent;

#[cfg(test)]
mod tests;

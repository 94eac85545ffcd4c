//! Store-to-chain synchronization.
//!
//! The [`SyncOrchestrator`] runs passes over the four entity stages; the
//! [`SyncScheduler`] triggers them on a timer and recovers lost endpoints;
//! [`ConnectionHealth`] owns both store connections.

pub mod audit;
pub mod error;
pub mod health;
pub mod identity;
pub mod orchestrator;
pub mod scheduler;
pub mod stages;

#[cfg(test)]
pub(crate) mod testing;

pub use error::SyncError;
pub use health::{ConnectionHealth, Endpoint, LinkState};
pub use orchestrator::SyncOrchestrator;
pub use scheduler::SyncScheduler;

//! HTTP control surface for a store terminal.

pub mod handlers;
pub mod server;
pub mod service;

pub use server::{build_router, start, AppState, ServerConfig, ServerHandle};
pub use service::{EngineSyncService, ServiceError, SyncService};

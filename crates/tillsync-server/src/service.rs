//! The sync engine as the HTTP layer sees it.
//!
//! Handlers talk to [`SyncService`] only, so routes can be exercised against a
//! stub. [`EngineSyncService`] is the production implementation; it moves every
//! blocking store call onto the blocking pool.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use tillsync_core::{DbStatus, PassOutcome, Trigger};
use tillsync_engine::SyncOrchestrator;
use tillsync_store::checkout::SaleRecorder;
use tillsync_store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("local store not connected")]
    LocalUnavailable,

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("background task failed: {0}")]
    Task(String),
}

#[async_trait]
pub trait SyncService: Send + Sync {
    fn status(&self) -> DbStatus;

    /// Force the chain endpoint to `Disconnected`.
    fn mark_global_failed(&self);

    /// One reconnect attempt; true when the chain store is connected afterwards.
    async fn reconnect_global(&self) -> Result<bool, ServiceError>;

    async fn sync_now(&self) -> Result<PassOutcome, ServiceError>;

    /// Latest local points balance; 0 for an unknown mobile number.
    async fn points_balance(&self, mobile_number: &str) -> Result<i64, ServiceError>;
}

pub struct EngineSyncService {
    orchestrator: Arc<SyncOrchestrator>,
}

impl EngineSyncService {
    pub fn new(orchestrator: Arc<SyncOrchestrator>) -> Self {
        Self { orchestrator }
    }
}

#[async_trait]
impl SyncService for EngineSyncService {
    fn status(&self) -> DbStatus {
        self.orchestrator.health().status()
    }

    fn mark_global_failed(&self) {
        info!("chain store marked failed by request");
        self.orchestrator.health().global().mark_failed();
    }

    async fn reconnect_global(&self) -> Result<bool, ServiceError> {
        let health = self.orchestrator.health().clone();
        tokio::task::spawn_blocking(move || health.reconnect_global())
            .await
            .map_err(|e| ServiceError::Task(e.to_string()))
    }

    async fn sync_now(&self) -> Result<PassOutcome, ServiceError> {
        let orchestrator = self.orchestrator.clone();
        tokio::task::spawn_blocking(move || orchestrator.run_pass(Trigger::Manual))
            .await
            .map_err(|e| ServiceError::Task(e.to_string()))
    }

    async fn points_balance(&self, mobile_number: &str) -> Result<i64, ServiceError> {
        let local = self
            .orchestrator
            .health()
            .local()
            .handle()
            .ok_or(ServiceError::LocalUnavailable)?;
        let mobile_number = mobile_number.to_string();
        let balance = tokio::task::spawn_blocking(move || SaleRecorder::new(local).points_balance(&mobile_number))
            .await
            .map_err(|e| ServiceError::Task(e.to_string()))??;
        Ok(balance)
    }
}

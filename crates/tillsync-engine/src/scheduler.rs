use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use tillsync_core::Trigger;
use tillsync_settings::{LocalDbSettings, SyncSettings};
use tillsync_store::StoreKind;

use crate::error::SyncError;
use crate::orchestrator::SyncOrchestrator;

/// Drives timed passes and endpoint recovery.
///
/// Each tick first retries the chain store if it is down, then runs a pass on
/// the blocking pool. A lost local store is reopened after a backoff; if that
/// fails the scheduler returns the error and the process is expected to exit.
pub struct SyncScheduler {
    orchestrator: Arc<SyncOrchestrator>,
    interval: Duration,
    local_backoff: Duration,
}

impl SyncScheduler {
    pub fn new(orchestrator: Arc<SyncOrchestrator>, interval: Duration, local_backoff: Duration) -> Self {
        Self {
            orchestrator,
            interval,
            local_backoff,
        }
    }

    pub fn from_settings(
        orchestrator: Arc<SyncOrchestrator>,
        sync: &SyncSettings,
        local: &LocalDbSettings,
    ) -> Self {
        Self::new(
            orchestrator,
            Duration::from_secs(sync.interval_secs.max(1)),
            Duration::from_secs(local.reconnect_backoff_secs),
        )
    }

    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<Result<(), SyncError>> {
        tokio::spawn(self.run(cancel))
    }

    /// Returns `Ok` on cancellation and `Err` only when the local store cannot
    /// be reopened.
    pub async fn run(self, cancel: CancellationToken) -> Result<(), SyncError> {
        info!(interval_ms = self.interval.as_millis() as u64, "sync scheduler started");
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut trigger = Trigger::Startup;

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    info!("sync scheduler stopped");
                    return Ok(());
                }
                _ = ticker.tick() => {}
            }

            self.tick(trigger).await;
            trigger = Trigger::Timer;

            if !self.orchestrator.health().local().is_connected() && !self.recover_local(&cancel).await? {
                info!("sync scheduler stopped");
                return Ok(());
            }
        }
    }

    async fn tick(&self, trigger: Trigger) {
        let health = self.orchestrator.health().clone();
        if !health.global().is_connected() {
            let up = tokio::task::spawn_blocking(move || health.reconnect_global())
                .await
                .unwrap_or(false);
            if !up {
                debug!("chain store still unreachable");
            }
        }

        let orchestrator = self.orchestrator.clone();
        if let Err(e) = tokio::task::spawn_blocking(move || orchestrator.run_pass(trigger)).await {
            error!(error = %e, "sync pass task failed");
        }
    }

    /// `Ok(false)` when cancelled during the backoff.
    async fn recover_local(&self, cancel: &CancellationToken) -> Result<bool, SyncError> {
        warn!(
            backoff_ms = self.local_backoff.as_millis() as u64,
            "local store lost, reopening after backoff"
        );
        tokio::select! {
            () = cancel.cancelled() => return Ok(false),
            () = tokio::time::sleep(self.local_backoff) => {}
        }

        let health = self.orchestrator.health().clone();
        let reopened = tokio::task::spawn_blocking(move || health.local().connect())
            .await
            .map_err(|e| SyncError::Invariant(format!("local reconnect task failed: {e}")))?;
        match reopened {
            Ok(()) => {
                info!("local store reopened");
                Ok(true)
            }
            Err(source) => {
                error!(error = %source, "local store could not be reopened");
                Err(SyncError::Store {
                    side: StoreKind::Local,
                    source,
                })
            }
        }
    }
}

use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tracing::{error, info, info_span, warn};

use tillsync_core::{PassId, PassOutcome, PassReport, SkipReason, StageReport, Trigger};
use tillsync_settings::StoreSettings;
use tillsync_store::database;
use tillsync_store::StoreKind;

use crate::health::ConnectionHealth;
use crate::stages::{self, PassContext, Stage};

/// Runs sync passes: one at a time, only while both stores are connected,
/// visiting the entity stages in dependency order.
pub struct SyncOrchestrator {
    health: Arc<ConnectionHealth>,
    store: StoreSettings,
    pipeline: Vec<Box<dyn Stage>>,
    running: Mutex<()>,
}

impl SyncOrchestrator {
    pub fn new(health: Arc<ConnectionHealth>, store: StoreSettings) -> Self {
        Self::with_pipeline(health, store, stages::pipeline())
    }

    pub fn with_pipeline(
        health: Arc<ConnectionHealth>,
        store: StoreSettings,
        pipeline: Vec<Box<dyn Stage>>,
    ) -> Self {
        Self {
            health,
            store,
            pipeline,
            running: Mutex::new(()),
        }
    }

    pub fn health(&self) -> &Arc<ConnectionHealth> {
        &self.health
    }

    pub fn store(&self) -> &StoreSettings {
        &self.store
    }

    pub fn is_running(&self) -> bool {
        self.running.is_locked()
    }

    /// Run one pass. A trigger that arrives while a pass is running is
    /// dropped, not queued.
    pub fn run_pass(&self, trigger: Trigger) -> PassOutcome {
        let Some(_running) = self.running.try_lock() else {
            info!(%trigger, "pass already running, trigger dropped");
            return PassOutcome::Skipped {
                reason: SkipReason::AlreadyRunning,
            };
        };
        let Some(local) = self.health.local().handle() else {
            warn!(%trigger, "local store disconnected, pass skipped");
            return PassOutcome::Skipped {
                reason: SkipReason::LocalDisconnected,
            };
        };
        let Some(chain) = self.health.global().handle() else {
            info!(%trigger, "chain store disconnected, pass skipped");
            return PassOutcome::Skipped {
                reason: SkipReason::GlobalDisconnected,
            };
        };

        let pass_id = PassId::new();
        let span = info_span!("sync_pass", pass_id = %pass_id, %trigger);
        let _enter = span.enter();
        let started = Instant::now();
        let mut report = PassReport {
            pass_id,
            trigger,
            started_at: database::now(),
            duration_ms: 0,
            stages: Vec::with_capacity(self.pipeline.len()),
        };
        let ctx = PassContext::new(local, chain, &self.store);

        for stage in &self.pipeline {
            let entity = stage.entity();
            let stage_span = info_span!("stage", entity = entity.as_str());
            let _stage = stage_span.enter();

            let mut stage_report = StageReport::new(entity);
            let result = stage.run(&ctx, &mut stage_report);
            info!(
                selected = stage_report.selected,
                synced = stage_report.synced,
                skipped = stage_report.skipped,
                "stage finished"
            );
            report.stages.push(stage_report);

            if let Err(e) = result {
                report.duration_ms = started.elapsed().as_millis() as u64;
                let connectivity = e.is_connectivity();
                if connectivity {
                    match e.side() {
                        Some(StoreKind::Local) => self.health.local().mark_failed(),
                        _ => self.health.global().mark_failed(),
                    }
                    warn!(error = %e, "pass aborted on connection loss");
                } else {
                    error!(error = %e, "pass aborted");
                }
                return PassOutcome::Aborted {
                    report,
                    stage: entity,
                    error: e.to_string(),
                    connectivity,
                };
            }
        }

        report.duration_ms = started.elapsed().as_millis() as u64;
        info!(
            synced = report.total_synced(),
            duration_ms = report.duration_ms,
            "pass completed"
        );
        PassOutcome::Completed(report)
    }
}

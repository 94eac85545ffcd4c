//! Best-effort audit trail of every write a pass makes.

use tracing::warn;

use tillsync_core::{AuditEntry, TransactionId};
use tillsync_store::audit::AuditRepo;
use tillsync_store::Database;

/// Writes audit entries for sync operations into the local audit trail.
///
/// Best-effort: a failed write is logged and dropped, never returned to the
/// synchronizer that described the change.
pub struct AuditRecorder {
    repo: AuditRepo,
    actor: String,
}

impl AuditRecorder {
    pub fn new(local: Database, actor: impl Into<String>) -> Self {
        Self {
            repo: AuditRepo::new(local),
            actor: actor.into(),
        }
    }

    pub fn record(&self, entry: AuditEntry) {
        if let Err(e) = self.repo.append(&entry) {
            warn!(
                table = %entry.table_name,
                entity_id = entry.entity_id,
                action = %entry.action,
                error = %e,
                "audit write dropped"
            );
        }
    }

    pub fn inserted(&self, txn: &TransactionId, table: &str, entity_id: i64, snapshot: &serde_json::Value) {
        self.record(AuditEntry::insert(txn, table, entity_id, snapshot, &self.actor));
    }

    pub fn updated(
        &self,
        txn: &TransactionId,
        table: &str,
        entity_id: i64,
        field: &str,
        old: Option<impl ToString>,
        new: Option<impl ToString>,
    ) {
        self.record(AuditEntry::update(
            txn,
            table,
            entity_id,
            field,
            old.map(|v| v.to_string()),
            new.map(|v| v.to_string()),
            &self.actor,
        ));
    }
}

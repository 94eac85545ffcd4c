use tracing::instrument;

use tillsync_core::{AuditEntry, AuditRecord, TransactionId};

use crate::database::{self, Database};
use crate::error::StoreError;
use crate::row_helpers;

const COLUMNS: &str = "id, transaction_id, table_name, entity_id, field_name, old_value, new_value,
                       action, changed_by, changed_at";

/// Append-only access to the local `audit_trail` table. Rows are never
/// updated or deleted.
pub struct AuditRepo {
    db: Database,
}

impl AuditRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    #[instrument(skip(self, entry), fields(table = %entry.table_name, entity_id = entry.entity_id))]
    pub fn append(&self, entry: &AuditEntry) -> Result<i64, StoreError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO audit_trail (transaction_id, table_name, entity_id, field_name,
                                          old_value, new_value, action, changed_by, changed_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                rusqlite::params![
                    entry.transaction_id.as_str(),
                    entry.table_name,
                    entry.entity_id,
                    entry.field_name,
                    entry.old_value,
                    entry.new_value,
                    entry.action.to_string(),
                    entry.actor,
                    database::now(),
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    /// Most recent entries first.
    #[instrument(skip(self))]
    pub fn list(&self, limit: usize) -> Result<Vec<AuditRecord>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {COLUMNS} FROM audit_trail ORDER BY id DESC LIMIT ?1"
            ))?;
            let mut rows = stmt.query([limit as i64])?;
            collect(&mut rows)
        })
    }

    #[instrument(skip(self))]
    pub fn list_for_entity(&self, table_name: &str, entity_id: i64) -> Result<Vec<AuditRecord>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {COLUMNS} FROM audit_trail WHERE table_name = ?1 AND entity_id = ?2 ORDER BY id"
            ))?;
            let mut rows = stmt.query(rusqlite::params![table_name, entity_id])?;
            collect(&mut rows)
        })
    }

    #[instrument(skip(self))]
    pub fn list_by_transaction(&self, transaction_id: &TransactionId) -> Result<Vec<AuditRecord>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {COLUMNS} FROM audit_trail WHERE transaction_id = ?1 ORDER BY id"
            ))?;
            let mut rows = stmt.query([transaction_id.as_str()])?;
            collect(&mut rows)
        })
    }

    pub fn count(&self) -> Result<i64, StoreError> {
        self.db.with_conn(|conn| {
            Ok(conn.query_row("SELECT COUNT(*) FROM audit_trail", [], |row| row.get(0))?)
        })
    }
}

fn collect(rows: &mut rusqlite::Rows<'_>) -> Result<Vec<AuditRecord>, StoreError> {
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        out.push(row_to_record(row)?);
    }
    Ok(out)
}

fn row_to_record(row: &rusqlite::Row<'_>) -> Result<AuditRecord, StoreError> {
    let transaction_id: String = row_helpers::get(row, 1, "audit_trail", "transaction_id")?;
    Ok(AuditRecord {
        id: row_helpers::get(row, 0, "audit_trail", "id")?,
        entry: AuditEntry {
            transaction_id: TransactionId::from_raw(transaction_id),
            table_name: row_helpers::get(row, 2, "audit_trail", "table_name")?,
            entity_id: row_helpers::get(row, 3, "audit_trail", "entity_id")?,
            field_name: row_helpers::get_opt(row, 4, "audit_trail", "field_name")?,
            old_value: row_helpers::get_opt(row, 5, "audit_trail", "old_value")?,
            new_value: row_helpers::get_opt(row, 6, "audit_trail", "new_value")?,
            action: row_helpers::parse_enum(row, 7, "audit_trail", "action")?,
            actor: row_helpers::get(row, 8, "audit_trail", "changed_by")?,
        },
        changed_at: row_helpers::get(row, 9, "audit_trail", "changed_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::StoreKind;
    use tillsync_core::AuditAction;

    fn repo() -> AuditRepo {
        AuditRepo::new(Database::in_memory(StoreKind::Local).unwrap())
    }

    #[test]
    fn append_and_read_back() {
        let repo = repo();
        let txn = TransactionId::new();
        repo.append(&AuditEntry::insert(
            &txn,
            "chain.accounts",
            12,
            &serde_json::json!({"mobile_number": "9999999999"}),
            "system_sync",
        ))
        .unwrap();
        repo.append(&AuditEntry::update(
            &txn,
            "local.accounts",
            3,
            "chain_id",
            None,
            Some("12".into()),
            "system_sync",
        ))
        .unwrap();

        let grouped = repo.list_by_transaction(&txn).unwrap();
        assert_eq!(grouped.len(), 2);
        assert_eq!(grouped[0].entry.action, AuditAction::Insert);
        assert_eq!(grouped[1].entry.field_name.as_deref(), Some("chain_id"));
        assert_eq!(grouped[1].entry.actor, "system_sync");

        let for_local = repo.list_for_entity("local.accounts", 3).unwrap();
        assert_eq!(for_local.len(), 1);
        assert_eq!(for_local[0].entry.new_value.as_deref(), Some("12"));
    }

    #[test]
    fn list_is_newest_first_and_limited() {
        let repo = repo();
        let txn = TransactionId::new();
        for id in 1..=3 {
            repo.append(&AuditEntry::update(&txn, "local.products", id, "is_synced", None, None, "a"))
                .unwrap();
        }
        let recent = repo.list(2).unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].entry.entity_id, 3);
        assert_eq!(repo.count().unwrap(), 3);
    }
}

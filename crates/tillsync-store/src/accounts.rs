use serde::{Deserialize, Serialize};
use tracing::instrument;

use tillsync_core::{Account, ChainId, LocalId};

use crate::database::{self, Database};
use crate::error::StoreError;
use crate::row_helpers::{self, Selected};

const COLUMNS: &str = "id, mobile_number, email, name, address, total_points, store_id, created_at,
                       chain_id, is_synced, last_synced_at";

/// Fields for a new local account. Written with the sync flag cleared.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct NewAccount {
    pub mobile_number: String,
    pub email: Option<String>,
    pub name: Option<String>,
    pub address: Option<String>,
    pub total_points: i64,
    pub store_id: i64,
}

/// The chain's copy of an account's mutable fields. Once a mapping exists the
/// chain is authoritative for these.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainAccountFields {
    pub email: Option<String>,
    pub name: Option<String>,
    pub address: Option<String>,
    pub total_points: i64,
}

pub struct AccountRepo {
    db: Database,
}

impl AccountRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    #[instrument(skip(self, account), fields(mobile = %account.mobile_number))]
    pub fn create(&self, account: &NewAccount) -> Result<Account, StoreError> {
        let now = database::now();
        let id = self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO accounts (mobile_number, email, name, address, total_points, store_id, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                rusqlite::params![
                    account.mobile_number,
                    account.email,
                    account.name,
                    account.address,
                    account.total_points,
                    account.store_id,
                    now,
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })?;
        self.get(id)
    }

    #[instrument(skip(self))]
    pub fn get(&self, id: LocalId) -> Result<Account, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!("SELECT {COLUMNS} FROM accounts WHERE id = ?1"))?;
            let mut rows = stmt.query([id])?;
            match rows.next()? {
                Some(row) => row_to_account(row),
                None => Err(StoreError::NotFound(format!("account {id}"))),
            }
        })
    }

    #[instrument(skip(self))]
    pub fn find_by_mobile(&self, mobile_number: &str) -> Result<Option<Account>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {COLUMNS} FROM accounts WHERE mobile_number = ?1 ORDER BY id LIMIT 1"
            ))?;
            let mut rows = stmt.query([mobile_number])?;
            rows.next()?.map(row_to_account).transpose()
        })
    }

    /// Accounts never mapped to the chain. A row whose mapping was written but
    /// whose flag update failed is not picked up again.
    #[instrument(skip(self))]
    pub fn list_unsynced(&self) -> Result<Vec<Selected<Account>>, StoreError> {
        self.db.with_conn(|conn| {
            row_helpers::select_each(
                conn,
                &format!("SELECT {COLUMNS} FROM accounts WHERE is_synced = 0 AND chain_id IS NULL ORDER BY id"),
                [],
                "accounts",
                row_to_account,
            )
        })
    }

    /// Chain id of an already-synced account, `None` if the account has not
    /// been mapped yet.
    #[instrument(skip(self))]
    pub fn chain_id(&self, id: LocalId) -> Result<Option<ChainId>, StoreError> {
        self.db.with_conn(|conn| {
            conn.query_row("SELECT chain_id FROM accounts WHERE id = ?1", [id], |row| row.get(0))
                .map_err(|e| match e {
                    rusqlite::Error::QueryReturnedNoRows => {
                        StoreError::NotFound(format!("account {id}"))
                    }
                    other => other.into(),
                })
        })
    }

    /// Record a fresh chain mapping.
    #[instrument(skip(self))]
    pub fn mark_synced(&self, id: LocalId, chain_id: ChainId) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE accounts SET chain_id = ?1, last_synced_at = ?2, is_synced = 1 WHERE id = ?3",
                rusqlite::params![chain_id, database::now(), id],
            )?;
            expect_one(changed, id)
        })
    }

    /// Record a mapping to an existing chain account and take the chain's copy
    /// of the mutable fields.
    #[instrument(skip(self, fields))]
    pub fn adopt_chain_copy(
        &self,
        id: LocalId,
        chain_id: ChainId,
        fields: &ChainAccountFields,
    ) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE accounts
                 SET chain_id = ?1, email = ?2, name = ?3, address = ?4, total_points = ?5,
                     last_synced_at = ?6, is_synced = 1
                 WHERE id = ?7",
                rusqlite::params![
                    chain_id,
                    fields.email,
                    fields.name,
                    fields.address,
                    fields.total_points,
                    database::now(),
                    id,
                ],
            )?;
            expect_one(changed, id)
        })
    }
}

fn expect_one(changed: usize, id: LocalId) -> Result<(), StoreError> {
    if changed == 0 {
        Err(StoreError::NotFound(format!("account {id}")))
    } else {
        Ok(())
    }
}

fn row_to_account(row: &rusqlite::Row<'_>) -> Result<Account, StoreError> {
    Ok(Account {
        id: row_helpers::get(row, 0, "accounts", "id")?,
        mobile_number: row_helpers::get(row, 1, "accounts", "mobile_number")?,
        email: row_helpers::get_opt(row, 2, "accounts", "email")?,
        name: row_helpers::get_opt(row, 3, "accounts", "name")?,
        address: row_helpers::get_opt(row, 4, "accounts", "address")?,
        total_points: row_helpers::get(row, 5, "accounts", "total_points")?,
        store_id: row_helpers::get(row, 6, "accounts", "store_id")?,
        created_at: row_helpers::get(row, 7, "accounts", "created_at")?,
        sync: row_helpers::sync_meta(row, 8, "accounts")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::StoreKind;

    fn repo() -> AccountRepo {
        AccountRepo::new(Database::in_memory(StoreKind::Local).unwrap())
    }

    fn new_account(mobile: &str) -> NewAccount {
        NewAccount {
            mobile_number: mobile.into(),
            name: Some("Asha".into()),
            store_id: 1,
            ..Default::default()
        }
    }

    #[test]
    fn create_starts_unsynced() {
        let repo = repo();
        let acct = repo.create(&new_account("9999999999")).unwrap();
        assert_eq!(acct.mobile_number, "9999999999");
        assert!(!acct.sync.is_synced);
        assert!(acct.sync.chain_id.is_none());
    }

    #[test]
    fn get_nonexistent_fails() {
        assert!(matches!(repo().get(404), Err(StoreError::NotFound(_))));
    }

    #[test]
    fn mark_synced_removes_from_unsynced() {
        let repo = repo();
        let a = repo.create(&new_account("1")).unwrap();
        let b = repo.create(&new_account("2")).unwrap();
        repo.mark_synced(a.id, 500).unwrap();

        let pending = repo.list_unsynced().unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, b.id);
        assert_eq!(pending[0].row.as_ref().unwrap().mobile_number, "2");

        let a = repo.get(a.id).unwrap();
        assert_eq!(a.sync.chain_id, Some(500));
        assert!(a.sync.is_synced);
        assert!(a.sync.last_synced_at.is_some());
    }

    #[test]
    fn mapped_but_unflagged_row_is_not_reselected() {
        let repo = repo();
        let a = repo.create(&new_account("1")).unwrap();
        repo.db
            .with_conn(|conn| {
                conn.execute("UPDATE accounts SET chain_id = 9 WHERE id = ?1", [a.id])?;
                Ok(())
            })
            .unwrap();
        assert!(repo.list_unsynced().unwrap().is_empty());
    }

    #[test]
    fn malformed_row_is_selected_as_error() {
        let repo = repo();
        let good = repo.create(&new_account("1")).unwrap();
        let bad = repo.create(&new_account("2")).unwrap();
        repo.db
            .with_conn(|conn| {
                conn.execute("UPDATE accounts SET total_points = 'oops' WHERE id = ?1", [bad.id])?;
                Ok(())
            })
            .unwrap();

        let pending = repo.list_unsynced().unwrap();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].row.as_ref().unwrap().id, good.id);
        assert_eq!(pending[1].id, bad.id);
        assert!(matches!(
            pending[1].row,
            Err(StoreError::CorruptRow { column: "total_points", .. })
        ));
    }

    #[test]
    fn adopt_chain_copy_overwrites_mutable_fields() {
        let repo = repo();
        let a = repo.create(&new_account("1")).unwrap();
        let fields = ChainAccountFields {
            email: Some("asha@example.com".into()),
            name: Some("Asha K".into()),
            address: None,
            total_points: 120,
        };
        repo.adopt_chain_copy(a.id, 77, &fields).unwrap();

        let a = repo.get(a.id).unwrap();
        assert_eq!(a.sync.chain_id, Some(77));
        assert_eq!(a.email.as_deref(), Some("asha@example.com"));
        assert_eq!(a.name.as_deref(), Some("Asha K"));
        assert_eq!(a.total_points, 120);
        assert_eq!(a.store_id, 1);
    }

    #[test]
    fn chain_id_lookup() {
        let repo = repo();
        let a = repo.create(&new_account("1")).unwrap();
        assert_eq!(repo.chain_id(a.id).unwrap(), None);
        repo.mark_synced(a.id, 3).unwrap();
        assert_eq!(repo.chain_id(a.id).unwrap(), Some(3));
        assert!(matches!(repo.chain_id(999), Err(StoreError::NotFound(_))));
    }

    #[test]
    fn find_by_mobile() {
        let repo = repo();
        repo.create(&new_account("5550001")).unwrap();
        assert!(repo.find_by_mobile("5550001").unwrap().is_some());
        assert!(repo.find_by_mobile("nope").unwrap().is_none());
    }
}

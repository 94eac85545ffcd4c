use rusqlite::{Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use tillsync_core::{ActivityType, ChainId, LocalId, LoyaltyEvent};

use crate::database::{self, Database};
use crate::error::StoreError;
use crate::row_helpers::{self, Selected};

const COLUMNS: &str = "id, account_id, activity_type, order_id, points, balance_after, description,
                       created_at, chain_id, is_synced, last_synced_at";

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NewLoyaltyEvent {
    pub account_id: LocalId,
    pub activity: ActivityType,
    pub order_id: Option<LocalId>,
    /// Signed delta; redemptions are negative.
    pub points: i64,
    pub description: Option<String>,
}

/// Append an event to the local ledger on an open connection or transaction.
///
/// `balance_after` is the account's previous running balance plus `points`.
/// The account's `total_points` is updated to the same value.
pub fn append_event(conn: &Connection, event: &NewLoyaltyEvent) -> Result<LoyaltyEvent, StoreError> {
    let balance_after = latest_balance_on(conn, event.account_id)? + event.points;
    let now = database::now();
    conn.execute(
        "INSERT INTO points_events (account_id, activity_type, order_id, points, balance_after,
                                    description, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        rusqlite::params![
            event.account_id,
            event.activity.to_string(),
            event.order_id,
            event.points,
            balance_after,
            event.description,
            now,
        ],
    )?;
    let id = conn.last_insert_rowid();
    conn.execute(
        "UPDATE accounts SET total_points = ?1 WHERE id = ?2",
        rusqlite::params![balance_after, event.account_id],
    )?;
    get_on(conn, id)
}

pub(crate) fn latest_balance_on(conn: &Connection, account_id: LocalId) -> Result<i64, StoreError> {
    let balance = conn
        .query_row(
            "SELECT balance_after FROM points_events
             WHERE account_id = ?1 ORDER BY created_at DESC, id DESC LIMIT 1",
            [account_id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(balance.unwrap_or(0))
}

fn get_on(conn: &Connection, id: LocalId) -> Result<LoyaltyEvent, StoreError> {
    let mut stmt = conn.prepare(&format!("SELECT {COLUMNS} FROM points_events WHERE id = ?1"))?;
    let mut rows = stmt.query([id])?;
    match rows.next()? {
        Some(row) => row_to_event(row),
        None => Err(StoreError::NotFound(format!("points event {id}"))),
    }
}

pub struct LoyaltyRepo {
    db: Database,
}

impl LoyaltyRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    #[instrument(skip(self, event), fields(account_id = event.account_id, points = event.points))]
    pub fn append(&self, event: &NewLoyaltyEvent) -> Result<LoyaltyEvent, StoreError> {
        self.db.with_tx(|tx| append_event(tx, event))
    }

    #[instrument(skip(self))]
    pub fn get(&self, id: LocalId) -> Result<LoyaltyEvent, StoreError> {
        self.db.with_conn(|conn| get_on(conn, id))
    }

    /// Running balance after the account's most recent event; 0 for an empty ledger.
    #[instrument(skip(self))]
    pub fn latest_balance(&self, account_id: LocalId) -> Result<i64, StoreError> {
        self.db.with_conn(|conn| latest_balance_on(conn, account_id))
    }

    /// Latest local balance for a mobile number, `None` when no account has it.
    #[instrument(skip(self))]
    pub fn balance_for_mobile(&self, mobile_number: &str) -> Result<Option<i64>, StoreError> {
        self.db.with_conn(|conn| {
            let account_id: Option<LocalId> = conn
                .query_row(
                    "SELECT id FROM accounts WHERE mobile_number = ?1 ORDER BY id LIMIT 1",
                    [mobile_number],
                    |row| row.get(0),
                )
                .optional()?;
            account_id.map(|id| latest_balance_on(conn, id)).transpose()
        })
    }

    /// Unsynced events in ledger order.
    #[instrument(skip(self))]
    pub fn list_unsynced(&self) -> Result<Vec<Selected<LoyaltyEvent>>, StoreError> {
        self.db.with_conn(|conn| {
            row_helpers::select_each(
                conn,
                &format!("SELECT {COLUMNS} FROM points_events WHERE is_synced = 0 ORDER BY created_at, id"),
                [],
                "points_events",
                row_to_event,
            )
        })
    }

    /// Owning account of an event, read on its own so it is available even
    /// when the rest of the row does not decode. `None` if unreadable.
    #[instrument(skip(self))]
    pub fn account_of(&self, id: LocalId) -> Result<Option<LocalId>, StoreError> {
        self.db.with_conn(|conn| {
            let raw: Option<rusqlite::types::Value> = conn
                .query_row("SELECT account_id FROM points_events WHERE id = ?1", [id], |row| row.get(0))
                .optional()?;
            Ok(match raw {
                Some(rusqlite::types::Value::Integer(account_id)) => Some(account_id),
                _ => None,
            })
        })
    }

    #[instrument(skip(self))]
    pub fn list_for_account(&self, account_id: LocalId) -> Result<Vec<LoyaltyEvent>, StoreError> {
        self.query(
            &format!(
                "SELECT {COLUMNS} FROM points_events WHERE account_id = ?1 ORDER BY created_at, id"
            ),
            account_id,
        )
    }

    #[instrument(skip(self))]
    pub fn mark_synced(&self, id: LocalId, chain_id: ChainId) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE points_events SET chain_id = ?1, last_synced_at = ?2, is_synced = 1 WHERE id = ?3",
                rusqlite::params![chain_id, database::now(), id],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound(format!("points event {id}")));
            }
            Ok(())
        })
    }

    fn query(&self, sql: &str, account_id: LocalId) -> Result<Vec<LoyaltyEvent>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(sql)?;
            let mut rows = stmt.query([account_id])?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                out.push(row_to_event(row)?);
            }
            Ok(out)
        })
    }
}

fn row_to_event(row: &rusqlite::Row<'_>) -> Result<LoyaltyEvent, StoreError> {
    Ok(LoyaltyEvent {
        id: row_helpers::get(row, 0, "points_events", "id")?,
        account_id: row_helpers::get(row, 1, "points_events", "account_id")?,
        activity: row_helpers::parse_enum(row, 2, "points_events", "activity_type")?,
        order_id: row_helpers::get_opt(row, 3, "points_events", "order_id")?,
        points: row_helpers::get(row, 4, "points_events", "points")?,
        balance_after: row_helpers::get(row, 5, "points_events", "balance_after")?,
        description: row_helpers::get_opt(row, 6, "points_events", "description")?,
        created_at: row_helpers::get(row, 7, "points_events", "created_at")?,
        sync: row_helpers::sync_meta(row, 8, "points_events")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accounts::{AccountRepo, NewAccount};
    use crate::database::StoreKind;

    fn setup() -> (LoyaltyRepo, AccountRepo, LocalId) {
        let db = Database::in_memory(StoreKind::Local).unwrap();
        let accounts = AccountRepo::new(db.clone());
        let acct = accounts
            .create(&NewAccount {
                mobile_number: "9888800000".into(),
                store_id: 1,
                ..Default::default()
            })
            .unwrap();
        (LoyaltyRepo::new(db), accounts, acct.id)
    }

    fn event(account_id: LocalId, activity: ActivityType, points: i64) -> NewLoyaltyEvent {
        NewLoyaltyEvent {
            account_id,
            activity,
            order_id: None,
            points,
            description: None,
        }
    }

    #[test]
    fn running_balance_accumulates() {
        let (repo, accounts, id) = setup();
        let a = repo.append(&event(id, ActivityType::SignupBonus, 50)).unwrap();
        let b = repo.append(&event(id, ActivityType::EarnOrder, 25)).unwrap();
        let c = repo.append(&event(id, ActivityType::Redeem, -30)).unwrap();

        assert_eq!(a.balance_after, 50);
        assert_eq!(b.balance_after, 75);
        assert_eq!(c.balance_after, 45);
        assert_eq!(repo.latest_balance(id).unwrap(), 45);
        assert_eq!(accounts.get(id).unwrap().total_points, 45);
    }

    #[test]
    fn empty_ledger_balance_is_zero() {
        let (repo, _, id) = setup();
        assert_eq!(repo.latest_balance(id).unwrap(), 0);
        assert_eq!(repo.balance_for_mobile("9888800000").unwrap(), Some(0));
        assert_eq!(repo.balance_for_mobile("0000").unwrap(), None);
    }

    #[test]
    fn unsynced_in_ledger_order() {
        let (repo, _, id) = setup();
        let first = repo.append(&event(id, ActivityType::EarnOrder, 10)).unwrap();
        let second = repo.append(&event(id, ActivityType::EarnOrder, 20)).unwrap();
        repo.mark_synced(first.id, 7).unwrap();

        let pending = repo.list_unsynced().unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, second.id);
        assert_eq!(pending[0].row.as_ref().unwrap().points, 20);

        let all = repo.list_for_account(id).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].sync.chain_id, Some(7));
    }

    #[test]
    fn unknown_activity_in_db_is_corrupt_row() {
        let (repo, _, id) = setup();
        let e = repo.append(&event(id, ActivityType::Adjustment, 1)).unwrap();
        repo.db
            .with_conn(|conn| {
                conn.execute("UPDATE points_events SET activity_type = 'cashback' WHERE id = ?1", [e.id])?;
                Ok(())
            })
            .unwrap();
        assert!(matches!(repo.get(e.id), Err(StoreError::CorruptRow { .. })));

        let pending = repo.list_unsynced().unwrap();
        assert_eq!(pending.len(), 1);
        assert!(pending[0].row.is_err());
        assert_eq!(repo.account_of(e.id).unwrap(), Some(id));
    }
}

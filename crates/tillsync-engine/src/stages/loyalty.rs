use std::collections::HashSet;

use serde_json::json;
use tracing::{debug, instrument, warn};

use tillsync_core::{ChainId, EntityKind, LocalId, LoyaltyEvent, StageReport, TransactionId};
use tillsync_store::chain::NewChainPointsEvent;

use super::{settle_row, table, PassContext, Stage};
use crate::error::{StoreResultExt, SyncError};
use crate::identity::insert_or_find;

/// Appends local ledger entries to the chain ledger in creation order.
///
/// The chain balance is recomputed from the full chain ledger after every
/// append, since other stores write to the same account. Once an event of an
/// account is skipped, later events of that account wait for the next pass.
pub struct LoyaltyStage;

impl Stage for LoyaltyStage {
    fn entity(&self) -> EntityKind {
        EntityKind::LoyaltyEvents
    }

    fn run(&self, ctx: &PassContext, report: &mut StageReport) -> Result<(), SyncError> {
        let pending = ctx.loyalty.list_unsynced().local()?;
        report.selected = pending.len();
        let mut blocked: HashSet<LocalId> = HashSet::new();
        for selected in pending {
            let event = match selected.row {
                Ok(event) => event,
                Err(e) => {
                    settle_row(report, selected.id, Err::<(), _>(e).local())?;
                    // Hold back the account's later events, if we can tell whose it is.
                    match ctx.loyalty.account_of(selected.id).local() {
                        Ok(Some(account_id)) => {
                            blocked.insert(account_id);
                        }
                        Ok(None) => {}
                        Err(e) if e.is_connectivity() => return Err(e),
                        Err(e) => warn!(local_id = selected.id, error = %e, "owner of unreadable event unknown"),
                    }
                    continue;
                }
            };
            if blocked.contains(&event.account_id) {
                debug!(local_id = event.id, account_id = event.account_id, "earlier event pending, deferred");
                report.skipped += 1;
                continue;
            }
            if !settle_row(report, event.id, sync_event(ctx, &event))? {
                blocked.insert(event.account_id);
            }
        }
        Ok(())
    }
}

#[instrument(skip_all, fields(local_id = event.id, activity = %event.activity))]
fn sync_event(ctx: &PassContext, event: &LoyaltyEvent) -> Result<(), SyncError> {
    let txn = TransactionId::new();
    let account = ctx.accounts.chain_id(event.account_id).local()?.ok_or_else(|| {
        SyncError::Dependency(format!("account {} has no chain id", event.account_id))
    })?;
    let order = match event.order_id {
        Some(order_id) => Some(ctx.orders.chain_id(order_id).local()?.ok_or_else(|| {
            SyncError::Dependency(format!("order {order_id} has no chain id"))
        })?),
        None => None,
    };

    let new = NewChainPointsEvent {
        event,
        account_id: account,
        order_id: order,
        store_id: ctx.store.store_id,
    };
    let (chain_event, inserted) = insert_or_find(
        || ctx.chain.insert_points_event(&new),
        || ctx.chain.find_points_event(ctx.store.store_id, event.id),
    )
    .chain()?;
    if inserted {
        ctx.audit.inserted(
            &txn,
            table::CHAIN_POINTS_EVENTS,
            chain_event,
            &json!({
                "account_id": account,
                "order_id": order,
                "activity_type": event.activity,
                "points": event.points,
                "balance_after": event.balance_after,
                "store_id": ctx.store.store_id,
                "local_event_id": event.id,
            }),
        );
    }

    let balance = ctx.chain.sum_points(account).chain()?;
    ctx.chain.set_event_balance(chain_event, balance).chain()?;
    ctx.audit.updated(
        &txn,
        table::CHAIN_POINTS_EVENTS,
        chain_event,
        "balance_after",
        Some(event.balance_after),
        Some(balance),
    );

    let previous = ctx.chain.account(account).chain()?.total_points;
    ctx.chain.set_account_points(account, balance).chain()?;
    ctx.audit.updated(
        &txn,
        table::CHAIN_ACCOUNTS,
        account,
        "total_points",
        Some(previous),
        Some(balance),
    );

    ctx.loyalty.mark_synced(event.id, chain_event).local()?;
    ctx.audit.updated(
        &txn,
        table::LOCAL_POINTS_EVENTS,
        event.id,
        "chain_id",
        event.sync.chain_id,
        Some::<ChainId>(chain_event),
    );
    debug!(chain_id = chain_event, balance, "points event synced");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::{AccountStage, OrderStage, ProductStage};
    use crate::testing::Terminal;
    use tillsync_core::ActivityType;
    use tillsync_store::loyalty::NewLoyaltyEvent;
    use tillsync_store::ChainStore;

    fn sync_all(term: &Terminal) -> StageReport {
        let ctx = term.context();
        for stage in [&AccountStage as &dyn Stage, &ProductStage, &OrderStage] {
            stage.run(&ctx, &mut StageReport::new(stage.entity())).unwrap();
        }
        let mut report = StageReport::new(EntityKind::LoyaltyEvents);
        LoyaltyStage.run(&ctx, &mut report).unwrap();
        report
    }

    fn adjust(term: &Terminal, account_id: LocalId, points: i64) {
        term.loyalty()
            .append(&NewLoyaltyEvent {
                account_id,
                activity: ActivityType::Adjustment,
                order_id: None,
                points,
                description: Some("manual".into()),
            })
            .unwrap();
    }

    #[test]
    fn chain_balance_is_sum_across_stores() {
        let first = Terminal::new(1);
        let second = first.sibling(2);

        let a = first.account("6000000001");
        let p = first.product("GHEE-1", 25_000, 8);
        first.sale(a, p, 1); // earns 10
        assert_eq!(sync_all(&first).synced, 1);

        let b = second.account("6000000001");
        adjust(&second, b, 7);
        adjust(&second, b, -3);
        assert_eq!(sync_all(&second).synced, 2);

        let chain_account = first.chain.find_account_by_mobile("6000000001").unwrap().unwrap();
        assert_eq!(chain_account.total_points, 14);
        assert_eq!(first.chain.sum_points(chain_account.id).unwrap(), 14);

        let last = second.loyalty().list_for_account(b).unwrap().pop().unwrap();
        let balance: i64 = first
            .chain
            .database()
            .with_conn(|conn| {
                Ok(conn.query_row(
                    "SELECT balance_after FROM points_events WHERE id = ?1",
                    [last.sync.chain_id.unwrap()],
                    |row| row.get(0),
                )?)
            })
            .unwrap();
        assert_eq!(balance, 14);
    }

    #[test]
    fn unsynced_account_defers_its_events_only() {
        let term = Terminal::new(1);
        let ready = term.account("6000000002");
        let waiting = term.account("6000000003");
        adjust(&term, ready, 5);
        adjust(&term, waiting, 2);
        adjust(&term, waiting, 4);

        let ctx = term.context();
        // Map only the first account.
        let chain_id = ctx.chain.insert_account(&term.accounts().get(ready).unwrap()).unwrap();
        term.accounts().mark_synced(ready, chain_id).unwrap();

        let mut report = StageReport::new(EntityKind::LoyaltyEvents);
        LoyaltyStage.run(&ctx, &mut report).unwrap();
        assert_eq!((report.selected, report.synced, report.skipped), (3, 1, 2));
        assert!(term.loyalty().list_for_account(waiting).unwrap().iter().all(|e| !e.sync.is_synced));
    }

    #[test]
    fn unreadable_event_defers_its_account_only() {
        let term = Terminal::new(1);
        let damaged = term.account("6000000004");
        let healthy = term.account("6000000005");
        adjust(&term, damaged, 3);
        adjust(&term, damaged, 4);
        adjust(&term, healthy, 9);
        let first = term.loyalty().list_for_account(damaged).unwrap()[0].id;
        term.corrupt("UPDATE points_events SET activity_type = 'cashback' WHERE id = ?1", first);

        let ctx = term.context();
        AccountStage.run(&ctx, &mut StageReport::new(EntityKind::Accounts)).unwrap();
        let mut report = StageReport::new(EntityKind::LoyaltyEvents);
        LoyaltyStage.run(&ctx, &mut report).unwrap();
        assert_eq!((report.selected, report.synced, report.skipped), (3, 1, 2));

        let chain = term.chain.find_account_by_mobile("6000000005").unwrap().unwrap();
        assert_eq!(term.chain.sum_points(chain.id).unwrap(), 9);
        assert_eq!(term.chain_count("points_events"), 1);
    }
}

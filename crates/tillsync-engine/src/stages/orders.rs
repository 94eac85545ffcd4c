use serde_json::json;
use tracing::{debug, error, instrument, warn};

use tillsync_core::{ChainId, EntityKind, Order, OrderItem, StageReport, TransactionId};
use tillsync_store::chain::{NewChainOrder, NewChainOrderItem};

use super::{settle_row, table, PassContext, Stage};
use crate::error::{StoreResultExt, SyncError};
use crate::identity::insert_or_find;

/// Pushes completed sales and their line items.
///
/// The chain order is created first and its id recorded locally straight
/// away, so a later pass that finishes the items reuses it. The local order is
/// flagged synced only once every item is.
pub struct OrderStage;

impl Stage for OrderStage {
    fn entity(&self) -> EntityKind {
        EntityKind::Orders
    }

    fn run(&self, ctx: &PassContext, report: &mut StageReport) -> Result<(), SyncError> {
        let pending = ctx.orders.list_unsynced().local()?;
        report.selected = pending.len();
        for selected in pending {
            let result = selected.row.local().and_then(|order| sync_order(ctx, &order));
            settle_row(report, selected.id, result)?;
        }
        Ok(())
    }
}

#[instrument(skip_all, fields(local_id = order.id))]
fn sync_order(ctx: &PassContext, order: &Order) -> Result<(), SyncError> {
    let txn = TransactionId::new();
    let chain_order = match order.sync.chain_id {
        Some(id) => id,
        None => create_chain_order(ctx, &txn, order)?,
    };

    let items = ctx.orders.unsynced_items(order.id).local()?;
    let total = items.len();
    let mut blocked = 0;
    for selected in items {
        let result = selected
            .row
            .local()
            .and_then(|item| sync_item(ctx, &txn, &item, chain_order));
        match result {
            Ok(()) => {}
            Err(e) if e.is_connectivity() => return Err(e),
            Err(e) => {
                if e.is_invariant() {
                    error!(item_id = selected.id, error = %e, "order item skipped");
                } else {
                    warn!(item_id = selected.id, error = %e, "order item skipped");
                }
                blocked += 1;
            }
        }
    }
    if blocked > 0 {
        return Err(SyncError::Dependency(format!(
            "{blocked} of {total} items of order {} not synced",
            order.id
        )));
    }

    ctx.orders.mark_synced(order.id).local()?;
    ctx.audit.updated(&txn, table::LOCAL_ORDERS, order.id, "is_synced", Some(0), Some(1));
    debug!(chain_id = chain_order, items = total, "order synced");
    Ok(())
}

fn create_chain_order(ctx: &PassContext, txn: &TransactionId, order: &Order) -> Result<ChainId, SyncError> {
    let account = ctx.accounts.chain_id(order.account_id).local()?.ok_or_else(|| {
        SyncError::Dependency(format!("account {} has no chain id", order.account_id))
    })?;
    let new = NewChainOrder {
        order,
        account_id: account,
        store_id: ctx.store.store_id,
        pos_id: ctx.store.pos_id,
    };
    let (chain_id, inserted) = insert_or_find(
        || ctx.chain.insert_order(&new),
        || ctx.chain.find_order(ctx.store.store_id, order.id),
    )
    .chain()?;

    if inserted {
        ctx.audit.inserted(
            txn,
            table::CHAIN_ORDERS,
            chain_id,
            &json!({
                "local_order_id": order.id,
                "account_id": account,
                "store_id": ctx.store.store_id,
                "pos_id": ctx.store.pos_id,
                "status": order.status,
                "total_cents": order.total_cents,
                "payment_method": order.payment_method,
            }),
        );
    }
    ctx.orders.set_chain_id(order.id, chain_id).local()?;
    ctx.audit.updated(txn, table::LOCAL_ORDERS, order.id, "chain_id", None::<ChainId>, Some(chain_id));
    Ok(chain_id)
}

fn sync_item(
    ctx: &PassContext,
    txn: &TransactionId,
    item: &OrderItem,
    chain_order: ChainId,
) -> Result<(), SyncError> {
    // Products sync before orders, so a missing mapping here is bad data.
    let product = ctx.products.chain_id(item.product_id).local()?.ok_or_else(|| {
        SyncError::Invariant(format!("product {} of item {} has no chain id", item.product_id, item.id))
    })?;
    let new = NewChainOrderItem {
        item,
        order_id: chain_order,
        product_id: product,
    };
    let (chain_id, inserted) = insert_or_find(
        || ctx.chain.insert_order_item(&new),
        || ctx.chain.find_order_item(chain_order, item.id),
    )
    .chain()?;

    if inserted {
        ctx.audit.inserted(
            txn,
            table::CHAIN_ORDER_ITEMS,
            chain_id,
            &json!({
                "order_id": chain_order,
                "product_id": product,
                "sku": item.sku,
                "quantity": item.quantity,
                "adjusted_price_cents": item.adjusted_price_cents,
                "local_item_id": item.id,
            }),
        );
    }
    ctx.orders.mark_item_synced(item.id, chain_id, chain_order).local()?;
    ctx.audit.updated(
        txn,
        table::LOCAL_ORDER_ITEMS,
        item.id,
        "chain_id",
        item.sync.chain_id,
        Some(chain_id),
    );
    Ok(())
}

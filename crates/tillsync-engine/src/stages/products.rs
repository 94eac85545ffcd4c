use serde_json::json;
use tracing::{debug, instrument};

use tillsync_core::{EntityKind, Product, StageReport, TransactionId};

use super::{settle_row, table, PassContext, Stage};
use crate::error::{StoreResultExt, SyncError};
use crate::identity::{self, ProductResolution};

/// Pushes catalog rows to the chain by `(sku, store_id)`. Local price and
/// quantity always win over the chain's copy.
pub struct ProductStage;

impl Stage for ProductStage {
    fn entity(&self) -> EntityKind {
        EntityKind::Products
    }

    fn run(&self, ctx: &PassContext, report: &mut StageReport) -> Result<(), SyncError> {
        let pending = ctx.products.list_unsynced().local()?;
        report.selected = pending.len();
        for selected in pending {
            let result = selected.row.local().and_then(|product| sync_product(ctx, &product));
            settle_row(report, selected.id, result)?;
        }
        Ok(())
    }
}

#[instrument(skip_all, fields(local_id = product.id, sku = %product.sku))]
fn sync_product(ctx: &PassContext, product: &Product) -> Result<(), SyncError> {
    let txn = TransactionId::new();
    let resolution = identity::resolve_product(ctx.chain.as_ref(), product).chain()?;
    let chain_id = resolution.chain_id();

    match &resolution {
        ProductResolution::Created(_) => ctx.audit.inserted(
            &txn,
            table::CHAIN_PRODUCTS,
            chain_id,
            &json!({
                "sku": product.sku,
                "store_id": product.store_id,
                "name": product.name,
                "category": product.category,
                "brand": product.brand,
                "sale_price_cents": product.sale_price_cents,
                "market_price_cents": product.market_price_cents,
                "quantity": product.quantity,
                "local_product_id": product.id,
            }),
        ),
        ProductResolution::Updated(previous) => {
            if previous.sale_price_cents != product.sale_price_cents {
                ctx.audit.updated(
                    &txn,
                    table::CHAIN_PRODUCTS,
                    chain_id,
                    "sale_price_cents",
                    Some(previous.sale_price_cents),
                    Some(product.sale_price_cents),
                );
            }
            if previous.quantity != product.quantity {
                ctx.audit.updated(
                    &txn,
                    table::CHAIN_PRODUCTS,
                    chain_id,
                    "quantity",
                    Some(previous.quantity),
                    Some(product.quantity),
                );
            }
        }
    }

    if !ctx.products.mark_synced(product, chain_id).local()? {
        debug!(chain_id, "product changed during sync, left pending");
    }
    if product.sync.chain_id != Some(chain_id) {
        ctx.audit.updated(
            &txn,
            table::LOCAL_PRODUCTS,
            product.id,
            "chain_id",
            product.sync.chain_id,
            Some(chain_id),
        );
    }
    debug!(chain_id, created = matches!(resolution, ProductResolution::Created(_)), "product synced");
    Ok(())
}

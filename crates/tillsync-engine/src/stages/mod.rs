//! The four entity synchronizers and the order a pass runs them in.
//!
//! Every stage selects unsynced local rows, pushes each one to the chain store
//! and writes the chain id back. Row failures are settled by [`settle_row`]:
//! connectivity errors abort the stage (and with it the pass), anything else
//! skips the row and the batch continues.

mod accounts;
mod loyalty;
mod orders;
mod products;

pub use accounts::AccountStage;
pub use loyalty::LoyaltyStage;
pub use orders::OrderStage;
pub use products::ProductStage;

use std::sync::Arc;

use tracing::{error, warn};

use tillsync_core::{EntityKind, LocalId, StageReport};
use tillsync_settings::StoreSettings;
use tillsync_store::accounts::AccountRepo;
use tillsync_store::loyalty::LoyaltyRepo;
use tillsync_store::orders::OrderRepo;
use tillsync_store::products::ProductRepo;
use tillsync_store::{ChainStore, Database};

use crate::audit::AuditRecorder;
use crate::error::SyncError;

/// Audit table names, qualified by the store they describe.
pub(crate) mod table {
    pub const CHAIN_ACCOUNTS: &str = "chain.accounts";
    pub const CHAIN_PRODUCTS: &str = "chain.products";
    pub const CHAIN_ORDERS: &str = "chain.orders";
    pub const CHAIN_ORDER_ITEMS: &str = "chain.order_items";
    pub const CHAIN_POINTS_EVENTS: &str = "chain.points_events";
    pub const LOCAL_ACCOUNTS: &str = "local.accounts";
    pub const LOCAL_PRODUCTS: &str = "local.products";
    pub const LOCAL_ORDERS: &str = "local.orders";
    pub const LOCAL_ORDER_ITEMS: &str = "local.order_items";
    pub const LOCAL_POINTS_EVENTS: &str = "local.points_events";
}

/// Handles shared by every stage of one pass.
pub struct PassContext {
    pub chain: Arc<dyn ChainStore>,
    pub store: StoreSettings,
    pub audit: AuditRecorder,
    pub accounts: AccountRepo,
    pub products: ProductRepo,
    pub orders: OrderRepo,
    pub loyalty: LoyaltyRepo,
}

impl PassContext {
    pub fn new(local: Database, chain: Arc<dyn ChainStore>, store: &StoreSettings) -> Self {
        Self {
            chain,
            audit: AuditRecorder::new(local.clone(), store.actor.clone()),
            store: store.clone(),
            accounts: AccountRepo::new(local.clone()),
            products: ProductRepo::new(local.clone()),
            orders: OrderRepo::new(local.clone()),
            loyalty: LoyaltyRepo::new(local),
        }
    }
}

pub trait Stage: Send + Sync {
    fn entity(&self) -> EntityKind;

    /// Sync every pending row. Returns only errors that must abort the pass.
    fn run(&self, ctx: &PassContext, report: &mut StageReport) -> Result<(), SyncError>;
}

/// Accounts, then products, then orders, then loyalty events. Orders need
/// account chain ids; loyalty events need account and order chain ids.
pub fn pipeline() -> Vec<Box<dyn Stage>> {
    vec![
        Box::new(AccountStage),
        Box::new(ProductStage),
        Box::new(OrderStage),
        Box::new(LoyaltyStage),
    ]
}

/// Apply the row error policy. `Ok(true)` when the row synced, `Ok(false)`
/// when it was skipped, `Err` when the pass must stop.
pub(crate) fn settle_row(
    report: &mut StageReport,
    local_id: LocalId,
    result: Result<(), SyncError>,
) -> Result<bool, SyncError> {
    match result {
        Ok(()) => {
            report.synced += 1;
            Ok(true)
        }
        Err(e) if e.is_connectivity() => Err(e),
        Err(e) => {
            if e.is_invariant() {
                error!(local_id, error = %e, "row skipped");
            } else {
                warn!(local_id, error = %e, "row skipped");
            }
            report.skipped += 1;
            Ok(false)
        }
    }
}

use serde_json::json;
use tracing::{debug, instrument};

use tillsync_core::{Account, EntityKind, StageReport, TransactionId};
use tillsync_store::accounts::ChainAccountFields;

use super::{settle_row, table, PassContext, Stage};
use crate::error::{StoreResultExt, SyncError};
use crate::identity::{self, AccountResolution};

/// Maps local accounts to chain accounts by mobile number.
pub struct AccountStage;

impl Stage for AccountStage {
    fn entity(&self) -> EntityKind {
        EntityKind::Accounts
    }

    fn run(&self, ctx: &PassContext, report: &mut StageReport) -> Result<(), SyncError> {
        let pending = ctx.accounts.list_unsynced().local()?;
        report.selected = pending.len();
        for selected in pending {
            let result = selected.row.local().and_then(|account| sync_account(ctx, &account));
            settle_row(report, selected.id, result)?;
        }
        Ok(())
    }
}

#[instrument(skip_all, fields(local_id = account.id))]
fn sync_account(ctx: &PassContext, account: &Account) -> Result<(), SyncError> {
    let txn = TransactionId::new();
    match identity::resolve_account(ctx.chain.as_ref(), account).chain()? {
        AccountResolution::Created(chain_id) => {
            ctx.audit.inserted(
                &txn,
                table::CHAIN_ACCOUNTS,
                chain_id,
                &json!({
                    "mobile_number": account.mobile_number,
                    "email": account.email,
                    "name": account.name,
                    "address": account.address,
                    "total_points": account.total_points,
                    "store_id": account.store_id,
                    "local_account_id": account.id,
                }),
            );
            ctx.accounts.mark_synced(account.id, chain_id).local()?;
            ctx.audit.updated(
                &txn,
                table::LOCAL_ACCOUNTS,
                account.id,
                "chain_id",
                account.sync.chain_id,
                Some(chain_id),
            );
            debug!(chain_id, "account created on chain");
        }
        AccountResolution::Found(found) => {
            let fields = ChainAccountFields {
                email: found.email.clone(),
                name: found.name.clone(),
                address: found.address.clone(),
                total_points: found.total_points,
            };
            ctx.accounts.adopt_chain_copy(account.id, found.id, &fields).local()?;

            let audit_field = |field: &str, old: Option<String>, new: Option<String>| {
                if old != new {
                    ctx.audit.updated(&txn, table::LOCAL_ACCOUNTS, account.id, field, old, new);
                }
            };
            audit_field("chain_id", account.sync.chain_id.map(|v| v.to_string()), Some(found.id.to_string()));
            audit_field("email", account.email.clone(), found.email);
            audit_field("name", account.name.clone(), found.name);
            audit_field("address", account.address.clone(), found.address);
            audit_field(
                "total_points",
                Some(account.total_points.to_string()),
                Some(found.total_points.to_string()),
            );
            debug!(chain_id = found.id, "account mapped to existing chain account");
        }
    }
    Ok(())
}

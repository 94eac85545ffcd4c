//! Maps local accounts and products to their chain-wide counterparts by natural key.

use tracing::{debug, instrument};

use tillsync_core::{Account, ChainId, Product};
use tillsync_store::chain::{ChainAccount, ChainProduct};
use tillsync_store::{ChainStore, StoreError};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AccountResolution {
    /// The chain already knew the mobile number; its copy of the mutable fields wins.
    Found(ChainAccount),
    Created(ChainId),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProductResolution {
    /// Existing chain product whose price and quantity were overwritten with
    /// the local values. Carries the chain values from before the update.
    Updated(ChainProduct),
    Created(ChainId),
}

impl ProductResolution {
    pub fn chain_id(&self) -> ChainId {
        match self {
            Self::Updated(previous) => previous.id,
            Self::Created(id) => *id,
        }
    }
}

/// Find the chain account for `account.mobile_number`, creating it from the
/// local row if absent. An insert that loses a race to another store's insert
/// adopts the winner.
#[instrument(skip_all, fields(local_id = account.id))]
pub fn resolve_account(chain: &dyn ChainStore, account: &Account) -> Result<AccountResolution, StoreError> {
    if let Some(found) = chain.find_account_by_mobile(&account.mobile_number)? {
        return Ok(AccountResolution::Found(found));
    }
    match chain.insert_account(account) {
        Ok(id) => Ok(AccountResolution::Created(id)),
        Err(StoreError::Conflict(detail)) => {
            debug!(%detail, "account inserted concurrently, adopting");
            chain
                .find_account_by_mobile(&account.mobile_number)?
                .map(AccountResolution::Found)
                .ok_or(StoreError::Conflict(detail))
        }
        Err(e) => Err(e),
    }
}

/// Find the chain product for `(sku, store_id)` and push the local price and
/// quantity onto it, or create it from the local catalog fields.
#[instrument(skip_all, fields(local_id = product.id, sku = %product.sku))]
pub fn resolve_product(chain: &dyn ChainStore, product: &Product) -> Result<ProductResolution, StoreError> {
    let existing = match chain.find_product(&product.sku, product.store_id)? {
        Some(existing) => existing,
        None => match chain.insert_product(product) {
            Ok(id) => return Ok(ProductResolution::Created(id)),
            Err(StoreError::Conflict(detail)) => {
                debug!(%detail, "product inserted concurrently, adopting");
                chain
                    .find_product(&product.sku, product.store_id)?
                    .ok_or(StoreError::Conflict(detail))?
            }
            Err(e) => return Err(e),
        },
    };
    chain.update_product_stock(existing.id, product.sale_price_cents, product.quantity)?;
    Ok(ProductResolution::Updated(existing))
}

/// Insert a row keyed on its originating local id, or return the row a
/// previous attempt already inserted. The flag is true when this call inserted.
pub fn insert_or_find(
    insert: impl FnOnce() -> Result<ChainId, StoreError>,
    find: impl FnOnce() -> Result<Option<ChainId>, StoreError>,
) -> Result<(ChainId, bool), StoreError> {
    match insert() {
        Ok(id) => Ok((id, true)),
        Err(StoreError::Conflict(detail)) => find()?
            .map(|id| (id, false))
            .ok_or(StoreError::Conflict(detail)),
        Err(e) => Err(e),
    }
}

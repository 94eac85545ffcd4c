//! The chain-wide store as the synchronizers see it.
//!
//! [`ChainStore`] is the seam between the sync engine and whatever hosts the
//! consolidated data. Every write that can be retried is keyed on a natural key
//! or on the originating local id, so a repeated insert surfaces as
//! [`StoreError::Conflict`] and the caller looks the row up instead.

use rusqlite::OptionalExtension;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use tillsync_core::{Account, ChainId, LocalId, LoyaltyEvent, Order, OrderItem, Product};

use crate::database::{self, Database};
use crate::error::StoreError;
use crate::row_helpers;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainAccount {
    pub id: ChainId,
    pub mobile_number: String,
    pub email: Option<String>,
    pub name: Option<String>,
    pub address: Option<String>,
    pub total_points: i64,
    pub store_id: i64,
    pub local_account_id: LocalId,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainProduct {
    pub id: ChainId,
    pub sku: String,
    pub store_id: i64,
    pub sale_price_cents: i64,
    pub quantity: i64,
}

/// A local order with its references already translated to chain ids.
#[derive(Clone, Copy, Debug)]
pub struct NewChainOrder<'a> {
    pub order: &'a Order,
    pub account_id: ChainId,
    pub store_id: i64,
    pub pos_id: i64,
}

#[derive(Clone, Copy, Debug)]
pub struct NewChainOrderItem<'a> {
    pub item: &'a OrderItem,
    pub order_id: ChainId,
    pub product_id: ChainId,
}

#[derive(Clone, Copy, Debug)]
pub struct NewChainPointsEvent<'a> {
    pub event: &'a LoyaltyEvent,
    pub account_id: ChainId,
    pub order_id: Option<ChainId>,
    pub store_id: i64,
}

pub trait ChainStore: Send + Sync {
    fn ping(&self) -> Result<(), StoreError>;

    fn find_account_by_mobile(&self, mobile_number: &str) -> Result<Option<ChainAccount>, StoreError>;
    fn account(&self, id: ChainId) -> Result<ChainAccount, StoreError>;
    fn insert_account(&self, account: &Account) -> Result<ChainId, StoreError>;
    fn set_account_points(&self, id: ChainId, total_points: i64) -> Result<(), StoreError>;

    fn find_product(&self, sku: &str, store_id: i64) -> Result<Option<ChainProduct>, StoreError>;
    fn insert_product(&self, product: &Product) -> Result<ChainId, StoreError>;
    fn update_product_stock(
        &self,
        id: ChainId,
        sale_price_cents: i64,
        quantity: i64,
    ) -> Result<(), StoreError>;

    fn find_order(&self, store_id: i64, local_order_id: LocalId) -> Result<Option<ChainId>, StoreError>;
    fn insert_order(&self, order: &NewChainOrder<'_>) -> Result<ChainId, StoreError>;

    fn find_order_item(&self, order_id: ChainId, local_item_id: LocalId) -> Result<Option<ChainId>, StoreError>;
    fn insert_order_item(&self, item: &NewChainOrderItem<'_>) -> Result<ChainId, StoreError>;

    fn find_points_event(&self, store_id: i64, local_event_id: LocalId) -> Result<Option<ChainId>, StoreError>;
    fn insert_points_event(&self, event: &NewChainPointsEvent<'_>) -> Result<ChainId, StoreError>;
    /// Sum of every chain-side point delta recorded for the account.
    fn sum_points(&self, account_id: ChainId) -> Result<i64, StoreError>;
    fn set_event_balance(&self, id: ChainId, balance_after: i64) -> Result<(), StoreError>;
}

/// [`ChainStore`] over a SQLite database carrying the chain schema.
#[derive(Clone, Debug)]
pub struct SqliteChainStore {
    db: Database,
}

impl SqliteChainStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    fn execute_one(&self, sql: &str, params: impl rusqlite::Params, what: String) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            if conn.execute(sql, params)? == 0 {
                return Err(StoreError::NotFound(what));
            }
            Ok(())
        })
    }

    fn optional_id(&self, sql: &str, params: impl rusqlite::Params) -> Result<Option<ChainId>, StoreError> {
        self.db
            .with_conn(|conn| Ok(conn.query_row(sql, params, |row| row.get(0)).optional()?))
    }
}

const ACCOUNT_COLUMNS: &str =
    "id, mobile_number, email, name, address, total_points, store_id, local_account_id";

impl ChainStore for SqliteChainStore {
    fn ping(&self) -> Result<(), StoreError> {
        self.db.ping()
    }

    #[instrument(skip(self))]
    fn find_account_by_mobile(&self, mobile_number: &str) -> Result<Option<ChainAccount>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE mobile_number = ?1"
            ))?;
            let mut rows = stmt.query([mobile_number])?;
            rows.next()?.map(row_to_account).transpose()
        })
    }

    #[instrument(skip(self))]
    fn account(&self, id: ChainId) -> Result<ChainAccount, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = ?1"))?;
            let mut rows = stmt.query([id])?;
            match rows.next()? {
                Some(row) => row_to_account(row),
                None => Err(StoreError::NotFound(format!("chain account {id}"))),
            }
        })
    }

    #[instrument(skip(self, account), fields(local_id = account.id))]
    fn insert_account(&self, account: &Account) -> Result<ChainId, StoreError> {
        let now = database::now();
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO accounts (mobile_number, email, name, address, total_points, store_id,
                                       local_account_id, created_at, last_synced_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                rusqlite::params![
                    account.mobile_number,
                    account.email,
                    account.name,
                    account.address,
                    account.total_points,
                    account.store_id,
                    account.id,
                    account.created_at,
                    now,
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    #[instrument(skip(self))]
    fn set_account_points(&self, id: ChainId, total_points: i64) -> Result<(), StoreError> {
        self.execute_one(
            "UPDATE accounts SET total_points = ?1, last_synced_at = ?2 WHERE id = ?3",
            rusqlite::params![total_points, database::now(), id],
            format!("chain account {id}"),
        )
    }

    #[instrument(skip(self))]
    fn find_product(&self, sku: &str, store_id: i64) -> Result<Option<ChainProduct>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, sku, store_id, sale_price_cents, quantity
                 FROM products WHERE sku = ?1 AND store_id = ?2",
            )?;
            let mut rows = stmt.query(rusqlite::params![sku, store_id])?;
            rows.next()?
                .map(|row| -> Result<ChainProduct, StoreError> {
                    Ok(ChainProduct {
                        id: row_helpers::get(row, 0, "products", "id")?,
                        sku: row_helpers::get(row, 1, "products", "sku")?,
                        store_id: row_helpers::get(row, 2, "products", "store_id")?,
                        sale_price_cents: row_helpers::get(row, 3, "products", "sale_price_cents")?,
                        quantity: row_helpers::get(row, 4, "products", "quantity")?,
                    })
                })
                .transpose()
        })
    }

    #[instrument(skip(self, product), fields(sku = %product.sku))]
    fn insert_product(&self, product: &Product) -> Result<ChainId, StoreError> {
        let now = database::now();
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO products (sku, store_id, name, category, sub_category, brand, product_type,
                                       description, rating, category_id, sale_price_cents,
                                       market_price_cents, quantity, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
                rusqlite::params![
                    product.sku,
                    product.store_id,
                    product.name,
                    product.category,
                    product.sub_category,
                    product.brand,
                    product.product_type,
                    product.description,
                    product.rating,
                    product.category_id,
                    product.sale_price_cents,
                    product.market_price_cents,
                    product.quantity,
                    now,
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    #[instrument(skip(self))]
    fn update_product_stock(
        &self,
        id: ChainId,
        sale_price_cents: i64,
        quantity: i64,
    ) -> Result<(), StoreError> {
        self.execute_one(
            "UPDATE products SET sale_price_cents = ?1, quantity = ?2, updated_at = ?3 WHERE id = ?4",
            rusqlite::params![sale_price_cents, quantity, database::now(), id],
            format!("chain product {id}"),
        )
    }

    fn find_order(&self, store_id: i64, local_order_id: LocalId) -> Result<Option<ChainId>, StoreError> {
        self.optional_id(
            "SELECT id FROM orders WHERE store_id = ?1 AND local_order_id = ?2",
            rusqlite::params![store_id, local_order_id],
        )
    }

    #[instrument(skip(self, new), fields(local_id = new.order.id))]
    fn insert_order(&self, new: &NewChainOrder<'_>) -> Result<ChainId, StoreError> {
        let order = new.order;
        let now = database::now();
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO orders (account_id, store_id, pos_id, local_order_id, order_date, status,
                                     item_total_cents, total_cents, discount_cents, discount_code,
                                     discount_type, points_redeemed, points_discount_cents,
                                     payment_method, payment_ref, shipping_address, cart_id,
                                     last_synced_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)",
                rusqlite::params![
                    new.account_id,
                    new.store_id,
                    new.pos_id,
                    order.id,
                    order.order_date,
                    order.status.to_string(),
                    order.item_total_cents,
                    order.total_cents,
                    order.discount_cents,
                    order.discount_code,
                    order.discount_type,
                    order.points_redeemed,
                    order.points_discount_cents,
                    order.payment_method,
                    order.payment_ref,
                    order.shipping_address,
                    order.cart_id,
                    now,
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    fn find_order_item(&self, order_id: ChainId, local_item_id: LocalId) -> Result<Option<ChainId>, StoreError> {
        self.optional_id(
            "SELECT id FROM order_items WHERE order_id = ?1 AND local_item_id = ?2",
            rusqlite::params![order_id, local_item_id],
        )
    }

    #[instrument(skip(self, new), fields(local_id = new.item.id))]
    fn insert_order_item(&self, new: &NewChainOrderItem<'_>) -> Result<ChainId, StoreError> {
        let item = new.item;
        let now = database::now();
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO order_items (order_id, product_id, sku, quantity, sale_price_cents,
                                          adjusted_price_cents, local_item_id, local_order_id,
                                          last_synced_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                rusqlite::params![
                    new.order_id,
                    new.product_id,
                    item.sku,
                    item.quantity,
                    item.sale_price_cents,
                    item.adjusted_price_cents,
                    item.id,
                    item.order_id,
                    now,
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    fn find_points_event(&self, store_id: i64, local_event_id: LocalId) -> Result<Option<ChainId>, StoreError> {
        self.optional_id(
            "SELECT id FROM points_events WHERE store_id = ?1 AND local_event_id = ?2",
            rusqlite::params![store_id, local_event_id],
        )
    }

    #[instrument(skip(self, new), fields(local_id = new.event.id))]
    fn insert_points_event(&self, new: &NewChainPointsEvent<'_>) -> Result<ChainId, StoreError> {
        let event = new.event;
        let now = database::now();
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO points_events (account_id, activity_type, order_id, points, balance_after,
                                            description, store_id, local_event_id, created_at,
                                            last_synced_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                rusqlite::params![
                    new.account_id,
                    event.activity.to_string(),
                    new.order_id,
                    event.points,
                    event.balance_after,
                    event.description,
                    new.store_id,
                    event.id,
                    event.created_at,
                    now,
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    #[instrument(skip(self))]
    fn sum_points(&self, account_id: ChainId) -> Result<i64, StoreError> {
        self.db.with_conn(|conn| {
            Ok(conn.query_row(
                "SELECT COALESCE(SUM(points), 0) FROM points_events WHERE account_id = ?1",
                [account_id],
                |row| row.get(0),
            )?)
        })
    }

    #[instrument(skip(self))]
    fn set_event_balance(&self, id: ChainId, balance_after: i64) -> Result<(), StoreError> {
        self.execute_one(
            "UPDATE points_events SET balance_after = ?1, last_synced_at = ?2 WHERE id = ?3",
            rusqlite::params![balance_after, database::now(), id],
            format!("chain points event {id}"),
        )
    }
}

fn row_to_account(row: &rusqlite::Row<'_>) -> Result<ChainAccount, StoreError> {
    Ok(ChainAccount {
        id: row_helpers::get(row, 0, "accounts", "id")?,
        mobile_number: row_helpers::get(row, 1, "accounts", "mobile_number")?,
        email: row_helpers::get_opt(row, 2, "accounts", "email")?,
        name: row_helpers::get_opt(row, 3, "accounts", "name")?,
        address: row_helpers::get_opt(row, 4, "accounts", "address")?,
        total_points: row_helpers::get(row, 5, "accounts", "total_points")?,
        store_id: row_helpers::get(row, 6, "accounts", "store_id")?,
        local_account_id: row_helpers::get(row, 7, "accounts", "local_account_id")?,
    })
}

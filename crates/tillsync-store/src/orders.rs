use tracing::instrument;

use tillsync_core::{ChainId, LocalId, Order, OrderItem};

use crate::database::{self, Database};
use crate::error::StoreError;
use crate::row_helpers::{self, Selected};

const ORDER_COLUMNS: &str = "id, account_id, order_date, status, item_total_cents, total_cents,
                             discount_cents, discount_code, discount_type, points_redeemed,
                             points_discount_cents, payment_method, payment_ref, shipping_address,
                             cart_id, chain_id, is_synced, last_synced_at";

const ITEM_COLUMNS: &str = "id, order_id, product_id, sku, quantity, sale_price_cents,
                            adjusted_price_cents, chain_order_id, chain_id, is_synced, last_synced_at";

pub struct OrderRepo {
    db: Database,
}

impl OrderRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    #[instrument(skip(self))]
    pub fn get(&self, id: LocalId) -> Result<Order, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = ?1"))?;
            let mut rows = stmt.query([id])?;
            match rows.next()? {
                Some(row) => row_to_order(row),
                None => Err(StoreError::NotFound(format!("order {id}"))),
            }
        })
    }

    #[instrument(skip(self))]
    pub fn list_unsynced(&self) -> Result<Vec<Selected<Order>>, StoreError> {
        self.db.with_conn(|conn| {
            row_helpers::select_each(
                conn,
                &format!("SELECT {ORDER_COLUMNS} FROM orders WHERE is_synced = 0 ORDER BY id"),
                [],
                "orders",
                row_to_order,
            )
        })
    }

    #[instrument(skip(self))]
    pub fn chain_id(&self, id: LocalId) -> Result<Option<ChainId>, StoreError> {
        self.db.with_conn(|conn| {
            conn.query_row("SELECT chain_id FROM orders WHERE id = ?1", [id], |row| row.get(0))
                .map_err(|e| match e {
                    rusqlite::Error::QueryReturnedNoRows => {
                        StoreError::NotFound(format!("order {id}"))
                    }
                    other => other.into(),
                })
        })
    }

    /// Record the chain id without setting the sync flag. The flag follows
    /// once every item of the order is synced.
    #[instrument(skip(self))]
    pub fn set_chain_id(&self, id: LocalId, chain_id: ChainId) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE orders SET chain_id = ?1, last_synced_at = ?2 WHERE id = ?3",
                rusqlite::params![chain_id, database::now(), id],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound(format!("order {id}")));
            }
            Ok(())
        })
    }

    #[instrument(skip(self))]
    pub fn mark_synced(&self, id: LocalId) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE orders SET last_synced_at = ?1, is_synced = 1
                 WHERE id = ?2 AND chain_id IS NOT NULL",
                rusqlite::params![database::now(), id],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound(format!("mapped order {id}")));
            }
            Ok(())
        })
    }

    #[instrument(skip(self))]
    pub fn items(&self, order_id: LocalId) -> Result<Vec<OrderItem>, StoreError> {
        self.query_items(
            &format!("SELECT {ITEM_COLUMNS} FROM order_items WHERE order_id = ?1 ORDER BY id"),
            order_id,
        )
    }

    #[instrument(skip(self))]
    pub fn unsynced_items(&self, order_id: LocalId) -> Result<Vec<Selected<OrderItem>>, StoreError> {
        self.db.with_conn(|conn| {
            row_helpers::select_each(
                conn,
                &format!(
                    "SELECT {ITEM_COLUMNS} FROM order_items WHERE order_id = ?1 AND is_synced = 0 ORDER BY id"
                ),
                [order_id],
                "order_items",
                row_to_item,
            )
        })
    }

    #[instrument(skip(self))]
    pub fn mark_item_synced(
        &self,
        item_id: LocalId,
        chain_id: ChainId,
        chain_order_id: ChainId,
    ) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE order_items
                 SET chain_id = ?1, chain_order_id = ?2, last_synced_at = ?3, is_synced = 1
                 WHERE id = ?4",
                rusqlite::params![chain_id, chain_order_id, database::now(), item_id],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound(format!("order item {item_id}")));
            }
            Ok(())
        })
    }

    fn query_items(&self, sql: &str, order_id: LocalId) -> Result<Vec<OrderItem>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(sql)?;
            let mut rows = stmt.query([order_id])?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                out.push(row_to_item(row)?);
            }
            Ok(out)
        })
    }
}

fn row_to_order(row: &rusqlite::Row<'_>) -> Result<Order, StoreError> {
    Ok(Order {
        id: row_helpers::get(row, 0, "orders", "id")?,
        account_id: row_helpers::get(row, 1, "orders", "account_id")?,
        order_date: row_helpers::get(row, 2, "orders", "order_date")?,
        status: row_helpers::parse_enum(row, 3, "orders", "status")?,
        item_total_cents: row_helpers::get(row, 4, "orders", "item_total_cents")?,
        total_cents: row_helpers::get(row, 5, "orders", "total_cents")?,
        discount_cents: row_helpers::get(row, 6, "orders", "discount_cents")?,
        discount_code: row_helpers::get_opt(row, 7, "orders", "discount_code")?,
        discount_type: row_helpers::get_opt(row, 8, "orders", "discount_type")?,
        points_redeemed: row_helpers::get(row, 9, "orders", "points_redeemed")?,
        points_discount_cents: row_helpers::get(row, 10, "orders", "points_discount_cents")?,
        payment_method: row_helpers::get(row, 11, "orders", "payment_method")?,
        payment_ref: row_helpers::get_opt(row, 12, "orders", "payment_ref")?,
        shipping_address: row_helpers::get_opt(row, 13, "orders", "shipping_address")?,
        cart_id: row_helpers::get_opt(row, 14, "orders", "cart_id")?,
        sync: row_helpers::sync_meta(row, 15, "orders")?,
    })
}

fn row_to_item(row: &rusqlite::Row<'_>) -> Result<OrderItem, StoreError> {
    Ok(OrderItem {
        id: row_helpers::get(row, 0, "order_items", "id")?,
        order_id: row_helpers::get(row, 1, "order_items", "order_id")?,
        product_id: row_helpers::get(row, 2, "order_items", "product_id")?,
        sku: row_helpers::get(row, 3, "order_items", "sku")?,
        quantity: row_helpers::get(row, 4, "order_items", "quantity")?,
        sale_price_cents: row_helpers::get(row, 5, "order_items", "sale_price_cents")?,
        adjusted_price_cents: row_helpers::get(row, 6, "order_items", "adjusted_price_cents")?,
        chain_order_id: row_helpers::get_opt(row, 7, "order_items", "chain_order_id")?,
        sync: row_helpers::sync_meta(row, 8, "order_items")?,
    })
}

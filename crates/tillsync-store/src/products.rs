use serde::{Deserialize, Serialize};
use tracing::instrument;

use tillsync_core::{ChainId, LocalId, Product};

use crate::database::{self, Database};
use crate::error::StoreError;
use crate::row_helpers::{self, Selected};

const COLUMNS: &str = "id, sku, store_id, name, category, sub_category, brand, product_type, description,
                       rating, category_id, sale_price_cents, market_price_cents, quantity,
                       chain_id, is_synced, last_synced_at";

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct NewProduct {
    pub sku: String,
    pub store_id: i64,
    pub name: String,
    pub category: Option<String>,
    pub sub_category: Option<String>,
    pub brand: Option<String>,
    pub product_type: Option<String>,
    pub description: Option<String>,
    pub rating: Option<f64>,
    pub category_id: Option<i64>,
    pub sale_price_cents: i64,
    pub market_price_cents: i64,
    pub quantity: i64,
}

pub struct ProductRepo {
    db: Database,
}

impl ProductRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    #[instrument(skip(self, product), fields(sku = %product.sku, store_id = product.store_id))]
    pub fn create(&self, product: &NewProduct) -> Result<Product, StoreError> {
        let id = self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO products (sku, store_id, name, category, sub_category, brand, product_type,
                                       description, rating, category_id, sale_price_cents,
                                       market_price_cents, quantity)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
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
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })?;
        self.get(id)
    }

    #[instrument(skip(self))]
    pub fn get(&self, id: LocalId) -> Result<Product, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!("SELECT {COLUMNS} FROM products WHERE id = ?1"))?;
            let mut rows = stmt.query([id])?;
            match rows.next()? {
                Some(row) => row_to_product(row),
                None => Err(StoreError::NotFound(format!("product {id}"))),
            }
        })
    }

    /// Products whose chain copy is stale: never synced, or re-flagged after a
    /// sale or a price change.
    #[instrument(skip(self))]
    pub fn list_unsynced(&self) -> Result<Vec<Selected<Product>>, StoreError> {
        self.db.with_conn(|conn| {
            row_helpers::select_each(
                conn,
                &format!("SELECT {COLUMNS} FROM products WHERE is_synced = 0 ORDER BY id"),
                [],
                "products",
                row_to_product,
            )
        })
    }

    #[instrument(skip(self))]
    pub fn chain_id(&self, id: LocalId) -> Result<Option<ChainId>, StoreError> {
        self.db.with_conn(|conn| {
            conn.query_row("SELECT chain_id FROM products WHERE id = ?1", [id], |row| row.get(0))
                .map_err(|e| match e {
                    rusqlite::Error::QueryReturnedNoRows => {
                        StoreError::NotFound(format!("product {id}"))
                    }
                    other => other.into(),
                })
        })
    }

    /// Record the chain mapping for the row as it was pushed. The sync flag is
    /// set only if price and quantity still match `pushed`; a sale or price
    /// change committed in the meantime keeps the row pending. Returns whether
    /// the flag was set.
    #[instrument(skip(self, pushed), fields(id = pushed.id))]
    pub fn mark_synced(&self, pushed: &Product, chain_id: ChainId) -> Result<bool, StoreError> {
        self.db.with_conn(|conn| {
            let flagged = conn.execute(
                "UPDATE products SET chain_id = ?1, last_synced_at = ?2, is_synced = 1
                 WHERE id = ?3 AND sale_price_cents = ?4 AND quantity = ?5",
                rusqlite::params![
                    chain_id,
                    database::now(),
                    pushed.id,
                    pushed.sale_price_cents,
                    pushed.quantity
                ],
            )?;
            if flagged > 0 {
                return Ok(true);
            }
            let mapped = conn.execute(
                "UPDATE products SET chain_id = ?1 WHERE id = ?2",
                rusqlite::params![chain_id, pushed.id],
            )?;
            if mapped == 0 {
                return Err(StoreError::NotFound(format!("product {}", pushed.id)));
            }
            Ok(false)
        })
    }

    /// Change the shelf price; the chain copy becomes stale.
    #[instrument(skip(self))]
    pub fn update_price(&self, id: LocalId, sale_price_cents: i64) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE products SET sale_price_cents = ?1, is_synced = 0 WHERE id = ?2",
                rusqlite::params![sale_price_cents, id],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound(format!("product {id}")));
            }
            Ok(())
        })
    }
}

fn row_to_product(row: &rusqlite::Row<'_>) -> Result<Product, StoreError> {
    Ok(Product {
        id: row_helpers::get(row, 0, "products", "id")?,
        sku: row_helpers::get(row, 1, "products", "sku")?,
        store_id: row_helpers::get(row, 2, "products", "store_id")?,
        name: row_helpers::get(row, 3, "products", "name")?,
        category: row_helpers::get_opt(row, 4, "products", "category")?,
        sub_category: row_helpers::get_opt(row, 5, "products", "sub_category")?,
        brand: row_helpers::get_opt(row, 6, "products", "brand")?,
        product_type: row_helpers::get_opt(row, 7, "products", "product_type")?,
        description: row_helpers::get_opt(row, 8, "products", "description")?,
        rating: row_helpers::get_opt(row, 9, "products", "rating")?,
        category_id: row_helpers::get_opt(row, 10, "products", "category_id")?,
        sale_price_cents: row_helpers::get(row, 11, "products", "sale_price_cents")?,
        market_price_cents: row_helpers::get(row, 12, "products", "market_price_cents")?,
        quantity: row_helpers::get(row, 13, "products", "quantity")?,
        sync: row_helpers::sync_meta(row, 14, "products")?,
    })
}

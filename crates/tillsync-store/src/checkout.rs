//! Order placement on the local store.
//!
//! Writes everything a completed sale touches in one local transaction, leaving
//! each new or changed row with its sync flag cleared for the next pass.

use rusqlite::OptionalExtension;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use tillsync_core::{ActivityType, LocalId, OrderStatus};

use crate::database::{self, Database};
use crate::error::StoreError;
use crate::loyalty::{self, NewLoyaltyEvent};

/// Points earned per full 100 currency units of the order total.
pub const POINTS_PER_HUNDRED: i64 = 5;

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct CartLine {
    pub product_id: LocalId,
    pub quantity: i64,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PlaceOrder {
    pub account_id: LocalId,
    pub lines: Vec<CartLine>,
    pub discount_cents: i64,
    pub discount_code: Option<String>,
    pub discount_type: Option<String>,
    pub points_redeemed: i64,
    pub points_discount_cents: i64,
    pub payment_method: String,
    pub payment_ref: Option<String>,
    pub shipping_address: Option<String>,
    pub cart_id: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlacedOrder {
    pub order_id: LocalId,
    pub item_ids: Vec<LocalId>,
    pub total_cents: i64,
    pub points_earned: i64,
    pub balance_after: i64,
}

pub fn points_earned(total_cents: i64) -> i64 {
    (total_cents.max(0) / 10_000) * POINTS_PER_HUNDRED
}

/// The checkout side of the local store. Point-of-sale code records sales
/// through this type; the sync engine only reads what it leaves behind.
pub struct SaleRecorder {
    db: Database,
}

impl SaleRecorder {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Record a completed sale: the order, its items, the stock decrement and
    /// the loyalty entries, all unsynced. Fails without writing anything if a
    /// line names an unknown product or the amounts overflow.
    #[instrument(skip(self, req), fields(account_id = req.account_id, lines = req.lines.len()))]
    pub fn place_order(&self, req: &PlaceOrder) -> Result<PlacedOrder, StoreError> {
        let placed = self.db.with_tx(|tx| {
            let mut priced = Vec::with_capacity(req.lines.len());
            for line in &req.lines {
                let product: Option<(String, i64)> = tx
                    .query_row(
                        "SELECT sku, sale_price_cents FROM products WHERE id = ?1",
                        [line.product_id],
                        |row| Ok((row.get(0)?, row.get(1)?)),
                    )
                    .optional()?;
                let (sku, price) = product
                    .ok_or_else(|| StoreError::NotFound(format!("product {}", line.product_id)))?;
                priced.push((line, sku, price));
            }

            let item_total = priced
                .iter()
                .try_fold(0i64, |acc, (line, _, price)| {
                    price.checked_mul(line.quantity).and_then(|amount| acc.checked_add(amount))
                })
                .ok_or_else(|| StoreError::InvalidInput("order item total overflows".into()))?;
            let total = item_total
                .checked_sub(req.discount_cents)
                .and_then(|t| t.checked_sub(req.points_discount_cents))
                .ok_or_else(|| StoreError::InvalidInput("order total overflows".into()))?
                .max(0);
            let status = if req.payment_method == "Cash" {
                OrderStatus::Paid
            } else {
                OrderStatus::Processing
            };

            tx.execute(
                "INSERT INTO orders (account_id, order_date, status, item_total_cents, total_cents,
                                     discount_cents, discount_code, discount_type, points_redeemed,
                                     points_discount_cents, payment_method, payment_ref,
                                     shipping_address, cart_id)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
                rusqlite::params![
                    req.account_id,
                    database::now(),
                    status.to_string(),
                    item_total,
                    total,
                    req.discount_cents,
                    req.discount_code,
                    req.discount_type,
                    req.points_redeemed,
                    req.points_discount_cents,
                    req.payment_method,
                    req.payment_ref,
                    req.shipping_address,
                    req.cart_id,
                ],
            )?;
            let order_id = tx.last_insert_rowid();

            let mut item_ids = Vec::with_capacity(priced.len());
            for (line, sku, price) in &priced {
                tx.execute(
                    "INSERT INTO order_items (order_id, product_id, sku, quantity, sale_price_cents,
                                              adjusted_price_cents)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
                    rusqlite::params![order_id, line.product_id, sku, line.quantity, price],
                )?;
                item_ids.push(tx.last_insert_rowid());
                tx.execute(
                    "UPDATE products SET quantity = quantity - ?1, is_synced = 0 WHERE id = ?2",
                    rusqlite::params![line.quantity, line.product_id],
                )?;
            }

            let mut balance_after = loyalty::latest_balance_on(tx, req.account_id)?;
            if req.points_redeemed > 0 {
                let redeem = loyalty::append_event(
                    tx,
                    &NewLoyaltyEvent {
                        account_id: req.account_id,
                        activity: ActivityType::Redeem,
                        order_id: Some(order_id),
                        points: -req.points_redeemed,
                        description: Some("Points redeemed".into()),
                    },
                )?;
                balance_after = redeem.balance_after;
            }

            let earned = points_earned(total);
            if earned > 0 {
                let earn = loyalty::append_event(
                    tx,
                    &NewLoyaltyEvent {
                        account_id: req.account_id,
                        activity: ActivityType::EarnOrder,
                        order_id: Some(order_id),
                        points: earned,
                        description: Some("Order created".into()),
                    },
                )?;
                balance_after = earn.balance_after;
            }

            Ok(PlacedOrder {
                order_id,
                item_ids,
                total_cents: total,
                points_earned: earned,
                balance_after,
            })
        })?;

        info!(order_id = placed.order_id, total_cents = placed.total_cents, "order placed");
        Ok(placed)
    }

    /// Latest local balance for a mobile number; 0 when the number is unknown.
    pub fn points_balance(&self, mobile_number: &str) -> Result<i64, StoreError> {
        Ok(loyalty::LoyaltyRepo::new(self.db.clone())
            .balance_for_mobile(mobile_number)?
            .unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accounts::{AccountRepo, NewAccount};
    use crate::database::StoreKind;
    use crate::loyalty::LoyaltyRepo;
    use crate::orders::OrderRepo;
    use crate::products::{NewProduct, ProductRepo};

    struct Fixture {
        db: Database,
        account_id: LocalId,
        product_id: LocalId,
    }

    fn fixture() -> Fixture {
        let db = Database::in_memory(StoreKind::Local).unwrap();
        let account_id = AccountRepo::new(db.clone())
            .create(&NewAccount {
                mobile_number: "9123456780".into(),
                store_id: 1,
                ..Default::default()
            })
            .unwrap()
            .id;
        let products = ProductRepo::new(db.clone());
        let product = products
            .create(&NewProduct {
                sku: "OIL-1L".into(),
                store_id: 1,
                name: "Sunflower Oil 1L".into(),
                sale_price_cents: 12_500,
                market_price_cents: 14_000,
                quantity: 20,
                ..Default::default()
            })
            .unwrap();
        products.mark_synced(&product, 1).unwrap();
        Fixture { db, account_id, product_id: product.id }
    }

    #[test]
    fn earn_rule_floors_to_hundreds() {
        assert_eq!(points_earned(0), 0);
        assert_eq!(points_earned(9_999), 0);
        assert_eq!(points_earned(10_000), 5);
        assert_eq!(points_earned(37_500), 15);
        assert_eq!(points_earned(-1), 0);
    }

    #[test]
    fn cash_sale_writes_order_items_stock_and_points() {
        let fx = fixture();
        let placed = SaleRecorder::new(fx.db.clone())
            .place_order(&PlaceOrder {
                account_id: fx.account_id,
                lines: vec![CartLine { product_id: fx.product_id, quantity: 3 }],
                payment_method: "Cash".into(),
                ..Default::default()
            })
            .unwrap();

        assert_eq!(placed.total_cents, 37_500);
        assert_eq!(placed.points_earned, 15);
        assert_eq!(placed.balance_after, 15);

        let order = OrderRepo::new(fx.db.clone()).get(placed.order_id).unwrap();
        assert_eq!(order.status, OrderStatus::Paid);
        assert!(!order.sync.is_synced);

        let product = ProductRepo::new(fx.db.clone()).get(fx.product_id).unwrap();
        assert_eq!(product.quantity, 17);
        assert!(!product.sync.is_synced);

        let events = LoyaltyRepo::new(fx.db.clone()).list_for_account(fx.account_id).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].activity, ActivityType::EarnOrder);
        assert_eq!(events[0].order_id, Some(placed.order_id));
    }

    #[test]
    fn redemption_precedes_earn() {
        let fx = fixture();
        let recorder = SaleRecorder::new(fx.db.clone());
        let line = CartLine { product_id: fx.product_id, quantity: 8 };
        recorder
            .place_order(&PlaceOrder {
                account_id: fx.account_id,
                lines: vec![line],
                payment_method: "Card".into(),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(recorder.points_balance("9123456780").unwrap(), 50);

        let placed = recorder
            .place_order(&PlaceOrder {
                account_id: fx.account_id,
                lines: vec![CartLine { product_id: fx.product_id, quantity: 1 }],
                points_redeemed: 20,
                points_discount_cents: 2_000,
                payment_method: "Card".into(),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(placed.total_cents, 10_500);
        assert_eq!(placed.balance_after, 35);

        let events = LoyaltyRepo::new(fx.db.clone()).list_for_account(fx.account_id).unwrap();
        let kinds: Vec<_> = events.iter().map(|e| (e.activity, e.points, e.balance_after)).collect();
        assert_eq!(
            kinds,
            vec![
                (ActivityType::EarnOrder, 50, 50),
                (ActivityType::Redeem, -20, 30),
                (ActivityType::EarnOrder, 5, 35),
            ]
        );
        let order = OrderRepo::new(fx.db.clone()).get(placed.order_id).unwrap();
        assert_eq!(order.status, OrderStatus::Processing);
    }

    #[test]
    fn unknown_product_rolls_back() {
        let fx = fixture();
        let err = SaleRecorder::new(fx.db.clone())
            .place_order(&PlaceOrder {
                account_id: fx.account_id,
                lines: vec![
                    CartLine { product_id: fx.product_id, quantity: 1 },
                    CartLine { product_id: 999, quantity: 1 },
                ],
                payment_method: "Cash".into(),
                ..Default::default()
            })
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
        assert!(OrderRepo::new(fx.db.clone()).list_unsynced().unwrap().is_empty());
        assert_eq!(ProductRepo::new(fx.db).get(fx.product_id).unwrap().quantity, 20);
    }

    #[test]
    fn overflowing_total_is_rejected_without_writes() {
        let fx = fixture();
        let err = SaleRecorder::new(fx.db.clone())
            .place_order(&PlaceOrder {
                account_id: fx.account_id,
                lines: vec![CartLine { product_id: fx.product_id, quantity: i64::MAX / 2 }],
                payment_method: "Cash".into(),
                ..Default::default()
            })
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidInput(_)));
        assert!(OrderRepo::new(fx.db.clone()).list_unsynced().unwrap().is_empty());
        assert_eq!(ProductRepo::new(fx.db).get(fx.product_id).unwrap().quantity, 20);
    }

    #[test]
    fn unknown_mobile_balance_is_zero() {
        let fx = fixture();
        assert_eq!(SaleRecorder::new(fx.db).points_balance("000").unwrap(), 0);
    }
}

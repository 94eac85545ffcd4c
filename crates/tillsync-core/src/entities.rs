//! Store-side entities as they exist in the local database.
//!
//! Every syncable row carries a [`SyncMeta`]: the chain-assigned id (a
//! back-reference only, the local row stays the source of truth), the sync
//! flag, and the time of the last successful write-back.

use serde::{Deserialize, Serialize};

/// Auto-assigned id of a row in the local store.
pub type LocalId = i64;
/// Auto-assigned id of a row in the chain store.
pub type ChainId = i64;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncMeta {
    pub chain_id: Option<ChainId>,
    pub is_synced: bool,
    pub last_synced_at: Option<String>,
}

/// A loyalty customer. Natural key: `mobile_number`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: LocalId,
    pub mobile_number: String,
    pub email: Option<String>,
    pub name: Option<String>,
    pub address: Option<String>,
    pub total_points: i64,
    pub store_id: i64,
    pub created_at: String,
    pub sync: SyncMeta,
}

/// A catalog entry. Natural key: `(sku, store_id)`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: LocalId,
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
    pub sync: SyncMeta,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Processing,
    Paid,
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Processing => write!(f, "processing"),
            Self::Paid => write!(f, "paid"),
        }
    }
}

impl std::str::FromStr for OrderStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "processing" => Ok(Self::Processing),
            "paid" => Ok(Self::Paid),
            other => Err(format!("unknown order status: {other}")),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: LocalId,
    pub account_id: LocalId,
    pub order_date: String,
    pub status: OrderStatus,
    pub item_total_cents: i64,
    pub total_cents: i64,
    pub discount_cents: i64,
    pub discount_code: Option<String>,
    pub discount_type: Option<String>,
    pub points_redeemed: i64,
    pub points_discount_cents: i64,
    pub payment_method: String,
    pub payment_ref: Option<String>,
    pub shipping_address: Option<String>,
    pub cart_id: Option<String>,
    pub sync: SyncMeta,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OrderItem {
    pub id: LocalId,
    pub order_id: LocalId,
    pub product_id: LocalId,
    pub sku: String,
    pub quantity: i64,
    pub sale_price_cents: i64,
    pub adjusted_price_cents: i64,
    /// Chain id of the parent order, written together with the item's own chain id.
    pub chain_order_id: Option<ChainId>,
    pub sync: SyncMeta,
}

/// Why a loyalty ledger entry exists.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityType {
    EarnOrder,
    Redeem,
    Adjustment,
    SignupBonus,
}

impl std::fmt::Display for ActivityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EarnOrder => write!(f, "earn_order"),
            Self::Redeem => write!(f, "redeem"),
            Self::Adjustment => write!(f, "adjustment"),
            Self::SignupBonus => write!(f, "signup_bonus"),
        }
    }
}

impl std::str::FromStr for ActivityType {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "earn_order" => Ok(Self::EarnOrder),
            "redeem" => Ok(Self::Redeem),
            "adjustment" => Ok(Self::Adjustment),
            "signup_bonus" => Ok(Self::SignupBonus),
            other => Err(format!("unknown activity type: {other}")),
        }
    }
}

/// Append-only loyalty ledger entry.
///
/// `balance_after` is the running sum of `points` for the account on the side
/// that wrote it. The local and chain ledgers compute it independently.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LoyaltyEvent {
    pub id: LocalId,
    pub account_id: LocalId,
    pub activity: ActivityType,
    pub order_id: Option<LocalId>,
    pub points: i64,
    pub balance_after: i64,
    pub description: Option<String>,
    pub created_at: String,
    pub sync: SyncMeta,
}

pub mod accounts;
pub mod audit;
pub mod chain;
pub mod checkout;
pub mod database;
pub mod error;
pub mod loyalty;
pub mod orders;
pub mod products;
pub mod row_helpers;
pub mod schema;

pub use chain::{ChainStore, SqliteChainStore};
pub use database::{Database, StoreKind};
pub use error::StoreError;
pub use row_helpers::Selected;

pub mod audit;
pub mod entities;
pub mod ids;
pub mod report;

pub use audit::{AuditAction, AuditEntry, AuditRecord};
pub use entities::{
    Account, ActivityType, ChainId, LocalId, LoyaltyEvent, Order, OrderItem, OrderStatus, Product,
    SyncMeta,
};
pub use ids::{PassId, TransactionId};
pub use report::{DbStatus, EntityKind, PassOutcome, PassReport, SkipReason, StageReport, Trigger};

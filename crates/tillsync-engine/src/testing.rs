//! Fixtures shared by the engine tests: in-memory terminals over a shared chain
//! store, and chain wrappers that inject races and faults.

use std::sync::Arc;

use parking_lot::Mutex;

use tillsync_core::{Account, AuditRecord, ChainId, LocalId, Product, SyncMeta};
use tillsync_settings::StoreSettings;
use tillsync_store::accounts::{AccountRepo, NewAccount};
use tillsync_store::audit::AuditRepo;
use tillsync_store::chain::{
    ChainAccount, ChainProduct, NewChainOrder, NewChainOrderItem, NewChainPointsEvent,
};
use tillsync_store::checkout::{CartLine, PlaceOrder, PlacedOrder, SaleRecorder};
use tillsync_store::loyalty::LoyaltyRepo;
use tillsync_store::orders::OrderRepo;
use tillsync_store::products::{NewProduct, ProductRepo};
use tillsync_store::{database, ChainStore, Database, SqliteChainStore, StoreError, StoreKind};

use crate::health::{Connector, ConnectionHealth, Endpoint};
use crate::orchestrator::SyncOrchestrator;
use crate::stages::PassContext;

pub(crate) fn local_account(id: LocalId, mobile: &str, store_id: i64) -> Account {
    Account {
        id,
        mobile_number: mobile.into(),
        email: None,
        name: Some("Meena".into()),
        address: None,
        total_points: 0,
        store_id,
        created_at: database::now(),
        sync: SyncMeta::default(),
    }
}

pub(crate) fn local_product(id: LocalId, sku: &str, store_id: i64) -> Product {
    Product {
        id,
        sku: sku.into(),
        store_id,
        name: format!("{sku} item"),
        category: Some("grocery".into()),
        sub_category: None,
        brand: None,
        product_type: None,
        description: None,
        rating: None,
        category_id: None,
        sale_price_cents: 5_000,
        market_price_cents: 5_500,
        quantity: 10,
        sync: SyncMeta::default(),
    }
}

/// One store terminal: its own local database, plus a chain store that
/// sibling terminals share.
pub(crate) struct Terminal {
    pub local: Database,
    pub chain: SqliteChainStore,
    pub store: StoreSettings,
}

impl Terminal {
    pub fn new(store_id: i64) -> Self {
        let chain = SqliteChainStore::new(Database::in_memory(StoreKind::Chain).unwrap());
        Self::with_chain(store_id, chain)
    }

    /// Another store writing to the same chain.
    pub fn sibling(&self, store_id: i64) -> Self {
        Self::with_chain(store_id, self.chain.clone())
    }

    fn with_chain(store_id: i64, chain: SqliteChainStore) -> Self {
        Self {
            local: Database::in_memory(StoreKind::Local).unwrap(),
            chain,
            store: StoreSettings {
                store_id,
                pos_id: 1,
                actor: "system_sync".into(),
            },
        }
    }

    pub fn context(&self) -> PassContext {
        self.context_with(Arc::new(self.chain.clone()))
    }

    pub fn context_with(&self, chain: Arc<dyn ChainStore>) -> PassContext {
        PassContext::new(self.local.clone(), chain, &self.store)
    }

    /// Health over this terminal's local database and the given chain connector.
    pub fn health_with(
        &self,
        chain: impl Connector<Arc<dyn ChainStore>> + 'static,
    ) -> Arc<ConnectionHealth> {
        let local = self.local.clone();
        Arc::new(ConnectionHealth::new(
            Endpoint::new(StoreKind::Local, move || -> Result<Database, StoreError> {
                Ok(local.clone())
            }),
            Endpoint::new(StoreKind::Chain, chain),
        ))
    }

    pub fn orchestrator(&self) -> SyncOrchestrator {
        self.orchestrator_with(Arc::new(self.chain.clone()))
    }

    pub fn orchestrator_with(&self, chain: Arc<dyn ChainStore>) -> SyncOrchestrator {
        let health = self.health_with(move || -> Result<Arc<dyn ChainStore>, StoreError> {
            Ok(chain.clone())
        });
        health.bootstrap().unwrap();
        SyncOrchestrator::new(health, self.store.clone())
    }

    pub fn accounts(&self) -> AccountRepo {
        AccountRepo::new(self.local.clone())
    }

    pub fn products(&self) -> ProductRepo {
        ProductRepo::new(self.local.clone())
    }

    pub fn orders(&self) -> OrderRepo {
        OrderRepo::new(self.local.clone())
    }

    pub fn loyalty(&self) -> LoyaltyRepo {
        LoyaltyRepo::new(self.local.clone())
    }

    pub fn account(&self, mobile: &str) -> LocalId {
        self.accounts()
            .create(&NewAccount {
                mobile_number: mobile.into(),
                store_id: self.store.store_id,
                ..Default::default()
            })
            .unwrap()
            .id
    }

    pub fn product(&self, sku: &str, sale_price_cents: i64, quantity: i64) -> LocalId {
        self.products()
            .create(&NewProduct {
                sku: sku.into(),
                store_id: self.store.store_id,
                name: format!("{sku} item"),
                sale_price_cents,
                market_price_cents: sale_price_cents,
                quantity,
                ..Default::default()
            })
            .unwrap()
            .id
    }

    /// A cash sale of one product line.
    pub fn sale(&self, account_id: LocalId, product_id: LocalId, quantity: i64) -> PlacedOrder {
        SaleRecorder::new(self.local.clone())
            .place_order(&PlaceOrder {
                account_id,
                lines: vec![CartLine { product_id, quantity }],
                payment_method: "Cash".into(),
                ..Default::default()
            })
            .unwrap()
    }

    /// Run a raw update against one local row, as a careless collaborator
    /// might. `?1` is bound to `id`.
    pub fn corrupt(&self, sql: &str, id: LocalId) {
        self.local
            .with_conn(|conn| {
                conn.execute(sql, [id])?;
                Ok(())
            })
            .unwrap();
    }

    pub fn audit_trail(&self) -> Vec<AuditRecord> {
        AuditRepo::new(self.local.clone()).list(10_000).unwrap()
    }

    pub fn chain_count(&self, table: &str) -> i64 {
        self.chain
            .database()
            .with_conn(|conn| {
                Ok(conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))?)
            })
            .unwrap()
    }
}

type Hook = Box<dyn FnOnce(&SqliteChainStore) + Send>;

/// Runs a one-shot hook against the inner store right before the next
/// account or product insert, standing in for another store that wins the
/// race between lookup and insert.
pub(crate) struct RacingChain {
    inner: SqliteChainStore,
    hook: Mutex<Option<Hook>>,
}

impl RacingChain {
    pub fn new(inner: SqliteChainStore) -> Self {
        Self {
            inner,
            hook: Mutex::new(None),
        }
    }

    pub fn before_insert(&self, hook: impl FnOnce(&SqliteChainStore) + Send + 'static) {
        *self.hook.lock() = Some(Box::new(hook));
    }

    fn race(&self) {
        let hook = self.hook.lock().take();
        if let Some(hook) = hook {
            hook(&self.inner);
        }
    }
}

impl ChainStore for RacingChain {
    fn ping(&self) -> Result<(), StoreError> {
        self.inner.ping()
    }

    fn find_account_by_mobile(&self, mobile_number: &str) -> Result<Option<ChainAccount>, StoreError> {
        self.inner.find_account_by_mobile(mobile_number)
    }

    fn account(&self, id: ChainId) -> Result<ChainAccount, StoreError> {
        self.inner.account(id)
    }

    fn insert_account(&self, account: &Account) -> Result<ChainId, StoreError> {
        self.race();
        self.inner.insert_account(account)
    }

    fn set_account_points(&self, id: ChainId, total_points: i64) -> Result<(), StoreError> {
        self.inner.set_account_points(id, total_points)
    }

    fn find_product(&self, sku: &str, store_id: i64) -> Result<Option<ChainProduct>, StoreError> {
        self.inner.find_product(sku, store_id)
    }

    fn insert_product(&self, product: &Product) -> Result<ChainId, StoreError> {
        self.race();
        self.inner.insert_product(product)
    }

    fn update_product_stock(&self, id: ChainId, sale_price_cents: i64, quantity: i64) -> Result<(), StoreError> {
        self.inner.update_product_stock(id, sale_price_cents, quantity)
    }

    fn find_order(&self, store_id: i64, local_order_id: LocalId) -> Result<Option<ChainId>, StoreError> {
        self.inner.find_order(store_id, local_order_id)
    }

    fn insert_order(&self, order: &NewChainOrder<'_>) -> Result<ChainId, StoreError> {
        self.inner.insert_order(order)
    }

    fn find_order_item(&self, order_id: ChainId, local_item_id: LocalId) -> Result<Option<ChainId>, StoreError> {
        self.inner.find_order_item(order_id, local_item_id)
    }

    fn insert_order_item(&self, item: &NewChainOrderItem<'_>) -> Result<ChainId, StoreError> {
        self.inner.insert_order_item(item)
    }

    fn find_points_event(&self, store_id: i64, local_event_id: LocalId) -> Result<Option<ChainId>, StoreError> {
        self.inner.find_points_event(store_id, local_event_id)
    }

    fn insert_points_event(&self, event: &NewChainPointsEvent<'_>) -> Result<ChainId, StoreError> {
        self.inner.insert_points_event(event)
    }

    fn sum_points(&self, account_id: ChainId) -> Result<i64, StoreError> {
        self.inner.sum_points(account_id)
    }

    fn set_event_balance(&self, id: ChainId, balance_after: i64) -> Result<(), StoreError> {
        self.inner.set_event_balance(id, balance_after)
    }
}

#[derive(Clone, Copy)]
enum FaultKind {
    ConnectionLost,
    Rejected,
}

struct Fault {
    op: &'static str,
    key: String,
    kind: FaultKind,
}

/// Chain wrapper that fails chosen writes once. Keys are the mobile number
/// for accounts, the SKU for products and the local id for everything else.
pub(crate) struct FaultyChain {
    inner: Arc<dyn ChainStore>,
    faults: Mutex<Vec<Fault>>,
}

impl FaultyChain {
    pub fn new(inner: Arc<dyn ChainStore>) -> Self {
        Self {
            inner,
            faults: Mutex::new(Vec::new()),
        }
    }

    /// The next matching call fails as if the connection dropped.
    pub fn fail_on(&self, op: &'static str, key: impl Into<String>) {
        self.push(op, key.into(), FaultKind::ConnectionLost);
    }

    /// The next matching call fails with a non-connectivity database error.
    pub fn reject_on(&self, op: &'static str, key: impl Into<String>) {
        self.push(op, key.into(), FaultKind::Rejected);
    }

    fn push(&self, op: &'static str, key: String, kind: FaultKind) {
        self.faults.lock().push(Fault { op, key, kind });
    }

    fn check(&self, op: &str, key: &str) -> Result<(), StoreError> {
        let mut faults = self.faults.lock();
        let Some(pos) = faults.iter().position(|f| f.op == op && f.key == key) else {
            return Ok(());
        };
        let fault = faults.remove(pos);
        Err(match fault.kind {
            FaultKind::ConnectionLost => StoreError::Connection(format!("{op} {key}: connection reset")),
            FaultKind::Rejected => StoreError::Database(format!("{op} {key}: rejected")),
        })
    }
}

impl ChainStore for FaultyChain {
    fn ping(&self) -> Result<(), StoreError> {
        self.check("ping", "")?;
        self.inner.ping()
    }

    fn find_account_by_mobile(&self, mobile_number: &str) -> Result<Option<ChainAccount>, StoreError> {
        self.check("find_account_by_mobile", mobile_number)?;
        self.inner.find_account_by_mobile(mobile_number)
    }

    fn account(&self, id: ChainId) -> Result<ChainAccount, StoreError> {
        self.inner.account(id)
    }

    fn insert_account(&self, account: &Account) -> Result<ChainId, StoreError> {
        self.check("insert_account", &account.mobile_number)?;
        self.inner.insert_account(account)
    }

    fn set_account_points(&self, id: ChainId, total_points: i64) -> Result<(), StoreError> {
        self.inner.set_account_points(id, total_points)
    }

    fn find_product(&self, sku: &str, store_id: i64) -> Result<Option<ChainProduct>, StoreError> {
        self.check("find_product", sku)?;
        self.inner.find_product(sku, store_id)
    }

    fn insert_product(&self, product: &Product) -> Result<ChainId, StoreError> {
        self.check("insert_product", &product.sku)?;
        self.inner.insert_product(product)
    }

    fn update_product_stock(&self, id: ChainId, sale_price_cents: i64, quantity: i64) -> Result<(), StoreError> {
        self.inner.update_product_stock(id, sale_price_cents, quantity)
    }

    fn find_order(&self, store_id: i64, local_order_id: LocalId) -> Result<Option<ChainId>, StoreError> {
        self.inner.find_order(store_id, local_order_id)
    }

    fn insert_order(&self, order: &NewChainOrder<'_>) -> Result<ChainId, StoreError> {
        self.check("insert_order", &order.order.id.to_string())?;
        self.inner.insert_order(order)
    }

    fn find_order_item(&self, order_id: ChainId, local_item_id: LocalId) -> Result<Option<ChainId>, StoreError> {
        self.inner.find_order_item(order_id, local_item_id)
    }

    fn insert_order_item(&self, item: &NewChainOrderItem<'_>) -> Result<ChainId, StoreError> {
        self.check("insert_order_item", &item.item.id.to_string())?;
        self.inner.insert_order_item(item)
    }

    fn find_points_event(&self, store_id: i64, local_event_id: LocalId) -> Result<Option<ChainId>, StoreError> {
        self.inner.find_points_event(store_id, local_event_id)
    }

    fn insert_points_event(&self, event: &NewChainPointsEvent<'_>) -> Result<ChainId, StoreError> {
        self.check("insert_points_event", &event.event.id.to_string())?;
        self.inner.insert_points_event(event)
    }

    fn sum_points(&self, account_id: ChainId) -> Result<i64, StoreError> {
        self.inner.sum_points(account_id)
    }

    fn set_event_balance(&self, id: ChainId, balance_after: i64) -> Result<(), StoreError> {
        self.inner.set_event_balance(id, balance_after)
    }
}

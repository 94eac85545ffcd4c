/// SQL DDL for the local (store) and chain databases.
/// WAL mode + foreign keys enabled at connection time.
pub const SCHEMA_VERSION: u32 = 1;

pub const LOCAL_TABLES: &str = r#"
CREATE TABLE IF NOT EXISTS accounts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    mobile_number TEXT NOT NULL,
    email TEXT,
    name TEXT,
    address TEXT,
    total_points INTEGER NOT NULL DEFAULT 0,
    store_id INTEGER NOT NULL,
    created_at TEXT NOT NULL,
    chain_id INTEGER,
    is_synced INTEGER NOT NULL DEFAULT 0,
    last_synced_at TEXT
);

CREATE TABLE IF NOT EXISTS products (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    sku TEXT NOT NULL,
    store_id INTEGER NOT NULL,
    name TEXT NOT NULL,
    category TEXT,
    sub_category TEXT,
    brand TEXT,
    product_type TEXT,
    description TEXT,
    rating REAL,
    category_id INTEGER,
    sale_price_cents INTEGER NOT NULL,
    market_price_cents INTEGER NOT NULL,
    quantity INTEGER NOT NULL DEFAULT 0,
    chain_id INTEGER,
    is_synced INTEGER NOT NULL DEFAULT 0,
    last_synced_at TEXT,
    UNIQUE (sku, store_id)
);

CREATE TABLE IF NOT EXISTS orders (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    account_id INTEGER NOT NULL REFERENCES accounts(id),
    order_date TEXT NOT NULL,
    status TEXT NOT NULL,
    item_total_cents INTEGER NOT NULL,
    total_cents INTEGER NOT NULL,
    discount_cents INTEGER NOT NULL DEFAULT 0,
    discount_code TEXT,
    discount_type TEXT,
    points_redeemed INTEGER NOT NULL DEFAULT 0,
    points_discount_cents INTEGER NOT NULL DEFAULT 0,
    payment_method TEXT NOT NULL,
    payment_ref TEXT,
    shipping_address TEXT,
    cart_id TEXT,
    chain_id INTEGER,
    is_synced INTEGER NOT NULL DEFAULT 0,
    last_synced_at TEXT
);

CREATE TABLE IF NOT EXISTS order_items (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    order_id INTEGER NOT NULL REFERENCES orders(id),
    product_id INTEGER NOT NULL REFERENCES products(id),
    sku TEXT NOT NULL,
    quantity INTEGER NOT NULL,
    sale_price_cents INTEGER NOT NULL,
    adjusted_price_cents INTEGER NOT NULL,
    chain_order_id INTEGER,
    chain_id INTEGER,
    is_synced INTEGER NOT NULL DEFAULT 0,
    last_synced_at TEXT
);

CREATE TABLE IF NOT EXISTS points_events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    account_id INTEGER NOT NULL REFERENCES accounts(id),
    activity_type TEXT NOT NULL,
    order_id INTEGER REFERENCES orders(id),
    points INTEGER NOT NULL,
    balance_after INTEGER NOT NULL,
    description TEXT,
    created_at TEXT NOT NULL,
    chain_id INTEGER,
    is_synced INTEGER NOT NULL DEFAULT 0,
    last_synced_at TEXT
);

CREATE TABLE IF NOT EXISTS audit_trail (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    transaction_id TEXT NOT NULL,
    table_name TEXT NOT NULL,
    entity_id INTEGER NOT NULL,
    field_name TEXT,
    old_value TEXT,
    new_value TEXT,
    action TEXT NOT NULL,
    changed_by TEXT NOT NULL,
    changed_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_accounts_mobile ON accounts(mobile_number);
CREATE INDEX IF NOT EXISTS idx_accounts_unsynced ON accounts(is_synced, chain_id);
CREATE INDEX IF NOT EXISTS idx_products_unsynced ON products(is_synced);
CREATE INDEX IF NOT EXISTS idx_orders_unsynced ON orders(is_synced);
CREATE INDEX IF NOT EXISTS idx_order_items_order ON order_items(order_id, is_synced);
CREATE INDEX IF NOT EXISTS idx_points_account ON points_events(account_id, created_at, id);
CREATE INDEX IF NOT EXISTS idx_points_unsynced ON points_events(is_synced, created_at, id);
CREATE INDEX IF NOT EXISTS idx_audit_entity ON audit_trail(table_name, entity_id);
CREATE INDEX IF NOT EXISTS idx_audit_txn ON audit_trail(transaction_id);

CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER NOT NULL
);
"#;

/// Chain-wide tables. The UNIQUE constraints carry the natural keys and the
/// originating local ids, so a lost race or a retried write surfaces as a
/// conflict instead of a duplicate row.
pub const CHAIN_TABLES: &str = r#"
CREATE TABLE IF NOT EXISTS accounts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    mobile_number TEXT NOT NULL UNIQUE,
    email TEXT,
    name TEXT,
    address TEXT,
    total_points INTEGER NOT NULL DEFAULT 0,
    store_id INTEGER NOT NULL,
    local_account_id INTEGER NOT NULL,
    created_at TEXT NOT NULL,
    last_synced_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS products (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    sku TEXT NOT NULL,
    store_id INTEGER NOT NULL,
    name TEXT NOT NULL,
    category TEXT,
    sub_category TEXT,
    brand TEXT,
    product_type TEXT,
    description TEXT,
    rating REAL,
    category_id INTEGER,
    sale_price_cents INTEGER NOT NULL,
    market_price_cents INTEGER NOT NULL,
    quantity INTEGER NOT NULL,
    updated_at TEXT NOT NULL,
    UNIQUE (sku, store_id)
);

CREATE TABLE IF NOT EXISTS orders (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    account_id INTEGER NOT NULL REFERENCES accounts(id),
    store_id INTEGER NOT NULL,
    pos_id INTEGER NOT NULL,
    local_order_id INTEGER NOT NULL,
    order_date TEXT NOT NULL,
    status TEXT NOT NULL,
    item_total_cents INTEGER NOT NULL,
    total_cents INTEGER NOT NULL,
    discount_cents INTEGER NOT NULL,
    discount_code TEXT,
    discount_type TEXT,
    points_redeemed INTEGER NOT NULL,
    points_discount_cents INTEGER NOT NULL,
    payment_method TEXT NOT NULL,
    payment_ref TEXT,
    shipping_address TEXT,
    cart_id TEXT,
    last_synced_at TEXT NOT NULL,
    UNIQUE (store_id, local_order_id)
);

CREATE TABLE IF NOT EXISTS order_items (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    order_id INTEGER NOT NULL REFERENCES orders(id),
    product_id INTEGER NOT NULL REFERENCES products(id),
    sku TEXT NOT NULL,
    quantity INTEGER NOT NULL,
    sale_price_cents INTEGER NOT NULL,
    adjusted_price_cents INTEGER NOT NULL,
    local_item_id INTEGER NOT NULL,
    local_order_id INTEGER NOT NULL,
    last_synced_at TEXT NOT NULL,
    UNIQUE (order_id, local_item_id)
);

CREATE TABLE IF NOT EXISTS points_events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    account_id INTEGER NOT NULL REFERENCES accounts(id),
    activity_type TEXT NOT NULL,
    order_id INTEGER REFERENCES orders(id),
    points INTEGER NOT NULL,
    balance_after INTEGER NOT NULL,
    description TEXT,
    store_id INTEGER NOT NULL,
    local_event_id INTEGER NOT NULL,
    created_at TEXT NOT NULL,
    last_synced_at TEXT NOT NULL,
    UNIQUE (store_id, local_event_id)
);

CREATE INDEX IF NOT EXISTS idx_chain_points_account ON points_events(account_id);
CREATE INDEX IF NOT EXISTS idx_chain_orders_account ON orders(account_id);

CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER NOT NULL
);
"#;

pub const PRAGMAS: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;
PRAGMA busy_timeout = 5000;
PRAGMA synchronous = NORMAL;
"#;

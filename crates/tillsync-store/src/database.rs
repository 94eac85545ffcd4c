use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{SecondsFormat, Utc};
use parking_lot::Mutex;
use rusqlite::Connection;
use tracing::info;

use crate::error::StoreError;
use crate::schema;

/// Which schema a database carries.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StoreKind {
    /// Per-terminal store; the source of truth for what happened here.
    Local,
    /// Chain-wide consolidating store.
    Chain,
}

impl StoreKind {
    fn tables(self) -> &'static str {
        match self {
            Self::Local => schema::LOCAL_TABLES,
            Self::Chain => schema::CHAIN_TABLES,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Chain => "chain",
        }
    }
}

/// Thread-safe SQLite connection wrapper.
/// Uses parking_lot::Mutex for synchronous access (rusqlite is not Sync).
pub struct Database {
    conn: Arc<Mutex<Connection>>,
    path: PathBuf,
    kind: StoreKind,
}

impl Database {
    /// Open or create a database, creating missing parent directories.
    pub fn open(path: &Path, kind: StoreKind) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::Io(format!("create dir: {e}")))?;
        }
        Self::connect(path, kind)
    }

    /// Open a database without touching the filesystem layout. A missing parent
    /// directory (an unmounted share, say) surfaces as a connection error.
    pub fn connect(path: &Path, kind: StoreKind) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        init(&conn, kind)?;

        info!(path = %path.display(), store = kind.as_str(), "database opened");

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: path.to_owned(),
            kind,
        })
    }

    /// Open an in-memory database (for testing).
    pub fn in_memory(kind: StoreKind) -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        init(&conn, kind)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: PathBuf::from(":memory:"),
            kind,
        })
    }

    /// Execute a closure with the database connection.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&Connection) -> Result<T, StoreError>,
    {
        let conn = self.conn.lock();
        f(&conn)
    }

    /// Execute a closure inside a transaction; commits on `Ok`, rolls back on `Err`.
    pub fn with_tx<F, T>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&rusqlite::Transaction<'_>) -> Result<T, StoreError>,
    {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let out = f(&tx)?;
        tx.commit()?;
        Ok(out)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn kind(&self) -> StoreKind {
        self.kind
    }

    /// Liveness check.
    pub fn ping(&self) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
            Ok(())
        })
    }
}

impl Clone for Database {
    fn clone(&self) -> Self {
        Self {
            conn: self.conn.clone(),
            path: self.path.clone(),
            kind: self.kind,
        }
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("path", &self.path)
            .field("kind", &self.kind)
            .finish()
    }
}

fn init(conn: &Connection, kind: StoreKind) -> Result<(), StoreError> {
    conn.execute_batch(schema::PRAGMAS)
        .map_err(|e| tag(e, "pragmas"))?;
    conn.execute_batch(kind.tables())
        .map_err(|e| tag(e, "schema"))?;

    let version: Option<u32> = conn
        .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| row.get(0))
        .ok();
    if version.is_none() {
        conn.execute(
            "INSERT INTO schema_version (version) VALUES (?1)",
            [schema::SCHEMA_VERSION],
        )
        .map_err(|e| tag(e, "schema version"))?;
    }
    Ok(())
}

// Keeps the connectivity classification while prefixing the stage.
fn tag(e: rusqlite::Error, stage: &str) -> StoreError {
    match StoreError::from(e) {
        StoreError::Connection(msg) => StoreError::Connection(format!("{stage}: {msg}")),
        other => StoreError::Database(format!("{stage}: {other}")),
    }
}

/// Timestamp format used for every `*_at` column. Millisecond RFC 3339 in UTC
/// sorts lexically in time order, which the loyalty ledger relies on.
pub fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

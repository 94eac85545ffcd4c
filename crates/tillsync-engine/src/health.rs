//! Liveness of the local and chain stores.
//!
//! Each endpoint owns its connection handle. Callers ask the endpoint for the
//! current handle instead of holding one across failures, so `mark_failed`
//! is enough to make every later caller see a fresh connection.

use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::json;
use tracing::{info, warn};

use tillsync_core::DbStatus;
use tillsync_store::{ChainStore, Database, SqliteChainStore, StoreError, StoreKind};

/// Opens a fresh handle to one endpoint.
pub trait Connector<H>: Send + Sync {
    fn connect(&self) -> Result<H, StoreError>;
}

impl<H, F> Connector<H> for F
where
    F: Fn() -> Result<H, StoreError> + Send + Sync,
{
    fn connect(&self) -> Result<H, StoreError> {
        self()
    }
}

/// Opens the local store, creating its directory on first run.
pub struct LocalConnector {
    path: PathBuf,
}

impl LocalConnector {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl Connector<Database> for LocalConnector {
    fn connect(&self) -> Result<Database, StoreError> {
        let db = Database::open(&self.path, StoreKind::Local)?;
        db.ping()?;
        Ok(db)
    }
}

/// Opens the chain store. A missing directory is reported as unreachable
/// rather than created, since the chain store lives on shared storage.
pub struct ChainConnector {
    path: PathBuf,
}

impl ChainConnector {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl Connector<Arc<dyn ChainStore>> for ChainConnector {
    fn connect(&self) -> Result<Arc<dyn ChainStore>, StoreError> {
        let store = SqliteChainStore::new(Database::connect(&self.path, StoreKind::Chain)?);
        store.ping()?;
        Ok(Arc::new(store))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connecting,
    Connected,
}

impl LinkState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
        }
    }
}

enum Slot<H> {
    Disconnected,
    Connecting,
    Connected(H),
}

struct Link<H> {
    slot: Slot<H>,
    /// Bumped on every connect attempt and every `mark_failed`, so a connect
    /// that finishes after being invalidated does not install its handle.
    epoch: u64,
}

pub struct Endpoint<H> {
    kind: StoreKind,
    connector: Box<dyn Connector<H>>,
    link: Mutex<Link<H>>,
}

impl<H: Clone> Endpoint<H> {
    pub fn new(kind: StoreKind, connector: impl Connector<H> + 'static) -> Self {
        Self {
            kind,
            connector: Box::new(connector),
            link: Mutex::new(Link {
                slot: Slot::Disconnected,
                epoch: 0,
            }),
        }
    }

    pub fn kind(&self) -> StoreKind {
        self.kind
    }

    pub fn state(&self) -> LinkState {
        match self.link.lock().slot {
            Slot::Disconnected => LinkState::Disconnected,
            Slot::Connecting => LinkState::Connecting,
            Slot::Connected(_) => LinkState::Connected,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.state() == LinkState::Connected
    }

    /// The live handle, if connected.
    pub fn handle(&self) -> Option<H> {
        match &self.link.lock().slot {
            Slot::Connected(handle) => Some(handle.clone()),
            _ => None,
        }
    }

    /// Connect if disconnected. Returns immediately when already connected or
    /// while another caller's attempt is in flight.
    pub fn connect(&self) -> Result<(), StoreError> {
        let epoch = {
            let mut link = self.link.lock();
            match link.slot {
                Slot::Connected(_) | Slot::Connecting => return Ok(()),
                Slot::Disconnected => {
                    link.slot = Slot::Connecting;
                    link.epoch += 1;
                    link.epoch
                }
            }
        };

        let result = self.connector.connect();

        let mut link = self.link.lock();
        if link.epoch != epoch {
            return Err(StoreError::Connection(format!(
                "{} connect attempt invalidated",
                self.kind.as_str()
            )));
        }
        match result {
            Ok(handle) => {
                link.slot = Slot::Connected(handle);
                info!(store = self.kind.as_str(), "store connected");
                Ok(())
            }
            Err(e) => {
                link.slot = Slot::Disconnected;
                warn!(store = self.kind.as_str(), error = %e, "store connect failed");
                Err(e)
            }
        }
    }

    /// Drop the handle and any in-flight attempt; the next `connect` opens a fresh one.
    pub fn mark_failed(&self) {
        let mut link = self.link.lock();
        link.epoch += 1;
        let previous = std::mem::replace(&mut link.slot, Slot::Disconnected);
        if !matches!(previous, Slot::Disconnected) {
            warn!(store = self.kind.as_str(), "store marked failed");
        }
    }
}

/// Both endpoints of a store terminal.
pub struct ConnectionHealth {
    local: Endpoint<Database>,
    global: Endpoint<Arc<dyn ChainStore>>,
}

impl ConnectionHealth {
    pub fn new(local: Endpoint<Database>, global: Endpoint<Arc<dyn ChainStore>>) -> Self {
        Self { local, global }
    }

    /// Endpoints backed by SQLite files at the given paths.
    pub fn sqlite(local_path: impl Into<PathBuf>, chain_path: impl Into<PathBuf>) -> Self {
        Self::new(
            Endpoint::new(StoreKind::Local, LocalConnector::new(local_path)),
            Endpoint::new(StoreKind::Chain, ChainConnector::new(chain_path)),
        )
    }

    pub fn local(&self) -> &Endpoint<Database> {
        &self.local
    }

    pub fn global(&self) -> &Endpoint<Arc<dyn ChainStore>> {
        &self.global
    }

    /// Startup connect. The local store is mandatory and its failure is
    /// returned; the chain store is best-effort.
    pub fn bootstrap(&self) -> Result<(), StoreError> {
        self.local.connect()?;
        if let Err(e) = self.global.connect() {
            warn!(error = %e, "chain store unavailable, running local-only");
        }
        Ok(())
    }

    /// One reconnect attempt on the chain store. While an attempt is already in
    /// flight, reports the current state without starting another.
    pub fn reconnect_global(&self) -> bool {
        match self.global.state() {
            LinkState::Connected => true,
            LinkState::Connecting => false,
            LinkState::Disconnected => {
                info!("reconnecting chain store");
                self.global.connect().is_ok() && self.global.is_connected()
            }
        }
    }

    pub fn status(&self) -> DbStatus {
        DbStatus {
            local_connected: self.local.is_connected(),
            global_connected: self.global.is_connected(),
        }
    }

    pub fn describe(&self) -> serde_json::Value {
        json!({
            "local": self.local.state().as_str(),
            "global": self.global.state().as_str(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Barrier;

    fn counting(counter: Arc<AtomicUsize>) -> impl Connector<u32> {
        move || -> Result<u32, StoreError> {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            Ok(n as u32)
        }
    }

    #[test]
    fn connect_is_idempotent_when_connected() {
        let calls = Arc::new(AtomicUsize::new(0));
        let ep = Endpoint::new(StoreKind::Chain, counting(calls.clone()));
        assert_eq!(ep.state(), LinkState::Disconnected);

        ep.connect().unwrap();
        ep.connect().unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(ep.handle(), Some(0));
    }

    #[test]
    fn mark_failed_forces_fresh_handle() {
        let calls = Arc::new(AtomicUsize::new(0));
        let ep = Endpoint::new(StoreKind::Chain, counting(calls.clone()));
        ep.connect().unwrap();
        ep.mark_failed();
        assert_eq!(ep.state(), LinkState::Disconnected);
        assert_eq!(ep.handle(), None);

        ep.connect().unwrap();
        assert_eq!(ep.handle(), Some(1));
    }

    #[test]
    fn failed_connect_leaves_disconnected() {
        let ep: Endpoint<u32> = Endpoint::new(StoreKind::Chain, || {
            Err(StoreError::Connection("unreachable".into()))
        });
        assert!(ep.connect().unwrap_err().is_connectivity());
        assert_eq!(ep.state(), LinkState::Disconnected);
    }

    #[test]
    fn in_flight_connect_is_shared_and_invalidated_by_mark_failed() {
        let entered = Arc::new(Barrier::new(2));
        let release = Arc::new(Barrier::new(2));
        let (e, r) = (entered.clone(), release.clone());
        let ep = Arc::new(Endpoint::new(StoreKind::Chain, move || -> Result<u32, StoreError> {
            e.wait();
            r.wait();
            Ok(7u32)
        }));

        let worker = {
            let ep = ep.clone();
            std::thread::spawn(move || ep.connect())
        };
        entered.wait();
        assert_eq!(ep.state(), LinkState::Connecting);
        // A second caller while connecting resolves without a new attempt.
        ep.connect().unwrap();

        ep.mark_failed();
        release.wait();
        let result = worker.join().unwrap();
        assert!(result.is_err());
        assert_eq!(ep.state(), LinkState::Disconnected);
    }

    #[test]
    fn bootstrap_tolerates_missing_chain() {
        let health = ConnectionHealth::new(
            Endpoint::new(StoreKind::Local, || Database::in_memory(StoreKind::Local)),
            Endpoint::new(StoreKind::Chain, || -> Result<Arc<dyn ChainStore>, StoreError> {
                Err(StoreError::Connection("no route".into()))
            }),
        );
        health.bootstrap().unwrap();
        assert_eq!(
            health.status(),
            DbStatus {
                local_connected: true,
                global_connected: false
            }
        );
    }

    #[test]
    fn bootstrap_fails_without_local() {
        let health = ConnectionHealth::new(
            Endpoint::new(StoreKind::Local, || -> Result<Database, StoreError> {
                Err(StoreError::Connection("disk gone".into()))
            }),
            Endpoint::new(StoreKind::Chain, || -> Result<Arc<dyn ChainStore>, StoreError> {
                Ok(Arc::new(SqliteChainStore::new(Database::in_memory(StoreKind::Chain)?)))
            }),
        );
        assert!(health.bootstrap().is_err());
        assert!(!health.status().local_connected);
    }

    #[test]
    fn reconnect_global_reports_outcome() {
        let up = Arc::new(AtomicBool::new(false));
        let flag = up.clone();
        let health = ConnectionHealth::new(
            Endpoint::new(StoreKind::Local, || Database::in_memory(StoreKind::Local)),
            Endpoint::new(StoreKind::Chain, move || -> Result<Arc<dyn ChainStore>, StoreError> {
                if !flag.load(Ordering::SeqCst) {
                    return Err(StoreError::Connection("down".into()));
                }
                Ok(Arc::new(SqliteChainStore::new(Database::in_memory(StoreKind::Chain)?)))
            }),
        );
        health.bootstrap().unwrap();
        assert!(!health.reconnect_global());

        up.store(true, Ordering::SeqCst);
        assert!(health.reconnect_global());
        assert!(health.status().global_connected);

        health.global().mark_failed();
        assert!(!health.status().global_connected);
        assert_eq!(health.describe()["global"], "disconnected");
    }

    #[test]
    fn chain_connector_rejects_missing_directory() {
        let path = std::env::temp_dir()
            .join(format!("tillsync-no-share-{}", uuid::Uuid::now_v7()))
            .join("chain.db");
        let err = ChainConnector::new(path).connect().err().unwrap();
        assert!(err.is_connectivity(), "got: {err}");
    }
}

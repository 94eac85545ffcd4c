//! Settings type definitions.
//!
//! Field names are camelCase on disk. Every section is `#[serde(default)]`, so a
//! settings file only needs the keys it wants to change.

use serde::{Deserialize, Serialize};

/// Root settings for a store terminal.
///
/// ```json
/// {
///   "store": { "storeId": 3, "posId": 2 },
///   "chain": { "path": "/mnt/chain/chain.db" },
///   "sync": { "intervalSecs": 30 }
/// }
/// ```
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TillsyncSettings {
    pub store: StoreSettings,
    pub local: LocalDbSettings,
    pub chain: ChainDbSettings,
    pub sync: SyncSettings,
    pub server: ServerSettings,
    pub telemetry: TelemetrySettings,
}

/// Identity of this terminal within the chain.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StoreSettings {
    pub store_id: i64,
    pub pos_id: i64,
    /// Recorded as `changed_by` on every audit entry written by sync.
    pub actor: String,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            store_id: 1,
            pos_id: 1,
            actor: "system_sync".to_string(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LocalDbSettings {
    pub path: String,
    /// Delay before reconnecting after the local store drops.
    pub reconnect_backoff_secs: u64,
}

impl Default for LocalDbSettings {
    fn default() -> Self {
        Self {
            path: data_dir().join("local.db").to_string_lossy().into_owned(),
            reconnect_backoff_secs: 5,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChainDbSettings {
    pub path: String,
}

impl Default for ChainDbSettings {
    fn default() -> Self {
        Self {
            path: data_dir().join("chain.db").to_string_lossy().into_owned(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SyncSettings {
    pub enabled: bool,
    pub interval_secs: u64,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 60,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5000,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TelemetrySettings {
    /// Default level; `RUST_LOG` still wins when set.
    pub log_level: String,
    /// Persist warn+ records to `log_db_path`.
    pub log_to_sqlite: bool,
    pub log_db_path: String,
}

impl Default for TelemetrySettings {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_to_sqlite: true,
            log_db_path: data_dir().join("logs.db").to_string_lossy().into_owned(),
        }
    }
}

/// `~/.tillsync`, falling back to `/tmp/.tillsync` without a home directory.
pub fn home_dir() -> std::path::PathBuf {
    std::env::var("HOME")
        .map(std::path::PathBuf::from)
        .unwrap_or_else(|_| std::path::PathBuf::from("/tmp"))
        .join(".tillsync")
}

fn data_dir() -> std::path::PathBuf {
    home_dir().join("database")
}

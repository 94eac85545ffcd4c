//! Settings loading: compiled defaults, then `~/.tillsync/settings.json`
//! deep-merged on top, then `TILLSYNC_*` environment overrides.
//!
//! Merge rules: objects merge per key, arrays and scalars are replaced, and
//! `null` in the file leaves the default untouched.

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::Result;
use crate::types::{home_dir, TillsyncSettings};

pub fn settings_path() -> PathBuf {
    home_dir().join("settings.json")
}

pub fn load_settings() -> Result<TillsyncSettings> {
    load_settings_from_path(&settings_path())
}

/// Load from a specific file. A missing file yields defaults; malformed JSON is
/// an error.
pub fn load_settings_from_path(path: &Path) -> Result<TillsyncSettings> {
    let defaults = serde_json::to_value(TillsyncSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: TillsyncSettings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings, |name| std::env::var(name).ok());
    Ok(settings)
}

pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = match target_map.remove(&key) {
                    Some(target_val) => deep_merge(target_val, source_val),
                    None => source_val,
                };
                target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply `TILLSYNC_*` overrides read through `lookup`. Values that fail to
/// parse are ignored with a warning.
pub fn apply_env_overrides<F>(settings: &mut TillsyncSettings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let env = EnvReader { lookup };

    if let Some(v) = env.i64("TILLSYNC_STORE_ID", 1, i64::MAX) {
        settings.store.store_id = v;
    }
    if let Some(v) = env.i64("TILLSYNC_POS_ID", 1, i64::MAX) {
        settings.store.pos_id = v;
    }
    if let Some(v) = env.string("TILLSYNC_ACTOR") {
        settings.store.actor = v;
    }
    if let Some(v) = env.string("TILLSYNC_LOCAL_DB") {
        settings.local.path = v;
    }
    if let Some(v) = env.u64("TILLSYNC_LOCAL_RECONNECT_SECS", 1, 3600) {
        settings.local.reconnect_backoff_secs = v;
    }
    if let Some(v) = env.string("TILLSYNC_CHAIN_DB") {
        settings.chain.path = v;
    }
    if let Some(v) = env.bool("TILLSYNC_SYNC_ENABLED") {
        settings.sync.enabled = v;
    }
    if let Some(v) = env.u64("TILLSYNC_SYNC_INTERVAL_SECS", 1, 86_400) {
        settings.sync.interval_secs = v;
    }
    if let Some(v) = env.string("TILLSYNC_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = env.u64("TILLSYNC_PORT", 1, 65_535) {
        settings.server.port = v as u16;
    }
    if let Some(v) = env.string("TILLSYNC_LOG_LEVEL") {
        settings.telemetry.log_level = v;
    }
    if let Some(v) = env.bool("TILLSYNC_LOG_TO_SQLITE") {
        settings.telemetry.log_to_sqlite = v;
    }
}

/// Accepts `true`/`1`/`yes`/`on` and `false`/`0`/`no`/`off`, case-insensitively.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

struct EnvReader<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> EnvReader<F> {
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.is_empty())
    }

    fn bool(&self, name: &str) -> Option<bool> {
        let val = self.string(name)?;
        let parsed = parse_bool(&val);
        if parsed.is_none() {
            tracing::warn!(key = name, value = %val, "invalid boolean env var, ignoring");
        }
        parsed
    }

    fn u64(&self, name: &str, min: u64, max: u64) -> Option<u64> {
        let val = self.string(name)?;
        let parsed = val.parse::<u64>().ok().filter(|n| (min..=max).contains(n));
        if parsed.is_none() {
            tracing::warn!(key = name, value = %val, "invalid integer env var, ignoring");
        }
        parsed
    }

    fn i64(&self, name: &str, min: i64, max: i64) -> Option<i64> {
        let val = self.string(name)?;
        let parsed = val.parse::<i64>().ok().filter(|n| (min..=max).contains(n));
        if parsed.is_none() {
            tracing::warn!(key = name, value = %val, "invalid integer env var, ignoring");
        }
        parsed
    }
}

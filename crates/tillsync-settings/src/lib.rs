//! # tillsync-settings
//!
//! Settings are layered, lowest priority first:
//! 1. compiled defaults ([`TillsyncSettings::default()`])
//! 2. `~/.tillsync/settings.json`, deep-merged over the defaults
//! 3. `TILLSYNC_*` environment variables
//!
//! Command-line flags are applied by the binary on top of the result.

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{apply_env_overrides, deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::*;

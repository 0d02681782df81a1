//! # chime-settings
//!
//! Layered configuration for the Chime relay.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`ChimeSettings::default()`]
//! 2. **Settings file**: `~/.chime/settings.json` or an explicit path,
//!    deep-merged over defaults
//! 3. **Environment variables**: `CHIME_*` overrides (highest priority)
//!
//! The binary applies its CLI flags on top and then calls
//! [`ChimeSettings::validate`].

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{
    apply_env_overrides, chime_home, deep_merge, load_settings, load_settings_from_path,
    settings_path,
};
pub use types::*;

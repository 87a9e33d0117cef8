//! # relay-settings
//!
//! Configuration with layered sources.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`RelaySettings::default()`]
//! 2. **Settings file**: `$RELAY_SETTINGS` or `~/.relay/settings.json`
//!    (deep-merged over defaults)
//! 3. **Environment variables**: `RELAY_*` overrides (highest priority)

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::*;

use std::sync::OnceLock;

static SETTINGS: OnceLock<RelaySettings> = OnceLock::new();

/// Get the global settings instance.
///
/// The first call loads from disk and the environment; a load failure falls
/// back to compiled defaults.
pub fn get_settings() -> &'static RelaySettings {
    SETTINGS.get_or_init(|| {
        load_settings().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "failed to load settings, using defaults");
            RelaySettings::default()
        })
    })
}

/// Initialize the global settings with a specific value.
///
/// Returns the value back if settings were already initialized.
#[allow(clippy::result_large_err)]
pub fn init_settings(settings: RelaySettings) -> std::result::Result<(), RelaySettings> {
    SETTINGS.set(settings)
}

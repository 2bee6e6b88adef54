//! Relay Configuration Module
//!
//! Service configuration loaded from TOML.
//!
//! ## Loading Order
//!
//! 1. `RELAY_CONFIG` environment variable (path to TOML file)
//! 2. `relay_config.toml` in the current working directory
//! 3. Built-in defaults (`defaults.rs`)
//!
//! ## Usage
//!
//! `main` installs the loaded config once with `config::init()`. Pipeline
//! components receive the values they need through their constructors, so
//! only the binary edge reads the global through `config::get()`.

mod relay_config;
pub mod defaults;

pub use relay_config::*;

use std::sync::OnceLock;

/// Global relay configuration, initialized once at startup.
static RELAY_CONFIG: OnceLock<RelayConfig> = OnceLock::new();

/// Install the global relay configuration.
///
/// A second call is ignored with a warning.
pub fn init(config: RelayConfig) {
    if RELAY_CONFIG.set(config).is_err() {
        tracing::warn!("config::init() called more than once, ignoring");
    }
}

/// The installed configuration, or `None` before `init()`.
pub fn get() -> Option<&'static RelayConfig> {
    RELAY_CONFIG.get()
}

/// Check whether the config has been initialized.
pub fn is_initialized() -> bool {
    RELAY_CONFIG.get().is_some()
}

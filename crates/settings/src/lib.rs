//! PayGate Settings
//!
//! Environment-level configuration for the payment core: treasury addresses,
//! token pricing, purchase limits, expiry windows, poller cadence, oracle and
//! chain endpoints. JSON file storage with load-or-default semantics.
//!
//! All of these are deployment knobs, not invariants of the design; the
//! engine reads them once at construction.

mod config;

pub use config::{
    ChainEndpoints, ExpirySettings, InvoiceSettings, OracleSettings, Settings, TreasurySettings,
};

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("Failed to read settings: {0}")]
    ReadError(std::io::Error),

    #[error("Failed to write settings: {0}")]
    WriteError(std::io::Error),

    #[error("Failed to parse settings: {0}")]
    ParseError(serde_json::Error),

    #[error("Failed to create config directory: {0}")]
    CreateDirError(std::io::Error),
}

pub type Result<T> = std::result::Result<T, SettingsError>;

/// Get the default settings file path
pub fn default_settings_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("paygate")
        .join("settings.json")
}

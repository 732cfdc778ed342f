//! Configuration types

use std::path::PathBuf;

use paygate_core::{PayCurrency, PayMethod};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{default_settings_path, Result, SettingsError};

/// Main settings structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Treasury addresses per currency
    #[serde(default)]
    pub treasury: TreasurySettings,

    /// Fixed token price in USD
    #[serde(default = "default_token_price_usd")]
    pub token_price_usd: f64,

    /// Minimum purchase size in tokens
    #[serde(default = "default_min_purchase")]
    pub min_purchase: u64,

    /// Accepted under-payment tolerance (fraction, e.g. 0.01 = 1%)
    #[serde(default = "default_tolerance")]
    pub amount_tolerance: f64,

    /// Order expiry windows per pay-in method
    #[serde(default)]
    pub expiry: ExpirySettings,

    /// Reconciliation poller tick interval in seconds
    #[serde(default = "default_poller_interval")]
    pub poller_interval_secs: u64,

    /// Price oracle settings
    #[serde(default)]
    pub oracle: OracleSettings,

    /// External chain endpoints
    #[serde(default)]
    pub chains: ChainEndpoints,

    /// Invoice platform settings
    #[serde(default)]
    pub invoice: InvoiceSettings,

    /// Custom settings file path (not serialized)
    #[serde(skip)]
    config_path: Option<PathBuf>,
}

fn default_token_price_usd() -> f64 {
    0.01
}

fn default_min_purchase() -> u64 {
    100
}

fn default_tolerance() -> f64 {
    0.01
}

fn default_poller_interval() -> u64 {
    5
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            treasury: TreasurySettings::default(),
            token_price_usd: default_token_price_usd(),
            min_purchase: default_min_purchase(),
            amount_tolerance: default_tolerance(),
            expiry: ExpirySettings::default(),
            poller_interval_secs: default_poller_interval(),
            oracle: OracleSettings::default(),
            chains: ChainEndpoints::default(),
            invoice: InvoiceSettings::default(),
            config_path: None,
        }
    }
}

impl Settings {
    /// Load settings from the default path, or create defaults
    pub fn load_or_default() -> Result<Self> {
        Self::load_from(&default_settings_path())
    }

    /// Load settings from a specific path, or create defaults
    pub fn load_from(path: &PathBuf) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path).map_err(SettingsError::ReadError)?;
            let mut settings: Settings =
                serde_json::from_str(&content).map_err(SettingsError::ParseError)?;
            settings.config_path = Some(path.clone());
            info!("Loaded settings from {:?}", path);
            Ok(settings)
        } else {
            let mut settings = Self::default();
            settings.config_path = Some(path.clone());
            Ok(settings)
        }
    }

    /// Save settings to the configured path
    pub fn save(&self) -> Result<()> {
        let path = self
            .config_path
            .clone()
            .unwrap_or_else(default_settings_path);
        self.save_to(&path)
    }

    /// Save settings to a specific path
    pub fn save_to(&self, path: &PathBuf) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent).map_err(SettingsError::CreateDirError)?;
            }
        }

        let content = serde_json::to_string_pretty(self).map_err(SettingsError::ParseError)?;
        std::fs::write(path, content).map_err(SettingsError::WriteError)?;
        info!("Saved settings to {:?}", path);
        Ok(())
    }

    /// Treasury address for a currency (invoice flows have none)
    pub fn treasury_for(&self, currency: PayCurrency) -> Option<&str> {
        match currency {
            PayCurrency::Sol | PayCurrency::Usdc => Some(self.treasury.account_chain.as_str()),
            PayCurrency::Ton => Some(self.treasury.memo_chain.as_str()),
            PayCurrency::Stars => None,
        }
    }

    /// Expiry window in seconds for a pay-in method
    pub fn expiry_for(&self, method: PayMethod) -> u64 {
        match method {
            PayMethod::Account => self.expiry.account_secs,
            PayMethod::Memo => self.expiry.memo_secs,
            PayMethod::Invoice => self.expiry.invoice_secs,
        }
    }
}

/// Treasury receiving addresses, one per chain
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreasurySettings {
    /// Account-chain treasury (base58)
    #[serde(default = "default_account_treasury")]
    pub account_chain: String,

    /// Memo-chain treasury
    #[serde(default = "default_memo_treasury")]
    pub memo_chain: String,
}

fn default_account_treasury() -> String {
    "3bbdiPDBEQHjnQVjAnQ9uKDhPFYbT1njnN6kayCivcGo".to_string()
}

fn default_memo_treasury() -> String {
    "EQDrjaLahLkMB-hMCmkzOyBuHJ139ZUYmPHu6RRBKnbdLIYI".to_string()
}

impl Default for TreasurySettings {
    fn default() -> Self {
        Self {
            account_chain: default_account_treasury(),
            memo_chain: default_memo_treasury(),
        }
    }
}

/// Order expiry windows per pay-in method.
///
/// Signed-transaction flows are single-use and short-lived; memo flows stay
/// open long enough for a wallet app round trip plus indexer lag.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpirySettings {
    #[serde(default = "default_account_expiry")]
    pub account_secs: u64,

    #[serde(default = "default_memo_expiry")]
    pub memo_secs: u64,

    #[serde(default = "default_invoice_expiry")]
    pub invoice_secs: u64,
}

fn default_account_expiry() -> u64 {
    10 * 60
}

fn default_memo_expiry() -> u64 {
    24 * 3600
}

fn default_invoice_expiry() -> u64 {
    3600
}

impl Default for ExpirySettings {
    fn default() -> Self {
        Self {
            account_secs: default_account_expiry(),
            memo_secs: default_memo_expiry(),
            invoice_secs: default_invoice_expiry(),
        }
    }
}

/// Price oracle settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OracleSettings {
    /// Price feed base URL (CoinGecko-compatible simple/price endpoint)
    #[serde(default = "default_feed_url")]
    pub feed_url: String,

    /// Cache refresh interval
    #[serde(default = "default_refresh_secs")]
    pub refresh_secs: u64,

    /// Age past which a served rate is flagged stale
    #[serde(default = "default_max_staleness")]
    pub max_staleness_secs: u64,

    /// Reject quotes computed from a stale rate
    #[serde(default)]
    pub reject_stale_quotes: bool,

    /// Fixed USD value of one platform star
    #[serde(default = "default_usd_per_star")]
    pub usd_per_star: f64,
}

fn default_feed_url() -> String {
    "https://api.coingecko.com/api/v3/simple/price".to_string()
}

fn default_refresh_secs() -> u64 {
    60
}

fn default_max_staleness() -> u64 {
    15 * 60
}

fn default_usd_per_star() -> f64 {
    0.02
}

impl Default for OracleSettings {
    fn default() -> Self {
        Self {
            feed_url: default_feed_url(),
            refresh_secs: default_refresh_secs(),
            max_staleness_secs: default_max_staleness(),
            reject_stale_quotes: false,
            usd_per_star: default_usd_per_star(),
        }
    }
}

/// External chain endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainEndpoints {
    /// Account-chain JSON-RPC endpoint
    #[serde(default = "default_account_rpc")]
    pub account_rpc_url: String,

    /// Memo-chain indexer HTTP endpoint
    #[serde(default = "default_memo_indexer")]
    pub memo_indexer_url: String,

    /// Optional indexer API key
    #[serde(default)]
    pub memo_indexer_api_key: Option<String>,
}

fn default_account_rpc() -> String {
    "https://api.devnet.solana.com".to_string()
}

fn default_memo_indexer() -> String {
    "https://testnet.toncenter.com/api/v2".to_string()
}

impl Default for ChainEndpoints {
    fn default() -> Self {
        Self {
            account_rpc_url: default_account_rpc(),
            memo_indexer_url: default_memo_indexer(),
            memo_indexer_api_key: None,
        }
    }
}

/// Invoice platform settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvoiceSettings {
    /// Platform bot API base URL (token appended by the client)
    #[serde(default = "default_invoice_api")]
    pub api_url: String,

    /// Bot token for invoice creation
    #[serde(default)]
    pub bot_token: String,

    /// Shared secret the platform echoes back on payment callbacks
    #[serde(default)]
    pub webhook_secret: String,
}

fn default_invoice_api() -> String {
    "https://api.telegram.org".to_string()
}

impl Default for InvoiceSettings {
    fn default() -> Self {
        Self {
            api_url: default_invoice_api(),
            bot_token: String::new(),
            webhook_secret: String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.token_price_usd, 0.01);
        assert_eq!(settings.min_purchase, 100);
        assert_eq!(settings.amount_tolerance, 0.01);
        assert_eq!(settings.expiry.account_secs, 600);
        assert_eq!(settings.expiry.memo_secs, 86_400);
        assert_eq!(settings.poller_interval_secs, 5);
        assert!(!settings.oracle.reject_stale_quotes);
    }

    #[test]
    fn test_treasury_lookup() {
        let settings = Settings::default();
        assert!(settings.treasury_for(PayCurrency::Sol).is_some());
        assert_eq!(
            settings.treasury_for(PayCurrency::Sol),
            settings.treasury_for(PayCurrency::Usdc)
        );
        assert!(settings.treasury_for(PayCurrency::Ton).is_some());
        assert!(settings.treasury_for(PayCurrency::Stars).is_none());
    }

    #[test]
    fn test_expiry_lookup() {
        let settings = Settings::default();
        assert!(settings.expiry_for(PayMethod::Account) < settings.expiry_for(PayMethod::Memo));
        assert_eq!(settings.expiry_for(PayMethod::Invoice), 3600);
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");

        let mut settings = Settings::default();
        settings.min_purchase = 250;
        settings.oracle.reject_stale_quotes = true;
        settings.save_to(&path).unwrap();

        let loaded = Settings::load_from(&path).unwrap();
        assert_eq!(loaded.min_purchase, 250);
        assert!(loaded.oracle.reject_stale_quotes);
    }

    #[test]
    fn test_load_missing_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nope.json");
        let settings = Settings::load_from(&path).unwrap();
        assert_eq!(settings.min_purchase, 100);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"min_purchase": 500}"#).unwrap();

        let settings = Settings::load_from(&path).unwrap();
        assert_eq!(settings.min_purchase, 500);
        assert_eq!(settings.token_price_usd, 0.01);
    }
}

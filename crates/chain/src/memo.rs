//! Memo-chain indexer client
//!
//! On this chain the payer's wallet app constructs the transfer, so the
//! only binding back to an order is the order id embedded as the transfer
//! comment. Verification scans the treasury's recent incoming transfers
//! for a matching comment.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tracing::debug;

use crate::{ChainError, ChainMode, Result};

/// Memo-chain indexer configuration
#[derive(Debug, Clone)]
pub struct MemoIndexerConfig {
    pub mode: ChainMode,
    /// Indexer HTTP base URL (only used in Live mode)
    pub base_url: String,
    /// Optional indexer API key
    pub api_key: Option<String>,
    /// Per-request timeout
    pub request_timeout_secs: u64,
}

impl Default for MemoIndexerConfig {
    fn default() -> Self {
        Self {
            mode: ChainMode::Mock,
            base_url: "https://testnet.toncenter.com/api/v2".to_string(),
            api_key: None,
            request_timeout_secs: 8,
        }
    }
}

impl MemoIndexerConfig {
    /// Create a mock configuration for development
    pub fn mock() -> Self {
        Self::default()
    }

    /// Create a live configuration against an indexer endpoint
    pub fn live(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            mode: ChainMode::Live,
            base_url: base_url.into(),
            api_key,
            ..Default::default()
        }
    }
}

/// An incoming transfer observed by the indexer
#[derive(Debug, Clone, PartialEq)]
pub struct MemoTransfer {
    pub tx_hash: String,
    /// Sender address
    pub source: String,
    /// Amount in nanotons
    pub value: u64,
    /// Transfer comment (carries the order id when the payer followed the
    /// deep link)
    pub comment: String,
}

/// Client for treasury incoming-transfer scans
pub struct MemoIndexerClient {
    config: MemoIndexerConfig,
    http: reqwest::Client,
    /// Mock state: transfers per destination address (only used in Mock mode)
    mock_transfers: Arc<RwLock<HashMap<String, Vec<MemoTransfer>>>>,
}

impl MemoIndexerClient {
    pub fn new(config: MemoIndexerConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .unwrap_or_default();

        Self {
            config,
            http,
            mock_transfers: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn is_mock(&self) -> bool {
        self.config.mode == ChainMode::Mock
    }

    /// Inject an incoming transfer (mock mode only, for testing)
    pub fn inject_transfer(&self, address: &str, transfer: MemoTransfer) -> Result<()> {
        if !self.is_mock() {
            return Err(ChainError::NotMock);
        }
        let mut transfers = self.mock_transfers.write().expect("indexer lock poisoned");
        debug!(
            "[MOCK] Injected transfer {} -> {} ({} nanotons)",
            transfer.tx_hash, address, transfer.value
        );
        transfers
            .entry(address.to_string())
            .or_default()
            .push(transfer);
        Ok(())
    }

    /// Most recent incoming transfers to `address`, newest first.
    ///
    /// Indexer propagation lags the chain, so an empty result is not
    /// evidence of absence. Transport failures surface as
    /// `ChainError::Indexer`.
    pub async fn incoming_transfers(&self, address: &str, limit: u32) -> Result<Vec<MemoTransfer>> {
        if self.is_mock() {
            let transfers = self.mock_transfers.read().expect("indexer lock poisoned");
            let mut found = transfers.get(address).cloned().unwrap_or_default();
            found.reverse();
            found.truncate(limit as usize);
            return Ok(found);
        }

        let mut url = format!(
            "{}/getTransactions?address={}&limit={}",
            self.config.base_url, address, limit
        );
        if let Some(key) = &self.config.api_key {
            url.push_str(&format!("&api_key={}", key));
        }

        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| ChainError::Indexer(format!("getTransactions: {}", e)))?;

        if !response.status().is_success() {
            return Err(ChainError::Indexer(format!(
                "getTransactions status {}",
                response.status()
            )));
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ChainError::Indexer(format!("getTransactions body: {}", e)))?;

        if !body.get("ok").and_then(|v| v.as_bool()).unwrap_or(false) {
            return Err(ChainError::Indexer("indexer returned ok=false".to_string()));
        }

        let result = body
            .get("result")
            .and_then(|v| v.as_array())
            .ok_or_else(|| ChainError::MalformedResponse("missing result".to_string()))?;

        let transfers = result
            .iter()
            .filter_map(Self::parse_transfer)
            .collect::<Vec<_>>();

        debug!(
            "Indexer returned {} incoming transfers for {}",
            transfers.len(),
            address
        );
        Ok(transfers)
    }

    /// Extract an incoming transfer from an indexer transaction entry.
    /// Entries without an in-message (outgoing, system) are skipped.
    fn parse_transfer(entry: &serde_json::Value) -> Option<MemoTransfer> {
        let in_msg = entry.get("in_msg")?;
        let value = in_msg
            .get("value")
            .and_then(|v| {
                // toncenter reports value as a decimal string
                v.as_str()
                    .and_then(|s| s.parse::<u64>().ok())
                    .or_else(|| v.as_u64())
            })
            .unwrap_or(0);

        Some(MemoTransfer {
            tx_hash: entry
                .pointer("/transaction_id/hash")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
            source: in_msg
                .get("source")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
            value,
            comment: in_msg
                .get("message")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
        })
    }

    /// Wallet deep link asking for a transfer of `amount` nanotons to
    /// `address` with `memo` as the comment
    pub fn deep_link(address: &str, amount: u64, memo: &str) -> String {
        format!("ton://transfer/{}?amount={}&text={}", address, amount, memo)
    }
}

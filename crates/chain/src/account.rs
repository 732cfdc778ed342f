//! Account-chain JSON-RPC client
//!
//! Transfers on this chain are identified by the base58 signature the
//! payer's wallet returns at submission time. Verification fetches the
//! transaction and inspects the treasury account's pre/post balance delta.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use serde_json::json;
use tracing::{debug, warn};

use crate::{ChainError, ChainMode, Result};

/// Account-chain client configuration
#[derive(Debug, Clone)]
pub struct AccountChainConfig {
    pub mode: ChainMode,
    /// JSON-RPC endpoint (only used in Live mode)
    pub rpc_url: String,
    /// Commitment level for lookups
    pub commitment: String,
    /// Per-request timeout
    pub request_timeout_secs: u64,
}

impl Default for AccountChainConfig {
    fn default() -> Self {
        Self {
            mode: ChainMode::Mock,
            rpc_url: "https://api.devnet.solana.com".to_string(),
            commitment: "confirmed".to_string(),
            request_timeout_secs: 8,
        }
    }
}

impl AccountChainConfig {
    /// Create a mock configuration for development
    pub fn mock() -> Self {
        Self::default()
    }

    /// Create a live configuration against an RPC endpoint
    pub fn live(rpc_url: impl Into<String>) -> Self {
        Self {
            mode: ChainMode::Live,
            rpc_url: rpc_url.into(),
            ..Default::default()
        }
    }
}

/// A settled transaction as seen by the verifier
#[derive(Debug, Clone, PartialEq)]
pub struct AccountTransaction {
    pub signature: String,
    /// All account addresses touched by the transaction
    pub account_keys: Vec<String>,
    /// Lamport balances before, indexed like `account_keys`
    pub pre_balances: Vec<u64>,
    /// Lamport balances after, indexed like `account_keys`
    pub post_balances: Vec<u64>,
    /// On-chain execution error, if the transaction failed
    pub err: Option<String>,
}

impl AccountTransaction {
    /// Net lamports received by `address`, or None if the address was not
    /// touched by the transaction
    pub fn received_by(&self, address: &str) -> Option<i128> {
        let idx = self.account_keys.iter().position(|k| k == address)?;
        let pre = *self.pre_balances.get(idx)? as i128;
        let post = *self.post_balances.get(idx)? as i128;
        Some(post - pre)
    }
}

/// Client for signature-identified transaction lookup
pub struct AccountChainClient {
    config: AccountChainConfig,
    http: reqwest::Client,
    /// Mock state (only used in Mock mode)
    mock_txs: Arc<RwLock<HashMap<String, AccountTransaction>>>,
}

impl AccountChainClient {
    pub fn new(config: AccountChainConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .unwrap_or_default();

        Self {
            config,
            http,
            mock_txs: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn is_mock(&self) -> bool {
        self.config.mode == ChainMode::Mock
    }

    /// Base58 check for a 32-byte account address
    pub fn is_valid_address(address: &str) -> bool {
        matches!(bs58::decode(address).into_vec(), Ok(bytes) if bytes.len() == 32)
    }

    /// Base58 check for a 64-byte transaction signature
    pub fn is_valid_signature(signature: &str) -> bool {
        matches!(bs58::decode(signature).into_vec(), Ok(bytes) if bytes.len() == 64)
    }

    /// Inject a settled transaction (mock mode only, for testing)
    pub fn inject_transaction(&self, tx: AccountTransaction) -> Result<()> {
        if !self.is_mock() {
            return Err(ChainError::NotMock);
        }
        let mut txs = self.mock_txs.write().expect("chain lock poisoned");
        debug!("[MOCK] Injected transaction {}", tx.signature);
        txs.insert(tx.signature.clone(), tx);
        Ok(())
    }

    /// Fetch a transaction by signature.
    ///
    /// `Ok(None)` means the chain has not seen it (yet) - not a transport
    /// failure. Transport failures surface as `ChainError::Rpc`.
    pub async fn fetch_transaction(&self, signature: &str) -> Result<Option<AccountTransaction>> {
        if self.is_mock() {
            let txs = self.mock_txs.read().expect("chain lock poisoned");
            return Ok(txs.get(signature).cloned());
        }

        let request = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "getTransaction",
            "params": [
                signature,
                {
                    "encoding": "json",
                    "commitment": self.config.commitment,
                    "maxSupportedTransactionVersion": 0,
                }
            ]
        });

        let response = self
            .http
            .post(&self.config.rpc_url)
            .json(&request)
            .send()
            .await
            .map_err(|e| ChainError::Rpc(format!("getTransaction: {}", e)))?;

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ChainError::Rpc(format!("getTransaction body: {}", e)))?;

        if let Some(err) = body.get("error") {
            warn!("getTransaction returned error: {}", err);
            return Err(ChainError::Rpc(err.to_string()));
        }

        let result = match body.get("result") {
            Some(r) if !r.is_null() => r,
            _ => return Ok(None),
        };

        Self::parse_transaction(signature, result).map(Some)
    }

    fn parse_transaction(signature: &str, result: &serde_json::Value) -> Result<AccountTransaction> {
        let meta = result
            .get("meta")
            .ok_or_else(|| ChainError::MalformedResponse("missing meta".to_string()))?;

        let balances = |key: &str| -> Result<Vec<u64>> {
            meta.get(key)
                .and_then(|v| v.as_array())
                .ok_or_else(|| ChainError::MalformedResponse(format!("missing {}", key)))?
                .iter()
                .map(|v| {
                    v.as_u64()
                        .ok_or_else(|| ChainError::MalformedResponse(format!("bad {}", key)))
                })
                .collect()
        };

        let account_keys = result
            .pointer("/transaction/message/accountKeys")
            .and_then(|v| v.as_array())
            .ok_or_else(|| ChainError::MalformedResponse("missing accountKeys".to_string()))?
            .iter()
            .map(|v| {
                // Either plain strings or {pubkey: ...} objects depending on encoding
                v.as_str()
                    .map(str::to_string)
                    .or_else(|| {
                        v.get("pubkey")
                            .and_then(|p| p.as_str())
                            .map(str::to_string)
                    })
                    .ok_or_else(|| ChainError::MalformedResponse("bad accountKeys".to_string()))
            })
            .collect::<Result<Vec<_>>>()?;

        let err = meta.get("err").filter(|v| !v.is_null()).map(|v| v.to_string());

        Ok(AccountTransaction {
            signature: signature.to_string(),
            account_keys,
            pre_balances: balances("preBalances")?,
            post_balances: balances("postBalances")?,
            err,
        })
    }
}

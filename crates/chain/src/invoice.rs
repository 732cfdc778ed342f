//! Invoice platform client
//!
//! Star invoices settle through a webhook-style "payment succeeded"
//! callback from the platform, not through polling. The callback itself is
//! the proof, which makes authenticating it the trust boundary: the shared
//! webhook secret must match before the payload is believed.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::{ChainError, ChainMode, Result};

/// Invoice platform configuration
#[derive(Debug, Clone)]
pub struct InvoiceConfig {
    pub mode: ChainMode,
    /// Platform bot API base URL (only used in Live mode)
    pub api_url: String,
    /// Bot token for invoice creation
    pub bot_token: String,
    /// Shared secret the platform echoes back on payment callbacks
    pub webhook_secret: String,
    /// Per-request timeout
    pub request_timeout_secs: u64,
}

impl Default for InvoiceConfig {
    fn default() -> Self {
        Self {
            mode: ChainMode::Mock,
            api_url: "https://api.telegram.org".to_string(),
            bot_token: String::new(),
            webhook_secret: String::new(),
            request_timeout_secs: 8,
        }
    }
}

impl InvoiceConfig {
    /// Create a mock configuration for development
    pub fn mock(webhook_secret: impl Into<String>) -> Self {
        Self {
            webhook_secret: webhook_secret.into(),
            ..Default::default()
        }
    }

    /// Create a live configuration
    pub fn live(
        api_url: impl Into<String>,
        bot_token: impl Into<String>,
        webhook_secret: impl Into<String>,
    ) -> Self {
        Self {
            mode: ChainMode::Live,
            api_url: api_url.into(),
            bot_token: bot_token.into(),
            webhook_secret: webhook_secret.into(),
            request_timeout_secs: 8,
        }
    }
}

/// Client for star-invoice creation and callback authentication
pub struct InvoiceClient {
    config: InvoiceConfig,
    http: reqwest::Client,
    /// Counter for deterministic mock invoice links
    mock_counter: Arc<AtomicU64>,
}

impl InvoiceClient {
    pub fn new(config: InvoiceConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .unwrap_or_default();

        Self {
            config,
            http,
            mock_counter: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn is_mock(&self) -> bool {
        self.config.mode == ChainMode::Mock
    }

    /// Create an invoice link for `amount` stars. The JSON payload travels
    /// with the invoice and comes back verbatim in the payment callback.
    pub async fn create_invoice_link(
        &self,
        title: &str,
        description: &str,
        payload: &serde_json::Value,
        amount: u64,
    ) -> Result<String> {
        if self.is_mock() {
            let n = self.mock_counter.fetch_add(1, Ordering::Relaxed) + 1;
            let link = format!("https://invoice.mock/stars/{}/{}", amount, n);
            info!("[MOCK] Created invoice link {}", link);
            return Ok(link);
        }

        let url = format!(
            "{}/bot{}/createInvoiceLink",
            self.config.api_url, self.config.bot_token
        );

        let request = json!({
            "title": title,
            "description": description,
            "payload": payload.to_string(),
            // Empty provider token selects the platform's native stars
            "provider_token": "",
            "currency": "XTR",
            "prices": [{ "label": title, "amount": amount }],
        });

        let response = self
            .http
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| ChainError::InvoicePlatform(format!("createInvoiceLink: {}", e)))?;

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ChainError::InvoicePlatform(format!("createInvoiceLink body: {}", e)))?;

        if !body.get("ok").and_then(|v| v.as_bool()).unwrap_or(false) {
            let description = body
                .get("description")
                .and_then(|v| v.as_str())
                .unwrap_or("unknown");
            return Err(ChainError::InvoicePlatform(format!(
                "createInvoiceLink rejected: {}",
                description
            )));
        }

        let link = body
            .get("result")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ChainError::MalformedResponse("missing invoice link".to_string()))?
            .to_string();

        debug!("Created invoice link for {} stars", amount);
        Ok(link)
    }

    /// Authenticate a payment callback by its echoed secret.
    ///
    /// Compares SHA-256 digests so the comparison shape does not depend on
    /// where the strings first differ.
    pub fn authenticate_callback(&self, auth_token: &str) -> bool {
        if self.config.webhook_secret.is_empty() {
            // No secret configured: refuse everything rather than trust
            // everything
            return false;
        }
        let expected = Sha256::digest(self.config.webhook_secret.as_bytes());
        let presented = Sha256::digest(auth_token.as_bytes());
        expected == presented
    }
}

//! Payment service facade
//!
//! Wires the builder, verifier, crediting engine and poller together over
//! one store and one settings set, and stamps wall-clock time on the way
//! in so the inner components stay clock-free and testable.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use paygate_chain::{
    AccountChainClient, AccountChainConfig, InvoiceClient, InvoiceConfig, MemoIndexerClient,
    MemoIndexerConfig,
};
use paygate_core::{
    CreditRecord, LedgerAccount, OrderId, PayCurrency, PayInstructions, PaygateError,
    PaymentOrder, Proof, Result, UnixTime, VerificationResult, VerifyStatus,
};
use paygate_ledger::{LedgerStore, SwapDirection};
use paygate_oracle::{OracleConfig, PriceOracle, QuoteCalculator, QuoteConfig};
use paygate_settings::Settings;
use tokio::task::JoinHandle;
use tracing::info;

use crate::{CreditEngine, CreditOutcome, OrderBuilder, ReconciliationPoller, Verifier};

/// Current unix time in seconds
pub fn unix_now() -> UnixTime {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

pub struct PaymentService {
    store: Arc<LedgerStore>,
    builder: OrderBuilder,
    verifier: Arc<Verifier>,
    credit: Arc<CreditEngine>,
    invoice: Arc<InvoiceClient>,
    account: Arc<AccountChainClient>,
    memo: Arc<MemoIndexerClient>,
    settings: Arc<Settings>,
}

impl PaymentService {
    /// Service with mock chain, indexer, invoice and oracle backends
    pub fn mock(settings: Settings, store: Arc<LedgerStore>) -> Self {
        let account = Arc::new(AccountChainClient::new(AccountChainConfig::mock()));
        let memo = Arc::new(MemoIndexerClient::new(MemoIndexerConfig::mock()));
        let invoice = Arc::new(InvoiceClient::new(InvoiceConfig::mock(
            settings.invoice.webhook_secret.clone(),
        )));
        let oracle = PriceOracle::new(OracleConfig::mock());
        Self::assemble(settings, store, account, memo, invoice, oracle)
    }

    /// Service against the configured live endpoints
    pub fn live(settings: Settings, store: Arc<LedgerStore>) -> Self {
        let account = Arc::new(AccountChainClient::new(AccountChainConfig::live(
            settings.chains.account_rpc_url.clone(),
        )));
        let memo = Arc::new(MemoIndexerClient::new(MemoIndexerConfig::live(
            settings.chains.memo_indexer_url.clone(),
            settings.chains.memo_indexer_api_key.clone(),
        )));
        let invoice = Arc::new(InvoiceClient::new(InvoiceConfig::live(
            settings.invoice.api_url.clone(),
            settings.invoice.bot_token.clone(),
            settings.invoice.webhook_secret.clone(),
        )));
        let oracle = PriceOracle::new(OracleConfig {
            refresh_secs: settings.oracle.refresh_secs,
            max_staleness_secs: settings.oracle.max_staleness_secs,
            ..OracleConfig::live(settings.oracle.feed_url.clone())
        });
        Self::assemble(settings, store, account, memo, invoice, oracle)
    }

    fn assemble(
        settings: Settings,
        store: Arc<LedgerStore>,
        account: Arc<AccountChainClient>,
        memo: Arc<MemoIndexerClient>,
        invoice: Arc<InvoiceClient>,
        oracle: PriceOracle,
    ) -> Self {
        let settings = Arc::new(settings);
        let calculator = QuoteCalculator::new(
            oracle,
            QuoteConfig {
                token_price_usd: settings.token_price_usd,
                min_purchase: settings.min_purchase,
                usd_per_star: settings.oracle.usd_per_star,
                reject_stale_quotes: settings.oracle.reject_stale_quotes,
                ..QuoteConfig::default()
            },
        );
        let builder = OrderBuilder::new(
            store.clone(),
            calculator,
            invoice.clone(),
            settings.clone(),
        );
        let verifier = Arc::new(Verifier::new(
            store.clone(),
            account.clone(),
            memo.clone(),
            settings.clone(),
        ));
        let credit = Arc::new(CreditEngine::new(store.clone()));

        Self {
            store,
            builder,
            verifier,
            credit,
            invoice,
            account,
            memo,
            settings,
        }
    }

    /// Spawn the background reconciliation loop
    pub fn spawn_poller(&self) -> JoinHandle<()> {
        ReconciliationPoller::new(
            self.store.clone(),
            self.verifier.clone(),
            self.credit.clone(),
            self.settings.poller_interval_secs,
        )
        .spawn()
    }

    /// Open a payment order for a token purchase
    pub async fn create_order(
        &self,
        payer_address: &str,
        tokens: u64,
        currency: PayCurrency,
    ) -> Result<(PaymentOrder, PayInstructions)> {
        self.builder
            .create_order(payer_address, tokens, currency, unix_now())
            .await
    }

    /// Submit a transaction signature as proof of payment.
    ///
    /// Verifies immediately and, on success, credits the payer. The
    /// returned outcome is `None` unless the order verified on this call.
    pub async fn submit_proof(
        &self,
        order_id: &OrderId,
        signature: &str,
    ) -> Result<(VerificationResult, Option<CreditOutcome>)> {
        let now = unix_now();
        let result = self
            .verifier
            .submit_proof(order_id, Proof::Signature(signature.to_string()), now)
            .await?;
        self.credit_if_verified(order_id, &result, now)
    }

    /// Run one on-demand verification attempt, crediting on success
    pub async fn verify_now(
        &self,
        order_id: &OrderId,
    ) -> Result<(VerificationResult, Option<CreditOutcome>)> {
        let now = unix_now();
        let result = self.verifier.verify_order(order_id, now).await?;
        self.credit_if_verified(order_id, &result, now)
    }

    /// Handle an invoice payment callback from the platform.
    ///
    /// The payload must carry `order_id`, `charge_id` and `amount`; the
    /// auth token must match the configured webhook secret or the callback
    /// is rejected before anything is parsed.
    pub async fn invoice_callback(
        &self,
        auth_token: &str,
        payload: &serde_json::Value,
    ) -> Result<(VerificationResult, Option<CreditOutcome>)> {
        if !self.invoice.authenticate_callback(auth_token) {
            return Err(PaygateError::CallbackAuthFailed);
        }

        let field = |name: &str| -> Result<&serde_json::Value> {
            payload
                .get(name)
                .ok_or_else(|| PaygateError::MalformedProof(format!("callback missing {}", name)))
        };
        let order_id = OrderId::from(
            field("order_id")?
                .as_str()
                .ok_or_else(|| PaygateError::MalformedProof("bad order_id".to_string()))?,
        );
        let charge_id = field("charge_id")?
            .as_str()
            .ok_or_else(|| PaygateError::MalformedProof("bad charge_id".to_string()))?;
        let amount = field("amount")?
            .as_u64()
            .ok_or_else(|| PaygateError::MalformedProof("bad amount".to_string()))?;

        let now = unix_now();
        let result = self
            .verifier
            .confirm_invoice_paid(&order_id, charge_id, amount, now)
            .await?;
        self.credit_if_verified(&order_id, &result, now)
    }

    fn credit_if_verified(
        &self,
        order_id: &OrderId,
        result: &VerificationResult,
        now: UnixTime,
    ) -> Result<(VerificationResult, Option<CreditOutcome>)> {
        if result.status != VerifyStatus::Verified {
            return Ok((result.clone(), None));
        }
        let outcome = self.credit.credit(order_id, now)?;
        Ok((result.clone(), Some(outcome)))
    }

    pub fn order_status(&self, order_id: &OrderId) -> Result<PaymentOrder> {
        self.store
            .get_order(order_id)?
            .ok_or_else(|| PaygateError::OrderNotFound(order_id.to_string()))
    }

    pub fn balance(&self, address: &str) -> Result<LedgerAccount> {
        Ok(self.store.account(address)?)
    }

    /// Move value between the two balances of one account
    pub fn swap(
        &self,
        address: &str,
        amount: u64,
        direction: SwapDirection,
    ) -> Result<LedgerAccount> {
        Ok(self.store.swap(address, amount, direction)?)
    }

    pub fn link_wallet(&self, platform_user_id: &str, address: &str) -> Result<()> {
        if !AccountChainClient::is_valid_address(address) {
            return Err(PaygateError::InvalidAddress(address.to_string()));
        }
        self.store
            .link_wallet(platform_user_id, address, unix_now())?;
        info!("Linked user {} to wallet {}", platform_user_id, address);
        Ok(())
    }

    pub fn wallet_for(&self, platform_user_id: &str) -> Result<Option<String>> {
        Ok(self.store.wallet_for(platform_user_id)?)
    }

    /// Credit records whose balance increment has not landed (operator
    /// reconciliation queue)
    pub fn unapplied_credits(&self) -> Result<Vec<CreditRecord>> {
        Ok(self.store.unapplied_credits()?)
    }

    // Backend handles, used by integration tests to inject mock activity

    pub fn account_chain(&self) -> &AccountChainClient {
        &self.account
    }

    pub fn memo_indexer(&self) -> &MemoIndexerClient {
        &self.memo
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn store(&self) -> &LedgerStore {
        &self.store
    }
}

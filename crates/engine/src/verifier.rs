//! Payment verification
//!
//! One verifier covers all three pay-in methods, each with its own way of
//! binding an external transfer to an order:
//!
//! - Account: the submitted transaction signature is looked up and the
//!   treasury's balance delta checked against the owed amount.
//! - Memo: the treasury's recent incoming transfers are scanned for one
//!   whose comment is the order id.
//! - Invoice: the platform's authenticated payment callback is the proof;
//!   there is nothing to poll.
//!
//! A `Mismatch` outcome is authoritative and marks the order failed. A
//! `NotFound` is not: chains and indexers lag, so the order goes back to
//! awaiting proof until it verifies or expires.

use std::sync::Arc;

use paygate_chain::{AccountChainClient, MemoIndexerClient};
use paygate_core::{
    OrderId, OrderStatus, PayMethod, PaygateError, PaymentOrder, Proof, Result, UnixTime,
    VerificationResult, VerifyStatus,
};
use paygate_ledger::{LedgerError, LedgerStore};
use paygate_settings::Settings;
use tracing::{debug, info, warn};

pub struct Verifier {
    store: Arc<LedgerStore>,
    account: Arc<AccountChainClient>,
    memo: Arc<MemoIndexerClient>,
    settings: Arc<Settings>,
}

impl Verifier {
    /// How many recent treasury transfers a memo scan inspects
    const MEMO_SCAN_LIMIT: u32 = 100;

    pub fn new(
        store: Arc<LedgerStore>,
        account: Arc<AccountChainClient>,
        memo: Arc<MemoIndexerClient>,
        settings: Arc<Settings>,
    ) -> Self {
        Self {
            store,
            account,
            memo,
            settings,
        }
    }

    /// Attach a payer-submitted proof to an order and verify immediately.
    ///
    /// Only account orders take submitted proofs; memo transfers are
    /// discovered by scanning and invoice payments arrive by callback.
    /// The proof is consumed on attachment, so a signature that verified
    /// one order can never be resubmitted against another.
    pub async fn submit_proof(
        &self,
        order_id: &OrderId,
        proof: Proof,
        now: UnixTime,
    ) -> Result<VerificationResult> {
        let order = self.fetch(order_id)?;
        if let Some(result) = self.short_circuit(&order, now)? {
            return Ok(result);
        }

        if order.currency.method() != PayMethod::Account {
            return Err(PaygateError::MalformedProof(format!(
                "{} orders do not take submitted proofs",
                order.currency.code()
            )));
        }
        match &proof {
            Proof::Signature(sig) if AccountChainClient::is_valid_signature(sig) => {}
            Proof::Signature(sig) => {
                return Err(PaygateError::MalformedProof(format!(
                    "not a transaction signature: {}",
                    sig
                )))
            }
            other => {
                return Err(PaygateError::MalformedProof(format!(
                    "account orders need a signature, got {}",
                    other.kind()
                )))
            }
        }

        match self.store.set_proof(order_id, &proof) {
            Ok(()) => {}
            Err(LedgerError::ProofAlreadyConsumed) => {
                // Authoritative negative: the signature settled another
                // order, so this one can never verify
                return self.fail(
                    &order,
                    "proof already consumed by another order".to_string(),
                    0,
                    now,
                );
            }
            Err(e) => return Err(e.into()),
        }
        self.store.transition(order_id, OrderStatus::Verifying)?;
        self.verify_order(order_id, now).await
    }

    /// Run one verification attempt for an order.
    ///
    /// Idempotent past the point of verification: already verified or
    /// credited orders report `Verified` without touching the chain.
    pub async fn verify_order(&self, order_id: &OrderId, now: UnixTime) -> Result<VerificationResult> {
        let order = self.fetch(order_id)?;
        if let Some(result) = self.short_circuit(&order, now)? {
            return Ok(result);
        }

        match order.currency.method() {
            PayMethod::Account => self.verify_account(&order, now).await,
            PayMethod::Memo => self.verify_memo(&order, now).await,
            // Nothing to poll; the callback drives these orders
            PayMethod::Invoice => Ok(VerificationResult::not_found(now)),
        }
    }

    /// Accept an authenticated invoice payment callback as proof.
    ///
    /// The caller has already authenticated the callback; this checks the
    /// paid amount and settles the order. Invoice amounts are platform
    /// controlled, so no tolerance applies.
    pub async fn confirm_invoice_paid(
        &self,
        order_id: &OrderId,
        charge_id: &str,
        paid_amount: u64,
        now: UnixTime,
    ) -> Result<VerificationResult> {
        let order = self.fetch(order_id)?;
        if let Some(result) = self.short_circuit(&order, now)? {
            return Ok(result);
        }

        if order.currency.method() != PayMethod::Invoice {
            return Err(PaygateError::MalformedProof(format!(
                "{} orders do not settle by callback",
                order.currency.code()
            )));
        }

        if paid_amount < order.pay_in_amount {
            return self.fail(
                &order,
                format!(
                    "short invoice payment: {} of {}",
                    paid_amount, order.pay_in_amount
                ),
                paid_amount,
                now,
            );
        }

        self.store
            .set_proof(order_id, &Proof::Invoice(charge_id.to_string()))?;
        self.advance_to_verified(&order)?;
        info!("Order {} verified by invoice callback", order_id);
        Ok(VerificationResult::verified(paid_amount, now))
    }

    async fn verify_account(
        &self,
        order: &PaymentOrder,
        now: UnixTime,
    ) -> Result<VerificationResult> {
        let signature = match &order.proof {
            Some(Proof::Signature(sig)) => sig,
            // No proof submitted yet; nothing to look up
            _ => return Ok(VerificationResult::not_found(now)),
        };

        let tx = match self.account.fetch_transaction(signature).await {
            Ok(Some(tx)) => tx,
            Ok(None) => {
                debug!("Order {}: signature not on chain yet", order.order_id);
                self.back_off(order)?;
                return Ok(VerificationResult::not_found(now));
            }
            Err(e) => {
                warn!("Order {}: chain lookup failed: {}", order.order_id, e);
                return Ok(VerificationResult::pending(now));
            }
        };

        if let Some(err) = &tx.err {
            return self.fail(
                order,
                format!("transaction failed on chain: {}", err),
                0,
                now,
            );
        }

        let treasury = self.treasury(order)?;
        let received = match tx.received_by(&treasury) {
            Some(delta) if delta > 0 => delta as u64,
            _ => {
                return self.fail(order, "transfer did not pay the treasury".to_string(), 0, now)
            }
        };

        if !self.within_tolerance(received, order.pay_in_amount) {
            return self.fail(
                order,
                format!("short payment: {} of {}", received, order.pay_in_amount),
                received,
                now,
            );
        }

        if received > order.pay_in_amount {
            // Over-payments verify but only the quoted amount is credited
            warn!(
                "Order {} over-paid: {} received, {} owed",
                order.order_id, received, order.pay_in_amount
            );
        }

        self.advance_to_verified(order)?;
        info!(
            "Order {} verified: {} units received",
            order.order_id, received
        );
        Ok(VerificationResult::verified(received, now))
    }

    async fn verify_memo(&self, order: &PaymentOrder, now: UnixTime) -> Result<VerificationResult> {
        let treasury = self.treasury(order)?;
        let transfers = match self
            .memo
            .incoming_transfers(&treasury, Self::MEMO_SCAN_LIMIT)
            .await
        {
            Ok(transfers) => transfers,
            Err(e) => {
                warn!("Order {}: indexer scan failed: {}", order.order_id, e);
                return Ok(VerificationResult::pending(now));
            }
        };

        let matched = transfers
            .iter()
            .find(|t| t.comment == order.order_id.as_str());
        let transfer = match matched {
            Some(t) => t,
            None => {
                debug!("Order {}: no transfer carries the memo yet", order.order_id);
                self.back_off(order)?;
                return Ok(VerificationResult::not_found(now));
            }
        };

        if !self.within_tolerance(transfer.value, order.pay_in_amount) {
            return self.fail(
                order,
                format!(
                    "short payment: {} of {}",
                    transfer.value, order.pay_in_amount
                ),
                transfer.value,
                now,
            );
        }

        match self
            .store
            .set_proof(&order.order_id, &Proof::Memo(transfer.tx_hash.clone()))
        {
            Ok(()) => {}
            Err(LedgerError::ProofAlreadyConsumed) => {
                // The same transfer already settled another order
                return self.fail(
                    order,
                    format!("transfer {} already consumed", transfer.tx_hash),
                    transfer.value,
                    now,
                );
            }
            Err(e) => return Err(e.into()),
        }

        self.advance_to_verified(order)?;
        info!(
            "Order {} verified by memo transfer {}",
            order.order_id, transfer.tx_hash
        );
        Ok(VerificationResult::verified(transfer.value, now))
    }

    fn fetch(&self, order_id: &OrderId) -> Result<PaymentOrder> {
        self.store
            .get_order(order_id)?
            .ok_or_else(|| PaygateError::OrderNotFound(order_id.to_string()))
    }

    /// Terminal and already-verified orders resolve without a chain lookup
    fn short_circuit(
        &self,
        order: &PaymentOrder,
        now: UnixTime,
    ) -> Result<Option<VerificationResult>> {
        match order.status {
            OrderStatus::Verified | OrderStatus::Credited => Ok(Some(
                VerificationResult::verified(order.pay_in_amount, now),
            )),
            OrderStatus::Expired => Err(PaygateError::OrderExpired(order.order_id.to_string())),
            OrderStatus::Failed => Ok(Some(VerificationResult {
                status: VerifyStatus::Mismatch("order already failed".to_string()),
                observed_amount: 0,
                observed_at: now,
            })),
            _ if order.is_expired(now) => {
                // Expiry wins over a late proof
                self.store.transition(&order.order_id, OrderStatus::Expired)?;
                Err(PaygateError::OrderExpired(order.order_id.to_string()))
            }
            _ => Ok(None),
        }
    }

    fn within_tolerance(&self, observed: u64, owed: u64) -> bool {
        observed as f64 >= owed as f64 * (1.0 - self.settings.amount_tolerance)
    }

    fn treasury(&self, order: &PaymentOrder) -> Result<String> {
        self.settings
            .treasury_for(order.currency)
            .map(str::to_string)
            .ok_or_else(|| PaygateError::UnsupportedCurrency(order.currency.code().to_string()))
    }

    fn advance_to_verified(&self, order: &PaymentOrder) -> Result<()> {
        if order.status == OrderStatus::AwaitingProof {
            self.store
                .transition(&order.order_id, OrderStatus::Verifying)?;
        }
        self.store
            .transition(&order.order_id, OrderStatus::Verified)?;
        Ok(())
    }

    /// Back-edge: a mid-verification order whose transfer is not visible
    /// yet returns to awaiting proof for the next poll
    fn back_off(&self, order: &PaymentOrder) -> Result<()> {
        if order.status == OrderStatus::Verifying {
            self.store
                .transition(&order.order_id, OrderStatus::AwaitingProof)?;
        }
        Ok(())
    }

    fn fail(
        &self,
        order: &PaymentOrder,
        reason: String,
        observed: u64,
        now: UnixTime,
    ) -> Result<VerificationResult> {
        warn!("Order {} failed verification: {}", order.order_id, reason);
        self.store.transition(&order.order_id, OrderStatus::Failed)?;
        Ok(VerificationResult::mismatch(reason, observed, now))
    }
}

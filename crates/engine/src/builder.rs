//! Order construction
//!
//! Builds a persisted payment order from a purchase request, together with
//! the instructions the client needs to actually pay: a transfer to sign,
//! a wallet deep link, or an invoice link.

use std::sync::Arc;

use paygate_chain::{AccountChainClient, InvoiceClient, MemoIndexerClient};
use paygate_core::{
    OrderId, OrderStatus, PayCurrency, PayInstructions, PayMethod, PaygateError, PaymentOrder,
    Result, UnixTime,
};
use paygate_ledger::LedgerStore;
use paygate_oracle::QuoteCalculator;
use paygate_settings::Settings;
use serde_json::json;
use tracing::info;

pub struct OrderBuilder {
    store: Arc<LedgerStore>,
    calculator: QuoteCalculator,
    invoice: Arc<InvoiceClient>,
    settings: Arc<Settings>,
}

impl OrderBuilder {
    pub fn new(
        store: Arc<LedgerStore>,
        calculator: QuoteCalculator,
        invoice: Arc<InvoiceClient>,
        settings: Arc<Settings>,
    ) -> Self {
        Self {
            store,
            calculator,
            invoice,
            settings,
        }
    }

    /// Quote, persist and open a payment order.
    ///
    /// The returned order is already in `AwaitingProof`; the instructions
    /// tell the payer how to settle it before `expires_at`.
    pub async fn create_order(
        &self,
        payer_address: &str,
        tokens: u64,
        currency: PayCurrency,
        now: UnixTime,
    ) -> Result<(PaymentOrder, PayInstructions)> {
        self.validate_payer(payer_address, currency)?;

        let quote = self.calculator.quote(tokens, currency, now).await?;
        let order_id = OrderId::generate();
        let method = currency.method();
        let expires_at = now + self.settings.expiry_for(method);

        let instructions = self
            .instructions_for(&order_id, currency, quote.pay_in_amount, tokens)
            .await?;

        let order = PaymentOrder {
            order_id: order_id.clone(),
            payer_address: payer_address.to_string(),
            currency,
            requested_tokens: tokens,
            pay_in_amount: quote.pay_in_amount,
            price: quote.price,
            status: OrderStatus::Created,
            proof: None,
            created_at: now,
            expires_at,
        };
        self.store.insert_order(&order)?;

        // Created is only ever transient; the order opens awaiting proof
        let order = self.store.transition(&order_id, OrderStatus::AwaitingProof)?;

        info!(
            "Opened order {} for {}: {} tokens, {} {} units, expires {}",
            order_id,
            payer_address,
            tokens,
            quote.pay_in_amount,
            currency.code(),
            expires_at,
        );
        Ok((order, instructions))
    }

    fn validate_payer(&self, payer_address: &str, currency: PayCurrency) -> Result<()> {
        if payer_address.is_empty() {
            return Err(PaygateError::InvalidAddress(String::new()));
        }
        // Account-chain payers get their funds attributed by address, so a
        // malformed one can never be credited back
        if currency.method() == PayMethod::Account
            && !AccountChainClient::is_valid_address(payer_address)
        {
            return Err(PaygateError::InvalidAddress(payer_address.to_string()));
        }
        Ok(())
    }

    async fn instructions_for(
        &self,
        order_id: &OrderId,
        currency: PayCurrency,
        pay_in_amount: u64,
        tokens: u64,
    ) -> Result<PayInstructions> {
        match currency.method() {
            PayMethod::Account => {
                let treasury = self.treasury(currency)?;
                Ok(PayInstructions::Transfer {
                    treasury,
                    amount: pay_in_amount,
                })
            }
            PayMethod::Memo => {
                let treasury = self.treasury(currency)?;
                let link =
                    MemoIndexerClient::deep_link(&treasury, pay_in_amount, order_id.as_str());
                Ok(PayInstructions::DeepLink {
                    address: treasury,
                    amount: pay_in_amount,
                    memo: order_id.to_string(),
                    link,
                })
            }
            PayMethod::Invoice => {
                let title = format!("{} tokens", tokens);
                let description = format!("Purchase of {} tokens", tokens);
                let payload = json!({ "order_id": order_id });
                let link = self
                    .invoice
                    .create_invoice_link(&title, &description, &payload, pay_in_amount)
                    .await?;
                Ok(PayInstructions::InvoiceLink { link })
            }
        }
    }

    fn treasury(&self, currency: PayCurrency) -> Result<String> {
        self.settings
            .treasury_for(currency)
            .map(str::to_string)
            .ok_or_else(|| PaygateError::UnsupportedCurrency(currency.code().to_string()))
    }
}

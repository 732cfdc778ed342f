//! Token-amount to pay-in-amount conversion

use paygate_core::{PayCurrency, PaygateError, PriceSnapshot, Quote, Result, UnixTime};
use tracing::debug;

use crate::PriceOracle;

/// Quote calculator configuration
#[derive(Debug, Clone)]
pub struct QuoteConfig {
    /// Fixed USD price per internal token
    pub token_price_usd: f64,
    /// Minimum purchase size in tokens
    pub min_purchase: u64,
    /// Fixed USD value of one platform star
    pub usd_per_star: f64,
    /// Refuse to quote from a stale oracle rate
    pub reject_stale_quotes: bool,
    /// How long a quote stays honored
    pub quote_validity_secs: u64,
}

impl Default for QuoteConfig {
    fn default() -> Self {
        Self {
            token_price_usd: 0.01,
            min_purchase: 100,
            usd_per_star: 0.02,
            reject_stale_quotes: false,
            quote_validity_secs: 10 * 60,
        }
    }
}

/// Converts a requested token amount into a smallest-unit pay-in amount.
///
/// Native-currency amounts round **up**: a payer can only ever overshoot
/// the USD value from rounding, never undershoot below the verifier's
/// tolerance band.
pub struct QuoteCalculator {
    oracle: PriceOracle,
    config: QuoteConfig,
}

impl QuoteCalculator {
    pub fn new(oracle: PriceOracle, config: QuoteConfig) -> Self {
        Self { oracle, config }
    }

    pub async fn quote(
        &self,
        tokens: u64,
        currency: PayCurrency,
        now: UnixTime,
    ) -> Result<Quote> {
        if tokens < self.config.min_purchase {
            return Err(PaygateError::AmountBelowMinimum {
                minimum: self.config.min_purchase,
                requested: tokens,
            });
        }

        let usd_amount = tokens as f64 * self.config.token_price_usd;

        let (pay_in_amount, price) = match currency {
            PayCurrency::Stars => {
                let stars = (usd_amount / self.config.usd_per_star).ceil() as u64;
                let price = PriceSnapshot {
                    rate_usd: self.config.usd_per_star,
                    fetched_at: now,
                    stale: false,
                };
                (stars, price)
            }
            PayCurrency::Usdc => {
                let units = (usd_amount * currency.smallest_unit_scale() as f64).ceil() as u64;
                let price = PriceSnapshot {
                    rate_usd: 1.0,
                    fetched_at: now,
                    stale: false,
                };
                (units, price)
            }
            PayCurrency::Sol | PayCurrency::Ton => {
                let sample = self.oracle.rate(currency).await;
                if sample.stale && self.config.reject_stale_quotes {
                    return Err(PaygateError::StaleRate);
                }
                let coins = usd_amount / sample.rate_usd;
                let units = (coins * currency.smallest_unit_scale() as f64).ceil() as u64;
                let price = PriceSnapshot {
                    rate_usd: sample.rate_usd,
                    fetched_at: now.saturating_sub(sample.age_secs),
                    stale: sample.stale,
                };
                (units, price)
            }
        };

        debug!(
            "Quoted {} tokens as {} {} units ({} USD)",
            tokens,
            pay_in_amount,
            currency.code(),
            usd_amount,
        );

        Ok(Quote {
            pay_in_amount,
            price,
            usd_amount,
            expires_at: now + self.config.quote_validity_secs,
        })
    }
}

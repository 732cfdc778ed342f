//! PayGate Price Oracle
//!
//! USD exchange rates for the pay-in currencies, plus the quote calculator
//! that turns a requested token amount into a smallest-unit pay-in amount.
//!
//! The oracle never fails toward its callers: a fetch error degrades to the
//! last cached rate, and with no cache to a hardcoded conservative fallback.
//! Staleness is reported, not raised, so the quote calculator can decide
//! whether a size-sensitive quote should go through.

mod price;
mod quote;

pub use price::{OracleConfig, OracleMode, PriceOracle, RateSample};
pub use quote::{QuoteCalculator, QuoteConfig};

//! Currency, proof and quote types for the pay-in pipeline

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unix timestamp in seconds
pub type UnixTime = u64;

/// Opaque order identifier.
///
/// Doubles as the idempotency key for crediting and as the on-chain
/// memo/comment for memo-based pay-in flows.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderId(String);

impl OrderId {
    /// Generate a fresh globally-unique order id
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for OrderId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for OrderId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// How a currency binds an external transfer to an order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayMethod {
    /// Transfers identified by a signature returned at submission time.
    /// The client signs an unsigned transfer we build and hands the
    /// signature back as proof.
    Account,
    /// The payer's wallet app builds the transfer, so the order id must
    /// travel inside the transfer as a memo/comment.
    Memo,
    /// Platform-native invoice; the authenticated payment callback is
    /// itself the proof.
    Invoice,
}

/// Accepted pay-in currencies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayCurrency {
    /// Account-chain native token (priced by the oracle, paid in lamports)
    Sol,
    /// Account-chain stablecoin (1 USD, 6 decimal smallest unit)
    Usdc,
    /// Memo-chain native token (priced by the oracle, paid in nanotons)
    Ton,
    /// Platform stars, settled through an invoice callback
    Stars,
}

impl PayCurrency {
    pub fn method(&self) -> PayMethod {
        match self {
            Self::Sol | Self::Usdc => PayMethod::Account,
            Self::Ton => PayMethod::Memo,
            Self::Stars => PayMethod::Invoice,
        }
    }

    /// Smallest units per whole coin (lamports, micro-units, nanotons)
    pub fn smallest_unit_scale(&self) -> u64 {
        match self {
            Self::Sol => 1_000_000_000,
            Self::Usdc => 1_000_000,
            Self::Ton => 1_000_000_000,
            Self::Stars => 1,
        }
    }

    /// Whether the USD rate comes from the external price feed
    pub fn is_oracle_priced(&self) -> bool {
        matches!(self, Self::Sol | Self::Ton)
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::Sol => "sol",
            Self::Usdc => "usdc",
            Self::Ton => "ton",
            Self::Stars => "stars",
        }
    }

    pub fn parse(code: &str) -> Option<Self> {
        match code.to_ascii_lowercase().as_str() {
            "sol" => Some(Self::Sol),
            "usdc" => Some(Self::Usdc),
            "ton" => Some(Self::Ton),
            "stars" | "xtr" => Some(Self::Stars),
            _ => None,
        }
    }
}

/// Externally-observable evidence binding a settled transfer to an order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum Proof {
    /// Account-chain transaction signature (base58)
    Signature(String),
    /// Memo-chain transaction hash whose comment matched the order id
    Memo(String),
    /// Platform invoice charge id from the payment-succeeded callback
    Invoice(String),
}

impl Proof {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Signature(_) => "signature",
            Self::Memo(_) => "memo",
            Self::Invoice(_) => "invoice",
        }
    }

    pub fn value(&self) -> &str {
        match self {
            Self::Signature(v) | Self::Memo(v) | Self::Invoice(v) => v,
        }
    }

    pub fn from_parts(kind: &str, value: String) -> Option<Self> {
        match kind {
            "signature" => Some(Self::Signature(value)),
            "memo" => Some(Self::Memo(value)),
            "invoice" => Some(Self::Invoice(value)),
            _ => None,
        }
    }
}

/// The exchange rate used for a quote, captured at quote time
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceSnapshot {
    /// USD per whole coin
    pub rate_usd: f64,
    /// When the rate was fetched from the feed
    pub fetched_at: UnixTime,
    /// True when the rate exceeded the configured max staleness
    pub stale: bool,
}

/// A computed pay-in quote for a requested token amount
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    /// Amount owed, in the currency's smallest unit (rounded up)
    pub pay_in_amount: u64,
    /// Rate snapshot the amount was derived from
    pub price: PriceSnapshot,
    /// USD value of the requested tokens
    pub usd_amount: f64,
    /// The quote is not honored past this time
    pub expires_at: UnixTime,
}

/// Outcome of a single verification attempt
#[derive(Debug, Clone, PartialEq)]
pub enum VerifyStatus {
    /// Transfer observed, destination and amount check out
    Verified,
    /// No matching transfer observed yet (not terminal before expiry)
    NotFound,
    /// Authoritative negative: wrong destination, short amount, or
    /// consumed proof. Terminal.
    Mismatch(String),
    /// Transient transport failure; retry later
    Pending,
}

/// Result of `Verifier::verify`
#[derive(Debug, Clone, PartialEq)]
pub struct VerificationResult {
    pub status: VerifyStatus,
    /// Smallest-unit amount actually observed on chain (0 when none)
    pub observed_amount: u64,
    pub observed_at: UnixTime,
}

impl VerificationResult {
    pub fn verified(observed_amount: u64, observed_at: UnixTime) -> Self {
        Self {
            status: VerifyStatus::Verified,
            observed_amount,
            observed_at,
        }
    }

    pub fn not_found(now: UnixTime) -> Self {
        Self {
            status: VerifyStatus::NotFound,
            observed_amount: 0,
            observed_at: now,
        }
    }

    pub fn mismatch(reason: impl Into<String>, observed_amount: u64, now: UnixTime) -> Self {
        Self {
            status: VerifyStatus::Mismatch(reason.into()),
            observed_amount,
            observed_at: now,
        }
    }

    pub fn pending(now: UnixTime) -> Self {
        Self {
            status: VerifyStatus::Pending,
            observed_amount: 0,
            observed_at: now,
        }
    }
}

/// Client-facing instructions for completing a payment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PayInstructions {
    /// Account chain: sign a transfer of `amount` smallest units to the
    /// treasury and submit it; the returned signature is the proof.
    Transfer { treasury: String, amount: u64 },
    /// Memo chain: wallet deep link carrying the order id as the transfer
    /// comment. The comment is the only binding back to the order.
    DeepLink {
        address: String,
        amount: u64,
        memo: String,
        link: String,
    },
    /// Platform invoice link; settlement arrives via callback
    InvoiceLink { link: String },
}

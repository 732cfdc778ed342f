//! PayGate Ledger Store
//!
//! SQLite-backed persistence for payment orders, credit records, ledger
//! accounts and wallet links.
//!
//! The store is where the system's exactly-once guarantees actually live:
//!
//! - `credit_records.order_id UNIQUE` - at most one credit per order, no
//!   matter how many concurrent `Credit` calls race. The losers observe the
//!   constraint violation and report `applied = false`.
//! - `orders(proof_kind, proof_value) UNIQUE` - a transaction signature (or
//!   invoice charge) consumed by one order can never verify a second one.
//!
//! Both are enforced by the database, not by application-level checks, so
//! they hold across process crashes and concurrent callers.

mod store;

pub use store::{LedgerStore, SwapDirection};

use paygate_core::{OrderStatus, PaygateError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Order not found: {0}")]
    OrderNotFound(String),

    #[error("Invalid status transition: {from:?} -> {to:?}")]
    InvalidTransition { from: OrderStatus, to: OrderStatus },

    #[error("Proof already consumed by another order")]
    ProofAlreadyConsumed,

    #[error("Order already carries a different proof")]
    ProofAlreadySet,

    #[error("Credit record not found: {0}")]
    CreditRecordNotFound(String),

    #[error("Credit record {0} already applied to balance")]
    CreditAlreadyApplied(String),

    #[error("Insufficient balance: have {available}, need {requested}")]
    InsufficientBalance { available: u64, requested: u64 },

    #[error("Corrupt row: {0}")]
    CorruptRow(String),

    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

impl From<LedgerError> for PaygateError {
    fn from(e: LedgerError) -> Self {
        match e {
            LedgerError::OrderNotFound(id) => PaygateError::OrderNotFound(id),
            LedgerError::InvalidTransition { from, to } => {
                PaygateError::InvalidTransition { from, to }
            }
            LedgerError::ProofAlreadyConsumed | LedgerError::ProofAlreadySet => {
                PaygateError::ProofAlreadyConsumed
            }
            LedgerError::CreditRecordNotFound(id) => PaygateError::CreditRecordNotFound(id),
            LedgerError::CreditAlreadyApplied(id) => PaygateError::CreditAlreadyApplied(id),
            LedgerError::InsufficientBalance {
                available,
                requested,
            } => PaygateError::InsufficientBalance {
                available,
                requested,
            },
            LedgerError::CorruptRow(msg) => PaygateError::Storage(msg),
            LedgerError::Sqlite(e) => PaygateError::Storage(e.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, LedgerError>;

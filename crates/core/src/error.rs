use thiserror::Error;

use crate::OrderStatus;

#[derive(Error, Debug)]
pub enum PaygateError {
    #[error("Minimum purchase is {minimum} tokens, requested {requested}")]
    AmountBelowMinimum { minimum: u64, requested: u64 },

    #[error("Invalid payer address: {0}")]
    InvalidAddress(String),

    #[error("Unsupported currency: {0}")]
    UnsupportedCurrency(String),

    #[error("Order not found: {0}")]
    OrderNotFound(String),

    #[error("Invalid status transition: {from:?} -> {to:?}")]
    InvalidTransition { from: OrderStatus, to: OrderStatus },

    #[error("Order expired: {0}")]
    OrderExpired(String),

    #[error("Proof already consumed by another order")]
    ProofAlreadyConsumed,

    #[error("Malformed proof: {0}")]
    MalformedProof(String),

    #[error("Order already credited")]
    AlreadyCredited,

    #[error("Order not verified (status: {0:?})")]
    NotVerified(OrderStatus),

    #[error("Price rate too stale for this quote")]
    StaleRate,

    #[error("Invoice callback authentication failed")]
    CallbackAuthFailed,

    #[error("Credit record not found: {0}")]
    CreditRecordNotFound(String),

    #[error("Credit record {0} already applied to balance")]
    CreditAlreadyApplied(String),

    #[error("Insufficient balance: have {available}, need {requested}")]
    InsufficientBalance { available: u64, requested: u64 },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Chain error: {0}")]
    Chain(String),
}

pub type Result<T> = std::result::Result<T, PaygateError>;

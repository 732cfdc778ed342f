//! PayGate Chain Access
//!
//! Clients for the three external settlement surfaces:
//!
//! - **AccountChainClient**: JSON-RPC transaction lookup on the account-based
//!   chain (signature-identified transfers, treasury balance deltas).
//! - **MemoIndexerClient**: HTTP indexer queries for memo-chain incoming
//!   transfers (order id carried as the transfer comment).
//! - **InvoiceClient**: platform bot API for star invoices plus callback
//!   authentication.
//!
//! Each client supports two modes:
//! - **Mock Mode**: for development/testing without external services. State
//!   is tracked in-memory and seeded through `inject_*` helpers.
//! - **Live Mode**: actual HTTP calls with bounded timeouts.

mod account;
mod invoice;
mod memo;

pub use account::{AccountChainClient, AccountChainConfig, AccountTransaction};
pub use invoice::{InvoiceClient, InvoiceConfig};
pub use memo::{MemoIndexerClient, MemoIndexerConfig, MemoTransfer};

use paygate_core::PaygateError;
use thiserror::Error;

/// Client mode shared by all chain-facing clients
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainMode {
    /// Mock mode for development - state is in-memory
    Mock,
    /// Live HTTP mode
    Live,
}

#[derive(Error, Debug)]
pub enum ChainError {
    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("Indexer error: {0}")]
    Indexer(String),

    #[error("Invoice platform error: {0}")]
    InvoicePlatform(String),

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("Mock-only operation attempted in live mode")]
    NotMock,
}

impl From<ChainError> for PaygateError {
    fn from(e: ChainError) -> Self {
        PaygateError::Chain(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ChainError>;

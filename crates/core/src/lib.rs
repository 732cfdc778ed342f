//! PayGate Core Types
//!
//! This crate defines the fundamental data structures shared by the payment
//! pipeline: orders, currencies, proofs, verification results, ledger rows,
//! and the common error type.

mod error;
mod order;
mod types;

pub use error::*;
pub use order::*;
pub use types::*;

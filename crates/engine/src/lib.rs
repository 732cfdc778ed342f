//! PayGate Payment Engine
//!
//! The pipeline that turns a token purchase request into a credited
//! balance:
//!
//! 1. [`OrderBuilder`] quotes the purchase and persists a payment order
//!    with method-specific pay instructions.
//! 2. [`Verifier`] checks the external chain (or callback) for a settled
//!    transfer that matches the order.
//! 3. [`CreditEngine`] converts a verified order into a balance increment,
//!    exactly once.
//! 4. [`ReconciliationPoller`] drives non-terminal orders forward in the
//!    background and replays any credit whose balance increment was lost
//!    to a crash.
//!
//! [`PaymentService`] wires the four together behind one facade.

mod builder;
mod credit;
mod poller;
mod service;
mod verifier;

pub use builder::OrderBuilder;
pub use credit::{CreditEngine, CreditOutcome};
pub use poller::{ReconciliationPoller, TickSummary};
pub use service::{unix_now, PaymentService};
pub use verifier::Verifier;

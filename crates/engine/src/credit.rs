//! Exactly-once crediting
//!
//! Crediting is split into two storage steps on purpose:
//!
//! 1. Insert the credit record. The UNIQUE order id makes this the
//!    idempotency barrier: of any number of racing callers, exactly one
//!    insert succeeds.
//! 2. Apply the balance increment, stamp the record applied and close the
//!    order, in one transaction.
//!
//! A crash between the steps leaves an unapplied record. That record is
//! the recovery state: [`CreditEngine::replay_unapplied`] finishes the
//! job, and the applied-at guard in storage makes the replay itself safe
//! to repeat.

use std::sync::Arc;

use paygate_core::{CreditRecord, OrderId, OrderStatus, PaygateError, Result, UnixTime};
use paygate_ledger::{LedgerError, LedgerStore};
use tracing::{info, warn};
use uuid::Uuid;

/// What a credit call did
#[derive(Debug, Clone, PartialEq)]
pub struct CreditOutcome {
    /// True when this call applied the balance increment. False means the
    /// order was already credited (by a racing caller or an earlier run).
    pub applied: bool,
    pub record_id: String,
    /// Payer's token balance after the call
    pub new_balance: u64,
}

pub struct CreditEngine {
    store: Arc<LedgerStore>,
}

impl CreditEngine {
    pub fn new(store: Arc<LedgerStore>) -> Self {
        Self { store }
    }

    /// Credit a verified order. Safe to call any number of times, from any
    /// number of tasks: the balance moves exactly once.
    pub fn credit(&self, order_id: &OrderId, now: UnixTime) -> Result<CreditOutcome> {
        let order = self
            .store
            .get_order(order_id)?
            .ok_or_else(|| PaygateError::OrderNotFound(order_id.to_string()))?;

        match order.status {
            OrderStatus::Verified => {}
            OrderStatus::Credited => {
                // Settled earlier; report without touching balances
                let record = self
                    .store
                    .credit_for_order(order_id)?
                    .ok_or_else(|| PaygateError::CreditRecordNotFound(order_id.to_string()))?;
                let balance = self.store.account(&order.payer_address)?.token_balance;
                return Ok(CreditOutcome {
                    applied: false,
                    record_id: record.record_id,
                    new_balance: balance,
                });
            }
            other => return Err(PaygateError::NotVerified(other)),
        }

        let record = CreditRecord {
            record_id: Uuid::new_v4().to_string(),
            order_id: order_id.clone(),
            user_address: order.payer_address.clone(),
            // The requested amount, regardless of any over-payment observed
            amount_credited: order.requested_tokens,
            created_at: now,
            applied_at: None,
        };

        if self.store.insert_credit_record(&record)? {
            return match self.store.apply_credit_balance(&record.record_id, now) {
                Ok(new_balance) => {
                    info!(
                        "Credited order {}: +{} tokens to {}",
                        order_id, record.amount_credited, record.user_address
                    );
                    Ok(CreditOutcome {
                        applied: true,
                        record_id: record.record_id,
                        new_balance,
                    })
                }
                // A racing caller saw our record unapplied and finished the
                // second step for us
                Err(LedgerError::CreditAlreadyApplied(_)) => {
                    let balance = self.store.account(&order.payer_address)?.token_balance;
                    Ok(CreditOutcome {
                        applied: false,
                        record_id: record.record_id,
                        new_balance: balance,
                    })
                }
                Err(e) => Err(e.into()),
            };
        }

        // Lost the insert race. The winner owns the increment, unless it
        // crashed between steps, in which case we finish its job here.
        let existing = self
            .store
            .credit_for_order(order_id)?
            .ok_or_else(|| PaygateError::CreditRecordNotFound(order_id.to_string()))?;

        if existing.is_applied() {
            let balance = self.store.account(&order.payer_address)?.token_balance;
            return Ok(CreditOutcome {
                applied: false,
                record_id: existing.record_id,
                new_balance: balance,
            });
        }

        match self.store.apply_credit_balance(&existing.record_id, now) {
            Ok(new_balance) => Ok(CreditOutcome {
                applied: true,
                record_id: existing.record_id,
                new_balance,
            }),
            // The winner got there first after all
            Err(LedgerError::CreditAlreadyApplied(_)) => {
                let balance = self.store.account(&order.payer_address)?.token_balance;
                Ok(CreditOutcome {
                    applied: false,
                    record_id: existing.record_id,
                    new_balance: balance,
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Finish any credit whose balance increment was lost between the two
    /// storage steps. Returns the records applied this pass.
    pub fn replay_unapplied(&self, now: UnixTime) -> Result<Vec<String>> {
        let mut applied = Vec::new();
        for record in self.store.unapplied_credits()? {
            match self.store.apply_credit_balance(&record.record_id, now) {
                Ok(balance) => {
                    info!(
                        "Replayed orphaned credit {} for order {}: balance now {}",
                        record.record_id, record.order_id, balance
                    );
                    applied.push(record.record_id);
                }
                Err(LedgerError::CreditAlreadyApplied(_)) => {}
                Err(e) => {
                    warn!("Replay of credit {} failed: {}", record.record_id, e);
                }
            }
        }
        Ok(applied)
    }
}

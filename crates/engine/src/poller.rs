//! Reconciliation poller
//!
//! Background task that drives open orders to a terminal state: expires
//! the overdue, re-verifies the rest, credits whatever verified, and
//! replays any credit whose balance increment was lost to a crash. Every
//! step is idempotent, so overlapping ticks and restarts are harmless.

use std::sync::Arc;
use std::time::Duration;

use paygate_core::{Result, UnixTime, VerifyStatus};
use paygate_ledger::LedgerStore;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::{unix_now, CreditEngine, Verifier};

/// What a single tick accomplished
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickSummary {
    pub expired: usize,
    pub verified: usize,
    pub credited: usize,
    pub replayed: usize,
}

pub struct ReconciliationPoller {
    store: Arc<LedgerStore>,
    verifier: Arc<Verifier>,
    credit: Arc<CreditEngine>,
    interval_secs: u64,
}

impl ReconciliationPoller {
    /// Orders processed per tick
    const BATCH: usize = 100;

    pub fn new(
        store: Arc<LedgerStore>,
        verifier: Arc<Verifier>,
        credit: Arc<CreditEngine>,
        interval_secs: u64,
    ) -> Self {
        Self {
            store,
            verifier,
            credit,
            interval_secs,
        }
    }

    /// Spawn the background polling loop
    pub fn spawn(self) -> JoinHandle<()> {
        info!(
            "Reconciliation poller running every {}s",
            self.interval_secs
        );
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(self.interval_secs));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if let Err(e) = self.tick(unix_now()).await {
                    warn!("Reconciliation tick failed: {}", e);
                }
            }
        })
    }

    /// Run one reconciliation pass.
    ///
    /// Failures on individual orders are logged and skipped; one bad order
    /// never starves the rest of the batch.
    pub async fn tick(&self, now: UnixTime) -> Result<TickSummary> {
        let mut summary = TickSummary {
            expired: self.store.expire_overdue(now)?,
            ..Default::default()
        };

        for order in self.store.due_orders(now, Self::BATCH)? {
            let result = match self.verifier.verify_order(&order.order_id, now).await {
                Ok(result) => result,
                Err(e) => {
                    debug!("Order {}: verification skipped: {}", order.order_id, e);
                    continue;
                }
            };
            if result.status != VerifyStatus::Verified {
                continue;
            }
            summary.verified += 1;

            match self.credit.credit(&order.order_id, now) {
                Ok(outcome) if outcome.applied => summary.credited += 1,
                Ok(_) => {}
                Err(e) => warn!("Order {}: crediting failed: {}", order.order_id, e),
            }
        }

        summary.replayed = self.credit.replay_unapplied(now)?.len();

        if summary != TickSummary::default() {
            info!(
                "Reconciliation tick: {} expired, {} verified, {} credited, {} replayed",
                summary.expired, summary.verified, summary.credited, summary.replayed
            );
        }
        Ok(summary)
    }
}

//! SQLite store for orders, credits, accounts and wallet links

use std::path::Path;
use std::sync::Mutex;

use paygate_core::{
    CreditRecord, LedgerAccount, OrderId, OrderStatus, PayCurrency, PaymentOrder, PriceSnapshot,
    Proof, UnixTime,
};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info, warn};

use crate::{LedgerError, Result};

/// Direction of an internal balance swap
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapDirection {
    /// Token balance into the secondary balance (counts as spend)
    TokenToSecondary,
    /// Secondary balance back into tokens
    SecondaryToToken,
}

/// Persistent ledger store.
///
/// All multi-step mutations run inside a SQLite transaction; the connection
/// sits behind a mutex so callers can share the store across tasks.
pub struct LedgerStore {
    db: Mutex<Connection>,
}

impl LedgerStore {
    const SCHEMA: &'static str = r"
        CREATE TABLE IF NOT EXISTS orders (
            order_id        TEXT PRIMARY KEY,
            payer_address   TEXT NOT NULL,
            currency        TEXT NOT NULL,
            requested_tokens INTEGER NOT NULL,
            pay_in_amount   INTEGER NOT NULL,
            rate_used       REAL NOT NULL,
            rate_fetched_at INTEGER NOT NULL,
            rate_stale      INTEGER NOT NULL DEFAULT 0,
            status          TEXT NOT NULL,
            proof_kind      TEXT,
            proof_value     TEXT,
            created_at      INTEGER NOT NULL,
            expires_at      INTEGER NOT NULL,
            UNIQUE (proof_kind, proof_value)
        );

        CREATE INDEX IF NOT EXISTS idx_orders_status
        ON orders(status);

        CREATE INDEX IF NOT EXISTS idx_orders_expires
        ON orders(expires_at);

        -- The UNIQUE order_id here is the exactly-once crediting guard
        CREATE TABLE IF NOT EXISTS credit_records (
            record_id       TEXT PRIMARY KEY,
            order_id        TEXT NOT NULL UNIQUE,
            user_address    TEXT NOT NULL,
            amount_credited INTEGER NOT NULL,
            created_at      INTEGER NOT NULL,
            applied_at      INTEGER
        );

        CREATE TABLE IF NOT EXISTS accounts (
            address           TEXT PRIMARY KEY,
            token_balance     INTEGER NOT NULL DEFAULT 0 CHECK (token_balance >= 0),
            secondary_balance INTEGER NOT NULL DEFAULT 0 CHECK (secondary_balance >= 0),
            total_earned      INTEGER NOT NULL DEFAULT 0,
            total_spent       INTEGER NOT NULL DEFAULT 0
        );

        -- Persisted messaging-user to wallet linkage; survives restarts
        CREATE TABLE IF NOT EXISTS wallet_links (
            platform_user_id TEXT PRIMARY KEY,
            address          TEXT NOT NULL,
            linked_at        INTEGER NOT NULL
        );
    ";

    /// Open or create the ledger database at the given path
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    LedgerError::CorruptRow(format!("create dir {}: {}", parent.display(), e))
                })?;
            }
        }
        let db = Connection::open(path)?;
        info!("Opened ledger store at {:?}", path);
        Self::initialize(db)
    }

    /// Open an in-memory ledger store (for testing)
    pub fn open_in_memory() -> Result<Self> {
        Self::initialize(Connection::open_in_memory()?)
    }

    fn initialize(db: Connection) -> Result<Self> {
        db.execute_batch(Self::SCHEMA)?;
        Ok(Self { db: Mutex::new(db) })
    }

    fn is_constraint_violation(e: &rusqlite::Error) -> bool {
        matches!(
            e,
            rusqlite::Error::SqliteFailure(err, _)
                if err.code == rusqlite::ErrorCode::ConstraintViolation
        )
    }

    // ==================== Orders ====================

    /// Persist a freshly built order
    pub fn insert_order(&self, order: &PaymentOrder) -> Result<()> {
        let db = self.db.lock().expect("ledger lock poisoned");
        db.execute(
            "INSERT INTO orders (
                order_id, payer_address, currency, requested_tokens, pay_in_amount,
                rate_used, rate_fetched_at, rate_stale, status, proof_kind, proof_value,
                created_at, expires_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                order.order_id.as_str(),
                order.payer_address,
                order.currency.code(),
                order.requested_tokens as i64,
                order.pay_in_amount as i64,
                order.price.rate_usd,
                order.price.fetched_at as i64,
                order.price.stale as i64,
                order.status.as_str(),
                order.proof.as_ref().map(Proof::kind),
                order.proof.as_ref().map(Proof::value),
                order.created_at as i64,
                order.expires_at as i64,
            ],
        )?;
        debug!("Inserted order {}", order.order_id);
        Ok(())
    }

    pub fn get_order(&self, order_id: &OrderId) -> Result<Option<PaymentOrder>> {
        let db = self.db.lock().expect("ledger lock poisoned");
        Self::fetch_order(&db, order_id)
    }

    fn fetch_order(db: &Connection, order_id: &OrderId) -> Result<Option<PaymentOrder>> {
        db.query_row(
            "SELECT order_id, payer_address, currency, requested_tokens, pay_in_amount,
                    rate_used, rate_fetched_at, rate_stale, status, proof_kind, proof_value,
                    created_at, expires_at
             FROM orders WHERE order_id = ?1",
            params![order_id.as_str()],
            Self::row_to_order,
        )
        .optional()
        .map_err(LedgerError::from)?
        .transpose()
    }

    #[allow(clippy::type_complexity)]
    fn row_to_order(row: &rusqlite::Row<'_>) -> rusqlite::Result<Result<PaymentOrder>> {
        let currency_code: String = row.get(2)?;
        let status_code: String = row.get(8)?;
        let proof_kind: Option<String> = row.get(9)?;
        let proof_value: Option<String> = row.get(10)?;

        let currency = match PayCurrency::parse(&currency_code) {
            Some(c) => c,
            None => {
                return Ok(Err(LedgerError::CorruptRow(format!(
                    "unknown currency {}",
                    currency_code
                ))))
            }
        };
        let status = match OrderStatus::parse(&status_code) {
            Some(s) => s,
            None => {
                return Ok(Err(LedgerError::CorruptRow(format!(
                    "unknown status {}",
                    status_code
                ))))
            }
        };
        let proof = match (proof_kind, proof_value) {
            (Some(kind), Some(value)) => match Proof::from_parts(&kind, value) {
                Some(p) => Some(p),
                None => {
                    return Ok(Err(LedgerError::CorruptRow(format!(
                        "unknown proof kind {}",
                        kind
                    ))))
                }
            },
            _ => None,
        };

        Ok(Ok(PaymentOrder {
            order_id: OrderId::from(row.get::<_, String>(0)?),
            payer_address: row.get(1)?,
            currency,
            requested_tokens: row.get::<_, i64>(3)? as u64,
            pay_in_amount: row.get::<_, i64>(4)? as u64,
            price: PriceSnapshot {
                rate_usd: row.get(5)?,
                fetched_at: row.get::<_, i64>(6)? as UnixTime,
                stale: row.get::<_, i64>(7)? != 0,
            },
            status,
            proof,
            created_at: row.get::<_, i64>(11)? as UnixTime,
            expires_at: row.get::<_, i64>(12)? as UnixTime,
        }))
    }

    /// Move an order to `next`, enforcing the status state machine
    pub fn transition(&self, order_id: &OrderId, next: OrderStatus) -> Result<PaymentOrder> {
        let db = self.db.lock().expect("ledger lock poisoned");
        let order = Self::fetch_order(&db, order_id)?
            .ok_or_else(|| LedgerError::OrderNotFound(order_id.to_string()))?;

        if order.status == next {
            return Ok(order); // idempotent re-entry
        }
        if !order.status.can_transition_to(next) {
            return Err(LedgerError::InvalidTransition {
                from: order.status,
                to: next,
            });
        }

        db.execute(
            "UPDATE orders SET status = ?1 WHERE order_id = ?2",
            params![next.as_str(), order_id.as_str()],
        )?;
        debug!("Order {} {:?} -> {:?}", order_id, order.status, next);

        Ok(PaymentOrder {
            status: next,
            ..order
        })
    }

    /// Record the proof that verified an order. Set-once: re-setting the
    /// same proof is a no-op; a different proof is rejected; a proof held
    /// by another order trips the UNIQUE constraint and is reported as
    /// consumed.
    pub fn set_proof(&self, order_id: &OrderId, proof: &Proof) -> Result<()> {
        let db = self.db.lock().expect("ledger lock poisoned");
        let order = Self::fetch_order(&db, order_id)?
            .ok_or_else(|| LedgerError::OrderNotFound(order_id.to_string()))?;

        if let Some(existing) = &order.proof {
            if existing == proof {
                return Ok(());
            }
            return Err(LedgerError::ProofAlreadySet);
        }

        let updated = db
            .execute(
                "UPDATE orders SET proof_kind = ?1, proof_value = ?2 WHERE order_id = ?3",
                params![proof.kind(), proof.value(), order_id.as_str()],
            )
            .map_err(|e| {
                if Self::is_constraint_violation(&e) {
                    let prefix: String = proof.value().chars().take(8).collect();
                    warn!(
                        "Proof {}:{}.. already consumed, rejecting for order {}",
                        proof.kind(),
                        prefix,
                        order_id
                    );
                    LedgerError::ProofAlreadyConsumed
                } else {
                    LedgerError::from(e)
                }
            })?;

        debug_assert_eq!(updated, 1);
        Ok(())
    }

    /// Whether any order already holds this proof
    pub fn proof_consumed(&self, proof: &Proof) -> Result<Option<OrderId>> {
        let db = self.db.lock().expect("ledger lock poisoned");
        let holder: Option<String> = db
            .query_row(
                "SELECT order_id FROM orders WHERE proof_kind = ?1 AND proof_value = ?2",
                params![proof.kind(), proof.value()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(holder.map(OrderId::from))
    }

    /// Orders the poller should drive: awaiting proof or mid-verification,
    /// and not yet expired
    pub fn due_orders(&self, now: UnixTime, limit: usize) -> Result<Vec<PaymentOrder>> {
        let db = self.db.lock().expect("ledger lock poisoned");
        let mut stmt = db.prepare(
            "SELECT order_id, payer_address, currency, requested_tokens, pay_in_amount,
                    rate_used, rate_fetched_at, rate_stale, status, proof_kind, proof_value,
                    created_at, expires_at
             FROM orders
             WHERE status IN ('awaiting_proof', 'verifying') AND expires_at > ?1
             ORDER BY created_at ASC
             LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![now as i64, limit as i64], Self::row_to_order)?;
        let mut orders = Vec::new();
        for row in rows {
            orders.push(row??);
        }
        Ok(orders)
    }

    /// Expire all non-terminal orders whose deadline passed. Returns the
    /// number of orders expired.
    pub fn expire_overdue(&self, now: UnixTime) -> Result<usize> {
        let db = self.db.lock().expect("ledger lock poisoned");
        let expired = db.execute(
            "UPDATE orders SET status = 'expired'
             WHERE status IN ('awaiting_proof', 'verifying') AND expires_at <= ?1",
            params![now as i64],
        )?;
        if expired > 0 {
            info!("Expired {} overdue orders", expired);
        }
        Ok(expired)
    }

    // ==================== Credit records ====================

    /// Insert the append-only credit record for an order.
    ///
    /// Returns `true` if this call created the record, `false` if another
    /// call already had - the caller must treat `false` as already-credited
    /// and leave balances alone. This is the idempotency barrier.
    pub fn insert_credit_record(&self, record: &CreditRecord) -> Result<bool> {
        let db = self.db.lock().expect("ledger lock poisoned");
        let result = db.execute(
            "INSERT INTO credit_records (
                record_id, order_id, user_address, amount_credited, created_at, applied_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                record.record_id,
                record.order_id.as_str(),
                record.user_address,
                record.amount_credited as i64,
                record.created_at as i64,
                record.applied_at.map(|t| t as i64),
            ],
        );

        match result {
            Ok(_) => Ok(true),
            Err(e) if Self::is_constraint_violation(&e) => {
                debug!("Credit record for order {} already exists", record.order_id);
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn credit_for_order(&self, order_id: &OrderId) -> Result<Option<CreditRecord>> {
        let db = self.db.lock().expect("ledger lock poisoned");
        db.query_row(
            "SELECT record_id, order_id, user_address, amount_credited, created_at, applied_at
             FROM credit_records WHERE order_id = ?1",
            params![order_id.as_str()],
            Self::row_to_credit,
        )
        .optional()
        .map_err(LedgerError::from)
    }

    fn row_to_credit(row: &rusqlite::Row<'_>) -> rusqlite::Result<CreditRecord> {
        Ok(CreditRecord {
            record_id: row.get(0)?,
            order_id: OrderId::from(row.get::<_, String>(1)?),
            user_address: row.get(2)?,
            amount_credited: row.get::<_, i64>(3)? as u64,
            created_at: row.get::<_, i64>(4)? as UnixTime,
            applied_at: row.get::<_, Option<i64>>(5)?.map(|t| t as UnixTime),
        })
    }

    /// Apply the balance increment for a credit record, stamping it applied
    /// and closing the order, all in one transaction. Returns the new token
    /// balance.
    ///
    /// Guarded for replay: the record must exist and must not already be
    /// applied, so re-running this for an orphaned record credits exactly
    /// once.
    pub fn apply_credit_balance(&self, record_id: &str, now: UnixTime) -> Result<u64> {
        let mut db = self.db.lock().expect("ledger lock poisoned");
        let tx = db.transaction()?;

        let record = tx
            .query_row(
                "SELECT record_id, order_id, user_address, amount_credited, created_at, applied_at
                 FROM credit_records WHERE record_id = ?1",
                params![record_id],
                Self::row_to_credit,
            )
            .optional()?
            .ok_or_else(|| LedgerError::CreditRecordNotFound(record_id.to_string()))?;

        if record.applied_at.is_some() {
            return Err(LedgerError::CreditAlreadyApplied(record_id.to_string()));
        }

        tx.execute(
            "INSERT INTO accounts (address, token_balance, total_earned)
             VALUES (?1, ?2, ?2)
             ON CONFLICT(address) DO UPDATE SET
                 token_balance = token_balance + excluded.token_balance,
                 total_earned = total_earned + excluded.total_earned",
            params![record.user_address, record.amount_credited as i64],
        )?;

        tx.execute(
            "UPDATE credit_records SET applied_at = ?1 WHERE record_id = ?2",
            params![now as i64, record_id],
        )?;

        tx.execute(
            "UPDATE orders SET status = 'credited' WHERE order_id = ?1 AND status = 'verified'",
            params![record.order_id.as_str()],
        )?;

        let new_balance: i64 = tx.query_row(
            "SELECT token_balance FROM accounts WHERE address = ?1",
            params![record.user_address],
            |row| row.get(0),
        )?;

        tx.commit()?;
        info!(
            "Applied credit {} to {}: +{} tokens",
            record_id, record.user_address, record.amount_credited
        );
        Ok(new_balance as u64)
    }

    /// The operator reconciliation queue: credit records whose balance
    /// increment has not landed. Each row is a payment the user is entitled
    /// to but the ledger does not yet reflect.
    pub fn unapplied_credits(&self) -> Result<Vec<CreditRecord>> {
        let db = self.db.lock().expect("ledger lock poisoned");
        let mut stmt = db.prepare(
            "SELECT record_id, order_id, user_address, amount_credited, created_at, applied_at
             FROM credit_records WHERE applied_at IS NULL
             ORDER BY created_at ASC",
        )?;
        let rows = stmt.query_map([], Self::row_to_credit)?;
        let mut records = Vec::new();
        for row in rows {
            records.push(row?);
        }
        Ok(records)
    }

    // ==================== Accounts ====================

    pub fn account(&self, address: &str) -> Result<LedgerAccount> {
        let db = self.db.lock().expect("ledger lock poisoned");
        Ok(db
            .query_row(
                "SELECT address, token_balance, secondary_balance, total_earned, total_spent
                 FROM accounts WHERE address = ?1",
                params![address],
                |row| {
                    Ok(LedgerAccount {
                        address: row.get(0)?,
                        token_balance: row.get::<_, i64>(1)? as u64,
                        secondary_balance: row.get::<_, i64>(2)? as u64,
                        total_earned: row.get::<_, i64>(3)? as u64,
                        total_spent: row.get::<_, i64>(4)? as u64,
                    })
                },
            )
            .optional()?
            .unwrap_or_else(|| LedgerAccount::empty(address)))
    }

    /// Internal transfer between the two balances of one account. The only
    /// balance mutation besides crediting.
    pub fn swap(
        &self,
        address: &str,
        amount: u64,
        direction: SwapDirection,
    ) -> Result<LedgerAccount> {
        let mut db = self.db.lock().expect("ledger lock poisoned");
        let tx = db.transaction()?;

        let account = tx
            .query_row(
                "SELECT token_balance, secondary_balance FROM accounts WHERE address = ?1",
                params![address],
                |row| Ok((row.get::<_, i64>(0)? as u64, row.get::<_, i64>(1)? as u64)),
            )
            .optional()?
            .unwrap_or((0, 0));

        let available = match direction {
            SwapDirection::TokenToSecondary => account.0,
            SwapDirection::SecondaryToToken => account.1,
        };
        if available < amount {
            return Err(LedgerError::InsufficientBalance {
                available,
                requested: amount,
            });
        }

        match direction {
            SwapDirection::TokenToSecondary => {
                tx.execute(
                    "UPDATE accounts SET
                         token_balance = token_balance - ?1,
                         secondary_balance = secondary_balance + ?1,
                         total_spent = total_spent + ?1
                     WHERE address = ?2",
                    params![amount as i64, address],
                )?;
            }
            SwapDirection::SecondaryToToken => {
                tx.execute(
                    "UPDATE accounts SET
                         secondary_balance = secondary_balance - ?1,
                         token_balance = token_balance + ?1
                     WHERE address = ?2",
                    params![amount as i64, address],
                )?;
            }
        }

        let updated = tx.query_row(
            "SELECT address, token_balance, secondary_balance, total_earned, total_spent
             FROM accounts WHERE address = ?1",
            params![address],
            |row| {
                Ok(LedgerAccount {
                    address: row.get(0)?,
                    token_balance: row.get::<_, i64>(1)? as u64,
                    secondary_balance: row.get::<_, i64>(2)? as u64,
                    total_earned: row.get::<_, i64>(3)? as u64,
                    total_spent: row.get::<_, i64>(4)? as u64,
                })
            },
        )?;

        tx.commit()?;
        Ok(updated)
    }

    // ==================== Wallet links ====================

    /// Link a messaging-platform user to a wallet address (upsert)
    pub fn link_wallet(&self, platform_user_id: &str, address: &str, now: UnixTime) -> Result<()> {
        let db = self.db.lock().expect("ledger lock poisoned");
        db.execute(
            "INSERT INTO wallet_links (platform_user_id, address, linked_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(platform_user_id) DO UPDATE SET
                 address = excluded.address,
                 linked_at = excluded.linked_at",
            params![platform_user_id, address, now as i64],
        )?;
        Ok(())
    }

    pub fn wallet_for(&self, platform_user_id: &str) -> Result<Option<String>> {
        let db = self.db.lock().expect("ledger lock poisoned");
        db.query_row(
            "SELECT address FROM wallet_links WHERE platform_user_id = ?1",
            params![platform_user_id],
            |row| row.get(0),
        )
        .optional()
        .map_err(LedgerError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn order(id: &str, status: OrderStatus) -> PaymentOrder {
        PaymentOrder {
            order_id: OrderId::from(id),
            payer_address: "payer".to_string(),
            currency: PayCurrency::Sol,
            requested_tokens: 1000,
            pay_in_amount: 66_666_667,
            price: PriceSnapshot {
                rate_usd: 150.0,
                fetched_at: 100,
                stale: false,
            },
            status,
            proof: None,
            created_at: 100,
            expires_at: 700,
        }
    }

    fn credit(record_id: &str, order_id: &str, amount: u64) -> CreditRecord {
        CreditRecord {
            record_id: record_id.to_string(),
            order_id: OrderId::from(order_id),
            user_address: "payer".to_string(),
            amount_credited: amount,
            created_at: 200,
            applied_at: None,
        }
    }

    #[test]
    fn test_order_roundtrip() {
        let store = LedgerStore::open_in_memory().unwrap();
        let o = order("o1", OrderStatus::Created);
        store.insert_order(&o).unwrap();

        let fetched = store.get_order(&o.order_id).unwrap().unwrap();
        assert_eq!(fetched, o);
        assert!(store.get_order(&OrderId::from("o2")).unwrap().is_none());
    }

    #[test]
    fn test_transition_enforces_state_machine() {
        let store = LedgerStore::open_in_memory().unwrap();
        store.insert_order(&order("o1", OrderStatus::Created)).unwrap();

        let updated = store
            .transition(&OrderId::from("o1"), OrderStatus::AwaitingProof)
            .unwrap();
        assert_eq!(updated.status, OrderStatus::AwaitingProof);

        // Skipping verification is rejected
        let err = store
            .transition(&OrderId::from("o1"), OrderStatus::Credited)
            .unwrap_err();
        assert!(matches!(err, LedgerError::InvalidTransition { .. }));

        // Same-state transition is an idempotent no-op
        let same = store
            .transition(&OrderId::from("o1"), OrderStatus::AwaitingProof)
            .unwrap();
        assert_eq!(same.status, OrderStatus::AwaitingProof);
    }

    #[test]
    fn test_proof_consumed_by_second_order() {
        let store = LedgerStore::open_in_memory().unwrap();
        store.insert_order(&order("o1", OrderStatus::Verifying)).unwrap();
        store.insert_order(&order("o2", OrderStatus::Verifying)).unwrap();

        let proof = Proof::Signature("sig-abc".to_string());
        store.set_proof(&OrderId::from("o1"), &proof).unwrap();

        // Same proof again on the same order: no-op
        store.set_proof(&OrderId::from("o1"), &proof).unwrap();

        // Same proof on a different order: consumed
        let err = store.set_proof(&OrderId::from("o2"), &proof).unwrap_err();
        assert!(matches!(err, LedgerError::ProofAlreadyConsumed));

        assert_eq!(
            store.proof_consumed(&proof).unwrap(),
            Some(OrderId::from("o1"))
        );
    }

    #[test]
    fn test_proof_conflict_with_multibyte_value() {
        let store = LedgerStore::open_in_memory().unwrap();
        store.insert_order(&order("o1", OrderStatus::Verifying)).unwrap();
        store.insert_order(&order("o2", OrderStatus::Verifying)).unwrap();

        // Multibyte characters straddle any fixed byte offset; the conflict
        // log must not slice into one. A subscriber makes the log line
        // actually format.
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
        let proof = Proof::Memo("подпись-числа-1234".to_string());
        store.set_proof(&OrderId::from("o1"), &proof).unwrap();

        let err = store.set_proof(&OrderId::from("o2"), &proof).unwrap_err();
        assert!(matches!(err, LedgerError::ProofAlreadyConsumed));
    }

    #[test]
    fn test_different_proof_on_same_order_rejected() {
        let store = LedgerStore::open_in_memory().unwrap();
        store.insert_order(&order("o1", OrderStatus::Verifying)).unwrap();

        store
            .set_proof(&OrderId::from("o1"), &Proof::Signature("sig-a".to_string()))
            .unwrap();
        let err = store
            .set_proof(&OrderId::from("o1"), &Proof::Signature("sig-b".to_string()))
            .unwrap_err();
        assert!(matches!(err, LedgerError::ProofAlreadySet));
    }

    #[test]
    fn test_credit_record_unique_per_order() {
        let store = LedgerStore::open_in_memory().unwrap();
        assert!(store.insert_credit_record(&credit("r1", "o1", 1000)).unwrap());
        // Second insert for the same order loses the race
        assert!(!store.insert_credit_record(&credit("r2", "o1", 1000)).unwrap());

        let stored = store.credit_for_order(&OrderId::from("o1")).unwrap().unwrap();
        assert_eq!(stored.record_id, "r1");
    }

    #[test]
    fn test_apply_credit_balance_once() {
        let store = LedgerStore::open_in_memory().unwrap();
        store.insert_order(&order("o1", OrderStatus::Verified)).unwrap();
        store.insert_credit_record(&credit("r1", "o1", 1000)).unwrap();

        let balance = store.apply_credit_balance("r1", 300).unwrap();
        assert_eq!(balance, 1000);

        // Replay is rejected, not double-credited
        let err = store.apply_credit_balance("r1", 301).unwrap_err();
        assert!(matches!(err, LedgerError::CreditAlreadyApplied(_)));
        assert_eq!(store.account("payer").unwrap().token_balance, 1000);

        // Order closed alongside the increment
        let o = store.get_order(&OrderId::from("o1")).unwrap().unwrap();
        assert_eq!(o.status, OrderStatus::Credited);
    }

    #[test]
    fn test_unapplied_credits_is_orphan_queue() {
        let store = LedgerStore::open_in_memory().unwrap();
        store.insert_order(&order("o1", OrderStatus::Verified)).unwrap();
        store.insert_credit_record(&credit("r1", "o1", 500)).unwrap();

        // Record exists, balance not yet incremented: orphaned
        let orphans = store.unapplied_credits().unwrap();
        assert_eq!(orphans.len(), 1);
        assert_eq!(orphans[0].record_id, "r1");

        store.apply_credit_balance("r1", 400).unwrap();
        assert!(store.unapplied_credits().unwrap().is_empty());
    }

    #[test]
    fn test_apply_unknown_record() {
        let store = LedgerStore::open_in_memory().unwrap();
        let err = store.apply_credit_balance("nope", 0).unwrap_err();
        assert!(matches!(err, LedgerError::CreditRecordNotFound(_)));
    }

    #[test]
    fn test_due_orders_and_expiry() {
        let store = LedgerStore::open_in_memory().unwrap();
        store.insert_order(&order("live", OrderStatus::AwaitingProof)).unwrap();
        let mut done = order("done", OrderStatus::Credited);
        done.expires_at = 700;
        store.insert_order(&done).unwrap();

        let due = store.due_orders(600, 50).unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].order_id.as_str(), "live");

        // Past the deadline the order is swept to expired and off the list
        assert_eq!(store.expire_overdue(700).unwrap(), 1);
        assert!(store.due_orders(700, 50).unwrap().is_empty());
        let o = store.get_order(&OrderId::from("live")).unwrap().unwrap();
        assert_eq!(o.status, OrderStatus::Expired);

        // Terminal orders are untouched by the sweep
        let o = store.get_order(&OrderId::from("done")).unwrap().unwrap();
        assert_eq!(o.status, OrderStatus::Credited);
    }

    #[test]
    fn test_account_default_empty() {
        let store = LedgerStore::open_in_memory().unwrap();
        let account = store.account("nobody").unwrap();
        assert_eq!(account.token_balance, 0);
        assert_eq!(account.total_earned, 0);
    }

    #[test]
    fn test_swap_directions_and_guard() {
        let store = LedgerStore::open_in_memory().unwrap();
        store.insert_order(&order("o1", OrderStatus::Verified)).unwrap();
        store.insert_credit_record(&credit("r1", "o1", 1000)).unwrap();
        store.apply_credit_balance("r1", 300).unwrap();

        let account = store
            .swap("payer", 400, SwapDirection::TokenToSecondary)
            .unwrap();
        assert_eq!(account.token_balance, 600);
        assert_eq!(account.secondary_balance, 400);
        assert_eq!(account.total_spent, 400);

        let account = store
            .swap("payer", 100, SwapDirection::SecondaryToToken)
            .unwrap();
        assert_eq!(account.token_balance, 700);
        assert_eq!(account.secondary_balance, 300);

        let err = store
            .swap("payer", 10_000, SwapDirection::TokenToSecondary)
            .unwrap_err();
        assert!(matches!(
            err,
            LedgerError::InsufficientBalance {
                available: 700,
                requested: 10_000
            }
        ));
    }

    #[test]
    fn test_wallet_links_persist_and_upsert() {
        let store = LedgerStore::open_in_memory().unwrap();
        assert!(store.wallet_for("user1").unwrap().is_none());

        store.link_wallet("user1", "addr-a", 100).unwrap();
        assert_eq!(store.wallet_for("user1").unwrap().unwrap(), "addr-a");

        store.link_wallet("user1", "addr-b", 200).unwrap();
        assert_eq!(store.wallet_for("user1").unwrap().unwrap(), "addr-b");
    }

    #[test]
    fn test_open_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.db");
        {
            let store = LedgerStore::open(&path).unwrap();
            store.insert_order(&order("o1", OrderStatus::Created)).unwrap();
        }
        // Reopen: state survives
        let store = LedgerStore::open(&path).unwrap();
        assert!(store.get_order(&OrderId::from("o1")).unwrap().is_some());
    }
}

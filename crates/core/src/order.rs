//! Payment orders and ledger rows

use serde::{Deserialize, Serialize};

use crate::{OrderId, PayCurrency, PriceSnapshot, Proof, UnixTime};

/// Lifecycle status of a payment order.
///
/// Transitions are monotonic along the declared order, with one allowed
/// back-edge (`Verifying -> AwaitingProof`, a transient re-check when a
/// chain lookup came back empty). `Credited`, `Expired` and `Failed` are
/// terminal and immutable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Created,
    AwaitingProof,
    Verifying,
    Verified,
    Credited,
    Expired,
    Failed,
}

impl OrderStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Credited | Self::Expired | Self::Failed)
    }

    /// Whether the state machine permits `self -> next`
    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        use OrderStatus::*;
        match (self, next) {
            (Created, AwaitingProof) => true,
            (AwaitingProof, Verifying) => true,
            (AwaitingProof, Expired) | (AwaitingProof, Failed) => true,
            // Transient re-check: indexer had not seen the transfer yet
            (Verifying, AwaitingProof) => true,
            (Verifying, Verified) => true,
            (Verifying, Expired) | (Verifying, Failed) => true,
            (Verified, Credited) => true,
            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::AwaitingProof => "awaiting_proof",
            Self::Verifying => "verifying",
            Self::Verified => "verified",
            Self::Credited => "credited",
            Self::Expired => "expired",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "created" => Some(Self::Created),
            "awaiting_proof" => Some(Self::AwaitingProof),
            "verifying" => Some(Self::Verifying),
            "verified" => Some(Self::Verified),
            "credited" => Some(Self::Credited),
            "expired" => Some(Self::Expired),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// A pending conversion from external value to internal token balance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentOrder {
    pub order_id: OrderId,
    pub payer_address: String,
    pub currency: PayCurrency,
    /// Internal tokens the payer will receive
    pub requested_tokens: u64,
    /// Amount owed in the currency's smallest unit
    pub pay_in_amount: u64,
    /// Rate snapshot used for the quote
    pub price: PriceSnapshot,
    pub status: OrderStatus,
    /// Set once, when the first successful verification observes it
    pub proof: Option<Proof>,
    pub created_at: UnixTime,
    pub expires_at: UnixTime,
}

impl PaymentOrder {
    pub fn is_expired(&self, now: UnixTime) -> bool {
        now >= self.expires_at
    }
}

/// Append-only audit row; at most one per order id.
///
/// The UNIQUE constraint on `order_id` in storage is the exactly-once
/// crediting guard. `applied_at` stays NULL between record insertion and
/// the balance increment; a row where it is still NULL is an orphaned
/// credit awaiting operator replay (the split-failure state).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreditRecord {
    pub record_id: String,
    pub order_id: OrderId,
    pub user_address: String,
    pub amount_credited: u64,
    pub created_at: UnixTime,
    pub applied_at: Option<UnixTime>,
}

impl CreditRecord {
    pub fn is_applied(&self) -> bool {
        self.applied_at.is_some()
    }
}

/// Per-user off-chain balances.
///
/// Mutated only by the crediting engine and the internal swap operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerAccount {
    pub address: String,
    pub token_balance: u64,
    pub secondary_balance: u64,
    pub total_earned: u64,
    pub total_spent: u64,
}

impl LedgerAccount {
    pub fn empty(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            token_balance: 0,
            secondary_balance: 0,
            total_earned: 0,
            total_spent: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [OrderStatus; 7] = [
        OrderStatus::Created,
        OrderStatus::AwaitingProof,
        OrderStatus::Verifying,
        OrderStatus::Verified,
        OrderStatus::Credited,
        OrderStatus::Expired,
        OrderStatus::Failed,
    ];

    #[test]
    fn test_terminal_states_have_no_exits() {
        for from in [OrderStatus::Credited, OrderStatus::Expired, OrderStatus::Failed] {
            for to in ALL {
                assert!(
                    !from.can_transition_to(to),
                    "{from:?} -> {to:?} must be rejected"
                );
            }
        }
    }

    #[test]
    fn test_happy_path_transitions() {
        assert!(OrderStatus::Created.can_transition_to(OrderStatus::AwaitingProof));
        assert!(OrderStatus::AwaitingProof.can_transition_to(OrderStatus::Verifying));
        assert!(OrderStatus::Verifying.can_transition_to(OrderStatus::Verified));
        assert!(OrderStatus::Verified.can_transition_to(OrderStatus::Credited));
    }

    #[test]
    fn test_recheck_back_edge() {
        assert!(OrderStatus::Verifying.can_transition_to(OrderStatus::AwaitingProof));
        // The back-edge is the only non-monotonic transition
        assert!(!OrderStatus::Verified.can_transition_to(OrderStatus::AwaitingProof));
        assert!(!OrderStatus::AwaitingProof.can_transition_to(OrderStatus::Created));
    }

    #[test]
    fn test_no_skipping_verification() {
        assert!(!OrderStatus::Created.can_transition_to(OrderStatus::Credited));
        assert!(!OrderStatus::AwaitingProof.can_transition_to(OrderStatus::Credited));
        assert!(!OrderStatus::AwaitingProof.can_transition_to(OrderStatus::Verified));
    }

    #[test]
    fn test_expiry_exits() {
        assert!(OrderStatus::AwaitingProof.can_transition_to(OrderStatus::Expired));
        assert!(OrderStatus::Verifying.can_transition_to(OrderStatus::Expired));
        // A verified order is past the point of expiring
        assert!(!OrderStatus::Verified.can_transition_to(OrderStatus::Expired));
    }

    #[test]
    fn test_status_parse_roundtrip() {
        for s in ALL {
            assert_eq!(OrderStatus::parse(s.as_str()), Some(s));
        }
        assert_eq!(OrderStatus::parse("unknown"), None);
    }

    #[test]
    fn test_order_expiry_check() {
        let order = PaymentOrder {
            order_id: OrderId::generate(),
            payer_address: "addr".to_string(),
            currency: PayCurrency::Sol,
            requested_tokens: 1000,
            pay_in_amount: 66_666_667,
            price: PriceSnapshot {
                rate_usd: 150.0,
                fetched_at: 1_000,
                stale: false,
            },
            status: OrderStatus::AwaitingProof,
            proof: None,
            created_at: 1_000,
            expires_at: 1_600,
        };
        assert!(!order.is_expired(1_599));
        assert!(order.is_expired(1_600));
        assert!(order.is_expired(2_000));
    }

    #[test]
    fn test_credit_record_applied_flag() {
        let mut record = CreditRecord {
            record_id: "r1".to_string(),
            order_id: OrderId::generate(),
            user_address: "addr".to_string(),
            amount_credited: 1000,
            created_at: 10,
            applied_at: None,
        };
        assert!(!record.is_applied());
        record.applied_at = Some(11);
        assert!(record.is_applied());
    }
}

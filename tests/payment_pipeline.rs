//! Payment pipeline integration tests
//!
//! Full quote -> order -> pay -> verify -> credit flows through the
//! service facade, one per pay-in method, plus the failure paths a payer
//! can actually hit: proof reuse, under-payment, expiry, bad callbacks.

use std::sync::Arc;

use paygate_chain::AccountTransaction;
use paygate_chain::MemoTransfer;
use paygate_core::{
    OrderStatus, PayCurrency, PayInstructions, PaygateError, VerifyStatus,
};
use paygate_engine::{unix_now, PaymentService};
use paygate_ledger::{LedgerStore, SwapDirection};
use paygate_settings::Settings;

const PAYER: &str = "11111111111111111111111111111111";
const WEBHOOK_SECRET: &str = "hook-secret";

fn service() -> PaymentService {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
    let mut settings = Settings::default();
    settings.invoice.webhook_secret = WEBHOOK_SECRET.to_string();
    PaymentService::mock(settings, Arc::new(LedgerStore::open_in_memory().unwrap()))
}

fn signature(seed: u8) -> String {
    bs58::encode([seed; 64]).into_string()
}

fn settled_tx(sig: &str, treasury: &str, delta: u64) -> AccountTransaction {
    AccountTransaction {
        signature: sig.to_string(),
        account_keys: vec![PAYER.to_string(), treasury.to_string()],
        pre_balances: vec![10_000_000_000, 0],
        post_balances: vec![10_000_000_000 - delta, delta],
        err: None,
    }
}

// ============================================================================
// Happy paths, one per pay-in method
// ============================================================================

#[tokio::test]
async fn test_sol_purchase_end_to_end() {
    let svc = service();

    let (order, instructions) = svc.create_order(PAYER, 1000, PayCurrency::Sol).await.unwrap();
    // $10 at the mock $150 rate, rounded up to lamports
    assert_eq!(order.pay_in_amount, 66_666_667);
    let treasury = match instructions {
        PayInstructions::Transfer { treasury, amount } => {
            assert_eq!(amount, order.pay_in_amount);
            treasury
        }
        other => panic!("expected transfer instructions, got {other:?}"),
    };

    let sig = signature(1);
    svc.account_chain()
        .inject_transaction(settled_tx(&sig, &treasury, order.pay_in_amount))
        .unwrap();

    let (result, outcome) = svc.submit_proof(&order.order_id, &sig).await.unwrap();
    assert_eq!(result.status, VerifyStatus::Verified);
    let outcome = outcome.expect("verified order must credit");
    assert!(outcome.applied);
    assert_eq!(outcome.new_balance, 1000);

    assert_eq!(
        svc.order_status(&order.order_id).unwrap().status,
        OrderStatus::Credited
    );
    assert_eq!(svc.balance(PAYER).unwrap().token_balance, 1000);
    assert_eq!(svc.balance(PAYER).unwrap().total_earned, 1000);
}

#[tokio::test]
async fn test_ton_purchase_end_to_end() {
    let svc = service();

    let (order, instructions) = svc
        .create_order("ton-payer", 1000, PayCurrency::Ton)
        .await
        .unwrap();
    // $10 at the mock $5 rate = 2 TON in nanotons
    assert_eq!(order.pay_in_amount, 2_000_000_000);
    let (address, memo) = match instructions {
        PayInstructions::DeepLink {
            address,
            amount,
            memo,
            link,
        } => {
            assert_eq!(amount, order.pay_in_amount);
            assert!(link.contains(&memo));
            (address, memo)
        }
        other => panic!("expected deep link instructions, got {other:?}"),
    };
    assert_eq!(memo, order.order_id.to_string());

    svc.memo_indexer()
        .inject_transfer(
            &address,
            MemoTransfer {
                tx_hash: "ton-tx-1".to_string(),
                source: "ton-payer".to_string(),
                value: order.pay_in_amount,
                comment: memo,
            },
        )
        .unwrap();

    let (result, outcome) = svc.verify_now(&order.order_id).await.unwrap();
    assert_eq!(result.status, VerifyStatus::Verified);
    assert!(outcome.unwrap().applied);
    assert_eq!(svc.balance("ton-payer").unwrap().token_balance, 1000);
}

#[tokio::test]
async fn test_stars_invoice_end_to_end() {
    let svc = service();

    let (order, instructions) = svc
        .create_order("platform-user-9", 1000, PayCurrency::Stars)
        .await
        .unwrap();
    // $10 at $0.02 per star
    assert_eq!(order.pay_in_amount, 500);
    assert!(matches!(instructions, PayInstructions::InvoiceLink { .. }));

    let payload = serde_json::json!({
        "order_id": order.order_id,
        "charge_id": "charge-77",
        "amount": 500,
    });
    let (result, outcome) = svc
        .invoice_callback(WEBHOOK_SECRET, &payload)
        .await
        .unwrap();
    assert_eq!(result.status, VerifyStatus::Verified);
    assert!(outcome.unwrap().applied);
    assert_eq!(svc.balance("platform-user-9").unwrap().token_balance, 1000);
}

// ============================================================================
// Failure paths
// ============================================================================

#[tokio::test]
async fn test_signature_cannot_settle_two_orders() {
    let svc = service();
    let (first, _) = svc.create_order(PAYER, 1000, PayCurrency::Sol).await.unwrap();
    let (second, _) = svc.create_order(PAYER, 1000, PayCurrency::Sol).await.unwrap();

    let treasury = svc.settings().treasury.account_chain.clone();
    let sig = signature(2);
    svc.account_chain()
        .inject_transaction(settled_tx(&sig, &treasury, first.pay_in_amount))
        .unwrap();

    let (result, _) = svc.submit_proof(&first.order_id, &sig).await.unwrap();
    assert_eq!(result.status, VerifyStatus::Verified);

    // Replaying the signature against a second order is an authoritative
    // mismatch and kills that order
    let (result, outcome) = svc.submit_proof(&second.order_id, &sig).await.unwrap();
    assert!(matches!(result.status, VerifyStatus::Mismatch(_)));
    assert!(outcome.is_none());

    // Only the first order paid out
    assert_eq!(svc.balance(PAYER).unwrap().token_balance, 1000);
    assert_eq!(
        svc.order_status(&second.order_id).unwrap().status,
        OrderStatus::Failed
    );
}

#[tokio::test]
async fn test_underpayment_fails_terminally() {
    let svc = service();
    let (order, _) = svc.create_order(PAYER, 1000, PayCurrency::Sol).await.unwrap();

    let treasury = svc.settings().treasury.account_chain.clone();
    let sig = signature(3);
    // Well below the 1% tolerance band
    svc.account_chain()
        .inject_transaction(settled_tx(&sig, &treasury, order.pay_in_amount / 2))
        .unwrap();

    let (result, outcome) = svc.submit_proof(&order.order_id, &sig).await.unwrap();
    assert!(matches!(result.status, VerifyStatus::Mismatch(_)));
    assert!(outcome.is_none());
    assert_eq!(
        svc.order_status(&order.order_id).unwrap().status,
        OrderStatus::Failed
    );
    assert_eq!(svc.balance(PAYER).unwrap().token_balance, 0);
}

#[tokio::test]
async fn test_overpayment_credits_requested_amount_only() {
    let svc = service();
    let (order, _) = svc.create_order(PAYER, 1000, PayCurrency::Sol).await.unwrap();

    let treasury = svc.settings().treasury.account_chain.clone();
    let sig = signature(4);
    svc.account_chain()
        .inject_transaction(settled_tx(&sig, &treasury, order.pay_in_amount * 3))
        .unwrap();

    let (result, outcome) = svc.submit_proof(&order.order_id, &sig).await.unwrap();
    assert_eq!(result.status, VerifyStatus::Verified);
    assert_eq!(result.observed_amount, order.pay_in_amount * 3);
    // The surplus is not minted into tokens
    assert_eq!(outcome.unwrap().new_balance, 1000);
}

#[tokio::test]
async fn test_expiry_beats_late_proof() {
    let svc = service();
    let (order, _) = svc.create_order(PAYER, 1000, PayCurrency::Sol).await.unwrap();

    // Age the order past its deadline behind the service's back
    svc.store().expire_overdue(order.expires_at).unwrap();

    let treasury = svc.settings().treasury.account_chain.clone();
    let sig = signature(5);
    svc.account_chain()
        .inject_transaction(settled_tx(&sig, &treasury, order.pay_in_amount))
        .unwrap();

    let err = svc.submit_proof(&order.order_id, &sig).await.unwrap_err();
    assert!(matches!(err, PaygateError::OrderExpired(_)));
    assert_eq!(svc.balance(PAYER).unwrap().token_balance, 0);
}

#[tokio::test]
async fn test_invoice_callback_rejects_bad_secret() {
    let svc = service();
    let (order, _) = svc
        .create_order("platform-user-9", 1000, PayCurrency::Stars)
        .await
        .unwrap();

    let payload = serde_json::json!({
        "order_id": order.order_id,
        "charge_id": "charge-1",
        "amount": 500,
    });
    let err = svc.invoice_callback("wrong-secret", &payload).await.unwrap_err();
    assert!(matches!(err, PaygateError::CallbackAuthFailed));
    assert_eq!(
        svc.order_status(&order.order_id).unwrap().status,
        OrderStatus::AwaitingProof
    );
}

#[tokio::test]
async fn test_invoice_callback_rejects_malformed_payload() {
    let svc = service();
    let payload = serde_json::json!({ "charge_id": "charge-1" });
    let err = svc
        .invoice_callback(WEBHOOK_SECRET, &payload)
        .await
        .unwrap_err();
    assert!(matches!(err, PaygateError::MalformedProof(_)));
}

#[tokio::test]
async fn test_below_minimum_purchase_rejected() {
    let svc = service();
    let err = svc
        .create_order(PAYER, 99, PayCurrency::Sol)
        .await
        .unwrap_err();
    assert!(matches!(err, PaygateError::AmountBelowMinimum { .. }));
}

#[tokio::test]
async fn test_unknown_order_status() {
    let svc = service();
    let err = svc
        .order_status(&paygate_core::OrderId::from("missing"))
        .unwrap_err();
    assert!(matches!(err, PaygateError::OrderNotFound(_)));
}

// ============================================================================
// Account operations around the pipeline
// ============================================================================

#[tokio::test]
async fn test_wallet_link_and_swap() {
    let svc = service();
    svc.link_wallet("user-1", PAYER).unwrap();
    assert_eq!(svc.wallet_for("user-1").unwrap().unwrap(), PAYER);
    assert!(svc.wallet_for("user-2").unwrap().is_none());

    let err = svc.link_wallet("user-1", "not-an-address").unwrap_err();
    assert!(matches!(err, PaygateError::InvalidAddress(_)));

    // Earn some balance, then swap part of it
    let (order, _) = svc.create_order(PAYER, 1000, PayCurrency::Sol).await.unwrap();
    let treasury = svc.settings().treasury.account_chain.clone();
    let sig = signature(6);
    svc.account_chain()
        .inject_transaction(settled_tx(&sig, &treasury, order.pay_in_amount))
        .unwrap();
    svc.submit_proof(&order.order_id, &sig).await.unwrap();

    let account = svc.swap(PAYER, 400, SwapDirection::TokenToSecondary).unwrap();
    assert_eq!(account.token_balance, 600);
    assert_eq!(account.secondary_balance, 400);

    let err = svc
        .swap(PAYER, 10_000, SwapDirection::TokenToSecondary)
        .unwrap_err();
    assert!(matches!(err, PaygateError::InsufficientBalance { .. }));
}

#[tokio::test]
async fn test_resubmitting_same_proof_is_idempotent() {
    let svc = service();
    let (order, _) = svc.create_order(PAYER, 1000, PayCurrency::Sol).await.unwrap();
    let treasury = svc.settings().treasury.account_chain.clone();
    let sig = signature(7);
    svc.account_chain()
        .inject_transaction(settled_tx(&sig, &treasury, order.pay_in_amount))
        .unwrap();

    let (_, first) = svc.submit_proof(&order.order_id, &sig).await.unwrap();
    assert!(first.unwrap().applied);

    // Client retry after a dropped response: verified again, credited zero
    // more times
    let (result, second) = svc.submit_proof(&order.order_id, &sig).await.unwrap();
    assert_eq!(result.status, VerifyStatus::Verified);
    assert!(!second.unwrap().applied);
    assert_eq!(svc.balance(PAYER).unwrap().token_balance, 1000);
}

#[tokio::test]
async fn test_order_timestamps_sane() {
    let svc = service();
    let before = unix_now();
    let (order, _) = svc.create_order(PAYER, 1000, PayCurrency::Sol).await.unwrap();
    assert!(order.created_at >= before);
    assert_eq!(
        order.expires_at,
        order.created_at + svc.settings().expiry.account_secs
    );
}

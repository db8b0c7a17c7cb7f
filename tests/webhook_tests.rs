//! Webhook reconciliation tests
//!
//! Feed raw provider webhooks through the reconciler against a seeded card
//! and check the resulting ledger state, provider withdrawals and
//! notifications.

use std::sync::Arc;

use card_issuance_engine::core::reconciliation::DeclineVerification;
use card_issuance_engine::core::traits::{CardStore, TransactionLog};
use card_issuance_engine::core::{
    FeeEngine, InMemoryLedger, ReconcileOutcome, ReconciliationConfig, RecordingNotifier, TaskScheduler,
    WebhookCorrelator, WebhookReconciler,
};
use card_issuance_engine::provider::SandboxProvider;
use card_issuance_engine::types::{
    Card, CardBrand, CardStatus, Company, CompanyTier, Customer, EngineError, NewTransaction, Recorded,
    TransactionCategory, TransactionStatus, TransactionType,
};
use chrono::Utc;
use rstest::rstest;
use rust_decimal::Decimal;
use serde_json::json;
use uuid::Uuid;

struct Fixture {
    ledger: Arc<InMemoryLedger>,
    provider: SandboxProvider,
    notifier: Arc<RecordingNotifier>,
    scheduler: TaskScheduler,
    reconciler: WebhookReconciler,
    card: Card,
}

const EXTERNAL_ID: &str = "ext-card-1";

fn cents(value: i64) -> Decimal {
    Decimal::new(value, 2)
}

fn fixture(balance: Decimal) -> Fixture {
    let ledger = Arc::new(InMemoryLedger::new());
    let company = Company {
        id: Uuid::new_v4(),
        name: "Acme".to_string(),
        email: "billing@acme.test".to_string(),
        tier: CompanyTier::Standard,
    };
    let customer = Customer {
        id: Uuid::new_v4(),
        company_id: company.id,
        first_name: "Ada".to_string(),
        last_name: "Obi".to_string(),
        email: "ada@example.com".to_string(),
        phone: String::new(),
        country: "NG".to_string(),
        date_of_birth: None,
        identity: None,
        address: None,
        provider_customer_id: Some("cus-1".to_string()),
    };
    let card = Card {
        id: Uuid::new_v4(),
        customer_id: customer.id,
        company_id: company.id,
        external_id: EXTERNAL_ID.to_string(),
        client_reference: "iss-1".to_string(),
        status: CardStatus::Active,
        balance,
        currency: "USD".to_string(),
        brand: CardBrand::Visa,
        masked_pan: Some("5399********4242".to_string()),
        created_at: Utc::now(),
        updated_at: Utc::now(),
    };
    ledger.insert_company(company);
    ledger.insert_customer(customer);
    ledger.insert_card(card.clone());

    let (provider, _events) = SandboxProvider::new();
    provider.register_card(EXTERNAL_ID, balance);

    let notifier = Arc::new(RecordingNotifier::new());
    let scheduler = TaskScheduler::new();
    let reconciler = WebhookReconciler::new(
        ledger.clone(),
        Arc::new(provider.clone()),
        Arc::new(WebhookCorrelator::default()),
        Arc::new(FeeEngine::default()),
        notifier.clone(),
        scheduler.clone(),
        ReconciliationConfig::default(),
    );

    Fixture {
        ledger,
        provider,
        notifier,
        scheduler,
        reconciler,
        card,
    }
}

impl Fixture {
    async fn send(&self, body: serde_json::Value) -> Result<ReconcileOutcome, EngineError> {
        self.reconciler.handle_raw(body.to_string().as_bytes()).await
    }

    async fn card(&self) -> Card {
        self.ledger.card(self.card.id).await.unwrap()
    }
}

fn transaction(reference: &str, amount_minor: i64, kind: &str, status: &str) -> serde_json::Value {
    json!({
        "event": "issuing.transaction",
        "reference": reference,
        "card_id": EXTERNAL_ID,
        "amount": amount_minor,
        "currency": "USD",
        "type": kind,
        "status": status,
        "merchant": { "name": "Corner Store" }
    })
}

fn charge(reference: &str, amount_minor: i64) -> serde_json::Value {
    json!({
        "event": "issuing.charge",
        "reference": reference,
        "card_id": EXTERNAL_ID,
        "amount": amount_minor
    })
}

#[tokio::test]
async fn test_duplicate_funding_is_applied_once() {
    let f = fixture(cents(10000));

    let first = f.send(transaction("ref-123", 1000, "FUNDING", "SUCCESS")).await.unwrap();
    let second = f.send(transaction("ref-123", 1000, "FUNDING", "SUCCESS")).await.unwrap();

    assert_eq!(first, ReconcileOutcome::Applied);
    assert_eq!(second, ReconcileOutcome::Duplicate);
    assert_eq!(f.card().await.balance, cents(11000));

    let txs = f.ledger.transactions_for_card(f.card.id).await;
    assert_eq!(txs.len(), 1);
    assert_eq!(txs[0].status, TransactionStatus::Success);
    assert_eq!(txs[0].category, TransactionCategory::Funding);
    assert_eq!(txs[0].amount, cents(1000));
    assert_eq!(f.ledger.balance_records("ref-123").await.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_decline_with_provider_fee_skips_ours() {
    let f = fixture(cents(10000));

    f.send(transaction("dec-b", 2000, "DECLINE", "FAILED")).await.unwrap();
    f.send(charge("dec-b-provider", 30)).await.unwrap();
    f.scheduler.wait_idle().await;

    assert_eq!(f.card().await.balance, cents(9970));
    assert!(f.ledger.transaction_by_reference("dec-b-failure-fee").await.is_none());
    assert!(f.provider.withdrawals().is_empty());

    let decline = f.ledger.transaction_by_reference("dec-b").await.unwrap();
    assert_eq!(decline.category, TransactionCategory::Decline);
    assert_eq!(decline.status, TransactionStatus::Failed);
    assert!(f.notifier.customer_titles().contains(&"Payment declined".to_string()));
}

#[tokio::test(start_paused = true)]
async fn test_decline_without_provider_fee_charges_ours_once() {
    let f = fixture(cents(10000));

    f.send(transaction("dec-c", 2000, "DECLINE", "FAILED")).await.unwrap();
    let again = f.send(transaction("dec-c", 2000, "DECLINE", "FAILED")).await.unwrap();
    f.scheduler.wait_idle().await;

    assert_eq!(again, ReconcileOutcome::Duplicate);
    assert_eq!(f.card().await.balance, cents(9970));
    assert_eq!(f.provider.withdrawals(), vec![(EXTERNAL_ID.to_string(), cents(30))]);

    let fee = f.ledger.transaction_by_reference("dec-c-failure-fee").await.unwrap();
    assert_eq!(fee.category, TransactionCategory::Fee);
    assert_eq!(fee.amount, cents(30));
}

#[rstest]
#[case::exact_provider_fee(cents(30), true)]
#[case::within_tolerance(cents(26), true)]
#[case::upper_tolerance(cents(35), true)]
#[case::outside_tolerance(cents(20), false)]
#[case::no_drop(Decimal::ZERO, false)]
#[case::unrelated_large_drop(cents(500), false)]
#[tokio::test]
async fn test_verify_decline_tolerance(#[case] observed_drop: Decimal, #[case] provider_charged: bool) {
    let snapshot = cents(10000);
    let f = fixture(snapshot);

    let decline = NewTransaction::new(
        TransactionCategory::Decline,
        TransactionType::Debit,
        TransactionStatus::Failed,
        cents(2000),
        "USD",
        "dec-t",
    )
    .for_card(f.card.id);
    let Recorded::Inserted(decline) = f.ledger.apply_card_transaction(decline, Decimal::ZERO).await.unwrap() else {
        panic!("decline should be new");
    };
    f.ledger
        .set_card_balance(f.card.id, snapshot - observed_drop, "provider-fee", "provider decline fee")
        .await
        .unwrap();

    let verification = f.reconciler.verify_decline(f.card.id, &decline, snapshot).await.unwrap();

    if provider_charged {
        assert_eq!(verification, DeclineVerification::ProviderCharged { observed_drop });
        assert!(f.provider.withdrawals().is_empty());
    } else {
        assert!(matches!(verification, DeclineVerification::FeeCharged(ref tx) if tx.amount == cents(30)));
        assert_eq!(f.card().await.balance, snapshot - observed_drop - cents(30));
    }
}

#[rstest]
#[case::small_payment(2000, cents(20))]
#[case::large_payment(20000, cents(100))]
#[tokio::test]
async fn test_successful_authorization_collects_success_fee(#[case] amount_minor: i64, #[case] expected_fee: Decimal) {
    let f = fixture(cents(50000));

    f.send(transaction("pay-1", amount_minor, "AUTHORIZATION", "SUCCESS")).await.unwrap();
    f.scheduler.wait_idle().await;

    assert_eq!(f.card().await.balance, cents(50000) - cents(amount_minor) - expected_fee);
    assert_eq!(f.provider.withdrawals(), vec![(EXTERNAL_ID.to_string(), expected_fee)]);

    let fee = f.ledger.transaction_by_reference("pay-1-success-fee").await.unwrap();
    assert_eq!(fee.amount, expected_fee);
    assert_eq!(fee.tx_type, TransactionType::Debit);
    assert!(f.notifier.customer_titles().contains(&"Card payment".to_string()));
}

#[tokio::test]
async fn test_refused_fee_withdrawal_leaves_balance_alone() {
    let f = fixture(cents(10000));
    f.provider.set_balance(EXTERNAL_ID, cents(10));

    f.send(transaction("pay-2", 2000, "AUTHORIZATION", "SUCCESS")).await.unwrap();
    f.scheduler.wait_idle().await;

    assert_eq!(f.card().await.balance, cents(8000));
    let fee = f.ledger.transaction_by_reference("pay-2-success-fee").await.unwrap();
    assert_eq!(fee.status, TransactionStatus::Failed);
    assert!(f.ledger.balance_records("pay-2-success-fee").await.is_empty());
}

#[tokio::test]
async fn test_credit_mode_authorization_credits_without_fee() {
    let f = fixture(cents(10000));
    let mut body = transaction("auth-cr-1", 1000, "AUTHORIZATION", "SUCCESS");
    body["mode"] = json!("CREDIT");

    let outcome = f.send(body).await.unwrap();
    f.scheduler.wait_idle().await;

    assert_eq!(outcome, ReconcileOutcome::Applied);
    assert_eq!(f.card().await.balance, cents(11000));
    assert!(f.provider.withdrawals().is_empty());
    assert!(f.ledger.transaction_by_reference("auth-cr-1-success-fee").await.is_none());

    let tx = f.ledger.transaction_by_reference("auth-cr-1").await.unwrap();
    assert_eq!(tx.category, TransactionCategory::Refund);
    assert_eq!(tx.tx_type, TransactionType::Credit);
    assert!(f.notifier.customer_titles().contains(&"Card credited".to_string()));
}

#[tokio::test]
async fn test_failed_authorization_is_recorded_without_movement() {
    let f = fixture(cents(10000));

    let outcome = f.send(transaction("pay-3", 2000, "AUTHORIZATION", "FAILED")).await.unwrap();
    f.scheduler.wait_idle().await;

    assert_eq!(outcome, ReconcileOutcome::Applied);
    assert_eq!(f.card().await.balance, cents(10000));
    let tx = f.ledger.transaction_by_reference("pay-3").await.unwrap();
    assert_eq!(tx.status, TransactionStatus::Failed);
    assert!(f.provider.withdrawals().is_empty());
}

#[tokio::test]
async fn test_settlement_promotes_pending_payment() {
    let f = fixture(cents(10000));
    let pending = NewTransaction::new(
        TransactionCategory::Payment,
        TransactionType::Debit,
        TransactionStatus::Pending,
        cents(1500),
        "USD",
        "set-1",
    )
    .for_card(f.card.id);
    f.ledger.insert_transaction(pending).await.unwrap();

    let first = f.send(transaction("set-1", 1500, "SETTLEMENT", "SUCCESS")).await.unwrap();
    let second = f.send(transaction("set-1", 1500, "SETTLEMENT", "SUCCESS")).await.unwrap();

    assert_eq!(first, ReconcileOutcome::Applied);
    assert_eq!(second, ReconcileOutcome::Duplicate);
    let tx = f.ledger.transaction_by_reference("set-1").await.unwrap();
    assert_eq!(tx.status, TransactionStatus::Success);
    assert_eq!(f.card().await.balance, cents(10000));
}

#[rstest]
#[case::settlement("SETTLEMENT", 1500, cents(8500))]
#[case::refund("REFUND", 1500, cents(11500))]
#[case::reversal("REVERSAL", 250, cents(10250))]
#[case::withdrawal("WITHDRAWAL", 4000, cents(6000))]
#[tokio::test]
async fn test_transaction_kinds_move_balance(
    #[case] kind: &str,
    #[case] amount_minor: i64,
    #[case] expected_balance: Decimal,
) {
    let f = fixture(cents(10000));

    let outcome = f.send(transaction("mv-1", amount_minor, kind, "SUCCESS")).await.unwrap();
    f.scheduler.wait_idle().await;

    assert_eq!(outcome, ReconcileOutcome::Applied);
    assert_eq!(f.card().await.balance, expected_balance);
}

#[tokio::test]
async fn test_cross_border_fee_uses_fee_amount() {
    let f = fixture(cents(10000));
    let mut body = transaction("xb-1", 5000, "CROSS-BORDER", "SUCCESS");
    body["fee"] = json!(150);

    f.send(body).await.unwrap();

    assert_eq!(f.card().await.balance, cents(9850));
    let tx = f.ledger.transaction_by_reference("xb-1").await.unwrap();
    assert_eq!(tx.category, TransactionCategory::Fee);
    assert_eq!(tx.amount, cents(150));
}

#[tokio::test]
async fn test_charge_is_idempotent() {
    let f = fixture(cents(10000));

    assert_eq!(f.send(charge("chg-1", 75)).await.unwrap(), ReconcileOutcome::Applied);
    assert_eq!(f.send(charge("chg-1", 75)).await.unwrap(), ReconcileOutcome::Duplicate);
    assert_eq!(f.card().await.balance, cents(9925));
}

#[rstest]
#[case::positive_balance(cents(2500), TransactionType::Debit, cents(2500))]
#[case::negative_balance(cents(-30), TransactionType::Credit, cents(30))]
#[tokio::test]
async fn test_termination_zeroes_balance(
    #[case] balance: Decimal,
    #[case] expected_type: TransactionType,
    #[case] expected_amount: Decimal,
) {
    let f = fixture(balance);
    let terminated = json!({
        "event": "issuing.terminated",
        "reference": "term-1",
        "card_id": EXTERNAL_ID,
        "reason": "expired"
    });

    assert_eq!(f.send(terminated.clone()).await.unwrap(), ReconcileOutcome::Applied);
    assert_eq!(f.send(terminated).await.unwrap(), ReconcileOutcome::Duplicate);
    f.scheduler.wait_idle().await;

    let card = f.card().await;
    assert_eq!(card.status, CardStatus::Terminated);
    assert_eq!(card.balance, Decimal::ZERO);

    let tx = f.ledger.transaction_by_reference("term-1").await.unwrap();
    assert_eq!(tx.category, TransactionCategory::Termination);
    assert_eq!(tx.tx_type, expected_type);
    assert_eq!(tx.amount, expected_amount);
    assert!(f.notifier.customer_titles().contains(&"Card terminated".to_string()));
}

#[tokio::test]
async fn test_terminated_card_accepts_no_movement() {
    let f = fixture(cents(1000));
    f.send(json!({
        "event": "issuing.terminated",
        "reference": "term-2",
        "card_id": EXTERNAL_ID
    }))
    .await
    .unwrap();

    let result = f.send(transaction("fund-late", 500, "FUNDING", "SUCCESS")).await;

    assert!(result.is_err());
    let card = f.card().await;
    assert_eq!(card.status, CardStatus::Terminated);
    assert_eq!(card.balance, Decimal::ZERO);
    assert!(f.ledger.transaction_by_reference("fund-late").await.is_none());
}

#[tokio::test]
async fn test_unknown_card_is_ignored() {
    let f = fixture(cents(1000));
    let mut body = transaction("pay-x", 100, "AUTHORIZATION", "SUCCESS");
    body["card_id"] = json!("ext-unknown");

    let outcome = f.send(body).await.unwrap();

    assert!(matches!(outcome, ReconcileOutcome::Ignored(_)));
    assert!(f.ledger.transaction_by_reference("pay-x").await.is_none());
}

#[rstest]
#[case::not_json(b"{not json".as_slice())]
#[case::unknown_event(br#"{"event":"issuing.frozen","reference":"r-1"}"#.as_slice())]
#[case::empty_reference(br#"{"event":"issuing.charge","reference":" ","card_id":"ext-card-1","amount":10}"#.as_slice())]
#[tokio::test]
async fn test_invalid_webhooks_are_rejected(#[case] body: &[u8]) {
    let f = fixture(cents(1000));

    let error = f.reconciler.handle_raw(body).await.unwrap_err();

    assert!(matches!(error, EngineError::WebhookProcessing { .. }));
    assert_eq!(f.card().await.balance, cents(1000));
}

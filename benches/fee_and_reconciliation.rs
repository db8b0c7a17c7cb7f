//! Benchmarks for fee calculation and webhook reconciliation
//!
//! Uses the divan benchmarking framework.
//!
//! # Running Benchmarks
//!
//! ```bash
//! cargo bench
//! ```
//!
//! Reconciliation benchmarks replay batches of funding webhooks against a
//! single seeded card, so every event takes the full parse, dedup and
//! ledger-update path.

use std::sync::Arc;

use card_issuance_engine::core::fees::{FeeContext, FeeKind};
use card_issuance_engine::core::{
    FeeEngine, InMemoryLedger, ReconciliationConfig, TaskScheduler, TracingNotifier, WebhookCorrelator,
    WebhookReconciler,
};
use card_issuance_engine::provider::SandboxProvider;
use card_issuance_engine::types::{Card, CardBrand, CardStatus, CompanyTier};
use chrono::Utc;
use rust_decimal::Decimal;
use uuid::Uuid;

fn main() {
    divan::main();
}

const EXTERNAL_ID: &str = "bench-card";

/// Fee calculation across the fixed and percentage tiers
#[divan::bench(args = [FeeKind::Issuance, FeeKind::PaymentSuccess, FeeKind::PaymentFailure])]
fn fee_calculation(bencher: divan::Bencher, kind: FeeKind) {
    let engine = FeeEngine::default();
    let company_id = Uuid::new_v4();
    let context = FeeContext {
        tier: CompanyTier::Premium,
        cards_issued: 0,
        bulk_count: 12,
        rolling_volume: Decimal::new(25_000, 0),
    };
    let amount = Decimal::new(15_075, 2);

    bencher.bench(|| {
        engine.calculate(
            divan::black_box(company_id),
            divan::black_box(amount),
            "USD",
            kind,
            &context,
        )
    });
}

fn reconciler() -> WebhookReconciler {
    let ledger = Arc::new(InMemoryLedger::new());
    ledger.insert_card(Card {
        id: Uuid::new_v4(),
        customer_id: Uuid::new_v4(),
        company_id: Uuid::new_v4(),
        external_id: EXTERNAL_ID.to_string(),
        client_reference: "bench-issuance".to_string(),
        status: CardStatus::Active,
        balance: Decimal::ZERO,
        currency: "USD".to_string(),
        brand: CardBrand::Visa,
        masked_pan: None,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    });
    let (provider, _events) = SandboxProvider::new();

    WebhookReconciler::new(
        ledger,
        Arc::new(provider),
        Arc::new(WebhookCorrelator::default()),
        Arc::new(FeeEngine::default()),
        Arc::new(TracingNotifier),
        TaskScheduler::new(),
        ReconciliationConfig::default(),
    )
}

fn funding_bodies(count: usize) -> Vec<Vec<u8>> {
    (0..count)
        .map(|i| {
            format!(
                r#"{{"event":"issuing.transaction","reference":"fund-{}","card_id":"{}","amount":{},"currency":"USD","type":"FUNDING","status":"SUCCESS"}}"#,
                i,
                EXTERNAL_ID,
                100 + i % 900
            )
            .into_bytes()
        })
        .collect()
}

/// Reconcile a batch of distinct funding webhooks
#[divan::bench(args = [100, 1_000, 10_000])]
fn reconcile_funding(bencher: divan::Bencher, count: usize) {
    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => panic!("Failed to build runtime: {}", e),
    };
    let bodies = funding_bodies(count);

    bencher.with_inputs(reconciler).bench_values(|reconciler| {
        runtime.block_on(async {
            for body in &bodies {
                let _ = reconciler.handle_raw(body).await;
            }
            reconciler.scheduler().wait_idle().await;
        })
    });
}

/// Redelivery of a single webhook, which only hits the dedup path
#[divan::bench]
fn reconcile_duplicate(bencher: divan::Bencher) {
    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => panic!("Failed to build runtime: {}", e),
    };
    let reconciler = reconciler();
    let body = funding_bodies(1).remove(0);
    let _ = runtime.block_on(reconciler.handle_raw(&body));

    bencher.bench_local(|| runtime.block_on(reconciler.handle_raw(divan::black_box(&body))));
}

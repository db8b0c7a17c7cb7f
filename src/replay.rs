//! Webhook replay
//!
//! Seeds an in-memory ledger, pushes a recorded stream of provider webhooks
//! through the reconciler against the sandbox provider, waits for all
//! follow-up work and writes the resulting card states as CSV.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::config::EngineConfig;
use crate::core::correlator::WebhookCorrelator;
use crate::core::fees::{FeeEngine, FeeSchedule};
use crate::core::ledger::InMemoryLedger;
use crate::core::notifier::TracingNotifier;
use crate::core::reconciliation::{ReconcileOutcome, WebhookReconciler};
use crate::core::scheduler::TaskScheduler;
use crate::core::traits::{CardProvider, CardStore, TransactionLog, WalletLedger};
use crate::io::{write_cards_csv, EventReader, SeedReader, SeedRecord};
use crate::provider::SandboxProvider;
use crate::types::{
    Card, CardBrand, CardStatus, EngineError, NewTransaction, ProviderEvent, TransactionCategory,
    TransactionStatus, TransactionType,
};

/// Inputs of a replay run
#[derive(Debug, Clone, PartialEq)]
pub struct ReplayOptions {
    /// JSON-lines file of webhook bodies
    pub events: PathBuf,
    /// Seed CSV
    pub seed: PathBuf,
    /// Overrides the configured fee schedule
    pub fee_schedule: Option<PathBuf>,
    /// Overrides the configured decline verification delay
    pub decline_delay: Option<Duration>,
}

/// Counts of what the replayed webhooks did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplaySummary {
    pub events: usize,
    pub applied: usize,
    pub delivered: usize,
    pub duplicates: usize,
    pub ignored: usize,
    pub rejected: usize,
}

impl ReplaySummary {
    fn record(&mut self, outcome: &ReconcileOutcome) {
        match outcome {
            ReconcileOutcome::Applied => self.applied += 1,
            ReconcileOutcome::Delivered => self.delivered += 1,
            ReconcileOutcome::Duplicate => self.duplicates += 1,
            ReconcileOutcome::Ignored(_) => self.ignored += 1,
        }
    }
}

/// Apply seed records to the ledger and the sandbox provider
///
/// Records are applied in order, so owners must precede what they own.
/// Seeded issuances reserve their amount from the company wallet and stay
/// pending until their creation webhook is replayed.
pub async fn load_seed(
    ledger: &InMemoryLedger,
    provider: &SandboxProvider,
    seeds: Vec<SeedRecord>,
) -> Result<usize, EngineError> {
    let count = seeds.len();

    for seed in seeds {
        match seed {
            SeedRecord::Company(company) => ledger.insert_company(company),
            SeedRecord::Wallet(wallet) => ledger.insert_wallet(wallet),
            SeedRecord::Customer(customer) => ledger.insert_customer(customer),
            SeedRecord::Card {
                card_id,
                customer_id,
                external_id,
                currency,
                balance,
                status,
            } => {
                let customer = ledger
                    .customer(customer_id)
                    .await
                    .ok_or_else(|| EngineError::not_found("customer", customer_id))?;
                let now = chrono::Utc::now();

                provider.register_card(&external_id, balance);
                if status == CardStatus::Terminated {
                    provider.terminate(&external_id).await?;
                }
                ledger.insert_card(Card {
                    id: card_id,
                    customer_id,
                    company_id: customer.company_id,
                    client_reference: format!("seed-{}", external_id),
                    external_id,
                    status,
                    balance,
                    currency,
                    brand: CardBrand::Visa,
                    masked_pan: None,
                    created_at: now,
                    updated_at: now,
                });
            }
            SeedRecord::Issuance {
                reference,
                customer_id,
                currency,
                amount,
            } => {
                let customer = ledger
                    .customer(customer_id)
                    .await
                    .ok_or_else(|| EngineError::not_found("customer", customer_id))?;
                let wallet = ledger
                    .company_wallet(customer.company_id, &currency)
                    .await
                    .ok_or_else(|| EngineError::not_found("wallet", format!("{}/{}", customer.company_id, currency)))?;

                ledger.reserve(wallet.id, amount, "seeded issuance", &reference).await?;
                let pending = NewTransaction::new(
                    TransactionCategory::Issuance,
                    TransactionType::Debit,
                    TransactionStatus::Pending,
                    amount,
                    currency,
                    reference,
                )
                .for_wallet(wallet.id)
                .for_owner(Some(customer.id), Some(customer.company_id))
                .describe("Seeded card issuance");
                ledger.insert_transaction(pending).await?;
            }
        }
    }

    Ok(count)
}

/// Register cards created by replayed webhooks with the sandbox and mirror
/// terminations
async fn mirror_to_sandbox(
    sandbox: &SandboxProvider,
    ledger: &InMemoryLedger,
    event: &ProviderEvent,
) -> Result<(), EngineError> {
    match event {
        ProviderEvent::CardCreated(created) => {
            if let Some(card) = ledger.card_by_external_id(&created.card.id).await {
                if sandbox.balance_of(&card.external_id).is_none() {
                    sandbox.register_card(&card.external_id, card.balance);
                }
            }
        }
        ProviderEvent::CardTerminated(terminated) => {
            sandbox.terminate(&terminated.card_id).await?;
        }
        _ => {}
    }
    Ok(())
}

/// Replay a webhook stream and write the final card states to `output`
///
/// Individual webhooks that fail are counted as rejected and do not stop the
/// replay; only unreadable inputs are errors.
pub async fn run_replay(
    options: &ReplayOptions,
    config: &EngineConfig,
    output: &mut dyn Write,
) -> Result<ReplaySummary, EngineError> {
    let seeds = SeedReader::open(&options.seed).await?.read_all().await;

    let ledger = Arc::new(InMemoryLedger::new());
    let (sandbox, _webhooks) = SandboxProvider::new();
    let seeded = load_seed(&ledger, &sandbox, seeds).await?;
    info!(records = seeded, "Seed loaded");

    let fees = match options.fee_schedule.as_ref().or(config.fee_schedule_path.as_ref()) {
        Some(path) => FeeEngine::with_schedule(FeeSchedule::from_path(path)?),
        None => FeeEngine::default(),
    };
    let mut reconciliation = config.reconciliation();
    if let Some(delay) = options.decline_delay {
        reconciliation.decline_verification_delay = delay;
    }

    let scheduler = TaskScheduler::new();
    let correlator = Arc::new(WebhookCorrelator::new(config.correlator()));
    let reconciler = WebhookReconciler::new(
        ledger.clone(),
        Arc::new(sandbox.clone()),
        correlator.clone(),
        Arc::new(fees),
        Arc::new(TracingNotifier),
        scheduler.clone(),
        reconciliation,
    );

    let mut summary = ReplaySummary::default();
    let mut events = EventReader::open(&options.events).await?;
    while let Some(raw) = events.next_event().await? {
        summary.events += 1;
        let event = match ProviderEvent::from_slice(raw.body.as_bytes()) {
            Ok(event) => event,
            Err(e) => {
                summary.rejected += 1;
                warn!(line = raw.line, error = %e, "Malformed webhook skipped");
                continue;
            }
        };

        match reconciler.handle(event.clone()).await {
            Ok(outcome) => {
                if outcome == ReconcileOutcome::Applied {
                    mirror_to_sandbox(&sandbox, &ledger, &event).await?;
                }
                summary.record(&outcome);
            }
            Err(e) => {
                summary.rejected += 1;
                warn!(line = raw.line, error = %e, "Webhook rejected");
            }
        }
    }

    scheduler.wait_idle().await;
    correlator.shutdown();

    let cards = ledger.all_cards().await;
    write_cards_csv(&cards, output)?;

    info!(
        events = summary.events,
        applied = summary.applied,
        duplicates = summary.duplicates,
        ignored = summary.ignored,
        rejected = summary.rejected,
        background_failures = scheduler.failures(),
        "Replay finished"
    );
    Ok(summary)
}

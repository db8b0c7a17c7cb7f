//! Webhook reconciliation
//!
//! Applies inbound provider events to local state. Every handler is keyed on
//! the event reference, so a redelivered webhook changes nothing.
//!
//! | Event | Effect |
//! |-------|--------|
//! | `issuing.created.successful` | wake the waiting issuance, or materialize the card |
//! | `issuing.created.failed` | wake the waiting issuance, or refund the reservation |
//! | `issuing.terminated` | zero the card balance and mark it terminated |
//! | `issuing.transaction` | card movement by sub-type, see [`TransactionEvent`] |
//! | `issuing.charge` | fee-only debit |
//!
//! Follow-up work (fee collection, decline verification, notifications) is
//! spawned on the [`TaskScheduler`] and never delays the acknowledgement.

use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use tracing::{debug, error, info, warn};

use super::correlator::WebhookCorrelator;
use super::fees::{FeeContext, FeeEngine, FeeKind};
use super::issuance::refund_issuance;
use super::scheduler::TaskScheduler;
use super::traits::{CardProvider, IssuanceCommit, LedgerStore, Notifier};
use crate::types::webhook::{
    CardCreatedEvent, CardCreationFailedEvent, CardTerminatedEvent, ChargeEvent, ProviderTransactionKind,
    TransactionEvent, TransactionMode,
};
use crate::types::{
    Card, CardBrand, CardId, CustomerId, EngineError, IssuanceConfirmation, NewTransaction, ProviderEvent, Recorded,
    Transaction, TransactionCategory, TransactionStatus, TransactionType,
};

/// Fee the provider debits on its own for a declined payment
pub const DEFAULT_PROVIDER_DECLINE_FEE: Decimal = Decimal::from_parts(30, 0, 0, false, 2);

/// Accepted difference between the observed drop and the provider fee
pub const DEFAULT_DECLINE_FEE_TOLERANCE: Decimal = Decimal::from_parts(5, 0, 0, false, 2);

pub const DEFAULT_DECLINE_VERIFICATION_DELAY: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReconciliationConfig {
    /// Time between a decline and the fee verification
    pub decline_verification_delay: Duration,
    pub provider_decline_fee: Decimal,
    pub decline_fee_tolerance: Decimal,
}

impl Default for ReconciliationConfig {
    fn default() -> Self {
        Self {
            decline_verification_delay: DEFAULT_DECLINE_VERIFICATION_DELAY,
            provider_decline_fee: DEFAULT_PROVIDER_DECLINE_FEE,
            decline_fee_tolerance: DEFAULT_DECLINE_FEE_TOLERANCE,
        }
    }
}

/// What handling an event did
#[derive(Debug, Clone, PartialEq)]
pub enum ReconcileOutcome {
    /// Local state changed
    Applied,
    /// The event was handed to a waiting issuance
    Delivered,
    /// The reference was already processed
    Duplicate,
    /// Acknowledged without any change
    Ignored(String),
}

/// Result of a decline fee verification
#[derive(Debug, Clone, PartialEq)]
pub enum DeclineVerification {
    /// The provider charged its own decline fee
    ProviderCharged { observed_drop: Decimal },
    /// Our failure fee was collected
    FeeCharged(Transaction),
    /// Nothing was charged
    NotCharged(String),
}

/// Applies provider webhooks to the ledger
#[derive(Clone)]
pub struct WebhookReconciler {
    store: Arc<dyn LedgerStore>,
    provider: Arc<dyn CardProvider>,
    correlator: Arc<WebhookCorrelator>,
    fees: Arc<FeeEngine>,
    notifier: Arc<dyn Notifier>,
    scheduler: TaskScheduler,
    config: ReconciliationConfig,
}

impl WebhookReconciler {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        provider: Arc<dyn CardProvider>,
        correlator: Arc<WebhookCorrelator>,
        fees: Arc<FeeEngine>,
        notifier: Arc<dyn Notifier>,
        scheduler: TaskScheduler,
        config: ReconciliationConfig,
    ) -> Self {
        Self {
            store,
            provider,
            correlator,
            fees,
            notifier,
            scheduler,
            config,
        }
    }

    pub fn scheduler(&self) -> &TaskScheduler {
        &self.scheduler
    }

    /// Parse and handle a raw webhook body
    ///
    /// Malformed or unknown events are logged and reported as
    /// [`EngineError::WebhookProcessing`]; they never affect state.
    pub async fn handle_raw(&self, body: &[u8]) -> Result<ReconcileOutcome, EngineError> {
        let event = ProviderEvent::from_slice(body).map_err(|e| {
            warn!(error = %e, bytes = body.len(), "Rejected malformed webhook");
            EngineError::webhook(format!("malformed event: {}", e))
        })?;
        self.handle(event).await
    }

    /// Handle a parsed provider event
    pub async fn handle(&self, event: ProviderEvent) -> Result<ReconcileOutcome, EngineError> {
        let name = event.name();
        let reference = event.reference().to_string();
        if reference.trim().is_empty() {
            warn!(event = name, "Rejected webhook without reference");
            return Err(EngineError::webhook(format!("{} event has no reference", name)));
        }
        debug!(event = name, reference = %reference, "Handling webhook");

        let result = match event {
            ProviderEvent::CardCreated(e) => self.on_card_created(e).await,
            ProviderEvent::CardCreationFailed(e) => self.on_card_creation_failed(e).await,
            ProviderEvent::CardTerminated(e) => self.on_card_terminated(e).await,
            ProviderEvent::Transaction(e) => self.on_transaction(e).await,
            ProviderEvent::Charge(e) => self.on_charge(e).await,
        };

        match &result {
            Ok(outcome) => info!(event = name, reference = %reference, outcome = ?outcome, "Webhook reconciled"),
            Err(e) => warn!(event = name, reference = %reference, error = %e, "Webhook reconciliation failed"),
        }
        result
    }

    async fn on_card_created(&self, event: CardCreatedEvent) -> Result<ReconcileOutcome, EngineError> {
        if self
            .correlator
            .notify(&event.reference, IssuanceConfirmation::Created(event.clone()))
        {
            return Ok(ReconcileOutcome::Delivered);
        }

        if self.store.card_by_reference(&event.reference).await.is_some()
            || self.store.card_by_external_id(&event.card.id).await.is_some()
        {
            return Ok(ReconcileOutcome::Duplicate);
        }

        let Some(pending) = self.store.transaction_by_reference(&event.reference).await else {
            return Ok(ReconcileOutcome::Ignored(format!(
                "no issuance for reference {}",
                event.reference
            )));
        };

        let commit = IssuanceCommit {
            reference: event.reference.clone(),
            external_id: event.card.id.clone(),
            brand: event.card.brand.unwrap_or(CardBrand::Visa),
            masked_pan: event.card.masked_pan.clone(),
        };

        match self.store.commit_issuance(commit).await {
            Ok(Recorded::Inserted(card)) => {
                info!(
                    reference = %event.reference,
                    card_id = %card.id,
                    external_id = %card.external_id,
                    "Card materialized from late creation webhook"
                );
                self.notify_in_background(
                    card.customer_id,
                    "Card issued",
                    format!("Your {} virtual card is ready.", card.brand),
                    Some(pending.reference),
                );
                Ok(ReconcileOutcome::Applied)
            }
            Ok(Recorded::Duplicate(_)) => Ok(ReconcileOutcome::Duplicate),
            Err(EngineError::Validation { message }) => {
                // The provider created a card for an issuance we already closed
                error!(
                    reference = %event.reference,
                    external_id = %event.card.id,
                    status = %pending.status,
                    reason = %message,
                    "Creation webhook for a closed issuance; manual audit required"
                );
                Err(EngineError::webhook(message))
            }
            Err(e) => Err(e),
        }
    }

    async fn on_card_creation_failed(&self, event: CardCreationFailedEvent) -> Result<ReconcileOutcome, EngineError> {
        if self
            .correlator
            .notify(&event.reference, IssuanceConfirmation::Failed(event.clone()))
        {
            return Ok(ReconcileOutcome::Delivered);
        }

        let Some(pending) = self.store.transaction_by_reference(&event.reference).await else {
            return Ok(ReconcileOutcome::Ignored(format!(
                "no issuance for reference {}",
                event.reference
            )));
        };

        match pending.status {
            TransactionStatus::Pending => {}
            TransactionStatus::Failed | TransactionStatus::Cancelled => return Ok(ReconcileOutcome::Duplicate),
            TransactionStatus::Success => {
                error!(reference = %event.reference, "Failure webhook for a completed issuance; manual audit required");
                return Ok(ReconcileOutcome::Ignored("issuance already completed".to_string()));
            }
        }

        let reason = event
            .reason
            .unwrap_or_else(|| "card creation failed at provider".to_string());
        let refund = refund_issuance(self.store.as_ref(), &event.reference, &reason).await?;
        if refund.is_none() {
            return Ok(ReconcileOutcome::Duplicate);
        }

        if let Some(customer_id) = pending.customer_id {
            self.notify_in_background(
                customer_id,
                "Card issuance failed",
                format!("Your card could not be issued: {}. Your funds were refunded.", reason),
                Some(pending.reference),
            );
        }
        Ok(ReconcileOutcome::Applied)
    }

    async fn on_card_terminated(&self, event: CardTerminatedEvent) -> Result<ReconcileOutcome, EngineError> {
        let Some(card) = self.store.card_by_external_id(&event.card_id).await else {
            return Ok(ReconcileOutcome::Ignored(format!("unknown card {}", event.card_id)));
        };
        if card.is_terminated() {
            return Ok(ReconcileOutcome::Duplicate);
        }

        let reason = event
            .reason
            .unwrap_or_else(|| "terminated by provider".to_string());
        let description = format!("Card terminated: {}", reason);
        let Some(zeroing) = self
            .store
            .terminate_card(card.id, &event.reference, &description)
            .await?
        else {
            return Ok(ReconcileOutcome::Duplicate);
        };

        warn!(
            card_id = %card.id,
            external_id = %card.external_id,
            balance_cleared = %zeroing.amount,
            reason = %reason,
            "Card terminated by provider"
        );
        self.notify_in_background(
            card.customer_id,
            "Card terminated",
            format!("Your card ending {} was terminated: {}.", last_four(&card), reason),
            Some(event.reference),
        );
        Ok(ReconcileOutcome::Applied)
    }

    async fn on_transaction(&self, event: TransactionEvent) -> Result<ReconcileOutcome, EngineError> {
        let Some(card) = self.store.card_by_external_id(&event.card_id).await else {
            return Ok(ReconcileOutcome::Ignored(format!("unknown card {}", event.card_id)));
        };
        let amount = event.amount_major();

        if event.kind == ProviderTransactionKind::Decline {
            return self.on_decline(&card, &event).await;
        }
        if event.kind == ProviderTransactionKind::Settlement {
            if let Some(existing) = self.store.transaction_by_reference(&event.reference).await {
                if existing.status != TransactionStatus::Pending {
                    return Ok(ReconcileOutcome::Duplicate);
                }
                let status = if event.is_successful() {
                    TransactionStatus::Success
                } else {
                    TransactionStatus::Failed
                };
                self.store.finalize_transaction(&event.reference, status).await?;
                return Ok(ReconcileOutcome::Applied);
            }
        }

        let (category, tx_type, recorded_amount) = match event.kind {
            // Merchant refunds can arrive as authorizations in credit mode
            ProviderTransactionKind::Authorization if event.mode == Some(TransactionMode::Credit) => {
                (TransactionCategory::Refund, TransactionType::Credit, amount)
            }
            ProviderTransactionKind::Authorization | ProviderTransactionKind::Settlement => {
                (TransactionCategory::Payment, TransactionType::Debit, amount)
            }
            ProviderTransactionKind::Refund | ProviderTransactionKind::Reversal => {
                (TransactionCategory::Refund, TransactionType::Credit, amount)
            }
            ProviderTransactionKind::CrossBorder => {
                let fee = if event.fee_major().is_zero() { amount } else { event.fee_major() };
                (TransactionCategory::Fee, TransactionType::Debit, fee)
            }
            ProviderTransactionKind::Funding => (TransactionCategory::Funding, TransactionType::Credit, amount),
            ProviderTransactionKind::Withdrawal => (TransactionCategory::Withdrawal, TransactionType::Debit, amount),
            ProviderTransactionKind::Decline => (TransactionCategory::Decline, TransactionType::Debit, amount),
        };

        let successful = event.is_successful();
        let status = if successful {
            TransactionStatus::Success
        } else {
            TransactionStatus::Failed
        };
        let delta = match (successful, tx_type) {
            (false, _) => Decimal::ZERO,
            (true, TransactionType::Credit) => recorded_amount,
            (true, TransactionType::Debit) => -recorded_amount,
        };

        let tx = card_movement(&card, category, tx_type, recorded_amount, &event.reference)
            .with_status(status)
            .with_fee(if category == TransactionCategory::Fee { Decimal::ZERO } else { event.fee_major() })
            .describe(describe_transaction(&event));

        let recorded = self.store.apply_card_transaction(tx, delta).await?;
        let Recorded::Inserted(stored) = recorded else {
            return Ok(ReconcileOutcome::Duplicate);
        };

        if successful && event.kind == ProviderTransactionKind::Authorization && tx_type == TransactionType::Debit {
            self.spawn_success_fee(card.clone(), stored.clone());
            self.notify_in_background(
                card.customer_id,
                "Card payment",
                format!(
                    "{} {} paid to {} with your card ending {}.",
                    recorded_amount,
                    stored.currency,
                    event.merchant_name(),
                    last_four(&card)
                ),
                Some(stored.reference.clone()),
            );
        } else if successful && tx_type == TransactionType::Credit {
            self.notify_in_background(
                card.customer_id,
                "Card credited",
                format!("{} {} was credited to your card ending {}.", recorded_amount, stored.currency, last_four(&card)),
                Some(stored.reference.clone()),
            );
        }

        Ok(ReconcileOutcome::Applied)
    }

    async fn on_decline(&self, card: &Card, event: &TransactionEvent) -> Result<ReconcileOutcome, EngineError> {
        let tx = card_movement(
            card,
            TransactionCategory::Decline,
            TransactionType::Debit,
            event.amount_major(),
            &event.reference,
        )
        .with_status(TransactionStatus::Failed)
        .describe(describe_transaction(event));

        // Snapshot before any provider fee lands
        let snapshot = card.balance;
        let recorded = self.store.apply_card_transaction(tx, Decimal::ZERO).await?;
        let Recorded::Inserted(stored) = recorded else {
            return Ok(ReconcileOutcome::Duplicate);
        };

        info!(
            card_id = %card.id,
            reference = %stored.reference,
            balance_snapshot = %snapshot,
            delay_secs = self.config.decline_verification_delay.as_secs(),
            "Payment declined, scheduling fee verification"
        );

        let this = self.clone();
        let card_id = card.id;
        self.scheduler.spawn_after(
            "decline_fee_verification",
            self.config.decline_verification_delay,
            async move {
                this.verify_decline(card_id, &stored, snapshot).await?;
                Ok(())
            },
        );

        self.notify_in_background(
            card.customer_id,
            "Payment declined",
            format!(
                "A payment of {} {} to {} was declined on your card ending {}.",
                event.amount_major(),
                event.currency,
                event.merchant_name(),
                last_four(card)
            ),
            Some(event.reference.clone()),
        );
        Ok(ReconcileOutcome::Applied)
    }

    async fn on_charge(&self, event: ChargeEvent) -> Result<ReconcileOutcome, EngineError> {
        let Some(card) = self.store.card_by_external_id(&event.card_id).await else {
            return Ok(ReconcileOutcome::Ignored(format!("unknown card {}", event.card_id)));
        };

        let amount = event.amount_major();
        let description = event
            .description
            .clone()
            .unwrap_or_else(|| "Provider charge".to_string());
        let tx = card_movement(&card, TransactionCategory::Fee, TransactionType::Debit, amount, &event.reference)
            .describe(description);

        match self.store.apply_card_transaction(tx, -amount).await? {
            Recorded::Inserted(_) => Ok(ReconcileOutcome::Applied),
            Recorded::Duplicate(_) => Ok(ReconcileOutcome::Duplicate),
        }
    }

    /// Decide whether the provider already charged for a decline
    ///
    /// Compares the drop of the local card balance since `snapshot` with the
    /// provider's known decline fee. When they match within tolerance the
    /// provider charged and nothing happens; otherwise our failure fee is
    /// collected.
    pub async fn verify_decline(
        &self,
        card_id: CardId,
        decline: &Transaction,
        snapshot: Decimal,
    ) -> Result<DeclineVerification, EngineError> {
        let card = self
            .store
            .card(card_id)
            .await
            .ok_or_else(|| EngineError::not_found("card", card_id))?;

        let observed_drop = snapshot - card.balance;
        let difference = (observed_drop - self.config.provider_decline_fee).abs();
        if difference <= self.config.decline_fee_tolerance {
            info!(
                card_id = %card_id,
                reference = %decline.reference,
                observed_drop = %observed_drop,
                "Provider charged its decline fee, skipping ours"
            );
            return Ok(DeclineVerification::ProviderCharged { observed_drop });
        }

        debug!(
            card_id = %card_id,
            reference = %decline.reference,
            observed_drop = %observed_drop,
            expected = %self.config.provider_decline_fee,
            "No provider decline fee observed"
        );
        let fee_reference = format!("{}-failure-fee", decline.reference);
        match self
            .collect_fee(&card, FeeKind::PaymentFailure, decline.amount, &fee_reference, "Declined payment fee")
            .await?
        {
            Some(tx) => Ok(DeclineVerification::FeeCharged(tx)),
            None => Ok(DeclineVerification::NotCharged("fee not collected".to_string())),
        }
    }

    fn spawn_success_fee(&self, card: Card, payment: Transaction) {
        let this = self.clone();
        self.scheduler.spawn("success_fee_collection", async move {
            let fee_reference = format!("{}-success-fee", payment.reference);
            this.collect_fee(&card, FeeKind::PaymentSuccess, payment.amount, &fee_reference, "Card payment fee")
                .await?;
            Ok(())
        });
    }

    /// Charge one of our fees on a card
    ///
    /// The fee is recorded as pending under `fee_reference` before the
    /// provider withdrawal, then settled or failed with the withdrawal's
    /// outcome. Returns `None` when the fee is zero, was already claimed, or
    /// the provider refused the withdrawal.
    async fn collect_fee(
        &self,
        card: &Card,
        kind: FeeKind,
        base_amount: Decimal,
        fee_reference: &str,
        description: &str,
    ) -> Result<Option<Transaction>, EngineError> {
        if self.store.transaction_by_reference(fee_reference).await.is_some() {
            debug!(reference = %fee_reference, "Fee already collected");
            return Ok(None);
        }

        let context = FeeContext::load(self.store.as_ref(), card.company_id, 1).await;
        let fee = self
            .fees
            .calculate(card.company_id, base_amount, &card.currency, kind, &context);
        if fee.final_fee <= Decimal::ZERO {
            return Ok(None);
        }

        let pending = card_movement(card, TransactionCategory::Fee, TransactionType::Debit, fee.final_fee, fee_reference)
            .with_status(TransactionStatus::Pending)
            .describe(format!("{}: {}", description, fee.breakdown.join("; ")));
        if let Recorded::Duplicate(_) = self.store.insert_transaction(pending).await? {
            debug!(reference = %fee_reference, "Fee already claimed");
            return Ok(None);
        }

        let result = match self.provider.withdraw(&card.external_id, fee.final_fee).await {
            Ok(result) => result,
            Err(e) => {
                self.store
                    .finalize_transaction(fee_reference, TransactionStatus::Failed)
                    .await?;
                return Err(e);
            }
        };
        if !result.success {
            warn!(
                card_id = %card.id,
                reference = %fee_reference,
                fee = %fee.final_fee,
                message = %result.message,
                "Provider refused fee withdrawal"
            );
            self.store
                .finalize_transaction(fee_reference, TransactionStatus::Failed)
                .await?;
            return Ok(None);
        }

        let tx = self
            .store
            .finalize_card_transaction(fee_reference, TransactionStatus::Success, -fee.final_fee)
            .await?;
        info!(card_id = %card.id, reference = %fee_reference, fee = %fee.final_fee, kind = %kind, "Fee collected");
        Ok(Some(tx))
    }

    fn notify_in_background(
        &self,
        customer_id: CustomerId,
        title: &'static str,
        text: String,
        reference: Option<String>,
    ) {
        let notifier = Arc::clone(&self.notifier);
        let store = Arc::clone(&self.store);
        self.scheduler.spawn("customer_notification", async move {
            let linked = match &reference {
                Some(reference) => store.transaction_by_reference(reference).await,
                None => None,
            };
            notifier.notify(customer_id, title, &text, linked.as_ref()).await
        });
    }
}

/// Successful movement on `card` with owner links filled in
fn card_movement(
    card: &Card,
    category: TransactionCategory,
    tx_type: TransactionType,
    amount: Decimal,
    reference: &str,
) -> NewTransaction {
    NewTransaction::new(
        category,
        tx_type,
        TransactionStatus::Success,
        amount,
        card.currency.clone(),
        reference,
    )
    .for_card(card.id)
    .for_owner(Some(card.customer_id), Some(card.company_id))
}

fn describe_transaction(event: &TransactionEvent) -> String {
    event.description.clone().unwrap_or_else(|| {
        let kind = match event.kind {
            ProviderTransactionKind::Authorization => "Payment",
            ProviderTransactionKind::Settlement => "Settlement",
            ProviderTransactionKind::Decline => "Declined payment",
            ProviderTransactionKind::Refund => "Refund",
            ProviderTransactionKind::Reversal => "Reversal",
            ProviderTransactionKind::CrossBorder => "Cross-border fee",
            ProviderTransactionKind::Funding => "Card funding",
            ProviderTransactionKind::Withdrawal => "Card withdrawal",
        };
        format!("{} at {}", kind, event.merchant_name())
    })
}

fn last_four(card: &Card) -> String {
    match card.masked_pan.as_deref() {
        Some(pan) if pan.len() >= 4 && pan.is_ascii() => pan[pan.len() - 4..].to_string(),
        _ => "****".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn event(kind: ProviderTransactionKind, description: Option<&str>) -> TransactionEvent {
        TransactionEvent {
            reference: "r".to_string(),
            card_id: "c".to_string(),
            amount: Decimal::new(100, 0),
            fee: None,
            currency: "USD".to_string(),
            kind,
            mode: None,
            status: None,
            merchant: None,
            description: description.map(str::to_string),
        }
    }

    #[rstest]
    #[case(ProviderTransactionKind::Authorization, None, "Payment at unknown merchant")]
    #[case(ProviderTransactionKind::CrossBorder, None, "Cross-border fee at unknown merchant")]
    #[case(ProviderTransactionKind::Funding, Some("Top-up"), "Top-up")]
    fn test_describe_transaction(
        #[case] kind: ProviderTransactionKind,
        #[case] description: Option<&str>,
        #[case] expected: &str,
    ) {
        assert_eq!(describe_transaction(&event(kind, description)), expected);
    }

    #[test]
    fn test_default_decline_constants() {
        let config = ReconciliationConfig::default();
        assert_eq!(config.provider_decline_fee, Decimal::new(30, 2));
        assert_eq!(config.decline_fee_tolerance, Decimal::new(5, 2));
        assert_eq!(config.decline_verification_delay, Duration::from_secs(30));
    }
}

//! Card issuance orchestrator
//!
//! Drives one issuance attempt through its state machine:
//!
//! ```text
//! Initiated ─► FundsReserved ─► ProviderRequested ─► WebhookReceived ─► Completed
//!     │              │                  │                   │
//!     └─► Failed     └─► Refunded       ├─► Refunded        ├─► Refunded
//!                                       ├─► Failed          └─► Failed
//!                                       └─► Completed (recovered)
//! ```
//!
//! # Recovery policy
//!
//! The pivot is whether the provider call's transport succeeded:
//!
//! - **Transport never succeeded** (or the provider rejected the request, or
//!   confirmed failure by webhook): nothing was delivered, so the reservation
//!   is refunded in full and the attempt ends `Refunded`.
//! - **Transport succeeded** but the outcome is unknown (webhook timeout,
//!   shutdown) or the local commit failed: the provider may have delivered
//!   the card, so funds are kept. The orchestrator first checks whether a card
//!   already exists for the reference (idempotent recovery). Otherwise the
//!   attempt ends `Failed` with funds retained, the pending transaction stays
//!   open for a late webhook, and the decision is logged for manual audit.
//!
//! Errors that happen before funds are reserved are returned as `Err`; every
//! later failure is converted into a terminal [`IssuanceOutcome`].

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::correlator::{WaitOutcome, WebhookCorrelator};
use super::enrollment::EnrollmentService;
use super::fees::{FeeContext, FeeEngine, FeeKind, FeeResult};
use super::traits::{CardProvider, CardSpec, IssuanceCommit, LedgerStore, Notifier};
use crate::types::webhook::{CardCreatedEvent, CardCreationFailedEvent};
use crate::types::{
    Card, CardBrand, Company, Customer, CustomerId, EngineError, IssuanceConfirmation,
    NewTransaction, Recorded, Transaction, TransactionCategory, TransactionStatus, TransactionType, Wallet,
};

/// Default time to wait for the creation webhook
pub const DEFAULT_WEBHOOK_TIMEOUT: Duration = Duration::from_secs(600);

/// Stage of an issuance attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssuanceState {
    Initiated,
    FundsReserved,
    ProviderRequested,
    WebhookReceived,
    Completed,
    Failed,
    Refunded,
}

impl IssuanceState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            IssuanceState::Completed | IssuanceState::Failed | IssuanceState::Refunded
        )
    }

    pub fn can_transition_to(self, next: IssuanceState) -> bool {
        use IssuanceState::*;
        matches!(
            (self, next),
            (Initiated, FundsReserved)
                | (Initiated, Failed)
                | (FundsReserved, ProviderRequested)
                | (FundsReserved, Refunded)
                | (FundsReserved, Failed)
                | (ProviderRequested, WebhookReceived)
                | (ProviderRequested, Completed)
                | (ProviderRequested, Refunded)
                | (ProviderRequested, Failed)
                | (WebhookReceived, Completed)
                | (WebhookReceived, Refunded)
                | (WebhookReceived, Failed)
        )
    }
}

impl fmt::Display for IssuanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            IssuanceState::Initiated => "INITIATED",
            IssuanceState::FundsReserved => "FUNDS_RESERVED",
            IssuanceState::ProviderRequested => "PROVIDER_REQUESTED",
            IssuanceState::WebhookReceived => "WEBHOOK_RECEIVED",
            IssuanceState::Completed => "COMPLETED",
            IssuanceState::Failed => "FAILED",
            IssuanceState::Refunded => "REFUNDED",
        };
        f.write_str(s)
    }
}

/// What happened to the reserved funds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FundsDisposition {
    /// Spent on the issued card
    Committed,
    /// Returned to the wallet
    Refunded,
    /// Kept pending verification of an uncertain provider outcome
    Retained,
}

/// Request to issue a virtual card
#[derive(Debug, Clone, PartialEq)]
pub struct IssueCardRequest {
    pub customer_id: CustomerId,
    pub currency: String,
    pub brand: CardBrand,
    /// Balance loaded onto the card, in major units
    pub initial_balance: Decimal,
    /// Client reference; generated when absent
    pub reference: Option<String>,
}

/// Everything gathered before funds are touched
#[derive(Debug, Clone)]
pub struct IssuanceContext {
    pub reference: String,
    pub customer: Customer,
    pub company: Company,
    pub wallet: Wallet,
    pub provider_customer_id: String,
    pub fee: FeeResult,
    pub initial_balance: Decimal,
    pub brand: CardBrand,
    pub currency: String,
}

impl IssuanceContext {
    /// Amount reserved from the wallet
    pub fn total(&self) -> Result<Decimal, EngineError> {
        self.initial_balance
            .checked_add(self.fee.final_fee)
            .ok_or_else(|| EngineError::arithmetic_overflow("issuance total"))
    }
}

/// Terminal result of an issuance attempt
#[derive(Debug, Clone, PartialEq)]
pub struct IssuanceOutcome {
    pub reference: String,
    pub state: IssuanceState,
    /// Every state the attempt passed through, in order
    pub history: Vec<IssuanceState>,
    pub card: Option<Card>,
    pub funds: FundsDisposition,
    pub fee: Decimal,
    pub total_charged: Decimal,
    /// Whether the provider call's transport succeeded
    pub transport_succeeded: bool,
    /// Error that ended the attempt, if any
    pub error: Option<EngineError>,
    pub explanation: String,
}

impl IssuanceOutcome {
    pub fn is_completed(&self) -> bool {
        self.state == IssuanceState::Completed
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IssuanceConfig {
    pub webhook_timeout: Duration,
}

impl Default for IssuanceConfig {
    fn default() -> Self {
        Self {
            webhook_timeout: DEFAULT_WEBHOOK_TIMEOUT,
        }
    }
}

/// Tracks the state machine for one attempt
#[derive(Debug)]
struct Progress {
    reference: String,
    history: Vec<IssuanceState>,
}

impl Progress {
    fn new(reference: &str) -> Self {
        Self {
            reference: reference.to_string(),
            history: vec![IssuanceState::Initiated],
        }
    }

    fn current(&self) -> IssuanceState {
        self.history
            .last()
            .copied()
            .unwrap_or(IssuanceState::Initiated)
    }

    fn advance(&mut self, next: IssuanceState) -> Result<(), EngineError> {
        let current = self.current();
        if !current.can_transition_to(next) {
            return Err(EngineError::validation(format!(
                "issuance {} cannot move from {} to {}",
                self.reference, current, next
            )));
        }
        info!(reference = %self.reference, from = %current, to = %next, "Issuance state changed");
        self.history.push(next);
        Ok(())
    }
}

/// Reverse an issuance reservation exactly once
///
/// Marks the pending issuance transaction `FAILED`, records a refund
/// transaction keyed `<reference>-refund` and credits the wallet. Returns the
/// refund transaction when this call performed the refund, `None` when the
/// issuance was already refunded.
///
/// # Errors
///
/// Fails without refunding when the issuance has already completed.
pub(crate) async fn refund_issuance(
    store: &dyn LedgerStore,
    reference: &str,
    reason: &str,
) -> Result<Option<Transaction>, EngineError> {
    let issuance = store.finalize_transaction(reference, TransactionStatus::Failed).await?;
    let wallet_id = issuance
        .wallet_id
        .ok_or_else(|| EngineError::persistence(format!("issuance {} has no wallet", reference)))?;
    let amount = issuance
        .amount
        .checked_add(issuance.fee_amount)
        .ok_or_else(|| EngineError::arithmetic_overflow("issuance refund"))?;

    let refund_reference = format!("{}-refund", reference);
    let refund = NewTransaction::new(
        TransactionCategory::Refund,
        TransactionType::Credit,
        TransactionStatus::Success,
        amount,
        issuance.currency.clone(),
        refund_reference.clone(),
    )
    .for_wallet(wallet_id)
    .for_owner(issuance.customer_id, issuance.company_id)
    .describe(format!("Refund of card issuance {}: {}", reference, reason));

    let recorded = store.insert_transaction(refund).await?;
    if !recorded.is_inserted() {
        return Ok(None);
    }

    store.refund(wallet_id, amount, &refund_reference, reason).await?;
    info!(reference = %reference, wallet_id = %wallet_id, amount = %amount, reason = %reason, "Issuance refunded");
    Ok(Some(recorded.into_inner()))
}

/// Drives card issuance end to end
#[derive(Clone)]
pub struct CardIssuanceOrchestrator {
    store: Arc<dyn LedgerStore>,
    provider: Arc<dyn CardProvider>,
    correlator: Arc<WebhookCorrelator>,
    fees: Arc<FeeEngine>,
    notifier: Arc<dyn Notifier>,
    enrollment: EnrollmentService,
    config: IssuanceConfig,
}

impl CardIssuanceOrchestrator {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        provider: Arc<dyn CardProvider>,
        correlator: Arc<WebhookCorrelator>,
        fees: Arc<FeeEngine>,
        notifier: Arc<dyn Notifier>,
        config: IssuanceConfig,
    ) -> Self {
        let enrollment = EnrollmentService::new(Arc::clone(&store), Arc::clone(&provider));
        Self {
            store,
            provider,
            correlator,
            fees,
            notifier,
            enrollment,
            config,
        }
    }

    /// Issue a card
    ///
    /// # Returns
    ///
    /// - `Err` when the attempt failed before any funds moved (validation,
    ///   KYC, reference already in use, insufficient funds, correlator
    ///   unavailable). Insufficient funds leaves the claimed issuance
    ///   transaction `CANCELLED`.
    /// - `Ok(outcome)` once funds were reserved; the outcome's state tells
    ///   whether the card was issued, refunded or left pending verification
    pub async fn issue(&self, request: IssueCardRequest) -> Result<IssuanceOutcome, EngineError> {
        let reference = request
            .reference
            .clone()
            .unwrap_or_else(|| format!("card-{}", Uuid::new_v4()));
        let mut progress = Progress::new(&reference);

        // Re-submitted request for an issuance that already completed
        if let Some(card) = self.store.card_by_reference(&reference).await {
            info!(reference = %reference, card_id = %card.id, "Issuance already completed");
            return Ok(self.completed_outcome(progress, card, None, true, "card already issued"));
        }

        let context = self.prepare(&request, reference.clone()).await?;
        let total = context.total()?;

        let pending_tx = NewTransaction::new(
            TransactionCategory::Issuance,
            TransactionType::Debit,
            TransactionStatus::Pending,
            context.initial_balance,
            context.currency.clone(),
            reference.clone(),
        )
        .with_fee(context.fee.final_fee)
        .for_wallet(context.wallet.id)
        .for_owner(Some(context.customer.id), Some(context.company.id))
        .describe(format!("Virtual {} card issuance", context.brand));

        // Claim the reference before any funds move; a concurrent attempt
        // with the same reference stops here untouched
        if let Recorded::Duplicate(_) = self.store.insert_transaction(pending_tx).await? {
            return Err(EngineError::validation(format!(
                "reference {} is already in use",
                reference
            )));
        }

        // FUNDS_RESERVED
        if let Err(e) = self
            .store
            .reserve(context.wallet.id, total, "card issuance", &reference)
            .await
        {
            self.store
                .finalize_transaction(&reference, TransactionStatus::Cancelled)
                .await?;
            return Err(e);
        }
        progress.advance(IssuanceState::FundsReserved)?;

        // Register before calling the provider so an early webhook is not lost
        let pending_wait = match self.correlator.register(&reference) {
            Ok(wait) => wait,
            Err(e) => {
                refund_issuance(self.store.as_ref(), &reference, "webhook correlator unavailable").await?;
                return Err(e);
            }
        };

        // PROVIDER_REQUESTED
        progress.advance(IssuanceState::ProviderRequested)?;
        let spec = CardSpec {
            provider_customer_id: context.provider_customer_id.clone(),
            currency: context.currency.clone(),
            brand: context.brand,
            amount: context.initial_balance,
            reference: reference.clone(),
        };

        match self.provider.create_card(spec).await {
            Ok(ack) => {
                info!(reference = %reference, provider_reference = %ack.reference, "Card creation accepted by provider");
            }
            Err(e) => {
                drop(pending_wait);
                warn!(reference = %reference, error = %e, "Card creation request failed, refunding");
                // A rejection means the provider answered
                let transport_succeeded = matches!(e, EngineError::ProviderRejected { .. });
                return self
                    .refund_outcome(progress, &context, transport_succeeded, e, "the provider could not start card creation")
                    .await;
            }
        }

        // WEBHOOK_RECEIVED
        match pending_wait.wait(self.config.webhook_timeout).await {
            WaitOutcome::Delivered(IssuanceConfirmation::Created(event)) => {
                progress.advance(IssuanceState::WebhookReceived)?;
                self.complete(progress, &context, event).await
            }
            WaitOutcome::Delivered(IssuanceConfirmation::Failed(event)) => {
                progress.advance(IssuanceState::WebhookReceived)?;
                self.creation_failed(progress, &context, event).await
            }
            WaitOutcome::TimedOut => {
                let waited_ms = self.config.webhook_timeout.as_millis() as u64;
                self.recover_uncertain(progress, &context, EngineError::provider_timeout(&reference, waited_ms))
                    .await
            }
            WaitOutcome::ShuttingDown | WaitOutcome::Cancelled => {
                self.recover_uncertain(progress, &context, EngineError::ShuttingDown).await
            }
        }
    }

    /// INITIATED: load parties, check KYC, enroll, price the card
    async fn prepare(&self, request: &IssueCardRequest, reference: String) -> Result<IssuanceContext, EngineError> {
        if request.initial_balance <= Decimal::ZERO {
            return Err(EngineError::validation(format!(
                "initial balance must be positive, got {}",
                request.initial_balance
            )));
        }

        let customer = self
            .store
            .customer(request.customer_id)
            .await
            .ok_or_else(|| EngineError::not_found("customer", request.customer_id))?;
        let company = self
            .store
            .company(customer.company_id)
            .await
            .ok_or_else(|| EngineError::not_found("company", customer.company_id))?;
        let wallet = self
            .store
            .company_wallet(company.id, &request.currency)
            .await
            .ok_or_else(|| EngineError::not_found("wallet", format!("{}/{}", company.id, request.currency)))?;

        let provider_customer_id = self.enrollment.ensure_enrolled(&customer).await?;

        let fee_context = FeeContext::load(self.store.as_ref(), company.id, 1).await;
        let fee = self.fees.calculate(
            company.id,
            request.initial_balance,
            &request.currency,
            FeeKind::Issuance,
            &fee_context,
        );

        info!(
            reference = %reference,
            customer_id = %customer.id,
            company_id = %company.id,
            initial_balance = %request.initial_balance,
            fee = %fee.final_fee,
            fee_fallback = fee.fallback,
            "Issuance context prepared"
        );

        Ok(IssuanceContext {
            reference,
            customer,
            company,
            wallet,
            provider_customer_id,
            fee,
            initial_balance: request.initial_balance,
            brand: request.brand,
            currency: request.currency.to_ascii_uppercase(),
        })
    }

    /// COMPLETED: persist the card for a confirmed creation
    async fn complete(
        &self,
        mut progress: Progress,
        context: &IssuanceContext,
        event: CardCreatedEvent,
    ) -> Result<IssuanceOutcome, EngineError> {
        let commit = IssuanceCommit {
            reference: context.reference.clone(),
            external_id: event.card.id.clone(),
            brand: event.card.brand.unwrap_or(context.brand),
            masked_pan: event.card.masked_pan.clone(),
        };

        match self.store.commit_issuance(commit).await {
            Ok(recorded) => {
                let card = recorded.into_inner();
                progress.advance(IssuanceState::Completed)?;
                self.announce_card(context, &card).await;
                Ok(self.completed_outcome(progress, card, Some(context), true, "card issued"))
            }
            Err(e) => {
                error!(reference = %context.reference, error = %e, "Failed to persist confirmed card");
                let cause = match e {
                    EngineError::DataPersistence { .. } => e,
                    other => EngineError::persistence(other.to_string()),
                };
                self.recover_uncertain(progress, context, cause).await
            }
        }
    }

    async fn creation_failed(
        &self,
        progress: Progress,
        context: &IssuanceContext,
        event: CardCreationFailedEvent,
    ) -> Result<IssuanceOutcome, EngineError> {
        let reason = event
            .reason
            .unwrap_or_else(|| "card creation failed at provider".to_string());
        warn!(reference = %context.reference, reason = %reason, "Provider reported card creation failure");
        self.refund_outcome(
            progress,
            context,
            true,
            EngineError::provider_rejected("create_card", reason),
            "the provider reported that card creation failed",
        )
        .await
    }

    /// Refund path for attempts the provider never fulfilled
    async fn refund_outcome(
        &self,
        mut progress: Progress,
        context: &IssuanceContext,
        transport_succeeded: bool,
        cause: EngineError,
        explanation: &str,
    ) -> Result<IssuanceOutcome, EngineError> {
        let total = context.total()?;
        match refund_issuance(self.store.as_ref(), &context.reference, explanation).await {
            Ok(_) => {
                progress.advance(IssuanceState::Refunded)?;
                self.notify_customer(
                    context.customer.id,
                    "Card issuance failed",
                    &format!("Your card could not be issued: {}. {} {} was refunded.", explanation, total, context.currency),
                    None,
                )
                .await;

                Ok(IssuanceOutcome {
                    reference: context.reference.clone(),
                    state: IssuanceState::Refunded,
                    history: progress.history,
                    card: None,
                    funds: FundsDisposition::Refunded,
                    fee: context.fee.final_fee,
                    total_charged: Decimal::ZERO,
                    transport_succeeded,
                    error: Some(cause),
                    explanation: explanation.to_string(),
                })
            }
            Err(refund_error) => {
                // A card appeared for the reference meanwhile
                if let Some(card) = self.store.card_by_reference(&context.reference).await {
                    progress.advance(IssuanceState::Completed)?;
                    return Ok(self.completed_outcome(progress, card, Some(context), transport_succeeded, "card issued"));
                }
                error!(
                    reference = %context.reference,
                    error = %refund_error,
                    cause = %cause,
                    "Refund of failed issuance did not complete"
                );
                Err(refund_error)
            }
        }
    }

    /// Keep-funds path for attempts whose provider outcome is unknown
    async fn recover_uncertain(
        &self,
        mut progress: Progress,
        context: &IssuanceContext,
        cause: EngineError,
    ) -> Result<IssuanceOutcome, EngineError> {
        // Is the operation actually done?
        if let Some(card) = self.store.card_by_reference(&context.reference).await {
            info!(reference = %context.reference, card_id = %card.id, "Card found for reference during recovery");
            progress.advance(IssuanceState::Completed)?;
            self.announce_card(context, &card).await;
            return Ok(self.completed_outcome(progress, card, Some(context), true, "card issued (recovered)"));
        }

        if let Some(tx) = self.store.transaction_by_reference(&context.reference).await {
            if tx.status == TransactionStatus::Failed {
                // The failure webhook arrived after the wait and was refunded by reconciliation
                progress.advance(IssuanceState::Refunded)?;
                return Ok(IssuanceOutcome {
                    reference: context.reference.clone(),
                    state: IssuanceState::Refunded,
                    history: progress.history,
                    card: None,
                    funds: FundsDisposition::Refunded,
                    fee: context.fee.final_fee,
                    total_charged: Decimal::ZERO,
                    transport_succeeded: true,
                    error: Some(cause),
                    explanation: "the provider reported that card creation failed".to_string(),
                });
            }
        }

        let total = context.total()?;
        warn!(
            reference = %context.reference,
            customer_id = %context.customer.id,
            company_id = %context.company.id,
            wallet_id = %context.wallet.id,
            amount = %total,
            cause = %cause,
            "Keeping reserved funds: provider may have completed card creation; manual audit required"
        );
        progress.advance(IssuanceState::Failed)?;

        self.notify_customer(
            context.customer.id,
            "Card issuance pending verification",
            "We could not confirm your card with the issuer yet. Your funds are held and the card will appear once confirmed.",
            None,
        )
        .await;
        self.email_company(
            context,
            "Card issuance requires review",
            &format!(
                "Issuance {} for customer {} could not be confirmed ({}). {} {} are held pending verification.",
                context.reference, context.customer.id, cause, total, context.currency
            ),
        )
        .await;

        Ok(IssuanceOutcome {
            reference: context.reference.clone(),
            state: IssuanceState::Failed,
            history: progress.history,
            card: None,
            funds: FundsDisposition::Retained,
            fee: context.fee.final_fee,
            total_charged: total,
            transport_succeeded: true,
            explanation: format!("provider outcome unknown ({}); funds retained pending verification", cause),
            error: Some(cause),
        })
    }

    fn completed_outcome(
        &self,
        progress: Progress,
        card: Card,
        context: Option<&IssuanceContext>,
        transport_succeeded: bool,
        explanation: &str,
    ) -> IssuanceOutcome {
        let fee = context.map(|c| c.fee.final_fee).unwrap_or(Decimal::ZERO);
        let total_charged = context
            .and_then(|c| c.total().ok())
            .unwrap_or(card.balance);

        IssuanceOutcome {
            reference: progress.reference.clone(),
            state: IssuanceState::Completed,
            history: progress.history,
            card: Some(card),
            funds: FundsDisposition::Committed,
            fee,
            total_charged,
            transport_succeeded,
            error: None,
            explanation: explanation.to_string(),
        }
    }

    async fn announce_card(&self, context: &IssuanceContext, card: &Card) {
        let tx = self.store.transaction_by_reference(&context.reference).await;
        self.notify_customer(
            context.customer.id,
            "Card issued",
            &format!(
                "Your {} virtual card is ready with a balance of {} {}.",
                card.brand, card.balance, card.currency
            ),
            tx.as_ref(),
        )
        .await;
        self.email_company(
            context,
            "New virtual card issued",
            &format!(
                "A {} card was issued to {} ({}). Charged {} {} including a {} fee.",
                card.brand,
                context.customer.full_name(),
                context.customer.email,
                context.total().unwrap_or(card.balance),
                context.currency,
                context.fee.final_fee
            ),
        )
        .await;
    }

    async fn notify_customer(&self, customer_id: CustomerId, title: &str, text: &str, tx: Option<&Transaction>) {
        if let Err(e) = self.notifier.notify(customer_id, title, text, tx).await {
            warn!(customer_id = %customer_id, error = %e, "Customer notification failed");
        }
    }

    async fn email_company(&self, context: &IssuanceContext, subject: &str, body: &str) {
        if let Err(e) = self.notifier.email_company(context.company.id, subject, body).await {
            warn!(company_id = %context.company.id, error = %e, "Company e-mail failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(IssuanceState::Initiated, IssuanceState::FundsReserved, true)]
    #[case(IssuanceState::FundsReserved, IssuanceState::ProviderRequested, true)]
    #[case(IssuanceState::ProviderRequested, IssuanceState::WebhookReceived, true)]
    #[case(IssuanceState::WebhookReceived, IssuanceState::Completed, true)]
    #[case(IssuanceState::ProviderRequested, IssuanceState::Completed, true)]
    #[case(IssuanceState::Initiated, IssuanceState::ProviderRequested, false)]
    #[case(IssuanceState::Initiated, IssuanceState::Refunded, false)]
    #[case(IssuanceState::Completed, IssuanceState::Refunded, false)]
    #[case(IssuanceState::Refunded, IssuanceState::Completed, false)]
    #[case(IssuanceState::Failed, IssuanceState::Completed, false)]
    fn test_state_transitions(#[case] from: IssuanceState, #[case] to: IssuanceState, #[case] allowed: bool) {
        assert_eq!(from.can_transition_to(to), allowed);
    }

    #[test]
    fn test_terminal_states_have_no_exits() {
        use IssuanceState::*;
        let all = [Initiated, FundsReserved, ProviderRequested, WebhookReceived, Completed, Failed, Refunded];
        for state in all.iter().filter(|s| s.is_terminal()) {
            assert!(all.iter().all(|next| !state.can_transition_to(*next)));
        }
    }

    #[test]
    fn test_progress_rejects_illegal_transition() {
        let mut progress = Progress::new("iss-1");
        progress.advance(IssuanceState::FundsReserved).unwrap();

        assert!(progress.advance(IssuanceState::Completed).is_err());
        assert_eq!(progress.current(), IssuanceState::FundsReserved);
    }
}

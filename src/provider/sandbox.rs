//! Offline provider
//!
//! `SandboxProvider` keeps card balances in memory and emits the webhooks a
//! real provider would send onto an unbounded channel. It drives the replay
//! CLI and the integration tests.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use rust_decimal::Decimal;
use tokio::sync::mpsc;
use tracing::debug;

use crate::core::traits::{CardProvider, CardSpec, CreateCardAck, EnrollmentRequest, ProviderResult};
use crate::types::webhook::{to_minor_units, CardCreatedEvent, CardCreationFailedEvent, ProviderCard};
use crate::types::{EngineError, ProviderEvent};

/// What the sandbox does with a card creation request
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum CreationBehaviour {
    /// Accept and later send `issuing.created.successful`
    #[default]
    Succeed,
    /// Accept and later send `issuing.created.failed` with the reason
    Fail(String),
    /// Accept and never send a webhook
    Silent,
    /// Fail the call at the transport layer
    TransportError,
    /// Answer with a business rejection
    Reject(String),
}

#[derive(Debug, Clone, PartialEq)]
struct SandboxCard {
    balance: Decimal,
    terminated: bool,
}

/// In-memory card issuing provider
#[derive(Debug, Clone)]
pub struct SandboxProvider {
    events: mpsc::UnboundedSender<ProviderEvent>,
    cards: Arc<DashMap<String, SandboxCard>>,
    behaviour: Arc<Mutex<CreationBehaviour>>,
    webhook_delay: Duration,
    withdrawals: Arc<Mutex<Vec<(String, Decimal)>>>,
    counter: Arc<AtomicU64>,
}

impl SandboxProvider {
    /// Create a provider and the receiving end of its webhook stream
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ProviderEvent>) {
        let (events, receiver) = mpsc::unbounded_channel();
        let provider = Self {
            events,
            cards: Arc::new(DashMap::new()),
            behaviour: Arc::new(Mutex::new(CreationBehaviour::Succeed)),
            webhook_delay: Duration::ZERO,
            withdrawals: Arc::new(Mutex::new(Vec::new())),
            counter: Arc::new(AtomicU64::new(1)),
        };
        (provider, receiver)
    }

    /// Deliver creation webhooks after `delay`
    pub fn with_webhook_delay(mut self, delay: Duration) -> Self {
        self.webhook_delay = delay;
        self
    }

    pub fn set_behaviour(&self, behaviour: CreationBehaviour) {
        if let Ok(mut current) = self.behaviour.lock() {
            *current = behaviour;
        }
    }

    /// Make a card known to the provider
    pub fn register_card(&self, external_id: &str, balance: Decimal) {
        self.cards.insert(
            external_id.to_string(),
            SandboxCard {
                balance,
                terminated: false,
            },
        );
    }

    /// Overwrite the provider-side balance
    pub fn set_balance(&self, external_id: &str, balance: Decimal) {
        if let Some(mut card) = self.cards.get_mut(external_id) {
            card.balance = balance;
        }
    }

    pub fn balance_of(&self, external_id: &str) -> Option<Decimal> {
        self.cards.get(external_id).map(|card| card.balance)
    }

    /// Withdrawals accepted so far, in order
    pub fn withdrawals(&self) -> Vec<(String, Decimal)> {
        self.withdrawals
            .lock()
            .map(|withdrawals| withdrawals.clone())
            .unwrap_or_default()
    }

    fn behaviour(&self) -> CreationBehaviour {
        self.behaviour
            .lock()
            .map(|behaviour| behaviour.clone())
            .unwrap_or(CreationBehaviour::Succeed)
    }

    fn emit(&self, event: ProviderEvent) {
        if self.webhook_delay.is_zero() {
            // A closed channel only means nobody listens any more
            let _ = self.events.send(event);
            return;
        }

        let events = self.events.clone();
        let delay = self.webhook_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = events.send(event);
        });
    }
}

#[async_trait]
impl CardProvider for SandboxProvider {
    async fn create_card(&self, spec: CardSpec) -> Result<CreateCardAck, EngineError> {
        let behaviour = self.behaviour();
        match &behaviour {
            CreationBehaviour::TransportError => {
                return Err(EngineError::provider_transport("create_card", "connection refused"))
            }
            CreationBehaviour::Reject(message) => {
                return Err(EngineError::provider_rejected("create_card", message.clone()))
            }
            _ => {}
        }

        let external_id = format!("sandbox-card-{}", self.counter.fetch_add(1, Ordering::Relaxed));
        debug!(reference = %spec.reference, external_id = %external_id, "Sandbox card creation accepted");

        match behaviour {
            CreationBehaviour::Succeed => {
                self.register_card(&external_id, spec.amount);
                self.emit(ProviderEvent::CardCreated(CardCreatedEvent {
                    reference: spec.reference.clone(),
                    card: ProviderCard {
                        id: external_id,
                        masked_pan: Some("5399********0001".to_string()),
                        currency: spec.currency.clone(),
                        balance: Some(to_minor_units(spec.amount)),
                        brand: Some(spec.brand),
                        status: Some("ACTIVE".to_string()),
                        name: None,
                    },
                }));
            }
            CreationBehaviour::Fail(reason) => {
                self.emit(ProviderEvent::CardCreationFailed(CardCreationFailedEvent {
                    reference: spec.reference.clone(),
                    reason: Some(reason),
                }));
            }
            _ => {}
        }

        Ok(CreateCardAck {
            reference: spec.reference,
        })
    }

    async fn withdraw(&self, external_card_id: &str, amount: Decimal) -> Result<ProviderResult, EngineError> {
        let Some(mut card) = self.cards.get_mut(external_card_id) else {
            return Ok(ProviderResult {
                success: false,
                message: format!("card {} not found", external_card_id),
                reference: None,
            });
        };

        if card.terminated || card.balance < amount {
            return Ok(ProviderResult {
                success: false,
                message: "insufficient card balance".to_string(),
                reference: None,
            });
        }

        card.balance -= amount;
        drop(card);

        if let Ok(mut withdrawals) = self.withdrawals.lock() {
            withdrawals.push((external_card_id.to_string(), amount));
        }

        Ok(ProviderResult {
            success: true,
            message: "withdrawal successful".to_string(),
            reference: Some(format!("sandbox-wd-{}", self.counter.fetch_add(1, Ordering::Relaxed))),
        })
    }

    async fn terminate(&self, external_card_id: &str) -> Result<ProviderResult, EngineError> {
        let Some(mut card) = self.cards.get_mut(external_card_id) else {
            return Ok(ProviderResult {
                success: false,
                message: format!("card {} not found", external_card_id),
                reference: None,
            });
        };
        card.terminated = true;
        card.balance = Decimal::ZERO;

        Ok(ProviderResult {
            success: true,
            message: "card terminated".to_string(),
            reference: None,
        })
    }

    async fn get_balance(&self, external_card_id: &str) -> Result<Decimal, EngineError> {
        self.balance_of(external_card_id)
            .ok_or_else(|| EngineError::provider_rejected("get_balance", format!("card {} not found", external_card_id)))
    }

    async fn enroll_customer(&self, request: EnrollmentRequest) -> Result<String, EngineError> {
        debug!(email = %request.email, country = %request.country, "Sandbox customer enrolled");
        Ok(format!("sandbox-customer-{}", self.counter.fetch_add(1, Ordering::Relaxed)))
    }
}

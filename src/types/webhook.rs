//! Provider webhook payloads
//!
//! Inbound events are JSON objects tagged by their `event` field. Every event
//! carries a `reference` that the reconciliation engine uses as its
//! idempotency key. Amounts arrive in minor units (cents) and are converted
//! with [`to_major_units`].

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::CardBrand;

/// Convert a provider amount in minor units to major units
pub fn to_major_units(minor: Decimal) -> Decimal {
    (minor / Decimal::ONE_HUNDRED).normalize()
}

/// Convert an amount in major units to the provider's minor units
pub fn to_minor_units(major: Decimal) -> Decimal {
    (major * Decimal::ONE_HUNDRED).round()
}

/// Inbound provider event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum ProviderEvent {
    #[serde(rename = "issuing.transaction")]
    Transaction(TransactionEvent),

    #[serde(rename = "issuing.created.successful")]
    CardCreated(CardCreatedEvent),

    #[serde(rename = "issuing.created.failed")]
    CardCreationFailed(CardCreationFailedEvent),

    #[serde(rename = "issuing.terminated")]
    CardTerminated(CardTerminatedEvent),

    #[serde(rename = "issuing.charge")]
    Charge(ChargeEvent),
}

impl ProviderEvent {
    /// Idempotency key of the event
    pub fn reference(&self) -> &str {
        match self {
            ProviderEvent::Transaction(e) => &e.reference,
            ProviderEvent::CardCreated(e) => &e.reference,
            ProviderEvent::CardCreationFailed(e) => &e.reference,
            ProviderEvent::CardTerminated(e) => &e.reference,
            ProviderEvent::Charge(e) => &e.reference,
        }
    }

    /// Wire name of the event
    pub fn name(&self) -> &'static str {
        match self {
            ProviderEvent::Transaction(_) => "issuing.transaction",
            ProviderEvent::CardCreated(_) => "issuing.created.successful",
            ProviderEvent::CardCreationFailed(_) => "issuing.created.failed",
            ProviderEvent::CardTerminated(_) => "issuing.terminated",
            ProviderEvent::Charge(_) => "issuing.charge",
        }
    }

    /// Parse a raw webhook body
    pub fn from_slice(body: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(body)
    }
}

/// Sub-type of an `issuing.transaction` event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProviderTransactionKind {
    #[serde(rename = "AUTHORIZATION")]
    Authorization,
    #[serde(rename = "SETTLEMENT")]
    Settlement,
    #[serde(rename = "DECLINE", alias = "DECLINED")]
    Decline,
    #[serde(rename = "REFUND")]
    Refund,
    #[serde(rename = "REVERSAL")]
    Reversal,
    #[serde(rename = "CROSS-BORDER", alias = "CROSS_BORDER")]
    CrossBorder,
    #[serde(rename = "FUNDING")]
    Funding,
    #[serde(rename = "WITHDRAWAL")]
    Withdrawal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TransactionMode {
    Debit,
    Credit,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Merchant {
    pub name: Option<String>,
    pub city: Option<String>,
    pub country: Option<String>,
}

/// `issuing.transaction` payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionEvent {
    pub reference: String,

    /// Provider card id
    pub card_id: String,

    /// Amount in minor units
    pub amount: Decimal,

    /// Fee charged by the provider, in minor units
    #[serde(default)]
    pub fee: Option<Decimal>,

    #[serde(default = "default_currency")]
    pub currency: String,

    #[serde(rename = "type")]
    pub kind: ProviderTransactionKind,

    #[serde(default)]
    pub mode: Option<TransactionMode>,

    /// Provider status string (`SUCCESS`, `FAILED`, ...)
    #[serde(default)]
    pub status: Option<String>,

    #[serde(default)]
    pub merchant: Option<Merchant>,

    #[serde(default)]
    pub description: Option<String>,
}

impl TransactionEvent {
    /// Whether the provider reported the movement as successful
    ///
    /// A missing status is treated as success; declines are never successful.
    pub fn is_successful(&self) -> bool {
        if self.kind == ProviderTransactionKind::Decline {
            return false;
        }
        match self.status.as_deref() {
            None => true,
            Some(status) => matches!(
                status.to_ascii_uppercase().as_str(),
                "SUCCESS" | "SUCCESSFUL" | "APPROVED" | "COMPLETED"
            ),
        }
    }

    pub fn amount_major(&self) -> Decimal {
        to_major_units(self.amount)
    }

    pub fn fee_major(&self) -> Decimal {
        self.fee.map(to_major_units).unwrap_or(Decimal::ZERO)
    }

    pub fn merchant_name(&self) -> &str {
        self.merchant
            .as_ref()
            .and_then(|m| m.name.as_deref())
            .unwrap_or("unknown merchant")
    }
}

/// Card data delivered with `issuing.created.successful`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderCard {
    /// Provider card id
    pub id: String,

    #[serde(default)]
    pub masked_pan: Option<String>,

    #[serde(default = "default_currency")]
    pub currency: String,

    /// Balance in minor units
    #[serde(default)]
    pub balance: Option<Decimal>,

    #[serde(default)]
    pub brand: Option<CardBrand>,

    #[serde(default)]
    pub status: Option<String>,

    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CardCreatedEvent {
    pub reference: String,
    pub card: ProviderCard,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CardCreationFailedEvent {
    pub reference: String,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CardTerminatedEvent {
    pub reference: String,
    pub card_id: String,
    #[serde(default)]
    pub reason: Option<String>,
}

/// `issuing.charge` payload: a fee the provider debited from the card
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChargeEvent {
    pub reference: String,
    pub card_id: String,

    /// Amount in minor units
    pub amount: Decimal,

    #[serde(default = "default_currency")]
    pub currency: String,

    #[serde(default)]
    pub description: Option<String>,
}

impl ChargeEvent {
    pub fn amount_major(&self) -> Decimal {
        to_major_units(self.amount)
    }
}

/// Result of an issuance as confirmed by the provider
#[derive(Debug, Clone, PartialEq)]
pub enum IssuanceConfirmation {
    Created(CardCreatedEvent),
    Failed(CardCreationFailedEvent),
}

fn default_currency() -> String {
    "USD".to_string()
}

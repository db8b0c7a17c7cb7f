//! Card-related types for the card issuance engine
//!
//! A [`Card`] is the local mirror of a virtual card provisioned by the
//! provider. Its balance is a cache of the provider's authoritative balance.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::{CompanyId, CustomerId};

/// Local card identifier
pub type CardId = Uuid;

/// Card lifecycle status
///
/// Transitions are monotonic except for the `Active` ↔ `Frozen` toggle.
/// `Terminated` is absorbing: no transition leaves it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CardStatus {
    Active,
    Frozen,
    Terminated,
}

impl CardStatus {
    /// Whether the status machine allows moving from `self` to `next`
    ///
    /// Re-applying the current status is allowed so that redelivered
    /// provider events stay idempotent.
    pub fn can_transition_to(self, next: CardStatus) -> bool {
        use CardStatus::*;
        match (self, next) {
            (Terminated, Terminated) => true,
            (Terminated, _) => false,
            (_, Terminated) => true,
            (Active, Frozen) | (Frozen, Active) => true,
            (current, next) => current == next,
        }
    }
}

impl fmt::Display for CardStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CardStatus::Active => "ACTIVE",
            CardStatus::Frozen => "FROZEN",
            CardStatus::Terminated => "TERMINATED",
        };
        f.write_str(s)
    }
}

impl FromStr for CardStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ACTIVE" => Ok(CardStatus::Active),
            "FROZEN" | "DISABLED" => Ok(CardStatus::Frozen),
            "TERMINATED" => Ok(CardStatus::Terminated),
            other => Err(format!("Invalid card status '{}'", other)),
        }
    }
}

/// Card network brand
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CardBrand {
    Visa,
    Mastercard,
}

impl fmt::Display for CardBrand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CardBrand::Visa => f.write_str("VISA"),
            CardBrand::Mastercard => f.write_str("MASTERCARD"),
        }
    }
}

/// Provisioned virtual card
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Card {
    /// Local identifier
    pub id: CardId,

    /// Owning customer
    pub customer_id: CustomerId,

    /// Owning company
    pub company_id: CompanyId,

    /// Provider's card identifier
    pub external_id: String,

    /// Reference of the issuance request that created this card
    pub client_reference: String,

    /// Lifecycle status
    pub status: CardStatus,

    /// Cached balance, mirrors the provider balance
    pub balance: Decimal,

    /// ISO 4217 currency code
    pub currency: String,

    /// Card network
    pub brand: CardBrand,

    /// Masked PAN as reported by the provider (if any)
    pub masked_pan: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Card {
    /// Whether the card can still move funds
    pub fn is_terminated(&self) -> bool {
        self.status == CardStatus::Terminated
    }
}

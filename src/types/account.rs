//! Wallet, customer and company types
//!
//! Wallets hold company funds per currency. Customers and companies are read
//! models owned by the surrounding application; the engine only reads them
//! (plus the provider customer id written back after enrollment).

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Wallet identifier
pub type WalletId = Uuid;

/// Customer identifier
pub type CustomerId = Uuid;

/// Company identifier
pub type CompanyId = Uuid;

/// Company-owned pool of funds in one currency
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Wallet {
    pub id: WalletId,
    pub company_id: CompanyId,
    pub currency: String,
    pub balance: Decimal,
    pub active: bool,
}

impl Wallet {
    /// Create an active wallet with the given opening balance
    pub fn new(company_id: CompanyId, currency: impl Into<String>, balance: Decimal) -> Self {
        Wallet {
            id: Uuid::new_v4(),
            company_id,
            currency: currency.into(),
            balance,
            active: true,
        }
    }
}

/// Pricing tier of a company, drives the tier discount
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompanyTier {
    #[default]
    Standard,
    Premium,
    Enterprise,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Company {
    pub id: CompanyId,
    pub name: String,
    pub email: String,
    pub tier: CompanyTier,
}

/// Identity document kinds in local vocabulary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IdentityDocumentType {
    Passport,
    NationalId,
    DriversLicense,
    VoterCard,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IdentityDocument {
    pub doc_type: IdentityDocumentType,
    pub number: String,
    pub image_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Address {
    pub street: String,
    pub city: String,
    pub state: String,
    pub postal_code: String,
    /// Country as entered locally (name or code)
    pub country: String,
}

/// Card holder, with the fields required for provider KYC
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Customer {
    pub id: CustomerId,
    pub company_id: CompanyId,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: String,
    /// Country as entered locally (name or code)
    pub country: String,
    pub date_of_birth: Option<NaiveDate>,
    pub identity: Option<IdentityDocument>,
    pub address: Option<Address>,
    /// Customer id at the provider, set once enrolled
    pub provider_customer_id: Option<String>,
}

impl Customer {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name.trim(), self.last_name.trim())
    }
}

//! CSV format handling for seed records and card output
//!
//! This module centralizes all CSV format concerns, providing:
//! - SeedRow structure for deserialization
//! - Conversion from seed rows to domain records
//! - Card output serialization
//!
//! All functions are pure (no I/O) for easy testing.
//!
//! # Seed format
//!
//! Columns: `kind,id,parent,currency,balance,external_id,detail`
//!
//! | kind | id | parent | other columns |
//! |------|----|--------|---------------|
//! | `company` | company uuid | | `detail` = tier (optional) |
//! | `wallet` | wallet uuid | company uuid | `currency`, `balance` |
//! | `customer` | customer uuid | company uuid | `detail` = provider customer id (optional) |
//! | `card` | card uuid | customer uuid | `currency`, `balance`, `external_id`, `detail` = status |
//! | `issuance` | client reference | customer uuid | `currency`, `balance` = initial balance |

use std::io::Write;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::Deserialize;
use uuid::Uuid;

use crate::types::{Card, CardId, CardStatus, Company, CompanyTier, Customer, CustomerId, EngineError, Wallet};

/// CSV row of a seed file
///
/// Every column but `kind` and `id` is optional; which ones are required
/// depends on the kind.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct SeedRow {
    pub kind: String,
    pub id: String,
    pub parent: Option<String>,
    pub currency: Option<String>,
    pub balance: Option<String>,
    pub external_id: Option<String>,
    pub detail: Option<String>,
}

/// A seeded entity
#[derive(Debug, Clone, PartialEq)]
pub enum SeedRecord {
    Company(Company),
    Wallet(Wallet),
    Customer(Customer),
    /// Existing card; the company is taken from its customer
    Card {
        card_id: CardId,
        customer_id: CustomerId,
        external_id: String,
        currency: String,
        balance: Decimal,
        status: CardStatus,
    },
    /// Issuance awaiting its creation webhook
    Issuance {
        reference: String,
        customer_id: CustomerId,
        currency: String,
        amount: Decimal,
    },
}

fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn required<'a>(value: &'a Option<String>, column: &str, row: &SeedRow) -> Result<&'a str, String> {
    present(value).ok_or_else(|| format!("{} '{}' requires column '{}'", row.kind, row.id, column))
}

fn parse_uuid(value: &str, column: &str) -> Result<Uuid, String> {
    Uuid::parse_str(value.trim()).map_err(|_| format!("Invalid {} '{}'", column, value))
}

fn parse_amount(value: &str) -> Result<Decimal, String> {
    Decimal::from_str(value.trim()).map_err(|_| format!("Invalid amount '{}'", value))
}

fn parse_tier(value: Option<&str>) -> Result<CompanyTier, String> {
    match value.map(str::to_ascii_lowercase).as_deref() {
        None | Some("standard") => Ok(CompanyTier::Standard),
        Some("premium") => Ok(CompanyTier::Premium),
        Some("enterprise") => Ok(CompanyTier::Enterprise),
        Some(other) => Err(format!("Invalid company tier '{}'", other)),
    }
}

/// Convert a SeedRow to a SeedRecord
///
/// # Arguments
///
/// * `row` - The deserialized CSV row
///
/// # Returns
///
/// Result containing either:
/// - Ok(SeedRecord) - Successfully converted record
/// - Err(String) - Error message describing the conversion failure
pub fn convert_seed_row(row: SeedRow) -> Result<SeedRecord, String> {
    match row.kind.trim().to_lowercase().as_str() {
        "company" => {
            let id = parse_uuid(&row.id, "id")?;
            Ok(SeedRecord::Company(Company {
                id,
                name: format!("Company {}", &row.id[..8.min(row.id.len())]),
                email: format!("billing+{}@example.com", id.simple()),
                tier: parse_tier(present(&row.detail))?,
            }))
        }
        "wallet" => {
            let company_id = parse_uuid(required(&row.parent, "parent", &row)?, "parent")?;
            let currency = required(&row.currency, "currency", &row)?.to_ascii_uppercase();
            let balance = parse_amount(required(&row.balance, "balance", &row)?)?;
            let mut wallet = Wallet::new(company_id, currency, balance);
            wallet.id = parse_uuid(&row.id, "id")?;
            Ok(SeedRecord::Wallet(wallet))
        }
        "customer" => {
            let id = parse_uuid(&row.id, "id")?;
            let company_id = parse_uuid(required(&row.parent, "parent", &row)?, "parent")?;
            Ok(SeedRecord::Customer(Customer {
                id,
                company_id,
                first_name: "Seeded".to_string(),
                last_name: "Customer".to_string(),
                email: format!("{}@example.com", id.simple()),
                phone: String::new(),
                country: String::new(),
                date_of_birth: None,
                identity: None,
                address: None,
                provider_customer_id: present(&row.detail).map(str::to_string),
            }))
        }
        "card" => Ok(SeedRecord::Card {
            card_id: parse_uuid(&row.id, "id")?,
            customer_id: parse_uuid(required(&row.parent, "parent", &row)?, "parent")?,
            external_id: required(&row.external_id, "external_id", &row)?.to_string(),
            currency: required(&row.currency, "currency", &row)?.to_ascii_uppercase(),
            balance: parse_amount(required(&row.balance, "balance", &row)?)?,
            status: match present(&row.detail) {
                Some(status) => status.parse()?,
                None => CardStatus::Active,
            },
        }),
        "issuance" => {
            let amount = parse_amount(required(&row.balance, "balance", &row)?)?;
            if amount <= Decimal::ZERO {
                return Err(format!("issuance '{}' requires a positive balance", row.id));
            }
            Ok(SeedRecord::Issuance {
                reference: row.id.trim().to_string(),
                customer_id: parse_uuid(required(&row.parent, "parent", &row)?, "parent")?,
                currency: required(&row.currency, "currency", &row)?.to_ascii_uppercase(),
                amount,
            })
        }
        _ => Err(format!("Invalid seed kind: '{}' for id {}", row.kind, row.id)),
    }
}

/// Write card states to CSV format
///
/// Writes cards in CSV format with columns: external_id, reference, status,
/// balance, currency. Cards are sorted by external id for deterministic
/// output.
///
/// # Arguments
///
/// * `cards` - Slice of cards to write
/// * `output` - Mutable reference to a writer for outputting CSV
pub fn write_cards_csv(cards: &[Card], output: &mut dyn Write) -> Result<(), EngineError> {
    let mut writer = csv::Writer::from_writer(output);

    writer.write_record(["external_id", "reference", "status", "balance", "currency"])?;

    let mut sorted_cards = cards.to_vec();
    sorted_cards.sort_by(|a, b| a.external_id.cmp(&b.external_id));

    for card in sorted_cards {
        writer.write_record(&[
            card.external_id.clone(),
            card.client_reference.clone(),
            card.status.to_string(),
            format!("{:.2}", card.balance),
            card.currency.clone(),
        ])?;
    }

    writer.flush()?;
    Ok(())
}

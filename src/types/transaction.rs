//! Transaction-related types for the card issuance engine
//!
//! Transactions are immutable ledger entries; only `Pending` ones may later be
//! promoted. Every balance mutation additionally writes a
//! [`BalanceTransactionRecord`] capturing the before/after pair.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::{CardId, CompanyId, CustomerId, WalletId};

/// Transaction identifier
pub type TransactionId = Uuid;

/// Business category of a funds movement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionCategory {
    /// Card issuance (initial balance + issuance fee)
    Issuance,
    /// Card top-up
    Funding,
    /// Funds moved off the card
    Withdrawal,
    /// Merchant authorization / settlement
    Payment,
    /// Fee charged by us or by the provider
    Fee,
    /// Funds returned to a card or wallet
    Refund,
    /// Declined payment attempt
    Decline,
    /// Balance correction after reconciliation
    Adjustment,
    /// Card termination
    Termination,
}

/// Direction of the movement relative to the affected balance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionType {
    Credit,
    Debit,
}

/// Transaction status
///
/// `Pending` is the only non-terminal status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    Pending,
    Success,
    Failed,
    Cancelled,
}

impl TransactionStatus {
    pub fn is_terminal(self) -> bool {
        self != TransactionStatus::Pending
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TransactionStatus::Pending => "PENDING",
            TransactionStatus::Success => "SUCCESS",
            TransactionStatus::Failed => "FAILED",
            TransactionStatus::Cancelled => "CANCELLED",
        };
        f.write_str(s)
    }
}

/// Immutable ledger entry
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Transaction {
    pub id: TransactionId,
    pub category: TransactionCategory,
    pub tx_type: TransactionType,
    pub status: TransactionStatus,

    /// Principal amount (always non-negative)
    pub amount: Decimal,

    /// Fee charged alongside the principal
    pub fee_amount: Decimal,

    pub currency: String,

    /// Idempotency key, globally unique
    pub reference: String,

    pub card_id: Option<CardId>,
    pub wallet_id: Option<WalletId>,
    pub customer_id: Option<CustomerId>,
    pub company_id: Option<CompanyId>,

    pub description: String,
    pub created_at: DateTime<Utc>,
}

/// Insert request for a transaction
///
/// The ledger assigns the id and timestamp.
#[derive(Debug, Clone, PartialEq)]
pub struct NewTransaction {
    pub category: TransactionCategory,
    pub tx_type: TransactionType,
    pub status: TransactionStatus,
    pub amount: Decimal,
    pub fee_amount: Decimal,
    pub currency: String,
    pub reference: String,
    pub card_id: Option<CardId>,
    pub wallet_id: Option<WalletId>,
    pub customer_id: Option<CustomerId>,
    pub company_id: Option<CompanyId>,
    pub description: String,
}

impl NewTransaction {
    /// Start a transaction with the mandatory fields, everything else empty
    pub fn new(
        category: TransactionCategory,
        tx_type: TransactionType,
        status: TransactionStatus,
        amount: Decimal,
        currency: impl Into<String>,
        reference: impl Into<String>,
    ) -> Self {
        Self {
            category,
            tx_type,
            status,
            amount,
            fee_amount: Decimal::ZERO,
            currency: currency.into(),
            reference: reference.into(),
            card_id: None,
            wallet_id: None,
            customer_id: None,
            company_id: None,
            description: String::new(),
        }
    }

    pub fn with_status(mut self, status: TransactionStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_fee(mut self, fee_amount: Decimal) -> Self {
        self.fee_amount = fee_amount;
        self
    }

    pub fn for_card(mut self, card_id: CardId) -> Self {
        self.card_id = Some(card_id);
        self
    }

    pub fn for_wallet(mut self, wallet_id: WalletId) -> Self {
        self.wallet_id = Some(wallet_id);
        self
    }

    pub fn for_owner(mut self, customer_id: Option<CustomerId>, company_id: Option<CompanyId>) -> Self {
        self.customer_id = customer_id;
        self.company_id = company_id;
        self
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Materialize into a stored transaction
    pub fn into_transaction(self, created_at: DateTime<Utc>) -> Transaction {
        Transaction {
            id: Uuid::new_v4(),
            category: self.category,
            tx_type: self.tx_type,
            status: self.status,
            amount: self.amount,
            fee_amount: self.fee_amount,
            currency: self.currency,
            reference: self.reference,
            card_id: self.card_id,
            wallet_id: self.wallet_id,
            customer_id: self.customer_id,
            company_id: self.company_id,
            description: self.description,
            created_at,
        }
    }
}

/// Subject whose balance changed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "kind", content = "id", rename_all = "lowercase")]
pub enum BalanceSubject {
    Wallet(WalletId),
    Card(CardId),
}

/// Write-once audit entry for a single balance mutation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BalanceTransactionRecord {
    pub id: Uuid,
    pub subject: BalanceSubject,

    /// Reference of the transaction that caused the change
    pub transaction_reference: String,

    pub balance_before: Decimal,
    pub balance_after: Decimal,

    /// Signed change (`balance_after - balance_before`)
    pub amount_changed: Decimal,

    pub reason: String,
    pub created_at: DateTime<Utc>,
}

impl BalanceTransactionRecord {
    pub fn new(
        subject: BalanceSubject,
        transaction_reference: impl Into<String>,
        balance_before: Decimal,
        balance_after: Decimal,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            subject,
            transaction_reference: transaction_reference.into(),
            balance_before,
            balance_after,
            amount_changed: balance_after - balance_before,
            reason: reason.into(),
            created_at: Utc::now(),
        }
    }
}

/// Result of an idempotent insert keyed on reference
#[derive(Debug, Clone, PartialEq)]
pub enum Recorded<T> {
    /// The entity was created by this call
    Inserted(T),
    /// An entity with the same reference already existed; nothing changed
    Duplicate(T),
}

impl<T> Recorded<T> {
    pub fn is_inserted(&self) -> bool {
        matches!(self, Recorded::Inserted(_))
    }

    pub fn into_inner(self) -> T {
        match self {
            Recorded::Inserted(value) | Recorded::Duplicate(value) => value,
        }
    }

    pub fn get(&self) -> &T {
        match self {
            Recorded::Inserted(value) | Recorded::Duplicate(value) => value,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_sets_links() {
        let card = Uuid::new_v4();
        let tx = NewTransaction::new(
            TransactionCategory::Funding,
            TransactionType::Credit,
            TransactionStatus::Success,
            Decimal::new(1000, 2),
            "USD",
            "ref-1",
        )
        .for_card(card)
        .with_fee(Decimal::new(10, 2))
        .describe("top-up")
        .into_transaction(Utc::now());

        assert_eq!(tx.card_id, Some(card));
        assert_eq!(tx.fee_amount, Decimal::new(10, 2));
        assert_eq!(tx.description, "top-up");
        assert_eq!(tx.reference, "ref-1");
    }

    #[test]
    fn test_record_computes_signed_change() {
        let record = BalanceTransactionRecord::new(
            BalanceSubject::Wallet(Uuid::new_v4()),
            "ref",
            Decimal::new(10000, 2),
            Decimal::new(4900, 2),
            "reservation",
        );
        assert_eq!(record.amount_changed, Decimal::new(-5100, 2));
    }

    #[test]
    fn test_only_pending_is_non_terminal() {
        assert!(!TransactionStatus::Pending.is_terminal());
        assert!(TransactionStatus::Success.is_terminal());
        assert!(TransactionStatus::Failed.is_terminal());
        assert!(TransactionStatus::Cancelled.is_terminal());
    }
}

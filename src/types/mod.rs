//! Types module
//!
//! Contains core data structures used throughout the engine.
//! This module organizes types into logical submodules:
//! - `account`: wallets, customers, companies
//! - `card`: cards and their status machine
//! - `transaction`: ledger entries and balance audit records
//! - `webhook`: inbound provider events
//! - `error`: error types for the engine

pub mod account;
pub mod card;
pub mod error;
pub mod transaction;
pub mod webhook;

pub use account::{
    Address, Company, CompanyId, CompanyTier, Customer, CustomerId, IdentityDocument,
    IdentityDocumentType, Wallet, WalletId,
};
pub use card::{Card, CardBrand, CardId, CardStatus};
pub use error::{EngineError, ErrorKind};
pub use transaction::{
    BalanceSubject, BalanceTransactionRecord, NewTransaction, Recorded, Transaction,
    TransactionCategory, TransactionId, TransactionStatus, TransactionType,
};
pub use webhook::{IssuanceConfirmation, ProviderEvent};

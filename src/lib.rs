//! Card Issuance Engine Library
//! # Overview
//!
//! This library orchestrates virtual card issuance against a card provider
//! (Maplerad) and reconciles the provider's asynchronous webhooks into a
//! local ledger of wallets, cards and transactions.
//!
//! # Architecture
//!
//! The system is organized into several key components:
//!
//! - [`types`] - Core data types (Card, Wallet, Transaction, ProviderEvent, etc.)
//! - [`cli`] - CLI arguments parsing
//! - [`config`] - Environment-driven engine configuration
//! - [`core`] - Business logic components:
//!   - [`core::issuance`] - Issuance state machine with refund and recovery
//!   - [`core::reconciliation`] - Webhook reconciliation and fee collection
//!   - [`core::correlator`] - Wakes issuances waiting on their creation webhook
//!   - [`core::balance_sync`] - Local versus provider balance correction
//!   - [`core::fees`] - Tiered fee calculation
//!   - [`core::ledger`] - In-memory ledger store
//! - [`provider`] - Maplerad HTTP client and an in-process sandbox
//! - [`io`] - Seed, webhook event and card CSV handling
//! - [`replay`] - Offline webhook replay
//!
//! # Issuance Lifecycle
//!
//! An issuance reserves the card balance plus fee from the company wallet,
//! asks the provider for a card, and waits for the provider's creation
//! webhook. The webhook commits the card; a rejection or a failure webhook
//! refunds the wallet. When the outcome is unknown (timeout, shutdown) the
//! funds stay reserved until a late webhook or an operator settles them.
//!
//! # Card States
//!
//! Cards move from `ACTIVE` to `FROZEN` and back, and to `TERMINATED`,
//! which is final.

// Module declarations
pub mod cli;
pub mod config;
pub mod core;
pub mod io;
pub mod provider;
pub mod replay;
pub mod types;

pub use config::EngineConfig;
pub use core::{CardIssuanceOrchestrator, InMemoryLedger, WebhookReconciler};
pub use io::write_cards_csv;
pub use replay::{run_replay, ReplayOptions, ReplaySummary};
pub use types::{
    Card, CardId, CardStatus, EngineError, ProviderEvent, Transaction, TransactionCategory,
    TransactionStatus, TransactionType,
};

//! Core business logic module
//!
//! This module contains the issuance and reconciliation pipeline:
//! - `traits` - Ledger, provider and notifier abstractions
//! - `ledger` - In-memory ledger store with per-entity locking
//! - `correlator` - Webhook correlation between issuance and provider callbacks
//! - `fees` - Tiered fee calculation with discounts
//! - `enrollment` - KYC validation and provider enrollment
//! - `issuance` - Card issuance state machine and recovery policy
//! - `reconciliation` - Inbound webhook handling
//! - `balance_sync` - Provider balance synchronization
//! - `scheduler` - Tracked background tasks
//! - `notifier` - Notifier implementations

pub mod balance_sync;
pub mod correlator;
pub mod enrollment;
pub mod fees;
pub mod issuance;
pub mod ledger;
pub mod notifier;
pub mod reconciliation;
pub mod scheduler;
pub mod traits;

pub use balance_sync::{BalanceSyncConfig, BalanceSyncService, BulkSyncReport, SyncReport};
pub use correlator::{CorrelatorConfig, PendingWait, WaitOutcome, WebhookCorrelator};
pub use enrollment::EnrollmentService;
pub use fees::{FeeEngine, FeeKind, FeeResult, FeeSchedule};
pub use issuance::{
    CardIssuanceOrchestrator, FundsDisposition, IssuanceConfig, IssuanceOutcome, IssuanceState,
    IssueCardRequest,
};
pub use ledger::InMemoryLedger;
pub use notifier::{RecordingNotifier, TracingNotifier};
pub use reconciliation::{ReconcileOutcome, ReconciliationConfig, WebhookReconciler};
pub use scheduler::TaskScheduler;

//! Core traits for the ledger, the provider, and outbound notifications
//!
//! These are the seams of the engine: every service is constructed with
//! `Arc<dyn Trait>` collaborators so that the in-memory ledger, the sandbox
//! provider, or test doubles can be substituted freely.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::types::{
    BalanceTransactionRecord, Card, CardBrand, CardId, CardStatus, Company, CompanyId, Customer,
    CustomerId, EngineError, NewTransaction, Recorded, Transaction, TransactionStatus, Wallet,
    WalletId,
};

/// Provisional debit against a wallet
#[derive(Debug, Clone, PartialEq)]
pub struct Reservation {
    pub wallet_id: WalletId,
    pub amount: Decimal,
    pub reference: String,
    pub balance_before: Decimal,
    pub balance_after: Decimal,
}

/// Everything needed to materialize a card for a pending issuance
#[derive(Debug, Clone, PartialEq)]
pub struct IssuanceCommit {
    /// Client reference of the pending issuance transaction
    pub reference: String,
    pub external_id: String,
    pub brand: CardBrand,
    pub masked_pan: Option<String>,
}

/// Funds ledger over company wallets
///
/// Reservation is the critical section for wallet mutation: implementations
/// must check and debit under a per-wallet lock so that no caller observes a
/// partially applied reservation.
#[async_trait]
pub trait WalletLedger: Send + Sync {
    /// Debit `amount` if the balance covers it, otherwise fail without effect
    async fn reserve(
        &self,
        wallet_id: WalletId,
        amount: Decimal,
        reason: &str,
        reference: &str,
    ) -> Result<Reservation, EngineError>;

    /// Credit `amount` back to the wallet
    async fn refund(
        &self,
        wallet_id: WalletId,
        amount: Decimal,
        reference: &str,
        reason: &str,
    ) -> Result<(), EngineError>;

    /// Overwrite the wallet balance
    async fn update_balance(&self, wallet_id: WalletId, new_balance: Decimal) -> Result<(), EngineError>;

    async fn get_balance(&self, wallet_id: WalletId) -> Result<Decimal, EngineError>;

    async fn wallet(&self, wallet_id: WalletId) -> Option<Wallet>;

    /// Active wallet of a company in the given currency
    async fn company_wallet(&self, company_id: CompanyId, currency: &str) -> Option<Wallet>;
}

/// Card storage
#[async_trait]
pub trait CardStore: Send + Sync {
    async fn card(&self, card_id: CardId) -> Option<Card>;

    async fn card_by_external_id(&self, external_id: &str) -> Option<Card>;

    async fn card_by_reference(&self, reference: &str) -> Option<Card>;

    async fn cards_for_customer(&self, customer_id: CustomerId) -> Vec<Card>;

    async fn all_cards(&self) -> Vec<Card>;

    /// Cards ever issued for a company
    async fn cards_issued(&self, company_id: CompanyId) -> usize;

    /// Create the card for a pending issuance
    ///
    /// Idempotent on the client reference: when a card already exists for it
    /// the existing card is returned as a duplicate and nothing changes.
    async fn commit_issuance(&self, commit: IssuanceCommit) -> Result<Recorded<Card>, EngineError>;

    /// Apply a status change, enforcing the status machine
    async fn update_card_status(&self, card_id: CardId, status: CardStatus) -> Result<Card, EngineError>;

    /// Overwrite the card balance, writing an audit record
    async fn set_card_balance(
        &self,
        card_id: CardId,
        new_balance: Decimal,
        reference: &str,
        reason: &str,
    ) -> Result<BalanceTransactionRecord, EngineError>;

    async fn customer(&self, customer_id: CustomerId) -> Option<Customer>;

    async fn company(&self, company_id: CompanyId) -> Option<Company>;

    async fn set_provider_customer_id(
        &self,
        customer_id: CustomerId,
        provider_customer_id: &str,
    ) -> Result<(), EngineError>;
}

/// Transaction log with reference-keyed idempotency
#[async_trait]
pub trait TransactionLog: Send + Sync {
    /// Insert unless a transaction with the same reference exists
    async fn insert_transaction(&self, tx: NewTransaction) -> Result<Recorded<Transaction>, EngineError>;

    /// Record a card movement and apply `delta` to the card balance
    ///
    /// The insert, the balance change and its audit record happen as one
    /// unit; a duplicate reference changes nothing.
    async fn apply_card_transaction(
        &self,
        tx: NewTransaction,
        delta: Decimal,
    ) -> Result<Recorded<Transaction>, EngineError>;

    async fn transaction_by_reference(&self, reference: &str) -> Option<Transaction>;

    /// Promote a pending transaction to a terminal status
    async fn finalize_transaction(
        &self,
        reference: &str,
        status: TransactionStatus,
    ) -> Result<Transaction, EngineError>;

    /// Promote a pending card movement, applying `delta` only on success
    ///
    /// The status change, the balance change and its audit record happen as
    /// one unit. A transaction already in `status` is returned unchanged.
    async fn finalize_card_transaction(
        &self,
        reference: &str,
        status: TransactionStatus,
        delta: Decimal,
    ) -> Result<Transaction, EngineError>;

    /// Record a balance correction while the card balance is still `expected`
    ///
    /// Returns `None` and changes nothing when the balance moved since the
    /// caller read it.
    async fn adjust_card_balance(
        &self,
        tx: NewTransaction,
        expected: Decimal,
        new_balance: Decimal,
    ) -> Result<Option<Transaction>, EngineError>;

    /// Zero the card balance and mark the card terminated as one unit
    ///
    /// The zeroing movement is recorded under `reference` as a `Termination`
    /// debit, or a credit when the balance was negative. Returns `None` when
    /// the card is already terminated or the reference is already recorded.
    async fn terminate_card(
        &self,
        card_id: CardId,
        reference: &str,
        description: &str,
    ) -> Result<Option<Transaction>, EngineError>;

    async fn transactions_for_card(&self, card_id: CardId) -> Vec<Transaction>;

    async fn balance_records(&self, reference: &str) -> Vec<BalanceTransactionRecord>;

    /// Sum of successful issuance and funding amounts since `since`
    async fn volume_since(&self, company_id: CompanyId, since: DateTime<Utc>) -> Decimal;
}

/// Combined data store consumed by the services
pub trait LedgerStore: WalletLedger + CardStore + TransactionLog {}

impl<T: WalletLedger + CardStore + TransactionLog> LedgerStore for T {}

/// Parameters for a card creation request
#[derive(Debug, Clone, PartialEq)]
pub struct CardSpec {
    pub provider_customer_id: String,
    pub currency: String,
    pub brand: CardBrand,
    /// Initial balance in major units
    pub amount: Decimal,
    /// Correlation reference echoed by the creation webhook
    pub reference: String,
}

/// Acknowledgement of an asynchronous card creation
#[derive(Debug, Clone, PartialEq)]
pub struct CreateCardAck {
    pub reference: String,
}

/// Business outcome of a synchronous provider call
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderResult {
    /// Provider-specific success indicator from the body
    pub success: bool,
    pub message: String,
    pub reference: Option<String>,
}

/// Customer data in provider vocabulary
#[derive(Debug, Clone, PartialEq)]
pub struct EnrollmentRequest {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone_country_code: String,
    pub phone_number: String,
    /// ISO 3166-1 alpha-2
    pub country: String,
    /// `DD-MM-YYYY`
    pub dob: String,
    /// Provider identity document type
    pub identity_type: String,
    pub identity_number: String,
    pub identity_image: Option<String>,
    pub street: String,
    pub city: String,
    pub state: String,
    pub postal_code: String,
}

/// External card-issuing provider
///
/// A successful call only means the transport succeeded; callers must inspect
/// [`ProviderResult::success`] for the business outcome.
#[async_trait]
pub trait CardProvider: Send + Sync {
    /// Start card creation; card data arrives later by webhook
    async fn create_card(&self, spec: CardSpec) -> Result<CreateCardAck, EngineError>;

    async fn withdraw(&self, external_card_id: &str, amount: Decimal) -> Result<ProviderResult, EngineError>;

    async fn terminate(&self, external_card_id: &str) -> Result<ProviderResult, EngineError>;

    /// Authoritative balance in major units
    async fn get_balance(&self, external_card_id: &str) -> Result<Decimal, EngineError>;

    /// Register a customer, returning the provider customer id
    async fn enroll_customer(&self, request: EnrollmentRequest) -> Result<String, EngineError>;
}

/// Outbound notifications, fire-and-forget
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(
        &self,
        customer_id: CustomerId,
        title: &str,
        text: &str,
        linked_transaction: Option<&Transaction>,
    ) -> Result<(), EngineError>;

    async fn email_company(&self, company_id: CompanyId, subject: &str, body: &str) -> Result<(), EngineError>;
}

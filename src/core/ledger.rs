//! In-memory ledger store
//!
//! `InMemoryLedger` implements [`WalletLedger`], [`CardStore`] and
//! [`TransactionLog`] on top of `DashMap`, the same fine-grained per-entity
//! locking the engine uses everywhere else.
//!
//! # Atomicity
//!
//! Each multi-step mutation runs while holding the `DashMap` entry of the
//! entity that serializes it:
//!
//! - wallet reservation/refund: the wallet entry (per-wallet lock)
//! - card movements: the transaction-reference entry, then the card entry
//! - issuance commit: the client-reference entry, then the transaction entry
//!
//! Guards are always taken in the order references → transactions → cards →
//! records, so concurrent operations cannot deadlock. No guard is ever held
//! across an `.await`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use rust_decimal::Decimal;
use tracing::warn;
use uuid::Uuid;

use super::traits::{CardStore, IssuanceCommit, Reservation, TransactionLog, WalletLedger};
use crate::types::{
    BalanceSubject, BalanceTransactionRecord, Card, CardId, CardStatus, Company, CompanyId,
    Customer, CustomerId, EngineError, NewTransaction, Recorded, Transaction,
    TransactionCategory, TransactionStatus, TransactionType, Wallet, WalletId,
};

/// Thread-safe in-memory implementation of the ledger store
#[derive(Debug, Default)]
pub struct InMemoryLedger {
    wallets: DashMap<WalletId, Wallet>,
    cards: DashMap<CardId, Card>,
    /// Client reference → card
    card_refs: DashMap<String, CardId>,
    /// Provider card id → card
    external_ids: DashMap<String, CardId>,
    /// Reference → transaction
    transactions: DashMap<String, Transaction>,
    /// Reference → audit records written for it
    records: DashMap<String, Vec<BalanceTransactionRecord>>,
    customers: DashMap<CustomerId, Customer>,
    companies: DashMap<CompanyId, Company>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_wallet(&self, wallet: Wallet) {
        self.wallets.insert(wallet.id, wallet);
    }

    pub fn insert_customer(&self, customer: Customer) {
        self.customers.insert(customer.id, customer);
    }

    pub fn insert_company(&self, company: Company) {
        self.companies.insert(company.id, company);
    }

    /// Seed an existing card (e.g. loaded from a snapshot)
    pub fn insert_card(&self, card: Card) {
        self.external_ids.insert(card.external_id.clone(), card.id);
        self.card_refs.insert(card.client_reference.clone(), card.id);
        self.cards.insert(card.id, card);
    }

    /// Number of stored transactions
    pub fn transaction_count(&self) -> usize {
        self.transactions.len()
    }

    /// All wallets, for reporting
    pub fn all_wallets(&self) -> Vec<Wallet> {
        self.wallets.iter().map(|entry| entry.value().clone()).collect()
    }

    fn push_record(&self, record: BalanceTransactionRecord) {
        self.records
            .entry(record.transaction_reference.clone())
            .or_default()
            .push(record);
    }
}

#[async_trait]
impl WalletLedger for InMemoryLedger {
    async fn reserve(
        &self,
        wallet_id: WalletId,
        amount: Decimal,
        reason: &str,
        reference: &str,
    ) -> Result<Reservation, EngineError> {
        if amount <= Decimal::ZERO {
            return Err(EngineError::validation(format!(
                "reservation amount must be positive, got {}",
                amount
            )));
        }

        let mut wallet = self
            .wallets
            .get_mut(&wallet_id)
            .ok_or_else(|| EngineError::not_found("wallet", wallet_id))?;

        if !wallet.active {
            return Err(EngineError::validation(format!("wallet {} is inactive", wallet_id)));
        }

        // Check and debit under the same entry lock
        if wallet.balance < amount {
            return Err(EngineError::insufficient_funds(wallet_id, wallet.balance, amount));
        }

        let balance_before = wallet.balance;
        let balance_after = balance_before
            .checked_sub(amount)
            .ok_or_else(|| EngineError::arithmetic_overflow("reserve"))?;
        wallet.balance = balance_after;

        self.push_record(BalanceTransactionRecord::new(
            BalanceSubject::Wallet(wallet_id),
            reference,
            balance_before,
            balance_after,
            reason,
        ));

        Ok(Reservation {
            wallet_id,
            amount,
            reference: reference.to_string(),
            balance_before,
            balance_after,
        })
    }

    async fn refund(
        &self,
        wallet_id: WalletId,
        amount: Decimal,
        reference: &str,
        reason: &str,
    ) -> Result<(), EngineError> {
        if amount <= Decimal::ZERO {
            return Err(EngineError::validation(format!(
                "refund amount must be positive, got {}",
                amount
            )));
        }

        let mut wallet = self
            .wallets
            .get_mut(&wallet_id)
            .ok_or_else(|| EngineError::not_found("wallet", wallet_id))?;

        let balance_before = wallet.balance;
        let balance_after = balance_before
            .checked_add(amount)
            .ok_or_else(|| EngineError::arithmetic_overflow("refund"))?;
        wallet.balance = balance_after;

        self.push_record(BalanceTransactionRecord::new(
            BalanceSubject::Wallet(wallet_id),
            reference,
            balance_before,
            balance_after,
            reason,
        ));
        Ok(())
    }

    async fn update_balance(&self, wallet_id: WalletId, new_balance: Decimal) -> Result<(), EngineError> {
        if new_balance < Decimal::ZERO {
            return Err(EngineError::validation("wallet balance cannot be negative"));
        }

        let mut wallet = self
            .wallets
            .get_mut(&wallet_id)
            .ok_or_else(|| EngineError::not_found("wallet", wallet_id))?;

        let balance_before = wallet.balance;
        wallet.balance = new_balance;

        self.push_record(BalanceTransactionRecord::new(
            BalanceSubject::Wallet(wallet_id),
            format!("wallet-update-{}", Uuid::new_v4()),
            balance_before,
            new_balance,
            "balance overwrite",
        ));
        Ok(())
    }

    async fn get_balance(&self, wallet_id: WalletId) -> Result<Decimal, EngineError> {
        self.wallets
            .get(&wallet_id)
            .map(|wallet| wallet.balance)
            .ok_or_else(|| EngineError::not_found("wallet", wallet_id))
    }

    async fn wallet(&self, wallet_id: WalletId) -> Option<Wallet> {
        self.wallets.get(&wallet_id).map(|wallet| wallet.clone())
    }

    async fn company_wallet(&self, company_id: CompanyId, currency: &str) -> Option<Wallet> {
        self.wallets
            .iter()
            .find(|entry| {
                let wallet = entry.value();
                wallet.company_id == company_id
                    && wallet.active
                    && wallet.currency.eq_ignore_ascii_case(currency)
            })
            .map(|entry| entry.value().clone())
    }
}

#[async_trait]
impl CardStore for InMemoryLedger {
    async fn card(&self, card_id: CardId) -> Option<Card> {
        self.cards.get(&card_id).map(|card| card.clone())
    }

    async fn card_by_external_id(&self, external_id: &str) -> Option<Card> {
        let card_id = *self.external_ids.get(external_id)?;
        self.card(card_id).await
    }

    async fn card_by_reference(&self, reference: &str) -> Option<Card> {
        let card_id = *self.card_refs.get(reference)?;
        self.card(card_id).await
    }

    async fn cards_for_customer(&self, customer_id: CustomerId) -> Vec<Card> {
        self.cards
            .iter()
            .filter(|entry| entry.value().customer_id == customer_id)
            .map(|entry| entry.value().clone())
            .collect()
    }

    async fn all_cards(&self) -> Vec<Card> {
        self.cards.iter().map(|entry| entry.value().clone()).collect()
    }

    async fn cards_issued(&self, company_id: CompanyId) -> usize {
        self.cards
            .iter()
            .filter(|entry| entry.value().company_id == company_id)
            .count()
    }

    async fn commit_issuance(&self, commit: IssuanceCommit) -> Result<Recorded<Card>, EngineError> {
        let slot = match self.card_refs.entry(commit.reference.clone()) {
            Entry::Occupied(existing) => {
                let card_id = *existing.get();
                drop(existing);
                return self
                    .cards
                    .get(&card_id)
                    .map(|card| Recorded::Duplicate(card.clone()))
                    .ok_or_else(|| EngineError::persistence(format!(
                        "reference {} points at missing card {}",
                        commit.reference, card_id
                    )));
            }
            Entry::Vacant(slot) => slot,
        };

        let mut tx = self
            .transactions
            .get_mut(&commit.reference)
            .ok_or_else(|| EngineError::not_found("issuance transaction", &commit.reference))?;

        if tx.category != TransactionCategory::Issuance {
            return Err(EngineError::validation(format!(
                "transaction {} is not an issuance",
                commit.reference
            )));
        }
        if tx.status != TransactionStatus::Pending {
            return Err(EngineError::validation(format!(
                "issuance {} is already closed as {}",
                commit.reference, tx.status
            )));
        }
        if self.external_ids.contains_key(&commit.external_id) {
            return Err(EngineError::persistence(format!(
                "provider card {} is already bound to another card",
                commit.external_id
            )));
        }

        let (customer_id, company_id) = match (tx.customer_id, tx.company_id) {
            (Some(customer), Some(company)) => (customer, company),
            _ => {
                return Err(EngineError::persistence(format!(
                    "issuance {} has no owner",
                    commit.reference
                )))
            }
        };

        let now = Utc::now();
        let card = Card {
            id: Uuid::new_v4(),
            customer_id,
            company_id,
            external_id: commit.external_id.clone(),
            client_reference: commit.reference.clone(),
            status: CardStatus::Active,
            balance: tx.amount,
            currency: tx.currency.clone(),
            brand: commit.brand,
            masked_pan: commit.masked_pan,
            created_at: now,
            updated_at: now,
        };

        tx.status = TransactionStatus::Success;
        tx.card_id = Some(card.id);
        drop(tx);

        self.external_ids.insert(card.external_id.clone(), card.id);
        self.cards.insert(card.id, card.clone());
        self.push_record(BalanceTransactionRecord::new(
            BalanceSubject::Card(card.id),
            &commit.reference,
            Decimal::ZERO,
            card.balance,
            "card issued",
        ));
        slot.insert(card.id);

        Ok(Recorded::Inserted(card))
    }

    async fn update_card_status(&self, card_id: CardId, status: CardStatus) -> Result<Card, EngineError> {
        let mut card = self
            .cards
            .get_mut(&card_id)
            .ok_or_else(|| EngineError::not_found("card", card_id))?;

        if !card.status.can_transition_to(status) {
            return Err(EngineError::invalid_transition(card_id, card.status, status));
        }
        if card.status != status {
            card.status = status;
            card.updated_at = Utc::now();
        }
        Ok(card.clone())
    }

    async fn set_card_balance(
        &self,
        card_id: CardId,
        new_balance: Decimal,
        reference: &str,
        reason: &str,
    ) -> Result<BalanceTransactionRecord, EngineError> {
        let mut card = self
            .cards
            .get_mut(&card_id)
            .ok_or_else(|| EngineError::not_found("card", card_id))?;

        if card.is_terminated() && !new_balance.is_zero() {
            return Err(EngineError::validation(format!(
                "card {} is terminated, its balance can only be zero",
                card_id
            )));
        }

        let record = BalanceTransactionRecord::new(
            BalanceSubject::Card(card_id),
            reference,
            card.balance,
            new_balance,
            reason,
        );
        card.balance = new_balance;
        card.updated_at = Utc::now();

        self.push_record(record.clone());
        Ok(record)
    }

    async fn customer(&self, customer_id: CustomerId) -> Option<Customer> {
        self.customers.get(&customer_id).map(|customer| customer.clone())
    }

    async fn company(&self, company_id: CompanyId) -> Option<Company> {
        self.companies.get(&company_id).map(|company| company.clone())
    }

    async fn set_provider_customer_id(
        &self,
        customer_id: CustomerId,
        provider_customer_id: &str,
    ) -> Result<(), EngineError> {
        let mut customer = self
            .customers
            .get_mut(&customer_id)
            .ok_or_else(|| EngineError::not_found("customer", customer_id))?;
        customer.provider_customer_id = Some(provider_customer_id.to_string());
        Ok(())
    }
}

#[async_trait]
impl TransactionLog for InMemoryLedger {
    async fn insert_transaction(&self, tx: NewTransaction) -> Result<Recorded<Transaction>, EngineError> {
        match self.transactions.entry(tx.reference.clone()) {
            Entry::Occupied(existing) => Ok(Recorded::Duplicate(existing.get().clone())),
            Entry::Vacant(slot) => {
                let stored = tx.into_transaction(Utc::now());
                slot.insert(stored.clone());
                Ok(Recorded::Inserted(stored))
            }
        }
    }

    async fn apply_card_transaction(
        &self,
        tx: NewTransaction,
        delta: Decimal,
    ) -> Result<Recorded<Transaction>, EngineError> {
        let card_id = tx
            .card_id
            .ok_or_else(|| EngineError::validation("card movement requires a card id"))?;

        let slot = match self.transactions.entry(tx.reference.clone()) {
            Entry::Occupied(existing) => return Ok(Recorded::Duplicate(existing.get().clone())),
            Entry::Vacant(slot) => slot,
        };

        let mut card = self
            .cards
            .get_mut(&card_id)
            .ok_or_else(|| EngineError::not_found("card", card_id))?;

        if !delta.is_zero() {
            if card.is_terminated() {
                return Err(EngineError::validation(format!(
                    "card {} is terminated, balance movements are not allowed",
                    card_id
                )));
            }

            let balance_before = card.balance;
            let balance_after = balance_before
                .checked_add(delta)
                .ok_or_else(|| EngineError::arithmetic_overflow("card movement"))?;
            if balance_after < Decimal::ZERO {
                warn!(
                    card_id = %card_id,
                    reference = %tx.reference,
                    balance_before = %balance_before,
                    balance_after = %balance_after,
                    "Card balance driven negative by provider-authoritative movement"
                );
            }
            card.balance = balance_after;
            card.updated_at = Utc::now();

            self.push_record(BalanceTransactionRecord::new(
                BalanceSubject::Card(card_id),
                &tx.reference,
                balance_before,
                balance_after,
                tx.description.clone(),
            ));
        }
        drop(card);

        let stored = tx.into_transaction(Utc::now());
        slot.insert(stored.clone());
        Ok(Recorded::Inserted(stored))
    }

    async fn transaction_by_reference(&self, reference: &str) -> Option<Transaction> {
        self.transactions.get(reference).map(|tx| tx.clone())
    }

    async fn finalize_transaction(
        &self,
        reference: &str,
        status: TransactionStatus,
    ) -> Result<Transaction, EngineError> {
        let mut tx = self
            .transactions
            .get_mut(reference)
            .ok_or_else(|| EngineError::not_found("transaction", reference))?;

        match tx.status {
            TransactionStatus::Pending => {
                tx.status = status;
                Ok(tx.clone())
            }
            current if current == status => Ok(tx.clone()),
            current => Err(EngineError::validation(format!(
                "transaction {} is already {}, cannot become {}",
                reference, current, status
            ))),
        }
    }

    async fn finalize_card_transaction(
        &self,
        reference: &str,
        status: TransactionStatus,
        delta: Decimal,
    ) -> Result<Transaction, EngineError> {
        let mut tx = self
            .transactions
            .get_mut(reference)
            .ok_or_else(|| EngineError::not_found("transaction", reference))?;

        match tx.status {
            TransactionStatus::Pending => {}
            current if current == status => return Ok(tx.clone()),
            current => {
                return Err(EngineError::validation(format!(
                    "transaction {} is already {}, cannot become {}",
                    reference, current, status
                )))
            }
        }

        if status == TransactionStatus::Success && !delta.is_zero() {
            let card_id = tx
                .card_id
                .ok_or_else(|| EngineError::validation("card movement requires a card id"))?;
            let mut card = self
                .cards
                .get_mut(&card_id)
                .ok_or_else(|| EngineError::not_found("card", card_id))?;
            if card.is_terminated() {
                return Err(EngineError::validation(format!(
                    "card {} is terminated, balance movements are not allowed",
                    card_id
                )));
            }

            let balance_before = card.balance;
            let balance_after = balance_before
                .checked_add(delta)
                .ok_or_else(|| EngineError::arithmetic_overflow("card movement"))?;
            card.balance = balance_after;
            card.updated_at = Utc::now();
            drop(card);

            self.push_record(BalanceTransactionRecord::new(
                BalanceSubject::Card(card_id),
                reference,
                balance_before,
                balance_after,
                tx.description.clone(),
            ));
        }

        tx.status = status;
        Ok(tx.clone())
    }

    async fn adjust_card_balance(
        &self,
        tx: NewTransaction,
        expected: Decimal,
        new_balance: Decimal,
    ) -> Result<Option<Transaction>, EngineError> {
        let card_id = tx
            .card_id
            .ok_or_else(|| EngineError::validation("card adjustment requires a card id"))?;

        let slot = match self.transactions.entry(tx.reference.clone()) {
            Entry::Occupied(_) => return Ok(None),
            Entry::Vacant(slot) => slot,
        };

        let mut card = self
            .cards
            .get_mut(&card_id)
            .ok_or_else(|| EngineError::not_found("card", card_id))?;
        if card.is_terminated() || card.balance != expected {
            return Ok(None);
        }

        card.balance = new_balance;
        card.updated_at = Utc::now();
        drop(card);

        self.push_record(BalanceTransactionRecord::new(
            BalanceSubject::Card(card_id),
            &tx.reference,
            expected,
            new_balance,
            tx.description.clone(),
        ));
        let stored = tx.into_transaction(Utc::now());
        slot.insert(stored.clone());
        Ok(Some(stored))
    }

    async fn terminate_card(
        &self,
        card_id: CardId,
        reference: &str,
        description: &str,
    ) -> Result<Option<Transaction>, EngineError> {
        let slot = match self.transactions.entry(reference.to_string()) {
            Entry::Occupied(_) => return Ok(None),
            Entry::Vacant(slot) => slot,
        };

        let mut card = self
            .cards
            .get_mut(&card_id)
            .ok_or_else(|| EngineError::not_found("card", card_id))?;
        if card.is_terminated() {
            return Ok(None);
        }

        let balance_before = card.balance;
        let (tx_type, amount) = if balance_before < Decimal::ZERO {
            (TransactionType::Credit, -balance_before)
        } else {
            (TransactionType::Debit, balance_before)
        };
        card.balance = Decimal::ZERO;
        card.status = CardStatus::Terminated;
        card.updated_at = Utc::now();
        let tx = NewTransaction::new(
            TransactionCategory::Termination,
            tx_type,
            TransactionStatus::Success,
            amount,
            card.currency.clone(),
            reference,
        )
        .for_card(card_id)
        .for_owner(Some(card.customer_id), Some(card.company_id))
        .describe(description);
        drop(card);

        if !balance_before.is_zero() {
            self.push_record(BalanceTransactionRecord::new(
                BalanceSubject::Card(card_id),
                reference,
                balance_before,
                Decimal::ZERO,
                description,
            ));
        }
        let stored = tx.into_transaction(Utc::now());
        slot.insert(stored.clone());
        Ok(Some(stored))
    }

    async fn transactions_for_card(&self, card_id: CardId) -> Vec<Transaction> {
        let mut txs: Vec<Transaction> = self
            .transactions
            .iter()
            .filter(|entry| entry.value().card_id == Some(card_id))
            .map(|entry| entry.value().clone())
            .collect();
        txs.sort_by_key(|tx| tx.created_at);
        txs
    }

    async fn balance_records(&self, reference: &str) -> Vec<BalanceTransactionRecord> {
        self.records
            .get(reference)
            .map(|records| records.clone())
            .unwrap_or_default()
    }

    async fn volume_since(&self, company_id: CompanyId, since: DateTime<Utc>) -> Decimal {
        self.transactions
            .iter()
            .map(|entry| entry.value().clone())
            .filter(|tx| {
                tx.company_id == Some(company_id)
                    && tx.status == TransactionStatus::Success
                    && matches!(
                        tx.category,
                        TransactionCategory::Issuance | TransactionCategory::Funding
                    )
                    && tx.created_at >= since
            })
            .map(|tx| tx.amount)
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CardBrand;
    use std::sync::Arc;

    fn wallet_with(balance: i64) -> Wallet {
        Wallet::new(Uuid::new_v4(), "USD", Decimal::new(balance, 0))
    }

    fn seeded_card(ledger: &InMemoryLedger, balance: Decimal) -> Card {
        let now = Utc::now();
        let card = Card {
            id: Uuid::new_v4(),
            customer_id: Uuid::new_v4(),
            company_id: Uuid::new_v4(),
            external_id: format!("ext-{}", Uuid::new_v4()),
            client_reference: format!("iss-{}", Uuid::new_v4()),
            status: CardStatus::Active,
            balance,
            currency: "USD".to_string(),
            brand: CardBrand::Visa,
            masked_pan: None,
            created_at: now,
            updated_at: now,
        };
        ledger.insert_card(card.clone());
        card
    }

    fn pending_issuance(reference: &str, amount: Decimal) -> NewTransaction {
        NewTransaction::new(
            TransactionCategory::Issuance,
            TransactionType::Debit,
            TransactionStatus::Pending,
            amount,
            "USD",
            reference,
        )
        .for_owner(Some(Uuid::new_v4()), Some(Uuid::new_v4()))
    }

    #[tokio::test]
    async fn test_reserve_debits_and_records() {
        let ledger = InMemoryLedger::new();
        let wallet = wallet_with(100);
        let wallet_id = wallet.id;
        ledger.insert_wallet(wallet);

        let reservation = ledger
            .reserve(wallet_id, Decimal::new(51, 0), "card issuance", "iss-1")
            .await
            .unwrap();

        assert_eq!(reservation.balance_before, Decimal::new(100, 0));
        assert_eq!(reservation.balance_after, Decimal::new(49, 0));
        assert_eq!(ledger.get_balance(wallet_id).await.unwrap(), Decimal::new(49, 0));

        let records = ledger.balance_records("iss-1").await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].amount_changed, Decimal::new(-51, 0));
    }

    #[tokio::test]
    async fn test_reserve_insufficient_funds_has_no_effect() {
        let ledger = InMemoryLedger::new();
        let wallet = wallet_with(50);
        let wallet_id = wallet.id;
        ledger.insert_wallet(wallet);

        let result = ledger
            .reserve(wallet_id, Decimal::new(51, 0), "card issuance", "iss-1")
            .await;

        assert_eq!(
            result.unwrap_err(),
            EngineError::insufficient_funds(wallet_id, Decimal::new(50, 0), Decimal::new(51, 0))
        );
        assert_eq!(ledger.get_balance(wallet_id).await.unwrap(), Decimal::new(50, 0));
        assert!(ledger.balance_records("iss-1").await.is_empty());
    }

    #[tokio::test]
    async fn test_refund_restores_balance() {
        let ledger = InMemoryLedger::new();
        let wallet = wallet_with(100);
        let wallet_id = wallet.id;
        ledger.insert_wallet(wallet);

        ledger
            .reserve(wallet_id, Decimal::new(51, 0), "card issuance", "iss-1")
            .await
            .unwrap();
        ledger
            .refund(wallet_id, Decimal::new(51, 0), "iss-1", "provider unreachable")
            .await
            .unwrap();

        assert_eq!(ledger.get_balance(wallet_id).await.unwrap(), Decimal::new(100, 0));
        assert_eq!(ledger.balance_records("iss-1").await.len(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_reservations_never_overdraw() {
        let ledger = Arc::new(InMemoryLedger::new());
        let wallet = wallet_with(100);
        let wallet_id = wallet.id;
        ledger.insert_wallet(wallet);

        let mut handles = Vec::new();
        for i in 0..20 {
            let ledger = Arc::clone(&ledger);
            handles.push(tokio::spawn(async move {
                ledger
                    .reserve(wallet_id, Decimal::new(10, 0), "concurrent", &format!("r-{}", i))
                    .await
                    .is_ok()
            }));
        }

        let mut successes = 0;
        for handle in handles {
            if handle.await.unwrap() {
                successes += 1;
            }
        }

        assert_eq!(successes, 10);
        assert_eq!(ledger.get_balance(wallet_id).await.unwrap(), Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_apply_card_transaction_is_idempotent() {
        let ledger = InMemoryLedger::new();
        let card = seeded_card(&ledger, Decimal::new(20, 0));

        let funding = NewTransaction::new(
            TransactionCategory::Funding,
            TransactionType::Credit,
            TransactionStatus::Success,
            Decimal::new(10, 0),
            "USD",
            "ref-123",
        )
        .for_card(card.id);

        let first = ledger
            .apply_card_transaction(funding.clone(), Decimal::new(10, 0))
            .await
            .unwrap();
        let second = ledger
            .apply_card_transaction(funding, Decimal::new(10, 0))
            .await
            .unwrap();

        assert!(first.is_inserted());
        assert!(!second.is_inserted());
        assert_eq!(first.get().id, second.get().id);
        assert_eq!(ledger.card(card.id).await.unwrap().balance, Decimal::new(30, 0));
        assert_eq!(ledger.balance_records("ref-123").await.len(), 1);
    }

    #[tokio::test]
    async fn test_commit_issuance_promotes_pending_and_is_idempotent() {
        let ledger = InMemoryLedger::new();
        ledger
            .insert_transaction(pending_issuance("iss-1", Decimal::new(50, 0)))
            .await
            .unwrap();

        let commit = IssuanceCommit {
            reference: "iss-1".to_string(),
            external_id: "ext-1".to_string(),
            brand: CardBrand::Visa,
            masked_pan: Some("4111********1111".to_string()),
        };

        let first = ledger.commit_issuance(commit.clone()).await.unwrap();
        let second = ledger.commit_issuance(commit).await.unwrap();

        assert!(first.is_inserted());
        assert!(!second.is_inserted());
        assert_eq!(first.get().balance, Decimal::new(50, 0));
        assert_eq!(ledger.all_cards().await.len(), 1);

        let tx = ledger.transaction_by_reference("iss-1").await.unwrap();
        assert_eq!(tx.status, TransactionStatus::Success);
        assert_eq!(tx.card_id, Some(first.get().id));
    }

    #[tokio::test]
    async fn test_commit_issuance_rejects_closed_issuance() {
        let ledger = InMemoryLedger::new();
        ledger
            .insert_transaction(pending_issuance("iss-1", Decimal::new(50, 0)))
            .await
            .unwrap();
        ledger
            .finalize_transaction("iss-1", TransactionStatus::Failed)
            .await
            .unwrap();

        let result = ledger
            .commit_issuance(IssuanceCommit {
                reference: "iss-1".to_string(),
                external_id: "ext-1".to_string(),
                brand: CardBrand::Visa,
                masked_pan: None,
            })
            .await;

        assert!(matches!(result, Err(EngineError::Validation { .. })));
        assert!(ledger.card_by_reference("iss-1").await.is_none());
    }

    #[tokio::test]
    async fn test_terminated_card_status_is_absorbing() {
        let ledger = InMemoryLedger::new();
        let card = seeded_card(&ledger, Decimal::ZERO);

        ledger
            .update_card_status(card.id, CardStatus::Terminated)
            .await
            .unwrap();

        for status in [CardStatus::Active, CardStatus::Frozen] {
            let result = ledger.update_card_status(card.id, status).await;
            assert!(matches!(result, Err(EngineError::InvalidStatusTransition { .. })));
        }
        assert_eq!(
            ledger.card(card.id).await.unwrap().status,
            CardStatus::Terminated
        );
    }

    #[tokio::test]
    async fn test_finalize_only_promotes_pending() {
        let ledger = InMemoryLedger::new();
        ledger
            .insert_transaction(pending_issuance("iss-1", Decimal::new(5, 0)))
            .await
            .unwrap();

        ledger
            .finalize_transaction("iss-1", TransactionStatus::Success)
            .await
            .unwrap();
        // Same status again is a no-op
        ledger
            .finalize_transaction("iss-1", TransactionStatus::Success)
            .await
            .unwrap();

        let result = ledger
            .finalize_transaction("iss-1", TransactionStatus::Failed)
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_volume_since_counts_successful_issuance_and_funding() {
        let ledger = InMemoryLedger::new();
        let company = Uuid::new_v4();
        let since = Utc::now() - chrono::Duration::days(30);

        for (reference, category, status, amount) in [
            ("a", TransactionCategory::Issuance, TransactionStatus::Success, 100),
            ("b", TransactionCategory::Funding, TransactionStatus::Success, 50),
            ("c", TransactionCategory::Funding, TransactionStatus::Failed, 70),
            ("d", TransactionCategory::Fee, TransactionStatus::Success, 5),
        ] {
            ledger
                .insert_transaction(
                    NewTransaction::new(
                        category,
                        TransactionType::Credit,
                        status,
                        Decimal::new(amount, 0),
                        "USD",
                        reference,
                    )
                    .for_owner(None, Some(company)),
                )
                .await
                .unwrap();
        }

        assert_eq!(ledger.volume_since(company, since).await, Decimal::new(150, 0));
    }

    fn pending_fee(card_id: CardId, reference: &str) -> NewTransaction {
        NewTransaction::new(
            TransactionCategory::Fee,
            TransactionType::Debit,
            TransactionStatus::Pending,
            Decimal::new(2, 1),
            "USD",
            reference,
        )
        .for_card(card_id)
    }

    #[tokio::test]
    async fn test_finalize_card_transaction_moves_balance_only_on_success() {
        let ledger = InMemoryLedger::new();
        let card = seeded_card(&ledger, Decimal::new(20, 0));
        ledger.insert_transaction(pending_fee(card.id, "fee-ok")).await.unwrap();
        ledger.insert_transaction(pending_fee(card.id, "fee-refused")).await.unwrap();

        let settled = ledger
            .finalize_card_transaction("fee-ok", TransactionStatus::Success, Decimal::new(-2, 1))
            .await
            .unwrap();
        // Repeating the same outcome does not charge twice
        ledger
            .finalize_card_transaction("fee-ok", TransactionStatus::Success, Decimal::new(-2, 1))
            .await
            .unwrap();
        let refused = ledger
            .finalize_card_transaction("fee-refused", TransactionStatus::Failed, Decimal::new(-2, 1))
            .await
            .unwrap();

        assert_eq!(settled.status, TransactionStatus::Success);
        assert_eq!(refused.status, TransactionStatus::Failed);
        assert_eq!(ledger.card(card.id).await.unwrap().balance, Decimal::new(198, 1));
        assert_eq!(ledger.balance_records("fee-ok").await.len(), 1);
        assert!(ledger.balance_records("fee-refused").await.is_empty());
    }

    #[tokio::test]
    async fn test_finalize_card_transaction_on_terminated_card_stays_pending() {
        let ledger = InMemoryLedger::new();
        let card = seeded_card(&ledger, Decimal::ZERO);
        ledger.insert_transaction(pending_fee(card.id, "fee-1")).await.unwrap();
        ledger
            .update_card_status(card.id, CardStatus::Terminated)
            .await
            .unwrap();

        let result = ledger
            .finalize_card_transaction("fee-1", TransactionStatus::Success, Decimal::new(-2, 1))
            .await;

        assert!(matches!(result, Err(EngineError::Validation { .. })));
        let tx = ledger.transaction_by_reference("fee-1").await.unwrap();
        assert_eq!(tx.status, TransactionStatus::Pending);
    }

    #[tokio::test]
    async fn test_adjust_card_balance_requires_unchanged_balance() {
        let ledger = InMemoryLedger::new();
        let card = seeded_card(&ledger, Decimal::new(50, 0));
        let adjustment = |reference: &str| {
            NewTransaction::new(
                TransactionCategory::Adjustment,
                TransactionType::Credit,
                TransactionStatus::Success,
                Decimal::new(5, 0),
                "USD",
                reference,
            )
            .for_card(card.id)
        };

        let stale = ledger
            .adjust_card_balance(adjustment("sync-1"), Decimal::new(40, 0), Decimal::new(45, 0))
            .await
            .unwrap();
        assert!(stale.is_none());
        assert!(ledger.transaction_by_reference("sync-1").await.is_none());
        assert_eq!(ledger.card(card.id).await.unwrap().balance, Decimal::new(50, 0));

        let applied = ledger
            .adjust_card_balance(adjustment("sync-2"), Decimal::new(50, 0), Decimal::new(55, 0))
            .await
            .unwrap();
        assert!(applied.is_some());
        assert_eq!(ledger.card(card.id).await.unwrap().balance, Decimal::new(55, 0));
        assert_eq!(ledger.balance_records("sync-2").await.len(), 1);
    }

    #[tokio::test]
    async fn test_terminate_card_zeroes_current_balance_once() {
        let ledger = InMemoryLedger::new();
        let card = seeded_card(&ledger, Decimal::new(30, 0));
        // A movement landing after the caller last read the card
        ledger
            .apply_card_transaction(
                NewTransaction::new(
                    TransactionCategory::Funding,
                    TransactionType::Credit,
                    TransactionStatus::Success,
                    Decimal::new(12, 0),
                    "USD",
                    "late-funding",
                )
                .for_card(card.id),
                Decimal::new(12, 0),
            )
            .await
            .unwrap();

        let zeroing = ledger
            .terminate_card(card.id, "term-1", "card terminated")
            .await
            .unwrap()
            .unwrap();
        let again = ledger
            .terminate_card(card.id, "term-2", "card terminated")
            .await
            .unwrap();

        assert_eq!(zeroing.category, TransactionCategory::Termination);
        assert_eq!(zeroing.tx_type, TransactionType::Debit);
        assert_eq!(zeroing.amount, Decimal::new(42, 0));
        assert!(again.is_none());

        let stored = ledger.card(card.id).await.unwrap();
        assert_eq!(stored.balance, Decimal::ZERO);
        assert_eq!(stored.status, CardStatus::Terminated);
        assert_eq!(ledger.balance_records("term-1").await[0].balance_before, Decimal::new(42, 0));
    }

    #[tokio::test]
    async fn test_terminate_card_credits_negative_balance() {
        let ledger = InMemoryLedger::new();
        let card = seeded_card(&ledger, Decimal::new(-3, 0));

        let zeroing = ledger
            .terminate_card(card.id, "term-1", "card terminated")
            .await
            .unwrap()
            .unwrap();

        assert_eq!(zeroing.tx_type, TransactionType::Credit);
        assert_eq!(zeroing.amount, Decimal::new(3, 0));
        assert_eq!(ledger.card(card.id).await.unwrap().balance, Decimal::ZERO);
    }
}

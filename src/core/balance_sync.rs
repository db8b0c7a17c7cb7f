//! Balance synchronization
//!
//! The provider's balance is authoritative. `BalanceSyncService` compares it
//! with the cached local balance and, when they differ by more than the
//! tolerance, overwrites the local balance and records an `ADJUSTMENT`
//! transaction together with its audit record.
//!
//! Provider balances are cached per card for a short TTL so that repeated
//! reads (customer card listings, sweeps) do not hammer the provider. A cached
//! balance is only served while the local card is unchanged since the fetch,
//! and a correction only lands if the local balance is still the one that was
//! compared.
//!
//! ## Sweeps
//!
//! [`run`](BalanceSyncService::run) sweeps every live card on an interval
//! until its cancellation token fires:
//!
//! ```rust,ignore
//! tokio::spawn(async move { sync.run(shutdown).await });
//! ```

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::stream::{self, StreamExt};
use rust_decimal::Decimal;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::traits::{CardProvider, LedgerStore};
use crate::types::{
    Card, CardId, CustomerId, EngineError, NewTransaction, TransactionCategory, TransactionStatus,
    TransactionType,
};

/// Differences up to this amount are rounding noise
pub const DEFAULT_BALANCE_TOLERANCE: Decimal = Decimal::from_parts(1, 0, 0, false, 2);

pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(180);

pub const DEFAULT_SYNC_INTERVAL: Duration = Duration::from_secs(300);

/// Cards synchronized concurrently during a sweep
const SWEEP_CONCURRENCY: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BalanceSyncConfig {
    pub tolerance: Decimal,
    pub cache_ttl: Duration,
    pub interval: Duration,
}

impl Default for BalanceSyncConfig {
    fn default() -> Self {
        Self {
            tolerance: DEFAULT_BALANCE_TOLERANCE,
            cache_ttl: DEFAULT_CACHE_TTL,
            interval: DEFAULT_SYNC_INTERVAL,
        }
    }
}

/// Result of synchronizing one card
#[derive(Debug, Clone, PartialEq)]
pub struct SyncReport {
    pub card_id: CardId,
    pub external_id: String,
    pub local_balance: Decimal,
    pub provider_balance: Decimal,
    /// `provider_balance - local_balance`
    pub difference: Decimal,
    pub discrepancy_found: bool,
    pub corrected: bool,
    /// The provider balance came from the cache
    pub cached: bool,
    /// Terminated cards are not synchronized
    pub skipped: bool,
}

/// Result of a sweep over all cards
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BulkSyncReport {
    pub checked: usize,
    pub discrepancies: usize,
    pub corrected: usize,
    pub skipped: usize,
    /// Cards that could not be synchronized, with the reason
    pub failed: Vec<(CardId, String)>,
}

#[derive(Debug, Clone, Copy)]
struct CachedBalance {
    balance: Decimal,
    fetched_at: Instant,
    /// `updated_at` of the local card when the balance was fetched
    card_updated_at: DateTime<Utc>,
}

/// Keeps local card balances aligned with the provider
pub struct BalanceSyncService {
    store: Arc<dyn LedgerStore>,
    provider: Arc<dyn CardProvider>,
    cache: DashMap<String, CachedBalance>,
    config: BalanceSyncConfig,
}

impl BalanceSyncService {
    pub fn new(store: Arc<dyn LedgerStore>, provider: Arc<dyn CardProvider>, config: BalanceSyncConfig) -> Self {
        Self {
            store,
            provider,
            cache: DashMap::new(),
            config,
        }
    }

    /// Provider balance, served from the cache while fresh
    ///
    /// Any local movement on the card since the fetch makes the entry stale.
    async fn provider_balance(&self, card: &Card) -> Result<(Decimal, bool), EngineError> {
        if let Some(entry) = self.cache.get(&card.external_id) {
            if entry.fetched_at.elapsed() < self.config.cache_ttl && entry.card_updated_at == card.updated_at {
                return Ok((entry.balance, true));
            }
        }

        let balance = self.provider.get_balance(&card.external_id).await?;
        self.cache.insert(
            card.external_id.clone(),
            CachedBalance {
                balance,
                fetched_at: Instant::now(),
                card_updated_at: card.updated_at,
            },
        );
        Ok((balance, false))
    }

    /// Synchronize one card with the provider
    ///
    /// # Returns
    ///
    /// A `SyncReport`; when the balances differ beyond the tolerance the
    /// local balance is overwritten and `corrected` is set. A local movement
    /// landing between the read and the write wins: nothing is overwritten
    /// and `corrected` stays false.
    ///
    /// # Errors
    ///
    /// Unknown cards and provider failures are errors; the local balance is
    /// left untouched.
    pub async fn sync_one(&self, card_id: CardId) -> Result<SyncReport, EngineError> {
        let card = self
            .store
            .card(card_id)
            .await
            .ok_or_else(|| EngineError::not_found("card", card_id))?;

        if card.is_terminated() {
            return Ok(SyncReport {
                card_id,
                external_id: card.external_id,
                local_balance: card.balance,
                provider_balance: card.balance,
                difference: Decimal::ZERO,
                discrepancy_found: false,
                corrected: false,
                cached: false,
                skipped: true,
            });
        }

        let (provider_balance, cached) = self.provider_balance(&card).await?;
        let difference = provider_balance - card.balance;
        let mut report = SyncReport {
            card_id,
            external_id: card.external_id.clone(),
            local_balance: card.balance,
            provider_balance,
            difference,
            discrepancy_found: difference.abs() > self.config.tolerance,
            corrected: false,
            cached,
            skipped: false,
        };

        if !report.discrepancy_found {
            debug!(card_id = %card_id, balance = %card.balance, "Card balance in sync");
            return Ok(report);
        }

        warn!(
            card_id = %card_id,
            external_id = %card.external_id,
            local_balance = %card.balance,
            provider_balance = %provider_balance,
            difference = %difference,
            "Card balance discrepancy, adopting provider balance"
        );

        let reference = format!("sync-{}-{}", card_id, Uuid::new_v4());
        let tx_type = if difference > Decimal::ZERO {
            TransactionType::Credit
        } else {
            TransactionType::Debit
        };
        let adjustment = NewTransaction::new(
            TransactionCategory::Adjustment,
            tx_type,
            TransactionStatus::Success,
            difference.abs(),
            card.currency.clone(),
            reference.clone(),
        )
        .for_card(card_id)
        .for_owner(Some(card.customer_id), Some(card.company_id))
        .describe(format!(
            "Balance sync: local {} provider {}",
            card.balance, provider_balance
        ));

        let applied = self
            .store
            .adjust_card_balance(adjustment, card.balance, provider_balance)
            .await?;
        if applied.is_none() {
            self.cache.remove(&card.external_id);
            info!(card_id = %card_id, reference = %reference, "Card balance moved during sync, correction dropped");
            return Ok(report);
        }
        report.corrected = true;
        Ok(report)
    }

    /// Synchronize every card, continuing past individual failures
    pub async fn sync_all(&self) -> BulkSyncReport {
        let cards = self.store.all_cards().await;
        let results: Vec<_> = stream::iter(cards)
            .map(|card| async move { (card.id, self.sync_one(card.id).await) })
            .buffer_unordered(SWEEP_CONCURRENCY)
            .collect()
            .await;

        let mut bulk = BulkSyncReport::default();
        for (card_id, result) in results {
            match result {
                Ok(report) if report.skipped => bulk.skipped += 1,
                Ok(report) => {
                    bulk.checked += 1;
                    if report.discrepancy_found {
                        bulk.discrepancies += 1;
                    }
                    if report.corrected {
                        bulk.corrected += 1;
                    }
                }
                Err(e) => {
                    warn!(card_id = %card_id, error = %e, "Balance sync failed for card");
                    bulk.failed.push((card_id, e.to_string()));
                }
            }
        }
        bulk
    }

    /// Cards of a customer, synchronized first on a best-effort basis
    pub async fn cards_for_customer(&self, customer_id: CustomerId) -> Vec<Card> {
        for card in self.store.cards_for_customer(customer_id).await {
            if card.is_terminated() {
                continue;
            }
            if let Err(e) = self.sync_one(card.id).await {
                warn!(card_id = %card.id, error = %e, "Pre-read balance sync failed, serving cached balance");
            }
        }
        self.store.cards_for_customer(customer_id).await
    }

    /// Sweep on an interval until `shutdown` is cancelled
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(interval_secs = self.config.interval.as_secs(), "Balance sync starting");

        loop {
            if shutdown.is_cancelled() {
                info!("Balance sync shutting down");
                return;
            }

            let report = self.sync_all().await;
            if report.discrepancies > 0 || !report.failed.is_empty() {
                info!(
                    checked = report.checked,
                    discrepancies = report.discrepancies,
                    corrected = report.corrected,
                    failed = report.failed.len(),
                    "Balance sync sweep finished"
                );
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.interval) => {},
                _ = shutdown.cancelled() => {
                    info!("Balance sync shutting down");
                    return;
                }
            }
        }
    }
}

//! Webhook correlator
//!
//! Bridges the synchronous-looking issuance flow and the asynchronous
//! provider confirmation. A caller registers interest in a reference, fires
//! the provider request, then suspends until the matching webhook arrives,
//! the timeout elapses, or the correlator shuts down.
//!
//! # Exactly-once resolution
//!
//! Pending waits live in a `DashMap<reference, oneshot::Sender>`. Whoever
//! *removes* the entry resolves the wait:
//!
//! - [`WebhookCorrelator::notify`] removes it and sends the confirmation
//! - a timing-out waiter removes it and reports [`WaitOutcome::TimedOut`]
//!
//! A waiter that times out but finds the entry already gone knows `notify`
//! won the race and reads the delivered value instead. A late `notify` finds
//! nothing and returns `false`, so the caller can fall back to processing the
//! event itself.
//!
//! # Circuit breaker
//!
//! After `failure_threshold` consecutive timeouts new registrations are
//! refused for `cooldown`. Every delivered confirmation decrements the count.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::types::{EngineError, IssuanceConfirmation};

/// Default consecutive timeouts before the breaker opens
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 5;

/// Default time the breaker stays open
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(60);

/// How a wait was resolved
#[derive(Debug, Clone, PartialEq)]
pub enum WaitOutcome {
    /// The provider confirmed the outcome by webhook
    Delivered(IssuanceConfirmation),
    /// No webhook arrived within the timeout
    TimedOut,
    /// The correlator shut down while waiting
    ShuttingDown,
    /// The wait was cleaned up without a result
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CorrelatorConfig {
    pub failure_threshold: u32,
    pub cooldown: Duration,
}

impl Default for CorrelatorConfig {
    fn default() -> Self {
        Self {
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            cooldown: DEFAULT_COOLDOWN,
        }
    }
}

#[derive(Debug, Default)]
struct BreakerState {
    consecutive_timeouts: u32,
    open_until: Option<Instant>,
}

/// In-memory registry of pending webhook waits
#[derive(Debug)]
pub struct WebhookCorrelator {
    waiters: DashMap<String, (u64, oneshot::Sender<WaitOutcome>)>,
    breaker: Mutex<BreakerState>,
    config: CorrelatorConfig,
    next_id: AtomicU64,
    shutting_down: AtomicBool,
}

impl Default for WebhookCorrelator {
    fn default() -> Self {
        Self::new(CorrelatorConfig::default())
    }
}

impl WebhookCorrelator {
    pub fn new(config: CorrelatorConfig) -> Self {
        Self {
            waiters: DashMap::new(),
            breaker: Mutex::new(BreakerState::default()),
            config,
            next_id: AtomicU64::new(1),
            shutting_down: AtomicBool::new(false),
        }
    }

    /// Register a wait for `reference` without suspending
    ///
    /// Register before triggering the provider so that a webhook arriving
    /// before the caller starts waiting is not lost.
    ///
    /// # Errors
    ///
    /// - [`EngineError::ShuttingDown`] after [`shutdown`](Self::shutdown)
    /// - [`EngineError::CorrelatorUnavailable`] while the breaker is open
    /// - [`EngineError::DuplicateWait`] if the reference is already awaited
    pub fn register(self: &Arc<Self>, reference: &str) -> Result<PendingWait, EngineError> {
        if self.shutting_down.load(Ordering::SeqCst) {
            return Err(EngineError::ShuttingDown);
        }
        self.check_breaker()?;

        let (sender, receiver) = oneshot::channel();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        match self.waiters.entry(reference.to_string()) {
            Entry::Occupied(_) => {
                return Err(EngineError::DuplicateWait {
                    reference: reference.to_string(),
                })
            }
            Entry::Vacant(slot) => {
                slot.insert((id, sender));
            }
        }

        debug!(reference = %reference, "Webhook wait registered");

        Ok(PendingWait {
            correlator: Arc::clone(self),
            reference: reference.to_string(),
            id,
            receiver: Some(receiver),
        })
    }

    /// Register and suspend until the wait resolves
    pub async fn wait_for(self: &Arc<Self>, reference: &str, timeout: Duration) -> Result<WaitOutcome, EngineError> {
        let pending = self.register(reference)?;
        Ok(pending.wait(timeout).await)
    }

    /// Deliver a confirmation to the waiter for `reference`
    ///
    /// Returns `true` when a waiter received it, `false` when nobody was
    /// waiting (already resolved, timed out, or never registered).
    pub fn notify(&self, reference: &str, confirmation: IssuanceConfirmation) -> bool {
        match self.waiters.remove(reference) {
            Some((_, (_, sender))) => {
                let delivered = sender.send(WaitOutcome::Delivered(confirmation)).is_ok();
                debug!(reference = %reference, delivered, "Webhook delivered to waiter");
                delivered
            }
            None => false,
        }
    }

    /// Remove a wait without resolving it
    ///
    /// The waiter observes [`WaitOutcome::Cancelled`].
    pub fn cleanup(&self, reference: &str) -> bool {
        self.waiters.remove(reference).is_some()
    }

    /// Resolve every pending wait with [`WaitOutcome::ShuttingDown`] and
    /// refuse new registrations
    ///
    /// Returns the number of waits that were resolved.
    pub fn shutdown(&self) -> usize {
        self.shutting_down.store(true, Ordering::SeqCst);

        let references: Vec<String> = self.waiters.iter().map(|entry| entry.key().clone()).collect();
        let mut resolved = 0;
        for reference in references {
            if let Some((_, (_, sender))) = self.waiters.remove(&reference) {
                if sender.send(WaitOutcome::ShuttingDown).is_ok() {
                    resolved += 1;
                }
            }
        }

        info!(resolved, "Webhook correlator shut down");
        resolved
    }

    /// Number of registered, unresolved waits
    pub fn pending_count(&self) -> usize {
        self.waiters.len()
    }

    pub fn is_waiting(&self, reference: &str) -> bool {
        self.waiters.contains_key(reference)
    }

    fn check_breaker(&self) -> Result<(), EngineError> {
        let breaker = self.breaker.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        match breaker.open_until {
            Some(until) => {
                let now = Instant::now();
                if now < until {
                    Err(EngineError::CorrelatorUnavailable {
                        retry_after_ms: (until - now).as_millis() as u64,
                    })
                } else {
                    Ok(())
                }
            }
            None => Ok(()),
        }
    }

    fn record_delivery(&self) {
        let mut breaker = self.breaker.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        breaker.consecutive_timeouts = breaker.consecutive_timeouts.saturating_sub(1);
        if breaker.consecutive_timeouts < self.config.failure_threshold {
            breaker.open_until = None;
        }
    }

    fn record_timeout(&self, reference: &str) {
        let mut breaker = self.breaker.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        breaker.consecutive_timeouts = breaker.consecutive_timeouts.saturating_add(1);

        if breaker.consecutive_timeouts >= self.config.failure_threshold {
            breaker.open_until = Some(Instant::now() + self.config.cooldown);
            warn!(
                reference = %reference,
                consecutive_timeouts = breaker.consecutive_timeouts,
                cooldown_secs = self.config.cooldown.as_secs(),
                "Webhook correlator circuit opened"
            );
        }
    }

    /// Remove the entry only if it still belongs to registration `id`
    fn release(&self, reference: &str, id: u64) -> bool {
        self.waiters
            .remove_if(reference, |_, (owner, _)| *owner == id)
            .is_some()
    }
}

/// A registered, not yet awaited webhook wait
///
/// Dropping it without waiting removes the registration.
#[derive(Debug)]
pub struct PendingWait {
    correlator: Arc<WebhookCorrelator>,
    reference: String,
    id: u64,
    receiver: Option<oneshot::Receiver<WaitOutcome>>,
}

impl PendingWait {
    pub fn reference(&self) -> &str {
        &self.reference
    }

    /// Suspend until the wait is resolved or `timeout` elapses
    pub async fn wait(mut self, timeout: Duration) -> WaitOutcome {
        let Some(mut receiver) = self.receiver.take() else {
            return WaitOutcome::Cancelled;
        };

        let outcome = match tokio::time::timeout(timeout, &mut receiver).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => WaitOutcome::Cancelled,
            Err(_) => {
                if self.correlator.release(&self.reference, self.id) {
                    self.correlator.record_timeout(&self.reference);
                    warn!(
                        reference = %self.reference,
                        waited_ms = timeout.as_millis() as u64,
                        "Timed out waiting for provider webhook"
                    );
                    return WaitOutcome::TimedOut;
                }
                // notify removed the entry first; its value is in flight
                receiver.await.unwrap_or(WaitOutcome::Cancelled)
            }
        };

        if matches!(outcome, WaitOutcome::Delivered(_)) {
            self.correlator.record_delivery();
        }
        outcome
    }
}

impl Drop for PendingWait {
    fn drop(&mut self) {
        if self.receiver.is_some() {
            self.correlator.release(&self.reference, self.id);
        }
    }
}

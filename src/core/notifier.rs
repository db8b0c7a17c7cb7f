//! Notifier implementations
//!
//! Delivery channels (push, e-mail) live outside the engine. `TracingNotifier`
//! emits every notification as a structured log event; `RecordingNotifier`
//! keeps them in memory for inspection.

use std::sync::Mutex;

use async_trait::async_trait;
use tracing::info;

use super::traits::Notifier;
use crate::types::{CompanyId, CustomerId, EngineError, Transaction};

/// Notifier that writes notifications to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn notify(
        &self,
        customer_id: CustomerId,
        title: &str,
        text: &str,
        linked_transaction: Option<&Transaction>,
    ) -> Result<(), EngineError> {
        info!(
            customer_id = %customer_id,
            title = %title,
            text = %text,
            reference = linked_transaction.map(|tx| tx.reference.as_str()).unwrap_or("-"),
            "Customer notification"
        );
        Ok(())
    }

    async fn email_company(&self, company_id: CompanyId, subject: &str, body: &str) -> Result<(), EngineError> {
        info!(company_id = %company_id, subject = %subject, body = %body, "Company e-mail");
        Ok(())
    }
}

/// A notification captured by [`RecordingNotifier`]
#[derive(Debug, Clone, PartialEq)]
pub enum SentNotification {
    Customer {
        customer_id: CustomerId,
        title: String,
        text: String,
        reference: Option<String>,
    },
    Company {
        company_id: CompanyId,
        subject: String,
        body: String,
    },
}

/// Notifier that records everything it is asked to send
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<SentNotification>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<SentNotification> {
        self.sent
            .lock()
            .map(|sent| sent.clone())
            .unwrap_or_default()
    }

    /// Titles of customer notifications, in send order
    pub fn customer_titles(&self) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter_map(|notification| match notification {
                SentNotification::Customer { title, .. } => Some(title),
                SentNotification::Company { .. } => None,
            })
            .collect()
    }

    fn push(&self, notification: SentNotification) -> Result<(), EngineError> {
        self.sent
            .lock()
            .map_err(|_| EngineError::persistence("notification log poisoned"))?
            .push(notification);
        Ok(())
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(
        &self,
        customer_id: CustomerId,
        title: &str,
        text: &str,
        linked_transaction: Option<&Transaction>,
    ) -> Result<(), EngineError> {
        self.push(SentNotification::Customer {
            customer_id,
            title: title.to_string(),
            text: text.to_string(),
            reference: linked_transaction.map(|tx| tx.reference.clone()),
        })
    }

    async fn email_company(&self, company_id: CompanyId, subject: &str, body: &str) -> Result<(), EngineError> {
        self.push(SentNotification::Company {
            company_id,
            subject: subject.to_string(),
            body: body.to_string(),
        })
    }
}

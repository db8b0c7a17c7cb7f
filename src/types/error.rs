//! Error types for the card issuance engine
//!
//! This module defines every error that can surface while issuing cards,
//! reconciling provider webhooks, or synchronizing balances.
//!
//! # Error Categories
//!
//! Each variant belongs to exactly one [`ErrorKind`], which drives how the
//! orchestrator recovers:
//!
//! - **Local validation**: bad input, incomplete KYC, unknown entities
//! - **Insufficient funds**: wallet cannot cover fee + initial balance
//! - **Provider transport**: the external call itself failed (or was rejected)
//! - **Provider timeout**: the outcome of an external call is unknown
//! - **Data persistence**: a local write failed after an external effect
//! - **Webhook processing**: malformed or unexpected inbound event
//! - **Unavailable**: the correlator is refusing work (circuit open, shutdown)

use rust_decimal::Decimal;
use thiserror::Error;

/// Recovery category of an [`EngineError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    LocalValidation,
    InsufficientFunds,
    ProviderTransport,
    ProviderTimeout,
    DataPersistence,
    WebhookProcessing,
    Unavailable,
}

/// Main error type for the card issuance engine
///
/// Cloneable and comparable so that outcomes carrying an error can be
/// broadcast to waiters and asserted on in tests.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    /// Request failed a local validation rule
    #[error("Validation failed: {message}")]
    Validation {
        /// Description of the rule that failed
        message: String,
    },

    /// Customer is missing fields required by the provider's KYC rules
    #[error("Customer {customer} has incomplete KYC: missing {}", missing.join(", "))]
    IncompleteKyc {
        /// Customer identifier
        customer: String,
        /// Names of the missing or invalid fields
        missing: Vec<String>,
    },

    /// A referenced entity does not exist
    #[error("{entity} {id} not found")]
    NotFound {
        /// Entity kind (card, wallet, customer, ...)
        entity: String,
        /// Identifier that was looked up
        id: String,
    },

    /// Wallet cannot cover the requested reservation
    #[error("Insufficient funds in wallet {wallet}: available {available}, requested {requested}")]
    InsufficientFunds {
        /// Wallet identifier
        wallet: String,
        /// Balance at the time of the check
        available: Decimal,
        /// Amount that was requested
        requested: Decimal,
    },

    /// The provider call failed at the transport layer
    #[error("Provider transport error during {operation}: {message}")]
    ProviderTransport {
        /// Provider operation (create_card, withdraw, ...)
        operation: String,
        /// Underlying error description
        message: String,
    },

    /// The provider answered but reported a business failure
    #[error("Provider rejected {operation}: {message}")]
    ProviderRejected {
        /// Provider operation
        operation: String,
        /// Message returned by the provider
        message: String,
    },

    /// No provider confirmation arrived in time
    #[error("Timed out after {waited_ms}ms waiting for provider confirmation of {reference}")]
    ProviderTimeout {
        /// Correlation reference
        reference: String,
        /// How long the caller waited
        waited_ms: u64,
    },

    /// A local write failed
    #[error("Persistence error: {message}")]
    DataPersistence {
        /// Description of the failed write
        message: String,
    },

    /// An inbound webhook could not be processed
    #[error("Webhook processing error: {message}")]
    WebhookProcessing {
        /// Description of the problem
        message: String,
    },

    /// Card status change violates the status machine
    #[error("Card {card} cannot transition from {from} to {to}")]
    InvalidStatusTransition {
        /// Card identifier
        card: String,
        /// Current status
        from: String,
        /// Requested status
        to: String,
    },

    /// A webhook wait is already registered for this reference
    #[error("A webhook wait is already registered for reference {reference}")]
    DuplicateWait {
        /// Correlation reference
        reference: String,
    },

    /// Correlator circuit breaker is open
    #[error("Webhook correlator unavailable, retry in {retry_after_ms}ms")]
    CorrelatorUnavailable {
        /// Remaining cooldown
        retry_after_ms: u64,
    },

    /// The engine is shutting down and refuses new work
    #[error("Service shutting down")]
    ShuttingDown,

    /// Balance arithmetic overflowed
    #[error("Arithmetic overflow in {operation}")]
    ArithmeticOverflow {
        /// Operation that overflowed
        operation: String,
    },

    /// Configuration could not be loaded
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the problem
        message: String,
    },

    /// I/O error while reading or writing files
    #[error("I/O error: {message}")]
    Io {
        /// Description of the I/O error
        message: String,
    },

    /// CSV or JSON parsing error
    #[error("Parse error{}: {message}", line.map(|l| format!(" at line {}", l)).unwrap_or_default())]
    Parse {
        /// Line number where the error occurred (if available)
        line: Option<u64>,
        /// Description of the parsing error
        message: String,
    },
}

impl EngineError {
    /// Recovery category of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::Validation { .. }
            | EngineError::IncompleteKyc { .. }
            | EngineError::NotFound { .. }
            | EngineError::InvalidStatusTransition { .. }
            | EngineError::Config { .. }
            | EngineError::Io { .. }
            | EngineError::Parse { .. } => ErrorKind::LocalValidation,
            EngineError::InsufficientFunds { .. } => ErrorKind::InsufficientFunds,
            EngineError::ProviderTransport { .. } | EngineError::ProviderRejected { .. } => {
                ErrorKind::ProviderTransport
            }
            EngineError::ProviderTimeout { .. } => ErrorKind::ProviderTimeout,
            EngineError::DataPersistence { .. } | EngineError::ArithmeticOverflow { .. } => {
                ErrorKind::DataPersistence
            }
            EngineError::WebhookProcessing { .. } => ErrorKind::WebhookProcessing,
            EngineError::DuplicateWait { .. }
            | EngineError::CorrelatorUnavailable { .. }
            | EngineError::ShuttingDown => ErrorKind::Unavailable,
        }
    }

    /// Whether an external side effect may already have happened
    ///
    /// Only timeouts and post-call persistence failures leave the provider
    /// side in an unknown state.
    pub fn has_external_effect(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::ProviderTimeout | ErrorKind::DataPersistence
        )
    }

    /// Create a Validation error
    pub fn validation(message: impl Into<String>) -> Self {
        EngineError::Validation {
            message: message.into(),
        }
    }

    /// Create a NotFound error
    pub fn not_found(entity: &str, id: impl ToString) -> Self {
        EngineError::NotFound {
            entity: entity.to_string(),
            id: id.to_string(),
        }
    }

    /// Create an InsufficientFunds error
    pub fn insufficient_funds(wallet: impl ToString, available: Decimal, requested: Decimal) -> Self {
        EngineError::InsufficientFunds {
            wallet: wallet.to_string(),
            available,
            requested,
        }
    }

    /// Create a ProviderTransport error
    pub fn provider_transport(operation: &str, message: impl Into<String>) -> Self {
        EngineError::ProviderTransport {
            operation: operation.to_string(),
            message: message.into(),
        }
    }

    /// Create a ProviderRejected error
    pub fn provider_rejected(operation: &str, message: impl Into<String>) -> Self {
        EngineError::ProviderRejected {
            operation: operation.to_string(),
            message: message.into(),
        }
    }

    /// Create a ProviderTimeout error
    pub fn provider_timeout(reference: &str, waited_ms: u64) -> Self {
        EngineError::ProviderTimeout {
            reference: reference.to_string(),
            waited_ms,
        }
    }

    /// Create a DataPersistence error
    pub fn persistence(message: impl Into<String>) -> Self {
        EngineError::DataPersistence {
            message: message.into(),
        }
    }

    /// Create a WebhookProcessing error
    pub fn webhook(message: impl Into<String>) -> Self {
        EngineError::WebhookProcessing {
            message: message.into(),
        }
    }

    /// Create an InvalidStatusTransition error
    pub fn invalid_transition(card: impl ToString, from: impl ToString, to: impl ToString) -> Self {
        EngineError::InvalidStatusTransition {
            card: card.to_string(),
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    /// Create an ArithmeticOverflow error
    pub fn arithmetic_overflow(operation: &str) -> Self {
        EngineError::ArithmeticOverflow {
            operation: operation.to_string(),
        }
    }
}

impl From<std::io::Error> for EngineError {
    fn from(error: std::io::Error) -> Self {
        EngineError::Io {
            message: error.to_string(),
        }
    }
}

impl From<csv::Error> for EngineError {
    fn from(error: csv::Error) -> Self {
        let line = error.position().map(|pos| pos.line());

        EngineError::Parse {
            line,
            message: error.to_string(),
        }
    }
}

impl From<csv_async::Error> for EngineError {
    fn from(error: csv_async::Error) -> Self {
        EngineError::Parse {
            line: None,
            message: error.to_string(),
        }
    }
}

impl From<reqwest::Error> for EngineError {
    fn from(error: reqwest::Error) -> Self {
        let operation = error
            .url()
            .map(|url| url.path().to_string())
            .unwrap_or_else(|| "request".to_string());

        EngineError::ProviderTransport {
            operation,
            message: error.to_string(),
        }
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(error: serde_json::Error) -> Self {
        EngineError::Parse {
            line: Some(error.line() as u64),
            message: error.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::validation(
        EngineError::validation("initial balance must be positive"),
        "Validation failed: initial balance must be positive"
    )]
    #[case::incomplete_kyc(
        EngineError::IncompleteKyc { customer: "c-1".to_string(), missing: vec!["dob".to_string(), "phone".to_string()] },
        "Customer c-1 has incomplete KYC: missing dob, phone"
    )]
    #[case::not_found(EngineError::not_found("card", "abc"), "card abc not found")]
    #[case::insufficient_funds(
        EngineError::insufficient_funds("w-1", Decimal::new(5000, 2), Decimal::new(5100, 2)),
        "Insufficient funds in wallet w-1: available 50.00, requested 51.00"
    )]
    #[case::transport(
        EngineError::provider_transport("create_card", "connection reset"),
        "Provider transport error during create_card: connection reset"
    )]
    #[case::timeout(
        EngineError::provider_timeout("ref-1", 100),
        "Timed out after 100ms waiting for provider confirmation of ref-1"
    )]
    #[case::parse_with_line(
        EngineError::Parse { line: Some(3), message: "bad row".to_string() },
        "Parse error at line 3: bad row"
    )]
    #[case::parse_without_line(
        EngineError::Parse { line: None, message: "bad row".to_string() },
        "Parse error: bad row"
    )]
    fn test_error_display(#[case] error: EngineError, #[case] expected: &str) {
        assert_eq!(error.to_string(), expected);
    }

    #[rstest]
    #[case::validation(EngineError::validation("x"), ErrorKind::LocalValidation, false)]
    #[case::funds(
        EngineError::insufficient_funds("w", Decimal::ZERO, Decimal::ONE),
        ErrorKind::InsufficientFunds,
        false
    )]
    #[case::transport(EngineError::provider_transport("op", "x"), ErrorKind::ProviderTransport, false)]
    #[case::rejected(EngineError::provider_rejected("op", "x"), ErrorKind::ProviderTransport, false)]
    #[case::timeout(EngineError::provider_timeout("r", 1), ErrorKind::ProviderTimeout, true)]
    #[case::persistence(EngineError::persistence("x"), ErrorKind::DataPersistence, true)]
    #[case::webhook(EngineError::webhook("x"), ErrorKind::WebhookProcessing, false)]
    #[case::shutdown(EngineError::ShuttingDown, ErrorKind::Unavailable, false)]
    fn test_error_kind(
        #[case] error: EngineError,
        #[case] kind: ErrorKind,
        #[case] external_effect: bool,
    ) {
        assert_eq!(error.kind(), kind);
        assert_eq!(error.has_external_effect(), external_effect);
    }

    #[test]
    fn test_io_error_conversion() {
        let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "seed.csv missing");
        let error: EngineError = io_error.into();
        assert_eq!(error.to_string(), "I/O error: seed.csv missing");
    }

    #[test]
    fn test_json_error_conversion_keeps_line() {
        let json_error = serde_json::from_str::<serde_json::Value>("{\n\"a\": }").unwrap_err();
        let error: EngineError = json_error.into();
        assert!(matches!(error, EngineError::Parse { line: Some(2), .. }));
    }
}

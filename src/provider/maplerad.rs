//! Maplerad issuing API client
//!
//! Every Maplerad response is wrapped in `{ "status": bool, "message": ..,
//! "data": .. }`. A 2xx answer with `status: false` is a business failure,
//! not a transport failure: card creation and enrollment surface it as
//! [`EngineError::ProviderRejected`], while withdraw and terminate return it
//! as an unsuccessful [`ProviderResult`] for the caller to inspect.
//!
//! Amounts cross the wire in minor units.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use crate::core::traits::{CardProvider, CardSpec, CreateCardAck, EnrollmentRequest, ProviderResult};
use crate::types::webhook::{to_major_units, to_minor_units};
use crate::types::EngineError;

pub const DEFAULT_BASE_URL: &str = "https://sandbox.api.maplerad.com/v1";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Whole number of minor units for the wire
fn minor_units(operation: &str, amount: Decimal) -> Result<i64, EngineError> {
    to_minor_units(amount)
        .to_i64()
        .ok_or_else(|| EngineError::validation(format!("{} amount {} out of range", operation, amount)))
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    status: bool,
    message: Option<String>,
    data: Option<T>,
}

impl<T> Envelope<T> {
    fn message_or(&self, status: StatusCode) -> String {
        self.message
            .clone()
            .unwrap_or_else(|| format!("HTTP {}", status.as_u16()))
    }
}

#[derive(Debug, Deserialize)]
struct ReferenceData {
    #[serde(default)]
    reference: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CardData {
    /// Minor units
    balance: Decimal,
}

#[derive(Debug, Deserialize)]
struct CustomerData {
    id: String,
}

/// HTTP client for the Maplerad issuing API
#[derive(Debug, Clone)]
pub struct MapleradClient {
    http: Client,
    base_url: String,
    secret_key: String,
}

impl MapleradClient {
    pub fn new(base_url: impl Into<String>, secret_key: impl Into<String>) -> Result<Self, EngineError> {
        Self::with_timeout(base_url, secret_key, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(
        base_url: impl Into<String>,
        secret_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, EngineError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| EngineError::Config {
                message: format!("failed to build HTTP client: {}", e),
            })?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            secret_key: secret_key.into(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Send a request and decode the envelope
    ///
    /// Connection failures, 5xx answers and undecodable bodies are transport
    /// errors; everything else is handed back with its HTTP status.
    async fn send<T: DeserializeOwned>(
        &self,
        operation: &str,
        request: RequestBuilder,
    ) -> Result<(StatusCode, Envelope<T>), EngineError> {
        let response = request
            .bearer_auth(&self.secret_key)
            .send()
            .await
            .map_err(|e| EngineError::provider_transport(operation, e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| EngineError::provider_transport(operation, e.to_string()))?;

        debug!(operation, status = status.as_u16(), "Maplerad response received");

        if status.is_server_error() {
            return Err(EngineError::provider_transport(
                operation,
                format!("HTTP {}: {}", status.as_u16(), body),
            ));
        }

        let envelope = serde_json::from_str::<Envelope<T>>(&body).map_err(|e| {
            EngineError::provider_transport(operation, format!("invalid response body: {}", e))
        })?;
        Ok((status, envelope))
    }

    /// Like [`send`](Self::send) but any business failure is an error
    async fn send_strict<T: DeserializeOwned>(
        &self,
        operation: &str,
        request: RequestBuilder,
    ) -> Result<T, EngineError> {
        let (status, envelope) = self.send::<T>(operation, request).await?;
        if !status.is_success() || !envelope.status {
            let message = envelope.message_or(status);
            warn!(operation, status = status.as_u16(), message = %message, "Maplerad rejected request");
            return Err(EngineError::provider_rejected(operation, message));
        }
        envelope
            .data
            .ok_or_else(|| EngineError::provider_transport(operation, "response has no data"))
    }

    async fn send_result(&self, operation: &str, request: RequestBuilder) -> Result<ProviderResult, EngineError> {
        let (status, envelope) = self.send::<ReferenceData>(operation, request).await?;
        let success = status.is_success() && envelope.status;
        let message = envelope.message_or(status);
        if !success {
            warn!(operation, status = status.as_u16(), message = %message, "Maplerad reported failure");
        }

        Ok(ProviderResult {
            success,
            message,
            reference: envelope.data.and_then(|data| data.reference),
        })
    }
}

#[async_trait]
impl CardProvider for MapleradClient {
    async fn create_card(&self, spec: CardSpec) -> Result<CreateCardAck, EngineError> {
        let payload = json!({
            "customer_id": spec.provider_customer_id,
            "currency": spec.currency,
            "type": "VIRTUAL",
            "auto_approve": true,
            "brand": spec.brand.to_string(),
            "amount": minor_units("create_card", spec.amount)?,
            "reference": spec.reference,
        });

        let data: ReferenceData = self
            .send_strict("create_card", self.http.post(self.url("/issuing")).json(&payload))
            .await?;

        Ok(CreateCardAck {
            reference: data.reference.unwrap_or(spec.reference),
        })
    }

    async fn withdraw(&self, external_card_id: &str, amount: Decimal) -> Result<ProviderResult, EngineError> {
        let payload = json!({ "amount": minor_units("withdraw", amount)? });
        let url = self.url(&format!("/issuing/{}/unload", external_card_id));
        self.send_result("withdraw", self.http.post(url).json(&payload)).await
    }

    async fn terminate(&self, external_card_id: &str) -> Result<ProviderResult, EngineError> {
        let url = self.url(&format!("/issuing/{}/terminate", external_card_id));
        self.send_result("terminate", self.http.patch(url)).await
    }

    async fn get_balance(&self, external_card_id: &str) -> Result<Decimal, EngineError> {
        let url = self.url(&format!("/issuing/{}", external_card_id));
        let card: CardData = self.send_strict("get_balance", self.http.get(url)).await?;
        Ok(to_major_units(card.balance))
    }

    async fn enroll_customer(&self, request: EnrollmentRequest) -> Result<String, EngineError> {
        let payload = json!({
            "first_name": request.first_name,
            "last_name": request.last_name,
            "email": request.email,
            "country": request.country,
            "dob": request.dob,
            "phone": {
                "phone_country_code": request.phone_country_code,
                "phone_number": request.phone_number,
            },
            "identification_number": request.identity_number,
            "identity": {
                "type": request.identity_type,
                "number": request.identity_number,
                "image": request.identity_image,
                "country": request.country,
            },
            "address": {
                "street": request.street,
                "city": request.city,
                "state": request.state,
                "country": request.country,
                "postal_code": request.postal_code,
            },
        });

        let customer: CustomerData = self
            .send_strict("enroll_customer", self.http.post(self.url("/customers/enroll")).json(&payload))
            .await?;
        Ok(customer.id)
    }
}

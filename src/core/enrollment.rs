//! Customer enrollment with the provider
//!
//! Before a card can be issued the customer must be registered with the
//! provider, which enforces its own KYC rules. This module checks that every
//! required field is present, translates local vocabulary (country names,
//! identity document types, phone numbers) into the provider's, and enrolls
//! the customer once, remembering the provider customer id.

use std::sync::Arc;

use tracing::info;

use super::traits::{CardProvider, EnrollmentRequest, LedgerStore};
use crate::types::{Customer, EngineError, IdentityDocumentType};

/// ISO alpha-2, ISO alpha-3, English name, dialling code
const COUNTRIES: &[(&str, &str, &str, &str)] = &[
    ("NG", "NGA", "nigeria", "234"),
    ("GH", "GHA", "ghana", "233"),
    ("KE", "KEN", "kenya", "254"),
    ("ZA", "ZAF", "south africa", "27"),
    ("UG", "UGA", "uganda", "256"),
    ("RW", "RWA", "rwanda", "250"),
    ("TZ", "TZA", "tanzania", "255"),
    ("CM", "CMR", "cameroon", "237"),
    ("SN", "SEN", "senegal", "221"),
    ("CI", "CIV", "cote d'ivoire", "225"),
    ("US", "USA", "united states", "1"),
    ("GB", "GBR", "united kingdom", "44"),
    ("CA", "CAN", "canada", "1"),
    ("FR", "FRA", "france", "33"),
];

/// Extra spellings mapped onto an alpha-2 code
const COUNTRY_ALIASES: &[(&str, &str)] = &[
    ("united states of america", "US"),
    ("uk", "GB"),
    ("great britain", "GB"),
    ("ivory coast", "CI"),
    ("côte d'ivoire", "CI"),
];

/// Map a locally entered country (name, alpha-2 or alpha-3) to ISO alpha-2
pub fn country_code(country: &str) -> Option<&'static str> {
    let needle = country.trim().to_lowercase();
    if needle.is_empty() {
        return None;
    }

    COUNTRIES
        .iter()
        .find(|(alpha2, alpha3, name, _)| {
            needle.eq_ignore_ascii_case(alpha2) || needle.eq_ignore_ascii_case(alpha3) || needle == *name
        })
        .map(|(alpha2, ..)| *alpha2)
        .or_else(|| {
            COUNTRY_ALIASES
                .iter()
                .find(|(alias, _)| needle == *alias)
                .map(|(_, alpha2)| *alpha2)
        })
}

fn dialling_code(alpha2: &str) -> Option<&'static str> {
    COUNTRIES
        .iter()
        .find(|(code, ..)| *code == alpha2)
        .map(|(.., dial)| *dial)
}

/// Provider vocabulary for identity documents
pub fn provider_identity_type(doc_type: IdentityDocumentType) -> &'static str {
    match doc_type {
        IdentityDocumentType::Passport => "PASSPORT",
        IdentityDocumentType::NationalId => "NIN",
        IdentityDocumentType::DriversLicense => "DRIVERS_LICENSE",
        IdentityDocumentType::VoterCard => "VOTERS_CARD",
    }
}

/// Split a phone number into `(+dialling code, national number)`
///
/// Accepts international (`+234 801 234 5678`) and national
/// (`0801 234 5678`) forms; the country decides the dialling code.
pub fn split_phone(phone: &str, alpha2: &str) -> Option<(String, String)> {
    let dial = dialling_code(alpha2)?;
    let international = phone.trim_start().starts_with('+');
    let digits: String = phone.chars().filter(char::is_ascii_digit).collect();

    let national = if international {
        digits.strip_prefix(dial)?.to_string()
    } else {
        digits.trim_start_matches('0').to_string()
    };

    if national.len() < 6 {
        return None;
    }
    Some((format!("+{}", dial), national))
}

/// Names of required KYC fields that are missing or invalid
pub fn missing_kyc_fields(customer: &Customer) -> Vec<String> {
    let mut missing = Vec::new();
    let blank = |value: &str| value.trim().is_empty();

    if blank(&customer.first_name) {
        missing.push("first_name");
    }
    if blank(&customer.last_name) {
        missing.push("last_name");
    }
    if !customer.email.contains('@') {
        missing.push("email");
    }

    let country = country_code(&customer.country);
    if country.is_none() {
        missing.push("country");
    }
    if country.and_then(|code| split_phone(&customer.phone, code)).is_none() {
        missing.push("phone");
    }
    if customer.date_of_birth.is_none() {
        missing.push("date_of_birth");
    }
    match &customer.identity {
        Some(identity) if !blank(&identity.number) => {}
        _ => missing.push("identity_document"),
    }
    match &customer.address {
        Some(address) if !blank(&address.street) && !blank(&address.city) && !blank(&address.state) => {}
        _ => missing.push("address"),
    }

    missing.into_iter().map(str::to_string).collect()
}

/// Check that a customer satisfies the provider's KYC requirements
pub fn validate_kyc(customer: &Customer) -> Result<(), EngineError> {
    let missing = missing_kyc_fields(customer);
    if missing.is_empty() {
        Ok(())
    } else {
        Err(EngineError::IncompleteKyc {
            customer: customer.id.to_string(),
            missing,
        })
    }
}

/// Translate a validated customer into the provider's enrollment payload
pub fn build_enrollment_request(customer: &Customer) -> Result<EnrollmentRequest, EngineError> {
    validate_kyc(customer)?;

    let incomplete = || EngineError::IncompleteKyc {
        customer: customer.id.to_string(),
        missing: missing_kyc_fields(customer),
    };
    let country = country_code(&customer.country).ok_or_else(incomplete)?;
    let (phone_country_code, phone_number) = split_phone(&customer.phone, country).ok_or_else(incomplete)?;
    let dob = customer.date_of_birth.ok_or_else(incomplete)?;
    let identity = customer.identity.as_ref().ok_or_else(incomplete)?;
    let address = customer.address.as_ref().ok_or_else(incomplete)?;

    Ok(EnrollmentRequest {
        first_name: customer.first_name.trim().to_string(),
        last_name: customer.last_name.trim().to_string(),
        email: customer.email.trim().to_lowercase(),
        phone_country_code,
        phone_number,
        country: country.to_string(),
        dob: dob.format("%d-%m-%Y").to_string(),
        identity_type: provider_identity_type(identity.doc_type).to_string(),
        identity_number: identity.number.trim().to_string(),
        identity_image: identity.image_url.clone(),
        street: address.street.trim().to_string(),
        city: address.city.trim().to_string(),
        state: address.state.trim().to_string(),
        postal_code: address.postal_code.trim().to_string(),
    })
}

/// Enrolls customers with the provider on first issuance
#[derive(Clone)]
pub struct EnrollmentService {
    store: Arc<dyn LedgerStore>,
    provider: Arc<dyn CardProvider>,
}

impl EnrollmentService {
    pub fn new(store: Arc<dyn LedgerStore>, provider: Arc<dyn CardProvider>) -> Self {
        Self { store, provider }
    }

    /// Return the provider customer id, enrolling the customer if needed
    pub async fn ensure_enrolled(&self, customer: &Customer) -> Result<String, EngineError> {
        if let Some(existing) = &customer.provider_customer_id {
            return Ok(existing.clone());
        }

        let request = build_enrollment_request(customer)?;
        let provider_customer_id = self.provider.enroll_customer(request).await?;
        self.store
            .set_provider_customer_id(customer.id, &provider_customer_id)
            .await?;

        info!(
            customer_id = %customer.id,
            provider_customer_id = %provider_customer_id,
            "Customer enrolled with provider"
        );
        Ok(provider_customer_id)
    }
}

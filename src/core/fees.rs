//! Fee engine
//!
//! Computes issuance, payment-success and payment-failure fees (plus funding
//! and withdrawal fees) from a tiered schedule, then applies additive
//! discounts and converts the result into the target currency.
//!
//! # Algorithm
//!
//! 1. Select the tier `[min, max)` containing the amount for the fee kind
//! 2. Compute the base fee (fixed amount, or percentage of the amount)
//! 3. Compute each discount independently and sum them, capped at the base
//!    fee so the final fee is never negative
//! 4. Convert from USD to the requested currency through the rate table
//!
//! Any failure along the way (no matching tier, overflow, unknown currency)
//! degrades to the kind's default fixed fee. [`FeeEngine::calculate`] never
//! returns an error.
//!
//! # Schedule CSV
//!
//! ```text
//! kind,min,max,fee_type,value
//! issuance,0,,fixed,1.00
//! payment_success,0,100,fixed,0.20
//! payment_success,100,,percentage,0.5
//! ```
//!
//! An empty `max` means unbounded. Percentage values are in percent.

use std::collections::HashMap;
use std::fmt;
use std::io::Read;
use std::path::Path;
use std::str::FromStr;

use chrono::{Duration, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::traits::LedgerStore;
use crate::types::{CompanyId, CompanyTier, EngineError};

/// Currency every schedule is expressed in
pub const BASE_CURRENCY: &str = "USD";

/// Rolling window for the loyalty discount
pub const LOYALTY_WINDOW_DAYS: i64 = 30;

/// What a fee is charged for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeeKind {
    Issuance,
    PaymentSuccess,
    PaymentFailure,
    Funding,
    Withdrawal,
}

impl FeeKind {
    /// Fixed fee used whenever calculation cannot produce a result
    pub fn default_fee(self) -> Decimal {
        match self {
            FeeKind::Issuance => Decimal::new(100, 2),
            FeeKind::PaymentSuccess => Decimal::new(20, 2),
            FeeKind::PaymentFailure => Decimal::new(30, 2),
            FeeKind::Funding | FeeKind::Withdrawal => Decimal::ZERO,
        }
    }
}

impl fmt::Display for FeeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FeeKind::Issuance => "issuance",
            FeeKind::PaymentSuccess => "payment_success",
            FeeKind::PaymentFailure => "payment_failure",
            FeeKind::Funding => "funding",
            FeeKind::Withdrawal => "withdrawal",
        };
        f.write_str(s)
    }
}

impl FromStr for FeeKind {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "issuance" => Ok(FeeKind::Issuance),
            "payment_success" | "success" => Ok(FeeKind::PaymentSuccess),
            "payment_failure" | "failure" => Ok(FeeKind::PaymentFailure),
            "funding" => Ok(FeeKind::Funding),
            "withdrawal" => Ok(FeeKind::Withdrawal),
            other => Err(EngineError::validation(format!("unknown fee kind '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeeType {
    Fixed,
    /// Value is a percentage of the amount
    Percentage,
}

/// One row of a fee schedule
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeeTier {
    pub kind: FeeKind,
    /// Inclusive lower bound
    pub min: Decimal,
    /// Exclusive upper bound, `None` for unbounded
    pub max: Option<Decimal>,
    pub fee_type: FeeType,
    pub value: Decimal,
}

impl FeeTier {
    pub fn fixed(kind: FeeKind, min: Decimal, max: Option<Decimal>, value: Decimal) -> Self {
        Self {
            kind,
            min,
            max,
            fee_type: FeeType::Fixed,
            value,
        }
    }

    pub fn percentage(kind: FeeKind, min: Decimal, max: Option<Decimal>, percent: Decimal) -> Self {
        Self {
            kind,
            min,
            max,
            fee_type: FeeType::Percentage,
            value: percent,
        }
    }

    /// Whether `amount` falls into `[min, max)`
    pub fn contains(&self, amount: Decimal) -> bool {
        amount >= self.min && self.max.is_none_or(|max| amount < max)
    }

    /// Base fee for `amount` under this tier
    pub fn compute(&self, amount: Decimal) -> Result<Decimal, EngineError> {
        match self.fee_type {
            FeeType::Fixed => Ok(self.value),
            FeeType::Percentage => amount
                .checked_mul(self.value)
                .and_then(|scaled| scaled.checked_div(Decimal::ONE_HUNDRED))
                .map(round_money)
                .ok_or_else(|| EngineError::arithmetic_overflow("percentage fee")),
        }
    }

    fn validate(&self) -> Result<(), EngineError> {
        if self.min < Decimal::ZERO || self.value < Decimal::ZERO {
            return Err(EngineError::validation(format!(
                "{} tier has negative bounds or value",
                self.kind
            )));
        }
        if let Some(max) = self.max {
            if max <= self.min {
                return Err(EngineError::validation(format!(
                    "{} tier [{}, {}) is empty",
                    self.kind, self.min, max
                )));
            }
        }
        Ok(())
    }
}

/// Raw CSV row, decimals parsed from text
#[derive(Debug, Deserialize)]
struct FeeTierRow {
    kind: String,
    min: String,
    max: Option<String>,
    fee_type: String,
    value: String,
}

impl TryFrom<FeeTierRow> for FeeTier {
    type Error = EngineError;

    fn try_from(row: FeeTierRow) -> Result<Self, Self::Error> {
        let parse = |field: &str, value: &str| {
            Decimal::from_str(value.trim()).map_err(|e| {
                EngineError::validation(format!("invalid {} '{}': {}", field, value, e))
            })
        };

        let fee_type = match row.fee_type.trim().to_ascii_lowercase().as_str() {
            "fixed" => FeeType::Fixed,
            "percentage" | "percent" => FeeType::Percentage,
            other => return Err(EngineError::validation(format!("unknown fee type '{}'", other))),
        };
        let max = match row.max.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(max) => Some(parse("max", max)?),
        };

        Ok(FeeTier {
            kind: row.kind.parse()?,
            min: parse("min", &row.min)?,
            max,
            fee_type,
            value: parse("value", &row.value)?,
        })
    }
}

/// Tiered fee table for every fee kind
#[derive(Debug, Clone, PartialEq)]
pub struct FeeSchedule {
    tiers: Vec<FeeTier>,
}

impl Default for FeeSchedule {
    fn default() -> Self {
        let zero = Decimal::ZERO;
        let hundred = Decimal::ONE_HUNDRED;
        Self {
            tiers: vec![
                FeeTier::fixed(FeeKind::Issuance, zero, None, Decimal::new(100, 2)),
                FeeTier::fixed(FeeKind::PaymentSuccess, zero, Some(hundred), Decimal::new(20, 2)),
                FeeTier::percentage(FeeKind::PaymentSuccess, hundred, None, Decimal::new(5, 1)),
                FeeTier::fixed(FeeKind::PaymentFailure, zero, None, Decimal::new(30, 2)),
                FeeTier::fixed(FeeKind::Funding, zero, None, zero),
                FeeTier::fixed(FeeKind::Withdrawal, zero, None, zero),
            ],
        }
    }
}

impl FeeSchedule {
    /// Build a schedule from tiers, rejecting malformed rows
    pub fn new(tiers: Vec<FeeTier>) -> Result<Self, EngineError> {
        for tier in &tiers {
            tier.validate()?;
        }
        Ok(Self { tiers })
    }

    /// Load a schedule from CSV (`kind,min,max,fee_type,value`)
    pub fn from_reader<R: Read>(reader: R) -> Result<Self, EngineError> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(false)
            .from_reader(reader);

        let mut tiers = Vec::new();
        for row in csv_reader.deserialize::<FeeTierRow>() {
            tiers.push(FeeTier::try_from(row?)?);
        }

        Self::new(tiers)
    }

    pub fn from_path(path: &Path) -> Result<Self, EngineError> {
        let file = std::fs::File::open(path)?;
        Self::from_reader(file)
    }

    pub fn tiers(&self) -> &[FeeTier] {
        &self.tiers
    }

    /// First tier of `kind` containing `amount`
    pub fn find(&self, kind: FeeKind, amount: Decimal) -> Option<&FeeTier> {
        self.tiers
            .iter()
            .find(|tier| tier.kind == kind && tier.contains(amount))
    }
}

/// Units of each currency per one USD
#[derive(Debug, Clone, PartialEq)]
pub struct RateTable {
    rates: HashMap<String, Decimal>,
}

impl Default for RateTable {
    fn default() -> Self {
        Self::from_pairs([
            ("EUR", Decimal::new(92, 2)),
            ("GBP", Decimal::new(79, 2)),
            ("NGN", Decimal::new(1550, 0)),
            ("KES", Decimal::new(129, 0)),
            ("GHS", Decimal::new(1550, 2)),
        ])
    }
}

impl RateTable {
    pub fn from_pairs<'a>(pairs: impl IntoIterator<Item = (&'a str, Decimal)>) -> Self {
        Self {
            rates: pairs
                .into_iter()
                .map(|(code, rate)| (code.to_ascii_uppercase(), rate))
                .collect(),
        }
    }

    /// Convert a USD amount into `currency`
    pub fn convert(&self, usd_amount: Decimal, currency: &str) -> Result<Decimal, EngineError> {
        if currency.eq_ignore_ascii_case(BASE_CURRENCY) {
            return Ok(usd_amount);
        }
        let rate = self
            .rates
            .get(&currency.to_ascii_uppercase())
            .ok_or_else(|| EngineError::validation(format!("no exchange rate for {}", currency)))?;
        usd_amount
            .checked_mul(*rate)
            .map(round_money)
            .ok_or_else(|| EngineError::arithmetic_overflow("currency conversion"))
    }
}

/// Discount percentages and thresholds
#[derive(Debug, Clone, PartialEq)]
pub struct DiscountPolicy {
    /// Applied to the issuance fee of a company's first card
    pub first_card_percent: Decimal,
    pub premium_percent: Decimal,
    pub enterprise_percent: Decimal,
    /// Issuance requests of at least this many cards get the bulk discount
    pub bulk_threshold: u32,
    pub bulk_percent: Decimal,
    /// 30-day volume at or above which the loyalty discount applies
    pub loyalty_volume: Decimal,
    pub loyalty_percent: Decimal,
}

impl Default for DiscountPolicy {
    fn default() -> Self {
        Self {
            first_card_percent: Decimal::new(10, 0),
            premium_percent: Decimal::new(10, 0),
            enterprise_percent: Decimal::new(20, 0),
            bulk_threshold: 10,
            bulk_percent: Decimal::new(5, 0),
            loyalty_volume: Decimal::new(10_000, 0),
            loyalty_percent: Decimal::new(5, 0),
        }
    }
}

impl DiscountPolicy {
    /// Policy that never discounts
    pub fn none() -> Self {
        Self {
            first_card_percent: Decimal::ZERO,
            premium_percent: Decimal::ZERO,
            enterprise_percent: Decimal::ZERO,
            bulk_threshold: u32::MAX,
            bulk_percent: Decimal::ZERO,
            loyalty_volume: Decimal::MAX,
            loyalty_percent: Decimal::ZERO,
        }
    }

    fn tier_percent(&self, tier: CompanyTier) -> Decimal {
        match tier {
            CompanyTier::Standard => Decimal::ZERO,
            CompanyTier::Premium => self.premium_percent,
            CompanyTier::Enterprise => self.enterprise_percent,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscountKind {
    FirstCard,
    Tier,
    Bulk,
    Loyalty,
}

/// One applied discount
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Discount {
    pub kind: DiscountKind,
    /// Amount in USD
    pub amount: Decimal,
    pub description: String,
}

/// Company facts that drive discounts
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FeeContext {
    pub tier: CompanyTier,
    /// Cards the company already has
    pub cards_issued: usize,
    /// Cards in the current request
    pub bulk_count: u32,
    /// Successful issuance and funding volume over the last 30 days
    pub rolling_volume: Decimal,
}

impl FeeContext {
    /// Gather the context for `company_id` from the store
    pub async fn load(store: &dyn LedgerStore, company_id: CompanyId, bulk_count: u32) -> Self {
        let tier = store
            .company(company_id)
            .await
            .map(|company| company.tier)
            .unwrap_or_default();
        let since = Utc::now() - Duration::days(LOYALTY_WINDOW_DAYS);

        Self {
            tier,
            cards_issued: store.cards_issued(company_id).await,
            bulk_count,
            rolling_volume: store.volume_since(company_id, since).await,
        }
    }
}

/// Outcome of a fee calculation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeeResult {
    pub kind: FeeKind,
    /// Base fee in USD
    pub base_fee: Decimal,
    pub discounts: Vec<Discount>,
    /// Sum of discounts after capping, in USD
    pub total_discount: Decimal,
    /// Fee to charge, in `currency`
    pub final_fee: Decimal,
    pub currency: String,
    /// Human-readable calculation steps
    pub breakdown: Vec<String>,
    /// The default fee was used because calculation failed
    pub fallback: bool,
}

impl FeeResult {
    /// Default fee of `kind`, converted into `currency` when a rate exists
    ///
    /// Without a rate the fee stays in USD and is labelled as such.
    fn fallback(kind: FeeKind, currency: &str, reason: &str, rates: &RateTable) -> Self {
        let fee = kind.default_fee();
        let (final_fee, currency) = match rates.convert(fee, currency) {
            Ok(converted) => (converted, currency.to_ascii_uppercase()),
            Err(_) => (fee, BASE_CURRENCY.to_string()),
        };
        Self {
            kind,
            base_fee: fee,
            discounts: Vec::new(),
            total_discount: Decimal::ZERO,
            final_fee,
            breakdown: vec![format!("default {} fee {} {} ({})", kind, final_fee, currency, reason)],
            currency,
            fallback: true,
        }
    }
}

/// Fee calculator over a schedule, discount policy and rate table
#[derive(Debug, Clone, Default)]
pub struct FeeEngine {
    schedule: FeeSchedule,
    discounts: DiscountPolicy,
    rates: RateTable,
}

impl FeeEngine {
    pub fn new(schedule: FeeSchedule, discounts: DiscountPolicy, rates: RateTable) -> Self {
        Self {
            schedule,
            discounts,
            rates,
        }
    }

    /// Engine with the given schedule and default policy and rates
    pub fn with_schedule(schedule: FeeSchedule) -> Self {
        Self::new(schedule, DiscountPolicy::default(), RateTable::default())
    }

    pub fn schedule(&self) -> &FeeSchedule {
        &self.schedule
    }

    /// Calculate the fee for `amount`
    ///
    /// # Arguments
    ///
    /// * `company_id` - Company being charged (for logging)
    /// * `amount` - Amount the fee applies to, used for tier selection
    /// * `currency` - Currency of the returned fee
    /// * `kind` - What the fee is charged for
    /// * `context` - Company facts driving discounts
    ///
    /// # Returns
    ///
    /// A `FeeResult` whose `final_fee` is never negative. When calculation
    /// fails the result carries the default fee and `fallback` is set.
    pub fn calculate(
        &self,
        company_id: CompanyId,
        amount: Decimal,
        currency: &str,
        kind: FeeKind,
        context: &FeeContext,
    ) -> FeeResult {
        match self.try_calculate(amount, currency, kind, context) {
            Ok(result) => {
                debug!(
                    company_id = %company_id,
                    kind = %kind,
                    amount = %amount,
                    final_fee = %result.final_fee,
                    currency = %result.currency,
                    "Fee calculated"
                );
                result
            }
            Err(e) => {
                warn!(
                    company_id = %company_id,
                    kind = %kind,
                    amount = %amount,
                    error = %e,
                    "Fee calculation failed, using default fee"
                );
                FeeResult::fallback(kind, currency, &e.to_string(), &self.rates)
            }
        }
    }

    fn try_calculate(
        &self,
        amount: Decimal,
        currency: &str,
        kind: FeeKind,
        context: &FeeContext,
    ) -> Result<FeeResult, EngineError> {
        if amount < Decimal::ZERO {
            return Err(EngineError::validation("fee amount cannot be negative"));
        }

        let tier = self
            .schedule
            .find(kind, amount)
            .ok_or_else(|| EngineError::validation(format!("no {} tier for amount {}", kind, amount)))?;
        let base_fee = tier.compute(amount)?;

        let mut breakdown = vec![match tier.fee_type {
            FeeType::Fixed => format!("{} base fee {} (fixed)", kind, base_fee),
            FeeType::Percentage => format!("{} base fee {} ({}% of {})", kind, base_fee, tier.value, amount),
        }];

        let discounts = self.discounts_for(kind, base_fee, context)?;
        let requested: Decimal = discounts.iter().map(|discount| discount.amount).sum();
        let total_discount = requested.min(base_fee);
        for discount in &discounts {
            breakdown.push(format!("- {} ({})", discount.amount, discount.description));
        }
        if total_discount < requested {
            breakdown.push(format!("discounts capped at {}", total_discount));
        }

        let usd_fee = (base_fee - total_discount).max(Decimal::ZERO);
        let final_fee = self.rates.convert(usd_fee, currency)?;
        if !currency.eq_ignore_ascii_case(BASE_CURRENCY) {
            breakdown.push(format!("{} USD = {} {}", usd_fee, final_fee, currency.to_ascii_uppercase()));
        }

        Ok(FeeResult {
            kind,
            base_fee,
            discounts,
            total_discount,
            final_fee,
            currency: currency.to_ascii_uppercase(),
            breakdown,
            fallback: false,
        })
    }

    fn discounts_for(
        &self,
        kind: FeeKind,
        base_fee: Decimal,
        context: &FeeContext,
    ) -> Result<Vec<Discount>, EngineError> {
        let policy = &self.discounts;
        let mut discounts = Vec::new();

        let mut push = |kind: DiscountKind, percent: Decimal, description: String| -> Result<(), EngineError> {
            if percent <= Decimal::ZERO {
                return Ok(());
            }
            let amount = base_fee
                .checked_mul(percent)
                .and_then(|scaled| scaled.checked_div(Decimal::ONE_HUNDRED))
                .map(round_money)
                .ok_or_else(|| EngineError::arithmetic_overflow("discount"))?;
            if amount > Decimal::ZERO {
                discounts.push(Discount {
                    kind,
                    amount,
                    description,
                });
            }
            Ok(())
        };

        if kind == FeeKind::Issuance && context.cards_issued == 0 {
            push(
                DiscountKind::FirstCard,
                policy.first_card_percent,
                format!("first card {}%", policy.first_card_percent),
            )?;
        }

        let tier_percent = policy.tier_percent(context.tier);
        push(
            DiscountKind::Tier,
            tier_percent,
            format!("{:?} tier {}%", context.tier, tier_percent),
        )?;

        if kind == FeeKind::Issuance && context.bulk_count >= policy.bulk_threshold {
            push(
                DiscountKind::Bulk,
                policy.bulk_percent,
                format!("bulk of {} cards {}%", context.bulk_count, policy.bulk_percent),
            )?;
        }

        if context.rolling_volume >= policy.loyalty_volume {
            push(
                DiscountKind::Loyalty,
                policy.loyalty_percent,
                format!("30-day volume {} {}%", context.rolling_volume, policy.loyalty_percent),
            )?;
        }

        Ok(discounts)
    }
}

fn round_money(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

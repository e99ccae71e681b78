//! Operating-lease commitments restated as debt.
//!
//! Commitments for years 1–5 are discounted individually; the "6 and beyond"
//! balloon is spread over an implied number of years, annuitised and pushed
//! back five periods. The resulting debt is depreciated straight-line and the
//! gap between lease expense and that depreciation flows into operating income.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::error::ValuationError;
use crate::time_value::{discount_factor, pv_annuity};
use crate::types::{with_metadata, ComputationOutput, Money, Rate};
use crate::OrpheusResult;

/// Explicit commitment years before the balloon.
pub const EXPLICIT_YEARS: u32 = 5;

// ---------------------------------------------------------------------------
// Policy
// ---------------------------------------------------------------------------

/// When the explicit-year payments fall.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentTiming {
    /// Year t discounted t periods
    #[default]
    EndOfYear,
    /// Year t discounted t − 1 periods
    BeginningOfYear,
}

/// Which explicit years feed the average used to size the balloon.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddedYearsBasis {
    #[default]
    YearsOneToFive,
    YearsOneToFour,
}

impl EmbeddedYearsBasis {
    fn years(&self) -> usize {
        match self {
            Self::YearsOneToFive => 5,
            Self::YearsOneToFour => 4,
        }
    }
}

/// Rate used to discount lease commitments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LeaseDiscountRate {
    PretaxCostOfDebt,
    RiskFreePlusSpread { spread: Rate },
    Direct { rate: Rate },
}

impl Default for LeaseDiscountRate {
    fn default() -> Self {
        Self::PretaxCostOfDebt
    }
}

impl LeaseDiscountRate {
    pub fn resolve(&self, pretax_cost_of_debt: Rate, risk_free_rate: Rate) -> Rate {
        match self {
            Self::PretaxCostOfDebt => pretax_cost_of_debt,
            Self::RiskFreePlusSpread { spread } => risk_free_rate + spread,
            Self::Direct { rate } => *rate,
        }
    }

    /// True when the rate moves with the estimated cost of debt.
    pub fn tracks_cost_of_debt(&self) -> bool {
        matches!(self, Self::PretaxCostOfDebt)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LeasePolicy {
    #[serde(default)]
    pub discount_rate: LeaseDiscountRate,
    #[serde(default)]
    pub payment_timing: PaymentTiming,
    #[serde(default)]
    pub embedded_years_basis: EmbeddedYearsBasis,
}

// ---------------------------------------------------------------------------
// Input / output types
// ---------------------------------------------------------------------------

/// Lease commitments as disclosed in the filing footnotes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaseCommitments {
    /// Operating lease expense in the current year
    pub current_expense: Money,
    /// Commitments for years 1 through 5
    pub commitments: [Money; 5],
    /// Lump "year 6 and beyond" commitment
    #[serde(default)]
    pub beyond_year_five: Money,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaseScheduleRow {
    /// 1–5, or 6 for the balloon
    pub year: u32,
    pub commitment: Money,
    pub present_value: Money,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaseCapitalization {
    pub discount_rate: Rate,
    pub schedule: Vec<LeaseScheduleRow>,
    pub embedded_years: u32,
    /// Balloon divided by the embedded years
    pub annualized_balloon: Money,
    /// Debt-equivalent value of the commitments
    pub debt_value: Money,
    pub depreciation: Money,
    /// Add to pre-tax operating income
    pub operating_income_adjustment: Money,
    /// Imputed interest on the lease debt
    pub implied_interest: Money,
}

// ---------------------------------------------------------------------------
// Conversion
// ---------------------------------------------------------------------------

fn validate_commitments(leases: &LeaseCommitments) -> OrpheusResult<()> {
    if leases.current_expense < Decimal::ZERO {
        return Err(ValuationError::InvalidInput {
            field: "operating_leases.current_expense".into(),
            reason: "Lease expense cannot be negative".into(),
        });
    }
    if leases.commitments.iter().any(|c| *c < Decimal::ZERO) {
        return Err(ValuationError::InvalidInput {
            field: "operating_leases.commitments".into(),
            reason: "Lease commitments cannot be negative".into(),
        });
    }
    if leases.beyond_year_five < Decimal::ZERO {
        return Err(ValuationError::InvalidInput {
            field: "operating_leases.beyond_year_five".into(),
            reason: "Lease commitments cannot be negative".into(),
        });
    }
    Ok(())
}

/// round(balloon / average commitment), half away from zero.
pub fn embedded_years(leases: &LeaseCommitments, basis: EmbeddedYearsBasis) -> OrpheusResult<u32> {
    if leases.beyond_year_five.is_zero() {
        return Ok(0);
    }
    let n = basis.years();
    let total: Money = leases.commitments[..n].iter().copied().sum();
    let average = total / Decimal::from(n as u32);
    if average <= Decimal::ZERO {
        return Err(ValuationError::degenerate(
            "average lease commitment is zero but a year-6+ balloon is present",
        ));
    }
    let years = (leases.beyond_year_five / average)
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero);
    years.to_u32().ok_or_else(|| ValuationError::InvalidInput {
        field: "operating_leases.beyond_year_five".into(),
        reason: format!("Implied {years} embedded years is out of range"),
    })
}

/// Convert lease commitments into debt at `rate`.
pub fn capitalize_operating_leases(
    leases: &LeaseCommitments,
    rate: Rate,
    policy: &LeasePolicy,
) -> OrpheusResult<LeaseCapitalization> {
    validate_commitments(leases)?;
    if rate <= dec!(-1) {
        return Err(ValuationError::policy(
            "lease_discount_rate",
            "Lease discount rate must exceed -100%",
        ));
    }

    let mut schedule = Vec::with_capacity(6);
    let mut debt_value = Decimal::ZERO;
    for (i, commitment) in leases.commitments.iter().enumerate() {
        let year = i as u32 + 1;
        let periods = match policy.payment_timing {
            PaymentTiming::EndOfYear => year,
            PaymentTiming::BeginningOfYear => year - 1,
        };
        let pv = *commitment * discount_factor(rate, periods)?;
        debt_value += pv;
        schedule.push(LeaseScheduleRow {
            year,
            commitment: *commitment,
            present_value: pv,
        });
    }

    let embedded = embedded_years(leases, policy.embedded_years_basis)?;
    let annualized_balloon = if embedded > 0 {
        leases.beyond_year_five / Decimal::from(embedded)
    } else {
        leases.beyond_year_five
    };
    let balloon_pv = if embedded > 0 {
        pv_annuity(annualized_balloon, rate, embedded)? * discount_factor(rate, EXPLICIT_YEARS)?
    } else {
        annualized_balloon * discount_factor(rate, EXPLICIT_YEARS + 1)?
    };
    debt_value += balloon_pv;
    schedule.push(LeaseScheduleRow {
        year: EXPLICIT_YEARS + 1,
        commitment: leases.beyond_year_five,
        present_value: balloon_pv,
    });

    let depreciation = debt_value / Decimal::from(EXPLICIT_YEARS + embedded);
    let adjustment = leases.current_expense - depreciation;

    tracing::debug!(
        %debt_value,
        embedded,
        %adjustment,
        "operating leases capitalised"
    );

    Ok(LeaseCapitalization {
        discount_rate: rate,
        schedule,
        embedded_years: embedded,
        annualized_balloon,
        debt_value,
        depreciation,
        operating_income_adjustment: adjustment,
        implied_interest: debt_value * rate,
    })
}

/// Standalone lease conversion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaseDebtInput {
    pub leases: LeaseCommitments,
    /// Needed when the policy discounts at the cost of debt
    #[serde(default)]
    pub pretax_cost_of_debt: Option<Rate>,
    #[serde(default)]
    pub risk_free_rate: Rate,
    #[serde(default)]
    pub policy: LeasePolicy,
}

/// Lease conversion wrapped in the standard output envelope.
pub fn calculate_lease_debt(
    input: &LeaseDebtInput,
) -> OrpheusResult<ComputationOutput<LeaseCapitalization>> {
    let kd = match (&input.policy.discount_rate, input.pretax_cost_of_debt) {
        (LeaseDiscountRate::PretaxCostOfDebt, None) => {
            return Err(ValuationError::missing("pretax_cost_of_debt"))
        }
        (_, kd) => kd.unwrap_or(Decimal::ZERO),
    };
    let rate = input.policy.discount_rate.resolve(kd, input.risk_free_rate);
    let result = capitalize_operating_leases(&input.leases, rate, &input.policy)?;

    let mut warnings = Vec::new();
    if result.operating_income_adjustment < Decimal::ZERO {
        warnings.push("Lease depreciation exceeds current lease expense".into());
    }

    Ok(with_metadata(
        "Operating leases converted to debt",
        &serde_json::json!({
            "discount_rate": rate.to_string(),
            "payment_timing": input.policy.payment_timing,
            "embedded_years_basis": input.policy.embedded_years_basis,
        }),
        warnings,
        result,
    ))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

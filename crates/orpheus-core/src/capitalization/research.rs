use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::ValuationError;
use crate::types::{with_metadata, ComputationOutput, Money};
use crate::OrpheusResult;

/// Useful life over which R&D spend is written off.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AmortizationLife {
    /// Three years
    Short,
    /// Five years
    #[default]
    Medium,
    /// Ten years
    Long,
    Custom(u32),
}

impl AmortizationLife {
    pub const MAX_YEARS: u32 = 10;

    pub fn years(&self) -> OrpheusResult<u32> {
        let n = match self {
            Self::Short => 3,
            Self::Medium => 5,
            Self::Long => 10,
            Self::Custom(n) => *n,
        };
        if n == 0 || n > Self::MAX_YEARS {
            return Err(ValuationError::policy(
                "research_amortization_life",
                format!(
                    "Amortization life must be between 1 and {} years, got {n}",
                    Self::MAX_YEARS
                ),
            ));
        }
        Ok(n)
    }
}

/// R&D spend, current year plus prior years with the most recent first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchHistory {
    pub current: Money,
    #[serde(default)]
    pub past: Vec<Money>,
}

impl ResearchHistory {
    /// Spend `years_ago` years back; 0 is the current year.
    pub fn spend(&self, years_ago: u32) -> Option<Money> {
        if years_ago == 0 {
            Some(self.current)
        } else {
            self.past.get(years_ago as usize - 1).copied()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchVintage {
    pub years_ago: u32,
    pub spend: Money,
    pub unamortized_fraction: Decimal,
    pub unamortized_value: Money,
    pub amortization_this_year: Money,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchCapitalization {
    pub method: String,
    pub life_years: u32,
    pub schedule: Vec<ResearchVintage>,
    /// Unamortized R&D treated as an operating asset
    pub research_asset: Money,
    pub amortization: Money,
    /// Add to pre-tax operating income
    pub operating_income_adjustment: Money,
    pub warnings: Vec<String>,
}

/// Policy for turning an R&D history into an asset and an earnings adjustment.
pub trait ResearchAmortization {
    fn name(&self) -> &str;

    fn capitalize(&self, history: &ResearchHistory) -> OrpheusResult<ResearchCapitalization>;
}

/// Each vintage written off evenly over the amortization life.
#[derive(Debug, Clone, Default)]
pub struct StraightLine {
    pub life: AmortizationLife,
}

impl ResearchAmortization for StraightLine {
    fn name(&self) -> &str {
        "Straight-line"
    }

    fn capitalize(&self, history: &ResearchHistory) -> OrpheusResult<ResearchCapitalization> {
        let n = self.life.years()?;
        if history.current < Decimal::ZERO || history.past.iter().any(|s| *s < Decimal::ZERO) {
            return Err(ValuationError::InvalidInput {
                field: "research_and_development".into(),
                reason: "R&D spend cannot be negative".into(),
            });
        }

        let mut warnings = Vec::new();
        let missing = (n as usize).saturating_sub(history.past.len());
        if missing > 0 {
            warnings.push(format!(
                "R&D history covers {} of {n} prior years; missing years treated as zero",
                history.past.len()
            ));
        }

        let life = Decimal::from(n);
        let mut schedule = Vec::with_capacity(n as usize + 1);
        let mut research_asset = Decimal::ZERO;
        let mut amortization = Decimal::ZERO;
        for k in 0..=n {
            let spend = history.spend(k).unwrap_or(Decimal::ZERO);
            let fraction = Decimal::from(n - k) / life;
            let unamortized = spend * fraction;
            let written_off = if k == 0 { Decimal::ZERO } else { spend / life };
            research_asset += unamortized;
            amortization += written_off;
            schedule.push(ResearchVintage {
                years_ago: k,
                spend,
                unamortized_fraction: fraction,
                unamortized_value: unamortized,
                amortization_this_year: written_off,
            });
        }

        tracing::debug!(%research_asset, %amortization, life = n, "R&D capitalised");

        Ok(ResearchCapitalization {
            method: self.name().to_string(),
            life_years: n,
            schedule,
            research_asset,
            amortization,
            operating_income_adjustment: history.current - amortization,
            warnings,
        })
    }
}

/// Standalone R&D capitalization wrapped in the standard output envelope.
pub fn calculate_research_asset(
    history: &ResearchHistory,
    life: AmortizationLife,
) -> OrpheusResult<ComputationOutput<ResearchCapitalization>> {
    let method = StraightLine { life };
    let mut result = method.capitalize(history)?;
    let warnings = std::mem::take(&mut result.warnings);
    Ok(with_metadata(
        "R&D capitalised and amortised straight-line",
        &serde_json::json!({ "life_years": result.life_years }),
        warnings,
        result,
    ))
}

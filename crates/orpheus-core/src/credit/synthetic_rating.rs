use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::ValuationError;
use crate::market_data::MarketTables;
use crate::types::{with_metadata, ComputationOutput, Money, Multiple, Rate};
use crate::OrpheusResult;

/// Coverage ratio reported when a firm has no interest expense.
pub const NO_INTEREST_SENTINEL: Decimal = dec!(1000000);

/// Coverage ratio reported when operating income is negative.
pub const NEGATIVE_EARNINGS_SENTINEL: Decimal = dec!(-100000);

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CreditRating {
    AAA,
    AA,
    #[serde(rename = "A+")]
    Ap,
    A,
    #[serde(rename = "A-")]
    Am,
    BBB,
    #[serde(rename = "BB+")]
    BBp,
    BB,
    #[serde(rename = "B+")]
    Bp,
    B,
    #[serde(rename = "B-")]
    Bm,
    CCC,
    CC,
    C,
    D,
}

impl std::fmt::Display for CreditRating {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::AAA => "AAA",
            Self::AA => "AA",
            Self::Ap => "A+",
            Self::A => "A",
            Self::Am => "A-",
            Self::BBB => "BBB",
            Self::BBp => "BB+",
            Self::BB => "BB",
            Self::Bp => "B+",
            Self::B => "B",
            Self::Bm => "B-",
            Self::CCC => "CCC",
            Self::CC => "CC",
            Self::C => "C",
            Self::D => "D",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for CreditRating {
    type Err = ValuationError;

    /// Accepts S&P symbols and the matching Moody's symbols (Aaa, Aa2, A1, ...).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let rating = match s.trim() {
            "AAA" | "Aaa" => Self::AAA,
            "AA" | "Aa2" => Self::AA,
            "A+" | "A1" => Self::Ap,
            "A" | "A2" => Self::A,
            "A-" | "A3" => Self::Am,
            "BBB" | "Baa2" => Self::BBB,
            "BB+" | "Ba1" => Self::BBp,
            "BB" | "Ba2" => Self::BB,
            "B+" | "B1" => Self::Bp,
            "B" | "B2" => Self::B,
            "B-" | "B3" => Self::Bm,
            "CCC" | "Caa" | "Caa/CCC" => Self::CCC,
            "CC" | "Ca2" => Self::CC,
            "C" | "C2" => Self::C,
            "D" | "D2" => Self::D,
            other => {
                return Err(ValuationError::InvalidInput {
                    field: "rating".into(),
                    reason: format!("Unrecognised credit rating '{other}'"),
                })
            }
        };
        Ok(rating)
    }
}

/// Selects which coverage-ratio table applies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum FirmSize {
    /// Market capitalisation above roughly $5bn
    #[default]
    Large,
    Small,
}

/// Interest coverage with its two sentinel cases kept apart from real ratios.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value")]
pub enum InterestCoverage {
    /// Interest expense is zero: treated as the top-tier rating.
    NoInterestExpense,
    /// Operating income is negative: treated as the bottom-tier rating.
    NegativeEarnings,
    Ratio(Multiple),
}

impl InterestCoverage {
    /// EBIT / interest, except zero interest and negative EBIT map to sentinels.
    pub fn from_ebit_and_interest(ebit: Money, interest_expense: Money) -> OrpheusResult<Self> {
        if interest_expense < Decimal::ZERO {
            return Err(ValuationError::InvalidInput {
                field: "interest_expense".into(),
                reason: "Interest expense cannot be negative".into(),
            });
        }
        if interest_expense.is_zero() {
            return Ok(Self::NoInterestExpense);
        }
        if ebit < Decimal::ZERO {
            return Ok(Self::NegativeEarnings);
        }
        Ok(Self::Ratio(ebit / interest_expense))
    }

    /// Numeric value used to index the rating table.
    pub fn lookup_value(&self) -> Decimal {
        match self {
            Self::NoInterestExpense => NO_INTEREST_SENTINEL,
            Self::NegativeEarnings => NEGATIVE_EARNINGS_SENTINEL,
            Self::Ratio(r) => *r,
        }
    }

    pub fn is_sentinel(&self) -> bool {
        !matches!(self, Self::Ratio(_))
    }
}

/// One step of the coverage → rating → spread function.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RatingBracket {
    /// Inclusive lower bound on interest coverage
    pub min_coverage: Decimal,
    pub rating: CreditRating,
    /// Default spread over the risk-free rate
    pub default_spread: Rate,
}

/// Coverage-ratio breakpoints in ascending order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RatingTable {
    pub brackets: Vec<RatingBracket>,
}

impl RatingTable {
    fn from_rows(rows: &[(Decimal, CreditRating, Rate)]) -> Self {
        Self {
            brackets: rows
                .iter()
                .map(|&(min_coverage, rating, default_spread)| RatingBracket {
                    min_coverage,
                    rating,
                    default_spread,
                })
                .collect(),
        }
    }

    /// Damodaran-style table for large, safer firms.
    pub fn damodaran_large_firm() -> Self {
        Self::from_rows(&[
            (dec!(-100000), CreditRating::D, dec!(0.1900)),
            (dec!(0.2), CreditRating::C, dec!(0.1550)),
            (dec!(0.65), CreditRating::CC, dec!(0.1178)),
            (dec!(0.8), CreditRating::CCC, dec!(0.0726)),
            (dec!(1.25), CreditRating::Bm, dec!(0.0426)),
            (dec!(1.5), CreditRating::B, dec!(0.0361)),
            (dec!(1.75), CreditRating::Bp, dec!(0.0314)),
            (dec!(2.0), CreditRating::BB, dec!(0.0221)),
            (dec!(2.25), CreditRating::BBp, dec!(0.0182)),
            (dec!(2.5), CreditRating::BBB, dec!(0.0147)),
            (dec!(3.0), CreditRating::Am, dec!(0.0121)),
            (dec!(4.25), CreditRating::A, dec!(0.0107)),
            (dec!(5.5), CreditRating::Ap, dec!(0.0092)),
            (dec!(6.5), CreditRating::AA, dec!(0.0070)),
            (dec!(8.5), CreditRating::AAA, dec!(0.0059)),
        ])
    }

    /// Damodaran-style table for smaller and riskier firms.
    pub fn damodaran_small_firm() -> Self {
        Self::from_rows(&[
            (dec!(-100000), CreditRating::D, dec!(0.1900)),
            (dec!(0.5), CreditRating::C, dec!(0.1550)),
            (dec!(0.8), CreditRating::CC, dec!(0.1178)),
            (dec!(1.25), CreditRating::CCC, dec!(0.0726)),
            (dec!(1.5), CreditRating::Bm, dec!(0.0426)),
            (dec!(2.0), CreditRating::B, dec!(0.0361)),
            (dec!(2.5), CreditRating::Bp, dec!(0.0314)),
            (dec!(3.0), CreditRating::BB, dec!(0.0221)),
            (dec!(3.5), CreditRating::BBp, dec!(0.0182)),
            (dec!(4.0), CreditRating::BBB, dec!(0.0147)),
            (dec!(4.5), CreditRating::Am, dec!(0.0121)),
            (dec!(6.0), CreditRating::A, dec!(0.0107)),
            (dec!(7.5), CreditRating::Ap, dec!(0.0092)),
            (dec!(9.5), CreditRating::AA, dec!(0.0070)),
            (dec!(12.5), CreditRating::AAA, dec!(0.0059)),
        ])
    }

    /// Breakpoints must be non-empty and strictly ascending.
    pub fn validate(&self) -> OrpheusResult<()> {
        if self.brackets.is_empty() {
            return Err(ValuationError::InvalidInput {
                field: "rating_table".into(),
                reason: "Rating table has no brackets".into(),
            });
        }
        for pair in self.brackets.windows(2) {
            if pair[1].min_coverage <= pair[0].min_coverage {
                return Err(ValuationError::InvalidInput {
                    field: "rating_table".into(),
                    reason: format!(
                        "Breakpoints must ascend: {} follows {}",
                        pair[1].min_coverage, pair[0].min_coverage
                    ),
                });
            }
        }
        Ok(())
    }

    /// Step-function lookup. A coverage equal to a breakpoint lands in the
    /// bracket starting there (the safer one); values under the first
    /// breakpoint land in the first bracket.
    pub fn lookup(&self, coverage: Decimal) -> OrpheusResult<&RatingBracket> {
        self.validate()?;
        let idx = self
            .brackets
            .iter()
            .rposition(|b| coverage >= b.min_coverage)
            .unwrap_or(0);
        Ok(&self.brackets[idx])
    }

    pub fn spread_for(&self, rating: CreditRating) -> OrpheusResult<Rate> {
        self.brackets
            .iter()
            .find(|b| b.rating == rating)
            .map(|b| b.default_spread)
            .ok_or_else(|| ValuationError::LookupMiss {
                table: "rating table".into(),
                key: rating.to_string(),
            })
    }
}

/// Rating inferred from interest coverage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyntheticRating {
    pub coverage: InterestCoverage,
    pub rating: CreditRating,
    pub default_spread: Rate,
    pub pretax_cost_of_debt: Rate,
}

/// How the pre-tax cost of debt is estimated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "approach", rename_all = "snake_case")]
pub enum CostOfDebtApproach {
    Direct { pretax_cost_of_debt: Rate },
    SyntheticRating {
        #[serde(default)]
        firm_size: FirmSize,
    },
    ActualRating { rating: CreditRating },
}

impl Default for CostOfDebtApproach {
    fn default() -> Self {
        Self::SyntheticRating {
            firm_size: FirmSize::Large,
        }
    }
}

impl CostOfDebtApproach {
    /// Only the synthetic approach reacts to EBIT and interest expense.
    pub fn depends_on_coverage(&self) -> bool {
        matches!(self, Self::SyntheticRating { .. })
    }
}

/// Result of resolving a [`CostOfDebtApproach`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostOfDebtEstimate {
    pub pretax_cost_of_debt: Rate,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rating: Option<CreditRating>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub synthetic: Option<SyntheticRating>,
}

/// Input for a standalone synthetic rating.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyntheticRatingInput {
    /// Operating income after lease and R&D adjustments
    pub ebit: Money,
    pub interest_expense: Money,
    pub risk_free_rate: Rate,
    #[serde(default)]
    pub firm_size: FirmSize,
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Map EBIT and interest expense to a rating and pre-tax cost of debt.
pub fn rate_firm(
    ebit: Money,
    interest_expense: Money,
    risk_free_rate: Rate,
    table: &RatingTable,
) -> OrpheusResult<SyntheticRating> {
    let coverage = InterestCoverage::from_ebit_and_interest(ebit, interest_expense)?;
    let bracket = table.lookup(coverage.lookup_value())?;
    Ok(SyntheticRating {
        coverage,
        rating: bracket.rating,
        default_spread: bracket.default_spread,
        pretax_cost_of_debt: risk_free_rate + bracket.default_spread,
    })
}

/// Resolve the pre-tax cost of debt for one of the supported approaches.
pub fn resolve_cost_of_debt(
    approach: &CostOfDebtApproach,
    ebit: Money,
    interest_expense: Money,
    risk_free_rate: Rate,
    tables: &MarketTables,
) -> OrpheusResult<CostOfDebtEstimate> {
    match approach {
        CostOfDebtApproach::Direct {
            pretax_cost_of_debt,
        } => {
            if *pretax_cost_of_debt < Decimal::ZERO {
                return Err(ValuationError::policy(
                    "pretax_cost_of_debt",
                    "Pre-tax cost of debt cannot be negative",
                ));
            }
            Ok(CostOfDebtEstimate {
                pretax_cost_of_debt: *pretax_cost_of_debt,
                rating: None,
                synthetic: None,
            })
        }
        CostOfDebtApproach::SyntheticRating { firm_size } => {
            let synthetic = rate_firm(
                ebit,
                interest_expense,
                risk_free_rate,
                tables.rating_table(*firm_size),
            )?;
            Ok(CostOfDebtEstimate {
                pretax_cost_of_debt: synthetic.pretax_cost_of_debt,
                rating: Some(synthetic.rating),
                synthetic: Some(synthetic),
            })
        }
        CostOfDebtApproach::ActualRating { rating } => {
            let spread = tables.large_firm_ratings.spread_for(*rating)?;
            Ok(CostOfDebtEstimate {
                pretax_cost_of_debt: risk_free_rate + spread,
                rating: Some(*rating),
                synthetic: None,
            })
        }
    }
}

/// Standalone synthetic rating wrapped in the standard output envelope.
pub fn calculate_synthetic_rating(
    input: &SyntheticRatingInput,
    tables: &MarketTables,
) -> OrpheusResult<ComputationOutput<SyntheticRating>> {
    let mut warnings = Vec::new();
    let rating = rate_firm(
        input.ebit,
        input.interest_expense,
        input.risk_free_rate,
        tables.rating_table(input.firm_size),
    )?;
    match rating.coverage {
        InterestCoverage::NoInterestExpense => {
            warnings.push("No interest expense: coverage set to the top-tier sentinel".into())
        }
        InterestCoverage::NegativeEarnings => {
            warnings.push("Negative operating income: coverage set to the default sentinel".into())
        }
        InterestCoverage::Ratio(_) => {}
    }
    Ok(with_metadata(
        "Synthetic rating from interest coverage",
        input,
        warnings,
        rating,
    ))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

//! One valuation run: inputs in, report out.
//!
//! Stages run in a fixed order. Lease debt and the synthetic rating depend on
//! each other (lease interest enters coverage, the rating sets the lease
//! discount rate), so they are solved together before the cost of capital.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::capitalization::operating_leases::{capitalize_operating_leases, LeaseCapitalization};
use crate::capitalization::research::{ResearchAmortization, ResearchCapitalization, StraightLine};
use crate::credit::synthetic_rating::{resolve_cost_of_debt, CostOfDebtEstimate};
use crate::derivatives::employee_options::{
    value_employee_options, DilutionAdjustedBlackScholes, OptionMarketInputs, OptionValuation,
};
use crate::error::ValuationError;
use crate::market_data::MarketTables;
use crate::types::{with_metadata, ComputationOutput, Currency, Money, Rate};
use crate::OrpheusResult;

use super::aggregation::{aggregate, EquityBridge, ValuationResult};
use super::cost_of_capital::{
    estimate_cost_of_capital, CapitalStructureResult, CostOfCapitalContext,
};
use super::inputs::InputRecord;
use super::projection::{project, ProjectionInputs, ProjectionTable};
use super::signal::{recommend, Recommendation};

/// Upper bound on lease/rating fixed-point iterations.
pub const MAX_RATING_ITERATIONS: u32 = 25;

/// Gap between trailing and assumed growth that earns a warning.
const GROWTH_GAP_WARNING: Rate = dec!(0.10);

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValuationReport {
    pub ticker: String,
    pub as_of: NaiveDate,
    pub currency: Currency,
    pub risk_free_rate: Rate,
    pub capital_structure: CapitalStructureResult,
    pub cost_of_debt: CostOfDebtEstimate,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub leases: Option<LeaseCapitalization>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub research: Option<ResearchCapitalization>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub options: Option<OptionValuation>,
    /// Base-year operating income after lease and R&D adjustments
    pub adjusted_operating_income: Money,
    pub projection: ProjectionTable,
    pub valuation: ValuationResult,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recommendation: Option<Recommendation>,
}

/// Stages shared by the full run and the standalone cost-of-capital estimate.
struct Upstream {
    risk_free_rate: Rate,
    research: Option<ResearchCapitalization>,
    cost_of_debt: CostOfDebtEstimate,
    leases: Option<LeaseCapitalization>,
    capital_structure: CapitalStructureResult,
}

impl Upstream {
    fn lease_debt(&self) -> Money {
        self.leases.as_ref().map_or(Decimal::ZERO, |l| l.debt_value)
    }

    fn operating_income_adjustment(&self) -> Money {
        self.leases.as_ref().map_or(Decimal::ZERO, |l| l.operating_income_adjustment)
            + self
                .research
                .as_ref()
                .map_or(Decimal::ZERO, |r| r.operating_income_adjustment)
    }
}

// ---------------------------------------------------------------------------
// Upstream stages
// ---------------------------------------------------------------------------

/// Solve the cost of debt and lease debt together.
///
/// Coverage uses EBIT plus the lease adjustment over interest plus implied
/// lease interest. Stops when the pre-tax cost of debt repeats. When the
/// rating flips between brackets, the highest cost of debt in the cycle is
/// kept and a warning is recorded.
pub fn resolve_debt_and_leases(
    record: &InputRecord,
    tables: &MarketTables,
    risk_free_rate: Rate,
    ebit: Money,
    warnings: &mut Vec<String>,
) -> OrpheusResult<(CostOfDebtEstimate, Option<LeaseCapitalization>)> {
    let approach = &record.policy.cost_of_debt;
    let interest = record.last_twelve_months.interest_expense;
    let estimate = resolve_cost_of_debt(approach, ebit, interest, risk_free_rate, tables)?;

    let Some(leases) = &record.operating_leases else {
        return Ok((estimate, None));
    };
    let policy = &record.policy.leases;
    let capitalize = |kd: Rate| {
        let rate = policy.discount_rate.resolve(kd, risk_free_rate);
        capitalize_operating_leases(leases, rate, policy)
    };
    let rerate = |capitalized: &LeaseCapitalization| {
        resolve_cost_of_debt(
            approach,
            ebit + capitalized.operating_income_adjustment,
            interest + capitalized.implied_interest,
            risk_free_rate,
            tables,
        )
    };

    let mut capitalized = capitalize(estimate.pretax_cost_of_debt)?;
    if !approach.depends_on_coverage() {
        return Ok((estimate, Some(capitalized)));
    }
    if !policy.discount_rate.tracks_cost_of_debt() {
        return Ok((rerate(&capitalized)?, Some(capitalized)));
    }

    // Estimates whose cost of debt priced the leases, in order.
    let mut history = vec![estimate];
    let mut last_delta = Decimal::ZERO;
    for iteration in 1..=MAX_RATING_ITERATIONS {
        let next = rerate(&capitalized)?;
        let current = history.last().map_or(Decimal::ZERO, |e| e.pretax_cost_of_debt);
        last_delta = (next.pretax_cost_of_debt - current).abs();
        if last_delta.is_zero() {
            tracing::debug!(
                iteration,
                kd = %next.pretax_cost_of_debt,
                "lease/rating fixed point"
            );
            return Ok((next, Some(capitalized)));
        }

        let repeat = history
            .iter()
            .position(|e| e.pretax_cost_of_debt == next.pretax_cost_of_debt);
        if let Some(start) = repeat {
            let chosen = history[start..]
                .iter()
                .max_by_key(|e| e.pretax_cost_of_debt)
                .cloned()
                .unwrap_or(next);
            let capitalized = capitalize(chosen.pretax_cost_of_debt)?;
            tracing::warn!(
                iteration,
                kd = %chosen.pretax_cost_of_debt,
                "lease/rating cycle; keeping the highest cost of debt"
            );
            warnings.push(format!(
                "Lease debt and synthetic rating cycle; using the higher cost of debt {}",
                chosen.pretax_cost_of_debt
            ));
            return Ok((chosen, Some(capitalized)));
        }

        capitalized = capitalize(next.pretax_cost_of_debt)?;
        history.push(next);
    }

    Err(ValuationError::ConvergenceFailure {
        function: "lease debt / synthetic rating".into(),
        iterations: MAX_RATING_ITERATIONS,
        last_delta,
    })
}

fn upstream(
    record: &InputRecord,
    tables: &MarketTables,
    warnings: &mut Vec<String>,
) -> OrpheusResult<Upstream> {
    record.validate()?;
    tables.validate()?;

    let risk_free_rate = record.risk_free_rate(tables)?;

    let research = match &record.research_and_development {
        Some(history) => {
            let method = StraightLine {
                life: record.policy.research_amortization_life,
            };
            let mut capitalized = method.capitalize(history)?;
            warnings.append(&mut capitalized.warnings);
            Some(capitalized)
        }
        None => None,
    };
    let research_adjustment = research
        .as_ref()
        .map_or(Decimal::ZERO, |r| r.operating_income_adjustment);

    let ebit = record.last_twelve_months.operating_income + research_adjustment;
    let (cost_of_debt, leases) =
        resolve_debt_and_leases(record, tables, risk_free_rate, ebit, warnings)?;
    if let Some(s) = cost_of_debt.synthetic.as_ref().filter(|s| s.coverage.is_sentinel()) {
        warnings.push(format!(
            "Interest coverage is a sentinel ({:?}); synthetic rating {}",
            s.coverage, s.rating
        ));
    }

    let ctx = CostOfCapitalContext {
        record,
        tables,
        risk_free_rate,
        cost_of_debt: &cost_of_debt,
        lease_debt: leases.as_ref().map_or(Decimal::ZERO, |l| l.debt_value),
    };
    let mut capital_structure = estimate_cost_of_capital(&ctx)?;
    warnings.append(&mut capital_structure.warnings);

    tracing::debug!(
        ticker = %record.ticker,
        approach = %capital_structure.approach,
        wacc = %capital_structure.cost_of_capital,
        terminal = %capital_structure.terminal_cost_of_capital,
        "cost of capital estimated"
    );

    Ok(Upstream {
        risk_free_rate,
        research,
        cost_of_debt,
        leases,
        capital_structure,
    })
}

/// Cost of capital for a record, without projecting cash flows.
pub fn estimate_capital_structure(
    record: &InputRecord,
    tables: &MarketTables,
) -> OrpheusResult<ComputationOutput<CapitalStructureResult>> {
    let mut warnings = Vec::new();
    let up = upstream(record, tables, &mut warnings)?;
    Ok(with_metadata(
        &format!("Cost of capital ({})", up.capital_structure.approach),
        &record.policy.cost_of_capital,
        warnings,
        up.capital_structure,
    ))
}

// ---------------------------------------------------------------------------
// Full run
// ---------------------------------------------------------------------------

fn projection_inputs(record: &InputRecord, up: &Upstream) -> OrpheusResult<ProjectionInputs> {
    let policy = &record.policy;
    let ltm = &record.last_twelve_months;
    let (stc_early, stc_late) = policy.sales_to_capital()?;

    let terminal_growth_rate = policy
        .terminal_growth_rate
        .or(policy.risk_free_rate_after_year_10)
        .unwrap_or(up.risk_free_rate);
    let terminal_cost_of_capital = up.capital_structure.terminal_cost_of_capital;

    let invested_capital = ltm.book_equity + record.reported_book_debt()? - ltm.cash
        + up.lease_debt()
        + up.research.as_ref().map_or(Decimal::ZERO, |r| r.research_asset);

    Ok(ProjectionInputs {
        base_revenue: ltm.revenue,
        base_operating_income: ltm.operating_income + up.operating_income_adjustment(),
        base_invested_capital: invested_capital,
        revenue_growth_next_year: policy.revenue_growth_next_year,
        cagr_years_2_to_5: policy
            .cagr_years_2_to_5
            .unwrap_or(policy.revenue_growth_next_year),
        terminal_growth_rate,
        operating_margin_next_year: policy.operating_margin_next_year,
        target_operating_margin: policy.target_operating_margin,
        margin_convergence_year: policy.margin_convergence_year,
        sales_to_capital_years_1_to_5: stc_early,
        sales_to_capital_years_6_to_10: stc_late,
        reinvestment_lag: policy.reinvestment_lag,
        effective_tax_rate: policy.effective_tax_rate,
        marginal_tax_rate: policy.marginal_tax_rate,
        tax_path: policy.tax_path,
        nol_carryforward: policy.nol_carryforward,
        initial_cost_of_capital: up.capital_structure.cost_of_capital,
        terminal_cost_of_capital,
        cost_of_capital_path: policy.cost_of_capital_path,
        terminal_return_on_capital: policy
            .terminal_return_on_capital
            .unwrap_or(terminal_cost_of_capital),
    })
}

fn value_options(
    record: &InputRecord,
    risk_free_rate: Rate,
) -> OrpheusResult<Option<OptionValuation>> {
    let Some(options) = &record.employee_options else {
        return Ok(None);
    };
    let market = OptionMarketInputs {
        stock_price: record.market.stock_price.unwrap_or(Decimal::ZERO),
        shares_outstanding: record.shares_outstanding()?,
        risk_free_rate,
        dividend_yield: record.market.dividend_yield,
    };
    let pricer = DilutionAdjustedBlackScholes::default();
    value_employee_options(options, &market, &pricer).map(Some)
}

/// Value one record against the given lookup tables.
pub fn run_valuation(
    record: &InputRecord,
    tables: &MarketTables,
) -> OrpheusResult<ComputationOutput<ValuationReport>> {
    let mut warnings = Vec::new();
    let up = upstream(record, tables, &mut warnings)?;
    let policy = &record.policy;
    let ltm = &record.last_twelve_months;

    if let Some(trailing) = record.trailing_growth() {
        if (trailing - policy.revenue_growth_next_year).abs() > GROWTH_GAP_WARNING {
            warnings.push(format!(
                "Trailing revenue growth {:.1}% differs from the next-year assumption {:.1}%",
                trailing * dec!(100),
                policy.revenue_growth_next_year * dec!(100)
            ));
        }
    }

    let inputs = projection_inputs(record, &up)?;
    let projection = project(&inputs)?;

    let options = value_options(record, up.risk_free_rate)?;

    let bridge = EquityBridge {
        book_equity: ltm.book_equity,
        book_debt: record.reported_book_debt()?,
        lease_debt: up.lease_debt(),
        minority_interest: ltm.minority_interest,
        cash: ltm.cash,
        trapped_cash: policy.trapped_cash.clone(),
        non_operating_assets: ltm.non_operating_assets,
        value_of_options: options.as_ref().map_or(Decimal::ZERO, |o| o.total_value),
        shares_outstanding: record.shares_outstanding()?,
        stock_price: record.market.stock_price,
    };
    let valuation = aggregate(&projection, &policy.failure, &bridge, &mut warnings)?;

    let recommendation = recommend(
        valuation.value_per_share,
        record.market.stock_price,
        policy.margin_of_safety,
        record.price_forecast,
    );
    if recommendation.is_none() {
        warnings.push("No stock price supplied; no recommendation".into());
    }

    tracing::debug!(
        ticker = %record.ticker,
        value_per_share = %valuation.value_per_share,
        "valuation complete"
    );

    let report = ValuationReport {
        ticker: record.ticker.clone(),
        as_of: record.as_of,
        currency: record.currency.clone(),
        risk_free_rate: up.risk_free_rate,
        adjusted_operating_income: inputs.base_operating_income,
        capital_structure: up.capital_structure,
        cost_of_debt: up.cost_of_debt,
        leases: up.leases,
        research: up.research,
        options,
        projection,
        valuation,
        recommendation,
    };

    Ok(with_metadata(
        "Ten-year FCFF valuation with terminal value",
        &inputs,
        warnings,
        report,
    ))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capitalization::operating_leases::{LeaseCommitments, LeaseDiscountRate};
    use crate::capitalization::research::ResearchHistory;
    use crate::credit::synthetic_rating::{CostOfDebtApproach, CreditRating, InterestCoverage};
    use crate::derivatives::employee_options::EmployeeOptions;
    use crate::valuation::inputs::fixtures::simple_record;
    use crate::valuation::signal::Action;

    #[test]
    fn test_simple_record_values() {
        let out = run_valuation(&simple_record(), &MarketTables::default()).unwrap();
        let r = &out.result;
        assert_eq!(r.projection.years.len(), 10);
        assert_eq!(r.valuation.terminal_growth_rate, dec!(0.03));
        assert_eq!(r.valuation.terminal_cost_of_capital, dec!(0.10));
        assert!(r.valuation.value_per_share > Decimal::ZERO);
        assert!(r.leases.is_none());
        assert!(r.recommendation.is_some());
    }

    #[test]
    fn test_run_is_deterministic() {
        let record = simple_record();
        let tables = MarketTables::default();
        let a = run_valuation(&record, &tables).unwrap();
        let b = run_valuation(&record, &tables).unwrap();
        assert_eq!(a.result.valuation, b.result.valuation);
        assert_eq!(a.result.projection, b.result.projection);
    }

    #[test]
    fn test_missing_shares_fails() {
        let mut record = simple_record();
        record.market.shares_outstanding = None;
        let err = run_valuation(&record, &MarketTables::default()).unwrap_err();
        assert_eq!(err.field(), Some("shares_outstanding"));
    }

    #[test]
    fn test_terminal_growth_at_cost_of_capital_fails() {
        let mut record = simple_record();
        record.policy.terminal_growth_rate = Some(dec!(0.10));
        let err = run_valuation(&record, &MarketTables::default()).unwrap_err();
        assert!(matches!(err, ValuationError::ComputationDegenerate { .. }));
    }

    #[test]
    fn test_leases_raise_operating_income_and_debt() {
        let mut record = simple_record();
        record.last_twelve_months.interest_expense = dec!(10);
        record.operating_leases = Some(LeaseCommitments {
            current_expense: dec!(50),
            commitments: [dec!(50); 5],
            beyond_year_five: dec!(100),
        });
        let out = run_valuation(&record, &MarketTables::default()).unwrap();
        let r = &out.result;
        let leases = r.leases.as_ref().unwrap();
        assert_eq!(leases.embedded_years, 2);
        assert_eq!(leases.discount_rate, r.cost_of_debt.pretax_cost_of_debt);
        assert_eq!(r.valuation.debt, leases.debt_value);
        assert_eq!(
            r.adjusted_operating_income,
            dec!(150) + leases.operating_income_adjustment
        );
    }

    #[test]
    fn test_fixed_point_with_direct_cost_of_debt() {
        let mut record = simple_record();
        record.policy.cost_of_debt = CostOfDebtApproach::Direct {
            pretax_cost_of_debt: dec!(0.05),
        };
        record.operating_leases = Some(LeaseCommitments {
            current_expense: dec!(100),
            commitments: [dec!(100); 5],
            beyond_year_five: Decimal::ZERO,
        });
        let mut warnings = Vec::new();
        let (kd, leases) = resolve_debt_and_leases(
            &record,
            &MarketTables::default(),
            dec!(0.03),
            dec!(150),
            &mut warnings,
        )
        .unwrap();
        assert_eq!(kd.pretax_cost_of_debt, dec!(0.05));
        let debt = leases.unwrap().debt_value;
        assert!((debt - dec!(432.9477)).abs() < dec!(0.001));
        assert!(warnings.is_empty());
    }

    fn thin_coverage_record() -> InputRecord {
        let mut record = simple_record();
        record.last_twelve_months.operating_income = dec!(10);
        record.market.risk_free_rate = Some(dec!(0.04));
        record.operating_leases = Some(LeaseCommitments {
            current_expense: dec!(100),
            commitments: [dec!(100); 5],
            beyond_year_five: dec!(1000),
        });
        record
    }

    #[test]
    fn test_rating_cycle_keeps_higher_cost_of_debt() {
        // Leases priced at CCC rate the firm CC, and at CC rate it CCC.
        let record = thin_coverage_record();
        let mut warnings = Vec::new();
        let (kd, leases) = resolve_debt_and_leases(
            &record,
            &MarketTables::default(),
            dec!(0.04),
            dec!(10),
            &mut warnings,
        )
        .unwrap();
        assert_eq!(kd.rating, Some(CreditRating::CC));
        assert_eq!(kd.pretax_cost_of_debt, dec!(0.1578));
        assert_eq!(leases.unwrap().discount_rate, dec!(0.1578));
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("cycle"));
    }

    #[test]
    fn test_rating_cycle_still_values() {
        let out = run_valuation(&thin_coverage_record(), &MarketTables::default()).unwrap();
        assert_eq!(out.result.cost_of_debt.pretax_cost_of_debt, dec!(0.1578));
        assert!(out.warnings.iter().any(|w| w.contains("cycle")));
    }

    #[test]
    fn test_fixed_lease_rate_rates_once() {
        let mut record = thin_coverage_record();
        record.policy.leases.discount_rate = LeaseDiscountRate::RiskFreePlusSpread {
            spread: dec!(0.02),
        };
        let mut warnings = Vec::new();
        let (kd, leases) = resolve_debt_and_leases(
            &record,
            &MarketTables::default(),
            dec!(0.04),
            dec!(10),
            &mut warnings,
        )
        .unwrap();
        let leases = leases.unwrap();
        assert_eq!(leases.discount_rate, dec!(0.06));
        let synthetic = kd.synthetic.unwrap();
        assert_eq!(
            synthetic.coverage,
            InterestCoverage::Ratio(
                (dec!(10) + leases.operating_income_adjustment) / leases.implied_interest
            )
        );
        assert!(warnings.is_empty());
    }

    #[test]
    fn test_missing_book_debt_fails() {
        let mut record = simple_record();
        record.last_twelve_months.book_debt = None;
        let err = run_valuation(&record, &MarketTables::default()).unwrap_err();
        assert_eq!(err.field(), Some("book_debt"));
    }

    #[test]
    fn test_debt_free_firm_values() {
        let mut record = simple_record();
        record.last_twelve_months.book_debt = Some(Decimal::ZERO);
        let out = run_valuation(&record, &MarketTables::default()).unwrap();
        assert_eq!(out.result.valuation.debt, Decimal::ZERO);
    }

    #[test]
    fn test_research_adjusts_operating_income() {
        let mut record = simple_record();
        record.research_and_development = Some(ResearchHistory {
            current: dec!(60),
            past: vec![dec!(50), dec!(40), dec!(30), dec!(20), dec!(10)],
        });
        let out = run_valuation(&record, &MarketTables::default()).unwrap();
        let research = out.result.research.as_ref().unwrap();
        // amortization = (50 + 40 + 30 + 20 + 10) / 5
        assert_eq!(research.amortization, dec!(30));
        assert_eq!(out.result.adjusted_operating_income, dec!(180));
    }

    #[test]
    fn test_options_reduce_value() {
        let base = run_valuation(&simple_record(), &MarketTables::default()).unwrap();
        let mut record = simple_record();
        record.employee_options = Some(EmployeeOptions {
            number_outstanding: dec!(10),
            average_strike: dec!(8),
            average_maturity: dec!(3),
            volatility: Some(dec!(0.3)),
            direct_value: None,
        });
        let diluted = run_valuation(&record, &MarketTables::default()).unwrap();
        assert!(diluted.result.options.as_ref().unwrap().total_value > Decimal::ZERO);
        assert!(diluted.result.valuation.value_per_share < base.result.valuation.value_per_share);
    }

    #[test]
    fn test_no_price_no_recommendation() {
        let mut record = simple_record();
        record.market.stock_price = None;
        let out = run_valuation(&record, &MarketTables::default()).unwrap();
        assert!(out.result.recommendation.is_none());
        assert!(out.warnings.iter().any(|w| w.contains("no recommendation")));
    }

    #[test]
    fn test_cheap_price_is_buy() {
        let mut record = simple_record();
        record.market.stock_price = Some(dec!(1));
        let out = run_valuation(&record, &MarketTables::default()).unwrap();
        assert_eq!(out.result.recommendation.unwrap().action, Action::Buy);
    }

    #[test]
    fn test_capital_structure_only() {
        let out = estimate_capital_structure(&simple_record(), &MarketTables::default()).unwrap();
        assert_eq!(out.result.cost_of_capital, dec!(0.10));
        assert_eq!(out.result.approach, "Direct input");
    }
}

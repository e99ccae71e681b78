//! Ten-year FCFF projection plus a terminal year.
//!
//! The revenue path (base, years 1–10, terminal and the three years beyond it)
//! is resolved before any reinvestment so a lagged year can read revenue it
//! has not reached yet. Rows are then built in a single forward pass.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::ValuationError;
use crate::types::{Money, Multiple, ProjectionPeriod, Rate};
use crate::OrpheusResult;

use super::inputs::{CostOfCapitalPath, TaxPath};

pub const EXPLICIT_YEARS: u32 = 10;
/// Last year of the high-growth phase; the glide paths start after it.
pub const HIGH_GROWTH_YEARS: u32 = 5;
pub const MAX_REINVESTMENT_LAG: u32 = 3;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Everything the engine needs, already resolved from the record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectionInputs {
    pub base_revenue: Money,
    /// Operating income after lease and R&D adjustments
    pub base_operating_income: Money,
    pub base_invested_capital: Money,
    pub revenue_growth_next_year: Rate,
    pub cagr_years_2_to_5: Rate,
    pub terminal_growth_rate: Rate,
    pub operating_margin_next_year: Option<Rate>,
    pub target_operating_margin: Rate,
    pub margin_convergence_year: u32,
    pub sales_to_capital_years_1_to_5: Multiple,
    pub sales_to_capital_years_6_to_10: Multiple,
    pub reinvestment_lag: u32,
    pub effective_tax_rate: Rate,
    pub marginal_tax_rate: Rate,
    pub tax_path: TaxPath,
    pub nol_carryforward: Money,
    pub initial_cost_of_capital: Rate,
    pub terminal_cost_of_capital: Rate,
    pub cost_of_capital_path: CostOfCapitalPath,
    pub terminal_return_on_capital: Rate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaseYear {
    pub period: ProjectionPeriod,
    pub revenue: Money,
    pub operating_margin: Rate,
    pub operating_income: Money,
    pub tax_rate: Rate,
    pub nopat: Money,
    pub nol: Money,
    pub invested_capital: Money,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectionRow {
    pub period: ProjectionPeriod,
    pub revenue_growth: Rate,
    pub revenue: Money,
    pub operating_margin: Rate,
    pub operating_income: Money,
    pub tax_rate: Rate,
    pub nopat: Money,
    pub reinvestment: Money,
    pub fcff: Money,
    /// NOL balance carried out of the year
    pub nol: Money,
    pub sales_to_capital: Multiple,
    pub cost_of_capital: Rate,
    pub cumulative_discount_factor: Decimal,
    pub pv_fcff: Money,
    pub invested_capital: Money,
    /// NOPAT over opening invested capital; absent when that capital is not positive
    pub roic: Option<Rate>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TerminalYear {
    pub period: ProjectionPeriod,
    pub revenue_growth: Rate,
    pub revenue: Money,
    pub operating_margin: Rate,
    pub operating_income: Money,
    pub tax_rate: Rate,
    pub nopat: Money,
    pub reinvestment: Money,
    pub fcff: Money,
    pub cost_of_capital: Rate,
    pub return_on_capital: Rate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectionTable {
    pub base: BaseYear,
    pub years: Vec<ProjectionRow>,
    pub terminal: TerminalYear,
}

impl ProjectionTable {
    pub fn final_year(&self) -> OrpheusResult<&ProjectionRow> {
        self.years
            .last()
            .ok_or_else(|| ValuationError::degenerate("projection has no explicit years"))
    }
}

// ---------------------------------------------------------------------------
// Glide paths
// ---------------------------------------------------------------------------

/// Fraction of the way from year 5 to year 10 reached in `year`.
fn late_phase_fraction(year: u32) -> Decimal {
    if year <= HIGH_GROWTH_YEARS {
        Decimal::ZERO
    } else {
        Decimal::from(year - HIGH_GROWTH_YEARS) / Decimal::from(EXPLICIT_YEARS - HIGH_GROWTH_YEARS)
    }
}

/// Growth rate for years 1..=10.
pub fn growth_path(inputs: &ProjectionInputs) -> Vec<Rate> {
    let g5 = inputs.cagr_years_2_to_5;
    (1..=EXPLICIT_YEARS)
        .map(|year| match year {
            1 => inputs.revenue_growth_next_year,
            2..=5 => g5,
            _ => g5 - (g5 - inputs.terminal_growth_rate) * late_phase_fraction(year),
        })
        .collect()
}

/// Operating margin for years 1..=10.
pub fn margin_path(inputs: &ProjectionInputs, base_margin: Rate) -> Vec<Rate> {
    let target = inputs.target_operating_margin;
    let n = inputs.margin_convergence_year;
    let n_dec = Decimal::from(n);
    (1..=EXPLICIT_YEARS)
        .map(|year| match inputs.operating_margin_next_year {
            Some(m1) if year == 1 => m1,
            Some(m1) if year < n => target - (target - m1) * Decimal::from(n - year) / n_dec,
            Some(_) => target,
            None => base_margin + (target - base_margin) * Decimal::from(year.min(n)) / n_dec,
        })
        .collect()
}

/// Tax rate for years 1..=10 and the terminal year.
pub fn tax_path(inputs: &ProjectionInputs) -> (Vec<Rate>, Rate) {
    let eff = inputs.effective_tax_rate;
    match inputs.tax_path {
        TaxPath::Constant => (vec![eff; EXPLICIT_YEARS as usize], eff),
        TaxPath::ConvergeToMarginal => {
            let marg = inputs.marginal_tax_rate;
            let path = (1..=EXPLICIT_YEARS)
                .map(|year| eff + (marg - eff) * late_phase_fraction(year))
                .collect();
            (path, marg)
        }
    }
}

/// Cost of capital for years 1..=10.
pub fn cost_of_capital_path(inputs: &ProjectionInputs) -> Vec<Rate> {
    let initial = inputs.initial_cost_of_capital;
    match inputs.cost_of_capital_path {
        CostOfCapitalPath::Constant => vec![initial; EXPLICIT_YEARS as usize],
        CostOfCapitalPath::Converge => (1..=EXPLICIT_YEARS)
            .map(|year| {
                initial + (inputs.terminal_cost_of_capital - initial) * late_phase_fraction(year)
            })
            .collect(),
    }
}

/// Revenue for base (index 0), years 1–10, the terminal year (11) and the
/// years beyond it a lag can reach.
pub fn revenue_path(inputs: &ProjectionInputs, growth: &[Rate]) -> Vec<Money> {
    let beyond = (EXPLICIT_YEARS + 1 + MAX_REINVESTMENT_LAG) as usize;
    let mut revenue = Vec::with_capacity(beyond);
    revenue.push(inputs.base_revenue);
    for year in 1..beyond {
        let g = growth
            .get(year - 1)
            .copied()
            .unwrap_or(inputs.terminal_growth_rate);
        let prior = revenue[year - 1];
        revenue.push(prior * (Decimal::ONE + g));
    }
    revenue
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

fn validate(inputs: &ProjectionInputs) -> OrpheusResult<()> {
    if inputs.base_revenue <= Decimal::ZERO {
        return Err(ValuationError::degenerate(
            "base-year revenue must be positive to derive a margin",
        ));
    }
    if !(1..=EXPLICIT_YEARS).contains(&inputs.margin_convergence_year) {
        return Err(ValuationError::policy(
            "margin_convergence_year",
            format!(
                "Convergence year must be between 1 and {EXPLICIT_YEARS}, got {}",
                inputs.margin_convergence_year
            ),
        ));
    }
    if inputs.reinvestment_lag > MAX_REINVESTMENT_LAG {
        return Err(ValuationError::policy(
            "reinvestment_lag",
            format!(
                "Lag must be between 0 and {MAX_REINVESTMENT_LAG}, got {}",
                inputs.reinvestment_lag
            ),
        ));
    }
    for (label, stc) in [
        ("years 1-5", inputs.sales_to_capital_years_1_to_5),
        ("years 6-10", inputs.sales_to_capital_years_6_to_10),
    ] {
        if stc <= Decimal::ZERO {
            return Err(ValuationError::degenerate(format!(
                "sales-to-capital ratio for {label} is {stc}"
            )));
        }
    }
    if inputs.initial_cost_of_capital < Decimal::ZERO {
        return Err(ValuationError::policy(
            "cost_of_capital",
            "Cost of capital cannot be negative",
        ));
    }
    if inputs.terminal_cost_of_capital < Decimal::ZERO {
        return Err(ValuationError::policy(
            "terminal_cost_of_capital",
            "Terminal cost of capital cannot be negative",
        ));
    }
    Ok(())
}

/// NOPAT and closing NOL for one year.
///
/// Losses add to the NOL; profits first use up the NOL and only the excess is taxed.
pub fn after_tax_operating_income(
    operating_income: Money,
    tax_rate: Rate,
    opening_nol: Money,
) -> (Money, Money) {
    if operating_income <= Decimal::ZERO {
        (operating_income, opening_nol - operating_income)
    } else if operating_income <= opening_nol {
        (operating_income, opening_nol - operating_income)
    } else {
        let taxable = operating_income - opening_nol;
        (operating_income - taxable * tax_rate, Decimal::ZERO)
    }
}

/// Build the full projection table.
pub fn project(inputs: &ProjectionInputs) -> OrpheusResult<ProjectionTable> {
    validate(inputs)?;

    let growth = growth_path(inputs);
    let revenue = revenue_path(inputs, &growth);
    let base_margin = inputs.base_operating_income / inputs.base_revenue;
    let margins = margin_path(inputs, base_margin);
    let (taxes, terminal_tax) = tax_path(inputs);
    let rates = cost_of_capital_path(inputs);
    let lag = inputs.reinvestment_lag as usize;

    let base_tax = inputs.effective_tax_rate;
    let base = BaseYear {
        period: ProjectionPeriod::base(),
        revenue: inputs.base_revenue,
        operating_margin: base_margin,
        operating_income: inputs.base_operating_income,
        tax_rate: base_tax,
        nopat: if inputs.base_operating_income > Decimal::ZERO {
            inputs.base_operating_income * (Decimal::ONE - base_tax)
        } else {
            inputs.base_operating_income
        },
        nol: inputs.nol_carryforward,
        invested_capital: inputs.base_invested_capital,
    };

    let mut years = Vec::with_capacity(EXPLICIT_YEARS as usize);
    let mut nol = inputs.nol_carryforward;
    let mut discount = Decimal::ONE;
    let mut capital = inputs.base_invested_capital;

    for t in 1..=EXPLICIT_YEARS as usize {
        let year = t as u32;
        let operating_income = revenue[t] * margins[t - 1];
        let tax_rate = taxes[t - 1];
        let (nopat, closing_nol) = after_tax_operating_income(operating_income, tax_rate, nol);

        let stc = if year <= HIGH_GROWTH_YEARS {
            inputs.sales_to_capital_years_1_to_5
        } else {
            inputs.sales_to_capital_years_6_to_10
        };
        let reinvestment = (revenue[t + lag] - revenue[t + lag - 1]) / stc;
        let fcff = nopat - reinvestment;

        let rate = rates[t - 1];
        discount /= Decimal::ONE + rate;

        let roic = if capital > Decimal::ZERO {
            Some(nopat / capital)
        } else {
            None
        };
        let closing_capital = capital + reinvestment;

        years.push(ProjectionRow {
            period: ProjectionPeriod::explicit(year),
            revenue_growth: growth[t - 1],
            revenue: revenue[t],
            operating_margin: margins[t - 1],
            operating_income,
            tax_rate,
            nopat,
            reinvestment,
            fcff,
            nol: closing_nol,
            sales_to_capital: stc,
            cost_of_capital: rate,
            cumulative_discount_factor: discount,
            pv_fcff: fcff * discount,
            invested_capital: closing_capital,
            roic,
        });

        nol = closing_nol;
        capital = closing_capital;
    }

    let final_margin = margins[EXPLICIT_YEARS as usize - 1];
    let terminal = terminal_year(inputs, &revenue, final_margin, terminal_tax)?;

    tracing::debug!(
        terminal_fcff = %terminal.fcff,
        final_discount = %discount,
        "projection complete"
    );

    Ok(ProjectionTable {
        base,
        years,
        terminal,
    })
}

fn terminal_year(
    inputs: &ProjectionInputs,
    revenue: &[Money],
    final_margin: Rate,
    tax_rate: Rate,
) -> OrpheusResult<TerminalYear> {
    let g = inputs.terminal_growth_rate;
    let roic = inputs.terminal_return_on_capital;
    let rev = revenue[EXPLICIT_YEARS as usize + 1];
    let operating_income = rev * final_margin;
    let nopat = if operating_income > Decimal::ZERO {
        operating_income * (Decimal::ONE - tax_rate)
    } else {
        operating_income
    };
    let reinvestment = if g > Decimal::ZERO {
        if roic <= Decimal::ZERO {
            return Err(ValuationError::degenerate(
                "terminal return on capital must be positive when terminal growth is positive",
            ));
        }
        g / roic * nopat
    } else {
        Decimal::ZERO
    };
    Ok(TerminalYear {
        period: ProjectionPeriod::terminal(EXPLICIT_YEARS),
        revenue_growth: g,
        revenue: rev,
        operating_margin: final_margin,
        operating_income,
        tax_rate,
        nopat,
        reinvestment,
        fcff: nopat - reinvestment,
        cost_of_capital: inputs.terminal_cost_of_capital,
        return_on_capital: roic,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    pub(crate) fn sample_inputs() -> ProjectionInputs {
        ProjectionInputs {
            base_revenue: dec!(1000),
            base_operating_income: dec!(150),
            base_invested_capital: dec!(800),
            revenue_growth_next_year: dec!(0.10),
            cagr_years_2_to_5: dec!(0.10),
            terminal_growth_rate: dec!(0.03),
            operating_margin_next_year: None,
            target_operating_margin: dec!(0.15),
            margin_convergence_year: 5,
            sales_to_capital_years_1_to_5: dec!(1.2),
            sales_to_capital_years_6_to_10: dec!(1.2),
            reinvestment_lag: 1,
            effective_tax_rate: dec!(0.25),
            marginal_tax_rate: dec!(0.25),
            tax_path: TaxPath::Constant,
            nol_carryforward: Decimal::ZERO,
            initial_cost_of_capital: dec!(0.10),
            terminal_cost_of_capital: dec!(0.10),
            cost_of_capital_path: CostOfCapitalPath::Constant,
            terminal_return_on_capital: dec!(0.10),
        }
    }

    #[test]
    fn test_growth_glides_to_terminal() {
        let g = growth_path(&sample_inputs());
        assert_eq!(g.len(), 10);
        assert!(g[..5].iter().all(|r| *r == dec!(0.10)));
        // five equal steps of 0.014
        assert_eq!(g[5], dec!(0.086));
        assert_eq!(g[8], dec!(0.044));
        assert_eq!(g[9], dec!(0.03));
    }

    #[test]
    fn test_cagr_applies_to_years_two_to_five() {
        let mut inputs = sample_inputs();
        inputs.revenue_growth_next_year = dec!(0.20);
        inputs.cagr_years_2_to_5 = dec!(0.12);
        let g = growth_path(&inputs);
        assert_eq!(g[0], dec!(0.20));
        assert_eq!(g[1], dec!(0.12));
        assert_eq!(g[4], dec!(0.12));
    }

    #[test]
    fn test_revenue_is_chained() {
        let inputs = sample_inputs();
        let table = project(&inputs).unwrap();
        let mut prior = table.base.revenue;
        for row in &table.years {
            assert_eq!(row.revenue, prior * (Decimal::ONE + row.revenue_growth));
            prior = row.revenue;
        }
        assert_eq!(
            table.terminal.revenue,
            prior * (Decimal::ONE + inputs.terminal_growth_rate)
        );
    }

    #[test]
    fn test_margin_converges_by_year_n() {
        let mut inputs = sample_inputs();
        inputs.base_operating_income = dec!(100);
        inputs.target_operating_margin = dec!(0.20);
        inputs.margin_convergence_year = 4;
        let m = margin_path(&inputs, dec!(0.10));
        assert_eq!(m[0], dec!(0.125));
        assert_eq!(m[1], dec!(0.15));
        assert_eq!(m[3], dec!(0.20));
        assert!(m[4..].iter().all(|x| *x == dec!(0.20)));
    }

    #[test]
    fn test_next_year_margin_override() {
        let mut inputs = sample_inputs();
        inputs.operating_margin_next_year = Some(dec!(0.05));
        inputs.target_operating_margin = dec!(0.25);
        inputs.margin_convergence_year = 5;
        let m = margin_path(&inputs, dec!(0.15));
        assert_eq!(m[0], dec!(0.05));
        // 0.25 - 0.20 * 3/5
        assert_eq!(m[1], dec!(0.13));
        assert_eq!(m[4], dec!(0.25));
    }

    #[test]
    fn test_tax_converges_to_marginal() {
        let mut inputs = sample_inputs();
        inputs.effective_tax_rate = dec!(0.15);
        inputs.marginal_tax_rate = dec!(0.25);
        inputs.tax_path = TaxPath::ConvergeToMarginal;
        let (path, terminal) = tax_path(&inputs);
        assert!(path[..5].iter().all(|t| *t == dec!(0.15)));
        assert_eq!(path[5], dec!(0.17));
        assert_eq!(path[9], dec!(0.25));
        assert_eq!(terminal, dec!(0.25));
    }

    #[test]
    fn test_cost_of_capital_converges() {
        let mut inputs = sample_inputs();
        inputs.initial_cost_of_capital = dec!(0.10);
        inputs.terminal_cost_of_capital = dec!(0.075);
        inputs.cost_of_capital_path = CostOfCapitalPath::Converge;
        let r = cost_of_capital_path(&inputs);
        assert!(r[..5].iter().all(|x| *x == dec!(0.10)));
        assert_eq!(r[5], dec!(0.095));
        assert_eq!(r[9], dec!(0.075));
    }

    #[test]
    fn test_reinvestment_lag_pairs() {
        for lag in 0..=3u32 {
            let mut inputs = sample_inputs();
            inputs.reinvestment_lag = lag;
            let table = project(&inputs).unwrap();
            let growth = growth_path(&inputs);
            let revenue = revenue_path(&inputs, &growth);
            for (i, row) in table.years.iter().enumerate() {
                let t = i + 1;
                let l = lag as usize;
                let expected = (revenue[t + l] - revenue[t + l - 1]) / dec!(1.2);
                assert_eq!(row.reinvestment, expected, "lag {lag} year {t}");
            }
        }
    }

    #[test]
    fn test_lag_zero_uses_current_pair() {
        let mut inputs = sample_inputs();
        inputs.reinvestment_lag = 0;
        let table = project(&inputs).unwrap();
        let y3 = &table.years[2];
        let y2 = &table.years[1];
        assert_eq!(y3.reinvestment, (y3.revenue - y2.revenue) / dec!(1.2));
    }

    #[test]
    fn test_nopat_bounds() {
        let mut inputs = sample_inputs();
        inputs.base_operating_income = dec!(-200);
        inputs.target_operating_margin = dec!(0.10);
        inputs.margin_convergence_year = 8;
        let table = project(&inputs).unwrap();
        for row in &table.years {
            if row.operating_income <= Decimal::ZERO {
                assert_eq!(row.nopat, row.operating_income);
            } else if row.nol.is_zero() {
                assert!(row.nopat <= row.operating_income);
            }
        }
    }

    #[test]
    fn test_nol_shields_then_runs_out() {
        let (nopat, nol) = after_tax_operating_income(dec!(50), dec!(0.25), dec!(80));
        assert_eq!((nopat, nol), (dec!(50), dec!(30)));
        let (nopat, nol) = after_tax_operating_income(dec!(50), dec!(0.25), dec!(30));
        // 20 taxable at 25%
        assert_eq!((nopat, nol), (dec!(45), Decimal::ZERO));
        let (nopat, nol) = after_tax_operating_income(dec!(-40), dec!(0.25), dec!(30));
        assert_eq!((nopat, nol), (dec!(-40), dec!(70)));
    }

    #[test]
    fn test_nol_carries_through_years() {
        let mut inputs = sample_inputs();
        inputs.nol_carryforward = dec!(200);
        let table = project(&inputs).unwrap();
        let y1 = &table.years[0];
        // 165 of income fully shielded
        assert_eq!(y1.nopat, y1.operating_income);
        assert_eq!(y1.nol, dec!(200) - y1.operating_income);
        let y2 = &table.years[1];
        assert!(y2.nopat < y2.operating_income);
        assert_eq!(y2.nol, Decimal::ZERO);
    }

    #[test]
    fn test_terminal_reinvestment_from_growth_and_roic() {
        let inputs = sample_inputs();
        let table = project(&inputs).unwrap();
        let t = &table.terminal;
        assert_eq!(t.reinvestment, dec!(0.03) / dec!(0.10) * t.nopat);
        assert_eq!(t.fcff, t.nopat - t.reinvestment);
        assert_eq!(t.operating_margin, table.years[9].operating_margin);
    }

    #[test]
    fn test_negative_terminal_growth_has_no_reinvestment() {
        let mut inputs = sample_inputs();
        inputs.terminal_growth_rate = dec!(-0.01);
        let table = project(&inputs).unwrap();
        assert_eq!(table.terminal.reinvestment, Decimal::ZERO);
    }

    #[test]
    fn test_discount_factor_compounds() {
        let table = project(&sample_inputs()).unwrap();
        let mut expected = Decimal::ONE;
        for row in &table.years {
            expected /= dec!(1.10);
            assert_eq!(row.cumulative_discount_factor, expected);
            assert_eq!(row.pv_fcff, row.fcff * expected);
        }
    }

    #[test]
    fn test_invested_capital_accumulates() {
        let table = project(&sample_inputs()).unwrap();
        let y1 = &table.years[0];
        assert_eq!(y1.invested_capital, dec!(800) + y1.reinvestment);
        assert_eq!(y1.roic, Some(y1.nopat / dec!(800)));
    }

    #[test]
    fn test_invalid_policies() {
        let mut inputs = sample_inputs();
        inputs.margin_convergence_year = 0;
        assert!(matches!(
            project(&inputs).unwrap_err(),
            ValuationError::InvalidPolicy { .. }
        ));

        let mut inputs = sample_inputs();
        inputs.sales_to_capital_years_6_to_10 = Decimal::ZERO;
        assert!(matches!(
            project(&inputs).unwrap_err(),
            ValuationError::ComputationDegenerate { .. }
        ));

        let mut inputs = sample_inputs();
        inputs.initial_cost_of_capital = dec!(-0.01);
        assert_eq!(project(&inputs).unwrap_err().field(), Some("cost_of_capital"));
    }

    #[test]
    fn test_projection_is_idempotent() {
        let inputs = sample_inputs();
        assert_eq!(project(&inputs).unwrap(), project(&inputs).unwrap());
    }
}

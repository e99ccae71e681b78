use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::credit::failure::FailurePolicy;
use crate::error::ValuationError;
use crate::types::{Money, Rate};
use crate::OrpheusResult;

use super::inputs::TrappedCash;
use super::projection::ProjectionTable;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Balance-sheet items between operating assets and common equity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EquityBridge {
    pub book_equity: Money,
    pub book_debt: Money,
    pub lease_debt: Money,
    pub minority_interest: Money,
    pub cash: Money,
    #[serde(default)]
    pub trapped_cash: Option<TrappedCash>,
    pub non_operating_assets: Money,
    pub value_of_options: Money,
    pub shares_outstanding: Decimal,
    #[serde(default)]
    pub stock_price: Option<Money>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValuationResult {
    pub terminal_cash_flow: Money,
    pub terminal_cost_of_capital: Rate,
    pub terminal_growth_rate: Rate,
    pub terminal_value: Money,
    pub pv_terminal_value: Money,
    pub pv_cash_flows: Money,
    pub sum_of_pv: Money,
    pub probability_of_failure: Rate,
    pub proceeds_if_failure: Money,
    pub value_of_operating_assets: Money,
    /// Book debt plus lease debt
    pub debt: Money,
    pub minority_interest: Money,
    /// Net of the tax on trapped cash
    pub cash: Money,
    pub non_operating_assets: Money,
    pub value_of_equity: Money,
    pub value_of_options: Money,
    pub value_of_equity_in_common_stock: Money,
    pub shares_outstanding: Decimal,
    pub value_per_share: Money,
    pub price_per_share: Option<Money>,
    /// Price over value, as a fraction
    pub price_as_pct_of_value: Option<Rate>,
    /// Share of operating value coming from the terminal value
    pub terminal_value_pct: Rate,
}

// ---------------------------------------------------------------------------
// Aggregation
// ---------------------------------------------------------------------------

/// TV = FCFF_T / (r_T − g_T)
pub fn terminal_value(fcff: Money, cost_of_capital: Rate, growth: Rate) -> OrpheusResult<Money> {
    let spread = cost_of_capital - growth;
    if spread <= Decimal::ZERO {
        return Err(ValuationError::degenerate(format!(
            "terminal cost of capital ({cost_of_capital}) must exceed terminal growth ({growth})"
        )));
    }
    Ok(fcff / spread)
}

/// Cash after paying the extra tax due on repatriating trapped cash.
pub fn cash_net_of_trapped_tax(cash: Money, trapped: Option<&TrappedCash>) -> Money {
    match trapped {
        Some(t) => cash - t.amount * t.additional_tax_rate,
        None => cash,
    }
}

/// Reduce a projection to a per-share value.
pub fn aggregate(
    projection: &ProjectionTable,
    failure: &FailurePolicy,
    bridge: &EquityBridge,
    warnings: &mut Vec<String>,
) -> OrpheusResult<ValuationResult> {
    if bridge.shares_outstanding <= Decimal::ZERO {
        return Err(ValuationError::missing("shares_outstanding"));
    }

    let terminal = &projection.terminal;
    let final_year = projection.final_year()?;

    let tv = terminal_value(terminal.fcff, terminal.cost_of_capital, terminal.revenue_growth)?;
    let pv_terminal_value = tv * final_year.cumulative_discount_factor;
    let pv_cash_flows: Money = projection.years.iter().map(|r| r.pv_fcff).sum();
    let sum_of_pv = pv_cash_flows + pv_terminal_value;

    let book_capital = bridge.book_equity + bridge.book_debt;
    let adjusted = failure.apply(sum_of_pv, book_capital)?;
    if adjusted.probability_of_failure > Decimal::ZERO {
        tracing::debug!(
            p = %adjusted.probability_of_failure,
            proceeds = %adjusted.proceeds_if_failure,
            "failure-adjusted operating value"
        );
    }

    let debt = bridge.book_debt + bridge.lease_debt;
    let cash = cash_net_of_trapped_tax(bridge.cash, bridge.trapped_cash.as_ref());
    let value_of_equity = adjusted.value_of_operating_assets - debt - bridge.minority_interest
        + cash
        + bridge.non_operating_assets;
    let value_of_equity_in_common_stock = value_of_equity - bridge.value_of_options;
    let value_per_share = value_of_equity_in_common_stock / bridge.shares_outstanding;

    if value_of_equity_in_common_stock < Decimal::ZERO {
        warnings.push("Value of equity in common stock is negative".into());
    }

    let terminal_value_pct = if sum_of_pv.is_zero() {
        Decimal::ZERO
    } else {
        pv_terminal_value / sum_of_pv
    };
    if terminal_value_pct > dec!(0.85) {
        warnings.push(format!(
            "Terminal value is {:.1}% of operating value",
            terminal_value_pct * dec!(100)
        ));
    }

    let price_as_pct_of_value = match bridge.stock_price {
        Some(price) if value_per_share > Decimal::ZERO => Some(price / value_per_share),
        _ => None,
    };

    Ok(ValuationResult {
        terminal_cash_flow: terminal.fcff,
        terminal_cost_of_capital: terminal.cost_of_capital,
        terminal_growth_rate: terminal.revenue_growth,
        terminal_value: tv,
        pv_terminal_value,
        pv_cash_flows,
        sum_of_pv,
        probability_of_failure: adjusted.probability_of_failure,
        proceeds_if_failure: adjusted.proceeds_if_failure,
        value_of_operating_assets: adjusted.value_of_operating_assets,
        debt,
        minority_interest: bridge.minority_interest,
        cash,
        non_operating_assets: bridge.non_operating_assets,
        value_of_equity,
        value_of_options: bridge.value_of_options,
        value_of_equity_in_common_stock,
        shares_outstanding: bridge.shares_outstanding,
        value_per_share,
        price_per_share: bridge.stock_price,
        price_as_pct_of_value,
        terminal_value_pct,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credit::failure::ProceedsBasis;
    use crate::valuation::projection::project;
    use crate::valuation::projection::tests::sample_inputs;

    fn bridge() -> EquityBridge {
        EquityBridge {
            book_equity: dec!(800),
            shares_outstanding: dec!(100),
            stock_price: Some(dec!(10)),
            ..EquityBridge::default()
        }
    }

    #[test]
    fn test_terminal_value_requires_spread() {
        assert!(matches!(
            terminal_value(dec!(100), dec!(0.08), dec!(0.08)).unwrap_err(),
            ValuationError::ComputationDegenerate { .. }
        ));
        assert!(matches!(
            terminal_value(dec!(100), dec!(0.08), dec!(0.09)).unwrap_err(),
            ValuationError::ComputationDegenerate { .. }
        ));
        assert_eq!(terminal_value(dec!(100), dec!(0.08), dec!(0.03)).unwrap(), dec!(2000));
    }

    #[test]
    fn test_operating_value_is_sum_of_pv() {
        let table = project(&sample_inputs()).unwrap();
        let mut warnings = Vec::new();
        let v = aggregate(&table, &FailurePolicy::default(), &bridge(), &mut warnings).unwrap();
        let explicit: Money = table.years.iter().map(|r| r.pv_fcff).sum();
        assert_eq!(v.pv_cash_flows, explicit);
        assert_eq!(
            v.pv_terminal_value,
            v.terminal_value * table.years[9].cumulative_discount_factor
        );
        assert_eq!(v.value_of_operating_assets, v.sum_of_pv);
        assert_eq!(v.value_per_share, v.value_of_equity / dec!(100));
    }

    #[test]
    fn test_failure_blends_with_book_proceeds() {
        let table = project(&sample_inputs()).unwrap();
        let failure = FailurePolicy {
            probability_of_failure: Some(dec!(0.2)),
            proceeds_basis: ProceedsBasis::BookValue,
            distress_proceeds_pct: dec!(0.5),
        };
        let mut warnings = Vec::new();
        let v = aggregate(&table, &failure, &bridge(), &mut warnings).unwrap();
        assert_eq!(v.proceeds_if_failure, dec!(400));
        assert_eq!(
            v.value_of_operating_assets,
            v.sum_of_pv * dec!(0.8) + dec!(400) * dec!(0.2)
        );
    }

    #[test]
    fn test_equity_bridge() {
        let table = project(&sample_inputs()).unwrap();
        let b = EquityBridge {
            book_debt: dec!(200),
            lease_debt: dec!(50),
            minority_interest: dec!(30),
            cash: dec!(120),
            trapped_cash: Some(TrappedCash {
                amount: dec!(100),
                additional_tax_rate: dec!(0.1),
            }),
            non_operating_assets: dec!(40),
            value_of_options: dec!(25),
            ..bridge()
        };
        let mut warnings = Vec::new();
        let v = aggregate(&table, &FailurePolicy::default(), &b, &mut warnings).unwrap();
        assert_eq!(v.debt, dec!(250));
        assert_eq!(v.cash, dec!(110));
        assert_eq!(
            v.value_of_equity,
            v.value_of_operating_assets - dec!(250) - dec!(30) + dec!(110) + dec!(40)
        );
        assert_eq!(v.value_of_equity_in_common_stock, v.value_of_equity - dec!(25));
    }

    #[test]
    fn test_options_reduce_value_per_share() {
        let table = project(&sample_inputs()).unwrap();
        let mut warnings = Vec::new();
        let plain = aggregate(&table, &FailurePolicy::default(), &bridge(), &mut warnings).unwrap();
        let diluted = EquityBridge {
            value_of_options: dec!(50),
            ..bridge()
        };
        let with_options =
            aggregate(&table, &FailurePolicy::default(), &diluted, &mut warnings).unwrap();
        assert!(with_options.value_per_share < plain.value_per_share);
    }

    #[test]
    fn test_missing_shares() {
        let table = project(&sample_inputs()).unwrap();
        let b = EquityBridge {
            shares_outstanding: Decimal::ZERO,
            ..bridge()
        };
        let err = aggregate(&table, &FailurePolicy::default(), &b, &mut Vec::new()).unwrap_err();
        assert_eq!(err.field(), Some("shares_outstanding"));
    }

    #[test]
    fn test_price_as_pct_of_value() {
        let table = project(&sample_inputs()).unwrap();
        let v = aggregate(&table, &FailurePolicy::default(), &bridge(), &mut Vec::new()).unwrap();
        assert_eq!(v.price_as_pct_of_value, Some(dec!(10) / v.value_per_share));
        let no_price = EquityBridge {
            stock_price: None,
            ..bridge()
        };
        let v = aggregate(&table, &FailurePolicy::default(), &no_price, &mut Vec::new()).unwrap();
        assert!(v.price_as_pct_of_value.is_none());
    }
}

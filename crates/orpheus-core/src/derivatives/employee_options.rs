use rust_decimal::Decimal;
use rust_decimal::MathematicalOps;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::error::ValuationError;
use crate::types::{Money, Rate, Years};
use crate::OrpheusResult;

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Employee options outstanding at the valuation date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmployeeOptions {
    pub number_outstanding: Decimal,
    pub average_strike: Money,
    pub average_maturity: Years,
    /// Annualised standard deviation of the stock price
    #[serde(default)]
    pub volatility: Option<Rate>,
    /// Total value supplied directly, bypassing the pricer
    #[serde(default)]
    pub direct_value: Option<Money>,
}

/// Market inputs the pricer needs from the rest of the run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionMarketInputs {
    pub stock_price: Money,
    pub shares_outstanding: Decimal,
    pub risk_free_rate: Rate,
    #[serde(default)]
    pub dividend_yield: Rate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionValuation {
    pub method: String,
    pub value_per_option: Money,
    pub total_value: Money,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub adjusted_stock_price: Option<Money>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub d1: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub d2: Option<Decimal>,
    pub iterations: u32,
}

/// Prices a block of employee options.
pub trait OptionPricer {
    fn name(&self) -> &str;

    fn value_options(
        &self,
        options: &EmployeeOptions,
        market: &OptionMarketInputs,
    ) -> OrpheusResult<OptionValuation>;
}

/// Black–Scholes with the stock price adjusted for dilution from exercise.
///
/// Adjusted S = (S × n_s + W × n_w) / (n_s + n_w), where W is the option
/// value itself, so the price is solved by fixed-point iteration.
#[derive(Debug, Clone)]
pub struct DilutionAdjustedBlackScholes {
    pub tolerance: Decimal,
    pub max_iterations: u32,
}

impl Default for DilutionAdjustedBlackScholes {
    fn default() -> Self {
        Self {
            tolerance: dec!(0.0000001),
            max_iterations: 100,
        }
    }
}

// ---------------------------------------------------------------------------
// Pricing
// ---------------------------------------------------------------------------

struct CallPrice {
    value: Money,
    d1: Decimal,
    d2: Decimal,
}

fn black_scholes_call(
    spot: Money,
    strike: Money,
    years: Years,
    rate: Rate,
    dividend_yield: Rate,
    sigma: Rate,
) -> OrpheusResult<CallPrice> {
    if spot <= Decimal::ZERO {
        return Err(ValuationError::degenerate(
            "adjusted stock price is not positive",
        ));
    }
    let sqrt_t = years
        .sqrt()
        .ok_or_else(|| ValuationError::degenerate("square root of option maturity"))?;
    let sigma_sqrt_t = sigma * sqrt_t;
    if sigma_sqrt_t.is_zero() {
        return Err(ValuationError::degenerate("zero volatility × sqrt(maturity)"));
    }
    let d1 = ((spot / strike).ln() + (rate - dividend_yield + sigma * sigma / dec!(2)) * years)
        / sigma_sqrt_t;
    let d2 = d1 - sigma_sqrt_t;
    let value = spot * (-dividend_yield * years).exp() * d1.norm_cdf()
        - strike * (-rate * years).exp() * d2.norm_cdf();
    Ok(CallPrice {
        value: value.max(Decimal::ZERO),
        d1,
        d2,
    })
}

impl OptionPricer for DilutionAdjustedBlackScholes {
    fn name(&self) -> &str {
        "Dilution-adjusted Black-Scholes"
    }

    fn value_options(
        &self,
        options: &EmployeeOptions,
        market: &OptionMarketInputs,
    ) -> OrpheusResult<OptionValuation> {
        validate_options(options)?;
        if market.shares_outstanding <= Decimal::ZERO {
            return Err(ValuationError::missing("shares_outstanding"));
        }
        if market.stock_price <= Decimal::ZERO {
            return Err(ValuationError::missing("stock_price"));
        }
        let sigma = options
            .volatility
            .ok_or_else(|| ValuationError::missing("employee_options.volatility"))?;
        if sigma <= Decimal::ZERO {
            return Err(ValuationError::InvalidInput {
                field: "employee_options.volatility".into(),
                reason: "Volatility must be positive".into(),
            });
        }

        let ns = market.shares_outstanding;
        let nw = options.number_outstanding;
        let price = |spot: Money| {
            black_scholes_call(
                spot,
                options.average_strike,
                options.average_maturity,
                market.risk_free_rate,
                market.dividend_yield,
                sigma,
            )
        };

        let mut call = price(market.stock_price)?;
        let mut adjusted = market.stock_price;
        let mut delta = Decimal::ZERO;
        for iteration in 1..=self.max_iterations {
            adjusted = (market.stock_price * ns + call.value * nw) / (ns + nw);
            let next = price(adjusted)?;
            delta = (next.value - call.value).abs();
            call = next;
            if delta < self.tolerance {
                tracing::debug!(iteration, value = %call.value, "option value converged");
                return Ok(OptionValuation {
                    method: self.name().to_string(),
                    value_per_option: call.value,
                    total_value: call.value * nw,
                    adjusted_stock_price: Some(adjusted),
                    d1: Some(call.d1),
                    d2: Some(call.d2),
                    iterations: iteration,
                });
            }
        }
        tracing::warn!(%adjusted, %delta, "option value did not converge");
        Err(ValuationError::ConvergenceFailure {
            function: "dilution-adjusted Black-Scholes".into(),
            iterations: self.max_iterations,
            last_delta: delta,
        })
    }
}

fn validate_options(options: &EmployeeOptions) -> OrpheusResult<()> {
    if options.number_outstanding < Decimal::ZERO {
        return Err(ValuationError::InvalidInput {
            field: "employee_options.number_outstanding".into(),
            reason: "Number of options cannot be negative".into(),
        });
    }
    if options.average_strike <= Decimal::ZERO {
        return Err(ValuationError::InvalidInput {
            field: "employee_options.average_strike".into(),
            reason: "Strike must be positive".into(),
        });
    }
    if options.average_maturity <= Decimal::ZERO {
        return Err(ValuationError::InvalidInput {
            field: "employee_options.average_maturity".into(),
            reason: "Maturity must be positive".into(),
        });
    }
    Ok(())
}

/// Value outstanding options, preferring a directly supplied value.
pub fn value_employee_options(
    options: &EmployeeOptions,
    market: &OptionMarketInputs,
    pricer: &dyn OptionPricer,
) -> OrpheusResult<OptionValuation> {
    if let Some(total) = options.direct_value {
        if total < Decimal::ZERO {
            return Err(ValuationError::InvalidInput {
                field: "employee_options.direct_value".into(),
                reason: "Option value cannot be negative".into(),
            });
        }
        let per_option = if options.number_outstanding.is_zero() {
            Decimal::ZERO
        } else {
            total / options.number_outstanding
        };
        return Ok(OptionValuation {
            method: "Direct input".into(),
            value_per_option: per_option,
            total_value: total,
            adjusted_stock_price: None,
            d1: None,
            d2: None,
            iterations: 0,
        });
    }
    if options.number_outstanding.is_zero() {
        return Ok(OptionValuation {
            method: pricer.name().to_string(),
            value_per_option: Decimal::ZERO,
            total_value: Decimal::ZERO,
            adjusted_stock_price: None,
            d1: None,
            d2: None,
            iterations: 0,
        });
    }
    pricer.value_options(options, market)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn market() -> OptionMarketInputs {
        OptionMarketInputs {
            stock_price: dec!(100),
            shares_outstanding: dec!(1000),
            risk_free_rate: dec!(0.05),
            dividend_yield: Decimal::ZERO,
        }
    }

    fn grant(count: Decimal) -> EmployeeOptions {
        EmployeeOptions {
            number_outstanding: count,
            average_strike: dec!(100),
            average_maturity: dec!(1),
            volatility: Some(dec!(0.20)),
            direct_value: None,
        }
    }

    #[test]
    fn test_plain_call_matches_reference() {
        // S=K=100, r=5%, sigma=20%, T=1 => ~10.4506
        let c = black_scholes_call(dec!(100), dec!(100), dec!(1), dec!(0.05), dec!(0), dec!(0.2))
            .unwrap();
        assert!((c.value - dec!(10.4506)).abs() < dec!(0.01), "got {}", c.value);
    }

    #[test]
    fn test_dilution_lowers_option_value() {
        let pricer = DilutionAdjustedBlackScholes::default();
        let small = pricer.value_options(&grant(dec!(1)), &market()).unwrap();
        let large = pricer.value_options(&grant(dec!(500)), &market()).unwrap();
        assert!(large.value_per_option < small.value_per_option);
        assert!(large.adjusted_stock_price.unwrap() < dec!(100));
        assert_eq!(large.total_value, large.value_per_option * dec!(500));
    }

    #[test]
    fn test_direct_value_bypasses_pricer() {
        let mut g = grant(dec!(10));
        g.direct_value = Some(dec!(250));
        g.volatility = None;
        let v = value_employee_options(&g, &market(), &DilutionAdjustedBlackScholes::default())
            .unwrap();
        assert_eq!(v.total_value, dec!(250));
        assert_eq!(v.value_per_option, dec!(25));
        assert_eq!(v.method, "Direct input");
    }

    #[test]
    fn test_missing_volatility() {
        let mut g = grant(dec!(10));
        g.volatility = None;
        let err = value_employee_options(&g, &market(), &DilutionAdjustedBlackScholes::default())
            .unwrap_err();
        assert_eq!(err.field(), Some("employee_options.volatility"));
    }

    #[test]
    fn test_zero_options_worth_nothing() {
        let v = value_employee_options(
            &grant(Decimal::ZERO),
            &market(),
            &DilutionAdjustedBlackScholes::default(),
        )
        .unwrap();
        assert_eq!(v.total_value, Decimal::ZERO);
    }
}

//! The normalized record handed to the engine for one ticker.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::capitalization::operating_leases::{LeaseCommitments, LeasePolicy};
use crate::capitalization::research::{AmortizationLife, ResearchHistory};
use crate::credit::failure::FailurePolicy;
use crate::credit::synthetic_rating::CostOfDebtApproach;
use crate::derivatives::employee_options::EmployeeOptions;
use crate::error::ValuationError;
use crate::market_data::MarketTables;
use crate::types::{Currency, Money, Multiple, Rate};
use crate::OrpheusResult;

use super::cost_of_capital::{BetaSource, CostOfCapitalApproach};
use super::equity_risk_premium::ErpSource;

// ---------------------------------------------------------------------------
// Statements and market snapshot
// ---------------------------------------------------------------------------

/// Income-statement and balance-sheet items for one reporting window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinancialSnapshot {
    pub revenue: Money,
    pub operating_income: Money,
    #[serde(default)]
    pub interest_expense: Money,
    #[serde(default)]
    pub book_equity: Money,
    #[serde(default)]
    pub book_debt: Option<Money>,
    /// Cash and marketable securities
    #[serde(default)]
    pub cash: Money,
    /// Cross holdings and other non-operating assets
    #[serde(default)]
    pub non_operating_assets: Money,
    #[serde(default)]
    pub minority_interest: Money,
    #[serde(default)]
    pub research_and_development: Option<Money>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MarketSnapshot {
    #[serde(default)]
    pub shares_outstanding: Option<Decimal>,
    #[serde(default)]
    pub stock_price: Option<Money>,
    /// Falls back to the bond-yield table when absent
    #[serde(default)]
    pub risk_free_rate: Option<Rate>,
    #[serde(default)]
    pub country_of_incorporation: Option<String>,
    #[serde(default)]
    pub industry: Option<String>,
    #[serde(default)]
    pub dividend_yield: Rate,
}

// ---------------------------------------------------------------------------
// Policy
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaxPath {
    /// Effective rate in every year, terminal included
    #[default]
    Constant,
    /// Effective rate to year 5, then a linear walk to the marginal rate by year 10
    ConvergeToMarginal,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CostOfCapitalPath {
    /// Initial rate to year 5, then a linear walk to the terminal rate by year 10
    #[default]
    Converge,
    Constant,
}

/// Cash held abroad or discounted by the market.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrappedCash {
    pub amount: Money,
    /// Additional tax (or haircut) applied to the trapped amount
    pub additional_tax_rate: Rate,
}

fn default_mature_spread() -> Rate {
    dec!(0.045)
}

fn default_lag() -> u32 {
    1
}

fn default_margin_of_safety() -> Rate {
    dec!(0.15)
}

/// Value drivers and override switches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValuationPolicy {
    pub revenue_growth_next_year: Rate,
    /// Compounded growth for years 2–5; defaults to next year's growth
    #[serde(default)]
    pub cagr_years_2_to_5: Option<Rate>,
    /// Defaults to a straight glide from the base-year margin
    #[serde(default)]
    pub operating_margin_next_year: Option<Rate>,
    pub target_operating_margin: Rate,
    pub margin_convergence_year: u32,
    #[serde(default)]
    pub sales_to_capital_years_1_to_5: Option<Multiple>,
    /// Defaults to the years 1–5 ratio
    #[serde(default)]
    pub sales_to_capital_years_6_to_10: Option<Multiple>,
    pub effective_tax_rate: Rate,
    pub marginal_tax_rate: Rate,
    #[serde(default)]
    pub tax_path: TaxPath,
    pub cost_of_capital: CostOfCapitalApproach,
    #[serde(default)]
    pub cost_of_debt: CostOfDebtApproach,
    #[serde(default)]
    pub cost_of_capital_path: CostOfCapitalPath,
    #[serde(default)]
    pub terminal_cost_of_capital: Option<Rate>,
    /// Spread over the risk-free rate for a mature firm
    #[serde(default = "default_mature_spread")]
    pub mature_market_spread: Rate,
    /// Defaults to the terminal cost of capital
    #[serde(default)]
    pub terminal_return_on_capital: Option<Rate>,
    #[serde(default)]
    pub risk_free_rate_after_year_10: Option<Rate>,
    #[serde(default)]
    pub terminal_growth_rate: Option<Rate>,
    /// Years between reinvestment and the growth it funds (0–3)
    #[serde(default = "default_lag")]
    pub reinvestment_lag: u32,
    /// NOL carried into year 1
    #[serde(default)]
    pub nol_carryforward: Money,
    #[serde(default)]
    pub failure: FailurePolicy,
    #[serde(default)]
    pub trapped_cash: Option<TrappedCash>,
    #[serde(default)]
    pub leases: LeasePolicy,
    #[serde(default)]
    pub research_amortization_life: AmortizationLife,
    #[serde(default = "default_margin_of_safety")]
    pub margin_of_safety: Rate,
}

impl ValuationPolicy {
    pub fn validate(&self) -> OrpheusResult<()> {
        if !(1..=10).contains(&self.margin_convergence_year) {
            return Err(ValuationError::policy(
                "margin_convergence_year",
                format!(
                    "Convergence year must be between 1 and 10, got {}",
                    self.margin_convergence_year
                ),
            ));
        }
        if self.reinvestment_lag > 3 {
            return Err(ValuationError::policy(
                "reinvestment_lag",
                format!("Lag must be between 0 and 3 years, got {}", self.reinvestment_lag),
            ));
        }
        for (field, rate) in [
            ("effective_tax_rate", self.effective_tax_rate),
            ("marginal_tax_rate", self.marginal_tax_rate),
        ] {
            if rate < Decimal::ZERO || rate > Decimal::ONE {
                return Err(ValuationError::policy(field, "Tax rate must be between 0 and 1"));
            }
        }
        if self.nol_carryforward < Decimal::ZERO {
            return Err(ValuationError::policy(
                "nol_carryforward",
                "NOL carryforward cannot be negative",
            ));
        }
        if self.margin_of_safety < Decimal::ZERO {
            return Err(ValuationError::policy(
                "margin_of_safety",
                "Margin of safety cannot be negative",
            ));
        }
        if let Some(trapped) = &self.trapped_cash {
            if trapped.amount < Decimal::ZERO {
                return Err(ValuationError::policy("trapped_cash.amount", "Cannot be negative"));
            }
            if trapped.additional_tax_rate < Decimal::ZERO
                || trapped.additional_tax_rate > Decimal::ONE
            {
                return Err(ValuationError::policy(
                    "trapped_cash.additional_tax_rate",
                    "Must be between 0 and 1",
                ));
            }
        }
        self.failure.validate()
    }

    /// Sales-to-capital for years 1–5 and 6–10.
    pub fn sales_to_capital(&self) -> OrpheusResult<(Multiple, Multiple)> {
        let early = self
            .sales_to_capital_years_1_to_5
            .ok_or_else(|| ValuationError::missing("sales_to_capital_years_1_to_5"))?;
        let late = self.sales_to_capital_years_6_to_10.unwrap_or(early);
        for (label, stc) in [("years 1-5", early), ("years 6-10", late)] {
            if stc <= Decimal::ZERO {
                return Err(ValuationError::degenerate(format!(
                    "sales-to-capital ratio for {label} is {stc}"
                )));
            }
        }
        Ok((early, late))
    }
}

// ---------------------------------------------------------------------------
// Capital structure inputs (detailed cost of capital)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConvertibleDebt {
    pub book_value: Money,
    pub interest_expense: Money,
    pub maturity_years: u32,
    pub market_value: Money,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreferredStock {
    pub shares: Decimal,
    pub price: Money,
    pub annual_dividend: Money,
}

fn default_maturity() -> u32 {
    3
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapitalStructureInputs {
    pub beta: BetaSource,
    pub equity_risk_premium: ErpSource,
    #[serde(default = "default_maturity")]
    pub average_debt_maturity: u32,
    #[serde(default)]
    pub convertible_debt: Option<ConvertibleDebt>,
    #[serde(default)]
    pub preferred_stock: Option<PreferredStock>,
}

// ---------------------------------------------------------------------------
// InputRecord
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputRecord {
    pub ticker: String,
    pub as_of: NaiveDate,
    #[serde(default)]
    pub currency: Currency,
    pub last_twelve_months: FinancialSnapshot,
    #[serde(default)]
    pub last_fiscal_year: Option<FinancialSnapshot>,
    #[serde(default)]
    pub market: MarketSnapshot,
    pub policy: ValuationPolicy,
    #[serde(default)]
    pub capital_structure: Option<CapitalStructureInputs>,
    #[serde(default)]
    pub operating_leases: Option<LeaseCommitments>,
    #[serde(default)]
    pub research_and_development: Option<ResearchHistory>,
    #[serde(default)]
    pub employee_options: Option<EmployeeOptions>,
    /// Externally forecast next-period price
    #[serde(default)]
    pub price_forecast: Option<Money>,
}

impl InputRecord {
    pub fn validate(&self) -> OrpheusResult<()> {
        if self.ticker.trim().is_empty() {
            return Err(ValuationError::missing("ticker"));
        }
        self.policy.validate()
    }

    /// Today's risk-free rate, else the bond yield for the country of incorporation.
    pub fn risk_free_rate(&self, tables: &MarketTables) -> OrpheusResult<Rate> {
        if let Some(rf) = self.market.risk_free_rate {
            return Ok(rf);
        }
        let country = self
            .market
            .country_of_incorporation
            .as_deref()
            .ok_or_else(|| ValuationError::missing("risk_free_rate"))?;
        tables.bond_yield(country)
    }

    pub fn shares_outstanding(&self) -> OrpheusResult<Decimal> {
        match self.market.shares_outstanding {
            Some(s) if s > Decimal::ZERO => Ok(s),
            _ => Err(ValuationError::missing("shares_outstanding")),
        }
    }

    pub fn stock_price(&self) -> OrpheusResult<Money> {
        match self.market.stock_price {
            Some(p) if p > Decimal::ZERO => Ok(p),
            _ => Err(ValuationError::missing("stock_price")),
        }
    }

    /// Book debt where a consumer cannot proceed without it.
    pub fn book_debt(&self) -> OrpheusResult<Money> {
        match self.last_twelve_months.book_debt {
            Some(d) if d > Decimal::ZERO => Ok(d),
            _ => Err(ValuationError::missing("book_debt")),
        }
    }

    /// Reported book debt; zero is accepted for a debt-free firm.
    pub fn reported_book_debt(&self) -> OrpheusResult<Money> {
        match self.last_twelve_months.book_debt {
            Some(d) if d >= Decimal::ZERO => Ok(d),
            Some(_) => Err(ValuationError::InvalidInput {
                field: "book_debt".into(),
                reason: "Book debt cannot be negative".into(),
            }),
            None => Err(ValuationError::missing("book_debt")),
        }
    }

    /// LTM revenue growth over the last 10-K, when both are present.
    pub fn trailing_growth(&self) -> Option<Rate> {
        let prior = self.last_fiscal_year.as_ref()?;
        if prior.revenue <= Decimal::ZERO {
            return None;
        }
        Some(self.last_twelve_months.revenue / prior.revenue - Decimal::ONE)
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    /// LTM revenue 1000 at a 15% margin, 10% growth fading to 3%, flat 10% WACC.
    pub fn simple_record() -> InputRecord {
        InputRecord {
            ticker: "SMPL".into(),
            as_of: NaiveDate::from_ymd_opt(2024, 6, 30).unwrap(),
            currency: Currency::USD,
            last_twelve_months: FinancialSnapshot {
                revenue: dec!(1000),
                operating_income: dec!(150),
                interest_expense: Decimal::ZERO,
                book_equity: dec!(800),
                book_debt: Some(Decimal::ZERO),
                cash: Decimal::ZERO,
                non_operating_assets: Decimal::ZERO,
                minority_interest: Decimal::ZERO,
                research_and_development: None,
            },
            last_fiscal_year: None,
            market: MarketSnapshot {
                shares_outstanding: Some(dec!(100)),
                stock_price: Some(dec!(10)),
                risk_free_rate: Some(dec!(0.03)),
                country_of_incorporation: Some("United States".into()),
                industry: None,
                dividend_yield: Decimal::ZERO,
            },
            policy: ValuationPolicy {
                revenue_growth_next_year: dec!(0.10),
                cagr_years_2_to_5: None,
                operating_margin_next_year: None,
                target_operating_margin: dec!(0.15),
                margin_convergence_year: 5,
                sales_to_capital_years_1_to_5: Some(dec!(1.2)),
                sales_to_capital_years_6_to_10: Some(dec!(1.2)),
                effective_tax_rate: dec!(0.25),
                marginal_tax_rate: dec!(0.25),
                tax_path: TaxPath::Constant,
                cost_of_capital: CostOfCapitalApproach::DirectInput {
                    cost_of_capital: dec!(0.10),
                },
                cost_of_debt: CostOfDebtApproach::default(),
                cost_of_capital_path: CostOfCapitalPath::Constant,
                terminal_cost_of_capital: None,
                mature_market_spread: default_mature_spread(),
                terminal_return_on_capital: None,
                risk_free_rate_after_year_10: None,
                terminal_growth_rate: None,
                reinvestment_lag: 1,
                nol_carryforward: Decimal::ZERO,
                failure: FailurePolicy::default(),
                trapped_cash: None,
                leases: LeasePolicy::default(),
                research_amortization_life: AmortizationLife::default(),
                margin_of_safety: default_margin_of_safety(),
            },
            capital_structure: None,
            operating_leases: None,
            research_and_development: None,
            employee_options: None,
            price_forecast: None,
        }
    }
}

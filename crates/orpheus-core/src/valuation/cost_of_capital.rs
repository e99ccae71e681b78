use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::credit::synthetic_rating::CostOfDebtEstimate;
use crate::error::ValuationError;
use crate::market_data::{IndustryRegion, MarketTables, RiskDecile};
use crate::time_value::pv_annuity_plus_bullet;
use crate::types::{Money, Multiple, Rate};
use crate::OrpheusResult;

use super::equity_risk_premium::estimate_erp;
use super::inputs::{CostOfCapitalPath, InputRecord, ValuationPolicy};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// One line of business and the revenue it earns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusinessSegment {
    pub industry: String,
    pub revenue: Money,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mix", rename_all = "snake_case")]
pub enum BusinessMix {
    /// Falls back to the record's industry when `industry` is absent
    Single {
        #[serde(default)]
        industry: Option<String>,
    },
    /// Weighted by estimated value (revenue × industry EV/sales)
    Multi { segments: Vec<BusinessSegment> },
}

impl Default for BusinessMix {
    fn default() -> Self {
        Self::Single { industry: None }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BetaSource {
    Levered {
        beta: Decimal,
    },
    Unlevered {
        beta: Decimal,
    },
    IndustryAverage {
        #[serde(default)]
        region: IndustryRegion,
        #[serde(default)]
        businesses: BusinessMix,
    },
}

/// How the initial cost of capital is estimated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "approach", rename_all = "snake_case")]
pub enum CostOfCapitalApproach {
    DirectInput {
        cost_of_capital: Rate,
    },
    Detailed,
    IndustryAverage {
        #[serde(default)]
        region: IndustryRegion,
        #[serde(default)]
        businesses: BusinessMix,
    },
    Distribution {
        grouping: String,
        #[serde(default)]
        decile: RiskDecile,
    },
}

impl CostOfCapitalApproach {
    pub fn strategy(&self) -> Box<dyn CostOfCapitalStrategy> {
        match self {
            Self::DirectInput { cost_of_capital } => Box::new(DirectInput {
                cost_of_capital: *cost_of_capital,
            }),
            Self::Detailed => Box::new(Detailed),
            Self::IndustryAverage { region, businesses } => Box::new(IndustryAverage {
                region: *region,
                businesses: businesses.clone(),
            }),
            Self::Distribution { grouping, decile } => Box::new(Distribution {
                grouping: grouping.clone(),
                decile: *decile,
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentWeight {
    pub market_value: Money,
    pub weight: Decimal,
    pub cost: Rate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapitalComponents {
    pub equity: ComponentWeight,
    pub debt: ComponentWeight,
    pub preferred: ComponentWeight,
    pub straight_debt: Money,
    pub convertible_debt_component: Money,
    pub convertible_equity_component: Money,
    pub lease_debt: Money,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentWeight {
    pub industry: String,
    pub revenue: Money,
    pub estimated_value: Money,
    pub weight: Decimal,
    pub unlevered_beta: Decimal,
    pub cost_of_capital: Rate,
}

/// Industry figures blended across a firm's businesses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndustryBlend {
    pub unlevered_beta: Decimal,
    pub cost_of_capital: Rate,
    pub segments: Vec<SegmentWeight>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapitalStructureResult {
    pub approach: String,
    pub risk_free_rate: Rate,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub levered_beta: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unlevered_beta: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub equity_risk_premium: Option<Rate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cost_of_equity: Option<Rate>,
    pub pretax_cost_of_debt: Rate,
    pub after_tax_cost_of_debt: Rate,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cost_of_preferred: Option<Rate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub components: Option<CapitalComponents>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub industry_blend: Option<IndustryBlend>,
    /// Cost of capital for the explicit forecast
    pub cost_of_capital: Rate,
    pub terminal_cost_of_capital: Rate,
    #[serde(skip)]
    pub warnings: Vec<String>,
}

// ---------------------------------------------------------------------------
// Strategies
// ---------------------------------------------------------------------------

/// Everything a strategy may read for one run.
pub struct CostOfCapitalContext<'a> {
    pub record: &'a InputRecord,
    pub tables: &'a MarketTables,
    pub risk_free_rate: Rate,
    pub cost_of_debt: &'a CostOfDebtEstimate,
    pub lease_debt: Money,
}

impl CostOfCapitalContext<'_> {
    fn base_result(&self, approach: &str, cost_of_capital: Rate) -> CapitalStructureResult {
        let kd = self.cost_of_debt.pretax_cost_of_debt;
        CapitalStructureResult {
            approach: approach.to_string(),
            risk_free_rate: self.risk_free_rate,
            levered_beta: None,
            unlevered_beta: None,
            equity_risk_premium: None,
            cost_of_equity: None,
            pretax_cost_of_debt: kd,
            after_tax_cost_of_debt: kd * (Decimal::ONE - self.record.policy.marginal_tax_rate),
            cost_of_preferred: None,
            components: None,
            industry_blend: None,
            cost_of_capital,
            terminal_cost_of_capital: cost_of_capital,
            warnings: Vec::new(),
        }
    }

    /// Shift a table rate by the gap between today's and the table's risk-free rate.
    fn adjust_for_risk_free(&self, table_rate: Rate) -> Rate {
        table_rate + (self.risk_free_rate - self.tables.table_risk_free_rate)
    }
}

/// Estimates the initial cost of capital from an input record.
pub trait CostOfCapitalStrategy {
    fn name(&self) -> &str;

    fn estimate(&self, ctx: &CostOfCapitalContext<'_>) -> OrpheusResult<CapitalStructureResult>;
}

#[derive(Debug, Clone)]
pub struct DirectInput {
    pub cost_of_capital: Rate,
}

impl CostOfCapitalStrategy for DirectInput {
    fn name(&self) -> &str {
        "Direct input"
    }

    fn estimate(&self, ctx: &CostOfCapitalContext<'_>) -> OrpheusResult<CapitalStructureResult> {
        if self.cost_of_capital < Decimal::ZERO {
            return Err(ValuationError::policy(
                "cost_of_capital",
                "Cost of capital cannot be negative",
            ));
        }
        Ok(ctx.base_result(self.name(), self.cost_of_capital))
    }
}

/// Market-value weights with CAPM cost of equity.
#[derive(Debug, Clone)]
pub struct Detailed;

impl CostOfCapitalStrategy for Detailed {
    fn name(&self) -> &str {
        "Detailed"
    }

    fn estimate(&self, ctx: &CostOfCapitalContext<'_>) -> OrpheusResult<CapitalStructureResult> {
        let record = ctx.record;
        let inputs = record
            .capital_structure
            .as_ref()
            .ok_or_else(|| ValuationError::missing("capital_structure"))?;
        let book_debt = record.book_debt()?;
        let shares = record.shares_outstanding()?;
        let price = record.stock_price()?;
        let kd = ctx.cost_of_debt.pretax_cost_of_debt;
        let tax = record.policy.marginal_tax_rate;
        let mut warnings = Vec::new();

        // Debt
        let straight_debt = pv_annuity_plus_bullet(
            record.last_twelve_months.interest_expense,
            book_debt,
            kd,
            inputs.average_debt_maturity,
        )?;
        let (convertible_debt_component, convertible_equity_component) =
            match &inputs.convertible_debt {
                Some(cv) => {
                    let debt_part = pv_annuity_plus_bullet(
                        cv.interest_expense,
                        cv.book_value,
                        kd,
                        cv.maturity_years,
                    )?;
                    let equity_part = cv.market_value - debt_part;
                    if equity_part < Decimal::ZERO {
                        warnings.push(format!(
                            "Convertible value {} is below its straight-debt value {debt_part}",
                            cv.market_value
                        ));
                    }
                    (debt_part, equity_part)
                }
                None => (Decimal::ZERO, Decimal::ZERO),
            };
        let debt_value = straight_debt + convertible_debt_component + ctx.lease_debt;

        // Equity and preferred
        let equity_value = shares * price + convertible_equity_component;
        let (preferred_value, cost_of_preferred) = match &inputs.preferred_stock {
            Some(ps) => {
                if ps.price <= Decimal::ZERO {
                    return Err(ValuationError::missing("preferred_stock.price"));
                }
                (ps.shares * ps.price, ps.annual_dividend / ps.price)
            }
            None => (Decimal::ZERO, Decimal::ZERO),
        };
        if equity_value <= Decimal::ZERO {
            return Err(ValuationError::degenerate("market value of equity is not positive"));
        }

        // Beta
        let debt_to_equity = debt_value / equity_value;
        let (levered_beta, unlevered_beta, blend) = match &inputs.beta {
            BetaSource::Levered { beta } => {
                (*beta, Some(unlever_beta(*beta, tax, debt_to_equity)?), None)
            }
            BetaSource::Unlevered { beta } => {
                (relever_beta(*beta, tax, debt_to_equity), Some(*beta), None)
            }
            BetaSource::IndustryAverage { region, businesses } => {
                let blend = industry_blend(
                    ctx.tables,
                    *region,
                    businesses,
                    record.market.industry.as_deref(),
                )?;
                let bu = blend.unlevered_beta;
                (relever_beta(bu, tax, debt_to_equity), Some(bu), Some(blend))
            }
        };
        if levered_beta <= Decimal::ZERO {
            return Err(ValuationError::InvalidInput {
                field: "beta".into(),
                reason: "Beta must be positive".into(),
            });
        }

        // Costs
        let erp = estimate_erp(
            &inputs.equity_risk_premium,
            record.market.country_of_incorporation.as_deref(),
            ctx.tables,
        )?;
        warnings.extend(erp.warnings.iter().cloned());
        let cost_of_equity = ctx.risk_free_rate + levered_beta * erp.premium;
        let after_tax_kd = kd * (Decimal::ONE - tax);

        let total = equity_value + debt_value + preferred_value;
        let we = equity_value / total;
        let wd = debt_value / total;
        let wp = preferred_value / total;
        let wacc = cost_of_equity * we + after_tax_kd * wd + cost_of_preferred * wp;

        if wacc < ctx.risk_free_rate {
            warnings.push(format!(
                "Cost of capital {wacc} is below the risk-free rate {}",
                ctx.risk_free_rate
            ));
        }
        tracing::debug!(%levered_beta, %cost_of_equity, %wacc, "detailed cost of capital");

        let mut result = ctx.base_result(self.name(), wacc);
        result.levered_beta = Some(levered_beta);
        result.unlevered_beta = unlevered_beta;
        result.equity_risk_premium = Some(erp.premium);
        result.cost_of_equity = Some(cost_of_equity);
        result.after_tax_cost_of_debt = after_tax_kd;
        result.cost_of_preferred = inputs.preferred_stock.as_ref().map(|_| cost_of_preferred);
        result.components = Some(CapitalComponents {
            equity: ComponentWeight {
                market_value: equity_value,
                weight: we,
                cost: cost_of_equity,
            },
            debt: ComponentWeight {
                market_value: debt_value,
                weight: wd,
                cost: after_tax_kd,
            },
            preferred: ComponentWeight {
                market_value: preferred_value,
                weight: wp,
                cost: cost_of_preferred,
            },
            straight_debt,
            convertible_debt_component,
            convertible_equity_component,
            lease_debt: ctx.lease_debt,
        });
        result.industry_blend = blend;
        result.warnings = warnings;
        Ok(result)
    }
}

/// Published industry cost of capital, moved by the risk-free rate gap.
#[derive(Debug, Clone)]
pub struct IndustryAverage {
    pub region: IndustryRegion,
    pub businesses: BusinessMix,
}

impl CostOfCapitalStrategy for IndustryAverage {
    fn name(&self) -> &str {
        "Industry average"
    }

    fn estimate(&self, ctx: &CostOfCapitalContext<'_>) -> OrpheusResult<CapitalStructureResult> {
        let blend = industry_blend(
            ctx.tables,
            self.region,
            &self.businesses,
            ctx.record.market.industry.as_deref(),
        )?;
        let rate = ctx.adjust_for_risk_free(blend.cost_of_capital);
        let mut result = ctx.base_result(self.name(), rate);
        result.unlevered_beta = Some(blend.unlevered_beta);
        result.industry_blend = Some(blend);
        Ok(result)
    }
}

/// A point in the cross-sectional distribution of costs of capital.
#[derive(Debug, Clone)]
pub struct Distribution {
    pub grouping: String,
    pub decile: RiskDecile,
}

impl CostOfCapitalStrategy for Distribution {
    fn name(&self) -> &str {
        "Distribution"
    }

    fn estimate(&self, ctx: &CostOfCapitalContext<'_>) -> OrpheusResult<CapitalStructureResult> {
        let deciles = ctx.tables.cost_of_capital_deciles(&self.grouping)?;
        let rate = ctx.adjust_for_risk_free(deciles.at(self.decile));
        Ok(ctx.base_result(self.name(), rate))
    }
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Terminal rate: override, else mature-firm rate on the converging path,
/// else the initial rate.
pub fn terminal_cost_of_capital(
    policy: &ValuationPolicy,
    initial: Rate,
    risk_free_rate: Rate,
) -> Rate {
    if let Some(rate) = policy.terminal_cost_of_capital {
        return rate;
    }
    match policy.cost_of_capital_path {
        CostOfCapitalPath::Converge => {
            policy.risk_free_rate_after_year_10.unwrap_or(risk_free_rate)
                + policy.mature_market_spread
        }
        CostOfCapitalPath::Constant => initial,
    }
}

/// Run the configured strategy and attach the terminal rate.
pub fn estimate_cost_of_capital(
    ctx: &CostOfCapitalContext<'_>,
) -> OrpheusResult<CapitalStructureResult> {
    let policy = &ctx.record.policy;
    let strategy = policy.cost_of_capital.strategy();
    let mut result = strategy.estimate(ctx)?;
    if result.cost_of_capital < Decimal::ZERO {
        return Err(ValuationError::policy(
            "cost_of_capital",
            format!("{} produced a negative cost of capital", strategy.name()),
        ));
    }
    result.terminal_cost_of_capital =
        terminal_cost_of_capital(policy, result.cost_of_capital, ctx.risk_free_rate);
    if result.terminal_cost_of_capital < Decimal::ZERO {
        return Err(ValuationError::policy(
            "terminal_cost_of_capital",
            "Terminal cost of capital cannot be negative",
        ));
    }
    Ok(result)
}

/// Unlevered beta and cost of capital across a firm's businesses.
pub fn industry_blend(
    tables: &MarketTables,
    region: IndustryRegion,
    mix: &BusinessMix,
    default_industry: Option<&str>,
) -> OrpheusResult<IndustryBlend> {
    match mix {
        BusinessMix::Single { industry } => {
            let name = industry
                .as_deref()
                .or(default_industry)
                .ok_or_else(|| ValuationError::missing("industry"))?;
            let avg = tables.industry(region, name)?;
            Ok(IndustryBlend {
                unlevered_beta: avg.unlevered_beta,
                cost_of_capital: avg.cost_of_capital,
                segments: vec![SegmentWeight {
                    industry: name.to_string(),
                    revenue: Decimal::ZERO,
                    estimated_value: Decimal::ZERO,
                    weight: Decimal::ONE,
                    unlevered_beta: avg.unlevered_beta,
                    cost_of_capital: avg.cost_of_capital,
                }],
            })
        }
        BusinessMix::Multi { segments } => {
            let mut rows = Vec::with_capacity(segments.len());
            for seg in segments {
                if seg.revenue < Decimal::ZERO {
                    return Err(ValuationError::InvalidInput {
                        field: "businesses.revenue".into(),
                        reason: format!("Revenue for '{}' cannot be negative", seg.industry),
                    });
                }
                if seg.revenue.is_zero() {
                    continue;
                }
                let avg = tables.industry(region, &seg.industry)?;
                let ev_to_sales: Multiple =
                    avg.ev_to_sales.ok_or_else(|| ValuationError::LookupMiss {
                        table: "industry EV/sales".into(),
                        key: seg.industry.clone(),
                    })?;
                rows.push(SegmentWeight {
                    industry: seg.industry.clone(),
                    revenue: seg.revenue,
                    estimated_value: seg.revenue * ev_to_sales,
                    weight: Decimal::ZERO,
                    unlevered_beta: avg.unlevered_beta,
                    cost_of_capital: avg.cost_of_capital,
                });
            }
            let total: Money = rows.iter().map(|r| r.estimated_value).sum();
            if total <= Decimal::ZERO {
                return Err(ValuationError::degenerate(
                    "estimated value across businesses is zero",
                ));
            }
            let mut unlevered_beta = Decimal::ZERO;
            let mut cost_of_capital = Decimal::ZERO;
            for row in rows.iter_mut() {
                row.weight = row.estimated_value / total;
                unlevered_beta += row.weight * row.unlevered_beta;
                cost_of_capital += row.weight * row.cost_of_capital;
            }
            Ok(IndustryBlend {
                unlevered_beta,
                cost_of_capital,
                segments: rows,
            })
        }
    }
}

/// Unlever a beta using the Hamada equation.
///
/// Beta_U = Beta_L / (1 + (1 - t) * D/E)
pub fn unlever_beta(
    levered_beta: Decimal,
    tax_rate: Rate,
    debt_equity: Decimal,
) -> OrpheusResult<Decimal> {
    let denom = Decimal::ONE + (Decimal::ONE - tax_rate) * debt_equity;
    if denom.is_zero() {
        return Err(ValuationError::degenerate("Hamada unlever denominator"));
    }
    Ok(levered_beta / denom)
}

/// Re-lever a beta using the Hamada equation.
///
/// Beta_L = Beta_U * (1 + (1 - t) * D/E)
pub fn relever_beta(unlevered_beta: Decimal, tax_rate: Rate, debt_equity: Decimal) -> Decimal {
    unlevered_beta * (Decimal::ONE + (Decimal::ONE - tax_rate) * debt_equity)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

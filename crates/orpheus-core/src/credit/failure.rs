use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::error::ValuationError;
use crate::types::{Money, Rate};
use crate::OrpheusResult;

/// What distress proceeds are measured against.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProceedsBasis {
    /// Book value of equity plus book value of debt
    #[default]
    BookValue,
    /// Present value of the going-concern cash flows
    FairValue,
}

fn default_proceeds_pct() -> Rate {
    dec!(0.5)
}

/// Probability that the firm fails and what is recovered when it does.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailurePolicy {
    /// Defaults to zero when absent.
    #[serde(default)]
    pub probability_of_failure: Option<Rate>,
    #[serde(default)]
    pub proceeds_basis: ProceedsBasis,
    /// Fraction of the basis recovered in distress
    #[serde(default = "default_proceeds_pct")]
    pub distress_proceeds_pct: Rate,
}

impl Default for FailurePolicy {
    fn default() -> Self {
        Self {
            probability_of_failure: None,
            proceeds_basis: ProceedsBasis::default(),
            distress_proceeds_pct: default_proceeds_pct(),
        }
    }
}

/// Expected value of operating assets once failure is allowed for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureAdjustment {
    pub probability_of_failure: Rate,
    pub proceeds_if_failure: Money,
    pub value_of_operating_assets: Money,
}

impl FailurePolicy {
    pub fn probability(&self) -> Rate {
        self.probability_of_failure.unwrap_or(Decimal::ZERO)
    }

    pub fn validate(&self) -> OrpheusResult<()> {
        let p = self.probability();
        if p < Decimal::ZERO || p > Decimal::ONE {
            return Err(ValuationError::policy(
                "probability_of_failure",
                format!("Probability of failure must lie in [0, 1], got {p}"),
            ));
        }
        if self.distress_proceeds_pct < Decimal::ZERO || self.distress_proceeds_pct > Decimal::ONE {
            return Err(ValuationError::policy(
                "distress_proceeds_pct",
                "Distress proceeds must be a fraction between 0 and 1",
            ));
        }
        Ok(())
    }

    /// Proceeds recovered if the firm fails.
    pub fn distress_proceeds(&self, book_capital: Money, going_concern_value: Money) -> Money {
        let basis = match self.proceeds_basis {
            ProceedsBasis::BookValue => book_capital,
            ProceedsBasis::FairValue => going_concern_value,
        };
        basis * self.distress_proceeds_pct
    }

    /// value = going concern × (1 − p) + proceeds × p
    pub fn apply(
        &self,
        going_concern_value: Money,
        book_capital: Money,
    ) -> OrpheusResult<FailureAdjustment> {
        self.validate()?;
        let p = self.probability();
        let proceeds = self.distress_proceeds(book_capital, going_concern_value);
        Ok(FailureAdjustment {
            probability_of_failure: p,
            proceeds_if_failure: proceeds,
            value_of_operating_assets: going_concern_value * (Decimal::ONE - p) + proceeds * p,
        })
    }
}

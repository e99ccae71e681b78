pub mod aggregation;
pub mod cost_of_capital;
pub mod equity_risk_premium;
pub mod inputs;
pub mod model;
pub mod projection;
pub mod signal;

#[cfg(feature = "batch")]
pub mod batch;

pub use model::{estimate_capital_structure, run_valuation, ValuationReport};

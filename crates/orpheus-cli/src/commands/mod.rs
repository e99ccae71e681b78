pub mod batch;
pub mod capitalization;
pub mod cost_of_capital;
pub mod credit;
pub mod valuation;

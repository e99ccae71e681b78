pub mod capitalization;
pub mod credit;
pub mod derivatives;
pub mod error;
pub mod market_data;
pub mod time_value;
pub mod types;

#[cfg(feature = "valuation")]
pub mod valuation;

pub use error::ValuationError;
pub use market_data::MarketTables;
pub use types::*;

/// Standard result type for all valuation computations
pub type OrpheusResult<T> = Result<T, ValuationError>;

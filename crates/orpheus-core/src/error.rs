use rust_decimal::Decimal;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ValuationError {
    /// A required input field is absent (or zero where a scraper left a hole).
    #[error("Missing input: {field}")]
    MissingInput { field: String },

    /// Override parameters are out of domain or mutually inconsistent.
    #[error("Invalid policy: {field} — {reason}")]
    InvalidPolicy { field: String, reason: String },

    /// A denominator that must be a positive rate or ratio is zero or negative.
    #[error("Degenerate computation: {context}")]
    ComputationDegenerate { context: String },

    #[error("Invalid input: {field} — {reason}")]
    InvalidInput { field: String, reason: String },

    #[error("Convergence failure: {function} did not converge after {iterations} iterations (delta: {last_delta})")]
    ConvergenceFailure {
        function: String,
        iterations: u32,
        last_delta: Decimal,
    },

    #[error("Lookup miss: no entry for '{key}' in {table}")]
    LookupMiss { table: String, key: String },

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl ValuationError {
    /// Name of the input or policy field responsible, when there is one.
    pub fn field(&self) -> Option<&str> {
        match self {
            Self::MissingInput { field }
            | Self::InvalidPolicy { field, .. }
            | Self::InvalidInput { field, .. } => Some(field),
            _ => None,
        }
    }

    pub(crate) fn missing(field: &str) -> Self {
        Self::MissingInput {
            field: field.to_string(),
        }
    }

    pub(crate) fn policy(field: &str, reason: impl Into<String>) -> Self {
        Self::InvalidPolicy {
            field: field.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn degenerate(context: impl Into<String>) -> Self {
        Self::ComputationDegenerate {
            context: context.into(),
        }
    }
}

impl From<serde_json::Error> for ValuationError {
    fn from(e: serde_json::Error) -> Self {
        ValuationError::SerializationError(e.to_string())
    }
}

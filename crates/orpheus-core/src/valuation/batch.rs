//! Many tickers at once on a bounded thread pool.
//!
//! Each run is independent and single-threaded; the pool only spreads runs
//! across workers. Cancellation is checked before each run starts.

use std::sync::atomic::{AtomicBool, Ordering};

use rayon::prelude::*;
use serde::Serialize;

use crate::error::ValuationError;
use crate::market_data::MarketTables;
use crate::types::ComputationOutput;
use crate::OrpheusResult;

use super::inputs::InputRecord;
use super::model::{run_valuation, ValuationReport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchConfig {
    /// Worker threads; 0 lets rayon pick
    pub workers: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self { workers: 4 }
    }
}

#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BatchOutcome {
    Valued { output: Box<ComputationOutput<ValuationReport>> },
    Failed { error: String },
    Cancelled,
}

#[derive(Debug, Serialize)]
pub struct BatchEntry {
    pub ticker: String,
    pub outcome: BatchOutcome,
}

impl BatchEntry {
    pub fn is_valued(&self) -> bool {
        matches!(self.outcome, BatchOutcome::Valued { .. })
    }
}

/// Value every record, returning one entry per record in input order.
pub fn run_batch(
    records: &[InputRecord],
    tables: &MarketTables,
    config: BatchConfig,
    cancel: &AtomicBool,
) -> OrpheusResult<Vec<BatchEntry>> {
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(config.workers)
        .build()
        .map_err(|e| ValuationError::policy("workers", e.to_string()))?;

    tracing::debug!(records = records.len(), workers = config.workers, "batch started");

    let entries = pool.install(|| {
        records
            .par_iter()
            .map(|record| {
                let outcome = if cancel.load(Ordering::Relaxed) {
                    BatchOutcome::Cancelled
                } else {
                    match run_valuation(record, tables) {
                        Ok(output) => BatchOutcome::Valued {
                            output: Box::new(output),
                        },
                        Err(e) => {
                            tracing::warn!(ticker = %record.ticker, error = %e, "valuation failed");
                            BatchOutcome::Failed {
                                error: e.to_string(),
                            }
                        }
                    }
                };
                BatchEntry {
                    ticker: record.ticker.clone(),
                    outcome,
                }
            })
            .collect::<Vec<_>>()
    });

    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::valuation::inputs::fixtures::simple_record;

    #[test]
    fn test_each_ticker_gets_its_own_result() {
        let good = simple_record();
        let mut bad = simple_record();
        bad.ticker = "BAD".into();
        bad.market.shares_outstanding = None;

        let cancel = AtomicBool::new(false);
        let out = run_batch(
            &[good, bad],
            &MarketTables::default(),
            BatchConfig { workers: 2 },
            &cancel,
        )
        .unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].ticker, "SMPL");
        assert!(out[0].is_valued());
        assert!(matches!(out[1].outcome, BatchOutcome::Failed { .. }));
    }

    #[test]
    fn test_cancelled_before_start() {
        let cancel = AtomicBool::new(true);
        let out = run_batch(
            &[simple_record(), simple_record()],
            &MarketTables::default(),
            BatchConfig::default(),
            &cancel,
        )
        .unwrap();
        assert!(out
            .iter()
            .all(|e| matches!(e.outcome, BatchOutcome::Cancelled)));
    }
}

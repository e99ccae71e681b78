use clap::Args;
use serde_json::{json, Value};
use std::sync::atomic::AtomicBool;

use orpheus_core::valuation::batch::{run_batch as value_all, BatchConfig, BatchOutcome};
use orpheus_core::valuation::inputs::InputRecord;

use crate::input;

/// Arguments for a multi-ticker run
#[derive(Args)]
pub struct BatchArgs {
    /// Path to a JSON/YAML file holding a list of input records
    #[arg(long)]
    pub input: Option<String>,

    /// Path to market lookup tables (JSON or YAML)
    #[arg(long)]
    pub tables: Option<String>,

    /// Worker threads
    #[arg(long, default_value = "4")]
    pub workers: usize,

    /// Emit full reports instead of one summary row per ticker
    #[arg(long)]
    pub full: bool,
}

pub fn run_batch(args: BatchArgs) -> Result<Value, Box<dyn std::error::Error>> {
    let records: Vec<InputRecord> =
        input::read_required(args.input.as_deref(), "a list of input records")?;
    let tables = input::load_tables(args.tables.as_deref())?;
    let cancel = AtomicBool::new(false);

    let entries = value_all(
        &records,
        &tables,
        BatchConfig {
            workers: args.workers,
        },
        &cancel,
    )?;

    if args.full {
        return Ok(json!({ "results": entries }));
    }

    let rows: Vec<Value> = entries
        .iter()
        .map(|entry| match &entry.outcome {
            BatchOutcome::Valued { output } => {
                let v = &output.result.valuation;
                json!({
                    "ticker": entry.ticker,
                    "status": "valued",
                    "value_per_share": v.value_per_share.round_dp(4).to_string(),
                    "price": v.price_per_share.map(|p| p.to_string()),
                    "action": output.result.recommendation.as_ref().map(|r| r.action.to_string()),
                    "error": Value::Null,
                })
            }
            BatchOutcome::Failed { error } => json!({
                "ticker": entry.ticker,
                "status": "failed",
                "value_per_share": Value::Null,
                "price": Value::Null,
                "action": Value::Null,
                "error": error,
            }),
            BatchOutcome::Cancelled => json!({
                "ticker": entry.ticker,
                "status": "cancelled",
                "value_per_share": Value::Null,
                "price": Value::Null,
                "action": Value::Null,
                "error": Value::Null,
            }),
        })
        .collect();

    Ok(json!({ "results": rows }))
}

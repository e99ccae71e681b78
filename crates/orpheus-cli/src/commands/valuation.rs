use clap::Args;
use serde_json::Value;

use orpheus_core::valuation::inputs::InputRecord;
use orpheus_core::valuation::run_valuation;

use crate::input;

/// Arguments for a full valuation
#[derive(Args)]
pub struct ValueArgs {
    /// Path to the input record (JSON or YAML)
    #[arg(long)]
    pub input: Option<String>,

    /// Path to market lookup tables (JSON or YAML)
    #[arg(long)]
    pub tables: Option<String>,

    /// Override the signal's margin of safety (e.g. 0.2)
    #[arg(long)]
    pub margin_of_safety: Option<rust_decimal::Decimal>,
}

pub fn run_value(args: ValueArgs) -> Result<Value, Box<dyn std::error::Error>> {
    let mut record: InputRecord = input::read_required(args.input.as_deref(), "an input record")?;
    if let Some(margin) = args.margin_of_safety {
        record.policy.margin_of_safety = margin;
    }
    let tables = input::load_tables(args.tables.as_deref())?;

    let result = run_valuation(&record, &tables)?;
    Ok(serde_json::to_value(result)?)
}

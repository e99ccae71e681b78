use clap::Args;
use serde_json::Value;

use orpheus_core::valuation::estimate_capital_structure;
use orpheus_core::valuation::inputs::InputRecord;

use crate::input;

/// Arguments for a standalone cost-of-capital estimate
#[derive(Args)]
pub struct CostOfCapitalArgs {
    /// Path to the input record (JSON or YAML)
    #[arg(long)]
    pub input: Option<String>,

    /// Path to market lookup tables (JSON or YAML)
    #[arg(long)]
    pub tables: Option<String>,
}

pub fn run_cost_of_capital(args: CostOfCapitalArgs) -> Result<Value, Box<dyn std::error::Error>> {
    let record: InputRecord = input::read_required(args.input.as_deref(), "an input record")?;
    let tables = input::load_tables(args.tables.as_deref())?;

    let result = estimate_capital_structure(&record, &tables)?;
    Ok(serde_json::to_value(result)?)
}

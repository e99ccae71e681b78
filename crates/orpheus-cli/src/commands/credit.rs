use clap::Args;
use rust_decimal::Decimal;
use serde_json::Value;

use orpheus_core::credit::synthetic_rating::{
    calculate_synthetic_rating, FirmSize, SyntheticRatingInput,
};

use crate::input;

/// Arguments for a synthetic rating
#[derive(Args)]
#[command(allow_hyphen_values = true)]
pub struct SyntheticRatingArgs {
    /// Operating income (after lease and R&D adjustments)
    #[arg(long)]
    pub ebit: Option<Decimal>,

    /// Interest expense
    #[arg(long)]
    pub interest_expense: Option<Decimal>,

    /// Risk-free rate (e.g. 0.04 for 4%)
    #[arg(long)]
    pub risk_free_rate: Option<Decimal>,

    /// Use the small-firm coverage table
    #[arg(long)]
    pub small_firm: bool,

    /// Path to market lookup tables (custom rating tables)
    #[arg(long)]
    pub tables: Option<String>,

    /// Path to JSON/YAML input file (overrides individual flags)
    #[arg(long)]
    pub input: Option<String>,
}

pub fn run_synthetic_rating(
    args: SyntheticRatingArgs,
) -> Result<Value, Box<dyn std::error::Error>> {
    let rating_input: SyntheticRatingInput = if let Some(ref path) = args.input {
        input::file::read_input(path)?
    } else if let Some(data) = input::stdin::read_stdin()? {
        serde_json::from_value(data)?
    } else {
        SyntheticRatingInput {
            ebit: args.ebit.ok_or("--ebit is required (or provide --input)")?,
            interest_expense: args
                .interest_expense
                .ok_or("--interest-expense is required (or provide --input)")?,
            risk_free_rate: args
                .risk_free_rate
                .ok_or("--risk-free-rate is required (or provide --input)")?,
            firm_size: if args.small_firm {
                FirmSize::Small
            } else {
                FirmSize::Large
            },
        }
    };
    let tables = input::load_tables(args.tables.as_deref())?;

    let result = calculate_synthetic_rating(&rating_input, &tables)?;
    Ok(serde_json::to_value(result)?)
}

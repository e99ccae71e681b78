use clap::{Args, ValueEnum};
use rust_decimal::Decimal;
use serde_json::Value;

use orpheus_core::capitalization::operating_leases::{
    calculate_lease_debt, LeaseCommitments, LeaseDebtInput, LeasePolicy, PaymentTiming,
};
use orpheus_core::capitalization::research::{
    calculate_research_asset, AmortizationLife, ResearchHistory,
};

use crate::input;

/// Arguments for lease-to-debt conversion
#[derive(Args)]
pub struct LeaseDebtArgs {
    /// Current-year operating lease expense
    #[arg(long)]
    pub current_expense: Option<Decimal>,

    /// Commitments for years 1-5, comma separated
    #[arg(long, value_delimiter = ',')]
    pub commitments: Vec<Decimal>,

    /// Lump commitment for year 6 and beyond
    #[arg(long, default_value = "0")]
    pub beyond_year_five: Decimal,

    /// Pre-tax cost of debt used as the discount rate
    #[arg(long)]
    pub cost_of_debt: Option<Decimal>,

    /// Treat payments as falling at the start of each year
    #[arg(long)]
    pub beginning_of_year: bool,

    /// Path to JSON/YAML input file (overrides individual flags)
    #[arg(long)]
    pub input: Option<String>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum LifeArg {
    Short,
    Medium,
    Long,
}

/// Arguments for R&D capitalization
#[derive(Args)]
pub struct RdAssetArgs {
    /// Current-year R&D expense
    #[arg(long)]
    pub current: Option<Decimal>,

    /// Prior years' R&D, most recent first, comma separated
    #[arg(long, value_delimiter = ',')]
    pub past: Vec<Decimal>,

    /// Amortization life (3, 5 or 10 years)
    #[arg(long, value_enum, default_value = "medium")]
    pub life: LifeArg,

    /// Custom amortization life in years (1-10), overrides --life
    #[arg(long)]
    pub years: Option<u32>,

    /// Path to JSON/YAML input file with a research history
    #[arg(long)]
    pub input: Option<String>,
}

pub fn run_lease_debt(args: LeaseDebtArgs) -> Result<Value, Box<dyn std::error::Error>> {
    let lease_input: LeaseDebtInput = if let Some(ref path) = args.input {
        input::file::read_input(path)?
    } else if let Some(data) = input::stdin::read_stdin()? {
        serde_json::from_value(data)?
    } else {
        let commitments: [Decimal; 5] = args
            .commitments
            .as_slice()
            .try_into()
            .map_err(|_| "--commitments needs exactly five values (or provide --input)")?;
        LeaseDebtInput {
            leases: LeaseCommitments {
                current_expense: args
                    .current_expense
                    .ok_or("--current-expense is required (or provide --input)")?,
                commitments,
                beyond_year_five: args.beyond_year_five,
            },
            pretax_cost_of_debt: Some(
                args.cost_of_debt
                    .ok_or("--cost-of-debt is required (or provide --input)")?,
            ),
            risk_free_rate: Decimal::ZERO,
            policy: LeasePolicy {
                payment_timing: if args.beginning_of_year {
                    PaymentTiming::BeginningOfYear
                } else {
                    PaymentTiming::EndOfYear
                },
                ..LeasePolicy::default()
            },
        }
    };

    let result = calculate_lease_debt(&lease_input)?;
    Ok(serde_json::to_value(result)?)
}

pub fn run_rd_asset(args: RdAssetArgs) -> Result<Value, Box<dyn std::error::Error>> {
    let history: ResearchHistory = if let Some(ref path) = args.input {
        input::file::read_input(path)?
    } else if let Some(data) = input::stdin::read_stdin()? {
        serde_json::from_value(data)?
    } else {
        ResearchHistory {
            current: args.current.ok_or("--current is required (or provide --input)")?,
            past: args.past,
        }
    };
    let life = match (args.years, args.life) {
        (Some(n), _) => AmortizationLife::Custom(n),
        (None, LifeArg::Short) => AmortizationLife::Short,
        (None, LifeArg::Medium) => AmortizationLife::Medium,
        (None, LifeArg::Long) => AmortizationLife::Long,
    };

    let result = calculate_research_asset(&history, life)?;
    Ok(serde_json::to_value(result)?)
}

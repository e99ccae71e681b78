mod commands;
mod input;
mod output;

use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use std::process;

use commands::batch::BatchArgs;
use commands::capitalization::{LeaseDebtArgs, RdAssetArgs};
use commands::cost_of_capital::CostOfCapitalArgs;
use commands::credit::SyntheticRatingArgs;
use commands::valuation::ValueArgs;

/// Intrinsic equity valuation from normalized filings
#[derive(Parser)]
#[command(
    name = "orpheus",
    version,
    about = "Intrinsic equity valuation from normalized filings",
    long_about = "A CLI for ten-year FCFF valuations with decimal precision. Capitalizes \
                  operating leases and R&D, estimates a synthetic rating and cost of capital, \
                  projects free cash flow and bridges to value per share."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format
    #[arg(long, default_value = "json", global = true)]
    output: OutputFormat,

    /// Log engine stages to stderr (overridden by RUST_LOG)
    #[arg(long, short, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Value one company from an input record
    Value(ValueArgs),
    /// Value many companies in parallel
    Batch(BatchArgs),
    /// Estimate the cost of capital for an input record
    CostOfCapital(CostOfCapitalArgs),
    /// Synthetic credit rating from interest coverage
    SyntheticRating(SyntheticRatingArgs),
    /// Convert operating lease commitments to debt
    LeaseDebt(LeaseDebtArgs),
    /// Capitalize R&D spend into a research asset
    RdAsset(RdAssetArgs),
    /// Print version information
    Version,
}

#[derive(Debug, Clone, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Csv,
    Minimal,
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "orpheus_core=debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default)),
        )
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let result: Result<serde_json::Value, Box<dyn std::error::Error>> = match cli.command {
        Commands::Value(args) => commands::valuation::run_value(args),
        Commands::Batch(args) => commands::batch::run_batch(args),
        Commands::CostOfCapital(args) => commands::cost_of_capital::run_cost_of_capital(args),
        Commands::SyntheticRating(args) => commands::credit::run_synthetic_rating(args),
        Commands::LeaseDebt(args) => commands::capitalization::run_lease_debt(args),
        Commands::RdAsset(args) => commands::capitalization::run_rd_asset(args),
        Commands::Version => {
            println!("orpheus {}", env!("CARGO_PKG_VERSION"));
            return;
        }
    };

    match result {
        Ok(value) => {
            output::format_output(&cli.output, &value);
            process::exit(0);
        }
        Err(e) => {
            eprintln!("{}: {}", "error".red().bold(), e);
            process::exit(1);
        }
    }
}

pub mod file;
pub mod stdin;

use orpheus_core::MarketTables;
use serde::de::DeserializeOwned;

/// Typed input from `--input`, else piped stdin.
pub fn read_required<T: DeserializeOwned>(
    path: Option<&str>,
    what: &str,
) -> Result<T, Box<dyn std::error::Error>> {
    if let Some(path) = path {
        return file::read_input(path);
    }
    match stdin::read_stdin()? {
        Some(value) => Ok(serde_json::from_value(value)?),
        None => Err(format!("--input file (or piped stdin) with {what} is required").into()),
    }
}

/// Lookup tables from `--tables`, else the built-in rating tables only.
pub fn load_tables(path: Option<&str>) -> Result<MarketTables, Box<dyn std::error::Error>> {
    let tables = match path {
        Some(p) => file::read_input(p)?,
        None => MarketTables::default(),
    };
    tables.validate()?;
    Ok(tables)
}

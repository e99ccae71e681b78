//! Read-only reference tables consumed by a valuation run.
//!
//! Tables are refreshed out of band (bond-yield scrapes, academic data sets)
//! and handed to the engine by reference; nothing here is cached globally.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::credit::synthetic_rating::{FirmSize, RatingTable};
use crate::error::ValuationError;
use crate::types::{Multiple, Rate};
use crate::OrpheusResult;

/// Keyed lookup with case-insensitive, whitespace-trimmed keys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LookupTable<V> {
    entries: BTreeMap<String, V>,
}

impl<V> Default for LookupTable<V> {
    fn default() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }
}

impl<V> LookupTable<V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: &str, value: V) {
        self.entries.insert(key.trim().to_string(), value);
    }

    pub fn with(mut self, key: &str, value: V) -> Self {
        self.insert(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&V> {
        let key = key.trim();
        self.entries.get(key).or_else(|| {
            self.entries
                .iter()
                .find(|(k, _)| k.trim().eq_ignore_ascii_case(key))
                .map(|(_, v)| v)
        })
    }

    /// Like [`get`](Self::get) but a miss is an error naming the table.
    pub fn require(&self, table: &str, key: &str) -> OrpheusResult<&V> {
        self.get(key).ok_or_else(|| ValuationError::LookupMiss {
            table: table.to_string(),
            key: key.to_string(),
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}

/// Published industry averages used by the industry-average strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndustryAverage {
    pub unlevered_beta: Decimal,
    pub cost_of_capital: Rate,
    /// EV / sales, used to weight a multi-business firm
    #[serde(default)]
    pub ev_to_sales: Option<Multiple>,
}

/// Cost-of-capital distribution for one market grouping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostOfCapitalDeciles {
    pub first_decile: Rate,
    pub first_quartile: Rate,
    pub median: Rate,
    pub third_quartile: Rate,
    pub ninth_decile: Rate,
}

/// Position in a cost-of-capital distribution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskDecile {
    FirstDecile,
    FirstQuartile,
    #[default]
    Median,
    ThirdQuartile,
    NinthDecile,
}

impl CostOfCapitalDeciles {
    pub fn at(&self, decile: RiskDecile) -> Rate {
        match decile {
            RiskDecile::FirstDecile => self.first_decile,
            RiskDecile::FirstQuartile => self.first_quartile,
            RiskDecile::Median => self.median,
            RiskDecile::ThirdQuartile => self.third_quartile,
            RiskDecile::NinthDecile => self.ninth_decile,
        }
    }
}

/// Which industry table to read.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndustryRegion {
    #[default]
    US,
    Global,
}

fn default_table_risk_free_rate() -> Rate {
    dec!(0.0388)
}

/// Every lookup table a valuation run may consult.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketTables {
    /// Country → 10-year government bond yield
    #[serde(default)]
    pub bond_yields: LookupTable<Rate>,
    /// Country → total equity risk premium
    #[serde(default)]
    pub country_equity_risk_premiums: LookupTable<Rate>,
    /// Region → total equity risk premium
    #[serde(default)]
    pub region_equity_risk_premiums: LookupTable<Rate>,
    #[serde(default = "RatingTable::damodaran_large_firm")]
    pub large_firm_ratings: RatingTable,
    #[serde(default = "RatingTable::damodaran_small_firm")]
    pub small_firm_ratings: RatingTable,
    #[serde(default)]
    pub industries_us: LookupTable<IndustryAverage>,
    #[serde(default)]
    pub industries_global: LookupTable<IndustryAverage>,
    /// Market grouping (US, Europe, Emerging Markets, ...) → deciles
    #[serde(default)]
    pub cost_of_capital_distribution: LookupTable<CostOfCapitalDeciles>,
    /// Risk-free rate embedded in the industry and distribution tables
    #[serde(default = "default_table_risk_free_rate")]
    pub table_risk_free_rate: Rate,
}

impl Default for MarketTables {
    fn default() -> Self {
        Self {
            bond_yields: LookupTable::new(),
            country_equity_risk_premiums: LookupTable::new(),
            region_equity_risk_premiums: LookupTable::new(),
            large_firm_ratings: RatingTable::damodaran_large_firm(),
            small_firm_ratings: RatingTable::damodaran_small_firm(),
            industries_us: LookupTable::new(),
            industries_global: LookupTable::new(),
            cost_of_capital_distribution: LookupTable::new(),
            table_risk_free_rate: default_table_risk_free_rate(),
        }
    }
}

impl MarketTables {
    pub fn rating_table(&self, size: FirmSize) -> &RatingTable {
        match size {
            FirmSize::Large => &self.large_firm_ratings,
            FirmSize::Small => &self.small_firm_ratings,
        }
    }

    pub fn industries(&self, region: IndustryRegion) -> &LookupTable<IndustryAverage> {
        match region {
            IndustryRegion::US => &self.industries_us,
            IndustryRegion::Global => &self.industries_global,
        }
    }

    pub fn bond_yield(&self, country: &str) -> OrpheusResult<Rate> {
        self.bond_yields.require("bond yields", country).copied()
    }

    pub fn country_erp(&self, country: &str) -> OrpheusResult<Rate> {
        self.country_equity_risk_premiums
            .require("country equity risk premiums", country)
            .copied()
    }

    pub fn region_erp(&self, region: &str) -> OrpheusResult<Rate> {
        self.region_equity_risk_premiums
            .require("region equity risk premiums", region)
            .copied()
    }

    pub fn industry(&self, region: IndustryRegion, name: &str) -> OrpheusResult<&IndustryAverage> {
        let table = match region {
            IndustryRegion::US => "US industry averages",
            IndustryRegion::Global => "global industry averages",
        };
        self.industries(region).require(table, name)
    }

    pub fn cost_of_capital_deciles(&self, grouping: &str) -> OrpheusResult<&CostOfCapitalDeciles> {
        self.cost_of_capital_distribution
            .require("cost of capital distribution", grouping)
    }

    /// Table-level sanity checks run once before a valuation.
    pub fn validate(&self) -> OrpheusResult<()> {
        self.large_firm_ratings.validate()?;
        self.small_firm_ratings.validate()?;
        for (name, deciles) in self.cost_of_capital_distribution.entries.iter() {
            let ordered = deciles.first_decile <= deciles.first_quartile
                && deciles.first_quartile <= deciles.median
                && deciles.median <= deciles.third_quartile
                && deciles.third_quartile <= deciles.ninth_decile;
            if !ordered {
                return Err(ValuationError::InvalidInput {
                    field: "cost_of_capital_distribution".into(),
                    reason: format!("Deciles for '{name}' are not ascending"),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_is_case_insensitive() {
        let t = LookupTable::new().with("United States", dec!(0.0425));
        assert_eq!(t.get("united states"), Some(&dec!(0.0425)));
        assert_eq!(t.get("  United States "), Some(&dec!(0.0425)));
        assert!(t.get("Canada").is_none());
    }

    #[test]
    fn test_require_names_table_on_miss() {
        let tables = MarketTables::default();
        match tables.bond_yield("Atlantis").unwrap_err() {
            ValuationError::LookupMiss { table, key } => {
                assert_eq!(table, "bond yields");
                assert_eq!(key, "Atlantis");
            }
            e => panic!("Expected LookupMiss, got {e:?}"),
        }
    }

    #[test]
    fn test_default_tables_validate() {
        assert!(MarketTables::default().validate().is_ok());
    }

    #[test]
    fn test_tables_deserialize_with_defaults() {
        let json = r#"{ "bond_yields": { "Germany": "0.024" } }"#;
        let tables: MarketTables = serde_json::from_str(json).unwrap();
        assert_eq!(tables.bond_yield("germany").unwrap(), dec!(0.024));
        assert_eq!(tables.table_risk_free_rate, dec!(0.0388));
        assert!(!tables.large_firm_ratings.brackets.is_empty());
    }

    #[test]
    fn test_unordered_deciles_rejected() {
        let mut tables = MarketTables::default();
        tables.cost_of_capital_distribution.insert(
            "US",
            CostOfCapitalDeciles {
                first_decile: dec!(0.09),
                first_quartile: dec!(0.07),
                median: dec!(0.08),
                third_quartile: dec!(0.09),
                ninth_decile: dec!(0.11),
            },
        );
        assert!(tables.validate().is_err());
    }
}

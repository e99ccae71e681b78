use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::ValuationError;
use crate::market_data::MarketTables;
use crate::types::{Money, Rate};
use crate::OrpheusResult;

/// Revenue earned in one country or region.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RevenueExposure {
    pub name: String,
    pub revenue: Money,
    /// Overrides the table premium for this entry (e.g. "Rest of World")
    #[serde(default)]
    pub premium: Option<Rate>,
}

/// Where the equity risk premium comes from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum ErpSource {
    Direct { premium: Rate },
    CountryOfIncorporation,
    OperatingCountries { exposures: Vec<RevenueExposure> },
    OperatingRegions { exposures: Vec<RevenueExposure> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErpWeight {
    pub name: String,
    pub revenue: Money,
    pub weight: Decimal,
    pub premium: Rate,
    pub weighted_premium: Rate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErpEstimate {
    pub source: String,
    pub premium: Rate,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub weights: Vec<ErpWeight>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

/// Revenue-weighted premium across exposures.
///
/// Zero-revenue entries get weight 0 and are never looked up. An empty set or
/// zero total revenue yields a premium of 0 with a warning.
pub fn revenue_weighted_erp<F>(
    exposures: &[RevenueExposure],
    lookup: F,
) -> OrpheusResult<ErpEstimate>
where
    F: Fn(&str) -> OrpheusResult<Rate>,
{
    if let Some(neg) = exposures.iter().find(|e| e.revenue < Decimal::ZERO) {
        return Err(ValuationError::InvalidInput {
            field: "equity_risk_premium.exposures".into(),
            reason: format!("Revenue for '{}' cannot be negative", neg.name),
        });
    }

    let total: Money = exposures.iter().map(|e| e.revenue).sum();
    let mut warnings = Vec::new();
    let mut weights = Vec::with_capacity(exposures.len());
    let mut premium = Decimal::ZERO;

    if total.is_zero() {
        warnings.push("No revenue exposure supplied; weighted equity risk premium set to 0".into());
        tracing::warn!("revenue-weighted ERP requested with zero total revenue");
    }

    for e in exposures {
        let (weight, erp) = if total.is_zero() || e.revenue.is_zero() {
            (Decimal::ZERO, e.premium.unwrap_or(Decimal::ZERO))
        } else {
            let erp = match e.premium {
                Some(p) => p,
                None => lookup(&e.name)?,
            };
            (e.revenue / total, erp)
        };
        let weighted = weight * erp;
        premium += weighted;
        weights.push(ErpWeight {
            name: e.name.clone(),
            revenue: e.revenue,
            weight,
            premium: erp,
            weighted_premium: weighted,
        });
    }

    Ok(ErpEstimate {
        source: String::new(),
        premium,
        weights,
        warnings,
    })
}

/// Resolve the equity risk premium for the configured source.
pub fn estimate_erp(
    source: &ErpSource,
    country_of_incorporation: Option<&str>,
    tables: &MarketTables,
) -> OrpheusResult<ErpEstimate> {
    match source {
        ErpSource::Direct { premium } => {
            if *premium < Decimal::ZERO {
                return Err(ValuationError::policy(
                    "equity_risk_premium",
                    "Equity risk premium cannot be negative",
                ));
            }
            Ok(ErpEstimate {
                source: "Direct input".into(),
                premium: *premium,
                weights: Vec::new(),
                warnings: Vec::new(),
            })
        }
        ErpSource::CountryOfIncorporation => {
            let country = country_of_incorporation
                .ok_or_else(|| ValuationError::missing("country_of_incorporation"))?;
            Ok(ErpEstimate {
                source: format!("Country of incorporation ({country})"),
                premium: tables.country_erp(country)?,
                weights: Vec::new(),
                warnings: Vec::new(),
            })
        }
        ErpSource::OperatingCountries { exposures } => {
            let mut est = revenue_weighted_erp(exposures, |c| tables.country_erp(c))?;
            est.source = "Operating countries".into();
            Ok(est)
        }
        ErpSource::OperatingRegions { exposures } => {
            let mut est = revenue_weighted_erp(exposures, |r| tables.region_erp(r))?;
            est.source = "Operating regions".into();
            Ok(est)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market_data::LookupTable;
    use rust_decimal_macros::dec;

    fn exposure(name: &str, revenue: Decimal) -> RevenueExposure {
        RevenueExposure {
            name: name.into(),
            revenue,
            premium: None,
        }
    }

    fn tables() -> MarketTables {
        MarketTables {
            country_equity_risk_premiums: LookupTable::new()
                .with("United States", dec!(0.046))
                .with("China", dec!(0.058))
                .with("Brazil", dec!(0.083)),
            region_equity_risk_premiums: LookupTable::new()
                .with("Western Europe", dec!(0.055))
                .with("Asia", dec!(0.062)),
            ..MarketTables::default()
        }
    }

    #[test]
    fn test_weights_sum_to_one() {
        let exposures = vec![
            exposure("United States", dec!(600)),
            exposure("China", dec!(300)),
            exposure("Brazil", dec!(100)),
        ];
        let t = tables();
        let est = estimate_erp(&ErpSource::OperatingCountries { exposures }, None, &t).unwrap();
        let sum: Decimal = est.weights.iter().map(|w| w.weight).sum();
        assert!((sum - Decimal::ONE).abs() < dec!(0.000000001));
        // 0.6*0.046 + 0.3*0.058 + 0.1*0.083
        assert_eq!(est.premium, dec!(0.0533));
    }

    #[test]
    fn test_empty_set_is_zero_without_division() {
        let est = revenue_weighted_erp(&[], |_| Ok(dec!(0.05))).unwrap();
        assert_eq!(est.premium, Decimal::ZERO);
        assert!(est.weights.is_empty());
        assert_eq!(est.warnings.len(), 1);
    }

    #[test]
    fn test_zero_revenue_entries_not_looked_up() {
        let exposures = vec![
            exposure("United States", dec!(100)),
            exposure("Atlantis", Decimal::ZERO),
        ];
        let t = tables();
        let est = revenue_weighted_erp(&exposures, |c| t.country_erp(c)).unwrap();
        assert_eq!(est.premium, dec!(0.046));
        assert_eq!(est.weights[1].weight, Decimal::ZERO);
    }

    #[test]
    fn test_all_zero_revenue_is_zero() {
        let exposures = vec![exposure("China", Decimal::ZERO), exposure("Brazil", Decimal::ZERO)];
        let est = revenue_weighted_erp(&exposures, |_| Ok(dec!(0.07))).unwrap();
        assert_eq!(est.premium, Decimal::ZERO);
        assert!(est.weights.iter().all(|w| w.weight.is_zero()));
    }

    #[test]
    fn test_override_premium_used() {
        let exposures = vec![
            exposure("Western Europe", dec!(50)),
            RevenueExposure {
                name: "Rest of World".into(),
                revenue: dec!(50),
                premium: Some(dec!(0.065)),
            },
        ];
        let t = tables();
        let est = estimate_erp(&ErpSource::OperatingRegions { exposures }, None, &t).unwrap();
        assert_eq!(est.premium, dec!(0.06));
    }

    #[test]
    fn test_country_of_incorporation_requires_country() {
        let err = estimate_erp(&ErpSource::CountryOfIncorporation, None, &tables()).unwrap_err();
        assert_eq!(err.field(), Some("country_of_incorporation"));
        let est =
            estimate_erp(&ErpSource::CountryOfIncorporation, Some("china"), &tables()).unwrap();
        assert_eq!(est.premium, dec!(0.058));
    }

    #[test]
    fn test_unknown_country_is_lookup_miss() {
        let exposures = vec![exposure("Atlantis", dec!(10))];
        let err = estimate_erp(&ErpSource::OperatingCountries { exposures }, None, &tables())
            .unwrap_err();
        assert!(matches!(err, ValuationError::LookupMiss { .. }));
    }
}

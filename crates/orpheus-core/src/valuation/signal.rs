use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::types::{Money, Rate};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Buy,
    Hold,
    Sell,
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Action::Buy => write!(f, "BUY"),
            Action::Hold => write!(f, "HOLD"),
            Action::Sell => write!(f, "SELL"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub action: Action,
    /// value / price − 1
    pub upside: Rate,
    pub margin_of_safety: Rate,
    /// None when no forecast was supplied
    pub forecast_confirms: Option<bool>,
    pub rationale: String,
}

/// Compare intrinsic value to price.
///
/// Returns `None` when there is no positive price to compare against.
pub fn recommend(
    value_per_share: Money,
    price: Option<Money>,
    margin_of_safety: Rate,
    price_forecast: Option<Money>,
) -> Option<Recommendation> {
    let price = price.filter(|p| *p > Decimal::ZERO)?;
    let upside = value_per_share / price - Decimal::ONE;
    let pct = (upside * dec!(100)).round_dp(1);

    let raw = if upside >= margin_of_safety {
        Action::Buy
    } else if upside <= -margin_of_safety {
        Action::Sell
    } else {
        Action::Hold
    };

    let forecast_confirms = price_forecast.map(|f| match raw {
        Action::Buy => f >= price,
        Action::Sell => f <= price,
        Action::Hold => true,
    });

    let (action, rationale) = match (raw, forecast_confirms) {
        (Action::Hold, _) => (
            Action::Hold,
            format!("Value is within the {margin_of_safety} margin of price ({pct}% upside)"),
        ),
        (_, Some(false)) => (
            Action::Hold,
            format!("{raw} on value ({pct}% upside) not confirmed by the price forecast"),
        ),
        (_, _) => (raw, format!("{pct}% upside against a {margin_of_safety} margin of safety")),
    };

    Some(Recommendation {
        action,
        upside,
        margin_of_safety,
        forecast_confirms,
        rationale,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buy_and_sell_thresholds() {
        let r = recommend(dec!(12), Some(dec!(10)), dec!(0.15), None).unwrap();
        assert_eq!(r.action, Action::Buy);
        assert_eq!(r.upside, dec!(0.2));

        let r = recommend(dec!(8), Some(dec!(10)), dec!(0.15), None).unwrap();
        assert_eq!(r.action, Action::Sell);

        let r = recommend(dec!(11), Some(dec!(10)), dec!(0.15), None).unwrap();
        assert_eq!(r.action, Action::Hold);
    }

    #[test]
    fn test_boundary_is_inclusive() {
        let r = recommend(dec!(11.5), Some(dec!(10)), dec!(0.15), None).unwrap();
        assert_eq!(r.action, Action::Buy);
        let r = recommend(dec!(8.5), Some(dec!(10)), dec!(0.15), None).unwrap();
        assert_eq!(r.action, Action::Sell);
    }

    #[test]
    fn test_forecast_must_confirm() {
        let r = recommend(dec!(15), Some(dec!(10)), dec!(0.15), Some(dec!(9))).unwrap();
        assert_eq!(r.action, Action::Hold);
        assert_eq!(r.forecast_confirms, Some(false));

        let r = recommend(dec!(15), Some(dec!(10)), dec!(0.15), Some(dec!(11))).unwrap();
        assert_eq!(r.action, Action::Buy);

        let r = recommend(dec!(5), Some(dec!(10)), dec!(0.15), Some(dec!(9))).unwrap();
        assert_eq!(r.action, Action::Sell);
    }

    #[test]
    fn test_no_price_no_recommendation() {
        assert!(recommend(dec!(10), None, dec!(0.15), None).is_none());
        assert!(recommend(dec!(10), Some(Decimal::ZERO), dec!(0.15), None).is_none());
    }
}

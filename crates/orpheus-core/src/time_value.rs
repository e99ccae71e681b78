use rust_decimal::Decimal;
use rust_decimal::MathematicalOps;
use rust_decimal_macros::dec;

use crate::error::ValuationError;
use crate::types::{Money, Rate};
use crate::OrpheusResult;

/// Discount factor 1 / (1 + r)^n for a whole number of periods.
pub fn discount_factor(rate: Rate, periods: u32) -> OrpheusResult<Decimal> {
    if rate <= dec!(-1) {
        return Err(ValuationError::InvalidInput {
            field: "rate".into(),
            reason: "Discount rate must be greater than -100%".into(),
        });
    }
    let growth = (Decimal::ONE + rate).powi(periods as i64);
    if growth.is_zero() {
        return Err(ValuationError::degenerate(format!(
            "discount factor at period {periods}"
        )));
    }
    Ok(Decimal::ONE / growth)
}

/// Present value of a single amount received `periods` from now.
pub fn pv_lump_sum(amount: Money, rate: Rate, periods: u32) -> OrpheusResult<Money> {
    Ok(amount * discount_factor(rate, periods)?)
}

/// Present value of a level annuity paid at the end of each of `periods` years.
///
/// PV = C * (1 - (1 + r)^-n) / r, falling back to C * n when r = 0.
pub fn pv_annuity(payment: Money, rate: Rate, periods: u32) -> OrpheusResult<Money> {
    if periods == 0 {
        return Ok(Decimal::ZERO);
    }
    if rate.is_zero() {
        return Ok(payment * Decimal::from(periods));
    }
    let df = discount_factor(rate, periods)?;
    Ok(payment * (Decimal::ONE - df) / rate)
}

/// Value of a bond paying `coupon` a year and `face` at maturity, discounted at `rate`.
///
/// Used to estimate the market value of book debt from its interest expense.
pub fn pv_annuity_plus_bullet(
    coupon: Money,
    face: Money,
    rate: Rate,
    periods: u32,
) -> OrpheusResult<Money> {
    Ok(pv_annuity(coupon, rate, periods)? + pv_lump_sum(face, rate, periods)?)
}

use orpheus_core::credit::failure::{FailurePolicy, ProceedsBasis};
use orpheus_core::credit::synthetic_rating::{
    calculate_synthetic_rating, rate_firm, resolve_cost_of_debt, CostOfDebtApproach, CreditRating,
    FirmSize, InterestCoverage, RatingTable, SyntheticRatingInput,
};
use orpheus_core::{MarketTables, ValuationError};
use pretty_assertions::assert_eq;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

// ===========================================================================
// Synthetic rating
// ===========================================================================

#[test]
fn test_coverage_maps_to_rating_and_spread() {
    let table = RatingTable::damodaran_large_firm();
    // coverage 5.0 sits in the A bracket (4.25 to 5.5)
    let r = rate_firm(dec!(500), dec!(100), dec!(0.04), &table).unwrap();
    assert_eq!(r.rating, CreditRating::A);
    assert_eq!(r.default_spread, dec!(0.0107));
    assert_eq!(r.pretax_cost_of_debt, dec!(0.0507));
}

#[test]
fn test_breakpoint_belongs_to_upper_bracket() {
    let table = RatingTable::damodaran_large_firm();
    let r = rate_firm(dec!(850), dec!(100), dec!(0.04), &table).unwrap();
    assert_eq!(r.rating, CreditRating::AAA);
}

#[test]
fn test_zero_interest_is_sentinel_not_division() {
    let tables = MarketTables::default();
    let out = calculate_synthetic_rating(
        &SyntheticRatingInput {
            ebit: dec!(100),
            interest_expense: Decimal::ZERO,
            risk_free_rate: dec!(0.04),
            firm_size: FirmSize::Large,
        },
        &tables,
    )
    .unwrap();
    assert_eq!(out.result.coverage, InterestCoverage::NoInterestExpense);
    assert_eq!(out.result.rating, CreditRating::AAA);
    assert_eq!(out.warnings.len(), 1);
}

#[test]
fn test_negative_ebit_rates_as_default() {
    let table = RatingTable::damodaran_large_firm();
    let r = rate_firm(dec!(-50), dec!(10), dec!(0.04), &table).unwrap();
    assert_eq!(r.coverage, InterestCoverage::NegativeEarnings);
    assert_eq!(r.rating, CreditRating::D);
}

#[test]
fn test_small_firm_table_is_stricter() {
    let tables = MarketTables::default();
    let large = rate_firm(dec!(400), dec!(100), dec!(0.04), tables.rating_table(FirmSize::Large))
        .unwrap();
    let small = rate_firm(dec!(400), dec!(100), dec!(0.04), tables.rating_table(FirmSize::Small))
        .unwrap();
    assert!(small.default_spread > large.default_spread);
}

#[test]
fn test_actual_rating_uses_table_spread() {
    let tables = MarketTables::default();
    let est = resolve_cost_of_debt(
        &CostOfDebtApproach::ActualRating {
            rating: CreditRating::BBB,
        },
        dec!(1),
        dec!(1),
        dec!(0.04),
        &tables,
    )
    .unwrap();
    assert_eq!(est.pretax_cost_of_debt, dec!(0.0547));
    assert_eq!(est.rating, Some(CreditRating::BBB));
}

#[test]
fn test_rating_symbols_parse() {
    assert_eq!("BBB".parse::<CreditRating>().unwrap(), CreditRating::BBB);
    assert_eq!("A+".parse::<CreditRating>().unwrap(), CreditRating::Ap);
    assert!(matches!(
        "ZZZ".parse::<CreditRating>().unwrap_err(),
        ValuationError::InvalidInput { .. }
    ));
}

// ===========================================================================
// Failure
// ===========================================================================

#[test]
fn test_fair_value_proceeds() {
    let policy = FailurePolicy {
        probability_of_failure: Some(dec!(0.25)),
        proceeds_basis: ProceedsBasis::FairValue,
        distress_proceeds_pct: dec!(0.4),
    };
    let adj = policy.apply(dec!(1000), dec!(300)).unwrap();
    assert_eq!(adj.proceeds_if_failure, dec!(400));
    // 1000 * 0.75 + 400 * 0.25
    assert_eq!(adj.value_of_operating_assets, dec!(850));
}

#[test]
fn test_probability_out_of_range() {
    let policy = FailurePolicy {
        probability_of_failure: Some(dec!(1.5)),
        ..FailurePolicy::default()
    };
    assert_eq!(
        policy.apply(dec!(1000), dec!(300)).unwrap_err().field(),
        Some("probability_of_failure")
    );
}

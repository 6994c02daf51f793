// tests/test_sqrt.rs - Integration tests for the square-root unit.
//
// Both strategies take the Q16.16 root of a non-negative operand as the integer
// root of `raw << 16`, rounded to nearest, so they must agree on every input and
// stay within half a raw unit of the exact root.

use proptest::prelude::*;
use waldo_background::core_modules::fixed_point::FixedPoint;
use waldo_background::core_modules::sqrt_unit::{NewtonRaphsonSqrt, ShiftSubtractSqrt, SqrtStrategy};
use waldo_background::error::EngineError;

fn exact_raw_root(raw: i32) -> f64 {
    ((raw as f64) * 65536.0).sqrt()
}

#[test]
fn known_values() {
    let unit = ShiftSubtractSqrt;
    let cases = [(0.0, 0.0), (1.0, 1.0), (4.0, 2.0), (2.0, 1.41421), (0.25, 0.5), (66.66667, 8.16497)];
    for (input, expected) in cases {
        let root = unit.sqrt(FixedPoint::from_f64(input)).unwrap();
        assert!(
            (root.to_f64() - expected).abs() < 1e-4,
            "sqrt({input}) = {root}, expected {expected}"
        );
    }
}

#[test]
fn negative_operands_are_errors_for_every_strategy() {
    let strategies: [&dyn SqrtStrategy; 2] = [&ShiftSubtractSqrt, &NewtonRaphsonSqrt];
    for unit in strategies {
        assert_eq!(
            unit.sqrt(FixedPoint::from_f64(-2.0)),
            Err(EngineError::NegativeSqrtOperand { raw: -131072 }),
            "{}",
            unit.name()
        );
    }
}

#[test]
fn strategies_are_named() {
    assert_eq!(ShiftSubtractSqrt.name(), "shift-subtract");
    assert_eq!(NewtonRaphsonSqrt.name(), "newton-raphson");
}

proptest! {
    #[test]
    fn shift_subtract_matches_newton_raphson(raw in 0..=i32::MAX) {
        let x = FixedPoint::from_raw(raw);
        prop_assert_eq!(ShiftSubtractSqrt.sqrt(x).unwrap(), NewtonRaphsonSqrt.sqrt(x).unwrap());
    }

    #[test]
    fn root_is_rounded_to_nearest(raw in 0..=i32::MAX) {
        let root = ShiftSubtractSqrt.sqrt(FixedPoint::from_raw(raw)).unwrap();
        prop_assert!((root.raw() as f64 - exact_raw_root(raw)).abs() <= 0.5 + 1e-6);
    }

    #[test]
    fn root_is_monotonic(a in 0..=i32::MAX, b in 0..=i32::MAX) {
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        let unit = ShiftSubtractSqrt;
        prop_assert!(unit.sqrt(FixedPoint::from_raw(lo)).unwrap() <= unit.sqrt(FixedPoint::from_raw(hi)).unwrap());
    }
}

// THEORY:
// `FixedPoint` is the single numeric currency of the engine. Every statistic,
// threshold and distortion value is a signed Q16.16 number: 16 integer bits,
// 16 fractional bits, packed in an i32 so that 1.0 is 65536.
//
// Key rules:
// 1.  **Saturation, never wrap**: any result outside [-2^31, 2^31 - 1] clamps to
//     the nearest representable value. Intermediate products are formed in i64 or
//     i128 and only narrowed at the end.
// 2.  **Round to nearest**: conversions from f64 and every division or right
//     shift round half away from zero. All components share `round_div_i128`, so a
//     value computed in two places always lands on the same raw integer.
// 3.  **Plain data**: the type is `Copy`, ordered by its raw value, and carries no
//     behaviour beyond arithmetic.

use std::fmt;
use std::ops::{Add, Mul, Neg, Sub};

/// Number of fractional bits in the Q16.16 encoding.
pub const FRAC_BITS: u32 = 16;

/// Raw value of 1.0.
pub const ONE_RAW: i32 = 1 << FRAC_BITS;

/// Divides with rounding half away from zero. `denominator` must be non-zero.
pub fn round_div_i128(numerator: i128, denominator: i128) -> i128 {
    let magnitude = (numerator.abs() + denominator.abs() / 2) / denominator.abs();
    if (numerator < 0) != (denominator < 0) {
        -magnitude
    } else {
        magnitude
    }
}

/// Right shift with rounding half away from zero.
pub fn round_shift_i128(value: i128, bits: u32) -> i128 {
    round_div_i128(value, 1i128 << bits)
}

/// A signed Q16.16 fixed-point value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct FixedPoint(i32);

impl FixedPoint {
    pub const ZERO: Self = Self(0);
    pub const ONE: Self = Self(ONE_RAW);
    pub const MAX: Self = Self(i32::MAX);
    pub const MIN: Self = Self(i32::MIN);

    pub const fn from_raw(raw: i32) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> i32 {
        self.0
    }

    /// Integer value, saturating outside the ±32768 range.
    pub fn from_int(value: i64) -> Self {
        Self::saturate_i128((value as i128) << FRAC_BITS)
    }

    /// Rounds a float to the nearest representable value. NaN maps to zero.
    pub fn from_f64(value: f64) -> Self {
        if value.is_nan() {
            return Self::ZERO;
        }
        let scaled = (value * ONE_RAW as f64).round();
        if scaled >= i32::MAX as f64 {
            Self::MAX
        } else if scaled <= i32::MIN as f64 {
            Self::MIN
        } else {
            Self(scaled as i32)
        }
    }

    pub fn to_f64(self) -> f64 {
        self.0 as f64 / ONE_RAW as f64
    }

    /// Narrows a wide raw value, clamping to the i32 range.
    pub fn saturate_i128(raw: i128) -> Self {
        Self(raw.clamp(i32::MIN as i128, i32::MAX as i128) as i32)
    }

    pub fn saturating_add(self, other: Self) -> Self {
        Self(self.0.saturating_add(other.0))
    }

    pub fn saturating_sub(self, other: Self) -> Self {
        Self(self.0.saturating_sub(other.0))
    }

    pub fn saturating_mul(self, other: Self) -> Self {
        let product = self.0 as i128 * other.0 as i128;
        Self::saturate_i128(round_shift_i128(product, FRAC_BITS))
    }

    /// Rounded quotient, or `None` when dividing by zero.
    pub fn checked_div(self, other: Self) -> Option<Self> {
        if other.0 == 0 {
            return None;
        }
        let numerator = (self.0 as i128) << FRAC_BITS;
        Some(Self::saturate_i128(round_div_i128(numerator, other.0 as i128)))
    }

    pub fn abs(self) -> Self {
        Self(self.0.saturating_abs())
    }

    pub fn is_negative(self) -> bool {
        self.0 < 0
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// Returns `self`, or 1.0 when `self` is exactly zero.
    pub fn or_one_if_zero(self) -> Self {
        if self.is_zero() { Self::ONE } else { self }
    }
}

impl From<u8> for FixedPoint {
    fn from(value: u8) -> Self {
        Self((value as i32) << FRAC_BITS)
    }
}

impl Add for FixedPoint {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        self.saturating_add(rhs)
    }
}

impl Sub for FixedPoint {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        self.saturating_sub(rhs)
    }
}

impl Mul for FixedPoint {
    type Output = Self;
    fn mul(self, rhs: Self) -> Self {
        self.saturating_mul(rhs)
    }
}

impl Neg for FixedPoint {
    type Output = Self;
    fn neg(self) -> Self {
        Self(self.0.saturating_neg())
    }
}

impl fmt::Display for FixedPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.5}", self.to_f64())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_is_65536() {
        assert_eq!(FixedPoint::ONE.raw(), 65536);
        assert_eq!(FixedPoint::from_f64(1.0), FixedPoint::ONE);
        assert_eq!(FixedPoint::from_int(120).raw(), 7_864_320);
    }

    #[test]
    fn from_f64_rounds_instead_of_truncating() {
        // 0.1 * 65536 = 6553.6
        assert_eq!(FixedPoint::from_f64(0.1).raw(), 6554);
        assert_eq!(FixedPoint::from_f64(-0.1).raw(), -6554);
        assert_eq!(FixedPoint::from_f64(8.164_965_8).raw(), 535_099);
    }

    #[test]
    fn conversions_saturate() {
        assert_eq!(FixedPoint::from_f64(1.0e9), FixedPoint::MAX);
        assert_eq!(FixedPoint::from_f64(-1.0e9), FixedPoint::MIN);
        assert_eq!(FixedPoint::from_int(40_000), FixedPoint::MAX);
        assert_eq!(FixedPoint::from_f64(f64::NAN), FixedPoint::ZERO);
    }

    #[test]
    fn arithmetic_saturates() {
        assert_eq!(FixedPoint::MAX + FixedPoint::ONE, FixedPoint::MAX);
        assert_eq!(FixedPoint::MIN - FixedPoint::ONE, FixedPoint::MIN);
        assert_eq!(FixedPoint::from_int(300) * FixedPoint::from_int(300), FixedPoint::MAX);
        assert_eq!(-FixedPoint::MIN, FixedPoint::MAX);
    }

    #[test]
    fn multiply_and_divide_round() {
        let two = FixedPoint::from_int(2);
        let tenth = FixedPoint::from_raw(6554);
        assert_eq!((two * tenth).raw(), 13108);
        let third = FixedPoint::ONE.checked_div(FixedPoint::from_int(3)).unwrap();
        assert_eq!(third.raw(), 21845);
        let two_thirds = two.checked_div(FixedPoint::from_int(3)).unwrap();
        assert_eq!(two_thirds.raw(), 43691);
        assert!(FixedPoint::ONE.checked_div(FixedPoint::ZERO).is_none());
    }

    #[test]
    fn round_div_is_symmetric_around_zero() {
        assert_eq!(round_div_i128(5, 2), 3);
        assert_eq!(round_div_i128(-5, 2), -3);
        assert_eq!(round_div_i128(5, -2), -3);
        assert_eq!(round_div_i128(4, 3), 1);
    }

    #[test]
    fn zero_substitution() {
        assert_eq!(FixedPoint::ZERO.or_one_if_zero(), FixedPoint::ONE);
        assert_eq!(FixedPoint::from_int(7).or_one_if_zero(), FixedPoint::from_int(7));
    }
}

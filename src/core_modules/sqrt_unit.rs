// THEORY:
// The square-root unit is the shared service behind every standard deviation and
// every chromaticity distortion in the engine. It is expressed as a strategy
// (`SqrtStrategy`) so that the reference digit-recurrence algorithm and a
// Newton-Raphson alternative can be swapped and cross-checked bit for bit.
//
// Both strategies compute the Q16.16 root of a Q16.16 operand `x` as the integer
// root of the 48-bit radicand `raw(x) << 16`, rounded to nearest. A Q16.16 root
// never exceeds 2^24 raw (sqrt(32768) ≈ 181), so the shift-subtract recurrence
// needs exactly one iteration per output bit: 24, independent of the operand.
//
// Negative operands are rejected. Reinterpreting them as unsigned would hand the
// caller a plausible-looking but meaningless value.

use crate::core_modules::fixed_point::{FRAC_BITS, FixedPoint};
use crate::error::{EngineError, EngineResult};

/// Output bits of a Q16.16 root, one shift-subtract step each.
pub const SQRT_ITERATIONS: u32 = 24;

/// A square root over non-negative Q16.16 values.
pub trait SqrtStrategy: Send + Sync {
    fn sqrt(&self, x: FixedPoint) -> EngineResult<FixedPoint>;

    fn name(&self) -> &'static str;
}

/// Restoring shift-subtract digit recurrence with a fixed iteration count. Each
/// step subtracts the trial divisor only when the remainder covers it.
#[derive(Debug, Clone, Copy, Default)]
pub struct ShiftSubtractSqrt;

impl ShiftSubtractSqrt {
    /// Fixed latency of the unit, in recurrence steps.
    pub const fn iterations(&self) -> u32 {
        SQRT_ITERATIONS
    }

    /// Integer root of a radicand below 2^48, together with the final remainder.
    fn recurrence(radicand: u64) -> (u64, u64) {
        let mut remainder: u64 = 0;
        let mut root: u64 = 0;
        for step in (0..SQRT_ITERATIONS).rev() {
            // Bring down the next two radicand bits.
            remainder = (remainder << 2) | ((radicand >> (2 * step)) & 0b11);
            let trial = (root << 2) | 1;
            root <<= 1;
            if remainder >= trial {
                remainder -= trial;
                root |= 1;
            }
        }
        (root, remainder)
    }
}

impl SqrtStrategy for ShiftSubtractSqrt {
    fn sqrt(&self, x: FixedPoint) -> EngineResult<FixedPoint> {
        let radicand = radicand_of(x)?;
        let (root, remainder) = Self::recurrence(radicand);
        Ok(round_root(root, remainder))
    }

    fn name(&self) -> &'static str {
        "shift-subtract"
    }
}

/// Integer Newton-Raphson iteration, used to cross-check the recurrence.
#[derive(Debug, Clone, Copy, Default)]
pub struct NewtonRaphsonSqrt;

impl NewtonRaphsonSqrt {
    fn floor_root(radicand: u64) -> u64 {
        if radicand < 2 {
            return radicand;
        }
        let mut estimate = radicand;
        let mut next = (estimate + 1) / 2;
        while next < estimate {
            estimate = next;
            next = (estimate + radicand / estimate) / 2;
        }
        estimate
    }
}

impl SqrtStrategy for NewtonRaphsonSqrt {
    fn sqrt(&self, x: FixedPoint) -> EngineResult<FixedPoint> {
        let radicand = radicand_of(x)?;
        let root = Self::floor_root(radicand);
        Ok(round_root(root, radicand - root * root))
    }

    fn name(&self) -> &'static str {
        "newton-raphson"
    }
}

fn radicand_of(x: FixedPoint) -> EngineResult<u64> {
    if x.is_negative() {
        return Err(EngineError::NegativeSqrtOperand { raw: x.raw() });
    }
    Ok((x.raw() as u64) << FRAC_BITS)
}

/// Rounds a floor root up when the radicand is past the midpoint `(r + 1/2)^2`.
fn round_root(root: u64, remainder: u64) -> FixedPoint {
    let rounded = if remainder > root { root + 1 } else { root };
    FixedPoint::from_raw(rounded as i32)
}

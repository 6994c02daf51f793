// THEORY:
// The model extractor turns raw running sums into the learned background color
// of a pixel: a mean (E) and a standard deviation (SD) per channel. A
// `PixelModel` is never stored or patched. It is derived fresh from the
// accumulator and the session's frame count every time someone asks, so two
// derivations from the same state are always identical.
//
// The moment arithmetic is shared with the distortion-spread statistics:
//
//     mean     = sum / n
//     variance = sum_sq / n - mean^2      (clamped at zero)
//     sd       = sqrt(variance)
//
// Sums arrive already scaled (Q16 for sums, Q32 for sums of squares) and are
// carried in i128, so nothing overflows before the final narrowing.

use crate::core_modules::accumulator::PixelAccumulator;
use crate::core_modules::fixed_point::{FRAC_BITS, FixedPoint, round_div_i128, round_shift_i128};
use crate::core_modules::pixel::pixel::CHANNELS;
use crate::core_modules::sqrt_unit::SqrtStrategy;
use crate::error::{EngineError, EngineResult};

/// Learned background color of one pixel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PixelModel {
    /// Per-channel mean (E) in R, G, B order.
    pub mean: [FixedPoint; CHANNELS],
    /// Per-channel standard deviation (SD) in R, G, B order.
    pub sd: [FixedPoint; CHANNELS],
}

/// Mean and standard deviation of one observed quantity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MomentStats {
    pub mean: FixedPoint,
    pub sd: FixedPoint,
}

/// Mean and standard deviation from a Q16 sum and a Q32 sum of squares over `count` observations.
pub fn moments_to_stats(
    sum_q16: i128,
    sum_sq_q32: i128,
    count: u32,
    sqrt: &dyn SqrtStrategy,
) -> EngineResult<MomentStats> {
    if count == 0 {
        return Err(EngineError::NoAccumulation);
    }
    let count = count as i128;
    let mean_raw = round_div_i128(sum_q16, count);
    let mean_of_squares = round_div_i128(sum_sq_q32, count << FRAC_BITS);
    let square_of_mean = round_shift_i128(mean_raw * mean_raw, FRAC_BITS);
    // Rounding can push a near-zero variance slightly negative.
    let variance = (mean_of_squares - square_of_mean).max(0);
    let sd = sqrt.sqrt(FixedPoint::saturate_i128(variance))?;
    Ok(MomentStats {
        mean: FixedPoint::saturate_i128(mean_raw),
        sd,
    })
}

/// Derives the per-channel model from an accumulator record learned over `frame_count` frames.
pub fn derive(
    record: &PixelAccumulator,
    frame_count: u32,
    sqrt: &dyn SqrtStrategy,
) -> EngineResult<PixelModel> {
    let mut model = PixelModel::default();
    for channel in 0..CHANNELS {
        let stats = moments_to_stats(
            (record.sum[channel] as i128) << FRAC_BITS,
            (record.sum_sq[channel] as i128) << (2 * FRAC_BITS),
            frame_count,
            sqrt,
        )?;
        model.mean[channel] = stats.mean;
        model.sd[channel] = stats.sd;
    }
    Ok(model)
}

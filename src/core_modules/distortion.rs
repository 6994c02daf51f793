// THEORY:
// The distortion estimators are the comparative "lenses" of the engine. Each one
// compares a live pixel against its learned `PixelModel` and reduces the
// difference to a single Q16.16 scalar:
//
// - Brightness distortion (alpha): the scale factor that best explains the live
//   color as a brighter or darker copy of the learned mean, each channel weighted
//   by its inverse variance. 1.0 means "same brightness".
// - Chromaticity distortion (CD): what is left of the color difference once the
//   brightness change is removed, normalized per channel by the mean. A large CD
//   is a hue shift no lighting change can produce.
//
// Degenerate models have a documented policy instead of a crash: a learned SD of
// exactly zero is treated as 1.0 when weighting alpha, and a learned mean of
// exactly zero is treated as 1.0 when normalizing CD.
//
// The spread of alpha and CD over a calibration run (`DistortionAccumulator`)
// is learned with the same moment rule as the color model.

use crate::core_modules::fixed_point::{FRAC_BITS, FixedPoint, round_div_i128, round_shift_i128};
use crate::core_modules::model::{PixelModel, moments_to_stats};
use crate::core_modules::pixel::pixel::{CHANNELS, PixelSample};
use crate::core_modules::sqrt_unit::SqrtStrategy;
use crate::error::{EngineError, EngineResult};

/// Brightness and chromaticity distortion of one observed pixel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DistortionResult {
    pub alpha: FixedPoint,
    pub cd: FixedPoint,
}

/// Brightness distortion: `sum(I*E/sigma^2) / sum(E^2/sigma^2)`, or zero when the denominator vanishes.
pub fn alpha(sample: &PixelSample, model: &PixelModel) -> FixedPoint {
    let intensities = sample.channels();
    let mut numerator: i128 = 0;
    let mut denominator: i128 = 0;
    for channel in 0..CHANNELS {
        let sigma = model.sd[channel].or_one_if_zero().raw() as i128;
        let sigma_sq = sigma * sigma;
        let mean = model.mean[channel].raw() as i128;
        let intensity = (intensities[channel] as i128) << FRAC_BITS;
        // Q32.32 products over a Q32.32 variance, kept at 32 fractional bits.
        numerator += round_div_i128((intensity * mean) << (2 * FRAC_BITS), sigma_sq);
        denominator += round_div_i128((mean * mean) << (2 * FRAC_BITS), sigma_sq);
    }
    if denominator == 0 {
        return FixedPoint::ZERO;
    }
    FixedPoint::saturate_i128(round_div_i128(numerator << FRAC_BITS, denominator))
}

/// Chromaticity distortion: `sqrt(sum(((I - alpha*E) / E)^2))`.
pub fn chromaticity(
    sample: &PixelSample,
    model: &PixelModel,
    alpha: FixedPoint,
    sqrt: &dyn SqrtStrategy,
) -> EngineResult<FixedPoint> {
    let intensities = sample.channels();
    let mut sum_sq_q32: i128 = 0;
    for channel in 0..CHANNELS {
        let mean = model.mean[channel];
        let scaled_mean = round_shift_i128(alpha.raw() as i128 * mean.raw() as i128, FRAC_BITS);
        let residual = ((intensities[channel] as i128) << FRAC_BITS) - scaled_mean;
        let delta = round_div_i128(residual << FRAC_BITS, mean.or_one_if_zero().raw() as i128);
        sum_sq_q32 += delta * delta;
    }
    let sum_sq = FixedPoint::saturate_i128(round_shift_i128(sum_sq_q32, FRAC_BITS));
    sqrt.sqrt(sum_sq)
}

/// Both distortions of `sample` against `model`.
pub fn measure(
    sample: &PixelSample,
    model: &PixelModel,
    sqrt: &dyn SqrtStrategy,
) -> EngineResult<DistortionResult> {
    let alpha = alpha(sample, model);
    let cd = chromaticity(sample, model, alpha, sqrt)?;
    Ok(DistortionResult { alpha, cd })
}

/// Learned spread of the distortions at one pixel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PixelSpread {
    pub sd_alpha: FixedPoint,
    pub sd_cd: FixedPoint,
}

impl PixelSpread {
    pub fn new(sd_alpha: FixedPoint, sd_cd: FixedPoint) -> Self {
        Self { sd_alpha, sd_cd }
    }
}

/// Running sums of alpha and CD over the calibration frames of one pixel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DistortionAccumulator {
    sum_alpha: i128,
    sum_sq_alpha: i128,
    sum_cd: i128,
    sum_sq_cd: i128,
    count: u32,
}

impl DistortionAccumulator {
    pub fn absorb(&mut self, result: &DistortionResult) {
        let alpha = result.alpha.raw() as i128;
        let cd = result.cd.raw() as i128;
        self.sum_alpha += alpha;
        self.sum_sq_alpha += alpha * alpha;
        self.sum_cd += cd;
        self.sum_sq_cd += cd * cd;
        self.count += 1;
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn spread(&self, sqrt: &dyn SqrtStrategy) -> EngineResult<PixelSpread> {
        if self.count == 0 {
            return Err(EngineError::CalibrationIncomplete {
                completed: 0,
                expected: 1,
            });
        }
        let alpha = moments_to_stats(self.sum_alpha, self.sum_sq_alpha, self.count, sqrt)?;
        let cd = moments_to_stats(self.sum_cd, self.sum_sq_cd, self.count, sqrt)?;
        Ok(PixelSpread::new(alpha.sd, cd.sd))
    }
}

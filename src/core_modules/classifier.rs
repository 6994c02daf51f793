// THEORY:
// The classifier is the final, stateless decision stage. Given the live
// distortions of a pixel and the spread those distortions showed while the scene
// was known to be background, it places the pixel in one of four classes:
//
//                 CD <= b        CD > b
//   a_lo..a_hi    Background     Foreground
//   below a_lo    Shadow         Foreground
//   above a_hi    Highlight      Foreground
//
// with a_lo = 1 - k1*SD_alpha, a_hi = 1 + k1*SD_alpha and b = k2*SD_CD. The
// sensitivity factors k1 and k2 widen or narrow the bands.

use crate::core_modules::distortion::{DistortionResult, PixelSpread};
use crate::core_modules::fixed_point::FixedPoint;
use serde::{Deserialize, Serialize};

/// Classification label of one pixel, with its result-stream code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Classification {
    Background = 0,
    Foreground = 1,
    Shadow = 2,
    Highlight = 3,
}

impl Classification {
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::Background),
            1 => Some(Self::Foreground),
            2 => Some(Self::Shadow),
            3 => Some(Self::Highlight),
            _ => None,
        }
    }
}

/// Threshold multipliers (k1, k2) in Q16.16.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sensitivity {
    pub k1: FixedPoint,
    pub k2: FixedPoint,
}

impl Sensitivity {
    pub fn new(k1: FixedPoint, k2: FixedPoint) -> Self {
        Self { k1, k2 }
    }

    pub fn from_factors(k1: f64, k2: f64) -> Self {
        Self::new(FixedPoint::from_f64(k1), FixedPoint::from_f64(k2))
    }
}

impl Default for Sensitivity {
    fn default() -> Self {
        Self::new(FixedPoint::from_int(2), FixedPoint::from_int(2))
    }
}

/// Decision boundaries for one pixel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Thresholds {
    pub a_lo: FixedPoint,
    pub a_hi: FixedPoint,
    pub b: FixedPoint,
}

impl Thresholds {
    pub fn new(spread: &PixelSpread, sensitivity: &Sensitivity) -> Self {
        let alpha_band = sensitivity.k1 * spread.sd_alpha;
        Self {
            a_lo: FixedPoint::ONE - alpha_band,
            a_hi: FixedPoint::ONE + alpha_band,
            b: sensitivity.k2 * spread.sd_cd,
        }
    }

    pub fn classify(&self, result: &DistortionResult) -> Classification {
        let chroma_consistent = result.cd <= self.b;
        if !chroma_consistent {
            Classification::Foreground
        } else if result.alpha < self.a_lo {
            Classification::Shadow
        } else if result.alpha > self.a_hi {
            Classification::Highlight
        } else {
            Classification::Background
        }
    }
}

/// Classifies a pixel from its distortions and learned spread.
pub fn classify(
    result: &DistortionResult,
    spread: &PixelSpread,
    sensitivity: &Sensitivity,
) -> Classification {
    Thresholds::new(spread, sensitivity).classify(result)
}

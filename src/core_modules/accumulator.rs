// THEORY:
// A `PixelAccumulator` is the persistent learning state of one pixel: the running
// sum and sum of squares of each color channel over the frames of a training
// session. It knows how to absorb a sample and how to serialize itself into the
// fixed 42-byte record the external store holds.
//
// Record layout (big-endian, most significant field first):
//
//     sum_B (48) | sum_G (48) | sum_R (48) | sum_sq_B (64) | sum_sq_G (64) | sum_sq_R (64)
//
// 48 bits of sum hold 255 x 2^40 frames; 64 bits of sum of squares hold
// 255^2 x 2^48. The session length is validated against these limits before
// any accumulation starts, so saturation below is never reached in practice.

use crate::core_modules::pixel::pixel::{BLUE, CHANNELS, GREEN, PixelSample, RED};
use crate::error::{EngineError, EngineResult};

/// Bytes in one serialized accumulator record.
pub const RECORD_BYTES: usize = 42;

const SUM_BYTES: usize = 6;
const SUM_SQ_BYTES: usize = 8;

/// Largest value a 48-bit sum field can hold.
pub const SUM_FIELD_MAX: u64 = (1 << 48) - 1;

/// Storage order of the channels inside a record.
const RECORD_CHANNEL_ORDER: [usize; CHANNELS] = [BLUE, GREEN, RED];

/// Serialized form of a `PixelAccumulator`.
pub type Record = [u8; RECORD_BYTES];

/// Per-pixel running sums for one training session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PixelAccumulator {
    /// Channel sums in R, G, B order.
    pub sum: [u64; CHANNELS],
    /// Channel sums of squares in R, G, B order.
    pub sum_sq: [u64; CHANNELS],
}

impl PixelAccumulator {
    /// Adds one sample's channels and squared channels.
    pub fn absorb(&mut self, sample: &PixelSample) {
        for (channel, value) in sample.channels().into_iter().enumerate() {
            let value = value as u64;
            self.sum[channel] = self.sum[channel].saturating_add(value);
            self.sum_sq[channel] = self.sum_sq[channel].saturating_add(value * value);
        }
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::default()
    }

    pub fn encode(&self) -> EngineResult<Record> {
        let mut record = [0u8; RECORD_BYTES];
        let mut offset = 0;
        for channel in RECORD_CHANNEL_ORDER {
            let sum = self.sum[channel];
            if sum > SUM_FIELD_MAX {
                return Err(EngineError::MalformedRecord(format!(
                    "channel {channel} sum {sum} exceeds 48 bits"
                )));
            }
            record[offset..offset + SUM_BYTES].copy_from_slice(&sum.to_be_bytes()[8 - SUM_BYTES..]);
            offset += SUM_BYTES;
        }
        for channel in RECORD_CHANNEL_ORDER {
            record[offset..offset + SUM_SQ_BYTES].copy_from_slice(&self.sum_sq[channel].to_be_bytes());
            offset += SUM_SQ_BYTES;
        }
        Ok(record)
    }

    pub fn decode(bytes: &[u8]) -> EngineResult<Self> {
        if bytes.len() != RECORD_BYTES {
            return Err(EngineError::MalformedRecord(format!(
                "expected {RECORD_BYTES} bytes, got {}",
                bytes.len()
            )));
        }
        let mut accumulator = Self::default();
        let mut offset = 0;
        for channel in RECORD_CHANNEL_ORDER {
            let mut word = [0u8; 8];
            word[8 - SUM_BYTES..].copy_from_slice(&bytes[offset..offset + SUM_BYTES]);
            accumulator.sum[channel] = u64::from_be_bytes(word);
            offset += SUM_BYTES;
        }
        for channel in RECORD_CHANNEL_ORDER {
            let mut word = [0u8; 8];
            word.copy_from_slice(&bytes[offset..offset + SUM_SQ_BYTES]);
            accumulator.sum_sq[channel] = u64::from_be_bytes(word);
            offset += SUM_SQ_BYTES;
        }
        Ok(accumulator)
    }
}

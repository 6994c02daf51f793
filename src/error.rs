//! Error types for the background model engine

use thiserror::Error;

/// Every failure the engine reports to its caller.
///
/// Nothing is retried or masked internally: a rejected operation leaves the
/// engine state exactly as it was before the call.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// The square root of a negative fixed-point value was requested
    #[error("square root of negative operand (raw Q16.16 {raw})")]
    NegativeSqrtOperand { raw: i32 },

    /// A pixel coordinate outside the configured grid
    #[error("coordinate ({row}, {col}) outside {width}x{height} grid")]
    CoordinateOutOfBounds {
        row: u32,
        col: u32,
        width: u32,
        height: u32,
    },

    /// A pixel arrived out of row-major raster order
    #[error("pixel ({row}, {col}) out of raster order: expected ({expected_row}, {expected_col})")]
    OutOfRasterOrder {
        row: u32,
        col: u32,
        expected_row: u32,
        expected_col: u32,
    },

    /// The external accumulator store cannot accept a command yet
    #[error("accumulator store busy: retry once it signals ready")]
    StoreBusy,

    /// A store address that is misaligned or beyond the store's capacity
    #[error("store address {address} invalid for {capacity} records")]
    StoreAddressOutOfRange { address: u64, capacity: u64 },

    /// A model was requested before any frame was accumulated
    #[error("no accumulation yet: model undefined until a frame is learned")]
    NoAccumulation,

    /// A model was requested before the training session finished
    #[error("training incomplete: {completed} of {expected} frames learned")]
    TrainingIncomplete { completed: u32, expected: u32 },

    /// An accumulation arrived after the session's frame budget was spent
    #[error("training session complete: all {expected} frames already learned")]
    SessionComplete { expected: u32 },

    /// Distortion spread requested before the calibration frames finished
    #[error("calibration incomplete: {completed} of {expected} frames observed")]
    CalibrationIncomplete { completed: u32, expected: u32 },

    /// An accumulator record that cannot be encoded or decoded
    #[error("malformed accumulator record: {0}")]
    MalformedRecord(String),

    /// Invalid session configuration
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Configuration text that failed to parse
    #[error("configuration parse error: {0}")]
    Config(String),

    /// The streaming pipeline task has shut down
    #[error("pipeline closed")]
    PipelineClosed,
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::Config(err.to_string())
    }
}

/// Result type for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

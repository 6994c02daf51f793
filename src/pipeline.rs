// THEORY:
// The `pipeline` module is the top-level, synchronous API of the engine. It turns
// a stream of pixel ticks into a stream of per-pixel reports, walking a session
// through three phases:
//
// 1.  **Learning**: `training_frames` frames are accumulated into per-pixel sums
//     of color and squared color.
// 2.  **Calibrating**: `calibration_frames` further frames are compared against the
//     freshly derived color model. Their brightness and chromaticity distortions
//     are accumulated so that every pixel learns how much its own alpha and CD
//     wander while the scene is background.
// 3.  **Classifying**: from then on every tick is classified and reported.
//
// A reset pulse returns the session to Learning from any phase. Every phase
// enforces raster order and grid bounds. A rejected tick leaves the pipeline
// exactly as it was, so a caller may retry it (for example after `StoreBusy`).

use crate::core_modules::background_accumulator::BackgroundAccumulator;
use crate::core_modules::classifier::{Classification, Sensitivity, Thresholds};
use crate::core_modules::distortion::{DistortionAccumulator, DistortionResult, PixelSpread, measure};
use crate::core_modules::fixed_point::FixedPoint;
use crate::core_modules::model::PixelModel;
use crate::core_modules::pixel::pixel::{Channel, Grid, PixelCoord, PixelSample};
use crate::core_modules::sqrt_unit::{ShiftSubtractSqrt, SqrtStrategy};
use crate::core_modules::store::{MemoryStore, RecordStore};
use crate::error::{EngineError, EngineResult};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Session configuration, read once when the pipeline is built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub image_width: u32,
    pub image_height: u32,
    /// Frames per training session (N).
    pub training_frames: u32,
    /// Frames used to learn the spread of alpha and CD after training.
    pub calibration_frames: u32,
    /// Threshold multipliers (k1, k2).
    pub sensitivity: (f64, f64),
    /// Largest grid, in pixels, kept in on-chip records. Larger grids spill to the external store.
    pub on_chip_capacity: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            image_width: 640,
            image_height: 480,
            training_frames: 30,
            calibration_frames: 30,
            sensitivity: (2.0, 2.0),
            on_chip_capacity: 64 * 64,
        }
    }
}

impl PipelineConfig {
    pub fn from_json(text: &str) -> EngineResult<Self> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        tracing::info!(
            width = config.image_width,
            height = config.image_height,
            training_frames = config.training_frames,
            calibration_frames = config.calibration_frames,
            "pipeline configuration loaded"
        );
        Ok(config)
    }

    // A u32 frame count keeps 255 * N below 2^48 and 255^2 * N below 2^64, so the
    // record fields cannot overflow for any accepted session length.
    pub fn validate(&self) -> EngineResult<()> {
        if self.image_width == 0 || self.image_height == 0 {
            return Err(EngineError::InvalidConfig(format!(
                "grid {}x{} is empty",
                self.image_width, self.image_height
            )));
        }
        if self.training_frames == 0 {
            return Err(EngineError::InvalidConfig("training_frames must be positive".into()));
        }
        if self.calibration_frames == 0 {
            return Err(EngineError::InvalidConfig("calibration_frames must be positive".into()));
        }
        let (k1, k2) = self.sensitivity;
        let representable = |k: f64| (0.0..=FixedPoint::MAX.to_f64()).contains(&k);
        if !(representable(k1) && representable(k2)) {
            return Err(EngineError::InvalidConfig(format!(
                "sensitivity ({k1}, {k2}) must be finite, non-negative and within the Q16.16 range"
            )));
        }
        Ok(())
    }

    pub fn grid(&self) -> Grid {
        Grid::new(self.image_width, self.image_height)
    }

    pub fn sensitivity(&self) -> Sensitivity {
        Sensitivity::from_factors(self.sensitivity.0, self.sensitivity.1)
    }
}

/// One tick of the pixel intake stream. Ticks with `valid == false` are no-ops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelTick {
    pub valid: bool,
    pub row: u32,
    pub col: u32,
    pub red: Channel,
    pub green: Channel,
    pub blue: Channel,
}

impl PixelTick {
    pub fn pixel(row: u32, col: u32, red: Channel, green: Channel, blue: Channel) -> Self {
        Self {
            valid: true,
            row,
            col,
            red,
            green,
            blue,
        }
    }

    pub fn idle() -> Self {
        Self {
            valid: false,
            row: 0,
            col: 0,
            red: 0,
            green: 0,
            blue: 0,
        }
    }

    pub fn sample(&self) -> PixelSample {
        PixelSample::new(PixelCoord::new(self.row, self.col), self.red, self.green, self.blue)
    }
}

/// Result-stream entry for one classified pixel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelReport {
    pub coord: PixelCoord,
    pub model: PixelModel,
    pub distortion: DistortionResult,
    pub classification: Classification,
}

/// Where the current session stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Learning,
    Calibrating { frames_completed: u32 },
    Classifying,
}

/// The synchronous background-subtraction engine.
pub struct BackgroundPipeline {
    config: PipelineConfig,
    grid: Grid,
    sensitivity: Sensitivity,
    sqrt: Arc<dyn SqrtStrategy>,
    accumulator: BackgroundAccumulator,
    /// Per-pixel alpha/CD statistics gathered while calibrating.
    spreads: Vec<DistortionAccumulator>,
    phase: SessionPhase,
    /// Next coordinate expected while calibrating or classifying.
    cursor: PixelCoord,
    frames_classified: u64,
}

impl BackgroundPipeline {
    /// Builds a pipeline, spilling to an in-memory store when the grid exceeds on-chip capacity.
    pub fn new(config: PipelineConfig) -> EngineResult<Self> {
        config.validate()?;
        let grid = config.grid();
        let accumulator = if grid.pixel_count() <= config.on_chip_capacity {
            BackgroundAccumulator::on_chip(grid, config.training_frames)
        } else {
            let store = MemoryStore::new(grid.pixel_count() as u64);
            BackgroundAccumulator::external(grid, config.training_frames, Box::new(store))?
        };
        Ok(Self::assemble(config, accumulator))
    }

    /// Builds a pipeline whose records always live in `store`.
    pub fn with_store(config: PipelineConfig, store: Box<dyn RecordStore>) -> EngineResult<Self> {
        config.validate()?;
        let accumulator = BackgroundAccumulator::external(config.grid(), config.training_frames, store)?;
        Ok(Self::assemble(config, accumulator))
    }

    fn assemble(config: PipelineConfig, accumulator: BackgroundAccumulator) -> Self {
        let grid = config.grid();
        tracing::info!(
            width = grid.width,
            height = grid.height,
            external_store = accumulator.is_external(),
            "background pipeline created"
        );
        Self {
            sensitivity: config.sensitivity(),
            spreads: vec![DistortionAccumulator::default(); grid.pixel_count()],
            sqrt: Arc::new(ShiftSubtractSqrt),
            phase: SessionPhase::Learning,
            cursor: PixelCoord::default(),
            frames_classified: 0,
            config,
            grid,
            accumulator,
        }
    }

    /// Replaces the square-root strategy used by every stage.
    pub fn with_sqrt(mut self, sqrt: Arc<dyn SqrtStrategy>) -> Self {
        self.sqrt = sqrt;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn frames_classified(&self) -> u64 {
        self.frames_classified
    }

    pub fn sqrt(&self) -> Arc<dyn SqrtStrategy> {
        Arc::clone(&self.sqrt)
    }

    pub fn accumulator(&mut self) -> &mut BackgroundAccumulator {
        &mut self.accumulator
    }

    /// The reset pulse: clears all accumulators and session state.
    pub fn reset(&mut self) {
        self.accumulator.reset();
        self.spreads.fill(DistortionAccumulator::default());
        self.phase = SessionPhase::Learning;
        self.cursor = PixelCoord::default();
        self.frames_classified = 0;
        tracing::info!("session reset");
    }

    /// Current color model at `coord`.
    pub fn model(&mut self, coord: PixelCoord) -> EngineResult<PixelModel> {
        self.accumulator.model(coord, self.sqrt.as_ref())
    }

    /// Learned distortion spread at `coord`; available once calibration finished.
    pub fn spread(&self, coord: PixelCoord) -> EngineResult<PixelSpread> {
        let index = self.grid.index_of(coord)?;
        match self.phase {
            SessionPhase::Classifying => self.spreads[index].spread(self.sqrt.as_ref()),
            SessionPhase::Calibrating { frames_completed } => Err(EngineError::CalibrationIncomplete {
                completed: frames_completed,
                expected: self.config.calibration_frames,
            }),
            SessionPhase::Learning => Err(EngineError::CalibrationIncomplete {
                completed: 0,
                expected: self.config.calibration_frames,
            }),
        }
    }

    /// Consumes one intake tick. Returns a report for every classified pixel.
    pub fn process_tick(&mut self, tick: &PixelTick) -> EngineResult<Option<PixelReport>> {
        if !tick.valid {
            return Ok(None);
        }
        let sample = tick.sample();
        match self.phase {
            SessionPhase::Learning => {
                self.accumulator.try_accumulate(&sample)?;
                if self.accumulator.is_session_complete() {
                    self.phase = SessionPhase::Calibrating { frames_completed: 0 };
                    tracing::info!(frames = self.config.training_frames, "training complete, calibrating");
                }
                Ok(None)
            }
            SessionPhase::Calibrating { frames_completed } => {
                let index = self.check_cursor(sample.coord)?;
                let model = self.accumulator.model(sample.coord, self.sqrt.as_ref())?;
                let distortion = measure(&sample, &model, self.sqrt.as_ref())?;
                self.spreads[index].absorb(&distortion);
                if self.advance_cursor() {
                    let frames_completed = frames_completed + 1;
                    if frames_completed >= self.config.calibration_frames {
                        self.phase = SessionPhase::Classifying;
                        tracing::info!(frames = frames_completed, "calibration complete, classifying");
                    } else {
                        self.phase = SessionPhase::Calibrating { frames_completed };
                    }
                }
                Ok(None)
            }
            SessionPhase::Classifying => {
                let index = self.check_cursor(sample.coord)?;
                let model = self.accumulator.model(sample.coord, self.sqrt.as_ref())?;
                let distortion = measure(&sample, &model, self.sqrt.as_ref())?;
                let spread = self.spreads[index].spread(self.sqrt.as_ref())?;
                let classification = Thresholds::new(&spread, &self.sensitivity).classify(&distortion);
                if self.advance_cursor() {
                    self.frames_classified += 1;
                    tracing::debug!(frame = self.frames_classified, "frame classified");
                }
                Ok(Some(PixelReport {
                    coord: sample.coord,
                    model,
                    distortion,
                    classification,
                }))
            }
        }
    }

    /// Like `process_tick`, waiting while the accumulator store applies backpressure.
    pub async fn process_tick_when_ready(&mut self, tick: &PixelTick) -> EngineResult<Option<PixelReport>> {
        loop {
            match self.process_tick(tick) {
                Err(EngineError::StoreBusy) => tokio::task::yield_now().await,
                outcome => return outcome,
            }
        }
    }

    fn check_cursor(&self, coord: PixelCoord) -> EngineResult<usize> {
        let index = self.grid.index_of(coord)?;
        if coord != self.cursor {
            return Err(EngineError::OutOfRasterOrder {
                row: coord.row,
                col: coord.col,
                expected_row: self.cursor.row,
                expected_col: self.cursor.col,
            });
        }
        Ok(index)
    }

    /// Moves the cursor on; true when a frame just ended.
    fn advance_cursor(&mut self) -> bool {
        let (next, wrapped) = self.grid.advance(self.cursor);
        self.cursor = next;
        wrapped
    }
}

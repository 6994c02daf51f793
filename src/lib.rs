// THEORY:
// This file is the entry point for the `waldo_background` library crate. It
// exposes a fixed-point statistical background model in the style of Horprasert
// et al.: every pixel learns the mean and spread of its own color over a training
// session, then each new observation is split into a brightness change (alpha)
// and a color change (CD) and classified as background, foreground, shadow or
// highlight.
//
// Layers, leaves first:
// - `core_modules`: the numeric and statistical building blocks (Q16.16 fixed
//   point, the square-root unit, accumulators and their external store, the model
//   extractor, the distortion estimators and the classifier).
// - `pipeline`: the synchronous session driver consuming pixel ticks.
// - `parallel_pipeline`: the same driver on a tokio task behind bounded,
//   order-preserving channels.
// - `intake`: adapters from decoded RGB frames to pixel ticks.

pub mod core_modules;
pub mod error;
pub mod intake;
pub mod parallel_pipeline;
pub mod pipeline;

pub use core_modules::classifier::{Classification, Sensitivity};
pub use core_modules::distortion::{DistortionResult, PixelSpread};
pub use core_modules::fixed_point::FixedPoint;
pub use core_modules::model::PixelModel;
pub use error::{EngineError, EngineResult};
pub use parallel_pipeline::{PipelineHandle, StreamingPipeline};
pub use pipeline::{BackgroundPipeline, PipelineConfig, PixelReport, PixelTick, SessionPhase};

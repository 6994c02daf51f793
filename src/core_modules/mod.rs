pub mod accumulator;
pub mod background_accumulator;
pub mod classifier;
pub mod distortion;
pub mod fixed_point;
pub mod model;
pub mod pixel;
pub mod sqrt_unit;
pub mod store;

// THEORY:
// The `pixel` module holds the "dumb" data containers of the engine: a pixel
// coordinate, the fixed grid it lives in, and the raw RGB sample captured there.
// Samples are ephemeral. They are produced by the capture source, consumed by the
// accumulator or the distortion estimators, and then dropped.
//
// Channel order everywhere in the engine is R, G, B. Arrays of three channel
// values (`[T; CHANNELS]`) are indexed with `RED`, `GREEN` and `BLUE` so that
// per-channel loops stay symmetric and the storage layout (which is B, G, R on
// the external store) is a concern of the record codec only.

pub mod pixel {
    use crate::error::{EngineError, EngineResult};

    pub type Channel = u8;

    pub const CHANNELS: usize = 3;
    pub const RED: usize = 0;
    pub const GREEN: usize = 1;
    pub const BLUE: usize = 2;

    /// A (row, col) position in the pixel grid.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
    pub struct PixelCoord {
        pub row: u32,
        pub col: u32,
    }

    impl PixelCoord {
        pub const fn new(row: u32, col: u32) -> Self {
            Self { row, col }
        }
    }

    /// The fixed WIDTH x HEIGHT grid a session observes.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Grid {
        pub width: u32,
        pub height: u32,
    }

    impl Grid {
        pub fn new(width: u32, height: u32) -> Self {
            Self { width, height }
        }

        pub fn pixel_count(&self) -> usize {
            self.width as usize * self.height as usize
        }

        pub fn contains(&self, coord: PixelCoord) -> bool {
            coord.row < self.height && coord.col < self.width
        }

        /// Row-major index of `coord`, rejecting coordinates outside the grid.
        pub fn index_of(&self, coord: PixelCoord) -> EngineResult<usize> {
            if !self.contains(coord) {
                return Err(EngineError::CoordinateOutOfBounds {
                    row: coord.row,
                    col: coord.col,
                    width: self.width,
                    height: self.height,
                });
            }
            Ok(coord.row as usize * self.width as usize + coord.col as usize)
        }

        pub fn coord_of(&self, index: usize) -> PixelCoord {
            let width = self.width as usize;
            PixelCoord::new((index / width) as u32, (index % width) as u32)
        }

        /// The coordinate after `coord` in raster order, wrapping at row end and
        /// back to the origin after the last pixel. Returns the wrapped coordinate
        /// and whether a frame boundary was crossed.
        pub fn advance(&self, coord: PixelCoord) -> (PixelCoord, bool) {
            if coord.col + 1 < self.width {
                (PixelCoord::new(coord.row, coord.col + 1), false)
            } else if coord.row + 1 < self.height {
                (PixelCoord::new(coord.row + 1, 0), false)
            } else {
                (PixelCoord::default(), true)
            }
        }
    }

    /// One captured RGB triple at a grid coordinate.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PixelSample {
        pub coord: PixelCoord,
        /// The red channel value (0-255).
        pub red: Channel,
        /// The green channel value (0-255).
        pub green: Channel,
        /// The blue channel value (0-255).
        pub blue: Channel,
    }

    impl PixelSample {
        pub fn new(coord: PixelCoord, red: Channel, green: Channel, blue: Channel) -> Self {
            Self {
                coord,
                red,
                green,
                blue,
            }
        }

        /// Channel values in R, G, B order.
        pub fn channels(&self) -> [Channel; CHANNELS] {
            [self.red, self.green, self.blue]
        }
    }
}

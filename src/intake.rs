// THEORY:
// Frame intake helpers. The engine consumes ticks, not images; these adapters
// turn an already-decoded RGB frame into the raster-ordered tick sequence the
// pipeline expects. Decoding and video framing stay with the caller.

use crate::core_modules::pixel::pixel::Grid;
use crate::error::{EngineError, EngineResult};
use crate::pipeline::PixelTick;
use image::RgbImage;

/// Raster-ordered ticks for every pixel of `frame`.
pub fn frame_ticks(frame: &RgbImage) -> impl Iterator<Item = PixelTick> + '_ {
    frame
        .enumerate_pixels()
        .map(|(x, y, pixel)| PixelTick::pixel(y, x, pixel[0], pixel[1], pixel[2]))
}

/// Checks that `frame` matches the session grid before it is streamed.
pub fn check_frame(frame: &RgbImage, grid: Grid) -> EngineResult<()> {
    if frame.width() != grid.width || frame.height() != grid.height {
        return Err(EngineError::InvalidConfig(format!(
            "frame {}x{} does not match grid {}x{}",
            frame.width(),
            frame.height(),
            grid.width,
            grid.height
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn ticks_follow_raster_order() {
        let mut frame = RgbImage::new(3, 2);
        frame.put_pixel(2, 1, Rgb([9, 8, 7]));
        let ticks: Vec<PixelTick> = frame_ticks(&frame).collect();
        assert_eq!(ticks.len(), 6);
        assert_eq!((ticks[1].row, ticks[1].col), (0, 1));
        assert_eq!((ticks[3].row, ticks[3].col), (1, 0));
        assert_eq!(ticks[5], PixelTick::pixel(1, 2, 9, 8, 7));
    }

    #[test]
    fn frame_size_must_match_grid() {
        let frame = RgbImage::new(3, 2);
        assert!(check_frame(&frame, Grid::new(3, 2)).is_ok());
        assert!(check_frame(&frame, Grid::new(2, 3)).is_err());
    }
}

// THEORY:
// The `BackgroundAccumulator` is the learning memory of the engine. It owns one
// `PixelAccumulator` per grid coordinate and orchestrates a training session:
// reset, N frames of raster-ordered accumulation, then on-demand models.
//
// Key architectural principles:
// 1.  **Two backings, one contract**: grids that fit `on_chip_capacity` keep their
//     records in a plain `Vec`. Larger grids spill to a `RecordStore`, where every
//     accumulation is a read-modify-write of the pixel's 42-byte record. Callers
//     cannot tell the difference except through backpressure.
// 2.  **Session bookkeeping**: a raster cursor and a completed-frame counter make
//     the frame count used for a model equal to the accumulations actually
//     applied. Pixels out of order, past the session budget, or outside the grid
//     are rejected before anything is touched.
// 3.  **Backpressure without loss**: `try_accumulate` returns `StoreBusy` without
//     side effects when the store is not ready; `accumulate` waits for readiness.
//     Because the accumulator is driven through `&mut self`, two read-modify-write
//     cycles on the same record can never overlap.
// 4.  **Atomic reset**: `reset` takes `&mut self`, so it is ordered against every
//     accumulation; it zeroes all records and rewinds the session at once.

use crate::core_modules::accumulator::PixelAccumulator;
use crate::core_modules::model::{PixelModel, derive};
use crate::core_modules::pixel::pixel::{Grid, PixelCoord, PixelSample};
use crate::core_modules::sqrt_unit::SqrtStrategy;
use crate::core_modules::store::{RecordStore, record_address};
use crate::error::{EngineError, EngineResult};

/// Where the per-pixel records live.
enum Backing {
    OnChip(Vec<PixelAccumulator>),
    External(Box<dyn RecordStore>),
}

/// Per-pixel running statistics for one training session.
pub struct BackgroundAccumulator {
    grid: Grid,
    /// Frames per training session (N).
    training_frames: u32,
    backing: Backing,
    /// Next coordinate expected in raster order.
    cursor: PixelCoord,
    /// Frames fully accumulated since the last reset.
    frames_completed: u32,
}

impl BackgroundAccumulator {
    /// Keeps records on chip.
    pub fn on_chip(grid: Grid, training_frames: u32) -> Self {
        Self::with_backing(
            grid,
            training_frames,
            Backing::OnChip(vec![PixelAccumulator::default(); grid.pixel_count()]),
        )
    }

    /// Spills records to `store`, which must hold at least one record per pixel.
    pub fn external(grid: Grid, training_frames: u32, store: Box<dyn RecordStore>) -> EngineResult<Self> {
        let needed = grid.pixel_count() as u64;
        if store.capacity_records() < needed {
            return Err(EngineError::InvalidConfig(format!(
                "store holds {} records, grid needs {needed}",
                store.capacity_records()
            )));
        }
        Ok(Self::with_backing(grid, training_frames, Backing::External(store)))
    }

    fn with_backing(grid: Grid, training_frames: u32, backing: Backing) -> Self {
        Self {
            grid,
            training_frames,
            backing,
            cursor: PixelCoord::default(),
            frames_completed: 0,
        }
    }

    pub fn grid(&self) -> Grid {
        self.grid
    }

    pub fn training_frames(&self) -> u32 {
        self.training_frames
    }

    pub fn frames_completed(&self) -> u32 {
        self.frames_completed
    }

    pub fn is_external(&self) -> bool {
        matches!(self.backing, Backing::External(_))
    }

    pub fn is_session_complete(&self) -> bool {
        self.frames_completed >= self.training_frames
    }

    /// Zeroes every record and rewinds the session.
    pub fn reset(&mut self) {
        match &mut self.backing {
            Backing::OnChip(records) => records.fill(PixelAccumulator::default()),
            Backing::External(store) => store.clear(),
        }
        self.cursor = PixelCoord::default();
        self.frames_completed = 0;
        tracing::debug!(pixels = self.grid.pixel_count(), "background accumulator reset");
    }

    fn check_order(&self, coord: PixelCoord) -> EngineResult<usize> {
        let index = self.grid.index_of(coord)?;
        if self.is_session_complete() {
            return Err(EngineError::SessionComplete {
                expected: self.training_frames,
            });
        }
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

    /// Adds `sample` at its coordinate, or fails without side effects.
    pub fn try_accumulate(&mut self, sample: &PixelSample) -> EngineResult<()> {
        let index = self.check_order(sample.coord)?;
        match &mut self.backing {
            Backing::OnChip(records) => records[index].absorb(sample),
            Backing::External(store) => {
                if !store.poll_ready() {
                    return Err(EngineError::StoreBusy);
                }
                let address = record_address(index);
                let mut record = PixelAccumulator::decode(&store.read_record(address)?)?;
                record.absorb(sample);
                store.write_record(address, &record.encode()?)?;
            }
        }
        self.advance();
        Ok(())
    }

    /// Adds `sample`, waiting while the store applies backpressure.
    pub async fn accumulate(&mut self, sample: &PixelSample) -> EngineResult<()> {
        loop {
            match self.try_accumulate(sample) {
                Err(EngineError::StoreBusy) => tokio::task::yield_now().await,
                outcome => return outcome,
            }
        }
    }

    fn advance(&mut self) {
        let (next, wrapped) = self.grid.advance(self.cursor);
        self.cursor = next;
        if wrapped {
            self.frames_completed += 1;
            tracing::debug!(
                frame = self.frames_completed,
                of = self.training_frames,
                "training frame accumulated"
            );
        }
    }

    /// Raw sums at `coord`.
    pub fn read(&mut self, coord: PixelCoord) -> EngineResult<PixelAccumulator> {
        let index = self.grid.index_of(coord)?;
        match &mut self.backing {
            Backing::OnChip(records) => Ok(records[index]),
            Backing::External(store) => {
                if !store.poll_ready() {
                    return Err(EngineError::StoreBusy);
                }
                PixelAccumulator::decode(&store.read_record(record_address(index))?)
            }
        }
    }

    /// Frame count to derive models with, once the session is complete.
    pub fn model_frame_count(&self) -> EngineResult<u32> {
        if self.frames_completed == 0 && self.cursor == PixelCoord::default() {
            return Err(EngineError::NoAccumulation);
        }
        if !self.is_session_complete() {
            return Err(EngineError::TrainingIncomplete {
                completed: self.frames_completed,
                expected: self.training_frames,
            });
        }
        Ok(self.frames_completed)
    }

    /// Derives the model at `coord` from a completed training session.
    pub fn model(&mut self, coord: PixelCoord, sqrt: &dyn SqrtStrategy) -> EngineResult<PixelModel> {
        self.grid.index_of(coord)?;
        let frame_count = self.model_frame_count()?;
        let record = self.read(coord)?;
        derive(&record, frame_count, sqrt)
    }

    /// Every record in raster order, waiting while the store applies backpressure.
    pub async fn read_all(&mut self) -> EngineResult<Vec<PixelAccumulator>> {
        let mut records = Vec::with_capacity(self.grid.pixel_count());
        for index in 0..self.grid.pixel_count() {
            let coord = self.grid.coord_of(index);
            let record = loop {
                match self.read(coord) {
                    Err(EngineError::StoreBusy) => tokio::task::yield_now().await,
                    outcome => break outcome?,
                }
            };
            records.push(record);
        }
        Ok(records)
    }

    /// Like `model`, waiting while the store applies backpressure.
    pub async fn model_when_ready(
        &mut self,
        coord: PixelCoord,
        sqrt: &dyn SqrtStrategy,
    ) -> EngineResult<PixelModel> {
        loop {
            match self.model(coord, sqrt) {
                Err(EngineError::StoreBusy) => tokio::task::yield_now().await,
                outcome => return outcome,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_modules::fixed_point::FixedPoint;
    use crate::core_modules::sqrt_unit::ShiftSubtractSqrt;
    use crate::core_modules::store::MemoryStore;

    fn frame(acc: &mut BackgroundAccumulator, value: u8) {
        let grid = acc.grid();
        for index in 0..grid.pixel_count() {
            let coord = grid.coord_of(index);
            acc.try_accumulate(&PixelSample::new(coord, value, value, value)).unwrap();
        }
    }

    #[test]
    fn model_before_any_accumulation_fails() {
        let mut acc = BackgroundAccumulator::on_chip(Grid::new(2, 2), 3);
        assert_eq!(
            acc.model(PixelCoord::new(0, 0), &ShiftSubtractSqrt),
            Err(EngineError::NoAccumulation)
        );
    }

    #[test]
    fn model_mid_session_reports_progress() {
        let mut acc = BackgroundAccumulator::on_chip(Grid::new(2, 2), 3);
        frame(&mut acc, 10);
        assert_eq!(
            acc.model(PixelCoord::new(0, 0), &ShiftSubtractSqrt),
            Err(EngineError::TrainingIncomplete { completed: 1, expected: 3 })
        );
    }

    #[test]
    fn accumulation_past_session_is_rejected() {
        let mut acc = BackgroundAccumulator::on_chip(Grid::new(2, 1), 1);
        frame(&mut acc, 10);
        let extra = PixelSample::new(PixelCoord::new(0, 0), 1, 1, 1);
        assert_eq!(acc.try_accumulate(&extra), Err(EngineError::SessionComplete { expected: 1 }));
    }

    #[test]
    fn out_of_order_pixel_is_rejected_without_side_effects() {
        let mut acc = BackgroundAccumulator::on_chip(Grid::new(2, 2), 1);
        let skipped = PixelSample::new(PixelCoord::new(0, 1), 5, 5, 5);
        assert!(matches!(acc.try_accumulate(&skipped), Err(EngineError::OutOfRasterOrder { .. })));
        assert!(acc.read(PixelCoord::new(0, 1)).unwrap().is_zero());
    }

    #[test]
    fn external_backing_matches_on_chip() {
        let grid = Grid::new(3, 2);
        let mut on_chip = BackgroundAccumulator::on_chip(grid, 3);
        let mut external =
            BackgroundAccumulator::external(grid, 3, Box::new(MemoryStore::new(6))).unwrap();
        for value in [10, 20, 30] {
            frame(&mut on_chip, value);
            frame(&mut external, value);
        }
        for index in 0..grid.pixel_count() {
            let coord = grid.coord_of(index);
            assert_eq!(on_chip.read(coord).unwrap(), external.read(coord).unwrap());
            let model = external.model(coord, &ShiftSubtractSqrt).unwrap();
            assert_eq!(model.mean[0], FixedPoint::from_int(20));
        }
    }

    #[test]
    fn undersized_store_is_rejected() {
        let result = BackgroundAccumulator::external(Grid::new(4, 4), 3, Box::new(MemoryStore::new(8)));
        assert!(matches!(result, Err(EngineError::InvalidConfig(_))));
    }

    #[test]
    fn reset_clears_everything() {
        let grid = Grid::new(2, 2);
        let mut acc = BackgroundAccumulator::external(grid, 2, Box::new(MemoryStore::new(4))).unwrap();
        frame(&mut acc, 200);
        acc.reset();
        assert_eq!(acc.frames_completed(), 0);
        for index in 0..grid.pixel_count() {
            assert!(acc.read(grid.coord_of(index)).unwrap().is_zero());
        }
        assert_eq!(
            acc.model(PixelCoord::new(1, 1), &ShiftSubtractSqrt),
            Err(EngineError::NoAccumulation)
        );
    }
}

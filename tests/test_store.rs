// tests/test_store.rs - Integration tests for the external accumulator store and
// backpressure.
//
// The replay tests drive the same pixel sequence through a throttled store and
// through on-chip records, retrying every `StoreBusy`, and require identical
// sums at the end: backpressure may delay an update but never lose one.

use proptest::prelude::*;
use waldo_background::core_modules::accumulator::{PixelAccumulator, RECORD_BYTES, SUM_FIELD_MAX};
use waldo_background::core_modules::background_accumulator::BackgroundAccumulator;
use waldo_background::core_modules::pixel::pixel::{Grid, PixelSample};
use waldo_background::core_modules::sqrt_unit::ShiftSubtractSqrt;
use waldo_background::core_modules::store::{LatencyModel, MemoryStore, RecordStore, ThrottledStore, record_address};
use waldo_background::error::EngineError;
use waldo_background::pipeline::{BackgroundPipeline, PipelineConfig, PixelTick};

const FRAMES: u32 = 4;

fn color(frame: u32, index: usize) -> (u8, u8, u8) {
    let seed = frame as usize * 31 + index * 7;
    ((seed % 256) as u8, ((seed * 3) % 256) as u8, ((seed * 11) % 256) as u8)
}

fn throttled(grid: Grid, latency: u64, depth: usize) -> Box<dyn RecordStore> {
    let store = MemoryStore::new(grid.pixel_count() as u64);
    Box::new(ThrottledStore::new(store, LatencyModel::new(latency, depth)))
}

/// Runs a full session, retrying busy accumulations. Returns the number of retries.
fn replay(acc: &mut BackgroundAccumulator) -> u64 {
    let grid = acc.grid();
    let mut busy = 0;
    for frame in 0..FRAMES {
        for index in 0..grid.pixel_count() {
            let (r, g, b) = color(frame, index);
            let sample = PixelSample::new(grid.coord_of(index), r, g, b);
            loop {
                match acc.try_accumulate(&sample) {
                    Ok(()) => break,
                    Err(EngineError::StoreBusy) => busy += 1,
                    Err(other) => panic!("unexpected error: {other}"),
                }
            }
        }
    }
    busy
}

#[test]
fn backpressure_loses_no_updates() {
    let grid = Grid::new(5, 3);
    let mut reference = BackgroundAccumulator::on_chip(grid, FRAMES);
    let mut slow = BackgroundAccumulator::external(grid, FRAMES, throttled(grid, 3, 1)).unwrap();

    assert_eq!(replay(&mut reference), 0);
    let busy = replay(&mut slow);
    // Each read holds the only slot for three ticks: two stalled polls per pixel after the first.
    let total = grid.pixel_count() as u64 * FRAMES as u64;
    assert_eq!(busy, 2 * (total - 1));

    for index in 0..grid.pixel_count() {
        let coord = grid.coord_of(index);
        let expected = reference.read(coord).unwrap();
        let actual = loop {
            match slow.read(coord) {
                Err(EngineError::StoreBusy) => continue,
                other => break other.unwrap(),
            }
        };
        assert_eq!(actual, expected, "pixel {index}");
    }
}

#[test]
fn busy_accumulation_has_no_side_effects() {
    let grid = Grid::new(2, 1);
    let mut acc = BackgroundAccumulator::external(grid, 1, throttled(grid, 2, 1)).unwrap();
    let first = PixelSample::new(grid.coord_of(0), 10, 10, 10);
    let second = PixelSample::new(grid.coord_of(1), 20, 20, 20);
    acc.try_accumulate(&first).unwrap();
    assert_eq!(acc.try_accumulate(&second), Err(EngineError::StoreBusy));
    // The rejected sample is retried, not skipped or applied twice.
    acc.try_accumulate(&second).unwrap();
    assert!(acc.is_session_complete());
    let record = loop {
        match acc.read(grid.coord_of(1)) {
            Err(EngineError::StoreBusy) => continue,
            other => break other.unwrap(),
        }
    };
    assert_eq!(record.sum, [20, 20, 20]);
}

#[test]
fn deeper_queues_stall_less() {
    let grid = Grid::new(4, 4);
    let mut shallow = BackgroundAccumulator::external(grid, FRAMES, throttled(grid, 4, 1)).unwrap();
    let mut deep = BackgroundAccumulator::external(grid, FRAMES, throttled(grid, 4, 4)).unwrap();
    assert!(replay(&mut deep) < replay(&mut shallow));
}

#[test]
fn records_live_at_fixed_addresses() {
    let mut store = MemoryStore::new(3);
    let acc = PixelAccumulator {
        sum: [1, 2, 3],
        sum_sq: [1, 4, 9],
    };
    store.write_record(record_address(2), &acc.encode().unwrap()).unwrap();
    assert_eq!(record_address(2), 2 * RECORD_BYTES as u64);
    let back = PixelAccumulator::decode(&store.read_record(84).unwrap()).unwrap();
    assert_eq!(back, acc);
    assert!(PixelAccumulator::decode(&store.read_record(42).unwrap()).unwrap().is_zero());
}

#[tokio::test]
async fn waiting_reads_ride_out_backpressure() {
    let grid = Grid::new(3, 3);
    let mut slow = BackgroundAccumulator::external(grid, 2, throttled(grid, 5, 1)).unwrap();
    for frame in 0..2 {
        for index in 0..grid.pixel_count() {
            let (r, g, b) = color(frame, index);
            slow.accumulate(&PixelSample::new(grid.coord_of(index), r, g, b)).await.unwrap();
        }
    }
    let records = slow.read_all().await.unwrap();
    assert_eq!(records.len(), grid.pixel_count());
    let model = slow.model_when_ready(grid.coord_of(4), &ShiftSubtractSqrt).await.unwrap();
    let (r0, _, _) = color(0, 4);
    let (r1, _, _) = color(1, 4);
    let mean = (r0 as f64 + r1 as f64) / 2.0;
    assert!((model.mean[0].to_f64() - mean).abs() < 1e-4);
}

#[test]
fn throttled_pipeline_reports_match_unthrottled() {
    let config = PipelineConfig {
        image_width: 3,
        image_height: 2,
        training_frames: 2,
        calibration_frames: 2,
        ..PipelineConfig::default()
    };
    let grid = config.grid();
    let mut fast = BackgroundPipeline::new(config.clone()).unwrap();
    let mut slow = BackgroundPipeline::with_store(config, throttled(grid, 3, 1)).unwrap();

    for frame in 0..5 {
        for index in 0..grid.pixel_count() {
            let coord = grid.coord_of(index);
            let (r, g, b) = color(frame, index);
            let tick = PixelTick::pixel(coord.row, coord.col, r, g, b);
            let expected = fast.process_tick(&tick).unwrap();
            let actual = loop {
                match slow.process_tick(&tick) {
                    Err(EngineError::StoreBusy) => continue,
                    other => break other.unwrap(),
                }
            };
            assert_eq!(actual, expected, "frame {frame}, pixel {index}");
        }
    }
}

proptest! {
    #[test]
    fn records_survive_the_store(
        sum in prop::array::uniform3(0..=SUM_FIELD_MAX),
        sum_sq in prop::array::uniform3(any::<u64>()),
        slot in 0usize..16,
    ) {
        let mut store = MemoryStore::new(16);
        let acc = PixelAccumulator { sum, sum_sq };
        store.write_record(record_address(slot), &acc.encode().unwrap()).unwrap();
        let back = PixelAccumulator::decode(&store.read_record(record_address(slot)).unwrap()).unwrap();
        prop_assert_eq!(back, acc);
    }

    #[test]
    fn oversized_sums_are_not_encoded(excess in (SUM_FIELD_MAX + 1)..=u64::MAX) {
        let acc = PixelAccumulator { sum: [0, excess, 0], sum_sq: [0; 3] };
        prop_assert!(matches!(acc.encode(), Err(EngineError::MalformedRecord(_))));
    }
}

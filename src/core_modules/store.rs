// THEORY:
// The `store` module decouples the statistics engine from the medium that holds
// accumulator records once a grid outgrows on-chip capacity. The engine sees an
// address -> record map with a "ready" handshake, nothing more.
//
// Key architectural principles:
// 1.  **Fixed addressing**: pixel `i` lives at byte address `i * RECORD_BYTES`.
//     Misaligned or out-of-capacity addresses are rejected, never wrapped.
// 2.  **Explicit readiness**: a caller must see `poll_ready() == true` before it
//     issues a command. Each poll is one tick of the store's clock.
// 3.  **Injectable latency**: `ThrottledStore` wraps any store with a
//     deterministic `LatencyModel` (bounded outstanding-request depth, fixed
//     completion latency) so backpressure can be reproduced in tests without a
//     real memory controller.

use crate::core_modules::accumulator::{RECORD_BYTES, Record};
use crate::error::{EngineError, EngineResult};
use std::collections::{HashMap, VecDeque};

/// Byte address of a pixel's record.
pub fn record_address(pixel_index: usize) -> u64 {
    pixel_index as u64 * RECORD_BYTES as u64
}

/// A word-addressed record store with a ready handshake.
pub trait RecordStore: Send {
    /// Advances the store clock by one tick and reports whether a command may be issued.
    fn poll_ready(&mut self) -> bool;

    /// Reads the record at `address`. Never-written records read as zero.
    fn read_record(&mut self, address: u64) -> EngineResult<Record>;

    /// Writes back a record previously read from `address`.
    fn write_record(&mut self, address: u64, record: &Record) -> EngineResult<()>;

    /// Zeroes every record.
    fn clear(&mut self);

    fn capacity_records(&self) -> u64;
}

/// In-memory store, standing in for external DRAM.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    records: HashMap<u64, Record>,
    capacity: u64,
}

impl MemoryStore {
    pub fn new(capacity_records: u64) -> Self {
        Self {
            records: HashMap::new(),
            capacity: capacity_records,
        }
    }

    fn check_address(&self, address: u64) -> EngineResult<()> {
        let aligned = address % RECORD_BYTES as u64 == 0;
        if !aligned || address / RECORD_BYTES as u64 >= self.capacity {
            return Err(EngineError::StoreAddressOutOfRange {
                address,
                capacity: self.capacity,
            });
        }
        Ok(())
    }

    /// Number of records that have been written since the last clear.
    pub fn resident_records(&self) -> usize {
        self.records.len()
    }
}

impl RecordStore for MemoryStore {
    fn poll_ready(&mut self) -> bool {
        true
    }

    fn read_record(&mut self, address: u64) -> EngineResult<Record> {
        self.check_address(address)?;
        Ok(self.records.get(&address).copied().unwrap_or([0u8; RECORD_BYTES]))
    }

    fn write_record(&mut self, address: u64, record: &Record) -> EngineResult<()> {
        self.check_address(address)?;
        self.records.insert(address, *record);
        Ok(())
    }

    fn clear(&mut self) {
        self.records.clear();
    }

    fn capacity_records(&self) -> u64 {
        self.capacity
    }
}

/// Queue depth and completion latency of an external store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LatencyModel {
    /// Ticks before an issued command retires.
    pub latency: u64,
    /// Commands that may be outstanding at once.
    pub depth: usize,
}

impl LatencyModel {
    pub fn new(latency: u64, depth: usize) -> Self {
        Self {
            latency,
            depth: depth.max(1),
        }
    }
}

/// Wraps a store with a deterministic latency/backpressure model.
///
/// A read occupies one outstanding-request slot for `latency` ticks; the
/// write-back of the same record is posted against that slot.
#[derive(Debug, Clone)]
pub struct ThrottledStore<S> {
    inner: S,
    model: LatencyModel,
    now: u64,
    in_flight: VecDeque<u64>,
    stalls: u64,
}

impl<S: RecordStore> ThrottledStore<S> {
    pub fn new(inner: S, model: LatencyModel) -> Self {
        Self {
            inner,
            model,
            now: 0,
            in_flight: VecDeque::with_capacity(model.depth),
            stalls: 0,
        }
    }

    /// Polls that found the store not ready.
    pub fn stalls(&self) -> u64 {
        self.stalls
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    fn retire(&mut self) {
        while self.in_flight.front().is_some_and(|&deadline| deadline <= self.now) {
            self.in_flight.pop_front();
        }
    }

    fn is_full(&self) -> bool {
        self.in_flight.len() >= self.model.depth
    }
}

impl<S: RecordStore> RecordStore for ThrottledStore<S> {
    fn poll_ready(&mut self) -> bool {
        self.now += 1;
        self.retire();
        let ready = !self.is_full() && self.inner.poll_ready();
        if !ready {
            self.stalls += 1;
            tracing::trace!(tick = self.now, in_flight = self.in_flight.len(), "accumulator store stalled");
        }
        ready
    }

    fn read_record(&mut self, address: u64) -> EngineResult<Record> {
        if self.is_full() {
            return Err(EngineError::StoreBusy);
        }
        let record = self.inner.read_record(address)?;
        self.in_flight.push_back(self.now + self.model.latency);
        Ok(record)
    }

    fn write_record(&mut self, address: u64, record: &Record) -> EngineResult<()> {
        self.inner.write_record(address, record)
    }

    fn clear(&mut self) {
        self.inner.clear();
    }

    fn capacity_records(&self) -> u64 {
        self.inner.capacity_records()
    }
}

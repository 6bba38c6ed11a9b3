//! Time-indexed stream buffers.
//!
//! A region is the runtime representation of one stream: a sequence of
//! contiguous time slots, each either a data slot carrying a payload or a
//! gap. Slots are appended by closing spans at monotonically increasing
//! end times, so the timeline has no holes: the next slot always begins
//! where the previous one ended.

use rivulet_types::DataType;
use thiserror::Error;

use crate::value::Value;

/// An error raised by region buffer operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RegionError {
    #[error("region is full (capacity {0})")]
    Full(usize),

    #[error("commit time {t} is not after the last committed time {last}")]
    NonMonotonicTime { t: i64, last: i64 },

    #[error("slot index {0} out of bounds")]
    IndexOutOfBounds(usize),

    #[error("write time {t} does not match slot end time {slot_end}")]
    TimeMismatch { t: i64, slot_end: i64 },

    #[error("cannot write a payload into a gap slot")]
    WriteToGap(usize),

    #[error("payload does not fit region schema {0:?}")]
    SchemaMismatch(DataType),
}

/// One committed span of the timeline.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Slot {
    pub start: i64,
    pub end: i64,
    pub gap: bool,
    pub payload: Option<Value>,
}

/// A bounded, append-only stream buffer over `[start_time, ..)`.
#[derive(Debug, Clone)]
pub struct Region {
    schema: DataType,
    capacity: usize,
    start_time: i64,
    slots: Vec<Slot>,
}

impl Region {
    pub fn new(capacity: usize, schema: DataType, start_time: i64) -> Self {
        Self {
            schema,
            capacity,
            start_time,
            slots: Vec::new(),
        }
    }

    pub fn schema(&self) -> &DataType {
        &self.schema
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn start_time(&self) -> i64 {
        self.start_time
    }

    /// Number of committed slots.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// End time of the last committed slot, or the region start time when
    /// nothing has been committed yet.
    pub fn last_time(&self) -> i64 {
        self.slots.last().map_or(self.start_time, |s| s.end)
    }

    /// Index of the most recently committed slot.
    ///
    /// Only meaningful after at least one commit; an empty region reports 0.
    pub fn end_idx(&self) -> usize {
        self.slots.len().saturating_sub(1)
    }

    fn close(&mut self, t: i64, gap: bool) -> Result<(), RegionError> {
        if self.slots.len() == self.capacity {
            return Err(RegionError::Full(self.capacity));
        }
        let last = self.last_time();
        if t <= last {
            return Err(RegionError::NonMonotonicTime { t, last });
        }
        self.slots.push(Slot {
            start: last,
            end: t,
            gap,
            payload: None,
        });
        Ok(())
    }

    /// Close the open span ending at `t` as a data slot. The payload is
    /// written separately via [`Region::write_data`].
    pub fn commit_data(&mut self, t: i64) -> Result<(), RegionError> {
        self.close(t, false)
    }

    /// Close the open span ending at `t` as a gap.
    pub fn commit_null(&mut self, t: i64) -> Result<(), RegionError> {
        self.close(t, true)
    }

    /// Write `payload` into the data slot at `idx`, whose end time must be
    /// `t`.
    pub fn write_data(&mut self, payload: Value, t: i64, idx: usize) -> Result<(), RegionError> {
        if !payload.fits(&self.schema) {
            return Err(RegionError::SchemaMismatch(self.schema.clone()));
        }
        let slot = self
            .slots
            .get_mut(idx)
            .ok_or(RegionError::IndexOutOfBounds(idx))?;
        if slot.gap {
            return Err(RegionError::WriteToGap(idx));
        }
        if slot.end != t {
            return Err(RegionError::TimeMismatch { t, slot_end: slot.end });
        }
        slot.payload = Some(payload);
        Ok(())
    }

    /// Start time of the slot at `idx`.
    pub fn get_ts(&self, idx: usize) -> Option<i64> {
        self.slots.get(idx).map(|s| s.start)
    }

    /// Duration of the slot at `idx`.
    pub fn get_dur(&self, idx: usize) -> Option<i64> {
        self.slots.get(idx).map(|s| s.end - s.start)
    }

    /// Payload of the slot at `idx`; `None` for gaps and unwritten data
    /// slots as well as out-of-bounds indices.
    pub fn get_payload(&self, idx: usize) -> Option<&Value> {
        self.slots.get(idx).and_then(|s| s.payload.as_ref())
    }

    pub(crate) fn slots(&self) -> &[Slot] {
        &self.slots
    }
}

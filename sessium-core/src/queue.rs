//! Bounded event queue
//!
//! FIFO for normal drain; the exit path may splice terminal records onto the
//! tail before the final drain. The queue never exceeds its ceiling: a push
//! that reaches capacity reports that a flush must happen before the next
//! insert, and the engine drains within the same lock acquisition.

use crate::types::EventRecord;

/// Outcome of a push.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// Stored; room remains.
    Stored,
    /// Stored and the ceiling was reached; flush before the next insert.
    FlushNeeded,
}

/// Bounded in-memory sequence of pending records.
pub struct EventQueue {
    records: Vec<EventRecord>,
    max_size: usize,
    /// Records discarded to keep memory bounded (failed-batch remainders,
    /// requeue overflow).
    dropped: u64,
}

impl EventQueue {
    pub fn new(max_size: usize) -> Self {
        Self {
            records: Vec::with_capacity(max_size.min(1024)),
            max_size,
            dropped: 0,
        }
    }

    /// Append a record. Capacity is a flush trigger, not a drop policy.
    pub fn push(&mut self, record: EventRecord) -> PushOutcome {
        self.records.push(record);
        if self.records.len() >= self.max_size {
            PushOutcome::FlushNeeded
        } else {
            PushOutcome::Stored
        }
    }

    /// Atomically swap out the queue contents as a batch; capture continues
    /// into the fresh empty queue.
    pub fn drain(&mut self) -> Vec<EventRecord> {
        std::mem::take(&mut self.records)
    }

    /// Put back the tail of a failed batch at the front, preserving order.
    ///
    /// If the requeue would exceed the ceiling, newest records are discarded
    /// and counted; memory stays bounded under sustained failure.
    pub fn requeue_front(&mut self, mut records: Vec<EventRecord>) {
        records.append(&mut self.records);
        if records.len() > self.max_size {
            let excess = records.len() - self.max_size;
            records.truncate(self.max_size);
            self.dropped += excess as u64;
            tracing::warn!(excess, "Requeue overflow, discarding newest records");
        }
        self.records = records;
    }

    /// Exit-path append of terminal records, exempt from the ceiling.
    pub fn splice_tail(&mut self, records: impl IntoIterator<Item = EventRecord>) {
        self.records.extend(records);
    }

    /// Count a record dropped outside the queue (failed-batch remainder).
    pub fn note_dropped(&mut self, count: u64) {
        self.dropped += count;
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

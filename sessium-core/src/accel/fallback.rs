//! Structural fallback path
//!
//! Used whenever the accelerated implementation is absent, not yet ready, or
//! errored. Masking drops null fields; compaction is plain JSON with no
//! compression. Functionally equivalent to the accelerated path, just
//! bigger on the wire.

use super::{AccelMetrics, Accelerator, CompactPayload};
use crate::error::Result;
use crate::types::EventRecord;
use std::sync::atomic::{AtomicU64, Ordering};

/// Remove null fields from a payload object, recursively.
pub(super) fn strip_nulls(value: &serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(map) => serde_json::Value::Object(
            map.iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| (k.clone(), strip_nulls(v)))
                .collect(),
        ),
        serde_json::Value::Array(items) => {
            serde_json::Value::Array(items.iter().map(strip_nulls).collect())
        }
        other => other.clone(),
    }
}

/// Unaccelerated masking and compaction.
#[derive(Default)]
pub struct StructuralFallback {
    masked: AtomicU64,
    batches: AtomicU64,
    bytes_out: AtomicU64,
}

impl StructuralFallback {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Accelerator for StructuralFallback {
    fn name(&self) -> &'static str {
        "structural"
    }

    fn initialize(&self) -> Result<()> {
        Ok(())
    }

    fn mask(&self, record: &EventRecord) -> Result<EventRecord> {
        self.masked.fetch_add(1, Ordering::Relaxed);
        Ok(EventRecord {
            event_type: record.event_type,
            timestamp_ms: record.timestamp_ms,
            payload: strip_nulls(&record.payload),
        })
    }

    fn compact(&self, records: &[EventRecord]) -> Result<CompactPayload> {
        let body = serde_json::to_vec(records)?;
        self.batches.fetch_add(1, Ordering::Relaxed);
        self.bytes_out.fetch_add(body.len() as u64, Ordering::Relaxed);
        Ok(CompactPayload {
            event_count: records.len(),
            body,
            compressed: false,
        })
    }

    fn metrics(&self) -> AccelMetrics {
        AccelMetrics {
            masked: self.masked.load(Ordering::Relaxed),
            batches_compacted: self.batches.load(Ordering::Relaxed),
            bytes_out: self.bytes_out.load(Ordering::Relaxed),
        }
    }
}

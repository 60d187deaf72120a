//! zstd-accelerated masking and compaction

use super::fallback::strip_nulls;
use super::{AccelMetrics, Accelerator, CompactPayload};
use crate::error::{Error, Result};
use crate::types::EventRecord;
use std::sync::atomic::{AtomicU64, Ordering};

/// Compression levels
#[derive(Debug, Clone, Copy)]
pub enum CompressionLevel {
    /// Fast compression (level 1)
    Fast,
    /// Balanced (level 3)
    Balanced,
    /// Best compression (level 19)
    Best,
}

impl CompressionLevel {
    pub fn as_i32(&self) -> i32 {
        match self {
            CompressionLevel::Fast => 1,
            CompressionLevel::Balanced => 3,
            CompressionLevel::Best => 19,
        }
    }
}

/// Accelerated implementation: structural masking plus zstd batch
/// compression.
pub struct ZstdAccelerator {
    level: CompressionLevel,
    masked: AtomicU64,
    batches: AtomicU64,
    bytes_in: AtomicU64,
    bytes_out: AtomicU64,
}

impl ZstdAccelerator {
    pub fn new(level: CompressionLevel) -> Self {
        Self {
            level,
            masked: AtomicU64::new(0),
            batches: AtomicU64::new(0),
            bytes_in: AtomicU64::new(0),
            bytes_out: AtomicU64::new(0),
        }
    }

    /// Decompress a compacted body (tests, diagnostics).
    pub fn decompress(data: &[u8]) -> Result<Vec<u8>> {
        zstd::decode_all(data).map_err(|e| Error::Acceleration(format!("decompress: {}", e)))
    }
}

impl Default for ZstdAccelerator {
    fn default() -> Self {
        Self::new(CompressionLevel::Fast)
    }
}

impl Accelerator for ZstdAccelerator {
    fn name(&self) -> &'static str {
        "zstd"
    }

    fn initialize(&self) -> Result<()> {
        // Round-trip a probe so a broken codec surfaces here rather than on
        // the first batch.
        let probe = b"sessium-accel-probe";
        let compressed = zstd::encode_all(&probe[..], self.level.as_i32())
            .map_err(|e| Error::Acceleration(format!("probe compress: {}", e)))?;
        let restored = Self::decompress(&compressed)?;
        if restored != probe {
            return Err(Error::Acceleration("probe round-trip mismatch".to_string()));
        }
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
        let json = serde_json::to_vec(records)?;
        let body = zstd::encode_all(json.as_slice(), self.level.as_i32())
            .map_err(|e| Error::Acceleration(format!("compress: {}", e)))?;

        self.batches.fetch_add(1, Ordering::Relaxed);
        self.bytes_in.fetch_add(json.len() as u64, Ordering::Relaxed);
        self.bytes_out.fetch_add(body.len() as u64, Ordering::Relaxed);
        tracing::debug!(
            bytes_in = json.len(),
            bytes_out = body.len(),
            events = records.len(),
            "Compacted batch"
        );

        Ok(CompactPayload {
            event_count: records.len(),
            body,
            compressed: true,
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

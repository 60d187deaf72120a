//! Acceleration bridge
//!
//! Masking and payload compaction are a pluggable capability with two
//! implementations behind one contract: the zstd-accelerated path and the
//! structural fallback. Call sites never branch on "is acceleration
//! loaded" — the bridge centralizes selection, readiness, and the fail-open
//! policy.
//!
//! The bridge must be fully functional with `ready = false` forever:
//! acceleration absence is a performance difference, never a functional one.
//! Any error on the accelerated path falls back per call; stopping data
//! collection because compression broke is not acceptable.

mod fallback;
mod zstd;

pub use fallback::StructuralFallback;
pub use zstd::{CompressionLevel, ZstdAccelerator};

use crate::config::AccelConfig;
use crate::error::Result;
use crate::types::EventRecord;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// A compacted batch body ready for delivery.
#[derive(Debug, Clone)]
pub struct CompactPayload {
    /// Serialized (and possibly compressed) records
    pub body: Vec<u8>,
    /// Whether `body` is zstd-compressed
    pub compressed: bool,
    /// Number of records in the batch
    pub event_count: usize,
}

/// Per-implementation counters.
#[derive(Debug, Clone, Copy, Default)]
pub struct AccelMetrics {
    pub masked: u64,
    pub batches_compacted: u64,
    pub bytes_out: u64,
}

/// The acceleration capability contract.
pub trait Accelerator: Send + Sync {
    fn name(&self) -> &'static str;

    /// One-time setup; failure disables the accelerated path only.
    fn initialize(&self) -> Result<()>;

    /// Structural scrub of one record.
    fn mask(&self, record: &EventRecord) -> Result<EventRecord>;

    /// Serialize a batch for the wire.
    fn compact(&self, records: &[EventRecord]) -> Result<CompactPayload>;

    fn metrics(&self) -> AccelMetrics;
}

/// Build the accelerated implementation selected by configuration, if any.
pub fn create_accelerator(config: &AccelConfig) -> Option<Arc<dyn Accelerator>> {
    if !config.enabled {
        return None;
    }
    Some(Arc::new(ZstdAccelerator::default()))
}

/// Bridge metrics surfaced through the engine.
#[derive(Debug, Clone, Copy, Default)]
pub struct BridgeMetrics {
    pub ready: bool,
    pub accelerated: AccelMetrics,
    pub fallback: AccelMetrics,
    /// Per-call accelerated failures that fell back
    pub fallback_calls: u64,
}

/// Uniform front for the optional accelerated path.
pub struct AccelBridge {
    accel: Option<Arc<dyn Accelerator>>,
    ready: AtomicBool,
    fallback: StructuralFallback,
    fallback_calls: AtomicU64,
}

impl AccelBridge {
    /// Bridge with no accelerated implementation at all.
    pub fn disabled() -> Self {
        Self {
            accel: None,
            ready: AtomicBool::new(false),
            fallback: StructuralFallback::new(),
            fallback_calls: AtomicU64::new(0),
        }
    }

    /// Bridge over an accelerated implementation; not ready until
    /// [`initialize`](Self::initialize) succeeds.
    pub fn new(accel: Arc<dyn Accelerator>) -> Self {
        Self {
            accel: Some(accel),
            ready: AtomicBool::new(false),
            fallback: StructuralFallback::new(),
            fallback_calls: AtomicU64::new(0),
        }
    }

    /// Build from configuration.
    pub fn from_config(config: &AccelConfig) -> Self {
        match create_accelerator(config) {
            Some(accel) => Self::new(accel),
            None => Self::disabled(),
        }
    }

    /// Time-bounded initialization of the accelerated path.
    ///
    /// Returns the resulting readiness. Failure or timeout only disables the
    /// accelerated path; capture is never blocked on this.
    pub async fn initialize(&self, timeout: Duration) -> bool {
        let Some(accel) = &self.accel else {
            return false;
        };

        let accel = Arc::clone(accel);
        let name = accel.name();
        let init = tokio::task::spawn_blocking(move || accel.initialize());

        match tokio::time::timeout(timeout, init).await {
            Ok(Ok(Ok(()))) => {
                self.ready.store(true, Ordering::Release);
                tracing::info!(accelerator = name, "Acceleration ready");
                true
            }
            Ok(Ok(Err(e))) => {
                tracing::warn!(accelerator = name, error = %e, "Acceleration init failed, using fallback");
                false
            }
            Ok(Err(e)) => {
                tracing::warn!(accelerator = name, error = %e, "Acceleration init panicked, using fallback");
                false
            }
            Err(_) => {
                tracing::warn!(accelerator = name, ?timeout, "Acceleration init timed out, using fallback");
                false
            }
        }
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// Mask one record, failing open: any error yields the original record.
    pub fn mask(&self, record: EventRecord) -> EventRecord {
        if self.is_ready() {
            if let Some(accel) = &self.accel {
                match accel.mask(&record) {
                    Ok(masked) => return masked,
                    Err(e) => {
                        self.fallback_calls.fetch_add(1, Ordering::Relaxed);
                        tracing::warn!(error = %e, "Accelerated mask failed, falling back");
                    }
                }
            }
        }
        match self.fallback.mask(&record) {
            Ok(masked) => masked,
            Err(_) => record,
        }
    }

    /// Compact a batch, falling back to structural JSON on any accelerated
    /// error.
    pub fn compact(&self, records: &[EventRecord]) -> Result<CompactPayload> {
        if self.is_ready() {
            if let Some(accel) = &self.accel {
                match accel.compact(records) {
                    Ok(payload) => return Ok(payload),
                    Err(e) => {
                        self.fallback_calls.fetch_add(1, Ordering::Relaxed);
                        tracing::warn!(error = %e, "Accelerated compact failed, falling back");
                    }
                }
            }
        }
        self.fallback.compact(records)
    }

    pub fn metrics(&self) -> BridgeMetrics {
        BridgeMetrics {
            ready: self.is_ready(),
            accelerated: self
                .accel
                .as_ref()
                .map(|a| a.metrics())
                .unwrap_or_default(),
            fallback: self.fallback.metrics(),
            fallback_calls: self.fallback_calls.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::types::EventType;
    use serde_json::json;

    /// Accelerator whose every call errors.
    struct FaultyAccelerator;

    impl Accelerator for FaultyAccelerator {
        fn name(&self) -> &'static str {
            "faulty"
        }
        fn initialize(&self) -> Result<()> {
            Ok(())
        }
        fn mask(&self, _record: &EventRecord) -> Result<EventRecord> {
            Err(Error::Acceleration("mask broke".to_string()))
        }
        fn compact(&self, _records: &[EventRecord]) -> Result<CompactPayload> {
            Err(Error::Acceleration("compact broke".to_string()))
        }
        fn metrics(&self) -> AccelMetrics {
            AccelMetrics::default()
        }
    }

    /// Accelerator that never finishes initializing.
    struct StuckAccelerator;

    impl Accelerator for StuckAccelerator {
        fn name(&self) -> &'static str {
            "stuck"
        }
        fn initialize(&self) -> Result<()> {
            // Long enough to trip the 50 ms bound, short enough that runtime
            // shutdown does not wait on this thread for long.
            std::thread::sleep(Duration::from_millis(300));
            Ok(())
        }
        fn mask(&self, record: &EventRecord) -> Result<EventRecord> {
            Ok(record.clone())
        }
        fn compact(&self, _records: &[EventRecord]) -> Result<CompactPayload> {
            Err(Error::Acceleration("unreachable".to_string()))
        }
        fn metrics(&self) -> AccelMetrics {
            AccelMetrics::default()
        }
    }

    fn records() -> Vec<EventRecord> {
        vec![
            EventRecord::new(EventType::PointerClick, 1, json!({"x": 1, "noise": null})),
            EventRecord::new(EventType::Scroll, 2, json!({"y": 2})),
            EventRecord::new(EventType::Heartbeat, 3, json!({})),
        ]
    }

    #[tokio::test]
    async fn test_disabled_bridge_uses_fallback() {
        let bridge = AccelBridge::disabled();
        assert!(!bridge.initialize(Duration::from_millis(100)).await);
        assert!(!bridge.is_ready());

        let payload = bridge.compact(&records()).unwrap();
        assert!(!payload.compressed);
        assert_eq!(payload.event_count, 3);
    }

    #[tokio::test]
    async fn test_zstd_bridge_initializes_and_compresses() {
        let bridge = AccelBridge::new(Arc::new(ZstdAccelerator::default()));
        assert!(bridge.initialize(Duration::from_secs(5)).await);
        assert!(bridge.is_ready());

        let payload = bridge.compact(&records()).unwrap();
        assert!(payload.compressed);
    }

    #[tokio::test]
    async fn test_faulty_accelerated_path_fails_open() {
        let bridge = AccelBridge::new(Arc::new(FaultyAccelerator));
        assert!(bridge.initialize(Duration::from_secs(1)).await);

        // Mask error yields a usable record; compact error yields the
        // structural payload.
        let record = EventRecord::new(EventType::Custom, 9, json!({"k": "v"}));
        let masked = bridge.mask(record.clone());
        assert_eq!(masked.payload, record.payload);

        let payload = bridge.compact(&records()).unwrap();
        assert!(!payload.compressed);
        assert_eq!(payload.event_count, 3);
        assert!(bridge.metrics().fallback_calls >= 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_stuck_initialization_times_out() {
        let bridge = AccelBridge::new(Arc::new(StuckAccelerator));
        assert!(!bridge.initialize(Duration::from_millis(50)).await);
        assert!(!bridge.is_ready());

        // Still fully functional through the fallback.
        let payload = bridge.compact(&records()).unwrap();
        assert!(!payload.compressed);
    }

    #[tokio::test]
    async fn test_paths_structurally_equivalent() {
        let accelerated = AccelBridge::new(Arc::new(ZstdAccelerator::default()));
        accelerated.initialize(Duration::from_secs(5)).await;
        let fallback = AccelBridge::disabled();

        let input = records();
        let fast = accelerated.compact(&input).unwrap();
        let slow = fallback.compact(&input).unwrap();

        assert_eq!(fast.event_count, slow.event_count);
        let fast_json = ZstdAccelerator::decompress(&fast.body).unwrap();
        let fast_records: Vec<EventRecord> = serde_json::from_slice(&fast_json).unwrap();
        let slow_records: Vec<EventRecord> = serde_json::from_slice(&slow.body).unwrap();
        for (a, b) in fast_records.iter().zip(slow_records.iter()) {
            assert_eq!(a.event_type, b.event_type);
            assert_eq!(a.timestamp_ms, b.timestamp_ms);
        }
    }
}

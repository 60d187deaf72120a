//! Integration tests for the recording engine
//!
//! These tests drive the full pipeline behind a recording transport:
//! signals go in through the engine, and the tests assert on the decoded
//! batches and completion calls the collector would have received.

use async_trait::async_trait;
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use sessium_core::accel::{CompactPayload, ZstdAccelerator};
use sessium_core::delivery::{
    CollectorTransport, ExitReason, ExitRequest, SessionCreateRequest,
};
use sessium_core::host::{NavigationSignal, NavigationSource, PageContext, PageSignal};
use sessium_core::store::MemoryStore;
use sessium_core::types::{EventRecord, EventType};
use sessium_core::{EngineConfig, Error, Loader, RecordingEngine, Result};

/// Transport that decodes every delivered batch back into records.
struct RecordingTransport {
    fail_batches: AtomicBool,
    sessions: Mutex<Vec<SessionCreateRequest>>,
    batches: Mutex<Vec<Vec<EventRecord>>>,
    exits: Mutex<Vec<ExitRequest>>,
}

impl RecordingTransport {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            fail_batches: AtomicBool::new(false),
            sessions: Mutex::new(Vec::new()),
            batches: Mutex::new(Vec::new()),
            exits: Mutex::new(Vec::new()),
        })
    }

    /// All delivered records in delivery order.
    fn delivered(&self) -> Vec<EventRecord> {
        self.batches.lock().unwrap().iter().flatten().cloned().collect()
    }
}

#[async_trait]
impl CollectorTransport for RecordingTransport {
    async fn create_session(&self, request: &SessionCreateRequest) -> Result<()> {
        self.sessions.lock().unwrap().push(request.clone());
        Ok(())
    }

    async fn send_batch(&self, _session_id: &str, payload: &CompactPayload) -> Result<()> {
        if self.fail_batches.load(Ordering::Relaxed) {
            return Err(Error::Delivery("HTTP request failed: timeout".to_string()));
        }
        let body = if payload.compressed {
            ZstdAccelerator::decompress(&payload.body)?
        } else {
            payload.body.clone()
        };
        let records: Vec<EventRecord> = serde_json::from_slice(&body)?;
        assert_eq!(records.len(), payload.event_count);
        self.batches.lock().unwrap().push(records);
        Ok(())
    }

    async fn send_exit(&self, request: &ExitRequest) -> Result<()> {
        self.exits.lock().unwrap().push(request.clone());
        Ok(())
    }
}

fn config(site_id: &str) -> EngineConfig {
    let mut config = EngineConfig::new("https://collect.example.com", site_id);
    config.consent_granted = true;
    // Long timers so only explicit signals drive these tests.
    config.queue.flush_interval_ms = 3_600_000;
    config.lifecycle.heartbeat_interval_ms = 3_600_000;
    config.acceleration.enabled = false;
    config.loader.retry_delay_ms = 10;
    config
}

fn page() -> PageContext {
    PageContext {
        url: "https://app.example.com/a".to_string(),
        referrer: Some("https://search.example.com/".to_string()),
        user_agent: "Mozilla/5.0 (X11; Linux x86_64) Chrome/126.0".to_string(),
    }
}

async fn start_engine(
    config: EngineConfig,
    transport: Arc<RecordingTransport>,
) -> Arc<RecordingEngine> {
    RecordingEngine::start(
        config,
        transport as Arc<dyn CollectorTransport>,
        MemoryStore::shared(),
        MemoryStore::shared(),
        page(),
    )
    .await
    .unwrap()
}

fn click(timestamp_ms: u64) -> PageSignal {
    PageSignal::PointerClick {
        x: 10,
        y: 20,
        target: "button#buy".to_string(),
        timestamp_ms,
    }
}

// ============================================
// Queue and delivery
// ============================================

#[tokio::test]
async fn test_full_queue_flushes_one_batch() {
    let transport = RecordingTransport::new();
    let mut config = config("it-queue");
    config.queue.max_queue_size = 3;
    let engine = start_engine(config, Arc::clone(&transport)).await;

    for i in 0..3 {
        engine.handle_signal(click(1000 + i)).await;
    }

    let batches = transport.batches.lock().unwrap();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].len(), 3);
    assert!(batches[0]
        .iter()
        .all(|r| r.event_type == EventType::PointerClick));
    assert_eq!(engine.metrics().queue_len, 0);
}

#[tokio::test]
async fn test_session_announced_with_page_context() {
    let transport = RecordingTransport::new();
    let engine = start_engine(config("it-announce"), Arc::clone(&transport)).await;

    let sessions = transport.sessions.lock().unwrap();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].session_id, engine.session().session_id);
    assert_eq!(sessions[0].url, "https://app.example.com/a");
    assert_eq!(
        sessions[0].referrer.as_deref(),
        Some("https://search.example.com/")
    );
    assert_eq!(sessions[0].device.browser, "chrome");
}

#[tokio::test]
async fn test_failed_delivery_keeps_only_recent_tail() {
    let transport = RecordingTransport::new();
    let engine = start_engine(config("it-requeue"), Arc::clone(&transport)).await;
    transport.fail_batches.store(true, Ordering::Relaxed);

    for i in 0..30 {
        engine.handle_signal(click(1000 + i)).await;
    }
    engine.flush().await;
    assert_eq!(engine.metrics().queue_len, 10);
    assert_eq!(engine.metrics().queue_dropped, 20);

    transport.fail_batches.store(false, Ordering::Relaxed);
    engine.flush().await;

    // Only the 10 most recent records survived the failure, in order.
    let delivered = transport.delivered();
    assert_eq!(delivered.len(), 10);
    assert_eq!(delivered[0].timestamp_ms, 1020);
    assert_eq!(delivered[9].timestamp_ms, 1029);
}

// ============================================
// Privacy
// ============================================

#[tokio::test]
async fn test_sensitive_input_never_reaches_the_wire() {
    let transport = RecordingTransport::new();
    let engine = start_engine(config("it-mask"), Arc::clone(&transport)).await;

    engine
        .handle_signal(PageSignal::FormInput {
            field: sessium_core::host::FormField {
                name: "card_number".to_string(),
                input_type: "text".to_string(),
                selector: "#checkout-card".to_string(),
            },
            value: "4111111111111111".to_string(),
            timestamp_ms: 1000,
        })
        .await;
    engine.flush().await;

    let delivered = transport.delivered();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].payload["value"], "***");
    let raw = serde_json::to_string(&delivered).unwrap();
    assert!(!raw.contains("4111111111111111"));
}

// ============================================
// Exit path
// ============================================

#[tokio::test]
async fn test_overlapping_exit_signals_complete_once() {
    let transport = RecordingTransport::new();
    let engine = start_engine(config("it-exit"), Arc::clone(&transport)).await;

    engine.handle_signal(click(1000)).await;
    engine
        .handle_signal(PageSignal::Scroll {
            x: 0,
            y: 900,
            timestamp_ms: 1100,
        })
        .await;
    // Hide and exit arrive back to back, as they do during a real unload.
    engine
        .handle_signal(PageSignal::PageHide { timestamp_ms: 2000 })
        .await;
    engine
        .handle_signal(PageSignal::PageExit { timestamp_ms: 2001 })
        .await;

    let exits = transport.exits.lock().unwrap();
    assert_eq!(exits.len(), 1);
    assert_eq!(exits[0].reason, ExitReason::PageExit);
    assert!(exits[0].complete);

    // The final batch ends with the last scroll position and the exit record.
    let delivered = transport.delivered();
    let last = &delivered[delivered.len() - 1];
    assert_eq!(last.event_type, EventType::PageExit);
    let second_last = &delivered[delivered.len() - 2];
    assert_eq!(second_last.event_type, EventType::Scroll);
    assert_eq!(second_last.payload["final"], true);
    assert_eq!(second_last.payload["y"], 900);
}

#[tokio::test(start_paused = true)]
async fn test_hidden_page_abandoned_after_timeout() {
    let transport = RecordingTransport::new();
    let engine = start_engine(config("it-abandon"), Arc::clone(&transport)).await;

    engine
        .handle_signal(PageSignal::Visibility {
            visible: false,
            timestamp_ms: 1000,
        })
        .await;
    tokio::time::sleep(Duration::from_millis(121_000)).await;

    let exits = transport.exits.lock().unwrap();
    assert_eq!(exits.len(), 1);
    assert_eq!(exits[0].reason, ExitReason::IdleHidden);
    assert!(!exits[0].complete);
}

#[tokio::test(start_paused = true)]
async fn test_return_within_timeout_avoids_abandonment() {
    let transport = RecordingTransport::new();
    let engine = start_engine(config("it-return"), Arc::clone(&transport)).await;

    engine
        .handle_signal(PageSignal::Visibility {
            visible: false,
            timestamp_ms: 1000,
        })
        .await;
    // The user comes back after a minute, well inside the two-minute window.
    tokio::time::sleep(Duration::from_millis(60_000)).await;
    engine
        .handle_signal(PageSignal::Visibility {
            visible: true,
            timestamp_ms: 61_000,
        })
        .await;
    // Let the stale watchdog fire and do nothing.
    tokio::time::sleep(Duration::from_millis(120_000)).await;

    assert!(transport.exits.lock().unwrap().is_empty());
    engine.handle_signal(click(200_000)).await;
    assert_eq!(engine.metrics().queue_len, 2);
}

// ============================================
// Navigation
// ============================================

#[tokio::test]
async fn test_route_change_detected_once_across_detectors() {
    let transport = RecordingTransport::new();
    let engine = start_engine(config("it-nav"), Arc::clone(&transport)).await;

    engine
        .handle_signal(PageSignal::Navigation(NavigationSignal {
            source: NavigationSource::HistoryPush,
            from_url: "https://app.example.com/a".to_string(),
            to_url: "https://app.example.com/b".to_string(),
            timestamp_ms: 1000,
        }))
        .await;
    // The URL poller reports the same change on its next tick.
    engine
        .handle_signal(PageSignal::Navigation(NavigationSignal {
            source: NavigationSource::LocationPoll,
            from_url: "https://app.example.com/a".to_string(),
            to_url: "https://app.example.com/b".to_string(),
            timestamp_ms: 1300,
        }))
        .await;
    engine.flush().await;

    let delivered = transport.delivered();
    let navigations: Vec<_> = delivered
        .iter()
        .filter(|r| r.event_type == EventType::Navigation)
        .collect();
    assert_eq!(navigations.len(), 1);
    assert_eq!(navigations[0].payload["to_url"], "https://app.example.com/b");
    assert_eq!(navigations[0].payload["page_number"], 2);
    assert_eq!(navigations[0].payload["navigation_type"], "history_push");
}

// ============================================
// Acceleration
// ============================================

#[tokio::test]
async fn test_accelerated_and_fallback_paths_deliver_equal_streams() {
    async fn run(site_id: &str, accelerated: bool) -> Vec<EventRecord> {
        let transport = RecordingTransport::new();
        let mut config = config(site_id);
        config.acceleration.enabled = accelerated;
        let engine = start_engine(config, Arc::clone(&transport)).await;

        engine.handle_signal(click(1000)).await;
        engine
            .handle_signal(PageSignal::KeyInput {
                field: sessium_core::host::FormField {
                    name: "search".to_string(),
                    input_type: "text".to_string(),
                    selector: "#q".to_string(),
                },
                value: "running shoes".to_string(),
                timestamp_ms: 1100,
            })
            .await;
        engine.flush().await;
        transport.delivered()
    }

    let accelerated = run("it-accel-on", true).await;
    let fallback = run("it-accel-off", false).await;

    assert_eq!(accelerated.len(), fallback.len());
    for (a, b) in accelerated.iter().zip(fallback.iter()) {
        assert_eq!(a.event_type, b.event_type);
        assert_eq!(a.timestamp_ms, b.timestamp_ms);
        assert_eq!(a.payload, b.payload);
    }
}

#[tokio::test]
async fn test_accelerated_batches_arrive_compressed_and_decodable() {
    let transport = RecordingTransport::new();
    let mut config = config("it-accel-wire");
    config.acceleration.enabled = true;
    let engine = start_engine(config, Arc::clone(&transport)).await;

    for i in 0..5 {
        engine.handle_signal(click(1000 + i)).await;
    }
    engine.flush().await;

    // The transport decompressed and decoded the batch successfully.
    let delivered = transport.delivered();
    assert_eq!(delivered.len(), 5);
    assert!(engine.metrics().bridge.ready);
    assert_eq!(engine.metrics().bridge.accelerated.batches_compacted, 1);
}

// ============================================
// Loader
// ============================================

#[tokio::test]
async fn test_loader_refuses_without_consent() {
    let mut config = config("it-consent");
    config.consent_granted = false;
    let loader = Loader::with_parts(
        config,
        RecordingTransport::new() as Arc<dyn CollectorTransport>,
        MemoryStore::shared(),
        MemoryStore::shared(),
        page(),
    );
    assert!(matches!(loader.load().await, Err(Error::Config(_))));
}

#[tokio::test]
async fn test_loader_shares_engine_and_session_across_loads() {
    let transport = RecordingTransport::new();
    let loader = Loader::with_parts(
        config("it-loader"),
        Arc::clone(&transport) as Arc<dyn CollectorTransport>,
        MemoryStore::shared(),
        MemoryStore::shared(),
        page(),
    );

    let first = loader.load().await.unwrap();
    let second = loader.load().await.unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    // Only one session was ever announced.
    assert_eq!(transport.sessions.lock().unwrap().len(), 1);

    first.track_event("cta_clicked", json!({"id": "hero"})).await;
    loader.unload().await;

    let exits = transport.exits.lock().unwrap();
    assert_eq!(exits.len(), 1);
    assert_eq!(exits[0].reason, ExitReason::Stopped);
}

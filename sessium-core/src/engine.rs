//! Recording engine
//!
//! Owns one recording session end to end: identity issuance, the capture
//! layer and bounded queue, the acceleration bridge, background flush and
//! heartbeat timers, the abandonment watchdog, and the exit-guaranteed
//! delivery path. At most one engine is active per site at a time; the
//! loader is the supported way to obtain one.
//!
//! Locking order is `state` (capture + queue) before nothing else; no lock
//! is held across an await point.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use tokio::task::JoinHandle;

use crate::accel::{AccelBridge, BridgeMetrics};
use crate::capture::{CaptureLayer, CaptureStats};
use crate::config::EngineConfig;
use crate::delivery::{
    BatchOutcome, CollectorTransport, Delivery, DeliveryStats, ExitReason, SessionCreateRequest,
};
use crate::error::{Error, Result};
use crate::host::{PageContext, PageSignal};
use crate::identity::IdentityStore;
use crate::lifecycle::{LifecycleState, NavigationTracker, StateMachine};
use crate::queue::{EventQueue, PushOutcome};
use crate::store::KeyValueStore;
use crate::types::{DeviceInfo, EventRecord, EventType, Session};

// One engine per site across the process. A second start for the same site
// is rejected; distinct sites coexist (parallel tests rely on this).
static ACTIVE_SITES: OnceLock<Mutex<HashSet<String>>> = OnceLock::new();

fn active_sites() -> &'static Mutex<HashSet<String>> {
    ACTIVE_SITES.get_or_init(|| Mutex::new(HashSet::new()))
}

/// Registry slot held for the engine's lifetime; released on drop.
struct SiteSlot {
    site_id: String,
}

impl SiteSlot {
    fn acquire(site_id: &str) -> Result<Self> {
        let mut sites = active_sites().lock().expect("site registry lock poisoned");
        if !sites.insert(site_id.to_string()) {
            return Err(Error::Lifecycle(format!(
                "an engine is already active for site {}",
                site_id
            )));
        }
        Ok(Self {
            site_id: site_id.to_string(),
        })
    }
}

impl Drop for SiteSlot {
    fn drop(&mut self) {
        active_sites()
            .lock()
            .expect("site registry lock poisoned")
            .remove(&self.site_id);
    }
}

/// Capture layer and queue share one lock so a ceiling-triggered drain is
/// atomic with the push that reached it.
struct CaptureState {
    capture: CaptureLayer,
    queue: EventQueue,
}

/// Engine metrics snapshot.
#[derive(Debug, Clone)]
pub struct EngineMetrics {
    pub state: LifecycleState,
    pub session_id: String,
    pub page_number: u64,
    pub queue_len: usize,
    pub queue_dropped: u64,
    pub capture: CaptureStats,
    pub delivery: DeliveryStats,
    pub bridge: BridgeMetrics,
}

/// One active recording session.
pub struct RecordingEngine {
    config: EngineConfig,
    session: Session,
    state: Mutex<CaptureState>,
    lifecycle: Mutex<StateMachine>,
    navigation: Mutex<NavigationTracker>,
    bridge: AccelBridge,
    delivery: Delivery,
    identity: IdentityStore,
    /// Set once the terminal exit path has run; later exits are no-ops.
    exit_done: AtomicBool,
    /// Bumped on every visibility change; the abandonment watchdog fires
    /// only if the generation it was armed with is still current.
    pause_generation: AtomicU64,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    /// Released on the terminal exit path so a later load for the same site
    /// can proceed even while stale handles are still held.
    slot: Mutex<Option<SiteSlot>>,
}

impl RecordingEngine {
    /// Build and start an engine: claim the site slot, establish identity,
    /// bring up the acceleration bridge, announce the session, and spawn
    /// the flush and heartbeat timers.
    pub async fn start(
        config: EngineConfig,
        transport: Arc<dyn CollectorTransport>,
        tab_store: Arc<dyn KeyValueStore>,
        origin_store: Arc<dyn KeyValueStore>,
        context: PageContext,
    ) -> Result<Arc<Self>> {
        config.validate()?;
        let slot = SiteSlot::acquire(&config.site_id)?;

        let identity = IdentityStore::new(
            Arc::clone(&tab_store),
            origin_store,
            config.lifecycle.session_ttl_minutes,
        );
        let session = identity.get_or_create_session();
        tracing::info!(
            session_id = %session.session_id,
            visitor_id = %session.visitor_id,
            site_id = %config.site_id,
            "Starting recording engine"
        );

        let bridge = AccelBridge::from_config(&config.acceleration);
        let ready = bridge
            .initialize(Duration::from_millis(config.acceleration.init_timeout_ms))
            .await;
        tracing::debug!(accelerated = ready, "Acceleration bridge initialized");

        let delivery = Delivery::new(transport, tab_store, config.delivery.max_retries);
        delivery
            .announce_session(&SessionCreateRequest {
                session_id: session.session_id.clone(),
                visitor_id: session.visitor_id.clone(),
                device: DeviceInfo::from_user_agent(&context.user_agent),
                url: context.url.clone(),
                referrer: context.referrer.clone(),
            })
            .await?;

        let mut lifecycle = StateMachine::new();
        lifecycle.start(now_ms())?;

        let engine = Arc::new(Self {
            state: Mutex::new(CaptureState {
                capture: CaptureLayer::new(&config.sampling, &config.privacy),
                queue: EventQueue::new(config.queue.max_queue_size),
            }),
            lifecycle: Mutex::new(lifecycle),
            navigation: Mutex::new(NavigationTracker::new(&context.url)),
            bridge,
            delivery,
            identity,
            session,
            exit_done: AtomicBool::new(false),
            pause_generation: AtomicU64::new(0),
            tasks: Mutex::new(Vec::new()),
            slot: Mutex::new(Some(slot)),
            config,
        });

        engine.spawn_timers();
        Ok(engine)
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn state(&self) -> LifecycleState {
        self.lifecycle.lock().expect("lifecycle lock poisoned").state()
    }

    /// Route one page signal.
    ///
    /// Capture signals go through the capture layer while recording;
    /// navigation, visibility, and termination signals drive the engine
    /// directly. A conversion failure for one signal is logged and does not
    /// affect the others.
    pub async fn handle_signal(self: &Arc<Self>, signal: PageSignal) {
        match signal {
            PageSignal::Navigation(nav) => {
                if let Some(batch) = self.on_navigation(&nav) {
                    self.flush_batch(batch).await;
                }
            }
            PageSignal::Visibility {
                visible,
                timestamp_ms,
            } => self.on_visibility(visible, timestamp_ms).await,
            PageSignal::PageHide { timestamp_ms } | PageSignal::PageExit { timestamp_ms } => {
                if let Err(e) = self.page_exit(timestamp_ms).await {
                    tracing::warn!(error = %e, "Exit path failed");
                }
            }
            other => {
                if !self.can_capture() {
                    return;
                }
                let flush_batch = {
                    let mut state = self.state.lock().expect("capture state lock poisoned");
                    match state.capture.convert(&other) {
                        Ok(Some(record)) => match state.queue.push(record) {
                            PushOutcome::Stored => None,
                            PushOutcome::FlushNeeded => Some(state.queue.drain()),
                        },
                        Ok(None) => None,
                        Err(e) => {
                            tracing::warn!(signal = other.kind(), error = %e, "Signal capture failed");
                            None
                        }
                    }
                };
                if let Some(batch) = flush_batch {
                    self.flush_batch(batch).await;
                }
            }
        }
    }

    /// Record a host-defined custom event.
    pub async fn track_event(self: &Arc<Self>, name: &str, properties: serde_json::Value) {
        self.push_engine_record(
            EventType::Custom,
            now_ms(),
            json!({"name": name, "properties": properties}),
        )
        .await;
    }

    /// Attach a host-known user id and traits to the session stream.
    pub async fn identify(self: &Arc<Self>, user_id: &str, traits: serde_json::Value) {
        self.push_engine_record(
            EventType::Identify,
            now_ms(),
            json!({"user_id": user_id, "traits": traits}),
        )
        .await;
    }

    /// Drain and deliver whatever is queued.
    pub async fn flush(self: &Arc<Self>) {
        let batch = {
            let mut state = self.state.lock().expect("capture state lock poisoned");
            state.queue.drain()
        };
        if !batch.is_empty() {
            self.flush_batch(batch).await;
        }
    }

    /// Terminal stop: cancel timers, run the exit path with reason
    /// `stopped`, release nothing else (the site slot frees on drop).
    pub async fn stop(self: &Arc<Self>) {
        for task in self
            .tasks
            .lock()
            .expect("task list lock poisoned")
            .drain(..)
        {
            task.abort();
        }
        if let Err(e) = self.run_exit(now_ms(), ExitReason::Stopped, true).await {
            tracing::warn!(error = %e, "Exit send during stop failed");
        }
    }

    /// Blocking exit for hosts tearing down outside the async runtime.
    /// Must not be called from an async context.
    pub fn page_exit_blocking(self: &Arc<Self>, timestamp_ms: u64) -> Result<()> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| Error::Lifecycle(format!("failed to create runtime: {}", e)))?;
        runtime.block_on(self.page_exit(timestamp_ms))
    }

    /// Clear persisted session identity (used by `unload`).
    pub fn clear_identity(&self) {
        self.identity.clear();
    }

    pub fn metrics(&self) -> EngineMetrics {
        let (queue_len, queue_dropped, capture) = {
            let state = self.state.lock().expect("capture state lock poisoned");
            (state.queue.len(), state.queue.dropped(), state.capture.stats())
        };
        EngineMetrics {
            state: self.state(),
            session_id: self.session.session_id.clone(),
            page_number: self
                .navigation
                .lock()
                .expect("navigation lock poisoned")
                .page_number(),
            queue_len,
            queue_dropped,
            capture,
            delivery: self.delivery.stats(),
            bridge: self.bridge.metrics(),
        }
    }

    fn can_capture(&self) -> bool {
        self.lifecycle
            .lock()
            .expect("lifecycle lock poisoned")
            .can_capture()
    }

    fn on_navigation(
        self: &Arc<Self>,
        nav: &crate::host::NavigationSignal,
    ) -> Option<Vec<EventRecord>> {
        if self.lifecycle.lock().expect("lifecycle lock poisoned").is_stopped() {
            return None;
        }
        let record = self
            .navigation
            .lock()
            .expect("navigation lock poisoned")
            .observe(nav)?;

        let mut state = self.state.lock().expect("capture state lock poisoned");
        state.capture.on_navigation();
        // Navigation records bypass sampling but still share the monotonic
        // clock and the queue ceiling.
        let record = state
            .capture
            .record(record.event_type, record.timestamp_ms, record.payload);
        match state.queue.push(record) {
            PushOutcome::Stored => None,
            PushOutcome::FlushNeeded => Some(state.queue.drain()),
        }
    }

    async fn on_visibility(self: &Arc<Self>, visible: bool, timestamp_ms: u64) {
        let generation = self.pause_generation.fetch_add(1, Ordering::SeqCst) + 1;

        if visible {
            let resumed = {
                let mut lifecycle = self.lifecycle.lock().expect("lifecycle lock poisoned");
                lifecycle.resume(timestamp_ms).is_ok()
            };
            if resumed {
                self.push_engine_record(
                    EventType::VisibilityChange,
                    timestamp_ms,
                    json!({"visible": true}),
                )
                .await;
            }
            return;
        }

        // Record the hide before pausing so it lands in the stream.
        self.push_engine_record(
            EventType::VisibilityChange,
            timestamp_ms,
            json!({"visible": false}),
        )
        .await;
        let paused = {
            let mut lifecycle = self.lifecycle.lock().expect("lifecycle lock poisoned");
            lifecycle.pause(timestamp_ms).is_ok()
        };
        if !paused {
            return;
        }

        // Flush eagerly: a hidden page may never come back.
        self.flush().await;
        self.arm_abandonment(generation);
    }

    /// Watchdog: if the page stays hidden for the full abandonment window,
    /// send an idle-hidden exit. The session stays paused and may still
    /// resume; the exit send carries `complete: false`.
    fn arm_abandonment(self: &Arc<Self>, generation: u64) {
        let weak = Arc::downgrade(self);
        let timeout = Duration::from_millis(self.config.lifecycle.abandonment_timeout_ms);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let Some(engine) = weak.upgrade() else {
                return;
            };
            if engine.pause_generation.load(Ordering::SeqCst) != generation {
                return;
            }
            if engine.state() != LifecycleState::Paused {
                return;
            }
            tracing::info!(
                session_id = %engine.session.session_id,
                "Page hidden past abandonment threshold"
            );
            engine.flush().await;
            let duration = engine
                .lifecycle
                .lock()
                .expect("lifecycle lock poisoned")
                .active_duration_ms(now_ms());
            if let Err(e) = engine
                .delivery
                .send_exit(
                    &engine.session.session_id,
                    ExitReason::IdleHidden,
                    duration,
                    false,
                )
                .await
            {
                tracing::warn!(error = %e, "Idle-hidden exit send failed");
            }
        });
        self.tasks
            .lock()
            .expect("task list lock poisoned")
            .push(handle);
    }

    async fn page_exit(self: &Arc<Self>, timestamp_ms: u64) -> Result<()> {
        self.run_exit(timestamp_ms, ExitReason::PageExit, true).await
    }

    /// Terminal exit path: splice the final scroll position and the exit
    /// record onto the queue tail, deliver everything, then make the
    /// idempotent completion call. Runs at most once per engine.
    async fn run_exit(
        self: &Arc<Self>,
        timestamp_ms: u64,
        reason: ExitReason,
        complete: bool,
    ) -> Result<()> {
        if self.exit_done.swap(true, Ordering::SeqCst) {
            tracing::debug!(reason = reason.as_str(), "Exit already handled");
            return Ok(());
        }

        let duration = {
            let mut lifecycle = self.lifecycle.lock().expect("lifecycle lock poisoned");
            let duration = lifecycle.active_duration_ms(timestamp_ms);
            lifecycle.stop(timestamp_ms);
            duration
        };
        self.slot.lock().expect("slot lock poisoned").take();

        let batch = {
            let mut state = self.state.lock().expect("capture state lock poisoned");
            let mut terminal = Vec::new();
            if let Some(scroll) = state.capture.final_scroll_record(timestamp_ms) {
                terminal.push(scroll);
            }
            terminal.push(state.capture.record(
                EventType::PageExit,
                timestamp_ms,
                json!({"reason": reason.as_str()}),
            ));
            state.queue.splice_tail(terminal);
            state.queue.drain()
        };
        self.flush_batch(batch).await;

        let sent = self
            .delivery
            .send_exit(&self.session.session_id, reason, duration, complete)
            .await?;
        if !sent {
            tracing::debug!(session_id = %self.session.session_id, "Completion already sent");
        }
        Ok(())
    }

    /// Mask, compact, and deliver one batch; a failed send puts the bounded
    /// tail back at the queue front.
    async fn flush_batch(self: &Arc<Self>, batch: Vec<EventRecord>) {
        if batch.is_empty() {
            return;
        }
        let masked: Vec<EventRecord> = batch.into_iter().map(|r| self.bridge.mask(r)).collect();
        let payload = match self.bridge.compact(&masked) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!(error = %e, count = masked.len(), "Batch compaction failed, dropping");
                let mut state = self.state.lock().expect("capture state lock poisoned");
                state.queue.note_dropped(masked.len() as u64);
                return;
            }
        };
        match self
            .delivery
            .send_batch(&self.session.session_id, payload, masked)
            .await
        {
            BatchOutcome::Sent => {}
            BatchOutcome::Failed { requeue, dropped } => {
                let mut state = self.state.lock().expect("capture state lock poisoned");
                state.queue.requeue_front(requeue);
                state.queue.note_dropped(dropped as u64);
            }
        }
    }

    /// Push a record the engine itself produces (heartbeat, visibility,
    /// custom events). Honors the lifecycle gate and the queue ceiling.
    async fn push_engine_record(
        self: &Arc<Self>,
        event_type: EventType,
        timestamp_ms: u64,
        payload: serde_json::Value,
    ) {
        if self.lifecycle.lock().expect("lifecycle lock poisoned").is_stopped() {
            return;
        }
        let flush_batch = {
            let mut state = self.state.lock().expect("capture state lock poisoned");
            let record = state.capture.record(event_type, timestamp_ms, payload);
            match state.queue.push(record) {
                PushOutcome::Stored => None,
                PushOutcome::FlushNeeded => Some(state.queue.drain()),
            }
        };
        if let Some(batch) = flush_batch {
            self.flush_batch(batch).await;
        }
    }

    fn spawn_timers(self: &Arc<Self>) {
        let flush_interval = Duration::from_millis(self.config.queue.flush_interval_ms);
        let heartbeat_interval = Duration::from_millis(self.config.lifecycle.heartbeat_interval_ms);

        let weak = Arc::downgrade(self);
        let flush_task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(flush_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            interval.tick().await;
            loop {
                interval.tick().await;
                let Some(engine) = weak.upgrade() else { break };
                if engine.lifecycle.lock().expect("lifecycle lock poisoned").is_stopped() {
                    break;
                }
                engine.flush().await;
            }
        });

        let weak = Arc::downgrade(self);
        let heartbeat_task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(heartbeat_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            interval.tick().await;
            loop {
                interval.tick().await;
                let Some(engine) = weak.upgrade() else { break };
                if engine.lifecycle.lock().expect("lifecycle lock poisoned").is_stopped() {
                    break;
                }
                if engine.can_capture() {
                    engine
                        .push_engine_record(EventType::Heartbeat, now_ms(), json!({}))
                        .await;
                }
            }
        });

        let mut tasks = self.tasks.lock().expect("task list lock poisoned");
        tasks.push(flush_task);
        tasks.push(heartbeat_task);
    }
}

impl Drop for RecordingEngine {
    fn drop(&mut self) {
        for task in self
            .tasks
            .lock()
            .expect("task list lock poisoned")
            .drain(..)
        {
            task.abort();
        }
    }
}

fn now_ms() -> u64 {
    Utc::now().timestamp_millis().max(0) as u64
}

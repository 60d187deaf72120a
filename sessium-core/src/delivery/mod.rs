//! Delivery subsystem
//!
//! Two delivery modes share one transport contract:
//! - **Normal batch send** — asynchronous; on failure only the most recent
//!   [`REQUEUE_TAIL`] records of the batch are handed back for requeue and
//!   the rest are dropped. Bounded memory beats lossless retry here; data
//!   loss under sustained failure is an explicit, accepted tradeoff.
//! - **Exit-guaranteed send** — awaited to completion before the exit path
//!   returns, with a persisted `(session, reason)` idempotency marker so a
//!   burst of overlapping termination signals produces exactly one call.
//!   Hosts tearing down outside the async runtime use the blocking wrapper,
//!   which runs the same path on a dedicated current-thread runtime.

mod client;

pub use client::{HttpTransport, COMPRESSED_HEADER, EVENT_COUNT_HEADER};

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::accel::CompactPayload;
use crate::error::{Error, Result};
use crate::store::KeyValueStore;
use crate::types::{DeviceInfo, EventRecord};

/// Most recent records of a failed batch kept for retry.
pub const REQUEUE_TAIL: usize = 10;

/// Exit markers younger than this suppress a duplicate send.
pub const EXIT_DEDUP_WINDOW_MS: u64 = 1000;

/// Why an exit-guaranteed send fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    /// The page is being torn down
    PageExit,
    /// The page stayed hidden past the abandonment threshold
    IdleHidden,
    /// Explicit engine stop
    Stopped,
}

impl ExitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitReason::PageExit => "page_exit",
            ExitReason::IdleHidden => "idle_hidden",
            ExitReason::Stopped => "stopped",
        }
    }
}

/// Body of the session-create call.
#[derive(Debug, Clone, Serialize)]
pub struct SessionCreateRequest {
    pub session_id: String,
    pub visitor_id: String,
    pub device: DeviceInfo,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub referrer: Option<String>,
}

/// Body of the completion call.
#[derive(Debug, Clone, Serialize)]
pub struct ExitRequest {
    pub session_id: String,
    pub reason: ExitReason,
    pub duration_ms: u64,
    pub complete: bool,
}

/// Transport contract the delivery subsystem sends through.
///
/// The HTTP implementation is the production path; tests inject recording
/// or failing implementations.
#[async_trait]
pub trait CollectorTransport: Send + Sync {
    async fn create_session(&self, request: &SessionCreateRequest) -> Result<()>;
    async fn send_batch(&self, session_id: &str, payload: &CompactPayload) -> Result<()>;
    async fn send_exit(&self, request: &ExitRequest) -> Result<()>;
}

/// Outcome of a batch send.
#[derive(Debug)]
pub enum BatchOutcome {
    /// Batch accepted by the collector.
    Sent,
    /// Send failed; `requeue` goes back to the queue front, `dropped` counts
    /// the discarded older records.
    Failed {
        requeue: Vec<EventRecord>,
        dropped: usize,
    },
}

/// Delivery statistics snapshot.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeliveryStats {
    pub batches_sent: u64,
    pub events_sent: u64,
    pub send_failures: u64,
    pub events_requeued: u64,
    pub events_dropped: u64,
    pub exit_sends: u64,
    pub exit_suppressed: u64,
}

/// Sends batches and exit calls through a transport.
pub struct Delivery {
    transport: Arc<dyn CollectorTransport>,
    tab_store: Arc<dyn KeyValueStore>,
    max_retries: usize,
    batches_sent: AtomicU64,
    events_sent: AtomicU64,
    send_failures: AtomicU64,
    events_requeued: AtomicU64,
    events_dropped: AtomicU64,
    exit_sends: AtomicU64,
    exit_suppressed: AtomicU64,
}

impl Delivery {
    pub fn new(
        transport: Arc<dyn CollectorTransport>,
        tab_store: Arc<dyn KeyValueStore>,
        max_retries: usize,
    ) -> Self {
        Self {
            transport,
            tab_store,
            max_retries,
            batches_sent: AtomicU64::new(0),
            events_sent: AtomicU64::new(0),
            send_failures: AtomicU64::new(0),
            events_requeued: AtomicU64::new(0),
            events_dropped: AtomicU64::new(0),
            exit_sends: AtomicU64::new(0),
            exit_suppressed: AtomicU64::new(0),
        }
    }

    /// Announce a new session to the collector, retrying transient failures
    /// with exponential backoff.
    pub async fn announce_session(&self, request: &SessionCreateRequest) -> Result<()> {
        let mut last_error = None;
        let mut delay = Duration::from_millis(500);

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                tracing::debug!(
                    attempt = attempt + 1,
                    total = self.max_retries + 1,
                    ?delay,
                    "Retrying session create"
                );
                tokio::time::sleep(delay).await;
                delay = std::cmp::min(delay * 2, Duration::from_secs(30));
            }

            match self.transport.create_session(request).await {
                Ok(()) => return Ok(()),
                Err(e) if client::is_retryable_error(&e) => {
                    tracing::warn!(error = %e, "Transient error creating session");
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error
            .unwrap_or_else(|| Error::Delivery("max retries exceeded".to_string())))
    }

    /// Send one batch. The caller hands over the original records so the
    /// failure path can return the bounded tail for requeue.
    pub async fn send_batch(
        &self,
        session_id: &str,
        payload: CompactPayload,
        records: Vec<EventRecord>,
    ) -> BatchOutcome {
        match self.transport.send_batch(session_id, &payload).await {
            Ok(()) => {
                self.batches_sent.fetch_add(1, Ordering::Relaxed);
                self.events_sent
                    .fetch_add(payload.event_count as u64, Ordering::Relaxed);
                tracing::debug!(
                    session_id = %session_id,
                    events = payload.event_count,
                    compressed = payload.compressed,
                    "Batch delivered"
                );
                BatchOutcome::Sent
            }
            Err(e) => {
                self.send_failures.fetch_add(1, Ordering::Relaxed);
                let dropped = records.len().saturating_sub(REQUEUE_TAIL);
                let requeue: Vec<EventRecord> = records
                    .into_iter()
                    .skip(dropped)
                    .collect();
                self.events_requeued
                    .fetch_add(requeue.len() as u64, Ordering::Relaxed);
                self.events_dropped
                    .fetch_add(dropped as u64, Ordering::Relaxed);
                tracing::warn!(
                    session_id = %session_id,
                    error = %e,
                    requeued = requeue.len(),
                    dropped,
                    "Batch delivery failed"
                );
                BatchOutcome::Failed { requeue, dropped }
            }
        }
    }

    /// Exit-guaranteed send, idempotent per `(session, reason)`.
    ///
    /// The marker is persisted before the call returns; a marker younger
    /// than [`EXIT_DEDUP_WINDOW_MS`] suppresses the duplicate entirely.
    /// Returns whether a call was actually made.
    pub async fn send_exit(
        &self,
        session_id: &str,
        reason: ExitReason,
        duration_ms: u64,
        complete: bool,
    ) -> Result<bool> {
        let key = exit_marker_key(session_id, reason);
        let now = now_ms();

        if let Ok(Some(raw)) = self.tab_store.get(&key) {
            if let Ok(marked) = raw.parse::<u64>() {
                if now.saturating_sub(marked) < EXIT_DEDUP_WINDOW_MS {
                    self.exit_suppressed.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!(
                        session_id = %session_id,
                        reason = reason.as_str(),
                        "Duplicate exit signal suppressed"
                    );
                    return Ok(false);
                }
            }
        }

        // Marker goes down before the network call so an overlapping signal
        // arriving mid-send is already suppressed.
        if let Err(e) = self.tab_store.set(&key, &now.to_string()) {
            tracing::warn!(error = %e, "Failed to persist exit marker");
        }

        let request = ExitRequest {
            session_id: session_id.to_string(),
            reason,
            duration_ms,
            complete,
        };
        self.transport.send_exit(&request).await?;
        self.exit_sends.fetch_add(1, Ordering::Relaxed);
        tracing::info!(
            session_id = %session_id,
            reason = reason.as_str(),
            duration_ms,
            "Exit send completed"
        );
        Ok(true)
    }

    /// Blocking exit send for hosts tearing down outside the async runtime.
    ///
    /// Runs the same idempotent path on a dedicated current-thread runtime;
    /// must not be called from within an async context.
    pub fn send_exit_blocking(
        &self,
        session_id: &str,
        reason: ExitReason,
        duration_ms: u64,
        complete: bool,
    ) -> Result<bool> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| Error::Delivery(format!("failed to create runtime: {}", e)))?;
        runtime.block_on(self.send_exit(session_id, reason, duration_ms, complete))
    }

    pub fn stats(&self) -> DeliveryStats {
        DeliveryStats {
            batches_sent: self.batches_sent.load(Ordering::Relaxed),
            events_sent: self.events_sent.load(Ordering::Relaxed),
            send_failures: self.send_failures.load(Ordering::Relaxed),
            events_requeued: self.events_requeued.load(Ordering::Relaxed),
            events_dropped: self.events_dropped.load(Ordering::Relaxed),
            exit_sends: self.exit_sends.load(Ordering::Relaxed),
            exit_suppressed: self.exit_suppressed.load(Ordering::Relaxed),
        }
    }
}

fn exit_marker_key(session_id: &str, reason: ExitReason) -> String {
    format!("sessium.exit.{}.{}", session_id, reason.as_str())
}

fn now_ms() -> u64 {
    Utc::now().timestamp_millis().max(0) as u64
}

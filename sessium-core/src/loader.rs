//! Idempotent engine loader
//!
//! Hosts may call [`Loader::load`] any number of times from any task; all
//! callers share one engine. Concurrent loads wait on the in-flight
//! initialization rather than starting their own. Transient start failures
//! are retried with a fixed delay; once the attempt budget is spent the
//! loader fails permanently for the page lifetime and every later load
//! returns the failure immediately.
//!
//! Configuration errors (missing consent, bad endpoint) are reported
//! without consuming attempts and without latching, so a host that obtains
//! consent later can load again.

use std::sync::Arc;
use std::time::Duration;

use crate::config::EngineConfig;
use crate::delivery::{CollectorTransport, HttpTransport};
use crate::engine::RecordingEngine;
use crate::error::{Error, Result};
use crate::host::PageContext;
use crate::store::{KeyValueStore, MemoryStore, SqliteStore};

/// Shared handle to the running engine.
pub type EngineHandle = Arc<RecordingEngine>;

enum LoadState {
    Idle,
    Loaded(EngineHandle),
    Failed,
}

/// Loads and owns at most one engine for a page.
pub struct Loader {
    config: EngineConfig,
    transport: Arc<dyn CollectorTransport>,
    tab_store: Arc<dyn KeyValueStore>,
    origin_store: Arc<dyn KeyValueStore>,
    context: PageContext,
    // Held across the whole initialization so concurrent loads queue up
    // behind it and then observe the outcome.
    state: tokio::sync::Mutex<LoadState>,
}

impl Loader {
    /// Production wiring: HTTP transport to the configured collector, an
    /// in-memory tab store, and the durable SQLite origin store.
    pub fn new(config: EngineConfig, context: PageContext) -> Result<Self> {
        let transport = Arc::new(HttpTransport::new(&config)?);
        let origin_store: Arc<dyn KeyValueStore> =
            Arc::new(SqliteStore::open(&EngineConfig::store_path())?);
        Ok(Self::with_parts(
            config,
            transport,
            MemoryStore::shared(),
            origin_store,
            context,
        ))
    }

    /// Explicit wiring for tests and embedders with their own stores or
    /// transport.
    pub fn with_parts(
        config: EngineConfig,
        transport: Arc<dyn CollectorTransport>,
        tab_store: Arc<dyn KeyValueStore>,
        origin_store: Arc<dyn KeyValueStore>,
        context: PageContext,
    ) -> Self {
        Self {
            config,
            transport,
            tab_store,
            origin_store,
            context,
            state: tokio::sync::Mutex::new(LoadState::Idle),
        }
    }

    /// Load the engine, or return the already-running one.
    pub async fn load(&self) -> Result<EngineHandle> {
        let mut state = self.state.lock().await;
        match &*state {
            LoadState::Loaded(handle) => return Ok(Arc::clone(handle)),
            LoadState::Failed => {
                return Err(Error::Lifecycle(
                    "loader failed permanently for this page".to_string(),
                ))
            }
            LoadState::Idle => {}
        }

        // Config problems are the host's to fix; they don't count against
        // the attempt budget.
        self.config.validate()?;

        let max_attempts = self.config.loader.max_attempts.max(1);
        let retry_delay = Duration::from_millis(self.config.loader.retry_delay_ms);
        let mut last_error = None;

        for attempt in 1..=max_attempts {
            if attempt > 1 {
                tokio::time::sleep(retry_delay).await;
            }
            match RecordingEngine::start(
                self.config.clone(),
                Arc::clone(&self.transport),
                Arc::clone(&self.tab_store),
                Arc::clone(&self.origin_store),
                self.context.clone(),
            )
            .await
            {
                Ok(handle) => {
                    tracing::info!(attempt, "Engine loaded");
                    *state = LoadState::Loaded(Arc::clone(&handle));
                    return Ok(handle);
                }
                Err(e) => {
                    tracing::warn!(attempt, max_attempts, error = %e, "Engine load attempt failed");
                    last_error = Some(e);
                }
            }
        }

        *state = LoadState::Failed;
        Err(last_error
            .unwrap_or_else(|| Error::Lifecycle("engine load failed".to_string())))
    }

    /// Currently loaded engine, if any.
    pub async fn engine(&self) -> Option<EngineHandle> {
        match &*self.state.lock().await {
            LoadState::Loaded(handle) => Some(Arc::clone(handle)),
            _ => None,
        }
    }

    /// Stop the engine and forget all loader state, including a permanent
    /// failure latch. Persisted session identity is cleared; the next load
    /// starts a fresh session.
    pub async fn unload(&self) {
        let mut state = self.state.lock().await;
        if let LoadState::Loaded(handle) = &*state {
            handle.stop().await;
            handle.clear_identity();
        }
        *state = LoadState::Idle;
    }
}

//! # sessium-core
//!
//! Core library for sessium - a session recording engine for embedding in
//! application hosts.
//!
//! This library provides:
//! - Session and visitor identity with durable storage
//! - Signal capture with adaptive sampling and capture-time masking
//! - A bounded event queue with batch delivery and bounded requeue
//! - An optional compression-accelerated delivery path with guaranteed
//!   structural fallback
//! - Lifecycle and navigation tracking for single-page applications
//! - An idempotent loader with retry and a permanent-failure latch
//!
//! ## Architecture
//!
//! Signals flow through four stages:
//! - **Capture:** host signals become typed records; sampling and masking
//!   happen here, before a record exists anywhere
//! - **Queue:** bounded FIFO; reaching the ceiling forces a flush
//! - **Compaction:** the acceleration bridge masks and compacts batches,
//!   falling back to the structural path on any failure
//! - **Delivery:** batches and the exit-guaranteed completion call go to
//!   the collector over HTTP
//!
//! ## Example
//!
//! ```rust,no_run
//! use sessium_core::{EngineConfig, Loader, PageContext};
//!
//! # async fn run() -> sessium_core::Result<()> {
//! let mut config = EngineConfig::new("https://collect.example.com", "site-1");
//! config.consent_granted = true;
//!
//! let context = PageContext {
//!     url: "https://app.example.com/".to_string(),
//!     referrer: None,
//!     user_agent: "Mozilla/5.0".to_string(),
//! };
//!
//! let loader = Loader::new(config, context)?;
//! let engine = loader.load().await?;
//! engine.track_event("signup_viewed", serde_json::json!({})).await;
//! # Ok(())
//! # }
//! ```

// Re-export commonly used items at the crate root
pub use config::EngineConfig;
pub use engine::{EngineMetrics, RecordingEngine};
pub use error::{Error, Result};
pub use host::{PageContext, PageSignal};
pub use loader::{EngineHandle, Loader};
pub use types::{EventRecord, EventType, Session, Visitor};

// Public modules
pub mod accel;
pub mod capture;
pub mod config;
pub mod delivery;
pub mod engine;
pub mod error;
pub mod host;
pub mod identity;
pub mod lifecycle;
pub mod loader;
pub mod logging;
pub mod queue;
pub mod store;
pub mod types;

//! Durable key-value stores
//!
//! Two scopes exist at runtime:
//! - a **tab store** holding the session record and exit-idempotency markers
//! - an **origin store** holding the visitor id, with no expiry
//!
//! Reads and writes are read-modify-write without cross-tab coordination;
//! cross-tab races on the visitor id are tolerated (last write wins).
//! Store unavailability is never fatal: callers degrade to in-memory ids.

pub mod sqlite;

pub use sqlite::SqliteStore;

use crate::error::Result;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// A durable string key-value store.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;
}

/// In-memory store: the per-tab scope, and the degraded fallback when a
/// durable store cannot be opened.
#[derive(Default)]
pub struct MemoryStore {
    map: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Convenience for handing the same store to several components.
    pub fn shared() -> Arc<dyn KeyValueStore> {
        Arc::new(Self::new())
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.map.lock().expect("store lock poisoned").get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.map
            .lock()
            .expect("store lock poisoned")
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.map.lock().expect("store lock poisoned").remove(key);
        Ok(())
    }
}

//! Identity store: session and visitor issuance
//!
//! Sessions are scoped to one browsing context (tab store) and expire after
//! a configurable TTL since creation, 30 minutes by default. Visitors persist
//! indefinitely in the origin store. Ids are opaque: a millisecond time
//! prefix plus a random suffix, globally unique with overwhelming
//! probability.
//!
//! Store unavailability degrades to in-memory-only ids for the page's
//! lifetime; it is never fatal.

use crate::error::Result;
use crate::store::KeyValueStore;
use crate::types::{Session, Visitor};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

const SESSION_KEY: &str = "sessium.session";
const VISITOR_KEY: &str = "sessium.visitor";

/// Persisted session record (tab store, JSON).
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredSession {
    session_id: String,
    created_at: DateTime<Utc>,
}

/// Issues and persists session and visitor identifiers.
pub struct IdentityStore {
    tab: Arc<dyn KeyValueStore>,
    origin: Arc<dyn KeyValueStore>,
    ttl_minutes: i64,
    // Last issued ids, reused when the durable stores are unavailable.
    cached_session: Mutex<Option<StoredSession>>,
    cached_visitor: Mutex<Option<String>>,
}

impl IdentityStore {
    pub fn new(
        tab: Arc<dyn KeyValueStore>,
        origin: Arc<dyn KeyValueStore>,
        ttl_minutes: i64,
    ) -> Self {
        Self {
            tab,
            origin,
            ttl_minutes,
            cached_session: Mutex::new(None),
            cached_visitor: Mutex::new(None),
        }
    }

    /// Return the stored visitor, or mint and persist a new one.
    pub fn get_or_create_visitor(&self) -> Visitor {
        let mut cached = self.cached_visitor.lock().expect("identity lock poisoned");

        match self.origin.get(VISITOR_KEY) {
            Ok(Some(id)) => {
                *cached = Some(id.clone());
                return Visitor { visitor_id: id };
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(error = %e, "Origin store unavailable, using in-memory visitor id");
                if let Some(id) = cached.as_ref() {
                    return Visitor {
                        visitor_id: id.clone(),
                    };
                }
            }
        }

        let id = mint_id("v");
        if let Err(e) = self.origin.set(VISITOR_KEY, &id) {
            tracing::warn!(error = %e, "Failed to persist visitor id");
        }
        *cached = Some(id.clone());
        Visitor { visitor_id: id }
    }

    /// Return the stored session if it is younger than the TTL, otherwise
    /// mint a replacement with a fresh `created_at`.
    pub fn get_or_create_session(&self) -> Session {
        let visitor = self.get_or_create_visitor();
        let now = Utc::now();

        let stored = self.read_stored_session();
        if let Some(stored) = stored {
            if now - stored.created_at < Duration::minutes(self.ttl_minutes) {
                return Session {
                    session_id: stored.session_id,
                    visitor_id: visitor.visitor_id,
                    created_at: stored.created_at,
                };
            }
            tracing::debug!(
                session_id = %stored.session_id,
                age_minutes = (now - stored.created_at).num_minutes(),
                "Stored session expired, minting replacement"
            );
        }

        let stored = StoredSession {
            session_id: mint_id("s"),
            created_at: now,
        };
        if let Err(e) = self.persist_session(&stored) {
            tracing::warn!(error = %e, "Failed to persist session, id is in-memory only");
        }
        *self.cached_session.lock().expect("identity lock poisoned") = Some(stored.clone());

        Session {
            session_id: stored.session_id,
            visitor_id: visitor.visitor_id,
            created_at: stored.created_at,
        }
    }

    /// Remove persisted identity (used by `unload`).
    pub fn clear(&self) {
        if let Err(e) = self.tab.remove(SESSION_KEY) {
            tracing::warn!(error = %e, "Failed to clear session record");
        }
        *self.cached_session.lock().expect("identity lock poisoned") = None;
    }

    fn read_stored_session(&self) -> Option<StoredSession> {
        match self.tab.get(SESSION_KEY) {
            Ok(Some(raw)) => match serde_json::from_str::<StoredSession>(&raw) {
                Ok(stored) => Some(stored),
                Err(e) => {
                    tracing::warn!(error = %e, "Discarding unparseable session record");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(error = %e, "Tab store unavailable, using in-memory session");
                self.cached_session
                    .lock()
                    .expect("identity lock poisoned")
                    .clone()
            }
        }
    }

    fn persist_session(&self, stored: &StoredSession) -> Result<()> {
        let raw = serde_json::to_string(stored)?;
        self.tab.set(SESSION_KEY, &raw)
    }
}

/// Mint an opaque id: prefix, millisecond time base, random suffix.
fn mint_id(prefix: &str) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!(
        "{}-{:x}-{}",
        prefix,
        Utc::now().timestamp_millis(),
        &suffix[..12]
    )
}

//! Core domain types for sessium
//!
//! These types form the engine's data model: identifiers issued by the
//! identity store, the typed event records that flow through the queue, and
//! the device classification attached to the session-create call.
//!
//! ## Terminology
//!
//! | Term | Definition |
//! |------|------------|
//! | **Session** | A bounded recording unit tied to one browsing context, expiring after inactivity |
//! | **Visitor** | A long-lived opaque identifier for a returning user, independent of session |
//! | **EventRecord** | One captured occurrence: type tag, capture timestamp, structured payload |
//! | **Batch** | An atomically-drained snapshot of the event queue awaiting delivery |

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================
// Identity
// ============================================

/// A recording session scoped to a single browsing context.
///
/// Never mutated after creation; expiry mints a replacement instead.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Opaque session identifier
    pub session_id: String,
    /// Opaque visitor identifier this session belongs to
    pub visitor_id: String,
    /// When the session was minted
    pub created_at: DateTime<Utc>,
}

/// A long-lived visitor identity, persisted without expiry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Visitor {
    /// Opaque visitor identifier
    pub visitor_id: String,
}

// ============================================
// Event records
// ============================================

/// Typed tag for captured events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    PointerMove,
    PointerClick,
    Scroll,
    KeyInput,
    FormInput,
    FormSubmit,
    MutationBatch,
    Navigation,
    VisibilityChange,
    PageExit,
    Heartbeat,
    PerformanceMark,
    Snapshot,
    Custom,
    Identify,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::PointerMove => "pointer_move",
            EventType::PointerClick => "pointer_click",
            EventType::Scroll => "scroll",
            EventType::KeyInput => "key_input",
            EventType::FormInput => "form_input",
            EventType::FormSubmit => "form_submit",
            EventType::MutationBatch => "mutation_batch",
            EventType::Navigation => "navigation",
            EventType::VisibilityChange => "visibility_change",
            EventType::PageExit => "page_exit",
            EventType::Heartbeat => "heartbeat",
            EventType::PerformanceMark => "performance_mark",
            EventType::Snapshot => "snapshot",
            EventType::Custom => "custom",
            EventType::Identify => "identify",
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for EventType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pointer_move" => Ok(EventType::PointerMove),
            "pointer_click" => Ok(EventType::PointerClick),
            "scroll" => Ok(EventType::Scroll),
            "key_input" => Ok(EventType::KeyInput),
            "form_input" => Ok(EventType::FormInput),
            "form_submit" => Ok(EventType::FormSubmit),
            "mutation_batch" => Ok(EventType::MutationBatch),
            "navigation" => Ok(EventType::Navigation),
            "visibility_change" => Ok(EventType::VisibilityChange),
            "page_exit" => Ok(EventType::PageExit),
            "heartbeat" => Ok(EventType::Heartbeat),
            "performance_mark" => Ok(EventType::PerformanceMark),
            "snapshot" => Ok(EventType::Snapshot),
            "custom" => Ok(EventType::Custom),
            "identify" => Ok(EventType::Identify),
            _ => Err(format!("unknown event type: {}", s)),
        }
    }
}

/// One captured event, immutable once it enters the queue.
///
/// `timestamp_ms` is the capture time in milliseconds; the capture layer
/// guarantees it is monotonically non-decreasing within a session. The
/// collector treats it as authoritative since batch delivery may reorder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    /// Event type tag
    #[serde(rename = "type")]
    pub event_type: EventType,

    /// Capture time in milliseconds
    pub timestamp_ms: u64,

    /// Type-specific structured payload
    pub payload: serde_json::Value,
}

impl EventRecord {
    /// Create a new record
    pub fn new(event_type: EventType, timestamp_ms: u64, payload: serde_json::Value) -> Self {
        Self {
            event_type,
            timestamp_ms,
            payload,
        }
    }
}

// ============================================
// Device classification
// ============================================

/// Coarse device/browser/OS classification sent with the session-create call.
///
/// Derived from the user-agent string with substring heuristics; anything
/// unrecognized is reported as "other". This is classification, not
/// fingerprinting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub browser: String,
    pub os: String,
    pub device: String,
}

impl DeviceInfo {
    /// Classify a user-agent string.
    pub fn from_user_agent(ua: &str) -> Self {
        let lower = ua.to_lowercase();

        // Order matters: Edge and Chrome both advertise "chrome", Chrome and
        // Safari both advertise "safari".
        let browser = if lower.contains("edg/") || lower.contains("edge") {
            "edge"
        } else if lower.contains("firefox") {
            "firefox"
        } else if lower.contains("chrome") || lower.contains("chromium") {
            "chrome"
        } else if lower.contains("safari") {
            "safari"
        } else {
            "other"
        };

        let os = if lower.contains("windows") {
            "windows"
        } else if lower.contains("android") {
            "android"
        } else if lower.contains("iphone") || lower.contains("ipad") || lower.contains("ios") {
            "ios"
        } else if lower.contains("mac os") || lower.contains("macintosh") {
            "macos"
        } else if lower.contains("linux") {
            "linux"
        } else {
            "other"
        };

        let device = if lower.contains("mobile") || lower.contains("iphone") {
            "mobile"
        } else if lower.contains("ipad") || lower.contains("tablet") {
            "tablet"
        } else {
            "desktop"
        };

        Self {
            browser: browser.to_string(),
            os: os.to_string(),
            device: device.to_string(),
        }
    }
}

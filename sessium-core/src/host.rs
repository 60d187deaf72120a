//! Host boundary types
//!
//! The engine never patches host globals or installs its own event listeners;
//! the embedding host adapter observes the page and delivers typed
//! [`PageSignal`] values to [`crate::engine::RecordingEngine::handle_signal`].
//! Navigation detection in particular arrives as three independent,
//! already-normalized signal sources and is deduplicated downstream.

use serde::{Deserialize, Serialize};

/// A raw occurrence observed by the host adapter.
///
/// Every variant carries the host-loop dispatch time in milliseconds; the
/// capture layer uses it for sampling and ordering.
#[derive(Debug, Clone)]
pub enum PageSignal {
    PointerMove {
        x: i32,
        y: i32,
        timestamp_ms: u64,
    },
    PointerClick {
        x: i32,
        y: i32,
        target: String,
        timestamp_ms: u64,
    },
    Scroll {
        x: i32,
        y: i32,
        timestamp_ms: u64,
    },
    KeyInput {
        field: FormField,
        value: String,
        timestamp_ms: u64,
    },
    FormInput {
        field: FormField,
        value: String,
        timestamp_ms: u64,
    },
    FormSubmit {
        form_selector: String,
        timestamp_ms: u64,
    },
    /// All structural mutations observed within one notification tick,
    /// already collected by the host adapter in observation order.
    MutationBatch {
        mutations: Vec<MutationDescriptor>,
        timestamp_ms: u64,
    },
    Visibility {
        visible: bool,
        timestamp_ms: u64,
    },
    Navigation(NavigationSignal),
    PerformanceMark {
        name: String,
        duration_ms: f64,
        timestamp_ms: u64,
    },
    /// The page is being hidden as part of teardown (last-chance flush).
    PageHide {
        timestamp_ms: u64,
    },
    /// The page is being torn down (last-chance flush).
    PageExit {
        timestamp_ms: u64,
    },
}

impl PageSignal {
    /// Short name used in diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            PageSignal::PointerMove { .. } => "pointer_move",
            PageSignal::PointerClick { .. } => "pointer_click",
            PageSignal::Scroll { .. } => "scroll",
            PageSignal::KeyInput { .. } => "key_input",
            PageSignal::FormInput { .. } => "form_input",
            PageSignal::FormSubmit { .. } => "form_submit",
            PageSignal::MutationBatch { .. } => "mutation_batch",
            PageSignal::Visibility { .. } => "visibility",
            PageSignal::Navigation(_) => "navigation",
            PageSignal::PerformanceMark { .. } => "performance_mark",
            PageSignal::PageHide { .. } => "page_hide",
            PageSignal::PageExit { .. } => "page_exit",
        }
    }
}

/// The form field a key/input signal targets.
#[derive(Debug, Clone, Default)]
pub struct FormField {
    /// Field name attribute (may be empty)
    pub name: String,
    /// Input type attribute ("text", "password", ...)
    pub input_type: String,
    /// CSS-selector-like locator reported by the host adapter
    pub selector: String,
}

/// One structural change descriptor within a mutation batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MutationDescriptor {
    /// What kind of change this is
    pub kind: MutationKind,
    /// Locator of the changed node
    pub target: String,
    /// Change-specific detail (added/removed counts, attribute name, ...)
    pub detail: serde_json::Value,
}

/// Kinds of structural change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationKind {
    ChildListAdd,
    ChildListRemove,
    Attribute,
    CharacterData,
}

/// A normalized navigation occurrence from one of the three detectors.
#[derive(Debug, Clone)]
pub struct NavigationSignal {
    /// Which detector produced this signal
    pub source: NavigationSource,
    /// URL before the transition
    pub from_url: String,
    /// URL after the transition
    pub to_url: String,
    /// Dispatch time in milliseconds
    pub timestamp_ms: u64,
}

/// Independent navigation detectors the host adapter implements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NavigationSource {
    /// History-API push/replace observed by the adapter
    HistoryPush,
    /// popstate transition
    PopState,
    /// Hash fragment transition
    HashChange,
    /// Location polled against structural change notifications
    LocationPoll,
}

impl NavigationSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            NavigationSource::HistoryPush => "history_push",
            NavigationSource::PopState => "pop_state",
            NavigationSource::HashChange => "hash_change",
            NavigationSource::LocationPoll => "location_poll",
        }
    }
}

/// Page context captured once at load time, sent with session-create.
#[derive(Debug, Clone, Default)]
pub struct PageContext {
    /// Initial URL of the tracked page
    pub url: String,
    /// Referrer, if any
    pub referrer: Option<String>,
    /// Raw user-agent string (classified, never transmitted verbatim)
    pub user_agent: String,
}

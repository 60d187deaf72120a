//! Navigation tracking for single-page-application route changes
//!
//! Route changes arrive from several detectors at once (history push hooks,
//! popstate, hashchange, and a URL poller as the safety net). One real
//! navigation therefore often shows up two or three times in quick
//! succession, so the tracker deduplicates identical `from -> to` pairs
//! inside a short window and assigns each accepted navigation a monotonic
//! page number.

use serde_json::json;

use crate::host::NavigationSignal;
use crate::types::{EventRecord, EventType};

/// Identical from/to pairs within this window collapse to one navigation.
pub const NAVIGATION_DEDUP_WINDOW_MS: u64 = 1500;

/// Deduplicates navigation signals and numbers pages.
#[derive(Debug)]
pub struct NavigationTracker {
    current_url: String,
    page_number: u64,
    last_from: Option<String>,
    last_to: Option<String>,
    last_at_ms: u64,
}

impl NavigationTracker {
    pub fn new(initial_url: &str) -> Self {
        Self {
            current_url: initial_url.to_string(),
            page_number: 1,
            last_from: None,
            last_to: None,
            last_at_ms: 0,
        }
    }

    pub fn current_url(&self) -> &str {
        &self.current_url
    }

    pub fn page_number(&self) -> u64 {
        self.page_number
    }

    /// Process one navigation signal. Returns the navigation event to
    /// record, or `None` when the signal is a duplicate or a non-change.
    pub fn observe(&mut self, signal: &NavigationSignal) -> Option<EventRecord> {
        let from = if signal.from_url.is_empty() {
            self.current_url.clone()
        } else {
            signal.from_url.clone()
        };
        let to = signal.to_url.clone();

        if to == self.current_url {
            return None;
        }

        let duplicate = self.last_from.as_deref() == Some(from.as_str())
            && self.last_to.as_deref() == Some(to.as_str())
            && signal.timestamp_ms.saturating_sub(self.last_at_ms)
                < NAVIGATION_DEDUP_WINDOW_MS;
        if duplicate {
            tracing::trace!(
                source = signal.source.as_str(),
                to = %to,
                "Duplicate navigation signal ignored"
            );
            return None;
        }

        self.page_number += 1;
        self.current_url = to.clone();
        self.last_from = Some(from.clone());
        self.last_to = Some(to.clone());
        self.last_at_ms = signal.timestamp_ms;

        tracing::debug!(
            from = %from,
            to = %to,
            source = signal.source.as_str(),
            page_number = self.page_number,
            "Navigation"
        );

        Some(EventRecord::new(
            EventType::Navigation,
            signal.timestamp_ms,
            json!({
                "from_url": from,
                "to_url": to,
                "navigation_type": signal.source.as_str(),
                "page_number": self.page_number,
            }),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::NavigationSource;

    fn signal(
        source: NavigationSource,
        from: &str,
        to: &str,
        timestamp_ms: u64,
    ) -> NavigationSignal {
        NavigationSignal {
            source,
            from_url: from.to_string(),
            to_url: to.to_string(),
            timestamp_ms,
        }
    }

    #[test]
    fn test_navigation_increments_page_number() {
        let mut tracker = NavigationTracker::new("https://app.example.com/a");
        let record = tracker
            .observe(&signal(
                NavigationSource::HistoryPush,
                "https://app.example.com/a",
                "https://app.example.com/b",
                1000,
            ))
            .unwrap();

        assert_eq!(tracker.page_number(), 2);
        assert_eq!(tracker.current_url(), "https://app.example.com/b");
        assert_eq!(record.payload["page_number"], 2);
        assert_eq!(record.payload["navigation_type"], "history_push");
    }

    #[test]
    fn test_poller_echo_is_deduplicated() {
        let mut tracker = NavigationTracker::new("https://app.example.com/a");
        assert!(tracker
            .observe(&signal(
                NavigationSource::HistoryPush,
                "https://app.example.com/a",
                "https://app.example.com/b",
                1000,
            ))
            .is_some());
        // The URL poller notices the same change a tick later.
        assert!(tracker
            .observe(&signal(
                NavigationSource::LocationPoll,
                "https://app.example.com/a",
                "https://app.example.com/b",
                1400,
            ))
            .is_none());
        assert_eq!(tracker.page_number(), 2);
    }

    #[test]
    fn test_same_url_signal_is_ignored() {
        let mut tracker = NavigationTracker::new("https://app.example.com/a");
        assert!(tracker
            .observe(&signal(
                NavigationSource::LocationPoll,
                "",
                "https://app.example.com/a",
                500,
            ))
            .is_none());
        assert_eq!(tracker.page_number(), 1);
    }

    #[test]
    fn test_revisit_after_window_is_a_new_navigation() {
        let mut tracker = NavigationTracker::new("https://app.example.com/a");
        tracker
            .observe(&signal(
                NavigationSource::HistoryPush,
                "https://app.example.com/a",
                "https://app.example.com/b",
                1000,
            ))
            .unwrap();
        tracker
            .observe(&signal(
                NavigationSource::PopState,
                "https://app.example.com/b",
                "https://app.example.com/a",
                3000,
            ))
            .unwrap();
        // a -> b again, well past the dedup window.
        let record = tracker
            .observe(&signal(
                NavigationSource::HistoryPush,
                "https://app.example.com/a",
                "https://app.example.com/b",
                10_000,
            ))
            .unwrap();
        assert_eq!(record.payload["page_number"], 4);
    }

    #[test]
    fn test_empty_from_uses_current_url() {
        let mut tracker = NavigationTracker::new("https://app.example.com/a");
        let record = tracker
            .observe(&signal(
                NavigationSource::HashChange,
                "",
                "https://app.example.com/a#section",
                100,
            ))
            .unwrap();
        assert_eq!(record.payload["from_url"], "https://app.example.com/a");
    }
}

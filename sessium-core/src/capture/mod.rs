//! Event capture layer
//!
//! Converts raw [`PageSignal`] occurrences into typed [`EventRecord`]s:
//! continuous signals are rate-limited, mutation batches are coalesced into
//! one record, and sensitive field values are replaced with the mask
//! sentinel before the record exists anywhere.
//!
//! A conversion failure for one signal is isolated: the caller logs it and
//! the other signal kinds keep working.

pub mod privacy;
pub mod sampling;

pub use privacy::{MaskPolicy, MASK_SENTINEL};
pub use sampling::Throttle;

use crate::config::{PrivacyConfig, SamplingConfig};
use crate::error::{Error, Result};
use crate::host::PageSignal;
use crate::types::{EventRecord, EventType};
use serde_json::json;

/// Capture counters reported through engine metrics.
#[derive(Debug, Clone, Copy, Default)]
pub struct CaptureStats {
    /// Records accepted into the queue
    pub captured: u64,
    /// Continuous signals discarded by sampling
    pub sampled_out: u64,
}

/// Converts page signals into event records.
pub struct CaptureLayer {
    pointer_throttle: Throttle,
    scroll_throttle: Throttle,
    mask_policy: MaskPolicy,
    /// Monotonic guard: capture time never decreases within a session.
    last_timestamp_ms: u64,
    /// Last observed scroll offset, spliced onto the exit batch.
    last_scroll: Option<(i32, i32)>,
    stats: CaptureStats,
}

impl CaptureLayer {
    pub fn new(sampling: &SamplingConfig, privacy: &PrivacyConfig) -> Self {
        Self {
            pointer_throttle: Throttle::new(sampling.pointer_move_ms),
            scroll_throttle: Throttle::new(sampling.scroll_ms),
            mask_policy: MaskPolicy::new(&privacy.mask_selectors),
            last_timestamp_ms: 0,
            last_scroll: None,
            stats: CaptureStats::default(),
        }
    }

    /// Convert one signal into a record.
    ///
    /// Returns `Ok(None)` when sampling discards the signal or the signal
    /// kind is not handled here (navigation and exit signals are routed by
    /// the engine, not the capture layer).
    pub fn convert(&mut self, signal: &PageSignal) -> Result<Option<EventRecord>> {
        let record = match signal {
            PageSignal::PointerMove { x, y, timestamp_ms } => {
                if !self.pointer_throttle.allow(*timestamp_ms) {
                    self.stats.sampled_out += 1;
                    return Ok(None);
                }
                self.record(EventType::PointerMove, *timestamp_ms, json!({"x": x, "y": y}))
            }
            PageSignal::PointerClick {
                x,
                y,
                target,
                timestamp_ms,
            } => self.record(
                EventType::PointerClick,
                *timestamp_ms,
                json!({"x": x, "y": y, "target": target}),
            ),
            PageSignal::Scroll { x, y, timestamp_ms } => {
                self.last_scroll = Some((*x, *y));
                if !self.scroll_throttle.allow(*timestamp_ms) {
                    self.stats.sampled_out += 1;
                    return Ok(None);
                }
                self.record(EventType::Scroll, *timestamp_ms, json!({"x": x, "y": y}))
            }
            PageSignal::KeyInput {
                field,
                value,
                timestamp_ms,
            } => {
                let value = self.mask_policy.apply(field, value);
                self.record(
                    EventType::KeyInput,
                    *timestamp_ms,
                    json!({
                        "field": field.selector,
                        "name": field.name,
                        "value": value,
                    }),
                )
            }
            PageSignal::FormInput {
                field,
                value,
                timestamp_ms,
            } => {
                let value = self.mask_policy.apply(field, value);
                self.record(
                    EventType::FormInput,
                    *timestamp_ms,
                    json!({
                        "field": field.selector,
                        "name": field.name,
                        "value": value,
                    }),
                )
            }
            PageSignal::FormSubmit {
                form_selector,
                timestamp_ms,
            } => self.record(
                EventType::FormSubmit,
                *timestamp_ms,
                json!({"form": form_selector}),
            ),
            PageSignal::MutationBatch {
                mutations,
                timestamp_ms,
            } => {
                // All changes from one notification tick become a single
                // record with an ordered descriptor list.
                let descriptors = serde_json::to_value(mutations)?;
                self.record(
                    EventType::MutationBatch,
                    *timestamp_ms,
                    json!({"count": mutations.len(), "mutations": descriptors}),
                )
            }
            PageSignal::Visibility {
                visible,
                timestamp_ms,
            } => self.record(
                EventType::VisibilityChange,
                *timestamp_ms,
                json!({"visible": visible}),
            ),
            PageSignal::PerformanceMark {
                name,
                duration_ms,
                timestamp_ms,
            } => self.record(
                EventType::PerformanceMark,
                *timestamp_ms,
                json!({"name": name, "duration_ms": duration_ms}),
            ),
            PageSignal::Navigation(_) | PageSignal::PageHide { .. } | PageSignal::PageExit { .. } => {
                return Err(Error::Capture {
                    signal: signal.kind().to_string(),
                    message: "signal is routed by the engine, not the capture layer".to_string(),
                });
            }
        };

        Ok(Some(record))
    }

    /// Build a record, clamping its timestamp to the monotonic floor.
    pub fn record(
        &mut self,
        event_type: EventType,
        timestamp_ms: u64,
        payload: serde_json::Value,
    ) -> EventRecord {
        let ts = timestamp_ms.max(self.last_timestamp_ms);
        self.last_timestamp_ms = ts;
        self.stats.captured += 1;
        EventRecord::new(event_type, ts, payload)
    }

    /// Final scroll position record for the exit path, if any scrolling
    /// happened this session.
    pub fn final_scroll_record(&mut self, timestamp_ms: u64) -> Option<EventRecord> {
        let (x, y) = self.last_scroll?;
        Some(self.record(EventType::Scroll, timestamp_ms, json!({"x": x, "y": y, "final": true})))
    }

    /// Reset per-page throttles after a navigation.
    pub fn on_navigation(&mut self) {
        self.pointer_throttle.reset();
        self.scroll_throttle.reset();
    }

    pub fn stats(&self) -> CaptureStats {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{FormField, MutationDescriptor, MutationKind};

    fn layer() -> CaptureLayer {
        CaptureLayer::new(&SamplingConfig::default(), &PrivacyConfig::default())
    }

    fn password_field() -> FormField {
        FormField {
            name: "password".to_string(),
            input_type: "password".to_string(),
            selector: "#pw".to_string(),
        }
    }

    #[test]
    fn test_click_captured_unconditionally() {
        let mut layer = layer();
        for i in 0..5 {
            let signal = PageSignal::PointerClick {
                x: 1,
                y: 2,
                target: "button#buy".to_string(),
                timestamp_ms: 1000 + i,
            };
            assert!(layer.convert(&signal).unwrap().is_some());
        }
        assert_eq!(layer.stats().captured, 5);
    }

    #[test]
    fn test_pointer_move_sampled() {
        let mut layer = layer();
        let mut captured = 0;
        for i in 0..10 {
            let signal = PageSignal::PointerMove {
                x: i,
                y: 0,
                timestamp_ms: 1000 + i as u64 * 10,
            };
            if layer.convert(&signal).unwrap().is_some() {
                captured += 1;
            }
        }
        // 90 ms span at 50 ms interval: first sample plus one more.
        assert_eq!(captured, 2);
        assert_eq!(layer.stats().sampled_out, 8);
    }

    #[test]
    fn test_sensitive_value_masked_before_record_exists() {
        let mut layer = layer();
        let signal = PageSignal::KeyInput {
            field: password_field(),
            value: "hunter2".to_string(),
            timestamp_ms: 1,
        };
        let record = layer.convert(&signal).unwrap().unwrap();
        assert_eq!(record.payload["value"], MASK_SENTINEL);
        assert!(!record.payload.to_string().contains("hunter2"));
    }

    #[test]
    fn test_mutations_coalesced_into_one_record() {
        let mut layer = layer();
        let mutations = vec![
            MutationDescriptor {
                kind: MutationKind::ChildListAdd,
                target: "#root".to_string(),
                detail: serde_json::json!({"added": 1}),
            },
            MutationDescriptor {
                kind: MutationKind::Attribute,
                target: "#root".to_string(),
                detail: serde_json::json!({"attribute": "class"}),
            },
        ];
        let signal = PageSignal::MutationBatch {
            mutations,
            timestamp_ms: 10,
        };
        let record = layer.convert(&signal).unwrap().unwrap();
        assert_eq!(record.event_type, EventType::MutationBatch);
        assert_eq!(record.payload["count"], 2);
        assert_eq!(record.payload["mutations"][0]["kind"], "child_list_add");
        assert_eq!(record.payload["mutations"][1]["kind"], "attribute");
    }

    #[test]
    fn test_timestamps_monotonic() {
        let mut layer = layer();
        let first = layer
            .convert(&PageSignal::PointerClick {
                x: 0,
                y: 0,
                target: "a".to_string(),
                timestamp_ms: 2000,
            })
            .unwrap()
            .unwrap();
        // Host clock stepped backwards; capture time must not.
        let second = layer
            .convert(&PageSignal::PointerClick {
                x: 0,
                y: 0,
                target: "a".to_string(),
                timestamp_ms: 1500,
            })
            .unwrap()
            .unwrap();
        assert_eq!(first.timestamp_ms, 2000);
        assert_eq!(second.timestamp_ms, 2000);
    }

    #[test]
    fn test_final_scroll_record() {
        let mut layer = layer();
        assert!(layer.final_scroll_record(1).is_none());

        layer
            .convert(&PageSignal::Scroll {
                x: 0,
                y: 480,
                timestamp_ms: 100,
            })
            .unwrap();
        let record = layer.final_scroll_record(200).unwrap();
        assert_eq!(record.payload["y"], 480);
        assert_eq!(record.payload["final"], true);
    }

    #[test]
    fn test_engine_routed_signals_rejected() {
        let mut layer = layer();
        let err = layer
            .convert(&PageSignal::PageExit { timestamp_ms: 1 })
            .unwrap_err();
        assert!(matches!(err, Error::Capture { .. }));
    }
}

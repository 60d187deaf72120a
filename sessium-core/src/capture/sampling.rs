//! Rate limiting for high-frequency continuous signals
//!
//! Pointer movement and scroll fire far faster than they are worth
//! recording; each gets an independent [`Throttle`] enforcing a minimum
//! inter-sample interval based on the signal's own dispatch timestamp.

/// Minimum-interval throttle keyed on signal timestamps.
#[derive(Debug)]
pub struct Throttle {
    min_interval_ms: u64,
    last_ms: Option<u64>,
}

impl Throttle {
    pub fn new(min_interval_ms: u64) -> Self {
        Self {
            min_interval_ms,
            last_ms: None,
        }
    }

    /// Whether a signal at `timestamp_ms` should be captured.
    ///
    /// The first signal is always captured. Timestamps older than the last
    /// accepted one (host clock hiccups) are treated as too soon.
    pub fn allow(&mut self, timestamp_ms: u64) -> bool {
        match self.last_ms {
            None => {
                self.last_ms = Some(timestamp_ms);
                true
            }
            Some(last) => {
                if timestamp_ms >= last.saturating_add(self.min_interval_ms) {
                    self.last_ms = Some(timestamp_ms);
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Forget the last sample (new page within a session).
    pub fn reset(&mut self) {
        self.last_ms = None;
    }
}

//! Recording lifecycle state machine
//!
//! Capture runs only while the machine is `Recording`. Visibility changes
//! move it between `Recording` and `Paused`; `stop` is terminal and any
//! transition attempted afterwards is rejected. The machine also tracks
//! accumulated active time, excluding paused spans, for session duration
//! reporting.

pub mod navigation;

pub use navigation::NavigationTracker;

use crate::error::{Error, Result};

/// Lifecycle states of the recording machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// Created but never started.
    Idle,
    /// Actively capturing.
    Recording,
    /// Page hidden; capture suspended.
    Paused,
    /// Terminal. No transition leaves this state.
    Stopped,
}

impl LifecycleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleState::Idle => "idle",
            LifecycleState::Recording => "recording",
            LifecycleState::Paused => "paused",
            LifecycleState::Stopped => "stopped",
        }
    }
}

/// State machine driving the recording lifecycle.
#[derive(Debug)]
pub struct StateMachine {
    state: LifecycleState,
    /// Timestamp of the last entry into `Recording`, if currently recording.
    recording_since_ms: Option<u64>,
    /// Active time accumulated across completed recording spans.
    active_ms: u64,
}

impl StateMachine {
    pub fn new() -> Self {
        Self {
            state: LifecycleState::Idle,
            recording_since_ms: None,
            active_ms: 0,
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// Whether signals should be captured right now.
    pub fn can_capture(&self) -> bool {
        self.state == LifecycleState::Recording
    }

    pub fn is_stopped(&self) -> bool {
        self.state == LifecycleState::Stopped
    }

    /// Idle -> Recording.
    pub fn start(&mut self, now_ms: u64) -> Result<()> {
        match self.state {
            LifecycleState::Idle => {
                self.state = LifecycleState::Recording;
                self.recording_since_ms = Some(now_ms);
                tracing::debug!("Lifecycle: idle -> recording");
                Ok(())
            }
            other => Err(Error::Lifecycle(format!(
                "cannot start from {}",
                other.as_str()
            ))),
        }
    }

    /// Recording -> Paused. Pausing while already paused is a no-op.
    pub fn pause(&mut self, now_ms: u64) -> Result<()> {
        match self.state {
            LifecycleState::Recording => {
                self.accumulate(now_ms);
                self.state = LifecycleState::Paused;
                tracing::debug!("Lifecycle: recording -> paused");
                Ok(())
            }
            LifecycleState::Paused => Ok(()),
            other => Err(Error::Lifecycle(format!(
                "cannot pause from {}",
                other.as_str()
            ))),
        }
    }

    /// Paused -> Recording. Resuming while already recording is a no-op.
    pub fn resume(&mut self, now_ms: u64) -> Result<()> {
        match self.state {
            LifecycleState::Paused => {
                self.state = LifecycleState::Recording;
                self.recording_since_ms = Some(now_ms);
                tracing::debug!("Lifecycle: paused -> recording");
                Ok(())
            }
            LifecycleState::Recording => Ok(()),
            other => Err(Error::Lifecycle(format!(
                "cannot resume from {}",
                other.as_str()
            ))),
        }
    }

    /// Any state -> Stopped. Idempotent.
    pub fn stop(&mut self, now_ms: u64) {
        if self.state == LifecycleState::Stopped {
            return;
        }
        self.accumulate(now_ms);
        tracing::debug!(from = self.state.as_str(), "Lifecycle: -> stopped");
        self.state = LifecycleState::Stopped;
    }

    /// Active recording time so far, excluding paused spans.
    pub fn active_duration_ms(&self, now_ms: u64) -> u64 {
        let running = self
            .recording_since_ms
            .filter(|_| self.state == LifecycleState::Recording)
            .map(|since| now_ms.saturating_sub(since))
            .unwrap_or(0);
        self.active_ms + running
    }

    fn accumulate(&mut self, now_ms: u64) {
        if let Some(since) = self.recording_since_ms.take() {
            self.active_ms += now_ms.saturating_sub(since);
        }
    }
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

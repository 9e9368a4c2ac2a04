//! Channel readiness state machine.

use serde::{Deserialize, Serialize};

/// Readiness of the detector channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadinessState {
    /// No start attempt has been made yet.
    #[default]
    Uninitialized,
    /// The detector binary is being spawned.
    StartingProcess,
    /// Spawned; waiting for the detector to announce its serving loop.
    AwaitingProcessSignal,
    /// Serving loop reached; pipes are being opened (retried on failure).
    OpeningPipes,
    /// Both pipes open; commands are delivered immediately.
    Ready,
    /// The channel is down; the next public call restarts it.
    Faulted,
}

impl ReadinessState {
    /// Whether commands can be delivered right now.
    #[must_use]
    pub fn is_ready(self) -> bool {
        matches!(self, Self::Ready)
    }

    /// Whether a start sequence is already in flight.
    #[must_use]
    pub fn is_initializing(self) -> bool {
        matches!(
            self,
            Self::StartingProcess | Self::AwaitingProcessSignal | Self::OpeningPipes
        )
    }
}

/// State machine tracking channel readiness.
#[derive(Debug, Clone, Default)]
pub struct ChannelStateMachine {
    state: ReadinessState,
    restarts: usize,
    faults: usize,
}

impl ChannelStateMachine {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn state(&self) -> ReadinessState {
        self.state
    }

    pub fn transition(&mut self, new_state: ReadinessState) {
        if self.state != new_state {
            tracing::debug!(from = ?self.state, to = ?new_state, "Channel state transition");
        }
        if new_state == ReadinessState::StartingProcess {
            self.restarts = self.restarts.saturating_add(1);
        }
        if new_state == ReadinessState::Faulted {
            self.faults = self.faults.saturating_add(1);
        }
        self.state = new_state;
    }

    #[must_use]
    pub fn stats(&self) -> ChannelStats {
        ChannelStats {
            restarts: self.restarts,
            faults: self.faults,
        }
    }
}

/// Channel lifetime statistics.
#[derive(Debug, Clone, Copy)]
pub struct ChannelStats {
    /// Start sequences entered, the first launch included.
    pub restarts: usize,
    /// Times the channel went down.
    pub faults: usize,
}

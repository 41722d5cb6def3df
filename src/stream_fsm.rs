/// Stream Lifecycle FSM — Formal State Machine for Stream Sets
///
/// Every stream passes through a deterministic set of states.
/// Transitions are guarded: illegal transitions are logged and rejected.
///
/// State Diagram:
/// ```text
///   Unconfigured → Staging → Active ⇄ Paused
///                     ↓         ↓        ↓
///                   Halted ← ──┴────────┘
///                     ↓
///                  Staging (self-heal after a fixing edit)
///
///   Any non-terminal state → Cancelled
///   Terminal state: Cancelled
/// ```
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use tracing::{error, info};

/// Formal stream lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StreamState {
    /// Created with no price source yet
    Unconfigured,
    /// Price source and levels provided, never launched (or re-staged)
    Staging,
    /// At least one side launched and quoting
    Active,
    /// Runtime stop, snapshot retained
    Paused,
    /// Launch validation failed, reason retained
    Halted,
    /// Deleted/disabled — terminal
    Cancelled,
}

impl StreamState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Returns the set of states reachable from this state.
    pub fn valid_transitions(&self) -> &'static [StreamState] {
        use StreamState::*;
        match self {
            Unconfigured => &[Staging, Cancelled],
            Staging => &[Active, Halted, Cancelled],
            // Active → Active covers relaunch of an already-live stream
            Active => &[Active, Paused, Halted, Cancelled],
            Paused => &[Active, Halted, Cancelled],
            // Halted → Staging is the self-heal path; → Paused via revert.
            // A failed relaunch of an already-halted stream stays halted.
            Halted => &[Active, Staging, Paused, Halted, Cancelled],
            Cancelled => &[],
        }
    }

    pub fn can_transition_to(&self, next: &StreamState) -> bool {
        self.valid_transitions().contains(next)
    }
}

impl fmt::Display for StreamState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[derive(Debug, Error)]
pub enum StateError {
    #[error("Invalid transition from {0} to {1}")]
    InvalidTransition(StreamState, StreamState),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FsmTransition {
    pub from: StreamState,
    pub to: StreamState,
    pub timestamp_ms: i64,
    pub reason: Option<String>,
}

/// Tracks the lifecycle of one stream with transition enforcement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamFsm {
    pub stream_id: String,
    pub state: StreamState,
    pub transitions: Vec<FsmTransition>,
}

impl StreamFsm {
    pub fn new(stream_id: String) -> Self {
        Self {
            stream_id,
            state: StreamState::Unconfigured,
            transitions: Vec::new(),
        }
    }

    /// Resume tracking a stream loaded from persistence.
    pub fn resume(stream_id: String, state: StreamState) -> Self {
        Self {
            stream_id,
            state,
            transitions: Vec::new(),
        }
    }

    /// Attempt a state transition. Returns Err with the illegal pair if not allowed.
    pub fn transition(
        &mut self,
        next: StreamState,
        timestamp_ms: i64,
        reason: Option<String>,
    ) -> Result<(), StateError> {
        if !self.state.can_transition_to(&next) {
            error!(
                stream_id = %self.stream_id,
                from = %self.state,
                to = %next,
                reason = ?reason,
                "Illegal stream transition"
            );
            return Err(StateError::InvalidTransition(self.state, next));
        }

        info!(
            stream_id = %self.stream_id,
            from = %self.state,
            to = %next,
            "Stream transition"
        );

        self.transitions.push(FsmTransition {
            from: self.state,
            to: next,
            timestamp_ms,
            reason,
        });
        self.state = next;
        Ok(())
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}

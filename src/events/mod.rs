//! Ordered session event streaming.
//!
//! The runtime pushes every observable state change onto a per-session
//! broadcast channel: `SessionStarted`, `PhaseEntered`, `TurnCompleted`,
//! `RoundClosed`, `RotationApplied`, `SessionEnded`. Events carry a
//! per-session monotone sequence number so subscribers can be idempotent
//! on `(session_id, seq)`. Delivery is at-least-once within process
//! lifetime; a subscriber that falls behind by more than the channel
//! capacity receives `Lagged` and misses older events.
//!
//! # Example
//!
//! ```rust,ignore
//! let mut rx = engine.subscribe(session_id);
//! while let Ok(event) = rx.recv().await {
//!     println!("[{}] {:?}", event.seq, event.kind);
//! }
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::analysis::rounds::RoundDecision;
use crate::session::{Phase, RotationEvent, SessionId, SessionStatus, Turn};

/// Channel capacity for session events.
///
/// Sized for bursts; a subscriber lagging by more than this many events
/// starts losing the oldest ones.
const CHANNEL_CAPACITY: usize = 256;

/// An ordered session event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionEvent {
    /// Session the event belongs to.
    pub session_id: SessionId,
    /// Per-session monotone sequence number, starting at 0.
    pub seq: u64,
    /// Emission timestamp.
    pub timestamp: chrono::DateTime<chrono::Utc>,
    /// Payload.
    pub kind: SessionEventKind,
}

/// Event payload variants.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionEventKind {
    /// The session task started driving turns.
    SessionStarted {
        /// Debate topic.
        topic: String,
        /// Number of debaters.
        debaters: u8,
    },

    /// A new phase was entered.
    PhaseEntered {
        /// The phase.
        phase: Phase,
    },

    /// A turn was appended to the transcript.
    TurnCompleted {
        /// The full turn record.
        turn: Box<Turn>,
    },

    /// A round closed with a round-manager decision.
    RoundClosed {
        /// Global round index.
        round_index: u32,
        /// The decision taken.
        decision: RoundDecision,
    },

    /// A role moved to a different model.
    RotationApplied {
        /// The recorded change.
        rotation: RotationEvent,
    },

    /// The session reached a terminal state.
    SessionEnded {
        /// Terminal status.
        status: SessionStatus,
        /// Failure reason, when `status == Failed`.
        reason: Option<String>,
    },
}

/// Per-session pub/sub bus.
///
/// # Thread Safety
///
/// The channel registry sits behind `parking_lot::RwLock`; the channels
/// themselves are `tokio::sync::broadcast` and lock-free. Events are
/// broadcast outside any runtime critical section.
#[derive(Debug, Clone, Default)]
pub struct EventBus {
    channels: Arc<RwLock<HashMap<SessionId, broadcast::Sender<SessionEvent>>>>,
}

impl EventBus {
    /// Create an empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to a session's future events.
    pub fn subscribe(&self, session_id: SessionId) -> broadcast::Receiver<SessionEvent> {
        let mut channels = self.channels.write();
        channels
            .entry(session_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Broadcast an event to a session's subscribers.
    ///
    /// Returns the number of receivers the event was delivered to.
    pub fn broadcast(&self, event: SessionEvent) -> usize {
        let session_id = event.session_id;
        {
            let channels = self.channels.read();
            if let Some(sender) = channels.get(&session_id) {
                let receivers = sender.receiver_count();
                let _ = sender.send(event);
                return receivers;
            }
        }
        // No channel yet: create one so later subscribers can connect.
        let mut channels = self.channels.write();
        let sender = channels
            .entry(session_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        let receivers = sender.receiver_count();
        let _ = sender.send(event);
        receivers
    }

    /// Drop a finished session's channel. Subscribers see `Closed`.
    pub fn cleanup(&self, session_id: SessionId) {
        self.channels.write().remove(&session_id);
    }

    /// Number of live channels.
    #[must_use]
    pub fn active_channels(&self) -> usize {
        self.channels.read().len()
    }
}

/// Reduced session state reconstructed from an event prefix.
///
/// Replaying the full event stream onto [`ReplayedSession::default`]
/// reproduces the session's observable state at each prefix: status,
/// phase, transcript, and rotation history.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReplayedSession {
    /// Last observed status.
    pub status: Option<SessionStatus>,
    /// Last observed phase.
    pub phase: Option<Phase>,
    /// Transcript reconstructed from `TurnCompleted` events.
    pub turns: Vec<Turn>,
    /// Rotations reconstructed from `RotationApplied` events.
    pub rotations: Vec<RotationEvent>,
    /// Rounds closed so far.
    pub rounds_closed: u32,
    /// Highest sequence number applied.
    pub last_seq: Option<u64>,
}

impl ReplayedSession {
    /// Apply one event. Events already applied (by sequence number) are
    /// ignored, making the replay idempotent.
    pub fn apply(&mut self, event: &SessionEvent) {
        if self.last_seq.is_some_and(|seq| event.seq <= seq) {
            return;
        }
        self.last_seq = Some(event.seq);

        match &event.kind {
            SessionEventKind::SessionStarted { .. } => {
                self.status = Some(SessionStatus::Running);
            }
            SessionEventKind::PhaseEntered { phase } => {
                self.phase = Some(*phase);
            }
            SessionEventKind::TurnCompleted { turn } => {
                self.turns.push((**turn).clone());
            }
            SessionEventKind::RoundClosed { .. } => {
                self.rounds_closed += 1;
            }
            SessionEventKind::RotationApplied { rotation } => {
                self.rotations.push(rotation.clone());
            }
            SessionEventKind::SessionEnded { status, .. } => {
                self.status = Some(*status);
            }
        }
    }

    /// Replay a slice of events in order.
    #[must_use]
    pub fn from_events(events: &[SessionEvent]) -> Self {
        let mut replayed = Self::default();
        for event in events {
            replayed.apply(event);
        }
        replayed
    }
}

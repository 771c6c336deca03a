//! Debate session data model.
//!
//! A [`Session`] owns its [`Round`]s and rounds own their [`Turn`]s. The
//! orchestrator is the single writer of a session; everything here is
//! plain data plus the invariant checks that guard it: the phase graph,
//! the turn-order predicate, and the terminal-state append rejection.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::analysis::argument::ArgumentRecord;
use crate::analysis::rounds::{ContextSnapshot, RoundDecision};
use crate::error::SessionFailure;
use crate::llm::ModelId;
use crate::pool::RotationStrategy;

/// Unique session identifier.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Generate a fresh identifier.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Participant identity. A closed tagged set: debater indices plus the
/// single judge. Declared order is debater index order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// A debater, identified by declaration index (0-based).
    Debater(u8),
    /// The judge. Exactly one per session.
    Judge,
}

impl Role {
    /// Whether this role is a debater.
    #[must_use]
    pub const fn is_debater(self) -> bool {
        matches!(self, Self::Debater(_))
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Debater(i) => {
                // debater_a, debater_b, ... debater_10 past the alphabet.
                if *i < 26 {
                    write!(f, "debater_{}", char::from(b'a' + i))
                } else {
                    write!(f, "debater_{i}")
                }
            }
            Self::Judge => f.write_str("judge"),
        }
    }
}

/// Debate phase. Sessions advance strictly forward through this graph;
/// `Failed` and `Cancelled` are side-arcs from any non-terminal phase.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Session created, nothing spoken yet.
    Initialization,
    /// Each debater states a position once.
    Opening,
    /// First full exchange.
    FirstRound,
    /// Subsequent exchanges.
    Rebuttal,
    /// Question/answer pairs.
    CrossExamination,
    /// Each debater summarises once.
    Closing,
    /// The judge speaks; analytics run.
    Judgment,
    /// Terminal: ran to completion.
    Completed,
    /// Terminal: failed with a structured reason.
    Failed,
    /// Terminal: cancelled by request.
    Cancelled,
}

impl Phase {
    /// Forward position in the phase graph, for reachability checks.
    const fn order(self) -> u8 {
        match self {
            Self::Initialization => 0,
            Self::Opening => 1,
            Self::FirstRound => 2,
            Self::Rebuttal => 3,
            Self::CrossExamination => 4,
            Self::Closing => 5,
            Self::Judgment => 6,
            Self::Completed => 7,
            Self::Failed | Self::Cancelled => 8,
        }
    }

    /// Whether this phase is terminal.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Whether `to` is reachable from `self` in the phase graph.
    ///
    /// Forward moves (including skips, e.g. straight to `Judgment` on
    /// early termination) are reachable; terminal phases reach only
    /// themselves; `Failed`/`Cancelled` are reachable from any
    /// non-terminal phase.
    #[must_use]
    pub fn reaches(self, to: Self) -> bool {
        if self == to {
            return true;
        }
        if self.is_terminal() {
            return false;
        }
        match to {
            Self::Failed | Self::Cancelled => true,
            _ => to.order() > self.order(),
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Initialization => "initialization",
            Self::Opening => "opening",
            Self::FirstRound => "first_round",
            Self::Rebuttal => "rebuttal",
            Self::CrossExamination => "cross_examination",
            Self::Closing => "closing",
            Self::Judgment => "judgment",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Session lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Created, not started.
    Pending,
    /// The session task is driving turns.
    Running,
    /// Suspended between turns.
    Paused,
    /// Terminal: ran to completion.
    Completed,
    /// Terminal: failed.
    Failed,
    /// Terminal: cancelled.
    Cancelled,
}

impl SessionStatus {
    /// Whether no further turn may ever be appended.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// A single utterance. Immutable once appended.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    /// Global 0-based index within the session.
    pub index: usize,
    /// Speaker role.
    pub role: Role,
    /// Model bound to the role at speaking time.
    pub model: ModelId,
    /// Phase in which the turn was produced.
    pub phase: Phase,
    /// Utterance text.
    pub content: String,
    /// Wall-clock timestamp of the append.
    pub timestamp: DateTime<Utc>,
    /// Model-call latency in milliseconds.
    pub latency_ms: u64,
    /// Total tokens for the call.
    pub tokens: u32,
    /// Quality scores from the argument analyzer.
    pub analysis: ArgumentRecord,
}

/// An ordered group of turns within one phase, plus its post-round
/// quality snapshot and any adjustment decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Round {
    /// Global round index, starting at 1.
    pub index: u32,
    /// Phase this round belongs to.
    pub phase: Phase,
    /// Owned turns, in speaking order.
    pub turns: Vec<Turn>,
    /// Compressed per-round context, filled after the round closes.
    pub snapshot: Option<ContextSnapshot>,
    /// Round-manager decision, for debate rounds.
    pub decision: Option<RoundDecision>,
}

impl Round {
    /// Create an empty round.
    #[must_use]
    pub fn new(index: u32, phase: Phase) -> Self {
        Self {
            index,
            phase,
            turns: Vec::new(),
            snapshot: None,
            decision: None,
        }
    }

    /// Whether this round counts against the debate round bounds.
    #[must_use]
    pub const fn is_debate_round(&self) -> bool {
        matches!(self.phase, Phase::FirstRound | Phase::Rebuttal)
    }
}

/// Aggregated session statistics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionStats {
    /// Total tokens across all calls.
    pub total_tokens: u64,
    /// Rough cumulative cost estimate in USD.
    pub cost_estimate: f64,
    /// Model-call errors observed (including recovered ones).
    pub error_count: u32,
    /// Wall-clock duration in milliseconds, set at termination.
    pub duration_ms: Option<u64>,
}

/// A recorded model-assignment change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RotationEvent {
    /// Turn index the change took effect before.
    pub before_turn: usize,
    /// Affected role.
    pub role: Role,
    /// Previous model.
    pub old_model: ModelId,
    /// Replacement model.
    pub new_model: ModelId,
    /// Why the rotation happened.
    pub reason: String,
    /// Decision confidence in [0, 1].
    pub confidence: f64,
    /// Expected score improvement.
    pub expected_improvement: f64,
    /// True for the failure-path role swap, false for strategy rotation.
    pub emergency: bool,
    /// Timestamp of the change.
    pub timestamp: DateTime<Utc>,
}

/// The root debate entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Unique identifier.
    pub id: SessionId,
    /// Immutable debate topic.
    pub topic: String,
    /// Optional immutable reference data, opaque to the runtime.
    pub reference: Option<String>,
    /// Current role → model assignment.
    pub assignment: BTreeMap<Role, ModelId>,
    /// Lifecycle status.
    pub status: SessionStatus,
    /// Current phase.
    pub phase: Phase,
    /// Owned rounds, in order.
    pub rounds: Vec<Round>,
    /// Number of debaters (≥ 2).
    pub debaters: u8,
    /// Planned debate rounds; the round manager adjusts this between
    /// `min_rounds` and `max_rounds`.
    pub planned_rounds: u32,
    /// Session cap on debate rounds.
    pub max_rounds: u32,
    /// Active rotation strategy.
    pub rotation_strategy: RotationStrategy,
    /// Aggregated statistics.
    pub stats: SessionStats,
    /// Structured failure reason, when `status == Failed`.
    pub failure: Option<SessionFailure>,
    /// Assignment changes, in order.
    pub rotation_events: Vec<RotationEvent>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Start timestamp.
    pub started_at: Option<DateTime<Utc>>,
    /// Termination timestamp.
    pub completed_at: Option<DateTime<Utc>>,
}

impl Session {
    /// Create a pending session.
    #[must_use]
    pub fn new(
        topic: String,
        reference: Option<String>,
        debaters: u8,
        assignment: BTreeMap<Role, ModelId>,
        planned_rounds: u32,
        max_rounds: u32,
        rotation_strategy: RotationStrategy,
    ) -> Self {
        Self {
            id: SessionId::generate(),
            topic,
            reference,
            assignment,
            status: SessionStatus::Pending,
            phase: Phase::Initialization,
            rounds: Vec::new(),
            debaters,
            planned_rounds,
            max_rounds,
            rotation_strategy,
            stats: SessionStats::default(),
            failure: None,
            rotation_events: Vec::new(),
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    /// All roles in declared order: debaters by index, then the judge.
    #[must_use]
    pub fn roles(&self) -> Vec<Role> {
        let mut roles: Vec<Role> = (0..self.debaters).map(Role::Debater).collect();
        roles.push(Role::Judge);
        roles
    }

    /// Debater roles in declared order.
    #[must_use]
    pub fn debater_roles(&self) -> Vec<Role> {
        (0..self.debaters).map(Role::Debater).collect()
    }

    /// Next global turn index.
    #[must_use]
    pub fn next_turn_index(&self) -> usize {
        self.rounds.iter().map(|r| r.turns.len()).sum()
    }

    /// Count of closed or in-progress debate rounds.
    #[must_use]
    pub fn debate_round_count(&self) -> u32 {
        #[allow(clippy::cast_possible_truncation)]
        let count = self.rounds.iter().filter(|r| r.is_debate_round()).count() as u32;
        count
    }

    /// Advance to a new phase, enforcing the transition graph.
    ///
    /// # Errors
    ///
    /// Returns the offending pair when `to` is not reachable.
    pub fn advance_phase(&mut self, to: Phase) -> Result<(), (Phase, Phase)> {
        if self.phase == to {
            return Ok(());
        }
        if !self.phase.reaches(to) {
            return Err((self.phase, to));
        }
        tracing::debug!(session_id = %self.id, from = %self.phase, to = %to, "Phase transition");
        self.phase = to;
        Ok(())
    }

    /// Open a new round in the current phase.
    pub fn open_round(&mut self, phase: Phase) -> u32 {
        #[allow(clippy::cast_possible_truncation)]
        let index = self.rounds.len() as u32 + 1;
        self.rounds.push(Round::new(index, phase));
        index
    }

    /// Append a turn to the current round.
    ///
    /// Rejected without state change once the session is terminal, when no
    /// round is open, or when the index breaks monotonicity.
    pub fn append_turn(&mut self, turn: Turn) -> Result<(), String> {
        if self.status.is_terminal() {
            return Err(format!(
                "session {} is {}; turn append rejected",
                self.id, self.status
            ));
        }
        if turn.index != self.next_turn_index() {
            return Err(format!(
                "turn index {} breaks monotonicity (expected {})",
                turn.index,
                self.next_turn_index()
            ));
        }
        let Some(round) = self.rounds.last_mut() else {
            return Err("no open round".to_string());
        };
        if round.phase != turn.phase {
            return Err(format!(
                "turn phase {} does not match open round phase {}",
                turn.phase, round.phase
            ));
        }
        round.turns.push(turn);
        Ok(())
    }

    /// Ordered transcript from the given global index.
    #[must_use]
    pub fn transcript_from(&self, from: usize) -> Vec<Turn> {
        self.rounds
            .iter()
            .flat_map(|r| r.turns.iter())
            .filter(|t| t.index >= from)
            .cloned()
            .collect()
    }

    /// Full ordered transcript.
    #[must_use]
    pub fn transcript(&self) -> Vec<Turn> {
        self.transcript_from(0)
    }

    /// The judge's turn, if produced.
    #[must_use]
    pub fn judgment_turn(&self) -> Option<&Turn> {
        self.rounds
            .iter()
            .rev()
            .flat_map(|r| r.turns.iter().rev())
            .find(|t| t.role == Role::Judge)
    }

    /// Wall-clock duration so far, or final duration once terminated.
    #[must_use]
    pub fn duration_ms(&self) -> Option<u64> {
        let start = self.started_at?;
        let end = self.completed_at.unwrap_or_else(Utc::now);
        u64::try_from((end - start).num_milliseconds().max(0)).ok()
    }
}

/// Expected speaker sequence for one round of the given phase.
///
/// This predicate is the single source of truth for turn order:
///
/// - Opening / Closing: each debater once, declared order
/// - `FirstRound` / Rebuttal: debaters alternate starting with debater A
/// - Judgment: the judge, once
/// - Cross-examination order depends on scores; see
///   [`cross_examination_order`]
#[must_use]
pub fn expected_speakers(phase: Phase, debaters: u8) -> Vec<Role> {
    match phase {
        Phase::Opening | Phase::FirstRound | Phase::Rebuttal | Phase::Closing => {
            (0..debaters).map(Role::Debater).collect()
        }
        Phase::Judgment => vec![Role::Judge],
        _ => Vec::new(),
    }
}

/// Speaker sequence for a cross-examination round: `pairs` alternating
/// question/answer exchanges between the asker and the answerer.
#[must_use]
pub fn cross_examination_order(asker: Role, answerer: Role, pairs: u32) -> Vec<Role> {
    let mut order = Vec::with_capacity(pairs as usize * 2);
    for _ in 0..pairs {
        order.push(asker);
        order.push(answerer);
    }
    order
}

//! Per-turn and per-round quality evaluation.
//!
//! [`argument`] scores individual turns; [`rounds`] aggregates a round's
//! turns into a continue/extend/reduce/terminate decision; [`similarity`]
//! holds the shared lexical primitives.

pub mod argument;
pub mod rounds;
pub mod similarity;

pub use argument::{ArgumentAnalyzer, ArgumentRecord, EvidenceType, Fallacy, FallacySeverity};
pub use rounds::{AdaptiveRoundManager, ContextSnapshot, RoundAction, RoundDecision};

//! Error taxonomy for the debate runtime.
//!
//! Three layers of failure live here:
//!
//! - [`InvokeError`]: a single classified model-call failure ([`FailureKind`])
//! - [`GuardedError`]: what remains after retry/breaker/fallback policy
//! - [`ApiError`]: rejections at the engine boundary (never mutate state)
//! - [`SessionFailure`]: the structured reason a session transitioned to
//!   `failed`, preserved with the partial transcript

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::session::{Phase, SessionId};

/// Classified kind of a model-call failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Transient upstream hiccup (5xx, connection reset).
    Transient,
    /// Provider rate limiting (429).
    RateLimited,
    /// Authentication or authorization rejection.
    Auth,
    /// Request the provider will never accept.
    InvalidRequest,
    /// Provider-side spend budget exhausted.
    BudgetExhausted,
    /// Upstream reported unavailable, or breaker fail-fast.
    Unavailable,
    /// Deadline elapsed before a completion arrived.
    Timeout,
}

impl FailureKind {
    /// Whether the retry policy may attempt this kind again.
    #[must_use]
    pub const fn is_retryable(self) -> bool {
        matches!(
            self,
            Self::Transient | Self::RateLimited | Self::Unavailable | Self::Timeout
        )
    }

    /// Whether this kind fails the session outright, bypassing recovery.
    #[must_use]
    pub const fn is_fatal(self) -> bool {
        matches!(self, Self::Auth | Self::BudgetExhausted)
    }

    /// Breaker family this kind is accounted under, if any.
    ///
    /// Non-retryable kinds are not breaker-tracked: the breaker isolates
    /// flaky upstreams, while auth/invalid-request failures end the session
    /// before isolation matters.
    #[must_use]
    pub const fn breaker_family(self) -> Option<&'static str> {
        match self {
            Self::Transient | Self::Unavailable | Self::Timeout => Some("availability"),
            Self::RateLimited => Some("rate_limit"),
            Self::Auth | Self::InvalidRequest | Self::BudgetExhausted => None,
        }
    }

    /// Stable string form used in logs and failure reasons.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Transient => "transient",
            Self::RateLimited => "rate_limited",
            Self::Auth => "auth",
            Self::InvalidRequest => "invalid_request",
            Self::BudgetExhausted => "budget_exhausted",
            Self::Unavailable => "unavailable",
            Self::Timeout => "timeout",
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single classified model-call failure.
#[derive(Debug, Clone, Error)]
#[error("{kind} failure from model '{model}': {message}")]
pub struct InvokeError {
    /// Failure classification.
    pub kind: FailureKind,
    /// Model the call targeted.
    pub model: String,
    /// Provider-reported detail.
    pub message: String,
}

impl InvokeError {
    /// Build an error for the given model and kind.
    pub fn new(kind: FailureKind, model: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            model: model.into(),
            message: message.into(),
        }
    }
}

/// Outcome of a guarded call after retry, breaker, and fallback policy.
#[derive(Debug, Clone, Error)]
#[error("{kind} failure from model '{model}' after {attempts} attempt(s): {message}")]
pub struct GuardedError {
    /// Final failure classification.
    pub kind: FailureKind,
    /// Model of the last attempt.
    pub model: String,
    /// Total attempts made (primary and fallback).
    pub attempts: u32,
    /// Whether the session retry budget ran out during this call.
    pub retry_budget_exhausted: bool,
    /// Provider-reported detail of the last attempt.
    pub message: String,
}

impl GuardedError {
    /// Whether recovery (role-swap then retry) is still worth attempting.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        !self.kind.is_fatal() && !self.retry_budget_exhausted
    }
}

/// Rejections surfaced at the engine API boundary.
///
/// These never mutate session state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    /// No session with the given id.
    #[error("session {0} not found")]
    NotFound(SessionId),

    /// `start_session` called twice.
    #[error("session {0} already started")]
    AlreadyStarted(SessionId),

    /// Operation not valid in the session's current state.
    #[error("session {id} is {state}; {operation} rejected")]
    InvalidState {
        /// Target session.
        id: SessionId,
        /// Current status, stringified.
        state: String,
        /// Rejected operation name.
        operation: &'static str,
    },

    /// Session configuration failed validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Requested artifact is not available yet.
    #[error("analytics for session {0} not ready")]
    NotReady(SessionId),
}

/// Structured reason a session transitioned to `failed`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionFailure {
    /// Failure classification driving the transition.
    pub kind: FailureReason,
    /// Human-readable detail.
    pub detail: String,
    /// Phase the session had reached.
    pub phase: Phase,
    /// Debate round the session had reached (0 before the first).
    pub round: u32,
}

/// Classification of session-fatal conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// Provider rejected credentials.
    Auth,
    /// Provider-side spend budget exhausted.
    ProviderBudgetExhausted,
    /// The per-session retry budget ran out.
    RetryBudgetExhausted,
    /// Session wall-clock budget exhausted.
    SessionBudgetExhausted,
    /// Provider kept failing after the emergency role-swap.
    ProviderUnrecoverable,
    /// An internal invariant was violated.
    InvariantViolation,
}

impl FailureReason {
    /// Stable string form for failure messages and events.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Auth => "auth",
            Self::ProviderBudgetExhausted => "provider_budget_exhausted",
            Self::RetryBudgetExhausted => "retry_budget_exhausted",
            Self::SessionBudgetExhausted => "budget exhausted",
            Self::ProviderUnrecoverable => "provider_unrecoverable",
            Self::InvariantViolation => "invariant_violation",
        }
    }
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

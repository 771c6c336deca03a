//! Circuit breaker for isolating failing models.
//!
//! One breaker exists per `(model, failure-family)` pair, shared
//! process-wide across sessions. Tracks a rolling window of call
//! outcomes and transitions between Closed, Open, and HalfOpen states.
//!
//! # States
//!
//! - **Closed**: normal operation, calls pass through
//! - **Open**: fail fast for a cooldown period
//! - **HalfOpen**: exactly one probe call allowed through
//!
//! A full window with failure rate at or above the trip rate and at
//! least `min_failures` failures trips the breaker. A failed probe
//! re-opens it with the cooldown doubled, up to a ceiling.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};

use crate::config::BreakerConfig;
use crate::llm::ModelId;

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    /// Normal operation.
    Closed,
    /// Failing fast until the cooldown elapses.
    Open,
    /// One probe in flight.
    HalfOpen,
}

impl BreakerState {
    /// String form for logs.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

#[derive(Debug)]
struct BreakerInner {
    state: BreakerState,
    /// Rolling outcome window; `true` marks a failure.
    window: VecDeque<bool>,
    /// When the breaker opened.
    opened_at: Option<Instant>,
    /// Current cooldown; doubles on failed probes.
    cooldown: Duration,
    /// Whether the half-open probe slot is taken.
    probe_in_flight: bool,
}

/// Per-(model, family) circuit breaker.
///
/// # Thread Safety
///
/// State transitions are atomic: all decisions happen under one lock.
/// Clone-cheap; clones share state.
#[derive(Clone)]
pub struct CircuitBreaker {
    config: BreakerConfig,
    inner: Arc<Mutex<BreakerInner>>,
}

impl CircuitBreaker {
    /// Create a closed breaker with the given policy.
    #[must_use]
    pub fn new(config: BreakerConfig) -> Self {
        let cooldown = config.cooldown();
        Self {
            config,
            inner: Arc::new(Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                window: VecDeque::new(),
                opened_at: None,
                cooldown,
                probe_in_flight: false,
            })),
        }
    }

    /// Whether a call may proceed right now.
    ///
    /// In the open state this also performs the open → half-open
    /// transition once the cooldown has elapsed, claiming the single
    /// probe slot for the caller when it does.
    #[must_use]
    pub fn try_acquire(&self) -> bool {
        let mut inner = self.inner.lock();
        match inner.state {
            BreakerState::Closed => true,
            BreakerState::Open => {
                let elapsed = inner.opened_at.map_or(Duration::ZERO, |t| t.elapsed());
                if elapsed >= inner.cooldown {
                    tracing::info!(
                        cooldown_ms = inner.cooldown.as_millis() as u64,
                        "Circuit breaker half-open, admitting probe"
                    );
                    inner.state = BreakerState::HalfOpen;
                    inner.probe_in_flight = true;
                    true
                } else {
                    false
                }
            }
            BreakerState::HalfOpen => {
                if inner.probe_in_flight {
                    false
                } else {
                    inner.probe_in_flight = true;
                    true
                }
            }
        }
    }

    /// Record a successful call.
    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            BreakerState::Closed => {
                Self::push_outcome(&mut inner, self.config.window, false);
            }
            BreakerState::HalfOpen => {
                tracing::info!("Circuit breaker closing after successful probe");
                inner.state = BreakerState::Closed;
                inner.window.clear();
                inner.opened_at = None;
                inner.cooldown = self.config.cooldown();
                inner.probe_in_flight = false;
            }
            BreakerState::Open => {}
        }
    }

    /// Record a failed call.
    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            BreakerState::Closed => {
                Self::push_outcome(&mut inner, self.config.window, true);
                if self.should_trip(&inner) {
                    let failures = inner.window.iter().filter(|f| **f).count();
                    tracing::warn!(
                        window = inner.window.len(),
                        failures = failures,
                        cooldown_ms = inner.cooldown.as_millis() as u64,
                        "Circuit breaker tripping open"
                    );
                    inner.state = BreakerState::Open;
                    inner.opened_at = Some(Instant::now());
                }
            }
            BreakerState::HalfOpen => {
                let doubled = (inner.cooldown * 2).min(self.config.cooldown_max());
                tracing::warn!(
                    cooldown_ms = doubled.as_millis() as u64,
                    "Circuit breaker re-opening after failed probe"
                );
                inner.state = BreakerState::Open;
                inner.opened_at = Some(Instant::now());
                inner.cooldown = doubled;
                inner.probe_in_flight = false;
            }
            BreakerState::Open => {}
        }
    }

    /// Release a claimed half-open probe slot without recording an
    /// outcome. Used when a call was admitted by this breaker but
    /// refused by another gate before it ran.
    pub fn release_probe(&self) {
        let mut inner = self.inner.lock();
        if inner.state == BreakerState::HalfOpen {
            inner.probe_in_flight = false;
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> BreakerState {
        let mut inner = self.inner.lock();
        // Surface the pending open → half-open transition without
        // claiming the probe slot.
        if inner.state == BreakerState::Open {
            let elapsed = inner.opened_at.map_or(Duration::ZERO, |t| t.elapsed());
            if elapsed >= inner.cooldown {
                inner.state = BreakerState::HalfOpen;
            }
        }
        inner.state
    }

    /// Whether the breaker currently refuses calls.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state() == BreakerState::Open
    }

    /// Failures currently in the window.
    #[must_use]
    pub fn failure_count(&self) -> usize {
        self.inner.lock().window.iter().filter(|f| **f).count()
    }

    /// Observations currently in the window.
    #[must_use]
    pub fn observation_count(&self) -> usize {
        self.inner.lock().window.len()
    }

    fn push_outcome(inner: &mut BreakerInner, window: usize, failure: bool) {
        inner.window.push_back(failure);
        while inner.window.len() > window {
            inner.window.pop_front();
        }
    }

    fn should_trip(&self, inner: &BreakerInner) -> bool {
        if inner.window.len() < self.config.window {
            return false;
        }
        let failures = inner.window.iter().filter(|f| **f).count();
        if failures < self.config.min_failures {
            return false;
        }
        #[allow(clippy::cast_precision_loss)]
        let rate = failures as f64 / inner.window.len() as f64;
        rate >= self.config.trip_rate
    }
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("CircuitBreaker")
            .field("state", &inner.state.as_str())
            .field("observations", &inner.window.len())
            .field("cooldown", &inner.cooldown)
            .finish()
    }
}

/// Process-wide breaker table keyed by `(model, failure-family)`.
///
/// Shared across every session so one session's observations protect
/// the rest.
#[derive(Debug, Clone)]
pub struct BreakerRegistry {
    config: BreakerConfig,
    breakers: Arc<RwLock<HashMap<(ModelId, &'static str), CircuitBreaker>>>,
}

impl BreakerRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            breakers: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Get or create the breaker for a `(model, family)` pair.
    #[must_use]
    pub fn breaker(&self, model: &ModelId, family: &'static str) -> CircuitBreaker {
        {
            let breakers = self.breakers.read();
            if let Some(existing) = breakers.get(&(model.clone(), family)) {
                return existing.clone();
            }
        }
        let mut breakers = self.breakers.write();
        breakers
            .entry((model.clone(), family))
            .or_insert_with(|| CircuitBreaker::new(self.config.clone()))
            .clone()
    }

    /// Whether any family's breaker for the model is currently open.
    #[must_use]
    pub fn is_model_open(&self, model: &ModelId) -> bool {
        let breakers = self.breakers.read();
        breakers
            .iter()
            .any(|((id, _), breaker)| id == model && breaker.is_open())
    }

    /// Number of tracked breakers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.breakers.read().len()
    }

    /// Whether no breakers are tracked yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.breakers.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(window: usize, min_failures: usize, cooldown_secs: u64) -> BreakerConfig {
        BreakerConfig {
            window,
            trip_rate: 0.5,
            min_failures,
            cooldown_secs,
            cooldown_max_secs: 300,
        }
    }

    #[test]
    fn test_initial_state_closed() {
        let breaker = CircuitBreaker::new(config(4, 2, 30));
        assert_eq!(breaker.state(), BreakerState::Closed);
        assert!(breaker.try_acquire());
    }

    #[test]
    fn test_trips_only_on_full_window() {
        // Window 4, trip rate 0.5, min failures 2: exactly at the rate
        // with window-1 observations stays closed; at a full window it
        // trips.
        let breaker = CircuitBreaker::new(config(4, 2, 30));
        breaker.record_failure();
        breaker.record_success();
        breaker.record_failure();
        assert_eq!(breaker.observation_count(), 3);
        assert_eq!(breaker.state(), BreakerState::Closed);

        breaker.record_success();
        assert_eq!(breaker.state(), BreakerState::Closed); // rate 0.5 but just reached full

        breaker.record_failure();
        // Window now [success, failure, success, failure] → rate 0.5, 2 failures, full.
        assert_eq!(breaker.state(), BreakerState::Open);
        assert!(!breaker.try_acquire());
    }

    #[test]
    fn test_min_failures_guard() {
        // All failures but fewer than min_failures cannot trip.
        let breaker = CircuitBreaker::new(config(2, 5, 30));
        breaker.record_failure();
        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[test]
    fn test_half_open_single_probe() {
        let breaker = CircuitBreaker::new(config(2, 2, 0));
        breaker.record_failure();
        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Open);

        std::thread::sleep(Duration::from_millis(5));
        assert!(breaker.try_acquire()); // the probe
        assert!(!breaker.try_acquire()); // slot taken

        breaker.record_success();
        assert_eq!(breaker.state(), BreakerState::Closed);
        assert!(breaker.try_acquire());
    }

    #[test]
    fn test_failed_probe_doubles_cooldown() {
        let mut cfg = config(2, 2, 0);
        cfg.cooldown_secs = 1;
        let breaker = CircuitBreaker::new(cfg);
        breaker.record_failure();
        breaker.record_failure();

        // Force the transition without waiting a full second.
        {
            let mut inner = breaker.inner.lock();
            inner.state = BreakerState::HalfOpen;
            inner.probe_in_flight = true;
        }
        breaker.record_failure();

        let inner = breaker.inner.lock();
        assert_eq!(inner.state, BreakerState::Open);
        assert_eq!(inner.cooldown, Duration::from_secs(2));
    }

    #[test]
    fn test_cooldown_capped() {
        let cfg = BreakerConfig {
            window: 2,
            trip_rate: 0.5,
            min_failures: 2,
            cooldown_secs: 200,
            cooldown_max_secs: 300,
        };
        let breaker = CircuitBreaker::new(cfg);
        {
            let mut inner = breaker.inner.lock();
            inner.state = BreakerState::HalfOpen;
            inner.probe_in_flight = true;
        }
        breaker.record_failure();
        assert_eq!(breaker.inner.lock().cooldown, Duration::from_secs(300));
    }

    #[test]
    fn test_registry_shares_breakers() {
        let registry = BreakerRegistry::new(config(2, 2, 30));
        let model: ModelId = "model-m".into();

        let first = registry.breaker(&model, "availability");
        first.record_failure();
        first.record_failure();

        // Another handle to the same pair observes the open state.
        let second = registry.breaker(&model, "availability");
        assert_eq!(second.state(), BreakerState::Open);
        assert!(registry.is_model_open(&model));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_registry_families_are_independent() {
        let registry = BreakerRegistry::new(config(2, 2, 30));
        let model: ModelId = "model-m".into();

        let availability = registry.breaker(&model, "availability");
        availability.record_failure();
        availability.record_failure();
        assert_eq!(availability.state(), BreakerState::Open);

        let rate_limit = registry.breaker(&model, "rate_limit");
        assert_eq!(rate_limit.state(), BreakerState::Closed);
        assert_eq!(registry.len(), 2);
    }
}

//! Retry scheduling and the per-session retry budget.
//!
//! The delay schedule is exponential with full jitter: attempt `n`
//! sleeps a uniform random duration in `[0, min(cap, base · 2ⁿ)]`.
//! Retries across all turns of a session draw from one shared budget;
//! when it runs dry the next failure escalates to fatal without further
//! attempts.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rand::Rng;

use crate::config::RetryConfig;
use crate::session::SessionId;

/// Computes backoff delays from the configured schedule.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    /// Create a policy from configuration.
    #[must_use]
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Maximum attempts per logical call, first try included.
    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        self.config.max_attempts
    }

    /// Full-jitter delay before retry number `retry` (1-based).
    #[must_use]
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exp = retry.saturating_sub(1).min(16);
        let ceiling = self
            .config
            .base_delay()
            .saturating_mul(2u32.saturating_pow(exp))
            .min(self.config.cap_delay());
        if ceiling.is_zero() {
            return Duration::ZERO;
        }
        let micros = rand::thread_rng().gen_range(0..=ceiling.as_micros());
        Duration::from_micros(u64::try_from(micros).unwrap_or(u64::MAX))
    }

    /// Upper bound of the delay for retry number `retry` (1-based).
    #[must_use]
    pub fn delay_ceiling(&self, retry: u32) -> Duration {
        let exp = retry.saturating_sub(1).min(16);
        self.config
            .base_delay()
            .saturating_mul(2u32.saturating_pow(exp))
            .min(self.config.cap_delay())
    }
}

/// Process-wide ledger of per-session retry budgets.
///
/// Short critical sections only; the ledger is consulted once per retry
/// attempt.
#[derive(Debug, Clone)]
pub struct RetryLedger {
    budget: u32,
    spent: Arc<Mutex<HashMap<SessionId, u32>>>,
}

impl RetryLedger {
    /// Create a ledger granting each session the given budget.
    #[must_use]
    pub fn new(budget: u32) -> Self {
        Self {
            budget,
            spent: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Consume one retry from the session's budget.
    ///
    /// Returns `false` (without consuming) once the budget is exhausted.
    #[must_use]
    pub fn try_consume(&self, session: SessionId) -> bool {
        let mut spent = self.spent.lock();
        let used = spent.entry(session).or_insert(0);
        if *used >= self.budget {
            return false;
        }
        *used += 1;
        true
    }

    /// Remaining retries for the session.
    #[must_use]
    pub fn remaining(&self, session: SessionId) -> u32 {
        let spent = self.spent.lock();
        self.budget.saturating_sub(*spent.get(&session).unwrap_or(&0))
    }

    /// Drop a finished session's entry.
    pub fn forget(&self, session: SessionId) {
        self.spent.lock().remove(&session);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(base_ms: u64, cap_ms: u64, attempts: u32) -> RetryPolicy {
        RetryPolicy::new(RetryConfig {
            max_attempts: attempts,
            base_delay_ms: base_ms,
            cap_delay_ms: cap_ms,
        })
    }

    #[test]
    fn test_delay_ceiling_doubles_and_caps() {
        let policy = policy(500, 8_000, 4);
        assert_eq!(policy.delay_ceiling(1), Duration::from_millis(500));
        assert_eq!(policy.delay_ceiling(2), Duration::from_millis(1_000));
        assert_eq!(policy.delay_ceiling(3), Duration::from_millis(2_000));
        assert_eq!(policy.delay_ceiling(6), Duration::from_millis(8_000));
        assert_eq!(policy.delay_ceiling(20), Duration::from_millis(8_000));
    }

    #[test]
    fn test_full_jitter_stays_under_ceiling() {
        let policy = policy(100, 1_000, 4);
        for retry in 1..=5 {
            for _ in 0..50 {
                assert!(policy.delay_for(retry) <= policy.delay_ceiling(retry));
            }
        }
    }

    #[test]
    fn test_zero_base_yields_zero_delay() {
        let policy = policy(0, 0, 4);
        assert_eq!(policy.delay_for(1), Duration::ZERO);
    }

    #[test]
    fn test_ledger_consumes_down_to_zero() {
        let ledger = RetryLedger::new(2);
        let session = SessionId::generate();

        assert_eq!(ledger.remaining(session), 2);
        assert!(ledger.try_consume(session));
        assert!(ledger.try_consume(session));
        assert!(!ledger.try_consume(session));
        assert_eq!(ledger.remaining(session), 0);
    }

    #[test]
    fn test_ledger_budget_zero() {
        let ledger = RetryLedger::new(0);
        let session = SessionId::generate();
        assert!(!ledger.try_consume(session));
    }

    #[test]
    fn test_ledger_is_per_session() {
        let ledger = RetryLedger::new(1);
        let a = SessionId::generate();
        let b = SessionId::generate();

        assert!(ledger.try_consume(a));
        assert!(ledger.try_consume(b));
        assert!(!ledger.try_consume(a));
    }

    #[test]
    fn test_ledger_forget() {
        let ledger = RetryLedger::new(1);
        let session = SessionId::generate();
        assert!(ledger.try_consume(session));
        ledger.forget(session);
        assert_eq!(ledger.remaining(session), 1);
    }
}

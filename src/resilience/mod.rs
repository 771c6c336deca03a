//! Failure isolation around the model client.
//!
//! [`GuardedClient`] layers three decisions over a raw [`ModelClient`]:
//! the per-(model, family) circuit breaker, the bounded retry policy with
//! full-jitter backoff and the per-session retry budget, and the optional
//! fallback provider tried once before a failure propagates.

pub mod breaker;
pub mod retry;

pub use breaker::{BreakerRegistry, BreakerState, CircuitBreaker};
pub use retry::{RetryLedger, RetryPolicy};

use std::sync::Arc;
use std::time::Duration;

use crate::error::{FailureKind, GuardedError, InvokeError};
use crate::llm::{
    estimate_cost, CallRecord, Completion, ModelClient, ModelId, ObserverHandle, Prompt,
};
use crate::session::SessionId;

/// Breaker families a call is gated on.
const FAMILIES: [&str; 2] = ["availability", "rate_limit"];

/// Model client wrapped in retry, breaker, and fallback policy.
#[derive(Clone)]
pub struct GuardedClient {
    primary: Arc<dyn ModelClient>,
    /// Secondary provider for the same logical model identity.
    fallback: Option<Arc<dyn ModelClient>>,
    breakers: BreakerRegistry,
    policy: RetryPolicy,
    ledger: RetryLedger,
    observer: ObserverHandle,
}

impl std::fmt::Debug for GuardedClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GuardedClient")
            .field("has_fallback", &self.fallback.is_some())
            .field("policy", &self.policy)
            .finish()
    }
}

impl GuardedClient {
    /// Compose the guarded client.
    #[must_use]
    pub fn new(
        primary: Arc<dyn ModelClient>,
        fallback: Option<Arc<dyn ModelClient>>,
        breakers: BreakerRegistry,
        policy: RetryPolicy,
        ledger: RetryLedger,
        observer: ObserverHandle,
    ) -> Self {
        Self {
            primary,
            fallback,
            breakers,
            policy,
            ledger,
            observer,
        }
    }

    /// Shared breaker registry.
    #[must_use]
    pub fn breakers(&self) -> &BreakerRegistry {
        &self.breakers
    }

    /// Shared retry ledger.
    #[must_use]
    pub fn ledger(&self) -> &RetryLedger {
        &self.ledger
    }

    /// Invoke the model under full policy.
    ///
    /// Retries only retryable kinds, drawing on the session's retry
    /// budget; fails fast when a breaker for the model is open; tries the
    /// fallback provider once before propagating a non-fatal failure.
    pub async fn call(
        &self,
        session: SessionId,
        model: &ModelId,
        prompt: &Prompt,
        deadline: Duration,
    ) -> Result<Completion, GuardedError> {
        let mut attempts = 0u32;
        let mut last: Option<InvokeError> = None;

        'attempts: while attempts < self.policy.max_attempts() {
            // Breaker gate. Denied calls fail fast without consuming the
            // retry budget; the caller decides whether to swap roles.
            let mut acquired = Vec::new();
            for family in FAMILIES {
                let breaker = self.breakers.breaker(model, family);
                if breaker.try_acquire() {
                    acquired.push((family, breaker));
                } else {
                    for (_, claimed) in &acquired {
                        claimed.release_probe();
                    }
                    tracing::warn!(
                        session_id = %session,
                        model = %model,
                        family = family,
                        "Circuit breaker open, failing fast"
                    );
                    return Err(GuardedError {
                        kind: FailureKind::Unavailable,
                        model: model.clone(),
                        attempts,
                        retry_budget_exhausted: false,
                        message: format!("circuit breaker open ({family})"),
                    });
                }
            }

            attempts += 1;
            match self.invoke_once(&*self.primary, model, prompt, deadline).await {
                Ok(completion) => {
                    for (_, breaker) in &acquired {
                        breaker.record_success();
                    }
                    return Ok(completion);
                }
                Err(err) => {
                    self.record_outcome(&acquired, &err);

                    if !err.kind.is_retryable() {
                        return Err(GuardedError {
                            kind: err.kind,
                            model: model.clone(),
                            attempts,
                            retry_budget_exhausted: false,
                            message: err.message,
                        });
                    }

                    last = Some(err);
                    if attempts >= self.policy.max_attempts() {
                        break 'attempts;
                    }
                    if !self.ledger.try_consume(session) {
                        let err = last.take().unwrap_or_else(|| {
                            InvokeError::new(FailureKind::Transient, model.clone(), "exhausted")
                        });
                        tracing::warn!(
                            session_id = %session,
                            model = %model,
                            "Session retry budget exhausted, escalating to fatal"
                        );
                        return Err(GuardedError {
                            kind: err.kind,
                            model: model.clone(),
                            attempts,
                            retry_budget_exhausted: true,
                            message: err.message,
                        });
                    }

                    let delay = self.policy.delay_for(attempts);
                    tracing::debug!(
                        session_id = %session,
                        model = %model,
                        attempt = attempts,
                        delay_ms = delay.as_millis() as u64,
                        "Retrying model call"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }

        // Primary policy exhausted: one shot at the fallback provider.
        if let Some(fallback) = &self.fallback {
            tracing::info!(session_id = %session, model = %model, "Trying fallback provider");
            attempts += 1;
            match self.invoke_once(&**fallback, model, prompt, deadline).await {
                Ok(completion) => return Ok(completion),
                Err(err) => last = Some(err),
            }
        }

        let err = last.unwrap_or_else(|| {
            InvokeError::new(FailureKind::Unavailable, model.clone(), "no attempts made")
        });
        Err(GuardedError {
            kind: err.kind,
            model: model.clone(),
            attempts,
            retry_budget_exhausted: false,
            message: err.message,
        })
    }

    async fn invoke_once(
        &self,
        client: &dyn ModelClient,
        model: &ModelId,
        prompt: &Prompt,
        deadline: Duration,
    ) -> Result<Completion, InvokeError> {
        let started = std::time::Instant::now();
        let result = client.invoke(model, prompt, deadline).await;
        #[allow(clippy::cast_possible_truncation)]
        let latency_ms = started.elapsed().as_millis() as u64;

        let record = match &result {
            Ok(completion) => CallRecord {
                model: model.clone(),
                failure: None,
                latency_ms: completion.latency_ms,
                tokens: completion.total_tokens(),
                cost_estimate: estimate_cost(completion.input_tokens, completion.output_tokens),
                timestamp: chrono::Utc::now(),
            },
            Err(err) => CallRecord {
                model: model.clone(),
                failure: Some(err.kind),
                latency_ms,
                tokens: 0,
                cost_estimate: 0.0,
                timestamp: chrono::Utc::now(),
            },
        };
        self.observer.on_call(&record);

        result
    }

    /// Record a failure into its family's breaker; acquired breakers of
    /// other families observed a non-failure.
    fn record_outcome(&self, acquired: &[(&'static str, CircuitBreaker)], err: &InvokeError) {
        let Some(failed_family) = err.kind.breaker_family() else {
            return;
        };
        for (family, breaker) in acquired {
            if *family == failed_family {
                breaker.record_failure();
            } else {
                breaker.record_success();
            }
        }
    }
}

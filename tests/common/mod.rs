//! Shared test support: a scripted in-process model client and engine
//! builders with fast test timings.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use parley::config::DebateConfig;
use parley::engine::DebateEngine;
use parley::error::{FailureKind, InvokeError};
use parley::llm::{Completion, FinishReason, ModelClient, ModelId, Prompt};
use parley::pool::{Capability, CostTier, ModelPool, ModelSpec};

/// Scripted behavior for one upcoming call to a model.
#[derive(Debug, Clone, Copy)]
pub enum Behavior {
    /// Succeed with generated content.
    Ok,
    /// Fail with the given kind.
    Fail(FailureKind),
    /// Sleep for a long time, then succeed. Used to park a call so the
    /// test can cancel mid-flight.
    Hang,
}

/// Filler words rotated through successful completions so transcripts
/// stay lexically fresh across rounds.
const FILLERS: [&str; 12] = [
    "staffing", "latency", "escalation", "retention", "onboarding", "tooling",
    "coverage", "handoff", "triage", "workload", "churn", "backlog",
];

#[derive(Default)]
struct ScriptState {
    /// Scripted prefixes per model; exhausted scripts fall back to `Ok`.
    scripts: HashMap<ModelId, Vec<Behavior>>,
    /// Calls observed per model.
    calls: HashMap<ModelId, u64>,
    /// Global call counter, drives content variation.
    total_calls: u64,
    /// Fixed content override; when set, every success returns this.
    fixed_content: Option<String>,
    /// Artificial per-call latency, for tests that race commands
    /// against a running session.
    delay: Duration,
}

/// In-process model client with per-model scripted behaviors.
#[derive(Clone, Default)]
pub struct ScriptedClient {
    state: Arc<Mutex<ScriptState>>,
}

impl ScriptedClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue behaviors for the next calls to `model` (then default Ok).
    pub fn script(&self, model: &str, behaviors: Vec<Behavior>) {
        self.state
            .lock()
            .scripts
            .insert(model.to_string(), behaviors);
    }

    /// Make every successful call return exactly this content.
    pub fn fix_content(&self, content: &str) {
        self.state.lock().fixed_content = Some(content.to_string());
    }

    /// Add artificial latency to every call.
    pub fn set_delay(&self, delay: Duration) {
        self.state.lock().delay = delay;
    }

    /// Calls observed for a model.
    pub fn calls(&self, model: &str) -> u64 {
        *self.state.lock().calls.get(model).unwrap_or(&0)
    }

    fn next_behavior(&self, model: &ModelId) -> (Behavior, String) {
        let mut state = self.state.lock();
        *state.calls.entry(model.clone()).or_insert(0) += 1;
        state.total_calls += 1;

        let behavior = state
            .scripts
            .get_mut(model)
            .and_then(|script| {
                if script.is_empty() {
                    None
                } else {
                    Some(script.remove(0))
                }
            })
            .unwrap_or(Behavior::Ok);

        let content = state.fixed_content.clone().unwrap_or_else(|| {
            let filler = FILLERS[(state.total_calls as usize) % FILLERS.len()];
            let second = FILLERS[(state.total_calls as usize + 5) % FILLERS.len()];
            format!(
                "Because the quarterly report shows support {filler} improving by \
                 30 percent, the case holds on the merits. The {second} numbers \
                 point the same way across teams. Therefore the motion stands on \
                 the evidence presented."
            )
        });

        (behavior, content)
    }
}

#[async_trait]
impl ModelClient for ScriptedClient {
    async fn invoke(
        &self,
        model: &ModelId,
        _prompt: &Prompt,
        _deadline: Duration,
    ) -> Result<Completion, InvokeError> {
        let (behavior, content) = self.next_behavior(model);
        let delay = self.state.lock().delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        match behavior {
            Behavior::Ok => {}
            Behavior::Fail(kind) => {
                return Err(InvokeError::new(kind, model.clone(), "scripted failure"));
            }
            Behavior::Hang => {
                tokio::time::sleep(Duration::from_secs(30)).await;
            }
        }
        Ok(Completion {
            text: content,
            input_tokens: 120,
            output_tokens: 60,
            latency_ms: 2,
            finish_reason: FinishReason::Stop,
        })
    }
}

/// Three-model pool used across the scenarios.
pub fn test_pool() -> ModelPool {
    ModelPool::new(vec![
        ModelSpec::new(
            "alpha",
            "Alpha",
            CostTier::Standard,
            vec![Capability::Reasoning, Capability::Analysis],
        ),
        ModelSpec::new(
            "beta",
            "Beta",
            CostTier::Standard,
            vec![Capability::ProblemSolving, Capability::Creativity],
        ),
        ModelSpec::new(
            "gamma",
            "Gamma",
            CostTier::Premium,
            vec![Capability::FactualAccuracy, Capability::NeutralJudgment],
        ),
    ])
}

/// Config with near-instant retries and a small breaker window so
/// failure scenarios converge quickly.
pub fn test_config() -> DebateConfig {
    let mut config = DebateConfig::default();
    config.retry.max_attempts = 3;
    config.retry.base_delay_ms = 1;
    config.retry.cap_delay_ms = 2;
    config.breaker.window = 3;
    config.breaker.min_failures = 3;
    config.breaker.cooldown_secs = 300;
    config
}

/// Engine over a fresh scripted client.
pub fn test_engine() -> (DebateEngine, ScriptedClient) {
    init_tracing();
    let client = ScriptedClient::new();
    let engine = DebateEngine::new(test_config(), Arc::new(client.clone()), test_pool());
    (engine, client)
}

/// Route runtime logs to the test output when `RUST_LOG` is set.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

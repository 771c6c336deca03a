//! Model pool: the process-wide set of available models, the role
//! assignments built from it, and per-(model, role) performance
//! accounting.
//!
//! The pool is shared read-mostly across sessions; statistic updates and
//! rotation decisions take a short critical section. Nothing here
//! persists across restarts; records re-warm from observation.

pub mod rotation;

pub use rotation::{RotationDecision, RotationEngine, RotationStrategy};

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::llm::ModelId;
use crate::session::Role;

/// Declared cost/latency tier of a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CostTier {
    /// Cheap and fast.
    Economy,
    /// Mid-range.
    Standard,
    /// Expensive frontier models.
    Premium,
}

/// Declared model capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// Multi-step reasoning.
    Reasoning,
    /// Analytical decomposition.
    Analysis,
    /// Creative generation.
    Creativity,
    /// Practical problem solving.
    ProblemSolving,
    /// Wide world knowledge.
    BroadKnowledge,
    /// Factual precision.
    FactualAccuracy,
    /// Even-handed evaluation.
    NeutralJudgment,
}

/// A model the pool can assign.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSpec {
    /// Provider-facing identifier.
    pub id: ModelId,
    /// Human-readable name.
    pub name: String,
    /// Cost/latency tier.
    pub tier: CostTier,
    /// Declared capabilities.
    pub capabilities: Vec<Capability>,
}

impl ModelSpec {
    /// Convenience constructor.
    pub fn new(
        id: impl Into<ModelId>,
        name: impl Into<String>,
        tier: CostTier,
        capabilities: Vec<Capability>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            tier,
            capabilities,
        }
    }
}

/// How many strength samples feed the trend window.
const TREND_WINDOW: usize = 10;

/// Accumulated per-(model, role) performance.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PerformanceRecord {
    /// Total calls observed.
    pub calls: u64,
    /// Successful calls.
    pub successes: u64,
    /// Failed calls.
    pub failures: u64,
    /// Moving-average latency in milliseconds.
    pub avg_latency_ms: f64,
    /// Moving-average argument strength.
    pub avg_strength: f64,
    /// Strength samples seen.
    pub strength_samples: u64,
    /// Recent strength samples, oldest first.
    pub recent_strengths: VecDeque<f64>,
}

/// Exponential moving-average smoothing factor.
const EMA_ALPHA: f64 = 0.3;

impl PerformanceRecord {
    /// Record a call outcome.
    pub fn record_call(&mut self, success: bool, latency_ms: u64) {
        self.calls += 1;
        if success {
            self.successes += 1;
            #[allow(clippy::cast_precision_loss)]
            let latency = latency_ms as f64;
            self.avg_latency_ms = if self.successes == 1 {
                latency
            } else {
                EMA_ALPHA.mul_add(latency, (1.0 - EMA_ALPHA) * self.avg_latency_ms)
            };
        } else {
            self.failures += 1;
        }
    }

    /// Record an argument-strength sample.
    pub fn record_strength(&mut self, strength: f64) {
        self.strength_samples += 1;
        self.avg_strength = if self.strength_samples == 1 {
            strength
        } else {
            EMA_ALPHA.mul_add(strength, (1.0 - EMA_ALPHA) * self.avg_strength)
        };
        self.recent_strengths.push_back(strength);
        while self.recent_strengths.len() > TREND_WINDOW {
            self.recent_strengths.pop_front();
        }
    }

    /// Success rate in [0, 1].
    #[must_use]
    pub fn reliability(&self) -> f64 {
        if self.calls == 0 {
            return 1.0;
        }
        #[allow(clippy::cast_precision_loss)]
        let rate = self.successes as f64 / self.calls as f64;
        rate
    }

    /// Composite score used by rotation: strength, reliability, and a
    /// latency term (5 s of latency zeroes it out).
    #[must_use]
    pub fn composite_score(&self) -> f64 {
        let latency_score = (1.0 - self.avg_latency_ms / 5_000.0).clamp(0.0, 1.0);
        let strength = if self.strength_samples == 0 {
            0.5
        } else {
            self.avg_strength
        };
        0.3f64
            .mul_add(latency_score, 0.4f64.mul_add(strength, 0.3 * self.reliability()))
            .clamp(0.0, 1.0)
    }
}

#[derive(Debug, Default)]
struct PoolInner {
    models: Vec<ModelSpec>,
    stats: HashMap<(ModelId, Role), PerformanceRecord>,
    tokens: HashMap<ModelId, u64>,
}

/// The process-wide model pool.
#[derive(Debug, Clone, Default)]
pub struct ModelPool {
    inner: Arc<RwLock<PoolInner>>,
}

impl ModelPool {
    /// Create a pool over the given models.
    #[must_use]
    pub fn new(models: Vec<ModelSpec>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(PoolInner {
                models,
                stats: HashMap::new(),
                tokens: HashMap::new(),
            })),
        }
    }

    /// Known models.
    #[must_use]
    pub fn models(&self) -> Vec<ModelSpec> {
        self.inner.read().models.clone()
    }

    /// Number of known models.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().models.len()
    }

    /// Whether the pool is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.read().models.is_empty()
    }

    /// Spec for a model id.
    #[must_use]
    pub fn spec(&self, id: &ModelId) -> Option<ModelSpec> {
        self.inner.read().models.iter().find(|m| &m.id == id).cloned()
    }

    /// Build the initial role → model assignment for a session.
    ///
    /// Debaters are spread round-robin over the pool; the judge prefers a
    /// model declaring [`Capability::NeutralJudgment`].
    ///
    /// Returns `None` when the pool is empty.
    #[must_use]
    pub fn assign_roles(&self, debaters: u8) -> Option<BTreeMap<Role, ModelId>> {
        let inner = self.inner.read();
        if inner.models.is_empty() {
            return None;
        }

        let mut assignment = BTreeMap::new();
        for i in 0..debaters {
            let model = &inner.models[i as usize % inner.models.len()];
            assignment.insert(Role::Debater(i), model.id.clone());
        }

        let judge = inner
            .models
            .iter()
            .find(|m| m.capabilities.contains(&Capability::NeutralJudgment))
            .unwrap_or_else(|| &inner.models[inner.models.len() - 1]);
        assignment.insert(Role::Judge, judge.id.clone());

        Some(assignment)
    }

    /// Record a call outcome for (model, role).
    pub fn record_call(&self, model: &ModelId, role: Role, success: bool, latency_ms: u64) {
        let mut inner = self.inner.write();
        inner
            .stats
            .entry((model.clone(), role))
            .or_default()
            .record_call(success, latency_ms);
    }

    /// Record an argument-strength sample for (model, role).
    pub fn record_strength(&self, model: &ModelId, role: Role, strength: f64) {
        let mut inner = self.inner.write();
        inner
            .stats
            .entry((model.clone(), role))
            .or_default()
            .record_strength(strength);
    }

    /// Record token spend for a model.
    pub fn record_tokens(&self, model: &ModelId, tokens: u32) {
        let mut inner = self.inner.write();
        *inner.tokens.entry(model.clone()).or_insert(0) += u64::from(tokens);
    }

    /// Snapshot of the record for (model, role).
    #[must_use]
    pub fn record(&self, model: &ModelId, role: Role) -> PerformanceRecord {
        self.inner
            .read()
            .stats
            .get(&(model.clone(), role))
            .cloned()
            .unwrap_or_default()
    }

    /// Cumulative token spend for a model.
    #[must_use]
    pub fn tokens_spent(&self, model: &ModelId) -> u64 {
        *self.inner.read().tokens.get(model).unwrap_or(&0)
    }

    /// Serializable summary of all tracked records.
    #[must_use]
    pub fn performance_summary(&self) -> PoolSummary {
        let inner = self.inner.read();
        let mut entries: Vec<PoolSummaryEntry> = inner
            .stats
            .iter()
            .map(|((model, role), record)| PoolSummaryEntry {
                model: model.clone(),
                role: role.to_string(),
                calls: record.calls,
                success_rate: record.reliability(),
                avg_latency_ms: record.avg_latency_ms,
                avg_strength: record.avg_strength,
                composite_score: record.composite_score(),
                tokens_spent: *inner.tokens.get(model).unwrap_or(&0),
            })
            .collect();
        entries.sort_by(|a, b| a.model.cmp(&b.model).then_with(|| a.role.cmp(&b.role)));
        PoolSummary {
            models_known: inner.models.len(),
            entries,
        }
    }
}

/// Serializable pool performance summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolSummary {
    /// Models registered in the pool.
    pub models_known: usize,
    /// Per-(model, role) entries.
    pub entries: Vec<PoolSummaryEntry>,
}

/// One summary row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolSummaryEntry {
    /// Model id.
    pub model: ModelId,
    /// Role, stringified.
    pub role: String,
    /// Calls observed.
    pub calls: u64,
    /// Success rate.
    pub success_rate: f64,
    /// Moving-average latency.
    pub avg_latency_ms: f64,
    /// Moving-average strength.
    pub avg_strength: f64,
    /// Composite rotation score.
    pub composite_score: f64,
    /// Cumulative tokens.
    pub tokens_spent: u64,
}

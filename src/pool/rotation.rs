//! Rotation engine: decides when a role should move to a different
//! model.
//!
//! Five strategies are supported; all of them respect the
//! `min_calls_before_rotation` precondition and never propose a model
//! whose breaker is open. Decisions are proposals: the orchestrator
//! applies them at phase boundaries and records the change. The
//! emergency path serves the failure-handling role swap and may act
//! between turns.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::{Capability, ModelPool, ModelSpec};
use crate::llm::ModelId;
use crate::resilience::BreakerRegistry;
use crate::session::Role;

/// Rotate at every Nth debate-round boundary under `RoundRobin`.
const ROUND_ROBIN_INTERVAL: u32 = 2;
/// Token-spend imbalance ratio that triggers `Balanced` rotation.
const BALANCE_IMBALANCE: f64 = 0.5;

/// Rotation strategy, configurable per session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RotationStrategy {
    /// Never rotate; the failure path alone may swap models.
    Fixed,
    /// Rotate at fixed round boundaries within the same tier.
    RoundRobin,
    /// Rotate when the incumbent trails the best candidate.
    PerformanceBased,
    /// Performance-based plus per-role quality-trend decline.
    #[default]
    Adaptive,
    /// Equalise cumulative token spend across models.
    Balanced,
}

impl std::fmt::Display for RotationStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Fixed => "fixed",
            Self::RoundRobin => "round_robin",
            Self::PerformanceBased => "performance_based",
            Self::Adaptive => "adaptive",
            Self::Balanced => "balanced",
        };
        f.write_str(s)
    }
}

/// A proposed assignment change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RotationDecision {
    /// Role to move.
    pub role: Role,
    /// Current model.
    pub old_model: ModelId,
    /// Proposed model.
    pub new_model: ModelId,
    /// Why.
    pub reason: String,
    /// Confidence in [0, 1].
    pub confidence: f64,
    /// Expected composite-score improvement.
    pub expected_improvement: f64,
}

/// Rotation engine over the shared pool and breaker table.
#[derive(Debug, Clone)]
pub struct RotationEngine {
    pool: ModelPool,
    breakers: BreakerRegistry,
    min_calls: u32,
    improvement_threshold: f64,
}

impl RotationEngine {
    /// Create an engine.
    #[must_use]
    pub fn new(pool: ModelPool, breakers: BreakerRegistry, min_calls: u32) -> Self {
        Self {
            pool,
            breakers,
            min_calls,
            improvement_threshold: 0.10,
        }
    }

    /// Evaluate whether a rotation should be proposed.
    ///
    /// `role_round_strengths` carries each role's mean argument strength
    /// per debate round, oldest first; `rounds_done` counts closed debate
    /// rounds.
    #[must_use]
    pub fn evaluate(
        &self,
        strategy: RotationStrategy,
        assignment: &BTreeMap<Role, ModelId>,
        role_round_strengths: &BTreeMap<Role, Vec<f64>>,
        rounds_done: u32,
    ) -> Option<RotationDecision> {
        match strategy {
            RotationStrategy::Fixed => None,
            RotationStrategy::RoundRobin => self.evaluate_round_robin(assignment, rounds_done),
            RotationStrategy::PerformanceBased => self.evaluate_performance(assignment),
            RotationStrategy::Adaptive => self
                .evaluate_performance(assignment)
                .or_else(|| self.evaluate_trend(assignment, role_round_strengths)),
            RotationStrategy::Balanced => self.evaluate_balanced(assignment),
        }
    }

    /// Emergency replacement for a role whose incumbent is unhealthy.
    ///
    /// Picks the healthiest alternative (breaker closed, best composite
    /// score); `None` when no alternative exists.
    #[must_use]
    pub fn emergency_replacement(
        &self,
        role: Role,
        incumbent: &ModelId,
        reason: &str,
    ) -> Option<RotationDecision> {
        let incumbent_score = self.candidate_score(incumbent, role);
        let candidate = self
            .pool
            .models()
            .into_iter()
            .filter(|m| &m.id != incumbent && !self.breakers.is_model_open(&m.id))
            .max_by(|a, b| {
                self.candidate_score(&a.id, role)
                    .total_cmp(&self.candidate_score(&b.id, role))
            })?;

        let expected = (self.candidate_score(&candidate.id, role) - incumbent_score).max(0.0);
        Some(RotationDecision {
            role,
            old_model: incumbent.clone(),
            new_model: candidate.id,
            reason: reason.to_string(),
            confidence: 0.9,
            expected_improvement: expected,
        })
    }

    fn evaluate_round_robin(
        &self,
        assignment: &BTreeMap<Role, ModelId>,
        rounds_done: u32,
    ) -> Option<RotationDecision> {
        if rounds_done == 0 || rounds_done % ROUND_ROBIN_INTERVAL != 0 {
            return None;
        }

        let models = self.pool.models();
        for (role, incumbent) in assignment {
            if !role.is_debater() || !self.incumbent_observed(incumbent, *role) {
                continue;
            }
            let Some(spec) = models.iter().find(|m| &m.id == incumbent) else {
                continue;
            };
            // Next same-tier model, cycling declaration order.
            let same_tier: Vec<&ModelSpec> =
                models.iter().filter(|m| m.tier == spec.tier).collect();
            if same_tier.len() < 2 {
                continue;
            }
            let position = same_tier.iter().position(|m| &m.id == incumbent)?;
            let next = same_tier[(position + 1) % same_tier.len()];
            if self.breakers.is_model_open(&next.id) {
                continue;
            }
            return Some(RotationDecision {
                role: *role,
                old_model: incumbent.clone(),
                new_model: next.id.clone(),
                reason: format!("round-robin boundary at round {rounds_done}"),
                confidence: 0.8,
                expected_improvement: 0.0,
            });
        }
        None
    }

    fn evaluate_performance(
        &self,
        assignment: &BTreeMap<Role, ModelId>,
    ) -> Option<RotationDecision> {
        // Worst observed incumbent first.
        let mut ranked: Vec<(Role, &ModelId, f64)> = assignment
            .iter()
            .filter(|(role, model)| {
                role.is_debater() && self.incumbent_observed(model, **role)
            })
            .map(|(role, model)| (*role, model, self.pool.record(model, *role).composite_score()))
            .collect();
        ranked.sort_by(|a, b| a.2.total_cmp(&b.2));

        for (role, incumbent, incumbent_score) in ranked {
            let Some((candidate, candidate_score)) =
                self.best_candidate(role, incumbent)
            else {
                continue;
            };
            if candidate_score - incumbent_score >= self.improvement_threshold {
                return Some(RotationDecision {
                    role,
                    old_model: incumbent.clone(),
                    new_model: candidate,
                    reason: format!(
                        "incumbent score {incumbent_score:.2} trails best candidate {candidate_score:.2}"
                    ),
                    confidence: 0.85,
                    expected_improvement: candidate_score - incumbent_score,
                });
            }
        }
        None
    }

    fn evaluate_trend(
        &self,
        assignment: &BTreeMap<Role, ModelId>,
        role_round_strengths: &BTreeMap<Role, Vec<f64>>,
    ) -> Option<RotationDecision> {
        for (role, strengths) in role_round_strengths {
            if !role.is_debater() || !strength_declined(strengths) {
                continue;
            }
            let incumbent = assignment.get(role)?;
            if !self.incumbent_observed(incumbent, *role) {
                continue;
            }
            let (candidate, candidate_score) = self.best_candidate(*role, incumbent)?;
            let incumbent_score = self.candidate_score(incumbent, *role);
            return Some(RotationDecision {
                role: *role,
                old_model: incumbent.clone(),
                new_model: candidate,
                reason: format!("argument strength for {role} declined over 2 rounds"),
                confidence: 0.7,
                expected_improvement: (candidate_score - incumbent_score).max(0.0),
            });
        }
        None
    }

    fn evaluate_balanced(
        &self,
        assignment: &BTreeMap<Role, ModelId>,
    ) -> Option<RotationDecision> {
        let models = self.pool.models();
        if models.len() < 2 {
            return None;
        }

        let spends: Vec<(ModelId, u64)> = models
            .iter()
            .map(|m| (m.id.clone(), self.pool.tokens_spent(&m.id)))
            .collect();
        let (max_model, max_spend) = spends.iter().max_by_key(|(_, s)| *s)?.clone();
        let (min_model, min_spend) = spends.iter().min_by_key(|(_, s)| *s)?.clone();

        #[allow(clippy::cast_precision_loss)]
        let imbalance = (max_spend - min_spend) as f64 / (max_spend + 1) as f64;
        if imbalance <= BALANCE_IMBALANCE || max_model == min_model {
            return None;
        }
        if self.breakers.is_model_open(&min_model) {
            return None;
        }

        let (role, incumbent) = assignment
            .iter()
            .find(|(role, model)| role.is_debater() && **model == max_model)?;
        if !self.incumbent_observed(incumbent, *role) {
            return None;
        }

        Some(RotationDecision {
            role: *role,
            old_model: incumbent.clone(),
            new_model: min_model,
            reason: format!(
                "token spend imbalance {imbalance:.2} (max {max_spend}, min {min_spend})"
            ),
            confidence: 0.7,
            expected_improvement: 0.0,
        })
    }

    /// Best healthy alternative and its score for a role.
    fn best_candidate(&self, role: Role, incumbent: &ModelId) -> Option<(ModelId, f64)> {
        self.pool
            .models()
            .into_iter()
            .filter(|m| &m.id != incumbent && !self.breakers.is_model_open(&m.id))
            .map(|m| {
                let score = self.candidate_score(&m.id, role);
                (m.id, score)
            })
            .max_by(|a, b| a.1.total_cmp(&b.1))
    }

    /// Observed composite score, or a capability estimate without history.
    fn candidate_score(&self, model: &ModelId, role: Role) -> f64 {
        let record = self.pool.record(model, role);
        if record.calls >= u64::from(self.min_calls) {
            return record.composite_score();
        }
        self.pool
            .spec(model)
            .map_or(0.5, |spec| estimate_score(&spec, role))
    }

    fn incumbent_observed(&self, model: &ModelId, role: Role) -> bool {
        self.pool.record(model, role).calls >= u64::from(self.min_calls)
    }
}

/// Whether the last two round-over-round deltas are declines (with only
/// two samples, a single decline counts).
fn strength_declined(strengths: &[f64]) -> bool {
    match strengths {
        [.., a, b, c] => c < b && b < a,
        [a, b] => b < a,
        _ => false,
    }
}

/// Capability-based estimate for a model with no history in a role.
fn estimate_score(spec: &ModelSpec, role: Role) -> f64 {
    let required: &[Capability] = match role {
        Role::Debater(_) => &[
            Capability::Reasoning,
            Capability::Analysis,
            Capability::Creativity,
            Capability::ProblemSolving,
            Capability::BroadKnowledge,
        ],
        Role::Judge => &[
            Capability::FactualAccuracy,
            Capability::NeutralJudgment,
            Capability::Reasoning,
        ],
    };
    let matches = spec
        .capabilities
        .iter()
        .filter(|c| required.contains(c))
        .count();
    let tier_bonus = match spec.tier {
        super::CostTier::Premium => 0.05,
        super::CostTier::Standard => 0.02,
        super::CostTier::Economy => 0.0,
    };
    #[allow(clippy::cast_precision_loss)]
    let capability_bonus = matches as f64 * 0.1;
    (0.55 + capability_bonus + tier_bonus).min(1.0)
}

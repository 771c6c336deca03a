//! Adaptive round management.
//!
//! After every debate round the manager scores the round on four
//! sub-metrics (quality, engagement, novelty, time pressure) and
//! emits one of four actions: continue, extend, reduce, or terminate
//! early. Hard bounds clamp extension and reduction; time pressure wins
//! every conflict.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::similarity::{cosine, overlap_ratio, term_frequencies, tokenize};
use crate::session::Round;

/// Novelty floor below which a round counts toward quality collapse.
const COLLAPSE_NOVELTY: f64 = 0.1;
/// Quality floor below which a round counts toward quality collapse.
const COLLAPSE_QUALITY: f64 = 0.4;
/// Consecutive poor rounds that trigger early termination.
const COLLAPSE_ROUNDS: u32 = 2;
/// Combined score below which the exchange is wound down to closing.
const REDUCE_SCORE: f64 = 0.35;
/// Quality above which an extension is considered.
const EXTEND_QUALITY: f64 = 0.75;
/// Novelty above which an extension is considered.
const EXTEND_NOVELTY: f64 = 0.5;

/// Action emitted after a round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "action")]
pub enum RoundAction {
    /// Keep going as planned.
    ContinueNormal,
    /// Add one round, capped at the session maximum.
    Extend {
        /// New planned round count.
        target: u32,
    },
    /// Skip the remaining middle rounds and move to closing.
    Reduce,
    /// Skip straight to judgment.
    TerminateEarly,
}

/// Sub-metrics for one round.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RoundMetrics {
    /// Mean argument strength across the round's turns.
    pub quality: f64,
    /// Produced/expected turn fraction times interaction density.
    pub engagement: f64,
    /// 1 − max cosine similarity against any previous round, clipped.
    pub novelty: f64,
    /// Elapsed wall-clock over budget, clipped to [0, 1].
    pub time_pressure: f64,
}

impl RoundMetrics {
    /// Combined score `S = 0.4·Q + 0.2·E + 0.2·N + 0.2·(1−T)`.
    #[must_use]
    pub fn score(&self) -> f64 {
        0.2f64.mul_add(
            1.0 - self.time_pressure,
            0.4f64.mul_add(self.quality, 0.2 * (self.engagement + self.novelty)),
        )
    }
}

/// Decision recorded on the round.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoundDecision {
    /// Chosen action.
    pub action: RoundAction,
    /// Sub-metrics the decision was based on.
    pub metrics: RoundMetrics,
    /// Combined score.
    pub score: f64,
    /// One-line rationale.
    pub reason: String,
}

/// Compressed post-round context: participant stances, active
/// sub-issues, and momentum. Consumed by the round manager and the
/// post-debate analytics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextSnapshot {
    /// Round this snapshot describes.
    pub round_index: u32,
    /// (speaker, stance gist) pairs.
    pub stances: Vec<(String, String)>,
    /// Most contested content words this round.
    pub active_issues: Vec<String>,
    /// Quality delta against the previous round.
    pub momentum: f64,
}

/// Per-session adaptive round manager.
#[derive(Debug)]
pub struct AdaptiveRoundManager {
    min_rounds: u32,
    max_rounds: u32,
    consecutive_poor: u32,
    prior_quality: Option<f64>,
}

impl AdaptiveRoundManager {
    /// Create a manager with the session's round bounds.
    #[must_use]
    pub fn new(min_rounds: u32, max_rounds: u32) -> Self {
        Self {
            min_rounds,
            max_rounds,
            consecutive_poor: 0,
            prior_quality: None,
        }
    }

    /// Evaluate the just-closed debate round and decide what happens next.
    ///
    /// `prior_rounds` is every earlier round (opening included);
    /// `expected_turns` is what the turn-order predicate demanded;
    /// `rounds_done` counts closed debate rounds; `planned` is the current
    /// plan.
    #[allow(clippy::too_many_arguments)]
    pub fn evaluate(
        &mut self,
        round: &Round,
        prior_rounds: &[Round],
        expected_turns: usize,
        elapsed: Duration,
        budget: Duration,
        rounds_done: u32,
        planned: u32,
    ) -> RoundDecision {
        let metrics = self.measure(round, prior_rounds, expected_turns, elapsed, budget);
        let score = metrics.score();

        if metrics.quality < COLLAPSE_QUALITY && metrics.novelty < COLLAPSE_NOVELTY {
            self.consecutive_poor += 1;
        } else {
            self.consecutive_poor = 0;
        }
        self.prior_quality = Some(metrics.quality);

        let (action, reason) = self.decide(&metrics, score, rounds_done, planned);

        tracing::info!(
            round = round.index,
            quality = metrics.quality,
            engagement = metrics.engagement,
            novelty = metrics.novelty,
            time_pressure = metrics.time_pressure,
            score = score,
            action = ?action,
            "Round evaluated"
        );

        RoundDecision {
            action,
            metrics,
            score,
            reason,
        }
    }

    fn decide(
        &self,
        metrics: &RoundMetrics,
        score: f64,
        rounds_done: u32,
        planned: u32,
    ) -> (RoundAction, String) {
        // Time pressure overrides every other factor.
        if metrics.time_pressure >= 1.0 {
            return (
                RoundAction::TerminateEarly,
                "session time budget exhausted".to_string(),
            );
        }

        if self.consecutive_poor >= COLLAPSE_ROUNDS {
            return (
                RoundAction::TerminateEarly,
                format!(
                    "quality collapse: {} consecutive rounds below quality {COLLAPSE_QUALITY} and novelty {COLLAPSE_NOVELTY}",
                    self.consecutive_poor
                ),
            );
        }

        if rounds_done >= self.min_rounds && score < REDUCE_SCORE {
            return (
                RoundAction::Reduce,
                format!("combined score {score:.2} below {REDUCE_SCORE}"),
            );
        }

        if metrics.quality > EXTEND_QUALITY
            && metrics.novelty > EXTEND_NOVELTY
            && metrics.time_pressure < 0.8
        {
            if planned < self.max_rounds {
                return (
                    RoundAction::Extend {
                        target: planned + 1,
                    },
                    format!(
                        "high quality ({:.2}) and novelty ({:.2})",
                        metrics.quality, metrics.novelty
                    ),
                );
            }
            // Extension wanted but the cap is reached: clamp to continue.
            return (
                RoundAction::ContinueNormal,
                format!("extension clamped at max_rounds ({})", self.max_rounds),
            );
        }

        (RoundAction::ContinueNormal, "within normal bounds".to_string())
    }

    fn measure(
        &self,
        round: &Round,
        prior_rounds: &[Round],
        expected_turns: usize,
        elapsed: Duration,
        budget: Duration,
    ) -> RoundMetrics {
        let quality = if round.turns.is_empty() {
            0.0
        } else {
            #[allow(clippy::cast_precision_loss)]
            let mean = round
                .turns
                .iter()
                .map(|t| t.analysis.strength)
                .sum::<f64>()
                / round.turns.len() as f64;
            mean
        };

        let engagement = engagement(round, prior_rounds, expected_turns);
        let novelty = novelty(round, prior_rounds);

        let time_pressure = if budget.is_zero() {
            1.0
        } else {
            (elapsed.as_secs_f64() / budget.as_secs_f64()).clamp(0.0, 1.0)
        };

        RoundMetrics {
            quality,
            engagement,
            novelty,
            time_pressure,
        }
    }

    /// Build the post-round context snapshot.
    #[must_use]
    pub fn snapshot(&self, round: &Round) -> ContextSnapshot {
        let mut stances = Vec::new();
        for turn in &round.turns {
            let gist = turn
                .analysis
                .structure
                .conclusion
                .clone()
                .unwrap_or_else(|| truncate(&turn.content, 120));
            stances.push((turn.role.to_string(), truncate(&gist, 120)));
        }

        // The most contested issues are content words every speaker used.
        let mut counts: HashMap<String, usize> = HashMap::new();
        for turn in &round.turns {
            let unique: std::collections::HashSet<String> = tokenize(&turn.content).collect();
            for word in unique {
                *counts.entry(word).or_insert(0) += 1;
            }
        }
        let speakers = round.turns.len().max(1);
        let mut shared: Vec<(String, usize)> = counts
            .into_iter()
            .filter(|(_, n)| *n >= speakers.min(2))
            .collect();
        shared.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        let active_issues = shared.into_iter().take(5).map(|(w, _)| w).collect();

        let quality = if round.turns.is_empty() {
            0.0
        } else {
            #[allow(clippy::cast_precision_loss)]
            let mean = round
                .turns
                .iter()
                .map(|t| t.analysis.strength)
                .sum::<f64>()
                / round.turns.len() as f64;
            mean
        };
        let momentum = self.prior_quality.map_or(0.0, |prev| quality - prev);

        ContextSnapshot {
            round_index: round.index,
            stances,
            active_issues,
            momentum,
        }
    }
}

/// Fraction of expected turns produced, times interaction density.
fn engagement(round: &Round, prior_rounds: &[Round], expected_turns: usize) -> f64 {
    if expected_turns == 0 {
        return 0.0;
    }
    #[allow(clippy::cast_precision_loss)]
    let produced = (round.turns.len() as f64 / expected_turns as f64).min(1.0);

    let prior_text: String = prior_rounds
        .iter()
        .flat_map(|r| r.turns.iter())
        .map(|t| t.content.as_str())
        .collect::<Vec<_>>()
        .join(" ");

    let density = if prior_text.is_empty() || round.turns.is_empty() {
        // Nothing to refer back to yet; count production alone.
        1.0
    } else {
        #[allow(clippy::cast_precision_loss)]
        let mean = round
            .turns
            .iter()
            .map(|t| (overlap_ratio(&t.content, &prior_text) * 2.0).min(1.0))
            .sum::<f64>()
            / round.turns.len() as f64;
        mean
    };

    (produced * density).clamp(0.0, 1.0)
}

/// 1 − max cosine similarity against any previous round, clipped.
fn novelty(round: &Round, prior_rounds: &[Round]) -> f64 {
    if prior_rounds.is_empty() {
        return 1.0;
    }
    let current = term_frequencies(&round_text(round));
    let max_similarity = prior_rounds
        .iter()
        .map(|prior| cosine(&current, &term_frequencies(&round_text(prior))))
        .fold(0.0f64, f64::max);
    (1.0 - max_similarity).clamp(0.0, 1.0)
}

fn round_text(round: &Round) -> String {
    round
        .turns
        .iter()
        .map(|t| t.content.as_str())
        .collect::<Vec<_>>()
        .join(" ")
}

fn truncate(text: &str, max: usize) -> String {
    if text.len() <= max {
        text.to_string()
    } else {
        let mut cut = max;
        while !text.is_char_boundary(cut) {
            cut -= 1;
        }
        format!("{}…", &text[..cut])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::argument::ArgumentRecord;
    use crate::session::{Phase, Role, Turn};
    use chrono::Utc;

    fn turn_with(index: usize, role: Role, content: &str, strength: f64) -> Turn {
        let mut analysis = ArgumentRecord::degraded();
        analysis.strength = strength;
        analysis.degraded = false;
        Turn {
            index,
            role,
            model: "m".into(),
            phase: Phase::Rebuttal,
            content: content.to_string(),
            timestamp: Utc::now(),
            latency_ms: 5,
            tokens: 10,
            analysis,
        }
    }

    fn round_with(index: u32, contents: &[(&str, f64)]) -> Round {
        let mut round = Round::new(index, Phase::Rebuttal);
        for (i, (content, strength)) in contents.iter().enumerate() {
            round
                .turns
                .push(turn_with(i, Role::Debater(i as u8), content, *strength));
        }
        round
    }

    #[test]
    fn test_score_formula() {
        let metrics = RoundMetrics {
            quality: 1.0,
            engagement: 1.0,
            novelty: 1.0,
            time_pressure: 0.0,
        };
        assert!((metrics.score() - 1.0).abs() < 1e-9);

        let metrics = RoundMetrics {
            quality: 0.5,
            engagement: 0.5,
            novelty: 0.5,
            time_pressure: 0.5,
        };
        assert!((metrics.score() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_first_round_novelty_is_full() {
        let round = round_with(1, &[("fresh arguments about costs", 0.6)]);
        assert!((novelty(&round, &[]) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_repetition_kills_novelty() {
        let text = "automation reduces support costs and improves response times";
        let prior = round_with(1, &[(text, 0.6)]);
        let repeat = round_with(2, &[(text, 0.6)]);
        assert!(novelty(&repeat, &[prior]) < 0.05);
    }

    #[test]
    fn test_time_pressure_wins_over_quality() {
        let mut manager = AdaptiveRoundManager::new(3, 10);
        let round = round_with(2, &[("excellent novel material on new ground", 0.95)]);
        let decision = manager.evaluate(
            &round,
            &[],
            1,
            Duration::from_secs(100),
            Duration::from_secs(100),
            1,
            3,
        );
        assert_eq!(decision.action, RoundAction::TerminateEarly);
        assert!(decision.reason.contains("time"));
    }

    #[test]
    fn test_quality_collapse_terminates_after_two_rounds() {
        let mut manager = AdaptiveRoundManager::new(3, 10);
        let text = "the same tired point again and again nothing new";
        let prior = round_with(1, &[(text, 0.2)]);

        let repeat1 = round_with(2, &[(text, 0.2)]);
        let d1 = manager.evaluate(
            &repeat1,
            std::slice::from_ref(&prior),
            1,
            Duration::from_secs(10),
            Duration::from_secs(1000),
            1,
            3,
        );
        assert_eq!(d1.action, RoundAction::ContinueNormal);

        let repeat2 = round_with(3, &[(text, 0.2)]);
        let d2 = manager.evaluate(
            &repeat2,
            &[prior, repeat1],
            1,
            Duration::from_secs(20),
            Duration::from_secs(1000),
            2,
            3,
        );
        assert_eq!(d2.action, RoundAction::TerminateEarly);
        assert!(d2.reason.contains("collapse"));
    }

    #[test]
    fn test_extend_clamped_at_max_rounds() {
        let mut manager = AdaptiveRoundManager::new(3, 3);
        let round = round_with(
            3,
            &[("strong fresh evidence on entirely new dimensions of the topic", 0.9)],
        );
        let decision = manager.evaluate(
            &round,
            &[],
            1,
            Duration::from_secs(10),
            Duration::from_secs(1000),
            3,
            3,
        );
        assert_eq!(decision.action, RoundAction::ContinueNormal);
        assert!(decision.reason.contains("clamped"));
    }

    #[test]
    fn test_extend_when_below_cap() {
        let mut manager = AdaptiveRoundManager::new(3, 10);
        let round = round_with(
            3,
            &[("strong fresh evidence on entirely new dimensions of the topic", 0.9)],
        );
        let decision = manager.evaluate(
            &round,
            &[],
            1,
            Duration::from_secs(10),
            Duration::from_secs(1000),
            3,
            3,
        );
        assert_eq!(decision.action, RoundAction::Extend { target: 4 });
    }

    #[test]
    fn test_reduce_needs_min_rounds() {
        let mut manager = AdaptiveRoundManager::new(3, 10);
        let dull = round_with(2, &[("weak", 0.0)]);
        // Below min_rounds: no reduction yet.
        let early = manager.evaluate(
            &dull,
            &[],
            2,
            Duration::from_secs(950),
            Duration::from_secs(1000),
            1,
            5,
        );
        assert_eq!(early.action, RoundAction::ContinueNormal);

        let mut manager = AdaptiveRoundManager::new(3, 10);
        let late = manager.evaluate(
            &dull,
            &[],
            2,
            Duration::from_secs(950),
            Duration::from_secs(1000),
            3,
            5,
        );
        assert_eq!(late.action, RoundAction::Reduce);
    }

    #[test]
    fn test_snapshot_collects_stances_and_issues() {
        let manager = AdaptiveRoundManager::new(3, 10);
        let round = round_with(
            2,
            &[
                ("automation lowers support costs dramatically", 0.7),
                ("support costs matter less than customer trust", 0.6),
            ],
        );
        let snapshot = manager.snapshot(&round);
        assert_eq!(snapshot.round_index, 2);
        assert_eq!(snapshot.stances.len(), 2);
        assert!(snapshot
            .active_issues
            .iter()
            .any(|w| w == "support" || w == "costs"));
    }
}

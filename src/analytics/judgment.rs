//! Multi-perspective judgment and bias detection.
//!
//! Cross-evaluates each debater along eight dimensions, screens the
//! judge's verdict for cognitive biases, and produces the final winner
//! with confidence and margin.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::session::{Role, Turn};

/// Closed set of eight evaluation perspectives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Perspective {
    /// Soundness of reasoning.
    Logical,
    /// Persuasive craft.
    Rhetorical,
    /// Factual grounding.
    Factual,
    /// Ethical weight.
    Ethical,
    /// Practical viability.
    Practical,
    /// Emotional resonance.
    Emotional,
    /// Cultural awareness.
    Cultural,
    /// Legal considerations.
    Legal,
}

impl Perspective {
    /// All perspectives in a fixed order.
    pub const ALL: [Self; 8] = [
        Self::Logical,
        Self::Rhetorical,
        Self::Factual,
        Self::Ethical,
        Self::Practical,
        Self::Emotional,
        Self::Cultural,
        Self::Legal,
    ];

    fn cues(self) -> &'static [&'static str] {
        match self {
            Self::Logical => &["because", "therefore", "follows", "premise", "consistent"],
            Self::Rhetorical => &["imagine", "consider", "surely", "picture", "ask yourself"],
            Self::Factual => &["percent", "data", "report", "study", "measured"],
            Self::Ethical => &["fair", "right", "moral", "duty", "harm"],
            Self::Practical => &["cost", "implement", "deploy", "maintain", "operational"],
            Self::Emotional => &["fear", "hope", "trust", "frustration", "confidence"],
            Self::Cultural => &["culture", "community", "tradition", "norms", "society"],
            Self::Legal => &["law", "regulation", "liability", "compliance", "contract"],
        }
    }
}

/// Closed set of eight cognitive biases screened for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BiasKind {
    /// Weighing confirming material only.
    Confirmation,
    /// Over-weighting the first impression.
    Anchoring,
    /// Over-weighting what comes to mind easily.
    Availability,
    /// Judging by resemblance to a stereotype.
    Representativeness,
    /// Over-weighting the latest exchanges.
    Recency,
    /// Deferring to authority over argument.
    Authority,
    /// Reading through one cultural frame.
    Cultural,
    /// Gendered framing of the participants.
    Gender,
}

impl BiasKind {
    fn cues(self) -> &'static [&'static str] {
        match self {
            Self::Confirmation => &["clearly proves", "as expected", "obviously right"],
            Self::Anchoring => &["from the very first", "initial impression", "first statement set"],
            Self::Availability => &["reminds me of", "recent news", "everyone has heard"],
            Self::Representativeness => &["typical of", "like all such", "exactly what you expect from"],
            Self::Recency => &["final exchange decided", "last round alone", "closing remarks outweigh"],
            Self::Authority => &["because the expert said", "authority settles", "credentials alone"],
            Self::Cultural => &["in our culture", "any reasonable society", "unlike foreigners"],
            Self::Gender => &["for a woman", "for a man", "typical male", "typical female"],
        }
    }
}

/// One bias finding in the judge's verdict.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BiasFinding {
    /// Bias classification.
    pub kind: BiasKind,
    /// Severity in [0, 1].
    pub severity: f64,
    /// Sentence the cue was detected in.
    pub excerpt: String,
}

/// Per-perspective scores for each debater.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerspectiveScores {
    /// Perspective evaluated.
    pub perspective: Perspective,
    /// Debater (stringified role) → score in [0, 1].
    pub scores: BTreeMap<String, f64>,
}

/// The multi-perspective judgment report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JudgmentReport {
    /// Scores along all eight dimensions.
    pub perspectives: Vec<PerspectiveScores>,
    /// Bias findings in the judge's verdict.
    pub biases: Vec<BiasFinding>,
    /// Winning debater (stringified role), `None` on a tie.
    pub winner: Option<String>,
    /// Aggregate margin between the top two debaters.
    pub margin: f64,
    /// Confidence in the verdict, in [0, 1].
    pub confidence: f64,
    /// Mean debater quality across the debate.
    pub overall_quality: f64,
}

/// Build the judgment report.
///
/// # Errors
///
/// Returns an error when no debater turns exist.
pub fn build(turns: &[Turn]) -> Result<JudgmentReport, String> {
    let debater_turns: Vec<&Turn> = turns.iter().filter(|t| t.role.is_debater()).collect();
    if debater_turns.is_empty() {
        return Err("no debater turns to judge".to_string());
    }

    // Group content and strengths per debater.
    let mut per_debater: BTreeMap<String, (String, Vec<f64>)> = BTreeMap::new();
    for turn in &debater_turns {
        let entry = per_debater
            .entry(turn.role.to_string())
            .or_insert_with(|| (String::new(), Vec::new()));
        entry.0.push_str(&turn.content);
        entry.0.push(' ');
        entry.1.push(turn.analysis.strength);
    }

    let perspectives: Vec<PerspectiveScores> = Perspective::ALL
        .iter()
        .map(|&perspective| {
            let scores = per_debater
                .iter()
                .map(|(speaker, (content, strengths))| {
                    (speaker.clone(), perspective_score(perspective, content, strengths))
                })
                .collect();
            PerspectiveScores {
                perspective,
                scores,
            }
        })
        .collect();

    // Aggregate: mean across perspectives per debater.
    let mut aggregates: Vec<(String, f64)> = per_debater
        .keys()
        .map(|speaker| {
            #[allow(clippy::cast_precision_loss)]
            let mean = perspectives
                .iter()
                .filter_map(|p| p.scores.get(speaker))
                .sum::<f64>()
                / perspectives.len() as f64;
            (speaker.clone(), mean)
        })
        .collect();
    aggregates.sort_by(|a, b| b.1.total_cmp(&a.1));

    let margin = if aggregates.len() >= 2 {
        aggregates[0].1 - aggregates[1].1
    } else {
        aggregates[0].1
    };
    let winner = if margin > 0.02 {
        Some(aggregates[0].0.clone())
    } else {
        None
    };

    let biases = turns
        .iter()
        .find(|t| t.role == Role::Judge)
        .map(|judge| detect_biases(&judge.content))
        .unwrap_or_default();

    #[allow(clippy::cast_precision_loss)]
    let overall_quality = debater_turns
        .iter()
        .map(|t| t.analysis.strength)
        .sum::<f64>()
        / debater_turns.len() as f64;

    #[allow(clippy::cast_precision_loss)]
    let confidence = (0.5 + margin * 2.0 - biases.len() as f64 * 0.05).clamp(0.1, 0.95);

    Ok(JudgmentReport {
        perspectives,
        biases,
        winner,
        margin,
        confidence,
        overall_quality,
    })
}

/// Score one debater along one perspective: their mean strength adjusted
/// by how much perspective-relevant material they produced.
fn perspective_score(perspective: Perspective, content: &str, strengths: &[f64]) -> f64 {
    #[allow(clippy::cast_precision_loss)]
    let base = if strengths.is_empty() {
        0.0
    } else {
        strengths.iter().sum::<f64>() / strengths.len() as f64
    };

    let lower = content.to_lowercase();
    let hits = perspective
        .cues()
        .iter()
        .map(|cue| lower.matches(cue).count())
        .sum::<usize>();
    #[allow(clippy::cast_precision_loss)]
    let coverage = (hits as f64 / 4.0).min(1.0);

    (base * 0.7 + coverage * 0.3).clamp(0.0, 1.0)
}

/// Screen a verdict for the eight cognitive biases.
#[must_use]
pub fn detect_biases(verdict: &str) -> Vec<BiasFinding> {
    let mut findings = Vec::new();
    for sentence in verdict.split(['.', '!', '?']) {
        let lower = sentence.to_lowercase();
        for kind in [
            BiasKind::Confirmation,
            BiasKind::Anchoring,
            BiasKind::Availability,
            BiasKind::Representativeness,
            BiasKind::Recency,
            BiasKind::Authority,
            BiasKind::Cultural,
            BiasKind::Gender,
        ] {
            let hits = kind.cues().iter().filter(|c| lower.contains(*c)).count();
            if hits > 0 {
                #[allow(clippy::cast_precision_loss)]
                let severity = (0.4 + hits as f64 * 0.3).min(1.0);
                findings.push(BiasFinding {
                    kind,
                    severity,
                    excerpt: sentence.trim().to_string(),
                });
            }
        }
    }
    findings
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::argument::ArgumentRecord;
    use crate::session::Phase;
    use chrono::Utc;

    fn turn(index: usize, role: Role, content: &str, strength: f64) -> Turn {
        let mut analysis = ArgumentRecord::degraded();
        analysis.strength = strength;
        Turn {
            index,
            role,
            model: "m".into(),
            phase: Phase::Rebuttal,
            content: content.to_string(),
            timestamp: Utc::now(),
            latency_ms: 1,
            tokens: 10,
            analysis,
        }
    }

    #[test]
    fn test_requires_debaters() {
        assert!(build(&[turn(0, Role::Judge, "verdict", 0.5)]).is_err());
    }

    #[test]
    fn test_all_eight_perspectives_scored() {
        let turns = vec![
            turn(0, Role::Debater(0), "The data shows costs fall because automation works", 0.8),
            turn(1, Role::Debater(1), "It is not fair to staff and the law may object", 0.4),
        ];
        let report = build(&turns).unwrap();
        assert_eq!(report.perspectives.len(), 8);
        for scores in &report.perspectives {
            assert_eq!(scores.scores.len(), 2);
            for score in scores.scores.values() {
                assert!((0.0..=1.0).contains(score));
            }
        }
    }

    #[test]
    fn test_stronger_debater_wins() {
        let turns = vec![
            turn(
                0,
                Role::Debater(0),
                "The data shows a 40 percent cost fall because automation works, \
                 therefore the practical case is strong",
                0.9,
            ),
            turn(1, Role::Debater(1), "I just do not like it", 0.2),
        ];
        let report = build(&turns).unwrap();
        assert_eq!(report.winner.as_deref(), Some("debater_a"));
        assert!(report.margin > 0.1);
        assert!(report.confidence > 0.5);
    }

    #[test]
    fn test_tie_yields_no_winner() {
        let turns = vec![
            turn(0, Role::Debater(0), "same words here", 0.5),
            turn(1, Role::Debater(1), "same words here", 0.5),
        ];
        let report = build(&turns).unwrap();
        assert!(report.winner.is_none());
    }

    #[test]
    fn test_bias_detection() {
        let findings = detect_biases(
            "Debater A clearly proves the point, as expected. \
             The final exchange decided it for me. \
             Because the expert said so, the matter is settled.",
        );
        let kinds: Vec<BiasKind> = findings.iter().map(|f| f.kind).collect();
        assert!(kinds.contains(&BiasKind::Confirmation));
        assert!(kinds.contains(&BiasKind::Recency));
        assert!(kinds.contains(&BiasKind::Authority));
    }

    #[test]
    fn test_biases_lower_confidence() {
        let clean = vec![
            turn(0, Role::Debater(0), "strong case with data and 40 percent gains", 0.9),
            turn(1, Role::Debater(1), "weak case", 0.3),
            turn(2, Role::Judge, "Debater A presented stronger evidence overall", 0.5),
        ];
        let biased = vec![
            turn(0, Role::Debater(0), "strong case with data and 40 percent gains", 0.9),
            turn(1, Role::Debater(1), "weak case", 0.3),
            turn(
                2,
                Role::Judge,
                "Debater A clearly proves it, as expected; the final exchange decided it",
                0.5,
            ),
        ];
        let clean_report = build(&clean).unwrap();
        let biased_report = build(&biased).unwrap();
        assert!(biased_report.confidence < clean_report.confidence);
    }
}

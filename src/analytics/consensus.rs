//! Consensus report construction.
//!
//! Mines the transcript for common-ground statements, typed
//! disagreements, and proposed resolutions, and computes a polarisation
//! index. Deterministic lexical analysis over the debaters' turns.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::analysis::similarity::overlap_ratio;
use crate::session::Turn;

/// Overlap at or above which two sentences from different speakers count
/// as shared ground.
const SHARED_OVERLAP: f64 = 0.5;

/// Closed set of seven disagreement types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisagreementType {
    /// What the facts are.
    Factual,
    /// What the words mean.
    Definitional,
    /// How to measure or proceed.
    Methodological,
    /// What matters.
    ValueBased,
    /// What the facts imply.
    Interpretive,
    /// What the rules should be.
    Normative,
    /// What observation shows.
    Empirical,
}

/// Closed set of six resolution types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionType {
    /// Split the difference.
    Compromise,
    /// Merge both positions into a richer one.
    Synthesis,
    /// Replace both with a third option.
    Alternative,
    /// Resolve one question before the next.
    Sequential,
    /// Agree, conditional on facts to be established.
    Conditional,
    /// Combine several of the above.
    Hybrid,
}

/// A detected common-ground item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommonGround {
    /// Representative statement.
    pub statement: String,
    /// Speakers sharing it.
    pub speakers: Vec<String>,
    /// Agreement score in [0, 1].
    pub agreement: f64,
}

/// A typed disagreement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Disagreement {
    /// Disagreement classification.
    pub kind: DisagreementType,
    /// The contested statement.
    pub summary: String,
    /// Speaker who raised it.
    pub raised_by: String,
    /// Intensity in [0, 1].
    pub intensity: f64,
}

/// A proposed resolution for a disagreement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Resolution {
    /// Resolution classification.
    pub kind: ResolutionType,
    /// Concrete proposal text.
    pub proposal: String,
    /// Index of the disagreement it addresses.
    pub addresses: usize,
}

/// The consensus report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsensusReport {
    /// Detected common ground.
    pub common_grounds: Vec<CommonGround>,
    /// Typed disagreements.
    pub disagreements: Vec<Disagreement>,
    /// Proposed resolutions.
    pub resolutions: Vec<Resolution>,
    /// Polarisation index in [0, 1]; higher is more polarised.
    pub polarization_index: f64,
    /// Suggested next steps.
    pub next_steps: Vec<String>,
}

const AGREEMENT_CUES: &[&str] = &["agree", "both sides", "common ground", "concede", "share the"];
const DISAGREEMENT_CUES: &[&str] = &[
    "disagree",
    "wrong",
    "incorrect",
    "flawed",
    "overlooks",
    "fails to",
    "however",
    "on the contrary",
];

/// Build the consensus report over the debaters' turns.
///
/// # Errors
///
/// Returns an error when no debater turns exist.
pub fn build(turns: &[Turn]) -> Result<ConsensusReport, String> {
    let debater_turns: Vec<&Turn> = turns.iter().filter(|t| t.role.is_debater()).collect();
    if debater_turns.is_empty() {
        return Err("no debater turns to analyse".to_string());
    }

    let common_grounds = find_common_ground(&debater_turns);
    let disagreements = find_disagreements(&debater_turns);
    let resolutions = propose_resolutions(&disagreements);
    let polarization_index = polarization(&common_grounds, &disagreements);
    let next_steps = next_steps(&common_grounds, &disagreements, polarization_index);

    Ok(ConsensusReport {
        common_grounds,
        disagreements,
        resolutions,
        polarization_index,
        next_steps,
    })
}

fn sentences(turn: &Turn) -> Vec<String> {
    turn.content
        .split(['.', '!', '?'])
        .map(str::trim)
        .filter(|s| s.split_whitespace().count() >= 4)
        .map(ToOwned::to_owned)
        .collect()
}

fn find_common_ground(debater_turns: &[&Turn]) -> Vec<CommonGround> {
    let mut grounds: Vec<CommonGround> = Vec::new();

    for (i, turn) in debater_turns.iter().enumerate() {
        for sentence in sentences(turn) {
            let lower = sentence.to_lowercase();
            let cued = AGREEMENT_CUES.iter().any(|c| lower.contains(c));

            // A sentence echoed by a different speaker is shared ground
            // even without an explicit cue.
            let mut speakers: BTreeSet<String> = BTreeSet::new();
            speakers.insert(turn.role.to_string());
            let mut best_overlap: f64 = 0.0;
            for other in debater_turns.iter().skip(i + 1) {
                if other.role == turn.role {
                    continue;
                }
                let overlap = overlap_ratio(&sentence, &other.content);
                if overlap >= SHARED_OVERLAP {
                    speakers.insert(other.role.to_string());
                    best_overlap = best_overlap.max(overlap);
                }
            }

            if cued || speakers.len() > 1 {
                let agreement = if cued {
                    (best_overlap + 0.5).min(1.0)
                } else {
                    best_overlap
                };
                if grounds.iter().all(|g| overlap_ratio(&g.statement, &sentence) < 0.8) {
                    grounds.push(CommonGround {
                        statement: sentence,
                        speakers: speakers.into_iter().collect(),
                        agreement,
                    });
                }
            }
        }
    }

    grounds.truncate(8);
    grounds
}

fn classify_disagreement(sentence: &str) -> DisagreementType {
    let lower = sentence.to_lowercase();
    let has_digits = sentence.chars().any(|c| c.is_ascii_digit());

    if lower.contains("define") || lower.contains("definition") || lower.contains("what we mean") {
        DisagreementType::Definitional
    } else if lower.contains("method") || lower.contains("approach") || lower.contains("measure") {
        DisagreementType::Methodological
    } else if lower.contains("should") || lower.contains("ought") || lower.contains("moral") {
        DisagreementType::ValueBased
    } else if lower.contains("policy") || lower.contains("standard") || lower.contains("rule") {
        DisagreementType::Normative
    } else if lower.contains("evidence") || lower.contains("study") || lower.contains("observed") {
        DisagreementType::Empirical
    } else if has_digits || lower.contains("fact") || lower.contains("data") {
        DisagreementType::Factual
    } else {
        DisagreementType::Interpretive
    }
}

fn find_disagreements(debater_turns: &[&Turn]) -> Vec<Disagreement> {
    let mut disagreements = Vec::new();

    for turn in debater_turns {
        for sentence in sentences(turn) {
            let lower = sentence.to_lowercase();
            let hits = DISAGREEMENT_CUES.iter().filter(|c| lower.contains(*c)).count();
            if hits == 0 {
                continue;
            }
            #[allow(clippy::cast_precision_loss)]
            let intensity =
                (0.4 + hits as f64 * 0.2 + (1.0 - turn.analysis.strength) * 0.2).clamp(0.0, 1.0);
            disagreements.push(Disagreement {
                kind: classify_disagreement(&sentence),
                summary: sentence,
                raised_by: turn.role.to_string(),
                intensity,
            });
        }
    }

    disagreements.truncate(10);
    disagreements
}

fn propose_resolutions(disagreements: &[Disagreement]) -> Vec<Resolution> {
    let mut resolutions: Vec<Resolution> = disagreements
        .iter()
        .enumerate()
        .map(|(i, d)| {
            let (kind, proposal) = match d.kind {
                DisagreementType::Factual => (
                    ResolutionType::Conditional,
                    "agree conditionally, pending verification of the contested facts",
                ),
                DisagreementType::Empirical => (
                    ResolutionType::Conditional,
                    "commission the missing observation before settling the point",
                ),
                DisagreementType::Definitional => (
                    ResolutionType::Synthesis,
                    "adopt a shared definition combining both usages",
                ),
                DisagreementType::Interpretive => (
                    ResolutionType::Synthesis,
                    "combine both readings into a fuller interpretation",
                ),
                DisagreementType::Methodological => (
                    ResolutionType::Sequential,
                    "settle the measurement approach first, then revisit the claim",
                ),
                DisagreementType::ValueBased => (
                    ResolutionType::Compromise,
                    "trade partial concessions on the contested priorities",
                ),
                DisagreementType::Normative => (
                    ResolutionType::Compromise,
                    "pilot a middle-ground rule and review it",
                ),
            };
            Resolution {
                kind,
                proposal: proposal.to_string(),
                addresses: i,
            }
        })
        .collect();

    // Many disagreements of mixed kinds call for a combined plan.
    if disagreements.len() >= 3 {
        resolutions.push(Resolution {
            kind: ResolutionType::Hybrid,
            proposal: "sequence the factual checks, then negotiate the value trade-offs"
                .to_string(),
            addresses: 0,
        });
    }

    resolutions
}

fn polarization(common: &[CommonGround], disagreements: &[Disagreement]) -> f64 {
    if common.is_empty() && disagreements.is_empty() {
        return 0.5;
    }
    #[allow(clippy::cast_precision_loss)]
    let share = disagreements.len() as f64 / (common.len() + disagreements.len()) as f64;
    let mean_intensity = if disagreements.is_empty() {
        0.0
    } else {
        #[allow(clippy::cast_precision_loss)]
        let mean = disagreements.iter().map(|d| d.intensity).sum::<f64>()
            / disagreements.len() as f64;
        mean
    };
    (share * 0.6 + mean_intensity * 0.4).clamp(0.0, 1.0)
}

fn next_steps(
    common: &[CommonGround],
    disagreements: &[Disagreement],
    polarization: f64,
) -> Vec<String> {
    let mut steps = Vec::new();
    if !common.is_empty() {
        steps.push(format!(
            "build on the {} shared point(s) as the starting frame",
            common.len()
        ));
    }
    if disagreements
        .iter()
        .any(|d| matches!(d.kind, DisagreementType::Factual | DisagreementType::Empirical))
    {
        steps.push("resolve the factual and empirical questions with data first".to_string());
    }
    if polarization > 0.7 {
        steps.push("introduce a neutral mediator before the next exchange".to_string());
    }
    if steps.is_empty() {
        steps.push("document the positions and revisit after reflection".to_string());
    }
    steps
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::argument::ArgumentRecord;
    use crate::session::{Phase, Role};
    use chrono::Utc;

    fn turn(index: usize, role: Role, content: &str) -> Turn {
        let mut analysis = ArgumentRecord::degraded();
        analysis.strength = 0.6;
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
    fn test_requires_debater_turns() {
        let judge_only = vec![turn(0, Role::Judge, "the verdict favours side a")];
        assert!(build(&judge_only).is_err());
    }

    #[test]
    fn test_finds_explicit_agreement() {
        let turns = vec![
            turn(
                0,
                Role::Debater(0),
                "I agree that customer satisfaction is the goal we both pursue here.",
            ),
            turn(
                1,
                Role::Debater(1),
                "Customer satisfaction is the goal we both pursue, but staffing matters.",
            ),
        ];
        let report = build(&turns).unwrap();
        assert!(!report.common_grounds.is_empty());
    }

    #[test]
    fn test_types_disagreements() {
        let turns = vec![
            turn(
                0,
                Role::Debater(0),
                "Your numbers are wrong because the data covers only one quarter of 2024.",
            ),
            turn(
                1,
                Role::Debater(1),
                "That approach is flawed, the method should measure retention instead.",
            ),
            turn(
                2,
                Role::Debater(0),
                "We disagree about what we mean when we define a resolved ticket.",
            ),
        ];
        let report = build(&turns).unwrap();
        let kinds: Vec<DisagreementType> = report.disagreements.iter().map(|d| d.kind).collect();
        assert!(kinds.contains(&DisagreementType::Factual));
        assert!(kinds.contains(&DisagreementType::Methodological));
        assert!(kinds.contains(&DisagreementType::Definitional));
    }

    #[test]
    fn test_every_disagreement_gets_a_resolution() {
        let turns = vec![
            turn(0, Role::Debater(0), "That claim is simply wrong and overlooks the cost data."),
            turn(1, Role::Debater(1), "I disagree, we should value people over efficiency."),
        ];
        let report = build(&turns).unwrap();
        assert!(report.resolutions.len() >= report.disagreements.len());
        for resolution in &report.resolutions {
            assert!(resolution.addresses < report.disagreements.len());
        }
    }

    #[test]
    fn test_polarization_bounds() {
        let hostile = vec![
            turn(0, Role::Debater(0), "Everything you said is wrong, flawed and incorrect."),
            turn(1, Role::Debater(1), "No, your position is wrong and overlooks the facts."),
        ];
        let report = build(&hostile).unwrap();
        assert!((0.0..=1.0).contains(&report.polarization_index));
        assert!(report.polarization_index > 0.5);
        assert!(!report.next_steps.is_empty());
    }
}

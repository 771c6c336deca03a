//! Final report synthesis.
//!
//! Integrates the chain graph, consensus report, and judgment into one
//! prose artifact. Missing sub-analyses are noted, never fatal: the
//! report always exists.

use super::chains::ArgumentChainGraph;
use super::consensus::ConsensusReport;
use super::judgment::JudgmentReport;
use crate::analysis::rounds::RoundAction;
use crate::session::Session;

/// Render the final report.
#[must_use]
pub fn render(
    session: &Session,
    chains: Option<&ArgumentChainGraph>,
    consensus: Option<&ConsensusReport>,
    judgment: Option<&JudgmentReport>,
    omissions: &[String],
) -> String {
    let mut out = String::new();

    out.push_str(&format!("# Debate report: {}\n\n", session.topic));
    out.push_str(&format!(
        "- Status: {}\n- Rounds: {} ({} debate)\n- Turns: {}\n",
        session.status,
        session.rounds.len(),
        session.debate_round_count(),
        session.transcript().len(),
    ));
    if let Some(duration) = session.duration_ms() {
        out.push_str(&format!("- Duration: {:.1}s\n", duration as f64 / 1000.0));
    }
    out.push_str(&format!(
        "- Tokens: {} (est. ${:.4}), errors: {}\n",
        session.stats.total_tokens, session.stats.cost_estimate, session.stats.error_count
    ));

    if was_truncated(session) {
        out.push_str(
            "\n> The exchange was truncated early by the adaptive round manager; \
             later phases were skipped.\n",
        );
    }

    out.push_str("\n## Participants\n");
    for (role, model) in &session.assignment {
        out.push_str(&format!("- {role}: {model}\n"));
    }
    if !session.rotation_events.is_empty() {
        out.push_str(&format!(
            "\n{} rotation(s) occurred during the debate:\n",
            session.rotation_events.len()
        ));
        for rotation in &session.rotation_events {
            out.push_str(&format!(
                "- {}: {} → {} ({})\n",
                rotation.role, rotation.old_model, rotation.new_model, rotation.reason
            ));
        }
    }

    out.push_str("\n## Verdict\n");
    if let Some(judgment) = judgment {
        match &judgment.winner {
            Some(winner) => out.push_str(&format!(
                "**{winner}** prevails with a margin of {:.3} (confidence {:.2}).\n",
                judgment.margin, judgment.confidence
            )),
            None => out.push_str("The debate ends in a tie.\n"),
        }
        out.push_str(&format!(
            "Overall debate quality: {:.2}.\n",
            judgment.overall_quality
        ));
        if !judgment.biases.is_empty() {
            out.push_str(&format!(
                "{} potential cognitive bias(es) detected in the verdict.\n",
                judgment.biases.len()
            ));
        }
    }

    if let Some(chains) = chains {
        out.push_str("\n## Argument chains\n");
        out.push_str(&format!(
            "{} reference edge(s) across {} turns.\n",
            chains.edges.len(),
            chains.node_count
        ));
        for (i, chain) in chains.strongest.iter().enumerate() {
            out.push_str(&format!(
                "{}. turns {:?}: cumulative strength {:.2}, depth {}\n",
                i + 1,
                chain.turns,
                chain.cumulative_strength,
                chain.depth
            ));
        }
    }

    if let Some(consensus) = consensus {
        out.push_str("\n## Consensus\n");
        out.push_str(&format!(
            "Common ground: {}, disagreements: {}, proposed resolutions: {}. \
             Polarisation index: {:.2}.\n",
            consensus.common_grounds.len(),
            consensus.disagreements.len(),
            consensus.resolutions.len(),
            consensus.polarization_index
        ));
        for step in &consensus.next_steps {
            out.push_str(&format!("- next: {step}\n"));
        }
    }

    if let Some(judge_turn) = session.judgment_turn() {
        out.push_str("\n## Judge's verdict\n");
        out.push_str(&judge_turn.content);
        out.push('\n');
    }

    if !omissions.is_empty() {
        out.push_str("\n## Omitted analyses\n");
        for omission in omissions {
            out.push_str(&format!("- {omission}\n"));
        }
    }

    out
}

/// Whether any round decision cut the exchange short.
fn was_truncated(session: &Session) -> bool {
    session.rounds.iter().any(|r| {
        r.decision
            .as_ref()
            .is_some_and(|d| matches!(d.action, RoundAction::TerminateEarly | RoundAction::Reduce))
    })
}

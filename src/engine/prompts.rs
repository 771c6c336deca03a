//! Prompt composition for debate turns.
//!
//! Every prompt is assembled from the topic, the optional reference
//! blob, the (phase, role) system instruction, and the transcript so
//! far, compressed when it would exceed the configured token ceiling.

use crate::llm::Prompt;
use crate::session::{Phase, Role, Session, Turn};

/// Rough chars-per-token ratio used for the compression estimate.
const CHARS_PER_TOKEN: usize = 4;
/// Recent turns always kept verbatim during compression.
const KEEP_RECENT: usize = 6;

/// What kind of utterance the turn should produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnIntent {
    /// A positional statement (opening, round, closing).
    Statement,
    /// A cross-examination question.
    Question,
    /// A cross-examination answer.
    Answer,
}

/// Prompt builder bound to a transcript token ceiling.
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    token_ceiling: usize,
}

impl PromptBuilder {
    /// Create a builder.
    #[must_use]
    pub fn new(token_ceiling: usize) -> Self {
        Self { token_ceiling }
    }

    /// Compose the prompt for a turn.
    #[must_use]
    pub fn build(
        &self,
        session: &Session,
        role: Role,
        phase: Phase,
        intent: TurnIntent,
    ) -> Prompt {
        let system = system_instruction(role, phase, intent);

        let mut user = format!("Debate topic: {}\n", session.topic);
        if let Some(reference) = &session.reference {
            user.push_str(&format!("\nReference material:\n{reference}\n"));
        }

        let transcript = session.transcript();
        if !transcript.is_empty() {
            user.push_str("\nDebate so far:\n");
            user.push_str(&self.render_transcript(&transcript));
        }

        user.push_str(&format!("\n{}", closing_request(role, phase, intent)));

        let temperature = if role == Role::Judge { 0.3 } else { 0.8 };
        let max_tokens = if role == Role::Judge { 2_048 } else { 1_024 };

        Prompt::new(system, user)
            .with_temperature(temperature)
            .with_max_tokens(max_tokens)
    }

    /// Render the transcript, eliding middle turns once the estimate
    /// exceeds the ceiling. The opening turns and the most recent turns
    /// survive compression.
    fn render_transcript(&self, turns: &[Turn]) -> String {
        let total_chars: usize = turns.iter().map(|t| t.content.len()).sum();
        if total_chars / CHARS_PER_TOKEN <= self.token_ceiling || turns.len() <= KEEP_RECENT + 2 {
            return turns.iter().map(render_turn).collect();
        }

        let head = 2.min(turns.len());
        let tail_start = turns.len() - KEEP_RECENT.min(turns.len() - head);

        let mut out = String::new();
        for turn in &turns[..head] {
            out.push_str(&render_turn(turn));
        }
        out.push_str(&format!(
            "[... {} earlier turn(s) elided ...]\n\n",
            tail_start - head
        ));
        for turn in &turns[tail_start..] {
            out.push_str(&render_turn(turn));
        }
        out
    }
}

fn render_turn(turn: &Turn) -> String {
    format!("[{}] {}\n\n", turn.role, turn.content)
}

fn system_instruction(role: Role, phase: Phase, intent: TurnIntent) -> String {
    match role {
        Role::Judge => "You are the judge of a structured debate. Weigh the arguments \
            on their merits: evidence quality, logical consistency, and responsiveness \
            to the opposing side. Stay neutral and explain your reasoning."
            .to_string(),
        Role::Debater(i) => {
            let stance = if i % 2 == 0 {
                "You argue in favour of the motion."
            } else {
                "You argue against the motion."
            };
            let phase_guide = match (phase, intent) {
                (Phase::Opening, _) => {
                    "Present your opening position: your strongest claims, each backed by evidence."
                }
                (Phase::FirstRound | Phase::Rebuttal, _) => {
                    "Rebut the opposing side's most recent points directly, then advance your case."
                }
                (Phase::CrossExamination, TurnIntent::Question) => {
                    "Ask one pointed question exposing the weakest link in the opposing argument."
                }
                (Phase::CrossExamination, _) => {
                    "Answer the question directly before adding context."
                }
                (Phase::Closing, _) => {
                    "Summarise your strongest surviving arguments. Introduce nothing new."
                }
                _ => "Contribute your strongest argument for this stage.",
            };
            format!("You are {role} in a structured debate. {stance} {phase_guide}")
        }
    }
}

fn closing_request(role: Role, phase: Phase, intent: TurnIntent) -> &'static str {
    match (role, phase, intent) {
        (Role::Judge, _, _) => {
            "Deliver your judgment: name the winner, the margin, and the decisive arguments."
        }
        (_, Phase::CrossExamination, TurnIntent::Question) => "Pose your question now:",
        (_, Phase::CrossExamination, _) => "Give your answer now:",
        (_, Phase::Closing, _) => "Give your closing statement now:",
        _ => "Give your argument now:",
    }
}

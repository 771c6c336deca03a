//! Post-debate analytics.
//!
//! Runs once when a session reaches judgment: the argument-chain graph,
//! the consensus report, the multi-perspective judgment, and the final
//! prose report. Each sub-analysis degrades independently: a failure
//! omits that section and is noted in the report, which always exists.

pub mod chains;
pub mod consensus;
pub mod judgment;
pub mod report;

pub use chains::ArgumentChainGraph;
pub use consensus::{ConsensusReport, DisagreementType, ResolutionType};
pub use judgment::{BiasKind, JudgmentReport, Perspective};

use serde::{Deserialize, Serialize};

use crate::logging::OpTimer;
use crate::session::Session;

/// Analysis artifact selector for the engine API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalyticsKind {
    /// The argument-chain graph.
    ArgumentChains,
    /// The consensus report.
    Consensus,
    /// The multi-perspective judgment.
    Judgment,
    /// The final prose report.
    FinalReport,
}

/// The complete analytics artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebateAnalytics {
    /// Argument-chain graph, if it could be built.
    pub chains: Option<ArgumentChainGraph>,
    /// Consensus report, if it could be built.
    pub consensus: Option<ConsensusReport>,
    /// Multi-perspective judgment, if it could be built.
    pub judgment: Option<JudgmentReport>,
    /// The final prose report. Always present.
    pub report: String,
    /// Reasons for omitted sections.
    pub omissions: Vec<String>,
    /// Generation timestamp.
    pub generated_at: chrono::DateTime<chrono::Utc>,
}

/// Run all analyses over a session.
#[must_use]
pub fn run(session: &Session) -> DebateAnalytics {
    let timer = OpTimer::new("analytics", format!("session {}", session.id));
    let turns = session.transcript();
    let mut omissions = Vec::new();

    let chains = match chains::build(&turns) {
        Ok(graph) => Some(graph),
        Err(reason) => {
            tracing::warn!(session_id = %session.id, reason = %reason, "Chain analysis omitted");
            omissions.push(format!("argument chains: {reason}"));
            None
        }
    };

    let consensus = match consensus::build(&turns) {
        Ok(report) => Some(report),
        Err(reason) => {
            tracing::warn!(session_id = %session.id, reason = %reason, "Consensus analysis omitted");
            omissions.push(format!("consensus: {reason}"));
            None
        }
    };

    let judgment = match judgment::build(&turns) {
        Ok(report) => Some(report),
        Err(reason) => {
            tracing::warn!(session_id = %session.id, reason = %reason, "Judgment analysis omitted");
            omissions.push(format!("judgment: {reason}"));
            None
        }
    };

    let report = report::render(
        session,
        chains.as_ref(),
        consensus.as_ref(),
        judgment.as_ref(),
        &omissions,
    );

    timer.finish();

    DebateAnalytics {
        chains,
        consensus,
        judgment,
        report,
        omissions,
        generated_at: chrono::Utc::now(),
    }
}

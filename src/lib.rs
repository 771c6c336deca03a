//! Parley: multi-model debate orchestration runtime.
//!
//! Drives a bounded, multi-phase argumentative exchange between several
//! LLM participants in assigned roles (two or more debaters plus a
//! judge), adjudicates the outcome, and produces a structured analytical
//! artifact from the transcript:
//!
//! - **Phase state machine** with strict turn ordering
//!   (opening → rounds → rebuttal → cross-examination → closing → judgment)
//! - **Fault isolation**: bounded retries with full-jitter backoff,
//!   per-(model, family) circuit breakers shared across sessions, a
//!   per-session retry budget, and an optional fallback provider
//! - **Adaptive control**: five rotation strategies over the model pool
//!   and a round manager that extends, reduces, or terminates the
//!   exchange from quality/engagement/novelty/time signals
//! - **Per-turn scoring**: argument structure, typed evidence, fallacy
//!   findings, and a composite strength score
//! - **Post-debate analytics**: argument-chain graph, consensus report,
//!   multi-perspective judgment with bias screening, final report
//!
//! # Architecture
//!
//! - [`config`]: runtime configuration and validation
//! - [`llm`]: the model-client seam and concrete providers
//! - [`resilience`]: retry, breaker, and fallback policy
//! - [`pool`]: model pool, performance records, rotation engine
//! - [`session`]: the session/round/turn data model
//! - [`analysis`]: per-turn and per-round quality evaluation
//! - [`engine`]: the orchestrator and the session lifecycle API
//! - [`events`]: ordered observer events and replay
//! - [`analytics`]: post-debate analyses
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use parley::config::DebateConfig;
//! use parley::engine::{DebateEngine, SessionSpec};
//! use parley::llm::providers::{create_client, ProviderSettings};
//! use parley::pool::{Capability, CostTier, ModelPool, ModelSpec};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = DebateConfig::load()?;
//!     let client = create_client(ProviderSettings::openai_compat(
//!         "https://openrouter.ai/api",
//!         std::env::var("OPENROUTER_API_KEY").ok(),
//!     ));
//!     let pool = ModelPool::new(vec![
//!         ModelSpec::new("anthropic/claude-sonnet-4", "Sonnet", CostTier::Premium,
//!             vec![Capability::Reasoning, Capability::NeutralJudgment]),
//!         ModelSpec::new("openai/gpt-4o", "GPT-4o", CostTier::Premium,
//!             vec![Capability::Creativity, Capability::BroadKnowledge]),
//!     ]);
//!
//!     let engine = DebateEngine::new(config, client, pool);
//!     let id = engine.create_session(
//!         SessionSpec::new("Should we adopt AI customer support?").with_max_rounds(3),
//!     )?;
//!     engine.start_session(id)?;
//!     Ok(())
//! }
//! ```

pub mod analysis;
pub mod analytics;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod llm;
pub mod logging;
pub mod pool;
pub mod resilience;
pub mod session;

pub use config::DebateConfig;
pub use engine::{DebateEngine, SessionSpec};
pub use error::{ApiError, FailureKind};
pub use session::{Phase, Role, SessionId, SessionStatus};

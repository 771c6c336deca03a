//! Debate engine: the session lifecycle API.
//!
//! Owns the process-wide collaborators (model pool, breaker table, retry
//! ledger, event bus) and a registry of sessions. Sessions run in
//! parallel, each on its own task, strictly serial inside.
//!
//! # Example
//!
//! ```rust,ignore
//! use parley::engine::{DebateEngine, SessionSpec};
//!
//! let engine = DebateEngine::new(config, client, pool);
//! let id = engine.create_session(SessionSpec::new("Adopt AI customer support"))?;
//! let mut events = engine.subscribe(id);
//! engine.start_session(id)?;
//! while let Ok(event) = events.recv().await {
//!     println!("{:?}", event.kind);
//! }
//! ```

pub mod orchestrator;
pub mod prompts;

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::{broadcast, mpsc};

use crate::analysis::ArgumentAnalyzer;
use crate::analytics::{AnalyticsKind, DebateAnalytics};
use crate::config::DebateConfig;
use crate::error::ApiError;
use crate::events::{EventBus, SessionEvent};
use crate::llm::{ModelClient, ModelId, NoopObserver, ObserverHandle};
use crate::pool::{ModelPool, PoolSummary, RotationEngine, RotationStrategy};
use crate::resilience::{BreakerRegistry, GuardedClient, RetryLedger, RetryPolicy};
use crate::session::{Session, SessionId, SessionStatus, Turn};

use orchestrator::{Command, SessionRunner};

/// Parameters for a new session.
#[derive(Debug, Clone)]
pub struct SessionSpec {
    /// Debate topic.
    pub topic: String,
    /// Optional reference data, opaque to the runtime.
    pub reference: Option<String>,
    /// Number of debaters (≥ 2).
    pub debaters: u8,
    /// Rotation strategy override.
    pub rotation_strategy: Option<RotationStrategy>,
    /// Debate-round cap override.
    pub max_rounds: Option<u32>,
    /// Session wall-clock budget override, in seconds.
    pub session_budget_secs: Option<u64>,
}

impl SessionSpec {
    /// A two-debater session with defaults from configuration.
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            reference: None,
            debaters: 2,
            rotation_strategy: None,
            max_rounds: None,
            session_budget_secs: None,
        }
    }

    /// Attach reference data.
    #[must_use]
    pub fn with_reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = Some(reference.into());
        self
    }

    /// Set the debater count.
    #[must_use]
    pub const fn with_debaters(mut self, debaters: u8) -> Self {
        self.debaters = debaters;
        self
    }

    /// Set the rotation strategy.
    #[must_use]
    pub const fn with_rotation_strategy(mut self, strategy: RotationStrategy) -> Self {
        self.rotation_strategy = Some(strategy);
        self
    }

    /// Cap the debate rounds.
    #[must_use]
    pub const fn with_max_rounds(mut self, max_rounds: u32) -> Self {
        self.max_rounds = Some(max_rounds);
        self
    }

    /// Set the session wall-clock budget in seconds.
    #[must_use]
    pub const fn with_budget_secs(mut self, secs: u64) -> Self {
        self.session_budget_secs = Some(secs);
        self
    }
}

/// One typed analytics artifact.
#[derive(Debug, Clone)]
pub enum AnalyticsArtifact {
    /// The argument-chain graph.
    Chains(crate::analytics::ArgumentChainGraph),
    /// The consensus report.
    Consensus(crate::analytics::ConsensusReport),
    /// The multi-perspective judgment.
    Judgment(crate::analytics::JudgmentReport),
    /// The final prose report.
    Report(String),
}

struct SessionHandle {
    session: Arc<RwLock<Session>>,
    commands: mpsc::UnboundedSender<Command>,
    /// Mailbox receiver, handed to the runner at start.
    receiver: Option<mpsc::UnboundedReceiver<Command>>,
    analytics: Arc<RwLock<Option<DebateAnalytics>>>,
    effective_config: DebateConfig,
    started: bool,
}

/// The debate engine.
///
/// Cheap to clone; clones share all process-wide state.
#[derive(Clone)]
pub struct DebateEngine {
    config: DebateConfig,
    client: Arc<dyn ModelClient>,
    fallback: Option<Arc<dyn ModelClient>>,
    observer: ObserverHandle,
    analyzer_model: Option<ModelId>,
    pool: ModelPool,
    breakers: BreakerRegistry,
    ledger: RetryLedger,
    bus: EventBus,
    sessions: Arc<RwLock<HashMap<SessionId, SessionHandle>>>,
}

impl std::fmt::Debug for DebateEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DebateEngine")
            .field("models", &self.pool.len())
            .field("sessions", &self.sessions.read().len())
            .finish()
    }
}

impl DebateEngine {
    /// Create an engine over the given provider client and pool.
    #[must_use]
    pub fn new(config: DebateConfig, client: Arc<dyn ModelClient>, pool: ModelPool) -> Self {
        let breakers = BreakerRegistry::new(config.breaker.clone());
        let ledger = RetryLedger::new(config.session_retry_budget);
        Self {
            config,
            client,
            fallback: None,
            observer: Arc::new(NoopObserver),
            analyzer_model: None,
            pool,
            breakers,
            ledger,
            bus: EventBus::new(),
            sessions: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Attach a fallback provider tried when the primary's policy is
    /// exhausted.
    #[must_use]
    pub fn with_fallback(mut self, fallback: Arc<dyn ModelClient>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    /// Attach a metrics observer.
    #[must_use]
    pub fn with_observer(mut self, observer: ObserverHandle) -> Self {
        self.observer = observer;
        self
    }

    /// Route argument-structure consultation to a dedicated analyzer
    /// model. Without one, the analyzer runs its deterministic
    /// evaluators only.
    #[must_use]
    pub fn with_analyzer_model(mut self, model: impl Into<ModelId>) -> Self {
        self.analyzer_model = Some(model.into());
        self
    }

    /// The shared breaker registry.
    #[must_use]
    pub fn breakers(&self) -> &BreakerRegistry {
        &self.breakers
    }

    /// The shared model pool.
    #[must_use]
    pub fn pool(&self) -> &ModelPool {
        &self.pool
    }

    /// Create a session. Rejects invalid configuration without
    /// allocating anything.
    pub fn create_session(&self, spec: SessionSpec) -> Result<SessionId, ApiError> {
        if spec.topic.trim().is_empty() {
            return Err(ApiError::InvalidConfig("topic must not be empty".into()));
        }
        if spec.debaters < 2 {
            return Err(ApiError::InvalidConfig(format!(
                "at least 2 debaters required, got {}",
                spec.debaters
            )));
        }
        if spec.debaters > 26 {
            return Err(ApiError::InvalidConfig(format!(
                "at most 26 debaters supported, got {}",
                spec.debaters
            )));
        }

        let mut effective_config = self.config.clone();
        if let Some(max_rounds) = spec.max_rounds {
            if max_rounds < effective_config.min_rounds {
                return Err(ApiError::InvalidConfig(format!(
                    "max_rounds {} below min_rounds {}",
                    max_rounds, effective_config.min_rounds
                )));
            }
            effective_config.max_rounds = max_rounds;
        }
        if let Some(budget) = spec.session_budget_secs {
            if budget == 0 {
                return Err(ApiError::InvalidConfig(
                    "session budget must be positive".into(),
                ));
            }
            effective_config.session_budget_secs = budget;
        }

        let assignment = self.pool.assign_roles(spec.debaters).ok_or_else(|| {
            ApiError::InvalidConfig("model pool is empty".into())
        })?;

        let strategy = spec
            .rotation_strategy
            .unwrap_or(self.config.rotation_strategy);
        let planned = effective_config.min_rounds.min(effective_config.max_rounds);

        let session = Session::new(
            spec.topic,
            spec.reference,
            spec.debaters,
            assignment,
            planned,
            effective_config.max_rounds,
            strategy,
        );
        let id = session.id;

        let (tx, rx) = mpsc::unbounded_channel();
        let handle = SessionHandle {
            session: Arc::new(RwLock::new(session)),
            commands: tx,
            receiver: Some(rx),
            analytics: Arc::new(RwLock::new(None)),
            effective_config,
            started: false,
        };
        self.sessions.write().insert(id, handle);

        tracing::info!(session_id = %id, "Session created");
        Ok(id)
    }

    /// Start a session's orchestration task.
    pub fn start_session(&self, id: SessionId) -> Result<(), ApiError> {
        let (session, analytics, effective_config, rx) = {
            let mut sessions = self.sessions.write();
            let handle = sessions.get_mut(&id).ok_or(ApiError::NotFound(id))?;
            if handle.started {
                return Err(ApiError::AlreadyStarted(id));
            }
            let rx = handle
                .receiver
                .take()
                .ok_or(ApiError::AlreadyStarted(id))?;
            handle.started = true;
            (
                handle.session.clone(),
                handle.analytics.clone(),
                handle.effective_config.clone(),
                rx,
            )
        };

        let guarded = GuardedClient::new(
            self.client.clone(),
            self.fallback.clone(),
            self.breakers.clone(),
            RetryPolicy::new(effective_config.retry.clone()),
            self.ledger.clone(),
            self.observer.clone(),
        );
        let rotation = RotationEngine::new(
            self.pool.clone(),
            self.breakers.clone(),
            effective_config.min_calls_before_rotation,
        );
        let mut analyzer = ArgumentAnalyzer::new(effective_config.strength_weights);
        if let Some(model) = &self.analyzer_model {
            analyzer = analyzer.with_consultation(self.client.clone(), model.clone());
        }

        let runner = SessionRunner::new(
            session,
            effective_config,
            guarded,
            self.pool.clone(),
            rotation,
            analyzer,
            self.bus.clone(),
            rx,
            analytics,
        );
        tokio::spawn(runner.run());

        tracing::info!(session_id = %id, "Session started");
        Ok(())
    }

    /// Request a pause. The in-flight turn finishes first.
    pub fn pause_session(&self, id: SessionId) -> Result<(), ApiError> {
        self.send_command(id, Command::Pause, "pause", &[SessionStatus::Running])
    }

    /// Resume a paused session.
    pub fn resume_session(&self, id: SessionId) -> Result<(), ApiError> {
        self.send_command(
            id,
            Command::Resume,
            "resume",
            &[SessionStatus::Running, SessionStatus::Paused],
        )
    }

    /// Cancel a session immediately. The in-flight turn is discarded.
    /// Cancelling an already-terminal session is a no-op.
    pub fn cancel_session(&self, id: SessionId) -> Result<(), ApiError> {
        let sessions = self.sessions.read();
        let handle = sessions.get(&id).ok_or(ApiError::NotFound(id))?;
        let _ = handle.commands.send(Command::Cancel);
        Ok(())
    }

    /// Full session snapshot.
    pub fn get_session(&self, id: SessionId) -> Result<Session, ApiError> {
        let sessions = self.sessions.read();
        let handle = sessions.get(&id).ok_or(ApiError::NotFound(id))?;
        let result = handle.session.read().clone();
        Ok(result)
    }

    /// Ordered turns from the given global index.
    pub fn get_transcript(&self, id: SessionId, from: usize) -> Result<Vec<Turn>, ApiError> {
        let sessions = self.sessions.read();
        let handle = sessions.get(&id).ok_or(ApiError::NotFound(id))?;
        let result = handle.session.read().transcript_from(from);
        Ok(result)
    }

    /// One analytics artifact. `NotReady` until the session completed
    /// and the requested section was produced.
    pub fn get_analytics(
        &self,
        id: SessionId,
        kind: AnalyticsKind,
    ) -> Result<AnalyticsArtifact, ApiError> {
        let sessions = self.sessions.read();
        let handle = sessions.get(&id).ok_or(ApiError::NotFound(id))?;
        let analytics = handle.analytics.read();
        let analytics = analytics.as_ref().ok_or(ApiError::NotReady(id))?;

        match kind {
            AnalyticsKind::ArgumentChains => analytics
                .chains
                .clone()
                .map(AnalyticsArtifact::Chains)
                .ok_or(ApiError::NotReady(id)),
            AnalyticsKind::Consensus => analytics
                .consensus
                .clone()
                .map(AnalyticsArtifact::Consensus)
                .ok_or(ApiError::NotReady(id)),
            AnalyticsKind::Judgment => analytics
                .judgment
                .clone()
                .map(AnalyticsArtifact::Judgment)
                .ok_or(ApiError::NotReady(id)),
            AnalyticsKind::FinalReport => Ok(AnalyticsArtifact::Report(analytics.report.clone())),
        }
    }

    /// Change the rotation strategy; takes effect at the next phase
    /// boundary.
    pub fn set_rotation_strategy(
        &self,
        id: SessionId,
        strategy: RotationStrategy,
    ) -> Result<(), ApiError> {
        let sessions = self.sessions.read();
        let handle = sessions.get(&id).ok_or(ApiError::NotFound(id))?;
        let mut session = handle.session.write();
        if session.status.is_terminal() {
            return Err(ApiError::InvalidConfig(format!(
                "session {id} is {}; strategy is fixed",
                session.status
            )));
        }
        session.rotation_strategy = strategy;
        Ok(())
    }

    /// Subscribe to a session's ordered events.
    pub fn subscribe(&self, id: SessionId) -> broadcast::Receiver<SessionEvent> {
        self.bus.subscribe(id)
    }

    /// Pool performance summary.
    #[must_use]
    pub fn performance_summary(&self) -> PoolSummary {
        self.pool.performance_summary()
    }

    fn send_command(
        &self,
        id: SessionId,
        command: Command,
        operation: &'static str,
        allowed: &[SessionStatus],
    ) -> Result<(), ApiError> {
        let sessions = self.sessions.read();
        let handle = sessions.get(&id).ok_or(ApiError::NotFound(id))?;
        let status = handle.session.read().status;
        if !allowed.contains(&status) {
            return Err(ApiError::InvalidState {
                id,
                state: status.to_string(),
                operation,
            });
        }
        let _ = handle.commands.send(command);
        Ok(())
    }
}

//! Per-session orchestration task.
//!
//! One [`SessionRunner`] per session drives the phase machine through a
//! strictly serial step loop: evaluate rotation at phase boundaries,
//! compose the prompt, invoke the guarded client, analyze and append the
//! turn, and consult the round manager at round boundaries. A command
//! mailbox carries pause/resume/cancel; the only suspension point is the
//! model call, and cancellation there discards the in-flight result.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use parking_lot::RwLock;
use tokio::sync::mpsc;

use super::prompts::{PromptBuilder, TurnIntent};
use crate::analysis::rounds::{AdaptiveRoundManager, RoundAction};
use crate::analysis::ArgumentAnalyzer;
use crate::analytics::DebateAnalytics;
use crate::config::DebateConfig;
use crate::error::{FailureKind, FailureReason, GuardedError, SessionFailure};
use crate::events::{EventBus, SessionEvent, SessionEventKind};
use crate::llm::{estimate_cost, Completion, ModelId};
use crate::logging::OpTimer;
use crate::pool::{ModelPool, RotationDecision, RotationEngine};
use crate::resilience::GuardedClient;
use crate::session::{
    cross_examination_order, expected_speakers, Phase, Role, RotationEvent, Session, SessionId,
    SessionStatus, Turn,
};

/// Control commands delivered through the session mailbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Command {
    /// Finish the in-flight turn, then suspend.
    Pause,
    /// Resume a paused session.
    Resume,
    /// Stop immediately; the in-flight turn is discarded.
    Cancel,
}

/// How the session task ended.
enum Exit {
    Completed,
    Cancelled,
    Failed(SessionFailure),
}

/// Outcome of a single turn attempt.
enum TurnOutcome {
    Done,
    Cancelled,
    Failed(SessionFailure),
}

/// The per-session orchestration task.
pub(crate) struct SessionRunner {
    session: Arc<RwLock<Session>>,
    config: DebateConfig,
    client: GuardedClient,
    pool: ModelPool,
    rotation: RotationEngine,
    analyzer: ArgumentAnalyzer,
    prompts: PromptBuilder,
    bus: EventBus,
    commands: mpsc::UnboundedReceiver<Command>,
    analytics: Arc<RwLock<Option<DebateAnalytics>>>,
    round_manager: AdaptiveRoundManager,
    /// Per-role mean strength per debate round, for the adaptive
    /// rotation trend.
    role_round_strengths: BTreeMap<Role, Vec<f64>>,
    session_id: SessionId,
    seq: u64,
    started: Instant,
    /// Pause arrived while a call was in flight; suspend after the turn.
    pending_pause: bool,
}

impl SessionRunner {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        session: Arc<RwLock<Session>>,
        config: DebateConfig,
        client: GuardedClient,
        pool: ModelPool,
        rotation: RotationEngine,
        analyzer: ArgumentAnalyzer,
        bus: EventBus,
        commands: mpsc::UnboundedReceiver<Command>,
        analytics: Arc<RwLock<Option<DebateAnalytics>>>,
    ) -> Self {
        let session_id = session.read().id;
        let prompts = PromptBuilder::new(config.transcript_token_ceiling);
        let round_manager = AdaptiveRoundManager::new(config.min_rounds, config.max_rounds);
        Self {
            session,
            config,
            client,
            pool,
            rotation,
            analyzer,
            prompts,
            bus,
            commands,
            analytics,
            round_manager,
            role_round_strengths: BTreeMap::new(),
            session_id,
            seq: 0,
            started: Instant::now(),
            pending_pause: false,
        }
    }

    /// Drive the session to a terminal state.
    pub(crate) async fn run(mut self) {
        let timer = OpTimer::new("orchestrator", format!("session {}", self.session_id));
        self.started = Instant::now();

        let (topic, debaters) = {
            let mut session = self.session.write();
            session.status = SessionStatus::Running;
            session.started_at = Some(Utc::now());
            (session.topic.clone(), session.debaters)
        };
        self.emit(SessionEventKind::SessionStarted { topic, debaters });

        let exit = self.drive().await;
        self.finalize(exit);
        timer.finish();
    }

    async fn drive(&mut self) -> Exit {
        // Opening: each debater once, declared order.
        if let Some(exit) = self.run_simple_phase(Phase::Opening).await {
            return exit;
        }

        // Debate rounds: round 1 in FirstRound, the rest in Rebuttal.
        let mut jump: Option<Phase> = None;
        let mut rounds_done = 0u32;
        loop {
            let planned = self.session.read().planned_rounds;
            if rounds_done >= planned {
                break;
            }
            rounds_done += 1;
            let phase = if rounds_done == 1 {
                Phase::FirstRound
            } else {
                Phase::Rebuttal
            };
            if let Some(exit) = self.enter_phase(phase).await {
                return exit;
            }

            let round_index = self.session.write().open_round(phase);
            let debaters = self.session.read().debater_roles();
            for role in debaters {
                match self.take_turn(role, phase, TurnIntent::Statement).await {
                    TurnOutcome::Done => {}
                    TurnOutcome::Cancelled => return Exit::Cancelled,
                    TurnOutcome::Failed(failure) => return Exit::Failed(failure),
                }
            }

            self.record_round_strengths();
            match self.close_debate_round(round_index, rounds_done) {
                RoundAction::ContinueNormal => {}
                RoundAction::Extend { target } => {
                    let mut session = self.session.write();
                    let capped = target.min(session.max_rounds);
                    tracing::info!(
                        session_id = %self.session_id,
                        from = session.planned_rounds,
                        to = capped,
                        "Extending debate rounds"
                    );
                    session.planned_rounds = capped;
                }
                RoundAction::Reduce => {
                    tracing::info!(session_id = %self.session_id, "Reducing to closing phase");
                    jump = Some(Phase::Closing);
                    break;
                }
                RoundAction::TerminateEarly => {
                    tracing::info!(session_id = %self.session_id, "Terminating debate early");
                    jump = Some(Phase::Judgment);
                    break;
                }
            }
        }

        if jump != Some(Phase::Judgment) {
            // Cross-examination: configured number of question/answer
            // pairs; the previous round's weakest debater asks.
            if jump.is_none() && self.config.cross_examination_pairs > 0 {
                if let Some(exit) = self.run_cross_examination().await {
                    return exit;
                }
            }

            if let Some(exit) = self.run_simple_phase(Phase::Closing).await {
                return exit;
            }
        }

        // Judgment: the judge speaks, then analytics run.
        if let Some(exit) = self.enter_phase(Phase::Judgment).await {
            return exit;
        }
        self.session.write().open_round(Phase::Judgment);
        match self
            .take_turn(Role::Judge, Phase::Judgment, TurnIntent::Statement)
            .await
        {
            TurnOutcome::Done => {}
            TurnOutcome::Cancelled => return Exit::Cancelled,
            TurnOutcome::Failed(failure) => return Exit::Failed(failure),
        }

        let artifact = crate::analytics::run(&self.session.read());
        *self.analytics.write() = Some(artifact);

        Exit::Completed
    }

    /// Opening and closing share the same shape: one round, each
    /// debater once in declared order.
    async fn run_simple_phase(&mut self, phase: Phase) -> Option<Exit> {
        if let Some(exit) = self.enter_phase(phase).await {
            return Some(exit);
        }
        self.session.write().open_round(phase);
        let debaters = self.session.read().debaters;
        for role in expected_speakers(phase, debaters) {
            match self.take_turn(role, phase, TurnIntent::Statement).await {
                TurnOutcome::Done => {}
                TurnOutcome::Cancelled => return Some(Exit::Cancelled),
                TurnOutcome::Failed(failure) => return Some(Exit::Failed(failure)),
            }
        }
        None
    }

    async fn run_cross_examination(&mut self) -> Option<Exit> {
        if let Some(exit) = self.enter_phase(Phase::CrossExamination).await {
            return Some(exit);
        }
        self.session.write().open_round(Phase::CrossExamination);

        let (asker, answerer) = self.cross_examination_parties();
        let order = cross_examination_order(asker, answerer, self.config.cross_examination_pairs);
        for (i, role) in order.into_iter().enumerate() {
            let intent = if i % 2 == 0 {
                TurnIntent::Question
            } else {
                TurnIntent::Answer
            };
            match self
                .take_turn(role, Phase::CrossExamination, intent)
                .await
            {
                TurnOutcome::Done => {}
                TurnOutcome::Cancelled => return Some(Exit::Cancelled),
                TurnOutcome::Failed(failure) => return Some(Exit::Failed(failure)),
            }
        }
        None
    }

    /// The previous round's lowest-scoring debater asks (ties broken by
    /// declaration order); the strongest other debater answers.
    fn cross_examination_parties(&self) -> (Role, Role) {
        let session = self.session.read();
        let debaters = session.debater_roles();

        let scores: BTreeMap<Role, f64> = session
            .rounds
            .iter()
            .rev()
            .find(|r| r.is_debate_round())
            .map(|round| {
                debaters
                    .iter()
                    .map(|role| {
                        let strengths: Vec<f64> = round
                            .turns
                            .iter()
                            .filter(|t| t.role == *role)
                            .map(|t| t.analysis.strength)
                            .collect();
                        #[allow(clippy::cast_precision_loss)]
                        let mean = if strengths.is_empty() {
                            0.0
                        } else {
                            strengths.iter().sum::<f64>() / strengths.len() as f64
                        };
                        (*role, mean)
                    })
                    .collect()
            })
            .unwrap_or_default();

        // Strict comparisons keep the earliest-declared role on ties;
        // BTreeMap iterates in declaration order.
        let mut asker = debaters[0];
        let mut lowest = f64::INFINITY;
        for (role, score) in &scores {
            if *score < lowest {
                lowest = *score;
                asker = *role;
            }
        }
        let mut answerer = debaters.iter().copied().find(|r| *r != asker).unwrap_or(asker);
        let mut highest = f64::NEG_INFINITY;
        for (role, score) in &scores {
            if *role != asker && *score > highest {
                highest = *score;
                answerer = *role;
            }
        }
        (asker, answerer)
    }

    /// Enter a phase: process pending commands, emit `PhaseEntered`, and
    /// apply strategy rotation at the boundary.
    async fn enter_phase(&mut self, phase: Phase) -> Option<Exit> {
        if let Some(exit) = self.poll_commands().await {
            return Some(exit);
        }

        let previous = self.session.read().phase;
        if previous == phase {
            return None;
        }
        if self.session.write().advance_phase(phase).is_err() {
            return Some(Exit::Failed(self.failure(
                FailureReason::InvariantViolation,
                format!("illegal phase transition {previous} → {phase}"),
            )));
        }
        self.emit(SessionEventKind::PhaseEntered { phase });

        // Strategy-driven rotation takes effect only here, at the
        // boundary.
        let (strategy, assignment, rounds_done) = {
            let session = self.session.read();
            (
                session.rotation_strategy,
                session.assignment.clone(),
                session.debate_round_count(),
            )
        };
        if let Some(decision) = self.rotation.evaluate(
            strategy,
            &assignment,
            &self.role_round_strengths,
            rounds_done,
        ) {
            self.apply_rotation(&decision, false);
        }

        None
    }

    /// Execute one turn for a role.
    async fn take_turn(&mut self, role: Role, phase: Phase, intent: TurnIntent) -> TurnOutcome {
        if let Some(exit) = self.poll_commands().await {
            return match exit {
                Exit::Cancelled => TurnOutcome::Cancelled,
                Exit::Failed(f) => TurnOutcome::Failed(f),
                Exit::Completed => TurnOutcome::Done,
            };
        }

        // Session wall-clock budget.
        if self.started.elapsed() >= self.config.session_budget() {
            return TurnOutcome::Failed(
                self.failure(FailureReason::SessionBudgetExhausted, "budget exhausted"),
            );
        }

        // Proactive breaker check: an open breaker on the incumbent
        // forces a role swap before the call is even attempted.
        let mut model = self.assigned_model(role);
        if self.client.breakers().is_model_open(&model) {
            tracing::warn!(
                session_id = %self.session_id,
                role = %role,
                model = %model,
                "Incumbent breaker open before turn, swapping role"
            );
            match self.rotation.emergency_replacement(
                role,
                &model,
                "circuit breaker open for incumbent",
            ) {
                Some(decision) => {
                    self.apply_rotation(&decision, true);
                    model = decision.new_model;
                }
                None => {
                    return TurnOutcome::Failed(self.failure(
                        FailureReason::ProviderUnrecoverable,
                        format!("breaker open for '{model}' and no replacement available"),
                    ));
                }
            }
        }

        let prompt = {
            let session = self.session.read();
            self.prompts.build(&session, role, phase, intent)
        };

        let completion = match self.guarded_call(&model, &prompt).await {
            CallResult::Ok(completion) => completion,
            CallResult::Cancelled => return TurnOutcome::Cancelled,
            CallResult::Err(err) => {
                self.session.write().stats.error_count += 1;
                self.pool.record_call(&model, role, false, 0);

                if !err.is_recoverable() {
                    return TurnOutcome::Failed(self.failure_from(&err));
                }

                // One role swap to a healthy model, then one more try.
                let Some(decision) = self.rotation.emergency_replacement(
                    role,
                    &model,
                    &format!("provider failure: {}", err.kind),
                ) else {
                    return TurnOutcome::Failed(self.failure(
                        FailureReason::ProviderUnrecoverable,
                        format!("'{model}' failed and no replacement available: {err}"),
                    ));
                };
                self.apply_rotation(&decision, true);
                model = decision.new_model;

                match self.guarded_call(&model, &prompt).await {
                    CallResult::Ok(completion) => completion,
                    CallResult::Cancelled => return TurnOutcome::Cancelled,
                    CallResult::Err(second) => {
                        self.session.write().stats.error_count += 1;
                        self.pool.record_call(&model, role, false, 0);
                        return TurnOutcome::Failed(if second.is_recoverable() {
                            self.failure(
                                FailureReason::ProviderUnrecoverable,
                                format!("replacement '{model}' also failed: {second}"),
                            )
                        } else {
                            self.failure_from(&second)
                        });
                    }
                }
            }
        };

        // Analyze, then append under a short write lock.
        let topic = self.session.read().topic.clone();
        let analysis = self.analyzer.analyze(&completion.text, &topic).await;
        let strength = analysis.strength;

        let turn = {
            let mut session = self.session.write();
            let turn = Turn {
                index: session.next_turn_index(),
                role,
                model: model.clone(),
                phase,
                content: completion.text.clone(),
                timestamp: Utc::now(),
                latency_ms: completion.latency_ms,
                tokens: completion.total_tokens(),
                analysis,
            };
            if let Err(reason) = session.append_turn(turn.clone()) {
                drop(session);
                return TurnOutcome::Failed(
                    self.failure(FailureReason::InvariantViolation, reason),
                );
            }
            session.stats.total_tokens += u64::from(completion.total_tokens());
            session.stats.cost_estimate +=
                estimate_cost(completion.input_tokens, completion.output_tokens);
            turn
        };

        self.pool
            .record_call(&model, role, true, completion.latency_ms);
        self.pool.record_strength(&model, role, strength);
        self.pool.record_tokens(&model, completion.total_tokens());

        tracing::debug!(
            session_id = %self.session_id,
            turn = turn.index,
            role = %role,
            phase = %phase,
            strength = strength,
            "Turn completed"
        );
        self.emit(SessionEventKind::TurnCompleted {
            turn: Box::new(turn),
        });

        // A pause that arrived mid-call suspends here, after the turn
        // committed.
        if self.pending_pause {
            self.pending_pause = false;
            if let Some(exit) = self.wait_while_paused().await {
                return match exit {
                    Exit::Cancelled => TurnOutcome::Cancelled,
                    Exit::Failed(f) => TurnOutcome::Failed(f),
                    Exit::Completed => TurnOutcome::Done,
                };
            }
        }

        TurnOutcome::Done
    }

    /// Run the guarded call while listening on the mailbox. Cancel
    /// drops the in-flight future (discarding its result); pause is
    /// remembered and honoured after the turn commits.
    async fn guarded_call(&mut self, model: &ModelId, prompt: &crate::llm::Prompt) -> CallResult {
        let call = self.client.call(
            self.session_id,
            model,
            prompt,
            self.config.turn_deadline(),
        );
        tokio::pin!(call);

        loop {
            tokio::select! {
                result = &mut call => {
                    return match result {
                        Ok(completion) => CallResult::Ok(completion),
                        Err(err) => CallResult::Err(err),
                    };
                }
                command = self.commands.recv() => match command {
                    Some(Command::Cancel) | None => {
                        tracing::info!(
                            session_id = %self.session_id,
                            model = %model,
                            "Cancelled mid-call, discarding in-flight turn"
                        );
                        return CallResult::Cancelled;
                    }
                    Some(Command::Pause) => self.pending_pause = true,
                    Some(Command::Resume) => self.pending_pause = false,
                }
            }
        }
    }

    /// Drain pending commands without blocking; a pending pause parks
    /// here until resume or cancel.
    async fn poll_commands(&mut self) -> Option<Exit> {
        loop {
            match self.commands.try_recv() {
                Ok(Command::Pause) => {
                    if let Some(exit) = self.wait_while_paused().await {
                        return Some(exit);
                    }
                }
                Ok(Command::Resume) => {}
                Ok(Command::Cancel) => return Some(Exit::Cancelled),
                Err(mpsc::error::TryRecvError::Empty) => return None,
                Err(mpsc::error::TryRecvError::Disconnected) => return Some(Exit::Cancelled),
            }
        }
    }

    /// Park on the mailbox until resume or cancel.
    async fn wait_while_paused(&mut self) -> Option<Exit> {
        tracing::info!(session_id = %self.session_id, "Session paused");
        self.session.write().status = SessionStatus::Paused;

        loop {
            match self.commands.recv().await {
                Some(Command::Resume) => {
                    tracing::info!(session_id = %self.session_id, "Session resumed");
                    self.session.write().status = SessionStatus::Running;
                    return None;
                }
                Some(Command::Pause) => {}
                Some(Command::Cancel) | None => return Some(Exit::Cancelled),
            }
        }
    }

    fn assigned_model(&self, role: Role) -> ModelId {
        self.session
            .read()
            .assignment
            .get(&role)
            .cloned()
            .unwrap_or_default()
    }

    /// Apply a rotation decision: mutate the assignment, record the
    /// event, and notify observers.
    fn apply_rotation(&mut self, decision: &RotationDecision, emergency: bool) {
        let rotation = {
            let mut session = self.session.write();
            let rotation = RotationEvent {
                before_turn: session.next_turn_index(),
                role: decision.role,
                old_model: decision.old_model.clone(),
                new_model: decision.new_model.clone(),
                reason: decision.reason.clone(),
                confidence: decision.confidence,
                expected_improvement: decision.expected_improvement,
                emergency,
                timestamp: Utc::now(),
            };
            session
                .assignment
                .insert(decision.role, decision.new_model.clone());
            session.rotation_events.push(rotation.clone());
            rotation
        };

        tracing::info!(
            session_id = %self.session_id,
            role = %rotation.role,
            old_model = %rotation.old_model,
            new_model = %rotation.new_model,
            emergency = emergency,
            reason = %rotation.reason,
            "Rotation applied"
        );
        self.emit(SessionEventKind::RotationApplied { rotation });
    }

    /// Close a debate round: snapshot, round-manager decision, event.
    ///
    /// The snapshot is taken first: its momentum compares this round's
    /// quality against the previous round, which the evaluation below
    /// overwrites.
    fn close_debate_round(&mut self, round_index: u32, rounds_done: u32) -> RoundAction {
        let (snapshot, decision) = {
            let session = self.session.read();
            let position = session
                .rounds
                .iter()
                .position(|r| r.index == round_index)
                .unwrap_or(session.rounds.len() - 1);
            let round = &session.rounds[position];
            let prior = &session.rounds[..position];
            let expected = expected_speakers(round.phase, session.debaters).len();

            let snapshot = self.round_manager.snapshot(round);
            let decision = self.round_manager.evaluate(
                round,
                prior,
                expected,
                self.started.elapsed(),
                self.config.session_budget(),
                rounds_done,
                session.planned_rounds,
            );
            (snapshot, decision)
        };

        {
            let mut session = self.session.write();
            if let Some(round) = session.rounds.iter_mut().find(|r| r.index == round_index) {
                round.snapshot = Some(snapshot);
                round.decision = Some(decision.clone());
            }
        }

        let action = decision.action;
        self.emit(SessionEventKind::RoundClosed {
            round_index,
            decision,
        });
        action
    }

    /// Record per-role strengths for the just-finished debate round.
    fn record_round_strengths(&mut self) {
        let session = self.session.read();
        let Some(round) = session.rounds.iter().rev().find(|r| r.is_debate_round()) else {
            return;
        };
        for role in session.debater_roles() {
            let strengths: Vec<f64> = round
                .turns
                .iter()
                .filter(|t| t.role == role)
                .map(|t| t.analysis.strength)
                .collect();
            if strengths.is_empty() {
                continue;
            }
            #[allow(clippy::cast_precision_loss)]
            let mean = strengths.iter().sum::<f64>() / strengths.len() as f64;
            self.role_round_strengths.entry(role).or_default().push(mean);
        }
    }

    fn failure(&self, kind: FailureReason, detail: impl Into<String>) -> SessionFailure {
        let session = self.session.read();
        SessionFailure {
            kind,
            detail: detail.into(),
            phase: session.phase,
            round: session.debate_round_count(),
        }
    }

    fn failure_from(&self, err: &GuardedError) -> SessionFailure {
        let kind = if err.retry_budget_exhausted {
            FailureReason::RetryBudgetExhausted
        } else {
            match err.kind {
                FailureKind::Auth => FailureReason::Auth,
                FailureKind::BudgetExhausted => FailureReason::ProviderBudgetExhausted,
                _ => FailureReason::ProviderUnrecoverable,
            }
        };
        self.failure(kind, err.to_string())
    }

    fn finalize(&mut self, exit: Exit) {
        let (status, reason) = match exit {
            Exit::Completed => (SessionStatus::Completed, None),
            Exit::Cancelled => (SessionStatus::Cancelled, None),
            Exit::Failed(failure) => {
                let reason = format!("{}: {}", failure.kind, failure.detail);
                self.session.write().failure = Some(failure);
                (SessionStatus::Failed, Some(reason))
            }
        };

        {
            let mut session = self.session.write();
            session.status = status;
            let terminal_phase = match status {
                SessionStatus::Completed => Phase::Completed,
                SessionStatus::Cancelled => Phase::Cancelled,
                _ => Phase::Failed,
            };
            let _ = session.advance_phase(terminal_phase);
            session.completed_at = Some(Utc::now());
            session.stats.duration_ms = session.duration_ms();
        }

        self.client.ledger().forget(self.session_id);

        tracing::info!(
            session_id = %self.session_id,
            status = %status,
            reason = reason.as_deref().unwrap_or("-"),
            "Session ended"
        );
        self.emit(SessionEventKind::SessionEnded { status, reason });
    }

    fn emit(&mut self, kind: SessionEventKind) {
        let event = SessionEvent {
            session_id: self.session_id,
            seq: self.seq,
            timestamp: Utc::now(),
            kind,
        };
        self.seq += 1;
        self.bus.broadcast(event);
    }
}

enum CallResult {
    Ok(Completion),
    Err(GuardedError),
    Cancelled,
}

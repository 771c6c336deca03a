//! End-to-end debate scenarios against a scripted provider.

mod common;

use std::time::Duration;

use common::{test_config, test_engine, test_pool, Behavior, ScriptedClient};
use std::sync::Arc;

use parley::analytics::AnalyticsKind;
use parley::engine::{DebateEngine, SessionSpec};
use parley::error::{ApiError, FailureKind};
use parley::events::{ReplayedSession, SessionEvent, SessionEventKind};
use parley::pool::RotationStrategy;
use parley::session::{expected_speakers, Phase, Role, SessionStatus};
use parley::SessionId;

/// Collect every event for a session until `SessionEnded`.
async fn collect_events(
    mut rx: tokio::sync::broadcast::Receiver<SessionEvent>,
) -> Vec<SessionEvent> {
    let mut events = Vec::new();
    loop {
        let event = tokio::time::timeout(Duration::from_secs(30), rx.recv())
            .await
            .expect("event stream stalled")
            .expect("event channel closed early");
        let ended = matches!(event.kind, SessionEventKind::SessionEnded { .. });
        events.push(event);
        if ended {
            return events;
        }
    }
}

async fn run_to_end(engine: &DebateEngine, id: SessionId) -> Vec<SessionEvent> {
    let rx = engine.subscribe(id);
    engine.start_session(id).unwrap();
    collect_events(rx).await
}

fn turn_count(events: &[SessionEvent]) -> usize {
    events
        .iter()
        .filter(|e| matches!(e.kind, SessionEventKind::TurnCompleted { .. }))
        .count()
}

fn rotation_count(events: &[SessionEvent]) -> usize {
    events
        .iter()
        .filter(|e| matches!(e.kind, SessionEventKind::RotationApplied { .. }))
        .count()
}

fn terminal_status(events: &[SessionEvent]) -> SessionStatus {
    events
        .iter()
        .find_map(|e| match &e.kind {
            SessionEventKind::SessionEnded { status, .. } => Some(*status),
            _ => None,
        })
        .expect("no SessionEnded event")
}

/// Scenario 1: happy path, two debaters, FIXED rotation, no failures.
/// 2 opening + 6 debate + 2 closing + 1 judgment = 11 turns.
#[tokio::test]
async fn test_happy_path_eleven_turns() {
    let (engine, _client) = test_engine();
    let id = engine
        .create_session(
            SessionSpec::new("Adopt AI customer support")
                .with_max_rounds(3)
                .with_rotation_strategy(RotationStrategy::Fixed),
        )
        .unwrap();

    let events = run_to_end(&engine, id).await;

    assert_eq!(turn_count(&events), 11);
    assert_eq!(rotation_count(&events), 0);
    assert_eq!(terminal_status(&events), SessionStatus::Completed);

    let session = engine.get_session(id).unwrap();
    assert_eq!(session.status, SessionStatus::Completed);
    assert_eq!(session.phase, Phase::Completed);
    assert_eq!(session.debate_round_count(), 3);
    assert!(session.stats.total_tokens > 0);

    // Analytics are produced.
    assert!(engine.get_analytics(id, AnalyticsKind::FinalReport).is_ok());
    assert!(engine.get_analytics(id, AnalyticsKind::Judgment).is_ok());
}

/// Universal invariants over the happy-path run: timestamp order, phase
/// reachability, per-round speaker order, strength bounds, event
/// sequence numbering, and replay reconstruction.
#[tokio::test]
async fn test_happy_path_invariants() {
    let (engine, _client) = test_engine();
    let id = engine
        .create_session(
            SessionSpec::new("Adopt AI customer support")
                .with_max_rounds(3)
                .with_rotation_strategy(RotationStrategy::Fixed),
        )
        .unwrap();
    let events = run_to_end(&engine, id).await;
    let session = engine.get_session(id).unwrap();
    let transcript = session.transcript();

    // Timestamps and phases are monotone along the transcript.
    for pair in transcript.windows(2) {
        assert!(pair[0].timestamp <= pair[1].timestamp);
        assert!(
            pair[0].phase.reaches(pair[1].phase),
            "{} must reach {}",
            pair[0].phase,
            pair[1].phase
        );
        assert_eq!(pair[0].index + 1, pair[1].index);
    }

    // Every round matches the turn-order predicate exactly.
    for round in &session.rounds {
        let expected = expected_speakers(round.phase, session.debaters);
        if expected.is_empty() {
            continue;
        }
        let actual: Vec<Role> = round.turns.iter().map(|t| t.role).collect();
        assert_eq!(actual, expected, "round {} speaker order", round.index);
    }

    // Argument strengths stay in the unit interval; no-evidence turns
    // have a zero evidence component.
    for turn in &transcript {
        assert!((0.0..=1.0).contains(&turn.analysis.strength));
        if turn.analysis.evidence.is_empty() {
            assert!(turn.analysis.evidence_score.abs() < f64::EPSILON);
        }
    }

    // Event sequence numbers are strictly increasing per session.
    for pair in events.windows(2) {
        assert_eq!(pair[0].seq + 1, pair[1].seq);
        assert_eq!(pair[0].session_id, pair[1].session_id);
    }

    // Replaying the events reconstructs the observable state.
    let replayed = ReplayedSession::from_events(&events);
    assert_eq!(replayed.status, Some(SessionStatus::Completed));
    assert_eq!(replayed.turns.len(), transcript.len());
    for (replayed_turn, turn) in replayed.turns.iter().zip(transcript.iter()) {
        assert_eq!(replayed_turn.index, turn.index);
        assert_eq!(replayed_turn.role, turn.role);
    }

    // Transcript slicing concatenates.
    let head = engine.get_transcript(id, 0).unwrap();
    let tail = engine.get_transcript(id, 5).unwrap();
    assert_eq!(head.len(), 11);
    assert_eq!(tail.len(), 6);
    assert_eq!(tail[0].index, 5);
}

/// Scenario 2: mid-debate single-model outage under ADAPTIVE. The
/// breaker trips, the role swaps once between turns 4 and 5, and the
/// session completes.
#[tokio::test]
async fn test_mid_debate_outage_rotates_once() {
    let (engine, client) = test_engine();
    // debater_b's model fails its third call (turn index 5) thrice,
    // exhausting that turn's retries.
    client.script(
        "beta",
        vec![
            Behavior::Ok,
            Behavior::Ok,
            Behavior::Fail(FailureKind::Timeout),
            Behavior::Fail(FailureKind::Timeout),
            Behavior::Fail(FailureKind::Timeout),
        ],
    );

    let id = engine
        .create_session(
            SessionSpec::new("Adopt AI customer support")
                .with_max_rounds(3)
                .with_rotation_strategy(RotationStrategy::Adaptive),
        )
        .unwrap();
    let events = run_to_end(&engine, id).await;

    assert_eq!(terminal_status(&events), SessionStatus::Completed);
    assert_eq!(turn_count(&events), 11);
    assert_eq!(rotation_count(&events), 1);

    // The breaker for the failed model tripped open.
    assert!(engine.breakers().is_model_open(&"beta".to_string()));

    // The rotation sits between the completion of turn 4 and turn 5.
    let mut last_turn_before = None;
    let mut first_turn_after = None;
    let mut seen_rotation = false;
    for event in &events {
        match &event.kind {
            SessionEventKind::RotationApplied { rotation } => {
                assert_eq!(rotation.old_model, "beta");
                assert!(rotation.emergency);
                seen_rotation = true;
            }
            SessionEventKind::TurnCompleted { turn } => {
                if seen_rotation {
                    first_turn_after.get_or_insert(turn.index);
                } else {
                    last_turn_before = Some(turn.index);
                }
            }
            _ => {}
        }
    }
    assert_eq!(last_turn_before, Some(4));
    assert_eq!(first_turn_after, Some(5));

    // The replacement produced turn 5.
    let transcript = engine.get_transcript(id, 5).unwrap();
    assert_ne!(transcript[0].model, "beta");
}

/// Scenario 3: cancel issued during an in-flight model call. The turn
/// is discarded, the transcript keeps its five committed turns, and
/// analytics never run.
#[tokio::test]
async fn test_cancel_mid_call_discards_turn() {
    let (engine, client) = test_engine();
    // debater_b's third call (turn index 5) parks until cancelled.
    client.script("beta", vec![Behavior::Ok, Behavior::Ok, Behavior::Hang]);

    let id = engine
        .create_session(
            SessionSpec::new("Adopt AI customer support")
                .with_max_rounds(3)
                .with_rotation_strategy(RotationStrategy::Fixed),
        )
        .unwrap();
    let mut rx = engine.subscribe(id);
    engine.start_session(id).unwrap();

    // Wait for turn 4, then cancel while turn 5's call is in flight.
    loop {
        let event = tokio::time::timeout(Duration::from_secs(30), rx.recv())
            .await
            .expect("stalled")
            .expect("closed");
        if let SessionEventKind::TurnCompleted { turn } = &event.kind {
            if turn.index == 4 {
                break;
            }
        }
    }
    tokio::time::sleep(Duration::from_millis(200)).await;
    engine.cancel_session(id).unwrap();

    let events = collect_events(rx).await;
    assert_eq!(terminal_status(&events), SessionStatus::Cancelled);

    let session = engine.get_session(id).unwrap();
    assert_eq!(session.status, SessionStatus::Cancelled);
    assert_eq!(session.transcript().len(), 5);
    assert!(matches!(
        engine.get_analytics(id, AnalyticsKind::FinalReport),
        Err(ApiError::NotReady(_))
    ));
}

/// Scenario 4: sustained low quality and novelty force early
/// termination after round 2; the debate skips straight to judgment and
/// the report notes the truncation.
#[tokio::test]
async fn test_quality_collapse_terminates_early() {
    let (engine, client) = test_engine();
    client.fix_content("Everyone knows automation always fails and we lose.");

    let id = engine
        .create_session(
            SessionSpec::new("Adopt AI customer support")
                .with_max_rounds(5)
                .with_rotation_strategy(RotationStrategy::Adaptive),
        )
        .unwrap();
    let events = run_to_end(&engine, id).await;

    assert_eq!(terminal_status(&events), SessionStatus::Completed);
    // 2 opening + 2 rounds of 2 + 1 judgment.
    assert_eq!(turn_count(&events), 7);

    // The second debate round carries the terminate decision.
    let terminate = events.iter().find_map(|e| match &e.kind {
        SessionEventKind::RoundClosed { decision, .. } => {
            if matches!(decision.action, parley::analysis::RoundAction::TerminateEarly) {
                Some(decision.clone())
            } else {
                None
            }
        }
        _ => None,
    });
    let terminate = terminate.expect("no early termination decision");
    assert!(terminate.reason.contains("collapse"));

    // Closing was skipped: no turn was produced in that phase.
    let session = engine.get_session(id).unwrap();
    assert!(session.transcript().iter().all(|t| t.phase != Phase::Closing));

    match engine
        .get_analytics(id, AnalyticsKind::FinalReport)
        .unwrap()
    {
        parley::engine::AnalyticsArtifact::Report(report) => {
            assert!(report.contains("truncated early"));
        }
        other => panic!("unexpected artifact: {other:?}"),
    }
}

/// Scenario 5: AUTH failure on the first turn fails the session fast,
/// with no retries and an empty transcript that stays retrievable.
#[tokio::test]
async fn test_auth_failure_fails_fast() {
    let (engine, client) = test_engine();
    client.script("alpha", vec![Behavior::Fail(FailureKind::Auth)]);

    let id = engine
        .create_session(SessionSpec::new("Adopt AI customer support"))
        .unwrap();
    let events = run_to_end(&engine, id).await;

    assert_eq!(terminal_status(&events), SessionStatus::Failed);
    let reason = events
        .iter()
        .find_map(|e| match &e.kind {
            SessionEventKind::SessionEnded { reason, .. } => reason.clone(),
            _ => None,
        })
        .expect("failure reason missing");
    assert!(reason.contains("auth"));

    // Exactly one call: AUTH is never retried.
    assert_eq!(client.calls("alpha"), 1);

    let session = engine.get_session(id).unwrap();
    assert_eq!(session.status, SessionStatus::Failed);
    assert!(session.transcript().is_empty());
    assert!(session.failure.is_some());
}

/// Retry budget of zero: the first transient failure escalates straight
/// to fatal.
#[tokio::test]
async fn test_zero_retry_budget_promotes_to_fatal() {
    let mut config = test_config();
    config.session_retry_budget = 0;
    let client = ScriptedClient::new();
    client.script("alpha", vec![Behavior::Fail(FailureKind::Transient)]);
    let engine = DebateEngine::new(config, Arc::new(client.clone()), test_pool());

    let id = engine
        .create_session(SessionSpec::new("Adopt AI customer support"))
        .unwrap();
    let events = run_to_end(&engine, id).await;

    assert_eq!(terminal_status(&events), SessionStatus::Failed);
    assert_eq!(client.calls("alpha"), 1);
    let session = engine.get_session(id).unwrap();
    assert_eq!(
        session.failure.unwrap().kind,
        parley::error::FailureReason::RetryBudgetExhausted
    );
}

/// Scenario 6: two sessions share the breaker table. Session 1 trips
/// the breaker on the shared model; session 2 observes it at its next
/// turn boundary and rotates without accumulating its own failures.
#[tokio::test]
async fn test_shared_breaker_across_sessions() {
    let (engine, client) = test_engine();
    client.script(
        "alpha",
        vec![
            Behavior::Ok,
            Behavior::Fail(FailureKind::Timeout),
            Behavior::Fail(FailureKind::Timeout),
            Behavior::Fail(FailureKind::Timeout),
        ],
    );

    let spec = || {
        SessionSpec::new("Adopt AI customer support")
            .with_max_rounds(3)
            .with_rotation_strategy(RotationStrategy::Fixed)
    };
    let first = engine.create_session(spec()).unwrap();
    let second = engine.create_session(spec()).unwrap();

    // Both sessions were assigned the shared model for debater_a.
    assert_eq!(
        engine.get_session(first).unwrap().assignment[&Role::Debater(0)],
        "alpha"
    );
    assert_eq!(
        engine.get_session(second).unwrap().assignment[&Role::Debater(0)],
        "alpha"
    );

    let events_first = run_to_end(&engine, first).await;
    assert_eq!(terminal_status(&events_first), SessionStatus::Completed);
    assert_eq!(rotation_count(&events_first), 1);
    assert!(engine.breakers().is_model_open(&"alpha".to_string()));

    let alpha_calls_before = client.calls("alpha");
    let events_second = run_to_end(&engine, second).await;
    assert_eq!(terminal_status(&events_second), SessionStatus::Completed);

    // Session 2 rotated away without a single call to the tripped model.
    assert_eq!(rotation_count(&events_second), 1);
    assert_eq!(client.calls("alpha"), alpha_calls_before);
    let rotation = events_second
        .iter()
        .find_map(|e| match &e.kind {
            SessionEventKind::RotationApplied { rotation } => Some(rotation.clone()),
            _ => None,
        })
        .unwrap();
    assert_eq!(rotation.old_model, "alpha");
    assert!(rotation.reason.contains("breaker"));

    // Per-session event ordering holds for both streams.
    for events in [&events_first, &events_second] {
        for pair in events.windows(2) {
            assert!(pair[0].seq < pair[1].seq);
        }
    }
}

/// Pause finishes the in-flight turn, resume picks up where it left
/// off, and the pair is a no-op on transcript content.
#[tokio::test]
async fn test_pause_resume_is_transcript_noop() {
    let (engine, client) = test_engine();
    client.set_delay(Duration::from_millis(30));
    let id = engine
        .create_session(
            SessionSpec::new("Adopt AI customer support")
                .with_max_rounds(3)
                .with_rotation_strategy(RotationStrategy::Fixed),
        )
        .unwrap();
    let mut rx = engine.subscribe(id);
    engine.start_session(id).unwrap();

    // Pause after the second turn commits.
    loop {
        let event = rx.recv().await.unwrap();
        if let SessionEventKind::TurnCompleted { turn } = &event.kind {
            if turn.index == 1 {
                break;
            }
        }
    }
    engine.pause_session(id).unwrap();

    // The runner parks at the next step boundary.
    let mut paused = false;
    for _ in 0..100 {
        if engine.get_session(id).unwrap().status == SessionStatus::Paused {
            paused = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(paused, "session never reached paused state");
    let frozen_len = engine.get_transcript(id, 0).unwrap().len();

    // No progress while paused.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(engine.get_transcript(id, 0).unwrap().len(), frozen_len);

    engine.resume_session(id).unwrap();
    let events = collect_events(rx).await;
    assert_eq!(terminal_status(&events), SessionStatus::Completed);

    // Same transcript as an uninterrupted run.
    assert_eq!(engine.get_transcript(id, 0).unwrap().len(), 11);
}

/// Concurrent pause and cancel: cancel wins.
#[tokio::test]
async fn test_pause_then_cancel_terminates_cancelled() {
    let (engine, client) = test_engine();
    client.set_delay(Duration::from_millis(30));
    let id = engine
        .create_session(SessionSpec::new("Adopt AI customer support").with_max_rounds(3))
        .unwrap();
    let rx = engine.subscribe(id);
    engine.start_session(id).unwrap();

    tokio::time::sleep(Duration::from_millis(20)).await;
    let _ = engine.pause_session(id);
    engine.cancel_session(id).unwrap();

    let events = collect_events(rx).await;
    assert_eq!(terminal_status(&events), SessionStatus::Cancelled);
}

/// Cross-examination produces alternating question/answer pairs with
/// the weaker debater asking.
#[tokio::test]
async fn test_cross_examination_pairs() {
    let mut config = test_config();
    config.cross_examination_pairs = 2;
    let client = ScriptedClient::new();
    let engine = DebateEngine::new(config, Arc::new(client.clone()), test_pool());

    let id = engine
        .create_session(
            SessionSpec::new("Adopt AI customer support")
                .with_max_rounds(3)
                .with_rotation_strategy(RotationStrategy::Fixed),
        )
        .unwrap();
    let events = run_to_end(&engine, id).await;

    assert_eq!(terminal_status(&events), SessionStatus::Completed);
    // 11 baseline turns plus 2 question/answer pairs.
    assert_eq!(turn_count(&events), 15);

    let session = engine.get_session(id).unwrap();
    let cross: Vec<Role> = session
        .transcript()
        .iter()
        .filter(|t| t.phase == Phase::CrossExamination)
        .map(|t| t.role)
        .collect();
    assert_eq!(cross.len(), 4);
    // Alternating asker/answerer.
    assert_eq!(cross[0], cross[2]);
    assert_eq!(cross[1], cross[3]);
    assert_ne!(cross[0], cross[1]);
}

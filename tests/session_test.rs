//! Session orchestrator tests: gating, monotonic completion, all-or-nothing
//! mutators, debounced persistence, and remote-validated phase completion.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use waypoint::model::{
    Consideration, ConstraintValue, PhaseId, PhaseStatus, ProjectState, SuitabilityAnswer,
};
use waypoint::phases::PhaseOutcome;
use waypoint::remote::{CompletionOutcome, PhaseAssessment, ProjectRemote, ProjectSnapshot, RemoteError};
use waypoint::store::{state_key, Store};
use waypoint::{EngineConfig, Session, SessionError};

/// Mock remote: offline snapshots, scriptable completion verdicts, and a
/// queue of delayed consideration batches for refresh-race tests.
struct MockRemote {
    decline_completion: AtomicBool,
    refresh_queue: Mutex<VecDeque<(Duration, Vec<Consideration>)>>,
}

impl MockRemote {
    fn new() -> Self {
        Self {
            decline_completion: AtomicBool::new(false),
            refresh_queue: Mutex::new(VecDeque::new()),
        }
    }

    fn consideration(id: &str) -> Consideration {
        Consideration {
            id: id.to_string(),
            title: format!("Consideration {id}"),
            description: "generated".to_string(),
            acknowledged: false,
        }
    }
}

#[async_trait]
impl ProjectRemote for MockRemote {
    async fn fetch_snapshot(&self, _project_id: &str) -> Result<ProjectSnapshot, RemoteError> {
        Err(RemoteError::Rejected("no remote record".into()))
    }

    async fn complete_phase(
        &self,
        _project_id: &str,
        _phase: PhaseId,
        _answers: &serde_json::Value,
    ) -> Result<CompletionOutcome, RemoteError> {
        if self.decline_completion.load(Ordering::SeqCst) {
            Ok(CompletionOutcome {
                success: false,
                assessment: Some(PhaseAssessment {
                    summary: "ethical assessment incomplete".to_string(),
                    score: Some(20),
                }),
            })
        } else {
            Ok(CompletionOutcome { success: true, assessment: None })
        }
    }

    async fn fetch_considerations(
        &self,
        _project_id: &str,
    ) -> Result<Vec<Consideration>, RemoteError> {
        Ok(vec![Self::consideration("bias"), Self::consideration("privacy")])
    }

    async fn acknowledge_considerations(
        &self,
        _project_id: &str,
        _ids: &[String],
    ) -> Result<(), RemoteError> {
        Ok(())
    }

    async fn refresh_considerations(
        &self,
        _project_id: &str,
    ) -> Result<Vec<Consideration>, RemoteError> {
        let next = self.refresh_queue.lock().await.pop_front();
        match next {
            Some((delay, considerations)) => {
                tokio::time::sleep(delay).await;
                Ok(considerations)
            }
            None => Ok(Vec::new()),
        }
    }
}

async fn open_session(project_id: &str) -> (tempfile::TempDir, Arc<MockRemote>, Session) {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::open(dir.path()).await.unwrap();
    let remote = Arc::new(MockRemote::new());
    let config = EngineConfig {
        flush_debounce_ms: 20,
        ..EngineConfig::default()
    };
    let session = Session::load(config, store, remote.clone(), Some(project_id))
        .await
        .unwrap();
    (dir, remote, session)
}

async fn complete_through(session: &Session, up_to: PhaseId) {
    session
        .set_phase_answer(
            PhaseId::Reflection,
            serde_json::json!({"goal": "a goal long enough to pass validation"}),
        )
        .await
        .unwrap();
    for id in PhaseId::ORDER {
        session.complete_phase(id).await.unwrap();
        if id == up_to {
            break;
        }
    }
}

#[tokio::test]
async fn locked_phase_access_is_rejected_and_state_unchanged() {
    let (_dir, _remote, session) = open_session("p1").await;
    complete_through(&session, PhaseId::Scoping).await;

    // development is not completed yet
    let result = session.set_active_phase(PhaseId::Evaluation).await;
    assert!(matches!(result, Err(SessionError::PhaseLocked(PhaseId::Evaluation))));
    assert_eq!(session.state().await.active_phase, PhaseId::Development);
}

#[tokio::test]
async fn completing_the_penultimate_phase_opens_the_last() {
    let (_dir, _remote, session) = open_session("p1").await;
    complete_through(&session, PhaseId::Scoping).await;

    let outcome = session.complete_phase(PhaseId::Development).await.unwrap();
    assert_eq!(outcome, PhaseOutcome::AdvancedTo(PhaseId::Evaluation));

    let state = session.state().await;
    let evaluation = state.phase(PhaseId::Evaluation).unwrap();
    assert_eq!(evaluation.status, PhaseStatus::InProgress);
    assert_eq!(evaluation.progress, 0);
    assert!(!session.all_phases_completed().await);

    session.complete_phase(PhaseId::Evaluation).await.unwrap();
    assert!(session.all_phases_completed().await);
}

#[tokio::test]
async fn completed_phases_survive_stale_progress_updates() {
    let (_dir, _remote, session) = open_session("p1").await;
    complete_through(&session, PhaseId::Reflection).await;

    session
        .update_phase_progress(PhaseId::Reflection, 2, 5)
        .await
        .unwrap();
    let state = session.state().await;
    let reflection = state.phase(PhaseId::Reflection).unwrap();
    assert_eq!(reflection.status, PhaseStatus::Completed);
    assert_eq!(reflection.progress, 100);
}

#[tokio::test]
async fn invalid_constraint_value_leaves_previous_value_intact() {
    let (_dir, _remote, session) = open_session("p1").await;
    session
        .set_constraint("budget", ConstraintValue::Choice("moderate".into()))
        .await
        .unwrap();

    let result = session
        .set_constraint("budget", ConstraintValue::Choice("infinite".into()))
        .await;
    assert!(matches!(result, Err(SessionError::Validation(_))));

    let state = session.state().await;
    let budget = state.constraints.iter().find(|c| c.id == "budget").unwrap();
    assert_eq!(budget.value, Some(ConstraintValue::Choice("moderate".into())));
}

#[tokio::test]
async fn toggle_constraints_reject_choices() {
    let (_dir, _remote, session) = open_session("p1").await;
    let result = session
        .set_constraint("connectivity", ConstraintValue::Choice("yes".into()))
        .await;
    assert!(matches!(result, Err(SessionError::Validation(_))));

    session
        .set_constraint("connectivity", ConstraintValue::Flag(true))
        .await
        .unwrap();
}

#[tokio::test]
async fn reflection_answers_are_length_checked() {
    let (_dir, _remote, session) = open_session("p1").await;
    let result = session
        .set_phase_answer(PhaseId::Reflection, serde_json::json!({"goal": "too short"}))
        .await;
    assert!(matches!(result, Err(SessionError::Validation(_))));
    assert!(session.state().await.phase_answers.is_empty());
}

#[tokio::test]
async fn declined_remote_completion_keeps_the_phase_open() {
    let (_dir, remote, session) = open_session("p1").await;
    session
        .set_phase_answer(
            PhaseId::Reflection,
            serde_json::json!({"goal": "a goal long enough to pass validation"}),
        )
        .await
        .unwrap();
    remote.decline_completion.store(true, Ordering::SeqCst);

    let result = session.complete_phase(PhaseId::Reflection).await;
    assert!(matches!(result, Err(SessionError::RemoteAction(_))));

    let state = session.state().await;
    let reflection = state.phase(PhaseId::Reflection).unwrap();
    assert_ne!(reflection.status, PhaseStatus::Completed);
    assert_eq!(state.active_phase, PhaseId::Reflection);

    // The retry succeeds once the server accepts.
    remote.decline_completion.store(false, Ordering::SeqCst);
    let outcome = session.complete_phase(PhaseId::Reflection).await.unwrap();
    assert_eq!(outcome, PhaseOutcome::AdvancedTo(PhaseId::Scoping));
}

#[tokio::test]
async fn debounced_flush_persists_the_latest_state() {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::open(dir.path()).await.unwrap();
    let remote = Arc::new(MockRemote::new());
    let config = EngineConfig {
        flush_debounce_ms: 20,
        ..EngineConfig::default()
    };
    let session = Session::load(config, store.clone(), remote, Some("p1"))
        .await
        .unwrap();

    // A burst of edits inside one debounce window.
    session
        .set_constraint("budget", ConstraintValue::Choice("limited".into()))
        .await
        .unwrap();
    session
        .set_constraint("budget", ConstraintValue::Choice("substantial".into()))
        .await
        .unwrap();
    session
        .set_suitability_answer("privacy", SuitabilityAnswer::Yes)
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(200)).await;

    let cached: ProjectState = store.get(&state_key("p1")).await.unwrap().unwrap();
    let budget = cached.constraints.iter().find(|c| c.id == "budget").unwrap();
    assert_eq!(budget.value, Some(ConstraintValue::Choice("substantial".into())));
    let privacy = cached
        .suitability_checks
        .iter()
        .find(|c| c.id == "privacy")
        .unwrap();
    assert_eq!(privacy.answer, SuitabilityAnswer::Yes);
}

#[tokio::test]
async fn flush_now_writes_without_waiting() {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::open(dir.path()).await.unwrap();
    let remote = Arc::new(MockRemote::new());
    let session = Session::load(EngineConfig::default(), store.clone(), remote, Some("p1"))
        .await
        .unwrap();

    session
        .set_suitability_answer("data-quality", SuitabilityAnswer::No)
        .await
        .unwrap();
    session.flush_now().await.unwrap();

    let cached: ProjectState = store.get(&state_key("p1")).await.unwrap().unwrap();
    let check = cached
        .suitability_checks
        .iter()
        .find(|c| c.id == "data-quality")
        .unwrap();
    assert_eq!(check.answer, SuitabilityAnswer::No);
}

#[tokio::test]
async fn scores_follow_the_session_state() {
    let (_dir, _remote, session) = open_session("p1").await;
    assert_eq!(session.feasibility_score().await, 0);

    for id in ["data-quality", "problem-fit", "privacy", "infrastructure"] {
        session
            .set_suitability_answer(id, SuitabilityAnswer::Yes)
            .await
            .unwrap();
    }
    assert_eq!(session.suitability_score().await, 100);

    session
        .set_suitability_answer("privacy", SuitabilityAnswer::No)
        .await
        .unwrap();
    assert_eq!(session.suitability_score().await, 75);
}

#[tokio::test]
async fn acknowledging_all_considerations_flips_the_flag() {
    let (_dir, _remote, session) = open_session("p1").await;
    session.ensure_ethical_considerations().await.unwrap();
    assert!(!session.state().await.ethical_acknowledged);

    session
        .acknowledge_ethics(&["bias".to_string()])
        .await
        .unwrap();
    assert!(!session.state().await.ethical_acknowledged);

    session
        .acknowledge_ethics(&["privacy".to_string()])
        .await
        .unwrap();
    assert!(session.state().await.ethical_acknowledged);
}

#[tokio::test]
async fn superseded_refresh_discards_its_stale_result() {
    let (_dir, remote, session) = open_session("p1").await;
    let session = Arc::new(session);
    session.ensure_ethical_considerations().await.unwrap();

    {
        let mut queue = remote.refresh_queue.lock().await;
        queue.push_back((Duration::from_millis(150), vec![MockRemote::consideration("stale")]));
        queue.push_back((Duration::from_millis(10), vec![MockRemote::consideration("fresh")]));
    }

    let slow = {
        let session = session.clone();
        tokio::spawn(async move { session.refresh_ethical_considerations().await })
    };
    // Let the slow refresh take its token first, then supersede it.
    tokio::time::sleep(Duration::from_millis(50)).await;
    session.refresh_ethical_considerations().await.unwrap();
    slow.await.unwrap().unwrap();

    let state = session.state().await;
    let ids: Vec<&str> = state
        .ethical_considerations
        .iter()
        .map(|c| c.id.as_str())
        .collect();
    assert_eq!(ids, vec!["fresh"]);
}

#[tokio::test]
async fn draft_sessions_get_generated_identifiers() {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::open(dir.path()).await.unwrap();
    let remote = Arc::new(MockRemote::new());
    let session = Session::load(EngineConfig::default(), store, remote, None)
        .await
        .unwrap();
    assert!(session.project_id().starts_with("draft-"));
    assert!(session.state().await.is_draft());
}

//! Session orchestrator: the façade the UI layer talks to.
//!
//! One `Session` per project identifier, and exactly one writer context per
//! project: all mutation funnels through this type. Every mutator validates
//! first and applies second, so a rejected input leaves the state exactly as
//! it was. Successful mutations mark the state dirty; a background task
//! flushes the latest state to the local cache after a debounce window,
//! coalescing bursts of rapid edits into one write.
//!
//! Reconciliation with the remote record happens exactly once, at load,
//! before any interactive mutation. The only mid-session remote refresh is
//! scoped to the ethical-considerations field and guarded by a request
//! sequence number so a superseded refresh discards its stale result.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Notify, RwLock};
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::model::{
    ConstraintKind, ConstraintValue, PhaseId, ProjectState, SuitabilityAnswer, SyncMetadata,
};
use crate::phases::{self, PhaseOutcome};
use crate::remote::ProjectRemote;
use crate::scoring;
use crate::store::{state_key, Store, StoreError};
use crate::sync;

/// Errors surfaced to the UI. All are non-fatal: the session continues and
/// the state is unchanged.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("invalid input: {0}")]
    Validation(String),
    #[error("phase {0} is locked: complete the earlier phases first")]
    PhaseLocked(PhaseId),
    #[error("remote action failed: {0}")]
    RemoteAction(String),
}

pub struct Session {
    project_id: String,
    config: EngineConfig,
    store: Store,
    remote: Arc<dyn ProjectRemote>,
    state: Arc<RwLock<ProjectState>>,
    meta: SyncMetadata,
    dirty: Arc<AtomicBool>,
    flush_signal: Arc<Notify>,
    durability_degraded: Arc<AtomicBool>,
    refresh_seq: Arc<AtomicU64>,
    flush_task: tokio::task::JoinHandle<()>,
}

impl Session {
    /// Open a session for `project_id`, or a fresh draft when `None`.
    ///
    /// Saved projects reconcile against the remote record here, before any
    /// mutation; drafts have no remote record and load straight from cache.
    pub async fn load(
        config: EngineConfig,
        store: Store,
        remote: Arc<dyn ProjectRemote>,
        project_id: Option<&str>,
    ) -> Result<Self, StoreError> {
        let project_id = project_id
            .map(str::to_string)
            .unwrap_or_else(ProjectState::draft_id);

        let is_draft = project_id.starts_with(crate::model::DRAFT_PREFIX);
        let (state, meta, degraded) = if is_draft {
            let (state, meta) = sync::load_local(&store, &project_id).await?;
            (state, meta, false)
        } else {
            let reconciled = sync::reconcile(&store, remote.as_ref(), &project_id).await?;
            (reconciled.state, reconciled.meta, reconciled.durability_degraded)
        };
        info!(project = %project_id, draft = is_draft, "session loaded");

        let state = Arc::new(RwLock::new(state));
        let dirty = Arc::new(AtomicBool::new(false));
        let flush_signal = Arc::new(Notify::new());
        let durability_degraded = Arc::new(AtomicBool::new(degraded));

        let flush_task = tokio::spawn(flush_loop(
            Duration::from_millis(config.flush_debounce_ms),
            state_key(&project_id),
            store.clone(),
            Arc::clone(&state),
            Arc::clone(&dirty),
            Arc::clone(&flush_signal),
            Arc::clone(&durability_degraded),
        ));

        Ok(Self {
            project_id,
            config,
            store,
            remote,
            state,
            meta,
            dirty,
            flush_signal,
            durability_degraded,
            refresh_seq: Arc::new(AtomicU64::new(0)),
            flush_task,
        })
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    pub fn sync_metadata(&self) -> SyncMetadata {
        self.meta
    }

    /// Whether a cache write has failed for lack of space. The in-memory
    /// state stays authoritative; this only reports degraded durability.
    pub fn durability_degraded(&self) -> bool {
        self.durability_degraded.load(Ordering::SeqCst)
    }

    // ─── Derived getters ──────────────────────────────────────────────────────

    pub async fn state(&self) -> ProjectState {
        self.state.read().await.clone()
    }

    pub async fn feasibility_score(&self) -> u8 {
        scoring::feasibility_score(&self.state.read().await.constraints)
    }

    pub async fn suitability_score(&self) -> u8 {
        scoring::suitability_score(&self.state.read().await.suitability_checks)
    }

    pub async fn all_phases_completed(&self) -> bool {
        phases::all_completed(&self.state.read().await.phases)
    }

    pub async fn can_access(&self, phase: PhaseId) -> bool {
        phases::can_access(&self.state.read().await.phases, phase)
    }

    // ─── Mutators ─────────────────────────────────────────────────────────────

    /// Answer a constraint. Select constraints only accept values from their
    /// option list; toggles only accept flags.
    pub async fn set_constraint(
        &self,
        id: &str,
        value: ConstraintValue,
    ) -> Result<(), SessionError> {
        let mut state = self.state.write().await;
        let constraint = state
            .constraints
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or_else(|| SessionError::Validation(format!("unknown constraint: {id}")))?;
        match (&constraint.kind, &value) {
            (ConstraintKind::Select { options }, ConstraintValue::Choice(choice)) => {
                if !options.iter().any(|o| o == choice) {
                    return Err(SessionError::Validation(format!(
                        "'{choice}' is not an option for constraint {id}"
                    )));
                }
            }
            (ConstraintKind::Toggle, ConstraintValue::Flag(_)) => {}
            _ => {
                return Err(SessionError::Validation(format!(
                    "value kind does not match constraint {id}"
                )));
            }
        }
        constraint.value = Some(value);
        drop(state);
        self.mark_dirty();
        Ok(())
    }

    /// Replace the whole phase array (e.g. a restored form draft). The
    /// replacement is validated against the model invariants and never
    /// downgrades an already-completed phase.
    pub async fn set_phases(&self, phases: Vec<crate::model::Phase>) -> Result<(), SessionError> {
        let mut state = self.state.write().await;
        let merged = phases::replace_phases(&state.phases, phases)
            .map_err(|e| SessionError::Validation(e.to_string()))?;
        state.phases = merged;
        drop(state);
        self.mark_dirty();
        Ok(())
    }

    pub async fn set_suitability_answer(
        &self,
        id: &str,
        answer: SuitabilityAnswer,
    ) -> Result<(), SessionError> {
        let mut state = self.state.write().await;
        let check = state
            .suitability_checks
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or_else(|| SessionError::Validation(format!("unknown suitability check: {id}")))?;
        check.answer = answer;
        drop(state);
        self.mark_dirty();
        Ok(())
    }

    /// Store the free-form answers for a phase. Reflection answers are
    /// length-checked against the configured bounds before anything is
    /// written.
    pub async fn set_phase_answer(
        &self,
        phase: PhaseId,
        answer: serde_json::Value,
    ) -> Result<(), SessionError> {
        if phase == PhaseId::Reflection {
            validate_answer_lengths(
                &answer,
                self.config.reflection_min_chars,
                self.config.reflection_max_chars,
            )?;
        }
        self.state.write().await.phase_answers.insert(phase, answer);
        self.mark_dirty();
        Ok(())
    }

    /// Switch the active phase. Locked phases are rejected with
    /// [`SessionError::PhaseLocked`] and the active phase is unchanged.
    pub async fn set_active_phase(&self, phase: PhaseId) -> Result<(), SessionError> {
        let mut state = self.state.write().await;
        if !phases::can_access(&state.phases, phase) {
            return Err(SessionError::PhaseLocked(phase));
        }
        state.active_phase = phase;
        drop(state);
        self.mark_dirty();
        Ok(())
    }

    pub async fn update_phase_progress(
        &self,
        phase: PhaseId,
        completed: u32,
        total: u32,
    ) -> Result<(), SessionError> {
        let mut state = self.state.write().await;
        phases::update_phase_progress(&mut state.phases, phase, completed, total)
            .map_err(|e| SessionError::Validation(e.to_string()))?;
        drop(state);
        self.mark_dirty();
        Ok(())
    }

    /// Complete a phase and open the next one.
    ///
    /// The reflection phase is validated server-side first (the ethical
    /// assessment); if the server declines or is unreachable the local state
    /// machine does not commit and the caller can retry.
    pub async fn complete_phase(&self, phase: PhaseId) -> Result<PhaseOutcome, SessionError> {
        {
            let state = self.state.read().await;
            if !phases::can_access(&state.phases, phase) {
                warn!(project = %self.project_id, %phase, "completion of a locked phase ignored");
                return Ok(PhaseOutcome::Ignored);
            }
            let already_done = state
                .phase(phase)
                .map(|p| p.status == crate::model::PhaseStatus::Completed)
                .unwrap_or(false);
            if already_done {
                return Ok(PhaseOutcome::Ignored);
            }
        }

        if phase == PhaseId::Reflection && !self.is_draft() {
            let answers = {
                let state = self.state.read().await;
                state
                    .phase_answers
                    .get(&phase)
                    .cloned()
                    .unwrap_or(serde_json::Value::Null)
            };
            let outcome = self
                .remote
                .complete_phase(&self.project_id, phase, &answers)
                .await
                .map_err(|e| SessionError::RemoteAction(e.to_string()))?;
            if !outcome.success {
                let reason = outcome
                    .assessment
                    .map(|a| a.summary)
                    .unwrap_or_else(|| "assessment declined".to_string());
                return Err(SessionError::RemoteAction(reason));
            }
        }

        let mut state = self.state.write().await;
        let outcome = phases::complete_phase(&mut state.phases, phase)
            .map_err(|e| SessionError::Validation(e.to_string()))?;
        if let PhaseOutcome::AdvancedTo(next) = outcome {
            state.active_phase = next;
        }
        drop(state);
        self.mark_dirty();
        Ok(outcome)
    }

    /// Acknowledge ethical considerations by id. Recorded remotely first;
    /// the local flags only flip once the server accepted.
    pub async fn acknowledge_ethics(&self, ids: &[String]) -> Result<(), SessionError> {
        if !self.is_draft() {
            self.remote
                .acknowledge_considerations(&self.project_id, ids)
                .await
                .map_err(|e| SessionError::RemoteAction(e.to_string()))?;
        }
        let mut state = self.state.write().await;
        for consideration in &mut state.ethical_considerations {
            if ids.contains(&consideration.id) {
                consideration.acknowledged = true;
            }
        }
        state.ethical_acknowledged = !state.ethical_considerations.is_empty()
            && state.ethical_considerations.iter().all(|c| c.acknowledged);
        drop(state);
        self.mark_dirty();
        Ok(())
    }

    /// Fetch the ethical considerations if none are cached yet.
    pub async fn ensure_ethical_considerations(&self) -> Result<(), SessionError> {
        if self.is_draft() || !self.state.read().await.ethical_considerations.is_empty() {
            return Ok(());
        }
        let considerations = self
            .remote
            .fetch_considerations(&self.project_id)
            .await
            .map_err(|e| SessionError::RemoteAction(e.to_string()))?;
        self.state.write().await.ethical_considerations = considerations;
        self.mark_dirty();
        Ok(())
    }

    /// Regenerate the ethical considerations.
    ///
    /// Scoped to this single field; concurrent edits elsewhere are never
    /// clobbered. A refresh superseded by a newer one discards its result
    /// when it eventually resolves.
    pub async fn refresh_ethical_considerations(&self) -> Result<(), SessionError> {
        let token = self.refresh_seq.fetch_add(1, Ordering::SeqCst) + 1;
        let considerations = self
            .remote
            .refresh_considerations(&self.project_id)
            .await
            .map_err(|e| SessionError::RemoteAction(e.to_string()))?;

        // The token is checked under the write lock: a newer refresh that
        // raced past between resolution and application still wins.
        let mut state = self.state.write().await;
        if self.refresh_seq.load(Ordering::SeqCst) != token {
            debug!(project = %self.project_id, "discarding superseded considerations refresh");
            return Ok(());
        }
        state.ethical_considerations = considerations;
        state.ethical_acknowledged = false;
        drop(state);
        self.mark_dirty();
        Ok(())
    }

    // ─── Persistence ──────────────────────────────────────────────────────────

    /// Flush the current state immediately, bypassing the debounce window.
    /// Quota exhaustion degrades durability but is not an error here.
    pub async fn flush_now(&self) -> Result<(), StoreError> {
        self.dirty.store(false, Ordering::SeqCst);
        let snapshot = self.state.read().await.clone();
        write_snapshot(
            &self.store,
            &state_key(&self.project_id),
            &snapshot,
            &self.durability_degraded,
        )
        .await
    }

    fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::SeqCst);
        self.flush_signal.notify_one();
    }

    fn is_draft(&self) -> bool {
        self.project_id.starts_with(crate::model::DRAFT_PREFIX)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.flush_task.abort();
    }
}

/// Background debounced flush. Waits for a dirty signal, sleeps out the
/// debounce window so bursts coalesce, then writes whatever the state is at
/// flush time — never a stale snapshot captured at mutation time.
async fn flush_loop(
    debounce: Duration,
    key: String,
    store: Store,
    state: Arc<RwLock<ProjectState>>,
    dirty: Arc<AtomicBool>,
    signal: Arc<Notify>,
    degraded: Arc<AtomicBool>,
) {
    loop {
        signal.notified().await;
        tokio::time::sleep(debounce).await;
        if !dirty.swap(false, Ordering::SeqCst) {
            continue;
        }
        let snapshot = state.read().await.clone();
        if let Err(e) = write_snapshot(&store, &key, &snapshot, &degraded).await {
            warn!(err = %e, "cache flush failed");
        }
    }
}

async fn write_snapshot(
    store: &Store,
    key: &str,
    snapshot: &ProjectState,
    degraded: &AtomicBool,
) -> Result<(), StoreError> {
    absorb_quota(store.put(key, snapshot).await, degraded)
}

/// Fold a quota failure into the durability flag; a successful write clears
/// it again. Other storage errors pass through.
fn absorb_quota(result: Result<(), StoreError>, degraded: &AtomicBool) -> Result<(), StoreError> {
    match result {
        Ok(()) => {
            degraded.store(false, Ordering::SeqCst);
            Ok(())
        }
        Err(StoreError::QuotaExceeded) => {
            warn!("storage quota exceeded; continuing in-memory only");
            degraded.store(true, Ordering::SeqCst);
            Ok(())
        }
        Err(e) => Err(e),
    }
}

/// Reflection answers are free-form JSON from the form layer; every string
/// leaf must respect the configured length bounds.
fn validate_answer_lengths(
    value: &serde_json::Value,
    min: usize,
    max: usize,
) -> Result<(), SessionError> {
    match value {
        serde_json::Value::String(s) => {
            let len = s.chars().count();
            if len < min {
                return Err(SessionError::Validation(format!(
                    "answer too short: {len} characters, minimum {min}"
                )));
            }
            if len > max {
                return Err(SessionError::Validation(format!(
                    "answer too long: {len} characters, maximum {max}"
                )));
            }
            Ok(())
        }
        serde_json::Value::Array(items) => {
            items.iter().try_for_each(|v| validate_answer_lengths(v, min, max))
        }
        serde_json::Value::Object(map) => {
            map.values().try_for_each(|v| validate_answer_lengths(v, min, max))
        }
        _ => Ok(()),
    }
}

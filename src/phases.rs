//! Phase state machine: ordered progression with gating.
//!
//! Phase status moves `not-started → in-progress → completed` and is
//! monotonic once completed: a stale progress update arriving after
//! completion is logged and dropped, never applied. The gating predicate is
//! re-derived from the phase array on every call so it can never drift from
//! the statuses it summarizes.

use crate::model::{Phase, PhaseId, PhaseStatus};
use tracing::{debug, warn};

/// Errors for expected domain conditions; never panics.
#[derive(Debug, thiserror::Error)]
pub enum PhaseError {
    #[error("phase {phase} is locked: earlier phases are not completed")]
    Locked { phase: PhaseId },
    #[error("phase {0} is not part of this project")]
    Unknown(PhaseId),
    #[error("invalid progress: {completed} of {total} steps")]
    InvalidProgress { completed: u32, total: u32 },
    #[error("phase list does not match the wizard phases")]
    Mismatch,
}

/// Result of a completion request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseOutcome {
    /// The phase completed and the next phase was opened.
    AdvancedTo(PhaseId),
    /// The completed phase was the last one.
    AllCompleted,
    /// The request was outside the transition graph (already completed, or
    /// not yet reachable) and was dropped.
    Ignored,
}

/// Whether `id` may be entered: the first phase always, any other phase only
/// once every preceding phase is completed.
pub fn can_access(phases: &[Phase], id: PhaseId) -> bool {
    let Some(idx) = phases.iter().position(|p| p.id == id) else {
        return false;
    };
    phases[..idx].iter().all(|p| p.status == PhaseStatus::Completed)
}

/// Whether every phase is completed.
pub fn all_completed(phases: &[Phase]) -> bool {
    phases.iter().all(|p| p.status == PhaseStatus::Completed)
}

/// Complete `id` and open the next phase in order.
///
/// Completing an already-completed phase, or one that is not yet reachable,
/// is a no-op (`PhaseOutcome::Ignored`) rather than an error: late duplicate
/// requests from the UI are expected and harmless.
pub fn complete_phase(phases: &mut [Phase], id: PhaseId) -> Result<PhaseOutcome, PhaseError> {
    let Some(idx) = phases.iter().position(|p| p.id == id) else {
        return Err(PhaseError::Unknown(id));
    };
    if phases[idx].status == PhaseStatus::Completed {
        debug!(phase = %id, "phase already completed; ignoring");
        return Ok(PhaseOutcome::Ignored);
    }
    if !can_access(phases, id) {
        warn!(phase = %id, "completion requested for an unreachable phase; ignoring");
        return Ok(PhaseOutcome::Ignored);
    }

    let phase = &mut phases[idx];
    phase.status = PhaseStatus::Completed;
    phase.progress = 100;
    phase.completed_steps = phase.total_steps;

    match id.next() {
        Some(next_id) => {
            if let Some(next) = phases.iter_mut().find(|p| p.id == next_id) {
                if next.status == PhaseStatus::NotStarted {
                    next.status = PhaseStatus::InProgress;
                    next.progress = 0;
                    next.completed_steps = 0;
                }
            }
            Ok(PhaseOutcome::AdvancedTo(next_id))
        }
        None => Ok(PhaseOutcome::AllCompleted),
    }
}

/// Recompute `progress` and derive status from step counts.
///
/// A phase that already reached `Completed` is never downgraded: an
/// out-of-order update is logged and dropped.
pub fn update_phase_progress(
    phases: &mut [Phase],
    id: PhaseId,
    completed: u32,
    total: u32,
) -> Result<(), PhaseError> {
    if total == 0 || completed > total {
        return Err(PhaseError::InvalidProgress { completed, total });
    }
    let Some(phase) = phases.iter_mut().find(|p| p.id == id) else {
        return Err(PhaseError::Unknown(id));
    };
    if phase.status == PhaseStatus::Completed && completed < total {
        warn!(phase = %id, completed, total, "stale progress update for a completed phase; dropping");
        return Ok(());
    }

    phase.completed_steps = completed;
    phase.total_steps = total;
    phase.progress = ((100.0 * completed as f64) / total as f64).round() as u8;
    // Status derives from the step counts, not the rounded percentage: one
    // step out of hundreds has a progress of 0 but is still started.
    phase.status = if completed == 0 {
        PhaseStatus::NotStarted
    } else if completed == total {
        PhaseStatus::Completed
    } else {
        PhaseStatus::InProgress
    };
    Ok(())
}

/// Validate a full phase-array replacement (e.g. a restored form draft).
///
/// The incoming list must mirror the fixed phase order and satisfy the model
/// invariants. Entries that would downgrade an already-completed phase are
/// kept at their current value and logged, per the monotonicity rule.
pub fn replace_phases(current: &[Phase], incoming: Vec<Phase>) -> Result<Vec<Phase>, PhaseError> {
    if incoming.len() != current.len()
        || incoming.iter().zip(current).any(|(n, c)| n.id != c.id)
    {
        return Err(PhaseError::Mismatch);
    }
    for p in &incoming {
        let consistent = p.total_steps > 0
            && p.completed_steps <= p.total_steps
            && (p.status != PhaseStatus::Completed || p.progress == 100)
            && (p.status != PhaseStatus::NotStarted || p.completed_steps == 0);
        if !consistent {
            return Err(PhaseError::InvalidProgress {
                completed: p.completed_steps,
                total: p.total_steps,
            });
        }
    }
    let merged = incoming
        .into_iter()
        .zip(current)
        .map(|(incoming, current)| {
            if current.status == PhaseStatus::Completed
                && incoming.status != PhaseStatus::Completed
            {
                warn!(phase = %current.id, "ignoring downgrade of a completed phase");
                current.clone()
            } else {
                incoming
            }
        })
        .collect();
    Ok(merged)
}

//! Cache/remote reconciliation.
//!
//! Local-first: the cached state is returned immediately-usable even when
//! the remote is unreachable. When the remote record is strictly newer than
//! the cache, its fields are adopted one by one — a shallow, per-field
//! last-writer-wins, never a deep merge. The reconciler is idempotent:
//! re-running it against an unchanged remote is a no-op.
//!
//! Persistence of the merged result is best-effort: a storage-quota failure
//! degrades durability but never discards the merge — the in-memory state
//! stays authoritative and the session opens on it.

use tracing::{debug, info, warn};

use crate::model::{ProjectState, SyncMetadata};
use crate::remote::{ProjectRemote, ProjectSnapshot};
use crate::store::{meta_key, state_key, Store, StoreError};

/// Result of a reconciliation pass.
#[derive(Debug, Clone)]
pub struct Reconciled {
    pub state: ProjectState,
    pub meta: SyncMetadata,
    /// True when persisting the merge hit the storage quota. The returned
    /// state is authoritative in memory; the cache stays at its previous
    /// sync point until a later write succeeds.
    pub durability_degraded: bool,
}

/// Load the cached state for `project_id` (defaults when absent or corrupt)
/// together with its sync metadata.
pub async fn load_local(
    store: &Store,
    project_id: &str,
) -> Result<(ProjectState, SyncMetadata), StoreError> {
    let state = store
        .get::<ProjectState>(&state_key(project_id))
        .await?
        .unwrap_or_else(|| ProjectState::with_defaults(project_id));
    let meta = store
        .get::<SyncMetadata>(&meta_key(project_id))
        .await?
        .unwrap_or_default();
    Ok((state, meta))
}

/// Reconcile the local cache with the remote record.
///
/// A failed fetch is logged and swallowed: the session continues on cached
/// data, never on an error page.
pub async fn reconcile(
    store: &Store,
    remote: &dyn ProjectRemote,
    project_id: &str,
) -> Result<Reconciled, StoreError> {
    let (mut state, mut meta) = load_local(store, project_id).await?;

    let snapshot = match remote.fetch_snapshot(project_id).await {
        Ok(snapshot) => snapshot,
        Err(e) => {
            warn!(project = project_id, err = %e, "snapshot fetch failed; serving cached state");
            return Ok(Reconciled { state, meta, durability_degraded: false });
        }
    };

    if snapshot.updated_at <= meta.last_sync {
        debug!(
            project = project_id,
            local = %meta.last_sync,
            remote = %snapshot.updated_at,
            "local cache is current; nothing to merge"
        );
        return Ok(Reconciled { state, meta, durability_degraded: false });
    }

    apply_snapshot(&mut state, &snapshot);
    meta = SyncMetadata {
        last_sync: snapshot.updated_at,
        version: snapshot.version,
    };

    let mut degraded = false;
    note_quota(store.put(&state_key(project_id), &state).await, &mut degraded)?;
    if degraded {
        // The cached metadata stays at its old sync point so the next load
        // re-merges against the cache that is actually on disk.
        warn!(project = project_id, "merged snapshot kept in memory only");
    } else {
        note_quota(store.put(&meta_key(project_id), &meta).await, &mut degraded)?;
    }
    info!(
        project = project_id,
        version = meta.version,
        "adopted newer remote snapshot"
    );
    Ok(Reconciled { state, meta, durability_degraded: degraded })
}

/// Overwrite each top-level field the snapshot carries; leave the rest of
/// the local state untouched. This is the complete list of fields a remote
/// snapshot is permitted to override.
pub fn apply_snapshot(state: &mut ProjectState, snapshot: &ProjectSnapshot) {
    if let Some(phases) = &snapshot.phases {
        state.phases = phases.clone();
    }
    if let Some(active) = snapshot.active_phase {
        state.active_phase = active;
    }
    if let Some(constraints) = &snapshot.constraints {
        state.constraints = constraints.clone();
    }
    if let Some(checks) = &snapshot.suitability_checks {
        state.suitability_checks = checks.clone();
    }
    if let Some(answers) = &snapshot.phase_answers {
        state.phase_answers = answers.clone();
    }
    if let Some(considerations) = &snapshot.ethical_considerations {
        state.ethical_considerations = considerations.clone();
    }
    if let Some(acknowledged) = snapshot.ethical_acknowledged {
        state.ethical_acknowledged = acknowledged;
    }
}

/// Fold a quota failure into the degraded flag; other errors pass through.
fn note_quota(result: Result<(), StoreError>, degraded: &mut bool) -> Result<(), StoreError> {
    match result {
        Err(StoreError::QuotaExceeded) => {
            warn!("storage quota exceeded while persisting reconciled state");
            *degraded = true;
            Ok(())
        }
        other => other,
    }
}

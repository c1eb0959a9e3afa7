//! Waypoint — the state engine behind the project-design wizard.
//!
//! The rendering layer, the remote project service, and document export are
//! external collaborators; this crate owns phase progression and gating,
//! readiness scoring, the durable local cache, and cache/remote
//! reconciliation.

pub mod config;
pub mod model;
pub mod phases;
pub mod remote;
pub mod scoring;
pub mod session;
pub mod store;
pub mod sync;

pub use config::EngineConfig;
pub use model::{ProjectState, SyncMetadata};
pub use session::{Session, SessionError};

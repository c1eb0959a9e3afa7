//! Wizard data model.
//!
//! `ProjectState` is the aggregate root for one wizard session: the ordered
//! phase list, the feasibility constraints, the data/ethics suitability
//! checks, and the opaque per-phase answers. One `ProjectState` per project
//! identifier, owned by exactly one [`crate::session::Session`] at a time.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ─── Phases ───────────────────────────────────────────────────────────────────

/// The four wizard phases, in their fixed order. No phase may be skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PhaseId {
    Reflection,
    Scoping,
    Development,
    Evaluation,
}

impl PhaseId {
    /// All phases in wizard order.
    pub const ORDER: [PhaseId; 4] = [
        PhaseId::Reflection,
        PhaseId::Scoping,
        PhaseId::Development,
        PhaseId::Evaluation,
    ];

    /// The phase following this one, or `None` for the last phase.
    pub fn next(self) -> Option<PhaseId> {
        let idx = Self::ORDER.iter().position(|p| *p == self)?;
        Self::ORDER.get(idx + 1).copied()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PhaseId::Reflection => "reflection",
            PhaseId::Scoping => "scoping",
            PhaseId::Development => "development",
            PhaseId::Evaluation => "evaluation",
        }
    }
}

impl fmt::Display for PhaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PhaseStatus {
    NotStarted,
    InProgress,
    Completed,
}

/// One ordered stage of the wizard.
///
/// Invariants (enforced by the phase state machine, not by panics):
/// `completed_steps <= total_steps`; `Completed` implies `progress == 100`;
/// `NotStarted` implies `completed_steps == 0`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Phase {
    pub id: PhaseId,
    pub name: String,
    pub status: PhaseStatus,
    /// Percentage in 0..=100, derived from step counts.
    pub progress: u8,
    pub total_steps: u32,
    pub completed_steps: u32,
}

impl Phase {
    fn new(id: PhaseId, name: &str, total_steps: u32) -> Self {
        Self {
            id,
            name: name.to_string(),
            status: PhaseStatus::NotStarted,
            progress: 0,
            total_steps,
            completed_steps: 0,
        }
    }
}

// ─── Constraints ──────────────────────────────────────────────────────────────

/// How a constraint is answered: a pick from a fixed option list, or a flag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ConstraintKind {
    Select { options: Vec<String> },
    Toggle,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConstraintValue {
    Choice(String),
    Flag(bool),
}

/// One feasibility input (budget, AI experience, stakeholder support, …).
///
/// `value` is `None` until answered; unanswered constraints are excluded from
/// scoring rather than scored as zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Constraint {
    pub id: String,
    pub label: String,
    #[serde(flatten)]
    pub kind: ConstraintKind,
    pub value: Option<ConstraintValue>,
}

impl Constraint {
    fn select(id: &str, label: &str, options: &[&str]) -> Self {
        Self {
            id: id.to_string(),
            label: label.to_string(),
            kind: ConstraintKind::Select {
                options: options.iter().map(|o| o.to_string()).collect(),
            },
            value: None,
        }
    }

    fn toggle(id: &str, label: &str) -> Self {
        Self {
            id: id.to_string(),
            label: label.to_string(),
            kind: ConstraintKind::Toggle,
            value: None,
        }
    }
}

// ─── Suitability checks ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SuitabilityAnswer {
    Yes,
    No,
    Unknown,
}

/// Which aspect a suitability check judges. Affects how an `unknown` answer
/// is weighed: unknown data quality is riskier than unknown infrastructure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckCategory {
    Data,
    Ethics,
    Infrastructure,
}

/// One data/ethics suitability judgment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuitabilityCheck {
    pub id: String,
    pub question: String,
    pub answer: SuitabilityAnswer,
    pub description: String,
    pub category: CheckCategory,
}

impl SuitabilityCheck {
    fn new(id: &str, question: &str, description: &str, category: CheckCategory) -> Self {
        Self {
            id: id.to_string(),
            question: question.to_string(),
            answer: SuitabilityAnswer::Unknown,
            description: description.to_string(),
            category,
        }
    }
}

// ─── Ethical considerations ───────────────────────────────────────────────────

/// A server-generated ethical consideration for the reflection phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Consideration {
    pub id: String,
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub acknowledged: bool,
}

// ─── Aggregate ────────────────────────────────────────────────────────────────

/// Prefix used for unsaved draft sessions that have no remote record yet.
pub const DRAFT_PREFIX: &str = "draft-";

/// The aggregate root for one wizard session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectState {
    pub project_id: String,
    pub phases: Vec<Phase>,
    pub active_phase: PhaseId,
    pub constraints: Vec<Constraint>,
    pub suitability_checks: Vec<SuitabilityCheck>,
    /// Free-form answers keyed by phase; the engine stores them opaquely.
    #[serde(default)]
    pub phase_answers: BTreeMap<PhaseId, serde_json::Value>,
    #[serde(default)]
    pub ethical_considerations: Vec<Consideration>,
    #[serde(default)]
    pub ethical_acknowledged: bool,
}

impl ProjectState {
    /// Seed a fresh wizard session for `project_id`.
    pub fn with_defaults(project_id: &str) -> Self {
        Self {
            project_id: project_id.to_string(),
            phases: vec![
                Phase::new(PhaseId::Reflection, "Reflection", 5),
                Phase::new(PhaseId::Scoping, "Scoping", 4),
                Phase::new(PhaseId::Development, "Development", 6),
                Phase::new(PhaseId::Evaluation, "Evaluation", 3),
            ],
            active_phase: PhaseId::Reflection,
            constraints: vec![
                Constraint::select("budget", "Available budget", &["limited", "moderate", "substantial"]),
                Constraint::select("team-size", "Team size", &["solo", "small", "large"]),
                Constraint::select(
                    "ai-experience",
                    "Prior AI experience",
                    &["none", "some", "extensive"],
                ),
                Constraint::select("stakeholder-support", "Stakeholder support", &["low", "medium", "high"]),
                Constraint::select(
                    "data-availability",
                    "Data availability",
                    &["none", "partial", "full"],
                ),
                Constraint::toggle("connectivity", "Reliable internet connectivity"),
            ],
            suitability_checks: vec![
                SuitabilityCheck::new(
                    "data-quality",
                    "Is relevant data available and of sufficient quality?",
                    "AI projects need representative, well-maintained data.",
                    CheckCategory::Data,
                ),
                SuitabilityCheck::new(
                    "problem-fit",
                    "Is the problem a good fit for an AI approach?",
                    "Pattern-rich, repetitive problems suit AI; one-off judgment calls do not.",
                    CheckCategory::Data,
                ),
                SuitabilityCheck::new(
                    "privacy",
                    "Can personal data be adequately protected?",
                    "Consider consent, minimization, and retention obligations.",
                    CheckCategory::Ethics,
                ),
                SuitabilityCheck::new(
                    "infrastructure",
                    "Is the technical infrastructure in place to run the solution?",
                    "Hosting, integration points, and maintenance capacity.",
                    CheckCategory::Infrastructure,
                ),
            ],
            phase_answers: BTreeMap::new(),
            ethical_considerations: Vec::new(),
            ethical_acknowledged: false,
        }
    }

    /// Generate a fresh draft identifier for an unsaved session.
    pub fn draft_id() -> String {
        format!("{DRAFT_PREFIX}{}", uuid::Uuid::new_v4())
    }

    /// Whether this session has a remote record to reconcile against.
    pub fn is_draft(&self) -> bool {
        self.project_id.starts_with(DRAFT_PREFIX)
    }

    pub fn phase(&self, id: PhaseId) -> Option<&Phase> {
        self.phases.iter().find(|p| p.id == id)
    }
}

// ─── Sync metadata ────────────────────────────────────────────────────────────

/// Provenance of the cached copy of a project, stored alongside but
/// separately from the state itself.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncMetadata {
    pub last_sync: DateTime<Utc>,
    pub version: i64,
}

impl Default for SyncMetadata {
    fn default() -> Self {
        Self {
            last_sync: DateTime::<Utc>::UNIX_EPOCH,
            version: 0,
        }
    }
}

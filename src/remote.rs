//! Remote project service client.
//!
//! The engine consumes the remote service through the [`ProjectRemote`]
//! trait so tests can substitute a mock. [`HttpRemote`] is the production
//! implementation: JSON over HTTP with request timeouts and exponential
//! backoff on transient failures.
//!
//! A failed snapshot fetch is never fatal — the reconciler falls back to the
//! local cache. Server-validated actions (phase completion, acknowledgement)
//! do surface their failures so the caller can retry.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, warn};

use crate::model::{Consideration, Constraint, PhaseId, Phase, SuitabilityCheck};

// ─── Wire types ───────────────────────────────────────────────────────────────

/// The authoritative remote record for a project.
///
/// Every state field is optional: a snapshot overrides only the fields it
/// carries, and the reconciler leaves the rest of the local state untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectSnapshot {
    pub updated_at: DateTime<Utc>,
    pub version: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phases: Option<Vec<Phase>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_phase: Option<PhaseId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constraints: Option<Vec<Constraint>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suitability_checks: Option<Vec<SuitabilityCheck>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase_answers: Option<BTreeMap<PhaseId, serde_json::Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ethical_considerations: Option<Vec<Consideration>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ethical_acknowledged: Option<bool>,
}

/// Server verdict on a phase-completion request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionOutcome {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assessment: Option<PhaseAssessment>,
}

/// Server-side assessment returned with a validated completion (e.g. the
/// reflection phase's ethical assessment).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhaseAssessment {
    pub summary: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<u8>,
}

#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    #[error("remote request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("remote rejected the request: {0}")]
    Rejected(String),
}

// ─── Trait ────────────────────────────────────────────────────────────────────

/// The engine's view of the remote project service.
#[async_trait]
pub trait ProjectRemote: Send + Sync {
    /// Fetch the authoritative record for `project_id`.
    async fn fetch_snapshot(&self, project_id: &str) -> Result<ProjectSnapshot, RemoteError>;

    /// Ask the server to validate and record a phase completion.
    async fn complete_phase(
        &self,
        project_id: &str,
        phase: PhaseId,
        answers: &serde_json::Value,
    ) -> Result<CompletionOutcome, RemoteError>;

    /// Fetch the generated ethical considerations for a project.
    async fn fetch_considerations(&self, project_id: &str)
        -> Result<Vec<Consideration>, RemoteError>;

    /// Record acknowledgement of the given consideration ids.
    async fn acknowledge_considerations(
        &self,
        project_id: &str,
        ids: &[String],
    ) -> Result<(), RemoteError>;

    /// Regenerate the ethical considerations. Scoped to this one field —
    /// never a whole-state overwrite.
    async fn refresh_considerations(&self, project_id: &str)
        -> Result<Vec<Consideration>, RemoteError>;
}

// ─── Retry policy ─────────────────────────────────────────────────────────────

/// Exponential backoff for remote calls.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Delay before the second attempt; doubled each retry.
    pub initial_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    /// No real waiting — for tests.
    pub fn instant() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1),
        }
    }
}

async fn with_retries<T, F, Fut>(policy: &RetryPolicy, mut op: F) -> Result<T, RemoteError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, RemoteError>>,
{
    let mut delay = policy.initial_delay;
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt >= policy.max_attempts => return Err(e),
            Err(e) => {
                debug!(attempt, err = %e, "remote call failed; retrying in {delay:?}");
                tokio::time::sleep(delay).await;
                delay *= 2;
                attempt += 1;
            }
        }
    }
}

// ─── HTTP implementation ──────────────────────────────────────────────────────

pub struct HttpRemote {
    client: reqwest::Client,
    base_url: String,
    retry: RetryPolicy,
}

impl HttpRemote {
    pub fn new(base_url: &str) -> Result<Self, RemoteError> {
        Self::with_retry(base_url, RetryPolicy::default())
    }

    pub fn with_retry(base_url: &str, retry: RetryPolicy) -> Result<Self, RemoteError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            retry,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }
}

#[async_trait]
impl ProjectRemote for HttpRemote {
    async fn fetch_snapshot(&self, project_id: &str) -> Result<ProjectSnapshot, RemoteError> {
        let url = self.url(&format!("/projects/{project_id}/snapshot"));
        with_retries(&self.retry, || async {
            let resp = self.client.get(&url).send().await?.error_for_status()?;
            Ok(resp.json::<ProjectSnapshot>().await?)
        })
        .await
    }

    async fn complete_phase(
        &self,
        project_id: &str,
        phase: PhaseId,
        answers: &serde_json::Value,
    ) -> Result<CompletionOutcome, RemoteError> {
        let url = self.url(&format!("/projects/{project_id}/phases/{phase}/complete"));
        let body = serde_json::json!({ "answers": answers });
        // No retries: completion is not known to be idempotent server-side.
        let resp = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await?
            .error_for_status()?;
        let outcome: CompletionOutcome = resp.json().await?;
        if !outcome.success {
            warn!(project = project_id, %phase, "server declined phase completion");
        }
        Ok(outcome)
    }

    async fn fetch_considerations(
        &self,
        project_id: &str,
    ) -> Result<Vec<Consideration>, RemoteError> {
        let url = self.url(&format!("/projects/{project_id}/ethical-considerations"));
        with_retries(&self.retry, || async {
            let resp = self.client.get(&url).send().await?.error_for_status()?;
            Ok(resp.json::<Vec<Consideration>>().await?)
        })
        .await
    }

    async fn acknowledge_considerations(
        &self,
        project_id: &str,
        ids: &[String],
    ) -> Result<(), RemoteError> {
        let url = self.url(&format!("/projects/{project_id}/ethical-considerations/acknowledge"));
        let body = serde_json::json!({ "ids": ids });
        self.client
            .post(&url)
            .json(&body)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn refresh_considerations(
        &self,
        project_id: &str,
    ) -> Result<Vec<Consideration>, RemoteError> {
        let url = self.url(&format!("/projects/{project_id}/ethical-considerations/refresh"));
        let resp = self
            .client
            .post(&url)
            .send()
            .await?
            .error_for_status()?;
        Ok(resp.json::<Vec<Consideration>>().await?)
    }
}

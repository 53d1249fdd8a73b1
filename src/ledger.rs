use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use uuid::Uuid;

pub type JobId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Listing,
    Compatibility,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CopyMode {
    #[default]
    Add,
    Replace,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    InProgress,
    Success,
    Partial,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetStatus {
    Pending,
    InProgress,
    Success,
    Error,
    NeedsAdditionalInfo,
}

impl TargetStatus {
    /// Terminal statuses never transition again within a job; the paused
    /// status may move onward on resume.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TargetStatus::Success | TargetStatus::Error)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TargetStatus::Pending => "pending",
            TargetStatus::InProgress => "in_progress",
            TargetStatus::Success => "success",
            TargetStatus::Error => "error",
            TargetStatus::NeedsAdditionalInfo => "needs_additional_info",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceRef {
    pub account: String,
    pub item_id: String,
}

/// One (destination account, destination listing) pair. Listing-copy targets
/// have no destination listing up front; the produced id lands on the outcome.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TargetRef {
    pub account: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_id: Option<String>,
}

impl TargetRef {
    pub fn account(account: impl Into<String>) -> Self {
        Self {
            account: account.into(),
            item_id: None,
        }
    }

    pub fn listing(account: impl Into<String>, item_id: impl Into<String>) -> Self {
        Self {
            account: account.into(),
            item_id: Some(item_id.into()),
        }
    }

    /// Stable addressing key for ledger rows.
    pub fn key(&self) -> String {
        format!("{}:{}", self.account, self.item_id.as_deref().unwrap_or("-"))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetOutcome {
    pub destination: TargetRef,
    pub status: TargetStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub produced_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub attempts: u32,
}

impl TargetOutcome {
    pub fn pending(destination: TargetRef) -> Self {
        Self {
            destination,
            status: TargetStatus::Pending,
            produced_id: None,
            error: None,
            attempts: 0,
        }
    }
}

/// The per-episode result written by the single worker owning a target.
#[derive(Debug, Clone)]
pub struct TargetUpdate {
    pub status: TargetStatus,
    pub produced_id: Option<String>,
    pub error: Option<String>,
    pub attempts: u32,
}

impl TargetUpdate {
    pub fn in_progress(attempts: u32) -> Self {
        Self {
            status: TargetStatus::InProgress,
            produced_id: None,
            error: None,
            attempts,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: JobId,
    pub kind: JobKind,
    pub source: SourceRef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<CopyMode>,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub initiated_by: String,
    pub targets: Vec<TargetOutcome>,
}

impl JobRecord {
    /// New job in the durably-visible shape: `in_progress` with every target
    /// pending, ready to be written before any external mutation.
    pub fn new(
        kind: JobKind,
        source: SourceRef,
        mode: Option<CopyMode>,
        destinations: Vec<TargetRef>,
        initiated_by: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            source,
            mode,
            status: JobStatus::InProgress,
            created_at: Utc::now(),
            initiated_by: initiated_by.into(),
            targets: destinations.into_iter().map(TargetOutcome::pending).collect(),
        }
    }

    pub fn total_targets(&self) -> usize {
        self.targets.len()
    }
}

/// Aggregate job status as a pure function of the children's statuses. Any
/// unsettled child keeps the job `in_progress`; otherwise all-success and
/// all-error collapse, and any mix (including paused targets) is `partial`.
pub fn aggregate_status<I>(statuses: I) -> JobStatus
where
    I: IntoIterator<Item = TargetStatus>,
{
    let mut total = 0usize;
    let mut success = 0usize;
    let mut error = 0usize;
    for status in statuses {
        total += 1;
        match status {
            TargetStatus::Pending | TargetStatus::InProgress => return JobStatus::InProgress,
            TargetStatus::Success => success += 1,
            TargetStatus::Error => error += 1,
            TargetStatus::NeedsAdditionalInfo => {}
        }
    }
    if total == 0 || error == total {
        JobStatus::Error
    } else if success == total {
        JobStatus::Success
    } else {
        JobStatus::Partial
    }
}

#[derive(Debug, Clone, Error)]
pub enum LedgerError {
    #[error("ledger request failed: {0}")]
    Request(String),
    #[error("ledger returned an invalid response: {0}")]
    Deserialize(String),
    #[error("job not found")]
    NotFound,
    #[error("refusing to overwrite terminal outcome for target `{target}`")]
    TerminalOverwrite { target: String },
}

/// Durable, pollable record of replication jobs. `create` must complete
/// before the first external mutation for that job; `record_target` is
/// idempotent per (job, target) episode and safe under concurrent calls from
/// sibling targets.
#[async_trait]
pub trait Ledger: Send + Sync {
    async fn create(&self, job: &JobRecord) -> Result<(), LedgerError>;

    async fn record_target(
        &self,
        job_id: JobId,
        destination: &TargetRef,
        update: TargetUpdate,
    ) -> Result<(), LedgerError>;

    async fn set_job_status(&self, job_id: JobId, status: JobStatus) -> Result<(), LedgerError>;

    async fn read(&self, job_id: JobId) -> Result<Option<JobRecord>, LedgerError>;

    async fn list_recent(&self, limit: usize) -> Result<Vec<JobRecord>, LedgerError>;
}

/// In-process ledger used when no durable backend is configured, and by the
/// engine tests.
#[derive(Clone, Default)]
pub struct MemoryLedger {
    jobs: Arc<Mutex<HashMap<JobId, JobRecord>>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Ledger for MemoryLedger {
    async fn create(&self, job: &JobRecord) -> Result<(), LedgerError> {
        let mut guard = self.jobs.lock().await;
        guard.insert(job.id, job.clone());
        Ok(())
    }

    async fn record_target(
        &self,
        job_id: JobId,
        destination: &TargetRef,
        update: TargetUpdate,
    ) -> Result<(), LedgerError> {
        let mut guard = self.jobs.lock().await;
        let job = guard.get_mut(&job_id).ok_or(LedgerError::NotFound)?;
        let outcome = job
            .targets
            .iter_mut()
            .find(|t| t.destination == *destination)
            .ok_or(LedgerError::NotFound)?;
        if outcome.status.is_terminal() {
            if outcome.status == update.status {
                return Ok(());
            }
            return Err(LedgerError::TerminalOverwrite {
                target: destination.key(),
            });
        }
        outcome.status = update.status;
        if update.produced_id.is_some() {
            outcome.produced_id = update.produced_id;
        }
        outcome.error = update.error;
        outcome.attempts = update.attempts;
        Ok(())
    }

    async fn set_job_status(&self, job_id: JobId, status: JobStatus) -> Result<(), LedgerError> {
        let mut guard = self.jobs.lock().await;
        let job = guard.get_mut(&job_id).ok_or(LedgerError::NotFound)?;
        job.status = status;
        Ok(())
    }

    async fn read(&self, job_id: JobId) -> Result<Option<JobRecord>, LedgerError> {
        let guard = self.jobs.lock().await;
        Ok(guard.get(&job_id).cloned())
    }

    async fn list_recent(&self, limit: usize) -> Result<Vec<JobRecord>, LedgerError> {
        let guard = self.jobs.lock().await;
        let mut jobs: Vec<JobRecord> = guard.values().cloned().collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        jobs.truncate(limit);
        Ok(jobs)
    }
}

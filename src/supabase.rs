use crate::http::build_client;
use crate::ledger::{
    CopyMode, JobId, JobKind, JobRecord, JobStatus, Ledger, LedgerError, SourceRef, TargetOutcome,
    TargetRef, TargetStatus, TargetUpdate,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// PostgREST-backed ledger. Jobs and targets live in separate tables so a
/// per-target write is a single-row PATCH, safe under concurrent workers of
/// the same job.
#[derive(Debug, Clone)]
pub struct SupabaseLedger {
    base_url: String,
    service_key: String,
    http: Client,
}

#[derive(Debug, Serialize, Deserialize)]
struct JobRow {
    id: Uuid,
    kind: JobKind,
    source_account: String,
    source_item_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    mode: Option<CopyMode>,
    status: JobStatus,
    created_at: DateTime<Utc>,
    initiated_by: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct TargetRow {
    job_id: Uuid,
    destination_key: String,
    account: String,
    #[serde(default)]
    item_id: Option<String>,
    status: TargetStatus,
    #[serde(default)]
    produced_id: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    attempts: i32,
}

#[derive(Debug, Serialize)]
struct TargetPatch {
    status: TargetStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    produced_id: Option<String>,
    error: Option<String>,
    attempts: i32,
}

impl SupabaseLedger {
    pub fn from_env() -> Option<Self> {
        let base_url = std::env::var("SUPABASE_URL").ok()?;
        let service_key = std::env::var("SUPABASE_SERVICE_ROLE_KEY")
            .or_else(|_| std::env::var("SUPABASE_SERVICE_KEY"))
            .or_else(|_| std::env::var("SUPABASE_KEY"))
            .ok()?;
        Some(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            service_key,
            http: build_client(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, path)
    }

    fn authed(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        request
            .header("apikey", &self.service_key)
            .header("Authorization", format!("Bearer {}", self.service_key))
    }

    async fn insert<T: Serialize + ?Sized>(&self, path: &str, body: &T) -> Result<(), LedgerError> {
        let response = self
            .authed(self.http.post(self.url(path)))
            .header("Prefer", "return=minimal")
            .json(body)
            .send()
            .await
            .map_err(|err| LedgerError::Request(err.to_string()))?;
        if !response.status().is_success() {
            return Err(LedgerError::Request(format!("HTTP {}", response.status())));
        }
        Ok(())
    }

    async fn select<T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
    ) -> Result<Vec<T>, LedgerError> {
        let response = self
            .authed(self.http.get(self.url(path)))
            .send()
            .await
            .map_err(|err| LedgerError::Request(err.to_string()))?;
        if !response.status().is_success() {
            return Err(LedgerError::Request(format!("HTTP {}", response.status())));
        }
        response
            .json()
            .await
            .map_err(|err| LedgerError::Deserialize(err.to_string()))
    }

    async fn targets_for(&self, job_ids: &[Uuid]) -> Result<Vec<TargetRow>, LedgerError> {
        if job_ids.is_empty() {
            return Ok(Vec::new());
        }
        let ids = job_ids
            .iter()
            .map(Uuid::to_string)
            .collect::<Vec<_>>()
            .join(",");
        self.select(&format!(
            "replication_targets?job_id=in.({ids})&order=destination_key.asc"
        ))
        .await
    }
}

fn assemble(job: JobRow, targets: Vec<TargetRow>) -> JobRecord {
    JobRecord {
        id: job.id,
        kind: job.kind,
        source: SourceRef {
            account: job.source_account,
            item_id: job.source_item_id,
        },
        mode: job.mode,
        status: job.status,
        created_at: job.created_at,
        initiated_by: job.initiated_by,
        targets: targets
            .into_iter()
            .map(|row| TargetOutcome {
                destination: TargetRef {
                    account: row.account,
                    item_id: row.item_id,
                },
                status: row.status,
                produced_id: row.produced_id,
                error: row.error,
                attempts: row.attempts.max(0) as u32,
            })
            .collect(),
    }
}

#[async_trait]
impl Ledger for SupabaseLedger {
    async fn create(&self, job: &JobRecord) -> Result<(), LedgerError> {
        let job_row = JobRow {
            id: job.id,
            kind: job.kind,
            source_account: job.source.account.clone(),
            source_item_id: job.source.item_id.clone(),
            mode: job.mode,
            status: job.status,
            created_at: job.created_at,
            initiated_by: job.initiated_by.clone(),
        };
        self.insert("replication_jobs", &job_row).await?;

        let target_rows: Vec<TargetRow> = job
            .targets
            .iter()
            .map(|outcome| TargetRow {
                job_id: job.id,
                destination_key: outcome.destination.key(),
                account: outcome.destination.account.clone(),
                item_id: outcome.destination.item_id.clone(),
                status: outcome.status,
                produced_id: outcome.produced_id.clone(),
                error: outcome.error.clone(),
                attempts: outcome.attempts as i32,
            })
            .collect();
        self.insert("replication_targets", &target_rows).await
    }

    async fn record_target(
        &self,
        job_id: JobId,
        destination: &TargetRef,
        update: TargetUpdate,
    ) -> Result<(), LedgerError> {
        // The status filter makes the write a no-op against terminal rows, so
        // a stale worker can never overwrite a settled outcome.
        let path = format!(
            "replication_targets?job_id=eq.{}&destination_key=eq.{}&status=in.(pending,in_progress,needs_additional_info)",
            job_id,
            urlencoding::encode(&destination.key()),
        );
        let patch = TargetPatch {
            status: update.status,
            produced_id: update.produced_id,
            error: update.error,
            attempts: update.attempts as i32,
        };
        let response = self
            .authed(self.http.patch(self.url(&path)))
            .header("Prefer", "return=representation")
            .json(&patch)
            .send()
            .await
            .map_err(|err| LedgerError::Request(err.to_string()))?;
        if !response.status().is_success() {
            return Err(LedgerError::Request(format!("HTTP {}", response.status())));
        }
        let updated: Vec<TargetRow> = response
            .json()
            .await
            .map_err(|err| LedgerError::Deserialize(err.to_string()))?;
        if !updated.is_empty() {
            return Ok(());
        }

        // Nothing matched: the row is unknown, or already terminal.
        let existing: Vec<TargetRow> = self
            .select(&format!(
                "replication_targets?job_id=eq.{}&destination_key=eq.{}&limit=1",
                job_id,
                urlencoding::encode(&destination.key()),
            ))
            .await?;
        match existing.first() {
            None => Err(LedgerError::NotFound),
            Some(row) if row.status == update.status => Ok(()),
            Some(_) => Err(LedgerError::TerminalOverwrite {
                target: destination.key(),
            }),
        }
    }

    async fn set_job_status(&self, job_id: JobId, status: JobStatus) -> Result<(), LedgerError> {
        let response = self
            .authed(
                self.http
                    .patch(self.url(&format!("replication_jobs?id=eq.{job_id}"))),
            )
            .header("Prefer", "return=minimal")
            .json(&serde_json::json!({ "status": status }))
            .send()
            .await
            .map_err(|err| LedgerError::Request(err.to_string()))?;
        if !response.status().is_success() {
            return Err(LedgerError::Request(format!("HTTP {}", response.status())));
        }
        Ok(())
    }

    async fn read(&self, job_id: JobId) -> Result<Option<JobRecord>, LedgerError> {
        let mut jobs: Vec<JobRow> = self
            .select(&format!("replication_jobs?id=eq.{job_id}&limit=1"))
            .await?;
        let Some(job) = jobs.pop() else {
            return Ok(None);
        };
        let targets = self.targets_for(&[job_id]).await?;
        Ok(Some(assemble(job, targets)))
    }

    async fn list_recent(&self, limit: usize) -> Result<Vec<JobRecord>, LedgerError> {
        let jobs: Vec<JobRow> = self
            .select(&format!(
                "replication_jobs?order=created_at.desc&limit={limit}"
            ))
            .await?;
        let ids: Vec<Uuid> = jobs.iter().map(|j| j.id).collect();
        let mut targets = self.targets_for(&ids).await?;
        Ok(jobs
            .into_iter()
            .map(|job| {
                let mut own = Vec::new();
                let mut rest = Vec::new();
                for row in targets.drain(..) {
                    if row.job_id == job.id {
                        own.push(row);
                    } else {
                        rest.push(row);
                    }
                }
                targets = rest;
                assemble(job, own)
            })
            .collect())
    }
}

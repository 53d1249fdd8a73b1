use crate::ledger::CopyMode;
use crate::replication::PackageDimensions;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Copy one or more listings from a source account to destination accounts.
/// Item ids may arrive comma- or newline-separated inside a single entry.
#[derive(Debug, Clone, Deserialize)]
pub struct ListingReplicationRequest {
    pub source_account: String,
    pub item_ids: Vec<String>,
    pub destination_accounts: Vec<String>,
}

impl ListingReplicationRequest {
    pub fn clean_item_ids(&self) -> Vec<String> {
        let mut ids = Vec::new();
        for raw in &self.item_ids {
            for part in raw.replace(',', "\n").split('\n') {
                let part = part.trim();
                if !part.is_empty() && !ids.iter().any(|existing| existing == part) {
                    ids.push(part.to_string());
                }
            }
        }
        ids
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CompatibilitySourceInput {
    pub account: String,
    pub item_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TargetInput {
    pub account: String,
    pub item_id: String,
}

/// Replicate compatibility data to explicit targets, or to every listing
/// matching the given catalog identifiers across connected accounts.
#[derive(Debug, Clone, Deserialize)]
pub struct CompatibilityReplicationRequest {
    pub source: CompatibilitySourceInput,
    #[serde(default)]
    pub mode: CopyMode,
    #[serde(default)]
    pub targets: Vec<TargetInput>,
    #[serde(default)]
    pub skus: Vec<String>,
    /// Restrict SKU resolution to these accounts; all connected when absent.
    #[serde(default)]
    pub accounts: Option<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CatalogSearchRequest {
    pub skus: Vec<String>,
    #[serde(default)]
    pub accounts: Option<Vec<String>>,
}

/// Supply the values a paused target is waiting for. Without an account
/// selector, every paused target of the job resumes.
#[derive(Debug, Clone, Deserialize)]
pub struct ResumeRequest {
    #[serde(default)]
    pub accounts: Option<Vec<String>>,
    pub dimensions: PackageDimensions,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnqueueResponse {
    pub job_ids: Vec<Uuid>,
    pub total_targets: usize,
}

#[derive(Debug, Serialize)]
pub struct ElevateResponse {
    pub elevated: bool,
    pub already_held: bool,
}

#[derive(Debug, Deserialize)]
pub struct ElevateRequest {
    pub secret: String,
}

/// Read-only summary shown before submitting a replication.
#[derive(Debug, Serialize)]
pub struct ListingPreview {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub currency_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<String>,
    pub pictures_count: usize,
    pub variations_count: usize,
    pub attributes_count: usize,
    pub has_compatibilities: bool,
    pub compat_count: usize,
    pub description_length: usize,
}

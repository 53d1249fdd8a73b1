use super::resolver::DestinationSnapshot;
use crate::ledger::CopyMode;
use crate::marketplace::{AggregateCopyRequest, Attempted, CallFailure, MarketplaceGateway};
use thiserror::Error;

/// The one call recipe a resolved destination maps to. Selection is a pure
/// function of the snapshot and the caller's mode; each variant corresponds
/// to exactly one mutating request shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompatPlan {
    /// Destination carries no compatibility data: single additive create.
    CreateFresh,
    /// Destination has data, caller chose add: combined merge call; the
    /// platform deduplicates overlapping entries.
    MergeIntoExisting,
    /// Destination has data, caller chose replace: delete-existing +
    /// create-from-source.
    ReplaceExisting { delete_ids: Vec<String> },
    /// Destination is an aggregate product: dedicated copy-paste recipe that
    /// references the aggregate in the URL and the source listing in the
    /// body, never both ids side by side.
    AggregateCopyPaste {
        user_product_id: String,
        domain_id: String,
        category_id: String,
    },
}

#[derive(Debug, Clone, Error)]
pub enum PlanError {
    #[error("cannot determine domain for aggregate copy to `{user_product_id}`")]
    MissingDomain { user_product_id: String },
    #[error("cannot determine category for aggregate copy to `{user_product_id}`")]
    MissingCategory { user_product_id: String },
}

/// Pick the call recipe for one destination. `source_domain_id` is the domain
/// observed on the source listing's compatibility data, used when the
/// destination read does not expose one.
pub fn select_plan(
    snapshot: &DestinationSnapshot,
    mode: CopyMode,
    source_domain_id: Option<&str>,
) -> Result<CompatPlan, PlanError> {
    if let Some(user_product_id) = &snapshot.aggregate_product_id {
        let domain_id = snapshot
            .domain_id
            .as_deref()
            .or(source_domain_id)
            .ok_or_else(|| PlanError::MissingDomain {
                user_product_id: user_product_id.clone(),
            })?;
        let category_id =
            snapshot
                .category_id
                .as_deref()
                .ok_or_else(|| PlanError::MissingCategory {
                    user_product_id: user_product_id.clone(),
                })?;
        return Ok(CompatPlan::AggregateCopyPaste {
            user_product_id: user_product_id.clone(),
            domain_id: domain_id.to_string(),
            category_id: category_id.to_string(),
        });
    }

    if !snapshot.has_existing_compatibility {
        return Ok(CompatPlan::CreateFresh);
    }

    match mode {
        CopyMode::Add => Ok(CompatPlan::MergeIntoExisting),
        CopyMode::Replace => Ok(CompatPlan::ReplaceExisting {
            delete_ids: snapshot.existing_product_ids.clone(),
        }),
    }
}

#[derive(Debug, Error)]
pub enum StepError {
    #[error(transparent)]
    Call(#[from] CallFailure),
    /// Two-step replace where the delete landed but the create did not: the
    /// destination is left with no compatibility data at all, which is worse
    /// than having done nothing and must stay distinguishable.
    #[error("replace removed existing data before new data was created: {failure}")]
    ReplaceLeftEmpty { failure: CallFailure },
}

impl StepError {
    pub fn attempts(&self) -> u32 {
        match self {
            StepError::Call(failure) => failure.attempts,
            StepError::ReplaceLeftEmpty { failure } => failure.attempts,
        }
    }
}

/// Issue the plan's one recipe against the destination. The replace recipe is
/// a single atomic request when the platform supports it; otherwise it
/// degrades to delete-then-create with the in-between failure classified
/// separately.
pub async fn execute_plan(
    gateway: &dyn MarketplaceGateway,
    account: &str,
    item_id: &str,
    source_item_id: &str,
    plan: &CompatPlan,
) -> Result<Attempted<()>, StepError> {
    match plan {
        CompatPlan::CreateFresh => Ok(gateway
            .create_compatibilities_from(account, item_id, source_item_id)
            .await?),
        CompatPlan::MergeIntoExisting => Ok(gateway
            .merge_compatibilities_from(account, item_id, source_item_id)
            .await?),
        CompatPlan::ReplaceExisting { delete_ids } => {
            if gateway.supports_atomic_replace() {
                return Ok(gateway
                    .replace_compatibilities_from(account, item_id, source_item_id, delete_ids)
                    .await?);
            }
            let deleted = gateway
                .delete_compatibilities(account, item_id, delete_ids)
                .await?;
            match gateway
                .create_compatibilities_from(account, item_id, source_item_id)
                .await
            {
                Ok(created) => Ok(Attempted {
                    value: (),
                    attempts: deleted.attempts + created.attempts,
                }),
                Err(mut failure) => {
                    failure.attempts += deleted.attempts;
                    Err(StepError::ReplaceLeftEmpty { failure })
                }
            }
        }
        CompatPlan::AggregateCopyPaste {
            user_product_id,
            domain_id,
            category_id,
        } => {
            let request = AggregateCopyRequest {
                domain_id: domain_id.clone(),
                category_id: category_id.clone(),
                item_id: source_item_id.to_string(),
                extended_information: true,
            };
            Ok(gateway
                .copy_compatibilities_to_aggregate(account, user_product_id, &request)
                .await?)
        }
    }
}

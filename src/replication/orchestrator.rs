use super::copier::{self, PackageDimensions};
use super::resolver;
use super::strategy::{self, StepError};
use crate::ledger::{
    CopyMode, JobId, JobKind, JobRecord, JobStatus, Ledger, LedgerError, SourceRef, TargetOutcome,
    TargetRef, TargetStatus, TargetUpdate, aggregate_status,
};
use crate::marketplace::{CallFailure, MarketplaceGateway, NewListingPayload, is_dimension_rejection};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("job not found")]
    NotFound,
    #[error("resume only applies to listing jobs")]
    WrongKind,
    #[error("source listing is unavailable: {0}")]
    SourceUnavailable(String),
    #[error("failed to apply dimensions to the source listing: {0}")]
    SourceUpdate(String),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

/// Drives one job: fans out per-target workers under a bounded pool, writes
/// each outcome to the ledger as it lands, and recomputes the aggregate job
/// status from the children once everything is settled or paused.
pub struct Orchestrator {
    gateway: Arc<dyn MarketplaceGateway>,
    ledger: Arc<dyn Ledger>,
    concurrency: usize,
}

pub fn fanout_concurrency_from_env() -> usize {
    std::env::var("FANOUT_CONCURRENCY")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(4)
}

impl Orchestrator {
    pub fn new(
        gateway: Arc<dyn MarketplaceGateway>,
        ledger: Arc<dyn Ledger>,
        concurrency: usize,
    ) -> Self {
        Self {
            gateway,
            ledger,
            concurrency: concurrency.max(1),
        }
    }

    pub async fn run_job(&self, job: JobRecord) {
        info!(
            target = "crosslist.engine",
            job_id = %job.id,
            kind = ?job.kind,
            targets = job.total_targets(),
            "starting fan-out"
        );
        match job.kind {
            JobKind::Compatibility => self.run_compatibility_job(job).await,
            JobKind::Listing => self.run_listing_job(job).await,
        }
    }

    async fn run_compatibility_job(&self, job: JobRecord) {
        let mode = job.mode.unwrap_or_default();

        // One source read per job: the domain observed on the source's
        // compatibility data feeds the aggregate copy-paste recipe.
        let source_domain = match self
            .gateway
            .compatibilities(&job.source.account, &job.source.item_id)
            .await
        {
            Ok(set) => set.and_then(|s| s.first_domain_id().map(str::to_string)),
            Err(err) => {
                warn!(
                    target = "crosslist.engine",
                    job_id = %job.id,
                    source = %job.source.item_id,
                    error = %err,
                    "could not pre-fetch source compatibility data"
                );
                None
            }
        };

        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks = JoinSet::new();
        for outcome in &job.targets {
            if outcome.status.is_terminal() {
                continue;
            }
            let gateway = self.gateway.clone();
            let ledger = self.ledger.clone();
            let semaphore = semaphore.clone();
            let source = job.source.clone();
            let source_domain = source_domain.clone();
            let target = outcome.destination.clone();
            let prior_attempts = outcome.attempts;
            let job_id = job.id;
            tasks.spawn(async move {
                let Ok(_permit) = semaphore.acquire().await else {
                    return;
                };
                record_outcome(
                    ledger.as_ref(),
                    job_id,
                    &target,
                    TargetUpdate::in_progress(prior_attempts),
                    false,
                )
                .await;
                let update = process_compat_target(
                    gateway.as_ref(),
                    &source,
                    source_domain.as_deref(),
                    mode,
                    &target,
                    prior_attempts,
                )
                .await;
                let mutated = update.status == TargetStatus::Success;
                crate::metrics::target_finished("compatibility", update.status.as_str());
                record_outcome(ledger.as_ref(), job_id, &target, update, mutated).await;
            });
        }
        while tasks.join_next().await.is_some() {}

        self.finalize(job.id).await;
    }

    async fn run_listing_job(&self, job: JobRecord) {
        let source_item = match self
            .gateway
            .item(&job.source.account, &job.source.item_id)
            .await
        {
            Ok(item) => item,
            Err(failure) => {
                // Without the source read, no target can proceed; each child
                // fails with the same detail instead of aborting silently.
                let detail = format!("source listing unavailable: {}", failure.error);
                for outcome in &job.targets {
                    record_outcome(
                        self.ledger.as_ref(),
                        job.id,
                        &outcome.destination,
                        TargetUpdate {
                            status: TargetStatus::Error,
                            produced_id: None,
                            error: Some(detail.clone()),
                            attempts: outcome.attempts + failure.attempts,
                        },
                        false,
                    )
                    .await;
                }
                self.finalize(job.id).await;
                return;
            }
        };

        let description = match self
            .gateway
            .item_description(&job.source.account, &job.source.item_id)
            .await
        {
            Ok(text) => text,
            Err(err) => {
                warn!(
                    target = "crosslist.engine",
                    job_id = %job.id,
                    error = %err,
                    "could not fetch source description"
                );
                None
            }
        };

        let (has_compat, source_domain) = match self
            .gateway
            .compatibilities(&job.source.account, &job.source.item_id)
            .await
        {
            Ok(Some(set)) if !set.is_empty() => {
                (true, set.first_domain_id().map(str::to_string))
            }
            Ok(_) => (false, None),
            Err(err) => {
                warn!(
                    target = "crosslist.engine",
                    job_id = %job.id,
                    error = %err,
                    "could not check source compatibility data"
                );
                (false, None)
            }
        };

        let payload = Arc::new(copier::build_listing_payload(&source_item));
        let pending: Vec<TargetOutcome> = job
            .targets
            .iter()
            .filter(|t| !t.status.is_terminal())
            .cloned()
            .collect();
        self.fan_out_listing(
            job.id,
            &job.source,
            payload,
            description,
            has_compat,
            source_domain,
            pending,
        )
        .await;

        self.finalize(job.id).await;
    }

    #[allow(clippy::too_many_arguments)]
    async fn fan_out_listing(
        &self,
        job_id: JobId,
        source: &SourceRef,
        payload: Arc<NewListingPayload>,
        description: Option<String>,
        has_compat: bool,
        source_domain: Option<String>,
        targets: Vec<TargetOutcome>,
    ) {
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks = JoinSet::new();
        for outcome in targets {
            let gateway = self.gateway.clone();
            let ledger = self.ledger.clone();
            let semaphore = semaphore.clone();
            let source = source.clone();
            let payload = payload.clone();
            let description = description.clone();
            let source_domain = source_domain.clone();
            let target = outcome.destination.clone();
            let prior_attempts = outcome.attempts;
            tasks.spawn(async move {
                let Ok(_permit) = semaphore.acquire().await else {
                    return;
                };
                record_outcome(
                    ledger.as_ref(),
                    job_id,
                    &target,
                    TargetUpdate::in_progress(prior_attempts),
                    false,
                )
                .await;
                let update = copy_listing_target(
                    gateway.as_ref(),
                    &source,
                    payload.as_ref(),
                    description.as_deref(),
                    has_compat,
                    source_domain.as_deref(),
                    &target.account,
                    prior_attempts,
                )
                .await;
                let mutated = update.status == TargetStatus::Success;
                crate::metrics::target_finished("listing", update.status.as_str());
                record_outcome(ledger.as_ref(), job_id, &target, update, mutated).await;
            });
        }
        while tasks.join_next().await.is_some() {}
    }

    /// Supply the missing dimensions and re-enter processing for exactly the
    /// paused targets. Terminal siblings are never touched, which also makes
    /// resubmitting dimensions for an already-successful target a no-op.
    pub async fn resume_listing(
        &self,
        job_id: JobId,
        accounts: Option<Vec<String>>,
        dimensions: PackageDimensions,
    ) -> Result<JobRecord, EngineError> {
        let job = self
            .ledger
            .read(job_id)
            .await?
            .ok_or(EngineError::NotFound)?;
        if job.kind != JobKind::Listing {
            return Err(EngineError::WrongKind);
        }

        let paused: Vec<TargetOutcome> = job
            .targets
            .iter()
            .filter(|t| t.status == TargetStatus::NeedsAdditionalInfo)
            .filter(|t| {
                accounts
                    .as_ref()
                    .map(|wanted| wanted.contains(&t.destination.account))
                    .unwrap_or(true)
            })
            .cloned()
            .collect();
        if paused.is_empty() {
            return Ok(job);
        }

        if !dimensions.is_empty() {
            let update = copier::dimension_update(&dimensions);
            self.gateway
                .update_listing(&job.source.account, &job.source.item_id, &update)
                .await
                .map_err(|failure| EngineError::SourceUpdate(failure.to_string()))?;
            info!(
                target = "crosslist.engine",
                job_id = %job_id,
                source = %job.source.item_id,
                "dimensions applied to source listing"
            );
        }

        // The source now carries the supplied values; rebuild from a fresh read.
        let source_item = self
            .gateway
            .item(&job.source.account, &job.source.item_id)
            .await
            .map_err(|failure| EngineError::SourceUnavailable(failure.to_string()))?;
        let description = self
            .gateway
            .item_description(&job.source.account, &job.source.item_id)
            .await
            .unwrap_or_default();
        let (has_compat, source_domain) = match self
            .gateway
            .compatibilities(&job.source.account, &job.source.item_id)
            .await
        {
            Ok(Some(set)) if !set.is_empty() => (true, set.first_domain_id().map(str::to_string)),
            _ => (false, None),
        };
        let payload = Arc::new(copier::build_listing_payload(&source_item));

        if let Err(err) = self.ledger.set_job_status(job_id, JobStatus::InProgress).await {
            error!(
                target = "crosslist.ledger",
                job_id = %job_id,
                error = %err,
                "could not mark job in progress for resume"
            );
        }

        self.fan_out_listing(
            job_id,
            &job.source,
            payload,
            description,
            has_compat,
            source_domain,
            paused,
        )
        .await;
        self.finalize(job_id).await;

        self.ledger
            .read(job_id)
            .await?
            .ok_or(EngineError::NotFound)
    }

    /// Recompute the aggregate status from the current children. Always a
    /// recomputation, never a maintained counter.
    async fn finalize(&self, job_id: JobId) {
        match self.ledger.read(job_id).await {
            Ok(Some(job)) => {
                let status = aggregate_status(job.targets.iter().map(|t| t.status));
                if let Err(err) = self.ledger.set_job_status(job_id, status).await {
                    error!(
                        target = "crosslist.ledger",
                        job_id = %job_id,
                        error = %err,
                        "failed to persist aggregate job status"
                    );
                }
                info!(
                    target = "crosslist.engine",
                    job_id = %job_id,
                    status = ?status,
                    "job settled"
                );
            }
            Ok(None) => error!(
                target = "crosslist.ledger",
                job_id = %job_id,
                "job disappeared from the ledger before finalization"
            ),
            Err(err) => error!(
                target = "crosslist.ledger",
                job_id = %job_id,
                error = %err,
                "could not read job back for finalization"
            ),
        }
    }
}

/// Ledger writes are never silently swallowed. A failure after a successful
/// external mutation is the ledger-consistency case: the remote side-effect
/// exists, so the mutation is not retried, and the loss is raised as an
/// operational alert distinct from target errors.
async fn record_outcome(
    ledger: &dyn Ledger,
    job_id: JobId,
    target: &TargetRef,
    update: TargetUpdate,
    external_mutation_succeeded: bool,
) {
    if let Err(err) = ledger.record_target(job_id, target, update).await {
        crate::metrics::ledger_write_failure(external_mutation_succeeded);
        if external_mutation_succeeded {
            error!(
                target = "crosslist.ledger",
                job_id = %job_id,
                destination = %target.key(),
                error = %err,
                "ledger write failed after a successful external mutation; outcome is not recorded"
            );
        } else {
            error!(
                target = "crosslist.ledger",
                job_id = %job_id,
                destination = %target.key(),
                error = %err,
                "ledger write failed"
            );
        }
    }
}

fn failed(prior_attempts: u32, failure: &CallFailure) -> TargetUpdate {
    TargetUpdate {
        status: TargetStatus::Error,
        produced_id: None,
        error: Some(failure.error.to_string()),
        attempts: prior_attempts + failure.attempts,
    }
}

async fn process_compat_target(
    gateway: &dyn MarketplaceGateway,
    source: &SourceRef,
    source_domain: Option<&str>,
    mode: CopyMode,
    target: &TargetRef,
    prior_attempts: u32,
) -> TargetUpdate {
    let Some(dest_item) = target.item_id.as_deref() else {
        return TargetUpdate {
            status: TargetStatus::Error,
            produced_id: None,
            error: Some("target has no destination listing id".into()),
            attempts: prior_attempts,
        };
    };

    let snapshot = match resolver::resolve_destination(gateway, &target.account, dest_item).await {
        Ok(snapshot) => snapshot,
        Err(failure) => return failed(prior_attempts, &failure),
    };

    let plan = match strategy::select_plan(&snapshot, mode, source_domain) {
        Ok(plan) => plan,
        Err(err) => {
            return TargetUpdate {
                status: TargetStatus::Error,
                produced_id: None,
                error: Some(err.to_string()),
                attempts: prior_attempts,
            };
        }
    };

    match strategy::execute_plan(gateway, &target.account, dest_item, &source.item_id, &plan).await
    {
        Ok(done) => TargetUpdate {
            status: TargetStatus::Success,
            produced_id: None,
            error: None,
            attempts: prior_attempts + done.attempts,
        },
        Err(StepError::ReplaceLeftEmpty { failure }) => {
            warn!(
                target = "crosslist.engine",
                account = %target.account,
                item_id = %dest_item,
                error = %failure,
                "replace removed existing compatibility data and the new data failed to apply"
            );
            TargetUpdate {
                status: TargetStatus::Error,
                produced_id: None,
                error: Some(format!("replace_left_empty: {}", failure.error)),
                attempts: prior_attempts + failure.attempts,
            }
        }
        Err(StepError::Call(failure)) => failed(prior_attempts, &failure),
    }
}

#[allow(clippy::too_many_arguments)]
async fn copy_listing_target(
    gateway: &dyn MarketplaceGateway,
    source: &SourceRef,
    payload: &NewListingPayload,
    description: Option<&str>,
    has_compat: bool,
    source_domain: Option<&str>,
    account: &str,
    prior_attempts: u32,
) -> TargetUpdate {
    let created = match gateway.create_listing(account, payload).await {
        Ok(created) => created,
        Err(failure) => {
            if is_dimension_rejection(&failure.error) {
                // A pause, not a failure: the source lacks package dimensions
                // this destination's category requires.
                return TargetUpdate {
                    status: TargetStatus::NeedsAdditionalInfo,
                    produced_id: None,
                    error: Some(failure.error.detail().to_string()),
                    attempts: prior_attempts + failure.attempts,
                };
            }
            return failed(prior_attempts, &failure);
        }
    };
    let new_item_id = created.value;

    if let Some(text) = description {
        if let Err(err) = gateway.set_item_description(account, &new_item_id, text).await {
            warn!(
                target = "crosslist.engine",
                account = %account,
                item_id = %new_item_id,
                error = %err,
                "failed to set description on produced listing"
            );
        }
    }

    if has_compat {
        carry_compatibilities(gateway, source, source_domain, account, &new_item_id).await;
    }

    TargetUpdate {
        status: TargetStatus::Success,
        produced_id: Some(new_item_id),
        error: None,
        attempts: prior_attempts + created.attempts,
    }
}

/// Carry the source's compatibility data onto a freshly produced listing,
/// best-effort: the listing itself already exists, so a failure here degrades
/// to a warning instead of failing the target.
async fn carry_compatibilities(
    gateway: &dyn MarketplaceGateway,
    source: &SourceRef,
    source_domain: Option<&str>,
    account: &str,
    new_item_id: &str,
) {
    let snapshot = match resolver::resolve_destination(gateway, account, new_item_id).await {
        Ok(snapshot) => snapshot,
        Err(err) => {
            warn!(
                target = "crosslist.engine",
                account = %account,
                item_id = %new_item_id,
                error = %err,
                "could not resolve produced listing for compatibility carry-over"
            );
            return;
        }
    };
    let plan = match strategy::select_plan(&snapshot, CopyMode::Add, source_domain) {
        Ok(plan) => plan,
        Err(err) => {
            warn!(
                target = "crosslist.engine",
                account = %account,
                item_id = %new_item_id,
                error = %err,
                "no applicable compatibility recipe for produced listing"
            );
            return;
        }
    };
    if let Err(err) =
        strategy::execute_plan(gateway, account, new_item_id, &source.item_id, &plan).await
    {
        warn!(
            target = "crosslist.engine",
            account = %account,
            item_id = %new_item_id,
            error = %err,
            "failed to carry compatibility data onto produced listing"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::MemoryLedger;
    use crate::replication::testing::FakeGateway;

    fn orchestrator(gateway: Arc<FakeGateway>) -> (Orchestrator, Arc<MemoryLedger>) {
        let ledger = Arc::new(MemoryLedger::new());
        (
            Orchestrator::new(gateway, ledger.clone(), 4),
            ledger,
        )
    }

    fn compat_job(targets: Vec<TargetRef>, mode: CopyMode) -> JobRecord {
        JobRecord::new(
            JobKind::Compatibility,
            SourceRef {
                account: "alpha".into(),
                item_id: "MLB100".into(),
            },
            Some(mode),
            targets,
            "op-1",
        )
    }

    fn listing_job(accounts: &[&str]) -> JobRecord {
        JobRecord::new(
            JobKind::Listing,
            SourceRef {
                account: "alpha".into(),
                item_id: "MLB100".into(),
            },
            None,
            accounts.iter().map(|a| TargetRef::account(*a)).collect(),
            "op-1",
        )
    }

    async fn stored(ledger: &MemoryLedger, id: JobId) -> JobRecord {
        ledger.read(id).await.expect("read").expect("job exists")
    }

    #[tokio::test]
    async fn empty_destination_issues_exactly_one_create_call() {
        let gateway = Arc::new(FakeGateway::new());
        gateway.put_compatibilities("alpha", "MLB100", &["P1", "P2"], Some("CARS"));
        gateway.put_item("beta", "MLB200", "MLB-CAT");

        let job = compat_job(vec![TargetRef::listing("beta", "MLB200")], CopyMode::Add);
        let (orchestrator, ledger) = orchestrator(gateway.clone());
        ledger.create(&job).await.expect("create");
        orchestrator.run_job(job.clone()).await;

        assert_eq!(gateway.call_count("create_compatibilities_from"), 1);
        assert_eq!(gateway.call_count("merge_compatibilities_from"), 0);
        assert_eq!(gateway.call_count("replace_compatibilities_from"), 0);
        assert_eq!(gateway.call_count("delete_compatibilities"), 0);

        let settled = stored(&ledger, job.id).await;
        assert_eq!(settled.status, JobStatus::Success);
        assert_eq!(settled.targets[0].status, TargetStatus::Success);
        assert_eq!(settled.targets[0].attempts, 1);
    }

    #[tokio::test]
    async fn one_failing_target_never_disturbs_its_siblings() {
        let gateway = Arc::new(FakeGateway::new());
        gateway.put_compatibilities("alpha", "MLB100", &["P1"], Some("CARS"));
        gateway.put_item("beta", "MLB200", "MLB-CAT");
        gateway.put_item("gamma", "MLB300", "MLB-CAT");
        gateway.fail_create_compatibilities("gamma", 400, "validation_error; item is paused");

        let job = compat_job(
            vec![
                TargetRef::listing("beta", "MLB200"),
                TargetRef::listing("gamma", "MLB300"),
            ],
            CopyMode::Add,
        );
        let (orchestrator, ledger) = orchestrator(gateway.clone());
        ledger.create(&job).await.expect("create");
        orchestrator.run_job(job.clone()).await;

        let settled = stored(&ledger, job.id).await;
        assert_eq!(settled.status, JobStatus::Partial);
        assert_eq!(settled.total_targets(), settled.targets.len());

        let beta = settled
            .targets
            .iter()
            .find(|t| t.destination.account == "beta")
            .expect("beta target");
        assert_eq!(beta.status, TargetStatus::Success);
        let gamma = settled
            .targets
            .iter()
            .find(|t| t.destination.account == "gamma")
            .expect("gamma target");
        assert_eq!(gamma.status, TargetStatus::Error);
        assert!(gamma.error.as_deref().unwrap_or("").contains("item is paused"));
    }

    #[tokio::test]
    async fn replace_leaves_destination_with_exactly_the_source_entries() {
        let gateway = Arc::new(FakeGateway::new());
        gateway.put_compatibilities("alpha", "MLB100", &["P1", "P2", "P3"], Some("CARS"));
        gateway.put_item("beta", "MLB200", "MLB-CAT");
        // Destination starts with two entries, one of them overlapping.
        gateway.put_compatibilities("beta", "MLB200", &["P3", "P9"], Some("CARS"));

        let job = compat_job(vec![TargetRef::listing("beta", "MLB200")], CopyMode::Replace);
        let (orchestrator, ledger) = orchestrator(gateway.clone());
        ledger.create(&job).await.expect("create");
        orchestrator.run_job(job.clone()).await;

        assert_eq!(gateway.call_count("replace_compatibilities_from"), 1);
        // M source entries, never N+M.
        assert_eq!(gateway.compat_count("beta", "MLB200"), 3);
        assert_eq!(stored(&ledger, job.id).await.status, JobStatus::Success);
    }

    #[tokio::test]
    async fn add_never_decreases_the_destination_count() {
        let gateway = Arc::new(FakeGateway::new());
        gateway.put_compatibilities("alpha", "MLB100", &["P1", "P2"], Some("CARS"));
        gateway.put_item("beta", "MLB200", "MLB-CAT");
        gateway.put_compatibilities("beta", "MLB200", &["P2", "P8", "P9"], Some("CARS"));

        let job = compat_job(vec![TargetRef::listing("beta", "MLB200")], CopyMode::Add);
        let (orchestrator, ledger) = orchestrator(gateway.clone());
        ledger.create(&job).await.expect("create");
        orchestrator.run_job(job.clone()).await;

        assert_eq!(gateway.call_count("merge_compatibilities_from"), 1);
        // Union with platform dedup: 3 existing + 1 genuinely new.
        assert_eq!(gateway.compat_count("beta", "MLB200"), 4);
        assert_eq!(stored(&ledger, job.id).await.status, JobStatus::Success);
    }

    #[tokio::test]
    async fn aggregate_destination_uses_the_copy_paste_recipe_only() {
        let gateway = Arc::new(FakeGateway::new());
        gateway.put_compatibilities("alpha", "MLB100", &["P1"], Some("CARS"));
        gateway.put_aggregate_item("beta", "MLB200", "UP-5", "MLB-CAT", None);

        let job = compat_job(vec![TargetRef::listing("beta", "MLB200")], CopyMode::Add);
        let (orchestrator, ledger) = orchestrator(gateway.clone());
        ledger.create(&job).await.expect("create");
        orchestrator.run_job(job.clone()).await;

        assert_eq!(gateway.call_count("copy_compatibilities_to_aggregate"), 1);
        assert_eq!(gateway.call_count("create_compatibilities_from"), 0);
        assert_eq!(gateway.call_count("merge_compatibilities_from"), 0);
        assert_eq!(stored(&ledger, job.id).await.status, JobStatus::Success);
    }

    #[tokio::test]
    async fn listing_copy_produces_listings_with_description_and_compat() {
        let gateway = Arc::new(FakeGateway::new());
        gateway.put_item("alpha", "MLB100", "MLB5672");
        gateway.put_description("alpha", "MLB100", "Original description");
        gateway.put_compatibilities("alpha", "MLB100", &["P1", "P2"], Some("CARS"));

        let job = listing_job(&["beta", "gamma"]);
        let (orchestrator, ledger) = orchestrator(gateway.clone());
        ledger.create(&job).await.expect("create");
        orchestrator.run_job(job.clone()).await;

        let settled = stored(&ledger, job.id).await;
        assert_eq!(settled.status, JobStatus::Success);
        for target in &settled.targets {
            assert_eq!(target.status, TargetStatus::Success);
            let produced = target.produced_id.as_deref().expect("produced id");
            assert_eq!(
                gateway.description_of(&target.destination.account, produced),
                Some("Original description".to_string())
            );
            assert_eq!(gateway.compat_count(&target.destination.account, produced), 2);
        }
        assert_eq!(gateway.call_count("create_listing"), 2);
    }

    #[tokio::test]
    async fn missing_dimensions_pause_one_target_and_resume_revives_only_it() {
        let gateway = Arc::new(FakeGateway::new());
        gateway.put_item("alpha", "MLB100", "MLB5672");
        gateway.require_dimensions("gamma");

        let job = listing_job(&["beta", "gamma"]);
        let (orchestrator, ledger) = orchestrator(gateway.clone());
        ledger.create(&job).await.expect("create");
        orchestrator.run_job(job.clone()).await;

        let paused = stored(&ledger, job.id).await;
        // A pause is not an error: the job reports partial, never error.
        assert_eq!(paused.status, JobStatus::Partial);
        let beta = paused
            .targets
            .iter()
            .find(|t| t.destination.account == "beta")
            .expect("beta");
        assert_eq!(beta.status, TargetStatus::Success);
        let gamma = paused
            .targets
            .iter()
            .find(|t| t.destination.account == "gamma")
            .expect("gamma");
        assert_eq!(gamma.status, TargetStatus::NeedsAdditionalInfo);
        assert!(gamma.error.as_deref().unwrap_or("").contains("dimensions"));

        let resumed = orchestrator
            .resume_listing(
                job.id,
                None,
                PackageDimensions {
                    height: Some(10.0),
                    width: Some(20.0),
                    length: Some(30.0),
                    weight: Some(500.0),
                },
            )
            .await
            .expect("resume");

        assert_eq!(resumed.status, JobStatus::Success);
        assert_eq!(gateway.call_count("update_listing"), 1);
        // beta was already terminal: exactly one extra create for gamma.
        assert_eq!(gateway.call_count("create_listing"), 3);
        let gamma = resumed
            .targets
            .iter()
            .find(|t| t.destination.account == "gamma")
            .expect("gamma");
        assert_eq!(gamma.status, TargetStatus::Success);
        assert!(gamma.produced_id.is_some());
        // Attempts accumulate across the pause and the resume episode.
        assert_eq!(gamma.attempts, 2);
    }

    #[tokio::test]
    async fn resume_with_no_paused_targets_is_a_no_op() {
        let gateway = Arc::new(FakeGateway::new());
        gateway.put_item("alpha", "MLB100", "MLB5672");

        let job = listing_job(&["beta"]);
        let (orchestrator, ledger) = orchestrator(gateway.clone());
        ledger.create(&job).await.expect("create");
        orchestrator.run_job(job.clone()).await;
        assert_eq!(gateway.call_count("create_listing"), 1);

        let resumed = orchestrator
            .resume_listing(
                job.id,
                None,
                PackageDimensions {
                    height: Some(10.0),
                    ..PackageDimensions::default()
                },
            )
            .await
            .expect("resume");

        // Identical dimensions against an already-successful target: nothing
        // is re-dispatched and nothing changes.
        assert_eq!(resumed.status, JobStatus::Success);
        assert_eq!(gateway.call_count("create_listing"), 1);
        assert_eq!(gateway.call_count("update_listing"), 0);
    }

    #[tokio::test]
    async fn target_statuses_always_partition_the_target_set() {
        let gateway = Arc::new(FakeGateway::new());
        gateway.put_item("alpha", "MLB100", "MLB5672");
        gateway.require_dimensions("gamma");
        gateway.fail_create_listing("delta", 400, "validation_error; forbidden category");

        let job = listing_job(&["beta", "gamma", "delta"]);
        let (orchestrator, ledger) = orchestrator(gateway.clone());
        ledger.create(&job).await.expect("create");
        orchestrator.run_job(job.clone()).await;

        let settled = stored(&ledger, job.id).await;
        let total = settled.total_targets();
        let counted = settled
            .targets
            .iter()
            .filter(|t| {
                matches!(
                    t.status,
                    TargetStatus::Pending
                        | TargetStatus::InProgress
                        | TargetStatus::Success
                        | TargetStatus::Error
                        | TargetStatus::NeedsAdditionalInfo
                )
            })
            .count();
        assert_eq!(counted, total);
        assert_eq!(settled.status, JobStatus::Partial);
    }

    #[tokio::test]
    async fn unreadable_source_fails_every_target_with_the_same_detail() {
        let gateway = Arc::new(FakeGateway::new());
        let job = listing_job(&["beta", "gamma"]);
        let (orchestrator, ledger) = orchestrator(gateway.clone());
        ledger.create(&job).await.expect("create");
        orchestrator.run_job(job.clone()).await;

        let settled = stored(&ledger, job.id).await;
        assert_eq!(settled.status, JobStatus::Error);
        for target in &settled.targets {
            assert_eq!(target.status, TargetStatus::Error);
            assert!(
                target
                    .error
                    .as_deref()
                    .unwrap_or("")
                    .contains("source listing unavailable")
            );
        }
        assert_eq!(gateway.call_count("create_listing"), 0);
    }
}

mod accounts;
mod dispatch;
mod http;
mod idempotency;
mod ledger;
mod marketplace;
mod metrics;
mod models;
mod replication;
mod security;
mod supabase;

use accounts::{AccessBroker, EnvAccountDirectory};
use axum::{
    Json, Router,
    extract::{Extension, Path, Query, State},
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use dispatch::JobDispatcher;
use ledger::{
    JobKind, JobRecord, Ledger, LedgerError, MemoryLedger, SourceRef, TargetRef,
};
use marketplace::{HttpGateway, MarketplaceGateway};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use models::{
    ApiError, CatalogSearchRequest, CompatibilityReplicationRequest, ElevateRequest,
    ElevateResponse, EnqueueResponse, ListingPreview, ListingReplicationRequest, ResumeRequest,
};
use replication::{EngineError, Orchestrator, fanout_concurrency_from_env};
use security::{
    AuthContext, AuthState, ElevationError, ElevationOutcome, ElevationState, require_api_auth,
};
use serde::Deserialize;
use serde_json::json;
use std::{collections::HashMap, net::SocketAddr, sync::Arc};
use supabase::SupabaseLedger;
use tokio::sync::Mutex;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt};
use uuid::Uuid;

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        error!(target = "crosslist.api", "server crashed: {err}");
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    dotenvy::dotenv().ok();
    init_tracing();

    let auth_state = AuthState::from_env();
    let elevation = ElevationState::from_env();

    let broker: Arc<dyn AccessBroker> = Arc::new(EnvAccountDirectory::from_env());
    let gateway: Arc<dyn MarketplaceGateway> = Arc::new(HttpGateway::from_env(broker.clone()));
    let ledger: Arc<dyn Ledger> = match SupabaseLedger::from_env() {
        Some(ledger) => {
            info!(target = "crosslist.api", "using Supabase-backed job ledger");
            Arc::new(ledger)
        }
        None => {
            warn!(
                target = "crosslist.api",
                "SUPABASE_URL not configured; job ledger is in-memory and will not survive restarts"
            );
            Arc::new(MemoryLedger::new())
        }
    };

    let orchestrator = Arc::new(Orchestrator::new(
        gateway.clone(),
        ledger.clone(),
        fanout_concurrency_from_env(),
    ));
    let (dispatcher, _worker) = JobDispatcher::spawn(orchestrator.clone());

    let openapi_raw = include_str!("../docs/openapi.yaml");
    let openapi: serde_json::Value =
        serde_yaml::from_str(openapi_raw).unwrap_or(serde_json::json!({"openapi":"3.0.3"}));
    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("prom recorder");
    let redis = std::env::var("REDIS_URL")
        .ok()
        .and_then(|u| redis::Client::open(u).ok());

    let state = AppState {
        gateway,
        ledger,
        broker,
        orchestrator,
        dispatcher,
        elevation,
        openapi: Arc::new(openapi),
        idempotency: Arc::new(Mutex::new(HashMap::new())),
        prometheus_handle,
        redis,
    };

    let cors = CorsLayer::new()
        .allow_headers(Any)
        .allow_methods(Any)
        .allow_origin(Any);

    let protected = Router::new()
        .route("/replications", get(list_replications))
        .route("/replications/listings", post(submit_listing_jobs))
        .route(
            "/replications/compatibilities",
            post(submit_compatibility_job),
        )
        .route("/replications/{id}", get(get_replication))
        .route("/replications/{id}/resume", post(resume_replication))
        .route("/catalog/search", post(catalog_search))
        .route("/listings/preview/{item_id}", get(preview_listing))
        .route("/admin/elevate", post(admin_elevate))
        .route_layer(middleware::from_fn_with_state(auth_state, require_api_auth));

    let app = Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics_endpoint))
        .route("/openapi.json", get(openapi_json))
        .route("/docs", get(swagger_ui))
        .merge(protected)
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(axum::extract::DefaultBodyLimit::max(body_limit_from_env()));

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(8000);
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    info!(target = "crosslist.api", "listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service()).await?;
    Ok(())
}

#[derive(Clone)]
struct AppState {
    gateway: Arc<dyn MarketplaceGateway>,
    ledger: Arc<dyn Ledger>,
    broker: Arc<dyn AccessBroker>,
    orchestrator: Arc<Orchestrator>,
    dispatcher: JobDispatcher,
    elevation: ElevationState,
    openapi: Arc<serde_json::Value>,
    idempotency: Arc<Mutex<HashMap<String, EnqueueResponse>>>,
    prometheus_handle: PrometheusHandle,
    redis: Option<redis::Client>,
}

/// Health and readiness check.
///
/// - Method: `GET`
/// - Path: `/health`
/// - Auth: none
async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "service": "crosslist-api-rs",
    }))
}

async fn openapi_json(
    State(state): State<AppState>,
    headers: axum::http::HeaderMap,
) -> Result<Json<serde_json::Value>, AppError> {
    if let Ok(key) = std::env::var("OPENAPI_KEY") {
        let presented = headers
            .get("X-Docs-Key")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if presented != key {
            return Err(AppError::invalid("docs", "unauthorized"));
        }
    }
    Ok(Json((*state.openapi).clone()))
}

async fn swagger_ui() -> axum::http::Response<String> {
    let html = r#"<!doctype html>
<html>
<head>
  <meta charset='utf-8'/>
  <title>Crosslist API Docs</title>
  <link rel="stylesheet" href="https://unpkg.com/swagger-ui-dist@5/swagger-ui.css" />
</head>
<body>
  <div id="swagger-ui"></div>
  <script src="https://unpkg.com/swagger-ui-dist@5/swagger-ui-bundle.js"></script>
  <script>
    window.onload = () => {
      window.ui = SwaggerUIBundle({ url: '/openapi.json', dom_id: '#swagger-ui' });
    };
  </script>
</body>
</html>"#;
    axum::http::Response::builder()
        .header("Content-Type", "text/html; charset=utf-8")
        .body(html.to_string())
        .unwrap()
}

fn body_limit_from_env() -> usize {
    std::env::var("REQUEST_MAX_BYTES")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(256 * 1024)
}

async fn metrics_endpoint(
    State(state): State<AppState>,
    headers: axum::http::HeaderMap,
) -> axum::http::Response<String> {
    if let Ok(secret) = std::env::var("METRICS_KEY") {
        let presented = headers
            .get("X-Metrics-Key")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if presented != secret {
            return axum::http::Response::builder()
                .status(axum::http::StatusCode::UNAUTHORIZED)
                .body("unauthorized".into())
                .unwrap();
        }
    }
    let body = state.prometheus_handle.render();
    axum::http::Response::builder()
        .header("Content-Type", "text/plain; version=0.0.4")
        .body(body)
        .unwrap()
}

fn idempotency_key(headers: &axum::http::HeaderMap) -> Option<String> {
    headers
        .get("Idempotency-Key")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

async fn replay_submission(state: &AppState, key: &str) -> Option<EnqueueResponse> {
    if let Some(client) = &state.redis {
        return idempotency::redis_get(client, key).await;
    }
    state.idempotency.lock().await.get(key).cloned()
}

async fn remember_submission(state: &AppState, key: String, response: &EnqueueResponse) {
    if let Some(client) = &state.redis {
        let ttl = std::env::var("IDEMPOTENCY_TTL_SECS")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(3600);
        idempotency::redis_set(client, &key, response, ttl).await;
        return;
    }
    state.idempotency.lock().await.insert(key, response.clone());
}

async fn require_connected(state: &AppState, account: &str) -> Result<(), AppError> {
    state
        .broker
        .access(account)
        .await
        .map(|_| ())
        .map_err(|err| AppError::invalid("accounts", err.to_string()))
}

/// Copy listings from one account to others. One job per source listing; the
/// ledger row is durably written before anything is dispatched.
///
/// - Method: `POST`
/// - Path: `/replications/listings`
async fn submit_listing_jobs(
    State(state): State<AppState>,
    Extension(context): Extension<AuthContext>,
    headers: axum::http::HeaderMap,
    Json(payload): Json<ListingReplicationRequest>,
) -> Result<Json<EnqueueResponse>, AppError> {
    crate::metrics::inc_requests("/replications/listings");

    if payload.source_account.trim().is_empty() {
        return Err(AppError::invalid("replications", "source_account is required"));
    }
    if payload.destination_accounts.is_empty() {
        return Err(AppError::invalid(
            "replications",
            "at least one destination account is required",
        ));
    }
    if payload
        .destination_accounts
        .contains(&payload.source_account)
    {
        return Err(AppError::invalid(
            "replications",
            "source cannot be one of the destinations",
        ));
    }
    let item_ids = payload.clean_item_ids();
    if item_ids.is_empty() {
        return Err(AppError::invalid("replications", "no valid item ids provided"));
    }
    require_connected(&state, &payload.source_account).await?;
    for account in &payload.destination_accounts {
        require_connected(&state, account).await?;
    }

    let key = idempotency_key(&headers);
    if let Some(key) = &key {
        if let Some(existing) = replay_submission(&state, key).await {
            return Ok(Json(existing));
        }
    }

    let mut job_ids = Vec::with_capacity(item_ids.len());
    let mut total_targets = 0usize;
    for item_id in item_ids {
        let job = JobRecord::new(
            JobKind::Listing,
            SourceRef {
                account: payload.source_account.clone(),
                item_id,
            },
            None,
            payload
                .destination_accounts
                .iter()
                .map(TargetRef::account)
                .collect(),
            context.org_id.clone(),
        );
        total_targets += job.total_targets();
        // Job-creation writes are the only ledger failures fatal to the request.
        state.ledger.create(&job).await?;
        job_ids.push(job.id);
        state
            .dispatcher
            .enqueue(job)
            .await
            .map_err(|err| AppError::internal(err.to_string()))?;
    }

    let response = EnqueueResponse {
        job_ids,
        total_targets,
    };
    if let Some(key) = key {
        remember_submission(&state, key, &response).await;
    }
    Ok(Json(response))
}

/// Replicate compatibility data to explicit targets, or to targets resolved
/// by catalog identifier across every connected account.
///
/// - Method: `POST`
/// - Path: `/replications/compatibilities`
async fn submit_compatibility_job(
    State(state): State<AppState>,
    Extension(context): Extension<AuthContext>,
    headers: axum::http::HeaderMap,
    Json(payload): Json<CompatibilityReplicationRequest>,
) -> Result<Json<EnqueueResponse>, AppError> {
    crate::metrics::inc_requests("/replications/compatibilities");

    if payload.source.account.trim().is_empty() || payload.source.item_id.trim().is_empty() {
        return Err(AppError::invalid(
            "replications",
            "source account and item_id are required",
        ));
    }
    require_connected(&state, &payload.source.account).await?;

    let key = idempotency_key(&headers);
    if let Some(key) = &key {
        if let Some(existing) = replay_submission(&state, key).await {
            return Ok(Json(existing));
        }
    }

    let mut targets: Vec<TargetRef> = payload
        .targets
        .iter()
        .map(|t| TargetRef::listing(&t.account, &t.item_id))
        .collect();

    if targets.is_empty() && !payload.skus.is_empty() {
        let accounts = selected_accounts(&state, payload.accounts.as_deref()).await?;
        let outcome =
            replication::search_all_accounts(state.gateway.clone(), &accounts, &payload.skus)
                .await;
        targets = outcome
            .matches
            .iter()
            .filter(|m| {
                !(m.account == payload.source.account && m.item_id == payload.source.item_id)
            })
            .map(|m| TargetRef::listing(&m.account, &m.item_id))
            .collect();
        if targets.is_empty() {
            let mut detail = format!("no listings matched the given identifiers: {:?}", payload.skus);
            if !outcome.failed_accounts.is_empty() {
                let failed: Vec<&str> = outcome
                    .failed_accounts
                    .iter()
                    .map(|f| f.account.as_str())
                    .collect();
                detail.push_str(&format!("; queries failed for accounts {failed:?}"));
            }
            return Err(AppError::invalid("no_matches", detail));
        }
    }

    let mut seen = std::collections::HashSet::new();
    targets.retain(|t| seen.insert(t.key()));
    if targets.is_empty() {
        return Err(AppError::invalid(
            "replications",
            "at least one target or catalog identifier is required",
        ));
    }
    for target in &targets {
        require_connected(&state, &target.account).await?;
    }

    let job = JobRecord::new(
        JobKind::Compatibility,
        SourceRef {
            account: payload.source.account.clone(),
            item_id: payload.source.item_id.clone(),
        },
        Some(payload.mode),
        targets,
        context.org_id.clone(),
    );
    let total_targets = job.total_targets();
    state.ledger.create(&job).await?;
    let job_id = job.id;
    state
        .dispatcher
        .enqueue(job)
        .await
        .map_err(|err| AppError::internal(err.to_string()))?;

    let response = EnqueueResponse {
        job_ids: vec![job_id],
        total_targets,
    };
    if let Some(key) = key {
        remember_submission(&state, key, &response).await;
    }
    Ok(Json(response))
}

async fn selected_accounts(
    state: &AppState,
    wanted: Option<&[String]>,
) -> Result<Vec<accounts::AccountHandle>, AppError> {
    let connected = state
        .broker
        .connected_accounts()
        .await
        .map_err(|err| AppError::internal(err.to_string()))?;
    if connected.is_empty() {
        return Err(AppError::invalid("accounts", "no connected accounts"));
    }
    Ok(match wanted {
        Some(wanted) => connected
            .into_iter()
            .filter(|handle| wanted.contains(&handle.slug))
            .collect(),
        None => connected,
    })
}

/// Search every connected account for catalog identifiers.
///
/// - Method: `POST`
/// - Path: `/catalog/search`
async fn catalog_search(
    State(state): State<AppState>,
    Json(payload): Json<CatalogSearchRequest>,
) -> Result<Json<replication::CatalogSearchOutcome>, AppError> {
    crate::metrics::inc_requests("/catalog/search");
    if payload.skus.is_empty() {
        return Err(AppError::invalid("catalog", "at least one SKU is required"));
    }
    let accounts = selected_accounts(&state, payload.accounts.as_deref()).await?;
    let outcome =
        replication::search_all_accounts(state.gateway.clone(), &accounts, &payload.skus).await;
    Ok(Json(outcome))
}

#[derive(Debug, Deserialize)]
struct ListParams {
    limit: Option<usize>,
}

async fn list_replications(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Json<Vec<JobRecord>>, AppError> {
    crate::metrics::inc_requests("/replications");
    let limit = params.limit.unwrap_or(50).min(200);
    let jobs = state.ledger.list_recent(limit).await?;
    Ok(Json(jobs))
}

/// Poll one job and its per-target outcomes.
async fn get_replication(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<JobRecord>, AppError> {
    let Ok(job_id) = Uuid::parse_str(&id) else {
        return Err(AppError::invalid("replications", "invalid job id"));
    };
    match state.ledger.read(job_id).await? {
        Some(job) => Ok(Json(job)),
        None => Err(AppError::NotFound),
    }
}

/// Supply missing package dimensions and resume exactly the paused targets.
///
/// - Method: `POST`
/// - Path: `/replications/{id}/resume`
async fn resume_replication(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(payload): Json<ResumeRequest>,
) -> Result<Json<JobRecord>, AppError> {
    crate::metrics::inc_requests("/replications/resume");
    let Ok(job_id) = Uuid::parse_str(&id) else {
        return Err(AppError::invalid("replications", "invalid job id"));
    };
    let job = state
        .orchestrator
        .resume_listing(job_id, payload.accounts, payload.dimensions)
        .await?;
    Ok(Json(job))
}

#[derive(Debug, Deserialize)]
struct PreviewParams {
    account: Option<String>,
}

/// Preview a listing before replicating it.
async fn preview_listing(
    State(state): State<AppState>,
    Path(item_id): Path<String>,
    Query(params): Query<PreviewParams>,
) -> Result<Json<ListingPreview>, AppError> {
    crate::metrics::inc_requests("/listings/preview");
    let account = match params.account {
        Some(account) => account,
        None => {
            let connected = selected_accounts(&state, None).await?;
            connected
                .first()
                .map(|handle| handle.slug.clone())
                .ok_or_else(|| AppError::invalid("accounts", "no connected accounts"))?
        }
    };

    let item = state
        .gateway
        .item(&account, &item_id)
        .await
        .map_err(|err| AppError::invalid("preview", format!("item not found: {err}")))?;
    let description = state
        .gateway
        .item_description(&account, &item_id)
        .await
        .unwrap_or_default();
    let compat = state
        .gateway
        .compatibilities(&account, &item_id)
        .await
        .unwrap_or_default();
    let compat_count = compat.as_ref().map(|c| c.products.len()).unwrap_or(0);

    Ok(Json(ListingPreview {
        id: item.id,
        title: item.title,
        price: item.price,
        currency_id: item.currency_id,
        category_id: item.category_id,
        condition: item.condition,
        status: item.status,
        thumbnail: item.secure_thumbnail.or(item.thumbnail),
        pictures_count: item.pictures.len(),
        variations_count: item.variations.len(),
        attributes_count: item.attributes.len(),
        has_compatibilities: compat_count > 0,
        compat_count,
        description_length: description.map(|d| d.len()).unwrap_or(0),
    }))
}

/// Idempotent one-time elevation against the configured master secret.
async fn admin_elevate(
    State(state): State<AppState>,
    Extension(context): Extension<AuthContext>,
    Json(payload): Json<ElevateRequest>,
) -> Result<Json<ElevateResponse>, AppError> {
    crate::metrics::inc_requests("/admin/elevate");
    match state.elevation.elevate(&context.org_id, &payload.secret).await {
        Ok(outcome) => Ok(Json(ElevateResponse {
            elevated: true,
            already_held: outcome == ElevationOutcome::AlreadyHeld,
        })),
        Err(ElevationError::NotConfigured) => {
            Err(AppError::invalid("admin", "elevation is not configured"))
        }
        Err(ElevationError::InvalidSecret) => Err(AppError::Unauthorized {
            code: "admin",
            detail: "invalid elevation secret".into(),
        }),
        Err(ElevationError::AlreadyHeldByOther) => Err(AppError::Conflict {
            detail: "elevation already granted to another organization".into(),
        }),
    }
}

#[derive(Debug)]
enum AppError {
    Invalid { code: &'static str, detail: String },
    Unauthorized { code: &'static str, detail: String },
    Conflict { detail: String },
    NotFound,
    Internal(String),
}

impl AppError {
    fn invalid(code: &'static str, detail: impl Into<String>) -> Self {
        Self::Invalid {
            code,
            detail: detail.into(),
        }
    }

    fn internal(detail: impl Into<String>) -> Self {
        Self::Internal(detail.into())
    }
}

impl From<LedgerError> for AppError {
    fn from(value: LedgerError) -> Self {
        match value {
            LedgerError::NotFound => AppError::NotFound,
            other => AppError::Internal(other.to_string()),
        }
    }
}

impl From<EngineError> for AppError {
    fn from(value: EngineError) -> Self {
        match value {
            EngineError::NotFound => AppError::NotFound,
            EngineError::WrongKind => AppError::invalid("replications", value.to_string()),
            EngineError::Ledger(err) => err.into(),
            other => AppError::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error, detail) = match self {
            AppError::Invalid { code, detail } => {
                (StatusCode::BAD_REQUEST, code.to_string(), Some(detail))
            }
            AppError::Unauthorized { code, detail } => {
                (StatusCode::UNAUTHORIZED, code.to_string(), Some(detail))
            }
            AppError::Conflict { detail } => {
                (StatusCode::CONFLICT, "conflict".to_string(), Some(detail))
            }
            AppError::NotFound => (StatusCode::NOT_FOUND, "not_found".to_string(), None),
            AppError::Internal(detail) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal".to_string(),
                Some(detail),
            ),
        };
        let payload = ApiError { error, detail };
        (status, Json(payload)).into_response()
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug"));
    let _ = fmt().with_env_filter(filter).try_init();
}

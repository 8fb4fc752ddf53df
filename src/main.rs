mod alerts;
mod approval;
mod config;
mod crypto;
mod fanout;
mod gbp;
mod http;
mod ingest;
mod jobs;
mod locations;
mod media;
mod meta;
mod metrics;
mod models;
mod oauth;
mod scheduler;
mod scrape;
mod security;
mod store;
mod tasks;
mod text;
mod tokens;

#[cfg(test)]
mod testutil;

use alerts::AlertSink;
use approval::{ApprovalError, ApprovalGate, PostEdit};
use axum::{
    Json, Router,
    extract::{Extension, Path, Query, State},
    http::{HeaderMap, StatusCode, header},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use config::Settings;
use crypto::{AesGcmCipher, TokenCipher};
use gbp::{GbpApi, GbpClient};
use ingest::{Ingestor, Pacing};
use jobs::{QueueClosed, Task, TaskQueue, Workers};
use locations::{LocationError, LocationService};
use media::MediaService;
use meta::MetaClient;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use models::{Alert, ApiError, Connection, Location, PublishJob, SocialAccount, UploadJob};
use oauth::GoogleOAuth;
use scheduler::Scheduler;
use scrape::{HttpFetcher, PageFetcher, RobotsCache, SelectorSet};
use security::{AuthContext, AuthState, StateError, StateSigner, require_api_auth};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::{net::SocketAddr, sync::Arc};
use store::{MemoryStore, PgStore, Store, StoreError};
use tasks::TaskRunner;
use tokens::TokenManager;
use tower_http::{
    cors::{Any, CorsLayer},
    services::ServeDir,
    trace::TraceLayer,
};
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt};
use uuid::Uuid;

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        error!(target = "salon_gbp.api", "server crashed: {err}");
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let _ = dotenvy::dotenv();
    init_tracing();

    let settings = Settings::from_env()?;
    let store: Arc<dyn Store> = match &settings.database_url {
        Some(url) => Arc::new(PgStore::connect(url, 10).await?),
        None => {
            warn!(
                target = "salon_gbp.store",
                "DATABASE_URL not set; using the in-memory store"
            );
            Arc::new(MemoryStore::new())
        }
    };
    let prometheus_handle = PrometheusBuilder::new().install_recorder()?;

    let cipher: Arc<dyn TokenCipher> = Arc::new(AesGcmCipher::from_env());
    let google = Arc::new(GoogleOAuth::from_env());
    let meta = Arc::new(MetaClient::from_env());
    let gbp: Arc<dyn GbpApi> = Arc::new(GbpClient::from_env());
    let alerts = AlertSink::new(store.clone());
    let tokens = TokenManager::new(store.clone(), cipher.clone(), google.clone());

    let selectors = Arc::new(SelectorSet::load(settings.selectors_dir.as_deref())?);
    let robots = Arc::new(RobotsCache::new(
        http::build_scraper_client(&settings.scraper.user_agent),
        settings.scraper.user_agent.clone(),
        settings.scraper.robots_ttl,
    ));
    let scrape_fetcher: Arc<dyn PageFetcher> =
        Arc::new(HttpFetcher::for_scraping(&settings.scraper, robots));
    let media = MediaService::new(
        store.clone(),
        Arc::new(HttpFetcher::direct(http::build_client())),
        alerts.clone(),
        settings.media.clone(),
    );

    let runner = TaskRunner::new(
        store.clone(),
        gbp.clone(),
        tokens.clone(),
        alerts.clone(),
        settings.task_max_retries,
    );
    let (queue, _worker) = TaskQueue::spawn(
        Workers {
            runner,
            media: media.clone(),
        },
        settings.queue_capacity,
        settings.worker_concurrency,
    );

    let ingestor = Ingestor::new(
        store.clone(),
        scrape_fetcher,
        meta.clone(),
        cipher.clone(),
        media.clone(),
        alerts.clone(),
        selectors,
        Pacing::from(&settings.scraper),
    );
    let _scheduler = Scheduler::new(
        store.clone(),
        ingestor,
        media,
        queue.clone(),
        cipher,
        meta.clone(),
        alerts.clone(),
    )
    .spawn(settings.scrape_interval);

    let state = AppState {
        store: store.clone(),
        approvals: ApprovalGate::new(store.clone()),
        locations: LocationService::new(
            store,
            gbp,
            tokens,
            google,
            meta,
            StateSigner::from_env(),
            alerts,
        ),
        queue,
        prometheus_handle,
    };

    let app = router(state, AuthState::from_env()).nest_service(
        &settings.media.public_path,
        ServeDir::new(&settings.media.root),
    );

    let addr: SocketAddr = ([0, 0, 0, 0], settings.port).into();
    info!(target = "salon_gbp.api", "listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service()).await?;
    Ok(())
}

#[derive(Clone)]
struct AppState {
    store: Arc<dyn Store>,
    approvals: ApprovalGate,
    locations: LocationService,
    queue: TaskQueue,
    prometheus_handle: PrometheusHandle,
}

fn router(state: AppState, auth_state: AuthState) -> Router {
    let cors = CorsLayer::new()
        .allow_headers(Any)
        .allow_methods(Any)
        .allow_origin(Any);

    let protected = Router::new()
        .nest(
            "/posts",
            Router::new()
                .route("/", get(list_posts))
                .route("/{id}", axum::routing::patch(edit_post))
                .route("/{id}/approve", post(approve_post))
                .route("/{id}/retry", post(retry_post))
                .route("/{id}/skip", post(skip_post)),
        )
        .nest(
            "/uploads",
            Router::new()
                .route("/", get(list_uploads))
                .route("/{id}/approve", post(approve_upload))
                .route("/{id}/retry", post(retry_upload))
                .route("/{id}/skip", post(skip_upload)),
        )
        .nest(
            "/locations",
            Router::new()
                .route("/", get(list_locations))
                .route("/sync", post(sync_locations))
                .route("/{id}/activate", post(activate_location)),
        )
        .nest(
            "/alerts",
            Router::new()
                .route("/", get(list_alerts))
                .route("/{id}/ack", post(ack_alert)),
        )
        .route("/oauth/google/start", get(google_start))
        .route("/oauth/meta/start", get(meta_start))
        .route_layer(middleware::from_fn_with_state(auth_state, require_api_auth));

    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics_endpoint))
        .route("/oauth/google/callback", get(google_callback))
        .route("/oauth/meta/callback", get(meta_callback))
        .merge(protected)
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

/// Health and readiness check.
///
/// - Method: `GET`
/// - Path: `/health`
/// - Auth: none
async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "service": "salon-gbp-rs",
    }))
}

async fn metrics_endpoint(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Ok(secret) = std::env::var("METRICS_KEY") {
        let presented = headers
            .get("X-Metrics-Key")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if presented != secret {
            return (StatusCode::UNAUTHORIZED, "unauthorized").into_response();
        }
    }
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.prometheus_handle.render(),
    )
        .into_response()
}

// -------- Publish jobs --------

async fn list_posts(
    State(state): State<AppState>,
    Extension(context): Extension<AuthContext>,
) -> Result<Json<Vec<PublishJob>>, AppError> {
    crate::metrics::inc_requests("/posts");
    Ok(Json(state.store.list_publish_jobs(context.tenant_id).await?))
}

/// Edit the reviewable fields of a publish job.
///
/// - Method: `PATCH`
/// - Path: `/posts/{id}`
/// - Body: `PostEdit` (absent fields keep their value)
async fn edit_post(
    State(state): State<AppState>,
    Extension(context): Extension<AuthContext>,
    Path(id): Path<Uuid>,
    Json(edit): Json<PostEdit>,
) -> Result<Json<PublishJob>, AppError> {
    crate::metrics::inc_requests("/posts/edit");
    let job = state.approvals.edit_post(context.tenant_id, id, edit).await?;
    Ok(Json(job))
}

/// Approve a pending publish job and hand it to the worker.
///
/// - Method: `POST`
/// - Path: `/posts/{id}/approve`
/// - Response: the job, now `queued`
async fn approve_post(
    State(state): State<AppState>,
    Extension(context): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> Result<Json<PublishJob>, AppError> {
    crate::metrics::inc_requests("/posts/approve");
    let job = state.approvals.approve_post(context.tenant_id, id).await?;
    state.queue.enqueue(Task::publish(job.id)).await?;
    Ok(Json(job))
}

async fn retry_post(
    State(state): State<AppState>,
    Extension(context): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> Result<Json<PublishJob>, AppError> {
    crate::metrics::inc_requests("/posts/retry");
    let job = state.approvals.retry_post(context.tenant_id, id).await?;
    state.queue.enqueue(Task::publish(job.id)).await?;
    Ok(Json(job))
}

async fn skip_post(
    State(state): State<AppState>,
    Extension(context): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> Result<Json<PublishJob>, AppError> {
    crate::metrics::inc_requests("/posts/skip");
    Ok(Json(state.approvals.skip_post(context.tenant_id, id).await?))
}

// -------- Upload jobs --------

async fn list_uploads(
    State(state): State<AppState>,
    Extension(context): Extension<AuthContext>,
) -> Result<Json<Vec<UploadJob>>, AppError> {
    crate::metrics::inc_requests("/uploads");
    Ok(Json(state.store.list_upload_jobs(context.tenant_id).await?))
}

async fn approve_upload(
    State(state): State<AppState>,
    Extension(context): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> Result<Json<UploadJob>, AppError> {
    crate::metrics::inc_requests("/uploads/approve");
    let job = state.approvals.approve_upload(context.tenant_id, id).await?;
    state.queue.enqueue(Task::upload(job.id)).await?;
    Ok(Json(job))
}

async fn retry_upload(
    State(state): State<AppState>,
    Extension(context): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> Result<Json<UploadJob>, AppError> {
    crate::metrics::inc_requests("/uploads/retry");
    let job = state.approvals.retry_upload(context.tenant_id, id).await?;
    state.queue.enqueue(Task::upload(job.id)).await?;
    Ok(Json(job))
}

async fn skip_upload(
    State(state): State<AppState>,
    Extension(context): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> Result<Json<UploadJob>, AppError> {
    crate::metrics::inc_requests("/uploads/skip");
    Ok(Json(state.approvals.skip_upload(context.tenant_id, id).await?))
}

// -------- Locations & connections --------

async fn list_locations(
    State(state): State<AppState>,
    Extension(context): Extension<AuthContext>,
) -> Result<Json<Vec<Location>>, AppError> {
    crate::metrics::inc_requests("/locations");
    Ok(Json(state.locations.list_locations(context.tenant_id).await?))
}

#[derive(Debug, Deserialize)]
struct SyncRequest {
    connection_id: Uuid,
}

/// Pull accounts and locations from GBP for one connection.
///
/// - Method: `POST`
/// - Path: `/locations/sync`
/// - Body: `{ "connection_id": "<uuid>" }`
async fn sync_locations(
    State(state): State<AppState>,
    Extension(context): Extension<AuthContext>,
    Json(payload): Json<SyncRequest>,
) -> Result<Json<Vec<Location>>, AppError> {
    crate::metrics::inc_requests("/locations/sync");
    let synced = state
        .locations
        .sync_locations(context.tenant_id, payload.connection_id)
        .await?;
    Ok(Json(synced))
}

async fn activate_location(
    State(state): State<AppState>,
    Extension(context): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> Result<Json<Location>, AppError> {
    crate::metrics::inc_requests("/locations/activate");
    Ok(Json(
        state.locations.activate_location(context.tenant_id, id).await?,
    ))
}

// -------- Alerts --------

async fn list_alerts(
    State(state): State<AppState>,
    Extension(context): Extension<AuthContext>,
) -> Result<Json<Vec<Alert>>, AppError> {
    crate::metrics::inc_requests("/alerts");
    Ok(Json(state.store.list_alerts(Some(context.tenant_id)).await?))
}

async fn ack_alert(
    State(state): State<AppState>,
    Extension(context): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    crate::metrics::inc_requests("/alerts/ack");
    if state.store.acknowledge_alert(context.tenant_id, id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::NotFound { entity: "alert", id })
    }
}

// -------- OAuth --------

#[derive(Debug, Serialize)]
struct AuthorizeResponse {
    authorize_url: String,
}

#[derive(Debug, Deserialize)]
struct CallbackParams {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    state: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

impl CallbackParams {
    fn into_parts(self) -> Result<(String, String), AppError> {
        if let Some(reason) = self.error {
            return Err(AppError::Validation(format!("authorization denied: {reason}")));
        }
        match (self.state, self.code) {
            (Some(state), Some(code)) if !state.is_empty() && !code.is_empty() => Ok((state, code)),
            _ => Err(AppError::Validation("missing code or state".into())),
        }
    }
}

async fn google_start(
    State(state): State<AppState>,
    Extension(context): Extension<AuthContext>,
) -> Result<Json<AuthorizeResponse>, AppError> {
    crate::metrics::inc_requests("/oauth/google/start");
    let authorize_url = state.locations.google_authorize_url(context.tenant_id)?;
    Ok(Json(AuthorizeResponse { authorize_url }))
}

#[derive(Debug, Serialize)]
struct GoogleConnected {
    tenant_id: Uuid,
    connection: Connection,
}

/// Google redirects here after consent. The tenant comes from the signed
/// `state`, not from an API key.
async fn google_callback(
    State(state): State<AppState>,
    Query(params): Query<CallbackParams>,
) -> Result<Json<GoogleConnected>, AppError> {
    crate::metrics::inc_requests("/oauth/google/callback");
    let (raw_state, code) = params.into_parts()?;
    let (tenant_id, connection) = state.locations.connect_google(&raw_state, &code).await?;
    Ok(Json(GoogleConnected {
        tenant_id,
        connection,
    }))
}

async fn meta_start(
    State(state): State<AppState>,
    Extension(context): Extension<AuthContext>,
) -> Result<Json<AuthorizeResponse>, AppError> {
    crate::metrics::inc_requests("/oauth/meta/start");
    let authorize_url = state.locations.instagram_authorize_url(context.tenant_id)?;
    Ok(Json(AuthorizeResponse { authorize_url }))
}

#[derive(Debug, Serialize)]
struct InstagramConnected {
    tenant_id: Uuid,
    accounts: Vec<SocialAccount>,
}

async fn meta_callback(
    State(state): State<AppState>,
    Query(params): Query<CallbackParams>,
) -> Result<Json<InstagramConnected>, AppError> {
    crate::metrics::inc_requests("/oauth/meta/callback");
    let (raw_state, code) = params.into_parts()?;
    let (tenant_id, accounts) = state.locations.connect_instagram(&raw_state, &code).await?;
    Ok(Json(InstagramConnected {
        tenant_id,
        accounts,
    }))
}

// -------- Errors --------

#[derive(Debug)]
enum AppError {
    Approval(ApprovalError),
    Location(LocationError),
    Store(StoreError),
    Queue(QueueClosed),
    NotFound { entity: &'static str, id: Uuid },
    Validation(String),
}

impl From<ApprovalError> for AppError {
    fn from(value: ApprovalError) -> Self {
        Self::Approval(value)
    }
}

impl From<LocationError> for AppError {
    fn from(value: LocationError) -> Self {
        Self::Location(value)
    }
}

impl From<StoreError> for AppError {
    fn from(value: StoreError) -> Self {
        Self::Store(value)
    }
}

impl From<QueueClosed> for AppError {
    fn from(value: QueueClosed) -> Self {
        Self::Queue(value)
    }
}

impl AppError {
    fn parts(&self) -> (StatusCode, &'static str) {
        match self {
            AppError::Approval(ApprovalError::NotFound { .. }) | AppError::NotFound { .. } => {
                (StatusCode::NOT_FOUND, "not_found")
            }
            AppError::Approval(ApprovalError::Conflict(_)) => (StatusCode::CONFLICT, "conflict"),
            AppError::Approval(ApprovalError::Validation(_)) | AppError::Validation(_) => {
                (StatusCode::UNPROCESSABLE_ENTITY, "validation_failed")
            }
            AppError::Location(err) => match err {
                LocationError::NotFound { .. } => (StatusCode::NOT_FOUND, "not_found"),
                LocationError::State(StateError::MissingSecret) => {
                    (StatusCode::INTERNAL_SERVER_ERROR, "internal")
                }
                LocationError::State(_) => (StatusCode::BAD_REQUEST, "invalid_state"),
                LocationError::NoInstagramAccount => {
                    (StatusCode::UNPROCESSABLE_ENTITY, "validation_failed")
                }
                LocationError::OAuth(_) | LocationError::Gbp(_) | LocationError::Token(_) => {
                    (StatusCode::BAD_GATEWAY, "upstream_failed")
                }
                LocationError::Crypto(_) | LocationError::Store(_) => {
                    (StatusCode::INTERNAL_SERVER_ERROR, "internal")
                }
            },
            AppError::Queue(_) => (StatusCode::SERVICE_UNAVAILABLE, "queue_closed"),
            AppError::Approval(ApprovalError::Store(_)) | AppError::Store(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "internal")
            }
        }
    }

    fn detail(&self) -> String {
        match self {
            AppError::Approval(err) => err.to_string(),
            AppError::Location(err) => err.to_string(),
            AppError::Store(err) => err.to_string(),
            AppError::Queue(err) => err.to_string(),
            AppError::NotFound { entity, id } => format!("{entity} {id} not found"),
            AppError::Validation(message) => message.clone(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = self.parts();
        if status.is_server_error() {
            error!(target = "salon_gbp.api", error = %self.detail(), "request_failed");
        }
        let payload = ApiError {
            error: code.to_string(),
            detail: Some(self.detail()),
        };
        (status, Json(payload)).into_response()
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug"));
    let _ = fmt().with_env_filter(filter).try_init();
}

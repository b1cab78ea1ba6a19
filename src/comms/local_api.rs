use anyhow::Result;
use axum::{
    extract::{Extension, Path, Query, Request, State},
    http::{HeaderMap, HeaderValue, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::num::NonZeroU64;
use std::sync::Arc;
use axum::extract::DefaultBodyLimit;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tracing::{info, warn};

use crate::config::SecurityConfig;
use crate::security::{
    AgentCredentials, AgentRole, AuditLogger, AuthGate, CredentialStore, Permission, RateLimiter,
    SecurityError, TokenService,
};
use crate::telemetry::collector::EventDetails;
use crate::telemetry::middleware::track_requests;
use crate::telemetry::{EventType, TelemetryCollector, TelemetryExporter};

pub type SharedState = Arc<AppState>;

/// Everything one agent process needs to secure and observe its local API.
/// Constructed once at startup and threaded through request handling;
/// the stores inside are the per-process singletons.
#[derive(Debug, Clone)]
pub struct AppState {
    pub config: Arc<SecurityConfig>,
    pub credentials: CredentialStore,
    pub tokens: TokenService,
    pub gate: AuthGate,
    pub limiter: RateLimiter,
    pub collector: TelemetryCollector,
    pub audit: AuditLogger,
}

impl AppState {
    pub fn new(config: Arc<SecurityConfig>, agent_id: &str) -> Self {
        let credentials = CredentialStore::new(config.jwt_secret.clone());
        let tokens = TokenService::new(
            config.jwt_secret.clone(),
            config.jwt_algorithm.clone(),
            config.jwt_expiration_hours,
            credentials.clone(),
        );
        let audit = AuditLogger::new();
        Self {
            gate: AuthGate::new(credentials.clone(), tokens.clone(), audit.clone()),
            limiter: RateLimiter::new_per_minute(config.rate_limit_per_minute),
            collector: TelemetryCollector::with_defaults(agent_id),
            credentials,
            tokens,
            audit,
            config,
        }
    }
}

// ---------- request/response bodies ----------

#[derive(Debug, Deserialize)]
pub struct IssueRequest {
    pub agent_id: String,
    pub role: AgentRole,
    pub permissions: Vec<Permission>,
    pub ttl_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct ExportRequest {
    pub path: String,
}

#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub token: String,
}

// ---------- authentication middleware ----------

/// Extract the bearer value: `Authorization: Bearer <value>` first, then
/// the configured API-key header as a fallback for legacy callers.
fn bearer_value(config: &SecurityConfig, headers: &HeaderMap) -> Option<String> {
    if let Some(auth) = headers.get("authorization").and_then(|v| v.to_str().ok()) {
        if let Some(value) = auth.strip_prefix("Bearer ") {
            return Some(value.trim().to_string());
        }
    }
    headers
        .get(config.api_key_header.as_str())
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().to_string())
}

/// Authenticates and rate-limits every protected route, inserting the
/// resolved credentials into request extensions. Failures surface as
/// 401/429 before any handler runs.
async fn require_auth(
    State(state): State<SharedState>,
    mut request: Request,
    next: Next,
) -> Result<Response, SecurityError> {
    let Some(bearer) = bearer_value(&state.config, request.headers()) else {
        state.audit.auth_failure("missing bearer value");
        state
            .collector
            .record_event(
                EventType::AuthFailure,
                EventDetails::failure("missing bearer value"),
            )
            .await;
        return Err(SecurityError::Authentication(
            "credential required".to_string(),
        ));
    };

    let credentials = match state.gate.authenticate(&bearer).await {
        Ok(credentials) => credentials,
        Err(err) => {
            state
                .collector
                .record_event(EventType::AuthFailure, EventDetails::failure(err.to_string()))
                .await;
            return Err(err);
        }
    };

    if !state.limiter.is_allowed(&credentials.agent_id).await {
        state.audit.rate_limited(&credentials.agent_id);
        state
            .collector
            .record_event(
                EventType::RateLimitHit,
                EventDetails {
                    data: HashMap::from([(
                        "agent_id".to_string(),
                        Value::from(credentials.agent_id.clone()),
                    )]),
                    success: false,
                    ..EventDetails::default()
                },
            )
            .await;
        return Err(SecurityError::RateLimitExceeded);
    }

    state
        .collector
        .record_event(
            EventType::AuthSuccess,
            EventDetails::with_data(HashMap::from([(
                "agent_id".to_string(),
                Value::from(credentials.agent_id.clone()),
            )])),
        )
        .await;

    request.extensions_mut().insert(credentials);
    Ok(next.run(request).await)
}

// ---------- handlers ----------

async fn health() -> impl IntoResponse {
    Json(json!({"status": "ok", "version": crate::VERSION}))
}

async fn telemetry_summary(
    State(state): State<SharedState>,
    Extension(credentials): Extension<AgentCredentials>,
) -> Result<Response, SecurityError> {
    state
        .gate
        .require_permission(&credentials, Permission::ViewMetrics)?;

    let summary = state.collector.get_summary().await;
    let recent_events = state.collector.get_events(Some(100), None).await;
    let recent_metrics = state.collector.get_metrics(Some(100), None).await;
    Ok(Json(json!({
        "summary": summary,
        "recent_events": recent_events,
        "recent_metrics": recent_metrics,
    }))
    .into_response())
}

async fn telemetry_events(
    State(state): State<SharedState>,
    Extension(credentials): Extension<AgentCredentials>,
    Query(query): Query<EventsQuery>,
) -> Result<Response, SecurityError> {
    state
        .gate
        .require_permission(&credentials, Permission::ViewMetrics)?;

    let events = state.collector.get_events(query.limit, None).await;
    Ok(Json(json!({"events": events})).into_response())
}

async fn telemetry_export(
    State(state): State<SharedState>,
    Extension(credentials): Extension<AgentCredentials>,
    Json(request): Json<ExportRequest>,
) -> Result<Response, SecurityError> {
    state
        .gate
        .require_permission(&credentials, Permission::ViewMetrics)?;

    let exporter = TelemetryExporter::new(state.collector.clone());
    match exporter.export_to_file(&request.path).await {
        Ok(()) => Ok(Json(json!({"status": "exported", "path": request.path})).into_response()),
        Err(err) => {
            warn!(path = %request.path, error = %err, "telemetry export failed");
            Ok((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": "export failed"})),
            )
                .into_response())
        }
    }
}

async fn create_agent(
    State(state): State<SharedState>,
    Extension(credentials): Extension<AgentCredentials>,
    Json(request): Json<IssueRequest>,
) -> Result<Response, SecurityError> {
    state
        .gate
        .require_permission(&credentials, Permission::ManageAgents)?;

    let ttl = match request.ttl_secs {
        Some(0) => {
            return Ok((
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(json!({"error": "ttl_secs must be positive"})),
            )
                .into_response())
        }
        Some(secs) => NonZeroU64::new(secs),
        None => None,
    };

    let permissions: HashSet<Permission> = request.permissions.into_iter().collect();
    let issued = state
        .credentials
        .issue(&request.agent_id, request.role, permissions, ttl)
        .await?;
    state
        .audit
        .credential_issued(&issued.agent_id, issued.role.as_str());
    Ok((StatusCode::CREATED, Json(issued)).into_response())
}

async fn list_agents(
    State(state): State<SharedState>,
    Extension(credentials): Extension<AgentCredentials>,
) -> Result<Response, SecurityError> {
    state
        .gate
        .require_permission(&credentials, Permission::ManageAgents)?;
    Ok(Json(json!({"agents": state.credentials.list().await})).into_response())
}

async fn revoke_agent(
    State(state): State<SharedState>,
    Extension(credentials): Extension<AgentCredentials>,
    Path(agent_id): Path<String>,
) -> Result<Response, SecurityError> {
    state
        .gate
        .require_permission(&credentials, Permission::ManageAgents)?;
    let removed = state.credentials.revoke(&agent_id).await;
    state.audit.credential_revoked(&agent_id, removed);
    Ok(Json(json!({"removed": removed})).into_response())
}

async fn mint_token(
    State(state): State<SharedState>,
    Extension(credentials): Extension<AgentCredentials>,
    Path(agent_id): Path<String>,
) -> Result<Response, SecurityError> {
    state
        .gate
        .require_permission(&credentials, Permission::ManageAgents)?;
    let token = state.tokens.mint(&agent_id, None).await?;
    state.audit.token_minted(&agent_id);
    Ok(Json(TokenResponse { token }).into_response())
}

// ---------- router / server ----------

pub fn create_router(state: SharedState) -> Router {
    let protected = Router::new()
        .route("/telemetry/summary", get(telemetry_summary))
        .route("/telemetry/events", get(telemetry_events))
        .route("/telemetry/export", post(telemetry_export))
        .route("/agents", post(create_agent).get(list_agents))
        .route("/agents/{agent_id}", delete(revoke_agent))
        .route("/agents/{agent_id}/token", post(mint_token))
        .layer(middleware::from_fn_with_state(state.clone(), require_auth));

    let mut router = Router::new()
        .route("/health", get(health))
        .merge(protected)
        .layer(middleware::from_fn_with_state(
            state.collector.clone(),
            track_requests,
        ))
        .layer(DefaultBodyLimit::max(state.config.max_request_size));

    if let Some(origins) = &state.config.allowed_origins {
        let origins: Vec<HeaderValue> = origins
            .iter()
            .filter_map(|o| o.parse::<HeaderValue>().ok())
            .collect();
        router = router.layer(
            CorsLayer::new()
                .allow_origin(AllowOrigin::list(origins))
                .allow_methods(Any)
                .allow_headers(Any),
        );
    }

    router.with_state(state)
}

pub async fn serve(config: SecurityConfig, agent_id: &str, port: u16) -> Result<()> {
    if !TokenService::supports(&config.jwt_algorithm) {
        anyhow::bail!("unsupported signing algorithm: {}", config.jwt_algorithm);
    }
    if config.require_tls {
        warn!("require_tls is set; TLS termination must be provided by the fronting proxy");
    }

    let state = Arc::new(AppState::new(Arc::new(config), agent_id));
    state.credentials.install_defaults().await?;
    state
        .collector
        .record_event(EventType::AgentStart, EventDetails::default())
        .await;

    let app = create_router(state.clone())
        .into_make_service_with_connect_info::<SocketAddr>();

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, agent_id, "security API listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    state
        .collector
        .record_event(EventType::AgentStop, EventDetails::default())
        .await;
    info!(agent_id, "security API stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "failed to install shutdown handler");
    }
}

//! HTTP surface: routes, handlers, and the bearer-auth extractor.
//!
//! Handlers stay thin, payload extraction and status codes only; the
//! business logic lives in [`crate::service`]. Write endpoints run inside a
//! per-request transaction: commit on success, rollback on any error path
//! (dropping an uncommitted sea-orm transaction rolls it back).

use axum::{
    Json, Router,
    extract::{FromRequestParts, Path, Query, State},
    http::{StatusCode, header, request::Parts},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::Utc;
use sea_orm::{DatabaseConnection, TransactionTrait};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::auth;
use crate::config::AppConfig;
use crate::errors::ServiceError;
use crate::service::{self, BatchItem, CommitLinkPayload, ConversationContentItem};

#[derive(Clone)]
pub struct AppState {
    pub db: DatabaseConnection,
    pub config: AppConfig,
}

/// Identity bound from the bearer token. The token carries user identity
/// only; project scope comes from the request payload.
#[derive(Debug, Clone)]
pub struct AuthUser(pub String);

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ServiceError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let header_value = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        let Some(token) = header_value.strip_prefix("Bearer ") else {
            return Err(ServiceError::Unauthorized(
                "Missing or invalid Authorization header".to_string(),
            ));
        };
        match auth::decode_token(&state.config.auth_secret, token) {
            Some(user_id) => Ok(AuthUser(user_id)),
            None => Err(ServiceError::Unauthorized(
                "Invalid or expired token".to_string(),
            )),
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/v1/tokens/generate", post(generate_token))
        .route("/api/v1/tokens/verify", post(verify_token))
        .route("/api/v1/projects", post(create_project))
        .route("/api/v1/projects/{id}", get(project_detail))
        .route("/api/v1/traces", post(ingest_trace).get(list_traces))
        .route("/api/v1/traces/batch", post(batch_ingest))
        .route("/api/v1/traces/{id}", get(trace_detail))
        .route("/api/v1/commit-links", post(ingest_commit_link))
        .route("/api/v1/commit-links/{sha}", get(commit_link_detail))
        .route("/api/v1/ledgers/{sha}", get(ledger_detail))
        .route("/api/v1/blame", post(blame))
        .route("/api/v1/conversations/sync", post(sync_conversations))
        .route("/api/v1/conversations/content", get(conversation_content))
        .with_state(state)
}

/// Unwrap a required, non-empty string field.
fn require(value: Option<String>, field: &str) -> Result<String, ServiceError> {
    value
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ServiceError::missing_field(field))
}

// ---------------------------------------------------------------------------
// Health & tokens (no auth)
// ---------------------------------------------------------------------------

async fn health(State(state): State<AppState>) -> Response {
    match service::health_check(&state.db).await {
        Ok(payload) => Json(payload).into_response(),
        Err(e) => {
            tracing::warn!("health check failed: {e}");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "status": "error",
                    "db": "unreachable",
                    "timestamp": Utc::now(),
                })),
            )
                .into_response()
        }
    }
}

#[derive(Debug, Deserialize)]
struct GenerateTokenBody {
    #[serde(default)]
    user_id: Option<String>,
}

async fn generate_token(
    State(state): State<AppState>,
    Json(body): Json<GenerateTokenBody>,
) -> Result<Json<Value>, ServiceError> {
    let user_id = require(body.user_id, "user_id")?;
    Ok(Json(service::handle_generate_token(
        &state.config,
        &user_id,
    )))
}

#[derive(Debug, Deserialize)]
struct VerifyTokenBody {
    #[serde(default)]
    token: Option<String>,
}

async fn verify_token(
    State(state): State<AppState>,
    Json(body): Json<VerifyTokenBody>,
) -> Result<Response, ServiceError> {
    let token = require(body.token, "token")?;
    match service::handle_verify_token(&state.config, &token) {
        Ok(payload) => Ok(Json(payload).into_response()),
        Err(_) => Ok((
            StatusCode::UNAUTHORIZED,
            Json(json!({"valid": false, "error": "Invalid token"})),
        )
            .into_response()),
    }
}

// ---------------------------------------------------------------------------
// Projects
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ProjectBody {
    #[serde(default)]
    project_id: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    description: Option<String>,
}

async fn create_project(
    State(state): State<AppState>,
    _user: AuthUser,
    Json(body): Json<ProjectBody>,
) -> Result<Response, ServiceError> {
    let project_id = require(body.project_id, "project_id")?;
    let txn = state.db.begin().await.map_err(ServiceError::from)?;
    let payload = service::create_or_update_project(
        &txn,
        &project_id,
        body.name.as_deref(),
        body.description.as_deref(),
    )
    .await?;
    txn.commit().await.map_err(ServiceError::from)?;
    Ok((StatusCode::CREATED, Json(payload)).into_response())
}

async fn project_detail(
    State(state): State<AppState>,
    _user: AuthUser,
    Path(project_id): Path<String>,
) -> Result<Json<Value>, ServiceError> {
    service::get_project_detail(&state.db, &project_id)
        .await?
        .map(Json)
        .ok_or_else(|| ServiceError::NotFound(format!("Project not found: {project_id}")))
}

// ---------------------------------------------------------------------------
// Traces
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct IngestTraceBody {
    #[serde(default)]
    project_id: Option<String>,
    #[serde(default)]
    trace: Option<Value>,
    #[serde(default)]
    conversation_contents: Option<Vec<ConversationContentItem>>,
}

async fn ingest_trace(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Json(body): Json<IngestTraceBody>,
) -> Result<Response, ServiceError> {
    let project_id = require(body.project_id, "project_id")?;
    let trace = body.trace.ok_or_else(|| ServiceError::missing_field("trace"))?;
    let contents = body.conversation_contents.unwrap_or_default();

    let txn = state.db.begin().await.map_err(ServiceError::from)?;
    let trace_id = service::ingest_trace(&txn, &project_id, &user_id, &trace, &contents).await?;
    txn.commit().await.map_err(ServiceError::from)?;

    Ok((
        StatusCode::CREATED,
        Json(json!({"ok": true, "trace_id": trace_id})),
    )
        .into_response())
}

#[derive(Debug, Deserialize)]
struct BatchBody {
    #[serde(default)]
    project_id: Option<String>,
    #[serde(default)]
    items: Option<Vec<BatchItem>>,
}

async fn batch_ingest(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Json(body): Json<BatchBody>,
) -> Result<Response, ServiceError> {
    let project_id = require(body.project_id, "project_id")?;
    let items = body.items.unwrap_or_default();
    if items.is_empty() {
        return Err(ServiceError::missing_field("items"));
    }

    let txn = state.db.begin().await.map_err(ServiceError::from)?;
    let trace_ids = service::batch_ingest(&txn, &project_id, &user_id, &items).await?;
    txn.commit().await.map_err(ServiceError::from)?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "ok": true,
            "count": trace_ids.len(),
            "trace_ids": trace_ids,
        })),
    )
        .into_response())
}

#[derive(Debug, Deserialize)]
struct ListTracesQuery {
    #[serde(default)]
    project_id: Option<String>,
    #[serde(default)]
    since: Option<String>,
    #[serde(default)]
    until: Option<String>,
    #[serde(default)]
    limit: Option<u64>,
    #[serde(default)]
    offset: Option<u64>,
}

async fn list_traces(
    State(state): State<AppState>,
    _user: AuthUser,
    Query(query): Query<ListTracesQuery>,
) -> Result<Json<Value>, ServiceError> {
    let project_id = require(query.project_id, "project_id")?;
    let payload = service::query_traces(
        &state.db,
        &project_id,
        query.since.as_deref(),
        query.until.as_deref(),
        query.limit,
        query.offset,
    )
    .await?;
    Ok(Json(payload))
}

#[derive(Debug, Deserialize)]
struct ProjectScopeQuery {
    #[serde(default)]
    project_id: Option<String>,
}

async fn trace_detail(
    State(state): State<AppState>,
    _user: AuthUser,
    Path(trace_id): Path<String>,
    Query(query): Query<ProjectScopeQuery>,
) -> Result<Json<Value>, ServiceError> {
    let project_id = require(query.project_id, "project_id")?;
    service::get_trace_detail(&state.db, &project_id, &trace_id)
        .await?
        .map(Json)
        .ok_or_else(|| ServiceError::NotFound(format!("Trace not found: {trace_id}")))
}

// ---------------------------------------------------------------------------
// Commit links & ledgers
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct CommitLinkBody {
    #[serde(default)]
    project_id: Option<String>,
    #[serde(flatten)]
    link: CommitLinkPayload,
}

async fn ingest_commit_link(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Json(body): Json<CommitLinkBody>,
) -> Result<Response, ServiceError> {
    let project_id = require(body.project_id, "project_id")?;

    let txn = state.db.begin().await.map_err(ServiceError::from)?;
    let commit_sha = service::ingest_commit_link(&txn, &project_id, &user_id, body.link).await?;
    txn.commit().await.map_err(ServiceError::from)?;

    Ok((
        StatusCode::CREATED,
        Json(json!({"ok": true, "commit_sha": commit_sha})),
    )
        .into_response())
}

async fn commit_link_detail(
    State(state): State<AppState>,
    _user: AuthUser,
    Path(commit_sha): Path<String>,
    Query(query): Query<ProjectScopeQuery>,
) -> Result<Json<Value>, ServiceError> {
    let project_id = require(query.project_id, "project_id")?;
    service::get_commit_link_detail(&state.db, &project_id, &commit_sha)
        .await?
        .map(Json)
        .ok_or_else(|| ServiceError::NotFound(format!("Commit link not found: {commit_sha}")))
}

async fn ledger_detail(
    State(state): State<AppState>,
    _user: AuthUser,
    Path(commit_sha): Path<String>,
    Query(query): Query<ProjectScopeQuery>,
) -> Result<Json<Value>, ServiceError> {
    let project_id = require(query.project_id, "project_id")?;
    service::get_ledger(&state.db, &project_id, &commit_sha)
        .await?
        .map(Json)
        .ok_or_else(|| ServiceError::NotFound(format!("Ledger not found: {commit_sha}")))
}

// ---------------------------------------------------------------------------
// Blame
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct BlameBody {
    #[serde(default)]
    project_id: Option<String>,
    #[serde(default)]
    file_path: Option<String>,
    #[serde(default)]
    blame_data: Option<Vec<Value>>,
}

async fn blame(
    State(state): State<AppState>,
    _user: AuthUser,
    Json(body): Json<BlameBody>,
) -> Result<Json<Value>, ServiceError> {
    let project_id = require(body.project_id, "project_id")?;
    let file_path = require(body.file_path, "file_path")?;
    let blame_data = body.blame_data.unwrap_or_default();

    let payload = service::blame_file(&state.db, &project_id, &file_path, &blame_data).await?;
    Ok(Json(payload))
}

// ---------------------------------------------------------------------------
// Conversations
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct SyncBody {
    #[serde(default)]
    project_id: Option<String>,
    #[serde(default)]
    conversation_contents: Option<Vec<ConversationContentItem>>,
}

async fn sync_conversations(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Json(body): Json<SyncBody>,
) -> Result<Json<Value>, ServiceError> {
    let project_id = require(body.project_id, "project_id")?;
    let contents = body.conversation_contents.unwrap_or_default();

    let txn = state.db.begin().await.map_err(ServiceError::from)?;
    service::sync_conversation_contents(&txn, &project_id, &user_id, &contents).await?;
    txn.commit().await.map_err(ServiceError::from)?;

    Ok(Json(json!({"ok": true})))
}

#[derive(Debug, Deserialize)]
struct ContentQuery {
    #[serde(default)]
    project_id: Option<String>,
    #[serde(default)]
    url: Option<String>,
}

async fn conversation_content(
    State(state): State<AppState>,
    _user: AuthUser,
    Query(query): Query<ContentQuery>,
) -> Result<Json<Value>, ServiceError> {
    let project_id = require(query.project_id, "project_id")?;
    let url = require(query.url, "url")?;
    crate::db::get_conversation_content(&state.db, &project_id, &url)
        .await
        .map_err(ServiceError::from)?
        .map(|content| Json(json!({"content": content})))
        .ok_or_else(|| ServiceError::NotFound(format!("No conversation content for {url}")))
}

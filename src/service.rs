//! Business-logic facade.
//!
//! Sits between the HTTP handlers and the database layer: validates payloads,
//! persists idempotently, and orchestrates multi-step operations. Database
//! errors never reach the caller uninterpreted; they surface as
//! [`ServiceError`] variants with the right status mapping.

use chrono::{DateTime, Utc};
use sea_orm::{ConnectionTrait, DatabaseConnection};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::attribution::{self, BlameSegment, CandidateTrace};
use crate::auth;
use crate::config::AppConfig;
use crate::db;
use crate::errors::ServiceError;
use crate::trace::{extract_fields, parse_timestamp};

/// Default page size for trace listings.
const DEFAULT_LIST_LIMIT: u64 = 50;
/// Hard cap on trace listing page size.
const MAX_LIST_LIMIT: u64 = 200;
/// Conversation summaries are truncated to this many characters.
const SUMMARY_MAX_CHARS: usize = 200;

// ---------------------------------------------------------------------------
// Health
// ---------------------------------------------------------------------------

/// Health-check payload; errors when the database is unreachable.
pub async fn health_check(db: &DatabaseConnection) -> Result<Value, ServiceError> {
    db::ping(db).await?;
    Ok(json!({
        "status": "ok",
        "db": "connected",
        "timestamp": Utc::now(),
    }))
}

// ---------------------------------------------------------------------------
// Tokens
// ---------------------------------------------------------------------------

pub fn handle_generate_token(config: &AppConfig, user_id: &str) -> Value {
    let token = auth::generate_token(&config.auth_secret, user_id);
    json!({
        "token": token,
        "user_id": user_id,
        "note": "Store this token securely. Use it as: Authorization: Bearer <token>",
    })
}

pub fn handle_verify_token(config: &AppConfig, token: &str) -> Result<Value, ServiceError> {
    match auth::decode_token(&config.auth_secret, token) {
        Some(user_id) => Ok(json!({"valid": true, "user_id": user_id})),
        None => Err(ServiceError::Unauthorized("Invalid token".to_string())),
    }
}

// ---------------------------------------------------------------------------
// Projects
// ---------------------------------------------------------------------------

pub async fn create_or_update_project<C: ConnectionTrait>(
    db: &C,
    project_id: &str,
    name: Option<&str>,
    description: Option<&str>,
) -> Result<Value, ServiceError> {
    let project = db::upsert_project(db, project_id, name, description).await?;
    Ok(json!({"project": project}))
}

/// Project info plus aggregate stats, or `None` if the project is unknown.
pub async fn get_project_detail<C: ConnectionTrait>(
    db: &C,
    project_id: &str,
) -> Result<Option<Value>, ServiceError> {
    let Some(project) = db::get_project(db, project_id).await? else {
        return Ok(None);
    };
    let stats = db::get_project_stats(db, project_id).await?;
    Ok(Some(json!({"project": project, "stats": stats})))
}

// ---------------------------------------------------------------------------
// Trace ingestion
// ---------------------------------------------------------------------------

/// A conversation transcript attached to an ingest or sync request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationContentItem {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
}

async fn upsert_contents<C: ConnectionTrait>(
    db: &C,
    project_id: &str,
    user_id: &str,
    contents: &[ConversationContentItem],
) -> Result<(), ServiceError> {
    for item in contents {
        let url = item
            .url
            .as_deref()
            .filter(|u| !u.is_empty())
            .ok_or_else(|| ServiceError::missing_field("conversation_contents[].url"))?;
        let content = item
            .content
            .as_deref()
            .ok_or_else(|| ServiceError::missing_field("conversation_contents[].content"))?;
        db::upsert_conversation_content(db, project_id, user_id, url, content).await?;
    }
    Ok(())
}

/// Ingest a single trace document. Returns the trace_id.
pub async fn ingest_trace<C: ConnectionTrait>(
    db: &C,
    project_id: &str,
    user_id: &str,
    trace: &Value,
    conversation_contents: &[ConversationContentItem],
) -> Result<String, ServiceError> {
    let fields = extract_fields(trace)?;
    let trace_id = fields.trace_id.clone();

    db::ensure_project(db, project_id).await?;
    db::insert_trace(db, project_id, user_id, fields).await?;
    upsert_contents(db, project_id, user_id, conversation_contents).await?;

    tracing::debug!("ingested trace {trace_id} into project {project_id}");
    Ok(trace_id)
}

/// One item of a batch ingest request.
#[derive(Debug, Clone, Deserialize)]
pub struct BatchItem {
    #[serde(default)]
    pub trace: Option<Value>,
    #[serde(default)]
    pub conversation_contents: Option<Vec<ConversationContentItem>>,
}

/// Ingest multiple traces. Returns the trace_ids in request order.
pub async fn batch_ingest<C: ConnectionTrait>(
    db: &C,
    project_id: &str,
    user_id: &str,
    items: &[BatchItem],
) -> Result<Vec<String>, ServiceError> {
    db::ensure_project(db, project_id).await?;

    let mut trace_ids = Vec::with_capacity(items.len());
    for item in items {
        let trace = item
            .trace
            .as_ref()
            .ok_or_else(|| ServiceError::missing_field("items[].trace"))?;
        let fields = extract_fields(trace)?;
        trace_ids.push(fields.trace_id.clone());
        db::insert_trace(db, project_id, user_id, fields).await?;

        if let Some(contents) = &item.conversation_contents {
            upsert_contents(db, project_id, user_id, contents).await?;
        }
    }
    Ok(trace_ids)
}

/// Upsert conversation contents without a trace, e.g. after the agent
/// response completed.
pub async fn sync_conversation_contents<C: ConnectionTrait>(
    db: &C,
    project_id: &str,
    user_id: &str,
    contents: &[ConversationContentItem],
) -> Result<(), ServiceError> {
    if contents.is_empty() {
        return Ok(());
    }
    db::ensure_project(db, project_id).await?;
    upsert_contents(db, project_id, user_id, contents).await
}

// ---------------------------------------------------------------------------
// Trace querying
// ---------------------------------------------------------------------------

fn parse_bound(value: Option<&str>, field: &str) -> Result<Option<DateTime<Utc>>, ServiceError> {
    match value {
        None => Ok(None),
        Some(raw) => parse_timestamp(raw).map(Some).ok_or_else(|| {
            ServiceError::Validation(format!("Unparseable {field} timestamp: {raw}"))
        }),
    }
}

pub async fn query_traces<C: ConnectionTrait>(
    db: &C,
    project_id: &str,
    since: Option<&str>,
    until: Option<&str>,
    limit: Option<u64>,
    offset: Option<u64>,
) -> Result<Value, ServiceError> {
    let limit = limit.unwrap_or(DEFAULT_LIST_LIMIT).min(MAX_LIST_LIMIT);
    let offset = offset.unwrap_or(0);
    let since = parse_bound(since, "since")?;
    let until = parse_bound(until, "until")?;

    let (traces, total) = db::list_traces(db, project_id, since, until, limit, offset).await?;
    Ok(json!({
        "traces": traces,
        "total": total,
        "limit": limit,
        "offset": offset,
    }))
}

/// A single trace record with ownership info, or `None`.
pub async fn get_trace_detail<C: ConnectionTrait>(
    db: &C,
    project_id: &str,
    trace_id: &str,
) -> Result<Option<Value>, ServiceError> {
    Ok(db::get_trace(db, project_id, trace_id)
        .await?
        .map(|row| json!({"trace": row.trace_record, "user_id": row.user_id})))
}

// ---------------------------------------------------------------------------
// Commit links & ledgers
// ---------------------------------------------------------------------------

/// Commit-link ingest payload, as posted by the client-side post-commit hook.
#[derive(Debug, Clone, Deserialize)]
pub struct CommitLinkPayload {
    #[serde(default)]
    pub commit_sha: Option<String>,
    #[serde(default)]
    pub parent_sha: Option<String>,
    #[serde(default)]
    pub trace_ids: Option<Vec<String>>,
    #[serde(default)]
    pub files_changed: Option<Value>,
    #[serde(default)]
    pub committed_at: Option<String>,
    #[serde(default)]
    pub ledger: Option<Value>,
}

/// Upsert a commit link. Returns the commit SHA.
pub async fn ingest_commit_link<C: ConnectionTrait>(
    db: &C,
    project_id: &str,
    user_id: &str,
    payload: CommitLinkPayload,
) -> Result<String, ServiceError> {
    let commit_sha = payload
        .commit_sha
        .filter(|sha| !sha.is_empty())
        .ok_or_else(|| ServiceError::missing_field("commit_sha"))?;
    let trace_ids = payload.trace_ids.unwrap_or_default();
    if trace_ids.is_empty() {
        return Err(ServiceError::Business(
            "commit link requires a non-empty trace_ids array".to_string(),
        ));
    }
    let committed_at = match payload.committed_at.as_deref() {
        None => None,
        Some(raw) => Some(parse_timestamp(raw).ok_or_else(|| {
            ServiceError::Validation(format!("Unparseable committed_at timestamp: {raw}"))
        })?),
    };

    db::ensure_project(db, project_id).await?;
    db::upsert_commit_link(
        db,
        project_id,
        user_id,
        db::CommitLinkFields {
            commit_sha: commit_sha.clone(),
            parent_sha: payload.parent_sha.filter(|sha| !sha.is_empty()),
            trace_ids,
            files_changed: payload.files_changed,
            committed_at,
            ledger: payload.ledger,
        },
    )
    .await?;

    tracing::debug!("linked commit {commit_sha} in project {project_id}");
    Ok(commit_sha)
}

fn summarize(content: &str) -> String {
    let mut summary: String = content.chars().take(SUMMARY_MAX_CHARS).collect();
    if content.chars().count() > SUMMARY_MAX_CHARS {
        summary.push('…');
    }
    summary
}

/// Commit link plus a short summary of each linked trace, or `None`.
pub async fn get_commit_link_detail<C: ConnectionTrait>(
    db: &C,
    project_id: &str,
    commit_sha: &str,
) -> Result<Option<Value>, ServiceError> {
    let Some(link) = db::get_commit_link(db, project_id, commit_sha).await? else {
        return Ok(None);
    };

    let mut trace_summaries = Vec::new();
    for trace_id in link.trace_id_list() {
        let Some(row) = db::get_trace(db, project_id, &trace_id).await? else {
            trace_summaries.push(json!({"trace_id": trace_id}));
            continue;
        };
        let trace_timestamp = row.trace_timestamp;
        let candidate = CandidateTrace::from(row);
        // Empty path matches nothing, so the walk covers every file entry.
        let meta = attribution::result::extract_meta(&candidate, "");
        let conversation_summary = match &meta.conversation_url {
            Some(url) => db::get_conversation_content(db, project_id, url)
                .await?
                .map(|content| summarize(&content)),
            None => None,
        };
        trace_summaries.push(json!({
            "trace_id": trace_id,
            "trace_timestamp": trace_timestamp,
            "tool": candidate.tool,
            "model_id": meta.model_id,
            "conversation_url": meta.conversation_url,
            "conversation_summary": conversation_summary,
        }));
    }

    Ok(Some(json!({
        "commit_sha": link.commit_sha,
        "parent_sha": link.parent_sha,
        "trace_ids": link.trace_ids,
        "files_changed": link.files_changed,
        "committed_at": link.committed_at,
        "has_ledger": link.ledger.is_some(),
        "created_at": link.created_at,
        "trace_summaries": trace_summaries,
    })))
}

/// The stored ledger for a commit, or `None`.
pub async fn get_ledger<C: ConnectionTrait>(
    db: &C,
    project_id: &str,
    commit_sha: &str,
) -> Result<Option<Value>, ServiceError> {
    Ok(db::get_ledger(db, project_id, commit_sha).await?)
}

// ---------------------------------------------------------------------------
// Blame
// ---------------------------------------------------------------------------

/// Attribute each blame segment and collapse adjacent equal results. Blame is
/// read-only: one attribution per segment, no file access, no writes.
pub async fn blame_file<C: ConnectionTrait>(
    db: &C,
    project_id: &str,
    file_path: &str,
    blame_data: &[Value],
) -> Result<Value, ServiceError> {
    let mut segments = Vec::with_capacity(blame_data.len());
    for raw in blame_data {
        let segment: BlameSegment = serde_json::from_value(raw.clone())
            .map_err(|e| ServiceError::Validation(format!("Invalid blame segment: {e}")))?;
        segments.push(segment);
    }

    let attributions = attribution::attribute_file(db, project_id, file_path, &segments).await?;
    Ok(json!({
        "file_path": file_path,
        "attributions": attributions,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summarize_short_content_untouched() {
        assert_eq!(summarize("hello"), "hello");
    }

    #[test]
    fn test_summarize_truncates_with_ellipsis() {
        let long = "x".repeat(500);
        let summary = summarize(&long);
        assert_eq!(summary.chars().count(), SUMMARY_MAX_CHARS + 1);
        assert!(summary.ends_with('…'));
    }

    #[test]
    fn test_summarize_exact_boundary() {
        let exact = "y".repeat(SUMMARY_MAX_CHARS);
        assert_eq!(summarize(&exact), exact);
    }
}

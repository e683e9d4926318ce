//! Database access layer.
//!
//! All queries live here; no other module builds sea-orm statements. Every
//! function is generic over [`ConnectionTrait`] so callers can pass either the
//! pooled connection (reads) or a per-request transaction (writes). Upserts
//! are idempotent on their composite keys; concurrent duplicate ingest calls
//! converge to the same row without error.

pub mod entity;
pub mod schema;

use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, ConnectionTrait, DatabaseConnection, DbErr,
    EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, sea_query::OnConflict,
};
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use crate::trace::TraceFields;
use entity::{commit_link, conversation_content, project, trace};

/// Server-side cap on the timestamp-window candidate query.
pub const TIME_WINDOW_ROW_CAP: u64 = 200;

/// Return Ok(()) if the database is reachable.
pub async fn ping(db: &DatabaseConnection) -> Result<(), DbErr> {
    db.ping().await
}

// ---------------------------------------------------------------------------
// Projects
// ---------------------------------------------------------------------------

/// Aggregate stats for a project.
#[derive(Debug, Default, Clone, Serialize)]
pub struct ProjectStats {
    pub trace_count: u64,
    pub conversation_count: u64,
    pub unique_users: u64,
    pub latest_trace_at: Option<DateTime<Utc>>,
}

/// Insert a project row if it doesn't already exist.
pub async fn ensure_project<C: ConnectionTrait>(db: &C, project_id: &str) -> Result<(), DbErr> {
    let now = Utc::now();
    let row = project::ActiveModel {
        id: Set(Uuid::new_v4()),
        project_id: Set(project_id.to_string()),
        name: Set(None),
        description: Set(None),
        created_at: Set(now),
        updated_at: Set(now),
    };
    let insert = project::Entity::insert(row).on_conflict(
        OnConflict::column(project::Column::ProjectId)
            .do_nothing()
            .to_owned(),
    );
    match insert.exec(db).await {
        Ok(_) | Err(DbErr::RecordNotInserted) => Ok(()),
        Err(e) => Err(e),
    }
}

pub async fn get_project<C: ConnectionTrait>(
    db: &C,
    project_id: &str,
) -> Result<Option<project::Model>, DbErr> {
    project::Entity::find()
        .filter(project::Column::ProjectId.eq(project_id))
        .one(db)
        .await
}

/// Create or update a project, returning the resulting row. `None` fields
/// never overwrite existing values.
pub async fn upsert_project<C: ConnectionTrait>(
    db: &C,
    project_id: &str,
    name: Option<&str>,
    description: Option<&str>,
) -> Result<project::Model, DbErr> {
    let now = Utc::now();
    if let Some(existing) = get_project(db, project_id).await? {
        let mut row: project::ActiveModel = existing.into();
        if let Some(name) = name {
            row.name = Set(Some(name.to_string()));
        }
        if let Some(description) = description {
            row.description = Set(Some(description.to_string()));
        }
        row.updated_at = Set(now);
        return row.update(db).await;
    }

    let row = project::ActiveModel {
        id: Set(Uuid::new_v4()),
        project_id: Set(project_id.to_string()),
        name: Set(name.map(str::to_string)),
        description: Set(description.map(str::to_string)),
        created_at: Set(now),
        updated_at: Set(now),
    };
    row.insert(db).await
}

pub async fn get_project_stats<C: ConnectionTrait>(
    db: &C,
    project_id: &str,
) -> Result<ProjectStats, DbErr> {
    let trace_count = trace::Entity::find()
        .filter(trace::Column::ProjectId.eq(project_id))
        .count(db)
        .await?;

    let latest_trace_at = trace::Entity::find()
        .filter(trace::Column::ProjectId.eq(project_id))
        .order_by_desc(trace::Column::TraceTimestamp)
        .one(db)
        .await?
        .map(|t| t.trace_timestamp);

    let unique_users = trace::Entity::find()
        .filter(trace::Column::ProjectId.eq(project_id))
        .select_only()
        .column(trace::Column::UserId)
        .distinct()
        .count(db)
        .await?;

    let conversation_count = conversation_content::Entity::find()
        .filter(conversation_content::Column::ProjectId.eq(project_id))
        .count(db)
        .await?;

    Ok(ProjectStats {
        trace_count,
        conversation_count,
        unique_users,
        latest_trace_at,
    })
}

// ---------------------------------------------------------------------------
// Traces
// ---------------------------------------------------------------------------

/// Insert a single trace row. Duplicate `(project_id, trace_id)` is a silent
/// no-op; the stored `trace_timestamp` is never overwritten.
pub async fn insert_trace<C: ConnectionTrait>(
    db: &C,
    project_id: &str,
    user_id: &str,
    fields: TraceFields,
) -> Result<(), DbErr> {
    let row = trace::ActiveModel {
        id: Set(Uuid::new_v4()),
        project_id: Set(project_id.to_string()),
        user_id: Set(user_id.to_string()),
        trace_id: Set(fields.trace_id),
        version: Set(fields.version),
        trace_timestamp: Set(fields.trace_timestamp),
        vcs: Set(fields.vcs),
        vcs_revision: Set(fields.vcs_revision),
        tool: Set(fields.tool),
        files: Set(fields.files),
        metadata: Set(fields.metadata),
        trace_record: Set(fields.trace_record),
        created_at: Set(Utc::now()),
    };
    let insert = trace::Entity::insert(row).on_conflict(
        OnConflict::columns([trace::Column::ProjectId, trace::Column::TraceId])
            .do_nothing()
            .to_owned(),
    );
    match insert.exec(db).await {
        Ok(_) | Err(DbErr::RecordNotInserted) => Ok(()),
        Err(e) => Err(e),
    }
}

/// Paginated trace records (full documents, newest first) plus total count.
///
/// The filter set is a closed enumeration: project scope always, optional
/// since/until bounds on `trace_timestamp`. Nothing user-controlled reaches
/// the statement except as bound parameters.
pub async fn list_traces<C: ConnectionTrait>(
    db: &C,
    project_id: &str,
    since: Option<DateTime<Utc>>,
    until: Option<DateTime<Utc>>,
    limit: u64,
    offset: u64,
) -> Result<(Vec<Value>, u64), DbErr> {
    let mut query = trace::Entity::find().filter(trace::Column::ProjectId.eq(project_id));
    if let Some(since) = since {
        query = query.filter(trace::Column::TraceTimestamp.gte(since));
    }
    if let Some(until) = until {
        query = query.filter(trace::Column::TraceTimestamp.lte(until));
    }

    let total = query.clone().count(db).await?;
    let rows = query
        .order_by_desc(trace::Column::TraceTimestamp)
        .limit(limit)
        .offset(offset)
        .all(db)
        .await?;

    Ok((rows.into_iter().map(|r| r.trace_record).collect(), total))
}

pub async fn get_trace<C: ConnectionTrait>(
    db: &C,
    project_id: &str,
    trace_id: &str,
) -> Result<Option<trace::Model>, DbErr> {
    trace::Entity::find()
        .filter(trace::Column::ProjectId.eq(project_id))
        .filter(trace::Column::TraceId.eq(trace_id))
        .one(db)
        .await
}

/// Fetch the given traces, preserving the order of `trace_ids`.
pub async fn find_traces_by_ids<C: ConnectionTrait>(
    db: &C,
    project_id: &str,
    trace_ids: &[String],
) -> Result<Vec<trace::Model>, DbErr> {
    if trace_ids.is_empty() {
        return Ok(Vec::new());
    }
    let mut rows = trace::Entity::find()
        .filter(trace::Column::ProjectId.eq(project_id))
        .filter(trace::Column::TraceId.is_in(trace_ids.iter().map(String::as_str)))
        .all(db)
        .await?;
    let position = |id: &str| trace_ids.iter().position(|t| t == id);
    rows.sort_by_key(|r| position(&r.trace_id).unwrap_or(usize::MAX));
    Ok(rows)
}

/// Traces captured at the given VCS revision (exact match on the extracted
/// `vcs.revision` projection), newest first.
pub async fn find_traces_by_revision<C: ConnectionTrait>(
    db: &C,
    project_id: &str,
    revision: &str,
) -> Result<Vec<trace::Model>, DbErr> {
    trace::Entity::find()
        .filter(trace::Column::ProjectId.eq(project_id))
        .filter(trace::Column::VcsRevision.eq(revision))
        .order_by_desc(trace::Column::TraceTimestamp)
        .all(db)
        .await
}

/// Traces whose timestamp falls in `[since, until]`, newest first, capped at
/// [`TIME_WINDOW_ROW_CAP`] rows server-side.
pub async fn find_traces_in_time_window<C: ConnectionTrait>(
    db: &C,
    project_id: &str,
    since: DateTime<Utc>,
    until: DateTime<Utc>,
) -> Result<Vec<trace::Model>, DbErr> {
    trace::Entity::find()
        .filter(trace::Column::ProjectId.eq(project_id))
        .filter(trace::Column::TraceTimestamp.between(since, until))
        .order_by_desc(trace::Column::TraceTimestamp)
        .limit(TIME_WINDOW_ROW_CAP)
        .all(db)
        .await
}

// ---------------------------------------------------------------------------
// Conversation contents
// ---------------------------------------------------------------------------

/// Upsert conversation transcripts; `(project_id, url)` is the key and the
/// last write wins.
pub async fn upsert_conversation_content<C: ConnectionTrait>(
    db: &C,
    project_id: &str,
    user_id: &str,
    url: &str,
    content: &str,
) -> Result<(), DbErr> {
    let now = Utc::now();
    let row = conversation_content::ActiveModel {
        id: Set(Uuid::new_v4()),
        project_id: Set(project_id.to_string()),
        user_id: Set(user_id.to_string()),
        url: Set(url.to_string()),
        content: Set(content.to_string()),
        created_at: Set(now),
        updated_at: Set(now),
    };
    conversation_content::Entity::insert(row)
        .on_conflict(
            OnConflict::columns([
                conversation_content::Column::ProjectId,
                conversation_content::Column::Url,
            ])
            .update_columns([
                conversation_content::Column::Content,
                conversation_content::Column::UserId,
                conversation_content::Column::UpdatedAt,
            ])
            .to_owned(),
        )
        .exec(db)
        .await?;
    Ok(())
}

pub async fn get_conversation_content<C: ConnectionTrait>(
    db: &C,
    project_id: &str,
    url: &str,
) -> Result<Option<String>, DbErr> {
    Ok(conversation_content::Entity::find()
        .filter(conversation_content::Column::ProjectId.eq(project_id))
        .filter(conversation_content::Column::Url.eq(url))
        .one(db)
        .await?
        .map(|row| row.content))
}

// ---------------------------------------------------------------------------
// Commit links
// ---------------------------------------------------------------------------

/// Fields accepted for a commit-link upsert.
#[derive(Debug, Clone)]
pub struct CommitLinkFields {
    pub commit_sha: String,
    pub parent_sha: Option<String>,
    pub trace_ids: Vec<String>,
    pub files_changed: Option<Value>,
    pub committed_at: Option<DateTime<Utc>>,
    pub ledger: Option<Value>,
}

/// Upsert on `(project_id, commit_sha)`: overwrites parent_sha, trace_ids,
/// files_changed, committed_at, ledger, and user_id.
pub async fn upsert_commit_link<C: ConnectionTrait>(
    db: &C,
    project_id: &str,
    user_id: &str,
    fields: CommitLinkFields,
) -> Result<(), DbErr> {
    let now = Utc::now();
    let row = commit_link::ActiveModel {
        id: Set(Uuid::new_v4()),
        project_id: Set(project_id.to_string()),
        user_id: Set(user_id.to_string()),
        commit_sha: Set(fields.commit_sha),
        parent_sha: Set(fields.parent_sha),
        trace_ids: Set(Value::from(fields.trace_ids)),
        files_changed: Set(fields.files_changed),
        committed_at: Set(fields.committed_at),
        ledger: Set(fields.ledger),
        created_at: Set(now),
        updated_at: Set(now),
    };
    commit_link::Entity::insert(row)
        .on_conflict(
            OnConflict::columns([
                commit_link::Column::ProjectId,
                commit_link::Column::CommitSha,
            ])
            .update_columns([
                commit_link::Column::ParentSha,
                commit_link::Column::TraceIds,
                commit_link::Column::FilesChanged,
                commit_link::Column::CommittedAt,
                commit_link::Column::Ledger,
                commit_link::Column::UserId,
                commit_link::Column::UpdatedAt,
            ])
            .to_owned(),
        )
        .exec(db)
        .await?;
    Ok(())
}

pub async fn get_commit_link<C: ConnectionTrait>(
    db: &C,
    project_id: &str,
    commit_sha: &str,
) -> Result<Option<commit_link::Model>, DbErr> {
    commit_link::Entity::find()
        .filter(commit_link::Column::ProjectId.eq(project_id))
        .filter(commit_link::Column::CommitSha.eq(commit_sha))
        .one(db)
        .await
}

/// The ledger stored on a commit link, if any.
pub async fn get_ledger<C: ConnectionTrait>(
    db: &C,
    project_id: &str,
    commit_sha: &str,
) -> Result<Option<Value>, DbErr> {
    Ok(get_commit_link(db, project_id, commit_sha)
        .await?
        .and_then(|link| link.ledger))
}

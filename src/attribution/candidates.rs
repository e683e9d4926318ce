//! Candidate selection: which traces could plausibly have authored the
//! blamed line.
//!
//! Three strategies run in fixed order and results are unioned, deduplicated
//! by trace_id in first-seen order:
//!
//! 1. traces listed by the commit link for the blamed commit,
//! 2. traces captured at the blame parent revision,
//! 3. a timestamp-window fallback when fewer than 5 candidates accumulated.
//!
//! The database queries do not filter by file path (path matching must stay
//! lenient to bridge absolute vs relative paths), so after the union every
//! candidate that does not touch the blamed file is dropped. Commit links
//! include traces that touched *any* file in the commit (e.g. a trace that
//! modified only `.gitignore`), and those must never win attribution for
//! another file's lines.

use std::collections::HashSet;

use chrono::{DateTime, Duration, Utc};
use sea_orm::ConnectionTrait;
use serde_json::Value;

use crate::db::{self, entity::trace};
use crate::errors::ServiceError;
use crate::trace::{FileEntry, find_matching_file, parse_file_entries, parse_timestamp};

/// Union threshold below which the timestamp-window fallback kicks in.
const MIN_CANDIDATES: usize = 5;

/// A stored trace decoded for scoring: indexed projections with fallbacks to
/// the verbatim record where a column is empty.
#[derive(Debug, Clone)]
pub struct CandidateTrace {
    pub trace_id: String,
    pub trace_timestamp: Option<DateTime<Utc>>,
    pub vcs_revision: Option<String>,
    pub tool: Option<Value>,
    pub files: Vec<FileEntry>,
}

impl From<trace::Model> for CandidateTrace {
    fn from(model: trace::Model) -> Self {
        let record = &model.trace_record;

        let mut files = model
            .files
            .as_ref()
            .map(parse_file_entries)
            .unwrap_or_default();
        if files.is_empty() {
            if let Some(record_files) = record.get("files") {
                files = parse_file_entries(record_files);
            }
        }

        let vcs_revision = model.vcs_revision.clone().or_else(|| {
            record
                .get("vcs")
                .and_then(|v| v.get("revision"))
                .and_then(Value::as_str)
                .map(str::to_string)
        });

        let tool = model
            .tool
            .clone()
            .or_else(|| record.get("tool").cloned());

        Self {
            trace_id: model.trace_id,
            trace_timestamp: Some(model.trace_timestamp),
            vcs_revision,
            tool,
            files,
        }
    }
}

impl CandidateTrace {
    pub fn touches_file(&self, file_path: &str) -> bool {
        find_matching_file(&self.files, file_path).is_some()
    }
}

/// Gather candidate traces for one blame segment. An empty result means
/// "no attribution possible", not an error.
pub async fn find_candidates<C: ConnectionTrait>(
    db: &C,
    project_id: &str,
    file_path: &str,
    linked_trace_ids: &[String],
    blame_parent: Option<&str>,
    blame_timestamp: Option<&str>,
) -> Result<Vec<CandidateTrace>, ServiceError> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut candidates: Vec<CandidateTrace> = Vec::new();

    let mut add = |rows: Vec<trace::Model>, candidates: &mut Vec<CandidateTrace>| {
        for row in rows {
            if !row.trace_id.is_empty() && seen.insert(row.trace_id.clone()) {
                candidates.push(CandidateTrace::from(row));
            }
        }
    };

    // Path A: from the commit link. May include traces that touched other
    // files only; filtered below.
    if !linked_trace_ids.is_empty() {
        let rows = db::find_traces_by_ids(db, project_id, linked_trace_ids).await?;
        add(rows, &mut candidates);
    }

    // Path B: traces captured at the parent revision.
    if let Some(parent) = blame_parent {
        let rows = db::find_traces_by_revision(db, project_id, parent).await?;
        add(rows, &mut candidates);
    }

    // Path C: timestamp-window fallback.
    if candidates.len() < MIN_CANDIDATES {
        if let Some(raw) = blame_timestamp {
            match parse_timestamp(raw) {
                Some(ts) => {
                    let since = ts - Duration::hours(24);
                    let until = ts + Duration::hours(1);
                    let rows =
                        db::find_traces_in_time_window(db, project_id, since, until).await?;
                    add(rows, &mut candidates);
                }
                None => {
                    tracing::debug!("could not parse blame timestamp: {raw}");
                }
            }
        }
    }

    // Require that every candidate actually touches the blamed file.
    candidates.retain(|c| c.touches_file(file_path));
    Ok(candidates)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn model(trace_id: &str, files: Value) -> trace::Model {
        trace::Model {
            id: uuid::Uuid::new_v4(),
            project_id: "p".to_string(),
            user_id: "u".to_string(),
            trace_id: trace_id.to_string(),
            version: "1.0".to_string(),
            trace_timestamp: Utc::now(),
            vcs: None,
            vcs_revision: None,
            tool: None,
            files: Some(files),
            metadata: None,
            trace_record: json!({"id": trace_id}),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_candidate_from_files_column() {
        let candidate = CandidateTrace::from(model("T1", json!([{"path": "src/a.py"}])));
        assert!(candidate.touches_file("src/a.py"));
        assert!(!candidate.touches_file("src/b.py"));
    }

    #[test]
    fn test_candidate_falls_back_to_record() {
        let mut m = model("T1", json!([]));
        m.files = None;
        m.trace_record = json!({
            "id": "T1",
            "vcs": {"revision": "abc"},
            "tool": {"name": "claude-code"},
            "files": [{"path": "src/a.py"}]
        });
        let candidate = CandidateTrace::from(m);
        assert!(candidate.touches_file("src/a.py"));
        assert_eq!(candidate.vcs_revision.as_deref(), Some("abc"));
        assert_eq!(
            candidate.tool.as_ref().and_then(|t| t["name"].as_str()),
            Some("claude-code")
        );
    }

    #[test]
    fn test_lenient_path_touch() {
        let candidate =
            CandidateTrace::from(model("T1", json!([{"path": "vite.config.js"}])));
        assert!(candidate.touches_file("frontend/vite.config.js"));
    }
}

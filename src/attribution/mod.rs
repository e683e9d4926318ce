//! The attribution engine.
//!
//! Given git-blame data for a segment of a file (which commit introduced it,
//! the parent commit, a content hash, a timestamp), the engine scores
//! candidate traces and assigns a confidence tier expressing how certain it
//! is that the lines originated from an AI conversation.
//!
//! Tier definitions:
//!   1  Provably certain    (100%)   commit link + content hash + range
//!   2  Effectively certain (99.9%)  strong score without proven content
//!   3  Very high           (95%+)   e.g. commit link + parent revision
//!   4  High                (85%+)   revision match, range overlap, no hash
//!   5  Medium              (60-85%) file match, partial overlap
//!   6  Suggestive          (<60%)   same file, general time period
//!
//! When an authoritative ledger exists for the blamed commit, it supplies the
//! tier-1 answer directly and scoring is skipped. Attribution failures are
//! never errors: they surface as a result with a null tier.

pub mod candidates;
pub mod merge;
pub mod result;
pub mod scoring;

use sea_orm::ConnectionTrait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use candidates::CandidateTrace;
pub use merge::{BlameAttribution, merge_adjacent};
pub use result::AttributionResult;
pub use scoring::Signal;

use crate::db;
use crate::errors::ServiceError;
use crate::trace::{MatchedRange, line_number, paths_match};

/// One blame segment as supplied by the client. The service never infers
/// commit topology: callers provide the blame parent SHA themselves.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlameSegment {
    pub start_line: i64,
    pub end_line: i64,
    pub commit_sha: String,
    #[serde(default)]
    pub parent_sha: Option<String>,
    #[serde(default)]
    pub content_hash: Option<String>,
    /// ISO-8601 author date of the blamed commit.
    #[serde(default)]
    pub timestamp: Option<String>,
}

/// Attribute a single blame segment. The segment's `start_line` is the
/// representative line for range and hash checks.
pub async fn attribute_segment<C: ConnectionTrait>(
    db: &C,
    project_id: &str,
    file_path: &str,
    segment: &BlameSegment,
) -> Result<AttributionResult, ServiceError> {
    let commit_link = db::get_commit_link(db, project_id, &segment.commit_sha).await?;

    // Ledger short-circuit: the ledger is the authoritative mapping.
    if let Some(ledger) = commit_link.as_ref().and_then(|link| link.ledger.as_ref()) {
        let mut result =
            ledger_attribution(db, project_id, file_path, segment.start_line, ledger).await?;
        fetch_conversation_content(db, project_id, &mut result).await;
        return Ok(result);
    }

    let linked_trace_ids = commit_link
        .as_ref()
        .map(|link| link.trace_id_list())
        .unwrap_or_default();

    let candidates = candidates::find_candidates(
        db,
        project_id,
        file_path,
        &linked_trace_ids,
        segment.parent_sha.as_deref(),
        segment.timestamp.as_deref(),
    )
    .await?;
    if candidates.is_empty() {
        return Ok(AttributionResult::none());
    }

    let ctx = scoring::ScoreContext {
        file_path,
        line_number: segment.start_line,
        content_hash: segment.content_hash.as_deref(),
        blame_parent: segment.parent_sha.as_deref(),
        has_commit_link: commit_link.is_some(),
        linked_trace_ids: &linked_trace_ids,
    };

    // Strict > keeps the first-encountered candidate on ties, so the selector
    // strategy order doubles as the tie-break: commit-linked traces outrank
    // parent-revision traces, which outrank time-window traces.
    let mut best_score = 0u32;
    let mut best: Option<(usize, Vec<Signal>)> = None;
    for (index, candidate) in candidates.iter().enumerate() {
        let (score, signals) = scoring::score_trace(candidate, &ctx);
        if score > best_score {
            best_score = score;
            best = Some((index, signals));
        }
    }

    let Some((index, signals)) = best else {
        return Ok(AttributionResult::none());
    };
    if !scoring::evidence_gate(&signals) {
        return Ok(AttributionResult::none());
    }
    let Some(tier) = scoring::compute_tier(best_score, &signals) else {
        return Ok(AttributionResult::none());
    };

    let mut attribution = result::build_result(
        Some(tier),
        scoring::tier_confidence(Some(tier)),
        &candidates[index],
        file_path,
        segment.start_line,
        signals,
        &candidates,
    );
    fetch_conversation_content(db, project_id, &mut attribution).await;
    Ok(attribution)
}

/// Attribute every segment in order, then collapse adjacent equal results.
pub async fn attribute_file<C: ConnectionTrait>(
    db: &C,
    project_id: &str,
    file_path: &str,
    segments: &[BlameSegment],
) -> Result<Vec<BlameAttribution>, ServiceError> {
    let mut entries = Vec::with_capacity(segments.len());
    for segment in segments {
        let attribution = attribute_segment(db, project_id, file_path, segment).await?;
        entries.push(BlameAttribution {
            start_line: segment.start_line,
            end_line: segment.end_line,
            attribution,
        });
    }
    Ok(merge_adjacent(entries))
}

/// Look up the conversation transcript for the result's URL. Failures are
/// swallowed: the attribution matters more than its enrichment.
async fn fetch_conversation_content<C: ConnectionTrait>(
    db: &C,
    project_id: &str,
    result: &mut AttributionResult,
) {
    let Some(url) = result.conversation_url.clone() else {
        return;
    };
    match db::get_conversation_content(db, project_id, &url).await {
        Ok(content) => result.conversation_content = content,
        Err(e) => {
            tracing::warn!("conversation content lookup failed for {url}: {e}");
        }
    }
}

/// The ledger rows the engine understands: an array of objects carrying
/// optional `path`, `start_line`/`end_line`, and identifier fields. The
/// format is otherwise opaque.
fn ledger_rows(ledger: &Value) -> &[Value] {
    let rows = match ledger {
        Value::Array(rows) => Some(rows),
        Value::Object(map) => map
            .get("entries")
            .or_else(|| map.get("attributions"))
            .and_then(Value::as_array),
        _ => None,
    };
    rows.map(Vec::as_slice).unwrap_or(&[])
}

fn ledger_row_covers(row: &Value, file_path: &str, line: i64) -> bool {
    if let Some(path) = row.get("path").and_then(Value::as_str) {
        if !paths_match(path, file_path) {
            return false;
        }
    }
    let start = line_number(row.get("start_line"));
    let end = line_number(row.get("end_line"));
    match (start, end) {
        (Some(start), Some(end)) => start <= line && line <= end,
        // No range info: the row covers the whole commit.
        _ => true,
    }
}

/// Produce the tier-1 attribution from an authoritative ledger. When the
/// ledger exposes a trace identifier for the blamed line, the stored trace
/// enriches the result; when it doesn't, the attribution still stands on the
/// ledger's authority alone.
async fn ledger_attribution<C: ConnectionTrait>(
    db: &C,
    project_id: &str,
    file_path: &str,
    line: i64,
    ledger: &Value,
) -> Result<AttributionResult, ServiceError> {
    let row = ledger_rows(ledger)
        .iter()
        .find(|row| ledger_row_covers(row, file_path, line));

    let mut result = AttributionResult::none();
    result.tier = Some(1);
    result.confidence = 1.0;
    result.signals = vec![Signal::Ledger];
    result.contributor_type = Some(result::UNKNOWN_CONTRIBUTOR.to_string());

    let Some(row) = row else {
        return Ok(result);
    };

    result.trace_id = row
        .get("trace_id")
        .and_then(Value::as_str)
        .map(str::to_string);
    result.conversation_url = row
        .get("conversation_url")
        .and_then(Value::as_str)
        .map(str::to_string);
    result.model_id = row
        .get("model_id")
        .and_then(Value::as_str)
        .map(str::to_string);
    if let Some(kind) = row.get("contributor_type").and_then(Value::as_str) {
        result.contributor_type = Some(kind.to_string());
    }
    if let (Some(start), Some(end)) = (
        line_number(row.get("start_line")),
        line_number(row.get("end_line")),
    ) {
        result.matched_range = Some(MatchedRange {
            start_line: start,
            end_line: end,
        });
    }

    // Enrich from the stored trace when the ledger names one.
    if let Some(trace_id) = result.trace_id.clone() {
        if result.model_id.is_none() || result.conversation_url.is_none() || result.tool.is_none()
        {
            let rows = db::find_traces_by_ids(db, project_id, &[trace_id]).await?;
            if let Some(model) = rows.into_iter().next() {
                let candidate = CandidateTrace::from(model);
                let meta = result::extract_meta(&candidate, file_path);
                if result.model_id.is_none() {
                    result.model_id = meta.model_id;
                }
                if result.conversation_url.is_none() {
                    result.conversation_url = meta.conversation_url;
                }
                if result.contributor_type.as_deref() == Some(result::UNKNOWN_CONTRIBUTOR) {
                    if let Some(kind) = meta.contributor_type {
                        result.contributor_type = Some(kind);
                    }
                }
                if result.tool.is_none() {
                    result.tool = candidate.tool;
                }
            }
        }
    }

    Ok(result)
}

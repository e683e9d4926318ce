//! Trace document model.
//!
//! A trace is a structured record of an AI-assisted edit event: the tool and
//! model involved, conversation links, affected file ranges, and content
//! hashes. Traces arrive as nested JSON with several optional places to carry
//! ranges and hashes; this module models them as typed records with a merged
//! range-source view while the full original document is preserved verbatim
//! for replay.
//!
//! Parsing is deliberately forgiving: line numbers may be JSON numbers or
//! numeric strings, malformed array entries are skipped, and an entry without
//! range information is treated as covering every line of its file.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::ServiceError;

/// How far outside a recorded range a line may fall and still count as
/// overlapping.
pub const OVERLAP_MARGIN: i64 = 5;

/// Minimum SHA prefix length considered meaningful for revision matching.
const MIN_SHA_PREFIX: usize = 7;

/// Deserialize a JSON array, silently dropping entries that do not fit `T`.
/// A non-array value yields an empty vec.
fn lenient_entries<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: serde::Deserializer<'de>,
    T: serde::de::DeserializeOwned,
{
    let value = Value::deserialize(deserializer)?;
    let Value::Array(items) = value else {
        return Ok(Vec::new());
    };
    Ok(items
        .into_iter()
        .filter_map(|item| serde_json::from_value(item).ok())
        .collect())
}

/// Interpret a loosely typed line-number value. Accepts integers, floats
/// (truncated), and numeric strings; anything else is treated as absent.
pub fn line_number(value: Option<&Value>) -> Option<i64> {
    match value? {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Who contributed the conversation content.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Contributor {
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub model_id: Option<String>,
}

/// A line range with an optional content hash.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TraceRange {
    #[serde(default)]
    pub start_line: Option<Value>,
    #[serde(default)]
    pub end_line: Option<Value>,
    #[serde(default)]
    pub content_hash: Option<String>,
}

impl TraceRange {
    pub fn bounds(&self) -> Option<(i64, i64)> {
        let start = line_number(self.start_line.as_ref())?;
        let end = line_number(self.end_line.as_ref())?;
        Some((start, end))
    }

    /// An entry with no usable range is assumed to cover every line.
    pub fn contains(&self, line: i64) -> bool {
        match self.bounds() {
            Some((start, end)) => start <= line && line <= end,
            None => true,
        }
    }
}

/// An AI conversation that touched the file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Conversation {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub contributor: Option<Contributor>,
    #[serde(default)]
    pub start_line: Option<Value>,
    #[serde(default)]
    pub end_line: Option<Value>,
    #[serde(default)]
    pub content_hash: Option<String>,
    #[serde(default, deserialize_with = "lenient_entries")]
    pub ranges: Vec<TraceRange>,
}

impl Conversation {
    fn own_range(&self) -> TraceRange {
        TraceRange {
            start_line: self.start_line.clone(),
            end_line: self.end_line.clone(),
            content_hash: self.content_hash.clone(),
        }
    }
}

/// A recorded edit within the file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChangeEntry {
    #[serde(default)]
    pub start_line: Option<Value>,
    #[serde(default)]
    pub end_line: Option<Value>,
    #[serde(default)]
    pub content_hash: Option<String>,
}

impl ChangeEntry {
    fn as_range(&self) -> TraceRange {
        TraceRange {
            start_line: self.start_line.clone(),
            end_line: self.end_line.clone(),
            content_hash: self.content_hash.clone(),
        }
    }
}

/// Result of checking a line against a file entry's ranges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeCheck {
    /// The line is strictly inside a recorded range.
    Exact,
    /// The line is within [`OVERLAP_MARGIN`] lines of a range boundary.
    Overlap,
}

/// A matched range reported back to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchedRange {
    pub start_line: i64,
    pub end_line: i64,
}

/// One entry of a trace's `files[]` array.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FileEntry {
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub start_line: Option<Value>,
    #[serde(default)]
    pub end_line: Option<Value>,
    #[serde(default)]
    pub content_hash: Option<String>,
    #[serde(default, deserialize_with = "lenient_entries")]
    pub conversations: Vec<Conversation>,
    #[serde(default, deserialize_with = "lenient_entries")]
    pub changes: Vec<ChangeEntry>,
}

impl FileEntry {
    /// The merged range-source view: file-level bounds, conversation bounds,
    /// each conversation's `ranges[]`, and change bounds, in that order.
    /// Entries with non-integer bounds are skipped.
    pub fn collected_ranges(&self) -> Vec<(i64, i64)> {
        let mut ranges = Vec::new();

        let file_level = TraceRange {
            start_line: self.start_line.clone(),
            end_line: self.end_line.clone(),
            content_hash: None,
        };
        if let Some(bounds) = file_level.bounds() {
            ranges.push(bounds);
        }

        for conv in &self.conversations {
            if let Some(bounds) = conv.own_range().bounds() {
                ranges.push(bounds);
            }
            for r in &conv.ranges {
                if let Some(bounds) = r.bounds() {
                    ranges.push(bounds);
                }
            }
        }

        for change in &self.changes {
            if let Some(bounds) = change.as_range().bounds() {
                ranges.push(bounds);
            }
        }

        ranges
    }

    /// Whether `line` falls inside ([`RangeCheck::Exact`]) or near
    /// ([`RangeCheck::Overlap`]) any recorded range.
    pub fn range_check(&self, line: i64) -> Option<RangeCheck> {
        for (start, end) in self.collected_ranges() {
            if start <= line && line <= end {
                return Some(RangeCheck::Exact);
            }
            if (start - OVERLAP_MARGIN) <= line && line <= (end + OVERLAP_MARGIN) {
                return Some(RangeCheck::Overlap);
            }
        }
        None
    }

    /// The range that best covers `line`: the tightest containing range, or
    /// failing that the nearest by endpoint distance.
    pub fn best_range(&self, line: i64) -> Option<MatchedRange> {
        let ranges = self.collected_ranges();
        let mut best: Option<(i64, i64)> = None;
        let mut best_distance = i64::MAX;

        for (start, end) in ranges {
            if start <= line && line <= end {
                let span = end - start;
                let better = match best {
                    Some((bs, be)) if best_distance == 0 => span < be - bs,
                    _ => true,
                };
                if better {
                    best = Some((start, end));
                    best_distance = 0;
                }
            } else if best_distance > 0 {
                let dist = (line - start).abs().min((line - end).abs());
                if dist < best_distance {
                    best = Some((start, end));
                    best_distance = dist;
                }
            }
        }

        best.map(|(start_line, end_line)| MatchedRange {
            start_line,
            end_line,
        })
    }

    /// Resolve the content hash that covers `line`, searching most-specific
    /// first: conversation ranges, conversation-level hashes, change-level
    /// hashes, then the unconditional file-level fallback.
    pub fn content_hash_for_line(&self, line: i64) -> Option<&str> {
        for conv in &self.conversations {
            for r in &conv.ranges {
                if let Some(hash) = r.content_hash.as_deref() {
                    if !hash.is_empty() && r.contains(line) {
                        return Some(hash);
                    }
                }
            }
        }

        for conv in &self.conversations {
            if let Some(hash) = conv.content_hash.as_deref() {
                if !hash.is_empty() && conv.own_range().contains(line) {
                    return Some(hash);
                }
            }
        }

        for change in &self.changes {
            if let Some(hash) = change.content_hash.as_deref() {
                if !hash.is_empty() && change.as_range().contains(line) {
                    return Some(hash);
                }
            }
        }

        self.content_hash.as_deref()
    }

    pub fn matches_path(&self, file_path: &str) -> bool {
        paths_match(&self.path, file_path)
    }
}

/// Parse a `files[]` JSON value into typed entries, skipping malformed items.
pub fn parse_file_entries(value: &Value) -> Vec<FileEntry> {
    let Value::Array(items) = value else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| serde_json::from_value(item.clone()).ok())
        .collect()
}

/// Find the file entry matching `file_path`, first match wins.
pub fn find_matching_file<'a>(files: &'a [FileEntry], file_path: &str) -> Option<&'a FileEntry> {
    files.iter().find(|f| f.matches_path(file_path))
}

/// Lenient path equality: exact match, or one path is a suffix of the other.
/// Bridges absolute vs project-relative paths (e.g. trace `vite.config.js`
/// against blame `frontend/vite.config.js`). The scorer compensates for the
/// permissiveness with stronger signals.
pub fn paths_match(a: &str, b: &str) -> bool {
    if a.is_empty() || b.is_empty() {
        return false;
    }
    a == b || a.ends_with(b) || b.ends_with(a)
}

/// Compare two content hashes on the shorter prefix length, stripping an
/// optional `sha256:` prefix and ignoring case. Accommodates callers that
/// truncate hashes to 8 or 16 hex characters. An empty hash never matches.
pub fn hashes_match(hash_a: &str, hash_b: &str) -> bool {
    let a = hash_a.strip_prefix("sha256:").unwrap_or(hash_a).to_lowercase();
    let b = hash_b.strip_prefix("sha256:").unwrap_or(hash_b).to_lowercase();

    let min_len = a.len().min(b.len());
    if min_len == 0 {
        return false;
    }
    a.as_bytes()[..min_len] == b.as_bytes()[..min_len]
}

/// Whether one revision SHA is a prefix of the other, for traces that stored
/// abbreviated SHAs. Prefixes shorter than 7 characters are too ambiguous.
pub fn sha_prefix_match(sha_a: &str, sha_b: &str) -> bool {
    let min_len = sha_a.len().min(sha_b.len());
    if min_len < MIN_SHA_PREFIX {
        return false;
    }
    sha_a.as_bytes()[..min_len] == sha_b.as_bytes()[..min_len]
}

/// Parse an ISO-8601 timestamp, with or without a timezone offset. Naive
/// timestamps are taken as UTC.
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Some(ts.with_timezone(&Utc));
    }
    let naive = NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S%.f"))
        .ok()?;
    Some(naive.and_utc())
}

/// Key fields extracted from a trace document at ingest time: the indexed
/// projections plus the full record preserved verbatim.
#[derive(Debug, Clone)]
pub struct TraceFields {
    pub trace_id: String,
    pub version: String,
    pub trace_timestamp: DateTime<Utc>,
    pub vcs: Option<Value>,
    /// `vcs.revision`, extracted so the parent-revision candidate lookup is a
    /// plain indexed equality query.
    pub vcs_revision: Option<String>,
    pub tool: Option<Value>,
    pub files: Option<Value>,
    pub metadata: Option<Value>,
    pub trace_record: Value,
}

/// Extract the indexed projections from a raw trace document.
///
/// Requires `trace.id` and a parseable `trace.timestamp`; everything else is
/// optional. The full document is kept as-is in `trace_record`.
pub fn extract_fields(trace: &Value) -> Result<TraceFields, ServiceError> {
    let trace_id = trace
        .get("id")
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| ServiceError::missing_field("trace.id"))?;

    let raw_timestamp = trace
        .get("timestamp")
        .and_then(Value::as_str)
        .ok_or_else(|| ServiceError::missing_field("trace.timestamp"))?;
    let trace_timestamp = parse_timestamp(raw_timestamp).ok_or_else(|| {
        ServiceError::Validation(format!("Unparseable trace.timestamp: {raw_timestamp}"))
    })?;

    let version = trace
        .get("version")
        .and_then(Value::as_str)
        .unwrap_or("1.0")
        .to_string();

    let vcs = trace.get("vcs").filter(|v| !v.is_null()).cloned();
    let vcs_revision = vcs
        .as_ref()
        .and_then(|v| v.get("revision"))
        .and_then(Value::as_str)
        .filter(|r| !r.is_empty())
        .map(str::to_string);

    Ok(TraceFields {
        trace_id: trace_id.to_string(),
        version,
        trace_timestamp,
        vcs,
        vcs_revision,
        tool: trace.get("tool").filter(|v| !v.is_null()).cloned(),
        files: trace.get("files").filter(|v| !v.is_null()).cloned(),
        metadata: trace.get("metadata").filter(|v| !v.is_null()).cloned(),
        trace_record: trace.clone(),
    })
}

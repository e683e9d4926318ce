//! Attribution results and the result builder.
//!
//! Once a winning trace is chosen, the builder enriches it with conversation
//! metadata. The walk order matters: the matched file entry first, then the
//! trace's other file entries, then the other candidate traces, stopping as
//! soon as both `model_id` and `conversation_url` are populated.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::trace::{MatchedRange, find_matching_file};

use super::candidates::CandidateTrace;
use super::scoring::Signal;

/// Contributor type reported when no conversation names one.
pub const UNKNOWN_CONTRIBUTOR: &str = "unknown";

/// The answer for one blame segment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttributionResult {
    /// Attribution strength, 1 (strongest) to 6, or null when no structural
    /// evidence fired.
    pub tier: Option<u8>,
    pub confidence: f64,
    pub trace_id: Option<String>,
    pub conversation_url: Option<String>,
    pub conversation_content: Option<String>,
    pub contributor_type: Option<String>,
    pub model_id: Option<String>,
    pub tool: Option<Value>,
    pub matched_range: Option<MatchedRange>,
    pub content_hash_match: bool,
    pub commit_link_match: bool,
    pub signals: Vec<Signal>,
}

impl AttributionResult {
    /// A blank result: no tier, no trace, zero confidence.
    pub fn none() -> Self {
        Self {
            tier: None,
            confidence: 0.0,
            trace_id: None,
            conversation_url: None,
            conversation_content: None,
            contributor_type: None,
            model_id: None,
            tool: None,
            matched_range: None,
            content_hash_match: false,
            commit_link_match: false,
            signals: Vec::new(),
        }
    }
}

/// Conversation metadata pulled out of a trace's file entries.
#[derive(Debug, Default, Clone)]
pub struct ConversationMeta {
    pub model_id: Option<String>,
    pub conversation_url: Option<String>,
    pub contributor_type: Option<String>,
}

impl ConversationMeta {
    fn complete(&self) -> bool {
        self.model_id.is_some() && self.conversation_url.is_some()
    }

    fn absorb_entry(&mut self, entry: &crate::trace::FileEntry) {
        for conv in &entry.conversations {
            if let Some(contributor) = &conv.contributor {
                if self.contributor_type.is_none() {
                    self.contributor_type = contributor
                        .kind
                        .as_ref()
                        .filter(|k| !k.is_empty())
                        .cloned();
                }
                if self.model_id.is_none() {
                    self.model_id = contributor
                        .model_id
                        .as_ref()
                        .filter(|m| !m.is_empty())
                        .cloned();
                }
            }
            if self.conversation_url.is_none() {
                self.conversation_url = conv.url.as_ref().filter(|u| !u.is_empty()).cloned();
            }
            if self.complete() {
                return;
            }
        }
    }
}

/// Extract conversation metadata from a whole trace, preferring the file
/// entry that matches `file_path`.
pub fn extract_meta(trace: &CandidateTrace, file_path: &str) -> ConversationMeta {
    let mut meta = ConversationMeta::default();
    let matched = find_matching_file(&trace.files, file_path);

    if let Some(entry) = matched {
        meta.absorb_entry(entry);
    }
    if !meta.complete() {
        for entry in &trace.files {
            if matched.is_some_and(|m| std::ptr::eq(m, entry)) {
                continue;
            }
            meta.absorb_entry(entry);
            if meta.complete() {
                break;
            }
        }
    }
    meta
}

/// Build a full result from the winning trace and signal set. The
/// conversation transcript is looked up separately by the caller; it is
/// enrichment, not evidence.
pub fn build_result(
    tier: Option<u8>,
    confidence: f64,
    trace: &CandidateTrace,
    file_path: &str,
    line_number: i64,
    signals: Vec<Signal>,
    other_candidates: &[CandidateTrace],
) -> AttributionResult {
    let matched_range = find_matching_file(&trace.files, file_path)
        .and_then(|entry| entry.best_range(line_number));

    let mut meta = extract_meta(trace, file_path);

    // Enrich from the other candidates if still missing.
    if !meta.complete() {
        for other in other_candidates {
            if other.trace_id == trace.trace_id {
                continue;
            }
            let fallback = extract_meta(other, file_path);
            if meta.model_id.is_none() {
                meta.model_id = fallback.model_id;
            }
            if meta.conversation_url.is_none() {
                meta.conversation_url = fallback.conversation_url;
            }
            if meta.contributor_type.is_none() {
                meta.contributor_type = fallback.contributor_type;
            }
            if meta.complete() {
                break;
            }
        }
    }

    AttributionResult {
        tier,
        confidence,
        trace_id: Some(trace.trace_id.clone()),
        conversation_url: meta.conversation_url,
        conversation_content: None,
        contributor_type: Some(
            meta.contributor_type
                .unwrap_or_else(|| UNKNOWN_CONTRIBUTOR.to_string()),
        ),
        model_id: meta.model_id,
        tool: trace.tool.clone(),
        matched_range,
        content_hash_match: signals.contains(&Signal::ContentHash),
        commit_link_match: signals.contains(&Signal::CommitLink),
        signals,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::trace::parse_file_entries;

    use super::*;

    fn candidate(trace_id: &str, files: Value) -> CandidateTrace {
        CandidateTrace {
            trace_id: trace_id.to_string(),
            trace_timestamp: None,
            vcs_revision: None,
            tool: Some(json!({"name": "claude-code"})),
            files: parse_file_entries(&files),
        }
    }

    #[test]
    fn test_meta_from_matched_entry() {
        let trace = candidate(
            "T1",
            json!([{
                "path": "src/a.py",
                "conversations": [{
                    "url": "u1",
                    "contributor": {"type": "ai", "model_id": "m1"}
                }]
            }]),
        );
        let meta = extract_meta(&trace, "src/a.py");
        assert_eq!(meta.model_id.as_deref(), Some("m1"));
        assert_eq!(meta.conversation_url.as_deref(), Some("u1"));
        assert_eq!(meta.contributor_type.as_deref(), Some("ai"));
    }

    #[test]
    fn test_meta_falls_back_to_other_entries() {
        let trace = candidate(
            "T1",
            json!([
                {"path": "src/a.py", "conversations": [{"url": "u1"}]},
                {"path": "src/b.py", "conversations": [{
                    "url": "u2",
                    "contributor": {"model_id": "m2"}
                }]}
            ]),
        );
        let meta = extract_meta(&trace, "src/a.py");
        // URL from the matched entry, model from the sibling.
        assert_eq!(meta.conversation_url.as_deref(), Some("u1"));
        assert_eq!(meta.model_id.as_deref(), Some("m2"));
    }

    #[test]
    fn test_build_result_enriches_from_other_candidates() {
        let winner = candidate("T1", json!([{"path": "src/a.py"}]));
        let other = candidate(
            "T2",
            json!([{
                "path": "src/a.py",
                "conversations": [{
                    "url": "u2",
                    "contributor": {"type": "ai", "model_id": "m2"}
                }]
            }]),
        );
        let result = build_result(
            Some(3),
            0.95,
            &winner,
            "src/a.py",
            12,
            vec![Signal::CommitLink, Signal::RevisionParent],
            &[winner.clone(), other],
        );
        assert_eq!(result.trace_id.as_deref(), Some("T1"));
        assert_eq!(result.model_id.as_deref(), Some("m2"));
        assert_eq!(result.conversation_url.as_deref(), Some("u2"));
        assert_eq!(result.contributor_type.as_deref(), Some("ai"));
        assert!(result.commit_link_match);
        assert!(!result.content_hash_match);
    }

    #[test]
    fn test_build_result_matched_range() {
        let winner = candidate(
            "T1",
            json!([{
                "path": "src/a.py",
                "conversations": [{"ranges": [
                    {"start_line": 10, "end_line": 20},
                    {"start_line": 12, "end_line": 14}
                ]}]
            }]),
        );
        let result = build_result(Some(2), 0.999, &winner, "src/a.py", 13, vec![], &[]);
        assert_eq!(
            result.matched_range,
            Some(MatchedRange { start_line: 12, end_line: 14 })
        );
    }

    #[test]
    fn test_contributor_defaults_to_unknown() {
        let winner = candidate("T1", json!([{"path": "src/a.py"}]));
        let result = build_result(Some(6), 0.4, &winner, "src/a.py", 1, vec![], &[]);
        assert_eq!(result.contributor_type.as_deref(), Some("unknown"));
    }
}

//! Candidate scoring and tier mapping.
//!
//! For a candidate trace and blame context the scorer produces a weighted
//! signal score and the list of signals that fired. Signals are independent;
//! the same trace may accrue several. The tier mapper converts the score into
//! a confidence tier (1 strongest .. 6 weakest), requiring at least one
//! structural signal: a timestamp alone would false-positive on every manual
//! edit made within the same day as any AI trace.

use serde::{Deserialize, Serialize};

use crate::trace::{RangeCheck, find_matching_file, hashes_match, sha_prefix_match};

use super::candidates::CandidateTrace;

/// A named piece of evidence tying a trace to a blamed line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Signal {
    /// Trace ID appears in the commit link's trace_ids.
    CommitLink,
    /// Content hash of the blamed lines matches a hash recorded in the trace.
    ContentHash,
    /// Trace `vcs.revision` equals the blame parent commit.
    RevisionParent,
    /// Reserved: trace revision is an ancestor of the blame commit. Never
    /// emitted; the service has no commit-graph oracle.
    RevisionAncestor,
    /// Blamed line falls within a recorded range.
    RangeMatch,
    /// Blamed line is near (but not inside) a recorded range.
    RangeOverlap,
    /// Trace carries a plausible timestamp. Weak liveness signal.
    TimestampMatch,
    /// Attribution came from an authoritative per-commit ledger.
    Ledger,
}

impl Signal {
    pub fn weight(self) -> u32 {
        match self {
            Signal::CommitLink => 40,
            Signal::ContentHash => 30,
            Signal::RevisionParent => 15,
            Signal::RevisionAncestor => 8,
            Signal::RangeMatch => 10,
            Signal::RangeOverlap => 5,
            Signal::TimestampMatch => 5,
            Signal::Ledger => 0,
        }
    }

    /// Whether the signal is structural evidence. Timestamp alone never
    /// yields a tier.
    pub fn is_structural(self) -> bool {
        !matches!(self, Signal::TimestampMatch)
    }
}

/// Blame context shared by every candidate scored for one segment.
#[derive(Debug, Clone, Copy)]
pub struct ScoreContext<'a> {
    pub file_path: &'a str,
    pub line_number: i64,
    pub content_hash: Option<&'a str>,
    pub blame_parent: Option<&'a str>,
    pub has_commit_link: bool,
    pub linked_trace_ids: &'a [String],
}

/// Score how well a candidate trace matches the blamed line.
pub fn score_trace(trace: &CandidateTrace, ctx: &ScoreContext<'_>) -> (u32, Vec<Signal>) {
    let mut score = 0;
    let mut signals = Vec::new();
    let mut fire = |signal: Signal| {
        score += signal.weight();
        signals.push(signal);
    };

    if ctx.has_commit_link && ctx.linked_trace_ids.iter().any(|id| id == &trace.trace_id) {
        fire(Signal::CommitLink);
    }

    if let (Some(revision), Some(parent)) = (trace.vcs_revision.as_deref(), ctx.blame_parent) {
        if revision == parent || sha_prefix_match(revision, parent) {
            fire(Signal::RevisionParent);
        }
    }

    if let Some(matched) = find_matching_file(&trace.files, ctx.file_path) {
        match matched.range_check(ctx.line_number) {
            Some(RangeCheck::Exact) => fire(Signal::RangeMatch),
            Some(RangeCheck::Overlap) => fire(Signal::RangeOverlap),
            None => {}
        }

        if let Some(blame_hash) = ctx.content_hash {
            if let Some(trace_hash) = matched.content_hash_for_line(ctx.line_number) {
                if hashes_match(blame_hash, trace_hash) {
                    fire(Signal::ContentHash);
                }
            }
        }
    }

    if trace.trace_timestamp.is_some() && ctx.blame_parent.is_some() {
        fire(Signal::TimestampMatch);
    }

    (score, signals)
}

/// Map a score and signal list to a confidence tier, or `None` when the
/// evidence is too weak. First matching row wins.
pub fn compute_tier(score: u32, signals: &[Signal]) -> Option<u8> {
    if score == 0 {
        return None;
    }
    if !signals.iter().any(|s| s.is_structural()) {
        return None;
    }

    // Tier 1 requires both commit_link AND content_hash.
    if score >= 95
        && signals.contains(&Signal::CommitLink)
        && signals.contains(&Signal::ContentHash)
    {
        return Some(1);
    }
    if score >= 80 {
        return Some(2);
    }
    if score >= 60 {
        return Some(3);
    }
    if score >= 45 {
        return Some(4);
    }
    if score >= 25 {
        return Some(5);
    }
    Some(6)
}

/// Representative confidence for a tier.
pub fn tier_confidence(tier: Option<u8>) -> f64 {
    match tier {
        Some(1) => 1.0,
        Some(2) => 0.999,
        Some(3) => 0.95,
        Some(4) => 0.85,
        Some(5) => 0.70,
        Some(6) => 0.40,
        _ => 0.0,
    }
}

/// Post-scoring check: require positional or dual evidence before emitting a
/// non-null attribution. A trace that merely touched the file in the same
/// commit, with nothing placing it at the blamed line, is not attributed.
pub fn evidence_gate(signals: &[Signal]) -> bool {
    let has = |s: Signal| signals.contains(&s);
    let range_evidence = has(Signal::RangeMatch) || has(Signal::RangeOverlap);
    let strong_evidence = has(Signal::CommitLink) && has(Signal::ContentHash);
    let commit_and_revision = has(Signal::CommitLink) && has(Signal::RevisionParent);
    range_evidence || strong_evidence || commit_and_revision
}

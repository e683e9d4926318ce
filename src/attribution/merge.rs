//! Collapse adjacent blame output entries with identical attribution.

use serde::{Deserialize, Serialize};

use super::result::AttributionResult;

/// One entry of the blame response: a line span plus its attribution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlameAttribution {
    pub start_line: i64,
    pub end_line: i64,
    #[serde(flatten)]
    pub attribution: AttributionResult,
}

/// Merge line-adjacent entries that share `(trace_id, tier)` in a single
/// left-to-right pass. The merged entry keeps every other field from the
/// earlier entry; order is preserved. Null tiers and null trace_ids collapse
/// together under the same rule.
pub fn merge_adjacent(entries: Vec<BlameAttribution>) -> Vec<BlameAttribution> {
    let mut merged: Vec<BlameAttribution> = Vec::with_capacity(entries.len());

    for next in entries {
        if let Some(prev) = merged.last_mut() {
            let adjacent = prev.end_line + 1 >= next.start_line;
            let same_trace = prev.attribution.trace_id == next.attribution.trace_id;
            let same_tier = prev.attribution.tier == next.attribution.tier;
            if adjacent && same_trace && same_tier {
                prev.end_line = next.end_line;
                continue;
            }
        }
        merged.push(next);
    }

    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(start: i64, end: i64, trace_id: Option<&str>, tier: Option<u8>) -> BlameAttribution {
        let mut attribution = AttributionResult::none();
        attribution.trace_id = trace_id.map(str::to_string);
        attribution.tier = tier;
        BlameAttribution {
            start_line: start,
            end_line: end,
            attribution,
        }
    }

    #[test]
    fn test_adjacent_same_attribution_merges() {
        let out = merge_adjacent(vec![
            entry(1, 10, Some("T1"), Some(2)),
            entry(11, 20, Some("T1"), Some(2)),
        ]);
        assert_eq!(out.len(), 1);
        assert_eq!((out[0].start_line, out[0].end_line), (1, 20));
    }

    #[test]
    fn test_different_tier_stays_split() {
        let out = merge_adjacent(vec![
            entry(1, 10, Some("T1"), Some(2)),
            entry(11, 20, Some("T1"), Some(3)),
        ]);
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn test_different_trace_stays_split() {
        let out = merge_adjacent(vec![
            entry(1, 10, Some("T1"), Some(2)),
            entry(11, 20, Some("T2"), Some(2)),
        ]);
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn test_gap_stays_split() {
        let out = merge_adjacent(vec![
            entry(1, 10, Some("T1"), Some(2)),
            entry(15, 20, Some("T1"), Some(2)),
        ]);
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn test_nulls_collapse_together() {
        let out = merge_adjacent(vec![
            entry(1, 10, None, None),
            entry(11, 20, None, None),
            entry(21, 30, None, None),
        ]);
        assert_eq!(out.len(), 1);
        assert_eq!((out[0].start_line, out[0].end_line), (1, 30));
    }

    #[test]
    fn test_merge_chains_left_to_right() {
        let out = merge_adjacent(vec![
            entry(1, 10, Some("T1"), Some(2)),
            entry(11, 20, Some("T1"), Some(2)),
            entry(21, 30, Some("T1"), Some(2)),
            entry(31, 40, Some("T2"), Some(2)),
        ]);
        assert_eq!(out.len(), 2);
        assert_eq!((out[0].start_line, out[0].end_line), (1, 30));
        assert_eq!((out[1].start_line, out[1].end_line), (31, 40));
    }

    #[test]
    fn test_no_adjacent_pair_shares_key_after_merge() {
        let out = merge_adjacent(vec![
            entry(1, 10, Some("T1"), Some(2)),
            entry(11, 20, Some("T1"), Some(2)),
            entry(21, 30, Some("T2"), Some(2)),
            entry(31, 40, Some("T2"), Some(2)),
        ]);
        for pair in out.windows(2) {
            let line_adjacent = pair[0].end_line + 1 >= pair[1].start_line;
            let same_key = pair[0].attribution.trace_id == pair[1].attribution.trace_id
                && pair[0].attribution.tier == pair[1].attribution.tier;
            assert!(!(line_adjacent && same_key));
        }
    }
}

//! The cross-profile correlator (SPEC_FULL.md §4.6).
//!
//! Ported from `cmd/diff.go`'s `prepareCorrelationData`/`correlateMetric` in
//! original_source, preserving the exact recursive `minDepth`-cursor
//! algorithm: the baseline's pre-order traversal fixes the reportable row
//! order, and each later profile is walked in pre-order with a cursor that
//! never retreats, so correlation only ever matches rows at or after an
//! ancestor's own match.

use crate::tree::{CallMetrics, Profile};

/// One function position in the baseline, with a slot per compared
/// profile. Index 0 is always the baseline entry.
#[derive(Debug)]
pub struct CorrelationRow<'a> {
    pub fn_name: String,
    pub depth: usize,
    pub has_children: bool,
    pub metrics: Vec<Option<&'a CallMetrics>>,
}

/// Correlate `profiles[0]` (the baseline) against every other profile in
/// the slice. Profiles with no correlating row are silently dropped, per
/// SPEC_FULL.md §4.6.
pub fn correlate<'a>(profiles: &'a [Profile]) -> Vec<CorrelationRow<'a>> {
    let Some(baseline) = profiles.first() else {
        return Vec::new();
    };

    let mut rows = Vec::new();
    flatten_baseline(&baseline.target, 0, profiles.len(), &mut rows);

    for (profile_index, profile) in profiles.iter().enumerate().skip(1) {
        correlate_tree(profile_index, &profile.target, 0, &mut rows);
    }

    rows
}

fn flatten_baseline<'a>(
    node: &'a CallMetrics,
    depth: usize,
    num_profiles: usize,
    rows: &mut Vec<CorrelationRow<'a>>,
) {
    let mut metrics = vec![None; num_profiles];
    metrics[0] = Some(node);
    rows.push(CorrelationRow {
        fn_name: node.fn_name.clone(),
        depth,
        has_children: !node.nested_calls.is_empty(),
        metrics,
    });
    for child in &node.nested_calls {
        flatten_baseline(child, depth + 1, num_profiles, rows);
    }
}

/// Visit `node` (from the non-baseline tree at `profile_index`) and try to
/// correlate it with an entry from `rows`, scanning forward from
/// `min_depth`. Returns the (possibly advanced) cursor for use by the
/// caller's next sibling/continuation.
fn correlate_tree(profile_index: usize, node: &CallMetrics, min_depth: usize, rows: &mut [CorrelationRow]) -> usize {
    let mut min_depth = min_depth;
    for scan_index in min_depth..rows.len() {
        if rows[scan_index].fn_name == node.fn_name {
            rows[scan_index].metrics[profile_index] = Some(node);
            min_depth = scan_index;
            break;
        }
    }

    for child in &node.nested_calls {
        min_depth = correlate_tree(profile_index, child, min_depth, rows);
    }

    min_depth
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::stats::Accumulator;
    use std::time::Duration;

    fn leaf(name: &str, nanos: u64) -> CallMetrics {
        let mut acc = Accumulator::new();
        acc.record(Duration::from_nanos(nanos));
        CallMetrics::from_sealed(name.to_string(), acc.seal(), vec![])
    }

    fn node(name: &str, nanos: u64, children: Vec<CallMetrics>) -> CallMetrics {
        let mut acc = Accumulator::new();
        acc.record(Duration::from_nanos(nanos));
        CallMetrics::from_sealed(name.to_string(), acc.seal(), children)
    }

    #[test]
    fn correlator_drop_scenario_a_to_b_to_c_vs_a_to_c() {
        // baseline: A -> B -> C
        let baseline_tree = node("A", 300, vec![node("B", 200, vec![leaf("C", 100)])]);
        let baseline = Profile::new(1, None, baseline_tree);

        // candidate: A -> C  (B skipped)
        let candidate_tree = node("A", 150, vec![leaf("C", 50)]);
        let candidate = Profile::new(2, None, candidate_tree);

        let rows = correlate(&[baseline, candidate]);

        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].fn_name, "A");
        assert_eq!(rows[1].fn_name, "B");
        assert_eq!(rows[2].fn_name, "C");

        assert!(rows[0].metrics[1].is_some());
        assert!(rows[1].metrics[1].is_none(), "B has no candidate match");
        assert!(rows[2].metrics[1].is_some());
        assert_eq!(rows[2].metrics[1].unwrap().fn_name, "C");
    }

    #[test]
    fn row_zero_order_matches_preorder_traversal_of_baseline() {
        let baseline_tree = node(
            "root",
            100,
            vec![
                node("left", 30, vec![leaf("left.leaf", 10)]),
                leaf("right", 20),
            ],
        );
        let baseline = Profile::new(1, None, baseline_tree.clone());
        let other = Profile::new(2, None, baseline_tree);

        let rows = correlate(&[baseline, other]);
        let names: Vec<_> = rows.iter().map(|r| r.fn_name.clone()).collect();
        assert_eq!(names, vec!["root", "left", "left.leaf", "right"]);
    }

    #[test]
    fn cursor_is_monotone_across_distinctly_named_siblings() {
        let baseline_tree = node(
            "root",
            100,
            vec![leaf("alpha", 10), leaf("beta", 10), leaf("gamma", 5)],
        );
        let baseline = Profile::new(1, None, baseline_tree);

        let candidate_tree = node(
            "root",
            90,
            vec![leaf("alpha", 9), leaf("beta", 9), leaf("gamma", 4)],
        );
        let candidate = Profile::new(2, None, candidate_tree);

        let rows = correlate(&[baseline, candidate]);
        let matched_indices: Vec<usize> = rows
            .iter()
            .enumerate()
            .filter(|(_, r)| r.metrics[1].is_some())
            .map(|(i, _)| i)
            .collect();
        assert_eq!(matched_indices, vec![0, 1, 2, 3]);
    }

    #[test]
    fn duplicate_sibling_names_reuse_the_same_row_per_original_algorithm() {
        // The cursor advances to, not past, a matched row -- so a second
        // sibling with the same name rematches that same row instead of
        // advancing to the next occurrence, and the later occurrence is
        // left unmatched. This mirrors `cmd/diff.go`'s `correlateMetric`
        // in original_source verbatim.
        let baseline_tree = node(
            "root",
            100,
            vec![leaf("dup", 10), leaf("dup", 10), leaf("tail", 5)],
        );
        let baseline = Profile::new(1, None, baseline_tree);

        let candidate_tree = node(
            "root",
            90,
            vec![leaf("dup", 9), leaf("dup", 9), leaf("tail", 4)],
        );
        let candidate = Profile::new(2, None, candidate_tree);

        let rows = correlate(&[baseline, candidate]);

        assert!(rows[1].metrics[1].is_some(), "first dup row is matched");
        assert!(
            rows[2].metrics[1].is_none(),
            "second dup row is never reached once the cursor is pinned at row 1"
        );
        assert!(rows[3].metrics[1].is_some(), "tail row is still reached");
    }
}

use crate::DisjointSubsets;
use formasm_adjacency::Adjacency;
use std::mem;

/// Partitions the given subsets into colors, such that the subsets within each color are
/// pairwise disjoint.
///
/// Each color is built in a separate sweep over the subsets that have not yet been colored,
/// greedily accepting every subset that does not intersect the subsets already accepted in
/// the sweep. The label of each subset in the result is its position in `subsets`, and the
/// subsets of each color appear in increasing label order. The result is deterministic.
pub fn sequential_greedy_coloring(subsets: &Adjacency) -> Vec<DisjointSubsets> {
    let table_len = subsets.max_index().map(|idx| idx + 1).unwrap_or(0);
    // The color that most recently claimed each index, offset by one so that 0 means "never"
    let mut last_claimed_by = vec![0usize; table_len];

    let mut colors = Vec::new();
    let mut pending: Vec<usize> = (0..subsets.len()).collect();
    let mut postponed = Vec::new();

    while !pending.is_empty() {
        let color_tag = colors.len() + 1;
        let mut color_subsets = Adjacency::new();
        let mut color_labels = Vec::new();
        let mut max_index = None;

        for &subset_idx in &pending {
            let subset = subsets.row(subset_idx).unwrap_or_default();
            let blocked = subset.iter().any(|&idx| last_claimed_by[idx] == color_tag);
            if blocked {
                postponed.push(subset_idx);
            } else {
                for &idx in subset {
                    last_claimed_by[idx] = color_tag;
                    max_index = max_index.max(Some(idx));
                }
                color_subsets.push(subset);
                color_labels.push(subset_idx);
            }
        }

        debug_assert!(
            DisjointSubsets::try_from_disjoint_subsets(color_subsets.clone(), color_labels.clone()).is_ok()
        );

        // Subsets are disjoint by construction
        let color =
            unsafe { DisjointSubsets::from_disjoint_subsets_unchecked(color_subsets, color_labels, max_index) };
        colors.push(color);
        mem::swap(&mut pending, &mut postponed);
        postponed.clear();
    }

    colors
}

//! Pairwise door overlap within one visit.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::types::DoorId;

/// One door's opening interval, as seen by the overlap calculator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub door: DoorId,
    pub start: i64,
    pub end: i64,
}

/// Total time two doors were open at once during a visit.
///
/// Recorded for both orderings of a pair, so `(a, b, d)` always comes with
/// `(b, a, d)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Overlap {
    pub door_a: DoorId,
    pub door_b: DoorId,
    pub duration_ms: i64,
}

/// Computes the overlap matrix for spans sorted by start.
///
/// Keeps a running list of `(end, door)` for spans already seen. Every earlier
/// span still open when a new span starts contributes
/// `min(earlier_end, this_end) - this_start`. The accumulator starts at zero
/// for every pair of `door_set`; pairs that stay at zero are left out, and
/// the result is ordered by `(door_a, door_b)`.
pub fn compute_overlaps(spans: &[Span], door_set: &[DoorId]) -> Vec<Overlap> {
    let mut matrix: BTreeMap<(DoorId, DoorId), i64> = door_set
        .iter()
        .flat_map(|&a| door_set.iter().map(move |&b| ((a, b), 0)))
        .collect();

    let mut previous: Vec<(i64, DoorId)> = Vec::with_capacity(spans.len());
    for span in spans {
        for &(previous_end, previous_door) in &previous {
            if previous_end <= span.start || previous_door == span.door {
                continue;
            }
            let overlap = previous_end.min(span.end) - span.start;
            *matrix.entry((span.door, previous_door)).or_insert(0) += overlap;
            *matrix.entry((previous_door, span.door)).or_insert(0) += overlap;
        }
        previous.push((span.end, span.door));
    }

    matrix
        .into_iter()
        .filter(|&(_, duration_ms)| duration_ms > 0)
        .map(|((door_a, door_b), duration_ms)| Overlap {
            door_a,
            door_b,
            duration_ms,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn door(id: i64) -> DoorId {
        DoorId::new(id).unwrap()
    }

    fn span(d: i64, start: i64, end: i64) -> Span {
        Span {
            door: door(d),
            start,
            end,
        }
    }

    fn all_doors() -> Vec<DoorId> {
        (1..=4).map(door).collect()
    }

    fn triples(overlaps: &[Overlap]) -> Vec<(i64, i64, i64)> {
        overlaps
            .iter()
            .map(|o| (o.door_a.get(), o.door_b.get(), o.duration_ms))
            .collect()
    }

    #[test]
    fn two_doors_overlap_symmetrically() {
        let overlaps = compute_overlaps(&[span(1, 0, 100), span(2, 50, 150)], &all_doors());
        assert_eq!(triples(&overlaps), vec![(1, 2, 50), (2, 1, 50)]);
    }

    #[test]
    fn no_entry_without_overlap() {
        let overlaps = compute_overlaps(&[span(1, 0, 100), span(2, 100, 150)], &all_doors());
        assert!(overlaps.is_empty());
    }

    #[test]
    fn contained_span_counts_its_own_length() {
        let overlaps = compute_overlaps(&[span(1, 0, 1000), span(3, 200, 300)], &all_doors());
        assert_eq!(triples(&overlaps), vec![(1, 3, 100), (3, 1, 100)]);
    }

    #[test]
    fn overlaps_accumulate_per_pair() {
        let spans = [
            span(1, 0, 100),
            span(2, 50, 150),
            span(3, 60, 70),
            span(2, 160, 200),
            span(1, 180, 250),
        ];
        let overlaps = compute_overlaps(&spans, &all_doors());
        // (1,2): 50 + 20; (1,3): 10; (2,3): 10
        assert_eq!(
            triples(&overlaps),
            vec![
                (1, 2, 70),
                (1, 3, 10),
                (2, 1, 70),
                (2, 3, 10),
                (3, 1, 10),
                (3, 2, 10),
            ]
        );
    }

    #[test]
    fn doors_outside_snapshot_still_reported() {
        let overlaps = compute_overlaps(&[span(7, 0, 10), span(8, 5, 10)], &[door(1)]);
        assert_eq!(triples(&overlaps), vec![(7, 8, 5), (8, 7, 5)]);
    }

    #[test]
    fn empty_group_has_no_overlaps() {
        assert!(compute_overlaps(&[], &all_doors()).is_empty());
    }
}

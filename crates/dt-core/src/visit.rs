//! Visit aggregation: groups openings across all doors into visits.
//!
//! Openings are swept in start order while tracking the latest end seen so
//! far. A gap longer than the separation threshold closes the current visit.
//! A gap exactly equal to the threshold still joins.

use tracing::debug;

use crate::overlap::{Overlap, Span, compute_overlaps};
use crate::types::{DoorId, ValidationError};

/// Configuration for visit aggregation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VisitConfig {
    /// Openings separated by more than this start a new visit.
    /// Default: 600,000 (10 min).
    pub separation_ms: i64,
}

impl Default for VisitConfig {
    fn default() -> Self {
        Self {
            separation_ms: 600_000, // 10 minutes
        }
    }
}

impl VisitConfig {
    /// Builds a config from a threshold in whole minutes.
    pub fn from_minutes(minutes: i64) -> Result<Self, ValidationError> {
        if minutes < 0 {
            return Err(ValidationError::NegativeSeparation {
                value_ms: minutes.saturating_mul(60_000),
            });
        }
        Ok(Self {
            separation_ms: minutes.saturating_mul(60_000),
        })
    }
}

/// An opening suitable for visit aggregation.
///
/// This trait allows aggregation to work with stored openings from dt-db
/// or with test fixtures.
pub trait GroupableOpening {
    /// Storage identifier of the opening.
    fn opening_id(&self) -> i64;

    fn door(&self) -> DoorId;

    /// Open-event timestamp.
    fn start(&self) -> i64;

    /// Close-event timestamp.
    fn end(&self) -> i64;
}

/// What is known about openings before the replay window.
///
/// A replay window must begin at a visit boundary: its first opening is more
/// than the separation away from `previous_end`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VisitContext {
    /// Latest end among openings that start before the window.
    pub previous_end: Option<i64>,
}

/// A visit computed from a group of openings, ready to upsert by `start`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedVisit {
    pub start: i64,
    pub end: i64,
    /// Quiet time before the visit; `None` when nothing preceded it.
    pub prior_quiet_ms: Option<i64>,
    /// Member openings in start order.
    pub opening_ids: Vec<i64>,
    /// Door of each member opening, in order (repeats allowed).
    pub doors: Vec<DoorId>,
    pub overlaps: Vec<Overlap>,
}

impl PlannedVisit {
    #[must_use]
    pub const fn duration_ms(&self) -> i64 {
        self.end - self.start
    }
}

struct Group {
    start: i64,
    end: i64,
    prior_quiet_ms: Option<i64>,
    spans: Vec<Span>,
    opening_ids: Vec<i64>,
}

impl Group {
    fn new<O: GroupableOpening>(opening: &O, prior_quiet_ms: Option<i64>) -> Self {
        let mut group = Self {
            start: opening.start(),
            end: opening.end(),
            prior_quiet_ms,
            spans: Vec::new(),
            opening_ids: Vec::new(),
        };
        group.push(opening);
        group
    }

    fn push<O: GroupableOpening>(&mut self, opening: &O) {
        self.end = self.end.max(opening.end());
        self.spans.push(Span {
            door: opening.door(),
            start: opening.start(),
            end: opening.end(),
        });
        self.opening_ids.push(opening.opening_id());
    }

    fn finish(self, door_set: &[DoorId]) -> PlannedVisit {
        let overlaps = compute_overlaps(&self.spans, door_set);
        PlannedVisit {
            start: self.start,
            end: self.end,
            prior_quiet_ms: self.prior_quiet_ms,
            opening_ids: self.opening_ids,
            doors: self.spans.iter().map(|s| s.door).collect(),
            overlaps,
        }
    }
}

/// Groups openings (sorted by start) into visits.
///
/// # Algorithm
///
/// 1. `gap = start - latest end so far` (from `context.previous_end` for the
///    first opening)
/// 2. `gap > separation` closes the current group and opens a new one whose
///    prior quiet time is `gap`
/// 3. Each group's end is the latest member end; overlaps are computed over
///    the member spans with `door_set` as the pair snapshot
pub fn plan_visits<O: GroupableOpening>(
    openings: &[O],
    context: &VisitContext,
    door_set: &[DoorId],
    config: &VisitConfig,
) -> Vec<PlannedVisit> {
    let mut visits = Vec::new();
    let mut current: Option<Group> = None;
    let mut latest_end = context.previous_end;

    for opening in openings {
        let gap = latest_end.map(|end| opening.start() - end);
        let joins = gap.is_some_and(|g| g <= config.separation_ms);

        match current.take() {
            Some(mut group) if joins => {
                group.push(opening);
                current = Some(group);
            }
            Some(done) => {
                visits.push(done.finish(door_set));
                current = Some(Group::new(opening, gap));
            }
            None => {
                if joins {
                    debug!(
                        opening = opening.opening_id(),
                        gap,
                        "window starts inside a visit"
                    );
                }
                current = Some(Group::new(opening, gap));
            }
        }

        latest_end = Some(latest_end.map_or(opening.end(), |end| end.max(opening.end())));
    }

    if let Some(done) = current {
        visits.push(done.finish(door_set));
    }
    visits
}

#[cfg(test)]
mod tests {
    use super::*;

    struct TestOpening {
        id: i64,
        door: i64,
        start: i64,
        end: i64,
    }

    impl GroupableOpening for TestOpening {
        fn opening_id(&self) -> i64 {
            self.id
        }

        fn door(&self) -> DoorId {
            DoorId::new(self.door).unwrap()
        }

        fn start(&self) -> i64 {
            self.start
        }

        fn end(&self) -> i64 {
            self.end
        }
    }

    const MIN: i64 = 60_000;

    fn openings(spec: &[(i64, i64, i64)]) -> Vec<TestOpening> {
        spec.iter()
            .enumerate()
            .map(|(i, &(door, start, end))| TestOpening {
                id: i64::try_from(i).unwrap() + 1,
                door,
                start,
                end,
            })
            .collect()
    }

    fn doors() -> Vec<DoorId> {
        (1..=4).map(|d| DoorId::new(d).unwrap()).collect()
    }

    fn plan(list: &[TestOpening], context: &VisitContext) -> Vec<PlannedVisit> {
        plan_visits(list, context, &doors(), &VisitConfig::default())
    }

    #[test]
    fn gap_equal_to_threshold_joins() {
        let list = openings(&[(1, 0, MIN), (2, 11 * MIN, 12 * MIN)]);
        let visits = plan(&list, &VisitContext::default());
        assert_eq!(visits.len(), 1);
        assert_eq!(visits[0].start, 0);
        assert_eq!(visits[0].duration_ms(), 12 * MIN);
        assert_eq!(visits[0].opening_ids, vec![1, 2]);
    }

    #[test]
    fn gap_one_ms_over_threshold_splits() {
        let list = openings(&[(1, 0, MIN), (2, 11 * MIN + 1, 12 * MIN)]);
        let visits = plan(&list, &VisitContext::default());
        assert_eq!(visits.len(), 2);
        assert_eq!(visits[0].prior_quiet_ms, None);
        assert_eq!(visits[1].start, 11 * MIN + 1);
        assert_eq!(visits[1].prior_quiet_ms, Some(10 * MIN + 1));
    }

    #[test]
    fn end_is_latest_member_end() {
        // Door 2 opens and closes while door 1 is still open.
        let list = openings(&[(1, 0, 30 * MIN), (2, MIN, 2 * MIN), (3, 35 * MIN, 36 * MIN)]);
        let visits = plan(&list, &VisitContext::default());
        assert_eq!(visits.len(), 1);
        assert_eq!(visits[0].end, 36 * MIN);
        let doors: Vec<i64> = visits[0].doors.iter().map(|d| d.get()).collect();
        assert_eq!(doors, vec![1, 2, 3]);
    }

    #[test]
    fn doors_keep_repeats_in_order() {
        let list = openings(&[(2, 0, 10), (1, 20, 30), (2, 40, 50)]);
        let visits = plan(&list, &VisitContext::default());
        let doors: Vec<i64> = visits[0].doors.iter().map(|d| d.get()).collect();
        assert_eq!(doors, vec![2, 1, 2]);
    }

    #[test]
    fn overlaps_attached_per_visit() {
        let list = openings(&[(1, 0, 100), (2, 50, 150), (1, 20 * MIN, 21 * MIN)]);
        let visits = plan(&list, &VisitContext::default());
        assert_eq!(visits.len(), 2);
        insta::assert_snapshot!(
            serde_json::to_string(&visits[0].overlaps).unwrap(),
            @r#"[{"door_a":1,"door_b":2,"duration_ms":50},{"door_a":2,"door_b":1,"duration_ms":50}]"#
        );
        assert!(visits[1].overlaps.is_empty());
    }

    #[test]
    fn first_group_after_previous_opening_has_gap_as_prior_quiet() {
        let list = openings(&[(1, 100 * MIN, 101 * MIN), (2, 130 * MIN, 131 * MIN)]);
        let context = VisitContext {
            previous_end: Some(40 * MIN),
        };
        let visits = plan(&list, &context);
        assert_eq!(visits.len(), 2);
        assert_eq!(visits[0].prior_quiet_ms, Some(60 * MIN));
        assert_eq!(visits[1].prior_quiet_ms, Some(29 * MIN));
    }

    #[test]
    fn resumed_plan_matches_full_plan() {
        let all = openings(&[
            (1, 0, MIN),
            (2, 5 * MIN, 6 * MIN),
            (1, 30 * MIN, 31 * MIN),
            (3, 35 * MIN, 37 * MIN),
            (4, 60 * MIN, 62 * MIN),
        ]);
        let full = plan(&all, &VisitContext::default());
        assert_eq!(full.len(), 3);

        // Resume at the second visit: replay openings from its start.
        let context = VisitContext {
            previous_end: Some(6 * MIN),
        };
        let resumed = plan(&all[2..], &context);
        assert_eq!(resumed, full[1..].to_vec());
    }

    #[test]
    fn empty_input_plans_nothing() {
        let list: Vec<TestOpening> = Vec::new();
        assert!(plan(&list, &VisitContext::default()).is_empty());
    }

    #[test]
    fn separation_from_minutes() {
        assert_eq!(VisitConfig::from_minutes(10).unwrap(), VisitConfig::default());
        assert_eq!(VisitConfig::from_minutes(0).unwrap().separation_ms, 0);
        assert!(VisitConfig::from_minutes(-1).is_err());
    }
}

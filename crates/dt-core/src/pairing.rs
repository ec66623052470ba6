//! Two-state pairing machine shared by the opening and uptime reconstructors.
//!
//! Events are folded through [`PairState`] in ascending timestamp order. A
//! rising edge (door opened, sensor online) while idle starts an interval; a
//! falling edge while active closes it. Repeated edges are "bounces" and the
//! [`BouncePolicy`] decides which of the repeated rising edges survives.

use tracing::debug;

use crate::event::{EventClass, SensorEvent};
use crate::types::DoorId;

/// Direction of a state transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edge {
    Rise,
    Fall,
}

/// Which rising edge anchors an interval when several arrive in a row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BouncePolicy {
    /// The newest rise replaces the pending one; the replaced rise is an orphan.
    LatestRise,
    /// The first rise is kept; later rises are orphans.
    EarliestRise,
}

/// A closed interval between a rising and a falling event.
///
/// `start` and `end` are the timestamps (and therefore the ledger keys) of
/// the two events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Interval {
    pub start: i64,
    pub end: i64,
}

impl Interval {
    #[must_use]
    pub const fn duration_ms(&self) -> i64 {
        self.end - self.start
    }
}

/// Output of one pairing pass over a single door's events.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Pairing {
    /// Completed intervals in ascending order.
    pub intervals: Vec<Interval>,
    /// Timestamps of events that ended up in no interval.
    pub orphans: Vec<i64>,
    /// A trailing rise still waiting for its fall.
    pub pending: Option<i64>,
    /// Events considered (after the resume cursor).
    pub processed: usize,
    /// Events after the cursor that carried no usable edge.
    pub skipped: usize,
}

/// Current state of the machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PairState {
    #[default]
    Idle,
    Active {
        since: i64,
    },
}

impl PairState {
    /// Applies one edge, recording any completed interval or orphan.
    #[must_use]
    pub fn step(self, edge: Edge, at: i64, policy: BouncePolicy, out: &mut Pairing) -> Self {
        match (self, edge) {
            (Self::Idle, Edge::Rise) => Self::Active { since: at },
            (Self::Active { since }, Edge::Rise) => match policy {
                BouncePolicy::LatestRise => {
                    out.orphans.push(since);
                    Self::Active { since: at }
                }
                BouncePolicy::EarliestRise => {
                    out.orphans.push(at);
                    self
                }
            },
            (Self::Active { since }, Edge::Fall) => {
                out.intervals.push(Interval {
                    start: since,
                    end: at,
                });
                Self::Idle
            }
            (Self::Idle, Edge::Fall) => {
                out.orphans.push(at);
                Self::Idle
            }
        }
    }
}

/// Folds a door's events through the pairing machine.
///
/// Only events strictly after `resume_after` are considered, starting idle.
/// `edge_of` maps each event class to an edge; classes it rejects are counted
/// as skipped. Input must be sorted by timestamp.
pub fn fold_edges<E, F>(
    door: DoorId,
    events: &[E],
    resume_after: Option<i64>,
    policy: BouncePolicy,
    edge_of: F,
) -> Pairing
where
    E: SensorEvent,
    F: Fn(EventClass) -> Option<Edge>,
{
    let mut out = Pairing::default();
    let mut state = PairState::Idle;

    for event in events {
        let at = event.timestamp();
        if resume_after.is_some_and(|cursor| at <= cursor) {
            continue;
        }
        out.processed += 1;

        let Some(edge) = edge_of(event.class()) else {
            debug!(door = %door, timestamp = at, class = ?event.class(), "skipping event without a usable edge");
            out.skipped += 1;
            continue;
        };

        let orphans_before = out.orphans.len();
        state = state.step(edge, at, policy, &mut out);
        if let Some(orphan) = out.orphans.get(orphans_before) {
            debug!(door = %door, timestamp = orphan, "orphaned event");
        }
    }

    if let PairState::Active { since } = state {
        out.pending = Some(since);
    }
    out
}

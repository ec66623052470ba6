//! Opening reconstruction: pairs a door's Open/Closed contact events.
//!
//! A bounced contact (Open, Open, Closed) is anchored at the latest Open: the
//! sensor's first report is assumed to be the noise. A Closed with no
//! preceding Open is an orphan: it ends an opening that was never observed.
//! The usual case is a door already closed when tracking began.

use crate::event::{ContactState, EventClass, SensorEvent};
use crate::pairing::{BouncePolicy, Edge, Pairing, fold_edges};
use crate::types::DoorId;

const fn contact_edge(class: EventClass) -> Option<Edge> {
    match class {
        EventClass::DoorContact(ContactState::Open) => Some(Edge::Rise),
        EventClass::DoorContact(ContactState::Closed) => Some(Edge::Fall),
        _ => None,
    }
}

/// Reconstructs openings for one door.
///
/// `events` must be the door's contact events in ascending order. With
/// `resume_after` set to the close-event timestamp of the last known opening,
/// only later events are paired. Each returned interval is one opening keyed
/// by `(start, end)` = `(open_event, close_event)`.
pub fn reconstruct_openings<E: SensorEvent>(
    door: DoorId,
    events: &[E],
    resume_after: Option<i64>,
) -> Pairing {
    fold_edges(door, events, resume_after, BouncePolicy::LatestRise, contact_edge)
}

/// Whether an unpaired contact event is explained by a bounce.
///
/// An orphan is valid when its neighbouring contact events (previous and
/// next of the same door) carry the same value, or when it sits at either
/// end of the door's history. Anything else means the pairing went wrong.
pub fn is_valid_orphan(previous: Option<ContactState>, next: Option<ContactState>) -> bool {
    match (previous, next) {
        (Some(p), Some(n)) => p == n,
        _ => true,
    }
}

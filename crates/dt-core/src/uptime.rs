//! Uptime reconstruction: pairs a sensor's online/offline events.
//!
//! Unlike door contacts, repeated `online` reports while the sensor is
//! already up do not move the start: the first online wins.

use crate::event::{EventClass, SensorEvent};
use crate::pairing::{BouncePolicy, Edge, Pairing, fold_edges};
use crate::types::DoorId;

const fn updown_edge(class: EventClass) -> Option<Edge> {
    match class {
        EventClass::Online => Some(Edge::Rise),
        EventClass::Offline => Some(Edge::Fall),
        _ => None,
    }
}

/// Reconstructs uptimes for one door's sensor.
///
/// `resume_after` is the offline-event timestamp of the last known uptime.
pub fn reconstruct_uptimes<E: SensorEvent>(
    door: DoorId,
    events: &[E],
    resume_after: Option<i64>,
) -> Pairing {
    fold_edges(door, events, resume_after, BouncePolicy::EarliestRise, updown_edge)
}

//! Core domain logic for the door tracker.
//!
//! This crate contains the fundamental types and logic for:
//! - Event classification: translating raw cloud log records into a closed set of classes
//! - Pairing: turning contact and up/down events into openings and uptimes
//! - Visit aggregation: grouping openings across doors, with per-visit door overlaps

pub mod event;
pub mod event_code;
mod opening;
mod overlap;
pub mod pairing;
pub mod raw;
pub mod time;
pub mod types;
mod uptime;
pub mod vendor;
mod visit;

pub use event::{BatteryLevel, ContactState, EventClass, EventValueError, SensorEvent};
pub use event_code::{EventCode, UnknownEventCode};
pub use opening::{is_valid_orphan, reconstruct_openings};
pub use overlap::{Overlap, Span, compute_overlaps};
pub use pairing::{Interval, Pairing};
pub use raw::{ClassifiedRecord, RawLogBatch, RawLogError, classify_record};
pub use types::{DeviceId, DoorId, RebuildMode, ValidationError};
pub use uptime::reconstruct_uptimes;
pub use vendor::{EventSource, EventType};
pub use visit::{GroupableOpening, PlannedVisit, VisitConfig, VisitContext, plan_visits};

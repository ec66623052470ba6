//! Fixtures shared by the storage tests.

use serde_json::{Value, json};

use dt_core::{DeviceId, DoorId, EventCode, RawLogBatch};

use crate::Database;

/// An in-memory database with `count` registered doors.
pub fn db_with_doors(count: usize) -> (Database, Vec<DoorId>) {
    let mut db = Database::open_in_memory().expect("open in-memory db");
    let doors = (0..count)
        .map(|i| {
            let device = DeviceId::new(format!("device-{i}")).expect("device id");
            db.register_door(&device, &format!("Shelf {i}")).expect("register door")
        })
        .collect();
    (db, doors)
}

/// Ingests door-contact events; `true` is Open.
pub fn ingest_contacts(db: &mut Database, door: DoorId, events: &[(i64, bool)]) {
    let records = events
        .iter()
        .map(|&(ts, open)| {
            let value = if open { "true" } else { "false" };
            json!({"code": "doorcontact_state", "value": value, "event_time": ts, "event_from": 1, "event_id": 7})
        })
        .collect();
    ingest(db, door, records);
}

/// Ingests up/down events; `true` is online.
pub fn ingest_updown(db: &mut Database, door: DoorId, events: &[(i64, bool)]) {
    let records = events
        .iter()
        .map(|&(ts, online)| {
            let event_id = if online { 1 } else { 2 };
            json!({"event_time": ts, "event_from": 1, "event_id": event_id})
        })
        .collect();
    ingest(db, door, records);
}

fn ingest(db: &mut Database, door: DoorId, records: Vec<Value>) {
    let batch = RawLogBatch::from_value(Value::Array(records)).expect("batch");
    db.ingest_batch(door, &batch, &EventCode::ALL).expect("ingest batch");
}

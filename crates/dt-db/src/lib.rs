//! Storage layer for the door tracker.
//!
//! Provides the event ledger and the derived opening, uptime and visit
//! tables using `rusqlite`, plus the update passes that keep the derived
//! tables in step with the ledger.
//!
//! # Thread Safety
//!
//! The [`Database`] type wraps a `rusqlite::Connection`, which is `Send` but not `Sync`.
//! Reconstruction inside an update pass fans out over doors with `rayon`, but
//! every read and write goes through the single connection.
//!
//! # Schema
//!
//! ## Timestamps
//!
//! Event timestamps are the device cloud's epoch milliseconds, stored as
//! INTEGER. They double as the event primary key: no two events share a
//! millisecond. Derived tables store `start_ms`/`duration_ms` integers.
//!
//! ## Visit payloads
//!
//! `visits.doors` and `visits.overlaps` hold JSON arrays (door ids in
//! opening order, and `{door_a, door_b, duration_ms}` objects). They are
//! always rewritten whole.

mod intervals;
#[cfg(test)]
mod test_support;
mod visits;

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, params};
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

use dt_core::{
    ContactState, DeviceId, DoorId, EventClass, EventCode, RawLogBatch, SensorEvent,
    ValidationError, classify_record, is_valid_orphan,
};

pub use intervals::{OpeningRecord, ReconstructionSummary, UptimeRecord};
pub use visits::{PipelineSummary, VisitRecord, VisitSummary};

/// Database errors.
#[derive(Debug, Error)]
pub enum DbError {
    /// An error from the underlying database.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// A visit payload column could not be encoded or decoded.
    #[error("invalid visit payload: {0}")]
    Json(#[from] serde_json::Error),
    /// The door is not registered.
    #[error("unknown door: {0}")]
    UnknownDoor(DoorId),
    /// A door with this device ID is already registered.
    #[error("device {0} is already registered")]
    DeviceAlreadyRegistered(String),
    /// A stored or supplied value failed validation.
    #[error(transparent)]
    Validation(#[from] ValidationError),
}

/// Database connection wrapper.
///
/// See the [module documentation](self) for thread safety considerations.
pub struct Database {
    conn: Connection,
}

/// A registered door.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DoorRecord {
    pub id: DoorId,
    pub device_id: DeviceId,
    pub contents: String,
}

/// A ledger event as stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventRecord {
    pub timestamp: i64,
    pub door: DoorId,
    pub code: String,
    pub event_type: String,
    pub value: Option<String>,
    pub source: String,
    pub fetch_id: Option<String>,
}

impl SensorEvent for EventRecord {
    fn timestamp(&self) -> i64 {
        self.timestamp
    }

    fn class(&self) -> EventClass {
        EventClass::from_stored(&self.code, &self.event_type, self.value.as_deref())
    }
}

/// A recorded batch ingestion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRecord {
    pub id: String,
    pub fetched_at: String,
}

/// Outcome of ingesting one raw batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct IngestSummary {
    pub fetch_id: String,
    /// Records in the batch.
    pub fetched: usize,
    /// Supported events newly written to the ledger.
    pub inserted: usize,
    /// Supported events whose timestamp was already in the ledger.
    pub already_stored: usize,
    /// Well-formed records outside the supported codes.
    pub unsupported: usize,
    /// Records that could not be read.
    pub malformed: usize,
    /// Records per reported code (`"<none>"` when absent).
    pub codes: BTreeMap<String, usize>,
}

/// Per-door ledger overview.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DoorStatus {
    pub door: DoorRecord,
    pub events: i64,
    pub last_event: Option<i64>,
    /// Start bound the cloud client should request from.
    pub fetch_cursor: i64,
    pub openings: i64,
    pub uptimes: i64,
    pub orphans: usize,
}

const EVENT_COLUMNS: &str = "timestamp, door_id, code, type, value, source, fetch_id";

impl Database {
    /// Opens a database at the given path, creating it if necessary.
    ///
    /// The database schema is automatically initialized on first open.
    pub fn open(path: &Path) -> Result<Self, DbError> {
        let conn = Connection::open(path)?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Opens an in-memory database.
    ///
    /// Useful for testing. The database is destroyed when the connection closes.
    pub fn open_in_memory() -> Result<Self, DbError> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Initializes the database schema.
    ///
    /// This is idempotent - safe to call on an already-initialized database.
    fn init(&self) -> Result<(), DbError> {
        self.conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS doors (
                id INTEGER PRIMARY KEY,
                device_id TEXT NOT NULL UNIQUE,
                contents TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS fetches (
                id TEXT PRIMARY KEY,
                fetched_at TEXT NOT NULL
            );

            -- Events table: the append-only ledger
            -- timestamp: device cloud epoch milliseconds (unique)
            -- type: translated event_id (e.g., 'data report', 'online')
            -- value: 'Open'/'Closed', battery level, or NULL for up/down events
            CREATE TABLE IF NOT EXISTS events (
                timestamp INTEGER PRIMARY KEY,
                door_id INTEGER NOT NULL,
                code TEXT NOT NULL,
                type TEXT NOT NULL,
                value TEXT,
                source TEXT NOT NULL,
                fetch_id TEXT,
                FOREIGN KEY (door_id) REFERENCES doors(id) ON DELETE RESTRICT,
                FOREIGN KEY (fetch_id) REFERENCES fetches(id) ON DELETE SET NULL
            );

            CREATE INDEX IF NOT EXISTS idx_events_door_code ON events(door_id, code, timestamp);

            CREATE TABLE IF NOT EXISTS visits (
                id INTEGER PRIMARY KEY,
                start_ms INTEGER NOT NULL UNIQUE,
                duration_ms INTEGER NOT NULL,
                prior_quiet_ms INTEGER,
                doors TEXT NOT NULL DEFAULT '[]',
                overlaps TEXT NOT NULL DEFAULT '[]'
            );

            CREATE TABLE IF NOT EXISTS openings (
                id INTEGER PRIMARY KEY,
                start_ms INTEGER NOT NULL,
                duration_ms INTEGER NOT NULL,
                door_id INTEGER NOT NULL,
                visit_id INTEGER,
                open_event INTEGER NOT NULL,
                close_event INTEGER NOT NULL,
                UNIQUE (open_event, close_event),
                FOREIGN KEY (door_id) REFERENCES doors(id) ON DELETE RESTRICT,
                FOREIGN KEY (visit_id) REFERENCES visits(id) ON DELETE SET NULL,
                FOREIGN KEY (open_event) REFERENCES events(timestamp) ON DELETE RESTRICT,
                FOREIGN KEY (close_event) REFERENCES events(timestamp) ON DELETE RESTRICT
            );

            CREATE INDEX IF NOT EXISTS idx_openings_door ON openings(door_id, close_event);
            CREATE INDEX IF NOT EXISTS idx_openings_start ON openings(start_ms);
            CREATE INDEX IF NOT EXISTS idx_openings_visit ON openings(visit_id);

            CREATE TABLE IF NOT EXISTS uptimes (
                id INTEGER PRIMARY KEY,
                start_ms INTEGER NOT NULL,
                duration_ms INTEGER NOT NULL,
                door_id INTEGER NOT NULL,
                online_event INTEGER NOT NULL,
                offline_event INTEGER NOT NULL,
                UNIQUE (online_event, offline_event),
                FOREIGN KEY (door_id) REFERENCES doors(id) ON DELETE RESTRICT,
                FOREIGN KEY (online_event) REFERENCES events(timestamp) ON DELETE RESTRICT,
                FOREIGN KEY (offline_event) REFERENCES events(timestamp) ON DELETE RESTRICT
            );

            CREATE INDEX IF NOT EXISTS idx_uptimes_door ON uptimes(door_id, offline_event);
            ",
        )?;
        Ok(())
    }

    /// Registers a door for a device. Doors are immutable once registered.
    pub fn register_door(&mut self, device_id: &DeviceId, contents: &str) -> Result<DoorId, DbError> {
        let exists: bool = self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM doors WHERE device_id = ?)",
            [device_id.as_str()],
            |row| row.get(0),
        )?;
        if exists {
            return Err(DbError::DeviceAlreadyRegistered(device_id.to_string()));
        }
        self.conn.execute(
            "INSERT INTO doors (device_id, contents) VALUES (?, ?)",
            params![device_id.as_str(), contents],
        )?;
        let id = DoorId::new(self.conn.last_insert_rowid())?;
        info!(door = %id, device = %device_id, "registered door");
        Ok(id)
    }

    /// Lists registered doors in ascending ID order.
    pub fn list_doors(&self) -> Result<Vec<DoorRecord>, DbError> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, device_id, contents FROM doors ORDER BY id ASC")?;
        let rows = stmt.query_map([], door_from_row)?;
        let mut doors = Vec::new();
        for row in rows {
            doors.push(row?);
        }
        Ok(doors)
    }

    /// Looks up one door.
    pub fn door(&self, id: DoorId) -> Result<Option<DoorRecord>, DbError> {
        let door = self
            .conn
            .query_row(
                "SELECT id, device_id, contents FROM doors WHERE id = ?",
                [id.get()],
                door_from_row,
            )
            .optional()?;
        Ok(door)
    }

    /// Ascending door IDs; the snapshot every cross-door pass iterates.
    pub fn door_ids(&self) -> Result<Vec<DoorId>, DbError> {
        door_ids(&self.conn)
    }

    fn require_door(&self, id: DoorId) -> Result<(), DbError> {
        if self.door(id)?.is_none() {
            return Err(DbError::UnknownDoor(id));
        }
        Ok(())
    }

    /// Ingests a raw batch for a door, recording the fetch.
    pub fn ingest_batch(
        &mut self,
        door: DoorId,
        batch: &RawLogBatch,
        supported: &[EventCode],
    ) -> Result<IngestSummary, DbError> {
        self.ingest_batch_at(door, batch, supported, Utc::now())
    }

    fn ingest_batch_at(
        &mut self,
        door: DoorId,
        batch: &RawLogBatch,
        supported: &[EventCode],
        now: DateTime<Utc>,
    ) -> Result<IngestSummary, DbError> {
        self.require_door(door)?;

        let mut summary = IngestSummary {
            fetch_id: Uuid::new_v4().to_string(),
            fetched: batch.records.len(),
            ..IngestSummary::default()
        };
        let mut accepted = Vec::new();
        for (index, record) in batch.records.iter().enumerate() {
            let classified = match classify_record(record) {
                Ok(classified) => classified,
                Err(err) => {
                    debug!(door = %door, index, error = %err, "skipping malformed log record");
                    summary.malformed += 1;
                    continue;
                }
            };
            let code_key = classified.code.clone().unwrap_or_else(|| "<none>".to_string());
            *summary.codes.entry(code_key).or_insert(0) += 1;

            if classified.is_supported_by(supported) {
                accepted.push(classified);
            } else {
                summary.unsupported += 1;
            }
        }

        let tx = self.conn.transaction()?;
        tx.execute(
            "INSERT INTO fetches (id, fetched_at) VALUES (?, ?)",
            params![
                summary.fetch_id,
                now.to_rfc3339_opts(SecondsFormat::Secs, true)
            ],
        )?;
        {
            let mut stmt = tx.prepare(
                "
                INSERT OR IGNORE INTO events (timestamp, door_id, code, type, value, source, fetch_id)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                ",
            )?;
            for event in &accepted {
                let Some(code) = event.class.code() else {
                    continue;
                };
                let inserted = stmt.execute(params![
                    event.timestamp,
                    door.get(),
                    code.as_str(),
                    event.event_type.as_str(),
                    event.class.value(),
                    event.source.as_str(),
                    summary.fetch_id,
                ])?;
                if inserted == 0 {
                    debug!(door = %door, timestamp = event.timestamp, "event already in ledger");
                }
                summary.inserted += inserted;
            }
        }
        tx.commit()?;

        summary.already_stored = accepted.len() - summary.inserted;
        info!(
            door = %door,
            fetched = summary.fetched,
            inserted = summary.inserted,
            already_stored = summary.already_stored,
            unsupported = summary.unsupported,
            malformed = summary.malformed,
            "ingested log batch"
        );
        Ok(summary)
    }

    /// Lists recorded fetches, newest first.
    pub fn list_fetches(&self) -> Result<Vec<FetchRecord>, DbError> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, fetched_at FROM fetches ORDER BY fetched_at DESC, rowid DESC")?;
        let rows = stmt.query_map([], |row| {
            Ok(FetchRecord {
                id: row.get(0)?,
                fetched_at: row.get(1)?,
            })
        })?;
        let mut fetches = Vec::new();
        for row in rows {
            fetches.push(row?);
        }
        Ok(fetches)
    }

    /// Lists events in ascending timestamp order, optionally filtered.
    pub fn list_events(
        &self,
        door: Option<DoorId>,
        code: Option<EventCode>,
    ) -> Result<Vec<EventRecord>, DbError> {
        load_events(&self.conn, door, code, None)
    }

    /// The earliest recorded event, optionally filtered.
    pub fn first_event(
        &self,
        door: Option<DoorId>,
        code: Option<EventCode>,
    ) -> Result<Option<EventRecord>, DbError> {
        self.edge_event(door, code, "ASC")
    }

    /// The latest recorded event, optionally filtered.
    pub fn last_event(
        &self,
        door: Option<DoorId>,
        code: Option<EventCode>,
    ) -> Result<Option<EventRecord>, DbError> {
        self.edge_event(door, code, "DESC")
    }

    fn edge_event(
        &self,
        door: Option<DoorId>,
        code: Option<EventCode>,
        order: &str,
    ) -> Result<Option<EventRecord>, DbError> {
        let sql = format!(
            "
            SELECT {EVENT_COLUMNS}
            FROM events
            WHERE (?1 IS NULL OR door_id = ?1) AND (?2 IS NULL OR code = ?2)
            ORDER BY timestamp {order}
            LIMIT 1
            "
        );
        let event = self
            .conn
            .query_row(
                &sql,
                params![door.map(DoorId::get), code.map(|c| c.as_str())],
                event_from_row,
            )
            .optional()?;
        Ok(event)
    }

    /// Where the next cloud fetch for `door` should start.
    ///
    /// One millisecond before the last stored event so a batch boundary
    /// never drops an event, or `1` when the door has no events yet.
    pub fn fetch_cursor(&self, door: DoorId) -> Result<i64, DbError> {
        Ok(self
            .last_event(Some(door), None)?
            .map_or(1, |event| event.timestamp - 1))
    }

    /// Door-contact events that belong to no opening.
    pub fn orphan_events(&self, door: Option<DoorId>) -> Result<Vec<EventRecord>, DbError> {
        let sql = format!(
            "
            SELECT {EVENT_COLUMNS}
            FROM events e
            WHERE e.code = ?1
              AND (?2 IS NULL OR e.door_id = ?2)
              AND NOT EXISTS (
                  SELECT 1 FROM openings o
                  WHERE o.open_event = e.timestamp OR o.close_event = e.timestamp
              )
            ORDER BY e.timestamp ASC
            "
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(
            params![EventCode::DoorContact.as_str(), door.map(DoorId::get)],
            event_from_row,
        )?;
        let mut events = Vec::new();
        for row in rows {
            events.push(row?);
        }
        Ok(events)
    }

    /// Orphans that no bounce explains.
    ///
    /// A valid orphan's previous and next contact events (same door) carry
    /// the same value; the first and last events of a door are always valid.
    /// Anything else points at a pairing fault.
    pub fn invalid_orphans(&self, door: Option<DoorId>) -> Result<Vec<EventRecord>, DbError> {
        let orphans = self.orphan_events(door)?;
        let mut by_door: HashMap<DoorId, Vec<EventRecord>> = HashMap::new();
        let mut invalid = Vec::new();

        for orphan in orphans {
            if !by_door.contains_key(&orphan.door) {
                let contacts = self.list_events(Some(orphan.door), Some(EventCode::DoorContact))?;
                by_door.insert(orphan.door, contacts);
            }
            let Some(contacts) = by_door.get(&orphan.door) else {
                continue;
            };
            let Ok(position) = contacts.binary_search_by_key(&orphan.timestamp, |e| e.timestamp)
            else {
                continue;
            };
            let previous = position
                .checked_sub(1)
                .and_then(|i| contacts.get(i))
                .and_then(contact_state);
            let next = contacts.get(position + 1).and_then(contact_state);
            if !is_valid_orphan(previous, next) {
                invalid.push(orphan);
            }
        }
        Ok(invalid)
    }

    /// Ledger overview for one door.
    pub fn door_status(&self, door: DoorId) -> Result<DoorStatus, DbError> {
        let record = self.door(door)?.ok_or(DbError::UnknownDoor(door))?;
        let count = |sql: &str| -> Result<i64, DbError> {
            Ok(self.conn.query_row(sql, [door.get()], |row| row.get(0))?)
        };
        Ok(DoorStatus {
            door: record,
            events: count("SELECT COUNT(*) FROM events WHERE door_id = ?")?,
            last_event: self.last_event(Some(door), None)?.map(|e| e.timestamp),
            fetch_cursor: self.fetch_cursor(door)?,
            openings: count("SELECT COUNT(*) FROM openings WHERE door_id = ?")?,
            uptimes: count("SELECT COUNT(*) FROM uptimes WHERE door_id = ?")?,
            orphans: self.orphan_events(Some(door))?.len(),
        })
    }
}

fn contact_state(event: &EventRecord) -> Option<ContactState> {
    match event.class() {
        EventClass::DoorContact(state) => Some(state),
        _ => None,
    }
}

/// Reads a door ID column, rejecting non-positive values.
fn door_column(row: &Row<'_>, index: usize) -> rusqlite::Result<DoorId> {
    let raw: i64 = row.get(index)?;
    DoorId::new(raw)
        .map_err(|err| rusqlite::Error::FromSqlConversionFailure(index, Type::Integer, Box::new(err)))
}

fn door_from_row(row: &Row<'_>) -> rusqlite::Result<DoorRecord> {
    let device_id: String = row.get(1)?;
    Ok(DoorRecord {
        id: door_column(row, 0)?,
        device_id: DeviceId::new(device_id)
            .map_err(|err| rusqlite::Error::FromSqlConversionFailure(1, Type::Text, Box::new(err)))?,
        contents: row.get(2)?,
    })
}

fn event_from_row(row: &Row<'_>) -> rusqlite::Result<EventRecord> {
    Ok(EventRecord {
        timestamp: row.get(0)?,
        door: door_column(row, 1)?,
        code: row.get(2)?,
        event_type: row.get(3)?,
        value: row.get(4)?,
        source: row.get(5)?,
        fetch_id: row.get(6)?,
    })
}

fn door_ids(conn: &Connection) -> Result<Vec<DoorId>, DbError> {
    let mut stmt = conn.prepare("SELECT id FROM doors ORDER BY id ASC")?;
    let rows = stmt.query_map([], |row| door_column(row, 0))?;
    let mut ids = Vec::new();
    for row in rows {
        ids.push(row?);
    }
    Ok(ids)
}

/// Loads events in ascending order, strictly after `after` when given.
fn load_events(
    conn: &Connection,
    door: Option<DoorId>,
    code: Option<EventCode>,
    after: Option<i64>,
) -> Result<Vec<EventRecord>, DbError> {
    let sql = format!(
        "
        SELECT {EVENT_COLUMNS}
        FROM events
        WHERE (?1 IS NULL OR door_id = ?1)
          AND (?2 IS NULL OR code = ?2)
          AND (?3 IS NULL OR timestamp > ?3)
        ORDER BY timestamp ASC
        "
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(
        params![door.map(DoorId::get), code.map(|c| c.as_str()), after],
        event_from_row,
    )?;
    let mut events = Vec::new();
    for row in rows {
        events.push(row?);
    }
    Ok(events)
}

//! Opening and uptime update passes.
//!
//! Both entities are intervals between two ledger events of one door and are
//! derived the same way: load the door's events after the resume cursor,
//! pair them, then reconcile against stored rows by the `(start_event,
//! end_event)` key.

use std::ops::AddAssign;

use rayon::prelude::*;
use rusqlite::{Connection, OptionalExtension, Row, params};
use serde::Serialize;
use tracing::{debug, info, warn};

use dt_core::{
    DoorId, EventCode, GroupableOpening, Pairing, RebuildMode, reconstruct_openings,
    reconstruct_uptimes,
};

use crate::{Database, DbError, EventRecord, door_column, load_events};

/// Counters reported by an opening or uptime pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconstructionSummary {
    /// Events considered after the resume cursor.
    pub processed: usize,
    pub created: usize,
    /// Reconstructed intervals already stored under the same key.
    pub already_existing: usize,
    /// Orphans seen in this pass. Orphans after the last stored interval are
    /// replayed, so a later incremental pass counts them again; the stored
    /// ledger (`orphan_events`) holds the running total.
    pub orphaned: usize,
    /// Events with an unreadable payload.
    pub malformed: usize,
    /// Stored rows whose fields disagreed with the reconstruction.
    pub corrected: usize,
}

impl AddAssign for ReconstructionSummary {
    fn add_assign(&mut self, rhs: Self) {
        self.processed += rhs.processed;
        self.created += rhs.created;
        self.already_existing += rhs.already_existing;
        self.orphaned += rhs.orphaned;
        self.malformed += rhs.malformed;
        self.corrected += rhs.corrected;
    }
}

/// A stored opening.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpeningRecord {
    pub id: i64,
    pub door: DoorId,
    pub start_ms: i64,
    pub duration_ms: i64,
    pub open_event: i64,
    pub close_event: i64,
    pub visit_id: Option<i64>,
}

impl OpeningRecord {
    #[must_use]
    pub const fn end_ms(&self) -> i64 {
        self.start_ms + self.duration_ms
    }
}

impl GroupableOpening for OpeningRecord {
    fn opening_id(&self) -> i64 {
        self.id
    }

    fn door(&self) -> DoorId {
        self.door
    }

    fn start(&self) -> i64 {
        self.start_ms
    }

    fn end(&self) -> i64 {
        self.end_ms()
    }
}

/// A stored uptime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UptimeRecord {
    pub id: i64,
    pub door: DoorId,
    pub start_ms: i64,
    pub duration_ms: i64,
    pub online_event: i64,
    pub offline_event: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IntervalKind {
    Opening,
    Uptime,
}

impl IntervalKind {
    const fn table(self) -> &'static str {
        match self {
            Self::Opening => "openings",
            Self::Uptime => "uptimes",
        }
    }

    /// Columns holding the start and end event keys.
    const fn key_columns(self) -> (&'static str, &'static str) {
        match self {
            Self::Opening => ("open_event", "close_event"),
            Self::Uptime => ("online_event", "offline_event"),
        }
    }

    const fn code(self) -> EventCode {
        match self {
            Self::Opening => EventCode::DoorContact,
            Self::Uptime => EventCode::UpDown,
        }
    }

    const fn label(self) -> &'static str {
        match self {
            Self::Opening => "openings",
            Self::Uptime => "uptimes",
        }
    }

    fn reconstruct(self, door: DoorId, events: &[EventRecord], resume_after: Option<i64>) -> Pairing {
        match self {
            Self::Opening => reconstruct_openings(door, events, resume_after),
            Self::Uptime => reconstruct_uptimes(door, events, resume_after),
        }
    }
}

/// One door's input to a pass, loaded before reconstruction fans out.
struct DoorInput {
    door: DoorId,
    cursor: Option<i64>,
    events: Vec<EventRecord>,
}

struct StoredInterval {
    id: i64,
    start_ms: i64,
    duration_ms: i64,
    door_id: i64,
}

impl Database {
    /// Derives openings for one door from its door-contact events.
    pub fn update_openings(
        &mut self,
        door: DoorId,
        mode: RebuildMode,
    ) -> Result<ReconstructionSummary, DbError> {
        self.require_door(door)?;
        self.update_intervals(IntervalKind::Opening, &[door], mode)
    }

    /// Derives openings for every registered door.
    pub fn update_all_openings(&mut self, mode: RebuildMode) -> Result<ReconstructionSummary, DbError> {
        let doors = self.door_ids()?;
        self.update_intervals(IntervalKind::Opening, &doors, mode)
    }

    /// Derives uptimes for one door from its online/offline events.
    pub fn update_uptimes(
        &mut self,
        door: DoorId,
        mode: RebuildMode,
    ) -> Result<ReconstructionSummary, DbError> {
        self.require_door(door)?;
        self.update_intervals(IntervalKind::Uptime, &[door], mode)
    }

    /// Derives uptimes for every registered door.
    pub fn update_all_uptimes(&mut self, mode: RebuildMode) -> Result<ReconstructionSummary, DbError> {
        let doors = self.door_ids()?;
        self.update_intervals(IntervalKind::Uptime, &doors, mode)
    }

    fn update_intervals(
        &mut self,
        kind: IntervalKind,
        doors: &[DoorId],
        mode: RebuildMode,
    ) -> Result<ReconstructionSummary, DbError> {
        let tx = self.conn.transaction()?;

        if mode == RebuildMode::HardRebuild {
            let sql = format!("DELETE FROM {} WHERE door_id = ?", kind.table());
            for door in doors {
                let deleted = tx.execute(&sql, [door.get()])?;
                info!(door = %door, deleted, "cleared stored {}", kind.label());
            }
        }

        let mut inputs = Vec::with_capacity(doors.len());
        for &door in doors {
            let cursor = if mode.resumes() {
                resume_cursor(&tx, kind, door)?
            } else {
                None
            };
            let events = load_events(&tx, Some(door), Some(kind.code()), cursor)?;
            debug!(door = %door, cursor, events = events.len(), "loaded {} input", kind.label());
            inputs.push(DoorInput {
                door,
                cursor,
                events,
            });
        }

        let pairings: Vec<(DoorId, Pairing)> = inputs
            .par_iter()
            .map(|input| {
                (
                    input.door,
                    kind.reconstruct(input.door, &input.events, input.cursor),
                )
            })
            .collect();

        let mut total = ReconstructionSummary::default();
        for (door, pairing) in &pairings {
            let summary = write_intervals(&tx, kind, *door, pairing)?;
            info!(
                door = %door,
                mode = %mode,
                processed = summary.processed,
                created = summary.created,
                already_existing = summary.already_existing,
                orphaned = summary.orphaned,
                malformed = summary.malformed,
                corrected = summary.corrected,
                "updated {}",
                kind.label()
            );
            total += summary;
        }
        tx.commit()?;
        Ok(total)
    }

    /// Lists stored openings by start, optionally for one door.
    pub fn list_openings(&self, door: Option<DoorId>) -> Result<Vec<OpeningRecord>, DbError> {
        let mut stmt = self.conn.prepare(
            "
            SELECT id, door_id, start_ms, duration_ms, open_event, close_event, visit_id
            FROM openings
            WHERE ?1 IS NULL OR door_id = ?1
            ORDER BY start_ms ASC, id ASC
            ",
        )?;
        let rows = stmt.query_map([door.map(DoorId::get)], opening_from_row)?;
        let mut openings = Vec::new();
        for row in rows {
            openings.push(row?);
        }
        Ok(openings)
    }

    /// Lists stored uptimes by start, optionally for one door.
    pub fn list_uptimes(&self, door: Option<DoorId>) -> Result<Vec<UptimeRecord>, DbError> {
        let mut stmt = self.conn.prepare(
            "
            SELECT id, door_id, start_ms, duration_ms, online_event, offline_event
            FROM uptimes
            WHERE ?1 IS NULL OR door_id = ?1
            ORDER BY start_ms ASC, id ASC
            ",
        )?;
        let rows = stmt.query_map([door.map(DoorId::get)], |row| {
            Ok(UptimeRecord {
                id: row.get(0)?,
                door: door_column(row, 1)?,
                start_ms: row.get(2)?,
                duration_ms: row.get(3)?,
                online_event: row.get(4)?,
                offline_event: row.get(5)?,
            })
        })?;
        let mut uptimes = Vec::new();
        for row in rows {
            uptimes.push(row?);
        }
        Ok(uptimes)
    }
}

pub(crate) fn opening_from_row(row: &Row<'_>) -> rusqlite::Result<OpeningRecord> {
    Ok(OpeningRecord {
        id: row.get(0)?,
        door: door_column(row, 1)?,
        start_ms: row.get(2)?,
        duration_ms: row.get(3)?,
        open_event: row.get(4)?,
        close_event: row.get(5)?,
        visit_id: row.get(6)?,
    })
}

/// End-event timestamp of the door's last stored interval.
fn resume_cursor(conn: &Connection, kind: IntervalKind, door: DoorId) -> Result<Option<i64>, DbError> {
    let (_, end_column) = kind.key_columns();
    let sql = format!(
        "SELECT MAX({end_column}) FROM {} WHERE door_id = ?",
        kind.table()
    );
    let cursor: Option<i64> = conn.query_row(&sql, [door.get()], |row| row.get(0))?;
    Ok(cursor)
}

/// Reconciles one door's pairing with stored rows.
///
/// New keys are inserted. A stored row that disagrees with the fresh
/// reconstruction is logged and overwritten.
fn write_intervals(
    conn: &Connection,
    kind: IntervalKind,
    door: DoorId,
    pairing: &Pairing,
) -> Result<ReconstructionSummary, DbError> {
    let table = kind.table();
    let (start_column, end_column) = kind.key_columns();
    let mut find = conn.prepare(&format!(
        "SELECT id, start_ms, duration_ms, door_id FROM {table} WHERE {start_column} = ? AND {end_column} = ?"
    ))?;
    let mut insert = conn.prepare(&format!(
        "INSERT INTO {table} (start_ms, duration_ms, door_id, {start_column}, {end_column}) VALUES (?, ?, ?, ?, ?)"
    ))?;
    let mut correct = conn.prepare(&format!(
        "UPDATE {table} SET start_ms = ?, duration_ms = ?, door_id = ? WHERE id = ?"
    ))?;

    let mut summary = ReconstructionSummary {
        processed: pairing.processed,
        orphaned: pairing.orphans.len(),
        malformed: pairing.skipped,
        ..ReconstructionSummary::default()
    };

    for interval in &pairing.intervals {
        let duration_ms = interval.duration_ms();
        let stored = find
            .query_row(params![interval.start, interval.end], |row| {
                Ok(StoredInterval {
                    id: row.get(0)?,
                    start_ms: row.get(1)?,
                    duration_ms: row.get(2)?,
                    door_id: row.get(3)?,
                })
            })
            .optional()?;

        let Some(stored) = stored else {
            insert.execute(params![
                interval.start,
                duration_ms,
                door.get(),
                interval.start,
                interval.end
            ])?;
            summary.created += 1;
            debug!(door = %door, start = interval.start, end = interval.end, "created {}", kind.label());
            continue;
        };

        summary.already_existing += 1;
        if (stored.start_ms, stored.duration_ms, stored.door_id)
            != (interval.start, duration_ms, door.get())
        {
            warn!(
                door = %door,
                id = stored.id,
                stored_start = stored.start_ms,
                fresh_start = interval.start,
                stored_duration = stored.duration_ms,
                fresh_duration = duration_ms,
                stored_door = stored.door_id,
                "stored {} disagrees with events; replacing",
                kind.label()
            );
            correct.execute(params![interval.start, duration_ms, door.get(), stored.id])?;
            summary.corrected += 1;
        }
    }
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{db_with_doors, ingest_contacts, ingest_updown};

    fn spans(openings: &[OpeningRecord]) -> Vec<(i64, i64, i64)> {
        openings
            .iter()
            .map(|o| (o.door.get(), o.start_ms, o.duration_ms))
            .collect()
    }

    #[test]
    fn single_opening_from_open_and_close() {
        let (mut db, doors) = db_with_doors(1);
        ingest_contacts(&mut db, doors[0], &[(1_000, true), (1_100, false)]);

        let summary = db.update_openings(doors[0], RebuildMode::Incremental).unwrap();
        assert_eq!(summary.processed, 2);
        assert_eq!(summary.created, 1);
        assert_eq!(summary.orphaned, 0);

        let openings = db.list_openings(None).unwrap();
        assert_eq!(openings.len(), 1);
        assert_eq!(openings[0].start_ms, 1_000);
        assert_eq!(openings[0].duration_ms, 100);
        assert_eq!(openings[0].open_event, 1_000);
        assert_eq!(openings[0].close_event, 1_100);
        assert_eq!(openings[0].visit_id, None);
    }

    #[test]
    fn bounced_open_is_orphaned() {
        let (mut db, doors) = db_with_doors(1);
        ingest_contacts(&mut db, doors[0], &[(1_000, true), (1_050, true), (1_100, false)]);

        let summary = db.update_openings(doors[0], RebuildMode::Incremental).unwrap();
        assert_eq!(summary.created, 1);
        assert_eq!(summary.orphaned, 1);
        assert_eq!(spans(&db.list_openings(None).unwrap()), vec![(1, 1_050, 50)]);

        let orphans: Vec<i64> = db
            .orphan_events(None)
            .unwrap()
            .iter()
            .map(|e| e.timestamp)
            .collect();
        assert_eq!(orphans, vec![1_000]);
    }

    #[test]
    fn trailing_orphan_is_counted_by_each_pass_that_replays_it() {
        let (mut db, doors) = db_with_doors(1);
        ingest_contacts(&mut db, doors[0], &[(10, true), (20, false), (25, false)]);

        let first = db.update_openings(doors[0], RebuildMode::Incremental).unwrap();
        assert_eq!((first.processed, first.created, first.orphaned), (3, 1, 1));

        let second = db.update_openings(doors[0], RebuildMode::Incremental).unwrap();
        assert_eq!((second.processed, second.created, second.orphaned), (1, 0, 1));
        assert_eq!(db.orphan_events(None).unwrap().len(), 1);
    }

    #[test]
    fn incremental_update_is_idempotent() {
        let (mut db, doors) = db_with_doors(1);
        ingest_contacts(
            &mut db,
            doors[0],
            &[(10, true), (20, false), (30, true), (40, false), (50, true)],
        );

        let first = db.update_openings(doors[0], RebuildMode::Incremental).unwrap();
        assert_eq!(first.created, 2);
        let before = db.list_openings(None).unwrap();

        let second = db.update_openings(doors[0], RebuildMode::Incremental).unwrap();
        assert_eq!(second.created, 0);
        assert_eq!(second.already_existing, 0);
        // Only the pending open after the last close is replayed.
        assert_eq!(second.processed, 1);
        assert_eq!(db.list_openings(None).unwrap(), before);
    }

    #[test]
    fn rebuild_finds_existing_rows() {
        let (mut db, doors) = db_with_doors(1);
        ingest_contacts(&mut db, doors[0], &[(10, true), (20, false), (30, true), (40, false)]);
        db.update_openings(doors[0], RebuildMode::Incremental).unwrap();
        let before = db.list_openings(None).unwrap();

        let summary = db.update_openings(doors[0], RebuildMode::Rebuild).unwrap();
        assert_eq!(summary.processed, 4);
        assert_eq!(summary.created, 0);
        assert_eq!(summary.already_existing, 2);
        assert_eq!(summary.corrected, 0);
        assert_eq!(db.list_openings(None).unwrap(), before);
    }

    #[test]
    fn hard_rebuild_recreates_rows() {
        let (mut db, doors) = db_with_doors(1);
        ingest_contacts(&mut db, doors[0], &[(10, true), (20, false), (30, true), (40, false)]);
        db.update_openings(doors[0], RebuildMode::Incremental).unwrap();

        let summary = db.update_openings(doors[0], RebuildMode::HardRebuild).unwrap();
        assert_eq!(summary.created, 2);
        assert_eq!(summary.already_existing, 0);
        assert_eq!(spans(&db.list_openings(None).unwrap()), vec![(1, 10, 10), (1, 30, 10)]);
    }

    #[test]
    fn rebuild_corrects_tampered_rows() {
        let (mut db, doors) = db_with_doors(1);
        ingest_contacts(&mut db, doors[0], &[(10, true), (20, false)]);
        db.update_openings(doors[0], RebuildMode::Incremental).unwrap();
        db.conn
            .execute("UPDATE openings SET duration_ms = 999", [])
            .unwrap();

        let summary = db.update_openings(doors[0], RebuildMode::Rebuild).unwrap();
        assert_eq!(summary.already_existing, 1);
        assert_eq!(summary.corrected, 1);
        assert_eq!(spans(&db.list_openings(None).unwrap()), vec![(1, 10, 10)]);
    }

    #[test]
    fn batch_by_batch_matches_single_pass() {
        let batches: [&[(i64, bool)]; 4] = [
            &[(5, false), (10, true), (15, true)],
            &[(40, false), (90, true)],
            &[(95, false), (96, false), (120, true)],
            &[(130, true), (150, false), (170, true)],
        ];

        let (mut incremental, doors) = db_with_doors(1);
        for batch in batches {
            ingest_contacts(&mut incremental, doors[0], batch);
            incremental
                .update_openings(doors[0], RebuildMode::Incremental)
                .unwrap();
        }

        let (mut single, single_doors) = db_with_doors(1);
        let all: Vec<(i64, bool)> = batches.iter().flat_map(|b| b.iter().copied()).collect();
        ingest_contacts(&mut single, single_doors[0], &all);
        single
            .update_openings(single_doors[0], RebuildMode::Incremental)
            .unwrap();

        assert_eq!(
            spans(&incremental.list_openings(None).unwrap()),
            spans(&single.list_openings(None).unwrap())
        );
        assert_eq!(
            spans(&single.list_openings(None).unwrap()),
            vec![(1, 15, 25), (1, 90, 5), (1, 130, 20)]
        );
    }

    #[test]
    fn unreadable_contact_values_are_malformed() {
        let (mut db, doors) = db_with_doors(1);
        ingest_contacts(&mut db, doors[0], &[(10, true), (30, false)]);
        db.conn
            .execute(
                "INSERT INTO events (timestamp, door_id, code, type, value, source) VALUES (20, ?, 'doorcontact_state', 'data report', 'ajar', 'device itself')",
                [doors[0].get()],
            )
            .unwrap();

        let summary = db.update_openings(doors[0], RebuildMode::Incremental).unwrap();
        assert_eq!(summary.processed, 3);
        assert_eq!(summary.malformed, 1);
        assert_eq!(summary.created, 1);
    }

    #[test]
    fn all_doors_are_updated() {
        let (mut db, doors) = db_with_doors(3);
        ingest_contacts(&mut db, doors[0], &[(10, true), (20, false)]);
        ingest_contacts(&mut db, doors[1], &[(15, true), (25, false)]);
        ingest_contacts(&mut db, doors[2], &[(12, false)]);

        let summary = db.update_all_openings(RebuildMode::Incremental).unwrap();
        assert_eq!(summary.created, 2);
        assert_eq!(summary.orphaned, 1);
        assert_eq!(summary.processed, 5);
        assert_eq!(spans(&db.list_openings(None).unwrap()), vec![(1, 10, 10), (2, 15, 10)]);
        assert_eq!(db.list_openings(Some(doors[1])).unwrap().len(), 1);
    }

    #[test]
    fn unknown_door_is_rejected() {
        let (mut db, _) = db_with_doors(1);
        let err = db
            .update_openings(DoorId::new(42).unwrap(), RebuildMode::Incremental)
            .unwrap_err();
        assert!(matches!(err, DbError::UnknownDoor(_)));
    }

    #[test]
    fn uptimes_anchor_at_first_online() {
        let (mut db, doors) = db_with_doors(1);
        ingest_updown(&mut db, doors[0], &[(0, true), (10, true), (100, false), (150, false)]);
        // Contact events are a different code and never reach the uptime pass.
        ingest_contacts(&mut db, doors[0], &[(50, true)]);

        let summary = db.update_uptimes(doors[0], RebuildMode::Incremental).unwrap();
        assert_eq!(summary.processed, 4);
        assert_eq!(summary.created, 1);
        assert_eq!(summary.orphaned, 2);

        let uptimes = db.list_uptimes(Some(doors[0])).unwrap();
        assert_eq!(uptimes.len(), 1);
        assert_eq!(uptimes[0].online_event, 0);
        assert_eq!(uptimes[0].offline_event, 100);
        assert_eq!(uptimes[0].duration_ms, 100);
    }

    #[test]
    fn uptimes_resume_after_last_offline() {
        let (mut db, doors) = db_with_doors(1);
        ingest_updown(&mut db, doors[0], &[(1, true), (100, false)]);
        db.update_all_uptimes(RebuildMode::Incremental).unwrap();

        ingest_updown(&mut db, doors[0], &[(200, true), (300, false)]);
        let summary = db.update_all_uptimes(RebuildMode::Incremental).unwrap();
        assert_eq!(summary.processed, 2);
        assert_eq!(summary.created, 1);
        assert_eq!(db.list_uptimes(None).unwrap().len(), 2);
        assert!(db.list_openings(None).unwrap().is_empty());
    }
}

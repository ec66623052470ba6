//! Visit update pass and the full pipeline.

use rusqlite::{Connection, OptionalExtension, params};
use serde::Serialize;
use tracing::{debug, info, warn};

use dt_core::{
    DoorId, Overlap, PlannedVisit, RebuildMode, VisitConfig, VisitContext, plan_visits,
};

use crate::intervals::opening_from_row;
use crate::{Database, DbError, OpeningRecord, ReconstructionSummary, door_ids};

/// Counters reported by a visit pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct VisitSummary {
    /// Openings replayed in the window.
    pub processed_openings: usize,
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    /// Stored visits whose prior quiet time disagreed with the openings.
    pub corrected: usize,
    /// Visits in the window no opening belongs to anymore.
    pub removed: usize,
}

impl VisitSummary {
    #[must_use]
    pub const fn created_or_updated(&self) -> usize {
        self.created + self.updated + self.corrected
    }
}

/// A stored visit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VisitRecord {
    pub id: i64,
    pub start_ms: i64,
    pub duration_ms: i64,
    pub prior_quiet_ms: Option<i64>,
    /// Door of each member opening, in opening order.
    pub doors: Vec<DoorId>,
    pub overlaps: Vec<Overlap>,
}

impl VisitRecord {
    #[must_use]
    pub const fn end_ms(&self) -> i64 {
        self.start_ms + self.duration_ms
    }
}

/// Counters for one run of every update pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PipelineSummary {
    pub openings: ReconstructionSummary,
    pub uptimes: ReconstructionSummary,
    pub visits: VisitSummary,
}

struct StoredVisit {
    id: i64,
    duration_ms: i64,
    prior_quiet_ms: Option<i64>,
    doors: String,
    overlaps: String,
}

impl Database {
    /// Runs the opening, uptime and visit passes in order with one mode.
    pub fn run_pipeline(
        &mut self,
        mode: RebuildMode,
        config: &VisitConfig,
    ) -> Result<PipelineSummary, DbError> {
        let openings = self.update_all_openings(mode)?;
        let uptimes = self.update_all_uptimes(mode)?;
        let visits = self.update_visits(mode, config)?;
        Ok(PipelineSummary {
            openings,
            uptimes,
            visits,
        })
    }

    /// Groups stored openings into visits.
    ///
    /// An incremental pass replays openings from the start of the stored
    /// visit holding the earliest unassigned opening (the latest visit when
    /// every opening is assigned), stepping back a visit at a time while the
    /// window would join the visit before it. Any other mode replays every
    /// opening; a hard rebuild first drops all visits.
    pub fn update_visits(
        &mut self,
        mode: RebuildMode,
        config: &VisitConfig,
    ) -> Result<VisitSummary, DbError> {
        let tx = self.conn.transaction()?;

        if mode == RebuildMode::HardRebuild {
            tx.execute("UPDATE openings SET visit_id = NULL", [])?;
            let deleted = tx.execute("DELETE FROM visits", [])?;
            info!(deleted, "cleared stored visits");
        }

        let (window_start, context) = if mode.resumes() {
            resume_window(&tx, config)?
        } else {
            (None, VisitContext::default())
        };

        let openings = load_openings(&tx, window_start)?;
        let door_set = door_ids(&tx)?;
        let planned = plan_visits(&openings, &context, &door_set, config);
        debug!(
            window_start,
            previous_end = context.previous_end,
            openings = openings.len(),
            visits = planned.len(),
            "planned visits"
        );

        let mut summary = VisitSummary {
            processed_openings: openings.len(),
            ..VisitSummary::default()
        };
        let mut assign = tx.prepare("UPDATE openings SET visit_id = ? WHERE id = ?")?;
        for visit in &planned {
            let id = upsert_visit(&tx, visit, &mut summary)?;
            for opening_id in &visit.opening_ids {
                assign.execute(params![id, opening_id])?;
            }
        }
        drop(assign);

        summary.removed = tx.execute(
            "
            DELETE FROM visits
            WHERE (?1 IS NULL OR start_ms >= ?1)
              AND NOT EXISTS (SELECT 1 FROM openings o WHERE o.visit_id = visits.id)
            ",
            [window_start],
        )?;
        tx.commit()?;

        info!(
            mode = %mode,
            processed_openings = summary.processed_openings,
            created = summary.created,
            updated = summary.updated,
            unchanged = summary.unchanged,
            corrected = summary.corrected,
            removed = summary.removed,
            "updated visits"
        );
        Ok(summary)
    }

    /// Lists visits, newest first.
    pub fn list_visits(&self, limit: Option<usize>) -> Result<Vec<VisitRecord>, DbError> {
        let limit = limit.map_or(-1, |n| i64::try_from(n).unwrap_or(i64::MAX));
        let mut stmt = self.conn.prepare(
            "
            SELECT id, start_ms, duration_ms, prior_quiet_ms, doors, overlaps
            FROM visits
            ORDER BY start_ms DESC
            LIMIT ?
            ",
        )?;
        let rows = stmt.query_map([limit], |row| {
            Ok((
                row.get::<_, i64>(1)?,
                StoredVisit {
                    id: row.get(0)?,
                    duration_ms: row.get(2)?,
                    prior_quiet_ms: row.get(3)?,
                    doors: row.get(4)?,
                    overlaps: row.get(5)?,
                },
            ))
        })?;

        let mut visits = Vec::new();
        for row in rows {
            let (start_ms, stored) = row?;
            visits.push(VisitRecord {
                id: stored.id,
                start_ms,
                duration_ms: stored.duration_ms,
                prior_quiet_ms: stored.prior_quiet_ms,
                doors: serde_json::from_str(&stored.doors)?,
                overlaps: serde_json::from_str(&stored.overlaps)?,
            });
        }
        Ok(visits)
    }

    /// Member openings of a visit in start order.
    pub fn visit_openings(&self, visit_id: i64) -> Result<Vec<OpeningRecord>, DbError> {
        let mut stmt = self.conn.prepare(
            "
            SELECT id, door_id, start_ms, duration_ms, open_event, close_event, visit_id
            FROM openings
            WHERE visit_id = ?
            ORDER BY start_ms ASC, id ASC
            ",
        )?;
        let rows = stmt.query_map([visit_id], opening_from_row)?;
        let mut openings = Vec::new();
        for row in rows {
            openings.push(row?);
        }
        Ok(openings)
    }
}

/// Picks where an incremental pass starts replaying openings.
///
/// The window begins at a stored visit start that is still a visit boundary:
/// no unassigned opening lies before it and its first opening is more than
/// the separation away from every earlier opening. `None` replays everything.
fn resume_window(
    conn: &Connection,
    config: &VisitConfig,
) -> Result<(Option<i64>, VisitContext), DbError> {
    let earliest_unassigned: Option<i64> = conn.query_row(
        "SELECT MIN(start_ms) FROM openings WHERE visit_id IS NULL",
        [],
        |row| row.get(0),
    )?;
    let mut candidate = visit_start_at_or_before(conn, earliest_unassigned.unwrap_or(i64::MAX))?;

    while let Some(start) = candidate {
        let previous_end = latest_end_before(conn, start)?;
        let first_start: Option<i64> = conn.query_row(
            "SELECT MIN(start_ms) FROM openings WHERE start_ms >= ?",
            [start],
            |row| row.get(0),
        )?;
        let joins_previous = match (previous_end, first_start) {
            (Some(end), Some(first)) => first - end <= config.separation_ms,
            _ => false,
        };
        if !joins_previous {
            return Ok((Some(start), VisitContext { previous_end }));
        }
        debug!(start, "replay window joins the previous visit; stepping back");
        candidate = visit_start_at_or_before(conn, start - 1)?;
    }
    Ok((None, VisitContext::default()))
}

fn visit_start_at_or_before(conn: &Connection, bound: i64) -> Result<Option<i64>, DbError> {
    let start: Option<i64> = conn.query_row(
        "SELECT MAX(start_ms) FROM visits WHERE start_ms <= ?",
        [bound],
        |row| row.get(0),
    )?;
    Ok(start)
}

/// Latest end among openings that start before `start`.
fn latest_end_before(conn: &Connection, start: i64) -> Result<Option<i64>, DbError> {
    let end: Option<i64> = conn.query_row(
        "SELECT MAX(start_ms + duration_ms) FROM openings WHERE start_ms < ?",
        [start],
        |row| row.get(0),
    )?;
    Ok(end)
}

fn load_openings(conn: &Connection, from: Option<i64>) -> Result<Vec<OpeningRecord>, DbError> {
    let mut stmt = conn.prepare(
        "
        SELECT id, door_id, start_ms, duration_ms, open_event, close_event, visit_id
        FROM openings
        WHERE ?1 IS NULL OR start_ms >= ?1
        ORDER BY start_ms ASC, id ASC
        ",
    )?;
    let rows = stmt.query_map([from], opening_from_row)?;
    let mut openings = Vec::new();
    for row in rows {
        openings.push(row?);
    }
    Ok(openings)
}

/// Writes one planned visit keyed by its start and returns its row ID.
fn upsert_visit(
    conn: &Connection,
    visit: &PlannedVisit,
    summary: &mut VisitSummary,
) -> Result<i64, DbError> {
    let doors = serde_json::to_string(&visit.doors)?;
    let overlaps = serde_json::to_string(&visit.overlaps)?;
    let duration_ms = visit.duration_ms();

    let stored = conn
        .query_row(
            "SELECT id, duration_ms, prior_quiet_ms, doors, overlaps FROM visits WHERE start_ms = ?",
            [visit.start],
            |row| {
                Ok(StoredVisit {
                    id: row.get(0)?,
                    duration_ms: row.get(1)?,
                    prior_quiet_ms: row.get(2)?,
                    doors: row.get(3)?,
                    overlaps: row.get(4)?,
                })
            },
        )
        .optional()?;

    let Some(stored) = stored else {
        conn.execute(
            "INSERT INTO visits (start_ms, duration_ms, prior_quiet_ms, doors, overlaps) VALUES (?, ?, ?, ?, ?)",
            params![visit.start, duration_ms, visit.prior_quiet_ms, doors, overlaps],
        )?;
        summary.created += 1;
        return Ok(conn.last_insert_rowid());
    };

    let quiet_differs = stored.prior_quiet_ms != visit.prior_quiet_ms;
    let changed = stored.duration_ms != duration_ms || stored.doors != doors || stored.overlaps != overlaps;
    if !quiet_differs && !changed {
        summary.unchanged += 1;
        return Ok(stored.id);
    }

    if quiet_differs {
        warn!(
            id = stored.id,
            start = visit.start,
            stored = ?stored.prior_quiet_ms,
            fresh = ?visit.prior_quiet_ms,
            "stored visit prior quiet time disagrees with openings; replacing"
        );
        summary.corrected += 1;
    } else {
        summary.updated += 1;
    }
    conn.execute(
        "UPDATE visits SET duration_ms = ?, prior_quiet_ms = ?, doors = ?, overlaps = ? WHERE id = ?",
        params![duration_ms, visit.prior_quiet_ms, doors, overlaps, stored.id],
    )?;
    Ok(stored.id)
}

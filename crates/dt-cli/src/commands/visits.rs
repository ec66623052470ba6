//! Visits command for listing recent visits.

use std::fmt::Write as _;
use std::io::Write;

use anyhow::Result;
use serde::Serialize;

use dt_core::Overlap;
use dt_core::time::{format_duration_ms, format_millis};
use dt_db::{Database, VisitRecord};

/// JSON shape of one visit.
#[derive(Debug, Serialize)]
struct VisitEntry<'a> {
    id: i64,
    start: String,
    start_ms: i64,
    duration_ms: i64,
    prior_quiet_ms: Option<i64>,
    doors: Vec<i64>,
    overlaps: &'a [Overlap],
}

impl<'a> VisitEntry<'a> {
    fn new(visit: &'a VisitRecord) -> Self {
        Self {
            id: visit.id,
            start: format_millis(visit.start_ms),
            start_ms: visit.start_ms,
            duration_ms: visit.duration_ms,
            prior_quiet_ms: visit.prior_quiet_ms,
            doors: visit.doors.iter().map(|d| d.get()).collect(),
            overlaps: &visit.overlaps,
        }
    }
}

pub fn run<W: Write>(writer: &mut W, db: &Database, limit: usize, json: bool) -> Result<()> {
    let visits = db.list_visits(Some(limit))?;

    if json {
        let entries: Vec<VisitEntry<'_>> = visits.iter().map(VisitEntry::new).collect();
        writeln!(writer, "{}", serde_json::to_string_pretty(&entries)?)?;
        return Ok(());
    }

    if visits.is_empty() {
        writeln!(writer, "No visits recorded.")?;
        return Ok(());
    }

    for visit in &visits {
        writeln!(writer, "{}", format_visit(visit))?;
    }
    Ok(())
}

fn format_visit(visit: &VisitRecord) -> String {
    let doors: Vec<String> = visit.doors.iter().map(ToString::to_string).collect();
    let quiet = visit
        .prior_quiet_ms
        .map_or_else(|| "first".to_string(), format_duration_ms);
    let mut line = format!(
        "{}  {:>10}  quiet {quiet}  doors {}",
        format_millis(visit.start_ms),
        format_duration_ms(visit.duration_ms),
        doors.join(",")
    );
    for overlap in visit.overlaps.iter().filter(|o| o.door_a < o.door_b) {
        let _ = write!(
            line,
            "  {}+{} {}ms",
            overlap.door_a, overlap.door_b, overlap.duration_ms
        );
    }
    line
}

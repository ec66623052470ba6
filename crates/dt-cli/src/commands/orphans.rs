//! Orphans command: door-contact events left out of every opening.

use std::io::Write;

use anyhow::Result;

use dt_core::DoorId;
use dt_core::time::format_millis;
use dt_db::Database;

pub fn run<W: Write>(writer: &mut W, db: &Database, door: Option<DoorId>, invalid: bool) -> Result<()> {
    let events = if invalid {
        db.invalid_orphans(door)?
    } else {
        db.orphan_events(door)?
    };

    if events.is_empty() {
        let message = if invalid {
            "No invalid orphans."
        } else {
            "No orphan events."
        };
        writeln!(writer, "{message}")?;
        return Ok(());
    }

    for event in &events {
        writeln!(
            writer,
            "door {}  {}  {}",
            event.door,
            format_millis(event.timestamp),
            event.value.as_deref().unwrap_or("-")
        )?;
    }
    writeln!(writer, "{} orphan events", events.len())?;
    Ok(())
}

//! Status command for showing per-door ledger state.

use std::io::Write;

use anyhow::Result;

use dt_core::time::format_millis;
use dt_db::Database;

use crate::Config;

pub fn run<W: Write>(writer: &mut W, db: &Database, config: &Config) -> Result<()> {
    writeln!(writer, "Door tracker status")?;
    writeln!(writer, "Database: {}", config.database_path.display())?;

    let doors = db.door_ids()?;
    if doors.is_empty() {
        writeln!(writer, "No doors registered.")?;
        return Ok(());
    }

    for door in doors {
        let status = db.door_status(door)?;
        let last = status
            .last_event
            .map_or_else(|| "never".to_string(), format_millis);
        writeln!(
            writer,
            "Door {} ({}): {} events, last {last}, fetch from {}",
            status.door.id, status.door.device_id, status.events, status.fetch_cursor
        )?;
        writeln!(
            writer,
            "  {} openings, {} uptimes, {} orphans",
            status.openings, status.uptimes, status.orphans
        )?;
    }
    Ok(())
}

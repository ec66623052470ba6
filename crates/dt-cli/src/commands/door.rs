//! Door registration and listing.

use std::io::Write;

use anyhow::{Context, Result};

use dt_core::DeviceId;
use dt_db::Database;

pub fn add<W: Write>(writer: &mut W, db: &mut Database, device: &str, contents: &str) -> Result<()> {
    let device = DeviceId::new(device).context("invalid device id")?;
    let id = db
        .register_door(&device, contents)
        .with_context(|| format!("failed to register device {device}"))?;
    writeln!(writer, "Registered door {id} for device {device}")?;
    Ok(())
}

pub fn list<W: Write>(writer: &mut W, db: &Database) -> Result<()> {
    let doors = db.list_doors()?;
    if doors.is_empty() {
        writeln!(writer, "No doors registered.")?;
        return Ok(());
    }
    for door in doors {
        if door.contents.is_empty() {
            writeln!(writer, "{}  {}", door.id, door.device_id)?;
        } else {
            writeln!(writer, "{}  {}  {}", door.id, door.device_id, door.contents)?;
        }
    }
    Ok(())
}

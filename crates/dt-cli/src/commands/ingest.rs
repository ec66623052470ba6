//! Ingest command: stores one raw log batch and brings derived tables up to date.

use std::io::Write;

use anyhow::{Context, Result};

use dt_core::{DoorId, RawLogBatch, RebuildMode};
use dt_db::Database;

use super::util::write_pipeline;
use crate::Config;

/// Parses `input` as a log batch, stores it for `door`, then runs the
/// incremental pipeline unless `update` is false.
pub fn run<W: Write>(
    writer: &mut W,
    db: &mut Database,
    config: &Config,
    door: DoorId,
    input: &str,
    update: bool,
) -> Result<()> {
    let batch = RawLogBatch::from_json(input).context("failed to parse log batch")?;
    if let Some((first, last)) = batch.time_span() {
        tracing::debug!(door = %door, first, last, fetches = batch.fetches, "parsed log batch");
    }

    let summary = db
        .ingest_batch(door, &batch, &config.supported_codes)
        .with_context(|| format!("failed to ingest batch for door {door}"))?;
    writeln!(
        writer,
        "Ingested {} records for door {door}: {} new, {} already stored, {} unsupported, {} malformed",
        summary.fetched,
        summary.inserted,
        summary.already_stored,
        summary.unsupported,
        summary.malformed
    )?;
    if batch.has_next {
        match &batch.next_row_key {
            Some(key) => writeln!(writer, "More logs pending after row key {key}")?,
            None => writeln!(writer, "More logs pending")?,
        }
    }

    if update {
        let visit_config = config.visit_config().context("invalid visit separation")?;
        let pipeline = db.run_pipeline(RebuildMode::Incremental, &visit_config)?;
        write_pipeline(writer, &pipeline)?;
    }
    Ok(())
}

//! Update command: runs one or all derivation passes.

use std::io::Write;

use anyhow::{Context, Result};

use dt_core::{RebuildMode, VisitConfig};
use dt_db::Database;

use super::util::{write_pipeline, write_reconstruction, write_visits};
use crate::UpdateTarget;

pub fn run<W: Write>(
    writer: &mut W,
    db: &mut Database,
    target: UpdateTarget,
    mode: RebuildMode,
    visit_config: &VisitConfig,
) -> Result<()> {
    tracing::debug!(?target, %mode, "running update");
    match target {
        UpdateTarget::Openings => {
            let summary = db
                .update_all_openings(mode)
                .context("failed to update openings")?;
            write_reconstruction(writer, "openings", &summary)?;
        }
        UpdateTarget::Uptimes => {
            let summary = db
                .update_all_uptimes(mode)
                .context("failed to update uptimes")?;
            write_reconstruction(writer, "uptimes", &summary)?;
        }
        UpdateTarget::Visits => {
            let summary = db
                .update_visits(mode, visit_config)
                .context("failed to update visits")?;
            write_visits(writer, &summary)?;
        }
        UpdateTarget::All => {
            let summary = db
                .run_pipeline(mode, visit_config)
                .context("failed to run update pipeline")?;
            write_pipeline(writer, &summary)?;
        }
    }
    Ok(())
}

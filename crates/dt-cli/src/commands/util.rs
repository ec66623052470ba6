//! Shared output helpers for CLI commands.

use std::io::Write;

use anyhow::Result;

use dt_db::{PipelineSummary, ReconstructionSummary, VisitSummary};

/// One line per opening or uptime pass.
pub fn write_reconstruction<W: Write>(
    writer: &mut W,
    label: &str,
    summary: &ReconstructionSummary,
) -> Result<()> {
    write!(
        writer,
        "{label}: {} events, {} created, {} existing, {} orphaned",
        summary.processed, summary.created, summary.already_existing, summary.orphaned
    )?;
    if summary.malformed > 0 {
        write!(writer, ", {} malformed", summary.malformed)?;
    }
    if summary.corrected > 0 {
        write!(writer, ", {} corrected", summary.corrected)?;
    }
    writeln!(writer)?;
    Ok(())
}

pub fn write_visits<W: Write>(writer: &mut W, summary: &VisitSummary) -> Result<()> {
    write!(
        writer,
        "visits: {} openings, {} created, {} updated, {} unchanged",
        summary.processed_openings, summary.created, summary.updated, summary.unchanged
    )?;
    if summary.corrected > 0 {
        write!(writer, ", {} corrected", summary.corrected)?;
    }
    if summary.removed > 0 {
        write!(writer, ", {} removed", summary.removed)?;
    }
    writeln!(writer)?;
    Ok(())
}

pub fn write_pipeline<W: Write>(writer: &mut W, summary: &PipelineSummary) -> Result<()> {
    write_reconstruction(writer, "openings", &summary.openings)?;
    write_reconstruction(writer, "uptimes", &summary.uptimes)?;
    write_visits(writer, &summary.visits)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn optional_counters_only_when_nonzero() {
        let mut output = Vec::new();
        let quiet = ReconstructionSummary {
            processed: 4,
            created: 2,
            ..ReconstructionSummary::default()
        };
        write_reconstruction(&mut output, "openings", &quiet).unwrap();
        let noisy = ReconstructionSummary {
            processed: 3,
            malformed: 1,
            corrected: 2,
            ..ReconstructionSummary::default()
        };
        write_reconstruction(&mut output, "uptimes", &noisy).unwrap();

        insta::assert_snapshot!(String::from_utf8(output).unwrap(), @r"
        openings: 4 events, 2 created, 0 existing, 0 orphaned
        uptimes: 3 events, 0 created, 0 existing, 0 orphaned, 1 malformed, 2 corrected
        ");
    }
}

//! CLI subcommand implementations.

pub mod door;
pub mod ingest;
pub mod orphans;
pub mod status;
pub mod update;
mod util;
pub mod visits;

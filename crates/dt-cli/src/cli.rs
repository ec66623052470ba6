//! Command-line argument definitions.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use dt_core::{DoorId, RebuildMode};

/// Door sensor tracker.
///
/// Keeps a ledger of contact sensor events per door and derives openings,
/// sensor uptimes and multi-door visits from it.
#[derive(Debug, Parser)]
#[command(name = "dt", version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to config file.
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Register or list doors.
    #[command(subcommand)]
    Door(DoorAction),

    /// Ingest a raw cloud log batch for one door.
    Ingest {
        /// Door the batch belongs to.
        #[arg(long, value_parser = parse_door_id)]
        door: DoorId,

        /// JSON file to read; stdin when omitted.
        file: Option<PathBuf>,

        /// Skip the update passes after ingesting.
        #[arg(long)]
        no_update: bool,
    },

    /// Run update passes.
    Update {
        /// What to update.
        #[arg(value_enum, default_value_t = UpdateTarget::All)]
        target: UpdateTarget,

        #[command(flatten)]
        rebuild: RebuildArgs,
    },

    /// Show per-door ledger status.
    Status,

    /// List door-contact events that belong to no opening.
    Orphans {
        /// Restrict to one door.
        #[arg(long, value_parser = parse_door_id)]
        door: Option<DoorId>,

        /// Only orphans no bounce explains.
        #[arg(long)]
        invalid: bool,
    },

    /// List recent visits.
    Visits {
        /// Maximum number of visits to show.
        #[arg(long, default_value_t = 20)]
        limit: usize,

        /// Output as JSON.
        #[arg(long)]
        json: bool,
    },
}

/// Door management actions.
#[derive(Debug, Subcommand)]
pub enum DoorAction {
    /// Register a door for a device.
    Add {
        /// Cloud device ID of the contact sensor.
        #[arg(long)]
        device: String,

        /// What is behind the door.
        #[arg(long, default_value = "")]
        contents: String,
    },

    /// List registered doors.
    List,
}

/// Derived tables an update can target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum UpdateTarget {
    Openings,
    Uptimes,
    Visits,
    All,
}

/// Shared rebuild flags.
#[derive(Debug, Clone, Copy, Args)]
pub struct RebuildArgs {
    /// Replay all events, reusing stored rows.
    #[arg(short = 'r', long)]
    pub rebuild: bool,

    /// Delete derived rows, then replay all events.
    #[arg(short = 'R', long)]
    pub hard_rebuild: bool,
}

impl RebuildArgs {
    pub const fn mode(self) -> RebuildMode {
        RebuildMode::from_flags(self.rebuild, self.hard_rebuild)
    }
}

fn parse_door_id(s: &str) -> Result<DoorId, String> {
    let raw: i64 = s.parse().map_err(|_| format!("invalid door id: {s}"))?;
    DoorId::new(raw).map_err(|err| err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_defaults_to_all_incremental() {
        let cli = Cli::try_parse_from(["dt", "update"]).unwrap();
        let Some(Commands::Update { target, rebuild }) = cli.command else {
            panic!("expected update command");
        };
        assert_eq!(target, UpdateTarget::All);
        assert_eq!(rebuild.mode(), RebuildMode::Incremental);
    }

    #[test]
    fn hard_rebuild_short_flag() {
        let cli = Cli::try_parse_from(["dt", "update", "visits", "-R"]).unwrap();
        let Some(Commands::Update { target, rebuild }) = cli.command else {
            panic!("expected update command");
        };
        assert_eq!(target, UpdateTarget::Visits);
        assert_eq!(rebuild.mode(), RebuildMode::HardRebuild);
    }

    #[test]
    fn door_id_must_be_positive() {
        assert!(Cli::try_parse_from(["dt", "ingest", "--door", "0"]).is_err());
        assert!(Cli::try_parse_from(["dt", "ingest", "--door", "x"]).is_err());
        assert!(Cli::try_parse_from(["dt", "ingest", "--door", "3", "batch.json"]).is_ok());
    }
}

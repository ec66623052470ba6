use std::io::Read;
use std::path::Path;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use dt_cli::commands::{door, ingest, orphans, status, update, visits};
use dt_cli::{Cli, Commands, Config, DoorAction};

/// Load config and open database, ensuring the parent directory exists.
fn open_database(config_path: Option<&Path>) -> Result<(dt_db::Database, Config)> {
    let config = Config::load_from(config_path).context("failed to load configuration")?;
    tracing::debug!(?config, "loaded configuration");

    if let Some(parent) = config.database_path.parent() {
        std::fs::create_dir_all(parent).context("failed to create database directory")?;
    }

    let db = dt_db::Database::open(&config.database_path).context("failed to open database")?;
    Ok((db, config))
}

fn read_input(file: Option<&Path>) -> Result<String> {
    let mut input = String::new();
    match file {
        Some(path) => {
            input = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
        }
        None => {
            std::io::stdin()
                .read_to_string(&mut input)
                .context("failed to read log batch from stdin")?;
        }
    }
    Ok(input)
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing with verbose flag support
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env()
    };
    // Use try_init to avoid panic if tracing is already initialized (e.g., in tests)
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();

    let mut stdout = std::io::stdout().lock();

    match &cli.command {
        Some(Commands::Door(action)) => {
            let (mut db, _config) = open_database(cli.config.as_deref())?;
            match action {
                DoorAction::Add { device, contents } => {
                    door::add(&mut stdout, &mut db, device, contents)?;
                }
                DoorAction::List => door::list(&mut stdout, &db)?,
            }
        }
        Some(Commands::Ingest {
            door,
            file,
            no_update,
        }) => {
            let input = read_input(file.as_deref())?;
            let (mut db, config) = open_database(cli.config.as_deref())?;
            ingest::run(&mut stdout, &mut db, &config, *door, &input, !*no_update)?;
        }
        Some(Commands::Update { target, rebuild }) => {
            let (mut db, config) = open_database(cli.config.as_deref())?;
            let visit_config = config.visit_config().context("invalid visit separation")?;
            update::run(&mut stdout, &mut db, *target, rebuild.mode(), &visit_config)?;
        }
        Some(Commands::Status) => {
            let (db, config) = open_database(cli.config.as_deref())?;
            status::run(&mut stdout, &db, &config)?;
        }
        Some(Commands::Orphans { door, invalid }) => {
            let (db, _config) = open_database(cli.config.as_deref())?;
            orphans::run(&mut stdout, &db, *door, *invalid)?;
        }
        Some(Commands::Visits { limit, json }) => {
            let (db, _config) = open_database(cli.config.as_deref())?;
            visits::run(&mut stdout, &db, *limit, *json)?;
        }
        None => {
            // No subcommand, show help
            use clap::CommandFactory;
            Cli::command().print_help()?;
            println!();
        }
    }

    Ok(())
}

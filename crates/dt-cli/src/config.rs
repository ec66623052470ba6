//! Configuration loading and management.

use std::path::{Path, PathBuf};

use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};

use dt_core::{EventCode, ValidationError, VisitConfig};

/// Application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Path to the database file.
    pub database_path: PathBuf,

    /// Openings further apart than this start a new visit.
    pub visit_separation_minutes: i64,

    /// Event codes kept in the ledger; everything else is counted and dropped.
    pub supported_codes: Vec<EventCode>,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs_data_path().unwrap_or_else(|| PathBuf::from("."));
        Self {
            database_path: data_dir.join("dt.db"),
            visit_separation_minutes: 10,
            supported_codes: EventCode::ALL.to_vec(),
        }
    }
}

impl Config {
    /// Loads configuration, optionally from a specific file.
    #[expect(
        clippy::result_large_err,
        reason = "figment::Error is large but only returned at startup"
    )]
    pub fn load_from(config_path: Option<&Path>) -> Result<Self, figment::Error> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Some(config_dir) = dirs_config_path() {
            figment = figment.merge(Toml::file(config_dir.join("config.toml")));
        }

        if let Some(path) = config_path {
            figment = figment.merge(Toml::file(path));
        }

        // DT_DATABASE_PATH, DT_VISIT_SEPARATION_MINUTES, ...
        figment = figment.merge(Env::prefixed("DT_"));

        figment.extract()
    }

    /// Visit aggregation settings.
    pub fn visit_config(&self) -> Result<VisitConfig, ValidationError> {
        VisitConfig::from_minutes(self.visit_separation_minutes)
    }
}

/// Returns the platform-specific config directory for dt.
fn dirs_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("dt"))
}

/// Returns the platform-specific data directory for dt.
///
/// On Linux: `~/.local/share/dt`
pub fn dirs_data_path() -> Option<PathBuf> {
    dirs::data_dir().map(|p| p.join("dt"))
}

//! Translation tables for the device cloud's numeric log fields.
//!
//! The cloud reports `event_id` and `event_from` as small integers. The
//! ledger stores the translated strings so rows stay readable.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::event_code::EventCode;

/// What kind of log entry the cloud recorded (`event_id`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum EventType {
    Online,
    Offline,
    DeviceActivation,
    DeviceReset,
    CommandIssuance,
    FirmwareUpgrade,
    DataReport,
    DeviceSemaphore,
    DeviceRestart,
    TimingInformation,
    Unknown,
}

impl EventType {
    /// Translates the cloud's `event_id`. Unlisted ids map to `Unknown`.
    #[must_use]
    pub const fn from_id(id: i64) -> Self {
        match id {
            1 => Self::Online,
            2 => Self::Offline,
            3 => Self::DeviceActivation,
            4 => Self::DeviceReset,
            5 => Self::CommandIssuance,
            6 => Self::FirmwareUpgrade,
            7 => Self::DataReport,
            8 => Self::DeviceSemaphore,
            9 => Self::DeviceRestart,
            10 => Self::TimingInformation,
            _ => Self::Unknown,
        }
    }

    /// String representation for database storage.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Online => "online",
            Self::Offline => "offline",
            Self::DeviceActivation => "device activation",
            Self::DeviceReset => "device reset",
            Self::CommandIssuance => "command issuance",
            Self::FirmwareUpgrade => "firmware upgrade",
            Self::DataReport => "data report",
            Self::DeviceSemaphore => "device semaphore",
            Self::DeviceRestart => "device restart",
            Self::TimingInformation => "timing information",
            Self::Unknown => "unknown",
        }
    }

    /// Parses a stored type string. Anything unrecognised is `Unknown`.
    #[must_use]
    pub fn from_stored(s: &str) -> Self {
        (1..=10)
            .map(Self::from_id)
            .find(|t| t.as_str() == s)
            .unwrap_or(Self::Unknown)
    }

    /// The code filed for entries that arrive without one.
    ///
    /// The cloud only attaches codes to data reports; sensor up/down
    /// transitions are grouped under `updown_state`.
    #[must_use]
    pub const fn fallback_code(self) -> Option<EventCode> {
        match self {
            Self::Online | Self::Offline => Some(EventCode::UpDown),
            _ => None,
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::from_stored(s))
    }
}

impl From<EventType> for String {
    fn from(value: EventType) -> Self {
        value.as_str().to_string()
    }
}

impl TryFrom<String> for EventType {
    type Error = std::convert::Infallible;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Ok(Self::from_stored(&value))
    }
}

/// Who triggered a log entry (`event_from`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventSource {
    Device,
    Client,
    ThirdParty,
    Cloud,
    Unknown,
}

impl EventSource {
    /// Translates the cloud's `event_from`. Unlisted values map to `Unknown`.
    #[must_use]
    pub const fn from_id(id: i64) -> Self {
        match id {
            1 => Self::Device,
            2 => Self::Client,
            3 => Self::ThirdParty,
            4 => Self::Cloud,
            _ => Self::Unknown,
        }
    }

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Device => "device itself",
            Self::Client => "client instructions",
            Self::ThirdParty => "third-party platforms",
            Self::Cloud => "cloud instructions",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for EventSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

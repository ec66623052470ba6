//! Event code enum as the single source of truth for event code strings.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Event codes the ledger stores.
///
/// The cloud only sends codes with "data report" events; online/offline
/// events arrive without one and are filed under [`EventCode::UpDown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventCode {
    DoorContact,
    UpDown,
    Battery,
}

impl EventCode {
    /// Every supported code, in storage order.
    pub const ALL: [Self; 3] = [Self::DoorContact, Self::UpDown, Self::Battery];

    /// String representation for database storage.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::DoorContact => "doorcontact_state",
            Self::UpDown => "updown_state",
            Self::Battery => "battery_state",
        }
    }
}

impl fmt::Display for EventCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for EventCode {
    type Err = UnknownEventCode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "doorcontact_state" => Ok(Self::DoorContact),
            "updown_state" => Ok(Self::UpDown),
            "battery_state" => Ok(Self::Battery),
            _ => Err(UnknownEventCode(s.to_string())),
        }
    }
}

impl Serialize for EventCode {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for EventCode {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Error type for unknown event code strings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownEventCode(pub String);

impl fmt::Display for UnknownEventCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown event code: {}", self.0)
    }
}

impl std::error::Error for UnknownEventCode {}

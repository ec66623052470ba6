//! Event classification.
//!
//! Every ledger event is classified exactly once into [`EventClass`]. The
//! reconstructors only ever look at the class, never at raw strings.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::event_code::EventCode;
use crate::vendor::EventType;

/// Door contact reading. This is an edge, not a level: `Open` moves the
/// door from closed to open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ContactState {
    Open,
    Closed,
}

impl ContactState {
    /// Parses a contact value as the cloud sends it (`"true"`/`"false"`) or
    /// as the ledger stores it (`"Open"`/`"Closed"`).
    pub fn from_value(value: &str) -> Option<Self> {
        match value {
            "true" | "Open" => Some(Self::Open),
            "false" | "Closed" => Some(Self::Closed),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "Open",
            Self::Closed => "Closed",
        }
    }
}

impl fmt::Display for ContactState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The three charge levels the sensor reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatteryLevel {
    Low,
    Middle,
    High,
}

impl BatteryLevel {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Middle => "middle",
            Self::High => "high",
        }
    }
}

impl FromStr for BatteryLevel {
    type Err = EventValueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Self::Low),
            "middle" => Ok(Self::Middle),
            "high" => Ok(Self::High),
            _ => Err(EventValueError::InvalidValue {
                code: EventCode::Battery,
                value: s.to_string(),
            }),
        }
    }
}

/// A supported code whose payload does not make sense.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EventValueError {
    #[error("{code} event has no value")]
    MissingValue { code: EventCode },

    #[error("{code} event has invalid value {value:?}")]
    InvalidValue { code: EventCode, value: String },

    #[error("{code} event has unexpected type {event_type}")]
    UnexpectedType { code: EventCode, event_type: EventType },
}

/// Closed classification of a ledger event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventClass {
    DoorContact(ContactState),
    Online,
    Offline,
    Battery(BatteryLevel),
    /// Anything the pipeline does not consume.
    Unsupported,
}

impl EventClass {
    /// Classifies a supported code with its type and value.
    ///
    /// Up/down events carry their meaning in the type and have no value.
    pub fn classify(
        code: EventCode,
        event_type: EventType,
        value: Option<&str>,
    ) -> Result<Self, EventValueError> {
        match code {
            EventCode::DoorContact => {
                let value = value.ok_or(EventValueError::MissingValue { code })?;
                ContactState::from_value(value)
                    .map(Self::DoorContact)
                    .ok_or_else(|| EventValueError::InvalidValue {
                        code,
                        value: value.to_string(),
                    })
            }
            EventCode::UpDown => match event_type {
                EventType::Online => Ok(Self::Online),
                EventType::Offline => Ok(Self::Offline),
                other => Err(EventValueError::UnexpectedType {
                    code,
                    event_type: other,
                }),
            },
            EventCode::Battery => {
                let value = value.ok_or(EventValueError::MissingValue { code })?;
                value.parse().map(Self::Battery)
            }
        }
    }

    /// Classifies a row read back from storage.
    ///
    /// Rows with an unknown code or an unreadable payload are `Unsupported`.
    pub fn from_stored(code: &str, event_type: &str, value: Option<&str>) -> Self {
        let Ok(code) = code.parse::<EventCode>() else {
            return Self::Unsupported;
        };
        Self::classify(code, EventType::from_stored(event_type), value).unwrap_or(Self::Unsupported)
    }

    /// The code this class is stored under.
    #[must_use]
    pub const fn code(&self) -> Option<EventCode> {
        match self {
            Self::DoorContact(_) => Some(EventCode::DoorContact),
            Self::Online | Self::Offline => Some(EventCode::UpDown),
            Self::Battery(_) => Some(EventCode::Battery),
            Self::Unsupported => None,
        }
    }

    /// The value column as stored. Up/down events have none.
    #[must_use]
    pub const fn value(&self) -> Option<&'static str> {
        match self {
            Self::DoorContact(state) => Some(state.as_str()),
            Self::Battery(level) => Some(level.as_str()),
            Self::Online | Self::Offline | Self::Unsupported => None,
        }
    }
}

/// An event the reconstructors can consume.
///
/// Implemented by the ledger's stored rows and by test fixtures.
pub trait SensorEvent {
    /// Epoch milliseconds; unique across the ledger.
    fn timestamp(&self) -> i64;

    fn class(&self) -> EventClass;
}

//! Core type definitions with validation.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Validation errors for core types.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// The provided value was empty.
    #[error("{field} cannot be empty")]
    Empty { field: &'static str },

    /// A door identifier was zero or negative.
    #[error("door ID must be positive, got {value}")]
    NonPositiveDoorId { value: i64 },

    /// The visit separation threshold was negative.
    #[error("visit separation must not be negative, got {value_ms}ms")]
    NegativeSeparation { value_ms: i64 },

    /// Invalid rebuild mode value.
    #[error("invalid rebuild mode: {value}")]
    InvalidRebuildMode { value: String },
}

/// Generates a validated string ID newtype with common trait implementations.
macro_rules! define_string_id {
    (
        $(#[$meta:meta])*
        $name:ident, $field_name:literal
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            /// Creates a new ID after validation.
            pub fn new(id: impl Into<String>) -> Result<Self, ValidationError> {
                let id = id.into();
                if id.trim().is_empty() {
                    return Err(ValidationError::Empty { field: $field_name });
                }
                Ok(Self(id))
            }

            /// Returns the ID as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl TryFrom<String> for $name {
            type Error = ValidationError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::new(value)
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

define_string_id!(
    /// The upstream cloud's identifier for a door's sensor.
    ///
    /// Device IDs are opaque, non-empty strings assigned by the vendor.
    DeviceId, "device ID"
);

/// A registered door.
///
/// Door IDs are small positive integers assigned at registration. Every
/// pass that iterates doors does so in ascending ID order so results are
/// deterministic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub struct DoorId(i64);

impl DoorId {
    /// Creates a door ID after validation.
    pub fn new(id: i64) -> Result<Self, ValidationError> {
        if id <= 0 {
            return Err(ValidationError::NonPositiveDoorId { value: id });
        }
        Ok(Self(id))
    }

    /// Returns the raw integer value.
    #[must_use]
    pub const fn get(self) -> i64 {
        self.0
    }
}

impl TryFrom<i64> for DoorId {
    type Error = ValidationError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<DoorId> for i64 {
    fn from(id: DoorId) -> Self {
        id.0
    }
}

impl fmt::Display for DoorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How much previously derived state an update pass may reuse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RebuildMode {
    /// Resume after the last derived entity; only new input is processed.
    #[default]
    Incremental,
    /// Replay all input, reconciling against what is already stored.
    Rebuild,
    /// Delete previously derived entities, then replay all input.
    HardRebuild,
}

impl RebuildMode {
    /// Maps the `--rebuild` / `--hard-rebuild` flag pair to a mode.
    ///
    /// A hard rebuild implies a rebuild.
    #[must_use]
    pub const fn from_flags(rebuild: bool, hard_rebuild: bool) -> Self {
        if hard_rebuild {
            Self::HardRebuild
        } else if rebuild {
            Self::Rebuild
        } else {
            Self::Incremental
        }
    }

    /// True when stored derived state is used as the resume point.
    #[must_use]
    pub const fn resumes(self) -> bool {
        matches!(self, Self::Incremental)
    }

    /// String representation for logs.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Incremental => "incremental",
            Self::Rebuild => "rebuild",
            Self::HardRebuild => "hard_rebuild",
        }
    }
}

impl fmt::Display for RebuildMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for RebuildMode {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "incremental" => Ok(Self::Incremental),
            "rebuild" => Ok(Self::Rebuild),
            "hard_rebuild" => Ok(Self::HardRebuild),
            _ => Err(ValidationError::InvalidRebuildMode {
                value: s.to_string(),
            }),
        }
    }
}

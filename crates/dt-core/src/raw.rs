//! Raw log batches as delivered by the device cloud.
//!
//! A batch is either the cloud's response envelope
//! (`{"result": {"logs": [...], "has_next": ...}, "fetches": n}`) or a bare
//! array of log records. Records are kept as JSON values so one bad record
//! never sinks the whole batch; each is classified individually.

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::event::{EventClass, EventValueError};
use crate::event_code::EventCode;
use crate::vendor::{EventSource, EventType};

/// Errors reading a raw batch or one of its records.
#[derive(Debug, Error)]
pub enum RawLogError {
    #[error("invalid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    /// The envelope carried no `result`; usually an API error response.
    #[error("no result in downloaded log: {0}")]
    MissingResult(String),

    #[error("expected a log envelope object or an array of log records")]
    NotABatch,

    #[error("log record is not an object")]
    NotAnObject,

    #[error("log record has no {field}")]
    MissingField { field: &'static str },

    #[error("log record field {field} is not an integer: {value}")]
    InvalidNumber { field: &'static str, value: String },

    #[error(transparent)]
    Value(#[from] EventValueError),
}

/// One downloaded batch of log records for a single door.
#[derive(Debug, Clone, Default)]
pub struct RawLogBatch {
    pub records: Vec<Value>,
    pub has_next: bool,
    pub current_row_key: Option<String>,
    pub next_row_key: Option<String>,
    /// Number of API calls the client needed to assemble the batch.
    pub fetches: u32,
}

#[derive(Debug, Deserialize)]
struct Envelope {
    result: Option<EnvelopeResult>,
    fetches: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct EnvelopeResult {
    #[serde(default)]
    logs: Vec<Value>,
    #[serde(default)]
    has_next: bool,
    current_row_key: Option<String>,
    next_row_key: Option<String>,
}

impl RawLogBatch {
    /// Parses a batch from JSON text.
    pub fn from_json(text: &str) -> Result<Self, RawLogError> {
        let value: Value = serde_json::from_str(text)?;
        Self::from_value(value)
    }

    /// Parses a batch from an already decoded JSON value.
    pub fn from_value(value: Value) -> Result<Self, RawLogError> {
        match value {
            Value::Array(records) => Ok(Self {
                records,
                fetches: 1,
                ..Self::default()
            }),
            Value::Object(_) => {
                let text = value.to_string();
                let envelope: Envelope = serde_json::from_value(value)?;
                let result = envelope
                    .result
                    .ok_or_else(|| RawLogError::MissingResult(truncate(&text, 200)))?;
                Ok(Self {
                    records: result.logs,
                    has_next: result.has_next,
                    current_row_key: result.current_row_key,
                    next_row_key: result.next_row_key,
                    fetches: envelope.fetches.unwrap_or(1),
                })
            }
            _ => Err(RawLogError::NotABatch),
        }
    }

    /// Smallest and largest `event_time` among well-formed records.
    pub fn time_span(&self) -> Option<(i64, i64)> {
        let times = self
            .records
            .iter()
            .filter_map(|r| r.get("event_time").and_then(|v| integer_field(v, "event_time").ok()));
        times.fold(None, |span, t| match span {
            None => Some((t, t)),
            Some((lo, hi)) => Some((lo.min(t), hi.max(t))),
        })
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let mut out: String = text.chars().take(max_chars).collect();
        out.push_str("...");
        out
    }
}

/// A raw record after translation and classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifiedRecord {
    pub timestamp: i64,
    pub event_type: EventType,
    pub source: EventSource,
    /// The code as reported, or the fallback for code-less types.
    pub code: Option<String>,
    pub class: EventClass,
}

impl ClassifiedRecord {
    /// True when the class belongs to one of `codes`.
    pub fn is_supported_by(&self, codes: &[EventCode]) -> bool {
        self.class.code().is_some_and(|c| codes.contains(&c))
    }
}

#[derive(Debug, Deserialize)]
struct RawLogRecord {
    code: Option<String>,
    value: Option<Value>,
    event_time: Option<Value>,
    event_from: Option<Value>,
    event_id: Option<Value>,
}

/// Classifies one raw record.
///
/// Unknown codes yield [`EventClass::Unsupported`]; a supported code with a
/// payload that cannot be read, or a missing/unreadable `event_time`, is an
/// error the caller counts as malformed.
pub fn classify_record(record: &Value) -> Result<ClassifiedRecord, RawLogError> {
    if !record.is_object() {
        return Err(RawLogError::NotAnObject);
    }
    let raw = RawLogRecord::deserialize(record)?;

    let timestamp = raw
        .event_time
        .as_ref()
        .ok_or(RawLogError::MissingField { field: "event_time" })
        .and_then(|v| integer_field(v, "event_time"))?;
    let event_type = raw
        .event_id
        .as_ref()
        .map(|v| integer_field(v, "event_id"))
        .transpose()?
        .map_or(EventType::Unknown, EventType::from_id);
    let source = raw
        .event_from
        .as_ref()
        .map(|v| integer_field(v, "event_from"))
        .transpose()?
        .map_or(EventSource::Unknown, EventSource::from_id);

    let code = raw
        .code
        .filter(|c| !c.is_empty())
        .or_else(|| event_type.fallback_code().map(|c| c.as_str().to_string()));

    let class = match code.as_deref().map(str::parse::<EventCode>) {
        Some(Ok(supported)) => {
            let value = raw.value.as_ref().and_then(value_text);
            EventClass::classify(supported, event_type, value.as_deref())?
        }
        _ => EventClass::Unsupported,
    };

    Ok(ClassifiedRecord {
        timestamp,
        event_type,
        source,
        code,
        class,
    })
}

/// Reads an integer sent either as a JSON number or a numeric string.
fn integer_field(value: &Value, field: &'static str) -> Result<i64, RawLogError> {
    let parsed = match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    };
    parsed.ok_or_else(|| RawLogError::InvalidNumber {
        field,
        value: value.to_string(),
    })
}

/// The textual form of a record value. Booleans become `"true"`/`"false"`.
fn value_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

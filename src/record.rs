//! Decoding of inbound frames into log records.
//!
//! Decoding happens in two steps:
//! - [`decode`] checks that the payload is JSON and nothing more.
//! - [`RawRecord::normalize`] pulls out `level`, `args` and `url`, filling
//!   in defaults for anything missing.
//!
//! Keeping the steps apart lets the connection handler tell a client that
//! sends garbage apart from a client that sends JSON of the wrong shape.

use crate::error::{DecodeError, FieldExtractionError};
use serde_json::{Map, Value};

/// Level used when a frame carries none.
pub const DEFAULT_LEVEL: &str = "unknown";

/// URL used when a frame carries none.
pub const DEFAULT_URL: &str = "unknown";

/// A frame that parsed as JSON but has not been normalized yet.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRecord(Value);

/// A decoded, normalized log record.
#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
    /// Console method the record came from (`log`, `warn`, ...)
    pub level: String,
    /// Arguments passed to the console method, in call order
    pub args: Vec<Value>,
    /// Page the record was sent from
    pub url: String,
}

/// Parse the text payload of one frame.
pub fn decode(raw: &str) -> Result<RawRecord, DecodeError> {
    Ok(RawRecord(serde_json::from_str(raw)?))
}

/// Parse the payload of a binary frame, which must hold UTF-8 JSON.
pub fn decode_bytes(raw: &[u8]) -> Result<RawRecord, DecodeError> {
    decode(std::str::from_utf8(raw)?)
}

impl RawRecord {
    /// Extract the record fields, applying defaults for absent or null fields.
    ///
    /// Fields other than `level`, `args` and `url` are ignored.
    pub fn normalize(self) -> Result<LogRecord, FieldExtractionError> {
        let mut object = match self.0 {
            Value::Object(object) => object,
            other => return Err(FieldExtractionError::NotAnObject(type_name(&other))),
        };

        let level = match take(&mut object, "level") {
            None => DEFAULT_LEVEL.to_string(),
            Some(Value::String(level)) => level,
            Some(other) => {
                return Err(FieldExtractionError::WrongType {
                    field: "level",
                    expected: "a string",
                    found: type_name(&other),
                })
            }
        };

        let args = match take(&mut object, "args") {
            None => Vec::new(),
            Some(Value::Array(args)) => args,
            Some(other) => {
                return Err(FieldExtractionError::WrongType {
                    field: "args",
                    expected: "an array",
                    found: type_name(&other),
                })
            }
        };

        let url = match take(&mut object, "url") {
            None => DEFAULT_URL.to_string(),
            Some(value) => display_value(&value),
        };

        Ok(LogRecord { level, args, url })
    }
}

impl LogRecord {
    /// Level as written to the log line.
    pub fn level_tag(&self) -> String {
        self.level.to_uppercase()
    }

    /// Space-joined string forms of the arguments.
    pub fn message(&self) -> String {
        self.args
            .iter()
            .map(display_value)
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Remove a field, treating an explicit null as absent.
fn take(object: &mut Map<String, Value>, field: &str) -> Option<Value> {
    object.remove(field).filter(|value| !value.is_null())
}

/// Strings render as their contents, everything else as compact JSON.
fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

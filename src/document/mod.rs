//! Telemetry document model.
//!
//! A [`MeasurementDocument`] wraps one parsed JSON submission from a device.
//! Documents are immutable after parsing and shared by `Arc` between the
//! ingest path, the queue, and the consumer.

use serde_json::Value;
use thiserror::Error;

use crate::hash::fnv64a;

/// Document field holding the device display name.
pub const KEY_NAME: &str = "name";

/// Errors raised while reading fields out of a document.
#[derive(Error, Debug)]
pub enum DocumentError {
    #[error("invalid JSON syntax: {0}")]
    Syntax(#[from] serde_json::Error),

    #[error("document root is not a JSON object")]
    NotAnObject,

    #[error("missing `name` field")]
    MissingName,

    #[error("`name` field is not a string")]
    NameNotAString,
}

/// The closed set of measurement kinds the store aggregates.
///
/// Keys outside this set are silently ignored; the set is not data-driven.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MeasurementKind {
    Current,
    Voltage,
    Temperature,
}

impl MeasurementKind {
    /// Returns the document key / report label for this kind.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Current => "current",
            Self::Voltage => "voltage",
            Self::Temperature => "temperature",
        }
    }

    /// All kinds, in report order.
    pub fn all() -> &'static [MeasurementKind] {
        &[Self::Current, Self::Voltage, Self::Temperature]
    }

    /// FNV id of the kind name, used as the aggregation map key.
    pub fn id(self) -> u64 {
        fnv64a(self.as_str().as_bytes())
    }
}

/// One schema-validated telemetry submission from a device.
///
/// Holds the parsed value tree: device name, timestamp, and zero or more
/// measurement objects keyed by [`MeasurementKind`] names.
#[derive(Debug)]
pub struct MeasurementDocument {
    value: Value,
}

impl MeasurementDocument {
    /// Parses raw request bytes into a document.
    ///
    /// Only JSON syntax is checked here; shape is the schema gate's job.
    pub fn from_slice(data: &[u8]) -> Result<Self, DocumentError> {
        let value: Value = serde_json::from_slice(data)?;
        if !value.is_object() {
            return Err(DocumentError::NotAnObject);
        }
        Ok(Self { value })
    }

    /// Borrows the underlying JSON tree (for schema validation).
    pub fn as_value(&self) -> &Value {
        &self.value
    }

    /// Returns the device display name.
    ///
    /// Validated documents always carry one; the error paths exist so the
    /// store can drop malformed records defensively.
    pub fn device_name(&self) -> Result<&str, DocumentError> {
        let field = self.value.get(KEY_NAME).ok_or(DocumentError::MissingName)?;
        field.as_str().ok_or(DocumentError::NameNotAString)
    }

    /// True if the document carries a measurement of the given kind.
    pub fn has_measurement(&self, kind: MeasurementKind) -> bool {
        self.value.get(kind.as_str()).is_some()
    }
}

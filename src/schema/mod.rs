//! JSON Schema gate for incoming documents.
//!
//! The schema is declarative, loaded from disk once at startup, and compiled
//! into a [`jsonschema::Validator`]. A load failure refuses startup entirely:
//! the service never accepts unvalidated documents. The gate itself is
//! boolean; rejection detail stays at the ingest boundary.

use std::path::Path;

use anyhow::{Context, Result};
use jsonschema::Validator;
use serde_json::Value;

/// Compiled measurement-document schema.
pub struct MeasurementSchema {
    validator: Validator,
}

impl MeasurementSchema {
    /// Loads and compiles the schema from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("reading schema file {}", path.display()))?;
        Self::from_str(&data)
            .with_context(|| format!("compiling schema from {}", path.display()))
    }

    /// Compiles a schema from its JSON source text.
    pub fn from_str(schema_json: &str) -> Result<Self> {
        let schema: Value =
            serde_json::from_str(schema_json).context("parsing schema JSON")?;
        let validator = Validator::new(&schema)
            .map_err(|e| anyhow::anyhow!("invalid JSON Schema: {e}"))?;
        Ok(Self { validator })
    }

    /// Checks a document against the compiled schema. Pass/fail only.
    pub fn is_valid(&self, document: &Value) -> bool {
        self.validator.is_valid(document)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const SCHEMA: &str = r#"{
        "type": "object",
        "required": ["name", "timestamp"],
        "properties": {
            "name": {"type": "string", "minLength": 1},
            "timestamp": {"type": "string"},
            "current": {"type": "object"},
            "voltage": {"type": "object"},
            "temperature": {"type": "object"}
        }
    }"#;

    #[test]
    fn test_valid_document_passes() {
        let schema = MeasurementSchema::from_str(SCHEMA).expect("schema compiles");
        let doc = json!({
            "name": "dev-1",
            "timestamp": "2021-03-01T10:00:00.000000UTC",
            "voltage": {"value": 231.5, "unit": "V", "fault": ""},
        });
        assert!(schema.is_valid(&doc));
    }

    #[test]
    fn test_missing_required_field_fails() {
        let schema = MeasurementSchema::from_str(SCHEMA).expect("schema compiles");
        let doc = json!({"timestamp": "t"});
        assert!(!schema.is_valid(&doc));
    }

    #[test]
    fn test_wrong_type_fails() {
        let schema = MeasurementSchema::from_str(SCHEMA).expect("schema compiles");
        let doc = json!({"name": 7, "timestamp": "t"});
        assert!(!schema.is_valid(&doc));
    }

    #[test]
    fn test_invalid_schema_source_is_an_error() {
        assert!(MeasurementSchema::from_str("not json").is_err());
    }

    #[test]
    fn test_missing_schema_file_is_an_error() {
        assert!(MeasurementSchema::load(Path::new("/nonexistent/schema.json")).is_err());
    }
}

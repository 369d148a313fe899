//! Record schema: the field layout of one binarized (instrument, interval,
//! record_type) family (spec §3, "record width is determined by the record
//! type"). Field lists are discovered from a source CSV's header rather
//! than compiled in, since record types are configuration, not code.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tsi_types::error::{CoreError, SemanticError};

/// Every record begins with an 8-byte little-endian millisecond timestamp,
/// followed by one little-endian `f64` per field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordSchema {
    pub record_type: String,
    pub fields: Vec<String>,
}

impl RecordSchema {
    pub fn new(record_type: impl Into<String>, fields: Vec<String>) -> Self {
        Self {
            record_type: record_type.into(),
            fields,
        }
    }

    /// Numeric feature width `D`.
    pub fn width(&self) -> usize {
        self.fields.len()
    }

    /// Byte width of one fixed-width record: 8 (timestamp) + 8*D.
    pub fn record_bytes(&self) -> usize {
        8 + self.fields.len() * 8
    }

    /// Derives a schema from a CSV header: every column except `timestamp`,
    /// in header order.
    pub fn from_csv_header(record_type: impl Into<String>, header: &csv::StringRecord) -> Result<Self, CoreError> {
        let fields: Vec<String> = header.iter().filter(|h| *h != "timestamp").map(str::to_string).collect();
        if fields.is_empty() {
            return Err(CoreError::Semantic(SemanticError(
                "csv header declares no numeric fields besides timestamp".into(),
            )));
        }
        Ok(Self::new(record_type, fields))
    }

    /// Loads a schema sidecar written by [`Self::write_sidecar`].
    pub fn read_sidecar(path: impl AsRef<Path>) -> Result<Self, CoreError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|_| CoreError::IoMissing(path.display().to_string()))?;
        serde_json::from_str(&text).map_err(|e| CoreError::IoCorrupt(format!("{}: {e}", path.display())))
    }

    /// Persists this schema next to its raw/normalized binary pair so a
    /// reader can open the dataset without re-parsing the source CSV.
    pub fn write_sidecar(&self, path: impl AsRef<Path>) -> Result<(), CoreError> {
        let text = serde_json::to_string_pretty(self).map_err(|e| CoreError::Internal(e.to_string()))?;
        std::fs::write(path, text).map_err(CoreError::Io)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derives_schema_from_header_excluding_timestamp() {
        let header = csv::StringRecord::from(vec!["timestamp", "open", "high", "low", "close", "volume"]);
        let schema = RecordSchema::from_csv_header("kline", &header).unwrap();
        assert_eq!(schema.fields, vec!["open", "high", "low", "close", "volume"]);
        assert_eq!(schema.width(), 5);
        assert_eq!(schema.record_bytes(), 8 + 5 * 8);
    }

    #[test]
    fn header_without_numeric_fields_is_rejected() {
        let header = csv::StringRecord::from(vec!["timestamp"]);
        assert!(RecordSchema::from_csv_header("empty", &header).is_err());
    }

    #[test]
    fn sidecar_round_trips_through_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("schema.json");
        let schema = RecordSchema::new("kline", vec!["open".into(), "close".into()]);
        schema.write_sidecar(&path).unwrap();
        let reloaded = RecordSchema::read_sidecar(&path).unwrap();
        assert_eq!(schema, reloaded);
    }
}

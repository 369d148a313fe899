//! CSV to fixed-width binary conversion (spec §4.5 / §4.6): a raw binary
//! sibling of the source CSV plus a z-score normalized sibling computed
//! with a trailing Welford window over each numeric field.

use std::io::Write;
use std::path::Path;

use byteorder::{LittleEndian, WriteBytesExt};
use tsi_math::moments::WindowedMoments;
use tsi_types::error::{CoreError, SemanticError};
use tracing::debug;

use crate::schema::RecordSchema;

struct ParsedRecord {
    timestamp_ms: i64,
    fields: Vec<f64>,
}

/// Parses every row of `csv_path`, deriving the field schema from its
/// header (excluding `timestamp`). Rows are required to be strictly
/// monotonic in `timestamp`; a missing/malformed cell becomes `NaN` rather
/// than aborting the whole ingest (spec §3, "Missing-at-time-t ... NaN").
fn parse_csv(csv_path: &Path, record_type: &str) -> Result<(RecordSchema, Vec<ParsedRecord>), CoreError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_path(csv_path)
        .map_err(|_| CoreError::IoMissing(csv_path.display().to_string()))?;

    let headers = reader.headers().map_err(|e| CoreError::IoCorrupt(e.to_string()))?.clone();
    let schema = RecordSchema::from_csv_header(record_type, &headers)?;
    let ts_idx = headers
        .iter()
        .position(|h| h == "timestamp")
        .ok_or_else(|| CoreError::Semantic(SemanticError(format!("{}: csv has no timestamp column", csv_path.display()))))?;
    let field_idx: Vec<usize> = schema.fields.iter().map(|f| headers.iter().position(|h| h == f).unwrap()).collect();

    let mut records = Vec::new();
    let mut last_ts: Option<i64> = None;
    for result in reader.records() {
        let row = result.map_err(|e| CoreError::IoCorrupt(e.to_string()))?;
        let timestamp_ms: i64 = row
            .get(ts_idx)
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| CoreError::IoCorrupt(format!("{}: unparseable timestamp", csv_path.display())))?;
        if let Some(prev) = last_ts {
            if timestamp_ms <= prev {
                return Err(CoreError::Semantic(SemanticError(format!(
                    "{}: timestamps are not strictly monotonic ({timestamp_ms} after {prev})",
                    csv_path.display()
                ))));
            }
        }
        last_ts = Some(timestamp_ms);

        let fields: Vec<f64> = field_idx.iter().map(|&i| row.get(i).and_then(|s| s.parse::<f64>().ok()).unwrap_or(f64::NAN)).collect();
        records.push(ParsedRecord { timestamp_ms, fields });
    }
    Ok((schema, records))
}

fn write_raw(records: &[ParsedRecord], out_path: &Path) -> Result<(), CoreError> {
    let mut buf = Vec::with_capacity(records.len() * (8 + records.first().map_or(0, |r| r.fields.len() * 8)));
    for r in records {
        buf.write_i64::<LittleEndian>(r.timestamp_ms).map_err(CoreError::Io)?;
        for f in &r.fields {
            buf.write_f64::<LittleEndian>(*f).map_err(CoreError::Io)?;
        }
    }
    std::fs::write(out_path, &buf).map_err(CoreError::Io)
}

/// Writes the normalized sibling. `norm_window == 0` disables normalization
/// (the raw values are copied through unchanged); otherwise each field is
/// z-scored against a trailing [`WindowedMoments`] of size `norm_window`,
/// which naturally expands until full and then slides (spec §4.5's "first
/// `norm_window-1` records are z-scored against an expanding window").
fn write_normalized(records: &[ParsedRecord], width: usize, norm_window: u32, out_path: &Path) -> Result<(), CoreError> {
    let mut buf = Vec::with_capacity(records.len() * (8 + width * 8));
    let mut stats: Vec<WindowedMoments> = if norm_window == 0 {
        Vec::new()
    } else {
        (0..width).map(|_| WindowedMoments::new(norm_window as usize)).collect()
    };

    for r in records {
        buf.write_i64::<LittleEndian>(r.timestamp_ms).map_err(CoreError::Io)?;
        for (i, f) in r.fields.iter().enumerate() {
            let out = if norm_window == 0 {
                *f
            } else if f.is_finite() {
                stats[i].update(*f);
                stats[i].normalize(*f)
            } else {
                f64::NAN
            };
            buf.write_f64::<LittleEndian>(out).map_err(CoreError::Io)?;
        }
    }
    std::fs::write(out_path, &buf).map_err(CoreError::Io)
}

/// Binarizes `csv_path` into `raw_path`/`norm_path` (plus a schema sidecar
/// at `schema_path`), skipping the work entirely when `raw_path` already
/// exists and `force` is false (spec §4.5 idempotence contract).
pub fn binarize_csv(
    csv_path: impl AsRef<Path>,
    record_type: &str,
    norm_window: u32,
    raw_path: impl AsRef<Path>,
    norm_path: impl AsRef<Path>,
    schema_path: impl AsRef<Path>,
    force: bool,
) -> Result<RecordSchema, CoreError> {
    let csv_path = csv_path.as_ref();
    let raw_path = raw_path.as_ref();
    let norm_path = norm_path.as_ref();
    let schema_path = schema_path.as_ref();

    if !force && raw_path.exists() && norm_path.exists() && schema_path.exists() {
        debug!(csv = %csv_path.display(), "binarize skipped: outputs already exist");
        return RecordSchema::read_sidecar(schema_path);
    }

    let (schema, records) = parse_csv(csv_path, record_type)?;
    write_raw(&records, raw_path)?;
    write_normalized(&records, schema.width(), norm_window, norm_path)?;
    schema.write_sidecar(schema_path)?;

    debug!(csv = %csv_path.display(), records = records.len(), "binarize complete");
    Ok(schema)
}

#[cfg(test)]
mod tests {
    use super::*;
    use byteorder::ReadBytesExt;
    use std::io::Cursor;

    fn write_csv(dir: &Path, name: &str, body: &str) -> std::path::PathBuf {
        let path = dir.join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(body.as_bytes()).unwrap();
        path
    }

    fn read_records(path: &Path, width: usize) -> Vec<(i64, Vec<f64>)> {
        let bytes = std::fs::read(path).unwrap();
        let stride = 8 + width * 8;
        let mut out = Vec::new();
        let mut cursor = Cursor::new(bytes);
        while (cursor.position() as usize) < cursor.get_ref().len() {
            let ts = cursor.read_i64::<LittleEndian>().unwrap();
            let fields = (0..width).map(|_| cursor.read_f64::<LittleEndian>().unwrap()).collect();
            out.push((ts, fields));
            let _ = stride;
        }
        out
    }

    #[test]
    fn binarizes_csv_into_raw_and_normalized_siblings() {
        let dir = tempfile::tempdir().unwrap();
        let csv_path = write_csv(
            &dir.path().to_path_buf(),
            "klines.csv",
            "timestamp,open,close\n1000,1.0,2.0\n2000,2.0,3.0\n3000,3.0,4.0\n4000,4.0,5.0\n",
        );
        let raw = dir.path().join("klines.bin");
        let norm = dir.path().join("klines.norm.bin");
        let sidecar = dir.path().join("klines.schema.json");

        let schema = binarize_csv(&csv_path, "kline", 2, &raw, &norm, &sidecar, false).unwrap();
        assert_eq!(schema.fields, vec!["open", "close"]);

        let raw_records = read_records(&raw, 2);
        assert_eq!(raw_records.len(), 4);
        assert_eq!(raw_records[0], (1000, vec![1.0, 2.0]));

        let norm_records = read_records(&norm, 2);
        assert_eq!(norm_records.len(), 4);
        // First record: a one-element window has zero stddev, so normalize() is 0.0.
        assert_eq!(norm_records[0].1, vec![0.0, 0.0]);
    }

    #[test]
    fn norm_window_zero_disables_normalization() {
        let dir = tempfile::tempdir().unwrap();
        let csv_path = write_csv(&dir.path().to_path_buf(), "k.csv", "timestamp,open\n1000,1.0\n2000,2.0\n");
        let raw = dir.path().join("k.bin");
        let norm = dir.path().join("k.norm.bin");
        let sidecar = dir.path().join("k.schema.json");
        binarize_csv(&csv_path, "kline", 0, &raw, &norm, &sidecar, false).unwrap();
        let raw_records = read_records(&raw, 1);
        let norm_records = read_records(&norm, 1);
        assert_eq!(raw_records, norm_records);
    }

    #[test]
    fn non_monotonic_timestamps_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let csv_path = write_csv(&dir.path().to_path_buf(), "k.csv", "timestamp,open\n2000,1.0\n1000,2.0\n");
        let raw = dir.path().join("k.bin");
        let norm = dir.path().join("k.norm.bin");
        let sidecar = dir.path().join("k.schema.json");
        let err = binarize_csv(&csv_path, "kline", 0, &raw, &norm, &sidecar, false).unwrap_err();
        assert_eq!(tsi_types::error::ErrorCode::code(&err), "SEMANTIC");
    }

    #[test]
    fn missing_cell_becomes_nan() {
        let dir = tempfile::tempdir().unwrap();
        let csv_path = write_csv(&dir.path().to_path_buf(), "k.csv", "timestamp,open\n1000,\n2000,2.0\n");
        let raw = dir.path().join("k.bin");
        let norm = dir.path().join("k.norm.bin");
        let sidecar = dir.path().join("k.schema.json");
        binarize_csv(&csv_path, "kline", 0, &raw, &norm, &sidecar, false).unwrap();
        let raw_records = read_records(&raw, 1);
        assert!(raw_records[0].1[0].is_nan());
    }

    #[test]
    fn force_false_skips_rebuild_when_outputs_exist() {
        let dir = tempfile::tempdir().unwrap();
        let csv_path = write_csv(&dir.path().to_path_buf(), "k.csv", "timestamp,open\n1000,1.0\n");
        let raw = dir.path().join("k.bin");
        let norm = dir.path().join("k.norm.bin");
        let sidecar = dir.path().join("k.schema.json");
        binarize_csv(&csv_path, "kline", 0, &raw, &norm, &sidecar, false).unwrap();
        std::fs::write(&csv_path, "timestamp,open\n1000,1.0\n2000,2.0\n").unwrap();
        binarize_csv(&csv_path, "kline", 0, &raw, &norm, &sidecar, false).unwrap();
        assert_eq!(read_records(&raw, 1).len(), 1);
    }
}

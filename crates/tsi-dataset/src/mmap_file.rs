//! Read-only mmap access to one binarized channel file, plus the
//! binary-search timestamp lookup the concat dataset anchors samples with.

use std::path::Path;

use byteorder::{ByteOrder, LittleEndian};
use memmap2::Mmap;
use tsi_types::error::CoreError;

use crate::schema::RecordSchema;

/// One memory-mapped fixed-width record file (spec §3's "memory-mapped file
/// descriptor"). Always opened against the *normalized* binary at sample
/// time; the raw binary is only read to validate shape agreement at open.
pub struct MmapRecordFile {
    mmap: Mmap,
    schema: RecordSchema,
}

impl MmapRecordFile {
    pub fn open(path: impl AsRef<Path>, schema: RecordSchema) -> Result<Self, CoreError> {
        let path = path.as_ref();
        let file = std::fs::File::open(path).map_err(|_| CoreError::IoMissing(path.display().to_string()))?;
        let len = file.metadata().map_err(CoreError::Io)?.len();
        let stride = schema.record_bytes() as u64;
        if len % stride != 0 {
            return Err(CoreError::IoCorrupt(format!(
                "{}: file length {len} is not a multiple of record width {stride}",
                path.display()
            )));
        }
        // Safety: this process holds no write handle to `path`; the dataset
        // layer treats binarized files as immutable once written.
        let mmap = if len == 0 {
            memmap2::MmapOptions::new().len(0).map_anon().map_err(CoreError::Io)?.make_read_only().map_err(CoreError::Io)?
        } else {
            unsafe { Mmap::map(&file).map_err(CoreError::Io)? }
        };
        Ok(Self { mmap, schema })
    }

    pub fn schema(&self) -> &RecordSchema {
        &self.schema
    }

    fn stride(&self) -> usize {
        self.schema.record_bytes()
    }

    pub fn record_count(&self) -> usize {
        if self.stride() == 0 {
            0
        } else {
            self.mmap.len() / self.stride()
        }
    }

    pub fn timestamp_at(&self, idx: usize) -> i64 {
        let off = idx * self.stride();
        LittleEndian::read_i64(&self.mmap[off..off + 8])
    }

    pub fn fields_at(&self, idx: usize) -> Vec<f64> {
        let off = idx * self.stride() + 8;
        (0..self.schema.width()).map(|i| LittleEndian::read_f64(&self.mmap[off + i * 8..off + i * 8 + 8])).collect()
    }

    /// Largest index whose timestamp is `<= ts` (floor semantics, never
    /// interpolated). `None` if `ts` precedes every record or the file is
    /// empty.
    pub fn find_floor(&self, ts: i64) -> Option<usize> {
        let n = self.record_count();
        if n == 0 {
            return None;
        }
        let (mut lo, mut hi) = (0usize, n);
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if self.timestamp_at(mid) <= ts {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        if lo == 0 {
            None
        } else {
            Some(lo - 1)
        }
    }
}

/// Validates that a raw/normalized pair share record count and timestamp
/// sequence (spec §3 invariant), returning the shared record count.
pub fn validate_pair(raw: &MmapRecordFile, norm: &MmapRecordFile) -> Result<usize, CoreError> {
    let n = raw.record_count();
    if n != norm.record_count() {
        return Err(CoreError::IoCorrupt(format!(
            "raw/normalized record count mismatch: {n} vs {}",
            norm.record_count()
        )));
    }
    for i in 0..n {
        if raw.timestamp_at(i) != norm.timestamp_at(i) {
            return Err(CoreError::IoCorrupt(format!("raw/normalized timestamp mismatch at record {i}")));
        }
    }
    Ok(n)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binarize::binarize_csv;
    use std::io::Write;

    fn write_csv(dir: &Path, name: &str, body: &str) -> std::path::PathBuf {
        let path = dir.join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(body.as_bytes()).unwrap();
        path
    }

    #[test]
    fn find_floor_returns_largest_index_not_after_ts() {
        let dir = tempfile::tempdir().unwrap();
        let csv = write_csv(&dir.path().to_path_buf(), "k.csv", "timestamp,open\n1000,1.0\n2000,2.0\n4000,4.0\n");
        let raw = dir.path().join("k.bin");
        let norm = dir.path().join("k.norm.bin");
        let sidecar = dir.path().join("k.schema.json");
        let schema = binarize_csv(&csv, "kline", 0, &raw, &norm, &sidecar, false).unwrap();

        let file = MmapRecordFile::open(&norm, schema).unwrap();
        assert_eq!(file.find_floor(999), None);
        assert_eq!(file.find_floor(1000), Some(0));
        assert_eq!(file.find_floor(2500), Some(1));
        assert_eq!(file.find_floor(10_000), Some(2));
    }

    #[test]
    fn validate_pair_detects_shape_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let csv = write_csv(&dir.path().to_path_buf(), "k.csv", "timestamp,open\n1000,1.0\n2000,2.0\n");
        let raw_path = dir.path().join("k.bin");
        let norm_path = dir.path().join("k.norm.bin");
        let sidecar = dir.path().join("k.schema.json");
        let schema = binarize_csv(&csv, "kline", 0, &raw_path, &norm_path, &sidecar, false).unwrap();

        // Truncate the normalized file to desynchronize record counts.
        let bytes = std::fs::read(&norm_path).unwrap();
        std::fs::write(&norm_path, &bytes[..schema.record_bytes()]).unwrap();

        let raw = MmapRecordFile::open(&raw_path, schema.clone()).unwrap();
        let norm = MmapRecordFile::open(&norm_path, schema).unwrap();
        assert!(validate_pair(&raw, &norm).is_err());
    }
}

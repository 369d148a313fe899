//! `idydb`: an embedded, content-addressed-friendly, optionally-encrypted
//! columnar record store (spec §4.7). A container is a flat space of
//! `(column: u16, row: u64)` cells, each holding one typed value; there is
//! no schema beyond per-cell type tagging.
//!
//! Vector columns and kNN/RAG live in `tsi-vector`, layered on top of the
//! `column_rows` scan this crate exposes.

pub mod container;
pub mod snapshot;
pub mod store;
pub mod types;

pub use snapshot::{ColumnStore, Snapshot};
pub use store::IdyDb;
pub use types::{ColumnType, Extracted, OpenFlags, StoredValue};

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn plaintext_round_trip_across_all_types() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("db.idy");
        {
            let db = IdyDb::open(&path, OpenFlags::CREATE).unwrap();
            db.insert_int(1, 1, 1337).unwrap();
            db.insert_float(1, 2, 3.14159).unwrap();
            db.insert_const_char(1, 3, "hello world").unwrap();
            db.insert_bool(1, 4, true).unwrap();
            db.insert_vector(2, 1, &[1.0, 0.0, 0.0, 0.0], 4).unwrap();
            db.close().unwrap();
        }
        let db = IdyDb::open(&path, OpenFlags::empty()).unwrap();
        assert_eq!(db.extract(1, 1).retrieve_int(), Some(1337));
        assert_eq!(db.extract(1, 2).retrieve_float(), Some(3.14159));
        assert_eq!(db.extract(1, 3).retrieve_const_char(), Some("hello world"));
        assert_eq!(db.extract(1, 4).retrieve_bool(), Some(true));
        assert_eq!(db.extract(2, 1).retrieve_vector(), Some([1.0, 0.0, 0.0, 0.0].as_slice()));

        db.delete(1, 3).unwrap();
        assert!(db.extract(1, 3).is_null());
        assert_eq!(db.column_next_row(1), 5);
    }

    #[test]
    fn delete_then_reinsert_keeps_high_water_mark() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("db.idy");
        let db = IdyDb::open(&path, OpenFlags::CREATE).unwrap();
        db.insert_int(1, 1, 1).unwrap();
        db.insert_int(1, 2, 2).unwrap();
        db.delete(1, 2).unwrap();
        // column_next_row must not regress even though row 2 is gone.
        assert_eq!(db.column_next_row(1), 3);
    }

    #[test]
    fn readonly_store_rejects_mutators() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("db.idy");
        IdyDb::open(&path, OpenFlags::CREATE).unwrap().close().unwrap();
        let db = IdyDb::open(&path, OpenFlags::READONLY).unwrap();
        let err = db.insert_int(1, 1, 1).unwrap_err();
        assert_eq!(tsi_types::ErrorCode::code(&err), "READONLY");
    }

    #[test]
    fn encrypted_migration_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("db.idy");
        {
            let db = IdyDb::open(&path, OpenFlags::CREATE).unwrap();
            db.insert_int(1, 1, 7).unwrap();
            db.insert_const_char(2, 1, "migrate-me").unwrap();
            db.close().unwrap();
        }
        {
            let db = IdyDb::open_encrypted(&path, OpenFlags::empty(), b"correct horse").unwrap();
            assert!(db.is_migrating());
            assert_eq!(db.extract(1, 1).retrieve_int(), Some(7));
            assert_eq!(db.extract(2, 1).retrieve_const_char(), Some("migrate-me"));
            db.close().unwrap();
        }

        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(&bytes[0..8], container::MAGIC_ENC);

        let db = IdyDb::open_encrypted(&path, OpenFlags::empty(), b"correct horse").unwrap();
        assert!(!db.is_migrating());
        assert_eq!(db.extract(1, 1).retrieve_int(), Some(7));
        assert_eq!(db.extract(2, 1).retrieve_const_char(), Some("migrate-me"));

        let err = IdyDb::open_encrypted(&path, OpenFlags::empty(), b"wrong pass").unwrap_err();
        assert_eq!(tsi_types::ErrorCode::code(&err), "AUTH");
    }

    #[test]
    fn open_missing_file_without_create_fails_io_missing() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nope.idy");
        let err = IdyDb::open(&path, OpenFlags::empty()).unwrap_err();
        assert_eq!(tsi_types::ErrorCode::code(&err), "IO_MISSING");
    }
}

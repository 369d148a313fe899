//! `IdyDb`: the public embedded record store (spec §4.7).

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use parking_lot::Mutex;
use tracing::debug;
use tsi_types::error::CoreError;
use zeroize::Zeroizing;

use crate::container::{self, MAGIC_ENC, MAGIC_PLAIN};
use crate::snapshot::Snapshot;
use crate::types::{Extracted, OpenFlags, StoredValue};

fn readonly_err(what: &str) -> CoreError {
    CoreError::Readonly(format!("cannot {what}: store opened READONLY"))
}

/// How a store's backing file should be written back on flush.
enum Backing {
    /// Plaintext container (`open`).
    Plain,
    /// Encrypted container (`open_encrypted`), not migrating: the file was
    /// already `IDYDBENC` (or didn't exist yet) when opened.
    Encrypted { passphrase: Zeroizing<Vec<u8>> },
    /// Encrypted pipeline opened against a pre-existing plaintext file
    /// (spec §4.7 migration mode): reads serve the plaintext snapshot;
    /// close rewrites the file as `IDYDBENC` if writable.
    Migrating { passphrase: Zeroizing<Vec<u8>> },
}

/// An open `idydb` container: an in-memory [`Snapshot`] plus enough state
/// to write it back to `path` on flush/close in the right format.
pub struct IdyDb {
    path: PathBuf,
    flags: OpenFlags,
    backing: Backing,
    snapshot: Mutex<Snapshot>,
    _lock: File,
}

impl IdyDb {
    /// Opens a plaintext container at `path`.
    pub fn open(path: impl AsRef<Path>, flags: OpenFlags) -> Result<Self, CoreError> {
        let path = path.as_ref().to_path_buf();
        let exists = path.exists();
        if !exists && !flags.contains(OpenFlags::CREATE) {
            return Err(CoreError::IoMissing(path.display().to_string()));
        }

        let lock = acquire_lock(&path)?;

        let snapshot = if exists {
            match container::detect_magic(&path).map_err(CoreError::Io)? {
                Some(magic) if &magic == MAGIC_ENC => {
                    return Err(CoreError::IoCorrupt(format!(
                        "{}: container is encrypted; use open_encrypted",
                        path.display()
                    )));
                }
                _ => container::read_plaintext(&path)?,
            }
        } else {
            Snapshot::empty()
        };

        debug!(path = %path.display(), existed = exists, "idydb opened plaintext");
        Ok(Self {
            path,
            flags,
            backing: Backing::Plain,
            snapshot: Mutex::new(snapshot),
            _lock: lock,
        })
    }

    /// Opens (or creates) an encrypted container at `path`. If `path`
    /// exists but is plaintext, enters migration mode (spec §4.7): reads
    /// succeed immediately against the plaintext data, and `close` rewrites
    /// the file as `IDYDBENC` if the store is writable.
    pub fn open_encrypted(
        path: impl AsRef<Path>,
        flags: OpenFlags,
        passphrase: impl AsRef<[u8]>,
    ) -> Result<Self, CoreError> {
        let path = path.as_ref().to_path_buf();
        let passphrase = Zeroizing::new(passphrase.as_ref().to_vec());
        let exists = path.exists();
        if !exists && !flags.contains(OpenFlags::CREATE) {
            return Err(CoreError::IoMissing(path.display().to_string()));
        }

        let lock = acquire_lock(&path)?;

        let (snapshot, backing) = if !exists {
            (Snapshot::empty(), Backing::Encrypted { passphrase })
        } else {
            match container::detect_magic(&path).map_err(CoreError::Io)? {
                Some(magic) if &magic == MAGIC_ENC => {
                    let snapshot = container::read_encrypted(&path, &passphrase)?;
                    (snapshot, Backing::Encrypted { passphrase })
                }
                Some(magic) if &magic == MAGIC_PLAIN => {
                    let snapshot = container::read_plaintext(&path)?;
                    (snapshot, Backing::Migrating { passphrase })
                }
                _ => return Err(CoreError::IoCorrupt(format!("{}: unrecognized container", path.display()))),
            }
        };

        debug!(
            path = %path.display(),
            migrating = matches!(backing, Backing::Migrating { .. }),
            "idydb opened encrypted"
        );
        Ok(Self {
            path,
            flags,
            backing,
            snapshot: Mutex::new(snapshot),
            _lock: lock,
        })
    }

    pub fn is_readonly(&self) -> bool {
        self.flags.contains(OpenFlags::READONLY)
    }

    /// True if this handle is a migration-mode encrypted open that hasn't
    /// rewritten its backing file yet.
    pub fn is_migrating(&self) -> bool {
        matches!(self.backing, Backing::Migrating { .. })
    }

    fn require_writable(&self, what: &str) -> Result<(), CoreError> {
        if self.is_readonly() {
            return Err(readonly_err(what));
        }
        Ok(())
    }

    pub fn insert_int(&self, col: u16, row: u64, value: i32) -> Result<(), CoreError> {
        self.insert(col, row, StoredValue::Int(value))
    }

    pub fn insert_float(&self, col: u16, row: u64, value: f32) -> Result<(), CoreError> {
        self.insert(col, row, StoredValue::Float(value))
    }

    pub fn insert_bool(&self, col: u16, row: u64, value: bool) -> Result<(), CoreError> {
        self.insert(col, row, StoredValue::Bool(value))
    }

    pub fn insert_const_char(&self, col: u16, row: u64, value: &str) -> Result<(), CoreError> {
        self.insert(col, row, StoredValue::Char(value.to_string()))
    }

    /// Inserts a fixed-dimension float32 vector. `dims` must equal
    /// `value.len()`; a mismatch is a caller bug, not a data-dependent
    /// semantic violation, so it is rejected rather than silently truncated
    /// or padded.
    pub fn insert_vector(&self, col: u16, row: u64, value: &[f32], dims: u16) -> Result<(), CoreError> {
        if value.len() != dims as usize {
            return Err(CoreError::Internal(format!(
                "insert_vector: dims={dims} does not match value.len()={}",
                value.len()
            )));
        }
        self.insert(col, row, StoredValue::Vector(value.to_vec()))
    }

    fn insert(&self, col: u16, row: u64, value: StoredValue) -> Result<(), CoreError> {
        self.require_writable("insert")?;
        self.snapshot.lock().column_mut(col).insert(row, value);
        Ok(())
    }

    pub fn extract(&self, col: u16, row: u64) -> Extracted {
        let guard = self.snapshot.lock();
        Extracted(guard.column(col).and_then(|c| c.rows.get(&row).cloned()))
    }

    pub fn delete(&self, col: u16, row: u64) -> Result<(), CoreError> {
        self.require_writable("delete")?;
        if let Some(column) = self.snapshot.lock().columns.get_mut(&col) {
            column.delete(row);
        }
        Ok(())
    }

    /// `max(row)+1` over every row ever inserted into `col`, or `1` if the
    /// column is empty. Unaffected by deletions.
    pub fn column_next_row(&self, col: u16) -> u64 {
        self.snapshot.lock().column(col).map(|c| c.next_row()).unwrap_or(1)
    }

    /// All live (non-deleted) rows of `col`, ascending by row id. Used by
    /// `tsi-vector`'s brute-force kNN scan and RAG lookups.
    pub fn column_rows(&self, col: u16) -> Vec<(u64, StoredValue)> {
        self.snapshot
            .lock()
            .column(col)
            .map(|c| c.rows.iter().map(|(r, v)| (*r, v.clone())).collect())
            .unwrap_or_default()
    }

    /// Writes the current snapshot back to `path` in the appropriate
    /// format. A migration-mode open always rewrites as `IDYDBENC` here,
    /// matching spec §4.7 ("on close, if writable, it re-writes the file
    /// in encrypted form"); `is_migrating()` keeps reporting the mode this
    /// handle was opened in, not whether a rewrite has happened yet.
    pub fn flush(&self) -> Result<(), CoreError> {
        if self.is_readonly() {
            return Ok(());
        }
        debug!(path = %self.path.display(), "idydb flush");
        let snapshot = self.snapshot.lock();
        match &self.backing {
            Backing::Plain => container::write_plaintext(&self.path, &snapshot),
            Backing::Encrypted { passphrase } | Backing::Migrating { passphrase } => {
                container::write_encrypted(&self.path, &snapshot, passphrase)
            }
        }
    }

    /// Flushes (if writable) and releases the advisory lock by dropping
    /// this handle.
    pub fn close(self) -> Result<(), CoreError> {
        self.flush()
    }
}

impl Drop for IdyDb {
    fn drop(&mut self) {
        let _ = self.flush();
    }
}

fn acquire_lock(path: &Path) -> Result<File, CoreError> {
    let file = OpenOptions::new().read(true).write(true).create(true).open(path).map_err(CoreError::Io)?;
    file.try_lock_exclusive().map_err(|e| {
        CoreError::Io(std::io::Error::new(
            std::io::ErrorKind::WouldBlock,
            format!("{}: another process holds the idydb lock: {e}", path.display()),
        ))
    })?;
    Ok(file)
}

//! On-disk container formats: plaintext and `IDYDBENC`-encrypted (spec §4.7,
//! §6). Both formats serialize a whole [`Snapshot`] at a time — `idydb` is
//! not a write-ahead log; every `close`/`flush` rewrites the file.

use std::io::{Read, Write};
use std::path::Path;

use argon2::Argon2;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tsi_types::error::CoreError;
use zeroize::Zeroizing;

use crate::snapshot::Snapshot;

pub const MAGIC_PLAIN: &[u8; 8] = b"IDYDBPLN";
pub const MAGIC_ENC: &[u8; 8] = b"IDYDBENC";

/// Plaintext page size used to chunk the serialized snapshot before
/// encryption, matching the "per-page IV scheme" / "authenticated
/// ciphertext pages" language of spec §4.7.
const PAGE_SIZE: usize = 4096;

fn io_corrupt(msg: impl Into<String>) -> CoreError {
    CoreError::IoCorrupt(msg.into())
}

/// The first 8 bytes on disk tell `open`/`open_encrypted` which format a
/// file is in without needing to know the caller's intent in advance.
pub fn detect_magic(path: &Path) -> std::io::Result<Option<[u8; 8]>> {
    let mut file = match std::fs::File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };
    let mut magic = [0u8; 8];
    match file.read_exact(&mut magic) {
        Ok(()) => Ok(Some(magic)),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Ok(Some([0u8; 8])),
        Err(e) => Err(e),
    }
}

/// Maps `path` read-only. The store keeps no long-lived mmap handle of its
/// own (every flush rewrites the whole file, which would invalidate one) —
/// this is used purely to avoid a copying read of the container on open.
fn mmap_readonly(path: &Path) -> Result<memmap2::Mmap, CoreError> {
    let file = std::fs::File::open(path).map_err(CoreError::Io)?;
    if file.metadata().map_err(CoreError::Io)?.len() == 0 {
        return Err(io_corrupt("container file is empty"));
    }
    // Safety: the advisory file lock held by the caller's `IdyDb` prevents
    // other in-process or cooperating out-of-process writers from
    // truncating this file out from under the mapping for the duration of
    // this read.
    unsafe { memmap2::Mmap::map(&file) }.map_err(CoreError::Io)
}

pub fn read_plaintext(path: &Path) -> Result<Snapshot, CoreError> {
    let mmap = mmap_readonly(path)?;
    let bytes: &[u8] = &mmap;
    if bytes.len() < 16 || &bytes[0..8] != MAGIC_PLAIN {
        return Err(io_corrupt("plaintext container missing IDYDBPLN magic"));
    }
    let body_len = u64::from_le_bytes(bytes[8..16].try_into().unwrap()) as usize;
    let body = bytes.get(16..16 + body_len).ok_or_else(|| io_corrupt("plaintext container truncated"))?;
    bincode::deserialize(body).map_err(|e| io_corrupt(format!("plaintext container corrupt: {e}")))
}

pub fn write_plaintext(path: &Path, snapshot: &Snapshot) -> Result<(), CoreError> {
    let body = bincode::serialize(snapshot).map_err(|e| CoreError::Internal(format!("snapshot serialize: {e}")))?;
    let mut out = Vec::with_capacity(16 + body.len());
    out.extend_from_slice(MAGIC_PLAIN);
    out.write_u64::<LittleEndian>(body.len() as u64).unwrap();
    out.extend_from_slice(&body);
    std::fs::write(path, out).map_err(CoreError::Io)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct EncryptedHeader {
    salt: [u8; 16],
    m_cost: u32,
    t_cost: u32,
    p_cost: u32,
    base_nonce: [u8; 12],
    plaintext_len: u64,
    page_size: u32,
}

const DEFAULT_M_COST: u32 = 19_456;
const DEFAULT_T_COST: u32 = 2;
const DEFAULT_P_COST: u32 = 1;

fn derive_key(passphrase: &[u8], header: &EncryptedHeader) -> Result<Zeroizing<[u8; 32]>, CoreError> {
    let params = argon2::Params::new(header.m_cost, header.t_cost, header.p_cost, Some(32))
        .map_err(|e| CoreError::Internal(format!("argon2 params: {e}")))?;
    let argon2 = Argon2::new(argon2::Algorithm::Argon2id, argon2::Version::V0x13, params);
    let mut key = Zeroizing::new([0u8; 32]);
    argon2
        .hash_password_into(passphrase, &header.salt, &mut key[..])
        .map_err(|e| CoreError::Internal(format!("argon2 derive: {e}")))?;
    Ok(key)
}

/// Nonce for page `idx`, derived by XOR-folding the page index into the
/// last 4 bytes of the container's base nonce so every page gets a
/// distinct nonce under the same derived key.
fn page_nonce(base: &[u8; 12], idx: u32) -> [u8; 12] {
    let mut nonce = *base;
    let tail = u32::from_le_bytes(nonce[8..12].try_into().unwrap()) ^ idx;
    nonce[8..12].copy_from_slice(&tail.to_le_bytes());
    nonce
}

/// Reads an `IDYDBENC` container, decrypting its pages with `passphrase`.
/// Fails with `auth` if the passphrase is wrong (AEAD tag mismatch) or the
/// container is otherwise corrupt.
pub fn read_encrypted(path: &Path, passphrase: &[u8]) -> Result<Snapshot, CoreError> {
    let mmap = mmap_readonly(path)?;
    let bytes: &[u8] = &mmap;
    if bytes.len() < 8 || &bytes[0..8] != MAGIC_ENC {
        return Err(io_corrupt("encrypted container missing IDYDBENC magic"));
    }
    let mut cursor = &bytes[8..];
    let header_len = cursor.read_u64::<LittleEndian>().map_err(|_| io_corrupt("truncated header length"))? as usize;
    if cursor.len() < header_len {
        return Err(io_corrupt("truncated header"));
    }
    let (header_bytes, rest) = cursor.split_at(header_len);
    let header: EncryptedHeader =
        bincode::deserialize(header_bytes).map_err(|e| io_corrupt(format!("corrupt header: {e}")))?;
    cursor = rest;

    let key = derive_key(passphrase, &header)?;
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key.as_ref()));

    let mut plaintext = Vec::with_capacity(header.plaintext_len as usize);
    let page_plain_size = header.page_size as usize;
    let mut page_idx: u32 = 0;
    let mut remaining = header.plaintext_len as usize;
    while remaining > 0 {
        let this_plain_len = remaining.min(page_plain_size);
        let this_cipher_len = this_plain_len + 16; // AEAD tag
        if cursor.len() < this_cipher_len {
            return Err(io_corrupt("truncated ciphertext page"));
        }
        let (page_bytes, rest) = cursor.split_at(this_cipher_len);
        let nonce = page_nonce(&header.base_nonce, page_idx);
        let decrypted = cipher
            .decrypt(Nonce::from_slice(&nonce), page_bytes)
            .map_err(|_| CoreError::Auth("wrong passphrase or corrupt container".into()))?;
        plaintext.extend_from_slice(&decrypted);
        cursor = rest;
        remaining -= this_plain_len;
        page_idx += 1;
    }

    bincode::deserialize(&plaintext).map_err(|e| io_corrupt(format!("decrypted snapshot corrupt: {e}")))
}

/// Writes `snapshot` as a fresh `IDYDBENC` container, generating a new
/// random salt and base nonce every time (re-encryption on close always
/// produces a self-consistent file; it never needs to recover the
/// previous salt).
pub fn write_encrypted(path: &Path, snapshot: &Snapshot, passphrase: &[u8]) -> Result<(), CoreError> {
    let plaintext =
        bincode::serialize(snapshot).map_err(|e| CoreError::Internal(format!("snapshot serialize: {e}")))?;

    let mut salt = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut salt);
    let mut base_nonce = [0u8; 12];
    rand::thread_rng().fill_bytes(&mut base_nonce);

    let header = EncryptedHeader {
        salt,
        m_cost: DEFAULT_M_COST,
        t_cost: DEFAULT_T_COST,
        p_cost: DEFAULT_P_COST,
        base_nonce,
        plaintext_len: plaintext.len() as u64,
        page_size: PAGE_SIZE as u32,
    };
    let key = derive_key(passphrase, &header)?;
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key.as_ref()));

    let header_bytes =
        bincode::serialize(&header).map_err(|e| CoreError::Internal(format!("header serialize: {e}")))?;

    let mut out = Vec::with_capacity(8 + 8 + header_bytes.len() + plaintext.len() + 16 * 4);
    out.extend_from_slice(MAGIC_ENC);
    out.write_u64::<LittleEndian>(header_bytes.len() as u64).unwrap();
    out.extend_from_slice(&header_bytes);

    for (page_idx, chunk) in plaintext.chunks(PAGE_SIZE).enumerate() {
        let nonce = page_nonce(&base_nonce, page_idx as u32);
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce), chunk)
            .map_err(|e| CoreError::Internal(format!("aead encrypt: {e}")))?;
        out.extend_from_slice(&ciphertext);
    }
    // An empty snapshot still needs one (empty) page's worth of framing so
    // `read_encrypted`'s `plaintext_len == 0` loop simply never executes.

    std::fs::File::create(path)
        .and_then(|mut f| f.write_all(&out))
        .map_err(CoreError::Io)
}

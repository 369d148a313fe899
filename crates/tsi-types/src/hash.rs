//! Content-addressing helpers shared by the artifact registry, the board
//! compiler (contract/wave hashes), and the record store's encrypted
//! container (salt derivation input).

use sha2::{Digest, Sha256};

/// SHA-256 digest of `bytes`.
pub fn content_hash(bytes: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hasher.finalize().into()
}

/// Lowercase hex encoding of a content hash, used directly as a path
/// component for artifact directories and hash fields in run records.
pub fn content_hash_hex(bytes: &[u8]) -> String {
    hex::encode(content_hash(bytes))
}

/// Hashes several fields joined by a `\0` separator, so callers don't need
/// to pick their own delimiter-free encoding for composite keys (e.g.
/// canonical type + family + model + configuration).
pub fn content_hash_of_parts<I, S>(parts: I) -> [u8; 32]
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut hasher = Sha256::new();
    for (i, part) in parts.into_iter().enumerate() {
        if i > 0 {
            hasher.update([0u8]);
        }
        hasher.update(part.as_ref().as_bytes());
    }
    hasher.finalize().into()
}

//! Vector columns, exact brute-force kNN, and a RAG context builder layered
//! on top of `tsi-storage`'s generic `(column, row)` cells (spec §4.7).
//!
//! Approximate indexing (e.g. HNSW) is deliberately not built here: spec §8
//! requires deterministic top-k with an exact, ascending-row-id tie-break,
//! which a brute-force scan over a column's live rows satisfies directly
//! and an approximate index would not.

use once_cell::sync::OnceCell;
use parking_lot::RwLock;
use std::sync::Arc;

use tsi_storage::{IdyDb, StoredValue};
use tsi_types::error::{CoreError, SemanticError};

/// Similarity metric for kNN search (spec §4.7 / §8).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Similarity {
    /// Larger score is a better match.
    Cosine,
    /// Exposed as a negated squared distance so larger-is-better ordering
    /// is uniform across metrics.
    L2,
}

/// One kNN hit: the row id and its similarity score under the metric the
/// search was run with.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Hit {
    pub row: u64,
    pub score: f32,
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn norm(a: &[f32]) -> f32 {
    dot(a, a).sqrt()
}

fn score(metric: Similarity, query: &[f32], candidate: &[f32]) -> f32 {
    match metric {
        Similarity::Cosine => {
            let denom = norm(query) * norm(candidate);
            if denom == 0.0 {
                0.0
            } else {
                dot(query, candidate) / denom
            }
        }
        Similarity::L2 => {
            let sq: f32 = query.iter().zip(candidate).map(|(x, y)| (x - y).powi(2)).sum();
            -sq
        }
    }
}

/// Exact top-`k` nearest neighbors of `query` (dims `dims`) among every
/// vector row in `col`. Candidates whose stored dimensionality doesn't
/// match `dims` are skipped (spec §4.7). Ties broken by ascending row id.
pub fn knn_search_vector_column(db: &IdyDb, col: u16, query: &[f32], dims: u16, k: usize, metric: Similarity) -> Vec<Hit> {
    let mut hits: Vec<Hit> = db
        .column_rows(col)
        .into_iter()
        .filter_map(|(row, value)| match value {
            StoredValue::Vector(v) if v.len() == dims as usize => Some(Hit { row, score: score(metric, query, &v) }),
            _ => None,
        })
        .collect();

    hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal).then(a.row.cmp(&b.row)));
    hits.truncate(k);
    hits
}

/// Writes a `(text, vector)` pair into a RAG-shaped pair of columns at the
/// same row.
pub fn rag_upsert_text(
    db: &IdyDb,
    text_col: u16,
    vec_col: u16,
    row: u64,
    text: &str,
    vec: &[f32],
    dims: u16,
) -> Result<(), CoreError> {
    db.insert_const_char(text_col, row, text)?;
    db.insert_vector(vec_col, row, vec, dims)?;
    Ok(())
}

/// Embeds arbitrary text into a fixed-dimension vector. Implementations are
/// supplied by whatever model the surrounding system uses; this crate never
/// embeds anything itself.
pub trait Embedder: Send + Sync {
    fn embed(&self, text: &str) -> Vec<f32>;
    fn dims(&self) -> u16;
}

static EMBEDDER: OnceCell<RwLock<Option<Arc<dyn Embedder>>>> = OnceCell::new();

fn embedder_slot() -> &'static RwLock<Option<Arc<dyn Embedder>>> {
    EMBEDDER.get_or_init(|| RwLock::new(None))
}

/// Installs the process-wide embedder used by [`rag_upsert_text_auto_embed`].
/// A later call replaces the previous embedder; unlike the artifact driver
/// registry this is not one-shot, since swapping embedding models mid-run
/// (e.g. between training phases) is an expected operation.
pub fn register_embedder(embedder: Arc<dyn Embedder>) {
    *embedder_slot().write() = Some(embedder);
}

/// Embeds `text` with the registered embedder and upserts it alongside the
/// text, per spec §4.7's `rag_upsert_text_auto_embed`.
pub fn rag_upsert_text_auto_embed(db: &IdyDb, text_col: u16, vec_col: u16, row: u64, text: &str) -> Result<(), CoreError> {
    let embedder = embedder_slot()
        .read()
        .clone()
        .ok_or_else(|| CoreError::NoDriver("no embedder registered for rag_upsert_text_auto_embed".into()))?;
    let vec = embedder.embed(text);
    let dims = embedder.dims();
    if vec.len() != dims as usize {
        return Err(CoreError::Internal(format!(
            "embedder reported dims={dims} but produced a vector of length {}",
            vec.len()
        )));
    }
    rag_upsert_text(db, text_col, vec_col, row, text, &vec, dims)
}

/// `knn_search_vector_column` followed by a lookup of each hit's paired
/// text, preserving score order.
pub fn rag_query_topk(
    db: &IdyDb,
    text_col: u16,
    vec_col: u16,
    query: &[f32],
    dims: u16,
    k: usize,
    metric: Similarity,
) -> Vec<(u64, String, f32)> {
    knn_search_vector_column(db, vec_col, query, dims, k, metric)
        .into_iter()
        .filter_map(|hit| {
            db.extract(text_col, hit.row)
                .retrieve_const_char()
                .map(|text| (hit.row, text.to_string(), hit.score))
        })
        .collect()
}

/// Assembles retrieved texts into a single context string, separated by
/// `separator`, truncated to an absolute byte cap at a UTF-8 code-point
/// boundary (spec §4.7).
pub fn rag_query_context(
    db: &IdyDb,
    text_col: u16,
    vec_col: u16,
    query: &[f32],
    dims: u16,
    k: usize,
    metric: Similarity,
    max_len: usize,
    separator: &str,
) -> Result<String, CoreError> {
    let hits = rag_query_topk(db, text_col, vec_col, query, dims, k, metric);
    let mut out = String::new();
    for (i, (_, text, _)) in hits.iter().enumerate() {
        if i > 0 {
            out.push_str(separator);
        }
        out.push_str(text);
    }
    Ok(truncate_utf8(&out, max_len))
}

/// Truncates `s` to at most `max_len` bytes, backing off to the nearest
/// preceding UTF-8 code-point boundary rather than splitting a multi-byte
/// character.
fn truncate_utf8(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        return s.to_string();
    }
    let mut end = max_len;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    s[..end].to_string()
}

/// Validates that `dims` is nonzero, since a zero-dimensional vector column
/// can never match any query (every candidate would trivially tie).
pub fn validate_dims(dims: u16) -> Result<(), CoreError> {
    if dims == 0 {
        return Err(CoreError::Semantic(SemanticError("vector dims must be nonzero".into())));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tsi_storage::OpenFlags;

    fn open_tmp() -> (tempfile::TempDir, IdyDb) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vec.idy");
        let db = IdyDb::open(&path, OpenFlags::CREATE).unwrap();
        (dir, db)
    }

    #[test]
    fn rag_topk_returns_nearest_by_cosine() {
        let (_dir, db) = open_tmp();
        rag_upsert_text(&db, 10, 11, 1, "alpha", &[1.0, 0.0], 2).unwrap();
        rag_upsert_text(&db, 10, 11, 2, "beta", &[0.0, 1.0], 2).unwrap();
        rag_upsert_text(&db, 10, 11, 3, "gamma", &[0.9, 0.1], 2).unwrap();

        let hits = knn_search_vector_column(&db, 11, &[1.0, 0.0], 2, 2, Similarity::Cosine);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].row, 1);
        assert_eq!(hits[1].row, 3);
        assert!(hits[0].score >= hits[1].score);

        let context = rag_query_context(&db, 10, 11, &[1.0, 0.0], 2, 2, Similarity::Cosine, 1024, " ").unwrap();
        let alpha_pos = context.find("alpha").unwrap();
        let gamma_pos = context.find("gamma").unwrap();
        assert!(alpha_pos < gamma_pos);
    }

    #[test]
    fn dims_mismatch_is_skipped() {
        let (_dir, db) = open_tmp();
        rag_upsert_text(&db, 10, 11, 1, "two-d", &[1.0, 0.0], 2).unwrap();
        rag_upsert_text(&db, 10, 11, 2, "three-d", &[1.0, 0.0, 0.0], 3).unwrap();

        let hits = knn_search_vector_column(&db, 11, &[1.0, 0.0], 2, 10, Similarity::Cosine);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].row, 1);
    }

    #[test]
    fn l2_orders_closest_first_as_larger_negated_score() {
        let (_dir, db) = open_tmp();
        rag_upsert_text(&db, 10, 11, 1, "near", &[1.0, 1.0], 2).unwrap();
        rag_upsert_text(&db, 10, 11, 2, "far", &[5.0, 5.0], 2).unwrap();

        let hits = knn_search_vector_column(&db, 11, &[1.0, 1.0], 2, 2, Similarity::L2);
        assert_eq!(hits[0].row, 1);
        assert!(hits[0].score > hits[1].score);
    }

    #[test]
    fn context_truncates_at_utf8_boundary() {
        let (_dir, db) = open_tmp();
        rag_upsert_text(&db, 10, 11, 1, "caf\u{e9} au lait", &[1.0], 1).unwrap();
        let context = rag_query_context(&db, 10, 11, &[1.0], 1, 1, Similarity::Cosine, 4, " ").unwrap();
        assert!(context.len() <= 4);
        assert!(std::str::from_utf8(context.as_bytes()).is_ok());
    }

    struct FixedEmbedder;
    impl Embedder for FixedEmbedder {
        fn embed(&self, _text: &str) -> Vec<f32> {
            vec![0.5, 0.5]
        }
        fn dims(&self) -> u16 {
            2
        }
    }

    #[test]
    fn auto_embed_uses_registered_embedder() {
        let (_dir, db) = open_tmp();
        register_embedder(Arc::new(FixedEmbedder));
        rag_upsert_text_auto_embed(&db, 10, 11, 1, "hello").unwrap();
        assert_eq!(db.extract(11, 1).retrieve_vector(), Some([0.5, 0.5].as_slice()));
    }
}

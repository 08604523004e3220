//! Embedding provider trait and vector utilities.
//!
//! Concrete providers (OpenAI, Ollama, fastembed) live in the `finrag` app
//! crate; this module only holds what retrieval needs to reason about
//! vectors: BLOB encoding, cosine similarity, and Maximal Marginal
//! Relevance selection.

/// Metadata every embedding backend exposes.
pub trait EmbeddingProvider: Send + Sync {
    /// Model identifier (e.g. `"all-minilm-l6-v2"`).
    fn model_name(&self) -> &str;
    /// Vector dimensionality (e.g. `384`).
    fn dims(&self) -> usize;
}

/// Encode a float vector as little-endian f32 bytes.
///
/// ```rust
/// use finrag_core::embedding::{vec_to_blob, blob_to_vec};
///
/// let v = vec![1.0f32, -2.5, 3.125];
/// let blob = vec_to_blob(&v);
/// assert_eq!(blob.len(), 12);
/// assert_eq!(blob_to_vec(&blob), v);
/// ```
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB produced by [`vec_to_blob`]. Trailing partial words are ignored.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Cosine similarity in `[-1.0, 1.0]`.
///
/// Returns `0.0` for empty vectors, vectors of different lengths, and
/// zero-magnitude vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}

/// Select up to `k` candidate indices by Maximal Marginal Relevance.
///
/// The first pick is the candidate most similar to the query. Each later
/// pick maximizes `λ·sim(q, d) − (1−λ)·max sim(d, s)` over the already
/// selected `s`, so near-duplicates of earlier picks are pushed down.
/// `λ = 1.0` degenerates to plain similarity ranking.
///
/// Returned indices are in selection order.
pub fn mmr_select(query: &[f32], candidates: &[Vec<f32>], k: usize, lambda: f32) -> Vec<usize> {
    let k = k.min(candidates.len());
    if k == 0 {
        return Vec::new();
    }

    let to_query: Vec<f32> = candidates
        .iter()
        .map(|c| cosine_similarity(query, c))
        .collect();

    let mut first = 0;
    for (i, s) in to_query.iter().enumerate() {
        if *s > to_query[first] {
            first = i;
        }
    }

    let mut selected = vec![first];
    // Highest similarity of each candidate to anything selected so far.
    let mut redundancy: Vec<f32> = candidates
        .iter()
        .map(|c| cosine_similarity(c, &candidates[first]))
        .collect();

    while selected.len() < k {
        let mut best: Option<(usize, f32)> = None;
        for (i, q_sim) in to_query.iter().enumerate() {
            if selected.contains(&i) {
                continue;
            }
            let score = lambda * q_sim - (1.0 - lambda) * redundancy[i];
            if best.map_or(true, |(_, b)| score > b) {
                best = Some((i, score));
            }
        }
        let Some((pick, _)) = best else {
            break;
        };
        selected.push(pick);
        for (i, c) in candidates.iter().enumerate() {
            let sim = cosine_similarity(c, &candidates[pick]);
            if sim > redundancy[i] {
                redundancy[i] = sim;
            }
        }
    }

    selected
}

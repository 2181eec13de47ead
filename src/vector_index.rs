//! Brute-force cosine-similarity vector index over the `embeddings` table (§4.2, component C).
//!
//! There is no ANN structure here: every candidate in the set is scored exactly. That is
//! adequate at the corpus sizes this store targets and keeps the index trivially consistent
//! with `embeddings` — inserts and deletes are just row writes, the index has no separate
//! state to go stale.

/// Fixed embedding width every backend must produce (§4.7 invariant 2).
pub const DIMENSION: usize = 768;

/// Little-endian float32 byte layout, matching the teacher's embedding BLOB encoding.
pub fn serialize_vector(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|f| f.to_le_bytes()).collect()
}

pub fn deserialize_vector(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a * norm_b)
}

/// Top `k` candidates by cosine similarity to `query`, descending, ties broken by id order.
pub fn k_nearest(query: &[f32], candidates: &[(String, Vec<f32>)], k: usize) -> Vec<(String, f32)> {
    let mut scored: Vec<(String, f32)> = candidates
        .iter()
        .map(|(id, vector)| (id.clone(), cosine_similarity(query, vector)))
        .collect();

    scored.sort_by(|a, b| match b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal) {
        std::cmp::Ordering::Equal => a.0.cmp(&b.0),
        other => other,
    });
    scored.truncate(k);
    scored
}

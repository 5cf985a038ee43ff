//! Vector similarity utilities.
//!
//! Pure-Rust cosine similarity and brute-force ranking. Good enough for the
//! few thousand lessons and workflows a single deployment accumulates.

use conductor_core::vector::VectorMatch;

/// Compute cosine similarity between two vectors.
///
/// Returns a value in [-1, 1] where 1 = identical, 0 = orthogonal, -1 = opposite.
/// Returns 0.0 if the lengths differ or either vector is empty or zero.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;

    for (x, y) in a.iter().zip(b.iter()) {
        let x = *x as f64;
        let y = *y as f64;
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < 1e-10 {
        return 0.0;
    }

    (dot / denom) as f32
}

/// Scale `v` to unit length in place. Zero vectors are left alone.
pub fn normalize(v: &mut [f32]) {
    let norm = v.iter().map(|x| (*x as f64) * (*x as f64)).sum::<f64>().sqrt();
    if norm > 1e-10 {
        for x in v.iter_mut() {
            *x = (*x as f64 / norm) as f32;
        }
    }
}

/// Rank `(id, embedding)` candidates by cosine similarity to `query`.
///
/// Highest score first; candidates below `min_score` are dropped; ties keep
/// candidate order.
pub fn rank<'a, I>(candidates: I, query: &[f32], limit: usize, min_score: f32) -> Vec<VectorMatch>
where
    I: IntoIterator<Item = (&'a str, &'a [f32])>,
{
    let mut scored: Vec<VectorMatch> = candidates
        .into_iter()
        .filter_map(|(id, embedding)| {
            let score = cosine_similarity(embedding, query);
            (score >= min_score).then(|| VectorMatch {
                id: id.to_string(),
                score,
            })
        })
        .collect();

    scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    scored.truncate(limit);
    scored
}

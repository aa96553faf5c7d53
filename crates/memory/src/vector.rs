//! Similarity scoring for the knowledge index.
//!
//! Pure-Rust implementations of:
//! - Cosine similarity over embedding vectors
//! - Keyword overlap scoring, used when no embeddings are available

/// Compute cosine similarity between two vectors.
///
/// Returns a value in [-1, 1] where 1 = identical, 0 = orthogonal, -1 = opposite.
/// Returns 0.0 if either vector is zero-length or empty.
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

/// Lowercased query terms worth matching on (three characters or more).
pub fn query_terms(query: &str) -> Vec<String> {
    query
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() >= 3)
        .map(str::to_lowercase)
        .collect()
}

/// Occurrences of `terms` in `content`, normalised by content length.
pub fn keyword_score(content: &str, terms: &[String]) -> f32 {
    if terms.is_empty() {
        return 0.0;
    }
    let lower = content.to_lowercase();
    let occurrences: usize = terms.iter().map(|t| lower.matches(t.as_str()).count()).sum();
    occurrences as f32 / (content.len() as f32 / 100.0).max(1.0)
}

/// Return the indices of the `k` best-scoring items, best first.
///
/// Items scoring `None` or at/below `min_score` are dropped. Ties keep their
/// input order.
pub fn top_k<T>(
    items: &[T],
    k: usize,
    min_score: f32,
    score: impl Fn(&T) -> Option<f32>,
) -> Vec<usize> {
    let mut scored: Vec<(usize, f32)> = items
        .iter()
        .enumerate()
        .filter_map(|(i, item)| score(item).filter(|s| *s > min_score).map(|s| (i, s)))
        .collect();

    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    scored.truncate(k);
    scored.into_iter().map(|(i, _)| i).collect()
}

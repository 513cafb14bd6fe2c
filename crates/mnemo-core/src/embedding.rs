//! Embedding helpers - vector math and input preparation
//!
//! The vectors themselves come from the remote `Embedder`; this module holds
//! the pure pieces both retrieval and relation linking share.

/// Default embedding dimensionality (text-embedding-3-small)
pub const EMBEDDING_DIMENSIONS: usize = 1536;

/// Safe prefix length for embedding input. The API caps input around 8191
/// tokens; one character per token is the conservative estimate for CJK text.
pub const MAX_EMBEDDING_CHARS: usize = 8000;

/// Truncate text to at most `max_chars` characters
pub fn truncate_for_embedding(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        text.chars().take(max_chars).collect()
    }
}

/// Cosine similarity between two vectors
///
/// Returns 0.0 for zero-norm or mismatched-length inputs.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += f64::from(*x) * f64::from(*y);
        norm_a += f64::from(*x) * f64::from(*x);
        norm_b += f64::from(*y) * f64::from(*y);
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a.sqrt() * norm_b.sqrt())
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_vectors_have_similarity_one() {
        let v = vec![1.0, 0.0, 0.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn orthogonal_vectors_have_similarity_zero() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![0.0, 1.0, 0.0];
        assert!(cosine_similarity(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn opposite_vectors_have_similarity_minus_one() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![-1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &b) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn similar_vectors_score_high() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![0.9, 0.1, 0.0];
        assert!(cosine_similarity(&a, &b) > 0.99);
    }

    #[test]
    fn zero_vector_yields_zero() {
        let a = vec![0.0, 0.0, 0.0];
        let b = vec![1.0, 0.0, 0.0];
        assert_eq!(cosine_similarity(&a, &b), 0.0);
    }

    #[test]
    fn mismatched_lengths_yield_zero() {
        let a = vec![1.0, 0.0];
        let b = vec![1.0, 0.0, 0.0];
        assert_eq!(cosine_similarity(&a, &b), 0.0);
    }

    #[test]
    fn short_text_unchanged() {
        assert_eq!(truncate_for_embedding("short", MAX_EMBEDDING_CHARS), "short");
    }

    #[test]
    fn long_text_truncated_by_chars() {
        let text = "あ".repeat(MAX_EMBEDDING_CHARS + 500);
        let result = truncate_for_embedding(&text, MAX_EMBEDDING_CHARS);
        assert_eq!(result.chars().count(), MAX_EMBEDDING_CHARS);
    }

    #[test]
    fn exact_limit_unchanged() {
        let text = "a".repeat(MAX_EMBEDDING_CHARS);
        assert_eq!(
            truncate_for_embedding(&text, MAX_EMBEDDING_CHARS).len(),
            MAX_EMBEDDING_CHARS
        );
    }

    #[test]
    fn custom_limit_applies() {
        assert_eq!(truncate_for_embedding("abcdefghij", 5), "abcde");
    }
}

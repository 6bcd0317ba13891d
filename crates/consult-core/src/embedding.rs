//! Embedding client trait and vector utilities.
//!
//! Defines the [`Embedder`] trait that turns text into a fixed-length vector,
//! plus pure helpers for input truncation, vector serialization and cosine
//! similarity. Concrete HTTP providers (OpenAI, Ollama) live in the
//! application crate.

use async_trait::async_trait;

use crate::error::PipelineError;

/// Default input cap, in characters, applied before any text is embedded.
pub const DEFAULT_MAX_INPUT_CHARS: usize = 10_000;

/// A text embedding backend.
///
/// Implementations report throttling as [`PipelineError::EmbeddingRateLimited`]
/// and every other failure (unreachable, timeout, malformed output) as
/// [`PipelineError::EmbeddingUnavailable`].
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Returns the model identifier (e.g. `"text-embedding-3-small"`).
    fn model_name(&self) -> &str;

    /// Returns the vector dimensionality (e.g. `1536`).
    fn dims(&self) -> usize;

    /// Embed one text. Callers pass text already cut with
    /// [`truncate_for_embedding`].
    async fn embed(&self, text: &str) -> Result<Vec<f32>, PipelineError>;
}

/// Deterministically cap text to `max_chars` characters.
///
/// Leading/trailing whitespace is trimmed first, then the text is cut at the
/// `max_chars`-th character. Identical long inputs therefore always produce
/// identical embedding inputs.
pub fn truncate_for_embedding(text: &str, max_chars: usize) -> &str {
    let trimmed = text.trim();
    match trimmed.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => &trimmed[..byte_idx],
        None => trimmed,
    }
}

/// Check a provider response against the expected dimensionality.
pub fn check_dims(vector: &[f32], dims: usize) -> Result<(), PipelineError> {
    if vector.len() != dims {
        return Err(PipelineError::EmbeddingUnavailable(format!(
            "expected {} dimensions, provider returned {}",
            dims,
            vector.len()
        )));
    }
    Ok(())
}

/// Encode a float vector as a BLOB (little-endian f32 bytes).
///
/// # Example
///
/// ```rust
/// use consult_core::embedding::{vec_to_blob, blob_to_vec};
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

/// Decode a BLOB back into a float vector.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns a value in `[-1.0, 1.0]`, or `0.0` for empty vectors, vectors of
/// different lengths, or zero-norm vectors.
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_short_text_untouched() {
        assert_eq!(truncate_for_embedding("  hello  ", 100), "hello");
    }

    #[test]
    fn test_truncate_counts_chars_not_bytes() {
        let text = "Привет мир";
        let cut = truncate_for_embedding(text, 6);
        assert_eq!(cut, "Привет");
        assert_eq!(truncate_for_embedding(text, 6), cut);
    }

    #[test]
    fn test_check_dims() {
        assert!(check_dims(&[0.0; 3], 3).is_ok());
        let err = check_dims(&[0.0; 2], 3).unwrap_err();
        assert!(matches!(err, PipelineError::EmbeddingUnavailable(_)));
    }

    #[test]
    fn test_vec_blob_roundtrip() {
        let vec = vec![1.0f32, -2.5, 3.125, 0.0, -0.001];
        assert_eq!(blob_to_vec(&vec_to_blob(&vec)), vec);
    }

    #[test]
    fn test_cosine_identical() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_orthogonal() {
        let sim = cosine_similarity(&[1.0, 0.0, 0.0], &[0.0, 1.0, 0.0]);
        assert!(sim.abs() < 1e-6);
    }

    #[test]
    fn test_cosine_degenerate_inputs() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }
}

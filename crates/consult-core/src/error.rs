//! Failure kinds of the conversation pipeline.
//!
//! Each external dependency maps its failures onto one of these kinds so the
//! composer and engine can decide locally how to recover (fallback reply,
//! re-prompt, bounded retry) without inspecting transport details.

use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PipelineError {
    #[error("embedding provider unavailable: {0}")]
    EmbeddingUnavailable(String),

    #[error("embedding provider rate limited: {0}")]
    EmbeddingRateLimited(String),

    #[error("document store unavailable: {0}")]
    RetrievalUnavailable(String),

    #[error("generation model unavailable: {0}")]
    GenerationUnavailable(String),

    #[error("generation model rate limited: {0}")]
    GenerationRateLimited(String),

    #[error("CRM unavailable: {0}")]
    CrmUnavailable(String),

    #[error("manager notification failed: {0}")]
    NotificationFailed(String),

    #[error("could not parse contact details: {0}")]
    ParseFailed(String),
}

impl PipelineError {
    /// True for throttling errors, which callers back off from differently.
    pub fn is_rate_limited(&self) -> bool {
        matches!(
            self,
            PipelineError::EmbeddingRateLimited(_) | PipelineError::GenerationRateLimited(_)
        )
    }

    /// Short machine-readable label for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::EmbeddingUnavailable(_) => "embedding_unavailable",
            PipelineError::EmbeddingRateLimited(_) => "embedding_rate_limited",
            PipelineError::RetrievalUnavailable(_) => "retrieval_unavailable",
            PipelineError::GenerationUnavailable(_) => "generation_unavailable",
            PipelineError::GenerationRateLimited(_) => "generation_rate_limited",
            PipelineError::CrmUnavailable(_) => "crm_unavailable",
            PipelineError::NotificationFailed(_) => "notification_failed",
            PipelineError::ParseFailed(_) => "parse_failed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limit_kinds_are_distinct_from_unavailable() {
        assert!(PipelineError::EmbeddingRateLimited("429".into()).is_rate_limited());
        assert!(!PipelineError::EmbeddingUnavailable("down".into()).is_rate_limited());
        assert!(PipelineError::GenerationRateLimited("429".into()).is_rate_limited());
        assert_eq!(
            PipelineError::CrmUnavailable("x".into()).kind(),
            "crm_unavailable"
        );
    }
}

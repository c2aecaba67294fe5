use async_trait::async_trait;

use crate::error::EmbeddingError;

/// Uniform "text -> fixed-length vector" contract over an embedding model.
///
/// Implementations must return exactly one vector per input text, each of
/// length [`EmbeddingProvider::dimension`]. A failure for any item fails the
/// whole call.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;

    fn dimension(&self) -> usize;

    /// Stable identity used to route collections. Never changes for the lifetime of a provider.
    fn provider_id(&self) -> &str;

    /// Largest batch accepted by a single `embed` call.
    fn max_batch_size(&self) -> usize {
        256
    }
}

/// Shared input checks run by every provider before touching its backend.
pub fn check_batch(texts: &[String], max: usize) -> Result<(), EmbeddingError> {
    if texts.is_empty() {
        return Err(EmbeddingError::EmptyInput);
    }
    if texts.len() > max {
        return Err(EmbeddingError::BatchTooLarge {
            size: texts.len(),
            max,
        });
    }
    Ok(())
}

use async_trait::async_trait;

use crate::domain::document::{Document, DocumentType, RetrievedContext};
use crate::error::VectorStoreError;

/// Persists (vector, document) pairs and answers nearest-neighbour queries.
///
/// Collections are created lazily by the first `upsert`; that call also fixes
/// the collection's dimension. An `upsert` is all-or-nothing.
#[async_trait]
pub trait VectorRepository: Send + Sync {
    /// Inserts documents with their vectors. Fails without writing anything if
    /// the lengths differ or any vector disagrees with the collection dimension.
    async fn upsert(&self, collection: &str, documents: &[Document], vectors: &[Vec<f32>]) -> Result<(), VectorStoreError>;

    /// Returns at most `k` documents scoring at least `min_score`, best first,
    /// ties newest first. With `type_filter` only documents of that type are
    /// ranked, so `k` counts matching documents. A missing collection yields
    /// an empty context.
    async fn search(
        &self,
        collection: &str,
        query_vector: &[f32],
        k: usize,
        min_score: f32,
        type_filter: Option<DocumentType>,
    ) -> Result<RetrievedContext, VectorStoreError>;

    /// Drops a collection and everything in it. Missing collections are fine.
    async fn reset_collection(&self, collection: &str) -> Result<(), VectorStoreError>;

    /// Recorded dimension of a collection, `None` if it does not exist yet.
    async fn dimension_of(&self, collection: &str) -> Result<Option<usize>, VectorStoreError>;
}

/// Collection addressed by a given embedding provider. Pure, so the same
/// provider always lands in the same collection and providers never mix.
pub fn collection_for(base_name: &str, provider_id: &str) -> String {
    format!("{}_{}", base_name, provider_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collection_for_is_stable_and_provider_scoped() {
        assert_eq!(collection_for("salary_queries", "openai"), "salary_queries_openai");
        assert_eq!(
            collection_for("salary_queries", "openai"),
            collection_for("salary_queries", "openai")
        );
        assert_ne!(
            collection_for("salary_queries", "openai"),
            collection_for("salary_queries", "huggingface")
        );
    }
}

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::Serialize;

use super::extractor::DocumentExtractor;
use crate::domain::document::{Document, DocumentType};
use crate::domain::embedding::EmbeddingProvider;
use crate::domain::vector_repository::{collection_for, VectorRepository};
use crate::error::RagError;
use crate::infrastructure::file_system::load_markdown_documents;
use crate::infrastructure::markdown::markdown_to_text;

/// Built-in domain knowledge: (category, markdown source).
const BUILTIN_DOMAIN_DOCS: [(&str, &str); 4] = [
    ("system_overview", include_str!("../../knowledge/system_overview.md")),
    ("advance_guidelines", include_str!("../../knowledge/advance_guidelines.md")),
    ("bill_guidelines", include_str!("../../knowledge/bill_guidelines.md")),
    ("report_guidelines", include_str!("../../knowledge/report_guidelines.md")),
];

/// The fixed domain documents, plus any `.md` files from `extra_dir`.
pub fn domain_documents(extra_dir: Option<&PathBuf>, now: DateTime<Utc>) -> Vec<Document> {
    let mut docs: Vec<Document> = BUILTIN_DOMAIN_DOCS
        .iter()
        .map(|(category, markdown)| {
            Document::created_at(DocumentType::DomainKnowledge, markdown_to_text(markdown), now)
                .with_meta("category", *category)
                .with_meta("source", "builtin")
        })
        .collect();

    if let Some(dir) = extra_dir {
        match load_markdown_documents(dir) {
            Ok(files) => docs.extend(files.into_iter().map(|file| {
                Document::created_at(DocumentType::DomainKnowledge, file.text, now)
                    .with_meta("category", file.title)
                    .with_meta("source", file.path.to_string_lossy().to_string())
            })),
            Err(e) => warn!("Ignoring domain documents directory: {}", e),
        }
    }
    docs
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BuildOptions {
    pub entity_limit: Option<usize>,
    /// Recreate the collection before inserting. Without it a build appends,
    /// so repeated builds leave duplicate content behind.
    pub clear_existing: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BuildReport {
    pub collection: String,
    pub loaded: usize,
    pub added: usize,
    pub by_type: BTreeMap<String, usize>,
    pub skipped: usize,
    pub failed_modes: Vec<String>,
}

/// Extraction + domain documents -> embeddings -> the active provider's collection.
pub struct KnowledgeBaseBuilder {
    extractor: DocumentExtractor,
    embedder: Arc<dyn EmbeddingProvider>,
    repository: Arc<dyn VectorRepository>,
    base_collection: String,
    batch_size: usize,
    trailing_months: u32,
    domain_docs_dir: Option<PathBuf>,
}

impl KnowledgeBaseBuilder {
    pub fn new(
        extractor: DocumentExtractor,
        embedder: Arc<dyn EmbeddingProvider>,
        repository: Arc<dyn VectorRepository>,
        base_collection: impl Into<String>,
    ) -> Self {
        Self {
            extractor,
            embedder,
            repository,
            base_collection: base_collection.into(),
            batch_size: 32,
            trailing_months: 12,
            domain_docs_dir: None,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_trailing_months(mut self, months: u32) -> Self {
        self.trailing_months = months;
        self
    }

    pub fn with_domain_docs_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.domain_docs_dir = dir;
        self
    }

    pub fn collection(&self) -> String {
        collection_for(&self.base_collection, self.embedder.provider_id())
    }

    pub async fn build(&self, options: BuildOptions) -> Result<BuildReport, RagError> {
        let collection = self.collection();
        let now = Utc::now();
        info!(
            "Building knowledge base: provider={}, collection={}",
            self.embedder.provider_id(),
            collection
        );

        if options.clear_existing {
            info!("Clearing existing knowledge base collection '{}'", collection);
            self.repository.reset_collection(&collection).await?;
        }

        let mut documents = domain_documents(self.domain_docs_dir.as_ref(), now);
        let extraction = self
            .extractor
            .extract_all(options.entity_limit, self.trailing_months, now)
            .await;
        documents.extend(extraction.documents);

        let mut report = BuildReport {
            collection: collection.clone(),
            loaded: documents.len(),
            skipped: extraction.skipped,
            failed_modes: extraction.failed_modes.iter().map(|m| m.to_string()).collect(),
            ..BuildReport::default()
        };
        for doc in &documents {
            *report.by_type.entry(doc.type_tag().to_string()).or_default() += 1;
        }
        info!("Loaded {} documents ({} skipped)", report.loaded, report.skipped);

        // Embed everything up front: a failed batch must not leave part of the build inserted.
        let batch_size = self.batch_size.min(self.embedder.max_batch_size()).max(1);
        let mut vectors = Vec::with_capacity(documents.len());
        for chunk in documents.chunks(batch_size) {
            let texts: Vec<String> = chunk.iter().map(|d| d.content.clone()).collect();
            vectors.extend(self.embedder.embed(&texts).await?);
        }

        for (docs, vecs) in documents.chunks(batch_size).zip(vectors.chunks(batch_size)) {
            self.repository.upsert(&collection, docs, vecs).await?;
            report.added += docs.len();
            debug!("Inserted {}/{} documents", report.added, report.loaded);
        }

        for (doc_type, count) in &report.by_type {
            info!("  - {}: {}", doc_type, count);
        }
        info!("Knowledge base build finished: loaded={}, added={}", report.loaded, report.added);
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::records::MockRecordStore;
    use crate::error::{EmbeddingError, VectorStoreError};
    use crate::infrastructure::embedding::HashingEmbeddingProvider;
    use crate::infrastructure::memory_store::MemoryVectorStore;
    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn empty_store() -> MockRecordStore {
        let mut store = MockRecordStore::new();
        store.expect_list_employees().returning(|_| Ok(vec![]));
        store.expect_advances().returning(|_| Ok(vec![]));
        store.expect_bills().returning(|_| Ok(vec![]));
        store
    }

    #[test]
    fn test_builtin_domain_documents() {
        let docs = domain_documents(None, Utc::now());
        assert_eq!(docs.len(), 4);
        assert!(docs.iter().all(|d| d.doc_type() == Some(DocumentType::DomainKnowledge)));
        assert!(docs[0].content.starts_with("Salary Management System - Overview"));
        assert_eq!(docs[1].meta_str("category"), Some("advance_guidelines"));
    }

    #[tokio::test]
    async fn test_build_appends_unless_cleared() {
        let repo = Arc::new(MemoryVectorStore::new());
        let builder = KnowledgeBaseBuilder::new(
            DocumentExtractor::new(Arc::new(empty_store())),
            Arc::new(HashingEmbeddingProvider::new(32)),
            repo.clone(),
            "salary_queries",
        )
        .with_batch_size(3);

        let report = builder.build(BuildOptions::default()).await.unwrap();
        assert_eq!(report.collection, "salary_queries_hashing");
        assert_eq!((report.loaded, report.added), (4, 4));
        assert_eq!(report.by_type.get("domain_knowledge"), Some(&4));

        // Appending duplicates content; this is tolerated, not deduplicated.
        builder.build(BuildOptions::default()).await.unwrap();
        assert_eq!(repo.len("salary_queries_hashing").await, 8);

        builder
            .build(BuildOptions {
                clear_existing: true,
                ..BuildOptions::default()
            })
            .await
            .unwrap();
        assert_eq!(repo.len("salary_queries_hashing").await, 4);
    }

    struct FailingSecondBatch {
        inner: HashingEmbeddingProvider,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl EmbeddingProvider for FailingSecondBatch {
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 1 {
                return Err(EmbeddingError::Unavailable {
                    provider: "flaky".into(),
                    message: "503".into(),
                });
            }
            self.inner.embed(texts).await
        }

        fn dimension(&self) -> usize {
            self.inner.dimension()
        }

        fn provider_id(&self) -> &str {
            "flaky"
        }
    }

    #[tokio::test]
    async fn test_embedding_failure_inserts_nothing() {
        let repo = Arc::new(MemoryVectorStore::new());
        let builder = KnowledgeBaseBuilder::new(
            DocumentExtractor::new(Arc::new(empty_store())),
            Arc::new(FailingSecondBatch {
                inner: HashingEmbeddingProvider::new(8),
                calls: AtomicUsize::new(0),
            }),
            repo.clone(),
            "salary_queries",
        )
        .with_batch_size(2);

        let err = builder.build(BuildOptions::default()).await.unwrap_err();
        assert_matches!(err, RagError::Embedding(_));
        assert_eq!(repo.len("salary_queries_flaky").await, 0);
    }

    #[tokio::test]
    async fn test_dimension_mismatch_is_fatal() {
        let repo = Arc::new(MemoryVectorStore::new());
        repo.upsert(
            "salary_queries_hashing",
            &[Document::new(DocumentType::DomainKnowledge, "old")],
            &[vec![1.0; 16]],
        )
        .await
        .unwrap();
        let builder = KnowledgeBaseBuilder::new(
            DocumentExtractor::new(Arc::new(empty_store())),
            Arc::new(HashingEmbeddingProvider::new(32)),
            repo.clone(),
            "salary_queries",
        );
        let err = builder.build(BuildOptions::default()).await.unwrap_err();
        assert_matches!(err, RagError::VectorStore(VectorStoreError::DimensionMismatch { expected: 16, actual: 32, .. }));
        assert_eq!(repo.len("salary_queries_hashing").await, 1);
    }
}

//! Explicit construction and teardown of the shared pipeline resources.
//!
//! Nothing here is global: [`Services::initialize`] builds every handle from
//! an [`AppConfig`], callers pass them down, and [`Services::shutdown`]
//! persists what needs persisting. Switching provider means building a new
//! `Services`.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};

use crate::application::{
    AgentSettings, ChainOrchestrator, DocumentExtractor, InvocationPolicy, KnowledgeBaseBuilder, ModelInvoker,
    QueryDataFetcher, RetrievalEngine, RetrievalSettings, SalaryAgent,
};
use crate::config::{AppConfig, ProviderKind, VectorBackend};
use crate::domain::embedding::EmbeddingProvider;
use crate::domain::language_model::LanguageModel;
use crate::domain::records::RecordStore;
use crate::domain::vector_repository::VectorRepository;
use crate::infrastructure::{
    FastEmbedProvider, HashingEmbeddingProvider, MemoryVectorStore, OpenAiCompatibleChatModel, OpenAiEmbeddingProvider,
    QdrantVectorRepository, RecordSnapshot, SamplingParams, SnapshotRecordStore,
};

pub struct Services {
    pub config: Arc<AppConfig>,
    pub embedder: Arc<dyn EmbeddingProvider>,
    pub repository: Arc<dyn VectorRepository>,
    pub records: Arc<dyn RecordStore>,
    http: reqwest::Client,
    /// Set when the in-process backend is active, so it can be saved on shutdown.
    memory_store: Option<Arc<MemoryVectorStore>>,
}

impl Services {
    pub async fn initialize(config: AppConfig) -> Result<Self> {
        let errors = config.validate();
        if !errors.is_empty() {
            return Err(anyhow!("Configuration errors: {}", errors.join(", ")));
        }
        let config = Arc::new(config);
        let http = reqwest::Client::new();

        let embedder: Arc<dyn EmbeddingProvider> = match config.ai.provider {
            ProviderKind::OpenAi => {
                let openai = &config.ai.openai;
                Arc::new(
                    OpenAiEmbeddingProvider::new(http.clone(), &openai.api_key, &openai.embedding_model, &openai.base_url)
                        .with_dimension(openai.embedding_dimension),
                )
            }
            ProviderKind::HuggingFace => {
                let cache_dir = config.ai.huggingface.embedding_cache_dir.clone();
                let provider = tokio::task::spawn_blocking(move || FastEmbedProvider::new(cache_dir))
                    .await?
                    .context("Failed to initialize the local embedding model")?;
                Arc::new(provider)
            }
            ProviderKind::Hashing => Arc::new(HashingEmbeddingProvider::new(config.ai.hashing.dimension)),
        };
        log::info!(
            "Embedding provider '{}' ready ({} dimensions)",
            embedder.provider_id(),
            embedder.dimension()
        );

        let (repository, memory_store): (Arc<dyn VectorRepository>, Option<Arc<MemoryVectorStore>>) =
            match config.vector_store.backend {
                VectorBackend::Memory => {
                    let store = match config.vector_store.snapshot_path.clone() {
                        Some(path) => tokio::task::spawn_blocking(move || MemoryVectorStore::load(&path))
                            .await?
                            .context("Failed to load the vector index snapshot")?,
                        None => MemoryVectorStore::new(),
                    };
                    let store = Arc::new(store);
                    (store.clone(), Some(store))
                }
                VectorBackend::Qdrant => {
                    let repo = QdrantVectorRepository::connect(&config.vector_store.qdrant_url)
                        .with_context(|| format!("Failed to connect to Qdrant at {}", config.vector_store.qdrant_url))?;
                    (Arc::new(repo), None)
                }
            };

        let records: Arc<dyn RecordStore> = match &config.record_store.snapshot_path {
            Some(path) => Arc::new(SnapshotRecordStore::from_json_file(path)?),
            None => {
                log::warn!("No record_store.snapshot_path configured; using an empty record store");
                Arc::new(SnapshotRecordStore::new(RecordSnapshot::default()))
            }
        };

        Ok(Self {
            config,
            embedder,
            repository,
            records,
            http,
            memory_store,
        })
    }

    pub fn knowledge_base_builder(&self) -> KnowledgeBaseBuilder {
        let kb = &self.config.knowledge_base;
        KnowledgeBaseBuilder::new(
            DocumentExtractor::new(self.records.clone()),
            self.embedder.clone(),
            self.repository.clone(),
            &self.config.vector_store.base_collection_name,
        )
        .with_batch_size(self.config.rag.embed_batch_size)
        .with_trailing_months(kb.trailing_months)
        .with_domain_docs_dir(kb.domain_docs_dir.clone())
    }

    pub fn retrieval_engine(&self) -> Arc<RetrievalEngine> {
        let rag = &self.config.rag;
        Arc::new(RetrievalEngine::new(
            self.embedder.clone(),
            self.repository.clone(),
            &self.config.vector_store.base_collection_name,
            RetrievalSettings {
                top_k: rag.top_k,
                similarity_threshold: rag.similarity_threshold,
                enable_query_expansion: rag.enable_query_expansion,
                max_query_variants: rag.max_query_variants,
            },
        ))
    }

    /// Chat model of the configured provider. The offline `hashing` provider
    /// still generates through the OpenAI settings.
    pub fn language_model(&self) -> Result<Arc<dyn LanguageModel>> {
        let ai = &self.config.ai;
        let (api_key, model, base_url) = match ai.provider {
            ProviderKind::OpenAi | ProviderKind::Hashing => (&ai.openai.api_key, &ai.openai.model, &ai.openai.base_url),
            ProviderKind::HuggingFace => (&ai.huggingface.api_key, &ai.huggingface.model, &ai.huggingface.base_url),
        };
        if api_key.trim().is_empty() {
            return Err(anyhow!("No API key configured for the {} chat model", ai.provider.as_str()));
        }
        Ok(Arc::new(OpenAiCompatibleChatModel::new(
            self.http.clone(),
            api_key,
            model,
            base_url,
            SamplingParams {
                max_tokens: ai.max_tokens,
                temperature: ai.temperature,
                top_p: ai.top_p,
            },
            Duration::from_secs(ai.request_timeout_secs),
        )))
    }

    pub fn agent(&self) -> Result<SalaryAgent> {
        self.agent_with_model(self.language_model()?)
    }

    /// Agent wired to an explicit model, e.g. a local double.
    pub fn agent_with_model(&self, model: Arc<dyn LanguageModel>) -> Result<SalaryAgent> {
        let generation = &self.config.generation;
        let invoker = Arc::new(ModelInvoker::new(
            model,
            InvocationPolicy {
                attempts: generation.invocation_attempts,
                base_delay: Duration::from_millis(generation.retry_base_delay_ms),
                timeout: Duration::from_secs(self.config.ai.request_timeout_secs),
            },
        ));
        let retrieval = self.retrieval_engine();
        let orchestrator = ChainOrchestrator::new(invoker, generation.parse_retries, retrieval.clone());
        Ok(SalaryAgent::new(
            QueryDataFetcher::new(self.records.clone()),
            retrieval,
            orchestrator,
            AgentSettings {
                primary_strategy: generation.primary_strategy,
                top_k: self.config.rag.top_k,
                context_max_length: self.config.rag.context_max_length,
                multi_step_steps: generation.multi_step_steps.clone(),
            },
        ))
    }

    /// Persists the in-process vector index, if that backend is active.
    pub async fn shutdown(self) -> Result<()> {
        if let (Some(store), Some(path)) = (&self.memory_store, &self.config.vector_store.snapshot_path) {
            save_snapshot(store, path).await?;
        }
        Ok(())
    }
}

async fn save_snapshot(store: &MemoryVectorStore, path: &Path) -> Result<()> {
    store
        .save(path)
        .await
        .with_context(|| format!("Failed to save vector index snapshot to {:?}", path))?;
    log::info!("Saved vector index snapshot to {:?}", path);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::BuildOptions;
    use crate::config::AppConfig;
    use tempfile::tempdir;

    fn hashing_config(dir: &Path) -> AppConfig {
        let mut config = AppConfig::default();
        config.ai.provider = ProviderKind::Hashing;
        config.ai.hashing.dimension = 32;
        config.rag.similarity_threshold = 0.0;
        config.vector_store.snapshot_path = Some(dir.join("index").join("kb.jsonl.gz"));
        config
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected_up_front() {
        let err = Services::initialize(AppConfig::default()).await.err().unwrap();
        assert!(err.to_string().contains("ai.openai.api_key"));
    }

    #[tokio::test]
    async fn test_snapshot_survives_restart() {
        let dir = tempdir().unwrap();
        let services = Services::initialize(hashing_config(dir.path())).await.unwrap();
        let report = services.knowledge_base_builder().build(BuildOptions::default()).await.unwrap();
        assert_eq!(report.collection, "salary_queries_hashing");
        services.shutdown().await.unwrap();

        let reopened = Services::initialize(hashing_config(dir.path())).await.unwrap();
        let ctx = reopened
            .retrieval_engine()
            .retrieve("advance request guidelines", 3, None)
            .await
            .unwrap();
        assert!(!ctx.is_empty());
    }

    #[tokio::test]
    async fn test_snapshot_creates_missing_parent_directories() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a").join("b").join("kb.jsonl.gz");
        save_snapshot(&MemoryVectorStore::new(), &path).await.unwrap();
        assert!(path.exists());
        save_snapshot(&MemoryVectorStore::new(), &path).await.unwrap();
    }

    #[tokio::test]
    async fn test_hashing_provider_needs_openai_key_only_for_generation() {
        let dir = tempdir().unwrap();
        let services = Services::initialize(hashing_config(dir.path())).await.unwrap();
        assert!(services.agent().is_err());
    }
}

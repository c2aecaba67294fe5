use anyhow::{Context, Result};
use directories::ProjectDirs;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::domain::generation::Strategy;

pub const CONFIG_PATH_ENV: &str = "SRAG_CONFIG_PATH";
const DEFAULT_CONFIG_FILE: &str = "salary_rag.toml";
const ENV_PREFIX: &str = "SRAG_";
const SNAPSHOT_FILENAME: &str = "knowledge_base.jsonl.gz";

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("io", "salary-rag", "salary-rag")
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    #[serde(rename = "openai")]
    OpenAi,
    #[serde(rename = "huggingface")]
    HuggingFace,
    #[serde(rename = "hashing")]
    Hashing,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "openai",
            ProviderKind::HuggingFace => "huggingface",
            ProviderKind::Hashing => "hashing",
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum VectorBackend {
    Memory,
    Qdrant,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct OpenAiConfig {
    #[serde(default)]
    pub api_key: String,
    pub model: String,
    pub embedding_model: String,
    pub embedding_dimension: usize,
    pub base_url: String,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: "gpt-4o-mini".to_string(),
            embedding_model: "text-embedding-3-small".to_string(),
            embedding_dimension: 1536,
            base_url: "https://api.openai.com/v1".to_string(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct HuggingFaceConfig {
    #[serde(default)]
    pub api_key: String,
    pub model: String,
    pub base_url: String,
    /// Where the local embedding model is cached.
    #[serde(default)]
    pub embedding_cache_dir: Option<PathBuf>,
}

impl Default for HuggingFaceConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: "mistralai/Mistral-7B-Instruct-v0.3".to_string(),
            base_url: "https://router.huggingface.co/v1".to_string(),
            embedding_cache_dir: project_dirs().map(|dirs| dirs.cache_dir().to_path_buf()),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct HashingConfig {
    pub dimension: usize,
}

impl Default for HashingConfig {
    fn default() -> Self {
        Self { dimension: 256 }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AiConfig {
    pub provider: ProviderKind,
    #[serde(default)]
    pub openai: OpenAiConfig,
    #[serde(default)]
    pub huggingface: HuggingFaceConfig,
    #[serde(default)]
    pub hashing: HashingConfig,
    pub max_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
    pub request_timeout_secs: u64,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            provider: ProviderKind::OpenAi,
            openai: OpenAiConfig::default(),
            huggingface: HuggingFaceConfig::default(),
            hashing: HashingConfig::default(),
            max_tokens: 2000,
            temperature: 0.3,
            top_p: 0.9,
            request_timeout_secs: 60,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct VectorStoreConfig {
    pub backend: VectorBackend,
    pub base_collection_name: String,
    pub qdrant_url: String,
    /// Persistence file of the in-process backend.
    #[serde(default)]
    pub snapshot_path: Option<PathBuf>,
}

impl Default for VectorStoreConfig {
    fn default() -> Self {
        Self {
            backend: VectorBackend::Memory,
            base_collection_name: "salary_queries".to_string(),
            qdrant_url: "http://localhost:6334".to_string(),
            snapshot_path: project_dirs().map(|dirs| dirs.data_dir().join(SNAPSHOT_FILENAME)),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RagConfig {
    pub top_k: usize,
    pub similarity_threshold: f32,
    pub enable_query_expansion: bool,
    pub max_query_variants: usize,
    #[serde(default)]
    pub context_max_length: Option<usize>,
    pub embed_batch_size: usize,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            top_k: 5,
            similarity_threshold: 0.7,
            enable_query_expansion: true,
            max_query_variants: 3,
            context_max_length: None,
            embed_batch_size: 32,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct GenerationConfig {
    pub primary_strategy: Strategy,
    /// Re-prompts after unparseable structured output.
    pub parse_retries: u32,
    /// Tries per model call, including the first, for transient errors.
    pub invocation_attempts: u32,
    pub retry_base_delay_ms: u64,
    pub multi_step_steps: Vec<String>,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            primary_strategy: Strategy::Structured,
            parse_retries: 3,
            invocation_attempts: 3,
            retry_base_delay_ms: 1000,
            multi_step_steps: crate::application::chains::DEFAULT_STEPS
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct KnowledgeBaseConfig {
    #[serde(default)]
    pub domain_docs_dir: Option<PathBuf>,
    pub trailing_months: u32,
    /// Recreate the collection on every build. Off by default: builds append.
    pub clear_on_build: bool,
}

impl Default for KnowledgeBaseConfig {
    fn default() -> Self {
        Self {
            domain_docs_dir: None,
            trailing_months: 12,
            clear_on_build: false,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct RecordStoreConfig {
    /// JSON export of the record store.
    #[serde(default)]
    pub snapshot_path: Option<PathBuf>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct AppConfig {
    #[serde(default)]
    pub ai: AiConfig,
    #[serde(default)]
    pub vector_store: VectorStoreConfig,
    #[serde(default)]
    pub rag: RagConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub knowledge_base: KnowledgeBaseConfig,
    #[serde(default)]
    pub record_store: RecordStoreConfig,
}

/// Effective configuration without secrets.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct ConfigSummary {
    pub provider: String,
    pub chat_model: String,
    pub embedding_model: String,
    pub openai_api_key_set: bool,
    pub huggingface_api_key_set: bool,
    pub vector_backend: String,
    pub base_collection_name: String,
    pub top_k: usize,
    pub similarity_threshold: f32,
    pub enable_query_expansion: bool,
    pub max_tokens: u32,
    pub temperature: f32,
    pub primary_strategy: String,
    pub parse_retries: u32,
    pub invocation_attempts: u32,
    pub clear_on_build: bool,
}

impl AppConfig {
    /// All problems found, empty when the configuration is usable.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        match self.ai.provider {
            ProviderKind::OpenAi if self.ai.openai.api_key.trim().is_empty() => {
                errors.push("ai.openai.api_key is required when ai.provider is 'openai'".to_string())
            }
            ProviderKind::HuggingFace if self.ai.huggingface.api_key.trim().is_empty() => {
                errors.push("ai.huggingface.api_key is required when ai.provider is 'huggingface'".to_string())
            }
            _ => {}
        }
        if self.ai.provider == ProviderKind::Hashing && self.ai.hashing.dimension == 0 {
            errors.push("ai.hashing.dimension must be at least 1".to_string());
        }
        if self.rag.top_k < 1 {
            errors.push("rag.top_k must be at least 1".to_string());
        }
        if !(0.0..=1.0).contains(&self.rag.similarity_threshold) {
            errors.push("rag.similarity_threshold must be between 0 and 1".to_string());
        }
        if !(0.0..=2.0).contains(&self.ai.temperature) {
            errors.push("ai.temperature must be between 0 and 2".to_string());
        }
        if !(0.0..=1.0).contains(&self.ai.top_p) {
            errors.push("ai.top_p must be between 0 and 1".to_string());
        }
        if self.generation.parse_retries < 1 {
            errors.push("generation.parse_retries must be at least 1".to_string());
        }
        if self.generation.invocation_attempts < 1 {
            errors.push("generation.invocation_attempts must be at least 1".to_string());
        }
        if self.rag.embed_batch_size < 1 {
            errors.push("rag.embed_batch_size must be at least 1".to_string());
        }
        if let Some(path) = &self.vector_store.snapshot_path {
            if path.as_os_str().is_empty() {
                errors.push("vector_store.snapshot_path cannot be empty".to_string());
            }
        }
        errors
    }

    pub fn config_summary(&self) -> ConfigSummary {
        let (chat_model, embedding_model) = match self.ai.provider {
            ProviderKind::OpenAi => (self.ai.openai.model.clone(), self.ai.openai.embedding_model.clone()),
            ProviderKind::HuggingFace => (self.ai.huggingface.model.clone(), "sentence-transformers/all-MiniLM-L6-v2".to_string()),
            ProviderKind::Hashing => (
                self.ai.openai.model.clone(),
                format!("feature-hashing-{}", self.ai.hashing.dimension),
            ),
        };
        ConfigSummary {
            provider: self.ai.provider.as_str().to_string(),
            chat_model,
            embedding_model,
            openai_api_key_set: !self.ai.openai.api_key.trim().is_empty(),
            huggingface_api_key_set: !self.ai.huggingface.api_key.trim().is_empty(),
            vector_backend: match self.vector_store.backend {
                VectorBackend::Memory => "memory".to_string(),
                VectorBackend::Qdrant => "qdrant".to_string(),
            },
            base_collection_name: self.vector_store.base_collection_name.clone(),
            top_k: self.rag.top_k,
            similarity_threshold: self.rag.similarity_threshold,
            enable_query_expansion: self.rag.enable_query_expansion,
            max_tokens: self.ai.max_tokens,
            temperature: self.ai.temperature,
            primary_strategy: self.generation.primary_strategy.as_str().to_string(),
            parse_retries: self.generation.parse_retries,
            invocation_attempts: self.generation.invocation_attempts,
            clear_on_build: self.knowledge_base.clear_on_build,
        }
    }
}

/// Defaults, then the TOML file, then `SRAG_`-prefixed environment variables
/// (`__` separates nested keys, e.g. `SRAG_RAG__TOP_K`).
pub fn load_config() -> Result<AppConfig> {
    let config_path_env = std::env::var(CONFIG_PATH_ENV).ok();
    let config_path = config_path_env.clone().unwrap_or_else(|| DEFAULT_CONFIG_FILE.to_string());

    if let Some(ref env_path) = config_path_env {
        if !std::path::Path::new(env_path).exists() {
            return Err(anyhow::anyhow!("Config file not found at {}: {}", CONFIG_PATH_ENV, env_path));
        }
        log::info!("{} is set: {}", CONFIG_PATH_ENV, env_path);
    } else {
        log::debug!("{} not set, falling back to default: {}", CONFIG_PATH_ENV, config_path);
    }

    let figment = Figment::new()
        .merge(Serialized::defaults(AppConfig::default()))
        .merge(Toml::file(&config_path))
        .merge(Env::prefixed(ENV_PREFIX).split("__"));

    figment.extract().context("Failed to extract AppConfig")
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_load_config_default() {
        Jail::expect_with(|_jail| {
            let config = load_config().expect("Failed to load default config");
            assert_eq!(config.ai.provider, ProviderKind::OpenAi);
            assert_eq!(config.ai.openai.model, "gpt-4o-mini");
            assert_eq!(config.ai.max_tokens, 2000);
            assert_eq!(config.rag.top_k, 5);
            assert_eq!(config.rag.similarity_threshold, 0.7);
            assert_eq!(config.vector_store.base_collection_name, "salary_queries");
            assert_eq!(config.generation.primary_strategy, Strategy::Structured);
            assert_eq!(config.generation.multi_step_steps.len(), 4);
            assert!(!config.knowledge_base.clear_on_build);
            Ok(())
        });
    }

    #[test]
    #[serial]
    fn test_load_config_toml_only() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "salary_rag.toml",
                r#"
[ai]
provider = "hashing"

[ai.hashing]
dimension = 64

[rag]
top_k = 8
context_max_length = 4000

[generation]
primary_strategy = "multi_step"
multi_step_steps = ["Collect", "Conclude"]

[record_store]
snapshot_path = "/data/records.json"
                "#,
            )?;
            let config = load_config().expect("Failed to load TOML config");
            assert_eq!(config.ai.provider, ProviderKind::Hashing);
            assert_eq!(config.ai.hashing.dimension, 64);
            assert_eq!(config.rag.top_k, 8);
            assert_eq!(config.rag.context_max_length, Some(4000));
            assert_eq!(config.rag.similarity_threshold, 0.7);
            assert_eq!(config.generation.primary_strategy, Strategy::MultiStep);
            assert_eq!(config.generation.multi_step_steps, vec!["Collect", "Conclude"]);
            assert_eq!(config.record_store.snapshot_path, Some(PathBuf::from("/data/records.json")));
            assert!(config.validate().is_empty());
            Ok(())
        });
    }

    #[test]
    #[serial]
    fn test_load_config_env_overrides_toml() {
        Jail::expect_with(|jail| {
            jail.create_file("salary_rag.toml", "[rag]\ntop_k = 8\n")?;
            jail.set_env("SRAG_RAG__TOP_K", "3");
            jail.set_env("SRAG_AI__OPENAI__API_KEY", "sk-env");
            jail.set_env("SRAG_VECTOR_STORE__BACKEND", "qdrant");

            let config = load_config().expect("Failed to load env config");
            assert_eq!(config.rag.top_k, 3);
            assert_eq!(config.ai.openai.api_key, "sk-env");
            assert_eq!(config.vector_store.backend, VectorBackend::Qdrant);
            assert!(config.validate().is_empty());
            Ok(())
        });
    }

    #[test]
    #[serial]
    fn test_explicit_config_path_must_exist() {
        Jail::expect_with(|jail| {
            jail.set_env(CONFIG_PATH_ENV, "missing.toml");
            let err = load_config().unwrap_err();
            assert!(err.to_string().contains("missing.toml"));
            Ok(())
        });
    }

    #[test]
    #[serial]
    fn test_explicit_config_path_is_used() {
        Jail::expect_with(|jail| {
            jail.create_file("custom.toml", "[knowledge_base]\nclear_on_build = true\ntrailing_months = 6\n")?;
            jail.set_env(CONFIG_PATH_ENV, "custom.toml");
            let config = load_config().expect("Failed to load custom config");
            assert!(config.knowledge_base.clear_on_build);
            assert_eq!(config.knowledge_base.trailing_months, 6);
            Ok(())
        });
    }

    #[test]
    fn test_validate_reports_every_problem() {
        let mut config = AppConfig::default();
        config.rag.top_k = 0;
        config.rag.similarity_threshold = 1.5;
        config.ai.temperature = 3.0;
        config.generation.invocation_attempts = 0;
        let errors = config.validate();
        assert_eq!(errors.len(), 5, "{:?}", errors);
        assert!(errors[0].contains("ai.openai.api_key"));
    }

    #[test]
    fn test_config_summary_hides_secrets() {
        let mut config = AppConfig::default();
        config.ai.openai.api_key = "sk-secret".to_string();
        let summary = config.config_summary();
        assert!(summary.openai_api_key_set);
        assert!(!summary.huggingface_api_key_set);
        let rendered = toml::to_string(&summary).unwrap();
        assert!(!rendered.contains("sk-secret"));
        assert!(rendered.contains("provider = \"openai\""));
    }
}

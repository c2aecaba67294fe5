pub mod embedding;
pub mod file_system;
pub mod llm;
pub mod markdown;
pub mod memory_store;
pub mod record_store;
pub mod vector_db;

// Re-export key types for easier access from the application layer
pub use embedding::{FastEmbedProvider, HashingEmbeddingProvider, OpenAiEmbeddingProvider};
pub use llm::{OpenAiCompatibleChatModel, SamplingParams};
pub use memory_store::MemoryVectorStore;
pub use record_store::{RecordSnapshot, SnapshotRecordStore};
pub use vector_db::QdrantVectorRepository;

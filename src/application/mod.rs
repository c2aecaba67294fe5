pub mod agent;
pub mod chains;
pub mod extractor;
pub mod knowledge_base;
pub mod orchestrator;
pub mod prompt;
pub mod query_data;
pub mod retrieval;

pub use agent::{AgentSettings, ApiResponse, ReportKind, SalaryAgent};
pub use chains::{InvocationPolicy, ModelInvoker};
pub use extractor::DocumentExtractor;
pub use knowledge_base::{BuildOptions, BuildReport, KnowledgeBaseBuilder};
pub use orchestrator::ChainOrchestrator;
pub use query_data::{EmployeeRef, QueryDataFetcher};
pub use retrieval::{RetrievalEngine, RetrievalSettings};

//! The produced API: summaries, reports and free-text answers.
//!
//! Data fetching and retrieval run concurrently and both finish before the
//! prompt is assembled. Every outcome, including pipeline errors, comes back
//! as an [`ApiResponse`].

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use log::{error, info};
use serde::Serialize;
use serde_json::{json, Map, Value};

use super::orchestrator::{ChainOrchestrator, GenerationTask};
use super::prompt::{assemble, TemplateId};
use super::query_data::{EmployeeRef, QueryDataFetcher};
use super::retrieval::{format_context, RetrievalEngine};
use crate::domain::document::{DocumentType, RetrievedContext};
use crate::domain::generation::{GenerationResult, Strategy};
use crate::domain::records::DateRange;
use crate::error::RagError;

const SUMMARY_INCLUDE_FIELDS: &str = "advances, bills, attendance";

/// Uniform response envelope. `error` is set only when `success` is false.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApiResponse {
    pub success: bool,
    pub result: Value,
    pub metadata: Value,
    pub error: Option<String>,
}

impl ApiResponse {
    fn failed(error: impl fmt::Display, metadata: Value) -> Self {
        Self {
            success: false,
            result: Value::Null,
            metadata,
            error: Some(error.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportKind {
    Financial,
    Advances,
}

impl ReportKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportKind::Financial => "financial",
            ReportKind::Advances => "advances",
        }
    }

    fn template(&self) -> TemplateId {
        match self {
            ReportKind::Financial => TemplateId::FinancialReport,
            ReportKind::Advances => TemplateId::AdvanceReport,
        }
    }

    fn retrieval(&self) -> (&'static str, Option<DocumentType>) {
        match self {
            ReportKind::Financial => ("financial report trends analysis", None),
            ReportKind::Advances => ("advance request patterns by status and reason", Some(DocumentType::AdvancePattern)),
        }
    }
}

impl fmt::Display for ReportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReportKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "financial" | "financial_report" => Ok(ReportKind::Financial),
            "advances" | "advance_report" => Ok(ReportKind::Advances),
            other => Err(format!("Unknown report kind: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AgentSettings {
    pub primary_strategy: Strategy,
    pub top_k: usize,
    pub context_max_length: Option<usize>,
    pub multi_step_steps: Vec<String>,
}

/// One generation call, independent of the operation that prepared it.
struct Request<'a> {
    template: TemplateId,
    data: Value,
    params: BTreeMap<String, String>,
    query: String,
    extra_context: Option<&'a str>,
    strategy: Option<Strategy>,
    result_key: &'static str,
}

pub struct SalaryAgent {
    fetcher: QueryDataFetcher,
    retrieval: Arc<RetrievalEngine>,
    orchestrator: ChainOrchestrator,
    settings: AgentSettings,
}

fn describe_range(range: Option<DateRange>) -> String {
    match range {
        Some(r) => format!("{} to {}", r.start, r.end),
        None => "All time".to_string(),
    }
}

fn format_name(result: &GenerationResult) -> &'static str {
    if result.is_structured {
        "structured"
    } else {
        "text"
    }
}

impl SalaryAgent {
    pub fn new(fetcher: QueryDataFetcher, retrieval: Arc<RetrievalEngine>, orchestrator: ChainOrchestrator, settings: AgentSettings) -> Self {
        Self {
            fetcher,
            retrieval,
            orchestrator,
            settings,
        }
    }

    pub async fn generate_summary(&self, who: EmployeeRef, range: Option<DateRange>) -> ApiResponse {
        let mut metadata = Map::new();
        metadata.insert("query_type".into(), json!("employee_summary"));
        metadata.insert("date_range".into(), json!(range));
        match &who {
            EmployeeRef::Id(id) => metadata.insert("employee_id".into(), json!(id)),
            EmployeeRef::Name(name) => metadata.insert("employee_name".into(), json!(name)),
        };

        let query = match &who {
            EmployeeRef::Id(id) => format!("employee {} summary", id),
            EmployeeRef::Name(name) => format!("employee {} summary", name.trim()),
        };
        let (data, context) = tokio::join!(
            self.fetcher.employee_data(&who, range),
            self.retrieval.retrieve(&query, self.settings.top_k, None)
        );
        let data = match data {
            Ok(data) => data,
            Err(e) => return self.fail(RagError::from(e), metadata),
        };
        let Some(employee) = data.employee.clone() else {
            info!("No employee data for {:?}; returning an empty summary", who);
            metadata.insert("empty_data".into(), json!(true));
            return ApiResponse {
                success: true,
                result: json!({ "summary": Value::Null, "data": data.to_value() }),
                metadata: Value::Object(metadata),
                error: None,
            };
        };
        let context = match context {
            Ok(context) => context,
            Err(e) => return self.fail(e, metadata),
        };
        metadata.insert("employee_id".into(), json!(employee.id));
        metadata.insert("empty_data".into(), json!(false));

        let name = employee.full_name();
        let params = BTreeMap::from([
            ("employee_name".to_string(), name.clone()),
            ("date_range".to_string(), describe_range(range)),
            ("include_fields".to_string(), SUMMARY_INCLUDE_FIELDS.to_string()),
        ]);
        let request = Request {
            template: TemplateId::EmployeeSummary,
            data: data.to_value(),
            params,
            query: format!("Generate employee summary for {}", name),
            extra_context: None,
            strategy: None,
            result_key: "summary",
        };
        self.generate(request, &context, metadata).await
    }

    pub async fn generate_report(&self, kind: ReportKind, range: Option<DateRange>, employee_id: Option<i64>) -> ApiResponse {
        let mut metadata = Map::new();
        metadata.insert("query_type".into(), json!(kind.template().as_str()));
        metadata.insert("report_kind".into(), json!(kind.as_str()));
        metadata.insert("date_range".into(), json!(range));
        metadata.insert("employee_id".into(), json!(employee_id));

        let (query, type_filter) = kind.retrieval();
        let (data, context) = tokio::join!(
            self.fetcher.financial_data(range, employee_id),
            self.retrieval.retrieve(query, self.settings.top_k, type_filter)
        );
        let data = match data {
            Ok(data) => data,
            Err(e) => return self.fail(RagError::from(e), metadata),
        };
        let context = match context {
            Ok(context) => context,
            Err(e) => return self.fail(e, metadata),
        };
        metadata.insert("empty_data".into(), json!(data.is_empty()));

        let filters = match employee_id {
            Some(id) => format!("Employee ID: {}", id),
            None => "All employees".to_string(),
        };
        let params = BTreeMap::from([
            ("date_range".to_string(), describe_range(range)),
            ("filters".to_string(), filters),
        ]);
        let data = match serde_json::to_value(&data) {
            Ok(value) => value,
            Err(e) => return self.fail(RagError::from(e), metadata),
        };
        let request = Request {
            template: kind.template(),
            data,
            params,
            query: format!("Generate {} report with trends and analysis", kind),
            extra_context: None,
            strategy: None,
            result_key: "report",
        };
        self.generate(request, &context, metadata).await
    }

    /// Answers a free-text question. `extra_context` is shown to the model
    /// ahead of the retrieved context; `strategy` overrides the configured one.
    pub async fn answer_query(&self, question: &str, extra_context: Option<&str>, strategy: Option<Strategy>) -> ApiResponse {
        let mut metadata = Map::new();
        metadata.insert("query_type".into(), json!("general_query"));
        let question = question.trim();
        if question.is_empty() {
            return ApiResponse::failed("Question must not be empty", Value::Object(metadata));
        }

        let (data, context) = tokio::join!(
            self.fetcher.financial_data(None, None),
            self.retrieval.retrieve(question, self.settings.top_k, None)
        );
        let data = match data.map_err(RagError::from).and_then(|d| serde_json::to_value(&d).map_err(RagError::from)) {
            Ok(value) => value,
            Err(e) => return self.fail(e, metadata),
        };
        let context = match context {
            Ok(context) => context,
            Err(e) => return self.fail(e, metadata),
        };

        let params = BTreeMap::from([("user_question".to_string(), question.to_string())]);
        if let Some(strategy) = strategy {
            metadata.insert("strategy_override".into(), json!(strategy.as_str()));
        }
        let request = Request {
            template: TemplateId::GeneralQuery,
            data,
            params,
            query: question.to_string(),
            extra_context: extra_context.filter(|c| !c.trim().is_empty()),
            strategy,
            result_key: "answer",
        };
        self.generate(request, &context, metadata).await
    }

    async fn generate(&self, request: Request<'_>, context: &RetrievedContext, mut metadata: Map<String, Value>) -> ApiResponse {
        let mut rendered = format_context(context, self.settings.context_max_length);
        if let Some(extra) = request.extra_context {
            rendered = format!("Additional Context:\n{}\n\n{}", extra.trim(), rendered);
        }
        metadata.insert("context_documents".into(), json!(context.len()));

        let prompt = match assemble(request.template, &rendered, &request.data, &request.params) {
            Ok(prompt) => prompt,
            Err(e) => return self.fail(RagError::from(e), metadata),
        };
        let task = GenerationTask {
            prompt,
            output: request.template.output_format(),
            query: request.query,
            steps: self.settings.multi_step_steps.clone(),
        };
        let strategy = request.strategy.unwrap_or(self.settings.primary_strategy);
        let result = self.orchestrator.run(strategy, &task).await;

        metadata.insert("format".into(), json!(format_name(&result)));
        metadata.insert("generation".into(), result.metadata());
        let payload = result.payload.as_ref().map(|p| p.to_value()).unwrap_or(Value::Null);
        let mut body = Map::new();
        body.insert(request.result_key.to_string(), payload);
        body.insert("data".into(), request.data);

        ApiResponse {
            success: result.is_success(),
            result: Value::Object(body),
            metadata: Value::Object(metadata),
            error: result.error,
        }
    }

    fn fail(&self, e: RagError, metadata: Map<String, Value>) -> ApiResponse {
        error!("Request failed: {}", e);
        ApiResponse::failed(e, Value::Object(metadata))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::chains::tests::{fast_policy, ScriptedModel};
    use crate::application::chains::{ModelInvoker, DEFAULT_STEPS};
    use crate::application::retrieval::RetrievalSettings;
    use crate::domain::records::{Employee, Role};
    use crate::error::InvocationError;
    use crate::infrastructure::embedding::HashingEmbeddingProvider;
    use crate::infrastructure::memory_store::MemoryVectorStore;
    use crate::infrastructure::record_store::{RecordSnapshot, SnapshotRecordStore};
    use chrono::NaiveDate;

    const SUMMARY_JSON: &str = r#"{
        "overview": "Ada is an admin.",
        "advance_requests_summary": "None.",
        "bills_summary": "None.",
        "attendance_summary": "Not available.",
        "insights": [],
        "recommendations": ["Keep going"]
    }"#;

    fn agent(model: Arc<ScriptedModel>) -> SalaryAgent {
        let snapshot = RecordSnapshot {
            employees: vec![Employee {
                id: 1,
                first_name: "Ada".into(),
                last_name: "Lovelace".into(),
                role: Role::Admin,
                salary: 4800.0,
                employment_start_date: NaiveDate::from_ymd_opt(2020, 1, 15).unwrap(),
                days_worked_this_month: 10,
                total_days_worked: 900,
            }],
            ..RecordSnapshot::default()
        };
        let store = Arc::new(SnapshotRecordStore::new(snapshot));
        let retrieval = Arc::new(RetrievalEngine::new(
            Arc::new(HashingEmbeddingProvider::new(64)),
            Arc::new(MemoryVectorStore::new()),
            "salary_queries",
            RetrievalSettings::default(),
        ));
        let invoker = Arc::new(ModelInvoker::new(model, fast_policy()));
        SalaryAgent::new(
            QueryDataFetcher::new(store),
            retrieval.clone(),
            ChainOrchestrator::new(invoker, 2, retrieval),
            AgentSettings {
                primary_strategy: Strategy::Structured,
                top_k: 5,
                context_max_length: None,
                multi_step_steps: DEFAULT_STEPS.iter().map(|s| s.to_string()).collect(),
            },
        )
    }

    #[tokio::test]
    async fn test_unknown_employee_returns_empty_success_without_model_call() {
        let model = Arc::new(ScriptedModel::new(vec![]));
        let response = agent(model.clone()).generate_summary(EmployeeRef::Id(999), None).await;
        assert!(response.success);
        assert!(response.error.is_none());
        assert_eq!(response.result["summary"], Value::Null);
        assert_eq!(response.result["data"], json!({}));
        assert_eq!(response.metadata["empty_data"], json!(true));
        assert_eq!(model.calls(), 0);
    }

    #[tokio::test]
    async fn test_summary_with_empty_knowledge_base_uses_no_context_marker() {
        let model = Arc::new(ScriptedModel::new(vec![Ok(SUMMARY_JSON.into())]));
        let response = agent(model.clone()).generate_summary(EmployeeRef::Name("lovelace".into()), None).await;
        assert!(response.success, "{:?}", response.error);
        assert_eq!(response.metadata["format"], "structured");
        assert_eq!(response.metadata["employee_id"], json!(1));
        assert_eq!(response.result["summary"]["overview"], "Ada is an admin.");
        assert_eq!(response.result["data"]["employee"]["first_name"], "Ada");

        let seen = model.seen.lock().unwrap();
        assert!(seen[0].user.contains("No relevant context found."));
        assert!(seen[0].user.contains("- Employee: Ada Lovelace"));
        assert!(seen[0].user.contains("- Time Period: All time"));
    }

    #[tokio::test]
    async fn test_failed_generation_is_reported_not_raised() {
        let model = Arc::new(ScriptedModel::new(vec![
            Err(InvocationError::Rejected("invalid api key".into())),
            Err(InvocationError::Rejected("invalid api key".into())),
        ]));
        let response = agent(model).generate_report(ReportKind::Advances, None, None).await;
        assert!(!response.success);
        assert!(response.error.as_deref().unwrap().contains("invalid api key"));
        assert_eq!(response.metadata["generation"]["state"], "FAILED");
        assert_eq!(response.metadata["report_kind"], "advances");
    }

    #[tokio::test]
    async fn test_answer_query_passes_extra_context_and_strategy() {
        let model = Arc::new(ScriptedModel::new(vec![Ok("Nobody has pending advances.".into())]));
        let response = agent(model.clone())
            .answer_query("Who has pending advances?", Some("Payroll closes on the 25th."), Some(Strategy::Plain))
            .await;
        assert!(response.success);
        assert_eq!(response.result["answer"], "Nobody has pending advances.");
        assert_eq!(response.metadata["generation"]["strategy"], "plain");
        let seen = model.seen.lock().unwrap();
        assert!(seen[0].user.contains("Additional Context:\nPayroll closes on the 25th."));
        assert!(seen[0].user.contains("User Question: Who has pending advances?"));
    }

    #[tokio::test]
    async fn test_blank_question_is_rejected() {
        let response = agent(Arc::new(ScriptedModel::new(vec![]))).answer_query("   ", None, None).await;
        assert!(!response.success);
        assert_eq!(response.result, Value::Null);
    }

    #[test]
    fn test_report_kind_parsing() {
        assert_eq!("advances".parse::<ReportKind>().unwrap(), ReportKind::Advances);
        assert_eq!("financial_report".parse::<ReportKind>().unwrap(), ReportKind::Financial);
        assert!("payroll".parse::<ReportKind>().is_err());
    }
}

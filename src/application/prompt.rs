//! Prompt templates and assembly.
//!
//! Templates are fixed text with `{slot}` placeholders. Substitution is a
//! single pass over the template, so injected values are never scanned for
//! placeholders themselves.

use std::collections::BTreeMap;
use std::fmt;
use std::ops::Range;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::language_model::Prompt;
use crate::error::TemplateError;

pub const SYSTEM_PROMPT: &str = "You are an AI assistant for a salary management system.
Your role is to generate accurate, comprehensive summaries and reports based on database queries.

Guidelines:
- Always base your responses on the provided data
- Use professional business language
- Include specific numbers and statistics when available
- Highlight important insights and patterns
- Format output as structured JSON when requested
- Be concise but comprehensive
";

const EMPLOYEE_SUMMARY: &str = "Generate a comprehensive summary for the following employee data.

Context from knowledge base:
{retrieved_context}

Employee Data:
{employee_data}

Query Parameters:
- Employee: {employee_name}
- Time Period: {date_range}
- Include: {include_fields}

Generate a summary that includes:
1. Overview of employee's role and status
2. Summary of advance requests (pending, approved, denied)
3. Summary of bills recorded
4. Attendance patterns (if available)
5. Key insights and recommendations
";

const FINANCIAL_REPORT: &str = "You are analyzing financial data for a salary management system.

Historical Patterns:
{retrieved_context}

Current Data:
{financial_data}

Date Range: {date_range}
Filters: {filters}

Generate a financial report covering:
1. Total advances requested vs approved
2. Total bills recorded
3. Trends and patterns over time
4. Anomalies or concerns
5. Projections and recommendations

Use professional business language and include specific numbers with context.
";

const ADVANCE_REPORT: &str = "You are reviewing salary advance requests for a salary management system.

Advance Patterns:
{retrieved_context}

Current Data:
{financial_data}

Date Range: {date_range}
Filters: {filters}

Generate an advance request report covering:
1. Volume of requests and how they split across pending, approved and denied
2. Amounts requested vs approved
3. Common reasons and how they changed over time
4. Requests that look unusual or need attention
5. Recommendations for the approval process
";

const GENERAL_QUERY: &str = "Answer the following question based on the provided context and data.

Context from knowledge base:
{retrieved_context}

Query Data:
{query_data}

User Question: {user_question}

Provide a clear, accurate answer based on the data provided. If the data doesn't contain
enough information to answer the question, state that clearly.
";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TemplateId {
    EmployeeSummary,
    FinancialReport,
    AdvanceReport,
    GeneralQuery,
}

impl TemplateId {
    pub fn as_str(&self) -> &'static str {
        match self {
            TemplateId::EmployeeSummary => "employee_summary",
            TemplateId::FinancialReport => "financial_report",
            TemplateId::AdvanceReport => "advance_report",
            TemplateId::GeneralQuery => "general_query",
        }
    }

    fn body(&self) -> &'static str {
        match self {
            TemplateId::EmployeeSummary => EMPLOYEE_SUMMARY,
            TemplateId::FinancialReport => FINANCIAL_REPORT,
            TemplateId::AdvanceReport => ADVANCE_REPORT,
            TemplateId::GeneralQuery => GENERAL_QUERY,
        }
    }

    /// Slot that receives the fetched data as JSON.
    pub fn data_slot(&self) -> &'static str {
        match self {
            TemplateId::EmployeeSummary => "employee_data",
            TemplateId::FinancialReport | TemplateId::AdvanceReport => "financial_data",
            TemplateId::GeneralQuery => "query_data",
        }
    }

    /// Structured output expected when this template drives the structured chain.
    pub fn output_format(&self) -> OutputFormat {
        match self {
            TemplateId::EmployeeSummary => OutputFormat::Summary,
            TemplateId::FinancialReport | TemplateId::AdvanceReport => OutputFormat::Report,
            TemplateId::GeneralQuery => OutputFormat::GeneralAnswer,
        }
    }

    /// Placeholder names in order of first appearance.
    pub fn slots(&self) -> Vec<&'static str> {
        let mut slots = Vec::new();
        for (_, name) in placeholders(self.body()) {
            if !slots.contains(&name) {
                slots.push(name);
            }
        }
        slots
    }
}

impl fmt::Display for TemplateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `{name}` placeholders (lowercase letters and underscores) with their byte spans.
fn placeholders(body: &str) -> Vec<(Range<usize>, &str)> {
    let mut found = Vec::new();
    let mut rest = 0;
    while let Some(open) = body[rest..].find('{').map(|i| rest + i) {
        let name_len = body[open + 1..]
            .bytes()
            .take_while(|b| b.is_ascii_lowercase() || *b == b'_')
            .count();
        let close = open + 1 + name_len;
        if name_len > 0 && body.as_bytes().get(close) == Some(&b'}') {
            found.push((open..close + 1, &body[open + 1..close]));
            rest = close + 1;
        } else {
            rest = open + 1;
        }
    }
    found
}

/// Fills `template` from the retrieved context, the fetched data and named
/// parameters. Fails only when a slot has no value.
pub fn assemble(template: TemplateId, context: &str, data: &Value, params: &BTreeMap<String, String>) -> Result<Prompt, TemplateError> {
    let mut values: BTreeMap<&str, String> = params.iter().map(|(k, v)| (k.as_str(), v.clone())).collect();
    values.insert("retrieved_context", context.to_string());
    values.insert(
        template.data_slot(),
        serde_json::to_string_pretty(data).unwrap_or_else(|_| data.to_string()),
    );

    let body = template.body();
    if let Some(missing) = template.slots().into_iter().find(|slot| !values.contains_key(slot)) {
        return Err(TemplateError::MissingSlot {
            template: template.as_str().to_string(),
            slot: missing.to_string(),
        });
    }

    let mut user = String::with_capacity(body.len());
    let mut copied = 0;
    for (span, name) in placeholders(body) {
        user.push_str(&body[copied..span.start]);
        user.push_str(values.get(name).map(String::as_str).unwrap_or_default());
        copied = span.end;
    }
    user.push_str(&body[copied..]);
    Ok(Prompt::new(SYSTEM_PROMPT, user, template.as_str()))
}

/// Summary of one employee's records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SummaryOutput {
    #[schemars(description = "Overview of employee's role and status")]
    pub overview: String,
    #[schemars(description = "Summary of advance requests")]
    pub advance_requests_summary: String,
    #[schemars(description = "Summary of bills recorded")]
    pub bills_summary: String,
    #[schemars(description = "Attendance patterns if available")]
    pub attendance_summary: String,
    #[schemars(description = "Key insights about the employee")]
    pub insights: Vec<String>,
    #[schemars(description = "Recommendations for management")]
    pub recommendations: Vec<String>,
}

/// Financial or advance report over a period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ReportOutput {
    #[schemars(description = "Executive summary of financial data")]
    pub summary: String,
    #[schemars(description = "Analysis of advance requests")]
    pub advances_analysis: String,
    #[schemars(description = "Analysis of bills")]
    pub bills_analysis: String,
    #[schemars(description = "Trends and patterns identified")]
    pub trends: String,
    #[schemars(description = "Anomalies or concerns detected")]
    pub anomalies: Vec<String>,
    #[schemars(description = "Future projections")]
    pub projections: String,
    #[schemars(description = "Actionable recommendations")]
    pub recommendations: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct GeneralAnswer {
    #[schemars(description = "Direct answer to the question")]
    pub answer: String,
    #[schemars(description = "Facts from the data that support the answer")]
    pub supporting_facts: Vec<String>,
}

/// Which output type the structured chain parses into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Summary,
    Report,
    GeneralAnswer,
}

/// Instructions appended to a structured prompt: the JSON schema of `T`.
pub fn format_instructions<T: JsonSchema>() -> String {
    let schema = schemars::schema_for!(T);
    format!(
        "The output must be a single JSON object matching this JSON schema, with no surrounding text:\n{}\n",
        serde_json::to_string_pretty(&schema).unwrap_or_default()
    )
}

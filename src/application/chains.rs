//! Generation chains sharing one model-invocation primitive.
//!
//! Two retry policies live here and stay separate: [`ModelInvoker`] resends
//! the same prompt after transient invocation errors, while
//! [`StructuredChain`] re-prompts the model after unparseable output.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, warn};
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde_json::json;

use super::prompt::{format_instructions, SYSTEM_PROMPT};
use crate::domain::generation::StepOutput;
use crate::domain::language_model::{LanguageModel, Prompt};
use crate::error::InvocationError;

const STEP_CONTEXT_PREVIEW: usize = 200;

/// Default analysis steps of the multi-step strategy.
pub const DEFAULT_STEPS: [&str; 4] = [
    "Analyze the query requirements",
    "Retrieve relevant context",
    "Process the data",
    "Generate insights",
];

/// Supplies retrieved context for one multi-step step.
#[async_trait]
pub trait StepContextSource: Send + Sync {
    /// Formatted context for `query`. Never fails; degrades to a no-context marker.
    async fn context_for(&self, query: &str) -> String;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvocationPolicy {
    /// Total tries per call, including the first.
    pub attempts: u32,
    /// Retry `n` waits `base_delay × n`.
    pub base_delay: Duration,
    /// Bound on a single model call.
    pub timeout: Duration,
}

impl Default for InvocationPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay: Duration::from_millis(1000),
            timeout: Duration::from_secs(60),
        }
    }
}

/// Bookkeeping shared by every call made for one request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InvocationStats {
    pub retries: u32,
    pub last_raw: Option<String>,
}

/// Wraps a [`LanguageModel`] with a per-call timeout and backoff for transient errors.
pub struct ModelInvoker {
    model: Arc<dyn LanguageModel>,
    policy: InvocationPolicy,
}

impl ModelInvoker {
    pub fn new(model: Arc<dyn LanguageModel>, policy: InvocationPolicy) -> Self {
        Self { model, policy }
    }

    pub fn model_name(&self) -> &str {
        self.model.model_name()
    }

    pub async fn invoke(&self, prompt: &Prompt, stats: &mut InvocationStats) -> Result<String, InvocationError> {
        let attempts = self.policy.attempts.max(1);
        let mut attempt = 1;
        loop {
            let outcome = match tokio::time::timeout(self.policy.timeout, self.model.invoke(prompt)).await {
                Ok(result) => result,
                Err(_) => Err(InvocationError::Timeout(self.policy.timeout)),
            };
            match outcome {
                Ok(text) => {
                    stats.last_raw = Some(text.clone());
                    return Ok(text);
                }
                Err(e) if e.is_transient() && attempt < attempts => {
                    let delay = self.policy.base_delay * attempt;
                    warn!(
                        "Invocation of {} failed (attempt {}/{}): {}. Retrying in {:?}",
                        self.model.model_name(),
                        attempt,
                        attempts,
                        e,
                        delay
                    );
                    stats.retries += 1;
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Returns the model's text unchanged.
pub struct PlainChain {
    invoker: Arc<ModelInvoker>,
}

impl PlainChain {
    pub fn new(invoker: Arc<ModelInvoker>) -> Self {
        Self { invoker }
    }

    pub async fn run(&self, prompt: &Prompt, stats: &mut InvocationStats) -> Result<String, InvocationError> {
        self.invoker.invoke(prompt, stats).await
    }
}

/// Result of a structured run. `value` is `None` when every attempt failed to parse.
#[derive(Debug, Clone, PartialEq)]
pub struct StructuredOutcome<T> {
    pub value: Option<T>,
    pub raw: String,
    pub parse_retries: u32,
}

impl<T> StructuredOutcome<T> {
    pub fn is_structured(&self) -> bool {
        self.value.is_some()
    }
}

/// Parses model output into a schema-described type, re-prompting on failure.
pub struct StructuredChain {
    invoker: Arc<ModelInvoker>,
    max_retries: u32,
}

impl StructuredChain {
    pub fn new(invoker: Arc<ModelInvoker>, max_retries: u32) -> Self {
        Self { invoker, max_retries }
    }

    /// One initial call plus up to `max_retries` re-prompts. Invocation errors
    /// are returned as-is; parse failures never are.
    pub async fn run<T>(&self, prompt: &Prompt, stats: &mut InvocationStats) -> Result<StructuredOutcome<T>, InvocationError>
    where
        T: DeserializeOwned + JsonSchema,
    {
        let base = format!("{}\n{}", prompt.user, format_instructions::<T>());
        let mut current = prompt.with_user(base.clone());
        let mut attempt = 0;
        loop {
            let raw = self.invoker.invoke(&current, stats).await?;
            match parse_structured::<T>(&raw) {
                Ok(value) => {
                    return Ok(StructuredOutcome {
                        value: Some(value),
                        raw,
                        parse_retries: attempt,
                    })
                }
                Err(reason) if attempt < self.max_retries => {
                    attempt += 1;
                    debug!("Structured output rejected ({}), re-prompting ({}/{})", reason, attempt, self.max_retries);
                    current = prompt.with_user(format!(
                        "{}\nYour previous response could not be used: {}.\nRespond again with only the JSON object.",
                        base, reason
                    ));
                }
                Err(reason) => {
                    warn!("Giving up on structured output after {} re-prompts: {}", attempt, reason);
                    return Ok(StructuredOutcome {
                        value: None,
                        raw,
                        parse_retries: attempt,
                    });
                }
            }
        }
    }
}

/// Content of the first ```json fence, else of the first plain ``` fence,
/// else the whole text.
pub fn strip_code_fences(raw: &str) -> &str {
    fn fenced<'a>(raw: &'a str, opener: &str) -> Option<&'a str> {
        let start = raw.find(opener)? + opener.len();
        let end = raw[start..].find("```")? + start;
        Some(raw[start..end].trim())
    }
    if raw.contains("```json") {
        if let Some(inner) = fenced(raw, "```json") {
            return inner;
        }
    } else if raw.contains("```") {
        if let Some(inner) = fenced(raw, "```") {
            return inner;
        }
    }
    raw.trim()
}

pub fn parse_structured<T: DeserializeOwned + JsonSchema>(raw: &str) -> Result<T, String> {
    serde_json::from_str(strip_code_fences(raw)).map_err(|e| format!("not a valid {} ({})", T::schema_name(), e))
}

/// Decomposes a query into ordered steps, then synthesizes a final answer.
pub struct MultiStepChain {
    invoker: Arc<ModelInvoker>,
    context: Arc<dyn StepContextSource>,
}

impl MultiStepChain {
    pub fn new(invoker: Arc<ModelInvoker>, context: Arc<dyn StepContextSource>) -> Self {
        Self { invoker, context }
    }

    /// Runs every step with the accumulated results of the previous ones,
    /// then one synthesis call. Returns the step outputs and the final answer.
    pub async fn run(&self, query: &str, steps: &[String], stats: &mut InvocationStats) -> Result<(Vec<StepOutput>, String), InvocationError> {
        let mut outputs = Vec::with_capacity(steps.len());
        let mut accumulated = String::new();

        for (i, step) in steps.iter().enumerate() {
            let n = i + 1;
            let step_context = self.context.context_for(&format!("{} {}", query, step)).await;
            let user = format!(
                "Step {}: {}\n\nPrevious Context:\n{}\n\nCurrent Context:\n{}\n\nQuery: {}\n\nProvide analysis for this step.\n",
                n, step, accumulated, step_context, query
            );
            let result = self
                .invoker
                .invoke(&Prompt::new(SYSTEM_PROMPT, user, "multi_step"), stats)
                .await?;
            debug!("Multi-step {}/{} finished", n, steps.len());
            accumulated.push_str(&format!("\nStep {} Result: {}\n", n, result));
            outputs.push(StepOutput {
                step: step.clone(),
                result,
                context_used: preview(&step_context),
            });
        }

        let by_step: BTreeMap<String, &StepOutput> = outputs
            .iter()
            .enumerate()
            .map(|(i, o)| (format!("step_{}", i + 1), o))
            .collect();
        let dump = serde_json::to_string_pretty(&by_step).unwrap_or_else(|_| json!({}).to_string());
        let synthesis = format!(
            "Based on the following step-by-step analysis, provide a final comprehensive answer.\n\nQuery: {}\n\nStep Results:\n{}\n\nProvide a synthesized final answer.\n",
            query, dump
        );
        let final_answer = self
            .invoker
            .invoke(&Prompt::new(SYSTEM_PROMPT, synthesis, "multi_step_synthesis"), stats)
            .await?;
        Ok((outputs, final_answer))
    }
}

fn preview(context: &str) -> String {
    if context.chars().count() > STEP_CONTEXT_PREVIEW {
        let head: String = context.chars().take(STEP_CONTEXT_PREVIEW).collect();
        format!("{}...", head)
    } else {
        context.to_string()
    }
}

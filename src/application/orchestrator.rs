//! Drives a generation strategy through the fallback ladder.
//!
//! The ladder is primary strategy, then plain, then failure. A plain primary
//! has no fallback. Every transition goes through
//! [`OrchestrationState::next`] and is recorded in the result trace.

use std::sync::Arc;
use std::time::Instant;

use log::{debug, info, warn};
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::chains::{InvocationStats, ModelInvoker, MultiStepChain, PlainChain, StepContextSource, StructuredChain};
use super::prompt::{GeneralAnswer, OutputFormat, ReportOutput, SummaryOutput};
use crate::domain::generation::{GenerationResult, OrchestrationEvent, OrchestrationState, Payload, Strategy};
use crate::domain::language_model::Prompt;

/// Everything any strategy may need for one request.
#[derive(Debug, Clone)]
pub struct GenerationTask {
    /// Fully assembled prompt used by the structured and plain strategies.
    pub prompt: Prompt,
    pub output: OutputFormat,
    /// Question the multi-step strategy decomposes.
    pub query: String,
    pub steps: Vec<String>,
}

struct Attempt {
    payload: Option<Payload>,
    is_structured: bool,
    error: Option<String>,
}

impl Attempt {
    fn success(payload: Payload, is_structured: bool) -> Self {
        Self {
            payload: Some(payload),
            is_structured,
            error: None,
        }
    }

    fn failure(error: impl Into<String>) -> Self {
        Self {
            payload: None,
            is_structured: false,
            error: Some(error.into()),
        }
    }
}

pub struct ChainOrchestrator {
    plain: PlainChain,
    structured: StructuredChain,
    multi_step: MultiStepChain,
}

impl ChainOrchestrator {
    pub fn new(invoker: Arc<ModelInvoker>, parse_retries: u32, step_context: Arc<dyn StepContextSource>) -> Self {
        Self {
            plain: PlainChain::new(invoker.clone()),
            structured: StructuredChain::new(invoker.clone(), parse_retries),
            multi_step: MultiStepChain::new(invoker, step_context),
        }
    }

    /// Runs `primary`, falling back to plain generation when it gives up.
    /// Never returns an error: failures end in [`OrchestrationState::Failed`].
    pub async fn run(&self, primary: Strategy, task: &GenerationTask) -> GenerationResult {
        let started = Instant::now();
        let mut stats = InvocationStats::default();
        let mut parse_retries = 0;
        let mut state = OrchestrationState::Pending;
        let mut trace = vec![state];

        let ladder: &[Strategy] = if primary == Strategy::Plain {
            &[Strategy::Plain]
        } else {
            &[primary, Strategy::Plain]
        };

        transition(&mut state, &mut trace, OrchestrationEvent::Start);
        let mut strategy_used = primary;
        let mut last = Attempt::failure("no strategy was attempted");

        for (i, strategy) in ladder.iter().copied().enumerate() {
            strategy_used = strategy;
            debug!("Attempting {} generation for template '{}'", strategy, task.prompt.template);
            last = self.attempt(strategy, task, &mut stats, &mut parse_retries).await;
            if last.payload.is_some() {
                transition(&mut state, &mut trace, OrchestrationEvent::Succeeded);
                break;
            }
            let fallback = i + 1 < ladder.len();
            warn!(
                "{} generation failed{}: {}",
                strategy,
                if fallback { ", falling back" } else { "" },
                last.error.as_deref().unwrap_or("unknown error")
            );
            transition(&mut state, &mut trace, OrchestrationEvent::Failed { fallback });
        }

        let result = GenerationResult {
            error: if last.payload.is_some() {
                None
            } else {
                Some(format!("Generation failed: {}", last.error.unwrap_or_default()))
            },
            payload: last.payload,
            is_structured: last.is_structured,
            strategy_used,
            invocation_retries: stats.retries,
            parse_retries,
            elapsed: started.elapsed(),
            last_raw: stats.last_raw,
            state,
            trace,
        };
        info!(
            "Generation finished: state={:?}, strategy={}, invocation_retries={}, parse_retries={}, elapsed={:?}",
            result.state, result.strategy_used, result.invocation_retries, result.parse_retries, result.elapsed
        );
        result
    }

    async fn attempt(&self, strategy: Strategy, task: &GenerationTask, stats: &mut InvocationStats, parse_retries: &mut u32) -> Attempt {
        match strategy {
            Strategy::Plain => match self.plain.run(&task.prompt, stats).await {
                Ok(text) => Attempt::success(Payload::Text(text), false),
                Err(e) => Attempt::failure(e.to_string()),
            },
            Strategy::Structured => match task.output {
                OutputFormat::Summary => self.structured_attempt::<SummaryOutput>(task, stats, parse_retries).await,
                OutputFormat::Report => self.structured_attempt::<ReportOutput>(task, stats, parse_retries).await,
                OutputFormat::GeneralAnswer => self.structured_attempt::<GeneralAnswer>(task, stats, parse_retries).await,
            },
            Strategy::MultiStep => match self.multi_step.run(&task.query, &task.steps, stats).await {
                Ok((steps, final_answer)) => Attempt::success(Payload::MultiStep { steps, final_answer }, false),
                Err(e) => Attempt::failure(e.to_string()),
            },
        }
    }

    async fn structured_attempt<T>(&self, task: &GenerationTask, stats: &mut InvocationStats, parse_retries: &mut u32) -> Attempt
    where
        T: DeserializeOwned + JsonSchema + Serialize,
    {
        let outcome = match self.structured.run::<T>(&task.prompt, stats).await {
            Ok(outcome) => outcome,
            Err(e) => return Attempt::failure(e.to_string()),
        };
        *parse_retries += outcome.parse_retries;
        match outcome.value.map(serde_json::to_value) {
            Some(Ok(value)) => Attempt::success(Payload::Structured(value), true),
            Some(Err(e)) => Attempt::failure(format!("{} output could not be serialized: {}", T::schema_name(), e)),
            None => Attempt::failure(format!(
                "{} output could not be parsed after {} re-prompts",
                T::schema_name(),
                outcome.parse_retries
            )),
        }
    }
}

fn transition(state: &mut OrchestrationState, trace: &mut Vec<OrchestrationState>, event: OrchestrationEvent) {
    let next = state.next(event);
    debug!("Orchestration {:?} --{:?}--> {:?}", state, event, next);
    *state = next;
    trace.push(next);
}

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Output strategy of a generation chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    Structured,
    Plain,
    MultiStep,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Structured => "structured",
            Strategy::Plain => "plain",
            Strategy::MultiStep => "multi_step",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Strategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "structured" => Ok(Strategy::Structured),
            "plain" | "rag" => Ok(Strategy::Plain),
            "multi_step" | "multi-step" => Ok(Strategy::MultiStep),
            other => Err(format!("Unknown generation strategy: {}", other)),
        }
    }
}

/// Per-request orchestration states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrchestrationState {
    Pending,
    #[serde(rename = "STRATEGY_1_ATTEMPT")]
    StrategyOneAttempt,
    #[serde(rename = "STRATEGY_2_ATTEMPT")]
    StrategyTwoAttempt,
    Success,
    Failed,
}

/// Inputs driving the orchestration state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrchestrationEvent {
    Start,
    Succeeded,
    /// The current strategy gave up. `fallback` tells whether a second strategy exists.
    Failed { fallback: bool },
}

impl OrchestrationState {
    /// Complete transition table. Terminal states absorb every event.
    pub fn next(self, event: OrchestrationEvent) -> OrchestrationState {
        use OrchestrationEvent as E;
        use OrchestrationState as S;
        match (self, event) {
            (S::Pending, E::Start) => S::StrategyOneAttempt,
            (S::Pending, E::Succeeded) | (S::Pending, E::Failed { .. }) => S::Failed,
            (S::StrategyOneAttempt, E::Start) => S::StrategyOneAttempt,
            (S::StrategyOneAttempt, E::Succeeded) => S::Success,
            (S::StrategyOneAttempt, E::Failed { fallback: true }) => S::StrategyTwoAttempt,
            (S::StrategyOneAttempt, E::Failed { fallback: false }) => S::Failed,
            (S::StrategyTwoAttempt, E::Start) => S::StrategyTwoAttempt,
            (S::StrategyTwoAttempt, E::Succeeded) => S::Success,
            (S::StrategyTwoAttempt, E::Failed { .. }) => S::Failed,
            (S::Success, _) => S::Success,
            (S::Failed, _) => S::Failed,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, OrchestrationState::Success | OrchestrationState::Failed)
    }
}

/// One intermediate result of a multi-step run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepOutput {
    pub step: String,
    pub result: String,
    pub context_used: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Payload {
    Text(String),
    Structured(Value),
    MultiStep { steps: Vec<StepOutput>, final_answer: String },
}

impl Payload {
    pub fn to_value(&self) -> Value {
        match self {
            Payload::Text(text) => Value::String(text.clone()),
            Payload::Structured(value) => value.clone(),
            Payload::MultiStep { steps, final_answer } => json!({
                "steps": steps,
                "final_answer": final_answer,
            }),
        }
    }
}

/// Terminal outcome of one orchestrated request. Exactly one of `payload`
/// and `error` is set.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationResult {
    pub payload: Option<Payload>,
    pub error: Option<String>,
    pub is_structured: bool,
    pub strategy_used: Strategy,
    pub invocation_retries: u32,
    pub parse_retries: u32,
    pub elapsed: Duration,
    /// Last raw model output seen, kept for diagnostics on failure.
    pub last_raw: Option<String>,
    pub state: OrchestrationState,
    pub trace: Vec<OrchestrationState>,
}

impl GenerationResult {
    pub fn is_success(&self) -> bool {
        self.state == OrchestrationState::Success && self.payload.is_some()
    }

    /// Timing and retry bookkeeping, reported regardless of outcome.
    pub fn metadata(&self) -> Value {
        json!({
            "strategy": self.strategy_used.as_str(),
            "is_structured": self.is_structured,
            "invocation_retries": self.invocation_retries,
            "parse_retries": self.parse_retries,
            "elapsed_ms": self.elapsed.as_millis() as u64,
            "state": self.state,
            "trace": self.trace,
        })
    }
}

#![allow(dead_code)]

use std::collections::VecDeque;
use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::NaiveDate;
use salary_rag::config::{AppConfig, ProviderKind};
use salary_rag::domain::language_model::{LanguageModel, Prompt};
use salary_rag::domain::records::{Employee, Role};
use salary_rag::error::InvocationError;
use salary_rag::infrastructure::RecordSnapshot;

/// Answers with a fixed script, one entry per call, and remembers every prompt.
pub struct ScriptedModel {
    responses: Mutex<VecDeque<Result<String, InvocationError>>>,
    pub seen: Mutex<Vec<Prompt>>,
}

impl ScriptedModel {
    pub fn new(responses: Vec<Result<String, InvocationError>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.seen.lock().unwrap().len()
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn invoke(&self, prompt: &Prompt) -> Result<String, InvocationError> {
        self.seen.lock().unwrap().push(prompt.clone());
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(InvocationError::Rejected("script exhausted".into())))
    }

    fn model_name(&self) -> &str {
        "scripted"
    }
}

fn employee(id: i64, first: &str, last: &str, role: Role) -> Employee {
    Employee {
        id,
        first_name: first.into(),
        last_name: last.into(),
        role,
        salary: 3000.0 + id as f64 * 250.0,
        employment_start_date: NaiveDate::from_ymd_opt(2021, 3, id as u32).unwrap(),
        days_worked_this_month: 12,
        total_days_worked: 400,
    }
}

/// Three employees and no requests of any kind.
pub fn staff_only() -> RecordSnapshot {
    RecordSnapshot {
        employees: vec![
            employee(1, "Ada", "Lovelace", Role::Manager),
            employee(2, "Grace", "Hopper", Role::Staff),
            employee(3, "Edsger", "Dijkstra", Role::Admin),
        ],
        ..RecordSnapshot::default()
    }
}

/// Offline configuration over a record snapshot written into `dir`.
pub fn offline_config(dir: &Path, snapshot: &RecordSnapshot) -> AppConfig {
    let records = dir.join("records.json");
    std::fs::write(&records, serde_json::to_string(snapshot).unwrap()).unwrap();

    let mut config = AppConfig::default();
    config.ai.provider = ProviderKind::Hashing;
    config.ai.hashing.dimension = 512;
    config.rag.similarity_threshold = 0.0;
    config.generation.retry_base_delay_ms = 1;
    config.vector_store.snapshot_path = Some(dir.join("kb.jsonl.gz"));
    config.record_store.snapshot_path = Some(records);
    config
}

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::InvocationError;

/// Final instruction payload handed to a language model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prompt {
    pub system: String,
    pub user: String,
    /// Name of the template the prompt was assembled from, for logging.
    pub template: String,
}

impl Prompt {
    pub fn new(system: impl Into<String>, user: impl Into<String>, template: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            user: user.into(),
            template: template.into(),
        }
    }

    /// Same system message and template, different user message.
    pub fn with_user(&self, user: impl Into<String>) -> Self {
        Self {
            system: self.system.clone(),
            user: user.into(),
            template: self.template.clone(),
        }
    }
}

/// Text-in/text-out model primitive shared by every generation chain.
/// Implementations hold no per-request state.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn invoke(&self, prompt: &Prompt) -> Result<String, InvocationError>;

    fn model_name(&self) -> &str;
}

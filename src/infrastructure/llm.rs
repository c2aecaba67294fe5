use std::time::Duration;

use async_trait::async_trait;
use log::{debug, error};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use super::embedding::api_error_detail;
use crate::domain::language_model::{LanguageModel, Prompt};
use crate::error::InvocationError;

/// Sampling parameters sent with every completion request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplingParams {
    pub max_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
}

/// Chat-completions client for OpenAI and OpenAI-compatible routers
/// (the Hugging Face router speaks the same protocol).
pub struct OpenAiCompatibleChatModel {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
    params: SamplingParams,
    timeout: Duration,
}

impl OpenAiCompatibleChatModel {
    pub fn new(
        client: reqwest::Client,
        api_key: impl Into<String>,
        model: impl Into<String>,
        base_url: impl Into<String>,
        params: SamplingParams,
        timeout: Duration,
    ) -> Self {
        Self {
            client,
            api_key: api_key.into(),
            model: model.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            params,
            timeout,
        }
    }
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
    top_p: f32,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

/// 429 and 5xx are worth retrying; any other failure status is a rejection.
fn classify_status(status: StatusCode, detail: String) -> InvocationError {
    let message = format!("{}: {}", status, detail);
    if status == StatusCode::TOO_MANY_REQUESTS {
        InvocationError::RateLimited(message)
    } else if status.is_server_error() || status == StatusCode::REQUEST_TIMEOUT {
        InvocationError::Unavailable(message)
    } else {
        InvocationError::Rejected(message)
    }
}

#[async_trait]
impl LanguageModel for OpenAiCompatibleChatModel {
    async fn invoke(&self, prompt: &Prompt) -> Result<String, InvocationError> {
        let mut messages = Vec::with_capacity(2);
        if !prompt.system.is_empty() {
            messages.push(ChatMessage {
                role: "system",
                content: &prompt.system,
            });
        }
        messages.push(ChatMessage {
            role: "user",
            content: &prompt.user,
        });
        let request = ChatRequest {
            model: &self.model,
            messages,
            max_tokens: self.params.max_tokens,
            temperature: self.params.temperature,
            top_p: self.params.top_p,
        };
        debug!("Invoking {} with template '{}'", self.model, prompt.template);

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .timeout(self.timeout)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    InvocationError::Timeout(self.timeout)
                } else {
                    InvocationError::Unavailable(format!("request failed: {}", e))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!("Chat completion for {} returned {}", self.model, status);
            return Err(classify_status(status, api_error_detail(body)));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| InvocationError::Unavailable(format!("failed to parse response: {}", e)))?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| InvocationError::Unavailable("response contained no message content".to_string()))
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn model(uri: String) -> OpenAiCompatibleChatModel {
        OpenAiCompatibleChatModel::new(
            reqwest::Client::new(),
            "sk-test",
            "gpt-4o-mini",
            uri,
            SamplingParams {
                max_tokens: 2000,
                temperature: 0.3,
                top_p: 0.9,
            },
            Duration::from_secs(5),
        )
    }

    fn prompt() -> Prompt {
        Prompt::new("You are an AI assistant.", "Summarize employee 1", "general_query")
    }

    #[tokio::test]
    async fn test_invoke_sends_system_and_user_messages() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(body_partial_json(json!({
                "model": "gpt-4o-mini",
                "max_tokens": 2000,
                "messages": [
                    {"role": "system", "content": "You are an AI assistant."},
                    {"role": "user", "content": "Summarize employee 1"}
                ]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"message": {"role": "assistant", "content": "All good."}}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let text = model(server.uri()).invoke(&prompt()).await.unwrap();
        assert_eq!(text, "All good.");
    }

    #[tokio::test]
    async fn test_status_codes_map_to_retry_classes() {
        for (status, transient) in [(429u16, true), (503, true), (401, false), (400, false)] {
            let server = MockServer::start().await;
            Mock::given(method("POST"))
                .and(path("/chat/completions"))
                .respond_with(ResponseTemplate::new(status).set_body_json(json!({"error": {"message": "nope"}})))
                .mount(&server)
                .await;
            let err = model(server.uri()).invoke(&prompt()).await.unwrap_err();
            assert_eq!(err.is_transient(), transient, "status {}", status);
            assert!(err.to_string().contains("nope"));
        }
    }

    #[tokio::test]
    async fn test_rate_limit_variant() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;
        assert_matches!(model(server.uri()).invoke(&prompt()).await, Err(InvocationError::RateLimited(_)));
    }

    #[tokio::test]
    async fn test_slow_server_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_delay(Duration::from_millis(500))
                    .set_body_json(json!({"choices": []})),
            )
            .mount(&server)
            .await;
        let mut m = model(server.uri());
        m.timeout = Duration::from_millis(50);
        assert_matches!(m.invoke(&prompt()).await, Err(InvocationError::Timeout(_)));
    }
}

/// OpenAI-compatible chat completions client
use super::{GenerationService, Prompt};
use crate::error::{RagError, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct OpenAiChatConfig {
    pub api_key: String,
    /// Base URL, e.g. https://api.openai.com/v1
    pub api_base: String,
    pub model: String,
    pub temperature: f32,
    pub timeout: Duration,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format_type: &'static str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    error: ErrorDetails,
}

#[derive(Debug, Deserialize)]
struct ErrorDetails {
    message: String,
}

pub struct OpenAiChatService {
    config: OpenAiChatConfig,
    client: Client,
}

impl OpenAiChatService {
    pub fn new(config: OpenAiChatConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .user_agent(concat!("adaptive-rag/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| RagError::GenerationService(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { config, client })
    }

    fn request_body<'a>(&'a self, prompt: &'a Prompt) -> ChatRequest<'a> {
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

        ChatRequest {
            model: &self.config.model,
            messages,
            temperature: self.config.temperature,
            response_format: prompt.json.then_some(ResponseFormat {
                format_type: "json_object",
            }),
        }
    }
}

#[async_trait]
impl GenerationService for OpenAiChatService {
    async fn complete(&self, prompt: Prompt) -> Result<String> {
        let start = Instant::now();
        let request = self.request_body(&prompt);

        let response = self
            .client
            .post(format!(
                "{}/chat/completions",
                self.config.api_base.trim_end_matches('/')
            ))
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| RagError::GenerationService(format!("Request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let message = match response.json::<ApiError>().await {
                Ok(api_error) => api_error.error.message,
                Err(_) => format!("HTTP {}", status),
            };
            return Err(RagError::GenerationService(message));
        }

        let body: ChatResponse = response
            .json()
            .await
            .map_err(|e| RagError::GenerationService(format!("Failed to parse response: {}", e)))?;

        let content = body
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| RagError::GenerationService("Response has no content".to_string()))?;

        tracing::debug!(
            "Completion from {} in {:.2?} ({} chars)",
            self.config.model,
            start.elapsed(),
            content.len()
        );
        Ok(content)
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }
}

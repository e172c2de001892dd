//! Text generation
//!
//! The orchestrator talks to one external chat model through
//! [`GenerationService`]. Answer generation and every grading chain go through
//! the same trait, so tests swap in scripted stubs.

mod openai;

pub use openai::{OpenAiChatConfig, OpenAiChatService};

use crate::config::{self, GenerationConfig};
use crate::error::{RagError, Result};
use async_trait::async_trait;
use std::sync::Arc;

/// One model call: a system instruction and a user message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub system: String,
    pub user: String,
    /// Ask the model for a JSON object response
    pub json: bool,
}

impl Prompt {
    pub fn new(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            user: user.into(),
            json: false,
        }
    }

    pub fn json(mut self) -> Self {
        self.json = true;
        self
    }
}

/// External text-generation collaborator
///
/// Failures surface as `RagError::GenerationService`; implementations do not retry.
#[async_trait]
pub trait GenerationService: Send + Sync {
    async fn complete(&self, prompt: Prompt) -> Result<String>;

    fn model_name(&self) -> &str;
}

/// Construct the generation service from configuration
pub fn create_generation_service(config: &GenerationConfig) -> Result<Arc<dyn GenerationService>> {
    let timeout = config::parse_duration(&config.timeout).ok_or_else(|| {
        RagError::InvalidConfigValue {
            path: "generation.timeout".to_string(),
            message: format!("Invalid duration format: {}", config.timeout),
        }
    })?;

    let api_key = std::env::var(&config.api_key_env).unwrap_or_default();
    if api_key.is_empty() {
        return Err(RagError::Config(format!(
            "Generation requires an API key in {}",
            config.api_key_env
        )));
    }

    let service = OpenAiChatService::new(OpenAiChatConfig {
        api_key,
        api_base: config.api_base.clone(),
        model: config.model.clone(),
        temperature: config.temperature,
        timeout,
    })?;

    Ok(Arc::new(service))
}

//! Web search fallback used when the corpus has nothing relevant

use crate::config::{self, WebSearchConfig};
use crate::error::{RagError, Result};
use crate::retrieval::RetrievedDocument;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// External web search collaborator
#[async_trait]
pub trait WebSearch: Send + Sync {
    async fn search(&self, query: &str) -> Result<Vec<RetrievedDocument>>;
}

/// Web search turned off: the fallback yields no documents
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledWebSearch;

#[async_trait]
impl WebSearch for DisabledWebSearch {
    async fn search(&self, _query: &str) -> Result<Vec<RetrievedDocument>> {
        tracing::debug!("Web search disabled, fallback returns no documents");
        Ok(Vec::new())
    }
}

#[derive(Debug, Serialize)]
struct TavilyRequest<'a> {
    query: &'a str,
    max_results: usize,
    search_depth: &'a str,
}

#[derive(Debug, Deserialize)]
struct TavilyResponse {
    #[serde(default)]
    results: Vec<TavilyResult>,
}

#[derive(Debug, Deserialize)]
struct TavilyResult {
    url: String,
    #[serde(default)]
    content: String,
}

/// Tavily search API client
pub struct TavilySearch {
    client: Client,
    api_base: String,
    api_key: String,
    max_results: usize,
}

impl TavilySearch {
    pub fn new(config: &WebSearchConfig, api_key: String) -> Result<Self> {
        let timeout = config::parse_duration(&config.timeout).ok_or_else(|| {
            RagError::InvalidConfigValue {
                path: "web_search.timeout".to_string(),
                message: format!("Invalid duration format: {}", config.timeout),
            }
        })?;

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RagError::WebSearch(e.to_string()))?;

        Ok(Self {
            client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            api_key,
            max_results: config.max_results,
        })
    }
}

#[async_trait]
impl WebSearch for TavilySearch {
    async fn search(&self, query: &str) -> Result<Vec<RetrievedDocument>> {
        let request = TavilyRequest {
            query,
            max_results: self.max_results,
            search_depth: "basic",
        };

        let response = self
            .client
            .post(format!("{}/search", self.api_base))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| RagError::WebSearch(format!("Request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RagError::WebSearch(format!("HTTP {}: {}", status, body)));
        }

        let body: TavilyResponse = response
            .json()
            .await
            .map_err(|e| RagError::WebSearch(format!("Failed to parse response: {}", e)))?;

        let documents: Vec<RetrievedDocument> = body
            .results
            .into_iter()
            .take(self.max_results)
            .filter(|r| !r.content.trim().is_empty())
            .map(|r| RetrievedDocument {
                content: r.content,
                source: r.url,
                page: None,
            })
            .collect();

        tracing::debug!("Web search returned {} documents", documents.len());
        Ok(documents)
    }
}

/// Construct the web search collaborator from configuration
///
/// An enabled provider without an API key degrades to `DisabledWebSearch`.
pub fn create_web_search(config: &WebSearchConfig) -> Result<Arc<dyn WebSearch>> {
    if !config.enabled {
        return Ok(Arc::new(DisabledWebSearch));
    }

    match std::env::var(&config.api_key_env) {
        Ok(key) if !key.is_empty() => Ok(Arc::new(TavilySearch::new(config, key)?)),
        _ => {
            tracing::warn!(
                "Web search enabled but {} is not set; fallback will return no documents",
                config.api_key_env
            );
            Ok(Arc::new(DisabledWebSearch))
        }
    }
}

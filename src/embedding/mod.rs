/// Embedding & Indexing
///
/// Question embedding and the two per-corpus indexes used by hybrid retrieval:
/// - EmbeddingService trait with local (FastEmbed) and remote (OpenAI-compatible) providers
/// - Tantivy RAM index for BM25 lexical search
/// - HNSW for dense cosine search over precomputed document embeddings
mod keyword_index;
mod openai;
mod provider;
mod vector_index;

pub use keyword_index::{
    KeywordIndex, KeywordIndexError, KeywordSearchResult, LexicalIndex, LexicalIndexBuilder,
    TantivyIndexBuilder, STOPWORDS,
};
pub use openai::{OpenAiEmbeddingConfig, OpenAiEmbeddingProvider};
pub use provider::{EmbeddingError, EmbeddingService, FastEmbedProvider};
pub use vector_index::{HnswParams, SearchResult, VectorIndex, VectorIndexError};

use crate::config::{self, EmbeddingConfig};
use crate::error::{RagError, Result};
use std::sync::Arc;

/// Construct the embedding service selected by `embedding.provider`
pub fn create_embedding_service(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingService>> {
    let service: Arc<dyn EmbeddingService> = match config.provider.as_str() {
        "fastembed" => Arc::new(
            FastEmbedProvider::new(&config.model).map_err(|e| RagError::Config(e.to_string()))?,
        ),
        "openai" => {
            let api_key = std::env::var(&config.api_key_env).unwrap_or_default();
            let timeout = config::parse_duration(&config.timeout).ok_or_else(|| {
                RagError::InvalidConfigValue {
                    path: "embedding.timeout".to_string(),
                    message: format!("Invalid duration format: {}", config.timeout),
                }
            })?;
            Arc::new(
                OpenAiEmbeddingProvider::new(OpenAiEmbeddingConfig {
                    api_key,
                    model: config.model.clone(),
                    api_base: config.api_base.clone(),
                    dimension: config.dimension,
                    timeout,
                })
                .map_err(|e| {
                    RagError::Config(format!("{} (set {})", e, config.api_key_env))
                })?,
            )
        }
        other => {
            return Err(RagError::InvalidConfigValue {
                path: "embedding.provider".to_string(),
                message: format!("Unknown embedding provider: {}", other),
            })
        }
    };

    Ok(service)
}

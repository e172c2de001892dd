//! Hybrid Retrieval
//!
//! Lexical and dense search over one corpus combined with weighted Reciprocal
//! Rank Fusion, plus the web search fallback.

mod deduplication;
mod fusion;
mod hybrid;
pub mod web;

pub use deduplication::{deduplicate_documents, document_identity};
pub use fusion::{reciprocal_rank_fusion, FusionConfig, FusionError};
pub use hybrid::RetrievalFusionIndex;
pub use web::{create_web_search, DisabledWebSearch, TavilySearch, WebSearch};

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A document handed to generation, from the corpus or the web
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrievedDocument {
    pub content: String,
    /// File name or URL
    pub source: String,
    /// Zero-based page, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
}

/// Ranked document lookup for one corpus
#[async_trait]
pub trait DocumentRetriever: Send + Sync {
    async fn retrieve(&self, question: &str, k: usize) -> Result<Vec<RetrievedDocument>>;
}

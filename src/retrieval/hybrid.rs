//! Hybrid retrieval over one corpus: BM25 + dense HNSW, fused with weighted RRF

use crate::config::RetrievalConfig;
use crate::embedding::{
    EmbeddingService, HnswParams, LexicalIndex, LexicalIndexBuilder, VectorIndex,
};
use crate::error::{RagError, Result};
use crate::retrieval::{
    deduplicate_documents, reciprocal_rank_fusion, DocumentRetriever, FusionConfig,
    RetrievedDocument,
};
use crate::storage::CorpusDatabase;
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

/// Hybrid retriever for a single corpus
///
/// Built once per corpus from its document store; immutable afterwards and
/// safe to query concurrently.
pub struct RetrievalFusionIndex {
    corpus_id: String,
    database: Arc<CorpusDatabase>,
    lexical: Arc<dyn LexicalIndex>,
    vectors: VectorIndex,
    embedder: Arc<dyn EmbeddingService>,
    fusion: FusionConfig,
    config: RetrievalConfig,
    document_count: usize,
}

impl RetrievalFusionIndex {
    /// Open the corpus store and build both indexes
    ///
    /// Any failure to read or index the store is reported as `CorpusUnavailable`.
    pub async fn build(
        corpus_id: &str,
        db_path: PathBuf,
        embedder: Arc<dyn EmbeddingService>,
        lexical_builder: Arc<dyn LexicalIndexBuilder>,
        config: &RetrievalConfig,
    ) -> Result<Self> {
        let id = corpus_id.to_string();
        let config = config.clone();

        tokio::task::spawn_blocking(move || {
            Self::build_blocking(id, db_path, embedder, lexical_builder.as_ref(), config)
        })
        .await
        .map_err(|e| RagError::CorpusUnavailable {
            id: corpus_id.to_string(),
            reason: format!("index build task failed: {}", e),
        })?
    }

    fn build_blocking(
        corpus_id: String,
        db_path: PathBuf,
        embedder: Arc<dyn EmbeddingService>,
        lexical_builder: &dyn LexicalIndexBuilder,
        config: RetrievalConfig,
    ) -> Result<Self> {
        let start = Instant::now();
        let unavailable = |reason: String| RagError::CorpusUnavailable {
            id: corpus_id.clone(),
            reason,
        };

        let database = CorpusDatabase::open_read_only(&db_path).map_err(|e| unavailable(e.to_string()))?;
        let documents = database
            .load_documents()
            .map_err(|e| unavailable(e.to_string()))?;

        let dimension = embedder.dimension();
        if let Some(doc) = documents.iter().find(|d| d.embedding.len() != dimension) {
            return Err(unavailable(format!(
                "document {} has a {}-dimensional embedding but the embedding service produces {}",
                doc.id,
                doc.embedding.len(),
                dimension
            )));
        }

        let texts: Vec<(u64, &str)> = documents
            .iter()
            .map(|d| (d.id as u64, d.content.as_str()))
            .collect();
        let lexical = lexical_builder
            .build(&texts)
            .map_err(|e| unavailable(format!("lexical index: {}", e)))?;

        let vectors: Vec<(u64, Vec<f32>)> = documents
            .into_iter()
            .map(|d| (d.id as u64, d.embedding))
            .collect();
        let vectors = VectorIndex::build(
            dimension,
            &vectors,
            HnswParams {
                m: config.hnsw_m,
                ef_construction: config.hnsw_ef_construction,
                ef_search: config.hnsw_ef_search,
            },
        )
        .map_err(|e| unavailable(format!("vector index: {}", e)))?;

        let fusion = FusionConfig::new(config.rrf_k, config.semantic_weight, config.keyword_weight)
            .map_err(|e| RagError::Config(e.to_string()))?;

        let document_count = vectors.len();
        tracing::info!(
            "Built retrieval index for '{}': {} documents in {:.2?}",
            corpus_id,
            document_count,
            start.elapsed()
        );

        Ok(Self {
            corpus_id,
            database: Arc::new(database),
            lexical,
            vectors,
            embedder,
            fusion,
            config,
            document_count,
        })
    }

    /// Ranked, deduplicated documents for `question`, at most `k`
    pub async fn query(&self, question: &str, k: usize) -> Result<Vec<RetrievedDocument>> {
        if question.trim().is_empty() || k == 0 || self.document_count == 0 {
            return Ok(Vec::new());
        }

        let keyword_ids: Vec<i64> = self
            .lexical
            .search(question, self.config.lexical_k)
            .map_err(|e| RagError::RetrievalFailure(format!("lexical search: {}", e)))?
            .into_iter()
            .map(|r| r.id as i64)
            .collect();

        let semantic_ids = self.dense_search(question).await?;

        let fused = reciprocal_rank_fusion(&semantic_ids, &keyword_ids, &self.fusion);
        tracing::debug!(
            corpus = %self.corpus_id,
            lexical = keyword_ids.len(),
            dense = semantic_ids.len(),
            fused = fused.len(),
            "Hybrid search"
        );

        let ids: Vec<i64> = fused.into_iter().map(|(id, _)| id).collect();
        let mut documents = deduplicate_documents(self.hydrate(ids).await?);
        documents.truncate(k);
        Ok(documents)
    }

    async fn dense_search(&self, question: &str) -> Result<Vec<i64>> {
        let embedding = self
            .embedder
            .embed(question)
            .await
            .map_err(|e| RagError::RetrievalFailure(format!("embedding: {}", e)))?;

        let results = self
            .vectors
            .search(&embedding, self.config.dense_k)
            .map_err(|e| RagError::RetrievalFailure(format!("dense search: {}", e)))?;

        Ok(results
            .into_iter()
            .filter(|r| r.score >= self.config.min_dense_similarity)
            .map(|r| r.id as i64)
            .collect())
    }

    async fn hydrate(&self, ids: Vec<i64>) -> Result<Vec<RetrievedDocument>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let database = Arc::clone(&self.database);
        let records = tokio::task::spawn_blocking(move || database.get_documents(&ids))
            .await
            .map_err(|e| RagError::RetrievalFailure(format!("hydration task failed: {}", e)))?
            .map_err(|e| RagError::RetrievalFailure(format!("document store: {}", e)))?;

        Ok(records
            .into_iter()
            .map(|r| RetrievedDocument {
                content: r.content,
                source: r.source,
                page: r.page,
            })
            .collect())
    }

    pub fn corpus_id(&self) -> &str {
        &self.corpus_id
    }

    pub fn document_count(&self) -> usize {
        self.document_count
    }

    /// Configured number of documents returned per query
    pub fn top_k(&self) -> usize {
        self.config.top_k
    }
}

#[async_trait]
impl DocumentRetriever for RetrievalFusionIndex {
    async fn retrieve(&self, question: &str, k: usize) -> Result<Vec<RetrievedDocument>> {
        self.query(question, k).await
    }
}

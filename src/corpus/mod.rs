//! Per-corpus pipeline cache
//!
//! Building a corpus (loading the store, indexing it lexically and densely,
//! compiling the graph) is expensive, so each corpus is built at most once per
//! process and shared as an `Arc<CorpusHandle>`. Concurrent requests for an
//! unbuilt corpus wait on the same build.

use crate::config::{Config, RetrievalConfig};
use crate::embedding::{EmbeddingService, LexicalIndexBuilder};
use crate::error::{RagError, Result};
use crate::graph::{CompiledPipeline, PipelineSettings, PromptTemplate};
use crate::llm::GenerationService;
use crate::retrieval::{RetrievalFusionIndex, WebSearch};
use crate::storage::{CorpusInfo, CorpusRegistry};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::OnceCell;

/// A built corpus: its retrieval index and compiled pipeline
pub struct CorpusHandle {
    pub id: String,
    pub display_name: String,
    pub category: String,
    pub index: Arc<RetrievalFusionIndex>,
    pub pipeline: CompiledPipeline,
    pub built_at: DateTime<Utc>,
    pub build_elapsed: Duration,
}

/// Shared collaborators every corpus build is wired with
#[derive(Clone)]
pub struct PipelineComponents {
    pub embedder: Arc<dyn EmbeddingService>,
    pub lexical_builder: Arc<dyn LexicalIndexBuilder>,
    pub web_search: Arc<dyn WebSearch>,
    pub generator: Arc<dyn GenerationService>,
    pub template: PromptTemplate,
    pub retrieval: RetrievalConfig,
    pub settings: PipelineSettings,
}

impl PipelineComponents {
    /// Wire the collaborators with the retrieval and graph settings of `config`
    pub fn new(
        config: &Config,
        embedder: Arc<dyn EmbeddingService>,
        lexical_builder: Arc<dyn LexicalIndexBuilder>,
        web_search: Arc<dyn WebSearch>,
        generator: Arc<dyn GenerationService>,
        template: PromptTemplate,
    ) -> Self {
        Self {
            embedder,
            lexical_builder,
            web_search,
            generator,
            template,
            retrieval: config.retrieval.clone(),
            settings: PipelineSettings::from_config(config),
        }
    }
}

type Slot = Arc<OnceCell<Arc<CorpusHandle>>>;

/// Single-flight cache of built corpora, keyed by corpus id
pub struct PipelineCache {
    slots: DashMap<String, Slot>,
    registry: Arc<dyn CorpusRegistry>,
    components: PipelineComponents,
}

impl PipelineCache {
    pub fn new(registry: Arc<dyn CorpusRegistry>, components: PipelineComponents) -> Self {
        Self {
            slots: DashMap::new(),
            registry,
            components,
        }
    }

    /// Return the handle for `corpus_id`, building it on first use
    ///
    /// A failed build leaves the slot empty so a later call retries.
    pub async fn get_or_build(&self, corpus_id: &str) -> Result<Arc<CorpusHandle>> {
        let slot = self.slot(corpus_id);
        if let Some(handle) = slot.get() {
            return Ok(Arc::clone(handle));
        }

        let result = slot
            .get_or_try_init(|| async {
                let info = self.lookup(corpus_id).await?;
                self.build(info).await
            })
            .await
            .map(Arc::clone);

        if let Err(RagError::CorpusNotFound { .. }) = &result {
            self.slots
                .remove_if(corpus_id, |_, slot| !slot.initialized());
        }
        result
    }

    /// Registry lookup on the blocking pool; the file registry walks the disk
    async fn lookup(&self, corpus_id: &str) -> Result<CorpusInfo> {
        let registry = Arc::clone(&self.registry);
        let id = corpus_id.to_string();
        tokio::task::spawn_blocking(move || registry.get(&id))
            .await
            .map_err(|e| RagError::CorpusUnavailable {
                id: corpus_id.to_string(),
                reason: format!("registry lookup task failed: {}", e),
            })??
            .ok_or_else(|| RagError::CorpusNotFound {
                id: corpus_id.to_string(),
            })
    }

    fn slot(&self, corpus_id: &str) -> Slot {
        if let Some(slot) = self.slots.get(corpus_id) {
            return Arc::clone(&slot);
        }
        Arc::clone(
            self.slots
                .entry(corpus_id.to_string())
                .or_insert_with(|| Arc::new(OnceCell::new()))
                .value(),
        )
    }

    async fn build(&self, info: CorpusInfo) -> Result<Arc<CorpusHandle>> {
        let start = Instant::now();
        tracing::info!("Building pipeline for corpus '{}'", info.id);

        let db_path = self.registry.store_path(&info.id)?;
        let components = &self.components;

        let index = Arc::new(
            RetrievalFusionIndex::build(
                &info.id,
                db_path,
                Arc::clone(&components.embedder),
                Arc::clone(&components.lexical_builder),
                &components.retrieval,
            )
            .await?,
        );

        let pipeline = CompiledPipeline::new(
            info.id.clone(),
            index.clone(),
            Arc::clone(&components.web_search),
            Arc::clone(&components.generator),
            components.template.clone(),
            components.settings.clone(),
        );

        let build_elapsed = start.elapsed();
        tracing::info!(
            "Corpus '{}' ready: {} documents in {:.2?}",
            info.id,
            index.document_count(),
            build_elapsed
        );

        Ok(Arc::new(CorpusHandle {
            id: info.id,
            display_name: info.display_name,
            category: info.category,
            index,
            pipeline,
            built_at: Utc::now(),
            build_elapsed,
        }))
    }

    /// Build every corpus the registry lists; failures are logged and skipped
    pub async fn preload_all(&self) -> Result<usize> {
        let corpora = self.registry.list()?;
        let mut built = 0;

        for info in corpora {
            match self.get_or_build(&info.id).await {
                Ok(_) => built += 1,
                Err(e) => tracing::warn!("Skipping corpus '{}' during preload: {}", info.id, e),
            }
        }

        tracing::info!("Preloaded {} corpora", built);
        Ok(built)
    }

    /// Drop a built handle so the next request rebuilds it
    pub fn invalidate(&self, corpus_id: &str) -> bool {
        let removed = self.slots.remove(corpus_id).is_some();
        if removed {
            tracing::info!("Invalidated corpus '{}'", corpus_id);
        }
        removed
    }

    pub fn is_built(&self, corpus_id: &str) -> bool {
        self.slots
            .get(corpus_id)
            .map(|slot| slot.initialized())
            .unwrap_or(false)
    }

    /// Ids of built corpora, sorted
    pub fn built_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .slots
            .iter()
            .filter(|entry| entry.value().initialized())
            .map(|entry| entry.key().clone())
            .collect();
        ids.sort();
        ids
    }

    pub fn registry(&self) -> &Arc<dyn CorpusRegistry> {
        &self.registry
    }
}

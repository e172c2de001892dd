//! Orchestration graph
//!
//! A fixed retrieve → (web search fallback) → generate state machine. The
//! state is owned by one execution and threaded through each node by value;
//! the progress trace and the answer always come from the same run.

mod generate;
mod nodes;

pub use generate::{format_documents, percent_decode, PromptTemplate};
pub use nodes::{transition, Node};

use crate::config::Config;
use crate::error::{RagError, Result};
use crate::llm::{GenerationService, Prompt};
use crate::progress::{ExecutionGuard, ProgressEventBus};
use crate::retrieval::{DocumentRetriever, RetrievedDocument, WebSearch};
use crate::session::ChatMessage;
use ahash::AHashSet;
use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

/// State carried through one execution
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineState {
    pub question: String,
    pub documents: Vec<RetrievedDocument>,
    pub generation: String,
    pub chat_history: Vec<ChatMessage>,
}

impl PipelineState {
    pub fn new(question: impl Into<String>, chat_history: Vec<ChatMessage>) -> Self {
        Self {
            question: question.into(),
            chat_history,
            ..Default::default()
        }
    }
}

/// Execution bounds and retrieval depth
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub max_steps: usize,
    pub execution_timeout: Duration,
    pub top_k: usize,
    pub memo_capacity: usize,
}

impl PipelineSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_steps: config.graph.max_steps,
            execution_timeout: config.graph.execution_timeout(),
            top_k: config.retrieval.top_k,
            memo_capacity: config.retrieval.memo_capacity,
        }
    }
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Graph bound to one corpus, ready to execute
pub struct CompiledPipeline {
    corpus_id: String,
    retriever: Arc<dyn DocumentRetriever>,
    web_search: Arc<dyn WebSearch>,
    generator: Arc<dyn GenerationService>,
    template: PromptTemplate,
    memo: Mutex<LruCache<String, Arc<Vec<RetrievedDocument>>>>,
    settings: PipelineSettings,
}

impl CompiledPipeline {
    pub fn new(
        corpus_id: impl Into<String>,
        retriever: Arc<dyn DocumentRetriever>,
        web_search: Arc<dyn WebSearch>,
        generator: Arc<dyn GenerationService>,
        template: PromptTemplate,
        settings: PipelineSettings,
    ) -> Self {
        let capacity = NonZeroUsize::new(settings.memo_capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            corpus_id: corpus_id.into(),
            retriever,
            web_search,
            generator,
            template,
            memo: Mutex::new(LruCache::new(capacity)),
            settings,
        }
    }

    pub fn corpus_id(&self) -> &str {
        &self.corpus_id
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Run the graph to completion
    ///
    /// Publishes one progress event per distinct node entered and a terminal
    /// event on every exit path, including timeout and cancellation.
    pub async fn execute(
        &self,
        state: PipelineState,
        execution_id: &str,
        bus: &ProgressEventBus,
    ) -> Result<PipelineState> {
        let guard = bus.begin(execution_id);
        let timeout = self.settings.execution_timeout;

        tracing::info!(
            "Execution {} started on corpus '{}'",
            execution_id,
            self.corpus_id
        );

        let result = match tokio::time::timeout(timeout, self.run(state, &guard)).await {
            Ok(result) => result,
            Err(_) => Err(RagError::ExecutionTimeout {
                execution_id: execution_id.to_string(),
                seconds: timeout.as_secs(),
            }),
        };

        match &result {
            Ok(state) => tracing::info!(
                "Execution {} finished with {} documents",
                execution_id,
                state.documents.len()
            ),
            Err(e) => tracing::warn!("Execution {} failed: {}", execution_id, e),
        }
        result
    }

    async fn run(&self, mut state: PipelineState, guard: &ExecutionGuard) -> Result<PipelineState> {
        let mut visited: AHashSet<Node> = AHashSet::new();
        let mut steps = 0usize;
        let mut current = transition(None, &state);

        while let Some(node) = current {
            steps += 1;
            if steps > self.settings.max_steps {
                return Err(RagError::StepLimitExceeded {
                    limit: self.settings.max_steps,
                });
            }

            if visited.insert(node) {
                guard.publish_step(node.label());
            }

            tracing::debug!("Execution {} entering {}", guard.execution_id(), node.label());
            state = self.step(node, state).await?;
            current = transition(Some(node), &state);
        }

        Ok(state)
    }

    async fn step(&self, node: Node, state: PipelineState) -> Result<PipelineState> {
        match node {
            Node::Retrieve => self.retrieve(state).await,
            Node::WebSearch => self.web_search(state).await,
            Node::Generate => self.generate(state).await,
        }
    }

    async fn retrieve(&self, state: PipelineState) -> Result<PipelineState> {
        let cached = self.memo.lock().get(&state.question).cloned();
        let documents = match cached {
            Some(documents) => {
                tracing::debug!("Retrieval memo hit on corpus '{}'", self.corpus_id);
                documents
            }
            None => {
                let documents = Arc::new(
                    self.retriever
                        .retrieve(&state.question, self.settings.top_k)
                        .await?,
                );
                self.memo
                    .lock()
                    .put(state.question.clone(), Arc::clone(&documents));
                documents
            }
        };

        Ok(PipelineState {
            documents: documents.as_ref().clone(),
            ..state
        })
    }

    async fn web_search(&self, state: PipelineState) -> Result<PipelineState> {
        let documents = self.web_search.search(&state.question).await?;
        tracing::debug!("Web search returned {} results", documents.len());
        Ok(PipelineState { documents, ..state })
    }

    async fn generate(&self, state: PipelineState) -> Result<PipelineState> {
        let rendered = self
            .template
            .render(&state.question, &state.documents, &state.chat_history);
        let generation = self.generator.complete(Prompt::new("", rendered)).await?;
        Ok(PipelineState { generation, ..state })
    }

    /// Number of memoized questions
    pub fn memo_len(&self) -> usize {
        self.memo.lock().len()
    }
}

//! External interface
//!
//! `RagService` ties the pipeline cache, the progress bus, and the session
//! store together behind the request/response shapes the daemon serves.

use crate::config::{expand_tilde, Config};
use crate::corpus::{PipelineCache, PipelineComponents};
use crate::embedding::{create_embedding_service, TantivyIndexBuilder};
use crate::error::{RagError, Result};
use crate::grading::{AnswerAudit, GradingSuite};
use crate::graph::{Node, PipelineState, PromptTemplate};
use crate::llm::create_generation_service;
use crate::progress::{ProgressEvent, ProgressEventBus};
use crate::retrieval::create_web_search;
use crate::session::SessionManager;
use crate::storage::{FileRegistry, DEFAULT_CATEGORY};
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

/// A question submitted for answering
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AskRequest {
    pub question: String,
    /// Falls back to the corpus the session selected
    #[serde(default)]
    pub corpus_id: Option<String>,
    /// Caller-chosen id so progress can be subscribed before submitting
    #[serde(default)]
    pub execution_id: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
}

/// Outcome of `submit`: an answer or a structured error
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AskResponse {
    Answer {
        answer: String,
        execution_id: String,
        session_id: String,
        documents_used: usize,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        audit: Option<AnswerAudit>,
    },
    Error {
        error: String,
        status: String,
        execution_id: String,
    },
}

impl AskResponse {
    pub fn is_error(&self) -> bool {
        matches!(self, AskResponse::Error { .. })
    }
}

/// One frame of a progress subscription
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StepUpdate {
    Step { step: String, message: String },
    Done { done: bool },
}

impl From<ProgressEvent> for StepUpdate {
    fn from(event: ProgressEvent) -> Self {
        if event.terminal {
            return StepUpdate::Done { done: true };
        }
        let message = Node::message_for(&event.step_label)
            .map(str::to_string)
            .unwrap_or_else(|| event.step_label.clone());
        StepUpdate::Step {
            step: event.step_label,
            message,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorpusSelection {
    pub corpus_id: String,
    pub display_name: String,
    pub category: String,
    pub session_id: String,
    /// Time spent obtaining the pipeline; near zero when it was cached
    pub elapsed_secs: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorpusListing {
    pub id: String,
    pub display_name: String,
    pub category: String,
    pub built: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceStatus {
    pub uptime_secs: u64,
    pub built_corpora: Vec<String>,
    pub active_channels: usize,
    pub sessions: usize,
}

pub struct RagService {
    cache: Arc<PipelineCache>,
    bus: ProgressEventBus,
    sessions: SessionManager,
    grading: Option<GradingSuite>,
    started_at: Instant,
}

impl RagService {
    /// Assemble the service; `grading` enables the post-answer audit
    pub fn new(
        cache: Arc<PipelineCache>,
        bus: ProgressEventBus,
        sessions: SessionManager,
        grading: Option<GradingSuite>,
    ) -> Self {
        if grading.is_none() {
            tracing::warn!(
                "Answer audit is disabled; relevance grading is lenient and answers are not checked for groundedness"
            );
        }

        Self {
            cache,
            bus,
            sessions,
            grading,
            started_at: Instant::now(),
        }
    }

    /// Wire the production collaborators described by `config`
    pub fn from_config(config: &Config) -> Result<Self> {
        let embedder = create_embedding_service(&config.embedding)?;
        let generator = create_generation_service(&config.generation)?;
        let web_search = create_web_search(&config.web_search)?;
        let template = PromptTemplate::load(config.prompts.rag_template.as_deref())?;

        let registry = Arc::new(FileRegistry::new(
            config.storage.corpora_dir(),
            expand_tilde(&config.storage.registry_file),
        ));
        let components = PipelineComponents::new(
            config,
            embedder,
            Arc::new(TantivyIndexBuilder),
            web_search,
            Arc::clone(&generator),
            template,
        );

        let grading = if config.grading.audit_answers {
            Some(GradingSuite::new(generator, &config.grading)?)
        } else {
            None
        };

        Ok(Self::new(
            Arc::new(PipelineCache::new(registry, components)),
            ProgressEventBus::from_config(&config.progress),
            SessionManager::new(config.history.max_messages),
            grading,
        ))
    }

    /// Answer a question, never failing at the call level
    pub async fn submit(&self, request: AskRequest) -> AskResponse {
        let execution_id = request
            .execution_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        match self.answer(request, &execution_id).await {
            Ok(response) => response,
            Err(e) => AskResponse::Error {
                error: e.to_string(),
                status: e.status().to_string(),
                execution_id,
            },
        }
    }

    async fn answer(&self, request: AskRequest, execution_id: &str) -> Result<AskResponse> {
        let session_id = self.sessions.get_or_create(request.session_id.as_deref());

        let prepared = async {
            let corpus_id = request
                .corpus_id
                .clone()
                .or_else(|| self.sessions.corpus_of(&session_id))
                .ok_or_else(|| RagError::CorpusNotFound {
                    id: "(none selected)".to_string(),
                })?;
            self.cache.get_or_build(&corpus_id).await
        }
        .await;

        let handle = match prepared {
            Ok(handle) => handle,
            Err(e) => {
                // The pipeline never started, so end any waiting subscription here
                self.bus
                    .publish(execution_id, ProgressEvent::terminal(execution_id));
                return Err(e);
            }
        };

        let history = self.sessions.history(&session_id);
        let state = handle
            .pipeline
            .execute(
                PipelineState::new(request.question.clone(), history),
                execution_id,
                &self.bus,
            )
            .await?;

        self.sessions
            .record_turn(&session_id, &request.question, &state.generation);

        let audit = match &self.grading {
            Some(grading) => {
                match grading
                    .audit(&state.question, &state.documents, &state.generation)
                    .await
                {
                    Ok(audit) => Some(audit),
                    Err(e) => {
                        tracing::warn!("Answer audit for {} failed: {}", execution_id, e);
                        None
                    }
                }
            }
            None => None,
        };

        Ok(AskResponse::Answer {
            answer: state.generation,
            execution_id: execution_id.to_string(),
            session_id,
            documents_used: state.documents.len(),
            audit,
        })
    }

    /// Progress of one execution, ending with `{done: true}`
    pub fn subscribe(&self, execution_id: &str) -> impl Stream<Item = StepUpdate> + Send + 'static {
        self.bus.subscribe(execution_id).map(StepUpdate::from)
    }

    /// Build (or fetch) a corpus and bind the session to it
    ///
    /// Starts a fresh conversation for the session.
    pub async fn select_corpus(
        &self,
        corpus_id: &str,
        session_id: Option<&str>,
    ) -> Result<CorpusSelection> {
        let start = Instant::now();
        let handle = self.cache.get_or_build(corpus_id).await?;
        let elapsed_secs = start.elapsed().as_secs_f64();

        let session_id = self.sessions.get_or_create(session_id);
        self.sessions.select_corpus(&session_id, &handle.id);

        tracing::info!(
            "Session {} selected corpus '{}' ({:.2}s)",
            session_id,
            handle.id,
            elapsed_secs
        );

        Ok(CorpusSelection {
            corpus_id: handle.id.clone(),
            display_name: handle.display_name.clone(),
            category: handle.category.clone(),
            session_id,
            elapsed_secs,
        })
    }

    pub fn list_corpora(&self) -> Result<Vec<CorpusListing>> {
        let corpora = self.cache.registry().list()?;
        Ok(corpora
            .into_iter()
            .map(|info| CorpusListing {
                built: self.cache.is_built(&info.id),
                category: if info.category.is_empty() {
                    DEFAULT_CATEGORY.to_string()
                } else {
                    info.category
                },
                display_name: info.display_name,
                id: info.id,
            })
            .collect())
    }

    pub fn clear_session(&self, session_id: &str) -> Result<()> {
        self.sessions.clear(session_id)
    }

    pub async fn preload(&self) -> Result<usize> {
        self.cache.preload_all().await
    }

    pub fn status(&self) -> ServiceStatus {
        ServiceStatus {
            uptime_secs: self.started_at.elapsed().as_secs(),
            built_corpora: self.cache.built_ids(),
            active_channels: self.bus.active_channels(),
            sessions: self.sessions.len(),
        }
    }

    pub fn cache(&self) -> &Arc<PipelineCache> {
        &self.cache
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    pub fn bus(&self) -> &ProgressEventBus {
        &self.bus
    }
}

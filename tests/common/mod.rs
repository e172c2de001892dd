// Shared fixtures: stub collaborators and on-disk corpora
#![allow(dead_code)]

use adaptive_rag::config::Config;
use adaptive_rag::corpus::{PipelineCache, PipelineComponents};
use adaptive_rag::embedding::{
    EmbeddingError, EmbeddingService, KeywordIndexError, LexicalIndex, LexicalIndexBuilder,
    TantivyIndexBuilder,
};
use adaptive_rag::error::Result;
use adaptive_rag::grading::GradingSuite;
use adaptive_rag::graph::PromptTemplate;
use adaptive_rag::llm::{GenerationService, Prompt};
use adaptive_rag::progress::ProgressEventBus;
use adaptive_rag::retrieval::{RetrievedDocument, WebSearch};
use adaptive_rag::service::RagService;
use adaptive_rag::session::SessionManager;
use adaptive_rag::storage::{CorpusDatabase, FileRegistry, CORPUS_DB_FILE};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

pub const RAG_AXIS: [f32; 2] = [1.0, 0.0];
pub const OTHER_AXIS: [f32; 2] = [0.0, 1.0];

/// Two-topic embedder: RAG vocabulary on one axis, everything else on the other
pub struct TopicEmbedder;

#[async_trait]
impl EmbeddingService for TopicEmbedder {
    async fn embed(&self, text: &str) -> std::result::Result<Vec<f32>, EmbeddingError> {
        let lower = text.to_lowercase();
        if lower.contains("rag") || lower.contains("retrieval") {
            Ok(RAG_AXIS.to_vec())
        } else {
            Ok(OTHER_AXIS.to_vec())
        }
    }

    fn dimension(&self) -> usize {
        2
    }

    fn model_name(&self) -> &str {
        "topic"
    }
}

/// Echoes the rendered prompt as the answer and grades every JSON prompt "yes"
#[derive(Default)]
pub struct ScriptedGenerator {
    pub answers: AtomicUsize,
    pub gradings: AtomicUsize,
    pub prompts: Mutex<Vec<String>>,
}

#[async_trait]
impl GenerationService for ScriptedGenerator {
    async fn complete(&self, prompt: Prompt) -> Result<String> {
        if prompt.json {
            self.gradings.fetch_add(1, Ordering::SeqCst);
            return Ok(r#"{"binary_score": "yes"}"#.to_string());
        }

        self.answers.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().push(prompt.user.clone());
        Ok(format!("ANSWER\n{}", prompt.user))
    }

    fn model_name(&self) -> &str {
        "scripted"
    }
}

impl ScriptedGenerator {
    pub fn answer_count(&self) -> usize {
        self.answers.load(Ordering::SeqCst)
    }

    pub fn last_prompt(&self) -> Option<String> {
        self.prompts.lock().last().cloned()
    }
}

/// Returns one fixed web result and counts calls
#[derive(Default)]
pub struct RecordingWebSearch {
    pub calls: AtomicUsize,
}

pub const WEB_SOURCE: &str = "https://example.com/rag";

#[async_trait]
impl WebSearch for RecordingWebSearch {
    async fn search(&self, _query: &str) -> Result<Vec<RetrievedDocument>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(vec![RetrievedDocument {
            content: "Retrieval-augmented generation grounds answers in documents.".to_string(),
            source: WEB_SOURCE.to_string(),
            page: None,
        }])
    }
}

impl RecordingWebSearch {
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

/// Tantivy builder that counts builds and widens the build window
pub struct CountingLexicalBuilder {
    pub builds: AtomicUsize,
    delay: Duration,
}

impl CountingLexicalBuilder {
    pub fn new(delay: Duration) -> Self {
        Self {
            builds: AtomicUsize::new(0),
            delay,
        }
    }

    pub fn build_count(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }
}

impl LexicalIndexBuilder for CountingLexicalBuilder {
    fn build(
        &self,
        documents: &[(u64, &str)],
    ) -> std::result::Result<Arc<dyn LexicalIndex>, KeywordIndexError> {
        self.builds.fetch_add(1, Ordering::SeqCst);
        // Runs on the blocking pool
        std::thread::sleep(self.delay);
        TantivyIndexBuilder.build(documents)
    }
}

/// Write `<root>/corpora/<id>/corpus.db` with the given chunks
pub fn write_corpus(root: &Path, id: &str, documents: &[(&str, &str, Option<u32>, [f32; 2])]) -> PathBuf {
    let path = root.join("corpora").join(id).join(CORPUS_DB_FILE);
    let db = CorpusDatabase::create(&path).unwrap();
    for (content, source, page, embedding) in documents {
        db.insert_document(content, source, *page, embedding).unwrap();
    }
    path
}

pub fn write_rag_corpus(root: &Path, id: &str) -> PathBuf {
    write_corpus(
        root,
        id,
        &[
            ("RAG pairs retrieval with generation.", "rag.pdf", Some(0), RAG_AXIS),
            ("Hybrid retrieval fuses BM25 and dense vectors.", "rag.pdf", Some(1), RAG_AXIS),
        ],
    )
}

pub fn write_bread_corpus(root: &Path, id: &str) -> PathBuf {
    write_corpus(
        root,
        id,
        &[
            ("Sourdough is a slow bread.", "bread.txt", None, OTHER_AXIS),
            ("What flour works best for rye?", "bread.txt", None, OTHER_AXIS),
        ],
    )
}

pub fn write_metadata(root: &Path, json: &str) {
    std::fs::write(root.join("corpora.json"), json).unwrap();
}

/// Service over a temp data dir with stub collaborators
pub struct Harness {
    pub temp: TempDir,
    pub generator: Arc<ScriptedGenerator>,
    pub web: Arc<RecordingWebSearch>,
    pub lexical: Arc<CountingLexicalBuilder>,
    pub config: Config,
}

impl Harness {
    pub fn new() -> Self {
        let temp = TempDir::new().unwrap();
        let mut config = Config::default();
        config.storage.data_dir = temp.path().to_path_buf();
        config.storage.registry_file = temp.path().join("corpora.json");
        config.progress.poll_interval = "20ms".to_string();
        config.progress.max_empty_polls = 50;

        Self {
            temp,
            generator: Arc::new(ScriptedGenerator::default()),
            web: Arc::new(RecordingWebSearch::default()),
            lexical: Arc::new(CountingLexicalBuilder::new(Duration::from_millis(50))),
            config,
        }
    }

    pub fn root(&self) -> &Path {
        self.temp.path()
    }

    pub fn cache(&self) -> Arc<PipelineCache> {
        self.cache_with(self.generator.clone())
    }

    pub fn cache_with(&self, generator: Arc<dyn GenerationService>) -> Arc<PipelineCache> {
        Arc::new(PipelineCache::new(
            Arc::new(self.registry()),
            self.components(generator),
        ))
    }

    pub fn registry(&self) -> FileRegistry {
        FileRegistry::new(
            self.config.storage.corpora_dir(),
            self.config.storage.registry_file.clone(),
        )
    }

    pub fn components(&self, generator: Arc<dyn GenerationService>) -> PipelineComponents {
        PipelineComponents::new(
            &self.config,
            Arc::new(TopicEmbedder),
            self.lexical.clone(),
            self.web.clone(),
            generator,
            PromptTemplate::default(),
        )
    }

    pub fn service(&self) -> RagService {
        self.service_with_audit(false)
    }

    /// Service whose pipelines answer with `generator` instead of the scripted one
    pub fn service_with_generator(&self, generator: Arc<dyn GenerationService>) -> RagService {
        RagService::new(
            self.cache_with(generator),
            ProgressEventBus::from_config(&self.config.progress),
            SessionManager::new(self.config.history.max_messages),
            None,
        )
    }

    pub fn service_with_audit(&self, audit: bool) -> RagService {
        let grading = audit.then(|| {
            GradingSuite::new(self.generator.clone(), &self.config.grading).unwrap()
        });
        RagService::new(
            self.cache(),
            ProgressEventBus::from_config(&self.config.progress),
            SessionManager::new(self.config.history.max_messages),
            grading,
        )
    }
}

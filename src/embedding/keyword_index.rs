/// In-memory tantivy index for BM25 lexical search over one corpus
use std::sync::Arc;
use tantivy::collector::TopDocs;
use tantivy::query::QueryParser;
use tantivy::schema::*;
use tantivy::tokenizer::{
    LowerCaser, RemoveLongFilter, SimpleTokenizer, StopWordFilter, TextAnalyzer,
};
use tantivy::{doc, Index, IndexReader, IndexWriter, ReloadPolicy, TantivyError};
use thiserror::Error;

/// Per-thread indexing arena; tantivy rejects budgets below 15MB
const WRITER_MEMORY_BUDGET: usize = 20_000_000;

/// Analyzer registered on the text field; applies to documents and queries alike
const CORPUS_TOKENIZER: &str = "corpus_text";

/// Function words that never carry topic on either side of a match
pub const STOPWORDS: &[&str] = &[
    "a", "about", "an", "and", "are", "as", "at", "be", "by", "can", "did", "do", "does", "for",
    "from", "how", "i", "in", "is", "it", "its", "me", "my", "of", "on", "or", "tell", "that",
    "the", "this", "to", "was", "were", "what", "when", "where", "which", "who", "why", "with",
    "you", "your",
];

fn corpus_analyzer() -> TextAnalyzer {
    TextAnalyzer::builder(SimpleTokenizer::default())
        .filter(RemoveLongFilter::limit(40))
        .filter(LowerCaser)
        .filter(StopWordFilter::remove(
            STOPWORDS.iter().map(|word| word.to_string()),
        ))
        .build()
}

#[derive(Error, Debug)]
pub enum KeywordIndexError {
    #[error("Index initialization failed: {0}")]
    InitializationError(String),

    #[error("Insert failed: {0}")]
    InsertError(String),

    #[error("Search failed: {0}")]
    SearchError(String),

    #[error("Tantivy error: {0}")]
    TantivyError(#[from] TantivyError),
}

/// Search hit with document id and BM25 score
#[derive(Debug, Clone)]
pub struct KeywordSearchResult {
    /// Row id in the corpus store
    pub id: u64,
    pub score: f32,
}

/// Read-only lexical search over a built index
pub trait LexicalIndex: Send + Sync {
    /// Top `limit` documents by BM25, best first
    fn search(&self, query: &str, limit: usize) -> Result<Vec<KeywordSearchResult>, KeywordIndexError>;

    fn len(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Builds a lexical index from `(id, text)` pairs
pub trait LexicalIndexBuilder: Send + Sync {
    fn build(&self, documents: &[(u64, &str)]) -> Result<Arc<dyn LexicalIndex>, KeywordIndexError>;
}

/// Default builder producing a RAM-resident tantivy index
#[derive(Debug, Default, Clone, Copy)]
pub struct TantivyIndexBuilder;

impl LexicalIndexBuilder for TantivyIndexBuilder {
    fn build(&self, documents: &[(u64, &str)]) -> Result<Arc<dyn LexicalIndex>, KeywordIndexError> {
        Ok(Arc::new(KeywordIndex::build(documents)?))
    }
}

/// Tantivy keyword index wrapper
pub struct KeywordIndex {
    index: Index,
    reader: IndexReader,
    id_field: Field,
    text_field: Field,
}

impl KeywordIndex {
    /// Index every document and commit once
    pub fn build(documents: &[(u64, &str)]) -> Result<Self, KeywordIndexError> {
        let mut schema_builder = Schema::builder();
        let id_field = schema_builder.add_u64_field("id", INDEXED | STORED);
        let indexing = TextFieldIndexing::default()
            .set_tokenizer(CORPUS_TOKENIZER)
            .set_index_option(IndexRecordOption::WithFreqsAndPositions);
        let text_field = schema_builder.add_text_field(
            "text",
            TextOptions::default().set_indexing_options(indexing),
        );
        let schema = schema_builder.build();

        let index = Index::create_in_ram(schema);
        index.tokenizers().register(CORPUS_TOKENIZER, corpus_analyzer());

        let mut writer: IndexWriter = index
            .writer_with_num_threads(1, WRITER_MEMORY_BUDGET)
            .map_err(|e| KeywordIndexError::InitializationError(e.to_string()))?;

        for (id, text) in documents {
            writer
                .add_document(doc!(
                    id_field => *id,
                    text_field => *text,
                ))
                .map_err(|e| KeywordIndexError::InsertError(e.to_string()))?;
        }

        writer
            .commit()
            .map_err(|e| KeywordIndexError::InsertError(e.to_string()))?;

        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()
            .map_err(|e| KeywordIndexError::InitializationError(e.to_string()))?;
        reader.reload()?;

        Ok(Self {
            index,
            reader,
            id_field,
            text_field,
        })
    }
}

impl LexicalIndex for KeywordIndex {
    fn search(&self, query: &str, limit: usize) -> Result<Vec<KeywordSearchResult>, KeywordIndexError> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let searcher = self.reader.searcher();

        // Questions are free text; syntax errors degrade to term queries
        let query_parser = QueryParser::for_index(&self.index, vec![self.text_field]);
        let (query, errors) = query_parser.parse_query_lenient(query);
        if !errors.is_empty() {
            tracing::debug!("Lenient query parse dropped {} fragment(s)", errors.len());
        }

        let top_docs = searcher
            .search(&query, &TopDocs::with_limit(limit))
            .map_err(|e| KeywordIndexError::SearchError(e.to_string()))?;

        let mut results = Vec::with_capacity(top_docs.len());
        for (score, doc_address) in top_docs {
            let retrieved: TantivyDocument = searcher
                .doc(doc_address)
                .map_err(|e| KeywordIndexError::SearchError(e.to_string()))?;

            let id = retrieved
                .get_first(self.id_field)
                .and_then(|v| v.as_u64())
                .ok_or_else(|| {
                    KeywordIndexError::SearchError("Missing or invalid ID field".to_string())
                })?;

            results.push(KeywordSearchResult { id, score });
        }

        Ok(results)
    }

    fn len(&self) -> u64 {
        self.reader.searcher().num_docs()
    }
}

mod common;

use adaptive_rag::corpus::PipelineCache;
use adaptive_rag::error::{RagError, Result};
use adaptive_rag::storage::{CorpusInfo, CorpusRegistry, FileRegistry};
use common::{write_bread_corpus, write_metadata, write_rag_corpus, Harness};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// File registry that counts lookups
struct CountingRegistry {
    inner: FileRegistry,
    lookups: AtomicUsize,
}

impl CorpusRegistry for CountingRegistry {
    fn list(&self) -> Result<Vec<CorpusInfo>> {
        self.inner.list()
    }

    fn store_path(&self, id: &str) -> Result<PathBuf> {
        self.inner.store_path(id)
    }

    fn get(&self, id: &str) -> Result<Option<CorpusInfo>> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        self.inner.get(id)
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_callers_share_one_build() {
    let harness = Harness::new();
    write_rag_corpus(harness.root(), "papers");
    let cache = harness.cache();

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move { cache.get_or_build("papers").await })
        })
        .collect();

    let mut handles = Vec::new();
    for task in tasks {
        handles.push(task.await.unwrap().unwrap());
    }

    assert_eq!(harness.lexical.build_count(), 1);
    assert!(handles.iter().all(|h| Arc::ptr_eq(h, &handles[0])));
    assert_eq!(cache.built_ids(), vec!["papers".to_string()]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_callers_share_one_registry_lookup() {
    let harness = Harness::new();
    write_rag_corpus(harness.root(), "papers");
    let registry = Arc::new(CountingRegistry {
        inner: harness.registry(),
        lookups: AtomicUsize::new(0),
    });
    let cache = Arc::new(PipelineCache::new(
        registry.clone(),
        harness.components(harness.generator.clone()),
    ));

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move { cache.get_or_build("papers").await })
        })
        .collect();
    for task in tasks {
        task.await.unwrap().unwrap();
    }
    cache.get_or_build("papers").await.unwrap();

    assert_eq!(registry.lookups.load(Ordering::SeqCst), 1);
    assert_eq!(harness.lexical.build_count(), 1);
}

#[tokio::test]
async fn test_built_handle_is_reused() {
    let harness = Harness::new();
    write_rag_corpus(harness.root(), "papers");
    let cache = harness.cache();

    let first = cache.get_or_build("papers").await.unwrap();
    let second = cache.get_or_build("papers").await.unwrap();

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(harness.lexical.build_count(), 1);
    assert_eq!(first.index.document_count(), 2);
    assert_eq!(first.pipeline.corpus_id(), "papers");
}

#[tokio::test]
async fn test_unknown_corpus_is_not_found() {
    let harness = Harness::new();
    write_rag_corpus(harness.root(), "papers");
    let cache = harness.cache();

    let err = cache.get_or_build("missing").await.err().unwrap();
    assert!(matches!(err, RagError::CorpusNotFound { ref id } if id == "missing"));
    assert_eq!(harness.lexical.build_count(), 0);
    assert!(!cache.is_built("missing"));
}

#[tokio::test]
async fn test_failed_build_is_retried() {
    let harness = Harness::new();
    let db_path = harness.root().join("corpora").join("papers").join("corpus.db");
    std::fs::create_dir_all(db_path.parent().unwrap()).unwrap();
    std::fs::write(&db_path, b"this is not a sqlite database").unwrap();
    let cache = harness.cache();

    let err = cache.get_or_build("papers").await.err().unwrap();
    assert!(matches!(err, RagError::CorpusUnavailable { .. }));
    assert!(!cache.is_built("papers"));

    std::fs::remove_file(&db_path).unwrap();
    write_rag_corpus(harness.root(), "papers");

    let handle = cache.get_or_build("papers").await.unwrap();
    assert_eq!(handle.id, "papers");
    assert!(cache.is_built("papers"));
}

#[tokio::test]
async fn test_dimension_mismatch_is_unavailable() {
    let harness = Harness::new();
    let path = harness.root().join("corpora").join("wide").join("corpus.db");
    let db = adaptive_rag::storage::CorpusDatabase::create(&path).unwrap();
    db.insert_document("RAG", "rag.pdf", None, &[1.0, 0.0, 0.0]).unwrap();
    drop(db);

    let err = harness.cache().get_or_build("wide").await.err().unwrap();
    assert_eq!(err.status(), "corpus_unavailable");
}

#[tokio::test]
async fn test_invalidate_forces_rebuild() {
    let harness = Harness::new();
    write_rag_corpus(harness.root(), "papers");
    let cache = harness.cache();

    let first = cache.get_or_build("papers").await.unwrap();
    assert!(cache.invalidate("papers"));
    assert!(!cache.invalidate("papers"));

    let second = cache.get_or_build("papers").await.unwrap();
    assert!(!Arc::ptr_eq(&first, &second));
    assert_eq!(harness.lexical.build_count(), 2);
}

#[tokio::test]
async fn test_preload_skips_broken_corpora() {
    let harness = Harness::new();
    write_rag_corpus(harness.root(), "papers");
    write_bread_corpus(harness.root(), "baking");
    let broken = harness.root().join("corpora").join("broken").join("corpus.db");
    std::fs::create_dir_all(broken.parent().unwrap()).unwrap();
    std::fs::write(&broken, b"garbage").unwrap();
    write_metadata(
        harness.root(),
        r#"{"_categories": ["Research"], "papers": {"display_name": "RAG Papers", "category": "Research"}}"#,
    );

    let cache = harness.cache();
    let built = cache.preload_all().await.unwrap();

    assert_eq!(built, 2);
    assert_eq!(cache.built_ids(), vec!["baking".to_string(), "papers".to_string()]);

    let papers = cache.get_or_build("papers").await.unwrap();
    assert_eq!(papers.display_name, "RAG Papers");
    assert_eq!(papers.category, "Research");

    let baking = cache.get_or_build("baking").await.unwrap();
    assert_eq!(baking.display_name, "baking");
    assert_eq!(baking.category, "Other");
}

use adaptive_rag::storage::{CorpusDatabase, CorpusRegistry, FileRegistry, CORPUS_DB_FILE};
use tempfile::TempDir;

#[test]
fn test_registry_and_store_on_disk() {
    let temp = TempDir::new().unwrap();
    let corpora_dir = temp.path().join("corpora");
    let metadata_file = temp.path().join("corpora.json");

    // Two corpora plus a directory without a store
    for (id, content) in [("papers", "RAG pairs retrieval with generation."), ("notes", "Meeting notes.")] {
        let db = CorpusDatabase::create(&corpora_dir.join(id).join(CORPUS_DB_FILE)).unwrap();
        db.insert_document(content, "source%20file.pdf", Some(2), &[0.5, 0.5])
            .unwrap();
    }
    std::fs::create_dir_all(corpora_dir.join("empty-dir")).unwrap();

    std::fs::write(
        &metadata_file,
        r#"{
            "_categories": ["Research", "Work"],
            "papers": {"display_name": "RAG Papers", "category": "Research"},
            "retired": {"display_name": "Gone"}
        }"#,
    )
    .unwrap();

    let registry = FileRegistry::new(corpora_dir.clone(), metadata_file);
    let corpora = registry.list().unwrap();

    let ids: Vec<&str> = corpora.iter().map(|c| c.id.as_str()).collect();
    assert_eq!(ids, vec!["notes", "papers"]);
    assert_eq!(corpora[0].display_name, "notes");
    assert_eq!(corpora[0].category, "Other");
    assert_eq!(corpora[1].display_name, "RAG Papers");

    assert!(registry.get("retired").unwrap().is_none());
    assert!(registry.store_path("../escape").is_err());

    let store = CorpusDatabase::open_read_only(&registry.store_path("papers").unwrap()).unwrap();
    assert_eq!(store.count().unwrap(), 1);

    let documents = store.load_documents().unwrap();
    assert_eq!(documents[0].source, "source%20file.pdf");
    assert_eq!(documents[0].page, Some(2));
    assert_eq!(documents[0].embedding, vec![0.5, 0.5]);

    let hydrated = store.get_documents(&[documents[0].id]).unwrap();
    assert_eq!(hydrated[0].content, "RAG pairs retrieval with generation.");
}

#[test]
fn test_read_only_open_rejects_foreign_database() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("other.db");
    let conn = rusqlite::Connection::open(&path).unwrap();
    conn.execute("CREATE TABLE unrelated (id INTEGER)", []).unwrap();
    drop(conn);

    assert!(CorpusDatabase::open_read_only(&path).is_err());
    assert!(CorpusDatabase::open_read_only(&temp.path().join("missing.db")).is_err());
}

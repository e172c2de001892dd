//! Storage layer
//!
//! Read access to prebuilt corpora: the per-corpus SQLite document store and
//! the registry that names them.

pub mod database;
pub mod registry;

pub use database::{CorpusDatabase, DbPool, DocumentRecord, StoredDocument};
pub use registry::{
    validate_corpus_id, CorpusInfo, CorpusRegistry, FileRegistry, CORPUS_DB_FILE,
    DEFAULT_CATEGORY,
};

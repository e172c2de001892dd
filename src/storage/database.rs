//! SQLite corpus store
//!
//! One `corpus.db` per corpus holds the chunked documents together with their
//! precomputed embeddings. The orchestrator opens it read-only; `create` and
//! `insert_document` exist for ingestion tooling and test fixtures.

use crate::error::{RagError, Result};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OpenFlags, Row};
use std::path::Path;

/// Database connection pool
pub type DbPool = Pool<SqliteConnectionManager>;

const MIGRATIONS: &[&str] = &["
    CREATE TABLE IF NOT EXISTS documents (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        content TEXT NOT NULL,
        source TEXT NOT NULL,
        page INTEGER,
        embedding BLOB NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_documents_source ON documents(source);
"];

/// A document row including its embedding
#[derive(Debug, Clone)]
pub struct StoredDocument {
    pub id: i64,
    pub content: String,
    pub source: String,
    /// Zero-based page number, when the loader recorded one
    pub page: Option<u32>,
    pub embedding: Vec<f32>,
}

/// A document row without its embedding, used to hydrate search hits
#[derive(Debug, Clone)]
pub struct DocumentRecord {
    pub id: i64,
    pub content: String,
    pub source: String,
    pub page: Option<u32>,
}

/// Connection pool over one corpus database
pub struct CorpusDatabase {
    pool: DbPool,
}

impl CorpusDatabase {
    /// Create (or migrate) a writable corpus database
    pub fn create(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| RagError::Io {
                source: e,
                context: format!("Failed to create corpus directory: {:?}", parent),
            })?;
        }

        let manager = SqliteConnectionManager::file(db_path);
        let pool = Pool::builder()
            .max_size(4)
            .build(manager)
            .map_err(|e| pool_error(e, "Failed to create connection pool"))?;

        let db = Self { pool };
        {
            let conn = db.get_conn()?;
            conn.execute_batch(
                "
                PRAGMA journal_mode = WAL;
                PRAGMA synchronous = NORMAL;
                PRAGMA busy_timeout = 5000;
                ",
            )?;
        }
        db.migrate()?;

        Ok(db)
    }

    /// Open an existing corpus database read-only
    pub fn open_read_only(db_path: &Path) -> Result<Self> {
        if !db_path.exists() {
            return Err(RagError::Io {
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such file"),
                context: format!("Corpus database not found: {}", db_path.display()),
            });
        }

        let manager = SqliteConnectionManager::file(db_path)
            .with_flags(OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX);

        let pool = Pool::builder()
            .max_size(8)
            .build(manager)
            .map_err(|e| pool_error(e, "Failed to open corpus database"))?;

        let db = Self { pool };

        // A file without the documents table is not a corpus
        let conn = db.get_conn()?;
        let tables: i64 = conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'documents'",
            [],
            |row| row.get(0),
        )?;
        if tables == 0 {
            return Err(RagError::Server(format!(
                "{} has no documents table",
                db_path.display()
            )));
        }
        drop(conn);

        Ok(db)
    }

    /// Get a connection from the pool
    pub fn get_conn(&self) -> Result<r2d2::PooledConnection<SqliteConnectionManager>> {
        self.pool
            .get()
            .map_err(|e| pool_error(e, "Failed to get connection"))
    }

    fn migrate(&self) -> Result<()> {
        let conn = self.get_conn()?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS _migrations (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL
            )",
            [],
        )?;

        let current_version: i32 = conn
            .query_row(
                "SELECT COALESCE(MAX(version), 0) FROM _migrations",
                [],
                |row| row.get(0),
            )
            .unwrap_or(0);

        for (version, migration) in MIGRATIONS.iter().enumerate() {
            let version = version as i32 + 1;

            if version > current_version {
                tracing::info!("Applying corpus migration {}", version);
                conn.execute_batch(migration)?;
                conn.execute(
                    "INSERT INTO _migrations (version, applied_at) VALUES (?1, datetime('now'))",
                    params![version],
                )?;
            }
        }

        Ok(())
    }

    /// Insert one chunk with its precomputed embedding
    pub fn insert_document(
        &self,
        content: &str,
        source: &str,
        page: Option<u32>,
        embedding: &[f32],
    ) -> Result<i64> {
        let conn = self.get_conn()?;
        conn.execute(
            "INSERT INTO documents (content, source, page, embedding) VALUES (?1, ?2, ?3, ?4)",
            params![content, source, page, embedding_to_blob(embedding)],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Load every document with its embedding, ordered by id
    pub fn load_documents(&self) -> Result<Vec<StoredDocument>> {
        let conn = self.get_conn()?;
        let mut stmt = conn
            .prepare("SELECT id, content, source, page, embedding FROM documents ORDER BY id")?;

        let rows = stmt.query_map([], |row| {
            let blob: Vec<u8> = row.get(4)?;
            Ok((read_record(row)?, blob))
        })?;

        let mut documents = Vec::new();
        for row in rows {
            let (record, blob) = row?;
            let embedding = blob_to_embedding(&blob).ok_or_else(|| {
                RagError::Server(format!(
                    "Document {} has a malformed embedding ({} bytes)",
                    record.id,
                    blob.len()
                ))
            })?;
            documents.push(StoredDocument {
                id: record.id,
                content: record.content,
                source: record.source,
                page: record.page,
                embedding,
            });
        }

        Ok(documents)
    }

    /// Fetch documents by id, preserving the order of `ids`
    pub fn get_documents(&self, ids: &[i64]) -> Result<Vec<DocumentRecord>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let conn = self.get_conn()?;
        let mut stmt =
            conn.prepare_cached("SELECT id, content, source, page FROM documents WHERE id = ?1")?;

        let mut records = Vec::with_capacity(ids.len());
        for id in ids {
            match stmt.query_row(params![id], read_record) {
                Ok(record) => records.push(record),
                Err(rusqlite::Error::QueryReturnedNoRows) => {
                    tracing::warn!("Document {} vanished from corpus store", id);
                }
                Err(e) => return Err(e.into()),
            }
        }

        Ok(records)
    }

    /// Number of stored documents
    pub fn count(&self) -> Result<usize> {
        let conn = self.get_conn()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM documents", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

fn read_record(row: &Row<'_>) -> rusqlite::Result<DocumentRecord> {
    Ok(DocumentRecord {
        id: row.get(0)?,
        content: row.get(1)?,
        source: row.get(2)?,
        page: row.get(3)?,
    })
}

fn pool_error(e: r2d2::Error, context: &str) -> RagError {
    RagError::Other(anyhow::Error::new(e).context(context.to_string()))
}

/// Little-endian f32 encoding used for the embedding column
pub fn embedding_to_blob(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|v| v.to_le_bytes()).collect()
}

/// Decode an embedding column; `None` when the length is not a multiple of 4
pub fn blob_to_embedding(blob: &[u8]) -> Option<Vec<f32>> {
    if blob.len() % 4 != 0 {
        return None;
    }
    Some(
        blob.chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect(),
    )
}

//! Corpus registry
//!
//! A corpus exists when `<corpora_dir>/<id>/corpus.db` exists. Display names and
//! categories come from a flat JSON metadata file maintained by external tooling;
//! ids without a record fall back to the id itself and the default category.

use crate::error::{RagError, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// Category assigned to corpora without a metadata record
pub const DEFAULT_CATEGORY: &str = "Other";

/// File name of the document store inside a corpus directory
pub const CORPUS_DB_FILE: &str = "corpus.db";

/// Listing entry for one corpus
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorpusInfo {
    pub id: String,
    pub display_name: String,
    pub category: String,
}

/// Source of corpus identities and their display metadata
pub trait CorpusRegistry: Send + Sync {
    /// All corpora currently on disk, sorted by id
    fn list(&self) -> Result<Vec<CorpusInfo>>;

    /// Location of the document store for `id`
    fn store_path(&self, id: &str) -> Result<PathBuf>;

    fn get(&self, id: &str) -> Result<Option<CorpusInfo>> {
        Ok(self.list()?.into_iter().find(|info| info.id == id))
    }
}

#[derive(Debug, Default, Deserialize)]
struct MetadataRecord {
    display_name: Option<String>,
    category: Option<String>,
}

/// Registry over a corpora directory plus a JSON metadata file
pub struct FileRegistry {
    corpora_dir: PathBuf,
    metadata_file: PathBuf,
}

impl FileRegistry {
    pub fn new(corpora_dir: PathBuf, metadata_file: PathBuf) -> Self {
        Self {
            corpora_dir,
            metadata_file,
        }
    }

    pub fn corpora_dir(&self) -> &Path {
        &self.corpora_dir
    }

    fn load_metadata(&self) -> BTreeMap<String, MetadataRecord> {
        let content = match std::fs::read_to_string(&self.metadata_file) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return BTreeMap::new(),
            Err(e) => {
                tracing::warn!(
                    "Cannot read corpus metadata {}: {}",
                    self.metadata_file.display(),
                    e
                );
                return BTreeMap::new();
            }
        };

        let raw: serde_json::Map<String, serde_json::Value> = match serde_json::from_str(&content)
        {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(
                    "Ignoring malformed corpus metadata {}: {}",
                    self.metadata_file.display(),
                    e
                );
                return BTreeMap::new();
            }
        };

        // Keys starting with '_' hold bookkeeping such as the category list
        raw.into_iter()
            .filter(|(key, _)| !key.starts_with('_'))
            .filter_map(|(key, value)| {
                serde_json::from_value::<MetadataRecord>(value)
                    .ok()
                    .map(|record| (key, record))
            })
            .collect()
    }
}

impl CorpusRegistry for FileRegistry {
    fn list(&self) -> Result<Vec<CorpusInfo>> {
        if !self.corpora_dir.exists() {
            return Ok(Vec::new());
        }

        let entries = std::fs::read_dir(&self.corpora_dir).map_err(|e| RagError::Io {
            source: e,
            context: format!(
                "Failed to read corpora directory: {}",
                self.corpora_dir.display()
            ),
        })?;

        let mut metadata = self.load_metadata();
        let mut corpora = Vec::new();

        for entry in entries {
            let entry = entry.map_err(|e| RagError::Io {
                source: e,
                context: "Failed to read corpora directory entry".to_string(),
            })?;
            let path = entry.path();
            if !path.join(CORPUS_DB_FILE).is_file() {
                continue;
            }

            let Some(id) = path.file_name().and_then(|n| n.to_str()).map(str::to_string) else {
                continue;
            };
            if validate_corpus_id(&id).is_err() {
                tracing::debug!("Skipping corpus directory with invalid id: {:?}", path);
                continue;
            }

            let record = metadata.remove(&id).unwrap_or_default();
            corpora.push(CorpusInfo {
                display_name: record.display_name.unwrap_or_else(|| id.clone()),
                category: record
                    .category
                    .unwrap_or_else(|| DEFAULT_CATEGORY.to_string()),
                id,
            });
        }

        corpora.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(corpora)
    }

    fn store_path(&self, id: &str) -> Result<PathBuf> {
        validate_corpus_id(id)?;
        Ok(self.corpora_dir.join(id).join(CORPUS_DB_FILE))
    }
}

/// Reject ids that could escape the corpora directory
pub fn validate_corpus_id(id: &str) -> Result<()> {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let pattern = PATTERN.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9_\-\.]{1,128}$").expect("corpus id pattern is valid")
    });

    if pattern.is_match(id) && !id.starts_with('.') {
        Ok(())
    } else {
        Err(RagError::CorpusNotFound { id: id.to_string() })
    }
}

//! Configuration management
//!
//! Loads the TOML configuration, applies `ARAG_SECTION__KEY` environment
//! overrides and named profiles, then validates the result.

use crate::error::{RagError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

mod validator;

pub use validator::ConfigValidator;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(rename = "_meta")]
    pub meta: MetaConfig,
    pub storage: StorageConfig,
    pub server: ServerConfig,
    pub embedding: EmbeddingConfig,
    pub generation: GenerationConfig,
    pub web_search: WebSearchConfig,
    pub retrieval: RetrievalConfig,
    pub graph: GraphConfig,
    pub progress: ProgressConfig,
    pub history: HistoryConfig,
    pub grading: GradingConfig,
    #[serde(default)]
    pub prompts: PromptsConfig,
    #[serde(default)]
    pub profiles: HashMap<String, ProfileOverrides>,
}

/// Metadata about the configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaConfig {
    pub schema_version: String,
    #[serde(default = "current_timestamp")]
    pub created_at: String,
    #[serde(default = "current_timestamp")]
    pub last_modified: String,
}

fn current_timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Where corpora and their metadata live
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root directory; corpora are read from `<data_dir>/corpora/<id>/`
    pub data_dir: PathBuf,
    /// Flat JSON metadata records (display names, categories)
    pub registry_file: PathBuf,
}

impl StorageConfig {
    pub fn corpora_dir(&self) -> PathBuf {
        expand_tilde(&self.data_dir).join("corpora")
    }
}

/// Socket server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub socket_path: PathBuf,
    pub max_connections: usize,
    /// Build every registered corpus before accepting connections
    pub preload: bool,
}

/// Embedding service settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// "fastembed" (local) or "openai" (HTTP)
    pub provider: String,
    pub model: String,
    pub dimension: usize,
    pub api_base: String,
    pub api_key_env: String,
    pub timeout: String,
}

/// Text-generation service settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    pub provider: String,
    pub model: String,
    pub api_base: String,
    pub api_key_env: String,
    pub temperature: f32,
    pub timeout: String,
}

/// Web search fallback settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebSearchConfig {
    pub enabled: bool,
    pub provider: String,
    pub api_base: String,
    pub api_key_env: String,
    pub max_results: usize,
    pub timeout: String,
}

/// Hybrid retrieval settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Results taken from the lexical retriever
    pub lexical_k: usize,
    /// Results taken from the dense retriever
    pub dense_k: usize,
    /// Results returned after fusion
    pub top_k: usize,
    pub keyword_weight: f32,
    pub semantic_weight: f32,
    /// RRF rank constant
    pub rrf_k: f32,
    /// Dense hits below this cosine similarity are discarded
    pub min_dense_similarity: f32,
    /// Per-corpus memo of retrieval results for repeated questions
    pub memo_capacity: usize,
    pub hnsw_m: usize,
    pub hnsw_ef_construction: usize,
    pub hnsw_ef_search: usize,
}

/// Orchestration graph limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphConfig {
    pub max_steps: usize,
    pub execution_timeout: String,
}

impl GraphConfig {
    pub fn execution_timeout(&self) -> Duration {
        parse_duration(&self.execution_timeout).unwrap_or(Duration::from_secs(120))
    }
}

/// Progress streaming settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressConfig {
    pub poll_interval: String,
    pub max_empty_polls: u32,
    pub channel_capacity: usize,
}

impl ProgressConfig {
    pub fn poll_interval(&self) -> Duration {
        parse_duration(&self.poll_interval).unwrap_or(Duration::from_secs(1))
    }
}

/// Conversation history settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    /// Messages kept per session (user and assistant turns both count)
    pub max_messages: usize,
}

/// Grading chain settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GradingConfig {
    /// Run groundedness and answer grading after each execution
    pub audit_answers: bool,
    /// "corpus_first" or "classifier"
    pub routing_policy: String,
}

/// Prompt template locations; the built-in template is used when unset
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PromptsConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rag_template: Option<PathBuf>,
}

/// Profile-specific configuration overrides
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding_provider: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generation_model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub web_search_enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audit_answers: Option<bool>,
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(RagError::ConfigNotFound {
                path: path.to_path_buf(),
            });
        }

        let content = std::fs::read_to_string(path).map_err(|e| RagError::Io {
            source: e,
            context: format!("Failed to read config file: {:?}", path),
        })?;
        let mut config: Config = toml::from_str(&content)?;

        config.apply_env_overrides();

        ConfigValidator::validate(&config)?;

        Ok(config)
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|e| RagError::Io {
            source: e,
            context: format!("Failed to write config file: {:?}", path),
        })?;
        Ok(())
    }

    /// Load configuration with a specific profile applied
    pub fn load_with_profile(path: &Path, profile: &str) -> Result<Self> {
        let mut config = Self::load(path)?;
        config.apply_profile(profile)?;
        ConfigValidator::validate(&config)?;
        Ok(config)
    }

    /// Apply a profile's overrides to the configuration
    pub fn apply_profile(&mut self, profile: &str) -> Result<()> {
        let overrides = self
            .profiles
            .get(profile)
            .cloned()
            .ok_or_else(|| RagError::Config(format!("Unknown profile: {}", profile)))?;

        if let Some(provider) = overrides.embedding_provider {
            self.embedding.provider = provider;
        }
        if let Some(model) = overrides.generation_model {
            self.generation.model = model;
        }
        if let Some(enabled) = overrides.web_search_enabled {
            self.web_search.enabled = enabled;
        }
        if let Some(audit) = overrides.audit_answers {
            self.grading.audit_answers = audit;
        }
        Ok(())
    }

    /// Apply environment variable overrides
    /// Environment variables in format: ARAG_SECTION__KEY=value
    pub fn apply_env_overrides(&mut self) {
        for (key, value) in std::env::vars() {
            if let Some(config_key) = key.strip_prefix("ARAG_") {
                if let Err(e) = self.set_value_from_env(config_key, &value) {
                    tracing::warn!("Failed to apply env override {}: {}", key, e);
                }
            }
        }
    }

    fn set_value_from_env(&mut self, path: &str, value: &str) -> Result<()> {
        match path {
            "STORAGE__DATA_DIR" => {
                self.storage.data_dir = PathBuf::from(value);
            }
            "SERVER__SOCKET_PATH" => {
                self.server.socket_path = PathBuf::from(value);
            }
            "EMBEDDING__PROVIDER" => {
                self.embedding.provider = value.to_string();
            }
            "EMBEDDING__MODEL" => {
                self.embedding.model = value.to_string();
            }
            "GENERATION__MODEL" => {
                self.generation.model = value.to_string();
            }
            "GENERATION__API_BASE" => {
                self.generation.api_base = value.to_string();
            }
            "WEB_SEARCH__ENABLED" => {
                self.web_search.enabled = parse_bool(path, value)?;
            }
            "GRADING__AUDIT_ANSWERS" => {
                self.grading.audit_answers = parse_bool(path, value)?;
            }
            _ => {
                tracing::debug!("Unknown env config key: {}", path);
            }
        }
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| RagError::Config("Cannot determine config directory".to_string()))?;

        Ok(config_dir.join("adaptive-rag").join("config.toml"))
    }
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = PathBuf::from("~/.adaptive-rag");

        Self {
            meta: MetaConfig {
                schema_version: "1.0.0".to_string(),
                created_at: current_timestamp(),
                last_modified: current_timestamp(),
            },
            storage: StorageConfig {
                data_dir: data_dir.clone(),
                registry_file: data_dir.join("corpora.json"),
            },
            server: ServerConfig {
                socket_path: data_dir.join("arag.sock"),
                max_connections: 64,
                preload: true,
            },
            embedding: EmbeddingConfig {
                provider: "openai".to_string(),
                model: "text-embedding-3-small".to_string(),
                dimension: 1536,
                api_base: "https://api.openai.com/v1".to_string(),
                api_key_env: "OPENAI_API_KEY".to_string(),
                timeout: "30s".to_string(),
            },
            generation: GenerationConfig {
                provider: "openai".to_string(),
                model: "gpt-4o".to_string(),
                api_base: "https://api.openai.com/v1".to_string(),
                api_key_env: "OPENAI_API_KEY".to_string(),
                temperature: 0.0,
                timeout: "60s".to_string(),
            },
            web_search: WebSearchConfig {
                enabled: true,
                provider: "tavily".to_string(),
                api_base: "https://api.tavily.com".to_string(),
                api_key_env: "TAVILY_API_KEY".to_string(),
                max_results: 3,
                timeout: "20s".to_string(),
            },
            retrieval: RetrievalConfig {
                lexical_k: 3,
                dense_k: 10,
                top_k: 5,
                keyword_weight: 0.7,
                semantic_weight: 0.3,
                rrf_k: 60.0,
                min_dense_similarity: 0.3,
                memo_capacity: 128,
                hnsw_m: 16,
                hnsw_ef_construction: 200,
                hnsw_ef_search: 50,
            },
            graph: GraphConfig {
                max_steps: 30,
                execution_timeout: "120s".to_string(),
            },
            progress: ProgressConfig {
                poll_interval: "1s".to_string(),
                max_empty_polls: 60,
                channel_capacity: 32,
            },
            history: HistoryConfig { max_messages: 20 },
            grading: GradingConfig {
                audit_answers: false,
                routing_policy: "corpus_first".to_string(),
            },
            prompts: PromptsConfig::default(),
            profiles: HashMap::new(),
        }
    }
}

fn parse_bool(path: &str, value: &str) -> Result<bool> {
    value.parse().map_err(|_| RagError::InvalidConfigValue {
        path: path.to_string(),
        message: format!("Cannot parse '{}' as boolean", value),
    })
}

/// Parse a duration string such as "250ms", "5s", "2m" or "1h".
/// A bare number is read as seconds.
pub fn parse_duration(value: &str) -> Option<Duration> {
    let value = value.trim();

    // "ms" before "s" because "ms" ends with "s"
    if let Some(ms) = value.strip_suffix("ms") {
        ms.trim().parse().ok().map(Duration::from_millis)
    } else if let Some(secs) = value.strip_suffix('s') {
        secs.trim().parse().ok().map(Duration::from_secs)
    } else if let Some(mins) = value.strip_suffix('m') {
        mins.trim().parse::<u64>().ok().map(|m| Duration::from_secs(m * 60))
    } else if let Some(hours) = value.strip_suffix('h') {
        hours
            .trim()
            .parse::<u64>()
            .ok()
            .map(|h| Duration::from_secs(h * 3600))
    } else {
        value.parse().ok().map(Duration::from_secs)
    }
}

/// Expand a leading `~` to the home directory
pub fn expand_tilde(path: &Path) -> PathBuf {
    if let Ok(stripped) = path.strip_prefix("~") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    path.to_path_buf()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("5s"), Some(Duration::from_secs(5)));
        assert_eq!(parse_duration("250ms"), Some(Duration::from_millis(250)));
        assert_eq!(parse_duration("2m"), Some(Duration::from_secs(120)));
        assert_eq!(parse_duration("1h"), Some(Duration::from_secs(3600)));
        assert_eq!(parse_duration("7"), Some(Duration::from_secs(7)));
        assert_eq!(parse_duration("soon"), None);
    }

    #[test]
    fn test_expand_tilde() {
        let home = dirs::home_dir().unwrap();
        assert_eq!(
            expand_tilde(Path::new("~/.adaptive-rag")),
            home.join(".adaptive-rag")
        );
        assert_eq!(expand_tilde(Path::new("/tmp/rag")), PathBuf::from("/tmp/rag"));
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");

        let mut config = Config::default();
        config.retrieval.top_k = 7;
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.retrieval.top_k, 7);
        assert_eq!(loaded.graph.max_steps, 30);
    }

    #[test]
    fn test_apply_profile() {
        let mut config = Config::default();
        config.profiles.insert(
            "offline".to_string(),
            ProfileOverrides {
                embedding_provider: Some("fastembed".to_string()),
                generation_model: None,
                web_search_enabled: Some(false),
                audit_answers: Some(true),
            },
        );

        config.apply_profile("offline").unwrap();
        assert_eq!(config.embedding.provider, "fastembed");
        assert!(!config.web_search.enabled);
        assert!(config.grading.audit_answers);

        assert!(config.apply_profile("missing").is_err());
    }

    #[test]
    fn test_missing_config_file() {
        let temp = TempDir::new().unwrap();
        let err = Config::load(&temp.path().join("nope.toml")).unwrap_err();
        assert!(matches!(err, RagError::ConfigNotFound { .. }));
    }
}

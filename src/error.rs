use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the orchestrator
#[derive(Error, Debug)]
pub enum RagError {
    /// Configuration related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration validation errors
    #[error("Configuration validation failed: {errors:?}")]
    ConfigValidation { errors: Vec<ValidationError> },

    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: PathBuf },

    /// Invalid configuration value
    #[error("Invalid configuration value at {path}: {message}")]
    InvalidConfigValue { path: String, message: String },

    /// The registry has no corpus with this id
    #[error("Corpus not found: {id}")]
    CorpusNotFound { id: String },

    /// The corpus exists but its on-disk index is missing or corrupt
    #[error("Corpus '{id}' is unavailable: {reason}")]
    CorpusUnavailable { id: String, reason: String },

    /// Hybrid retrieval failed after the corpus was built
    #[error("Retrieval failed: {0}")]
    RetrievalFailure(String),

    /// Web search fallback failed
    #[error("Web search failed: {0}")]
    WebSearch(String),

    /// The external text-generation service failed
    #[error("Generation service error: {0}")]
    GenerationService(String),

    /// A grader produced output that cannot be interpreted
    #[error("Grading service error: {0}")]
    GradingService(String),

    /// Execution visited more nodes than allowed
    #[error("Step limit exceeded: more than {limit} steps in one execution")]
    StepLimitExceeded { limit: usize },

    /// Execution ran past its wall-clock budget
    #[error("Execution {execution_id} timed out after {seconds}s")]
    ExecutionTimeout { execution_id: String, seconds: u64 },

    /// No progress channel for this execution (benign)
    #[error("No progress channel for execution {id}")]
    ChannelNotFound { id: String },

    /// Session related errors
    #[error("Session not found: {id}")]
    SessionNotFound { id: String },

    /// IO errors
    #[error("IO error: {context}: {source}")]
    Io {
        source: std::io::Error,
        context: String,
    },

    /// TOML deserialization errors
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// TOML serialization errors
    #[error("TOML serialization error: {0}")]
    TomlSerialization(#[from] toml::ser::Error),

    /// JSON errors
    #[error("JSON error: {context}: {source}")]
    Json {
        source: serde_json::Error,
        context: String,
    },

    /// Database errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Server errors
    #[error("Server error: {0}")]
    Server(String),

    /// Server not running
    #[error("Server is not running")]
    ServerNotRunning,

    /// Generic errors
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl RagError {
    /// Stable status flag reported to callers alongside the message
    pub fn status(&self) -> &'static str {
        match self {
            RagError::Config(_)
            | RagError::ConfigValidation { .. }
            | RagError::ConfigNotFound { .. }
            | RagError::InvalidConfigValue { .. }
            | RagError::Toml(_)
            | RagError::TomlSerialization(_) => "config_error",
            RagError::CorpusNotFound { .. } => "corpus_not_found",
            RagError::CorpusUnavailable { .. } => "corpus_unavailable",
            RagError::RetrievalFailure(_) => "retrieval_failure",
            RagError::WebSearch(_) => "web_search_failure",
            RagError::GenerationService(_) => "generation_service_error",
            RagError::GradingService(_) => "grading_service_error",
            RagError::StepLimitExceeded { .. } => "step_limit_exceeded",
            RagError::ExecutionTimeout { .. } => "execution_timeout",
            RagError::ChannelNotFound { .. } => "channel_not_found",
            RagError::SessionNotFound { .. } => "session_not_found",
            RagError::ServerNotRunning | RagError::Server(_) => "server_error",
            RagError::Io { .. }
            | RagError::Json { .. }
            | RagError::Database(_)
            | RagError::Other(_) => "error",
        }
    }
}

/// Configuration validation error
#[derive(Debug, Clone)]
pub struct ValidationError {
    /// Path to the configuration key that failed validation
    pub path: String,
    /// Error message describing the validation failure
    pub message: String,
}

impl ValidationError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Result type for orchestrator operations
pub type Result<T> = std::result::Result<T, RagError>;

use crate::config::{parse_duration, Config};
use crate::error::{RagError, Result, ValidationError};

/// Configuration validator
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate the configuration, collecting every failure
    pub fn validate(config: &Config) -> Result<()> {
        let mut errors = Vec::new();

        Self::validate_schema_version(config, &mut errors);
        Self::validate_storage(config, &mut errors);
        Self::validate_server(config, &mut errors);
        Self::validate_embedding(config, &mut errors);
        Self::validate_generation(config, &mut errors);
        Self::validate_web_search(config, &mut errors);
        Self::validate_retrieval(config, &mut errors);
        Self::validate_graph(config, &mut errors);
        Self::validate_progress(config, &mut errors);
        Self::validate_grading(config, &mut errors);

        if config.history.max_messages == 0 {
            errors.push(ValidationError::new(
                "history.max_messages",
                "History must keep at least one message",
            ));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(RagError::ConfigValidation { errors })
        }
    }

    fn validate_schema_version(config: &Config, errors: &mut Vec<ValidationError>) {
        let version = &config.meta.schema_version;
        if version != "1.0.0" {
            errors.push(ValidationError::new(
                "_meta.schema_version",
                format!("Unsupported schema version: {}", version),
            ));
        }
    }

    fn validate_storage(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.storage.data_dir.as_os_str().is_empty() {
            errors.push(ValidationError::new(
                "storage.data_dir",
                "Data directory cannot be empty",
            ));
        }

        if config.storage.registry_file.as_os_str().is_empty() {
            errors.push(ValidationError::new(
                "storage.registry_file",
                "Registry file path cannot be empty",
            ));
        }
    }

    fn validate_server(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.server.socket_path.as_os_str().is_empty() {
            errors.push(ValidationError::new(
                "server.socket_path",
                "Socket path cannot be empty",
            ));
        }

        if config.server.max_connections == 0 {
            errors.push(ValidationError::new(
                "server.max_connections",
                "Max connections must be greater than 0",
            ));
        }
    }

    fn validate_embedding(config: &Config, errors: &mut Vec<ValidationError>) {
        let provider = &config.embedding.provider;
        if provider != "fastembed" && provider != "openai" {
            errors.push(ValidationError::new(
                "embedding.provider",
                format!("Provider must be 'fastembed' or 'openai', got '{}'", provider),
            ));
        }

        if config.embedding.model.is_empty() {
            errors.push(ValidationError::new(
                "embedding.model",
                "Model name cannot be empty",
            ));
        }

        if config.embedding.dimension == 0 {
            errors.push(ValidationError::new(
                "embedding.dimension",
                "Embedding dimension must be greater than 0",
            ));
        }

        Self::check_duration("embedding.timeout", &config.embedding.timeout, errors);
    }

    fn validate_generation(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.generation.provider != "openai" {
            errors.push(ValidationError::new(
                "generation.provider",
                format!(
                    "Provider must be 'openai' (any OpenAI-compatible endpoint), got '{}'",
                    config.generation.provider
                ),
            ));
        }

        if config.generation.model.is_empty() {
            errors.push(ValidationError::new(
                "generation.model",
                "Model name cannot be empty",
            ));
        }

        let temp = config.generation.temperature;
        if !(0.0..=2.0).contains(&temp) {
            errors.push(ValidationError::new(
                "generation.temperature",
                format!("Temperature must be between 0.0 and 2.0, got {}", temp),
            ));
        }

        Self::check_duration("generation.timeout", &config.generation.timeout, errors);
    }

    fn validate_web_search(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.web_search.provider != "tavily" {
            errors.push(ValidationError::new(
                "web_search.provider",
                format!(
                    "Provider must be 'tavily', got '{}'",
                    config.web_search.provider
                ),
            ));
        }

        if config.web_search.enabled && config.web_search.max_results == 0 {
            errors.push(ValidationError::new(
                "web_search.max_results",
                "Max results must be greater than 0 when web search is enabled",
            ));
        }

        Self::check_duration("web_search.timeout", &config.web_search.timeout, errors);
    }

    fn validate_retrieval(config: &Config, errors: &mut Vec<ValidationError>) {
        let retrieval = &config.retrieval;

        for (path, value) in [
            ("retrieval.lexical_k", retrieval.lexical_k),
            ("retrieval.dense_k", retrieval.dense_k),
            ("retrieval.top_k", retrieval.top_k),
            ("retrieval.memo_capacity", retrieval.memo_capacity),
            ("retrieval.hnsw_m", retrieval.hnsw_m),
            ("retrieval.hnsw_ef_construction", retrieval.hnsw_ef_construction),
            ("retrieval.hnsw_ef_search", retrieval.hnsw_ef_search),
        ] {
            if value == 0 {
                errors.push(ValidationError::new(path, "Value must be greater than 0"));
            }
        }

        if retrieval.keyword_weight <= 0.0 || retrieval.semantic_weight <= 0.0 {
            errors.push(ValidationError::new(
                "retrieval.keyword_weight",
                "Fusion weights must be positive",
            ));
        }

        if retrieval.rrf_k < 0.0 {
            errors.push(ValidationError::new(
                "retrieval.rrf_k",
                "RRF constant cannot be negative",
            ));
        }

        if !(-1.0..=1.0).contains(&retrieval.min_dense_similarity) {
            errors.push(ValidationError::new(
                "retrieval.min_dense_similarity",
                "Similarity threshold must be between -1.0 and 1.0",
            ));
        }
    }

    fn validate_graph(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.graph.max_steps == 0 {
            errors.push(ValidationError::new(
                "graph.max_steps",
                "Step limit must be greater than 0",
            ));
        }

        Self::check_duration(
            "graph.execution_timeout",
            &config.graph.execution_timeout,
            errors,
        );
    }

    fn validate_progress(config: &Config, errors: &mut Vec<ValidationError>) {
        Self::check_duration("progress.poll_interval", &config.progress.poll_interval, errors);

        if config.progress.max_empty_polls == 0 {
            errors.push(ValidationError::new(
                "progress.max_empty_polls",
                "Max empty polls must be greater than 0",
            ));
        }

        if config.progress.channel_capacity == 0 {
            errors.push(ValidationError::new(
                "progress.channel_capacity",
                "Channel capacity must be greater than 0",
            ));
        }
    }

    fn validate_grading(config: &Config, errors: &mut Vec<ValidationError>) {
        let policy = &config.grading.routing_policy;
        if policy != "corpus_first" && policy != "classifier" {
            errors.push(ValidationError::new(
                "grading.routing_policy",
                format!(
                    "Routing policy must be 'corpus_first' or 'classifier', got '{}'",
                    policy
                ),
            ));
        }
    }

    fn check_duration(path: &str, value: &str, errors: &mut Vec<ValidationError>) {
        match parse_duration(value) {
            Some(d) if !d.is_zero() => {}
            _ => errors.push(ValidationError::new(
                path,
                format!("Invalid duration format: {}", value),
            )),
        }
    }
}

//! Daemon configuration parsing and validation.
//!
//! Configuration is a TOML file with one section per concern. Policy
//! sections (`[matcher]`, `[resolver]`) deserialize directly into the core
//! crate's config structs so the file is the single source of the
//! thresholds. Validation is fail-closed: a section that names a token
//! environment variable which is not set, or thresholds that cannot work,
//! refuse to start the daemon rather than degrade silently.

use std::path::{Path, PathBuf};

use idgate_core::matcher::MatcherConfig;
use idgate_core::profile::ResolverConfig;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};

/// Hard ceiling on configurable top-K values.
const TOP_K_CEILING: usize = 1000;

/// Top-level daemon configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct GatewayConfig {
    /// Daemon settings.
    #[serde(default)]
    pub daemon: DaemonSection,

    /// Credential matcher policy.
    #[serde(default)]
    pub matcher: MatcherConfig,

    /// Access profile resolver policy.
    #[serde(default)]
    pub resolver: ResolverConfig,

    /// Retrieval gateway settings.
    #[serde(default)]
    pub retrieval: RetrievalSection,

    /// Embedding provider settings.
    #[serde(default)]
    pub embedding: EmbeddingSection,

    /// Vector search service settings.
    #[serde(default)]
    pub vector: VectorSection,
}

impl GatewayConfig {
    /// Loads and validates configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed, or validated.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::Io)?;
        Self::from_toml(&content)
    }

    /// Parses and validates configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid or validation fails.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    /// Validates cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] on any violation.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.embedding.endpoint.is_empty() {
            return Err(ConfigError::Validation(
                "[embedding] endpoint must not be empty".to_string(),
            ));
        }
        if self.embedding.dimension == 0 {
            return Err(ConfigError::Validation(
                "[embedding] dimension must be positive".to_string(),
            ));
        }
        if self.vector.endpoint.is_empty() {
            return Err(ConfigError::Validation(
                "[vector] endpoint must not be empty".to_string(),
            ));
        }
        if self.retrieval.default_top_k == 0
            || self.retrieval.default_top_k > self.retrieval.max_top_k
        {
            return Err(ConfigError::Validation(format!(
                "[retrieval] default_top_k ({}) must be in 1..=max_top_k ({})",
                self.retrieval.default_top_k, self.retrieval.max_top_k
            )));
        }
        if self.retrieval.max_top_k > TOP_K_CEILING {
            return Err(ConfigError::Validation(format!(
                "[retrieval] max_top_k ({}) exceeds ceiling ({TOP_K_CEILING})",
                self.retrieval.max_top_k
            )));
        }
        if self.retrieval.private_marker.trim().is_empty() {
            return Err(ConfigError::Validation(
                "[retrieval] private_marker must not be blank".to_string(),
            ));
        }
        if self.matcher.min_fields == 0 {
            return Err(ConfigError::Validation(
                "[matcher] min_fields must be at least 1".to_string(),
            ));
        }
        if self.daemon.sweep_interval_secs == 0 {
            return Err(ConfigError::Validation(
                "[daemon] sweep_interval_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// `[daemon]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DaemonSection {
    /// HTTP listen address.
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Path to the `SQLite` database file.
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// Seconds between reconciliation sweep passes.
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,

    /// Age in seconds a partial claim must reach before the sweep
    /// releases it.
    #[serde(default = "default_sweep_grace")]
    pub sweep_grace_secs: u64,
}

fn default_listen() -> String {
    "127.0.0.1:8471".to_string()
}

fn default_db_path() -> PathBuf {
    PathBuf::from("idgate.db")
}

const fn default_sweep_interval() -> u64 {
    300
}

const fn default_sweep_grace() -> u64 {
    600
}

impl Default for DaemonSection {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            db_path: default_db_path(),
            sweep_interval_secs: default_sweep_interval(),
            sweep_grace_secs: default_sweep_grace(),
        }
    }
}

/// `[retrieval]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetrievalSection {
    /// Namespace of the shared index, if the service distinguishes one.
    #[serde(default)]
    pub shared_namespace: Option<String>,

    /// Query prefix routing to the caller's personal namespace.
    #[serde(default = "default_private_marker")]
    pub private_marker: String,

    /// Result count when the request does not specify one.
    #[serde(default = "default_top_k")]
    pub default_top_k: usize,

    /// Hard ceiling on the result count.
    #[serde(default = "default_max_top_k")]
    pub max_top_k: usize,
}

fn default_private_marker() -> String {
    idgate_core::scope::DEFAULT_PRIVATE_MARKER.to_string()
}

const fn default_top_k() -> usize {
    5
}

const fn default_max_top_k() -> usize {
    50
}

impl Default for RetrievalSection {
    fn default() -> Self {
        Self {
            shared_namespace: None,
            private_marker: default_private_marker(),
            default_top_k: default_top_k(),
            max_top_k: default_max_top_k(),
        }
    }
}

/// `[embedding]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EmbeddingSection {
    /// Full endpoint URL.
    #[serde(default = "default_embedding_endpoint")]
    pub endpoint: String,

    /// Model identifier.
    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Expected vector dimension.
    #[serde(default = "default_embedding_dimension")]
    pub dimension: usize,

    /// Environment variable holding the bearer token, if required.
    ///
    /// Referencing an unset variable is a startup error: a gateway that
    /// cannot authenticate must not come up looking healthy.
    #[serde(default)]
    pub token_env: Option<String>,
}

fn default_embedding_endpoint() -> String {
    "https://api.openai.com/v1/embeddings".to_string()
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}

const fn default_embedding_dimension() -> usize {
    1536
}

impl Default for EmbeddingSection {
    fn default() -> Self {
        Self {
            endpoint: default_embedding_endpoint(),
            model: default_embedding_model(),
            dimension: default_embedding_dimension(),
            token_env: None,
        }
    }
}

/// `[vector]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VectorSection {
    /// Full query endpoint URL.
    #[serde(default = "default_vector_endpoint")]
    pub endpoint: String,

    /// Environment variable holding the bearer token, if required.
    #[serde(default)]
    pub token_env: Option<String>,
}

fn default_vector_endpoint() -> String {
    "http://127.0.0.1:6333/query".to_string()
}

impl Default for VectorSection {
    fn default() -> Self {
        Self { endpoint: default_vector_endpoint(), token_env: None }
    }
}

/// Resolves a `token_env` reference into the secret it names.
///
/// # Errors
///
/// Returns [`ConfigError::MissingToken`] when the variable is unset or
/// empty.
pub fn resolve_token(token_env: Option<&str>) -> Result<Option<SecretString>, ConfigError> {
    match token_env {
        None => Ok(None),
        Some(var) => match std::env::var(var) {
            Ok(value) if !value.is_empty() => Ok(Some(SecretString::from(value))),
            _ => Err(ConfigError::MissingToken { env: var.to_string() }),
        },
    }
}

/// Errors from configuration loading.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// File read failure.
    #[error("failed to read config file: {0}")]
    Io(std::io::Error),

    /// TOML parse failure.
    #[error("failed to parse config: {0}")]
    Parse(toml::de::Error),

    /// A cross-field constraint was violated.
    #[error("invalid config: {0}")]
    Validation(String),

    /// A token environment variable is referenced but not set.
    #[error("token environment variable {env:?} is not set")]
    MissingToken {
        /// The variable name.
        env: String,
    },
}

// =============================================================================
// Tests
// =============================================================================

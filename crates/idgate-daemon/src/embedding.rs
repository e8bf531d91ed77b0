//! Embedding provider client.
//!
//! [`EmbeddingProvider`] is the seam the retrieval gateway embeds query text
//! through; [`HttpEmbeddingClient`] is the production implementation, a JSON
//! HTTPS client constructed once at startup and injected wherever needed.
//! Failures are surfaced as retryable service errors; the gateway never
//! substitutes a cached or synthetic vector for a failed call.

use async_trait::async_trait;
use bytes::Bytes;
use http::{Request, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::debug;

/// Maximum response body size accepted from the provider (4 MiB).
const MAX_RESPONSE_BYTES: usize = 4 * 1024 * 1024;

/// Errors from embedding generation.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum EmbeddingError {
    /// Transport-level failure. Retryable.
    #[error("embedding request failed: {0}")]
    Network(String),

    /// The provider rejected the request.
    #[error("embedding provider returned HTTP {status}: {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Response body, if readable.
        message: String,
    },

    /// Authentication failed; check the configured token.
    #[error("embedding provider authentication failed")]
    Authentication,

    /// The response could not be parsed.
    #[error("malformed embedding response: {0}")]
    MalformedResponse(String),

    /// The returned vector does not match the configured dimension.
    ///
    /// Fail-closed: a wrong-dimension vector would silently degrade every
    /// similarity search it touches.
    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Configured dimension.
        expected: usize,
        /// Returned dimension.
        actual: usize,
    },
}

/// Text-to-vector provider.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embeds one query text.
    ///
    /// # Errors
    ///
    /// Returns [`EmbeddingError`] on any failure; there is no degraded
    /// success mode.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;

    /// The fixed dimension of vectors this provider produces.
    fn dimension(&self) -> usize;
}

// =============================================================================
// HTTP client
// =============================================================================

/// Connection settings for [`HttpEmbeddingClient`].
#[derive(Debug, Clone)]
pub struct EmbeddingClientConfig {
    /// Full endpoint URL, e.g. `https://api.example.com/v1/embeddings`.
    pub endpoint: String,
    /// Model identifier sent with each request.
    pub model: String,
    /// Expected vector dimension.
    pub dimension: usize,
    /// Bearer token, if the provider requires one.
    pub api_token: Option<SecretString>,
}

/// Production embedding client.
pub struct HttpEmbeddingClient {
    config: EmbeddingClientConfig,
    client: Client<HttpsConnector<HttpConnector>, Full<Bytes>>,
}

impl HttpEmbeddingClient {
    /// Builds the client. The underlying connection pool is created once
    /// here and reused for the process lifetime.
    #[must_use]
    pub fn new(config: EmbeddingClientConfig) -> Self {
        let https = HttpsConnectorBuilder::new()
            .with_webpki_roots()
            .https_or_http()
            .enable_http1()
            .enable_http2()
            .build();
        let client = Client::builder(TokioExecutor::new()).build(https);
        Self { config, client }
    }
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Deserialize)]
struct EmbeddingDatum {
    embedding: Vec<f32>,
}

#[async_trait]
impl EmbeddingProvider for HttpEmbeddingClient {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let body = serde_json::json!({
            "model": self.config.model,
            "input": [text],
        });
        let body_bytes =
            serde_json::to_vec(&body).map_err(|e| EmbeddingError::Network(e.to_string()))?;

        let mut request = Request::builder()
            .method("POST")
            .uri(&self.config.endpoint)
            .header("Content-Type", "application/json")
            .header("User-Agent", "idgate-daemon/0.1");
        if let Some(token) = &self.config.api_token {
            request = request.header("Authorization", format!("Bearer {}", token.expose_secret()));
        }
        let request = request
            .body(Full::new(Bytes::from(body_bytes)))
            .map_err(|e| EmbeddingError::Network(e.to_string()))?;

        debug!(endpoint = %self.config.endpoint, "requesting embedding");

        let response = self
            .client
            .request(request)
            .await
            .map_err(|e| EmbeddingError::Network(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(EmbeddingError::Authentication);
        }

        let collected = response
            .into_body()
            .collect()
            .await
            .map_err(|e| EmbeddingError::Network(e.to_string()))?;
        let bytes = collected.to_bytes();
        if bytes.len() > MAX_RESPONSE_BYTES {
            return Err(EmbeddingError::MalformedResponse(format!(
                "response body exceeds {MAX_RESPONSE_BYTES} bytes"
            )));
        }

        if !status.is_success() {
            let message = String::from_utf8_lossy(&bytes).into_owned();
            return Err(EmbeddingError::Api { status: status.as_u16(), message });
        }

        let parsed: EmbeddingResponse = serde_json::from_slice(&bytes)
            .map_err(|e| EmbeddingError::MalformedResponse(e.to_string()))?;
        let vector = parsed
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| EmbeddingError::MalformedResponse("empty data array".to_string()))?;

        if vector.len() != self.config.dimension {
            return Err(EmbeddingError::DimensionMismatch {
                expected: self.config.dimension,
                actual: vector.len(),
            });
        }
        Ok(vector)
    }

    fn dimension(&self) -> usize {
        self.config.dimension
    }
}

//! Vector search service client.
//!
//! [`VectorSearchService`] is the seam the retrieval gateway issues scoped
//! similarity queries through. The query carries the namespace and the
//! access-level metadata filter the scope layer decided on; this module
//! transports them verbatim and never widens them. [`HttpVectorClient`] is
//! the production implementation, constructed once at startup and injected.

use async_trait::async_trait;
use bytes::Bytes;
use http::{Request, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use idgate_core::hierarchy::AccessLevel;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Maximum response body size accepted from the service (16 MiB).
const MAX_RESPONSE_BYTES: usize = 16 * 1024 * 1024;

/// Errors from vector search.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum VectorError {
    /// Transport-level failure. Retryable.
    #[error("vector search request failed: {0}")]
    Network(String),

    /// The service rejected the request.
    #[error("vector service returned HTTP {status}: {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Response body, if readable.
        message: String,
    },

    /// Authentication failed; check the configured token.
    #[error("vector service authentication failed")]
    Authentication,

    /// The response could not be parsed.
    #[error("malformed vector search response: {0}")]
    MalformedResponse(String),
}

/// One scoped similarity query.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorQuery {
    /// Namespace to search; `None` targets the shared index namespace.
    pub namespace: Option<String>,
    /// Query embedding.
    pub vector: Vec<f32>,
    /// Access-level metadata filter; `None` means the namespace boundary is
    /// the access boundary (personal namespaces only).
    pub level_filter: Option<Vec<AccessLevel>>,
    /// Number of results requested.
    pub top_k: usize,
}

/// One ranked match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorMatch {
    /// Document/chunk identifier.
    pub id: String,
    /// Similarity score.
    pub score: f64,
    /// Document metadata as stored in the index.
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// Ranked similarity search over the vector index.
#[async_trait]
pub trait VectorSearchService: Send + Sync {
    /// Runs one query, returning at most `query.top_k` matches.
    ///
    /// # Errors
    ///
    /// Returns [`VectorError`] on any failure; there is no degraded
    /// success mode.
    async fn query(&self, query: &VectorQuery) -> Result<Vec<VectorMatch>, VectorError>;
}

// =============================================================================
// HTTP client
// =============================================================================

/// Connection settings for [`HttpVectorClient`].
#[derive(Debug, Clone)]
pub struct VectorClientConfig {
    /// Full query endpoint URL, e.g. `https://index.example.com/query`.
    pub endpoint: String,
    /// Bearer token, if the service requires one.
    pub api_token: Option<SecretString>,
}

/// Production vector search client.
pub struct HttpVectorClient {
    config: VectorClientConfig,
    client: Client<HttpsConnector<HttpConnector>, Full<Bytes>>,
}

impl HttpVectorClient {
    /// Builds the client. The underlying connection pool is created once
    /// here and reused for the process lifetime.
    #[must_use]
    pub fn new(config: VectorClientConfig) -> Self {
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
struct QueryResponse {
    #[serde(default)]
    matches: Vec<VectorMatch>,
}

#[async_trait]
impl VectorSearchService for HttpVectorClient {
    async fn query(&self, query: &VectorQuery) -> Result<Vec<VectorMatch>, VectorError> {
        let mut body = serde_json::json!({
            "vector": query.vector,
            "topK": query.top_k,
            "includeMetadata": true,
        });
        if let Some(namespace) = &query.namespace {
            body["namespace"] = serde_json::json!(namespace);
        }
        if let Some(levels) = &query.level_filter {
            let labels: Vec<&str> = levels.iter().map(|l| l.as_str()).collect();
            body["filter"] = serde_json::json!({ "access_level": { "$in": labels } });
        }
        let body_bytes =
            serde_json::to_vec(&body).map_err(|e| VectorError::Network(e.to_string()))?;

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
            .map_err(|e| VectorError::Network(e.to_string()))?;

        debug!(
            endpoint = %self.config.endpoint,
            namespace = query.namespace.as_deref().unwrap_or("<shared>"),
            top_k = query.top_k,
            "issuing vector query"
        );

        let response = self
            .client
            .request(request)
            .await
            .map_err(|e| VectorError::Network(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(VectorError::Authentication);
        }

        let collected = response
            .into_body()
            .collect()
            .await
            .map_err(|e| VectorError::Network(e.to_string()))?;
        let bytes = collected.to_bytes();
        if bytes.len() > MAX_RESPONSE_BYTES {
            return Err(VectorError::MalformedResponse(format!(
                "response body exceeds {MAX_RESPONSE_BYTES} bytes"
            )));
        }

        if !status.is_success() {
            let message = String::from_utf8_lossy(&bytes).into_owned();
            return Err(VectorError::Api { status: status.as_u16(), message });
        }

        let parsed: QueryResponse = serde_json::from_slice(&bytes)
            .map_err(|e| VectorError::MalformedResponse(e.to_string()))?;

        // An over-returning server is truncated, never trusted.
        let mut matches = parsed.matches;
        matches.truncate(query.top_k);
        Ok(matches)
    }
}

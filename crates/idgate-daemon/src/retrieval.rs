//! Namespace-isolated retrieval gateway.
//!
//! [`RetrievalGateway::search`] is the only path from a caller to the vector
//! index. Per request it loads the caller's identity fresh from the durable
//! store (read-your-writes), resolves the access profile from scratch, and
//! builds the retrieval scope server-side: the request contributes a query
//! string and an optional explicit namespace, nothing else. Three isolation
//! layers hold simultaneously (namespace, metadata filter, caller binding);
//! any failure in any layer, and any downstream failure, is terminal for
//! the request. Zero results, never an unfiltered or cached substitute.

use std::sync::Arc;

use idgate_core::profile::{ResolverConfig, resolve};
use idgate_core::scope::{RetrievalScope, ScopeError, ScopeTarget, build_scope, parse_query};
use tracing::debug;

use crate::embedding::{EmbeddingError, EmbeddingProvider};
use crate::store::{SqliteAccessStore, StoreError};
use crate::vector::{VectorError, VectorMatch, VectorQuery, VectorSearchService};

// =============================================================================
// Options / request / outcome
// =============================================================================

/// Gateway policy knobs, from the `[retrieval]` configuration section.
#[derive(Debug, Clone)]
pub struct RetrievalOptions {
    /// Namespace of the shared index; `None` uses the service default.
    pub shared_namespace: Option<String>,
    /// Query prefix routing to the caller's personal namespace.
    pub private_marker: String,
    /// Result count when the request does not specify one.
    pub default_top_k: usize,
    /// Hard ceiling on the result count.
    pub max_top_k: usize,
}

impl Default for RetrievalOptions {
    fn default() -> Self {
        Self {
            shared_namespace: None,
            private_marker: idgate_core::scope::DEFAULT_PRIVATE_MARKER.to_string(),
            default_top_k: 5,
            max_top_k: 50,
        }
    }
}

/// One search request for an authenticated identity.
#[derive(Debug, Clone)]
pub struct SearchRequest {
    /// The authenticated caller. Resolved against durable state; the
    /// request carries no role/tier/level input.
    pub identity_id: String,
    /// Raw query text, possibly carrying the private marker.
    pub query: String,
    /// Requested result count; clamped to the configured ceiling.
    pub top_k: Option<usize>,
    /// Explicit namespace request; honored only when it names the caller's
    /// own namespace.
    pub namespace: Option<String>,
}

/// Search results plus the scope they were produced under.
#[derive(Debug, Clone)]
pub struct SearchOutcome {
    /// Ranked matches, at most `top_k`.
    pub results: Vec<VectorMatch>,
    /// The scope the query ran in.
    pub scope: RetrievalScope,
}

// =============================================================================
// Errors
// =============================================================================

/// Retrieval failures. All fail closed; none fall back to a wider search.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum RetrievalError {
    /// The caller's identity does not exist.
    #[error("identity not found: {identity_id}")]
    UnknownIdentity {
        /// The missing identity id.
        identity_id: String,
    },

    /// Query validation or isolation failure.
    #[error(transparent)]
    Scope(#[from] ScopeError),

    /// Embedding provider failure. Retryable by the caller.
    #[error(transparent)]
    Embedding(#[from] EmbeddingError),

    /// Vector service failure. Retryable by the caller.
    #[error(transparent)]
    Vector(#[from] VectorError),

    /// Durable-store failure.
    #[error("storage error: {0}")]
    Storage(#[from] StoreError),
}

// =============================================================================
// RetrievalGateway
// =============================================================================

/// The scoped search surface over the vector index.
pub struct RetrievalGateway {
    store: Arc<SqliteAccessStore>,
    embedding: Arc<dyn EmbeddingProvider>,
    vector: Arc<dyn VectorSearchService>,
    resolver: ResolverConfig,
    options: RetrievalOptions,
}

impl RetrievalGateway {
    /// Creates a gateway over injected service clients.
    #[must_use]
    pub fn new(
        store: Arc<SqliteAccessStore>,
        embedding: Arc<dyn EmbeddingProvider>,
        vector: Arc<dyn VectorSearchService>,
        resolver: ResolverConfig,
        options: RetrievalOptions,
    ) -> Self {
        Self { store, embedding, vector, resolver, options }
    }

    /// Runs one scoped search.
    ///
    /// # Errors
    ///
    /// See [`RetrievalError`]. Isolation failures are raised before the
    /// query text is ever embedded.
    pub async fn search(&self, request: &SearchRequest) -> Result<SearchOutcome, RetrievalError> {
        let identity = self
            .store
            .get_identity(&request.identity_id)?
            .ok_or_else(|| RetrievalError::UnknownIdentity {
                identity_id: request.identity_id.clone(),
            })?;

        let parsed = parse_query(&request.query, &self.options.private_marker)?;

        // The profile is resolved fresh from durable state on every query;
        // the cached effective_level column is never consulted here.
        let profile = resolve(identity.role, identity.tier, identity.verified, &self.resolver);

        let top_k = request
            .top_k
            .unwrap_or(self.options.default_top_k)
            .clamp(1, self.options.max_top_k);

        let scope = build_scope(
            &profile,
            identity.namespace.as_deref(),
            &parsed,
            request.namespace.as_deref(),
            top_k,
        )?;

        // Isolation settled; only now is the suspend-point work done.
        let vector = self.embedding.embed(&parsed.text).await?;

        let query = match &scope.target {
            ScopeTarget::SharedIndex { permitted_levels } => VectorQuery {
                namespace: self.options.shared_namespace.clone(),
                vector,
                level_filter: Some(permitted_levels.clone()),
                top_k,
            },
            ScopeTarget::PersonalNamespace { namespace } => VectorQuery {
                namespace: Some(namespace.clone()),
                vector,
                // Inside a personal namespace the namespace boundary is the
                // access boundary.
                level_filter: None,
                top_k,
            },
        };

        let results = self.vector.query(&query).await?;
        debug!(
            identity = %request.identity_id,
            private = matches!(scope.target, ScopeTarget::PersonalNamespace { .. }),
            results = results.len(),
            "search complete"
        );
        Ok(SearchOutcome { results, scope })
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use idgate_core::code::{CodeKind, CodeState};
    use idgate_core::hierarchy::{AccessLevel, Role, Tier};

    use super::*;
    use crate::store::{ClaimIdentity, ClaimTransaction, NewAccessCode};

    /// Deterministic embedding stub.
    struct FixedEmbedding {
        fail: bool,
    }

    #[async_trait]
    impl EmbeddingProvider for FixedEmbedding {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
            if self.fail {
                return Err(EmbeddingError::Network("connection refused".to_string()));
            }
            Ok(vec![0.1, 0.2, 0.3])
        }

        fn dimension(&self) -> usize {
            3
        }
    }

    /// Records every query it receives and returns a canned match.
    struct RecordingVector {
        queries: Mutex<Vec<VectorQuery>>,
    }

    impl RecordingVector {
        fn new() -> Self {
            Self { queries: Mutex::new(Vec::new()) }
        }

        fn last_query(&self) -> VectorQuery {
            self.queries.lock().unwrap().last().cloned().expect("no query recorded")
        }
    }

    #[async_trait]
    impl VectorSearchService for RecordingVector {
        async fn query(&self, query: &VectorQuery) -> Result<Vec<VectorMatch>, VectorError> {
            self.queries.lock().unwrap().push(query.clone());
            Ok(vec![VectorMatch {
                id: "doc-1".to_string(),
                score: 0.9,
                metadata: serde_json::json!({"access_level": "basic"}),
            }])
        }
    }

    fn seed_identity(
        store: &SqliteAccessStore,
        id: &str,
        role: Role,
        tier: Tier,
        namespace: Option<&str>,
    ) {
        let code_id = store
            .provision_code(
                &NewAccessCode {
                    code: format!("CODE-{id}"),
                    kind: CodeKind::Generic,
                    role,
                    tier,
                    max_uses: 1,
                    expires_at: i64::MAX,
                    credential_id: None,
                    intended_claims: None,
                },
                0,
            )
            .unwrap();
        store
            .claim_code(&ClaimTransaction {
                code_id,
                expected_uses: 0,
                next_state: CodeState::Claimed,
                now: 1,
                identity: ClaimIdentity::Create {
                    id: id.to_string(),
                    role,
                    tier,
                    credential_id: None,
                    namespace: namespace.map(String::from),
                    verified: false,
                    effective_level: AccessLevel::Basic,
                },
                credential_id: None,
            })
            .unwrap();
    }

    fn gateway(
        store: Arc<SqliteAccessStore>,
        vector: Arc<RecordingVector>,
        fail_embedding: bool,
    ) -> RetrievalGateway {
        RetrievalGateway::new(
            store,
            Arc::new(FixedEmbedding { fail: fail_embedding }),
            vector,
            ResolverConfig::default(),
            RetrievalOptions {
                shared_namespace: Some("shared".to_string()),
                ..RetrievalOptions::default()
            },
        )
    }

    fn request(identity: &str, query: &str) -> SearchRequest {
        SearchRequest {
            identity_id: identity.to_string(),
            query: query.to_string(),
            top_k: None,
            namespace: None,
        }
    }

    #[tokio::test]
    async fn test_shared_search_carries_union_filter() {
        let store = Arc::new(SqliteAccessStore::in_memory().unwrap());
        seed_identity(&store, "mgr", Role::Manager, Tier::Free, None);
        let vector = Arc::new(RecordingVector::new());
        let gw = gateway(Arc::clone(&store), Arc::clone(&vector), false);

        let outcome = gw.search(&request("mgr", "quarterly numbers")).await.unwrap();
        assert_eq!(outcome.results.len(), 1);

        let q = vector.last_query();
        assert_eq!(q.namespace.as_deref(), Some("shared"));
        let levels = q.level_filter.expect("shared search must carry a filter");
        // Free tier alone stops at basic; the manager role carries the
        // union to advanced and confidential.
        assert!(levels.contains(&AccessLevel::Advanced));
        assert!(levels.contains(&AccessLevel::Confidential));
        assert!(!levels.contains(&AccessLevel::Executive));
    }

    #[tokio::test]
    async fn test_private_search_targets_namespace_without_filter() {
        let store = Arc::new(SqliteAccessStore::in_memory().unwrap());
        seed_identity(&store, "emp", Role::Junior, Tier::Basic, Some("emp-a"));
        let vector = Arc::new(RecordingVector::new());
        let gw = gateway(Arc::clone(&store), Arc::clone(&vector), false);

        gw.search(&request("emp", "private: my notes")).await.unwrap();

        let q = vector.last_query();
        assert_eq!(q.namespace.as_deref(), Some("emp-a"));
        assert!(q.level_filter.is_none());
    }

    #[tokio::test]
    async fn test_private_without_namespace_returns_error_not_fallback() {
        let store = Arc::new(SqliteAccessStore::in_memory().unwrap());
        seed_identity(&store, "user", Role::User, Tier::Free, None);
        let vector = Arc::new(RecordingVector::new());
        let gw = gateway(Arc::clone(&store), Arc::clone(&vector), false);

        let err = gw.search(&request("user", "private: anything")).await.unwrap_err();
        assert!(matches!(err, RetrievalError::Scope(ScopeError::NoPersonalNamespace)));
        // Fail closed: the vector service was never consulted.
        assert!(vector.queries.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_foreign_namespace_is_refused_before_embedding() {
        let store = Arc::new(SqliteAccessStore::in_memory().unwrap());
        seed_identity(&store, "emp", Role::Admin, Tier::Enterprise, Some("emp-a"));
        let vector = Arc::new(RecordingVector::new());
        // Embedding would fail if reached; the isolation check fires first.
        let gw = gateway(Arc::clone(&store), Arc::clone(&vector), true);

        let mut req = request("emp", "anything");
        req.namespace = Some("emp-b".to_string());
        let err = gw.search(&req).await.unwrap_err();
        assert!(matches!(err, RetrievalError::Scope(ScopeError::NamespaceMismatch { .. })));
        assert!(vector.queries.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_identity_fails_closed() {
        let store = Arc::new(SqliteAccessStore::in_memory().unwrap());
        let vector = Arc::new(RecordingVector::new());
        let gw = gateway(Arc::clone(&store), Arc::clone(&vector), false);

        let err = gw.search(&request("ghost", "anything")).await.unwrap_err();
        assert!(matches!(err, RetrievalError::UnknownIdentity { .. }));
        assert!(vector.queries.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_embedding_failure_is_terminal() {
        let store = Arc::new(SqliteAccessStore::in_memory().unwrap());
        seed_identity(&store, "user", Role::User, Tier::Free, None);
        let vector = Arc::new(RecordingVector::new());
        let gw = gateway(Arc::clone(&store), Arc::clone(&vector), true);

        let err = gw.search(&request("user", "anything")).await.unwrap_err();
        assert!(matches!(err, RetrievalError::Embedding(_)));
        // No unfiltered or cached substitute was attempted.
        assert!(vector.queries.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_top_k_clamped() {
        let store = Arc::new(SqliteAccessStore::in_memory().unwrap());
        seed_identity(&store, "user", Role::User, Tier::Free, None);
        let vector = Arc::new(RecordingVector::new());
        let gw = gateway(Arc::clone(&store), Arc::clone(&vector), false);

        let mut req = request("user", "anything");
        req.top_k = Some(10_000);
        gw.search(&req).await.unwrap();
        assert_eq!(vector.last_query().top_k, 50);

        req.top_k = Some(0);
        gw.search(&req).await.unwrap();
        assert_eq!(vector.last_query().top_k, 1);
    }
}

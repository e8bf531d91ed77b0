//! HTTP surface for the claim engine and retrieval gateway.
//!
//! Two endpoints: `POST /claim` and `POST /search`. The admin-facing CRUD
//! surface of the surrounding product is not part of this core. Error
//! mapping is explicit per variant; every access-decision failure is
//! terminal for the request and none of them degrade into a wider search
//! or a default privilege.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use idgate_core::claims::IdentityClaims;
use idgate_core::hierarchy::AccessLevel;
use idgate_core::matcher::MatchStatus;
use idgate_core::scope::ScopeError;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::claim::{ClaimEngine, ClaimError, ClaimRequest};
use crate::retrieval::{RetrievalError, RetrievalGateway, SearchRequest};
use crate::vector::VectorMatch;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    /// The claim engine.
    pub engine: Arc<ClaimEngine>,
    /// The retrieval gateway.
    pub gateway: Arc<RetrievalGateway>,
}

/// Builds the router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/claim", post(claim))
        .route("/search", post(search))
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

// =============================================================================
// /claim
// =============================================================================

/// `POST /claim` request body.
#[derive(Debug, Deserialize)]
pub struct ClaimBody {
    /// The access code being claimed.
    pub code: String,
    /// Self-reported identity claims.
    #[serde(default)]
    pub claims: IdentityClaims,
    /// Existing identity to bind instead of creating a fresh one.
    #[serde(default)]
    pub identity_id: Option<String>,
}

/// `POST /claim` response body.
#[derive(Debug, Serialize)]
pub struct ClaimResponseBody {
    /// The bound identity.
    pub identity_id: String,
    /// Credential match classification.
    pub match_status: MatchStatus,
    /// Personal namespace, if one was assigned.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    /// Whether the identity is credential-verified.
    pub verified: bool,
    /// Effective level resolved at claim time.
    pub effective_level: AccessLevel,
}

async fn claim(
    State(state): State<AppState>,
    Json(body): Json<ClaimBody>,
) -> Result<Json<ClaimResponseBody>, ApiError> {
    let request = ClaimRequest {
        code: body.code,
        claims: body.claims,
        identity_id: body.identity_id,
    };
    let outcome = state.engine.claim(&request)?;
    Ok(Json(ClaimResponseBody {
        identity_id: outcome.identity_id,
        match_status: outcome.match_status,
        namespace: outcome.namespace,
        verified: outcome.verified,
        effective_level: outcome.effective_level,
    }))
}

// =============================================================================
// /search
// =============================================================================

/// `POST /search` request body.
#[derive(Debug, Deserialize)]
pub struct SearchBody {
    /// The authenticated caller's identity.
    pub identity_id: String,
    /// Query text.
    pub query: String,
    /// Requested result count.
    #[serde(default)]
    pub top_k: Option<usize>,
    /// Explicit namespace; honored only for the caller's own.
    #[serde(default)]
    pub namespace: Option<String>,
}

/// `POST /search` response body.
#[derive(Debug, Serialize)]
pub struct SearchResponseBody {
    /// Ranked matches.
    pub results: Vec<VectorMatch>,
}

async fn search(
    State(state): State<AppState>,
    Json(body): Json<SearchBody>,
) -> Result<Json<SearchResponseBody>, ApiError> {
    let request = SearchRequest {
        identity_id: body.identity_id,
        query: body.query,
        top_k: body.top_k,
        namespace: body.namespace,
    };
    let outcome = state.gateway.search(&request).await?;
    Ok(Json(SearchResponseBody { results: outcome.results }))
}

// =============================================================================
// Error mapping
// =============================================================================

/// API-level error wrapper.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Claim failure.
    #[error(transparent)]
    Claim(#[from] ClaimError),

    /// Retrieval failure.
    #[error(transparent)]
    Retrieval(#[from] RetrievalError),
}

impl ApiError {
    /// HTTP status for this error.
    ///
    /// - validation errors: 400
    /// - unknown code/identity (and revoked codes): 404
    /// - expired: 410
    /// - exhausted / already claimed: 409
    /// - insufficient credential match: 422
    /// - isolation violations: 403
    /// - claim contention: 503
    /// - downstream embedding/vector failures: 502
    /// - storage failures: 500
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::Claim(error) => match error {
                ClaimError::Validation(_) => StatusCode::BAD_REQUEST,
                ClaimError::NotFound | ClaimError::UnknownIdentity { .. } => StatusCode::NOT_FOUND,
                ClaimError::Expired => StatusCode::GONE,
                ClaimError::Exhausted | ClaimError::AlreadyClaimedByOther => StatusCode::CONFLICT,
                ClaimError::MatchInsufficient { .. } => StatusCode::UNPROCESSABLE_ENTITY,
                ClaimError::ClaimContention => StatusCode::SERVICE_UNAVAILABLE,
                ClaimError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::Retrieval(error) => match error {
                RetrievalError::UnknownIdentity { .. } => StatusCode::NOT_FOUND,
                RetrievalError::Scope(scope) => match scope {
                    ScopeError::EmptyQuery | ScopeError::QueryTooLong { .. } => {
                        StatusCode::BAD_REQUEST
                    },
                    ScopeError::NoPersonalNamespace | ScopeError::NamespaceMismatch { .. } => {
                        StatusCode::FORBIDDEN
                    },
                },
                RetrievalError::Embedding(_) | RetrievalError::Vector(_) => {
                    StatusCode::BAD_GATEWAY
                },
                RetrievalError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }
}

/// Wire form of an error.
#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    missing_fields: Option<Vec<&'static str>>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            warn!(%self, "request failed");
        }
        let missing_fields = match &self {
            Self::Claim(ClaimError::MatchInsufficient { missing_fields }) => {
                Some(missing_fields.clone())
            },
            _ => None,
        };
        let body = ErrorBody { error: self.to_string(), missing_fields };
        (status, Json(body)).into_response()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_claim_error_status_codes() {
        let cases: Vec<(ClaimError, StatusCode)> = vec![
            (ClaimError::NotFound, StatusCode::NOT_FOUND),
            (ClaimError::Expired, StatusCode::GONE),
            (ClaimError::Exhausted, StatusCode::CONFLICT),
            (ClaimError::AlreadyClaimedByOther, StatusCode::CONFLICT),
            (
                ClaimError::MatchInsufficient { missing_fields: vec!["email"] },
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
            (ClaimError::ClaimContention, StatusCode::SERVICE_UNAVAILABLE),
        ];
        for (error, expected) in cases {
            assert_eq!(ApiError::Claim(error).status_code(), expected);
        }
    }

    #[test]
    fn test_isolation_violations_are_forbidden() {
        let err = ApiError::Retrieval(RetrievalError::Scope(ScopeError::NoPersonalNamespace));
        assert_eq!(err.status_code(), StatusCode::FORBIDDEN);

        let err = ApiError::Retrieval(RetrievalError::Scope(ScopeError::NamespaceMismatch {
            requested: "emp-b".to_string(),
        }));
        assert_eq!(err.status_code(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn test_downstream_failures_are_bad_gateway() {
        let err = ApiError::Retrieval(RetrievalError::Embedding(
            crate::embedding::EmbeddingError::Network("timeout".to_string()),
        ));
        assert_eq!(err.status_code(), StatusCode::BAD_GATEWAY);
    }
}

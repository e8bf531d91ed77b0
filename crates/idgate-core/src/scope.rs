//! Retrieval-scope construction and namespace isolation.
//!
//! Every vector query runs inside a [`RetrievalScope`] built fresh, server
//! side, from the caller's resolved [`AccessProfile`], never from
//! caller-supplied role/tier/namespace. Three isolation layers hold at once:
//!
//! 1. **Namespace isolation**: personal queries target exactly the
//!    identity's assigned namespace; a request naming any other namespace is
//!    refused with [`ScopeError::NamespaceMismatch`], never redirected.
//! 2. **Metadata filtering**: shared-index queries carry the permitted
//!    access-level set from the role/tier union.
//! 3. **Caller binding**: the profile and namespace come from durable
//!    state for the authenticated caller only.
//!
//! A failure in any layer fails closed: the query returns an error and zero
//! results, never an unfiltered search.

use serde::{Deserialize, Serialize};

use crate::hierarchy::AccessLevel;
use crate::profile::AccessProfile;

/// Default query prefix that routes a search to the caller's personal
/// namespace. Configurable via the `[retrieval]` section.
pub const DEFAULT_PRIVATE_MARKER: &str = "private:";

/// Maximum accepted query length in bytes.
pub const MAX_QUERY_LENGTH: usize = 4096;

// =============================================================================
// Query parsing
// =============================================================================

/// A query after marker detection and validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedQuery {
    /// Query text with any private marker stripped.
    pub text: String,
    /// Whether the private marker was present.
    pub private: bool,
}

/// Validates a raw query and strips the private marker if present.
///
/// # Errors
///
/// Returns [`ScopeError::EmptyQuery`] when nothing remains after trimming
/// and marker stripping, or [`ScopeError::QueryTooLong`] past
/// [`MAX_QUERY_LENGTH`].
pub fn parse_query(raw: &str, private_marker: &str) -> Result<ParsedQuery, ScopeError> {
    if raw.len() > MAX_QUERY_LENGTH {
        return Err(ScopeError::QueryTooLong { len: raw.len(), max: MAX_QUERY_LENGTH });
    }

    let trimmed = raw.trim();
    let (text, private) = match trimmed.strip_prefix(private_marker) {
        Some(rest) => (rest.trim(), true),
        None => (trimmed, false),
    };

    if text.is_empty() {
        return Err(ScopeError::EmptyQuery);
    }

    Ok(ParsedQuery { text: text.to_string(), private })
}

// =============================================================================
// RetrievalScope
// =============================================================================

/// Where a query is allowed to search.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScopeTarget {
    /// The shared index, filtered to the permitted access levels.
    SharedIndex {
        /// Levels the metadata filter admits.
        permitted_levels: Vec<AccessLevel>,
    },
    /// One personal namespace. The namespace boundary is the access
    /// boundary; no level filter applies inside it.
    PersonalNamespace {
        /// The caller's assigned namespace.
        namespace: String,
    },
}

/// An ephemeral, per-query retrieval scope.
///
/// Constructed fresh for every query and dropped with it; never cached
/// across requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrievalScope {
    /// Search target and its filter.
    pub target: ScopeTarget,
    /// Number of results requested.
    pub top_k: usize,
}

/// Builds the scope for a parsed query.
///
/// `personal_namespace` is the identity's assigned namespace from durable
/// state. `requested_namespace` is an *optional explicit* namespace from the
/// request; it is only ever honored when it names the caller's own
/// namespace; anything else is a refusal, not a redirect.
///
/// # Errors
///
/// - [`ScopeError::NoPersonalNamespace`] for a private query without an
///   assigned namespace.
/// - [`ScopeError::NamespaceMismatch`] when `requested_namespace` names a
///   namespace other than the caller's own.
pub fn build_scope(
    profile: &AccessProfile,
    personal_namespace: Option<&str>,
    query: &ParsedQuery,
    requested_namespace: Option<&str>,
    top_k: usize,
) -> Result<RetrievalScope, ScopeError> {
    if let Some(requested) = requested_namespace {
        match personal_namespace {
            Some(own) if own == requested => {},
            _ => {
                return Err(ScopeError::NamespaceMismatch { requested: requested.to_string() });
            },
        }
    }

    let private = query.private || requested_namespace.is_some();

    let target = if private {
        let namespace = personal_namespace.ok_or(ScopeError::NoPersonalNamespace)?;
        ScopeTarget::PersonalNamespace { namespace: namespace.to_string() }
    } else {
        ScopeTarget::SharedIndex { permitted_levels: profile.permitted_levels.clone() }
    };

    Ok(RetrievalScope { target, top_k })
}

// =============================================================================
// Error Types
// =============================================================================

/// Isolation and validation failures during scope construction.
///
/// All variants are terminal for the request; there is no fallback scope.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScopeError {
    /// The query was empty after trimming and marker stripping.
    #[error("query is empty")]
    EmptyQuery,

    /// The query exceeded the hard length cap.
    #[error("query is {len} bytes, max {max}")]
    QueryTooLong {
        /// Supplied length.
        len: usize,
        /// Maximum allowed length.
        max: usize,
    },

    /// A private query was issued by an identity with no assigned
    /// namespace.
    #[error("identity has no personal namespace")]
    NoPersonalNamespace,

    /// The request named a namespace that is not the caller's own.
    #[error("requested namespace {requested:?} does not match caller's assignment")]
    NamespaceMismatch {
        /// The namespace the request asked for.
        requested: String,
    },
}

// =============================================================================
// Tests
// =============================================================================

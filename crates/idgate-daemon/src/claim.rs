//! The code claim engine.
//!
//! [`ClaimEngine::claim`] converts a single-use (or finite-use) access code
//! plus self-reported identity claims into a durable identity binding. The
//! precondition order is fixed and each failure is a distinct error: the
//! code exists, is not revoked or expired, has capacity, and the credential
//! match is not insufficient. The transition itself is delegated to
//! [`SqliteAccessStore::claim_code`], which commits the counter increment,
//! claimant binding, identity row, and credential binding as one
//! transaction; the engine never issues those as separate writes.
//!
//! A compare-and-swap miss is classified by re-reading the row: capacity
//! raced away means `Exhausted` (or `AlreadyClaimedByOther`), expiry passed
//! means `Expired`, and plain contention on a multi-use code is retried up
//! to [`MAX_CAS_RETRIES`] before surfacing `ClaimContention`. No other
//! failure is retried automatically.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use idgate_core::claims::{ClaimsError, IdentityClaims};
use idgate_core::code::{AccessCode, CodeKind, PreconditionError};
use idgate_core::hierarchy::AccessLevel;
use idgate_core::matcher::{Credential, MatchStatus, MatcherConfig, match_claims};
use idgate_core::profile::{ResolverConfig, resolve};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::store::{ClaimIdentity, ClaimTransaction, SqliteAccessStore, StoreError};

/// Internal retry bound for CAS contention. Entitlement failures are never
/// retried.
pub const MAX_CAS_RETRIES: u32 = 3;

// =============================================================================
// Request / outcome
// =============================================================================

/// One claim attempt.
#[derive(Debug, Clone)]
pub struct ClaimRequest {
    /// The opaque code string being claimed.
    pub code: String,
    /// Self-reported identity claims.
    pub claims: IdentityClaims,
    /// Existing identity to bind instead of creating a fresh one.
    pub identity_id: Option<String>,
}

/// A successful claim.
#[derive(Debug, Clone, PartialEq)]
pub struct ClaimOutcome {
    /// The bound identity.
    pub identity_id: String,
    /// How the credential match classified.
    pub match_status: MatchStatus,
    /// Personal namespace inherited from the credential, if any.
    pub namespace: Option<String>,
    /// Whether the identity is credential-verified.
    pub verified: bool,
    /// Cached effective level resolved at claim time.
    pub effective_level: AccessLevel,
    /// True when this request re-observed an existing binding instead of
    /// consuming a use (same claimant re-submitting an exhausted code).
    pub replay: bool,
}

// =============================================================================
// Errors
// =============================================================================

/// Claim failures, surfaced verbatim to the caller.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ClaimError {
    /// The claims payload failed validation; nothing touched the store.
    #[error(transparent)]
    Validation(#[from] ClaimsError),

    /// No such code. Also covers revoked codes: a cancelled entitlement is
    /// indistinguishable from a nonexistent one on purpose.
    #[error("code not found")]
    NotFound,

    /// The code is past its expiry.
    #[error("code is expired")]
    Expired,

    /// No claim capacity remains.
    #[error("code is exhausted")]
    Exhausted,

    /// The code (or its credential) is already claimed by a different
    /// identity.
    #[error("code is already claimed by another identity")]
    AlreadyClaimedByOther,

    /// The credential match was insufficient; the named credential fields
    /// were not supplied.
    #[error("credential match insufficient; missing fields: {missing_fields:?}")]
    MatchInsufficient {
        /// Credential fields the caller should resupply.
        missing_fields: Vec<&'static str>,
    },

    /// The candidate identity to link does not exist.
    #[error("identity not found: {identity_id}")]
    UnknownIdentity {
        /// The offered identity id.
        identity_id: String,
    },

    /// CAS contention persisted past the internal retry bound.
    #[error("claim contention; retry later")]
    ClaimContention,

    /// Durable-store failure.
    #[error("storage error: {0}")]
    Storage(#[from] StoreError),
}

// =============================================================================
// ClaimEngine
// =============================================================================

/// Orchestrates claim attempts over the durable store.
pub struct ClaimEngine {
    store: Arc<SqliteAccessStore>,
    matcher: MatcherConfig,
    resolver: ResolverConfig,
}

impl ClaimEngine {
    /// Creates an engine over `store` with the given policy configuration.
    #[must_use]
    pub const fn new(
        store: Arc<SqliteAccessStore>,
        matcher: MatcherConfig,
        resolver: ResolverConfig,
    ) -> Self {
        Self { store, matcher, resolver }
    }

    /// Claims a code at the current wall-clock time.
    ///
    /// # Errors
    ///
    /// See [`ClaimError`].
    pub fn claim(&self, request: &ClaimRequest) -> Result<ClaimOutcome, ClaimError> {
        self.claim_at(request, unix_now())
    }

    /// Claims a code at an explicit clock value.
    ///
    /// # Errors
    ///
    /// See [`ClaimError`].
    pub fn claim_at(&self, request: &ClaimRequest, now: i64) -> Result<ClaimOutcome, ClaimError> {
        // Input validation happens before any store access.
        let claims = request.claims.clone().validate()?;

        let mut attempts = 0;
        loop {
            let code = self.store.get_code(&request.code)?.ok_or(ClaimError::NotFound)?;

            match code.check_claimable(now) {
                Ok(()) => {},
                // Revoked codes are reported as missing so cancellation
                // does not leak which codes ever existed.
                Err(PreconditionError::Cancelled) => return Err(ClaimError::NotFound),
                Err(PreconditionError::Expired) => return Err(ClaimError::Expired),
                Err(PreconditionError::Exhausted) => {
                    if let (Some(candidate), Some(claimant)) =
                        (&request.identity_id, &code.claimant_identity_id)
                    {
                        if candidate == claimant {
                            // Same claimant re-submitting: surface the
                            // existing binding instead of an error.
                            return self.replay_outcome(claimant);
                        }
                    }
                    let taken_by_other =
                        code.kind == CodeKind::Employee && code.claimant_identity_id.is_some();
                    return Err(if taken_by_other {
                        ClaimError::AlreadyClaimedByOther
                    } else {
                        ClaimError::Exhausted
                    });
                },
            }

            let credential = self.load_credential(&code, request)?;
            let outcome = match_claims(&claims, credential.as_ref(), &self.matcher);
            if !outcome.status.claim_proceeds() {
                debug!(code = %code.code, score = outcome.score, "credential match insufficient");
                return Err(ClaimError::MatchInsufficient {
                    missing_fields: outcome.missing_fields,
                });
            }

            let verified = outcome.status.grants_verified();
            let profile = resolve(code.role, code.tier, verified, &self.resolver);
            let namespace = credential.as_ref().and_then(|c| c.namespace.clone());

            let identity = match &request.identity_id {
                Some(id) => ClaimIdentity::Link { id: id.clone() },
                None => ClaimIdentity::Create {
                    id: Uuid::new_v4().to_string(),
                    role: code.role,
                    tier: code.tier,
                    credential_id: code.credential_id,
                    namespace: namespace.clone(),
                    verified,
                    effective_level: profile.effective_level,
                },
            };
            let identity_id = identity.id().to_string();

            let transaction = ClaimTransaction {
                code_id: code.id,
                expected_uses: code.current_uses,
                next_state: code.state_after_claim(),
                now,
                identity,
                credential_id: code.credential_id,
            };

            match self.store.claim_code(&transaction) {
                Ok(()) => {
                    info!(
                        code = %code.code,
                        identity = %identity_id,
                        status = %outcome.status,
                        "code claimed"
                    );
                    return Ok(ClaimOutcome {
                        identity_id,
                        match_status: outcome.status,
                        namespace,
                        verified,
                        effective_level: profile.effective_level,
                        replay: false,
                    });
                },
                Err(StoreError::CasMiss { .. }) => {
                    attempts += 1;
                    if attempts > MAX_CAS_RETRIES {
                        warn!(code = %code.code, attempts, "claim contention exhausted retries");
                        return Err(ClaimError::ClaimContention);
                    }
                    // Re-read and re-classify; a genuine loss of the last
                    // use surfaces as Exhausted on the next iteration.
                },
                Err(StoreError::CredentialTaken { .. } | StoreError::IdentityRebind { .. }) => {
                    return Err(ClaimError::AlreadyClaimedByOther);
                },
                Err(StoreError::IdentityMissing { identity_id }) => {
                    return Err(ClaimError::UnknownIdentity { identity_id });
                },
                Err(other) => return Err(other.into()),
            }
        }
    }

    /// Builds the outcome for a claimant re-observing its existing binding.
    fn replay_outcome(&self, identity_id: &str) -> Result<ClaimOutcome, ClaimError> {
        let identity = self
            .store
            .get_identity(identity_id)?
            .ok_or_else(|| ClaimError::UnknownIdentity { identity_id: identity_id.to_string() })?;

        let profile = resolve(identity.role, identity.tier, identity.verified, &self.resolver);
        // The original match classification is not persisted; report the
        // conservative status implied by the stored facts.
        let match_status = if identity.verified {
            MatchStatus::HighConfidence
        } else if identity.credential_id.is_some() {
            MatchStatus::LowConfidence
        } else {
            MatchStatus::NoCredentialRequired
        };
        Ok(ClaimOutcome {
            identity_id: identity.id,
            match_status,
            namespace: identity.namespace,
            verified: identity.verified,
            effective_level: profile.effective_level,
            replay: true,
        })
    }

    /// Loads the credential the code references, or synthesizes one from
    /// the code's intended-recipient claims.
    fn load_credential(
        &self,
        code: &AccessCode,
        request: &ClaimRequest,
    ) -> Result<Option<Credential>, ClaimError> {
        if let Some(credential_id) = code.credential_id {
            let row = self.store.get_credential(credential_id)?.ok_or_else(|| {
                // A code pointing at a deleted credential is a corrupted
                // provisioning state; fail closed.
                StoreError::Corrupted {
                    table: "credentials",
                    key: credential_id.to_string(),
                    details: "referenced by code but missing".to_string(),
                }
            })?;
            if let Some(bound) = &row.bound_identity_id {
                if request.identity_id.as_ref() != Some(bound) {
                    return Err(ClaimError::AlreadyClaimedByOther);
                }
            }
            return Ok(Some(row.fields));
        }

        // Codes provisioned with intended-recipient claims but no credential
        // record are matched against those claims; no namespace is assigned.
        let intended = self.store.get_intended_claims(code.id)?;
        Ok(intended.map(|claims| Credential {
            full_name: claims.full_name,
            email: claims.email,
            org_id: claims.org_id,
            phone: claims.phone,
            namespace: None,
        }))
    }
}

/// Unix wall-clock seconds.
#[must_use]
pub fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use idgate_core::code::CodeState;
    use idgate_core::hierarchy::{Role, Tier};

    use super::*;
    use crate::store::{NewAccessCode, NewCredential};

    fn engine() -> (ClaimEngine, Arc<SqliteAccessStore>) {
        let store = Arc::new(SqliteAccessStore::in_memory().expect("in-memory store"));
        let engine = ClaimEngine::new(
            Arc::clone(&store),
            MatcherConfig::default(),
            ResolverConfig::default(),
        );
        (engine, store)
    }

    fn provision_generic(store: &SqliteAccessStore, code: &str, max_uses: u32, expires_at: i64) {
        store
            .provision_code(
                &NewAccessCode {
                    code: code.to_string(),
                    kind: CodeKind::Generic,
                    role: Role::User,
                    tier: Tier::Basic,
                    max_uses,
                    expires_at,
                    credential_id: None,
                    intended_claims: None,
                },
                0,
            )
            .unwrap();
    }

    fn provision_employee(store: &SqliteAccessStore, code: &str, expires_at: i64) -> i64 {
        let credential_id = store
            .provision_credential(
                &NewCredential {
                    full_name: Some("Ada Lovelace".to_string()),
                    email: Some("ada@example.com".to_string()),
                    org_id: Some("EMP-00123".to_string()),
                    phone: None,
                    namespace: Some("emp-ada".to_string()),
                },
                0,
            )
            .unwrap();
        store
            .provision_code(
                &NewAccessCode {
                    code: code.to_string(),
                    kind: CodeKind::Employee,
                    role: Role::Senior,
                    tier: Tier::Pro,
                    max_uses: 1,
                    expires_at,
                    credential_id: Some(credential_id),
                    intended_claims: None,
                },
                0,
            )
            .unwrap();
        credential_id
    }

    fn email_claims(email: &str) -> IdentityClaims {
        IdentityClaims { email: Some(email.to_string()), ..IdentityClaims::default() }
    }

    fn request(code: &str, claims: IdentityClaims) -> ClaimRequest {
        ClaimRequest { code: code.to_string(), claims, identity_id: None }
    }

    #[test]
    fn test_generic_code_claim_unverified() {
        let (engine, store) = engine();
        provision_generic(&store, "CODE-A", 1, 1000);

        let outcome = engine.claim_at(&request("CODE-A", email_claims("x@y.example")), 100).unwrap();
        assert_eq!(outcome.match_status, MatchStatus::NoCredentialRequired);
        assert!(!outcome.verified);
        assert!(outcome.namespace.is_none());
        assert!(!outcome.replay);

        let identity = store.get_identity(&outcome.identity_id).unwrap().unwrap();
        assert_eq!(identity.role, Role::User);
        assert_eq!(identity.tier, Tier::Basic);
        let code = store.get_code("CODE-A").unwrap().unwrap();
        assert_eq!(code.state, CodeState::Claimed);
        assert_eq!(code.claimant_identity_id.as_deref(), Some(outcome.identity_id.as_str()));
    }

    #[test]
    fn test_email_only_match_claims_verified() {
        let (engine, store) = engine();
        provision_employee(&store, "CODE-E", 1000);

        let outcome = engine
            .claim_at(&request("CODE-E", email_claims("ada@example.com")), 100)
            .unwrap();
        assert_eq!(outcome.match_status, MatchStatus::HighConfidence);
        assert!(outcome.verified);
        assert_eq!(outcome.namespace.as_deref(), Some("emp-ada"));

        let identity = store.get_identity(&outcome.identity_id).unwrap().unwrap();
        assert!(identity.verified);
        assert_eq!(identity.namespace.as_deref(), Some("emp-ada"));
    }

    #[test]
    fn test_match_insufficient_reports_missing_fields() {
        let (engine, store) = engine();
        provision_employee(&store, "CODE-E", 1000);

        let err = engine
            .claim_at(&request("CODE-E", email_claims("mallory@evil.example")), 100)
            .unwrap_err();
        match err {
            ClaimError::MatchInsufficient { missing_fields } => {
                assert_eq!(missing_fields, vec!["org_id", "full_name"]);
            },
            other => panic!("expected MatchInsufficient, got {other:?}"),
        }
        // Rejection never consumed a use.
        assert_eq!(store.get_code("CODE-E").unwrap().unwrap().current_uses, 0);
    }

    #[test]
    fn test_not_found() {
        let (engine, _store) = engine();
        let err = engine.claim_at(&request("NOPE", email_claims("x@y.example")), 100).unwrap_err();
        assert!(matches!(err, ClaimError::NotFound));
    }

    #[test]
    fn test_cancelled_reports_not_found() {
        let (engine, store) = engine();
        provision_generic(&store, "CODE-A", 1, 1000);
        store.cancel_code("CODE-A", 50).unwrap();
        let err = engine.claim_at(&request("CODE-A", email_claims("x@y.example")), 100).unwrap_err();
        assert!(matches!(err, ClaimError::NotFound));
    }

    #[test]
    fn test_expiry_boundary() {
        let (engine, store) = engine();
        provision_generic(&store, "CODE-A", 1, 1000);

        let err = engine
            .claim_at(&request("CODE-A", email_claims("x@y.example")), 1000)
            .unwrap_err();
        assert!(matches!(err, ClaimError::Expired));

        let outcome = engine.claim_at(&request("CODE-A", email_claims("x@y.example")), 999);
        assert!(outcome.is_ok());
    }

    #[test]
    fn test_exhausted_generic_code() {
        let (engine, store) = engine();
        provision_generic(&store, "CODE-A", 1, 1000);
        engine.claim_at(&request("CODE-A", email_claims("a@y.example")), 100).unwrap();
        let err = engine.claim_at(&request("CODE-A", email_claims("b@y.example")), 101).unwrap_err();
        assert!(matches!(err, ClaimError::Exhausted));
    }

    #[test]
    fn test_employee_code_second_claimant_sees_already_claimed() {
        let (engine, store) = engine();
        provision_employee(&store, "CODE-E", 1000);
        engine.claim_at(&request("CODE-E", email_claims("ada@example.com")), 100).unwrap();
        let err = engine
            .claim_at(&request("CODE-E", email_claims("ada@example.com")), 101)
            .unwrap_err();
        assert!(matches!(err, ClaimError::AlreadyClaimedByOther));
    }

    #[test]
    fn test_replay_by_same_claimant() {
        let (engine, store) = engine();
        provision_employee(&store, "CODE-E", 1000);
        let first = engine.claim_at(&request("CODE-E", email_claims("ada@example.com")), 100).unwrap();

        let replay = engine
            .claim_at(
                &ClaimRequest {
                    code: "CODE-E".to_string(),
                    claims: email_claims("ada@example.com"),
                    identity_id: Some(first.identity_id.clone()),
                },
                101,
            )
            .unwrap();
        assert!(replay.replay);
        assert_eq!(replay.identity_id, first.identity_id);
        assert_eq!(replay.namespace.as_deref(), Some("emp-ada"));
        // The replay consumed nothing.
        assert_eq!(store.get_code("CODE-E").unwrap().unwrap().current_uses, 1);
    }

    #[test]
    fn test_multi_use_code_stays_available() {
        let (engine, store) = engine();
        provision_generic(&store, "CODE-A", 3, 1000);
        engine.claim_at(&request("CODE-A", email_claims("a@y.example")), 100).unwrap();
        engine.claim_at(&request("CODE-A", email_claims("b@y.example")), 101).unwrap();
        let code = store.get_code("CODE-A").unwrap().unwrap();
        assert_eq!(code.current_uses, 2);
        assert_eq!(code.state, CodeState::Available);

        engine.claim_at(&request("CODE-A", email_claims("c@y.example")), 102).unwrap();
        assert_eq!(store.get_code("CODE-A").unwrap().unwrap().state, CodeState::Claimed);
    }

    #[test]
    fn test_intended_claims_act_as_credential() {
        let (engine, store) = engine();
        store
            .provision_code(
                &NewAccessCode {
                    code: "CODE-I".to_string(),
                    kind: CodeKind::Generic,
                    role: Role::User,
                    tier: Tier::Pro,
                    max_uses: 1,
                    expires_at: 1000,
                    credential_id: None,
                    intended_claims: Some(email_claims("invitee@example.com")),
                },
                0,
            )
            .unwrap();

        let err = engine
            .claim_at(&request("CODE-I", email_claims("stranger@example.com")), 100)
            .unwrap_err();
        assert!(matches!(err, ClaimError::MatchInsufficient { .. }));

        let outcome = engine
            .claim_at(&request("CODE-I", email_claims("invitee@example.com")), 100)
            .unwrap();
        assert_eq!(outcome.match_status, MatchStatus::Exact);
        assert!(outcome.verified);
    }

    #[test]
    fn test_validation_precedes_store_access() {
        let (engine, _store) = engine();
        let err = engine
            .claim_at(&request("IRRELEVANT", IdentityClaims::default()), 100)
            .unwrap_err();
        assert!(matches!(err, ClaimError::Validation(ClaimsError::NoFields)));
    }
}

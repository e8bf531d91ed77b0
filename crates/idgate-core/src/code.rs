//! Access-code lifecycle rules.
//!
//! An [`AccessCode`] is a provisioned entitlement: claiming it creates (or
//! links) an identity carrying the code's role, tier, and (through its
//! credential) a personal vector namespace. This module holds the pure
//! lifecycle rules; the atomic claim transition itself lives in the daemon's
//! store, where it can be guarded by a conditional write.
//!
//! # Invariants
//!
//! - `current_uses <= max_uses`, always.
//! - `state == Claimed` implies a non-null claimant. The store writes both
//!   in one transaction; a row violating this is a *partial claim* and is
//!   repaired by the reconciliation sweep, never served.
//! - Codes are never hard-deleted; revocation is the `Cancelled` state.
//! - Expiry is strict: a claim at `now >= expires_at` is rejected; one
//!   second earlier is accepted.

use serde::{Deserialize, Serialize};

use crate::hierarchy::{Role, Tier};

// =============================================================================
// Kind and state
// =============================================================================

/// What a code is provisioned for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum CodeKind {
    /// General-purpose code, typically multi-use, no credential attached.
    Generic,
    /// Employee-bound code: references a credential the claimant must match.
    Employee,
}

impl CodeKind {
    /// Canonical lowercase name, as stored in the `kind` column.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Generic => "generic",
            Self::Employee => "employee",
        }
    }
}

impl std::str::FromStr for CodeKind {
    type Err = crate::hierarchy::HierarchyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "generic" => Ok(Self::Generic),
            "employee" => Ok(Self::Employee),
            other => Err(crate::hierarchy::HierarchyError::UnknownEnumValue {
                kind: "code kind",
                value: other.to_string(),
            }),
        }
    }
}

impl std::fmt::Display for CodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of an access code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum CodeState {
    /// Claimable: capacity remains and the code is not expired or revoked.
    Available,
    /// Fully used; claimant recorded.
    Claimed,
    /// Capacity exhausted (synonym state kept distinct for multi-use codes
    /// whose final claim was recorded without a claimant, i.e. repaired rows).
    Exhausted,
    /// Past `expires_at`; transitioned by the sweep.
    Expired,
    /// Administratively revoked. Terminal.
    Cancelled,
}

impl CodeState {
    /// Canonical lowercase name, as stored in the `state` column.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Available => "available",
            Self::Claimed => "claimed",
            Self::Exhausted => "exhausted",
            Self::Expired => "expired",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::str::FromStr for CodeState {
    type Err = crate::hierarchy::HierarchyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "available" => Ok(Self::Available),
            "claimed" => Ok(Self::Claimed),
            "exhausted" => Ok(Self::Exhausted),
            "expired" => Ok(Self::Expired),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(crate::hierarchy::HierarchyError::UnknownEnumValue {
                kind: "code state",
                value: other.to_string(),
            }),
        }
    }
}

impl std::fmt::Display for CodeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// AccessCode
// =============================================================================

/// A provisioned entitlement row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessCode {
    /// Row id.
    pub id: i64,
    /// The opaque code string callers present. Unique.
    pub code: String,
    /// What the code is provisioned for.
    pub kind: CodeKind,
    /// Role granted to claimants.
    pub role: Role,
    /// Tier granted to claimants.
    pub tier: Tier,
    /// Total permitted claims.
    pub max_uses: u32,
    /// Claims committed so far.
    pub current_uses: u32,
    /// Expiry, unix seconds. Strict bound; see module docs.
    pub expires_at: i64,
    /// Credential the claimant must match, if any.
    pub credential_id: Option<i64>,
    /// Identity of the most recent successful claimant.
    pub claimant_identity_id: Option<String>,
    /// Lifecycle state.
    pub state: CodeState,
    /// Creation time, unix seconds.
    pub created_at: i64,
    /// Last mutation time, unix seconds.
    pub updated_at: i64,
}

impl AccessCode {
    /// Checks every claim precondition except the credential match, in a
    /// fixed order: existence is the store's concern, then revocation,
    /// expiry, exhaustion.
    ///
    /// # Errors
    ///
    /// Returns the first failing precondition.
    pub fn check_claimable(&self, now: i64) -> Result<(), PreconditionError> {
        match self.state {
            CodeState::Cancelled => return Err(PreconditionError::Cancelled),
            CodeState::Expired => return Err(PreconditionError::Expired),
            CodeState::Available | CodeState::Claimed | CodeState::Exhausted => {},
        }
        if now >= self.expires_at {
            return Err(PreconditionError::Expired);
        }
        if self.current_uses >= self.max_uses
            || matches!(self.state, CodeState::Claimed | CodeState::Exhausted)
        {
            return Err(PreconditionError::Exhausted);
        }
        Ok(())
    }

    /// State the code holds after one more committed claim.
    #[must_use]
    pub const fn state_after_claim(&self) -> CodeState {
        if self.current_uses + 1 >= self.max_uses {
            CodeState::Claimed
        } else {
            CodeState::Available
        }
    }

    /// True when the row violates the claimed-implies-claimant invariant:
    /// a use was reserved but no identity was ever bound. These rows are
    /// what the reconciliation sweep exists to repair.
    #[must_use]
    pub const fn is_partial_claim(&self) -> bool {
        matches!(self.state, CodeState::Claimed | CodeState::Exhausted)
            && self.claimant_identity_id.is_none()
    }
}

// =============================================================================
// Error Types
// =============================================================================

/// A failed claim precondition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PreconditionError {
    /// The code was administratively cancelled.
    #[error("code is cancelled")]
    Cancelled,

    /// The code is past its expiry.
    #[error("code is expired")]
    Expired,

    /// No claim capacity remains.
    #[error("code is exhausted")]
    Exhausted,
}

// =============================================================================
// Tests
// =============================================================================

//! `SQLite`-backed durable store for codes, credentials, and identities.
//!
//! The store owns the one piece of shared mutable state in the system: the
//! access-code row. [`SqliteAccessStore::claim_code`] is the atomic claim
//! transition: a single transaction containing a compare-and-swap-guarded
//! update of the code row, the identity insert (or link), and the credential
//! binding. Either all of it commits or none of it does; the "used but
//! unbound" partial states the old repair scripts patched by hand cannot be
//! produced here.
//!
//! `SQLite` runs in WAL mode with a busy timeout; the connection is shared
//! behind a mutex and every write is a short transaction.

// SQLite returns i64 for counters; the schema CHECK keeps them in u32 range.
// Mutex poisoning indicates a panic in another thread, which is unrecoverable.
#![allow(clippy::cast_sign_loss, clippy::cast_possible_truncation, clippy::missing_panics_doc)]

use std::path::Path;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use idgate_core::claims::IdentityClaims;
use idgate_core::code::{AccessCode, CodeKind, CodeState};
use idgate_core::hierarchy::{AccessLevel, Role, Tier};
use idgate_core::matcher::Credential;
use rusqlite::{Connection, OpenFlags, OptionalExtension, TransactionBehavior, params};
use thiserror::Error;

/// Schema SQL embedded at compile time.
const SCHEMA_SQL: &str = include_str!("schema.sql");

/// Errors from the durable store.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StoreError {
    /// Database error from `SQLite`.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// The claim's compare-and-swap guard did not match: the row changed
    /// under us, expired, or ran out of capacity. The engine re-reads the
    /// row to classify which.
    #[error("claim guard did not match for code id {code_id}")]
    CasMiss {
        /// The code row the guard targeted.
        code_id: i64,
    },

    /// The credential is already bound to a different live identity.
    #[error("credential {credential_id} is already bound to another identity")]
    CredentialTaken {
        /// The contested credential.
        credential_id: i64,
    },

    /// An existing identity is already bound to a different code; identities
    /// are never silently re-bound.
    #[error("identity {identity_id} is already bound to another code")]
    IdentityRebind {
        /// The identity that was offered.
        identity_id: String,
    },

    /// A claim referenced an identity that does not exist.
    #[error("identity not found: {identity_id}")]
    IdentityMissing {
        /// The missing identity id.
        identity_id: String,
    },

    /// A stored enum value failed to parse. Fail-closed: the row is
    /// unusable until repaired, it never defaults to a lower rank.
    #[error("corrupted row in {table} ({key}): {details}")]
    Corrupted {
        /// Table name.
        table: &'static str,
        /// Row key.
        key: String,
        /// What failed to parse.
        details: String,
    },

    /// JSON (de)serialization of the intended-claims blob failed.
    #[error("intended claims serialization: {0}")]
    IntendedClaims(#[from] serde_json::Error),
}

// =============================================================================
// Row types
// =============================================================================

/// Input for provisioning a credential.
#[derive(Debug, Clone, Default)]
pub struct NewCredential {
    /// Expected full name.
    pub full_name: Option<String>,
    /// Expected email.
    pub email: Option<String>,
    /// Expected organizational id.
    pub org_id: Option<String>,
    /// Expected phone.
    pub phone: Option<String>,
    /// Personal namespace assigned on claim.
    pub namespace: Option<String>,
}

/// A stored credential row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialRow {
    /// Row id.
    pub id: i64,
    /// The matchable fields plus the assigned namespace.
    pub fields: Credential,
    /// Identity currently bound to this credential, if any.
    pub bound_identity_id: Option<String>,
}

/// Input for provisioning an access code.
#[derive(Debug, Clone)]
pub struct NewAccessCode {
    /// The opaque code string. Unique.
    pub code: String,
    /// Kind.
    pub kind: CodeKind,
    /// Role granted to claimants.
    pub role: Role,
    /// Tier granted to claimants.
    pub tier: Tier,
    /// Total permitted claims. Must be at least 1.
    pub max_uses: u32,
    /// Expiry, unix seconds.
    pub expires_at: i64,
    /// Credential the claimant must match, if any.
    pub credential_id: Option<i64>,
    /// Expected claimant fields for codes without a provisioned credential.
    pub intended_claims: Option<IdentityClaims>,
}

/// A stored identity row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityRow {
    /// Stable identifier (UUID string).
    pub id: String,
    /// Role.
    pub role: Role,
    /// Tier.
    pub tier: Tier,
    /// Credential this identity was validated against, if any.
    pub credential_id: Option<i64>,
    /// Personal vector namespace, if assigned.
    pub namespace: Option<String>,
    /// Whether the credential match was verified-grade.
    pub verified: bool,
    /// Cached effective level. Display only; never an access decision input.
    pub effective_level: Option<AccessLevel>,
    /// Code that created this identity.
    pub code_id: Option<i64>,
    /// Creation time, unix seconds.
    pub created_at: i64,
    /// Last mutation time, unix seconds.
    pub updated_at: i64,
}

/// The identity half of a claim transaction: create a fresh identity or
/// link an existing one.
#[derive(Debug, Clone)]
pub enum ClaimIdentity {
    /// Insert a new identity row as part of the claim.
    Create {
        /// Pre-generated identity id.
        id: String,
        /// Role copied from the code.
        role: Role,
        /// Tier copied from the code.
        tier: Tier,
        /// Credential matched against, if any.
        credential_id: Option<i64>,
        /// Namespace inherited from the credential, if any.
        namespace: Option<String>,
        /// Verified flag from the match outcome.
        verified: bool,
        /// Cached effective level label.
        effective_level: AccessLevel,
    },
    /// Bind an existing identity. Fails if it is bound to a different code.
    Link {
        /// The existing identity id.
        id: String,
    },
}

impl ClaimIdentity {
    /// The identity id this claim binds.
    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            Self::Create { id, .. } | Self::Link { id } => id,
        }
    }
}

/// All inputs of one atomic claim transition.
#[derive(Debug, Clone)]
pub struct ClaimTransaction {
    /// Target code row.
    pub code_id: i64,
    /// The use count the caller observed; the CAS guard.
    pub expected_uses: u32,
    /// State the code transitions to on success.
    pub next_state: CodeState,
    /// Clock value for the expiry guard and `updated_at` columns.
    pub now: i64,
    /// Identity to create or link.
    pub identity: ClaimIdentity,
    /// Credential to bind to the identity, if the code references one.
    pub credential_id: Option<i64>,
}

// =============================================================================
// SqliteAccessStore
// =============================================================================

/// Durable store for codes, credentials, and identities.
pub struct SqliteAccessStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteAccessStore {
    /// Opens or creates the store at `path`, applying the schema.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or initialized.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = Connection::open_with_flags(
            path.as_ref(),
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        Self::initialize_connection(&conn)?;
        Ok(Self { conn: Arc::new(Mutex::new(conn)) })
    }

    /// Creates an in-memory store for testing.
    ///
    /// # Errors
    ///
    /// Returns an error if the schema cannot be applied.
    pub fn in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        Self::initialize_connection(&conn)?;
        Ok(Self { conn: Arc::new(Mutex::new(conn)) })
    }

    /// Applies schema and pragmas.
    fn initialize_connection(conn: &Connection) -> Result<(), StoreError> {
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Provisioning
    // -------------------------------------------------------------------------

    /// Inserts a credential, returning its row id.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub fn provision_credential(
        &self,
        credential: &NewCredential,
        now: i64,
    ) -> Result<i64, StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO credentials (full_name, email, org_id, phone, namespace, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
            params![
                credential.full_name,
                credential.email,
                credential.org_id,
                credential.phone,
                credential.namespace,
                now,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Inserts an access code in the `available` state, returning its row id.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure (including a duplicate code
    /// string).
    pub fn provision_code(&self, code: &NewAccessCode, now: i64) -> Result<i64, StoreError> {
        let intended = code
            .intended_claims
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO access_codes
                 (code, kind, role, tier, max_uses, current_uses, expires_at,
                  credential_id, intended_claims, state, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6, ?7, ?8, 'available', ?9, ?9)",
            params![
                code.code,
                code.kind.as_str(),
                code.role.as_str(),
                code.tier.as_str(),
                code.max_uses,
                code.expires_at,
                code.credential_id,
                intended,
                now,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    // -------------------------------------------------------------------------
    // Reads
    // -------------------------------------------------------------------------

    /// Looks up a code by its opaque string.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure or a corrupted row.
    pub fn get_code(&self, code: &str) -> Result<Option<AccessCode>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let raw = conn
            .query_row(
                &format!("{CODE_SELECT} WHERE code = ?1"),
                params![code],
                map_raw_code,
            )
            .optional()?;
        raw.map(RawCode::into_code).transpose()
    }

    /// Looks up a code by row id.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure or a corrupted row.
    pub fn get_code_by_id(&self, id: i64) -> Result<Option<AccessCode>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let raw = conn
            .query_row(&format!("{CODE_SELECT} WHERE id = ?1"), params![id], map_raw_code)
            .optional()?;
        raw.map(RawCode::into_code).transpose()
    }

    /// Reads the intended-claims blob for a code, if provisioned.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure or an unparseable blob.
    pub fn get_intended_claims(&self, code_id: i64) -> Result<Option<IdentityClaims>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let blob: Option<Option<String>> = conn
            .query_row(
                "SELECT intended_claims FROM access_codes WHERE id = ?1",
                params![code_id],
                |row| row.get(0),
            )
            .optional()?;
        match blob.flatten() {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    /// Looks up a credential by row id.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub fn get_credential(&self, id: i64) -> Result<Option<CredentialRow>, StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT id, full_name, email, org_id, phone, namespace, bound_identity_id
             FROM credentials WHERE id = ?1",
            params![id],
            |row| {
                Ok(CredentialRow {
                    id: row.get(0)?,
                    fields: Credential {
                        full_name: row.get(1)?,
                        email: row.get(2)?,
                        org_id: row.get(3)?,
                        phone: row.get(4)?,
                        namespace: row.get(5)?,
                    },
                    bound_identity_id: row.get(6)?,
                })
            },
        )
        .optional()
        .map_err(StoreError::from)
    }

    /// Looks up an identity by id.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure or a corrupted row.
    pub fn get_identity(&self, id: &str) -> Result<Option<IdentityRow>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let raw = conn
            .query_row(
                "SELECT id, role, tier, credential_id, namespace, verified,
                        effective_level, code_id, created_at, updated_at
                 FROM identities WHERE id = ?1",
                params![id],
                |row| {
                    Ok(RawIdentity {
                        id: row.get(0)?,
                        role: row.get(1)?,
                        tier: row.get(2)?,
                        credential_id: row.get(3)?,
                        namespace: row.get(4)?,
                        verified: row.get(5)?,
                        effective_level: row.get(6)?,
                        code_id: row.get(7)?,
                        created_at: row.get(8)?,
                        updated_at: row.get(9)?,
                    })
                },
            )
            .optional()?;
        raw.map(RawIdentity::into_identity).transpose()
    }

    // -------------------------------------------------------------------------
    // The atomic claim
    // -------------------------------------------------------------------------

    /// Commits one claim: CAS-guarded code update, identity insert/link, and
    /// credential binding, in a single transaction.
    ///
    /// The guard requires the row to still be `available`, unexpired, under
    /// capacity, and at exactly `expected_uses`. Two racers for the last use
    /// both pass the engine's precondition read, but only one guard matches;
    /// the loser gets [`StoreError::CasMiss`] and nothing it wrote survives.
    ///
    /// # Errors
    ///
    /// [`StoreError::CasMiss`], [`StoreError::CredentialTaken`],
    /// [`StoreError::IdentityRebind`], [`StoreError::IdentityMissing`], or a
    /// database error. On any error the transaction rolls back whole.
    pub fn claim_code(&self, claim: &ClaimTransaction) -> Result<(), StoreError> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let identity_id = claim.identity.id().to_string();
        let updated = tx.execute(
            "UPDATE access_codes
                SET current_uses = current_uses + 1,
                    claimant_identity_id = ?1,
                    state = ?2,
                    updated_at = ?3
              WHERE id = ?4
                AND state = 'available'
                AND current_uses = ?5
                AND current_uses < max_uses
                AND expires_at > ?3",
            params![
                identity_id,
                claim.next_state.as_str(),
                claim.now,
                claim.code_id,
                claim.expected_uses,
            ],
        )?;
        if updated == 0 {
            return Err(StoreError::CasMiss { code_id: claim.code_id });
        }

        match &claim.identity {
            ClaimIdentity::Create {
                id,
                role,
                tier,
                credential_id,
                namespace,
                verified,
                effective_level,
            } => {
                tx.execute(
                    "INSERT INTO identities
                         (id, role, tier, credential_id, namespace, verified,
                          effective_level, code_id, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)",
                    params![
                        id,
                        role.as_str(),
                        tier.as_str(),
                        credential_id,
                        namespace,
                        verified,
                        effective_level.as_str(),
                        claim.code_id,
                        claim.now,
                    ],
                )?;
            },
            ClaimIdentity::Link { id } => {
                let linked = tx.execute(
                    "UPDATE identities
                        SET code_id = ?1, updated_at = ?2
                      WHERE id = ?3 AND (code_id IS NULL OR code_id = ?1)",
                    params![claim.code_id, claim.now, id],
                )?;
                if linked == 0 {
                    let exists: bool = tx.query_row(
                        "SELECT EXISTS(SELECT 1 FROM identities WHERE id = ?1)",
                        params![id],
                        |row| row.get(0),
                    )?;
                    return Err(if exists {
                        StoreError::IdentityRebind { identity_id: id.clone() }
                    } else {
                        StoreError::IdentityMissing { identity_id: id.clone() }
                    });
                }
            },
        }

        if let Some(credential_id) = claim.credential_id {
            let bound = tx.execute(
                "UPDATE credentials
                    SET bound_identity_id = ?1, updated_at = ?2
                  WHERE id = ?3
                    AND (bound_identity_id IS NULL OR bound_identity_id = ?1)",
                params![identity_id, claim.now, credential_id],
            )?;
            if bound == 0 {
                return Err(StoreError::CredentialTaken { credential_id });
            }
        }

        tx.commit()?;
        Ok(())
    }

    /// Updates the cached effective-level label on an identity.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub fn set_identity_effective_level(
        &self,
        identity_id: &str,
        level: AccessLevel,
        now: i64,
    ) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE identities SET effective_level = ?1, updated_at = ?2 WHERE id = ?3",
            params![level.as_str(), now, identity_id],
        )?;
        Ok(())
    }

    /// Administrative correction of an identity's role and tier.
    ///
    /// Returns whether a row was updated. The caller is responsible for
    /// re-resolving and re-caching the effective level; retrieval filters
    /// pick the change up on their next fresh resolve regardless.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub fn update_identity_grants(
        &self,
        identity_id: &str,
        role: Role,
        tier: Tier,
        now: i64,
    ) -> Result<bool, StoreError> {
        let conn = self.conn.lock().unwrap();
        let n = conn.execute(
            "UPDATE identities SET role = ?1, tier = ?2, updated_at = ?3 WHERE id = ?4",
            params![role.as_str(), tier.as_str(), now, identity_id],
        )?;
        Ok(n > 0)
    }

    /// Cancels a code. Codes are never hard-deleted.
    ///
    /// Returns whether a row was transitioned.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub fn cancel_code(&self, code: &str, now: i64) -> Result<bool, StoreError> {
        let conn = self.conn.lock().unwrap();
        let n = conn.execute(
            "UPDATE access_codes SET state = 'cancelled', updated_at = ?1
             WHERE code = ?2 AND state != 'cancelled'",
            params![now, code],
        )?;
        Ok(n > 0)
    }

    // -------------------------------------------------------------------------
    // Sweep support
    // -------------------------------------------------------------------------

    /// Finds codes whose use counter was consumed without a claimant bound
    /// ("used but unbound"), last touched at or before `cutoff`.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure or a corrupted row.
    pub fn find_partial_claims(
        &self,
        cutoff: i64,
        limit: usize,
    ) -> Result<Vec<AccessCode>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "{CODE_SELECT}
              WHERE state IN ('claimed', 'exhausted')
                AND claimant_identity_id IS NULL
                AND updated_at <= ?1
              ORDER BY updated_at ASC
              LIMIT ?2"
        ))?;
        let raw = stmt
            .query_map(params![cutoff, limit as i64], map_raw_code)?
            .collect::<Result<Vec<_>, _>>()?;
        raw.into_iter().map(RawCode::into_code).collect()
    }

    /// Finds claimed codes whose claimant identity row does not exist
    /// (dangling binding), last touched at or before `cutoff`.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure or a corrupted row.
    pub fn find_dangling_claims(
        &self,
        cutoff: i64,
        limit: usize,
    ) -> Result<Vec<AccessCode>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "{CODE_SELECT}
              WHERE claimant_identity_id IS NOT NULL
                AND claimant_identity_id NOT IN (SELECT id FROM identities)
                AND updated_at <= ?1
              ORDER BY updated_at ASC
              LIMIT ?2"
        ))?;
        let raw = stmt
            .query_map(params![cutoff, limit as i64], map_raw_code)?
            .collect::<Result<Vec<_>, _>>()?;
        raw.into_iter().map(RawCode::into_code).collect()
    }

    /// Releases one reserved-but-unbound use back to `available`.
    ///
    /// The guard re-states the finder predicates exactly, so a row a
    /// concurrent legitimate claim touched in between is left alone and a
    /// second release of the same row is a no-op. Returns whether a row was
    /// released.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub fn release_reserved_use(&self, code_id: i64, now: i64) -> Result<bool, StoreError> {
        let conn = self.conn.lock().unwrap();
        let n = conn.execute(
            "UPDATE access_codes
                SET current_uses = current_uses - 1,
                    claimant_identity_id = NULL,
                    state = 'available',
                    updated_at = ?1
              WHERE id = ?2
                AND current_uses > 0
                AND ((state IN ('claimed', 'exhausted') AND claimant_identity_id IS NULL)
                     OR (claimant_identity_id IS NOT NULL
                         AND claimant_identity_id NOT IN (SELECT id FROM identities)))",
            params![now, code_id],
        )?;
        Ok(n > 0)
    }

    /// Test hook for injecting out-of-band row states (the states the
    /// sweep exists to repair cannot be produced through the public API).
    #[cfg(test)]
    pub(crate) fn raw_execute(
        &self,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> Result<usize, StoreError> {
        let conn = self.conn.lock().unwrap();
        // The injected states stand in for writes from a foreign connection
        // or a legacy row predating the constraint; such a writer does not
        // enforce this connection's foreign keys, so disable enforcement for
        // the injection to reproduce the dangling state the sweep repairs.
        conn.pragma_update(None, "foreign_keys", false)?;
        let result = conn.execute(sql, params);
        conn.pragma_update(None, "foreign_keys", true)?;
        Ok(result?)
    }

    /// Transitions past-expiry `available` codes to `expired`.
    ///
    /// Returns the number of rows transitioned (bounded by `limit`).
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub fn expire_overdue_codes(&self, now: i64, limit: usize) -> Result<usize, StoreError> {
        let conn = self.conn.lock().unwrap();
        let n = conn.execute(
            "UPDATE access_codes
                SET state = 'expired', updated_at = ?1
              WHERE id IN (
                    SELECT id FROM access_codes
                     WHERE state = 'available' AND expires_at <= ?1
                     LIMIT ?2)",
            params![now, limit as i64],
        )?;
        Ok(n)
    }
}

// =============================================================================
// Row mapping
// =============================================================================

const CODE_SELECT: &str = "SELECT id, code, kind, role, tier, max_uses, current_uses,
        expires_at, credential_id, claimant_identity_id, state, created_at, updated_at
   FROM access_codes";

struct RawCode {
    id: i64,
    code: String,
    kind: String,
    role: String,
    tier: String,
    max_uses: i64,
    current_uses: i64,
    expires_at: i64,
    credential_id: Option<i64>,
    claimant_identity_id: Option<String>,
    state: String,
    created_at: i64,
    updated_at: i64,
}

fn map_raw_code(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawCode> {
    Ok(RawCode {
        id: row.get(0)?,
        code: row.get(1)?,
        kind: row.get(2)?,
        role: row.get(3)?,
        tier: row.get(4)?,
        max_uses: row.get(5)?,
        current_uses: row.get(6)?,
        expires_at: row.get(7)?,
        credential_id: row.get(8)?,
        claimant_identity_id: row.get(9)?,
        state: row.get(10)?,
        created_at: row.get(11)?,
        updated_at: row.get(12)?,
    })
}

impl RawCode {
    fn into_code(self) -> Result<AccessCode, StoreError> {
        let corrupted = |details: String| StoreError::Corrupted {
            table: "access_codes",
            key: self.code.clone(),
            details,
        };
        Ok(AccessCode {
            id: self.id,
            kind: CodeKind::from_str(&self.kind).map_err(|e| corrupted(e.to_string()))?,
            role: Role::from_str(&self.role).map_err(|e| corrupted(e.to_string()))?,
            tier: Tier::from_str(&self.tier).map_err(|e| corrupted(e.to_string()))?,
            state: CodeState::from_str(&self.state).map_err(|e| corrupted(e.to_string()))?,
            code: self.code,
            max_uses: self.max_uses as u32,
            current_uses: self.current_uses as u32,
            expires_at: self.expires_at,
            credential_id: self.credential_id,
            claimant_identity_id: self.claimant_identity_id,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

struct RawIdentity {
    id: String,
    role: String,
    tier: String,
    credential_id: Option<i64>,
    namespace: Option<String>,
    verified: bool,
    effective_level: Option<String>,
    code_id: Option<i64>,
    created_at: i64,
    updated_at: i64,
}

impl RawIdentity {
    fn into_identity(self) -> Result<IdentityRow, StoreError> {
        let corrupted = |details: String| StoreError::Corrupted {
            table: "identities",
            key: self.id.clone(),
            details,
        };
        Ok(IdentityRow {
            role: Role::from_str(&self.role).map_err(|e| corrupted(e.to_string()))?,
            tier: Tier::from_str(&self.tier).map_err(|e| corrupted(e.to_string()))?,
            effective_level: self
                .effective_level
                .as_deref()
                .map(AccessLevel::from_str)
                .transpose()
                .map_err(|e| corrupted(e.to_string()))?,
            id: self.id,
            credential_id: self.credential_id,
            namespace: self.namespace,
            verified: self.verified,
            code_id: self.code_id,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

// =============================================================================
// Tests
// =============================================================================

//! Core domain logic for the idgate access platform.
//!
//! This crate contains the pure, I/O-free half of the identity claim and
//! access-controlled retrieval core:
//!
//! - [`hierarchy`]: ordered role/tier/access-level enumerations and the
//!   per-level requirement table
//! - [`claims`]: self-reported identity claims with validation and
//!   normalization
//! - [`matcher`]: weighted credential matching with configurable thresholds
//! - [`profile`]: access-profile resolution and permitted-level computation
//! - [`code`]: access-code lifecycle rules and claim preconditions
//! - [`scope`]: retrieval-scope construction and namespace isolation rules
//!
//! Everything here is deterministic over its inputs plus configuration.
//! Durable state, the atomic claim transaction, and the retrieval gateway
//! live in `idgate-daemon`.

#![warn(missing_docs)]

pub mod claims;
pub mod code;
pub mod hierarchy;
pub mod matcher;
pub mod profile;
pub mod scope;

pub use claims::{ClaimsError, IdentityClaims};
pub use code::{AccessCode, CodeKind, CodeState, PreconditionError};
pub use hierarchy::{AccessLevel, HierarchyError, LevelRequirement, Role, Tier};
pub use matcher::{Credential, MatchOutcome, MatchStatus, MatcherConfig, match_claims};
pub use profile::{AccessProfile, ResolverConfig, permitted_levels, resolve};
pub use scope::{ParsedQuery, RetrievalScope, ScopeError, ScopeTarget, build_scope, parse_query};

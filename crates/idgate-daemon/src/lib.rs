//! The idgate daemon: durable claim engine and retrieval gateway.
//!
//! This crate is the I/O half of the access core:
//!
//! - [`store`]: `SQLite` persistence with the atomic claim transaction
//! - [`claim`]: the code claim engine (preconditions, matching, CAS retry)
//! - [`sweep`]: the reconciliation sweep replacing manual repair tooling
//! - [`embedding`] / [`vector`]: injected clients for the external services
//! - [`retrieval`]: the namespace-isolated retrieval gateway
//! - [`config`]: TOML configuration with fail-closed validation
//! - [`http`]: the axum surface (`POST /claim`, `POST /search`)
//!
//! Pure domain logic (hierarchies, matching, profile resolution, scope
//! rules) lives in `idgate-core`; this crate wires it to storage, clock,
//! and network.

#![warn(missing_docs)]

pub mod claim;
pub mod config;
pub mod embedding;
pub mod http;
pub mod retrieval;
pub mod store;
pub mod sweep;
pub mod vector;

pub use claim::{ClaimEngine, ClaimError, ClaimOutcome, ClaimRequest};
pub use config::{ConfigError, GatewayConfig};
pub use retrieval::{RetrievalError, RetrievalGateway, RetrievalOptions, SearchRequest};
pub use store::{SqliteAccessStore, StoreError};
pub use sweep::{SweepReport, run_sweep};

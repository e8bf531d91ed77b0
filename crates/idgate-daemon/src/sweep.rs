//! Reconciliation sweep for partial claim states.
//!
//! The claim engine commits the use-counter increment and the identity
//! binding in one transaction, so it cannot produce a "used but unbound"
//! code. Rows in that state still occur in practice (administrative edits,
//! foreign writers sharing the database, imported legacy data) and used to
//! be patched by hand with ad-hoc repair scripts. The sweep replaces those
//! scripts: a bounded, idempotent pass that
//!
//! 1. releases reserved-but-unbound uses older than a grace period back to
//!    `available`,
//! 2. releases claims whose claimant identity row no longer exists, and
//! 3. transitions past-expiry `available` codes to `expired`.
//!
//! The grace period keeps the sweep from racing an in-flight claim; the
//! release update re-checks its predicate, so even a mistimed pass cannot
//! undo a legitimate binding. Running the sweep twice produces the same
//! state as running it once.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::claim::unix_now;
use crate::store::{SqliteAccessStore, StoreError};

/// Maximum rows examined per category per pass.
pub const MAX_SWEEP_ENTRIES: usize = 1024;

/// What one sweep pass found and did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Unbound reservations examined.
    pub partial_found: usize,
    /// Unbound reservations released.
    pub partial_released: usize,
    /// Dangling claimant bindings examined.
    pub dangling_found: usize,
    /// Dangling claimant bindings released.
    pub dangling_released: usize,
    /// Codes transitioned to `expired`.
    pub expired: usize,
}

impl SweepReport {
    /// True when the pass changed nothing.
    #[must_use]
    pub const fn is_clean(&self) -> bool {
        self.partial_released == 0 && self.dangling_released == 0 && self.expired == 0
    }
}

/// Runs one reconciliation pass at the current wall-clock time.
///
/// # Errors
///
/// Returns the first store error encountered; partial progress before the
/// error is already committed (each repair is its own guarded update).
pub fn run_sweep(store: &SqliteAccessStore, grace: Duration) -> Result<SweepReport, StoreError> {
    run_sweep_at(store, grace, unix_now())
}

/// Runs one reconciliation pass at an explicit clock value.
///
/// # Errors
///
/// Returns the first store error encountered.
pub fn run_sweep_at(
    store: &SqliteAccessStore,
    grace: Duration,
    now: i64,
) -> Result<SweepReport, StoreError> {
    let cutoff = now - grace.as_secs() as i64;
    let mut report = SweepReport::default();

    let partial = store.find_partial_claims(cutoff, MAX_SWEEP_ENTRIES)?;
    report.partial_found = partial.len();
    for code in &partial {
        if store.release_reserved_use(code.id, now)? {
            report.partial_released += 1;
            warn!(code = %code.code, "released unbound claim reservation");
        }
    }

    let dangling = store.find_dangling_claims(cutoff, MAX_SWEEP_ENTRIES)?;
    report.dangling_found = dangling.len();
    for code in &dangling {
        if store.release_reserved_use(code.id, now)? {
            report.dangling_released += 1;
            warn!(code = %code.code, "released claim with missing claimant identity");
        }
    }

    report.expired = store.expire_overdue_codes(now, MAX_SWEEP_ENTRIES)?;

    if !report.is_clean() {
        info!(
            partial = report.partial_released,
            dangling = report.dangling_released,
            expired = report.expired,
            "reconciliation sweep repaired state"
        );
    }
    Ok(report)
}

/// Runs the sweep forever on `interval`. Errors are logged and the loop
/// continues; a failing sweep must not take the daemon down.
pub async fn sweep_loop(store: Arc<SqliteAccessStore>, interval: Duration, grace: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        match run_sweep(&store, grace) {
            Ok(report) if !report.is_clean() => {
                info!(?report, "sweep pass complete");
            },
            Ok(_) => {},
            Err(error) => {
                warn!(%error, "sweep pass failed");
            },
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

//! Concurrent claim properties over a shared database file.
//!
//! Each thread opens its own connection to the same `SQLite` file, so the
//! compare-and-swap guard is exercised across real connections, not through
//! a shared in-process lock. The properties under test:
//!
//! - `max_uses = n`, `n + k` concurrent claims: exactly `n` succeed and the
//!   `k` losers observe `Exhausted`.
//! - No run leaves `current_uses > max_uses` or a claimed code without a
//!   linked identity.

use std::sync::{Arc, Barrier};
use std::thread;

use idgate_core::claims::IdentityClaims;
use idgate_core::code::{CodeKind, CodeState};
use idgate_core::hierarchy::{Role, Tier};
use idgate_core::matcher::MatcherConfig;
use idgate_core::profile::ResolverConfig;
use idgate_daemon::claim::{ClaimEngine, ClaimError, ClaimRequest};
use idgate_daemon::store::{NewAccessCode, SqliteAccessStore};
use tempfile::TempDir;

fn provision(store: &SqliteAccessStore, code: &str, max_uses: u32) {
    store
        .provision_code(
            &NewAccessCode {
                code: code.to_string(),
                kind: CodeKind::Generic,
                role: Role::User,
                tier: Tier::Free,
                max_uses,
                expires_at: i64::MAX,
                credential_id: None,
                intended_claims: None,
            },
            0,
        )
        .expect("provision code");
}

fn claims_for(worker: usize) -> IdentityClaims {
    IdentityClaims {
        email: Some(format!("worker-{worker}@example.com")),
        ..IdentityClaims::default()
    }
}

/// Spawns `workers` threads claiming `code` once each, every thread on its
/// own database connection. Returns the per-thread results.
fn race_claims(
    dir: &TempDir,
    code: &str,
    workers: usize,
) -> Vec<Result<idgate_daemon::claim::ClaimOutcome, ClaimError>> {
    let db_path = dir.path().join("idgate.db");
    let barrier = Arc::new(Barrier::new(workers));

    let handles: Vec<_> = (0..workers)
        .map(|worker| {
            let db_path = db_path.clone();
            let barrier = Arc::clone(&barrier);
            let code = code.to_string();
            thread::spawn(move || {
                let store = Arc::new(SqliteAccessStore::open(&db_path).expect("open store"));
                let engine = ClaimEngine::new(
                    store,
                    MatcherConfig::default(),
                    ResolverConfig::default(),
                );
                let request = ClaimRequest {
                    code,
                    claims: claims_for(worker),
                    identity_id: None,
                };
                barrier.wait();
                engine.claim(&request)
            })
        })
        .collect();

    handles.into_iter().map(|h| h.join().expect("thread panicked")).collect()
}

#[test]
fn exactly_n_claims_succeed_for_n_uses() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = SqliteAccessStore::open(dir.path().join("idgate.db")).expect("open store");
    provision(&store, "CODE-N", 3);

    let results = race_claims(&dir, "CODE-N", 8);

    let successes: Vec<_> = results.iter().filter(|r| r.is_ok()).collect();
    assert_eq!(successes.len(), 3, "exactly max_uses claims must win");
    for result in &results {
        if let Err(error) = result {
            assert!(
                matches!(error, ClaimError::Exhausted),
                "losers must observe Exhausted, got {error:?}"
            );
        }
    }

    let code = store.get_code("CODE-N").expect("read code").expect("code exists");
    assert_eq!(code.current_uses, 3);
    assert!(code.current_uses <= code.max_uses);
    assert_eq!(code.state, CodeState::Claimed);
    assert!(code.claimant_identity_id.is_some(), "claimed code must have a claimant");

    // Every winner's identity exists and is linked to this code.
    for result in results.iter().flatten() {
        let identity = store
            .get_identity(&result.identity_id)
            .expect("read identity")
            .expect("winner identity must exist");
        assert_eq!(identity.code_id, Some(code.id));
    }
}

#[test]
fn single_use_race_has_one_winner() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = SqliteAccessStore::open(dir.path().join("idgate.db")).expect("open store");
    provision(&store, "CODE-1", 1);

    let results = race_claims(&dir, "CODE-1", 2);

    let winners: Vec<_> = results.iter().flatten().collect();
    assert_eq!(winners.len(), 1, "exactly one claim must win the last use");
    let losers: Vec<_> = results.iter().filter(|r| r.is_err()).collect();
    assert_eq!(losers.len(), 1);
    assert!(matches!(losers[0], Err(ClaimError::Exhausted)));

    // The winner's binding was not overwritten by the loser.
    let code = store.get_code("CODE-1").expect("read code").expect("code exists");
    assert_eq!(code.current_uses, 1);
    assert_eq!(
        code.claimant_identity_id.as_deref(),
        Some(winners[0].identity_id.as_str())
    );
}

#[test]
fn repeated_races_never_overcommit() {
    for round in 0..3 {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = SqliteAccessStore::open(dir.path().join("idgate.db")).expect("open store");
        let code = format!("CODE-R{round}");
        provision(&store, &code, 2);

        let results = race_claims(&dir, &code, 6);
        let successes = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(successes, 2);

        let row = store.get_code(&code).expect("read code").expect("code exists");
        assert_eq!(row.current_uses, 2);
        assert!(!row.is_partial_claim(), "no run may leave a claimed code unbound");
    }
}

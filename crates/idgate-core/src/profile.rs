//! Access-profile resolution.
//!
//! [`resolve`] turns an identity's durable facts (role, tier, verified flag)
//! into an [`AccessProfile`]: a normalized score, an effective access level,
//! and the set of levels the identity may retrieve. It is a pure function
//! and must be recomputed from fresh durable state whenever role, tier, or
//! verification changes, and before every retrieval filter is built; a
//! stale cached profile is a privilege bug in both directions.
//!
//! Two independent notions live here:
//!
//! - the **effective level**, a score-derived summary cached on the identity
//!   row for display; and
//! - the **permitted level set**, the union of everything the role ladder
//!   unlocks and everything the tier ladder unlocks. Retrieval filtering
//!   uses only the permitted set, never the cached summary.

use serde::{Deserialize, Serialize};

use crate::hierarchy::{AccessLevel, Role, Tier};

// =============================================================================
// Configuration
// =============================================================================

/// Resolver thresholds, serialized as the `[resolver]` configuration
/// section.
///
/// The score ladder maps the effective score onto an [`AccessLevel`]; the
/// boost rewards verified credentials. Both are policy defaults, not
/// business law.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResolverConfig {
    /// Score at or above which the effective level is `executive`.
    #[serde(default = "default_executive_threshold")]
    pub executive_threshold: f64,

    /// Score at or above which the effective level is `advanced`.
    #[serde(default = "default_advanced_threshold")]
    pub advanced_threshold: f64,

    /// Score at or above which the effective level is `intermediate`;
    /// below it the effective level is `basic`.
    #[serde(default = "default_intermediate_threshold")]
    pub intermediate_threshold: f64,

    /// Multiplicative boost applied to the base score when the identity
    /// holds a verified credential. The boosted score is capped at 1.0.
    #[serde(default = "default_verified_boost")]
    pub verified_boost: f64,
}

const fn default_executive_threshold() -> f64 {
    0.8
}
const fn default_advanced_threshold() -> f64 {
    0.6
}
const fn default_intermediate_threshold() -> f64 {
    0.4
}
const fn default_verified_boost() -> f64 {
    1.2
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            executive_threshold: default_executive_threshold(),
            advanced_threshold: default_advanced_threshold(),
            intermediate_threshold: default_intermediate_threshold(),
            verified_boost: default_verified_boost(),
        }
    }
}

// =============================================================================
// AccessProfile
// =============================================================================

/// The resolved access posture of one identity.
///
/// Derived, never persisted beyond the display cache; see the module docs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessProfile {
    /// Role the profile was resolved from.
    pub role: Role,
    /// Tier the profile was resolved from.
    pub tier: Tier,
    /// Whether a verified credential boosted the score.
    pub verified: bool,
    /// Normalized base score in `[0, 1]` before the boost.
    pub base_score: f64,
    /// Score after the verified boost, capped at 1.0.
    pub effective_score: f64,
    /// Score-derived summary level.
    pub effective_level: AccessLevel,
    /// Levels the identity may retrieve, ascending rank order.
    pub permitted_levels: Vec<AccessLevel>,
}

impl AccessProfile {
    /// True when `level` is in the permitted set.
    #[must_use]
    pub fn permits(&self, level: AccessLevel) -> bool {
        self.permitted_levels.contains(&level)
    }
}

// =============================================================================
// Resolution
// =============================================================================

/// Resolves an [`AccessProfile`] from role, tier, and verification state.
///
/// `base = (role_rank + 1 + tier_rank + 1) / (role_count + tier_count)`,
/// normalized to `[0, 1]`; verified identities get the configured
/// multiplicative boost, capped at 1.0. The effective level is the highest
/// ladder rung whose threshold the effective score clears.
#[must_use]
pub fn resolve(role: Role, tier: Tier, verified: bool, config: &ResolverConfig) -> AccessProfile {
    let base_score = f64::from(role.rank() + 1 + tier.rank() + 1)
        / f64::from(Role::COUNT + Tier::COUNT);

    let effective_score = if verified {
        (base_score * config.verified_boost).min(1.0)
    } else {
        base_score
    };

    let effective_level = if effective_score >= config.executive_threshold {
        AccessLevel::Executive
    } else if effective_score >= config.advanced_threshold {
        AccessLevel::Advanced
    } else if effective_score >= config.intermediate_threshold {
        AccessLevel::Intermediate
    } else {
        AccessLevel::Basic
    };

    AccessProfile {
        role,
        tier,
        verified,
        base_score,
        effective_score,
        effective_level,
        permitted_levels: permitted_levels(role, tier),
    }
}

/// Returns the levels reachable via the role hierarchy or the tier
/// hierarchy, in ascending rank order.
///
/// The union is deliberate: an identity need only qualify through one
/// hierarchy. A `manager` on the `free` tier is permitted everything the
/// manager role unlocks even though the free tier alone stops at `basic`.
#[must_use]
pub fn permitted_levels(role: Role, tier: Tier) -> Vec<AccessLevel> {
    AccessLevel::all()
        .filter(|level| {
            let req = level.requirement();
            role >= req.min_role || tier >= req.min_tier
        })
        .collect()
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_score_bounds() {
        let lowest = resolve(Role::User, Tier::Free, false, &ResolverConfig::default());
        assert!((lowest.base_score - 0.2).abs() < 1e-9);

        let highest = resolve(Role::Ceo, Tier::Enterprise, false, &ResolverConfig::default());
        assert!((highest.base_score - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_verified_boost_capped() {
        let config = ResolverConfig::default();
        let boosted = resolve(Role::Ceo, Tier::Enterprise, true, &config);
        assert!((boosted.effective_score - 1.0).abs() < 1e-9);

        let mid = resolve(Role::Senior, Tier::Basic, true, &config);
        // base = (3 + 2) / 10 = 0.5, boosted to 0.6
        assert!((mid.effective_score - 0.6).abs() < 1e-9);
        assert_eq!(mid.effective_level, AccessLevel::Advanced);

        let unboosted = resolve(Role::Senior, Tier::Basic, false, &config);
        assert!((unboosted.effective_score - 0.5).abs() < 1e-9);
        assert_eq!(unboosted.effective_level, AccessLevel::Intermediate);
    }

    #[test]
    fn test_effective_level_ladder() {
        let config = ResolverConfig::default();
        assert_eq!(
            resolve(Role::Ceo, Tier::Enterprise, false, &config).effective_level,
            AccessLevel::Executive
        );
        assert_eq!(
            resolve(Role::User, Tier::Free, false, &config).effective_level,
            AccessLevel::Basic
        );
    }

    #[test]
    fn test_manager_on_free_tier_reaches_advanced() {
        // The tier alone stops at basic; the role hierarchy carries the
        // identity to advanced and confidential regardless.
        let profile = resolve(Role::Manager, Tier::Free, false, &ResolverConfig::default());
        assert!(profile.permits(AccessLevel::Advanced));
        assert!(profile.permits(AccessLevel::Confidential));
        assert!(!profile.permits(AccessLevel::Executive));

        let tier_only = permitted_levels(Role::User, Tier::Free);
        assert_eq!(tier_only, vec![AccessLevel::Public, AccessLevel::Basic]);
    }

    #[test]
    fn test_enterprise_tier_alone_reaches_executive() {
        let levels = permitted_levels(Role::User, Tier::Enterprise);
        assert!(levels.contains(&AccessLevel::Executive));
    }

    #[test]
    fn test_permitted_levels_sorted_ascending() {
        for role in Role::all() {
            for tier in Tier::all() {
                let levels = permitted_levels(role, tier);
                assert!(!levels.is_empty());
                for pair in levels.windows(2) {
                    assert!(pair[0] < pair[1]);
                }
            }
        }
    }

    #[test]
    fn test_resolution_is_deterministic() {
        let config = ResolverConfig::default();
        for role in Role::all() {
            for tier in Tier::all() {
                for verified in [false, true] {
                    let first = resolve(role, tier, verified, &config);
                    let second = resolve(role, tier, verified, &config);
                    assert_eq!(first, second);
                }
            }
        }
    }

    mod properties {
        use proptest::prelude::*;

        use super::*;

        fn any_role() -> impl Strategy<Value = Role> {
            prop::sample::select(Role::all().collect::<Vec<_>>())
        }

        fn any_tier() -> impl Strategy<Value = Tier> {
            prop::sample::select(Tier::all().collect::<Vec<_>>())
        }

        proptest! {
            /// Raising either hierarchy independently never removes access.
            #[test]
            fn permitted_levels_monotonic(role in any_role(), tier in any_tier()) {
                let base: Vec<_> = permitted_levels(role, tier);

                let role_floor = permitted_levels(Role::User, tier);
                for level in &role_floor {
                    prop_assert!(base.contains(level),
                        "raising role from user to {role} removed {level}");
                }

                let tier_floor = permitted_levels(role, Tier::Free);
                for level in &tier_floor {
                    prop_assert!(base.contains(level),
                        "raising tier from free to {tier} removed {level}");
                }
            }

            /// The verified boost never lowers the effective score.
            #[test]
            fn boost_never_lowers_score(role in any_role(), tier in any_tier()) {
                let config = ResolverConfig::default();
                let plain = resolve(role, tier, false, &config);
                let boosted = resolve(role, tier, true, &config);
                prop_assert!(boosted.effective_score >= plain.effective_score);
                prop_assert!(boosted.effective_score <= 1.0);
            }
        }
    }
}

//! Ordered role, tier, and access-level hierarchies.
//!
//! This module defines the three static hierarchies every access decision is
//! built from:
//!
//! - [`Role`]: organizational rank, `user < junior < senior < manager <
//!   admin < ceo`
//! - [`Tier`]: subscription rank, `free < basic < pro < enterprise`
//! - [`AccessLevel`]: the content ladder, `public < basic < intermediate <
//!   advanced < confidential < executive`
//!
//! Each enum carries an explicit [`rank`](Role::rank) mapping rather than
//! relying on variant order, so adding a variant can never silently renumber
//! existing ranks. Each [`AccessLevel`] has a [`LevelRequirement`] naming the
//! minimum role and minimum tier that unlock it; an identity qualifies for a
//! level through **either** hierarchy (see `profile::permitted_levels`).
//!
//! # Security Model
//!
//! Parsing is fail-closed: an unknown role, tier, or level name is an
//! [`HierarchyError::UnknownEnumValue`] error, never a silent default to the
//! lowest rank. A silent default would widen privileges for typo'd or
//! tampered inputs.

use serde::{Deserialize, Serialize};

// =============================================================================
// Role
// =============================================================================

/// Organizational role rank, lowest to highest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum Role {
    /// External or unprivileged user. Lowest rank.
    #[default]
    User,
    /// Junior employee.
    Junior,
    /// Senior employee.
    Senior,
    /// Manager.
    Manager,
    /// Administrator.
    Admin,
    /// Chief executive. Highest rank.
    Ceo,
}

impl Role {
    /// Returns the numeric rank of this role.
    ///
    /// Higher ranks indicate more privilege. Ranks are explicitly assigned
    /// so comparison remains correct even if variants are reordered.
    #[must_use]
    pub const fn rank(self) -> u8 {
        match self {
            Self::User => 0,
            Self::Junior => 1,
            Self::Senior => 2,
            Self::Manager => 3,
            Self::Admin => 4,
            Self::Ceo => 5,
        }
    }

    /// Number of roles in the hierarchy.
    pub const COUNT: u8 = 6;

    /// Returns an iterator over all roles in ascending rank order.
    pub fn all() -> impl Iterator<Item = Self> {
        [
            Self::User,
            Self::Junior,
            Self::Senior,
            Self::Manager,
            Self::Admin,
            Self::Ceo,
        ]
        .into_iter()
    }

    /// Canonical lowercase name for this role.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Junior => "junior",
            Self::Senior => "senior",
            Self::Manager => "manager",
            Self::Admin => "admin",
            Self::Ceo => "ceo",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = HierarchyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "junior" => Ok(Self::Junior),
            "senior" => Ok(Self::Senior),
            "manager" => Ok(Self::Manager),
            "admin" => Ok(Self::Admin),
            "ceo" => Ok(Self::Ceo),
            other => Err(HierarchyError::UnknownEnumValue {
                kind: "role",
                value: other.to_string(),
            }),
        }
    }
}

impl PartialOrd for Role {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Role {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.rank().cmp(&other.rank())
    }
}

// =============================================================================
// Tier
// =============================================================================

/// Subscription tier rank, lowest to highest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum Tier {
    /// Free tier. Lowest rank.
    #[default]
    Free,
    /// Basic paid tier.
    Basic,
    /// Professional tier.
    Pro,
    /// Enterprise tier. Highest rank.
    Enterprise,
}

impl Tier {
    /// Returns the numeric rank of this tier.
    #[must_use]
    pub const fn rank(self) -> u8 {
        match self {
            Self::Free => 0,
            Self::Basic => 1,
            Self::Pro => 2,
            Self::Enterprise => 3,
        }
    }

    /// Number of tiers in the hierarchy.
    pub const COUNT: u8 = 4;

    /// Returns an iterator over all tiers in ascending rank order.
    pub fn all() -> impl Iterator<Item = Self> {
        [Self::Free, Self::Basic, Self::Pro, Self::Enterprise].into_iter()
    }

    /// Canonical lowercase name for this tier.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Free => "free",
            Self::Basic => "basic",
            Self::Pro => "pro",
            Self::Enterprise => "enterprise",
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Tier {
    type Err = HierarchyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "free" => Ok(Self::Free),
            "basic" => Ok(Self::Basic),
            "pro" => Ok(Self::Pro),
            "enterprise" => Ok(Self::Enterprise),
            other => Err(HierarchyError::UnknownEnumValue {
                kind: "tier",
                value: other.to_string(),
            }),
        }
    }
}

impl PartialOrd for Tier {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Tier {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.rank().cmp(&other.rank())
    }
}

// =============================================================================
// AccessLevel
// =============================================================================

/// Content access level, lowest to highest.
///
/// Every indexed document carries one of these labels in its metadata; the
/// retrieval gateway filters shared-index queries to the labels the caller's
/// role/tier combination permits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum AccessLevel {
    /// Publicly visible content. Lowest level.
    #[default]
    Public,
    /// Content for any registered account.
    Basic,
    /// Content for junior staff and paying tiers.
    Intermediate,
    /// Content for senior staff and professional tiers.
    Advanced,
    /// Confidential content.
    Confidential,
    /// Executive-only content. Highest level.
    Executive,
}

impl AccessLevel {
    /// Returns the numeric rank of this level.
    #[must_use]
    pub const fn rank(self) -> u8 {
        match self {
            Self::Public => 0,
            Self::Basic => 1,
            Self::Intermediate => 2,
            Self::Advanced => 3,
            Self::Confidential => 4,
            Self::Executive => 5,
        }
    }

    /// Number of levels in the ladder.
    pub const COUNT: u8 = 6;

    /// Returns an iterator over all levels in ascending rank order.
    pub fn all() -> impl Iterator<Item = Self> {
        [
            Self::Public,
            Self::Basic,
            Self::Intermediate,
            Self::Advanced,
            Self::Confidential,
            Self::Executive,
        ]
        .into_iter()
    }

    /// Canonical lowercase label stored in vector-index metadata.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::Basic => "basic",
            Self::Intermediate => "intermediate",
            Self::Advanced => "advanced",
            Self::Confidential => "confidential",
            Self::Executive => "executive",
        }
    }

    /// Returns the minimum role and minimum tier that unlock this level.
    ///
    /// An identity is permitted a level when its role meets `min_role` **or**
    /// its tier meets `min_tier`; qualifying through one hierarchy is enough.
    #[must_use]
    pub const fn requirement(self) -> LevelRequirement {
        match self {
            Self::Public | Self::Basic => LevelRequirement {
                min_role: Role::User,
                min_tier: Tier::Free,
            },
            Self::Intermediate => LevelRequirement {
                min_role: Role::Junior,
                min_tier: Tier::Basic,
            },
            Self::Advanced => LevelRequirement {
                min_role: Role::Senior,
                min_tier: Tier::Pro,
            },
            Self::Confidential => LevelRequirement {
                min_role: Role::Manager,
                min_tier: Tier::Enterprise,
            },
            Self::Executive => LevelRequirement {
                min_role: Role::Ceo,
                min_tier: Tier::Enterprise,
            },
        }
    }
}

impl std::fmt::Display for AccessLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AccessLevel {
    type Err = HierarchyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "public" => Ok(Self::Public),
            "basic" => Ok(Self::Basic),
            "intermediate" => Ok(Self::Intermediate),
            "advanced" => Ok(Self::Advanced),
            "confidential" => Ok(Self::Confidential),
            "executive" => Ok(Self::Executive),
            other => Err(HierarchyError::UnknownEnumValue {
                kind: "access level",
                value: other.to_string(),
            }),
        }
    }
}

impl PartialOrd for AccessLevel {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for AccessLevel {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.rank().cmp(&other.rank())
    }
}

/// Minimum role and tier required to unlock an [`AccessLevel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LevelRequirement {
    /// Minimum role rank that unlocks the level via the role hierarchy.
    pub min_role: Role,
    /// Minimum tier rank that unlocks the level via the tier hierarchy.
    pub min_tier: Tier,
}

// =============================================================================
// Error Types
// =============================================================================

/// Errors from hierarchy lookups.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum HierarchyError {
    /// An enum name did not match any known variant.
    ///
    /// Fail-closed by design: unknown names must never resolve to the
    /// lowest rank.
    #[error("unknown {kind} value: {value:?}")]
    UnknownEnumValue {
        /// Which hierarchy was being parsed ("role", "tier", "access level").
        kind: &'static str,
        /// The offending input.
        value: String,
    },
}

// =============================================================================
// Tests
// =============================================================================

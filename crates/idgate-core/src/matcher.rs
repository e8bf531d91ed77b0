//! Weighted credential matching.
//!
//! When an access code references a pre-provisioned [`Credential`], the
//! claimant's self-reported [`IdentityClaims`] are scored against it before
//! any claim transition runs. The matcher is a pure function over its inputs
//! plus a [`MatcherConfig`]; it performs no I/O and has no side effects.
//!
//! # Scoring
//!
//! Both sides are normalized (case-fold, punctuation stripped, phone digits
//! only), then every field present on **both** sides is compared. Matching
//! fields contribute their configured weight; the score is
//! `matched_weight / comparable_weight`. Email and organizational id carry
//! the highest default weights: a name or phone number is easy to guess,
//! a provisioned email or employee id is not.
//!
//! # Policy
//!
//! The thresholds here are configuration, not verified business rules: the
//! defaults are a reverse-engineered reasonable policy and deployments are
//! expected to tune them.

use serde::{Deserialize, Serialize};

use crate::claims::{IdentityClaims, normalize_email, normalize_phone, normalize_text};

// =============================================================================
// Credential
// =============================================================================

/// A pre-provisioned credential describing the expected claimant.
///
/// Provisioning creates one of these per invited employee; the access code
/// references it and the claim flow validates self-reported claims against
/// it. `namespace` is the personal vector namespace assigned to whoever
/// successfully claims against this credential.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    /// Expected full name.
    pub full_name: Option<String>,
    /// Expected email address.
    pub email: Option<String>,
    /// Expected organizational id.
    pub org_id: Option<String>,
    /// Expected phone number.
    pub phone: Option<String>,
    /// Personal vector namespace assigned on successful claim.
    pub namespace: Option<String>,
}

// =============================================================================
// Configuration
// =============================================================================

/// Matcher weights and acceptance thresholds.
///
/// Serialized as the `[matcher]` configuration section. All values are
/// policy, not law; see the module docs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MatcherConfig {
    /// Weight of an email match.
    #[serde(default = "default_email_weight")]
    pub email_weight: f64,

    /// Weight of an organizational-id match.
    #[serde(default = "default_org_weight")]
    pub org_id_weight: f64,

    /// Weight of a full-name match.
    #[serde(default = "default_name_weight")]
    pub name_weight: f64,

    /// Weight of a phone match.
    #[serde(default = "default_phone_weight")]
    pub phone_weight: f64,

    /// Score at or above which a partial match is high-confidence.
    #[serde(default = "default_high_threshold")]
    pub high_confidence_threshold: f64,

    /// Score at or above which a partial match is low-confidence; below it
    /// the claim is rejected as insufficient.
    #[serde(default = "default_low_threshold")]
    pub low_confidence_threshold: f64,

    /// Minimum number of fields that must be comparable (present on both
    /// sides) for a match to be scored at all.
    #[serde(default = "default_min_fields")]
    pub min_fields: usize,
}

const fn default_email_weight() -> f64 {
    0.35
}
const fn default_org_weight() -> f64 {
    0.35
}
const fn default_name_weight() -> f64 {
    0.20
}
const fn default_phone_weight() -> f64 {
    0.10
}
const fn default_high_threshold() -> f64 {
    0.8
}
const fn default_low_threshold() -> f64 {
    0.5
}
const fn default_min_fields() -> usize {
    1
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            email_weight: default_email_weight(),
            org_id_weight: default_org_weight(),
            name_weight: default_name_weight(),
            phone_weight: default_phone_weight(),
            high_confidence_threshold: default_high_threshold(),
            low_confidence_threshold: default_low_threshold(),
            min_fields: default_min_fields(),
        }
    }
}

// =============================================================================
// Outcome
// =============================================================================

/// Classification of a credential match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum MatchStatus {
    /// Every field the credential carries was supplied and matched.
    Exact,
    /// Partial coverage, score at or above the high-confidence threshold.
    HighConfidence,
    /// Score between the low- and high-confidence thresholds; the claim
    /// proceeds but the identity is flagged unverified.
    LowConfidence,
    /// Too few comparable fields or score below the low threshold; the
    /// claim is rejected.
    InsufficientData,
    /// The code references no credential; nothing to validate against.
    NoCredentialRequired,
}

impl MatchStatus {
    /// True when a claim with this status may proceed.
    #[must_use]
    pub const fn claim_proceeds(self) -> bool {
        !matches!(self, Self::InsufficientData)
    }

    /// True when this status marks the resulting identity verified.
    #[must_use]
    pub const fn grants_verified(self) -> bool {
        matches!(self, Self::Exact | Self::HighConfidence)
    }
}

impl std::fmt::Display for MatchStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Exact => "exact",
            Self::HighConfidence => "high_confidence",
            Self::LowConfidence => "low_confidence",
            Self::InsufficientData => "insufficient_data",
            Self::NoCredentialRequired => "no_credential_required",
        };
        f.write_str(label)
    }
}

/// Result of scoring claims against a credential.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchOutcome {
    /// Classification.
    pub status: MatchStatus,
    /// Score in `[0, 1]`; 0.0 when nothing was comparable.
    pub score: f64,
    /// Credential fields the claimant did not supply. Populated so an
    /// `insufficient_data` caller knows what to resupply.
    pub missing_fields: Vec<&'static str>,
}

// =============================================================================
// Matching
// =============================================================================

/// Scores `claims` against `credential`.
///
/// `credential = None` yields [`MatchStatus::NoCredentialRequired`] with a
/// zero score. Otherwise every field present on both sides is compared after
/// normalization and the weighted score is classified per the config
/// thresholds.
#[must_use]
pub fn match_claims(
    claims: &IdentityClaims,
    credential: Option<&Credential>,
    config: &MatcherConfig,
) -> MatchOutcome {
    let Some(credential) = credential else {
        return MatchOutcome {
            status: MatchStatus::NoCredentialRequired,
            score: 0.0,
            missing_fields: Vec::new(),
        };
    };

    let comparisons = [
        field_comparison(
            "email",
            claims.email.as_deref(),
            credential.email.as_deref(),
            normalize_email,
            config.email_weight,
        ),
        field_comparison(
            "org_id",
            claims.org_id.as_deref(),
            credential.org_id.as_deref(),
            normalize_text,
            config.org_id_weight,
        ),
        field_comparison(
            "full_name",
            claims.full_name.as_deref(),
            credential.full_name.as_deref(),
            normalize_text,
            config.name_weight,
        ),
        field_comparison(
            "phone",
            claims.phone.as_deref(),
            credential.phone.as_deref(),
            normalize_phone,
            config.phone_weight,
        ),
    ];

    let mut comparable = 0usize;
    let mut credential_fields = 0usize;
    let mut comparable_weight = 0.0f64;
    let mut matched_weight = 0.0f64;
    let mut all_matched = true;
    let mut missing_fields = Vec::new();

    for cmp in comparisons {
        match cmp {
            FieldComparison::Compared { weight, matched } => {
                comparable += 1;
                credential_fields += 1;
                comparable_weight += weight;
                if matched {
                    matched_weight += weight;
                } else {
                    all_matched = false;
                }
            },
            FieldComparison::MissingFromClaims { field } => {
                credential_fields += 1;
                all_matched = false;
                missing_fields.push(field);
            },
            FieldComparison::NotOnCredential => {},
        }
    }

    if comparable < config.min_fields || comparable_weight == 0.0 {
        return MatchOutcome {
            status: MatchStatus::InsufficientData,
            score: 0.0,
            missing_fields,
        };
    }

    let score = matched_weight / comparable_weight;

    // Exact means full coverage: every credential field supplied and matched.
    let status = if all_matched && comparable == credential_fields {
        MatchStatus::Exact
    } else if score >= config.high_confidence_threshold {
        MatchStatus::HighConfidence
    } else if score >= config.low_confidence_threshold {
        MatchStatus::LowConfidence
    } else {
        MatchStatus::InsufficientData
    };

    MatchOutcome { status, score, missing_fields }
}

enum FieldComparison {
    Compared { weight: f64, matched: bool },
    MissingFromClaims { field: &'static str },
    NotOnCredential,
}

fn field_comparison(
    field: &'static str,
    claimed: Option<&str>,
    expected: Option<&str>,
    normalize: fn(&str) -> String,
    weight: f64,
) -> FieldComparison {
    match (claimed, expected) {
        (Some(claimed), Some(expected)) => {
            let claimed = normalize(claimed);
            let expected = normalize(expected);
            // Fields that normalize to nothing carry no signal either way.
            if expected.is_empty() {
                FieldComparison::NotOnCredential
            } else {
                FieldComparison::Compared {
                    weight,
                    matched: !claimed.is_empty() && claimed == expected,
                }
            }
        },
        (None, Some(expected)) => {
            if normalize(expected).is_empty() {
                FieldComparison::NotOnCredential
            } else {
                FieldComparison::MissingFromClaims { field }
            }
        },
        (_, None) => FieldComparison::NotOnCredential,
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn full_credential() -> Credential {
        Credential {
            full_name: Some("Ada Lovelace".to_string()),
            email: Some("ada@example.com".to_string()),
            org_id: Some("EMP-00123".to_string()),
            phone: Some("+1 555 010 2345".to_string()),
            namespace: Some("emp-ada".to_string()),
        }
    }

    fn claims(
        name: Option<&str>,
        email: Option<&str>,
        org: Option<&str>,
        phone: Option<&str>,
    ) -> IdentityClaims {
        IdentityClaims {
            full_name: name.map(String::from),
            email: email.map(String::from),
            org_id: org.map(String::from),
            phone: phone.map(String::from),
        }
    }

    #[test]
    fn test_no_credential_required() {
        let outcome = match_claims(
            &claims(None, Some("a@b.example"), None, None),
            None,
            &MatcherConfig::default(),
        );
        assert_eq!(outcome.status, MatchStatus::NoCredentialRequired);
        assert!(outcome.status.claim_proceeds());
        assert!(!outcome.status.grants_verified());
    }

    #[test]
    fn test_full_coverage_is_exact() {
        let outcome = match_claims(
            &claims(
                Some("ada lovelace"),
                Some("ADA@Example.com "),
                Some("emp00123"),
                Some("15550102345"),
            ),
            Some(&full_credential()),
            &MatcherConfig::default(),
        );
        assert_eq!(outcome.status, MatchStatus::Exact);
        assert!((outcome.score - 1.0).abs() < f64::EPSILON);
        assert!(outcome.missing_fields.is_empty());
        assert!(outcome.status.grants_verified());
    }

    #[test]
    fn test_email_only_match_is_high_confidence() {
        // Perfect single-field score, but the credential has more fields the
        // claimant never supplied, so this is not Exact.
        let outcome = match_claims(
            &claims(None, Some("ada@example.com"), None, None),
            Some(&full_credential()),
            &MatcherConfig::default(),
        );
        assert_eq!(outcome.status, MatchStatus::HighConfidence);
        assert!((outcome.score - 1.0).abs() < f64::EPSILON);
        assert!(outcome.status.claim_proceeds());
        assert!(outcome.status.grants_verified());
        assert_eq!(outcome.missing_fields, vec!["org_id", "full_name", "phone"]);
    }

    #[test]
    fn test_low_confidence_band() {
        // Name (0.20) + phone (0.10) match, email (0.35) does not:
        // 0.30 / 0.65 ~= 0.46, below the low threshold, rejected.
        // Name + email match, phone does not: 0.55 / 0.65 ~= 0.85, high.
        // Name matches, email does not, phone absent: 0.20 / 0.55 ~= 0.36.
        // Build a band case: email matches, name does not: 0.35 / 0.55 ~= 0.64.
        let outcome = match_claims(
            &claims(Some("someone else"), Some("ada@example.com"), None, None),
            Some(&full_credential()),
            &MatcherConfig::default(),
        );
        assert_eq!(outcome.status, MatchStatus::LowConfidence);
        assert!(outcome.score > 0.5 && outcome.score < 0.8, "score {}", outcome.score);
        assert!(outcome.status.claim_proceeds());
        assert!(!outcome.status.grants_verified());
    }

    #[test]
    fn test_mismatch_is_insufficient() {
        let outcome = match_claims(
            &claims(None, Some("mallory@evil.example"), None, None),
            Some(&full_credential()),
            &MatcherConfig::default(),
        );
        assert_eq!(outcome.status, MatchStatus::InsufficientData);
        assert!(!outcome.status.claim_proceeds());
    }

    #[test]
    fn test_no_comparable_fields_reports_missing() {
        let credential = Credential {
            email: Some("ada@example.com".to_string()),
            org_id: Some("EMP-00123".to_string()),
            ..Credential::default()
        };
        // Claimant supplied only a name, which the credential does not carry.
        let outcome = match_claims(
            &claims(Some("Ada Lovelace"), None, None, None),
            Some(&credential),
            &MatcherConfig::default(),
        );
        assert_eq!(outcome.status, MatchStatus::InsufficientData);
        assert_eq!(outcome.missing_fields, vec!["email", "org_id"]);
    }

    #[test]
    fn test_min_fields_policy() {
        let config = MatcherConfig { min_fields: 2, ..MatcherConfig::default() };
        // One comparable field is no longer enough.
        let outcome = match_claims(
            &claims(None, Some("ada@example.com"), None, None),
            Some(&full_credential()),
            &config,
        );
        assert_eq!(outcome.status, MatchStatus::InsufficientData);

        let outcome = match_claims(
            &claims(None, Some("ada@example.com"), Some("EMP-00123"), None),
            Some(&full_credential()),
            &config,
        );
        assert_eq!(outcome.status, MatchStatus::HighConfidence);
    }

    #[test]
    fn test_normalization_resists_formatting() {
        let outcome = match_claims(
            &claims(
                Some("  ADA   LOVELACE "),
                Some("Ada@EXAMPLE.com"),
                Some("emp-00123"),
                Some("(555) 010-2345"),
            ),
            Some(&Credential {
                phone: Some("555 0102345".to_string()),
                ..full_credential()
            }),
            &MatcherConfig::default(),
        );
        assert_eq!(outcome.status, MatchStatus::Exact);
    }

    #[test]
    fn test_threshold_boundaries() {
        // Exactly at the high threshold classifies as high-confidence.
        let config = MatcherConfig {
            email_weight: 0.8,
            name_weight: 0.2,
            org_id_weight: 0.0,
            phone_weight: 0.0,
            ..MatcherConfig::default()
        };
        let outcome = match_claims(
            &claims(Some("wrong name"), Some("ada@example.com"), None, None),
            Some(&Credential {
                full_name: Some("Ada Lovelace".to_string()),
                email: Some("ada@example.com".to_string()),
                ..Credential::default()
            }),
            &config,
        );
        assert!((outcome.score - 0.8).abs() < 1e-9);
        assert_eq!(outcome.status, MatchStatus::HighConfidence);
    }

    #[test]
    fn test_score_is_deterministic() {
        let c = full_credential();
        let cl = claims(None, Some("ada@example.com"), Some("EMP-00123"), None);
        let config = MatcherConfig::default();
        let first = match_claims(&cl, Some(&c), &config);
        for _ in 0..10 {
            assert_eq!(match_claims(&cl, Some(&c), &config), first);
        }
    }
}

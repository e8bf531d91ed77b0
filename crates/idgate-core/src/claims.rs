//! Self-reported identity claims.
//!
//! A registration request carries an [`IdentityClaims`] alongside the access
//! code: the caller's own statement of who they are. Claims are validated
//! here, before anything touches the durable store, and normalized so the
//! credential matcher compares like with like.
//!
//! Validation is bounds-first: every field has a hard length cap so a
//! hostile payload cannot force unbounded allocation or pathological
//! normalization work downstream.

use serde::{Deserialize, Serialize};

/// Maximum length in bytes for any single claim field.
pub const MAX_FIELD_LENGTH: usize = 320;

/// Self-reported identity claims supplied with a claim request.
///
/// All fields are optional; which ones are required is a matcher-policy
/// question (`min_fields`), not a shape question. Empty strings are treated
/// as absent during validation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityClaims {
    /// Full name as the caller reports it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,

    /// Contact email address.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    /// Organizational identifier (employee number, member id).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub org_id: Option<String>,

    /// Phone number; compared on digits only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
}

impl IdentityClaims {
    /// Validates shape and bounds, dropping empty fields.
    ///
    /// Returns the cleaned claims. Does not decide whether *enough* fields
    /// were supplied; that is the matcher's policy call.
    ///
    /// # Errors
    ///
    /// Returns [`ClaimsError::FieldTooLong`] if any field exceeds
    /// [`MAX_FIELD_LENGTH`], [`ClaimsError::FieldContainsControl`] if a
    /// field contains control characters, or [`ClaimsError::NoFields`] if no
    /// non-empty field remains after cleaning.
    pub fn validate(mut self) -> Result<Self, ClaimsError> {
        for (name, field) in [
            ("full_name", &mut self.full_name),
            ("email", &mut self.email),
            ("org_id", &mut self.org_id),
            ("phone", &mut self.phone),
        ] {
            if let Some(value) = field {
                if value.len() > MAX_FIELD_LENGTH {
                    return Err(ClaimsError::FieldTooLong {
                        field: name,
                        len: value.len(),
                        max: MAX_FIELD_LENGTH,
                    });
                }
                if value.chars().any(char::is_control) {
                    return Err(ClaimsError::FieldContainsControl { field: name });
                }
                if value.trim().is_empty() {
                    *field = None;
                }
            }
        }

        if self.is_empty() {
            return Err(ClaimsError::NoFields);
        }
        Ok(self)
    }

    /// True when no field carries a value.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.full_name.is_none()
            && self.email.is_none()
            && self.org_id.is_none()
            && self.phone.is_none()
    }

    /// Number of supplied fields.
    #[must_use]
    pub fn field_count(&self) -> usize {
        [
            self.full_name.is_some(),
            self.email.is_some(),
            self.org_id.is_some(),
            self.phone.is_some(),
        ]
        .iter()
        .filter(|present| **present)
        .count()
    }
}

// =============================================================================
// Normalization
// =============================================================================

/// Normalizes a name or organizational id for comparison: case-folded,
/// alphanumerics only.
#[must_use]
pub fn normalize_text(value: &str) -> String {
    value
        .chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

/// Normalizes an email address: trimmed and case-folded.
///
/// Whole-address folding matches how the surrounding product stores contact
/// emails; mailbox-local case sensitivity is not honored anywhere else in
/// the platform either.
#[must_use]
pub fn normalize_email(value: &str) -> String {
    value.trim().to_lowercase()
}

/// Normalizes a phone number to its digits.
#[must_use]
pub fn normalize_phone(value: &str) -> String {
    value.chars().filter(char::is_ascii_digit).collect()
}

// =============================================================================
// Error Types
// =============================================================================

/// Errors from claim validation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum ClaimsError {
    /// A claim field exceeded the hard length cap.
    #[error("claim field '{field}' is {len} bytes, max {max}")]
    FieldTooLong {
        /// Field name.
        field: &'static str,
        /// Supplied length.
        len: usize,
        /// Maximum allowed length.
        max: usize,
    },

    /// A claim field contained control characters.
    #[error("claim field '{field}' contains control characters")]
    FieldContainsControl {
        /// Field name.
        field: &'static str,
    },

    /// No usable field was supplied.
    #[error("no identity claim fields supplied")]
    NoFields,
}

// =============================================================================
// Tests
// =============================================================================

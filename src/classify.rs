//! Document state classification.
//!
//! Reduces per-field verification outcomes to a single document state, the
//! label used to organize documents by signature status.

use serde::{Deserialize, Serialize};

/// Verification outcome for one signature field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldStatus {
    /// Field exists but carries no real signature value
    Unsigned,
    /// Signed and every check passed
    SignedValid,
    /// Signed but some check failed
    SignedInvalid,
}

/// Overall signature state of a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentState {
    /// No signature fields anywhere
    NoSignatureFields,
    /// At least one field is waiting for a signature, none are broken
    UnsignedFields,
    /// Every field is signed and every signature verified
    Signed,
    /// At least one signature failed verification
    Invalid,
}

impl DocumentState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoSignatureFields => "no_signature_fields",
            Self::UnsignedFields => "unsigned_fields",
            Self::Signed => "signed",
            Self::Invalid => "invalid",
        }
    }
}

impl std::fmt::Display for DocumentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classify a document from its field statuses.
///
/// A broken signature dominates: any `SignedInvalid` makes the document
/// `Invalid` regardless of other fields. With none broken, any unsigned
/// field leaves the document `UnsignedFields`.
pub fn classify(statuses: &[FieldStatus]) -> DocumentState {
    if statuses.is_empty() {
        return DocumentState::NoSignatureFields;
    }
    if statuses.contains(&FieldStatus::SignedInvalid) {
        return DocumentState::Invalid;
    }
    if statuses.contains(&FieldStatus::Unsigned) {
        return DocumentState::UnsignedFields;
    }
    DocumentState::Signed
}

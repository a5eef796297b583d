//! Certificate chain validation.
//!
//! Builds a chain from the signer certificate through any intermediates to a
//! trust anchor, verifying each issuer signature and each validity window.
//! Revocation checking goes through the [`RevocationOracle`] seam; the
//! default [`OfflineRevocation`] oracle answers `Unknown` for everything.

use crate::error::{Error, Result};
use crate::signatures::cms::rsa_verify;
use crate::signatures::types::DigestAlgorithm;
use chrono::{DateTime, Utc};
use rsa::pkcs1::DecodeRsaPublicKey;
use rsa::RsaPublicKey;
use x509_parser::prelude::*;

/// Longest chain we will follow, signer included.
const MAX_CHAIN_LEN: usize = 8;

/// Answer from a revocation source for one certificate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevocationStatus {
    Good,
    Revoked,
    /// No revocation data available
    Unknown,
}

/// Source of revocation answers (CRL, OCSP, or nothing).
pub trait RevocationOracle {
    fn status(&self, cert_der: &[u8]) -> RevocationStatus;
}

/// Oracle for fully offline operation: never claims knowledge.
#[derive(Debug, Default)]
pub struct OfflineRevocation;

impl RevocationOracle for OfflineRevocation {
    fn status(&self, _cert_der: &[u8]) -> RevocationStatus {
        RevocationStatus::Unknown
    }
}

/// Result of validating one signer's chain.
#[derive(Debug, Clone)]
pub struct ChainReport {
    /// Chain reaches a self-signed certificate or a trust anchor
    pub chain_complete: bool,
    /// Every issuer signature in the chain verified
    pub signatures_valid: bool,
    /// Every certificate was within its validity window at the check time
    pub within_validity: bool,
    /// Chain terminates at a configured trust anchor
    pub trusted: bool,
    /// Worst revocation answer across the chain
    pub revocation: RevocationStatus,
    /// Signer certificate's common name, when present
    pub signer_common_name: Option<String>,
    /// Reasons for any failed check
    pub issues: Vec<String>,
}

impl ChainReport {
    /// Structural and cryptographic checks all passed (trust anchoring and
    /// revocation knowledge are reported separately).
    pub fn is_valid(&self) -> bool {
        self.chain_complete
            && self.signatures_valid
            && self.within_validity
            && self.revocation != RevocationStatus::Revoked
    }

    /// Convert the report into a typed error for callers that demand a
    /// fully valid chain.
    pub fn ensure_valid(&self) -> Result<()> {
        if self.is_valid() {
            return Ok(());
        }
        if self.revocation == RevocationStatus::Revoked {
            return Err(Error::Revoked(self.describe_subject()));
        }
        if !self.within_validity {
            return Err(Error::Expired(self.describe_subject()));
        }
        Err(Error::ChainIncomplete(
            self.issues.first().cloned().unwrap_or_else(|| self.describe_subject()),
        ))
    }

    fn describe_subject(&self) -> String {
        self.signer_common_name
            .clone()
            .unwrap_or_else(|| "unknown signer".into())
    }
}

/// Validates signer chains against a set of trust anchors.
pub struct ChainValidator {
    anchors: Vec<Vec<u8>>,
    oracle: Box<dyn RevocationOracle>,
}

impl ChainValidator {
    /// Validator with no anchors and offline revocation.
    pub fn new() -> Self {
        Self {
            anchors: Vec::new(),
            oracle: Box::new(OfflineRevocation),
        }
    }

    /// Add a DER-encoded trust anchor.
    pub fn add_anchor(&mut self, cert_der: Vec<u8>) {
        self.anchors.push(cert_der);
    }

    /// Whether any trust anchors are configured.
    pub fn has_anchors(&self) -> bool {
        !self.anchors.is_empty()
    }

    /// Replace the revocation oracle.
    pub fn with_oracle(mut self, oracle: Box<dyn RevocationOracle>) -> Self {
        self.oracle = oracle;
        self
    }

    /// Validate the chain from `signer_der` through `intermediates`.
    ///
    /// Validity windows are checked against `at`, normally the claimed
    /// signing time; with no time available the window check is skipped and
    /// noted in the report.
    pub fn validate(
        &self,
        signer_der: &[u8],
        intermediates: &[Vec<u8>],
        at: Option<DateTime<Utc>>,
    ) -> Result<ChainReport> {
        let (_, signer) = parse_x509_certificate(signer_der)
            .map_err(|e| Error::MalformedSignature(format!("parsing signer certificate: {}", e)))?;

        let signer_common_name = common_name(&signer);

        // Candidate issuers: intermediates first, then anchors
        let mut pool: Vec<(&[u8], X509Certificate<'_>, bool)> = Vec::new();
        for der in intermediates.iter().map(Vec::as_slice) {
            match parse_x509_certificate(der) {
                Ok((_, cert)) => pool.push((der, cert, false)),
                Err(e) => log::warn!("skipping unparseable intermediate: {}", e),
            }
        }
        for der in self.anchors.iter().map(Vec::as_slice) {
            match parse_x509_certificate(der) {
                Ok((_, cert)) => pool.push((der, cert, true)),
                Err(e) => log::warn!("skipping unparseable anchor: {}", e),
            }
        }

        let mut issues = Vec::new();
        let mut signatures_valid = true;
        let mut within_validity = true;
        let mut chain_complete = false;
        let mut trusted = false;
        let mut revocation = RevocationStatus::Good;

        check_validity(at, &signer, &mut within_validity, &mut issues);
        revocation = worse(revocation, self.oracle.status(signer_der));

        let mut current_der = signer_der;
        let mut current = signer;
        let mut used: Vec<usize> = Vec::new();

        for _ in 0..MAX_CHAIN_LEN {
            if current.subject().as_raw() == current.issuer().as_raw() {
                // Self-signed: the chain terminates here
                chain_complete = true;
                trusted = trusted || self.is_anchor(current_der);
                break;
            }

            let found = pool.iter().enumerate().find(|(i, (_, c, _))| {
                !used.contains(i) && c.subject().as_raw() == current.issuer().as_raw()
            });
            let (idx, issuer_der, is_anchor) = match found {
                Some((i, (d, c, a))) => {
                    if let Err(e) = verify_issued_by(&current, c) {
                        signatures_valid = false;
                        issues.push(format!("issuer signature check failed: {}", e));
                    }
                    check_validity(at, c, &mut within_validity, &mut issues);
                    (i, *d, *a)
                },
                None => {
                    issues.push(format!(
                        "no certificate found for issuer of {}",
                        common_name(&current).unwrap_or_else(|| "?".into())
                    ));
                    break;
                },
            };

            revocation = worse(revocation, self.oracle.status(issuer_der));
            if is_anchor {
                trusted = true;
                chain_complete = true;
            }

            used.push(idx);
            current_der = issuer_der;
            current = pool[idx].1.clone();
            if chain_complete {
                break;
            }
        }

        if !chain_complete && issues.is_empty() {
            issues.push("chain exceeds maximum length".into());
        }

        Ok(ChainReport {
            chain_complete,
            signatures_valid,
            within_validity,
            trusted,
            revocation,
            signer_common_name,
            issues,
        })
    }

    fn is_anchor(&self, der: &[u8]) -> bool {
        self.anchors.iter().any(|a| a == der)
    }
}

impl Default for ChainValidator {
    fn default() -> Self {
        Self::new()
    }
}

/// Check a certificate's validity window against the signing time.
fn check_validity(
    at: Option<DateTime<Utc>>,
    cert: &X509Certificate<'_>,
    within: &mut bool,
    issues: &mut Vec<String>,
) {
    let Some(at) = at else { return };
    let ts = at.timestamp();
    if ts < cert.validity().not_before.timestamp() || ts > cert.validity().not_after.timestamp() {
        *within = false;
        issues.push(format!(
            "certificate {} outside validity window at {}",
            common_name(cert).unwrap_or_else(|| "?".into()),
            at.to_rfc3339()
        ));
    }
}

fn worse(a: RevocationStatus, b: RevocationStatus) -> RevocationStatus {
    use RevocationStatus::*;
    match (a, b) {
        (Revoked, _) | (_, Revoked) => Revoked,
        (Unknown, _) | (_, Unknown) => Unknown,
        _ => Good,
    }
}

/// Verify that `cert` was signed by `issuer`'s key.
fn verify_issued_by(cert: &X509Certificate<'_>, issuer: &X509Certificate<'_>) -> Result<()> {
    let alg_oid = cert.signature_algorithm.algorithm.to_id_string();
    let digest_alg = digest_for_signature_oid(&alg_oid).ok_or_else(|| {
        Error::MalformedSignature(format!("unsupported certificate signature algorithm {}", alg_oid))
    })?;

    let key = RsaPublicKey::from_pkcs1_der(&issuer.public_key().subject_public_key.data)
        .map_err(|e| Error::MalformedSignature(format!("issuer public key: {}", e)))?;

    let tbs_digest = digest_alg.digest(cert.tbs_certificate.as_ref());
    rsa_verify(&key, digest_alg, &tbs_digest, &cert.signature_value.data)
        .map_err(|e| Error::SignatureInvalid(format!("certificate signature: {}", e)))
}

fn digest_for_signature_oid(oid: &str) -> Option<DigestAlgorithm> {
    match oid {
        "1.2.840.113549.1.1.5" => Some(DigestAlgorithm::Sha1),
        "1.2.840.113549.1.1.11" => Some(DigestAlgorithm::Sha256),
        "1.2.840.113549.1.1.12" => Some(DigestAlgorithm::Sha384),
        "1.2.840.113549.1.1.13" => Some(DigestAlgorithm::Sha512),
        _ => None,
    }
}

fn common_name(cert: &X509Certificate<'_>) -> Option<String> {
    cert.subject()
        .iter_common_name()
        .next()
        .and_then(|cn| cn.as_str().ok())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct AlwaysRevoked;
    impl RevocationOracle for AlwaysRevoked {
        fn status(&self, _: &[u8]) -> RevocationStatus {
            RevocationStatus::Revoked
        }
    }

    #[test]
    fn test_offline_oracle_is_unknown() {
        assert_eq!(OfflineRevocation.status(b"any"), RevocationStatus::Unknown);
    }

    #[test]
    fn test_unparseable_signer_rejected() {
        let validator = ChainValidator::new();
        assert!(validator.validate(b"garbage", &[], None).is_err());
    }

    #[test]
    fn test_report_ensure_valid_revoked() {
        let report = ChainReport {
            chain_complete: true,
            signatures_valid: true,
            within_validity: true,
            trusted: false,
            revocation: RevocationStatus::Revoked,
            signer_common_name: Some("Alice".into()),
            issues: vec![],
        };
        assert!(matches!(report.ensure_valid(), Err(Error::Revoked(_))));
        assert!(!report.is_valid());
    }

    #[test]
    fn test_report_ensure_valid_expired() {
        let report = ChainReport {
            chain_complete: true,
            signatures_valid: true,
            within_validity: false,
            trusted: true,
            revocation: RevocationStatus::Unknown,
            signer_common_name: None,
            issues: vec!["certificate ? outside validity window".into()],
        };
        assert!(matches!(report.ensure_valid(), Err(Error::Expired(_))));
    }

    #[test]
    fn test_report_ensure_valid_incomplete() {
        let report = ChainReport {
            chain_complete: false,
            signatures_valid: true,
            within_validity: true,
            trusted: false,
            revocation: RevocationStatus::Unknown,
            signer_common_name: None,
            issues: vec!["no certificate found for issuer of Leaf".into()],
        };
        match report.ensure_valid() {
            Err(Error::ChainIncomplete(msg)) => assert!(msg.contains("Leaf")),
            other => panic!("expected ChainIncomplete, got {:?}", other),
        }
    }

    #[test]
    fn test_report_valid_with_unknown_revocation() {
        let report = ChainReport {
            chain_complete: true,
            signatures_valid: true,
            within_validity: true,
            trusted: true,
            revocation: RevocationStatus::Unknown,
            signer_common_name: None,
            issues: vec![],
        };
        assert!(report.is_valid());
        assert!(report.ensure_valid().is_ok());
    }
}

//! High-level engine API: analyze, classify, and add signature fields.
//!
//! Ties the parsing, verification, and injection layers together and
//! produces serializable reports. Concurrent calls against the same files
//! are serialized through a process-wide path lock registry.

use crate::classify::{classify, DocumentState, FieldStatus};
use crate::document::Document;
use crate::error::{Error, Result};
use crate::fields::{collect_signature_fields, SignatureField};
use crate::inject::{add_signature_field as inject_field, write_atomic, InjectOptions};
use crate::signatures::{cms, ChainValidator, RevocationStatus};
use chrono::{DateTime, TimeZone, Utc};
use lazy_static::lazy_static;
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};

lazy_static! {
    /// Per-path locks so analysis never reads a document mid-injection.
    static ref PATH_LOCKS: Mutex<HashMap<PathBuf, Arc<RwLock<()>>>> = Mutex::new(HashMap::new());
}

fn lock_for(path: &Path) -> Arc<RwLock<()>> {
    let key = path
        .canonicalize()
        .unwrap_or_else(|_| path.to_path_buf());
    let mut locks = PATH_LOCKS.lock().expect("path lock registry poisoned");
    locks.entry(key).or_default().clone()
}

/// Verification report for one signature field.
#[derive(Debug, Clone, Serialize)]
pub struct FieldReport {
    pub name: String,
    pub signed: bool,
    /// Revision index where the field first appeared
    pub introduced_in: usize,
    /// Revision index where it was first signed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signed_in: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signer_identity: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signing_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub_filter: Option<String>,
    pub digest_match: bool,
    pub signature_valid: bool,
    pub chain_complete: bool,
    /// Every issuer signature along the chain verified
    pub chain_signatures_valid: bool,
    pub chain_trusted: bool,
    pub within_validity: bool,
    pub revoked: bool,
    /// The signature's byte range spans its whole revision apart from the
    /// `/Contents` placeholder
    pub covers_whole_document: bool,
    pub issues: Vec<String>,
}

impl FieldReport {
    /// Per-field verdict. `require_trust` makes anchoring mandatory; with no
    /// anchors configured a complete chain ending at a self-signed root is
    /// the best obtainable answer and is accepted.
    fn status(&self, require_trust: bool) -> FieldStatus {
        if !self.signed {
            return FieldStatus::Unsigned;
        }
        let chain_ok = self.chain_complete
            && self.chain_signatures_valid
            && (self.chain_trusted || !require_trust);
        if self.digest_match
            && self.signature_valid
            && chain_ok
            && self.within_validity
            && !self.revoked
        {
            FieldStatus::SignedValid
        } else {
            FieldStatus::SignedInvalid
        }
    }
}

/// Full analysis of one document.
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisReport {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    pub pdf_version: String,
    pub revision_count: usize,
    pub state: DocumentState,
    pub fields: Vec<FieldReport>,
}

impl AnalysisReport {
    /// JSON rendering of the report.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| Error::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))
    }
}

/// The signature analysis engine.
///
/// Holds the chain validator (trust anchors and revocation oracle); the
/// default engine runs fully offline with no anchors.
#[derive(Default)]
pub struct SignatureEngine {
    validator: ChainValidator,
}

impl SignatureEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Engine with a pre-configured chain validator.
    pub fn with_validator(validator: ChainValidator) -> Self {
        Self { validator }
    }

    /// Analyze the document at `path`.
    pub fn analyze(&self, path: &Path) -> Result<AnalysisReport> {
        let lock = lock_for(path);
        let _guard = lock.read().expect("path lock poisoned");
        let doc = Document::open(path)?;
        let mut report = self.analyze_document(&doc)?;
        report.path = Some(path.display().to_string());
        Ok(report)
    }

    /// Analyze a document already in memory.
    pub fn analyze_bytes(&self, data: Vec<u8>) -> Result<AnalysisReport> {
        let doc = Document::from_bytes(data)?;
        self.analyze_document(&doc)
    }

    /// Classify the document at `path` by signature state.
    pub fn classify(&self, path: &Path) -> Result<DocumentState> {
        Ok(self.analyze(path)?.state)
    }

    /// Add an unsigned signature field to the document at `input`.
    ///
    /// Writes the updated document to `output`, or to
    /// `<stem>_with_field.pdf` next to the input when no output is given.
    /// Returns the path written.
    pub fn add_signature_field(
        &self,
        input: &Path,
        output: Option<&Path>,
        name: &str,
        opts: &InjectOptions,
    ) -> Result<PathBuf> {
        let output = match output {
            Some(p) => p.to_path_buf(),
            None => default_output_path(input),
        };

        // Both paths locked for writing, in sorted order so two concurrent
        // calls with swapped arguments cannot deadlock
        let mut locks = vec![lock_for(input)];
        if output.as_path() != input {
            locks.push(lock_for(&output));
            locks.sort_by_key(|l| Arc::as_ptr(l) as usize);
        }
        let _guards: Vec<_> = locks
            .iter()
            .map(|l| l.write().expect("path lock poisoned"))
            .collect();

        let doc = Document::open(input)?;
        let updated = inject_field(&doc, name, opts)?;
        write_atomic(&output, &updated)?;
        Ok(output)
    }

    fn analyze_document(&self, doc: &Document) -> Result<AnalysisReport> {
        let fields = collect_signature_fields(doc)?;
        let reports: Vec<FieldReport> = fields
            .iter()
            .map(|f| self.verify_field(doc, f))
            .collect();
        let require_trust = self.validator.has_anchors();
        let statuses: Vec<FieldStatus> = reports.iter().map(|r| r.status(require_trust)).collect();
        let state = classify(&statuses);

        Ok(AnalysisReport {
            path: None,
            pdf_version: doc.version().to_string(),
            revision_count: doc.revisions().len(),
            state,
            fields: reports,
        })
    }

    /// Verify one field end to end. Verification failures are captured in
    /// the report rather than propagated, so one broken signature cannot
    /// hide the rest of the document.
    fn verify_field(&self, doc: &Document, field: &SignatureField) -> FieldReport {
        let mut report = FieldReport {
            name: field.name.clone(),
            signed: field.is_signed(),
            introduced_in: field.introduced_in,
            signed_in: field.signed_in,
            signer_identity: None,
            signing_time: None,
            sub_filter: None,
            digest_match: false,
            signature_valid: false,
            chain_complete: false,
            chain_signatures_valid: false,
            chain_trusted: false,
            within_validity: true,
            revoked: false,
            covers_whole_document: false,
            issues: Vec::new(),
        };

        let Some(value) = &field.value else {
            return report;
        };
        report.sub_filter = value.sub_filter.as_ref().map(|s| s.as_pdf_name().to_string());
        report.signer_identity = value.signer_name.clone();
        report.signing_time = value.modified_date.clone();
        report.issues.extend(value.issues.iter().cloned());
        if !report.signed {
            return report;
        }

        let Some(byte_range) = &value.byte_range else {
            report.issues.push("signed field has no usable /ByteRange".into());
            return report;
        };

        let covered = match byte_range.covered_bytes(doc.bytes()) {
            Ok(c) => c,
            Err(e) => {
                report.issues.push(e.to_string());
                return report;
            },
        };

        // Whole-revision coverage is judged against the revision where the
        // signature landed
        if let Some(rev) = field.signed_in.and_then(|i| doc.revisions().get(i)) {
            report.covers_whole_document =
                byte_range.covers_revision(doc.bytes(), rev.end_offset);
            if byte_range.covered_end() > rev.end_offset {
                report
                    .issues
                    .push("signature byte range extends past its revision".into());
            }
        }

        let verification = match cms::verify_blob(&value.contents, &covered) {
            Ok(v) => v,
            Err(e) => {
                report.issues.push(e.to_string());
                return report;
            },
        };
        report.digest_match = verification.digest_match;
        report.signature_valid = verification.signature_valid;
        report.issues.extend(verification.failures.iter().cloned());

        if let Some(sf) = &value.sub_filter {
            if sf.is_detached() == verification.encapsulated {
                report.issues.push(format!(
                    "/SubFilter {} does not match the blob's {} form",
                    sf.as_pdf_name(),
                    if verification.encapsulated { "encapsulated" } else { "detached" },
                ));
            }
        }

        // The signingTime attribute is only covered by the signature when
        // the signature itself holds up; otherwise fall back to /M
        let signing_time = verification
            .is_cryptographically_sound()
            .then_some(verification.signing_time)
            .flatten()
            .or_else(|| value.modified_date.as_deref().and_then(parse_pdf_date));
        if let Some(t) = &verification.signing_time {
            report.signing_time = Some(t.to_rfc3339());
        }

        match &verification.signer_cert_der {
            Some(cert) => {
                match self
                    .validator
                    .validate(cert, &verification.other_certs_der, signing_time)
                {
                    Ok(chain) => {
                        report.chain_complete = chain.chain_complete;
                        report.chain_signatures_valid = chain.signatures_valid;
                        report.chain_trusted = chain.trusted;
                        report.within_validity = chain.within_validity;
                        report.revoked = chain.revocation == RevocationStatus::Revoked;
                        if report.signer_identity.is_none() {
                            report.signer_identity = chain.signer_common_name.clone();
                        }
                        if let Err(e) = chain.ensure_valid() {
                            report.issues.push(e.to_string());
                        }
                        report.issues.extend(chain.issues);
                    },
                    Err(e) => report.issues.push(e.to_string()),
                }
            },
            None => report
                .issues
                .push("signed data carries no signer certificate".into()),
        }

        report
    }
}

/// `dir/name.pdf` becomes `dir/name_with_field.pdf`.
fn default_output_path(input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "document".into());
    let ext = input
        .extension()
        .map(|e| e.to_string_lossy().into_owned())
        .unwrap_or_else(|| "pdf".into());
    input.with_file_name(format!("{}_with_field.{}", stem, ext))
}

/// Parse a PDF date string (`D:YYYYMMDDHHmmSS` with optional timezone) to a
/// UTC timestamp. Offsets are applied; unreadable dates yield `None`.
pub fn parse_pdf_date(s: &str) -> Option<DateTime<Utc>> {
    let s = s.strip_prefix("D:").unwrap_or(s);
    let digits = |range: std::ops::Range<usize>, default: u32| -> u32 {
        s.get(range)
            .and_then(|p| p.parse().ok())
            .unwrap_or(default)
    };
    let year: i32 = s.get(0..4)?.parse().ok()?;
    let month = digits(4..6, 1).clamp(1, 12);
    let day = digits(6..8, 1).clamp(1, 31);
    let hour = digits(8..10, 0).min(23);
    let minute = digits(10..12, 0).min(59);
    let second = digits(12..14, 0).min(59);

    let base = Utc
        .with_ymd_and_hms(year, month, day, hour, minute, second)
        .single()?;

    // Timezone suffix: Z, or +HH'mm' / -HH'mm'
    let rest = s.get(14..).unwrap_or("");
    match rest.chars().next() {
        Some('+') | Some('-') => {
            let sign: i64 = if rest.starts_with('-') { -1 } else { 1 };
            let cleaned: String = rest[1..].chars().filter(|c| c.is_ascii_digit()).collect();
            let off_h: i64 = cleaned.get(0..2).and_then(|p| p.parse().ok()).unwrap_or(0);
            let off_m: i64 = cleaned.get(2..4).and_then(|p| p.parse().ok()).unwrap_or(0);
            Some(base - chrono::Duration::seconds(sign * (off_h * 3600 + off_m * 60)))
        },
        _ => Some(base),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_output_path() {
        assert_eq!(
            default_output_path(Path::new("/tmp/contract.pdf")),
            PathBuf::from("/tmp/contract_with_field.pdf")
        );
        assert_eq!(
            default_output_path(Path::new("doc.pdf")),
            PathBuf::from("doc_with_field.pdf")
        );
    }

    #[test]
    fn test_parse_pdf_date_utc() {
        let t = parse_pdf_date("D:20240101120000Z").unwrap();
        assert_eq!(t, Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap());
    }

    #[test]
    fn test_parse_pdf_date_with_offset() {
        let t = parse_pdf_date("D:20240101120000+02'00'").unwrap();
        assert_eq!(t, Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap());
    }

    #[test]
    fn test_parse_pdf_date_short_form() {
        let t = parse_pdf_date("D:2024").unwrap();
        assert_eq!(t, Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
    }

    #[test]
    fn test_parse_pdf_date_garbage() {
        assert!(parse_pdf_date("yesterday").is_none());
    }

    fn sound_report() -> FieldReport {
        FieldReport {
            name: "Sig1".into(),
            signed: true,
            introduced_in: 0,
            signed_in: Some(0),
            signer_identity: None,
            signing_time: None,
            sub_filter: None,
            digest_match: true,
            signature_valid: true,
            chain_complete: true,
            chain_signatures_valid: true,
            chain_trusted: false,
            within_validity: true,
            revoked: false,
            covers_whole_document: true,
            issues: Vec::new(),
        }
    }

    #[test]
    fn test_field_status_untrusted_chain() {
        let report = sound_report();
        // Self-signed root, no anchors configured: accepted
        assert_eq!(report.status(false), FieldStatus::SignedValid);
        // Anchors configured but chain does not reach one: rejected
        assert_eq!(report.status(true), FieldStatus::SignedInvalid);
    }

    #[test]
    fn test_field_status_broken_chain_link() {
        // A chain can reach an anchor by name matching while an issuer
        // signature along the way fails to verify; that must not pass
        let report = FieldReport {
            chain_signatures_valid: false,
            chain_trusted: true,
            ..sound_report()
        };
        assert_eq!(report.status(false), FieldStatus::SignedInvalid);
        assert_eq!(report.status(true), FieldStatus::SignedInvalid);
    }

    #[test]
    fn test_field_status_incomplete_chain() {
        let report = FieldReport {
            chain_complete: false,
            ..sound_report()
        };
        assert_eq!(report.status(false), FieldStatus::SignedInvalid);
    }

    #[test]
    fn test_field_status_digest_mismatch() {
        let report = FieldReport {
            digest_match: false,
            ..sound_report()
        };
        assert_eq!(report.status(false), FieldStatus::SignedInvalid);
    }

    #[test]
    fn test_path_lock_reuse() {
        let a = lock_for(Path::new("/tmp/same.pdf"));
        let b = lock_for(Path::new("/tmp/same.pdf"));
        assert!(Arc::ptr_eq(&a, &b));
    }
}

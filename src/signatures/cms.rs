//! CMS (PKCS#7) signed-data verification.
//!
//! Parses the DER blob stored in a signature's `/Contents`, checks the
//! messageDigest signed attribute against the document digest, and verifies
//! the RSA signature with the signer's certificate. Chain trust is a
//! separate concern, see [`crate::signatures::chain`].

use crate::error::{Error, Result};
use crate::signatures::types::DigestAlgorithm;
use chrono::{DateTime, TimeZone, Utc};
use cms::cert::{CertificateChoices, IssuerAndSerialNumber};
use cms::content_info::ContentInfo;
use cms::signed_data::{SignedAttributes, SignedData, SignerIdentifier};
use der::asn1::{GeneralizedTime, ObjectIdentifier, OctetString, UtcTime};
use der::{Any, Decode, Encode};
use rsa::pkcs1::DecodeRsaPublicKey;
use rsa::{Pkcs1v15Sign, RsaPublicKey};

const OID_SIGNED_DATA: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.7.2");
const OID_MESSAGE_DIGEST: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.9.4");
const OID_SIGNING_TIME: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.9.5");

/// Outcome of verifying one CMS blob against a message.
#[derive(Debug, Clone)]
pub struct CmsVerification {
    /// Digest algorithm declared by the signer
    pub digest_algorithm: DigestAlgorithm,
    /// Whether the computed document digest matches the signed one
    pub digest_match: bool,
    /// Whether the RSA signature over the signed attributes verified
    pub signature_valid: bool,
    /// Whether the blob carried encapsulated content (non-detached form)
    pub encapsulated: bool,
    /// DER of the certificate that matches the signer identifier
    pub signer_cert_der: Option<Vec<u8>>,
    /// DER of every other certificate shipped in the blob
    pub other_certs_der: Vec<Vec<u8>>,
    /// Claimed signing time from the signed attributes
    pub signing_time: Option<DateTime<Utc>>,
    /// Human-readable reasons for any failed check
    pub failures: Vec<String>,
}

impl CmsVerification {
    /// Digest matched and the signature verified.
    pub fn is_cryptographically_sound(&self) -> bool {
        self.digest_match && self.signature_valid
    }
}

/// Verify a CMS blob against the message it claims to sign.
///
/// `message` is the concatenated `/ByteRange` bytes. Detached blobs
/// (`adbe.pkcs7.detached`, PAdES) sign those bytes directly; non-detached
/// ones (`adbe.pkcs7.sha1`) encapsulate the SHA-1 of the byte range as
/// content and sign that, so the digest check runs against the encapsulated
/// content and the content itself is checked against the byte range.
/// Parse-level problems (bad DER, unsupported algorithms, no signer) are
/// errors; digest mismatches and bad signatures come back as a report with
/// the corresponding flag cleared.
pub fn verify_blob(blob: &[u8], message: &[u8]) -> Result<CmsVerification> {
    let signed_data = decode_signed_data(blob)?;

    let signer = signed_data
        .signer_infos
        .0
        .iter()
        .next()
        .ok_or_else(|| Error::MalformedSignature("no SignerInfo in signed data".into()))?;
    if signed_data.signer_infos.0.len() > 1 {
        log::warn!(
            "signed data carries {} signers, verifying the first",
            signed_data.signer_infos.0.len()
        );
    }

    let digest_algorithm = DigestAlgorithm::from_oid(&signer.digest_alg.oid.to_string())
        .ok_or_else(|| {
            Error::MalformedSignature(format!(
                "unsupported digest algorithm {}",
                signer.digest_alg.oid
            ))
        })?;

    let (signer_cert_der, other_certs_der) = split_certificates(&signed_data, &signer.sid)?;
    let spki = signer_cert_der
        .as_deref()
        .map(rsa_key_from_cert)
        .transpose()?;

    let mut failures = Vec::new();

    let encapsulated = signed_data
        .encap_content_info
        .econtent
        .as_ref()
        .map(|content| {
            content.decode_as::<OctetString>().map_err(|e| {
                Error::MalformedSignature(format!("decoding encapsulated content: {}", e))
            })
        })
        .transpose()?
        .map(|o| o.as_bytes().to_vec());

    // For the non-detached form the signed message is the encapsulated
    // content, which must itself be the SHA-1 of the byte range
    let (signed_message, content_bound) = match &encapsulated {
        Some(content) => {
            let bound = content.as_slice() == DigestAlgorithm::Sha1.digest(message).as_slice();
            if !bound {
                failures
                    .push("encapsulated content does not match SHA-1 of the byte range".into());
            }
            (content.as_slice(), bound)
        },
        None => (message, true),
    };

    let message_digest = digest_algorithm.digest(signed_message);
    let signature = signer.signature.as_bytes();

    let (digest_match, signature_valid, signing_time) = match &signer.signed_attrs {
        Some(attrs) => {
            // Digest check: messageDigest attribute against the signed message
            let declared = find_message_digest(attrs)?;
            let attr_match = declared == message_digest;
            if !attr_match {
                failures.push("messageDigest attribute does not match document digest".into());
            }
            let digest_match = attr_match && content_bound;

            // Signature is over the DER SET OF the signed attributes
            let attrs_der = attrs
                .to_der()
                .map_err(|e| Error::MalformedSignature(format!("re-encoding signed attributes: {}", e)))?;
            let attrs_digest = digest_algorithm.digest(&attrs_der);

            let signature_valid = match &spki {
                Some(key) => {
                    match rsa_verify(key, digest_algorithm, &attrs_digest, signature) {
                        Ok(()) => true,
                        Err(e) => {
                            failures.push(format!("signature verification failed: {}", e));
                            false
                        },
                    }
                },
                None => {
                    failures.push("no certificate matches the signer identifier".into());
                    false
                },
            };

            (digest_match, signature_valid, find_signing_time(attrs))
        },
        None => {
            // No signed attributes: the signature is directly over the
            // digest of the signed message, so a valid signature implies a
            // digest match.
            let ok = match &spki {
                Some(key) => match rsa_verify(key, digest_algorithm, &message_digest, signature) {
                    Ok(()) => true,
                    Err(e) => {
                        failures.push(format!("signature verification failed: {}", e));
                        false
                    },
                },
                None => {
                    failures.push("no certificate matches the signer identifier".into());
                    false
                },
            };
            (ok && content_bound, ok, None)
        },
    };

    Ok(CmsVerification {
        digest_algorithm,
        digest_match,
        signature_valid,
        encapsulated: encapsulated.is_some(),
        signer_cert_der,
        other_certs_der,
        signing_time,
        failures,
    })
}

/// Decode a blob as `ContentInfo` wrapping signed data, tolerating producers
/// that write a bare `SignedData`.
fn decode_signed_data(blob: &[u8]) -> Result<SignedData> {
    match ContentInfo::from_der(blob) {
        Ok(ci) => {
            if ci.content_type != OID_SIGNED_DATA {
                return Err(Error::MalformedSignature(format!(
                    "ContentInfo holds {}, expected signed data",
                    ci.content_type
                )));
            }
            ci.content
                .decode_as::<SignedData>()
                .map_err(|e| Error::MalformedSignature(format!("decoding SignedData: {}", e)))
        },
        Err(outer) => SignedData::from_der(blob).map_err(|_| {
            Error::MalformedSignature(format!("decoding ContentInfo: {}", outer))
        }),
    }
}

/// Split the embedded certificate set into the signer's certificate and the
/// rest, matching by issuer and serial number.
fn split_certificates(
    signed_data: &SignedData,
    sid: &SignerIdentifier,
) -> Result<(Option<Vec<u8>>, Vec<Vec<u8>>)> {
    let iasn: &IssuerAndSerialNumber = match sid {
        SignerIdentifier::IssuerAndSerialNumber(iasn) => iasn,
        SignerIdentifier::SubjectKeyIdentifier(_) => {
            return Err(Error::MalformedSignature(
                "SubjectKeyIdentifier signer identifiers are not supported".into(),
            ))
        },
    };

    let mut signer = None;
    let mut others = Vec::new();
    if let Some(certs) = &signed_data.certificates {
        for choice in certs.0.iter() {
            let cert = match choice {
                CertificateChoices::Certificate(c) => c,
                _ => {
                    log::warn!("skipping non-X.509 certificate choice in signed data");
                    continue;
                },
            };
            let der = cert
                .to_der()
                .map_err(|e| Error::MalformedSignature(format!("re-encoding certificate: {}", e)))?;
            let matches = cert.tbs_certificate.issuer == iasn.issuer
                && cert.tbs_certificate.serial_number == iasn.serial_number;
            if matches && signer.is_none() {
                signer = Some(der);
            } else {
                others.push(der);
            }
        }
    }
    Ok((signer, others))
}

/// Extract the messageDigest signed attribute.
fn find_message_digest(attrs: &SignedAttributes) -> Result<Vec<u8>> {
    for attr in attrs.iter() {
        if attr.oid == OID_MESSAGE_DIGEST {
            let value = attr.values.iter().next().ok_or_else(|| {
                Error::MalformedSignature("empty messageDigest attribute".into())
            })?;
            let octets = value.decode_as::<OctetString>().map_err(|e| {
                Error::MalformedSignature(format!("messageDigest is not an octet string: {}", e))
            })?;
            return Ok(octets.as_bytes().to_vec());
        }
    }
    Err(Error::MalformedSignature(
        "signed attributes missing messageDigest".into(),
    ))
}

/// Extract the claimed signing time, if present.
fn find_signing_time(attrs: &SignedAttributes) -> Option<DateTime<Utc>> {
    for attr in attrs.iter() {
        if attr.oid == OID_SIGNING_TIME {
            let value = attr.values.iter().next()?;
            return decode_time(value);
        }
    }
    None
}

fn decode_time(any: &Any) -> Option<DateTime<Utc>> {
    let secs = if let Ok(t) = any.decode_as::<UtcTime>() {
        t.to_unix_duration().as_secs() as i64
    } else if let Ok(t) = any.decode_as::<GeneralizedTime>() {
        t.to_unix_duration().as_secs() as i64
    } else {
        return None;
    };
    Utc.timestamp_opt(secs, 0).single()
}

/// Pull the RSA public key out of a DER certificate.
fn rsa_key_from_cert(cert_der: &[u8]) -> Result<RsaPublicKey> {
    let cert = x509_cert::Certificate::from_der(cert_der)
        .map_err(|e| Error::MalformedSignature(format!("decoding certificate: {}", e)))?;
    let key_bits = cert
        .tbs_certificate
        .subject_public_key_info
        .subject_public_key
        .raw_bytes();
    RsaPublicKey::from_pkcs1_der(key_bits)
        .map_err(|e| Error::MalformedSignature(format!("unsupported public key: {}", e)))
}

/// PKCS#1 v1.5 verification of `signature` over an already-hashed message.
pub(crate) fn rsa_verify(
    key: &RsaPublicKey,
    alg: DigestAlgorithm,
    hashed: &[u8],
    signature: &[u8],
) -> std::result::Result<(), rsa::Error> {
    let scheme = match alg {
        DigestAlgorithm::Sha1 => Pkcs1v15Sign::new::<sha1::Sha1>(),
        DigestAlgorithm::Sha256 => Pkcs1v15Sign::new::<sha2::Sha256>(),
        DigestAlgorithm::Sha384 => Pkcs1v15Sign::new::<sha2::Sha384>(),
        DigestAlgorithm::Sha512 => Pkcs1v15Sign::new::<sha2::Sha512>(),
    };
    key.verify(scheme, hashed, signature)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_garbage_der() {
        let err = verify_blob(b"not der at all", b"message").unwrap_err();
        assert!(matches!(err, Error::MalformedSignature(_)));
    }

    #[test]
    fn test_rejects_wrong_content_type() {
        // ContentInfo with id-data (1.2.840.113549.1.7.1) and no content:
        // SEQUENCE { OID }
        let der: &[u8] = &[
            0x30, 0x0B, 0x06, 0x09, 0x2A, 0x86, 0x48, 0x86, 0xF7, 0x0D, 0x01, 0x07, 0x01,
        ];
        let err = verify_blob(der, b"").unwrap_err();
        assert!(matches!(err, Error::MalformedSignature(_)));
    }

    #[test]
    fn test_rejects_empty_blob() {
        assert!(verify_blob(b"", b"").is_err());
    }
}

//! Shared signature types: digest algorithms and PDF `/SubFilter` values.

use sha1::Sha1;
use sha2::{Digest, Sha256, Sha384, Sha512};

/// Digest algorithms accepted in CMS signed data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DigestAlgorithm {
    Sha1,
    Sha256,
    Sha384,
    Sha512,
}

impl DigestAlgorithm {
    /// Map a dotted OID string to a known algorithm.
    pub fn from_oid(oid: &str) -> Option<Self> {
        match oid {
            "1.3.14.3.2.26" => Some(Self::Sha1),
            "2.16.840.1.101.3.4.2.1" => Some(Self::Sha256),
            "2.16.840.1.101.3.4.2.2" => Some(Self::Sha384),
            "2.16.840.1.101.3.4.2.3" => Some(Self::Sha512),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Sha1 => "SHA-1",
            Self::Sha256 => "SHA-256",
            Self::Sha384 => "SHA-384",
            Self::Sha512 => "SHA-512",
        }
    }

    /// Hash `data` with this algorithm.
    pub fn digest(&self, data: &[u8]) -> Vec<u8> {
        match self {
            Self::Sha1 => Sha1::digest(data).to_vec(),
            Self::Sha256 => Sha256::digest(data).to_vec(),
            Self::Sha384 => Sha384::digest(data).to_vec(),
            Self::Sha512 => Sha512::digest(data).to_vec(),
        }
    }
}

/// Recognized values of a signature dictionary's `/SubFilter`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubFilter {
    /// `adbe.pkcs7.detached`: CMS over the byte range
    AdbePkcs7Detached,
    /// `adbe.pkcs7.sha1`: CMS over a SHA-1 digest embedded as content
    AdbePkcs7Sha1,
    /// `ETSI.CAdES.detached`: PAdES baseline
    EtsiCadesDetached,
    /// Anything else, kept verbatim for reporting
    Other(String),
}

impl SubFilter {
    pub fn from_pdf_name(name: &str) -> Self {
        match name {
            "adbe.pkcs7.detached" => Self::AdbePkcs7Detached,
            "adbe.pkcs7.sha1" => Self::AdbePkcs7Sha1,
            "ETSI.CAdES.detached" => Self::EtsiCadesDetached,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_pdf_name(&self) -> &str {
        match self {
            Self::AdbePkcs7Detached => "adbe.pkcs7.detached",
            Self::AdbePkcs7Sha1 => "adbe.pkcs7.sha1",
            Self::EtsiCadesDetached => "ETSI.CAdES.detached",
            Self::Other(s) => s,
        }
    }

    /// Whether the CMS blob signs the byte range directly (detached).
    pub fn is_detached(&self) -> bool {
        !matches!(self, Self::AdbePkcs7Sha1)
    }
}

//! Error types for the signature analysis engine.
//!
//! Structural errors (a broken trailer chain, an unreadable object) abort the
//! request that hit them. Per-field verification failures never do: they are
//! folded into that field's verdict and the document is classified `invalid`
//! instead.

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while analyzing or updating a document.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The document path does not exist.
    #[error("document not found: {0}")]
    NotFound(String),

    /// The xref/trailer chain or object table is unreadable.
    #[error("malformed document structure at byte {offset}: {reason}")]
    MalformedStructure {
        /// Byte offset where parsing gave up
        offset: usize,
        /// Reason the structure could not be read
        reason: String,
    },

    /// The embedded signature blob cannot be parsed as CMS signed-data.
    #[error("malformed signature blob: {0}")]
    MalformedSignature(String),

    /// The recomputed digest does not match the one carried in the blob.
    #[error("message digest mismatch over declared byte ranges")]
    DigestMismatch,

    /// The cryptographic signature does not verify against the signer key.
    #[error("signature does not verify: {0}")]
    SignatureInvalid(String),

    /// No path from the signer certificate to a trusted anchor exists.
    #[error("certificate chain incomplete: {0}")]
    ChainIncomplete(String),

    /// The signing time falls outside some chain link's validity window.
    #[error("certificate not valid at signing time: {0}")]
    Expired(String),

    /// Revocation data marks a chain link revoked.
    #[error("certificate revoked: {0}")]
    Revoked(String),

    /// A new field's name collides with an existing field.
    #[error("duplicate signature field name: {0:?}")]
    DuplicateFieldName(String),

    /// IO error while reading or publishing a document.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Shorthand for a structural error with offset context.
    pub(crate) fn structure(offset: usize, reason: impl Into<String>) -> Self {
        Error::MalformedStructure {
            offset,
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_structure_error_message() {
        let err = Error::structure(1234, "broken trailer");
        let msg = format!("{}", err);
        assert!(msg.contains("1234"));
        assert!(msg.contains("broken trailer"));
    }

    #[test]
    fn test_duplicate_field_name_message() {
        let err = Error::DuplicateFieldName("Sig1".to_string());
        assert!(format!("{}", err).contains("Sig1"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: Error = io.into();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_error_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Error>();
    }
}

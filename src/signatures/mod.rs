//! Signature analysis: byte-range coverage, CMS verification, and
//! certificate chain validation.

pub mod byterange;
pub mod chain;
pub mod cms;
pub mod types;

pub use byterange::ByteRange;
pub use chain::{ChainReport, ChainValidator, OfflineRevocation, RevocationOracle, RevocationStatus};
pub use cms::CmsVerification;
pub use types::{DigestAlgorithm, SubFilter};

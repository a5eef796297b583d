//! PDF digital signature analysis.
//!
//! `pdf_signet` parses PDF documents revision by revision, locates signature
//! fields, verifies CMS (PKCS#7) signatures and their certificate chains,
//! classifies documents by signature state, and can add unsigned signature
//! fields through incremental updates that leave existing signatures intact.
//!
//! # Example
//!
//! ```no_run
//! use pdf_signet::{SignatureEngine, DocumentState};
//! use std::path::Path;
//!
//! # fn main() -> pdf_signet::Result<()> {
//! let engine = SignatureEngine::new();
//! let report = engine.analyze(Path::new("contract.pdf"))?;
//! match report.state {
//!     DocumentState::Signed => println!("all signatures verified"),
//!     state => println!("document is {}", state),
//! }
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod classify;
pub mod document;
pub mod error;
pub mod fields;
pub mod inject;
pub mod lexer;
pub mod object;
pub mod parser;
pub mod revision;
pub mod serializer;
pub mod signatures;
pub mod xref;

pub use api::{AnalysisReport, FieldReport, SignatureEngine};
pub use classify::{DocumentState, FieldStatus};
pub use document::Document;
pub use error::{Error, Result};
pub use fields::{SignatureField, SignatureValue};
pub use inject::InjectOptions;
pub use object::{Dict, Object, ObjectRef};
pub use revision::{Revision, RevisionChain};
pub use signatures::{
    ByteRange, ChainReport, ChainValidator, CmsVerification, DigestAlgorithm, OfflineRevocation,
    RevocationOracle, RevocationStatus, SubFilter,
};

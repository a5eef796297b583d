//! Integration tests for the analysis pipeline.
//!
//! Builds small synthetic documents in memory and drives them through the
//! engine: revision detection, field discovery, state classification, and
//! report serialization.

use pdf_signet::{Document, DocumentState, SignatureEngine};

fn init_logs() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// A single-revision PDF with a catalog, one page, and no form.
fn pdf_without_fields() -> Vec<u8> {
    let mut pdf = Vec::new();
    pdf.extend_from_slice(b"%PDF-1.6\n");
    let obj1 = pdf.len();
    pdf.extend_from_slice(b"1 0 obj\n<< /Type /Catalog /Pages 2 0 R >>\nendobj\n");
    let obj2 = pdf.len();
    pdf.extend_from_slice(b"2 0 obj\n<< /Type /Pages /Kids [3 0 R] /Count 1 >>\nendobj\n");
    let obj3 = pdf.len();
    pdf.extend_from_slice(b"3 0 obj\n<< /Type /Page /Parent 2 0 R >>\nendobj\n");
    let xref = pdf.len();
    let table = format!(
        "xref\n0 4\n0000000000 65535 f \n{:010} 00000 n \n{:010} 00000 n \n{:010} 00000 n \ntrailer\n<< /Size 4 /Root 1 0 R >>\nstartxref\n{}\n%%EOF\n",
        obj1, obj2, obj3, xref
    );
    pdf.extend_from_slice(table.as_bytes());
    pdf
}

/// Same document plus an AcroForm holding one unsigned signature field.
fn pdf_with_unsigned_field() -> Vec<u8> {
    let mut pdf = Vec::new();
    pdf.extend_from_slice(b"%PDF-1.6\n");
    let obj1 = pdf.len();
    pdf.extend_from_slice(b"1 0 obj\n<< /Type /Catalog /Pages 2 0 R /AcroForm << /Fields [4 0 R] /SigFlags 3 >> >>\nendobj\n");
    let obj2 = pdf.len();
    pdf.extend_from_slice(b"2 0 obj\n<< /Type /Pages /Kids [3 0 R] /Count 1 >>\nendobj\n");
    let obj3 = pdf.len();
    pdf.extend_from_slice(b"3 0 obj\n<< /Type /Page /Parent 2 0 R /Annots [4 0 R] >>\nendobj\n");
    let obj4 = pdf.len();
    pdf.extend_from_slice(
        b"4 0 obj\n<< /Type /Annot /Subtype /Widget /FT /Sig /T (Approval) /P 3 0 R >>\nendobj\n",
    );
    let xref = pdf.len();
    let table = format!(
        "xref\n0 5\n0000000000 65535 f \n{:010} 00000 n \n{:010} 00000 n \n{:010} 00000 n \n{:010} 00000 n \ntrailer\n<< /Size 5 /Root 1 0 R >>\nstartxref\n{}\n%%EOF\n",
        obj1, obj2, obj3, obj4, xref
    );
    pdf.extend_from_slice(table.as_bytes());
    pdf
}

#[test]
fn test_document_without_fields_classifies_as_no_signature_fields() {
    init_logs();
    let engine = SignatureEngine::new();
    let report = engine.analyze_bytes(pdf_without_fields()).unwrap();
    assert_eq!(report.state, DocumentState::NoSignatureFields);
    assert!(report.fields.is_empty());
    assert_eq!(report.revision_count, 1);
    assert_eq!(report.pdf_version, "1.6");
}

#[test]
fn test_unsigned_field_classifies_as_unsigned_fields() {
    init_logs();
    let engine = SignatureEngine::new();
    let report = engine.analyze_bytes(pdf_with_unsigned_field()).unwrap();
    assert_eq!(report.state, DocumentState::UnsignedFields);
    assert_eq!(report.fields.len(), 1);
    let field = &report.fields[0];
    assert_eq!(field.name, "Approval");
    assert!(!field.signed);
    assert_eq!(field.introduced_in, 0);
    assert_eq!(field.signed_in, None);
}

#[test]
fn test_report_serializes_to_json() {
    init_logs();
    let engine = SignatureEngine::new();
    let report = engine.analyze_bytes(pdf_with_unsigned_field()).unwrap();
    let json = report.to_json().unwrap();
    assert!(json.contains("\"state\": \"unsigned_fields\""));
    assert!(json.contains("\"Approval\""));
}

#[test]
fn test_analysis_is_repeatable() {
    init_logs();
    let engine = SignatureEngine::new();
    let first = engine.analyze_bytes(pdf_with_unsigned_field()).unwrap();
    let second = engine.analyze_bytes(pdf_with_unsigned_field()).unwrap();
    assert_eq!(first.state, second.state);
    assert_eq!(first.fields.len(), second.fields.len());
}

#[test]
fn test_truncated_document_is_rejected() {
    init_logs();
    let engine = SignatureEngine::new();
    let mut bytes = pdf_without_fields();
    bytes.truncate(40);
    assert!(engine.analyze_bytes(bytes).is_err());
}

#[test]
fn test_document_revision_chain_is_exposed() {
    init_logs();
    let doc = Document::from_bytes(pdf_without_fields()).unwrap();
    assert_eq!(doc.revisions().len(), 1);
    assert_eq!(doc.latest().index, 0);
    let bytes_len = doc.bytes().len() as u64;
    assert_eq!(doc.latest().end_offset, bytes_len);
}

#[test]
fn test_missing_file_yields_not_found() {
    init_logs();
    let engine = SignatureEngine::new();
    let err = engine
        .analyze(std::path::Path::new("/definitely/not/here.pdf"))
        .unwrap_err();
    assert!(matches!(err, pdf_signet::Error::NotFound(_)));
}

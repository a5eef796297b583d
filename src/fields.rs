//! Signature field location.
//!
//! Walks the AcroForm field tree of each revision and collects signature
//! fields (`/FT /Sig`, inherited through parents), recording when each field
//! first appeared and when it first carried a real signature value.

use crate::document::Document;
use crate::error::Result;
use crate::object::{Dict, Object};
use crate::revision::Revision;
use crate::signatures::{ByteRange, SubFilter};
use crate::xref::XrefEntry;
use std::collections::{HashMap, HashSet};

/// The `/V` payload of a signed field.
#[derive(Debug, Clone)]
pub struct SignatureValue {
    /// Raw CMS blob from `/Contents`
    pub contents: Vec<u8>,
    /// Parsed `/ByteRange`, when present and well formed
    pub byte_range: Option<ByteRange>,
    /// `/SubFilter`
    pub sub_filter: Option<SubFilter>,
    /// `/Name` (claimed signer)
    pub signer_name: Option<String>,
    /// `/M` (claimed signing date, PDF date string)
    pub modified_date: Option<String>,
    /// Problems found while reading the dictionary
    pub issues: Vec<String>,
}

impl SignatureValue {
    /// An unsigned placeholder: empty `/Contents` or all zero bytes, the
    /// shape left behind by field preparation before actual signing.
    pub fn is_placeholder(&self) -> bool {
        self.contents.is_empty() || self.contents.iter().all(|&b| b == 0)
    }
}

/// One signature field, merged across all revisions.
#[derive(Debug, Clone)]
pub struct SignatureField {
    /// Fully qualified field name (dotted path of `/T` values)
    pub name: String,
    /// Revision index where the field first appeared
    pub introduced_in: usize,
    /// Revision index where a real signature value first appeared
    pub signed_in: Option<usize>,
    /// The field's value in the newest revision
    pub value: Option<SignatureValue>,
}

impl SignatureField {
    pub fn is_signed(&self) -> bool {
        self.value.as_ref().is_some_and(|v| !v.is_placeholder())
    }
}

/// Collect signature fields across every revision of the document.
///
/// Fields are keyed by fully qualified name; a field present in multiple
/// revisions contributes its earliest appearance and its newest value.
pub fn collect_signature_fields(doc: &Document) -> Result<Vec<SignatureField>> {
    // name -> (introduced_in, signed_in, latest value)
    let mut merged: HashMap<String, SignatureField> = HashMap::new();
    let mut order: Vec<String> = Vec::new();

    for revision in doc.revisions() {
        let found = fields_in_revision(doc, revision)?;
        for (name, value) in found {
            let signed_here = value.as_ref().is_some_and(|v| !v.is_placeholder());
            match merged.get_mut(&name) {
                Some(field) => {
                    if signed_here && field.signed_in.is_none() {
                        field.signed_in = Some(revision.index);
                    }
                    field.value = value;
                },
                None => {
                    order.push(name.clone());
                    merged.insert(
                        name.clone(),
                        SignatureField {
                            name,
                            introduced_in: revision.index,
                            signed_in: signed_here.then_some(revision.index),
                            value,
                        },
                    );
                },
            }
        }
    }

    Ok(order
        .into_iter()
        .map(|name| merged.remove(&name).expect("field recorded"))
        .collect())
}

/// Signature fields visible in one revision: name to optional value.
fn fields_in_revision(
    doc: &Document,
    revision: &Revision,
) -> Result<Vec<(String, Option<SignatureValue>)>> {
    let catalog = match doc.catalog_at(revision) {
        Ok(c) => c,
        Err(e) => {
            log::warn!("revision {}: unreadable catalog: {}", revision.index, e);
            return Ok(Vec::new());
        },
    };

    let acroform = match doc.dict_get_resolved(revision, &catalog, "AcroForm") {
        Some(Object::Dictionary(d)) => d,
        Some(_) | None => return Ok(Vec::new()),
    };
    let fields = match doc.dict_get_resolved(revision, &acroform, "Fields") {
        Some(Object::Array(arr)) => arr,
        Some(_) | None => return Ok(Vec::new()),
    };

    let mut out = Vec::new();
    let mut visited = HashSet::new();
    for entry in &fields {
        walk_field(doc, revision, entry, "", None, &mut visited, &mut out);
    }
    Ok(out)
}

/// Recurse through a field node and its `/Kids`.
///
/// `prefix` is the dotted path of ancestor `/T` values; `inherited_ft` the
/// nearest ancestor `/FT`. Reference cycles are cut with `visited`.
fn walk_field(
    doc: &Document,
    revision: &Revision,
    node: &Object,
    prefix: &str,
    inherited_ft: Option<&str>,
    visited: &mut HashSet<u32>,
    out: &mut Vec<(String, Option<SignatureValue>)>,
) {
    if let Object::Reference(r) = node {
        if !visited.insert(r.id) {
            log::warn!("cycle in field tree at object {}", r.id);
            return;
        }
    }
    let dict = match doc.resolve_at(revision, node) {
        Ok(Object::Dictionary(d)) => d,
        Ok(_) => return,
        Err(e) => {
            log::warn!("revision {}: unreadable field node: {}", revision.index, e);
            return;
        },
    };

    let partial = doc
        .dict_get_resolved(revision, &dict, "T")
        .and_then(|o| o.as_string().map(decode_text_string));
    let name = match (&partial, prefix.is_empty()) {
        (Some(t), true) => t.clone(),
        (Some(t), false) => format!("{}.{}", prefix, t),
        (None, _) => prefix.to_string(),
    };

    let ft_obj = doc.dict_get_resolved(revision, &dict, "FT");
    let ft = ft_obj
        .as_ref()
        .and_then(Object::as_name)
        .or(inherited_ft);

    let kids = doc.dict_get_resolved(revision, &dict, "Kids");
    match kids {
        Some(Object::Array(kids)) if !kids.is_empty() && !is_widget_only_kids(doc, revision, &kids) => {
            for kid in &kids {
                walk_field(doc, revision, kid, &name, ft, visited, out);
            }
        },
        _ => {
            if ft == Some("Sig") && !name.is_empty() {
                // A /V reference stored past this revision's end belongs to
                // a later revision; the field is unsigned here
                let value = match dict.get("V") {
                    Some(v) if !value_within_revision(revision, v) => None,
                    _ => doc
                        .dict_get_resolved(revision, &dict, "V")
                        .and_then(|v| v.as_dict().cloned())
                        .map(|v| read_signature_value(doc, revision, &v)),
                };
                out.push((name, value));
            }
        },
    }
}

/// Whether a `/V` entry's object lives inside the revision's byte range.
fn value_within_revision(revision: &Revision, value: &Object) -> bool {
    match value {
        Object::Reference(r) => match revision.entry(r.id) {
            Some(XrefEntry::InFile { offset, .. }) => offset < revision.end_offset,
            _ => true,
        },
        _ => true,
    }
}

/// Kids that are pure widget annotations (no `/T`) belong to the same
/// terminal field rather than forming child fields.
fn is_widget_only_kids(doc: &Document, revision: &Revision, kids: &[Object]) -> bool {
    kids.iter().all(|kid| match doc.resolve_at(revision, kid) {
        Ok(Object::Dictionary(d)) => !d.contains_key("T"),
        _ => false,
    })
}

/// Read the interesting parts of a signature dictionary.
fn read_signature_value(doc: &Document, revision: &Revision, sig: &Dict) -> SignatureValue {
    let mut issues = Vec::new();

    let contents = match doc.dict_get_resolved(revision, sig, "Contents") {
        Some(Object::String(bytes)) => bytes,
        Some(_) => {
            issues.push("/Contents is not a string".into());
            Vec::new()
        },
        None => Vec::new(),
    };

    let byte_range = match doc.dict_get_resolved(revision, sig, "ByteRange") {
        Some(obj) => match ByteRange::from_object(&obj) {
            Ok(br) => Some(br),
            Err(e) => {
                issues.push(e.to_string());
                None
            },
        },
        None => None,
    };

    let sub_filter = doc
        .dict_get_resolved(revision, sig, "SubFilter")
        .as_ref()
        .and_then(Object::as_name)
        .map(SubFilter::from_pdf_name);

    let signer_name = doc
        .dict_get_resolved(revision, sig, "Name")
        .and_then(|o| o.as_string().map(decode_text_string));
    let modified_date = doc
        .dict_get_resolved(revision, sig, "M")
        .and_then(|o| o.as_string().map(decode_text_string));

    SignatureValue {
        contents,
        byte_range,
        sub_filter,
        signer_name,
        modified_date,
        issues,
    }
}

/// Decode a PDF text string: UTF-16BE when it carries a BOM, otherwise
/// treated as PDFDocEncoding approximated by Latin-1.
pub fn decode_text_string(bytes: &[u8]) -> String {
    if bytes.starts_with(&[0xFE, 0xFF]) {
        let units: Vec<u16> = bytes[2..]
            .chunks_exact(2)
            .map(|c| u16::from_be_bytes([c[0], c[1]]))
            .collect();
        String::from_utf16_lossy(&units)
    } else {
        bytes.iter().map(|&b| b as char).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pdf_with_field(contents_hex: &str) -> Vec<u8> {
        let mut pdf = Vec::new();
        pdf.extend_from_slice(b"%PDF-1.6\n");
        let obj1 = pdf.len();
        pdf.extend_from_slice(b"1 0 obj\n<< /Type /Catalog /AcroForm 2 0 R >>\nendobj\n");
        let obj2 = pdf.len();
        pdf.extend_from_slice(b"2 0 obj\n<< /Fields [3 0 R] /SigFlags 3 >>\nendobj\n");
        let obj3 = pdf.len();
        let field = format!(
            "3 0 obj\n<< /FT /Sig /T (Sig1) /V << /Type /Sig /ByteRange [0 10 20 10] /Contents <{}> /Name (Alice) >> >>\nendobj\n",
            contents_hex
        );
        pdf.extend_from_slice(field.as_bytes());
        let xref = pdf.len();
        let table = format!(
            "xref\n0 4\n0000000000 65535 f \n{:010} 00000 n \n{:010} 00000 n \n{:010} 00000 n \ntrailer\n<< /Size 4 /Root 1 0 R >>\nstartxref\n{}\n%%EOF\n",
            obj1, obj2, obj3, xref
        );
        pdf.extend_from_slice(table.as_bytes());
        pdf
    }

    #[test]
    fn test_no_acroform_means_no_fields() {
        let mut pdf = Vec::new();
        pdf.extend_from_slice(b"%PDF-1.4\n");
        let obj1 = pdf.len();
        pdf.extend_from_slice(b"1 0 obj\n<< /Type /Catalog >>\nendobj\n");
        let xref = pdf.len();
        let table = format!(
            "xref\n0 2\n0000000000 65535 f \n{:010} 00000 n \ntrailer\n<< /Size 2 /Root 1 0 R >>\nstartxref\n{}\n%%EOF\n",
            obj1, xref
        );
        pdf.extend_from_slice(table.as_bytes());

        let doc = Document::from_bytes(pdf).unwrap();
        assert!(collect_signature_fields(&doc).unwrap().is_empty());
    }

    #[test]
    fn test_signed_field_extraction() {
        let doc = Document::from_bytes(pdf_with_field("DEADBEEF")).unwrap();
        let fields = collect_signature_fields(&doc).unwrap();
        assert_eq!(fields.len(), 1);
        let field = &fields[0];
        assert_eq!(field.name, "Sig1");
        assert_eq!(field.introduced_in, 0);
        assert_eq!(field.signed_in, Some(0));
        assert!(field.is_signed());
        let value = field.value.as_ref().unwrap();
        assert_eq!(value.contents, vec![0xDE, 0xAD, 0xBE, 0xEF]);
        assert_eq!(value.signer_name.as_deref(), Some("Alice"));
        assert!(value.byte_range.is_some());
    }

    #[test]
    fn test_zeroed_contents_is_placeholder() {
        let doc = Document::from_bytes(pdf_with_field("00000000")).unwrap();
        let fields = collect_signature_fields(&doc).unwrap();
        assert_eq!(fields.len(), 1);
        assert!(!fields[0].is_signed());
        assert_eq!(fields[0].signed_in, None);
        assert!(fields[0].value.as_ref().unwrap().is_placeholder());
    }

    #[test]
    fn test_decode_text_string_utf16() {
        let bytes = [0xFE, 0xFF, 0x00, b'H' as u8, 0x00, b'i' as u8];
        assert_eq!(decode_text_string(&bytes), "Hi");
        assert_eq!(decode_text_string(b"plain"), "plain");
        assert_eq!(decode_text_string(&[0xE9]), "\u{e9}");
    }
}

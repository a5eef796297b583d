//! Incremental signature field injection.
//!
//! Appends a new revision that adds one unsigned signature field: a widget
//! annotation object, an updated page `/Annots`, and an updated (or new)
//! `/AcroForm`. The original bytes are never touched, so existing signatures
//! stay verifiable.

use crate::document::Document;
use crate::error::{Error, Result};
use crate::fields::collect_signature_fields;
use crate::object::{dict_name_is, Dict, Object, ObjectRef};
use crate::serializer::ObjectSerializer;
use std::collections::HashSet;
use std::io::Write;
use std::path::Path;

/// Placement options for the new field's widget.
#[derive(Debug, Clone)]
pub struct InjectOptions {
    /// Zero-based page index the widget lands on
    pub page: usize,
    /// Widget rectangle in page coordinates; all zeros is an invisible field
    pub rect: [f64; 4],
}

impl Default for InjectOptions {
    fn default() -> Self {
        Self {
            page: 0,
            rect: [0.0, 0.0, 0.0, 0.0],
        }
    }
}

/// Add an unsigned signature field and return the full updated document
/// bytes (original content plus one incremental update).
pub fn add_signature_field(doc: &Document, name: &str, opts: &InjectOptions) -> Result<Vec<u8>> {
    let existing = collect_signature_fields(doc)?;
    if existing.iter().any(|f| f.name == name) {
        return Err(Error::DuplicateFieldName(name.to_string()));
    }

    let revision = doc.latest();
    let root_ref = match revision.trailer.get("Root") {
        Some(Object::Reference(r)) => *r,
        _ => return Err(Error::structure(0, "trailer /Root is not a reference")),
    };
    let catalog = doc.catalog_at(revision)?;
    let (page_ref, page_dict) = find_page(doc, opts.page)?;

    let mut next_id = doc.max_object_id() + 1;
    let mut alloc = || {
        let id = next_id;
        next_id += 1;
        id
    };
    // id -> rewritten object for the new revision
    let mut updates: Vec<(u32, Object)> = Vec::new();

    let field_id = alloc();
    let field_ref = ObjectRef::new(field_id, 0);

    // Field and widget merged into one dictionary, the common shape for a
    // single-widget field
    let mut field = Dict::new();
    field.insert("Type".into(), Object::Name("Annot".into()));
    field.insert("Subtype".into(), Object::Name("Widget".into()));
    field.insert("FT".into(), Object::Name("Sig".into()));
    field.insert("T".into(), Object::String(name.as_bytes().to_vec()));
    field.insert(
        "Rect".into(),
        Object::Array(opts.rect.iter().map(|&v| Object::Real(v)).collect()),
    );
    field.insert("F".into(), Object::Integer(4));
    field.insert("P".into(), Object::Reference(page_ref));
    updates.push((field_id, Object::Dictionary(field)));

    // Page /Annots gains the widget
    let mut page = page_dict;
    match page.get("Annots").cloned() {
        Some(Object::Reference(r)) => {
            let mut annots = match doc.resolve_at(revision, &Object::Reference(r))? {
                Object::Array(a) => a,
                _ => return Err(Error::structure(0, "/Annots is not an array")),
            };
            annots.push(Object::Reference(field_ref));
            updates.push((r.id, Object::Array(annots)));
        },
        Some(Object::Array(mut annots)) => {
            annots.push(Object::Reference(field_ref));
            page.insert("Annots".into(), Object::Array(annots));
            updates.push((page_ref.id, Object::Dictionary(page)));
        },
        Some(_) | None => {
            page.insert(
                "Annots".into(),
                Object::Array(vec![Object::Reference(field_ref)]),
            );
            updates.push((page_ref.id, Object::Dictionary(page)));
        },
    }

    // AcroForm gains the field
    match catalog.get("AcroForm").cloned() {
        Some(Object::Reference(r)) => {
            let mut acroform = match doc.resolve_at(revision, &Object::Reference(r))? {
                Object::Dictionary(d) => d,
                _ => return Err(Error::structure(0, "/AcroForm is not a dictionary")),
            };
            append_field(doc, &mut acroform, field_ref, &mut updates)?;
            updates.push((r.id, Object::Dictionary(acroform)));
        },
        Some(Object::Dictionary(mut acroform)) => {
            append_field(doc, &mut acroform, field_ref, &mut updates)?;
            let mut new_catalog = catalog;
            new_catalog.insert("AcroForm".into(), Object::Dictionary(acroform));
            updates.push((root_ref.id, Object::Dictionary(new_catalog)));
        },
        Some(_) | None => {
            let af_id = alloc();
            let mut acroform = Dict::new();
            acroform.insert("Fields".into(), Object::Array(vec![Object::Reference(field_ref)]));
            acroform.insert("SigFlags".into(), Object::Integer(3));
            updates.push((af_id, Object::Dictionary(acroform)));

            let mut new_catalog = catalog;
            new_catalog.insert("AcroForm".into(), Object::Reference(ObjectRef::new(af_id, 0)));
            updates.push((root_ref.id, Object::Dictionary(new_catalog)));
        },
    }

    log::info!(
        "adding signature field {:?} as object {} on page {}",
        name,
        field_id,
        opts.page
    );
    build_incremental_update(doc, updates, next_id, root_ref)
}

/// Append `field_ref` to an AcroForm's `/Fields`, following an indirect
/// array when needed, and make sure `/SigFlags` is set.
fn append_field(
    doc: &Document,
    acroform: &mut Dict,
    field_ref: ObjectRef,
    updates: &mut Vec<(u32, Object)>,
) -> Result<()> {
    acroform
        .entry("SigFlags".to_string())
        .or_insert(Object::Integer(3));

    match acroform.get("Fields").cloned() {
        Some(Object::Reference(r)) => {
            let mut fields = match doc.resolve_at(doc.latest(), &Object::Reference(r))? {
                Object::Array(a) => a,
                _ => return Err(Error::structure(0, "/Fields is not an array")),
            };
            fields.push(Object::Reference(field_ref));
            updates.push((r.id, Object::Array(fields)));
        },
        Some(Object::Array(mut fields)) => {
            fields.push(Object::Reference(field_ref));
            acroform.insert("Fields".into(), Object::Array(fields));
        },
        Some(_) | None => {
            acroform.insert(
                "Fields".into(),
                Object::Array(vec![Object::Reference(field_ref)]),
            );
        },
    }
    Ok(())
}

/// Locate the page at `index` in the page tree, returning its reference and
/// dictionary.
fn find_page(doc: &Document, index: usize) -> Result<(ObjectRef, Dict)> {
    let revision = doc.latest();
    let catalog = doc.catalog_at(revision)?;
    let pages_ref = match catalog.get("Pages") {
        Some(Object::Reference(r)) => *r,
        _ => return Err(Error::structure(0, "catalog /Pages is not a reference")),
    };

    let mut stack = vec![pages_ref];
    let mut visited = HashSet::new();
    let mut seen_pages = 0usize;

    while let Some(node_ref) = stack.pop() {
        if !visited.insert(node_ref.id) {
            continue;
        }
        let dict = match doc.load_object_at(revision, node_ref.id)? {
            Object::Dictionary(d) => d,
            _ => continue,
        };
        if dict_name_is(&dict, "Type", "Page") {
            if seen_pages == index {
                return Ok((node_ref, dict));
            }
            seen_pages += 1;
        } else if let Some(Object::Array(kids)) =
            doc.dict_get_resolved(revision, &dict, "Kids")
        {
            // Reverse so the stack pops kids in document order
            for kid in kids.iter().rev() {
                if let Object::Reference(r) = kid {
                    stack.push(*r);
                }
            }
        }
    }

    Err(Error::NotFound(format!("page {}", index)))
}

/// Serialize an incremental update: original bytes, the rewritten objects,
/// an xref section with consecutive-run subsections, and a trailer chaining
/// back to the previous revision.
fn build_incremental_update(
    doc: &Document,
    mut updates: Vec<(u32, Object)>,
    next_id: u32,
    root_ref: ObjectRef,
) -> Result<Vec<u8>> {
    let mut out = doc.bytes().to_vec();
    if !out.ends_with(b"\n") && !out.ends_with(b"\r") {
        out.push(b'\n');
    }

    let serializer = ObjectSerializer::new();
    updates.sort_by_key(|(id, _)| *id);
    updates.dedup_by_key(|(id, _)| *id);

    let mut entries: Vec<(u32, u64)> = Vec::with_capacity(updates.len());
    for (id, obj) in &updates {
        entries.push((*id, out.len() as u64));
        out.extend_from_slice(&serializer.serialize_indirect(*id, 0, obj));
    }

    let xref_offset = out.len() as u64;
    out.extend_from_slice(b"xref\n");
    let mut i = 0;
    while i < entries.len() {
        // Consecutive object numbers form one subsection
        let mut j = i;
        while j + 1 < entries.len() && entries[j + 1].0 == entries[j].0 + 1 {
            j += 1;
        }
        let _ = write!(out, "{} {}\n", entries[i].0, j - i + 1);
        for &(_, offset) in &entries[i..=j] {
            let _ = write!(out, "{:010} 00000 n \n", offset);
        }
        i = j + 1;
    }

    let mut trailer = Dict::new();
    trailer.insert("Size".into(), Object::Integer(next_id as i64));
    trailer.insert("Prev".into(), Object::Integer(doc.latest().xref_offset as i64));
    trailer.insert("Root".into(), Object::Reference(root_ref));
    if let Some(info) = doc.latest().trailer.get("Info") {
        trailer.insert("Info".into(), info.clone());
    }

    out.extend_from_slice(b"trailer\n");
    out.extend_from_slice(&serializer.serialize(&Object::Dictionary(trailer)));
    let _ = write!(out, "\nstartxref\n{}\n%%EOF\n", xref_offset);
    Ok(out)
}

/// Write `bytes` to `path` through a temporary file in the same directory,
/// so readers never observe a half-written document.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| Error::Io(e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields::collect_signature_fields;

    /// Catalog, page tree with one page, no AcroForm.
    fn base_pdf() -> Vec<u8> {
        let mut pdf = Vec::new();
        pdf.extend_from_slice(b"%PDF-1.6\n");
        let obj1 = pdf.len();
        pdf.extend_from_slice(b"1 0 obj\n<< /Type /Catalog /Pages 2 0 R >>\nendobj\n");
        let obj2 = pdf.len();
        pdf.extend_from_slice(b"2 0 obj\n<< /Type /Pages /Kids [3 0 R] /Count 1 >>\nendobj\n");
        let obj3 = pdf.len();
        pdf.extend_from_slice(b"3 0 obj\n<< /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] >>\nendobj\n");
        let xref = pdf.len();
        let table = format!(
            "xref\n0 4\n0000000000 65535 f \n{:010} 00000 n \n{:010} 00000 n \n{:010} 00000 n \ntrailer\n<< /Size 4 /Root 1 0 R >>\nstartxref\n{}\n%%EOF\n",
            obj1, obj2, obj3, xref
        );
        pdf.extend_from_slice(table.as_bytes());
        pdf
    }

    #[test]
    fn test_inject_creates_new_revision_with_field() {
        let doc = Document::from_bytes(base_pdf()).unwrap();
        let updated =
            add_signature_field(&doc, "Signature1", &InjectOptions::default()).unwrap();

        let doc2 = Document::from_bytes(updated).unwrap();
        assert_eq!(doc2.revisions().len(), 2);

        let fields = collect_signature_fields(&doc2).unwrap();
        assert_eq!(fields.len(), 1);
        assert_eq!(fields[0].name, "Signature1");
        assert_eq!(fields[0].introduced_in, 1);
        assert!(!fields[0].is_signed());
    }

    #[test]
    fn test_original_bytes_are_preserved() {
        let original = base_pdf();
        let doc = Document::from_bytes(original.clone()).unwrap();
        let updated = add_signature_field(&doc, "Sig", &InjectOptions::default()).unwrap();
        assert!(updated.starts_with(&original));
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let doc = Document::from_bytes(base_pdf()).unwrap();
        let updated = add_signature_field(&doc, "Sig1", &InjectOptions::default()).unwrap();

        let doc2 = Document::from_bytes(updated).unwrap();
        let err = add_signature_field(&doc2, "Sig1", &InjectOptions::default()).unwrap_err();
        assert!(matches!(err, Error::DuplicateFieldName(name) if name == "Sig1"));
    }

    #[test]
    fn test_second_field_appends_to_acroform() {
        let doc = Document::from_bytes(base_pdf()).unwrap();
        let updated = add_signature_field(&doc, "First", &InjectOptions::default()).unwrap();
        let doc2 = Document::from_bytes(updated).unwrap();
        let updated2 = add_signature_field(&doc2, "Second", &InjectOptions::default()).unwrap();

        let doc3 = Document::from_bytes(updated2).unwrap();
        assert_eq!(doc3.revisions().len(), 3);
        let names: Vec<String> = collect_signature_fields(&doc3)
            .unwrap()
            .into_iter()
            .map(|f| f.name)
            .collect();
        assert_eq!(names, vec!["First".to_string(), "Second".to_string()]);
    }

    #[test]
    fn test_widget_lands_on_page_annots() {
        let doc = Document::from_bytes(base_pdf()).unwrap();
        let updated = add_signature_field(&doc, "Sig", &InjectOptions::default()).unwrap();
        let doc2 = Document::from_bytes(updated).unwrap();

        let page = doc2.load_object(3).unwrap();
        let annots = doc2
            .dict_get_resolved(doc2.latest(), page.as_dict().unwrap(), "Annots")
            .unwrap();
        assert_eq!(annots.as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_missing_page_index_rejected() {
        let doc = Document::from_bytes(base_pdf()).unwrap();
        let opts = InjectOptions {
            page: 5,
            ..Default::default()
        };
        assert!(matches!(
            add_signature_field(&doc, "Sig", &opts),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_atomic_write_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.pdf");
        write_atomic(&path, b"%PDF-1.4\ndata").unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"%PDF-1.4\ndata");
    }
}

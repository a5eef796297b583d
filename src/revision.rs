//! Incremental revision analysis.
//!
//! A PDF grows by appending: each update adds objects, a cross-reference
//! section, and a trailer whose `/Prev` points at the previous section. This
//! module walks that chain from the final trailer backwards, rejects cycles,
//! and reconstructs the ordered revision sequence with the byte span each
//! revision occupies. Prior bytes never change, so a revision is fully
//! described by its end offset.

use crate::error::{Error, Result};
use crate::object::Dict;
use crate::xref::{self, XrefEntry, XrefSection};
use std::collections::{HashMap, HashSet};

/// One revision of the document: the byte range `[0, end_offset)` plus the
/// object table visible at that point in history.
#[derive(Debug, Clone)]
pub struct Revision {
    /// Zero-based position in the append history (0 = original)
    pub index: usize,
    /// Offset of this revision's cross-reference section
    pub xref_offset: u64,
    /// One past the last byte of this revision (after its `%%EOF` and EOL)
    pub end_offset: u64,
    /// This revision's trailer dictionary
    pub trailer: Dict,
    /// Cumulative object table: entries from this and all earlier revisions,
    /// later revisions overriding earlier ones
    objects: HashMap<u32, XrefEntry>,
}

impl Revision {
    /// Look up an object visible at this revision.
    pub fn entry(&self, id: u32) -> Option<XrefEntry> {
        self.objects.get(&id).copied()
    }

    /// Highest object number known at this revision.
    pub fn max_object_id(&self) -> u32 {
        self.objects.keys().copied().max().unwrap_or(0)
    }
}

/// The ordered revision sequence, oldest first.
#[derive(Debug, Clone)]
pub struct RevisionChain {
    revisions: Vec<Revision>,
}

impl RevisionChain {
    /// Reconstruct the revision chain from raw document bytes.
    ///
    /// Follows `/Prev` links from the final trailer backwards, then reverses
    /// to oldest-first. Fails with a structural error when the chain is
    /// cyclic, a link points at garbage, or revision spans do not strictly
    /// increase.
    pub fn build(bytes: &[u8]) -> Result<Self> {
        let final_offset = xref::find_startxref(bytes)?;

        let mut sections: Vec<XrefSection> = Vec::new();
        let mut seen: HashSet<u64> = HashSet::new();
        let mut cursor = Some(final_offset);

        while let Some(offset) = cursor {
            if !seen.insert(offset) {
                return Err(Error::structure(
                    offset as usize,
                    "cyclic /Prev chain in trailers",
                ));
            }
            if seen.len() > 1024 {
                return Err(Error::structure(offset as usize, "/Prev chain too long"));
            }
            let section = xref::parse_section(bytes, offset)?;
            cursor = section.prev_offset();
            sections.push(section);
        }

        // Oldest first
        sections.reverse();

        let mut revisions = Vec::with_capacity(sections.len());
        let mut visible: HashMap<u32, XrefEntry> = HashMap::new();
        let mut prev_end = 0u64;

        for (index, section) in sections.into_iter().enumerate() {
            for (id, entry) in &section.entries {
                visible.insert(*id, *entry);
            }
            let end_offset = end_of_revision(bytes, section.offset)?;
            if end_offset <= prev_end {
                return Err(Error::structure(
                    section.offset as usize,
                    "revision spans do not strictly increase",
                ));
            }
            log::debug!(
                "revision {}: xref at {}, ends at {}",
                index,
                section.offset,
                end_offset
            );
            revisions.push(Revision {
                index,
                xref_offset: section.offset,
                end_offset,
                trailer: section.trailer,
                objects: visible.clone(),
            });
            prev_end = end_offset;
        }

        Ok(Self { revisions })
    }

    /// All revisions, oldest first. Never empty for a successfully built chain.
    pub fn revisions(&self) -> &[Revision] {
        &self.revisions
    }

    /// The newest revision.
    pub fn latest(&self) -> &Revision {
        self.revisions.last().expect("chain is never empty")
    }
}

/// Find the end of the revision whose xref section starts at `xref_offset`:
/// the byte just past the first `%%EOF` marker (and its EOL) at or after the
/// section.
fn end_of_revision(bytes: &[u8], xref_offset: u64) -> Result<u64> {
    let start = xref_offset as usize;
    if start >= bytes.len() {
        return Err(Error::structure(start, "xref offset beyond end of file"));
    }
    let marker = b"%%EOF";
    let found = bytes[start..]
        .windows(marker.len())
        .position(|w| w == marker)
        .ok_or_else(|| Error::structure(start, "revision missing %%EOF marker"))?;

    let mut end = start + found + marker.len();
    if bytes.get(end) == Some(&b'\r') {
        end += 1;
        if bytes.get(end) == Some(&b'\n') {
            end += 1;
        }
    } else if bytes.get(end) == Some(&b'\n') {
        end += 1;
    }
    Ok(end as u64)
}

//! Document loading and object resolution.
//!
//! A [`Document`] owns the raw file bytes and the reconstructed revision
//! chain, and knows how to materialize any object visible at any revision:
//! directly stored objects are parsed at their recorded offset, compressed
//! ones are extracted from their containing object stream.

use crate::error::{Error, Result};
use crate::object::{dict_name_is, Dict, Object, ObjectRef};
use crate::parser::{parse_indirect_object, parse_object};
use crate::revision::{Revision, RevisionChain};
use crate::xref::{self, XrefEntry};
use bytes::Bytes;
use std::path::Path;

/// Maximum reference-to-reference hops before resolution gives up.
const MAX_RESOLVE_DEPTH: usize = 32;

/// A loaded PDF document: raw bytes plus the parsed revision chain.
#[derive(Debug)]
pub struct Document {
    bytes: Bytes,
    chain: RevisionChain,
    version: String,
}

impl Document {
    /// Load a document from disk.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::NotFound(path.display().to_string())
            } else {
                Error::Io(e)
            }
        })?;
        Self::from_bytes(data)
    }

    /// Load a document from bytes already in memory.
    pub fn from_bytes(data: Vec<u8>) -> Result<Self> {
        if !data.starts_with(b"%PDF-") {
            return Err(Error::structure(0, "missing %PDF- header"));
        }
        let version = data[5..]
            .iter()
            .take_while(|b| b.is_ascii_digit() || **b == b'.')
            .map(|&b| b as char)
            .collect::<String>();
        let chain = RevisionChain::build(&data)?;
        log::debug!(
            "loaded PDF {} with {} revision(s)",
            version,
            chain.revisions().len()
        );
        Ok(Self {
            bytes: Bytes::from(data),
            chain,
            version,
        })
    }

    /// Header version string, e.g. `1.7`.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Raw file bytes.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// All revisions, oldest first.
    pub fn revisions(&self) -> &[Revision] {
        self.chain.revisions()
    }

    /// The newest revision.
    pub fn latest(&self) -> &Revision {
        self.chain.latest()
    }

    /// Load the object with number `id` as visible at `revision`.
    pub fn load_object_at(&self, revision: &Revision, id: u32) -> Result<Object> {
        let entry = revision
            .entry(id)
            .ok_or_else(|| Error::NotFound(format!("object {} in revision {}", id, revision.index)))?;
        match entry {
            XrefEntry::Free => Err(Error::NotFound(format!("object {} is free", id))),
            XrefEntry::InFile { offset, .. } => self.load_at_offset(offset, id),
            XrefEntry::InStream { stream_id, index } => {
                self.load_from_object_stream(revision, stream_id, index, id)
            },
        }
    }

    /// Load the object with number `id` from the newest revision.
    pub fn load_object(&self, id: u32) -> Result<Object> {
        self.load_object_at(self.latest(), id)
    }

    fn load_at_offset(&self, offset: u64, id: u32) -> Result<Object> {
        let start = offset as usize;
        if start >= self.bytes.len() {
            return Err(Error::structure(
                start,
                format!("object {} offset beyond end of file", id),
            ));
        }
        let (_, (found_id, _, obj)) = parse_indirect_object(&self.bytes[start..])
            .map_err(|_| Error::structure(start, format!("unparseable object {}", id)))?;
        if found_id != id {
            log::warn!(
                "xref says object {} at offset {}, found object {}",
                id,
                offset,
                found_id
            );
        }
        Ok(obj)
    }

    /// Extract a member from an object stream (`/Type /ObjStm`): the stream
    /// body starts with `/N` pairs of `objnum offset`, offsets relative to
    /// `/First`.
    fn load_from_object_stream(
        &self,
        revision: &Revision,
        stream_id: u32,
        index: u16,
        id: u32,
    ) -> Result<Object> {
        let container = match revision.entry(stream_id) {
            Some(XrefEntry::InFile { offset, .. }) => self.load_at_offset(offset, stream_id)?,
            Some(_) | None => {
                return Err(Error::structure(
                    0,
                    format!("object stream {} is not a file-level object", stream_id),
                ))
            },
        };
        let (dict, data) = match container {
            Object::Stream { dict, data } => (dict, data),
            _ => {
                return Err(Error::structure(
                    0,
                    format!("object {} referenced as object stream but is not a stream", stream_id),
                ))
            },
        };

        if !dict_name_is(&dict, "Type", "ObjStm") {
            log::warn!("object stream {} is not marked /Type /ObjStm", stream_id);
        }
        let n = dict
            .get("N")
            .and_then(Object::as_integer)
            .ok_or_else(|| Error::structure(0, "object stream missing /N"))? as usize;
        let first = dict
            .get("First")
            .and_then(Object::as_integer)
            .ok_or_else(|| Error::structure(0, "object stream missing /First"))? as usize;

        let decoded = match dict.get("Filter").and_then(Object::as_name) {
            Some("FlateDecode") => xref::inflate(&data, 0)?,
            Some(other) => {
                return Err(Error::structure(
                    0,
                    format!("unsupported object stream filter /{}", other),
                ))
            },
            None => data.to_vec(),
        };

        // Header area: N pairs of "objnum offset"
        let mut cursor: &[u8] = &decoded;
        let mut pairs = Vec::with_capacity(n);
        for _ in 0..n {
            let (rest, num) = parse_object(cursor)
                .map_err(|_| Error::structure(0, "bad object stream header"))?;
            let (rest, off) = parse_object(rest)
                .map_err(|_| Error::structure(0, "bad object stream header"))?;
            let num = num
                .as_integer()
                .ok_or_else(|| Error::structure(0, "non-integer object stream header"))?;
            let off = off
                .as_integer()
                .ok_or_else(|| Error::structure(0, "non-integer object stream header"))?;
            pairs.push((num as u32, off as usize));
            cursor = rest;
        }

        let (member_id, member_off) = *pairs.get(index as usize).ok_or_else(|| {
            Error::structure(0, format!("object stream index {} out of range", index))
        })?;
        if member_id != id {
            log::warn!(
                "object stream {} index {} holds object {}, expected {}",
                stream_id,
                index,
                member_id,
                id
            );
        }
        let start = first + member_off;
        if start >= decoded.len() {
            return Err(Error::structure(start, "object stream member offset out of range"));
        }
        let (_, obj) = parse_object(&decoded[start..])
            .map_err(|_| Error::structure(start, format!("unparseable compressed object {}", id)))?;
        Ok(obj)
    }

    /// Resolve indirect references down to a direct object, following at most
    /// [`MAX_RESOLVE_DEPTH`] hops.
    pub fn resolve_at(&self, revision: &Revision, obj: &Object) -> Result<Object> {
        let mut current = obj.clone();
        for _ in 0..MAX_RESOLVE_DEPTH {
            match current {
                Object::Reference(ObjectRef { id, .. }) => {
                    current = self.load_object_at(revision, id)?;
                },
                direct => return Ok(direct),
            }
        }
        Err(Error::structure(0, "reference chain too deep"))
    }

    /// Resolve a dictionary entry at a revision, returning `None` for a
    /// missing key or an unresolvable / null value.
    pub fn dict_get_resolved(&self, revision: &Revision, dict: &Dict, key: &str) -> Option<Object> {
        let value = dict.get(key)?;
        match self.resolve_at(revision, value) {
            Ok(Object::Null) => None,
            Ok(obj) => Some(obj),
            Err(e) => {
                log::warn!("failed to resolve /{}: {}", key, e);
                None
            },
        }
    }

    /// The document catalog as visible at `revision`, from the trailer's
    /// `/Root`.
    pub fn catalog_at(&self, revision: &Revision) -> Result<Dict> {
        let root = revision
            .trailer
            .get("Root")
            .ok_or_else(|| Error::structure(0, "trailer missing /Root"))?;
        match self.resolve_at(revision, root)? {
            Object::Dictionary(d) => Ok(d),
            _ => Err(Error::structure(0, "/Root is not a dictionary")),
        }
    }

    /// Highest object number in use across the whole document.
    pub fn max_object_id(&self) -> u32 {
        let from_table = self.latest().max_object_id();
        let from_size = self
            .latest()
            .trailer
            .get("Size")
            .and_then(Object::as_integer)
            .map(|s| (s.max(1) - 1) as u32)
            .unwrap_or(0);
        from_table.max(from_size)
    }
}

//! Cross-reference section parser.
//!
//! A document with N incremental updates carries N+1 cross-reference
//! sections, each with its own trailer. Unlike a reader that only needs the
//! latest view, this parser keeps sections separate: the revision analyzer
//! owns the `/Prev` chain and needs every section's trailer and entries
//! individually.
//!
//! Supports traditional xref tables and cross-reference streams (PDF 1.5+,
//! FlateDecode with PNG predictors).

use crate::error::{Error, Result};
use crate::object::{Dict, Object};
use crate::parser::parse_indirect_object;
use std::collections::HashMap;
use std::io::Read;

/// Where an object's bytes live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XrefEntry {
    /// Free slot (object deleted or never used)
    Free,
    /// Object stored directly in the file at a byte offset
    InFile {
        /// Byte offset of the `N G obj` header
        offset: u64,
        /// Generation number
        gen: u16,
    },
    /// Object stored inside an object stream
    InStream {
        /// Object number of the containing stream
        stream_id: u32,
        /// Index of the object within the stream
        index: u16,
    },
}

/// One cross-reference section: entries plus the trailer that follows it.
#[derive(Debug, Clone)]
pub struct XrefSection {
    /// File offset where this section starts
    pub offset: u64,
    /// Object number to entry
    pub entries: HashMap<u32, XrefEntry>,
    /// Trailer dictionary (the stream dictionary for xref streams)
    pub trailer: Dict,
}

impl XrefSection {
    /// Offset of the previous section, from the trailer's `/Prev`.
    pub fn prev_offset(&self) -> Option<u64> {
        self.trailer
            .get("Prev")
            .and_then(Object::as_integer)
            .and_then(|v| u64::try_from(v).ok())
    }
}

/// Find the offset recorded after the final `startxref` keyword.
///
/// Scans the file tail (up to 2 KiB) for the last `startxref` and parses the
/// number on the following line.
pub fn find_startxref(bytes: &[u8]) -> Result<u64> {
    let tail_start = bytes.len().saturating_sub(2048);
    let tail = &bytes[tail_start..];

    let keyword = b"startxref";
    let pos = tail
        .windows(keyword.len())
        .rposition(|w| w == keyword)
        .ok_or_else(|| Error::structure(bytes.len(), "startxref keyword not found"))?;

    let after = &tail[pos + keyword.len()..];
    let digits: Vec<u8> = after
        .iter()
        .copied()
        .skip_while(|b| b.is_ascii_whitespace())
        .take_while(|b| b.is_ascii_digit())
        .collect();

    std::str::from_utf8(&digits)
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .ok_or_else(|| Error::structure(tail_start + pos, "unreadable startxref offset"))
}

/// Parse the cross-reference section at `offset`.
///
/// Detects traditional tables (leading `xref` keyword) versus xref streams
/// (an indirect stream object) and dispatches accordingly.
pub fn parse_section(bytes: &[u8], offset: u64) -> Result<XrefSection> {
    let start = offset as usize;
    if start >= bytes.len() {
        return Err(Error::structure(start, "xref offset beyond end of file"));
    }

    let body = &bytes[start..];
    let head: &[u8] = &body[..body.len().min(32)];
    let trimmed: &[u8] = {
        let skip = head.iter().take_while(|b| b.is_ascii_whitespace()).count();
        &head[skip..]
    };

    if trimmed.starts_with(b"xref") {
        log::debug!("traditional xref section at offset {}", offset);
        parse_table(bytes, offset)
    } else if trimmed.first().is_some_and(|c| c.is_ascii_digit()) {
        log::debug!("xref stream at offset {}", offset);
        parse_stream_section(bytes, offset)
    } else {
        Err(Error::structure(start, "neither xref table nor xref stream"))
    }
}

/// Iterate lines over bytes, treating CR, LF, and CRLF as terminators.
/// Returns (line, offset_of_next_line).
fn next_line(bytes: &[u8], pos: usize) -> Option<(&[u8], usize)> {
    if pos >= bytes.len() {
        return None;
    }
    let rest = &bytes[pos..];
    let mut end = rest.len();
    let mut next = rest.len();
    for (i, &b) in rest.iter().enumerate() {
        if b == b'\n' {
            end = i;
            next = i + 1;
            break;
        }
        if b == b'\r' {
            end = i;
            next = if rest.get(i + 1) == Some(&b'\n') { i + 2 } else { i + 1 };
            break;
        }
    }
    Some((&rest[..end], pos + next))
}

/// Parse a traditional table:
///
/// ```text
/// xref
/// 0 3
/// 0000000000 65535 f
/// 0000000017 00000 n
/// 0000000081 00000 n
/// trailer
/// << /Size 3 /Root 1 0 R >>
/// ```
///
/// Malformed rows become free placeholders so object numbering stays
/// consistent, matching lenient readers.
fn parse_table(bytes: &[u8], offset: u64) -> Result<XrefSection> {
    let mut entries = HashMap::new();
    let mut pos = offset as usize;

    // Consume the xref keyword line (skipping blank lines first)
    loop {
        let (line, next) =
            next_line(bytes, pos).ok_or_else(|| Error::structure(pos, "truncated xref section"))?;
        let text = line.trim_ascii();
        pos = next;
        if text.is_empty() {
            continue;
        }
        if text.starts_with(b"xref") {
            break;
        }
        return Err(Error::structure(pos, "expected xref keyword"));
    }

    loop {
        let (line, next) =
            next_line(bytes, pos).ok_or_else(|| Error::structure(pos, "xref table missing trailer"))?;
        let text = line.trim_ascii();

        if text.starts_with(b"trailer") {
            // Trailer dictionary follows, possibly on the same line
            let leading_ws = line.len() - line.trim_ascii_start().len();
            let inline = &text[b"trailer".len()..];
            let dict_start = if inline.trim_ascii().is_empty() {
                next
            } else {
                pos + leading_ws + b"trailer".len()
            };
            return parse_trailer_dict(bytes, dict_start, offset, entries);
        }
        pos = next;

        if text.is_empty() || text.starts_with(b"%") {
            continue;
        }

        // Subsection header: "start count"
        let header = std::str::from_utf8(text).unwrap_or("");
        let parts: Vec<&str> = header.split_whitespace().collect();
        if parts.len() != 2 {
            continue;
        }
        let start_obj: u32 = parts[0]
            .parse()
            .map_err(|_| Error::structure(pos, "bad subsection start"))?;
        let count: u32 = parts[1]
            .parse()
            .map_err(|_| Error::structure(pos, "bad subsection count"))?;
        if count > 1_000_000 {
            return Err(Error::structure(pos, "xref subsection count exceeds limit"));
        }

        let mut i = 0;
        while i < count {
            let (line, next) = next_line(bytes, pos)
                .ok_or_else(|| Error::structure(pos, "truncated xref subsection"))?;
            let text = line.trim_ascii();
            if text.is_empty() {
                pos = next;
                continue;
            }
            if text.starts_with(b"trailer") {
                log::warn!("xref subsection promised {} entries, found {}", count, i);
                break;
            }
            pos = next;

            let row = std::str::from_utf8(text).unwrap_or("");
            let cols: Vec<&str> = row.split_whitespace().collect();
            let entry = if cols.len() >= 3 {
                let off: Option<u64> = cols[0].parse().ok();
                let gen: Option<u16> = cols[1].parse().ok();
                match (off, gen, cols[2].chars().next()) {
                    (Some(o), Some(g), Some('n') | Some('N')) => XrefEntry::InFile { offset: o, gen: g },
                    (Some(_), Some(_), Some('f') | Some('F')) => XrefEntry::Free,
                    _ => {
                        log::warn!("unparseable xref row {:?}, treating as free", row);
                        XrefEntry::Free
                    },
                }
            } else {
                log::warn!("short xref row {:?}, treating as free", row);
                XrefEntry::Free
            };
            entries.insert(start_obj + i, entry);
            i += 1;
        }
    }
}

fn parse_trailer_dict(
    bytes: &[u8],
    dict_pos: usize,
    section_offset: u64,
    entries: HashMap<u32, XrefEntry>,
) -> Result<XrefSection> {
    let (_, obj) = crate::parser::parse_object(&bytes[dict_pos..])
        .map_err(|_| Error::structure(dict_pos, "unparseable trailer dictionary"))?;
    let trailer = match obj {
        Object::Dictionary(d) => d,
        _ => return Err(Error::structure(dict_pos, "trailer is not a dictionary")),
    };
    Ok(XrefSection {
        offset: section_offset,
        entries,
        trailer,
    })
}

/// Parse an xref stream section: an indirect stream object whose dictionary
/// doubles as the trailer.
fn parse_stream_section(bytes: &[u8], offset: u64) -> Result<XrefSection> {
    let start = offset as usize;
    let (_, (_, _, obj)) = parse_indirect_object(&bytes[start..])
        .map_err(|_| Error::structure(start, "unparseable xref stream object"))?;

    let (dict, data) = match obj {
        Object::Stream { dict, data } => (dict, data),
        _ => return Err(Error::structure(start, "xref stream is not a stream object")),
    };

    if let Some(t) = dict.get("Type").and_then(Object::as_name) {
        if t != "XRef" {
            return Err(Error::structure(start, format!("expected /Type /XRef, got /{}", t)));
        }
    }

    let widths = dict
        .get("W")
        .and_then(Object::as_array)
        .ok_or_else(|| Error::structure(start, "xref stream missing /W"))?;
    if widths.len() != 3 {
        return Err(Error::structure(start, "xref stream /W must have 3 entries"));
    }
    let w: Vec<usize> = widths
        .iter()
        .map(|o| o.as_integer().map(|v| v as usize))
        .collect::<Option<_>>()
        .ok_or_else(|| Error::structure(start, "non-integer /W entry"))?;
    let row_len = w[0] + w[1] + w[2];
    if row_len == 0 {
        return Err(Error::structure(start, "zero-width xref stream rows"));
    }

    let size = dict
        .get("Size")
        .and_then(Object::as_integer)
        .ok_or_else(|| Error::structure(start, "xref stream missing /Size"))? as u32;

    let index_ranges: Vec<(u32, u32)> = match dict.get("Index").and_then(Object::as_array) {
        Some(arr) => {
            let nums: Vec<i64> = arr
                .iter()
                .map(Object::as_integer)
                .collect::<Option<_>>()
                .ok_or_else(|| Error::structure(start, "non-integer /Index entry"))?;
            nums.chunks(2)
                .filter(|c| c.len() == 2)
                .map(|c| (c[0] as u32, c[1] as u32))
                .collect()
        },
        None => vec![(0, size)],
    };

    let decoded = decode_xref_stream_data(&data, &dict, start)?;

    let mut entries = HashMap::new();
    let mut rows = decoded.chunks_exact(row_len);
    for (first, count) in index_ranges {
        for i in 0..count {
            let row = rows
                .next()
                .ok_or_else(|| Error::structure(start, "truncated xref stream data"))?;
            let kind = if w[0] > 0 { be_int(&row[..w[0]]) } else { 1 };
            let f2 = be_int(&row[w[0]..w[0] + w[1]]);
            let f3 = be_int(&row[w[0] + w[1]..]);
            let entry = match kind {
                0 => XrefEntry::Free,
                1 => XrefEntry::InFile {
                    offset: f2,
                    gen: f3 as u16,
                },
                2 => XrefEntry::InStream {
                    stream_id: f2 as u32,
                    index: f3 as u16,
                },
                other => {
                    return Err(Error::structure(
                        start,
                        format!("invalid xref stream entry type {}", other),
                    ))
                },
            };
            entries.insert(first + i, entry);
        }
    }

    Ok(XrefSection {
        offset,
        entries,
        trailer: dict,
    })
}

/// Decode xref stream payload: optional FlateDecode plus PNG predictor.
fn decode_xref_stream_data(data: &[u8], dict: &Dict, at: usize) -> Result<Vec<u8>> {
    let filtered = match dict.get("Filter") {
        None => data.to_vec(),
        Some(Object::Name(n)) if n == "FlateDecode" => inflate(data, at)?,
        Some(Object::Array(arr)) => match arr.first().and_then(Object::as_name) {
            Some("FlateDecode") if arr.len() == 1 => inflate(data, at)?,
            _ => return Err(Error::structure(at, "unsupported xref stream filter chain")),
        },
        Some(other) => {
            return Err(Error::structure(
                at,
                format!("unsupported xref stream filter {:?}", other.as_name()),
            ))
        },
    };

    let parms = match dict.get("DecodeParms").or_else(|| dict.get("DP")) {
        Some(Object::Dictionary(d)) => Some(d),
        Some(Object::Array(arr)) => arr.first().and_then(Object::as_dict),
        _ => None,
    };
    let predictor = parms
        .and_then(|d| d.get("Predictor"))
        .and_then(Object::as_integer)
        .unwrap_or(1);
    if predictor < 2 {
        return Ok(filtered);
    }
    let columns = parms
        .and_then(|d| d.get("Columns"))
        .and_then(Object::as_integer)
        .unwrap_or(1) as usize;
    undo_png_predictor(&filtered, columns, at)
}

pub(crate) fn inflate(data: &[u8], at: usize) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    flate2::read::ZlibDecoder::new(data)
        .read_to_end(&mut out)
        .map_err(|e| Error::structure(at, format!("FlateDecode failed: {}", e)))?;
    Ok(out)
}

/// Reverse PNG row filters (predictors 10..15). Each row is prefixed by a
/// filter-type byte; column width is in bytes (colors=1, 8 bits for xref
/// streams).
fn undo_png_predictor(data: &[u8], columns: usize, at: usize) -> Result<Vec<u8>> {
    if columns == 0 {
        return Err(Error::structure(at, "predictor with zero columns"));
    }
    let row_len = columns + 1;
    if data.len() % row_len != 0 {
        return Err(Error::structure(at, "predictor data not a whole number of rows"));
    }

    let mut out = Vec::with_capacity(data.len() / row_len * columns);
    let mut prev_row = vec![0u8; columns];

    for row in data.chunks_exact(row_len) {
        let filter = row[0];
        let mut current: Vec<u8> = row[1..].to_vec();
        match filter {
            0 => {},
            1 => {
                for i in 1..columns {
                    current[i] = current[i].wrapping_add(current[i - 1]);
                }
            },
            2 => {
                for i in 0..columns {
                    current[i] = current[i].wrapping_add(prev_row[i]);
                }
            },
            3 => {
                for i in 0..columns {
                    let left = if i > 0 { current[i - 1] as u16 } else { 0 };
                    let up = prev_row[i] as u16;
                    current[i] = current[i].wrapping_add(((left + up) / 2) as u8);
                }
            },
            4 => {
                for i in 0..columns {
                    let a = if i > 0 { current[i - 1] as i16 } else { 0 };
                    let b = prev_row[i] as i16;
                    let c = if i > 0 { prev_row[i - 1] as i16 } else { 0 };
                    let p = a + b - c;
                    let (pa, pb, pc) = ((p - a).abs(), (p - b).abs(), (p - c).abs());
                    let pred = if pa <= pb && pa <= pc {
                        a
                    } else if pb <= pc {
                        b
                    } else {
                        c
                    };
                    current[i] = current[i].wrapping_add(pred as u8);
                }
            },
            other => {
                return Err(Error::structure(at, format!("unknown PNG filter type {}", other)))
            },
        }
        out.extend_from_slice(&current);
        prev_row = current;
    }
    Ok(out)
}

fn be_int(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0u64, |acc, &b| (acc << 8) | b as u64)
}

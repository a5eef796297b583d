//! `/ByteRange` handling.
//!
//! A signature's byte range lists `[offset length ...]` pairs describing the
//! file bytes the signature covers. A well-formed signing leaves exactly one
//! hole: the `/Contents` hex placeholder.

use crate::error::{Error, Result};
use crate::object::Object;

/// A validated sequence of `(offset, length)` pairs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ByteRange {
    pairs: Vec<(u64, u64)>,
}

impl ByteRange {
    /// Build from the resolved `/ByteRange` array object.
    ///
    /// Requires an even number of non-negative integers forming
    /// non-overlapping, strictly ascending segments.
    pub fn from_object(obj: &Object) -> Result<Self> {
        let arr = obj
            .as_array()
            .ok_or_else(|| Error::MalformedSignature("/ByteRange is not an array".into()))?;
        if arr.is_empty() || arr.len() % 2 != 0 {
            return Err(Error::MalformedSignature(format!(
                "/ByteRange has {} entries, expected an even non-zero count",
                arr.len()
            )));
        }
        let nums: Vec<i64> = arr
            .iter()
            .map(Object::as_integer)
            .collect::<Option<_>>()
            .ok_or_else(|| Error::MalformedSignature("non-integer /ByteRange entry".into()))?;
        if nums.iter().any(|&n| n < 0) {
            return Err(Error::MalformedSignature("negative /ByteRange entry".into()));
        }

        let pairs: Vec<(u64, u64)> = nums
            .chunks_exact(2)
            .map(|c| (c[0] as u64, c[1] as u64))
            .collect();

        let mut last_end = 0u64;
        for (i, &(off, len)) in pairs.iter().enumerate() {
            let end = off.checked_add(len).ok_or_else(|| {
                Error::MalformedSignature("/ByteRange segment overflows".into())
            })?;
            if i > 0 && off < last_end {
                return Err(Error::MalformedSignature(
                    "/ByteRange segments overlap or are out of order".into(),
                ));
            }
            last_end = end;
        }

        Ok(Self { pairs })
    }

    pub fn pairs(&self) -> &[(u64, u64)] {
        &self.pairs
    }

    /// End of the last covered segment.
    pub fn covered_end(&self) -> u64 {
        self.pairs.last().map(|&(o, l)| o + l).unwrap_or(0)
    }

    /// Ensure every segment lies within a file of `file_len` bytes.
    pub fn check_bounds(&self, file_len: u64) -> Result<()> {
        if self.covered_end() > file_len {
            return Err(Error::MalformedSignature(format!(
                "/ByteRange extends to {} but file is {} bytes",
                self.covered_end(),
                file_len
            )));
        }
        Ok(())
    }

    /// Concatenate the covered segments, in order. This is the message the
    /// detached CMS signature was computed over.
    pub fn covered_bytes(&self, file: &[u8]) -> Result<Vec<u8>> {
        self.check_bounds(file.len() as u64)?;
        let total: u64 = self.pairs.iter().map(|&(_, l)| l).sum();
        let mut out = Vec::with_capacity(total as usize);
        for &(off, len) in &self.pairs {
            out.extend_from_slice(&file[off as usize..(off + len) as usize]);
        }
        Ok(out)
    }

    /// Whether this range covers an entire revision ending at `revision_end`,
    /// leaving only the `/Contents` placeholder uncovered.
    ///
    /// True when there are exactly two segments, the first starts at byte 0,
    /// the second ends at the revision end, and the single hole between them
    /// holds a hex string (`<...>`) and nothing else but whitespace.
    pub fn covers_revision(&self, file: &[u8], revision_end: u64) -> bool {
        if self.pairs.len() != 2 {
            return false;
        }
        let (a_off, a_len) = self.pairs[0];
        let (b_off, b_len) = self.pairs[1];
        if a_off != 0 || b_off + b_len != revision_end {
            return false;
        }
        let hole_start = (a_off + a_len) as usize;
        let hole_end = b_off as usize;
        if hole_start >= hole_end || hole_end > file.len() {
            return false;
        }
        let hole = file[hole_start..hole_end].trim_ascii();
        hole.first() == Some(&b'<')
            && hole.last() == Some(&b'>')
            && hole[1..hole.len() - 1]
                .iter()
                .all(|b| b.is_ascii_hexdigit() || b.is_ascii_whitespace())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn range(nums: &[i64]) -> Object {
        Object::Array(nums.iter().map(|&n| Object::Integer(n)).collect())
    }

    #[test]
    fn test_valid_two_pair_range() {
        let br = ByteRange::from_object(&range(&[0, 100, 150, 50])).unwrap();
        assert_eq!(br.pairs(), &[(0, 100), (150, 50)]);
        assert_eq!(br.covered_end(), 200);
    }

    #[test]
    fn test_odd_count_rejected() {
        assert!(matches!(
            ByteRange::from_object(&range(&[0, 100, 150])),
            Err(Error::MalformedSignature(_))
        ));
    }

    #[test]
    fn test_negative_rejected() {
        assert!(ByteRange::from_object(&range(&[0, -5])).is_err());
    }

    #[test]
    fn test_overlap_rejected() {
        assert!(ByteRange::from_object(&range(&[0, 100, 50, 50])).is_err());
    }

    #[test]
    fn test_not_an_array_rejected() {
        assert!(ByteRange::from_object(&Object::Integer(5)).is_err());
    }

    #[test]
    fn test_covered_bytes_concatenation() {
        let file = b"AAAABBBBCCCC";
        let br = ByteRange::from_object(&range(&[0, 4, 8, 4])).unwrap();
        assert_eq!(br.covered_bytes(file).unwrap(), b"AAAACCCC");
    }

    #[test]
    fn test_covered_bytes_out_of_bounds() {
        let br = ByteRange::from_object(&range(&[0, 4, 8, 100])).unwrap();
        assert!(br.covered_bytes(b"short").is_err());
    }

    #[test]
    fn test_covers_revision_with_hex_hole() {
        // [0,6) then hex placeholder then [12,18)
        let file = b"ABCDEF<AB12>GHIJKL";
        let br = ByteRange::from_object(&range(&[0, 6, 12, 6])).unwrap();
        assert!(br.covers_revision(file, 18));
    }

    #[test]
    fn test_covers_revision_rejects_short_coverage() {
        let file = b"ABCDEF<AB12>GHIJKLtrailing";
        let br = ByteRange::from_object(&range(&[0, 6, 12, 6])).unwrap();
        // Revision extends past the covered end
        assert!(!br.covers_revision(file, 26));
    }

    #[test]
    fn test_covers_revision_rejects_non_hex_hole() {
        let file = b"ABCDEFxxxxxxGHIJKL";
        let br = ByteRange::from_object(&range(&[0, 6, 12, 6])).unwrap();
        assert!(!br.covers_revision(file, 18));
    }

    #[test]
    fn test_covers_revision_rejects_nonzero_start() {
        let file = b"ABCDEF<AB12>GHIJKL";
        let br = ByteRange::from_object(&range(&[1, 5, 12, 6])).unwrap();
        assert!(!br.covers_revision(file, 18));
    }
}

//! PDF object serialization.
//!
//! Turns [`Object`] values back into PDF syntax for incremental updates.
//! Dictionary keys are sorted so output is deterministic and diffs stay
//! readable.

use crate::object::{Dict, Object};
use std::io::Write;

/// Serializer for PDF objects.
#[derive(Debug, Clone, Copy, Default)]
pub struct ObjectSerializer;

impl ObjectSerializer {
    pub fn new() -> Self {
        Self
    }

    /// Serialize an object to bytes.
    pub fn serialize(&self, obj: &Object) -> Vec<u8> {
        let mut buf = Vec::new();
        // Writing into a Vec cannot fail
        self.write_object(&mut buf, obj).expect("write to Vec");
        buf
    }

    /// Serialize an indirect object definition:
    /// `{id} {gen} obj\n{object}\nendobj\n`.
    pub fn serialize_indirect(&self, id: u32, gen: u16, obj: &Object) -> Vec<u8> {
        let mut buf = Vec::new();
        writeln!(buf, "{} {} obj", id, gen).expect("write to Vec");
        self.write_object(&mut buf, obj).expect("write to Vec");
        write!(buf, "\nendobj\n").expect("write to Vec");
        buf
    }

    fn write_object<W: Write>(&self, w: &mut W, obj: &Object) -> std::io::Result<()> {
        match obj {
            Object::Null => write!(w, "null"),
            Object::Boolean(b) => write!(w, "{}", if *b { "true" } else { "false" }),
            Object::Integer(i) => write!(w, "{}", i),
            Object::Real(r) => self.write_real(w, *r),
            Object::String(s) => self.write_string(w, s),
            Object::Name(n) => self.write_name(w, n),
            Object::Array(arr) => self.write_array(w, arr),
            Object::Dictionary(dict) => self.write_dictionary(w, dict),
            Object::Stream { dict, data } => self.write_stream(w, dict, data),
            Object::Reference(r) => write!(w, "{} {} R", r.id, r.gen),
        }
    }

    fn write_real<W: Write>(&self, w: &mut W, value: f64) -> std::io::Result<()> {
        if value.fract() == 0.0 {
            write!(w, "{}", value as i64)
        } else {
            let formatted = format!("{:.5}", value);
            write!(w, "{}", formatted.trim_end_matches('0').trim_end_matches('.'))
        }
    }

    /// Literal syntax for printable data, hex syntax otherwise.
    fn write_string<W: Write>(&self, w: &mut W, data: &[u8]) -> std::io::Result<()> {
        let printable = data
            .iter()
            .all(|&b| b == b'\n' || b == b'\r' || b == b'\t' || (0x20..=0x7E).contains(&b));

        if printable {
            write!(w, "(")?;
            for &byte in data {
                match byte {
                    b'(' => write!(w, "\\(")?,
                    b')' => write!(w, "\\)")?,
                    b'\\' => write!(w, "\\\\")?,
                    b'\n' => write!(w, "\\n")?,
                    b'\r' => write!(w, "\\r")?,
                    b'\t' => write!(w, "\\t")?,
                    _ => w.write_all(&[byte])?,
                }
            }
            write!(w, ")")
        } else {
            write!(w, "<")?;
            for byte in data {
                write!(w, "{:02X}", byte)?;
            }
            write!(w, ">")
        }
    }

    /// Names escape delimiters and non-regular characters as `#XX`.
    fn write_name<W: Write>(&self, w: &mut W, name: &str) -> std::io::Result<()> {
        write!(w, "/")?;
        for byte in name.bytes() {
            let regular = (0x21..=0x7E).contains(&byte)
                && !matches!(byte, b'#' | b'/' | b'%' | b'(' | b')' | b'<' | b'>' | b'[' | b']' | b'{' | b'}');
            if regular {
                w.write_all(&[byte])?;
            } else {
                write!(w, "#{:02X}", byte)?;
            }
        }
        Ok(())
    }

    fn write_array<W: Write>(&self, w: &mut W, arr: &[Object]) -> std::io::Result<()> {
        write!(w, "[")?;
        for (i, obj) in arr.iter().enumerate() {
            if i > 0 {
                write!(w, " ")?;
            }
            self.write_object(w, obj)?;
        }
        write!(w, "]")
    }

    /// Keys sorted for deterministic output.
    fn write_dictionary<W: Write>(&self, w: &mut W, dict: &Dict) -> std::io::Result<()> {
        write!(w, "<< ")?;
        let mut keys: Vec<_> = dict.keys().collect();
        keys.sort();
        for key in keys {
            if let Some(value) = dict.get(key) {
                self.write_name(w, key)?;
                write!(w, " ")?;
                self.write_object(w, value)?;
                write!(w, " ")?;
            }
        }
        write!(w, ">>")
    }

    fn write_stream<W: Write>(&self, w: &mut W, dict: &Dict, data: &[u8]) -> std::io::Result<()> {
        let mut dict_with_length = dict.clone();
        dict_with_length
            .entry("Length".to_string())
            .or_insert(Object::Integer(data.len() as i64));
        self.write_dictionary(w, &dict_with_length)?;
        write!(w, "\nstream\n")?;
        w.write_all(data)?;
        write!(w, "\nendstream")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::ObjectRef;

    fn text(obj: &Object) -> String {
        String::from_utf8(ObjectSerializer::new().serialize(obj)).unwrap()
    }

    #[test]
    fn test_primitives() {
        assert_eq!(text(&Object::Null), "null");
        assert_eq!(text(&Object::Boolean(true)), "true");
        assert_eq!(text(&Object::Integer(-7)), "-7");
        assert_eq!(text(&Object::Real(2.5)), "2.5");
        assert_eq!(text(&Object::Real(3.0)), "3");
        assert_eq!(text(&Object::Reference(ObjectRef::new(4, 0))), "4 0 R");
    }

    #[test]
    fn test_string_forms() {
        assert_eq!(text(&Object::String(b"hi".to_vec())), "(hi)");
        assert_eq!(text(&Object::String(b"a(b)".to_vec())), "(a\\(b\\))");
        assert_eq!(text(&Object::String(vec![0x00, 0xFF])), "<00FF>");
    }

    #[test]
    fn test_name_escaping() {
        assert_eq!(text(&Object::Name("Sig".into())), "/Sig");
        assert_eq!(text(&Object::Name("A B".into())), "/A#20B");
    }

    #[test]
    fn test_dictionary_sorted_keys() {
        let mut dict = Dict::new();
        dict.insert("Zeta".into(), Object::Integer(1));
        dict.insert("Alpha".into(), Object::Integer(2));
        assert_eq!(text(&Object::Dictionary(dict)), "<< /Alpha 2 /Zeta 1 >>");
    }

    #[test]
    fn test_array() {
        let arr = Object::Array(vec![Object::Integer(0), Object::Integer(100)]);
        assert_eq!(text(&arr), "[0 100]");
    }

    #[test]
    fn test_stream_gets_length() {
        let obj = Object::Stream {
            dict: Dict::new(),
            data: bytes::Bytes::from_static(b"hello"),
        };
        let out = text(&obj);
        assert!(out.starts_with("<< /Length 5 >>"));
        assert!(out.contains("stream\nhello\nendstream"));
    }

    #[test]
    fn test_indirect_framing() {
        let out = ObjectSerializer::new().serialize_indirect(12, 0, &Object::Null);
        assert_eq!(out, b"12 0 obj\nnull\nendobj\n");
    }

    #[test]
    fn test_round_trip_through_parser() {
        let mut dict = Dict::new();
        dict.insert("FT".into(), Object::Name("Sig".into()));
        dict.insert("T".into(), Object::String(b"Sig1".to_vec()));
        let bytes = ObjectSerializer::new().serialize(&Object::Dictionary(dict.clone()));
        let (_, parsed) = crate::parser::parse_object(&bytes).unwrap();
        assert_eq!(parsed, Object::Dictionary(dict));
    }
}

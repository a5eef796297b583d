//! PDF object parser.
//!
//! Combines lexer tokens into complete objects. Recursive descent: read a
//! token, decide the object shape, recurse for arrays and dictionaries.
//! All functions return nom's `IResult` so callers can keep parsing from
//! where an object ended.

use crate::lexer::{token, Token};
use crate::object::{Dict, Object, ObjectRef};
use nom::IResult;

/// Decode escape sequences in a PDF literal string.
///
/// Handles `\n \r \t \b \f \( \) \\`, octal `\ddd`, and line continuations.
/// Unknown escapes keep the backslash literal, which is what lenient readers
/// do.
pub fn decode_literal_string_escapes(raw: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(raw.len());
    let mut i = 0;
    while i < raw.len() {
        if raw[i] != b'\\' || i + 1 >= raw.len() {
            out.push(raw[i]);
            i += 1;
            continue;
        }
        match raw[i + 1] {
            b'n' => {
                out.push(b'\n');
                i += 2;
            },
            b'r' => {
                out.push(b'\r');
                i += 2;
            },
            b't' => {
                out.push(b'\t');
                i += 2;
            },
            b'b' => {
                out.push(8);
                i += 2;
            },
            b'f' => {
                out.push(12);
                i += 2;
            },
            b'(' | b')' | b'\\' => {
                out.push(raw[i + 1]);
                i += 2;
            },
            b'\n' => i += 2,
            b'\r' => {
                i += 2;
                if i < raw.len() && raw[i] == b'\n' {
                    i += 1;
                }
            },
            c if (b'0'..b'8').contains(&c) => {
                let mut value = 0u32;
                let mut len = 0;
                while len < 3 && i + 1 + len < raw.len() {
                    let d = raw[i + 1 + len];
                    if !(b'0'..b'8').contains(&d) {
                        break;
                    }
                    value = value * 8 + (d - b'0') as u32;
                    len += 1;
                }
                out.push((value & 0xFF) as u8);
                i += 1 + len;
            },
            _ => {
                out.push(b'\\');
                i += 1;
            },
        }
    }
    out
}

fn decode_hex(hex: &[u8]) -> Option<Vec<u8>> {
    let digits: Vec<u8> = hex
        .iter()
        .copied()
        .filter(|b| !b.is_ascii_whitespace())
        .collect();
    let mut out = Vec::with_capacity(digits.len() / 2 + 1);
    let mut chunks = digits.chunks_exact(2);
    for pair in &mut chunks {
        let hi = (pair[0] as char).to_digit(16)?;
        let lo = (pair[1] as char).to_digit(16)?;
        out.push(((hi << 4) | lo) as u8);
    }
    // Odd digit count: last digit is padded with a trailing zero
    if let [last] = chunks.remainder() {
        let hi = (*last as char).to_digit(16)?;
        out.push((hi << 4) as u8);
    }
    Some(out)
}

fn parse_err(input: &[u8]) -> nom::Err<nom::error::Error<&[u8]>> {
    nom::Err::Error(nom::error::Error::new(input, nom::error::ErrorKind::Tag))
}

/// Parse a single PDF object from input bytes.
///
/// Handles primitives, arrays, dictionaries, streams (raw data carried
/// alongside the dictionary) and indirect references (`10 0 R`).
pub fn parse_object(input: &[u8]) -> IResult<&[u8], Object> {
    let (rest, tok) = token(input)?;
    match tok {
        Token::Null => Ok((rest, Object::Null)),
        Token::True => Ok((rest, Object::Boolean(true))),
        Token::False => Ok((rest, Object::Boolean(false))),
        Token::Real(r) => Ok((rest, Object::Real(r))),
        Token::Name(n) => Ok((rest, Object::Name(n))),

        Token::Integer(i) => {
            // Lookahead for "gen R" making this an indirect reference
            if let Ok((rest2, Token::Integer(gen))) = token(rest) {
                if let Ok((rest3, Token::R)) = token(rest2) {
                    return Ok((rest3, Object::Reference(ObjectRef::new(i as u32, gen as u16))));
                }
            }
            Ok((rest, Object::Integer(i)))
        },

        Token::LiteralString(raw) => {
            Ok((rest, Object::String(decode_literal_string_escapes(raw))))
        },

        Token::HexString(raw) => match decode_hex(raw) {
            Some(bytes) => Ok((rest, Object::String(bytes))),
            None => Err(parse_err(rest)),
        },

        Token::ArrayStart => parse_array(rest),

        Token::DictStart => {
            let (rest, dict) = parse_dict_body(rest)?;
            // A stream keyword directly after a dictionary makes it a stream
            if let Ok((stream_body, Token::StreamStart)) = token(rest) {
                let (rest, data) = parse_stream_data(stream_body, &dict)?;
                return Ok((
                    rest,
                    Object::Stream {
                        dict,
                        data: bytes::Bytes::from(data),
                    },
                ));
            }
            Ok((rest, Object::Dictionary(dict)))
        },

        _ => Err(parse_err(rest)),
    }
}

/// Parse array elements after the opening `[`.
fn parse_array(input: &[u8]) -> IResult<&[u8], Object> {
    let mut items = Vec::new();
    let mut rest = input;
    loop {
        if let Ok((after, Token::ArrayEnd)) = token(rest) {
            return Ok((after, Object::Array(items)));
        }
        let (after, obj) = parse_object(rest)?;
        items.push(obj);
        rest = after;
    }
}

/// Parse dictionary entries after the opening `<<`.
fn parse_dict_body(input: &[u8]) -> IResult<&[u8], Dict> {
    let mut dict = Dict::new();
    let mut rest = input;
    loop {
        match token(rest)? {
            (after, Token::DictEnd) => return Ok((after, dict)),
            (after, Token::Name(key)) => {
                let (after, value) = parse_object(after)?;
                dict.insert(key, value);
                rest = after;
            },
            _ => return Err(parse_err(rest)),
        }
    }
}

/// Extract stream data following the `stream` keyword.
///
/// Uses `/Length` when it is a direct integer; otherwise scans for the
/// `endstream` keyword (the length may be an indirect reference we cannot
/// resolve at this layer).
fn parse_stream_data<'a>(input: &'a [u8], dict: &Dict) -> IResult<&'a [u8], Vec<u8>> {
    // stream keyword is followed by CRLF or LF
    let mut body = input;
    if body.starts_with(b"\r\n") {
        body = &body[2..];
    } else if body.first() == Some(&b'\n') || body.first() == Some(&b'\r') {
        body = &body[1..];
    }

    if let Some(len) = dict.get("Length").and_then(Object::as_integer) {
        let len = len as usize;
        if len <= body.len() {
            let data = body[..len].to_vec();
            let rest = &body[len..];
            if let Ok((after, Token::StreamEnd)) = token(rest) {
                return Ok((after, data));
            }
            // Length was wrong; fall through to scanning
        }
    }

    // Scan for the endstream keyword
    let marker = b"endstream";
    let end = body
        .windows(marker.len())
        .position(|w| w == marker)
        .ok_or_else(|| parse_err(input))?;
    let mut data = &body[..end];
    // Trim the EOL that precedes endstream
    if data.ends_with(b"\r\n") {
        data = &data[..data.len() - 2];
    } else if data.ends_with(b"\n") || data.ends_with(b"\r") {
        data = &data[..data.len() - 1];
    }
    Ok((&body[end + marker.len()..], data.to_vec()))
}

/// Parse an indirect object definition: `N G obj <object> endobj`.
///
/// Returns the object number, generation, and body. The trailing `endobj`
/// is consumed when present but its absence is tolerated.
pub fn parse_indirect_object(input: &[u8]) -> IResult<&[u8], (u32, u16, Object)> {
    let (rest, id_tok) = token(input)?;
    let id = match id_tok {
        Token::Integer(i) if i >= 0 => i as u32,
        _ => return Err(parse_err(input)),
    };
    let (rest, gen_tok) = token(rest)?;
    let gen = match gen_tok {
        Token::Integer(g) if g >= 0 => g as u16,
        _ => return Err(parse_err(rest)),
    };
    let (rest, obj_tok) = token(rest)?;
    if obj_tok != Token::ObjStart {
        return Err(parse_err(rest));
    }
    let (rest, obj) = parse_object(rest)?;
    let rest = match token(rest) {
        Ok((after, Token::ObjEnd)) => after,
        _ => rest,
    };
    Ok((rest, (id, gen, obj)))
}

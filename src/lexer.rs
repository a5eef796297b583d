//! PDF tokenizer.
//!
//! Low-level tokenization of PDF byte streams: numbers, literal and hex
//! strings, names (with `#XX` escapes decoded), keywords and delimiters.
//! Whitespace and `%` comments are skipped before every token.

use nom::{
    branch::alt,
    bytes::complete::{tag, take_till, take_while},
    character::complete::{char, digit1, one_of},
    combinator::{map, opt, value},
    sequence::{delimited, preceded},
    IResult,
};

/// Token types recognized by the lexer.
#[derive(Debug, PartialEq, Clone)]
pub enum Token<'a> {
    /// Integer number (e.g. 42, -123)
    Integer(i64),
    /// Real number (e.g. 3.5, -.002)
    Real(f64),
    /// Literal string bytes, escape sequences still raw
    LiteralString(&'a [u8]),
    /// Hex string bytes, whitespace preserved
    HexString(&'a [u8]),
    /// Name with `#XX` escapes decoded
    Name(String),
    /// `true`
    True,
    /// `false`
    False,
    /// `null`
    Null,
    /// `[`
    ArrayStart,
    /// `]`
    ArrayEnd,
    /// `<<`
    DictStart,
    /// `>>`
    DictEnd,
    /// `obj`
    ObjStart,
    /// `endobj`
    ObjEnd,
    /// `stream`
    StreamStart,
    /// `endstream`
    StreamEnd,
    /// `R` (indirect reference marker)
    R,
}

fn is_pdf_whitespace(c: u8) -> bool {
    matches!(c, b' ' | b'\t' | b'\r' | b'\n' | 0x00 | 0x0C)
}

fn is_delimiter(c: u8) -> bool {
    matches!(c, b'/' | b'%' | b'(' | b')' | b'<' | b'>' | b'[' | b']' | b'{' | b'}')
}

/// Skip whitespace and `%` comments (which run to end of line).
fn skip_ws(input: &[u8]) -> IResult<&[u8], ()> {
    let mut rest = input;
    loop {
        let (after_ws, _) = take_while(is_pdf_whitespace)(rest)?;
        if after_ws.first() == Some(&b'%') {
            let (after_comment, _) = preceded(
                char('%'),
                take_till(|c| c == b'\r' || c == b'\n'),
            )(after_ws)?;
            rest = after_comment;
        } else {
            return Ok((after_ws, ()));
        }
    }
}

/// Parse an integer or real number, allowing a leading sign and numbers that
/// start or end with the decimal point (`.5`, `5.`).
fn number(input: &[u8]) -> IResult<&[u8], Token<'_>> {
    let (rest, sign) = opt(one_of("+-"))(input)?;
    let (rest, int_part) = opt(digit1)(rest)?;
    let (rest, frac_part) = opt(preceded(char('.'), opt(digit1)))(rest)?;

    if int_part.is_none() && frac_part.is_none() {
        return Err(nom::Err::Error(nom::error::Error::new(
            input,
            nom::error::ErrorKind::Digit,
        )));
    }

    let negative = sign == Some('-');
    let int_str = int_part
        .map(|b| std::str::from_utf8(b).unwrap_or("0"))
        .unwrap_or("0");

    match frac_part {
        Some(frac) => {
            let frac_str = frac
                .map(|b| std::str::from_utf8(b).unwrap_or("0"))
                .unwrap_or("0");
            let text = format!("{}.{}", int_str, if frac_str.is_empty() { "0" } else { frac_str });
            let mut v: f64 = text.parse().map_err(|_| {
                nom::Err::Error(nom::error::Error::new(input, nom::error::ErrorKind::Digit))
            })?;
            if negative {
                v = -v;
            }
            Ok((rest, Token::Real(v)))
        },
        None => {
            let mut v: i64 = int_str.parse().map_err(|_| {
                nom::Err::Error(nom::error::Error::new(input, nom::error::ErrorKind::Digit))
            })?;
            if negative {
                v = -v;
            }
            Ok((rest, Token::Integer(v)))
        },
    }
}

/// Parse a literal string `( ... )`, tracking balanced parentheses and
/// skipping over escape sequences. Escape decoding happens in the parser.
fn literal_string(input: &[u8]) -> IResult<&[u8], Token<'_>> {
    let (body, _) = char('(')(input)?;
    let mut depth = 1usize;
    let mut pos = 0usize;

    while depth > 0 && pos < body.len() {
        match body[pos] {
            b'\\' => pos += 2,
            b'(' => {
                depth += 1;
                pos += 1;
            },
            b')' => {
                depth -= 1;
                pos += 1;
            },
            _ => pos += 1,
        }
    }

    if depth != 0 || pos > body.len() {
        return Err(nom::Err::Error(nom::error::Error::new(
            input,
            nom::error::ErrorKind::Tag,
        )));
    }

    Ok((&body[pos..], Token::LiteralString(&body[..pos - 1])))
}

/// Parse a hex string `< ... >`. Must not swallow `<<`.
fn hex_string(input: &[u8]) -> IResult<&[u8], Token<'_>> {
    if input.starts_with(b"<<") {
        return Err(nom::Err::Error(nom::error::Error::new(
            input,
            nom::error::ErrorKind::Tag,
        )));
    }
    delimited(
        char('<'),
        map(
            take_while(|c: u8| c.is_ascii_hexdigit() || c.is_ascii_whitespace()),
            Token::HexString,
        ),
        char('>'),
    )(input)
}

/// Decode `#XX` escape sequences in a name. Invalid sequences are kept
/// literal, matching lenient readers.
pub fn decode_name_escapes(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let bytes = name.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'#' {
            if let Some(hex) = name.get(i + 1..i + 3) {
                if let Ok(b) = u8::from_str_radix(hex, 16) {
                    out.push(b as char);
                    i += 3;
                    continue;
                }
            }
            out.push('#');
            i += 1;
        } else {
            out.push(bytes[i] as char);
            i += 1;
        }
    }
    out
}

/// Parse a name `/Foo`. Empty names are accepted for compatibility with
/// malformed producers.
fn name(input: &[u8]) -> IResult<&[u8], Token<'_>> {
    preceded(
        char('/'),
        map(
            take_while(|c: u8| !is_pdf_whitespace(c) && !is_delimiter(c)),
            |bytes: &[u8]| {
                let raw = std::str::from_utf8(bytes).unwrap_or("");
                Token::Name(decode_name_escapes(raw))
            },
        ),
    )(input)
}

/// Keywords and delimiters. Multi-character alternatives come first so that
/// `endstream` wins over `stream` and `<<` over `<`.
fn keyword(input: &[u8]) -> IResult<&[u8], Token<'_>> {
    alt((
        value(Token::False, tag(b"false")),
        value(Token::True, tag(b"true")),
        value(Token::Null, tag(b"null")),
        value(Token::ObjEnd, tag(b"endobj")),
        value(Token::StreamEnd, tag(b"endstream")),
        value(Token::StreamStart, tag(b"stream")),
        value(Token::ObjStart, tag(b"obj")),
        value(Token::DictStart, tag(b"<<")),
        value(Token::DictEnd, tag(b">>")),
        value(Token::ArrayStart, tag(b"[")),
        value(Token::ArrayEnd, tag(b"]")),
        value(Token::R, tag(b"R")),
    ))(input)
}

/// Parse one token, skipping leading whitespace and comments.
pub fn token(input: &[u8]) -> IResult<&[u8], Token<'_>> {
    let (input, _) = skip_ws(input)?;
    alt((keyword, name, number, literal_string, hex_string))(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integers() {
        assert_eq!(token(b"42"), Ok((&b""[..], Token::Integer(42))));
        assert_eq!(token(b"-17"), Ok((&b""[..], Token::Integer(-17))));
        assert_eq!(token(b"0"), Ok((&b""[..], Token::Integer(0))));
    }

    #[test]
    fn test_reals() {
        assert_eq!(token(b"2.5"), Ok((&b""[..], Token::Real(2.5))));
        assert_eq!(token(b"-.002"), Ok((&b""[..], Token::Real(-0.002))));
        assert_eq!(token(b"5."), Ok((&b""[..], Token::Real(5.0))));
    }

    #[test]
    fn test_literal_strings() {
        assert_eq!(token(b"(Hello)"), Ok((&b""[..], Token::LiteralString(b"Hello"))));
        assert_eq!(
            token(b"(a (nested) b)"),
            Ok((&b""[..], Token::LiteralString(b"a (nested) b")))
        );
        assert_eq!(token(b"()"), Ok((&b""[..], Token::LiteralString(b""))));
        assert_eq!(
            token(b"(esc \\( paren)"),
            Ok((&b""[..], Token::LiteralString(b"esc \\( paren")))
        );
    }

    #[test]
    fn test_hex_strings() {
        assert_eq!(token(b"<48656C6C6F>"), Ok((&b""[..], Token::HexString(b"48656C6C6F"))));
        assert_eq!(token(b"<>"), Ok((&b""[..], Token::HexString(b""))));
    }

    #[test]
    fn test_dict_start_not_hex() {
        assert_eq!(token(b"<<"), Ok((&b""[..], Token::DictStart)));
        assert_eq!(token(b"<AB>"), Ok((&b""[..], Token::HexString(b"AB"))));
    }

    #[test]
    fn test_names() {
        assert_eq!(token(b"/Type"), Ok((&b""[..], Token::Name("Type".to_string()))));
        assert_eq!(token(b"/A#20B"), Ok((&b""[..], Token::Name("A B".to_string()))));
        assert_eq!(token(b"/A#ZZ"), Ok((&b""[..], Token::Name("A#ZZ".to_string()))));
    }

    #[test]
    fn test_decode_name_escapes() {
        assert_eq!(decode_name_escapes("Type"), "Type");
        assert_eq!(decode_name_escapes("A#20B#23C"), "A B#C");
        assert_eq!(decode_name_escapes("A#"), "A#");
        assert_eq!(decode_name_escapes("A#2"), "A#2");
    }

    #[test]
    fn test_keywords() {
        assert_eq!(token(b"true"), Ok((&b""[..], Token::True)));
        assert_eq!(token(b"endstream"), Ok((&b""[..], Token::StreamEnd)));
        assert_eq!(token(b"endobj"), Ok((&b""[..], Token::ObjEnd)));
        assert_eq!(token(b"R"), Ok((&b""[..], Token::R)));
    }

    #[test]
    fn test_whitespace_and_comments() {
        assert_eq!(token(b"  \n\t42"), Ok((&b""[..], Token::Integer(42))));
        assert_eq!(token(b"% note\n42"), Ok((&b""[..], Token::Integer(42))));
        assert_eq!(token(b"% a\n% b\n 42"), Ok((&b""[..], Token::Integer(42))));
    }

    #[test]
    fn test_token_sequence() {
        let input = b"3 0 obj << /FT /Sig >> endobj";
        let (rest, t) = token(input).unwrap();
        assert_eq!(t, Token::Integer(3));
        let (rest, t) = token(rest).unwrap();
        assert_eq!(t, Token::Integer(0));
        let (rest, t) = token(rest).unwrap();
        assert_eq!(t, Token::ObjStart);
        let (rest, t) = token(rest).unwrap();
        assert_eq!(t, Token::DictStart);
        let (rest, t) = token(rest).unwrap();
        assert_eq!(t, Token::Name("FT".to_string()));
        let (rest, t) = token(rest).unwrap();
        assert_eq!(t, Token::Name("Sig".to_string()));
        let (rest, t) = token(rest).unwrap();
        assert_eq!(t, Token::DictEnd);
        let (_, t) = token(rest).unwrap();
        assert_eq!(t, Token::ObjEnd);
    }
}

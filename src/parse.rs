use std::collections::HashMap;

use nom::{
    bytes::complete::tag,
    character::complete::digit1,
    combinator::{map_res, opt, recognize},
    error::{ErrorKind, FromExternalError, ParseError},
    sequence::{delimited, terminated},
    IResult, Parser,
};

use crate::{BencodeType, Error, Result};

/// Maximum nesting of lists/dicts accepted by the decoder
const MAX_DEPTH: usize = 512;

/// Parse error carrying the remaining input, so the byte offset can be recovered
#[derive(Debug)]
struct DecodeError<'a> {
    input: &'a [u8],
    reason: String,
}

impl<'a> DecodeError<'a> {
    fn new(input: &'a [u8], reason: impl Into<String>) -> DecodeError<'a> {
        DecodeError {
            input,
            reason: reason.into(),
        }
    }
}

impl<'a> ParseError<&'a [u8]> for DecodeError<'a> {
    fn from_error_kind(input: &'a [u8], kind: ErrorKind) -> Self {
        let reason = if input.is_empty() {
            "unexpected end of input".to_string()
        } else {
            match kind {
                ErrorKind::Tag => format!("unexpected byte {:#04x}", input[0]),
                ErrorKind::Digit => "expected digits".to_string(),
                other => format!("{:?}", other),
            }
        };
        DecodeError::new(input, reason)
    }

    fn append(_: &'a [u8], _: ErrorKind, other: Self) -> Self {
        other
    }
}

impl<'a, E: std::fmt::Display> FromExternalError<&'a [u8], E> for DecodeError<'a> {
    fn from_external_error(input: &'a [u8], _: ErrorKind, e: E) -> Self {
        DecodeError::new(input, e.to_string())
    }
}

type Res<'a, O> = IResult<&'a [u8], O, DecodeError<'a>>;

/// Decode one bencoded value starting at `offset`
///
/// Returns the value and the number of bytes it occupied, so callers can
/// continue decoding after it.
pub fn decode(data: &[u8], offset: usize) -> Result<(BencodeType, usize)> {
    let input = data.get(offset..).ok_or_else(|| {
        Error::Parse(format!(
            "offset {} is past end of {} byte input",
            offset,
            data.len()
        ))
    })?;
    match parse_value(input, 0) {
        Ok((rest, value)) => Ok((value, input.len() - rest.len())),
        Err(nom::Err::Error(e)) | Err(nom::Err::Failure(e)) => Err(Error::Parse(format!(
            "{} at byte {}",
            e.reason,
            data.len() - e.input.len()
        ))),
        Err(nom::Err::Incomplete(_)) => Err(Error::Parse("unexpected end of input".to_string())),
    }
}

/// Decode a complete bencoded document, rejecting any trailing bytes
pub fn parse(data: &[u8]) -> Result<BencodeType> {
    let (value, consumed) = decode(data, 0)?;
    if consumed != data.len() {
        return Err(Error::Parse(format!(
            "{} trailing bytes after value at byte {}",
            data.len() - consumed,
            consumed
        )));
    }
    Ok(value)
}

fn parse_value(input: &[u8], depth: usize) -> Res<'_, BencodeType> {
    if depth > MAX_DEPTH {
        return Err(nom::Err::Failure(DecodeError::new(input, "nesting too deep")));
    }
    match input.first() {
        Some(b'i') => parse_integer(input),
        Some(b'0'..=b'9') => parse_byte_string(input),
        Some(b'l') => parse_list(input, depth),
        Some(b'd') => parse_dict(input, depth),
        Some(byte) => Err(nom::Err::Error(DecodeError::new(
            input,
            format!("unexpected byte {:#04x}", byte),
        ))),
        None => Err(nom::Err::Error(DecodeError::new(
            input,
            "unexpected end of input",
        ))),
    }
}

/// `i<digits>e`, with an optional leading minus
fn parse_integer(input: &[u8]) -> Res<'_, BencodeType> {
    map_res(
        delimited(tag("i"), recognize((opt(tag("-")), digit1)), tag("e")),
        integer_from_digits,
    )
    .map(BencodeType::Integer)
    .parse(input)
}

fn integer_from_digits(digits: &[u8]) -> std::result::Result<i64, String> {
    let text = std::str::from_utf8(digits).map_err(|e| e.to_string())?;
    let magnitude = text.strip_prefix('-').unwrap_or(text);
    if magnitude.len() > 1 && magnitude.starts_with('0') {
        return Err(format!("integer has leading zero: {}", text));
    }
    if text == "-0" {
        return Err("negative zero is not a valid integer".to_string());
    }
    text.parse::<i64>()
        .map_err(|e| format!("invalid integer {}: {}", text, e))
}

/// `<len>:` prefix of a byte string
fn parse_length(input: &[u8]) -> Res<'_, usize> {
    terminated(
        map_res(digit1, |digits: &[u8]| {
            std::str::from_utf8(digits)
                .map_err(|e| e.to_string())
                .and_then(|text| text.parse::<usize>().map_err(|e| e.to_string()))
        }),
        tag(":"),
    )
    .parse(input)
}

fn parse_byte_string(input: &[u8]) -> Res<'_, BencodeType> {
    let (rest, len) = parse_length(input)?;
    if len > rest.len() {
        return Err(nom::Err::Error(DecodeError::new(
            input,
            format!(
                "byte string length {} exceeds remaining {} bytes",
                len,
                rest.len()
            ),
        )));
    }
    let (bytes, rest) = rest.split_at(len);
    Ok((rest, BencodeType::ByteString(bytes.to_vec())))
}

fn parse_list(input: &[u8], depth: usize) -> Res<'_, BencodeType> {
    let mut items = Vec::new();
    let mut rest = &input[1..];
    loop {
        match rest.first() {
            Some(b'e') => return Ok((&rest[1..], BencodeType::List(items))),
            None => {
                return Err(nom::Err::Error(DecodeError::new(rest, "unterminated list")));
            }
            Some(_) => {
                let (remaining, item) = parse_value(rest, depth + 1)?;
                items.push(item);
                rest = remaining;
            }
        }
    }
}

fn parse_dict(input: &[u8], depth: usize) -> Res<'_, BencodeType> {
    let mut dict = HashMap::new();
    let mut rest = &input[1..];
    loop {
        match rest.first() {
            Some(b'e') => return Ok((&rest[1..], BencodeType::Dict(dict))),
            None => {
                return Err(nom::Err::Error(DecodeError::new(
                    rest,
                    "unterminated dictionary",
                )));
            }
            Some(_) => {
                let key_start = rest;
                let (remaining, key) = parse_value(rest, depth + 1)?;
                let key = match key {
                    BencodeType::ByteString(key) => key,
                    _ => {
                        return Err(nom::Err::Error(DecodeError::new(
                            key_start,
                            "dictionary key is not a byte string",
                        )));
                    }
                };
                if dict.contains_key(&key) {
                    return Err(nom::Err::Error(DecodeError::new(
                        key_start,
                        format!("duplicate dictionary key {:?}", String::from_utf8_lossy(&key)),
                    )));
                }
                let (remaining, value) = parse_value(remaining, depth + 1)?;
                dict.insert(key, value);
                rest = remaining;
            }
        }
    }
}

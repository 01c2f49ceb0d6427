//! Line framing and tokenizing for the Hargassner serial telemetry stream.
//!
//! The controller emits one record per line. High-bit characters in fault and
//! message texts do not survive the wire framing verbatim: they arrive as
//! literal `\xNN` hex escapes, which this module resolves back into bytes
//! before the line is split into tokens.
//!
//! # Record Format
//!
//! ```text
//! pm 62 45 8.1 71 142 3.5 2.9 38.0 31.5 40.0 35.0 55 54 20 60 ...
//! z 14:10:40 Kessel Z\xfcndung
//! z 18:39:41 St\xf6rung Set 7 Stop:1
//! ```
//!
//! The first token selects the record kind, see [`classify`].

use chrono::NaiveTime;
use nom::{
    IResult, Parser,
    bytes::complete::{tag, take_while_m_n},
    character::complete::char,
    combinator::{all_consuming, map, map_res},
    sequence::{preceded, terminated},
};
use thiserror::Error;

/// Errors that can occur while turning a raw line into tokens.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TokenizeError {
    #[error("Malformed hex escape at byte {offset}")]
    MalformedEscape { offset: usize },
}

/// The kind of record selected by the first token of a line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    /// Periodic process value snapshot (`pm`).
    ProcessValues,
    /// Timestamped event (`z`).
    Event,
    /// Anything else; surfaced to the operator, never an error.
    Unknown,
}

fn hex_value(digit: u8) -> u8 {
    match digit {
        b'0'..=b'9' => digit - b'0',
        b'a'..=b'f' => digit - b'a' + 10,
        _ => digit - b'A' + 10,
    }
}

/// Parse a single `\xNN` escape into the byte it names.
fn hex_escape(input: &[u8]) -> IResult<&[u8], u8> {
    map(
        preceded(
            tag(&b"\\x"[..]),
            take_while_m_n(2, 2, |b: u8| b.is_ascii_hexdigit()),
        ),
        |digits: &[u8]| (hex_value(digits[0]) << 4) | hex_value(digits[1]),
    )
    .parse(input)
}

/// Resolve literal `\xNN` escapes into raw bytes.
///
/// A backslash that does not start `\x` is kept as is. A `\x` that is not
/// followed by two hex digits makes the whole line malformed.
pub fn resolve_escapes(raw: &[u8]) -> Result<Vec<u8>, TokenizeError> {
    let mut out = Vec::with_capacity(raw.len());
    let mut rest = raw;

    while let Some((&byte, tail)) = rest.split_first() {
        if rest.starts_with(b"\\x") {
            match hex_escape(rest) {
                Ok((remaining, value)) => {
                    out.push(value);
                    rest = remaining;
                }
                Err(_) => {
                    return Err(TokenizeError::MalformedEscape {
                        offset: raw.len() - rest.len(),
                    });
                }
            }
        } else {
            out.push(byte);
            rest = tail;
        }
    }

    Ok(out)
}

/// Decode resolved line bytes into text.
///
/// Valid UTF-8 is taken as is; anything else is the controller's Latin-1
/// and is mapped byte for byte.
pub fn decode_text(bytes: Vec<u8>) -> String {
    match String::from_utf8(bytes) {
        Ok(text) => text,
        Err(e) => e.into_bytes().into_iter().map(char::from).collect(),
    }
}

/// Turn one raw line into its whitespace-separated tokens.
///
/// Only ASCII whitespace separates tokens; Latin-1 NEL and NBSP stay inside
/// the token they appear in. Returns an empty vector for blank lines.
pub fn tokenize(raw: &[u8]) -> Result<Vec<String>, TokenizeError> {
    let text = decode_text(resolve_escapes(raw)?);
    Ok(text
        .split(|c: char| c.is_ascii_whitespace())
        .filter(|token| !token.is_empty())
        .map(str::to_string)
        .collect())
}

/// Classify a token sequence by its first token.
///
/// Returns `None` for an empty sequence, which callers treat as "no record".
pub fn classify<S: AsRef<str>>(tokens: &[S]) -> Option<RecordKind> {
    let kind = match tokens.first()?.as_ref() {
        "pm" => RecordKind::ProcessValues,
        "z" => RecordKind::Event,
        _ => RecordKind::Unknown,
    };
    Some(kind)
}

fn two_digits(input: &str) -> IResult<&str, u32> {
    map_res(take_while_m_n(2, 2, |c: char| c.is_ascii_digit()), |s: &str| {
        s.parse::<u32>()
    })
    .parse(input)
}

/// Parse an event timestamp of the form `HH:MM:SS`.
pub fn parse_time_of_day(input: &str) -> Option<NaiveTime> {
    let result: IResult<&str, NaiveTime> = all_consuming(map_res(
        (
            terminated(two_digits, char(':')),
            terminated(two_digits, char(':')),
            two_digits,
        ),
        |(hour, min, sec)| NaiveTime::from_hms_opt(hour, min, sec).ok_or("Invalid time values"),
    ))
    .parse(input);

    result.ok().map(|(_, time)| time)
}

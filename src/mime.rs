//! RFC 2047 header decoding, a lenient Base64 decoder and UTF-8 sanitizing.
//!
//! Decoded header bytes are always treated as UTF-8: no charset transcoding
//! is attempted, bytes that do not form valid UTF-8 are dropped.

use base64::Engine;
use crate::utils::{BoundedString, Cursor};

/// Capacity for a decoded header value.
pub const MAX_HEADER_LEN: usize = 1024;

/// Decode every RFC 2047 encoded-word in `input`.
pub fn decode_header(input: &str) -> String {
    decode_header_bounded(input, MAX_HEADER_LEN)
}

/// Same as `decode_header` but stops growing the result at `capacity` bytes.
///
/// Malformed tokens are copied literally one char at a time. Whitespace that
/// separates two encoded-words disappears; whitespace after an encoded-word
/// that is followed by anything else collapses to one space.
pub fn decode_header_bounded(input: &str, capacity: usize) -> String {
    let mut out = BoundedString::with_capacity(capacity);
    let mut cur = Cursor::new(input);

    while !cur.is_eof() && !out.is_full() {
        if cur.starts_with("=?") {
            if let Some((decoded, consumed)) = decode_encoded_word(cur.rest()) {
                out.push_str(&decoded);
                cur.advance(consumed);

                let mut ahead = Cursor::new(cur.rest());
                let gap = ahead.skip_while(is_folding_space);
                if gap > 0 {
                    if !ahead.starts_with("=?") && !out.is_empty() && out.last() != Some(' ') {
                        out.push(' ');
                    }
                    cur.advance(gap);
                }
                continue;
            }
        }
        match cur.next_char() {
            Some(c) => {
                out.push(c);
            }
            None => break,
        }
    }
    out.into_string()
}

fn is_folding_space(b: u8) -> bool {
    b == b' ' || b == b'\t' || b == b'\r' || b == b'\n'
}

/// Decode one `=?charset?enc?text?=` token at the start of `word`.
/// Returns the sanitized text and the number of bytes consumed.
fn decode_encoded_word(word: &str) -> Option<(String, usize)> {
    let mut cur = Cursor::new(word);
    cur.advance(2);
    let _charset = cur.read_until("?")?;

    let encoding = cur.peek()?.to_ascii_uppercase();
    if encoding != b'B' && encoding != b'Q' {
        return None;
    }
    cur.advance(1);
    if cur.peek() != Some(b'?') {
        return None;
    }
    cur.advance(1);

    let text = cur.read_until("?=")?;
    let raw = if encoding == b'B' {
        base64_decode(text.as_bytes())
    } else {
        decode_q(text.as_bytes())
    };
    Some((sanitize(&raw), word.len() - cur.rest().len()))
}

/// The `Q` flavour of quoted-printable: `_` is a space, `=XX` a hex byte.
/// Soft line breaks are not recognised.
fn decode_q(input: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(input.len());
    let mut i = 0;
    while i < input.len() {
        match input[i] {
            b'_' => out.push(b' '),
            b'=' if i + 2 < input.len() => match (hex_value(input[i + 1]), hex_value(input[i + 2])) {
                (Some(hi), Some(lo)) => {
                    out.push((hi << 4) | lo);
                    i += 3;
                    continue;
                }
                _ => out.push(b'='),
            },
            c => out.push(c),
        }
        i += 1;
    }
    out
}

fn hex_value(c: u8) -> Option<u8> {
    match c {
        b'0'..=b'9' => Some(c - b'0'),
        b'a'..=b'f' => Some(c - b'a' + 10),
        b'A'..=b'F' => Some(c - b'A' + 10),
        _ => None,
    }
}

fn sextet(c: u8) -> Option<u8> {
    match c {
        b'A'..=b'Z' => Some(c - b'A'),
        b'a'..=b'z' => Some(c - b'a' + 26),
        b'0'..=b'9' => Some(c - b'0' + 52),
        b'+' => Some(62),
        b'/' => Some(63),
        _ => None,
    }
}

/// Standard-alphabet Base64 decoder.
///
/// Whitespace and stray bytes are skipped, decoding stops at the first `=`
/// (or NUL). A trailing group of two or three symbols without padding still
/// yields its one or two bytes.
pub fn base64_decode(input: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(input.len() / 4 * 3 + 2);
    let mut quad = [0u8; 4];
    let mut n = 0;

    for &c in input {
        if c == b'=' || c == 0 {
            break;
        }
        let v = match sextet(c) {
            Some(v) => v,
            None => continue,
        };
        quad[n] = v;
        n += 1;
        if n == 4 {
            out.push((quad[0] << 2) | (quad[1] >> 4));
            out.push((quad[1] << 4) | (quad[2] >> 2));
            out.push((quad[2] << 6) | quad[3]);
            n = 0;
        }
    }

    if n >= 2 {
        out.push((quad[0] << 2) | (quad[1] >> 4));
        if n == 3 {
            out.push((quad[1] << 4) | (quad[2] >> 2));
        }
    }
    out
}

pub fn base64_encode(input: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(input)
}

/// Encode a header value as a single `B` encoded-word when it is not plain ASCII.
pub fn encode_header(value: &str) -> String {
    if value.is_ascii() {
        value.to_string()
    } else {
        format!("=?UTF-8?B?{}?=", base64_encode(value.as_bytes()))
    }
}

fn utf8_sequence_len(lead: u8) -> usize {
    match lead {
        0xC2..=0xDF => 2,
        0xE0..=0xEF => 3,
        0xF0..=0xF4 => 4,
        _ => 0,
    }
}

/// Turn arbitrary bytes into displayable UTF-8 text.
///
/// ASCII control bytes other than LF, CR and TAB become a space. Complete,
/// valid multi-byte sequences pass through; any other non-ASCII byte is
/// dropped.
pub fn sanitize(input: &[u8]) -> String {
    let mut out = String::with_capacity(input.len());
    let mut i = 0;
    while i < input.len() {
        let b = input[i];
        if b < 0x80 {
            let control = (b < 0x20 && b != b'\n' && b != b'\r' && b != b'\t') || b == 0x7f;
            out.push(if control { ' ' } else { b as char });
            i += 1;
            continue;
        }

        let width = utf8_sequence_len(b);
        if width > 0 && i + width <= input.len() {
            if let Ok(seq) = ::std::str::from_utf8(&input[i..i + width]) {
                out.push_str(seq);
                i += width;
                continue;
            }
        }
        i += 1;
    }
    out
}

pub fn sanitize_text(input: &str) -> String {
    sanitize(input.as_bytes())
}

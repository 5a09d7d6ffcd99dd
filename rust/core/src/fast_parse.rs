// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Fast Direct Parsing Module
//!
//! Allocation-free number parsing for the line-oriented formats
//! (ASCII STL `vertex` lines, OBJ `v`/`f` records, G-code words).

/// Check if byte can start a number
#[inline(always)]
fn is_number_start(b: u8) -> bool {
    b.is_ascii_digit() || b == b'-' || b == b'+' || b == b'.'
}

/// Strip leading ASCII whitespace
#[inline]
pub fn trim_start(bytes: &[u8]) -> &[u8] {
    let start = bytes
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(bytes.len());
    &bytes[start..]
}

/// Strip trailing ASCII whitespace (including `\r`)
#[inline]
pub fn trim_end(bytes: &[u8]) -> &[u8] {
    let end = bytes
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map_or(0, |i| i + 1);
    &bytes[..end]
}

/// If `line` starts with `keyword` followed by whitespace, return the rest
#[inline]
pub fn strip_keyword<'a>(line: &'a [u8], keyword: &[u8]) -> Option<&'a [u8]> {
    let rest = line.strip_prefix(keyword)?;
    match rest.first() {
        Some(b) if b.is_ascii_whitespace() => Some(rest),
        None => Some(rest),
        _ => None,
    }
}

/// [`strip_keyword`] with an ASCII case-insensitive keyword match
#[inline]
pub fn strip_keyword_ignore_case<'a>(line: &'a [u8], keyword: &[u8]) -> Option<&'a [u8]> {
    let head = line.get(..keyword.len())?;
    if !head.eq_ignore_ascii_case(keyword) {
        return None;
    }
    let rest = &line[keyword.len()..];
    match rest.first() {
        Some(b) if b.is_ascii_whitespace() => Some(rest),
        None => Some(rest),
        _ => None,
    }
}

/// Parse one float at the start of `bytes` (after whitespace).
///
/// Returns the value and the remaining input. Exponent forms like `1.5e-3`
/// are accepted, as is a leading `+`.
#[inline]
pub fn parse_f64_partial(bytes: &[u8]) -> Option<(f64, &[u8])> {
    let mut s = trim_start(bytes);
    if !s.first().copied().is_some_and(is_number_start) {
        return None;
    }
    if s[0] == b'+' {
        s = &s[1..];
    }
    match fast_float::parse_partial::<f64, _>(s) {
        Ok((value, consumed)) if consumed > 0 => Some((value, &s[consumed..])),
        _ => None,
    }
}

/// Parse exactly three whitespace-separated floats, e.g. the body of a
/// `vertex` or `v` record. Trailing data (like an OBJ `w` component) is ignored.
#[inline]
pub fn parse_vec3(bytes: &[u8]) -> Option<[f64; 3]> {
    let (x, rest) = parse_f64_partial(bytes)?;
    let (y, rest) = parse_f64_partial(rest)?;
    let (z, rest) = parse_f64_partial(rest)?;
    // Reject things like "1 2 3abc"
    match rest.first() {
        None => Some([x, y, z]),
        Some(b) if b.is_ascii_whitespace() => Some([x, y, z]),
        _ => None,
    }
}

/// Parse the vertex reference of an OBJ face token (`7`, `7/2`, `7//3`, `-1/4/2`)
#[inline]
pub fn parse_face_index(token: &[u8]) -> Option<i64> {
    let end = memchr::memchr(b'/', token).unwrap_or(token.len());
    let digits = std::str::from_utf8(&token[..end]).ok()?;
    digits.parse().ok()
}

/// Value of a G-code word such as `X12.5` within a command line
#[inline]
pub fn gcode_word(line: &[u8], letter: u8) -> Option<f64> {
    line.split(|b| b.is_ascii_whitespace())
        .find(|w| w.len() > 1 && w[0].eq_ignore_ascii_case(&letter))
        .and_then(|w| parse_f64_partial(&w[1..]))
        .map(|(value, _)| value)
}

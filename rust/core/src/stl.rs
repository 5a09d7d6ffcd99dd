// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! STL readers
//!
//! Both readers are iterators over [`Triangle`]s and keep a running
//! [`BoundingBox`]. Neither holds more than one record in memory.

use std::io::{BufRead, ErrorKind, Read};

use crate::error::{Error, Result};
use crate::fast_parse::{parse_vec3, strip_keyword_ignore_case, trim_end, trim_start};
use crate::format::{STL_HEADER_LEN, STL_RECORD_LEN};
use crate::geometry::{BoundingBox, Triangle};

/// Hard limit on lines read from text formats
pub const DEFAULT_LINE_CAP: u64 = 10_000_000;

/// Bytes inspected by [`detect_kind`]
pub const DETECT_PREFIX_LEN: usize = 512;

/// STL encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StlKind {
    Binary,
    Ascii,
}

/// Decide whether an STL file is binary or ASCII from its first bytes.
///
/// A file whose size matches `84 + 50 * count` is binary regardless of its
/// header. Otherwise it is ASCII only when it starts with `solid`
/// (case-insensitive) and the following line mentions `facet` or `endsolid`.
/// Exporters that write `solid` into a binary header end up in the binary
/// branch either way.
pub fn detect_kind(prefix: &[u8], file_size: u64) -> StlKind {
    if prefix.len() >= STL_HEADER_LEN as usize {
        let count = u32::from_le_bytes([prefix[80], prefix[81], prefix[82], prefix[83]]);
        if STL_HEADER_LEN + STL_RECORD_LEN * count as u64 == file_size {
            return StlKind::Binary;
        }
    }

    if prefix.len() < 5 || !prefix[..5].eq_ignore_ascii_case(b"solid") {
        return StlKind::Binary;
    }

    let Some(first_eol) = memchr::memchr(b'\n', prefix) else {
        return StlKind::Binary;
    };
    let rest = &prefix[first_eol + 1..];
    let next_line = match memchr::memchr(b'\n', rest) {
        Some(end) => &rest[..end],
        None => rest,
    };
    let next_line = next_line.to_ascii_lowercase();
    if contains(&next_line, b"facet") || contains(&next_line, b"endsolid") {
        StlKind::Ascii
    } else {
        StlKind::Binary
    }
}

#[inline]
fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

#[inline]
fn starts_with_ignore_case(line: &[u8], prefix: &[u8]) -> bool {
    line.len() >= prefix.len() && line[..prefix.len()].eq_ignore_ascii_case(prefix)
}

/// Fill `buf` as far as the reader allows, returning the number of bytes read
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

#[inline]
fn f32_at(record: &[u8], offset: usize) -> f64 {
    f32::from_le_bytes([
        record[offset],
        record[offset + 1],
        record[offset + 2],
        record[offset + 3],
    ]) as f64
}

/// Binary STL reader
///
/// Layout: 80-byte header, little-endian `u32` triangle count, then one
/// 50-byte record per triangle (normal, three vertices, attribute word).
pub struct BinaryStlReader<R> {
    reader: R,
    header: [u8; 80],
    declared: u32,
    remaining: u32,
    bounds: BoundingBox,
}

impl<R: Read> BinaryStlReader<R> {
    /// Read the header and triangle count
    pub fn new(mut reader: R) -> Result<Self> {
        let mut head = [0u8; STL_HEADER_LEN as usize];
        let got = read_full(&mut reader, &mut head)?;
        if got < head.len() {
            return Err(Error::Truncated {
                expected: head.len(),
                got,
            });
        }

        let mut header = [0u8; 80];
        header.copy_from_slice(&head[..80]);
        let declared = u32::from_le_bytes([head[80], head[81], head[82], head[83]]);

        Ok(Self {
            reader,
            header,
            declared,
            remaining: declared,
            bounds: BoundingBox::empty(),
        })
    }

    /// Triangle count from the file header
    #[inline]
    pub fn declared_count(&self) -> u32 {
        self.declared
    }

    #[inline]
    pub fn header(&self) -> &[u8; 80] {
        &self.header
    }

    /// Bounds of the triangles read so far
    #[inline]
    pub fn bounds(&self) -> &BoundingBox {
        &self.bounds
    }
}

impl<R: Read> Iterator for BinaryStlReader<R> {
    type Item = Result<Triangle>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }

        let mut record = [0u8; STL_RECORD_LEN as usize];
        let got = match read_full(&mut self.reader, &mut record) {
            Ok(n) => n,
            Err(e) => {
                self.remaining = 0;
                return Some(Err(e.into()));
            }
        };
        if got < record.len() {
            self.remaining = 0;
            return Some(Err(Error::Truncated {
                expected: record.len(),
                got,
            }));
        }
        self.remaining -= 1;

        // Skip the 12-byte normal and the trailing attribute word
        let mut coords = [0.0f64; 9];
        for (i, c) in coords.iter_mut().enumerate() {
            *c = f32_at(&record, 12 + i * 4);
        }
        let tri = Triangle::from_coords(coords);
        self.bounds.extend_triangle(&tri);
        Some(Ok(tri))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.remaining as usize))
    }
}

/// ASCII STL reader
///
/// Only `vertex` lines matter; every third vertex closes a triangle.
/// Lines that are not vertices are ignored, `endsolid` ends the stream.
pub struct AsciiStlReader<R> {
    reader: R,
    line: Vec<u8>,
    lines_read: u64,
    bytes_read: u64,
    triangles: u64,
    line_cap: u64,
    cap_reached: bool,
    pending: [f64; 9],
    pending_len: usize,
    done: bool,
    bounds: BoundingBox,
}

impl<R: BufRead> AsciiStlReader<R> {
    pub fn new(reader: R) -> Self {
        Self::with_line_cap(reader, DEFAULT_LINE_CAP)
    }

    pub fn with_line_cap(reader: R, line_cap: u64) -> Self {
        Self {
            reader,
            line: Vec::with_capacity(128),
            lines_read: 0,
            bytes_read: 0,
            triangles: 0,
            line_cap,
            cap_reached: false,
            pending: [0.0; 9],
            pending_len: 0,
            done: false,
            bounds: BoundingBox::empty(),
        }
    }

    /// Whether reading stopped because the line cap was hit
    #[inline]
    pub fn cap_reached(&self) -> bool {
        self.cap_reached
    }

    #[inline]
    pub fn lines_read(&self) -> u64 {
        self.lines_read
    }

    /// Triangle count projected from the bytes consumed so far.
    ///
    /// `None` until at least one triangle has been read.
    pub fn projected_total(&self, file_size: u64) -> Option<u64> {
        if self.triangles == 0 || self.bytes_read == 0 {
            return None;
        }
        if self.done {
            return Some(self.triangles);
        }
        let per_triangle = self.bytes_read as f64 / self.triangles as f64;
        Some(((file_size as f64 / per_triangle).round() as u64).max(self.triangles))
    }

    #[inline]
    pub fn bounds(&self) -> &BoundingBox {
        &self.bounds
    }
}

impl<R: BufRead> Iterator for AsciiStlReader<R> {
    type Item = Result<Triangle>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.done {
            if self.lines_read >= self.line_cap {
                self.cap_reached = true;
                self.done = true;
                break;
            }

            self.line.clear();
            match self.reader.read_until(b'\n', &mut self.line) {
                Ok(0) => {
                    self.done = true;
                    break;
                }
                Ok(n) => {
                    self.lines_read += 1;
                    self.bytes_read += n as u64;
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.done = true;
                    return Some(Err(e.into()));
                }
            }

            let line = trim_end(trim_start(&self.line));
            if starts_with_ignore_case(line, b"endsolid") {
                self.done = true;
                break;
            }
            let Some(body) = strip_keyword_ignore_case(line, b"vertex") else {
                continue;
            };
            let Some(v) = parse_vec3(body) else {
                continue;
            };

            let at = self.pending_len * 3;
            self.pending[at..at + 3].copy_from_slice(&v);
            self.pending_len += 1;
            if self.pending_len == 3 {
                self.pending_len = 0;
                self.triangles += 1;
                let tri = Triangle::from_coords(self.pending);
                self.bounds.extend_triangle(&tri);
                return Some(Ok(tri));
            }
        }
        None
    }
}

// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Wavefront OBJ reader
//!
//! Reading happens in two explicit passes:
//!
//! 1. [`scan_vertices`] reads the whole file once and builds an owned vertex
//!    table. Faces may appear before the vertices they reference (files with
//!    interleaved groups do this), so the scan never stops at the first `f`.
//! 2. [`ObjReader`] reads the file again and fan-triangulates each face
//!    against that table.

use std::fs::File;
use std::io::{BufRead, BufReader, ErrorKind};
use std::path::Path;

use smallvec::SmallVec;

use crate::error::Result;
use crate::fast_parse::{parse_face_index, parse_vec3, strip_keyword, trim_end, trim_start};
use crate::geometry::{BoundingBox, Triangle, Vertex};
use crate::stl::DEFAULT_LINE_CAP;

/// Vertex table produced by the first pass
#[derive(Debug, Clone, Default)]
pub struct ObjVertexTable {
    pub vertices: Vec<Vertex>,
    /// Triangles the faces would produce if every index resolves
    pub face_triangles: u64,
    pub lines_read: u64,
    pub cap_reached: bool,
}

impl ObjVertexTable {
    #[inline]
    pub fn len(&self) -> usize {
        self.vertices.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }
}

/// Read one line into `buf`, retrying on interrupts. Returns false at EOF.
fn next_line<R: BufRead>(reader: &mut R, buf: &mut Vec<u8>) -> std::io::Result<bool> {
    loop {
        buf.clear();
        match reader.read_until(b'\n', buf) {
            Ok(0) => return Ok(false),
            Ok(_) => return Ok(true),
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
}

/// Pass 1: collect every `v` record and count face triangles
pub fn scan_vertices<R: BufRead>(mut reader: R, line_cap: u64) -> Result<ObjVertexTable> {
    let mut table = ObjVertexTable::default();
    let mut buf = Vec::with_capacity(128);

    while next_line(&mut reader, &mut buf)? {
        if table.lines_read >= line_cap {
            table.cap_reached = true;
            break;
        }
        table.lines_read += 1;

        let line = trim_end(trim_start(&buf));
        if let Some(body) = strip_keyword(line, b"v") {
            if let Some([x, y, z]) = parse_vec3(body) {
                table.vertices.push(Vertex::new(x, y, z));
            }
        } else if let Some(body) = strip_keyword(line, b"f") {
            let refs = body
                .split(|b| b.is_ascii_whitespace())
                .filter(|t| !t.is_empty())
                .count() as u64;
            table.face_triangles += refs.saturating_sub(2);
        }
    }

    Ok(table)
}

/// Pass 2: stream triangles from OBJ faces
pub struct ObjReader<R> {
    reader: R,
    vertices: Vec<Vertex>,
    expected: u64,
    line: Vec<u8>,
    lines_read: u64,
    line_cap: u64,
    cap_reached: bool,
    /// `v` records seen so far in this pass, for relative indices
    seen_vertices: usize,
    face: SmallVec<[usize; 8]>,
    fan_next: usize,
    skipped_faces: u64,
    done: bool,
    bounds: BoundingBox,
}

impl ObjReader<BufReader<File>> {
    /// Run both passes over the file at `path`
    pub fn open(path: &Path) -> Result<Self> {
        Self::open_with_line_cap(path, DEFAULT_LINE_CAP)
    }

    pub fn open_with_line_cap(path: &Path, line_cap: u64) -> Result<Self> {
        let table = scan_vertices(BufReader::new(File::open(path)?), line_cap)?;
        let reader = BufReader::new(File::open(path)?);
        Ok(Self::with_line_cap(table, reader, line_cap))
    }
}

impl<R: BufRead> ObjReader<R> {
    pub fn new(table: ObjVertexTable, reader: R) -> Self {
        Self::with_line_cap(table, reader, DEFAULT_LINE_CAP)
    }

    pub fn with_line_cap(table: ObjVertexTable, reader: R, line_cap: u64) -> Self {
        Self {
            reader,
            vertices: table.vertices,
            expected: table.face_triangles,
            line: Vec::with_capacity(128),
            lines_read: 0,
            line_cap,
            cap_reached: table.cap_reached,
            seen_vertices: 0,
            face: SmallVec::new(),
            fan_next: 0,
            skipped_faces: 0,
            done: false,
            bounds: BoundingBox::empty(),
        }
    }

    /// Upper bound on triangles, counted during the first pass
    #[inline]
    pub fn expected_triangles(&self) -> u64 {
        self.expected
    }

    #[inline]
    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    /// Faces dropped because fewer than three of their indices resolved
    #[inline]
    pub fn skipped_faces(&self) -> u64 {
        self.skipped_faces
    }

    #[inline]
    pub fn cap_reached(&self) -> bool {
        self.cap_reached
    }

    #[inline]
    pub fn bounds(&self) -> &BoundingBox {
        &self.bounds
    }

    /// Map a 1-based or negative (relative) index into the vertex table
    fn resolve(&self, index: i64) -> Option<usize> {
        let resolved = match index {
            0 => return None,
            i if i > 0 => (i - 1) as usize,
            i => {
                let back = i.unsigned_abs() as usize;
                self.seen_vertices.checked_sub(back)?
            }
        };
        (resolved < self.vertices.len()).then_some(resolved)
    }

    fn emit_fan(&mut self) -> Option<Triangle> {
        if self.fan_next + 1 >= self.face.len() {
            return None;
        }
        let a = self.vertices[self.face[0]];
        let b = self.vertices[self.face[self.fan_next]];
        let c = self.vertices[self.face[self.fan_next + 1]];
        self.fan_next += 1;
        let tri = Triangle::new(a, b, c);
        self.bounds.extend_triangle(&tri);
        Some(tri)
    }
}

impl<R: BufRead> Iterator for ObjReader<R> {
    type Item = Result<Triangle>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(tri) = self.emit_fan() {
                return Some(Ok(tri));
            }
            if self.done {
                return None;
            }
            if self.lines_read >= self.line_cap {
                self.cap_reached = true;
                self.done = true;
                return None;
            }

            let mut line = std::mem::take(&mut self.line);
            match next_line(&mut self.reader, &mut line) {
                Ok(true) => self.lines_read += 1,
                Ok(false) => {
                    self.line = line;
                    self.done = true;
                    return None;
                }
                Err(e) => {
                    self.line = line;
                    self.done = true;
                    return Some(Err(e.into()));
                }
            }

            let trimmed = trim_end(trim_start(&line));
            if let Some(body) = strip_keyword(trimmed, b"v") {
                // Only well-formed records made it into the table
                if parse_vec3(body).is_some() {
                    self.seen_vertices += 1;
                }
            } else if let Some(body) = strip_keyword(trimmed, b"f") {
                let mut face: SmallVec<[usize; 8]> = SmallVec::new();
                for token in body.split(|b| b.is_ascii_whitespace()).filter(|t| !t.is_empty()) {
                    if let Some(idx) = parse_face_index(token).and_then(|i| self.resolve(i)) {
                        face.push(idx);
                    }
                }
                if face.len() >= 3 {
                    self.face = face;
                    self.fan_next = 1;
                } else {
                    self.skipped_faces += 1;
                }
            }
            self.line = line;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::io::Cursor;

    fn read_all(text: &str) -> (Vec<Triangle>, u64, u64) {
        let table = scan_vertices(Cursor::new(text.as_bytes()), DEFAULT_LINE_CAP).unwrap();
        let mut reader = ObjReader::new(table, Cursor::new(text.as_bytes()));
        let tris: Vec<_> = reader.by_ref().collect::<Result<_>>().unwrap();
        (tris, reader.expected_triangles(), reader.skipped_faces())
    }

    #[test]
    fn test_quad_fan_triangulation() {
        let text = "v 0 0 0\nv 1 0 0\nv 1 1 0\nv 0 1 0\nf 1 2 3 4\n";
        let (tris, expected, _) = read_all(text);

        assert_eq!(tris.len(), 2);
        assert_eq!(expected, 2);
        assert_eq!(tris[0].vertices[2], Vertex::new(1.0, 1.0, 0.0));
        assert_eq!(tris[1].vertices[1], Vertex::new(1.0, 1.0, 0.0));
        let area: f64 = tris.iter().map(Triangle::area).sum();
        assert_relative_eq!(area, 1.0);
    }

    #[test]
    fn test_faces_before_vertices() {
        let text = "o first\nf 1/1/1 2/2/1 3/3/1\nv 0 0 0\nv 2 0 0\nv 0 2 0\n";
        let (tris, _, skipped) = read_all(text);

        assert_eq!(tris.len(), 1);
        assert_eq!(skipped, 0);
        assert_relative_eq!(tris[0].area(), 2.0);
    }

    #[test]
    fn test_negative_indices() {
        let text = "v 0 0 0\nv 1 0 0\nv 0 1 0\nf -3 -2 -1\nv 0 0 3\nf -4//1 -3//1 -1//1\n";
        let (tris, _, _) = read_all(text);

        assert_eq!(tris.len(), 2);
        assert_relative_eq!(tris[0].area(), 0.5);
        assert_eq!(tris[1].vertices[2], Vertex::new(0.0, 0.0, 3.0));
    }

    #[test]
    fn test_unresolvable_faces_skipped() {
        let text = "v 0 0 0\nv 1 0 0\nv 0 1 0\nf 1 2\nf 1 2 99\nf 0 1 2 3\n# comment\nvn 0 0 1\n";
        let (tris, expected, skipped) = read_all(text);

        // "f 0 1 2 3" keeps three resolvable references
        assert_eq!(tris.len(), 1);
        assert_eq!(skipped, 2);
        assert_eq!(expected, 3);
    }

    #[test]
    fn test_open_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tri.obj");
        std::fs::write(&path, "f 1 2 3\nv 0 0 0\nv 1 0 0\nv 0 1 0\n").unwrap();

        let mut reader = ObjReader::open(&path).unwrap();
        assert_eq!(reader.vertex_count(), 3);
        assert_eq!(reader.by_ref().count(), 1);
        assert_eq!(reader.bounds().max, [1.0, 1.0, 0.0]);
    }
}

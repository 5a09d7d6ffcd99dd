// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Format dispatch for streamable models

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use crate::error::{Error, Result};
use crate::format::FileType;
use crate::geometry::{BoundingBox, Triangle};
use crate::obj::ObjReader;
use crate::stl::{self, AsciiStlReader, BinaryStlReader, StlKind};

/// Bytes per triangle assumed for ASCII STL when nothing better is known
pub const ASCII_STL_BYTES_PER_TRIANGLE: u64 = 250;

/// Lazy triangle stream over any streamable format.
///
/// Opening the same path again restarts the stream from the beginning.
pub enum TriangleReader {
    BinaryStl(BinaryStlReader<BufReader<File>>),
    /// ASCII reader and the file size used to project its total
    AsciiStl(AsciiStlReader<BufReader<File>>, u64),
    Obj(ObjReader<BufReader<File>>),
}

impl TriangleReader {
    /// Open `path` as `file_type`, detecting the STL encoding
    pub fn open(path: &Path, file_type: FileType) -> Result<Self> {
        match file_type {
            FileType::Stl => Self::open_stl(path),
            FileType::Obj => Ok(TriangleReader::Obj(ObjReader::open(path)?)),
            other => Err(Error::NotStreamable(other)),
        }
    }

    fn open_stl(path: &Path) -> Result<Self> {
        let mut file = File::open(path)?;
        let size = file.metadata()?.len();

        let mut prefix = Vec::with_capacity(stl::DETECT_PREFIX_LEN);
        file.by_ref()
            .take(stl::DETECT_PREFIX_LEN as u64)
            .read_to_end(&mut prefix)?;

        // Reopen rather than seek so both readers start from byte zero
        let reader = BufReader::new(File::open(path)?);
        match stl::detect_kind(&prefix, size) {
            StlKind::Binary => Ok(TriangleReader::BinaryStl(BinaryStlReader::new(reader)?)),
            StlKind::Ascii => Ok(TriangleReader::AsciiStl(AsciiStlReader::new(reader), size)),
        }
    }

    /// Triangles the stream is expected to yield, when the format says.
    ///
    /// Binary STL reports its header count and OBJ its first-pass face count.
    /// ASCII STL projects a count from the bytes consumed so far, which
    /// sharpens as reading progresses.
    pub fn expected_total(&self) -> Option<u64> {
        match self {
            TriangleReader::BinaryStl(r) => Some(r.declared_count() as u64),
            TriangleReader::AsciiStl(r, size) => r.projected_total(*size),
            TriangleReader::Obj(r) => Some(r.expected_triangles()),
        }
    }

    pub fn bounds(&self) -> &BoundingBox {
        match self {
            TriangleReader::BinaryStl(r) => r.bounds(),
            TriangleReader::AsciiStl(r, _) => r.bounds(),
            TriangleReader::Obj(r) => r.bounds(),
        }
    }

    /// Whether a text reader stopped at its line cap
    pub fn cap_reached(&self) -> bool {
        match self {
            TriangleReader::BinaryStl(_) => false,
            TriangleReader::AsciiStl(r, _) => r.cap_reached(),
            TriangleReader::Obj(r) => r.cap_reached(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            TriangleReader::BinaryStl(_) => "binary_stl",
            TriangleReader::AsciiStl(..) => "ascii_stl",
            TriangleReader::Obj(_) => "obj",
        }
    }
}

impl Iterator for TriangleReader {
    type Item = Result<Triangle>;

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        match self {
            TriangleReader::BinaryStl(r) => r.next(),
            TriangleReader::AsciiStl(r, _) => r.next(),
            TriangleReader::Obj(r) => r.next(),
        }
    }
}

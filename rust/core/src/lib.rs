// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! # MeshQuote Core
//!
//! Streaming readers for 3D printing model formats and the geometry
//! primitives needed to measure them.
//!
//! ## Overview
//!
//! - **Binary/ASCII STL**: record-at-a-time iterators with encoding detection
//!   that is not fooled by binary files whose header starts with `solid`
//! - **OBJ**: explicit two-pass reading (vertex table, then faces) with fan
//!   triangulation and relative indices
//! - **3MF**: model part extraction, mesh object outline and a triangle visitor
//! - **G-code**: toolpath extent, layers, filament and slicer time in one scan
//!
//! None of the readers hold more than the current record (plus the OBJ
//! vertex table) in memory.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use meshquote_core::{FileType, TriangleReader};
//!
//! let mut area = 0.0;
//! let mut reader = TriangleReader::open(path, FileType::Stl)?;
//! for tri in reader.by_ref() {
//!     area += tri?.area();
//! }
//! println!("area {area}, bounds {:?}", reader.bounds());
//! ```
//!
//! ## Feature Flags
//!
//! - `serde`: Enable serialization support for bounds, formats and summaries

pub mod error;
pub mod fast_parse;
pub mod format;
pub mod gcode;
pub mod geometry;
pub mod obj;
pub mod reader;
pub mod stl;
pub mod threemf;

pub use nalgebra::{Point3, Vector3};

pub use error::{Error, Result};
pub use format::FileType;
pub use gcode::GcodeSummary;
pub use geometry::{signed_volume, triangle_area, BoundingBox, Triangle, Vertex};
pub use obj::{scan_vertices, ObjReader, ObjVertexTable};
pub use reader::TriangleReader;
pub use stl::{detect_kind, AsciiStlReader, BinaryStlReader, StlKind};
pub use threemf::{MeshObject, MeshStats, ModelOutline};

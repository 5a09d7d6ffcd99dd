// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! 3MF model access
//!
//! A 3MF file is a ZIP container whose model part is XML. Triangles are not
//! stored sequentially in a way that allows cheap batching, so this module
//! offers two things: a visitor over every mesh triangle of a model document,
//! and an outline of the `<object>` elements (with byte spans) that lets
//! callers cut the document into smaller, self-contained pieces.

use std::fs::File;
use std::io::{BufReader, Read};
use std::ops::Range;
use std::path::Path;

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use zip::ZipArchive;

use crate::error::{Error, Result};
use crate::geometry::{BoundingBox, Triangle, Vertex};

/// Core namespace used when a model does not declare one
pub const CORE_NAMESPACE: &str = "http://schemas.microsoft.com/3dmanufacturing/core/2015/02";

/// Conventional location of the model part inside the archive
pub const MODEL_PART: &str = "3D/3dmodel.model";

/// Read the model XML part from a 3MF archive
pub fn read_model_xml(path: &Path) -> Result<String> {
    let mut archive = ZipArchive::new(BufReader::new(File::open(path)?))?;

    let name = match archive.index_for_name(MODEL_PART) {
        Some(_) => MODEL_PART.to_string(),
        None => find_model_part(archive.file_names())
            .ok_or_else(|| Error::Archive("no model part found in 3MF archive".into()))?,
    };

    let mut entry = archive.by_name(&name)?;
    let mut xml = String::with_capacity(entry.size() as usize);
    entry.read_to_string(&mut xml)?;
    Ok(xml)
}

/// Pick the model part among archive entries, preferring `3dmodel.model`
fn find_model_part<'a>(names: impl Iterator<Item = &'a str>) -> Option<String> {
    let mut fallback = None;
    for name in names {
        let lower = name.to_ascii_lowercase();
        if lower.ends_with("3dmodel.model") {
            return Some(name.to_string());
        }
        if lower.ends_with(".model") && fallback.is_none() {
            fallback = Some(name.to_string());
        }
    }
    fallback
}

/// An `<object>` element that carries a mesh
#[derive(Debug, Clone, PartialEq)]
pub struct MeshObject {
    pub id: Option<String>,
    /// Byte range of the whole element within the document
    pub span: Range<usize>,
    pub vertices: usize,
    pub triangles: usize,
}

/// Top-level structure of a model document
#[derive(Debug, Clone, Default)]
pub struct ModelOutline {
    pub namespace: Option<String>,
    pub unit: Option<String>,
    pub objects: Vec<MeshObject>,
}

impl ModelOutline {
    /// Declared namespace, or the core namespace
    pub fn namespace_or_default(&self) -> &str {
        self.namespace.as_deref().unwrap_or(CORE_NAMESPACE)
    }

    pub fn total_triangles(&self) -> usize {
        self.objects.iter().map(|o| o.triangles).sum()
    }
}

/// Totals reported by [`visit_triangles`]
#[derive(Debug, Clone, Default)]
pub struct MeshStats {
    pub objects: usize,
    pub vertices: usize,
    pub triangles: usize,
    /// Triangles referencing vertices outside their mesh
    pub skipped: usize,
    pub bounds: BoundingBox,
}

fn attr_value(e: &BytesStart<'_>, name: &[u8]) -> Result<Option<String>> {
    for attr in e.attributes() {
        let attr = attr.map_err(|err| Error::Xml(err.to_string()))?;
        if attr.key.local_name().as_ref() == name {
            return Ok(Some(attr.unescape_value()?.into_owned()));
        }
    }
    Ok(None)
}

fn attr_f64(e: &BytesStart<'_>, name: &[u8]) -> Result<f64> {
    let raw = attr_value(e, name)?
        .ok_or_else(|| Error::invalid(format!("vertex without {} attribute", name[0] as char)))?;
    fast_float::parse(raw.trim())
        .map_err(|_| Error::invalid(format!("bad vertex coordinate: {raw}")))
}

fn attr_index(e: &BytesStart<'_>, name: &[u8]) -> Result<Option<usize>> {
    Ok(attr_value(e, name)?.and_then(|v| v.trim().parse().ok()))
}

/// Scan the document structure without materializing any geometry
pub fn outline(xml: &str) -> Result<ModelOutline> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut outline = ModelOutline::default();
    let mut current: Option<MeshObject> = None;
    let mut has_mesh = false;

    loop {
        let before = reader.buffer_position() as usize;
        match reader.read_event()? {
            Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == b"model" => {
                for attr in e.attributes() {
                    let attr = attr.map_err(|err| Error::Xml(err.to_string()))?;
                    match attr.key.as_ref() {
                        b"xmlns" => outline.namespace = Some(attr.unescape_value()?.into_owned()),
                        b"unit" => outline.unit = Some(attr.unescape_value()?.into_owned()),
                        _ => {}
                    }
                }
            }
            Event::Start(e) if e.local_name().as_ref() == b"object" => {
                // Start the span at the tag itself, not at preceding whitespace
                let start = xml[before..].find('<').map_or(before, |off| before + off);
                current = Some(MeshObject {
                    id: attr_value(&e, b"id")?,
                    span: start..start,
                    vertices: 0,
                    triangles: 0,
                });
                has_mesh = false;
            }
            Event::Start(e) if e.local_name().as_ref() == b"mesh" => has_mesh = true,
            Event::Start(e) | Event::Empty(e) => {
                if let Some(obj) = current.as_mut() {
                    match e.local_name().as_ref() {
                        b"vertex" => obj.vertices += 1,
                        b"triangle" => obj.triangles += 1,
                        _ => {}
                    }
                }
            }
            Event::End(e) if e.local_name().as_ref() == b"object" => {
                if let Some(mut obj) = current.take() {
                    obj.span.end = reader.buffer_position() as usize;
                    if has_mesh {
                        outline.objects.push(obj);
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(outline)
}

/// Call `f` for every triangle of every mesh in the document.
///
/// Vertex indices are local to their mesh. Triangles with out-of-range
/// indices are counted as skipped.
pub fn visit_triangles<F>(xml: &str, mut f: F) -> Result<MeshStats>
where
    F: FnMut(&Triangle),
{
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut stats = MeshStats::default();
    let mut vertices: Vec<Vertex> = Vec::new();
    let mut in_mesh = false;

    loop {
        match reader.read_event()? {
            Event::Start(e) if e.local_name().as_ref() == b"mesh" => {
                in_mesh = true;
                vertices.clear();
                stats.objects += 1;
            }
            Event::End(e) if e.local_name().as_ref() == b"mesh" => {
                in_mesh = false;
                vertices.clear();
            }
            Event::Start(e) | Event::Empty(e) if in_mesh => match e.local_name().as_ref() {
                b"vertex" => {
                    let v = Vertex::new(attr_f64(&e, b"x")?, attr_f64(&e, b"y")?, attr_f64(&e, b"z")?);
                    vertices.push(v);
                    stats.vertices += 1;
                }
                b"triangle" => {
                    let idx = [
                        attr_index(&e, b"v1")?,
                        attr_index(&e, b"v2")?,
                        attr_index(&e, b"v3")?,
                    ];
                    match idx {
                        [Some(a), Some(b), Some(c)]
                            if a < vertices.len() && b < vertices.len() && c < vertices.len() =>
                        {
                            let tri = Triangle::new(vertices[a], vertices[b], vertices[c]);
                            stats.bounds.extend_triangle(&tri);
                            stats.triangles += 1;
                            f(&tri);
                        }
                        _ => stats.skipped += 1,
                    }
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(stats)
}

// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Supported model formats

use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// Size of the binary STL header plus triangle count
pub const STL_HEADER_LEN: u64 = 84;

/// Bytes per binary STL triangle record
pub const STL_RECORD_LEN: u64 = 50;

/// Model file formats understood by the readers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum FileType {
    Stl,
    Obj,
    #[cfg_attr(feature = "serde", serde(rename = "3mf"))]
    ThreeMf,
    Gcode,
}

impl FileType {
    pub const ALL: [FileType; 4] = [FileType::Stl, FileType::Obj, FileType::ThreeMf, FileType::Gcode];

    /// Resolve the format from a file extension (case-insensitive)
    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|ext| ext.to_str())
            .and_then(|ext| ext.parse().ok())
    }

    /// Canonical extension, without the dot
    pub fn extension(&self) -> &'static str {
        match self {
            FileType::Stl => "stl",
            FileType::Obj => "obj",
            FileType::ThreeMf => "3mf",
            FileType::Gcode => "gcode",
        }
    }

    /// Rough bytes per triangle used for size-based estimates
    pub fn bytes_per_triangle(&self) -> u64 {
        match self {
            FileType::Stl => STL_RECORD_LEN,
            FileType::Obj => 100,
            FileType::ThreeMf => 200,
            FileType::Gcode => 500,
        }
    }

    /// Estimated triangle count from the file size. Never exact.
    pub fn estimate_triangles(&self, file_size: u64) -> u64 {
        match self {
            FileType::Stl => file_size.saturating_sub(STL_HEADER_LEN) / STL_RECORD_LEN,
            other => file_size / other.bytes_per_triangle(),
        }
    }

    /// Whether triangles can be read sequentially in batches
    pub fn supports_streaming(&self) -> bool {
        matches!(self, FileType::Stl | FileType::Obj)
    }
}

impl fmt::Display for FileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for FileType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "stl" => Ok(FileType::Stl),
            "obj" => Ok(FileType::Obj),
            "3mf" => Ok(FileType::ThreeMf),
            "gcode" => Ok(FileType::Gcode),
            other => Err(format!("unsupported model extension: {other}")),
        }
    }
}

// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! G-code scanning
//!
//! Sliced G-code has no triangles. What can be recovered cheaply is the
//! extent of the toolpath, the layer structure and whatever the slicer wrote
//! into its comments (filament length, print time).

use std::io::{BufRead, ErrorKind};
use std::sync::LazyLock;

use regex::Regex;

use crate::error::Result;
use crate::fast_parse::{gcode_word, trim_end, trim_start};
use crate::geometry::BoundingBox;

/// Line cap for G-code scans
pub const GCODE_LINE_CAP: u64 = 1_000_000;

static CURA_TIME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^;TIME:(\d+)").expect("Invalid Cura time regex"));

static PRUSA_TIME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^;\s*estimated printing time[^=]*=\s*(?:(\d+)d\s*)?(?:(\d+)h\s*)?(?:(\d+)m\s*)?(?:(\d+)s)?")
        .expect("Invalid estimated time regex")
});

static BUILD_TIME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^;\s*build time:\s*(\d+)\s*hours?\s*(\d+)\s*minutes?")
        .expect("Invalid build time regex")
});

static FILAMENT_MM: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^;\s*filament used \[mm\]\s*=\s*([\d.]+)").expect("Invalid filament regex")
});

static FILAMENT_M: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^;\s*Filament used:\s*([\d.]+)\s*m\b").expect("Invalid filament regex")
});

static LAYER_MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^;(?:LAYER:\s*(-?\d+)|\s*layer\s+(\d+)\s*,)").expect("Invalid layer regex")
});

static LAYER_COUNT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^;LAYER_COUNT:\s*(\d+)").expect("Invalid layer count regex"));

/// What a single pass over a G-code file revealed
#[derive(Debug, Clone, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct GcodeSummary {
    /// Extent of all G0/G1 moves
    pub bounds: BoundingBox,
    /// Layers, from slicer markers when present, otherwise from Z increases
    pub layer_count: u64,
    pub first_layer_height: Option<f64>,
    pub filament_mm: Option<f64>,
    pub print_time_secs: Option<u64>,
    pub moves: u64,
    pub lines_read: u64,
    pub cap_reached: bool,
}

#[derive(Default)]
struct ScanState {
    pos: [f64; 3],
    relative: bool,
    marker_layers: u64,
    declared_layers: Option<u64>,
    z_layers: u64,
    last_z: Option<f64>,
}

impl GcodeSummary {
    /// Scan G-code text from any buffered reader
    pub fn scan<R: BufRead>(mut reader: R, line_cap: u64) -> Result<Self> {
        let mut summary = GcodeSummary::default();
        let mut state = ScanState::default();
        let mut buf = Vec::with_capacity(128);

        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf) {
                Ok(0) => break,
                Ok(_) => {}
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
            if summary.lines_read >= line_cap {
                summary.cap_reached = true;
                break;
            }
            summary.lines_read += 1;
            summary.scan_line(trim_end(trim_start(&buf)), &mut state);
        }

        summary.layer_count = match (state.declared_layers, state.marker_layers) {
            (Some(declared), _) => declared,
            (None, 0) => state.z_layers,
            (None, markers) => markers,
        };
        Ok(summary)
    }

    /// Scan an in-memory G-code document
    pub fn from_text(text: &str) -> Self {
        // Reading from a slice cannot fail
        Self::scan(text.as_bytes(), u64::MAX).unwrap_or_default()
    }

    fn scan_line(&mut self, line: &[u8], state: &mut ScanState) {
        if line.first() == Some(&b';') {
            self.scan_comment(&String::from_utf8_lossy(line), state);
            return;
        }

        // Drop trailing comments
        let code = match memchr::memchr(b';', line) {
            Some(i) => &line[..i],
            None => line,
        };
        if code.len() < 2 || !code[0].eq_ignore_ascii_case(&b'G') {
            return;
        }

        let command = code
            .split(|b| b.is_ascii_whitespace())
            .next()
            .unwrap_or_default()
            .to_ascii_uppercase();
        match command.as_slice() {
            b"G90" => state.relative = false,
            b"G91" => state.relative = true,
            b"G0" | b"G1" | b"G00" | b"G01" => self.apply_move(code, state),
            _ => {}
        }
    }

    fn apply_move(&mut self, code: &[u8], state: &mut ScanState) {
        let mut moved = false;
        for (axis, letter) in [b'X', b'Y', b'Z'].into_iter().enumerate() {
            if let Some(v) = gcode_word(code, letter) {
                state.pos[axis] = if state.relative { state.pos[axis] + v } else { v };
                moved = true;
            }
        }
        if !moved {
            return;
        }

        self.moves += 1;
        self.bounds.extend_xyz(state.pos[0], state.pos[1], state.pos[2]);

        let z = state.pos[2];
        if z > state.last_z.unwrap_or(0.0) + 1e-6 {
            if self.first_layer_height.is_none() && z > 0.0 {
                self.first_layer_height = Some(z);
            }
            state.z_layers += 1;
            state.last_z = Some(z);
        }
    }

    fn scan_comment(&mut self, line: &str, state: &mut ScanState) {
        if let Some(c) = LAYER_MARKER.captures(line) {
            if c.get(1).or_else(|| c.get(2)).is_some() {
                state.marker_layers += 1;
            }
            return;
        }
        if let Some(c) = LAYER_COUNT.captures(line) {
            state.declared_layers = c[1].parse().ok();
            return;
        }
        if self.print_time_secs.is_none() {
            if let Some(secs) = parse_print_time(line) {
                self.print_time_secs = Some(secs);
                return;
            }
        }
        if let Some(c) = FILAMENT_MM.captures(line) {
            self.filament_mm = c[1].parse().ok();
        } else if let Some(c) = FILAMENT_M.captures(line) {
            self.filament_mm = c[1].parse::<f64>().ok().map(|m| m * 1000.0);
        }
    }

    /// Volume of the toolpath extent
    pub fn bounding_volume(&self) -> f64 {
        self.bounds.volume()
    }
}

/// Slicer print time from a comment line, in seconds
pub fn parse_print_time(line: &str) -> Option<u64> {
    let num = |m: Option<regex::Match<'_>>| -> u64 {
        m.and_then(|m| m.as_str().parse().ok()).unwrap_or(0)
    };

    if let Some(c) = CURA_TIME.captures(line) {
        return c[1].parse().ok();
    }
    if let Some(c) = PRUSA_TIME.captures(line) {
        let secs = num(c.get(1)) * 86_400 + num(c.get(2)) * 3600 + num(c.get(3)) * 60 + num(c.get(4));
        return (secs > 0).then_some(secs);
    }
    if let Some(c) = BUILD_TIME.captures(line) {
        return Some(num(c.get(1)) * 3600 + num(c.get(2)) * 60);
    }
    None
}

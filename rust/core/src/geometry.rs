// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Triangle primitives and running bounds

use nalgebra::{Point3, Vector3};

/// Model-space vertex
pub type Vertex = Point3<f64>;

/// Area of the triangle `(v1, v2, v3)`.
///
/// Half the magnitude of `(v2 - v1) x (v3 - v1)`. Collinear input yields ~0.
#[inline]
pub fn triangle_area(v1: &Vertex, v2: &Vertex, v3: &Vertex) -> f64 {
    (v2 - v1).cross(&(v3 - v1)).norm() * 0.5
}

/// Signed volume of the tetrahedron spanned by the origin and `(v1, v2, v3)`.
///
/// Summed over a closed, outward-wound mesh this is the enclosed volume.
/// For open or inconsistently wound meshes the sum is only an approximation,
/// so callers take `abs()` of the total.
#[inline]
pub fn signed_volume(v1: &Vertex, v2: &Vertex, v3: &Vertex) -> f64 {
    v1.coords.dot(&v2.coords.cross(&v3.coords)) / 6.0
}

/// A single triangle read from a model file
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Triangle {
    pub vertices: [Vertex; 3],
}

impl Triangle {
    #[inline]
    pub fn new(v1: Vertex, v2: Vertex, v3: Vertex) -> Self {
        Self {
            vertices: [v1, v2, v3],
        }
    }

    /// Build a triangle from nine raw coordinates
    #[inline]
    pub fn from_coords(c: [f64; 9]) -> Self {
        Self::new(
            Vertex::new(c[0], c[1], c[2]),
            Vertex::new(c[3], c[4], c[5]),
            Vertex::new(c[6], c[7], c[8]),
        )
    }

    #[inline]
    pub fn area(&self) -> f64 {
        let [a, b, c] = &self.vertices;
        triangle_area(a, b, c)
    }

    #[inline]
    pub fn signed_volume(&self) -> f64 {
        let [a, b, c] = &self.vertices;
        signed_volume(a, b, c)
    }

    /// Unit normal following the right-hand rule, `None` for degenerate triangles
    pub fn normal(&self) -> Option<Vector3<f64>> {
        let [a, b, c] = &self.vertices;
        let n = (b - a).cross(&(c - a));
        let len = n.norm();
        if len > f64::EPSILON {
            Some(n / len)
        } else {
            None
        }
    }
}

/// Axis-aligned bounds grown one point at a time
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BoundingBox {
    pub min: [f64; 3],
    pub max: [f64; 3],
}

impl Default for BoundingBox {
    fn default() -> Self {
        Self::empty()
    }
}

impl BoundingBox {
    /// Bounds containing nothing; the first `extend` sets both corners
    pub const fn empty() -> Self {
        Self {
            min: [f64::INFINITY; 3],
            max: [f64::NEG_INFINITY; 3],
        }
    }

    /// Bounds centred on the origin with the given extents
    pub fn centered(width: f64, height: f64, depth: f64) -> Self {
        let half = [width.abs() * 0.5, height.abs() * 0.5, depth.abs() * 0.5];
        Self {
            min: [-half[0], -half[1], -half[2]],
            max: half,
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        (0..3).any(|i| self.min[i] > self.max[i])
    }

    #[inline]
    pub fn extend(&mut self, p: &Vertex) {
        self.extend_xyz(p.x, p.y, p.z);
    }

    #[inline]
    pub fn extend_xyz(&mut self, x: f64, y: f64, z: f64) {
        for (i, v) in [x, y, z].into_iter().enumerate() {
            if v < self.min[i] {
                self.min[i] = v;
            }
            if v > self.max[i] {
                self.max[i] = v;
            }
        }
    }

    #[inline]
    pub fn extend_triangle(&mut self, tri: &Triangle) {
        for v in &tri.vertices {
            self.extend(v);
        }
    }

    pub fn merge(&mut self, other: &BoundingBox) {
        if other.is_empty() {
            return;
        }
        self.extend_xyz(other.min[0], other.min[1], other.min[2]);
        self.extend_xyz(other.max[0], other.max[1], other.max[2]);
    }

    /// Width, height and depth; zero when empty
    pub fn dimensions(&self) -> [f64; 3] {
        if self.is_empty() {
            return [0.0; 3];
        }
        [
            self.max[0] - self.min[0],
            self.max[1] - self.min[1],
            self.max[2] - self.min[2],
        ]
    }

    pub fn volume(&self) -> f64 {
        let [w, h, d] = self.dimensions();
        w * h * d
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn unit_cube() -> Vec<Triangle> {
        let p = |x: f64, y: f64, z: f64| Vertex::new(x, y, z);
        let v = [
            p(0.0, 0.0, 0.0),
            p(1.0, 0.0, 0.0),
            p(1.0, 1.0, 0.0),
            p(0.0, 1.0, 0.0),
            p(0.0, 0.0, 1.0),
            p(1.0, 0.0, 1.0),
            p(1.0, 1.0, 1.0),
            p(0.0, 1.0, 1.0),
        ];
        // Outward winding
        let faces = [
            [0, 2, 1], [0, 3, 2], // bottom
            [4, 5, 6], [4, 6, 7], // top
            [0, 1, 5], [0, 5, 4], // front
            [2, 3, 7], [2, 7, 6], // back
            [1, 2, 6], [1, 6, 5], // right
            [0, 4, 7], [0, 7, 3], // left
        ];
        faces
            .iter()
            .map(|f| Triangle::new(v[f[0]], v[f[1]], v[f[2]]))
            .collect()
    }

    #[test]
    fn test_unit_cube_area_and_volume() {
        let cube = unit_cube();
        let area: f64 = cube.iter().map(Triangle::area).sum();
        let volume: f64 = cube.iter().map(Triangle::signed_volume).sum();

        assert_relative_eq!(area, 6.0, epsilon = 1e-12);
        assert_relative_eq!(volume.abs(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_degenerate_triangle() {
        let a = Vertex::new(0.0, 0.0, 0.0);
        let b = Vertex::new(1.0, 1.0, 1.0);
        let c = Vertex::new(2.0, 2.0, 2.0);
        let tri = Triangle::new(a, b, c);

        assert!(tri.area().abs() < 1e-12);
        assert!(tri.normal().is_none());
    }

    #[test]
    fn test_bounding_box() {
        let mut bbox = BoundingBox::empty();
        assert!(bbox.is_empty());
        assert_eq!(bbox.dimensions(), [0.0; 3]);

        for tri in unit_cube() {
            bbox.extend_triangle(&tri);
        }
        assert!(!bbox.is_empty());
        assert_eq!(bbox.dimensions(), [1.0, 1.0, 1.0]);

        let mut other = BoundingBox::centered(4.0, 2.0, 2.0);
        other.merge(&bbox);
        assert_eq!(other.min, [-2.0, -1.0, -1.0]);
        assert_eq!(other.max, [2.0, 1.0, 1.0]);
        assert_relative_eq!(other.volume(), 16.0);
    }
}

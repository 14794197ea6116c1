// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Mesh data structures

use nalgebra::{Matrix4, Point3, Vector3};

/// Triangle mesh
#[derive(Debug, Clone, PartialEq)]
pub struct Mesh {
    /// Vertex positions (x, y, z)
    pub positions: Vec<f32>,
    /// Vertex normals (nx, ny, nz), empty when the mesh carries no normals
    pub normals: Vec<f32>,
    /// Triangle indices (i0, i1, i2)
    pub indices: Vec<u32>,
}

impl Mesh {
    /// Build a mesh from already flattened buffers
    pub fn from_buffers(positions: Vec<f32>, normals: Vec<f32>, indices: Vec<u32>) -> Self {
        Self {
            positions,
            normals,
            indices,
        }
    }

    /// Get vertex count
    #[inline]
    pub fn vertex_count(&self) -> usize {
        self.positions.len() / 3
    }

    /// Get triangle count
    #[inline]
    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    /// Check if mesh is empty
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Check if the mesh carries one normal per vertex
    #[inline]
    pub fn has_normals(&self) -> bool {
        !self.normals.is_empty() && self.normals.len() == self.positions.len()
    }

    /// Calculate bounds (min, max) - optimized with chunk iteration
    #[inline]
    pub fn bounds(&self) -> (Point3<f32>, Point3<f32>) {
        if self.is_empty() {
            return (Point3::origin(), Point3::origin());
        }

        let mut min = Point3::new(f32::MAX, f32::MAX, f32::MAX);
        let mut max = Point3::new(f32::MIN, f32::MIN, f32::MIN);

        self.positions.chunks_exact(3).for_each(|chunk| {
            let (x, y, z) = (chunk[0], chunk[1], chunk[2]);
            min.x = min.x.min(x);
            min.y = min.y.min(y);
            min.z = min.z.min(z);
            max.x = max.x.max(x);
            max.y = max.y.max(y);
            max.z = max.z.max(z);
        });

        (min, max)
    }

    /// Bounds of the mesh after applying `transform` to every vertex.
    ///
    /// Returns `None` for an empty mesh so callers can fold several meshes
    /// without an origin point polluting the result.
    pub fn transformed_bounds(&self, transform: &Matrix4<f64>) -> Option<(Point3<f64>, Point3<f64>)> {
        if self.is_empty() {
            return None;
        }

        let mut min = Point3::new(f64::MAX, f64::MAX, f64::MAX);
        let mut max = Point3::new(f64::MIN, f64::MIN, f64::MIN);

        for chunk in self.positions.chunks_exact(3) {
            let p = transform.transform_point(&Point3::new(
                chunk[0] as f64,
                chunk[1] as f64,
                chunk[2] as f64,
            ));
            min = min.inf(&p);
            max = max.sup(&p);
        }

        Some((min, max))
    }
}

/// Unit face normal of the triangle `(a, b, c)` with counter-clockwise winding.
///
/// Degenerate triangles yield the zero vector.
#[inline]
pub fn face_normal(a: Point3<f64>, b: Point3<f64>, c: Point3<f64>) -> Vector3<f64> {
    let n = (b - a).cross(&(c - a));
    let len = n.norm();
    if len > 0.0 {
        n / len
    } else {
        Vector3::zeros()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_mesh_creation() {
        let mesh = Mesh::from_buffers(Vec::new(), Vec::new(), Vec::new());
        assert!(mesh.is_empty());
        assert!(!mesh.has_normals());
        assert_eq!(mesh.vertex_count(), 0);
        assert_eq!(mesh.triangle_count(), 0);
    }

    #[test]
    fn test_transformed_bounds() {
        let mesh = Mesh::from_buffers(
            vec![0.0, 0.0, 0.0, 1.0, 2.0, 3.0],
            Vec::new(),
            vec![],
        );
        let transform = Matrix4::new_translation(&Vector3::new(10.0, 0.0, -1.0))
            * Matrix4::new_scaling(2.0);

        let (min, max) = mesh.transformed_bounds(&transform).unwrap();
        assert_relative_eq!(min, Point3::new(10.0, 0.0, -1.0));
        assert_relative_eq!(max, Point3::new(12.0, 4.0, 5.0));
        let empty = Mesh::from_buffers(Vec::new(), Vec::new(), Vec::new());
        assert!(empty.transformed_bounds(&transform).is_none());
        assert!(!mesh.has_normals());
    }

    #[test]
    fn test_face_normal() {
        let n = face_normal(
            Point3::origin(),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(0.0, 1.0, 0.0),
        );
        assert_relative_eq!(n, Vector3::z());

        let degenerate = face_normal(Point3::origin(), Point3::origin(), Point3::origin());
        assert_eq!(degenerate, Vector3::zeros());
    }
}

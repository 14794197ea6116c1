// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Shared model table.
//!
//! One [`ModelEntry`] per resource id, however many instances use it. The
//! entry is created unloaded on first claim; `root` is filled in by the
//! loader, after which the bounding box and the normalization transform are
//! computed on demand and memoized.

use crate::keys::ModelKey;
use crate::texture::TextureImage;
use nalgebra::{Matrix4, Point3, Vector3};
use rustc_hash::FxHashMap;
use slotmap::SlotMap;
use std::rc::Rc;
use vizkit_geometry::Mesh;

/// Surface description of a mesh node.
#[derive(Debug, Clone, PartialEq)]
pub struct Material {
    pub name: Option<String>,
    /// Base color factor (RGBA, 0..=1).
    pub color: [f32; 4],
    /// Base color texture embedded in the model file.
    pub texture: Option<Rc<TextureImage>>,
    pub double_sided: bool,
}

impl Default for Material {
    fn default() -> Self {
        Self {
            name: None,
            color: [1.0, 1.0, 1.0, 1.0],
            texture: None,
            double_sided: false,
        }
    }
}

/// A drawable part of a flattened model.
#[derive(Debug, Clone)]
pub struct MeshNode {
    pub name: Option<String>,
    /// Shared between the model and every draw object built from it.
    pub geometry: Rc<Mesh>,
    pub material: Material,
    /// Node transform relative to the model origin, hierarchy baked in.
    pub matrix: Matrix4<f64>,
}

/// Axis-aligned bounding box.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub min: Point3<f64>,
    pub max: Point3<f64>,
}

impl Aabb {
    pub fn new(min: Point3<f64>, max: Point3<f64>) -> Self {
        Self { min, max }
    }

    #[inline]
    pub fn center(&self) -> Point3<f64> {
        nalgebra::center(&self.min, &self.max)
    }

    #[inline]
    pub fn size(&self) -> Vector3<f64> {
        self.max - self.min
    }

    #[inline]
    pub fn max_extent(&self) -> f64 {
        self.size().max()
    }

    pub fn union(&self, other: &Aabb) -> Aabb {
        Aabb::new(self.min.inf(&other.min), self.max.sup(&other.max))
    }
}

/// Transform that centers a model at the origin and scales it to a cube.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Normalization {
    pub bbox: Aabb,
    pub world_matrix: Matrix4<f64>,
}

impl Normalization {
    /// Fit `bbox` into a cube of edge `size` centered at the origin.
    /// A flat or empty box is only centered.
    pub fn fit(bbox: Aabb, size: f64) -> Self {
        let extent = bbox.max_extent();
        let scale = if extent > f64::EPSILON { size / extent } else { 1.0 };
        let world_matrix = Matrix4::new_scaling(scale)
            * Matrix4::new_translation(&-bbox.center().coords);
        Self { bbox, world_matrix }
    }
}

/// Bounding box of `nodes` with their node transforms applied.
pub fn nodes_bounds(nodes: &[MeshNode]) -> Option<Aabb> {
    nodes
        .iter()
        .filter_map(|node| node.geometry.transformed_bounds(&node.matrix))
        .map(|(min, max)| Aabb::new(min, max))
        .reduce(|a, b| a.union(&b))
}

/// A shared, ref-counted model.
#[derive(Debug)]
pub struct ModelEntry {
    pub resource_id: String,
    root: Option<Vec<MeshNode>>,
    bbox: Option<Aabb>,
    normalized: Option<Normalization>,
    ref_count: usize,
}

impl ModelEntry {
    fn new(resource_id: String) -> Self {
        Self {
            resource_id,
            root: None,
            bbox: None,
            normalized: None,
            ref_count: 0,
        }
    }

    #[inline]
    pub fn is_loaded(&self) -> bool {
        self.root.is_some()
    }

    pub fn root(&self) -> Option<&[MeshNode]> {
        self.root.as_deref()
    }

    pub fn ref_count(&self) -> usize {
        self.ref_count
    }

    pub(crate) fn set_root(&mut self, nodes: Vec<MeshNode>) {
        self.root = Some(nodes);
        self.bbox = None;
        self.normalized = None;
    }

    /// Bounding box of the loaded model, computed once.
    pub fn bbox(&mut self) -> Option<Aabb> {
        if self.bbox.is_none() {
            self.bbox = nodes_bounds(self.root.as_deref()?);
        }
        self.bbox
    }

    /// Normalization transform of the loaded model, computed once.
    pub fn normalized(&mut self, size: f64) -> Option<Normalization> {
        if self.normalized.is_none() {
            let bbox = self.bbox()?;
            self.normalized = Some(Normalization::fit(bbox, size));
        }
        self.normalized
    }
}

/// Model entries with a resource-id index.
#[derive(Debug, Default)]
pub struct ModelTable {
    models: SlotMap<ModelKey, ModelEntry>,
    by_resource: FxHashMap<String, ModelKey>,
}

impl ModelTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take a counted claim on the model for `resource_id`, creating an
    /// unloaded entry the first time.
    pub fn acquire(&mut self, resource_id: &str) -> ModelKey {
        let key = match self.by_resource.get(resource_id) {
            Some(&key) => key,
            None => {
                let key = self.models.insert(ModelEntry::new(resource_id.to_string()));
                self.by_resource.insert(resource_id.to_string(), key);
                key
            }
        };
        if let Some(entry) = self.models.get_mut(key) {
            entry.ref_count += 1;
        }
        key
    }

    /// Drop one claim. Returns the remaining count, or `None` for a stale key.
    pub fn release(&mut self, key: ModelKey) -> Option<usize> {
        let entry = self.models.get_mut(key)?;
        if entry.ref_count == 0 {
            tracing::error!(model_id = %entry.resource_id, "model released more often than acquired");
            return Some(0);
        }
        entry.ref_count -= 1;
        Some(entry.ref_count)
    }

    pub fn key_of(&self, resource_id: &str) -> Option<ModelKey> {
        self.by_resource.get(resource_id).copied()
    }

    pub fn contains(&self, resource_id: &str) -> bool {
        self.by_resource.contains_key(resource_id)
    }

    pub fn get(&self, key: ModelKey) -> Option<&ModelEntry> {
        self.models.get(key)
    }

    pub fn get_mut(&mut self, key: ModelKey) -> Option<&mut ModelEntry> {
        self.models.get_mut(key)
    }

    pub fn remove(&mut self, key: ModelKey) -> Option<ModelEntry> {
        let entry = self.models.remove(key)?;
        self.by_resource.remove(&entry.resource_id);
        Some(entry)
    }

    /// Models still waiting for their scene.
    pub fn pending(&self) -> Vec<(ModelKey, String)> {
        self.models
            .iter()
            .filter(|(_, entry)| !entry.is_loaded())
            .map(|(key, entry)| (key, entry.resource_id.clone()))
            .collect()
    }

    /// Remove every model with no claims. Returns their resource ids.
    pub fn dispose_unused(&mut self) -> Vec<String> {
        let unused: Vec<ModelKey> = self
            .models
            .iter()
            .filter(|(_, entry)| entry.ref_count == 0)
            .map(|(key, _)| key)
            .collect();

        unused
            .into_iter()
            .filter_map(|key| self.remove(key))
            .map(|entry| entry.resource_id)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn cube_node(half: f32, offset: Vector3<f64>) -> MeshNode {
        let mut positions = Vec::new();
        for &x in &[-half, half] {
            for &y in &[-half, half] {
                for &z in &[-half, half] {
                    positions.extend_from_slice(&[x, y, z]);
                }
            }
        }
        MeshNode {
            name: None,
            geometry: Rc::new(Mesh::from_buffers(positions, Vec::new(), vec![0, 1, 2])),
            material: Material::default(),
            matrix: Matrix4::new_translation(&offset),
        }
    }

    #[test]
    fn test_acquire_release() {
        let mut table = ModelTable::new();
        let a = table.acquire("a.glb");
        assert_eq!(table.acquire("a.glb"), a);
        assert_eq!(table.get(a).unwrap().ref_count(), 2);
        assert_eq!(table.pending(), vec![(a, "a.glb".to_string())]);

        assert_eq!(table.release(a), Some(1));
        assert!(table.dispose_unused().is_empty());
        assert_eq!(table.release(a), Some(0));
        assert_eq!(table.dispose_unused(), vec!["a.glb".to_string()]);
        assert!(!table.contains("a.glb"));
        assert_eq!(table.release(a), None);
    }

    #[test]
    fn test_bbox_needs_root() {
        let mut table = ModelTable::new();
        let key = table.acquire("m");
        let entry = table.get_mut(key).unwrap();
        assert!(entry.bbox().is_none());
        assert!(entry.normalized(1.0).is_none());

        entry.set_root(vec![
            cube_node(1.0, Vector3::zeros()),
            cube_node(1.0, Vector3::new(4.0, 0.0, 0.0)),
        ]);
        let bbox = entry.bbox().unwrap();
        assert_relative_eq!(bbox.min, Point3::new(-1.0, -1.0, -1.0));
        assert_relative_eq!(bbox.max, Point3::new(5.0, 1.0, 1.0));
    }

    #[test]
    fn test_normalization_fits_unit_cube() {
        let bbox = Aabb::new(Point3::new(-1.0, -1.0, -1.0), Point3::new(5.0, 1.0, 1.0));
        let n = Normalization::fit(bbox, 1.0);

        let lo = n.world_matrix.transform_point(&bbox.min);
        let hi = n.world_matrix.transform_point(&bbox.max);
        assert_relative_eq!(lo, Point3::new(-0.5, -1.0 / 6.0, -1.0 / 6.0), epsilon = 1e-12);
        assert_relative_eq!(hi, Point3::new(0.5, 1.0 / 6.0, 1.0 / 6.0), epsilon = 1e-12);

        let flat = Aabb::new(Point3::new(2.0, 2.0, 2.0), Point3::new(2.0, 2.0, 2.0));
        let centered = Normalization::fit(flat, 1.0).world_matrix.transform_point(&flat.min);
        assert_relative_eq!(centered, Point3::origin());
    }
}

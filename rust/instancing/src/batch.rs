// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Meta meshes: batches of instances drawn together.

use crate::keys::{InstanceId, ModelKey};
use crate::model::Material;
use crate::texture::TextureImage;
use nalgebra::Matrix4;
use std::rc::Rc;
use vizkit_geometry::Mesh;

/// One instanced draw call: a submesh of the model, drawn once per member.
#[derive(Debug, Clone)]
pub struct InstancedDrawObject {
    pub geometry: Rc<Mesh>,
    pub material: Material,
    /// World transform of each member, in member order.
    pub transforms: Vec<Matrix4<f32>>,
}

/// Instances sharing a grouping key, plus the draw objects built for them.
#[derive(Debug)]
pub struct MetaMesh {
    pub(crate) key: String,
    pub(crate) model: ModelKey,
    pub(crate) members: Vec<InstanceId>,
    pub(crate) dirty: bool,
    pub(crate) objects: Vec<InstancedDrawObject>,
}

impl MetaMesh {
    pub(crate) fn new(key: String, model: ModelKey) -> Self {
        Self {
            key,
            model,
            members: Vec::new(),
            dirty: true,
            objects: Vec::new(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn model(&self) -> ModelKey {
        self.model
    }

    pub fn members(&self) -> &[InstanceId] {
        &self.members
    }

    /// Draw objects from the last rebuild.
    pub fn objects(&self) -> &[InstancedDrawObject] {
        &self.objects
    }

    /// Whether `objects` is out of date with `members`.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn contains(&self, id: InstanceId) -> bool {
        self.members.contains(&id)
    }

    pub(crate) fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub(crate) fn add(&mut self, id: InstanceId) {
        self.members.push(id);
        self.dirty = true;
    }

    /// Remove `id`, keeping member order. `false` if it was not a member.
    pub(crate) fn remove(&mut self, id: InstanceId) -> bool {
        match self.members.iter().position(|&m| m == id) {
            Some(index) => {
                self.members.remove(index);
                self.dirty = true;
                true
            }
            None => false,
        }
    }
}

/// Standalone copy of one instance's first submesh, for highlighting or
/// picking outside the batch.
#[derive(Debug, Clone)]
pub struct TargetObject {
    pub geometry: Rc<Mesh>,
    pub material: Material,
    pub matrix: Matrix4<f64>,
}

/// Per-instance styling applied on top of a model material.
#[derive(Debug, Clone)]
pub(crate) struct Style {
    pub color: [f32; 4],
    pub texture: Option<Rc<TextureImage>>,
}

impl Style {
    pub fn apply(&self, base: &Material) -> Material {
        Material {
            color: self.color,
            texture: self.texture.clone().or_else(|| base.texture.clone()),
            ..base.clone()
        }
    }
}

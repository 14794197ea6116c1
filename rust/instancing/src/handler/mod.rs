// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Model handler: shared models, per-instance state and batch management.
//!
//! Instance changes only touch bookkeeping and mark batches dirty; draw
//! objects are rebuilt in one pass by [`ModelHandler::update`]. Models are
//! parsed by [`ModelHandler::load_models`], which the host awaits whenever
//! new model ids may have appeared.

#[cfg(test)]
mod tests;

use crate::batch::{InstancedDrawObject, MetaMesh, Style, TargetObject};
use crate::color::{parse_color_or_white, WHITE};
use crate::config::HandlerConfig;
use crate::instance::Instance;
use crate::keys::{BatchKey, InstanceId, ModelKey, TextureKey};
use crate::loader::{flatten_scene, parse_model, ModelLoader, SceneLoader};
use crate::model::{Aabb, ModelEntry, ModelTable};
use crate::resources::{decode_resource, ResourceProvider};
use crate::texture::TextureCache;
use crate::Error;
use futures_util::future::join_all;
use nalgebra::Matrix4;
use rustc_hash::FxHashMap;
use slotmap::SlotMap;
use std::cell::RefCell;
use std::rc::Rc;
use tracing::{debug, error, info, warn};

/// Summary of one [`ModelHandler::update`] pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateStats {
    /// Dirty batches rebuilt.
    pub rebuilt: usize,
    /// Dirty batches left for later because their model is not loaded.
    pub pending: usize,
    /// Empty batches removed.
    pub pruned: usize,
    /// Models disposed because nothing references them.
    pub disposed_models: usize,
    /// Draw objects across all batches after the pass.
    pub draw_objects: usize,
}

/// Summary of one [`ModelHandler::load_models`] pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadStats {
    pub loaded: usize,
    pub failed: usize,
}

/// Handler-side record of one instance.
#[derive(Debug)]
struct InstanceData {
    /// Description last applied; `None` until the first update.
    instance: Option<Instance>,
    /// `None` when the model failed to load.
    model: Option<ModelKey>,
    texture: Option<TextureKey>,
    world: Matrix4<f64>,
    /// Final transform of each model submesh; `None` when invalidated or
    /// the model is not loaded yet.
    submesh_matrices: Option<Vec<Matrix4<f64>>>,
    key: Option<String>,
    batch: Option<BatchKey>,
}

impl InstanceData {
    fn unbound() -> Self {
        Self {
            instance: None,
            model: None,
            texture: None,
            world: Matrix4::identity(),
            submesh_matrices: None,
            key: None,
            batch: None,
        }
    }
}

/// Owns shared models and groups instances of them into batches.
///
/// Single-threaded: the texture cache is shared with the host through
/// `Rc<RefCell<_>>`.
pub struct ModelHandler {
    resources: Box<dyn ResourceProvider>,
    textures: Rc<RefCell<TextureCache>>,
    loader: Box<dyn ModelLoader>,
    config: HandlerConfig,
    root: Matrix4<f64>,
    models: ModelTable,
    instances: FxHashMap<InstanceId, InstanceData>,
    batches: SlotMap<BatchKey, MetaMesh>,
    batch_index: FxHashMap<String, Vec<BatchKey>>,
    hot: Option<InstanceId>,
}

impl ModelHandler {
    /// Create a handler reading model payloads from `resources` and sharing
    /// `textures` with the host. `root` is the transform every instance is
    /// placed under.
    pub fn new(
        resources: Box<dyn ResourceProvider>,
        textures: Rc<RefCell<TextureCache>>,
        root: Matrix4<f64>,
    ) -> Self {
        Self {
            resources,
            textures,
            loader: Box::new(SceneLoader),
            config: HandlerConfig::default(),
            root,
            models: ModelTable::new(),
            instances: FxHashMap::default(),
            batches: SlotMap::with_key(),
            batch_index: FxHashMap::default(),
            hot: None,
        }
    }

    pub fn with_loader(mut self, loader: impl ModelLoader + 'static) -> Self {
        self.loader = Box::new(loader);
        self
    }

    pub fn with_config(mut self, config: HandlerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &HandlerConfig {
        &self.config
    }

    pub fn textures(&self) -> &Rc<RefCell<TextureCache>> {
        &self.textures
    }

    /// Replace the root transform. Every instance is re-placed.
    pub fn set_root_matrix(&mut self, root: Matrix4<f64>) {
        self.root = root;
        let ids: Vec<InstanceId> = self.instances.keys().copied().collect();
        for id in ids {
            self.with_instance(id, |handler, data| {
                data.submesh_matrices = handler.submesh_matrices(data);
                handler.touch(id, data);
            });
        }
    }

    /// Start tracking `id` and apply `instance`. Returns `false` when the
    /// instance was dropped because its model cannot be resolved.
    pub fn add_instance(&mut self, id: InstanceId, instance: &Instance) -> bool {
        if self.instances.contains_key(&id) {
            warn!(instance = %id, "instance added twice, updating instead");
        } else {
            self.instances.insert(id, InstanceData::unbound());
        }
        self.update_instance(id, instance)
    }

    /// Apply a changed description to a tracked instance.
    ///
    /// Returns `false` if `id` is unknown or the instance was dropped
    /// because its model cannot be resolved.
    pub fn update_instance(&mut self, id: InstanceId, instance: &Instance) -> bool {
        let Some(mut data) = self.instances.remove(&id) else {
            warn!(instance = %id, "update of unknown instance ignored");
            return false;
        };

        let previous = data.instance.take();
        let mut changed = previous.is_none();
        let mut stale = data.submesh_matrices.is_none();

        let model_changed = previous
            .as_ref()
            .map_or(true, |p| p.model_id != instance.model_id);
        if model_changed {
            if let Some(old) = data.model.take() {
                self.models.release(old);
            }
            if !self.models.contains(&instance.model_id)
                && !self.resources.contains(&instance.model_id)
            {
                error!(instance = %id, model_id = %instance.model_id, "model resource not found, instance dropped");
                self.detach(id, &mut data);
                self.release_texture(&mut data);
                if self.hot == Some(id) {
                    self.hot = None;
                }
                return false;
            }
            data.model = Some(self.models.acquire(&instance.model_id));
            data.submesh_matrices = None;
            stale = true;
            changed = true;
        }

        if previous
            .as_ref()
            .map_or(true, |p| p.texture_id != instance.texture_id)
        {
            self.release_texture(&mut data);
            if let Some(texture_id) = &instance.texture_id {
                data.texture = self.textures.borrow_mut().acquire(texture_id);
                if data.texture.is_none() {
                    let e = Error::TextureNotFound(texture_id.clone());
                    error!(instance = %id, error = %e, "texture left unset");
                }
            }
            changed = true;
        }

        if model_changed
            || previous
                .as_ref()
                .map_or(true, |p| p.normalize != instance.normalize)
        {
            stale = true;
            changed = true;
        }

        if previous
            .as_ref()
            .map_or(true, |p| !p.same_transform(instance))
        {
            data.world = instance.world_matrix();
            stale = true;
            changed = true;
        }

        data.instance = Some(instance.clone());
        changed |= self.regroup(id, &mut data);

        if stale {
            data.submesh_matrices = self.submesh_matrices(&data);
        }
        if changed {
            self.touch(id, &mut data);
        }

        self.instances.insert(id, data);
        true
    }

    /// Stop tracking `id`, releasing its model, texture and batch slot.
    pub fn remove_instance(&mut self, id: InstanceId) -> bool {
        let Some(mut data) = self.instances.remove(&id) else {
            debug!(instance = %id, "remove of unknown instance ignored");
            return false;
        };

        self.detach(id, &mut data);
        if let Some(model) = data.model.take() {
            self.models.release(model);
        }
        self.release_texture(&mut data);
        if self.hot == Some(id) {
            self.hot = None;
        }
        true
    }

    /// Move the hover marker. Both the previous and the new hot instance
    /// are regrouped.
    pub fn update_hot_instance(&mut self, hot: Option<InstanceId>) {
        if self.hot == hot {
            return;
        }
        let previous = std::mem::replace(&mut self.hot, hot);
        for id in [previous, hot].into_iter().flatten() {
            self.with_instance(id, |handler, data| {
                if handler.regroup(id, data) {
                    handler.touch(id, data);
                }
            });
        }
    }

    pub fn hot_instance(&self) -> Option<InstanceId> {
        self.hot
    }

    /// Rebuild dirty batches, prune empty ones and dispose unused models.
    pub fn update(&mut self) -> UpdateStats {
        let mut stats = UpdateStats::default();

        let dirty: Vec<BatchKey> = self
            .batches
            .iter()
            .filter(|(_, batch)| batch.is_dirty())
            .map(|(key, _)| key)
            .collect();
        for key in dirty {
            if self.rebuild_batch(key) {
                stats.rebuilt += 1;
            } else {
                stats.pending += 1;
            }
        }

        stats.pruned = self.prune_batches();

        let disposed = self.models.dispose_unused();
        for model_id in &disposed {
            debug!(model_id = %model_id, "model disposed");
        }
        stats.disposed_models = disposed.len();
        stats.draw_objects = self.batches.values().map(|b| b.objects.len()).sum();

        debug!(
            rebuilt = stats.rebuilt,
            pending = stats.pending,
            pruned = stats.pruned,
            disposed_models = stats.disposed_models,
            "batches updated"
        );
        stats
    }

    /// Parse every model that has no scene yet.
    ///
    /// Payloads are decoded and parsed concurrently. A model that fails is
    /// logged and forgotten; its instances stay tracked but draw nothing.
    pub async fn load_models(&mut self) -> LoadStats {
        let pending = self.models.pending();
        if pending.is_empty() {
            return LoadStats::default();
        }

        let loader = self.loader.as_ref();
        let resources = self.resources.as_ref();
        let jobs = pending.into_iter().map(move |(key, model_id)| async move {
            let result = resources
                .resource(&model_id)
                .ok_or_else(|| Error::ResourceNotFound(model_id.clone()))
                .and_then(|payload| decode_resource(&model_id, payload))
                .and_then(|bytes| parse_model(loader, &bytes))
                .and_then(|(format, scene)| Ok((format, flatten_scene(scene)?)));
            (key, model_id, result)
        });
        let results = join_all(jobs).await;

        let mut stats = LoadStats::default();
        let mut loaded = Vec::new();
        for (key, model_id, result) in results {
            match result {
                Ok((format, flat)) => {
                    let Some(entry) = self.models.get_mut(key) else {
                        continue;
                    };
                    info!(
                        model_id = %model_id,
                        format = ?format,
                        nodes = flat.nodes.len(),
                        disposed_materials = flat.disposed_materials,
                        "model loaded"
                    );
                    entry.set_root(flat.nodes);
                    loaded.push(key);
                    stats.loaded += 1;
                }
                Err(e) => {
                    error!(model_id = %model_id, error = %e, "failed to load model");
                    self.models.remove(key);
                    self.break_instances(key);
                    stats.failed += 1;
                }
            }
        }

        let ids: Vec<InstanceId> = self
            .instances
            .iter()
            .filter(|(_, data)| data.model.map_or(false, |m| loaded.contains(&m)))
            .map(|(&id, _)| id)
            .collect();
        for id in ids {
            self.with_instance(id, |handler, data| {
                data.submesh_matrices = handler.submesh_matrices(data);
                handler.touch(id, data);
            });
        }

        stats
    }

    /// Standalone copy of the first submesh of `id` at its current placement
    /// and styling. `None` until the model is loaded.
    pub fn get_target(&self, id: InstanceId) -> Option<TargetObject> {
        let data = self.instances.get(&id)?;
        let node = self.models.get(data.model?)?.root()?.first()?;
        let matrix = *data.submesh_matrices.as_ref()?.first()?;
        Some(TargetObject {
            geometry: node.geometry.clone(),
            material: self.style_for(id, data).apply(&node.material),
            matrix,
        })
    }

    /// Instance drawn at `slot` of draw object `object` of `batch`.
    ///
    /// Slots follow member order, so only batches that are not dirty
    /// answer.
    pub fn hit_test(&self, batch: BatchKey, object: usize, slot: usize) -> Option<InstanceId> {
        let batch = self.batches.get(batch)?;
        if batch.is_dirty() || slot >= batch.objects.get(object)?.transforms.len() {
            return None;
        }
        batch.members.get(slot).copied()
    }

    /// Bounding box of a loaded model in its own space.
    pub fn model_bounds(&mut self, model_id: &str) -> Option<Aabb> {
        let key = self.models.key_of(model_id)?;
        self.models.get_mut(key)?.bbox()
    }

    pub fn instance_count(&self) -> usize {
        self.instances.len()
    }

    pub fn batch_count(&self) -> usize {
        self.batches.len()
    }

    pub fn model_ref_count(&self, model_id: &str) -> Option<usize> {
        let key = self.models.key_of(model_id)?;
        self.models.get(key).map(ModelEntry::ref_count)
    }

    /// Whether a model entry exists for `model_id`, loaded or not.
    pub fn has_model(&self, model_id: &str) -> bool {
        self.models.contains(model_id)
    }

    pub fn is_model_loaded(&self, model_id: &str) -> bool {
        self.models
            .key_of(model_id)
            .and_then(|key| self.models.get(key))
            .map_or(false, ModelEntry::is_loaded)
    }

    pub fn meta_meshes(&self) -> impl Iterator<Item = (BatchKey, &MetaMesh)> + '_ {
        self.batches.iter()
    }

    pub fn meta_mesh(&self, key: BatchKey) -> Option<&MetaMesh> {
        self.batches.get(key)
    }

    pub fn batch_of(&self, id: InstanceId) -> Option<BatchKey> {
        self.instances.get(&id)?.batch
    }

    /// Run `f` on the record of `id` with the record taken out of the map,
    /// so `f` can use the rest of the handler freely.
    fn with_instance(&mut self, id: InstanceId, f: impl FnOnce(&mut Self, &mut InstanceData)) {
        if let Some(mut data) = self.instances.remove(&id) {
            f(self, &mut data);
            self.instances.insert(id, data);
        }
    }

    /// Recompute the grouping key; leave the batch when it changed.
    fn regroup(&mut self, id: InstanceId, data: &mut InstanceData) -> bool {
        let Some(instance) = &data.instance else {
            return false;
        };
        let key = instance.grouping_key(self.hot == Some(id));
        if data.key.as_deref() == Some(key.as_str()) {
            return false;
        }
        self.detach(id, data);
        data.key = Some(key);
        true
    }

    /// Mark the instance's batch dirty, or place it in one.
    fn touch(&mut self, id: InstanceId, data: &mut InstanceData) {
        if let Some(key) = data.batch {
            if let Some(batch) = self.batches.get_mut(key) {
                batch.mark_dirty();
            }
            return;
        }
        if let (Some(model), Some(key)) = (data.model, data.key.clone()) {
            data.batch = Some(self.join_batch(id, model, key));
        }
    }

    fn join_batch(&mut self, id: InstanceId, model: ModelKey, key: String) -> BatchKey {
        let cap = self.config.max_batch_instances;
        let candidates = self.batch_index.entry(key.clone()).or_default();
        let open = candidates.iter().copied().find(|&candidate| {
            self.batches
                .get(candidate)
                .map_or(false, |b| b.model == model && b.len() < cap)
        });

        let batch_key = match open {
            Some(batch_key) => batch_key,
            None => {
                let batch_key = self.batches.insert(MetaMesh::new(key, model));
                candidates.push(batch_key);
                debug!(instance = %id, batches = self.batches.len(), "batch created");
                batch_key
            }
        };
        if let Some(batch) = self.batches.get_mut(batch_key) {
            batch.add(id);
        }
        batch_key
    }

    fn detach(&mut self, id: InstanceId, data: &mut InstanceData) {
        let Some(key) = data.batch.take() else {
            return;
        };
        let removed = self
            .batches
            .get_mut(key)
            .map_or(false, |batch| batch.remove(id));
        if !removed {
            error!(instance = %id, "instance missing from its batch");
        }
    }

    fn release_texture(&mut self, data: &mut InstanceData) {
        if let Some(texture) = data.texture.take() {
            self.textures.borrow_mut().release(texture);
        }
    }

    fn submesh_matrices(&mut self, data: &InstanceData) -> Option<Vec<Matrix4<f64>>> {
        compute_submesh_matrices(&mut self.models, &self.root, self.config.normalized_size, data)
    }

    /// Forget the model behind `key` on every instance bound to it.
    fn break_instances(&mut self, key: ModelKey) {
        let ids: Vec<InstanceId> = self
            .instances
            .iter()
            .filter(|(_, data)| data.model == Some(key))
            .map(|(&id, _)| id)
            .collect();
        for id in ids {
            self.with_instance(id, |handler, data| {
                handler.detach(id, data);
                data.model = None;
                data.submesh_matrices = None;
                warn!(instance = %id, "instance has no model and will not be drawn");
            });
        }
    }

    fn style_for(&self, id: InstanceId, data: &InstanceData) -> Style {
        let color = data.instance.as_ref().map_or(WHITE, |instance| {
            parse_color_or_white(instance.display_color(self.hot == Some(id)))
        });
        let texture = data
            .texture
            .and_then(|key| self.textures.borrow().get(key).map(|entry| entry.image.clone()));
        Style { color, texture }
    }

    /// Returns `false` when the batch has to wait for its model.
    fn rebuild_batch(&mut self, key: BatchKey) -> bool {
        let (model, members) = match self.batches.get_mut(key) {
            Some(batch) => {
                batch.objects.clear();
                if batch.members.is_empty() {
                    batch.dirty = false;
                    return true;
                }
                (batch.model, batch.members.clone())
            }
            None => return false,
        };
        if !self.models.get(model).map_or(false, ModelEntry::is_loaded) {
            return false;
        }

        let size = self.config.normalized_size;
        for id in &members {
            if let Some(data) = self.instances.get_mut(id) {
                if data.submesh_matrices.is_none() {
                    data.submesh_matrices =
                        compute_submesh_matrices(&mut self.models, &self.root, size, data);
                }
            }
        }

        let Some(style) = members
            .last()
            .and_then(|&id| self.instances.get(&id).map(|data| self.style_for(id, data)))
        else {
            return false;
        };
        let Some(nodes) = self.models.get(model).and_then(ModelEntry::root) else {
            return false;
        };

        let objects: Vec<InstancedDrawObject> = nodes
            .iter()
            .enumerate()
            .map(|(index, node)| InstancedDrawObject {
                geometry: node.geometry.clone(),
                material: style.apply(&node.material),
                transforms: members
                    .iter()
                    .map(|id| {
                        self.instances
                            .get(id)
                            .and_then(|data| data.submesh_matrices.as_ref())
                            .and_then(|matrices| matrices.get(index))
                            .map_or_else(Matrix4::identity, |m| m.cast::<f32>())
                    })
                    .collect(),
            })
            .collect();

        if let Some(batch) = self.batches.get_mut(key) {
            batch.objects = objects;
            batch.dirty = false;
        }
        true
    }

    fn prune_batches(&mut self) -> usize {
        let empty: Vec<BatchKey> = self
            .batches
            .iter()
            .filter(|(_, batch)| batch.is_empty())
            .map(|(key, _)| key)
            .collect();

        for &key in &empty {
            let Some(batch) = self.batches.remove(key) else {
                continue;
            };
            if let Some(list) = self.batch_index.get_mut(&batch.key) {
                list.retain(|&k| k != key);
                if list.is_empty() {
                    self.batch_index.remove(&batch.key);
                }
            }
        }
        empty.len()
    }
}

/// `root × world × [normalization] × node` for every submesh of the
/// instance's model. `None` until the model is loaded.
fn compute_submesh_matrices(
    models: &mut ModelTable,
    root: &Matrix4<f64>,
    normalized_size: f64,
    data: &InstanceData,
) -> Option<Vec<Matrix4<f64>>> {
    let instance = data.instance.as_ref()?;
    let model = models.get_mut(data.model?)?;
    let normalization = if instance.normalize {
        model.normalized(normalized_size).map(|n| n.world_matrix)
    } else {
        None
    };
    let base = root * data.world * normalization.unwrap_or_else(Matrix4::identity);
    Some(model.root()?.iter().map(|node| base * node.matrix).collect())
}

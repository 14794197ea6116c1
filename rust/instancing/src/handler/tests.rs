// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use super::*;
use crate::loader::{LoadedScene, SceneNode};
use crate::resources::encode_resource;
use crate::texture::TextureImage;
use crate::Result;
use approx::assert_relative_eq;
use nalgebra::{Point3, Vector3};
use vizkit_geometry::Mesh;

/// Reads `parts:N` payloads as N unit cubes spaced two units apart on X.
struct CubeLoader;

impl ModelLoader for CubeLoader {
    fn load_gltf_binary(&self, _bytes: &[u8]) -> Result<LoadedScene> {
        Err(Error::UnsupportedFormat("glb"))
    }

    fn load_collada(&self, _bytes: &[u8]) -> Result<LoadedScene> {
        Err(Error::Collada("not an XML document".into()))
    }

    fn load_gltf_text(&self, bytes: &[u8]) -> Result<LoadedScene> {
        let parts: usize = std::str::from_utf8(bytes)
            .ok()
            .and_then(|text| text.strip_prefix("parts:"))
            .and_then(|n| n.parse().ok())
            .ok_or(Error::UnknownFormat)?;

        let cube = Rc::new(unit_cube());
        let nodes = (0..parts)
            .map(|i| {
                SceneNode::mesh(
                    Matrix4::new_translation(&Vector3::new(2.0 * i as f64, 0.0, 0.0)),
                    cube.clone(),
                    None,
                )
            })
            .collect();
        Ok(LoadedScene {
            nodes,
            materials: Vec::new(),
        })
    }
}

fn unit_cube() -> Mesh {
    let mut positions = Vec::new();
    for &x in &[-0.5f32, 0.5] {
        for &y in &[-0.5f32, 0.5] {
            for &z in &[-0.5f32, 0.5] {
                positions.extend_from_slice(&[x, y, z]);
            }
        }
    }
    Mesh::from_buffers(positions, Vec::new(), vec![0, 1, 3, 0, 3, 2])
}

fn handler() -> ModelHandler {
    let mut resources: FxHashMap<String, String> = FxHashMap::default();
    resources.insert("box".into(), encode_resource(b"parts:1"));
    resources.insert("pair".into(), encode_resource(b"parts:2"));
    resources.insert("broken".into(), encode_resource(b"<garbage>"));
    resources.insert("not-base64".into(), "%%%".into());

    let textures = Rc::new(RefCell::new(TextureCache::new()));
    ModelHandler::new(Box::new(resources), textures, Matrix4::identity()).with_loader(CubeLoader)
}

fn red_box() -> Instance {
    Instance::new("box").with_color("rgb(255,0,0)")
}

#[test]
fn test_add_remove_is_ref_count_neutral() {
    let mut handler = handler();
    assert!(handler.add_instance(InstanceId(1), &red_box()));
    assert_eq!(handler.model_ref_count("box"), Some(1));

    assert!(handler.add_instance(InstanceId(2), &red_box()));
    assert_eq!(handler.model_ref_count("box"), Some(2));

    assert!(handler.remove_instance(InstanceId(2)));
    assert_eq!(handler.model_ref_count("box"), Some(1));
    assert!(!handler.remove_instance(InstanceId(2)));

    assert!(handler.remove_instance(InstanceId(1)));
    assert_eq!(handler.model_ref_count("box"), Some(0));
    let stats = handler.update();
    assert_eq!(stats.disposed_models, 1);
    assert!(!handler.has_model("box"));
    assert_eq!(handler.batch_count(), 0);
}

#[test]
fn test_unresolvable_model_drops_instance() {
    let mut handler = handler();
    assert!(!handler.add_instance(InstanceId(1), &Instance::new("missing")));
    assert_eq!(handler.instance_count(), 0);
    assert!(!handler.has_model("missing"));

    assert!(handler.add_instance(InstanceId(2), &red_box()));
    assert!(!handler.update_instance(InstanceId(2), &Instance::new("missing")));
    assert_eq!(handler.instance_count(), 0);
    assert_eq!(handler.model_ref_count("box"), Some(0));
    assert!(!handler.update_instance(InstanceId(3), &red_box()));
}

#[test]
fn test_same_key_shares_batch_and_color_change_splits() {
    let mut handler = handler();
    handler.add_instance(InstanceId(1), &red_box());
    handler.add_instance(InstanceId(2), &red_box());

    let shared = handler.batch_of(InstanceId(1)).unwrap();
    assert_eq!(handler.batch_of(InstanceId(2)), Some(shared));
    assert_eq!(handler.batch_count(), 1);

    handler.update_instance(InstanceId(2), &red_box().with_color("rgb(0,0,255)"));
    assert_ne!(handler.batch_of(InstanceId(2)), Some(shared));
    assert_eq!(handler.meta_mesh(shared).unwrap().members(), &[InstanceId(1)]);

    handler.update();
    assert_eq!(handler.batch_count(), 2);

    // Same key again: joins the original batch, the other one empties.
    handler.update_instance(InstanceId(2), &red_box());
    assert_eq!(handler.batch_of(InstanceId(2)), Some(shared));
    let stats = handler.update();
    assert_eq!(stats.pruned, 1);
    assert_eq!(handler.batch_count(), 1);
}

#[test]
fn test_batches_cap_at_max_instances() {
    let mut handler = handler();
    for id in 0..4001u64 {
        handler.add_instance(InstanceId(id), &red_box().with_position(id as f64, 0.0, 0.0));
    }
    handler.update();
    assert_eq!(handler.batch_count(), 2);

    let mut sizes: Vec<usize> = handler.meta_meshes().map(|(_, b)| b.len()).collect();
    sizes.sort_unstable();
    assert_eq!(sizes, vec![1, 4000]);
}

#[test]
fn test_configured_cap() {
    let mut handler = handler().with_config(HandlerConfig {
        max_batch_instances: 2,
        ..HandlerConfig::default()
    });
    for id in 0..5u64 {
        handler.add_instance(InstanceId(id), &red_box());
    }
    assert_eq!(handler.batch_count(), 3);

    // A freed slot is reused before a new batch is opened.
    handler.remove_instance(InstanceId(0));
    handler.add_instance(InstanceId(9), &red_box());
    assert_eq!(handler.batch_count(), 3);
    assert_eq!(handler.batch_of(InstanceId(9)), handler.batch_of(InstanceId(1)));
}

#[test]
fn test_hot_instance_regroups() {
    let mut handler = handler();
    let mut hoverable = red_box();
    hoverable.hot_color = Some("#FFFF00".into());
    handler.add_instance(InstanceId(1), &hoverable);
    handler.add_instance(InstanceId(2), &hoverable);
    handler.add_instance(InstanceId(3), &red_box());

    let cold = handler.batch_of(InstanceId(1)).unwrap();
    assert_eq!(handler.batch_of(InstanceId(3)), Some(cold));

    handler.update_hot_instance(Some(InstanceId(1)));
    let hot = handler.batch_of(InstanceId(1)).unwrap();
    assert_ne!(hot, cold);
    assert_eq!(handler.meta_mesh(hot).unwrap().key(), "box_color_rgb(255,0,0)_hot_#ffff00");

    // Hovering an instance without a hot color moves nothing.
    handler.update_hot_instance(Some(InstanceId(3)));
    assert_eq!(handler.batch_of(InstanceId(1)), Some(cold));
    assert_eq!(handler.batch_of(InstanceId(3)), Some(cold));
    assert_eq!(handler.hot_instance(), Some(InstanceId(3)));

    handler.update_hot_instance(None);
    assert_eq!(handler.hot_instance(), None);
}

#[test]
fn test_unloaded_batches_stay_dirty() {
    let mut handler = handler();
    handler.add_instance(InstanceId(1), &red_box());

    let stats = handler.update();
    assert_eq!(stats.pending, 1);
    assert_eq!(stats.draw_objects, 0);
    let batch = handler.batch_of(InstanceId(1)).unwrap();
    assert!(handler.meta_mesh(batch).unwrap().is_dirty());
    assert!(handler.get_target(InstanceId(1)).is_none());
}

#[tokio::test]
async fn test_load_builds_draw_objects() {
    let mut handler = handler();
    handler.add_instance(InstanceId(1), &red_box().with_position(3.0, 0.0, 0.0));
    handler.add_instance(InstanceId(2), &red_box().with_position(-3.0, 0.0, 0.0));

    let loaded = handler.load_models().await;
    assert_eq!(loaded, LoadStats { loaded: 1, failed: 0 });
    assert!(handler.is_model_loaded("box"));

    let stats = handler.update();
    assert_eq!(stats.rebuilt, 1);
    assert_eq!(stats.draw_objects, 1);

    let batch = handler.meta_mesh(handler.batch_of(InstanceId(1)).unwrap()).unwrap();
    let object = &batch.objects()[0];
    assert_eq!(object.material.color, [1.0, 0.0, 0.0, 1.0]);
    assert_eq!(object.transforms.len(), 2);
    assert_relative_eq!(object.transforms[0][(0, 3)], 3.0);
    assert_relative_eq!(object.transforms[1][(0, 3)], -3.0);

    // Nothing left to load.
    assert_eq!(handler.load_models().await, LoadStats::default());
}

#[tokio::test]
async fn test_multi_part_model_gets_one_object_per_part() {
    let mut handler = handler();
    handler.add_instance(InstanceId(1), &Instance::new("pair"));
    handler.load_models().await;
    handler.update();

    let batch = handler.meta_mesh(handler.batch_of(InstanceId(1)).unwrap()).unwrap();
    assert_eq!(batch.objects().len(), 2);
    assert!(Rc::ptr_eq(&batch.objects()[0].geometry, &batch.objects()[1].geometry));
    assert_relative_eq!(batch.objects()[1].transforms[0][(0, 3)], 2.0);
}

#[tokio::test]
async fn test_failed_load_breaks_instances() {
    let mut handler = handler();
    handler.add_instance(InstanceId(1), &Instance::new("broken"));
    handler.add_instance(InstanceId(2), &Instance::new("not-base64"));
    handler.add_instance(InstanceId(3), &red_box());

    let stats = handler.load_models().await;
    assert_eq!(stats, LoadStats { loaded: 1, failed: 2 });
    assert!(!handler.has_model("broken"));
    assert!(!handler.has_model("not-base64"));
    assert_eq!(handler.instance_count(), 3);
    assert_eq!(handler.batch_of(InstanceId(1)), None);

    handler.update();
    assert_eq!(handler.batch_count(), 1);

    // Broken instances are removed quietly and never retried.
    assert!(handler.remove_instance(InstanceId(1)));
    handler.update_instance(InstanceId(2), &Instance::new("not-base64").with_position(1.0, 0.0, 0.0));
    assert_eq!(handler.batch_of(InstanceId(2)), None);
    assert_eq!(handler.load_models().await, LoadStats::default());
}

#[tokio::test]
async fn test_get_target_and_hit_test() {
    let mut handler = handler();
    let mut selected = Instance::new("box").with_position(3.0, 0.0, 0.0);
    selected.selected = true;
    selected.select_color = Some("#00FF00".into());
    handler.add_instance(InstanceId(7), &selected);
    handler.add_instance(InstanceId(8), &selected.clone().with_position(5.0, 0.0, 0.0));
    handler.load_models().await;

    let target = handler.get_target(InstanceId(7)).unwrap();
    assert_eq!(target.material.color, [0.0, 1.0, 0.0, 1.0]);
    assert_relative_eq!(target.matrix[(0, 3)], 3.0);

    let batch = handler.batch_of(InstanceId(7)).unwrap();
    assert_eq!(handler.hit_test(batch, 0, 1), None);
    handler.update();
    assert_eq!(handler.hit_test(batch, 0, 0), Some(InstanceId(7)));
    assert_eq!(handler.hit_test(batch, 0, 1), Some(InstanceId(8)));
    assert_eq!(handler.hit_test(batch, 0, 2), None);
    assert_eq!(handler.hit_test(batch, 1, 0), None);
}

#[tokio::test]
async fn test_normalized_instances() {
    let mut handler = handler();
    let mut instance = Instance::new("pair");
    instance.normalize = true;
    handler.add_instance(InstanceId(1), &instance);
    handler.load_models().await;

    let bounds = handler.model_bounds("pair").unwrap();
    assert_relative_eq!(bounds.min, Point3::new(-0.5, -0.5, -0.5));
    assert_relative_eq!(bounds.max, Point3::new(2.5, 0.5, 0.5));

    handler.update();
    let batch = handler.meta_mesh(handler.batch_of(InstanceId(1)).unwrap()).unwrap();
    assert_relative_eq!(batch.objects()[0].transforms[0][(0, 3)], -1.0 / 3.0, epsilon = 1e-6);
    assert_relative_eq!(batch.objects()[1].transforms[0][(0, 3)], 1.0 / 3.0, epsilon = 1e-6);
    assert_relative_eq!(batch.objects()[0].transforms[0][(0, 0)], 1.0 / 3.0, epsilon = 1e-6);

    instance.normalize = false;
    handler.update_instance(InstanceId(1), &instance);
    handler.update();
    let batch = handler.meta_mesh(handler.batch_of(InstanceId(1)).unwrap()).unwrap();
    assert_relative_eq!(batch.objects()[1].transforms[0][(0, 3)], 2.0);
}

#[tokio::test]
async fn test_root_matrix_moves_everything() {
    let mut handler = handler();
    handler.add_instance(InstanceId(1), &red_box().with_position(1.0, 0.0, 0.0));
    handler.load_models().await;
    handler.update();

    handler.set_root_matrix(Matrix4::new_translation(&Vector3::new(0.0, 10.0, 0.0)));
    let stats = handler.update();
    assert_eq!(stats.rebuilt, 1);

    let target = handler.get_target(InstanceId(1)).unwrap();
    assert_relative_eq!(target.matrix[(0, 3)], 1.0);
    assert_relative_eq!(target.matrix[(1, 3)], 10.0);
}

#[tokio::test]
async fn test_instance_textures() {
    let mut handler = handler();
    handler
        .textures()
        .borrow_mut()
        .insert("wood", TextureImage::solid([120, 80, 40, 255]));

    handler.add_instance(InstanceId(1), &red_box().with_texture("wood"));
    handler.add_instance(InstanceId(2), &red_box().with_texture("stone"));
    assert_eq!(handler.textures().borrow().ref_count("wood"), Some(1));
    assert_eq!(handler.instance_count(), 2);
    assert_ne!(handler.batch_of(InstanceId(1)), handler.batch_of(InstanceId(2)));

    handler.load_models().await;
    handler.update();
    let batch = handler.meta_mesh(handler.batch_of(InstanceId(1)).unwrap()).unwrap();
    let texture = batch.objects()[0].material.texture.as_ref().unwrap();
    assert_eq!(texture.pixels, vec![120, 80, 40, 255]);

    handler.update_instance(InstanceId(1), &red_box());
    assert_eq!(handler.textures().borrow().ref_count("wood"), Some(0));
    let batch = handler.batch_of(InstanceId(1)).unwrap();
    assert_eq!(handler.meta_mesh(batch).unwrap().key(), "box_color_rgb(255,0,0)");
}

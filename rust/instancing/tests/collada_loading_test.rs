// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! End-to-end loading of COLLADA documents through the handler.

use nalgebra::Matrix4;
use rustc_hash::FxHashMap;
use std::cell::RefCell;
use std::rc::Rc;
use vizkit_instancing::loader::{flatten_scene, parse_model};
use vizkit_instancing::resources::encode_resource;
use vizkit_instancing::{
    Instance, InstanceId, LoadStats, ModelFormat, ModelHandler, SceneLoader, TextureCache,
};

/// One red triangle under a node lifted 5 units along Y.
const TRIANGLE_DAE: &str = r##"<?xml version="1.0" encoding="utf-8"?>
<COLLADA xmlns="http://www.collada.org/2005/11/COLLADASchema" version="1.4.1">
  <asset><unit name="meter" meter="1"/><up_axis>Y_UP</up_axis></asset>
  <library_effects>
    <effect id="red-effect">
      <profile_COMMON>
        <technique sid="common">
          <phong><diffuse><color sid="diffuse">1 0 0 1</color></diffuse></phong>
        </technique>
      </profile_COMMON>
    </effect>
  </library_effects>
  <library_materials>
    <material id="red-material" name="Red"><instance_effect url="#red-effect"/></material>
  </library_materials>
  <library_geometries>
    <geometry id="tri-mesh" name="tri">
      <mesh>
        <source id="tri-positions">
          <float_array id="tri-positions-array" count="9">0 0 0 1 0 0 0 1 0</float_array>
          <technique_common>
            <accessor source="#tri-positions-array" count="3" stride="3">
              <param name="X" type="float"/><param name="Y" type="float"/><param name="Z" type="float"/>
            </accessor>
          </technique_common>
        </source>
        <vertices id="tri-vertices"><input semantic="POSITION" source="#tri-positions"/></vertices>
        <triangles material="red-symbol" count="1">
          <input semantic="VERTEX" source="#tri-vertices" offset="0"/>
          <p>0 1 2</p>
        </triangles>
      </mesh>
    </geometry>
  </library_geometries>
  <library_visual_scenes>
    <visual_scene id="scene">
      <node id="tri-node" name="tri">
        <translate sid="location">0 5 0</translate>
        <instance_geometry url="#tri-mesh">
          <bind_material>
            <technique_common>
              <instance_material symbol="red-symbol" target="#red-material"/>
            </technique_common>
          </bind_material>
        </instance_geometry>
      </node>
    </visual_scene>
  </library_visual_scenes>
  <scene><instance_visual_scene url="#scene"/></scene>
</COLLADA>"##;

/// Well-formed, but the scene draws nothing.
const EMPTY_DAE: &str = r#"<COLLADA version="1.4.1">
  <library_visual_scenes><visual_scene id="scene"><node id="empty"/></visual_scene></library_visual_scenes>
</COLLADA>"#;

#[test]
fn test_detects_collada() {
    let (format, scene) = parse_model(&SceneLoader, TRIANGLE_DAE.as_bytes()).unwrap();
    assert_eq!(format, ModelFormat::Collada);
    assert_eq!(scene.nodes.len(), 1);
    assert_eq!(scene.materials.len(), 1);
    assert_eq!(scene.nodes[0].name.as_deref(), Some("tri"));

    let flat = flatten_scene(scene).unwrap();
    assert_eq!(flat.disposed_materials, 0);
    assert_eq!(flat.nodes[0].material.color, [1.0, 0.0, 0.0, 1.0]);
    assert_eq!(flat.nodes[0].matrix[(1, 3)], 5.0);
}

#[tokio::test]
async fn test_handler_loads_collada_models() {
    let mut resources: FxHashMap<String, String> = FxHashMap::default();
    resources.insert("tri.dae".into(), encode_resource(TRIANGLE_DAE.as_bytes()));
    resources.insert("empty.dae".into(), encode_resource(EMPTY_DAE.as_bytes()));

    let textures = Rc::new(RefCell::new(TextureCache::new()));
    let mut handler = ModelHandler::new(Box::new(resources), textures, Matrix4::identity());

    handler.add_instance(InstanceId(1), &Instance::new("tri.dae").with_position(2.0, 0.0, 0.0));
    handler.add_instance(InstanceId(2), &Instance::new("empty.dae"));

    assert_eq!(handler.load_models().await, LoadStats { loaded: 1, failed: 1 });
    assert!(handler.is_model_loaded("tri.dae"));
    assert!(!handler.is_model_loaded("empty.dae"));
    assert!(handler.get_target(InstanceId(2)).is_none());

    let target = handler.get_target(InstanceId(1)).unwrap();
    assert_eq!(target.material.name.as_deref(), Some("Red"));
    assert_eq!(target.geometry.triangle_count(), 1);
    assert_eq!(target.matrix[(0, 3)], 2.0);
    assert_eq!(target.matrix[(1, 3)], 5.0);

    let bounds = handler.model_bounds("tri.dae").unwrap();
    assert_eq!(bounds.min.y, 5.0);
    assert_eq!(bounds.max.y, 6.0);
}

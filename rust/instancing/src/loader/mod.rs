// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Model parsing.
//!
//! A payload is tried as binary glTF (when it starts with the `glTF` magic),
//! then as COLLADA, then as glTF JSON. Parsers produce a [`LoadedScene`]:
//! a node hierarchy plus a material table. [`flatten_scene`] turns that into
//! the flat list of mesh nodes a model keeps, with world matrices baked in
//! and unused materials dropped.

mod collada;

use crate::model::{Material, MeshNode};
use crate::texture::TextureImage;
use crate::{Error, Result};
use nalgebra::Matrix4;
use std::rc::Rc;
use vizkit_geometry::Mesh;

/// Magic bytes of a binary glTF container.
pub const GLB_MAGIC: &[u8; 4] = b"glTF";

/// Which parser accepted a payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelFormat {
    GltfBinary,
    Collada,
    GltfText,
}

/// One mesh primitive of a scene node.
#[derive(Debug, Clone)]
pub struct ScenePrimitive {
    pub geometry: Rc<Mesh>,
    /// Index into [`LoadedScene::materials`]; `None` uses the default material.
    pub material: Option<usize>,
}

/// A node of a parsed scene.
#[derive(Debug, Clone)]
pub struct SceneNode {
    pub name: Option<String>,
    /// Transform relative to the parent node.
    pub matrix: Matrix4<f64>,
    pub visible: bool,
    pub primitives: Vec<ScenePrimitive>,
    pub children: Vec<SceneNode>,
}

impl SceneNode {
    /// An empty, visible group node.
    pub fn group(matrix: Matrix4<f64>) -> Self {
        Self {
            name: None,
            matrix,
            visible: true,
            primitives: Vec::new(),
            children: Vec::new(),
        }
    }

    /// A visible node drawing one primitive.
    pub fn mesh(matrix: Matrix4<f64>, geometry: Rc<Mesh>, material: Option<usize>) -> Self {
        Self {
            primitives: vec![ScenePrimitive { geometry, material }],
            ..Self::group(matrix)
        }
    }
}

/// Output of a parser.
#[derive(Debug, Clone, Default)]
pub struct LoadedScene {
    pub nodes: Vec<SceneNode>,
    pub materials: Vec<Material>,
}

/// Mesh nodes ready for a model, plus how many materials were left unused.
#[derive(Debug)]
pub struct FlattenedScene {
    pub nodes: Vec<MeshNode>,
    pub disposed_materials: usize,
}

/// Format-specific parsers.
pub trait ModelLoader {
    fn load_gltf_binary(&self, bytes: &[u8]) -> Result<LoadedScene>;
    fn load_collada(&self, bytes: &[u8]) -> Result<LoadedScene>;
    fn load_gltf_text(&self, bytes: &[u8]) -> Result<LoadedScene>;
}

#[inline]
pub fn is_glb(bytes: &[u8]) -> bool {
    bytes.starts_with(GLB_MAGIC)
}

/// Run the format detection chain over `bytes`.
pub fn parse_model(loader: &dyn ModelLoader, bytes: &[u8]) -> Result<(ModelFormat, LoadedScene)> {
    if is_glb(bytes) {
        return loader
            .load_gltf_binary(bytes)
            .map(|scene| (ModelFormat::GltfBinary, scene));
    }

    match loader.load_collada(bytes) {
        Ok(scene) => Ok((ModelFormat::Collada, scene)),
        Err(collada_err) => {
            tracing::debug!(error = %collada_err, "not COLLADA, trying glTF");
            loader
                .load_gltf_text(bytes)
                .map(|scene| (ModelFormat::GltfText, scene))
        }
    }
}

/// Flatten a scene into mesh nodes with world matrices.
///
/// Invisible subtrees and nodes without primitives produce nothing.
/// Materials no remaining primitive refers to are dropped, along with any
/// texture only they held.
pub fn flatten_scene(scene: LoadedScene) -> Result<FlattenedScene> {
    let mut flat = Vec::new();
    for node in &scene.nodes {
        collect_nodes(node, &Matrix4::identity(), &mut flat);
    }
    if flat.is_empty() {
        return Err(Error::EmptyModel);
    }

    let mut used = vec![false; scene.materials.len()];
    for placed in &flat {
        if let Some(slot) = placed.material.and_then(|i| used.get_mut(i)) {
            *slot = true;
        }
    }
    let disposed_materials = used.iter().filter(|u| !**u).count();

    let nodes = flat
        .into_iter()
        .map(|placed| MeshNode {
            name: placed.name,
            geometry: placed.geometry,
            material: placed
                .material
                .and_then(|i| scene.materials.get(i))
                .cloned()
                .unwrap_or_default(),
            matrix: placed.matrix,
        })
        .collect();

    Ok(FlattenedScene {
        nodes,
        disposed_materials,
    })
}

struct PlacedPrimitive {
    name: Option<String>,
    matrix: Matrix4<f64>,
    geometry: Rc<Mesh>,
    material: Option<usize>,
}

fn collect_nodes(node: &SceneNode, parent: &Matrix4<f64>, out: &mut Vec<PlacedPrimitive>) {
    if !node.visible {
        return;
    }
    let world = parent * node.matrix;
    for primitive in &node.primitives {
        out.push(PlacedPrimitive {
            name: node.name.clone(),
            matrix: world,
            geometry: primitive.geometry.clone(),
            material: primitive.material,
        });
    }
    for child in &node.children {
        collect_nodes(child, &world, out);
    }
}

/// Built-in parsers: glTF and GLB through the `gltf` crate, COLLADA through
/// `roxmltree`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SceneLoader;

impl ModelLoader for SceneLoader {
    fn load_gltf_binary(&self, bytes: &[u8]) -> Result<LoadedScene> {
        import_gltf(bytes)
    }

    fn load_collada(&self, bytes: &[u8]) -> Result<LoadedScene> {
        collada::parse(bytes)
    }

    fn load_gltf_text(&self, bytes: &[u8]) -> Result<LoadedScene> {
        import_gltf(bytes)
    }
}

fn import_gltf(bytes: &[u8]) -> Result<LoadedScene> {
    let (document, buffers, images) = gltf::import_slice(bytes)?;

    let images: Vec<Option<Rc<TextureImage>>> = images
        .into_iter()
        .map(|image| rgba_image(image).map(Rc::new))
        .collect();

    let materials = document
        .materials()
        .map(|material| {
            let pbr = material.pbr_metallic_roughness();
            Material {
                name: material.name().map(str::to_string),
                color: pbr.base_color_factor(),
                texture: pbr
                    .base_color_texture()
                    .and_then(|info| images.get(info.texture().source().index()).cloned())
                    .flatten(),
                double_sided: material.double_sided(),
            }
        })
        .collect();

    let meshes: Vec<Vec<ScenePrimitive>> = document
        .meshes()
        .map(|mesh| {
            mesh.primitives()
                .filter_map(|primitive| read_primitive(&primitive, &buffers))
                .collect()
        })
        .collect();

    let nodes = match document.default_scene().or_else(|| document.scenes().next()) {
        Some(scene) => scene.nodes().map(|node| convert_node(&node, &meshes)).collect(),
        None => Vec::new(),
    };

    Ok(LoadedScene { nodes, materials })
}

fn read_primitive(
    primitive: &gltf::Primitive<'_>,
    buffers: &[gltf::buffer::Data],
) -> Option<ScenePrimitive> {
    if primitive.mode() != gltf::mesh::Mode::Triangles {
        return None;
    }
    let reader = primitive.reader(|buffer| buffers.get(buffer.index()).map(|data| data.0.as_slice()));

    let positions: Vec<f32> = reader.read_positions()?.flatten().collect();
    let normals: Vec<f32> = reader
        .read_normals()
        .map(|normals| normals.flatten().collect())
        .unwrap_or_default();
    let indices: Vec<u32> = match reader.read_indices() {
        Some(indices) => indices.into_u32().collect(),
        None => (0..(positions.len() / 3) as u32).collect(),
    };

    Some(ScenePrimitive {
        geometry: Rc::new(Mesh::from_buffers(positions, normals, indices)),
        material: primitive.material().index(),
    })
}

fn convert_node(node: &gltf::Node<'_>, meshes: &[Vec<ScenePrimitive>]) -> SceneNode {
    SceneNode {
        name: node.name().map(str::to_string),
        matrix: Matrix4::from(node.transform().matrix()).cast::<f64>(),
        visible: true,
        primitives: node
            .mesh()
            .and_then(|mesh| meshes.get(mesh.index()))
            .cloned()
            .unwrap_or_default(),
        children: node.children().map(|child| convert_node(&child, meshes)).collect(),
    }
}

fn rgba_image(image: gltf::image::Data) -> Option<TextureImage> {
    use gltf::image::Format;

    let pixels = match image.format {
        Format::R8G8B8A8 => image.pixels,
        Format::R8G8B8 => image
            .pixels
            .chunks_exact(3)
            .flat_map(|p| [p[0], p[1], p[2], 255])
            .collect(),
        Format::R8G8 => image
            .pixels
            .chunks_exact(2)
            .flat_map(|p| [p[0], p[0], p[0], p[1]])
            .collect(),
        Format::R8 => image.pixels.iter().flat_map(|&v| [v, v, v, 255]).collect(),
        other => {
            tracing::warn!(format = ?other, "unsupported texture format, texture dropped");
            return None;
        }
    };
    Some(TextureImage::new(image.width, image.height, pixels))
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Vector3;

    struct TextOnly;

    impl ModelLoader for TextOnly {
        fn load_gltf_binary(&self, _: &[u8]) -> Result<LoadedScene> {
            Err(Error::UnsupportedFormat("glb"))
        }
        fn load_collada(&self, bytes: &[u8]) -> Result<LoadedScene> {
            if bytes.starts_with(b"<COLLADA") {
                Ok(LoadedScene::default())
            } else {
                Err(Error::Collada("missing root element".into()))
            }
        }
        fn load_gltf_text(&self, _: &[u8]) -> Result<LoadedScene> {
            Ok(LoadedScene::default())
        }
    }

    fn triangle() -> Rc<Mesh> {
        Rc::new(Mesh::from_buffers(
            vec![0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0],
            Vec::new(),
            vec![0, 1, 2],
        ))
    }

    #[test]
    fn test_detection_order() {
        let loader = TextOnly;
        assert!(parse_model(&loader, b"glTF\x02\x00\x00\x00").is_err());
        assert_eq!(
            parse_model(&loader, b"<COLLADA/>").unwrap().0,
            ModelFormat::Collada
        );
        assert_eq!(
            parse_model(&loader, b"{\"asset\":{}}").unwrap().0,
            ModelFormat::GltfText
        );
    }

    #[test]
    fn test_flatten_bakes_hierarchy() {
        let mut parent = SceneNode::group(Matrix4::new_translation(&Vector3::new(1.0, 0.0, 0.0)));
        parent.children.push(SceneNode::mesh(
            Matrix4::new_translation(&Vector3::new(0.0, 2.0, 0.0)),
            triangle(),
            Some(1),
        ));
        let mut hidden = SceneNode::mesh(Matrix4::identity(), triangle(), Some(0));
        hidden.visible = false;

        let scene = LoadedScene {
            nodes: vec![parent, hidden],
            materials: vec![
                Material::default(),
                Material {
                    color: [1.0, 0.0, 0.0, 1.0],
                    ..Material::default()
                },
                Material::default(),
            ],
        };

        let flat = flatten_scene(scene).unwrap();
        assert_eq!(flat.nodes.len(), 1);
        assert_eq!(flat.disposed_materials, 2);
        assert_eq!(flat.nodes[0].material.color, [1.0, 0.0, 0.0, 1.0]);
        assert_eq!(
            flat.nodes[0].matrix,
            Matrix4::new_translation(&Vector3::new(1.0, 2.0, 0.0))
        );
    }

    #[test]
    fn test_flatten_rejects_empty_scene() {
        let scene = LoadedScene {
            nodes: vec![SceneNode::group(Matrix4::identity())],
            materials: Vec::new(),
        };
        assert!(matches!(flatten_scene(scene), Err(Error::EmptyModel)));
    }

    #[test]
    fn test_scene_loader_detects_collada() {
        let doc = br##"<COLLADA version="1.4.1">
            <library_geometries><geometry id="tri"><mesh>
                <source id="pos"><float_array>0 0 0 1 0 0 0 1 0</float_array></source>
                <vertices id="vtx"><input semantic="POSITION" source="#pos"/></vertices>
                <triangles count="1"><input semantic="VERTEX" source="#vtx" offset="0"/><p>0 1 2</p></triangles>
            </mesh></geometry></library_geometries>
            <library_visual_scenes><visual_scene id="s">
                <node><instance_geometry url="#tri"/></node>
            </visual_scene></library_visual_scenes>
        </COLLADA>"##;

        let (format, scene) = parse_model(&SceneLoader, doc).unwrap();
        assert_eq!(format, ModelFormat::Collada);
        let flat = flatten_scene(scene).unwrap();
        assert_eq!(flat.nodes.len(), 1);
        assert_eq!(flat.nodes[0].geometry.triangle_count(), 1);
        assert_eq!(flat.nodes[0].material.color, Material::default().color);

        assert!(SceneLoader.load_collada(b"{\"asset\":{}}").is_err());
        assert!(SceneLoader.load_gltf_text(b"not json").is_err());
    }
}

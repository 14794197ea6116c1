// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! COLLADA (`.dae`) documents.
//!
//! Reads `<triangles>` and `<polylist>` geometry, the diffuse color of
//! common-profile effects and the node tree of the instantiated visual scene.
//! The document's `up_axis` and `unit` are folded into a root group so the
//! result is Y-up and in meters. Animations, skins, cameras and lights are
//! ignored.

use super::{LoadedScene, SceneNode, ScenePrimitive};
use crate::model::Material;
use crate::{Error, Result};
use nalgebra::{Matrix4, Unit, Vector3};
use roxmltree::{Document, Node};
use rustc_hash::FxHashMap;
use std::f64::consts::FRAC_PI_2;
use std::rc::Rc;
use vizkit_geometry::Mesh;

/// Float data of a `<source>`, `stride` values per element.
struct Source {
    data: Vec<f64>,
    stride: usize,
}

/// A primitive of a `<geometry>`, bound to a material by symbol.
struct GeometryPart {
    symbol: Option<String>,
    mesh: Rc<Mesh>,
}

/// Parse a COLLADA document into a scene.
pub(super) fn parse(bytes: &[u8]) -> Result<LoadedScene> {
    let text = std::str::from_utf8(bytes).map_err(|e| Error::Collada(format!("not UTF-8: {}", e)))?;
    let document = Document::parse(text)?;
    let root = document.root_element();
    if root.tag_name().name() != "COLLADA" {
        return Err(Error::Collada(format!(
            "unexpected root element <{}>",
            root.tag_name().name()
        )));
    }

    let (materials, material_ids) = read_materials(root);
    let geometries = read_geometries(root)?;

    let mut nodes = Vec::new();
    if let Some(scene) = visual_scene(root) {
        for node in children_named(scene, "node") {
            nodes.push(read_node(node, &geometries, &material_ids)?);
        }
    }

    let correction = asset_correction(root);
    if correction != Matrix4::identity() {
        let mut group = SceneNode::group(correction);
        group.children = nodes;
        nodes = vec![group];
    }

    tracing::debug!(
        nodes = nodes.len(),
        geometries = geometries.len(),
        materials = materials.len(),
        "parsed COLLADA document"
    );
    Ok(LoadedScene { nodes, materials })
}

#[inline]
fn is(node: Node<'_, '_>, name: &str) -> bool {
    node.is_element() && node.tag_name().name() == name
}

fn child<'a, 'input>(node: Node<'a, 'input>, name: &str) -> Option<Node<'a, 'input>> {
    node.children().find(|c| is(*c, name))
}

fn children_named<'a, 'input>(
    node: Node<'a, 'input>,
    name: &'static str,
) -> impl Iterator<Item = Node<'a, 'input>> {
    node.children().filter(move |c| is(*c, name))
}

/// `#id` references point into the same document.
#[inline]
fn fragment(url: &str) -> &str {
    url.strip_prefix('#').unwrap_or(url)
}

fn numbers<T: std::str::FromStr>(node: Node<'_, '_>) -> Result<Vec<T>> {
    node.text()
        .unwrap_or("")
        .split_whitespace()
        .map(|token| {
            token.parse::<T>().map_err(|_| {
                Error::Collada(format!("invalid number '{}' in <{}>", token, node.tag_name().name()))
            })
        })
        .collect()
}

fn vector3(node: Node<'_, '_>) -> Result<Vector3<f64>> {
    match numbers::<f64>(node)?.as_slice() {
        [x, y, z] => Ok(Vector3::new(*x, *y, *z)),
        other => Err(Error::Collada(format!(
            "<{}> needs 3 values, got {}",
            node.tag_name().name(),
            other.len()
        ))),
    }
}

fn read_materials(root: Node<'_, '_>) -> (Vec<Material>, FxHashMap<String, usize>) {
    let mut effects: FxHashMap<&str, [f32; 4]> = FxHashMap::default();
    if let Some(library) = child(root, "library_effects") {
        for effect in children_named(library, "effect") {
            if let (Some(id), Some(color)) = (effect.attribute("id"), diffuse_color(effect)) {
                effects.insert(id, color);
            }
        }
    }

    let mut materials = Vec::new();
    let mut ids = FxHashMap::default();
    if let Some(library) = child(root, "library_materials") {
        for material in children_named(library, "material") {
            let Some(id) = material.attribute("id") else {
                continue;
            };
            let color = child(material, "instance_effect")
                .and_then(|instance| instance.attribute("url"))
                .and_then(|url| effects.get(fragment(url)))
                .copied()
                .unwrap_or_else(|| Material::default().color);

            ids.insert(id.to_string(), materials.len());
            materials.push(Material {
                name: Some(material.attribute("name").unwrap_or(id).to_string()),
                color,
                ..Material::default()
            });
        }
    }
    (materials, ids)
}

/// Diffuse color of a common-profile effect; `<constant>` shading uses its emission.
fn diffuse_color(effect: Node<'_, '_>) -> Option<[f32; 4]> {
    let technique = child(child(effect, "profile_COMMON")?, "technique")?;
    let shading = technique.children().find(|c| {
        c.is_element() && matches!(c.tag_name().name(), "phong" | "lambert" | "blinn" | "constant")
    })?;
    let color = child(shading, "diffuse")
        .or_else(|| child(shading, "emission"))
        .and_then(|slot| child(slot, "color"))?;

    match numbers::<f32>(color).ok()?.as_slice() {
        [r, g, b] => Some([*r, *g, *b, 1.0]),
        [r, g, b, a, ..] => Some([*r, *g, *b, *a]),
        _ => None,
    }
}

fn read_geometries(root: Node<'_, '_>) -> Result<FxHashMap<String, Vec<GeometryPart>>> {
    let mut geometries = FxHashMap::default();
    if let Some(library) = child(root, "library_geometries") {
        for geometry in children_named(library, "geometry") {
            if let (Some(id), Some(mesh)) = (geometry.attribute("id"), child(geometry, "mesh")) {
                geometries.insert(id.to_string(), read_mesh(mesh)?);
            }
        }
    }
    Ok(geometries)
}

fn read_mesh(mesh: Node<'_, '_>) -> Result<Vec<GeometryPart>> {
    let mut sources = FxHashMap::default();
    for source in children_named(mesh, "source") {
        if let (Some(id), Some(data)) = (source.attribute("id"), read_source(source)?) {
            sources.insert(id.to_string(), data);
        }
    }

    // <vertices> id -> (semantic, source id)
    let mut vertices: FxHashMap<String, Vec<(String, String)>> = FxHashMap::default();
    for element in children_named(mesh, "vertices") {
        if let Some(id) = element.attribute("id") {
            let inputs = children_named(element, "input")
                .filter_map(|input| {
                    Some((
                        input.attribute("semantic")?.to_string(),
                        fragment(input.attribute("source")?).to_string(),
                    ))
                })
                .collect();
            vertices.insert(id.to_string(), inputs);
        }
    }

    let mut parts = Vec::new();
    for primitive in mesh.children().filter(|c| is(*c, "triangles") || is(*c, "polylist")) {
        if let Some(geometry) = read_primitive(primitive, &sources, &vertices)? {
            parts.push(GeometryPart {
                symbol: primitive.attribute("material").map(str::to_string),
                mesh: Rc::new(geometry),
            });
        }
    }
    Ok(parts)
}

fn read_source(source: Node<'_, '_>) -> Result<Option<Source>> {
    let Some(array) = child(source, "float_array") else {
        return Ok(None);
    };
    let stride = child(source, "technique_common")
        .and_then(|technique| child(technique, "accessor"))
        .and_then(|accessor| accessor.attribute("stride"))
        .and_then(|stride| stride.parse().ok())
        .unwrap_or(3);
    Ok(Some(Source {
        data: numbers(array)?,
        stride,
    }))
}

/// Expand one primitive into an unindexed triangle list.
///
/// Polygons of a `<polylist>` are fanned around their first corner.
fn read_primitive(
    primitive: Node<'_, '_>,
    sources: &FxHashMap<String, Source>,
    vertices: &FxHashMap<String, Vec<(String, String)>>,
) -> Result<Option<Mesh>> {
    let mut stride = 0;
    let mut position: Option<(usize, &Source)> = None;
    let mut normal: Option<(usize, &Source)> = None;

    for input in children_named(primitive, "input") {
        let offset: usize = input
            .attribute("offset")
            .and_then(|offset| offset.parse().ok())
            .unwrap_or(0);
        stride = stride.max(offset + 1);
        let source = input.attribute("source").map(fragment).unwrap_or("");

        match input.attribute("semantic") {
            Some("VERTEX") => {
                for (semantic, id) in vertices.get(source).into_iter().flatten() {
                    match semantic.as_str() {
                        "POSITION" => position = sources.get(id).map(|s| (offset, s)),
                        "NORMAL" => normal = sources.get(id).map(|s| (offset, s)),
                        _ => {}
                    }
                }
            }
            Some("NORMAL") => normal = sources.get(source).map(|s| (offset, s)),
            _ => {}
        }
    }

    let (Some((position_offset, positions)), Some(p)) = (position, child(primitive, "p")) else {
        return Ok(None);
    };
    let indices: Vec<usize> = numbers(p)?;
    let corner_count = indices.len() / stride;

    let polygon_sizes: Vec<usize> = if is(primitive, "polylist") {
        match child(primitive, "vcount") {
            Some(vcount) => numbers(vcount)?,
            None => return Err(Error::Collada("<polylist> without <vcount>".into())),
        }
    } else {
        vec![3; corner_count / 3]
    };

    let mut out_positions = Vec::new();
    let mut out_normals = Vec::new();
    let mut first = 0;
    for size in polygon_sizes {
        if first + size > corner_count {
            return Err(Error::Collada("<p> is shorter than the polygon counts".into()));
        }
        for i in 1..size.saturating_sub(1) {
            for corner in [first, first + i, first + i + 1] {
                let entry = &indices[corner * stride..(corner + 1) * stride];
                push_element(&mut out_positions, positions, entry[position_offset])?;
                if let Some((offset, normals)) = normal {
                    push_element(&mut out_normals, normals, entry[offset])?;
                }
            }
        }
        first += size;
    }

    if out_positions.is_empty() {
        return Ok(None);
    }
    let count = (out_positions.len() / 3) as u32;
    Ok(Some(Mesh::from_buffers(
        out_positions,
        out_normals,
        (0..count).collect(),
    )))
}

fn push_element(out: &mut Vec<f32>, source: &Source, index: usize) -> Result<()> {
    let start = index * source.stride;
    match source.data.get(start..start + 3) {
        Some(values) => {
            out.extend(values.iter().map(|&v| v as f32));
            Ok(())
        }
        None => Err(Error::Collada(format!("index {} is out of range", index))),
    }
}

/// The scene named by `<scene>`, or the first visual scene.
fn visual_scene<'a, 'input>(root: Node<'a, 'input>) -> Option<Node<'a, 'input>> {
    let library = child(root, "library_visual_scenes")?;
    let wanted = child(root, "scene")
        .and_then(|scene| child(scene, "instance_visual_scene"))
        .and_then(|instance| instance.attribute("url"))
        .map(fragment);

    wanted
        .and_then(|id| children_named(library, "visual_scene").find(|s| s.attribute("id") == Some(id)))
        .or_else(|| child(library, "visual_scene"))
}

fn read_node(
    node: Node<'_, '_>,
    geometries: &FxHashMap<String, Vec<GeometryPart>>,
    materials: &FxHashMap<String, usize>,
) -> Result<SceneNode> {
    let mut scene_node = SceneNode::group(node_matrix(node)?);
    scene_node.name = node
        .attribute("name")
        .or_else(|| node.attribute("id"))
        .map(str::to_string);

    for instance in children_named(node, "instance_geometry") {
        let url = instance.attribute("url").map(fragment).unwrap_or("");
        let Some(parts) = geometries.get(url) else {
            tracing::warn!(url, "instance_geometry refers to a missing geometry");
            continue;
        };

        // material symbol -> material id
        let bindings: FxHashMap<&str, &str> = instance
            .descendants()
            .filter(|d| is(*d, "instance_material"))
            .filter_map(|m| Some((m.attribute("symbol")?, fragment(m.attribute("target")?))))
            .collect();

        for part in parts {
            let material = part
                .symbol
                .as_deref()
                .map(|symbol| bindings.get(symbol).copied().unwrap_or(symbol))
                .and_then(|id| materials.get(id))
                .copied();
            scene_node.primitives.push(ScenePrimitive {
                geometry: part.mesh.clone(),
                material,
            });
        }
    }

    for child_node in children_named(node, "node") {
        scene_node
            .children
            .push(read_node(child_node, geometries, materials)?);
    }
    Ok(scene_node)
}

/// Compose the node's transform elements in document order.
fn node_matrix(node: Node<'_, '_>) -> Result<Matrix4<f64>> {
    let mut matrix = Matrix4::identity();
    for element in node.children().filter(|c| c.is_element()) {
        let step = match element.tag_name().name() {
            "matrix" => {
                let values = numbers::<f64>(element)?;
                if values.len() != 16 {
                    return Err(Error::Collada(format!(
                        "<matrix> needs 16 values, got {}",
                        values.len()
                    )));
                }
                Matrix4::from_row_slice(&values)
            }
            "translate" => Matrix4::new_translation(&vector3(element)?),
            "scale" => Matrix4::new_nonuniform_scaling(&vector3(element)?),
            "rotate" => match numbers::<f64>(element)?.as_slice() {
                [x, y, z, degrees] => Unit::try_new(Vector3::new(*x, *y, *z), f64::EPSILON)
                    .map(|axis| Matrix4::from_axis_angle(&axis, degrees.to_radians()))
                    .unwrap_or_else(Matrix4::identity),
                _ => return Err(Error::Collada("<rotate> needs 4 values".into())),
            },
            _ => continue,
        };
        matrix *= step;
    }
    Ok(matrix)
}

/// Rotation to Y-up and scale to meters from `<asset>`.
fn asset_correction(root: Node<'_, '_>) -> Matrix4<f64> {
    let asset = child(root, "asset");
    let meter = asset
        .and_then(|asset| child(asset, "unit"))
        .and_then(|unit| unit.attribute("meter"))
        .and_then(|meter| meter.trim().parse::<f64>().ok())
        .filter(|meter| *meter > 0.0)
        .unwrap_or(1.0);
    let up_axis = asset
        .and_then(|asset| child(asset, "up_axis"))
        .and_then(|axis| axis.text())
        .map(str::trim)
        .unwrap_or("Y_UP");

    let rotation = match up_axis {
        "Z_UP" => Matrix4::from_axis_angle(&Vector3::x_axis(), -FRAC_PI_2),
        "X_UP" => Matrix4::from_axis_angle(&Vector3::z_axis(), FRAC_PI_2),
        _ => Matrix4::identity(),
    };
    rotation * Matrix4::new_scaling(meter)
}

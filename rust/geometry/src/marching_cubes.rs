// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Marching-cubes iso-surface extraction
//!
//! Polygonizes a dense `d × d × d` density field at a fixed iso-level. The
//! walk covers one extra layer of cells on the low side of every axis and
//! reads samples outside the grid as zero, so a blob that touches the grid
//! border still yields a closed surface.
//!
//! Output is a non-indexed triangle soup: every triangle gets three fresh
//! vertices, flat normals, and indices `0, 1, 2, ...`. Size the output
//! buffers with [`count`] before calling [`march`].

use crate::marching_cubes_tables::{CORNER_OFFSETS, EDGE_CORNERS, EDGE_TABLE, TRI_COUNTS, TRI_TABLE};
use crate::mesh::{face_normal, Mesh};
use crate::{Error, Result};
use nalgebra::{Point3, Vector3};
use rayon::prelude::*;

/// Density at which the surface is extracted
pub const ISO_LEVEL: f32 = 0.75;

/// Shift applied to normalized sample coordinates
pub const OFFSET: f64 = 0.55;

/// Tolerance of the interpolation short-circuits
const INTERPOLATION_EPSILON: f32 = 1e-5;

/// Read-only view of a cubic scalar grid
struct Field<'a> {
    samples: &'a [f32],
    dimensions: i64,
}

impl<'a> Field<'a> {
    fn new(samples: &'a [f32], dimensions: usize) -> Result<Self> {
        let required = dimensions
            .checked_pow(3)
            .ok_or_else(|| Error::InvalidField(format!("dimensions {} overflow", dimensions)))?;
        if samples.len() < required {
            return Err(Error::InvalidField(format!(
                "{} samples for dimensions {} (need {})",
                samples.len(),
                dimensions,
                required
            )));
        }
        Ok(Self {
            samples,
            dimensions: dimensions as i64,
        })
    }

    /// Sample at grid coordinate, zero outside the grid
    #[inline]
    fn sample(&self, x: i64, y: i64, z: i64) -> f32 {
        let d = self.dimensions;
        if x < 0 || y < 0 || z < 0 || x >= d || y >= d || z >= d {
            return 0.0;
        }
        self.samples[(x + y * d + z * d * d) as usize]
    }

    /// Corner values and case index of the cell whose low corner is `(x, y, z)`
    #[inline]
    fn cell(&self, x: i64, y: i64, z: i64) -> ([f32; 8], usize) {
        let mut values = [0.0f32; 8];
        let mut case = 0usize;
        for (i, &(dx, dy, dz)) in CORNER_OFFSETS.iter().enumerate() {
            let v = self.sample(x + dx, y + dy, z + dz);
            values[i] = v;
            if v < ISO_LEVEL {
                case |= 1 << i;
            }
        }
        (values, case)
    }

    /// Cell range per axis: low corners `-1 ..= d - 1`
    #[inline]
    fn cells(&self) -> std::ops::RangeInclusive<i64> {
        -1..=self.dimensions - 1
    }
}

/// Exact number of vertices [`march`] emits for this field.
///
/// Always a multiple of three; divide by three for the triangle count.
pub fn count(field: &[f32], dimensions: usize) -> Result<usize> {
    if dimensions == 0 {
        return Ok(0);
    }
    let field = Field::new(field, dimensions)?;

    let total: usize = field
        .cells()
        .into_par_iter()
        .map(|z| {
            let mut slice = 0usize;
            for y in field.cells() {
                for x in field.cells() {
                    let (_, case) = field.cell(x, y, z);
                    slice += TRI_COUNTS[case] as usize;
                }
            }
            slice
        })
        .sum();

    Ok(total)
}

/// Maps normalized grid coordinates into the caller's bounding box
struct WorldMapping {
    center: Vector3<f64>,
    size: Vector3<f64>,
    inv_dimensions: f64,
}

impl WorldMapping {
    fn new(bbox: &[f32; 6], dimensions: usize) -> Self {
        let min = Vector3::new(bbox[0] as f64, bbox[1] as f64, bbox[2] as f64);
        let max = Vector3::new(bbox[3] as f64, bbox[4] as f64, bbox[5] as f64);
        Self {
            center: (min + max) / 2.0,
            size: max - min,
            inv_dimensions: 1.0 / dimensions as f64,
        }
    }

    /// Normalized coordinate of a sample index along one axis
    #[inline]
    fn local(&self, index: i64) -> f64 {
        (index + 1) as f64 * self.inv_dimensions - OFFSET
    }

    #[inline]
    fn corner(&self, x: i64, y: i64, z: i64) -> Point3<f64> {
        Point3::new(self.local(x), self.local(y), self.local(z))
    }

    #[inline]
    fn to_world(&self, local: Point3<f64>) -> Point3<f64> {
        Point3::from(self.center + local.coords.component_mul(&self.size))
    }
}

/// Linear crossing of the iso-level between two samples
#[inline]
fn interpolate(p1: Point3<f64>, p2: Point3<f64>, v1: f32, v2: f32) -> Point3<f64> {
    if (ISO_LEVEL - v1).abs() < INTERPOLATION_EPSILON {
        return p1;
    }
    if (ISO_LEVEL - v2).abs() < INTERPOLATION_EPSILON {
        return p2;
    }
    if (v1 - v2).abs() < INTERPOLATION_EPSILON {
        return p1;
    }
    let mu = ((ISO_LEVEL - v1) / (v2 - v1)) as f64;
    p1 + (p2 - p1) * mu
}

/// Polygonize `field` into caller-allocated buffers.
///
/// `vertices` and `normals` take 3 floats per vertex and `indices` one
/// index per vertex. Returns the number of vertices written.
pub fn march(
    field: &[f32],
    dimensions: usize,
    bbox: &[f32; 6],
    vertices: &mut [f32],
    mut normals: Option<&mut [f32]>,
    indices: &mut [u32],
) -> Result<usize> {
    if dimensions == 0 {
        return Ok(0);
    }
    let grid = Field::new(field, dimensions)?;
    let mapping = WorldMapping::new(bbox, dimensions);

    let mut written = 0usize;
    let mut edge_points = [Point3::origin(); 12];

    for z in grid.cells() {
        for y in grid.cells() {
            for x in grid.cells() {
                let (values, case) = grid.cell(x, y, z);
                let edges = EDGE_TABLE[case];
                if edges == 0 {
                    continue;
                }

                let vertex_count = TRI_COUNTS[case] as usize;
                let needed = written + vertex_count;
                check_capacity("vertices", vertices.len(), needed * 3, field, dimensions)?;
                check_capacity("indices", indices.len(), needed, field, dimensions)?;
                if let Some(buffer) = normals.as_deref() {
                    check_capacity("normals", buffer.len(), needed * 3, field, dimensions)?;
                }

                for (edge, &(a, b)) in EDGE_CORNERS.iter().enumerate() {
                    if edges & (1 << edge) == 0 {
                        continue;
                    }
                    // Interpolate from the lower grid corner so neighbouring
                    // cells produce bit-identical shared vertices
                    let (ca, cb) = (CORNER_OFFSETS[a], CORNER_OFFSETS[b]);
                    let (a, b, ca, cb) = if ca.0 + ca.1 + ca.2 < cb.0 + cb.1 + cb.2 {
                        (a, b, ca, cb)
                    } else {
                        (b, a, cb, ca)
                    };
                    let local = interpolate(
                        mapping.corner(x + ca.0, y + ca.1, z + ca.2),
                        mapping.corner(x + cb.0, y + cb.1, z + cb.2),
                        values[a],
                        values[b],
                    );
                    edge_points[edge] = mapping.to_world(local);
                }

                for triangle in TRI_TABLE[case][..vertex_count].chunks_exact(3) {
                    let corners = [
                        edge_points[triangle[0] as usize],
                        edge_points[triangle[1] as usize],
                        edge_points[triangle[2] as usize],
                    ];

                    for (k, p) in corners.iter().enumerate() {
                        let v = (written + k) * 3;
                        vertices[v] = p.x as f32;
                        vertices[v + 1] = p.y as f32;
                        vertices[v + 2] = p.z as f32;
                        indices[written + k] = (written + k) as u32;
                    }

                    if let Some(buffer) = normals.as_deref_mut() {
                        let n = face_normal(corners[0], corners[1], corners[2]);
                        for k in 0..3 {
                            let v = (written + k) * 3;
                            buffer[v] = n.x as f32;
                            buffer[v + 1] = n.y as f32;
                            buffer[v + 2] = n.z as f32;
                        }
                    }

                    written += 3;
                }
            }
        }
    }

    Ok(written)
}

#[inline]
fn check_capacity(
    buffer: &'static str,
    actual: usize,
    needed: usize,
    field: &[f32],
    dimensions: usize,
) -> Result<()> {
    if actual >= needed {
        return Ok(());
    }
    let vertices = count(field, dimensions)?;
    let required = if buffer == "indices" { vertices } else { vertices * 3 };
    Err(Error::BufferTooSmall {
        buffer,
        required,
        actual,
    })
}

/// Count, allocate and march in one call
pub fn polygonize(
    field: &[f32],
    dimensions: usize,
    bbox: &[f32; 6],
    with_normals: bool,
) -> Result<Mesh> {
    let vertex_count = count(field, dimensions)?;

    let mut positions = vec![0.0f32; vertex_count * 3];
    let mut normals = if with_normals {
        vec![0.0f32; vertex_count * 3]
    } else {
        Vec::new()
    };
    let mut indices = vec![0u32; vertex_count];

    let normals_out = if with_normals {
        Some(normals.as_mut_slice())
    } else {
        None
    };
    let written = march(field, dimensions, bbox, &mut positions, normals_out, &mut indices)?;
    debug_assert_eq!(written, vertex_count);

    Ok(Mesh::from_buffers(positions, normals, indices))
}

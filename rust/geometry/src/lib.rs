// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! VizKit Geometry
//!
//! Side-effect-free geometry used by diagram and 3D visualization layers:
//! 2D analytic primitives for hit-testing and edge routing, bezier rounding
//! of orthogonal paths, and marching-cubes iso-surface extraction.

pub mod error;
pub mod marching_cubes;
pub mod marching_cubes_tables;
pub mod mesh;
pub mod path;
pub mod planar;

// Re-export nalgebra types for convenience
pub use nalgebra::{Matrix4, Point3, Vector3};

pub use error::{Error, Result};
pub use marching_cubes::{count, march, polygonize, ISO_LEVEL, OFFSET};
pub use mesh::Mesh;
pub use path::{bezier_path_corners, Path, PathStep};
pub use planar::{LineEquation, LineIntersection, Line, Point, Rectangle, Vector};

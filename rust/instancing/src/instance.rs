// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Host-side instance description.

use nalgebra::{Matrix4, Rotation3, Vector3};
use serde::{Deserialize, Serialize};

/// Everything the host says about one placed model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Instance {
    /// Resource id of the model.
    pub model_id: String,
    /// Id of a texture in the shared cache, replacing the model's own.
    pub texture_id: Option<String>,
    pub position: [f64; 3],
    /// Euler angles in radians, applied X then Y then Z (intrinsic).
    pub rotation: [f64; 3],
    pub scale: [f64; 3],
    /// Center the model and fit it into the handler's normalized cube.
    pub normalize: bool,
    pub color: String,
    pub selected: bool,
    pub select_color: Option<String>,
    pub hot_color: Option<String>,
}

impl Default for Instance {
    fn default() -> Self {
        Self {
            model_id: String::new(),
            texture_id: None,
            position: [0.0; 3],
            rotation: [0.0; 3],
            scale: [1.0; 3],
            normalize: false,
            color: "rgb(255,255,255)".to_string(),
            selected: false,
            select_color: None,
            hot_color: None,
        }
    }
}

impl Instance {
    pub fn new(model_id: impl Into<String>) -> Self {
        Self {
            model_id: model_id.into(),
            ..Self::default()
        }
    }

    pub fn with_position(mut self, x: f64, y: f64, z: f64) -> Self {
        self.position = [x, y, z];
        self
    }

    pub fn with_rotation(mut self, x: f64, y: f64, z: f64) -> Self {
        self.rotation = [x, y, z];
        self
    }

    pub fn with_scale(mut self, x: f64, y: f64, z: f64) -> Self {
        self.scale = [x, y, z];
        self
    }

    pub fn with_color(mut self, color: impl Into<String>) -> Self {
        self.color = color.into();
        self
    }

    pub fn with_texture(mut self, texture_id: impl Into<String>) -> Self {
        self.texture_id = Some(texture_id.into());
        self
    }

    /// Local-to-parent transform: translation × rotation × scale.
    pub fn world_matrix(&self) -> Matrix4<f64> {
        let [px, py, pz] = self.position;
        let [rx, ry, rz] = self.rotation;
        let [sx, sy, sz] = self.scale;

        let rotation = Rotation3::from_axis_angle(&Vector3::x_axis(), rx)
            * Rotation3::from_axis_angle(&Vector3::y_axis(), ry)
            * Rotation3::from_axis_angle(&Vector3::z_axis(), rz);

        Matrix4::new_translation(&Vector3::new(px, py, pz))
            * rotation.to_homogeneous()
            * Matrix4::new_nonuniform_scaling(&Vector3::new(sx, sy, sz))
    }

    #[inline]
    pub(crate) fn same_transform(&self, other: &Instance) -> bool {
        self.position == other.position
            && self.rotation == other.rotation
            && self.scale == other.scale
    }

    /// The color string in effect: hot beats selected beats base.
    pub fn display_color(&self, hot: bool) -> &str {
        match (&self.hot_color, &self.select_color) {
            (Some(hot_color), _) if hot => hot_color,
            (_, Some(select_color)) if self.selected => select_color,
            _ => &self.color,
        }
    }

    /// Key under which instances share a batch.
    ///
    /// Two instances with equal keys draw with the same model, texture and
    /// styling, so one draw call can cover both.
    pub fn grouping_key(&self, hot: bool) -> String {
        let mut key = self.model_id.clone();
        if let Some(texture_id) = &self.texture_id {
            key.push_str("_texture_");
            key.push_str(texture_id);
        }
        key.push_str("_color_");
        key.push_str(&self.color.to_lowercase());
        if let Some(select_color) = self.select_color.as_ref().filter(|_| self.selected) {
            key.push_str("_selected_");
            key.push_str(&select_color.to_lowercase());
        }
        if let Some(hot_color) = self.hot_color.as_ref().filter(|_| hot) {
            key.push_str("_hot_");
            key.push_str(&hot_color.to_lowercase());
        }
        key
    }
}

// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! # VizKit Instancing
//!
//! Shared 3D models and instanced batching for scene renderers.
//!
//! Hosts describe placed models as [`Instance`]s. The [`ModelHandler`] loads
//! each distinct model once, counts how many instances use it, and groups
//! instances with identical model, texture and styling into [`MetaMesh`]
//! batches that a renderer draws with one instanced call per submesh.
//!
//! ```no_run
//! use std::{cell::RefCell, collections::HashMap, rc::Rc};
//! use vizkit_instancing::{Instance, InstanceId, ModelHandler, TextureCache};
//! use nalgebra::Matrix4;
//!
//! # async fn run(resources: HashMap<String, String>) {
//! let textures = Rc::new(RefCell::new(TextureCache::new()));
//! let mut handler = ModelHandler::new(Box::new(resources), textures, Matrix4::identity());
//!
//! handler.add_instance(InstanceId(1), &Instance::new("truck.glb").with_position(4.0, 0.0, 0.0));
//! handler.load_models().await;
//! handler.update();
//!
//! for (_, batch) in handler.meta_meshes() {
//!     for object in batch.objects() {
//!         println!("{} instances", object.transforms.len());
//!     }
//! }
//! # }
//! ```

pub mod batch;
pub mod color;
pub mod config;
pub mod error;
pub mod handler;
pub mod instance;
pub mod keys;
pub mod loader;
pub mod model;
pub mod resources;
pub mod texture;

pub use batch::{InstancedDrawObject, MetaMesh, TargetObject};
pub use config::HandlerConfig;
pub use error::{Error, Result};
pub use handler::{LoadStats, ModelHandler, UpdateStats};
pub use instance::Instance;
pub use keys::{BatchKey, InstanceId, ModelKey, TextureKey};
pub use loader::{LoadedScene, ModelFormat, ModelLoader, SceneLoader, SceneNode};
pub use model::{Aabb, Material, MeshNode};
pub use resources::ResourceProvider;
pub use texture::{TextureCache, TextureImage};

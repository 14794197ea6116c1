// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Handle types for the handler's resource tables.
//!
//! Models, textures and batches live in slot maps; everything else refers to
//! them through these generational keys, never through pointers. A key whose
//! entry has been removed simply stops resolving.

use serde::{Deserialize, Serialize};
use slotmap::new_key_type;
use std::fmt;

new_key_type! {
    /// Key for a shared, ref-counted model.
    pub struct ModelKey;

    /// Key for a shared, ref-counted texture.
    pub struct TextureKey;

    /// Key for a batch of instances drawn together.
    pub struct BatchKey;
}

/// Host-chosen identity of an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InstanceId(pub u64);

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl From<u64> for InstanceId {
    fn from(id: u64) -> Self {
        InstanceId(id)
    }
}

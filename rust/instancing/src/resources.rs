// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Resource lookup: model payloads are base64 strings registered by id.

use crate::{Error, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use std::collections::HashMap;
use std::hash::BuildHasher;

/// Source of base64-encoded resource payloads.
pub trait ResourceProvider {
    /// The encoded payload registered under `id`.
    fn resource(&self, id: &str) -> Option<&str>;

    fn contains(&self, id: &str) -> bool {
        self.resource(id).is_some()
    }
}

impl<S: BuildHasher> ResourceProvider for HashMap<String, String, S> {
    fn resource(&self, id: &str) -> Option<&str> {
        self.get(id).map(String::as_str)
    }
}

/// Decode a resource payload.
///
/// A `data:` URI prefix and embedded whitespace are tolerated.
pub fn decode_resource(id: &str, payload: &str) -> Result<Vec<u8>> {
    let body = match payload.strip_prefix("data:") {
        Some(uri) => uri.split_once(',').map_or(uri, |(_, data)| data),
        None => payload,
    };
    let compact: String = body.chars().filter(|c| !c.is_ascii_whitespace()).collect();

    STANDARD.decode(compact).map_err(|source| Error::Decode {
        id: id.to_string(),
        source,
    })
}

/// Encode bytes the way resources are registered.
pub fn encode_resource(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

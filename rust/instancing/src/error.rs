// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Error types for model loading and instancing.

/// Result type alias for instancing operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while resolving, decoding or parsing model resources.
///
/// The handler never surfaces these to callers of the instance API; they are
/// logged at the resource that failed and that resource is dropped.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No resource is registered under this id.
    #[error("resource not found: {0}")]
    ResourceNotFound(String),

    /// No texture is registered under this id.
    #[error("texture not found: {0}")]
    TextureNotFound(String),

    /// The resource payload is not valid base64.
    #[error("resource {id} is not valid base64: {source}")]
    Decode {
        id: String,
        #[source]
        source: base64::DecodeError,
    },

    /// None of the known parsers accepted the payload.
    #[error("unrecognized model format")]
    UnknownFormat,

    /// The configured loader cannot parse this format.
    #[error("unsupported model format: {0}")]
    UnsupportedFormat(&'static str),

    /// glTF / GLB parse failure.
    #[error("glTF error: {0}")]
    Gltf(#[from] gltf::Error),

    /// Malformed XML in a COLLADA payload.
    #[error("COLLADA XML error: {0}")]
    Xml(#[from] roxmltree::Error),

    /// COLLADA parse failure.
    #[error("COLLADA error: {0}")]
    Collada(String),

    /// The scene parsed but contains no visible mesh.
    #[error("model has no visible meshes")]
    EmptyModel,

    /// Color string could not be parsed.
    #[error("invalid color: {0}")]
    InvalidColor(String),

    /// Configuration could not be read.
    #[error("invalid configuration: {0}")]
    Config(#[from] serde_json::Error),
}

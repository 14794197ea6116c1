// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use thiserror::Error;

/// Result type for geometry operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during geometry processing
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("Degenerate polygon: need at least 3 points, got {0}")]
    DegeneratePolygon(usize),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Invalid scalar field: {0}")]
    InvalidField(String),

    #[error("Output buffer too small: {buffer} needs {required} elements, has {actual}")]
    BufferTooSmall {
        buffer: &'static str,
        required: usize,
        actual: usize,
    },
}

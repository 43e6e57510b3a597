// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Errors raised while building or running a render pipeline.

use failure::Fail;

/// Everything that can go wrong between option parsing and a written
/// image.  Construction-time variants are fatal; the interactive loop
/// logs the per-frame ones and keeps going.
#[derive(Debug, Fail)]
pub enum RenderError {
    /// Options that cannot describe a pipeline (zero sizes, a mipmap
    /// level deeper than the grid, and so on).
    #[fail(display = "invalid render options: {}", _0)]
    InvalidOptions(String),

    /// A fractal coefficient that is NaN or infinite.
    #[fail(display = "invalid fractal parameter {}: {}", name, value)]
    InvalidParameters {
        /// Positional name of the offending coefficient.
        name: &'static str,
        /// The value that was rejected.
        value: f32,
    },

    /// A fractal variant name not present in the registry.
    #[fail(display = "unknown fractal variant: {}", _0)]
    UnknownFractal(String),

    /// A preset, profile or gradient name that does not exist.
    #[fail(display = "unknown preset: {}", _0)]
    UnknownPreset(String),

    /// An update message with the wrong arity or payload size.
    #[fail(display = "malformed update: {}", _0)]
    MalformedUpdate(String),

    /// A colormap violating its invariants.
    #[fail(display = "invalid colormap: {}", _0)]
    InvalidColormap(String),

    /// A worker thread panicked inside the named stage.
    #[fail(display = "worker thread panicked during {}", _0)]
    WorkerPanicked(&'static str),

    /// Writing the output failed.
    #[fail(display = "i/o error: {}", _0)]
    Io(#[cause] std::io::Error),

    /// Encoding the output image failed.
    #[fail(display = "image encoding error: {}", _0)]
    Image(String),
}

impl From<std::io::Error> for RenderError {
    fn from(err: std::io::Error) -> Self {
        RenderError::Io(err)
    }
}

impl From<image::ImageError> for RenderError {
    fn from(err: image::ImageError) -> Self {
        match err {
            image::ImageError::IoError(e) => RenderError::Io(e),
            other => RenderError::Image(other.to_string()),
        }
    }
}

/// Shorthand used by every fallible function in the crate.
pub type Result<T> = std::result::Result<T, RenderError>;

// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Writing finished images.
//!
//! The raw format is bare RGBA8, row-major, with the bottom row first.
//! PNG files keep the usual top-down order.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use image::{imageops, ImageFormat, RgbaImage};
use tracing::info;

use crate::errors::Result;

/// How an output path will be written.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    /// Bottom-up RGBA8 bytes.
    Raw,
    /// A PNG file.
    Png,
}

impl OutputFormat {
    /// PNG for a `.png` extension, in any case; raw otherwise.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("png") => OutputFormat::Png,
            _ => OutputFormat::Raw,
        }
    }
}

/// Writes the raw bytes, flipping rows so the bottom one comes first.
pub fn write_raw<W: Write>(image: &RgbaImage, mut out: W) -> Result<()> {
    let flipped = imageops::flip_vertical(image);
    out.write_all(flipped.as_raw())?;
    out.flush()?;
    Ok(())
}

/// Writes `image` to `path` in the format its extension asks for.
pub fn save(image: &RgbaImage, path: &Path) -> Result<OutputFormat> {
    let format = OutputFormat::from_path(path);
    match format {
        OutputFormat::Raw => write_raw(image, BufWriter::new(File::create(path)?))?,
        OutputFormat::Png => image.save_with_format(path, ImageFormat::Png)?,
    }
    info!(
        path = %path.display(),
        format = ?format,
        width = image.width(),
        height = image.height(),
        "image written"
    );
    Ok(format)
}

// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The density estimator decides where in the parameter plane it is
//! worth starting trajectories.
//!
//! Every cell of a square grid over [-2, 2]^2 is run through the kernel
//! once, from its centre.  Cells that escape late enough to be
//! interesting record their escape iteration as an 8-bit intensity;
//! everything else records zero.  The grid is then box-filtered down a
//! few mip levels so that the sampler sees a coarser, smoother field
//! than the one that was evaluated.

use itertools::iproduct;
use num::Complex;
use tracing::debug;

use crate::errors::{RenderError, Result};
use crate::kernel::{escape_time, Escape, FractalKernel};
use crate::planes::{Pixel, PlaneMapper, EXTENT};

/// Escapes before this iteration carry almost no structure and are
/// recorded as zero.
pub const MIN_ESCAPE_ITERATION: usize = 16;

/// Maps an escape result to its 8-bit importance.
pub fn intensity(escape: Escape) -> u8 {
    match escape {
        Escape::Escaped(i) if i >= MIN_ESCAPE_ITERATION => i.min(255) as u8,
        _ => 0,
    }
}

/// A grid of per-cell importance values over a window of the
/// parameter plane.
#[derive(Clone, Debug)]
pub struct ImportanceField {
    plane: PlaneMapper,
    values: Vec<u8>,
}

impl ImportanceField {
    /// Wraps `values` (row-major, row 0 at the bottom of the window).
    pub fn new(plane: PlaneMapper, values: Vec<u8>) -> Result<Self> {
        if values.len() != plane.len() {
            return Err(RenderError::InvalidOptions(format!(
                "importance field expects {} cells, got {}",
                plane.len(),
                values.len()
            )));
        }
        Ok(ImportanceField { plane, values })
    }

    /// A field over the canonical [-2, 2] window.
    pub fn canonical(width: usize, height: usize, values: Vec<u8>) -> Result<Self> {
        let plane = PlaneMapper::new(
            width,
            height,
            Complex::new(-EXTENT, -EXTENT),
            Complex::new(EXTENT, EXTENT),
        )?;
        ImportanceField::new(plane, values)
    }

    /// The mapping between cells and the parameter plane.
    pub fn plane(&self) -> &PlaneMapper {
        &self.plane
    }

    /// Cells per row.
    pub fn width(&self) -> usize {
        self.plane.width()
    }

    /// Number of rows.
    pub fn height(&self) -> usize {
        self.plane.height()
    }

    /// Raw cell values, row-major.
    pub fn values(&self) -> &[u8] {
        &self.values
    }

    /// The value of one cell.
    pub fn get(&self, pixel: Pixel) -> u8 {
        self.values[pixel.1 * self.width() + pixel.0]
    }

    /// Sum of all intensities.
    pub fn total(&self) -> u64 {
        self.values.iter().map(|v| u64::from(*v)).sum()
    }

    /// Halves both dimensions `levels` times, averaging 2x2 blocks and
    /// rounding to nearest, the way a mipmap chain is built.
    pub fn downsample(self, levels: u32) -> Result<ImportanceField> {
        let mut field = self;
        for _ in 0..levels {
            let (w, h) = (field.width(), field.height());
            if w < 2 || h < 2 {
                return Err(RenderError::InvalidOptions(format!(
                    "cannot downsample a {}x{} field any further",
                    w, h
                )));
            }
            let (nw, nh) = (w / 2, h / 2);
            let mut values = Vec::with_capacity(nw * nh);
            for (y, x) in iproduct!(0..nh, 0..nw) {
                let at = |dx: usize, dy: usize| u32::from(field.values[(2 * y + dy) * w + 2 * x + dx]);
                let sum = at(0, 0) + at(1, 0) + at(0, 1) + at(1, 1);
                values.push(((sum + 2) / 4) as u8);
            }
            let plane = PlaneMapper::new(
                nw,
                nh,
                field.plane.complex_plane.0,
                field.plane.complex_plane.1,
            )?;
            field = ImportanceField { plane, values };
        }
        Ok(field)
    }
}

/// Evaluates the kernel over the native grid and reduces it to the
/// sampler's resolution.
#[derive(Clone, Debug)]
pub struct DensityEstimator {
    grid: PlaneMapper,
    max_iterations: usize,
    mipmap_level: u32,
    threads: usize,
}

impl DensityEstimator {
    /// `size` is the native grid edge; the field handed to the sampler
    /// is `size >> mipmap_level` cells on a side.
    pub fn new(size: usize, max_iterations: usize, mipmap_level: u32, threads: usize) -> Result<Self> {
        if mipmap_level >= usize::BITS || size >> mipmap_level == 0 {
            return Err(RenderError::InvalidOptions(format!(
                "mipmap level {} leaves nothing of a {} grid",
                mipmap_level, size
            )));
        }
        Ok(DensityEstimator {
            grid: PlaneMapper::canonical(size)?,
            max_iterations,
            mipmap_level,
            threads: threads.max(1),
        })
    }

    /// Edge length of the field after downsampling.
    pub fn field_size(&self) -> usize {
        self.grid.width() >> self.mipmap_level
    }

    /// Runs the kernel over every native cell, in parallel bands of
    /// rows, then downsamples.
    pub fn estimate<K: FractalKernel>(&self, kernel: &K) -> Result<ImportanceField> {
        let width = self.grid.width();
        let height = self.grid.height();
        let mut values = vec![0_u8; self.grid.len()];
        let rows_per_band = (height + self.threads - 1) / self.threads;
        let grid = &self.grid;
        let max_iterations = self.max_iterations;

        crossbeam::scope(|spawner| {
            for (band, cells) in values.chunks_mut(rows_per_band * width).enumerate() {
                spawner.spawn(move |_| {
                    let first_row = band * rows_per_band;
                    let rows = cells.len() / width;
                    for (row, column) in iproduct!(0..rows, 0..width) {
                        let c = grid.pixel_center(&Pixel(column, first_row + row));
                        cells[row * width + column] = intensity(escape_time(kernel, c, max_iterations));
                    }
                });
            }
        })
        .map_err(|_| RenderError::WorkerPanicked("density estimation"))?;

        let native = ImportanceField::new(self.grid, values)?;
        let field = native.downsample(self.mipmap_level)?;
        debug!(
            cells = field.values().len(),
            total = field.total(),
            "importance field ready"
        );
        Ok(field)
    }
}

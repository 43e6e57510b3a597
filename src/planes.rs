// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Contains the PlaneMapper struct, which describes a relationship
//! between a rectangle on the integral plane with an origin at 0,0,
//! and a rectangle on the complex plane with an arbitrary pair of
//! corners defining the leftlower and rightupper corners.
//!
//! Every grid in the pipeline is described by one of these: the
//! estimator's native grid, the sampler's downsampled grid, and the
//! screen the trajectories are splatted onto.
use num::Complex;

use crate::errors::{RenderError, Result};

/// Half-width of the canonical window; both the parameter plane and
/// the screen cover [-EXTENT, EXTENT] on their shorter axis.
pub const EXTENT: f64 = 2.0;

/// Describes the width and height of an integral plane that is assumed to start at
/// 0,0 and all values are assumed to be non-negative integers.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct IntegralPlane(pub usize, pub usize);

/// Describes the lower-left corner and upper-right corner of the
/// Complex plane, treating the real part of each value as the
/// x-component and the imaginary part of each value as the
/// y-component.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct ComplexPlane(pub Complex<f64>, pub Complex<f64>);

/// The column and row of a cell.  We don't need a Point, as a single
/// Complex number is a Point.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Pixel(pub usize, pub usize);

/// Maps between an integral grid and a window of the complex plane.
#[derive(Copy, Clone, Debug)]
pub struct PlaneMapper {
    /// The right-upper hand corner of the integral cartesian plane.
    /// The left-lower is assumed to be at 0,0
    pub integral_plane: IntegralPlane,
    /// The two coordinates defining the complex cartesian plane,
    /// left-lower and right-upper
    pub complex_plane: ComplexPlane,
    // cells per unit of the complex plane, horizontally and vertically
    grid_factors: (f64, f64),
}

impl PlaneMapper {
    /// Takes the size of the integral plane and two points describing
    /// the complex plane.
    pub fn new(
        width: usize,
        height: usize,
        leftlower: Complex<f64>,
        rightupper: Complex<f64>,
    ) -> Result<PlaneMapper> {
        if width == 0 || height == 0 {
            return Err(RenderError::InvalidOptions(format!(
                "integral plane {}x{} has no cells",
                width, height
            )));
        }
        if rightupper.re <= leftlower.re {
            return Err(RenderError::InvalidOptions(
                "The left lower corner is not to the left of the right upper corner.".to_string(),
            ));
        }
        if rightupper.im <= leftlower.im {
            return Err(RenderError::InvalidOptions(
                "The left lower corner is not lower than the right upper corner".to_string(),
            ));
        }

        let region_width = rightupper.re - leftlower.re;
        let region_height = rightupper.im - leftlower.im;
        let grid_factors = (
            (width as f64) / region_width,
            (height as f64) / region_height,
        );

        Ok(PlaneMapper {
            integral_plane: IntegralPlane(width, height),
            complex_plane: ComplexPlane(leftlower, rightupper),
            grid_factors,
        })
    }

    /// A square grid over the canonical [-2, 2] window of the
    /// parameter plane.
    pub fn canonical(size: usize) -> Result<PlaneMapper> {
        PlaneMapper::new(
            size,
            size,
            Complex::new(-EXTENT, -EXTENT),
            Complex::new(EXTENT, EXTENT),
        )
    }

    /// A screen of the given size.  The shorter axis spans [-2, 2];
    /// the longer one is widened so that pixels stay square.
    pub fn screen(width: usize, height: usize) -> Result<PlaneMapper> {
        let (w, h) = (width.max(1) as f64, height.max(1) as f64);
        let (half_w, half_h) = if w >= h {
            (EXTENT * w / h, EXTENT)
        } else {
            (EXTENT, EXTENT * h / w)
        };
        PlaneMapper::new(
            width,
            height,
            Complex::new(-half_w, -half_h),
            Complex::new(half_w, half_h),
        )
    }

    /// Width of the integral plane.
    pub fn width(&self) -> usize {
        self.integral_plane.0
    }

    /// Height of the integral plane.
    pub fn height(&self) -> usize {
        self.integral_plane.1
    }

    /// The total number of points in the integral grid.  Used to
    /// calculate memory needs.
    pub fn len(&self) -> usize {
        self.integral_plane.0 * self.integral_plane.1
    }

    /// Describes that the integral plane is of a size.
    pub fn is_empty(&self) -> bool {
        self.integral_plane.0 == 0 || self.integral_plane.1 == 0
    }

    /// Width and height of one cell, in complex-plane units.
    pub fn cell_size(&self) -> (f64, f64) {
        (1.0 / self.grid_factors.0, 1.0 / self.grid_factors.1)
    }

    /// Given a complex number corresponding to a location on the
    /// complex cartesian plane, find the cell of the integral plane it
    /// falls in, or None when it falls outside.
    pub fn point_to_pixel(&self, point: &Complex<f64>) -> Option<Pixel> {
        let left = (point.re - self.complex_plane.0.re) * self.grid_factors.0;
        let top = (point.im - self.complex_plane.0.im) * self.grid_factors.1;
        // NaN fails every comparison, so check for containment.
        if !(left >= 0.0
            && left < (self.integral_plane.0 as f64)
            && top >= 0.0
            && top < (self.integral_plane.1 as f64))
        {
            return None;
        }
        Some(Pixel(left as usize, top as usize))
    }

    /// Given a pixel on the integral cartesian plane, return the
    /// complex coordinate of its lower-left corner.
    pub fn pixel_to_point(&self, pixel: &Pixel) -> Complex<f64> {
        Complex::new(
            ((pixel.0 as f64) / self.grid_factors.0) + self.complex_plane.0.re,
            ((pixel.1 as f64) / self.grid_factors.1) + self.complex_plane.0.im,
        )
    }

    /// The complex coordinate of a cell's centre.
    pub fn pixel_center(&self, pixel: &Pixel) -> Complex<f64> {
        Complex::new(
            ((pixel.0 as f64 + 0.5) / self.grid_factors.0) + self.complex_plane.0.re,
            ((pixel.1 as f64 + 0.5) / self.grid_factors.1) + self.complex_plane.0.im,
        )
    }

    /// Since the Buddhabrot tracks the progress of a complex number
    /// as it orbits, we have to map those complex numbers back to the
    /// pixel plane.  This function takes a point, maps it to pixel
    /// coordinates, then returns the linear offset from the root of
    /// the image buffer in memory, or None when it falls outside.
    pub fn point_to_offset(&self, point: &Complex<f64>) -> Option<usize> {
        self.point_to_pixel(point)
            .map(|Pixel(x, y)| y * self.integral_plane.0 + x)
    }
}

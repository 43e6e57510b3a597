// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Tone mapping from accumulated density to display colour.
//!
//! Densities are compressed with a square root against a scale that
//! depends on how much sampling effort went into the image, looked up
//! per channel in the colormap, summed in CIE XYZ and only then
//! converted to sRGB.

use image::{Rgba, RgbaImage};
use itertools::iproduct;

use crate::accumulator::AccumulationBuffer;
use crate::colormap::Colormap;

const XYZ_TO_RGB: [[f32; 3]; 3] = [
    [3.240_454_2, -1.537_138_5, -0.498_531_4],
    [-0.969_266, 1.876_010_8, 0.041_556],
    [0.055_643_4, -0.204_025_9, 1.057_225_2],
];

const RGB_TO_XYZ: [[f32; 3]; 3] = [
    [0.412_456_4, 0.357_576_1, 0.180_437_5],
    [0.212_672_9, 0.715_152_2, 0.072_175],
    [0.019_333_9, 0.119_192, 0.950_304_1],
];

fn mul(m: &[[f32; 3]; 3], v: [f32; 3]) -> [f32; 3] {
    [
        m[0][0] * v[0] + m[0][1] * v[1] + m[0][2] * v[2],
        m[1][0] * v[0] + m[1][1] * v[1] + m[1][2] * v[2],
        m[2][0] * v[0] + m[2][1] * v[1] + m[2][2] * v[2],
    ]
}

/// The sRGB transfer curve, linear near black.
pub fn transfer(r: f32) -> f32 {
    if r <= 0.003_04 {
        12.92 * r
    } else {
        1.055 * r.powf(1.0 / 2.4) - 0.055
    }
}

/// Undoes `transfer`.
pub fn inverse_transfer(c: f32) -> f32 {
    if c <= 0.003_04 * 12.92 {
        c / 12.92
    } else {
        ((c + 0.055) / 1.055).powf(2.4)
    }
}

/// XYZ to display sRGB, unclamped.
pub fn xyz_to_srgb(xyz: [f32; 3]) -> [f32; 3] {
    let rgb = mul(&XYZ_TO_RGB, xyz);
    [transfer(rgb[0]), transfer(rgb[1]), transfer(rgb[2])]
}

/// Display sRGB in [0, 1] to XYZ.
pub fn srgb_to_xyz(rgb: [f32; 3]) -> [f32; 3] {
    mul(
        &RGB_TO_XYZ,
        [
            inverse_transfer(rgb[0]),
            inverse_transfer(rgb[1]),
            inverse_transfer(rgb[2]),
        ],
    )
}

/// The density that maps to the top of the colormap.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct ToneScale(f32);

impl ToneScale {
    /// Derives the scale from the sampling effort behind an image:
    /// more trajectory steps and a finer sampling grid put more weight
    /// in the buffer, more pixels spread it thinner, and every stop of
    /// exposure halves the scale.
    pub fn new(
        width: usize,
        height: usize,
        sampler_size: usize,
        mipmap_level: u32,
        iterations: usize,
        warmup: usize,
        exposure: f32,
    ) -> Self {
        let grid = (sampler_size >> mipmap_level) as f64;
        let steps = iterations.saturating_sub(warmup).max(1) as f64;
        let pixels = (width.max(1) * height.max(1)) as f64;
        let scale = 4.0
            * 2f64.powf(-f64::from(exposure))
            * steps
            / 1000.0
            * (grid * grid / 65536.0)
            * (2048.0 * 2048.0)
            / pixels;
        ToneScale(scale as f32)
    }

    /// A scale taken as is.
    pub fn from_value(value: f32) -> Self {
        ToneScale(value)
    }

    /// The scale itself.
    pub fn value(self) -> f32 {
        self.0
    }

    /// The scale for a buffer holding the sum of `frames` frames,
    /// which may be fractional when older frames were decayed.
    pub fn over_frames(self, frames: f64) -> Self {
        ToneScale(self.0 * frames.max(1.0) as f32)
    }

    /// `sqrt(density / scale)`, clamped to [0, 1].
    pub fn compress(self, density: f32) -> f32 {
        let v = (density / self.0).sqrt();
        if v.is_nan() {
            0.0
        } else {
            v.min(1.0)
        }
    }
}

/// Turns an accumulation buffer into an image.
#[derive(Copy, Clone, Debug)]
pub struct ColorMapper {
    scale: ToneScale,
}

impl ColorMapper {
    /// A mapper for images rendered at `scale`.
    pub fn new(scale: ToneScale) -> Self {
        ColorMapper { scale }
    }

    /// The tone scale in use.
    pub fn scale(&self) -> ToneScale {
        self.scale
    }

    /// The display colour of one pixel's channels.
    pub fn map_pixel(&self, channels: &[f32], colormap: &Colormap) -> Rgba<u8> {
        let mut xyz = [0.0_f32; 3];
        for (band, density) in channels.iter().enumerate() {
            let stop = colormap.lookup(band, self.scale.compress(*density));
            for (acc, v) in xyz.iter_mut().zip(stop.iter()) {
                *acc += v;
            }
        }
        let rgb = xyz_to_srgb(xyz);
        let quantize = |c: f32| (c.max(0.0).min(1.0) * 255.0).round() as u8;
        Rgba([quantize(rgb[0]), quantize(rgb[1]), quantize(rgb[2]), 255])
    }

    /// Colours every pixel.  The buffer's first row is the bottom of
    /// the window; the image's first row is its top.
    pub fn colorize(&self, buffer: &AccumulationBuffer, colormap: &Colormap) -> RgbaImage {
        let (width, height) = (buffer.width(), buffer.height());
        let mut image = RgbaImage::new(width as u32, height as u32);
        for (y, x) in iproduct!(0..height, 0..width) {
            let color = self.map_pixel(buffer.pixel(x, y), colormap);
            image.put_pixel(x as u32, (height - 1 - y) as u32, color);
        }
        image
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transfer_is_continuous_enough() {
        assert_eq!(transfer(0.0), 0.0);
        assert!((transfer(1.0) - 1.0).abs() < 1e-6);
        let below = transfer(0.003_04);
        let above = transfer(0.003_05);
        assert!((above - below).abs() < 1e-3);
        for c in [0.0_f32, 0.01, 0.2, 0.5, 0.9, 1.0].iter() {
            assert!((transfer(inverse_transfer(*c)) - c).abs() < 1e-3);
        }
    }

    #[test]
    fn white_round_trips_through_xyz() {
        let rgb = xyz_to_srgb(srgb_to_xyz([1.0, 1.0, 1.0]));
        for c in rgb.iter() {
            assert!((c - 1.0).abs() < 1e-3);
        }
    }

    #[test]
    fn tone_scale_follows_sampling_effort() {
        let base = ToneScale::new(2048, 2048, 512, 1, 256, 4, 0.0).value();
        // (256 - 4) / 1000 * (256^2 / 65536) * 4
        assert!((base - 1.008).abs() < 1e-5);

        let brighter = ToneScale::new(2048, 2048, 512, 1, 256, 4, 1.0).value();
        assert!((brighter * 2.0 - base).abs() < 1e-5);

        let smaller = ToneScale::new(1024, 1024, 512, 1, 256, 4, 0.0).value();
        assert!((smaller - base * 4.0).abs() < 1e-4);
    }

    #[test]
    fn compress_clamps() {
        let s = ToneScale::from_value(4.0);
        assert_eq!(s.compress(0.0), 0.0);
        assert_eq!(s.compress(1.0), 0.5);
        assert_eq!(s.compress(100.0), 1.0);
        assert_eq!(s.compress(-1.0), 0.0);
    }

    #[test]
    fn empty_density_is_black() {
        let mapper = ColorMapper::new(ToneScale::from_value(1.0));
        let px = mapper.map_pixel(&[0.0, 0.0, 0.0], &Colormap::default());
        assert_eq!(px, Rgba([0, 0, 0, 255]));
    }

    #[test]
    fn colorize_puts_the_bottom_row_last() {
        let mut buffer = AccumulationBuffer::new(2, 2, 3);
        // Saturate the first band of pixel (0, 0), the bottom left.
        buffer.add(0, 0, 10.0);
        let mapper = ColorMapper::new(ToneScale::from_value(1.0));
        let image = mapper.colorize(&buffer, &Colormap::default());
        assert_ne!(*image.get_pixel(0, 1), Rgba([0, 0, 0, 255]));
        assert_eq!(*image.get_pixel(0, 0), Rgba([0, 0, 0, 255]));
        assert_eq!(*image.get_pixel(1, 1), Rgba([0, 0, 0, 255]));
    }
}

// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Colormaps: ordered colour stops, looked up with linear
//! interpolation.
//!
//! A colormap comes in one of two forms.  The channel form holds three
//! independent gradients of CIE XYZ stops, one per accumulation band.
//! The packed form holds a single gradient of 8-bit RGBA display
//! colours, shared by every band.

use crate::colorize::srgb_to_xyz;
use crate::errors::{RenderError, Result};

/// Fewest stops a colormap may have.
pub const MIN_STOPS: usize = 2;

/// Stops in each of the built-in named gradients.
pub const GRADIENT_STOPS: usize = 50;

// Display colours of the built-in gradients; each fades in from black.
const NAMED_COLORS: [(&str, [u8; 3]); 3] = [
    ("royalblue", [65, 105, 225]),
    ("lime", [0, 255, 0]),
    ("red", [255, 0, 0]),
];

/// Names accepted by `Colormap::named`.
pub const COLORMAP_NAMES: [&str; 5] = ["default", "classic", "royalblue", "lime", "red"];

/// A colour lookup table.
#[derive(Clone, Debug, PartialEq)]
pub enum Colormap {
    /// Three gradients of XYZ stops, all the same length.
    Channels([Vec<[f32; 3]>; 3]),
    /// One gradient of RGBA bytes.
    Packed(Vec<[u8; 4]>),
}

impl Default for Colormap {
    /// Two stops per band, from black to a dim Z, Y and X primary
    /// respectively.
    fn default() -> Self {
        Colormap::Channels([
            vec![[0.0, 0.0, 0.0], [0.0, 0.0, 0.3]],
            vec![[0.0, 0.0, 0.0], [0.0, 0.3, 0.0]],
            vec![[0.0, 0.0, 0.0], [0.3, 0.0, 0.0]],
        ])
    }
}

fn lerp(a: [f32; 3], b: [f32; 3], t: f32) -> [f32; 3] {
    [
        a[0] + (b[0] - a[0]) * t,
        a[1] + (b[1] - a[1]) * t,
        a[2] + (b[2] - a[2]) * t,
    ]
}

fn packed_to_xyz(stop: [u8; 4]) -> [f32; 3] {
    srgb_to_xyz([
        f32::from(stop[0]) / 255.0,
        f32::from(stop[1]) / 255.0,
        f32::from(stop[2]) / 255.0,
    ])
}

// CIE L* of an XYZ colour, against a white of Y = 1.
fn lightness(xyz: [f32; 3]) -> f32 {
    let y = xyz[1];
    let f = if y > 0.008_856_452 {
        y.cbrt()
    } else {
        y / 0.128_418_55 + 0.137_931_034
    };
    116.0 * f - 16.0
}

// The colour `t` of the way from black to `rgb`, mixed on display
// values, in XYZ.
fn display_mix(rgb: [u8; 3], t: f32) -> [f32; 3] {
    srgb_to_xyz([
        f32::from(rgb[0]) / 255.0 * t,
        f32::from(rgb[1]) / 255.0 * t,
        f32::from(rgb[2]) / 255.0 * t,
    ])
}

// Bisects for the mix whose lightness lies `target` of the way from
// black's to the full colour's.
fn even_lightness(rgb: [u8; 3], target: f32) -> f32 {
    let dark = lightness(display_mix(rgb, 0.0));
    let bright = lightness(display_mix(rgb, 1.0));
    let ideal = dark + (bright - dark) * target;
    let (mut lo, mut hi, mut t) = (0.0_f32, 1.0_f32, target);
    for _ in 0..20 {
        let diff = lightness(display_mix(rgb, t)) - ideal;
        if diff.abs() <= 1e-2 {
            break;
        }
        if diff < 0.0 {
            lo = t;
            t += (hi - t) * 0.5;
        } else {
            hi = t;
            t += (lo - t) * 0.5;
        }
    }
    t
}

// `stops` XYZ stops from black to the display colour, spaced evenly in
// perceived lightness.
fn gradient(rgb: [u8; 3], stops: usize) -> Vec<[f32; 3]> {
    (0..stops)
        .map(|i| display_mix(rgb, even_lightness(rgb, i as f32 / (stops - 1) as f32)))
        .collect()
}

fn named_gradient(name: &str) -> Option<Vec<[f32; 3]>> {
    NAMED_COLORS
        .iter()
        .find(|(n, _)| *n == name)
        .map(|(_, rgb)| gradient(*rgb, GRADIENT_STOPS))
}

impl Colormap {
    /// A channel colormap.  The three gradients must agree in length,
    /// have at least two stops and hold only finite values.
    pub fn from_channels(bands: [Vec<[f32; 3]>; 3]) -> Result<Self> {
        let len = bands[0].len();
        if len < MIN_STOPS {
            return Err(RenderError::InvalidColormap(format!(
                "a colormap needs at least {} stops, got {}",
                MIN_STOPS, len
            )));
        }
        if bands.iter().any(|b| b.len() != len) {
            return Err(RenderError::InvalidColormap(format!(
                "band lengths differ: {}, {}, {}",
                bands[0].len(),
                bands[1].len(),
                bands[2].len()
            )));
        }
        if bands.iter().flatten().flatten().any(|v| !v.is_finite()) {
            return Err(RenderError::InvalidColormap(
                "colormap stops must be finite".to_string(),
            ));
        }
        Ok(Colormap::Channels(bands))
    }

    /// A packed colormap of at least two stops.
    pub fn from_packed(stops: Vec<[u8; 4]>) -> Result<Self> {
        if stops.len() < MIN_STOPS {
            return Err(RenderError::InvalidColormap(format!(
                "a colormap needs at least {} stops, got {}",
                MIN_STOPS,
                stops.len()
            )));
        }
        Ok(Colormap::Packed(stops))
    }

    /// One of the built-in colormaps.  `default` uses the three named
    /// gradients for the three bands, `classic` is `Colormap::default()`,
    /// and a gradient name puts that gradient on every band.
    pub fn named(name: &str) -> Result<Self> {
        match name {
            "classic" => Ok(Colormap::default()),
            "default" => {
                let band = |n: &str| named_gradient(n).unwrap_or_default();
                Colormap::from_channels([band("royalblue"), band("lime"), band("red")])
            }
            _ => match named_gradient(name) {
                Some(g) => Colormap::from_channels([g.clone(), g.clone(), g]),
                None => Err(RenderError::InvalidColormap(format!(
                    "no colormap named {}; try one of {}",
                    name,
                    COLORMAP_NAMES.join(", ")
                ))),
            },
        }
    }

    /// Stops per band.
    pub fn len(&self) -> usize {
        match self {
            Colormap::Channels(bands) => bands[0].len(),
            Colormap::Packed(stops) => stops.len(),
        }
    }

    /// Never true for a validated colormap.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stop `index` of `band`, in XYZ.  Packed colormaps return the
    /// same stop for every band.
    pub fn stop(&self, band: usize, index: usize) -> [f32; 3] {
        match self {
            Colormap::Channels(bands) => bands[band.min(2)][index],
            Colormap::Packed(stops) => packed_to_xyz(stops[index]),
        }
    }

    /// The colour at position `v` in [0, 1] of `band`.  `v` is mapped
    /// to the fractional stop index `v * (len - 0.5)` and interpolated
    /// between its two neighbours, clamping at the last stop.
    pub fn lookup(&self, band: usize, v: f32) -> [f32; 3] {
        if self.is_empty() {
            return [0.0; 3];
        }
        let last = self.len() - 1;
        let p = (v.max(0.0).min(1.0)) * (self.len() as f32 - 0.5);
        let i = (p.floor() as usize).min(last);
        let j = (i + 1).min(last);
        lerp(self.stop(band, i), self.stop(band, j), p - i as f32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(len: usize) -> Vec<[f32; 3]> {
        (0..len).map(|i| [i as f32, 0.0, 1.0]).collect()
    }

    #[test]
    fn stops_read_back_as_written() {
        for len in [2, 3, 17].iter() {
            let cm = Colormap::from_channels([ramp(*len), ramp(*len), ramp(*len)]).unwrap();
            assert_eq!(cm.len(), *len);
            for i in 0..*len {
                assert_eq!(cm.stop(1, i), [i as f32, 0.0, 1.0]);
            }
        }
    }

    #[test]
    fn short_or_ragged_colormaps_are_rejected() {
        assert!(Colormap::from_channels([ramp(1), ramp(1), ramp(1)]).is_err());
        assert!(Colormap::from_channels([ramp(2), ramp(3), ramp(2)]).is_err());
        assert!(Colormap::from_packed(vec![[0, 0, 0, 255]]).is_err());
        assert!(Colormap::from_packed(vec![[0, 0, 0, 255], [255, 255, 255, 255]]).is_ok());

        let mut bad = ramp(2);
        bad[1][0] = std::f32::NAN;
        assert!(Colormap::from_channels([bad, ramp(2), ramp(2)]).is_err());
    }

    #[test]
    fn lookup_interpolates_in_index_space() {
        let cm = Colormap::from_channels([ramp(3), ramp(3), ramp(3)]).unwrap();
        assert_eq!(cm.lookup(0, 0.0), [0.0, 0.0, 1.0]);
        // 0.4 * 2.5 = 1.0
        assert!((cm.lookup(0, 0.4)[0] - 1.0).abs() < 1e-6);
        // 0.5 * 2.5 = 1.25
        assert!((cm.lookup(0, 0.5)[0] - 1.25).abs() < 1e-6);
        assert_eq!(cm.lookup(0, 1.0), [2.0, 0.0, 1.0]);
        assert_eq!(cm.lookup(0, 7.0), [2.0, 0.0, 1.0]);
    }

    #[test]
    fn default_bands_light_different_axes() {
        let cm = Colormap::default();
        assert_eq!(cm.lookup(0, 1.0), [0.0, 0.0, 0.3]);
        assert_eq!(cm.lookup(1, 1.0), [0.0, 0.3, 0.0]);
        assert_eq!(cm.lookup(2, 1.0), [0.3, 0.0, 0.0]);
    }

    #[test]
    fn named_colormaps() {
        let cm = Colormap::named("default").unwrap();
        assert_eq!(cm.len(), GRADIENT_STOPS);
        assert_eq!(cm.stop(0, 0), [0.0, 0.0, 0.0]);
        // Pure red ends on the red primary's XYZ.
        let red_end = cm.stop(2, GRADIENT_STOPS - 1);
        assert!((red_end[0] - 0.412_456_4).abs() < 1e-5);
        for name in COLORMAP_NAMES.iter() {
            assert!(Colormap::named(name).is_ok());
        }
        assert!(Colormap::named("viridis").is_err());
    }

    #[test]
    fn named_gradients_brighten_evenly() {
        for (_, rgb) in NAMED_COLORS.iter() {
            let g = gradient(*rgb, GRADIENT_STOPS);
            let top = lightness(g[GRADIENT_STOPS - 1]);
            assert!(lightness(g[0]).abs() < 1e-3);
            for (i, stop) in g.iter().enumerate() {
                let want = top * i as f32 / (GRADIENT_STOPS - 1) as f32;
                assert!((lightness(*stop) - want).abs() < 0.05, "{:?} stop {}", rgb, i);
            }
        }
    }

    #[test]
    fn packed_stops_are_shared_by_every_band() {
        let cm = Colormap::from_packed(vec![[0, 0, 0, 255], [255, 255, 255, 255]]).unwrap();
        assert_eq!(cm.lookup(0, 1.0), cm.lookup(2, 1.0));
        assert!((cm.lookup(1, 1.0)[1] - 1.0).abs() < 1e-3);
    }
}

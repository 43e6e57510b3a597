// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The fractal itself: a map `z -> f(z, c)` and a projection of the
//! four-dimensional state `(z, c)` onto the screen.
//!
//! The pipeline never looks inside a kernel.  It asks for one
//! iteration at a time and for the screen position of a state, and
//! nothing else, so any recurrence that can answer those two
//! questions can be rendered.  Kernels are configured once per frame
//! from an immutable `FractalParameters` snapshot.

use std::fmt;
use std::str::FromStr;

use num::Complex;

use crate::errors::{RenderError, Result};

/// Squared magnitude beyond which a trajectory counts as escaped.
pub const ESCAPE_RADIUS_SQ: f64 = 16.0;

const DEG2RAD: f64 = std::f64::consts::PI / 180.0;

/// Positional names of the thirteen coefficients, in wire order.
pub const PARAMETER_NAMES: [&str; 13] = [
    "z3_scaler",
    "z3_angle",
    "z3_yscale",
    "z2_scaler",
    "z2_angle",
    "z2_yscale",
    "z1_scaler",
    "z1_angle",
    "z1_yscale",
    "rotation_zxcx",
    "rotation_zxcy",
    "rotation_zycx",
    "rotation_zycy",
];

/// The thirteen scalar knobs of the generalized map.  Three "lobes"
/// scale and rotate the cubic, quadratic and linear terms; four angles
/// (in degrees) rotate the projection basis through the planes mixing
/// the real and imaginary axes of `z` and `c`.
#[derive(Copy, Clone, Debug, PartialEq)]
#[allow(missing_docs)]
pub struct FractalParameters {
    pub z3_scaler: f32,
    pub z3_angle: f32,
    pub z3_yscale: f32,
    pub z2_scaler: f32,
    pub z2_angle: f32,
    pub z2_yscale: f32,
    pub z1_scaler: f32,
    pub z1_angle: f32,
    pub z1_yscale: f32,
    pub rotation_zxcx: f32,
    pub rotation_zxcy: f32,
    pub rotation_zycx: f32,
    pub rotation_zycy: f32,
}

impl Default for FractalParameters {
    /// The classic Buddhabrot, `z^2 + c`, seen straight on.
    fn default() -> Self {
        FractalParameters::from_array([
            0.0, 0.0, 1.0, 1.0, 0.0, 1.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0,
        ])
    }
}

impl FractalParameters {
    /// Builds parameters from the thirteen values in wire order.
    pub fn from_array(v: [f32; 13]) -> Self {
        FractalParameters {
            z3_scaler: v[0],
            z3_angle: v[1],
            z3_yscale: v[2],
            z2_scaler: v[3],
            z2_angle: v[4],
            z2_yscale: v[5],
            z1_scaler: v[6],
            z1_angle: v[7],
            z1_yscale: v[8],
            rotation_zxcx: v[9],
            rotation_zxcy: v[10],
            rotation_zycx: v[11],
            rotation_zycy: v[12],
        }
    }

    /// Like `from_array`, but for a slice of unknown length.  Anything
    /// other than exactly thirteen values is rejected whole.
    pub fn from_slice(values: &[f32]) -> Result<Self> {
        if values.len() != PARAMETER_NAMES.len() {
            return Err(RenderError::MalformedUpdate(format!(
                "expected {} parameters, got {}",
                PARAMETER_NAMES.len(),
                values.len()
            )));
        }
        let mut v = [0.0_f32; 13];
        v.copy_from_slice(values);
        Ok(FractalParameters::from_array(v))
    }

    /// Positional names, in wire order.
    pub fn names() -> &'static [&'static str] {
        &PARAMETER_NAMES
    }

    /// The coefficients in wire order.
    pub fn to_array(&self) -> [f32; 13] {
        [
            self.z3_scaler,
            self.z3_angle,
            self.z3_yscale,
            self.z2_scaler,
            self.z2_angle,
            self.z2_yscale,
            self.z1_scaler,
            self.z1_angle,
            self.z1_yscale,
            self.rotation_zxcx,
            self.rotation_zxcy,
            self.rotation_zycx,
            self.rotation_zycy,
        ]
    }

    /// Sets one coefficient by its positional name.
    pub fn set(&mut self, name: &str, value: f32) -> Result<()> {
        let index = PARAMETER_NAMES
            .iter()
            .position(|n| *n == name)
            .ok_or_else(|| RenderError::MalformedUpdate(format!("no parameter named {}", name)))?;
        let mut v = self.to_array();
        v[index] = value;
        *self = FractalParameters::from_array(v);
        Ok(())
    }

    /// Rejects NaN and infinite coefficients.
    pub fn validate(&self) -> Result<()> {
        for (name, value) in PARAMETER_NAMES.iter().zip(self.to_array().iter()) {
            if !value.is_finite() {
                return Err(RenderError::InvalidParameters {
                    name: *name,
                    value: *value,
                });
            }
        }
        Ok(())
    }

    /// Looks up one of the named presets.
    pub fn preset(name: &str) -> Result<Self> {
        PRESETS
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, v)| FractalParameters::from_array(*v))
            .ok_or_else(|| RenderError::UnknownPreset(name.to_string()))
    }
}

/// Named starting points for exploration.
pub const PRESETS: [(&str, [f32; 13]); 8] = [
    // z^2 + c
    ("buddhabrot", [0.0, 0.0, 1.0, 1.0, 0.0, 1.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0]),
    // conj(z)^2 + c
    ("tricorn", [0.0, 0.0, 1.0, 1.0, 0.0, -1.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0]),
    // z^3 + c
    ("z3", [1.0, 0.0, 1.0, 0.0, 0.0, 1.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0]),
    // conj(z)^3 + c
    ("quadcorn", [1.0, 0.0, -1.0, 0.0, 0.0, 1.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0]),
    ("quad-spiral", [1.0, 0.0, -1.0, 0.0, 0.0, 1.0, 0.95, 170.0, 1.0, 0.0, 0.0, 0.0, 0.0]),
    ("double-buddha", [1.0, 180.0, 1.0, 0.0, 0.0, 1.0, 0.5, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0]),
    ("chain", [0.58, 180.0, 1.0, 0.0, 0.0, 1.0, 1.68, 180.0, 1.0, 0.0, 0.0, 0.0, 0.0]),
    ("pyramid", [0.0, 0.0, 1.0, 1.0, -180.0, 1.0, 1.7, 180.0, 0.0, 0.0, 0.0, 0.0, 0.0]),
];

/// What the pipeline needs from a fractal.  Implementations are plain
/// values built from a parameter snapshot; the pipeline is generic
/// over them, so the choice is made once when it is built.
pub trait FractalKernel: Send + Sync + Sized {
    /// Registry name.
    const NAME: &'static str;

    /// How many of the snapshot's coefficients this kernel reads.
    const PARAMETER_COUNT: usize;

    /// Builds the kernel for one frame.
    fn configure(parameters: &FractalParameters) -> Result<Self>;

    /// One step of the recurrence.
    fn iterate(&self, z: Complex<f64>, c: Complex<f64>) -> Complex<f64>;

    /// Where the state `(z, c)` lands on the screen, as a point of the
    /// [-2, 2] screen window.
    fn project(&self, z: Complex<f64>, c: Complex<f64>) -> Complex<f64>;
}

/// A 2x2 matrix acting on a complex number viewed as a 2-vector:
/// rotate by `angle`, scale by `scaler`, then stretch the imaginary
/// axis by `yscale` (a negative `yscale` conjugates).
#[derive(Copy, Clone, Debug, PartialEq)]
struct Lobe {
    m: [f64; 4],
}

impl Lobe {
    fn new(scaler: f32, angle: f32, yscale: f32) -> Self {
        let (s, t, y) = (
            f64::from(scaler),
            f64::from(angle) * DEG2RAD,
            f64::from(yscale),
        );
        Lobe {
            m: [t.cos() * s, -t.sin() * s, t.sin() * s * y, t.cos() * s * y],
        }
    }

    #[inline]
    fn apply(&self, v: Complex<f64>) -> Complex<f64> {
        Complex::new(
            self.m[0] * v.re + self.m[1] * v.im,
            self.m[2] * v.re + self.m[3] * v.im,
        )
    }
}

/// Rotates `v` by `angle` degrees in the plane spanned by axes `i1`
/// and `i2`.
fn rotate4(v: [f64; 4], angle: f32, i1: usize, i2: usize) -> [f64; 4] {
    let theta = f64::from(angle) * DEG2RAD;
    let (sin, cos) = theta.sin_cos();
    let mut r = v;
    r[i1] = cos * v[i1] + sin * v[i2];
    r[i2] = -sin * v[i1] + cos * v[i2];
    r
}

/// Builds the two projection directions from the four exposed angles.
/// The axes are (Re z, Im z, Re c, Im c); the planes (Re z, Im z) and
/// (Re c, Im c) are not exposed and stay unrotated.
fn projection_basis(p: &FractalParameters) -> ([f64; 4], [f64; 4]) {
    let planes = [
        (p.rotation_zxcx, 0, 2),
        (p.rotation_zxcy, 0, 3),
        (p.rotation_zycx, 1, 2),
        (p.rotation_zycy, 1, 3),
    ];
    let mut e1 = [1.0, 0.0, 0.0, 0.0];
    let mut e2 = [0.0, 1.0, 0.0, 0.0];
    for (angle, i1, i2) in planes.iter() {
        e1 = rotate4(e1, *angle, *i1, *i2);
        e2 = rotate4(e2, *angle, *i1, *i2);
    }
    (e1, e2)
}

#[inline]
fn dot4(e: &[f64; 4], z: Complex<f64>, c: Complex<f64>) -> f64 {
    e[0] * z.re + e[1] * z.im + e[2] * c.re + e[3] * c.im
}

/// `f(z, c) = M3 z^3 + M2 z^2 + M1 z + c`, projected through a 4D
/// rotation.  The default parameters reduce it to the Buddhabrot.
#[derive(Clone, Debug, PartialEq)]
pub struct PolynomialKernel {
    z3: Lobe,
    z2: Lobe,
    z1: Lobe,
    e1: [f64; 4],
    e2: [f64; 4],
}

impl FractalKernel for PolynomialKernel {
    const NAME: &'static str = "polynomial";
    const PARAMETER_COUNT: usize = 13;

    fn configure(p: &FractalParameters) -> Result<Self> {
        p.validate()?;
        let (e1, e2) = projection_basis(p);
        Ok(PolynomialKernel {
            z3: Lobe::new(p.z3_scaler, p.z3_angle, p.z3_yscale),
            z2: Lobe::new(p.z2_scaler, p.z2_angle, p.z2_yscale),
            z1: Lobe::new(p.z1_scaler, p.z1_angle, p.z1_yscale),
            e1,
            e2,
        })
    }

    #[inline]
    fn iterate(&self, z: Complex<f64>, c: Complex<f64>) -> Complex<f64> {
        let xx = z.re * z.re;
        let yy = z.im * z.im;
        let z2 = Complex::new(xx - yy, z.re * z.im * 2.0);
        let z3 = Complex::new(xx * z.re - 3.0 * z.re * yy, 3.0 * xx * z.im - yy * z.im);
        self.z3.apply(z3) + self.z2.apply(z2) + self.z1.apply(z) + c
    }

    #[inline]
    fn project(&self, z: Complex<f64>, c: Complex<f64>) -> Complex<f64> {
        Complex::new(dot4(&self.e1, z, c), dot4(&self.e2, z, c))
    }
}

/// Plain `z^2 + c`, seen straight on.  Ignores the snapshot; useful as
/// a fast reference.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct ClassicKernel;

impl FractalKernel for ClassicKernel {
    const NAME: &'static str = "classic";
    const PARAMETER_COUNT: usize = 0;

    fn configure(_parameters: &FractalParameters) -> Result<Self> {
        Ok(ClassicKernel)
    }

    #[inline]
    fn iterate(&self, z: Complex<f64>, c: Complex<f64>) -> Complex<f64> {
        z * z + c
    }

    #[inline]
    fn project(&self, z: Complex<f64>, _c: Complex<f64>) -> Complex<f64> {
        z
    }
}

/// The registry of kernels the binaries can build a pipeline around.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FractalVariant {
    /// `PolynomialKernel`
    Polynomial,
    /// `ClassicKernel`
    Classic,
}

impl FractalVariant {
    /// Every registered variant.
    pub const ALL: [FractalVariant; 2] = [FractalVariant::Polynomial, FractalVariant::Classic];

    /// Registry name.
    pub fn name(self) -> &'static str {
        match self {
            FractalVariant::Polynomial => PolynomialKernel::NAME,
            FractalVariant::Classic => ClassicKernel::NAME,
        }
    }

    /// How many snapshot coefficients the variant reads.
    pub fn parameter_count(self) -> usize {
        match self {
            FractalVariant::Polynomial => PolynomialKernel::PARAMETER_COUNT,
            FractalVariant::Classic => ClassicKernel::PARAMETER_COUNT,
        }
    }
}

impl FromStr for FractalVariant {
    type Err = RenderError;

    fn from_str(s: &str) -> Result<Self> {
        FractalVariant::ALL
            .iter()
            .copied()
            .find(|v| v.name() == s)
            .ok_or_else(|| RenderError::UnknownFractal(s.to_string()))
    }
}

impl fmt::Display for FractalVariant {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// How a trajectory ended.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Escape {
    /// Escaped on this (0-based) iteration.
    Escaped(usize),
    /// Still bounded at the cap, or stuck on a fixed point.
    Bounded,
}

/// Iterates `kernel` from `z = 0` with constant `c` for at most
/// `max_iterations` steps.  A step that returns its own input is a
/// fixed point and ends the walk as `Bounded` at once.
pub fn escape_time<K: FractalKernel>(kernel: &K, c: Complex<f64>, max_iterations: usize) -> Escape {
    let mut z = Complex::new(0.0, 0.0);
    for i in 0..max_iterations {
        let next = kernel.iterate(z, c);
        if next == z {
            return Escape::Bounded;
        }
        z = next;
        if z.norm_sqr() > ESCAPE_RADIUS_SQ {
            return Escape::Escaped(i);
        }
    }
    Escape::Bounded
}

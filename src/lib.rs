#![warn(missing_docs)]
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Hyperbuddha: an importance-sampled Buddhabrot renderer
//!
//! The Buddhabrot plots, instead of how fast points of the complex
//! plane escape under `z -> z^2 + c`, where their orbits go on the way
//! out.  Every state visited by an escaping orbit lands on a pixel and
//! bumps it, and the resulting density is the image.
//!
//! This crate generalizes the map to `M3 z^3 + M2 z^2 + M1 z + c`, with
//! each `Mk` a small rotation-and-scale matrix, and looks at the
//! four-dimensional state `(z, c)` through an arbitrary rotation, so the
//! classic image is one view among many.
//!
//! Most starting points are wasted on orbits that never escape or leave
//! at once, so rendering runs as a pipeline:
//!
//! 1. the `estimator` evaluates escape time on a coarse grid and keeps
//!    the cells whose orbits are long enough to matter;
//! 2. the `sampler` draws starting points around those cells, weighted
//!    so that every cell contributes the same total;
//! 3. the `accumulator` follows each orbit and splats it into one of
//!    three channels chosen by how long it took to escape;
//! 4. the `denoise` module combines several such frames with a
//!    variance-guided non-local means filter;
//! 5. `colorize` tone maps the density through a `colormap`.
//!
//! `pipeline::Renderer` runs all of it for one fractal kernel;
//! `interactive` keeps it running against live parameter updates.

pub mod accumulator;
pub mod colorize;
pub mod colormap;
pub mod denoise;
pub mod errors;
pub mod estimator;
pub mod interactive;
pub mod kernel;
pub mod output;
pub mod pipeline;
pub mod planes;
pub mod sampler;
pub mod snapshot;
pub mod updates;

pub use crate::accumulator::{AccumulationBuffer, ChannelLayout, TrajectoryAccumulator};
pub use crate::colorize::{ColorMapper, ToneScale};
pub use crate::colormap::Colormap;
pub use crate::denoise::{DenoiseStatistics, FrameSampleSet, NlmFilter};
pub use crate::errors::{RenderError, Result};
pub use crate::estimator::{DensityEstimator, ImportanceField};
pub use crate::interactive::{run, FrameHistory, FrameSink, RenderContext};
pub use crate::kernel::{
    ClassicKernel, FractalKernel, FractalParameters, FractalVariant, PolynomialKernel,
};
pub use crate::pipeline::{RenderOptions, Renderer};
pub use crate::planes::{Pixel, PlaneMapper};
pub use crate::sampler::{ImportanceSampler, SamplePoint, SamplingPolicy};
pub use crate::snapshot::{LiveInputs, SharedInputs, SnapshotCell};
pub use crate::updates::{UpdateMessage, Updater};

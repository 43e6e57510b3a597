// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Wires the stages together.
//!
//! A `Renderer` owns one instance of every stage, built once from a
//! `RenderOptions` and monomorphized over the fractal kernel.  A frame
//! runs estimator, sampler and accumulator in order, each stage fully
//! finished before the next reads its output.  A denoised render reuses
//! one importance field for every frame, since all of them draw from
//! the same parameters.

use std::time::Instant;

use image::RgbaImage;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info};

use crate::accumulator::{AccumulationBuffer, ChannelLayout, TrajectoryAccumulator};
use crate::colorize::{ColorMapper, ToneScale};
use crate::colormap::Colormap;
use crate::denoise::{FrameSampleSet, NlmFilter};
use crate::errors::{RenderError, Result};
use crate::estimator::{DensityEstimator, ImportanceField};
use crate::kernel::{FractalKernel, FractalParameters};
use crate::sampler::{ImportanceSampler, SamplingPolicy, MAX_SAMPLES};

/// Longest trajectory that may be requested.
pub const MAX_RENDER_ITERATIONS: usize = 1024;

const PROFILE_SIZES: [usize; 3] = [512, 1024, 2048];
const PROFILE_BOUNDS: [(&str, u64); 5] = [
    ("10k", 10_000),
    ("20k", 20_000),
    ("50k", 50_000),
    ("100k", 100_000),
    ("200k", 200_000),
];

/// The profile used when none is named.
pub const DEFAULT_PROFILE: &str = "512/50k";

/// Everything that shapes a render, apart from the fractal itself.
#[derive(Clone, Debug, PartialEq)]
pub struct RenderOptions {
    /// Edge of the estimator's native grid.
    pub sampler_size: usize,
    /// How many times the grid is halved before sampling.
    pub mipmap_level: u32,
    /// Escape-time budget of the estimator.
    pub sampler_max_iterations: usize,
    /// How many points to draw.
    pub policy: SamplingPolicy,
    /// Output width in pixels.
    pub width: usize,
    /// Output height in pixels.
    pub height: usize,
    /// Channel routing of the accumulator.
    pub layout: ChannelLayout,
    /// Trajectory cap; the layout's own cap when `None`.
    pub iterations: Option<usize>,
    /// Frames averaged by a denoised render.
    pub denoise_frames: usize,
    /// Stops of exposure; each one doubles the brightness.
    pub exposure: f32,
    /// Worker threads per parallel stage.
    pub threads: usize,
    /// Makes renders reproducible when set.
    pub seed: Option<u64>,
}

impl Default for RenderOptions {
    fn default() -> Self {
        RenderOptions {
            sampler_size: 1024,
            mipmap_level: 1,
            sampler_max_iterations: 256,
            policy: SamplingPolicy::LowerBound(1_000_000),
            width: 1920,
            height: 1080,
            layout: ChannelLayout::Spectral,
            iterations: None,
            denoise_frames: 20,
            exposure: 0.0,
            threads: num_cpus::get(),
            seed: None,
        }
    }
}

impl RenderOptions {
    /// Every profile name, in order of cost.
    pub fn profile_names() -> Vec<String> {
        PROFILE_SIZES
            .iter()
            .flat_map(|size| {
                PROFILE_BOUNDS
                    .iter()
                    .map(move |(bound, _)| format!("{}/{}", size, bound))
            })
            .collect()
    }

    /// A named profile, `"<sampler size>/<lower bound>"`, such as
    /// `"512/50k"`.
    pub fn profile(name: &str) -> Result<Self> {
        let unknown = || RenderError::UnknownPreset(format!("profile {}", name));
        let mut parts = name.splitn(2, '/');
        let size = parts
            .next()
            .and_then(|s| s.parse::<usize>().ok())
            .filter(|s| PROFILE_SIZES.contains(s))
            .ok_or_else(unknown)?;
        let bound = parts
            .next()
            .and_then(|b| PROFILE_BOUNDS.iter().find(|(n, _)| *n == b))
            .map(|(_, v)| *v)
            .ok_or_else(unknown)?;
        Ok(RenderOptions {
            sampler_size: size,
            mipmap_level: 1,
            sampler_max_iterations: 512,
            policy: SamplingPolicy::LowerBound(bound),
            width: 2048,
            height: 2048,
            ..RenderOptions::default()
        })
    }

    /// The trajectory cap actually used.
    pub fn render_iterations(&self) -> usize {
        self.iterations.unwrap_or_else(|| self.layout.trajectory_cap())
    }

    /// The tone scale matching these options.
    pub fn tone_scale(&self) -> ToneScale {
        ToneScale::new(
            self.width,
            self.height,
            self.sampler_size,
            self.mipmap_level,
            self.render_iterations(),
            self.layout.warmup(),
            self.exposure,
        )
    }

    /// Rejects options no pipeline can be built from.
    pub fn validate(&self) -> Result<()> {
        let fail = |msg: String| Err(RenderError::InvalidOptions(msg));
        if self.width == 0 || self.height == 0 {
            return fail(format!("image size {}x{} is empty", self.width, self.height));
        }
        if self.sampler_size == 0 {
            return fail("sampler size must be positive".to_string());
        }
        if self.mipmap_level >= usize::BITS || self.sampler_size >> self.mipmap_level == 0 {
            return fail(format!(
                "mipmap level {} leaves nothing of a {} grid",
                self.mipmap_level, self.sampler_size
            ));
        }
        if self.sampler_max_iterations == 0 {
            return fail("sampler iterations must be positive".to_string());
        }
        let iterations = self.render_iterations();
        if iterations == 0 || iterations > MAX_RENDER_ITERATIONS {
            return fail(format!(
                "render iterations must be between 1 and {}, got {}",
                MAX_RENDER_ITERATIONS, iterations
            ));
        }
        match self.policy {
            SamplingPolicy::LowerBound(floor) if floor > MAX_SAMPLES => {
                return fail(format!("at most {} samples per frame, got {}", MAX_SAMPLES, floor));
            }
            SamplingPolicy::Multiplier(0) => return fail("multiplier must be positive".to_string()),
            _ => {}
        }
        if self.denoise_frames == 0 {
            return fail("at least one frame is needed".to_string());
        }
        if self.threads == 0 {
            return fail("at least one thread is needed".to_string());
        }
        if !self.exposure.is_finite() {
            return fail(format!("exposure {} is not finite", self.exposure));
        }
        Ok(())
    }
}

/// The full pipeline for one kernel type.
pub struct Renderer<K: FractalKernel> {
    options: RenderOptions,
    parameters: FractalParameters,
    kernel: K,
    estimator: DensityEstimator,
    sampler: ImportanceSampler,
    accumulator: TrajectoryAccumulator,
    denoiser: NlmFilter,
    mapper: ColorMapper,
    seed: u64,
    frame: u64,
}

impl<K: FractalKernel> Renderer<K> {
    /// Builds every stage.  Bad options or parameters fail here, before
    /// any frame is drawn.
    pub fn new(options: RenderOptions, parameters: &FractalParameters) -> Result<Self> {
        options.validate()?;
        parameters.validate()?;
        let kernel = K::configure(parameters)?;
        let estimator = DensityEstimator::new(
            options.sampler_size,
            options.sampler_max_iterations,
            options.mipmap_level,
            options.threads,
        )?;
        let accumulator =
            TrajectoryAccumulator::new(options.width, options.height, options.layout, options.threads)?
                .with_trajectory_cap(options.render_iterations());
        let seed = match options.seed {
            Some(seed) => seed,
            None => rand::thread_rng().gen(),
        };
        debug!(
            fractal = K::NAME,
            width = options.width,
            height = options.height,
            field = estimator.field_size(),
            "renderer built"
        );
        Ok(Renderer {
            sampler: ImportanceSampler::new(options.policy),
            denoiser: NlmFilter::new(options.threads),
            mapper: ColorMapper::new(options.tone_scale()),
            parameters: *parameters,
            options,
            kernel,
            estimator,
            accumulator,
            seed,
            frame: 0,
        })
    }

    /// The options the renderer was built from.
    pub fn options(&self) -> &RenderOptions {
        &self.options
    }

    /// The parameters of the next frame.
    pub fn parameters(&self) -> &FractalParameters {
        &self.parameters
    }

    /// The sampler, for inspecting its arena.
    pub fn sampler(&self) -> &ImportanceSampler {
        &self.sampler
    }

    /// Replaces the parameters wholesale.  Invalid parameters leave the
    /// previous ones in place.
    pub fn set_parameters(&mut self, parameters: &FractalParameters) -> Result<()> {
        parameters.validate()?;
        self.kernel = K::configure(parameters)?;
        self.parameters = *parameters;
        Ok(())
    }

    /// Runs the estimator for the current parameters.
    pub fn importance_field(&self) -> Result<ImportanceField> {
        self.estimator.estimate(&self.kernel)
    }

    /// Frames drawn so far, across every render.
    pub fn frames_drawn(&self) -> u64 {
        self.frame
    }

    // Frame n draws from its own generator, seeded from the base seed
    // and n, so any frame can be reproduced on its own.
    fn frame_rng(&mut self) -> StdRng {
        let rng = StdRng::seed_from_u64(self.seed ^ self.frame.wrapping_mul(0x9e37_79b9_7f4a_7c15));
        self.frame += 1;
        rng
    }

    fn accumulate(&mut self, field: &ImportanceField) -> Result<AccumulationBuffer> {
        let mut rng = self.frame_rng();
        let samples = self.sampler.sample(field, &mut rng)?;
        self.accumulator.accumulate(&self.kernel, samples)
    }

    /// One noisy frame, from a freshly estimated field.
    pub fn render_frame(&mut self) -> Result<AccumulationBuffer> {
        let start = Instant::now();
        let field = self.importance_field()?;
        let buffer = self.accumulate(&field)?;
        debug!(
            elapsed_ms = start.elapsed().as_millis() as u64,
            samples = self.sampler.arena().len(),
            "frame rendered"
        );
        Ok(buffer)
    }

    /// Renders the configured number of frames from one field and
    /// combines them.  A single frame is returned as is.
    pub fn render_denoised(&mut self) -> Result<AccumulationBuffer> {
        let start = Instant::now();
        let field = self.importance_field()?;
        let mut frames = FrameSampleSet::new();
        for _ in 0..self.options.denoise_frames {
            let frame = self.accumulate(&field)?;
            frames.push(frame)?;
        }
        let sampled = start.elapsed();

        let stats = frames.statistics()?;
        let output = if frames.len() > 1 {
            self.denoiser.apply(&stats)?
        } else {
            stats.mean
        };
        info!(
            frames = frames.len(),
            sampling_ms = sampled.as_millis() as u64,
            total_ms = start.elapsed().as_millis() as u64,
            "denoised render finished"
        );
        Ok(output)
    }

    /// Colours a rendered buffer.
    pub fn colorize(&self, buffer: &AccumulationBuffer, colormap: &Colormap) -> RgbaImage {
        self.mapper.colorize(buffer, colormap)
    }

    /// Colours a buffer that sums `frames` frames, dimmed to match a
    /// single one.
    pub fn colorize_summed(
        &self,
        buffer: &AccumulationBuffer,
        frames: f64,
        colormap: &Colormap,
    ) -> RgbaImage {
        ColorMapper::new(self.mapper.scale().over_frames(frames)).colorize(buffer, colormap)
    }

    /// Renders and colours one image, denoised or not.
    pub fn render_image(&mut self, colormap: &Colormap, denoise: bool) -> Result<RgbaImage> {
        let buffer = if denoise {
            self.render_denoised()?
        } else {
            self.render_frame()?
        };
        Ok(self.colorize(&buffer, colormap))
    }
}

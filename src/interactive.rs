// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The endless render loop.
//!
//! Everything the loop needs is gathered into a `RenderContext` built
//! once at startup and handed to the loop explicitly.  Each pass pulls
//! the latest live inputs, renders one noisy frame, folds it into a
//! running sum and hands the coloured sum to a sink.  While the
//! parameters hold still the image keeps sharpening; a parameter change
//! starts the sum over.  A failed frame is logged and skipped.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use image::RgbaImage;
use tracing::{error, info};

use crate::accumulator::AccumulationBuffer;
use crate::errors::{RenderError, Result};
use crate::kernel::FractalKernel;
use crate::pipeline::{RenderOptions, Renderer};
use crate::snapshot::LiveInputs;

/// Frames between two rate reports.
pub const FPS_REPORT_INTERVAL: u64 = 10;

/// Frames summed at full weight before older ones start to fade.
pub const MAX_ACCUMULATED_FRAMES: u64 = 20_000;

/// Decay used while parameters are being dragged around: recent frames
/// dominate, so the image follows the motion.
pub const FOLLOW_DECAY: f32 = 0.9;

/// Counts frames and reports the rate every few of them.
#[derive(Debug)]
pub struct FpsCounter {
    frames: u64,
    interval: u64,
    window_start: Instant,
}

impl FpsCounter {
    /// Reports every `interval` frames.
    pub fn new(interval: u64) -> Self {
        FpsCounter {
            frames: 0,
            interval: interval.max(1),
            window_start: Instant::now(),
        }
    }

    /// Frames counted so far.
    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Counts a frame.  Returns the rate over the last window when one
    /// has just closed.
    pub fn tick(&mut self) -> Option<f64> {
        self.frames += 1;
        if self.frames % self.interval != 0 {
            return None;
        }
        let elapsed = self.window_start.elapsed().as_secs_f64();
        self.window_start = Instant::now();
        let fps = if elapsed > 0.0 {
            self.interval as f64 / elapsed
        } else {
            0.0
        };
        info!(frames = self.frames, fps, "render rate");
        Some(fps)
    }
}

/// A decayed running sum of frames.  Before each new frame is added
/// the sum is multiplied by the decay factor, and `weight` tracks the
/// same recurrence, `w = w * decay + 1`, so `sum / weight` always has
/// the brightness of a single frame.  With a decay of one the history
/// is a plain sum until `MAX_ACCUMULATED_FRAMES`, after which it keeps
/// that many frames' worth of weight.
#[derive(Debug)]
pub struct FrameHistory {
    sum: AccumulationBuffer,
    weight: f64,
    decay: f32,
    frames: u64,
}

impl FrameHistory {
    /// An empty history.  `decay` must lie in (0, 1].
    pub fn new(decay: f32) -> Result<Self> {
        if !(decay > 0.0 && decay <= 1.0) {
            return Err(RenderError::InvalidOptions(format!(
                "decay must be in (0, 1], got {}",
                decay
            )));
        }
        Ok(FrameHistory {
            sum: AccumulationBuffer::new(0, 0, 0),
            weight: 0.0,
            decay,
            frames: 0,
        })
    }

    /// The configured decay factor.
    pub fn decay(&self) -> f32 {
        self.decay
    }

    /// Effective number of frames in the sum.
    pub fn weight(&self) -> f64 {
        self.weight
    }

    /// Frames added since the last reset.
    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// The running sum; empty until a frame is added.
    pub fn sum(&self) -> &AccumulationBuffer {
        &self.sum
    }

    /// Forgets every frame.
    pub fn reset(&mut self) {
        self.sum = AccumulationBuffer::new(0, 0, 0);
        self.weight = 0.0;
        self.frames = 0;
    }

    /// Folds a frame in and returns the new sum.  A frame whose shape
    /// differs from the sum replaces it.
    pub fn add(&mut self, frame: AccumulationBuffer) -> &AccumulationBuffer {
        let decay = if self.decay >= 1.0 && self.frames >= MAX_ACCUMULATED_FRAMES {
            1.0 - 1.0 / MAX_ACCUMULATED_FRAMES as f32
        } else {
            self.decay
        };
        let same_shape = self.frames > 0
            && (self.sum.width(), self.sum.height(), self.sum.channels())
                == (frame.width(), frame.height(), frame.channels());
        self.frames += 1;
        if same_shape {
            self.sum.scale(decay);
            self.sum.merge(&frame);
            self.weight = self.weight * f64::from(decay) + 1.0;
        } else {
            self.sum = frame;
            self.weight = 1.0;
        }
        &self.sum
    }
}

/// Receives finished frames.
pub trait FrameSink {
    /// Shows or stores one frame.
    fn present(&mut self, frame: &RgbaImage) -> Result<()>;
}

impl<F> FrameSink for F
where
    F: FnMut(&RgbaImage) -> Result<()>,
{
    fn present(&mut self, frame: &RgbaImage) -> Result<()> {
        self(frame)
    }
}

/// The renderer and its live inputs.
pub struct RenderContext<K: FractalKernel> {
    renderer: Renderer<K>,
    inputs: LiveInputs,
    history: FrameHistory,
    fps: FpsCounter,
}

impl<K: FractalKernel> RenderContext<K> {
    /// Builds the renderer from the inputs' starting parameters.  Frames
    /// are summed without decay.
    pub fn new(options: RenderOptions, inputs: LiveInputs) -> Result<Self> {
        RenderContext::with_decay(options, inputs, 1.0)
    }

    /// As `new`, fading older frames by `decay` each pass.
    pub fn with_decay(options: RenderOptions, inputs: LiveInputs, decay: f32) -> Result<Self> {
        let history = FrameHistory::new(decay)?;
        let renderer = Renderer::new(options, inputs.parameters())?;
        Ok(RenderContext {
            renderer,
            inputs,
            history,
            fps: FpsCounter::new(FPS_REPORT_INTERVAL),
        })
    }

    /// The renderer.
    pub fn renderer(&self) -> &Renderer<K> {
        &self.renderer
    }

    /// The live inputs as of the last frame.
    pub fn inputs(&self) -> &LiveInputs {
        &self.inputs
    }

    /// The frames summed since the parameters last changed.
    pub fn history(&self) -> &FrameHistory {
        &self.history
    }

    /// Frames attempted so far.
    pub fn frames(&self) -> u64 {
        self.fps.frames()
    }

    /// Renders one frame with the latest inputs and returns the
    /// coloured running sum.
    pub fn render_frame(&mut self) -> Result<RgbaImage> {
        let refresh = self.inputs.refresh();
        if refresh.parameters {
            self.renderer.set_parameters(self.inputs.parameters())?;
            self.history.reset();
        }
        let frame = self.renderer.render_frame()?;
        self.history.add(frame);
        Ok(self.renderer.colorize_summed(
            self.history.sum(),
            self.history.weight(),
            self.inputs.colormap(),
        ))
    }
}

/// Renders until `stop` is raised.  Returns the number of frames that
/// reached the sink.
pub fn run<K, S>(context: &mut RenderContext<K>, sink: &mut S, stop: &AtomicBool) -> u64
where
    K: FractalKernel,
    S: FrameSink,
{
    let mut presented = 0;
    while !stop.load(Ordering::SeqCst) {
        match context.render_frame() {
            Ok(frame) => match sink.present(&frame) {
                Ok(()) => presented += 1,
                Err(e) => error!(error = %e, "frame could not be presented"),
            },
            Err(e) => error!(error = %e, "frame failed"),
        }
        context.fps.tick();
    }
    presented
}

// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Plots the orbits of the sample points.
//!
//! Each sample point is iterated once to find out when (and whether)
//! it diverges.  Points that never leave, or leave too quickly to have
//! drawn anything worth seeing, are dropped.  The rest are replayed
//! from zero and every state along the way is projected to the screen
//! and added, with the point's weight, into one channel of an additive
//! histogram.  Which channel depends on how long the point took to
//! diverge, which is what gives the Nebulabrot its colours before any
//! colormap is applied.

use std::str::FromStr;
use std::sync::Mutex;

use crossbeam::thread::ScopedJoinHandle;
use num::Complex;
use tracing::debug;

use crate::errors::{RenderError, Result};
use crate::kernel::{escape_time, Escape, FractalKernel};
use crate::planes::PlaneMapper;
use crate::sampler::SamplePoint;

/// Trajectories that diverge before this step are discarded.
pub const MIN_DIVERGE_STEP: usize = 24;

/// The divergence steps split into thirds of this for channel routing.
pub const BAND_NORMALIZATION: usize = 240;

// Sample points handed to a worker at a time.
const CHUNK_SIZE: usize = 4096;

/// How divergence time is turned into channels.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ChannelLayout {
    /// Three channels for early, middle and late divergence; long
    /// trajectories.
    Spectral,
    /// One channel; shorter trajectories and a longer warm-up.
    Single,
}

impl ChannelLayout {
    /// Channels in the accumulation buffer.
    pub fn channels(self) -> usize {
        match self {
            ChannelLayout::Spectral => 3,
            ChannelLayout::Single => 1,
        }
    }

    /// Longest trajectory followed.
    pub fn trajectory_cap(self) -> usize {
        match self {
            ChannelLayout::Spectral => 256,
            ChannelLayout::Single => 64,
        }
    }

    /// Leading steps of every trajectory that are not plotted.
    pub fn warmup(self) -> usize {
        match self {
            ChannelLayout::Spectral => 1,
            ChannelLayout::Single => 4,
        }
    }

    /// The channel a trajectory diverging at `step` is plotted into.
    pub fn band(self, step: usize) -> usize {
        match self {
            ChannelLayout::Single => 0,
            ChannelLayout::Spectral if step < BAND_NORMALIZATION / 3 => 0,
            ChannelLayout::Spectral if step < 2 * BAND_NORMALIZATION / 3 => 1,
            ChannelLayout::Spectral => 2,
        }
    }
}

impl FromStr for ChannelLayout {
    type Err = RenderError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "spectral" => Ok(ChannelLayout::Spectral),
            "single" => Ok(ChannelLayout::Single),
            _ => Err(RenderError::InvalidOptions(format!("unknown channel layout {}", s))),
        }
    }
}

/// A floating point image with one to three channels, interleaved.
#[derive(Clone, Debug, PartialEq)]
pub struct AccumulationBuffer {
    width: usize,
    height: usize,
    channels: usize,
    data: Vec<f32>,
}

impl AccumulationBuffer {
    /// A zeroed buffer.
    pub fn new(width: usize, height: usize, channels: usize) -> Self {
        AccumulationBuffer {
            width,
            height,
            channels,
            data: vec![0.0; width * height * channels],
        }
    }

    /// Wraps existing interleaved data.
    pub fn from_data(width: usize, height: usize, channels: usize, data: Vec<f32>) -> Result<Self> {
        if data.len() != width * height * channels {
            return Err(RenderError::InvalidOptions(format!(
                "{}x{}x{} buffer cannot hold {} values",
                width,
                height,
                channels,
                data.len()
            )));
        }
        Ok(AccumulationBuffer {
            width,
            height,
            channels,
            data,
        })
    }

    /// Pixels per row.
    pub fn width(&self) -> usize {
        self.width
    }

    /// Rows.
    pub fn height(&self) -> usize {
        self.height
    }

    /// Values per pixel.
    pub fn channels(&self) -> usize {
        self.channels
    }

    /// The interleaved values.
    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// The interleaved values, mutably.
    pub fn data_mut(&mut self) -> &mut [f32] {
        &mut self.data
    }

    /// All channels of one pixel.
    pub fn pixel(&self, x: usize, y: usize) -> &[f32] {
        let start = (y * self.width + x) * self.channels;
        &self.data[start..start + self.channels]
    }

    /// Adds `weight` to one channel of the pixel at a linear offset.
    #[inline]
    pub fn add(&mut self, offset: usize, channel: usize, weight: f32) {
        self.data[offset * self.channels + channel] += weight;
    }

    /// Sum over every pixel and channel.
    pub fn total(&self) -> f64 {
        self.data.iter().map(|v| f64::from(*v)).sum()
    }

    /// Zeroes the buffer in place.
    pub fn clear(&mut self) {
        for v in self.data.iter_mut() {
            *v = 0.0;
        }
    }

    /// Multiplies every value by `factor`.
    pub fn scale(&mut self, factor: f32) {
        for v in self.data.iter_mut() {
            *v *= factor;
        }
    }

    /// Adds another buffer of the same shape into this one.
    pub fn merge(&mut self, other: &AccumulationBuffer) {
        debug_assert_eq!(self.data.len(), other.data.len());
        for (a, b) in self.data.iter_mut().zip(other.data.iter()) {
            *a += *b;
        }
    }
}

/// Splats sample trajectories onto a screen.
#[derive(Clone, Debug)]
pub struct TrajectoryAccumulator {
    screen: PlaneMapper,
    layout: ChannelLayout,
    trajectory_cap: usize,
    threads: usize,
}

impl TrajectoryAccumulator {
    /// An accumulator for a `width` x `height` screen.
    pub fn new(width: usize, height: usize, layout: ChannelLayout, threads: usize) -> Result<Self> {
        Ok(TrajectoryAccumulator {
            screen: PlaneMapper::screen(width, height)?,
            layout,
            trajectory_cap: layout.trajectory_cap(),
            threads: threads.max(1),
        })
    }

    /// Follows trajectories for `cap` steps instead of the layout's
    /// default.
    pub fn with_trajectory_cap(mut self, cap: usize) -> Self {
        self.trajectory_cap = cap;
        self
    }

    /// Longest trajectory followed.
    pub fn trajectory_cap(&self) -> usize {
        self.trajectory_cap
    }

    /// The screen mapping.
    pub fn screen(&self) -> &PlaneMapper {
        &self.screen
    }

    /// The channel routing in use.
    pub fn layout(&self) -> ChannelLayout {
        self.layout
    }

    /// The step at which `c` diverges, if it does so late enough to be
    /// plotted.
    pub fn divergence<K: FractalKernel>(&self, kernel: &K, c: Complex<f64>) -> Option<usize> {
        match escape_time(kernel, c, self.trajectory_cap) {
            Escape::Escaped(step) if step >= MIN_DIVERGE_STEP => Some(step),
            _ => None,
        }
    }

    /// Plots one sample's trajectory into `buffer`.  Returns whether
    /// the sample survived.
    pub fn splat<K: FractalKernel>(
        &self,
        kernel: &K,
        sample: &SamplePoint,
        buffer: &mut AccumulationBuffer,
    ) -> bool {
        let diverge = match self.divergence(kernel, sample.c) {
            Some(step) => step,
            None => return false,
        };
        let channel = self.layout.band(diverge);
        let weight = sample.weight as f32;
        let warmup = self.layout.warmup();
        let mut z = Complex::new(0.0, 0.0);
        for i in 0..diverge {
            z = kernel.iterate(z, sample.c);
            if i >= warmup {
                if let Some(offset) = self.screen.point_to_offset(&kernel.project(z, sample.c)) {
                    buffer.add(offset, channel, weight);
                }
            }
        }
        true
    }

    /// Plots every sample into a fresh buffer.  Workers pull chunks of
    /// samples from a shared iterator and plot into private buffers,
    /// which are summed once all of them are done.
    pub fn accumulate<K: FractalKernel>(
        &self,
        kernel: &K,
        samples: &[SamplePoint],
    ) -> Result<AccumulationBuffer> {
        let (width, height) = (self.screen.width(), self.screen.height());
        let channels = self.layout.channels();
        let chunks = Mutex::new(samples.chunks(CHUNK_SIZE));

        let partials = crossbeam::scope(|spawner| {
            let handles: Vec<ScopedJoinHandle<(AccumulationBuffer, usize)>> = (0..self.threads)
                .map(|_| {
                    let chunks = &chunks;
                    spawner.spawn(move |_| {
                        let mut local = AccumulationBuffer::new(width, height, channels);
                        let mut survivors = 0;
                        loop {
                            let chunk = match chunks.lock() {
                                Ok(mut remaining) => remaining.next(),
                                Err(_) => None,
                            };
                            match chunk {
                                Some(chunk) => {
                                    for sample in chunk {
                                        if self.splat(kernel, sample, &mut local) {
                                            survivors += 1;
                                        }
                                    }
                                }
                                None => break,
                            }
                        }
                        (local, survivors)
                    })
                })
                .collect();

            handles
                .into_iter()
                .map(|handle| handle.join())
                .collect::<std::result::Result<Vec<_>, _>>()
        })
        .map_err(|_| RenderError::WorkerPanicked("trajectory accumulation"))?
        .map_err(|_| RenderError::WorkerPanicked("trajectory accumulation"))?;

        let mut buffer = AccumulationBuffer::new(width, height, channels);
        let mut survivors = 0;
        for (partial, count) in partials.iter() {
            buffer.merge(partial);
            survivors += count;
        }
        debug!(
            samples = samples.len(),
            survivors,
            "trajectories accumulated"
        );
        Ok(buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::{ClassicKernel, FractalParameters, PolynomialKernel};

    // Escapes on exactly this step under z^2 + c: c = 0.25 + e walks
    // slowly through the parabolic gate.
    fn diverging_at(layout: ChannelLayout, want: usize) -> Complex<f64> {
        let mut lo = 0.25_f64;
        let mut hi = 2.0_f64;
        for _ in 0..200 {
            let mid = (lo + hi) / 2.0;
            match escape_time(&ClassicKernel, Complex::new(mid, 0.0), layout.trajectory_cap()) {
                Escape::Escaped(s) if s <= want => hi = mid,
                _ => lo = mid,
            }
        }
        Complex::new(hi, 0.0)
    }

    #[test]
    fn bands_split_into_thirds() {
        let l = ChannelLayout::Spectral;
        assert_eq!(l.band(24), 0);
        assert_eq!(l.band(79), 0);
        assert_eq!(l.band(80), 1);
        assert_eq!(l.band(159), 1);
        assert_eq!(l.band(160), 2);
        assert_eq!(ChannelLayout::Single.band(200), 0);
        assert_eq!("single".parse::<ChannelLayout>().unwrap(), ChannelLayout::Single);
        assert!("mono".parse::<ChannelLayout>().is_err());
    }

    #[test]
    fn short_trajectories_are_discarded() {
        let c = diverging_at(ChannelLayout::Spectral, 10);
        assert_eq!(escape_time(&ClassicKernel, c, 256), Escape::Escaped(10));

        let acc = TrajectoryAccumulator::new(32, 32, ChannelLayout::Spectral, 1).unwrap();
        let buffer = acc
            .accumulate(&ClassicKernel, &[SamplePoint { c, weight: 1.0 }])
            .unwrap();
        assert_eq!(buffer.total(), 0.0);
    }

    #[test]
    fn bounded_trajectories_are_discarded() {
        let acc = TrajectoryAccumulator::new(32, 32, ChannelLayout::Spectral, 2).unwrap();
        let samples = [
            SamplePoint { c: Complex::new(0.0, 0.0), weight: 1.0 },
            SamplePoint { c: Complex::new(-1.0, 0.0), weight: 1.0 },
        ];
        assert_eq!(acc.accumulate(&ClassicKernel, &samples).unwrap().total(), 0.0);
    }

    #[test]
    fn surviving_trajectory_lands_in_its_band() {
        let c = diverging_at(ChannelLayout::Spectral, 30);
        let acc = TrajectoryAccumulator::new(64, 64, ChannelLayout::Spectral, 1).unwrap();
        let mut buffer = AccumulationBuffer::new(64, 64, 3);
        assert!(acc.splat(&ClassicKernel, &SamplePoint { c, weight: 0.5 }, &mut buffer));

        let by_channel: Vec<f64> = (0..3)
            .map(|ch| {
                buffer
                    .data()
                    .iter()
                    .skip(ch)
                    .step_by(3)
                    .map(|v| f64::from(*v))
                    .sum()
            })
            .collect();
        assert!(by_channel[0] > 0.0);
        assert_eq!(by_channel[1], 0.0);
        assert_eq!(by_channel[2], 0.0);
        // At most the states between warm-up and divergence are plotted.
        assert!(by_channel[0] <= 0.5 * 29.0 + 1e-6);
    }

    #[test]
    fn threads_only_reorder_the_sums() {
        let kernel = PolynomialKernel::configure(&FractalParameters::default()).unwrap();
        let samples: Vec<SamplePoint> = (0..2000)
            .map(|i| {
                let t = i as f64 / 2000.0 * std::f64::consts::PI * 2.0;
                SamplePoint {
                    c: Complex::new(-0.75 + 0.52 * t.cos(), 0.52 * t.sin()),
                    weight: 0.25,
                }
            })
            .collect();
        let one = TrajectoryAccumulator::new(48, 48, ChannelLayout::Spectral, 1)
            .unwrap()
            .accumulate(&kernel, &samples)
            .unwrap();
        let four = TrajectoryAccumulator::new(48, 48, ChannelLayout::Spectral, 4)
            .unwrap()
            .accumulate(&kernel, &samples)
            .unwrap();
        assert!((one.total() - four.total()).abs() < 1e-3);
        for (a, b) in one.data().iter().zip(four.data().iter()) {
            assert!((a - b).abs() < 1e-4);
        }
    }

    #[test]
    fn merge_and_clear() {
        let mut a = AccumulationBuffer::new(2, 1, 1);
        let b = AccumulationBuffer::from_data(2, 1, 1, vec![1.0, 2.0]).unwrap();
        a.merge(&b);
        a.merge(&b);
        assert_eq!(a.data(), &[2.0, 4.0]);
        a.clear();
        assert_eq!(a.total(), 0.0);
        assert!(AccumulationBuffer::from_data(2, 2, 1, vec![0.0]).is_err());
    }
}

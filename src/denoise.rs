// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Combines several noisy renders of the same parameters into one.
//!
//! The frames are assumed to be independent draws of one underlying
//! density.  Their per-pixel mean is the estimate; their per-pixel
//! variance says how far to trust it.  A non-local means pass over the
//! mean image then borrows from neighbours whose surroundings look
//! alike, and borrows more freely where the variance is high.

use itertools::iproduct;
use tracing::debug;

use crate::accumulator::AccumulationBuffer;
use crate::errors::{RenderError, Result};

/// Widest pixel the filter accepts.
pub const MAX_CHANNELS: usize = 3;

/// An ordered run of frames rendered from the same parameters.
#[derive(Clone, Debug, Default)]
pub struct FrameSampleSet {
    frames: Vec<AccumulationBuffer>,
}

impl FrameSampleSet {
    /// An empty set.
    pub fn new() -> Self {
        FrameSampleSet::default()
    }

    /// Appends a frame.  Every frame must have the shape of the first.
    pub fn push(&mut self, frame: AccumulationBuffer) -> Result<()> {
        if let Some(first) = self.frames.first() {
            if (first.width(), first.height(), first.channels())
                != (frame.width(), frame.height(), frame.channels())
            {
                return Err(RenderError::InvalidOptions(format!(
                    "frame of {}x{}x{} does not match {}x{}x{}",
                    frame.width(),
                    frame.height(),
                    frame.channels(),
                    first.width(),
                    first.height(),
                    first.channels()
                )));
            }
        }
        self.frames.push(frame);
        Ok(())
    }

    /// The frames, in the order they were rendered.
    pub fn frames(&self) -> &[AccumulationBuffer] {
        &self.frames
    }

    /// Number of frames.
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// True before the first frame is pushed.
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Per-pixel, per-channel mean and population variance.
    pub fn statistics(&self) -> Result<DenoiseStatistics> {
        let first = self
            .frames
            .first()
            .ok_or_else(|| RenderError::InvalidOptions("no frames to combine".to_string()))?;
        let (width, height, channels) = (first.width(), first.height(), first.channels());
        let n = self.frames.len() as f64;
        let values = first.data().len();

        let mut mean = Vec::with_capacity(values);
        let mut variance = Vec::with_capacity(values);
        for i in 0..values {
            let m = self.frames.iter().map(|f| f64::from(f.data()[i])).sum::<f64>() / n;
            let v = self
                .frames
                .iter()
                .map(|f| {
                    let d = f64::from(f.data()[i]) - m;
                    d * d
                })
                .sum::<f64>()
                / n;
            mean.push(m as f32);
            variance.push(v as f32);
        }

        Ok(DenoiseStatistics {
            mean: AccumulationBuffer::from_data(width, height, channels, mean)?,
            variance: AccumulationBuffer::from_data(width, height, channels, variance)?,
            frames: self.frames.len(),
        })
    }
}

/// Mean and variance across a `FrameSampleSet`.
#[derive(Clone, Debug)]
pub struct DenoiseStatistics {
    /// Per-channel mean.
    pub mean: AccumulationBuffer,
    /// Per-channel population variance (divided by N).
    pub variance: AccumulationBuffer,
    /// How many frames went in.
    pub frames: usize,
}

impl DenoiseStatistics {
    /// The variance of one pixel, summed over its channels.
    pub fn pixel_variance(&self, x: usize, y: usize) -> f32 {
        self.variance.pixel(x, y).iter().sum()
    }
}

/// Variance-guided non-local means.
#[derive(Copy, Clone, Debug)]
pub struct NlmFilter {
    /// Half-width of the compared patches.
    pub patch_radius: usize,
    /// Half-width of the window candidates are drawn from.
    pub search_radius: usize,
    /// Sensitivity; larger values average more aggressively.
    pub k: f32,
    /// Row bands processed at once.
    pub threads: usize,
}

impl Default for NlmFilter {
    fn default() -> Self {
        NlmFilter {
            patch_radius: 3,
            search_radius: 5,
            k: 0.1,
            threads: 1,
        }
    }
}

// Neighbour of `p` at signed offset `d`, if it lies in `0..len`.
#[inline]
fn offset(p: usize, d: isize, len: usize) -> Option<usize> {
    let q = p as isize + d;
    if q >= 0 && (q as usize) < len {
        Some(q as usize)
    } else {
        None
    }
}

impl NlmFilter {
    /// The default filter running on `threads` row bands.
    pub fn new(threads: usize) -> Self {
        NlmFilter {
            threads: threads.max(1),
            ..NlmFilter::default()
        }
    }

    // Sum of squared differences between the patches around `p` and
    // `q`, over the patch pixels that exist around both.
    fn patch_distance(&self, mean: &AccumulationBuffer, p: (usize, usize), q: (usize, usize)) -> f32 {
        let r = self.patch_radius as isize;
        let (w, h) = (mean.width(), mean.height());
        let mut ssd = 0.0;
        for (dy, dx) in iproduct!(-r..=r, -r..=r) {
            let a = match (offset(p.0, dx, w), offset(p.1, dy, h)) {
                (Some(x), Some(y)) => mean.pixel(x, y),
                _ => continue,
            };
            let b = match (offset(q.0, dx, w), offset(q.1, dy, h)) {
                (Some(x), Some(y)) => mean.pixel(x, y),
                _ => continue,
            };
            for (u, v) in a.iter().zip(b.iter()) {
                ssd += (u - v) * (u - v);
            }
        }
        ssd
    }

    // Filters one pixel into `out`, which holds its channels.
    fn filter_pixel(&self, stats: &DenoiseStatistics, x: usize, y: usize, out: &mut [f32]) {
        let mean = &stats.mean;
        out.copy_from_slice(mean.pixel(x, y));
        let variance = stats.pixel_variance(x, y);
        if variance.is_nan() || variance <= 0.0 {
            return;
        }

        let s = self.search_radius as isize;
        let (w, h) = (mean.width(), mean.height());
        let mut sum = [0.0_f32; MAX_CHANNELS];
        let mut weights = 0.0_f32;
        for (dy, dx) in iproduct!(-s..=s, -s..=s) {
            let (cx, cy) = match (offset(x, dx, w), offset(y, dy, h)) {
                (Some(cx), Some(cy)) => (cx, cy),
                _ => continue,
            };
            let ssd = self.patch_distance(mean, (x, y), (cx, cy));
            let weight = (-ssd / (variance * self.k)).exp();
            for (acc, v) in sum.iter_mut().zip(mean.pixel(cx, cy).iter()) {
                *acc += weight * v;
            }
            weights += weight;
        }

        if weights > 0.0 {
            for (o, acc) in out.iter_mut().zip(sum.iter()) {
                *o = acc / weights;
            }
        }
    }

    /// Filters the mean image.  Bands of rows are written in parallel;
    /// each output row depends only on the shared statistics.
    pub fn apply(&self, stats: &DenoiseStatistics) -> Result<AccumulationBuffer> {
        let (width, height, channels) = (
            stats.mean.width(),
            stats.mean.height(),
            stats.mean.channels(),
        );
        if channels > MAX_CHANNELS {
            return Err(RenderError::InvalidOptions(format!(
                "cannot filter {} channels, at most {}",
                channels, MAX_CHANNELS
            )));
        }
        let mut output = AccumulationBuffer::new(width, height, channels);
        if output.data().is_empty() {
            return Ok(output);
        }
        let row_len = width * channels;
        let threads = self.threads.max(1);
        let rows_per_band = ((height + threads - 1) / threads).max(1);

        crossbeam::scope(|spawner| {
            for (band, rows) in output
                .data_mut()
                .chunks_mut(rows_per_band * row_len)
                .enumerate()
            {
                spawner.spawn(move |_| {
                    let first_row = band * rows_per_band;
                    for (i, row) in rows.chunks_mut(row_len).enumerate() {
                        for (x, pixel) in row.chunks_mut(channels).enumerate() {
                            self.filter_pixel(stats, x, first_row + i, pixel);
                        }
                    }
                });
            }
        })
        .map_err(|_| RenderError::WorkerPanicked("non-local means"))?;

        debug!(
            width,
            height,
            frames = stats.frames,
            "non-local means applied"
        );
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(values: &[f32]) -> AccumulationBuffer {
        AccumulationBuffer::from_data(values.len(), 1, 1, values.to_vec()).unwrap()
    }

    fn noisy(width: usize, height: usize, seed: u32) -> AccumulationBuffer {
        let data = (0..width * height * 3)
            .map(|i| {
                let h = (i as u32).wrapping_mul(2_654_435_761).wrapping_add(seed.wrapping_mul(40_503));
                (h % 1000) as f32 / 100.0
            })
            .collect();
        AccumulationBuffer::from_data(width, height, 3, data).unwrap()
    }

    #[test]
    fn identical_frames_have_no_variance() {
        let base = noisy(9, 7, 1);
        let mut set = FrameSampleSet::new();
        for _ in 0..20 {
            set.push(base.clone()).unwrap();
        }
        let stats = set.statistics().unwrap();
        assert!(stats.variance.data().iter().all(|v| *v == 0.0));
        assert_eq!(stats.mean, base);

        let out = NlmFilter::new(3).apply(&stats).unwrap();
        assert_eq!(out, stats.mean);
    }

    #[test]
    fn wide_pixels_are_refused() {
        let wide = AccumulationBuffer::from_data(1, 1, 4, vec![1.0; 4]).unwrap();
        let mut set = FrameSampleSet::new();
        set.push(wide.clone()).unwrap();
        set.push(wide).unwrap();
        let stats = set.statistics().unwrap();
        assert!(NlmFilter::new(1).apply(&stats).is_err());
    }

    #[test]
    fn single_channel_frames_filter_like_spectral_ones() {
        let mut set = FrameSampleSet::new();
        set.push(frame(&[1.0, 3.0, 1.0, 3.0, 1.0])).unwrap();
        set.push(frame(&[3.0, 1.0, 3.0, 1.0, 3.0])).unwrap();
        let out = NlmFilter::new(2).apply(&set.statistics().unwrap()).unwrap();
        for v in out.data() {
            assert!((v - 2.0).abs() < 1e-5, "{}", v);
        }
    }

    #[test]
    fn statistics_use_population_variance() {
        let mut set = FrameSampleSet::new();
        set.push(frame(&[1.0, 0.0])).unwrap();
        set.push(frame(&[3.0, 0.0])).unwrap();
        let stats = set.statistics().unwrap();
        assert_eq!(stats.mean.data(), &[2.0, 0.0]);
        assert_eq!(stats.variance.data(), &[1.0, 0.0]);
        assert_eq!(stats.frames, 2);
    }

    #[test]
    fn mismatched_frames_are_rejected() {
        let mut set = FrameSampleSet::new();
        set.push(frame(&[1.0, 2.0])).unwrap();
        assert!(set.push(frame(&[1.0])).is_err());
        assert!(FrameSampleSet::new().statistics().is_err());
    }

    #[test]
    fn flat_noisy_region_is_smoothed_to_its_level() {
        // Two frames that disagree everywhere, averaging to a flat image.
        let mut set = FrameSampleSet::new();
        set.push(AccumulationBuffer::from_data(8, 8, 1, vec![1.0; 64]).unwrap())
            .unwrap();
        set.push(AccumulationBuffer::from_data(8, 8, 1, vec![3.0; 64]).unwrap())
            .unwrap();
        let stats = set.statistics().unwrap();
        let out = NlmFilter::default().apply(&stats).unwrap();
        for v in out.data() {
            assert!((v - 2.0).abs() < 1e-5);
        }
    }

    #[test]
    fn band_count_does_not_change_the_result() {
        let mut set = FrameSampleSet::new();
        for seed in 0..4 {
            set.push(noisy(12, 10, seed)).unwrap();
        }
        let stats = set.statistics().unwrap();
        let one = NlmFilter::new(1).apply(&stats).unwrap();
        let many = NlmFilter::new(4).apply(&stats).unwrap();
        assert_eq!(one, many);
    }

    #[test]
    fn output_stays_within_the_neighbourhood_range() {
        let mut set = FrameSampleSet::new();
        for seed in 0..5 {
            set.push(noisy(10, 10, seed)).unwrap();
        }
        let stats = set.statistics().unwrap();
        let lo = stats.mean.data().iter().cloned().fold(f32::INFINITY, f32::min);
        let hi = stats.mean.data().iter().cloned().fold(f32::NEG_INFINITY, f32::max);
        let out = NlmFilter::default().apply(&stats).unwrap();
        for v in out.data() {
            assert!(*v >= lo - 1e-4 && *v <= hi + 1e-4);
        }
    }
}

// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Turns an importance field into a set of weighted starting points.
//!
//! Each cell emits `intensity * multiplier` points, jittered around the
//! cell with a clipped Gaussian, and each of those points carries a
//! weight of one over that count.  However many points a cell is
//! represented by, its total weight is one, so the density in the final
//! image does not depend on how finely a region was sampled, only on
//! where its trajectories go.

use itertools::iproduct;
use num::Complex;
use rand::distributions::{Distribution, Uniform};
use rand::Rng;
use tracing::debug;

use crate::errors::{RenderError, Result};
use crate::estimator::ImportanceField;
use crate::planes::Pixel;

/// Most points one frame may hold.
pub const MAX_SAMPLES: u64 = 1 << 32;

/// One trajectory seed: the map's constant term and its share of the
/// cell it came from.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct SamplePoint {
    /// Position in the parameter plane.
    pub c: Complex<f64>,
    /// `1 / v`, where `v` is the number of points its cell emitted.
    pub weight: f64,
}

/// How many points to draw per unit of intensity.  The two strategies
/// are alternatives; a renderer is configured with exactly one.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SamplingPolicy {
    /// A fixed linear scale on every cell's count.
    Multiplier(u32),
    /// Pick the smallest integer multiplier whose total meets this
    /// floor.
    LowerBound(u64),
}

impl SamplingPolicy {
    /// The multiplier to use for a field whose intensities sum to
    /// `field_total`.
    pub fn multiplier(self, field_total: u64) -> u64 {
        match self {
            SamplingPolicy::Multiplier(m) => u64::from(m),
            SamplingPolicy::LowerBound(_) if field_total == 0 => 0,
            SamplingPolicy::LowerBound(floor) => {
                let rounded_up = floor % field_total != 0;
                (floor / field_total + u64::from(rounded_up)).max(1)
            }
        }
    }
}

/// Sample storage reused from frame to frame.  It grows to the largest
/// frame seen and never gives memory back.
#[derive(Debug, Default)]
pub struct SampleArena {
    points: Vec<SamplePoint>,
    high_water_mark: usize,
}

impl SampleArena {
    /// An empty arena.
    pub fn new() -> Self {
        SampleArena::default()
    }

    /// Empties the arena and makes room for `required` points.
    pub fn reset(&mut self, required: usize) {
        self.points.clear();
        if required > self.points.capacity() {
            self.points.reserve_exact(required);
        }
        self.high_water_mark = self.high_water_mark.max(required);
    }

    fn push(&mut self, point: SamplePoint) {
        self.points.push(point);
    }

    /// The points of the current frame.
    pub fn points(&self) -> &[SamplePoint] {
        &self.points
    }

    /// Number of points in the current frame.
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// True when the current frame has no points.
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// The largest frame this arena has been asked to hold.
    pub fn high_water_mark(&self) -> usize {
        self.high_water_mark
    }

    /// Points that fit without reallocating.
    pub fn capacity(&self) -> usize {
        self.points.capacity()
    }
}

/// A normal deviate with standard deviation 1/2, by the polar
/// Box-Muller method, clipped to [-1, 1].
struct GaussianJitter(Uniform<f64>);

impl GaussianJitter {
    fn new() -> Self {
        GaussianJitter(Uniform::new(-1.0_f64, 1.0))
    }

    fn get<R: Rng>(&self, rng: &mut R) -> f64 {
        loop {
            let v1 = self.0.sample(rng);
            let v2 = self.0.sample(rng);
            let s = v1 * v1 + v2 * v2;
            if s < 1.0 && s > 0.0 {
                let g = v1 * ((-2.0 * s.ln()) / s).sqrt() / 2.0;
                return g.max(-1.0).min(1.0);
            }
        }
    }
}

/// Draws the weighted point set for one frame.
#[derive(Debug)]
pub struct ImportanceSampler {
    policy: SamplingPolicy,
    arena: SampleArena,
}

impl ImportanceSampler {
    /// A sampler with an empty arena.
    pub fn new(policy: SamplingPolicy) -> Self {
        ImportanceSampler {
            policy,
            arena: SampleArena::new(),
        }
    }

    /// The configured count strategy.
    pub fn policy(&self) -> SamplingPolicy {
        self.policy
    }

    /// The storage behind the last draw.
    pub fn arena(&self) -> &SampleArena {
        &self.arena
    }

    /// Replaces the arena contents with a fresh draw from `field`.
    /// The point count is recomputed every time, since it follows the
    /// field and so the current parameters.  A draw larger than
    /// `MAX_SAMPLES` is refused before anything is allocated.
    pub fn sample<R: Rng>(
        &mut self,
        field: &ImportanceField,
        rng: &mut R,
    ) -> Result<&[SamplePoint]> {
        let multiplier = self.policy.multiplier(field.total());
        let total = field
            .total()
            .checked_mul(multiplier)
            .filter(|total| *total <= MAX_SAMPLES)
            .ok_or_else(|| {
                RenderError::InvalidOptions(format!(
                    "{:?} asks for more than {} points from a field of {}",
                    self.policy,
                    MAX_SAMPLES,
                    field.total()
                ))
            })?;
        self.arena.reset(total as usize);

        let plane = field.plane();
        let (cell_w, cell_h) = plane.cell_size();
        let jitter = GaussianJitter::new();

        for (row, column) in iproduct!(0..field.height(), 0..field.width()) {
            let pixel = Pixel(column, row);
            let v = u64::from(field.get(pixel)) * multiplier;
            if v == 0 {
                continue;
            }
            let origin = plane.pixel_to_point(&pixel);
            let weight = 1.0 / v as f64;
            for _ in 0..v {
                let dx = (jitter.get(rng) + 0.5) * cell_w;
                let dy = (jitter.get(rng) + 0.5) * cell_h;
                self.arena.push(SamplePoint {
                    c: origin + Complex::new(dx, dy),
                    weight,
                });
            }
        }

        debug!(
            multiplier,
            samples = self.arena.len(),
            high_water_mark = self.arena.high_water_mark(),
            "sample points drawn"
        );
        Ok(self.arena.points())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn field(values: Vec<u8>) -> ImportanceField {
        ImportanceField::canonical(4, 4, values).unwrap()
    }

    #[test]
    fn lower_bound_picks_the_smallest_sufficient_multiplier() {
        assert_eq!(SamplingPolicy::LowerBound(1000).multiplier(100), 10);
        assert_eq!(SamplingPolicy::LowerBound(1001).multiplier(100), 11);
        assert_eq!(SamplingPolicy::LowerBound(10).multiplier(100), 1);
        assert_eq!(SamplingPolicy::LowerBound(10).multiplier(0), 0);
        assert_eq!(SamplingPolicy::Multiplier(3).multiplier(0), 3);
    }

    #[test]
    fn lower_bound_near_the_integer_limit_does_not_wrap() {
        assert_eq!(SamplingPolicy::LowerBound(u64::MAX).multiplier(1), u64::MAX);
        assert_eq!(SamplingPolicy::LowerBound(u64::MAX).multiplier(2), u64::MAX / 2 + 1);
        assert_eq!(SamplingPolicy::LowerBound(u64::MAX - 10).multiplier(u64::MAX), 1);
    }

    #[test]
    fn oversized_draws_are_refused() {
        let mut rng = StdRng::seed_from_u64(4);
        for floor in [u64::MAX, u64::MAX - 10, MAX_SAMPLES + 1].iter() {
            let mut sampler = ImportanceSampler::new(SamplingPolicy::LowerBound(*floor));
            match sampler.sample(&field(vec![3; 16]), &mut rng) {
                Err(RenderError::InvalidOptions(_)) => {}
                other => panic!("{:?} drew {:?}", floor, other.map(|p| p.len())),
            }
            assert_eq!(sampler.arena().high_water_mark(), 0);
        }
        let mut sampler = ImportanceSampler::new(SamplingPolicy::Multiplier(u32::MAX));
        assert!(sampler.sample(&field(vec![255; 16]), &mut rng).is_err());
    }

    #[test]
    fn one_hot_cell_emits_its_intensity() {
        let mut values = vec![0; 16];
        values[2 * 4 + 1] = 2;
        let f = field(values);
        let mut sampler = ImportanceSampler::new(SamplingPolicy::Multiplier(1));
        let mut rng = StdRng::seed_from_u64(7);
        let points = sampler.sample(&f, &mut rng).unwrap();

        assert_eq!(points.len(), 2);
        let origin = Complex::new(-1.0, 0.0);
        for p in points {
            assert_eq!(p.weight, 0.5);
            assert!(p.c.re >= origin.re - 1.0 && p.c.re <= origin.re + 2.0);
            assert!(p.c.im >= origin.im - 1.0 && p.c.im <= origin.im + 2.0);
        }
    }

    #[test]
    fn every_cell_contributes_unit_weight() {
        let values: Vec<u8> = (0..16).map(|i| (i * 7 % 5) as u8).collect();
        let f = field(values.clone());
        let mut sampler = ImportanceSampler::new(SamplingPolicy::Multiplier(3));
        let mut rng = StdRng::seed_from_u64(11);
        let points = sampler.sample(&f, &mut rng).unwrap().to_vec();

        let expected: usize = values.iter().map(|v| *v as usize * 3).sum();
        assert_eq!(points.len(), expected);

        let mut cursor = 0;
        for v in values.iter().map(|v| *v as usize * 3) {
            let cell = &points[cursor..cursor + v];
            if v > 0 {
                let sum: f64 = cell.iter().map(|p| p.weight).sum();
                assert!((sum - 1.0).abs() < 1e-12);
            }
            cursor += v;
        }
    }

    #[test]
    fn jitter_stays_near_its_cell() {
        let f = field(vec![255; 16]);
        let mut sampler = ImportanceSampler::new(SamplingPolicy::Multiplier(1));
        let mut rng = StdRng::seed_from_u64(3);
        for p in sampler.sample(&f, &mut rng).unwrap() {
            assert!(p.c.re >= -2.5 && p.c.re <= 2.5);
            assert!(p.c.im >= -2.5 && p.c.im <= 2.5);
        }
    }

    #[test]
    fn arena_tracks_the_largest_frame() {
        let mut sampler = ImportanceSampler::new(SamplingPolicy::Multiplier(1));
        let mut rng = StdRng::seed_from_u64(5);
        sampler.sample(&field(vec![10; 16]), &mut rng).unwrap();
        let capacity = sampler.arena().capacity();
        sampler.sample(&field(vec![1; 16]), &mut rng).unwrap();

        assert_eq!(sampler.arena().len(), 16);
        assert_eq!(sampler.arena().high_water_mark(), 160);
        assert_eq!(sampler.arena().capacity(), capacity);
    }

    #[test]
    fn empty_field_draws_nothing() {
        let mut sampler = ImportanceSampler::new(SamplingPolicy::LowerBound(1_000));
        let mut rng = StdRng::seed_from_u64(1);
        assert!(sampler.sample(&field(vec![0; 16]), &mut rng).unwrap().is_empty());
    }
}

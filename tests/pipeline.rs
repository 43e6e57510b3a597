// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use hyperbuddha::kernel::{escape_time, Escape};
use hyperbuddha::updates::decode_channel_colormap;
use hyperbuddha::*;
use num::Complex;
use rand::rngs::StdRng;
use rand::SeedableRng;

// The identity quadratic map: only z2_scaler and z2_yscale are set.
fn quadratic() -> FractalParameters {
    let mut v = [0.0_f32; 13];
    v[3] = 1.0;
    v[5] = 1.0;
    FractalParameters::from_array(v)
}

#[test]
fn one_hot_cell_emits_two_half_weight_points() {
    let kernel = PolynomialKernel::configure(&quadratic()).unwrap();
    let z = Complex::new(0.5, -0.25);
    let c = Complex::new(0.1, 0.3);
    assert!((kernel.iterate(z, c) - (z * z + c)).norm() < 1e-12);

    let mut values = vec![0_u8; 16];
    values[4 + 2] = 2;
    let field = ImportanceField::canonical(4, 4, values).unwrap();
    let mut sampler = ImportanceSampler::new(SamplingPolicy::Multiplier(1));
    let mut rng = StdRng::seed_from_u64(2024);
    let points = sampler.sample(&field, &mut rng).unwrap();

    assert_eq!(points.len(), 2);
    // Cell (2, 1) spans [0, 1] x [-1, 0].
    for p in points {
        assert_eq!(p.weight, 0.5);
        assert!(p.c.re >= -1.0 && p.c.re <= 2.0, "{:?}", p);
        assert!(p.c.im >= -2.0 && p.c.im <= 1.0, "{:?}", p);
    }
}

#[test]
fn estimated_cells_contribute_unit_weight() {
    let kernel = PolynomialKernel::configure(&quadratic()).unwrap();
    let field = DensityEstimator::new(64, 200, 1, 2).unwrap().estimate(&kernel).unwrap();
    assert!(field.total() > 0);

    let mut sampler = ImportanceSampler::new(SamplingPolicy::LowerBound(5_000));
    let mut rng = StdRng::seed_from_u64(8);
    let points = sampler.sample(&field, &mut rng).unwrap().to_vec();
    assert!(points.len() >= 5_000);

    let total_weight: f64 = points.iter().map(|p| p.weight).sum();
    let live_cells = field.values().iter().filter(|v| **v > 0).count();
    assert!((total_weight - live_cells as f64).abs() < 1e-6);
}

#[test]
fn trajectory_diverging_at_step_ten_leaves_no_trace() {
    let kernel = PolynomialKernel::configure(&quadratic()).unwrap();
    // Escape time falls as c moves right of 1/4; bisect for step 10.
    let (mut lo, mut hi) = (0.25_f64, 2.0_f64);
    for _ in 0..200 {
        let mid = (lo + hi) / 2.0;
        match escape_time(&kernel, Complex::new(mid, 0.0), 256) {
            Escape::Escaped(step) if step <= 10 => hi = mid,
            _ => lo = mid,
        }
    }
    let c = Complex::new(hi, 0.0);
    assert_eq!(escape_time(&kernel, c, 256), Escape::Escaped(10));

    let accumulator = TrajectoryAccumulator::new(64, 64, ChannelLayout::Spectral, 2).unwrap();
    assert_eq!(accumulator.divergence(&kernel, c), None);
    let buffer = accumulator
        .accumulate(&kernel, &[SamplePoint { c, weight: 1.0 }; 8])
        .unwrap();
    assert!(buffer.data().iter().all(|v| *v == 0.0));
}

#[test]
fn colormap_blobs_round_trip_every_stop() {
    for len in [2_usize, 5, 64].iter() {
        let stops: Vec<f32> = (0..len * 3).map(|i| i as f32 / 10.0).collect();
        let blob: Vec<u8> = stops.iter().flat_map(|v| v.to_le_bytes().to_vec()).collect();
        let colormap = decode_channel_colormap([&blob, &blob, &blob]).unwrap();
        assert_eq!(colormap.len(), *len);
        for i in 0..*len {
            let want = [stops[3 * i], stops[3 * i + 1], stops[3 * i + 2]];
            assert_eq!(colormap.stop(0, i), want);
        }
    }
}

#[test]
fn identical_frames_denoise_to_their_mean() {
    let kernel = PolynomialKernel::configure(&quadratic()).unwrap();
    let field = DensityEstimator::new(32, 128, 1, 1).unwrap().estimate(&kernel).unwrap();
    let mut sampler = ImportanceSampler::new(SamplingPolicy::Multiplier(2));
    let mut rng = StdRng::seed_from_u64(77);
    let accumulator = TrajectoryAccumulator::new(24, 24, ChannelLayout::Spectral, 2).unwrap();
    let frame = accumulator
        .accumulate(&kernel, sampler.sample(&field, &mut rng).unwrap())
        .unwrap();

    let mut frames = FrameSampleSet::new();
    for _ in 0..20 {
        frames.push(frame.clone()).unwrap();
    }
    let stats = frames.statistics().unwrap();
    assert!(stats.variance.data().iter().all(|v| *v == 0.0));
    assert_eq!(NlmFilter::new(2).apply(&stats).unwrap(), stats.mean);
    assert_eq!(stats.mean, frame);
}

#[test]
fn renderer_produces_a_colored_image() {
    let options = RenderOptions {
        sampler_size: 64,
        mipmap_level: 1,
        sampler_max_iterations: 128,
        policy: SamplingPolicy::LowerBound(3_000),
        width: 40,
        height: 30,
        denoise_frames: 3,
        threads: 2,
        seed: Some(5),
        ..RenderOptions::default()
    };
    let mut renderer = Renderer::<PolynomialKernel>::new(options, &quadratic()).unwrap();
    let image = renderer
        .render_image(&Colormap::named("default").unwrap(), true)
        .unwrap();
    assert_eq!(image.dimensions(), (40, 30));
    assert!(image.pixels().all(|p| p.0[3] == 255));
    assert!(image.pixels().any(|p| p.0[0] > 0 || p.0[1] > 0 || p.0[2] > 0));

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("frame.raw");
    output::save(&image, &path).unwrap();
    assert_eq!(std::fs::metadata(&path).unwrap().len(), 40 * 30 * 4);
}

#[test]
fn live_updates_reach_the_next_frame() {
    let shared = SharedInputs::new();
    let updater = Updater::new(shared.clone());
    let inputs = LiveInputs::new(shared, quadratic(), Colormap::default());
    let options = RenderOptions {
        sampler_size: 32,
        sampler_max_iterations: 64,
        policy: SamplingPolicy::Multiplier(1),
        width: 16,
        height: 16,
        threads: 1,
        seed: Some(1),
        ..RenderOptions::default()
    };
    let mut context = RenderContext::<ClassicKernel>::new(options, inputs).unwrap();
    context.render_frame().unwrap();

    assert!(!updater.apply_line("params 1 2 3"));
    assert!(updater.apply_line("colormap red"));
    context.render_frame().unwrap();
    assert_eq!(*context.inputs().colormap(), Colormap::named("red").unwrap());
    assert_eq!(*context.inputs().parameters(), quadratic());
}

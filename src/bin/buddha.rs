// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use clap::{App, Arg, ArgMatches};
use hyperbuddha::colormap::COLORMAP_NAMES;
use hyperbuddha::kernel::PARAMETER_NAMES;
use hyperbuddha::pipeline::MAX_RENDER_ITERATIONS;
use hyperbuddha::sampler::MAX_SAMPLES;
use hyperbuddha::{
    output, ChannelLayout, ClassicKernel, Colormap, FractalKernel, FractalParameters, FractalVariant,
    PolynomialKernel, RenderError, RenderOptions, Renderer, Result, SamplingPolicy,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

fn validate_parse<T: FromStr>(s: &str, err: &str) -> std::result::Result<(), String> {
    match T::from_str(s) {
        Ok(_) => Ok(()),
        Err(_) => Err(err.to_string()),
    }
}

fn validate_range<T: FromStr + Ord>(
    s: &str,
    low: T,
    high: T,
    isnotanumber_err: &str,
    isnotinrange_err: &str,
) -> std::result::Result<(), String> {
    match T::from_str(s) {
        Ok(i) => {
            if i >= low && i <= high {
                Ok(())
            } else {
                Err(isnotinrange_err.to_string())
            }
        }
        Err(_) => Err(isnotanumber_err.to_string()),
    }
}

const OUTPUT: &str = "output";
const WIDTH: &str = "width";
const HEIGHT: &str = "height";
const SAMPLES: &str = "samples";
const MULTIPLIER: &str = "multiplier";
const FRACTAL: &str = "fractal";
const PRESET: &str = "preset";
const PROFILE: &str = "profile";
const SAMPLER_SIZE: &str = "sampler-size";
const FRAMES: &str = "frames";
const LAYOUT: &str = "layout";
const NO_DENOISE: &str = "no-denoise";
const ITERATIONS: &str = "iterations";
const EXPOSURE: &str = "exposure";
const THREADS: &str = "threads";
const SEED: &str = "seed";
const COLORMAP: &str = "colormap";

// Long flags may be spelled with one dash, `-width 64`.  Negative
// numbers and short flags are left alone.
fn normalize_args<I: IntoIterator<Item = String>>(args: I) -> Vec<String> {
    args.into_iter()
        .enumerate()
        .map(|(i, arg)| {
            let single_dash_long = i > 0
                && arg.len() > 2
                && arg.starts_with('-')
                && !arg.starts_with("--")
                && arg[1..].chars().next().map_or(false, |c| c.is_ascii_alphabetic());
            if single_dash_long {
                format!("-{}", arg)
            } else {
                arg
            }
        })
        .collect()
}

fn args<'a>() -> ArgMatches<'a> {
    let max_threads = num_cpus::get();
    let variants: Vec<&'static str> = FractalVariant::ALL.iter().map(|v| v.name()).collect();

    let mut app = App::new("buddha")
        .version(env!("CARGO_PKG_VERSION"))
        .author("Elf M. Sternberg <elf.sternberg@gmail.com>")
        .about("Renders one denoised frame of a generalized Buddhabrot")
        .arg(
            Arg::with_name(OUTPUT)
                .required(true)
                .long(OUTPUT)
                .short("o")
                .takes_value(true)
                .help("Output file; .png writes a PNG, anything else raw bottom-up RGBA8"),
        )
        .arg(
            Arg::with_name(WIDTH)
                .long(WIDTH)
                .takes_value(true)
                .validator(|s| validate_range(&s, 1, 16384, "Could not parse width", "Width must be between 1 and 16384"))
                .help("Image width"),
        )
        .arg(
            Arg::with_name(HEIGHT)
                .long(HEIGHT)
                .takes_value(true)
                .validator(|s| validate_range(&s, 1, 16384, "Could not parse height", "Height must be between 1 and 16384"))
                .help("Image height"),
        )
        .arg(
            Arg::with_name(SAMPLES)
                .long(SAMPLES)
                .takes_value(true)
                .conflicts_with(MULTIPLIER)
                .validator(|s| validate_range(&s, 1, MAX_SAMPLES, "Could not parse sample count", "Sample count is out of range"))
                .help("Least number of sample points per frame"),
        )
        .arg(
            Arg::with_name(MULTIPLIER)
                .long(MULTIPLIER)
                .takes_value(true)
                .validator(|s| validate_range(&s, 1, 1_000_000, "Could not parse multiplier", "Multiplier must be between 1 and 1000000"))
                .help("Sample points per unit of importance"),
        )
        .arg(
            Arg::with_name(FRACTAL)
                .long(FRACTAL)
                .takes_value(true)
                .possible_values(&variants)
                .default_value("polynomial")
                .help("Fractal kernel"),
        )
        .arg(
            Arg::with_name(PRESET)
                .long(PRESET)
                .takes_value(true)
                .validator(|s| FractalParameters::preset(&s).map(|_| ()).map_err(|e| e.to_string()))
                .help("Starting parameters; individual parameter flags override them"),
        )
        .arg(
            Arg::with_name(PROFILE)
                .long(PROFILE)
                .takes_value(true)
                .validator(|s| RenderOptions::profile(&s).map(|_| ()).map_err(|e| e.to_string()))
                .help("Quality profile such as 512/50k; other flags override it"),
        )
        .arg(
            Arg::with_name(SAMPLER_SIZE)
                .long(SAMPLER_SIZE)
                .takes_value(true)
                .validator(|s| validate_range(&s, 2, 8192, "Could not parse sampler size", "Sampler size must be between 2 and 8192"))
                .help("Edge of the importance estimation grid"),
        )
        .arg(
            Arg::with_name(FRAMES)
                .long(FRAMES)
                .takes_value(true)
                .validator(|s| validate_range(&s, 1, 1000, "Could not parse frame count", "Frame count must be between 1 and 1000"))
                .help("Frames combined by the denoiser"),
        )
        .arg(
            Arg::with_name(LAYOUT)
                .long(LAYOUT)
                .takes_value(true)
                .possible_values(&["spectral", "single"])
                .help("Three channels by escape time, or one"),
        )
        .arg(
            Arg::with_name(NO_DENOISE)
                .long(NO_DENOISE)
                .help("Render a single noisy frame"),
        )
        .arg(
            Arg::with_name(ITERATIONS)
                .long(ITERATIONS)
                .short("i")
                .takes_value(true)
                .validator(move |s| {
                    validate_range(
                        &s,
                        1,
                        MAX_RENDER_ITERATIONS,
                        "Could not parse iteration count",
                        &format!("Iteration count must be between 1 and {}", MAX_RENDER_ITERATIONS),
                    )
                })
                .help("Longest trajectory followed"),
        )
        .arg(
            Arg::with_name(EXPOSURE)
                .long(EXPOSURE)
                .takes_value(true)
                .allow_hyphen_values(true)
                .validator(|s| validate_parse::<f32>(&s, "Could not parse exposure"))
                .help("Stops of exposure"),
        )
        .arg(
            Arg::with_name(THREADS)
                .long(THREADS)
                .short("t")
                .takes_value(true)
                .validator(move |s| {
                    validate_range(
                        &s,
                        1,
                        max_threads,
                        "Could not parse thread count",
                        &format!("Thread count must be between 1 and {}", max_threads),
                    )
                })
                .help("Number of threads per stage"),
        )
        .arg(
            Arg::with_name(SEED)
                .long(SEED)
                .takes_value(true)
                .validator(|s| validate_parse::<u64>(&s, "Could not parse seed"))
                .help("Seed for reproducible renders"),
        )
        .arg(
            Arg::with_name(COLORMAP)
                .long(COLORMAP)
                .takes_value(true)
                .possible_values(&COLORMAP_NAMES)
                .default_value("default")
                .help("Built-in colormap"),
        );

    for name in PARAMETER_NAMES.iter().copied() {
        app = app.arg(
            Arg::with_name(name)
                .long(name)
                .takes_value(true)
                .allow_hyphen_values(true)
                .validator(|s| validate_parse::<f32>(&s, "Could not parse parameter value"))
                .help("Fractal coefficient"),
        );
    }

    app.get_matches_from(normalize_args(std::env::args()))
}

// Values have been validated by clap by the time they are read.
fn value<T: FromStr>(matches: &ArgMatches, name: &str) -> Result<Option<T>> {
    match matches.value_of(name) {
        None => Ok(None),
        Some(s) => T::from_str(s)
            .map(Some)
            .map_err(|_| RenderError::InvalidOptions(format!("bad value for {}: {}", name, s))),
    }
}

fn render_options(matches: &ArgMatches) -> Result<RenderOptions> {
    let mut options = match matches.value_of(PROFILE) {
        Some(name) => RenderOptions::profile(name)?,
        None => RenderOptions::default(),
    };
    if let Some(width) = value(matches, WIDTH)? {
        options.width = width;
    }
    if let Some(height) = value(matches, HEIGHT)? {
        options.height = height;
    }
    if let Some(bound) = value(matches, SAMPLES)? {
        options.policy = SamplingPolicy::LowerBound(bound);
    }
    if let Some(multiplier) = value(matches, MULTIPLIER)? {
        options.policy = SamplingPolicy::Multiplier(multiplier);
    }
    if let Some(size) = value(matches, SAMPLER_SIZE)? {
        options.sampler_size = size;
    }
    if let Some(frames) = value(matches, FRAMES)? {
        options.denoise_frames = frames;
    }
    if let Some(layout) = value::<ChannelLayout>(matches, LAYOUT)? {
        options.layout = layout;
    }
    if let Some(iterations) = value(matches, ITERATIONS)? {
        options.iterations = Some(iterations);
    }
    if let Some(exposure) = value(matches, EXPOSURE)? {
        options.exposure = exposure;
    }
    if let Some(threads) = value(matches, THREADS)? {
        options.threads = threads;
    }
    options.seed = value(matches, SEED)?;
    options.validate()?;
    Ok(options)
}

fn fractal_parameters(matches: &ArgMatches) -> Result<FractalParameters> {
    let mut parameters = match matches.value_of(PRESET) {
        Some(name) => FractalParameters::preset(name)?,
        None => FractalParameters::default(),
    };
    for name in PARAMETER_NAMES.iter().copied() {
        if let Some(v) = value::<f32>(matches, name)? {
            parameters.set(name, v)?;
        }
    }
    Ok(parameters)
}

fn render<K: FractalKernel>(
    options: RenderOptions,
    parameters: &FractalParameters,
    colormap: &Colormap,
    denoise: bool,
    path: &Path,
) -> Result<()> {
    let mut renderer = Renderer::<K>::new(options, parameters)?;
    let image = renderer.render_image(colormap, denoise)?;
    output::save(&image, path)?;
    Ok(())
}

fn run(matches: &ArgMatches) -> Result<()> {
    let options = render_options(matches)?;
    let parameters = fractal_parameters(matches)?;
    let variant = FractalVariant::from_str(matches.value_of(FRACTAL).unwrap_or("polynomial"))?;
    let colormap = Colormap::named(matches.value_of(COLORMAP).unwrap_or("default"))?;
    let denoise = !matches.is_present(NO_DENOISE);
    let path = PathBuf::from(matches.value_of(OUTPUT).unwrap_or("output.raw"));

    info!(
        fractal = %variant,
        width = options.width,
        height = options.height,
        policy = ?options.policy,
        frames = if denoise { options.denoise_frames } else { 1 },
        "rendering"
    );
    match variant {
        FractalVariant::Polynomial => {
            render::<PolynomialKernel>(options, &parameters, &colormap, denoise, &path)
        }
        FractalVariant::Classic => {
            render::<ClassicKernel>(options, &parameters, &colormap, denoise, &path)
        }
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let matches = args();
    if let Err(e) = run(&matches) {
        eprintln!("Render failure: {}", e);
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(args: &[&str]) -> Vec<String> {
        args.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn single_dash_long_flags_are_normalized() {
        let out = normalize_args(strings(&["buddha", "-width", "64", "-o", "x.raw", "-z1_angle", "-90"]));
        assert_eq!(
            out,
            strings(&["buddha", "--width", "64", "-o", "x.raw", "--z1_angle", "-90"])
        );
        let untouched = strings(&["buddha", "--height", "8", "-0.5", "-t"]);
        assert_eq!(normalize_args(untouched.clone()), untouched);
    }
}

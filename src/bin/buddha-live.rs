// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::io::{self, BufRead};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use clap::{App, Arg, ArgMatches};
use hyperbuddha::colormap::COLORMAP_NAMES;
use hyperbuddha::{
    output, run, ChannelLayout, ClassicKernel, Colormap, FractalKernel, FractalParameters,
    FractalVariant, LiveInputs, PolynomialKernel, RenderContext, RenderError, RenderOptions,
    Result, SharedInputs, Updater,
};
use image::RgbaImage;
use tracing::info;
use tracing_subscriber::EnvFilter;

const OUTPUT: &str = "output";
const WIDTH: &str = "width";
const HEIGHT: &str = "height";
const FRACTAL: &str = "fractal";
const PRESET: &str = "preset";
const PROFILE: &str = "profile";
const LAYOUT: &str = "layout";
const COLORMAP: &str = "colormap";
const THREADS: &str = "threads";
const SEED: &str = "seed";
const MAX_FRAMES: &str = "max-frames";
const DECAY: &str = "decay";

fn validate_parse<T: FromStr>(s: &str, err: &str) -> std::result::Result<(), String> {
    match T::from_str(s) {
        Ok(_) => Ok(()),
        Err(_) => Err(err.to_string()),
    }
}

fn validate_decay(s: &str) -> std::result::Result<(), String> {
    match f32::from_str(s) {
        Ok(d) if d > 0.0 && d <= 1.0 => Ok(()),
        Ok(_) => Err("Decay must be in (0, 1]".to_string()),
        Err(_) => Err("Could not parse decay".to_string()),
    }
}

fn args<'a>() -> ArgMatches<'a> {
    let variants: Vec<&'static str> = FractalVariant::ALL.iter().map(|v| v.name()).collect();
    App::new("buddha-live")
        .version(env!("CARGO_PKG_VERSION"))
        .author("Elf M. Sternberg <elf.sternberg@gmail.com>")
        .about(
            "Renders continuously, rewriting one image per frame.  Reads updates from \
             stdin, one per line: `params <13 floats>`, `preset <name>` or `colormap <name>`.",
        )
        .arg(
            Arg::with_name(OUTPUT)
                .long(OUTPUT)
                .short("o")
                .takes_value(true)
                .default_value("live.png")
                .help("Image rewritten after every frame"),
        )
        .arg(
            Arg::with_name(WIDTH)
                .long(WIDTH)
                .takes_value(true)
                .default_value("800")
                .validator(|s| validate_parse::<usize>(&s, "Could not parse width"))
                .help("Image width"),
        )
        .arg(
            Arg::with_name(HEIGHT)
                .long(HEIGHT)
                .takes_value(true)
                .default_value("800")
                .validator(|s| validate_parse::<usize>(&s, "Could not parse height"))
                .help("Image height"),
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
                .default_value("buddhabrot")
                .validator(|s| FractalParameters::preset(&s).map(|_| ()).map_err(|e| e.to_string()))
                .help("Starting parameters"),
        )
        .arg(
            Arg::with_name(PROFILE)
                .long(PROFILE)
                .takes_value(true)
                .default_value("512/50k")
                .validator(|s| RenderOptions::profile(&s).map(|_| ()).map_err(|e| e.to_string()))
                .help("Quality profile"),
        )
        .arg(
            Arg::with_name(LAYOUT)
                .long(LAYOUT)
                .takes_value(true)
                .possible_values(&["spectral", "single"])
                .default_value("spectral")
                .help("Three channels by escape time, or one"),
        )
        .arg(
            Arg::with_name(COLORMAP)
                .long(COLORMAP)
                .takes_value(true)
                .possible_values(&COLORMAP_NAMES)
                .default_value("default")
                .help("Starting colormap"),
        )
        .arg(
            Arg::with_name(THREADS)
                .long(THREADS)
                .short("t")
                .takes_value(true)
                .validator(|s| validate_parse::<usize>(&s, "Could not parse thread count"))
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
            Arg::with_name(MAX_FRAMES)
                .long(MAX_FRAMES)
                .takes_value(true)
                .validator(|s| validate_parse::<u64>(&s, "Could not parse frame count"))
                .help("Stop after this many frames; runs forever otherwise"),
        )
        .arg(
            Arg::with_name(DECAY)
                .long(DECAY)
                .takes_value(true)
                .default_value("1")
                .validator(|s| validate_decay(&s))
                .help("Weight kept by older frames each pass; 1 refines a still scene, 0.9 follows motion"),
        )
        .get_matches()
}

fn value<T: FromStr>(matches: &ArgMatches, name: &str) -> Result<Option<T>> {
    match matches.value_of(name) {
        None => Ok(None),
        Some(s) => T::from_str(s)
            .map(Some)
            .map_err(|_| RenderError::InvalidOptions(format!("bad value for {}: {}", name, s))),
    }
}

fn render_options(matches: &ArgMatches) -> Result<RenderOptions> {
    let mut options = RenderOptions::profile(matches.value_of(PROFILE).unwrap_or("512/50k"))?;
    if let Some(width) = value(matches, WIDTH)? {
        options.width = width;
    }
    if let Some(height) = value(matches, HEIGHT)? {
        options.height = height;
    }
    if let Some(layout) = value::<ChannelLayout>(matches, LAYOUT)? {
        options.layout = layout;
    }
    if let Some(threads) = value(matches, THREADS)? {
        options.threads = threads;
    }
    options.seed = value(matches, SEED)?;
    options.validate()?;
    Ok(options)
}

// Feeds stdin lines to the updater until stdin closes.
fn spawn_stdin_producer(updater: Updater) {
    thread::spawn(move || {
        let stdin = io::stdin();
        for line in stdin.lock().lines() {
            match line {
                Ok(line) => {
                    updater.apply_line(&line);
                }
                Err(_) => break,
            }
        }
        info!("update stream closed");
    });
}

fn live<K: FractalKernel>(
    options: RenderOptions,
    inputs: LiveInputs,
    path: PathBuf,
    max_frames: Option<u64>,
    decay: f32,
) -> Result<u64> {
    let mut context = RenderContext::<K>::with_decay(options, inputs, decay)?;
    let stop = AtomicBool::new(false);
    let mut written = 0;
    let mut sink = |frame: &RgbaImage| -> Result<()> {
        output::save(frame, &path)?;
        written += 1;
        if max_frames.map_or(false, |max| written >= max) {
            stop.store(true, Ordering::SeqCst);
        }
        Ok(())
    };
    Ok(run(&mut context, &mut sink, &stop))
}

fn start(matches: &ArgMatches) -> Result<u64> {
    let options = render_options(matches)?;
    let parameters = FractalParameters::preset(matches.value_of(PRESET).unwrap_or("buddhabrot"))?;
    let colormap = Colormap::named(matches.value_of(COLORMAP).unwrap_or("default"))?;
    let variant = FractalVariant::from_str(matches.value_of(FRACTAL).unwrap_or("polynomial"))?;
    let path = PathBuf::from(matches.value_of(OUTPUT).unwrap_or("live.png"));
    let max_frames = value(matches, MAX_FRAMES)?;
    let decay = value(matches, DECAY)?.unwrap_or(1.0);

    let shared = SharedInputs::new();
    spawn_stdin_producer(Updater::new(shared.clone()));
    let inputs = LiveInputs::new(shared, parameters, colormap);

    info!(fractal = %variant, path = %path.display(), "live rendering started");
    match variant {
        FractalVariant::Polynomial => {
            live::<PolynomialKernel>(options, inputs, path, max_frames, decay)
        }
        FractalVariant::Classic => live::<ClassicKernel>(options, inputs, path, max_frames, decay),
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let matches = args();
    match start(&matches) {
        Ok(frames) => info!(frames, "live rendering stopped"),
        Err(e) => {
            eprintln!("Render failure: {}", e);
            std::process::exit(1);
        }
    }
}

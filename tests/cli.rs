// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::fs;

use assert_cmd::Command;
use predicates::prelude::*;

// A small estimation grid and two frames keep debug builds quick.
fn buddha() -> Command {
    let mut cmd = Command::cargo_bin("buddha").unwrap();
    cmd.args(&["--sampler-size", "256", "--frames", "2", "--seed", "1"]);
    cmd
}

#[test]
fn raw_output_is_rgba8_per_pixel() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("test.raw");
    buddha()
        .args(&["-width", "64", "-height", "64", "-samples", "1000", "-o"])
        .arg(&out)
        .assert()
        .success();
    assert_eq!(fs::metadata(&out).unwrap().len(), 64 * 64 * 4);
}

// Full defaults: a 1024 grid and twenty frames.  Slow in debug builds;
// run with `cargo test --release -- --ignored`.
#[test]
#[ignore]
fn raw_output_with_default_quality() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("test.raw");
    Command::cargo_bin("buddha")
        .unwrap()
        .args(&["-width", "64", "-height", "64", "-samples", "1000", "-o"])
        .arg(&out)
        .assert()
        .success();
    assert_eq!(fs::metadata(&out).unwrap().len(), 64 * 64 * 4);
}

#[test]
fn sample_count_is_capped() {
    Command::cargo_bin("buddha")
        .unwrap()
        .args(&["-samples", "18446744073709551615", "-o", "never.raw"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Sample count is out of range"));
}

#[test]
fn parameter_flags_take_negative_values() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("rotated.raw");
    buddha()
        .args(&[
            "-width",
            "40",
            "-height",
            "24",
            "-samples",
            "1000",
            "-rotation_zxcx",
            "-30",
            "--z2_angle",
            "-5.5",
            "-output",
        ])
        .arg(&out)
        .assert()
        .success();
    assert_eq!(fs::metadata(&out).unwrap().len(), 40 * 24 * 4);
}

#[test]
fn png_output_by_extension() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("test.png");
    buddha()
        .args(&["-width", "32", "-height", "16", "--preset", "tricorn", "--layout", "single", "-o"])
        .arg(&out)
        .assert()
        .success();
    let image = image::open(&out).unwrap();
    assert_eq!((image.width(), image.height()), (32, 16));
}

#[test]
fn samples_and_multiplier_conflict() {
    Command::cargo_bin("buddha")
        .unwrap()
        .args(&["-samples", "1000", "--multiplier", "2", "-o", "never.raw"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("cannot be used with"));
}

#[test]
fn unknown_preset_is_rejected() {
    Command::cargo_bin("buddha")
        .unwrap()
        .args(&["--preset", "mandelbulb", "-o", "never.raw"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("mandelbulb"));
}

#[test]
fn output_is_required() {
    Command::cargo_bin("buddha")
        .unwrap()
        .assert()
        .failure()
        .stderr(predicate::str::contains("output"));
}

#[test]
fn live_decay_must_be_a_fraction() {
    Command::cargo_bin("buddha-live")
        .unwrap()
        .args(&["--decay", "1.5", "--max-frames", "1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Decay"));
}

#[test]
fn live_renderer_stops_after_max_frames() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("live.raw");
    Command::cargo_bin("buddha-live")
        .unwrap()
        .args(&[
            "--profile",
            "512/10k",
            "--width",
            "24",
            "--height",
            "24",
            "--max-frames",
            "2",
            "--seed",
            "3",
            "--decay",
            "0.9",
            "-o",
        ])
        .arg(&out)
        .write_stdin("params 1 2\npreset z3\ncolormap red\n")
        .assert()
        .success();
    assert_eq!(fs::metadata(&out).unwrap().len(), 24 * 24 * 4);
}

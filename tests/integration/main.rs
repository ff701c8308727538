// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Integration tests.
//!
//! Some help for laying out these tests was taken from:
//! https://matklad.github.io/2021/02/27/delete-cargo-integration-tests.html

mod no_stderr;

use std::{
    path::{Path, PathBuf},
    process::Output,
    str::from_utf8,
};

use assert_cmd::{output::OutputError, Command};
use ndarray::prelude::*;
use tempfile::TempDir;

use solar_radiation_model::{
    constants::*,
    store::{DirStore, VariableStore},
};

const ROWS: usize = 4;
const COLS: usize = 5;

fn solar_model() -> Command {
    Command::cargo_bin("solar-model").unwrap()
}

fn get_cmd_output(result: Result<Output, OutputError>) -> (String, String) {
    let output = match result {
        Ok(o) => o,
        Err(o) => o.as_output().unwrap().clone(),
    };
    (
        from_utf8(&output.stdout).unwrap().to_string(),
        from_utf8(&output.stderr).unwrap().to_string(),
    )
}

/// A deployment directory: a few daylight images from 2015-01-06 and
/// regular reference stores for the elevation and turbidity.
struct Deployment {
    tmp: TempDir,
}

impl Deployment {
    fn new() -> Deployment {
        let tmp = TempDir::new().expect("couldn't make tmp dir");
        std::fs::create_dir(tmp.path().join("data")).unwrap();
        for hour in [13, 14, 15] {
            write_image(&tmp.path().join("data"), hour);
        }
        write_reference(&tmp.path().join("dem"), false);
        write_reference(&tmp.path().join("linke"), true);
        Deployment { tmp }
    }

    fn path(&self, name: &str) -> String {
        self.tmp.path().join(name).display().to_string()
    }

    #[rustfmt::skip]
    fn args(&self, subcommand: &str) -> Vec<String> {
        let data = format!("{}/*.nc", self.path("data"));
        let (static_file, dem, linke) = (self.path("static"), self.path("dem"), self.path("linke"));
        let (cache, product) = (self.path("temporal_cache"), self.path("product"));
        let args: [&str; 15] = [
            subcommand,
            "--data", &data,
            "--static-file", &static_file,
            "--elevation", &dem,
            "--turbidity", &linke,
            "--temporal-cache", &cache,
            "--product", &product,
            "--no-filter",
            "--no-progress-bars",
        ];
        args.into_iter().map(str::to_string).collect()
    }
}

fn write_image(dir: &Path, hour: u32) -> PathBuf {
    let path = dir.join(format!("goes13.2015.006.{hour:02}0000.BAND_01.nc"));
    let (mut store, _) = DirStore::open(&path).unwrap();
    let dims = [DIM_TIME, DIM_Y, DIM_X];
    let lat = Array3::from_shape_fn((1, ROWS, COLS), |(_, r, _)| -31.0 - 0.1 * r as f32);
    let lon = Array3::from_shape_fn((1, ROWS, COLS), |(_, _, c)| -64.0 + 0.1 * c as f32);
    let counts = Array3::from_shape_fn((1, ROWS, COLS), |(_, r, c)| {
        3000.0 + 40.0 * ((r + c) % 3) as f32
    });
    store.write(VAR_LAT, &dims, lat.into_dyn().view()).unwrap();
    store.write(VAR_LON, &dims, lon.into_dyn().view()).unwrap();
    store.write(VAR_DATA, &dims, counts.into_dyn().view()).unwrap();
    for (name, value) in [
        (VAR_COUNTS_SHIFT, 32.0),
        (VAR_SPACE_MEASUREMENT, 29.0),
        (VAR_PRELAUNCH, 0.6118),
        (VAR_POSTLAUNCH, 1.1),
    ] {
        store
            .write(name, &[], arr0(value).into_dyn().view())
            .unwrap();
    }
    store.sync().unwrap();
    path
}

fn write_reference(path: &Path, with_linke: bool) {
    let (mut store, _) = DirStore::open(path).unwrap();
    let lat = Array1::from_shape_fn(5, |i| -34.0 + i as f32);
    let lon = Array1::from_shape_fn(4, |i| -66.0 + i as f32);
    store
        .write(VAR_LAT, &["lat"], lat.into_dyn().view())
        .unwrap();
    store
        .write(VAR_LON, &["lon"], lon.into_dyn().view())
        .unwrap();
    if with_linke {
        let linke = Array3::from_shape_fn((12, 5, 4), |(m, _, _)| (50 + m) as f32);
        store
            .write(VAR_LINKE, &[DIM_MONTHS, "lat", "lon"], linke.into_dyn().view())
            .unwrap();
    } else {
        let dem = Array2::from_elem((5, 4), 450.0);
        store
            .write(VAR_DEM, &["lat", "lon"], dem.into_dyn().view())
            .unwrap();
    }
    store.sync().unwrap();
}

#[test]
fn help_and_version_work() {
    let cmd = solar_model().arg("--help").ok();
    assert!(cmd.is_ok(), "--help failed: {}", cmd.err().unwrap());
    let (stdout, _) = get_cmd_output(cmd);
    assert!(stdout.contains("static-layers"));
    assert!(stdout.contains("estimate"));

    let cmd = solar_model().arg("--version").ok();
    let (stdout, _) = get_cmd_output(cmd);
    assert!(stdout.contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn missing_images_are_reported() {
    let tmp = TempDir::new().unwrap();
    let pattern = format!("{}/*.nc", tmp.path().display());
    let cmd = solar_model()
        .args(["estimate", "--data", &pattern, "--no-progress-bars"])
        .ok();
    assert!(cmd.is_err());
    let (_, stderr) = get_cmd_output(cmd);
    assert!(stderr.starts_with("Error:"), "unexpected stderr: {stderr}");
}

#[test]
fn dry_runs_do_not_write_anything() {
    let deployment = Deployment::new();
    let mut args = deployment.args("estimate");
    args.push("--dry-run".to_string());
    let cmd = solar_model().args(&args).ok();
    assert!(cmd.is_ok(), "dry run failed: {}", cmd.err().unwrap());
    let (stdout, _) = get_cmd_output(cmd);
    assert!(stdout.contains("3 image(s)"), "unexpected stdout: {stdout}");
    assert!(!Path::new(&deployment.path("static")).exists());
    assert!(!Path::new(&deployment.path("product")).exists());
}

#[test]
fn a_deployment_runs_end_to_end() {
    let deployment = Deployment::new();
    let cmd = solar_model().args(deployment.args("static-layers")).ok();
    assert!(cmd.is_ok(), "static-layers failed: {}", cmd.err().unwrap());
    assert!(Path::new(&deployment.path("static")).exists());

    let cmd = solar_model().args(deployment.args("estimate")).ok();
    assert!(cmd.is_ok(), "estimate failed: {}", cmd.err().unwrap());
    let (stdout, _) = get_cmd_output(cmd);
    assert!(stdout.contains("Process finished."));

    let product = DirStore::open_existing(deployment.path("product")).unwrap();
    let radiation = product.read_variable(VAR_GLOBAL_RADIATION).unwrap();
    assert_eq!(radiation.shape(), &[3, ROWS, COLS]);
    assert!(radiation.iter().all(|r| r.is_finite() && *r >= 0.0));
}

// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::path::{Path, PathBuf};

use approx::assert_relative_eq;
use tempfile::{tempdir, TempDir};

use super::*;
use crate::{
    constants::*,
    store::VariableStore,
    tests::{satellite_file_name, utc, write_batch, write_reference_store},
};

fn names(times: &[chrono::NaiveDateTime]) -> Vec<PathBuf> {
    times
        .iter()
        .map(|&t| PathBuf::from("data").join(satellite_file_name(t)))
        .collect()
}

#[test]
fn filter_keeps_recent_daylight_files() {
    let files = names(&[
        utc(2015, 1, 11, 15, 0, 0),
        utc(2015, 1, 12, 15, 0, 0),
        utc(2015, 2, 10, 8, 0, 0),
        utc(2015, 2, 10, 9, 0, 0),
        utc(2015, 2, 10, 23, 0, 0),
        utc(2015, 2, 11, 0, 0, 0),
    ]);
    let kept = filter_data(files.clone(), DEFAULT_UTC_OFFSET_HOURS).unwrap();
    // Too old; 05:00 local; kept; 06:00 local; 20:00 local; 21:00 local.
    assert_eq!(kept, vec![files[1].clone(), files[3].clone(), files[4].clone()]);

    // In UTC, midnight is dark too.
    let kept = filter_data(files.clone(), 0).unwrap();
    assert_eq!(kept, vec![files[1].clone(), files[2].clone(), files[3].clone()]);
}

#[test]
fn filter_handles_no_files() {
    assert!(filter_data(vec![], DEFAULT_UTC_OFFSET_HOURS)
        .unwrap()
        .is_empty());
}

#[test]
fn filter_rejects_unknown_names() {
    let result = filter_data(vec![PathBuf::from("data/image.nc")], 0);
    assert!(matches!(
        result,
        Err(JobError::Loader(LoaderError::BadFileName(_)))
    ));
}

/// A deployment with reference stores and a batch of images, one of them
/// taken at night.
struct Deployment {
    tmp: TempDir,
}

impl Deployment {
    fn new() -> Deployment {
        let tmp = tempdir().unwrap();
        let data = tmp.path().join("data");
        std::fs::create_dir(&data).unwrap();
        write_batch(
            &data,
            &[
                utc(2015, 1, 6, 4, 0, 0),
                utc(2015, 1, 6, 12, 0, 0),
                utc(2015, 1, 6, 14, 0, 0),
                utc(2015, 1, 6, 16, 0, 0),
                utc(2015, 1, 6, 18, 0, 0),
            ],
            5,
            6,
        );
        write_reference_store(&tmp.path().join("dem"), false);
        write_reference_store(&tmp.path().join("linke"), true);
        Deployment { tmp }
    }

    fn path(&self) -> &Path {
        self.tmp.path()
    }

    fn job(&self, tag: &str, hardware: ModelDevice) -> JobDescription {
        JobDescription {
            data: format!("{}/goes13.*.BAND_01.nc", self.path().join("data").display()),
            static_file: self.path().join("static"),
            temporal_cache: self.path().join(format!("{tag}_temporal_cache")),
            product: self.path().join(format!("{tag}_product")),
            tile: None,
            hardware,
            elevation: self.path().join("dem"),
            turbidity: self.path().join("linke"),
            params: HeliosatParams::default(),
            turbidity_year: 2014,
            utc_offset_hours: DEFAULT_UTC_OFFSET_HOURS,
            filter: true,
        }
    }
}

#[test]
fn a_job_estimates_every_daylight_image() {
    let deployment = Deployment::new();
    let job = deployment.job("cpu", ModelDevice::Cpu);
    assert_eq!(job.files().unwrap().len(), 4);

    let estimated = job.run().unwrap();
    assert_eq!(estimated, 4);
    assert!(job.static_file.exists());

    let product = DirStore::open_existing(&job.product).unwrap();
    let radiation = product.read_variable(VAR_GLOBAL_RADIATION).unwrap();
    assert_eq!(radiation.shape(), &[4, 5, 6]);
    assert!(radiation.iter().all(|&r| r.is_finite() && r >= 0.0));
    let cache = DirStore::open_existing(&job.temporal_cache).unwrap();
    assert_eq!(cache.variable_names().unwrap().len(), TEMPORAL_CACHE_VARS.len());
}

#[test]
fn jobs_on_either_device_agree() {
    let deployment = Deployment::new();
    let cpu = deployment.job("cpu", ModelDevice::Cpu);
    cpu.run().unwrap();
    // The second job reuses the static layers.
    let gpu = deployment.job("gpu", ModelDevice::Gpu);
    gpu.run().unwrap();

    let cpu = DirStore::open_existing(&cpu.product).unwrap();
    let gpu = DirStore::open_existing(&gpu.product).unwrap();
    for name in [VAR_CLOUD_INDEX, VAR_GLOBAL_RADIATION] {
        assert_relative_eq!(
            cpu.read_variable(name).unwrap(),
            gpu.read_variable(name).unwrap(),
            max_relative = 1e-5
        );
    }
}

#[test]
fn each_batch_replaces_the_previous_one() {
    let deployment = Deployment::new();
    let job = deployment.job("cpu", ModelDevice::Cpu);
    assert_eq!(job.run().unwrap(), 4);

    // One more daylight image makes the next batch longer.
    write_batch(
        &deployment.path().join("data"),
        &[utc(2015, 1, 6, 20, 0, 0)],
        5,
        6,
    );
    assert_eq!(job.run().unwrap(), 5);

    let product = DirStore::open_existing(&job.product).unwrap();
    for name in [VAR_CLOUD_INDEX, VAR_GLOBAL_RADIATION] {
        assert_eq!(product.read_variable(name).unwrap().shape(), &[5, 5, 6]);
    }
    let cache = DirStore::open_existing(&job.temporal_cache).unwrap();
    for name in TEMPORAL_CACHE_VARS {
        assert_eq!(cache.read_variable(name).unwrap().shape(), &[5, 5, 6]);
    }
}

#[test]
fn a_tiled_job_only_covers_the_tile() {
    let deployment = Deployment::new();
    let mut job = deployment.job("tile", ModelDevice::Cpu);
    job.tile = Some(Tile::new(1..3, 2..5));
    job.run().unwrap();

    let product = DirStore::open_existing(&job.product).unwrap();
    assert_eq!(
        product.read_variable(VAR_CLOUD_INDEX).unwrap().shape(),
        &[4, 2, 3]
    );
    // The static layers are always persisted in full.
    let static_layers = DirStore::open_existing(&job.static_file).unwrap();
    assert_eq!(static_layers.read_variable(VAR_DEM).unwrap().shape(), &[5, 6]);
}

#[test]
fn static_layers_are_built_ahead_of_jobs() {
    let deployment = Deployment::new();
    let job = deployment.job("cpu", ModelDevice::Cpu);
    job.build_static_layers().unwrap();
    let linke = DirStore::open_existing(&job.static_file)
        .unwrap()
        .read_variable(VAR_LINKE)
        .unwrap();
    assert_eq!(linke.shape(), &[12, 5, 6]);

    // Once built, the references aren't needed any more.
    std::fs::remove_dir_all(deployment.path().join("dem")).unwrap();
    job.build_static_layers().unwrap();
    assert_eq!(job.run().unwrap(), 4);
}

#[test]
fn a_job_without_data_fails() {
    let deployment = Deployment::new();
    let mut job = deployment.job("cpu", ModelDevice::Cpu);
    job.data = format!("{}/goes15.*.nc", deployment.path().join("data").display());
    assert!(matches!(job.run(), Err(JobError::NoData(_))));
}

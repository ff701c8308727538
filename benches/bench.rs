// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::path::{Path, PathBuf};

use chrono::{Datelike, NaiveDate, Timelike};
use criterion::*;
use ndarray::prelude::*;
use tempfile::TempDir;
use vec1::Vec1;

use solar_radiation_model::{
    cache::LazyRasterCache,
    constants::*,
    gpu::HostDevice,
    loader::TemporalLoader,
    model::{ComputeStrategy, CpuStrategy, GpuStrategy, HeliosatParams},
    static_layers::{ElevationProvider, ProviderError, StaticLayerBuilder, TurbidityProvider},
    store::{DirStore, VariableStore},
};

const ROWS: usize = 64;
const COLS: usize = 96;
const TIMESTEPS: usize = 8;

struct FlatElevation;

impl ElevationProvider for FlatElevation {
    fn elevation(
        &self,
        lat: ArrayView2<f32>,
        _lon: ArrayView2<f32>,
    ) -> Result<Array2<f32>, ProviderError> {
        Ok(lat.mapv(|_| 400.0))
    }
}

struct MonthlyTurbidity;

impl TurbidityProvider for MonthlyTurbidity {
    type Dataset = f32;

    fn turbidity(&self, date: NaiveDate, compressed: bool) -> Result<f32, ProviderError> {
        let linke = 2.5 + 0.1 * date.month() as f32;
        Ok(if compressed {
            linke * LINKE_COMPRESSION_FACTOR
        } else {
            linke
        })
    }

    fn transform(
        &self,
        dataset: &f32,
        lat: ArrayView2<f32>,
        _lon: ArrayView2<f32>,
    ) -> Result<Array2<f32>, ProviderError> {
        Ok(lat.mapv(|_| *dataset))
    }
}

fn write_image(dir: &Path, hour: u32) -> PathBuf {
    let time = NaiveDate::from_ymd_opt(2015, 1, 6)
        .and_then(|d| d.and_hms_opt(hour, 0, 0))
        .unwrap();
    let path = dir.join(format!(
        "goes13.{}.{:03}.{:02}0000.BAND_01.nc",
        time.year(),
        time.ordinal(),
        time.hour()
    ));
    let (mut store, _) = DirStore::open(&path).unwrap();
    let dims = [DIM_TIME, DIM_Y, DIM_X];
    let lat = Array3::from_shape_fn((1, ROWS, COLS), |(_, r, _)| -30.0 - 0.05 * r as f32);
    let lon = Array3::from_shape_fn((1, ROWS, COLS), |(_, _, c)| -65.0 + 0.05 * c as f32);
    let counts = Array3::from_shape_fn((1, ROWS, COLS), |(_, r, c)| {
        3000.0 + 10.0 * ((r * 7 + c * 3 + hour as usize) % 50) as f32
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

fn batch() -> (TempDir, TemporalLoader) {
    let tmp = tempfile::tempdir().unwrap();
    let files = (0..TIMESTEPS as u32)
        .map(|i| write_image(tmp.path(), 11 + i))
        .collect::<Vec<_>>();
    let builder = StaticLayerBuilder::new(tmp.path().join("static"), FlatElevation, MonthlyTurbidity);
    let loader =
        TemporalLoader::open(Vec1::try_from_vec(files).unwrap(), None, true, &builder).unwrap();
    (tmp, loader)
}

fn run(strategy: &dyn ComputeStrategy, tmp: &Path, loader: &mut TemporalLoader, i: usize) {
    let open = |name: String| {
        let (store, _) = DirStore::open(tmp.join(name)).unwrap();
        LazyRasterCache::new(Box::new(store))
    };
    let mut cache = open(format!("cache_{i}"));
    let mut output = open(format!("product_{i}"));
    strategy.advance_temporal_cache(loader, &mut cache).unwrap();
    strategy
        .estimate_global_radiation(loader, &mut cache, &mut output)
        .unwrap();
}

fn strategies(c: &mut Criterion) {
    let (tmp, mut loader) = batch();
    // Materialize the inputs outside of the timings.
    loader.calibrated_data().unwrap();
    let cpu = CpuStrategy::new(HeliosatParams::default());
    let gpu = GpuStrategy::new(HostDevice::new(), HeliosatParams::default());

    let mut i = 0;
    let mut group = c.benchmark_group("batch");
    group.sample_size(10);
    group.bench_function("cpu strategy", |b| {
        b.iter(|| {
            i += 1;
            run(&cpu, tmp.path(), &mut loader, i)
        })
    });
    group.bench_function("emulated gpu strategy", |b| {
        b.iter(|| {
            i += 1;
            run(&gpu, tmp.path(), &mut loader, i)
        })
    });
    group.finish();
}

criterion_group!(benches, strategies);
criterion_main!(benches);

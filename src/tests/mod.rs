// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Helpful functions for tests: synthetic satellite files and providers that
//! count how often they're used.

use std::{
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

use chrono::{Datelike, NaiveDate, NaiveDateTime, Timelike};
use ndarray::prelude::*;

use crate::{
    constants::*,
    static_layers::{ElevationProvider, ProviderError, TurbidityProvider},
    store::{DirStore, VariableStore},
};

/// GOES-like calibration constants.
pub(crate) const COUNTS_SHIFT: f32 = 32.0;
pub(crate) const SPACE_MEASUREMENT: f32 = 29.0;
pub(crate) const PRELAUNCH: f32 = 0.6118;
pub(crate) const POSTLAUNCH: f32 = 1.1;

pub(crate) fn utc(year: i32, month: u32, day: u32, h: u32, m: u32, s: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(year, month, day)
        .unwrap()
        .and_hms_opt(h, m, s)
        .unwrap()
}

/// The name a satellite file acquired at `time` would have.
pub(crate) fn satellite_file_name(time: NaiveDateTime) -> String {
    format!(
        "goes13.{}.{:03}.{:02}{:02}{:02}.BAND_01.nc",
        time.year(),
        time.ordinal(),
        time.hour(),
        time.minute(),
        time.second()
    )
}

/// A grid over northern Argentina, 0.1 degrees apart.
pub(crate) fn grid(rows: usize, cols: usize) -> (Array2<f32>, Array2<f32>) {
    let lat = Array2::from_shape_fn((rows, cols), |(r, _)| -31.0 - 0.1 * r as f32);
    let lon = Array2::from_shape_fn((rows, cols), |(_, c)| -64.0 + 0.1 * c as f32);
    (lat, lon)
}

/// Invert the calibration, so that tests can specify radiances.
pub(crate) fn counts_for_radiance(radiance: f32) -> f32 {
    (radiance / (PRELAUNCH * POSTLAUNCH) + SPACE_MEASUREMENT) * COUNTS_SHIFT
}

/// Write a single-timestep satellite store into `dir`, with the radiance of
/// each cell given by `radiance(row, col)`.
pub(crate) fn write_satellite_file(
    dir: &Path,
    time: NaiveDateTime,
    rows: usize,
    cols: usize,
    radiance: impl Fn(usize, usize) -> f32,
) -> PathBuf {
    let path = dir.join(satellite_file_name(time));
    let (mut store, is_new) = DirStore::open(&path).unwrap();
    assert!(is_new);

    let (lat, lon) = grid(rows, cols);
    let dims = [DIM_TIME, DIM_Y, DIM_X];
    store
        .write(VAR_LAT, &dims, lat.insert_axis(Axis(0)).into_dyn().view())
        .unwrap();
    store
        .write(VAR_LON, &dims, lon.insert_axis(Axis(0)).into_dyn().view())
        .unwrap();
    let data = Array3::from_shape_fn((1, rows, cols), |(_, r, c)| {
        counts_for_radiance(radiance(r, c))
    });
    store.write(VAR_DATA, &dims, data.into_dyn().view()).unwrap();
    for (name, value) in [
        (VAR_COUNTS_SHIFT, COUNTS_SHIFT),
        (VAR_SPACE_MEASUREMENT, SPACE_MEASUREMENT),
        (VAR_PRELAUNCH, PRELAUNCH),
        (VAR_POSTLAUNCH, POSTLAUNCH),
    ] {
        store
            .write(name, &[], arr0(value).into_dyn().view())
            .unwrap();
    }
    store.sync().unwrap();
    path
}

/// Write one satellite file per time, with a radiance that changes with
/// position and time.
pub(crate) fn write_batch(
    dir: &Path,
    times: &[NaiveDateTime],
    rows: usize,
    cols: usize,
) -> Vec<PathBuf> {
    times
        .iter()
        .enumerate()
        .map(|(i, &time)| {
            write_satellite_file(dir, time, rows, cols, |r, c| {
                // Some cells get a bright cloud in some images.
                let cloud = if (r + c + i) % 3 == 0 { 120.0 } else { 0.0 };
                40.0 + 2.0 * r as f32 + 1.5 * c as f32 + 5.0 * i as f32 + cloud
            })
        })
        .collect()
}

#[derive(Debug, Default, Clone)]
pub(crate) struct CountingElevation {
    pub(crate) calls: Arc<AtomicUsize>,
}

impl ElevationProvider for CountingElevation {
    fn elevation(
        &self,
        lat: ArrayView2<f32>,
        lon: ArrayView2<f32>,
    ) -> Result<Array2<f32>, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(ndarray::Zip::from(&lat).and(&lon).map_collect(|&la, &lo| {
            500.0 + 10.0 * (la + 31.0).abs() + 5.0 * (lo + 64.0).abs()
        }))
    }
}

/// Returns compressed turbidity that grows with the month; decompressed, it
/// lies in (0, 1].
#[derive(Debug, Default, Clone)]
pub(crate) struct CountingTurbidity {
    pub(crate) calls: Arc<AtomicUsize>,
    pub(crate) fail: bool,
}

impl TurbidityProvider for CountingTurbidity {
    type Dataset = f32;

    fn turbidity(&self, date: NaiveDate, compressed: bool) -> Result<f32, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(ProviderError::Unavailable("the turbidity server is down".into()));
        }
        let value = 7.0 + date.month() as f32;
        Ok(if compressed {
            value
        } else {
            value / LINKE_COMPRESSION_FACTOR
        })
    }

    fn transform(
        &self,
        dataset: &f32,
        lat: ArrayView2<f32>,
        _lon: ArrayView2<f32>,
    ) -> Result<Array2<f32>, ProviderError> {
        Ok(lat.mapv(|la| dataset + 0.1 * (la + 31.0).abs()))
    }
}

/// Write a global reference store with regular 1-degree axes, holding either
/// a DEM or a (compressed) Linke climatology.
pub(crate) fn write_reference_store(path: &Path, with_linke: bool) {
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
        let linke = Array3::from_shape_fn((12, 5, 4), |(m, r, c)| (40 + m + r * 4 + c) as f32);
        store
            .write(VAR_LINKE, &[DIM_MONTHS, "lat", "lon"], linke.into_dyn().view())
            .unwrap();
    } else {
        let dem = Array2::from_shape_fn((5, 4), |(r, c)| (100 * r + c) as f32);
        store
            .write(VAR_DEM, &["lat", "lon"], dem.into_dyn().view())
            .unwrap();
    }
    store.sync().unwrap();
}

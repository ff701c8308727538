// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Access to everything one batch of satellite images needs: the per-timestep
//! measurements (lazily, through a [`LazyRasterCache`]), the static layers of
//! the deployment and the calibration context of the instrument.


use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use lazy_static::lazy_static;
use log::debug;
use ndarray::prelude::*;
use regex::Regex;
use thiserror::Error;
use vec1::Vec1;

use crate::{
    cache::{CacheError, LazyRasterCache},
    constants::*,
    static_layers::{ElevationProvider, StaticLayerBuilder, StaticLayerError, TurbidityProvider},
    store::{DirStore, StoreError, Tile, VariableStore},
};

lazy_static! {
    /// `<satellite>.<YYYY>.<DDD>.<HHMMSS>.<band>...`, e.g.
    /// `goes13.2015.006.143018.BAND_01.nc`.
    static ref SATELLITE_FILE_NAME: Regex =
        Regex::new(r"^(?P<sat>[^.]+)\.(?P<year>\d{4})\.(?P<doy>\d{3})\.(?P<hms>\d{6})\.(?P<band>[^.]+)")
            .expect("the satellite file name pattern is valid");
}

/// Get the UTC acquisition time encoded in the name of a satellite file.
pub fn timestamp_from_path<P: AsRef<Path>>(path: P) -> Result<NaiveDateTime, LoaderError> {
    let path = path.as_ref();
    let bad = || LoaderError::BadFileName(path.to_path_buf());
    let name = path.file_name().and_then(|n| n.to_str()).ok_or_else(bad)?;
    let caps = SATELLITE_FILE_NAME.captures(name).ok_or_else(bad)?;

    let year: i32 = caps["year"].parse().map_err(|_| bad())?;
    let doy: u32 = caps["doy"].parse().map_err(|_| bad())?;
    let date = NaiveDate::from_yo_opt(year, doy).ok_or_else(bad)?;
    let time = NaiveTime::parse_from_str(&caps["hms"], "%H%M%S").map_err(|_| bad())?;
    Ok(date.and_time(time))
}

/// The coefficients converting raw counts into calibrated measurements. These
/// don't change for the lifetime of a loader.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Calibration {
    pub counts_shift: f32,
    pub space_measurement: f32,
    pub prelaunch: f32,
    pub postlaunch: f32,
}

impl Calibration {
    /// Convert raw counts into calibrated radiance.
    pub fn apply(&self, counts: f32) -> f32 {
        // Dropping the post-launch factor makes the estimates' RMSE grow to
        // about 15%; it is not optional.
        (counts / self.counts_shift - self.space_measurement) * self.postlaunch * self.prelaunch
    }
}

/// The data of one batch: a time series of per-timestep files over a tile of
/// the working grid.
pub struct TemporalLoader {
    files: Vec1<PathBuf>,
    timestamps: Vec1<NaiveDateTime>,
    tile: Option<Tile>,

    /// Per-timestep variables, aggregated along `time` and tailored to the
    /// tile.
    cache: LazyRasterCache,

    /// The deployment's static layers, tailored to the same tile.
    static_store: DirStore,
    lat: Option<Arc<Array2<f32>>>,
    lon: Option<Arc<Array2<f32>>>,
    dem: Option<Arc<Array2<f32>>>,
    linke: Option<Arc<Array3<f32>>>,

    calibration: Option<Calibration>,
    calibrated_data: Option<Arc<Array3<f32>>>,
}

impl TemporalLoader {
    /// Open the batch `files` against already-built static layers. The files
    /// are sorted by acquisition time.
    pub fn new(
        files: Vec1<PathBuf>,
        tile: Option<&Tile>,
        read_only: bool,
        static_store: DirStore,
    ) -> Result<TemporalLoader, LoaderError> {
        let mut files = files
            .into_iter()
            .map(|f| timestamp_from_path(&f).map(|t| (t, f)))
            .collect::<Result<Vec<_>, _>>()?;
        files.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));
        let (timestamps, files): (Vec<_>, Vec<_>) = files.into_iter().unzip();
        let timestamps = Vec1::try_from_vec(timestamps).map_err(|_| LoaderError::NoFiles)?;
        let files = Vec1::try_from_vec(files).map_err(|_| LoaderError::NoFiles)?;

        let store = DirStore::aggregate(files.as_slice(), read_only)?;
        let store = match tile {
            Some(tile) => store.tailor(tile, read_only)?,
            None => store,
        };
        let static_window = static_store.window().cloned();
        if static_window.as_ref() != tile {
            return Err(LoaderError::TileMismatch {
                data: tile.map(|t| t.to_string()),
                static_layers: static_window.map(|t| t.to_string()),
            });
        }
        debug!(
            "Loader over {} file(s) from {} to {}",
            files.len(),
            timestamps.first(),
            timestamps.last()
        );

        Ok(TemporalLoader {
            files,
            timestamps,
            tile: tile.cloned(),
            cache: LazyRasterCache::new(Box::new(store)),
            static_store,
            lat: None,
            lon: None,
            dem: None,
            linke: None,
            calibration: None,
            calibrated_data: None,
        })
    }

    /// Open the batch `files`, building the static layers from them first if
    /// this is the first execution of the deployment.
    pub fn open<E, T>(
        files: Vec1<PathBuf>,
        tile: Option<&Tile>,
        read_only: bool,
        static_layers: &StaticLayerBuilder<E, T>,
    ) -> Result<TemporalLoader, LoaderError>
    where
        E: ElevationProvider,
        T: TurbidityProvider,
    {
        let static_store = static_layers.build(files.as_slice(), tile)?;
        TemporalLoader::new(files, tile, read_only, static_store)
    }

    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    /// The acquisition times of the batch, one per file, ascending.
    pub fn timestamps(&self) -> &[NaiveDateTime] {
        &self.timestamps
    }

    pub fn tile(&self) -> Option<&Tile> {
        self.tile.as_ref()
    }

    /// Get a per-timestep variable.
    pub fn get(&mut self, name: &str) -> Result<Arc<ArrayD<f32>>, LoaderError> {
        Ok(self.cache.get(name)?)
    }

    /// Latitudes of the tile \[degrees\].
    pub fn lat(&mut self) -> Result<Arc<Array2<f32>>, LoaderError> {
        let store = &self.static_store;
        cached(&mut self.lat, || static_layer(store, VAR_LAT))
    }

    /// Longitudes of the tile \[degrees\].
    pub fn lon(&mut self) -> Result<Arc<Array2<f32>>, LoaderError> {
        let store = &self.static_store;
        cached(&mut self.lon, || static_layer(store, VAR_LON))
    }

    /// Terrain elevation \[metres\].
    pub fn dem(&mut self) -> Result<Arc<Array2<f32>>, LoaderError> {
        let store = &self.static_store;
        cached(&mut self.dem, || static_layer(store, VAR_DEM))
    }

    /// The monthly Linke turbidity `[month, y, x]`, already decompressed.
    pub fn linke(&mut self) -> Result<Arc<Array3<f32>>, LoaderError> {
        let store = &self.static_store;
        cached(&mut self.linke, || static_layer(store, VAR_LINKE))
    }

    fn scalar(&mut self, name: &str) -> Result<f32, LoaderError> {
        let data = self.cache.get(name)?;
        // Calibration constants are per-file scalars; the first file's are used
        // for the whole batch.
        data.iter()
            .next()
            .copied()
            .ok_or_else(|| LoaderError::UnexpectedShape {
                name: name.to_string(),
                shape: data.shape().to_vec(),
            })
    }

    pub fn calibration(&mut self) -> Result<Calibration, LoaderError> {
        if let Some(c) = self.calibration {
            return Ok(c);
        }
        let c = Calibration {
            counts_shift: self.scalar(VAR_COUNTS_SHIFT)?,
            space_measurement: self.scalar(VAR_SPACE_MEASUREMENT)?,
            prelaunch: self.scalar(VAR_PRELAUNCH)?,
            postlaunch: self.scalar(VAR_POSTLAUNCH)?,
        };
        debug!("Calibration: {c:?}");
        self.calibration = Some(c);
        Ok(c)
    }

    /// The measurements of the batch `[time, y, x]` converted from raw counts
    /// with [`Calibration::apply`]. Computed once.
    pub fn calibrated_data(&mut self) -> Result<Arc<Array3<f32>>, LoaderError> {
        if let Some(data) = &self.calibrated_data {
            return Ok(Arc::clone(data));
        }

        let calibration = self.calibration()?;
        let raw = self.cache.get(VAR_DATA)?;
        let counts = raw.view().into_dimensionality::<Ix3>().map_err(|_| {
            LoaderError::UnexpectedShape {
                name: VAR_DATA.to_string(),
                shape: raw.shape().to_vec(),
            }
        })?;
        let data = Arc::new(counts.mapv(|c| calibration.apply(c)));
        self.calibrated_data = Some(Arc::clone(&data));
        Ok(data)
    }

    /// Release everything this loader holds.
    pub fn dump(&mut self) -> Result<(), LoaderError> {
        self.lat = None;
        self.lon = None;
        self.dem = None;
        self.linke = None;
        self.calibrated_data = None;
        self.static_store.close()?;
        self.cache.dump()?;
        Ok(())
    }
}

fn cached<A>(
    slot: &mut Option<Arc<A>>,
    load: impl FnOnce() -> Result<A, LoaderError>,
) -> Result<Arc<A>, LoaderError> {
    if let Some(value) = slot {
        return Ok(Arc::clone(value));
    }
    let value = Arc::new(load()?);
    *slot = Some(Arc::clone(&value));
    Ok(value)
}

fn static_layer<D: Dimension>(
    store: &DirStore,
    name: &str,
) -> Result<Array<f32, D>, LoaderError> {
    let data = store.read_variable(name)?;
    let shape = data.shape().to_vec();
    data.into_dimensionality::<D>()
        .map_err(|_| LoaderError::UnexpectedShape {
            name: name.to_string(),
            shape,
        })
}

#[derive(Error, Debug)]
pub enum LoaderError {
    #[error("No data files were given")]
    NoFiles,

    #[error("'{}' isn't named like a satellite image (<sat>.<YYYY>.<DDD>.<HHMMSS>.<band>)", .0.display())]
    BadFileName(PathBuf),

    #[error("'{name}' has an unexpected shape {shape:?}")]
    UnexpectedShape { name: String, shape: Vec<usize> },

    #[error("The data is tiled as {data:?}, but the static layers as {static_layers:?}")]
    TileMismatch {
        data: Option<String>,
        static_layers: Option<String>,
    },

    #[error(transparent)]
    StaticLayers(#[from] StaticLayerError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

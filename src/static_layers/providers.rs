// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Providers backed by global reference rasters on a regular lat/lon grid.
//!
//! A reference store holds 1-D `lat` and `lon` axes (dimensions `lat` and
//! `lon`, evenly spaced) and either `dem[lat, lon]` or
//! `linke[months, lat, lon]`. Linke values are kept compressed, as
//! distributed. Resampling onto the working grid is nearest neighbour with
//! edge clamping.

use std::path::{Path, PathBuf};

use chrono::{Datelike, NaiveDate};
use log::debug;
use ndarray::prelude::*;

use super::{ElevationProvider, ProviderError, TurbidityProvider};
use crate::{
    constants::{LINKE_COMPRESSION_FACTOR, VAR_DEM, VAR_LAT, VAR_LINKE, VAR_LON},
    store::{DirStore, VariableStore},
};

/// A regular axis: `start + i * step` for `i` in `0..len`.
#[derive(Debug, Clone, Copy, PartialEq)]
struct RegularAxis {
    start: f64,
    step: f64,
    len: usize,
}

impl RegularAxis {
    fn from_values(name: &str, values: ArrayView1<f32>) -> Result<RegularAxis, ProviderError> {
        let len = values.len();
        match len {
            0 => Err(ProviderError::BadGrid(format!("the '{name}' axis is empty"))),
            1 => Ok(RegularAxis {
                start: f64::from(values[0]),
                step: 1.0,
                len,
            }),
            _ => {
                let start = f64::from(values[0]);
                let step = (f64::from(values[len - 1]) - start) / (len - 1) as f64;
                if step == 0.0 || !step.is_finite() {
                    return Err(ProviderError::BadGrid(format!(
                        "the '{name}' axis isn't strictly monotonic"
                    )));
                }
                Ok(RegularAxis { start, step, len })
            }
        }
    }

    /// The index of the axis point nearest to `value`, clamped to the axis.
    fn nearest(&self, value: f32) -> usize {
        let i = ((f64::from(value) - self.start) / self.step).round();
        if i.is_nan() || i <= 0.0 {
            0
        } else {
            (i as usize).min(self.len - 1)
        }
    }
}

#[derive(Debug, Clone)]
struct ReferenceGrid {
    lat: RegularAxis,
    lon: RegularAxis,
}

impl ReferenceGrid {
    fn read(store: &DirStore) -> Result<ReferenceGrid, ProviderError> {
        let axis = |name: &str| -> Result<RegularAxis, ProviderError> {
            let values = store.read_variable(name)?;
            let values = values
                .into_dimensionality::<Ix1>()
                .map_err(|_| ProviderError::BadGrid(format!("'{name}' isn't a 1-D axis")))?;
            RegularAxis::from_values(name, values.view())
        };
        Ok(ReferenceGrid {
            lat: axis(VAR_LAT)?,
            lon: axis(VAR_LON)?,
        })
    }

    /// Sample `values` (indexed `[lat, lon]`) at every working grid point.
    fn resample(
        &self,
        values: ArrayView2<f32>,
        lat: ArrayView2<f32>,
        lon: ArrayView2<f32>,
    ) -> Result<Array2<f32>, ProviderError> {
        if lat.dim() != lon.dim() {
            return Err(ProviderError::BadGrid(format!(
                "latitudes are {:?} but longitudes are {:?}",
                lat.dim(),
                lon.dim()
            )));
        }
        let mut out = Array2::zeros(lat.dim());
        ndarray::Zip::from(&mut out)
            .and(&lat)
            .and(&lon)
            .for_each(|o, &la, &lo| {
                *o = values[(self.lat.nearest(la), self.lon.nearest(lo))];
            });
        Ok(out)
    }
}

fn read_2d_layer(
    store: &DirStore,
    name: &str,
    grid: &ReferenceGrid,
) -> Result<Array2<f32>, ProviderError> {
    let data = store
        .read_variable(name)?
        .into_dimensionality::<Ix2>()
        .map_err(|_| ProviderError::BadGrid(format!("'{name}' isn't a 2-D layer")))?;
    if data.dim() != (grid.lat.len, grid.lon.len) {
        return Err(ProviderError::BadGrid(format!(
            "'{name}' is {:?}, but the axes are ({}, {})",
            data.dim(),
            grid.lat.len,
            grid.lon.len
        )));
    }
    Ok(data)
}

/// Elevation from a global DEM store.
#[derive(Debug)]
pub struct GriddedElevation {
    path: PathBuf,
    grid: ReferenceGrid,
    dem: Array2<f32>,
}

impl GriddedElevation {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<GriddedElevation, ProviderError> {
        let path = path.as_ref().to_path_buf();
        let store = DirStore::open_existing(&path)?;
        let grid = ReferenceGrid::read(&store)?;
        let dem = read_2d_layer(&store, VAR_DEM, &grid)?;
        debug!(
            "Read a {}x{} DEM from '{}'",
            grid.lat.len,
            grid.lon.len,
            path.display()
        );
        Ok(GriddedElevation { path, grid, dem })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ElevationProvider for GriddedElevation {
    fn elevation(
        &self,
        lat: ArrayView2<f32>,
        lon: ArrayView2<f32>,
    ) -> Result<Array2<f32>, ProviderError> {
        self.grid.resample(self.dem.view(), lat, lon)
    }
}

/// One month of Linke turbidity on the reference grid.
#[derive(Debug, Clone)]
pub struct TurbidityDataset {
    pub month: u32,
    pub compressed: bool,
    pub values: Array2<f32>,
}

/// Monthly Linke turbidity climatology from a global store.
#[derive(Debug)]
pub struct GriddedTurbidity {
    path: PathBuf,
    grid: ReferenceGrid,
    /// `[month, lat, lon]`, compressed.
    linke: Array3<f32>,
}

impl GriddedTurbidity {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<GriddedTurbidity, ProviderError> {
        let path = path.as_ref().to_path_buf();
        let store = DirStore::open_existing(&path)?;
        let grid = ReferenceGrid::read(&store)?;
        let linke = store
            .read_variable(VAR_LINKE)?
            .into_dimensionality::<Ix3>()
            .map_err(|_| ProviderError::BadGrid(format!("'{VAR_LINKE}' isn't 3-D")))?;
        if linke.dim() != (12, grid.lat.len, grid.lon.len) {
            return Err(ProviderError::BadGrid(format!(
                "'{VAR_LINKE}' is {:?}, expected 12 months of ({}, {})",
                linke.dim(),
                grid.lat.len,
                grid.lon.len
            )));
        }
        debug!("Read the Linke climatology from '{}'", path.display());
        Ok(GriddedTurbidity { path, grid, linke })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TurbidityProvider for GriddedTurbidity {
    type Dataset = TurbidityDataset;

    fn turbidity(
        &self,
        date: NaiveDate,
        compressed: bool,
    ) -> Result<TurbidityDataset, ProviderError> {
        let month = date.month0();
        let values = self.linke.index_axis(Axis(0), month as usize);
        let values = if compressed {
            values.to_owned()
        } else {
            values.mapv(|v| v / LINKE_COMPRESSION_FACTOR)
        };
        Ok(TurbidityDataset {
            month,
            compressed,
            values,
        })
    }

    fn transform(
        &self,
        dataset: &TurbidityDataset,
        lat: ArrayView2<f32>,
        lon: ArrayView2<f32>,
    ) -> Result<Array2<f32>, ProviderError> {
        self.grid.resample(dataset.values.view(), lat, lon)
    }
}

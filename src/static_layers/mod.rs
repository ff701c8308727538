// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The static layers of a deployment: the coordinate grids, the elevation
//! and the monthly Linke turbidity, projected onto the working grid.
//!
//! Projection is expensive and happens exactly once per deployment; every
//! later [`StaticLayerBuilder::build`] only reopens the persisted store and
//! narrows it to the requested tile.
//!
//! Two processes building the same static store concurrently may both decide
//! that it doesn't exist and both project it. The result is correct (the
//! last rename wins and both wrote identical layers) but wasteful. Build the
//! static store before starting workers (`solar-model static-layers`) to
//! avoid it; no locking is attempted here.

pub mod providers;

use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use log::{debug, info};
use ndarray::prelude::*;
use rayon::prelude::*;
use thiserror::Error;

use crate::{
    constants::*,
    store::{DirStore, StoreError, Tile, VariableStore},
};

/// Something that knows the terrain elevation at arbitrary coordinates.
pub trait ElevationProvider {
    /// Get the elevation \[metres\] at each point of the given latitude and
    /// longitude grids \[degrees\]. The result must have the same shape as the
    /// inputs.
    fn elevation(
        &self,
        lat: ArrayView2<f32>,
        lon: ArrayView2<f32>,
    ) -> Result<Array2<f32>, ProviderError>;
}

/// Something that provides Linke turbidity climatologies. Months are
/// projected in parallel, hence `Sync`.
pub trait TurbidityProvider: Sync {
    /// The provider's native representation of one turbidity map.
    type Dataset;

    /// Get the turbidity map for `date`. With `compressed`, values are
    /// scaled by [`LINKE_COMPRESSION_FACTOR`], as distributed.
    fn turbidity(&self, date: NaiveDate, compressed: bool) -> Result<Self::Dataset, ProviderError>;

    /// Resample a map onto the given latitude and longitude grids.
    fn transform(
        &self,
        dataset: &Self::Dataset,
        lat: ArrayView2<f32>,
        lon: ArrayView2<f32>,
    ) -> Result<Array2<f32>, ProviderError>;
}

/// Builds (once) and reopens the static layer store of a deployment.
pub struct StaticLayerBuilder<E, T> {
    path: PathBuf,
    elevation: E,
    turbidity: T,
    turbidity_year: i32,
}

impl<E: ElevationProvider, T: TurbidityProvider> StaticLayerBuilder<E, T> {
    pub fn new<P: AsRef<Path>>(path: P, elevation: E, turbidity: T) -> StaticLayerBuilder<E, T> {
        StaticLayerBuilder {
            path: path.as_ref().to_path_buf(),
            elevation,
            turbidity,
            turbidity_year: DEFAULT_TURBIDITY_YEAR,
        }
    }

    /// Use the mid-month dates of `year` for the turbidity projection.
    pub fn with_turbidity_year(mut self, year: i32) -> StaticLayerBuilder<E, T> {
        self.turbidity_year = year;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Get the static layers, projecting them from `reference_files` first if
    /// this deployment has no static store yet. The returned handle is
    /// read-only and narrowed to `tile`, if one is given.
    ///
    /// Either all of `lat`, `lon`, `dem` and `linke` are persisted, or (on
    /// error) none of them are.
    pub fn build<P: AsRef<Path>>(
        &self,
        reference_files: &[P],
        tile: Option<&Tile>,
    ) -> Result<DirStore, StaticLayerError> {
        let (mut store, is_new) = DirStore::open(&self.path)?;
        if is_new {
            info!("This is the first execution from the deployment... ");
            let reference = reference_files
                .first()
                .ok_or(StaticLayerError::NoReferenceFiles)?;
            let reference = DirStore::open_existing(reference)?;
            let lat = grid_from_reference(&reference, VAR_LAT)?;
            let lon = grid_from_reference(&reference, VAR_LON)?;
            if lat.dim() != lon.dim() {
                return Err(StaticLayerError::ShapeMismatch {
                    layer: VAR_LON,
                    expected: lat.shape().to_vec(),
                    got: lon.shape().to_vec(),
                });
            }
            store.write(VAR_LAT, &[DIM_Y, DIM_X], lat.view().into_dyn())?;
            store.write(VAR_LON, &[DIM_Y, DIM_X], lon.view().into_dyn())?;

            let dem = self.project_dem(lat.view(), lon.view())?;
            store.write(VAR_DEM, &[DIM_Y, DIM_X], dem.view().into_dyn())?;
            let linke = self.project_linke(lat.view(), lon.view())?;
            store.write(
                VAR_LINKE,
                &[DIM_MONTHS, DIM_Y, DIM_X],
                linke.view().into_dyn(),
            )?;

            // Nothing is on disk before this point.
            store.sync()?;
            info!("Static layers stored in '{}'", self.path.display());
        } else {
            debug!("Reusing the static layers in '{}'", self.path.display());
        }

        let store = match tile {
            Some(tile) => store.tailor(tile, true)?,
            None => store.into_read_only(),
        };
        Ok(store)
    }

    fn project_dem(
        &self,
        lat: ArrayView2<f32>,
        lon: ArrayView2<f32>,
    ) -> Result<Array2<f32>, StaticLayerError> {
        info!("Projecting DEM's map... ");
        let dem = self
            .elevation
            .elevation(lat, lon)
            .map_err(|source| StaticLayerError::Provider {
                layer: VAR_DEM,
                source,
            })?;
        if dem.dim() != lat.dim() {
            return Err(StaticLayerError::ShapeMismatch {
                layer: VAR_DEM,
                expected: lat.shape().to_vec(),
                got: dem.shape().to_vec(),
            });
        }
        Ok(dem)
    }

    fn project_linke(
        &self,
        lat: ArrayView2<f32>,
        lon: ArrayView2<f32>,
    ) -> Result<Array3<f32>, StaticLayerError> {
        info!("Projecting Linke's turbidity index... ");
        let dates = (1..=12)
            .map(|month| {
                NaiveDate::from_ymd_opt(self.turbidity_year, month, TURBIDITY_DAY_OF_MONTH)
                    .ok_or(StaticLayerError::InvalidYear(self.turbidity_year))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let provider = &self.turbidity;
        let linkes = dates
            .into_par_iter()
            .map(|date| {
                let raw = provider.turbidity(date, true)?;
                provider.transform(&raw, lat, lon)
            })
            .collect::<Result<Vec<_>, _>>()
            .map_err(|source| StaticLayerError::Provider {
                layer: VAR_LINKE,
                source,
            })?;

        if let Some(bad) = linkes.iter().find(|l| l.dim() != lat.dim()) {
            return Err(StaticLayerError::ShapeMismatch {
                layer: VAR_LINKE,
                expected: lat.shape().to_vec(),
                got: bad.shape().to_vec(),
            });
        }
        let views: Vec<_> = linkes.iter().map(|l| l.view()).collect();
        let linkes = ndarray::stack(Axis(0), &views)
            .map_err(|e| StaticLayerError::Stack(e.to_string()))?;

        // Uncompress the coefficients so they're stored as plain floats.
        Ok(linkes / LINKE_COMPRESSION_FACTOR)
    }
}

/// Read a coordinate grid from a reference store. Per-timestep files carry
/// their coordinates with a leading `time` dimension; the first timestep is
/// used.
fn grid_from_reference(
    reference: &DirStore,
    name: &'static str,
) -> Result<Array2<f32>, StaticLayerError> {
    let data = reference.read_variable(name)?;
    let data = match data.ndim() {
        2 => data,
        3 => data.index_axis_move(Axis(0), 0),
        _ => {
            return Err(StaticLayerError::ShapeMismatch {
                layer: name,
                expected: vec![0, 0],
                got: data.shape().to_vec(),
            })
        }
    };
    data.into_dimensionality::<Ix2>()
        .map_err(|e| StaticLayerError::Stack(e.to_string()))
}

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("The provider is unavailable: {0}")]
    Unavailable(String),

    #[error("The reference grid is unusable: {0}")]
    BadGrid(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Error, Debug)]
pub enum StaticLayerError {
    #[error("No reference files were supplied to project the static layers from")]
    NoReferenceFiles,

    #[error("Couldn't project '{layer}': {source}")]
    Provider {
        layer: &'static str,
        source: ProviderError,
    },

    #[error("'{layer}' has shape {got:?}, but the working grid is {expected:?}")]
    ShapeMismatch {
        layer: &'static str,
        expected: Vec<usize>,
        got: Vec<usize>,
    },

    #[error("{0} is not a usable turbidity year")]
    InvalidYear(i32),

    #[error("Couldn't assemble a static layer: {0}")]
    Stack(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

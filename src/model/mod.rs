// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Code to estimate surface irradiance from a batch of satellite images.
//!
//! A batch goes through two steps, in this order: advancing the temporal cache
//! (solar geometry, clear-sky irradiance, transmittances and albedos per
//! timestep), then estimating the cloud index and global radiation from the
//! calibrated measurements. A [`ComputeStrategy`] does both, on the CPU or on
//! a GPU; both produce the same numbers.

mod cpu;
mod error;
mod gpu;
pub mod physics;

pub use cpu::CpuStrategy;
pub use error::ModelError;
pub use gpu::GpuStrategy;

use std::sync::Arc;

use chrono::{Datelike, NaiveDateTime, Timelike};
use log::debug;
use ndarray::prelude::*;
use strum_macros::{Display, EnumIter, EnumString, IntoStaticStr};

use crate::{
    cache::{LazyRasterCache, ResultMemoizer},
    constants::*,
    loader::TemporalLoader,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumIter, EnumString, IntoStaticStr)]
pub enum ModelDevice {
    /// The model is evaluated with array arithmetic on the CPU.
    #[strum(serialize = "cpu")]
    Cpu,

    /// The model is evaluated by kernels dispatched to a GPU. Without the
    /// "cuda" feature, the GPU is emulated on the host.
    #[strum(serialize = "gpu")]
    Gpu,
}

impl ModelDevice {
    /// Get a formatted string with information on the device used for
    /// modelling.
    pub fn get_device_info(self) -> Result<String, ModelError> {
        match self {
            ModelDevice::Cpu => Ok(get_cpu_info()),

            #[cfg(feature = "cuda")]
            ModelDevice::Gpu => {
                use crate::gpu::Device;
                Ok(crate::gpu::CudaDevice::new()?.name())
            }

            #[cfg(not(feature = "cuda"))]
            ModelDevice::Gpu => {
                use crate::gpu::Device;
                Ok(format!("{} (emulated GPU)", crate::gpu::HostDevice::new().name()))
            }
        }
    }
}

/// Get a formatted string with information on the CPU.
pub(crate) fn get_cpu_info() -> String {
    #[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
    {
        // Non-exhaustive but perhaps most-interesting CPU features.
        let avx = std::arch::is_x86_feature_detected!("avx");
        let avx2 = std::arch::is_x86_feature_detected!("avx2");
        let avx512 = std::arch::is_x86_feature_detected!("avx512f");

        match (avx512, avx2, avx) {
            (true, _, _) => format!("{} CPU (AVX512 available)", std::env::consts::ARCH),
            (false, true, _) => format!("{} CPU (AVX2 available)", std::env::consts::ARCH),
            (false, false, true) => format!("{} CPU (AVX available)", std::env::consts::ARCH),
            (false, false, false) => format!("{} CPU (AVX unavailable!)", std::env::consts::ARCH),
        }
    }

    #[cfg(not(any(target_arch = "x86", target_arch = "x86_64")))]
    format!("{} CPU", std::env::consts::ARCH)
}

/// The constants of the model.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HeliosatParams {
    /// The sub-satellite longitude \[degrees\].
    pub sat_lon: f32,
    /// The mean exo-atmospheric irradiance in the satellite's band.
    pub i0met: f32,
    /// \[W/m^2\]
    pub solar_constant: f32,
    /// \[metres\]
    pub scale_height: f32,
}

impl Default for HeliosatParams {
    fn default() -> Self {
        HeliosatParams {
            sat_lon: DEFAULT_SAT_LON,
            i0met: DEFAULT_I0MET,
            solar_constant: SOLAR_CONSTANT,
            scale_height: RAYLEIGH_SCALE_HEIGHT,
        }
    }
}

/// The solar time of one timestep.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SolarTime {
    /// UTC \[hours\]
    pub decimal_hour: f32,
    /// 0-11, selecting the turbidity of the month.
    pub month: u32,
    /// The day angle \[radians\].
    pub gamma: f32,
}

impl SolarTime {
    pub fn from_timestamp(t: &NaiveDateTime) -> SolarTime {
        SolarTime {
            decimal_hour: t.hour() as f32 + t.minute() as f32 / 60.0 + t.second() as f32 / 3600.0,
            month: t.month0(),
            gamma: physics::day_angle(t.ordinal()),
        }
    }
}

/// The solar time of every timestep of a batch, each as a `[time, 1, 1]`
/// array.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchTimes {
    pub times: Vec<SolarTime>,
    pub decimal_hour: Array3<f32>,
    pub gamma: Array3<f32>,
}

/// Derives solar times, remembering every timestamp it has seen.
pub struct SolarClock {
    memo: ResultMemoizer<NaiveDateTime, SolarTime, fn(&NaiveDateTime) -> SolarTime>,
}

impl Default for SolarClock {
    fn default() -> Self {
        Self::new()
    }
}

impl SolarClock {
    pub fn new() -> SolarClock {
        SolarClock {
            memo: ResultMemoizer::new(SolarTime::from_timestamp as fn(&NaiveDateTime) -> SolarTime),
        }
    }

    pub fn batch(&self, timestamps: &[NaiveDateTime]) -> BatchTimes {
        let times: Vec<SolarTime> = timestamps.iter().map(|t| self.memo.call(*t)).collect();
        let column = |f: fn(&SolarTime) -> f32| {
            Array3::from_shape_fn((times.len(), 1, 1), |(i, _, _)| f(&times[i]))
        };
        BatchTimes {
            decimal_hour: column(|t| t.decimal_hour),
            gamma: column(|t| t.gamma),
            times,
        }
    }

    /// The number of distinct timestamps derived so far.
    pub fn len(&self) -> usize {
        self.memo.len()
    }

    pub fn is_empty(&self) -> bool {
        self.memo.is_empty()
    }
}

/// Something that evaluates the model over a batch.
pub trait ComputeStrategy {
    /// Compute every quantity of the temporal cache for the timesteps of
    /// `loader`, put them into `cache` as `[time, y, x]` rasters and sync it.
    fn advance_temporal_cache(
        &self,
        loader: &mut TemporalLoader,
        cache: &mut LazyRasterCache,
    ) -> Result<(), ModelError>;

    /// From the temporal cache and the calibrated measurements, compute the
    /// cloud index and the global radiation, put them into `output` and sync
    /// it. [`ComputeStrategy::advance_temporal_cache`] must have been run on
    /// `cache` first.
    fn estimate_global_radiation(
        &self,
        loader: &mut TemporalLoader,
        cache: &mut LazyRasterCache,
        output: &mut LazyRasterCache,
    ) -> Result<(), ModelError>;
}

/// Create a [`ComputeStrategy`] trait object for `device`. There is no
/// fallback: if the GPU can't be used, this is an error.
pub fn new_strategy(
    device: ModelDevice,
    params: HeliosatParams,
) -> Result<Box<dyn ComputeStrategy>, ModelError> {
    debug!("Using {device} strategy with {params:?}");
    match device {
        ModelDevice::Cpu => Ok(Box::new(CpuStrategy::new(params))),

        ModelDevice::Gpu => {
            cfg_if::cfg_if! {
                if #[cfg(feature = "cuda")] {
                    let gpu = crate::gpu::CudaDevice::new()?;
                } else {
                    let gpu = crate::gpu::HostDevice::new();
                }
            }
            Ok(Box::new(GpuStrategy::new(gpu, params)))
        }
    }
}

/// Everything the advance step reads.
pub(crate) struct AdvanceData {
    pub(crate) lat: Arc<Array2<f32>>,
    pub(crate) lon: Arc<Array2<f32>>,
    pub(crate) dem: Arc<Array2<f32>>,
    pub(crate) linke: Arc<Array3<f32>>,
    pub(crate) times: BatchTimes,
}

impl AdvanceData {
    pub(crate) fn read(
        loader: &mut TemporalLoader,
        clock: &SolarClock,
    ) -> Result<AdvanceData, ModelError> {
        let lat = loader.lat()?;
        let lon = loader.lon()?;
        let dem = loader.dem()?;
        let linke = loader.linke()?;
        for (name, shape) in [(VAR_LON, lon.shape()), (VAR_DEM, dem.shape())] {
            if shape != lat.shape() {
                return Err(ModelError::ShapeMismatch {
                    name: name.to_string(),
                    expected: lat.shape().to_vec(),
                    got: shape.to_vec(),
                });
            }
        }
        let (rows, cols) = lat.dim();
        if linke.dim() != (12, rows, cols) {
            return Err(ModelError::ShapeMismatch {
                name: VAR_LINKE.to_string(),
                expected: vec![12, rows, cols],
                got: linke.shape().to_vec(),
            });
        }

        Ok(AdvanceData {
            lat,
            lon,
            dem,
            linke,
            times: clock.batch(loader.timestamps()),
        })
    }

    /// `(time, y, x)`
    pub(crate) fn dim(&self) -> (usize, usize, usize) {
        let (rows, cols) = self.lat.dim();
        (self.times.times.len(), rows, cols)
    }
}

/// Put the temporal-cache quantities, ordered as [`TEMPORAL_CACHE_VARS`],
/// into `cache` and sync it.
pub(crate) fn store_temporal_cache(
    cache: &mut LazyRasterCache,
    quantities: Vec<Array3<f32>>,
) -> Result<(), ModelError> {
    for (name, data) in TEMPORAL_CACHE_VARS.iter().zip(quantities) {
        cache.insert(name, &[DIM_TIME, DIM_Y, DIM_X], data.into_dyn())?;
    }
    cache.sync()?;
    Ok(())
}

/// Everything the estimate step reads.
pub(crate) struct EstimateData {
    calibrated: Arc<Array3<f32>>,
    excentricity: Arc<ArrayD<f32>>,
    solar_elevation: Arc<ArrayD<f32>>,
    gc: Arc<ArrayD<f32>>,
    t_sat: Arc<ArrayD<f32>>,
    t_earth: Arc<ArrayD<f32>>,
    atmospheric_albedo: Arc<ArrayD<f32>>,
    cloud_albedo: Arc<ArrayD<f32>>,
}

impl EstimateData {
    pub(crate) fn read(
        loader: &mut TemporalLoader,
        cache: &mut LazyRasterCache,
    ) -> Result<EstimateData, ModelError> {
        Ok(EstimateData {
            calibrated: loader.calibrated_data()?,
            excentricity: cache.get(VAR_EXCENTRICITY)?,
            solar_elevation: cache.get(VAR_SOLAR_ELEVATION)?,
            gc: cache.get(VAR_GC)?,
            t_sat: cache.get(VAR_T_SAT)?,
            t_earth: cache.get(VAR_T_EARTH)?,
            atmospheric_albedo: cache.get(VAR_ATMOSPHERIC_ALBEDO)?,
            cloud_albedo: cache.get(VAR_CLOUD_ALBEDO)?,
        })
    }

    /// Views of everything as `[time, y, x]`, checking that the temporal
    /// cache covers the same timesteps and cells as the measurements.
    pub(crate) fn views(&self) -> Result<EstimateViews<'_>, ModelError> {
        let dim = self.calibrated.dim();
        Ok(EstimateViews {
            calibrated: self.calibrated.view(),
            excentricity: view3(VAR_EXCENTRICITY, &self.excentricity, dim)?,
            solar_elevation: view3(VAR_SOLAR_ELEVATION, &self.solar_elevation, dim)?,
            gc: view3(VAR_GC, &self.gc, dim)?,
            t_sat: view3(VAR_T_SAT, &self.t_sat, dim)?,
            t_earth: view3(VAR_T_EARTH, &self.t_earth, dim)?,
            atmospheric_albedo: view3(VAR_ATMOSPHERIC_ALBEDO, &self.atmospheric_albedo, dim)?,
            cloud_albedo: view3(VAR_CLOUD_ALBEDO, &self.cloud_albedo, dim)?,
        })
    }
}

fn view3<'a>(
    name: &str,
    data: &'a ArrayD<f32>,
    dim: (usize, usize, usize),
) -> Result<ArrayView3<'a, f32>, ModelError> {
    let mismatch = || ModelError::ShapeMismatch {
        name: name.to_string(),
        expected: vec![dim.0, dim.1, dim.2],
        got: data.shape().to_vec(),
    };
    let v = data.view().into_dimensionality::<Ix3>().map_err(|_| mismatch())?;
    if v.dim() != dim {
        return Err(mismatch());
    }
    Ok(v)
}

pub(crate) struct EstimateViews<'a> {
    pub(crate) calibrated: ArrayView3<'a, f32>,
    pub(crate) excentricity: ArrayView3<'a, f32>,
    pub(crate) solar_elevation: ArrayView3<'a, f32>,
    pub(crate) gc: ArrayView3<'a, f32>,
    pub(crate) t_sat: ArrayView3<'a, f32>,
    pub(crate) t_earth: ArrayView3<'a, f32>,
    pub(crate) atmospheric_albedo: ArrayView3<'a, f32>,
    pub(crate) cloud_albedo: ArrayView3<'a, f32>,
}

impl EstimateViews<'_> {
    pub(crate) fn dim(&self) -> (usize, usize, usize) {
        self.calibrated.dim()
    }

    pub(crate) fn inputs(&self, idx: (usize, usize, usize), i0met: f32) -> physics::EstimateInputs {
        physics::EstimateInputs {
            radiance: self.calibrated[idx],
            excentricity: self.excentricity[idx],
            solar_elevation: self.solar_elevation[idx],
            gc: self.gc[idx],
            t_sat: self.t_sat[idx],
            t_earth: self.t_earth[idx],
            atmospheric_albedo: self.atmospheric_albedo[idx],
            cloud_albedo: self.cloud_albedo[idx],
            i0met,
        }
    }
}

/// Put the products into `output` and sync it.
pub(crate) fn store_products(
    output: &mut LazyRasterCache,
    cloud_index: Array3<f32>,
    global_radiation: Array3<f32>,
) -> Result<(), ModelError> {
    let dims = [DIM_TIME, DIM_Y, DIM_X];
    output.insert(VAR_CLOUD_INDEX, &dims, cloud_index.into_dyn())?;
    output.insert(VAR_GLOBAL_RADIATION, &dims, global_radiation.into_dyn())?;
    output.sync()?;
    Ok(())
}

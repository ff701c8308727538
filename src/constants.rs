// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Useful constants.
//!
//! All physical constants are `f32`, because every raster is stored and
//! computed in single precision.

/// The dimension along which per-timestep data files are stacked.
pub const DIM_TIME: &str = "time";
/// The row dimension of the working grid.
pub const DIM_Y: &str = "yc";
/// The column dimension of the working grid.
pub const DIM_X: &str = "xc";
/// The dimension of the monthly turbidity stack.
pub const DIM_MONTHS: &str = "months";

pub const VAR_LAT: &str = "lat";
pub const VAR_LON: &str = "lon";
pub const VAR_DEM: &str = "dem";
pub const VAR_LINKE: &str = "linke";
pub const VAR_TIME: &str = "time";

// Raw satellite measurements and their calibration context.
pub const VAR_DATA: &str = "data";
pub const VAR_COUNTS_SHIFT: &str = "counts_shift";
pub const VAR_SPACE_MEASUREMENT: &str = "space_measurement";
pub const VAR_PRELAUNCH: &str = "prelaunch_0";
pub const VAR_POSTLAUNCH: &str = "postlaunch";

// The temporal cache.
pub const VAR_DECLINATION: &str = "declination";
pub const VAR_SOLAR_ANGLE: &str = "solarangle";
pub const VAR_SOLAR_ELEVATION: &str = "solarelevation";
pub const VAR_EXCENTRICITY: &str = "excentricity";
pub const VAR_GC: &str = "gc";
pub const VAR_ATMOSPHERIC_ALBEDO: &str = "atmosphericalbedo";
pub const VAR_T_SAT: &str = "t_sat";
pub const VAR_T_EARTH: &str = "t_earth";
pub const VAR_CLOUD_ALBEDO: &str = "cloudalbedo";

// The products.
pub const VAR_CLOUD_INDEX: &str = "cloudindex";
pub const VAR_GLOBAL_RADIATION: &str = "globalradiation";

/// The temporal-cache quantities, in the order the "update_temporalcache"
/// kernel expects its outputs.
pub const TEMPORAL_CACHE_VARS: [&str; 9] = [
    VAR_DECLINATION,
    VAR_SOLAR_ANGLE,
    VAR_SOLAR_ELEVATION,
    VAR_EXCENTRICITY,
    VAR_GC,
    VAR_ATMOSPHERIC_ALBEDO,
    VAR_T_SAT,
    VAR_T_EARTH,
    VAR_CLOUD_ALBEDO,
];

/// The solar constant \[W/m^2\].
pub const SOLAR_CONSTANT: f32 = 1367.0;

/// The scale height of the Rayleigh atmosphere \[metres\].
pub const RAYLEIGH_SCALE_HEIGHT: f32 = 8434.5;

/// Linke turbidity values are distributed multiplied by this factor so that
/// they fit into bytes.
pub const LINKE_COMPRESSION_FACTOR: f32 = 20.0;

/// The year whose mid-month dates are used to project the monthly Linke
/// turbidity climatology.
pub const DEFAULT_TURBIDITY_YEAR: i32 = 2014;

/// The day of the month used as the representative date of each month.
pub const TURBIDITY_DAY_OF_MONTH: u32 = 15;

/// The default sub-satellite longitude (GOES-13) \[degrees\].
pub const DEFAULT_SAT_LON: f32 = -75.113;

/// The default mean exo-atmospheric irradiance in the visible channel
/// \[W/m^2/sr/um\].
pub const DEFAULT_I0MET: f32 = 1.0 / std::f32::consts::PI * 1367.0;

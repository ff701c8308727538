// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Scalar physics of the Heliosat-like radiation model.
//!
//! Every function here works on a single grid cell and a single timestep.
//! Both compute strategies (and every kernel of the host device) call these
//! same functions in single precision, so their results can be compared
//! directly.
//!
//! Solar geometry follows Spencer (1971). The clear-sky model is the ESRA
//! model (Rigollier et al. 2000) driven by the Linke turbidity factor. The
//! atmospheric path reflectance is a simple turbidity- and zenith-dependent
//! approximation, good enough to remove most of the haze from the apparent
//! albedo.

#![allow(clippy::excessive_precision)]

use std::f32::consts::PI;

/// Below this solar elevation \[degrees\], cells are treated as night: the
/// apparent albedo diverges and nothing is estimated.
pub const MIN_USABLE_ELEVATION: f32 = 3.0;

/// The ratio of the Earth's equatorial radius to the geostationary orbit
/// radius.
const GEOSTATIONARY_RATIO: f32 = 6378.137 / 42164.0;

/// Rayleigh extinction below this cosine of the satellite zenith angle would
/// blow up; treat the satellite as not seeing the cell.
const MIN_SATELLITE_COS_ZENITH: f32 = 0.05;

const DEG2RAD: f32 = PI / 180.0;
const RAD2DEG: f32 = 180.0 / PI;

/// The day angle \[radians\] of a day of the year (1-based).
pub fn day_angle(day_of_year: u32) -> f32 {
    2.0 * PI * (day_of_year as f32 - 1.0) / 365.0
}

/// Solar declination \[radians\].
pub fn declination(gamma: f32) -> f32 {
    0.006918 - 0.399912 * gamma.cos() + 0.070257 * gamma.sin()
        - 0.006758 * (2.0 * gamma).cos()
        + 0.000907 * (2.0 * gamma).sin()
        - 0.002697 * (3.0 * gamma).cos()
        + 0.00148 * (3.0 * gamma).sin()
}

/// The correction to the mean Sun-Earth distance (squared and inverted), i.e.
/// the factor applied to the solar constant.
pub fn excentricity(gamma: f32) -> f32 {
    1.000110
        + 0.034221 * gamma.cos()
        + 0.001280 * gamma.sin()
        + 0.000719 * (2.0 * gamma).cos()
        + 0.000077 * (2.0 * gamma).sin()
}

/// The equation of time \[minutes\].
pub fn equation_of_time(gamma: f32) -> f32 {
    229.18
        * (0.000075 + 0.001868 * gamma.cos()
            - 0.032077 * gamma.sin()
            - 0.014615 * (2.0 * gamma).cos()
            - 0.040849 * (2.0 * gamma).sin())
}

/// The hour angle \[radians\] at a UTC decimal hour and longitude
/// \[degrees\]. Negative in the morning.
pub fn solar_angle(decimal_hour: f32, gamma: f32, lon: f32) -> f32 {
    let true_solar_time = decimal_hour + lon / 15.0 + equation_of_time(gamma) / 60.0;
    (true_solar_time - 12.0) * 15.0 * DEG2RAD
}

/// The cosine of the solar zenith angle. `lat` is in degrees, the rest in
/// radians.
pub fn cos_zenith(lat: f32, declination: f32, solar_angle: f32) -> f32 {
    let lat = lat * DEG2RAD;
    let c = lat.sin() * declination.sin() + lat.cos() * declination.cos() * solar_angle.cos();
    c.clamp(-1.0, 1.0)
}

/// Solar elevation \[degrees\].
pub fn solar_elevation(lat: f32, declination: f32, solar_angle: f32) -> f32 {
    cos_zenith(lat, declination, solar_angle).asin() * RAD2DEG
}

/// The solar elevation \[degrees\] corrected for atmospheric refraction.
fn refracted_elevation(elevation: f32) -> f32 {
    let h = elevation * DEG2RAD;
    let correction =
        0.061359 * (0.1594 + 1.1230 * h + 0.065656 * h * h) / (1.0 + 28.9344 * h + 277.3971 * h * h);
    (h + correction) * RAD2DEG
}

/// Atmospheric pressure relative to sea level at `altitude` \[metres\].
pub fn pressure_ratio(altitude: f32, scale_height: f32) -> f32 {
    (-altitude / scale_height).exp()
}

/// The relative optical air mass along the solar path (Kasten and Young
/// 1989), corrected for the altitude of the cell.
pub fn relative_air_mass(elevation: f32, altitude: f32, scale_height: f32) -> f32 {
    let h = refracted_elevation(elevation);
    pressure_ratio(altitude, scale_height)
        / ((h * DEG2RAD).sin() + 0.50572 * (h + 6.07995).powf(-1.6364))
}

/// The Rayleigh optical thickness at an air mass.
pub fn rayleigh_optical_thickness(air_mass: f32) -> f32 {
    let m = air_mass;
    if m <= 20.0 {
        1.0 / (6.6296 + 1.7513 * m - 0.1202 * m.powi(2) + 0.0065 * m.powi(3)
            - 0.00013 * m.powi(4))
    } else {
        1.0 / (10.4 + 0.718 * m)
    }
}

/// Beam transmittance along a path of `air_mass` for a Linke turbidity.
pub fn beam_transmittance(linke: f32, air_mass: f32) -> f32 {
    (-0.8662 * linke * air_mass * rayleigh_optical_thickness(air_mass)).exp()
}

/// The diffuse transmission function at zenith.
pub fn diffuse_transmittance(linke: f32) -> f32 {
    (-1.5843e-2 + 3.0543e-2 * linke + 3.797e-4 * linke * linke).max(0.0)
}

/// The diffuse angular function at a solar elevation \[degrees\].
pub fn diffuse_angular(linke: f32, elevation: f32) -> f32 {
    let trd = diffuse_transmittance(linke);
    let mut a0 = 2.6463e-1 - 6.1581e-2 * linke + 3.1408e-3 * linke * linke;
    if a0 * trd < 2.0e-3 {
        a0 = 2.0e-3 / trd.max(f32::EPSILON);
    }
    let a1 = 2.0402 + 1.8945e-2 * linke - 1.1161e-2 * linke * linke;
    let a2 = -1.3025 + 3.9231e-2 * linke + 8.5079e-3 * linke * linke;
    let sin_h = (elevation * DEG2RAD).sin();
    (a0 + a1 * sin_h + a2 * sin_h * sin_h).max(0.0)
}

/// Clear-sky global horizontal irradiance \[W/m^2\] and the beam
/// transmittance of the solar path.
pub fn clear_sky(
    solar_constant: f32,
    excentricity: f32,
    elevation: f32,
    altitude: f32,
    linke: f32,
    scale_height: f32,
) -> (f32, f32) {
    if elevation <= 0.0 {
        return (0.0, 0.0);
    }
    let i0 = solar_constant * excentricity;
    let air_mass = relative_air_mass(elevation, altitude, scale_height);
    let t_beam = beam_transmittance(linke, air_mass);
    let beam = i0 * (elevation * DEG2RAD).sin() * t_beam;
    let diffuse = i0 * diffuse_transmittance(linke) * diffuse_angular(linke, elevation);
    (beam + diffuse, t_beam)
}

/// The cosine of the zenith angle under which a geostationary satellite at
/// `sat_lon` sees the cell. Non-positive when the cell is beyond the limb.
pub fn satellite_cos_zenith(lat: f32, lon: f32, sat_lon: f32) -> f32 {
    let cos_beta = (lat * DEG2RAD).cos() * ((lon - sat_lon) * DEG2RAD).cos();
    let k = GEOSTATIONARY_RATIO;
    (cos_beta - k) / (1.0 + k * k - 2.0 * k * cos_beta).sqrt()
}

/// Beam transmittance along the satellite's viewing path.
pub fn satellite_transmittance(
    lat: f32,
    lon: f32,
    sat_lon: f32,
    altitude: f32,
    linke: f32,
    scale_height: f32,
) -> f32 {
    let cos_view = satellite_cos_zenith(lat, lon, sat_lon);
    if cos_view < MIN_SATELLITE_COS_ZENITH {
        return 0.0;
    }
    let air_mass = pressure_ratio(altitude, scale_height) / cos_view;
    beam_transmittance(linke, air_mass)
}

/// Path reflectance of the clear atmosphere. Grows with the turbidity and
/// with the slant of the solar path.
pub fn atmospheric_albedo(linke: f32, cos_zenith: f32) -> f32 {
    let cos_zenith = cos_zenith.max(0.0);
    (0.03 * linke * (2.0 - cos_zenith)).clamp(0.0, 0.3)
}

/// The albedo of a thick cloud seen from above.
pub fn cloud_albedo(cos_zenith: f32) -> f32 {
    let c = cos_zenith.max(0.0);
    0.78 - 0.13 * (1.0 - (-4.0 * c.powi(5)).exp())
}

/// The Heliosat clear-sky index for a cloud index.
pub fn clear_sky_index(cloud_index: f32) -> f32 {
    let n = cloud_index;
    if n < -0.2 {
        1.2
    } else if n < 0.8 {
        1.0 - n
    } else if n < 1.1 {
        2.0667 - 3.6667 * n + 1.6667 * n * n
    } else {
        0.05
    }
}

/// The per-cell, per-timestep inputs of the temporal cache.
#[derive(Debug, Clone, Copy)]
pub struct AdvanceInputs {
    pub lat: f32,
    pub lon: f32,
    pub decimal_hour: f32,
    pub gamma: f32,
    pub dem: f32,
    /// Already selected for the month of the timestep.
    pub linke: f32,
    pub sat_lon: f32,
    pub solar_constant: f32,
    pub scale_height: f32,
}

/// The temporal-cache quantities of one cell at one timestep, in the order of
/// [`crate::constants::TEMPORAL_CACHE_VARS`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TemporalQuantities {
    pub declination: f32,
    pub solar_angle: f32,
    pub solar_elevation: f32,
    pub excentricity: f32,
    pub gc: f32,
    pub atmospheric_albedo: f32,
    pub t_sat: f32,
    pub t_earth: f32,
    pub cloud_albedo: f32,
}

impl TemporalQuantities {
    pub fn to_array(self) -> [f32; 9] {
        [
            self.declination,
            self.solar_angle,
            self.solar_elevation,
            self.excentricity,
            self.gc,
            self.atmospheric_albedo,
            self.t_sat,
            self.t_earth,
            self.cloud_albedo,
        ]
    }
}

pub fn temporal_quantities(i: &AdvanceInputs) -> TemporalQuantities {
    let declination = declination(i.gamma);
    let solar_angle = solar_angle(i.decimal_hour, i.gamma, i.lon);
    let cos_z = cos_zenith(i.lat, declination, solar_angle);
    let solar_elevation = cos_z.asin() * RAD2DEG;
    let excentricity = excentricity(i.gamma);
    let (gc, t_earth) = clear_sky(
        i.solar_constant,
        excentricity,
        solar_elevation,
        i.dem,
        i.linke,
        i.scale_height,
    );

    TemporalQuantities {
        declination,
        solar_angle,
        solar_elevation,
        excentricity,
        gc,
        atmospheric_albedo: atmospheric_albedo(i.linke, cos_z),
        t_sat: satellite_transmittance(i.lat, i.lon, i.sat_lon, i.dem, i.linke, i.scale_height),
        t_earth,
        cloud_albedo: cloud_albedo(cos_z),
    }
}

/// The per-cell, per-timestep inputs of the estimate.
#[derive(Debug, Clone, Copy)]
pub struct EstimateInputs {
    pub radiance: f32,
    pub excentricity: f32,
    pub solar_elevation: f32,
    pub gc: f32,
    pub t_sat: f32,
    pub t_earth: f32,
    pub atmospheric_albedo: f32,
    pub cloud_albedo: f32,
    pub i0met: f32,
}

/// The surface albedo seen through the atmosphere, or NaN where it can't be
/// observed (night, or the satellite can't see the cell).
pub fn corrected_albedo(i: &EstimateInputs) -> f32 {
    if i.solar_elevation <= MIN_USABLE_ELEVATION {
        return f32::NAN;
    }
    let apparent =
        i.radiance / (i.i0met * i.excentricity * (i.solar_elevation * DEG2RAD).sin());
    let transmittance = i.t_earth * i.t_sat;
    if transmittance <= 0.0 {
        return f32::NAN;
    }
    (apparent - i.atmospheric_albedo) / transmittance
}

/// The smaller of two albedos, ignoring NaNs.
pub fn min_albedo(a: f32, b: f32) -> f32 {
    // f32::min already returns the non-NaN operand.
    a.min(b)
}

/// The cloud index and the global radiation \[W/m^2\] of a cell, given its
/// corrected albedo and the ground albedo of the batch.
pub fn cloud_index_and_radiation(
    i: &EstimateInputs,
    corrected_albedo: f32,
    ground_albedo: f32,
) -> (f32, f32) {
    if i.solar_elevation <= MIN_USABLE_ELEVATION || corrected_albedo.is_nan() {
        return (0.0, 0.0);
    }
    let contrast = i.cloud_albedo - ground_albedo;
    let n = (corrected_albedo - ground_albedo) / contrast;
    if !n.is_finite() || contrast <= 1e-3 {
        return (0.0, 0.0);
    }
    (n, clear_sky_index(n) * i.gc)
}

// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Arguments describing a job, shared by `static-layers` and `estimate`.

use std::{path::PathBuf, str::FromStr};

use clap::Parser;
use itertools::Itertools;
use log::debug;
use serde::{Deserialize, Serialize};
use strum::IntoEnumIterator;
use thiserror::Error;

use super::{
    common::{ARG_FILE_HELP, HARDWARE_HELP},
    SolarModelError,
};
use crate::{
    constants::{DEFAULT_I0MET, DEFAULT_SAT_LON, DEFAULT_TURBIDITY_YEAR},
    job::{JobDescription, DEFAULT_UTC_OFFSET_HOURS},
    model::{HeliosatParams, ModelDevice},
    store::Tile,
};

const DEFAULT_DATA_GLOB: &str = "data/*.nc";
const DEFAULT_STATIC_FILE: &str = "static";
const DEFAULT_TEMPORAL_CACHE: &str = "temporal_cache";
const DEFAULT_PRODUCT: &str = "product";
const DEFAULT_ELEVATION: &str = "reference/dem";
const DEFAULT_TURBIDITY: &str = "reference/linke";

lazy_static::lazy_static! {
    static ref DATA_HELP: String =
        format!("A glob matching the satellite images of the batch. Default: {DEFAULT_DATA_GLOB}");

    static ref STATIC_FILE_HELP: String =
        format!("The static layer store of the deployment. It's created from the first image if it doesn't exist. Default: {DEFAULT_STATIC_FILE}");

    static ref ELEVATION_HELP: String =
        format!("The reference DEM store. Only read when the static layers are created. Default: {DEFAULT_ELEVATION}");

    static ref TURBIDITY_HELP: String =
        format!("The reference Linke turbidity store. Only read when the static layers are created. Default: {DEFAULT_TURBIDITY}");

    static ref TEMPORAL_CACHE_HELP: String =
        format!("Where the intermediate quantities of the batch are written. Default: {DEFAULT_TEMPORAL_CACHE}");

    static ref PRODUCT_HELP: String =
        format!("Where the cloud index and global radiation are written. Default: {DEFAULT_PRODUCT}");

    static ref SAT_LON_HELP: String =
        format!("The sub-satellite longitude [degrees]. Default: {DEFAULT_SAT_LON}");

    static ref I0MET_HELP: String =
        format!("The mean exo-atmospheric irradiance in the satellite's band. Default: {DEFAULT_I0MET}");

    static ref TURBIDITY_YEAR_HELP: String =
        format!("The year whose mid-month dates select the turbidity climatology. Default: {DEFAULT_TURBIDITY_YEAR}");

    static ref UTC_OFFSET_HELP: String =
        format!("Local time is UTC plus this many hours; used to find daylight images. Default: {DEFAULT_UTC_OFFSET_HOURS}");
}

#[derive(Parser, Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub(super) struct JobArgs {
    #[clap(name = "ARGUMENTS_FILE", help = ARG_FILE_HELP.as_str(), parse(from_os_str))]
    #[serde(skip)]
    pub(super) args_file: Option<PathBuf>,

    #[clap(short, long, help = DATA_HELP.as_str(), help_heading = "INPUT FILES")]
    pub(super) data: Option<String>,

    #[clap(short, long, help = STATIC_FILE_HELP.as_str(), help_heading = "INPUT FILES")]
    pub(super) static_file: Option<PathBuf>,

    #[clap(long, help = ELEVATION_HELP.as_str(), help_heading = "INPUT FILES")]
    pub(super) elevation: Option<PathBuf>,

    #[clap(long, help = TURBIDITY_HELP.as_str(), help_heading = "INPUT FILES")]
    pub(super) turbidity: Option<PathBuf>,

    /// Process every matching image, not only the daylight images of the
    /// last 30 days.
    #[clap(long, help_heading = "INPUT FILES")]
    #[serde(default)]
    pub(super) no_filter: bool,

    #[clap(long, help = TEMPORAL_CACHE_HELP.as_str(), help_heading = "OUTPUT FILES")]
    pub(super) temporal_cache: Option<PathBuf>,

    #[clap(short, long, help = PRODUCT_HELP.as_str(), help_heading = "OUTPUT FILES")]
    pub(super) product: Option<PathBuf>,

    /// Only process this window of the grid (half-open row and column
    /// ranges). Default: the whole grid.
    #[clap(
        short,
        long,
        number_of_values = 4,
        value_names = &["Y_START", "Y_END", "X_START", "X_END"],
        help_heading = "GRID"
    )]
    pub(super) tile: Option<Vec<usize>>,

    #[clap(long, help = HARDWARE_HELP.as_str(), help_heading = "MODEL")]
    pub(super) hardware: Option<String>,

    #[clap(long, help = SAT_LON_HELP.as_str(), allow_hyphen_values = true, help_heading = "MODEL")]
    pub(super) sat_lon: Option<f32>,

    #[clap(long, help = I0MET_HELP.as_str(), help_heading = "MODEL")]
    pub(super) i0met: Option<f32>,

    #[clap(long, help = TURBIDITY_YEAR_HELP.as_str(), help_heading = "MODEL")]
    pub(super) turbidity_year: Option<i32>,

    #[clap(long, help = UTC_OFFSET_HELP.as_str(), allow_hyphen_values = true, help_heading = "MODEL")]
    pub(super) utc_offset: Option<i32>,
}

impl JobArgs {
    /// Both command-line and file arguments overlap in terms of what is
    /// available; this function consolidates everything that was specified
    /// into a single struct. Where applicable, it will prefer CLI parameters
    /// over those in the file.
    ///
    /// This function should only ever merge arguments, and not try to make
    /// sense of them.
    pub(super) fn merge(self) -> Result<JobArgs, SolarModelError> {
        debug!("Merging command-line arguments with the argument file");

        let cli_args = self;

        if let Some(arg_file) = cli_args.args_file {
            // Read in the file arguments. Ensure all of the file args are
            // accounted for by pattern matching.
            let JobArgs {
                args_file: _,
                data,
                static_file,
                elevation,
                turbidity,
                no_filter,
                temporal_cache,
                product,
                tile,
                hardware,
                sat_lon,
                i0met,
                turbidity_year,
                utc_offset,
            } = unpack_arg_file!(arg_file);

            // Merge all the arguments, preferring the CLI args when available.
            Ok(JobArgs {
                args_file: None,
                data: cli_args.data.or(data),
                static_file: cli_args.static_file.or(static_file),
                elevation: cli_args.elevation.or(elevation),
                turbidity: cli_args.turbidity.or(turbidity),
                no_filter: cli_args.no_filter || no_filter,
                temporal_cache: cli_args.temporal_cache.or(temporal_cache),
                product: cli_args.product.or(product),
                tile: cli_args.tile.or(tile),
                hardware: cli_args.hardware.or(hardware),
                sat_lon: cli_args.sat_lon.or(sat_lon),
                i0met: cli_args.i0met.or(i0met),
                turbidity_year: cli_args.turbidity_year.or(turbidity_year),
                utc_offset: cli_args.utc_offset.or(utc_offset),
            })
        } else {
            Ok(cli_args)
        }
    }

    pub(super) fn parse(self) -> Result<JobDescription, JobArgsError> {
        debug!("{:#?}", self);

        // Expose all the struct fields to ensure they're all used.
        let JobArgs {
            args_file: _,
            data,
            static_file,
            elevation,
            turbidity,
            no_filter,
            temporal_cache,
            product,
            tile,
            hardware,
            sat_lon,
            i0met,
            turbidity_year,
            utc_offset,
        } = self;

        let tile = match tile.as_deref() {
            None => None,
            Some(&[y0, y1, x0, x1]) if y0 < y1 && x0 < x1 => Some(Tile::new(y0..y1, x0..x1)),
            Some(t) => return Err(JobArgsError::InvalidTile(t.to_vec())),
        };
        let hardware = match hardware {
            None => ModelDevice::Cpu,
            Some(h) => ModelDevice::from_str(&h.to_lowercase())
                .map_err(|_| JobArgsError::UnknownHardware(h))?,
        };
        let defaults = HeliosatParams::default();

        Ok(JobDescription {
            data: data.unwrap_or_else(|| DEFAULT_DATA_GLOB.to_string()),
            static_file: static_file.unwrap_or_else(|| DEFAULT_STATIC_FILE.into()),
            temporal_cache: temporal_cache.unwrap_or_else(|| DEFAULT_TEMPORAL_CACHE.into()),
            product: product.unwrap_or_else(|| DEFAULT_PRODUCT.into()),
            tile,
            hardware,
            elevation: elevation.unwrap_or_else(|| DEFAULT_ELEVATION.into()),
            turbidity: turbidity.unwrap_or_else(|| DEFAULT_TURBIDITY.into()),
            params: HeliosatParams {
                sat_lon: sat_lon.unwrap_or(defaults.sat_lon),
                i0met: i0met.unwrap_or(defaults.i0met),
                ..defaults
            },
            turbidity_year: turbidity_year.unwrap_or(DEFAULT_TURBIDITY_YEAR),
            utc_offset_hours: utc_offset.unwrap_or(DEFAULT_UTC_OFFSET_HOURS),
            filter: !no_filter,
        })
    }
}

#[derive(Error, Debug)]
pub(super) enum JobArgsError {
    #[error("A tile is given as Y_START Y_END X_START X_END with non-empty ranges; got {0:?}")]
    InvalidTile(Vec<usize>),

    #[error("Unknown hardware '{0}'; supported: {}", ModelDevice::iter().join(", "))]
    UnknownHardware(String),
}

// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Running one batch of satellite images through the model: finding and
//! filtering the files, getting the static layers, then advancing the temporal
//! cache and estimating the products.

#[cfg(test)]
mod tests;

use std::{
    collections::BTreeSet,
    path::{Path, PathBuf},
};

use chrono::{Datelike, Duration, Timelike};
use glob::glob;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use itertools::Itertools;
use log::{debug, info};
use thiserror::Error;
use vec1::Vec1;

use crate::{
    cache::{CacheError, LazyRasterCache},
    loader::{timestamp_from_path, LoaderError, TemporalLoader},
    model::{new_strategy, HeliosatParams, ModelDevice, ModelError},
    static_layers::{
        providers::{GriddedElevation, GriddedTurbidity},
        ProviderError, StaticLayerBuilder, StaticLayerError,
    },
    store::{DirStore, StoreError, Tile},
    PROGRESS_BARS,
};

/// Files are acquired in Argentina.
pub const DEFAULT_UTC_OFFSET_HOURS: i32 = -3;

/// Only images this recent, relative to the newest, are processed.
const MAX_AGE_DAYS: i64 = 30;

/// The local hours (inclusive) with enough daylight to be worth processing.
const FIRST_DAYLIGHT_HOUR: u32 = 6;
const LAST_DAYLIGHT_HOUR: u32 = 20;

/// Everything needed to process one batch.
#[derive(Debug, Clone, PartialEq)]
pub struct JobDescription {
    /// A glob matching the per-timestep satellite stores.
    pub data: String,

    /// The static store of the deployment.
    pub static_file: PathBuf,

    pub temporal_cache: PathBuf,

    pub product: PathBuf,

    pub tile: Option<Tile>,

    pub hardware: ModelDevice,

    /// The reference DEM store; only read when the static layers are first
    /// projected.
    pub elevation: PathBuf,

    /// The reference Linke turbidity store; only read when the static layers
    /// are first projected.
    pub turbidity: PathBuf,

    pub params: HeliosatParams,

    pub turbidity_year: i32,

    /// Local time = UTC + this many hours.
    pub utc_offset_hours: i32,

    /// Keep only recent daylight files (see [`filter_data`]).
    pub filter: bool,
}

impl JobDescription {
    /// The batch's files, sorted, after filtering (if enabled).
    pub fn files(&self) -> Result<Vec1<PathBuf>, JobError> {
        let mut files = get_all_matches_from_glob(&self.data)?;
        files.sort();
        if self.filter {
            files = filter_data(files, self.utc_offset_hours)?;
        }
        Vec1::try_from_vec(files).map_err(|_| JobError::NoData(self.data.clone()))
    }

    fn static_layer_builder(
        &self,
    ) -> Result<StaticLayerBuilder<GriddedElevation, GriddedTurbidity>, JobError> {
        let elevation = GriddedElevation::open(&self.elevation)?;
        let turbidity = GriddedTurbidity::open(&self.turbidity)?;
        Ok(
            StaticLayerBuilder::new(&self.static_file, elevation, turbidity)
                .with_turbidity_year(self.turbidity_year),
        )
    }

    /// Get the static layers narrowed to the job's tile. The reference
    /// providers are only opened if the layers haven't been projected yet.
    fn static_layers(&self, files: &[PathBuf]) -> Result<DirStore, JobError> {
        if self.static_file.exists() {
            debug!(
                "Reusing the static layers in '{}'",
                self.static_file.display()
            );
            let store = DirStore::open_existing(&self.static_file)?.into_read_only();
            Ok(match &self.tile {
                Some(tile) => store.tailor(tile, true)?,
                None => store,
            })
        } else {
            Ok(self
                .static_layer_builder()?
                .build(files, self.tile.as_ref())?)
        }
    }

    /// Project the static layers of the deployment from the first data file,
    /// unless they already exist. Run this before starting workers that share
    /// the static store.
    pub fn build_static_layers(&self) -> Result<(), JobError> {
        let files = self.files()?;
        if self.static_file.exists() {
            info!(
                "The static layers in '{}' already exist",
                self.static_file.display()
            );
            return Ok(());
        }
        self.static_layer_builder()?.build(files.as_slice(), None)?;
        Ok(())
    }

    /// Process the batch. Returns the number of timesteps estimated.
    pub fn run(&self) -> Result<usize, JobError> {
        let files = self.files()?;
        let months = files
            .iter()
            .map(timestamp_from_path)
            .map_ok(|t| (t.year(), t.month()))
            .collect::<Result<BTreeSet<_>, _>>()?;
        debug!("{self:#?}");
        info!(
            "Months: [{}]",
            months.iter().map(|(y, m)| format!("{m}/{y}")).join(", ")
        );
        info!("Dataset: {} files.", files.len());

        let progress = ProgressBar::with_draw_target(
            Some(4),
            if PROGRESS_BARS.load() {
                ProgressDrawTarget::stdout()
            } else {
                ProgressDrawTarget::hidden()
            },
        )
        .with_style(
            ProgressStyle::default_bar()
                .template("{msg:17}: [{wide_bar:.blue}] {pos}/{len} stages ({elapsed_precise})")
                .map_err(|e| JobError::Progress(e.to_string()))?
                .progress_chars("=> "),
        )
        .with_position(0)
        .with_message("Static layers");

        let static_store = self.static_layers(files.as_slice())?;
        let mut loader = TemporalLoader::new(files, self.tile.as_ref(), true, static_store)?;
        progress.inc(1);

        progress.set_message("Loading");
        let strategy = new_strategy(self.hardware, self.params)?;
        let mut cache = open_cache(&self.temporal_cache)?;
        let mut output = open_cache(&self.product)?;
        loader.calibrated_data()?;
        progress.inc(1);

        progress.set_message("Temporal cache");
        strategy.advance_temporal_cache(&mut loader, &mut cache)?;
        progress.inc(1);

        progress.set_message("Global radiation");
        strategy.estimate_global_radiation(&mut loader, &mut cache, &mut output)?;
        progress.inc(1);
        progress.finish_with_message("Done");

        let estimated = loader.timestamps().len();
        cache.dump()?;
        output.dump()?;
        loader.dump()?;
        info!("Process finished.");
        Ok(estimated)
    }
}

/// Every batch gets a fresh store; one left by an earlier batch is replaced
/// once this one syncs.
fn open_cache(path: &Path) -> Result<LazyRasterCache, JobError> {
    let store = DirStore::create(path)?;
    Ok(LazyRasterCache::new(Box::new(store)))
}

/// Keep the files acquired within the 30 days before the newest one, and in
/// local daylight (06:00 to 20:59). Local time is UTC shifted by
/// `utc_offset_hours`; the age cut uses UTC dates. Order is preserved.
pub fn filter_data(files: Vec<PathBuf>, utc_offset_hours: i32) -> Result<Vec<PathBuf>, JobError> {
    let stamped = files
        .into_iter()
        .map(|f| timestamp_from_path(&f).map(|t| (t, f)))
        .collect::<Result<Vec<_>, _>>()?;
    let newest = match stamped.iter().map(|(t, _)| *t).max() {
        Some(t) => t,
        None => return Ok(vec![]),
    };
    let a_month_ago = (newest - Duration::days(MAX_AGE_DAYS)).date();
    let offset = Duration::hours(i64::from(utc_offset_hours));

    let kept: Vec<PathBuf> = stamped
        .into_iter()
        .filter(|(t, _)| {
            let local_hour = (*t + offset).hour();
            t.date() >= a_month_ago
                && (FIRST_DAYLIGHT_HOUR..=LAST_DAYLIGHT_HOUR).contains(&local_hour)
        })
        .map(|(_, f)| f)
        .collect();
    debug!("{} file(s) are recent daylight images", kept.len());
    Ok(kept)
}

/// Get all of the paths matching a glob.
fn get_all_matches_from_glob(g: &str) -> Result<Vec<PathBuf>, JobError> {
    let mut entries = vec![];
    for entry in glob(g)? {
        entries.push(entry?);
    }
    Ok(entries)
}

#[derive(Error, Debug)]
pub enum JobError {
    #[error("No data files were found for '{0}'")]
    NoData(String),

    #[error("{0}")]
    Glob(#[from] glob::GlobError),

    #[error("{0}")]
    Pattern(#[from] glob::PatternError),

    #[error("Couldn't set up the progress bar: {0}")]
    Progress(String),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    StaticLayers(#[from] StaticLayerError),

    #[error(transparent)]
    Loader(#[from] LoaderError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Model(#[from] ModelError),
}

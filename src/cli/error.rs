// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Error type for all solar-model-related errors. This should be the *only*
//! error enum that is publicly visible.

use thiserror::Error;

use super::job::JobArgsError;
use crate::{
    cache::CacheError,
    gpu::GpuError,
    job::JobError,
    loader::LoaderError,
    model::ModelError,
    static_layers::{ProviderError, StaticLayerError},
    store::StoreError,
};

/// The *only* publicly visible error from solar-model. Each message says what
/// the user can do about it, unless it's "generic".
#[derive(Error, Debug)]
pub enum SolarModelError {
    /// An error in the arguments describing a job.
    #[error("{0}\n\nSee 'solar-model help estimate' for the accepted arguments.")]
    JobArgs(String),

    /// An error related to argument files.
    #[error("{0}\n\nArgument files are TOML or JSON with the same keys as the long CLI flags (e.g. static_file).")]
    ArgFile(String),

    /// An error while projecting or reopening the static layers.
    #[error("{0}\n\nIf the static store is damaged, delete it and run 'solar-model static-layers' again.")]
    StaticLayers(String),

    /// An error with the satellite images of a batch.
    #[error("{0}\n\nImages are stores named like <sat>.<YYYY>.<DDD>.<HHMMSS>.<band>.nc")]
    Data(String),

    /// An error from the GPU (or its emulation).
    #[error("{0}\n\nIf you don't know what this means, try turning up verbosity (-v or -vv) or use '--hardware cpu'.")]
    Gpu(String),

    /// A generic error that can't be clarified further, e.g. IO errors.
    #[error("{0}")]
    Generic(String),
}

// When changing the error propagation below, ensure `Self::from(e)` uses the
// correct `e`!

impl From<JobArgsError> for SolarModelError {
    fn from(e: JobArgsError) -> Self {
        Self::JobArgs(e.to_string())
    }
}

impl From<JobError> for SolarModelError {
    fn from(e: JobError) -> Self {
        let s = e.to_string();
        match e {
            JobError::NoData(_) | JobError::Glob(_) | JobError::Pattern(_) => Self::Data(s),
            JobError::Progress(_) => Self::Generic(s),
            JobError::Provider(e) => Self::from(e),
            JobError::StaticLayers(e) => Self::from(e),
            JobError::Loader(e) => Self::from(e),
            JobError::Cache(e) => Self::from(e),
            JobError::Store(e) => Self::from(e),
            JobError::Model(e) => Self::from(e),
        }
    }
}

impl From<ModelError> for SolarModelError {
    fn from(e: ModelError) -> Self {
        let s = e.to_string();
        match e {
            ModelError::ShapeMismatch { .. } => Self::Generic(s),
            ModelError::Loader(e) => Self::from(e),
            ModelError::Cache(e) => Self::from(e),
            ModelError::Gpu(e) => Self::from(e),
        }
    }
}

impl From<LoaderError> for SolarModelError {
    fn from(e: LoaderError) -> Self {
        let s = e.to_string();
        match e {
            LoaderError::NoFiles
            | LoaderError::BadFileName(_)
            | LoaderError::UnexpectedShape { .. } => Self::Data(s),
            LoaderError::TileMismatch { .. } => Self::StaticLayers(s),
            LoaderError::StaticLayers(e) => Self::from(e),
            LoaderError::Cache(e) => Self::from(e),
            LoaderError::Store(e) => Self::from(e),
        }
    }
}

impl From<StaticLayerError> for SolarModelError {
    fn from(e: StaticLayerError) -> Self {
        Self::StaticLayers(e.to_string())
    }
}

impl From<ProviderError> for SolarModelError {
    fn from(e: ProviderError) -> Self {
        Self::StaticLayers(e.to_string())
    }
}

impl From<GpuError> for SolarModelError {
    fn from(e: GpuError) -> Self {
        Self::Gpu(e.to_string())
    }
}

impl From<CacheError> for SolarModelError {
    fn from(e: CacheError) -> Self {
        Self::Generic(e.to_string())
    }
}

impl From<StoreError> for SolarModelError {
    fn from(e: StoreError) -> Self {
        Self::Generic(e.to_string())
    }
}

impl From<std::io::Error> for SolarModelError {
    fn from(e: std::io::Error) -> Self {
        Self::Generic(e.to_string())
    }
}

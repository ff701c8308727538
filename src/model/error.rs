// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Error type for all model-related errors.

use thiserror::Error;

use crate::{cache::CacheError, gpu::GpuError, loader::LoaderError};

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("'{name}' has shape {got:?}, but {expected:?} was expected")]
    ShapeMismatch {
        name: String,
        expected: Vec<usize>,
        got: Vec<usize>,
    },

    #[error(transparent)]
    Loader(#[from] LoaderError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Gpu(#[from] GpuError),
}

// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The radiation model's kernels, for the host device. `src_cuda/kernels.cu`
//! has the CUDA versions; the operand layouts below must agree with it.
//!
//! Each invocation handles one cell (`block_x`, `block_y`) at one timestep
//! (`thread_z`). Every operand's leading dimension is either the number of
//! timesteps or 1, so the number of threads per block is the number of
//! timesteps. Kernels still check their bounds against their first output.

use super::{KernelArgs, ThreadIdx};
use crate::model::physics::{self, AdvanceInputs, EstimateInputs};

pub const UPDATE_TEMPORAL_CACHE: &str = "update_temporalcache";
pub const ESTIMATE_GLOBAL_RADIATION: &str = "estimate_globalradiation";

/// "update_temporalcache" operands: 9 outputs `[time, y, x]` in the order of
/// [`crate::constants::TEMPORAL_CACHE_VARS`], then these inputs.
pub(crate) mod advance {
    pub const OUTPUTS: usize = 9;
    /// `[y, x]`
    pub const LAT: usize = 9;
    /// `[y, x]`
    pub const LON: usize = 10;
    /// `[time, 1, 1]`
    pub const DECIMAL_HOUR: usize = 11;
    /// `[time, 1, 1]`
    pub const GAMMA: usize = 12;
    /// `[y, x]`
    pub const DEM: usize = 13;
    /// `[time, y, x]`, the turbidity of each timestep's month
    pub const LINKE: usize = 14;
    pub const SAT_LON: usize = 15;
    pub const SOLAR_CONSTANT: usize = 16;
    pub const SCALE_HEIGHT: usize = 17;
    pub const OPERANDS: usize = 18;
}

/// "estimate_globalradiation" operands: the cloud index and the global
/// radiation `[time, y, x]`, then these inputs.
pub(crate) mod estimate {
    pub const OUTPUTS: usize = 2;
    pub const CLOUD_INDEX: usize = 0;
    pub const GLOBAL_RADIATION: usize = 1;
    pub const CALIBRATED_DATA: usize = 2;
    pub const EXCENTRICITY: usize = 3;
    pub const SOLAR_ELEVATION: usize = 4;
    pub const GC: usize = 5;
    pub const T_SAT: usize = 6;
    pub const T_EARTH: usize = 7;
    pub const ATMOSPHERIC_ALBEDO: usize = 8;
    pub const CLOUD_ALBEDO: usize = 9;
    pub const I0MET: usize = 10;
    pub const OPERANDS: usize = 11;
}

/// Whether `idx` addresses an element of the first output.
fn in_bounds(idx: ThreadIdx, args: &KernelArgs) -> bool {
    let [n_time, rows, cols] = args.shape(0);
    idx.thread_z < n_time && idx.block_y < rows && idx.block_x < cols
}

pub fn update_temporalcache(idx: ThreadIdx, args: &mut KernelArgs) {
    use advance::*;

    if !in_bounds(idx, args) {
        return;
    }
    let (t, r, c) = (idx.thread_z, idx.block_y, idx.block_x);
    let inputs = AdvanceInputs {
        lat: args.get(LAT, t, r, c),
        lon: args.get(LON, t, r, c),
        decimal_hour: args.get(DECIMAL_HOUR, t, r, c),
        gamma: args.get(GAMMA, t, r, c),
        dem: args.get(DEM, t, r, c),
        linke: args.get(LINKE, t, r, c),
        sat_lon: args.get(SAT_LON, t, r, c),
        solar_constant: args.get(SOLAR_CONSTANT, t, r, c),
        scale_height: args.get(SCALE_HEIGHT, t, r, c),
    };
    let quantities = physics::temporal_quantities(&inputs).to_array();
    for (output, value) in quantities.into_iter().enumerate() {
        args.set(output, t, r, c, value);
    }
}

fn estimate_inputs(args: &KernelArgs, t: usize, r: usize, c: usize) -> EstimateInputs {
    use estimate::*;

    EstimateInputs {
        radiance: args.get(CALIBRATED_DATA, t, r, c),
        excentricity: args.get(EXCENTRICITY, t, r, c),
        solar_elevation: args.get(SOLAR_ELEVATION, t, r, c),
        gc: args.get(GC, t, r, c),
        t_sat: args.get(T_SAT, t, r, c),
        t_earth: args.get(T_EARTH, t, r, c),
        atmospheric_albedo: args.get(ATMOSPHERIC_ALBEDO, t, r, c),
        cloud_albedo: args.get(CLOUD_ALBEDO, t, r, c),
        i0met: args.get(I0MET, t, r, c),
    }
}

pub fn estimate_globalradiation(idx: ThreadIdx, args: &mut KernelArgs) {
    use estimate::*;

    if !in_bounds(idx, args) {
        return;
    }
    let (t, r, c) = (idx.thread_z, idx.block_y, idx.block_x);
    let n_time = args.shape(CLOUD_INDEX)[0];

    // The ground is the darkest this cell gets over the batch.
    let ground = (0..n_time).fold(f32::NAN, |ground, t| {
        let albedo = physics::corrected_albedo(&estimate_inputs(args, t, r, c));
        physics::min_albedo(ground, albedo)
    });

    let inputs = estimate_inputs(args, t, r, c);
    let albedo = physics::corrected_albedo(&inputs);
    let (cloud_index, radiation) = physics::cloud_index_and_radiation(&inputs, albedo, ground);
    args.set(CLOUD_INDEX, t, r, c, cloud_index);
    args.set(GLOBAL_RADIATION, t, r, c, radiation);
}

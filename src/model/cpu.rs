// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Evaluating the model with array arithmetic on the CPU.

use log::debug;
use ndarray::prelude::*;

use super::{
    physics::{self, AdvanceInputs},
    store_products, store_temporal_cache, AdvanceData, ComputeStrategy, EstimateData,
    HeliosatParams, ModelError, SolarClock,
};
use crate::{cache::LazyRasterCache, loader::TemporalLoader};

pub struct CpuStrategy {
    params: HeliosatParams,
    clock: SolarClock,
}

impl CpuStrategy {
    pub fn new(params: HeliosatParams) -> CpuStrategy {
        CpuStrategy {
            params,
            clock: SolarClock::new(),
        }
    }
}

impl ComputeStrategy for CpuStrategy {
    fn advance_temporal_cache(
        &self,
        loader: &mut TemporalLoader,
        cache: &mut LazyRasterCache,
    ) -> Result<(), ModelError> {
        let data = AdvanceData::read(loader, &self.clock)?;
        let dim = data.dim();
        debug!("Advancing the temporal cache on the CPU over {dim:?}");
        let mut outputs: Vec<Array3<f32>> = (0..9).map(|_| Array3::zeros(dim)).collect();
        let params = self.params;

        for (t, time) in data.times.times.iter().enumerate() {
            let linke = data.linke.index_axis(Axis(0), time.month as usize);
            let quantities = ndarray::Zip::from(data.lat.view())
                .and(data.lon.view())
                .and(data.dem.view())
                .and(linke)
                .par_map_collect(|&lat, &lon, &dem, &linke| {
                    physics::temporal_quantities(&AdvanceInputs {
                        lat,
                        lon,
                        decimal_hour: time.decimal_hour,
                        gamma: time.gamma,
                        dem,
                        linke,
                        sat_lon: params.sat_lon,
                        solar_constant: params.solar_constant,
                        scale_height: params.scale_height,
                    })
                });

            for ((r, c), q) in quantities.indexed_iter() {
                for (output, value) in outputs.iter_mut().zip(q.to_array()) {
                    output[(t, r, c)] = value;
                }
            }
        }

        store_temporal_cache(cache, outputs)
    }

    fn estimate_global_radiation(
        &self,
        loader: &mut TemporalLoader,
        cache: &mut LazyRasterCache,
        output: &mut LazyRasterCache,
    ) -> Result<(), ModelError> {
        let data = EstimateData::read(loader, cache)?;
        let views = data.views()?;
        let dim = views.dim();
        debug!("Estimating global radiation on the CPU over {dim:?}");
        let i0met = self.params.i0met;

        let albedo = Array3::from_shape_fn(dim, |idx| {
            physics::corrected_albedo(&views.inputs(idx, i0met))
        });
        // The ground is the darkest each cell gets over the batch.
        let ground = albedo.fold_axis(Axis(0), f32::NAN, |&g, &a| physics::min_albedo(g, a));

        let estimates = Array3::from_shape_fn(dim, |(t, r, c)| {
            physics::cloud_index_and_radiation(
                &views.inputs((t, r, c), i0met),
                albedo[(t, r, c)],
                ground[(r, c)],
            )
        });
        let cloud_index = estimates.mapv(|(n, _)| n);
        let global_radiation = estimates.mapv(|(_, g)| g);

        store_products(output, cloud_index, global_radiation)
    }
}

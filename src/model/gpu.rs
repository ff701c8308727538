// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Evaluating the model with kernels dispatched to a [`Device`].

use log::debug;
use ndarray::prelude::*;

use super::{
    store_products, store_temporal_cache, AdvanceData, ComputeStrategy, EstimateData,
    HeliosatParams, ModelError, SolarClock,
};
use crate::{
    cache::LazyRasterCache,
    gpu::{
        dispatch,
        kernels::{self, advance, estimate},
        Device, Operand,
    },
    loader::TemporalLoader,
};

pub struct GpuStrategy<D: Device> {
    device: D,
    params: HeliosatParams,
    clock: SolarClock,
}

impl<D: Device> GpuStrategy<D> {
    pub fn new(device: D, params: HeliosatParams) -> GpuStrategy<D> {
        GpuStrategy {
            device,
            params,
            clock: SolarClock::new(),
        }
    }

    pub fn device(&self) -> &D {
        &self.device
    }
}

fn outputs(count: usize, dim: (usize, usize, usize)) -> Vec<Array3<f32>> {
    (0..count).map(|_| Array3::zeros(dim)).collect()
}

impl<D: Device> ComputeStrategy for GpuStrategy<D> {
    fn advance_temporal_cache(
        &self,
        loader: &mut TemporalLoader,
        cache: &mut LazyRasterCache,
    ) -> Result<(), ModelError> {
        let data = AdvanceData::read(loader, &self.clock)?;
        let dim = data.dim();
        debug!(
            "Advancing the temporal cache on {} over {dim:?}",
            self.device.name()
        );

        // The kernel reads one turbidity per timestep, so every operand
        // shares the leading time axis.
        let months: Vec<usize> = data.times.times.iter().map(|t| t.month as usize).collect();
        let linke = data.linke.select(Axis(0), &months);

        let mut quantities = outputs(advance::OUTPUTS, dim);
        {
            let mut operands: Vec<Operand> = quantities
                .iter_mut()
                .map(|q| Operand::Output(q.view_mut().into_dyn()))
                .collect();
            operands.extend([
                Operand::Input(data.lat.view().into_dyn()),
                Operand::Input(data.lon.view().into_dyn()),
                Operand::Input(data.times.decimal_hour.view().into_dyn()),
                Operand::Input(data.times.gamma.view().into_dyn()),
                Operand::Input(data.dem.view().into_dyn()),
                Operand::Input(linke.view().into_dyn()),
                Operand::Scalar(self.params.sat_lon),
                Operand::Scalar(self.params.solar_constant),
                Operand::Scalar(self.params.scale_height),
            ]);
            debug_assert_eq!(operands.len(), advance::OPERANDS);
            dispatch(
                &self.device,
                kernels::UPDATE_TEMPORAL_CACHE,
                advance::OUTPUTS,
                &mut operands,
            )?;
        }

        store_temporal_cache(cache, quantities)
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
        debug!(
            "Estimating global radiation on {} over {dim:?}",
            self.device.name()
        );

        let mut products = outputs(estimate::OUTPUTS, dim);
        {
            let mut operands: Vec<Operand> = products
                .iter_mut()
                .map(|p| Operand::Output(p.view_mut().into_dyn()))
                .collect();
            operands.extend([
                Operand::Input(views.calibrated.into_dyn()),
                Operand::Input(views.excentricity.into_dyn()),
                Operand::Input(views.solar_elevation.into_dyn()),
                Operand::Input(views.gc.into_dyn()),
                Operand::Input(views.t_sat.into_dyn()),
                Operand::Input(views.t_earth.into_dyn()),
                Operand::Input(views.atmospheric_albedo.into_dyn()),
                Operand::Input(views.cloud_albedo.into_dyn()),
                Operand::Scalar(self.params.i0met),
            ]);
            debug_assert_eq!(operands.len(), estimate::OPERANDS);
            dispatch(
                &self.device,
                kernels::ESTIMATE_GLOBAL_RADIATION,
                estimate::OUTPUTS,
                &mut operands,
            )?;
        }

        let global_radiation = products.swap_remove(estimate::GLOBAL_RADIATION);
        let cloud_index = products.swap_remove(estimate::CLOUD_INDEX);
        store_products(output, cloud_index, global_radiation)
    }
}

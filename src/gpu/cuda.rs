// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! A CUDA device running the kernels of `src_cuda/kernels.cu`.

use std::{
    ffi::{c_char, c_int, CStr},
    panic::Location,
    ptr::null_mut,
};

use cuda_runtime_sys::{
    cudaDeviceSynchronize, cudaError::cudaSuccess, cudaFree, cudaGetErrorString,
    cudaGetLastError, cudaMalloc, cudaMemcpy, cudaMemcpyKind::cudaMemcpyDeviceToHost,
    cudaMemcpyKind::cudaMemcpyHostToDevice,
};

use super::{kernels, Device, GpuCall, GpuError, LaunchConfig};

extern "C" {
    fn get_gpu_device_info(
        device: c_int,
        name: *mut c_char,
        device_major: *mut c_int,
        device_minor: *mut c_int,
        total_global_mem: *mut usize,
        driver_version: *mut c_int,
        runtime_version: *mut c_int,
    ) -> *const c_char;

    fn launch_update_temporalcache(
        d_args: *const *mut f32,
        shapes: *const c_int,
        num_args: c_int,
        grid_x: c_int,
        grid_y: c_int,
        threads: c_int,
    ) -> *const c_char;

    fn launch_estimate_globalradiation(
        d_args: *const *mut f32,
        shapes: *const c_int,
        num_args: c_int,
        grid_x: c_int,
        grid_y: c_int,
        threads: c_int,
    ) -> *const c_char;
}

type Launcher = unsafe extern "C" fn(
    *const *mut f32,
    *const c_int,
    c_int,
    c_int,
    c_int,
    c_int,
) -> *const c_char;

/// Run `cudaGetLastError` (and `cudaDeviceSynchronize`, if the `DEBUG`
/// environment variable is "true"), converting a failure into a
/// [`GpuError::DeviceResource`] blamed on the caller.
///
/// # Safety
///
/// This function interfaces directly with the CUDA API. Rust errors attempt
/// to catch problems but there are no guarantees.
#[track_caller]
unsafe fn check_for_errors(call: GpuCall) -> Result<(), GpuError> {
    // Only do a device sync if we're in debug mode, for performance.
    let debug_mode = matches!(std::env::var("DEBUG").as_deref(), Ok("true"));
    let mut code = if debug_mode {
        cudaDeviceSynchronize()
    } else {
        cudaSuccess
    };
    if code == cudaSuccess {
        code = cudaGetLastError();
    }
    if code == cudaSuccess {
        return Ok(());
    }

    let msg = CStr::from_ptr(cudaGetErrorString(code))
        .to_str()
        .unwrap_or("<cannot read CUDA error string>");
    let location = Location::caller();
    Err(GpuError::DeviceResource {
        call,
        msg: msg.into(),
        file: location.file(),
        line: location.line(),
    })
}

/// A Rust-managed pointer to CUDA device memory. When this is dropped,
/// `cudaFree` is called on the pointer.
#[derive(Debug)]
pub struct DevicePointer {
    ptr: *mut f32,

    /// The number of floats allocated against `ptr`.
    len: usize,
}

impl Drop for DevicePointer {
    fn drop(&mut self) {
        if !self.ptr.is_null() {
            unsafe {
                cudaFree(self.ptr.cast());
            }
        }
    }
}

impl DevicePointer {
    #[track_caller]
    fn malloc(len: usize) -> Result<DevicePointer, GpuError> {
        if len == 0 {
            return Ok(DevicePointer {
                ptr: null_mut(),
                len,
            });
        }
        let mut d_ptr = null_mut();
        unsafe {
            cudaMalloc(&mut d_ptr, len * std::mem::size_of::<f32>());
            check_for_errors(GpuCall::Malloc)?;
        }
        Ok(DevicePointer {
            ptr: d_ptr.cast(),
            len,
        })
    }
}

/// The first CUDA device ("device 0").
pub struct CudaDevice {
    name: String,
}

impl CudaDevice {
    #[track_caller]
    pub fn new() -> Result<CudaDevice, GpuError> {
        let mut name = vec![0 as c_char; 256];
        let mut major = 0;
        let mut minor = 0;
        let mut total_global_mem = 0;
        let mut driver_version = 0;
        let mut runtime_version = 0;
        let error_message_ptr = unsafe {
            get_gpu_device_info(
                0,
                name.as_mut_ptr(),
                &mut major,
                &mut minor,
                &mut total_global_mem,
                &mut driver_version,
                &mut runtime_version,
            )
        };
        if !error_message_ptr.is_null() {
            let msg = unsafe { CStr::from_ptr(error_message_ptr) }
                .to_str()
                .unwrap_or("<cannot read CUDA error string>");
            return Err(GpuError::device(GpuCall::DeviceInfo, msg));
        }

        let name = unsafe { CStr::from_ptr(name.as_ptr()) }
            .to_str()
            .unwrap_or("<unnamed CUDA device>");
        Ok(CudaDevice {
            name: format!(
                "{name} (capability {major}.{minor}, {} MiB), CUDA driver {}.{}, runtime {}.{}",
                total_global_mem / 1048576,
                driver_version / 1000,
                (driver_version / 10) % 100,
                runtime_version / 1000,
                (runtime_version / 10) % 100,
            ),
        })
    }
}

impl Device for CudaDevice {
    type Buffer = DevicePointer;

    fn name(&self) -> String {
        self.name.clone()
    }

    fn has_kernel(&self, kernel: &str) -> bool {
        launcher(kernel).is_some()
    }

    #[track_caller]
    fn alloc(&self, len: usize) -> Result<DevicePointer, GpuError> {
        DevicePointer::malloc(len)
    }

    #[track_caller]
    fn copy_to_device(&self, buffer: &mut DevicePointer, data: &[f32]) -> Result<(), GpuError> {
        if data.len() != buffer.len {
            return Err(GpuError::device(
                GpuCall::CopyToDevice,
                format!(
                    "Device buffer length {} is not equal to the host length {}",
                    buffer.len,
                    data.len()
                ),
            ));
        }
        if data.is_empty() {
            return Ok(());
        }
        unsafe {
            cudaMemcpy(
                buffer.ptr.cast(),
                data.as_ptr().cast(),
                std::mem::size_of_val(data),
                cudaMemcpyHostToDevice,
            );
            check_for_errors(GpuCall::CopyToDevice)
        }
    }

    #[track_caller]
    fn copy_from_device(&self, buffer: &DevicePointer, data: &mut [f32]) -> Result<(), GpuError> {
        if data.len() != buffer.len {
            return Err(GpuError::device(
                GpuCall::CopyFromDevice,
                format!(
                    "Device buffer length {} is not equal to the host length {}",
                    buffer.len,
                    data.len()
                ),
            ));
        }
        if data.is_empty() {
            return Ok(());
        }
        unsafe {
            cudaMemcpy(
                data.as_mut_ptr().cast(),
                buffer.ptr.cast(),
                std::mem::size_of_val(data),
                cudaMemcpyDeviceToHost,
            );
            check_for_errors(GpuCall::CopyFromDevice)
        }
    }

    #[track_caller]
    fn launch(
        &self,
        kernel: &str,
        config: &LaunchConfig,
        buffers: &mut [DevicePointer],
        shapes: &[[usize; 3]],
    ) -> Result<(), GpuError> {
        let launcher = launcher(kernel).ok_or_else(|| GpuError::UnknownKernel {
            name: kernel.to_string(),
            device: self.name(),
        })?;
        let pointers: Vec<*mut f32> = buffers.iter().map(|b| b.ptr).collect();
        let shapes: Vec<c_int> = shapes.iter().flatten().map(|&d| d as c_int).collect();

        let error_message_ptr = unsafe {
            launcher(
                pointers.as_ptr(),
                shapes.as_ptr(),
                pointers.len() as c_int,
                config.grid[0] as c_int,
                config.grid[1] as c_int,
                config.threads as c_int,
            )
        };
        if error_message_ptr.is_null() {
            return Ok(());
        }
        let msg = unsafe { CStr::from_ptr(error_message_ptr) }
            .to_str()
            .unwrap_or("<cannot read CUDA error string>");
        Err(GpuError::device(GpuCall::Launch, format!("{kernel}: {msg}")))
    }
}

fn launcher(kernel: &str) -> Option<Launcher> {
    match kernel {
        kernels::UPDATE_TEMPORAL_CACHE => Some(launch_update_temporalcache as Launcher),
        kernels::ESTIMATE_GLOBAL_RADIATION => Some(launch_estimate_globalradiation as Launcher),
        _ => None,
    }
}

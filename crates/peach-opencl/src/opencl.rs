//! OpenCL implementation of [`ComputeBackend`] via the `opencl3` crate.
//!
//! Only compiled with the `opencl` feature. Every handle is an `opencl3`
//! RAII wrapper, so dropping a session releases the native objects.

use std::ffi::CString;

use opencl3::command_queue::CommandQueue;
use opencl3::context::Context;
use opencl3::device::{Device, CL_DEVICE_TYPE_GPU};
use opencl3::error_codes::ClError;
use opencl3::event::Event;
use opencl3::kernel::{ExecuteKernel, Kernel};
use opencl3::platform::{get_platforms, Platform};
use opencl3::program::Program;
use tracing::debug;

use crate::backend::{ApiResult, ComputeBackend, EventStatus};
use crate::error::ErrorCode;

/// `CL_COMPLETE` execution status.
const CL_COMPLETE: i32 = 0;

fn code(err: ClError) -> ErrorCode {
    ErrorCode(err.0)
}

/// Backend talking to the installed OpenCL ICD loader.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenClBackend;

impl OpenClBackend {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl ComputeBackend for OpenClBackend {
    type Platform = Platform;
    type Device = Device;
    type Context = Context;
    type Queue = CommandQueue;
    type Program = Program;
    type Kernel = Kernel;
    type Event = Event;

    fn name(&self) -> &'static str {
        "opencl"
    }

    fn platforms(&self) -> ApiResult<Vec<Platform>> {
        get_platforms().map_err(code)
    }

    fn platform_name(&self, platform: &Platform) -> ApiResult<String> {
        platform.name().map_err(code)
    }

    fn gpu_devices(&self, platform: &Platform) -> ApiResult<Vec<Device>> {
        let ids = platform.get_devices(CL_DEVICE_TYPE_GPU).map_err(code)?;
        Ok(ids.into_iter().map(Device::new).collect())
    }

    fn device_name(&self, device: &Device) -> ApiResult<String> {
        device.name().map_err(code)
    }

    fn device_vendor(&self, device: &Device) -> ApiResult<String> {
        device.vendor().map_err(code)
    }

    fn device_global_mem(&self, device: &Device) -> ApiResult<u64> {
        device.global_mem_size().map_err(code)
    }

    fn create_context(&self, device: &Device) -> ApiResult<Context> {
        Context::from_device(device).map_err(code)
    }

    fn create_queue(&self, context: &Context, _device: &Device) -> ApiResult<CommandQueue> {
        // clCreateCommandQueue keeps the probe on OpenCL 1.2 ICDs. No
        // properties: in-order, no profiling.
        // SAFETY: `context` is live and holds exactly the probed device.
        #[allow(deprecated, unused_unsafe)]
        unsafe { CommandQueue::create_default(context, 0) }.map_err(code)
    }

    fn create_program(&self, context: &Context, source: &str) -> ApiResult<Program> {
        Program::create_from_source(context, source).map_err(code)
    }

    fn compile_program(
        &self,
        program: &mut Program,
        device: &Device,
        options: &str,
    ) -> ApiResult<()> {
        let options = CString::new(options).map_err(|_| ErrorCode::INVALID_COMPILER_OPTIONS)?;
        debug!("clCompileProgram({options:?})");
        program.compile(&[device.id()], &options, &[], &[]).map_err(code)
    }

    fn build_log(&self, program: &Program, device: &Device) -> ApiResult<String> {
        program.get_build_log(device.id()).map_err(code)
    }

    fn link_program(
        &self,
        context: &Context,
        device: &Device,
        compiled: &Program,
    ) -> ApiResult<Program> {
        let no_options = CString::default();
        // SAFETY: `compiled` is a live program object compiled for `device`
        // in `context`.
        #[allow(unused_unsafe)]
        unsafe { Program::link(context, &[device.id()], &no_options, &[compiled.get()]) }
            .map_err(code)
    }

    fn create_kernel(&self, program: &Program, name: &str) -> ApiResult<Kernel> {
        Kernel::create(program, name).map_err(code)
    }

    fn enqueue_kernel(
        &self,
        queue: &CommandQueue,
        kernel: &Kernel,
        global_work_size: usize,
        local_work_size: usize,
    ) -> ApiResult<Event> {
        // SAFETY: the test kernel takes no arguments and the kernel, queue
        // and their context outlive the returned event's use.
        unsafe {
            ExecuteKernel::new(kernel)
                .set_global_work_size(global_work_size)
                .set_local_work_size(local_work_size)
                .enqueue_nd_range(queue)
        }
        .map_err(code)
    }

    fn event_status(&self, event: &Event) -> ApiResult<EventStatus> {
        let status = event.command_execution_status().map_err(code)?.0;
        Ok(match status {
            CL_COMPLETE => EventStatus::Complete,
            s if s < 0 => EventStatus::Failed(ErrorCode(s)),
            _ => EventStatus::Pending,
        })
    }

    fn finish(&self, queue: &CommandQueue) -> ApiResult<()> {
        queue.finish().map_err(code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{enumerate, DEFAULT_MAX_DEVICES};
    use crate::error::ProbeError;
    use crate::events::Diagnostics;

    /// Runs on any machine: no platform or no GPU are both acceptable.
    #[test]
    fn enumeration_tolerates_missing_hardware() {
        match enumerate(&OpenClBackend::new(), DEFAULT_MAX_DEVICES, &Diagnostics::new()) {
            Ok(inv) => assert!(!inv.is_empty()),
            Err(
                ProbeError::NoDevicesFound
                | ProbeError::PlatformUnavailable { .. }
                | ProbeError::DeviceQueryFailed { .. },
            ) => {}
            Err(other) => panic!("unexpected enumeration error: {other}"),
        }
    }

    /// Queues come from the OpenCL 1.2 entry point, so 1.2-only ICDs work too.
    #[test]
    fn queue_is_created_on_any_present_gpu() {
        let backend = OpenClBackend::new();
        let Ok(inv) = enumerate(&backend, DEFAULT_MAX_DEVICES, &Diagnostics::new()) else {
            return;
        };
        let device = &inv.devices[0].handle;
        let context = backend.create_context(device).unwrap();
        assert!(backend.create_queue(&context, device).is_ok());
    }
}

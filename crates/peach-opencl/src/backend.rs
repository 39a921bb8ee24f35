//! Compute API abstraction.
//!
//! [`ComputeBackend`] is the seam between the probe pipeline and a concrete
//! compute runtime. Every native resource is an associated type so that
//! ownership stays with the caller: dropping a handle releases it. The
//! pipeline never sees raw API types, which lets the same code run against
//! [`crate::opencl::OpenClBackend`] on real hardware and
//! [`crate::simulated::SimulatedBackend`] in tests.
//!
//! All methods return the raw API status on failure. Mapping a status to a
//! [`crate::ProbeError`] variant is the caller's job because only the caller
//! knows which pipeline phase it is in.

use crate::error::ErrorCode;

/// Result of a single backend call.
pub type ApiResult<T> = std::result::Result<T, ErrorCode>;

/// Execution state of a dispatched command, as reported by its event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventStatus {
    /// Still queued, submitted or running.
    Pending,
    /// Finished successfully.
    Complete,
    /// Terminated abnormally with the given status.
    Failed(ErrorCode),
}

/// A compute runtime able to enumerate devices and build and run programs.
pub trait ComputeBackend {
    /// Platform handle.
    type Platform;
    /// Device handle. Cheap to copy; the descriptor and session both hold one.
    type Device: Clone;
    /// Execution context scoped to a single device.
    type Context;
    /// In-order command queue bound to one context.
    type Queue;
    /// Program object, either freshly compiled or linked.
    type Program;
    /// Kernel entry point resolved from a linked program.
    type Kernel;
    /// Completion token returned by a dispatch.
    type Event;

    /// Short name used in logs.
    fn name(&self) -> &'static str;

    // ── Discovery ────────────────────────────────────────────────────────

    /// All platforms visible to the process, in API order.
    fn platforms(&self) -> ApiResult<Vec<Self::Platform>>;

    /// Platform name, for diagnostics only.
    fn platform_name(&self, platform: &Self::Platform) -> ApiResult<String>;

    /// GPU-class devices on `platform`. An empty list is not an error.
    fn gpu_devices(&self, platform: &Self::Platform) -> ApiResult<Vec<Self::Device>>;

    fn device_name(&self, device: &Self::Device) -> ApiResult<String>;

    fn device_vendor(&self, device: &Self::Device) -> ApiResult<String>;

    /// Global memory size in bytes.
    fn device_global_mem(&self, device: &Self::Device) -> ApiResult<u64>;

    // ── Context and queue ────────────────────────────────────────────────

    fn create_context(&self, device: &Self::Device) -> ApiResult<Self::Context>;

    /// Create an in-order queue (no out-of-order or profiling properties).
    fn create_queue(&self, context: &Self::Context, device: &Self::Device)
        -> ApiResult<Self::Queue>;

    // ── Programs ─────────────────────────────────────────────────────────

    fn create_program(&self, context: &Self::Context, source: &str) -> ApiResult<Self::Program>;

    /// Compile `program` for `device` without linking.
    fn compile_program(
        &self,
        program: &mut Self::Program,
        device: &Self::Device,
        options: &str,
    ) -> ApiResult<()>;

    /// Full build log of the last compile of `program` on `device`.
    fn build_log(&self, program: &Self::Program, device: &Self::Device) -> ApiResult<String>;

    /// Link a single compiled unit into an executable program.
    fn link_program(
        &self,
        context: &Self::Context,
        device: &Self::Device,
        compiled: &Self::Program,
    ) -> ApiResult<Self::Program>;

    fn create_kernel(&self, program: &Self::Program, name: &str) -> ApiResult<Self::Kernel>;

    // ── Execution ────────────────────────────────────────────────────────

    /// Enqueue a one-dimensional dispatch and return its completion token.
    fn enqueue_kernel(
        &self,
        queue: &Self::Queue,
        kernel: &Self::Kernel,
        global_work_size: usize,
        local_work_size: usize,
    ) -> ApiResult<Self::Event>;

    /// Non-blocking query of a completion token.
    fn event_status(&self, event: &Self::Event) -> ApiResult<EventStatus>;

    /// Block until every command on `queue` has completed.
    fn finish(&self, queue: &Self::Queue) -> ApiResult<()>;
}

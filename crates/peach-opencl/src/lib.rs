//! Multi-device OpenCL readiness probe for the Peach proof-of-work miner.
//!
//! Before the hashing workload starts, every GPU on the first platform is
//! taken through the same pipeline:
//!
//! - [`device`]: enumerate devices and their name, vendor and memory
//! - [`session`]: create one context and one in-order queue per device
//! - [`program`]: compile and link the kernel source, once per build pass
//! - [`pipeline`]: drive the passes and the per-device loop
//! - [`validation`]: dispatch the `test` kernel and wait for it
//!
//! The compute API sits behind [`ComputeBackend`]. [`SimulatedBackend`]
//! is always available; the real OpenCL backend needs the `opencl` feature.

pub mod backend;
pub mod config;
pub mod device;
pub mod error;
pub mod events;
pub mod kernels;
#[cfg(feature = "opencl")]
pub mod opencl;
pub mod pipeline;
pub mod program;
pub mod report;
pub mod session;
pub mod simulated;
pub mod source;
pub mod validation;

pub use backend::{ApiResult, ComputeBackend, EventStatus};
pub use config::{ConfigError, LogLevel, ProbeConfig};
pub use device::{enumerate, DeviceDescriptor, DeviceInventory, DeviceSummary};
pub use error::{DeviceAttribute, ErrorCode, Phase, ProbeError, Result};
pub use events::{Diagnostics, EventLog, ProbeEvent};
#[cfg(feature = "opencl")]
pub use opencl::OpenClBackend;
pub use pipeline::{BuildPolicy, PipelineState, ProbeHarness, ProbeOptions};
pub use program::{CompilerOptions, LinkedProgram, OptLevel, ProgramBuilder};
pub use report::{DeviceOutcome, DeviceStatus, ProbeReport};
pub use session::{DeviceSession, WorkloadParams};
pub use simulated::{Fault, SimDevice, SimulatedBackend};
pub use source::{FileSourceLoader, KernelSource, SourceLoader, StaticSourceLoader};
pub use validation::{ValidationOptions, Validator};

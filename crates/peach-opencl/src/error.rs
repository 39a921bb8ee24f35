//! Error taxonomy for device probing, kernel builds and dispatch validation.

use std::fmt;
use std::path::PathBuf;

use serde::Serialize;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ProbeError>;

// ── Status codes ─────────────────────────────────────────────────────────────

/// Raw status code returned by the compute API (`cl_int` for OpenCL).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct ErrorCode(pub i32);

impl ErrorCode {
    pub const DEVICE_NOT_FOUND: Self = Self(-1);
    pub const COMPILER_NOT_AVAILABLE: Self = Self(-3);
    pub const OUT_OF_RESOURCES: Self = Self(-5);
    pub const OUT_OF_HOST_MEMORY: Self = Self(-6);
    pub const BUILD_PROGRAM_FAILURE: Self = Self(-11);
    pub const EXEC_STATUS_ERROR_FOR_EVENTS: Self = Self(-14);
    pub const COMPILE_PROGRAM_FAILURE: Self = Self(-15);
    pub const LINKER_NOT_AVAILABLE: Self = Self(-16);
    pub const LINK_PROGRAM_FAILURE: Self = Self(-17);
    pub const INVALID_VALUE: Self = Self(-30);
    pub const INVALID_PLATFORM: Self = Self(-32);
    pub const INVALID_DEVICE: Self = Self(-33);
    pub const INVALID_CONTEXT: Self = Self(-34);
    pub const INVALID_COMMAND_QUEUE: Self = Self(-36);
    pub const INVALID_PROGRAM: Self = Self(-44);
    pub const INVALID_PROGRAM_EXECUTABLE: Self = Self(-45);
    pub const INVALID_KERNEL_NAME: Self = Self(-46);
    pub const INVALID_KERNEL_ARGS: Self = Self(-52);
    pub const INVALID_WORK_GROUP_SIZE: Self = Self(-54);
    pub const INVALID_OPERATION: Self = Self(-59);
    pub const INVALID_COMPILER_OPTIONS: Self = Self(-66);
    pub const INVALID_LINKER_OPTIONS: Self = Self(-67);
    pub const PLATFORM_NOT_FOUND_KHR: Self = Self(-1001);

    /// Symbolic name of the status, when it is one the harness knows about.
    #[must_use]
    pub const fn name(self) -> Option<&'static str> {
        Some(match self.0 {
            0 => "CL_SUCCESS",
            -1 => "CL_DEVICE_NOT_FOUND",
            -2 => "CL_DEVICE_NOT_AVAILABLE",
            -3 => "CL_COMPILER_NOT_AVAILABLE",
            -4 => "CL_MEM_OBJECT_ALLOCATION_FAILURE",
            -5 => "CL_OUT_OF_RESOURCES",
            -6 => "CL_OUT_OF_HOST_MEMORY",
            -11 => "CL_BUILD_PROGRAM_FAILURE",
            -14 => "CL_EXEC_STATUS_ERROR_FOR_EVENTS_IN_WAIT_LIST",
            -15 => "CL_COMPILE_PROGRAM_FAILURE",
            -16 => "CL_LINKER_NOT_AVAILABLE",
            -17 => "CL_LINK_PROGRAM_FAILURE",
            -30 => "CL_INVALID_VALUE",
            -32 => "CL_INVALID_PLATFORM",
            -33 => "CL_INVALID_DEVICE",
            -34 => "CL_INVALID_CONTEXT",
            -36 => "CL_INVALID_COMMAND_QUEUE",
            -44 => "CL_INVALID_PROGRAM",
            -45 => "CL_INVALID_PROGRAM_EXECUTABLE",
            -46 => "CL_INVALID_KERNEL_NAME",
            -52 => "CL_INVALID_KERNEL_ARGS",
            -54 => "CL_INVALID_WORK_GROUP_SIZE",
            -59 => "CL_INVALID_OPERATION",
            -66 => "CL_INVALID_COMPILER_OPTIONS",
            -67 => "CL_INVALID_LINKER_OPTIONS",
            -1001 => "CL_PLATFORM_NOT_FOUND_KHR",
            _ => return None,
        })
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{} ({name})", self.0),
            None => write!(f, "{}", self.0),
        }
    }
}

// ── Phases ───────────────────────────────────────────────────────────────────

/// Step of the per-device pipeline in which a failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Context,
    Queue,
    Compile { pass: usize },
    Link { pass: usize },
    EntryPoint,
    Dispatch,
    Synchronize,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Context => write!(f, "context"),
            Self::Queue => write!(f, "queue"),
            Self::Compile { pass } => write!(f, "compile, pass{pass}"),
            Self::Link { pass } => write!(f, "link, pass{pass}"),
            Self::EntryPoint => write!(f, "entry point"),
            Self::Dispatch => write!(f, "dispatch"),
            Self::Synchronize => write!(f, "synchronize"),
        }
    }
}

// ── ProbeError ───────────────────────────────────────────────────────────────

/// Everything that can go wrong while probing a device set.
///
/// Only [`ProbeError::DeviceInfoUnavailable`] is absorbed by the harness; it
/// is reported as a diagnostic and degrades a descriptor. Every other variant
/// terminates the device's pipeline.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProbeError {
    #[error("clGetPlatformIDs failed. Error: {code}")]
    PlatformUnavailable { code: ErrorCode },

    #[error("No OpenCL devices detected.")]
    NoDevicesFound,

    #[error("clGetDeviceIDs failed. Error: {code}")]
    DeviceQueryFailed { code: ErrorCode },

    #[error("found {found} OpenCL devices but at most {max} are supported")]
    TooManyDevices { found: usize, max: usize },

    #[error("clGetDeviceInfo({attribute}) failed for device {device}. Error: {code}")]
    DeviceInfoUnavailable { device: usize, attribute: DeviceAttribute, code: ErrorCode },

    #[error("Failed to load kernel '{}': {reason}", .path.display())]
    SourceLoadFailed { path: PathBuf, reason: String },

    #[error("clCreateProgramWithSource failed. Error: {code}")]
    SourceRejected { device: usize, pass: usize, code: ErrorCode },

    #[error("clCompileProgram failed. Error: {code}")]
    CompileFailed { device: usize, pass: usize, code: ErrorCode, log: Option<String> },

    #[error("clLinkProgram failed. Error: {code}")]
    LinkFailed { device: usize, pass: usize, code: ErrorCode },

    #[error("clCreateContext failed. Error: {code}")]
    ContextCreationFailed { device: usize, code: ErrorCode },

    #[error("clCreateCommandQueue failed. Error: {code}")]
    QueueCreationFailed { device: usize, code: ErrorCode },

    #[error("entry point '{name}' missing from program. Error: {code}")]
    EntryPointMissing { device: usize, name: String, code: ErrorCode },

    #[error("clCreateKernel('{name}') failed. Error: {code}")]
    KernelResolutionFailed { device: usize, name: String, code: ErrorCode },

    #[error("device {device} has no linked program to validate")]
    NoLinkedProgram { device: usize },

    #[error("clEnqueueNDRangeKernel failed. Error: {code}")]
    DispatchFailed { device: usize, code: ErrorCode },

    #[error("device {device} already has a dispatch in flight")]
    DispatchInFlight { device: usize },

    #[error("clFinish failed. Error: {code}")]
    SynchronizationFailed { device: usize, code: ErrorCode },

    #[error("dispatch on device {device} did not complete within {timeout_ms} ms")]
    SynchronizationTimeout { device: usize, timeout_ms: u64 },

    #[error("configuration error: {0}")]
    Config(String),
}

impl ProbeError {
    /// The compute API status carried by this error, if any.
    #[must_use]
    pub const fn code(&self) -> Option<ErrorCode> {
        match self {
            Self::PlatformUnavailable { code }
            | Self::DeviceQueryFailed { code }
            | Self::DeviceInfoUnavailable { code, .. }
            | Self::SourceRejected { code, .. }
            | Self::CompileFailed { code, .. }
            | Self::LinkFailed { code, .. }
            | Self::ContextCreationFailed { code, .. }
            | Self::QueueCreationFailed { code, .. }
            | Self::EntryPointMissing { code, .. }
            | Self::KernelResolutionFailed { code, .. }
            | Self::DispatchFailed { code, .. }
            | Self::SynchronizationFailed { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Pipeline phase this error belongs to, for device-scoped failures.
    #[must_use]
    pub const fn phase(&self) -> Option<Phase> {
        match self {
            Self::ContextCreationFailed { .. } => Some(Phase::Context),
            Self::QueueCreationFailed { .. } => Some(Phase::Queue),
            Self::SourceRejected { pass, .. } => Some(Phase::Compile { pass: *pass }),
            Self::CompileFailed { pass, .. } => Some(Phase::Compile { pass: *pass }),
            Self::LinkFailed { pass, .. } => Some(Phase::Link { pass: *pass }),
            Self::EntryPointMissing { .. }
            | Self::KernelResolutionFailed { .. }
            | Self::NoLinkedProgram { .. } => Some(Phase::EntryPoint),
            Self::DispatchFailed { .. } | Self::DispatchInFlight { .. } => Some(Phase::Dispatch),
            Self::SynchronizationFailed { .. } | Self::SynchronizationTimeout { .. } => {
                Some(Phase::Synchronize)
            }
            _ => None,
        }
    }

    /// `true` for errors the harness absorbs instead of aborting.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(self, Self::DeviceInfoUnavailable { .. })
    }

    /// Build log attached to a compile failure.
    #[must_use]
    pub fn build_log(&self) -> Option<&str> {
        match self {
            Self::CompileFailed { log, .. } => log.as_deref(),
            _ => None,
        }
    }
}

// ── Device attributes ────────────────────────────────────────────────────────

/// Descriptive attribute queried per device during enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceAttribute {
    Name,
    Vendor,
    GlobalMemSize,
}

impl fmt::Display for DeviceAttribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Name => write!(f, "CL_DEVICE_NAME"),
            Self::Vendor => write!(f, "CL_DEVICE_VENDOR"),
            Self::GlobalMemSize => write!(f, "CL_DEVICE_GLOBAL_MEM_SIZE"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_codes_have_names() {
        assert_eq!(ErrorCode::COMPILE_PROGRAM_FAILURE.name(), Some("CL_COMPILE_PROGRAM_FAILURE"));
        assert_eq!(ErrorCode(-9999).name(), None);
    }

    #[test]
    fn code_display_includes_symbol() {
        assert_eq!(ErrorCode(-17).to_string(), "-17 (CL_LINK_PROGRAM_FAILURE)");
        assert_eq!(ErrorCode(-4242).to_string(), "-4242");
    }

    #[test]
    fn fatal_messages_carry_the_code() {
        let err = ProbeError::LinkFailed { device: 0, pass: 1, code: ErrorCode(-17) };
        let msg = err.to_string();
        assert!(msg.starts_with("clLinkProgram failed"));
        assert!(msg.contains("-17"));
    }

    #[test]
    fn phases_follow_the_variant() {
        let compile = ProbeError::CompileFailed {
            device: 0,
            pass: 1,
            code: ErrorCode::COMPILE_PROGRAM_FAILURE,
            log: Some("error: expected ';'".into()),
        };
        assert_eq!(compile.phase(), Some(Phase::Compile { pass: 1 }));
        assert_eq!(compile.build_log(), Some("error: expected ';'"));
        assert_eq!(ProbeError::NoDevicesFound.phase(), None);
        assert_eq!(
            ProbeError::SynchronizationTimeout { device: 0, timeout_ms: 5 }.phase(),
            Some(Phase::Synchronize)
        );
    }

    #[test]
    fn only_attribute_failures_are_recoverable() {
        let attr = ProbeError::DeviceInfoUnavailable {
            device: 2,
            attribute: DeviceAttribute::Vendor,
            code: ErrorCode::INVALID_VALUE,
        };
        assert!(attr.is_recoverable());
        assert!(!ProbeError::NoDevicesFound.is_recoverable());
    }

    #[test]
    fn phase_display_names_the_pass() {
        assert_eq!(Phase::Compile { pass: 1 }.to_string(), "compile, pass1");
        assert_eq!(Phase::Link { pass: 0 }.to_string(), "link, pass0");
    }
}

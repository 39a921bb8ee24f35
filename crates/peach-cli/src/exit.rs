//! Process exit codes for precise CI triage.

use peach_opencl::{ConfigError, ProbeError};

pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_GENERIC_FAIL: i32 = 1;
pub const EXIT_CONFIG: i32 = 2;
pub const EXIT_NO_DEVICES: i32 = 3;
pub const EXIT_SOURCE: i32 = 4;
pub const EXIT_BUILD: i32 = 5;
pub const EXIT_CONTEXT: i32 = 6;
pub const EXIT_DISPATCH: i32 = 7;

/// Exit code for a probe failure.
pub fn for_probe_error(err: &ProbeError) -> i32 {
    match err {
        ProbeError::Config(_) => EXIT_CONFIG,
        ProbeError::PlatformUnavailable { .. }
        | ProbeError::NoDevicesFound
        | ProbeError::DeviceQueryFailed { .. }
        | ProbeError::TooManyDevices { .. }
        | ProbeError::DeviceInfoUnavailable { .. } => EXIT_NO_DEVICES,
        ProbeError::SourceLoadFailed { .. } => EXIT_SOURCE,
        ProbeError::SourceRejected { .. }
        | ProbeError::CompileFailed { .. }
        | ProbeError::LinkFailed { .. } => EXIT_BUILD,
        ProbeError::ContextCreationFailed { .. } | ProbeError::QueueCreationFailed { .. } => {
            EXIT_CONTEXT
        }
        ProbeError::EntryPointMissing { .. }
        | ProbeError::KernelResolutionFailed { .. }
        | ProbeError::NoLinkedProgram { .. }
        | ProbeError::DispatchFailed { .. }
        | ProbeError::DispatchInFlight { .. }
        | ProbeError::SynchronizationFailed { .. }
        | ProbeError::SynchronizationTimeout { .. } => EXIT_DISPATCH,
    }
}

/// Exit code for an error that escaped `run`.
pub fn for_error(err: &anyhow::Error) -> i32 {
    if let Some(probe) = err.downcast_ref::<ProbeError>() {
        for_probe_error(probe)
    } else if err.downcast_ref::<ConfigError>().is_some() {
        EXIT_CONFIG
    } else {
        EXIT_GENERIC_FAIL
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;
    use peach_opencl::ErrorCode;

    #[test]
    fn build_failures_share_one_code() {
        let link = ProbeError::LinkFailed { device: 0, pass: 0, code: ErrorCode::LINK_PROGRAM_FAILURE };
        let compile = ProbeError::CompileFailed {
            device: 0,
            pass: 1,
            code: ErrorCode::COMPILE_PROGRAM_FAILURE,
            log: None,
        };
        assert_eq!(for_probe_error(&link), EXIT_BUILD);
        assert_eq!(for_probe_error(&compile), EXIT_BUILD);
    }

    #[test]
    fn enumeration_failures_share_the_device_code() {
        let platform = ProbeError::PlatformUnavailable { code: ErrorCode::PLATFORM_NOT_FOUND_KHR };
        let query = ProbeError::DeviceQueryFailed { code: ErrorCode::INVALID_PLATFORM };
        assert_eq!(for_probe_error(&platform), EXIT_NO_DEVICES);
        assert_eq!(for_probe_error(&query), EXIT_NO_DEVICES);
    }

    #[test]
    fn timeouts_are_dispatch_failures() {
        let err = ProbeError::SynchronizationTimeout { device: 0, timeout_ms: 10 };
        assert_eq!(for_probe_error(&err), EXIT_DISPATCH);
    }

    #[test]
    fn context_survives_anyhow_wrapping() {
        let err: anyhow::Result<()> = Err(ProbeError::NoDevicesFound).context("probe failed");
        assert_eq!(for_error(&err.unwrap_err()), EXIT_NO_DEVICES);

        let cfg: anyhow::Result<()> =
            Err(ConfigError::Validation("max_devices must be >= 1".into())).context("config");
        assert_eq!(for_error(&cfg.unwrap_err()), EXIT_CONFIG);

        assert_eq!(for_error(&anyhow::anyhow!("boom")), EXIT_GENERIC_FAIL);
    }
}

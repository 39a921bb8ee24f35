//! Per-device outcomes and the aggregate probe report.

use serde::Serialize;

use crate::device::DeviceSummary;
use crate::error::{ErrorCode, Phase, ProbeError};

/// Terminal state of one device.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DeviceStatus {
    Validated,
    Failed {
        phase: Option<Phase>,
        message: String,
        code: Option<ErrorCode>,
        #[serde(skip_serializing_if = "Option::is_none")]
        build_log: Option<String>,
        #[serde(skip)]
        error: Box<ProbeError>,
    },
    /// Never attempted because an earlier device failed in strict mode.
    Skipped,
}

impl DeviceStatus {
    #[must_use]
    pub fn failed(error: ProbeError) -> Self {
        Self::Failed {
            phase: error.phase(),
            message: error.to_string(),
            code: error.code(),
            build_log: error.build_log().map(str::to_string),
            error: Box::new(error),
        }
    }

    #[must_use]
    pub const fn is_validated(&self) -> bool {
        matches!(self, Self::Validated)
    }

    #[must_use]
    pub const fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }

    #[must_use]
    pub const fn is_skipped(&self) -> bool {
        matches!(self, Self::Skipped)
    }

    /// The error behind a failure.
    #[must_use]
    pub fn error(&self) -> Option<&ProbeError> {
        match self {
            Self::Failed { error, .. } => Some(error.as_ref()),
            _ => None,
        }
    }
}

/// What happened to one device.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceOutcome {
    pub device: DeviceSummary,
    #[serde(flatten)]
    pub status: DeviceStatus,
    /// Option string of the last program linked for this device.
    pub final_options: Option<String>,
}

/// Result of a full probe run.
#[derive(Debug, Clone, Serialize)]
pub struct ProbeReport {
    pub backend: &'static str,
    pub platform_name: String,
    pub platform_count: usize,
    pub outcomes: Vec<DeviceOutcome>,
}

impl ProbeReport {
    /// `true` when every device validated.
    #[must_use]
    pub fn is_success(&self) -> bool {
        !self.outcomes.is_empty() && self.outcomes.iter().all(|o| o.status.is_validated())
    }

    #[must_use]
    pub fn validated(&self) -> usize {
        self.outcomes.iter().filter(|o| o.status.is_validated()).count()
    }

    #[must_use]
    pub fn failed(&self) -> usize {
        self.outcomes.iter().filter(|o| o.status.is_failed()).count()
    }

    #[must_use]
    pub fn skipped(&self) -> usize {
        self.outcomes.iter().filter(|o| o.status.is_skipped()).count()
    }

    /// Outcome of the first device that failed, in enumeration order.
    #[must_use]
    pub fn first_failure(&self) -> Option<&DeviceOutcome> {
        self.outcomes.iter().find(|o| o.status.is_failed())
    }

    /// Error of the first failed device.
    #[must_use]
    pub fn first_error(&self) -> Option<&ProbeError> {
        self.first_failure().and_then(|o| o.status.error())
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(index: usize) -> DeviceSummary {
        DeviceSummary {
            index,
            name: format!("gpu{index}"),
            vendor: "Sim".into(),
            global_mem_bytes: 1 << 30,
            missing: Vec::new(),
        }
    }

    fn report(statuses: Vec<DeviceStatus>) -> ProbeReport {
        ProbeReport {
            backend: "simulated",
            platform_name: "Sim".into(),
            platform_count: 1,
            outcomes: statuses
                .into_iter()
                .enumerate()
                .map(|(i, status)| DeviceOutcome { device: summary(i), status, final_options: None })
                .collect(),
        }
    }

    #[test]
    fn counts_and_first_failure() {
        let link = ProbeError::LinkFailed { device: 1, pass: 0, code: ErrorCode::LINK_PROGRAM_FAILURE };
        let r = report(vec![
            DeviceStatus::Validated,
            DeviceStatus::failed(link),
            DeviceStatus::Skipped,
        ]);
        assert!(!r.is_success());
        assert_eq!((r.validated(), r.failed(), r.skipped()), (1, 1, 1));
        assert_eq!(r.first_failure().map(|o| o.device.index), Some(1));
        assert!(matches!(r.first_error(), Some(ProbeError::LinkFailed { pass: 0, .. })));
    }

    #[test]
    fn empty_report_is_not_success() {
        assert!(!report(vec![]).is_success());
        assert!(report(vec![DeviceStatus::Validated]).is_success());
    }

    #[test]
    fn json_carries_phase_and_code() {
        let err = ProbeError::CompileFailed {
            device: 0,
            pass: 1,
            code: ErrorCode::COMPILE_PROGRAM_FAILURE,
            log: Some("error: expected ';'".into()),
        };
        let json = report(vec![DeviceStatus::failed(err)]).to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        let outcome = &value["outcomes"][0];
        assert_eq!(outcome["status"], "failed");
        assert_eq!(outcome["code"], -15);
        assert_eq!(outcome["phase"]["compile"]["pass"], 1);
        assert_eq!(outcome["build_log"], "error: expected ';'");
        assert_eq!(outcome["device"]["name"], "gpu0");
    }
}

//! Build pipeline orchestration.
//!
//! The orchestrator runs every enumerated device, in order, through the same
//! strictly forward state machine:
//!
//! ```text
//! Uninitialized -> ContextReady -> Linked{0} -> Linked{1} -> Validated
//!                        \              \            \           \
//!                         +--------------+------------+-----------+--> Failed(phase)
//! ```
//!
//! Pass 0 is a diagnostic gate at the lowest optimization level; pass 1
//! rebuilds the same source optimized and replaces the session program.
//! Only the last pass's program is validated.

use std::fmt;
use std::path::PathBuf;

use tracing::{debug, info, info_span};

use crate::backend::ComputeBackend;
use crate::device::{enumerate, DeviceDescriptor, DeviceInventory, DEFAULT_MAX_DEVICES};
use crate::error::{Phase, ProbeError, Result};
use crate::events::{Diagnostics, ProbeEvent};
use crate::program::{BuildRequest, CompilerOptions, OptLevel, ProgramBuilder};
use crate::report::{DeviceOutcome, DeviceStatus, ProbeReport};
use crate::session::{DeviceSession, WorkloadParams};
use crate::source::{KernelSource, SourceLoader, DEFAULT_KERNEL_PATH};
use crate::validation::{ValidationOptions, Validator};

// ── State ────────────────────────────────────────────────────────────────────

/// Where a device session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Uninitialized,
    ContextReady,
    Linked { pass: usize },
    Validated,
    Failed(Phase),
}

impl PipelineState {
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Validated | Self::Failed(_))
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uninitialized => write!(f, "uninitialized"),
            Self::ContextReady => write!(f, "context ready"),
            Self::Linked { pass } => write!(f, "linked (pass{pass})"),
            Self::Validated => write!(f, "validated"),
            Self::Failed(phase) => write!(f, "failed ({phase})"),
        }
    }
}

// ── Policy ───────────────────────────────────────────────────────────────────

/// Optimization levels and flags applied by the build passes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildPolicy {
    /// One entry per pass, in order. Never empty.
    pub passes: Vec<OptLevel>,
    pub correctly_rounded_div_sqrt: bool,
    pub extra_options: Vec<String>,
}

impl Default for BuildPolicy {
    fn default() -> Self {
        Self {
            passes: vec![OptLevel(0), OptLevel(1)],
            correctly_rounded_div_sqrt: true,
            extra_options: Vec::new(),
        }
    }
}

impl BuildPolicy {
    /// Compiler options for one pass.
    #[must_use]
    pub fn options_for(&self, level: OptLevel) -> CompilerOptions {
        CompilerOptions {
            level,
            correctly_rounded_div_sqrt: self.correctly_rounded_div_sqrt,
            extra: self.extra_options.clone(),
        }
    }
}

/// Everything a probe run needs besides the backend and loader.
#[derive(Debug, Clone)]
pub struct ProbeOptions {
    pub kernel_path: PathBuf,
    pub max_devices: usize,
    pub policy: BuildPolicy,
    pub validation: ValidationOptions,
    pub workload: WorkloadParams,
    /// Continue with the next device after a failure instead of stopping.
    pub keep_going: bool,
}

impl Default for ProbeOptions {
    fn default() -> Self {
        Self {
            kernel_path: PathBuf::from(DEFAULT_KERNEL_PATH),
            max_devices: DEFAULT_MAX_DEVICES,
            policy: BuildPolicy::default(),
            validation: ValidationOptions::default(),
            workload: WorkloadParams::default(),
            keep_going: false,
        }
    }
}

// ── Orchestrator ─────────────────────────────────────────────────────────────

/// Drives enumeration, the build passes and validation for every device.
pub struct ProbeHarness<'a, B: ComputeBackend, L: SourceLoader> {
    backend: &'a B,
    loader: &'a L,
    diag: &'a Diagnostics,
    options: ProbeOptions,
}

impl<'a, B: ComputeBackend, L: SourceLoader> ProbeHarness<'a, B, L> {
    #[must_use]
    pub const fn new(
        backend: &'a B,
        loader: &'a L,
        diag: &'a Diagnostics,
        options: ProbeOptions,
    ) -> Self {
        Self { backend, loader, diag, options }
    }

    #[must_use]
    pub const fn options(&self) -> &ProbeOptions {
        &self.options
    }

    /// Enumerate devices without building anything.
    pub fn list(&self) -> Result<DeviceInventory<B::Device>> {
        enumerate(self.backend, self.options.max_devices, self.diag)
    }

    /// Run the full probe.
    ///
    /// Returns `Err` only when no device can be attempted at all: no
    /// platform, no devices, too many devices or unloadable source.
    /// Device failures are recorded in the report.
    pub fn run(&self) -> Result<ProbeReport> {
        if self.options.policy.passes.is_empty() {
            return Err(ProbeError::Config("at least one build pass is required".into()));
        }

        let inventory = self.list()?;

        let source = self.loader.load(&self.options.kernel_path).map_err(|err| {
            self.diag.emit(ProbeEvent::Fatal { device: None, message: err.to_string() });
            err
        })?;
        info!("Loaded {} bytes of kernel source from {}", source.len(), source.origin.display());

        let mut outcomes = Vec::with_capacity(inventory.len());
        let mut halted = false;
        for descriptor in &inventory.devices {
            if halted {
                self.diag.emit(ProbeEvent::DeviceSkipped { device: descriptor.index });
                outcomes.push(DeviceOutcome {
                    device: descriptor.summary(),
                    status: DeviceStatus::Skipped,
                    final_options: None,
                });
                continue;
            }

            let outcome = self.probe_device(descriptor, &source);
            if outcome.status.is_failed() && !self.options.keep_going {
                halted = true;
            }
            outcomes.push(outcome);
        }

        let report = ProbeReport {
            backend: self.backend.name(),
            platform_name: inventory.platform_name,
            platform_count: inventory.platform_count,
            outcomes,
        };
        self.diag.emit(ProbeEvent::Summary {
            validated: report.validated(),
            failed: report.failed(),
            skipped: report.skipped(),
        });
        Ok(report)
    }

    /// Take one device from nothing to a terminal state.
    pub fn probe_device(
        &self,
        descriptor: &DeviceDescriptor<B::Device>,
        source: &KernelSource,
    ) -> DeviceOutcome {
        let _span = info_span!("device", index = descriptor.index).entered();
        let mut final_options = None;
        let mut state = PipelineState::Uninitialized;

        let result = DeviceSession::create(self.backend, descriptor, self.options.workload)
            .and_then(|mut session| {
                self.diag.emit(ProbeEvent::SessionReady { device: descriptor.index });
                let result = self.build_and_validate(&mut session, descriptor, source);
                final_options = session.program().map(|p| p.options.clone());
                if let Err(err) = &result {
                    if let Some(phase) = err.phase() {
                        session.set_state(PipelineState::Failed(phase));
                    }
                }
                state = session.state();
                result
            });

        let status = match result {
            Ok(()) => DeviceStatus::Validated,
            Err(err) => {
                // Context or queue creation failed before a session existed.
                if let (PipelineState::Uninitialized, Some(phase)) = (state, err.phase()) {
                    state = PipelineState::Failed(phase);
                }
                self.diag.emit(ProbeEvent::Fatal {
                    device: Some(descriptor.index),
                    message: err.to_string(),
                });
                DeviceStatus::failed(err)
            }
        };
        debug!(device = descriptor.index, %state, "device released");
        DeviceOutcome { device: descriptor.summary(), status, final_options }
    }

    fn build_and_validate(
        &self,
        session: &mut DeviceSession<B>,
        descriptor: &DeviceDescriptor<B::Device>,
        source: &KernelSource,
    ) -> Result<()> {
        run_passes(self.backend, self.diag, session, descriptor, source, &self.options.policy)?;
        Validator::new(self.backend, self.diag, &self.options.validation).validate(session)
    }
}

/// Run every build pass of `policy` on `session`, replacing its program
/// after each success. Stops at the first failing pass.
pub fn run_passes<B: ComputeBackend>(
    backend: &B,
    diag: &Diagnostics,
    session: &mut DeviceSession<B>,
    descriptor: &DeviceDescriptor<B::Device>,
    source: &KernelSource,
    policy: &BuildPolicy,
) -> Result<()> {
    let builder = ProgramBuilder::new(backend, diag);
    for (pass, &level) in policy.passes.iter().enumerate() {
        let request = BuildRequest {
            device: &descriptor.handle,
            device_index: descriptor.index,
            pass,
            source: &source.text,
            options: policy.options_for(level),
        };
        let linked = builder.build(session.context(), &request)?;
        session.install_program(linked);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventLog;
    use crate::simulated::SimulatedBackend;
    use crate::source::StaticSourceLoader;

    #[test]
    fn default_policy_has_two_passes() {
        let policy = BuildPolicy::default();
        assert_eq!(policy.passes, vec![OptLevel(0), OptLevel(1)]);
        assert_eq!(
            policy.options_for(OptLevel(1)).render(),
            "-cl-fp32-correctly-rounded-divide-sqrt -O1"
        );
    }

    #[test]
    fn states_render_for_logs() {
        assert_eq!(PipelineState::Linked { pass: 1 }.to_string(), "linked (pass1)");
        assert_eq!(
            PipelineState::Failed(Phase::Link { pass: 0 }).to_string(),
            "failed (link, pass0)"
        );
        assert!(PipelineState::Validated.is_terminal());
        assert!(!PipelineState::ContextReady.is_terminal());
        assert!(!PipelineState::Uninitialized.is_terminal());
        assert_eq!(PipelineState::Uninitialized.to_string(), "uninitialized");
    }

    #[test]
    fn empty_pass_list_is_rejected() {
        let backend = SimulatedBackend::healthy(1);
        let loader = StaticSourceLoader::new("__kernel void test() {}");
        let diag = Diagnostics::new();
        let mut options = ProbeOptions::default();
        options.policy.passes.clear();

        let err = ProbeHarness::new(&backend, &loader, &diag, options).run().unwrap_err();
        assert!(matches!(err, ProbeError::Config(_)));
        assert_eq!(backend.stats().contexts, 0);
    }

    #[test]
    fn single_pass_policy_builds_once() {
        let backend = SimulatedBackend::healthy(1);
        let loader = StaticSourceLoader::new("__kernel void test() {}");
        let log = EventLog::new();
        let diag = log.diagnostics();
        let mut options = ProbeOptions::default();
        options.policy.passes = vec![OptLevel(2)];

        let report = ProbeHarness::new(&backend, &loader, &diag, options).run().unwrap();
        assert!(report.is_success());
        assert_eq!(backend.stats().links, 1);
        assert!(log.contains_line("Build with level 2 successful"));
        assert_eq!(
            report.outcomes[0].final_options.as_deref(),
            Some("-cl-fp32-correctly-rounded-divide-sqrt -O2")
        );
    }
}

//! Compile-then-link program builds.
//!
//! A build is two API calls: compile the source into an unlinked program,
//! then link that single unit into an executable. Only a compile failure
//! fetches the build log; a failed link leaves no program object to query.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::backend::ComputeBackend;
use crate::error::{ErrorCode, ProbeError, Result};
use crate::events::{Diagnostics, ProbeEvent};

/// Flag forcing IEEE-correct single-precision division and square root.
pub const CORRECTLY_ROUNDED_DIV_SQRT: &str = "-cl-fp32-correctly-rounded-divide-sqrt";

// ── Compiler options ─────────────────────────────────────────────────────────

/// Optimization level handed to the device compiler as `-O<n>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OptLevel(pub u8);

impl OptLevel {
    /// Compiler flag for this level.
    #[must_use]
    pub fn flag(self) -> String {
        format!("-O{}", self.0)
    }
}

impl fmt::Display for OptLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "level {}", self.0)
    }
}

/// Options string passed to the compile step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompilerOptions {
    pub level: OptLevel,
    pub correctly_rounded_div_sqrt: bool,
    /// Additional flags appended verbatim.
    pub extra: Vec<String>,
}

impl CompilerOptions {
    /// Options for `level` with the floating-point correctness flag set.
    #[must_use]
    pub fn new(level: OptLevel) -> Self {
        Self { level, correctly_rounded_div_sqrt: true, extra: Vec::new() }
    }

    /// Render the space-separated option string.
    #[must_use]
    pub fn render(&self) -> String {
        let mut parts: Vec<String> = Vec::with_capacity(2 + self.extra.len());
        if self.correctly_rounded_div_sqrt {
            parts.push(CORRECTLY_ROUNDED_DIV_SQRT.to_string());
        }
        parts.push(self.level.flag());
        parts.extend(self.extra.iter().filter(|s| !s.trim().is_empty()).cloned());
        parts.join(" ")
    }
}

impl fmt::Display for CompilerOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

// ── Requests and results ─────────────────────────────────────────────────────

/// One build pass for one device. Consumed by [`ProgramBuilder::build`].
#[derive(Debug)]
pub struct BuildRequest<'a, D> {
    pub device: &'a D,
    pub device_index: usize,
    pub pass: usize,
    pub source: &'a str,
    pub options: CompilerOptions,
}

/// An executable program produced by a build pass.
#[derive(Debug)]
pub struct LinkedProgram<P> {
    pub program: P,
    /// Pass that produced it.
    pub pass: usize,
    pub level: OptLevel,
    /// Exact option string used for the compile step.
    pub options: String,
}

// ── Builder ──────────────────────────────────────────────────────────────────

/// Compiles and links kernel source for a single device.
pub struct ProgramBuilder<'a, B: ComputeBackend> {
    backend: &'a B,
    diag: &'a Diagnostics,
}

impl<'a, B: ComputeBackend> ProgramBuilder<'a, B> {
    #[must_use]
    pub const fn new(backend: &'a B, diag: &'a Diagnostics) -> Self {
        Self { backend, diag }
    }

    /// Compile and link `request.source` in `context`.
    ///
    /// The compiled intermediate is dropped before returning, whatever the
    /// outcome.
    pub fn build(
        &self,
        context: &B::Context,
        request: &BuildRequest<'_, B::Device>,
    ) -> Result<LinkedProgram<B::Program>> {
        let BuildRequest { device, device_index, pass, source, ref options } = *request;
        let level = options.level;
        let options = options.render();

        self.diag.emit(ProbeEvent::BuildStarted { device: device_index, pass, level });
        debug!(device = device_index, pass, %options, "compiling {} bytes of source", source.len());

        let mut compiled = self
            .backend
            .create_program(context, source)
            .map_err(|code| ProbeError::SourceRejected { device: device_index, pass, code })?;

        if let Err(code) = self.backend.compile_program(&mut compiled, device, &options) {
            let log = if code == ErrorCode::COMPILE_PROGRAM_FAILURE {
                self.fetch_log(&compiled, device, device_index, pass)
            } else {
                None
            };
            return Err(ProbeError::CompileFailed { device: device_index, pass, code, log });
        }

        let program = self
            .backend
            .link_program(context, device, &compiled)
            .map_err(|code| ProbeError::LinkFailed { device: device_index, pass, code })?;
        drop(compiled);

        self.diag.emit(ProbeEvent::BuildSucceeded { device: device_index, pass, level });
        Ok(LinkedProgram { program, pass, level, options })
    }

    fn fetch_log(
        &self,
        compiled: &B::Program,
        device: &B::Device,
        device_index: usize,
        pass: usize,
    ) -> Option<String> {
        match self.backend.build_log(compiled, device) {
            Ok(log) => {
                let log = log.trim_end_matches('\0').to_string();
                self.diag.emit(ProbeEvent::BuildLog { device: device_index, pass, log: log.clone() });
                Some(log)
            }
            Err(code) => {
                debug!(device = device_index, "build log unavailable: {code}");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventLog;
    use crate::simulated::{Fault, SimDevice, SimulatedBackend};

    const SOURCE: &str = "__kernel void test() {}";

    fn backend() -> SimulatedBackend {
        SimulatedBackend::with_devices(vec![SimDevice::named("gpu0", "Sim")])
    }

    fn request(device: &usize, pass: usize, level: u8) -> BuildRequest<'_, usize> {
        BuildRequest {
            device,
            device_index: 0,
            pass,
            source: SOURCE,
            options: CompilerOptions::new(OptLevel(level)),
        }
    }

    #[test]
    fn options_render_in_fixed_order() {
        let mut opts = CompilerOptions::new(OptLevel(1));
        assert_eq!(opts.render(), "-cl-fp32-correctly-rounded-divide-sqrt -O1");
        opts.extra = vec!["-DPEACH=1".into(), " ".into()];
        assert_eq!(opts.render(), "-cl-fp32-correctly-rounded-divide-sqrt -O1 -DPEACH=1");
        opts.correctly_rounded_div_sqrt = false;
        assert_eq!(opts.to_string(), "-O1 -DPEACH=1");
    }

    #[test]
    fn successful_build_brackets_with_progress_lines() {
        let backend = backend();
        let log = EventLog::new();
        let diag = log.diagnostics();
        let ctx = backend.create_context(&0).unwrap();

        let linked = ProgramBuilder::new(&backend, &diag).build(&ctx, &request(&0, 0, 0)).unwrap();
        assert_eq!(linked.pass, 0);
        assert_eq!(linked.options, "-cl-fp32-correctly-rounded-divide-sqrt -O0");
        assert!(linked.program.linked);
        assert_eq!(log.lines(), vec!["Building with level 0", "Build with level 0 successful"]);
    }

    #[test]
    fn compile_failure_surfaces_the_log() {
        let backend = backend();
        backend.inject(None, Fault::compile_error(1, "<kernel>:1:1: error: unknown type name 'ulong8x'"));
        let log = EventLog::new();
        let diag = log.diagnostics();
        let ctx = backend.create_context(&0).unwrap();

        let err =
            ProgramBuilder::new(&backend, &diag).build(&ctx, &request(&0, 1, 1)).unwrap_err();
        assert!(matches!(err, ProbeError::CompileFailed { pass: 1, .. }));
        assert_eq!(err.build_log(), Some("<kernel>:1:1: error: unknown type name 'ulong8x'"));
        assert!(log.contains_line("<kernel>:1:1: error: unknown type name 'ulong8x'"));
        assert_eq!(backend.stats().links, 0);
        assert_eq!(backend.stats().live_programs, 0);
    }

    #[test]
    fn other_compile_errors_skip_log_retrieval() {
        let backend = backend();
        backend.inject(
            None,
            Fault::Compile { level: None, code: ErrorCode::INVALID_COMPILER_OPTIONS, log: None },
        );
        let diag = Diagnostics::new();
        let ctx = backend.create_context(&0).unwrap();

        let err =
            ProgramBuilder::new(&backend, &diag).build(&ctx, &request(&0, 0, 0)).unwrap_err();
        assert!(err.build_log().is_none());
        assert_eq!(err.code(), Some(ErrorCode::INVALID_COMPILER_OPTIONS));
        assert_eq!(backend.stats().log_queries, 0);
    }

    #[test]
    fn rejected_source_fails_before_compiling() {
        let backend = backend();
        backend.inject(None, Fault::CreateProgram(ErrorCode::OUT_OF_HOST_MEMORY));
        let diag = Diagnostics::new();
        let ctx = backend.create_context(&0).unwrap();

        let err =
            ProgramBuilder::new(&backend, &diag).build(&ctx, &request(&0, 0, 0)).unwrap_err();
        assert!(matches!(
            err,
            ProbeError::SourceRejected { pass: 0, code: ErrorCode::OUT_OF_HOST_MEMORY, .. }
        ));
        assert_eq!(backend.stats().compiles, 0);
        assert_eq!(backend.stats().live_programs, 0);
    }

    #[test]
    fn link_failure_reports_code_only() {
        let backend = backend();
        backend.inject(None, Fault::Link { level: None, code: ErrorCode::LINK_PROGRAM_FAILURE });
        let log = EventLog::new();
        let diag = log.diagnostics();
        let ctx = backend.create_context(&0).unwrap();

        let err =
            ProgramBuilder::new(&backend, &diag).build(&ctx, &request(&0, 0, 0)).unwrap_err();
        assert!(matches!(err, ProbeError::LinkFailed { pass: 0, .. }));
        assert!(!log.contains_line("Build with level 0 successful"));
        assert_eq!(backend.stats().log_queries, 0);
    }
}

//! Minimal-kernel dispatch validation.
//!
//! Validation proves a device can run code end to end: resolve the test
//! entry point from the session's final program, enqueue a single work item
//! and wait for the queue to drain.

use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::backend::{ComputeBackend, EventStatus};
use crate::error::{ErrorCode, ProbeError, Result};
use crate::events::{Diagnostics, ProbeEvent};
use crate::pipeline::PipelineState;
use crate::session::DeviceSession;

/// Entry point every test kernel source must define.
pub const DEFAULT_ENTRY_POINT: &str = "test";

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// How the test dispatch is shaped and awaited.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationOptions {
    pub entry_point: String,
    pub global_work_size: usize,
    pub local_work_size: usize,
    /// Upper bound on the wait for the dispatch. `None` waits on the queue
    /// barrier alone.
    pub deadline: Option<Duration>,
    /// Sleep between event status polls while a deadline is set.
    pub poll_interval: Duration,
}

impl Default for ValidationOptions {
    fn default() -> Self {
        Self {
            entry_point: DEFAULT_ENTRY_POINT.to_string(),
            global_work_size: 1,
            local_work_size: 1,
            deadline: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

impl ValidationOptions {
    #[must_use]
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

/// Runs the test dispatch on a built session.
pub struct Validator<'a, B: ComputeBackend> {
    backend: &'a B,
    diag: &'a Diagnostics,
    options: &'a ValidationOptions,
}

impl<'a, B: ComputeBackend> Validator<'a, B> {
    #[must_use]
    pub const fn new(backend: &'a B, diag: &'a Diagnostics, options: &'a ValidationOptions) -> Self {
        Self { backend, diag, options }
    }

    /// Resolve, dispatch and await the test kernel on `session`.
    ///
    /// On success the session is `Validated`. A failed enqueue stops
    /// immediately; nothing is awaited.
    pub fn validate(&self, session: &mut DeviceSession<B>) -> Result<()> {
        let device = session.index();
        let name = self.options.entry_point.as_str();

        if session.has_pending_dispatch() {
            return Err(ProbeError::DispatchInFlight { device });
        }

        let program = session.program().ok_or(ProbeError::NoLinkedProgram { device })?;
        debug!(device, pass = program.pass, entry = name, "resolving entry point");
        let kernel = self.backend.create_kernel(&program.program, name).map_err(|code| {
            if code == ErrorCode::INVALID_KERNEL_NAME {
                ProbeError::EntryPointMissing { device, name: name.to_string(), code }
            } else {
                ProbeError::KernelResolutionFailed { device, name: name.to_string(), code }
            }
        })?;

        self.diag.emit(ProbeEvent::TestStarted { device });
        let event = self
            .backend
            .enqueue_kernel(
                session.queue(),
                &kernel,
                self.options.global_work_size,
                self.options.local_work_size,
            )
            .map_err(|code| ProbeError::DispatchFailed { device, code })?;
        session.set_entry_point(kernel);
        session.track_dispatch(event)?;

        if let Some(deadline) = self.options.deadline {
            self.await_event(session, deadline)?;
        }

        self.backend
            .finish(session.queue())
            .map_err(|code| ProbeError::SynchronizationFailed { device, code })?;
        session.clear_dispatch();
        session.set_state(PipelineState::Validated);

        self.diag.emit(ProbeEvent::TestComplete { device });
        Ok(())
    }

    /// Poll the pending token until it completes or `deadline` elapses.
    fn await_event(&self, session: &DeviceSession<B>, deadline: Duration) -> Result<()> {
        let device = session.index();
        let Some(event) = session.pending_dispatch() else {
            return Ok(());
        };
        let started = Instant::now();
        loop {
            match self.backend.event_status(event) {
                Ok(EventStatus::Complete) => return Ok(()),
                Ok(EventStatus::Failed(code)) | Err(code) => {
                    return Err(ProbeError::SynchronizationFailed { device, code });
                }
                Ok(EventStatus::Pending) => {}
            }
            if started.elapsed() >= deadline {
                let timeout_ms = u64::try_from(deadline.as_millis()).unwrap_or(u64::MAX);
                warn!(device, timeout_ms, "dispatch still pending at deadline");
                return Err(ProbeError::SynchronizationTimeout { device, timeout_ms });
            }
            thread::sleep(self.options.poll_interval);
        }
    }
}

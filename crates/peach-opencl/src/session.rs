//! Per-device execution state.
//!
//! A [`DeviceSession`] owns everything the probe creates for one device: its
//! context, its in-order queue, the current linked program, the resolved
//! test entry point and at most one pending dispatch. Fields are declared in
//! reverse creation order so that dropping a session releases the event,
//! kernel, program, queue and context in that order.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::backend::ComputeBackend;
use crate::device::DeviceDescriptor;
use crate::error::{ProbeError, Result};
use crate::pipeline::PipelineState;
use crate::program::LinkedProgram;

/// Default target difficulty handed to the hashing workload.
pub const DEFAULT_DIFFICULTY: u8 = 18;

/// Default block number handed to the hashing workload.
pub const DEFAULT_BLOCK_NUMBER: u64 = 1;

/// Opaque workload parameters carried on every session.
///
/// The probe never interprets these; they are stored so the follow-up
/// hashing workload can pick them up from a validated session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkloadParams {
    pub difficulty: u8,
    /// Block number in little-endian byte order.
    pub block_number: [u8; 8],
}

impl WorkloadParams {
    #[must_use]
    pub const fn new(difficulty: u8, block_number: u64) -> Self {
        Self { difficulty, block_number: block_number.to_le_bytes() }
    }

    #[must_use]
    pub const fn block_number(&self) -> u64 {
        u64::from_le_bytes(self.block_number)
    }
}

impl Default for WorkloadParams {
    fn default() -> Self {
        Self::new(DEFAULT_DIFFICULTY, DEFAULT_BLOCK_NUMBER)
    }
}

/// Resources and state for one enumerated device.
pub struct DeviceSession<B: ComputeBackend> {
    pending: Option<B::Event>,
    entry: Option<B::Kernel>,
    program: Option<LinkedProgram<B::Program>>,
    queue: B::Queue,
    context: B::Context,
    device: B::Device,
    index: usize,
    workload: WorkloadParams,
    state: PipelineState,
}

impl<B: ComputeBackend> DeviceSession<B> {
    /// Create the context and queue for `descriptor`.
    ///
    /// Both are created exactly once; a session is never re-pointed at a
    /// different context.
    pub fn create(
        backend: &B,
        descriptor: &DeviceDescriptor<B::Device>,
        workload: WorkloadParams,
    ) -> Result<Self> {
        let index = descriptor.index;
        let device = descriptor.handle.clone();

        let context = backend
            .create_context(&device)
            .map_err(|code| ProbeError::ContextCreationFailed { device: index, code })?;
        let queue = backend
            .create_queue(&context, &device)
            .map_err(|code| ProbeError::QueueCreationFailed { device: index, code })?;
        debug!(device = index, "context and in-order queue created");

        Ok(Self {
            pending: None,
            entry: None,
            program: None,
            queue,
            context,
            device,
            index,
            workload,
            state: PipelineState::ContextReady,
        })
    }

    #[must_use]
    pub const fn index(&self) -> usize {
        self.index
    }

    #[must_use]
    pub const fn device(&self) -> &B::Device {
        &self.device
    }

    #[must_use]
    pub const fn context(&self) -> &B::Context {
        &self.context
    }

    #[must_use]
    pub const fn queue(&self) -> &B::Queue {
        &self.queue
    }

    /// The program produced by the most recent successful pass.
    #[must_use]
    pub const fn program(&self) -> Option<&LinkedProgram<B::Program>> {
        self.program.as_ref()
    }

    /// The resolved test entry point, if validation got that far.
    #[must_use]
    pub const fn entry_point(&self) -> Option<&B::Kernel> {
        self.entry.as_ref()
    }

    #[must_use]
    pub const fn workload(&self) -> &WorkloadParams {
        &self.workload
    }

    #[must_use]
    pub const fn state(&self) -> PipelineState {
        self.state
    }

    #[must_use]
    pub const fn has_pending_dispatch(&self) -> bool {
        self.pending.is_some()
    }

    /// Replace the current program wholesale.
    ///
    /// Any entry point resolved from the previous program is released
    /// first, then the previous program itself.
    pub fn install_program(&mut self, program: LinkedProgram<B::Program>) {
        self.entry = None;
        let pass = program.pass;
        self.program = Some(program);
        self.state = PipelineState::Linked { pass };
    }

    pub(crate) fn set_entry_point(&mut self, kernel: B::Kernel) {
        self.entry = Some(kernel);
    }

    /// Record the completion token of a dispatch.
    pub(crate) fn track_dispatch(&mut self, event: B::Event) -> Result<()> {
        if self.pending.is_some() {
            return Err(ProbeError::DispatchInFlight { device: self.index });
        }
        self.pending = Some(event);
        Ok(())
    }

    pub(crate) const fn pending_dispatch(&self) -> Option<&B::Event> {
        self.pending.as_ref()
    }

    pub(crate) fn clear_dispatch(&mut self) {
        self.pending = None;
    }

    pub(crate) fn set_state(&mut self, state: PipelineState) {
        debug!(device = self.index, from = %self.state, to = %state, "pipeline transition");
        self.state = state;
    }
}

impl<B: ComputeBackend> fmt::Debug for DeviceSession<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceSession")
            .field("index", &self.index)
            .field("state", &self.state)
            .field("program_pass", &self.program.as_ref().map(|p| p.pass))
            .field("entry_point", &self.entry.is_some())
            .field("pending_dispatch", &self.pending.is_some())
            .field("workload", &self.workload)
            .finish_non_exhaustive()
    }
}

//! In-memory compute backend with scriptable faults.
//!
//! [`SimulatedBackend`] behaves like a well-formed OpenCL runtime with a
//! fixed device list. Failures are injected per device (or for every device)
//! with [`SimulatedBackend::inject`], and every API call is counted so tests
//! can assert on resource lifecycles without real GPU hardware.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::backend::{ApiResult, ComputeBackend, EventStatus};
use crate::error::ErrorCode;

// ── Devices ──────────────────────────────────────────────────────────────────

/// A simulated GPU.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimDevice {
    pub name: String,
    pub vendor: String,
    pub global_mem_bytes: u64,
    pub fail_name: Option<ErrorCode>,
    pub fail_vendor: Option<ErrorCode>,
    pub fail_mem: Option<ErrorCode>,
}

impl SimDevice {
    /// A healthy 4 GiB device.
    #[must_use]
    pub fn named(name: &str, vendor: &str) -> Self {
        Self {
            name: name.to_string(),
            vendor: vendor.to_string(),
            global_mem_bytes: 4 * 1024 * 1024 * 1024,
            fail_name: None,
            fail_vendor: None,
            fail_mem: None,
        }
    }
}

// ── Faults ───────────────────────────────────────────────────────────────────

/// A failure to inject into one API call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    /// Fail `clGetPlatformIDs`. Applies regardless of the target device.
    Platforms(ErrorCode),
    /// Fail `clGetDeviceIDs`. Applies regardless of the target device.
    DeviceQuery(ErrorCode),
    Context(ErrorCode),
    Queue(ErrorCode),
    CreateProgram(ErrorCode),
    /// Fail compiles at `level` (every level when `None`). `log` becomes the
    /// program's build log.
    Compile { level: Option<u8>, code: ErrorCode, log: Option<String> },
    /// Fail links of programs compiled at `level` (every level when `None`).
    Link { level: Option<u8>, code: ErrorCode },
    /// Fail `clCreateKernel`; use `INVALID_KERNEL_NAME` for a missing entry point.
    Kernel(ErrorCode),
    Enqueue(ErrorCode),
    /// The dispatch terminates abnormally with this status.
    Execution(ErrorCode),
    /// The dispatch never completes.
    Hang,
    Finish(ErrorCode),
}

impl Fault {
    /// A compile failure at `level` with the given build log.
    #[must_use]
    pub fn compile_error(level: u8, log: &str) -> Self {
        Self::Compile {
            level: Some(level),
            code: ErrorCode::COMPILE_PROGRAM_FAILURE,
            log: Some(log.to_string()),
        }
    }
}

// ── Handles ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimPlatform {
    pub name: String,
}

#[derive(Debug)]
pub struct SimContext {
    pub id: usize,
    pub device: usize,
}

#[derive(Debug)]
pub struct SimQueue {
    pub id: usize,
    pub context: usize,
    pub device: usize,
}

/// A program object; `linked` distinguishes executables from compiled units.
#[derive(Debug)]
pub struct SimProgram {
    pub id: usize,
    pub device: usize,
    pub source: String,
    pub level: Option<u8>,
    pub options: String,
    pub linked: bool,
    log: String,
    live: Arc<AtomicUsize>,
}

impl Drop for SimProgram {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Debug)]
pub struct SimKernel {
    pub name: String,
    pub program: usize,
    pub device: usize,
}

#[derive(Debug)]
pub struct SimEvent {
    pub device: usize,
    outcome: EventStatus,
}

// ── Stats ────────────────────────────────────────────────────────────────────

/// API call counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SimStats {
    pub contexts: usize,
    pub queues: usize,
    pub programs: usize,
    pub compiles: usize,
    pub links: usize,
    pub log_queries: usize,
    pub kernels: usize,
    pub dispatches: usize,
    pub finishes: usize,
    /// Program objects not yet dropped.
    pub live_programs: usize,
    /// Option strings passed to each compile, in call order.
    pub compile_options: Vec<String>,
}

#[derive(Debug, Default)]
struct State {
    faults: Vec<(Option<usize>, Fault)>,
    stats: SimStats,
    next_id: usize,
}

impl State {
    fn id(&mut self) -> usize {
        self.next_id += 1;
        self.next_id
    }

    fn find<T>(&self, device: usize, pick: impl Fn(&Fault) -> Option<T>) -> Option<T> {
        self.faults
            .iter()
            .filter(|(target, _)| target.map_or(true, |d| d == device))
            .find_map(|(_, fault)| pick(fault))
    }

    fn find_any<T>(&self, pick: impl Fn(&Fault) -> Option<T>) -> Option<T> {
        self.faults.iter().find_map(|(_, fault)| pick(fault))
    }
}

// ── Backend ──────────────────────────────────────────────────────────────────

/// Scriptable stand-in for an OpenCL runtime.
#[derive(Debug)]
pub struct SimulatedBackend {
    platform: Option<SimPlatform>,
    devices: Vec<SimDevice>,
    state: Mutex<State>,
    live_programs: Arc<AtomicUsize>,
}

impl SimulatedBackend {
    /// One platform exposing `devices`.
    #[must_use]
    pub fn with_devices(devices: Vec<SimDevice>) -> Self {
        Self {
            platform: Some(SimPlatform { name: "Simulated OpenCL Platform".to_string() }),
            devices,
            state: Mutex::new(State::default()),
            live_programs: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// `count` healthy devices named `Simulated GPU <i>`.
    #[must_use]
    pub fn healthy(count: usize) -> Self {
        Self::with_devices(
            (0..count).map(|i| SimDevice::named(&format!("Simulated GPU {i}"), "Peach")).collect(),
        )
    }

    /// A runtime with no platform installed.
    #[must_use]
    pub fn without_platform() -> Self {
        Self { platform: None, ..Self::with_devices(Vec::new()) }
    }

    /// Inject `fault` for `device`, or for every device when `None`.
    /// Earlier injections take precedence.
    pub fn inject(&self, device: Option<usize>, fault: Fault) {
        self.lock().faults.push((device, fault));
    }

    /// Snapshot of the call counters.
    #[must_use]
    pub fn stats(&self) -> SimStats {
        let mut stats = self.lock().stats.clone();
        stats.live_programs = self.live_programs.load(Ordering::SeqCst);
        stats
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        // A poisoned lock only means a test assertion panicked mid-call.
        self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn device(&self, index: usize) -> ApiResult<&SimDevice> {
        self.devices.get(index).ok_or(ErrorCode::INVALID_DEVICE)
    }

    fn new_program(&self, state: &mut State, device: usize, source: String) -> SimProgram {
        self.live_programs.fetch_add(1, Ordering::SeqCst);
        SimProgram {
            id: state.id(),
            device,
            source,
            level: None,
            options: String::new(),
            linked: false,
            log: String::new(),
            live: Arc::clone(&self.live_programs),
        }
    }
}

/// Extract `n` from the last `-O<n>` token of an option string.
fn parse_level(options: &str) -> Option<u8> {
    options.split_whitespace().rev().find_map(|tok| tok.strip_prefix("-O")?.parse().ok())
}

impl ComputeBackend for SimulatedBackend {
    type Platform = SimPlatform;
    type Device = usize;
    type Context = SimContext;
    type Queue = SimQueue;
    type Program = SimProgram;
    type Kernel = SimKernel;
    type Event = SimEvent;

    fn name(&self) -> &'static str {
        "simulated"
    }

    fn platforms(&self) -> ApiResult<Vec<SimPlatform>> {
        if let Some(code) =
            self.lock().find_any(|f| if let Fault::Platforms(c) = f { Some(*c) } else { None })
        {
            return Err(code);
        }
        Ok(self.platform.iter().cloned().collect())
    }

    fn platform_name(&self, platform: &SimPlatform) -> ApiResult<String> {
        Ok(platform.name.clone())
    }

    fn gpu_devices(&self, _platform: &SimPlatform) -> ApiResult<Vec<usize>> {
        if let Some(code) =
            self.lock().find_any(|f| if let Fault::DeviceQuery(c) = f { Some(*c) } else { None })
        {
            return Err(code);
        }
        Ok((0..self.devices.len()).collect())
    }

    fn device_name(&self, device: &usize) -> ApiResult<String> {
        let d = self.device(*device)?;
        d.fail_name.map_or_else(|| Ok(d.name.clone()), Err)
    }

    fn device_vendor(&self, device: &usize) -> ApiResult<String> {
        let d = self.device(*device)?;
        d.fail_vendor.map_or_else(|| Ok(d.vendor.clone()), Err)
    }

    fn device_global_mem(&self, device: &usize) -> ApiResult<u64> {
        let d = self.device(*device)?;
        d.fail_mem.map_or(Ok(d.global_mem_bytes), Err)
    }

    fn create_context(&self, device: &usize) -> ApiResult<SimContext> {
        self.device(*device)?;
        let mut state = self.lock();
        if let Some(code) =
            state.find(*device, |f| if let Fault::Context(c) = f { Some(*c) } else { None })
        {
            return Err(code);
        }
        state.stats.contexts += 1;
        Ok(SimContext { id: state.id(), device: *device })
    }

    fn create_queue(&self, context: &SimContext, device: &usize) -> ApiResult<SimQueue> {
        if context.device != *device {
            return Err(ErrorCode::INVALID_DEVICE);
        }
        let mut state = self.lock();
        if let Some(code) =
            state.find(*device, |f| if let Fault::Queue(c) = f { Some(*c) } else { None })
        {
            return Err(code);
        }
        state.stats.queues += 1;
        Ok(SimQueue { id: state.id(), context: context.id, device: *device })
    }

    fn create_program(&self, context: &SimContext, source: &str) -> ApiResult<SimProgram> {
        let mut state = self.lock();
        if let Some(code) = state
            .find(context.device, |f| if let Fault::CreateProgram(c) = f { Some(*c) } else { None })
        {
            return Err(code);
        }
        if source.is_empty() {
            return Err(ErrorCode::INVALID_VALUE);
        }
        state.stats.programs += 1;
        Ok(self.new_program(&mut state, context.device, source.to_string()))
    }

    fn compile_program(
        &self,
        program: &mut SimProgram,
        device: &usize,
        options: &str,
    ) -> ApiResult<()> {
        if program.device != *device {
            return Err(ErrorCode::INVALID_DEVICE);
        }
        let level = parse_level(options);
        let mut state = self.lock();
        state.stats.compiles += 1;
        state.stats.compile_options.push(options.to_string());
        program.level = level;
        program.options = options.to_string();

        let fault = state.find(*device, |f| match f {
            Fault::Compile { level: l, code, log } if l.is_none() || *l == level => {
                Some((*code, log.clone()))
            }
            _ => None,
        });
        if let Some((code, log)) = fault {
            program.log = log.unwrap_or_default();
            return Err(code);
        }
        Ok(())
    }

    fn build_log(&self, program: &SimProgram, _device: &usize) -> ApiResult<String> {
        self.lock().stats.log_queries += 1;
        Ok(program.log.clone())
    }

    fn link_program(
        &self,
        context: &SimContext,
        device: &usize,
        compiled: &SimProgram,
    ) -> ApiResult<SimProgram> {
        if compiled.linked || compiled.device != *device || context.device != *device {
            return Err(ErrorCode::INVALID_OPERATION);
        }
        let mut state = self.lock();
        state.stats.links += 1;
        let fault = state.find(*device, |f| match f {
            Fault::Link { level, code } if level.is_none() || *level == compiled.level => {
                Some(*code)
            }
            _ => None,
        });
        if let Some(code) = fault {
            return Err(code);
        }
        let mut linked = self.new_program(&mut state, *device, compiled.source.clone());
        linked.level = compiled.level;
        linked.options = compiled.options.clone();
        linked.linked = true;
        Ok(linked)
    }

    fn create_kernel(&self, program: &SimProgram, name: &str) -> ApiResult<SimKernel> {
        if !program.linked {
            return Err(ErrorCode::INVALID_PROGRAM_EXECUTABLE);
        }
        let mut state = self.lock();
        if let Some(code) =
            state.find(program.device, |f| if let Fault::Kernel(c) = f { Some(*c) } else { None })
        {
            return Err(code);
        }
        if !program.source.contains(&format!("void {name}(")) {
            return Err(ErrorCode::INVALID_KERNEL_NAME);
        }
        state.stats.kernels += 1;
        Ok(SimKernel { name: name.to_string(), program: program.id, device: program.device })
    }

    fn enqueue_kernel(
        &self,
        queue: &SimQueue,
        kernel: &SimKernel,
        global_work_size: usize,
        local_work_size: usize,
    ) -> ApiResult<SimEvent> {
        if queue.device != kernel.device {
            return Err(ErrorCode::INVALID_CONTEXT);
        }
        if local_work_size == 0 || global_work_size % local_work_size != 0 {
            return Err(ErrorCode::INVALID_WORK_GROUP_SIZE);
        }
        let mut state = self.lock();
        if let Some(code) =
            state.find(queue.device, |f| if let Fault::Enqueue(c) = f { Some(*c) } else { None })
        {
            return Err(code);
        }
        state.stats.dispatches += 1;
        let outcome = state
            .find(queue.device, |f| match f {
                Fault::Hang => Some(EventStatus::Pending),
                Fault::Execution(c) => Some(EventStatus::Failed(*c)),
                _ => None,
            })
            .unwrap_or(EventStatus::Complete);
        Ok(SimEvent { device: queue.device, outcome })
    }

    fn event_status(&self, event: &SimEvent) -> ApiResult<EventStatus> {
        Ok(event.outcome)
    }

    fn finish(&self, queue: &SimQueue) -> ApiResult<()> {
        let mut state = self.lock();
        state.stats.finishes += 1;
        let fault = state.find(queue.device, |f| match f {
            Fault::Finish(c) | Fault::Execution(c) => Some(*c),
            _ => None,
        });
        fault.map_or(Ok(()), Err)
    }
}

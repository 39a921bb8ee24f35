//! Diagnostic line protocol.
//!
//! Every observable step of a probe run is a [`ProbeEvent`]. Its `Display`
//! form is the human-readable line an operator sees; it is not a stable
//! machine format (use [`crate::ProbeReport`] for that). [`Diagnostics`]
//! forwards each event to `tracing` and to an optional caller callback.

use std::fmt;
use std::sync::{Arc, Mutex};

use tracing::{debug, error, info, warn};

use crate::error::{DeviceAttribute, ErrorCode};
use crate::program::OptLevel;

/// One diagnostic line emitted during a probe run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeEvent {
    NoPlatforms,
    PlatformSummary { platform: String, platforms: usize, devices: usize },
    DeviceListed { index: usize, vendor: String, name: String, memory_mb: u64 },
    AttributeUnavailable { device: usize, attribute: DeviceAttribute, code: ErrorCode },
    NoDevices,
    SessionReady { device: usize },
    BuildStarted { device: usize, pass: usize, level: OptLevel },
    BuildLog { device: usize, pass: usize, log: String },
    BuildSucceeded { device: usize, pass: usize, level: OptLevel },
    TestStarted { device: usize },
    TestComplete { device: usize },
    DeviceSkipped { device: usize },
    Fatal { device: Option<usize>, message: String },
    Summary { validated: usize, failed: usize, skipped: usize },
}

impl fmt::Display for ProbeEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoPlatforms => write!(f, "No OpenCL platforms detected."),
            Self::PlatformSummary { platforms, devices, .. } => {
                write!(f, "OpenCL: Found {platforms} platforms and {devices} devices")
            }
            Self::DeviceListed { index, vendor, name, memory_mb } => {
                write!(f, "Device {index}: {vendor} {name} {memory_mb} MB")
            }
            Self::AttributeUnavailable { device, attribute, code } => {
                write!(f, "clGetDeviceInfo({attribute}) failed for device {device}. Error: {code}")
            }
            Self::NoDevices => write!(f, "No OpenCL devices detected."),
            Self::SessionReady { device } => write!(f, "Device {device}: context and queue ready"),
            Self::BuildStarted { level, .. } => write!(f, "Building with {level}"),
            Self::BuildLog { log, .. } => write!(f, "{log}"),
            Self::BuildSucceeded { level, .. } => write!(f, "Build with {level} successful"),
            Self::TestStarted { .. } => write!(f, "Running test"),
            Self::TestComplete { .. } => write!(f, "Test complete"),
            Self::DeviceSkipped { device } => {
                write!(f, "Device {device}: skipped after an earlier failure")
            }
            Self::Fatal { device: Some(device), message } => {
                write!(f, "Device {device}: {message}")
            }
            Self::Fatal { device: None, message } => write!(f, "{message}"),
            Self::Summary { validated, failed, skipped } => {
                write!(f, "Probe finished: {validated} validated, {failed} failed, {skipped} skipped")
            }
        }
    }
}

/// Caller hook receiving every event in emission order.
pub type EventCallback = Box<dyn Fn(&ProbeEvent) + Send>;

/// Event fan-out shared by every pipeline component.
#[derive(Default)]
pub struct Diagnostics {
    callback: Option<EventCallback>,
}

impl Diagnostics {
    /// Diagnostics that only log through `tracing`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Diagnostics that also forward every event to `callback`.
    #[must_use]
    pub fn with_callback<F>(callback: F) -> Self
    where
        F: Fn(&ProbeEvent) + Send + 'static,
    {
        Self { callback: Some(Box::new(callback)) }
    }

    /// Record `event`.
    ///
    /// With a callback installed the callback owns presentation, so the
    /// `tracing` copy drops to `debug` and the operator sees each line once.
    pub fn emit(&self, event: ProbeEvent) {
        match &self.callback {
            Some(cb) => {
                debug!("{event}");
                cb(&event);
            }
            None => log_event(&event),
        }
    }
}

fn log_event(event: &ProbeEvent) {
    match event {
        ProbeEvent::Fatal { .. } | ProbeEvent::NoDevices | ProbeEvent::NoPlatforms => {
            error!("{event}");
        }
        ProbeEvent::AttributeUnavailable { .. } | ProbeEvent::DeviceSkipped { .. } => {
            warn!("{event}");
        }
        ProbeEvent::BuildLog { device, pass, log } => {
            error!(device, pass, "build log:\n{log}");
        }
        ProbeEvent::SessionReady { .. } => debug!("{event}"),
        _ => info!("{event}"),
    }
}

impl fmt::Debug for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Diagnostics").field("callback", &self.callback.is_some()).finish()
    }
}

/// Thread-safe recorder of emitted events, mainly for tests and reports.
#[derive(Debug, Clone, Default)]
pub struct EventLog {
    events: Arc<Mutex<Vec<ProbeEvent>>>,
}

impl EventLog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Diagnostics that append into this log.
    #[must_use]
    pub fn diagnostics(&self) -> Diagnostics {
        let events = Arc::clone(&self.events);
        Diagnostics::with_callback(move |event| {
            if let Ok(mut guard) = events.lock() {
                guard.push(event.clone());
            }
        })
    }

    /// Snapshot of the recorded events.
    #[must_use]
    pub fn events(&self) -> Vec<ProbeEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// Recorded events rendered as diagnostic lines.
    #[must_use]
    pub fn lines(&self) -> Vec<String> {
        self.events().iter().map(ToString::to_string).collect()
    }

    /// `true` if any recorded line equals `line`.
    #[must_use]
    pub fn contains_line(&self, line: &str) -> bool {
        self.lines().iter().any(|l| l == line)
    }
}

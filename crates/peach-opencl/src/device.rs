//! Device enumeration on the first compute platform.

use serde::Serialize;
use tracing::debug;

use crate::backend::ComputeBackend;
use crate::error::{DeviceAttribute, ErrorCode, ProbeError, Result};
use crate::events::{Diagnostics, ProbeEvent};

/// Default ceiling on the number of devices a single probe accepts.
pub const DEFAULT_MAX_DEVICES: usize = 64;

/// One accelerator found during enumeration.
///
/// The descriptor's `index` is canonical: session `i` always belongs to
/// descriptor `i`.
#[derive(Debug, Clone)]
pub struct DeviceDescriptor<D> {
    /// Position in platform enumeration order.
    pub index: usize,
    /// Backend device handle.
    pub handle: D,
    /// Device name, blank if it could not be queried.
    pub name: String,
    /// Vendor string, blank if it could not be queried.
    pub vendor: String,
    /// Total global memory in bytes, zero if it could not be queried.
    pub global_mem_bytes: u64,
    /// Attributes whose query failed.
    pub missing: Vec<DeviceAttribute>,
}

impl<D> DeviceDescriptor<D> {
    /// Global memory in MiB, as printed in the device listing.
    #[must_use]
    pub const fn memory_mb(&self) -> u64 {
        self.global_mem_bytes / 1024 / 1024
    }

    /// `true` when every attribute was retrieved.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.missing.is_empty()
    }

    /// Handle-free copy for reports.
    #[must_use]
    pub fn summary(&self) -> DeviceSummary {
        DeviceSummary {
            index: self.index,
            name: self.name.clone(),
            vendor: self.vendor.clone(),
            global_mem_bytes: self.global_mem_bytes,
            missing: self.missing.clone(),
        }
    }
}

/// Serializable view of a [`DeviceDescriptor`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceSummary {
    pub index: usize,
    pub name: String,
    pub vendor: String,
    pub global_mem_bytes: u64,
    pub missing: Vec<DeviceAttribute>,
}

/// Result of a successful enumeration.
#[derive(Debug, Clone)]
pub struct DeviceInventory<D> {
    /// Name of the platform the devices belong to.
    pub platform_name: String,
    /// Number of platforms the runtime reported.
    pub platform_count: usize,
    /// Devices in canonical order. Never empty.
    pub devices: Vec<DeviceDescriptor<D>>,
}

impl<D> DeviceInventory<D> {
    #[must_use]
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

/// Enumerate GPU devices on the first platform.
///
/// Fails with [`ProbeError::PlatformUnavailable`] when no platform can be
/// obtained, [`ProbeError::NoDevicesFound`] when the
/// platform reports no GPU, and [`ProbeError::TooManyDevices`] when more than
/// `max_devices` are present. Attribute query failures only degrade the
/// affected descriptor.
pub fn enumerate<B: ComputeBackend>(
    backend: &B,
    max_devices: usize,
    diag: &Diagnostics,
) -> Result<DeviceInventory<B::Device>> {
    let platforms = match backend.platforms() {
        Ok(p) => p,
        // ICD loaders report an empty installation through this status.
        Err(ErrorCode::PLATFORM_NOT_FOUND_KHR) => Vec::new(),
        Err(code) => return Err(fail(diag, ProbeError::PlatformUnavailable { code })),
    };
    let Some(platform) = platforms.first() else {
        diag.emit(ProbeEvent::NoPlatforms);
        return Err(ProbeError::PlatformUnavailable { code: ErrorCode::PLATFORM_NOT_FOUND_KHR });
    };

    let platform_name = backend.platform_name(platform).unwrap_or_default();
    debug!("Scanning {} platform: {}", backend.name(), platform_name);

    let handles = match backend.gpu_devices(platform) {
        Ok(h) => h,
        Err(ErrorCode::DEVICE_NOT_FOUND) => Vec::new(),
        Err(code) => return Err(fail(diag, ProbeError::DeviceQueryFailed { code })),
    };
    if handles.is_empty() {
        diag.emit(ProbeEvent::NoDevices);
        return Err(ProbeError::NoDevicesFound);
    }
    if handles.len() > max_devices {
        return Err(fail(diag, ProbeError::TooManyDevices { found: handles.len(), max: max_devices }));
    }

    diag.emit(ProbeEvent::PlatformSummary {
        platform: platform_name.clone(),
        platforms: platforms.len(),
        devices: handles.len(),
    });

    let devices = handles
        .into_iter()
        .enumerate()
        .map(|(index, handle)| describe(backend, index, handle, diag))
        .collect();

    Ok(DeviceInventory { platform_name, platform_count: platforms.len(), devices })
}

fn describe<B: ComputeBackend>(
    backend: &B,
    index: usize,
    handle: B::Device,
    diag: &Diagnostics,
) -> DeviceDescriptor<B::Device> {
    let mut missing = Vec::new();
    let mut note = |attribute: DeviceAttribute, code: ErrorCode| {
        missing.push(attribute);
        diag.emit(ProbeEvent::AttributeUnavailable { device: index, attribute, code });
    };

    let name = backend.device_name(&handle).unwrap_or_else(|code| {
        note(DeviceAttribute::Name, code);
        String::new()
    });
    let vendor = backend.device_vendor(&handle).unwrap_or_else(|code| {
        note(DeviceAttribute::Vendor, code);
        String::new()
    });
    let global_mem_bytes = backend.device_global_mem(&handle).unwrap_or_else(|code| {
        note(DeviceAttribute::GlobalMemSize, code);
        0
    });

    let descriptor = DeviceDescriptor {
        index,
        handle,
        name: clean(name),
        vendor: clean(vendor),
        global_mem_bytes,
        missing,
    };
    diag.emit(ProbeEvent::DeviceListed {
        index,
        vendor: descriptor.vendor.clone(),
        name: descriptor.name.clone(),
        memory_mb: descriptor.memory_mb(),
    });
    descriptor
}

/// Info strings come back NUL-terminated from some drivers.
fn clean(s: String) -> String {
    s.trim_end_matches('\0').trim().to_string()
}

fn fail(diag: &Diagnostics, err: ProbeError) -> ProbeError {
    diag.emit(ProbeEvent::Fatal { device: None, message: err.to_string() });
    err
}

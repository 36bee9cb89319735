// SPDX-License-Identifier: GPL-3.0-only

//! Process-wide render device.
//!
//! The device is created once, on first use, and shared by every pipeline
//! instance. A hardware adapter is tried first, then the software fallback
//! adapter. A failed creation is cached too: it is logged once and every
//! later caller gets the same error without a retry.

use super::wgpu;
use crate::backends::camera::DeviceId;
use crate::errors::GpuError;
use std::sync::{Arc, OnceLock};
use tracing::{debug, error, info, warn};

static SHARED_DEVICE: OnceLock<Result<Arc<GpuDevice>, String>> = OnceLock::new();

/// Information about the created GPU device
#[derive(Debug, Clone)]
pub struct GpuDeviceInfo {
    /// Name of the GPU adapter
    pub adapter_name: String,
    /// Backend being used (Vulkan, Metal, DX12, etc.)
    pub backend: wgpu::Backend,
    /// Whether the software fallback adapter was selected
    pub is_software: bool,
}

/// The render device and its queue
#[derive(Debug)]
pub struct GpuDevice {
    pub id: DeviceId,
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    pub info: GpuDeviceInfo,
}

/// Get the process-wide render device, creating it on first call
pub fn shared_device() -> Result<Arc<GpuDevice>, GpuError> {
    SHARED_DEVICE
        .get_or_init(|| {
            create_device().map(Arc::new).inspect_err(|e| {
                error!(error = %e, "Render device creation failed; GPU interop disabled for this session");
            })
        })
        .clone()
        .map_err(GpuError::DeviceUnavailable)
}

/// Whether the process-wide device has been created successfully
pub fn is_initialized() -> bool {
    matches!(SHARED_DEVICE.get(), Some(Ok(_)))
}

fn create_device() -> Result<GpuDevice, String> {
    let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor::default());

    let adapter = match request_adapter(&instance, false) {
        Ok(adapter) => adapter,
        Err(e) => {
            warn!(error = %e, "No hardware adapter, trying software fallback");
            request_adapter(&instance, true)?
        }
    };

    let adapter_info = adapter.get_info();
    let is_software = adapter_info.device_type == wgpu::DeviceType::Cpu;

    info!(
        adapter = %adapter_info.name,
        backend = ?adapter_info.backend,
        software = is_software,
        "GPU adapter selected for preview rendering"
    );

    let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
        label: Some("preview_render_device"),
        required_features: wgpu::Features::empty(),
        required_limits: wgpu::Limits::downlevel_defaults().using_resolution(adapter.limits()),
        memory_hints: wgpu::MemoryHints::Performance,
        ..Default::default()
    }))
    .map_err(|e| format!("Failed to create GPU device: {}", e))?;

    let id = DeviceId::next();
    debug!(device = %id, "Render device created");

    Ok(GpuDevice {
        id,
        device,
        queue,
        info: GpuDeviceInfo {
            adapter_name: adapter_info.name,
            backend: adapter_info.backend,
            is_software,
        },
    })
}

fn request_adapter(instance: &wgpu::Instance, fallback: bool) -> Result<wgpu::Adapter, String> {
    pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
        power_preference: wgpu::PowerPreference::HighPerformance,
        compatible_surface: None,
        force_fallback_adapter: fallback,
    }))
    .map_err(|e| {
        if fallback {
            format!("No software adapter available: {}", e)
        } else {
            format!("No hardware adapter available: {}", e)
        }
    })
}

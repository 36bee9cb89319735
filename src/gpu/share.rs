// SPDX-License-Identifier: GPL-3.0-only

//! Process-wide share-handle table for wgpu textures.
//!
//! A texture exported for sharing is registered under an opaque
//! [`ShareHandle`]. Consumers on another device or API layer open it by
//! handle. The registration is an RAII guard: dropping it removes the entry,
//! so a handle can never resolve to a texture its owner has released.

use super::wgpu;
use crate::backends::camera::{DeviceId, FrameSize, ShareHandle};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, OnceLock};
use tracing::trace;

static REGISTRY: OnceLock<Mutex<HashMap<ShareHandle, SharedTextureRef>>> = OnceLock::new();
static NEXT_HANDLE: AtomicU64 = AtomicU64::new(0x1000);

/// A registered texture as seen by whoever opens its handle
#[derive(Debug, Clone)]
pub struct SharedTextureRef {
    /// Device the texture was allocated on
    pub device: DeviceId,
    pub texture: wgpu::Texture,
    pub size: FrameSize,
}

/// Keeps a texture registered while alive
#[derive(Debug)]
pub struct ShareRegistration {
    handle: ShareHandle,
}

impl ShareRegistration {
    pub fn handle(&self) -> ShareHandle {
        self.handle
    }
}

impl Drop for ShareRegistration {
    fn drop(&mut self) {
        let mut table = registry().lock().unwrap_or_else(|e| e.into_inner());
        table.remove(&self.handle);
        trace!(handle = %self.handle, "Share handle released");
    }
}

fn registry() -> &'static Mutex<HashMap<ShareHandle, SharedTextureRef>> {
    REGISTRY.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Register `texture` for sharing and return its guard
pub fn export(device: DeviceId, texture: wgpu::Texture, size: FrameSize) -> ShareRegistration {
    let handle = ShareHandle(NEXT_HANDLE.fetch_add(1, Ordering::Relaxed));
    let entry = SharedTextureRef {
        device,
        texture,
        size,
    };
    registry()
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .insert(handle, entry);
    trace!(handle = %handle, device = %device, size = %size, "Share handle exported");
    ShareRegistration { handle }
}

/// Resolve a share handle, if it is still registered
pub fn open(handle: ShareHandle) -> Option<SharedTextureRef> {
    registry()
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .get(&handle)
        .cloned()
}

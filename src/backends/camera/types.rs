// SPDX-License-Identifier: GPL-3.0-only

//! Shared types for capture sources

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Width and height of a 2D buffer in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct FrameSize {
    pub width: u32,
    pub height: u32,
}

impl FrameSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Tightly packed row length for a 4-byte-per-pixel format
    pub fn packed_stride(&self) -> u32 {
        self.width * crate::constants::PRESENT_BYTES_PER_PIXEL
    }
}

impl std::fmt::Display for FrameSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Identity of a GPU device instance within this process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceId(pub u64);

impl DeviceId {
    /// Allocate a process-unique device identity
    pub fn next() -> Self {
        static NEXT_DEVICE_ID: AtomicU64 = AtomicU64::new(1);
        DeviceId(NEXT_DEVICE_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for DeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "device#{}", self.0)
    }
}

/// Opaque cross-device share handle for a GPU texture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShareHandle(pub u64);

impl std::fmt::Display for ShareHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "share#{:x}", self.0)
    }
}

/// Keeps the producer's resources for a frame alive until it is consumed
pub type FrameLease = Box<dyn Send + Sync>;

/// Where the pixels of a captured frame live
pub enum FrameStorage {
    /// GPU-resident texture, reachable through its share handle
    Gpu {
        /// Device the texture was allocated on
        device: DeviceId,
        handle: ShareHandle,
        /// Released when the frame is dropped
        lease: Option<FrameLease>,
    },
    /// Mapped BGRA8 rows in system memory
    Cpu { data: Arc<[u8]>, stride: u32 },
}

impl std::fmt::Debug for FrameStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FrameStorage::Gpu { device, handle, .. } => {
                write!(f, "FrameStorage::Gpu({} on {})", handle, device)
            }
            FrameStorage::Cpu { data, stride } => {
                write!(f, "FrameStorage::Cpu({} bytes, stride {})", data.len(), stride)
            }
        }
    }
}

/// One captured video frame.
///
/// Not `Clone`: a frame is consumed exactly once, by the blit or by the
/// software path, and its lease is released when it is dropped.
#[derive(Debug)]
pub struct FrameBuffer {
    /// Monotonic sequence number assigned by the capture source
    pub sequence: u64,
    pub size: FrameSize,
    pub storage: FrameStorage,
    /// When the capture callback produced the frame (latency diagnostics)
    pub captured_at: Instant,
}

impl FrameBuffer {
    pub fn gpu(
        sequence: u64,
        size: FrameSize,
        device: DeviceId,
        handle: ShareHandle,
        lease: Option<FrameLease>,
    ) -> Self {
        Self {
            sequence,
            size,
            storage: FrameStorage::Gpu {
                device,
                handle,
                lease,
            },
            captured_at: Instant::now(),
        }
    }

    pub fn cpu(sequence: u64, size: FrameSize, data: Arc<[u8]>, stride: u32) -> Self {
        Self {
            sequence,
            size,
            storage: FrameStorage::Cpu { data, stride },
            captured_at: Instant::now(),
        }
    }
}

/// Ticket for one "request next sample" call.
///
/// The capture source hands the ticket back with the completed frame. The
/// epoch ties the completion to the activation that issued it; completions
/// from an earlier epoch are ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SampleRequest {
    pub epoch: u64,
    pub id: u64,
}

/// Clock-state notifications from the capture device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClockEvent {
    Start,
    Stop,
    Pause,
    Restart,
}

impl std::fmt::Display for ClockEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClockEvent::Start => write!(f, "start"),
            ClockEvent::Stop => write!(f, "stop"),
            ClockEvent::Pause => write!(f, "pause"),
            ClockEvent::Restart => write!(f, "restart"),
        }
    }
}
